use std::env;
use std::str::FromStr;
use std::time::Duration;

use anyhow::Context;

use crate::crawler::normalize::ScoreScale;
use crate::crawler::ExtractionSettings;
use crate::storage::UploadPlan;

pub struct Config {
    pub database_url: String,
    pub ota_code: String,
    pub headless: bool,
    pub navigation_settle_ms: u64,
    pub trigger_timeout_secs: u64,
    pub panel_timeout_secs: u64,
    pub pagination_settle_ms: u64,
    pub upload_chunk_size: usize,
    pub upload_pause_secs: u64,
    pub score_scale: ScoreScale,
    pub dry_run: bool,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Ok(Self {
            database_url: env::var("DATABASE_URL").context("DATABASE_URL must be set")?,
            ota_code: env::var("OTA_CODE").unwrap_or_else(|_| "IKYU".to_string()),
            headless: var_or("BROWSER_HEADLESS", true)?,
            navigation_settle_ms: var_or("NAVIGATION_SETTLE_MS", 3_000)?,
            trigger_timeout_secs: var_or("TRIGGER_TIMEOUT_SECS", 5)?,
            panel_timeout_secs: var_or("PANEL_TIMEOUT_SECS", 10)?,
            pagination_settle_ms: var_or("PAGINATION_SETTLE_MS", 2_000)?,
            upload_chunk_size: var_or("UPLOAD_CHUNK_SIZE", 300_000)?,
            upload_pause_secs: var_or("UPLOAD_PAUSE_SECS", 4)?,
            score_scale: var_or("SCORE_SCALE", ScoreScale::BatchRelative)?,
            dry_run: var_or("DRY_RUN", false)?,
        })
    }

    pub fn extraction_settings(&self) -> ExtractionSettings {
        ExtractionSettings {
            trigger_timeout: Duration::from_secs(self.trigger_timeout_secs),
            panel_timeout: Duration::from_secs(self.panel_timeout_secs),
            navigation_settle: Duration::from_millis(self.navigation_settle_ms),
            pagination_settle: Duration::from_millis(self.pagination_settle_ms),
        }
    }

    pub fn upload_plan(&self) -> UploadPlan {
        UploadPlan {
            chunk_size: self.upload_chunk_size,
            pause: Duration::from_secs(self.upload_pause_secs),
        }
    }
}

fn var_or<T>(key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid {key}={raw}: {e}")),
        Err(_) => Ok(default),
    }
}
