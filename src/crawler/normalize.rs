//! Raw review fields to canonical rows.
//!
//! Scores go through a [`ScoreScale`]. The batch-relative mode reproduces the
//! historical behavior: min/max are taken over the batch being normalized, so
//! the same raw score can land on different values from one run to the next.

use std::str::FromStr;
use std::sync::LazyLock;

use anyhow::{bail, Context};
use chrono::NaiveDate;
use regex::Regex;
use uuid::Uuid;

use crate::crawler::models::{CanonicalReviewRecord, RawReviewRecord};

/// Score assigned to every row when a batch has no spread.
pub const NEUTRAL_SCORE: f64 = 5.0;

static REVIEW_DATE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d{4}/\d{1,2}/\d{1,2})").unwrap());

#[derive(Debug, Clone, PartialEq, Default)]
pub enum ScoreScale {
    /// Min-max over the scores present in the batch.
    #[default]
    BatchRelative,
    /// Absolute mapping of `[min, max]` onto 0–10.
    Fixed { min: f64, max: f64 },
}

impl FromStr for ScoreScale {
    type Err = anyhow::Error;

    /// `batch` or `fixed:<min>:<max>`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("batch") {
            return Ok(Self::BatchRelative);
        }

        let Some(range) = s.strip_prefix("fixed:") else {
            bail!("unknown score scale `{s}`, expected `batch` or `fixed:<min>:<max>`");
        };
        let (min, max) = range
            .split_once(':')
            .with_context(|| format!("score scale `{s}` is missing its max"))?;
        let min: f64 = min.trim().parse().context("invalid score scale min")?;
        let max: f64 = max.trim().parse().context("invalid score scale max")?;

        if !(min.is_finite() && max.is_finite()) || max <= min {
            bail!("score scale range must satisfy min < max, got {min}..{max}");
        }
        Ok(Self::Fixed { min, max })
    }
}

/// First `YYYY/M/D` in the text; without one the whole text is tried.
pub fn parse_review_date(raw: &str) -> Option<NaiveDate> {
    let candidate = REVIEW_DATE
        .find(raw)
        .map_or(raw, |m| m.as_str())
        .trim();
    NaiveDate::parse_from_str(candidate, "%Y/%m/%d").ok()
}

pub fn parse_score(raw: &str) -> Option<f64> {
    raw.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

fn one_decimal(value: f64) -> f64 {
    (value * 10.0).round_ties_even() / 10.0
}

/// Rescales parsed scores in place according to `scale`.
pub fn rescale(scores: &mut [Option<f64>], scale: &ScoreScale) {
    match *scale {
        ScoreScale::BatchRelative => {
            let present = scores.iter().flatten().copied();
            let Some((min, max)) = present.fold(None, |acc: Option<(f64, f64)>, v| {
                Some(acc.map_or((v, v), |(lo, hi)| (lo.min(v), hi.max(v))))
            }) else {
                return;
            };

            let spread = max - min;
            if spread == 0.0 {
                // Every row, parsed or not, gets the neutral value.
                scores.iter_mut().for_each(|s| *s = Some(NEUTRAL_SCORE));
                return;
            }

            for score in scores.iter_mut().flatten() {
                *score = one_decimal((*score - min) / spread * 10.0);
            }
        }
        ScoreScale::Fixed { min, max } => {
            for score in scores.iter_mut().flatten() {
                *score = one_decimal(((*score - min) / (max - min) * 10.0).clamp(0.0, 10.0));
            }
        }
    }
}

/// Normalizes one batch. Malformed fields become `None`; nothing is dropped.
pub fn normalize(raw: Vec<RawReviewRecord>, scale: &ScoreScale) -> Vec<CanonicalReviewRecord> {
    let mut scores: Vec<Option<f64>> = raw.iter().map(|r| parse_score(&r.raw_score_text)).collect();
    rescale(&mut scores, scale);

    raw.into_iter()
        .zip(scores)
        .map(|(r, score)| CanonicalReviewRecord {
            uuid: Uuid::new_v4(),
            hotel_id: r.hotel_id,
            review_type: r.review_type.to_string(),
            status: r.status.to_string(),
            score,
            author_name: r.author_name,
            ota: r.ota_code,
            review_created_at: parse_review_date(&r.raw_date_text),
            content: r.content_text,
        })
        .collect()
}
