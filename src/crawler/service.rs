use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use crate::{
    checker::{self, HighWaterMarks},
    config::Config,
    crawler::{
        fetcher::ChromeSession,
        models::{CanonicalReviewRecord, ClassifiedHotel, ExtractMode, TrackedHotel},
        normalize::{self, ScoreScale},
        BatchReport, ReviewExtractor,
    },
    storage::Storage,
};

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub tracked_hotels: usize,
    pub new_hotels: usize,
    pub existing_hotels: usize,
    pub skipped_hotels: usize,
    pub new_hotel_reviews: usize,
    pub existing_candidates: usize,
    pub existing_admitted: usize,
    pub loaded: usize,
}

/// Reviews ready for the loader, plus the counts that produced them.
#[derive(Debug)]
pub struct PreparedLoad {
    pub records: Vec<CanonicalReviewRecord>,
    pub new_hotel_reviews: usize,
    pub existing_candidates: usize,
    pub existing_admitted: usize,
}

/// Normalizes both batches, filters the existing-hotel batch against the
/// stored high-water marks, and merges new-hotel reviews first.
pub fn prepare_load(
    new_batch: BatchReport,
    existing_batch: BatchReport,
    marks: &HighWaterMarks,
    scale: &ScoreScale,
) -> PreparedLoad {
    let fresh = normalize::normalize(new_batch.reviews, scale);
    let candidates = normalize::normalize(existing_batch.reviews, scale);
    let existing_candidates = candidates.len();

    let admitted = checker::filter_new(candidates, marks);
    let new_hotel_reviews = fresh.len();
    let existing_admitted = admitted.len();

    let mut records = fresh;
    records.extend(admitted);

    PreparedLoad {
        records,
        new_hotel_reviews,
        existing_candidates,
        existing_admitted,
    }
}

pub struct SyncService {
    cfg: Config,
    storage: Storage,
}

impl SyncService {
    pub async fn new(cfg: Config) -> Result<Self> {
        let storage = Storage::new(&cfg.database_url).await?;
        Ok(Self { cfg, storage })
    }

    pub async fn run(&self) -> Result<RunSummary> {
        let ota = self.cfg.ota_code.as_str();

        let tracked = self.storage.tracked_hotels(ota).await?;
        info!(ota, count = tracked.len(), "Tracked hotels loaded");
        if tracked.is_empty() {
            warn!(ota, "No hotels tracked for this OTA");
            return Ok(RunSummary::default());
        }

        let mut hotel_ids: Vec<i64> = tracked.iter().map(|h| h.hotel_id).collect();
        hotel_ids.sort_unstable();
        hotel_ids.dedup();

        let (latest, counts) = tokio::try_join!(
            self.storage.latest_review_dates(ota, &hotel_ids),
            self.storage.review_counts(ota, &hotel_ids),
        )?;
        let marks = checker::high_water_marks(&latest);
        let classification = checker::classify(&tracked, &counts);

        let missing_marks = classification
            .existing_hotels
            .iter()
            .filter(|h| !marks.contains_key(&h.hotel.hotel_id))
            .count();
        if missing_marks > 0 {
            warn!(
                missing_marks,
                "Existing hotels without a latest review; all their reviews will be admitted"
            );
        }

        let new_batch = self
            .extract(&classification.new_hotels, ExtractMode::Full)
            .await?;
        let existing_batch = self
            .extract(&classification.existing_hotels, ExtractMode::Incremental)
            .await?;
        let skipped_hotels = new_batch.skipped_hotels() + existing_batch.skipped_hotels();

        let prepared = prepare_load(new_batch, existing_batch, &marks, &self.cfg.score_scale);
        info!(
            new_hotel_reviews = prepared.new_hotel_reviews,
            existing_candidates = prepared.existing_candidates,
            existing_admitted = prepared.existing_admitted,
            "Reviews prepared for load"
        );

        let loaded = if self.cfg.dry_run {
            self.preview(&prepared.records);
            0
        } else {
            self.storage
                .insert_reviews(&prepared.records, &self.cfg.upload_plan())
                .await?
        };

        let summary = RunSummary {
            tracked_hotels: classification.total(),
            new_hotels: classification.new_hotels.len(),
            existing_hotels: classification.existing_hotels.len(),
            skipped_hotels,
            new_hotel_reviews: prepared.new_hotel_reviews,
            existing_candidates: prepared.existing_candidates,
            existing_admitted: prepared.existing_admitted,
            loaded,
        };
        info!(?summary, "Review sync finished");
        Ok(summary)
    }

    /// Runs one batch on its own browser session. Batches never overlap: the
    /// session is closed before this returns.
    async fn extract(&self, hotels: &[ClassifiedHotel], mode: ExtractMode) -> Result<BatchReport> {
        if hotels.is_empty() {
            info!(mode = mode.as_str(), "No hotels in batch");
            return Ok(BatchReport::default());
        }

        let hotels: Vec<TrackedHotel> = hotels.iter().map(|h| h.hotel.clone()).collect();
        let settings = self.cfg.extraction_settings();
        let headless = self.cfg.headless;

        let report = tokio::task::spawn_blocking(move || -> Result<BatchReport> {
            let session = ChromeSession::launch(headless)?;
            Ok(ReviewExtractor::new(session, settings).run(&hotels, mode))
        })
        .await
        .context("extraction task failed")??;

        Ok(report)
    }

    fn preview(&self, records: &[CanonicalReviewRecord]) {
        info!(rows = records.len(), "Dry run: skipping insert");
        for record in records {
            match serde_json::to_string(record) {
                Ok(json) => debug!(%json, "Would insert review"),
                Err(e) => warn!(error = %e, "Review not serializable"),
            }
        }
    }
}
