use std::ops::Range;
use std::time::Duration;

use anyhow::{Context, Result};
use sqlx::{mysql::MySqlPoolOptions, MySql, MySqlPool, QueryBuilder};
use tokio::time::sleep;
use tracing::{debug, info};

use crate::crawler::models::{
    CanonicalReviewRecord, HotelReviewCount, LatestStoredReview, StoredReview, TrackedHotel,
};

/// Rows per INSERT statement, kept well under the 65535 placeholder limit.
const ROWS_PER_STATEMENT: usize = 1_000;

/// How the loader paces a bulk write.
#[derive(Debug, Clone)]
pub struct UploadPlan {
    pub chunk_size: usize,
    pub pause: Duration,
}

impl Default for UploadPlan {
    fn default() -> Self {
        Self {
            chunk_size: 300_000,
            pause: Duration::from_secs(4),
        }
    }
}

pub struct Storage {
    pool: MySqlPool,
}

impl Storage {
    pub async fn new(database_url: &str) -> Result<Self> {
        let pool = MySqlPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await
            .context("failed to connect to review database")?;

        Ok(Self { pool })
    }

    /// Hotels linked to `ota`, with the link to their review page.
    pub async fn tracked_hotels(&self, ota: &str) -> Result<Vec<TrackedHotel>> {
        let hotels = sqlx::query_as::<_, TrackedHotel>(
            r#"
            SELECT
                CAST(h.id AS SIGNED) AS hotel_id,
                h.name AS hotel_name,
                h.address,
                urls.ota,
                urls.link
            FROM hotels AS h
            INNER JOIN `hotel-otas` AS urls ON h.id = urls.hotelId
            WHERE urls.ota = ?
            "#,
        )
        .bind(ota)
        .fetch_all(&self.pool)
        .await
        .with_context(|| format!("failed to read tracked hotels for {ota}"))?;

        Ok(hotels)
    }

    /// Newest stored review of each hotel in `hotel_ids`.
    pub async fn latest_reviews(&self, ota: &str, hotel_ids: &[i64]) -> Result<Vec<StoredReview>> {
        if hotel_ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut query = QueryBuilder::<MySql>::new(
            r#"
            SELECT id, hotelId, authorName, content, reviewCreatedAt, ota
            FROM (
                SELECT
                    CAST(hr.id AS SIGNED) AS id,
                    CAST(hr.hotelId AS SIGNED) AS hotelId,
                    hr.authorName,
                    hr.content,
                    hr.reviewCreatedAt,
                    hr.ota,
                    ROW_NUMBER() OVER (PARTITION BY hr.hotelId ORDER BY hr.reviewCreatedAt DESC) AS rn
                FROM `hotel-reviews` AS hr
                WHERE hr.ota = "#,
        );
        query.push_bind(ota).push(" AND hr.hotelId IN (");
        push_id_list(&mut query, hotel_ids);
        query.push(
            r#")
            ) AS sub
            WHERE rn = 1
            ORDER BY hotelId, reviewCreatedAt DESC
            "#,
        );

        let reviews = query
            .build_query_as::<StoredReview>()
            .fetch_all(&self.pool)
            .await
            .context("failed to read latest stored reviews")?;

        debug!(hotels = reviews.len(), "Latest stored reviews loaded");
        Ok(reviews)
    }

    pub async fn latest_review_dates(
        &self,
        ota: &str,
        hotel_ids: &[i64],
    ) -> Result<Vec<LatestStoredReview>> {
        let reviews = self.latest_reviews(ota, hotel_ids).await?;
        Ok(reviews.iter().map(LatestStoredReview::from).collect())
    }

    /// Stored review count per hotel; hotels without reviews are absent.
    pub async fn review_counts(&self, ota: &str, hotel_ids: &[i64]) -> Result<Vec<HotelReviewCount>> {
        if hotel_ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut query = QueryBuilder::<MySql>::new(
            "SELECT CAST(hr.hotelId AS SIGNED) AS hotel_id, COUNT(*) AS review_count \
             FROM `hotel-reviews` AS hr WHERE hr.ota = ",
        );
        query.push_bind(ota).push(" AND hr.hotelId IN (");
        push_id_list(&mut query, hotel_ids);
        query.push(") GROUP BY hr.hotelId");

        let counts = query
            .build_query_as::<HotelReviewCount>()
            .fetch_all(&self.pool)
            .await
            .context("failed to count stored reviews")?;

        Ok(counts)
    }

    /// Appends reviews in paced chunks inside one transaction. Any failure
    /// rolls back every chunk written so far.
    pub async fn insert_reviews(
        &self,
        reviews: &[CanonicalReviewRecord],
        plan: &UploadPlan,
    ) -> Result<usize> {
        if reviews.is_empty() {
            info!("No reviews to insert");
            return Ok(0);
        }

        let chunks = upload_chunks(reviews.len(), plan.chunk_size);
        info!(total = reviews.len(), chunks = chunks.len(), "Inserting reviews");

        let mut tx = self
            .pool
            .begin()
            .await
            .context("failed to open review insert transaction")?;
        let mut saved = 0usize;

        for (idx, statements) in chunks.iter().enumerate() {
            for range in statements {
                let mut insert = QueryBuilder::<MySql>::new(
                    "INSERT INTO `hotel-reviews` \
                     (uuid, hotelId, type, status, score, authorName, ota, reviewCreatedAt, content) ",
                );
                insert.push_values(&reviews[range.clone()], |mut row, review| {
                    row.push_bind(review.uuid.to_string())
                        .push_bind(review.hotel_id)
                        .push_bind(review.review_type.as_str())
                        .push_bind(review.status.as_str())
                        .push_bind(review.score)
                        .push_bind(review.author_name.as_str())
                        .push_bind(review.ota.as_str())
                        .push_bind(review.review_created_at)
                        .push_bind(review.content.as_str());
                });

                insert
                    .build()
                    .execute(&mut *tx)
                    .await
                    .with_context(|| format!("failed to insert review chunk {}", idx + 1))?;
                saved += range.len();
            }

            info!(chunk = idx + 1, saved, "Review chunk inserted");

            if idx + 1 < chunks.len() {
                sleep(plan.pause).await;
            }
        }

        tx.commit().await.context("failed to commit review insert")?;
        Ok(saved)
    }
}

/// Splits `total` rows into upload chunks of `chunk_size` (at least 1), each
/// chunk further split into INSERT statements of at most
/// [`ROWS_PER_STATEMENT`] rows.
fn upload_chunks(total: usize, chunk_size: usize) -> Vec<Vec<Range<usize>>> {
    let chunk_size = chunk_size.max(1);

    (0..total)
        .step_by(chunk_size)
        .map(|start| {
            let end = (start + chunk_size).min(total);
            (start..end)
                .step_by(ROWS_PER_STATEMENT)
                .map(|from| from..(from + ROWS_PER_STATEMENT).min(end))
                .collect()
        })
        .collect()
}

fn push_id_list(query: &mut QueryBuilder<'_, MySql>, hotel_ids: &[i64]) {
    let mut ids = query.separated(", ");
    for id in hotel_ids {
        ids.push_bind(*id);
    }
}
