use chrono::{NaiveDate, NaiveDateTime};
use serde::Serialize;
use uuid::Uuid;

pub const REVIEW_TYPE_NORMAL: &str = "NORMAL";
pub const STATUS_ACTIVE: &str = "ACTIVE";

/// A hotel linked to the target OTA, as read from the registry.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct TrackedHotel {
    pub hotel_id: i64,
    pub hotel_name: String,
    pub address: Option<String>,
    #[sqlx(rename = "ota")]
    pub ota_code: String,
    #[sqlx(rename = "link")]
    pub review_page_link: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::FromRow)]
pub struct HotelReviewCount {
    pub hotel_id: i64,
    pub review_count: i64,
}

/// Tracked hotel plus the number of reviews already stored for it.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassifiedHotel {
    pub hotel: TrackedHotel,
    pub review_count: i64,
}

/// Most recent stored review of a hotel (one row per hotel).
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct StoredReview {
    pub id: i64,
    #[sqlx(rename = "hotelId")]
    pub hotel_id: i64,
    #[sqlx(rename = "authorName")]
    pub author_name: Option<String>,
    pub content: Option<String>,
    #[sqlx(rename = "reviewCreatedAt")]
    pub review_created_at: Option<NaiveDateTime>,
    pub ota: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LatestStoredReview {
    pub hotel_id: i64,
    pub last_review_date: Option<NaiveDate>,
}

impl From<&StoredReview> for LatestStoredReview {
    fn from(review: &StoredReview) -> Self {
        Self {
            hotel_id: review.hotel_id,
            last_review_date: review.review_created_at.map(|at| at.date()),
        }
    }
}

/// How far to page through a hotel's review list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractMode {
    /// First crawl of a hotel: keep expanding until no "show more" remains.
    Full,
    /// Routine re-crawl: at most one extra page.
    Incremental,
}

impl ExtractMode {
    pub fn page_limit(self) -> Option<usize> {
        match self {
            Self::Full => None,
            Self::Incremental => Some(1),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Incremental => "incremental",
        }
    }
}

/// Review fields as scraped, before any parsing.
#[derive(Debug, Clone, PartialEq)]
pub struct RawReviewRecord {
    pub hotel_id: i64,
    pub review_type: &'static str,
    pub status: &'static str,
    pub raw_score_text: String,
    pub author_name: String,
    pub ota_code: String,
    pub raw_date_text: String,
    pub content_text: String,
}

/// Row written to the review table.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CanonicalReviewRecord {
    pub uuid: Uuid,
    pub hotel_id: i64,
    #[serde(rename = "type")]
    pub review_type: String,
    pub status: String,
    pub score: Option<f64>,
    pub author_name: String,
    pub ota: String,
    pub review_created_at: Option<NaiveDate>,
    pub content: String,
}
