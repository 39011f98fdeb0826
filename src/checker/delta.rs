use std::collections::HashMap;

use chrono::NaiveDate;
use indexmap::IndexMap;
use tracing::debug;

use crate::crawler::models::{CanonicalReviewRecord, LatestStoredReview};

/// Latest stored review date per hotel. A present key with `None` means the
/// hotel's newest stored review has no date.
pub type HighWaterMarks = HashMap<i64, Option<NaiveDate>>;

pub fn high_water_marks(latest: &[LatestStoredReview]) -> HighWaterMarks {
    let mut marks = HighWaterMarks::with_capacity(latest.len());
    for review in latest {
        let mark = marks.entry(review.hotel_id).or_insert(review.last_review_date);
        *mark = (*mark).max(review.last_review_date);
    }
    marks
}

/// Keeps reviews strictly newer than their hotel's high-water mark.
///
/// Hotels without a mark are admitted whole. Undated reviews never pass a
/// mark. Output is grouped by hotel in first-seen order, preserving the order
/// within each hotel.
pub fn filter_new(
    candidates: Vec<CanonicalReviewRecord>,
    marks: &HighWaterMarks,
) -> Vec<CanonicalReviewRecord> {
    let mut by_hotel: IndexMap<i64, Vec<CanonicalReviewRecord>> = IndexMap::new();
    for record in candidates {
        by_hotel.entry(record.hotel_id).or_default().push(record);
    }

    let mut admitted = Vec::new();
    for (hotel_id, records) in by_hotel {
        let before = records.len();
        let start = admitted.len();
        match marks.get(&hotel_id) {
            None => admitted.extend(records),
            Some(mark) => admitted.extend(records.into_iter().filter(|r| is_newer(r, *mark))),
        }
        debug!(
            hotel_id,
            before,
            admitted = admitted.len() - start,
            "Delta filter applied"
        );
    }

    admitted
}

fn is_newer(record: &CanonicalReviewRecord, mark: Option<NaiveDate>) -> bool {
    match (record.review_created_at, mark) {
        (Some(created), Some(mark)) => created > mark,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn review(hotel_id: i64, created: Option<NaiveDate>, content: &str) -> CanonicalReviewRecord {
        CanonicalReviewRecord {
            uuid: Uuid::new_v4(),
            hotel_id,
            review_type: "NORMAL".to_string(),
            status: "ACTIVE".to_string(),
            score: Some(5.0),
            author_name: "guest".to_string(),
            ota: "IKYU".to_string(),
            review_created_at: created,
            content: content.to_string(),
        }
    }

    fn contents(records: &[CanonicalReviewRecord]) -> Vec<&str> {
        records.iter().map(|r| r.content.as_str()).collect()
    }

    #[test]
    fn boundary_date_is_excluded() {
        let marks = HighWaterMarks::from([(1, Some(date(2024, 1, 10)))]);
        let candidates = vec![
            review(1, Some(date(2024, 1, 9)), "older"),
            review(1, Some(date(2024, 1, 10)), "same day"),
            review(1, Some(date(2024, 1, 11)), "newer"),
        ];

        let admitted = filter_new(candidates, &marks);

        assert_eq!(contents(&admitted), vec!["newer"]);
    }

    #[test]
    fn unknown_hotel_is_admitted_whole() {
        let marks = HighWaterMarks::from([(1, Some(date(2024, 1, 10)))]);
        let candidates = vec![
            review(2, Some(date(2001, 1, 1)), "ancient"),
            review(2, None, "undated"),
        ];

        let admitted = filter_new(candidates, &marks);

        assert_eq!(contents(&admitted), vec!["ancient", "undated"]);
    }

    #[test]
    fn undated_reviews_never_pass_a_mark() {
        let marks = HighWaterMarks::from([(1, Some(date(2024, 1, 10)))]);
        let admitted = filter_new(vec![review(1, None, "undated")], &marks);
        assert!(admitted.is_empty());
    }

    #[test]
    fn undated_mark_admits_nothing() {
        let marks = HighWaterMarks::from([(1, None)]);
        let admitted = filter_new(vec![review(1, Some(date(2030, 1, 1)), "future")], &marks);
        assert!(admitted.is_empty());
    }

    #[test]
    fn empty_input_yields_nothing() {
        let marks = HighWaterMarks::from([(1, Some(date(2024, 1, 10)))]);
        assert!(filter_new(Vec::new(), &marks).is_empty());
    }

    #[test]
    fn output_is_grouped_by_hotel_in_first_seen_order() {
        let marks = HighWaterMarks::from([(3, Some(date(2024, 1, 1)))]);
        let candidates = vec![
            review(3, Some(date(2024, 2, 1)), "3a"),
            review(5, Some(date(2024, 2, 1)), "5a"),
            review(3, Some(date(2023, 2, 1)), "3-old"),
            review(3, Some(date(2024, 3, 1)), "3b"),
            review(5, None, "5b"),
        ];

        let admitted = filter_new(candidates, &marks);

        assert_eq!(contents(&admitted), vec!["3a", "3b", "5a", "5b"]);
    }

    #[test]
    fn marks_keep_the_latest_date_per_hotel() {
        let latest = [
            LatestStoredReview {
                hotel_id: 1,
                last_review_date: Some(date(2024, 1, 10)),
            },
            LatestStoredReview {
                hotel_id: 1,
                last_review_date: Some(date(2023, 5, 1)),
            },
            LatestStoredReview {
                hotel_id: 2,
                last_review_date: None,
            },
        ];

        let marks = high_water_marks(&latest);

        assert_eq!(marks[&1], Some(date(2024, 1, 10)));
        assert_eq!(marks[&2], None);
    }
}
