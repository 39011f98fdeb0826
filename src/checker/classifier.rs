use std::collections::{HashMap, HashSet};

use tracing::{debug, info};

use crate::crawler::models::{ClassifiedHotel, HotelReviewCount, TrackedHotel};

#[derive(Debug, Default)]
pub struct Classification {
    /// No stored reviews yet: crawled in full.
    pub new_hotels: Vec<ClassifiedHotel>,
    /// At least one stored review: crawled incrementally.
    pub existing_hotels: Vec<ClassifiedHotel>,
}

impl Classification {
    pub fn total(&self) -> usize {
        self.new_hotels.len() + self.existing_hotels.len()
    }
}

/// Splits tracked hotels by stored review count. Hotels missing from `counts`
/// have zero reviews. Duplicate hotel ids keep their first row.
pub fn classify(tracked: &[TrackedHotel], counts: &[HotelReviewCount]) -> Classification {
    let counts: HashMap<i64, i64> = counts.iter().map(|c| (c.hotel_id, c.review_count)).collect();
    let mut seen = HashSet::with_capacity(tracked.len());
    let mut result = Classification::default();

    for hotel in tracked {
        if !seen.insert(hotel.hotel_id) {
            debug!(hotel_id = hotel.hotel_id, "Duplicate tracked hotel ignored");
            continue;
        }

        let review_count = counts.get(&hotel.hotel_id).copied().unwrap_or(0);
        let classified = ClassifiedHotel {
            hotel: hotel.clone(),
            review_count,
        };

        if review_count == 0 {
            result.new_hotels.push(classified);
        } else {
            result.existing_hotels.push(classified);
        }
    }

    info!(
        new = result.new_hotels.len(),
        existing = result.existing_hotels.len(),
        "Hotels classified"
    );
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hotel(id: i64) -> TrackedHotel {
        TrackedHotel {
            hotel_id: id,
            hotel_name: format!("Hotel {id}"),
            address: Some(format!("{id} Shijo-dori")),
            ota_code: "IKYU".to_string(),
            review_page_link: format!("https://www.ikyu.com/{id:08}/"),
        }
    }

    fn count(hotel_id: i64, review_count: i64) -> HotelReviewCount {
        HotelReviewCount {
            hotel_id,
            review_count,
        }
    }

    fn ids(hotels: &[ClassifiedHotel]) -> Vec<i64> {
        hotels.iter().map(|h| h.hotel.hotel_id).collect()
    }

    #[test]
    fn splits_on_review_count() {
        let tracked: Vec<_> = (1..=5).map(hotel).collect();
        let counts = [count(2, 14), count(4, 1)];

        let result = classify(&tracked, &counts);

        assert_eq!(ids(&result.new_hotels), vec![1, 3, 5]);
        assert_eq!(ids(&result.existing_hotels), vec![2, 4]);
        assert!(result.new_hotels.iter().all(|h| h.review_count == 0));
        assert_eq!(result.existing_hotels[0].review_count, 14);
        assert_eq!(result.existing_hotels[1].review_count, 1);
    }

    #[test]
    fn partition_covers_every_hotel_exactly_once() {
        let tracked: Vec<_> = (1..=40).map(hotel).collect();
        let counts: Vec<_> = (1..=40).filter(|id| id % 3 == 0).map(|id| count(id, id)).collect();

        let result = classify(&tracked, &counts);

        let new: HashSet<_> = ids(&result.new_hotels).into_iter().collect();
        let existing: HashSet<_> = ids(&result.existing_hotels).into_iter().collect();
        let all: HashSet<_> = (1..=40).collect();

        assert!(new.is_disjoint(&existing));
        assert_eq!(&new | &existing, all);
        assert_eq!(result.total(), 40);
        for h in result.existing_hotels.iter().chain(&result.new_hotels) {
            let expected = if h.hotel.hotel_id % 3 == 0 { h.hotel.hotel_id } else { 0 };
            assert_eq!(h.review_count, expected);
        }
    }

    #[test]
    fn keeps_hotel_attributes() {
        let result = classify(&[hotel(9)], &[count(9, 3)]);
        assert_eq!(result.existing_hotels[0].hotel, hotel(9));
    }

    #[test]
    fn counts_for_untracked_hotels_are_ignored() {
        let result = classify(&[hotel(1)], &[count(99, 5)]);

        assert_eq!(ids(&result.new_hotels), vec![1]);
        assert!(result.existing_hotels.is_empty());
    }

    #[test]
    fn duplicate_rows_are_not_duplicated() {
        let result = classify(&[hotel(1), hotel(1), hotel(2)], &[]);
        assert_eq!(ids(&result.new_hotels), vec![1, 2]);
    }
}
