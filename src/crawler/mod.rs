use std::thread::sleep;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::crawler::fetcher::{BrowserError, BrowserSession, Locator, PageElement};
use crate::crawler::models::{ExtractMode, RawReviewRecord, TrackedHotel};
use crate::crawler::parser::ReviewSchema;

pub mod fetcher;
pub mod models;
pub mod normalize;
pub mod parser;
pub mod service;

/// Controls that open the review panel, in order of preference.
pub const REVIEW_TRIGGERS: [Locator; 2] = [
    Locator::Css("span.text-sm.font-normal.text-blue-700"),
    Locator::Text {
        tag: "button",
        contains: "クチコミをすべてみる",
    },
];
pub const REVIEW_PANEL: Locator = Locator::Css(".bg-gray-100.px-10.py-16");
pub const SHOW_MORE: Locator = Locator::Text {
    tag: "button",
    contains: "続きをみる",
};

#[derive(Debug, Clone)]
pub struct ExtractionSettings {
    pub trigger_timeout: Duration,
    pub panel_timeout: Duration,
    pub navigation_settle: Duration,
    pub pagination_settle: Duration,
}

impl ExtractionSettings {
    /// No settle pauses, for pages that are already fully rendered.
    pub fn without_delays() -> Self {
        Self {
            navigation_settle: Duration::ZERO,
            pagination_settle: Duration::ZERO,
            ..Self::default()
        }
    }
}

impl Default for ExtractionSettings {
    fn default() -> Self {
        Self {
            trigger_timeout: Duration::from_secs(5),
            panel_timeout: Duration::from_secs(10),
            navigation_settle: Duration::from_secs(3),
            pagination_settle: Duration::from_secs(2),
        }
    }
}

/// Why a hotel contributed no reviews this run.
#[derive(Debug, Error)]
pub enum SkipReason {
    #[error("could not load review page: {0}")]
    Navigation(#[source] BrowserError),
    #[error("no review trigger found")]
    TriggerNotFound,
    #[error("could not open review panel: {0}")]
    TriggerFailed(#[source] BrowserError),
    #[error("review list did not load: {0}")]
    PanelNotLoaded(#[source] BrowserError),
    #[error("review items could not be listed: {0}")]
    ItemsUnavailable(#[source] BrowserError),
}

#[derive(Debug)]
pub enum HotelOutcome {
    Extracted {
        reviews: Vec<RawReviewRecord>,
        skipped_items: usize,
    },
    Skipped(SkipReason),
}

#[derive(Debug)]
pub struct HotelReport {
    pub hotel_id: i64,
    /// Review elements on the page, including those that failed to parse.
    pub items_found: usize,
    pub reviews_found: usize,
    pub skipped_items: usize,
    pub skip_reason: Option<SkipReason>,
}

/// Records of one extraction batch plus per-hotel diagnostics.
#[derive(Debug, Default)]
pub struct BatchReport {
    pub reviews: Vec<RawReviewRecord>,
    pub hotels: Vec<HotelReport>,
}

impl BatchReport {
    fn record(&mut self, hotel_id: i64, outcome: HotelOutcome) {
        let report = match outcome {
            HotelOutcome::Extracted {
                reviews,
                skipped_items,
            } => {
                let report = HotelReport {
                    hotel_id,
                    items_found: reviews.len() + skipped_items,
                    reviews_found: reviews.len(),
                    skipped_items,
                    skip_reason: None,
                };
                self.reviews.extend(reviews);
                report
            }
            HotelOutcome::Skipped(reason) => HotelReport {
                hotel_id,
                items_found: 0,
                reviews_found: 0,
                skipped_items: 0,
                skip_reason: Some(reason),
            },
        };
        self.hotels.push(report);
    }

    pub fn extracted_hotels(&self) -> usize {
        self.hotels.iter().filter(|h| h.skip_reason.is_none()).count()
    }

    pub fn skipped_hotels(&self) -> usize {
        self.hotels.len() - self.extracted_hotels()
    }

    pub fn skipped_items(&self) -> usize {
        self.hotels.iter().map(|h| h.skipped_items).sum()
    }
}

enum Stage<E> {
    Navigate,
    LocateTrigger,
    OpenPanel(E),
    WaitPanel,
    Paginate,
    ExtractItems,
    Done(HotelOutcome),
}

impl<E> Stage<E> {
    fn name(&self) -> &'static str {
        match self {
            Self::Navigate => "navigate",
            Self::LocateTrigger => "locate_trigger",
            Self::OpenPanel(_) => "open_panel",
            Self::WaitPanel => "wait_panel",
            Self::Paginate => "paginate",
            Self::ExtractItems => "extract_items",
            Self::Done(_) => "done",
        }
    }
}

fn skip<E>(reason: SkipReason) -> Stage<E> {
    Stage::Done(HotelOutcome::Skipped(reason))
}

/// Review extractor for one batch, driving a single browser session.
pub struct ReviewExtractor<S: BrowserSession> {
    session: S,
    schema: ReviewSchema,
    settings: ExtractionSettings,
}

impl<S: BrowserSession> ReviewExtractor<S> {
    pub fn new(session: S, settings: ExtractionSettings) -> Self {
        Self {
            session,
            schema: ReviewSchema::ikyu(),
            settings,
        }
    }

    /// Extracts every hotel in order and closes the session afterwards.
    /// Hotel-level failures are reported, never propagated.
    pub fn run(self, hotels: &[TrackedHotel], mode: ExtractMode) -> BatchReport {
        let total = hotels.len();
        info!(total, mode = mode.as_str(), "Starting review extraction");

        let mut report = BatchReport::default();
        for (idx, hotel) in hotels.iter().enumerate() {
            info!(
                hotel_id = hotel.hotel_id,
                position = idx + 1,
                total,
                link = %hotel.review_page_link,
                "Crawling hotel"
            );

            let outcome = self.crawl_hotel(hotel, mode);
            match &outcome {
                HotelOutcome::Extracted {
                    reviews,
                    skipped_items,
                } => info!(
                    hotel_id = hotel.hotel_id,
                    items_found = reviews.len() + skipped_items,
                    extracted = reviews.len(),
                    skipped_items,
                    "Hotel extracted"
                ),
                HotelOutcome::Skipped(reason) => {
                    warn!(hotel_id = hotel.hotel_id, reason = %reason, "Hotel skipped")
                }
            }
            report.record(hotel.hotel_id, outcome);
        }

        if let Err(e) = self.session.close() {
            warn!(error = %e, "Browser session did not close cleanly");
        }

        info!(
            mode = mode.as_str(),
            extracted = report.extracted_hotels(),
            skipped = report.skipped_hotels(),
            reviews = report.reviews.len(),
            "Review extraction finished"
        );
        report
    }

    fn crawl_hotel(&self, hotel: &TrackedHotel, mode: ExtractMode) -> HotelOutcome {
        let mut stage = Stage::Navigate;

        loop {
            debug!(hotel_id = hotel.hotel_id, stage = stage.name(), "Hotel stage");

            stage = match stage {
                Stage::Navigate => match self.session.navigate(&hotel.review_page_link) {
                    Ok(()) => {
                        pause(self.settings.navigation_settle);
                        Stage::LocateTrigger
                    }
                    Err(e) => skip(SkipReason::Navigation(e)),
                },
                Stage::LocateTrigger => match self.locate_trigger() {
                    Some(trigger) => Stage::OpenPanel(trigger),
                    None => skip(SkipReason::TriggerNotFound),
                },
                Stage::OpenPanel(trigger) => match trigger.click_scripted() {
                    Ok(()) => Stage::WaitPanel,
                    Err(e) => skip(SkipReason::TriggerFailed(e)),
                },
                Stage::WaitPanel => {
                    match self
                        .session
                        .wait_present(&REVIEW_PANEL, self.settings.panel_timeout)
                    {
                        Ok(_) => Stage::Paginate,
                        Err(e) => skip(SkipReason::PanelNotLoaded(e)),
                    }
                }
                Stage::Paginate => {
                    let pages = self.expand(mode.page_limit());
                    debug!(hotel_id = hotel.hotel_id, pages, "Pagination finished");
                    Stage::ExtractItems
                }
                Stage::ExtractItems => match self.extract_items(hotel) {
                    Ok(outcome) => Stage::Done(outcome),
                    Err(e) => skip(SkipReason::ItemsUnavailable(e)),
                },
                Stage::Done(outcome) => return outcome,
            };
        }
    }

    fn locate_trigger(&self) -> Option<S::Element<'_>> {
        REVIEW_TRIGGERS.iter().find_map(|locator| {
            match self
                .session
                .wait_clickable(locator, self.settings.trigger_timeout)
            {
                Ok(element) => Some(element),
                Err(e) => {
                    debug!(locator = %locator, error = %e, "Review trigger not usable");
                    None
                }
            }
        })
    }

    /// Clicks "show more" while it is visible and enabled, up to `limit`
    /// times. Returns the number of extra pages loaded.
    fn expand(&self, limit: Option<usize>) -> usize {
        let mut pages = 0;

        while limit.map_or(true, |max| pages < max) {
            let button = match self.session.find(&SHOW_MORE) {
                Ok(Some(button)) => button,
                Ok(None) => break,
                Err(e) => {
                    debug!(error = %e, "Show-more lookup failed");
                    break;
                }
            };

            match button.is_interactable() {
                Ok(true) => {}
                Ok(false) => break,
                Err(e) => {
                    debug!(error = %e, "Show-more state unreadable");
                    break;
                }
            }

            if let Err(e) = button.click() {
                debug!(error = %e, "Show-more click failed");
                break;
            }

            pages += 1;
            pause(self.settings.pagination_settle);
        }

        pages
    }

    fn extract_items(&self, hotel: &TrackedHotel) -> Result<HotelOutcome, BrowserError> {
        // Looked up again: pagination may have re-rendered the container.
        let panel = self
            .session
            .wait_present(&REVIEW_PANEL, self.settings.panel_timeout)?;
        let items = parser::review_items(&panel)?;
        debug!(hotel_id = hotel.hotel_id, items = items.len(), "Review items found");

        let mut reviews = Vec::with_capacity(items.len());
        let mut skipped_items = 0;

        for (idx, item) in items.iter().enumerate() {
            match self.schema.extract(item, hotel) {
                Ok(review) => reviews.push(review),
                Err(e) => {
                    skipped_items += 1;
                    warn!(
                        hotel_id = hotel.hotel_id,
                        item = idx + 1,
                        error = %e,
                        "Skipping review item"
                    );
                }
            }
        }

        Ok(HotelOutcome::Extracted {
            reviews,
            skipped_items,
        })
    }
}

fn pause(duration: Duration) {
    if !duration.is_zero() {
        sleep(duration);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::markup::{landing, landing_with_button, panel, review};
    use crate::testing::ScriptedBrowser;
    use std::sync::atomic::Ordering;

    fn hotel(id: i64) -> TrackedHotel {
        TrackedHotel {
            hotel_id: id,
            hotel_name: format!("Hotel {id}"),
            address: Some("Kyoto".to_string()),
            ota_code: "IKYU".to_string(),
            review_page_link: format!("https://www.ikyu.com/{id:08}/"),
        }
    }

    fn paged_site(browser: ScriptedBrowser, id: i64) -> ScriptedBrowser {
        let p1 = panel(&[review("5", "2024/2/1", "a"), review("4", "2024/1/20", "b")], true);
        let p2 = panel(
            &[
                review("5", "2024/2/1", "a"),
                review("4", "2024/1/20", "b"),
                review("3", "2024/1/5", "c"),
            ],
            true,
        );
        let p3 = panel(
            &[
                review("5", "2024/2/1", "a"),
                review("4", "2024/1/20", "b"),
                review("3", "2024/1/5", "c"),
                review("2", "2023/12/30", "d"),
            ],
            false,
        );
        browser.with_page(&hotel(id).review_page_link, &[&landing(), &p1, &p2, &p3])
    }

    #[test]
    fn full_mode_pages_until_show_more_disappears() {
        let browser = paged_site(ScriptedBrowser::new(), 1);
        let clicks = browser.click_counter();
        let extractor = ReviewExtractor::new(browser, ExtractionSettings::without_delays());

        let report = extractor.run(&[hotel(1)], ExtractMode::Full);

        // Trigger plus two "show more" clicks.
        assert_eq!(clicks.load(Ordering::SeqCst), 3);
        assert_eq!(report.reviews.len(), 4);
        assert_eq!(report.hotels[0].reviews_found, 4);
        assert!(report.hotels[0].skip_reason.is_none());
    }

    #[test]
    fn incremental_mode_loads_one_extra_page() {
        let browser = paged_site(ScriptedBrowser::new(), 1);
        let clicks = browser.click_counter();
        let extractor = ReviewExtractor::new(browser, ExtractionSettings::without_delays());

        let report = extractor.run(&[hotel(1)], ExtractMode::Incremental);

        assert_eq!(clicks.load(Ordering::SeqCst), 2);
        assert_eq!(report.reviews.len(), 3);
    }

    #[test]
    fn disabled_show_more_stops_pagination() {
        let link = hotel(2).review_page_link;
        let stuck = panel(&[review("4", "2024/1/1", "a")], false)
            .replace("</ul>", r#"</ul><button data-advance disabled>続きをみる</button>"#);
        let browser = ScriptedBrowser::new().with_page(&link, &[&landing(), &stuck]);
        let extractor = ReviewExtractor::new(browser, ExtractionSettings::without_delays());

        let report = extractor.run(&[hotel(2)], ExtractMode::Full);

        assert_eq!(report.reviews.len(), 1);
    }

    #[test]
    fn secondary_trigger_opens_panel() {
        let link = hotel(3).review_page_link;
        let browser = ScriptedBrowser::new().with_page(
            &link,
            &[&landing_with_button(), &panel(&[review("4", "2024/1/1", "a")], false)],
        );
        let extractor = ReviewExtractor::new(browser, ExtractionSettings::without_delays());

        let report = extractor.run(&[hotel(3)], ExtractMode::Full);

        assert_eq!(report.reviews.len(), 1);
    }

    #[test]
    fn missing_trigger_skips_hotel() {
        let link = hotel(4).review_page_link;
        let browser = ScriptedBrowser::new().with_page(&link, &["<html><body>sold out</body></html>"]);
        let extractor = ReviewExtractor::new(browser, ExtractionSettings::without_delays());

        let report = extractor.run(&[hotel(4)], ExtractMode::Full);

        assert!(report.reviews.is_empty());
        assert!(matches!(
            report.hotels[0].skip_reason,
            Some(SkipReason::TriggerNotFound)
        ));
    }

    #[test]
    fn panel_that_never_loads_skips_hotel() {
        let link = hotel(5).review_page_link;
        let browser = ScriptedBrowser::new().with_page(&link, &[&landing(), "<html><body></body></html>"]);
        let extractor = ReviewExtractor::new(browser, ExtractionSettings::without_delays());

        let report = extractor.run(&[hotel(5)], ExtractMode::Full);

        assert!(matches!(
            report.hotels[0].skip_reason,
            Some(SkipReason::PanelNotLoaded(_))
        ));
    }

    #[test]
    fn failures_are_isolated_and_session_always_closes() {
        let broken_item = review("3", "2024/1/2", "x").replace(
            r#"<span itemprop="ratingValue">"#,
            r#"<span itemprop="ratingValue" data-detached>"#,
        );
        let browser = ScriptedBrowser::new()
            .with_unreachable(&hotel(10).review_page_link)
            .with_page(
                &hotel(11).review_page_link,
                &[
                    &landing(),
                    &panel(&[review("4", "2024/1/1", "a"), broken_item], false),
                ],
            );
        let closed = browser.closed_flag();
        let visits = browser.visit_log();
        let extractor = ReviewExtractor::new(browser, ExtractionSettings::without_delays());

        let report = extractor.run(&[hotel(10), hotel(11)], ExtractMode::Full);

        assert!(closed.load(Ordering::SeqCst));
        assert_eq!(
            *visits.lock().unwrap(),
            vec![hotel(10).review_page_link, hotel(11).review_page_link]
        );
        assert_eq!(report.skipped_hotels(), 1);
        assert_eq!(report.extracted_hotels(), 1);
        assert_eq!(report.skipped_items(), 1);
        assert_eq!(report.hotels[1].items_found, 2);
        assert_eq!(report.hotels[1].reviews_found, 1);
        assert_eq!(report.reviews.len(), 1);
        assert_eq!(report.reviews[0].hotel_id, 11);
        assert!(matches!(
            report.hotels[0].skip_reason,
            Some(SkipReason::Navigation(_))
        ));
    }

    #[test]
    fn empty_batch_still_closes_session() {
        let browser = ScriptedBrowser::new();
        let closed = browser.closed_flag();

        let report = ReviewExtractor::new(browser, ExtractionSettings::without_delays())
            .run(&[], ExtractMode::Incremental);

        assert!(report.hotels.is_empty());
        assert!(closed.load(Ordering::SeqCst));
    }
}
