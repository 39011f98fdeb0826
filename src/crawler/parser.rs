use thiserror::Error;

use crate::crawler::fetcher::{BrowserError, Locator, PageElement};
use crate::crawler::models::{RawReviewRecord, TrackedHotel, REVIEW_TYPE_NORMAL, STATUS_ACTIVE};

pub const UNKNOWN_AUTHOR: &str = "Unknown";

/// Review item: an `<li>` whose own child is the rating section. Outer list
/// items that merely wrap a review do not count.
pub const REVIEW_ITEM: Locator = Locator::Css("li");
pub const REVIEW_ITEM_MARKER: Locator = Locator::Css("section[itemprop='reviewRating']");

#[derive(Debug, Error)]
pub enum ItemError {
    #[error("reading {field} failed: {source}")]
    Field {
        field: &'static str,
        #[source]
        source: BrowserError,
    },
}

/// Read-only view of a review item that field strategies query.
pub trait TextSource {
    /// Text of the first descendant matching `locator`, `None` when nothing matches.
    fn first_text(&self, locator: &Locator) -> Result<Option<String>, BrowserError>;
}

impl<E: PageElement> TextSource for E {
    fn first_text(&self, locator: &Locator) -> Result<Option<String>, BrowserError> {
        match self.find_all(locator)?.first() {
            Some(element) => element.text().map(Some),
            None => Ok(None),
        }
    }
}

/// Something that can produce one field of a review item.
pub trait FieldStrategy: Send + Sync {
    fn locate(&self, item: &dyn TextSource) -> Result<Option<String>, BrowserError>;
}

/// First descendant matching a locator. An existing but empty element still
/// counts as found.
pub struct FirstMatch(pub Locator);

impl FieldStrategy for FirstMatch {
    fn locate(&self, item: &dyn TextSource) -> Result<Option<String>, BrowserError> {
        item.first_text(&self.0)
    }
}

/// Fixed text, used as the last link of a chain.
pub struct Placeholder(pub &'static str);

impl FieldStrategy for Placeholder {
    fn locate(&self, _item: &dyn TextSource) -> Result<Option<String>, BrowserError> {
        Ok(Some(self.0.to_string()))
    }
}

/// Ordered strategies for one field; the first that finds something wins.
pub struct FieldChain {
    name: &'static str,
    strategies: Vec<Box<dyn FieldStrategy>>,
}

impl FieldChain {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            strategies: Vec::new(),
        }
    }

    pub fn then(mut self, strategy: impl FieldStrategy + 'static) -> Self {
        self.strategies.push(Box::new(strategy));
        self
    }

    pub fn selector(self, locator: Locator) -> Self {
        self.then(FirstMatch(locator))
    }

    /// Resolved value, empty string when no strategy matched.
    pub fn resolve(&self, item: &dyn TextSource) -> Result<String, ItemError> {
        for strategy in &self.strategies {
            let found = strategy.locate(item).map_err(|source| ItemError::Field {
                field: self.name,
                source,
            })?;

            if let Some(value) = found {
                return Ok(value);
            }
        }

        Ok(String::new())
    }
}

/// Where each review field lives inside a review item.
pub struct ReviewSchema {
    pub rating: FieldChain,
    pub author: FieldChain,
    pub date: FieldChain,
    pub title: FieldChain,
    pub body: FieldChain,
}

impl ReviewSchema {
    /// Review list markup of the Ikyu hotel pages.
    pub fn ikyu() -> Self {
        Self {
            rating: FieldChain::new("rating").selector(Locator::Css("span[itemprop='ratingValue']")),
            author: FieldChain::new("author")
                .selector(Locator::Css("span[class='text-gray-800']"))
                .selector(Locator::Css("span.text-blue-600.cursor-pointer"))
                .then(Placeholder(UNKNOWN_AUTHOR)),
            date: FieldChain::new("date").selector(Locator::Css("span[itemprop='datePublished']")),
            title: FieldChain::new("title").selector(Locator::Css("h2")),
            body: FieldChain::new("body").selector(Locator::Css("p[itemprop='reviewBody']")),
        }
    }

    pub fn extract(
        &self,
        item: &dyn TextSource,
        hotel: &TrackedHotel,
    ) -> Result<RawReviewRecord, ItemError> {
        let raw_score_text = self.rating.resolve(item)?;
        let author_name = self.author.resolve(item)?;
        let raw_date_text = self.date.resolve(item)?;
        let title = self.title.resolve(item)?;
        let body = self.body.resolve(item)?;

        Ok(RawReviewRecord {
            hotel_id: hotel.hotel_id,
            review_type: REVIEW_TYPE_NORMAL,
            status: STATUS_ACTIVE,
            raw_score_text,
            author_name,
            ota_code: hotel.ota_code.clone(),
            raw_date_text,
            content_text: format!("{title}\n{body}"),
        })
    }
}

/// Review items under the panel, in page order.
pub fn review_items<E: PageElement>(panel: &E) -> Result<Vec<E>, BrowserError> {
    let mut items = Vec::new();
    for candidate in panel.find_all(&REVIEW_ITEM)? {
        if candidate.has_child(&REVIEW_ITEM_MARKER)? {
            items.push(candidate);
        }
    }
    Ok(items)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crawler::fetcher::BrowserSession;
    use crate::testing::markup::{self, Review};
    use crate::testing::ScriptedBrowser;

    const URL: &str = "https://www.ikyu.com/00000007/";
    const PANEL: Locator = Locator::Css(".bg-gray-100.px-10.py-16");

    fn hotel() -> TrackedHotel {
        TrackedHotel {
            hotel_id: 7,
            hotel_name: "Hotel Kiyomizu".to_string(),
            address: None,
            ota_code: "IKYU".to_string(),
            review_page_link: URL.to_string(),
        }
    }

    fn extract_all(items: &[String]) -> Vec<Result<RawReviewRecord, ItemError>> {
        let browser = ScriptedBrowser::new().with_page(URL, &[&markup::panel(items, false)]);
        browser.navigate(URL).unwrap();
        let panel = browser.find(&PANEL).unwrap().unwrap();
        let schema = ReviewSchema::ikyu();

        review_items(&panel)
            .unwrap()
            .iter()
            .map(|item| schema.extract(item, &hotel()))
            .collect()
    }

    #[test]
    fn only_items_with_a_rating_count() {
        let plain = "<li>related hotels</li>".to_string();
        let results = extract_all(&[plain, markup::review("4", "2024/3/5", "ok")]);
        assert_eq!(results.len(), 1);
    }

    #[test]
    fn wrapping_list_items_are_not_reviews() {
        let nested = format!("<li><ul>{}</ul></li>", markup::review("4", "2024/3/5", "inner"));
        let results = extract_all(&[nested]);

        assert_eq!(results.len(), 1);
        let record = results.into_iter().next().unwrap().unwrap();
        assert_eq!(record.content_text, "inner\nbody");
    }

    #[test]
    fn author_needs_the_exact_gray_class() {
        let item = r#"<li><section itemprop="reviewRating"><span itemprop="ratingValue">4</span></section><span class="text-gray-800 text-xs">宿泊日 2023/12</span><span class="text-gray-800">tabibito</span></li>"#;
        let record = extract_all(&[item.to_string()]).remove(0).unwrap();

        assert_eq!(record.author_name, "tabibito");
    }

    #[test]
    fn extracts_every_field() {
        let results = extract_all(&[markup::render(&Review {
            score: "4.5",
            author: Some("tabibito"),
            date: "2024/3/5 訪問",
            title: "Great stay",
            body: "Quiet rooms.",
        })]);
        let record = results.into_iter().next().unwrap().unwrap();

        assert_eq!(record.author_name, "tabibito");
        assert_eq!(record.raw_score_text, "4.5");
        assert_eq!(record.raw_date_text, "2024/3/5 訪問");
        assert_eq!(record.content_text, "Great stay\nQuiet rooms.");
        assert_eq!(record.hotel_id, 7);
        assert_eq!(record.ota_code, "IKYU");
        assert_eq!(record.review_type, "NORMAL");
        assert_eq!(record.status, "ACTIVE");
    }

    #[test]
    fn author_falls_back_to_secondary_selector() {
        let item = r#"<li><section itemprop="reviewRating"></section><span class="text-blue-600 cursor-pointer">member</span></li>"#;
        let record = extract_all(&[item.to_string()]).remove(0).unwrap();

        assert_eq!(record.author_name, "member");
        assert_eq!(record.raw_score_text, "");
        assert_eq!(record.content_text, "\n");
    }

    #[test]
    fn author_defaults_to_placeholder() {
        let record = extract_all(&[markup::render(&Review {
            score: "3",
            author: None,
            date: "",
            title: "t",
            body: "b",
        })])
        .remove(0)
        .unwrap();

        assert_eq!(record.author_name, UNKNOWN_AUTHOR);
    }

    #[test]
    fn field_failure_names_the_field() {
        let item = r#"<li><section itemprop="reviewRating"></section><span itemprop="datePublished" data-detached>2024/1/1</span></li>"#;
        let err = extract_all(&[item.to_string()]).remove(0).unwrap_err();

        assert!(matches!(err, ItemError::Field { field: "date", .. }));
    }
}
