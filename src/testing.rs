//! Scripted browser for exercising the extractor without Chrome.
//!
//! Each URL maps to a sequence of HTML snapshots. Navigation shows the first
//! snapshot; clicking an element carrying `data-advance` moves the page to the
//! next one, which is how the review panel opening and "show more" pagination
//! are played back. Elements marked `data-detached` fail when their text is
//! read, mimicking a node removed from the live DOM.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use scraper::{ElementRef, Html, Selector};

use crate::crawler::fetcher::{BrowserError, BrowserSession, Locator, PageElement};

#[derive(Default)]
pub struct ScriptedBrowser {
    pages: HashMap<String, Vec<Html>>,
    unreachable: HashSet<String>,
    current: RefCell<Option<(String, usize)>>,
    visits: Arc<Mutex<Vec<String>>>,
    clicks: Arc<AtomicUsize>,
    closed: Arc<AtomicBool>,
}

impl ScriptedBrowser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the snapshots served for `url`, in click order.
    pub fn with_page(mut self, url: &str, snapshots: &[&str]) -> Self {
        let docs = snapshots.iter().map(|html| Html::parse_document(html)).collect();
        self.pages.insert(url.to_string(), docs);
        self
    }

    pub fn with_unreachable(mut self, url: &str) -> Self {
        self.unreachable.insert(url.to_string());
        self
    }

    /// Flag set once the session is closed; stays readable after the browser is consumed.
    pub fn closed_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.closed)
    }

    /// URLs navigated to, in order; shared with the browser.
    pub fn visit_log(&self) -> Arc<Mutex<Vec<String>>> {
        Arc::clone(&self.visits)
    }

    /// Number of clicks that moved a page to its next snapshot.
    pub fn click_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.clicks)
    }

    fn document(&self) -> Option<&Html> {
        let current = self.current.borrow();
        let (url, index) = current.as_ref()?;
        self.pages.get(url.as_str())?.get(*index)
    }

    fn advance(&self) {
        let mut current = self.current.borrow_mut();
        if let Some((url, index)) = current.as_mut() {
            let last = self.pages.get(url.as_str()).map_or(0, |docs| docs.len() - 1);
            *index = (*index + 1).min(last);
            self.clicks.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn first(&self, locator: &Locator) -> Result<Option<FixtureElement<'_>>, BrowserError> {
        let Some(doc) = self.document() else {
            return Ok(None);
        };

        Ok(matching(doc.root_element(), locator, true)?
            .into_iter()
            .next()
            .map(|node| FixtureElement {
                browser: self,
                node,
            }))
    }
}

fn parse(css: &str) -> Result<Selector, BrowserError> {
    Selector::parse(css).map_err(|e| BrowserError::Protocol(format!("invalid selector {css}: {e:?}")))
}

fn split(locator: &Locator) -> (&'static str, Option<&'static str>) {
    match locator {
        Locator::Css(css) => (*css, None),
        Locator::Text { tag, contains } => (*tag, Some(*contains)),
    }
}

fn has_text(element: &ElementRef<'_>, needle: Option<&str>) -> bool {
    needle.map_or(true, |needle| element.text().collect::<String>().contains(needle))
}

fn matching<'a>(
    scope: ElementRef<'a>,
    locator: &Locator,
    include_scope: bool,
) -> Result<Vec<ElementRef<'a>>, BrowserError> {
    let (css, needle) = split(locator);
    let selector = parse(css)?;

    let mut found: Vec<ElementRef<'a>> = Vec::new();
    if include_scope && selector.matches(&scope) {
        found.push(scope);
    }
    found.extend(scope.select(&selector));
    found.retain(|el| has_text(el, needle));
    Ok(found)
}

impl BrowserSession for ScriptedBrowser {
    type Element<'a> = FixtureElement<'a>
    where
        Self: 'a;

    fn navigate(&self, url: &str) -> Result<(), BrowserError> {
        if let Ok(mut visits) = self.visits.lock() {
            visits.push(url.to_string());
        }

        if self.unreachable.contains(url) || !self.pages.contains_key(url) {
            return Err(BrowserError::Navigation {
                url: url.to_string(),
                reason: "net::ERR_NAME_NOT_RESOLVED".to_string(),
            });
        }

        *self.current.borrow_mut() = Some((url.to_string(), 0));
        Ok(())
    }

    fn wait_clickable(
        &self,
        locator: &Locator,
        timeout: Duration,
    ) -> Result<FixtureElement<'_>, BrowserError> {
        match self.first(locator)? {
            Some(element) if element.is_interactable()? => Ok(element),
            _ => Err(BrowserError::Timeout {
                locator: locator.to_string(),
                timeout,
            }),
        }
    }

    fn wait_present(
        &self,
        locator: &Locator,
        timeout: Duration,
    ) -> Result<FixtureElement<'_>, BrowserError> {
        self.first(locator)?.ok_or_else(|| BrowserError::Timeout {
            locator: locator.to_string(),
            timeout,
        })
    }

    fn find(&self, locator: &Locator) -> Result<Option<FixtureElement<'_>>, BrowserError> {
        self.first(locator)
    }

    fn close(self) -> Result<(), BrowserError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

pub struct FixtureElement<'a> {
    browser: &'a ScriptedBrowser,
    node: ElementRef<'a>,
}

impl FixtureElement<'_> {
    fn has_attr(&self, name: &str) -> bool {
        self.node.value().attr(name).is_some()
    }
}

impl<'a> PageElement for FixtureElement<'a> {
    fn find_all(&self, locator: &Locator) -> Result<Vec<Self>, BrowserError> {
        Ok(matching(self.node, locator, false)?
            .into_iter()
            .map(|node| FixtureElement {
                browser: self.browser,
                node,
            })
            .collect())
    }

    fn has_child(&self, locator: &Locator) -> Result<bool, BrowserError> {
        let (css, needle) = split(locator);
        let selector = parse(css)?;

        Ok(self
            .node
            .children()
            .filter_map(ElementRef::wrap)
            .any(|child| selector.matches(&child) && has_text(&child, needle)))
    }

    fn text(&self) -> Result<String, BrowserError> {
        if self.has_attr("data-detached") {
            return Err(BrowserError::Detached);
        }
        Ok(self.node.text().collect::<String>().trim().to_string())
    }

    fn click(&self) -> Result<(), BrowserError> {
        if self.has_attr("data-advance") {
            self.browser.advance();
        }
        Ok(())
    }

    fn click_scripted(&self) -> Result<(), BrowserError> {
        self.click()
    }

    fn is_interactable(&self) -> Result<bool, BrowserError> {
        Ok(!self.has_attr("disabled") && !self.has_attr("hidden"))
    }
}

/// Markup helpers for review-page fixtures.
pub mod markup {
    pub struct Review<'a> {
        pub score: &'a str,
        pub author: Option<&'a str>,
        pub date: &'a str,
        pub title: &'a str,
        pub body: &'a str,
    }

    pub fn review(score: &str, date: &str, title: &str) -> String {
        render(&Review {
            score,
            author: Some("guest"),
            date,
            title,
            body: "body",
        })
    }

    pub fn render(review: &Review<'_>) -> String {
        let author = review
            .author
            .map(|name| format!(r#"<span class="text-gray-800">{name}</span>"#))
            .unwrap_or_default();
        format!(
            r#"<li><section itemprop="reviewRating"><span itemprop="ratingValue">{}</span></section>{author}<span itemprop="datePublished">{}</span><h2>{}</h2><p itemprop="reviewBody">{}</p></li>"#,
            review.score, review.date, review.title, review.body
        )
    }

    /// Hotel page before the review panel is opened.
    pub fn landing() -> String {
        r#"<html><body><span class="text-sm font-normal text-blue-700" data-advance>クチコミ</span></body></html>"#
            .to_string()
    }

    /// Hotel page whose only trigger is the "view all reviews" button.
    pub fn landing_with_button() -> String {
        r#"<html><body><button data-advance>クチコミをすべてみる</button></body></html>"#.to_string()
    }

    /// Open review panel; `more` adds an enabled "show more" button.
    pub fn panel(items: &[String], more: bool) -> String {
        let button = if more {
            r#"<button data-advance>続きをみる</button>"#
        } else {
            ""
        };
        format!(
            r#"<html><body><div class="bg-gray-100 px-10 py-16"><ul>{}</ul>{button}</div></body></html>"#,
            items.concat()
        )
    }
}
