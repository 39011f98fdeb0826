use std::sync::Arc;
use std::thread::sleep;
use std::time::{Duration, Instant};

use headless_chrome::browser::tab::NoElementFound;
use headless_chrome::{Browser, Element, LaunchOptions, Tab};
use thiserror::Error;
use tracing::{debug, warn};

/// Interval between visibility checks while waiting for a clickable element.
const CLICKABLE_POLL: Duration = Duration::from_millis(250);

#[derive(Debug, Error)]
pub enum BrowserError {
    #[error("failed to launch browser: {0}")]
    Launch(String),
    #[error("navigation to {url} failed: {reason}")]
    Navigation { url: String, reason: String },
    #[error("timed out after {timeout:?} waiting for {locator}")]
    Timeout { locator: String, timeout: Duration },
    #[error("element {0} is not visible or not enabled")]
    NotInteractable(String),
    #[error("element is detached from the page")]
    Detached,
    #[error("browser protocol error: {0}")]
    Protocol(String),
}

/// Where to find an element. Text locators match an element of the given tag
/// whose rendered text contains the needle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Locator {
    Css(&'static str),
    Text {
        tag: &'static str,
        contains: &'static str,
    },
}

impl std::fmt::Display for Locator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Css(css) => write!(f, "css `{css}`"),
            Self::Text { tag, contains } => write!(f, "<{tag}> containing `{contains}`"),
        }
    }
}

/// One browser tab driven through a batch of hotels.
///
/// Sessions are owned by exactly one batch and released through [`close`],
/// or on drop if the batch unwinds.
///
/// [`close`]: BrowserSession::close
pub trait BrowserSession {
    type Element<'a>: PageElement
    where
        Self: 'a;

    fn navigate(&self, url: &str) -> Result<(), BrowserError>;

    /// Waits until the element exists and is visible and enabled.
    fn wait_clickable(
        &self,
        locator: &Locator,
        timeout: Duration,
    ) -> Result<Self::Element<'_>, BrowserError>;

    fn wait_present(
        &self,
        locator: &Locator,
        timeout: Duration,
    ) -> Result<Self::Element<'_>, BrowserError>;

    /// Immediate lookup without waiting.
    fn find(&self, locator: &Locator) -> Result<Option<Self::Element<'_>>, BrowserError>;

    fn close(self) -> Result<(), BrowserError>
    where
        Self: Sized;
}

pub trait PageElement: Sized {
    /// Descendants matching the locator; no match is an empty list.
    fn find_all(&self, locator: &Locator) -> Result<Vec<Self>, BrowserError>;
    /// Whether a direct child matches the locator.
    fn has_child(&self, locator: &Locator) -> Result<bool, BrowserError>;
    fn text(&self) -> Result<String, BrowserError>;
    fn click(&self) -> Result<(), BrowserError>;
    /// Click dispatched from page script, bypassing overlays that intercept pointer events.
    fn click_scripted(&self) -> Result<(), BrowserError>;
    fn is_interactable(&self) -> Result<bool, BrowserError>;
}

fn text_xpath(tag: &str, contains: &str, scoped: bool) -> String {
    let prefix = if scoped { ".//" } else { "//" };
    format!("{prefix}{tag}[contains(., '{contains}')]")
}

/// Retries `attempt` every `interval` until it yields a value or `timeout`
/// elapses. The attempt receives the time left; its errors end the wait.
pub(crate) fn poll_until<T>(
    timeout: Duration,
    interval: Duration,
    mut attempt: impl FnMut(Duration) -> Result<Option<T>, BrowserError>,
) -> Result<Option<T>, BrowserError> {
    let deadline = Instant::now() + timeout;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if let Some(found) = attempt(remaining)? {
            return Ok(Some(found));
        }
        if Instant::now() + interval > deadline {
            return Ok(None);
        }
        sleep(interval);
    }
}

fn protocol(e: anyhow::Error) -> BrowserError {
    BrowserError::Protocol(e.to_string())
}

pub struct ChromeSession {
    // Dropping the browser terminates the Chrome process.
    _browser: Browser,
    tab: Arc<Tab>,
}

impl ChromeSession {
    pub fn launch(headless: bool) -> Result<Self, BrowserError> {
        let options = LaunchOptions::default_builder()
            .headless(headless)
            .window_size(Some((1280, 2000)))
            .build()
            .map_err(|e| BrowserError::Launch(e.to_string()))?;

        let browser = Browser::new(options).map_err(|e| BrowserError::Launch(e.to_string()))?;
        let tab = browser
            .new_tab()
            .map_err(|e| BrowserError::Launch(e.to_string()))?;

        Ok(Self {
            _browser: browser,
            tab,
        })
    }

    fn wait_for(&self, locator: &Locator, timeout: Duration) -> Result<ChromeElement<'_>, BrowserError> {
        let found = match locator {
            Locator::Css(css) => self.tab.wait_for_element_with_custom_timeout(css, timeout),
            Locator::Text { tag, contains } => self
                .tab
                .wait_for_xpath_with_custom_timeout(&text_xpath(tag, contains, false), timeout),
        };

        found.map(ChromeElement).map_err(|_| BrowserError::Timeout {
            locator: locator.to_string(),
            timeout,
        })
    }
}

impl BrowserSession for ChromeSession {
    type Element<'a> = ChromeElement<'a>
    where
        Self: 'a;

    fn navigate(&self, url: &str) -> Result<(), BrowserError> {
        let navigation_failed = |e: anyhow::Error| BrowserError::Navigation {
            url: url.to_string(),
            reason: e.to_string(),
        };

        self.tab
            .navigate_to(url)
            .and_then(|tab| tab.wait_until_navigated())
            .map_err(navigation_failed)?;

        // The review trigger sits below the fold.
        self.tab
            .evaluate("window.scrollTo(0, 500);", false)
            .map_err(protocol)?;

        Ok(())
    }

    fn wait_clickable(
        &self,
        locator: &Locator,
        timeout: Duration,
    ) -> Result<ChromeElement<'_>, BrowserError> {
        // Hydrating pages attach controls before they are laid out or enabled.
        let ready = poll_until(timeout, CLICKABLE_POLL, |remaining| {
            let element = self.wait_for(locator, remaining)?;
            Ok(matches!(element.is_interactable(), Ok(true)).then_some(element))
        })?;

        ready.ok_or_else(|| BrowserError::NotInteractable(locator.to_string()))
    }

    fn wait_present(
        &self,
        locator: &Locator,
        timeout: Duration,
    ) -> Result<ChromeElement<'_>, BrowserError> {
        self.wait_for(locator, timeout)
    }

    fn find(&self, locator: &Locator) -> Result<Option<ChromeElement<'_>>, BrowserError> {
        let found = match locator {
            Locator::Css(css) => self.tab.find_element(css),
            Locator::Text { tag, contains } => {
                self.tab.find_element_by_xpath(&text_xpath(tag, contains, false))
            }
        };

        match found {
            Ok(element) => Ok(Some(ChromeElement(element))),
            Err(e) if e.downcast_ref::<NoElementFound>().is_some() => Ok(None),
            Err(e) => Err(protocol(e)),
        }
    }

    fn close(self) -> Result<(), BrowserError> {
        debug!("Closing browser session");
        if let Err(e) = self.tab.close(true) {
            warn!(error = %e, "Tab did not close cleanly");
        }
        Ok(())
    }
}

pub struct ChromeElement<'a>(Element<'a>);

impl<'a> PageElement for ChromeElement<'a> {
    fn find_all(&self, locator: &Locator) -> Result<Vec<Self>, BrowserError> {
        let found = match locator {
            Locator::Css(css) => self.0.find_elements(css),
            Locator::Text { tag, contains } => {
                let tab = self.0.parent;
                self.0
                    .find_elements_by_xpath(&text_xpath(tag, contains, true))
                    .map(|elements| {
                        elements
                            .into_iter()
                            .map(|e| Element {
                                remote_object_id: e.remote_object_id,
                                backend_node_id: e.backend_node_id,
                                node_id: e.node_id,
                                parent: tab,
                                attributes: e.attributes,
                                tag_name: e.tag_name,
                                value: e.value,
                            })
                            .collect::<Vec<Element<'a>>>()
                    })
            }
        };

        match found {
            Ok(elements) => Ok(elements.into_iter().map(ChromeElement).collect()),
            Err(e) if e.downcast_ref::<NoElementFound>().is_some() => Ok(Vec::new()),
            Err(e) => Err(protocol(e)),
        }
    }

    fn has_child(&self, locator: &Locator) -> Result<bool, BrowserError> {
        let (css, needle) = match locator {
            Locator::Css(css) => (*css, ""),
            Locator::Text { tag, contains } => (*tag, *contains),
        };
        let result = self
            .0
            .call_js_fn(
                "function(css, needle) { return Array.from(this.children) \
                 .some(c => c.matches(css) && c.textContent.includes(needle)); }",
                vec![serde_json::json!(css), serde_json::json!(needle)],
                false,
            )
            .map_err(protocol)?;

        Ok(result.value.and_then(|v| v.as_bool()).unwrap_or(false))
    }

    fn text(&self) -> Result<String, BrowserError> {
        self.0
            .get_inner_text()
            .map(|text| text.trim().to_string())
            .map_err(|_| BrowserError::Detached)
    }

    fn click(&self) -> Result<(), BrowserError> {
        self.0.click().map(|_| ()).map_err(protocol)
    }

    fn click_scripted(&self) -> Result<(), BrowserError> {
        self.0
            .call_js_fn("function() { this.click(); }", vec![], false)
            .map(|_| ())
            .map_err(protocol)
    }

    fn is_interactable(&self) -> Result<bool, BrowserError> {
        let result = self
            .0
            .call_js_fn(
                "function() { const r = this.getBoundingClientRect(); \
                 return !this.disabled && r.width > 0 && r.height > 0; }",
                vec![],
                false,
            )
            .map_err(protocol)?;

        Ok(result.value.and_then(|v| v.as_bool()).unwrap_or(false))
    }
}
