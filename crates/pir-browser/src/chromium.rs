//! Chromium implementation of the automation backend.

use crate::backend::{ActionContext, AutomationBackend, BackendFactory};
use crate::callback::{ActionReply, ActionResponse};
use crate::error::{BrowserError, Result};
use crate::fingerprint::FingerprintConfig;
use chromiumoxide::browser::{Browser, BrowserConfig as CdpBrowserConfig};
use chromiumoxide::element::Element;
use chromiumoxide::page::{Page, ScreenshotParams};
use futures::StreamExt;
use pir_broker::{Action, ExpectationItem, ExpectationKind, ExtractSelectors, PageElement, StepKind};
use pir_core::BrowserConfig;
use pir_model::ExtractedProfile;
use std::path::Path;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Launches one Chromium session per job.
pub struct ChromiumFactory {
    navigation_timeout: Duration,
    headless: bool,
}

impl ChromiumFactory {
    /// Factory using the browser section of the configuration.
    #[must_use]
    pub fn new(config: &BrowserConfig) -> Self {
        Self {
            navigation_timeout: Duration::from_secs(config.navigation_timeout_secs),
            headless: config.headless,
        }
    }
}

#[async_trait::async_trait]
impl BackendFactory for ChromiumFactory {
    async fn create(&self, show_ui: bool) -> Result<Box<dyn AutomationBackend>> {
        let headless = self.headless && !show_ui;
        let backend = ChromiumBackend::launch(
            FingerprintConfig::randomized(),
            headless,
            self.navigation_timeout,
        )
        .await?;
        Ok(Box::new(backend))
    }
}

/// A Chromium browser with a single page.
pub struct ChromiumBackend {
    browser: Browser,
    page: Page,
    handler: JoinHandle<()>,
    navigation_timeout: Duration,
    finished: bool,
}

impl ChromiumBackend {
    /// Launch a browser presenting `fingerprint`.
    pub async fn launch(
        fingerprint: FingerprintConfig,
        headless: bool,
        navigation_timeout: Duration,
    ) -> Result<Self> {
        let mut builder = CdpBrowserConfig::builder()
            .no_sandbox()
            .window_size(fingerprint.viewport_width, fingerprint.viewport_height)
            .args(fingerprint.launch_args());
        if !headless {
            builder = builder.with_head();
        }
        let config = builder.build().map_err(BrowserError::ChromiumError)?;

        let (browser, mut handler) = Browser::launch(config).await?;

        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    debug!(error = %e, "chromium handler event error");
                }
            }
        });

        let page = browser.new_page("about:blank").await?;
        debug!(user_agent = %fingerprint.user_agent, headless, "launched chromium session");

        Ok(Self {
            browser,
            page,
            handler,
            navigation_timeout,
            finished: false,
        })
    }

    fn ensure_open(&self) -> Result<()> {
        if self.finished {
            Err(BrowserError::SessionClosed)
        } else {
            Ok(())
        }
    }

    async fn click(&self, elements: &[PageElement]) -> Result<()> {
        for element in elements {
            if let Ok(found) = self.page.find_element(element.selector.as_str()).await {
                found.click().await?;
                return Ok(());
            }
        }
        Err(BrowserError::SelectorNotFound(
            elements
                .iter()
                .map(|e| e.selector.as_str())
                .collect::<Vec<_>>()
                .join(", "),
        ))
    }

    async fn fill(&self, elements: &[PageElement], context: &ActionContext) -> Result<()> {
        for element in elements {
            let value = context.value_for(element.element_type).ok_or_else(|| {
                BrowserError::Script(format!("no value to fill into {}", element.selector))
            })?;
            let input = self
                .page
                .find_element(element.selector.as_str())
                .await
                .map_err(|_| BrowserError::SelectorNotFound(element.selector.clone()))?;
            input.click().await?.type_str(value).await?;
        }
        Ok(())
    }

    async fn check_expectations(&self, action_id: &str, items: &[ExpectationItem]) -> Result<()> {
        for item in items {
            let expected = item.expect.as_deref().unwrap_or_default();
            let holds = match item.kind {
                ExpectationKind::Url => self
                    .page
                    .url()
                    .await?
                    .is_some_and(|url| url.contains(expected)),
                ExpectationKind::Element => match item.selector.as_deref() {
                    Some(selector) => self.page.find_element(selector).await.is_ok(),
                    None => false,
                },
                ExpectationKind::Text => match item.selector.as_deref() {
                    Some(selector) => match self.page.find_element(selector).await {
                        Ok(element) => element
                            .inner_text()
                            .await?
                            .is_some_and(|text| text.contains(expected)),
                        Err(_) => false,
                    },
                    None => self.page.content().await?.contains(expected),
                },
            };

            if !holds {
                return Err(BrowserError::ExpectationFailed {
                    action_id: action_id.to_string(),
                    reason: format!("{:?} expectation not met: {expected}", item.kind),
                });
            }
        }
        Ok(())
    }

    async fn extract(&self, selector: &str, fields: &ExtractSelectors) -> Result<Vec<ExtractedProfile>> {
        let cards = self.page.find_elements(selector).await.unwrap_or_default();
        let mut profiles = Vec::with_capacity(cards.len());

        for card in cards {
            let profile_url = match fields.profile_url.as_deref() {
                Some(sel) => match card.find_element(sel).await {
                    Ok(link) => link.attribute("href").await?,
                    Err(_) => None,
                },
                None => None,
            };

            profiles.push(ExtractedProfile {
                name: first_text(&card, fields.name.as_deref()).await?,
                alternative_names: all_texts(&card, fields.alternative_names.as_deref()).await?,
                age: first_text(&card, fields.age.as_deref()).await?,
                addresses: all_texts(&card, fields.addresses.as_deref()).await?,
                phone_numbers: all_texts(&card, fields.phone_numbers.as_deref()).await?,
                relatives: all_texts(&card, fields.relatives.as_deref()).await?,
                report_id: first_text(&card, fields.report_id.as_deref()).await?,
                profile_url,
                ..ExtractedProfile::default()
            });
        }

        Ok(profiles)
    }

    async fn captcha_info(&self, selector: &str) -> Result<ActionResponse> {
        let widget = self
            .page
            .find_element(selector)
            .await
            .map_err(|_| BrowserError::SelectorNotFound(selector.to_string()))?;
        let site_key = widget
            .attribute("data-sitekey")
            .await?
            .ok_or_else(|| BrowserError::Script(format!("{selector} has no data-sitekey")))?;
        let url = self.page.url().await?.unwrap_or_default();

        Ok(ActionResponse::CaptchaInfo { site_key, url })
    }

    async fn inject_captcha_token(&self, selector: &str, token: &str) -> Result<()> {
        let to_js = |value: &str| {
            serde_json::to_string(value).map_err(|e| BrowserError::Script(e.to_string()))
        };
        let script = format!(
            "(() => {{ \
                const widget = document.querySelector({selector}); \
                if (!widget) return false; \
                const field = widget.querySelector('textarea') \
                    || document.getElementById('g-recaptcha-response'); \
                if (!field) return false; \
                field.value = {token}; \
                return true; \
            }})()",
            selector = to_js(selector)?,
            token = to_js(token)?,
        );

        let injected: bool = self
            .page
            .evaluate(script)
            .await?
            .into_value()
            .map_err(|e| BrowserError::Script(e.to_string()))?;
        if injected {
            Ok(())
        } else {
            Err(BrowserError::SelectorNotFound(selector.to_string()))
        }
    }
}

async fn first_text(card: &Element, selector: Option<&str>) -> Result<Option<String>> {
    let Some(selector) = selector else {
        return Ok(None);
    };
    match card.find_element(selector).await {
        Ok(element) => Ok(element.inner_text().await?.map(|t| t.trim().to_string())),
        Err(_) => Ok(None),
    }
}

async fn all_texts(card: &Element, selector: Option<&str>) -> Result<Vec<String>> {
    let Some(selector) = selector else {
        return Ok(Vec::new());
    };
    let mut texts = Vec::new();
    for element in card.find_elements(selector).await.unwrap_or_default() {
        if let Some(text) = element.inner_text().await? {
            let text = text.trim();
            if !text.is_empty() {
                texts.push(text.to_string());
            }
        }
    }
    Ok(texts)
}

#[async_trait::async_trait]
impl AutomationBackend for ChromiumBackend {
    async fn load(&mut self, url: &str) -> Result<()> {
        self.ensure_open()?;
        url::Url::parse(url)
            .map_err(|e| BrowserError::NavigationError(format!("invalid URL {url}: {e}")))?;

        tokio::time::timeout(self.navigation_timeout, async {
            self.page.goto(url).await?.wait_for_navigation().await?;
            Ok::<_, BrowserError>(())
        })
        .await
        .map_err(|_| BrowserError::Timeout(format!("loading {url}")))?
    }

    async fn execute(
        &mut self,
        action: &Action,
        step_kind: StepKind,
        context: &ActionContext,
        reply: ActionReply,
    ) -> Result<()> {
        self.ensure_open()?;
        debug!(action_id = %action.id(), action_type = action.action_type(), %step_kind, "executing action");

        let outcome = match action {
            Action::Navigate { url, .. } => self.load(url).await.map(|()| None),
            Action::Click { elements, .. } => self.click(elements).await.map(|()| None),
            Action::Fill { elements, .. } => self.fill(elements, context).await.map(|()| None),
            Action::Expectation { id, expectations } => {
                self.check_expectations(id, expectations).await.map(|()| None)
            }
            Action::Extract { selector, profile, .. } => {
                match self.extract(selector, profile).await {
                    Ok(profiles) => {
                        let meta = serde_json::json!({
                            "url": self.page.url().await.ok().flatten(),
                            "count": profiles.len(),
                        });
                        reply.extracted_profiles(profiles, meta);
                        return Ok(());
                    }
                    Err(e) => Err(e),
                }
            }
            Action::GetCaptchaInfo { selector, .. } => self.captcha_info(selector).await.map(Some),
            Action::SolveCaptcha { selector, .. } => match context.captcha_token.as_deref() {
                Some(token) => self.inject_captcha_token(selector, token).await.map(|()| None),
                None => Err(BrowserError::Script("no captcha token to inject".to_string())),
            },
            Action::GetEmail { .. } | Action::EmailConfirmation { .. } => {
                Err(BrowserError::Unsupported {
                    action_type: action.action_type().to_string(),
                })
            }
        };

        match outcome {
            Ok(response) => reply.success(response),
            Err(e) => reply.complete_with(e),
        };
        Ok(())
    }

    async fn take_snapshot(&mut self, path: &Path) -> Result<()> {
        self.ensure_open()?;
        self.page
            .save_screenshot(ScreenshotParams::builder().full_page(true).build(), path)
            .await
            .map_err(|e| BrowserError::Snapshot(e.to_string()))?;
        Ok(())
    }

    async fn save_html(&mut self, path: &Path) -> Result<()> {
        self.ensure_open()?;
        let html = self.page.content().await?;
        tokio::fs::write(path, html).await?;
        Ok(())
    }

    async fn finish(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;

        if let Err(e) = self.browser.close().await {
            warn!(error = %e, "failed to close chromium");
        }
        if let Err(e) = self.browser.wait().await {
            debug!(error = %e, "chromium did not exit cleanly");
        }
        self.handler.abort();
    }
}
