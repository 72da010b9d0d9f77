//! Declarative task executor driven by the `task` section of the config
//!
//! ```yaml
//! task:
//!   dismiss: ["#onetrust-accept-btn-handler", ".cookie-accept"]
//!   echo_attributes: [website, category]
//!   selections:
//!     - { attribute: metal, options: "li[custom_field='metal_purity']" }
//!     - { attribute: stone_carat, options: "li[custom_field='stone_carat']", exact: true }
//!   actions:
//!     - { scroll: deep }
//!     - { click: [".add-to-cart", "#add-to-bag"], wait_ms: 1800, status_field: add_to_cart_status }
//!   extract:
//!     - { field: final_price, selectors: [".sticky-total-price .sticky-amount"], required: true }
//!   screenshot_tag: cart_page
//! ```
//!
//! Steps run in the order dismiss, echo, selections, actions, extract,
//! screenshot.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::TaskExecutor;
use crate::item::WorkItem;
use crate::record::OutputFields;
use crate::session::WorkerSession;
use crate::utils::constants::{SCROLL_BOTTOM_SCRIPT, SCROLL_MIDDLE_SCRIPT, SCROLL_TOP_SCRIPT};
use crate::utils::{ScrapeError, sleep_or_cancel};

/// Column the product screenshot path is written to
pub const SCREENSHOT_COLUMN: &str = "screenshot";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskSpec {
    /// Overlay dismissal selectors; the first one that clicks wins
    #[serde(default)]
    pub dismiss: Vec<String>,

    /// Input attributes copied verbatim to output columns
    #[serde(default)]
    pub echo_attributes: Vec<String>,

    #[serde(default)]
    pub selections: Vec<SelectionSpec>,

    /// Page interactions between selections and extraction
    #[serde(default)]
    pub actions: Vec<ActionSpec>,

    #[serde(default)]
    pub extract: Vec<ExtractSpec>,

    /// Tag for a product-page screenshot taken after extraction
    #[serde(default)]
    pub screenshot_tag: Option<String>,
}

/// Choose the option whose text matches an input attribute
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectionSpec {
    pub attribute: String,

    /// CSS selector matching every candidate option element
    pub options: String,

    /// Whole-text equality instead of case-insensitive contains
    #[serde(default)]
    pub exact: bool,

    /// Output column for the chosen text; defaults to `attribute`
    #[serde(default)]
    pub output: Option<String>,
}

impl SelectionSpec {
    pub fn output_column(&self) -> &str {
        self.output.as_deref().unwrap_or(&self.attribute)
    }
}

/// Where a scroll action moves the viewport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScrollTarget {
    Top,
    Middle,
    Bottom,
    /// Bottom, back to top, then middle; wakes lazily rendered panels
    Deep,
}

impl ScrollTarget {
    fn scripts(self) -> &'static [&'static str] {
        match self {
            ScrollTarget::Top => &[SCROLL_TOP_SCRIPT],
            ScrollTarget::Middle => &[SCROLL_MIDDLE_SCRIPT],
            ScrollTarget::Bottom => &[SCROLL_BOTTOM_SCRIPT],
            ScrollTarget::Deep => &[SCROLL_BOTTOM_SCRIPT, SCROLL_TOP_SCRIPT, SCROLL_MIDDLE_SCRIPT],
        }
    }
}

/// One interaction: scroll, then click, then wait
///
/// Every part is optional.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ActionSpec {
    #[serde(default)]
    pub scroll: Option<ScrollTarget>,

    /// Candidate selectors; the first one that clicks wins
    #[serde(default)]
    pub click: Vec<String>,

    /// Pause after the action, e.g. for a cart drawer to render
    #[serde(default)]
    pub wait_ms: u64,

    /// Fail the attempt when none of `click` matched
    #[serde(default)]
    pub required: bool,

    /// Column receiving `clicked` or `not_found`
    #[serde(default)]
    pub status_field: Option<String>,
}

/// Read a field from the first selector with non-empty text
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractSpec {
    pub field: String,
    pub selectors: Vec<String>,
    #[serde(default)]
    pub required: bool,
}

#[derive(Debug, Clone, Default)]
pub struct ConfiguredExecutor {
    spec: TaskSpec,
}

impl ConfiguredExecutor {
    pub fn new(spec: TaskSpec) -> Self {
        Self { spec }
    }

    async fn dismiss_overlays(&self, session: &mut WorkerSession) -> Result<(), ScrapeError> {
        if let Some(selector) = click_first_of(session, &self.spec.dismiss).await? {
            debug!(selector = %selector, "Dismissed overlay");
            session.jitter().await?;
        }
        Ok(())
    }

    async fn run_actions(
        &self,
        session: &mut WorkerSession,
        output: &mut OutputFields,
    ) -> Result<(), ScrapeError> {
        for action in &self.spec.actions {
            if let Some(target) = action.scroll {
                for script in target.scripts() {
                    let driver = session.driver().await?;
                    if let Err(e) = driver.evaluate(script).await {
                        debug!(scroll = ?target, "Scroll failed: {}", e);
                    }
                    session.jitter().await?;
                }
            }

            if !action.click.is_empty() {
                let clicked = click_first_of(session, &action.click).await?;
                if let Some(field) = &action.status_field {
                    let status = if clicked.is_some() { "clicked" } else { "not_found" };
                    output.insert(field.clone(), status.to_string());
                }
                match clicked {
                    Some(selector) => {
                        debug!(selector = %selector, "Clicked");
                        session.jitter().await?;
                    }
                    None if action.required => {
                        return Err(ScrapeError::Execution(format!(
                            "Nothing clickable among: {}",
                            action.click.join(", ")
                        )));
                    }
                    None => warn!("Nothing clickable among: {}", action.click.join(", ")),
                }
            }

            if action.wait_ms > 0 {
                let cancel = session.cancellation_token().clone();
                sleep_or_cancel(Duration::from_millis(action.wait_ms), &cancel).await?;
            }
        }
        Ok(())
    }

    /// Selection failures are logged and skipped; the attempt carries on
    async fn apply_selections(
        &self,
        session: &mut WorkerSession,
        item: &WorkItem,
        output: &mut OutputFields,
    ) -> Result<(), ScrapeError> {
        for selection in &self.spec.selections {
            let wanted = item.attribute(&selection.attribute).trim();
            if wanted.is_empty() {
                continue;
            }

            let driver = session.driver().await?;
            match driver
                .click_matching(&selection.options, wanted, selection.exact)
                .await
            {
                Ok(Some(chosen)) => {
                    debug!(attribute = %selection.attribute, chosen = %chosen, "Selected option");
                    output.insert(selection.output_column().to_string(), chosen);
                }
                Ok(None) => warn!(
                    attribute = %selection.attribute,
                    "No option matching '{}'", wanted
                ),
                Err(e) => warn!(
                    attribute = %selection.attribute,
                    "Selecting '{}' failed: {}", wanted, e
                ),
            }
            session.jitter().await?;
        }
        Ok(())
    }

    /// Returns the required fields that were not found
    async fn extract_fields(
        &self,
        session: &mut WorkerSession,
        output: &mut OutputFields,
    ) -> Result<Vec<String>, ScrapeError> {
        let mut missing = Vec::new();
        for extract in &self.spec.extract {
            let mut found = None;
            for selector in &extract.selectors {
                let driver = session.driver().await?;
                match driver.inner_text(selector).await {
                    Ok(Some(text)) => {
                        found = Some(text.replace('\u{a0}', " "));
                        break;
                    }
                    Ok(None) => {}
                    Err(e) => debug!(selector = %selector, "Text lookup failed: {}", e),
                }
            }

            match found {
                Some(text) => {
                    output.insert(extract.field.clone(), text);
                }
                None if extract.required => missing.push(extract.field.clone()),
                None => {}
            }
        }
        Ok(missing)
    }
}

#[async_trait]
impl TaskExecutor for ConfiguredExecutor {
    fn output_columns(&self) -> Vec<String> {
        let candidates = self
            .spec
            .echo_attributes
            .iter()
            .map(String::as_str)
            .chain(self.spec.selections.iter().map(SelectionSpec::output_column))
            .chain(
                self.spec
                    .actions
                    .iter()
                    .filter_map(|a| a.status_field.as_deref()),
            )
            .chain(self.spec.extract.iter().map(|e| e.field.as_str()))
            .chain(self.spec.screenshot_tag.as_ref().map(|_| SCREENSHOT_COLUMN));

        let mut columns: Vec<String> = Vec::new();
        for column in candidates {
            if !columns.iter().any(|c| c == column) {
                columns.push(column.to_string());
            }
        }
        columns
    }

    async fn execute(
        &self,
        session: &mut WorkerSession,
        item: &WorkItem,
        attempt: u32,
        output: &mut OutputFields,
    ) -> Result<(), ScrapeError> {
        self.dismiss_overlays(session).await?;

        for name in &self.spec.echo_attributes {
            output.insert(name.clone(), item.attribute(name).to_string());
        }

        self.apply_selections(session, item, output).await?;
        self.run_actions(session, output).await?;
        let missing = self.extract_fields(session, output).await?;

        if let Some(tag) = &self.spec.screenshot_tag
            && let Some(path) = session.screenshot(tag, item.index, attempt).await
        {
            output.insert(SCREENSHOT_COLUMN.to_string(), path.display().to_string());
        }

        if !missing.is_empty() {
            return Err(ScrapeError::Execution(format!(
                "Required field(s) not found: {}",
                missing.join(", ")
            )));
        }

        info!(fields = output.len(), "Extraction complete");
        Ok(())
    }
}

/// Click the first selector that matches; lookup errors count as no match
async fn click_first_of<'a>(
    session: &mut WorkerSession,
    selectors: &'a [String],
) -> Result<Option<&'a str>, ScrapeError> {
    for selector in selectors {
        let driver = session.driver().await?;
        match driver.click_first(selector).await {
            Ok(true) => return Ok(Some(selector.as_str())),
            Ok(false) => {}
            Err(e) => debug!(selector = %selector, "Click failed: {}", e),
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::{BrowserResult, DriverFactory, PageDriver, ProductSignal, Readiness};
    use crate::session::SessionSettings;
    use crate::ScrapeConfig;
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use std::path::Path;
    use std::sync::Arc;
    use tokio_util::sync::CancellationToken;

    /// Page with fixed texts per selector and option lists per container
    #[derive(Default)]
    struct PageState {
        texts: HashMap<String, String>,
        options: HashMap<String, Vec<String>>,
        clickable: Vec<String>,
        clicks: Vec<String>,
        /// Clicking the key selector makes `(selector, text)` readable
        reveals: HashMap<String, (String, String)>,
        scripts: Vec<String>,
    }

    struct FakePage(Arc<Mutex<PageState>>);

    #[async_trait]
    impl PageDriver for FakePage {
        async fn goto(&mut self, _url: &str) -> BrowserResult<()> {
            Ok(())
        }
        async fn stop_loading(&mut self) -> BrowserResult<()> {
            Ok(())
        }
        async fn readiness(&mut self) -> BrowserResult<Readiness> {
            Ok(Readiness {
                ready_state: "complete".into(),
                visible_text_len: 500,
            })
        }
        async fn has_visible(&mut self, _signal: &ProductSignal) -> BrowserResult<bool> {
            Ok(true)
        }
        async fn screenshot(&mut self, _path: &Path) -> BrowserResult<()> {
            Ok(())
        }
        async fn click_first(&mut self, css: &str) -> BrowserResult<bool> {
            let mut state = self.0.lock();
            let hit = state.clickable.iter().any(|c| c == css);
            if hit {
                state.clicks.push(css.to_string());
                if let Some((selector, text)) = state.reveals.get(css).cloned() {
                    state.texts.insert(selector, text);
                }
            }
            Ok(hit)
        }
        async fn inner_text(&mut self, css: &str) -> BrowserResult<Option<String>> {
            Ok(self.0.lock().texts.get(css).cloned())
        }
        async fn click_matching(
            &mut self,
            css: &str,
            text: &str,
            exact: bool,
        ) -> BrowserResult<Option<String>> {
            let mut state = self.0.lock();
            let chosen = state.options.get(css).and_then(|opts| {
                opts.iter()
                    .find(|o| {
                        if exact {
                            o.as_str() == text
                        } else {
                            o.to_lowercase().contains(&text.to_lowercase())
                        }
                    })
                    .cloned()
            });
            if let Some(c) = &chosen {
                state.clicks.push(c.clone());
            }
            Ok(chosen)
        }
        async fn evaluate(&mut self, script: &str) -> BrowserResult<serde_json::Value> {
            self.0.lock().scripts.push(script.to_string());
            Ok(serde_json::Value::Null)
        }
        async fn close(&mut self) -> BrowserResult<()> {
            Ok(())
        }
    }

    struct FakeFactory(Arc<Mutex<PageState>>);

    #[async_trait]
    impl DriverFactory for FakeFactory {
        async fn launch(&self, _worker_id: &str) -> BrowserResult<Box<dyn PageDriver>> {
            Ok(Box::new(FakePage(Arc::clone(&self.0))))
        }
    }

    fn spec() -> TaskSpec {
        serde_yaml::from_str(
            r##"
dismiss: ["#missing-banner", ".cookie-accept"]
echo_attributes: [website]
selections:
  - { attribute: metal, options: "li.metal" }
  - { attribute: carat, options: "li.carat", exact: true, output: chosen_carat }
  - { attribute: shape, options: "li.shape" }
extract:
  - { field: price, selectors: [".price-missing", ".price"], required: true }
  - { field: title, selectors: ["h1"] }
"##,
        )
        .unwrap()
    }

    async fn session(state: Arc<Mutex<PageState>>, dir: &Path) -> WorkerSession {
        let config = ScrapeConfig {
            screenshot_dir: dir.to_path_buf(),
            ..ScrapeConfig::default()
        };
        WorkerSession::create(
            "worker-1",
            Arc::new(FakeFactory(state)),
            Arc::new(SessionSettings::from_config(&config)),
            CancellationToken::new(),
        )
        .await
        .unwrap()
    }

    fn page() -> PageState {
        let mut state = PageState {
            clickable: vec![".cookie-accept".into()],
            ..PageState::default()
        };
        state.options.insert(
            "li.metal".into(),
            vec!["18K White Gold".into(), "Platinum".into()],
        );
        state
            .options
            .insert("li.carat".into(), vec!["1.00".into(), "1.50".into()]);
        state
    }

    fn item() -> WorkItem {
        WorkItem::new(0, "https://shop.example/ring")
            .with_attribute("website", "shop")
            .with_attribute("metal", "white gold")
            .with_attribute("carat", "1.50")
            .with_attribute("shape", "")
    }

    #[test]
    fn output_columns_are_ordered_and_unique() {
        let mut spec = spec();
        spec.echo_attributes.push("price".into());
        spec.screenshot_tag = Some("product".into());
        let executor = ConfiguredExecutor::new(spec);
        assert_eq!(
            executor.output_columns(),
            vec!["website", "price", "metal", "chosen_carat", "shape", "title", "screenshot"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn fills_selections_and_extractions() {
        let mut state = page();
        state.texts.insert(".price".into(), "$2,400\u{a0}AUD".into());
        let state = Arc::new(Mutex::new(state));
        let dir = tempfile::tempdir().unwrap();
        let mut session = session(Arc::clone(&state), dir.path()).await;

        let executor = ConfiguredExecutor::new(spec());
        let mut output = OutputFields::new();
        executor
            .execute(&mut session, &item(), 1, &mut output)
            .await
            .unwrap();

        assert_eq!(output["website"], "shop");
        assert_eq!(output["metal"], "18K White Gold");
        assert_eq!(output["chosen_carat"], "1.50");
        assert_eq!(output["price"], "$2,400 AUD");
        assert!(!output.contains_key("shape"));
        assert!(!output.contains_key("title"));
        assert_eq!(state.lock().clicks[0], ".cookie-accept");
    }

    #[tokio::test(start_paused = true)]
    async fn missing_required_field_keeps_partial_output() {
        let state = Arc::new(Mutex::new(page()));
        let dir = tempfile::tempdir().unwrap();
        let mut session = session(state, dir.path()).await;

        let executor = ConfiguredExecutor::new(spec());
        let mut output = OutputFields::new();
        let err = executor
            .execute(&mut session, &item(), 2, &mut output)
            .await
            .unwrap_err();

        assert!(matches!(err, ScrapeError::Execution(ref m) if m.contains("price")));
        assert_eq!(output["metal"], "18K White Gold");
    }

    fn with_cart_actions(mut spec: TaskSpec) -> TaskSpec {
        spec.actions = serde_yaml::from_str(
            r##"
- { scroll: deep }
- click: [".add-missing", ".add-to-cart"]
  wait_ms: 1800
  required: true
  status_field: add_to_cart_status
"##,
        )
        .unwrap();
        spec.extract[0].selectors = vec![".cart-total".into()];
        spec
    }

    #[test]
    fn action_status_fields_are_output_columns() {
        let executor = ConfiguredExecutor::new(with_cart_actions(spec()));
        assert_eq!(
            executor.output_columns(),
            vec!["website", "metal", "chosen_carat", "shape", "add_to_cart_status", "price", "title"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn actions_run_before_extraction() {
        let mut state = page();
        state.clickable.push(".add-to-cart".into());
        state.reveals.insert(
            ".add-to-cart".into(),
            (".cart-total".into(), "$3,100".into()),
        );
        let state = Arc::new(Mutex::new(state));
        let dir = tempfile::tempdir().unwrap();
        let mut session = session(Arc::clone(&state), dir.path()).await;

        let executor = ConfiguredExecutor::new(with_cart_actions(spec()));
        let mut output = OutputFields::new();
        let started = tokio::time::Instant::now();
        executor
            .execute(&mut session, &item(), 1, &mut output)
            .await
            .unwrap();

        assert!(started.elapsed() >= Duration::from_millis(1800));
        assert_eq!(output["add_to_cart_status"], "clicked");
        assert_eq!(output["price"], "$3,100");

        let state = state.lock();
        assert_eq!(
            state.scripts,
            vec![SCROLL_BOTTOM_SCRIPT, SCROLL_TOP_SCRIPT, SCROLL_MIDDLE_SCRIPT]
        );
        // Option clicks come first, the cart click last
        assert_eq!(state.clicks.last().map(String::as_str), Some(".add-to-cart"));
        assert!(state.clicks.iter().any(|c| c == "18K White Gold"));
    }

    #[tokio::test(start_paused = true)]
    async fn required_action_without_match_fails_the_attempt() {
        let state = Arc::new(Mutex::new(page()));
        let dir = tempfile::tempdir().unwrap();
        let mut session = session(state, dir.path()).await;

        let executor = ConfiguredExecutor::new(with_cart_actions(spec()));
        let mut output = OutputFields::new();
        let err = executor
            .execute(&mut session, &item(), 1, &mut output)
            .await
            .unwrap_err();

        assert!(matches!(err, ScrapeError::Execution(ref m) if m.contains(".add-to-cart")));
        assert_eq!(output["add_to_cart_status"], "not_found");
        assert_eq!(output["metal"], "18K White Gold");
        assert!(!output.contains_key("price"));
    }

    #[tokio::test(start_paused = true)]
    async fn screenshot_path_is_recorded() {
        let mut state = page();
        state.texts.insert(".price".into(), "$10".into());
        let state = Arc::new(Mutex::new(state));
        let dir = tempfile::tempdir().unwrap();
        let mut session = session(state, dir.path()).await;

        let mut spec = spec();
        spec.screenshot_tag = Some("product".into());
        let executor = ConfiguredExecutor::new(spec);
        let mut output = OutputFields::new();
        executor
            .execute(&mut session, &item(), 3, &mut output)
            .await
            .unwrap();

        assert!(output[SCREENSHOT_COLUMN].contains("product_worker-1_001_try03_"));
    }
}
