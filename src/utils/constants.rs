//! Shared constants and injected page scripts

use crate::browser::ProductSignal;

/// Reports `document.readyState` and the visible body text length
pub const READINESS_SCRIPT: &str = r#"(() => ({
    readyState: document.readyState,
    visibleTextLen: (document.body && document.body.innerText) ? document.body.innerText.length : 0
}))()"#;

pub const STOP_LOADING_SCRIPT: &str = "window.stop()";

pub const SCROLL_TOP_SCRIPT: &str = "window.scrollTo(0, 0)";

pub const SCROLL_MIDDLE_SCRIPT: &str = "window.scrollTo(0, document.body.scrollHeight / 2)";

pub const SCROLL_BOTTOM_SCRIPT: &str = "window.scrollTo(0, document.body.scrollHeight)";

/// Heuristics for "this is a real product page, not an error or interstitial"
///
/// An add-to-cart / add-to-bag button, a configurator panel, or a dropdown caret.
pub fn default_product_signals() -> Vec<ProductSignal> {
    vec![
        ProductSignal::Xpath(
            "//button[contains(translate(text(),'ABCDEFGHIJKLMNOPQRSTUVWXYZ','abcdefghijklmnopqrstuvwxyz'),'add to cart') \
             or contains(translate(text(),'ABCDEFGHIJKLMNOPQRSTUVWXYZ','abcdefghijklmnopqrstuvwxyz'),'add to bag')]"
                .to_string(),
        ),
        ProductSignal::Css(".panel".to_string()),
        ProductSignal::Xpath("//span[contains(@class,'caret')]".to_string()),
    ]
}
