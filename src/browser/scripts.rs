//! JavaScript snippets evaluated in the page
//!
//! Selector and text arguments are embedded as JSON string literals so
//! quotes inside selectors cannot break out of the script.

use crate::browser::ProductSignal;

fn js_string(value: &str) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "\"\"".to_string())
}

const VISIBLE_FN: &str =
    "const visible = (el) => !!(el.offsetWidth || el.offsetHeight || el.getClientRects().length);";

pub(crate) fn visible_signal(signal: &ProductSignal) -> String {
    let collect = match signal {
        ProductSignal::Css(css) => format!(
            "const nodes = Array.from(document.querySelectorAll({}));",
            js_string(css)
        ),
        ProductSignal::Xpath(xpath) => format!(
            "const snap = document.evaluate({}, document, null, XPathResult.ORDERED_NODE_SNAPSHOT_TYPE, null); \
             const nodes = []; for (let i = 0; i < snap.snapshotLength; i++) nodes.push(snap.snapshotItem(i));",
            js_string(xpath)
        ),
    };
    format!("(() => {{ {VISIBLE_FN} {collect} return nodes.some(visible); }})()")
}

pub(crate) fn click_first(css: &str) -> String {
    format!(
        "(() => {{ const el = document.querySelector({}); if (!el) return false; \
         el.scrollIntoView({{block: 'center'}}); el.click(); return true; }})()",
        js_string(css)
    )
}

pub(crate) fn inner_text(css: &str) -> String {
    format!(
        "(() => {{ const el = document.querySelector({}); \
         if (!el) return null; const t = (el.innerText || el.textContent || '').trim(); \
         return t.length ? t : null; }})()",
        js_string(css)
    )
}

pub(crate) fn click_matching(css: &str, text: &str, exact: bool) -> String {
    format!(
        "(() => {{ const want = {want}; const exact = {exact}; \
         const norm = (s) => (s || '').replace(/\\s+/g, ' ').trim(); \
         for (const el of document.querySelectorAll({css})) {{ \
           const t = norm(el.innerText || el.textContent); \
           const hit = exact ? t === norm(want) : t.toLowerCase().includes(norm(want).toLowerCase()); \
           if (hit) {{ el.scrollIntoView({{block: 'center'}}); el.click(); return t; }} \
         }} return null; }})()",
        want = js_string(text),
        exact = exact,
        css = js_string(css),
    )
}
