//! Selector fallback chains and page-side scripts for the export page.
//!
//! The portal's markup changes without notice, so every element is located
//! through a list of known selectors followed by a visible-text scan.

use serde_json::json;

/// Known ids/classes of the "from" date input, most specific first
pub const FROM_DATE_SELECTORS: &[&str] = &[
    "#srhFromDt",
    "#fromDate",
    "#startDate",
    "input[name='srhFromDt']",
    "input[id*='From']",
    "input[id*='from']",
    "input[name*='start']",
];

pub const TO_DATE_SELECTORS: &[&str] = &[
    "#srhToDt",
    "#toDate",
    "#endDate",
    "input[name='srhToDt']",
    "input[id*='To']:not([id*='Total'])",
    "input[id*='to']:not([id*='total'])",
    "input[name*='end']",
];

pub const EXPORT_BUTTON_SELECTORS: &[&str] = &[
    "#xlsDown",
    "#btnExcel",
    "button[onclick*='xls']",
    "a[onclick*='xls']",
    "button[onclick*='Excel']",
    "a[onclick*='Excel']",
    ".btn_excel",
];

pub const EXPORT_BUTTON_TEXTS: &[&str] = &["EXCEL 다운", "엑셀 다운", "EXCEL", "엑셀"];

/// Elements that may carry a category tab's label
const TAB_CANDIDATE_TAGS: &str = "a, button, li > span, [role='tab']";

/// What a dialog shown after the export click means for the month
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DialogKind {
    NoData,
    DailyLimit,
    Other,
}

impl DialogKind {
    pub fn classify(message: &str) -> Self {
        let m: String = message.split_whitespace().collect();
        const NO_DATA: [&str; 4] = ["자료가없", "검색된자료", "데이터가없", "조회결과가없"];
        const LIMIT: [&str; 4] = ["횟수", "일일", "초과", "제한"];

        if NO_DATA.iter().any(|k| m.contains(k)) {
            DialogKind::NoData
        } else if m.contains("다운로드") && LIMIT.iter().any(|k| m.contains(k)) {
            DialogKind::DailyLimit
        } else {
            DialogKind::Other
        }
    }
}

/// Replaces `alert`/`confirm` with recorders so dialogs never block the page.
/// Needs re-running after each navigation.
pub const DIALOG_HOOK_JS: &str = r#"
(() => {
    if (window.__rtHooked) return true;
    window.__rtHooked = true;
    window.__rtDialogs = window.__rtDialogs || [];
    window.alert = (m) => { window.__rtDialogs.push(String(m)); };
    window.confirm = (m) => { window.__rtDialogs.push(String(m)); return true; };
    return true;
})()
"#;

/// Drains recorded dialogs plus the text of any visible in-page modal layer.
/// A layer is reported once per showing: it is marked and its close control
/// clicked, and the mark is dropped once the layer is hidden again.
pub const TAKE_DIALOGS_JS: &str = r#"
(() => {
    const out = (window.__rtDialogs || []).splice(0);
    const layers = document.querySelectorAll("[role='dialog'], .modal, .layer_popup, .ui-dialog");
    for (const el of layers) {
        const style = window.getComputedStyle(el);
        const shown = style.display !== 'none' && style.visibility !== 'hidden' && el.offsetParent !== null;
        if (!shown) {
            delete el.dataset.rtSeen;
            continue;
        }
        if (el.dataset.rtSeen) continue;
        const text = (el.innerText || '').trim();
        if (!text) continue;
        out.push(text);
        el.dataset.rtSeen = '1';
        const close = el.querySelector(".btn_close, .close, [data-dismiss], .ui-dialog-titlebar-close, button, a.btn");
        if (close) close.click();
    }
    return JSON.stringify(out);
})()
"#;

/// Script that clicks the first visible element matched by `selectors`, then
/// falls back to scanning `text_scope` for an element whose text equals (then
/// contains) one of `texts`. Evaluates to a short description of what was
/// clicked, or `null`.
pub fn click_script(selectors: &[&str], texts: &[&str], text_scope: &str) -> String {
    format!(
        r#"
(() => {{
    const selectors = {selectors};
    const texts = {texts};
    const visible = (el) => el && el.offsetParent !== null;
    const hit = (el, how) => {{
        el.scrollIntoView({{block: 'center'}});
        el.click();
        return how + ':' + (el.innerText || el.value || '').trim().slice(0, 40);
    }};
    for (const sel of selectors) {{
        let el = null;
        try {{ el = document.querySelector(sel); }} catch (e) {{ continue; }}
        if (visible(el)) return hit(el, sel);
    }}
    const nodes = Array.from(document.querySelectorAll({scope}));
    const norm = (s) => (s || '').replace(/\s+/g, ' ').trim();
    for (const t of texts) {{
        const exact = nodes.find((el) => visible(el) && norm(el.innerText) === t);
        if (exact) return hit(exact, 'text');
    }}
    for (const t of texts) {{
        const partial = nodes.find((el) => visible(el) && norm(el.innerText).includes(t));
        if (partial) return hit(partial, 'partial');
    }}
    return null;
}})()
"#,
        selectors = json!(selectors),
        texts = json!(texts),
        scope = json!(text_scope),
    )
}

/// Click a category tab by its label
pub fn tab_click_script(label: &str) -> String {
    click_script(&[], &[label], TAB_CANDIDATE_TAGS)
}

pub fn export_click_script() -> String {
    click_script(EXPORT_BUTTON_SELECTORS, EXPORT_BUTTON_TEXTS, "a, button, input[type='button']")
}

/// Script that writes `value` into the first matching input and fires the
/// events the page's own handlers listen for. Evaluates to the selector used
/// or `null`.
pub fn set_input_script(selectors: &[&str], value: &str) -> String {
    format!(
        r#"
(() => {{
    const selectors = {selectors};
    for (const sel of selectors) {{
        let el = null;
        try {{ el = document.querySelector(sel); }} catch (e) {{ continue; }}
        if (!el) continue;
        el.removeAttribute('readonly');
        el.value = {value};
        el.dispatchEvent(new Event('input', {{bubbles: true}}));
        el.dispatchEvent(new Event('change', {{bubbles: true}}));
        return sel;
    }}
    return null;
}})()
"#,
        selectors = json!(selectors),
        value = json!(value),
    )
}

/// Script returning the text of the tab currently marked active
pub const ACTIVE_TAB_JS: &str = r#"
(() => {
    const el = document.querySelector("li.active a, li.on a, a.active, a.on, [role='tab'][aria-selected='true']");
    return el ? (el.innerText || '').trim() : null;
})()
"#;
