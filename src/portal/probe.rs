use crate::models::Category;
use crate::portal::selectors::EXPORT_BUTTON_TEXTS;
use scraper::{ElementRef, Html, Selector};
use serde::Serialize;

/// Clickable or fillable element found on the export page
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ElementInfo {
    pub tag: String,
    pub text: String,
    pub id: Option<String>,
    pub class: Option<String>,
    pub href: Option<String>,
    pub onclick: Option<String>,
}

/// Structure of the export page, used to spot selector drift
#[derive(Debug, Clone, Serialize, Default)]
pub struct PageReport {
    pub title: String,
    pub links: Vec<ElementInfo>,
    pub buttons: Vec<ElementInfo>,
    pub inputs: Vec<ElementInfo>,
    pub missing_tabs: Vec<String>,
    pub export_candidates: Vec<ElementInfo>,
}

impl PageReport {
    pub fn from_html(html: &str) -> Self {
        let document = Html::parse_document(html);

        let title = select(&document, "title")
            .next()
            .map(|t| collapse(&t.text().collect::<String>()))
            .unwrap_or_default();

        let links: Vec<ElementInfo> = select(&document, "a")
            .map(info)
            .filter(|e| !e.text.is_empty() || e.onclick.is_some())
            .collect();
        let buttons: Vec<ElementInfo> = select(&document, "button, input[type='button'], input[type='submit']")
            .map(info)
            .collect();
        let inputs: Vec<ElementInfo> = select(&document, "input[type='text'], input[type='date'], input:not([type])")
            .map(info)
            .collect();

        let missing_tabs = Category::ALL
            .iter()
            .filter(|c| !links.iter().chain(&buttons).any(|e| e.text.contains(c.label())))
            .filter(|c| !select(&document, "li, span").any(|el| collapse(&el.text().collect::<String>()) == c.label()))
            .map(|c| c.label().to_string())
            .collect();

        let export_candidates = links
            .iter()
            .chain(&buttons)
            .filter(|e| {
                EXPORT_BUTTON_TEXTS.iter().any(|t| e.text.contains(t))
                    || e.onclick.as_deref().is_some_and(|o| o.to_ascii_lowercase().contains("xls") || o.contains("Excel"))
            })
            .cloned()
            .collect();

        Self {
            title,
            links,
            buttons,
            inputs,
            missing_tabs,
            export_candidates,
        }
    }
}

fn select<'a>(document: &'a Html, css: &str) -> impl Iterator<Item = ElementRef<'a>> + 'a {
    // selectors here are constants; a parse failure yields no matches
    let selector = Selector::parse(css).ok();
    selector
        .into_iter()
        .flat_map(move |s| document.select(&s).collect::<Vec<_>>())
}

fn info(el: ElementRef<'_>) -> ElementInfo {
    let v = el.value();
    let text = match v.name() {
        "input" => v.attr("value").unwrap_or_default().to_string(),
        _ => collapse(&el.text().collect::<String>()),
    };
    ElementInfo {
        tag: v.name().to_string(),
        text,
        id: v.attr("id").map(str::to_string),
        class: v.attr("class").map(str::to_string),
        href: v.attr("href").map(str::to_string),
        onclick: v.attr("onclick").map(str::to_string),
    }
}

fn collapse(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r##"
        <html><head><title> 실거래가 공개시스템 </title></head><body>
        <ul class="tab">
            <li class="on"><a href="#" onclick="fnTab(1)">아파트</a></li>
            <li><a href="#">연립/다세대</a></li>
            <li><a href="#">단독/다가구</a></li>
            <li><a href="#">오피스텔</a></li>
            <li><span>토지</span></li>
            <li><a href="#">분양/입주권</a></li>
            <li><a href="#">상업/업무용</a></li>
        </ul>
        <input type="text" id="srhFromDt" value="2024-01-01">
        <input type="text" id="srhToDt">
        <button type="button" onclick="fnXlsDown()">EXCEL 다운</button>
        <button type="button">조회</button>
        </body></html>
    "##;

    #[test]
    fn reports_page_structure() {
        let report = PageReport::from_html(PAGE);
        assert_eq!(report.title, "실거래가 공개시스템");
        assert_eq!(report.links.len(), 6);
        assert_eq!(report.buttons.len(), 2);
        assert_eq!(report.inputs.len(), 2);
        assert_eq!(report.inputs[0].id.as_deref(), Some("srhFromDt"));
        assert_eq!(report.inputs[0].text, "2024-01-01");
        assert_eq!(report.missing_tabs, vec!["공장/창고 등".to_string()]);
        assert_eq!(report.export_candidates.len(), 1);
        assert_eq!(report.export_candidates[0].text, "EXCEL 다운");
    }
}
