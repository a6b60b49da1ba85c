//! Detail extractor — per-entity numeric fields from the secondary view.
//!
//! For each provisional record: click the entity in the listing (or a
//! name-matched free-text element found via a full-DOM scan), locate and
//! click the "details" control, wait for the resulting view (a new browsing
//! view or an in-place DOM update — both happen), parse its markup, then
//! close the view and restore focus to the listing. The close/restore step
//! runs on every exit path, including errors: a stray open view corrupts the
//! session for every subsequent entity.
//!
//! Parsing strategies, tried in order against the harvested markup:
//!
//! 1. Table semantics: each numeric field lives in its own small table,
//!    identified by header-cell keywords, read at a fixed row/column offset.
//! 2. Regex over flattened text: `<label>[:：]<digits>` across label synonyms.
//! 3. Free-element scan: any leaf element carrying both a field keyword and
//!    a digit run.

use crate::config::ScrapeConfig;
use crate::driver::{DriverError, PageDriver, ViewHandle};
use crate::error::ScrapeError;
use crate::listing::cell_texts;
use crate::record::{clean_text, parse_area, parse_count, DetailFields, EntityRecord};
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use std::sync::OnceLock;
use std::time::Instant;

/// CSS candidates for the detail control, tried before the scripted text
/// scan (CSS alone cannot match by label text).
const DETAIL_CONTROL_SELECTORS: [&str; 2] = [
    "input[value*=\"學校概況\"]",
    "button[title*=\"學校概況\"]",
];

/// Close-button variants for popups the site leaves behind.
const POPUP_CLOSE_SELECTORS: [&str; 4] = [
    "button.close",
    ".modal .close",
    "[aria-label*=\"關閉\"]",
    "[aria-label*=\"close\"]",
];

/// Label synonyms per field, most specific first.
const CLASS_LABELS: [&str; 2] = ["班級數", "班級"];
const STUDENT_LABELS: [&str; 2] = ["學生數", "學生"];
const TEACHER_LABELS: [&str; 2] = ["教師數", "教師"];
const LAND_LABELS: [&str; 2] = ["校地面積", "校地"];
const BUILDING_LABELS: [&str; 2] = ["校舍面積", "校舍"];

/// Parse all five numeric fields out of a detail view's markup.
///
/// Strategies are pure over the markup and independently testable; the
/// regex and scan fallbacks only fill fields the table pass left empty.
pub fn parse_detail_fields(html: &str) -> DetailFields {
    let mut fields = table_semantics(html);
    if fields.is_empty() {
        regex_over_text(html, &mut fields);
    }
    if fields.is_empty() {
        element_scan(html, &mut fields);
    }
    fields
}

/// Strategy 1: fixed row/column offsets inside keyword-identified tables.
///
/// Known layout: student and teacher counts sit in row 3 column 1 of their
/// tables, the class count in row 2 column 1, and the two areas in the row
/// following a header that names the land area together with its unit,
/// columns 1 and 2.
fn table_semantics(html: &str) -> DetailFields {
    let mut fields = DetailFields::default();
    let document = Html::parse_document(html);
    let table_sel = Selector::parse("table").unwrap();
    let row_sel = Selector::parse("tr").unwrap();

    for table in document.select(&table_sel) {
        let rows: Vec<ElementRef> = table.select(&row_sel).collect();
        if rows.len() < 2 {
            continue;
        }
        let first_row = cell_texts(&rows[0]);
        let first_row_text = first_row.join(" ");

        // 學生數（人）: total in row 3, column 1
        if first_row_text.contains("學生")
            && first_row_text.contains("數")
            && first_row_text.contains("人")
        {
            if let Some(value) = rows.get(2).and_then(|r| cell_texts(r).first().cloned()) {
                fields.student_count = fields.student_count.or_else(|| parse_count(&value));
            }
        }

        // 班級數（班）: first header cell, value in row 2, column 1
        if let Some(first_cell) = first_row.first() {
            if first_cell.contains("班級")
                && (first_cell.contains("數") || first_cell.contains("班"))
            {
                if let Some(value) = rows.get(1).and_then(|r| cell_texts(r).first().cloned()) {
                    fields.class_count = fields.class_count.or_else(|| parse_count(&value));
                }
            }
        }

        // 教師數（人）: total in row 3, column 1
        if first_row_text.contains("教師")
            && first_row_text.contains("數")
            && first_row_text.contains("人")
        {
            if let Some(value) = rows.get(2).and_then(|r| cell_texts(r).first().cloned()) {
                fields.teacher_count = fields.teacher_count.or_else(|| parse_count(&value));
            }
        }

        // 校地/校舍面積: the row after the one naming 校地面積 + 平方公尺
        if first_row_text.contains("校地") {
            for (i, row) in rows.iter().enumerate() {
                let row_text = cell_texts(row).join(" ");
                if row_text.contains("校地面積") && row_text.contains("平方公尺") {
                    if let Some(data) = rows.get(i + 1) {
                        let cells = cell_texts(data);
                        if let Some(value) = cells.first() {
                            fields.land_area = fields.land_area.or_else(|| parse_area(value));
                        }
                        if let Some(value) = cells.get(1) {
                            fields.building_area =
                                fields.building_area.or_else(|| parse_area(value));
                        }
                    }
                    break;
                }
            }
        }
    }
    fields
}

fn label_regexes(labels: &[&str]) -> Vec<Regex> {
    labels
        .iter()
        .map(|label| {
            Regex::new(&format!(r"{}[:：]\s*(\d+(?:,\d+)*)", regex::escape(label)))
                .expect("field label pattern")
        })
        .collect()
}

/// Strategy 2: label-colon-digits over the view's flattened text.
fn regex_over_text(html: &str, fields: &mut DetailFields) {
    let document = Html::parse_document(html);
    let text: String = document.root_element().text().collect::<Vec<_>>().join(" ");

    fn first_match(text: &str, labels: &[&str]) -> Option<String> {
        for re in label_regexes(labels) {
            if let Some(caps) = re.captures(text) {
                return Some(caps[1].to_string());
            }
        }
        None
    }

    fields.class_count = fields
        .class_count
        .or_else(|| first_match(&text, &CLASS_LABELS).and_then(|v| parse_count(&v)));
    fields.student_count = fields
        .student_count
        .or_else(|| first_match(&text, &STUDENT_LABELS).and_then(|v| parse_count(&v)));
    fields.teacher_count = fields
        .teacher_count
        .or_else(|| first_match(&text, &TEACHER_LABELS).and_then(|v| parse_count(&v)));
    fields.land_area = fields
        .land_area
        .or_else(|| first_match(&text, &LAND_LABELS).and_then(|v| parse_area(&v)));
    fields.building_area = fields
        .building_area
        .or_else(|| first_match(&text, &BUILDING_LABELS).and_then(|v| parse_area(&v)));
}

fn digit_run() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(\d+(?:,\d+)*)").expect("digit run pattern"))
}

/// Strategy 3: scan leaf text-bearing elements for a keyword plus digits.
fn element_scan(html: &str, fields: &mut DetailFields) {
    let document = Html::parse_document(html);
    let leaf_sel = Selector::parse("div, span, p, li, td").unwrap();

    for element in document.select(&leaf_sel) {
        let text = clean_text(&element.text().collect::<String>());
        if text.is_empty() {
            continue;
        }
        let number = || digit_run().captures(&text).map(|c| c[1].to_string());

        if fields.class_count.is_none() && text.contains("班級") && text.contains("數") {
            fields.class_count = number().and_then(|v| parse_count(&v));
        }
        if fields.student_count.is_none() && text.contains("學生") && text.contains("數") {
            fields.student_count = number().and_then(|v| parse_count(&v));
        }
        if fields.teacher_count.is_none() && text.contains("教師") && text.contains("數") {
            fields.teacher_count = number().and_then(|v| parse_count(&v));
        }
        if fields.land_area.is_none() && text.contains("校地") && text.contains("面積") {
            fields.land_area = number().and_then(|v| parse_area(&v));
        }
        if fields.building_area.is_none() && text.contains("校舍") && text.contains("面積") {
            fields.building_area = number().and_then(|v| parse_area(&v));
        }
    }
}

/// Drives the per-entity secondary interaction against the live session.
pub struct DetailExtractor<'a, D: PageDriver> {
    driver: &'a mut D,
    cfg: &'a ScrapeConfig,
}

impl<'a, D: PageDriver> DetailExtractor<'a, D> {
    pub fn new(driver: &'a mut D, cfg: &'a ScrapeConfig) -> Self {
        Self { driver, cfg }
    }

    /// Open the entity's detail view, harvest numeric fields into the
    /// record, and restore the listing.
    ///
    /// The restore runs whether or not harvesting succeeded; the error (if
    /// any) is returned only after the session is back on the listing.
    pub async fn enrich(&mut self, record: &mut EntityRecord) -> Result<(), ScrapeError> {
        let listing_url = self.driver.current_url().await.unwrap_or_default();

        let outcome = self.open_and_harvest(&record.name).await;
        self.restore_listing(&listing_url).await;

        let fields = outcome?;
        if fields.is_empty() {
            tracing::warn!(entity = %record.name, "detail view yielded no numeric fields");
        } else {
            tracing::info!(entity = %record.name, recovered = ?fields.recovered(), "detail fields extracted");
        }
        record.absorb(&fields);
        Ok(())
    }

    async fn open_and_harvest(&mut self, name: &str) -> Result<DetailFields, ScrapeError> {
        let t = self.cfg.timeouts;

        self.click_entity(name).await?;
        self.driver.settle(t.settle()).await;

        self.click_detail_control(name).await?;

        let view = self.await_detail_view(name).await?;
        self.driver.settle(t.settle()).await;

        let html = match view {
            Some(handle) => self.driver.view_html(handle).await,
            None => self.driver.page_html().await,
        }
        .map_err(|e| match e {
            DriverError::TimedOut(_) => ScrapeError::ViewTimeout(name.to_string()),
            other => ScrapeError::Pipeline(other.into()),
        })?;

        Ok(parse_detail_fields(&html))
    }

    /// Click the entity's listing entry: a full-DOM text scan for the whole
    /// name first, then a keyword-matched scan for names the markup splits
    /// across nested elements.
    async fn click_entity(&mut self, name: &str) -> Result<(), ScrapeError> {
        if self.click_entity_by_name(name).await? {
            return Ok(());
        }
        tracing::debug!(entity = %name, "full-name click missed, trying keyword scan");
        if self.click_entity_by_keyword(name).await? {
            return Ok(());
        }
        Err(ScrapeError::DetailUnavailable(name.to_string()))
    }

    async fn click_entity_by_name(&mut self, name: &str) -> Result<bool, ScrapeError> {
        let js = format!(
            r#"(() => {{
                const root = document.getElementById('search') || document.body;
                const walker = document.createTreeWalker(root, NodeFilter.SHOW_ELEMENT);
                let node;
                while ((node = walker.nextNode())) {{
                    const text = node.textContent || '';
                    if (node.children.length === 0 && text.includes('{}')) {{
                        try {{ node.click(); }} catch (e) {{
                            node.dispatchEvent(new MouseEvent('click', {{ bubbles: true, cancelable: true, view: window }}));
                        }}
                        return true;
                    }}
                }}
                return false;
            }})()"#,
            js_escape(name)
        );
        Ok(self
            .driver
            .run_script(&js)
            .await
            .map_err(|e| ScrapeError::Pipeline(e.into()))?
            .as_bool()
            .unwrap_or(false))
    }

    /// Keyword fallback for split-rendered names: a leaf carrying a name
    /// keyword is clickable when its own text is a fragment of the name, or
    /// when its parent's text carries the full name.
    async fn click_entity_by_keyword(&mut self, name: &str) -> Result<bool, ScrapeError> {
        let keywords = self
            .cfg
            .name_keywords
            .iter()
            .map(|k| format!("'{}'", js_escape(k)))
            .collect::<Vec<_>>()
            .join(", ");
        let js = format!(
            r#"(() => {{
                const root = document.getElementById('search') || document.body;
                const walker = document.createTreeWalker(root, NodeFilter.SHOW_ELEMENT);
                const keywords = [{keywords}];
                const name = '{name}';
                let node;
                while ((node = walker.nextNode())) {{
                    if (node.children.length !== 0) continue;
                    const text = (node.textContent || '').trim();
                    if (!text || !keywords.some(k => text.includes(k))) continue;
                    let scope = text;
                    if (!scope.includes(name) && node.parentElement) {{
                        scope = (node.parentElement.textContent || '').trim();
                    }}
                    if (!scope.includes(name) && !name.includes(text)) continue;
                    try {{ node.click(); }} catch (e) {{
                        node.dispatchEvent(new MouseEvent('click', {{ bubbles: true, cancelable: true, view: window }}));
                    }}
                    return true;
                }}
                return false;
            }})()"#,
            keywords = keywords,
            name = js_escape(name)
        );
        Ok(self
            .driver
            .run_script(&js)
            .await
            .map_err(|e| ScrapeError::Pipeline(e.into()))?
            .as_bool()
            .unwrap_or(false))
    }

    /// Locate and click the "details" control by several label/selector
    /// variants, falling back to a scripted text-matched click.
    async fn click_detail_control(&mut self, name: &str) -> Result<(), ScrapeError> {
        let t = self.cfg.timeouts;
        if self
            .driver
            .click_first(&DETAIL_CONTROL_SELECTORS, t.control())
            .await
            .is_ok()
        {
            return Ok(());
        }

        let js = format!(
            r#"(() => {{
                const controls = document.querySelectorAll('button, a, input[type="button"], input[type="submit"]');
                for (const btn of controls) {{
                    const label = btn.textContent || btn.value || btn.title || '';
                    if (label.includes('{}')) {{ btn.click(); return true; }}
                }}
                return false;
            }})()"#,
            js_escape(&self.cfg.detail_control_label)
        );
        let clicked = self
            .driver
            .run_script(&js)
            .await
            .map_err(|e| ScrapeError::Pipeline(e.into()))?
            .as_bool()
            .unwrap_or(false);
        if clicked {
            Ok(())
        } else {
            Err(ScrapeError::DetailUnavailable(name.to_string()))
        }
    }

    /// Wait for a secondary view to appear. `None` means the site updated
    /// the listing view in place instead of opening a new one.
    async fn await_detail_view(&mut self, name: &str) -> Result<Option<ViewHandle>, ScrapeError> {
        let t = self.cfg.timeouts;
        let deadline = Instant::now() + t.view_open();
        loop {
            let views = self
                .driver
                .views()
                .await
                .map_err(|e| ScrapeError::Pipeline(e.into()))?;
            if let Some(secondary) = views.iter().find(|v| !v.is_main) {
                tracing::debug!(entity = %name, "secondary view opened");
                return Ok(Some(*secondary));
            }
            if Instant::now() >= deadline {
                tracing::debug!(entity = %name, "no secondary view, assuming in-place update");
                return Ok(None);
            }
            self.driver.settle(std::time::Duration::from_millis(500)).await;
        }
    }

    /// Unconditionally close stray views and put the session back on the
    /// listing. Errors here are logged, never propagated: cleanup must not
    /// mask the harvest outcome.
    async fn restore_listing(&mut self, listing_url: &str) {
        let t = self.cfg.timeouts;

        match self.driver.views().await {
            Ok(views) => {
                for view in views.into_iter().filter(|v| !v.is_main) {
                    if let Err(e) = self.driver.close_view(view).await {
                        tracing::debug!(%e, "failed to close secondary view");
                    }
                }
            }
            Err(e) => tracing::debug!(%e, "could not enumerate views during cleanup"),
        }

        if let Err(e) = self.driver.focus_main().await {
            tracing::debug!(%e, "could not refocus main view");
        }

        // In-place updates may have navigated the listing view away
        if !listing_url.is_empty() {
            match self.driver.current_url().await {
                Ok(url) if url != listing_url => {
                    if let Err(e) = self.driver.navigate(listing_url, t.page_load()).await {
                        tracing::warn!(%e, "failed to navigate back to listing");
                    }
                    self.driver.settle(t.settle()).await;
                }
                _ => {}
            }
        }

        // Sweep any popup the site left behind on the listing view
        let _ = self
            .driver
            .click_first(&POPUP_CLOSE_SELECTORS, t.control())
            .await;
    }
}

/// Minimal JS string escape for text interpolated into scan scripts.
fn js_escape(s: &str) -> String {
    s.replace('\\', "\\\\").replace('\'', "\\'")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_semantics_student_count_row3_col1() {
        let html = r#"
            <table>
                <tr><th>學生數（人）</th><th>男</th><th>女</th></tr>
                <tr><td>總計</td><td></td><td></td></tr>
                <tr><td>312</td><td>160</td><td>152</td></tr>
            </table>"#;
        let fields = parse_detail_fields(html);
        assert_eq!(fields.student_count, Some(312));
    }

    #[test]
    fn table_semantics_class_count_row2_col1() {
        let html = r#"
            <table>
                <tr><th>班級數（班）</th></tr>
                <tr><td>18</td></tr>
            </table>"#;
        let fields = parse_detail_fields(html);
        assert_eq!(fields.class_count, Some(18));
    }

    #[test]
    fn table_semantics_areas_follow_header_row() {
        let html = r#"
            <table>
                <tr><th>校地及學校設施</th></tr>
                <tr><td>校地面積（平方公尺）</td><td>校舍面積（平方公尺）</td></tr>
                <tr><td>24,680</td><td>5,120</td></tr>
            </table>"#;
        let fields = parse_detail_fields(html);
        assert_eq!(fields.land_area, Some(24_680));
        assert_eq!(fields.building_area, Some(5_120));
    }

    #[test]
    fn table_semantics_full_layout() {
        let html = r#"
            <table>
                <tr><th>學生數（人）</th></tr><tr><td>總計</td></tr><tr><td>1,005</td></tr>
            </table>
            <table>
                <tr><th>班級數（班）</th></tr><tr><td>36</td></tr>
            </table>
            <table>
                <tr><th>教師數（人）</th></tr><tr><td>總計</td></tr><tr><td>72</td></tr>
            </table>
            <table>
                <tr><th>校地及學校設施</th></tr>
                <tr><td>校地面積（平方公尺）</td><td>校舍面積（平方公尺）</td></tr>
                <tr><td>30,000</td><td>9,500</td></tr>
            </table>"#;
        let fields = parse_detail_fields(html);
        assert_eq!(fields.student_count, Some(1005));
        assert_eq!(fields.class_count, Some(36));
        assert_eq!(fields.teacher_count, Some(72));
        assert_eq!(fields.land_area, Some(30_000));
        assert_eq!(fields.building_area, Some(9_500));
    }

    #[test]
    fn regex_strategy_fires_when_tables_empty() {
        let html = r#"<div>班級數：12 學生數：250 教師數：22 校地面積：8,000 校舍面積：2,400</div>"#;
        let fields = parse_detail_fields(html);
        assert_eq!(fields.class_count, Some(12));
        assert_eq!(fields.student_count, Some(250));
        assert_eq!(fields.teacher_count, Some(22));
        assert_eq!(fields.land_area, Some(8_000));
        assert_eq!(fields.building_area, Some(2_400));
    }

    #[test]
    fn regex_strategy_accepts_ascii_colon() {
        let html = "<p>學生數: 99</p>";
        let fields = parse_detail_fields(html);
        assert_eq!(fields.student_count, Some(99));
    }

    #[test]
    fn element_scan_is_final_fallback() {
        // No tables, no label-colon grammar — only loose text in spans
        let html = r#"<span>本校學生數共 412 人</span><span>教師數 35</span>"#;
        let fields = parse_detail_fields(html);
        assert_eq!(fields.student_count, Some(412));
        assert_eq!(fields.teacher_count, Some(35));
    }

    #[test]
    fn malformed_digits_yield_null_not_error() {
        let html = r#"
            <table>
                <tr><th>學生數（人）</th></tr>
                <tr><td>總計</td></tr>
                <tr><td>不詳</td></tr>
            </table>"#;
        let fields = parse_detail_fields(html);
        assert_eq!(fields.student_count, None);
    }

    #[test]
    fn empty_view_yields_empty_fields() {
        assert!(parse_detail_fields("<html><body></body></html>").is_empty());
    }
}
