//! Listing extractor — provisional entity records from the post-submit page.
//!
//! Strategies are an ordered list of pure functions over the raw markup;
//! the first non-empty result wins:
//!
//! 1. Delimited text: the known results container rendered as running text,
//!    matched by a `<name> <region><sub-region>[<category>]` grammar with two
//!    alternates (spaced and unspaced) to tolerate markup drift.
//! 2. Header-mapped table: detect a header row by field-label keywords and
//!    read subsequent rows positionally through the recorded index map.
//! 3. Positional table: no recognized header; first textual cell is the name
//!    and numeric cells are taken in the fixed class/student/teacher/land/
//!    building order as a last resort.
//!
//! Numeric fields are usually still `None` after this stage: the summary
//! listing does not carry them for this page grammar. That is expected.

use crate::record::{clean_text, parse_area, parse_count, EntityRecord};
use regex::Regex;
use scraper::{ElementRef, Html, Selector};

/// The `div` the legacy page renders its result entities into.
const RESULTS_CONTAINER: &str = "div#search";

/// Identifies one parsing strategy, in fallback order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListingStrategy {
    DelimitedText,
    HeaderTable,
    PositionalTable,
}

const STRATEGY_ORDER: [ListingStrategy; 3] = [
    ListingStrategy::DelimitedText,
    ListingStrategy::HeaderTable,
    ListingStrategy::PositionalTable,
];

/// Column index map recovered from a recognized table header row.
#[derive(Debug, Default, Clone, Copy)]
struct HeaderIndices {
    name: Option<usize>,
    sub_region: Option<usize>,
    class_count: Option<usize>,
    student_count: Option<usize>,
    teacher_count: Option<usize>,
    land_area: Option<usize>,
    building_area: Option<usize>,
}

impl HeaderIndices {
    fn any(&self) -> bool {
        self.name.is_some()
            || self.sub_region.is_some()
            || self.class_count.is_some()
            || self.student_count.is_some()
            || self.teacher_count.is_some()
            || self.land_area.is_some()
            || self.building_area.is_some()
    }
}

/// Parses listing markup into provisional records for one region.
pub struct ListingExtractor {
    region: String,
    name_keywords: Vec<String>,
    /// `<name> <region><sub-region>[<category>]` with whitespace between
    /// name and region qualifier.
    spaced: Regex,
    /// Same grammar without the separating whitespace; markup drift
    /// sometimes collapses it.
    unspaced: Regex,
}

impl ListingExtractor {
    pub fn new(region: &str, name_keywords: &[String]) -> Self {
        let escaped = regex::escape(region);
        // Both grammars are best-effort: a name ending in a region-prefix
        // character is inherently ambiguous, and the merger compensates.
        let spaced = Regex::new(&format!(
            r"(?P<name>\S+(?:\s+\S+)*?)\s+{escaped}(?P<dist>[^\[\]]+)\[(?P<cat>[^\]]+)\]"
        ))
        .expect("spaced listing grammar");
        let unspaced = Regex::new(&format!(
            r"(?P<name>[^\s\[\]]+?){escaped}(?P<dist>[^\[\]]+)\[(?P<cat>[^\]]+)\]"
        ))
        .expect("unspaced listing grammar");
        Self {
            region: region.to_string(),
            name_keywords: name_keywords.to_vec(),
            spaced,
            unspaced,
        }
    }

    /// Extract provisional records, optionally filtered to one sub-region.
    ///
    /// Strategy selection is deterministic: a fixture recognized by an
    /// earlier strategy is never reinterpreted by a later one.
    pub fn extract(&self, html: &str, sub_region: Option<&str>) -> Vec<EntityRecord> {
        for strategy in STRATEGY_ORDER {
            let result = match strategy {
                ListingStrategy::DelimitedText => self.delimited_text(html, sub_region),
                ListingStrategy::HeaderTable => self.header_table(html, sub_region),
                ListingStrategy::PositionalTable => self.positional_table(html, sub_region),
            };
            if let Some(records) = result {
                if !records.is_empty() {
                    tracing::debug!(?strategy, count = records.len(), "listing strategy matched");
                    return records;
                }
            }
        }
        tracing::warn!("no listing strategy produced records");
        Vec::new()
    }

    /// Strategy 1: grammar over the results container's text content.
    fn delimited_text(&self, html: &str, sub_region: Option<&str>) -> Option<Vec<EntityRecord>> {
        let document = Html::parse_document(html);
        let container = Selector::parse(RESULTS_CONTAINER).unwrap();
        let node = document.select(&container).next()?;
        let text: String = node.text().collect::<Vec<_>>().join(" ");

        let mut records = self.match_grammar(&self.spaced, &text, sub_region);
        if records.is_empty() {
            records = self.match_grammar(&self.unspaced, &text, sub_region);
        }
        Some(records)
    }

    fn match_grammar(
        &self,
        grammar: &Regex,
        text: &str,
        sub_region: Option<&str>,
    ) -> Vec<EntityRecord> {
        let mut records = Vec::new();
        for caps in grammar.captures_iter(text) {
            let name = clean_text(&caps["name"]);
            let dist = clean_text(&caps["dist"]);
            let category = clean_text(&caps["cat"]);
            if name.is_empty() {
                continue;
            }
            if let Some(filter) = sub_region {
                if !dist.contains(filter) {
                    continue;
                }
            }
            records.push(EntityRecord::provisional(
                self.region.clone(),
                dist,
                name,
                Some(category),
            ));
        }
        records
    }

    /// Strategy 2: table with a recognizable header row.
    fn header_table(&self, html: &str, sub_region: Option<&str>) -> Option<Vec<EntityRecord>> {
        let document = Html::parse_document(html);
        let table_sel = Selector::parse("table").unwrap();
        let row_sel = Selector::parse("tr").unwrap();

        for table in document.select(&table_sel) {
            let rows: Vec<ElementRef> = table.select(&row_sel).collect();
            if rows.len() < 2 {
                continue;
            }

            // Headers live in the first few rows on this page grammar
            let mut header: Option<(usize, HeaderIndices)> = None;
            for (i, row) in rows.iter().take(3).enumerate() {
                let indices = detect_header(&cell_texts(row));
                if indices.any() {
                    header = Some((i, indices));
                    break;
                }
            }
            let Some((header_row, indices)) = header else {
                continue;
            };

            let mut records = Vec::new();
            for row in &rows[header_row + 1..] {
                let cells = cell_texts(row);
                if cells.iter().all(|c| c.is_empty()) {
                    continue;
                }
                let name = indices
                    .name
                    .and_then(|i| cells.get(i))
                    .map(|s| s.to_string())
                    .unwrap_or_default();
                if name.is_empty() {
                    continue;
                }
                let dist = indices
                    .sub_region
                    .and_then(|i| cells.get(i))
                    .map(|s| s.to_string())
                    .or_else(|| sub_region.map(str::to_string))
                    .unwrap_or_default();
                if let Some(filter) = sub_region {
                    if !dist.is_empty() && !dist.contains(filter) {
                        continue;
                    }
                }
                let mut record = EntityRecord::provisional(self.region.clone(), dist, name, None);
                record.class_count = cell_at(&cells, indices.class_count).and_then(parse_count);
                record.student_count = cell_at(&cells, indices.student_count).and_then(parse_count);
                record.teacher_count = cell_at(&cells, indices.teacher_count).and_then(parse_count);
                record.land_area = cell_at(&cells, indices.land_area).and_then(parse_area);
                record.building_area = cell_at(&cells, indices.building_area).and_then(parse_area);
                records.push(record);
            }
            if !records.is_empty() {
                return Some(records);
            }
        }
        None
    }

    /// Strategy 3: last resort when no header row is recognized. First
    /// textual cell is the name; numeric cells follow the fixed
    /// class/student/teacher/land/building order.
    fn positional_table(&self, html: &str, sub_region: Option<&str>) -> Option<Vec<EntityRecord>> {
        let document = Html::parse_document(html);
        let table_sel = Selector::parse("table").unwrap();
        let row_sel = Selector::parse("tr").unwrap();

        let table = document
            .select(&table_sel)
            .find(|t| t.select(&row_sel).count() > 2)?;
        let rows: Vec<ElementRef> = table.select(&row_sel).collect();

        let mut records = Vec::new();
        for row in &rows[1..] {
            let cells = cell_texts(row);
            if cells.len() < 2 {
                continue;
            }

            let name = cells
                .iter()
                .find(|c| self.looks_like_name(c))
                .or_else(|| cells.iter().find(|c| !c.is_empty()))
                .map(|s| s.to_string())
                .unwrap_or_default();
            if name.is_empty() {
                continue;
            }

            let numbers: Vec<i64> = cells
                .iter()
                .filter(|c| c.as_str() != name)
                .filter_map(|c| crate::record::parse_number(c))
                .collect();

            let mut record = EntityRecord::provisional(
                self.region.clone(),
                sub_region.unwrap_or_default().to_string(),
                name,
                None,
            );
            record.class_count = numbers.first().and_then(|n| u32::try_from(*n).ok());
            record.student_count = numbers.get(1).and_then(|n| u32::try_from(*n).ok());
            record.teacher_count = numbers.get(2).and_then(|n| u32::try_from(*n).ok());
            record.land_area = numbers.get(3).and_then(|n| u64::try_from(*n).ok());
            record.building_area = numbers.get(4).and_then(|n| u64::try_from(*n).ok());
            records.push(record);
        }
        if records.is_empty() {
            None
        } else {
            Some(records)
        }
    }

    fn looks_like_name(&self, text: &str) -> bool {
        self.name_keywords.iter().any(|k| text.contains(k))
    }
}

pub(crate) fn cell_texts(row: &ElementRef) -> Vec<String> {
    let cell_sel = Selector::parse("td, th").unwrap();
    row.select(&cell_sel)
        .map(|cell| clean_text(&cell.text().collect::<String>()))
        .collect()
}

fn cell_at<'a>(cells: &'a [String], index: Option<usize>) -> Option<&'a str> {
    index.and_then(|i| cells.get(i)).map(String::as_str)
}

/// Map recognized field labels to their column positions.
fn detect_header(cells: &[String]) -> HeaderIndices {
    let mut indices = HeaderIndices::default();
    for (i, text) in cells.iter().enumerate() {
        if text.contains("學校") && text.contains("名稱") {
            indices.name.get_or_insert(i);
        } else if text.contains("鄉鎮") || text.contains("市區") || text.contains("行政區") {
            indices.sub_region.get_or_insert(i);
        } else if text.contains("班級") && text.contains("數") {
            indices.class_count.get_or_insert(i);
        } else if text.contains("學生") && text.contains("數") {
            indices.student_count.get_or_insert(i);
        } else if text.contains("教師") && text.contains("數") {
            indices.teacher_count.get_or_insert(i);
        } else if text.contains("校地") && text.contains("面積") {
            indices.land_area.get_or_insert(i);
        } else if text.contains("校舍") && text.contains("面積") {
            indices.building_area.get_or_insert(i);
        }
    }
    indices
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extractor() -> ListingExtractor {
        ListingExtractor::new("花蓮縣", &["國小".to_string(), "實小".to_string()])
    }

    #[test]
    fn delimited_text_parses_spaced_grammar() {
        let html = r#"<html><body>
            <div id="search">測試國小 花蓮縣花蓮市[縣市立]中正國小 花蓮縣吉安鄉[縣市立]</div>
        </body></html>"#;
        let records = extractor().extract(html, None);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].name, "測試國小");
        assert_eq!(records[0].sub_region, "花蓮市");
        assert_eq!(records[0].category.as_deref(), Some("縣市立"));
        assert_eq!(records[0].class_count, None);
        assert_eq!(records[1].sub_region, "吉安鄉");
    }

    #[test]
    fn delimited_text_falls_back_to_unspaced_grammar() {
        let html = r#"<div id="search">海星國小花蓮縣花蓮市[私立]</div>"#;
        let records = extractor().extract(html, None);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].name, "海星國小");
        assert_eq!(records[0].sub_region, "花蓮市");
        assert_eq!(records[0].category.as_deref(), Some("私立"));
    }

    #[test]
    fn delimited_text_respects_sub_region_filter() {
        let html = r#"<div id="search">測試國小 花蓮縣花蓮市[縣市立] 中正國小 花蓮縣吉安鄉[縣市立]</div>"#;
        let records = extractor().extract(html, Some("吉安鄉"));
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].name, "中正國小");
    }

    #[test]
    fn header_table_maps_columns_by_label() {
        let html = r#"<table>
            <tr><th>學校名稱</th><th>鄉鎮市區</th><th>班級數</th><th>學生數</th><th>教師數</th></tr>
            <tr><td>明義國小</td><td>花蓮市</td><td>48</td><td>1,234</td><td>90</td></tr>
            <tr><td>中原國小</td><td>花蓮市</td><td></td><td>560</td><td>45</td></tr>
        </table>"#;
        let records = extractor().extract(html, None);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].name, "明義國小");
        assert_eq!(records[0].class_count, Some(48));
        assert_eq!(records[0].student_count, Some(1234));
        assert_eq!(records[1].class_count, None);
    }

    #[test]
    fn header_table_reordered_columns() {
        let html = r#"<table>
            <tr><th>學生數</th><th>學校名稱</th></tr>
            <tr><td>321</td><td>光復國小</td></tr>
        </table>"#;
        let records = extractor().extract(html, Some("光復鄉"));
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].name, "光復國小");
        assert_eq!(records[0].student_count, Some(321));
        assert_eq!(records[0].sub_region, "光復鄉");
    }

    #[test]
    fn positional_table_is_last_resort() {
        let html = r#"<table>
            <tr><td>first row is skipped</td></tr>
            <tr><td>瑞穗國小</td><td>12</td><td>250</td><td>22</td></tr>
            <tr><td>富里國小</td><td>6</td><td>80</td><td>10</td></tr>
        </table>"#;
        let records = extractor().extract(html, Some("瑞穗鄉"));
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].name, "瑞穗國小");
        assert_eq!(records[0].class_count, Some(12));
        assert_eq!(records[0].student_count, Some(250));
        assert_eq!(records[0].teacher_count, Some(22));
        assert_eq!(records[0].land_area, None);
    }

    #[test]
    fn strategy_selection_is_deterministic() {
        // Fixture recognizable by strategy 1 AND containing a parseable
        // table: the table must not alter the result.
        let html = r#"
            <div id="search">測試國小 花蓮縣花蓮市[縣市立]</div>
            <table>
                <tr><th>學校名稱</th><th>班級數</th></tr>
                <tr><td>別的國小</td><td>99</td></tr>
            </table>"#;
        let records = extractor().extract(html, None);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].name, "測試國小");
        assert_eq!(records[0].class_count, None);
    }

    #[test]
    fn empty_markup_yields_no_records() {
        assert!(extractor().extract("<html><body></body></html>", None).is_empty());
    }
}
