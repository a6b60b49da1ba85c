//! Canonical entity records and the numeric/text cleanup helpers shared by
//! every extraction strategy.

use serde::{Deserialize, Serialize};

/// One institution's statistics as assembled by the pipeline.
///
/// Created provisionally by the listing extractor (numeric fields usually
/// absent — the summary listing does not carry them), enriched in place by
/// the detail extractor, and finalized by the record merger. Numeric `None`
/// means "not yet extracted", never zero.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityRecord {
    /// Top-level region display name (e.g. "花蓮縣").
    pub region: String,
    /// Sub-region display name (e.g. "花蓮市").
    pub sub_region: String,
    /// Entity display name; may still carry a region/category suffix until
    /// the merger normalizes it.
    pub name: String,
    /// Category text from the listing suffix (e.g. "縣市立").
    pub category: Option<String>,
    pub class_count: Option<u32>,
    pub student_count: Option<u32>,
    pub teacher_count: Option<u32>,
    pub land_area: Option<u64>,
    pub building_area: Option<u64>,
}

impl EntityRecord {
    /// A provisional record with no numeric data yet.
    pub fn provisional(
        region: impl Into<String>,
        sub_region: impl Into<String>,
        name: impl Into<String>,
        category: Option<String>,
    ) -> Self {
        Self {
            region: region.into(),
            sub_region: sub_region.into(),
            name: name.into(),
            category,
            class_count: None,
            student_count: None,
            teacher_count: None,
            land_area: None,
            building_area: None,
        }
    }

    /// Whether any numeric field has been recovered.
    pub fn has_numeric_data(&self) -> bool {
        self.class_count.is_some()
            || self.student_count.is_some()
            || self.teacher_count.is_some()
            || self.land_area.is_some()
            || self.building_area.is_some()
    }

    /// Fill in numeric fields from a detail extraction, never downgrading a
    /// known value to `None`.
    pub fn absorb(&mut self, fields: &DetailFields) {
        self.class_count = self.class_count.or(fields.class_count);
        self.student_count = self.student_count.or(fields.student_count);
        self.teacher_count = self.teacher_count.or(fields.teacher_count);
        self.land_area = self.land_area.or(fields.land_area);
        self.building_area = self.building_area.or(fields.building_area);
    }
}

/// Numeric fields recovered from one detail view.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DetailFields {
    pub class_count: Option<u32>,
    pub student_count: Option<u32>,
    pub teacher_count: Option<u32>,
    pub land_area: Option<u64>,
    pub building_area: Option<u64>,
}

impl DetailFields {
    pub fn is_empty(&self) -> bool {
        self.class_count.is_none()
            && self.student_count.is_none()
            && self.teacher_count.is_none()
            && self.land_area.is_none()
            && self.building_area.is_none()
    }

    /// Names of the fields that were recovered, for log lines.
    pub fn recovered(&self) -> Vec<&'static str> {
        let mut out = Vec::new();
        if self.class_count.is_some() {
            out.push("class_count");
        }
        if self.student_count.is_some() {
            out.push("student_count");
        }
        if self.teacher_count.is_some() {
            out.push("teacher_count");
        }
        if self.land_area.is_some() {
            out.push("land_area");
        }
        if self.building_area.is_some() {
            out.push("building_area");
        }
        out
    }
}

/// A `<select>` option resolved from the live page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectorOption {
    /// Visible option text.
    pub display_name: String,
    /// The site-assigned option value.
    pub option_value: String,
}

/// Parse a human-formatted integer, stripping thousands separators and any
/// other non-digit character except a leading sign.
///
/// Malformed digit text yields `None`, never an error: `"1,234"` → 1234,
/// `""` → `None`, `"abc"` → `None`, `"1-2"` → `None`.
pub fn parse_number(text: &str) -> Option<i64> {
    let cleaned: String = text
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '-')
        .collect();
    if cleaned.is_empty() {
        return None;
    }
    cleaned.parse().ok()
}

/// `parse_number` narrowed to a count field.
pub fn parse_count(text: &str) -> Option<u32> {
    parse_number(text).and_then(|n| u32::try_from(n).ok())
}

/// `parse_number` narrowed to an area field.
pub fn parse_area(text: &str) -> Option<u64> {
    parse_number(text).and_then(|n| u64::try_from(n).ok())
}

/// Strip newlines, tabs, and surrounding whitespace from cell text.
pub fn clean_text(text: &str) -> String {
    text.trim()
        .chars()
        .filter(|c| !matches!(c, '\n' | '\r' | '\t'))
        .collect()
}
