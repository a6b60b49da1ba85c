//! Record merger — name normalization and duplicate reconciliation.
//!
//! The same institution is commonly discovered twice: once from the listing
//! grammar ("私立海星國小") and once from a free-text click target carrying
//! the full display suffix ("私立海星國小 花蓮縣花蓮市[私立]"). Normalization
//! strips the trailing `region…[category]` suffix and records sharing a
//! normalized name within a sub-region are merged pairwise.

use crate::record::EntityRecord;
use regex::Regex;
use std::collections::HashMap;

/// Merges duplicate/partial records for one region.
pub struct RecordMerger {
    suffix: Regex,
}

impl RecordMerger {
    pub fn new(region: &str) -> Self {
        let escaped = regex::escape(region);
        // Trailing "<region><sub-region>[<category>]" display suffix
        let suffix = Regex::new(&format!(r"^(?P<core>.+?)\s*{escaped}[^\[\]]*\[[^\]]+\]\s*$"))
            .expect("display suffix pattern");
        Self { suffix }
    }

    /// Strip the region/category suffix baked into display text.
    ///
    /// Idempotent: normalizing an already-normalized name returns it
    /// unchanged.
    pub fn normalize_name(&self, name: &str) -> String {
        match self.suffix.captures(name) {
            Some(caps) => caps["core"].trim().to_string(),
            None => name.trim().to_string(),
        }
    }

    /// Merge records sharing a normalized name within a sub-region.
    ///
    /// Policy per pair: if exactly one side has numeric data, it survives;
    /// if both do, fields merge with the first-seen non-null value winning;
    /// if neither does, the longer original display text survives as a proxy
    /// for more complete identification. Survivors are renamed to the
    /// normalized form. Idempotent, and order-independent on the final
    /// field values.
    pub fn merge(&self, records: Vec<EntityRecord>) -> Vec<EntityRecord> {
        // Survivors keep first-seen order; the map tracks their slot plus
        // the original display length used by the no-data tiebreak.
        let mut order: Vec<EntityRecord> = Vec::new();
        let mut slots: HashMap<(String, String), (usize, usize)> = HashMap::new();

        for record in records {
            let normalized = self.normalize_name(&record.name);
            if normalized.is_empty() {
                continue;
            }
            let original_len = record.name.chars().count();
            let key = (record.sub_region.clone(), normalized.clone());

            match slots.get(&key) {
                None => {
                    let mut survivor = record;
                    survivor.name = normalized;
                    slots.insert(key, (order.len(), original_len));
                    order.push(survivor);
                }
                Some(&(slot, existing_len)) => {
                    let existing = &mut order[slot];
                    let incoming_has = record.has_numeric_data();
                    let existing_has = existing.has_numeric_data();

                    if incoming_has && !existing_has {
                        let mut survivor = record;
                        survivor.name = normalized;
                        survivor.category = survivor.category.take().or(existing.category.take());
                        *existing = survivor;
                        slots.insert(key, (slot, original_len));
                    } else if incoming_has && existing_has {
                        existing.class_count = existing.class_count.or(record.class_count);
                        existing.student_count = existing.student_count.or(record.student_count);
                        existing.teacher_count = existing.teacher_count.or(record.teacher_count);
                        existing.land_area = existing.land_area.or(record.land_area);
                        existing.building_area = existing.building_area.or(record.building_area);
                        existing.category = existing.category.take().or(record.category);
                    } else if !incoming_has && !existing_has && original_len > existing_len {
                        let mut survivor = record;
                        survivor.name = normalized;
                        survivor.category = survivor.category.take().or(existing.category.take());
                        *existing = survivor;
                        slots.insert(key, (slot, original_len));
                    } else {
                        existing.category = existing.category.take().or(record.category);
                    }
                }
            }
        }
        order
    }
}
