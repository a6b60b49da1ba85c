//! Scrape configuration — target form, search terms, and timeout knobs.
//!
//! Only display-name search terms are configured; option values are resolved
//! against the live page at runtime because the target site assigns them.

use serde::Deserialize;
use std::time::Duration;

/// Configuration for one scraping target.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScrapeConfig {
    /// Entry URL of the query form.
    pub base_url: String,
    /// Top-level region display name, matched against live option text.
    pub region: String,
    /// Sub-region display names to query when the region-wide pass fails.
    pub sub_regions: Vec<String>,
    /// Category label, used both for the radio-button value and for the
    /// listing suffix grammar (e.g. "國小").
    pub category_label: String,
    /// Fallback option value for the category `<select>` when the radio
    /// button is missing.
    pub category_value: String,
    /// Keywords that identify an entity name in free text (e.g. "國小",
    /// "實小"). Used to locate clickable listing entries.
    pub name_keywords: Vec<String>,
    /// Label of the per-entity detail control (e.g. "學校概況").
    pub detail_control_label: String,
    /// Timeout knobs for browser interaction.
    pub timeouts: Timeouts,
}

impl Default for ScrapeConfig {
    fn default() -> Self {
        Self {
            base_url: "https://stats.moe.gov.tw/edugissys/default.aspx".to_string(),
            region: "花蓮縣".to_string(),
            sub_regions: [
                "花蓮市", "吉安鄉", "新城鄉", "秀林鄉", "壽豐鄉", "鳳林鎮", "光復鄉",
                "豐濱鄉", "瑞穗鄉", "玉里鎮", "富里鄉", "卓溪鄉", "萬榮鄉",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            category_label: "國小".to_string(),
            category_value: "1".to_string(),
            name_keywords: vec!["國小".to_string(), "實小".to_string()],
            detail_control_label: "學校概況".to_string(),
            timeouts: Timeouts::default(),
        }
    }
}

/// Bounded timeouts for every class of browser interaction.
///
/// The legacy page offers no reliable "loading complete" signal, so fixed
/// settle delays are layered on top of the event-based waits.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct Timeouts {
    /// Full page navigation (connection + content load).
    pub page_load_ms: u64,
    /// Single click/select on an existing control.
    pub control_ms: u64,
    /// Wait for the dependent sub-region list to populate.
    pub option_wait_ms: u64,
    /// Fixed settle delay after a step that triggers scripted DOM updates.
    pub settle_ms: u64,
    /// Fixed settle delay after submitting the query form.
    pub results_settle_ms: u64,
    /// Wait for a secondary/detail view to appear after a click.
    pub view_open_ms: u64,
    /// Wait for an opened detail view to finish loading.
    pub view_load_ms: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            page_load_ms: 30_000,
            control_ms: 10_000,
            option_wait_ms: 10_000,
            settle_ms: 2_000,
            results_settle_ms: 5_000,
            view_open_ms: 10_000,
            view_load_ms: 40_000,
        }
    }
}

impl Timeouts {
    pub fn page_load(&self) -> Duration {
        Duration::from_millis(self.page_load_ms)
    }

    pub fn control(&self) -> Duration {
        Duration::from_millis(self.control_ms)
    }

    pub fn option_wait(&self) -> Duration {
        Duration::from_millis(self.option_wait_ms)
    }

    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }

    pub fn results_settle(&self) -> Duration {
        Duration::from_millis(self.results_settle_ms)
    }

    pub fn view_open(&self) -> Duration {
        Duration::from_millis(self.view_open_ms)
    }

    pub fn view_load(&self) -> Duration {
        Duration::from_millis(self.view_load_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_targets_all_districts() {
        let cfg = ScrapeConfig::default();
        assert_eq!(cfg.sub_regions.len(), 13);
        assert_eq!(cfg.region, "花蓮縣");
        assert!(cfg.name_keywords.contains(&"國小".to_string()));
    }

    #[test]
    fn config_deserializes_with_partial_overrides() {
        let cfg: ScrapeConfig =
            serde_json::from_str(r#"{"region": "臺東縣", "sub_regions": ["臺東市"]}"#).unwrap();
        assert_eq!(cfg.region, "臺東縣");
        assert_eq!(cfg.sub_regions, vec!["臺東市"]);
        // Unspecified fields keep their defaults
        assert_eq!(cfg.category_label, "國小");
        assert_eq!(cfg.timeouts.page_load_ms, 30_000);
    }
}
