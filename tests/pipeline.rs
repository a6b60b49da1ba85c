// Copyright 2026 edugis-scraper Contributors
// SPDX-License-Identifier: Apache-2.0

//! End-to-end pipeline tests against a scripted in-memory driver.
//!
//! The fake drives the same trait surface the Chromium driver implements,
//! so the navigator, detail extractor, merger, and orchestrator run their
//! real code paths with no browser attached.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use edugis_scraper::driver::{DriverError, DriverResult, PageDriver, ViewHandle};
use edugis_scraper::navigator::NavStep;
use edugis_scraper::record::SelectorOption;
use edugis_scraper::{EntityRecord, Orchestrator, ScrapeConfig, ScrapeError};

// ── scripted driver ──────────────────────────────────────────────────────

/// Deterministic `PageDriver` over canned markup.
///
/// The query form's dynamics are reduced to: the selected sub-region value
/// decides which listing `page_html` serves ("0" is the region-wide scope),
/// and clicking a detail control opens one secondary view serving the detail
/// fixture until it is closed.
struct FakeDriver {
    region_listing: String,
    sub_region_listings: HashMap<String, String>,
    detail_view: String,
    /// Entity names whose listing entry cannot be clicked.
    unclickable_entities: Vec<String>,
    /// Entity names rendered across nested elements, reachable only by the
    /// keyword-matched click.
    split_rendered_entities: Vec<String>,
    /// Sub-region option values whose selection always fails.
    broken_sub_regions: Vec<String>,
    unreachable: bool,
    /// Detail clicks swap the main view's DOM instead of opening a
    /// secondary view.
    in_place_detail: bool,

    url: String,
    selected_scope: String,
    detail_open: bool,
    showing_detail_in_place: bool,
}

impl FakeDriver {
    fn new(region_listing: &str, detail_view: &str) -> Self {
        Self {
            region_listing: region_listing.to_string(),
            sub_region_listings: HashMap::new(),
            detail_view: detail_view.to_string(),
            unclickable_entities: Vec::new(),
            split_rendered_entities: Vec::new(),
            broken_sub_regions: Vec::new(),
            unreachable: false,
            in_place_detail: false,
            url: String::new(),
            selected_scope: "0".to_string(),
            detail_open: false,
            showing_detail_in_place: false,
        }
    }

    fn with_sub_region_listing(mut self, value: &str, listing: &str) -> Self {
        self.sub_region_listings
            .insert(value.to_string(), listing.to_string());
        self
    }

    fn with_unclickable_entity(mut self, name: &str) -> Self {
        self.unclickable_entities.push(name.to_string());
        self
    }

    fn with_split_rendered_entity(mut self, name: &str) -> Self {
        self.split_rendered_entities.push(name.to_string());
        self
    }

    fn with_in_place_detail(mut self) -> Self {
        self.in_place_detail = true;
        self
    }

    fn with_broken_sub_region(mut self, value: &str) -> Self {
        self.broken_sub_regions.push(value.to_string());
        self
    }

    fn unreachable() -> Self {
        let mut fake = Self::new("", "");
        fake.unreachable = true;
        fake
    }

    fn current_listing(&self) -> String {
        if self.selected_scope == "0" {
            self.region_listing.clone()
        } else {
            self.sub_region_listings
                .get(&self.selected_scope)
                .cloned()
                .unwrap_or_default()
        }
    }
}

#[async_trait]
impl PageDriver for FakeDriver {
    async fn navigate(&mut self, url: &str, _timeout: Duration) -> DriverResult<()> {
        if self.unreachable {
            return Err(DriverError::Browser(anyhow::anyhow!("connection refused")));
        }
        self.url = url.to_string();
        self.showing_detail_in_place = false;
        Ok(())
    }

    async fn click_first(&mut self, selectors: &[&str], _timeout: Duration) -> DriverResult<()> {
        if selectors.iter().any(|s| s.contains("學校概況")) {
            if self.in_place_detail {
                self.showing_detail_in_place = true;
                self.url = "https://stats.moe.gov.tw/edugissys/school.aspx".to_string();
            } else {
                self.detail_open = true;
            }
        }
        Ok(())
    }

    async fn select_option(
        &mut self,
        select: &str,
        value: &str,
        _timeout: Duration,
    ) -> DriverResult<()> {
        if select.contains("DistName") {
            if self.broken_sub_regions.iter().any(|v| v == value) {
                return Err(DriverError::NotFound(format!("option {value}")));
            }
            self.selected_scope = value.to_string();
        }
        Ok(())
    }

    async fn select_options(&mut self, select: &str) -> DriverResult<Vec<SelectorOption>> {
        let options = if select.contains("CityName") {
            vec![("花蓮縣", "U")]
        } else if select.contains("DistName") {
            vec![("全部", "0"), ("花蓮市", "01"), ("吉安鄉", "02")]
        } else {
            vec![]
        };
        Ok(options
            .into_iter()
            .map(|(display_name, option_value)| SelectorOption {
                display_name: display_name.to_string(),
                option_value: option_value.to_string(),
            })
            .collect())
    }

    async fn wait_for(&mut self, _condition: &str, _timeout: Duration) -> DriverResult<()> {
        Ok(())
    }

    async fn run_script(&mut self, expr: &str) -> DriverResult<serde_json::Value> {
        // Entity clicks: both scans interpolate the entity name; only the
        // keyword fallback declares a keyword list
        if expr.contains("createTreeWalker") {
            if self.unclickable_entities.iter().any(|n| expr.contains(n)) {
                return Ok(serde_json::Value::Bool(false));
            }
            let keyword_scan = expr.contains("const keywords");
            if !keyword_scan
                && self.split_rendered_entities.iter().any(|n| expr.contains(n))
            {
                return Ok(serde_json::Value::Bool(false));
            }
            return Ok(serde_json::Value::Bool(true));
        }
        // Sub-region first-option fallback stays broken when selection is
        if expr.contains("sel.options[0]") {
            return Ok(serde_json::Value::Bool(false));
        }
        Ok(serde_json::Value::Bool(true))
    }

    async fn page_html(&mut self) -> DriverResult<String> {
        if self.showing_detail_in_place {
            return Ok(self.detail_view.clone());
        }
        Ok(self.current_listing())
    }

    async fn current_url(&mut self) -> DriverResult<String> {
        Ok(self.url.clone())
    }

    async fn views(&mut self) -> DriverResult<Vec<ViewHandle>> {
        let mut views = vec![ViewHandle::new(0, true)];
        if self.detail_open {
            views.push(ViewHandle::new(1, false));
        }
        Ok(views)
    }

    async fn view_html(&mut self, view: ViewHandle) -> DriverResult<String> {
        if view.is_main {
            Ok(self.current_listing())
        } else if self.detail_open {
            Ok(self.detail_view.clone())
        } else {
            Err(DriverError::NotFound("stale view handle".to_string()))
        }
    }

    async fn close_view(&mut self, view: ViewHandle) -> DriverResult<()> {
        if !view.is_main {
            self.detail_open = false;
        }
        Ok(())
    }

    async fn focus_main(&mut self) -> DriverResult<()> {
        Ok(())
    }

    async fn settle(&mut self, _delay: Duration) {}
}

// ── fixtures ─────────────────────────────────────────────────────────────

const REGION_LISTING: &str = r#"<html><body><div id="search">明義國小 花蓮縣花蓮市[縣市立]中正國小 花蓮縣花蓮市[縣市立]海星國小 花蓮縣花蓮市[私立]光復國小 花蓮縣光復鄉[縣市立]瑞穗國小 花蓮縣瑞穗鄉[縣市立]</div></body></html>"#;

const EMPTY_LISTING: &str = r#"<html><body><div id="search"></div></body></html>"#;

const DETAIL_VIEW: &str = r#"<html><body>
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
    </table>
</body></html>"#;

fn test_config() -> ScrapeConfig {
    let mut cfg = ScrapeConfig::default();
    cfg.sub_regions = vec!["花蓮市".to_string(), "吉安鄉".to_string()];
    cfg
}

// ── tests ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn region_wide_run_enriches_every_entity() {
    let driver = FakeDriver::new(REGION_LISTING, DETAIL_VIEW);
    let mut orchestrator = Orchestrator::new(driver, test_config());

    let records = orchestrator.run(None).await.expect("run");
    assert_eq!(records.len(), 5);
    for record in &records {
        assert_eq!(record.region, "花蓮縣");
        assert_eq!(record.student_count, Some(1005));
        assert_eq!(record.class_count, Some(36));
        assert_eq!(record.teacher_count, Some(72));
        assert_eq!(record.land_area, Some(30_000));
        assert_eq!(record.building_area, Some(9_500));
    }
    assert_eq!(records[0].name, "明義國小");
    assert_eq!(records[0].sub_region, "花蓮市");
    assert_eq!(records[4].sub_region, "瑞穗鄉");

    let stats = orchestrator.stats();
    assert_eq!(stats.entities_found, 5);
    assert_eq!(stats.details_extracted, 5);
    assert_eq!(stats.entities_failed, 0);
    assert_eq!(stats.sub_regions_skipped, 0);
}

#[tokio::test]
async fn failed_detail_keeps_provisional_record() {
    // Entity 3 of 5 cannot be clicked; it must still appear in the output
    // with null numeric fields, and the other four must be unaffected.
    let driver =
        FakeDriver::new(REGION_LISTING, DETAIL_VIEW).with_unclickable_entity("海星國小");
    let mut orchestrator = Orchestrator::new(driver, test_config());

    let records = orchestrator.run(None).await.expect("run");
    assert_eq!(records.len(), 5);

    let failed = records
        .iter()
        .find(|r| r.name == "海星國小")
        .expect("failed entity still present");
    assert!(!failed.has_numeric_data());
    assert_eq!(failed.category.as_deref(), Some("私立"));

    let enriched = records.iter().filter(|r| r.has_numeric_data()).count();
    assert_eq!(enriched, 4);

    let stats = orchestrator.stats();
    assert_eq!(stats.entities_failed, 1);
    assert_eq!(stats.details_extracted, 4);
}

#[tokio::test]
async fn sub_region_fallback_skips_broken_sub_region() {
    // Region-wide scope yields nothing, so the run walks the configured
    // sub-regions; one of them never selects and is skipped without
    // aborting the other.
    let driver = FakeDriver::new(EMPTY_LISTING, DETAIL_VIEW)
        .with_sub_region_listing(
            "01",
            r#"<div id="search">測試國小 花蓮縣花蓮市[縣市立]</div>"#,
        )
        .with_broken_sub_region("02");
    let mut orchestrator = Orchestrator::new(driver, test_config());

    let records = orchestrator.run(None).await.expect("run");
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].name, "測試國小");
    assert_eq!(records[0].sub_region, "花蓮市");
    assert!(records[0].has_numeric_data());

    let stats = orchestrator.stats();
    assert_eq!(stats.sub_regions_skipped, 1);
    assert_eq!(stats.entities_found, 1);
}

#[tokio::test]
async fn keyword_click_reaches_split_rendered_entity() {
    // The clickable entry renders the name across nested elements, so the
    // full-name leaf scan misses; the keyword-matched scan must still reach
    // the detail view.
    let listing = r#"<div id="search">海星國小 花蓮縣花蓮市[私立]</div>"#;
    let driver =
        FakeDriver::new(listing, DETAIL_VIEW).with_split_rendered_entity("海星國小");
    let mut orchestrator = Orchestrator::new(driver, test_config());

    let records = orchestrator.run(None).await.expect("run");
    let record = records
        .iter()
        .find(|r| r.name == "海星國小")
        .expect("split-rendered entity present");
    assert!(record.has_numeric_data());
    assert_eq!(record.student_count, Some(1005));
    assert_eq!(orchestrator.stats().entities_failed, 0);
}

#[tokio::test]
async fn in_place_detail_update_enriches_and_restores() {
    // The detail click swaps the listing view's DOM instead of opening a
    // secondary view; the main page is parsed and the listing URL restored.
    let detail = r#"<table>
        <tr><th>學生數（人）</th></tr>
        <tr><td>總計</td></tr>
        <tr><td>312</td></tr>
    </table>"#;
    let listing = r#"<div id="search">測試國小 花蓮縣花蓮市[縣市立]</div>"#;
    let driver = FakeDriver::new(listing, detail).with_in_place_detail();

    let mut cfg = test_config();
    // No secondary view will ever appear; skip the wait for one
    cfg.timeouts.view_open_ms = 0;
    let mut orchestrator = Orchestrator::new(driver, cfg.clone());

    let records = orchestrator.run(None).await.expect("run");
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].student_count, Some(312));
    assert_eq!(records[0].class_count, None);

    let driver = orchestrator.into_driver();
    assert_eq!(driver.url, cfg.base_url);
    assert!(!driver.showing_detail_in_place);
}

#[tokio::test]
async fn unreachable_entry_page_fails_fast() {
    let mut orchestrator = Orchestrator::new(FakeDriver::unreachable(), test_config());
    let err = orchestrator.run(None).await.expect_err("must fail");
    assert!(matches!(
        err,
        ScrapeError::NavigationFailed {
            step: NavStep::OpenForm,
            ..
        }
    ));
}

#[tokio::test]
async fn sink_sees_records_before_merging() {
    // Two listing entries for the same school must reach the sink as two
    // emissions, then merge into one finalized record.
    let listing = r#"<div id="search">中正國小 花蓮縣花蓮市[縣市立]中正國小 花蓮縣花蓮市[縣市立]</div>"#;
    let driver = FakeDriver::new(listing, DETAIL_VIEW);
    let mut orchestrator = Orchestrator::new(driver, test_config());

    let mut seen: Vec<EntityRecord> = Vec::new();
    let mut sink = |record: &EntityRecord| seen.push(record.clone());
    let records = orchestrator.run(Some(&mut sink)).await.expect("run");

    assert_eq!(seen.len(), 2);
    assert!(seen.iter().all(|r| r.name == "中正國小"));
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].student_count, Some(1005));
}
