//! Orchestrator — runs the full navigate → list → detail → merge pipeline.
//!
//! The region-wide "all sub-regions" query is attempted first because it is
//! one navigation instead of thirteen; per-sub-region navigation is the
//! fallback when it yields nothing. A failed entity never aborts its batch
//! and a failed sub-region never aborts the run; only an unreachable entry
//! page surfaces to the caller.

use crate::config::ScrapeConfig;
use crate::detail::DetailExtractor;
use crate::driver::PageDriver;
use crate::error::ScrapeError;
use crate::listing::ListingExtractor;
use crate::merge::RecordMerger;
use crate::navigator::{FormNavigator, NavStep, SubRegionTarget};
use crate::record::EntityRecord;

/// Receives each finalized per-entity record immediately after detail
/// extraction, ahead of the final merge, for incremental persistence.
pub trait RecordSink {
    fn emit(&mut self, record: &EntityRecord);
}

impl<F: FnMut(&EntityRecord)> RecordSink for F {
    fn emit(&mut self, record: &EntityRecord) {
        self(record)
    }
}

/// Outcome counters for one run, for the caller's log.
#[derive(Debug, Default, Clone, Copy)]
pub struct RunStats {
    pub entities_found: usize,
    pub details_extracted: usize,
    pub entities_failed: usize,
    pub sub_regions_skipped: usize,
}

/// Owns the session driver and drives one sequential scrape of the
/// configured region. One entity is fully processed before the next
/// begins: the navigator and detail extractor both mutate shared browser
/// state.
pub struct Orchestrator<D: PageDriver> {
    driver: D,
    cfg: ScrapeConfig,
    listing: ListingExtractor,
    merger: RecordMerger,
    stats: RunStats,
}

impl<D: PageDriver> Orchestrator<D> {
    pub fn new(driver: D, cfg: ScrapeConfig) -> Self {
        let listing = ListingExtractor::new(&cfg.region, &cfg.name_keywords);
        let merger = RecordMerger::new(&cfg.region);
        Self {
            driver,
            cfg,
            listing,
            merger,
            stats: RunStats::default(),
        }
    }

    /// Counters from the most recent run.
    pub fn stats(&self) -> RunStats {
        self.stats
    }

    /// Release the underlying driver.
    pub fn into_driver(self) -> D {
        self.driver
    }

    /// Run the full batch and return the merged, finalized record set.
    ///
    /// Records are immutable once returned; `sink`, when provided, sees each
    /// record right after its detail pass, before merging.
    pub async fn run(
        &mut self,
        mut sink: Option<&mut dyn RecordSink>,
    ) -> Result<Vec<EntityRecord>, ScrapeError> {
        self.stats = RunStats::default();
        let mut collected: Vec<EntityRecord> = Vec::new();

        // Region-wide shortcut first
        match self.scrape_scope(SubRegionTarget::All, None, &mut sink).await {
            Ok(records) if !records.is_empty() => {
                tracing::info!(count = records.len(), "region-wide query succeeded");
                collected = records;
            }
            Ok(_) => {
                tracing::warn!("region-wide query returned no entities, querying sub-regions");
            }
            Err(e) if is_entry_unreachable(&e) => return Err(e),
            Err(e) => {
                tracing::warn!(%e, "region-wide query failed, querying sub-regions");
            }
        }

        if collected.is_empty() {
            let sub_regions = self.cfg.sub_regions.clone();
            for sub_region in &sub_regions {
                match self
                    .scrape_scope(SubRegionTarget::Named(sub_region), Some(sub_region), &mut sink)
                    .await
                {
                    Ok(records) => {
                        tracing::info!(sub_region, count = records.len(), "sub-region scraped");
                        collected.extend(records);
                    }
                    Err(e) => {
                        // Skip this sub-region, keep the run alive
                        self.stats.sub_regions_skipped += 1;
                        tracing::warn!(sub_region, %e, "sub-region navigation failed, skipping");
                    }
                }
            }
        }

        if collected.is_empty()
            && !self.cfg.sub_regions.is_empty()
            && self.stats.sub_regions_skipped == self.cfg.sub_regions.len()
        {
            return Err(ScrapeError::Pipeline(anyhow::anyhow!(
                "every sub-region failed to navigate"
            )));
        }

        let merged = self.merger.merge(collected);
        tracing::info!(
            merged = merged.len(),
            failed_entities = self.stats.entities_failed,
            skipped_sub_regions = self.stats.sub_regions_skipped,
            "run complete"
        );
        Ok(merged)
    }

    /// Navigate one scope, harvest its listing, and enrich each entity.
    async fn scrape_scope(
        &mut self,
        target: SubRegionTarget<'_>,
        sub_region: Option<&str>,
        sink: &mut Option<&mut dyn RecordSink>,
    ) -> Result<Vec<EntityRecord>, ScrapeError> {
        FormNavigator::new(&mut self.driver, &self.cfg)
            .load_results(target)
            .await?;

        let html = self
            .driver
            .page_html()
            .await
            .map_err(|e| ScrapeError::Pipeline(e.into()))?;
        let mut records = self.listing.extract(&html, sub_region);
        self.stats.entities_found += records.len();
        tracing::info!(count = records.len(), ?sub_region, "provisional entities listed");

        for record in &mut records {
            if record.has_numeric_data() {
                // The listing itself carried the numbers; no detail pass
                self.stats.details_extracted += 1;
            } else {
                let mut extractor = DetailExtractor::new(&mut self.driver, &self.cfg);
                match extractor.enrich(record).await {
                    Ok(()) => self.stats.details_extracted += 1,
                    // Per-entity boundary: keep the entity with whatever
                    // fields were already recovered
                    Err(e) if e.is_per_entity() => {
                        self.stats.entities_failed += 1;
                        tracing::warn!(entity = %record.name, %e, "detail extraction failed, keeping provisional record");
                    }
                    Err(e) => {
                        self.stats.entities_failed += 1;
                        tracing::warn!(entity = %record.name, %e, "detail extraction errored, keeping provisional record");
                    }
                }
            }
            if let Some(s) = sink.as_mut() {
                s.emit(record);
            }
        }
        Ok(records)
    }
}

/// Whether the failure means the entry page itself is unreachable — the one
/// navigation error worth surfacing immediately so the caller can fall back
/// to cached results.
fn is_entry_unreachable(error: &ScrapeError) -> bool {
    matches!(
        error,
        ScrapeError::NavigationFailed {
            step: NavStep::OpenForm,
            ..
        }
    )
}
