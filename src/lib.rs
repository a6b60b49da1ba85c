// Copyright 2026 edugis-scraper Contributors
// SPDX-License-Identifier: Apache-2.0

//! Browser-driven extractor for school statistics served by a legacy,
//! multi-step administrative web form with no public API.
//!
//! The pipeline drives the form through its fixed state sequence (region →
//! dependent sub-region → category → submit), harvests the result listing,
//! opens a per-entity detail view for the numeric fields the listing omits,
//! and merges duplicate/partial records into one finalized set.

pub mod config;
pub mod detail;
pub mod driver;
pub mod error;
pub mod listing;
pub mod merge;
pub mod navigator;
pub mod orchestrator;
pub mod record;

pub use config::ScrapeConfig;
pub use error::ScrapeError;
pub use orchestrator::{Orchestrator, RecordSink};
pub use record::EntityRecord;
