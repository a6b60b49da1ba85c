//! Error taxonomy for the scraping pipeline.
//!
//! Per-entity failures (`DetailUnavailable`, `ViewTimeout`) are caught at the
//! orchestrator's per-entity boundary and never abort the batch. Per-sub-region
//! `NavigationFailed` skips that sub-region. Only a total pipeline failure
//! (e.g. the entry page itself is unreachable) reaches the caller.

use crate::driver::DriverError;
use crate::navigator::NavStep;

/// Errors surfaced by the extraction pipeline.
#[derive(Debug, thiserror::Error)]
pub enum ScrapeError {
    /// A form-driving transition could not complete after primary and
    /// fallback attempts.
    #[error("form navigation failed at {step:?}: {source}")]
    NavigationFailed {
        step: NavStep,
        #[source]
        source: DriverError,
    },

    /// No detail control could be located for an entity.
    #[error("no detail control located for entity {0:?}")]
    DetailUnavailable(String),

    /// A secondary view did not settle in time.
    #[error("detail view did not settle in time for entity {0:?}")]
    ViewTimeout(String),

    /// Unrecoverable failure of the whole run.
    #[error("pipeline failure: {0}")]
    Pipeline(#[from] anyhow::Error),
}

impl ScrapeError {
    /// Whether this error is recoverable at the per-entity boundary.
    ///
    /// Recoverable errors keep the entity with whatever fields were already
    /// extracted; everything else propagates to the sub-region or run level.
    pub fn is_per_entity(&self) -> bool {
        matches!(
            self,
            ScrapeError::DetailUnavailable(_) | ScrapeError::ViewTimeout(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn per_entity_classification() {
        assert!(ScrapeError::DetailUnavailable("x".into()).is_per_entity());
        assert!(ScrapeError::ViewTimeout("x".into()).is_per_entity());
        assert!(!ScrapeError::NavigationFailed {
            step: NavStep::Submit,
            source: DriverError::TimedOut(Duration::from_secs(1)),
        }
        .is_per_entity());
    }
}
