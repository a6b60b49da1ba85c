//! Form navigator — drives the query form through its fixed state sequence.
//!
//! `Start → RegionMenuOpened → RegionSelected → SubRegionListPopulated →
//! SubRegionSelected → CategorySelected → Submitted → ResultsLoaded`
//!
//! Every transition is a driver call guarded by a timeout; on failure the
//! navigator attempts one scripted-DOM fallback before surfacing
//! `NavigationFailed(step)`. The machine is re-entrant: selecting "all
//! sub-regions" is a first-class terminal state used when per-sub-region
//! navigation is unreliable or slow.

use crate::config::ScrapeConfig;
use crate::driver::{DriverError, PageDriver};
use crate::error::ScrapeError;
use crate::record::SelectorOption;

const REGION_SELECT: &str = "select[name=\"CityName\"]";
const SUB_REGION_SELECT: &str = "select[name=\"DistName\"]";
const REGION_MENU_BUTTONS: [&str; 2] = ["button#ptype1", "button[value=\"1\"]"];
const CATEGORY_SELECT: &str = "select[name=\"lv\"]";
const SUBMIT_BUTTON: &str = "input[type=\"submit\"][value=\"學校搜尋\"]";
/// Legacy page function behind the submit button; the scripted fallback
/// calls it directly when the button cannot be clicked.
const SUBMIT_SCRIPT: &str = "BtnClick2();";
/// Value the sub-region `<select>` uses for "all sub-regions".
const ALL_SUB_REGIONS_VALUE: &str = "0";

/// One transition of the form state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NavStep {
    OpenForm,
    RegionMenu,
    SelectRegion,
    SubRegionList,
    SelectSubRegion,
    SelectCategory,
    Submit,
    ResultsLoaded,
}

/// Which sub-region scope to submit the query for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubRegionTarget<'a> {
    /// The whole top-level region at once.
    All,
    /// One named sub-region, matched against live option text.
    Named(&'a str),
}

/// Drives the form using the session driver; never assumes any step succeeds
/// on the first selector attempted.
pub struct FormNavigator<'a, D: PageDriver> {
    driver: &'a mut D,
    cfg: &'a ScrapeConfig,
}

impl<'a, D: PageDriver> FormNavigator<'a, D> {
    pub fn new(driver: &'a mut D, cfg: &'a ScrapeConfig) -> Self {
        Self { driver, cfg }
    }

    /// Run the full state sequence and leave the driver on the results page.
    pub async fn load_results(&mut self, target: SubRegionTarget<'_>) -> Result<(), ScrapeError> {
        self.open_form().await?;
        self.open_region_menu().await?;
        self.select_region().await?;
        self.await_sub_region_list().await?;
        self.select_sub_region(target).await?;
        self.select_category().await?;
        self.submit().await?;
        self.await_results().await
    }

    async fn open_form(&mut self) -> Result<(), ScrapeError> {
        let t = &self.cfg.timeouts;
        self.driver
            .navigate(&self.cfg.base_url, t.page_load())
            .await
            .map_err(|source| nav_err(NavStep::OpenForm, source))?;
        self.driver.settle(t.settle()).await;
        Ok(())
    }

    /// Reveal the region selector: the form hides it behind an
    /// "administrative area query" mode button.
    async fn open_region_menu(&mut self) -> Result<(), ScrapeError> {
        let t = &self.cfg.timeouts;
        self.driver
            .click_first(&REGION_MENU_BUTTONS, t.control())
            .await
            .map_err(|source| nav_err(NavStep::RegionMenu, source))?;
        self.driver.settle(t.settle()).await;
        Ok(())
    }

    async fn select_region(&mut self) -> Result<(), ScrapeError> {
        let t = &self.cfg.timeouts;
        let step = NavStep::SelectRegion;

        self.driver
            .wait_for(
                &format!("document.querySelector('{REGION_SELECT}')"),
                t.option_wait(),
            )
            .await
            .map_err(|source| nav_err(step, source))?;

        let region_term = self.cfg.region.clone();
        let region = self
            .resolve_option(REGION_SELECT, &region_term)
            .await
            .map_err(|source| nav_err(step, source))?
            .ok_or_else(|| {
                nav_err(
                    step,
                    DriverError::NotFound(format!("region option {:?}", self.cfg.region)),
                )
            })?;
        tracing::debug!(region = %region.display_name, value = %region.option_value, "resolved region option");

        self.driver
            .select_option(REGION_SELECT, &region.option_value, t.control())
            .await
            .map_err(|source| nav_err(step, source))?;
        Ok(())
    }

    /// Wait for the dependent sub-region list to populate.
    ///
    /// Detected by a length-based condition on the option count; if that
    /// times out, a fixed settle delay is the best-effort compromise because
    /// the page gives no completion signal.
    async fn await_sub_region_list(&mut self) -> Result<(), ScrapeError> {
        let t = &self.cfg.timeouts;
        let populated = format!(
            "document.querySelector('{SUB_REGION_SELECT}') && \
             document.querySelector('{SUB_REGION_SELECT}').options.length > 1"
        );
        match self.driver.wait_for(&populated, t.option_wait()).await {
            Ok(()) => Ok(()),
            Err(DriverError::TimedOut(_)) => {
                tracing::warn!("sub-region list never signalled completion, settling instead");
                self.driver.settle(t.settle()).await;
                Ok(())
            }
            Err(source) => Err(nav_err(NavStep::SubRegionList, source)),
        }
    }

    async fn select_sub_region(&mut self, target: SubRegionTarget<'_>) -> Result<(), ScrapeError> {
        let t = &self.cfg.timeouts;
        let step = NavStep::SelectSubRegion;

        let value = match target {
            SubRegionTarget::All => ALL_SUB_REGIONS_VALUE.to_string(),
            SubRegionTarget::Named(name) => self
                .resolve_option(SUB_REGION_SELECT, name)
                .await
                .map_err(|source| nav_err(step, source))?
                .ok_or_else(|| {
                    nav_err(step, DriverError::NotFound(format!("sub-region option {name:?}")))
                })?
                .option_value,
        };

        match self
            .driver
            .select_option(SUB_REGION_SELECT, &value, t.control())
            .await
        {
            Ok(()) => Ok(()),
            // Fallback: take whatever option the select currently offers first
            Err(primary) => {
                tracing::warn!(%primary, "sub-region select failed, falling back to first option");
                let first = self
                    .driver
                    .run_script(&format!(
                        r#"(() => {{
                            const sel = document.querySelector('{SUB_REGION_SELECT}');
                            if (!sel || sel.options.length === 0) return false;
                            sel.value = sel.options[0].value;
                            sel.dispatchEvent(new Event('change', {{ bubbles: true }}));
                            return true;
                        }})()"#
                    ))
                    .await
                    .map_err(|source| nav_err(step, source))?;
                if first.as_bool().unwrap_or(false) {
                    Ok(())
                } else {
                    Err(nav_err(step, primary))
                }
            }
        }?;
        self.driver.settle(t.settle()).await;
        Ok(())
    }

    /// Select the category: radio button first, then the category `<select>`,
    /// each with its scripted fallback inside the driver.
    async fn select_category(&mut self) -> Result<(), ScrapeError> {
        let t = &self.cfg.timeouts;
        let radio = format!(
            "input[type=\"radio\"][value=\"{}\"]",
            self.cfg.category_label
        );

        if self.driver.click_first(&[radio.as_str()], t.control()).await.is_ok() {
            self.driver.settle(t.settle()).await;
            return Ok(());
        }
        tracing::warn!("category radio button not found, falling back to select");

        self.driver
            .select_option(CATEGORY_SELECT, &self.cfg.category_value, t.control())
            .await
            .map_err(|source| nav_err(NavStep::SelectCategory, source))?;
        self.driver.settle(t.settle()).await;
        Ok(())
    }

    async fn submit(&mut self) -> Result<(), ScrapeError> {
        let t = &self.cfg.timeouts;
        if self
            .driver
            .click_first(&[SUBMIT_BUTTON], t.control())
            .await
            .is_err()
        {
            tracing::warn!("submit button not clickable, calling page submit function");
            self.driver
                .run_script(SUBMIT_SCRIPT)
                .await
                .map_err(|source| nav_err(NavStep::Submit, source))?;
        }
        Ok(())
    }

    /// Wait for the results listing to show entity names, then settle.
    ///
    /// Absence of the keyword is not fatal: some result sets legitimately
    /// render slowly or empty, and the listing extractor copes.
    async fn await_results(&mut self) -> Result<(), ScrapeError> {
        let t = &self.cfg.timeouts;
        let keywords = self
            .cfg
            .name_keywords
            .iter()
            .map(|k| format!("document.body.textContent.includes('{k}')"))
            .collect::<Vec<_>>()
            .join(" || ");
        if !keywords.is_empty() {
            if let Err(e) = self.driver.wait_for(&keywords, t.option_wait()).await {
                tracing::warn!(%e, "no entity keyword detected in results, parsing anyway");
            }
        }
        self.driver.settle(t.results_settle()).await;
        Ok(())
    }

    /// Match a display-name search term against the live option list.
    async fn resolve_option(
        &mut self,
        select: &str,
        term: &str,
    ) -> Result<Option<SelectorOption>, DriverError> {
        let options = self.driver.select_options(select).await?;
        tracing::debug!(select, count = options.len(), "resolved live options");
        Ok(options
            .into_iter()
            .find(|o| o.display_name.contains(term)))
    }
}

fn nav_err(step: NavStep, source: DriverError) -> ScrapeError {
    ScrapeError::NavigationFailed { step, source }
}
