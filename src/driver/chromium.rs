//! Chromium-based session driver using chromiumoxide.

use super::{DriverError, DriverResult, PageDriver, ViewHandle};
use crate::record::SelectorOption;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::page::Page;
use futures::StreamExt;
use std::path::PathBuf;
use std::time::{Duration, Instant};

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                          (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36";

/// How often `wait_for` re-evaluates its condition.
const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Find the Chromium binary path.
pub fn find_chromium() -> Option<PathBuf> {
    // 1. EDUGIS_CHROMIUM_PATH env
    if let Ok(p) = std::env::var("EDUGIS_CHROMIUM_PATH") {
        let path = PathBuf::from(&p);
        if path.exists() {
            return Some(path);
        }
    }

    // 2. ~/.edugis/chromium/
    if let Some(home) = dirs::home_dir() {
        let candidates = if cfg!(target_os = "macos") {
            vec![
                home.join(".edugis/chromium/chrome-mac-arm64/Google Chrome for Testing.app/Contents/MacOS/Google Chrome for Testing"),
                home.join(".edugis/chromium/chrome-mac-x64/Google Chrome for Testing.app/Contents/MacOS/Google Chrome for Testing"),
                home.join(".edugis/chromium/chrome"),
            ]
        } else {
            vec![
                home.join(".edugis/chromium/chrome-linux64/chrome"),
                home.join(".edugis/chromium/chrome"),
            ]
        };
        for c in candidates {
            if c.exists() {
                return Some(c);
            }
        }
    }

    // 3. System PATH
    if let Ok(path) = which::which("google-chrome") {
        return Some(path);
    }
    if let Ok(path) = which::which("chromium") {
        return Some(path);
    }
    if let Ok(path) = which::which("chromium-browser") {
        return Some(path);
    }

    // 4. Common macOS locations
    if cfg!(target_os = "macos") {
        let common =
            PathBuf::from("/Applications/Google Chrome.app/Contents/MacOS/Google Chrome");
        if common.exists() {
            return Some(common);
        }
    }

    None
}

/// Chromium-backed session: one browser, one main listing view, plus any
/// secondary views the target site opens per entity.
pub struct ChromiumDriver {
    browser: Browser,
    main: Page,
    /// Snapshot of open views taken by the last `views()` call; index 0 is
    /// always the main view.
    snapshot: Vec<Page>,
}

impl ChromiumDriver {
    /// Launch a headless Chromium instance and open the main view.
    pub async fn launch() -> Result<Self> {
        let chrome_path = find_chromium()
            .context("Chromium not found. Set EDUGIS_CHROMIUM_PATH or install google-chrome.")?;

        let config = BrowserConfig::builder()
            .chrome_executable(chrome_path)
            .arg("--headless=new")
            .arg("--disable-gpu")
            .arg("--no-sandbox")
            .arg("--disable-dev-shm-usage")
            .arg("--disable-extensions")
            .arg("--disable-background-networking")
            .build()
            .map_err(|e| anyhow!("failed to build browser config: {e}"))?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .context("failed to launch Chromium")?;

        // Spawn the handler task
        tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                let _ = event;
            }
        });

        let main = browser
            .new_page("about:blank")
            .await
            .context("failed to create main view")?;
        let _ = main.set_user_agent(USER_AGENT).await;

        Ok(Self {
            browser,
            snapshot: vec![main.clone()],
            main,
        })
    }

    fn view_page(&self, view: ViewHandle) -> DriverResult<Page> {
        self.snapshot
            .get(view.index)
            .cloned()
            .ok_or_else(|| DriverError::NotFound(format!("stale view handle {}", view.index)))
    }

    async fn evaluate(&self, page: &Page, expr: &str) -> DriverResult<serde_json::Value> {
        let result = page
            .evaluate(expr)
            .await
            .map_err(|e| DriverError::Browser(anyhow!("JS execution failed: {e}")))?;
        // `undefined` and friends deserialize to null rather than failing
        Ok(result.into_value().unwrap_or(serde_json::Value::Null))
    }

    async fn html_of(&self, page: &Page) -> DriverResult<String> {
        let value = self
            .evaluate(page, "document.documentElement.outerHTML")
            .await?;
        value
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| DriverError::Browser(anyhow!("page returned no HTML")))
    }

    /// Scripted click fallback: querySelector + synthetic click.
    async fn scripted_click(&self, selector: &str) -> DriverResult<bool> {
        let js = format!(
            r#"(() => {{
                const el = document.querySelector('{}');
                if (!el) return false;
                try {{ el.click(); }} catch (e) {{
                    el.dispatchEvent(new MouseEvent('click', {{ bubbles: true, cancelable: true, view: window }}));
                }}
                return true;
            }})()"#,
            sanitize_js_string(selector)
        );
        Ok(self.evaluate(&self.main, &js).await?.as_bool().unwrap_or(false))
    }
}

#[async_trait]
impl PageDriver for ChromiumDriver {
    async fn navigate(&mut self, url: &str, timeout: Duration) -> DriverResult<()> {
        let result = tokio::time::timeout(timeout, self.main.goto(url)).await;
        match result {
            Ok(Ok(_)) => {
                let _ = self.main.wait_for_navigation().await;
                Ok(())
            }
            Ok(Err(e)) => Err(DriverError::Browser(anyhow!("navigation failed: {e}"))),
            Err(_) => Err(DriverError::TimedOut(timeout)),
        }
    }

    async fn click_first(&mut self, selectors: &[&str], timeout: Duration) -> DriverResult<()> {
        for selector in selectors {
            // Direct path: locate the element and click it
            let found = tokio::time::timeout(timeout, self.main.find_element(*selector)).await;
            match found {
                Ok(Ok(element)) => {
                    let _ = element.scroll_into_view().await;
                    if element.click().await.is_ok() {
                        return Ok(());
                    }
                    tracing::debug!(selector, "direct click failed, trying scripted click");
                }
                Ok(Err(_)) => {}
                Err(_) => return Err(DriverError::TimedOut(timeout)),
            }
            // Scripted fallback for this candidate
            if self.scripted_click(selector).await? {
                return Ok(());
            }
        }
        Err(DriverError::NotFound(selectors.join(", ")))
    }

    async fn select_option(
        &mut self,
        select: &str,
        value: &str,
        timeout: Duration,
    ) -> DriverResult<()> {
        // Direct path: confirm the select exists before scripting it
        let found = tokio::time::timeout(timeout, self.main.find_element(select)).await;
        if let Err(_elapsed) = found {
            return Err(DriverError::TimedOut(timeout));
        }
        // The legacy form reacts to the change event, not the value itself,
        // so the set is always followed by an explicit dispatch.
        let js = format!(
            r#"(() => {{
                const sel = document.querySelector('{}');
                if (!sel) return false;
                sel.value = '{}';
                sel.dispatchEvent(new Event('change', {{ bubbles: true }}));
                return true;
            }})()"#,
            sanitize_js_string(select),
            sanitize_js_string(value)
        );
        if self.evaluate(&self.main, &js).await?.as_bool().unwrap_or(false) {
            Ok(())
        } else {
            Err(DriverError::NotFound(select.to_string()))
        }
    }

    async fn select_options(&mut self, select: &str) -> DriverResult<Vec<SelectorOption>> {
        let js = format!(
            r#"(() => {{
                const sel = document.querySelector('{}');
                if (!sel) return [];
                return [...sel.options].map(o => ({{
                    display_name: (o.textContent || '').trim(),
                    option_value: o.value,
                }}));
            }})()"#,
            sanitize_js_string(select)
        );
        let value = self.evaluate(&self.main, &js).await?;
        serde_json::from_value(value)
            .map_err(|e| DriverError::Browser(anyhow!("malformed option list: {e}")))
    }

    async fn wait_for(&mut self, condition: &str, timeout: Duration) -> DriverResult<()> {
        let start = Instant::now();
        loop {
            let js = format!("(() => {{ try {{ return !!({condition}); }} catch (e) {{ return false; }} }})()");
            if self.evaluate(&self.main, &js).await?.as_bool().unwrap_or(false) {
                return Ok(());
            }
            if start.elapsed() >= timeout {
                return Err(DriverError::TimedOut(timeout));
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    async fn run_script(&mut self, expr: &str) -> DriverResult<serde_json::Value> {
        let main = self.main.clone();
        self.evaluate(&main, expr).await
    }

    async fn page_html(&mut self) -> DriverResult<String> {
        let main = self.main.clone();
        self.html_of(&main).await
    }

    async fn current_url(&mut self) -> DriverResult<String> {
        let url = self
            .main
            .url()
            .await
            .map_err(|e| DriverError::Browser(anyhow!("failed to get URL: {e}")))?
            .map(|u| u.to_string())
            .unwrap_or_default();
        Ok(url)
    }

    async fn views(&mut self) -> DriverResult<Vec<ViewHandle>> {
        let pages = self
            .browser
            .pages()
            .await
            .map_err(|e| DriverError::Browser(anyhow!("failed to list views: {e}")))?;

        self.snapshot = vec![self.main.clone()];
        for page in pages {
            if page.target_id() != self.main.target_id() {
                self.snapshot.push(page);
            }
        }

        Ok((0..self.snapshot.len())
            .map(|index| ViewHandle {
                index,
                is_main: index == 0,
            })
            .collect())
    }

    async fn view_html(&mut self, view: ViewHandle) -> DriverResult<String> {
        let page = self.view_page(view)?;
        self.html_of(&page).await
    }

    async fn close_view(&mut self, view: ViewHandle) -> DriverResult<()> {
        if view.is_main {
            return Ok(());
        }
        let page = self.view_page(view)?;
        let _ = page.close().await;
        let _ = self.main.bring_to_front().await;
        Ok(())
    }

    async fn focus_main(&mut self) -> DriverResult<()> {
        self.main
            .bring_to_front()
            .await
            .map_err(|e| DriverError::Browser(anyhow!("failed to refocus main view: {e}")))?;
        Ok(())
    }

    async fn settle(&mut self, delay: Duration) {
        tokio::time::sleep(delay).await;
    }
}

/// Sanitize a string for safe injection into a JavaScript string literal.
///
/// Escapes everything that could break out of a JS string context, and strips
/// null bytes.
fn sanitize_js_string(s: &str) -> String {
    let mut result = String::with_capacity(s.len() + 8);
    for ch in s.chars() {
        match ch {
            '\\' => result.push_str("\\\\"),
            '\'' => result.push_str("\\'"),
            '"' => result.push_str("\\\""),
            '`' => result.push_str("\\`"),
            '\n' => result.push_str("\\n"),
            '\r' => result.push_str("\\r"),
            '\t' => result.push_str("\\t"),
            '\0' => {}
            '<' => result.push_str("\\x3c"), // Prevent </script> injection
            '>' => result.push_str("\\x3e"),
            _ => result.push(ch),
        }
    }
    result
}
