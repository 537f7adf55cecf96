//! C1 — Browser lifecycle manager.
//!
//! Owns a single headless browser instance behind a mutex; provides healed
//! handles; relaunches on disconnect. Grounded on the donor's
//! `BrowserManager` singleton shape, generalized with the reason-tagged
//! relaunch and generation counter used by `browser_lifecycle.py`.

use anyhow::Result;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::browser::wrapper::{launch_browser, BrowserWrapper};
use crate::config::AppConfig;
use crate::error::{BrowserError, BrowserResult};

static GLOBAL_MANAGER: OnceLock<Arc<BrowserManager>> = OnceLock::new();

/// Singleton manager for the shared headless browser, with health checking,
/// reason-tagged relaunch, and a monotonic generation counter so callers can
/// detect a handle swap.
pub struct BrowserManager {
    browser: Mutex<Option<BrowserWrapper>>,
    config: AppConfig,
    generation: AtomicU64,
    relaunch_count: AtomicU64,
    disconnect_logged: AtomicBool,
}

impl BrowserManager {
    #[must_use]
    pub fn global() -> Arc<BrowserManager> {
        GLOBAL_MANAGER
            .get_or_init(|| Arc::new(BrowserManager::new(AppConfig::default())))
            .clone()
    }

    pub fn new(config: AppConfig) -> Self {
        Self {
            browser: Mutex::new(None),
            config,
            generation: AtomicU64::new(0),
            relaunch_count: AtomicU64::new(0),
            disconnect_logged: AtomicBool::new(false),
        }
    }

    /// Force a launch, even if a healthy browser already exists.
    pub async fn start(&self) -> BrowserResult<()> {
        self.relaunch("startup", true).await
    }

    /// Current generation: bumped on every successful relaunch. Lets
    /// long-lived callers detect that their handle has been swapped out.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    pub fn relaunch_count(&self) -> u64 {
        self.relaunch_count.load(Ordering::SeqCst)
    }

    /// Return a healthy handle, relaunching transparently if the current
    /// browser (if any) has disconnected. Never returns a disconnected handle.
    pub async fn get(&self) -> BrowserResult<()> {
        let healthy = {
            let guard = self.browser.lock().await;
            match guard.as_ref() {
                Some(wrapper) => wrapper.browser().version().await.is_ok(),
                None => false,
            }
        };

        if !healthy {
            self.relaunch("health_check_failed", false).await?;
        }
        Ok(())
    }

    /// Run `f` with a reference to the live browser, relaunching first if
    /// unhealthy. This is the primary entry point scrape/PDF code uses.
    pub async fn with_browser<F, T>(&self, f: F) -> BrowserResult<T>
    where
        F: for<'a> FnOnce(
            &'a chromiumoxide::browser::Browser,
        ) -> std::pin::Pin<Box<dyn std::future::Future<Output = BrowserResult<T>> + Send + 'a>>,
    {
        self.get().await?;
        let guard = self.browser.lock().await;
        let wrapper = guard
            .as_ref()
            .ok_or_else(|| BrowserError::LaunchFailed("browser not available after relaunch".into()))?;
        f(wrapper.browser()).await
    }

    pub async fn is_connected(&self) -> bool {
        let guard = self.browser.lock().await;
        match guard.as_ref() {
            Some(wrapper) => wrapper.browser().version().await.is_ok(),
            None => false,
        }
    }

    /// Close the old browser (best-effort), launch a new one, bump the
    /// generation counter, and attach the one-shot disconnect log.
    ///
    /// `force=false` is a no-op if the current browser is already healthy.
    pub async fn relaunch(&self, reason: &str, force: bool) -> BrowserResult<()> {
        let mut guard = self.browser.lock().await;

        if !force
            && let Some(wrapper) = guard.as_ref()
            && wrapper.browser().version().await.is_ok()
        {
            return Ok(());
        }

        if let Some(mut old) = guard.take() {
            let _ = old.browser_mut().close().await;
            let _ = old.browser_mut().wait().await;
            old.cleanup_temp_dir();
        }

        info!("relaunching browser (reason={reason})");
        let (browser, handler, user_data_dir) = launch_browser(&self.config)
            .await
            .map_err(|e| BrowserError::LaunchFailed(e.to_string()))?;
        *guard = Some(BrowserWrapper::new(browser, handler, user_data_dir));

        self.generation.fetch_add(1, Ordering::SeqCst);
        if reason != "startup" {
            self.relaunch_count.fetch_add(1, Ordering::SeqCst);
        }
        self.disconnect_logged.store(false, Ordering::SeqCst);

        Ok(())
    }

    /// Idempotent teardown.
    pub async fn stop(&self) -> Result<()> {
        let mut guard = self.browser.lock().await;
        if let Some(mut wrapper) = guard.take() {
            info!("shutting down browser");
            if let Err(e) = wrapper.browser_mut().close().await {
                warn!("failed to close browser cleanly: {e}");
            }
            if let Err(e) = wrapper.browser_mut().wait().await {
                warn!("failed to wait for browser exit: {e}");
            }
            wrapper.cleanup_temp_dir();
        }
        Ok(())
    }

    /// Alias kept for symmetry with `stop()` callers expecting the donor's
    /// `shutdown()` name.
    pub async fn shutdown(&self) -> Result<()> {
        self.stop().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fresh_manager_reports_disconnected() {
        let manager = BrowserManager::new(AppConfig::default());
        assert!(!manager.is_connected().await);
        assert_eq!(manager.generation(), 0);
        assert_eq!(manager.relaunch_count(), 0);
    }
}
