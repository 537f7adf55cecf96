//! `BrowserWrapper`: owns a launched [`Browser`] plus its CDP event-handler
//! task and temp profile directory, and ties their teardown together.

use anyhow::{Context, Result};
use chromiumoxide::browser::Browser;
use chromiumoxide::page::Page;
use std::path::PathBuf;
use tokio::task::JoinHandle;
use tracing::info;

use crate::config::AppConfig;

pub struct BrowserWrapper {
    browser: Browser,
    handler: JoinHandle<()>,
    user_data_dir: Option<PathBuf>,
}

impl BrowserWrapper {
    pub(crate) fn new(browser: Browser, handler: JoinHandle<()>, user_data_dir: PathBuf) -> Self {
        Self {
            browser,
            handler,
            user_data_dir: Some(user_data_dir),
        }
    }

    pub(crate) fn browser(&self) -> &Browser {
        &self.browser
    }

    pub(crate) fn browser_mut(&mut self) -> &mut Browser {
        &mut self.browser
    }

    /// Clean up the temp profile dir. Must run after `browser.wait()`
    /// completes so Chrome has released all file handles.
    pub fn cleanup_temp_dir(&mut self) {
        if let Some(path) = self.user_data_dir.take() {
            info!("cleaning up temp directory: {}", path.display());
            if let Err(e) = std::fs::remove_dir_all(&path) {
                tracing::warn!("failed to clean up temp directory {}: {}", path.display(), e);
            }
        }
    }
}

impl Drop for BrowserWrapper {
    fn drop(&mut self) {
        self.handler.abort();
        if self.user_data_dir.is_some() {
            tracing::warn!(
                "BrowserWrapper dropped without explicit cleanup; temp directory orphaned: {}",
                self.user_data_dir.as_ref().unwrap().display()
            );
        }
    }
}

/// Launch a new browser instance with stealth configuration.
pub async fn launch_browser(config: &AppConfig) -> Result<(Browser, JoinHandle<()>, PathBuf)> {
    info!("launching main browser instance");

    let user_data_dir = std::env::temp_dir().join(format!("deep_research_main_{}", std::process::id()));

    let (browser, handler) = super::setup::launch_browser(
        config.browser.headless,
        Some(user_data_dir.clone()),
        config.browser.disable_security,
    )
    .await?;

    Ok((browser, handler, user_data_dir))
}

/// Create a blank page, required before stealth injection and navigation.
pub async fn create_blank_page(wrapper: &BrowserWrapper) -> Result<Page> {
    wrapper
        .browser()
        .new_page("about:blank")
        .await
        .context("failed to create blank page")
}
