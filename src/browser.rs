//! Headless-browser pool.
//!
//! Transcript share pages are single-page apps whose useful state only
//! exists after client-side rendering, so extraction needs a real browser.
//! The pool launches one browser process per session; callers get a scoped
//! [`BrowserSession`] whose operations share a single overall timeout and
//! whose resources are released on close.

use anyhow::{Context, Result};
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::page::Page;
use futures::StreamExt;
use std::time::Duration;
use tokio::task::JoinHandle;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Factory for scoped browser sessions.
pub struct BrowserPool {
    headless: bool,
    timeout: Duration,
}

impl BrowserPool {
    /// Visible mode (`headless = false`) is used for interactive logins.
    pub fn new(headless: bool) -> Self {
        Self {
            headless,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Override the overall per-session timeout.
    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    /// Launch a browser and return a session scoped to it.
    pub async fn session(&self) -> Result<BrowserSession> {
        let mut builder = BrowserConfig::builder()
            .window_size(1280, 900)
            .args(vec![
                "--no-first-run",
                "--no-default-browser-check",
                "--disable-extensions",
                "--disable-sync",
            ]);
        if !self.headless {
            builder = builder.with_head();
        }

        let config = builder
            .build()
            .map_err(|e| anyhow::anyhow!("building browser config: {}", e))?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .context("launching browser")?;

        // The handler stream must be drained for the CDP connection to make
        // progress; it ends when the browser process exits.
        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    break;
                }
            }
        });

        Ok(BrowserSession {
            browser,
            handler_task,
            timeout: self.timeout,
        })
    }
}

/// One launched browser. Close releases the process and all of its pages.
pub struct BrowserSession {
    browser: Browser,
    handler_task: JoinHandle<()>,
    timeout: Duration,
}

impl BrowserSession {
    /// The overall timeout the caller should apply to work in this session.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Open a new page without navigating anywhere yet.
    pub async fn new_page(&self) -> Result<Page> {
        self.browser
            .new_page("about:blank")
            .await
            .context("opening browser page")
    }

    /// Close the browser and stop the event handler.
    pub async fn close(mut self) {
        let _ = self.browser.close().await;
        let _ = self.browser.wait().await;
        self.handler_task.abort();
    }
}
