use anyhow::{anyhow, Context, Result};
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::network::CookieParam;
use chromiumoxide::element::Element;
use chromiumoxide::Page;
use futures::StreamExt;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::{Config, Credentials};

/// Owns the browser process, the CDP event handler, and the authenticated
/// session snapshot shared by all task contexts.
///
/// The snapshot is captured exactly once after login and applied read-only to
/// every page created afterwards; it is never refreshed during a run.
pub struct BrowserSession {
    browser: Browser,
    handler: JoinHandle<()>,
    user_agent: String,
    session_cookies: Vec<CookieParam>,
}

impl BrowserSession {
    /// Launch the browser and start draining its CDP event stream.
    pub async fn launch(config: &Config) -> Result<Self> {
        info!("🚀 Launching browser (headless: {})", config.headless);

        let mut builder = BrowserConfig::builder();
        if !config.headless {
            builder = builder.with_head();
        }
        let browser_config = builder.build().map_err(|e| anyhow!(e))?;

        let (browser, mut handler) = Browser::launch(browser_config)
            .await
            .context("failed to launch browser")?;

        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    break;
                }
            }
        });

        Ok(Self {
            browser,
            handler,
            user_agent: config.user_agent.clone(),
            session_cookies: Vec::new(),
        })
    }

    /// Log in on a dedicated page and snapshot the session cookies.
    ///
    /// Login failure is fatal to the run: no per-id processing can proceed
    /// without an authenticated session.
    pub async fn login(&mut self, config: &Config, credentials: &Credentials) -> Result<()> {
        info!("🔐 Logging in at {}", config.login_url);

        let page = self.blank_page().await?;
        let outcome = self.perform_login(&page, config, credentials).await;
        let snapshot = match outcome {
            Ok(()) => self.snapshot_cookies(&page).await,
            Err(e) => Err(e),
        };
        if let Err(e) = page.close().await {
            warn!("Failed to close login page: {}", e);
        }

        self.session_cookies = snapshot?;
        info!(
            "✅ Login confirmed; captured {} session cookies",
            self.session_cookies.len()
        );
        Ok(())
    }

    async fn perform_login(
        &self,
        page: &Page,
        config: &Config,
        credentials: &Credentials,
    ) -> Result<()> {
        navigate(page, &config.login_url, config.navigation_timeout()).await?;

        let user_input =
            find_element(page, r#"input[name="email"]"#, config.element_timeout()).await?;
        user_input.click().await?;
        user_input.type_str(&credentials.username).await?;

        let pass_input =
            find_element(page, r#"input[name="password"]"#, config.element_timeout()).await?;
        pass_input.click().await?;
        pass_input.type_str(&credentials.password).await?;

        let submit =
            find_element(page, r#"button[type="submit"]"#, config.element_timeout()).await?;
        submit.click().await?;

        tokio::time::timeout(config.navigation_timeout(), page.wait_for_navigation())
            .await
            .map_err(|_| anyhow!("timed out waiting for post-login navigation"))??;

        // The portal redirects on success; an unchanged URL means rejected
        // credentials.
        let current = page.url().await?.unwrap_or_default();
        debug!("Post-login URL: {}", current);
        if current == config.login_url {
            return Err(anyhow!("login failed: URL did not change after submit"));
        }

        Ok(())
    }

    async fn snapshot_cookies(&self, page: &Page) -> Result<Vec<CookieParam>> {
        let cookies = page.get_cookies().await?;
        cookies
            .into_iter()
            .map(|cookie| {
                CookieParam::builder()
                    .name(cookie.name)
                    .value(cookie.value)
                    .domain(cookie.domain)
                    .path(cookie.path)
                    .secure(cookie.secure)
                    .http_only(cookie.http_only)
                    .build()
                    .map_err(|e| anyhow!("invalid session cookie: {}", e))
            })
            .collect()
    }

    /// Open a fresh page seeded with the session snapshot.
    ///
    /// This is the isolated execution context for one task attempt; the
    /// caller must close it before the attempt concludes.
    pub async fn new_page(&self) -> Result<Page> {
        let page = self.blank_page().await?;
        if !self.session_cookies.is_empty() {
            page.set_cookies(self.session_cookies.clone()).await?;
        }
        Ok(page)
    }

    async fn blank_page(&self) -> Result<Page> {
        let page = self.browser.new_page("about:blank").await?;
        page.set_user_agent(self.user_agent.as_str()).await?;
        Ok(page)
    }

    /// Shut the browser down; called once at run end regardless of how many
    /// task units failed.
    pub async fn close(mut self) -> Result<()> {
        if let Err(e) = self.browser.close().await {
            warn!("Browser close reported an error: {}", e);
        }
        let _ = self.browser.wait().await;
        self.handler.abort();
        info!("Browser closed");
        Ok(())
    }
}

/// Navigate a page and wait until the document has loaded.
pub async fn navigate(page: &Page, url: &str, timeout: Duration) -> Result<()> {
    debug!("Navigating to {}", url);
    tokio::time::timeout(timeout, async {
        page.goto(url).await?;
        page.wait_for_navigation().await?;
        anyhow::Ok(())
    })
    .await
    .map_err(|_| anyhow!("navigation to {} timed out", url))??;
    Ok(())
}

/// Look an element up, retrying until it appears or the timeout elapses.
///
/// CDP has no server-side "wait for selector", so presence is re-checked at a
/// short interval like the rest of the pack's browser code does.
pub async fn find_element(page: &Page, selector: &str, timeout: Duration) -> Result<Element> {
    let deadline = Instant::now() + timeout;
    loop {
        match page.find_element(selector).await {
            Ok(element) => return Ok(element),
            Err(_) if Instant::now() < deadline => {
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
            Err(e) => {
                return Err(anyhow!(
                    "element {} not found within {:.1}s: {}",
                    selector,
                    timeout.as_secs_f64(),
                    e
                ));
            }
        }
    }
}
