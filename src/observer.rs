use anyhow::Result;
use chromiumoxide::cdp::browser_protocol::network::EventRequestWillBeSent;
use chromiumoxide::Page;
use futures::StreamExt;
use regex::Regex;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::debug;

/// First-match-wins recorder for outbound request URLs.
///
/// Once a URL has matched, every later offer is ignored, so the observer can
/// keep being fed events without ever replacing the captured URL.
#[derive(Debug)]
pub struct UrlMatcher {
    pattern: Regex,
    found: Option<String>,
}

impl UrlMatcher {
    pub fn new(pattern: Regex) -> Self {
        Self {
            pattern,
            found: None,
        }
    }

    /// Offer one request URL. Returns true only for the first matching URL.
    pub fn offer(&mut self, url: &str) -> bool {
        if self.found.is_some() {
            return false;
        }
        if self.pattern.is_match(url) {
            self.found = Some(url.to_string());
            return true;
        }
        false
    }

    pub fn found(&self) -> Option<&str> {
        self.found.as_deref()
    }
}

/// Watches one page's outbound network requests for the first URL matching a
/// pattern.
///
/// The listener hands the match over a oneshot channel and then detaches
/// itself by dropping the event stream; no further requests are inspected.
pub struct UrlObserver {
    rx: oneshot::Receiver<String>,
    listener: JoinHandle<()>,
}

impl UrlObserver {
    /// Attach to a page before navigation so no early request is missed.
    pub async fn attach(page: &Page, pattern: &Regex) -> Result<Self> {
        let mut events = page.event_listener::<EventRequestWillBeSent>().await?;
        let (tx, rx) = oneshot::channel();
        let mut matcher = UrlMatcher::new(pattern.clone());

        let listener = tokio::spawn(async move {
            while let Some(event) = events.next().await {
                if matcher.offer(event.request.url.as_str()) {
                    debug!("Captured manifest URL: {}", event.request.url);
                    // Receiver may already be gone on the timeout path.
                    let _ = tx.send(event.request.url.clone());
                    break;
                }
            }
        });

        Ok(Self { rx, listener })
    }

    /// Wait until the first matching URL arrives or the timeout elapses.
    ///
    /// The listener is detached on both paths; aborting a task that already
    /// finished after its first match is a no-op.
    pub async fn wait_for_url(self, timeout: Duration) -> Option<String> {
        debug!(
            "Waiting up to {:.1}s for a matching request...",
            timeout.as_secs_f64()
        );
        let outcome = tokio::time::timeout(timeout, self.rx).await;
        self.listener.abort();

        match outcome {
            Ok(Ok(url)) => Some(url),
            _ => None,
        }
    }
}
