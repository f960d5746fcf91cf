use std::future::Future;
use std::time::Duration;

use anyhow::Context as _;
use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::network::SetUserAgentOverrideParams;
use chromiumoxide::cdp::browser_protocol::page::{EventLoadEventFired, NavigateParams};
use chromiumoxide::Page;
use futures::StreamExt as _;
use reqwest::header::{ACCEPT, USER_AGENT};
use tokio::sync::OnceCell;
use tokio::task::JoinHandle;

pub const DESKTOP_USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchSettings {
    /// Upper bound for a single page operation (tab creation, header
    /// override, content capture, close).
    pub operation_timeout: Duration,
    /// Upper bound for a navigation started by `fetch_html`.
    pub navigation_timeout: Duration,
    /// Pause after the load event so client-side rendering can finish.
    pub settle: Duration,
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            operation_timeout: Duration::from_secs(30),
            navigation_timeout: Duration::from_secs(60),
            settle: Duration::from_secs(2),
        }
    }
}

/// Returns the rendered HTML of a URL. Implementations do not retry.
#[async_trait]
pub trait HtmlFetcher: Send + Sync {
    async fn fetch_html(&self, url: &str) -> anyhow::Result<String>;
}

async fn with_timeout<T, F>(limit: Duration, what: &str, fut: F) -> anyhow::Result<T>
where
    F: Future<Output = anyhow::Result<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => anyhow::bail!("{what} timed out after {}s", limit.as_secs()),
    }
}

struct BrowserSession {
    browser: Browser,
    handler: JoinHandle<()>,
}

/// Headless Chromium, launched on the first fetch and shared by every fetch
/// after it. Each fetch gets its own tab.
///
/// Call [`BrowserFetcher::shutdown`] when the run is over. Dropping the
/// fetcher without it still kills the browser process.
pub struct BrowserFetcher {
    settings: FetchSettings,
    session: OnceCell<BrowserSession>,
}

impl BrowserFetcher {
    pub fn new(settings: FetchSettings) -> Self {
        Self {
            settings,
            session: OnceCell::new(),
        }
    }

    async fn browser(&self) -> anyhow::Result<&Browser> {
        let session = self
            .session
            .get_or_try_init(|| launch_browser(self.settings))
            .await?;
        Ok(&session.browser)
    }

    async fn open_page(&self) -> anyhow::Result<Page> {
        let browser = self.browser().await?;
        let limit = self.settings.operation_timeout;
        let page = with_timeout(limit, "open tab", async {
            browser.new_page("about:blank").await.context("open tab")
        })
        .await?;

        let spoofed = with_timeout(limit, "set user agent", async {
            page.set_user_agent(SetUserAgentOverrideParams::new(DESKTOP_USER_AGENT))
                .await
                .context("set user agent")?;
            Ok(())
        })
        .await;
        if let Err(err) = spoofed {
            close_page(page, limit).await;
            return Err(err);
        }
        Ok(page)
    }

    async fn capture(&self, page: &Page, url: &str) -> anyhow::Result<String> {
        with_timeout(
            self.settings.navigation_timeout,
            "navigation",
            navigate(page, url),
        )
        .await?;

        tokio::time::sleep(self.settings.settle).await;

        with_timeout(self.settings.operation_timeout, "capture content", async {
            page.content().await.context("capture page content")
        })
        .await
    }

    /// Closes the browser if one was launched.
    pub async fn shutdown(self) {
        let Some(mut session) = self.session.into_inner() else {
            return;
        };
        if let Err(err) = session.browser.close().await {
            tracing::warn!(error = %err, "close browser");
        }
        if let Err(err) = session.browser.wait().await {
            tracing::warn!(error = %err, "wait for browser exit");
        }
        session.handler.abort();
        tracing::info!("browser closed");
    }
}

/// Navigates and waits for the load event. Network idle is never awaited; the
/// site keeps background requests open.
async fn navigate(page: &Page, url: &str) -> anyhow::Result<()> {
    let mut loaded = page
        .event_listener::<EventLoadEventFired>()
        .await
        .context("subscribe to load events")?;
    let response = page
        .execute(NavigateParams::new(url))
        .await
        .with_context(|| format!("navigate to {url}"))?;
    if let Some(error) = response.result.error_text.as_deref() {
        anyhow::bail!("navigate to {url}: {error}");
    }
    loaded
        .next()
        .await
        .with_context(|| format!("tab closed before {url} finished loading"))?;
    Ok(())
}

/// CDP commands share one handler timeout, and a navigation is a single
/// command, so it must cover the navigation budget.
fn request_timeout(settings: FetchSettings) -> Duration {
    settings.navigation_timeout.max(settings.operation_timeout)
}

async fn launch_browser(settings: FetchSettings) -> anyhow::Result<BrowserSession> {
    tracing::info!("launching headless browser");
    let config = BrowserConfig::builder()
        .no_sandbox()
        .arg("--disable-setuid-sandbox")
        .request_timeout(request_timeout(settings))
        .build()
        .map_err(|err| anyhow::anyhow!("build browser config: {err}"))?;

    let (browser, mut events) = Browser::launch(config)
        .await
        .context("launch headless browser")?;
    let handler = tokio::spawn(async move {
        while let Some(event) = events.next().await {
            if let Err(err) = event {
                tracing::debug!(error = %err, "browser handler event error");
            }
        }
    });

    tracing::info!("browser launched");
    Ok(BrowserSession { browser, handler })
}

async fn close_page(page: Page, limit: Duration) {
    match tokio::time::timeout(limit, page.close()).await {
        Ok(Ok(())) => {}
        Ok(Err(err)) => tracing::warn!(error = %err, "close tab"),
        Err(_) => tracing::warn!("close tab timed out"),
    }
}

#[async_trait]
impl HtmlFetcher for BrowserFetcher {
    async fn fetch_html(&self, url: &str) -> anyhow::Result<String> {
        let page = self.open_page().await?;
        tracing::info!(url, "fetching");

        // The tab is closed on every path; the browser stays up.
        let result = self.capture(&page, url).await;
        close_page(page, self.settings.operation_timeout).await;

        match &result {
            Ok(html) => tracing::info!(url, bytes = html.len(), "fetched"),
            Err(err) => tracing::error!(url, error = %format!("{err:#}"), "fetch failed"),
        }
        result
    }
}

/// Plain GET without script execution, for pages that render server-side.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
    settle: Duration,
}

impl HttpFetcher {
    pub fn new(settings: FetchSettings) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(settings.navigation_timeout)
            .connect_timeout(settings.operation_timeout)
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()
            .context("build http client")?;
        Ok(Self {
            client,
            settle: settings.settle,
        })
    }
}

#[async_trait]
impl HtmlFetcher for HttpFetcher {
    async fn fetch_html(&self, url: &str) -> anyhow::Result<String> {
        tracing::info!(url, "fetching");
        let response = self
            .client
            .get(url)
            .header(USER_AGENT, DESKTOP_USER_AGENT)
            .header(ACCEPT, "text/html,application/xhtml+xml;q=0.9,*/*;q=0.8")
            .send()
            .await
            .with_context(|| format!("GET {url}"))?;

        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("GET {url} returned {status}");
        }
        let html = response
            .text()
            .await
            .with_context(|| format!("read body of {url}"))?;

        tokio::time::sleep(self.settle).await;
        tracing::info!(url, bytes = html.len(), "fetched");
        Ok(html)
    }
}
