use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context as _;
use tokio::sync::Semaphore;
use url::Url;

use crate::cli::{CrawlArgs, FetchEngine};
use crate::fetch::{BrowserFetcher, FetchSettings, HtmlFetcher, HttpFetcher};
use crate::formats::{DetailPage, MenuCategory};
use crate::menu::extract_menu_structure;
use crate::raw_store;
use crate::retry::{RetryPolicy, with_retry};
use crate::targets::{self, Target};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CrawlOptions {
    pub retry: RetryPolicy,
    pub target_concurrency: usize,
    pub page_concurrency: usize,
    pub skip_existing: bool,
}

impl Default for CrawlOptions {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            target_concurrency: 1,
            page_concurrency: 1,
            skip_existing: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetReport {
    pub target_id: String,
    pub categories: usize,
    pub fetched: usize,
    pub skipped: usize,
}

pub async fn run(args: CrawlArgs) -> anyhow::Result<()> {
    let targets = targets::load(
        args.targets.targets.as_deref().map(Path::new),
        &args.targets.only,
    )
    .context("load targets")?;
    let data_dir = PathBuf::from(&args.targets.data_dir);

    let settings = FetchSettings {
        operation_timeout: Duration::from_secs(args.operation_timeout_secs),
        navigation_timeout: Duration::from_secs(args.navigation_timeout_secs),
        settle: Duration::from_millis(args.settle_ms),
    };
    let options = CrawlOptions {
        retry: RetryPolicy::new(args.max_attempts, Duration::from_millis(args.retry_delay_ms)),
        target_concurrency: args.target_concurrency,
        page_concurrency: args.page_concurrency,
        skip_existing: args.skip_existing,
    };

    tracing::info!(
        targets = targets.len(),
        engine = ?args.engine,
        data_dir = %data_dir.display(),
        "starting crawl"
    );

    let reports = match args.engine {
        FetchEngine::Browser => {
            let fetcher = BrowserFetcher::new(settings);
            let result = crawl_targets(&fetcher, &data_dir, &targets, &options).await;
            fetcher.shutdown().await;
            result?
        }
        FetchEngine::Http => {
            let fetcher = HttpFetcher::new(settings)?;
            crawl_targets(&fetcher, &data_dir, &targets, &options).await?
        }
    };

    let pages = reports.iter().map(|r| r.fetched + r.skipped).sum::<usize>();
    tracing::info!(targets = reports.len(), pages, "crawl completed");
    Ok(())
}

/// Crawls every target under the outer limiter. Detail fetches of all
/// targets share one page limiter. The first failed target fails the run.
pub async fn crawl_targets(
    fetcher: &dyn HtmlFetcher,
    data_dir: &Path,
    targets: &[Target],
    options: &CrawlOptions,
) -> anyhow::Result<Vec<TargetReport>> {
    let target_limit = Semaphore::new(options.target_concurrency.max(1));
    let page_limit = Semaphore::new(options.page_concurrency.max(1));

    let jobs = targets.iter().map(|target| {
        let target_limit = &target_limit;
        let page_limit = &page_limit;
        async move {
            let _permit = target_limit
                .acquire()
                .await
                .context("acquire target permit")?;
            crawl_target(fetcher, data_dir, target, options, page_limit)
                .await
                .with_context(|| format!("crawl target {} ({})", target.id, target.name))
        }
    });
    futures::future::try_join_all(jobs).await
}

/// Entry page, menu structure, then every detail page in menu order.
///
/// The summary page and menu structure are written before any detail fetch
/// starts. A detail page that exhausts its retries fails the whole target and
/// drops the fetches still pending.
pub async fn crawl_target(
    fetcher: &dyn HtmlFetcher,
    data_dir: &Path,
    target: &Target,
    options: &CrawlOptions,
    page_limit: &Semaphore,
) -> anyhow::Result<TargetReport> {
    tracing::info!(target_id = %target.id, name = %target.name, "crawling target");

    let entry_url =
        Url::parse(&target.url).with_context(|| format!("parse entry url: {}", target.url))?;
    let entry_html = fetcher
        .fetch_html(entry_url.as_str())
        .await
        .with_context(|| format!("fetch entry page: {entry_url}"))?;

    let menu = extract_menu_structure(&entry_html, target);
    let base = base_url(&entry_url);

    let summary_path =
        raw_store::html_path(data_dir, &target.id, None, raw_store::SUMMARY_PAGE);
    raw_store::write_html(&summary_path, &entry_html).await?;
    raw_store::save_menu_structure(data_dir, &menu).await?;

    tracing::info!(
        target_id = %target.id,
        categories = menu.categories.len(),
        pages = menu.page_count(),
        "menu structure saved; fetching detail pages"
    );

    let jobs = menu
        .categories
        .iter()
        .flat_map(|category| category.pages.iter().map(move |page| (category, page)))
        .map(|(category, page)| {
            fetch_detail_page(fetcher, data_dir, target, &base, category, page, options, page_limit)
        });
    let outcomes = futures::future::try_join_all(jobs).await?;

    let fetched = outcomes
        .iter()
        .filter(|outcome| **outcome == PageOutcome::Fetched)
        .count();
    let report = TargetReport {
        target_id: target.id.clone(),
        categories: menu.categories.len(),
        fetched,
        skipped: outcomes.len() - fetched,
    };
    tracing::info!(
        target_id = %report.target_id,
        fetched = report.fetched,
        skipped = report.skipped,
        "target crawled"
    );
    Ok(report)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PageOutcome {
    Fetched,
    AlreadyStored,
}

#[allow(clippy::too_many_arguments)]
async fn fetch_detail_page(
    fetcher: &dyn HtmlFetcher,
    data_dir: &Path,
    target: &Target,
    base: &Url,
    category: &MenuCategory,
    page: &DetailPage,
    options: &CrawlOptions,
    page_limit: &Semaphore,
) -> anyhow::Result<PageOutcome> {
    let path = raw_store::html_path(data_dir, &target.id, Some(&category.name_en), &page.title_en);
    if options.skip_existing && tokio::fs::try_exists(&path).await.unwrap_or(false) {
        tracing::debug!(path = %path.display(), "already stored; skipping");
        return Ok(PageOutcome::AlreadyStored);
    }

    let url = base
        .join(&page.url)
        .with_context(|| format!("resolve page url {} against {base}", page.url))?;

    let _permit = page_limit.acquire().await.context("acquire page permit")?;
    tracing::info!(category = %category.name, page = %page.title, url = %url, "fetching detail page");

    let url_str = url.as_str();
    let html = with_retry(options.retry, move || fetcher.fetch_html(url_str))
        .await
        .with_context(|| format!("fetch detail page {} / {}", category.name, page.title))?;
    raw_store::write_html(&path, &html).await?;
    Ok(PageOutcome::Fetched)
}

/// The entry URL's origin and directory: query and fragment dropped, last
/// path segment stripped.
pub fn base_url(entry: &Url) -> Url {
    let mut base = entry.clone();
    base.set_query(None);
    base.set_fragment(None);
    if let Ok(mut segments) = base.path_segments_mut() {
        segments.pop().push("");
    }
    base
}
