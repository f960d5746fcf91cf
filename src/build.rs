use anyhow::Context as _;

use crate::cli::{BuildArgs, ConvertArgs};

pub async fn run(args: BuildArgs) -> anyhow::Result<()> {
    let targets = args.crawl.targets.clone();

    tracing::info!(data_dir = %targets.data_dir, "build: crawl");
    crate::crawl::run(args.crawl).await.context("crawl")?;

    tracing::info!(data_dir = %targets.data_dir, "build: convert");
    crate::assemble::run(ConvertArgs { targets })
        .await
        .context("convert")?;

    Ok(())
}
