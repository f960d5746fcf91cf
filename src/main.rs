use std::process::ExitCode;

use anyhow::Context as _;
use clap::Parser as _;

#[tokio::main]
async fn main() -> ExitCode {
    if let Err(err) = try_main().await {
        eprintln!("{err:#}");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

async fn try_main() -> anyhow::Result<()> {
    medical_rag::logging::init().context("init logging")?;

    let cli = medical_rag::cli::Cli::parse();
    tracing::debug!(?cli, "parsed cli");

    match cli.command {
        medical_rag::cli::Command::Crawl(args) => {
            medical_rag::crawl::run(args).await.context("crawl")?;
        }
        medical_rag::cli::Command::Convert(args) => {
            medical_rag::assemble::run(args).await.context("convert")?;
        }
        medical_rag::cli::Command::Build(args) => {
            medical_rag::build::run(args).await.context("build")?;
        }
        medical_rag::cli::Command::Index(args) => {
            medical_rag::index::run(args).await.context("index")?;
        }
        medical_rag::cli::Command::Ask(args) => {
            medical_rag::ask::run(args).await.context("ask")?;
        }
    }

    Ok(())
}
