use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context as _;
use clap::Parser as _;

use medical_rag::cli::ServerCli;
use medical_rag::server::{self, AppState};

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

    let args = ServerCli::parse();
    tracing::info!(?args, "starting medical-rag-server");

    let rag = medical_rag::rag::build_service(&args.rag)
        .await
        .context("initialize rag service")?;
    server::serve(&args.addr, AppState { rag: Arc::new(rag) }).await
}
