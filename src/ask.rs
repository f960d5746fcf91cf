use std::io::Write as _;
use std::sync::Arc;

use anyhow::Context as _;
use futures::StreamExt as _;

use crate::cli::AskArgs;
use crate::rag;
use crate::rag::service::{AnswerMode, RagEvent};

pub async fn run(args: AskArgs) -> anyhow::Result<()> {
    let query = args.query.trim();
    if query.is_empty() {
        anyhow::bail!("--query must not be empty");
    }
    let mode = if args.agent {
        AnswerMode::Agent
    } else {
        AnswerMode::Direct
    };

    let service = Arc::new(rag::build_service(&args.rag).await?);
    let mut events = service.answer(query.to_owned(), mode);

    let mut stdout = std::io::stdout();
    while let Some(event) = events.next().await {
        match event {
            RagEvent::Sources { sources } => {
                for (idx, source) in sources.iter().enumerate() {
                    match &source.section {
                        Some(section) => {
                            eprintln!("[{}] {} / {}", idx + 1, source.disease_name, section)
                        }
                        None => eprintln!("[{}] {}", idx + 1, source.disease_name),
                    }
                }
            }
            RagEvent::Chunk { chunk } => {
                stdout.write_all(chunk.as_bytes()).context("write answer")?;
                stdout.flush().context("flush answer")?;
            }
            RagEvent::Done => {
                writeln!(stdout).context("write answer")?;
            }
            RagEvent::Error { error } => {
                anyhow::bail!("answer failed: {error} (see log for details)");
            }
        }
    }
    Ok(())
}
