#![forbid(unsafe_code)]

pub mod ask;
pub mod assemble;
pub mod build;
pub mod chunk;
pub mod cli;
pub mod crawl;
pub mod fetch;
pub mod formats;
pub mod frontmatter;
pub mod index;
pub mod logging;
pub mod markdown;
pub mod menu;
pub mod openai;
pub mod rag;
pub mod raw_store;
pub mod retry;
pub mod server;
pub mod targets;
pub mod translator;
