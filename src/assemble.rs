use std::path::{Path, PathBuf};

use anyhow::Context as _;

use crate::cli::ConvertArgs;
use crate::formats::MenuStructure;
use crate::frontmatter;
use crate::markdown::convert_html_to_markdown;
use crate::raw_store;
use crate::targets::{self, Target};

pub const SUMMARY_HEADING: &str = "요약설명";

pub async fn run(args: ConvertArgs) -> anyhow::Result<()> {
    let targets = targets::load(
        args.targets.targets.as_deref().map(Path::new),
        &args.targets.only,
    )
    .context("load targets")?;
    let data_dir = PathBuf::from(&args.targets.data_dir);
    let collected_date = frontmatter::today();

    tracing::info!(targets = targets.len(), "starting conversion");
    for target in &targets {
        convert_target(&data_dir, target, &collected_date)
            .await
            .with_context(|| format!("convert target {} ({})", target.id, target.name))?;
    }
    tracing::info!("all conversions completed");
    Ok(())
}

/// Reassembles one target's stored pages into a single Markdown document and
/// returns the path it was written to.
///
/// The stored menu structure is the only source of ordering; a missing menu
/// structure fails the target, missing pages are skipped.
pub async fn convert_target(
    data_dir: &Path,
    target: &Target,
    collected_date: &str,
) -> anyhow::Result<PathBuf> {
    tracing::info!(target_id = %target.id, name = %target.name, "converting");
    let menu = raw_store::read_menu_structure(data_dir, &target.id).await?;
    tracing::info!(
        target_id = %target.id,
        categories = menu.categories.len(),
        "loaded menu structure"
    );

    let body = assemble_body(data_dir, &menu).await?;
    let front = frontmatter::build(&menu, Some(target), collected_date);
    let document = format!("{}\n\n{body}", frontmatter::render(&front)?);

    let out_path = raw_store::processed_markdown_path(data_dir, &target.id);
    raw_store::write_atomic(&out_path, document.as_bytes()).await?;
    tracing::info!(path = %out_path.display(), "saved markdown");
    Ok(out_path)
}

async fn assemble_body(data_dir: &Path, menu: &MenuStructure) -> anyhow::Result<String> {
    let mut body = String::new();

    let summary_path =
        raw_store::html_path(data_dir, &menu.cancer_id, None, raw_store::SUMMARY_PAGE);
    match raw_store::read_html(&summary_path).await? {
        Some(html) => {
            body.push_str(&format!("# {SUMMARY_HEADING}\n\n"));
            body.push_str(&convert_html_to_markdown(&html));
            body.push_str("\n\n");
        }
        None => tracing::warn!(path = %summary_path.display(), "summary page not found; skipping"),
    }

    for category in &menu.categories {
        tracing::debug!(category = %category.name, id = %category.name_en, "converting category");
        body.push_str(&format!("# {}\n\n", category.name));

        for page in &category.pages {
            let path = raw_store::html_path(
                data_dir,
                &menu.cancer_id,
                Some(&category.name_en),
                &page.title_en,
            );
            let Some(html) = raw_store::read_html(&path).await? else {
                tracing::warn!(path = %path.display(), "page not found; skipping");
                continue;
            };
            body.push_str(&format!("## {}\n\n", page.title));
            body.push_str(&convert_html_to_markdown(&html));
            body.push_str("\n\n");
        }
    }

    Ok(body)
}
