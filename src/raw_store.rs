use std::path::{Path, PathBuf};

use anyhow::Context as _;

use crate::formats::MenuStructure;

pub const SUMMARY_PAGE: &str = "summary";
const MENU_STRUCTURE_FILE: &str = "menu-structure.json";

/// `<data>/raw/html/<target>`
pub fn target_html_dir(data_dir: &Path, target_id: &str) -> PathBuf {
    data_dir.join("raw").join("html").join(target_id)
}

/// `<data>/raw/html/<target>/[<category>/]<page>.html`; the summary page has
/// no category component.
pub fn html_path(
    data_dir: &Path,
    target_id: &str,
    category_id: Option<&str>,
    page_id: &str,
) -> PathBuf {
    let mut path = target_html_dir(data_dir, target_id);
    if let Some(category_id) = category_id {
        path = path.join(category_id);
    }
    path.join(format!("{page_id}.html"))
}

pub fn menu_structure_path(data_dir: &Path, target_id: &str) -> PathBuf {
    target_html_dir(data_dir, target_id).join(MENU_STRUCTURE_FILE)
}

pub fn processed_dir(data_dir: &Path) -> PathBuf {
    data_dir.join("processed").join("cancers")
}

pub fn processed_markdown_path(data_dir: &Path, target_id: &str) -> PathBuf {
    processed_dir(data_dir).join(format!("{target_id}.md"))
}

pub fn index_path(data_dir: &Path) -> PathBuf {
    data_dir.join("index").join("vectors.json")
}

/// Writes a fetched page. Overwrites any previous snapshot of the same page.
pub async fn write_html(path: &Path, html: &str) -> anyhow::Result<()> {
    write_atomic(path, html.as_bytes()).await?;
    tracing::info!(path = %path.display(), bytes = html.len(), "saved html");
    Ok(())
}

pub async fn save_menu_structure(
    data_dir: &Path,
    menu: &MenuStructure,
) -> anyhow::Result<PathBuf> {
    let path = menu_structure_path(data_dir, &menu.cancer_id);
    let json = serde_json::to_vec_pretty(menu).context("serialize menu structure")?;
    write_atomic(&path, &json).await?;
    tracing::info!(path = %path.display(), "saved menu structure");
    Ok(path)
}

pub async fn read_menu_structure(data_dir: &Path, target_id: &str) -> anyhow::Result<MenuStructure> {
    let path = menu_structure_path(data_dir, target_id);
    let bytes = tokio::fs::read(&path)
        .await
        .with_context(|| format!("read menu structure: {}", path.display()))?;
    let menu: MenuStructure = serde_json::from_slice(&bytes)
        .with_context(|| format!("parse menu structure: {}", path.display()))?;
    if menu.cancer_id != target_id {
        anyhow::bail!(
            "menu structure at {} belongs to {}, expected {target_id}",
            path.display(),
            menu.cancer_id
        );
    }
    Ok(menu)
}

/// Reads a stored page, mapping "not there" to `None`.
pub async fn read_html(path: &Path) -> anyhow::Result<Option<String>> {
    match tokio::fs::read_to_string(path).await {
        Ok(html) => Ok(Some(html)),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err).with_context(|| format!("read html: {}", path.display())),
    }
}

/// Writes to a sibling temp file and renames it into place, so a reader never
/// observes a partially written file.
pub async fn write_atomic(path: &Path, data: &[u8]) -> anyhow::Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| anyhow::anyhow!("path has no parent: {}", path.display()))?;
    tokio::fs::create_dir_all(parent)
        .await
        .with_context(|| format!("create dir: {}", parent.display()))?;

    let tmp_path = path.with_extension(format!("tmp.{}", uuid::Uuid::new_v4().simple()));
    tokio::fs::write(&tmp_path, data)
        .await
        .with_context(|| format!("write tmp: {}", tmp_path.display()))?;
    tokio::fs::rename(&tmp_path, path)
        .await
        .with_context(|| format!("rename tmp to final: {}", path.display()))?;
    Ok(())
}
