use anyhow::Context as _;

use crate::formats::{DiseaseCategory, Frontmatter, MenuStructure};
use crate::targets::{self, Target};

/// Frontmatter for a reassembled document.
///
/// Tags are the category names in stored order followed by the disease name.
/// Verification fields are always unset; verification happens downstream.
pub fn build(menu: &MenuStructure, target: Option<&Target>, collected_date: &str) -> Frontmatter {
    let mut tags = menu
        .categories
        .iter()
        .map(|c| c.name.clone())
        .collect::<Vec<_>>();
    tags.push(menu.cancer_name.clone());

    Frontmatter {
        disease_id: menu.cancer_id.clone(),
        disease_name: menu.cancer_name.clone(),
        disease_name_en: target
            .map(|t| t.name_en.clone())
            .unwrap_or_else(|| menu.cancer_name.clone()),
        category: target
            .map(Target::disease_category)
            .unwrap_or(DiseaseCategory::Cancer),
        source: menu.source.clone(),
        source_url: targets::source_url(target, &menu.cancer_seq),
        collected_date: collected_date.to_owned(),
        verified: false,
        verified_by: None,
        verified_date: None,
        tags,
    }
}

/// Today's date (UTC) in `YYYY-MM-DD` form.
pub fn today() -> String {
    chrono::Utc::now().format("%Y-%m-%d").to_string()
}

/// `---` delimited YAML header, without a trailing newline.
pub fn render(front: &Frontmatter) -> anyhow::Result<String> {
    let yaml = serde_yaml::to_string(front).context("serialize frontmatter")?;
    Ok(format!("---\n{yaml}---"))
}

/// Splits a document into its frontmatter and the body that follows it.
pub fn split(contents: &str) -> anyhow::Result<(Frontmatter, &str)> {
    let rest = contents
        .strip_prefix("---\n")
        .or_else(|| contents.strip_prefix("---\r\n"))
        .ok_or_else(|| anyhow::anyhow!("document must start with YAML frontmatter ('---')"))?;

    let mut offset = 0;
    let mut yaml_end = None;
    for line in rest.split_inclusive('\n') {
        if line.trim_end() == "---" {
            yaml_end = Some((offset, offset + line.len()));
            break;
        }
        offset += line.len();
    }
    let (yaml_end, body_start) =
        yaml_end.ok_or_else(|| anyhow::anyhow!("frontmatter is not closed ('---')"))?;

    let front: Frontmatter =
        serde_yaml::from_str(&rest[..yaml_end]).context("deserialize frontmatter")?;
    Ok((front, rest[body_start..].trim_start_matches(['\r', '\n'])))
}
