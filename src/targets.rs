use std::path::Path;

use anyhow::Context as _;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::formats::DiseaseCategory;

pub const SOURCE_NAME: &str = "국가암정보센터";

const CANONICAL_VIEW_URL: &str = "https://www.cancer.go.kr/lay1/program/S1T211C217/cancer/view.do";

/// One configured scrape subject.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    pub id: String,
    pub name: String,
    pub name_en: String,
    pub url: String,
    pub category: String,
}

impl Target {
    fn new(id: &str, name: &str, name_en: &str, url: &str) -> Self {
        Self {
            id: id.to_owned(),
            name: name.to_owned(),
            name_en: name_en.to_owned(),
            url: url.to_owned(),
            category: "암".to_owned(),
        }
    }

    pub fn disease_category(&self) -> DiseaseCategory {
        DiseaseCategory::from_label(&self.category)
    }
}

pub fn builtin_targets() -> Vec<Target> {
    vec![
        Target::new(
            "stomach",
            "위암",
            "Stomach Cancer",
            "https://www.cancer.go.kr/lay1/program/S1T211C213/cancer/view.do?cancer_seq=4661",
        ),
        Target::new(
            "liver",
            "간암",
            "Liver Cancer",
            "https://www.cancer.go.kr/lay1/program/S1T211C216/cancer/view.do?cancer_seq=3317",
        ),
        Target::new(
            "colorectal",
            "대장암",
            "Colorectal Cancer",
            "https://www.cancer.go.kr/lay1/program/S1T211C214/cancer/view.do?cancer_seq=3797",
        ),
        Target::new(
            "breast",
            "유방암",
            "Breast Cancer",
            "https://www.cancer.go.kr/lay1/program/S1T211C217/cancer/view.do?cancer_seq=4757",
        ),
        Target::new(
            "cervical",
            "자궁경부암",
            "Cervical Cancer",
            "https://www.cancer.go.kr/lay1/program/S1T211C223/cancer/view.do?cancer_seq=4877",
        ),
        Target::new(
            "lung",
            "폐암",
            "Lung Cancer",
            "https://www.cancer.go.kr/lay1/program/S1T211C215/cancer/view.do?cancer_seq=5237",
        ),
        Target::new(
            "thyroid",
            "갑상선암",
            "Thyroid Cancer",
            "https://www.cancer.go.kr/lay1/program/S1T211C212/cancer/view.do?cancer_seq=3341",
        ),
    ]
}

/// Loads the target table: the YAML file when given, the built-in table
/// otherwise, then narrowed to `only` (in table order) when non-empty.
pub fn load(path: Option<&Path>, only: &[String]) -> anyhow::Result<Vec<Target>> {
    let targets = match path {
        Some(path) => {
            let yaml = std::fs::read_to_string(path)
                .with_context(|| format!("read targets file: {}", path.display()))?;
            let targets: Vec<Target> = serde_yaml::from_str(&yaml)
                .with_context(|| format!("parse targets file: {}", path.display()))?;
            targets
        }
        None => builtin_targets(),
    };

    for target in &targets {
        Url::parse(&target.url)
            .with_context(|| format!("target {} has an invalid url: {}", target.id, target.url))?;
    }

    if only.is_empty() {
        return Ok(targets);
    }

    for id in only {
        if !targets.iter().any(|t| &t.id == id) {
            anyhow::bail!("unknown target id: {id}");
        }
    }
    Ok(targets
        .into_iter()
        .filter(|t| only.contains(&t.id))
        .collect())
}

/// Source URL of a reassembled document: the target's entry URL with its
/// `cancer_seq` parameter replaced by the scraped sequence id.
pub fn source_url(target: Option<&Target>, cancer_seq: &str) -> String {
    let base = target.map(|t| t.url.as_str()).unwrap_or(CANONICAL_VIEW_URL);
    let Ok(mut url) = Url::parse(base) else {
        return format!("{CANONICAL_VIEW_URL}?cancer_seq={cancer_seq}");
    };

    let retained = url
        .query_pairs()
        .filter(|(k, _)| k != "cancer_seq")
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect::<Vec<_>>();
    {
        let mut query = url.query_pairs_mut();
        query.clear();
        for (k, v) in &retained {
            query.append_pair(k, v);
        }
        query.append_pair("cancer_seq", cancer_seq);
    }
    url.to_string()
}
