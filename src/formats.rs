use serde::{Deserialize, Serialize};

/// One leaf content page listed in a category of the entry page menu.
///
/// `url` is kept exactly as it appeared in the menu (usually relative) and is
/// only resolved against the entry page when the page is fetched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetailPage {
    pub title: String,
    pub title_en: String,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MenuCategory {
    pub name: String,
    pub name_en: String,
    pub pages: Vec<DetailPage>,
}

/// Navigation tree of one target, persisted as `menu-structure.json`.
///
/// Category and page order is the order the site presents them in, and is the
/// only ordering the reassembled document follows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MenuStructure {
    pub cancer_id: String,
    pub cancer_name: String,
    pub cancer_seq: String,
    pub source: String,
    pub categories: Vec<MenuCategory>,
}

impl MenuStructure {
    pub fn page_count(&self) -> usize {
        self.categories.iter().map(|c| c.pages.len()).sum()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiseaseCategory {
    Cancer,
    ChronicDisease,
}

impl DiseaseCategory {
    /// Maps the site-native category label of a target.
    pub fn from_label(label: &str) -> Self {
        match label.trim() {
            "암" | "cancer" => Self::Cancer,
            _ => Self::ChronicDisease,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Frontmatter {
    pub disease_id: String,
    pub disease_name: String,
    pub disease_name_en: String,
    pub category: DiseaseCategory,
    pub source: String,
    pub source_url: String,
    pub collected_date: String,
    pub verified: bool,
    pub verified_by: Option<String>,
    pub verified_date: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    pub disease_id: String,
    pub disease_name: String,
    pub disease_name_en: String,
    pub category: DiseaseCategory,
    pub source: String,
    pub source_url: String,
    pub collected_date: String,

    pub level: u8,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_title: Option<String>,
    pub breadcrumb: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line_from: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line_to: Option<usize>,

    pub tags: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub content: String,
    pub metadata: ChunkMetadata,
}
