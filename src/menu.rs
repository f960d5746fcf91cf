use std::sync::LazyLock;

use regex::Regex;
use scraper::{ElementRef, Html, Selector};

use crate::formats::{DetailPage, MenuCategory, MenuStructure};
use crate::targets::{SOURCE_NAME, Target};
use crate::translator::{translate_category, translate_page};

/// Number of sibling lists under `#cancerMenu`: one summary list followed by
/// one list per category.
pub const MENU_LISTS: usize = 6;

static MENU_LIST: LazyLock<Selector> = LazyLock::new(|| selector("#cancerMenu ul"));
static SUMMARY_LINK: LazyLock<Selector> = LazyLock::new(|| selector("li.category a"));
static CATEGORY_LABEL: LazyLock<Selector> = LazyLock::new(|| selector("li.category span"));
static PAGE_LINK: LazyLock<Selector> = LazyLock::new(|| selector("li:not(.category) a"));
static CANCER_SEQ: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"cancer_seq=(\d+)").expect("valid cancer_seq regex"));

fn selector(css: &str) -> Selector {
    Selector::parse(css).expect("valid static selector")
}

/// Reads the ordered category/page taxonomy from a rendered entry page.
///
/// Missing pieces are logged and skipped: a list without a category label is
/// dropped, a link without text or href is dropped, and a missing summary link
/// leaves `cancer_seq` empty. Categories without pages are kept.
pub fn extract_menu_structure(html: &str, target: &Target) -> MenuStructure {
    tracing::info!(target_id = %target.id, "extracting menu structure");
    let document = Html::parse_document(html);
    let lists = sibling_lists(&document);
    if lists.len() < MENU_LISTS {
        tracing::warn!(
            target_id = %target.id,
            found = lists.len(),
            expected = MENU_LISTS,
            "menu has fewer lists than expected"
        );
    }

    let cancer_seq = lists
        .first()
        .and_then(|list| list.select(&SUMMARY_LINK).next())
        .and_then(|link| link.value().attr("href"))
        .and_then(parse_cancer_seq)
        .unwrap_or_else(|| {
            tracing::warn!(target_id = %target.id, "cancer_seq not found in summary link");
            String::new()
        });

    let mut categories = Vec::new();
    for (idx, list) in lists.iter().enumerate().take(MENU_LISTS).skip(1) {
        let Some(label) = list
            .select(&CATEGORY_LABEL)
            .next()
            .map(element_text)
            .filter(|label| !label.is_empty())
        else {
            tracing::warn!(target_id = %target.id, list = idx + 1, "no category name found");
            continue;
        };

        let name_en = translate_category(&label);
        tracing::info!(category = %label, id = %name_en, "found category");

        let mut pages = Vec::new();
        for link in list.select(&PAGE_LINK) {
            let title = element_text(link);
            let url = link.value().attr("href").unwrap_or_default().trim();
            if title.is_empty() || url.is_empty() {
                continue;
            }
            let title_en = translate_page(&title);
            tracing::debug!(title = %title, id = %title_en, "found page");
            pages.push(DetailPage {
                title,
                title_en,
                url: url.to_owned(),
            });
        }

        categories.push(MenuCategory {
            name: label,
            name_en,
            pages,
        });
    }

    MenuStructure {
        cancer_id: target.id.clone(),
        cancer_name: target.name.clone(),
        cancer_seq,
        source: SOURCE_NAME.to_owned(),
        categories,
    }
}

/// The first `ul` under `#cancerMenu` and its `ul` siblings, in document order.
fn sibling_lists(document: &Html) -> Vec<ElementRef<'_>> {
    let Some(first) = document.select(&MENU_LIST).next() else {
        return Vec::new();
    };
    let Some(parent) = first.parent() else {
        return vec![first];
    };
    parent
        .children()
        .filter_map(ElementRef::wrap)
        .filter(|el| el.value().name() == "ul")
        .collect()
}

pub fn parse_cancer_seq(href: &str) -> Option<String> {
    CANCER_SEQ
        .captures(href)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_owned())
}

fn element_text(el: ElementRef<'_>) -> String {
    el.text().collect::<String>().trim().to_owned()
}
