use std::sync::LazyLock;

use regex::Regex;
use scraper::node::Element;
use scraper::{ElementRef, Html, Node, Selector};

static PRIMARY: LazyLock<Selector> = LazyLock::new(|| selector("#div_page"));
static SECONDARY: LazyLock<Selector> = LazyLock::new(|| selector("#contents"));
static BODY: LazyLock<Selector> = LazyLock::new(|| selector("body"));
static BLANK_RUNS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n{3,}").expect("valid blank line regex"));

fn selector(css: &str) -> Selector {
    Selector::parse(css).expect("valid static selector")
}

const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "source", "track",
    "wbr",
];

/// Decorations inside the primary container: the embedded cancer menu, the
/// inner tab widget, images, the video menu and the dictionary popup.
fn is_decoration(el: &Element) -> bool {
    el.name() == "img"
        || el.id() == Some("cancerMenu")
        || el
            .classes()
            .any(|c| matches!(c, "inner-tab" | "video_menu" | "dictionary__wrap"))
}

fn is_chrome(el: &Element) -> bool {
    matches!(el.name(), "script" | "style" | "nav" | "footer" | "header")
}

/// Inner HTML of the page's main content region.
///
/// Falls back to `#contents`, then `<body>`, then the input itself. Only the
/// primary container is stripped of decorations.
pub fn extract_main_content(html: &str) -> String {
    let document = Html::parse_document(html);

    let Some(primary) = document.select(&PRIMARY).next() else {
        tracing::warn!("#div_page not found, using #contents");
        if let Some(contents) = document.select(&SECONDARY).next() {
            return contents.inner_html();
        }
        if let Some(body) = document.select(&BODY).next() {
            return body.inner_html();
        }
        return html.to_owned();
    };

    let mut out = String::new();
    write_children(primary, &is_decoration, &mut out);

    if out.trim().is_empty() {
        tracing::warn!("main content is empty after processing");
        return String::new();
    }
    out
}

pub fn convert_html_to_markdown(html: &str) -> String {
    let content = extract_main_content(html);

    let fragment = Html::parse_fragment(&content);
    let mut stripped = String::new();
    write_children(fragment.root_element(), &is_chrome, &mut stripped);

    let markdown = html2md::parse_html(&stripped);
    cleanup_markdown(&normalize_markdown(&markdown))
}

/// Rewrites converter output to the house style: ATX headings, `-` bullets and
/// `---` rules. Fenced code blocks are left untouched.
pub fn normalize_markdown(markdown: &str) -> String {
    let lines = markdown.lines().collect::<Vec<_>>();
    let mut out: Vec<String> = Vec::with_capacity(lines.len());
    let mut in_fence = false;

    for line in lines {
        let trimmed = line.trim();
        if trimmed.starts_with("```") {
            in_fence = !in_fence;
            out.push(line.to_owned());
            continue;
        }
        if in_fence {
            out.push(line.to_owned());
            continue;
        }

        let previous_is_text = out
            .last()
            .is_some_and(|prev| !prev.trim().is_empty() && !prev.trim_start().starts_with('#'));
        if previous_is_text && is_underline(trimmed, '=') {
            let title = out.pop().unwrap_or_default();
            out.push(format!("# {}", title.trim()));
            continue;
        }
        if previous_is_text && is_underline(trimmed, '-') && !is_list_item(out.last()) {
            let title = out.pop().unwrap_or_default();
            out.push(format!("## {}", title.trim()));
            continue;
        }
        if is_rule(trimmed) {
            out.push("---".to_owned());
            continue;
        }
        if let Some(heading) = open_atx_heading(trimmed) {
            out.push(heading);
            continue;
        }

        let indent = line.len() - line.trim_start().len();
        let rest = &line[indent..];
        if let Some(item) = rest.strip_prefix("* ").or_else(|| rest.strip_prefix("+ ")) {
            out.push(format!("{}- {item}", &line[..indent]));
            continue;
        }
        out.push(line.to_owned());
    }

    out.join("\n")
}

/// `### Title ###` becomes `### Title`. Returns `None` for non-heading lines.
fn open_atx_heading(line: &str) -> Option<String> {
    let level = line.chars().take_while(|c| *c == '#').count();
    if level == 0 || level > 6 {
        return None;
    }
    let text = line[level..].strip_prefix(' ')?;
    let without_hashes = text.trim_end_matches('#');
    let text = if without_hashes.is_empty() || without_hashes.ends_with(' ') {
        without_hashes.trim_end()
    } else {
        text.trim_end()
    };
    Some(format!("{} {text}", &line[..level]))
}

fn is_underline(line: &str, ch: char) -> bool {
    line.len() >= 3 && line.chars().all(|c| c == ch)
}

fn is_list_item(line: Option<&String>) -> bool {
    line.map(|l| l.trim_start())
        .is_some_and(|l| l.starts_with("* ") || l.starts_with("- ") || l.starts_with("+ "))
}

fn is_rule(line: &str) -> bool {
    let compact = line.replace(' ', "");
    compact.len() >= 3
        && ['*', '-', '_']
            .iter()
            .any(|ch| compact.chars().all(|c| c == *ch))
}

/// Collapses runs of blank lines, trims, and ends with exactly one newline.
pub fn cleanup_markdown(markdown: &str) -> String {
    let collapsed = BLANK_RUNS.replace_all(markdown, "\n\n");
    format!("{}\n", collapsed.trim())
}

/// Serializes the children of `parent`, dropping every element (and its
/// subtree) for which `skip` holds. Comments are dropped too.
fn write_children(parent: ElementRef<'_>, skip: &dyn Fn(&Element) -> bool, out: &mut String) {
    for child in parent.children() {
        if let Some(el) = ElementRef::wrap(child) {
            write_element(el, skip, out);
        } else if let Node::Text(text) = child.value() {
            escape_into(text, false, out);
        }
    }
}

fn write_element(el: ElementRef<'_>, skip: &dyn Fn(&Element) -> bool, out: &mut String) {
    let value = el.value();
    if skip(value) {
        return;
    }
    out.push('<');
    out.push_str(value.name());
    for (name, attr) in value.attrs() {
        out.push(' ');
        out.push_str(name);
        out.push_str("=\"");
        escape_into(attr, true, out);
        out.push('"');
    }
    out.push('>');
    if VOID_ELEMENTS.contains(&value.name()) {
        return;
    }
    write_children(el, skip, out);
    out.push_str("</");
    out.push_str(value.name());
    out.push('>');
}

fn escape_into(text: &str, attribute: bool, out: &mut String) {
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' if attribute => out.push_str("&quot;"),
            _ => out.push(ch),
        }
    }
}
