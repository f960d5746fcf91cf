//! Site-native menu labels to stable ASCII identifiers.
//!
//! The crawl and the convert steps may run in different processes, so both
//! functions must map a label to the same identifier every time.

const CATEGORY_MAP: &[(&str, &str)] = &[
    ("요약설명", "summary"),
    ("암이란", "overview"),
    ("예방", "prevention"),
    ("진단", "diagnosis"),
    ("치료", "treatment"),
    ("생활가이드", "lifestyle"),
];

const PAGE_MAP: &[(&str, &str)] = &[
    // 암이란
    ("발생부위", "location"),
    ("정의 및 종류", "definition"),
    ("관련통계", "statistics"),
    // 예방
    ("위험요인", "risk-factors"),
    ("예방법", "prevention-methods"),
    ("조기검진", "early-screening"),
    // 진단
    ("일반적증상", "symptoms"),
    ("진단방법", "diagnosis-methods"),
    ("감별진단", "differential-diagnosis"),
    ("진행단계", "stages"),
    // 치료
    ("치료방법", "treatment-methods"),
    ("치료의 부작용", "side-effects"),
    ("재발 및 전이", "recurrence"),
    ("치료현황", "treatment-status"),
    // 생활가이드
    ("일상생활 가이드", "daily-life"),
    ("식생활", "diet"),
    ("운동 및 재활", "exercise"),
    ("간세포암종 진료가이드라인", "hcc-treatment-guidelines"),
    ("일상생활", "daily-living"),
    ("장루관리", "stoma-care"),
    ("성생활", "sexual-life"),
    ("임신과 출산", "pregnancy-childbirth"),
    ("특수기구", "special-equipment"),
];

pub fn translate_category(label: &str) -> String {
    lookup(CATEGORY_MAP, label).unwrap_or_else(|| slugify(label))
}

pub fn translate_page(label: &str) -> String {
    lookup(PAGE_MAP, label).unwrap_or_else(|| slugify(label))
}

fn lookup(table: &[(&str, &str)], label: &str) -> Option<String> {
    table
        .iter()
        .find(|(native, _)| *native == label)
        .map(|(_, id)| (*id).to_owned())
}

/// Fallback for labels missing from the tables.
///
/// Keeps ASCII alphanumerics, hyphens and Hangul syllables; whitespace runs
/// become a single hyphen and hyphen runs collapse.
pub fn slugify(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_whitespace = false;

    for ch in text.trim().to_lowercase().chars() {
        if ch.is_whitespace() {
            if !in_whitespace {
                push_hyphen(&mut out);
            }
            in_whitespace = true;
            continue;
        }
        in_whitespace = false;

        if ch == '-' {
            push_hyphen(&mut out);
        } else if ch.is_ascii_lowercase() || ch.is_ascii_digit() || is_hangul_syllable(ch) {
            out.push(ch);
        }
    }

    out
}

fn push_hyphen(out: &mut String) {
    if !out.ends_with('-') {
        out.push('-');
    }
}

fn is_hangul_syllable(ch: char) -> bool {
    ('가'..='힣').contains(&ch)
}
