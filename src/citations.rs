//! Footnote extraction: turns url-citation annotations and inline markdown
//! links into a clean paragraph with `[N]` markers plus an ordered source list.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::{Captures, Regex};

use crate::response::Citation;

static MARKDOWN_LINK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[([^\]]+)\]\(([^)]+)\)").expect("valid regex"));
static WRAPPED_FOOTNOTE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\(\s*(\[[0-9]+\])\s*\)").expect("valid regex"));
static DOUBLE_PAREN_NUMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\(\(\s*([0-9]+)\s*\)\)").expect("valid regex"));
static DOUBLE_PAREN_URL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\(\(https?://[^)]+\)\)").expect("valid regex"));
static PAREN_URL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\(https?://[^)]+\)").expect("valid regex"));
static MULTI_SPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"  +").expect("valid regex"));
static SPACE_BEFORE_PUNCT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r" ([.,;:!?])").expect("valid regex"));

/// A url-citation annotation as reported alongside the text.
#[derive(Debug, Clone)]
pub struct UrlAnnotation {
    pub url: String,
    pub title: String,
    pub start_index: usize,
}

/// Ordered, de-duplicated citations plus the url -> footnote number table
/// (kept in footnote order so fuzzy lookups are deterministic).
#[derive(Debug, Default)]
pub struct Footnotes {
    pub citations: Vec<Citation>,
    pub numbers: Vec<(String, usize)>,
}

impl Footnotes {
    /// Sort by position in the text (stable for ties), then number unique urls
    /// 1..=n in first-seen order.
    pub fn from_annotations(mut annotations: Vec<UrlAnnotation>) -> Self {
        annotations.sort_by_key(|a| a.start_index);

        let mut seen = HashSet::new();
        let mut footnotes = Footnotes::default();
        for ann in annotations {
            if ann.url.is_empty() || !seen.insert(ann.url.clone()) {
                continue;
            }
            let number = footnotes.citations.len() + 1;
            footnotes.numbers.push((ann.url.clone(), number));
            footnotes.citations.push(Citation::new(ann.url, ann.title));
        }
        footnotes
    }

    /// Footnote for a url as it appears in the text. Reported urls may carry
    /// tracking parameters, so either string containing the other counts as a
    /// match; the first footnote in order wins when several overlap.
    pub fn lookup(&self, url: &str) -> Option<usize> {
        self.numbers
            .iter()
            .find(|(known, _)| url.contains(known.as_str()) || known.contains(url))
            .map(|(_, n)| *n)
    }
}

/// Replace inline link artifacts with footnote markers and tidy the spacing.
pub fn clean_inline_citations(text: &str, footnotes: &Footnotes) -> String {
    let mut text = MARKDOWN_LINK
        .replace_all(text, |caps: &Captures| match footnotes.lookup(&caps[2]) {
            Some(n) => format!("[{n}]"),
            None => caps[1].to_string(),
        })
        .into_owned();

    // Unwrap nested wrappers such as (([1])) one layer at a time.
    loop {
        let unwrapped = WRAPPED_FOOTNOTE.replace_all(&text, "$1").into_owned();
        let next = DOUBLE_PAREN_NUMBER
            .replace_all(&unwrapped, "[$1]")
            .into_owned();
        if next == text {
            break;
        }
        text = next;
    }

    let text = DOUBLE_PAREN_URL.replace_all(&text, "");
    let text = PAREN_URL.replace_all(&text, "");
    let text = MULTI_SPACE.replace_all(&text, " ");
    let text = SPACE_BEFORE_PUNCT.replace_all(&text, "$1");
    text.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ann(url: &str, start: usize) -> UrlAnnotation {
        UrlAnnotation {
            url: url.to_string(),
            title: String::new(),
            start_index: start,
        }
    }

    #[test]
    fn tracking_params_resolve_to_known_citation() {
        let f = Footnotes::from_annotations(vec![ann("https://a.com/x", 0)]);
        let out = clean_inline_citations("Apple rose ([1](https://a.com/x?utm=1))", &f);
        assert_eq!(out, "Apple rose [1]");
    }

    #[test]
    fn duplicate_urls_share_one_footnote() {
        let f = Footnotes::from_annotations(vec![
            ann("https://b.com/2", 40),
            ann("https://a.com/1", 10),
            ann("https://a.com/1", 70),
        ]);
        assert_eq!(f.citations.len(), 2);
        assert_eq!(f.citations[0].url, "https://a.com/1");
        assert_eq!(f.citations[1].url, "https://b.com/2");

        let text = "Sales grew [a](https://a.com/1). Margins fell [b](https://b.com/2). \
                    Guidance held [a](https://a.com/1).";
        assert_eq!(
            clean_inline_citations(text, &f),
            "Sales grew [1]. Margins fell [2]. Guidance held [1]."
        );
    }

    #[test]
    fn unknown_link_keeps_its_text() {
        let f = Footnotes::default();
        assert_eq!(
            clean_inline_citations("See [Reuters](https://reuters.com/z) today", &f),
            "See Reuters today"
        );
    }

    #[test]
    fn nested_wrappers_collapse() {
        let f = Footnotes::from_annotations(vec![ann("https://a.com/x", 0)]);
        assert_eq!(
            clean_inline_citations("Up (([1](https://a.com/x))) today", &f),
            "Up [1] today"
        );
        assert_eq!(clean_inline_citations("Up ((2)) today", &f), "Up [2] today");
    }

    #[test]
    fn bare_urls_are_stripped_and_spacing_fixed() {
        let f = Footnotes::default();
        assert_eq!(
            clean_inline_citations("Shares fell (https://x.com/a) , then ((https://y.com)) rose .", &f),
            "Shares fell, then rose."
        );
    }

    #[test]
    fn empty_urls_are_skipped() {
        let f = Footnotes::from_annotations(vec![ann("", 0), ann("https://a.com", 5)]);
        assert_eq!(f.citations.len(), 1);
        assert_eq!(f.lookup("https://a.com"), Some(1));
    }
}
