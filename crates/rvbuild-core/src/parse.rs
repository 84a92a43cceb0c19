//! Page parsing shared by the mirror backends.
//!
//! Mirror layouts change without notice, so every fact is pulled out with
//! an [`Extractor`]: an ordered list of [`Rule`]s where the first is the
//! structural lookup (a CSS selector) and the later ones are cruder
//! fallbacks (a pattern over the raw markup). Every rule is tried before
//! a miss is reported.

use regex::Regex;
use reqwest::Url;
use rvbuild_schema::{Arch, Version};
use scraper::{ElementRef, Html, Selector};
use tracing::{debug, warn};

/// One way of pulling a value out of a page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rule {
    /// Attribute of every element matching a CSS selector.
    Attr { selector: String, attr: String },
    /// Text content of every element matching a CSS selector.
    Text { selector: String },
    /// Regex over the raw markup; capture group 1 if present, else the
    /// whole match. Hits are entity-decoded.
    Pattern { regex: String },
}

impl Rule {
    pub fn attr(selector: &str, attr: &str) -> Self {
        Self::Attr {
            selector: selector.to_string(),
            attr: attr.to_string(),
        }
    }

    pub fn text(selector: &str) -> Self {
        Self::Text {
            selector: selector.to_string(),
        }
    }

    pub fn pattern(regex: impl Into<String>) -> Self {
        Self::Pattern {
            regex: regex.into(),
        }
    }

    fn is_structural(&self) -> bool {
        !matches!(self, Self::Pattern { .. })
    }

    fn apply(&self, doc: Option<&Html>, raw: &str) -> Vec<String> {
        let hits: Vec<String> = match self {
            Self::Attr { selector, attr } => select(doc, selector)
                .into_iter()
                .filter_map(|el| el.value().attr(attr).map(str::to_string))
                .collect(),
            Self::Text { selector } => select(doc, selector)
                .into_iter()
                .map(|el| element_text(&el))
                .collect(),
            Self::Pattern { regex } => match Regex::new(regex) {
                Ok(re) => re
                    .captures_iter(raw)
                    .filter_map(|c| c.get(1).or_else(|| c.get(0)))
                    .map(|m| decode_entities(m.as_str()))
                    .collect(),
                Err(e) => {
                    warn!(%regex, error = %e, "invalid extraction pattern");
                    Vec::new()
                }
            },
        };
        hits.into_iter()
            .map(|h| h.trim().to_string())
            .filter(|h| !h.is_empty())
            .collect()
    }
}

fn select<'a>(doc: Option<&'a Html>, selector: &str) -> Vec<ElementRef<'a>> {
    let Some(doc) = doc else {
        return Vec::new();
    };
    match Selector::parse(selector) {
        Ok(sel) => doc.select(&sel).collect(),
        Err(e) => {
            warn!(%selector, error = %e, "invalid extraction selector");
            Vec::new()
        }
    }
}

/// Visible text of an element, whitespace-collapsed.
pub fn element_text(el: &ElementRef<'_>) -> String {
    el.text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

/// A value found by an [`Extractor`] and the index of the rule that found it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hit {
    pub value: String,
    pub rule: usize,
}

impl Hit {
    /// True when a rule other than the primary one matched.
    pub fn is_fallback(&self) -> bool {
        self.rule > 0
    }
}

/// Ordered extraction attempts for one fact.
#[derive(Debug, Clone)]
pub struct Extractor {
    what: &'static str,
    rules: Vec<Rule>,
}

impl Extractor {
    pub fn new(what: &'static str) -> Self {
        Self {
            what,
            rules: Vec::new(),
        }
    }

    #[must_use]
    pub fn rule(mut self, rule: Rule) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn what(&self) -> &'static str {
        self.what
    }

    /// First value found, trying rules in order.
    pub fn first(&self, html: &str) -> Option<Hit> {
        self.pick(html, |hits| hits.into_iter().next())
            .map(|(rule, value)| Hit { value, rule })
    }

    /// Every value found by the first rule that finds anything.
    pub fn all(&self, html: &str) -> Vec<String> {
        self.pick(html, |hits| if hits.is_empty() { None } else { Some(hits) })
            .map(|(_, hits)| hits)
            .unwrap_or_default()
    }

    /// Apply rules in order until `pick` accepts the hits of one of them.
    ///
    /// Lets a caller reject a rule's hits (say, only pre-release versions)
    /// and fall through to the next rule.
    pub fn pick<T>(
        &self,
        html: &str,
        mut pick: impl FnMut(Vec<String>) -> Option<T>,
    ) -> Option<(usize, T)> {
        let doc = self
            .rules
            .iter()
            .any(Rule::is_structural)
            .then(|| Html::parse_document(html));

        for (i, rule) in self.rules.iter().enumerate() {
            if let Some(found) = pick(rule.apply(doc.as_ref(), html)) {
                if i > 0 {
                    warn!(what = self.what, rule = i, "primary rule missed, fallback matched");
                }
                return Some((i, found));
            }
            debug!(what = self.what, rule = i, "rule found nothing");
        }
        None
    }
}

/// Decode the HTML entities that show up inside raw `href` values.
pub fn decode_entities(s: &str) -> String {
    s.replace("&#038;", "&")
        .replace("&#38;", "&")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}

/// Resolve `href` against the page it was found on.
pub fn absolutize(base: &str, href: &str) -> Option<String> {
    let href = href.trim();
    if href.is_empty() || href.starts_with('#') || href.starts_with("javascript:") {
        return None;
    }
    Url::parse(base)
        .and_then(|b| b.join(href))
        .ok()
        .filter(|u| matches!(u.scheme(), "http" | "https"))
        .map(String::from)
}

/// How well a page matches the version it was fetched for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionMatch {
    /// Title or a heading names the exact version.
    Exact,
    /// Only the body text, or the `major.minor` prefix in a heading.
    Partial,
    Missing,
}

/// Check that a page is about `version`, looking at the title and the
/// `h1`/`h2` headings for the dotted or dashed form.
pub fn match_version(html: &str, version: &Version) -> VersionMatch {
    let doc = Html::parse_document(html);
    let mut headings = String::new();
    if let Ok(sel) = Selector::parse("title, h1, h2") {
        for el in doc.select(&sel) {
            headings.push_str(&element_text(&el));
            headings.push('\n');
        }
    }

    let dotted = version.as_str();
    let dashed = version.dashed();
    if contains_version(&headings, dotted) || contains_version(&headings, &dashed) {
        return VersionMatch::Exact;
    }

    let body = element_text(&doc.root_element());
    let prefix_hit = version
        .major_minor()
        .is_some_and(|mm| contains_prefix(&headings, &mm));
    if contains_version(&body, dotted) || prefix_hit {
        return VersionMatch::Partial;
    }
    VersionMatch::Missing
}

/// `needle` occurs in `hay` as a whole version, not as a prefix of a longer
/// one (`19.16.3` does not match inside `19.16.39`).
fn contains_version(hay: &str, needle: &str) -> bool {
    hay.match_indices(needle).any(|(at, _)| {
        let before = hay[..at].chars().next_back();
        let after = &hay[at + needle.len()..];
        let mut rest = after.chars();
        let next = rest.next();
        let next2 = rest.next();
        let extends_left = before.is_some_and(|c| c.is_ascii_digit() || c == '.');
        let extends_right = next.is_some_and(|c| c.is_ascii_digit())
            || (matches!(next, Some('.' | '-')) && next2.is_some_and(|c| c.is_ascii_digit()));
        !extends_left && !extends_right
    })
}

fn contains_prefix(hay: &str, prefix: &str) -> bool {
    hay.match_indices(prefix).any(|(at, _)| {
        let before = hay[..at].chars().next_back();
        let next = hay[at + prefix.len()..].chars().next();
        !before.is_some_and(|c| c.is_ascii_digit() || c == '.')
            && !next.is_some_and(|c| c.is_ascii_digit())
    })
}

/// What a variant link must look like.
#[derive(Debug, Clone, Copy)]
pub struct VariantQuery<'a> {
    pub arch: Arch,
    /// Preferred density class; rows naming it rank first.
    pub dpi: Option<&'a str>,
    /// Required substring of the link path.
    pub href_contains: Option<&'a str>,
}

/// Scan a release page for the link to the variant naming `query.arch`.
///
/// Rows (`div.table-row`, `tr`, `li`) are scored on their whole text so an
/// architecture named in one cell selects the link in another; bare links
/// are scored on their own text and path. Plain APK rows beat bundle
/// rows, and a matching density beats both.
pub fn find_variant_link(html: &str, base: &str, query: &VariantQuery<'_>) -> Option<String> {
    let doc = Html::parse_document(html);
    let rows = Selector::parse("div.table-row, tr, li").ok()?;
    let links = Selector::parse("a[href]").ok()?;

    let mut best: Option<(i32, String)> = None;
    let mut consider = |context: &str, href: &str| {
        if let Some(filter) = query.href_contains {
            if !href.contains(filter) {
                return;
            }
        }
        let haystack = format!("{context} {href}");
        if !query.arch.named_in(&haystack) {
            return;
        }
        let Some(url) = absolutize(base, href) else {
            return;
        };
        let lower = context.to_lowercase();
        let mut score = 0;
        if query.dpi.is_some_and(|dpi| lower.contains(&dpi.to_lowercase())) {
            score += 2;
        }
        if lower.contains("bundle") || lower.contains("apkm") || lower.contains("xapk") {
            score -= 1;
        }
        if best.as_ref().is_none_or(|(s, _)| score > *s) {
            best = Some((score, url));
        }
    };

    for row in doc.select(&rows) {
        let context = element_text(&row);
        for link in row.select(&links) {
            if let Some(href) = link.value().attr("href") {
                consider(&context, href);
            }
        }
    }
    for link in doc.select(&links) {
        if let Some(href) = link.value().attr("href") {
            consider(&element_text(&link), href);
        }
    }

    best.map(|(_, url)| url)
}
