// src/services/extract.rs

//! Post extraction from mirror HTML.
//!
//! Markup differs between mirror versions, so every field is read through an
//! ordered list of strategies and the first one that yields a value wins.
//! Post containers are located the same way; when no container strategy
//! matches, permalinks are used to find posts directly.

use std::cmp::Reverse;
use std::collections::HashSet;

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use url::Url;

use crate::error::{AppError, Result};
use crate::models::CandidatePost;
use crate::utils::{extract_status_id, resolve_url, url_path};

/// Text content of the matched element.
const TEXT: &[&str] = &[];

/// Post containers, most specific markup first.
const CONTAINERS: &[&str] = &[
    ".timeline-item",
    ".tweet",
    ".timeline .item",
    ".tweet-container",
    "article.tweet",
    ".timeline article",
    "div[data-tweet-id]",
    "#timeline > div",
    ".feed > div",
];

const PERMALINK: &[(&str, &[&str])] = &[
    ("a.tweet-link", &["href"]),
    ("a[href*=\"status\"]", &["href"]),
    (".tweet-date a", &["href"]),
    ("a.Permalink", &["href"]),
    ("a.timestamp", &["href"]),
];

const CONTENT: &[(&str, &[&str])] = &[
    (".tweet-content", TEXT),
    (".content", TEXT),
    (".tweet-text", TEXT),
    (".tweet-body", TEXT),
    (".tweet p", TEXT),
    (".tweet > div > p", TEXT),
];

const TIMESTAMP: &[(&str, &[&str])] = &[
    (".tweet-date a", &["title", "datetime"]),
    ("time", &["title", "datetime"]),
    (".timestamp", &["title", "datetime"]),
    (".time", &["title", "datetime"]),
];

const AUTHOR: &[(&str, &[&str])] = &[
    (".fullname", TEXT),
    (".username", TEXT),
    (".name", TEXT),
    (".user", TEXT),
];

const IMAGE: &[(&str, &[&str])] = &[
    (".still-image", &["src", "href"]),
    ("img.media-img", &["src", "href"]),
    (".media img", &["src", "href"]),
    (".attachment img", &["src", "href"]),
    (".tweet-img", &["src", "href"]),
];

/// Attributes carrying a post id directly on the container.
const ID_ATTRS: &[&str] = &["data-tweet-id", "data-id"];

/// Ancestor levels inspected when looking for a fallback container.
const MAX_ANCESTOR_DEPTH: usize = 5;

/// Nitter's `title` format on post dates, e.g. `Mar 5, 2024 · 3:04 PM UTC`.
const NITTER_DATE_FORMAT: &str = "%b %d, %Y · %I:%M %p";

/// One way of reading a field: a selector and the attributes to read, in
/// order. No attributes means the element's text.
struct FieldStrategy {
    selector: Selector,
    attrs: &'static [&'static str],
}

impl FieldStrategy {
    fn extract(&self, scope: ElementRef<'_>) -> Option<String> {
        scope.select(&self.selector).find_map(|element| {
            let value = if self.attrs.is_empty() {
                clean_text(element)
            } else {
                self.attrs
                    .iter()
                    .find_map(|attr| element.value().attr(attr))
                    .map(|v| v.trim().to_string())
                    .unwrap_or_default()
            };
            (!value.is_empty()).then_some(value)
        })
    }
}

/// Extracts candidate posts from a timeline page.
pub struct Extractor {
    containers: Vec<(&'static str, Selector)>,
    permalink: Vec<FieldStrategy>,
    content: Vec<FieldStrategy>,
    timestamp: Vec<FieldStrategy>,
    author: Vec<FieldStrategy>,
    image: Vec<FieldStrategy>,
    anchor: Selector,
    paragraph: Selector,
    mention: Regex,
}

impl Extractor {
    pub fn new() -> Result<Self> {
        let containers = CONTAINERS
            .iter()
            .map(|s| -> Result<(&'static str, Selector)> { Ok((*s, parse_selector(s)?)) })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            containers,
            permalink: strategies(PERMALINK)?,
            content: strategies(CONTENT)?,
            timestamp: strategies(TIMESTAMP)?,
            author: strategies(AUTHOR)?,
            image: strategies(IMAGE)?,
            anchor: parse_selector("a[href]")?,
            paragraph: parse_selector("p")?,
            mention: Regex::new(r"@\w+")?,
        })
    }

    /// Extract posts from `html`, served by `mirror`, for `handle`.
    ///
    /// Posts are returned newest first when every timestamp parses, and in
    /// page order otherwise. Timestamps in no known format (relative ages
    /// like `2h`) are then replaced with the fetch time, so stored values
    /// always order chronologically.
    pub fn parse_page(&self, html: &str, mirror: &str, handle: &str) -> Vec<CandidatePost> {
        let base = match Url::parse(mirror) {
            Ok(base) => base,
            Err(e) => {
                log::warn!("Invalid mirror URL {}: {}", mirror, e);
                return Vec::new();
            }
        };

        let document = Html::parse_document(html);
        let mut posts = self.extract_from_containers(&document, &base, handle);

        if posts.is_empty() {
            log::info!("No posts found with standard selectors, trying generic extraction");
            posts = self.extract_from_permalinks(&document, &base, handle);
        }

        sort_newest_first(&mut posts);
        stamp_unparsed(&mut posts);
        posts
    }

    fn extract_from_containers(
        &self,
        document: &Html,
        base: &Url,
        handle: &str,
    ) -> Vec<CandidatePost> {
        for (name, selector) in &self.containers {
            let mut seen = HashSet::new();
            let posts: Vec<CandidatePost> = document
                .select(selector)
                .filter_map(|element| self.extract_post(element, base, handle))
                .filter(|post| seen.insert(post.external_id.clone()))
                .collect();

            if !posts.is_empty() {
                log::debug!("Found {} posts with selector: {}", posts.len(), name);
                return posts;
            }
        }
        Vec::new()
    }

    /// Read one post out of a container element.
    fn extract_post(
        &self,
        element: ElementRef<'_>,
        base: &Url,
        handle: &str,
    ) -> Option<CandidatePost> {
        if element.value().classes().any(|c| c == "timeline-header") {
            return None;
        }

        let permalink = first_match(element, &self.permalink);
        let external_id = ID_ATTRS
            .iter()
            .find_map(|attr| element.value().attr(attr))
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty())
            .or_else(|| permalink.as_deref().and_then(extract_status_id))
            .or_else(|| permalink.as_deref().map(url_path))
            .filter(|id| !id.is_empty())?;

        let url = match &permalink {
            Some(href) => resolve_url(base, href),
            None => format!(
                "{}/{}/status/{}",
                base.as_str().trim_end_matches('/'),
                handle,
                external_id
            ),
        };

        let content = first_match(element, &self.content)?;

        Some(CandidatePost {
            external_id,
            url,
            content,
            published: normalize_timestamp(
                first_match(element, &self.timestamp).as_deref().unwrap_or(""),
            ),
            author: first_match(element, &self.author).unwrap_or_else(|| handle.to_string()),
            image_url: first_match(element, &self.image).map(|src| resolve_url(base, &src)),
        })
    }

    /// Find posts through links matching the status pattern.
    fn extract_from_permalinks(
        &self,
        document: &Html,
        base: &Url,
        handle: &str,
    ) -> Vec<CandidatePost> {
        let mut seen_hrefs = HashSet::new();
        let mut seen_ids = HashSet::new();
        let mut posts = Vec::new();

        for anchor in document.select(&self.anchor) {
            let Some(href) = anchor.value().attr("href") else {
                continue;
            };
            let Some(external_id) = extract_status_id(href) else {
                continue;
            };
            if !seen_hrefs.insert(href.to_string()) || seen_ids.contains(&external_id) {
                continue;
            }

            let container = find_container(anchor);
            let content = self.fallback_content(container);
            if content.is_empty() {
                continue;
            }

            seen_ids.insert(external_id.clone());
            posts.push(CandidatePost {
                url: resolve_url(base, href),
                external_id,
                content,
                published: normalize_timestamp(
                    first_match(container, &self.timestamp).as_deref().unwrap_or(""),
                ),
                author: first_match(container, &self.author)
                    .unwrap_or_else(|| handle.to_string()),
                image_url: first_match(container, &self.image).map(|src| resolve_url(base, &src)),
            });
        }

        log::debug!("Generic extraction found {} posts", posts.len());
        posts
    }

    fn fallback_content(&self, container: ElementRef<'_>) -> String {
        let paragraph = container
            .select(&self.paragraph)
            .next()
            .map(clean_text)
            .filter(|text| !text.is_empty());

        paragraph.unwrap_or_else(|| {
            let text = clean_text(container);
            collapse_whitespace(&self.mention.replace_all(&text, ""))
        })
    }
}

/// Nearest plausible post container around a permalink.
///
/// Prefers a classed `div`, `article` or `li` within a few levels, then the
/// nearest such element at any depth, then the link's parent.
fn find_container(anchor: ElementRef<'_>) -> ElementRef<'_> {
    let is_block = |el: &ElementRef<'_>| matches!(el.value().name(), "div" | "article" | "li");
    let has_class = |el: &ElementRef<'_>| {
        el.value()
            .attr("class")
            .is_some_and(|class| !class.trim().is_empty())
    };

    let classed = anchor
        .ancestors()
        .take(MAX_ANCESTOR_DEPTH)
        .filter_map(ElementRef::wrap)
        .find(|el| is_block(el) && has_class(el));
    if let Some(container) = classed {
        return container;
    }

    anchor
        .ancestors()
        .filter_map(ElementRef::wrap)
        .find(is_block)
        .or_else(|| anchor.parent().and_then(ElementRef::wrap))
        .unwrap_or(anchor)
}

/// Normalize a scraped timestamp to RFC 3339 UTC.
///
/// Empty input yields the current time. Input in no known format is returned
/// unchanged.
pub fn normalize_timestamp(raw: &str) -> String {
    let raw = raw.trim();
    if raw.is_empty() {
        return Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return dt
            .with_timezone(&Utc)
            .to_rfc3339_opts(SecondsFormat::Secs, true);
    }

    if let Ok(dt) = DateTime::parse_from_rfc2822(raw) {
        return dt
            .with_timezone(&Utc)
            .to_rfc3339_opts(SecondsFormat::Secs, true);
    }

    let without_zone = raw.trim_end_matches("UTC").trim();
    if let Ok(naive) = NaiveDateTime::parse_from_str(without_zone, NITTER_DATE_FORMAT) {
        return naive
            .and_utc()
            .to_rfc3339_opts(SecondsFormat::Secs, true);
    }

    raw.to_string()
}

/// Sort by timestamp descending, or keep page order if any timestamp
/// fails to parse.
fn sort_newest_first(posts: &mut [CandidatePost]) {
    let parse = |post: &CandidatePost| DateTime::parse_from_rfc3339(&post.published).ok();

    if posts.iter().all(|post| parse(post).is_some()) {
        posts.sort_by_cached_key(|post| Reverse(parse(post)));
    } else {
        log::warn!("Unparseable post timestamp, keeping page order");
    }
}

fn stamp_unparsed(posts: &mut [CandidatePost]) {
    let fetched_at = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
    for post in posts
        .iter_mut()
        .filter(|post| DateTime::parse_from_rfc3339(&post.published).is_err())
    {
        log::debug!(
            "Unknown timestamp {:?} on post {}, using fetch time",
            post.published,
            post.external_id
        );
        post.published = fetched_at.clone();
    }
}

fn first_match(scope: ElementRef<'_>, strategies: &[FieldStrategy]) -> Option<String> {
    strategies.iter().find_map(|strategy| strategy.extract(scope))
}

fn strategies(specs: &[(&str, &'static [&'static str])]) -> Result<Vec<FieldStrategy>> {
    specs
        .iter()
        .map(|&(selector, attrs)| -> Result<FieldStrategy> {
            Ok(FieldStrategy {
                selector: parse_selector(selector)?,
                attrs,
            })
        })
        .collect()
}

fn parse_selector(s: &str) -> Result<Selector> {
    Selector::parse(s).map_err(|e| AppError::selector(s, format!("{e:?}")))
}

fn clean_text(element: ElementRef<'_>) -> String {
    collapse_whitespace(&element.text().collect::<Vec<_>>().join(" "))
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    const MIRROR: &str = "https://nitter.net";

    fn extractor() -> Extractor {
        Extractor::new().unwrap()
    }

    const NITTER_TIMELINE: &str = r#"
        <html><body>
        <div class="timeline">
          <div class="timeline-item timeline-header">
            <div class="tweet-content">Pinned header</div>
            <a class="tweet-link" href="/jack/status/1"></a>
          </div>
          <div class="timeline-item">
            <a class="tweet-link" href="/jack/status/100#m"></a>
            <div class="tweet-body">
              <div class="tweet-header">
                <a class="fullname" href="/jack">Jack</a>
                <span class="tweet-date"><a href="/jack/status/100#m" title="Mar 5, 2024 · 3:04 PM UTC">5 Mar</a></span>
              </div>
              <div class="tweet-content media-body">First   post</div>
              <div class="attachments">
                <div class="attachment image">
                  <a class="still-image" href="/pic/orig/media%2Fabc.jpg"><img src="/pic/media%2Fabc.jpg"></a>
                </div>
              </div>
            </div>
          </div>
          <div class="timeline-item">
            <a class="tweet-link" href="/jack/status/101#m"></a>
            <div class="tweet-body">
              <span class="tweet-date"><a href="/jack/status/101#m" title="Mar 5, 2024 · 5:00 PM UTC">5 Mar</a></span>
              <div class="tweet-content media-body">Second post</div>
            </div>
          </div>
        </div>
        </body></html>
    "#;

    #[test]
    fn test_parse_selector_invalid() {
        assert!(parse_selector("[[invalid").is_err());
        assert!(parse_selector("div[data-tweet-id]").is_ok());
    }

    #[test]
    fn test_nitter_timeline() {
        let posts = extractor().parse_page(NITTER_TIMELINE, MIRROR, "jack");

        assert_eq!(posts.len(), 2);
        let ids: Vec<&str> = posts.iter().map(|p| p.external_id.as_str()).collect();
        assert_eq!(ids, vec!["101", "100"]);

        let first = &posts[1];
        assert_eq!(first.url, "https://nitter.net/jack/status/100#m");
        assert_eq!(first.content, "First post");
        assert_eq!(first.published, "2024-03-05T15:04:00Z");
        assert_eq!(first.author, "Jack");
        assert_eq!(
            first.image_url.as_deref(),
            Some("https://nitter.net/pic/orig/media%2Fabc.jpg")
        );

        let second = &posts[0];
        assert_eq!(second.author, "jack");
        assert_eq!(second.image_url, None);
    }

    #[test]
    fn test_generic_fallback_finds_status_link() {
        let html = r#"<div><a href="/u/status/42">link</a><span>hello</span></div>"#;
        let posts = extractor().parse_page(html, MIRROR, "u");

        assert_eq!(posts.len(), 1);
        assert_eq!(posts[0].external_id, "42");
        assert!(posts[0].content.contains("hello"));
        assert_eq!(posts[0].url, "https://nitter.net/u/status/42");
        assert_eq!(posts[0].author, "u");
    }

    #[test]
    fn test_generic_fallback_prefers_paragraph_and_classed_container() {
        let html = r#"
            <ul>
              <li class="entry">
                <div><div><a href="/u/status/7">@u</a></div></div>
                <p>Paragraph text</p>
                <span>noise</span>
              </li>
            </ul>
        "#;
        let posts = extractor().parse_page(html, MIRROR, "u");

        assert_eq!(posts.len(), 1);
        assert_eq!(posts[0].content, "Paragraph text");
    }

    #[test]
    fn test_generic_fallback_strips_mentions_and_skips_duplicates() {
        let html = r#"
            <div class="card">
              <a href="/u/status/9">@someone</a> said hi
              <a href="/u/status/9">again</a>
            </div>
        "#;
        let posts = extractor().parse_page(html, MIRROR, "u");

        assert_eq!(posts.len(), 1);
        assert!(!posts[0].content.contains("@someone"));
        assert!(posts[0].content.contains("said hi"));
    }

    #[test]
    fn test_data_id_without_permalink_builds_url() {
        let html = r#"
            <div data-tweet-id="555"><p class="tweet-text">Hi there</p>
            <time datetime="2024-01-02T03:04:05+02:00"></time></div>
        "#;
        let posts = extractor().parse_page(html, MIRROR, "jack");

        assert_eq!(posts.len(), 1);
        assert_eq!(posts[0].external_id, "555");
        assert_eq!(posts[0].url, "https://nitter.net/jack/status/555");
        assert_eq!(posts[0].content, "Hi there");
        assert_eq!(posts[0].published, "2024-01-02T01:04:05Z");
    }

    #[test]
    fn test_permalink_without_numeric_id_uses_path() {
        let html = r#"
            <div class="timeline-item">
              <a class="tweet-link" href="/jack/post/abc?ref=1"></a>
              <div class="tweet-content">x</div>
            </div>
        "#;
        let posts = extractor().parse_page(html, MIRROR, "jack");

        assert_eq!(posts[0].external_id, "/jack/post/abc");
    }

    #[test]
    fn test_items_without_content_are_dropped() {
        let html = r#"
            <div class="timeline-item"><a class="tweet-link" href="/jack/status/1"></a></div>
        "#;
        assert!(extractor().parse_page(html, MIRROR, "jack").is_empty());
    }

    #[test]
    fn test_unparseable_timestamp_keeps_page_order() {
        let html = r#"
            <div class="timeline-item">
              <a class="tweet-link" href="/jack/status/1"></a>
              <span class="tweet-date"><a title="yesterday">y</a></span>
              <div class="tweet-content">older</div>
            </div>
            <div class="timeline-item">
              <a class="tweet-link" href="/jack/status/2"></a>
              <span class="tweet-date"><a title="2024-05-01T00:00:00Z">m</a></span>
              <div class="tweet-content">newer</div>
            </div>
        "#;
        let posts = extractor().parse_page(html, MIRROR, "jack");

        let ids: Vec<&str> = posts.iter().map(|p| p.external_id.as_str()).collect();
        assert_eq!(ids, vec!["1", "2"]);
        // Stored with the fetch time so it still orders against real dates.
        let stamped = DateTime::parse_from_rfc3339(&posts[0].published).unwrap();
        assert!(stamped.with_timezone(&Utc) > Utc::now() - chrono::Duration::minutes(1));
        assert_eq!(posts[1].published, "2024-05-01T00:00:00Z");
    }

    #[test]
    fn test_empty_page_yields_nothing() {
        assert!(extractor().parse_page("", MIRROR, "jack").is_empty());
        assert!(extractor()
            .parse_page("<html><body><p>Not found</p></body></html>", MIRROR, "jack")
            .is_empty());
    }

    #[test]
    fn test_normalize_timestamp() {
        assert_eq!(
            normalize_timestamp("Jan 9, 2024 · 11:30 AM UTC"),
            "2024-01-09T11:30:00Z"
        );
        assert_eq!(
            normalize_timestamp("2024-01-09T11:30:00.000Z"),
            "2024-01-09T11:30:00Z"
        );
        assert_eq!(normalize_timestamp("2h"), "2h");
        assert!(DateTime::parse_from_rfc3339(&normalize_timestamp("  ")).is_ok());
    }
}
