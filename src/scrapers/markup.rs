//! Markup adapter for the booking site.
//!
//! Everything that depends on the site's HTML structure lives here: the
//! listing title selector, the article heading, the mugshot image class, and
//! the content parser for the free-text detail block. The rest of the
//! pipeline only sees [`ArticleSummary`] and [`ArticleDetail`], so a site
//! redesign touches this file and its fixtures only.
//!
//! # Expected structure
//!
//! | Piece | Selector |
//! |-------|----------|
//! | Listing entry | `h2.entry-title a[href]` |
//! | Article heading | `h1.entry-title`, else the first `h1` |
//! | Mugshot | `img.attachment-full[src]` |
//! | Detail block | `div.entry-content` |

use itertools::Itertools;
use once_cell::sync::Lazy;
use scraper::{ElementRef, Html, Selector};
use tracing::{debug, warn};
use url::Url;

use crate::error::{Result, ScrapeError};
use crate::models::{ArticleSummary, BookingTitle};
use crate::utils::normalize_whitespace;

fn selector(css: &str) -> Selector {
    Selector::parse(css).unwrap_or_else(|e| panic!("invalid built-in selector {css:?}: {e}"))
}

static LISTING_TITLE: Lazy<Selector> = Lazy::new(|| selector("h2.entry-title"));
static LINK: Lazy<Selector> = Lazy::new(|| selector("a[href]"));
static ARTICLE_HEADING: Lazy<Selector> = Lazy::new(|| selector("h1.entry-title"));
static ANY_H1: Lazy<Selector> = Lazy::new(|| selector("h1"));
static MUGSHOT: Lazy<Selector> = Lazy::new(|| selector("img.attachment-full"));
static CONTENT: Lazy<Selector> = Lazy::new(|| selector("div.entry-content"));
static DL: Lazy<Selector> = Lazy::new(|| selector("dl"));
static DT: Lazy<Selector> = Lazy::new(|| selector("dt"));
static DD: Lazy<Selector> = Lazy::new(|| selector("dd"));
static LI: Lazy<Selector> = Lazy::new(|| selector("li"));
static HEADINGS: Lazy<Selector> = Lazy::new(|| selector("h1, h2, h3, h4, h5, h6"));

/// What an article page yields before any image is fetched.
#[derive(Debug, Clone, PartialEq)]
pub struct ArticleDetail {
    pub title: BookingTitle,
    /// Absolute URL of the mugshot, if the page has one.
    pub image_url: Option<String>,
    pub offense_description: String,
    pub additional_details: String,
}

/// Site-structure adapter used by the paginator and extractor.
pub trait Markup: Send + Sync {
    /// Article summaries on a listing page, in page order.
    fn listing(&self, html: &str, page_url: &Url) -> Vec<ArticleSummary>;

    /// Title, mugshot URL and detail text of an article page.
    fn article(&self, html: &str, article_url: &Url) -> Result<ArticleDetail>;
}

/// The WordPress-style layout the booking site uses.
#[derive(Debug, Default, Clone, Copy)]
pub struct EntryMarkup;

impl Markup for EntryMarkup {
    fn listing(&self, html: &str, page_url: &Url) -> Vec<ArticleSummary> {
        let document = Html::parse_document(html);
        let mut articles = Vec::new();

        for heading in document.select(&LISTING_TITLE) {
            let title = element_text(heading);
            let Some(href) = heading
                .select(&LINK)
                .next()
                .and_then(|a| a.value().attr("href"))
            else {
                warn!(%title, "Listing entry has no link; skipping");
                continue;
            };
            match page_url.join(href) {
                Ok(url) => articles.push(ArticleSummary {
                    url: url.to_string(),
                    title,
                }),
                Err(e) => {
                    warn!(%title, href, error = %e, "Listing link is not a valid URL; skipping")
                }
            }
        }

        debug!(count = articles.len(), url = %page_url, "Parsed listing page");
        articles
    }

    fn article(&self, html: &str, article_url: &Url) -> Result<ArticleDetail> {
        let document = Html::parse_document(html);

        let heading = document
            .select(&ARTICLE_HEADING)
            .next()
            .or_else(|| document.select(&ANY_H1).next())
            .ok_or_else(|| ScrapeError::parse(format!("no article heading at {article_url}")))?;
        let title = BookingTitle::parse(&element_text(heading))?;

        let image_url = document
            .select(&MUGSHOT)
            .find_map(|img| img.value().attr("src").or_else(|| img.value().attr("data-src")))
            .and_then(|src| article_url.join(src).ok())
            .map(|u| u.to_string());

        let (offense_description, additional_details) = match document.select(&CONTENT).next() {
            Some(block) => parse_content(block),
            None => {
                warn!(url = %article_url, "Article has no entry-content block");
                (String::new(), String::new())
            }
        };

        Ok(ArticleDetail {
            title,
            image_url,
            offense_description,
            additional_details,
        })
    }
}

fn element_text(el: ElementRef<'_>) -> String {
    normalize_whitespace(&el.text().collect::<String>())
}

/// Heading tier: 1 for `h1` through 6 for `h6`.
fn heading_level(el: &ElementRef<'_>) -> Option<u8> {
    match el.value().name() {
        "h1" => Some(1),
        "h2" => Some(2),
        "h3" => Some(3),
        "h4" => Some(4),
        "h5" => Some(5),
        "h6" => Some(6),
        _ => None,
    }
}

/// Parse a detail block given as an HTML fragment.
///
/// Returns `(offense_description, additional_details)`.
pub fn parse_content_html(html: &str) -> (String, String) {
    let fragment = Html::parse_fragment(html);
    parse_content(fragment.root_element())
}

/// Split a detail block into offense description and additional details.
///
/// - Additional details: each `dt`/`dd` pair of the first `dl`, as
///   `"term: definition"` lines.
/// - Offense description: paragraphs and list items (as `"- item"`) that
///   follow the first heading mentioning "charges", up to the next heading
///   of the same or a higher tier.
/// - If that yields nothing, paragraph/div text following the definition
///   list that holds the last `dd`.
fn parse_content(block: ElementRef<'_>) -> (String, String) {
    let additional_details = block
        .select(&DL)
        .next()
        .map(|dl| {
            dl.select(&DT)
                .zip(dl.select(&DD))
                .map(|(dt, dd)| format!("{}: {}", element_text(dt), element_text(dd)))
                .join("\n")
        })
        .unwrap_or_default();

    let mut offense_lines = charges_section(block);
    if offense_lines.is_empty() {
        warn!("No charges section found; falling back to content after the details list");
        offense_lines = after_last_definition(block);
    }
    let offense_description = offense_lines.join("\n");

    debug!(%offense_description, %additional_details, "Parsed detail block");
    (offense_description, additional_details)
}

fn charges_section(block: ElementRef<'_>) -> Vec<String> {
    let Some(heading) = block
        .select(&HEADINGS)
        .find(|h| element_text(*h).to_lowercase().contains("charges"))
    else {
        return Vec::new();
    };

    let level = heading_level(&heading).unwrap_or(1);

    let mut lines = Vec::new();
    for sibling in heading.next_siblings().filter_map(ElementRef::wrap) {
        // Lower-tier sub-headings stay inside the section.
        if heading_level(&sibling).is_some_and(|l| l <= level) {
            break;
        }
        match sibling.value().name() {
            "p" => push_text(&mut lines, sibling),
            "ul" | "ol" => {
                for li in sibling.select(&LI) {
                    let text = element_text(li);
                    if !text.is_empty() {
                        lines.push(format!("- {text}"));
                    }
                }
            }
            _ => {}
        }
    }
    lines
}

fn after_last_definition(block: ElementRef<'_>) -> Vec<String> {
    let Some(last_dd) = block.select(&DD).last() else {
        return Vec::new();
    };
    let anchor = last_dd
        .parent()
        .and_then(ElementRef::wrap)
        .unwrap_or(last_dd);

    let mut lines = Vec::new();
    for sibling in anchor.next_siblings().filter_map(ElementRef::wrap) {
        if matches!(sibling.value().name(), "p" | "div") {
            push_text(&mut lines, sibling);
        }
    }
    lines
}

fn push_text(lines: &mut Vec<String>, el: ElementRef<'_>) {
    let text = element_text(el);
    if !text.is_empty() {
        lines.push(text);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    const LISTING: &str = r#"
        <html><body>
          <article>
            <h2 class="entry-title"><a href="https://jail.example.com/john-edwards/">John Edwards 08/24/2024</a></h2>
          </article>
          <article>
            <h2 class="entry-title"><a href="/mary-o-brien/">Mary
                O'Brien   08/24/2024</a></h2>
          </article>
          <article>
            <h2 class="entry-title">No Link Here 08/24/2024</h2>
          </article>
          <h2 class="widget-title"><a href="/ignored/">Recent Posts</a></h2>
        </body></html>
    "#;

    const DETAIL_BLOCK: &str = r#"
        <div class="entry-content">
          <dl>
            <dt>Age</dt><dd>34</dd>
            <dt>Booking Number</dt><dd> 2024-001234 </dd>
          </dl>
          <h3>Charges</h3>
          <p>Arrested by Metro Police.</p>
          <ul>
            <li>WANTON ENDANGERMENT - 2ND DEGREE</li>
            <li>DRUG PARAPHERNALIA - BUY/POSSESS</li>
          </ul>
          <h3>Bond</h3>
          <p>$25,000.00</p>
        </div>
    "#;

    #[test]
    fn test_listing_extracts_titles_and_links() {
        let articles = EntryMarkup.listing(LISTING, &url("https://jail.example.com/2024/08/"));
        assert_eq!(articles.len(), 2);
        assert_eq!(articles[0].url, "https://jail.example.com/john-edwards/");
        assert_eq!(articles[0].title, "John Edwards 08/24/2024");
        assert_eq!(articles[1].url, "https://jail.example.com/mary-o-brien/");
        assert_eq!(articles[1].title, "Mary O'Brien 08/24/2024");
    }

    #[test]
    fn test_listing_empty_page() {
        let html = "<html><body><p>Nothing found.</p></body></html>";
        let page = url("https://jail.example.com/2024/08/page/9/");
        assert!(EntryMarkup.listing(html, &page).is_empty());
    }

    #[test]
    fn test_content_parser_charges_and_details() {
        let (offense, details) = parse_content_html(DETAIL_BLOCK);

        let detail_lines: Vec<&str> = details.lines().collect();
        assert_eq!(detail_lines, vec!["Age: 34", "Booking Number: 2024-001234"]);

        let offense_lines: Vec<&str> = offense.lines().collect();
        assert_eq!(
            offense_lines,
            vec![
                "Arrested by Metro Police.",
                "- WANTON ENDANGERMENT - 2ND DEGREE",
                "- DRUG PARAPHERNALIA - BUY/POSSESS",
            ]
        );
    }

    #[test]
    fn test_content_parser_heading_match_is_case_insensitive() {
        let html = concat!(
            "<h4>LIST OF CHARGES:</h4><p>THEFT BY UNLAWFUL TAKING</p>",
            "<h4>Notes</h4><p>ignored</p>"
        );
        let (offense, details) = parse_content_html(html);
        assert_eq!(offense, "THEFT BY UNLAWFUL TAKING");
        assert_eq!(details, "");
    }

    #[test]
    fn test_charges_section_spans_lower_tier_subheadings() {
        let html = r#"<h3>Charges</h3><p>COUNT ONE</p><h5>Count 2</h5><ul><li>THEFT</li></ul>
                      <h3>Bond</h3><p>$500</p>"#;
        let (offense, _) = parse_content_html(html);
        assert_eq!(offense, "COUNT ONE\n- THEFT");
    }

    #[test]
    fn test_charges_section_ends_at_higher_tier_heading() {
        let html = r#"<h3>Charges</h3><p>COUNT ONE</p><h2>Related</h2><p>ignored</p>"#;
        let (offense, _) = parse_content_html(html);
        assert_eq!(offense, "COUNT ONE");
    }

    #[test]
    fn test_content_parser_falls_back_after_last_definition() {
        let html = r#"
            <dl><dt>Age</dt><dd>51</dd></dl>
            <p>ALCOHOL INTOXICATION IN A PUBLIC PLACE</p>
            <div>DISORDERLY CONDUCT 2ND DEGREE</div>
        "#;
        let (offense, details) = parse_content_html(html);
        assert_eq!(details, "Age: 51");
        assert_eq!(
            offense,
            "ALCOHOL INTOXICATION IN A PUBLIC PLACE\nDISORDERLY CONDUCT 2ND DEGREE"
        );
    }

    #[test]
    fn test_content_parser_without_structure() {
        let (offense, details) = parse_content_html("<p>Just a paragraph.</p>");
        assert_eq!(offense, "");
        assert_eq!(details, "");
    }

    #[test]
    fn test_article_page() {
        let html = format!(
            r#"<html><body>
                 <h1 class="entry-title">Jo'hn O'Brien 08/24/2024</h1>
                 <img class="attachment-full size-full" src="/wp-content/uploads/2024/08/obrien.jpg">
                 {DETAIL_BLOCK}
               </body></html>"#
        );
        let detail = EntryMarkup
            .article(&html, &url("https://jail.example.com/john-obrien/"))
            .unwrap();

        assert_eq!(detail.title.first_name, "John");
        assert_eq!(detail.title.last_name, "OBrien");
        assert_eq!(detail.title.booking_date, NaiveDate::from_ymd_opt(2024, 8, 24).unwrap());
        assert_eq!(
            detail.image_url.as_deref(),
            Some("https://jail.example.com/wp-content/uploads/2024/08/obrien.jpg")
        );
        assert_eq!(detail.additional_details.lines().count(), 2);
        assert!(detail.offense_description.starts_with("Arrested by Metro Police."));
    }

    #[test]
    fn test_article_without_image() {
        let html = r#"<h1>John Edwards 08/24/2024</h1><div class="entry-content"><p>x</p></div>"#;
        let detail = EntryMarkup
            .article(html, &url("https://jail.example.com/john-edwards/"))
            .unwrap();
        assert!(detail.image_url.is_none());
    }

    #[test]
    fn test_article_with_malformed_heading() {
        let html = r#"<h1>Breaking News</h1>"#;
        let err = EntryMarkup
            .article(html, &url("https://jail.example.com/news/"))
            .unwrap_err();
        assert!(matches!(err, ScrapeError::Parse(_)));
    }
}
