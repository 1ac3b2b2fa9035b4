//! Ranked structural/textual markers matched against a page snapshot.
//!
//! Each field or challenge kind owns a [`LandmarkSet`] built from a static
//! list of [`Pattern`]s. Supporting a new locale or layout variant means
//! adding an entry to a list, never a new branch.

use regex::{Regex, RegexBuilder};
use scraper::{ElementRef, Html, Selector};
use tracing::warn;

/// Declarative landmark, compiled once when its set is first used
#[derive(Debug, Clone, Copy)]
pub enum Pattern {
    /// An element matching the CSS selector exists
    Element(&'static str),

    /// An element matching the selector has text matching the regex
    ElementText(&'static str, &'static str),

    /// An element matching the selector carries a non-empty attribute
    Attribute(&'static str, &'static str),

    /// The document title matches the regex
    Title(&'static str),
}

#[derive(Debug)]
enum Landmark {
    Element(Selector),
    ElementText(Selector, Regex),
    Attribute(Selector, &'static str),
    Title(Regex),
}

/// Parsed page plus its title
pub struct Snapshot {
    document: Html,
    title: String,
}

impl Snapshot {
    /// Parse HTML; malformed markup never fails, it just matches less
    pub fn parse(html: &str) -> Self {
        let document = Html::parse_document(html);
        let title = Selector::parse("title")
            .ok()
            .and_then(|selector| document.select(&selector).next().map(element_text))
            .unwrap_or_default();

        Self { document, title }
    }

    /// Parse HTML, preferring a title reported by the browser
    pub fn with_title(html: &str, title: &str) -> Self {
        let mut snapshot = Self::parse(html);
        if !title.trim().is_empty() {
            snapshot.title = title.trim().to_string();
        }
        snapshot
    }

    pub fn title(&self) -> &str {
        &self.title
    }
}

/// Ordered set of landmarks for one field or challenge kind
#[derive(Debug)]
pub struct LandmarkSet {
    name: &'static str,
    landmarks: Vec<Landmark>,
}

impl LandmarkSet {
    /// Compile patterns, dropping (and logging) any that fail to parse
    pub fn compile(name: &'static str, patterns: &[Pattern]) -> Self {
        let landmarks = patterns.iter()
            .filter_map(|pattern| match compile(pattern) {
                Ok(landmark) => Some(landmark),
                Err(e) => {
                    warn!("Invalid {} landmark {:?}: {}", name, pattern, e);
                    None
                }
            })
            .collect();

        Self { name, landmarks }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// True if any landmark matches
    pub fn matches(&self, snapshot: &Snapshot) -> bool {
        self.landmarks.iter().any(|landmark| landmark.text(snapshot).is_some())
    }

    /// Text of every matching landmark, best-ranked first
    pub fn texts(&self, snapshot: &Snapshot) -> Vec<String> {
        self.landmarks.iter()
            .filter_map(|landmark| landmark.text(snapshot))
            .collect()
    }
}

impl Landmark {
    /// Text the landmark yields when it matches
    fn text(&self, snapshot: &Snapshot) -> Option<String> {
        match self {
            Landmark::Element(selector) => snapshot.document.select(selector)
                .next()
                .map(element_text),
            Landmark::ElementText(selector, pattern) => snapshot.document.select(selector)
                .map(element_text)
                .find(|text| pattern.is_match(text)),
            Landmark::Attribute(selector, attr) => snapshot.document.select(selector)
                .filter_map(|element| element.value().attr(attr))
                .map(collapse_whitespace)
                .find(|value| !value.is_empty()),
            Landmark::Title(pattern) => {
                if pattern.is_match(&snapshot.title) {
                    Some(snapshot.title.clone())
                } else {
                    None
                }
            }
        }
    }
}

fn compile(pattern: &Pattern) -> Result<Landmark, String> {
    let selector = |css: &str| Selector::parse(css).map_err(|e| format!("{:?}", e));
    let regex = |re: &str| RegexBuilder::new(re)
        .case_insensitive(true)
        .build()
        .map_err(|e| e.to_string());

    Ok(match *pattern {
        Pattern::Element(css) => Landmark::Element(selector(css)?),
        Pattern::ElementText(css, re) => Landmark::ElementText(selector(css)?, regex(re)?),
        Pattern::Attribute(css, attr) => Landmark::Attribute(selector(css)?, attr),
        Pattern::Title(re) => Landmark::Title(regex(re)?),
    })
}

fn element_text(element: ElementRef<'_>) -> String {
    collapse_whitespace(&element.text().collect::<String>())
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
