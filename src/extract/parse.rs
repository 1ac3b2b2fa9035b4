//! Field extraction from a rendered product page.
//!
//! Availability, rating and review count are read independently; a missing
//! field degrades to `Unknown`/`None` and never aborts the others.

use std::sync::OnceLock;
use tracing::debug;

use crate::crawler::task::Availability;
use crate::extract::landmark::{LandmarkSet, Pattern, Snapshot};
use crate::extract::numbers::{parse_count, parse_rating_phrase};

/// "No featured offers" and other explicit out-of-stock blocks
const OUT_OF_STOCK: &[Pattern] = &[
    Pattern::Element("#fodcx_feature_div #fod-cx-box"),
    Pattern::Element("#fod-cx-message-with-learn-more"),
    Pattern::Element("#outOfStockBuyBox_feature_div #outOfStock"),
    Pattern::Element("#outOfStock"),
];

/// Buy box landmarks that only render when the product can be ordered
const IN_STOCK: &[Pattern] = &[
    Pattern::Element("#add-to-cart-button"),
    Pattern::Element("#buy-now-button"),
    Pattern::Element("#availability .a-color-success"),
    Pattern::Element("#submit\\.add-to-cart"),
];

/// Blocks whose text describes availability, best first
const AVAILABILITY_TEXT: &[Pattern] = &[
    Pattern::Element("#availability .a-color-success"),
    Pattern::Element("#availability .a-color-error"),
    Pattern::Element("#availability > span:first-of-type"),
    Pattern::Element("#desktop_buybox_feature_div #availability span"),
    Pattern::Element("#fodcx_feature_div #fod-cx-message-with-learn-more span:first-child"),
    Pattern::Element("#mir-layout-DELIVERY_BLOCK-slot-PRIMARY_DELIVERY_MESSAGE_LARGE"),
    Pattern::Element("#outOfStock span.a-color-price"),
    Pattern::Element("#outOfStockBuyBox_feature_div span.a-color-price"),
];

const RATING: &[Pattern] = &[
    Pattern::Attribute("#averageCustomerReviews #acrPopover", "title"),
    Pattern::Attribute("#acrPopover", "title"),
    Pattern::Element("#averageCustomerReviews span.a-icon-alt"),
    Pattern::Element("#acrPopover span.a-size-base"),
    Pattern::Element("[data-hook='rating-out-of-text']"),
];

const REVIEW_COUNT: &[Pattern] = &[
    Pattern::Element("#averageCustomerReviews #acrCustomerReviewText"),
    Pattern::Element("#acrCustomerReviewText"),
    Pattern::Element("[data-hook='total-review-count']"),
];

/// Structure present on any product detail page, whatever its stock state
const PRODUCT_PAGE: &[Pattern] = &[
    Pattern::Element("#productTitle"),
    Pattern::Element("#dp-container"),
    Pattern::Element("#ppd"),
    Pattern::Element("#centerCol"),
    Pattern::Element("#averageCustomerReviews"),
];

const NOT_FOUND: &[Pattern] = &[
    Pattern::Title("page introuvable|page non trouvée|page not found|seite nicht gefunden|pagina non trovata|página no encontrada"),
    Pattern::Element("a[href*='cs_404']"),
    Pattern::ElementText("b, h1, h2, span", "ne peut pas trouver cette page|looking for something\\?|cerchi qualcosa\\?"),
];

/// Fragments that are never availability statements
const IGNORED_TEXT: &[&str] = &["lire la suite", "read more", "leggi di più", "weiterlesen"];

pub struct Landmarks {
    pub out_of_stock: LandmarkSet,
    pub in_stock: LandmarkSet,
    pub availability_text: LandmarkSet,
    pub rating: LandmarkSet,
    pub review_count: LandmarkSet,
    pub product_page: LandmarkSet,
    pub not_found: LandmarkSet,
}

/// Compiled product landmarks, shared by every task
pub fn landmarks() -> &'static Landmarks {
    static LANDMARKS: OnceLock<Landmarks> = OnceLock::new();
    LANDMARKS.get_or_init(|| Landmarks {
        out_of_stock: LandmarkSet::compile("out_of_stock", OUT_OF_STOCK),
        in_stock: LandmarkSet::compile("in_stock", IN_STOCK),
        availability_text: LandmarkSet::compile("availability_text", AVAILABILITY_TEXT),
        rating: LandmarkSet::compile("rating", RATING),
        review_count: LandmarkSet::compile("review_count", REVIEW_COUNT),
        product_page: LandmarkSet::compile("product_page", PRODUCT_PAGE),
        not_found: LandmarkSet::compile("not_found", NOT_FOUND),
    })
}

/// Everything read from one product page
#[derive(Debug, Clone, PartialEq)]
pub struct Extraction {
    pub availability: Availability,
    pub availability_text: Option<String>,
    pub average_rating: Option<f64>,
    pub review_count: Option<u64>,

    /// At least one product or availability landmark matched
    pub layout_recognized: bool,

    /// The page is the target's "not found" page
    pub page_missing: bool,
}

/// Extract all fields from rendered page content
pub fn parse_product(html: &str) -> Extraction {
    let snapshot = Snapshot::parse(html);
    let marks = landmarks();

    let availability = parse_availability(&snapshot);
    let page_missing = availability == Availability::Unknown && marks.not_found.matches(&snapshot);
    let layout_recognized = availability != Availability::Unknown || marks.product_page.matches(&snapshot);

    let extraction = Extraction {
        availability,
        availability_text: parse_availability_text(&snapshot),
        average_rating: parse_rating(&snapshot),
        review_count: parse_review_count(&snapshot),
        layout_recognized,
        page_missing,
    };

    debug!(
        "Parsed page '{}': availability={}, rating={:?}, reviews={:?}",
        snapshot.title(),
        extraction.availability,
        extraction.average_rating,
        extraction.review_count
    );

    extraction
}

/// Out-of-stock marker first, then the buy box, otherwise `Unknown`
pub fn parse_availability(snapshot: &Snapshot) -> Availability {
    let marks = landmarks();
    if marks.out_of_stock.matches(snapshot) {
        Availability::OutOfStock
    } else if marks.in_stock.matches(snapshot) {
        Availability::InStock
    } else {
        Availability::Unknown
    }
}

pub fn parse_availability_text(snapshot: &Snapshot) -> Option<String> {
    landmarks().availability_text.texts(snapshot)
        .into_iter()
        .find(|text| {
            let lower = text.to_lowercase();
            !text.is_empty() && !IGNORED_TEXT.iter().any(|ignored| lower.contains(ignored))
        })
}

/// Average rating on a 0 to 5 scale
pub fn parse_rating(snapshot: &Snapshot) -> Option<f64> {
    landmarks().rating.texts(snapshot)
        .iter()
        .filter_map(|text| parse_rating_phrase(text))
        .find(|rating| (0.0..=5.0).contains(rating))
}

pub fn parse_review_count(snapshot: &Snapshot) -> Option<u64> {
    landmarks().review_count.texts(snapshot)
        .iter()
        .find_map(|text| parse_count(text))
}
