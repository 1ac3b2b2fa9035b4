use serde::{Serialize, Deserialize};
use std::fmt;
use std::sync::OnceLock;

use crate::extract::landmark::{LandmarkSet, Pattern, Snapshot};
use crate::extract::parse::landmarks as product_landmarks;

/// Obstacle found on a freshly loaded page; re-derived on every inspection
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ChallengeState {
    None,
    CookieConsent,
    ClickVerify,
    Captcha,
    Unrecognized,
}

impl fmt::Display for ChallengeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ChallengeState::None => "none",
            ChallengeState::CookieConsent => "cookie_consent",
            ChallengeState::ClickVerify => "click_verify",
            ChallengeState::Captcha => "captcha",
            ChallengeState::Unrecognized => "unrecognized",
        };
        f.write_str(label)
    }
}

const CAPTCHA: &[Pattern] = &[
    Pattern::Element("form[action*='validateCaptcha'] img[src*='/captcha/']"),
    Pattern::Element("img[src*='/captcha/']"),
    Pattern::Element("input#captchacharacters"),
];

const CLICK_VERIFY: &[Pattern] = &[
    Pattern::Element("form[action*='validateCaptcha'] button[type='submit']"),
    Pattern::Element("form[action*='validateCaptcha'] input[type='submit']"),
    Pattern::ElementText("form[action*='validateCaptcha'] button, form[action*='validateCaptcha'] a", "continu|proceed|weiter|continua"),
];

const COOKIE_CONSENT: &[Pattern] = &[
    Pattern::Element("#sp-cc-accept"),
    Pattern::Element("form#sp-cc input[name='accept']"),
    Pattern::Element("input[name='accept'][type='submit']"),
];

/// Hints that the page is a block of some kind, known or not
const BLOCK_HINTS: &[Pattern] = &[
    Pattern::Title("captcha|robot|verify|attention|vérification|bot check"),
    Pattern::Element("form[action*='validateCaptcha']"),
    Pattern::Element("form[action*='errors/validateCaptcha']"),
];

/// Controls that dismiss the consent banner, best first
pub const CONSENT_ACCEPT: &[&str] = &[
    "#sp-cc-accept",
    "form#sp-cc input[name='accept']",
    "input[name='accept']",
    "button[name='accept']",
];

/// Controls that pass a click-to-verify wall
pub const VERIFY_CONTROLS: &[&str] = &[
    "form[action*='validateCaptcha'] button[type='submit']",
    "form[action*='validateCaptcha'] input[type='submit']",
    "form[action*='validateCaptcha'] .a-button-text",
];

pub const CAPTCHA_IMAGE: &[&str] = &[
    "form[action*='validateCaptcha'] img[src*='/captcha/']",
    "img[src*='/captcha/']",
];

pub const CAPTCHA_INPUT: &[&str] = &[
    "input#captchacharacters",
    "input[type='text'][name*='captcha']",
    "input[type='text'][name*='field-keywords']",
];

pub const CAPTCHA_SUBMIT: &[&str] = &[
    "form[action*='validateCaptcha'] button[type='submit']",
    "form[action*='validateCaptcha'] input[type='submit']",
    "button[type='submit']",
];

struct ChallengeLandmarks {
    captcha: LandmarkSet,
    click_verify: LandmarkSet,
    cookie_consent: LandmarkSet,
    block_hints: LandmarkSet,
}

fn challenge_landmarks() -> &'static ChallengeLandmarks {
    static LANDMARKS: OnceLock<ChallengeLandmarks> = OnceLock::new();
    LANDMARKS.get_or_init(|| ChallengeLandmarks {
        captcha: LandmarkSet::compile("captcha", CAPTCHA),
        click_verify: LandmarkSet::compile("click_verify", CLICK_VERIFY),
        cookie_consent: LandmarkSet::compile("cookie_consent", COOKIE_CONSENT),
        block_hints: LandmarkSet::compile("block_hints", BLOCK_HINTS),
    })
}

/// Classify the page from its structure, independent of display language.
///
/// Blocking walls outrank the consent banner, and a page that still shows
/// product structure is never treated as an unknown block.
pub fn detect(html: &str, title: &str) -> ChallengeState {
    let snapshot = Snapshot::with_title(html, title);
    let marks = challenge_landmarks();

    if marks.captcha.matches(&snapshot) {
        ChallengeState::Captcha
    } else if marks.click_verify.matches(&snapshot) {
        ChallengeState::ClickVerify
    } else if marks.block_hints.matches(&snapshot) && !product_landmarks().product_page.matches(&snapshot) {
        ChallengeState::Unrecognized
    } else if marks.cookie_consent.matches(&snapshot) {
        ChallengeState::CookieConsent
    } else {
        ChallengeState::None
    }
}
