use anyhow::Result;
use rand::{thread_rng, Rng};
use serde::{Serialize, Deserialize};
use tracing::debug;

use crate::cli::config::{BrowserSettings, Viewport};

/// Picks the identity each new browsing context presents
pub struct FingerprintManager {
    user_agents: Vec<String>,
    locale: String,
    viewport: Viewport,
}

/// Identity applied to one browsing context
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fingerprint {
    pub user_agent: String,
    pub locale: String,
    pub accept_language: String,
    pub viewport: Viewport,
}

impl FingerprintManager {
    pub fn new(settings: &BrowserSettings) -> Self {
        Self {
            user_agents: settings.user_agents.clone(),
            locale: settings.locale.clone(),
            viewport: settings.viewport.clone(),
        }
    }

    /// Select a random user agent with the configured locale and viewport
    pub fn random_fingerprint(&self) -> Result<Fingerprint> {
        if self.user_agents.is_empty() {
            anyhow::bail!("No user agents available");
        }

        let mut rng = thread_rng();
        let user_agent = self.user_agents[rng.gen_range(0..self.user_agents.len())].clone();

        let fingerprint = Fingerprint {
            user_agent,
            locale: self.locale.clone(),
            accept_language: accept_language(&self.locale),
            viewport: self.viewport.clone(),
        };

        debug!("Selected fingerprint: {}", fingerprint.user_agent);

        Ok(fingerprint)
    }
}

/// `fr-FR` becomes `fr-FR,fr;q=0.9,en;q=0.8`
fn accept_language(locale: &str) -> String {
    let language = locale.split('-').next().unwrap_or(locale);
    if language == locale {
        format!("{},en;q=0.8", locale)
    } else {
        format!("{},{};q=0.9,en;q=0.8", locale, language)
    }
}
