use std::time::Duration;
use tokio::time::sleep;
use thirtyfour::prelude::*;
use tracing::debug;

use crate::cli::config::BrowserBehavior;
use crate::utils::pacing::pick_ms;

/// Human-like interaction pacing for WebDriver elements
#[derive(Debug, Clone)]
pub struct BehaviorSimulator {
    config: BrowserBehavior,
}

impl BehaviorSimulator {
    pub fn new(config: BrowserBehavior) -> Self {
        Self { config }
    }

    /// Click after a random reaction delay
    pub async fn click(&self, element: &WebElement) -> WebDriverResult<()> {
        let delay_ms = pick_ms(self.config.click_delay);
        sleep(Duration::from_millis(delay_ms)).await;

        element.scroll_into_view().await?;
        element.click().await?;

        debug!("Clicked element after {} ms", delay_ms);

        Ok(())
    }

    /// Type text one character at a time with a variable delay
    pub async fn type_text(&self, element: &WebElement, text: &str) -> WebDriverResult<()> {
        element.clear().await?;

        for c in text.chars() {
            element.send_keys(c.to_string()).await?;
            sleep(Duration::from_millis(pick_ms(self.config.typing_speed))).await;
        }

        debug!("Typed {} characters", text.chars().count());

        Ok(())
    }
}
