use async_trait::async_trait;
use reqwest::Client;
use serde::{Serialize, Deserialize};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use crate::cli::config::OcrSettings;

#[derive(Debug, Error)]
pub enum OcrError {
    #[error("OCR request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("OCR service returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("OCR service returned no text")]
    Empty,
}

/// Best-effort text recognition for challenge images.
///
/// A returned guess carries no promise of being right; callers check the
/// page afterwards instead of trusting it.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait OcrSolver: Send + Sync {
    async fn solve(&self, image: &[u8]) -> Result<String, OcrError>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OcrResponse {
    pub text: String,
}

/// OCR solver reached over HTTP
pub struct RemoteOcrService {
    client: Client,
    endpoint: String,
}

impl RemoteOcrService {
    pub fn new(settings: &OcrSettings) -> Result<Self, OcrError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            endpoint: settings.endpoint.clone(),
        })
    }
}

#[async_trait]
impl OcrSolver for RemoteOcrService {
    async fn solve(&self, image: &[u8]) -> Result<String, OcrError> {
        debug!("Sending {} byte challenge image to OCR service", image.len());

        let response = self.client.post(&self.endpoint)
            .header(reqwest::header::CONTENT_TYPE, "image/png")
            .body(image.to_vec())
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(OcrError::Status { status: status.as_u16(), body });
        }

        let guess = response.json::<OcrResponse>().await?.text.trim().to_string();
        if guess.is_empty() {
            return Err(OcrError::Empty);
        }

        debug!("OCR guess: {}", guess);

        Ok(guess)
    }
}
