use regex::Regex;
use std::sync::OnceLock;
use url::Url;
use tracing::{debug, warn};

use crate::cli::config::RunConfig;
use crate::crawler::task::Task;

/// One input row as seen by the scheduler
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    /// Identifier from the input, when it has one
    pub id: Option<String>,
    pub url: String,
}

/// Turns input rows into tasks and splits them into chunks
pub struct Scheduler {
    /// Maximum tasks per chunk
    chunk_size: usize,

    /// Attempt budget given to every task
    max_attempts: u32,
}

impl Scheduler {
    pub fn new(config: &RunConfig) -> Self {
        Self {
            chunk_size: config.chunk_size.max(1),
            max_attempts: config.max_attempts,
        }
    }

    /// One task per target, indexed by input position
    pub fn build_tasks(&self, targets: &[Target]) -> Vec<Task> {
        targets.iter()
            .enumerate()
            .map(|(index, target)| {
                let url = normalize_url(&target.url);
                let id = target.id.clone()
                    .filter(|id| !id.trim().is_empty())
                    .or_else(|| asin_from_url(&url))
                    .unwrap_or_else(|| {
                        warn!("Row {} has no product id, using its URL", index);
                        url.clone()
                    });
                Task::new(index, id, url, self.max_attempts)
            })
            .collect()
    }

    /// Split tasks into ordered chunks of at most `chunk_size`
    pub fn chunks(&self, tasks: Vec<Task>) -> Vec<Vec<Task>> {
        let mut chunks = Vec::with_capacity(self.chunk_count(tasks.len()));
        let mut tasks = tasks.into_iter().peekable();

        while tasks.peek().is_some() {
            chunks.push(tasks.by_ref().take(self.chunk_size).collect());
        }

        debug!("Split into {} chunks of up to {} tasks", chunks.len(), self.chunk_size);
        chunks
    }

    pub fn chunk_count(&self, tasks: usize) -> usize {
        tasks.div_ceil(self.chunk_size)
    }
}

/// Normalize a product URL so equal pages look equal
pub fn normalize_url(url: &str) -> String {
    let mut normalized = match Url::parse(url.trim()) {
        Ok(url) => url,
        Err(e) => {
            warn!("Keeping unparseable URL '{}' as is: {}", url, e);
            return url.trim().to_string();
        }
    };

    // Parsing already lowercases the host of http(s) URLs

    // Remove default ports
    if let Some(port) = normalized.port() {
        if (normalized.scheme() == "http" && port == 80) ||
           (normalized.scheme() == "https" && port == 443) {
            let _ = normalized.set_port(None);
        }
    }

    // Remove fragments (anchors)
    normalized.set_fragment(None);

    // Drop an empty query left behind by "?"
    if normalized.query() == Some("") {
        normalized.set_query(None);
    }

    normalized.to_string()
}

/// ASIN from a `/dp/<ASIN>` or `/gp/product/<ASIN>` path segment
pub fn asin_from_url(url: &str) -> Option<String> {
    static ASIN: OnceLock<Regex> = OnceLock::new();
    let pattern = ASIN.get_or_init(|| {
        Regex::new(r"(?i)/(?:dp|gp/product)/([A-Z0-9]{10})(?:[/?#]|$)").expect("ASIN pattern is valid")
    });

    pattern.captures(url)
        .and_then(|captures| captures.get(1))
        .map(|asin| asin.as_str().to_uppercase())
}
