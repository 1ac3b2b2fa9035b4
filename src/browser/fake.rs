//! Scripted in-memory browsing engine for tests.
//!
//! Each URL maps to a list of visits served in order; the last one repeats.
//! Click rules swap the current page when a selector is activated, so
//! challenge flows can be played out without a real browser.

use async_trait::async_trait;
use scraper::{Html, Selector};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::browser::engine::{BrowserError, BrowsingContext, BrowsingEngine, Page, PageElement};
use crate::cli::config::GraderConfig;
use crate::extract::landmark::Snapshot;

/// What one navigation to a URL produces
#[derive(Debug, Clone)]
pub enum Visit {
    Page(String),
    Timeout,
    Fail,
    /// Never completes; the caller's timeout has to fire
    Hang,
}

impl Visit {
    pub fn page(html: &str) -> Self {
        Visit::Page(html.to_string())
    }
}

/// Page swap applied when `selector` is activated
#[derive(Debug, Clone)]
struct ClickRule {
    selector: String,
    /// Text that must have been typed for the submit to pass
    expect_typed: Option<String>,
    pass: String,
    fail: Option<String>,
}

#[derive(Default)]
struct Shared {
    routes: Mutex<HashMap<String, Vec<Visit>>>,
    navigations: Mutex<HashMap<String, usize>>,
    rules: Mutex<Vec<ClickRule>>,
    active: AtomicUsize,
    peak: AtomicUsize,
    opened: AtomicUsize,
    hold: Mutex<Duration>,
    launch_fails: Mutex<bool>,
    unavailable_after: Mutex<Option<usize>>,
    reads: AtomicUsize,
    crash_after_reads: Mutex<Option<usize>>,
    lost: AtomicBool,
}

impl Shared {
    fn alive(&self) -> Result<(), BrowserError> {
        if self.lost.load(Ordering::SeqCst) {
            return Err(BrowserError::EngineUnavailable("fake engine crashed".to_string()));
        }
        Ok(())
    }

    /// Count a page read, losing the engine once the read budget is spent
    fn read(&self) -> Result<(), BrowserError> {
        self.alive()?;
        let read = self.reads.fetch_add(1, Ordering::SeqCst);
        if let Some(limit) = *self.crash_after_reads.lock().unwrap() {
            if read >= limit {
                self.lost.store(true, Ordering::SeqCst);
            }
        }
        self.alive()
    }
}

#[derive(Clone, Default)]
pub struct FakeEngine {
    shared: Arc<Shared>,
}

impl FakeEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn route(self, url: &str, visits: Vec<Visit>) -> Self {
        self.shared.routes.lock().unwrap().insert(url.to_string(), visits);
        self
    }

    /// Activating `selector` replaces the current page with `html`
    pub fn on_click(self, selector: &str, html: &str) -> Self {
        self.shared.rules.lock().unwrap().push(ClickRule {
            selector: selector.to_string(),
            expect_typed: None,
            pass: html.to_string(),
            fail: None,
        });
        self
    }

    /// Activating `selector` passes only when `expected` was typed first
    pub fn on_submit(self, selector: &str, expected: &str, pass: &str, fail: &str) -> Self {
        self.shared.rules.lock().unwrap().push(ClickRule {
            selector: selector.to_string(),
            expect_typed: Some(expected.to_string()),
            pass: pass.to_string(),
            fail: Some(fail.to_string()),
        });
        self
    }

    /// Keep every successful navigation busy for `hold`
    pub fn hold(self, hold: Duration) -> Self {
        *self.shared.hold.lock().unwrap() = hold;
        self
    }

    pub fn failing_launch(self) -> Self {
        *self.shared.launch_fails.lock().unwrap() = true;
        self
    }

    /// Report the engine as gone once `opens` contexts have been handed out
    pub fn unavailable_after(self, opens: usize) -> Self {
        *self.shared.unavailable_after.lock().unwrap() = Some(opens);
        self
    }

    /// Serve `reads` page reads, then report the engine as gone everywhere
    pub fn crash_after_reads(self, reads: usize) -> Self {
        *self.shared.crash_after_reads.lock().unwrap() = Some(reads);
        self
    }

    pub fn navigations(&self, url: &str) -> usize {
        self.shared.navigations.lock().unwrap().get(url).copied().unwrap_or(0)
    }

    pub fn active(&self) -> usize {
        self.shared.active.load(Ordering::SeqCst)
    }

    pub fn peak(&self) -> usize {
        self.shared.peak.load(Ordering::SeqCst)
    }

    pub fn opened(&self) -> usize {
        self.shared.opened.load(Ordering::SeqCst)
    }

    /// A context already showing `html`, for mitigation tests
    pub fn page(&self, html: &str) -> FakeContext {
        FakeContext::open(self.shared.clone(), Some(html.to_string()))
    }

    fn next_visit(&self, url: &str) -> Option<Visit> {
        *self.shared.navigations.lock().unwrap().entry(url.to_string()).or_default() += 1;

        let mut routes = self.shared.routes.lock().unwrap();
        let visits = routes.get_mut(url)?;
        if visits.len() > 1 {
            Some(visits.remove(0))
        } else {
            visits.first().cloned()
        }
    }
}

#[async_trait]
impl BrowsingEngine for FakeEngine {
    async fn launch(&self) -> Result<(), BrowserError> {
        if *self.shared.launch_fails.lock().unwrap() {
            return Err(BrowserError::EngineUnavailable("fake engine refused to start".to_string()));
        }
        Ok(())
    }

    async fn open_context(&self) -> Result<Box<dyn BrowsingContext>, BrowserError> {
        self.shared.alive()?;
        if let Some(limit) = *self.shared.unavailable_after.lock().unwrap() {
            if self.opened() >= limit {
                return Err(BrowserError::EngineUnavailable("fake engine crashed".to_string()));
            }
        }
        Ok(Box::new(FakeContext::open(self.shared.clone(), None)))
    }
}

#[derive(Default)]
struct PageState {
    html: String,
    typed: Option<String>,
}

pub struct FakeContext {
    shared: Arc<Shared>,
    state: Arc<Mutex<PageState>>,
}

impl FakeContext {
    fn open(shared: Arc<Shared>, html: Option<String>) -> Self {
        shared.opened.fetch_add(1, Ordering::SeqCst);
        let active = shared.active.fetch_add(1, Ordering::SeqCst) + 1;
        shared.peak.fetch_max(active, Ordering::SeqCst);

        Self {
            shared,
            state: Arc::new(Mutex::new(PageState {
                html: html.unwrap_or_default(),
                typed: None,
            })),
        }
    }

    pub fn html(&self) -> String {
        self.state.lock().unwrap().html.clone()
    }
}

impl Drop for FakeContext {
    fn drop(&mut self) {
        self.shared.active.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl BrowsingContext for FakeContext {
    async fn navigate(&mut self, url: &str, timeout: Duration) -> Result<(), BrowserError> {
        let engine = FakeEngine { shared: self.shared.clone() };
        let hold = *self.shared.hold.lock().unwrap();

        match engine.next_visit(url) {
            Some(Visit::Page(html)) => {
                if !hold.is_zero() {
                    tokio::time::sleep(hold).await;
                }
                let mut state = self.state.lock().unwrap();
                state.html = html;
                state.typed = None;
                Ok(())
            }
            Some(Visit::Timeout) => Err(BrowserError::NavigationTimeout { url: url.to_string(), timeout }),
            Some(Visit::Hang) => std::future::pending().await,
            Some(Visit::Fail) | None => Err(BrowserError::Navigation {
                url: url.to_string(),
                reason: "connection reset".to_string(),
            }),
        }
    }

    async fn close(self: Box<Self>) {}
}

#[async_trait]
impl Page for FakeContext {
    async fn content(&self) -> Result<String, BrowserError> {
        self.shared.read()?;
        Ok(self.html())
    }

    async fn title(&self) -> Result<String, BrowserError> {
        self.shared.alive()?;
        Ok(Snapshot::parse(&self.html()).title().to_string())
    }

    async fn find(&self, selector: &str) -> Result<Option<Box<dyn PageElement>>, BrowserError> {
        self.shared.alive()?;
        let parsed = Selector::parse(selector)
            .map_err(|e| BrowserError::Command(format!("invalid selector '{}': {:?}", selector, e)))?;
        let present = Html::parse_document(&self.html()).select(&parsed).next().is_some();

        if !present {
            return Ok(None);
        }

        Ok(Some(Box::new(FakeElement {
            selector: selector.to_string(),
            shared: self.shared.clone(),
            state: self.state.clone(),
        })))
    }

    async fn wait(&self, _duration: Duration) {
        tokio::task::yield_now().await;
    }
}

struct FakeElement {
    selector: String,
    shared: Arc<Shared>,
    state: Arc<Mutex<PageState>>,
}

#[async_trait]
impl PageElement for FakeElement {
    async fn activate(&self) -> Result<(), BrowserError> {
        let rules = self.shared.rules.lock().unwrap().clone();
        let mut state = self.state.lock().unwrap();

        if let Some(rule) = rules.iter().find(|rule| rule.selector == self.selector) {
            let next = match &rule.expect_typed {
                Some(expected) if state.typed.as_deref() == Some(expected.as_str()) => rule.pass.clone(),
                Some(_) => rule.fail.clone().unwrap_or_else(|| state.html.clone()),
                None => rule.pass.clone(),
            };
            state.html = next;
            state.typed = None;
        }
        Ok(())
    }

    async fn fill(&self, text: &str) -> Result<(), BrowserError> {
        self.state.lock().unwrap().typed = Some(text.to_string());
        Ok(())
    }

    async fn capture(&self) -> Result<Vec<u8>, BrowserError> {
        Ok(b"\x89PNG fake capture".to_vec())
    }
}

/// Defaults with every pause removed and short timeouts
pub fn instant_config() -> GraderConfig {
    let mut config = GraderConfig::default();
    config.run.navigation_timeout_ms = 200;
    config.run.request_delay_ms = (0, 0);
    config.run.chunk_delay_ms = (0, 0);
    config.run.backoff_base_ms = 0;
    config.run.backoff_cap_ms = 0;
    config.challenge.settle_ms = (0, 0);
    config.challenge.probe_interval_ms = 0;
    config.challenge.timeout_ms = 2_000;
    config
}
