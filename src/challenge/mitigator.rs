use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::browser::engine::{find_first, BrowserError, Page};
use crate::challenge::detect::{self, ChallengeState};
use crate::challenge::ocr::OcrSolver;
use crate::cli::config::ChallengeSettings;
use crate::utils::events::{EventSink, GradeEvent};
use crate::utils::pacing::pause;

/// How a page visit's challenges ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MitigationOutcome {
    /// No challenge on the page
    NotPresent,
    /// Every challenge met was cleared
    Resolved,
    Unresolved,
}

/// Clears consent banners, verification walls and CAPTCHAs from a loaded page.
///
/// Outcomes are always confirmed by re-inspecting the page, never by
/// trusting an interaction or an OCR guess.
pub struct ChallengeMitigator {
    settings: ChallengeSettings,
    ocr: Arc<dyn OcrSolver>,
    events: Arc<dyn EventSink>,
}

impl ChallengeMitigator {
    pub fn new(settings: ChallengeSettings, ocr: Arc<dyn OcrSolver>, events: Arc<dyn EventSink>) -> Self {
        Self { settings, ocr, events }
    }

    /// Mitigate whatever stands between the page and its content.
    ///
    /// Page errors end the visit as `Unresolved`; only a lost engine is
    /// returned as an error.
    pub async fn mitigate<P: Page + ?Sized>(&self, task_id: &str, page: &P) -> Result<MitigationOutcome, BrowserError> {
        let mut current = ChallengeState::None;

        let result = tokio::time::timeout(
            self.settings.timeout(),
            self.run_rounds(task_id, page, &mut current),
        ).await;

        match result {
            Ok(Ok(outcome)) => Ok(outcome),
            Ok(Err(e)) if e.is_environmental() => Err(e),
            Ok(Err(e)) => {
                warn!(id = task_id, "Challenge handling failed: {}", e);
                Ok(self.give_up(task_id, current))
            }
            Err(_) => {
                warn!(id = task_id, "Challenge handling timed out after {:?}", self.settings.timeout());
                Ok(self.give_up(task_id, current))
            }
        }
    }

    async fn run_rounds<P: Page + ?Sized>(
        &self,
        task_id: &str,
        page: &P,
        current: &mut ChallengeState,
    ) -> Result<MitigationOutcome, BrowserError> {
        let mut encountered = false;

        for round in 0..self.settings.max_rounds {
            let state = inspect(page).await?;
            if state == ChallengeState::None {
                return Ok(finished(encountered));
            }

            debug!(id = task_id, round, "Challenge round: {}", state);
            *current = state;
            encountered = true;
            self.events.emit(&GradeEvent::ChallengeDetected { id: task_id.to_string(), kind: state });

            let cleared = match state {
                ChallengeState::CookieConsent => self.accept_cookies(page).await?,
                ChallengeState::ClickVerify => self.pass_click_verify(task_id, page).await?,
                ChallengeState::Captcha => self.solve_captcha(task_id, page).await?,
                ChallengeState::Unrecognized | ChallengeState::None => false,
            };

            if !cleared {
                return Ok(self.give_up(task_id, state));
            }

            info!(id = task_id, "Cleared {} challenge", state);
            self.events.emit(&GradeEvent::ChallengeResolved { id: task_id.to_string(), kind: state });
        }

        // A wall can lead into another; whatever is left after the last round stays
        let state = inspect(page).await?;
        if state == ChallengeState::None {
            return Ok(finished(encountered));
        }

        *current = state;
        self.events.emit(&GradeEvent::ChallengeDetected { id: task_id.to_string(), kind: state });
        Ok(self.give_up(task_id, state))
    }

    fn give_up(&self, task_id: &str, kind: ChallengeState) -> MitigationOutcome {
        self.events.emit(&GradeEvent::ChallengeUnresolved { id: task_id.to_string(), kind });
        MitigationOutcome::Unresolved
    }

    async fn accept_cookies<P: Page + ?Sized>(&self, page: &P) -> Result<bool, BrowserError> {
        let Some(control) = find_first(page, detect::CONSENT_ACCEPT).await? else {
            debug!("Consent banner without an accept control");
            return Ok(false);
        };

        control.activate().await?;
        page.wait(pause(self.settings.settle_ms)).await;

        Ok(inspect(page).await? != ChallengeState::CookieConsent)
    }

    async fn pass_click_verify<P: Page + ?Sized>(&self, task_id: &str, page: &P) -> Result<bool, BrowserError> {
        for probe in 0..self.settings.probe_attempts {
            if let Some(control) = find_first(page, detect::VERIFY_CONTROLS).await? {
                control.activate().await?;
                page.wait(pause(self.settings.settle_ms)).await;

                if inspect(page).await? != ChallengeState::ClickVerify {
                    return Ok(true);
                }
                debug!(id = task_id, probe, "Verification wall still present after click");
            } else {
                debug!(id = task_id, probe, "Verification control not found yet");
            }

            page.wait(self.settings.probe_interval()).await;
        }

        Ok(false)
    }

    async fn solve_captcha<P: Page + ?Sized>(&self, task_id: &str, page: &P) -> Result<bool, BrowserError> {
        for attempt in 0..self.settings.captcha_attempts {
            // A wrong guess makes the target serve a new image, so look it up every time
            let Some(image) = find_first(page, detect::CAPTCHA_IMAGE).await? else {
                debug!(id = task_id, "CAPTCHA image not found");
                return Ok(false);
            };
            let capture = image.capture().await?;

            let guess = match self.ocr.solve(&capture).await {
                Ok(guess) => guess,
                Err(e) => {
                    warn!(id = task_id, attempt, "OCR failed: {}", e);
                    continue;
                }
            };

            let Some(input) = find_first(page, detect::CAPTCHA_INPUT).await? else {
                debug!(id = task_id, "CAPTCHA input not found");
                return Ok(false);
            };
            input.fill(&guess).await?;

            let Some(submit) = find_first(page, detect::CAPTCHA_SUBMIT).await? else {
                debug!(id = task_id, "CAPTCHA submit control not found");
                return Ok(false);
            };
            submit.activate().await?;
            page.wait(pause(self.settings.settle_ms)).await;

            if inspect(page).await? != ChallengeState::Captcha {
                return Ok(true);
            }
            info!(id = task_id, attempt, "CAPTCHA guess '{}' rejected", guess);
        }

        Ok(false)
    }
}

async fn inspect<P: Page + ?Sized>(page: &P) -> Result<ChallengeState, BrowserError> {
    let html = page.content().await?;
    let title = page.title().await.unwrap_or_default();
    Ok(detect::detect(&html, &title))
}

fn finished(encountered: bool) -> MitigationOutcome {
    if encountered {
        MitigationOutcome::Resolved
    } else {
        MitigationOutcome::NotPresent
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::fake::{instant_config, FakeEngine};
    use crate::challenge::detect::pages;
    use crate::challenge::ocr::{MockOcrSolver, OcrError};
    use crate::utils::events::recording::RecordingSink;

    const CAPTCHA_SUBMIT: &str = "form[action*='validateCaptcha'] button[type='submit']";

    fn mitigator(ocr: MockOcrSolver, events: Arc<RecordingSink>) -> ChallengeMitigator {
        ChallengeMitigator::new(instant_config().challenge, Arc::new(ocr), events)
    }

    fn no_ocr() -> MockOcrSolver {
        let mut ocr = MockOcrSolver::new();
        ocr.expect_solve().never();
        ocr
    }

    #[tokio::test]
    async fn test_clean_page_is_not_present() {
        let events = Arc::new(RecordingSink::default());
        let page = FakeEngine::new().page(pages::IN_STOCK);

        let outcome = mitigator(no_ocr(), events.clone()).mitigate("B01", &page).await.unwrap();
        assert_eq!(outcome, MitigationOutcome::NotPresent);
        assert!(events.events().is_empty());
    }

    #[tokio::test]
    async fn test_cookie_banner_is_accepted() {
        let events = Arc::new(RecordingSink::default());
        let engine = FakeEngine::new().on_click("#sp-cc-accept", pages::IN_STOCK);
        let page = engine.page(pages::COOKIE_BANNER);

        let outcome = mitigator(no_ocr(), events.clone()).mitigate("B01", &page).await.unwrap();
        assert_eq!(outcome, MitigationOutcome::Resolved);
        assert_eq!(page.html(), pages::IN_STOCK);
        assert!(events.events().contains(&GradeEvent::ChallengeResolved {
            id: "B01".to_string(),
            kind: ChallengeState::CookieConsent,
        }));
    }

    #[tokio::test]
    async fn test_click_verify_wall_is_passed() {
        let engine = FakeEngine::new().on_click(CAPTCHA_SUBMIT, pages::IN_STOCK);
        let page = engine.page(pages::CLICK_VERIFY);

        let outcome = mitigator(no_ocr(), Arc::new(RecordingSink::default()))
            .mitigate("B01", &page)
            .await
            .unwrap();
        assert_eq!(outcome, MitigationOutcome::Resolved);
    }

    #[tokio::test]
    async fn test_click_verify_without_progress_is_unresolved() {
        let events = Arc::new(RecordingSink::default());
        let page = FakeEngine::new().page(pages::CLICK_VERIFY);

        let outcome = mitigator(no_ocr(), events.clone()).mitigate("B01", &page).await.unwrap();
        assert_eq!(outcome, MitigationOutcome::Unresolved);
        assert_eq!(
            events.events().last(),
            Some(&GradeEvent::ChallengeUnresolved { id: "B01".to_string(), kind: ChallengeState::ClickVerify })
        );
    }

    #[tokio::test]
    async fn test_captcha_solved_on_first_guess() {
        let engine = FakeEngine::new().on_submit(CAPTCHA_SUBMIT, "KRMTGB", pages::IN_STOCK, pages::CAPTCHA);
        let page = engine.page(pages::CAPTCHA);

        let mut ocr = MockOcrSolver::new();
        ocr.expect_solve().times(1).returning(|_| Ok("KRMTGB".to_string()));

        let outcome = mitigator(ocr, Arc::new(RecordingSink::default())).mitigate("B01", &page).await.unwrap();
        assert_eq!(outcome, MitigationOutcome::Resolved);
        assert_eq!(page.html(), pages::IN_STOCK);
    }

    #[tokio::test]
    async fn test_wrong_guess_gets_one_fresh_retry() {
        let engine = FakeEngine::new().on_submit(CAPTCHA_SUBMIT, "KRMTGB", pages::IN_STOCK, pages::CAPTCHA);
        let page = engine.page(pages::CAPTCHA);

        let mut ocr = MockOcrSolver::new();
        let mut guesses = vec!["KRMTGB", "XXXXXX"];
        ocr.expect_solve()
            .times(2)
            .returning(move |_| Ok(guesses.pop().unwrap_or_default().to_string()));

        let outcome = mitigator(ocr, Arc::new(RecordingSink::default())).mitigate("B01", &page).await.unwrap();
        assert_eq!(outcome, MitigationOutcome::Resolved);
    }

    #[tokio::test]
    async fn test_captcha_gives_up_after_attempts() {
        let engine = FakeEngine::new().on_submit(CAPTCHA_SUBMIT, "KRMTGB", pages::IN_STOCK, pages::CAPTCHA);
        let page = engine.page(pages::CAPTCHA);

        let mut ocr = MockOcrSolver::new();
        ocr.expect_solve().times(2).returning(|_| Ok("WRONG".to_string()));

        let outcome = mitigator(ocr, Arc::new(RecordingSink::default())).mitigate("B01", &page).await.unwrap();
        assert_eq!(outcome, MitigationOutcome::Unresolved);
    }

    #[tokio::test]
    async fn test_ocr_errors_count_as_failed_attempts() {
        let page = FakeEngine::new().page(pages::CAPTCHA);

        let mut ocr = MockOcrSolver::new();
        ocr.expect_solve().times(2).returning(|_| Err(OcrError::Empty));

        let outcome = mitigator(ocr, Arc::new(RecordingSink::default())).mitigate("B01", &page).await.unwrap();
        assert_eq!(outcome, MitigationOutcome::Unresolved);
    }

    #[tokio::test]
    async fn test_unknown_block_is_never_touched() {
        let events = Arc::new(RecordingSink::default());
        let page = FakeEngine::new().page(pages::UNKNOWN_BLOCK);

        let outcome = mitigator(no_ocr(), events.clone()).mitigate("B01", &page).await.unwrap();
        assert_eq!(outcome, MitigationOutcome::Unresolved);
        assert_eq!(page.html(), pages::UNKNOWN_BLOCK);
        assert_eq!(
            events.events(),
            vec![
                GradeEvent::ChallengeDetected { id: "B01".to_string(), kind: ChallengeState::Unrecognized },
                GradeEvent::ChallengeUnresolved { id: "B01".to_string(), kind: ChallengeState::Unrecognized },
            ]
        );
    }

    #[tokio::test]
    async fn test_lost_engine_is_an_error_not_a_challenge() {
        let events = Arc::new(RecordingSink::default());
        let page = FakeEngine::new().crash_after_reads(1).page(pages::COOKIE_BANNER);

        let error = mitigator(no_ocr(), events.clone())
            .mitigate("B01", &page)
            .await
            .unwrap_err();
        assert!(error.is_environmental());
        assert!(!events.events().iter().any(|event| matches!(event, GradeEvent::ChallengeUnresolved { .. })));
    }

    #[tokio::test]
    async fn test_click_verify_leads_into_captcha() {
        const WALL: &str = r#"<html><body><form action="/errors/validateCaptcha">
            <input type="submit" value="Weiter shoppen"></form></body></html>"#;

        let events = Arc::new(RecordingSink::default());
        let engine = FakeEngine::new()
            .on_click("form[action*='validateCaptcha'] input[type='submit']", pages::CAPTCHA)
            .on_submit(CAPTCHA_SUBMIT, "KRMTGB", pages::IN_STOCK, pages::CAPTCHA);
        let page = engine.page(WALL);

        let mut ocr = MockOcrSolver::new();
        ocr.expect_solve().times(1).returning(|_| Ok("KRMTGB".to_string()));

        let outcome = mitigator(ocr, events.clone()).mitigate("B01", &page).await.unwrap();
        assert_eq!(outcome, MitigationOutcome::Resolved);

        let kinds: Vec<_> = events.events().into_iter()
            .filter_map(|event| match event {
                GradeEvent::ChallengeResolved { kind, .. } => Some(kind),
                _ => None,
            })
            .collect();
        assert_eq!(kinds, vec![ChallengeState::ClickVerify, ChallengeState::Captcha]);
    }
}
