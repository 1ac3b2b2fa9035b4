pub mod detect;
pub mod mitigator;
pub mod ocr;

// Re-export common types
pub use detect::ChallengeState;
pub use mitigator::{ChallengeMitigator, MitigationOutcome};
pub use ocr::{OcrSolver, RemoteOcrService};
