pub mod landmark;
pub mod numbers;
pub mod parse;

// Re-export common types
pub use landmark::{LandmarkSet, Pattern, Snapshot};
pub use parse::{parse_product, Extraction};
