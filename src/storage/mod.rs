pub mod input;
pub mod output;

// Re-export common types
pub use input::InputTable;
pub use output::write_results;
