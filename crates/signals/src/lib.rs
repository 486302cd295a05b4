pub mod engine;
pub mod oi;
pub mod pattern;

pub use engine::{decide, direction_of, SignalEngine};
pub use oi::{classify, percent_change, OIAnalyzer};
pub use pattern::PatternDetector;
