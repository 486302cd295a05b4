pub mod pipeline;
pub mod summary;

pub use pipeline::{MarketData, Pipeline};
pub use summary::RunSummary;
