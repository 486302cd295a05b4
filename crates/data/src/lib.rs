//! Data ingestion and persistence for the OI strangle pipeline.
//!
//! This crate provides:
//! - CSV loaders for candles, option OI and futures OI
//! - The append-only event journal (in-memory and JSON-lines)
//! - Read-only views for reports

pub mod csv_loader;
pub mod error;
pub mod event;
pub mod jsonl;
pub mod store;
pub mod views;

pub use csv_loader::{
    load_candles, load_futures_oi, load_options_oi, read_candles, read_futures_oi,
    read_options_oi, LoadReport, Loaded,
};
pub use error::StoreError;
pub use event::{Event, EventRecord};
pub use jsonl::JsonlStore;
pub use store::{fold_orders, EventStore, MemoryStore};
pub use views::{DailyMetrics, JournalView};
