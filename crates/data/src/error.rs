use thiserror::Error;

/// Errors from journal operations.
#[derive(Error, Debug)]
pub enum StoreError {
    /// IO error reading/writing the journal file.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A record other than the last one cannot be parsed.
    #[error("journal corrupt at line {line}: {reason}")]
    Corrupt { line: usize, reason: String },

    /// Write failure injected by a test store.
    #[error("injected write failure")]
    Injected,
}
