//! Collection layout for the history store
//!
//! Every collection is one document replaced atomically on write. The file
//! backend maps a collection to `<dir>/<name>.json`, the RocksDB backend to a
//! column family holding a single value under [`keys::DOCUMENT`].

/// Recorded validation outcomes (append-with-cap)
pub const COL_OUTCOMES: &str = "outcomes";

/// The live threshold configuration
pub const COL_THRESHOLDS: &str = "thresholds";

/// Per-provider reliability and expertise
pub const COL_PROVIDERS: &str = "providers";

/// Consensus history entries (append-with-cap)
pub const COL_POPULATION_HISTORY: &str = "population_history";

/// Decisions awaiting feedback
pub const COL_PENDING: &str = "pending";

/// Telemetry patterns keyed by type and signature
pub const COL_PATTERNS: &str = "patterns";

/// Telemetry discoveries (append-with-cap)
pub const COL_DISCOVERIES: &str = "discoveries";

/// Recent consensus events seen by telemetry
pub const COL_TELEMETRY_EVENTS: &str = "telemetry_events";

/// Flushed telemetry batches
pub const COL_BATCHES: &str = "telemetry_batches";

/// All collection names
pub const ALL_COLLECTIONS: &[&str] = &[
    COL_OUTCOMES,
    COL_THRESHOLDS,
    COL_PROVIDERS,
    COL_POPULATION_HISTORY,
    COL_PENDING,
    COL_PATTERNS,
    COL_DISCOVERIES,
    COL_TELEMETRY_EVENTS,
    COL_BATCHES,
];

/// Retention caps
pub mod caps {
    pub const OUTCOMES: usize = 1000;
    pub const POPULATION_HISTORY: usize = 100;
    pub const PENDING: usize = 1000;
    pub const TELEMETRY_EVENTS: usize = 100;
    pub const DISCOVERIES: usize = 500;
    pub const PATTERNS: usize = 200;
    pub const BATCHES: usize = 10;
}

/// Key helpers
pub mod keys {
    /// Key of the single document in a collection
    pub const DOCUMENT: &str = "doc";

    /// File name for a collection document
    pub fn file_name(collection: &str) -> String {
        format!("{}.json", collection)
    }

    /// Temporary file used for atomic replace
    pub fn temp_file_name(collection: &str) -> String {
        format!(".{}.json.tmp", collection)
    }
}
