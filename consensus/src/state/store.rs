//! History store for outcomes, thresholds, provider state and telemetry
//!
//! The store is the sole durable owner of engine state. Each collection is a
//! single document that is replaced atomically, so a failed write leaves the
//! previous document in place.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::debug;

use super::schema::{self, caps, keys};
use super::types::*;

/// Error type for history store operations
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Lock poisoned")]
    LockPoisoned,

    #[error("Backend error: {0}")]
    Backend(String),
}

/// Result type for history store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Shared reference to HistoryStore
pub type SharedHistoryStore = Arc<HistoryStore>;

/// Which backend the store opens
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// One JSON document per collection under a directory
    #[default]
    Json,
    /// Process memory only
    Memory,
    /// RocksDB column families (requires the `heavy-state` feature)
    Rocks,
}

impl std::str::FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "memory" => Ok(Self::Memory),
            "rocks" | "rocksdb" => Ok(Self::Rocks),
            other => Err(format!("unknown store backend: {other}")),
        }
    }
}

/// Store configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: BackendKind,
    pub path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::Json,
            path: PathBuf::from(".ensemble-consensus"),
        }
    }
}

// ============================================================================
// Codec
// ============================================================================

/// On-disk encoding of a document
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Codec {
    Json,
    #[cfg(feature = "heavy-state")]
    Bincode,
}

impl Codec {
    pub fn encode<T: Serialize + ?Sized>(&self, value: &T) -> StoreResult<Vec<u8>> {
        match self {
            Codec::Json => serde_json::to_vec_pretty(value)
                .map_err(|e| StoreError::Serialization(e.to_string())),
            #[cfg(feature = "heavy-state")]
            Codec::Bincode => bincode::serde::encode_to_vec(value, bincode::config::standard())
                .map_err(|e| StoreError::Serialization(e.to_string())),
        }
    }

    pub fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> StoreResult<T> {
        match self {
            Codec::Json => {
                serde_json::from_slice(bytes).map_err(|e| StoreError::Deserialization(e.to_string()))
            }
            #[cfg(feature = "heavy-state")]
            Codec::Bincode => bincode::serde::decode_from_slice(bytes, bincode::config::standard())
                .map(|(value, _)| value)
                .map_err(|e| StoreError::Deserialization(e.to_string())),
        }
    }
}

// ============================================================================
// Backends
// ============================================================================

/// Raw document persistence with atomic replace-on-write
pub trait DocumentBackend: Send + Sync {
    /// Short backend name for logs
    fn name(&self) -> &'static str;

    /// Encoding used for documents in this backend
    fn codec(&self) -> Codec;

    /// Read a whole collection document, `None` if never written
    fn read(&self, collection: &str) -> StoreResult<Option<Vec<u8>>>;

    /// Replace a collection document
    fn write(&self, collection: &str, bytes: &[u8]) -> StoreResult<()>;
}

/// JSON files under a directory, written via temp file + rename
pub struct JsonFileBackend {
    dir: PathBuf,
}

impl JsonFileBackend {
    pub fn open(dir: impl Into<PathBuf>) -> StoreResult<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }
}

impl DocumentBackend for JsonFileBackend {
    fn name(&self) -> &'static str {
        "json"
    }

    fn codec(&self) -> Codec {
        Codec::Json
    }

    fn read(&self, collection: &str) -> StoreResult<Option<Vec<u8>>> {
        let path = self.dir.join(keys::file_name(collection));
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn write(&self, collection: &str, bytes: &[u8]) -> StoreResult<()> {
        let tmp = self.dir.join(keys::temp_file_name(collection));
        let path = self.dir.join(keys::file_name(collection));
        fs::write(&tmp, bytes)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }
}

/// In-process backend, nothing survives a restart
#[derive(Default)]
pub struct MemoryBackend {
    docs: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DocumentBackend for MemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn codec(&self) -> Codec {
        Codec::Json
    }

    fn read(&self, collection: &str) -> StoreResult<Option<Vec<u8>>> {
        let docs = self.docs.read().map_err(|_| StoreError::LockPoisoned)?;
        Ok(docs.get(collection).cloned())
    }

    fn write(&self, collection: &str, bytes: &[u8]) -> StoreResult<()> {
        let mut docs = self.docs.write().map_err(|_| StoreError::LockPoisoned)?;
        docs.insert(collection.to_string(), bytes.to_vec());
        Ok(())
    }
}

// ============================================================================
// History store
// ============================================================================

/// Typed access to every persisted collection
pub struct HistoryStore {
    backend: Arc<dyn DocumentBackend>,
}

impl HistoryStore {
    pub fn new(backend: Arc<dyn DocumentBackend>) -> Self {
        Self { backend }
    }

    /// Open the backend selected by configuration
    pub fn open(config: &StoreConfig) -> StoreResult<Self> {
        let backend: Arc<dyn DocumentBackend> = match config.backend {
            BackendKind::Json => Arc::new(JsonFileBackend::open(&config.path)?),
            BackendKind::Memory => Arc::new(MemoryBackend::new()),
            #[cfg(feature = "heavy-state")]
            BackendKind::Rocks => Arc::new(super::rocks::RocksBackend::open(&config.path)?),
            #[cfg(not(feature = "heavy-state"))]
            BackendKind::Rocks => {
                return Err(StoreError::Backend(
                    "rocks backend requires the heavy-state feature".to_string(),
                ))
            }
        };
        Ok(Self::new(backend))
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryBackend::new()))
    }

    /// Create a shared reference to this store
    pub fn shared(self) -> SharedHistoryStore {
        Arc::new(self)
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    // =========================================================================
    // Generic operations
    // =========================================================================

    fn load<T: DeserializeOwned>(&self, collection: &str) -> StoreResult<Option<T>> {
        match self.backend.read(collection)? {
            Some(bytes) => Ok(Some(self.backend.codec().decode(&bytes)?)),
            None => Ok(None),
        }
    }

    fn load_or_default<T: DeserializeOwned + Default>(&self, collection: &str) -> StoreResult<T> {
        Ok(self.load(collection)?.unwrap_or_default())
    }

    fn save<T: Serialize + ?Sized>(&self, collection: &str, value: &T) -> StoreResult<()> {
        let bytes = self.backend.codec().encode(value)?;
        self.backend.write(collection, &bytes)?;
        debug!(collection, bytes = bytes.len(), backend = self.backend.name(), "Document written");
        Ok(())
    }

    /// Replace a list with its newest `cap` entries
    fn save_capped<T: Serialize>(&self, collection: &str, items: &[T], cap: usize) -> StoreResult<()> {
        let start = items.len().saturating_sub(cap);
        self.save(collection, &items[start..])
    }

    fn append_capped<T: Serialize + DeserializeOwned>(
        &self,
        collection: &str,
        item: T,
        cap: usize,
    ) -> StoreResult<()> {
        let mut items: Vec<T> = self.load_or_default(collection)?;
        items.push(item);
        self.save_capped(collection, &items, cap)
    }

    // =========================================================================
    // Outcomes
    // =========================================================================

    pub fn load_outcomes(&self) -> StoreResult<Vec<ValidationOutcome>> {
        self.load_or_default(schema::COL_OUTCOMES)
    }

    pub fn save_outcomes(&self, outcomes: &[ValidationOutcome]) -> StoreResult<()> {
        self.save_capped(schema::COL_OUTCOMES, outcomes, caps::OUTCOMES)
    }

    pub fn append_outcome(&self, outcome: &ValidationOutcome) -> StoreResult<()> {
        self.append_capped(schema::COL_OUTCOMES, outcome.clone(), caps::OUTCOMES)
    }

    // =========================================================================
    // Thresholds
    // =========================================================================

    pub fn load_thresholds(&self) -> StoreResult<Option<ThresholdConfig>> {
        self.load(schema::COL_THRESHOLDS)
    }

    pub fn save_thresholds(&self, config: &ThresholdConfig) -> StoreResult<()> {
        self.save(schema::COL_THRESHOLDS, config)
    }

    // =========================================================================
    // Provider state and consensus history
    // =========================================================================

    pub fn load_providers(&self) -> StoreResult<BTreeMap<ProviderKey, ProviderRecord>> {
        self.load_or_default(schema::COL_PROVIDERS)
    }

    pub fn save_providers(&self, providers: &BTreeMap<ProviderKey, ProviderRecord>) -> StoreResult<()> {
        self.save(schema::COL_PROVIDERS, providers)
    }

    pub fn load_population_history(&self) -> StoreResult<Vec<PopulationHistoryEntry>> {
        self.load_or_default(schema::COL_POPULATION_HISTORY)
    }

    pub fn save_population_history(&self, history: &[PopulationHistoryEntry]) -> StoreResult<()> {
        self.save_capped(schema::COL_POPULATION_HISTORY, history, caps::POPULATION_HISTORY)
    }

    // =========================================================================
    // Pending decisions
    // =========================================================================

    pub fn load_pending(&self) -> StoreResult<Vec<PendingDecision>> {
        self.load_or_default(schema::COL_PENDING)
    }

    pub fn save_pending(&self, pending: &[PendingDecision]) -> StoreResult<()> {
        self.save_capped(schema::COL_PENDING, pending, caps::PENDING)
    }

    // =========================================================================
    // Telemetry
    // =========================================================================

    pub fn load_patterns(&self) -> StoreResult<BTreeMap<String, ValidationPattern>> {
        self.load_or_default(schema::COL_PATTERNS)
    }

    pub fn save_patterns(&self, patterns: &BTreeMap<String, ValidationPattern>) -> StoreResult<()> {
        self.save(schema::COL_PATTERNS, patterns)
    }

    pub fn load_discoveries(&self) -> StoreResult<Vec<ValidationDiscovery>> {
        self.load_or_default(schema::COL_DISCOVERIES)
    }

    pub fn save_discoveries(&self, discoveries: &[ValidationDiscovery]) -> StoreResult<()> {
        self.save_capped(schema::COL_DISCOVERIES, discoveries, caps::DISCOVERIES)
    }

    pub fn load_telemetry_events(&self) -> StoreResult<Vec<ConsensusSummary>> {
        self.load_or_default(schema::COL_TELEMETRY_EVENTS)
    }

    pub fn save_telemetry_events(&self, events: &[ConsensusSummary]) -> StoreResult<()> {
        self.save_capped(schema::COL_TELEMETRY_EVENTS, events, caps::TELEMETRY_EVENTS)
    }

    pub fn load_batches(&self) -> StoreResult<Vec<TelemetryBatch>> {
        self.load_or_default(schema::COL_BATCHES)
    }

    pub fn append_batch(&self, batch: &TelemetryBatch) -> StoreResult<()> {
        self.append_capped(schema::COL_BATCHES, batch.clone(), caps::BATCHES)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn json_store() -> (HistoryStore, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let backend = JsonFileBackend::open(dir.path().join("state")).unwrap();
        (HistoryStore::new(Arc::new(backend)), dir)
    }

    #[test]
    fn test_missing_collections_load_empty() {
        let (store, _dir) = json_store();
        assert!(store.load_outcomes().unwrap().is_empty());
        assert!(store.load_thresholds().unwrap().is_none());
        assert!(store.load_providers().unwrap().is_empty());
    }

    #[test]
    fn test_thresholds_replace_on_write() {
        let (store, _dir) = json_store();
        let mut config = ThresholdConfig::default();
        store.save_thresholds(&config).unwrap();

        config.approved_threshold = 83.5;
        config.cycles = 4;
        store.save_thresholds(&config).unwrap();

        let loaded = store.load_thresholds().unwrap().unwrap();
        assert_eq!(loaded.approved_threshold, 83.5);
        assert_eq!(loaded.cycles, 4);
    }

    #[test]
    fn test_append_outcome_caps_history() {
        let store = HistoryStore::in_memory();
        for i in 0..(caps::OUTCOMES + 5) {
            let outcome = ValidationOutcome::new(i as f64, ValidationStatus::Approved, true);
            store.append_outcome(&outcome).unwrap();
        }
        let outcomes = store.load_outcomes().unwrap();
        assert_eq!(outcomes.len(), caps::OUTCOMES);
        assert_eq!(outcomes[0].predicted_score, 5.0);
    }

    #[test]
    fn test_json_backend_survives_reopen() {
        let dir = tempdir().unwrap();
        let config = StoreConfig {
            backend: BackendKind::Json,
            path: dir.path().to_path_buf(),
        };
        {
            let store = HistoryStore::open(&config).unwrap();
            let mut providers = BTreeMap::new();
            providers.insert(
                "claude:a".to_string(),
                ProviderRecord {
                    provider_type: "claude".to_string(),
                    reliability: 0.91,
                    expertise: 1.2,
                    observations: 3,
                    last_seen: chrono::Utc::now(),
                },
            );
            store.save_providers(&providers).unwrap();
        }
        let store = HistoryStore::open(&config).unwrap();
        let providers = store.load_providers().unwrap();
        assert_eq!(providers["claude:a"].observations, 3);
        assert!(!dir.path().join(keys::temp_file_name(schema::COL_PROVIDERS)).exists());
    }

    #[test]
    fn test_corrupt_document_reports_deserialization_error() {
        let (store, dir) = json_store();
        fs::write(
            dir.path().join("state").join(keys::file_name(schema::COL_OUTCOMES)),
            b"not json",
        )
        .unwrap();
        assert!(matches!(
            store.load_outcomes(),
            Err(StoreError::Deserialization(_))
        ));
    }

    #[cfg(not(feature = "heavy-state"))]
    #[test]
    fn test_rocks_backend_requires_feature() {
        let config = StoreConfig {
            backend: BackendKind::Rocks,
            path: PathBuf::from("unused"),
        };
        assert!(matches!(HistoryStore::open(&config), Err(StoreError::Backend(_))));
    }

    #[test]
    fn test_backend_kind_parse() {
        assert_eq!("rocksdb".parse::<BackendKind>().unwrap(), BackendKind::Rocks);
        assert_eq!("JSON".parse::<BackendKind>().unwrap(), BackendKind::Json);
        assert!("sqlite".parse::<BackendKind>().is_err());
    }
}
