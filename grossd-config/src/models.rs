use std::path::PathBuf;
use std::time::Duration;

pub use grossd_core::types::UpdatePolicy;

/// Full daemon configuration, as read from the config file.
#[derive(Debug, Clone)]
pub struct GrossConfig {
    /// MTA-facing bind address.
    pub host: String,
    pub port: u16,
    /// Peer replication endpoints. Parsed for compatibility; replication
    /// itself is handled outside the core engine.
    pub sync: SyncConfig,
    /// Status server bind address.
    pub status_host: String,
    pub status_port: u16,
    /// Bloom ring rotation period.
    pub rotate_interval: Duration,
    /// Bloom filter size exponent; each filter holds `2^filter_bits` bits.
    pub filter_bits: u32,
    /// Number of filters in the ring.
    pub number_buffers: u32,
    /// When to record a triplet sighting in the ring.
    pub update: UpdatePolicy,
    /// DNS block-list zones.
    pub dnsbl: Vec<String>,
    /// DNS allow-list zones.
    pub dnswl: Vec<String>,
    /// Right-hand-side (sender domain) block-list zones.
    pub rhsbl: Vec<String>,
    /// Whether the SPF check is enabled.
    pub spf: bool,
    /// Path for Bloom ring snapshots; `None` disables persistence.
    pub statefile: Option<PathBuf>,
    /// Per-request deadline handed to the check orchestrator.
    pub query_timelimit: Duration,
    /// Accumulated suspicion weight at which a request is greylisted.
    pub grey_threshold: u32,
    /// Per-pool worker thread ceiling.
    pub max_threads: usize,
}

/// Peer replication endpoints.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub synchost: String,
    pub syncport: u16,
    /// Empty means "no peer"; replication is then suppressed.
    pub peerhost: Option<String>,
    pub peerport: u16,
}

impl Default for GrossConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 1111,
            sync: SyncConfig::default(),
            status_host: "127.0.0.1".to_string(),
            status_port: 1121,
            rotate_interval: Duration::from_secs(3600),
            filter_bits: 22,
            number_buffers: 8,
            update: UpdatePolicy::Grey,
            dnsbl: Vec::new(),
            dnswl: Vec::new(),
            rhsbl: Vec::new(),
            spf: false,
            statefile: None,
            query_timelimit: Duration::from_millis(4000),
            grey_threshold: 1,
            max_threads: 10,
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            synchost: "127.0.0.1".to_string(),
            syncport: 1112,
            peerhost: None,
            peerport: 1112,
        }
    }
}

impl GrossConfig {
    /// True when a replication peer is configured.
    pub fn replication_configured(&self) -> bool {
        self.sync.peerhost.is_some()
    }
}
