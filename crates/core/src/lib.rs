//! Core type aliases, typed IDs, error kinds, and runtime utilities
//! shared across the prismbench workspace.

// ============================================================================
// TYPE ALIASES
// ============================================================================
/// Scalar returned by a value strategy for one evaluation outcome.
pub type Reward = f32;
/// Smoothed per-node statistic driving selection and convergence.
pub type Value = f32;
/// Sampling weights and exploration probabilities.
pub type Probability = f32;
/// Longest-path distance from a root node.
pub type Depth = usize;
/// Which search phase created a node (1-indexed).
pub type PhaseTag = u8;

// ============================================================================
// TRAITS
// ============================================================================
/// Unique identifier trait for domain entities.
pub trait Unique<T = Self> {
    fn id(&self) -> ID<T>;
}

// ============================================================================
// IDENTITY TYPES
// ============================================================================
use std::cmp::Ordering;
use std::fmt::Debug;
use std::fmt::Display;
use std::fmt::Formatter;
use std::hash::Hash;
use std::hash::Hasher;
use std::marker::PhantomData;

/// Generic ID wrapper providing compile-time type safety over uuid::Uuid.
///
/// Uses UUIDv7 so freshly minted IDs sort in creation order, which the
/// search engine relies on for deterministic tie-breaking.
pub struct ID<T> {
    inner: uuid::Uuid,
    marker: PhantomData<T>,
}

impl<T> ID<T> {
    pub fn inner(&self) -> uuid::Uuid {
        self.inner
    }
    /// Cast ID<T> to ID<U> while preserving the underlying UUID.
    pub fn cast<U>(self) -> ID<U> {
        ID {
            inner: self.inner,
            marker: PhantomData,
        }
    }
}

impl<T> From<ID<T>> for uuid::Uuid {
    fn from(id: ID<T>) -> Self {
        id.inner()
    }
}
impl<T> From<uuid::Uuid> for ID<T> {
    fn from(inner: uuid::Uuid) -> Self {
        Self {
            inner,
            marker: PhantomData,
        }
    }
}
impl<T> std::str::FromStr for ID<T> {
    type Err = uuid::Error;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        s.parse::<uuid::Uuid>().map(Self::from)
    }
}

impl<T> Default for ID<T> {
    fn default() -> Self {
        Self {
            inner: uuid::Uuid::now_v7(),
            marker: PhantomData,
        }
    }
}

impl<T> Copy for ID<T> {}
impl<T> Clone for ID<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Eq for ID<T> {}
impl<T> PartialEq for ID<T> {
    fn eq(&self, other: &Self) -> bool {
        self.inner == other.inner
    }
}

impl<T> Ord for ID<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.inner.cmp(&other.inner)
    }
}
impl<T> PartialOrd for ID<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Hash for ID<T> {
    fn hash<H>(&self, state: &mut H)
    where
        H: Hasher,
    {
        self.inner.hash(state);
    }
}

impl<T> Debug for ID<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("ID").field(&self.inner).finish()
    }
}
impl<T> Display for ID<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        Display::fmt(&self.inner, f)
    }
}

/// IDs cross the wire and the snapshot boundary as plain strings.
impl<T> serde::Serialize for ID<T> {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_str(&self.inner)
    }
}
impl<'de, T> serde::Deserialize<'de> for ID<T> {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = <String as serde::Deserialize>::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

// ============================================================================
// ERROR KINDS
// Shared across the workspace; the HTTP layer maps variants to status codes.
// ============================================================================
/// Failure kinds of the search core.
#[derive(thiserror::Error, Debug)]
pub enum SearchError {
    /// Session, task, or phase missing.
    #[error("not found: {0}")]
    NotFound(String),
    /// Duplicate session, second active task, or double initialisation.
    #[error("conflict: {0}")]
    Conflict(String),
    /// Operation is legal in general but not in the current state.
    #[error("invalid state: {0}")]
    InvalidState(String),
    /// A mutation would break a tree invariant; the tree is unchanged.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),
    /// A mandatory strategy slot is missing at phase construction.
    #[error("unresolved strategy slot '{slot}' for phase '{phase}'")]
    StrategyUnresolved { phase: String, slot: &'static str },
    /// Network blip, 5xx, or parse glitch; retried inside the client.
    #[error("transient evaluator failure: {0}")]
    EvaluatorTransient(String),
    /// Malformed request, auth failure, or exhausted retries.
    #[error("permanent evaluator failure: {0}")]
    EvaluatorPermanent(String),
    /// Cooperative cancellation token fired.
    #[error("cancelled")]
    Cancelled,
    /// Wall-clock budget exceeded.
    #[error("timeout")]
    Timeout,
    /// Malformed or incomplete configuration document.
    #[error("config error: {0}")]
    Config(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, SearchError>;

impl SearchError {
    /// Whether the evaluator client should retry after this failure.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::EvaluatorTransient(_))
    }
    /// Whether the error terminates a task rather than a single run.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::StrategyUnresolved { .. } | Self::Config(_))
    }
}

// ============================================================================
// EVALUATOR CLIENT PARAMETERS
// ============================================================================
/// Interval between job status polls against the evaluation service.
pub const POLL_INTERVAL: std::time::Duration = std::time::Duration::from_millis(500);
/// Base delay for exponential backoff on transient transport errors.
pub const RETRY_BASE_DELAY: std::time::Duration = std::time::Duration::from_millis(250);
/// Cap on a single backoff delay.
pub const RETRY_MAX_DELAY: std::time::Duration = std::time::Duration::from_secs(8);
/// Bounded retry count for transient transport errors.
pub const RETRY_LIMIT: u32 = 5;
/// Overall budget for one evaluation call unless a phase overrides it.
pub const EVALUATION_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(600);

// ============================================================================
// PHASE ENGINE DEFAULTS
// Per-phase config overrides all of these.
// ============================================================================
/// Wall-clock budget for a single phase.
pub const PHASE_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(3600);
/// Where per-iteration snapshots land unless configured otherwise.
pub const SNAPSHOT_DIR: &str = "snapshots";

// ============================================================================
// RUNTIME UTILITIES
// ============================================================================
/// Initialize dual logging (terminal + file) with timestamped log files.
/// Creates `logs/` directory and writes DEBUG level to file, INFO to terminal.
pub fn log() {
    std::fs::create_dir_all("logs").expect("create logs directory");
    let config = simplelog::ConfigBuilder::new()
        .set_location_level(log::LevelFilter::Off)
        .set_target_level(log::LevelFilter::Off)
        .set_thread_level(log::LevelFilter::Off)
        .build();
    let time = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("time moves slow")
        .as_secs();
    let file = simplelog::WriteLogger::new(
        log::LevelFilter::Debug,
        config.clone(),
        std::fs::File::create(format!("logs/{}.log", time)).expect("create log file"),
    );
    let term = simplelog::TermLogger::new(
        log::LevelFilter::Info,
        config.clone(),
        simplelog::TerminalMode::Mixed,
        simplelog::ColorChoice::Auto,
    );
    simplelog::CombinedLogger::init(vec![term, file]).expect("initialize logger");
}
