use thiserror::Error;

#[derive(Debug, Error)]
pub enum PagecraftError {
    // Step body errors
    #[error("Collaborator unavailable: {0}")]
    Collaborator(String),

    #[error("Step timed out after {timeout_ms}ms: {step}")]
    Timeout { step: String, timeout_ms: u64 },

    #[error("Malformed step output: {0}")]
    MalformedOutput(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Step contract violated: {step}: {message}")]
    Contract { step: String, message: String },

    // Config errors
    #[error("Config error: {0}")]
    Config(String),

    #[error("Config file not found: {0}")]
    ConfigNotFound(String),

    #[error("Invalid graph: {0}")]
    Graph(#[from] ConfigError),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // JSON errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl PagecraftError {
    /// Transient errors are retried by the step's retry policy; everything
    /// else fails the step immediately.
    pub fn is_retryable(&self) -> bool {
        match self {
            PagecraftError::Collaborator(_)
            | PagecraftError::Timeout { .. }
            | PagecraftError::MalformedOutput(_) => true,
            PagecraftError::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::TimedOut
                    | std::io::ErrorKind::Interrupted
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionRefused
            ),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, PagecraftError>;

/// Graph-construction errors. These are raised by `GraphBuilder::build` and
/// never at run time.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("Graph has no nodes")]
    Empty,

    #[error("Duplicate node: {0}")]
    DuplicateNode(String),

    #[error("Unknown node '{node}' referenced by {referenced_by}")]
    UnknownNode { node: String, referenced_by: String },

    #[error("Key '{key}' is writable by both '{first}' and '{second}'")]
    OverlappingWrites {
        key: String,
        first: String,
        second: String,
    },

    #[error("Invalid parallel group '{group}': {reason}")]
    InvalidGroup { group: String, reason: String },

    #[error("Invalid gate '{gate}': {reason}")]
    InvalidGate { gate: String, reason: String },

    #[error("Node '{node}' reads '{key}', which no node writes")]
    DanglingRead { node: String, key: String },

    #[error("Node '{node}' has no unconditional route for signal {signal}")]
    UnroutedSignal { node: String, signal: String },

    #[error("Edge {from} -> {to} is not allowed: {reason}")]
    InvalidEdge {
        from: String,
        to: String,
        reason: String,
    },

    #[error("Unbounded cycle through: {}", .0.join(" -> "))]
    UnboundedCycle(Vec<String>),

    #[error("Node '{0}' is unreachable from the entry node")]
    Unreachable(String),

    #[error("Invalid retry policy for '{node}': {reason}")]
    InvalidRetry { node: String, reason: String },
}
