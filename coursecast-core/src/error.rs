use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ScanError {
    #[error("course folder does not exist: {0}")]
    RootMissing(PathBuf),

    #[error("course path is not a directory: {0}")]
    NotADirectory(PathBuf),

    #[error("failed to list {path}: {source}")]
    List {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to walk module '{module}': {source}")]
    Walk {
        module: String,
        #[source]
        source: walkdir::Error,
    },
}

#[derive(Error, Debug)]
pub enum PackageError {
    #[error("failed to create archive {path}: {source}")]
    Create {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to add {path} to archive: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("zip error while writing {path}: {source}")]
    Zip {
        path: PathBuf,
        #[source]
        source: zip::result::ZipError,
    },
}

#[derive(Error, Debug)]
pub enum ChunkError {
    #[error("chunk ceiling must be at least one byte")]
    ZeroCeiling,

    #[error("chunk I/O failed on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Error, Debug)]
pub enum MediaError {
    #[error("failed to launch {tool}: {source}")]
    Launch {
        tool: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{tool} exited with {status}: {stderr}")]
    Failed {
        tool: String,
        status: String,
        stderr: String,
    },

    #[error("unexpected {tool} output: {output:?}")]
    Parse { tool: String, output: String },
}

#[derive(Error, Debug)]
pub enum SegmentError {
    #[error("failed to stat {path}: {source}")]
    Stat {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("could not read duration of {path}: {source}")]
    Probe {
        path: PathBuf,
        #[source]
        source: MediaError,
    },

    #[error("failed to prepare segment directory {path}: {source}")]
    Prepare {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("segmenting {path} failed: {source}")]
    Tool {
        path: PathBuf,
        #[source]
        source: MediaError,
    },

    #[error("invalid segment pattern: {0}")]
    Pattern(#[from] glob::PatternError),

    #[error("segmenting {0} produced no parts")]
    NoOutput(PathBuf),
}

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("ledger I/O failed on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to encode ledger: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Failures reported by a [`crate::contract::Transport`].
///
/// The variant decides how the orchestrator reacts: rate limits are waited out
/// without spending a retry, transient failures spend one, fatal ones abort.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransportError {
    #[error("rate limited, retry after {0:?}")]
    RateLimited(Duration),

    #[error("transient transport failure: {0}")]
    Transient(String),

    #[error("request rejected: {0}")]
    Fatal(String),
}

#[derive(Error, Debug)]
pub enum DeliveryError {
    #[error("failed to open {path} for upload: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("giving up on {unit} after {attempts} attempts: {last}")]
    RetriesExhausted {
        unit: String,
        attempts: u32,
        last: String,
    },

    #[error("{unit} was rejected by the transport: {reason}")]
    Rejected { unit: String, reason: String },

    #[error("{what} failed: {source}")]
    Transport {
        what: String,
        #[source]
        source: TransportError,
    },

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error("cancelled")]
    Cancelled,
}

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Scan(#[from] ScanError),

    #[error(transparent)]
    Package(#[from] PackageError),

    #[error(transparent)]
    Chunk(#[from] ChunkError),

    #[error(transparent)]
    Delivery(#[from] DeliveryError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error("background task for {stage} failed: {reason}")]
    Task { stage: String, reason: String },
}
