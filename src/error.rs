use std::fmt;

use thiserror::Error;

/// A type alias for `Result<T, osmix::Error>`.
pub type Result<T> = std::result::Result<T, Error>;

/// The kind of an OSM entity. Kinds order as node < way < relation, which is
/// also the enumeration order used by tag search results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Node,
    Way,
    Relation,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityKind::Node => write!(f, "node"),
            EntityKind::Way => write!(f, "way"),
            EntityKind::Relation => write!(f, "relation"),
        }
    }
}

/// An error that can occur while ingesting, querying, or transforming OSM data.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum Error {
    /// The input ended in the middle of a fileblock or message.
    #[error("short read: {0}")]
    ShortRead(String),

    /// The fileblock framing is not an OSM PBF stream.
    #[error("bad magic: {0}")]
    BadMagic(String),

    /// A blob body could not be decompressed, or uses an unsupported codec.
    #[error("decompress error: {0}")]
    Decompress(String),

    /// A protobuf message could not be decoded.
    #[error("decode error: {0}")]
    Decode(String),

    /// The header demands a feature this implementation does not provide.
    #[error("unknown required feature: {0}")]
    UnknownRequiredFeature(String),

    /// The source violated the PBF contract or a store invariant during ingest.
    #[error("corrupt input at {context}")]
    CorruptInput { context: String },

    /// A way ref or relation member does not resolve in this store. Soft:
    /// callers that enumerate entities may skip the offender.
    #[error("{container_kind} {container} references missing {kind} {missing}")]
    DanglingRef {
        container_kind: EntityKind,
        container: i64,
        kind: EntityKind,
        missing: i64,
    },

    /// A changeset could not be applied against its base store.
    #[error("inconsistent changeset: {0}")]
    InconsistentChangeset(String),

    /// The requested endpoints are not connected by routable ways.
    #[error("no route between the given nodes")]
    NoRoute,

    /// A long-running operation was cancelled by the caller.
    #[error("operation cancelled")]
    Cancelled,

    /// An I/O error from the underlying reader.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// A vector tile could not be encoded.
    #[error("tile encoding error: {0}")]
    Tile(String),
}

impl Error {
    pub(crate) fn corrupt(context: impl Into<String>) -> Error {
        Error::CorruptInput { context: context.into() }
    }

    pub(crate) fn dangling(
        container_kind: EntityKind,
        container: i64,
        kind: EntityKind,
        missing: i64,
    ) -> Error {
        Error::DanglingRef { container_kind, container, kind, missing }
    }
}

impl From<prost::DecodeError> for Error {
    fn from(err: prost::DecodeError) -> Error {
        Error::Decode(err.to_string())
    }
}
