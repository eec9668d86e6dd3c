use lodstream_common::NodeId;
use lodstream_hierarchy::ContentKind;

/// Errors from content loading.
#[derive(Debug, thiserror::Error)]
pub enum ContentError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("no loader registered for content kind {0}")]
    UnknownKind(ContentKind),
    #[error("load cancelled")]
    Cancelled,
}

/// A load that finished with an error, reported by `poll`.
#[derive(Debug)]
pub struct LoadFailure {
    pub node: NodeId,
    pub error: ContentError,
}
