//! Errors reported synchronously to a requester, before anything is queued

use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("Command queue is being cancelled")]
    QueueCancelled,

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Room \"{0}\" already exists")]
    NameCollision(String),

    #[error("Unknown room template \"{0}\"")]
    UnknownTemplate(String),

    #[error("Unknown room {0}")]
    UnknownRoom(String),

    #[error("Studio \"{0}\" not found")]
    StudioNotFound(String),

    #[error("Studio storage error at {path}: {source}")]
    Storage {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl CommandError {
    pub(crate) fn storage(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Storage {
            path: path.into(),
            source,
        }
    }
}
