use thiserror::Error;
use uuid::Uuid;

use chatgenius_backend::BackendError;

/// Input rejected before any backend call is made.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("channel name must not be empty")]
    EmptyChannelName,

    #[error("message must not be empty")]
    EmptyMessage,

    #[error("no channel is selected")]
    NoActiveChannel,

    #[error("unknown channel {0}")]
    UnknownChannel(Uuid),
}

#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error("chat view has shut down")]
    ViewClosed,
}
