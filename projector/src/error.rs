use projector_core::name::ProjectionName;

/// Errors returned by the [`ProjectionManager`](crate::ProjectionManager).
#[derive(Debug, thiserror::Error)]
pub enum ProjectorError {
    /// Two registrations share a name.
    #[error("Projection {0} is registered more than once")]
    DuplicateProjection(ProjectionName),

    /// The manager was built outside a tokio runtime.
    #[error("A projection manager must be built inside a tokio runtime")]
    NoRuntime,

    /// The mailbox task panicked or was aborted.
    #[error("Command mailbox task failed: {0}")]
    MailboxFailed(#[from] tokio::task::JoinError),
}
