use crate::exec::ExecError;

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// Host unreachable or the command timed out.
    #[error("{host}:{root}: {message}")]
    Connectivity {
        host: String,
        root: String,
        message: String,
    },

    #[error("{host}:{root}: remote command failed (exit {exit_code}): {stderr}")]
    RemoteCommand {
        host: String,
        root: String,
        exit_code: i32,
        stderr: String,
    },

    /// Output did not have the expected shape.
    #[error("{context}: {message}")]
    Parse { context: String, message: String },

    #[error("invalid exclude pattern: {0}")]
    Exclude(#[from] fleetsync_agent::AgentError),

    #[error(transparent)]
    Exec(#[from] ExecError),
}

impl SyncError {
    pub fn parse(context: impl Into<String>, message: impl Into<String>) -> Self {
        SyncError::Parse {
            context: context.into(),
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
