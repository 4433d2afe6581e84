use std::path::PathBuf;

/// Errors raised to the caller of the runner.
///
/// Per-client problems never show up here; those are [`ClientFault`]s that
/// degrade a single slot.
///
/// [`ClientFault`]: crate::client::ClientFault
#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    #[error("invalid configuration: {reason}")]
    Config { reason: String },

    #[error("failed to listen on {addr}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot load replay {path}: {reason}")]
    ReplayLoad { path: PathBuf, reason: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl RunnerError {
    pub fn config(reason: impl Into<String>) -> Self {
        RunnerError::Config {
            reason: reason.into(),
        }
    }

    pub fn replay_load(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        RunnerError::ReplayLoad {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_messages() {
        let err = RunnerError::config("Port number is required for tcp client.");
        assert_eq!(
            err.to_string(),
            "invalid configuration: Port number is required for tcp client."
        );

        let err = RunnerError::replay_load("visio.gz", "unsupported visio_version 1");
        assert_eq!(
            err.to_string(),
            "cannot load replay visio.gz: unsupported visio_version 1"
        );
    }

    #[test]
    fn test_errors_are_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<RunnerError>();
    }
}
