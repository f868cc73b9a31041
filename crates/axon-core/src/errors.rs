use std::path::PathBuf;

/// Typed error hierarchy for the IPC layer.
/// Transport-fatal errors stop a whole component; connection-fatal errors
/// tear down a single connection; everything else is recoverable per
/// message.
#[derive(Debug, thiserror::Error)]
pub enum IpcError {
    // Transport fatal
    #[error("endpoint {0} is owned by a live broker")]
    EndpointInUse(PathBuf),
    #[error("failed to bind {path}: {source}")]
    Bind {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to connect to {path}: {source}")]
    Connect {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // Per-connection fatal
    #[error("frame of {len} bytes exceeds limit of {max}")]
    FrameTooLarge { len: usize, max: usize },
    #[error("stream error: {0}")]
    Io(#[from] std::io::Error),

    // Message-level recoverable
    #[error("payload must be a JSON object, got {0}")]
    NotAnObject(&'static str),
    #[error("payload serialization failed: {0}")]
    Json(#[from] serde_json::Error),
}

impl IpcError {
    /// Failures of the shared listening resource; fatal to the component.
    pub fn is_transport_fatal(&self) -> bool {
        matches!(
            self,
            Self::EndpointInUse(_) | Self::Bind { .. } | Self::Connect { .. }
        )
    }

    /// Failures contained to one connection.
    pub fn is_connection_fatal(&self) -> bool {
        matches!(self, Self::FrameTooLarge { .. } | Self::Io(_))
    }

    /// Short classification string for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::EndpointInUse(_) => "endpoint_in_use",
            Self::Bind { .. } => "bind",
            Self::Connect { .. } => "connect",
            Self::FrameTooLarge { .. } => "frame_too_large",
            Self::Io(_) => "io",
            Self::NotAnObject(_) => "not_an_object",
            Self::Json(_) => "json",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_fatal_classification() {
        assert!(IpcError::EndpointInUse("/tmp/x.sock".into()).is_transport_fatal());
        assert!(IpcError::Bind {
            path: "/tmp/x.sock".into(),
            source: std::io::Error::other("denied"),
        }
        .is_transport_fatal());
        assert!(IpcError::Connect {
            path: "/tmp/x.sock".into(),
            source: std::io::Error::other("refused"),
        }
        .is_transport_fatal());
    }

    #[test]
    fn connection_fatal_classification() {
        let err = IpcError::FrameTooLarge { len: 10, max: 4 };
        assert!(err.is_connection_fatal());
        assert!(!err.is_transport_fatal());

        let io = IpcError::Io(std::io::Error::other("reset"));
        assert!(io.is_connection_fatal());
    }

    #[test]
    fn recoverable_is_neither() {
        let err = IpcError::NotAnObject("array");
        assert!(!err.is_transport_fatal());
        assert!(!err.is_connection_fatal());
    }

    #[test]
    fn kind_strings() {
        assert_eq!(IpcError::EndpointInUse("/x".into()).kind(), "endpoint_in_use");
        assert_eq!(IpcError::FrameTooLarge { len: 1, max: 0 }.kind(), "frame_too_large");
        assert_eq!(IpcError::NotAnObject("null").kind(), "not_an_object");
    }
}
