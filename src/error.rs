//! Error types and handling for hugelink

/// Result type alias for hugelink operations
pub type Result<T> = std::result::Result<T, HugelinkError>;

/// Error kinds surfaced by the transport
#[derive(Debug, thiserror::Error)]
pub enum HugelinkError {
    /// I/O related errors (file operations, mmap, pagemap reads)
    #[error("I/O error: {message}")]
    Io {
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },

    /// Invalid parameters or configuration
    #[error("Invalid parameter: {parameter} - {message}")]
    InvalidParameter { parameter: String, message: String },

    /// Bad input to a channel operation
    #[error("Validation error: {message}")]
    Validation { message: String },

    /// A bounded queue had no room for the item
    #[error("Queue full: {queue}")]
    Capacity { queue: String },

    /// A bounded queue had nothing to hand out
    #[error("Queue empty: {queue}")]
    Exhausted { queue: String },

    /// Address or reference outside the block address table
    #[error("Translation error: {value:#x} is not covered by the block address table")]
    Translation { value: u64 },

    /// Operation not allowed in the current context state or role
    #[error("Protocol error: {message}")]
    Protocol { message: String },

    /// Shared layout written by an incompatible build
    #[error("Version mismatch: expected {expected}, got {actual}")]
    VersionMismatch { expected: u64, actual: u64 },

    /// Serialization/deserialization errors
    #[error("Serialization error: {message}")]
    Serialization { message: String },

    /// Platform-specific errors
    #[error("Platform error: {message}")]
    Platform { message: String },
}

impl HugelinkError {
    /// Create an I/O error from a standard I/O error
    pub fn from_io(source: std::io::Error, context: &str) -> Self {
        Self::Io {
            message: format!("{}: {}", context, source),
            source: Some(source),
        }
    }

    /// Create an invalid parameter error
    pub fn invalid_parameter(parameter: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidParameter {
            parameter: parameter.into(),
            message: message.into(),
        }
    }

    /// Create a validation error
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Create a capacity error for the named queue
    pub fn capacity(queue: impl Into<String>) -> Self {
        Self::Capacity {
            queue: queue.into(),
        }
    }

    /// Create an exhausted error for the named queue
    pub fn exhausted(queue: impl Into<String>) -> Self {
        Self::Exhausted {
            queue: queue.into(),
        }
    }

    /// Create a translation error
    pub fn translation(value: u64) -> Self {
        Self::Translation { value }
    }

    /// Create a protocol error
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Create a version mismatch error
    pub fn version_mismatch(expected: u64, actual: u64) -> Self {
        Self::VersionMismatch { expected, actual }
    }

    /// Create a serialization error
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    /// Create a platform error
    pub fn platform(message: impl Into<String>) -> Self {
        Self::Platform {
            message: message.into(),
        }
    }

    /// Create a platform error from the calling thread's `errno`
    pub fn last_os_error(context: &str) -> Self {
        Self::Platform {
            message: format!("{}: {}", context, std::io::Error::last_os_error()),
        }
    }

    /// Create a platform error from a pthread-style return code
    pub fn from_code(code: i32, context: &str) -> Self {
        Self::Platform {
            message: format!("{}: {}", context, std::io::Error::from_raw_os_error(code)),
        }
    }

    /// Transient queue pressure the caller may retry
    pub fn is_backpressure(&self) -> bool {
        matches!(self, Self::Capacity { .. } | Self::Exhausted { .. })
    }

    /// Errors that indicate a broken mapping or layout rather than a bad call
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Translation { .. } | Self::VersionMismatch { .. } | Self::Platform { .. }
        )
    }
}

impl From<std::io::Error> for HugelinkError {
    fn from(err: std::io::Error) -> Self {
        Self::from_io(err, "I/O operation failed")
    }
}

impl From<bincode::Error> for HugelinkError {
    fn from(err: bincode::Error) -> Self {
        Self::serialization(err.to_string())
    }
}

impl From<nix::Error> for HugelinkError {
    fn from(err: nix::Error) -> Self {
        Self::platform(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = HugelinkError::capacity("peer get queue");
        assert!(matches!(err, HugelinkError::Capacity { .. }));
        assert!(err.is_backpressure());
        assert!(!err.is_fatal());

        let err = HugelinkError::translation(0xdead_0000);
        assert!(err.is_fatal());
        assert!(!err.is_backpressure());

        let err = HugelinkError::invalid_parameter("page_size", "must be a power of two");
        assert!(matches!(err, HugelinkError::InvalidParameter { .. }));
    }

    #[test]
    fn test_error_display() {
        let err = HugelinkError::exhausted("free-block queue");
        assert_eq!(err.to_string(), "Queue empty: free-block queue");

        let err = HugelinkError::translation(0x1000);
        assert_eq!(
            err.to_string(),
            "Translation error: 0x1000 is not covered by the block address table"
        );

        let err = HugelinkError::version_mismatch(1, 2);
        assert_eq!(err.to_string(), "Version mismatch: expected 1, got 2");
    }

    #[test]
    fn test_error_conversions() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: HugelinkError = io.into();
        assert!(matches!(err, HugelinkError::Io { source: Some(_), .. }));

        let err: HugelinkError = nix::Error::EINVAL.into();
        assert!(matches!(err, HugelinkError::Platform { .. }));

        let err = HugelinkError::from_code(libc::EBUSY, "pthread_mutex_destroy");
        assert!(err.to_string().starts_with("Platform error: pthread_mutex_destroy"));
    }
}
