// Error taxonomy shared by every layer of the debug stack

use thiserror::Error;

/// Result type alias for debug interconnect operations
pub type Result<T> = std::result::Result<T, OsdError>;

/// Errors that can occur while talking to the debug interconnect
#[derive(Debug, Error)]
pub enum OsdError {
    /// Caller input violates the operation contract (detected before any I/O)
    #[error("Invalid argument: {reason}")]
    InvalidArgument {
        /// What was wrong with the input
        reason: String,
    },

    /// No response arrived within the receive timeout
    #[error("Operation timeout after {duration_ms}ms")]
    Timeout {
        /// Timeout duration in milliseconds
        duration_ms: u64,
    },

    /// A response did not have the shape the outstanding request expects
    #[error("Protocol violation: {reason}")]
    ProtocolViolation {
        /// Description of the unexpected response
        reason: String,
    },

    /// The module at the given address is not what the caller expected
    #[error("Wrong module at address {addr}: {reason}")]
    WrongModule {
        /// DI address of the module
        addr: u16,
        /// Description of the mismatch
        reason: String,
    },

    /// A bulk operation succeeded only for a subset of its targets
    #[error("Partial result: {} operation(s) failed (first: {first})", .failed.len())]
    PartialResult {
        /// Targets (DI addresses) of the failed sub-operations
        failed: Vec<u16>,
        /// The first concrete failure
        first: Box<OsdError>,
    },

    /// The underlying transport failed to send or receive
    #[error("Transport failure: {reason}")]
    TransportFailure {
        /// Reason for failure
        reason: String,
    },

    /// Operation requires a connected session
    #[error("Session is not connected")]
    NotConnected,

    /// The target module answered a register access with an error response
    #[error("Device error accessing register {reg_addr:#06x} of module {addr}")]
    DeviceError {
        /// DI address of the module
        addr: u16,
        /// Register address
        reg_addr: u16,
    },

    /// Growing a packet buffer failed
    #[error("Allocation of {words} packet words failed")]
    AllocationFailure {
        /// Requested size in words
        words: usize,
    },
}

impl OsdError {
    /// Create an invalid argument error
    pub fn invalid_argument(reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            reason: reason.into(),
        }
    }

    /// Create a protocol violation error
    pub fn protocol_violation(reason: impl Into<String>) -> Self {
        Self::ProtocolViolation {
            reason: reason.into(),
        }
    }

    /// Create a wrong module error
    pub fn wrong_module(addr: u16, reason: impl Into<String>) -> Self {
        Self::WrongModule {
            addr,
            reason: reason.into(),
        }
    }

    /// Create a transport failure error
    pub fn transport_failure(reason: impl Into<String>) -> Self {
        Self::TransportFailure {
            reason: reason.into(),
        }
    }

    /// Errors after which the session is unusable and must reconnect
    pub fn is_session_fatal(&self) -> bool {
        matches!(
            self,
            Self::ProtocolViolation { .. } | Self::TransportFailure { .. }
        )
    }

    /// Errors the caller may simply retry
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::DeviceError { .. })
    }
}

impl From<std::io::Error> for OsdError {
    fn from(e: std::io::Error) -> Self {
        Self::TransportFailure {
            reason: e.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatal_and_recoverable_classes_are_disjoint() {
        let errors = [
            OsdError::invalid_argument("x"),
            OsdError::Timeout { duration_ms: 5 },
            OsdError::protocol_violation("x"),
            OsdError::wrong_module(3, "x"),
            OsdError::transport_failure("x"),
            OsdError::NotConnected,
            OsdError::DeviceError { addr: 1, reg_addr: 2 },
        ];
        for e in &errors {
            assert!(!(e.is_session_fatal() && e.is_recoverable()), "{e}");
        }
        assert!(OsdError::transport_failure("gone").is_session_fatal());
        assert!(OsdError::Timeout { duration_ms: 1 }.is_recoverable());
    }

    #[test]
    fn io_errors_become_transport_failures() {
        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe");
        let e: OsdError = io.into();
        assert!(matches!(e, OsdError::TransportFailure { .. }));
    }
}
