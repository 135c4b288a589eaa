// Injection error taxonomy
//
// Wire errors are translated once, at the collaborator boundary, into the
// small set of outcomes the engine reacts to.

use jdwp_client::{JdwpError, ObjectId};
use thiserror::Error;

pub type InjectResult<T> = Result<T, InjectError>;

#[derive(Debug, Error)]
pub enum InjectError {
    /// Target went away mid-operation; callers treat this as a no-op
    #[error("target VM is no longer reachable")]
    ProtocolUnavailable,

    /// Code running inside the target threw
    #[error("remote invocation threw exception object @{exception:x}")]
    TargetInvocationFailed { exception: ObjectId },

    #[error("no usable class loader: {0}")]
    LoaderResolutionFailed(String),

    /// Handle collected before it could be pinned; consumed by the pin retry loop
    #[error("remote object was garbage collected")]
    Collected,

    #[error("artifact bundle: {0}")]
    Bundle(String),

    #[error("configuration: {0}")]
    Config(String),

    #[error("missing remote member: {0}")]
    MissingMember(String),

    #[error("remote call returned null: {0}")]
    NullReference(String),

    #[error("pin registry was already released")]
    RegistryReleased,

    #[error("trigger breakpoint was not reached in time")]
    TriggerTimeout,

    #[error("JDWP: {0}")]
    Jdwp(#[source] JdwpError),
}

impl InjectError {
    pub fn is_disconnect(&self) -> bool {
        matches!(self, InjectError::ProtocolUnavailable)
    }
}

impl From<JdwpError> for InjectError {
    fn from(err: JdwpError) -> Self {
        if err.is_collected() {
            InjectError::Collected
        } else if err.is_disconnect() {
            InjectError::ProtocolUnavailable
        } else {
            InjectError::Jdwp(err)
        }
    }
}

impl From<zip::result::ZipError> for InjectError {
    fn from(err: zip::result::ZipError) -> Self {
        InjectError::Bundle(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_errors_are_classified() {
        let collected: InjectError = JdwpError::JdwpErrorCode(20, "INVALID_OBJECT").into();
        assert!(matches!(collected, InjectError::Collected));

        let gone: InjectError = JdwpError::ConnectionClosed.into();
        assert!(gone.is_disconnect());

        let other: InjectError = JdwpError::JdwpErrorCode(21, "INVALID_CLASS").into();
        assert!(matches!(other, InjectError::Jdwp(_)));
        assert!(!other.is_disconnect());
    }
}
