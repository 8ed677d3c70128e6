//! VM error types.
//!
//! Every error produced on a call path (a failed call, a missing slot, a
//! native closure raising) is also recorded as the VM's last error, so
//! host code can query it after the fact with [`Vm::last_error`].
//!
//! [`Vm::last_error`]: crate::Vm::last_error

use thiserror::Error;

/// Errors reported by the VM.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum VmError {
    /// A script error was raised; the message is also the VM's last error.
    #[error("{0}")]
    Raised(String),

    /// A stack index does not address a live slot of the current frame.
    #[error("stack index {index} is out of range (top is {top})")]
    InvalidIndex {
        /// The offending index.
        index: isize,
        /// Number of slots in the current frame.
        top: usize,
    },

    /// An attempt to pop below the base of the current frame.
    #[error("stack underflow: cannot pop {count} values, frame holds {top}")]
    StackUnderflow {
        /// Values requested.
        count: usize,
        /// Values available.
        top: usize,
    },

    /// Too many nested calls.
    #[error("stack overflow (call depth {0})")]
    StackOverflow(usize),

    /// A slot lookup failed.
    #[error("the index '{0}' does not exist")]
    IndexNotFound(String),

    /// The called value is not a closure or class.
    #[error("attempt to call '{0}'")]
    NotCallable(&'static str),

    /// An operation was applied to a value of the wrong kind.
    #[error("expected {expected}, got {actual}")]
    WrongType {
        /// Expected kind.
        expected: &'static str,
        /// Actual kind.
        actual: &'static str,
    },

    /// Parameter count check of a native closure failed.
    #[error("wrong number of parameters")]
    WrongParameterCount,

    /// Parameter type mask check of a native closure failed.
    #[error("parameter {index} has an invalid type '{actual}' ; expected: '{expected}'")]
    InvalidParameterType {
        /// 1-based parameter position (1 is `this`).
        index: usize,
        /// Kind that was passed.
        actual: &'static str,
        /// Accepted kinds.
        expected: String,
    },

    /// An invalid type mask specification.
    #[error("invalid typemask '{0}'")]
    InvalidTypeMask(String),

    /// No compiler is installed.
    #[error("no script compiler installed")]
    NoCompiler,
}

impl VmError {
    /// Check if this error carries a script-raised message.
    pub fn is_raised(&self) -> bool {
        matches!(self, VmError::Raised(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raised_displays_message() {
        let err = VmError::Raised("boom".to_string());
        assert_eq!(format!("{err}"), "boom");
        assert!(err.is_raised());
    }

    #[test]
    fn index_not_found_display() {
        let err = VmError::IndexNotFound("x".to_string());
        assert_eq!(format!("{err}"), "the index 'x' does not exist");
        assert!(!err.is_raised());
    }

    #[test]
    fn parameter_type_display() {
        let err = VmError::InvalidParameterType {
            index: 2,
            actual: "string",
            expected: "integer|float".to_string(),
        };
        assert_eq!(
            format!("{err}"),
            "parameter 2 has an invalid type 'string' ; expected: 'integer|float'"
        );
    }
}
