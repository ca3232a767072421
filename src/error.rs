use thiserror::Error;

macro_rules! malformed_error {
    // Single string version
    ($msg:expr) => {
        crate::Error::MalformedOperation {
            message: $msg.to_string(),
            file: file!(),
            line: line!(),
        }
    };

    // Format string with arguments version
    ($fmt:expr, $($arg:tt)*) => {
        crate::Error::MalformedOperation {
            message: format!($fmt, $($arg)*),
            file: file!(),
            line: line!(),
        }
    };
}

/// The generic Error type, which covers every error this library can return.
///
/// Only some conditions are errors. Unresolved control flow, type conflicts and
/// regions that could not be structured degrade the output but never abort it;
/// they are reported as [`crate::Diagnostic`]s next to the result instead.
///
/// # Error Categories
///
/// ## Front End Errors
/// - [`Error::UnsupportedInstruction`] - No lowering exists for a mnemonic; the caller
///   decides through [`crate::translate::UnsupportedPolicy`] whether this aborts the function
/// - [`Error::InvalidOperand`] - Operands do not fit the mnemonic
/// - [`Error::Empty`] - Nothing to decompile
///
/// ## IR Errors
/// - [`Error::MalformedOperation`] - An operation breaks its operator's arity, output
///   or size rule; fatal for the function being decompiled
///
/// ## Analysis Errors
/// - [`Error::GraphError`] - Inconsistent graph construction
/// - [`Error::SsaError`] - SSA form failed verification
///
/// # Examples
///
/// ```rust
/// use irscope::{translate::{Generic, Instruction, Translator}, Error};
///
/// let mut translator = Translator::new(Generic::default());
/// let insn = Instruction::parse(0x1000, 4, "frobnicate r1")?;
///
/// match translator.translate(&insn) {
///     Err(Error::UnsupportedInstruction { mnemonic, address }) => {
///         assert_eq!(mnemonic, "frobnicate");
///         assert_eq!(address, 0x1000);
///     }
///     other => panic!("unexpected result: {other:?}"),
/// }
/// # Ok::<(), irscope::Error>(())
/// ```
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The front end has no lowering for this mnemonic.
    ///
    /// Recoverable: the pipeline may skip the instruction or replace it with a
    /// placeholder, depending on the configured policy.
    #[error("Unsupported instruction '{mnemonic}' at 0x{address:x}")]
    UnsupportedInstruction {
        /// The mnemonic as it appeared in the input
        mnemonic: String,
        /// Address of the offending instruction
        address: u64,
    },

    /// An IR operation violates its operator's contract.
    ///
    /// Raised when arity, output presence or the size rule of an operation does
    /// not hold. The source location where the violation was detected is kept for
    /// debugging purposes.
    ///
    /// # Fields
    ///
    /// * `message` - Description of the violated rule
    /// * `file` - Source file where the error was detected
    /// * `line` - Source line where the error was detected
    #[error("Malformed operation - {file}:{line}: {message}")]
    MalformedOperation {
        /// The message to be printed for the malformed operation
        message: String,
        /// The source file in which this error occurred
        file: &'static str,
        /// The source line in which this error occurred
        line: u32,
    },

    /// Operands could not be interpreted for the given mnemonic.
    #[error("Invalid operand - {0}")]
    InvalidOperand(String),

    /// Provided input was empty.
    #[error("Provided input was empty")]
    Empty,

    /// Graph construction or graph algorithm failure.
    #[error("{0}")]
    GraphError(String),

    /// SSA construction produced a form that fails verification.
    #[error("SSA verification failed - {0}")]
    SsaError(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_malformed_error_records_location() {
        let err = malformed_error!("COPY expects {} input, found {}", 1, 2);
        match &err {
            Error::MalformedOperation { message, file, .. } => {
                assert_eq!(message, "COPY expects 1 input, found 2");
                assert!(file.ends_with("error.rs"));
            }
            other => panic!("unexpected variant: {other:?}"),
        }
        assert!(err.to_string().starts_with("Malformed operation - "));
    }

    #[test]
    fn test_unsupported_display() {
        let err = Error::UnsupportedInstruction {
            mnemonic: "vpxor".into(),
            address: 0x401000,
        };
        assert_eq!(err.to_string(), "Unsupported instruction 'vpxor' at 0x401000");
    }
}
