//! Fatal lowering errors

use kl_copy::CopyError;
use kl_ir::IrViolation;
use kl_span::FileSpan;
use std::fmt;

/// A construct a pass should have removed but did not
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Leftover {
    /// Pass responsible for the construct
    pub pass: &'static str,
    /// What was left
    pub construct: String,
    /// Where it was found
    pub span: FileSpan,
}

impl fmt::Display for Leftover {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "{} at {} ({})", self.construct, self.span, self.pass)
    }
}

fn join<T: fmt::Display>(items: &[T]) -> String {
    items.iter().map(ToString::to_string).collect::<Vec<_>>().join("; ")
}

/// Errors that abort lowering of the whole unit
#[derive(Debug, Clone, thiserror::Error)]
pub enum LoweringError {
    /// A parameter has neither an argument nor a default
    #[error("incomplete call to `{callee}`: no argument at index {index}")]
    MissingArgument {
        /// Called function
        callee: String,
        /// Index of the unmatched parameter
        index: usize,
        /// Call location
        span: FileSpan,
    },

    /// More arguments than parameters
    #[error("call to `{callee}` passes {given} arguments for {expected} parameters")]
    TooManyArguments {
        /// Called function
        callee: String,
        /// Arguments at the call site
        given: usize,
        /// Declared parameters
        expected: usize,
        /// Call location
        span: FileSpan,
    },

    /// An inline function reached itself while being expanded
    #[error("inline function `{callee}` is expanded recursively")]
    RecursiveInline {
        /// Function being expanded
        callee: String,
        /// Call location
        span: FileSpan,
    },

    /// Transitive substitution lookup failed
    #[error(transparent)]
    Substitution(#[from] CopyError),

    /// A phase ran before one it depends on
    #[error("phase `{phase}` requires `{prerequisite}` to run first")]
    MissingPrerequisite {
        /// Phase about to run
        phase: String,
        /// Phase that has not run
        prerequisite: String,
    },

    /// Structural verification failed after a phase
    #[error("invalid IR after `{phase}`: {}", join(.violations))]
    InvalidIr {
        /// Phase that produced the IR
        phase: String,
        /// Everything the verifier found
        violations: Vec<IrViolation>,
    },

    /// Constructs survived the phase meant to remove them
    #[error("lowering is incomplete: {}", join(.leftovers))]
    IncompleteLowering {
        /// Surviving constructs
        leftovers: Vec<Leftover>,
    },

    /// Recoverable errors were reported along the way
    #[error("{count} compilation error(s) reported during lowering")]
    CompilationFailed {
        /// Number of errors
        count: usize,
    },

    /// The input breaks an assumption the front end guarantees
    #[error("malformed IR: {message}")]
    Malformed {
        /// What was wrong
        message: String,
        /// Location
        span: FileSpan,
    },
}

impl LoweringError {
    /// Location of the error, when it has one
    pub fn span(&self) -> Option<FileSpan> {
        match self {
            Self::MissingArgument { span, .. }
            | Self::TooManyArguments { span, .. }
            | Self::RecursiveInline { span, .. }
            | Self::Malformed { span, .. } => Some(*span),
            Self::IncompleteLowering { leftovers } => leftovers.first().map(|leftover| leftover.span),
            Self::Substitution(_)
            | Self::MissingPrerequisite { .. }
            | Self::InvalidIr { .. }
            | Self::CompilationFailed { .. } => None,
        }
    }
}
