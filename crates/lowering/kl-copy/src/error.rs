//! Errors raised while resolving substitutions

use kl_ir::DeclId;

/// Substitution failures; all of them are internal compiler errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CopyError {
    /// The transitive lookup reached a key it had already visited
    #[error("detected cycle in the global substitution map at {key}")]
    SubstitutionCycle {
        /// First key visited twice
        key: DeclId,
    },
}
