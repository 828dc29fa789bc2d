//! Result and error types representing the outcome of allocating registers for a function.

use crate::verifier::VerifierErrors;
use thiserror::Error;

/// A register allocation error.
///
/// Apart from verifier errors, these mean the function cannot be compiled under the register
/// constraints of its instructions. Callers usually fall back to a less optimizing tier.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum RegallocError {
    /// A list of verifier errors found while validating the final intervals.
    ///
    /// This always represents a bug in the allocator or in the location summaries it was given.
    #[error("Verifier errors")]
    Verifier(#[from] VerifierErrors),

    /// Graph coloring kept failing after splitting intervals at their register uses.
    #[error("Graph coloring failed after {attempts} attempts")]
    ColoringAttemptsExhausted {
        /// Number of build/prune/color attempts made.
        attempts: u32,
    },

    /// More values require a register at one position than there are registers.
    #[error("Not enough registers at lifetime position {position}")]
    InsufficientRegisters {
        /// The lifetime position where allocation failed.
        position: u32,
    },
}

/// A convenient alias for a `Result` that uses `RegallocError` as the error type.
pub type RegallocResult<T> = Result<T, RegallocError>;
