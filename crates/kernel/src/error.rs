//! Setup-time error types.
//!
//! Every precondition is checked when a kernel is constructed. Once a kernel
//! exists, ticking it cannot fail.

use crate::stage::Stage;

/// Violated precondition of the bitonic sort network.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SortError {
    /// Block size must be a power of two of at least 2.
    #[error("sort block size {0} must be a power of two >= 2")]
    InvalidBlockSize(usize),
    /// Element count must be a power of two and a multiple of the block size.
    #[error("sort length {len} must be a power of two and a multiple of the block size {block}")]
    InvalidLength {
        /// Requested element count.
        len: usize,
        /// Configured block size.
        block: usize,
    },
    /// The transpose step needs `len / block <= block`.
    #[error("sort length {len} exceeds block size squared ({max})")]
    TooLarge {
        /// Requested element count.
        len: usize,
        /// Largest supported element count for this block size.
        max: usize,
    },
}

/// Error raised while building a simulation kernel.
#[derive(Debug, thiserror::Error)]
pub enum SetupError {
    /// Box or spawn geometry cannot host a simulation.
    #[error("invalid geometry: {0}")]
    InvalidGeometry(String),
    /// A physical or solver parameter is out of range.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
    /// Sort network precondition.
    #[error(transparent)]
    Sort(#[from] SortError),
    /// One or more stage programs could not be resolved.
    #[error("missing programs for stages: {}", format_stages(.0))]
    MissingPrograms(Vec<Stage>),
    /// GPU adapter, device or pipeline creation failed.
    #[error("GPU initialization failed: {0}")]
    Gpu(String),
}

fn format_stages(stages: &[Stage]) -> String {
    stages
        .iter()
        .map(|s| s.name())
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_programs_lists_every_stage() {
        let err = SetupError::MissingPrograms(vec![Stage::Sort, Stage::Force]);
        assert_eq!(err.to_string(), "missing programs for stages: sort, force");
    }

    #[test]
    fn sort_error_converts_into_setup_error() {
        let err: SetupError = SortError::InvalidBlockSize(3).into();
        assert!(matches!(err, SetupError::Sort(SortError::InvalidBlockSize(3))));
    }
}
