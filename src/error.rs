use thiserror::Error;

/// Failure modes of the solver, per the error kinds it must surface.
///
/// `WalletAlreadyRegistered` is deliberately absent: the coordinator treats
/// that condition as a terminal success-without-solution (`Ok(None)`), not
/// an error.
#[derive(Debug, Error)]
pub enum SolverError {
    #[error("chain client unavailable after {attempts} attempt(s): {source}")]
    TransientChain {
        attempts: u32,
        #[source]
        source: anyhow::Error,
    },

    #[error("CUDA backend requested but no device is available: {0}")]
    UnavailableAccelerator(String),

    #[error("CUDA device error: {0}")]
    Device(String),

    #[error("solver invariant violated: {0}")]
    LogicBug(&'static str),
}

pub type Result<T> = std::result::Result<T, SolverError>;
