//! Registration proof-of-work solver: a parallel nonce search that
//! satisfies a chain-set difficulty target, used to gate admission to a
//! compute network.

pub mod block;
pub mod chain;
pub mod config;
pub mod coordinator;
pub mod difficulty;
pub mod error;
pub mod hash;
pub mod single_shot;
pub mod solver;
pub mod telemetry;
pub mod types;
pub mod worker;

pub use chain::ChainClient;
pub use config::Config;
pub use error::{Result, SolverError};
pub use solver::{create_pow, PowResult};
pub use types::Solution;
