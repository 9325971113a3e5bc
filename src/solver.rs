//! The PoW facade: a single entry point that selects the CPU or
//! GPU backend and returns a uniform result record. The CPU/GPU choice is
//! a tagged variant resolved once here — no dynamic dispatch on the hot
//! path.

use std::sync::Arc;

use serde::Serialize;

use crate::chain::ChainClient;
use crate::config::Config;
use crate::coordinator::Coordinator;
use crate::error::{Result, SolverError};
use crate::telemetry::TelemetrySender;
use crate::types::Solution;

/// The result record: `nonce`, `difficulty`, `block_number`,
/// and `work` (lowercase ASCII-hex of the seal).
#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct PowResult {
    pub nonce: u64,
    pub difficulty: u128,
    pub block_number: u64,
    pub work: String,
}

impl From<Solution> for PowResult {
    fn from(solution: Solution) -> Self {
        Self {
            nonce: solution.nonce,
            difficulty: solution.difficulty,
            block_number: solution.block_number,
            work: hex::encode(solution.seal),
        }
    }
}

/// Mines a registration proof of work, selecting the CPU or GPU backend
/// from `config.cuda`. Returns `Ok(None)` iff the wallet became
/// registered before a local solution was mined.
pub fn create_pow(
    chain: Arc<dyn ChainClient>,
    config: Config,
    telemetry: Option<TelemetrySender>,
) -> Result<Option<PowResult>> {
    if config.cuda {
        create_pow_cuda(chain, config, telemetry)
    } else {
        let mut coordinator = Coordinator::new(chain, config);
        if let Some(sender) = telemetry {
            coordinator = coordinator.with_telemetry(sender);
        }
        Ok(coordinator.run()?.map(PowResult::from))
    }
}

#[cfg(feature = "cuda")]
fn create_pow_cuda(
    chain: Arc<dyn ChainClient>,
    config: Config,
    telemetry: Option<TelemetrySender>,
) -> Result<Option<PowResult>> {
    crate::worker::gpu::run_cuda_solve(chain, config, telemetry).map(|opt| opt.map(PowResult::from))
}

#[cfg(not(feature = "cuda"))]
fn create_pow_cuda(
    _chain: Arc<dyn ChainClient>,
    _config: Config,
    _telemetry: Option<TelemetrySender>,
) -> Result<Option<PowResult>> {
    Err(SolverError::UnavailableAccelerator(
        "this build was compiled without the `cuda` feature".to_string(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Solution;

    #[test]
    fn pow_result_encodes_seal_as_lowercase_hex() {
        let solution = Solution {
            nonce: 7,
            block_number: 100,
            difficulty: 1,
            seal: [0xab; 32],
        };
        let result: PowResult = solution.into();
        assert_eq!(result.work, "ab".repeat(32));
        assert_eq!(result.nonce, 7);
        assert_eq!(result.block_number, 100);
    }

    #[test]
    fn cuda_without_feature_fails_fast() {
        #[cfg(not(feature = "cuda"))]
        {
            use crate::chain::ChainClient;
            struct Unused;
            impl ChainClient for Unused {
                fn current_block_number(&self) -> anyhow::Result<u64> {
                    unreachable!()
                }
                fn current_difficulty(&self) -> anyhow::Result<u128> {
                    unreachable!()
                }
                fn block_hash(&self, _: u64) -> anyhow::Result<Option<[u8; 32]>> {
                    unreachable!()
                }
                fn wallet_is_registered(&self) -> anyhow::Result<bool> {
                    unreachable!()
                }
            }
            let mut cfg = Config::default();
            cfg.cuda = true;
            let err = create_pow(Arc::new(Unused), cfg, None).unwrap_err();
            assert!(matches!(err, SolverError::UnavailableAccelerator(_)));
        }
    }
}
