//! Progress telemetry: a best-effort, out-of-band channel that must
//! never block the mining path. Pushes are non-blocking; a full queue
//! drops the frame silently rather than stalling a worker.

use std::fmt;

use crossbeam_channel::{Receiver, Sender, TrySendError};

/// One progress snapshot, computed by the coordinator from the worker
/// queues and the last-observed chain state. Non-authoritative: nothing
/// here gates correctness, only display.
#[derive(Clone, Debug)]
pub struct TelemetryFrame {
    pub elapsed_secs: f64,
    pub difficulty: u128,
    pub iters_per_sec: f64,
    pub block_number: u64,
    pub block_hash: [u8; 32],
    /// Smallest margin seen so far, and the seal that produced it.
    pub best_margin_seal: Option<[u8; 32]>,
}

impl fmt::Display for TelemetryFrame {
    /// Renders an equivalent of the original status block as a single
    /// `tracing`-friendly line rather than a multi-line panel.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "time={:.1}s difficulty={} rate={:.0}/s block={} block_hash={} best={}",
            self.elapsed_secs,
            self.difficulty,
            self.iters_per_sec,
            self.block_number,
            hex::encode(self.block_hash),
            self.best_margin_seal
                .map(hex::encode)
                .unwrap_or_else(|| "none".to_string()),
        )
    }
}

/// Bounded so a stalled consumer cannot leak memory; small enough that a
/// burst of frames never represents meaningful backpressure on a worker.
const TELEMETRY_CAPACITY: usize = 64;

pub fn channel() -> (TelemetrySender, Receiver<TelemetryFrame>) {
    let (tx, rx) = crossbeam_channel::bounded(TELEMETRY_CAPACITY);
    (TelemetrySender(tx), rx)
}

#[derive(Clone)]
pub struct TelemetrySender(Sender<TelemetryFrame>);

impl TelemetrySender {
    /// Never blocks. An overflow is dropped silently.
    pub fn send(&self, frame: TelemetryFrame) {
        match self.0.try_send(frame) {
            Ok(()) | Err(TrySendError::Full(_)) => {}
            Err(TrySendError::Disconnected(_)) => {
                tracing::debug!("telemetry receiver dropped, frame discarded");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame() -> TelemetryFrame {
        TelemetryFrame {
            elapsed_secs: 1.0,
            difficulty: 10,
            iters_per_sec: 1000.0,
            block_number: 1,
            block_hash: [0u8; 32],
            best_margin_seal: None,
        }
    }

    #[test]
    fn send_never_blocks_when_full() {
        let (tx, _rx) = channel();
        for _ in 0..TELEMETRY_CAPACITY + 10 {
            tx.send(frame());
        }
    }

    #[test]
    fn display_includes_key_fields() {
        let rendered = frame().to_string();
        assert!(rendered.contains("difficulty=10"));
        assert!(rendered.contains("block=1"));
    }
}
