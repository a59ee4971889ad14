//! Error taxonomy for the deterministic scheduler core (spec §7).
//!
//! Most of the conditions spec §7 names are *not* surfaced as errors at
//! all — `TransientAbort` and `SuspendedRemoteRead` are routine control
//! flow handled entirely inside the worker loop, and `Fatal` conditions
//! abort the process rather than return through a `Result`. What remains
//! here is the handful of genuinely fallible boundary operations: decoding
//! a batch or message off the wire, and the `ReconUnresolvable` /
//! `BatchGap` conditions a caller may want to observe for metrics even
//! though the scheduler itself never retries them.

use thiserror::Error;

/// Result type alias used throughout this workspace.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the scheduler core.
#[derive(Debug, Error)]
pub enum Error {
    /// Failed to decode a serialised transaction, batch, or message.
    #[error("decode error: {0}")]
    Decode(#[from] bincode::Error),

    /// A recon probe returned a value other than `RECON_SUCCESS` or
    /// `SUSPENDED`. Per spec §7 this is a silent discard in the hot path;
    /// this variant exists so callers who want to log/count the event can
    /// do so without the scheduler itself treating it as fatal.
    #[error("recon transaction {txn_id} is unresolvable")]
    ReconUnresolvable {
        /// The transaction that could not be resolved.
        txn_id: u64,
    },

    /// The batch channel delivered batches beyond `n` but never `n`
    /// itself before shutdown was signalled.
    #[error("batch {expected} never arrived before shutdown")]
    BatchGap {
        /// The batch number the dispatch loop was waiting for.
        expected: u64,
    },
}

impl Error {
    /// True for errors that represent a condition the caller might want
    /// to retry or re-issue (batch gaps resolve themselves if the
    /// sequencer re-sends; recon-unresolvable transactions are re-issued
    /// by the sequencer after a timeout, per spec §4.4).
    pub fn is_retryable_upstream(&self) -> bool {
        matches!(self, Error::BatchGap { .. } | Error::ReconUnresolvable { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_gap_is_retryable_upstream() {
        let e = Error::BatchGap { expected: 7 };
        assert!(e.is_retryable_upstream());
        assert!(e.to_string().contains('7'));
    }

    #[test]
    fn recon_unresolvable_is_retryable_upstream() {
        let e = Error::ReconUnresolvable { txn_id: 99 };
        assert!(e.is_retryable_upstream());
    }

    #[test]
    fn decode_error_is_not_retryable_upstream() {
        let bincode_err = bincode::Error::new(bincode::ErrorKind::SizeLimit);
        let e: Error = bincode_err.into();
        assert!(!e.is_retryable_upstream());
    }
}
