//! Centralized error taxonomy for the Audera core library.
//!
//! Mirrors the failure-kind taxonomy of spec.md §7: each [`AuderaError`]
//! variant maps to one kind, and the recovery policy (detach one peer,
//! retry a probe, escalate after repeated device failure, ...) lives with
//! the caller that observes the error, not with the error type itself.

use thiserror::Error;

/// Crate-wide error type.
#[derive(Debug, Error)]
pub enum AuderaError {
    /// Kind 1: a per-peer connection timed out, was reset, or aborted.
    ///
    /// Local recovery: detach that peer, keep streaming to the others.
    #[error("peer {0} failed: {1}")]
    PeerFailed(String, std::io::Error),

    /// Kind 2: the external reference-clock source was unreachable.
    ///
    /// Local recovery: keep the last known offset, retry next interval.
    #[error("reference clock probe failed: {0}")]
    ClockUnreachable(String),

    /// Kind 3: the local audio input or output device failed to open or stream.
    ///
    /// Escalates to the supervisor; repeated failures become exit code 5 (EIO).
    #[error("audio device failure ({role}): {source}")]
    AudioDevice {
        role: &'static str,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Kind 4: a frame failed length or delimiter validation.
    ///
    /// The player drops the frame and continues; this cannot occur on the
    /// streamer side (it only ever builds frames).
    #[error("frame validation failed: {0}")]
    FrameInvalid(String),

    /// Kind 5: a sync probe exchange returned a non-finite or absurd offset.
    ///
    /// That peer is dropped for this round and retried next round.
    #[error("peer sync desync: {0}")]
    ProtocolDesync(String),

    /// Kind 6: cooperative cancellation observed while holding a resource.
    #[error("operation cancelled")]
    Cancelled,

    /// A narrow config-collaborator call failed because the record was
    /// concurrently deleted (spec §6.3: "reads may fail with 'not found'
    /// only when the record was concurrently deleted").
    #[error("record not found: {0}")]
    NotFound(String),

    /// Generic I/O failure not covered by a more specific kind above.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl AuderaError {
    /// Returns true if this error represents a transient peer failure
    /// (spec §7 kind 1) that should trigger a detach-and-continue response
    /// rather than any broader restart.
    #[must_use]
    pub fn is_peer_transient(&self) -> bool {
        matches!(
            self,
            Self::PeerFailed(..) | Self::ProtocolDesync(_) | Self::FrameInvalid(_)
        )
    }
}

/// Convenient Result alias for core operations.
pub type AuderaResult<T> = Result<T, AuderaError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peer_failed_is_transient() {
        let err = AuderaError::PeerFailed(
            "10.0.0.5".into(),
            std::io::Error::new(std::io::ErrorKind::TimedOut, "timed out"),
        );
        assert!(err.is_peer_transient());
    }

    #[test]
    fn cancelled_is_not_transient() {
        assert!(!AuderaError::Cancelled.is_peer_transient());
    }
}
