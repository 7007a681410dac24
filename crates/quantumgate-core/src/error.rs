//! Error taxonomy for the peer session subsystem.
//!
//! Every fallible operation in `quantumgate-core` returns `Result<_, PeerError>`.
//! `PeerError` classifies into the five-way taxonomy the scheduler needs to act
//! without matching on individual variants at every call site: does this error
//! end the connection, what `DisconnectCondition` should the peer record, and
//! how should the peer's IP reputation move.

use std::borrow::Cow;

use thiserror::Error;

/// Why a peer session was (or will be) disconnected.
///
/// `None` is the resting value; every other variant is terminal once set on a
/// `Peer` and is surfaced to callbacks as-is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DisconnectCondition {
    /// No disconnect in progress.
    #[default]
    None,
    /// Unclassified fatal error.
    GeneralFailure,
    /// The underlying socket reported an exception.
    SocketError,
    /// Outbound connect attempt failed.
    ConnectError,
    /// A timeout (connect or handshake) elapsed.
    TimedOutError,
    /// Failure while receiving.
    ReceiveError,
    /// Failure while sending.
    SendError,
    /// A frame or inner message could not be understood.
    UnknownMessageError,
    /// The local side (or the application) requested disconnection.
    DisconnectRequest,
    /// The peer's IP is not allowed by the access plane.
    IPNotAllowed,
    /// The peer's UUID is not allowed, or was revoked mid-session.
    PeerNotAllowed,
}

/// How much an error should move a peer's IP reputation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReputationImpact {
    /// No reputation change.
    #[default]
    None,
    /// Benign-looking mistake (slow peer, harmless malformed data).
    Minimal,
    /// Suspicious but not clearly hostile.
    Moderate,
    /// Attack-shaped behavior: replay, forged handshake data, counter abuse.
    Severe,
}

/// Errors surfaced anywhere in the peer session pipeline.
///
/// No error unwinds across a worker thread boundary; the scheduler inspects
/// [`PeerError::disconnect_condition`] and [`PeerError::reputation_impact`]
/// instead of matching on variants directly.
#[derive(Debug, Error)]
pub enum PeerError {
    /// A state transition was attempted from a predecessor state that does
    /// not permit it (§4.1).
    #[error("invalid state transition: {0}")]
    InvalidStateTransition(Cow<'static, str>),

    /// A message kind arrived that is not valid for the current
    /// (state, direction) pair (§4.1, §9 dispatch table).
    #[error("unexpected message {kind} in state {state}")]
    UnexpectedMessage {
        /// The message kind that arrived.
        kind: Cow<'static, str>,
        /// The state the peer was in.
        state: Cow<'static, str>,
    },

    /// Handshake data failed the non-triviality check (§4.7): all-zero,
    /// all-one, or empty.
    #[error("handshake data rejected: {0}")]
    TrivialHandshakeData(Cow<'static, str>),

    /// A received frame's counter did not match the expected next value.
    #[error("counter mismatch: expected {expected}, got {actual}")]
    CounterMismatch {
        /// Expected next counter value.
        expected: u8,
        /// Counter value actually received.
        actual: u8,
    },

    /// A received frame's timestamp fell outside `AgeTolerance`.
    #[error("frame timestamp outside age tolerance")]
    StaleTimestamp,

    /// Decryption failed under every key currently installed.
    #[error("decryption failed under all known keys")]
    DecryptionExhausted,

    /// A fragment arrived out of order, with a mismatched kind, or a
    /// mismatched extender UUID relative to the in-progress reassembly.
    #[error("fragment reassembly error: {0}")]
    FragmentError(Cow<'static, str>),

    /// An inner message or frame exceeded a size limit (`Peek` returned
    /// `TooMuchData`, or fragment total exceeded `MaxInnerData`).
    #[error("message too large: {0}")]
    TooMuchData(Cow<'static, str>),

    /// Buffered bytes do not yet form a complete frame (not itself an error
    /// condition for callers that loop on it, but modeled as a result here
    /// for uniformity with the other `Peek` outcomes).
    #[error("incomplete frame")]
    Incomplete,

    /// A transient, recoverable local failure (e.g. an allocation that
    /// should simply be retried by dropping the current message).
    #[error("recoverable: {0}")]
    Recoverable(Cow<'static, str>),

    /// The underlying socket reported an I/O failure.
    #[error("socket error: {0}")]
    Socket(Cow<'static, str>),

    /// The peer's IP address is not allowed by the access plane.
    #[error("ip not allowed")]
    IpNotAllowed,

    /// Admission was refused because a subnet limit bucket is at or above
    /// its cap.
    #[error("subnet limit exceeded")]
    SubnetLimitExceeded,

    /// The peer's IP reputation is below the acceptance threshold.
    #[error("reputation below threshold")]
    ReputationTooLow,

    /// A connection-attempt or per-kind rate limit was exceeded.
    #[error("rate limited")]
    RateLimited,

    /// `RequireAuthentication` is set and the peer sent an empty signature,
    /// or tried to act as authenticated without ever completing it.
    #[error("peer not authenticated")]
    NotAuthenticated,

    /// The peer's UUID was revoked by the access plane mid-session.
    #[error("peer not allowed")]
    PeerNotAllowed,

    /// A lower-layer cryptographic operation failed.
    #[error("crypto error: {0}")]
    Crypto(#[from] quantumgate_crypto::CryptoError),

    /// Settings failed `Settings::validate()`.
    #[error("invalid configuration: {0}")]
    InvalidConfig(Cow<'static, str>),

    /// A connect, handshake, or key-update deadline elapsed (§4.1, §4.5,
    /// §4.9). Benign-looking by itself — a slow peer, not an attack — so it
    /// deteriorates reputation only minimally.
    #[error("timed out: {0}")]
    TimedOut(Cow<'static, str>),
}

impl PeerError {
    /// Transient errors don't end the connection; the current message is
    /// dropped (or deferred) and processing continues.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, PeerError::Recoverable(_) | PeerError::RateLimited | PeerError::Incomplete)
    }

    /// Whether this error should drive the peer towards `Disconnected`.
    #[must_use]
    pub fn should_disconnect(&self) -> bool {
        !self.is_transient()
    }

    /// The `DisconnectCondition` the scheduler should stamp on the peer, if
    /// [`Self::should_disconnect`] is true.
    #[must_use]
    pub fn disconnect_condition(&self) -> DisconnectCondition {
        match self {
            PeerError::Recoverable(_) | PeerError::RateLimited | PeerError::Incomplete => {
                DisconnectCondition::None
            }
            PeerError::Socket(_) => DisconnectCondition::SocketError,
            PeerError::IpNotAllowed => DisconnectCondition::IPNotAllowed,
            PeerError::SubnetLimitExceeded | PeerError::ReputationTooLow => {
                DisconnectCondition::IPNotAllowed
            }
            PeerError::NotAuthenticated | PeerError::PeerNotAllowed => {
                DisconnectCondition::PeerNotAllowed
            }
            PeerError::UnexpectedMessage { .. }
            | PeerError::InvalidStateTransition(_)
            | PeerError::TrivialHandshakeData(_)
            | PeerError::CounterMismatch { .. }
            | PeerError::StaleTimestamp
            | PeerError::DecryptionExhausted
            | PeerError::FragmentError(_)
            | PeerError::TooMuchData(_)
            | PeerError::Crypto(_)
            | PeerError::InvalidConfig(_) => DisconnectCondition::UnknownMessageError,
            PeerError::TimedOut(_) => DisconnectCondition::TimedOutError,
        }
    }

    /// How much this error should deteriorate the peer's IP reputation.
    #[must_use]
    pub fn reputation_impact(&self) -> ReputationImpact {
        match self {
            PeerError::Recoverable(_) | PeerError::RateLimited | PeerError::Incomplete => {
                ReputationImpact::None
            }
            PeerError::Socket(_) | PeerError::InvalidConfig(_) => ReputationImpact::None,
            PeerError::UnexpectedMessage { .. } => ReputationImpact::Minimal,
            PeerError::IpNotAllowed
            | PeerError::SubnetLimitExceeded
            | PeerError::ReputationTooLow
            | PeerError::NotAuthenticated => ReputationImpact::Moderate,
            PeerError::TrivialHandshakeData(_)
            | PeerError::CounterMismatch { .. }
            | PeerError::StaleTimestamp
            | PeerError::DecryptionExhausted
            | PeerError::FragmentError(_)
            | PeerError::TooMuchData(_)
            | PeerError::PeerNotAllowed
            | PeerError::InvalidStateTransition(_) => ReputationImpact::Severe,
            PeerError::Crypto(_) => ReputationImpact::Severe,
            PeerError::TimedOut(_) => ReputationImpact::Minimal,
        }
    }
}
