//! The service's typed error surface, per §7 of the spec.
//!
//! Each variant is one of the error *kinds* the spec enumerates, not a
//! grab-bag of implementation detail. Call sites that can only fail for
//! infrastructure reasons (CLI parsing, config loading) use `anyhow`
//! instead of matching on this enum — the split mirrors the one already
//! visible between the crate's typed core and its thin binary entrypoint.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServiceError {
    /// Network or node error while polling/broadcasting. Recovered locally
    /// by backoff retry; never reaches the reducer.
    #[error("transient RPC error: {0}")]
    TransientRpc(String),

    /// The decoder could not parse a raw log into a known event shape.
    /// Logged and dropped; never fatal.
    #[error("malformed event: {0}")]
    MalformedEvent(String),

    /// An off-chain `MonitorRequest` failed structural, semantic,
    /// jurisdiction, or channel-state validation (§4.F).
    #[error("invalid monitor request: {0}")]
    InvalidRequest(#[from] InvalidRequestReason),

    /// The reducer observed an impossible state transition (e.g.
    /// `ChannelClosed` for a channel that was never opened). The tick is
    /// rolled back and retried; persistent violations are fatal.
    #[error("state invariant violation: {0}")]
    StateInvariantViolation(String),

    /// Chain id, contract addresses, or schema version disagree with
    /// persisted state. Fatal at startup.
    #[error("config mismatch: {0}")]
    ConfigMismatch(String),

    /// Signing the outbound transaction failed. The action stays
    /// scheduled and is retried on the next tick.
    #[error("signature failure: {0}")]
    SignatureFailure(String),

    /// Errors bubbled up unchanged from the database layer.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Sub-reasons for `InvalidRequest`, one per validation step in §4.F.
/// Kept as its own enum (rather than a `String`) so unit tests can assert
/// on *which* step rejected a request.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum InvalidRequestReason {
    #[error("missing or malformed field: {0}")]
    Structural(String),

    #[error("closing-participant signature does not recover to a channel participant")]
    ClosingSignatureInvalid,

    #[error("non-closing-participant signature does not recover to the channel's other participant")]
    NonClosingSignatureInvalid,

    #[error("monitoring service contract address does not match this service")]
    WrongMonitoringServiceContract,

    #[error("chain id {got} does not match expected {expected}")]
    WrongChainId { got: u64, expected: u64 },

    #[error("channel {0:?} is not known to this service")]
    UnknownChannel(crate::types::ChannelKey),

    #[error("channel is settled; no further monitor requests are accepted")]
    ChannelSettled,

    #[error("nonce {got} does not exceed the highest stored/observed nonce {highest}")]
    NonceNotIncreasing { got: String, highest: String },
}

pub type Result<T> = std::result::Result<T, ServiceError>;
