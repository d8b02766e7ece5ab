//! Error types for the Marketplace Relayer
//!
//! Every pipeline step has its own error type so a failure can be traced back to
//! the step that produced it. `PipelineError` wraps them and answers the two
//! questions a caller needs: did anything reach the network, and is it safe to retry.

use ethers::types::Address;
use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Failure talking to a JSON-RPC endpoint
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RpcError {
    /// Request never got a response (connection refused, DNS, TLS, reset)
    #[error("transport error: {0}")]
    Transport(String),

    /// Node answered with a JSON-RPC error object
    #[error("rpc error {code}: {message}")]
    Rpc { code: i64, message: String },

    /// Node answered with something that could not be decoded
    #[error("malformed response: {0}")]
    Decode(String),
}

impl RpcError {
    pub fn is_transport(&self) -> bool {
        matches!(self, RpcError::Transport(_))
    }
}

#[derive(Error, Debug, Clone)]
pub enum EstimationError {
    #[error("failed to encode call: {0}")]
    Encoding(String),

    #[error("gas limit estimation failed: {0}")]
    GasUnits(RpcError),

    #[error("gas price query failed: {0}")]
    GasPrice(RpcError),
}

impl EstimationError {
    pub fn kind(&self) -> &'static str {
        match self {
            EstimationError::Encoding(_) => "encoding",
            EstimationError::GasUnits(_) => "gas_units",
            EstimationError::GasPrice(_) => "gas_price",
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            EstimationError::Encoding(_) => false,
            EstimationError::GasUnits(e) | EstimationError::GasPrice(e) => e.is_transport(),
        }
    }
}

#[derive(Error, Debug, Clone)]
#[error("nonce lookup failed for {account:?}: {source}")]
pub struct NonceError {
    pub account: Address,
    pub source: RpcError,
}

#[derive(Error, Debug, Clone)]
pub enum SigningError {
    /// The key holder declined to sign
    #[error("signing refused: {0}")]
    Refused(String),

    /// The key holder could not be reached or has no usable account
    #[error("signer unavailable: {0}")]
    Unavailable(String),

    #[error("failed to encode transaction: {0}")]
    Encoding(String),
}

impl SigningError {
    pub fn kind(&self) -> &'static str {
        match self {
            SigningError::Refused(_) => "refused",
            SigningError::Unavailable(_) => "unavailable",
            SigningError::Encoding(_) => "encoding",
        }
    }
}

/// How a broadcast failure should be handled by the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BroadcastErrorKind {
    /// The network refused the payload. Rebuild with a fresh quote and nonce.
    Rejected,
    /// The payload never reached the network. Resending the same payload is safe.
    Unreachable,
    /// The payload may or may not have been accepted. Re-query chain state first.
    Unknown,
}

impl BroadcastErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BroadcastErrorKind::Rejected => "rejected",
            BroadcastErrorKind::Unreachable => "unreachable",
            BroadcastErrorKind::Unknown => "unknown",
        }
    }
}

impl fmt::Display for BroadcastErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Broadcast failure with its classification and the raw network message
#[derive(Error, Debug, Clone)]
#[error("{kind}: {message}")]
pub struct BroadcastError {
    pub kind: BroadcastErrorKind,
    pub message: String,
}

/// Node messages that prove the payload was refused. Anything else may have
/// been accepted ("already known", proxy timeouts, unfamiliar client wording).
const REFUSAL_MESSAGES: &[&str] = &[
    "insufficient funds",
    "intrinsic gas too low",
    "exceeds block gas limit",
    "execution reverted",
    "invalid signature",
    "invalid sender",
    "malformed transaction",
    "rlp",
    "underpriced",
    "fee cap",
    "exceeds the configured cap",
    "gas limit reached",
    "nonce too low",
    "nonce too high",
    "nonce gap",
    "already imported",
];

/// Node messages that mean the local nonce no longer matches the chain
const NONCE_CONFLICT_MESSAGES: &[&str] = &[
    "nonce too low",
    "nonce too high",
    "nonce gap",
    "replacement transaction underpriced",
    "already imported",
];

impl BroadcastError {
    pub fn new(kind: BroadcastErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(BroadcastErrorKind::Unknown, message)
    }

    /// Classify an error returned while handing the payload to the node
    pub fn from_submission(err: RpcError) -> Self {
        let kind = match &err {
            RpcError::Transport(_) => BroadcastErrorKind::Unreachable,
            RpcError::Decode(_) => BroadcastErrorKind::Unknown,
            RpcError::Rpc { message, .. } => {
                let lower = message.to_lowercase();
                if REFUSAL_MESSAGES.iter().any(|m| lower.contains(m)) {
                    BroadcastErrorKind::Rejected
                } else {
                    BroadcastErrorKind::Unknown
                }
            }
        };

        Self::new(kind, err.to_string())
    }

    pub fn is_retryable(&self) -> bool {
        self.kind == BroadcastErrorKind::Unreachable
    }

    pub fn is_nonce_conflict(&self) -> bool {
        let lower = self.message.to_lowercase();
        NONCE_CONFLICT_MESSAGES.iter().any(|m| lower.contains(m))
    }
}

/// Step of the submission pipeline an error came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStep {
    Estimate,
    Sequence,
    Sign,
    Broadcast,
}

impl PipelineStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineStep::Estimate => "estimate",
            PipelineStep::Sequence => "sequence",
            PipelineStep::Sign => "sign",
            PipelineStep::Broadcast => "broadcast",
        }
    }
}

/// What a failed submission means for the ledger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionOutcome {
    /// Nothing was sent
    NothingHappened,
    /// A payload may be pending on the network
    MaybeHappened,
    /// The network refused the payload
    Rejected,
}

#[derive(Error, Debug, Clone)]
pub enum PipelineError {
    #[error("estimate step failed: {0}")]
    Estimate(EstimationError),

    #[error("sequence step failed: {0}")]
    Sequence(NonceError),

    #[error("sign step failed: {0}")]
    Sign(SigningError),

    #[error("broadcast step failed: {0}")]
    Broadcast(BroadcastError),
}

impl PipelineError {
    pub fn step(&self) -> PipelineStep {
        match self {
            PipelineError::Estimate(_) => PipelineStep::Estimate,
            PipelineError::Sequence(_) => PipelineStep::Sequence,
            PipelineError::Sign(_) => PipelineStep::Sign,
            PipelineError::Broadcast(_) => PipelineStep::Broadcast,
        }
    }

    /// Error kind within the originating step
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::Estimate(e) => e.kind(),
            PipelineError::Sequence(_) => "nonce_lookup",
            PipelineError::Sign(e) => e.kind(),
            PipelineError::Broadcast(e) => e.kind.as_str(),
        }
    }

    pub fn outcome(&self) -> SubmissionOutcome {
        match self {
            PipelineError::Broadcast(e) => match e.kind {
                BroadcastErrorKind::Rejected => SubmissionOutcome::Rejected,
                BroadcastErrorKind::Unreachable => SubmissionOutcome::NothingHappened,
                BroadcastErrorKind::Unknown => SubmissionOutcome::MaybeHappened,
            },
            _ => SubmissionOutcome::NothingHappened,
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            PipelineError::Estimate(e) => e.is_retryable(),
            PipelineError::Sequence(e) => e.source.is_transport(),
            PipelineError::Sign(_) => false,
            PipelineError::Broadcast(e) => e.is_retryable(),
        }
    }
}

#[derive(Error, Debug, Clone)]
pub enum CacheReadError {
    #[error("listing query failed: {0}")]
    Network(RpcError),

    #[error("failed to decode listings: {0}")]
    Decode(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct ConfigurationError(pub String);

/// Main error type for startup and service plumbing
#[derive(Error, Debug)]
pub enum MarketError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigurationError),

    #[error("Server error: {0}")]
    Server(String),
}

/// Result type for relayer plumbing
pub type MarketResult<T> = Result<T, MarketError>;
