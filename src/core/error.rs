//! Error taxonomy for the runtime.
//!
//! Failures are shared as `Arc<RuntimeError>` so every output derived from
//! one engine request observes the identical cause.

use std::sync::Arc;

use thiserror::Error;

use crate::transport::TransportError;

/// Boxed error for sources produced outside this crate.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Shared terminal failure, attached to every output a request promised.
pub type Failure = Arc<RuntimeError>;

/// Top-level runtime error.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// A type token arrived that no binding ever registered. Fatal to the
    /// deserialization that hit it, not to the process.
    #[error("unknown type token '{token}'")]
    UnknownTypeToken { token: String },

    /// A second, different constructor was registered for an existing token.
    #[error("conflicting constructor registered for type token '{token}'")]
    DuplicateRegistration { token: String },

    /// The engine rejected a request or the transport failed outright.
    #[error("engine transport failed during {operation} for {subject}: {source}")]
    Transport {
        operation: &'static str,
        subject: String,
        #[source]
        source: TransportError,
    },

    /// A value transform applied to an output failed.
    #[error("output transform failed: {0}")]
    Transform(#[source] BoxError),

    /// A wire value could not be decoded into a property value.
    #[error("malformed wire value: {0}")]
    Decode(String),

    /// The caller broke a usage contract.
    #[error(transparent)]
    Misuse(#[from] MisuseError),

    /// The surrounding deployment evaluation was aborted.
    #[error("deployment evaluation cancelled")]
    Cancelled,
}

/// Usage-contract violations, surfaced immediately rather than producing a
/// wrong value.
#[derive(Debug, Error)]
pub enum MisuseError {
    #[error("outputs for component '{resource}' were already published")]
    OutputsAlreadyPublished { resource: String },

    #[error("component '{resource}' declared outputs but never published them")]
    OutputsNeverPublished { resource: String },

    #[error("component '{resource}' is remote; its provider publishes its outputs")]
    RemoteOutputs { resource: String },

    #[error("urn for resource '{resource}' is not available")]
    UrnUnavailable { resource: String },
}

impl RuntimeError {
    /// Wrap into the shared form handed to outputs.
    pub fn shared(self) -> Failure {
        Arc::new(self)
    }
}
