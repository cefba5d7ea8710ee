//! Engine transport — the RPC boundary to the orchestration engine.
//!
//! The engine is a black-box peer: it accepts register/call requests and
//! returns property bags, urns, and ids. Transient-failure policy belongs
//! to the transport implementation; the gateway above surfaces exactly
//! one success or one failure per request.

pub mod gateway;
pub mod local;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::error::BoxError;
use crate::core::property::PropertyBag;

/// Failure of a single engine request, reported by the transport.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct TransportError {
    message: String,
    #[source]
    source: Option<BoxError>,
}

impl TransportError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    pub fn with_source(message: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Construct an ordinary, component, or provider resource.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterResourceRequest {
    pub type_token: String,
    pub name: String,
    /// True for resources with a physical counterpart (and providers).
    pub custom: bool,
    /// True when the resource's behavior is implemented out-of-process by
    /// a provider rather than in this program.
    pub remote: bool,
    /// Wire-ready inputs: unknown inputs are already placeholders.
    #[serde(default)]
    pub inputs: PropertyBag,
    #[serde(default)]
    pub parent_urn: Option<String>,
    #[serde(default)]
    pub provider_urn: Option<String>,
    #[serde(default)]
    pub dependency_urns: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterResourceResponse {
    pub urn: String,
    /// Physical id; absent for components and for custom resources whose
    /// id is not yet determined (preview).
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub outputs: PropertyBag,
}

/// Publish a component's exported properties. Acknowledgment is the only
/// valid response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterOutputsRequest {
    pub urn: String,
    #[serde(default)]
    pub outputs: PropertyBag,
}

/// Invoke a provider-implemented method against an existing resource.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallRequest {
    pub method_token: String,
    #[serde(default)]
    pub args: PropertyBag,
    #[serde(default)]
    pub target_urn: Option<String>,
    #[serde(default)]
    pub dependency_urns: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallResponse {
    #[serde(default)]
    pub result: PropertyBag,
}

/// The orchestration engine, as seen from this side of the wire.
#[async_trait]
pub trait EngineTransport: Send + Sync {
    async fn register_resource(
        &self,
        request: RegisterResourceRequest,
    ) -> Result<RegisterResourceResponse, TransportError>;

    async fn register_resource_outputs(
        &self,
        request: RegisterOutputsRequest,
    ) -> Result<(), TransportError>;

    async fn call(&self, request: CallRequest) -> Result<CallResponse, TransportError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::property::PropertyValue;

    #[test]
    fn test_transport_error_with_source_chain() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset");
        let err = TransportError::with_source("engine unreachable", io);
        assert_eq!(err.message(), "engine unreachable");
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_transport_register_request_roundtrip() {
        let mut inputs = PropertyBag::new();
        inputs.insert("size".to_string(), PropertyValue::from("large"));
        inputs.insert("replicas".to_string(), PropertyValue::Unknown);
        let request = RegisterResourceRequest {
            type_token: "pkg::Foo".to_string(),
            name: "f".to_string(),
            custom: true,
            remote: false,
            inputs,
            parent_urn: None,
            provider_urn: None,
            dependency_urns: vec!["urn:trama:dev::app::pkg:Net::n".to_string()],
        };
        let encoded = serde_json::to_string(&request).unwrap();
        let decoded: RegisterResourceRequest = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded.type_token, "pkg::Foo");
        assert_eq!(decoded.inputs["replicas"], PropertyValue::Unknown);
        assert_eq!(decoded.dependency_urns.len(), 1);
    }

    #[test]
    fn test_transport_response_defaults() {
        let decoded: RegisterResourceResponse =
            serde_json::from_str(r#"{"urn": "urn:trama:dev::app::pkg:Net::n"}"#).unwrap();
        assert!(decoded.id.is_none());
        assert!(decoded.outputs.is_empty());
    }
}
