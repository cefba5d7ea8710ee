//! In-process engine — serves transport requests without leaving the
//! process. Used by tests and by embedded/local evaluation.

use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;

use super::{
    CallRequest, CallResponse, EngineTransport, RegisterOutputsRequest, RegisterResourceRequest,
    RegisterResourceResponse, TransportError,
};

type RegisterFn =
    dyn Fn(&RegisterResourceRequest) -> Result<RegisterResourceResponse, TransportError>
        + Send
        + Sync;
type CallFn = dyn Fn(&CallRequest) -> Result<CallResponse, TransportError> + Send + Sync;

/// A programmable engine living in this process.
///
/// Default behavior mints a urn, echoes inputs back as outputs, and
/// assigns `<name>_id` as the physical id. In preview mode ids come back
/// unknown instead. Register and call behavior can be overridden with
/// closures; every published component output bag is recorded.
pub struct LocalEngine {
    stack: String,
    project: String,
    preview: bool,
    on_register: Option<Box<RegisterFn>>,
    on_call: Option<Box<CallFn>>,
    published: Mutex<Vec<RegisterOutputsRequest>>,
}

impl LocalEngine {
    pub fn new(stack: impl Into<String>, project: impl Into<String>) -> Self {
        Self {
            stack: stack.into(),
            project: project.into(),
            preview: false,
            on_register: None,
            on_call: None,
            published: Mutex::new(Vec::new()),
        }
    }

    /// Dry-run mode: physical ids come back unknown.
    pub fn preview(mut self, preview: bool) -> Self {
        self.preview = preview;
        self
    }

    pub fn on_register<F>(mut self, handler: F) -> Self
    where
        F: Fn(&RegisterResourceRequest) -> Result<RegisterResourceResponse, TransportError>
            + Send
            + Sync
            + 'static,
    {
        self.on_register = Some(Box::new(handler));
        self
    }

    pub fn on_call<F>(mut self, handler: F) -> Self
    where
        F: Fn(&CallRequest) -> Result<CallResponse, TransportError> + Send + Sync + 'static,
    {
        self.on_call = Some(Box::new(handler));
        self
    }

    /// The urn this engine assigns a resource.
    pub fn mint_urn(&self, type_token: &str, name: &str) -> String {
        format!(
            "urn:trama:{}::{}::{}::{}",
            self.stack, self.project, type_token, name
        )
    }

    /// Every output bag published through `register_resource_outputs`.
    pub fn published_outputs(&self) -> Vec<RegisterOutputsRequest> {
        self.published
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn default_register(&self, request: &RegisterResourceRequest) -> RegisterResourceResponse {
        let id = (request.custom && !self.preview).then(|| format!("{}_id", request.name));
        RegisterResourceResponse {
            urn: self.mint_urn(&request.type_token, &request.name),
            id,
            outputs: request.inputs.clone(),
        }
    }
}

#[async_trait]
impl EngineTransport for LocalEngine {
    async fn register_resource(
        &self,
        request: RegisterResourceRequest,
    ) -> Result<RegisterResourceResponse, TransportError> {
        match &self.on_register {
            Some(handler) => handler(&request),
            None => Ok(self.default_register(&request)),
        }
    }

    async fn register_resource_outputs(
        &self,
        request: RegisterOutputsRequest,
    ) -> Result<(), TransportError> {
        self.published
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request);
        Ok(())
    }

    async fn call(&self, request: CallRequest) -> Result<CallResponse, TransportError> {
        match &self.on_call {
            Some(handler) => handler(&request),
            None => Err(TransportError::new(format!(
                "no call handler for '{}'",
                request.method_token
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::property::{PropertyBag, PropertyValue};

    #[tokio::test]
    async fn test_local_default_register_echoes_inputs() {
        let engine = LocalEngine::new("dev", "app");
        let mut inputs = PropertyBag::new();
        inputs.insert("cidr".to_string(), PropertyValue::from("10.0.0.0/16"));
        let response = engine
            .register_resource(RegisterResourceRequest {
                type_token: "pkg:Net".to_string(),
                name: "n".to_string(),
                custom: true,
                remote: false,
                inputs,
                parent_urn: None,
                provider_urn: None,
                dependency_urns: vec![],
            })
            .await
            .unwrap();
        assert_eq!(response.urn, "urn:trama:dev::app::pkg:Net::n");
        assert_eq!(response.id.as_deref(), Some("n_id"));
        assert_eq!(
            response.outputs["cidr"],
            PropertyValue::from("10.0.0.0/16")
        );
    }

    #[tokio::test]
    async fn test_local_preview_withholds_id() {
        let engine = LocalEngine::new("dev", "app").preview(true);
        let response = engine
            .register_resource(RegisterResourceRequest {
                type_token: "pkg:Vm".to_string(),
                name: "vm".to_string(),
                custom: true,
                remote: false,
                inputs: PropertyBag::new(),
                parent_urn: None,
                provider_urn: None,
                dependency_urns: vec![],
            })
            .await
            .unwrap();
        assert!(response.id.is_none());
    }

    #[tokio::test]
    async fn test_local_records_published_outputs() {
        let engine = LocalEngine::new("dev", "app");
        let mut outputs = PropertyBag::new();
        outputs.insert("endpoint".to_string(), PropertyValue::from("https://x"));
        engine
            .register_resource_outputs(RegisterOutputsRequest {
                urn: "urn:trama:dev::app::pkg:Site::s".to_string(),
                outputs,
            })
            .await
            .unwrap();
        let published = engine.published_outputs();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].urn, "urn:trama:dev::app::pkg:Site::s");
    }

    #[tokio::test]
    async fn test_local_call_without_handler_fails() {
        let engine = LocalEngine::new("dev", "app");
        let err = engine
            .call(CallRequest {
                method_token: "pkg::Foo/ghost".to_string(),
                args: PropertyBag::new(),
                target_urn: None,
                dependency_urns: vec![],
            })
            .await
            .unwrap_err();
        assert!(err.message().contains("pkg::Foo/ghost"));
    }
}
