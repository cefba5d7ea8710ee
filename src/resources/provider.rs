//! Provider resources — the plugin that implements a package's
//! construction and method logic, itself tracked as a resource.

use std::any::Any;
use std::sync::Arc;

use crate::core::deployment::Deployment;
use crate::core::output::Output;
use crate::core::property::{InputBag, PropertyBag};
use crate::core::registry::provider_token;
use crate::transport::gateway::{self, RegisterSpec};

use super::{Resource, ResourceIdentity, ResourceOptions};

/// An explicitly-configured provider instance, registered under the
/// package's reserved provider token.
pub struct ProviderResource {
    identity: Arc<ResourceIdentity>,
    package: String,
    all_outputs: Output<PropertyBag>,
}

impl ProviderResource {
    /// Construct and register. Providers carry a physical id like custom
    /// resources.
    pub fn register(
        deployment: &Arc<Deployment>,
        package: &str,
        name: &str,
        inputs: InputBag,
        options: ResourceOptions,
    ) -> Arc<Self> {
        let registered = gateway::register_resource(
            deployment,
            RegisterSpec {
                type_token: provider_token(package),
                name: name.to_string(),
                custom: true,
                remote: false,
                inputs,
                output_keys: Vec::new(),
                options,
            },
        );
        Arc::new(Self {
            identity: registered.identity,
            package: package.to_string(),
            all_outputs: registered.all_outputs,
        })
    }

    /// Rebuild a shape for a reference received from the engine.
    pub fn rehydrated(package: &str, name: &str, urn: &str) -> Arc<Self> {
        Arc::new(Self {
            identity: ResourceIdentity::rehydrated(&provider_token(package), name, urn, true),
            package: package.to_string(),
            all_outputs: Output::unknown(),
        })
    }

    pub fn package(&self) -> &str {
        &self.package
    }

    pub fn urn(&self) -> Output<String> {
        self.identity.urn()
    }

    pub fn id(&self) -> Output<String> {
        self.identity.id().unwrap_or_else(Output::unknown)
    }

    /// The engine's accepted provider configuration.
    pub fn outputs(&self) -> Output<PropertyBag> {
        self.all_outputs.clone()
    }
}

impl Resource for ProviderResource {
    fn identity(&self) -> &Arc<ResourceIdentity> {
        &self.identity
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::property::PropertyValue;
    use crate::resources::custom::CustomResource;
    use crate::transport::local::LocalEngine;

    #[tokio::test]
    async fn test_provider_registers_under_reserved_token() {
        let ctx = Deployment::new(Arc::new(LocalEngine::new("dev", "app")));
        let mut inputs = InputBag::new();
        inputs.insert(
            "region".to_string(),
            Output::literal(PropertyValue::from("eu-west-1")),
        );
        let provider = ProviderResource::register(
            &ctx,
            "aws",
            "euro",
            inputs,
            ResourceOptions::default(),
        );
        assert_eq!(provider.identity().type_token(), "trama:providers:aws");
        let urn = provider.urn().settle().await.unwrap();
        assert_eq!(
            urn.value.as_deref(),
            Some("urn:trama:dev::app::trama:providers:aws::euro")
        );
        let id = provider.id().settle().await.unwrap();
        assert!(id.is_known());
        ctx.settle().await.unwrap();
    }

    #[tokio::test]
    async fn test_provider_routes_resource_construction() {
        let seen = Arc::new(std::sync::Mutex::new(None));
        let seen_in_handler = Arc::clone(&seen);
        let engine = LocalEngine::new("dev", "app").on_register(move |request| {
            if request.type_token == "aws::Bucket" {
                *seen_in_handler.lock().unwrap() = request.provider_urn.clone();
            }
            Ok(crate::transport::RegisterResourceResponse {
                urn: format!("urn:trama:dev::app::{}::{}", request.type_token, request.name),
                id: Some(format!("{}_id", request.name)),
                outputs: PropertyBag::new(),
            })
        });
        let ctx = Deployment::new(Arc::new(engine));
        let provider =
            ProviderResource::register(&ctx, "aws", "euro", InputBag::new(), ResourceOptions::default());
        CustomResource::register(
            &ctx,
            "aws::Bucket",
            "logs",
            InputBag::new(),
            &[],
            ResourceOptions {
                provider: Some(Arc::clone(provider.identity())),
                ..ResourceOptions::default()
            },
        );
        ctx.settle().await.unwrap();
        assert_eq!(
            seen.lock().unwrap().as_deref(),
            Some("urn:trama:dev::app::trama:providers:aws::euro")
        );
    }
}
