//! Custom resources — resources with a physical counterpart.

use std::any::Any;
use std::sync::Arc;

use indexmap::IndexMap;

use crate::core::deployment::Deployment;
use crate::core::output::Output;
use crate::core::property::{InputBag, PropertyBag, PropertyValue};
use crate::transport::gateway::{self, RegisterSpec};

use super::{Resource, ResourceIdentity, ResourceOptions};

/// A resource the engine creates through a provider: it carries a
/// provider-assigned physical id alongside its urn.
pub struct CustomResource {
    identity: Arc<ResourceIdentity>,
    outputs: IndexMap<String, Output<PropertyValue>>,
    all_outputs: Output<PropertyBag>,
}

impl CustomResource {
    /// Construct and register. Returns immediately; urn, id, and the
    /// declared outputs settle when the engine responds.
    pub fn register(
        deployment: &Arc<Deployment>,
        type_token: &str,
        name: &str,
        inputs: InputBag,
        output_keys: &[&str],
        options: ResourceOptions,
    ) -> Arc<Self> {
        let registered = gateway::register_resource(
            deployment,
            RegisterSpec {
                type_token: type_token.to_string(),
                name: name.to_string(),
                custom: true,
                remote: false,
                inputs,
                output_keys: output_keys.iter().map(|key| key.to_string()).collect(),
                options,
            },
        );
        Arc::new(Self {
            identity: registered.identity,
            outputs: registered.outputs,
            all_outputs: registered.all_outputs,
        })
    }

    /// Rebuild a shape for a reference received from the engine: urn
    /// known, id unknown, no outputs.
    pub fn rehydrated(type_token: &str, name: &str, urn: &str) -> Arc<Self> {
        Arc::new(Self {
            identity: ResourceIdentity::rehydrated(type_token, name, urn, true),
            outputs: IndexMap::new(),
            all_outputs: Output::unknown(),
        })
    }

    pub fn urn(&self) -> Output<String> {
        self.identity.urn()
    }

    /// Provider-assigned physical id.
    pub fn id(&self) -> Output<String> {
        self.identity.id().unwrap_or_else(Output::unknown)
    }

    /// One declared output. Undeclared keys render unknown.
    pub fn output(&self, key: &str) -> Output<PropertyValue> {
        self.outputs.get(key).cloned().unwrap_or_else(Output::unknown)
    }

    /// The whole response bag, covering keys the schema did not declare.
    pub fn outputs(&self) -> Output<PropertyBag> {
        self.all_outputs.clone()
    }
}

impl Resource for CustomResource {
    fn identity(&self) -> &Arc<ResourceIdentity> {
        &self.identity
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
