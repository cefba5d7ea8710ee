//! Component resources — logical groupings with no physical counterpart.
//!
//! A local component publishes its exported properties itself, exactly
//! once. A remote component's behavior lives out-of-process in a
//! provider, so its outputs resolve from the engine response instead.

use std::any::Any;
use std::sync::{Arc, Mutex, PoisonError};

use indexmap::IndexMap;
use tracing::error;

use crate::core::deployment::Deployment;
use crate::core::error::{Failure, MisuseError, RuntimeError};
use crate::core::output::{Output, OutputData};
use crate::core::property::{InputBag, PropertyBag, PropertyValue};
use crate::transport::gateway::{self, LocalPublish, RegisterSpec};

use super::{Resource, ResourceIdentity, ResourceOptions};

pub struct ComponentResource {
    /// Absent on rehydrated references, which can never publish.
    deployment: Option<Arc<Deployment>>,
    identity: Arc<ResourceIdentity>,
    outputs: IndexMap<String, Output<PropertyValue>>,
    all_outputs: Output<PropertyBag>,
    publish: Mutex<Option<LocalPublish>>,
    remote: bool,
}

impl ComponentResource {
    /// Construct and register. For a remote component the declared
    /// outputs settle from the engine response; for a local one they wait
    /// for [`ComponentResource::register_outputs`].
    pub fn register(
        deployment: &Arc<Deployment>,
        type_token: &str,
        name: &str,
        inputs: InputBag,
        output_keys: &[&str],
        options: ResourceOptions,
        remote: bool,
    ) -> Arc<Self> {
        let registered = gateway::register_resource(
            deployment,
            RegisterSpec {
                type_token: type_token.to_string(),
                name: name.to_string(),
                custom: false,
                remote,
                inputs,
                output_keys: output_keys.iter().map(|key| key.to_string()).collect(),
                options,
            },
        );
        Arc::new(Self {
            deployment: Some(Arc::clone(deployment)),
            identity: registered.identity,
            outputs: registered.outputs,
            all_outputs: registered.all_outputs,
            publish: Mutex::new(registered.local),
            remote,
        })
    }

    /// Rebuild a shape for a reference received from the engine.
    pub fn rehydrated(type_token: &str, name: &str, urn: &str) -> Arc<Self> {
        Arc::new(Self {
            deployment: None,
            identity: ResourceIdentity::rehydrated(type_token, name, urn, false),
            outputs: IndexMap::new(),
            all_outputs: Output::unknown(),
            publish: Mutex::new(None),
            remote: true,
        })
    }

    /// Publish the component's exported properties. Valid exactly once,
    /// and only for local components.
    pub async fn register_outputs(&self, values: PropertyBag) -> Result<(), Failure> {
        let taken = self
            .publish
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match (taken, &self.deployment) {
            (Some(publish), Some(deployment)) => {
                gateway::publish_outputs(deployment, &self.identity, values, publish).await
            }
            _ if self.remote => Err(RuntimeError::Misuse(MisuseError::RemoteOutputs {
                resource: self.identity.name().to_string(),
            })
            .shared()),
            _ => Err(RuntimeError::Misuse(MisuseError::OutputsAlreadyPublished {
                resource: self.identity.name().to_string(),
            })
            .shared()),
        }
    }

    pub fn urn(&self) -> Output<String> {
        self.identity.urn()
    }

    /// One declared output. Undeclared keys render unknown.
    pub fn output(&self, key: &str) -> Output<PropertyValue> {
        self.outputs.get(key).cloned().unwrap_or_else(Output::unknown)
    }

    pub fn outputs(&self) -> Output<PropertyBag> {
        self.all_outputs.clone()
    }
}

impl Resource for ComponentResource {
    fn identity(&self) -> &Arc<ResourceIdentity> {
        &self.identity
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl Drop for ComponentResource {
    fn drop(&mut self) {
        let Some(publish) = self
            .publish
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        else {
            return;
        };
        if publish.resolvers.is_empty() {
            // Nothing was declared; settle the bag so nobody waits on it.
            publish.all.fulfill(OutputData {
                value: Some(PropertyBag::new()),
                secret: false,
                depends_on: self.identity.dependency(),
            });
            return;
        }
        // Downstream consumers would deadlock waiting on outputs that will
        // never arrive; fail them loudly instead.
        let failure = RuntimeError::Misuse(MisuseError::OutputsNeverPublished {
            resource: self.identity.name().to_string(),
        })
        .shared();
        error!(
            token = %self.identity.type_token(),
            name = %self.identity.name(),
            "component dropped without publishing its declared outputs"
        );
        if let Some(deployment) = &self.deployment {
            deployment.record_failure(&failure);
        }
        for (_, resolver) in publish.resolvers {
            resolver.fail(Arc::clone(&failure));
        }
        publish.all.fail(failure);
    }
}
