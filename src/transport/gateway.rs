//! Gateway — turns resource construction and method invocation into
//! engine requests.
//!
//! Settles every known input, sends placeholders for unknown ones, and
//! fans the response out into one deferred output per promised field. A
//! rejected request fails every promised output with one shared cause.
//! Within one registration the urn (then id) settles before any output
//! property does.

use std::sync::Arc;

use indexmap::IndexMap;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::core::deployment::Deployment;
use crate::core::error::{Failure, MisuseError, RuntimeError};
use crate::core::output::{DependencySet, Output, OutputData, OutputResolver};
use crate::core::property::{InputBag, PropertyBag, PropertyValue};
use crate::resources::{IdentityResolver, ResourceIdentity, ResourceOptions, ResourceState};

use super::{CallRequest, CallResponse, RegisterOutputsRequest, RegisterResourceRequest};

/// One resource construction, as handed to the gateway by a shape.
pub(crate) struct RegisterSpec {
    pub type_token: String,
    pub name: String,
    pub custom: bool,
    pub remote: bool,
    pub inputs: InputBag,
    pub output_keys: Vec<String>,
    pub options: ResourceOptions,
}

/// Write side of a local component's declared outputs, resolved when the
/// component publishes rather than from the engine response.
pub(crate) struct LocalPublish {
    pub resolvers: IndexMap<String, OutputResolver<PropertyValue>>,
    pub all: OutputResolver<PropertyBag>,
}

/// Handles returned to the shape the moment registration is issued.
pub(crate) struct RegisteredResource {
    pub identity: Arc<ResourceIdentity>,
    pub outputs: IndexMap<String, Output<PropertyValue>>,
    pub all_outputs: Output<PropertyBag>,
    pub local: Option<LocalPublish>,
}

struct RequestParts {
    type_token: String,
    name: String,
    custom: bool,
    remote: bool,
    inputs: InputBag,
    options: ResourceOptions,
}

/// Per-key resolvers plus the whole-bag resolver, when outputs come from
/// the engine response.
type ResponseResolvers = (
    IndexMap<String, OutputResolver<PropertyValue>>,
    OutputResolver<PropertyBag>,
);

/// Issue a resource registration. Returns immediately; the request is
/// driven by a task tracked on the deployment.
pub(crate) fn register_resource(
    deployment: &Arc<Deployment>,
    spec: RegisterSpec,
) -> RegisteredResource {
    let RegisterSpec {
        type_token,
        name,
        custom,
        remote,
        inputs,
        output_keys,
        options,
    } = spec;

    let (identity, identity_resolver) =
        ResourceIdentity::allocate(&type_token, &name, custom, options.parent.clone());

    let mut outputs = IndexMap::new();
    let mut key_resolvers = IndexMap::new();
    for key in &output_keys {
        let (output, resolver) = Output::pending();
        outputs.insert(key.clone(), output);
        key_resolvers.insert(key.clone(), resolver);
    }
    let (all_outputs, all_resolver) = Output::pending();

    // A local component publishes its own outputs; everything else gets
    // them from the engine response.
    let local_publish = !custom && !remote;
    let (local, response_resolvers) = if local_publish {
        (
            Some(LocalPublish {
                resolvers: key_resolvers,
                all: all_resolver,
            }),
            None,
        )
    } else {
        (None, Some((key_resolvers, all_resolver)))
    };

    let ctx = Arc::clone(deployment);
    let task_identity = Arc::clone(&identity);
    let parts = RequestParts {
        type_token,
        name,
        custom,
        remote,
        inputs,
        options,
    };
    deployment.spawn(async move {
        drive_registration(ctx, task_identity, identity_resolver, response_resolvers, parts)
            .await;
    });

    RegisteredResource {
        identity,
        outputs,
        all_outputs,
        local,
    }
}

async fn drive_registration(
    ctx: Arc<Deployment>,
    identity: Arc<ResourceIdentity>,
    identity_resolver: IdentityResolver,
    response_resolvers: Option<ResponseResolvers>,
    parts: RequestParts,
) {
    let subject = format!("{} '{}'", parts.type_token, parts.name);
    let cancel = ctx.cancellation();
    let transport = ctx.transport();

    let attempt: Result<_, Failure> = async {
        let (wire_inputs, mut depends_on) = settle_inputs(&cancel, parts.inputs).await?;
        for dep in &parts.options.depends_on {
            depends_on.insert(Arc::clone(dep));
        }
        let parent_urn = match &parts.options.parent {
            Some(parent) => {
                depends_on.insert(Arc::clone(parent));
                settle_urn(&cancel, parent).await?
            }
            None => None,
        };
        let provider_urn = match &parts.options.provider {
            Some(provider) => settle_urn(&cancel, provider).await?,
            None => None,
        };
        let mut dependency_urns = Vec::with_capacity(depends_on.len());
        for dep in &depends_on {
            if let Some(urn) = settle_urn(&cancel, dep).await? {
                dependency_urns.push(urn);
            }
        }

        identity.transition(ResourceState::AwaitingEngine);
        debug!(token = %parts.type_token, name = %parts.name, "registering resource");
        let request = RegisterResourceRequest {
            type_token: parts.type_token.clone(),
            name: parts.name.clone(),
            custom: parts.custom,
            remote: parts.remote,
            inputs: wire_inputs,
            parent_urn,
            provider_urn,
            dependency_urns,
        };
        tokio::select! {
            _ = cancel.cancelled() => Err(RuntimeError::Cancelled.shared()),
            response = transport.register_resource(request) => {
                response.map_err(|source| {
                    RuntimeError::Transport {
                        operation: "register_resource",
                        subject: subject.clone(),
                        source,
                    }
                    .shared()
                })
            }
        }
    }
    .await;

    match attempt {
        Ok(response) => {
            identity.transition(ResourceState::Ready);
            let self_dep = identity.dependency();

            // The identity settles first, so an observer of any output
            // always finds the urn (and id) already resolved.
            identity_resolver.urn.fulfill(
                OutputData::known(response.urn.clone()).with_dependencies(self_dep.clone()),
            );
            if let Some(id_resolver) = identity_resolver.id {
                id_resolver.fulfill(OutputData {
                    value: response.id.clone(),
                    secret: false,
                    depends_on: self_dep.clone(),
                });
            }

            if let Some((key_resolvers, all_resolver)) = response_resolvers {
                let mut revealed: IndexMap<String, (PropertyValue, bool)> = IndexMap::new();
                for (key, value) in response.outputs {
                    let (plain, was_secret) = value.reveal();
                    revealed.insert(key, (plain, was_secret));
                }
                for (key, resolver) in key_resolvers {
                    resolver.fulfill(output_for_key(revealed.get(&key), &self_dep));
                }
                let any_secret = revealed.values().any(|(_, secret)| *secret);
                let bag: PropertyBag = revealed
                    .into_iter()
                    .map(|(key, (value, _))| (key, value))
                    .collect();
                all_resolver.fulfill(OutputData {
                    value: Some(bag),
                    secret: any_secret,
                    depends_on: self_dep,
                });
            }
        }
        Err(failure) => {
            identity.transition(ResourceState::Failed);
            ctx.record_failure(&failure);
            identity_resolver.urn.fail(Arc::clone(&failure));
            if let Some(id_resolver) = identity_resolver.id {
                id_resolver.fail(Arc::clone(&failure));
            }
            if let Some((key_resolvers, all_resolver)) = response_resolvers {
                for (_, resolver) in key_resolvers {
                    resolver.fail(Arc::clone(&failure));
                }
                all_resolver.fail(failure);
            }
        }
    }
}

/// Publish a local component's declared outputs through the engine, then
/// resolve the component's output handles.
pub(crate) async fn publish_outputs(
    deployment: &Arc<Deployment>,
    identity: &Arc<ResourceIdentity>,
    values: PropertyBag,
    publish: LocalPublish,
) -> Result<(), Failure> {
    let cancel = deployment.cancellation();
    let transport = deployment.transport();
    let subject = format!("{} '{}'", identity.type_token(), identity.name());

    let attempt: Result<(), Failure> = async {
        let urn = settle_urn(&cancel, identity).await?.ok_or_else(|| {
            RuntimeError::Misuse(MisuseError::UrnUnavailable {
                resource: identity.name().to_string(),
            })
            .shared()
        })?;
        let request = RegisterOutputsRequest {
            urn,
            outputs: values.clone(),
        };
        tokio::select! {
            _ = cancel.cancelled() => Err(RuntimeError::Cancelled.shared()),
            ack = transport.register_resource_outputs(request) => {
                ack.map_err(|source| {
                    RuntimeError::Transport {
                        operation: "register_resource_outputs",
                        subject: subject.clone(),
                        source,
                    }
                    .shared()
                })
            }
        }
    }
    .await;

    match attempt {
        Ok(()) => {
            let self_dep = identity.dependency();
            let mut revealed: IndexMap<String, (PropertyValue, bool)> = IndexMap::new();
            for (key, value) in values {
                let (plain, was_secret) = value.reveal();
                revealed.insert(key, (plain, was_secret));
            }
            for (key, resolver) in publish.resolvers {
                resolver.fulfill(output_for_key(revealed.get(&key), &self_dep));
            }
            let any_secret = revealed.values().any(|(_, secret)| *secret);
            let bag: PropertyBag = revealed
                .into_iter()
                .map(|(key, (value, _))| (key, value))
                .collect();
            publish.all.fulfill(OutputData {
                value: Some(bag),
                secret: any_secret,
                depends_on: self_dep,
            });
            Ok(())
        }
        Err(failure) => {
            deployment.record_failure(&failure);
            for (_, resolver) in publish.resolvers {
                resolver.fail(Arc::clone(&failure));
            }
            publish.all.fail(Arc::clone(&failure));
            Err(failure)
        }
    }
}

/// Invoke a provider-implemented method. The result's dependency set is
/// the union of the target resource and the argument dependencies; the
/// result is secret iff any response value carried the secret wrapper.
pub fn call(
    deployment: &Arc<Deployment>,
    method_token: &str,
    args: InputBag,
    target: Option<&Arc<ResourceIdentity>>,
) -> Output<PropertyBag> {
    let (output, resolver) = Output::pending();
    let ctx = Arc::clone(deployment);
    let token = method_token.to_string();
    let target = target.map(Arc::clone);
    deployment.spawn(async move {
        let cancel = ctx.cancellation();
        let transport = ctx.transport();
        let attempt: Result<(CallResponse, DependencySet), Failure> = async {
            let (wire_args, mut depends_on) = settle_inputs(&cancel, args).await?;
            let target_urn = match &target {
                Some(identity) => {
                    depends_on.insert(Arc::clone(identity));
                    settle_urn(&cancel, identity).await?
                }
                None => None,
            };
            let mut dependency_urns = Vec::with_capacity(depends_on.len());
            for dep in &depends_on {
                if let Some(urn) = settle_urn(&cancel, dep).await? {
                    dependency_urns.push(urn);
                }
            }
            debug!(token = %token, "invoking method");
            let request = CallRequest {
                method_token: token.clone(),
                args: wire_args,
                target_urn,
                dependency_urns,
            };
            let response = tokio::select! {
                _ = cancel.cancelled() => return Err(RuntimeError::Cancelled.shared()),
                response = transport.call(request) => {
                    response.map_err(|source| {
                        RuntimeError::Transport {
                            operation: "call",
                            subject: token.clone(),
                            source,
                        }
                        .shared()
                    })?
                }
            };
            Ok((response, depends_on))
        }
        .await;
        match attempt {
            Ok((response, depends_on)) => {
                let mut any_secret = false;
                let mut result = PropertyBag::new();
                for (key, value) in response.result {
                    let (plain, was_secret) = value.reveal();
                    any_secret |= was_secret;
                    result.insert(key, plain);
                }
                resolver.fulfill(OutputData {
                    value: Some(result),
                    secret: any_secret,
                    depends_on,
                });
            }
            Err(failure) => {
                ctx.record_failure(&failure);
                resolver.fail(failure);
            }
        }
    });
    output
}

/// As [`call`], projecting one field of the result bag. A field missing
/// from the response renders unknown.
pub fn call_field(
    deployment: &Arc<Deployment>,
    method_token: &str,
    args: InputBag,
    target: Option<&Arc<ResourceIdentity>>,
    field: &str,
) -> Output<PropertyValue> {
    let field = field.to_string();
    call(deployment, method_token, args, target)
        .map(move |result| result.get(&field).cloned().unwrap_or(PropertyValue::Unknown))
}

fn output_for_key(
    entry: Option<&(PropertyValue, bool)>,
    self_dep: &DependencySet,
) -> OutputData<PropertyValue> {
    match entry {
        None => OutputData {
            value: None,
            secret: false,
            depends_on: self_dep.clone(),
        },
        Some((PropertyValue::Unknown, was_secret)) => OutputData {
            value: None,
            secret: *was_secret,
            depends_on: self_dep.clone(),
        },
        Some((value, was_secret)) => OutputData {
            value: Some(value.clone()),
            secret: *was_secret,
            depends_on: self_dep.clone(),
        },
    }
}

/// Await every input, carrying known values to the wire and replacing
/// unknown ones with the placeholder. Input failures fail the request.
async fn settle_inputs(
    cancel: &CancellationToken,
    inputs: InputBag,
) -> Result<(PropertyBag, DependencySet), Failure> {
    let mut wire = PropertyBag::new();
    let mut depends_on = DependencySet::new();
    for (key, input) in inputs {
        let data = tokio::select! {
            _ = cancel.cancelled() => return Err(RuntimeError::Cancelled.shared()),
            settled = input.settle() => settled?,
        };
        depends_on.extend(data.depends_on);
        let value = match data.value {
            None => PropertyValue::Unknown,
            Some(value) if data.secret => value.make_secret(),
            Some(value) => value,
        };
        wire.insert(key, value);
    }
    Ok((wire, depends_on))
}

async fn settle_urn(
    cancel: &CancellationToken,
    identity: &Arc<ResourceIdentity>,
) -> Result<Option<String>, Failure> {
    let urn = identity.urn();
    let data = tokio::select! {
        _ = cancel.cancelled() => return Err(RuntimeError::Cancelled.shared()),
        settled = urn.settle() => settled?,
    };
    Ok(data.value)
}
