//! Resource shapes — identity, lifecycle, and the three resource kinds.
//!
//! Every resource carries a `ResourceIdentity`: its namespaced type token,
//! its logical name, and its engine-assigned urn (plus a physical id for
//! custom resources), the latter two as deferred outputs.

pub mod component;
pub mod custom;
pub mod provider;

use std::any::Any;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tracing::debug;

use crate::core::output::{DependencySet, Output, OutputResolver};

static NEXT_SEQUENCE: AtomicU64 = AtomicU64::new(1);

/// Lifecycle of a resource instance.
///
/// "Unknown" urn/id placeholders during a preview still count as Ready —
/// unknown is a valid terminal value for a preview, not a pending state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceState {
    /// Inputs captured; nothing sent yet.
    Constructing,
    /// A construction request is in flight.
    AwaitingEngine,
    /// Urn (and id, for custom resources) settled.
    Ready,
    /// The construction request was rejected; every output of this
    /// resource is failed.
    Failed,
}

impl fmt::Display for ResourceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Constructing => write!(f, "CONSTRUCTING"),
            Self::AwaitingEngine => write!(f, "AWAITING-ENGINE"),
            Self::Ready => write!(f, "READY"),
            Self::Failed => write!(f, "FAILED"),
        }
    }
}

/// Options accepted by every resource registration.
#[derive(Default)]
pub struct ResourceOptions {
    /// Logical parent; used for dependency inference and default naming.
    pub parent: Option<Arc<ResourceIdentity>>,
    /// Extra explicit dependencies beyond those carried by the inputs.
    pub depends_on: Vec<Arc<ResourceIdentity>>,
    /// Route this resource's construction through an explicit provider.
    pub provider: Option<Arc<ResourceIdentity>>,
}

/// Identity of one resource instance within a deployment.
///
/// Equality, ordering, and hashing use a process-unique sequence number, so
/// identities can live in dependency sets with deterministic iteration.
#[derive(Debug)]
pub struct ResourceIdentity {
    sequence: u64,
    type_token: String,
    name: String,
    custom: bool,
    urn: Output<String>,
    id: Option<Output<String>>,
    parent: Option<Arc<ResourceIdentity>>,
    state: Mutex<ResourceState>,
}

/// Write side of an identity's urn/id, owned by the registration task.
pub(crate) struct IdentityResolver {
    pub urn: OutputResolver<String>,
    pub id: Option<OutputResolver<String>>,
}

impl ResourceIdentity {
    /// Allocate a fresh identity with pending urn/id.
    pub(crate) fn allocate(
        type_token: &str,
        name: &str,
        custom: bool,
        parent: Option<Arc<ResourceIdentity>>,
    ) -> (Arc<Self>, IdentityResolver) {
        let (urn, urn_resolver) = Output::pending();
        let (id, id_resolver) = if custom {
            let (output, resolver) = Output::pending();
            (Some(output), Some(resolver))
        } else {
            (None, None)
        };
        let identity = Arc::new(Self {
            sequence: NEXT_SEQUENCE.fetch_add(1, Ordering::Relaxed),
            type_token: type_token.to_string(),
            name: name.to_string(),
            custom,
            urn,
            id,
            parent,
            state: Mutex::new(ResourceState::Constructing),
        });
        (
            identity,
            IdentityResolver {
                urn: urn_resolver,
                id: id_resolver,
            },
        )
    }

    /// Rebuild an identity for a resource reference received from the
    /// engine: urn known, id unknown, already Ready.
    pub fn rehydrated(type_token: &str, name: &str, urn: &str, custom: bool) -> Arc<Self> {
        Arc::new(Self {
            sequence: NEXT_SEQUENCE.fetch_add(1, Ordering::Relaxed),
            type_token: type_token.to_string(),
            name: name.to_string(),
            custom,
            urn: Output::literal(urn.to_string()),
            id: custom.then(Output::unknown),
            parent: None,
            state: Mutex::new(ResourceState::Ready),
        })
    }

    pub fn type_token(&self) -> &str {
        &self.type_token
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_custom(&self) -> bool {
        self.custom
    }

    /// Engine-assigned logical name, as a deferred output.
    pub fn urn(&self) -> Output<String> {
        self.urn.clone()
    }

    /// Provider-assigned physical id; absent for components.
    pub fn id(&self) -> Option<Output<String>> {
        self.id.clone()
    }

    pub fn parent(&self) -> Option<&Arc<ResourceIdentity>> {
        self.parent.as_ref()
    }

    pub fn state(&self) -> ResourceState {
        *self
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn transition(&self, next: ResourceState) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        debug!(
            token = %self.type_token,
            name = %self.name,
            from = %*state,
            to = %next,
            "resource state transition"
        );
        *state = next;
    }

    /// A dependency set containing just this resource.
    pub fn dependency(self: &Arc<Self>) -> DependencySet {
        BTreeSet::from([Arc::clone(self)])
    }
}

impl PartialEq for ResourceIdentity {
    fn eq(&self, other: &Self) -> bool {
        self.sequence == other.sequence
    }
}

impl Eq for ResourceIdentity {}

impl PartialOrd for ResourceIdentity {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ResourceIdentity {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.sequence.cmp(&other.sequence)
    }
}

impl std::hash::Hash for ResourceIdentity {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.sequence.hash(state);
    }
}

/// Common surface of every rehydratable resource shape.
pub trait Resource: Send + Sync {
    fn identity(&self) -> &Arc<ResourceIdentity>;

    /// Downcast support, so rehydrated references reach kind-specific
    /// members.
    fn as_any(&self) -> &dyn Any;

    fn urn(&self) -> Output<String> {
        self.identity().urn()
    }
}

/// Logical name encoded in a urn: the final `::`-separated segment.
pub fn urn_name(urn: &str) -> &str {
    urn.rsplit("::").next().unwrap_or(urn)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resources_urn_name_last_segment() {
        assert_eq!(urn_name("urn:trama:dev::app::pkg:Foo::f"), "f");
        assert_eq!(urn_name("bare"), "bare");
    }

    #[test]
    fn test_resources_identity_sequence_distinct() {
        let a = ResourceIdentity::rehydrated("pkg::T", "a", "urn::a", true);
        let b = ResourceIdentity::rehydrated("pkg::T", "b", "urn::b", true);
        assert_ne!(a, b);
        assert!(a < b);
    }

    #[test]
    fn test_resources_component_has_no_id() {
        let component = ResourceIdentity::rehydrated("pkg::Net", "net", "urn::net", false);
        assert!(component.id().is_none());
        let custom = ResourceIdentity::rehydrated("pkg::Vm", "vm", "urn::vm", true);
        assert!(custom.id().is_some());
    }

    #[tokio::test]
    async fn test_resources_rehydrated_urn_known_id_unknown() {
        let identity =
            ResourceIdentity::rehydrated("pkg::Vm", "vm", "urn:trama:d::a::pkg:Vm::vm", true);
        assert_eq!(identity.state(), ResourceState::Ready);
        let urn = identity.urn().settle().await.unwrap();
        assert_eq!(urn.value.as_deref(), Some("urn:trama:d::a::pkg:Vm::vm"));
        let id = identity.id().unwrap().settle().await.unwrap();
        assert!(!id.is_known());
    }

    #[test]
    fn test_resources_state_display() {
        assert_eq!(ResourceState::Ready.to_string(), "READY");
        assert_eq!(ResourceState::AwaitingEngine.to_string(), "AWAITING-ENGINE");
    }

    #[test]
    fn test_resources_dependency_set_contains_self() {
        let identity = ResourceIdentity::rehydrated("pkg::T", "t", "urn::t", false);
        let deps = identity.dependency();
        assert_eq!(deps.len(), 1);
        assert!(deps.contains(&identity));
    }
}
