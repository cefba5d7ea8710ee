//! Registration dispatcher — type tokens to constructors.
//!
//! Two independent, append-only maps populated once per binding at load:
//! one from resource type tokens, one from package names to provider
//! constructors (looked up through the reserved provider token). Both are
//! write-once-per-key; lookups after startup are uncontended reads.

use std::sync::{Arc, OnceLock, PoisonError, RwLock};

use rustc_hash::FxHashMap;
use tracing::debug;

use crate::core::error::RuntimeError;
use crate::core::property::ResourceRef;
use crate::resources::provider::ProviderResource;
use crate::resources::{urn_name, Resource};

/// Builds a resource shape from a logical name and urn. Plain `fn` so
/// re-registration can be checked for identity.
pub type ResourceCtor = fn(name: &str, urn: &str) -> Arc<dyn Resource>;

/// Builds a provider shape from a logical name and urn.
pub type ProviderCtor = fn(name: &str, urn: &str) -> Arc<ProviderResource>;

/// Prefix of the reserved per-package provider token.
pub const PROVIDER_TOKEN_PREFIX: &str = "trama:providers";

/// The reserved provider token for a package.
pub fn provider_token(package: &str) -> String {
    format!("{PROVIDER_TOKEN_PREFIX}:{package}")
}

/// The package a provider token names, if it is one.
pub fn provider_token_package(token: &str) -> Option<&str> {
    token
        .strip_prefix(PROVIDER_TOKEN_PREFIX)
        .and_then(|rest| rest.strip_prefix(':'))
}

static RESOURCES: OnceLock<RwLock<FxHashMap<String, ResourceCtor>>> = OnceLock::new();
static PROVIDERS: OnceLock<RwLock<FxHashMap<String, ProviderCtor>>> = OnceLock::new();

fn resource_map() -> &'static RwLock<FxHashMap<String, ResourceCtor>> {
    RESOURCES.get_or_init(|| RwLock::new(FxHashMap::default()))
}

fn provider_map() -> &'static RwLock<FxHashMap<String, ProviderCtor>> {
    PROVIDERS.get_or_init(|| RwLock::new(FxHashMap::default()))
}

/// Register a constructor for a resource type token.
///
/// Idempotent: the same token with the identical constructor is a no-op;
/// a different constructor for an existing token is an error.
pub fn register_resource(token: &str, ctor: ResourceCtor) -> Result<(), RuntimeError> {
    let mut map = resource_map()
        .write()
        .unwrap_or_else(PoisonError::into_inner);
    match map.get(token) {
        Some(existing) if std::ptr::fn_addr_eq(*existing, ctor) => Ok(()),
        Some(_) => Err(RuntimeError::DuplicateRegistration {
            token: token.to_string(),
        }),
        None => {
            debug!(token, "registered resource constructor");
            map.insert(token.to_string(), ctor);
            Ok(())
        }
    }
}

/// Register a provider constructor for a package.
pub fn register_provider(package: &str, ctor: ProviderCtor) -> Result<(), RuntimeError> {
    let mut map = provider_map()
        .write()
        .unwrap_or_else(PoisonError::into_inner);
    match map.get(package) {
        Some(existing) if std::ptr::fn_addr_eq(*existing, ctor) => Ok(()),
        Some(_) => Err(RuntimeError::DuplicateRegistration {
            token: provider_token(package),
        }),
        None => {
            debug!(package, "registered provider constructor");
            map.insert(package.to_string(), ctor);
            Ok(())
        }
    }
}

/// Look up the constructor for a resource type token.
pub fn lookup_resource(token: &str) -> Result<ResourceCtor, RuntimeError> {
    resource_map()
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .get(token)
        .copied()
        .ok_or_else(|| RuntimeError::UnknownTypeToken {
            token: token.to_string(),
        })
}

/// Look up the provider constructor for a package.
pub fn lookup_provider(package: &str) -> Result<ProviderCtor, RuntimeError> {
    provider_map()
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .get(package)
        .copied()
        .ok_or_else(|| RuntimeError::UnknownTypeToken {
            token: provider_token(package),
        })
}

/// Everything one generated binding registers for its package.
pub struct PackageModule {
    pub package: &'static str,
    pub version: &'static str,
    pub resources: &'static [(&'static str, ResourceCtor)],
    pub provider: Option<ProviderCtor>,
}

/// Register a package's resource and provider constructors. Idempotent and
/// safe to call from multiple bindings sharing one process.
pub fn register_package(module: &PackageModule) -> Result<(), RuntimeError> {
    for (token, ctor) in module.resources {
        register_resource(token, *ctor)?;
    }
    if let Some(ctor) = module.provider {
        register_provider(module.package, ctor)?;
    }
    debug!(
        package = module.package,
        version = module.version,
        "registered package module"
    );
    Ok(())
}

/// Build a live typed shape from a resource reference received in a
/// property bag. Unknown tokens abort this deserialization with a hard
/// error; they indicate a version or schema mismatch with the engine.
pub fn rehydrate(reference: &ResourceRef) -> Result<Arc<dyn Resource>, RuntimeError> {
    let name = urn_name(&reference.urn);
    if let Some(package) = provider_token_package(&reference.token) {
        let ctor = lookup_provider(package)?;
        Ok(ctor(name, &reference.urn))
    } else {
        let ctor = lookup_resource(&reference.token)?;
        Ok(ctor(name, &reference.urn))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::custom::CustomResource;

    fn make_widget(name: &str, urn: &str) -> Arc<dyn Resource> {
        CustomResource::rehydrated("regtest::Widget", name, urn)
    }

    // Distinct body so the two constructors cannot be merged into one
    // address by codegen.
    fn make_widget_conflicting(name: &str, urn: &str) -> Arc<dyn Resource> {
        CustomResource::rehydrated("regtest::WidgetV2", name, urn)
    }

    fn make_provider(name: &str, urn: &str) -> Arc<ProviderResource> {
        ProviderResource::rehydrated("regtest", name, urn)
    }

    #[test]
    fn test_registry_provider_token_shape() {
        assert_eq!(provider_token("aws"), "trama:providers:aws");
        assert_eq!(provider_token_package("trama:providers:aws"), Some("aws"));
        assert_eq!(provider_token_package("pkg::Foo"), None);
    }

    #[test]
    fn test_registry_reregister_identical_is_noop() {
        register_resource("regtest::Idem", make_widget).unwrap();
        register_resource("regtest::Idem", make_widget).unwrap();
        assert!(lookup_resource("regtest::Idem").is_ok());
    }

    #[test]
    fn test_registry_conflicting_ctor_rejected() {
        register_resource("regtest::Conflict", make_widget).unwrap();
        let err = register_resource("regtest::Conflict", make_widget_conflicting).unwrap_err();
        assert!(matches!(err, RuntimeError::DuplicateRegistration { token } if token == "regtest::Conflict"));
    }

    #[test]
    fn test_registry_unknown_token_is_error() {
        let err = lookup_resource("regtest::Ghost").unwrap_err();
        assert!(matches!(err, RuntimeError::UnknownTypeToken { token } if token == "regtest::Ghost"));
    }

    #[test]
    fn test_registry_rehydrate_resource() {
        register_resource("regtest::Hydrated", make_widget).unwrap();
        let shape = rehydrate(&ResourceRef {
            token: "regtest::Hydrated".to_string(),
            urn: "urn:trama:dev::app::regtest:Hydrated::w1".to_string(),
        })
        .unwrap();
        assert_eq!(shape.identity().name(), "w1");
        assert!(shape
            .as_any()
            .downcast_ref::<CustomResource>()
            .is_some());
    }

    #[test]
    fn test_registry_rehydrate_provider_via_reserved_token() {
        register_provider("regtest", make_provider).unwrap();
        let shape = rehydrate(&ResourceRef {
            token: provider_token("regtest"),
            urn: "urn:trama:dev::app::trama:providers:regtest::default".to_string(),
        })
        .unwrap();
        assert_eq!(shape.identity().name(), "default");
        let provider = shape
            .as_any()
            .downcast_ref::<ProviderResource>()
            .expect("provider shape");
        assert_eq!(provider.package(), "regtest");
    }

    #[test]
    fn test_registry_package_module_idempotent() {
        static MODULE: PackageModule = PackageModule {
            package: "regtest-pkg",
            version: "1.0.0",
            resources: &[("regtest-pkg::Widget", make_widget)],
            provider: None,
        };
        register_package(&MODULE).unwrap();
        register_package(&MODULE).unwrap();
        assert!(lookup_resource("regtest-pkg::Widget").is_ok());
    }
}
