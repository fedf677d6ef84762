//! The resource kind registry
//!
//! Maps kind strings (`file.content`, `macro.switch`, …) to preparer
//! factories. The process-global registry is populated once at startup by
//! a builder and read-only afterwards, so lookups take no lock. Tests and
//! embedders can build instance registries instead.

use crate::control::{CasePreparer, SwitchPreparer};
use crate::file::FileContentPreparer;
use crate::value::Value;
use crate::Preparer;
use indexmap::IndexMap;
use log::debug;
use std::sync::{Arc, OnceLock};
use thiserror::Error;

/// Errors from registry lookups and installation
#[derive(Debug, Error)]
pub enum RegistryError {
    /// No factory is registered for the kind
    #[error("no resource kind {kind:?} is registered")]
    Unknown { kind: String },

    /// The factory rejected the declaration's arguments
    #[error("invalid {kind} declaration")]
    Construct {
        kind: String,
        #[source]
        source: anyhow::Error,
    },

    /// A registry was already installed as the process global
    #[error("a registry is already installed")]
    AlreadyInstalled,
}

/// Builds a preparer from a declaration's argument map
pub type Factory =
    Arc<dyn Fn(&str, &IndexMap<String, Value>) -> anyhow::Result<Box<dyn Preparer>> + Send + Sync>;

/// An immutable table of resource kinds
pub struct Registry {
    factories: IndexMap<String, Factory>,
}

impl Registry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder {
            factories: IndexMap::new(),
        }
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.factories.contains_key(kind)
    }

    /// Registered kinds, in registration order
    pub fn kinds(&self) -> Vec<&str> {
        self.factories.keys().map(String::as_str).collect()
    }

    /// Build a preparer for a declaration
    ///
    /// `name` is the declaration's instance name, passed through to the
    /// factory for kinds that care (cases use it as their branch name).
    pub fn instantiate(
        &self,
        kind: &str,
        name: &str,
        args: &IndexMap<String, Value>,
    ) -> Result<Box<dyn Preparer>, RegistryError> {
        let factory = self.factories.get(kind).ok_or_else(|| RegistryError::Unknown {
            kind: kind.to_string(),
        })?;
        factory(name, args).map_err(|source| RegistryError::Construct {
            kind: kind.to_string(),
            source,
        })
    }
}

/// Builder for a [`Registry`]; registration replaces earlier entries for
/// the same kind
pub struct RegistryBuilder {
    factories: IndexMap<String, Factory>,
}

impl RegistryBuilder {
    pub fn register(mut self, kind: impl Into<String>, factory: Factory) -> Self {
        self.factories.insert(kind.into(), factory);
        self
    }

    pub fn build(self) -> Registry {
        Registry {
            factories: self.factories,
        }
    }
}

/// The built-in kinds: `file.content`, `macro.switch`, `macro.case`
pub fn defaults() -> Registry {
    Registry::builder()
        .register(
            "file.content",
            Arc::new(|_name, args| {
                Ok(Box::new(FileContentPreparer::from_args(args)?) as Box<dyn Preparer>)
            }),
        )
        .register(
            "macro.switch",
            Arc::new(|_name, args| {
                Ok(Box::new(SwitchPreparer::from_args(args)?) as Box<dyn Preparer>)
            }),
        )
        .register(
            "macro.case",
            Arc::new(|name, args| {
                Ok(Box::new(CasePreparer::from_args(name, args)?) as Box<dyn Preparer>)
            }),
        )
        .build()
}

static GLOBAL: OnceLock<Registry> = OnceLock::new();

/// Install the process-global registry
///
/// Must happen before the first [`global`] call; afterwards the table is
/// frozen and reads are lock-free.
pub fn install(registry: Registry) -> Result<(), RegistryError> {
    debug!("installing registry with {} kinds", registry.factories.len());
    GLOBAL.set(registry).map_err(|_| RegistryError::AlreadyInstalled)
}

/// The process-global registry, defaulting to the built-in kinds
pub fn global() -> &'static Registry {
    GLOBAL.get_or_init(defaults)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_contain_builtins() {
        let registry = defaults();
        assert!(registry.contains("file.content"));
        assert!(registry.contains("macro.switch"));
        assert!(registry.contains("macro.case"));
        assert_eq!(registry.kinds(), vec!["file.content", "macro.switch", "macro.case"]);
    }

    #[test]
    fn test_unknown_kind() {
        let registry = defaults();
        let err = registry.instantiate("docker.container", "web", &IndexMap::new()).unwrap_err();
        assert!(matches!(err, RegistryError::Unknown { .. }));
    }

    #[test]
    fn test_construct_error_carries_kind() {
        let registry = defaults();
        // file.content without a destination is rejected by the factory.
        let err = registry.instantiate("file.content", "x", &IndexMap::new()).unwrap_err();
        match err {
            RegistryError::Construct { kind, .. } => assert_eq!(kind, "file.content"),
            other => panic!("expected Construct, got {other:?}"),
        }
    }

    #[test]
    fn test_install_freezes_the_global() {
        // The first install wins; the global serves it from then on. No
        // other test in this crate touches the global registry.
        let custom = Registry::builder()
            .register(
                "file.content",
                Arc::new(|_name, args| {
                    Ok(Box::new(FileContentPreparer::from_args(args)?) as Box<dyn Preparer>)
                }),
            )
            .build();
        install(custom).unwrap();

        assert!(global().contains("file.content"));
        assert!(!global().contains("macro.switch"));
        assert!(matches!(install(defaults()), Err(RegistryError::AlreadyInstalled)));
    }

    #[test]
    fn test_instantiate_builds_preparer() {
        let registry = defaults();
        let mut args = IndexMap::new();
        args.insert("destination".to_string(), Value::from("/tmp/x"));
        args.insert("content".to_string(), Value::from("hi"));
        assert!(registry.instantiate("file.content", "x", &args).is_ok());
    }
}
