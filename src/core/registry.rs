//! Type-tagged capability registries.
//!
//! A [`Registry`] maps a configuration type tag (`"rcon"`, `"csgo"`, ...) to a
//! constructor producing one capability trait object. [`Registries`] bundles
//! the three capability kinds and is built once at startup, then shared
//! read-only with whatever needs to turn configuration into live objects.
//!
//! Constructors receive a [`Resolver`] so they can build nested capabilities
//! (a service built from a commander built from a streamer). The resolver
//! remembers the chain of envelopes currently under construction and refuses
//! to re-enter one of them, so a constructor that feeds its own envelope back
//! into the registry fails with [`RegistryError::Recursion`] instead of
//! looping forever.
use std::{collections::HashMap, fmt, sync::Arc};

use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;

use crate::{
    config::models::CapabilityConfig,
    ports::{Commander, Service, Streamer},
};

/// Upper bound on nesting depth, far above anything a hand-written config uses.
const MAX_DEPTH: usize = 32;

/// The capability interface a registry produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CapabilityKind {
    Service,
    Commander,
    Streamer,
}

impl fmt::Display for CapabilityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CapabilityKind::Service => write!(f, "service"),
            CapabilityKind::Commander => write!(f, "commander"),
            CapabilityKind::Streamer => write!(f, "streamer"),
        }
    }
}

/// Errors produced while turning configuration into capabilities
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum RegistryError {
    #[error("{kind} type {tag:?} not found")]
    NotFound { kind: CapabilityKind, tag: String },

    #[error("invalid {kind} envelope: {reason}")]
    InvalidEnvelope { kind: CapabilityKind, reason: String },

    #[error("invalid config for {kind} {tag:?}: {reason}")]
    InvalidConfig {
        kind: CapabilityKind,
        tag: String,
        reason: String,
    },

    #[error("failed to create {kind} {tag:?}: {reason}")]
    Construct {
        kind: CapabilityKind,
        tag: String,
        reason: String,
    },

    #[error("recursive capability chain: {chain}")]
    Recursion { chain: String },
}

pub type RegistryResult<T> = Result<T, RegistryError>;

/// Error a constructor returns; the resolver attaches kind and tag.
#[derive(Error, Debug)]
pub enum ConstructError {
    #[error(transparent)]
    Config(#[from] serde_json::Error),

    #[error("{0}")]
    Invalid(String),

    #[error(transparent)]
    Nested(#[from] RegistryError),
}

impl ConstructError {
    pub fn invalid(reason: impl Into<String>) -> Self {
        ConstructError::Invalid(reason.into())
    }
}

/// Deserialize a constructor's config blob. A missing (`null`) blob is read
/// as an empty object so that all-default configs can be omitted.
pub fn parse_config<C: DeserializeOwned>(value: &Value) -> Result<C, ConstructError> {
    let value = if value.is_null() {
        Value::Object(Default::default())
    } else {
        value.clone()
    };
    Ok(serde_json::from_value(value)?)
}

pub type Constructor<T> =
    Arc<dyn Fn(&Value, &Resolver<'_>) -> Result<Arc<T>, ConstructError> + Send + Sync>;

/// Mapping from type tag to constructor for one capability kind.
pub struct Registry<T: ?Sized> {
    kind: CapabilityKind,
    entries: HashMap<String, Constructor<T>>,
}

impl<T: ?Sized + Send + Sync + 'static> Registry<T> {
    pub fn new(kind: CapabilityKind) -> Self {
        Self {
            kind,
            entries: HashMap::new(),
        }
    }

    /// Register a constructor for `tag`. The last registration for a tag
    /// wins; returns `true` when an earlier constructor was replaced.
    pub fn register<F>(&mut self, tag: impl Into<String>, constructor: F) -> bool
    where
        F: Fn(&Value, &Resolver<'_>) -> Result<Arc<T>, ConstructError> + Send + Sync + 'static,
    {
        let tag = tag.into();
        let replaced = self
            .entries
            .insert(tag.clone(), Arc::new(constructor))
            .is_some();
        if replaced {
            tracing::warn!("Replacing previously registered {} type {:?}", self.kind, tag);
        } else {
            tracing::debug!("Registered {} type {:?}", self.kind, tag);
        }
        replaced
    }

    pub fn get(&self, tag: &str) -> Option<Constructor<T>> {
        self.entries.get(tag).cloned()
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.entries.contains_key(tag)
    }

    /// Registered tags, sorted.
    pub fn tags(&self) -> Vec<&str> {
        let mut tags: Vec<&str> = self.entries.keys().map(String::as_str).collect();
        tags.sort_unstable();
        tags
    }

    pub fn kind(&self) -> CapabilityKind {
        self.kind
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// The three capability registries, built once and shared by reference.
pub struct Registries {
    pub services: Registry<dyn Service>,
    pub commanders: Registry<dyn Commander>,
    pub streamers: Registry<dyn Streamer>,
}

impl Default for Registries {
    fn default() -> Self {
        Self::new()
    }
}

impl Registries {
    /// Empty registries. See `Registries::with_builtins` for the stock set.
    pub fn new() -> Self {
        Self {
            services: Registry::new(CapabilityKind::Service),
            commanders: Registry::new(CapabilityKind::Commander),
            streamers: Registry::new(CapabilityKind::Streamer),
        }
    }

    /// A resolver with an empty construction chain.
    pub fn resolver(&self) -> Resolver<'_> {
        Resolver {
            registries: self,
            chain: Vec::new(),
        }
    }

    pub fn new_service(&self, envelope: &CapabilityConfig) -> RegistryResult<Arc<dyn Service>> {
        self.resolver()
            .resolve_envelope(&self.services, envelope)
    }

    pub fn new_commander(&self, blob: &Value) -> RegistryResult<Arc<dyn Commander>> {
        self.resolver().commander(blob)
    }

    pub fn new_streamer(&self, blob: &Value) -> RegistryResult<Arc<dyn Streamer>> {
        self.resolver().streamer(blob)
    }
}

struct ChainLink {
    kind: CapabilityKind,
    tag: String,
    config: Value,
}

/// Builds capabilities from `{type, config}` blobs, tracking the chain of
/// envelopes under construction.
pub struct Resolver<'a> {
    registries: &'a Registries,
    chain: Vec<ChainLink>,
}

impl Resolver<'_> {
    pub fn service(&self, blob: &Value) -> RegistryResult<Arc<dyn Service>> {
        self.resolve(&self.registries.services, blob)
    }

    pub fn commander(&self, blob: &Value) -> RegistryResult<Arc<dyn Commander>> {
        self.resolve(&self.registries.commanders, blob)
    }

    pub fn streamer(&self, blob: &Value) -> RegistryResult<Arc<dyn Streamer>> {
        self.resolve(&self.registries.streamers, blob)
    }

    /// Depth of the construction chain this resolver was handed.
    pub fn depth(&self) -> usize {
        self.chain.len()
    }

    fn resolve<T>(&self, registry: &Registry<T>, blob: &Value) -> RegistryResult<Arc<T>>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        let envelope: CapabilityConfig =
            serde_json::from_value(blob.clone()).map_err(|e| RegistryError::InvalidEnvelope {
                kind: registry.kind(),
                reason: e.to_string(),
            })?;
        self.resolve_envelope(registry, &envelope)
    }

    fn resolve_envelope<T>(
        &self,
        registry: &Registry<T>,
        envelope: &CapabilityConfig,
    ) -> RegistryResult<Arc<T>>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        let kind = registry.kind();
        let tag = envelope.kind.clone();

        let reentered = self.chain.iter().any(|link| {
            link.kind == kind && link.tag == tag && link.config == envelope.config
        });
        if reentered || self.chain.len() >= MAX_DEPTH {
            return Err(RegistryError::Recursion {
                chain: self.describe_chain(kind, &tag),
            });
        }

        let constructor = registry.get(&tag).ok_or_else(|| RegistryError::NotFound {
            kind,
            tag: tag.clone(),
        })?;

        let mut chain: Vec<ChainLink> = self
            .chain
            .iter()
            .map(|link| ChainLink {
                kind: link.kind,
                tag: link.tag.clone(),
                config: link.config.clone(),
            })
            .collect();
        chain.push(ChainLink {
            kind,
            tag: tag.clone(),
            config: envelope.config.clone(),
        });
        let child = Resolver {
            registries: self.registries,
            chain,
        };

        tracing::debug!(depth = self.chain.len(), "Constructing {} {:?}", kind, tag);

        constructor(&envelope.config, &child).map_err(|e| match e {
            ConstructError::Config(e) => RegistryError::InvalidConfig {
                kind,
                tag,
                reason: e.to_string(),
            },
            ConstructError::Invalid(reason) => RegistryError::Construct { kind, tag, reason },
            ConstructError::Nested(e) => e,
        })
    }

    fn describe_chain(&self, kind: CapabilityKind, tag: &str) -> String {
        self.chain
            .iter()
            .map(|link| format!("{}:{}", link.kind, link.tag))
            .chain(std::iter::once(format!("{kind}:{tag}")))
            .collect::<Vec<_>>()
            .join(" -> ")
    }
}
