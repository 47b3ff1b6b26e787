// src/job/related.rs

//! References from jobs to arbitrary external domain objects.
//!
//! A reference is a plain `(kind, id)` pair. Turning it into a live object
//! is delegated to one [`EntityResolver`] per kind, registered in a
//! [`ResolverRegistry`].

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, OnceLock};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::{JobQueueError, Result};
use crate::job::JobId;
use crate::store::JobStore;

/// Tagged reference to an external entity.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntityRef {
    pub kind: String,
    pub id: String,
}

impl EntityRef {
    pub fn new(kind: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            id: id.into(),
        }
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.kind, self.id)
    }
}

/// Loads the live object behind an entity id of one kind.
pub trait EntityResolver: Send + Sync {
    /// `Ok(None)` means the entity no longer exists.
    fn resolve(&self, id: &str) -> Result<Option<Value>>;
}

impl<F> EntityResolver for F
where
    F: Fn(&str) -> Result<Option<Value>> + Send + Sync,
{
    fn resolve(&self, id: &str) -> Result<Option<Value>> {
        self(id)
    }
}

#[derive(Default, Clone)]
pub struct ResolverRegistry {
    resolvers: HashMap<String, Arc<dyn EntityResolver>>,
}

impl fmt::Debug for ResolverRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolverRegistry")
            .field("kinds", &self.resolvers.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl ResolverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, kind: impl Into<String>, resolver: impl EntityResolver + 'static) {
        self.resolvers.insert(kind.into(), Arc::new(resolver));
    }

    pub fn resolve(&self, entity: &EntityRef) -> Result<Option<Value>> {
        let resolver = self.resolvers.get(&entity.kind).ok_or_else(|| {
            JobQueueError::NotFound(format!(
                "no resolver registered for entity kind '{}'",
                entity.kind
            ))
        })?;
        resolver.resolve(&entity.id)
    }
}

/// Related entities of one job, loaded from the store on first access.
pub struct RelatedEntities<S: JobStore> {
    store: S,
    job: JobId,
    loaded: OnceLock<Vec<EntityRef>>,
}

impl<S: JobStore> fmt::Debug for RelatedEntities<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelatedEntities")
            .field("job", &self.job)
            .field("loaded", &self.loaded.get())
            .finish_non_exhaustive()
    }
}

impl<S: JobStore> RelatedEntities<S> {
    pub(crate) fn new(store: S, job: JobId) -> Self {
        Self {
            store,
            job,
            loaded: OnceLock::new(),
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded.get().is_some()
    }

    pub fn get(&self) -> Result<&[EntityRef]> {
        if let Some(entities) = self.loaded.get() {
            return Ok(entities);
        }
        let job = self.job;
        let entities = self.store.transaction(|tx| tx.related_entities(job))?;
        Ok(self.loaded.get_or_init(|| entities))
    }

    pub fn len(&self) -> Result<usize> {
        Ok(self.get()?.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.get()?.is_empty())
    }

    pub fn first(&self) -> Result<Option<&EntityRef>> {
        Ok(self.get()?.first())
    }

    /// First related entity of the given kind.
    pub fn find_kind(&self, kind: &str) -> Result<Option<&EntityRef>> {
        Ok(self.get()?.iter().find(|e| e.kind == kind))
    }

    /// Resolve every reference through the registry.
    pub fn resolve(&self, registry: &ResolverRegistry) -> Result<Vec<(EntityRef, Option<Value>)>> {
        self.get()?
            .iter()
            .map(|entity| Ok((entity.clone(), registry.resolve(entity)?)))
            .collect()
    }
}
