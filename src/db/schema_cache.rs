use dashmap::DashMap;
use lru::LruCache;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::Arc;

use crate::error::Result;
use crate::model::{Direction, TypeId};
use crate::storage::EntryList;

const RELATION_CACHE_SIZE: usize = 1000;

/// Supplies schema lookups on cache miss. Implementations read through the
/// backend; the cache guarantees they see at most one in-flight miss per
/// key.
pub trait SchemaRetriever: Send + Sync {
    fn schema_by_name(&self, name: &str) -> Result<Option<u64>>;

    fn schema_relations(
        &self,
        schema_id: u64,
        type_id: TypeId,
        direction: Direction,
    ) -> Result<EntryList>;
}

type RelationKey = (u64, TypeId, Direction);

/// Process-wide memo of schema-vertex lookups.
pub struct SchemaCache {
    retriever: Arc<dyn SchemaRetriever>,
    names: DashMap<String, Option<u64>>,
    relations: Mutex<LruCache<RelationKey, EntryList>>,
    name_flights: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    relation_flights: Mutex<HashMap<RelationKey, Arc<Mutex<()>>>>,
}

impl SchemaCache {
    pub fn new(retriever: Arc<dyn SchemaRetriever>) -> Self {
        SchemaCache {
            retriever,
            names: DashMap::new(),
            relations: Mutex::new(LruCache::new(
                NonZeroUsize::new(RELATION_CACHE_SIZE).expect("nonzero cache size"),
            )),
            name_flights: Mutex::new(HashMap::new()),
            relation_flights: Mutex::new(HashMap::new()),
        }
    }

    pub fn schema_by_name(&self, name: &str) -> Result<Option<u64>> {
        if let Some(hit) = self.names.get(name) {
            return Ok(*hit);
        }

        let flight = flight_guard(&self.name_flights, name.to_string());
        let _in_flight = flight.lock();
        // Another miss may have landed while this one waited on the guard.
        if let Some(hit) = self.names.get(name) {
            return Ok(*hit);
        }

        let resolved = self.retriever.schema_by_name(name)?;
        self.names.insert(name.to_string(), resolved);
        release_flight(&self.name_flights, name);
        Ok(resolved)
    }

    pub fn schema_relations(
        &self,
        schema_id: u64,
        type_id: TypeId,
        direction: Direction,
    ) -> Result<EntryList> {
        let key = (schema_id, type_id, direction);
        if let Some(hit) = self.relations.lock().get(&key) {
            return Ok(hit.clone());
        }

        let flight = flight_guard(&self.relation_flights, key);
        let _in_flight = flight.lock();
        if let Some(hit) = self.relations.lock().get(&key) {
            return Ok(hit.clone());
        }

        let entries = self
            .retriever
            .schema_relations(schema_id, type_id, direction)?;
        self.relations.lock().put(key, entries.clone());
        release_flight(&self.relation_flights, &key);
        Ok(entries)
    }

    /// Drops a name binding, e.g. after a schema mutation commits.
    pub fn invalidate_name(&self, name: &str) {
        self.names.remove(name);
    }

    pub fn clear(&self) {
        self.names.clear();
        self.relations.lock().clear();
    }
}

fn flight_guard<K>(flights: &Mutex<HashMap<K, Arc<Mutex<()>>>>, key: K) -> Arc<Mutex<()>>
where
    K: std::hash::Hash + Eq,
{
    let mut map = flights.lock();
    Arc::clone(map.entry(key).or_default())
}

fn release_flight<K, Q>(flights: &Mutex<HashMap<K, Arc<Mutex<()>>>>, key: &Q)
where
    K: std::hash::Hash + Eq + std::borrow::Borrow<Q>,
    Q: std::hash::Hash + Eq + ?Sized,
{
    flights.lock().remove(key);
}
