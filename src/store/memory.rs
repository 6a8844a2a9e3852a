//! In-memory state store for single-instance deployments.

use super::error::{StoreError, StoreResult};
use super::StateStore;
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::RwLock;
use std::time::{Duration, Instant};

/// What a key currently holds.
#[derive(Debug, Clone)]
enum Value {
    Text(String),
    Hash(HashMap<String, String>),
    List(VecDeque<String>),
    Sorted(HashMap<String, f64>),
}

impl Value {
    fn type_name(&self) -> &'static str {
        match self {
            Self::Text(_) => "text",
            Self::Hash(_) => "hash",
            Self::List(_) => "list",
            Self::Sorted(_) => "sorted set",
        }
    }
}

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// In-process [`StateStore`] backed by a single map.
///
/// Expired entries are dropped lazily on access; [`MemoryStore::purge_expired`]
/// reclaims the rest and is meant to be called from a periodic task.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, Entry>>,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop every expired entry. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.write().unwrap();
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired(now));
        before - entries.len()
    }

    /// Number of live entries.
    #[must_use]
    pub fn entry_count(&self) -> usize {
        self.entries.read().unwrap().len()
    }

    /// Read a live entry, cloning its value.
    fn read_value(&self, key: &str) -> Option<Value> {
        let entries = self.entries.read().unwrap();
        entries
            .get(key)
            .filter(|entry| !entry.is_expired(Instant::now()))
            .map(|entry| entry.value.clone())
    }

    /// Run `f` against a live mutable entry, inserting `empty` if the key is
    /// absent or expired.
    fn with_entry<T>(&self, key: &str, empty: Value, f: impl FnOnce(&mut Entry) -> StoreResult<T>) -> StoreResult<T> {
        let mut entries = self.entries.write().unwrap();
        let now = Instant::now();
        let entry = entries.entry(key.to_string()).or_insert_with(|| Entry {
            value: empty.clone(),
            expires_at: None,
        });
        if entry.is_expired(now) {
            entry.value = empty;
            entry.expires_at = None;
        }
        f(entry)
    }
}

fn wrong_type(key: &str, expected: &'static str) -> StoreError {
    StoreError::WrongType {
        key: key.to_string(),
        expected,
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        match self.read_value(key) {
            None => Ok(None),
            Some(Value::Text(text)) => Ok(Some(text)),
            Some(other) => Err(wrong_type(key, other.type_name())),
        }
    }

    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<()> {
        let mut entries = self.entries.write().unwrap();
        entries.insert(
            key.to_string(),
            Entry {
                value: Value::Text(value.to_string()),
                expires_at: Some(Instant::now() + ttl),
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> StoreResult<bool> {
        let mut entries = self.entries.write().unwrap();
        Ok(entries.remove(key).is_some())
    }

    async fn expire(&self, key: &str, ttl: Duration) -> StoreResult<()> {
        let mut entries = self.entries.write().unwrap();
        if let Some(entry) = entries.get_mut(key) {
            if !entry.is_expired(Instant::now()) {
                entry.expires_at = Some(Instant::now() + ttl);
            }
        }
        Ok(())
    }

    async fn hash_get(&self, key: &str, field: &str) -> StoreResult<Option<String>> {
        match self.read_value(key) {
            None => Ok(None),
            Some(Value::Hash(map)) => Ok(map.get(field).cloned()),
            Some(_) => Err(wrong_type(key, "hash")),
        }
    }

    async fn hash_set(&self, key: &str, field: &str, value: &str) -> StoreResult<()> {
        self.with_entry(key, Value::Hash(HashMap::new()), |entry| match &mut entry.value {
            Value::Hash(map) => {
                map.insert(field.to_string(), value.to_string());
                Ok(())
            },
            _ => Err(wrong_type(key, "hash")),
        })
    }

    async fn hash_remove(&self, key: &str, field: &str) -> StoreResult<bool> {
        self.with_entry(key, Value::Hash(HashMap::new()), |entry| match &mut entry.value {
            Value::Hash(map) => Ok(map.remove(field).is_some()),
            _ => Err(wrong_type(key, "hash")),
        })
    }

    async fn hash_entries(&self, key: &str) -> StoreResult<Vec<(String, String)>> {
        match self.read_value(key) {
            None => Ok(Vec::new()),
            Some(Value::Hash(map)) => Ok(map.into_iter().collect()),
            Some(_) => Err(wrong_type(key, "hash")),
        }
    }

    async fn hash_increment(&self, key: &str, field: &str, by: i64) -> StoreResult<i64> {
        self.with_entry(key, Value::Hash(HashMap::new()), |entry| match &mut entry.value {
            Value::Hash(map) => {
                let current = match map.get(field) {
                    None => 0,
                    Some(text) => text.parse::<i64>().map_err(|_| StoreError::NotAnInteger {
                        key: key.to_string(),
                        field: field.to_string(),
                    })?,
                };
                let next = current + by;
                map.insert(field.to_string(), next.to_string());
                Ok(next)
            },
            _ => Err(wrong_type(key, "hash")),
        })
    }

    async fn list_push_front(&self, key: &str, value: &str) -> StoreResult<u64> {
        self.with_entry(key, Value::List(VecDeque::new()), |entry| match &mut entry.value {
            Value::List(list) => {
                list.push_front(value.to_string());
                Ok(list.len() as u64)
            },
            _ => Err(wrong_type(key, "list")),
        })
    }

    async fn list_trim(&self, key: &str, max_len: u64) -> StoreResult<()> {
        self.with_entry(key, Value::List(VecDeque::new()), |entry| match &mut entry.value {
            Value::List(list) => {
                list.truncate(max_len as usize);
                Ok(())
            },
            _ => Err(wrong_type(key, "list")),
        })
    }

    async fn list_range(&self, key: &str, limit: u64) -> StoreResult<Vec<String>> {
        match self.read_value(key) {
            None => Ok(Vec::new()),
            Some(Value::List(list)) => Ok(list.into_iter().take(limit as usize).collect()),
            Some(_) => Err(wrong_type(key, "list")),
        }
    }

    async fn sorted_set_add(&self, key: &str, member: &str, score: f64) -> StoreResult<()> {
        self.with_entry(key, Value::Sorted(HashMap::new()), |entry| match &mut entry.value {
            Value::Sorted(set) => {
                set.insert(member.to_string(), score);
                Ok(())
            },
            _ => Err(wrong_type(key, "sorted set")),
        })
    }

    async fn sorted_set_range_by_score(
        &self,
        key: &str,
        min: f64,
        max: f64,
    ) -> StoreResult<Vec<String>> {
        match self.read_value(key) {
            None => Ok(Vec::new()),
            Some(Value::Sorted(set)) => {
                let mut members: Vec<(String, f64)> = set
                    .into_iter()
                    .filter(|(_, score)| *score >= min && *score <= max)
                    .collect();
                members.sort_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
                Ok(members.into_iter().map(|(member, _)| member).collect())
            },
            Some(_) => Err(wrong_type(key, "sorted set")),
        }
    }

    async fn sorted_set_remove_below(&self, key: &str, cutoff: f64) -> StoreResult<u64> {
        self.with_entry(key, Value::Sorted(HashMap::new()), |entry| match &mut entry.value {
            Value::Sorted(set) => {
                let before = set.len();
                set.retain(|_, score| *score >= cutoff);
                Ok((before - set.len()) as u64)
            },
            _ => Err(wrong_type(key, "sorted set")),
        })
    }

    fn is_healthy(&self) -> bool {
        true
    }
}
