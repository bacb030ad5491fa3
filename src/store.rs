//! Thread-safe secret map with TTL-based eviction.
//!
//! Deliberately coarse-grained: every operation, including reads, takes
//! the write lock, because `get` and `list` may need to evict expired
//! records as a side effect of the call. Contention is bounded by the
//! small number of connections this agent expects.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::clock::{Clock, Instant};
use crate::error::ErrorKind;
use crate::key::Key;
use crate::secret::Secret;

pub struct Record {
    secret: Secret,
    expires_at: Instant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    Inserted,
    Replaced,
}

struct Inner {
    records: HashMap<Key, Record>,
    capacity: usize,
}

pub struct Store {
    clock: Arc<dyn Clock>,
    inner: RwLock<Inner>,
}

impl Store {
    pub fn new(clock: Arc<dyn Clock>, capacity: usize) -> Self {
        Store {
            clock,
            inner: RwLock::new(Inner {
                records: HashMap::new(),
                capacity,
            }),
        }
    }

    /// Insert or replace a record. `expires_at` must be strictly in the
    /// future. The previous record for an existing key, if any, is
    /// dropped (and thus zeroized) before this returns.
    pub fn put(&self, key: Key, secret: Secret, expires_at: Instant) -> Result<PutOutcome, ErrorKind> {
        let now = self.clock.now();
        if expires_at <= now {
            return Err(ErrorKind::bad_request("expiry must be in the future"));
        }
        let mut inner = self.inner.write().expect("store lock poisoned");
        let existed = inner.records.contains_key(&key);
        if !existed && inner.records.len() >= inner.capacity {
            return Err(ErrorKind::capacity());
        }
        // Insertion replaces (and therefore drops/zeroizes) the old
        // record atomically with respect to the lock: no observer can
        // see a window where the key maps to neither value.
        inner.records.insert(key, Record { secret, expires_at });
        Ok(if existed {
            PutOutcome::Replaced
        } else {
            PutOutcome::Inserted
        })
    }

    /// Fetch a copy of the secret's bytes. Expired records are evicted
    /// as a side effect and reported as `not_found`.
    pub fn get(&self, key: &Key) -> Result<Vec<u8>, ErrorKind> {
        let now = self.clock.now();
        let mut inner = self.inner.write().expect("store lock poisoned");
        match inner.records.get(key) {
            Some(record) if record.expires_at > now => Ok(record.secret.to_vec()),
            Some(_) => {
                inner.records.remove(key);
                Err(ErrorKind::not_found())
            }
            None => Err(ErrorKind::not_found()),
        }
    }

    /// Remaining seconds-to-live for a live key, for the `TTL` request.
    pub fn ttl_remaining(&self, key: &Key) -> Result<u64, ErrorKind> {
        let now = self.clock.now();
        let mut inner = self.inner.write().expect("store lock poisoned");
        match inner.records.get(key) {
            Some(record) if record.expires_at > now => {
                Ok(record.expires_at.duration_since(now).as_secs())
            }
            Some(_) => {
                inner.records.remove(key);
                Err(ErrorKind::not_found())
            }
            None => Err(ErrorKind::not_found()),
        }
    }

    /// Remove a key. Returns `true` iff a live record was present.
    pub fn delete(&self, key: &Key) -> bool {
        let now = self.clock.now();
        let mut inner = self.inner.write().expect("store lock poisoned");
        match inner.records.get(key) {
            Some(record) if record.expires_at > now => {
                inner.records.remove(key);
                true
            }
            Some(_) => {
                // Already effectively gone; clean it up but report absent.
                inner.records.remove(key);
                false
            }
            None => false,
        }
    }

    /// List all live keys with their remaining TTL in seconds. Expired
    /// entries encountered during the walk are evicted. Never returns
    /// secret bytes.
    pub fn list(&self) -> Vec<(Key, u64)> {
        let now = self.clock.now();
        let mut inner = self.inner.write().expect("store lock poisoned");
        let expired: Vec<Key> = inner
            .records
            .iter()
            .filter(|(_, r)| r.expires_at <= now)
            .map(|(k, _)| k.clone())
            .collect();
        for k in expired {
            inner.records.remove(&k);
        }
        inner
            .records
            .iter()
            .map(|(k, r)| (k.clone(), r.expires_at.duration_since(now).as_secs()))
            .collect()
    }

    /// Remove every record whose expiry is at or before `now`. Returns
    /// the number removed. Idempotent: a second call at the same `now`
    /// removes nothing further.
    pub fn sweep_expired(&self, now: Instant) -> usize {
        let mut inner = self.inner.write().expect("store lock poisoned");
        let expired: Vec<Key> = inner
            .records
            .iter()
            .filter(|(_, r)| r.expires_at <= now)
            .map(|(k, _)| k.clone())
            .collect();
        let count = expired.len();
        for k in expired {
            inner.records.remove(&k);
        }
        count
    }

    pub fn len(&self) -> usize {
        self.inner.read().expect("store lock poisoned").records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::test_support::FakeClock;
    use std::time::Duration;

    fn store_with_capacity(cap: usize) -> (Store, Arc<FakeClock>) {
        let clock = Arc::new(FakeClock::new());
        let store = Store::new(clock.clone() as Arc<dyn Clock>, cap);
        (store, clock)
    }

    fn secret(bytes: &[u8]) -> Secret {
        Secret::new(bytes.to_vec()).unwrap()
    }

    #[test]
    fn put_then_get_round_trips() {
        let (store, clock) = store_with_capacity(4);
        let key = Key::parse("k").unwrap();
        let expires = clock.now().checked_add(Duration::from_secs(60)).unwrap();
        assert_eq!(
            store.put(key.clone(), secret(b"v1"), expires).unwrap(),
            PutOutcome::Inserted
        );
        assert_eq!(store.get(&key).unwrap(), b"v1");
    }

    #[test]
    fn replace_reports_replaced_and_updates_value() {
        let (store, clock) = store_with_capacity(4);
        let key = Key::parse("k").unwrap();
        let expires = clock.now().checked_add(Duration::from_secs(60)).unwrap();
        store.put(key.clone(), secret(b"v1"), expires).unwrap();
        let outcome = store.put(key.clone(), secret(b"v2"), expires).unwrap();
        assert_eq!(outcome, PutOutcome::Replaced);
        assert_eq!(store.get(&key).unwrap(), b"v2");
    }

    #[test]
    fn capacity_is_enforced_on_new_keys_only() {
        let (store, clock) = store_with_capacity(2);
        let expires = clock.now().checked_add(Duration::from_secs(60)).unwrap();
        let a = Key::parse("a").unwrap();
        let b = Key::parse("b").unwrap();
        let c = Key::parse("c").unwrap();
        store.put(a.clone(), secret(b"1"), expires).unwrap();
        store.put(b.clone(), secret(b"1"), expires).unwrap();
        assert!(matches!(
            store.put(c.clone(), secret(b"1"), expires),
            Err(ErrorKind::Capacity(_))
        ));
        // Replacing an existing key never counts against capacity.
        assert!(store.put(a.clone(), secret(b"2"), expires).is_ok());
    }

    #[test]
    fn expired_get_returns_not_found_and_evicts() {
        let (store, clock) = store_with_capacity(4);
        let key = Key::parse("tmp").unwrap();
        let expires = clock.now().checked_add(Duration::from_secs(1)).unwrap();
        store.put(key.clone(), secret(b"x"), expires).unwrap();
        clock.advance(Duration::from_millis(1200));
        assert!(matches!(store.get(&key), Err(ErrorKind::NotFound(_))));
        assert_eq!(store.len(), 0);
    }

    #[test]
    fn list_excludes_expired_and_never_returns_secret_bytes() {
        let (store, clock) = store_with_capacity(4);
        let live = Key::parse("live").unwrap();
        let dead = Key::parse("dead").unwrap();
        store
            .put(
                live.clone(),
                secret(b"a"),
                clock.now().checked_add(Duration::from_secs(60)).unwrap(),
            )
            .unwrap();
        store
            .put(
                dead.clone(),
                secret(b"b"),
                clock.now().checked_add(Duration::from_secs(1)).unwrap(),
            )
            .unwrap();
        clock.advance(Duration::from_millis(1200));
        let listed = store.list();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].0, live);
    }

    #[test]
    fn sweep_is_idempotent() {
        let (store, clock) = store_with_capacity(4);
        let key = Key::parse("tmp").unwrap();
        store
            .put(
                key.clone(),
                secret(b"x"),
                clock.now().checked_add(Duration::from_secs(1)).unwrap(),
            )
            .unwrap();
        clock.advance(Duration::from_millis(1200));
        let now = clock.now();
        assert_eq!(store.sweep_expired(now), 1);
        assert_eq!(store.sweep_expired(now), 0);
    }

    #[test]
    fn delete_on_expired_key_reports_false() {
        let (store, clock) = store_with_capacity(4);
        let key = Key::parse("tmp").unwrap();
        store
            .put(
                key.clone(),
                secret(b"x"),
                clock.now().checked_add(Duration::from_secs(1)).unwrap(),
            )
            .unwrap();
        clock.advance(Duration::from_millis(1200));
        assert!(!store.delete(&key));
    }

    #[test]
    fn tie_breaking_same_expiry_still_replaces() {
        let (store, clock) = store_with_capacity(4);
        let key = Key::parse("k").unwrap();
        let expires = clock.now().checked_add(Duration::from_secs(60)).unwrap();
        store.put(key.clone(), secret(b"v1"), expires).unwrap();
        let outcome = store.put(key.clone(), secret(b"v2"), expires).unwrap();
        assert_eq!(outcome, PutOutcome::Replaced);
    }
}
