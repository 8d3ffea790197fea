//! Resource cache
//!
//! A read-through view over the state store. A cached row is a HIT only while
//! it is live and `now < cache_expires_at`; anything else must be re-verified.

use chrono::{DateTime, Duration, Utc};
use opsflow_config::CacheConfig;
use opsflow_state::{
    ResourceRecord, ResourceScope, StateStore, StoreError, saturating_add, span_from_secs,
};
use std::collections::BTreeMap;

pub const DEFAULT_TTL_SECS: u64 = 3600;

/// Volatile types get short TTLs, structural network types long ones.
const BUILTIN_TTLS: &[(&str, u64)] = &[
    ("*power-state*", 60),
    ("compute/virtual-machine", 300),
    ("compute/virtual-machine-scale-set", 300),
    ("network/virtual-network", 86400),
    ("network/subnet", 86400),
    ("network/network-security-group", 86400),
    ("network/route-table", 86400),
];

/// TTL per resource type
///
/// Exact type match wins, then the longest matching glob pattern, then the default.
#[derive(Debug, Clone)]
pub struct TtlPolicy {
    default_secs: u64,
    exact: BTreeMap<String, u64>,
    patterns: Vec<(glob::Pattern, u64)>,
}

impl Default for TtlPolicy {
    fn default() -> Self {
        let mut policy = Self::empty(DEFAULT_TTL_SECS);
        for (key, secs) in BUILTIN_TTLS {
            policy.set(key, *secs);
        }
        policy
    }
}

impl TtlPolicy {
    /// No rules at all, only the default
    pub fn empty(default_secs: u64) -> Self {
        Self {
            default_secs,
            exact: BTreeMap::new(),
            patterns: Vec::new(),
        }
    }

    /// Built-in rules overlaid with the configured ones
    pub fn from_config(config: &CacheConfig) -> Self {
        let mut policy = Self::default();
        policy.default_secs = config.default_ttl_secs;
        for (key, secs) in &config.ttl {
            policy.set(key, *secs);
        }
        policy
    }

    /// Add or replace a rule; keys containing glob metacharacters are patterns
    pub fn set(&mut self, key: &str, secs: u64) {
        let is_pattern = key.contains(['*', '?', '[']);
        if is_pattern {
            match glob::Pattern::new(key) {
                Ok(pattern) => {
                    self.patterns.retain(|(p, _)| p.as_str() != key);
                    self.patterns.push((pattern, secs));
                }
                Err(e) => tracing::warn!(pattern = key, error = %e, "Ignoring invalid TTL pattern"),
            }
        } else {
            self.exact.insert(key.to_string(), secs);
        }
    }

    pub fn ttl_secs(&self, resource_type: &str) -> u64 {
        if let Some(secs) = self.exact.get(resource_type) {
            return *secs;
        }
        self.patterns
            .iter()
            .filter(|(pattern, _)| pattern.matches(resource_type))
            .max_by_key(|(pattern, _)| pattern.as_str().len())
            .map(|(_, secs)| *secs)
            .unwrap_or(self.default_secs)
    }

    pub fn ttl(&self, resource_type: &str) -> Duration {
        span_from_secs(self.ttl_secs(resource_type))
    }
}

/// Result of a cache lookup
#[derive(Debug, Clone, PartialEq)]
pub enum CacheLookup {
    Hit(ResourceRecord),
    /// Known and live, but past its TTL or invalidated
    Stale(ResourceRecord),
    Miss,
}

impl CacheLookup {
    pub fn is_hit(&self) -> bool {
        matches!(self, CacheLookup::Hit(_))
    }
}

#[derive(Debug, Clone)]
pub struct ResourceCache {
    store: StateStore,
    policy: TtlPolicy,
}

impl ResourceCache {
    pub fn new(store: StateStore, policy: TtlPolicy) -> Self {
        Self { store, policy }
    }

    pub fn store_handle(&self) -> &StateStore {
        &self.store
    }

    pub fn policy(&self) -> &TtlPolicy {
        &self.policy
    }

    pub async fn lookup(
        &self,
        resource_type: &str,
        name: &str,
        scope: &ResourceScope,
    ) -> Result<CacheLookup, StoreError> {
        self.lookup_at(resource_type, name, scope, Utc::now()).await
    }

    pub async fn lookup_at(
        &self,
        resource_type: &str,
        name: &str,
        scope: &ResourceScope,
        now: DateTime<Utc>,
    ) -> Result<CacheLookup, StoreError> {
        let lookup = match self.store.find_resource(resource_type, name, scope).await? {
            Some(record) if record.is_fresh_at(now) => CacheLookup::Hit(record),
            Some(record) => CacheLookup::Stale(record),
            None => CacheLookup::Miss,
        };
        tracing::trace!(resource_type, name, hit = lookup.is_hit(), "Cache lookup");
        Ok(lookup)
    }

    /// Upsert a freshly observed resource and start its TTL
    pub async fn store(&self, resource: ResourceRecord) -> Result<ResourceRecord, StoreError> {
        self.store_at(resource, Utc::now()).await
    }

    pub async fn store_at(
        &self,
        mut resource: ResourceRecord,
        now: DateTime<Utc>,
    ) -> Result<ResourceRecord, StoreError> {
        resource.last_validated_at = Some(now);
        let ttl = self.policy.ttl(&resource.resource_type);
        resource.cache_expires_at = Some(saturating_add(now, ttl));
        self.store.upsert_resource(&resource).await?;
        Ok(resource)
    }

    /// Mark every resource whose type matches `type_pattern` as stale
    pub async fn invalidate(&self, type_pattern: &str, reason: &str) -> Result<u64, StoreError> {
        self.store
            .invalidate_cache(type_pattern, reason, Utc::now())
            .await
    }

    pub async fn purge_expired(&self) -> Result<u64, StoreError> {
        self.store.purge_expired(Utc::now()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ttl_policy_precedence() {
        let mut policy = TtlPolicy::empty(100);
        policy.set("compute/*", 10);
        policy.set("compute/virtual-*", 20);
        policy.set("compute/virtual-machine", 30);

        assert_eq!(policy.ttl_secs("compute/virtual-machine"), 30);
        assert_eq!(policy.ttl_secs("compute/virtual-disk"), 20);
        assert_eq!(policy.ttl_secs("compute/disk"), 10);
        assert_eq!(policy.ttl_secs("storage/account"), 100);
    }

    #[test]
    fn test_builtin_ttls() {
        let policy = TtlPolicy::default();
        assert_eq!(policy.ttl_secs("compute/vm-power-state"), 60);
        assert_eq!(policy.ttl_secs("compute/virtual-machine"), 300);
        assert_eq!(policy.ttl_secs("network/virtual-network"), 86400);
        assert_eq!(policy.ttl_secs("storage/account"), DEFAULT_TTL_SECS);
    }

    #[test]
    fn test_config_overrides_builtins() {
        let config = CacheConfig {
            default_ttl_secs: 600,
            ttl: [
                ("compute/virtual-machine".to_string(), 5),
                ("storage/*".to_string(), 7),
            ]
            .into_iter()
            .collect(),
        };

        let policy = TtlPolicy::from_config(&config);
        assert_eq!(policy.ttl_secs("compute/virtual-machine"), 5);
        assert_eq!(policy.ttl_secs("storage/account"), 7);
        assert_eq!(policy.ttl_secs("identity/user"), 600);
    }

    #[tokio::test]
    async fn test_hit_then_stale() {
        let store = StateStore::in_memory().await.unwrap();
        let mut policy = TtlPolicy::empty(3600);
        policy.set("network/virtual-network", 60);
        let cache = ResourceCache::new(store, policy);
        let scope = ResourceScope::resource_group("rg");
        let now = Utc::now();

        assert_eq!(
            cache.lookup_at("network/virtual-network", "v", &scope, now).await.unwrap(),
            CacheLookup::Miss
        );

        cache
            .store_at(ResourceRecord::new("network/virtual-network", "v", &scope), now)
            .await
            .unwrap();

        for offset in [0, 30, 59] {
            let at = now + Duration::seconds(offset);
            assert!(
                cache.lookup_at("network/virtual-network", "v", &scope, at).await.unwrap().is_hit(),
                "expected hit at +{offset}s"
            );
        }
        for offset in [60, 3600] {
            let at = now + Duration::seconds(offset);
            assert!(matches!(
                cache.lookup_at("network/virtual-network", "v", &scope, at).await.unwrap(),
                CacheLookup::Stale(_)
            ));
        }
    }

    #[tokio::test]
    async fn test_unbounded_ttl_saturates() {
        let config = CacheConfig {
            default_ttl_secs: 600,
            ttl: [("storage/*".to_string(), u64::MAX)].into_iter().collect(),
        };
        let cache = ResourceCache::new(
            StateStore::in_memory().await.unwrap(),
            TtlPolicy::from_config(&config),
        );
        let scope = ResourceScope::resource_group("rg");

        let stored = cache
            .store(ResourceRecord::new("storage/account", "sa", &scope))
            .await
            .unwrap();
        assert_eq!(stored.cache_expires_at, Some(DateTime::<Utc>::MAX_UTC));
        assert!(
            cache
                .lookup_at("storage/account", "sa", &scope, Utc::now() + Duration::days(36500))
                .await
                .unwrap()
                .is_hit()
        );
    }
}
