//! Evaluation caches.
//!
//! Two layers, both optional. The intra-evaluation layer is a value-keyed
//! slot the host installs per call (or shares across calls it considers one
//! session). The inter-query layer is a host-owned TTL cache keyed by
//! projections of the input document, governed by a process-wide config
//! published through [`configure`].

use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex, OnceLock, RwLock};
use std::time::{Duration, SystemTime};

use crate::consts::DEFAULT_EVAL_CACHE_TTL_SECS;
use crate::error::ConfigError;
use crate::value::Value;

/// Value-keyed cache slot used for the intra-evaluation cache and the
/// non-deterministic builtin cache. Reads and writes are internally
/// synchronized so a host may share one slot across evaluations.
#[derive(Debug, Default)]
pub struct ValueCache {
    entries: Mutex<HashMap<Value, Value>>,
}

impl ValueCache {
    /// Fresh empty slot.
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached value for `key`.
    pub fn get(&self, key: &Value) -> Option<Value> {
        self.entries.lock().expect("poisoned").get(key).cloned()
    }

    /// Insert or replace the value for `key`.
    pub fn insert(&self, key: Value, value: Value) {
        self.entries.lock().expect("poisoned").insert(key, value);
    }

    /// Number of cached entries.
    pub fn len(&self) -> usize {
        self.entries.lock().expect("poisoned").len()
    }

    /// True when nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Key of an inter-query cache entry: VM identity, plan index, and the
/// ordered input-field projections.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheKey {
    /// Identity of the VM instance that built the key.
    pub vm: u64,
    /// Plan index inside the executable.
    pub plan: u32,
    /// Projected input values, in config order. Missing paths hold the
    /// empty-set sentinel, which no legal input projection can produce.
    pub projections: Vec<Value>,
}

impl Hash for CacheKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.vm.hash(state);
        self.plan.hash(state);
        for p in &self.projections {
            p.hash(state);
        }
    }
}

/// An inter-query cache entry with its expiry stamp.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// Cached result in native tree form.
    pub value: serde_json::Value,
    /// Wall-clock instant past which the entry is a miss.
    pub expires: SystemTime,
}

impl CacheEntry {
    /// Approximate heap footprint, for host eviction policies.
    pub fn size_bytes(&self) -> usize {
        // Cheap structural estimate; hosts needing exact accounting keep
        // their own.
        fn walk(v: &serde_json::Value) -> usize {
            match v {
                serde_json::Value::String(s) => 16 + s.len(),
                serde_json::Value::Array(a) => 16 + a.iter().map(walk).sum::<usize>(),
                serde_json::Value::Object(o) => {
                    16 + o.iter().map(|(k, v)| k.len() + walk(v)).sum::<usize>()
                }
                _ => 16,
            }
        }
        walk(&self.value)
    }
}

/// Host-owned inter-query cache. Implementations synchronize internally.
pub trait InterQueryCache: Send + Sync {
    /// Entry for `key`, expired or not; the VM applies the TTL check.
    fn get(&self, key: &CacheKey) -> Option<CacheEntry>;

    /// Insert or replace the entry for `key`.
    fn insert(&self, key: CacheKey, entry: CacheEntry);
}

/// In-memory [`InterQueryCache`] for tests and simple hosts.
#[derive(Debug, Default)]
pub struct MemoryInterQueryCache {
    entries: Mutex<HashMap<CacheKey, CacheEntry>>,
}

impl MemoryInterQueryCache {
    /// Fresh empty cache.
    pub fn new() -> Self {
        Self::default()
    }
}

impl InterQueryCache for MemoryInterQueryCache {
    fn get(&self, key: &CacheKey) -> Option<CacheEntry> {
        self.entries.lock().expect("poisoned").get(key).cloned()
    }

    fn insert(&self, key: CacheKey, entry: CacheEntry) {
        self.entries.lock().expect("poisoned").insert(key, entry);
    }
}

/// Inter-query caching configuration, published process-wide.
#[derive(Debug, Clone, PartialEq)]
pub struct EvalCacheConfig {
    /// Master switch.
    pub enabled: bool,
    /// Dotted paths into the input document, pre-split.
    pub input_paths: Vec<Vec<Arc<str>>>,
    /// Entry lifetime.
    pub ttl: Duration,
}

impl Default for EvalCacheConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            input_paths: Vec::new(),
            ttl: Duration::from_secs(DEFAULT_EVAL_CACHE_TTL_SECS),
        }
    }
}

static CONFIG: OnceLock<RwLock<Arc<EvalCacheConfig>>> = OnceLock::new();

fn config_cell() -> &'static RwLock<Arc<EvalCacheConfig>> {
    CONFIG.get_or_init(|| RwLock::new(Arc::new(EvalCacheConfig::default())))
}

/// Currently published config. Hot paths take one read-acquire.
pub fn current_config() -> Arc<EvalCacheConfig> {
    config_cell().read().expect("poisoned").clone()
}

/// Parse and publish a config document. The document carries an
/// `eval_cache` sub-object; an absent sub-object publishes the disabled
/// default. Invalid paths or an unparseable TTL reject the whole document
/// and leave the previous config in place.
pub fn configure(doc: &serde_json::Value) -> Result<(), ConfigError> {
    let parsed = parse_config(doc)?;
    *config_cell().write().expect("poisoned") = Arc::new(parsed);
    Ok(())
}

fn parse_config(doc: &serde_json::Value) -> Result<EvalCacheConfig, ConfigError> {
    let Some(section) = doc.get("eval_cache") else {
        return Ok(EvalCacheConfig::default());
    };
    let obj = section
        .as_object()
        .ok_or_else(|| ConfigError::Malformed("eval_cache must be an object".into()))?;

    let enabled = match obj.get("enabled") {
        None => false,
        Some(serde_json::Value::Bool(b)) => *b,
        Some(_) => return Err(ConfigError::Malformed("enabled must be a boolean".into())),
    };

    let mut input_paths = Vec::new();
    if let Some(paths) = obj.get("input_paths") {
        let list = paths
            .as_array()
            .ok_or_else(|| ConfigError::Malformed("input_paths must be an array".into()))?;
        for p in list {
            let s = p.as_str().ok_or_else(|| {
                ConfigError::Malformed("input_paths entries must be strings".into())
            })?;
            if s.is_empty() || s.split('.').any(str::is_empty) {
                return Err(ConfigError::InvalidInputPath(s.to_string()));
            }
            input_paths.push(s.split('.').map(Arc::from).collect());
        }
    }

    let ttl = match obj.get("ttl") {
        None => Duration::from_secs(DEFAULT_EVAL_CACHE_TTL_SECS),
        Some(serde_json::Value::String(s)) => {
            parse_duration(s).ok_or_else(|| ConfigError::InvalidTtl(s.clone()))?
        }
        Some(other) => return Err(ConfigError::InvalidTtl(other.to_string())),
    };

    Ok(EvalCacheConfig {
        enabled,
        input_paths,
        ttl,
    })
}

/// Build the cache key for one evaluation: projected input values in config
/// order, with the empty-set sentinel standing in for missing or
/// non-traversable paths.
pub fn build_key(
    vm: u64,
    plan: u32,
    input: &Value,
    config: &EvalCacheConfig,
) -> CacheKey {
    let projections = config
        .input_paths
        .iter()
        .map(|path| project(input, path).unwrap_or_else(Value::new_set))
        .collect();
    CacheKey {
        vm,
        plan,
        projections,
    }
}

fn project(input: &Value, path: &[Arc<str>]) -> Option<Value> {
    let mut current = input.clone();
    for seg in path {
        let key = Value::String(seg.clone());
        current = current.get_key(&key).ok().flatten()?;
    }
    Some(current)
}

/// Parse a duration string of the form `1h30m`, `90s`, `1.5s`, `250ms`.
/// Units: `ns`, `us`/`µs`, `ms`, `s`, `m`, `h`. Returns `None` on anything
/// else.
pub fn parse_duration(s: &str) -> Option<Duration> {
    if s.is_empty() {
        return None;
    }
    let mut total = Duration::ZERO;
    let mut rest = s;
    while !rest.is_empty() {
        let digits_end = rest
            .find(|c: char| !c.is_ascii_digit() && c != '.')
            .unwrap_or(rest.len());
        if digits_end == 0 {
            return None;
        }
        let number: f64 = rest[..digits_end].parse().ok()?;
        rest = &rest[digits_end..];
        let (scale, unit_len) = if rest.starts_with("ns") {
            (1e-9, 2)
        } else if rest.starts_with("us") {
            (1e-6, 2)
        } else if rest.starts_with("µs") {
            (1e-6, "µs".len())
        } else if rest.starts_with("ms") {
            (1e-3, 2)
        } else if rest.starts_with('s') {
            (1.0, 1)
        } else if rest.starts_with('m') {
            (60.0, 1)
        } else if rest.starts_with('h') {
            (3600.0, 1)
        } else {
            return None;
        };
        rest = &rest[unit_len..];
        total += Duration::from_secs_f64(number * scale);
    }
    Some(total)
}
