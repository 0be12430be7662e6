//! Size estimation strategies for tracked items.
//!
//! A pluggable byte-size estimator: a fixed constant, a host-supplied
//! callback, a JSON-serialized-length measurement with an optional
//! bounded cache, or a composite that scales/offsets a delegate.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;

/// Estimates the in-memory size, in bytes, of a value of type `T`.
pub trait SizeEstimator<T>: Send + Sync {
    /// Estimate the byte size of `value`.
    fn estimate(&self, value: &T) -> u64;
}

/// Every item has the same fixed size.
pub struct FixedSize(pub u64);

impl<T> SizeEstimator<T> for FixedSize {
    fn estimate(&self, _value: &T) -> u64 {
        self.0
    }
}

/// Delegate to an arbitrary closure.
pub struct CallbackSize<T> {
    f: Box<dyn Fn(&T) -> u64 + Send + Sync>,
}

impl<T> CallbackSize<T> {
    /// Wrap a sizing closure.
    pub fn new(f: impl Fn(&T) -> u64 + Send + Sync + 'static) -> Self {
        Self { f: Box::new(f) }
    }
}

impl<T> SizeEstimator<T> for CallbackSize<T> {
    fn estimate(&self, value: &T) -> u64 {
        (self.f)(value)
    }
}

/// Serialize to JSON and use the encoded byte length, with an optional
/// bounded cache of estimates keyed by an externally-supplied key (e.g. an
/// entity id) to avoid re-serializing unchanged values. The cache evicts
/// the oldest-inserted key once it exceeds `capacity`.
pub struct JsonSize<T: serde::Serialize> {
    cache: Option<Mutex<JsonSizeCache>>,
    _marker: std::marker::PhantomData<T>,
}

struct JsonSizeCache {
    capacity: usize,
    order: VecDeque<String>,
    values: std::collections::HashMap<String, u64>,
}

impl<T: serde::Serialize> JsonSize<T> {
    /// No bounded cache; every call re-serializes.
    pub fn new() -> Self {
        Self {
            cache: None,
            _marker: std::marker::PhantomData,
        }
    }

    /// Bound the estimate cache to `capacity` keys, evicting the oldest
    /// insertion once exceeded.
    pub fn with_cache(capacity: usize) -> Self {
        Self {
            cache: Some(Mutex::new(JsonSizeCache {
                capacity,
                order: VecDeque::new(),
                values: std::collections::HashMap::new(),
            })),
            _marker: std::marker::PhantomData,
        }
    }

    /// Estimate using a cache key, consulting/populating the bounded cache
    /// if one is configured.
    pub fn estimate_keyed(&self, key: &str, value: &T) -> u64 {
        match &self.cache {
            None => json_len(value),
            Some(cache) => {
                let mut cache = cache.lock();
                if let Some(size) = cache.values.get(key) {
                    return *size;
                }
                let size = json_len(value);
                if cache.values.len() >= cache.capacity {
                    if let Some(oldest) = cache.order.pop_front() {
                        cache.values.remove(&oldest);
                    }
                }
                cache.order.push_back(key.to_string());
                cache.values.insert(key.to_string(), size);
                size
            }
        }
    }
}

fn json_len<T: serde::Serialize>(value: &T) -> u64 {
    serde_json::to_vec(value).map(|bytes| bytes.len() as u64).unwrap_or(0)
}

impl<T: serde::Serialize> Default for JsonSize<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: serde::Serialize + Send + Sync> SizeEstimator<T> for JsonSize<T> {
    fn estimate(&self, value: &T) -> u64 {
        json_len(value)
    }
}

/// `⌈delegate · multiplier⌉ + overhead`, layering a correction factor over
/// another estimator.
pub struct CompositeSize<T> {
    delegate: Arc<dyn SizeEstimator<T>>,
    overhead: u64,
    multiplier: f64,
}

impl<T> CompositeSize<T> {
    /// Wrap `delegate` with an additive `overhead` and multiplicative
    /// `multiplier`.
    pub fn new(delegate: Arc<dyn SizeEstimator<T>>, overhead: u64, multiplier: f64) -> Self {
        Self {
            delegate,
            overhead,
            multiplier,
        }
    }
}

impl<T> SizeEstimator<T> for CompositeSize<T> {
    fn estimate(&self, value: &T) -> u64 {
        let base = self.delegate.estimate(value) as f64 * self.multiplier;
        base.ceil() as u64 + self.overhead
    }
}
