use lru::LruCache;
use std::{
    hash::Hash,
    num::NonZeroUsize,
    time::{Duration, Instant},
};
use tracing::debug;

/// Entrada del cache con su instante de creación
#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    created_at: Instant,
}

impl<V> CacheEntry<V> {
    fn new(value: V) -> Self {
        Self {
            value,
            created_at: Instant::now(),
        }
    }

    fn is_expired(&self, ttl: Option<Duration>) -> bool {
        ttl.is_some_and(|ttl| self.created_at.elapsed() > ttl)
    }
}

/// Cache LRU acotado con expiración opcional por edad
#[derive(Debug)]
pub struct LRUCache<K: Hash + Eq, V> {
    data: LruCache<K, CacheEntry<V>>,
    ttl: Option<Duration>,
    metrics: CacheMetrics,
}

impl<K, V> LRUCache<K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    pub fn new(capacity: usize) -> Self {
        Self::with_ttl(capacity, None)
    }

    /// `ttl` en `None` desactiva la expiración por edad
    pub fn with_ttl(capacity: usize, ttl: Option<Duration>) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            data: LruCache::new(capacity),
            ttl,
            metrics: CacheMetrics::default(),
        }
    }

    /// Inserta o reemplaza; si el cache está lleno desaloja el menos usado
    pub fn put(&mut self, key: K, value: V) {
        if let Some((evicted, _)) = self.data.push(key.clone(), CacheEntry::new(value)) {
            if evicted != key {
                self.metrics.evictions += 1;
                debug!("Cache lleno, entrada desalojada");
            }
        }
    }

    /// Obtiene una copia del valor y lo marca como usado recientemente
    pub fn get(&mut self, key: &K) -> Option<V> {
        let expired = match self.data.get(key) {
            Some(entry) if !entry.is_expired(self.ttl) => {
                self.metrics.hits += 1;
                return Some(entry.value.clone());
            }
            Some(_) => true,
            None => false,
        };

        if expired {
            self.data.pop(key);
            self.metrics.expired_removals += 1;
        }
        self.metrics.misses += 1;
        None
    }

    pub fn delete(&mut self, key: &K) -> Option<V> {
        self.data.pop(key).map(|entry| entry.value)
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.data.cap().get()
    }

    /// Limpia entradas expiradas y retorna el número de elementos removidos
    pub fn cleanup_expired(&mut self) -> usize {
        let ttl = self.ttl;
        let expired: Vec<K> = self
            .data
            .iter()
            .filter(|(_, entry)| entry.is_expired(ttl))
            .map(|(key, _)| key.clone())
            .collect();

        for key in &expired {
            self.data.pop(key);
        }

        let removed = expired.len();
        self.metrics.expired_removals += removed as u64;
        if removed > 0 {
            debug!("Limpiadas {} entradas expiradas del cache", removed);
        }
        removed
    }

    pub fn metrics(&self) -> CacheMetrics {
        self.metrics.clone()
    }
}

/// Métricas básicas del cache
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheMetrics {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub expired_removals: u64,
}

impl CacheMetrics {
    pub fn hit_rate(&self) -> f64 {
        if self.hits + self.misses == 0 {
            0.0
        } else {
            self.hits as f64 / (self.hits + self.misses) as f64
        }
    }
}
