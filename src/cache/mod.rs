//! # Cache Module
//!
//! Bounded LRU cache with optional age expiry.
//!
//! The bot keeps one [`PendingSearchCache`]: the candidate lists produced by
//! the `search` command, keyed by the text channel and the user who asked,
//! waiting for that user to pick one by number.
//!
//! ## Configuration
//!
//! ```env
//! SEARCH_CACHE_SIZE=100       # Maximum pending searches kept
//! SEARCH_TTL_SECS=900         # Age limit in seconds (0 disables)
//! ```

pub mod lru_cache;

use lru_cache::LRUCache;
use serenity::model::id::{ChannelId, UserId};
use tracing::{debug, info};

use crate::sources::Track;

/// Búsquedas pendientes de selección
pub type PendingSearchCache = LRUCache<SearchKey, PendingSearch>;

/// Origen de una búsqueda: canal de texto y usuario
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SearchKey {
    pub channel_id: ChannelId,
    pub user_id: UserId,
}

impl SearchKey {
    pub fn new(channel_id: ChannelId, user_id: UserId) -> Self {
        Self {
            channel_id,
            user_id,
        }
    }
}

/// Candidatos ordenados de una búsqueda, seleccionables desde 1
#[derive(Debug, Clone)]
pub struct PendingSearch {
    pub key: SearchKey,
    pub candidates: Vec<Track>,
}

impl PendingSearch {
    pub fn new(key: SearchKey, candidates: Vec<Track>) -> Self {
        Self { key, candidates }
    }

    /// Candidato para un índice de usuario (1..=N)
    pub fn candidate(&self, index: usize) -> Option<&Track> {
        index.checked_sub(1).and_then(|i| self.candidates.get(i))
    }
}

impl PendingSearchCache {
    /// Guarda la búsqueda bajo su propio origen, reemplazando la anterior
    pub fn insert(&mut self, pending: PendingSearch) {
        self.put(pending.key, pending);
    }

    /// Mantenimiento periódico de búsquedas vencidas
    pub fn cleanup_old_entries(&mut self) {
        let removed = self.cleanup_expired();
        if removed > 0 {
            info!("🧹 Búsquedas pendientes vencidas: {}", removed);
        }

        if !self.is_empty() {
            let metrics = self.metrics();
            debug!(
                "📊 Búsquedas pendientes: {}/{}, aciertos {:.0}%, desalojadas {}",
                self.len(),
                self.capacity(),
                metrics.hit_rate() * 100.0,
                metrics.evictions
            );
        }
    }
}
