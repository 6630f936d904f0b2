use serenity::model::id::{ChannelId, GuildId, UserId};
use std::{
    collections::HashMap,
    sync::{Arc, Weak},
    time::Duration,
};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::{
    error::MusicError,
    pipeline::PlaybackContext,
    queue::Queue,
    voice::{VoiceHandle, VoiceProvider},
};
use crate::{
    cache::{PendingSearch, PendingSearchCache, SearchKey},
    sources::Track,
};

const ENQUEUE_ATTEMPTS: usize = 3;
const SEARCH_CLEANUP_INTERVAL: Duration = Duration::from_secs(60);

/// Ajustes del servicio tomados de la configuración
#[derive(Debug, Clone, Copy)]
pub struct ServiceSettings {
    pub max_search_results: usize,
    pub search_cache_size: usize,
    /// `None` desactiva la expiración por edad
    pub search_ttl: Option<Duration>,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            max_search_results: 9,
            search_cache_size: 100,
            search_ttl: Some(Duration::from_secs(900)),
        }
    }
}

/// Track encolado y su posición en `Queue::tracks()` (0 = sonando)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Enqueued {
    pub track: Track,
    pub position: usize,
}

/// Resultado de elegir un candidato de una búsqueda
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Choice {
    Cancelled,
    Enqueued(Enqueued),
}

/// Cambio de estado de voz reportado por la plataforma
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VoiceStateChange {
    pub guild_id: GuildId,
    pub user_id: UserId,
    pub old_channel: Option<ChannelId>,
    pub new_channel: Option<ChannelId>,
}

struct Registry {
    queues: HashMap<GuildId, Arc<Queue>>,
    searches: PendingSearchCache,
}

struct ServiceInner {
    voice: Arc<dyn VoiceProvider>,
    playback: Arc<PlaybackContext>,
    registry: parking_lot::Mutex<Registry>,
    drained: mpsc::UnboundedSender<GuildId>,
    settings: ServiceSettings,
}

/// Registro de colas por guild y búsquedas pendientes.
///
/// El lock del registro nunca se mantiene a través de un `await`, así que
/// nunca se toma el lock de una cola mientras se tiene el del registro.
#[derive(Clone)]
pub struct MusicService {
    inner: Arc<ServiceInner>,
}

impl MusicService {
    pub fn new(
        voice: Arc<dyn VoiceProvider>,
        playback: Arc<PlaybackContext>,
        settings: ServiceSettings,
    ) -> Self {
        let (drained, rx) = mpsc::unbounded_channel();
        let inner = Arc::new(ServiceInner {
            voice,
            playback,
            registry: parking_lot::Mutex::new(Registry {
                queues: HashMap::new(),
                searches: PendingSearchCache::with_ttl(
                    settings.search_cache_size,
                    settings.search_ttl,
                ),
            }),
            drained,
            settings,
        });

        tokio::spawn(janitor(Arc::downgrade(&inner), rx));
        Self { inner }
    }

    async fn join(&self, guild_id: GuildId, channel_id: ChannelId) -> Result<Arc<dyn VoiceHandle>, MusicError> {
        self.inner
            .voice
            .join_or_get(guild_id, channel_id)
            .await
            .map_err(|e| {
                warn!("🔇 No se pudo unir al canal {} en {}: {}", channel_id, guild_id, e);
                MusicError::VoiceJoin(e)
            })
    }

    /// Cola de la guild del transporte; la crea o la re-vincula si sigue viva
    pub async fn get_or_create_queue(&self, voice: Arc<dyn VoiceHandle>) -> Arc<Queue> {
        let guild_id = voice.guild_id();
        let existing = self.inner.registry.lock().queues.get(&guild_id).cloned();

        if let Some(queue) = &existing {
            if queue.rebind(voice.clone()).await {
                return queue.clone();
            }
        }

        let fresh = Queue::new(
            voice,
            self.inner.playback.clone(),
            self.inner.drained.clone(),
        );

        let mut registry = self.inner.registry.lock();
        match registry.queues.get(&guild_id) {
            // Otro comando creó una cola mientras tanto
            Some(current)
                if existing
                    .as_ref()
                    .map_or(true, |old| !Arc::ptr_eq(old, current)) =>
            {
                current.clone()
            }
            _ => {
                registry.queues.insert(guild_id, fresh.clone());
                fresh
            }
        }
    }

    /// Cola de la guild, o `None` si no existe o estaba inerte (en ese caso
    /// se retira, se quita del registro y se libera su transporte).
    pub async fn get_queue(&self, guild_id: GuildId) -> Option<Arc<Queue>> {
        let queue = self.inner.registry.lock().queues.get(&guild_id).cloned()?;

        if queue.retire_if_inert().await {
            self.remove_entry(guild_id, &queue);
            queue.stop().await;
            debug!("🧹 Cola inerte de guild {} eliminada", guild_id);
            return None;
        }
        Some(queue)
    }

    /// Detiene y elimina la cola de la guild. Idempotente.
    pub async fn delete_queue(&self, guild_id: GuildId) {
        let removed = self.inner.registry.lock().queues.remove(&guild_id);
        if let Some(queue) = removed {
            queue.stop().await;
            info!("🗑️ Cola de guild {} eliminada", guild_id);
        }
    }

    fn remove_entry(&self, guild_id: GuildId, queue: &Arc<Queue>) {
        let mut registry = self.inner.registry.lock();
        if registry
            .queues
            .get(&guild_id)
            .is_some_and(|current| Arc::ptr_eq(current, queue))
        {
            registry.queues.remove(&guild_id);
        }
    }

    /// Busca `query` y encola el mejor resultado en el canal de voz
    pub async fn play_to_vc(
        &self,
        query: &str,
        channel_id: ChannelId,
        guild_id: GuildId,
    ) -> Result<Enqueued, MusicError> {
        let voice = self.join(guild_id, channel_id).await?;
        let queue = self.get_or_create_queue(voice).await;

        let found = self
            .inner
            .playback
            .provider
            .search_tracks(query, 1)
            .await
            .map_err(MusicError::Search)
            .and_then(|tracks| tracks.into_iter().next().ok_or(MusicError::NoResults));

        let track = match found {
            Ok(track) => track,
            Err(e) => {
                if queue.is_inert().await {
                    self.get_queue(guild_id).await;
                }
                return Err(e);
            }
        };

        self.enqueue(guild_id, channel_id, track).await
    }

    async fn enqueue(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
        track: Track,
    ) -> Result<Enqueued, MusicError> {
        for attempt in 1..=ENQUEUE_ATTEMPTS {
            let voice = self.join(guild_id, channel_id).await?;
            let queue = self.get_or_create_queue(voice).await;

            match queue.add_track(track.clone()).await {
                Ok(position) => return Ok(Enqueued { track, position }),
                Err(MusicError::QueueRetired) => {
                    debug!(
                        "🔄 Cola de guild {} retirada, reintentando ({}/{})",
                        guild_id, attempt, ENQUEUE_ATTEMPTS
                    );
                }
                Err(e) => return Err(e),
            }
        }
        Err(MusicError::QueueRetired)
    }

    /// Busca candidatos y los guarda para que el usuario elija uno
    pub async fn search(&self, query: &str, key: SearchKey) -> Result<Vec<Track>, MusicError> {
        let candidates = self
            .inner
            .playback
            .provider
            .search_tracks(query, self.inner.settings.max_search_results)
            .await
            .map_err(MusicError::Search)?;

        if candidates.is_empty() {
            return Err(MusicError::NoResults);
        }

        self.inner
            .registry
            .lock()
            .searches
            .insert(PendingSearch::new(key, candidates.clone()));
        Ok(candidates)
    }

    /// ¿Hay una búsqueda esperando selección para esta clave?
    pub fn has_pending_search(&self, key: &SearchKey) -> bool {
        self.inner.registry.lock().searches.get(key).is_some()
    }

    /// Resuelve la elección `index` (0 cancela) de la búsqueda pendiente
    pub async fn choose_track(
        &self,
        key: SearchKey,
        index: usize,
        guild_id: GuildId,
        voice_channel: ChannelId,
    ) -> Result<Choice, MusicError> {
        let track = {
            let mut registry = self.inner.registry.lock();
            let pending = registry
                .searches
                .get(&key)
                .ok_or(MusicError::ExpiredSelection)?;

            if index == 0 {
                registry.searches.delete(&key);
                return Ok(Choice::Cancelled);
            }

            let track = pending
                .candidate(index)
                .cloned()
                .ok_or(MusicError::ChoiceOutOfRange(pending.candidates.len()))?;
            registry.searches.delete(&key);
            track
        };

        self.enqueue(guild_id, voice_channel, track)
            .await
            .map(Choice::Enqueued)
    }

    pub async fn lyrics(&self, track: &Track) -> Result<String, MusicError> {
        self.inner
            .playback
            .provider
            .fetch_lyrics(track)
            .await
            .map_err(MusicError::Lyrics)
    }

    /// Reconcilia una desconexión forzada del bot. Devuelve si hubo teardown.
    pub async fn handle_voice_state_update(&self, change: VoiceStateChange, bot_user: UserId) -> bool {
        if change.user_id != bot_user || change.new_channel.is_some() {
            return false;
        }
        let Some(old_channel) = change.old_channel else {
            return false;
        };

        let queue = self
            .inner
            .registry
            .lock()
            .queues
            .get(&change.guild_id)
            .cloned();
        let Some(queue) = queue else {
            return false;
        };

        if queue.now_playing().await.is_none() || queue.voice_channel_id().await != old_channel {
            return false;
        }

        info!(
            "🔌 Bot desconectado del canal {} en guild {}, deteniendo",
            old_channel, change.guild_id
        );
        self.remove_entry(change.guild_id, &queue);
        queue.stop().await;
        true
    }
}

async fn janitor(service: Weak<ServiceInner>, mut drained: mpsc::UnboundedReceiver<GuildId>) {
    let mut cleanup = tokio::time::interval(SEARCH_CLEANUP_INTERVAL);
    cleanup.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            guild = drained.recv() => {
                let Some(guild_id) = guild else { break };
                let Some(inner) = service.upgrade() else { break };
                MusicService { inner }.get_queue(guild_id).await;
            }
            _ = cleanup.tick() => {
                let Some(inner) = service.upgrade() else { break };
                inner.registry.lock().searches.cleanup_old_entries();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        audio::{
            pipeline::PipelineConfig,
            voice::MockVoiceProvider,
        },
        sources::{MockTrackProvider, ProviderError, TrackStream},
        testing::{playback, track, wait_for, wait_until, FakeProvider, FakeTranscoder, FakeVoice},
    };
    use pretty_assertions::assert_eq;

    const GUILD: u64 = 1;
    const VC: u64 = 10;
    const BOT: u64 = 99;

    fn guild() -> GuildId {
        GuildId::new(GUILD)
    }

    fn vc() -> ChannelId {
        ChannelId::new(VC)
    }

    fn bot() -> UserId {
        UserId::new(BOT)
    }

    struct Fixture {
        service: MusicService,
        voice: FakeVoice,
        provider: FakeProvider,
        transcoder: FakeTranscoder,
    }

    fn fixture_with(provider: FakeProvider, transcoder: FakeTranscoder, settings: ServiceSettings) -> Fixture {
        let voice = FakeVoice::new();
        let service = MusicService::new(
            Arc::new(voice.clone()),
            playback(provider.clone(), transcoder.clone()),
            settings,
        );
        Fixture {
            service,
            voice,
            provider,
            transcoder,
        }
    }

    fn fixture(transcoder: FakeTranscoder) -> Fixture {
        fixture_with(
            FakeProvider::with_results(vec![track("a"), track("b"), track("c")]),
            transcoder,
            ServiceSettings::default(),
        )
    }

    fn key(user: u64) -> SearchKey {
        SearchKey::new(ChannelId::new(500), UserId::new(user))
    }

    fn registered(service: &MusicService) -> usize {
        service.inner.registry.lock().queues.len()
    }

    fn bot_left(old_channel: ChannelId) -> VoiceStateChange {
        VoiceStateChange {
            guild_id: guild(),
            user_id: bot(),
            old_channel: Some(old_channel),
            new_channel: None,
        }
    }

    #[tokio::test]
    async fn play_enqueues_top_match() {
        let f = fixture(FakeTranscoder::endless());

        let enqueued = f.service.play_to_vc("song", vc(), guild()).await.expect("played");

        assert_eq!(enqueued, Enqueued { track: track("a"), position: 0 });
        let queue = f.service.get_queue(guild()).await.expect("queue");
        assert_eq!(queue.tracks().await, vec![track("a")]);
        assert!(wait_for(|| queue.is_playing()).await);
    }

    #[tokio::test]
    async fn second_play_queues_behind_current() {
        let f = fixture(FakeTranscoder::endless());
        f.service.play_to_vc("one", vc(), guild()).await.expect("played");

        let enqueued = f.service.play_to_vc("two", vc(), guild()).await.expect("played");

        assert_eq!(enqueued.position, 1);
        assert_eq!(registered(&f.service), 1);
    }

    #[tokio::test]
    async fn join_failure_creates_no_queue() {
        let mut voice = MockVoiceProvider::new();
        voice
            .expect_join_or_get()
            .returning(|_, _| Err(crate::audio::error::VoiceError::Join("sin permisos".into())));
        let service = MusicService::new(
            Arc::new(voice),
            playback(FakeProvider::default(), FakeTranscoder::endless()),
            ServiceSettings::default(),
        );

        let result = service.play_to_vc("song", vc(), guild()).await;

        assert!(matches!(result, Err(MusicError::VoiceJoin(_))));
        assert_eq!(registered(&service), 0);
    }

    #[tokio::test]
    async fn failed_search_on_idle_guild_releases_voice() {
        let mut provider = MockTrackProvider::new();
        provider
            .expect_search_tracks()
            .returning(|_, _| Err(ProviderError::Command("rate limited".into())));
        let voice = FakeVoice::new();
        let service = MusicService::new(
            Arc::new(voice.clone()),
            Arc::new(PlaybackContext {
                provider: Arc::new(provider),
                transcoder: Arc::new(FakeTranscoder::endless()),
                config: PipelineConfig::default(),
            }),
            ServiceSettings::default(),
        );

        let result = service.play_to_vc("song", vc(), guild()).await;

        assert!(matches!(result, Err(MusicError::Search(_))));
        assert_eq!(voice.disconnects(), 1);
        assert!(service.get_queue(guild()).await.is_none());
    }

    #[tokio::test]
    async fn empty_search_leaves_playing_queue_alone() {
        let calls = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let mut provider = MockTrackProvider::new();
        let counter = calls.clone();
        provider.expect_search_tracks().returning(move |_, _| {
            match counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst) {
                0 => Ok(vec![track("a")]),
                _ => Ok(Vec::new()),
            }
        });
        provider
            .expect_fetch_track_bytes()
            .returning(|_, _| Ok(TrackStream::from_start(Box::pin(futures::stream::empty()))));
        let voice = FakeVoice::new();
        let service = MusicService::new(
            Arc::new(voice.clone()),
            Arc::new(PlaybackContext {
                provider: Arc::new(provider),
                transcoder: Arc::new(FakeTranscoder::endless()),
                config: PipelineConfig::default(),
            }),
            ServiceSettings::default(),
        );
        service.play_to_vc("song", vc(), guild()).await.expect("played");

        let result = service.play_to_vc("nada", vc(), guild()).await;

        assert!(matches!(result, Err(MusicError::NoResults)));
        assert_eq!(voice.disconnects(), 0);
        let queue = service.get_queue(guild()).await.expect("queue");
        assert_eq!(queue.tracks().await, vec![track("a")]);
    }

    #[tokio::test]
    async fn search_then_choose_enqueues_and_evicts() {
        let f = fixture(FakeTranscoder::endless());

        let candidates = f.service.search("song", key(1)).await.expect("results");
        assert_eq!(candidates.len(), 3);
        assert!(f.service.has_pending_search(&key(1)));

        let choice = f.service.choose_track(key(1), 2, guild(), vc()).await.expect("chosen");

        assert_eq!(
            choice,
            Choice::Enqueued(Enqueued {
                track: track("b"),
                position: 0
            })
        );
        assert!(!f.service.has_pending_search(&key(1)));
        assert!(matches!(
            f.service.choose_track(key(1), 1, guild(), vc()).await,
            Err(MusicError::ExpiredSelection)
        ));
    }

    #[tokio::test]
    async fn choose_zero_cancels_without_enqueue() {
        let f = fixture(FakeTranscoder::endless());
        f.service.search("song", key(1)).await.expect("results");

        let choice = f.service.choose_track(key(1), 0, guild(), vc()).await.expect("cancelled");

        assert_eq!(choice, Choice::Cancelled);
        assert!(!f.service.has_pending_search(&key(1)));
        assert!(f.provider.fetched().is_empty());
        assert_eq!(f.voice.joins(), 0);
    }

    #[tokio::test]
    async fn out_of_range_choice_keeps_pending_search() {
        let f = fixture(FakeTranscoder::endless());
        f.service.search("song", key(1)).await.expect("results");

        assert!(matches!(
            f.service.choose_track(key(1), 7, guild(), vc()).await,
            Err(MusicError::ChoiceOutOfRange(3))
        ));
        assert!(f.service.has_pending_search(&key(1)));
    }

    #[tokio::test]
    async fn pending_searches_are_lru_bounded() {
        let f = fixture_with(
            FakeProvider::with_results(vec![track("a")]),
            FakeTranscoder::endless(),
            ServiceSettings {
                search_cache_size: 2,
                ..ServiceSettings::default()
            },
        );

        for user in 1..=3 {
            f.service.search("song", key(user)).await.expect("results");
        }

        assert!(matches!(
            f.service.choose_track(key(1), 1, guild(), vc()).await,
            Err(MusicError::ExpiredSelection)
        ));
        assert!(f.service.has_pending_search(&key(2)));
        assert!(f.service.has_pending_search(&key(3)));
    }

    #[tokio::test]
    async fn forced_disconnect_tears_down_queue() {
        let f = fixture(FakeTranscoder::endless());
        f.service.play_to_vc("song", vc(), guild()).await.expect("played");

        let torn_down = f.service.handle_voice_state_update(bot_left(vc()), bot()).await;

        assert!(torn_down);
        assert!(f.service.get_queue(guild()).await.is_none());
        assert_eq!(f.transcoder.alive(), 0);
        assert_eq!(f.voice.disconnects(), 1);
    }

    #[tokio::test]
    async fn unrelated_voice_updates_are_ignored() {
        let f = fixture(FakeTranscoder::endless());
        f.service.play_to_vc("song", vc(), guild()).await.expect("played");

        let other_user = VoiceStateChange {
            user_id: UserId::new(5),
            ..bot_left(vc())
        };
        let other_channel = bot_left(ChannelId::new(77));
        let moved = VoiceStateChange {
            new_channel: Some(ChannelId::new(11)),
            ..bot_left(vc())
        };

        assert!(!f.service.handle_voice_state_update(other_user, bot()).await);
        assert!(!f.service.handle_voice_state_update(other_channel, bot()).await);
        assert!(!f.service.handle_voice_state_update(moved, bot()).await);
        assert!(f.service.get_queue(guild()).await.is_some());
    }

    #[tokio::test]
    async fn delete_queue_is_idempotent() {
        let f = fixture(FakeTranscoder::endless());
        f.service.play_to_vc("song", vc(), guild()).await.expect("played");

        f.service.delete_queue(guild()).await;
        f.service.delete_queue(guild()).await;

        assert_eq!(registered(&f.service), 0);
        assert_eq!(f.voice.disconnects(), 1);
        assert_eq!(f.transcoder.alive(), 0);
    }

    #[tokio::test]
    async fn get_queue_prunes_inert_queue() {
        let f = fixture(FakeTranscoder::endless());
        let voice = f.voice.handle();
        f.service.get_or_create_queue(voice).await;

        assert!(f.service.get_queue(guild()).await.is_none());
        assert_eq!(registered(&f.service), 0);
        assert_eq!(f.voice.disconnects(), 1);
    }

    #[tokio::test]
    async fn retired_queue_is_replaced_on_play() {
        let f = fixture(FakeTranscoder::endless());
        let old = f.service.get_or_create_queue(f.voice.handle()).await;
        assert!(old.retire_if_inert().await);

        f.service.play_to_vc("song", vc(), guild()).await.expect("played");

        let current = f.service.get_queue(guild()).await.expect("queue");
        assert!(!Arc::ptr_eq(&old, &current));
        assert_eq!(current.tracks().await, vec![track("a")]);
    }

    #[tokio::test]
    async fn drained_queue_is_removed_by_janitor() {
        let f = fixture(FakeTranscoder::finite(3));

        f.service.play_to_vc("song", vc(), guild()).await.expect("played");

        assert!(wait_until(|| registered(&f.service) == 0).await);
        assert_eq!(f.voice.disconnects(), 1);
        assert_eq!(f.transcoder.alive(), 0);
    }

    #[tokio::test]
    async fn draining_while_service_queries_never_deadlocks() {
        let f = fixture(FakeTranscoder::finite(2));

        let run = async {
            for round in 0..20 {
                let play = f.service.play_to_vc("song", vc(), guild());
                let query = async {
                    for _ in 0..5 {
                        if let Some(queue) = f.service.get_queue(guild()).await {
                            queue.tracks().await;
                        }
                        tokio::task::yield_now().await;
                    }
                };
                let (played, _) = tokio::join!(play, query);
                assert!(matches!(played, Ok(_) | Err(MusicError::QueueRetired)));

                // Alterna borrados explícitos con drenados naturales
                if round % 2 == 0 {
                    f.service.delete_queue(guild()).await;
                }
            }
            f.service.delete_queue(guild()).await;
        };

        tokio::time::timeout(Duration::from_secs(10), run)
            .await
            .expect("no deadlock");
        assert!(wait_until(|| f.transcoder.alive() == 0).await);
    }

    #[tokio::test]
    async fn lost_voice_sink_releases_the_guild() {
        let voice = FakeVoice::closing_after(5);
        let service = MusicService::new(
            Arc::new(voice.clone()),
            playback(
                FakeProvider::with_results(vec![track("a")]),
                FakeTranscoder::endless(),
            ),
            ServiceSettings::default(),
        );

        service.play_to_vc("song", vc(), guild()).await.expect("played");

        assert!(wait_until(|| voice.disconnects() == 1).await);
        assert!(wait_until(|| registered(&service) == 0).await);
    }
}
