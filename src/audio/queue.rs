use serenity::model::id::{ChannelId, GuildId};
use std::{
    collections::VecDeque,
    sync::{Arc, Weak},
    time::Duration,
};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error, info, warn};

use super::{
    error::MusicError,
    pipeline::{AudioPipeline, FinishSender, PipelineEvent, PlaybackContext},
    voice::VoiceHandle,
};
use crate::sources::Track;

/// Resultado de sacar el siguiente track de la cola
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Advance {
    Started(Track),
    Drained,
}

struct QueueState {
    channel_id: ChannelId,
    voice: Option<Arc<dyn VoiceHandle>>,
    items: VecDeque<Track>,
    now_playing: Option<Track>,
    pipeline: Option<AudioPipeline>,
    next_pipeline_id: u64,
    retired: bool,
}

impl QueueState {
    fn is_inert(&self) -> bool {
        self.now_playing.is_none() && self.items.is_empty()
    }

    /// Saca el pipeline actual con su aviso de fin ya limpiado
    fn detach_pipeline(&mut self) -> Option<AudioPipeline> {
        let pipeline = self.pipeline.take()?;
        pipeline.set_on_finish(None);
        Some(pipeline)
    }
}

/// Cola de reproducción de una guild.
///
/// Un solo lock protege la lista pendiente, `now_playing` y el pipeline.
/// Los fines naturales llegan como [`PipelineEvent`] a un supervisor propio
/// de la cola, que descarta los de pipelines ya reemplazados.
pub struct Queue {
    guild_id: GuildId,
    state: Mutex<QueueState>,
    events: FinishSender,
    drained: mpsc::UnboundedSender<GuildId>,
    playback: Arc<PlaybackContext>,
}

impl Queue {
    /// Cola vinculada al canal de voz del transporte
    pub fn new(
        voice: Arc<dyn VoiceHandle>,
        playback: Arc<PlaybackContext>,
        drained: mpsc::UnboundedSender<GuildId>,
    ) -> Arc<Self> {
        let (events, rx) = mpsc::unbounded_channel();
        let queue = Arc::new(Self {
            guild_id: voice.guild_id(),
            state: Mutex::new(QueueState {
                channel_id: voice.channel_id(),
                voice: Some(voice),
                items: VecDeque::new(),
                now_playing: None,
                pipeline: None,
                next_pipeline_id: 1,
                retired: false,
            }),
            events,
            drained,
            playback,
        });

        tokio::spawn(supervise(Arc::downgrade(&queue), rx));
        debug!("🆕 Cola creada para guild {}", queue.guild_id);
        queue
    }

    pub fn guild_id(&self) -> GuildId {
        self.guild_id
    }

    pub async fn add_track(&self, track: Track) -> Result<usize, MusicError> {
        self.add_tracks(vec![track]).await
    }

    /// Agrega tracks al final. Devuelve la posición del primero en `tracks()`
    /// (0 = empezó a sonar). Nunca interrumpe el track actual.
    pub async fn add_tracks(&self, tracks: Vec<Track>) -> Result<usize, MusicError> {
        let (result, drained) = {
            let mut state = self.state.lock().await;
            if state.retired {
                return Err(MusicError::QueueRetired);
            }

            let position = state.items.len() + usize::from(state.now_playing.is_some());
            for track in tracks {
                info!("➕ Agregado a la cola: {}", track.title());
                state.items.push_back(track);
            }

            if state.now_playing.is_some() {
                (Ok(position), false)
            } else {
                match self.play_next_locked(&mut state).await {
                    Ok(_) => (Ok(position), false),
                    Err(e) => {
                        // El track fallido queda consumido; el resto sigue
                        let advance = self.advance_locked(&mut state).await;
                        (Err(e), advance == Advance::Drained)
                    }
                }
            }
        };

        if drained {
            self.notify_drained();
        }
        result
    }

    /// Salta el track actual. Devuelve el siguiente si lo hay.
    pub async fn skip(&self) -> Result<Option<Track>, MusicError> {
        let advance = {
            let mut state = self.state.lock().await;
            if state.now_playing.is_none() {
                return Err(MusicError::NothingPlaying);
            }
            self.advance_locked(&mut state).await
        };

        match advance {
            Advance::Started(track) => Ok(Some(track)),
            Advance::Drained => {
                self.notify_drained();
                Ok(None)
            }
        }
    }

    /// Reinicia el track actual en `offset` con un pipeline nuevo.
    ///
    /// Si el pipeline nuevo no arranca, la cola sigue con el próximo track.
    pub async fn seek(&self, offset: Duration) -> Result<(), MusicError> {
        let (result, drained) = {
            let mut state = self.state.lock().await;
            let Some(track) = state.now_playing.clone() else {
                return Err(MusicError::NothingPlaying);
            };
            let Some(voice) = state.voice.clone() else {
                return Err(MusicError::NothingPlaying);
            };

            if let Some(old) = state.detach_pipeline() {
                old.stop().await;
            }

            match self.start_pipeline(&mut state, track.clone(), &voice, offset).await {
                Ok(pipeline) => {
                    info!("⏩ Seek a {:?} en {}", offset, track.title());
                    state.pipeline = Some(pipeline);
                    (Ok(()), false)
                }
                Err(e) => {
                    state.now_playing = None;
                    let advance = self.advance_locked(&mut state).await;
                    (Err(e), advance == Advance::Drained)
                }
            }
        };

        if drained {
            self.notify_drained();
        }
        result
    }

    /// Vacía la cola, detiene el pipeline y libera el transporte. Idempotente.
    pub async fn stop(&self) {
        let voice = {
            let mut state = self.state.lock().await;
            state.items.clear();
            if let Some(pipeline) = state.detach_pipeline() {
                pipeline.stop().await;
            }
            state.now_playing = None;
            state.retired = true;
            state.voice.take()
        };

        if let Some(voice) = voice {
            voice.disconnect().await;
            info!("👋 Cola de guild {} detenida", self.guild_id);
        }
    }

    /// Vacía solo la lista pendiente
    pub async fn clear(&self) -> usize {
        let mut state = self.state.lock().await;
        let removed = state.items.len();
        state.items.clear();
        debug!("🗑️ {} tracks eliminados de la cola", removed);
        removed
    }

    /// `now_playing` seguido de la lista pendiente
    pub async fn tracks(&self) -> Vec<Track> {
        let state = self.state.lock().await;
        state
            .now_playing
            .iter()
            .chain(state.items.iter())
            .cloned()
            .collect()
    }

    pub async fn voice_channel_id(&self) -> ChannelId {
        self.state.lock().await.channel_id
    }

    pub async fn now_playing(&self) -> Option<Track> {
        self.state.lock().await.now_playing.clone()
    }

    /// Posición aproximada del track actual
    pub async fn position(&self) -> Option<Duration> {
        let state = self.state.lock().await;
        state.pipeline.as_ref().map(AudioPipeline::position)
    }

    pub async fn is_playing(&self) -> bool {
        let state = self.state.lock().await;
        state.pipeline.as_ref().is_some_and(AudioPipeline::is_playing)
    }

    pub async fn is_inert(&self) -> bool {
        self.state.lock().await.is_inert()
    }

    /// Marca la cola como retirada si no tiene nada que reproducir
    pub async fn retire_if_inert(&self) -> bool {
        let mut state = self.state.lock().await;
        if state.is_inert() {
            state.retired = true;
        }
        state.retired
    }

    /// Vincula la cola a otro transporte y su canal. Falla si ya fue retirada.
    pub async fn rebind(&self, voice: Arc<dyn VoiceHandle>) -> bool {
        let mut state = self.state.lock().await;
        if state.retired {
            return false;
        }
        state.channel_id = voice.channel_id();
        state.voice = Some(voice);
        true
    }

    async fn handle_event(&self, event: PipelineEvent) {
        let pipeline_id = event.pipeline_id();

        let advance = {
            let mut state = self.state.lock().await;
            if state.pipeline.as_ref().map(AudioPipeline::id) != Some(pipeline_id) {
                debug!("Aviso obsoleto del pipeline {}", pipeline_id);
                return;
            }

            match event {
                PipelineEvent::Finished { .. } => self.advance_locked(&mut state).await,
                PipelineEvent::SinkClosed { .. } => {
                    // Sin transporte no se puede seguir: la cola queda vacía
                    warn!(
                        "🔇 Transporte de voz perdido en guild {}, vaciando la cola",
                        self.guild_id
                    );
                    if let Some(old) = state.detach_pipeline() {
                        old.stop().await;
                    }
                    state.now_playing = None;
                    state.items.clear();
                    Advance::Drained
                }
            }
        };

        if advance == Advance::Drained {
            self.notify_drained();
        }
    }

    /// Avanza hasta que un track arranque o la lista quede vacía
    async fn advance_locked(&self, state: &mut QueueState) -> Advance {
        loop {
            match self.play_next_locked(state).await {
                Ok(advance) => return advance,
                Err(e) => error!("❌ {}", e),
            }
        }
    }

    /// Detiene el pipeline actual y arranca el primer pendiente.
    ///
    /// Si el arranque falla, el track queda consumido y la cola en reposo.
    async fn play_next_locked(&self, state: &mut QueueState) -> Result<Advance, MusicError> {
        if let Some(old) = state.detach_pipeline() {
            old.stop().await;
        }
        state.now_playing = None;

        let Some(voice) = state.voice.clone() else {
            state.items.clear();
            return Ok(Advance::Drained);
        };
        let Some(track) = state.items.pop_front() else {
            debug!("📭 Cola de guild {} vacía", self.guild_id);
            return Ok(Advance::Drained);
        };

        let pipeline = self
            .start_pipeline(state, track.clone(), &voice, Duration::ZERO)
            .await?;
        state.now_playing = Some(track.clone());
        state.pipeline = Some(pipeline);

        Ok(Advance::Started(track))
    }

    async fn start_pipeline(
        &self,
        state: &mut QueueState,
        track: Track,
        voice: &Arc<dyn VoiceHandle>,
        offset: Duration,
    ) -> Result<AudioPipeline, MusicError> {
        let id = state.next_pipeline_id;
        state.next_pipeline_id += 1;

        let title = track.title().to_string();
        AudioPipeline::start(
            id,
            track,
            voice,
            offset,
            &self.playback,
            Some(self.events.clone()),
        )
        .await
        .map_err(|source| {
            error!("❌ No se pudo iniciar el pipeline de '{}': {}", title, source);
            MusicError::PipelineSpawn { title, source }
        })
    }

    fn notify_drained(&self) {
        let _ = self.drained.send(self.guild_id);
    }
}

async fn supervise(queue: Weak<Queue>, mut events: mpsc::UnboundedReceiver<PipelineEvent>) {
    while let Some(event) = events.recv().await {
        let Some(queue) = queue.upgrade() else {
            break;
        };
        queue.handle_event(event).await;
    }
}
