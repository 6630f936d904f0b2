//! Dobles en memoria para los tests del core de audio.

use async_trait::async_trait;
use bytes::Bytes;
use serenity::model::id::{ChannelId, GuildId};
use std::{
    future::Future,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::{
    io::{AsyncWrite, AsyncWriteExt},
    task::JoinHandle,
    time::Instant,
};

use crate::{
    audio::{
        encoder::PCM_FRAME_BYTES,
        error::{PipelineError, VoiceError},
        pipeline::{PipelineConfig, PlaybackContext},
        transcoder::{TranscodeControl, TranscodeProcess, Transcoder},
        voice::{FrameSink, VoiceHandle, VoiceProvider},
    },
    sources::{ProviderError, Track, TrackProvider, TrackStream},
};

const WAIT_TIMEOUT: Duration = Duration::from_secs(5);

/// Track de prueba: el título es el id en mayúsculas
pub fn track(id: &str) -> Track {
    Track::new(id, id.to_uppercase())
        .with_artist("Tester")
        .with_duration(Duration::from_secs(180))
}

pub fn playback(provider: FakeProvider, transcoder: FakeTranscoder) -> Arc<PlaybackContext> {
    Arc::new(PlaybackContext {
        provider: Arc::new(provider),
        transcoder: Arc::new(transcoder),
        config: PipelineConfig {
            buffer_frames: 16,
            bitrate: 64_000,
        },
    })
}

/// Sondea `condition` hasta que se cumpla o venza el timeout
pub async fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + WAIT_TIMEOUT;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}

/// Igual que [`wait_until`] para condiciones asíncronas
pub async fn wait_for<F, Fut>(mut condition: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = Instant::now() + WAIT_TIMEOUT;
    while Instant::now() < deadline {
        if condition().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition().await
}

// ---------------------------------------------------------------------------
// Voz

#[derive(Default)]
struct VoiceState {
    frames: AtomicUsize,
    joins: AtomicUsize,
    disconnects: AtomicUsize,
    fail_joins: AtomicBool,
    close_after: Option<usize>,
}

/// Transporte de voz falso: cuenta frames, joins y desconexiones
#[derive(Clone, Default)]
pub struct FakeVoice {
    state: Arc<VoiceState>,
}

impl FakeVoice {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cada sink se cierra tras recibir `frames` paquetes
    pub fn closing_after(frames: usize) -> Self {
        Self {
            state: Arc::new(VoiceState {
                close_after: Some(frames),
                ..Default::default()
            }),
        }
    }

    /// Handle para la guild 1, canal 10
    pub fn handle(&self) -> Arc<dyn VoiceHandle> {
        self.handle_for(GuildId::new(1), ChannelId::new(10))
    }

    pub fn handle_for(&self, guild_id: GuildId, channel_id: ChannelId) -> Arc<dyn VoiceHandle> {
        Arc::new(FakeHandle {
            guild_id,
            channel_id,
            state: self.state.clone(),
        })
    }

    pub fn fail_joins(&self) {
        self.state.fail_joins.store(true, Ordering::SeqCst);
    }

    pub fn frames(&self) -> usize {
        self.state.frames.load(Ordering::SeqCst)
    }

    pub fn joins(&self) -> usize {
        self.state.joins.load(Ordering::SeqCst)
    }

    pub fn disconnects(&self) -> usize {
        self.state.disconnects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl VoiceProvider for FakeVoice {
    async fn join_or_get(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
    ) -> Result<Arc<dyn VoiceHandle>, VoiceError> {
        if self.state.fail_joins.load(Ordering::SeqCst) {
            return Err(VoiceError::Join("canal lleno".to_string()));
        }
        self.state.joins.fetch_add(1, Ordering::SeqCst);
        Ok(self.handle_for(guild_id, channel_id))
    }
}

struct FakeHandle {
    guild_id: GuildId,
    channel_id: ChannelId,
    state: Arc<VoiceState>,
}

#[async_trait]
impl VoiceHandle for FakeHandle {
    fn guild_id(&self) -> GuildId {
        self.guild_id
    }

    fn channel_id(&self) -> ChannelId {
        self.channel_id
    }

    async fn open_sink(&self) -> Result<FrameSink, VoiceError> {
        let (tx, rx) = flume::bounded::<Bytes>(8);
        let state = self.state.clone();

        tokio::spawn(async move {
            let mut received = 0;
            while rx.recv_async().await.is_ok() {
                state.frames.fetch_add(1, Ordering::SeqCst);
                received += 1;
                if state.close_after.is_some_and(|limit| received >= limit) {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        });

        Ok(tx)
    }

    async fn disconnect(&self) {
        self.state.disconnects.fetch_add(1, Ordering::SeqCst);
    }
}

// ---------------------------------------------------------------------------
// Transcoder

#[derive(Clone, Copy)]
enum Mode {
    Finite(usize),
    Endless,
    Passthrough,
    Failing,
}

#[derive(Default)]
struct TranscoderState {
    spawned: AtomicUsize,
    alive: AtomicUsize,
    kills: AtomicUsize,
    offsets: parking_lot::Mutex<Vec<Duration>>,
}

type TranscoderInput = Box<dyn AsyncWrite + Send + Unpin>;

/// Transcoder en memoria: escribe frames de silencio por un `duplex`
#[derive(Clone)]
pub struct FakeTranscoder {
    mode: Mode,
    tail: usize,
    exit_error: bool,
    state: Arc<TranscoderState>,
}

impl FakeTranscoder {
    fn with_mode(mode: Mode) -> Self {
        Self {
            mode,
            tail: 0,
            exit_error: false,
            state: Arc::default(),
        }
    }

    /// Cada proceso emite `frames` frames y termina
    pub fn finite(frames: usize) -> Self {
        Self::with_mode(Mode::Finite(frames))
    }

    /// Cada proceso emite frames hasta que lo maten
    pub fn endless() -> Self {
        Self::with_mode(Mode::Endless)
    }

    /// Cada proceso devuelve por su salida lo que recibe por la entrada
    pub fn passthrough() -> Self {
        Self::with_mode(Mode::Passthrough)
    }

    /// Ningún proceso llega a arrancar
    pub fn failing() -> Self {
        Self::with_mode(Mode::Failing)
    }

    /// Agrega `bytes` sueltos tras el último frame completo
    pub fn with_tail(mut self, bytes: usize) -> Self {
        self.tail = bytes;
        self
    }

    /// El proceso termina con código de salida distinto de cero
    pub fn exiting_with_error(mut self) -> Self {
        self.exit_error = true;
        self
    }

    pub fn spawned(&self) -> usize {
        self.state.spawned.load(Ordering::SeqCst)
    }

    pub fn alive(&self) -> usize {
        self.state.alive.load(Ordering::SeqCst)
    }

    pub fn kills(&self) -> usize {
        self.state.kills.load(Ordering::SeqCst)
    }

    pub fn offsets(&self) -> Vec<Duration> {
        self.state.offsets.lock().clone()
    }
}

impl Transcoder for FakeTranscoder {
    fn spawn(&self, offset: Duration) -> Result<TranscodeProcess, PipelineError> {
        if let Mode::Failing = self.mode {
            return Err(PipelineError::Spawn(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "fake-ffmpeg",
            )));
        }

        self.state.offsets.lock().push(offset);
        self.state.spawned.fetch_add(1, Ordering::SeqCst);
        self.state.alive.fetch_add(1, Ordering::SeqCst);

        let (mut writer, reader) = tokio::io::duplex(PCM_FRAME_BYTES * 4);
        let (input, task): (TranscoderInput, JoinHandle<()>) = match self.mode {
            Mode::Passthrough => {
                let (input, mut from_input) = tokio::io::duplex(PCM_FRAME_BYTES * 4);
                let task = tokio::spawn(async move {
                    let _ = tokio::io::copy(&mut from_input, &mut writer).await;
                });
                (Box::new(input) as TranscoderInput, task)
            }
            Mode::Finite(count) => {
                let tail = self.tail;
                let task = tokio::spawn(async move {
                    let frame = vec![0u8; PCM_FRAME_BYTES];
                    for _ in 0..count {
                        if writer.write_all(&frame).await.is_err() {
                            return;
                        }
                    }
                    let _ = writer.write_all(&frame[..tail]).await;
                });
                (Box::new(tokio::io::sink()) as TranscoderInput, task)
            }
            Mode::Endless | Mode::Failing => {
                let task = tokio::spawn(async move {
                    let frame = vec![0u8; PCM_FRAME_BYTES];
                    while writer.write_all(&frame).await.is_ok() {}
                });
                (Box::new(tokio::io::sink()) as TranscoderInput, task)
            }
        };

        Ok(TranscodeProcess {
            input,
            output: Box::new(reader),
            control: Box::new(FakeControl {
                task,
                reaped: false,
                exit_error: self.exit_error,
                state: self.state.clone(),
            }),
        })
    }
}

struct FakeControl {
    task: JoinHandle<()>,
    reaped: bool,
    exit_error: bool,
    state: Arc<TranscoderState>,
}

impl FakeControl {
    fn reap(&mut self) {
        if !self.reaped {
            self.reaped = true;
            self.state.alive.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

#[async_trait]
impl TranscodeControl for FakeControl {
    async fn kill(&mut self) -> std::io::Result<()> {
        self.state.kills.fetch_add(1, Ordering::SeqCst);
        self.task.abort();
        self.reap();
        Ok(())
    }

    async fn wait(&mut self) -> Result<(), PipelineError> {
        let _ = (&mut self.task).await;
        self.reap();
        if self.exit_error {
            return Err(PipelineError::TranscoderExit("exit status: 1".to_string()));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Proveedor

#[derive(Default)]
struct ProviderState {
    results: Vec<Track>,
    lyrics: Option<String>,
    fail_search: bool,
    broken_after: Option<usize>,
    searches: AtomicUsize,
    fetched: parking_lot::Mutex<Vec<String>>,
}

/// Proveedor con resultados fijos; el audio lo pone el transcoder falso
#[derive(Clone, Default)]
pub struct FakeProvider {
    state: Arc<ProviderState>,
}

impl FakeProvider {
    pub fn with_results(results: Vec<Track>) -> Self {
        Self {
            state: Arc::new(ProviderState {
                results,
                ..Default::default()
            }),
        }
    }

    pub fn with_lyrics(results: Vec<Track>, lyrics: impl Into<String>) -> Self {
        Self {
            state: Arc::new(ProviderState {
                results,
                lyrics: Some(lyrics.into()),
                ..Default::default()
            }),
        }
    }

    pub fn failing() -> Self {
        Self {
            state: Arc::new(ProviderState {
                fail_search: true,
                ..Default::default()
            }),
        }
    }

    /// Cada fetch entrega `frames` frames de PCM y luego falla
    pub fn broken_source(results: Vec<Track>, frames: usize) -> Self {
        Self {
            state: Arc::new(ProviderState {
                results,
                broken_after: Some(frames),
                ..Default::default()
            }),
        }
    }

    pub fn searches(&self) -> usize {
        self.state.searches.load(Ordering::SeqCst)
    }

    /// Ids pedidos a `fetch_track_bytes`, en orden
    pub fn fetched(&self) -> Vec<String> {
        self.state.fetched.lock().clone()
    }
}

#[async_trait]
impl TrackProvider for FakeProvider {
    async fn search_tracks(&self, _query: &str, limit: usize) -> Result<Vec<Track>, ProviderError> {
        self.state.searches.fetch_add(1, Ordering::SeqCst);
        if self.state.fail_search {
            return Err(ProviderError::Command("fake search".to_string()));
        }
        Ok(self.state.results.iter().take(limit).cloned().collect())
    }

    async fn fetch_track_bytes(
        &self,
        track: &Track,
        _offset: Duration,
    ) -> Result<TrackStream, ProviderError> {
        self.state.fetched.lock().push(track.id().to_string());
        let Some(frames) = self.state.broken_after else {
            return Ok(TrackStream::from_start(Box::pin(futures::stream::empty())));
        };

        let chunks = (0..frames)
            .map(|_| Ok(Bytes::from(vec![0u8; PCM_FRAME_BYTES])))
            .chain(std::iter::once(Err(std::io::Error::new(
                std::io::ErrorKind::ConnectionReset,
                "fuente cortada",
            ))));
        Ok(TrackStream::from_start(Box::pin(futures::stream::iter(chunks))))
    }

    async fn fetch_lyrics(&self, _track: &Track) -> Result<String, ProviderError> {
        self.state.lyrics.clone().ok_or(ProviderError::NotFound)
    }
}
