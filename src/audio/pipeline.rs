use bytes::Bytes;
use futures::StreamExt;
use std::{
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    sync::mpsc,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{
    encoder::{OpusFrameEncoder, PCM_FRAME_BYTES},
    error::PipelineError,
    transcoder::{TranscodeControl, Transcoder},
    voice::{FrameSink, VoiceHandle},
};
use crate::sources::{ByteStream, Track, TrackProvider};

const KILL_TIMEOUT: Duration = Duration::from_secs(5);
const FRAME_DURATION: Duration = Duration::from_millis(20);

/// Parámetros de los pipelines de una instancia del bot
#[derive(Debug, Clone, Copy)]
pub struct PipelineConfig {
    /// Profundidad de cada buffer entre etapas, en frames de 20ms
    pub buffer_frames: usize,
    pub bitrate: i32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            buffer_frames: 450,
            bitrate: 128_000,
        }
    }
}

/// Colaboradores compartidos por todos los pipelines
pub struct PlaybackContext {
    pub provider: Arc<dyn TrackProvider>,
    pub transcoder: Arc<dyn Transcoder>,
    pub config: PipelineConfig,
}

/// Mensajes que un pipeline envía a la cola que lo posee
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineEvent {
    /// La etapa de envío vio agotarse el buffer
    Finished { pipeline_id: u64 },
    /// El transporte de voz dejó de aceptar paquetes
    SinkClosed { pipeline_id: u64 },
}

impl PipelineEvent {
    pub fn pipeline_id(&self) -> u64 {
        match self {
            Self::Finished { pipeline_id } | Self::SinkClosed { pipeline_id } => *pipeline_id,
        }
    }
}

pub type FinishSender = mpsc::UnboundedSender<PipelineEvent>;

struct Shared {
    id: u64,
    playing: AtomicBool,
    cancel: CancellationToken,
    control: tokio::sync::Mutex<Option<Box<dyn TranscodeControl>>>,
    on_finish: parking_lot::Mutex<Option<FinishSender>>,
    frames_sent: AtomicU64,
}

impl Shared {
    /// Mata el transcoder si sigue vivo. Solo el primero que llega lo hace.
    async fn kill_transcoder(&self) {
        let mut control = self.control.lock().await;
        if let Some(mut control) = control.take() {
            if let Err(e) = control.kill().await {
                debug!("kill del transcoder del pipeline {}: {}", self.id, e);
            }
        }
    }

    /// Recolecta el transcoder tras el EOF natural; cede ante una cancelación
    async fn reap_transcoder(&self) {
        let mut control = self.control.lock().await;
        let Some(mut control) = control.take() else {
            return;
        };

        tokio::select! {
            _ = self.cancel.cancelled() => {
                let _ = control.kill().await;
            }
            result = control.wait() => {
                if let Err(e) = result {
                    warn!("⚠️ Pipeline {}: {}", self.id, e);
                }
            }
        }
    }

    /// Entrega a lo sumo un aviso por pipeline
    fn notify(&self, event: PipelineEvent) {
        if let Some(tx) = self.on_finish.lock().take() {
            let _ = tx.send(event);
        }
    }
}

/// Pipeline fetch → transcode → encode → send para un track.
///
/// Cada etapa es una tarea propia conectada por buffers acotados; el
/// bloqueo en buffer lleno/vacío es la única forma de control de flujo.
pub struct AudioPipeline {
    shared: Arc<Shared>,
    offset: Duration,
}

enum SendEnd {
    Exhausted,
    Cancelled,
    SinkClosed,
}

impl AudioPipeline {
    /// Abre la fuente, el encoder, el sink y el transcoder, y lanza las etapas.
    ///
    /// Si algo falla no queda ninguna etapa corriendo. El callback se instala
    /// antes de lanzar las etapas, así un track corto no puede terminar sin él.
    pub async fn start(
        id: u64,
        track: Track,
        voice: &Arc<dyn VoiceHandle>,
        offset: Duration,
        ctx: &PlaybackContext,
        on_finish: Option<FinishSender>,
    ) -> Result<Self, PipelineError> {
        let stream = ctx.provider.fetch_track_bytes(&track, offset).await?;
        let encoder = OpusFrameEncoder::new(ctx.config.bitrate)?;
        let sink = voice.open_sink().await?;
        let process = ctx.transcoder.spawn(stream.remaining_seek(offset))?;

        let shared = Arc::new(Shared {
            id,
            playing: AtomicBool::new(true),
            cancel: CancellationToken::new(),
            control: tokio::sync::Mutex::new(Some(process.control)),
            on_finish: parking_lot::Mutex::new(on_finish),
            frames_sent: AtomicU64::new(0),
        });

        let depth = ctx.config.buffer_frames.max(1);
        let (pcm_tx, pcm_rx) = flume::bounded::<Vec<u8>>(depth);
        let (packet_tx, packet_rx) = flume::bounded::<Bytes>(depth);

        tokio::spawn(fetch_stage(
            stream.bytes,
            process.input,
            shared.cancel.clone(),
            id,
        ));
        tokio::spawn(packetize_stage(process.output, pcm_tx, shared.clone()));
        tokio::spawn(encode_stage(pcm_rx, packet_tx, encoder, shared.cancel.clone(), id));
        tokio::spawn(send_stage(packet_rx, sink, shared.clone()));

        info!(
            "▶️ Pipeline {} iniciado: {} (desde {:?})",
            id,
            track.title(),
            offset
        );

        Ok(Self { shared, offset })
    }

    pub fn id(&self) -> u64 {
        self.shared.id
    }

    pub fn is_playing(&self) -> bool {
        self.shared.playing.load(Ordering::Acquire)
    }

    pub fn frames_sent(&self) -> u64 {
        self.shared.frames_sent.load(Ordering::Relaxed)
    }

    /// Posición aproximada dentro del track
    pub fn position(&self) -> Duration {
        self.offset + FRAME_DURATION * self.frames_sent() as u32
    }

    /// Instala o limpia el aviso de fin natural
    pub fn set_on_finish(&self, on_finish: Option<FinishSender>) {
        *self.shared.on_finish.lock() = on_finish;
    }

    /// Detiene todas las etapas y recolecta el transcoder.
    ///
    /// Idempotente; una segunda llamada concurrente espera a que la primera
    /// termine de matar el proceso.
    pub async fn stop(&self) {
        let was_playing = self.shared.playing.swap(false, Ordering::AcqRel);
        self.shared.cancel.cancel();

        if tokio::time::timeout(KILL_TIMEOUT, self.shared.kill_transcoder())
            .await
            .is_err()
        {
            warn!(
                "⏱️ Timeout deteniendo el transcoder del pipeline {}",
                self.shared.id
            );
        }

        if was_playing {
            debug!("⏹️ Pipeline {} detenido", self.shared.id);
        }
    }
}

impl Drop for AudioPipeline {
    fn drop(&mut self) {
        self.shared.cancel.cancel();
    }
}

async fn fetch_stage(
    mut bytes: ByteStream,
    mut input: Box<dyn AsyncWrite + Send + Unpin>,
    cancel: CancellationToken,
    id: u64,
) {
    loop {
        let chunk = tokio::select! {
            _ = cancel.cancelled() => break,
            chunk = bytes.next() => chunk,
        };

        match chunk {
            Some(Ok(data)) => {
                let written = tokio::select! {
                    _ = cancel.cancelled() => break,
                    written = input.write_all(&data) => written,
                };
                if let Err(e) = written {
                    debug!("Pipeline {}: el transcoder cerró su entrada: {}", id, e);
                    break;
                }
            }
            Some(Err(e)) => {
                // Se trata como fin del track
                warn!("⚠️ Pipeline {}: error leyendo la fuente: {}", id, e);
                break;
            }
            None => break,
        }
    }

    let _ = input.shutdown().await;
    debug!("Pipeline {}: fetch terminado", id);
}

async fn packetize_stage(
    mut output: Box<dyn AsyncRead + Send + Unpin>,
    pcm_tx: flume::Sender<Vec<u8>>,
    shared: Arc<Shared>,
) {
    loop {
        let mut frame = vec![0u8; PCM_FRAME_BYTES];
        let read = tokio::select! {
            _ = shared.cancel.cancelled() => break,
            read = output.read_exact(&mut frame) => read,
        };

        match read {
            Ok(_) => {
                let sent = tokio::select! {
                    _ = shared.cancel.cancelled() => break,
                    sent = pcm_tx.send_async(frame) => sent,
                };
                if sent.is_err() {
                    break;
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                // Un frame parcial al final se descarta
                shared.reap_transcoder().await;
                break;
            }
            Err(e) => {
                warn!("⚠️ Pipeline {}: error leyendo el transcoder: {}", shared.id, e);
                shared.kill_transcoder().await;
                break;
            }
        }
    }

    if shared.cancel.is_cancelled() {
        shared.kill_transcoder().await;
    }
    debug!("Pipeline {}: packetize terminado", shared.id);
}

async fn encode_stage(
    pcm_rx: flume::Receiver<Vec<u8>>,
    packet_tx: flume::Sender<Bytes>,
    mut encoder: OpusFrameEncoder,
    cancel: CancellationToken,
    id: u64,
) {
    loop {
        let frame = tokio::select! {
            _ = cancel.cancelled() => break,
            frame = pcm_rx.recv_async() => frame,
        };
        let Ok(frame) = frame else {
            break;
        };

        let packet = match encoder.encode(&frame) {
            Ok(packet) => Bytes::from(packet),
            Err(e) => {
                warn!("⚠️ Pipeline {}: {}", id, e);
                continue;
            }
        };

        let sent = tokio::select! {
            _ = cancel.cancelled() => break,
            sent = packet_tx.send_async(packet) => sent,
        };
        if sent.is_err() {
            break;
        }
    }

    debug!("Pipeline {}: encode terminado", id);
}

async fn send_stage(packet_rx: flume::Receiver<Bytes>, sink: FrameSink, shared: Arc<Shared>) {
    let end = loop {
        if !shared.playing.load(Ordering::Acquire) {
            break SendEnd::Cancelled;
        }

        let packet = tokio::select! {
            _ = shared.cancel.cancelled() => break SendEnd::Cancelled,
            packet = packet_rx.recv_async() => packet,
        };
        let Ok(packet) = packet else {
            break SendEnd::Exhausted;
        };

        // El flag se revisa antes de cada envío
        if !shared.playing.load(Ordering::Acquire) {
            break SendEnd::Cancelled;
        }

        let sent = tokio::select! {
            _ = shared.cancel.cancelled() => break SendEnd::Cancelled,
            sent = sink.send_async(packet) => sent,
        };
        if sent.is_err() {
            break SendEnd::SinkClosed;
        }

        shared.frames_sent.fetch_add(1, Ordering::Relaxed);
    };

    shared.playing.store(false, Ordering::Release);
    shared.cancel.cancel();

    match end {
        SendEnd::SinkClosed => {
            warn!(
                "🔇 Pipeline {}: el transporte de voz se cerró, deteniendo",
                shared.id
            );
            shared.notify(PipelineEvent::SinkClosed {
                pipeline_id: shared.id,
            });
        }
        SendEnd::Exhausted | SendEnd::Cancelled => {
            debug!(
                "Pipeline {}: envío terminado tras {} frames",
                shared.id,
                shared.frames_sent.load(Ordering::Relaxed)
            );
            shared.notify(PipelineEvent::Finished {
                pipeline_id: shared.id,
            });
        }
    }
}
