//! Songbird-backed voice transport.
//!
//! Each pipeline gets a fresh sink: a bounded channel whose receiving end is
//! wrapped as a DCA stream and handed to songbird as a live input. Songbird
//! recognises the already-encoded Opus frames and passes them through to the
//! voice gateway without decoding.

use async_trait::async_trait;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use serenity::model::id::{ChannelId, GuildId};
use songbird::{
    input::{AudioStream, Input, LiveInput},
    Call, Songbird,
};
use std::{
    io::{self, Read, Seek, SeekFrom},
    sync::Arc,
};
use symphonia::core::{io::MediaSource, probe::Hint};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::audio::{
    error::VoiceError,
    voice::{FrameSink, VoiceHandle, VoiceProvider},
};

/// Paquetes en vuelo entre el pipeline y el mixer de songbird
const SINK_DEPTH: usize = 8;

const DCA_MAGIC: &[u8; 4] = b"DCA1";

const DCA_METADATA: &str = r#"{"dca":{"version":1,"tool":{"name":"guild-tunes","version":"1.0.0","url":null,"author":null}},"opus":{"mode":"music","sample_rate":48000,"frame_size":960,"abr":null,"vbr":true,"channels":2},"info":null,"origin":null,"extra":null}"#;

/// Cabecera DCA1: magia, longitud i32 LE y metadatos JSON
fn dca_header() -> Bytes {
    let mut header = BytesMut::with_capacity(DCA_MAGIC.len() + 4 + DCA_METADATA.len());
    header.put_slice(DCA_MAGIC);
    header.put_i32_le(DCA_METADATA.len() as i32);
    header.put_slice(DCA_METADATA.as_bytes());
    header.freeze()
}

/// Un frame DCA: longitud i16 LE seguida del paquete Opus
fn dca_frame(packet: &[u8]) -> Bytes {
    let mut frame = BytesMut::with_capacity(2 + packet.len());
    frame.put_i16_le(packet.len() as i16);
    frame.put_slice(packet);
    frame.freeze()
}

/// Lector bloqueante sobre los paquetes del pipeline, en formato DCA
pub struct DcaStream {
    packets: flume::Receiver<Bytes>,
    pending: Bytes,
}

impl DcaStream {
    pub fn new(packets: flume::Receiver<Bytes>) -> Self {
        Self {
            packets,
            pending: dca_header(),
        }
    }
}

impl Read for DcaStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        if !self.pending.has_remaining() {
            match self.packets.recv() {
                Ok(packet) => self.pending = dca_frame(&packet),
                // Pipeline terminado: fin del stream
                Err(flume::RecvError::Disconnected) => return Ok(0),
            }
        }

        let n = buf.len().min(self.pending.remaining());
        self.pending.copy_to_slice(&mut buf[..n]);
        Ok(n)
    }
}

impl Seek for DcaStream {
    fn seek(&mut self, _pos: SeekFrom) -> io::Result<u64> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "stream en vivo sin seek",
        ))
    }
}

impl MediaSource for DcaStream {
    fn is_seekable(&self) -> bool {
        false
    }

    fn byte_len(&self) -> Option<u64> {
        None
    }
}

/// Transporte de voz sobre el gestor de songbird
pub struct SongbirdVoice {
    manager: Arc<Songbird>,
}

impl SongbirdVoice {
    pub fn new(manager: Arc<Songbird>) -> Self {
        Self { manager }
    }
}

#[async_trait]
impl VoiceProvider for SongbirdVoice {
    async fn join_or_get(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
    ) -> Result<Arc<dyn VoiceHandle>, VoiceError> {
        if let Some(call) = self.manager.get(guild_id) {
            let current = call.lock().await.current_channel();
            if current == Some(channel_id.into()) {
                debug!("🔊 Reutilizando conexión de voz en guild {}", guild_id);
                return Ok(Arc::new(SongbirdHandle {
                    manager: self.manager.clone(),
                    call,
                    guild_id,
                    channel_id,
                }));
            }
        }

        let call = self
            .manager
            .join(guild_id, channel_id)
            .await
            .map_err(|e| VoiceError::Join(e.to_string()))?;

        if let Err(e) = call.lock().await.deafen(true).await {
            warn!("No se pudo ensordecer al bot en guild {}: {:?}", guild_id, e);
        }

        info!("🔊 Conectado al canal de voz {} en guild {}", channel_id, guild_id);
        Ok(Arc::new(SongbirdHandle {
            manager: self.manager.clone(),
            call,
            guild_id,
            channel_id,
        }))
    }
}

/// Conexión de songbird en una guild concreta
pub struct SongbirdHandle {
    manager: Arc<Songbird>,
    call: Arc<Mutex<Call>>,
    guild_id: GuildId,
    channel_id: ChannelId,
}

#[async_trait]
impl VoiceHandle for SongbirdHandle {
    fn guild_id(&self) -> GuildId {
        self.guild_id
    }

    fn channel_id(&self) -> ChannelId {
        self.channel_id
    }

    async fn open_sink(&self) -> Result<FrameSink, VoiceError> {
        let (tx, rx) = flume::bounded(SINK_DEPTH);

        let mut hint = Hint::new();
        hint.with_extension("dca");
        let stream: Box<dyn MediaSource> = Box::new(DcaStream::new(rx));
        let input = Input::Live(
            LiveInput::Raw(AudioStream {
                input: stream,
                hint: Some(hint),
            }),
            None,
        );

        let mut call = self.call.lock().await;
        if call.current_channel().is_none() {
            return Err(VoiceError::Closed);
        }
        // Reemplaza el input anterior; su receptor se cae y el pipeline viejo lo ve
        call.play_only_input(input);
        Ok(tx)
    }

    async fn disconnect(&self) {
        match self.manager.remove(self.guild_id).await {
            Ok(()) => info!("👋 Desconectado del canal de voz en guild {}", self.guild_id),
            Err(e) => debug!("Desconexión en guild {}: {:?}", self.guild_id, e),
        }
    }
}
