use audiopus::{coder::Encoder, Application, Bitrate, Channels, SampleRate};

use super::error::PipelineError;

pub const SAMPLE_RATE: u32 = 48_000;
pub const CHANNELS: u16 = 2;
/// Muestras por canal en un frame de 20ms
pub const FRAME_SAMPLES: usize = 960;
/// Bytes de un frame PCM s16le estéreo de 20ms
pub const PCM_FRAME_BYTES: usize = FRAME_SAMPLES * CHANNELS as usize * 2;

// Tamaño máximo recomendado por libopus para un paquete
const MAX_PACKET_BYTES: usize = 4000;

/// Encoder Opus de frames fijos de 20ms
pub struct OpusFrameEncoder {
    encoder: Encoder,
    pcm: Vec<i16>,
    packet: Vec<u8>,
}

impl OpusFrameEncoder {
    pub fn new(bitrate: i32) -> Result<Self, PipelineError> {
        let mut encoder = Encoder::new(SampleRate::Hz48000, Channels::Stereo, Application::Audio)
            .map_err(|e| PipelineError::Encoder(e.to_string()))?;
        encoder
            .set_bitrate(Bitrate::BitsPerSecond(bitrate))
            .map_err(|e| PipelineError::Encoder(e.to_string()))?;

        Ok(Self {
            encoder,
            pcm: vec![0; FRAME_SAMPLES * CHANNELS as usize],
            packet: vec![0; MAX_PACKET_BYTES],
        })
    }

    /// Codifica un frame PCM completo (`PCM_FRAME_BYTES` bytes) a un paquete Opus
    pub fn encode(&mut self, frame: &[u8]) -> Result<Vec<u8>, PipelineError> {
        if frame.len() != PCM_FRAME_BYTES {
            return Err(PipelineError::Encoder(format!(
                "frame de {} bytes, se esperaban {}",
                frame.len(),
                PCM_FRAME_BYTES
            )));
        }

        pcm_from_le_bytes(frame, &mut self.pcm);
        let len = self
            .encoder
            .encode(&self.pcm, &mut self.packet)
            .map_err(|e| PipelineError::Encoder(e.to_string()))?;

        Ok(self.packet[..len].to_vec())
    }
}

/// Convierte bytes s16le a muestras; `out` debe tener la mitad de largo que `bytes`
pub fn pcm_from_le_bytes(bytes: &[u8], out: &mut [i16]) {
    for (sample, chunk) in out.iter_mut().zip(bytes.chunks_exact(2)) {
        *sample = i16::from_le_bytes([chunk[0], chunk[1]]);
    }
}
