use async_trait::async_trait;
use std::{process::Stdio, time::Duration};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    process::{Child, Command},
};
use tracing::debug;

use super::{
    encoder::{CHANNELS, SAMPLE_RATE},
    error::PipelineError,
};

/// Proceso de transcodificación en marcha: bytes crudos entran por `input`,
/// PCM s16le estéreo a 48kHz sale por `output`.
pub struct TranscodeProcess {
    pub input: Box<dyn AsyncWrite + Send + Unpin>,
    pub output: Box<dyn AsyncRead + Send + Unpin>,
    pub control: Box<dyn TranscodeControl>,
}

/// Control del proceso externo. Cada proceso se mata o se espera una sola vez.
#[async_trait]
pub trait TranscodeControl: Send + Sync {
    /// Termina el proceso a la fuerza y lo recolecta
    async fn kill(&mut self) -> std::io::Result<()>;

    /// Recolecta el proceso tras el fin natural de su salida
    async fn wait(&mut self) -> Result<(), PipelineError>;
}

/// Etapa de transcodificación intercambiable (start-at-offset)
pub trait Transcoder: Send + Sync {
    fn spawn(&self, offset: Duration) -> Result<TranscodeProcess, PipelineError>;
}

/// Transcoder basado en ffmpeg
#[derive(Debug, Clone)]
pub struct FfmpegTranscoder {
    path: String,
}

impl FfmpegTranscoder {
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: path.into() }
    }

    fn args(offset: Duration) -> Vec<String> {
        let mut args: Vec<String> = ["-hide_banner", "-loglevel", "error", "-nostdin"]
            .iter()
            .map(|s| s.to_string())
            .collect();

        if !offset.is_zero() {
            args.push("-ss".to_string());
            args.push(format!("{:.3}", offset.as_secs_f64()));
        }

        args.extend(
            [
                "-i".to_string(),
                "pipe:0".to_string(),
                "-vn".to_string(),
                "-f".to_string(),
                "s16le".to_string(),
                "-acodec".to_string(),
                "pcm_s16le".to_string(),
                "-ar".to_string(),
                SAMPLE_RATE.to_string(),
                "-ac".to_string(),
                CHANNELS.to_string(),
                "pipe:1".to_string(),
            ],
        );
        args
    }
}

impl Transcoder for FfmpegTranscoder {
    fn spawn(&self, offset: Duration) -> Result<TranscodeProcess, PipelineError> {
        let mut child = Command::new(&self.path)
            .args(Self::args(offset))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(PipelineError::Spawn)?;

        let input = child.stdin.take().ok_or(PipelineError::MissingPipe("stdin"))?;
        let output = child.stdout.take().ok_or(PipelineError::MissingPipe("stdout"))?;

        debug!("🔧 ffmpeg iniciado (pid {:?}, offset {:?})", child.id(), offset);

        Ok(TranscodeProcess {
            input: Box::new(input),
            output: Box::new(output),
            control: Box::new(ChildControl { child }),
        })
    }
}

struct ChildControl {
    child: Child,
}

#[async_trait]
impl TranscodeControl for ChildControl {
    async fn kill(&mut self) -> std::io::Result<()> {
        self.child.kill().await
    }

    async fn wait(&mut self) -> Result<(), PipelineError> {
        let status = self
            .child
            .wait()
            .await
            .map_err(|e| PipelineError::TranscoderExit(e.to_string()))?;

        if status.success() {
            Ok(())
        } else {
            Err(PipelineError::TranscoderExit(status.to_string()))
        }
    }
}
