//! # Audio Module
//!
//! Per-guild playback core for Guild Tunes.
//!
//! ## Architecture
//!
//! ### [`service`] - Music Service
//! - Registry of queues keyed by guild, created lazily and pruned when inert
//! - Pending search results awaiting a numbered choice
//! - Voice transport acquisition through a [`voice::VoiceProvider`]
//!
//! ### [`queue`] - Queue State Machine
//! - FIFO pending list plus the track currently playing
//! - At most one [`pipeline::AudioPipeline`] per queue
//! - Natural track ends arrive as messages to a per-queue supervisor;
//!   messages from replaced pipelines are ignored
//!
//! ### [`pipeline`] - Audio Pipeline
//! - fetch → transcode → encode → send, one task per stage
//! - Bounded buffers between stages provide backpressure
//! - Idempotent stop that kills and reaps the transcoder
//!
//! ## Audio Format
//!
//! - **Sample Rate**: 48kHz
//! - **Channels**: Stereo
//! - **Frames**: 20ms Opus packets (960 samples per channel)
//!
//! ## Locking
//!
//! Each queue has one async lock; the service has one sync lock that is never
//! held across an `await`. Neither is held while calling into the other's
//! locking API.

pub mod encoder;
pub mod error;
pub mod pipeline;
pub mod queue;
pub mod service;
pub mod transcoder;
pub mod voice;

pub use error::MusicError;
pub use pipeline::{PipelineConfig, PlaybackContext};
pub use service::{Choice, Enqueued, MusicService, ServiceSettings, VoiceStateChange};
pub use transcoder::FfmpegTranscoder;
