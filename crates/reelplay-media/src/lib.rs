//! ReelPlay Media - Single-Stream Video Playback Engine
//!
//! This crate decodes the best video track of a media container on a
//! background worker and delivers RGB frames to a consumer at a bounded
//! rate, with transport controls (play, pause, stop, seek) and live
//! position reporting:
//! - Decoder abstraction over FFmpeg (via `ffmpeg-next`)
//! - Playback engine with a per-session decode worker
//! - Event delivery over channels (frames, position, finished, errors)
//!
//! Audio, subtitles and hardware decode are out of scope.

use thiserror::Error;

pub mod decoder;
pub mod player;

#[cfg(feature = "ffmpeg")]
pub use decoder::FFmpegDecoder;
pub use decoder::{DecodedFrame, TestPatternDecoder, VideoDecoder};
pub use player::{PlaybackState, PlayerEvent, VideoPlayer};

/// Media errors
#[derive(Error, Debug, Clone)]
pub enum MediaError {
    #[error("Failed to open file: {0}")]
    FileOpen(String),

    #[error("No video stream found")]
    NoVideoStream,

    #[error("Decoder error: {0}")]
    DecoderError(String),

    #[error("End of stream")]
    EndOfStream,

    #[error("Seek error: {0}")]
    SeekError(String),
}

/// Result type for media operations
pub type Result<T> = std::result::Result<T, MediaError>;
