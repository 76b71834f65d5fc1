//! Video decoder implementations
//!
//! `VideoDecoder` is the seam between the playback engine and the decode
//! capability. `FFmpegDecoder` wraps a real FFmpeg session (demux, decode,
//! scale to RGB24); `TestPatternDecoder` generates synthetic frames and is
//! what the engine tests run against.

use crate::{MediaError, Result};

/// One decoded, converted video frame.
///
/// `data` is tightly packed interleaved RGB24 (`width * height * 3` bytes,
/// stride removed during copy-out). The buffer is an independent copy; the
/// decoder's internal frame buffers are reused on the next decode.
#[derive(Debug, Clone)]
pub struct DecodedFrame {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    /// Presentation timestamp in seconds, `None` if the frame carries no
    /// valid timestamp.
    pub pts: Option<f64>,
}

/// Abstraction over a decodable video source.
///
/// `next_frame` advances one step: it consumes packets until one decodes to
/// a video frame, converts it, and returns a copy. Packets of other streams
/// and transient per-packet decode failures are skipped inside the call.
pub trait VideoDecoder {
    /// Video dimensions in pixels.
    fn resolution(&self) -> (u32, u32);

    /// Container duration in seconds.
    fn duration(&self) -> f64;

    /// Decode the next frame, or `Err(MediaError::EndOfStream)`.
    fn next_frame(&mut self) -> Result<DecodedFrame>;

    /// Best-effort, keyframe-aligned reposition. Flushes decoder state.
    /// Out-of-range targets are handled however the underlying library
    /// handles them; the engine does not clamp.
    fn seek(&mut self, position_secs: f64) -> Result<()>;
}

// ============================================================================
// FFmpeg decoder
// ============================================================================

#[cfg(feature = "ffmpeg")]
mod ffmpeg_impl {
    use super::{DecodedFrame, VideoDecoder};
    use crate::{MediaError, Result};
    use ffmpeg_next as ffmpeg;
    use once_cell::sync::OnceCell;
    use std::path::Path;
    use tracing::{debug, info};

    const AV_TIME_BASE_F: f64 = ffmpeg_sys_next::AV_TIME_BASE as f64;

    /// Process-wide FFmpeg initialization, performed exactly once before the
    /// first session is opened. There is no corresponding teardown.
    fn ensure_initialized() -> Result<()> {
        static INIT: OnceCell<std::result::Result<(), String>> = OnceCell::new();
        INIT.get_or_init(|| ffmpeg::init().map_err(|e| e.to_string()))
            .clone()
            .map_err(MediaError::DecoderError)
    }

    /// FFmpeg-backed video decoder session.
    ///
    /// Owns the container, the selected video stream's decoder, the scaler
    /// and the two reused frame buffers for one open/close cycle. Field
    /// order matters: drop releases the scaler, then the decoder, then the
    /// container, the reverse of creation.
    pub struct FFmpegDecoder {
        scaler: Option<ffmpeg::software::scaling::Context>,
        decoder: ffmpeg::decoder::Video,
        input: ffmpeg::format::context::Input,
        stream_index: usize,
        time_base: f64,
        width: u32,
        height: u32,
        duration: f64,
        // Reused across frames to avoid per-frame allocation
        raw_frame: ffmpeg::frame::Video,
        rgb_frame: ffmpeg::frame::Video,
    }

    impl FFmpegDecoder {
        /// Open a media file and set up decoding of its best video stream.
        ///
        /// Every failure is surfaced verbatim; nothing is retried here.
        pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
            ensure_initialized()?;

            let path = path.as_ref();
            let input =
                ffmpeg::format::input(&path).map_err(|e| MediaError::FileOpen(e.to_string()))?;

            let (stream_index, time_base, stream_duration, parameters) = {
                let stream = input
                    .streams()
                    .best(ffmpeg::media::Type::Video)
                    .ok_or(MediaError::NoVideoStream)?;
                (
                    stream.index(),
                    f64::from(stream.time_base()),
                    stream.duration(),
                    stream.parameters(),
                )
            };

            let context = ffmpeg::codec::context::Context::from_parameters(parameters)
                .map_err(|e| MediaError::DecoderError(e.to_string()))?;
            let decoder = context
                .decoder()
                .video()
                .map_err(|e| MediaError::DecoderError(e.to_string()))?;

            let width = decoder.width();
            let height = decoder.height();

            // Container duration is in AV_TIME_BASE units; fall back to the
            // stream's own duration when the container does not report one.
            let duration = if input.duration() > 0 {
                input.duration() as f64 / AV_TIME_BASE_F
            } else if stream_duration > 0 {
                stream_duration as f64 * time_base
            } else {
                0.0
            };

            // RGB buffer sized once from the negotiated dimensions
            let rgb_frame = ffmpeg::frame::Video::new(ffmpeg::format::Pixel::RGB24, width, height);

            info!(
                "Opened video: {}x{}, {:.2}s, stream {} of {}",
                width,
                height,
                duration,
                stream_index,
                path.display()
            );

            Ok(Self {
                scaler: None,
                decoder,
                input,
                stream_index,
                time_base,
                width,
                height,
                duration,
                raw_frame: ffmpeg::frame::Video::empty(),
                rgb_frame,
            })
        }

        /// Read packets until the next one belonging to the video stream,
        /// `None` at end of stream.
        fn read_video_packet(&mut self) -> Option<ffmpeg::Packet> {
            let stream_index = self.stream_index;
            let mut packets = self.input.packets();
            loop {
                match packets.next() {
                    Some((stream, packet)) if stream.index() == stream_index => {
                        return Some(packet)
                    }
                    Some(_) => continue,
                    None => return None,
                }
            }
        }

        /// Feed one packet and try to pull one frame out of the decoder.
        /// `false` means no frame came out of this packet, either because
        /// the decoder needs more input or because the packet failed to
        /// decode; both are skipped silently and the caller moves on.
        fn decode_packet(&mut self, packet: &ffmpeg::Packet) -> bool {
            if let Err(e) = self.decoder.send_packet(packet) {
                debug!("Skipping undecodable packet: {}", e);
                return false;
            }
            self.decoder.receive_frame(&mut self.raw_frame).is_ok()
        }

        /// The scaler is created on first use: some streams only report a
        /// usable pixel format once the first frame has been decoded.
        fn ensure_scaler(&mut self, src_format: ffmpeg::format::Pixel) -> Result<()> {
            let needs_recreate = self
                .scaler
                .as_ref()
                .map_or(true, |s| s.input().format != src_format);

            if needs_recreate {
                let scaler = ffmpeg::software::scaling::Context::get(
                    src_format,
                    self.width,
                    self.height,
                    ffmpeg::format::Pixel::RGB24,
                    self.width,
                    self.height,
                    ffmpeg::software::scaling::Flags::BILINEAR,
                )
                .map_err(|e| MediaError::DecoderError(format!("Failed to create scaler: {}", e)))?;
                self.scaler = Some(scaler);
            }

            Ok(())
        }

        /// Convert the raw frame to RGB24 and copy it out row by row,
        /// dropping any stride padding.
        fn convert_frame(&mut self) -> Result<DecodedFrame> {
            self.ensure_scaler(self.raw_frame.format())?;
            let scaler = self
                .scaler
                .as_mut()
                .ok_or_else(|| MediaError::DecoderError("Scaler not initialized".to_string()))?;

            scaler
                .run(&self.raw_frame, &mut self.rgb_frame)
                .map_err(|e| MediaError::DecoderError(format!("Scaling failed: {}", e)))?;

            let width = self.width as usize;
            let height = self.height as usize;
            let stride = self.rgb_frame.stride(0);
            let src = self.rgb_frame.data(0);

            let mut data = Vec::with_capacity(width * height * 3);
            for y in 0..height {
                let row_start = y * stride;
                data.extend_from_slice(&src[row_start..row_start + width * 3]);
            }

            let pts = self
                .raw_frame
                .timestamp()
                .map(|ts| ts as f64 * self.time_base);

            Ok(DecodedFrame {
                data,
                width: self.width,
                height: self.height,
                pts,
            })
        }
    }

    impl VideoDecoder for FFmpegDecoder {
        fn resolution(&self) -> (u32, u32) {
            (self.width, self.height)
        }

        fn duration(&self) -> f64 {
            self.duration
        }

        fn next_frame(&mut self) -> Result<DecodedFrame> {
            loop {
                let packet = match self.read_video_packet() {
                    Some(packet) => packet,
                    None => return Err(MediaError::EndOfStream),
                };

                if self.decode_packet(&packet) {
                    return self.convert_frame();
                }
            }
        }

        fn seek(&mut self, position_secs: f64) -> Result<()> {
            // Input::seek expects AV_TIME_BASE units; the open-ended lower
            // bound biases towards the keyframe at or before the target.
            let timestamp = (position_secs * AV_TIME_BASE_F) as i64;
            self.input
                .seek(timestamp, ..timestamp)
                .map_err(|e| MediaError::SeekError(e.to_string()))?;

            // Discard frames buffered from before the jump
            self.decoder.flush();
            debug!("Seeked to {:.3}s", position_secs);
            Ok(())
        }
    }
}

#[cfg(feature = "ffmpeg")]
pub use ffmpeg_impl::FFmpegDecoder;

// ============================================================================
// Test pattern decoder
// ============================================================================

/// Synthetic video source producing gradient RGB frames.
///
/// Frames carry exact timestamps derived from the frame index, which makes
/// the playback engine fully testable without media files or FFmpeg.
pub struct TestPatternDecoder {
    width: u32,
    height: u32,
    fps: f64,
    frame_count: usize,
    current_frame: usize,
}

impl TestPatternDecoder {
    /// Create a pattern source of the given size, duration (seconds) and
    /// native frame rate.
    pub fn new(width: u32, height: u32, duration_secs: f64, fps: f64) -> Self {
        let frame_count = (duration_secs * fps).round() as usize;
        Self {
            width,
            height,
            fps,
            frame_count,
            current_frame: 0,
        }
    }

    fn render(&self, index: usize) -> Vec<u8> {
        let w = self.width as usize;
        let h = self.height as usize;
        let shift = (index % 256) as u8;

        let mut data = Vec::with_capacity(w * h * 3);
        for y in 0..h {
            let g = ((y * 255) / h.max(1)) as u8;
            for x in 0..w {
                let r = ((x * 255) / w.max(1)) as u8;
                data.push(r.wrapping_add(shift));
                data.push(g);
                data.push(shift);
            }
        }
        data
    }
}

impl VideoDecoder for TestPatternDecoder {
    fn resolution(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn duration(&self) -> f64 {
        self.frame_count as f64 / self.fps
    }

    fn next_frame(&mut self) -> Result<DecodedFrame> {
        if self.current_frame >= self.frame_count {
            return Err(MediaError::EndOfStream);
        }

        let index = self.current_frame;
        self.current_frame += 1;

        Ok(DecodedFrame {
            data: self.render(index),
            width: self.width,
            height: self.height,
            pts: Some(index as f64 / self.fps),
        })
    }

    fn seek(&mut self, position_secs: f64) -> Result<()> {
        // Negative targets saturate to 0; targets past the end land on EOF.
        let target = (position_secs.max(0.0) * self.fps) as usize;
        self.current_frame = target.min(self.frame_count);
        Ok(())
    }
}
