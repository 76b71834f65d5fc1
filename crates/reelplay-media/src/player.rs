//! Playback engine
//!
//! `VideoPlayer` drives a `VideoDecoder` on a dedicated worker thread, one
//! worker per open session. The controller thread issues transport commands
//! and reads position/state; the worker does all blocking I/O and decode
//! work, publishes events over a channel, and paces frame delivery to a
//! 30 fps ceiling regardless of the source's native rate.
//!
//! All mutable engine state sits behind a single `parking_lot::Mutex`, held
//! only across individual command operations and individual loop steps.
//! It is never held across a pacing sleep or an event send, so a consumer
//! callback can re-enter the engine without deadlocking.

use crate::decoder::VideoDecoder;
use crate::{MediaError, Result};
use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender, TryRecvError};
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info};

#[cfg(feature = "ffmpeg")]
use crate::decoder::FFmpegDecoder;
#[cfg(feature = "ffmpeg")]
use std::path::Path;

/// Frame publication is capped at 30 events per second; this is the
/// engine's own ceiling, not stream-rate synchronization.
const FRAME_INTERVAL: Duration = Duration::from_millis(1000 / 30);

/// How long the worker waits for a command while not playing. Bounds the
/// responsiveness of `play` after a pause and of `close_file`.
const COMMAND_POLL: Duration = Duration::from_millis(100);

/// Engine state, mutated only while holding the shared lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    /// No session open.
    Idle,
    /// Transient, only while `open_file` is in flight.
    Opening,
    /// Session open, decode loop not advancing.
    Stopped,
    /// Decode loop advancing.
    Playing,
    /// Worker alive but the loop holds position.
    Paused,
    /// Terminal for the current session; cleared by a fresh `open_file`.
    Error,
}

/// Events published by the engine, in worker-generation order.
///
/// Frame data is an independent copy; the engine's internal buffers are
/// reused immediately after publication.
#[derive(Debug, Clone)]
pub enum PlayerEvent {
    FrameReady {
        data: Vec<u8>,
        width: u32,
        height: u32,
    },
    PositionChanged(f64),
    PlaybackFinished,
    Error(String),
}

enum Command {
    Stop(Sender<()>),
    Seek(f64, Sender<()>),
    Close,
}

#[derive(PartialEq)]
enum Flow {
    Continue,
    Exit,
}

struct StreamInfo {
    width: u32,
    height: u32,
    duration: f64,
}

/// Session-scoped and engine-lifetime state behind the single engine lock.
struct Shared {
    state: PlaybackState,
    position: f64,
    duration: f64,
    width: u32,
    height: u32,
    path: Option<PathBuf>,
}

impl Shared {
    fn new() -> Self {
        Self {
            state: PlaybackState::Idle,
            position: 0.0,
            duration: 0.0,
            width: 0,
            height: 0,
            path: None,
        }
    }

    fn reset_session(&mut self) {
        self.state = PlaybackState::Idle;
        self.position = 0.0;
        self.duration = 0.0;
        self.width = 0;
        self.height = 0;
        self.path = None;
    }
}

/// Single-stream video playback engine.
///
/// One background decode worker per open session; exactly one concurrent
/// execution of the decode loop. The worker owns the decoder for the whole
/// open/close cycle, so decoder internals never cross threads.
pub struct VideoPlayer {
    shared: Arc<Mutex<Shared>>,
    event_tx: Sender<PlayerEvent>,
    event_rx: Receiver<PlayerEvent>,
    cmd_tx: Option<Sender<Command>>,
    worker: Option<JoinHandle<()>>,
}

impl VideoPlayer {
    pub fn new() -> Self {
        let (event_tx, event_rx) = unbounded();
        Self {
            shared: Arc::new(Mutex::new(Shared::new())),
            event_tx,
            event_rx,
            cmd_tx: None,
            worker: None,
        }
    }

    /// Receiver for engine events. The channel outlives individual
    /// sessions; take one receiver and drain it, since cloned receivers
    /// compete for messages.
    pub fn events(&self) -> Receiver<PlayerEvent> {
        self.event_rx.clone()
    }

    /// Open a media file, replacing any previous session.
    ///
    /// Probes the container, selects the best video stream and sizes the
    /// frame buffers before returning. On failure the engine is left in
    /// `Error` with all partial resources released, and a single
    /// `PlayerEvent::Error` reports the cause.
    #[cfg(feature = "ffmpeg")]
    pub fn open_file<P: AsRef<Path>>(&mut self, path: P) -> bool {
        let path = path.as_ref().to_path_buf();
        let open_path = path.clone();
        let ok = self.open_with(move || {
            FFmpegDecoder::open(&open_path).map(|d| Box::new(d) as Box<dyn VideoDecoder>)
        });
        if ok {
            self.shared.lock().path = Some(path);
        }
        ok
    }

    #[cfg(not(feature = "ffmpeg"))]
    pub fn open_file<P: AsRef<std::path::Path>>(&mut self, _path: P) -> bool {
        self.open_with(|| {
            Err(MediaError::DecoderError(
                "Built without the 'ffmpeg' feature".to_string(),
            ))
        })
    }

    /// Open a session from any decoder source.
    ///
    /// The factory runs on the worker thread, so the decoder itself does
    /// not need to be `Send`.
    pub fn open_with<F>(&mut self, factory: F) -> bool
    where
        F: FnOnce() -> Result<Box<dyn VideoDecoder>> + Send + 'static,
    {
        self.close_file();
        self.shared.lock().state = PlaybackState::Opening;

        let (cmd_tx, cmd_rx) = unbounded();
        let (ready_tx, ready_rx) = bounded::<Result<StreamInfo>>(1);
        let shared = Arc::clone(&self.shared);
        let events = self.event_tx.clone();

        let handle = thread::Builder::new()
            .name("decode-worker".to_string())
            .spawn(move || {
                let decoder = match factory() {
                    Ok(decoder) => decoder,
                    Err(e) => {
                        // Partial open state unwinds here, inside the worker
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                let (width, height) = decoder.resolution();
                let duration = decoder.duration();
                let _ = ready_tx.send(Ok(StreamInfo {
                    width,
                    height,
                    duration,
                }));
                session_loop(decoder, shared, events, cmd_rx);
            })
            .expect("Failed to spawn decode worker");

        let ready = ready_rx
            .recv()
            .unwrap_or_else(|_| Err(MediaError::DecoderError("decode worker died".to_string())));

        match ready {
            Ok(info) => {
                self.cmd_tx = Some(cmd_tx);
                self.worker = Some(handle);
                let mut s = self.shared.lock();
                s.state = PlaybackState::Stopped;
                s.duration = info.duration;
                s.width = info.width;
                s.height = info.height;
                true
            }
            Err(e) => {
                let _ = handle.join();
                self.shared.lock().state = PlaybackState::Error;
                error!("Open failed: {}", e);
                let _ = self.event_tx.send(PlayerEvent::Error(e.to_string()));
                false
            }
        }
    }

    /// Start or resume playback. Idempotent while playing; a no-op without
    /// an open session.
    pub fn play(&self) {
        let mut s = self.shared.lock();
        match s.state {
            PlaybackState::Stopped | PlaybackState::Paused => s.state = PlaybackState::Playing,
            _ => {}
        }
    }

    /// Pause playback; the worker stays alive and stops consuming packets.
    pub fn pause(&self) {
        let mut s = self.shared.lock();
        if s.state == PlaybackState::Playing {
            s.state = PlaybackState::Paused;
        }
    }

    /// Halt playback, rewind the container to its start and reset the
    /// position to 0. Blocks until the worker has acknowledged, so position
    /// and state are settled on return.
    pub fn stop(&self) {
        if let Some(cmd_tx) = &self.cmd_tx {
            let (ack_tx, ack_rx) = bounded(1);
            if cmd_tx.send(Command::Stop(ack_tx)).is_ok() {
                let _ = ack_rx.recv();
            }
        }
    }

    /// Best-effort, keyframe-aligned reposition. Valid in any state with an
    /// open session; adapter failures leave the position unchanged. The
    /// target is passed through unclamped.
    pub fn seek(&self, position_secs: f64) {
        if let Some(cmd_tx) = &self.cmd_tx {
            let (ack_tx, ack_rx) = bounded(1);
            if cmd_tx.send(Command::Seek(position_secs, ack_tx)).is_ok() {
                let _ = ack_rx.recv();
            }
        }
    }

    /// Close the current session: stop the worker, release the decoder and
    /// reset all session-scoped state. Unconditional and idempotent.
    pub fn close_file(&mut self) {
        if let Some(cmd_tx) = self.cmd_tx.take() {
            let _ = cmd_tx.send(Command::Close);
        }
        if let Some(worker) = self.worker.take() {
            // Worker drops the decoder (scaler, then codec, then container)
            // before exiting; after the join nothing session-scoped remains.
            let _ = worker.join();
        }
        self.shared.lock().reset_session();
    }

    /// Container duration in seconds.
    pub fn duration(&self) -> f64 {
        self.shared.lock().duration
    }

    /// Current playback position in seconds.
    pub fn position(&self) -> f64 {
        self.shared.lock().position
    }

    /// Video dimensions of the open session, `(0, 0)` when idle.
    pub fn resolution(&self) -> (u32, u32) {
        let s = self.shared.lock();
        (s.width, s.height)
    }

    /// Path of the open session's file.
    pub fn current_file(&self) -> Option<PathBuf> {
        self.shared.lock().path.clone()
    }

    pub fn state(&self) -> PlaybackState {
        self.shared.lock().state
    }

    pub fn is_playing(&self) -> bool {
        self.state() == PlaybackState::Playing
    }

    pub fn is_paused(&self) -> bool {
        self.state() == PlaybackState::Paused
    }
}

impl Default for VideoPlayer {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for VideoPlayer {
    fn drop(&mut self) {
        self.close_file();
    }
}

/// The decode loop. Runs on the worker thread for the lifetime of one
/// session; exits only on `Close` or when the controller side is gone.
fn session_loop(
    mut decoder: Box<dyn VideoDecoder>,
    shared: Arc<Mutex<Shared>>,
    events: Sender<PlayerEvent>,
    commands: Receiver<Command>,
) {
    info!("Decode worker started");
    let mut last_publish: Option<Instant> = None;

    'outer: loop {
        let playing = shared.lock().state == PlaybackState::Playing;

        if !playing {
            // Paused, stopped or errored: hold position, wait for commands
            match commands.recv_timeout(COMMAND_POLL) {
                Ok(cmd) => {
                    if handle_command(cmd, decoder.as_mut(), &shared, &events) == Flow::Exit {
                        break;
                    }
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
            continue;
        }

        // Apply pending transport commands before decoding the next packet
        loop {
            match commands.try_recv() {
                Ok(cmd) => {
                    if handle_command(cmd, decoder.as_mut(), &shared, &events) == Flow::Exit {
                        break 'outer;
                    }
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => break 'outer,
            }
        }
        if shared.lock().state != PlaybackState::Playing {
            continue;
        }

        match decoder.next_frame() {
            Ok(frame) => {
                // Sleep off the remainder of the frame interval measured
                // from the previous publish
                if let Some(last) = last_publish {
                    let elapsed = last.elapsed();
                    if elapsed < FRAME_INTERVAL {
                        thread::sleep(FRAME_INTERVAL - elapsed);
                    }
                }
                last_publish = Some(Instant::now());

                if let Some(pts) = frame.pts {
                    shared.lock().position = pts;
                    let _ = events.send(PlayerEvent::PositionChanged(pts));
                }
                let _ = events.send(PlayerEvent::FrameReady {
                    data: frame.data,
                    width: frame.width,
                    height: frame.height,
                });
            }
            Err(MediaError::EndOfStream) => {
                shared.lock().state = PlaybackState::Stopped;
                let _ = events.send(PlayerEvent::PlaybackFinished);
                info!("Playback finished");
            }
            Err(e) => {
                shared.lock().state = PlaybackState::Error;
                error!("Decode failed: {}", e);
                let _ = events.send(PlayerEvent::Error(e.to_string()));
            }
        }
    }

    info!("Decode worker stopped");
}

fn handle_command(
    cmd: Command,
    decoder: &mut dyn VideoDecoder,
    shared: &Mutex<Shared>,
    events: &Sender<PlayerEvent>,
) -> Flow {
    match cmd {
        Command::Stop(ack) => {
            // Rewind and flush so the next play starts clean; best-effort
            // like every other seek
            if let Err(e) = decoder.seek(0.0) {
                debug!("Rewind on stop failed: {}", e);
            }
            {
                let mut s = shared.lock();
                s.position = 0.0;
                if s.state != PlaybackState::Error {
                    s.state = PlaybackState::Stopped;
                }
            }
            let _ = events.send(PlayerEvent::PositionChanged(0.0));
            let _ = ack.send(());
            Flow::Continue
        }
        Command::Seek(target, ack) => {
            match decoder.seek(target) {
                Ok(()) => {
                    // Optimistic: the next decoded frame corrects this to
                    // the actual keyframe-aligned timestamp
                    shared.lock().position = target;
                    let _ = events.send(PlayerEvent::PositionChanged(target));
                }
                Err(e) => debug!("Seek to {:.3}s failed, position unchanged: {}", target, e),
            }
            let _ = ack.send(());
            Flow::Continue
        }
        Command::Close => Flow::Exit,
    }
}
