//! End-to-end playback engine tests against the synthetic pattern source.

use reelplay_media::{
    MediaError, PlaybackState, PlayerEvent, TestPatternDecoder, VideoDecoder, VideoPlayer,
};
use std::time::{Duration, Instant};

const EVENT_TIMEOUT: Duration = Duration::from_secs(2);

fn open_pattern(player: &mut VideoPlayer, width: u32, height: u32, duration: f64, fps: f64) {
    let ok = player.open_with(move || {
        Ok(Box::new(TestPatternDecoder::new(width, height, duration, fps))
            as Box<dyn VideoDecoder>)
    });
    assert!(ok, "pattern source should always open");
}

fn recv_frame(events: &crossbeam_channel::Receiver<PlayerEvent>) -> (Vec<u8>, u32, u32) {
    let deadline = Instant::now() + EVENT_TIMEOUT;
    while Instant::now() < deadline {
        match events.recv_timeout(EVENT_TIMEOUT) {
            Ok(PlayerEvent::FrameReady {
                data,
                width,
                height,
            }) => return (data, width, height),
            Ok(PlayerEvent::Error(msg)) => panic!("unexpected error event: {}", msg),
            Ok(_) => continue,
            Err(e) => panic!("no frame event: {}", e),
        }
    }
    panic!("no frame event before deadline");
}

#[test]
fn open_reports_metadata_and_stopped_state() {
    let mut player = VideoPlayer::new();
    open_pattern(&mut player, 320, 240, 10.0, 30.0);

    assert_eq!(player.state(), PlaybackState::Stopped);
    assert!((player.duration() - 10.0).abs() < 0.05);
    assert_eq!(player.resolution(), (320, 240));
    assert!(!player.is_playing());
    assert!(!player.is_paused());
}

#[test]
fn playback_delivers_frames_then_finishes() {
    let mut player = VideoPlayer::new();
    let events = player.events();
    open_pattern(&mut player, 320, 240, 0.2, 30.0);

    player.play();
    assert!(player.is_playing());

    let mut frames = 0;
    let mut finished = false;
    let deadline = Instant::now() + EVENT_TIMEOUT;
    while Instant::now() < deadline {
        match events.recv_timeout(EVENT_TIMEOUT) {
            Ok(PlayerEvent::FrameReady { width, height, data }) => {
                // Delivered dimensions always match the session's
                assert_eq!((width, height), (320, 240));
                assert_eq!(data.len(), 320 * 240 * 3);
                frames += 1;
            }
            Ok(PlayerEvent::PlaybackFinished) => {
                finished = true;
                break;
            }
            Ok(PlayerEvent::Error(msg)) => panic!("unexpected error event: {}", msg),
            Ok(PlayerEvent::PositionChanged(_)) => {}
            Err(e) => panic!("event stream stalled: {}", e),
        }
    }

    assert!(finished, "expected a finished event");
    assert!(frames >= 1, "expected at least one frame");
    assert_eq!(player.state(), PlaybackState::Stopped);
}

#[test]
fn position_precedes_frame_for_timestamped_frames() {
    let mut player = VideoPlayer::new();
    let events = player.events();
    open_pattern(&mut player, 64, 64, 1.0, 30.0);

    player.play();

    match events.recv_timeout(EVENT_TIMEOUT) {
        Ok(PlayerEvent::PositionChanged(pos)) => assert!(pos.abs() < 1e-9),
        other => panic!("expected position first, got {:?}", other),
    }
    match events.recv_timeout(EVENT_TIMEOUT) {
        Ok(PlayerEvent::FrameReady { .. }) => {}
        other => panic!("expected frame second, got {:?}", other),
    }
}

#[test]
fn frame_rate_is_capped_at_30fps() {
    let mut player = VideoPlayer::new();
    let events = player.events();
    // 60 fps source; publication must still be spaced >= ~33ms
    open_pattern(&mut player, 64, 64, 5.0, 60.0);

    let started = Instant::now();
    player.play();

    let mut frames = 0;
    while frames < 4 {
        let _ = recv_frame(&events);
        frames += 1;
    }

    // Three full pacing intervals between the four publishes
    assert!(
        started.elapsed() >= Duration::from_millis(95),
        "frames arrived faster than the 30 fps ceiling: {:?}",
        started.elapsed()
    );
}

#[test]
fn pause_holds_frames_and_play_resumes() {
    let mut player = VideoPlayer::new();
    let events = player.events();
    open_pattern(&mut player, 64, 64, 30.0, 30.0);

    player.play();
    let _ = recv_frame(&events);

    player.pause();
    assert!(player.is_paused());
    assert!(!player.is_playing());

    // Let the worker observe the pause, then discard anything in flight
    std::thread::sleep(Duration::from_millis(150));
    while events.try_recv().is_ok() {}

    // No frame events while paused
    match events.recv_timeout(Duration::from_millis(300)) {
        Err(_) => {}
        Ok(event) => panic!("event delivered while paused: {:?}", event),
    }

    // Resuming needs no new open
    player.play();
    assert!(player.is_playing());
    let _ = recv_frame(&events);
}

#[test]
fn stop_resets_position_from_any_state() {
    let mut player = VideoPlayer::new();
    let events = player.events();
    open_pattern(&mut player, 64, 64, 30.0, 30.0);

    // Stop while playing
    player.play();
    let _ = recv_frame(&events);
    player.stop();
    assert_eq!(player.state(), PlaybackState::Stopped);
    assert_eq!(player.position(), 0.0);

    // Stop while paused
    player.play();
    let _ = recv_frame(&events);
    player.pause();
    player.stop();
    assert_eq!(player.state(), PlaybackState::Stopped);
    assert_eq!(player.position(), 0.0);

    // Stop while already stopped
    player.stop();
    assert_eq!(player.state(), PlaybackState::Stopped);
    assert_eq!(player.position(), 0.0);

    // Playback restarts from the beginning after a stop
    while events.try_recv().is_ok() {}
    player.play();
    let deadline = Instant::now() + EVENT_TIMEOUT;
    loop {
        assert!(Instant::now() < deadline, "no position after restart");
        if let Ok(PlayerEvent::PositionChanged(pos)) = events.recv_timeout(EVENT_TIMEOUT) {
            assert!(pos < 0.5, "restart did not rewind, position {}", pos);
            break;
        }
    }
}

#[test]
fn seek_updates_position_and_keeps_duration() {
    let mut player = VideoPlayer::new();
    let events = player.events();
    open_pattern(&mut player, 64, 64, 10.0, 30.0);

    // Seek while stopped
    player.seek(5.0);
    assert!((player.position() - 5.0).abs() < 0.1);
    assert!((player.duration() - 10.0).abs() < 0.05);
    assert_eq!(player.state(), PlaybackState::Stopped);

    // Position reporting continues from the seek target
    player.play();
    let deadline = Instant::now() + EVENT_TIMEOUT;
    loop {
        assert!(Instant::now() < deadline, "no position after seek");
        if let Ok(PlayerEvent::PositionChanged(pos)) = events.recv_timeout(EVENT_TIMEOUT) {
            assert!(pos >= 4.9, "position did not jump to seek target: {}", pos);
            break;
        }
    }
}

#[test]
fn seek_during_playback_jumps_position() {
    let mut player = VideoPlayer::new();
    let events = player.events();
    open_pattern(&mut player, 64, 64, 10.0, 30.0);

    player.play();
    let _ = recv_frame(&events);
    let _ = recv_frame(&events);

    player.seek(5.0);
    assert!(player.position() >= 4.9);
    assert!((player.duration() - 10.0).abs() < 0.05);
    assert!(player.is_playing());
}

#[test]
fn reopen_replaces_session_and_close_resets() {
    let mut player = VideoPlayer::new();
    open_pattern(&mut player, 320, 240, 10.0, 30.0);
    assert_eq!(player.resolution(), (320, 240));

    open_pattern(&mut player, 640, 480, 4.0, 30.0);
    assert_eq!(player.resolution(), (640, 480));
    assert!((player.duration() - 4.0).abs() < 0.05);
    assert_eq!(player.state(), PlaybackState::Stopped);

    player.close_file();
    assert_eq!(player.state(), PlaybackState::Idle);
    assert_eq!(player.duration(), 0.0);
    assert_eq!(player.position(), 0.0);
    assert_eq!(player.resolution(), (0, 0));
}

#[test]
fn play_after_finish_reports_finished_again() {
    let mut player = VideoPlayer::new();
    let events = player.events();
    open_pattern(&mut player, 64, 64, 0.1, 30.0);

    for _ in 0..2 {
        player.play();
        let deadline = Instant::now() + EVENT_TIMEOUT;
        let mut finished = false;
        while Instant::now() < deadline {
            if let Ok(PlayerEvent::PlaybackFinished) = events.recv_timeout(EVENT_TIMEOUT) {
                finished = true;
                break;
            }
        }
        assert!(finished, "expected finished event");
        assert_eq!(player.state(), PlaybackState::Stopped);
    }
}

#[test]
fn open_failure_leaves_error_state() {
    let mut player = VideoPlayer::new();
    let events = player.events();

    let ok = player.open_with(|| Err(MediaError::NoVideoStream));
    assert!(!ok);
    assert_eq!(player.state(), PlaybackState::Error);
    assert!(!player.is_playing());

    match events.recv_timeout(EVENT_TIMEOUT) {
        Ok(PlayerEvent::Error(_)) => {}
        other => panic!("expected error event, got {:?}", other),
    }

    // Transport commands stay inert until a fresh open
    player.play();
    assert!(!player.is_playing());

    // A fresh open clears the error
    open_pattern(&mut player, 64, 64, 1.0, 30.0);
    assert_eq!(player.state(), PlaybackState::Stopped);
}

#[cfg(feature = "ffmpeg")]
#[test]
fn open_missing_file_reports_error() {
    let mut player = VideoPlayer::new();
    let events = player.events();

    let ok = player.open_file("/nonexistent/definitely-missing.mp4");
    assert!(!ok);
    assert!(!player.is_playing());
    assert_eq!(player.state(), PlaybackState::Error);
    assert!(player.current_file().is_none());

    match events.recv_timeout(EVENT_TIMEOUT) {
        Ok(PlayerEvent::Error(_)) => {}
        other => panic!("expected error event, got {:?}", other),
    }
}
