//! Maps performance time onto playlist time.
//!
//! The manager owns the playback state machine (stopped / playing / paused,
//! signed speed, loop-at-end) and hands out *playing intervals*: maximal
//! half-open performance-time ranges over which speed and direction are
//! constant. The audio playhead consumes intervals under a timed lock; the
//! coordinator steers the state and collects deferred seek notifications.

use std::sync::Arc;
use std::time::Duration;

use log::{debug, error};
use parking_lot::{Mutex, MutexGuard};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayMode {
    Stopped,
    Playing,
    Paused,
}

/// One playing interval: `[start_time, end_time)` in performance time maps
/// onto `[x_start_time, x_end_time)` in playlist time at constant `speed`.
/// `speed` is signed; zero means paused (silence).
#[derive(Debug, Clone, Copy)]
pub struct PlayingInterval {
    pub start_time: i64,
    pub end_time: i64,
    pub x_start_time: i64,
    pub x_end_time: i64,
    pub speed: f64,
}

struct ManagerState {
    play_mode: PlayMode,
    /// Nominal signed speed while playing.
    speed: f64,
    /// Video frame rate used for frame <-> time conversions.
    frame_rate: f64,
    /// Playlist duration in microseconds.
    duration: i64,
    looping: bool,
    /// Playlist time at `anchor_time`.
    position: i64,
    /// Performance time at which `position` was established.
    anchor_time: i64,
    current_audio_time: i64,
    end_reached: bool,
    pending_seek_notifications: Vec<i64>,
}

impl ManagerState {
    /// Playlist time at performance time `time`, not clamped.
    fn playlist_time_at(&self, time: i64) -> i64 {
        match self.play_mode {
            PlayMode::Playing => {
                self.position + ((time - self.anchor_time) as f64 * self.speed) as i64
            }
            _ => self.position,
        }
    }

    fn clamped_position_at(&self, time: i64) -> i64 {
        self.playlist_time_at(time).clamp(0, self.duration)
    }

    fn frame_for_time(&self, time: i64) -> i64 {
        (time as f64 * self.frame_rate / 1_000_000.0) as i64
    }

    fn time_for_frame(&self, frame: i64) -> i64 {
        if self.frame_rate <= 0.0 {
            return 0;
        }
        (frame as f64 * 1_000_000.0 / self.frame_rate) as i64
    }
}

pub struct PlaybackManager {
    state: Mutex<ManagerState>,
}

/// Held across one interval walk; mirrors the audio thread's pattern of
/// acquiring the manager once per buffer.
pub struct PlaybackLock<'a>(MutexGuard<'a, ManagerState>);

impl PlaybackManager {
    pub fn new() -> Arc<PlaybackManager> {
        Arc::new(PlaybackManager {
            state: Mutex::new(ManagerState {
                play_mode: PlayMode::Stopped,
                speed: 1.0,
                frame_rate: 25.0,
                duration: 0,
                looping: false,
                position: 0,
                anchor_time: 0,
                current_audio_time: 0,
                end_reached: false,
                pending_seek_notifications: Vec::new(),
            }),
        })
    }

    pub fn lock(&self) -> PlaybackLock<'_> {
        PlaybackLock(self.state.lock())
    }

    pub fn lock_with_timeout(&self, timeout: Duration) -> Option<PlaybackLock<'_>> {
        self.state.try_lock_for(timeout).map(PlaybackLock)
    }

    /// Re-initializes for a new item: stopped at position zero.
    pub fn init(&self, frame_rate: f64, duration: i64) {
        let mut state = self.state.lock();
        state.play_mode = PlayMode::Stopped;
        state.frame_rate = frame_rate;
        state.duration = duration;
        state.position = 0;
        state.anchor_time = state.current_audio_time;
        state.end_reached = false;
        state.pending_seek_notifications.clear();
    }

    pub fn set_looping(&self, looping: bool) {
        self.state.lock().looping = looping;
    }

    /// Updates the stop frame without resetting the position.
    pub fn set_duration(&self, duration: i64) {
        self.state.lock().duration = duration;
    }

    pub fn set_frame_rate(&self, frame_rate: f64) {
        self.state.lock().frame_rate = frame_rate;
    }

    pub fn set_speed(&self, speed: f64) {
        let mut state = self.state.lock();
        let now = state.current_audio_time;
        state.position = state.clamped_position_at(now);
        state.anchor_time = now;
        state.speed = speed;
    }

    pub fn speed(&self) -> f64 {
        self.state.lock().speed
    }

    pub fn play_mode(&self) -> PlayMode {
        self.state.lock().play_mode
    }

    pub fn start_playing(&self) {
        let mut state = self.state.lock();
        if state.play_mode == PlayMode::Playing {
            return;
        }
        if state.end_reached || state.position >= state.duration {
            state.position = 0;
            state.end_reached = false;
        }
        state.anchor_time = state.current_audio_time;
        state.play_mode = PlayMode::Playing;
    }

    pub fn pause_playing(&self) {
        let mut state = self.state.lock();
        if state.play_mode != PlayMode::Playing {
            return;
        }
        let now = state.current_audio_time;
        state.position = state.clamped_position_at(now);
        state.anchor_time = now;
        state.play_mode = PlayMode::Paused;
    }

    pub fn stop_playing(&self) {
        let mut state = self.state.lock();
        state.play_mode = PlayMode::Stopped;
        state.position = 0;
        state.anchor_time = state.current_audio_time;
        state.end_reached = false;
    }

    /// Performs a seek to a video frame. The confirmation is delivered
    /// asynchronously through `drain_seek_notifications`.
    pub fn set_current_frame(&self, frame: i64) {
        let mut state = self.state.lock();
        state.position = state.time_for_frame(frame).clamp(0, state.duration);
        state.anchor_time = state.current_audio_time;
        state.end_reached = false;
        state.pending_seek_notifications.push(frame);
        debug!("PlaybackManager::set_current_frame({})", frame);
    }

    /// The playlist frame at the current audio time.
    pub fn current_frame(&self) -> i64 {
        let state = self.state.lock();
        let position = state.clamped_position_at(state.current_audio_time);
        state.frame_for_time(position)
    }

    /// Playlist time at the current audio time, in microseconds.
    pub fn position(&self) -> i64 {
        let state = self.state.lock();
        state.clamped_position_at(state.current_audio_time)
    }

    /// Seek confirmations queued since the last call, oldest first.
    pub fn drain_seek_notifications(&self) -> Vec<i64> {
        std::mem::take(&mut self.state.lock().pending_seek_notifications)
    }

    /// Whether the stop frame was reached since the last call.
    pub fn take_end_reached(&self) -> bool {
        std::mem::replace(&mut self.state.lock().end_reached, false)
    }
}

impl PlaybackLock<'_> {
    /// Returns the next playing interval starting at `start_time`; on
    /// return, `end_time` is shrunk to where speed or direction changes.
    /// `[x_start_time, x_end_time)` is the corresponding playlist range.
    pub fn get_playlist_time_interval(
        &mut self,
        start_time: i64,
        end_time: &mut i64,
        x_start_time: &mut i64,
        x_end_time: &mut i64,
        speed: &mut f64,
    ) {
        let state = &mut *self.0;

        if state.play_mode != PlayMode::Playing {
            *x_start_time = state.position;
            *x_end_time = state.position;
            *speed = 0.0;
            return;
        }

        let s = state.speed;
        let x_start = state.playlist_time_at(start_time);
        let limit = if s >= 0.0 { state.duration } else { 0 };

        // Performance time at which playback runs into the stop frame.
        let time_at_limit = if s == 0.0 {
            i64::MAX
        } else {
            state.anchor_time + ((limit - state.position) as f64 / s) as i64
        };

        if time_at_limit <= start_time {
            // Already at the end: pin the position and report silence.
            if state.looping {
                state.position = if s >= 0.0 { 0 } else { state.duration };
                state.anchor_time = start_time;
                return self.get_playlist_time_interval(
                    start_time,
                    end_time,
                    x_start_time,
                    x_end_time,
                    speed,
                );
            }
            state.play_mode = PlayMode::Paused;
            state.position = limit;
            state.end_reached = true;
            *x_start_time = limit;
            *x_end_time = limit;
            *speed = 0.0;
            return;
        }

        *x_start_time = x_start;
        if time_at_limit < *end_time {
            *end_time = time_at_limit;
            *x_end_time = limit;
        } else {
            *x_end_time = state.playlist_time_at(*end_time);
        }
        *speed = s;
    }

    /// Tells the manager how far the audio node has produced output.
    pub fn set_current_audio_time(&mut self, time: i64) {
        self.0.current_audio_time = time;
    }
}

/// Collects the playing intervals covering `[start_time, end_time)`, the
/// way the audio playhead walks them. Returns `None` on an internal error
/// (a zero-duration interval).
pub fn collect_playing_intervals(
    lock: &mut PlaybackLock<'_>,
    start_time: i64,
    end_time: i64,
) -> Option<Vec<PlayingInterval>> {
    let mut intervals = Vec::new();
    let mut interval_start = start_time;
    while interval_start < end_time {
        let mut interval = PlayingInterval {
            start_time: interval_start,
            end_time,
            x_start_time: 0,
            x_end_time: 0,
            speed: 0.0,
        };
        lock.get_playlist_time_interval(
            interval.start_time,
            &mut interval.end_time,
            &mut interval.x_start_time,
            &mut interval.x_end_time,
            &mut interval.speed,
        );
        if interval_start == interval.end_time {
            error!(
                "collect_playing_intervals() - zero duration audio interval! \
                 start time: {}",
                interval_start
            );
            return None;
        }
        interval_start = interval.end_time;
        intervals.push(interval);
    }
    Some(intervals)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager_with_duration(duration: i64) -> Arc<PlaybackManager> {
        let manager = PlaybackManager::new();
        manager.init(25.0, duration);
        manager
    }

    fn intervals(
        manager: &PlaybackManager,
        start: i64,
        end: i64,
    ) -> Vec<PlayingInterval> {
        let mut lock = manager.lock();
        let intervals = collect_playing_intervals(&mut lock, start, end).unwrap();
        lock.set_current_audio_time(end);
        intervals
    }

    #[test]
    fn stopped_playback_is_one_silent_interval() {
        let manager = manager_with_duration(10_000_000);
        let got = intervals(&manager, 0, 1_000_000);
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].speed, 0.0);
        assert_eq!(got[0].end_time, 1_000_000);
    }

    #[test]
    fn playing_maps_performance_onto_playlist_time() {
        let manager = manager_with_duration(10_000_000);
        manager.start_playing();
        let got = intervals(&manager, 0, 1_000_000);
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].speed, 1.0);
        assert_eq!(got[0].x_start_time, 0);
        assert_eq!(got[0].x_end_time, 1_000_000);

        // The next buffer continues where the last one left off.
        let got = intervals(&manager, 1_000_000, 2_000_000);
        assert_eq!(got[0].x_start_time, 1_000_000);
    }

    #[test]
    fn interval_splits_at_the_stop_frame() {
        let manager = manager_with_duration(1_500_000);
        manager.start_playing();
        let got = intervals(&manager, 0, 2_000_000);
        assert_eq!(got.len(), 2);
        assert_eq!(got[0].speed, 1.0);
        assert_eq!(got[0].end_time, 1_500_000);
        assert_eq!(got[0].x_end_time, 1_500_000);
        assert_eq!(got[1].speed, 0.0);
        assert_eq!(got[1].end_time, 2_000_000);
        assert!(manager.take_end_reached());
        assert!(!manager.take_end_reached());
        assert_eq!(manager.play_mode(), PlayMode::Paused);
    }

    #[test]
    fn seek_defers_its_notification() {
        let manager = manager_with_duration(10_000_000);
        manager.set_current_frame(100);
        manager.set_current_frame(200);
        assert_eq!(manager.drain_seek_notifications(), vec![100, 200]);
        assert!(manager.drain_seek_notifications().is_empty());
        // 200 frames at 25 fps = 8 s.
        assert_eq!(manager.position(), 8_000_000);
    }

    #[test]
    fn pause_freezes_the_position() {
        let manager = manager_with_duration(10_000_000);
        manager.start_playing();
        let _ = intervals(&manager, 0, 500_000);
        manager.pause_playing();
        assert_eq!(manager.position(), 500_000);
        let got = intervals(&manager, 500_000, 600_000);
        assert_eq!(got[0].speed, 0.0);
        assert_eq!(manager.position(), 500_000);
    }

    #[test]
    fn looping_wraps_instead_of_stopping() {
        let manager = manager_with_duration(1_000_000);
        manager.set_looping(true);
        manager.start_playing();
        let got = intervals(&manager, 0, 1_500_000);
        assert_eq!(got.len(), 2);
        assert_eq!(got[0].x_end_time, 1_000_000);
        assert_eq!(got[1].x_start_time, 0);
        assert_eq!(got[1].speed, 1.0);
        assert!(!manager.take_end_reached());
    }
}
