//! The playback coordinator: owns the supplier stack for the current item,
//! translates user intent into playback-manager work, and notifies
//! observers.

use std::sync::{Arc, Mutex};

use log::{debug, warn};
use tokio::sync::broadcast;

use crate::error::{PlayerError, Result};
use crate::media_format::{
    CodecInfo, EncodedAudioFormat, EncodedVideoFormat, FileFormatInfo, RawVideoFormat,
};
use crate::playback_manager::{PlayMode, PlaybackManager};
use crate::playlist::item::PlaylistItemRef;
use crate::protocol::{PlaybackState, PlayerEvent};
use crate::supplier::media_file::TrackSupplier;
use crate::supplier::proxy_audio::ProxyAudioSupplier;
use crate::supplier::proxy_video::ProxyVideoSupplier;

/// Seeks snap to a video keyframe only in long enough media; a fine seek in
/// short clips is cheap anyway. Tunable, not contractual.
const MIN_SNAP_DURATION_FRAMES: i64 = 240;
/// ... and only when the target is far enough from the current frame.
const MIN_SNAP_DISTANCE_FRAMES: i64 = 5;

const VOLUME_STEP: f32 = 0.05;

/// How the player behaves when it loses the foreground.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackgroundVolumeMode {
    Muted,
    HalfVolume,
    FullVolume,
}

#[derive(Default)]
struct TrackInfo {
    index: i32,
    duration: i64,
    encoded_audio: Option<EncodedAudioFormat>,
    encoded_video: Option<EncodedVideoFormat>,
    codec_info: Option<CodecInfo>,
    video_format: Option<RawVideoFormat>,
}

struct ControllerState {
    item: Option<PlaylistItemRef>,
    track_supplier: Option<Box<dyn TrackSupplier>>,

    audio_track: Option<TrackInfo>,
    video_track: Option<TrackInfo>,
    sub_titles_index: i32,

    current_frame: i64,
    duration: i64,
    video_frame_rate: f64,

    pending_seek_requests: i32,
    seek_frame: i64,
    requested_seek_frame: i64,

    volume: f32,
    active_volume: f32,
    muted: bool,

    autoplay: bool,
    autoplay_setting: bool,
    background_volume_mode: BackgroundVolumeMode,

    initialized: bool,
}

pub struct Controller {
    playback_manager: Arc<PlaybackManager>,
    audio_supplier: Arc<ProxyAudioSupplier>,
    video_supplier: Arc<ProxyVideoSupplier>,
    events: broadcast::Sender<PlayerEvent>,
    state: Mutex<ControllerState>,
}

impl Controller {
    pub fn new() -> Arc<Controller> {
        let playback_manager = PlaybackManager::new();
        let audio_supplier = ProxyAudioSupplier::new(playback_manager.clone());
        let video_supplier = ProxyVideoSupplier::new();
        let (events, _) = broadcast::channel(128);
        Arc::new(Controller {
            playback_manager,
            audio_supplier,
            video_supplier,
            events,
            state: Mutex::new(ControllerState {
                item: None,
                track_supplier: None,
                audio_track: None,
                video_track: None,
                sub_titles_index: -1,
                current_frame: 0,
                duration: 0,
                video_frame_rate: 25.0,
                pending_seek_requests: 0,
                seek_frame: -1,
                requested_seek_frame: -1,
                volume: 1.0,
                active_volume: 1.0,
                muted: false,
                autoplay: true,
                autoplay_setting: true,
                background_volume_mode: BackgroundVolumeMode::FullVolume,
                initialized: false,
            }),
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PlayerEvent> {
        self.events.subscribe()
    }

    pub fn playback_manager(&self) -> Arc<PlaybackManager> {
        self.playback_manager.clone()
    }

    pub fn audio_supplier(&self) -> Arc<ProxyAudioSupplier> {
        self.audio_supplier.clone()
    }

    pub fn video_supplier(&self) -> Arc<ProxyVideoSupplier> {
        self.video_supplier.clone()
    }

    fn emit(&self, event: PlayerEvent) {
        let _ = self.events.send(event);
    }

    pub fn set_autoplay(&self, autoplay: bool) {
        let mut state = self.state.lock().unwrap();
        state.autoplay_setting = autoplay;
        state.autoplay = autoplay;
    }

    pub fn set_background_volume_mode(&self, mode: BackgroundVolumeMode) {
        self.state.lock().unwrap().background_volume_mode = mode;
    }

    // # item loading

    /// Makes `item` the current media. Passing the current item again
    /// restarts it from the beginning (when autoplay is on).
    pub fn set_to(&self, item: Option<PlaylistItemRef>) -> Result<()> {
        {
            let state = self.state.lock().unwrap();
            let same = match (&state.item, &item) {
                (Some(current), Some(new)) => Arc::ptr_eq(current, new),
                (None, None) => true,
                _ => false,
            };
            if same && state.item.is_some() {
                if state.initialized && state.autoplay {
                    drop(state);
                    self.set_position(0.0);
                    self.play();
                }
                return Ok(());
            }
        }

        // Clear the proxies first; the audio thread may still be reading
        // from the old suppliers, and dropping them happens under the
        // proxies' locks. Only then the old track supplier can go.
        self.audio_supplier.set_supplier(None, 25.0);
        self.video_supplier.set_supplier(None);

        let old_supplier;
        {
            let mut state = self.state.lock().unwrap();
            old_supplier = state.track_supplier.take();
            state.item = item.clone();
            state.audio_track = None;
            state.video_track = None;
            state.sub_titles_index = -1;
            state.current_frame = 0;
            state.duration = 0;
            state.video_frame_rate = 25.0;
            state.pending_seek_requests = 0;
            state.seek_frame = -1;
            state.requested_seek_frame = -1;
        }
        drop(old_supplier);

        let Some(item) = item else {
            return Err(PlayerError::BadInput);
        };

        let track_supplier = match item.create_track_supplier() {
            Ok(supplier) => supplier,
            Err(error) => {
                warn!("Controller::set_to: opening failed: {}", error);
                item.set_playback_failed();
                self.emit(PlayerEvent::FileChanged {
                    item: Some(item.clone()),
                    error: Some(error.to_string()),
                });
                return Err(error);
            }
        };

        if track_supplier.count_audio_tracks() == 0 && track_supplier.count_video_tracks() == 0 {
            item.set_playback_failed();
            self.emit(PlayerEvent::FileChanged {
                item: Some(item.clone()),
                error: Some(PlayerError::NoHandler.to_string()),
            });
            return Err(PlayerError::NoHandler);
        }

        let autoplay;
        {
            let mut state = self.state.lock().unwrap();
            state.track_supplier = Some(track_supplier);

            let audio_selected = self.select_audio_track_locked(&mut state, 0).is_ok();
            let video_selected = self.select_video_track_locked(&mut state, 0).is_ok();
            if !audio_selected && !video_selected {
                debug!("Controller::set_to: no decodable audio or video tracks");
                state.track_supplier = None;
                drop(state);
                item.set_playback_failed();
                self.emit(PlayerEvent::FileChanged {
                    item: Some(item.clone()),
                    error: Some(PlayerError::NoHandler.to_string()),
                });
                return Err(PlayerError::NoHandler);
            }

            self.playback_manager
                .init(state.video_frame_rate, state.duration);
            state.initialized = true;
            autoplay = state.autoplay;
        }

        self.emit(PlayerEvent::FileChanged {
            item: Some(item),
            error: None,
        });

        if autoplay {
            self.play();
        }
        Ok(())
    }

    pub fn item(&self) -> Option<PlaylistItemRef> {
        self.state.lock().unwrap().item.clone()
    }

    pub fn has_file(&self) -> bool {
        self.state.lock().unwrap().track_supplier.is_some()
    }

    // # track selection

    pub fn audio_track_count(&self) -> usize {
        let state = self.state.lock().unwrap();
        state
            .track_supplier
            .as_ref()
            .map(|supplier| supplier.count_audio_tracks())
            .unwrap_or(0)
    }

    pub fn video_track_count(&self) -> usize {
        let state = self.state.lock().unwrap();
        state
            .track_supplier
            .as_ref()
            .map(|supplier| supplier.count_video_tracks())
            .unwrap_or(0)
    }

    pub fn sub_title_track_count(&self) -> usize {
        let state = self.state.lock().unwrap();
        state
            .track_supplier
            .as_ref()
            .map(|supplier| supplier.count_sub_title_tracks())
            .unwrap_or(0)
    }

    pub fn select_audio_track(&self, n: i32) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        self.select_audio_track_locked(&mut state, n)
    }

    fn select_audio_track_locked(&self, state: &mut ControllerState, n: i32) -> Result<()> {
        let supplier = state.track_supplier.as_ref().ok_or(PlayerError::NoInit)?;
        let track = supplier
            .create_audio_track_for_index(n as usize)
            .ok_or(PlayerError::BadIndex)?;

        let info = TrackInfo {
            index: n,
            duration: track.duration(),
            encoded_audio: Some(track.encoded_format()),
            codec_info: Some(track.codec_info()),
            ..TrackInfo::default()
        };
        let audio_duration = info.duration;
        state.audio_track = Some(info);

        let video_duration = state
            .video_track
            .as_ref()
            .map(|info| info.duration)
            .unwrap_or(0);
        state.duration = audio_duration.max(video_duration);
        self.playback_manager.set_duration(state.duration);

        self.audio_supplier
            .set_supplier(Some(track), state.video_frame_rate);

        self.emit(PlayerEvent::AudioTrackChanged(n));
        Ok(())
    }

    pub fn current_audio_track(&self) -> i32 {
        self.state
            .lock()
            .unwrap()
            .audio_track
            .as_ref()
            .map(|info| info.index)
            .unwrap_or(-1)
    }

    pub fn select_video_track(&self, n: i32) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        self.select_video_track_locked(&mut state, n)
    }

    fn select_video_track_locked(&self, state: &mut ControllerState, n: i32) -> Result<()> {
        let supplier = state.track_supplier.as_ref().ok_or(PlayerError::NoInit)?;
        let track = supplier
            .create_video_track_for_index(n as usize)
            .ok_or(PlayerError::BadIndex)?;

        let format = *track.format();
        let info = TrackInfo {
            index: n,
            duration: track.duration(),
            encoded_video: Some(track.encoded_format()),
            codec_info: Some(track.codec_info()),
            video_format: Some(format),
            ..TrackInfo::default()
        };
        let video_duration = info.duration;
        state.video_track = Some(info);

        let audio_duration = state
            .audio_track
            .as_ref()
            .map(|info| info.duration)
            .unwrap_or(0);
        state.duration = audio_duration.max(video_duration);

        state.video_frame_rate = format.field_rate;
        if state.video_frame_rate <= 0.0 {
            debug!(
                "Controller::select_video_track({}) - invalid video frame \
                 rate: {}",
                n, state.video_frame_rate
            );
            state.video_frame_rate = 25.0;
        }
        self.playback_manager.set_duration(state.duration);
        self.playback_manager.set_frame_rate(state.video_frame_rate);

        self.video_supplier.set_supplier(Some(track));

        self.emit(PlayerEvent::VideoTrackChanged(n));
        Ok(())
    }

    pub fn current_video_track(&self) -> i32 {
        self.state
            .lock()
            .unwrap()
            .video_track
            .as_ref()
            .map(|info| info.index)
            .unwrap_or(-1)
    }

    /// Selects a subtitle track (−1 disables) and pushes the text at the
    /// current position to the sink.
    pub fn select_sub_title_track(&self, n: i32) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.track_supplier.is_none() {
            return Err(PlayerError::NoInit);
        }
        state.sub_titles_index = n;

        let position = self.time_position_locked(&state);
        let text = self.sub_title_at_locked(&state, position);
        self.emit(PlayerEvent::SubTitleChanged(text));
        self.emit(PlayerEvent::SubTitleTrackChanged(n));
        Ok(())
    }

    pub fn current_sub_title_track(&self) -> i32 {
        self.state.lock().unwrap().sub_titles_index
    }

    pub fn sub_title_track_name(&self, n: i32) -> Option<String> {
        let state = self.state.lock().unwrap();
        let supplier = state.track_supplier.as_ref()?;
        supplier
            .sub_title_track_for_index(n as usize)
            .map(|track| track.name().to_string())
    }

    fn sub_title_at_locked(
        &self,
        state: &ControllerState,
        time: i64,
    ) -> Option<Arc<String>> {
        if state.sub_titles_index < 0 {
            return None;
        }
        let supplier = state.track_supplier.as_ref()?;
        let track = supplier.sub_title_track_for_index(state.sub_titles_index as usize)?;
        track
            .sub_title_at(time)
            .map(|subtitle| Arc::new(subtitle.text.clone()))
    }

    // # transport

    pub fn stop(&self) {
        self.playback_manager.stop_playing();
        {
            let mut state = self.state.lock().unwrap();
            state.autoplay = state.autoplay_setting;
            state.current_frame = 0;
        }
        self.emit(PlayerEvent::PlaybackStateChanged(PlaybackState::Stopped));
    }

    pub fn play(&self) {
        self.playback_manager.start_playing();
        self.state.lock().unwrap().autoplay = true;
        self.emit(PlayerEvent::PlaybackStateChanged(PlaybackState::Playing));
    }

    pub fn pause(&self) {
        self.playback_manager.pause_playing();
        {
            let mut state = self.state.lock().unwrap();
            state.autoplay = state.autoplay_setting;
        }
        self.emit(PlayerEvent::PlaybackStateChanged(PlaybackState::Paused));
    }

    pub fn toggle_playing(&self) {
        if !self.state.lock().unwrap().initialized {
            return;
        }
        match self.playback_manager.play_mode() {
            PlayMode::Playing => self.pause(),
            _ => self.play(),
        }
    }

    pub fn playback_state(&self) -> PlaybackState {
        match self.playback_manager.play_mode() {
            PlayMode::Playing => PlaybackState::Playing,
            PlayMode::Paused => PlaybackState::Paused,
            PlayMode::Stopped => PlaybackState::Stopped,
        }
    }

    // # volume

    pub fn set_volume(&self, value: f32) {
        let value = value.clamp(0.0, 2.0);
        let changed;
        {
            let mut state = self.state.lock().unwrap();
            changed = state.volume != value;
            if changed {
                if state.muted {
                    state.muted = false;
                    self.emit(PlayerEvent::MutedChanged(false));
                }
                state.volume = value;
                self.audio_supplier.set_volume(value);
            }
        }
        if changed {
            self.emit(PlayerEvent::VolumeChanged(value));
        }
    }

    pub fn volume(&self) -> f32 {
        self.state.lock().unwrap().volume
    }

    pub fn volume_up(&self) {
        self.set_volume(self.volume() + VOLUME_STEP);
    }

    pub fn volume_down(&self) {
        self.set_volume(self.volume() - VOLUME_STEP);
    }

    pub fn toggle_mute(&self) {
        let muted;
        {
            let mut state = self.state.lock().unwrap();
            state.muted = !state.muted;
            muted = state.muted;
            let volume = if muted { 0.0 } else { state.volume };
            self.audio_supplier.set_volume(volume);
        }
        self.emit(PlayerEvent::MutedChanged(muted));
    }

    pub fn muted(&self) -> bool {
        self.state.lock().unwrap().muted
    }

    /// Foreground handoff: going to the background snapshots the volume and
    /// attenuates per the configured mode; returning restores it.
    pub fn player_activated(&self, active: bool) {
        let (restore, attenuate) = {
            let mut state = self.state.lock().unwrap();
            if active {
                let restore = (state.active_volume != state.volume)
                    .then_some(state.active_volume);
                (restore, None)
            } else {
                state.active_volume = state.volume;
                let attenuate = match state.background_volume_mode {
                    BackgroundVolumeMode::Muted => Some(0.0),
                    BackgroundVolumeMode::HalfVolume => Some(state.volume * 0.25),
                    BackgroundVolumeMode::FullVolume => None,
                };
                (None, attenuate)
            }
        };
        if let Some(volume) = restore {
            self.set_volume(volume);
        }
        if let Some(volume) = attenuate {
            self.set_volume(volume);
        }
    }

    // # position

    pub fn time_duration(&self) -> i64 {
        self.state.lock().unwrap().duration
    }

    pub fn time_position(&self) -> i64 {
        let state = self.state.lock().unwrap();
        self.time_position_locked(&state)
    }

    fn time_position_locked(&self, state: &ControllerState) -> i64 {
        if state.duration == 0 {
            return 0;
        }
        // While seeks are pending, report the last requested frame, so the
        // outside view does not jitter through intermediate frames.
        let frame = if state.pending_seek_requests > 0 {
            state.requested_seek_frame
        } else {
            state.current_frame
        };
        let frame_duration = self.frame_duration_locked(state);
        if frame_duration == 0 {
            return 0;
        }
        frame * state.duration / frame_duration
    }

    fn frame_duration_locked(&self, state: &ControllerState) -> i64 {
        (state.duration as f64 * state.video_frame_rate / 1_000_000.0) as i64
    }

    pub fn frame_duration(&self) -> i64 {
        let state = self.state.lock().unwrap();
        self.frame_duration_locked(&state)
    }

    /// Seeks to a normalized position in `[0, 1]`.
    pub fn set_position(&self, value: f32) -> i64 {
        let frame_duration = self.frame_duration();
        self.set_frame_position((frame_duration as f64 * value as f64) as i64)
    }

    pub fn set_time_position(&self, time: i64) -> i64 {
        let duration = self.time_duration().max(1);
        self.set_position(time as f32 / duration as f32)
    }

    /// Seeks to a video frame. Returns the frame actually steered to (the
    /// keyframe-snapped one when snapping applies).
    pub fn set_frame_position(&self, value: i64) -> i64 {
        let mut state = self.state.lock().unwrap();
        let frame_duration = self.frame_duration_locked(&state);

        state.pending_seek_requests += 1;
        state.requested_seek_frame = value.clamp(0, frame_duration);
        state.seek_frame = state.requested_seek_frame;

        let current_frame = state.current_frame;

        // Snap to a video keyframe, which is the fastest to display, so
        // seeking feels snappy. The requested frame stays what
        // time_position() reports until the seek completes.
        if frame_duration > MIN_SNAP_DURATION_FRAMES
            && self.video_supplier.has_supplier()
            && (value - current_frame).abs() > MIN_SNAP_DISTANCE_FRAMES
        {
            let mut snapped = state.seek_frame;
            if self.video_supplier.find_key_frame_for_frame(&mut snapped).is_ok() {
                state.seek_frame = snapped;
            }
        }

        if state.seek_frame != current_frame {
            let seek_frame = state.seek_frame;
            drop(state);
            self.playback_manager.set_current_frame(seek_frame);
            seek_frame
        } else {
            let requested = state.requested_seek_frame;
            drop(state);
            self.notify_seek_handled(requested);
            current_frame
        }
    }

    // # player callbacks

    /// The player reached `frame`; updates observers and the subtitle sink.
    pub fn notify_current_frame_changed(&self, frame: i64) {
        let position;
        let text;
        {
            let mut state = self.state.lock().unwrap();
            state.current_frame = frame;
            if state.duration == 0 {
                return;
            }
            let time_position = self.time_position_locked(&state);
            position = time_position as f32 / state.duration as f32;
            text = if state.sub_titles_index >= 0 {
                Some(self.sub_title_at_locked(&state, time_position))
            } else {
                None
            };
        }
        self.emit(PlayerEvent::PositionChanged(position));
        if let Some(text) = text {
            self.emit(PlayerEvent::SubTitleChanged(text));
        }
    }

    /// One outstanding seek completed.
    pub fn notify_seek_handled(&self, seeked_frame: i64) {
        {
            let mut state = self.state.lock().unwrap();
            if state.pending_seek_requests == 0 {
                return;
            }
            state.pending_seek_requests -= 1;
            if state.pending_seek_requests == 0 {
                state.seek_frame = -1;
                state.requested_seek_frame = -1;
            }
        }
        self.emit(PlayerEvent::SeekHandled(seeked_frame));
    }

    /// The stop frame was reached: the current file finished. The outer
    /// layer may advance the playlist.
    pub fn notify_stop_frame_reached(&self) {
        self.emit(PlayerEvent::FileFinished);
    }

    pub fn pending_seek_requests(&self) -> i32 {
        self.state.lock().unwrap().pending_seek_requests
    }

    pub fn current_frame(&self) -> i64 {
        self.state.lock().unwrap().current_frame
    }

    /// Forwards the playback manager's queued notifications to observers;
    /// driven by the output node after every buffer.
    pub fn dispatch_player_events(&self) {
        for frame in self.playback_manager.drain_seek_notifications() {
            self.notify_seek_handled(frame);
        }
        if self.playback_manager.take_end_reached() {
            self.notify_stop_frame_reached();
        }
        self.notify_current_frame_changed(self.playback_manager.current_frame());
    }

    pub fn notify_audio_stats_changed(&self) {
        self.emit(PlayerEvent::AudioStatsChanged);
    }

    pub fn notify_video_stats_changed(&self) {
        self.emit(PlayerEvent::VideoStatsChanged);
    }

    // # info

    pub fn file_format_info(&self) -> Option<FileFormatInfo> {
        let state = self.state.lock().unwrap();
        state
            .track_supplier
            .as_ref()
            .map(|supplier| supplier.file_format_info())
    }

    pub fn copyright(&self) -> Option<String> {
        let state = self.state.lock().unwrap();
        state
            .track_supplier
            .as_ref()
            .and_then(|supplier| supplier.copyright())
    }

    pub fn meta_data(&self) -> Option<std::collections::HashMap<String, String>> {
        let state = self.state.lock().unwrap();
        state
            .track_supplier
            .as_ref()
            .map(|supplier| supplier.meta_data().clone())
    }

    pub fn location(&self) -> Option<String> {
        let state = self.state.lock().unwrap();
        state.item.as_ref().map(|item| item.location_uri())
    }

    pub fn name(&self) -> Option<String> {
        let state = self.state.lock().unwrap();
        state.item.as_ref().map(|item| item.name())
    }

    pub fn encoded_audio_format(&self) -> Option<EncodedAudioFormat> {
        let state = self.state.lock().unwrap();
        state
            .audio_track
            .as_ref()
            .and_then(|info| info.encoded_audio.clone())
    }

    pub fn encoded_video_format(&self) -> Option<EncodedVideoFormat> {
        let state = self.state.lock().unwrap();
        state
            .video_track
            .as_ref()
            .and_then(|info| info.encoded_video.clone())
    }

    pub fn audio_codec_info(&self) -> Option<CodecInfo> {
        let state = self.state.lock().unwrap();
        state
            .audio_track
            .as_ref()
            .and_then(|info| info.codec_info.clone())
    }

    /// Video size as `(width, height, width aspect, height aspect)`.
    pub fn video_size(&self) -> Option<(u32, u32, u16, u16)> {
        let state = self.state.lock().unwrap();
        let format = state.video_track.as_ref()?.video_format?;
        // 1:1 aspects are ignored; a quadratic video intentionally tagged
        // 1:1 loses nothing.
        let (width_aspect, height_aspect) =
            if format.pixel_width_aspect != format.pixel_height_aspect
                && format.pixel_width_aspect != 1
            {
                (format.pixel_width_aspect, format.pixel_height_aspect)
            } else {
                (0, 0)
            };
        Some((
            format.display_width,
            format.display_height,
            width_aspect,
            height_aspect,
        ))
    }
}
