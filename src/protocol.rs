//! Event vocabulary shared by the playback coordinator, the playlist, and
//! their observers.
//!
//! Notifications are delivered over broadcast channels, so observer code
//! never runs while the notifying object holds its own lock.

use std::sync::Arc;

use crate::playlist::item::PlaylistItemRef;

/// Coarse playback state reported to observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    Stopped,
    Playing,
    Paused,
}

/// Notifications emitted by the playback coordinator.
#[derive(Debug, Clone)]
pub enum PlayerEvent {
    /// The current file played to its end. The outer layer decides whether
    /// to advance the playlist; the core does not self-advance.
    FileFinished,
    /// A new item was loaded (or failed to load).
    FileChanged {
        item: Option<PlaylistItemRef>,
        error: Option<String>,
    },
    VideoTrackChanged(i32),
    AudioTrackChanged(i32),
    SubTitleTrackChanged(i32),
    VideoStatsChanged,
    AudioStatsChanged,
    PlaybackStateChanged(PlaybackState),
    /// Normalized position in `[0, 1]`.
    PositionChanged(f32),
    SeekHandled(i64),
    VolumeChanged(f32),
    MutedChanged(bool),
    /// Subtitle text to display, or `None` to clear it.
    SubTitleChanged(Option<Arc<String>>),
}

/// Notifications emitted by the playlist.
#[derive(Debug, Clone)]
pub enum PlaylistEvent {
    ItemAdded { index: usize },
    ItemRemoved { index: usize },
    ItemsSorted,
    CurrentItemChanged { index: i32, play: bool },
    ImportFailed,
}
