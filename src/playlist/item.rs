//! Playlist items: local files and URLs, with a typed attribute bag.

use std::any::Any;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use log::{debug, warn};

use crate::error::{PlayerError, Result};
use crate::supplier::media_file::{MediaFileTrackSupplier, TrackSupplier};

pub type PlaylistItemRef = Arc<dyn PlaylistItem>;

/// Name of the sibling directory removed files are moved into.
const TRASH_DIRECTORY: &str = ".Trash-tonearm";

/// Typed attribute keys. String/i32/i64 typing follows the key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Attribute {
    Name,
    Keywords,
    Artist,
    Author,
    Album,
    Title,
    AudioBitrate,
    VideoBitrate,
    /// Microseconds, i64.
    Duration,
    Track,
    Year,
    /// 1..10, i32.
    Rating,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AttributeValue {
    Str(String),
    Int32(i32),
    Int64(i64),
}

/// One playable entry of the playlist. Items are shared (`Arc`) between the
/// playlist, the coordinator and undo snapshots; mutability is interior.
pub trait PlaylistItem: Send + Sync + std::fmt::Debug {
    /// Deep copy, used for undo snapshots.
    fn clone_item(&self) -> PlaylistItemRef;

    /// Archives the item with its class tag for the binary playlist format.
    fn archive(&self) -> serde_json::Value;

    fn set_attribute(&self, attribute: Attribute, value: AttributeValue) -> Result<()>;

    fn attribute(&self, attribute: Attribute) -> Option<AttributeValue>;

    /// A URI describing the item's location.
    fn location_uri(&self) -> String;

    fn move_into_trash(&self) -> Result<()>;

    fn restore_from_trash(&self) -> Result<()>;

    fn create_track_supplier(&self) -> Result<Box<dyn TrackSupplier>>;

    fn set_playback_failed(&self);

    fn playback_failed(&self) -> bool;

    fn as_any(&self) -> &dyn Any;

    fn name(&self) -> String {
        match self.attribute(Attribute::Name) {
            Some(AttributeValue::Str(name)) => name,
            _ => "<unnamed>".to_string(),
        }
    }

    fn author(&self) -> String {
        match self.attribute(Attribute::Author) {
            Some(AttributeValue::Str(author)) => author,
            _ => "<unknown>".to_string(),
        }
    }

    fn album(&self) -> String {
        match self.attribute(Attribute::Album) {
            Some(AttributeValue::Str(album)) => album,
            _ => "<unknown>".to_string(),
        }
    }

    fn title(&self) -> String {
        match self.attribute(Attribute::Title) {
            Some(AttributeValue::Str(title)) => title,
            _ => "<untitled>".to_string(),
        }
    }

    fn track_number(&self) -> i32 {
        match self.attribute(Attribute::Track) {
            Some(AttributeValue::Int32(track)) => track,
            _ => 0,
        }
    }

    /// Duration in microseconds. Computed on first call by spinning up a
    /// throwaway track supplier, then cached as an attribute.
    fn duration(&self) -> i64 {
        if let Some(AttributeValue::Int64(duration)) = self.attribute(Attribute::Duration) {
            return duration;
        }
        let duration = match self.create_track_supplier() {
            Ok(supplier) => {
                let audio = supplier
                    .create_audio_track_for_index(0)
                    .map(|track| track.duration())
                    .unwrap_or(0);
                let video = supplier
                    .create_video_track_for_index(0)
                    .map(|track| track.duration())
                    .unwrap_or(0);
                audio.max(video)
            }
            Err(_) => return 0,
        };
        let _ = self.set_attribute(Attribute::Duration, AttributeValue::Int64(duration));
        duration
    }
}

/// File name extensions treated as static images (cover art).
pub const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "bmp", "webp", "tif", "tiff"];

pub fn is_image_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

/// Reconstructs an archived item from its class tag. Unknown classes yield
/// `None`; the caller drops the entry and continues.
pub fn instantiate_item(archive: &serde_json::Value) -> Option<PlaylistItemRef> {
    match archive.get("class")?.as_str()? {
        "FilePlaylistItem" => {
            let path = archive.get("path")?.as_str()?;
            Some(Arc::new(FilePlaylistItem::new(PathBuf::from(path))))
        }
        "UrlPlaylistItem" => {
            let url = archive.get("url")?.as_str()?;
            Some(Arc::new(UrlPlaylistItem::new(url.to_string())))
        }
        other => {
            warn!("unknown playlist item class '{}', dropping entry", other);
            None
        }
    }
}

// #
// # FilePlaylistItem
// #

#[derive(Debug)]
struct FileItemInner {
    attributes: HashMap<Attribute, AttributeValue>,
    tags_loaded: bool,
    /// Where the file went when it was moved into the trash.
    path_in_trash: Option<PathBuf>,
    /// Auxiliary files bound by shared base name (subtitles, cover art).
    extra_media: Vec<PathBuf>,
}

#[derive(Debug)]
pub struct FilePlaylistItem {
    path: PathBuf,
    inner: Mutex<FileItemInner>,
    playback_failed: AtomicBool,
}

impl FilePlaylistItem {
    pub fn new(path: PathBuf) -> FilePlaylistItem {
        let mut attributes = HashMap::new();
        if let Some(name) = path.file_name().and_then(|name| name.to_str()) {
            attributes.insert(Attribute::Name, AttributeValue::Str(name.to_string()));
        }
        FilePlaylistItem {
            path,
            inner: Mutex::new(FileItemInner {
                attributes,
                tags_loaded: false,
                path_in_trash: None,
                extra_media: Vec::new(),
            }),
            playback_failed: AtomicBool::new(false),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn bind_extra_media(&self, path: PathBuf) {
        let mut inner = self.inner.lock().unwrap();
        if !inner.extra_media.contains(&path) {
            inner.extra_media.push(path);
        }
    }

    pub fn extra_media(&self) -> Vec<PathBuf> {
        self.inner.lock().unwrap().extra_media.clone()
    }

    /// Fills the attribute bag from the file's tags on first use.
    fn load_tags(&self, inner: &mut FileItemInner) {
        if inner.tags_loaded {
            return;
        }
        inner.tags_loaded = true;

        use lofty::file::TaggedFileExt;
        use lofty::prelude::{Accessor, AudioFile};

        let tagged = match lofty::read_from_path(&self.path) {
            Ok(tagged) => tagged,
            Err(error) => {
                debug!("reading tags of {:?} failed: {}", self.path, error);
                return;
            }
        };
        if let Some(tag) = tagged.primary_tag().or_else(|| tagged.first_tag()) {
            let mut put_string = |attribute: Attribute, value: Option<std::borrow::Cow<'_, str>>| {
                if let Some(value) = value {
                    let value = value.trim();
                    if !value.is_empty() {
                        inner
                            .attributes
                            .entry(attribute)
                            .or_insert_with(|| AttributeValue::Str(value.to_string()));
                    }
                }
            };
            put_string(Attribute::Artist, tag.artist());
            put_string(Attribute::Author, tag.artist());
            put_string(Attribute::Album, tag.album());
            put_string(Attribute::Title, tag.title());
            if let Some(track) = tag.track() {
                inner
                    .attributes
                    .entry(Attribute::Track)
                    .or_insert(AttributeValue::Int32(track as i32));
            }
            if let Some(year) = tag.date().map(|date| date.year) {
                inner
                    .attributes
                    .entry(Attribute::Year)
                    .or_insert(AttributeValue::Int32(year as i32));
            }
        }
        let properties = tagged.properties();
        let duration = properties.duration().as_micros() as i64;
        if duration > 0 {
            inner
                .attributes
                .entry(Attribute::Duration)
                .or_insert(AttributeValue::Int64(duration));
        }
        if let Some(bitrate) = properties.audio_bitrate() {
            inner
                .attributes
                .entry(Attribute::AudioBitrate)
                .or_insert_with(|| AttributeValue::Str(format!("{} kbit", bitrate)));
        }
    }

    /// Persists the user rating into the file's tag.
    fn write_rating(&self, rating: i32) {
        use lofty::config::WriteOptions;
        use lofty::prelude::*;
        use lofty::tag::{ItemKey, Tag};

        let mut tagged = match lofty::read_from_path(&self.path) {
            Ok(tagged) => tagged,
            Err(error) => {
                warn!("cannot persist rating for {:?}: {}", self.path, error);
                return;
            }
        };
        if tagged.primary_tag().is_none() {
            let tag_type = tagged.primary_tag_type();
            tagged.insert_tag(Tag::new(tag_type));
        }
        if let Some(tag) = tagged.primary_tag_mut() {
            tag.insert_text(ItemKey::Popularimeter, rating.to_string());
        }
        if let Err(error) = tagged.save_to_path(&self.path, WriteOptions::default()) {
            warn!("writing rating to {:?} failed: {}", self.path, error);
        }
    }
}

impl PlaylistItem for FilePlaylistItem {
    fn clone_item(&self) -> PlaylistItemRef {
        let inner = self.inner.lock().unwrap();
        let clone = FilePlaylistItem {
            path: self.path.clone(),
            inner: Mutex::new(FileItemInner {
                attributes: inner.attributes.clone(),
                tags_loaded: inner.tags_loaded,
                path_in_trash: inner.path_in_trash.clone(),
                extra_media: inner.extra_media.clone(),
            }),
            playback_failed: AtomicBool::new(self.playback_failed.load(Ordering::Relaxed)),
        };
        Arc::new(clone)
    }

    fn archive(&self) -> serde_json::Value {
        serde_json::json!({
            "class": "FilePlaylistItem",
            "path": self.path.to_string_lossy(),
        })
    }

    fn set_attribute(&self, attribute: Attribute, value: AttributeValue) -> Result<()> {
        match (attribute, &value) {
            (Attribute::Rating, AttributeValue::Int32(rating)) => {
                if !(1..=10).contains(rating) {
                    return Err(PlayerError::BadInput);
                }
                self.write_rating(*rating);
            }
            (Attribute::Track | Attribute::Year, AttributeValue::Int32(_)) => {}
            (Attribute::Duration, AttributeValue::Int64(_)) => {}
            (_, AttributeValue::Str(_)) => {}
            _ => return Err(PlayerError::BadInput),
        }
        self.inner.lock().unwrap().attributes.insert(attribute, value);
        Ok(())
    }

    fn attribute(&self, attribute: Attribute) -> Option<AttributeValue> {
        let mut inner = self.inner.lock().unwrap();
        if !inner.attributes.contains_key(&attribute) {
            self.load_tags(&mut inner);
        }
        inner.attributes.get(&attribute).cloned()
    }

    fn location_uri(&self) -> String {
        format!("file://{}", self.path.to_string_lossy())
    }

    fn move_into_trash(&self) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if inner.path_in_trash.is_some() {
            // Already in the trash.
            return Err(PlayerError::BadInput);
        }
        let parent = self.path.parent().ok_or(PlayerError::EntryNotFound)?;
        let trash_dir = parent.join(TRASH_DIRECTORY);
        std::fs::create_dir_all(&trash_dir)?;
        let file_name = self.path.file_name().ok_or(PlayerError::EntryNotFound)?;
        let mut target = trash_dir.join(file_name);
        let mut counter = 1;
        while target.exists() {
            target = trash_dir.join(format!("{} {}", file_name.to_string_lossy(), counter));
            counter += 1;
        }
        std::fs::rename(&self.path, &target)?;
        inner.path_in_trash = Some(target);
        Ok(())
    }

    fn restore_from_trash(&self) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        let Some(path_in_trash) = inner.path_in_trash.take() else {
            return Err(PlayerError::BadInput);
        };
        if let Err(error) = std::fs::rename(&path_in_trash, &self.path) {
            inner.path_in_trash = Some(path_in_trash);
            return Err(error.into());
        }
        Ok(())
    }

    fn create_track_supplier(&self) -> Result<Box<dyn TrackSupplier>> {
        let mut supplier = if is_image_extension(&self.path) {
            // A static image plays as an endless artwork video track.
            let image = image::open(&self.path)
                .map_err(|error| PlayerError::Decode(error.to_string()))?
                .to_rgba8();
            let (width, height) = image.dimensions();
            let mut supplier = MediaFileTrackSupplier::new();
            supplier.add_bitmap(image.into_raw(), width, height);
            supplier
        } else {
            MediaFileTrackSupplier::open(&self.path)?
        };
        for extra in self.extra_media() {
            let extension = extra
                .extension()
                .and_then(|ext| ext.to_str())
                .unwrap_or("")
                .to_ascii_lowercase();
            if extension == "srt" {
                let name = extra
                    .file_stem()
                    .map(|stem| stem.to_string_lossy().to_string())
                    .unwrap_or_else(|| "subtitles".to_string());
                match crate::supplier::subtitles::SubTitles::from_srt_file(&extra, &name) {
                    Ok(sub_titles) => supplier.add_sub_titles(sub_titles),
                    Err(error) => warn!("loading subtitles {:?} failed: {}", extra, error),
                }
            }
        }
        Ok(Box::new(supplier))
    }

    fn set_playback_failed(&self) {
        self.playback_failed.store(true, Ordering::Relaxed);
    }

    fn playback_failed(&self) -> bool {
        self.playback_failed.load(Ordering::Relaxed)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

// #
// # UrlPlaylistItem
// #

#[derive(Debug)]
pub struct UrlPlaylistItem {
    url: String,
    attributes: Mutex<HashMap<Attribute, AttributeValue>>,
    playback_failed: AtomicBool,
}

impl UrlPlaylistItem {
    pub fn new(url: String) -> UrlPlaylistItem {
        let mut attributes = HashMap::new();
        let name = url
            .rsplit('/')
            .next()
            .filter(|segment| !segment.is_empty())
            .unwrap_or(&url);
        attributes.insert(Attribute::Name, AttributeValue::Str(name.to_string()));
        UrlPlaylistItem {
            url,
            attributes: Mutex::new(attributes),
            playback_failed: AtomicBool::new(false),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl PlaylistItem for UrlPlaylistItem {
    fn clone_item(&self) -> PlaylistItemRef {
        Arc::new(UrlPlaylistItem {
            url: self.url.clone(),
            attributes: Mutex::new(self.attributes.lock().unwrap().clone()),
            playback_failed: AtomicBool::new(self.playback_failed.load(Ordering::Relaxed)),
        })
    }

    fn archive(&self) -> serde_json::Value {
        serde_json::json!({
            "class": "UrlPlaylistItem",
            "url": self.url,
        })
    }

    fn set_attribute(&self, attribute: Attribute, value: AttributeValue) -> Result<()> {
        self.attributes.lock().unwrap().insert(attribute, value);
        Ok(())
    }

    fn attribute(&self, attribute: Attribute) -> Option<AttributeValue> {
        self.attributes.lock().unwrap().get(&attribute).cloned()
    }

    fn location_uri(&self) -> String {
        self.url.clone()
    }

    fn move_into_trash(&self) -> Result<()> {
        Err(PlayerError::NotSupported)
    }

    fn restore_from_trash(&self) -> Result<()> {
        Err(PlayerError::NotSupported)
    }

    fn create_track_supplier(&self) -> Result<Box<dyn TrackSupplier>> {
        // Local file URLs open like files; remote streaming is not wired up.
        if let Some(path) = self.url.strip_prefix("file://") {
            let supplier = MediaFileTrackSupplier::open(Path::new(path))?;
            return Ok(Box::new(supplier));
        }
        Err(PlayerError::NotSupported)
    }

    fn set_playback_failed(&self) {
        self.playback_failed.store(true, Ordering::Relaxed);
    }

    fn playback_failed(&self) -> bool {
        self.playback_failed.load(Ordering::Relaxed)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_item_name_is_the_file_name() {
        let item = FilePlaylistItem::new(PathBuf::from("/media/movie.mp4"));
        assert_eq!(item.name(), "movie.mp4");
        assert_eq!(item.location_uri(), "file:///media/movie.mp4");
    }

    #[test]
    fn archive_round_trip_preserves_the_class() {
        let item: PlaylistItemRef = Arc::new(FilePlaylistItem::new(PathBuf::from("/a/b.mp3")));
        let restored = instantiate_item(&item.archive()).unwrap();
        assert_eq!(restored.location_uri(), "file:///a/b.mp3");

        let url: PlaylistItemRef =
            Arc::new(UrlPlaylistItem::new("http://example.com/radio".to_string()));
        let restored = instantiate_item(&url.archive()).unwrap();
        assert_eq!(restored.location_uri(), "http://example.com/radio");
    }

    #[test]
    fn unknown_archive_class_is_dropped() {
        let archive = serde_json::json!({"class": "QueryPlaylistItem", "query": "x"});
        assert!(instantiate_item(&archive).is_none());
    }

    #[test]
    fn rating_outside_range_is_rejected() {
        let item = FilePlaylistItem::new(PathBuf::from("/a/b.mp3"));
        assert!(item
            .set_attribute(Attribute::Rating, AttributeValue::Int32(11))
            .is_err());
        assert!(item
            .set_attribute(Attribute::Rating, AttributeValue::Int32(0))
            .is_err());
    }

    #[test]
    fn trash_round_trip_restores_the_file() {
        let dir = std::env::temp_dir().join(format!(
            "tonearm_trash_test_{}_{}",
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap()
                .as_nanos()
        ));
        std::fs::create_dir_all(&dir).unwrap();
        let file = dir.join("song.mp3");
        std::fs::write(&file, b"data").unwrap();

        let item = FilePlaylistItem::new(file.clone());
        item.move_into_trash().unwrap();
        assert!(!file.exists());
        // A second move is an error.
        assert!(item.move_into_trash().is_err());

        item.restore_from_trash().unwrap();
        assert!(file.exists());
        assert!(item.restore_from_trash().is_err());

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn playback_failed_flag_sticks() {
        let item = UrlPlaylistItem::new("http://example.com/a".to_string());
        assert!(!item.playback_failed());
        item.set_playback_failed();
        assert!(item.playback_failed());
    }
}
