//! The playlist: an ordered, observable collection of playable items.

pub mod commands;
pub mod file_reader;
pub mod item;

use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use log::{debug, warn};
use tokio::sync::broadcast;

use crate::error::{PlayerError, Result};
use crate::playlist::file_reader::generate_reader;
use crate::playlist::item::{
    instantiate_item, is_image_extension, FilePlaylistItem, PlaylistItemRef,
};
use crate::protocol::PlaylistEvent;

pub const APPEND_INDEX_REPLACE_PLAYLIST: i32 = -1;
pub const APPEND_INDEX_APPEND_LAST: i32 = -2;

/// `'MPPL'`, written little-endian at the head of binary playlist files.
pub const PLAYLIST_MAGIC_BYTES: u32 = 0x4C50_504D;
pub const TEXT_PLAYLIST_MIME_STRING: &str = "text/x-playlist";
pub const BINARY_PLAYLIST_MIME_STRING: &str = "application/x-vnd.haiku-playlist";

/// File name extensions accepted as playable media.
pub const MEDIA_EXTENSIONS: &[&str] = &[
    "mp3", "flac", "ogg", "oga", "opus", "wav", "m4a", "aac", "aiff", "aif", "caf", "wv", "mka",
    "mp4", "m4v", "mov", "mkv", "webm", "avi", "mpg", "mpeg",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FileClass {
    Directory,
    Media,
    Image,
    BinaryPlaylist,
    PlaylistFile,
    Other,
}

struct Inner {
    items: Vec<PlaylistItemRef>,
    current_index: i32,
}

/// Ordered mapping from index to item, plus the current index (−1 when
/// empty). All notifications go out over a broadcast channel.
pub struct Playlist {
    inner: Mutex<Inner>,
    events: broadcast::Sender<PlaylistEvent>,
}

impl Playlist {
    pub fn new() -> Arc<Playlist> {
        let (events, _) = broadcast::channel(64);
        Arc::new(Playlist {
            inner: Mutex::new(Inner {
                items: Vec::new(),
                current_index: -1,
            }),
            events,
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PlaylistEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: PlaylistEvent) {
        let _ = self.events.send(event);
    }

    // # list access

    pub fn count(&self) -> usize {
        self.inner.lock().unwrap().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }

    pub fn item_at(&self, index: usize) -> Option<PlaylistItemRef> {
        self.inner.lock().unwrap().items.get(index).cloned()
    }

    pub fn items(&self) -> Vec<PlaylistItemRef> {
        self.inner.lock().unwrap().items.clone()
    }

    pub fn index_of(&self, item: &PlaylistItemRef) -> Option<usize> {
        self.inner
            .lock()
            .unwrap()
            .items
            .iter()
            .position(|candidate| Arc::ptr_eq(candidate, item))
    }

    pub fn add_item(&self, item: PlaylistItemRef) {
        let count = self.count();
        self.add_item_at(item, count);
    }

    pub fn add_item_at(&self, item: PlaylistItemRef, index: usize) {
        let current;
        {
            let mut inner = self.inner.lock().unwrap();
            let index = index.min(inner.items.len());
            inner.items.insert(index, item);
            current = (index as i32 <= inner.current_index).then_some(inner.current_index + 1);
        }
        if let Some(current) = current {
            self.set_current_item_index_internal(current, false);
        }
        self.emit(PlaylistEvent::ItemAdded { index });
    }

    /// Removes and returns the item at `index`, adjusting the current index:
    /// removals above it shift it down, removing the current item itself
    /// advances to the next item when possible.
    pub fn remove_item(&self, index: usize) -> Option<PlaylistItemRef> {
        self.remove_item_internal(index, true)
    }

    pub(crate) fn remove_item_internal(
        &self,
        index: usize,
        care_about_current_index: bool,
    ) -> Option<PlaylistItemRef> {
        let (item, current_fixup);
        {
            let mut inner = self.inner.lock().unwrap();
            if index >= inner.items.len() {
                return None;
            }
            item = inner.items.remove(index);
            current_fixup = if !care_about_current_index {
                None
            } else if (index as i32) < inner.current_index {
                Some((inner.current_index - 1, false))
            } else if index as i32 == inner.current_index {
                let mut current = inner.current_index;
                if current == inner.items.len() as i32 {
                    current -= 1;
                }
                Some((current, true))
            } else {
                None
            };
        }
        self.emit(PlaylistEvent::ItemRemoved { index });
        if let Some((current, notify)) = current_fixup {
            self.set_current_item_index_internal(current, notify);
        }
        Some(item)
    }

    /// Moves every item of `items` to this playlist, starting at `index`.
    pub fn adopt(&self, items: Vec<PlaylistItemRef>, index: usize) {
        if items.is_empty() {
            return;
        }
        let count = items.len();
        let mut added_indices = Vec::with_capacity(count);
        let current;
        {
            let mut inner = self.inner.lock().unwrap();
            let index = index.min(inner.items.len());
            for (i, item) in items.into_iter().enumerate() {
                inner.items.insert(index + i, item);
                added_indices.push(index + i);
            }
            current = (index as i32 <= inner.current_index)
                .then_some(inner.current_index + count as i32);
        }
        for index in added_indices {
            self.emit(PlaylistEvent::ItemAdded { index });
        }
        if let Some(current) = current {
            self.set_current_item_index_internal(current, false);
        }
    }

    /// Sorts by location URI.
    pub fn sort(&self) {
        self.inner
            .lock()
            .unwrap()
            .items
            .sort_by_key(|item| item.location_uri());
        self.emit(PlaylistEvent::ItemsSorted);
    }

    pub fn make_empty(&self) {
        let count = self.count();
        for index in (0..count).rev() {
            let mut inner = self.inner.lock().unwrap();
            inner.items.remove(index);
            drop(inner);
            self.emit(PlaylistEvent::ItemRemoved { index });
        }
        self.set_current_item_index_internal(-1, false);
    }

    // # navigation

    pub fn set_current_item_index(&self, index: i32) -> bool {
        self.set_current_item_index_internal(index, true)
    }

    fn set_current_item_index_internal(&self, index: i32, notify: bool) -> bool {
        let mut result = true;
        let mut notify = notify;
        let mut index = index;
        {
            let mut inner = self.inner.lock().unwrap();
            let count = inner.items.len() as i32;
            if index >= count {
                index = count - 1;
                result = false;
                notify = false;
            }
            if index < 0 {
                index = -1;
                result = false;
            }
            if index == inner.current_index && !notify {
                return result;
            }
            inner.current_index = index;
        }
        self.emit(PlaylistEvent::CurrentItemChanged {
            index,
            play: notify,
        });
        result
    }

    /// Current-index update without a play notification; used by edit
    /// commands that only re-seat the playing item.
    pub(crate) fn set_current_item_index_quiet(&self, index: i32) {
        self.set_current_item_index_internal(index, false);
    }

    pub fn current_item_index(&self) -> i32 {
        self.inner.lock().unwrap().current_index
    }

    pub fn current_item(&self) -> Option<PlaylistItemRef> {
        let inner = self.inner.lock().unwrap();
        if inner.current_index < 0 {
            return None;
        }
        inner.items.get(inner.current_index as usize).cloned()
    }

    /// (can skip to previous, can skip to next)
    pub fn skip_info(&self) -> (bool, bool) {
        let inner = self.inner.lock().unwrap();
        let count = inner.items.len() as i32;
        (
            inner.current_index > 0,
            inner.current_index < count - 1,
        )
    }

    pub fn notify_import_failed(&self) {
        self.emit(PlaylistEvent::ImportFailed);
    }

    // # import

    /// Classifies and appends `paths`. `append_index` is a position, or
    /// `APPEND_INDEX_APPEND_LAST` / `APPEND_INDEX_REPLACE_PLAYLIST`. When
    /// `sort_items` is set, the appended range is sorted, unless a saved
    /// playlist file was imported, in which case only the sibling ranges
    /// are, so the saved ordering survives.
    pub fn append_items(&self, paths: &[PathBuf], append_index: i32, sort_items: bool) {
        let add = append_index != APPEND_INDEX_REPLACE_PLAYLIST;
        if !add {
            self.make_empty();
        }
        let append_index = if append_index < 0 {
            self.count()
        } else {
            append_index as usize
        };

        let start_playing = self.count() == 0;
        let mut collected: Vec<PlaylistItemRef> = Vec::new();
        let mut has_saved_playlist = false;

        for path in paths {
            let mut sub_items: Vec<PlaylistItemRef> = Vec::new();
            match classify(path) {
                FileClass::PlaylistFile => {
                    if let Some(reader) = generate_reader(path) {
                        reader.append_to_playlist(path, &mut sub_items);
                    }
                    // Keep the ordering of the saved playlist from here on.
                    has_saved_playlist = true;
                }
                FileClass::BinaryPlaylist => {
                    match std::fs::File::open(path)
                        .map_err(PlayerError::from)
                        .and_then(|mut file| Playlist::unflatten(&mut file))
                    {
                        Ok(items) => sub_items = items,
                        Err(error) => {
                            warn!("importing {:?} failed: {}", path, error);
                            self.notify_import_failed();
                        }
                    }
                    has_saved_playlist = true;
                }
                FileClass::Directory | FileClass::Media | FileClass::Image => {
                    if !self.extra_media_exists(&collected, path) {
                        self.append_to_playlist_recursive(path, &collected, &mut sub_items);
                    }
                    if sort_items && has_saved_playlist {
                        sub_items.sort_by_key(|item| item.location_uri());
                    }
                }
                FileClass::Other => {
                    debug!("append_items: skipping {:?}", path);
                }
            }
            collected.extend(sub_items);
        }

        if collected.is_empty() && !paths.is_empty() && self.is_empty() {
            self.notify_import_failed();
        }

        if sort_items && !has_saved_playlist {
            collected.sort_by_key(|item| item.location_uri());
        }

        self.adopt(collected, append_index);

        if start_playing && !self.is_empty() {
            self.set_current_item_index(0);
        }
    }

    /// Dives into folders; media files that are not auxiliary to an already
    /// present item are added, with their siblings bound as extra media.
    fn append_to_playlist_recursive(
        &self,
        path: &Path,
        collected: &[PlaylistItemRef],
        sub_items: &mut Vec<PlaylistItemRef>,
    ) {
        if path.is_dir() {
            let Ok(entries) = std::fs::read_dir(path) else {
                return;
            };
            let mut children: Vec<PathBuf> =
                entries.flatten().map(|entry| entry.path()).collect();
            children.sort();
            for child in children {
                self.append_to_playlist_recursive(&child, collected, sub_items);
            }
            return;
        }

        match classify(path) {
            FileClass::Media | FileClass::Image => {
                // Combined view of already-collected and freshly collected
                // items for the sibling check.
                let mut context: Vec<PlaylistItemRef> = collected.to_vec();
                context.extend(sub_items.iter().cloned());
                if self.extra_media_exists(&context, path) {
                    return;
                }
                let item = FilePlaylistItem::new(path.to_path_buf());
                bind_extra_media(&item);
                sub_items.push(Arc::new(item));
            }
            _ => debug!("append_to_playlist_recursive: skipping {:?}", path),
        }
    }

    /// Whether an item with the same base name is already present (in the
    /// playlist or in `pending`); such a file is either a duplicate or a
    /// dependent auxiliary, not a standalone item.
    fn extra_media_exists(&self, pending: &[PlaylistItemRef], path: &Path) -> bool {
        let base = base_without_extension(path);
        let check = |item: &PlaylistItemRef| -> bool {
            let Some(file_item) = item.as_any().downcast_ref::<FilePlaylistItem>() else {
                return false;
            };
            base_without_extension(file_item.path()) == base
        };
        if self.inner.lock().unwrap().items.iter().any(|item| check(item)) {
            return true;
        }
        pending.iter().any(check)
    }

    /// Whether `item` duplicates (or is auxiliary to) something already in
    /// the playlist.
    pub fn extra_media_exists_for(&self, item: &PlaylistItemRef) -> bool {
        if let Some(file_item) = item.as_any().downcast_ref::<FilePlaylistItem>() {
            return self.extra_media_exists(&[], file_item.path());
        }
        if let Some(url_item) = item.as_any().downcast_ref::<item::UrlPlaylistItem>() {
            let url = url_item.url().to_string();
            return self
                .inner
                .lock()
                .unwrap()
                .items
                .iter()
                .any(|candidate| candidate.location_uri() == url);
        }
        true
    }

    // # archiving

    pub fn archive(&self) -> serde_json::Value {
        let items: Vec<serde_json::Value> = self
            .inner
            .lock()
            .unwrap()
            .items
            .iter()
            .map(|item| item.archive())
            .collect();
        serde_json::json!({ "item": items })
    }

    /// Writes the binary playlist format: the magic, then the archived
    /// items.
    pub fn flatten(&self, stream: &mut dyn Write) -> Result<()> {
        stream.write_all(&PLAYLIST_MAGIC_BYTES.to_le_bytes())?;
        serde_json::to_writer(stream, &self.archive())
            .map_err(|error| PlayerError::Decode(error.to_string()))?;
        Ok(())
    }

    /// Reads the binary playlist format back into items. Entries of unknown
    /// classes are dropped, the rest survive.
    pub fn unflatten(stream: &mut dyn Read) -> Result<Vec<PlaylistItemRef>> {
        let mut magic = [0u8; 4];
        stream.read_exact(&mut magic)?;
        if u32::from_le_bytes(magic) != PLAYLIST_MAGIC_BYTES {
            return Err(PlayerError::BadInput);
        }
        let archive: serde_json::Value = serde_json::from_reader(stream)
            .map_err(|error| PlayerError::Decode(error.to_string()))?;
        let entries = archive
            .get("item")
            .and_then(|items| items.as_array())
            .ok_or(PlayerError::BadInput)?;
        Ok(entries
            .iter()
            .filter_map(instantiate_item)
            .collect())
    }
}

/// Binds every sibling with the same base name (subtitles, covers) to the
/// item as extra media.
fn bind_extra_media(item: &FilePlaylistItem) {
    let path = item.path();
    let Some(parent) = path.parent() else {
        return;
    };
    let base = base_without_extension(path);
    let Ok(entries) = std::fs::read_dir(parent) else {
        return;
    };
    for entry in entries.flatten() {
        let sibling = entry.path();
        if sibling != path && base_without_extension(&sibling) == base {
            item.bind_extra_media(sibling);
        }
    }
}

fn base_without_extension(path: &Path) -> PathBuf {
    path.with_extension("")
}

fn classify(path: &Path) -> FileClass {
    if path.is_dir() {
        return FileClass::Directory;
    }
    if file_reader::identify_type(path) != file_reader::PlaylistFileType::Unknown {
        return FileClass::PlaylistFile;
    }
    // Binary playlists are recognized by their magic, whatever the name.
    if let Ok(mut file) = std::fs::File::open(path) {
        let mut magic = [0u8; 4];
        if file.read_exact(&mut magic).is_ok()
            && u32::from_le_bytes(magic) == PLAYLIST_MAGIC_BYTES
        {
            return FileClass::BinaryPlaylist;
        }
    }
    if is_image_extension(path) {
        return FileClass::Image;
    }
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase());
    match extension {
        Some(extension) if MEDIA_EXTENSIONS.contains(&extension.as_str()) => FileClass::Media,
        _ => FileClass::Other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::playlist::item::UrlPlaylistItem;

    fn url_item(url: &str) -> PlaylistItemRef {
        Arc::new(UrlPlaylistItem::new(url.to_string()))
    }

    fn playlist_with(urls: &[&str]) -> Arc<Playlist> {
        let playlist = Playlist::new();
        for url in urls {
            playlist.add_item(url_item(url));
        }
        playlist
    }

    fn unique_temp_directory(test_name: &str) -> PathBuf {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("system clock should be after UNIX_EPOCH")
            .as_nanos();
        let dir = std::env::temp_dir().join(format!(
            "tonearm_{}_{}_{}",
            test_name,
            std::process::id(),
            nanos
        ));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn current_index_is_minus_one_exactly_when_empty() {
        let playlist = Playlist::new();
        assert_eq!(playlist.current_item_index(), -1);
        playlist.add_item(url_item("http://a"));
        playlist.set_current_item_index(0);
        assert_eq!(playlist.current_item_index(), 0);
        playlist.remove_item(0);
        assert_eq!(playlist.current_item_index(), -1);
    }

    #[test]
    fn removing_above_the_current_item_shifts_it_down() {
        let playlist = playlist_with(&["http://a", "http://b", "http://c"]);
        playlist.set_current_item_index(2);
        playlist.remove_item(0);
        assert_eq!(playlist.current_item_index(), 1);
        assert_eq!(playlist.current_item().unwrap().location_uri(), "http://c");
    }

    #[test]
    fn removing_the_current_item_advances_when_possible() {
        let playlist = playlist_with(&["http://a", "http://b", "http://c"]);
        playlist.set_current_item_index(1);
        playlist.remove_item(1);
        assert_eq!(playlist.current_item_index(), 1);
        assert_eq!(playlist.current_item().unwrap().location_uri(), "http://c");

        // Removing the last item falls back to the previous one.
        playlist.remove_item(1);
        assert_eq!(playlist.current_item_index(), 0);
        playlist.remove_item(0);
        assert_eq!(playlist.current_item_index(), -1);
    }

    #[test]
    fn adding_below_the_current_item_shifts_it_up() {
        let playlist = playlist_with(&["http://a", "http://b"]);
        playlist.set_current_item_index(1);
        playlist.add_item_at(url_item("http://x"), 0);
        assert_eq!(playlist.current_item_index(), 2);
        assert_eq!(playlist.current_item().unwrap().location_uri(), "http://b");
    }

    #[test]
    fn index_stays_valid_across_mixed_edits() {
        let playlist = playlist_with(&["http://a", "http://b", "http://c", "http://d"]);
        playlist.set_current_item_index(3);
        playlist.remove_item(3);
        let current = playlist.current_item_index();
        assert!(current >= 0 && (current as usize) < playlist.count());
        playlist.sort();
        playlist.add_item_at(url_item("http://e"), 0);
        let current = playlist.current_item_index();
        assert!(current >= 0 && (current as usize) < playlist.count());
    }

    #[test]
    fn skip_info_reflects_the_neighbours() {
        let playlist = playlist_with(&["http://a", "http://b"]);
        playlist.set_current_item_index(0);
        assert_eq!(playlist.skip_info(), (false, true));
        playlist.set_current_item_index(1);
        assert_eq!(playlist.skip_info(), (true, false));
    }

    #[test]
    fn sibling_files_bind_as_extra_media() {
        let dir = unique_temp_directory("siblings");
        std::fs::write(dir.join("movie.mp4"), b"x").unwrap();
        std::fs::write(dir.join("movie.srt"), b"x").unwrap();

        let playlist = Playlist::new();
        playlist.append_items(&[dir.clone()], APPEND_INDEX_APPEND_LAST, false);
        assert_eq!(playlist.count(), 1);

        let item = playlist.item_at(0).unwrap();
        let file_item = item
            .as_any()
            .downcast_ref::<FilePlaylistItem>()
            .unwrap();
        assert!(file_item.path().ends_with("movie.mp4"));
        let extra = file_item.extra_media();
        assert_eq!(extra.len(), 1);
        assert!(extra[0].ends_with("movie.srt"));

        // Appending the same folder again adds nothing: the mp4's base name
        // is already present.
        playlist.append_items(&[dir.clone()], APPEND_INDEX_APPEND_LAST, false);
        assert_eq!(playlist.count(), 1);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn first_import_into_an_empty_playlist_selects_item_zero() {
        let dir = unique_temp_directory("autoselect");
        std::fs::write(dir.join("one.mp3"), b"x").unwrap();
        std::fs::write(dir.join("two.mp3"), b"x").unwrap();

        let playlist = Playlist::new();
        playlist.append_items(&[dir.clone()], APPEND_INDEX_APPEND_LAST, true);
        assert_eq!(playlist.count(), 2);
        assert_eq!(playlist.current_item_index(), 0);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn replace_empties_the_playlist_first() {
        let dir = unique_temp_directory("replace");
        std::fs::write(dir.join("one.mp3"), b"x").unwrap();

        let playlist = playlist_with(&["http://a", "http://b"]);
        playlist.append_items(&[dir.join("one.mp3")], APPEND_INDEX_REPLACE_PLAYLIST, false);
        assert_eq!(playlist.count(), 1);
        assert!(playlist.item_at(0).unwrap().location_uri().ends_with("one.mp3"));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn flatten_round_trip_preserves_items_and_order() {
        let playlist = Playlist::new();
        playlist.add_item(Arc::new(FilePlaylistItem::new(PathBuf::from("/m/b.mp3"))));
        playlist.add_item(Arc::new(FilePlaylistItem::new(PathBuf::from("/m/a.mp3"))));
        playlist.add_item(url_item("http://example.com/s"));

        let mut bytes = Vec::new();
        playlist.flatten(&mut bytes).unwrap();
        assert_eq!(&bytes[..4], &PLAYLIST_MAGIC_BYTES.to_le_bytes());

        let items = Playlist::unflatten(&mut &bytes[..]).unwrap();
        assert_eq!(items.len(), 3);
        assert_eq!(items[0].location_uri(), "file:///m/b.mp3");
        assert_eq!(items[2].location_uri(), "http://example.com/s");
    }

    #[test]
    fn unflatten_rejects_a_bad_magic() {
        let bytes = b"XXXX{}";
        assert!(Playlist::unflatten(&mut &bytes[..]).is_err());
    }

    #[test]
    fn m3u_import_preserves_saved_order_despite_sorting() {
        let dir = unique_temp_directory("m3u_order");
        std::fs::write(dir.join("list.m3u"), "/m/z.mp3\n/m/a.mp3\n").unwrap();

        let playlist = Playlist::new();
        playlist.append_items(&[dir.join("list.m3u")], APPEND_INDEX_APPEND_LAST, true);
        assert_eq!(playlist.count(), 2);
        assert!(playlist.item_at(0).unwrap().location_uri().ends_with("z.mp3"));

        let _ = std::fs::remove_dir_all(&dir);
    }
}
