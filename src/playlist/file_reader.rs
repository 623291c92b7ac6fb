//! Readers for on-disk playlist files (M3U and PLS).

use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::warn;

use crate::playlist::item::{
    Attribute, AttributeValue, FilePlaylistItem, PlaylistItemRef, UrlPlaylistItem,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaylistFileType {
    M3u,
    Pls,
    Unknown,
}

/// Identifies a playlist file by its extension.
pub fn identify_type(path: &Path) -> PlaylistFileType {
    match path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
        .as_deref()
    {
        Some("m3u") | Some("m3u8") => PlaylistFileType::M3u,
        Some("pls") => PlaylistFileType::Pls,
        _ => PlaylistFileType::Unknown,
    }
}

pub trait PlaylistFileReader {
    /// Parses `path` and appends the entries to `items`.
    fn append_to_playlist(&self, path: &Path, items: &mut Vec<PlaylistItemRef>);
}

pub fn generate_reader(path: &Path) -> Option<Box<dyn PlaylistFileReader>> {
    match identify_type(path) {
        PlaylistFileType::M3u => Some(Box::new(M3uReader)),
        PlaylistFileType::Pls => Some(Box::new(PlsReader)),
        PlaylistFileType::Unknown => None,
    }
}

/// Creates an item from one playlist line: a path or a URL. Returns the
/// index the item was assigned in `items`.
fn append_entry(entry: &str, items: &mut Vec<PlaylistItemRef>) -> Option<usize> {
    let entry = entry.trim();
    if entry.is_empty() {
        return None;
    }
    let entry = entry.strip_prefix("file://").unwrap_or(entry);
    let item: PlaylistItemRef = if entry.contains("://") {
        Arc::new(UrlPlaylistItem::new(entry.to_string()))
    } else {
        Arc::new(FilePlaylistItem::new(PathBuf::from(entry)))
    };
    items.push(item);
    Some(items.len() - 1)
}

pub struct M3uReader;

impl PlaylistFileReader for M3uReader {
    fn append_to_playlist(&self, path: &Path, items: &mut Vec<PlaylistItemRef>) {
        let Ok(content) = std::fs::read_to_string(path) else {
            warn!("M3uReader: cannot read {:?}", path);
            return;
        };
        for line in content.lines() {
            // Comment lines are ignored, including #EXTINF metadata.
            if !line.starts_with('#') {
                append_entry(line, items);
            }
        }
    }
}

pub struct PlsReader;

impl PlaylistFileReader for PlsReader {
    fn append_to_playlist(&self, path: &Path, items: &mut Vec<PlaylistItemRef>) {
        let Ok(content) = std::fs::read_to_string(path) else {
            warn!("PlsReader: cannot read {:?}", path);
            return;
        };
        let mut lines = content.lines();

        if lines.next().map(str::trim) != Some("[playlist]") {
            warn!("PlsReader: invalid .pls file {:?}", path);
            return;
        }

        // Bookkeeping values; stored but unused.
        let mut number_of_entries = String::new();
        let mut version = String::new();
        let mut last_assigned_index: Option<usize> = None;

        for line in lines {
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            let key = key.trim();
            let value = value.trim();
            // Keys of entry groups carry a one-based track number suffix.
            let key_type = key.trim_end_matches(|c: char| c.is_ascii_digit());
            match key_type {
                "File" => last_assigned_index = append_entry(value, items),
                "Title" => {
                    if let Some(index) = last_assigned_index {
                        let _ = items[index].set_attribute(
                            Attribute::Title,
                            AttributeValue::Str(value.to_string()),
                        );
                    }
                }
                "Length" => {
                    if let Some(index) = last_assigned_index {
                        let seconds: i64 = value.parse().unwrap_or(0);
                        // -1 denotes an infinite streaming entry; it gets no
                        // duration.
                        if seconds >= 0 {
                            let _ = items[index].set_attribute(
                                Attribute::Duration,
                                AttributeValue::Int64(seconds * 1_000_000),
                            );
                        }
                    }
                }
                "NumberOfEntries" => number_of_entries = value.to_string(),
                "Version" => version = value.to_string(),
                _ => {}
            }
        }
        let _ = (number_of_entries, version);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_file(name: &str, content: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "tonearm_plreader_{}_{}",
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap()
                .as_nanos()
        ));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn m3u_skips_comments_and_extinf() {
        let path = temp_file(
            "list.m3u",
            "#EXTM3U\n#EXTINF:123,Artist - Title\n/music/one.mp3\n\n/music/two.mp3\n",
        );
        let mut items = Vec::new();
        M3uReader.append_to_playlist(&path, &mut items);
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].location_uri(), "file:///music/one.mp3");
    }

    #[test]
    fn pls_binds_title_and_length_to_the_preceding_file() {
        let path = temp_file(
            "list.pls",
            "[playlist]\n\
             File1=/music/one.mp3\n\
             Title1=First\n\
             Length1=120\n\
             File2=http://example.com/stream\n\
             Title2=Radio\n\
             Length2=-1\n\
             NumberOfEntries=2\n\
             Version=2\n",
        );
        let mut items = Vec::new();
        PlsReader.append_to_playlist(&path, &mut items);
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].title(), "First");
        assert_eq!(
            items[0].attribute(Attribute::Duration),
            Some(AttributeValue::Int64(120_000_000))
        );
        assert_eq!(items[1].title(), "Radio");
        // Streaming entries get no duration.
        assert_eq!(items[1].attribute(Attribute::Duration), None);
    }

    #[test]
    fn pls_without_header_is_rejected() {
        let path = temp_file("bad.pls", "File1=/music/one.mp3\n");
        let mut items = Vec::new();
        PlsReader.append_to_playlist(&path, &mut items);
        assert!(items.is_empty());
    }

    #[test]
    fn reader_selection_follows_the_extension() {
        assert_eq!(identify_type(Path::new("a.m3u")), PlaylistFileType::M3u);
        assert_eq!(identify_type(Path::new("a.m3u8")), PlaylistFileType::M3u);
        assert_eq!(identify_type(Path::new("a.pls")), PlaylistFileType::Pls);
        assert_eq!(identify_type(Path::new("a.txt")), PlaylistFileType::Unknown);
        assert!(generate_reader(Path::new("a.m3u")).is_some());
        assert!(generate_reader(Path::new("a.mp3")).is_none());
    }
}
