//! Undoable playlist edits and the command stack driving them.

use std::path::PathBuf;
use std::sync::Arc;

use log::error;
use rand::rngs::StdRng;
use rand::{RngExt, SeedableRng};

use crate::error::{PlayerError, Result};
use crate::playlist::item::PlaylistItemRef;
use crate::playlist::{Playlist, APPEND_INDEX_APPEND_LAST, APPEND_INDEX_REPLACE_PLAYLIST};

/// An undoable action. `perform` and `undo` are inverses on the observable
/// playlist state.
pub trait Command: Send {
    fn init_check(&self) -> Result<()>;

    fn perform(&mut self) -> Result<()>;

    fn undo(&mut self) -> Result<()>;

    fn name(&self) -> String;
}

/// LIFO of performed commands. Redo history is dropped whenever a new
/// command performs successfully.
pub struct CommandStack {
    undo_stack: Vec<Box<dyn Command>>,
    redo_stack: Vec<Box<dyn Command>>,
}

impl CommandStack {
    pub fn new() -> CommandStack {
        CommandStack {
            undo_stack: Vec::new(),
            redo_stack: Vec::new(),
        }
    }

    pub fn perform(&mut self, mut command: Box<dyn Command>) -> Result<()> {
        command.init_check()?;
        command.perform()?;
        self.undo_stack.push(command);
        self.redo_stack.clear();
        Ok(())
    }

    pub fn undo(&mut self) -> Result<()> {
        let mut command = self.undo_stack.pop().ok_or(PlayerError::EntryNotFound)?;
        command.undo()?;
        self.redo_stack.push(command);
        Ok(())
    }

    pub fn redo(&mut self) -> Result<()> {
        let mut command = self.redo_stack.pop().ok_or(PlayerError::EntryNotFound)?;
        command.perform()?;
        self.undo_stack.push(command);
        Ok(())
    }

    pub fn can_undo(&self) -> bool {
        !self.undo_stack.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo_stack.is_empty()
    }

    pub fn undo_name(&self) -> Option<String> {
        self.undo_stack.last().map(|command| command.name())
    }

    pub fn redo_name(&self) -> Option<String> {
        self.redo_stack.last().map(|command| command.name())
    }
}

/// Re-seats the currently playing item after a shuffle of indices.
fn restore_current_item(playlist: &Playlist, current: Option<PlaylistItemRef>) {
    if let Some(current) = current {
        if let Some(index) = playlist.index_of(&current) {
            playlist.set_current_item_index_quiet(index as i32);
        }
    }
}

// #
// # MovePlaylistItemsCommand
// #

pub struct MovePlaylistItemsCommand {
    playlist: Arc<Playlist>,
    items: Vec<PlaylistItemRef>,
    indices: Vec<usize>,
    to_index: usize,
}

impl MovePlaylistItemsCommand {
    pub fn new(
        playlist: Arc<Playlist>,
        indices: Vec<usize>,
        to_index: usize,
    ) -> Result<MovePlaylistItemsCommand> {
        let mut items = Vec::with_capacity(indices.len());
        for &index in &indices {
            items.push(playlist.item_at(index).ok_or(PlayerError::BadIndex)?);
        }
        // Compensate the target for items removed before it.
        let items_before_index = indices.iter().filter(|&&index| index < to_index).count();
        Ok(MovePlaylistItemsCommand {
            playlist,
            items,
            indices,
            to_index: to_index - items_before_index,
        })
    }
}

impl Command for MovePlaylistItemsCommand {
    fn init_check(&self) -> Result<()> {
        if self.items.is_empty() {
            return Err(PlayerError::NoInit);
        }
        if self.indices[0] != self.to_index {
            // A change is guaranteed.
            return Ok(());
        }
        // The insertion index equals the first moved item; only a
        // non-contiguous selection changes anything.
        let contiguous = self
            .indices
            .windows(2)
            .all(|pair| pair[1] == pair[0] + 1);
        if contiguous {
            return Err(PlayerError::BadInput);
        }
        Ok(())
    }

    fn perform(&mut self) -> Result<()> {
        let current = self.playlist.current_item();
        for (removed, &index) in self.indices.iter().enumerate() {
            self.playlist.remove_item_internal(index - removed, false);
        }
        for (offset, item) in self.items.iter().enumerate() {
            self.playlist.add_item_at(item.clone(), self.to_index + offset);
        }
        restore_current_item(&self.playlist, current);
        Ok(())
    }

    fn undo(&mut self) -> Result<()> {
        let current = self.playlist.current_item();
        for _ in 0..self.items.len() {
            self.playlist.remove_item_internal(self.to_index, false);
        }
        for (item, &index) in self.items.iter().zip(&self.indices) {
            self.playlist.add_item_at(item.clone(), index);
        }
        restore_current_item(&self.playlist, current);
        Ok(())
    }

    fn name(&self) -> String {
        if self.items.len() > 1 {
            "Move Entries".to_string()
        } else {
            "Move Entry".to_string()
        }
    }
}

// #
// # RemovePlaylistItemsCommand
// #

pub struct RemovePlaylistItemsCommand {
    playlist: Arc<Playlist>,
    items: Vec<PlaylistItemRef>,
    indices: Vec<usize>,
    move_files_to_trash: bool,
    moved_to_trash: Vec<bool>,
    move_error_shown: bool,
}

impl RemovePlaylistItemsCommand {
    pub fn new(
        playlist: Arc<Playlist>,
        indices: Vec<usize>,
        move_files_to_trash: bool,
    ) -> Result<RemovePlaylistItemsCommand> {
        let mut items = Vec::with_capacity(indices.len());
        for &index in &indices {
            items.push(playlist.item_at(index).ok_or(PlayerError::BadIndex)?);
        }
        let count = items.len();
        Ok(RemovePlaylistItemsCommand {
            playlist,
            items,
            indices,
            move_files_to_trash,
            moved_to_trash: vec![false; count],
            move_error_shown: false,
        })
    }
}

impl Command for RemovePlaylistItemsCommand {
    fn init_check(&self) -> Result<()> {
        if self.items.is_empty() {
            return Err(PlayerError::NoInit);
        }
        Ok(())
    }

    fn perform(&mut self) -> Result<()> {
        let mut last_removed_index = 0;
        for (removed, &index) in self.indices.iter().enumerate() {
            last_removed_index = index - removed;
            self.playlist.remove_item(last_removed_index);
        }

        // In case we removed the currently playing file.
        if self.playlist.current_item_index() == -1 {
            self.playlist.set_current_item_index(last_removed_index as i32);
        }

        if self.move_files_to_trash {
            let mut move_error = None;
            let mut error_on_all_files = true;
            for (i, item) in self.items.iter().enumerate() {
                match item.move_into_trash() {
                    Ok(()) => {
                        self.moved_to_trash[i] = true;
                        error_on_all_files = false;
                    }
                    Err(err) => move_error = Some(err),
                }
            }
            if let Some(err) = move_error {
                if !self.move_error_shown {
                    self.move_error_shown = true;
                    if error_on_all_files {
                        error!("no files could be moved into the trash: {}", err);
                    } else {
                        error!("some files could not be moved into the trash: {}", err);
                    }
                }
            }
        }

        Ok(())
    }

    fn undo(&mut self) -> Result<()> {
        if self.move_files_to_trash {
            for (i, item) in self.items.iter().enumerate() {
                if self.moved_to_trash[i] {
                    if item.restore_from_trash().is_ok() {
                        self.moved_to_trash[i] = false;
                    }
                }
            }
        }

        let current = self.playlist.current_item();
        for (item, &index) in self.items.iter().zip(&self.indices) {
            self.playlist.add_item_at(item.clone(), index);
        }
        restore_current_item(&self.playlist, current);
        Ok(())
    }

    fn name(&self) -> String {
        match (self.move_files_to_trash, self.items.len() > 1) {
            (true, true) => "Remove Entries into Trash".to_string(),
            (true, false) => "Remove Entry into Trash".to_string(),
            (false, true) => "Remove Entries".to_string(),
            (false, false) => "Remove Entry".to_string(),
        }
    }
}

// #
// # RandomizePlaylistItemsCommand
// #

pub struct RandomizePlaylistItemsCommand {
    playlist: Arc<Playlist>,
    items: Vec<PlaylistItemRef>,
    list_indices: Vec<usize>,
    /// Precomputed permutation, so undo is deterministic.
    random_internal_indices: Vec<usize>,
}

impl RandomizePlaylistItemsCommand {
    pub fn new(
        playlist: Arc<Playlist>,
        indices: Vec<usize>,
    ) -> Result<RandomizePlaylistItemsCommand> {
        let mut items = Vec::with_capacity(indices.len());
        for &index in &indices {
            items.push(playlist.item_at(index).ok_or(PlayerError::BadIndex)?);
        }

        let count = items.len();
        let mut permutation: Vec<usize> = (0..count).collect();
        let mut seed = [0u8; 32];
        getrandom::fill(&mut seed).map_err(|_| PlayerError::NoInit)?;
        let mut rng = StdRng::from_seed(seed);
        for i in (1..count).rev() {
            let j = rng.random_range(0..=i);
            permutation.swap(i, j);
        }

        Ok(RandomizePlaylistItemsCommand {
            playlist,
            items,
            list_indices: indices,
            random_internal_indices: permutation,
        })
    }

    fn reorder(&mut self, random: bool) -> Result<()> {
        let current = self.playlist.current_item();
        for (removed, &index) in self.list_indices.iter().enumerate() {
            self.playlist.remove_item_internal(index - removed, false);
        }
        for (i, &index) in self.list_indices.iter().enumerate() {
            let item = if random {
                self.items[self.random_internal_indices[i]].clone()
            } else {
                self.items[i].clone()
            };
            self.playlist.add_item_at(item, index);
        }
        restore_current_item(&self.playlist, current);
        Ok(())
    }
}

impl Command for RandomizePlaylistItemsCommand {
    fn init_check(&self) -> Result<()> {
        if self.items.is_empty() {
            return Err(PlayerError::NoInit);
        }
        Ok(())
    }

    fn perform(&mut self) -> Result<()> {
        self.reorder(true)
    }

    fn undo(&mut self) -> Result<()> {
        self.reorder(false)
    }

    fn name(&self) -> String {
        "Randomize Entries".to_string()
    }
}

// #
// # ImportPlaylistItemsCommand
// #

pub struct ImportPlaylistItemsCommand {
    playlist: Arc<Playlist>,
    new_items: Vec<PlaylistItemRef>,
    old_items: Vec<PlaylistItemRef>,
    to_index: i32,
    playing_index: i32,
    items_added: bool,
}

impl ImportPlaylistItemsCommand {
    pub fn new(
        playlist: Arc<Playlist>,
        paths: &[PathBuf],
        to_index: i32,
        sort_items: bool,
    ) -> Result<ImportPlaylistItemsCommand> {
        // Parse into a scratch playlist first, so a failed import leaves
        // the target untouched.
        let temporary = Playlist::new();
        temporary.append_items(paths, APPEND_INDEX_REPLACE_PLAYLIST, sort_items);
        let new_items: Vec<PlaylistItemRef> = temporary
            .items()
            .into_iter()
            .filter(|item| !playlist.extra_media_exists_for(item))
            .map(|item| item.clone_item())
            .collect();
        if new_items.is_empty() {
            return Err(PlayerError::NoInit);
        }

        let playing_index = playlist.current_item_index();
        let old_items = if to_index == APPEND_INDEX_REPLACE_PLAYLIST {
            playlist
                .items()
                .into_iter()
                .map(|item| item.clone_item())
                .collect()
        } else {
            Vec::new()
        };

        Ok(ImportPlaylistItemsCommand {
            playlist,
            new_items,
            old_items,
            to_index,
            playing_index,
            items_added: false,
        })
    }
}

impl Command for ImportPlaylistItemsCommand {
    fn init_check(&self) -> Result<()> {
        if self.new_items.is_empty() {
            return Err(PlayerError::NoInit);
        }
        Ok(())
    }

    fn perform(&mut self) -> Result<()> {
        self.items_added = true;

        if self.to_index == APPEND_INDEX_APPEND_LAST {
            self.to_index = self.playlist.count() as i32;
        }
        let index = if self.to_index == APPEND_INDEX_REPLACE_PLAYLIST {
            self.playlist.make_empty();
            0
        } else {
            self.to_index as usize
        };

        let start_playing = self.playlist.is_empty();
        for (offset, item) in self.new_items.iter().enumerate() {
            self.playlist.add_item_at(item.clone(), index + offset);
        }
        if start_playing {
            self.playlist.set_current_item_index(0);
        }
        Ok(())
    }

    fn undo(&mut self) -> Result<()> {
        self.items_added = false;

        if self.to_index == APPEND_INDEX_REPLACE_PLAYLIST {
            self.playlist.make_empty();
            for (offset, item) in self.old_items.iter().enumerate() {
                self.playlist.add_item_at(item.clone(), offset);
            }
            if self.playing_index >= 0 {
                self.playlist.set_current_item_index_quiet(self.playing_index);
            }
        } else {
            for _ in 0..self.new_items.len() {
                self.playlist.remove_item_internal(self.to_index as usize, false);
            }
        }
        Ok(())
    }

    fn name(&self) -> String {
        if self.new_items.len() > 1 {
            "Import Entries".to_string()
        } else {
            "Import Entry".to_string()
        }
    }
}

// #
// # CopyPlaylistItemsCommand
// #

pub struct CopyPlaylistItemsCommand {
    playlist: Arc<Playlist>,
    copies: Vec<PlaylistItemRef>,
    to_index: usize,
}

impl CopyPlaylistItemsCommand {
    pub fn new(
        playlist: Arc<Playlist>,
        indices: Vec<usize>,
        to_index: usize,
    ) -> Result<CopyPlaylistItemsCommand> {
        let mut copies = Vec::with_capacity(indices.len());
        for &index in &indices {
            let item = playlist.item_at(index).ok_or(PlayerError::BadIndex)?;
            copies.push(item.clone_item());
        }
        Ok(CopyPlaylistItemsCommand {
            playlist,
            copies,
            to_index,
        })
    }
}

impl Command for CopyPlaylistItemsCommand {
    fn init_check(&self) -> Result<()> {
        if self.copies.is_empty() {
            return Err(PlayerError::NoInit);
        }
        Ok(())
    }

    fn perform(&mut self) -> Result<()> {
        for (offset, item) in self.copies.iter().enumerate() {
            self.playlist.add_item_at(item.clone(), self.to_index + offset);
        }
        Ok(())
    }

    fn undo(&mut self) -> Result<()> {
        for _ in 0..self.copies.len() {
            self.playlist.remove_item_internal(self.to_index, false);
        }
        Ok(())
    }

    fn name(&self) -> String {
        if self.copies.len() > 1 {
            "Copy Entries".to_string()
        } else {
            "Copy Entry".to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::playlist::item::UrlPlaylistItem;

    fn playlist_with(urls: &[&str]) -> Arc<Playlist> {
        let playlist = Playlist::new();
        for url in urls {
            playlist.add_item(Arc::new(UrlPlaylistItem::new(url.to_string())));
        }
        playlist
    }

    fn uris(playlist: &Playlist) -> Vec<String> {
        playlist
            .items()
            .iter()
            .map(|item| item.location_uri())
            .collect()
    }

    #[test]
    fn move_command_round_trips() {
        let playlist = playlist_with(&["u://a", "u://b", "u://c", "u://d"]);
        playlist.set_current_item_index(1);
        let before = uris(&playlist);

        let mut command =
            MovePlaylistItemsCommand::new(playlist.clone(), vec![0, 1], 3).unwrap();
        command.perform().unwrap();
        assert_eq!(uris(&playlist), vec!["u://c", "u://a", "u://b", "u://d"]);
        // The playing item kept its identity.
        assert_eq!(playlist.current_item().unwrap().location_uri(), "u://b");

        command.undo().unwrap();
        assert_eq!(uris(&playlist), before);
        assert_eq!(playlist.current_item_index(), 1);

        command.perform().unwrap();
        assert_eq!(uris(&playlist), vec!["u://c", "u://a", "u://b", "u://d"]);
    }

    #[test]
    fn contiguous_self_move_fails_init_check() {
        let playlist = playlist_with(&["u://a", "u://b", "u://c"]);
        let command = MovePlaylistItemsCommand::new(playlist, vec![1, 2], 1).unwrap();
        assert!(command.init_check().is_err());
    }

    #[test]
    fn remove_command_round_trips() {
        let playlist = playlist_with(&["u://a", "u://b", "u://c"]);
        playlist.set_current_item_index(1);
        let before = uris(&playlist);

        let mut command =
            RemovePlaylistItemsCommand::new(playlist.clone(), vec![0, 2], false).unwrap();
        command.perform().unwrap();
        assert_eq!(uris(&playlist), vec!["u://b"]);

        command.undo().unwrap();
        assert_eq!(uris(&playlist), before);
        assert_eq!(playlist.current_item().unwrap().location_uri(), "u://b");
    }

    #[test]
    fn randomize_undo_is_deterministic() {
        let playlist = playlist_with(&["u://a", "u://b", "u://c", "u://d", "u://e"]);
        let before = uris(&playlist);

        let mut command =
            RandomizePlaylistItemsCommand::new(playlist.clone(), vec![0, 1, 2, 3, 4]).unwrap();
        command.perform().unwrap();
        let shuffled = uris(&playlist);
        command.undo().unwrap();
        assert_eq!(uris(&playlist), before);
        command.perform().unwrap();
        // Re-performing applies the same precomputed permutation.
        assert_eq!(uris(&playlist), shuffled);
    }

    #[test]
    fn command_stack_clears_redo_on_new_perform() {
        let playlist = playlist_with(&["u://a", "u://b", "u://c"]);
        let mut stack = CommandStack::new();

        stack
            .perform(Box::new(
                RemovePlaylistItemsCommand::new(playlist.clone(), vec![0], false).unwrap(),
            ))
            .unwrap();
        assert!(stack.can_undo());
        stack.undo().unwrap();
        assert!(stack.can_redo());

        stack
            .perform(Box::new(
                RemovePlaylistItemsCommand::new(playlist.clone(), vec![1], false).unwrap(),
            ))
            .unwrap();
        assert!(!stack.can_redo());
        assert_eq!(stack.undo_name().unwrap(), "Remove Entry");
    }

    #[test]
    fn copy_command_duplicates_and_undoes() {
        let playlist = playlist_with(&["u://a", "u://b"]);
        let mut command =
            CopyPlaylistItemsCommand::new(playlist.clone(), vec![0, 1], 2).unwrap();
        command.perform().unwrap();
        assert_eq!(uris(&playlist), vec!["u://a", "u://b", "u://a", "u://b"]);
        command.undo().unwrap();
        assert_eq!(uris(&playlist), vec!["u://a", "u://b"]);
    }

    #[test]
    fn import_command_replaces_and_restores() {
        let dir = std::env::temp_dir().join(format!(
            "tonearm_import_cmd_{}_{}",
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap()
                .as_nanos()
        ));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("one.mp3"), b"x").unwrap();

        let playlist = playlist_with(&["u://a", "u://b"]);
        playlist.set_current_item_index(1);

        let mut command = ImportPlaylistItemsCommand::new(
            playlist.clone(),
            &[dir.join("one.mp3")],
            APPEND_INDEX_REPLACE_PLAYLIST,
            false,
        )
        .unwrap();
        command.perform().unwrap();
        assert_eq!(playlist.count(), 1);
        assert!(uris(&playlist)[0].ends_with("one.mp3"));

        command.undo().unwrap();
        assert_eq!(uris(&playlist), vec!["u://a", "u://b"]);
        assert_eq!(playlist.current_item_index(), 1);

        let _ = std::fs::remove_dir_all(&dir);
    }
}
