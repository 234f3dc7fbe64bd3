//! Index document ("note list")
//!
//! The index is the single structural document of a notebook: the set of
//! note summaries, the folders, and the display orders. It is always
//! replaced as a whole, locally and remotely; there is no field-level merge.
//!
//! ## Placement rules
//!
//! - A note with a `folder_id` naming an existing folder is listed in that
//!   folder's `note_ids`.
//! - Any other note is referenced from `top_level_order` when active and
//!   from `archived_top_level_order` when archived.
//! - Folders are referenced from `top_level_order`.
//!
//! [`IndexDocument::normalize`] restores these rules after edits or merges.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

use super::errors::DomainError;
use super::newtypes::{ContentHash, FolderId, NoteId};
use super::note::NoteMetadata;

/// Version tag written into every index document
pub const INDEX_VERSION: u32 = 1;

/// A folder grouping notes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Folder {
    pub id: FolderId,
    pub name: String,
    #[serde(default)]
    pub note_ids: Vec<NoteId>,
}

impl Folder {
    pub fn new(id: FolderId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            note_ids: Vec::new(),
        }
    }
}

/// Reference to a note or folder in a display order
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "camelCase")]
pub enum TopLevelItem {
    Note(NoteId),
    Folder(FolderId),
}

/// Where a note belongs in the display structure
#[derive(Debug, Clone, PartialEq, Eq)]
enum Placement {
    Folder(FolderId),
    Active,
    Archived,
}

/// The note list document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexDocument {
    pub version: u32,
    #[serde(default)]
    pub notes: Vec<NoteMetadata>,
    #[serde(default)]
    pub folders: Vec<Folder>,
    #[serde(default)]
    pub top_level_order: Vec<TopLevelItem>,
    #[serde(default)]
    pub archived_top_level_order: Vec<TopLevelItem>,
    #[serde(default)]
    pub collapsed_folder_ids: Vec<FolderId>,
}

impl Default for IndexDocument {
    fn default() -> Self {
        Self {
            version: INDEX_VERSION,
            notes: Vec::new(),
            folders: Vec::new(),
            top_level_order: Vec::new(),
            archived_top_level_order: Vec::new(),
            collapsed_folder_ids: Vec::new(),
        }
    }
}

impl IndexDocument {
    /// Create an empty index
    pub fn new() -> Self {
        Self::default()
    }

    // ------------------------------------------------------------------
    // Lookup
    // ------------------------------------------------------------------

    pub fn note(&self, id: &NoteId) -> Option<&NoteMetadata> {
        self.notes.iter().find(|n| &n.id == id)
    }

    pub fn contains_note(&self, id: &NoteId) -> bool {
        self.note(id).is_some()
    }

    pub fn folder(&self, id: &FolderId) -> Option<&Folder> {
        self.folders.iter().find(|f| &f.id == id)
    }

    pub fn note_ids(&self) -> impl Iterator<Item = &NoteId> {
        self.notes.iter().map(|n| &n.id)
    }

    /// Map of note id to content hash
    pub fn hashes(&self) -> BTreeMap<NoteId, ContentHash> {
        self.notes
            .iter()
            .map(|n| (n.id.clone(), n.content_hash.clone()))
            .collect()
    }

    /// Position of a note inside the list that should contain it
    pub fn position_of(&self, id: &NoteId) -> Option<usize> {
        let meta = self.note(id)?;
        let target = TopLevelItem::Note(id.clone());
        match self.placement(meta) {
            Placement::Folder(folder_id) => self
                .folder(&folder_id)
                .and_then(|f| f.note_ids.iter().position(|n| n == id)),
            Placement::Active => self.top_level_order.iter().position(|i| i == &target),
            Placement::Archived => self
                .archived_top_level_order
                .iter()
                .position(|i| i == &target),
        }
    }

    // ------------------------------------------------------------------
    // Note edits
    // ------------------------------------------------------------------

    /// Insert or replace a note record and keep its placement consistent.
    ///
    /// A new note is appended to the end of the list it belongs to; an
    /// existing note keeps its position unless its folder or archived state
    /// changed.
    pub fn upsert_note(&mut self, meta: NoteMetadata) {
        self.insert_note_at(meta, None);
    }

    /// Like [`upsert_note`](Self::upsert_note) but places a newly listed
    /// note at `position` (clamped) in its target list.
    pub fn insert_note_at(&mut self, meta: NoteMetadata, position: Option<usize>) {
        let id = meta.id.clone();
        let old_placement = self.note(&id).map(|m| self.placement(m));
        let new_placement = self.placement(&meta);

        match self.notes.iter_mut().find(|n| n.id == id) {
            Some(existing) => *existing = meta,
            None => self.notes.push(meta),
        }

        if old_placement.as_ref() == Some(&new_placement) && self.is_placed(&id, &new_placement) {
            return;
        }
        self.unplace(&id);
        self.place(&id, &new_placement, position);
    }

    /// Remove a note record and every reference to it.
    ///
    /// Returns the removed record, if any.
    pub fn remove_note(&mut self, id: &NoteId) -> Option<NoteMetadata> {
        let pos = self.notes.iter().position(|n| &n.id == id)?;
        let removed = self.notes.remove(pos);
        self.unplace(id);
        Some(removed)
    }

    // ------------------------------------------------------------------
    // Folder edits
    // ------------------------------------------------------------------

    /// Add a folder at the end of the top-level order.
    pub fn add_folder(&mut self, folder: Folder) {
        if self.folder(&folder.id).is_some() {
            return;
        }
        self.top_level_order
            .push(TopLevelItem::Folder(folder.id.clone()));
        self.folders.push(folder);
    }

    pub fn rename_folder(&mut self, id: &FolderId, name: impl Into<String>) -> Result<(), DomainError> {
        let folder = self
            .folders
            .iter_mut()
            .find(|f| &f.id == id)
            .ok_or_else(|| DomainError::UnknownFolder(id.to_string()))?;
        folder.name = name.into();
        Ok(())
    }

    /// Remove a folder. Its notes move to the top level and keep their
    /// records; the caller must clear `folder_id` on the note documents.
    pub fn remove_folder(&mut self, id: &FolderId) -> Result<Vec<NoteId>, DomainError> {
        let pos = self
            .folders
            .iter()
            .position(|f| &f.id == id)
            .ok_or_else(|| DomainError::UnknownFolder(id.to_string()))?;
        let folder = self.folders.remove(pos);
        let target = TopLevelItem::Folder(id.clone());
        self.top_level_order.retain(|i| i != &target);
        self.collapsed_folder_ids.retain(|f| f != id);

        for note in self.notes.iter_mut() {
            if note.folder_id.as_ref() == Some(id) {
                note.folder_id = None;
            }
        }
        self.normalize();
        Ok(folder.note_ids)
    }

    pub fn set_folder_collapsed(&mut self, id: &FolderId, collapsed: bool) -> Result<(), DomainError> {
        if self.folder(id).is_none() {
            return Err(DomainError::UnknownFolder(id.to_string()));
        }
        self.collapsed_folder_ids.retain(|f| f != id);
        if collapsed {
            self.collapsed_folder_ids.push(id.clone());
        }
        Ok(())
    }

    /// Move a top-level item to `position` (clamped) in the active order.
    pub fn move_top_level(&mut self, item: &TopLevelItem, position: usize) -> bool {
        let Some(current) = self.top_level_order.iter().position(|i| i == item) else {
            return false;
        };
        let item = self.top_level_order.remove(current);
        let position = position.min(self.top_level_order.len());
        self.top_level_order.insert(position, item);
        true
    }

    // ------------------------------------------------------------------
    // Normalization
    // ------------------------------------------------------------------

    /// Repair the display structure so that every note and folder is
    /// referenced exactly once from the list it belongs to.
    ///
    /// Duplicate records keep the last occurrence. Dangling references are
    /// dropped, unplaced items are appended in record order.
    pub fn normalize(&mut self) {
        let mut seen = HashSet::new();
        let mut notes: Vec<NoteMetadata> = Vec::with_capacity(self.notes.len());
        for meta in self.notes.drain(..).rev() {
            if seen.insert(meta.id.clone()) {
                notes.push(meta);
            }
        }
        notes.reverse();
        self.notes = notes;

        let mut seen_folders = HashSet::new();
        self.folders.retain(|f| seen_folders.insert(f.id.clone()));

        let placements: BTreeMap<NoteId, Placement> = self
            .notes
            .iter()
            .map(|n| (n.id.clone(), self.placement(n)))
            .collect();
        let folder_ids: HashSet<FolderId> = self.folders.iter().map(|f| f.id.clone()).collect();

        let mut seen_items = HashSet::new();
        self.top_level_order.retain(|item| {
            let keep = match item {
                TopLevelItem::Note(id) => placements.get(id) == Some(&Placement::Active),
                TopLevelItem::Folder(id) => folder_ids.contains(id),
            };
            keep && seen_items.insert(item.clone())
        });
        let mut seen_archived = HashSet::new();
        self.archived_top_level_order.retain(|item| {
            let keep = matches!(item, TopLevelItem::Note(id)
                if placements.get(id) == Some(&Placement::Archived));
            keep && seen_archived.insert(item.clone())
        });
        for folder in self.folders.iter_mut() {
            let mut seen_in_folder = HashSet::new();
            let folder_id = folder.id.clone();
            folder.note_ids.retain(|id| {
                placements.get(id) == Some(&Placement::Folder(folder_id.clone()))
                    && seen_in_folder.insert(id.clone())
            });
        }

        for folder_id in self.folders.iter().map(|f| f.id.clone()).collect::<Vec<_>>() {
            let item = TopLevelItem::Folder(folder_id);
            if !self.top_level_order.contains(&item) {
                self.top_level_order.push(item);
            }
        }
        for (id, placement) in self
            .notes
            .iter()
            .map(|n| (n.id.clone(), placements[&n.id].clone()))
            .collect::<Vec<_>>()
        {
            if !self.is_placed(&id, &placement) {
                self.place(&id, &placement, None);
            }
        }

        let mut seen_collapsed = HashSet::new();
        self.collapsed_folder_ids
            .retain(|id| folder_ids.contains(id) && seen_collapsed.insert(id.clone()));
        self.version = INDEX_VERSION;
    }

    // ------------------------------------------------------------------
    // Serialization
    // ------------------------------------------------------------------

    pub fn to_json_bytes(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec_pretty(self)
    }

    pub fn from_json_bytes(bytes: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(bytes)
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn placement(&self, meta: &NoteMetadata) -> Placement {
        match &meta.folder_id {
            Some(folder_id) if self.folder(folder_id).is_some() => {
                Placement::Folder(folder_id.clone())
            }
            _ if meta.archived => Placement::Archived,
            _ => Placement::Active,
        }
    }

    fn is_placed(&self, id: &NoteId, placement: &Placement) -> bool {
        let target = TopLevelItem::Note(id.clone());
        match placement {
            Placement::Folder(folder_id) => self
                .folder(folder_id)
                .is_some_and(|f| f.note_ids.contains(id)),
            Placement::Active => self.top_level_order.contains(&target),
            Placement::Archived => self.archived_top_level_order.contains(&target),
        }
    }

    fn place(&mut self, id: &NoteId, placement: &Placement, position: Option<usize>) {
        fn insert<T>(list: &mut Vec<T>, item: T, position: Option<usize>) {
            match position {
                Some(p) => list.insert(p.min(list.len()), item),
                None => list.push(item),
            }
        }
        match placement {
            Placement::Folder(folder_id) => {
                if let Some(folder) = self.folders.iter_mut().find(|f| &f.id == folder_id) {
                    insert(&mut folder.note_ids, id.clone(), position);
                }
            }
            Placement::Active => insert(
                &mut self.top_level_order,
                TopLevelItem::Note(id.clone()),
                position,
            ),
            Placement::Archived => insert(
                &mut self.archived_top_level_order,
                TopLevelItem::Note(id.clone()),
                position,
            ),
        }
    }

    fn unplace(&mut self, id: &NoteId) {
        let target = TopLevelItem::Note(id.clone());
        self.top_level_order.retain(|i| i != &target);
        self.archived_top_level_order.retain(|i| i != &target);
        for folder in self.folders.iter_mut() {
            folder.note_ids.retain(|n| n != id);
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::domain::note::Note;

    fn nid(s: &str) -> NoteId {
        NoteId::new(s.to_string()).unwrap()
    }

    fn fid(s: &str) -> FolderId {
        FolderId::new(s.to_string()).unwrap()
    }

    fn meta(id: &str) -> NoteMetadata {
        Note::new(nid(id), id, "").metadata()
    }

    #[test]
    fn upsert_appends_new_note_to_top_level() {
        let mut index = IndexDocument::new();
        index.upsert_note(meta("a"));
        index.upsert_note(meta("b"));
        assert_eq!(
            index.top_level_order,
            vec![TopLevelItem::Note(nid("a")), TopLevelItem::Note(nid("b"))]
        );
    }

    #[test]
    fn upsert_existing_note_keeps_position() {
        let mut index = IndexDocument::new();
        index.upsert_note(meta("a"));
        index.upsert_note(meta("b"));
        let mut updated = meta("a");
        updated.title = "renamed".into();
        updated.modified = Utc::now();
        index.upsert_note(updated);

        assert_eq!(index.position_of(&nid("a")), Some(0));
        assert_eq!(index.note(&nid("a")).unwrap().title, "renamed");
        assert_eq!(index.notes.len(), 2);
    }

    #[test]
    fn archiving_moves_note_to_archived_order() {
        let mut index = IndexDocument::new();
        index.upsert_note(meta("a"));
        let mut archived = meta("a");
        archived.archived = true;
        index.upsert_note(archived);

        assert!(index.top_level_order.is_empty());
        assert_eq!(
            index.archived_top_level_order,
            vec![TopLevelItem::Note(nid("a"))]
        );
    }

    #[test]
    fn note_in_folder_is_listed_in_folder() {
        let mut index = IndexDocument::new();
        index.add_folder(Folder::new(fid("work"), "Work"));
        let mut m = meta("a");
        m.folder_id = Some(fid("work"));
        index.upsert_note(m);

        assert_eq!(index.folder(&fid("work")).unwrap().note_ids, vec![nid("a")]);
        assert_eq!(
            index.top_level_order,
            vec![TopLevelItem::Folder(fid("work"))]
        );
    }

    #[test]
    fn remove_note_clears_all_references() {
        let mut index = IndexDocument::new();
        index.add_folder(Folder::new(fid("work"), "Work"));
        let mut m = meta("a");
        m.folder_id = Some(fid("work"));
        index.upsert_note(m);
        index.upsert_note(meta("b"));

        assert!(index.remove_note(&nid("a")).is_some());
        assert!(index.remove_note(&nid("missing")).is_none());
        assert!(index.folder(&fid("work")).unwrap().note_ids.is_empty());
        assert!(!index.contains_note(&nid("a")));
    }

    #[test]
    fn remove_folder_moves_notes_to_top_level() {
        let mut index = IndexDocument::new();
        index.add_folder(Folder::new(fid("work"), "Work"));
        let mut m = meta("a");
        m.folder_id = Some(fid("work"));
        index.upsert_note(m);
        index.set_folder_collapsed(&fid("work"), true).unwrap();

        let moved = index.remove_folder(&fid("work")).unwrap();
        assert_eq!(moved, vec![nid("a")]);
        assert_eq!(index.top_level_order, vec![TopLevelItem::Note(nid("a"))]);
        assert!(index.collapsed_folder_ids.is_empty());
        assert!(index.note(&nid("a")).unwrap().folder_id.is_none());
    }

    #[test]
    fn unknown_folder_edits_fail() {
        let mut index = IndexDocument::new();
        assert!(index.rename_folder(&fid("nope"), "x").is_err());
        assert!(index.set_folder_collapsed(&fid("nope"), true).is_err());
    }

    #[test]
    fn normalize_repairs_orders() {
        let mut index = IndexDocument::new();
        index.notes.push(meta("a"));
        index.notes.push(meta("b"));
        index.top_level_order = vec![
            TopLevelItem::Note(nid("b")),
            TopLevelItem::Note(nid("ghost")),
            TopLevelItem::Note(nid("b")),
            TopLevelItem::Folder(fid("gone")),
        ];
        index.collapsed_folder_ids.push(fid("gone"));

        index.normalize();

        assert_eq!(
            index.top_level_order,
            vec![TopLevelItem::Note(nid("b")), TopLevelItem::Note(nid("a"))]
        );
        assert!(index.collapsed_folder_ids.is_empty());
    }

    #[test]
    fn normalize_keeps_last_duplicate_record() {
        let mut index = IndexDocument::new();
        let first = meta("a");
        let mut second = meta("a");
        second.title = "second".into();
        index.notes.push(first);
        index.notes.push(second);

        index.normalize();

        assert_eq!(index.notes.len(), 1);
        assert_eq!(index.notes[0].title, "second");
    }

    #[test]
    fn insert_at_position_is_clamped() {
        let mut index = IndexDocument::new();
        index.upsert_note(meta("a"));
        index.insert_note_at(meta("b"), Some(0));
        index.insert_note_at(meta("c"), Some(99));
        assert_eq!(index.position_of(&nid("b")), Some(0));
        assert_eq!(index.position_of(&nid("c")), Some(2));
    }

    #[test]
    fn json_uses_tagged_items() {
        let mut index = IndexDocument::new();
        index.upsert_note(meta("a"));
        let value: serde_json::Value =
            serde_json::from_slice(&index.to_json_bytes().unwrap()).unwrap();
        assert_eq!(value["version"], INDEX_VERSION);
        assert_eq!(value["topLevelOrder"][0]["type"], "note");
        assert_eq!(value["topLevelOrder"][0]["id"], "a");
        assert!(value.get("archivedTopLevelOrder").is_some());
        assert!(value.get("collapsedFolderIds").is_some());
    }
}
