//! Structural merge helpers
//!
//! The remote index is the structural base of every merge. Notes that stay
//! on the local side are re-inserted at the position they hold locally.

use notesync_core::domain::{IndexDocument, NoteId, NoteMetadata};

/// Re-insert local notes into `target` at their local position.
///
/// A folder referenced by a re-inserted note but unknown to `target` is
/// copied over (without its other notes) so the note keeps its folder.
pub fn reinsert_local(target: &mut IndexDocument, local: &IndexDocument, ids: &[NoteId]) {
    for id in ids {
        let Some(meta) = local.note(id) else {
            continue;
        };
        copy_folder_if_missing(target, local, meta);
        target.insert_note_at(meta.clone(), local.position_of(id));
    }
    target.normalize();
}

/// Replace the records of `ids` in `target` with their current local
/// state: updated when the note still exists locally, removed otherwise.
///
/// Used when local edits landed while a cycle was running.
pub fn overlay_local(target: &mut IndexDocument, local: &IndexDocument, ids: &[NoteId]) {
    for id in ids {
        match local.note(id) {
            Some(meta) if target.contains_note(id) => {
                copy_folder_if_missing(target, local, meta);
                target.upsert_note(meta.clone());
            }
            Some(meta) => {
                copy_folder_if_missing(target, local, meta);
                target.insert_note_at(meta.clone(), local.position_of(id));
            }
            None => {
                target.remove_note(id);
            }
        }
    }
    target.normalize();
}

/// Replace a record in place, keeping the base position.
pub fn apply_local_record(target: &mut IndexDocument, local: &IndexDocument, meta: &NoteMetadata) {
    copy_folder_if_missing(target, local, meta);
    if target.contains_note(&meta.id) {
        target.upsert_note(meta.clone());
    } else {
        target.insert_note_at(meta.clone(), local.position_of(&meta.id));
    }
}

fn copy_folder_if_missing(target: &mut IndexDocument, local: &IndexDocument, meta: &NoteMetadata) {
    let Some(folder_id) = &meta.folder_id else {
        return;
    };
    if target.folder(folder_id).is_some() {
        return;
    }
    if let Some(folder) = local.folder(folder_id) {
        let mut copy = folder.clone();
        copy.note_ids.clear();
        target.add_folder(copy);
    }
}
