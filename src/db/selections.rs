//! Client favorites.

use anyhow::{bail, Result};
use rusqlite::{params, OptionalExtension};

use super::Database;

impl Database {
    /// Flip the favorite mark on a photo. Returns whether it is now selected.
    ///
    /// Check-then-create/delete without a lock: concurrent toggles of the
    /// same photo resolve last-write-wins.
    pub fn toggle_selection(&self, project_id: i64, photo_id: i64) -> Result<bool> {
        let belongs: Option<i64> = self
            .conn
            .query_row(
                "SELECT id FROM photos WHERE id = ? AND project_id = ?",
                params![photo_id, project_id],
                |row| row.get(0),
            )
            .optional()?;
        if belongs.is_none() {
            bail!("Photo {} not found in project {}", photo_id, project_id);
        }

        let existing: Option<i64> = self
            .conn
            .query_row(
                "SELECT id FROM selections WHERE photo_id = ?",
                [photo_id],
                |row| row.get(0),
            )
            .optional()?;

        match existing {
            Some(selection_id) => {
                self.conn
                    .execute("DELETE FROM selections WHERE id = ?", [selection_id])?;
                Ok(false)
            }
            None => {
                self.conn.execute(
                    "INSERT OR IGNORE INTO selections (project_id, photo_id) VALUES (?, ?)",
                    params![project_id, photo_id],
                )?;
                Ok(true)
            }
        }
    }

    pub fn selection_count(&self, project_id: i64) -> Result<usize> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM selections WHERE project_id = ?",
            [project_id],
            |row| row.get(0),
        )?;
        Ok(count.max(0) as usize)
    }
}

#[cfg(test)]
mod tests {
    use crate::db::photos::tests::{insert, seeded};

    #[test]
    fn test_toggle_creates_then_deletes() {
        let (db, ids) = seeded(1, 2);
        assert!(db.toggle_selection(1, ids[0]).unwrap());
        assert_eq!(db.selection_count(1).unwrap(), 1);
        assert!(!db.toggle_selection(1, ids[0]).unwrap());
        assert_eq!(db.selection_count(1).unwrap(), 0);
    }

    #[test]
    fn test_toggle_rejects_foreign_photo() {
        let (db, _) = seeded(1, 1);
        let foreign = insert(&db, 2, 1);
        assert!(db.toggle_selection(1, foreign[0]).is_err());
        assert!(db.toggle_selection(1, 9999).is_err());
    }

    #[test]
    fn test_selected_flag_in_gallery() {
        let (db, ids) = seeded(1, 3);
        db.toggle_selection(1, ids[1]).unwrap();
        let selected: Vec<bool> = db.gallery_photos(1).unwrap().iter().map(|p| p.selected).collect();
        assert_eq!(selected, vec![false, true, false]);
    }
}
