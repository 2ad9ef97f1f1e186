//! Persistence for curated album suggestions.

use anyhow::{bail, Result};
use rusqlite::params;

use super::Database;
use crate::curation::{AlbumKey, AlbumSuggestion};

impl Database {
    /// Swap the project's suggestions for `albums` in one transaction, so
    /// readers see either the old set or the new one.
    pub fn replace_albums(
        &self,
        project_id: i64,
        albums: &[AlbumSuggestion],
    ) -> Result<Vec<AlbumSuggestion>> {
        let tx = self.conn.unchecked_transaction()?;
        tx.execute(
            "DELETE FROM album_suggestions WHERE project_id = ?",
            [project_id],
        )?;

        let mut stored = Vec::with_capacity(albums.len());
        {
            let mut insert_album = tx.prepare(
                r#"
                INSERT INTO album_suggestions (project_id, category, name, cover_photo_id, photo_count, position)
                VALUES (?, ?, ?, ?, ?, ?)
                "#,
            )?;
            let mut insert_member = tx.prepare(
                "INSERT INTO album_photos (album_id, photo_id, position) VALUES (?, ?, ?)",
            )?;

            for (position, album) in albums.iter().enumerate() {
                insert_album.execute(params![
                    project_id,
                    album.key.as_str(),
                    album.name,
                    album.cover_photo_id,
                    album.photo_count as i64,
                    position as i64,
                ])?;
                let album_id = tx.last_insert_rowid();
                for (index, photo_id) in album.photo_ids.iter().enumerate() {
                    insert_member.execute(params![album_id, photo_id, index as i64])?;
                }
                stored.push(AlbumSuggestion {
                    id: Some(album_id),
                    project_id,
                    ..album.clone()
                });
            }
        }
        tx.commit()?;
        Ok(stored)
    }

    pub fn albums(&self, project_id: i64) -> Result<Vec<AlbumSuggestion>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT id, category, name, cover_photo_id, photo_count
            FROM album_suggestions
            WHERE project_id = ?
            ORDER BY position ASC, id ASC
            "#,
        )?;
        let rows = stmt
            .query_map([project_id], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, Option<i64>>(3)?,
                    row.get::<_, i64>(4)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut members = self.conn.prepare(
            "SELECT photo_id FROM album_photos WHERE album_id = ? ORDER BY position ASC",
        )?;

        let mut albums = Vec::with_capacity(rows.len());
        for (id, category, name, cover_photo_id, photo_count) in rows {
            let Some(key) = AlbumKey::from_key(&category) else {
                tracing::warn!(album_id = id, category = %category, "Skipping album with unknown category");
                continue;
            };
            let photo_ids = members
                .query_map([id], |row| row.get(0))?
                .collect::<rusqlite::Result<Vec<i64>>>()?;
            albums.push(AlbumSuggestion {
                id: Some(id),
                project_id,
                key,
                name,
                cover_photo_id,
                photo_count: photo_count.max(0) as usize,
                photo_ids,
            });
        }
        Ok(albums)
    }

    pub fn rename_album(&self, album_id: i64, name: &str) -> Result<()> {
        let trimmed = name.trim();
        if trimmed.is_empty() {
            bail!("Album name cannot be empty");
        }
        let changed = self.conn.execute(
            "UPDATE album_suggestions SET name = ? WHERE id = ?",
            params![trimmed, album_id],
        )?;
        if changed == 0 {
            bail!("Album {} not found", album_id);
        }
        Ok(())
    }

    pub fn delete_album(&self, album_id: i64) -> Result<()> {
        let changed = self
            .conn
            .execute("DELETE FROM album_suggestions WHERE id = ?", [album_id])?;
        if changed == 0 {
            bail!("Album {} not found", album_id);
        }
        Ok(())
    }
}
