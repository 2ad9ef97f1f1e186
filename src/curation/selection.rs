use anyhow::Result;
use serde::Serialize;

use super::affinity::{should_recompute, AffinityEngine, MIN_FAVORITES};
use crate::db::Database;

/// Result of a favorite toggle, as reported back to the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SelectionToggle {
    pub selected: bool,
    pub total_selected: usize,
    /// The client order was recomputed by this toggle.
    pub reordered: bool,
}

/// Flip a favorite and keep the client order in step with the new count.
pub fn toggle_selection(db: &Database, project_id: i64, photo_id: i64) -> Result<SelectionToggle> {
    let selected = db.toggle_selection(project_id, photo_id)?;
    let total_selected = db.selection_count(project_id)?;

    let reordered = if should_recompute(total_selected) {
        AffinityEngine::new(db).refresh(project_id)?;
        true
    } else {
        if total_selected < MIN_FAVORITES {
            db.clear_client_order(project_id)?;
        }
        false
    };

    tracing::debug!(project_id, photo_id, selected, total_selected, reordered, "Selection toggled");
    Ok(SelectionToggle {
        selected,
        total_selected,
        reordered,
    })
}
