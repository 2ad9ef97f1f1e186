//! Curation on top of finished analyses: album suggestions and the
//! favorites-driven gallery order.

pub mod affinity;
pub mod albums;
pub mod selection;

pub use affinity::{compute_order, should_recompute, AffinityEngine, TasteProfile};
pub use albums::{curated_count, plan_albums, AlbumCurator, AlbumKey, AlbumSuggestion};
pub use selection::{toggle_selection, SelectionToggle};
