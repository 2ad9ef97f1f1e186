//! Photo analysis and curation pipeline for client delivery galleries.
//!
//! Uploaded photos are scored by two inference backends (a deterministic
//! vision metrics service and an optional multimodal LLM), categorized, and
//! curated into album suggestions. Client favorites drive a taste-based
//! reordering of the gallery.

pub mod analysis;
pub mod config;
pub mod curation;
pub mod db;
pub mod error;
pub mod llm;
pub mod logging;
pub mod storage;
pub mod vision;
pub mod worker;
