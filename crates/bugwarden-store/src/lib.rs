//! # Bugwarden Store
//!
//! Local state shared by every workflow:
//! - [`CacheStore`] — revision-addressed payload cache (redb), one table per key
//! - [`CursorStore`] — per-workflow string cursors (SQLite or in-memory)
//! - [`ScopedCursors`] — typed cursor access bound to one workflow name

pub mod cache;
pub mod cursor;

pub use cache::CacheStore;
pub use cursor::{CursorStore, MemoryCursorStore, ScopedCursors, SqliteCursorStore, open_cursor_store};
