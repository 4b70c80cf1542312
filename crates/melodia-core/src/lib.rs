//! # melodia-core: Pure Types for the Melodia Library Store
//!
//! Entity definitions shared by the storage layer and its external
//! collaborators (menus, display, import tools). Nothing in here touches a
//! database, a file or the network.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Melodia Architecture                             │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │         External collaborators (console menus, display)         │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               melodia-db (pool, cache, maintenance)             │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               ★ melodia-core (THIS CRATE) ★                     │   │
//! │  │   types: Artist, Album, Song, Playlist, Entity                  │   │
//! │  │   validation: ids, names, years, identity keys                  │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example Usage
//!
//! ```rust
//! use melodia_core::{Artist, Entity};
//! use melodia_core::validation::normalize_key;
//!
//! let artist = Artist::new("Radiohead");
//! assert!(artist.validate().is_ok());
//! assert_eq!(normalize_key("  RadioHead "), "radiohead");
//! ```

pub mod error;
pub mod types;
pub mod validation;

pub use error::{CoreError, ValidationError};
pub use types::*;

/// Reserved id of the placeholder artist that absorbs orphaned references.
pub const SENTINEL_ARTIST_ID: &str = "00000000-0000-0000-0000-000000000000";

/// Display name of the placeholder artist.
///
/// Older databases created the sentinel with a random id, so the repair pass
/// still falls back to matching this exact name.
pub const SENTINEL_ARTIST_NAME: &str = "Unknown Artist";

/// Maximum length of any entity id.
pub const MAX_ID_LEN: usize = 64;
