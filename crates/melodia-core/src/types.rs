//! # Domain Types
//!
//! The four entities persisted by the library store.
//!
//! ## Type Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Domain Types                                    │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐       │
//! │  │     Artist      │◄──│      Album      │◄──│      Song       │       │
//! │  │  ─────────────  │   │  ─────────────  │   │  ─────────────  │       │
//! │  │  id             │   │  id             │   │  id             │       │
//! │  │  name           │   │  title          │   │  title          │       │
//! │  │  biography      │   │  artist_id (FK) │   │  artist_id (FK) │       │
//! │  │  album_ids[]    │   │  year, genre    │   │  album_id  (FK) │       │
//! │  └─────────────────┘   │  song_ids[]     │   │  duration_secs  │       │
//! │                        └─────────────────┘   └────────▲────────┘       │
//! │                                                       │                 │
//! │                        ┌─────────────────┐            │                 │
//! │                        │    Playlist     │────────────┘                 │
//! │                        │  song_ids[]     │  (link rows, ordered)        │
//! │                        └─────────────────┘                              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! In the backing store every cross-reference is a plain id. The `*_ids`
//! lists are filled in when a row is read; they are never written back
//! through the owning entity.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::validation::{
    validate_id, validate_optional_id, validate_text, validate_year, ValidationResult,
};

/// Capability shared by every entity the store persists.
pub trait Entity: Clone + std::fmt::Debug + Send + Sync + 'static {
    /// Entity name used in logs and errors ("Artist", "Song", ...).
    const KIND: &'static str;

    /// Primary key.
    fn id(&self) -> &str;

    /// Checks the entity before it is handed to a store.
    fn validate(&self) -> ValidationResult<()>;
}

/// Generates a new entity id.
pub fn generate_id() -> String {
    Uuid::new_v4().to_string()
}

// =============================================================================
// Artist
// =============================================================================

/// A performing artist.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artist {
    pub id: String,
    pub name: String,
    pub biography: Option<String>,
    /// Albums owned by this artist, by id.
    #[serde(default)]
    pub album_ids: Vec<String>,
}

impl Artist {
    /// Creates an artist with a freshly generated id.
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_id(generate_id(), name)
    }

    pub fn with_id(id: impl Into<String>, name: impl Into<String>) -> Self {
        Artist {
            id: id.into(),
            name: name.into(),
            biography: None,
            album_ids: Vec::new(),
        }
    }

    pub fn biography(mut self, biography: impl Into<String>) -> Self {
        self.biography = Some(biography.into());
        self
    }

    /// Returns true if this is the placeholder artist used by integrity repair.
    pub fn is_sentinel(&self) -> bool {
        self.id == crate::SENTINEL_ARTIST_ID
    }
}

impl Entity for Artist {
    const KIND: &'static str = "Artist";

    fn id(&self) -> &str {
        &self.id
    }

    fn validate(&self) -> ValidationResult<()> {
        validate_id("id", &self.id)?;
        validate_text("name", &self.name, 200)
    }
}

// =============================================================================
// Album
// =============================================================================

/// An album released by one artist.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Album {
    pub id: String,
    pub title: String,
    pub artist_id: Option<String>,
    pub year: Option<i32>,
    pub genre: Option<String>,
    /// Tracks on this album, by id.
    #[serde(default)]
    pub song_ids: Vec<String>,
}

impl Album {
    pub fn new(title: impl Into<String>, artist_id: impl Into<String>) -> Self {
        Self::with_id(generate_id(), title, artist_id)
    }

    pub fn with_id(
        id: impl Into<String>,
        title: impl Into<String>,
        artist_id: impl Into<String>,
    ) -> Self {
        Album {
            id: id.into(),
            title: title.into(),
            artist_id: Some(artist_id.into()),
            year: None,
            genre: None,
            song_ids: Vec::new(),
        }
    }

    pub fn year(mut self, year: i32) -> Self {
        self.year = Some(year);
        self
    }

    pub fn genre(mut self, genre: impl Into<String>) -> Self {
        self.genre = Some(genre.into());
        self
    }
}

impl Entity for Album {
    const KIND: &'static str = "Album";

    fn id(&self) -> &str {
        &self.id
    }

    fn validate(&self) -> ValidationResult<()> {
        validate_id("id", &self.id)?;
        validate_text("title", &self.title, 200)?;
        validate_optional_id("artist_id", self.artist_id.as_deref())?;
        if let Some(year) = self.year {
            validate_year(year)?;
        }
        Ok(())
    }
}

// =============================================================================
// Song
// =============================================================================

/// A single track.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Song {
    pub id: String,
    pub title: String,
    pub artist_id: Option<String>,
    pub album_id: Option<String>,
    pub duration_secs: u32,
    pub genre: Option<String>,
}

impl Song {
    pub fn new(title: impl Into<String>, artist_id: impl Into<String>) -> Self {
        Self::with_id(generate_id(), title, artist_id)
    }

    pub fn with_id(
        id: impl Into<String>,
        title: impl Into<String>,
        artist_id: impl Into<String>,
    ) -> Self {
        Song {
            id: id.into(),
            title: title.into(),
            artist_id: Some(artist_id.into()),
            album_id: None,
            duration_secs: 0,
            genre: None,
        }
    }

    pub fn album(mut self, album_id: impl Into<String>) -> Self {
        self.album_id = Some(album_id.into());
        self
    }

    pub fn duration_secs(mut self, secs: u32) -> Self {
        self.duration_secs = secs;
        self
    }

    pub fn genre(mut self, genre: impl Into<String>) -> Self {
        self.genre = Some(genre.into());
        self
    }
}

impl Entity for Song {
    const KIND: &'static str = "Song";

    fn id(&self) -> &str {
        &self.id
    }

    fn validate(&self) -> ValidationResult<()> {
        validate_id("id", &self.id)?;
        validate_text("title", &self.title, 200)?;
        validate_optional_id("artist_id", self.artist_id.as_deref())?;
        validate_optional_id("album_id", self.album_id.as_deref())
    }
}

// =============================================================================
// Playlist
// =============================================================================

/// A user-curated, ordered list of songs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Playlist {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    /// Songs in play order. The same song may appear more than once.
    #[serde(default)]
    pub song_ids: Vec<String>,
}

impl Playlist {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_id(generate_id(), name)
    }

    pub fn with_id(id: impl Into<String>, name: impl Into<String>) -> Self {
        Playlist {
            id: id.into(),
            name: name.into(),
            description: None,
            song_ids: Vec::new(),
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn songs<I, S>(mut self, song_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.song_ids = song_ids.into_iter().map(Into::into).collect();
        self
    }
}

impl Entity for Playlist {
    const KIND: &'static str = "Playlist";

    fn id(&self) -> &str {
        &self.id
    }

    fn validate(&self) -> ValidationResult<()> {
        validate_id("id", &self.id)?;
        validate_text("name", &self.name, 200)?;
        for song_id in &self.song_ids {
            validate_id("song_ids", song_id)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SENTINEL_ARTIST_ID;

    #[test]
    fn test_generated_ids_are_unique() {
        let a = Artist::new("Portishead");
        let b = Artist::new("Portishead");
        assert_ne!(a.id, b.id);
        assert!(a.validate().is_ok());
    }

    #[test]
    fn test_empty_id_is_rejected() {
        let artist = Artist::with_id("", "Massive Attack");
        assert!(artist.validate().is_err());

        let song = Song::with_id("s1", "Teardrop", "   ");
        assert!(song.validate().is_err());
    }

    #[test]
    fn test_album_year_is_checked() {
        let album = Album::with_id("al1", "Mezzanine", "ar1").year(1998);
        assert!(album.validate().is_ok());

        let album = Album::with_id("al1", "Mezzanine", "ar1").year(98);
        assert!(album.validate().is_err());
    }

    #[test]
    fn test_playlist_song_ids_are_checked() {
        let playlist = Playlist::with_id("p1", "Late night").songs(["s1", "s2"]);
        assert!(playlist.validate().is_ok());

        let playlist = Playlist::with_id("p1", "Late night").songs(["s1", ""]);
        assert!(playlist.validate().is_err());
    }

    #[test]
    fn test_sentinel_detection() {
        assert!(Artist::with_id(SENTINEL_ARTIST_ID, "Unknown Artist").is_sentinel());
        assert!(!Artist::new("Unknown Artist").is_sentinel());
    }

    #[test]
    fn test_child_lists_default_when_missing() {
        let artist: Artist =
            serde_json::from_str(r#"{"id":"a1","name":"Björk","biography":null}"#).unwrap();
        assert!(artist.album_ids.is_empty());
    }
}
