//! # Demo Library Seeder
//!
//! Populates a database with a small library that needs maintenance, then
//! runs both maintenance passes over it.
//!
//! ## Usage
//! ```bash
//! # Seed ./melodia_dev.db (default)
//! cargo run -p melodia-db --bin seed
//!
//! # Specify database path
//! cargo run -p melodia-db --bin seed -- --db ./data/library.db
//!
//! # More logging
//! RUST_LOG=melodia_db=debug cargo run -p melodia-db --bin seed
//! ```
//!
//! ## Seeded Problems
//! - Artists entered twice with different case/spacing
//! - The same album entered twice for one artist
//! - A song pointing at an album that was never created
//! - A song and an album pointing at an artist that was never created
//! - A playlist link to a song that was never created

use std::env;
use tracing_subscriber::EnvFilter;

use melodia_core::{Album, Artist, Playlist, Song};
use melodia_db::{DbConfig, Library};

/// (artist, [(album, [songs])])
const CATALOG: &[(&str, &[(&str, &[&str])])] = &[
    (
        "Radiohead",
        &[
            ("OK Computer", &["Airbag", "Paranoid Android", "Lucky"]),
            ("Kid A", &["Everything In Its Right Place", "Idioteque"]),
        ],
    ),
    (
        "Portishead",
        &[("Dummy", &["Mysterons", "Sour Times", "Roads"])],
    ),
    (
        "Björk",
        &[("Homogenic", &["Hunter", "Jóga", "Bachelorette"])],
    ),
];

/// Second spellings of artists above, each with one extra album.
const DUPLICATE_ARTISTS: &[(&str, &str)] = &[
    ("radiohead", "In Rainbows"),
    (" PORTISHEAD ", "Third"),
];

/// Rows that bypass foreign keys, planted with checks off.
const ORPHANS: &str = r#"
INSERT INTO songs (id, title, artist_id, album_id)
    VALUES ('orphan-song-1', 'Lost Track', NULL, 'missing-album');
INSERT INTO songs (id, title, artist_id)
    VALUES ('orphan-song-2', 'Nobody''s Song', 'missing-artist');
INSERT INTO albums (id, title, artist_id)
    VALUES ('orphan-album-1', 'Nobody''s Album', 'missing-artist');
"#;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Parse command line arguments
    let args: Vec<String> = env::args().collect();

    let mut db_path = String::from("./melodia_dev.db");

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--db" | "-d" => {
                if i + 1 < args.len() {
                    db_path = args[i + 1].clone();
                    i += 1;
                }
            }
            "--help" | "-h" => {
                println!("Melodia Demo Library Seeder");
                println!();
                println!("Usage: seed [OPTIONS]");
                println!();
                println!("Options:");
                println!("  -d, --db <PATH>    Database file path (default: ./melodia_dev.db)");
                println!("  -h, --help         Show this help message");
                return Ok(());
            }
            _ => {}
        }
        i += 1;
    }

    println!("🌱 Melodia Demo Library Seeder");
    println!("==============================");
    println!("Database: {}", db_path);
    println!();

    let library = Library::open(DbConfig::new(&db_path)).await?;

    println!("✓ Connected to database");
    println!("✓ Migrations applied");

    let existing = library.artists().get_all().await?.len();
    if existing > 0 {
        println!("⚠ Database already has {} artists", existing);
        println!("  Skipping seed, running maintenance only.");
    } else {
        seed(&library).await?;
    }

    println!();
    println!("Merging duplicates...");
    let dedup = library.deduplicate().await?;
    println!("{}", serde_json::to_string_pretty(&dedup)?);

    println!();
    println!("Repairing dangling references...");
    let repair = library.repair().await?;
    println!("{}", serde_json::to_string_pretty(&repair)?);

    println!();
    println!("Library now holds:");
    for artist in library.all_artists().await? {
        let albums = library.artist_albums(&artist.id).await?.unwrap_or_default();
        println!("  {} ({} albums)", artist.name, albums.len());
    }

    let status = library.pool_status();
    println!();
    println!(
        "Pool: {} idle, {} in use, max {}",
        status.idle, status.in_use, status.max_connections
    );

    library.close().await;
    println!("✓ Seed complete!");

    Ok(())
}

async fn seed(library: &Library) -> Result<(), Box<dyn std::error::Error>> {
    println!();
    println!("Generating library...");

    let start = std::time::Instant::now();
    let mut mix = Playlist::new("Late Night Mix");
    let mut song_count = 0;

    for (artist_name, albums) in CATALOG {
        let artist = Artist::new(*artist_name);
        library.artists().add(artist.clone()).await?;

        for (album_title, songs) in *albums {
            let album = Album::new(*album_title, &artist.id);
            library.add_album(album.clone()).await?;

            for title in *songs {
                let song = Song::new(*title, &artist.id)
                    .album(&album.id)
                    .duration_secs(180 + (song_count * 37 % 200) as u32);
                if song_count % 3 == 0 {
                    mix.song_ids.push(song.id.clone());
                }
                library.add_song(song).await?;
                song_count += 1;
            }
        }
    }

    for (spelling, album_title) in DUPLICATE_ARTISTS {
        let artist = Artist::new(*spelling);
        library.artists().add(artist.clone()).await?;
        library.add_album(Album::new(*album_title, &artist.id)).await?;
    }

    library.playlists().add(mix.clone()).await?;

    library
        .pool()
        .with_connection(|session| {
            Box::pin(async move {
                let conn = session.connection();
                sqlx::query("PRAGMA foreign_keys = OFF").execute(&mut *conn).await?;
                sqlx::Executor::execute(&mut *conn, sqlx::raw_sql(ORPHANS)).await?;
                sqlx::query("INSERT INTO playlist_songs (playlist_id, position, song_id) VALUES (?1, 999, 'missing-song')")
                    .bind(&mix.id)
                    .execute(&mut *conn)
                    .await?;
                sqlx::query("PRAGMA foreign_keys = ON").execute(&mut *conn).await?;
                Ok(())
            })
        })
        .await?;
    library.invalidate_all().await;

    println!(
        "✓ Generated {} artists, {} songs and 4 broken rows in {:?}",
        CATALOG.len() + DUPLICATE_ARTISTS.len(),
        song_count,
        start.elapsed()
    );

    Ok(())
}
