//! SQLite access for the host library tables and the key-value table.
//!
//! The encore database doubles as a stand-in host library: `tracks`,
//! `playlists` and `playlist_tracks` hold what a media library would report,
//! while `kv` holds the persisted snapshot state.

use crate::track::{PlaylistId, Playlist, Timestamp, TrackFact, TrackId};
use anyhow::{bail, Context, Result};
use chrono::{DateTime, Local};
use log::{debug, info};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS tracks (
        id             INTEGER PRIMARY KEY,
        title          TEXT    NOT NULL DEFAULT '',
        artist         TEXT    NOT NULL DEFAULT '',
        play_count     INTEGER NOT NULL DEFAULT 0,
        skip_count     INTEGER NOT NULL DEFAULT 0,
        last_played_at TEXT,
        added_at       TEXT,
        duration       REAL    NOT NULL DEFAULT 0
    );
    CREATE TABLE IF NOT EXISTS playlists (
        id   INTEGER PRIMARY KEY,
        name TEXT    NOT NULL
    );
    CREATE TABLE IF NOT EXISTS playlist_tracks (
        playlist_id INTEGER NOT NULL,
        position    INTEGER NOT NULL,
        track_id    INTEGER NOT NULL,
        PRIMARY KEY (playlist_id, position)
    );
    CREATE INDEX IF NOT EXISTS idx_playlist_tracks_track ON playlist_tracks(track_id);
    CREATE TABLE IF NOT EXISTS kv (
        key   TEXT PRIMARY KEY,
        value TEXT NOT NULL
    );
";

/// A track as the host library stores it: facts plus display metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackRecord {
    #[serde(flatten)]
    pub fact: TrackFact,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub artist: String,
}

/// JSON document accepted by [`import_library`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LibraryExport {
    #[serde(default)]
    pub tracks: Vec<TrackRecord>,
    #[serde(default)]
    pub playlists: Vec<Playlist>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImportSummary {
    pub tracks: usize,
    pub playlists: usize,
}

/// Open (creating if needed) the database at `path` and make sure every table exists.
pub fn connect(path: &Path) -> Result<Connection> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create database directory {}", parent.display()))?;
    }

    let conn = Connection::open(path)
        .with_context(|| format!("SQLite connection refused. DB location: {}", path.display()))?;
    init_schema(&conn)?;

    Ok(conn)
}

/// Create all tables. Safe to call repeatedly.
pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(SCHEMA)
        .context("Invalid SQL when creating encore tables")
}

// SQLite integers are signed; ids are stored bit-for-bit.
fn id_to_sql(id: u64) -> i64 {
    id as i64
}

fn id_from_sql(raw: i64) -> u64 {
    raw as u64
}

fn count_from_sql(raw: i64) -> u64 {
    u64::try_from(raw).unwrap_or(0)
}

fn ts_to_sql(ts: Option<Timestamp>) -> Option<String> {
    ts.map(|t| t.to_rfc3339())
}

fn ts_from_row(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<Timestamp>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|text| {
        DateTime::parse_from_rfc3339(&text)
            .map(|parsed| parsed.with_timezone(&Local))
            .map_err(|err| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err)))
    })
    .transpose()
}

fn track_from_row(row: &Row<'_>) -> rusqlite::Result<TrackRecord> {
    Ok(TrackRecord {
        fact: TrackFact {
            id: id_from_sql(row.get(0)?),
            play_count: count_from_sql(row.get(3)?),
            skip_count: count_from_sql(row.get(4)?),
            last_played_at: ts_from_row(row, 5)?,
            added_at: ts_from_row(row, 6)?,
            playback_duration: row.get::<_, f64>(7)?.max(0.0),
        },
        title: row.get(1)?,
        artist: row.get(2)?,
    })
}

const TRACK_COLUMNS: &str =
    "t.id, t.title, t.artist, t.play_count, t.skip_count, t.last_played_at, t.added_at, t.duration";

/// Every track in the library, ordered by id.
pub fn load_tracks(conn: &Connection) -> Result<Vec<TrackRecord>> {
    let mut stmt = conn
        .prepare(&format!("SELECT {TRACK_COLUMNS} FROM tracks t ORDER BY t.id"))
        .context("Invalid SQL when SELECTing tracks")?;

    let rows = stmt
        .query_map([], track_from_row)
        .context("Cannot query tracks")?;

    let mut tracks = Vec::new();
    for track in rows {
        tracks.push(track.context("Queried track could not be decoded")?);
    }
    debug!("Loaded {} tracks", tracks.len());

    Ok(tracks)
}

/// Members of one playlist in playlist order, `None` if no such playlist exists.
pub fn load_playlist_tracks(conn: &Connection, playlist_id: PlaylistId) -> Result<Option<Vec<TrackRecord>>> {
    let exists = conn
        .query_row(
            "SELECT 1 FROM playlists WHERE id = ?1",
            [id_to_sql(playlist_id)],
            |_| Ok(()),
        )
        .optional()
        .context("Cannot look up playlist")?;
    if exists.is_none() {
        return Ok(None);
    }

    let mut stmt = conn.prepare(&format!(
        "SELECT {TRACK_COLUMNS} FROM playlist_tracks pt
         JOIN tracks t ON t.id = pt.track_id
         WHERE pt.playlist_id = ?1
         ORDER BY pt.position"
    ))?;

    let rows = stmt
        .query_map([id_to_sql(playlist_id)], track_from_row)
        .context("Cannot query playlist members")?;

    let mut tracks = Vec::new();
    for track in rows {
        tracks.push(track.context("Queried playlist member could not be decoded")?);
    }

    Ok(Some(tracks))
}

/// Every playlist with its member ids in order.
pub fn load_playlists(conn: &Connection) -> Result<Vec<Playlist>> {
    let mut stmt = conn
        .prepare("SELECT id, name FROM playlists ORDER BY id")
        .context("Invalid SQL when SELECTing playlists")?;
    let heads = stmt
        .query_map([], |row| Ok((id_from_sql(row.get(0)?), row.get::<_, String>(1)?)))
        .context("Cannot query playlists")?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let mut members = conn.prepare(
        "SELECT track_id FROM playlist_tracks WHERE playlist_id = ?1 ORDER BY position",
    )?;

    let mut playlists = Vec::with_capacity(heads.len());
    for (id, name) in heads {
        let track_ids = members
            .query_map([id_to_sql(id)], |row| row.get::<_, i64>(0).map(id_from_sql))?
            .collect::<rusqlite::Result<Vec<TrackId>>>()
            .with_context(|| format!("Cannot read members of playlist {id}"))?;
        playlists.push(Playlist { id, name, track_ids });
    }

    Ok(playlists)
}

/// Read a library export from a JSON file.
pub fn read_export(path: &Path) -> Result<LibraryExport> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("Failed to read library export {}", path.display()))?;
    serde_json::from_str(&raw)
        .with_context(|| format!("Library export {} is not valid JSON", path.display()))
}

/// Upsert every track and replace every playlist in the export.
pub fn import_library(conn: &mut Connection, export: &LibraryExport) -> Result<ImportSummary> {
    let tx = conn.transaction()?;

    {
        let mut upsert = tx.prepare(
            "INSERT INTO tracks (id, title, artist, play_count, skip_count, last_played_at, added_at, duration)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(id) DO UPDATE SET
                title = excluded.title,
                artist = excluded.artist,
                play_count = excluded.play_count,
                skip_count = excluded.skip_count,
                last_played_at = excluded.last_played_at,
                added_at = excluded.added_at,
                duration = excluded.duration",
        )?;

        for record in &export.tracks {
            let fact = &record.fact;
            upsert
                .execute(params![
                    id_to_sql(fact.id),
                    record.title,
                    record.artist,
                    i64::try_from(fact.play_count).unwrap_or(i64::MAX),
                    i64::try_from(fact.skip_count).unwrap_or(i64::MAX),
                    ts_to_sql(fact.last_played_at),
                    ts_to_sql(fact.added_at),
                    fact.playback_duration.max(0.0),
                ])
                .with_context(|| format!("Failed to INSERT track {}", fact.id))?;
        }

        let mut insert_playlist = tx.prepare(
            "INSERT INTO playlists (id, name) VALUES (?1, ?2)
             ON CONFLICT(id) DO UPDATE SET name = excluded.name",
        )?;
        let mut clear_members = tx.prepare("DELETE FROM playlist_tracks WHERE playlist_id = ?1")?;
        let mut insert_member = tx.prepare(
            "INSERT INTO playlist_tracks (playlist_id, position, track_id) VALUES (?1, ?2, ?3)",
        )?;

        for playlist in &export.playlists {
            let id = id_to_sql(playlist.id);
            insert_playlist.execute(params![id, playlist.name])?;
            clear_members.execute([id])?;
            for (position, track_id) in playlist.track_ids.iter().enumerate() {
                insert_member
                    .execute(params![id, position as i64, id_to_sql(*track_id)])
                    .with_context(|| format!("Failed to add track {track_id} to playlist {}", playlist.id))?;
            }
        }
    }

    tx.commit().context("Committing library import failed")?;

    let summary = ImportSummary {
        tracks: export.tracks.len(),
        playlists: export.playlists.len(),
    };
    info!("Imported {} tracks and {} playlists", summary.tracks, summary.playlists);
    Ok(summary)
}

/// Count a completed play of `track_id` at `at`.
pub fn record_play(conn: &Connection, track_id: TrackId, at: Timestamp) -> Result<()> {
    let changed = conn
        .execute(
            "UPDATE tracks SET play_count = play_count + 1, last_played_at = ?1 WHERE id = ?2",
            params![at.to_rfc3339(), id_to_sql(track_id)],
        )
        .with_context(|| format!("Failed to record play of track {track_id}"))?;

    if changed == 0 {
        bail!("Track {track_id} is not in the library");
    }
    Ok(())
}

/// Count a skip of `track_id`.
pub fn record_skip(conn: &Connection, track_id: TrackId) -> Result<()> {
    let changed = conn
        .execute(
            "UPDATE tracks SET skip_count = skip_count + 1 WHERE id = ?1",
            [id_to_sql(track_id)],
        )
        .with_context(|| format!("Failed to record skip of track {track_id}"))?;

    if changed == 0 {
        bail!("Track {track_id} is not in the library");
    }
    Ok(())
}

pub fn kv_get(conn: &Connection, key: &str) -> Result<Option<String>> {
    conn.query_row("SELECT value FROM kv WHERE key = ?1", [key], |row| row.get(0))
        .optional()
        .with_context(|| format!("Cannot read `{key}` from kv"))
}

pub fn kv_put(conn: &Connection, key: &str, value: &str) -> Result<()> {
    conn.execute(
        "INSERT INTO kv (key, value) VALUES (?1, ?2)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        [key, value],
    )
    .with_context(|| format!("Cannot write `{key}` to kv"))?;
    Ok(())
}

pub fn kv_remove(conn: &Connection, key: &str) -> Result<()> {
    conn.execute("DELETE FROM kv WHERE key = ?1", [key])
        .with_context(|| format!("Cannot delete `{key}` from kv"))?;
    Ok(())
}
