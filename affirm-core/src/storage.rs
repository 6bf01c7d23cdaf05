//! SQLite storage layer for affirmations and settings

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension, Row, params};
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::types::{Affirmation, AffirmationId, DEFAULT_TARGET_COUNT, WordTiming};

pub const SETTING_MAX_RECORDING_MS: &str = "max_recording_ms";
pub const SETTING_SIMILARITY_THRESHOLD_STANDARD: &str = "similarity_threshold_standard";
pub const SETTING_SIMILARITY_THRESHOLD_ONBOARDING: &str = "similarity_threshold_onboarding";
pub const SETTING_SILENCE_INTERVAL_MS: &str = "silence_interval_ms";
pub const SETTING_DEFAULT_TARGET_COUNT: &str = "default_target_count";
/// Language assumed for Latin-script affirmations, e.g. "fr"
pub const SETTING_PREFERRED_LANGUAGE: &str = "preferred_language";

/// Persistence contract the practice session writes through.
///
/// Updates touch only the fields they name; `target_count` is never changed
/// after creation and `repeat_count` only moves through `record_repetition`.
pub trait AffirmationStore: Send + Sync {
    fn load(&self, id: &AffirmationId) -> Result<Affirmation>;

    fn save(&self, affirmation: &Affirmation) -> Result<()>;

    /// Atomically increment the repeat count, returning the updated record
    fn record_repetition(&self, id: &AffirmationId) -> Result<Affirmation>;

    fn update_word_timings(&self, id: &AffirmationId, timings: &[WordTiming]) -> Result<()>;

    /// Point the affirmation at a new reference recording
    fn replace_audio(&self, id: &AffirmationId, path: &Path) -> Result<()>;
}

/// Storage backend using SQLite
pub struct Storage {
    conn: Mutex<Connection>,
}

const AFFIRMATION_COLUMNS: &str = "id, text, audio_path, repeat_count, target_count, \
     word_timings, archived, created_at, updated_at";

impl Storage {
    /// Open or create a database at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path)?;
        let storage = Self {
            conn: Mutex::new(conn),
        };
        storage.init_schema()?;
        Ok(storage)
    }

    /// Create an in-memory database (useful for testing)
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let storage = Self {
            conn: Mutex::new(conn),
        };
        storage.init_schema()?;
        Ok(storage)
    }

    /// Initialize database schema
    fn init_schema(&self) -> Result<()> {
        let conn = self.conn.lock();

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS affirmations (
                id TEXT PRIMARY KEY,
                text TEXT NOT NULL,
                audio_path TEXT NOT NULL,
                repeat_count INTEGER NOT NULL DEFAULT 0,
                target_count INTEGER NOT NULL,
                word_timings TEXT NOT NULL DEFAULT '[]',
                archived INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS settings (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_affirmations_created ON affirmations(created_at);
            "#,
        )?;

        info!("Database schema initialized");
        Ok(())
    }

    // ========== Affirmations ==========

    /// Create an affirmation with the configured default target
    pub fn create_affirmation(&self, text: &str, audio_path: &Path) -> Result<Affirmation> {
        let affirmation = Affirmation::new(text, audio_path, self.default_target_count()?);
        self.insert_affirmation(&affirmation)?;
        Ok(affirmation)
    }

    /// Insert a new affirmation; fails if the id exists
    pub fn insert_affirmation(&self, affirmation: &Affirmation) -> Result<()> {
        let timings = serde_json::to_string(&affirmation.word_timings)?;
        let conn = self.conn.lock();
        conn.execute(
            r#"
            INSERT INTO affirmations (id, text, audio_path, repeat_count, target_count,
                                      word_timings, archived, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
            params![
                affirmation.id.to_string(),
                affirmation.text,
                affirmation.audio_path.to_string_lossy(),
                affirmation.repeat_count,
                affirmation.target_count,
                timings,
                affirmation.archived as i32,
                affirmation.created_at.to_rfc3339(),
                affirmation.updated_at.to_rfc3339(),
            ],
        )?;
        debug!("Created affirmation {}", affirmation.id);
        Ok(())
    }

    /// All affirmations, newest first
    pub fn get_affirmations(&self, include_archived: bool) -> Result<Vec<Affirmation>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {AFFIRMATION_COLUMNS} FROM affirmations
             WHERE archived = 0 OR ?1
             ORDER BY created_at DESC"
        ))?;

        let rows = stmt
            .query_map(params![include_archived], row_to_affirmation)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        rows.into_iter().map(RawAffirmation::into_affirmation).collect()
    }

    pub fn set_archived(&self, id: &AffirmationId, archived: bool) -> Result<()> {
        self.update_one(
            id,
            "UPDATE affirmations SET archived = ?1, updated_at = ?2 WHERE id = ?3",
            params![archived as i32, Utc::now().to_rfc3339(), id.to_string()],
        )
    }

    /// Delete an affirmation; returns whether it existed
    pub fn delete_affirmation(&self, id: &AffirmationId) -> Result<bool> {
        let conn = self.conn.lock();
        let deleted = conn.execute(
            "DELETE FROM affirmations WHERE id = ?1",
            params![id.to_string()],
        )?;
        Ok(deleted > 0)
    }

    fn update_one(&self, id: &AffirmationId, sql: &str, params: &[&dyn rusqlite::ToSql]) -> Result<()> {
        let conn = self.conn.lock();
        match conn.execute(sql, params)? {
            0 => Err(Error::NotFound(format!("affirmation {id}"))),
            _ => Ok(()),
        }
    }

    // ========== Settings ==========

    /// Save or update a setting value
    pub fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            r#"
            INSERT INTO settings (key, value, updated_at)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                updated_at = excluded.updated_at
            "#,
            params![key, value, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    /// Get a setting value
    pub fn get_setting(&self, key: &str) -> Result<Option<String>> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT value FROM settings WHERE key = ?1",
            params![key],
            |row| row.get(0),
        )
        .optional()
        .map_err(Into::into)
    }

    /// Target for new affirmations
    pub fn default_target_count(&self) -> Result<u32> {
        match self.get_setting(SETTING_DEFAULT_TARGET_COUNT)? {
            Some(value) => value
                .parse()
                .map_err(|_| Error::Config(format!("Invalid target count: {value}"))),
            None => Ok(DEFAULT_TARGET_COUNT),
        }
    }
}

impl AffirmationStore for Storage {
    fn load(&self, id: &AffirmationId) -> Result<Affirmation> {
        let conn = self.conn.lock();
        let raw = conn
            .query_row(
                &format!("SELECT {AFFIRMATION_COLUMNS} FROM affirmations WHERE id = ?1"),
                params![id.to_string()],
                row_to_affirmation,
            )
            .optional()?
            .ok_or_else(|| Error::NotFound(format!("affirmation {id}")))?;
        raw.into_affirmation()
    }

    /// Upsert text, audio, timings and archive flag. Counters are left alone
    /// on existing rows.
    fn save(&self, affirmation: &Affirmation) -> Result<()> {
        let timings = serde_json::to_string(&affirmation.word_timings)?;
        let conn = self.conn.lock();
        conn.execute(
            r#"
            INSERT INTO affirmations (id, text, audio_path, repeat_count, target_count,
                                      word_timings, archived, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            ON CONFLICT(id) DO UPDATE SET
                text = excluded.text,
                audio_path = excluded.audio_path,
                word_timings = excluded.word_timings,
                archived = excluded.archived,
                updated_at = excluded.updated_at
            "#,
            params![
                affirmation.id.to_string(),
                affirmation.text,
                affirmation.audio_path.to_string_lossy(),
                affirmation.repeat_count,
                affirmation.target_count,
                timings,
                affirmation.archived as i32,
                affirmation.created_at.to_rfc3339(),
                Utc::now().to_rfc3339(),
            ],
        )?;
        debug!("Saved affirmation {}", affirmation.id);
        Ok(())
    }

    fn record_repetition(&self, id: &AffirmationId) -> Result<Affirmation> {
        self.update_one(
            id,
            "UPDATE affirmations SET repeat_count = repeat_count + 1, updated_at = ?1 WHERE id = ?2",
            params![Utc::now().to_rfc3339(), id.to_string()],
        )?;
        let affirmation = self.load(id)?;
        info!(
            "Affirmation {} repeated {}/{}",
            id, affirmation.repeat_count, affirmation.target_count
        );
        Ok(affirmation)
    }

    fn update_word_timings(&self, id: &AffirmationId, timings: &[WordTiming]) -> Result<()> {
        let json = serde_json::to_string(timings)?;
        self.update_one(
            id,
            "UPDATE affirmations SET word_timings = ?1, updated_at = ?2 WHERE id = ?3",
            params![json, Utc::now().to_rfc3339(), id.to_string()],
        )?;
        debug!("Updated {} word timings for {}", timings.len(), id);
        Ok(())
    }

    fn replace_audio(&self, id: &AffirmationId, path: &Path) -> Result<()> {
        self.update_one(
            id,
            "UPDATE affirmations SET audio_path = ?1, updated_at = ?2 WHERE id = ?3",
            params![path.to_string_lossy(), Utc::now().to_rfc3339(), id.to_string()],
        )
    }
}

/// Column values of one row, before JSON and timestamp decoding
struct RawAffirmation {
    id: String,
    text: String,
    audio_path: String,
    repeat_count: u32,
    target_count: u32,
    word_timings: String,
    archived: bool,
    created_at: String,
    updated_at: String,
}

fn row_to_affirmation(row: &Row<'_>) -> rusqlite::Result<RawAffirmation> {
    Ok(RawAffirmation {
        id: row.get(0)?,
        text: row.get(1)?,
        audio_path: row.get(2)?,
        repeat_count: row.get(3)?,
        target_count: row.get(4)?,
        word_timings: row.get(5)?,
        archived: row.get::<_, i32>(6)? != 0,
        created_at: row.get(7)?,
        updated_at: row.get(8)?,
    })
}

impl RawAffirmation {
    fn into_affirmation(self) -> Result<Affirmation> {
        Ok(Affirmation {
            id: Uuid::parse_str(&self.id).unwrap_or_else(|_| Uuid::new_v4()),
            text: self.text,
            audio_path: PathBuf::from(self.audio_path),
            repeat_count: self.repeat_count,
            target_count: self.target_count,
            word_timings: serde_json::from_str(&self.word_timings)?,
            archived: self.archived,
            created_at: parse_timestamp(&self.created_at),
            updated_at: parse_timestamp(&self.updated_at),
        })
    }
}

fn parse_timestamp(value: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}
