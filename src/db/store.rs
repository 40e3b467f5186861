use rusqlite::{params, Connection, OptionalExtension, Result};
use std::path::Path;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};

use super::models::{
    AlternateTitle, LanguagePreference, RootFolder, Season, SeasonStatus, Series, SeriesStatus,
};

/// Input for creating or refreshing a series row. Keyed by `sonarr_id`.
#[derive(Debug, Clone)]
pub struct SeriesUpsert {
    pub sonarr_id: i64,
    pub title: String,
    pub description: Option<String>,
    pub status: SeriesStatus,
    pub total_seasons: i32,
    pub poster_url: Option<String>,
    pub alternate_titles: Vec<AlternateTitle>,
    pub genres: Vec<String>,
    pub year: Option<i32>,
    pub network: Option<String>,
    pub absolute: bool,
}

/// Input for creating or refreshing a season row. Keyed by
/// (`series_id`, `season_number`).
#[derive(Debug, Clone)]
pub struct SeasonUpsert {
    pub series_id: i64,
    pub season_number: i32,
    pub title: Option<String>,
    pub total_episodes: i32,
    pub missing_episodes: i32,
    pub status: SeasonStatus,
    pub release_date: Option<DateTime<Utc>>,
}

pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init()?;
        Ok(store)
    }

    /// In-memory store for tests.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init()?;
        Ok(store)
    }

    fn init(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();

        conn.execute(
            "CREATE TABLE IF NOT EXISTS series (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                sonarr_id INTEGER NOT NULL UNIQUE,
                title TEXT NOT NULL,
                description TEXT,
                status TEXT NOT NULL,
                total_seasons INTEGER NOT NULL DEFAULT 0,
                poster_url TEXT,
                poster_path TEXT,
                poster_downloaded_at TEXT,
                alternate_titles TEXT,
                genres TEXT,
                year INTEGER,
                network TEXT,
                preferred_language TEXT,
                absolute INTEGER NOT NULL DEFAULT 0,
                deleted INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS seasons (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                series_id INTEGER NOT NULL REFERENCES series(id) ON DELETE CASCADE,
                season_number INTEGER NOT NULL,
                title TEXT,
                total_episodes INTEGER NOT NULL DEFAULT 0,
                missing_episodes INTEGER NOT NULL DEFAULT 0,
                status TEXT NOT NULL,
                download_urls TEXT,
                release_date TEXT,
                deleted INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                UNIQUE(series_id, season_number)
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS root_folders (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                sonarr_id INTEGER NOT NULL UNIQUE,
                path TEXT NOT NULL,
                mapped_path TEXT,
                accessible INTEGER NOT NULL DEFAULT 1,
                free_space INTEGER,
                total_space INTEGER,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS configs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                key TEXT NOT NULL UNIQUE,
                value TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_seasons_series ON seasons(series_id)",
            [],
        )?;

        Ok(())
    }

    // ============================================================================
    // Series
    // ============================================================================

    /// Insert or refresh a series by its Sonarr id. Clears `deleted` and
    /// returns the local id.
    pub fn upsert_series(&self, input: &SeriesUpsert) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        let now = Utc::now().to_rfc3339();
        let alternate_titles = serde_json::to_string(&input.alternate_titles)
            .map_err(|_| rusqlite::Error::InvalidQuery)?;
        let genres =
            serde_json::to_string(&input.genres).map_err(|_| rusqlite::Error::InvalidQuery)?;

        conn.execute(
            "INSERT INTO series (
                sonarr_id, title, description, status, total_seasons, poster_url,
                alternate_titles, genres, year, network, absolute, deleted,
                created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, 0, ?12, ?12)
            ON CONFLICT(sonarr_id) DO UPDATE SET
                title = excluded.title,
                description = excluded.description,
                status = excluded.status,
                total_seasons = excluded.total_seasons,
                poster_url = excluded.poster_url,
                alternate_titles = excluded.alternate_titles,
                genres = excluded.genres,
                year = excluded.year,
                network = excluded.network,
                deleted = 0,
                updated_at = excluded.updated_at",
            params![
                input.sonarr_id,
                input.title,
                input.description,
                input.status.as_str(),
                input.total_seasons,
                input.poster_url,
                alternate_titles,
                genres,
                input.year,
                input.network,
                input.absolute as i64,
                now,
            ],
        )?;

        let id: i64 = conn.query_row(
            "SELECT id FROM series WHERE sonarr_id = ?1",
            params![input.sonarr_id],
            |row| row.get(0),
        )?;
        Ok(id)
    }

    pub fn get_series(&self, id: i64) -> Result<Option<Series>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            &format!("{} WHERE id = ?1", SERIES_SELECT),
            params![id],
            Self::series_from_row,
        )
        .optional()
    }

    pub fn get_series_by_sonarr_id(&self, sonarr_id: i64) -> Result<Option<Series>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            &format!("{} WHERE sonarr_id = ?1", SERIES_SELECT),
            params![sonarr_id],
            Self::series_from_row,
        )
        .optional()
    }

    pub fn list_series(&self, include_deleted: bool) -> Result<Vec<Series>> {
        let conn = self.conn.lock().unwrap();
        let sql = if include_deleted {
            format!("{} ORDER BY title", SERIES_SELECT)
        } else {
            format!("{} WHERE deleted = 0 ORDER BY title", SERIES_SELECT)
        };
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map([], Self::series_from_row)?;
        rows.collect()
    }

    /// Soft-delete every series whose Sonarr id is not in `seen`. Returns the
    /// number of rows flipped.
    pub fn mark_series_deleted_except(&self, seen: &[i64]) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let now = Utc::now().to_rfc3339();
        if seen.is_empty() {
            return conn.execute(
                "UPDATE series SET deleted = 1, updated_at = ?1 WHERE deleted = 0",
                params![now],
            );
        }
        let placeholders = seen.iter().map(|_| "?").collect::<Vec<_>>().join(",");
        let sql = format!(
            "UPDATE series SET deleted = 1, updated_at = ? WHERE deleted = 0 AND sonarr_id NOT IN ({})",
            placeholders
        );
        let mut values: Vec<Box<dyn rusqlite::ToSql>> = vec![Box::new(now)];
        for id in seen {
            values.push(Box::new(*id));
        }
        conn.execute(&sql, rusqlite::params_from_iter(values.iter().map(|v| v.as_ref())))
    }

    pub fn set_series_language(
        &self,
        id: i64,
        language: Option<LanguagePreference>,
    ) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE series SET preferred_language = ?1, updated_at = ?2 WHERE id = ?3",
            params![
                language.map(|l| l.as_str()),
                Utc::now().to_rfc3339(),
                id
            ],
        )?;
        Ok(())
    }

    /// `absolute` is a user-controlled flag; sync upserts never touch it.
    pub fn set_series_absolute(&self, id: i64, absolute: bool) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE series SET absolute = ?1, updated_at = ?2 WHERE id = ?3",
            params![absolute as i64, Utc::now().to_rfc3339(), id],
        )?;
        Ok(())
    }

    pub fn set_series_poster(&self, id: i64, poster_path: &str, at: DateTime<Utc>) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE series SET poster_path = ?1, poster_downloaded_at = ?2, updated_at = ?3
             WHERE id = ?4",
            params![poster_path, at.to_rfc3339(), Utc::now().to_rfc3339(), id],
        )?;
        Ok(())
    }

    // ============================================================================
    // Seasons
    // ============================================================================

    /// Insert or refresh a season. Existing `download_urls` are preserved.
    pub fn upsert_season(&self, input: &SeasonUpsert) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        let now = Utc::now().to_rfc3339();
        conn.execute(
            "INSERT INTO seasons (
                series_id, season_number, title, total_episodes, missing_episodes,
                status, release_date, deleted, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 0, ?8, ?8)
            ON CONFLICT(series_id, season_number) DO UPDATE SET
                title = excluded.title,
                total_episodes = excluded.total_episodes,
                missing_episodes = excluded.missing_episodes,
                status = excluded.status,
                release_date = excluded.release_date,
                deleted = 0,
                updated_at = excluded.updated_at",
            params![
                input.series_id,
                input.season_number,
                input.title,
                input.total_episodes,
                input.missing_episodes,
                input.status.as_str(),
                input.release_date.map(|d| d.to_rfc3339()),
                now,
            ],
        )?;

        let id: i64 = conn.query_row(
            "SELECT id FROM seasons WHERE series_id = ?1 AND season_number = ?2",
            params![input.series_id, input.season_number],
            |row| row.get(0),
        )?;
        Ok(id)
    }

    pub fn get_season(&self, series_id: i64, season_number: i32) -> Result<Option<Season>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            &format!(
                "{} WHERE series_id = ?1 AND season_number = ?2",
                SEASON_SELECT
            ),
            params![series_id, season_number],
            Self::season_from_row,
        )
        .optional()
    }

    pub fn list_seasons(&self, series_id: i64) -> Result<Vec<Season>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "{} WHERE series_id = ?1 AND deleted = 0 ORDER BY season_number",
            SEASON_SELECT
        ))?;
        let rows = stmt.query_map(params![series_id], Self::season_from_row)?;
        rows.collect()
    }

    /// Replace the ordered identifier list of a season.
    pub fn set_season_download_urls(&self, id: i64, urls: &[String]) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let encoded = serde_json::to_string(urls).map_err(|_| rusqlite::Error::InvalidQuery)?;
        conn.execute(
            "UPDATE seasons SET download_urls = ?1, updated_at = ?2 WHERE id = ?3",
            params![encoded, Utc::now().to_rfc3339(), id],
        )?;
        Ok(())
    }

    pub fn mark_seasons_deleted_except(&self, series_id: i64, seen: &[i32]) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let now = Utc::now().to_rfc3339();
        if seen.is_empty() {
            return conn.execute(
                "UPDATE seasons SET deleted = 1, updated_at = ?1
                 WHERE series_id = ?2 AND deleted = 0",
                params![now, series_id],
            );
        }
        let placeholders = seen.iter().map(|_| "?").collect::<Vec<_>>().join(",");
        let sql = format!(
            "UPDATE seasons SET deleted = 1, updated_at = ? \
             WHERE series_id = ? AND deleted = 0 AND season_number NOT IN ({})",
            placeholders
        );
        let mut values: Vec<Box<dyn rusqlite::ToSql>> =
            vec![Box::new(now), Box::new(series_id)];
        for n in seen {
            values.push(Box::new(*n));
        }
        conn.execute(&sql, rusqlite::params_from_iter(values.iter().map(|v| v.as_ref())))
    }

    // ============================================================================
    // Root folders
    // ============================================================================

    pub fn upsert_root_folder(
        &self,
        sonarr_id: i64,
        path: &str,
        accessible: bool,
        free_space: Option<i64>,
        total_space: Option<i64>,
    ) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        let now = Utc::now().to_rfc3339();
        conn.execute(
            "INSERT INTO root_folders (
                sonarr_id, path, accessible, free_space, total_space, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)
            ON CONFLICT(sonarr_id) DO UPDATE SET
                path = excluded.path,
                accessible = excluded.accessible,
                free_space = excluded.free_space,
                total_space = excluded.total_space,
                updated_at = excluded.updated_at",
            params![sonarr_id, path, accessible as i64, free_space, total_space, now],
        )?;
        conn.query_row(
            "SELECT id FROM root_folders WHERE sonarr_id = ?1",
            params![sonarr_id],
            |row| row.get(0),
        )
    }

    pub fn set_root_folder_mapping(&self, id: i64, mapped_path: Option<&str>) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE root_folders SET mapped_path = ?1, updated_at = ?2 WHERE id = ?3",
            params![mapped_path, Utc::now().to_rfc3339(), id],
        )?;
        Ok(())
    }

    pub fn list_root_folders(&self) -> Result<Vec<RootFolder>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, sonarr_id, path, mapped_path, accessible, free_space, total_space,
                    created_at, updated_at
             FROM root_folders ORDER BY path",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(RootFolder {
                id: row.get(0)?,
                sonarr_id: row.get(1)?,
                path: row.get(2)?,
                mapped_path: row.get(3)?,
                accessible: row.get::<_, i64>(4)? != 0,
                free_space: row.get(5)?,
                total_space: row.get(6)?,
                created_at: parse_ts(row.get::<_, String>(7)?)?,
                updated_at: parse_ts(row.get::<_, String>(8)?)?,
            })
        })?;
        rows.collect()
    }

    // ============================================================================
    // Configs
    // ============================================================================

    pub fn get_config(&self, key: &str) -> Result<Option<String>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT value FROM configs WHERE key = ?1",
            params![key],
            |row| row.get(0),
        )
        .optional()
    }

    pub fn set_config(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let now = Utc::now().to_rfc3339();
        conn.execute(
            "INSERT INTO configs (key, value, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?3)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            params![key, value, now],
        )?;
        Ok(())
    }

    /// Insert a config value only if the key is absent. Used for seeding.
    pub fn seed_config(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let now = Utc::now().to_rfc3339();
        conn.execute(
            "INSERT OR IGNORE INTO configs (key, value, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?3)",
            params![key, value, now],
        )?;
        Ok(())
    }

    pub fn list_configs(&self) -> Result<Vec<(String, String)>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT key, value FROM configs ORDER BY key")?;
        let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
        rows.collect()
    }

    // ============================================================================
    // Row mappers
    // ============================================================================

    fn series_from_row(row: &rusqlite::Row) -> rusqlite::Result<Series> {
        let alternate_titles: Option<String> = row.get(9)?;
        let genres: Option<String> = row.get(10)?;
        Ok(Series {
            id: row.get(0)?,
            sonarr_id: row.get(1)?,
            title: row.get(2)?,
            description: row.get(3)?,
            status: SeriesStatus::parse(&row.get::<_, String>(4)?),
            total_seasons: row.get(5)?,
            poster_url: row.get(6)?,
            poster_path: row.get(7)?,
            poster_downloaded_at: row
                .get::<_, Option<String>>(8)?
                .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
                .map(|dt| dt.with_timezone(&Utc)),
            alternate_titles: alternate_titles
                .and_then(|s| serde_json::from_str(&s).ok())
                .unwrap_or_default(),
            genres: genres
                .and_then(|s| serde_json::from_str(&s).ok())
                .unwrap_or_default(),
            year: row.get(11)?,
            network: row.get(12)?,
            preferred_language: row
                .get::<_, Option<String>>(13)?
                .map(|s| LanguagePreference::parse(&s)),
            absolute: row.get::<_, i64>(14)? != 0,
            deleted: row.get::<_, i64>(15)? != 0,
            created_at: parse_ts(row.get::<_, String>(16)?)?,
            updated_at: parse_ts(row.get::<_, String>(17)?)?,
        })
    }

    fn season_from_row(row: &rusqlite::Row) -> rusqlite::Result<Season> {
        let download_urls: Option<String> = row.get(7)?;
        Ok(Season {
            id: row.get(0)?,
            series_id: row.get(1)?,
            season_number: row.get(2)?,
            title: row.get(3)?,
            total_episodes: row.get(4)?,
            missing_episodes: row.get(5)?,
            status: SeasonStatus::parse(&row.get::<_, String>(6)?),
            download_urls: download_urls.and_then(|s| serde_json::from_str(&s).ok()),
            release_date: row
                .get::<_, Option<String>>(8)?
                .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
                .map(|dt| dt.with_timezone(&Utc)),
            deleted: row.get::<_, i64>(9)? != 0,
            created_at: parse_ts(row.get::<_, String>(10)?)?,
            updated_at: parse_ts(row.get::<_, String>(11)?)?,
        })
    }
}

const SERIES_SELECT: &str = "SELECT id, sonarr_id, title, description, status, total_seasons,
    poster_url, poster_path, poster_downloaded_at, alternate_titles, genres, year, network,
    preferred_language, absolute, deleted, created_at, updated_at FROM series";

const SEASON_SELECT: &str = "SELECT id, series_id, season_number, title, total_episodes,
    missing_episodes, status, download_urls, release_date, deleted, created_at, updated_at
    FROM seasons";

fn parse_ts(s: String) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| rusqlite::Error::InvalidQuery)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_series(sonarr_id: i64, title: &str) -> SeriesUpsert {
        SeriesUpsert {
            sonarr_id,
            title: title.to_string(),
            description: Some("desc".to_string()),
            status: SeriesStatus::Ongoing,
            total_seasons: 2,
            poster_url: None,
            alternate_titles: vec![AlternateTitle {
                title: format!("{} alt", title),
                scene_season_number: Some(-1),
            }],
            genres: vec!["Action".to_string()],
            year: Some(2025),
            network: Some("Tokyo MX".to_string()),
            absolute: false,
        }
    }

    #[test]
    fn series_upsert_round_trip() {
        let store = Store::in_memory().unwrap();
        let id = store.upsert_series(&sample_series(12, "Sakamoto Days")).unwrap();
        let loaded = store.get_series(id).unwrap().unwrap();
        assert_eq!(loaded.sonarr_id, 12);
        assert_eq!(loaded.title, "Sakamoto Days");
        assert_eq!(loaded.alternate_titles.len(), 1);
        assert_eq!(loaded.genres, vec!["Action"]);
        assert!(!loaded.deleted);

        // Upserting again keeps the same row.
        let id2 = store.upsert_series(&sample_series(12, "Sakamoto Days")).unwrap();
        assert_eq!(id, id2);
    }

    #[test]
    fn soft_delete_closure() {
        let store = Store::in_memory().unwrap();
        store.upsert_series(&sample_series(1, "Keep")).unwrap();
        store.upsert_series(&sample_series(2, "Drop")).unwrap();

        let flipped = store.mark_series_deleted_except(&[1]).unwrap();
        assert_eq!(flipped, 1);
        assert!(store.get_series_by_sonarr_id(2).unwrap().unwrap().deleted);
        assert!(!store.get_series_by_sonarr_id(1).unwrap().unwrap().deleted);

        // A later upsert resurrects the soft-deleted row.
        store.upsert_series(&sample_series(2, "Drop")).unwrap();
        assert!(!store.get_series_by_sonarr_id(2).unwrap().unwrap().deleted);
    }

    #[test]
    fn season_urls_preserved_across_upsert() {
        let store = Store::in_memory().unwrap();
        let series_id = store.upsert_series(&sample_series(5, "One Piece")).unwrap();
        let season_id = store
            .upsert_season(&SeasonUpsert {
                series_id,
                season_number: 1,
                title: None,
                total_episodes: 25,
                missing_episodes: 10,
                status: SeasonStatus::NotStarted,
                release_date: None,
            })
            .unwrap();

        store
            .set_season_download_urls(season_id, &["one-piece.12345".to_string()])
            .unwrap();

        // Re-sync with fresh counts must not wipe the identifier list.
        store
            .upsert_season(&SeasonUpsert {
                series_id,
                season_number: 1,
                title: None,
                total_episodes: 26,
                missing_episodes: 9,
                status: SeasonStatus::Downloading,
                release_date: None,
            })
            .unwrap();

        let season = store.get_season(series_id, 1).unwrap().unwrap();
        assert_eq!(season.identifiers(), ["one-piece.12345"]);
        assert_eq!(season.total_episodes, 26);
    }

    #[test]
    fn absolute_flag_survives_sync_upserts() {
        let store = Store::in_memory().unwrap();
        let id = store.upsert_series(&sample_series(9, "One Piece")).unwrap();
        store.set_series_absolute(id, true).unwrap();

        store.upsert_series(&sample_series(9, "One Piece")).unwrap();
        assert!(store.get_series(id).unwrap().unwrap().absolute);
    }

    #[test]
    fn config_seed_does_not_overwrite() {
        let store = Store::in_memory().unwrap();
        store.set_config("preferred_language", "\"dub\"").unwrap();
        store.seed_config("preferred_language", "\"sub\"").unwrap();
        assert_eq!(
            store.get_config("preferred_language").unwrap().unwrap(),
            "\"dub\""
        );
    }
}
