//! Database Connection Pool Module
//!
//! PostgreSQL connection pooling with deadpool-postgres and [`PgStore`], the
//! production [`CardStore`]. Every store call is timed into the
//! `lexis_store_operation_*` metrics.

use crate::error::{ApiError, ApiResult};
use crate::telemetry::METRICS;
use async_trait::async_trait;
use deadpool_postgres::{Config, ManagerConfig, Pool, PoolError, RecyclingMethod, Runtime};
use lexis_core::{
    Card, LexisError, LexisResult, NewUser, Sentence, StorageError, Timestamp, User, UserId,
    UserRegistration, Word, WordId,
};
use lexis_storage::CardStore;
use std::collections::HashMap;
use std::future::Future;
use std::time::{Duration, Instant};
use tokio_postgres::{error::SqlState, NoTls, Row};

/// Schema applied by [`PgStore::ensure_schema`].
pub const SCHEMA_SQL: &str = include_str!("../sql/schema.sql");

const WORD_COLUMNS: &str = "\
    w.id, w.latin_word, w.native_word, w.cyrillic_word, w.transcription, \
    w.image, w.legend, w.voice_id, \
    COALESCE(json_agg(json_build_object(\
        'id', s.id, 'word_id', s.word_id, \
        'native_text', s.native_text, 'foreign_text', s.foreign_text) ORDER BY s.id) \
        FILTER (WHERE s.id IS NOT NULL), '[]'::json) AS sentences";

// ============================================================================
// CONNECTION POOL CONFIGURATION
// ============================================================================

/// Database connection pool configuration.
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// PostgreSQL host
    pub host: String,
    /// PostgreSQL port
    pub port: u16,
    /// Database name
    pub dbname: String,
    /// Database user
    pub user: String,
    /// Database password
    pub password: String,
    /// Maximum pool size
    pub max_size: usize,
    /// Connection timeout
    pub timeout: Duration,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            dbname: "lexis".to_string(),
            user: "postgres".to_string(),
            password: "".to_string(),
            max_size: 16,
            timeout: Duration::from_secs(30),
        }
    }
}

impl DbConfig {
    /// Create a new database configuration from environment variables.
    pub fn from_env() -> Self {
        Self {
            host: std::env::var("LEXIS_DB_HOST").unwrap_or_else(|_| "localhost".to_string()),
            port: std::env::var("LEXIS_DB_PORT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(5432),
            dbname: std::env::var("LEXIS_DB_NAME").unwrap_or_else(|_| "lexis".to_string()),
            user: std::env::var("LEXIS_DB_USER").unwrap_or_else(|_| "postgres".to_string()),
            password: std::env::var("LEXIS_DB_PASSWORD").unwrap_or_default(),
            max_size: std::env::var("LEXIS_DB_POOL_SIZE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(16),
            timeout: Duration::from_secs(
                std::env::var("LEXIS_DB_TIMEOUT")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(30),
            ),
        }
    }

    /// Create a connection pool from this configuration.
    pub fn create_pool(&self) -> ApiResult<Pool> {
        let mut cfg = Config::new();
        cfg.host = Some(self.host.clone());
        cfg.port = Some(self.port);
        cfg.dbname = Some(self.dbname.clone());
        cfg.user = Some(self.user.clone());
        cfg.password = Some(self.password.clone());
        cfg.manager = Some(ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        });
        cfg.pool = Some(deadpool_postgres::PoolConfig {
            max_size: self.max_size,
            timeouts: deadpool_postgres::Timeouts {
                wait: Some(self.timeout),
                create: Some(self.timeout),
                recycle: Some(self.timeout),
            },
            ..Default::default()
        });

        let pool = cfg
            .create_pool(Some(Runtime::Tokio1), NoTls)
            .map_err(|e| ApiError::database_error(format!("Failed to create pool: {}", e)))?;

        Ok(pool)
    }
}

// ============================================================================
// POSTGRES STORE
// ============================================================================

/// [`CardStore`] over a PostgreSQL pool.
#[derive(Clone)]
pub struct PgStore {
    pool: Pool,
    timeout: Duration,
}

impl std::fmt::Debug for PgStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PgStore")
            .field("pool_size", &self.pool_size())
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl PgStore {
    pub fn new(pool: Pool) -> Self {
        Self {
            pool,
            timeout: Duration::from_secs(30),
        }
    }

    pub fn from_config(config: &DbConfig) -> ApiResult<Self> {
        let pool = config.create_pool()?;
        Ok(Self {
            pool,
            timeout: config.timeout,
        })
    }

    /// Get the current pool size for observability.
    pub fn pool_size(&self) -> usize {
        self.pool.status().size
    }

    async fn get_conn(&self, operation: &'static str) -> LexisResult<deadpool_postgres::Object> {
        self.pool.get().await.map_err(|e| pool_error(operation, self.timeout, e))
    }

    /// Create the tables if they do not exist.
    pub async fn ensure_schema(&self) -> ApiResult<()> {
        let conn = self.pool.get().await?;
        conn.batch_execute(SCHEMA_SQL).await?;
        tracing::info!("Database schema ensured");
        Ok(())
    }

    /// Insert or replace word bank entries and their sentences.
    pub async fn word_upsert(&self, words: &[Word]) -> LexisResult<usize> {
        timed("word_upsert", async {
            let mut conn = self.get_conn("word_upsert").await?;
            let tx = conn
                .transaction()
                .await
                .map_err(|e| db_error("word_upsert", e))?;
            for word in words {
                tx.execute(
                    "INSERT INTO words (id, latin_word, native_word, cyrillic_word, transcription, image, legend, voice_id) \
                     VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
                     ON CONFLICT (id) DO UPDATE SET latin_word = EXCLUDED.latin_word, \
                     native_word = EXCLUDED.native_word, cyrillic_word = EXCLUDED.cyrillic_word, \
                     transcription = EXCLUDED.transcription, image = EXCLUDED.image, \
                     legend = EXCLUDED.legend, voice_id = EXCLUDED.voice_id",
                    &[
                        &word.id,
                        &word.latin_word,
                        &word.native_word,
                        &word.cyrillic_word,
                        &word.transcription,
                        &word.image,
                        &word.legend,
                        &word.voice_id,
                    ],
                )
                .await
                .map_err(|e| db_error("word_upsert", e))?;
                tx.execute("DELETE FROM sentences WHERE word_id = $1", &[&word.id])
                    .await
                    .map_err(|e| db_error("word_upsert", e))?;
                for sentence in &word.sentences {
                    tx.execute(
                        "INSERT INTO sentences (word_id, native_text, foreign_text) VALUES ($1, $2, $3)",
                        &[&word.id, &sentence.native_text, &sentence.foreign_text],
                    )
                    .await
                    .map_err(|e| db_error("word_upsert", e))?;
                }
            }
            tx.commit().await.map_err(|e| db_error("word_upsert", e))?;
            Ok(words.len())
        })
        .await
    }
}

#[async_trait]
impl CardStore for PgStore {
    async fn user_insert(&self, user: &NewUser, at: Timestamp) -> LexisResult<UserRegistration> {
        timed("user_insert", async {
            let conn = self.get_conn("user_insert").await?;
            let inserted = conn
                .query_opt(
                    "INSERT INTO users (id, first_name, username, created_at) VALUES ($1, $2, $3, $4) \
                     ON CONFLICT (id) DO NOTHING \
                     RETURNING id, first_name, username, created_at",
                    &[&user.id, &user.first_name, &user.username, &at],
                )
                .await
                .map_err(|e| db_error("user_insert", e))?;

            if let Some(row) = inserted {
                return Ok(UserRegistration::Created(user_from_row(&row)));
            }

            let row = conn
                .query_one(
                    "SELECT id, first_name, username, created_at FROM users WHERE id = $1",
                    &[&user.id],
                )
                .await
                .map_err(|e| db_error("user_insert", e))?;
            Ok(UserRegistration::Existing(user_from_row(&row)))
        })
        .await
    }

    async fn user_list_all(&self) -> LexisResult<Vec<User>> {
        timed("user_list_all", async {
            let conn = self.get_conn("user_list_all").await?;
            let rows = conn
                .query(
                    "SELECT id, first_name, username, created_at FROM users ORDER BY id",
                    &[],
                )
                .await
                .map_err(|e| db_error("user_list_all", e))?;
            Ok(rows.iter().map(user_from_row).collect())
        })
        .await
    }

    async fn card_insert(&self, card: &Card) -> LexisResult<()> {
        timed("card_insert", async {
            let conn = self.get_conn("card_insert").await?;
            conn.execute(
                "INSERT INTO cards (user_id, word_id, count_of_views, last_view) VALUES ($1, $2, $3, $4)",
                &[&card.user_id, &card.word_id, &card.count_of_views, &card.last_view],
            )
            .await
            .map_err(|e| match e.code().cloned() {
                Some(code) if code == SqlState::UNIQUE_VIOLATION => {
                    LexisError::from(StorageError::InsertFailed {
                        entity: "card",
                        reason: "already exists".to_string(),
                    })
                }
                Some(code) if code == SqlState::FOREIGN_KEY_VIOLATION => {
                    LexisError::from(StorageError::InsertFailed {
                        entity: "card",
                        reason: "unknown user or word".to_string(),
                    })
                }
                _ => db_error("card_insert", e),
            })?;
            Ok(())
        })
        .await
    }

    async fn card_get(&self, user_id: UserId, word_id: WordId) -> LexisResult<Option<Card>> {
        timed("card_get", async {
            let conn = self.get_conn("card_get").await?;
            let row = conn
                .query_opt(
                    "SELECT user_id, word_id, count_of_views, last_view FROM cards \
                     WHERE user_id = $1 AND word_id = $2",
                    &[&user_id, &word_id],
                )
                .await
                .map_err(|e| db_error("card_get", e))?;
            Ok(row.as_ref().map(card_from_row))
        })
        .await
    }

    async fn card_list_by_user(&self, user_id: UserId, limit: usize) -> LexisResult<Vec<Card>> {
        timed("card_list_by_user", async {
            let conn = self.get_conn("card_list_by_user").await?;
            let limit = i64::try_from(limit).unwrap_or(i64::MAX);
            let rows = conn
                .query(
                    "SELECT user_id, word_id, count_of_views, last_view FROM cards \
                     WHERE user_id = $1 ORDER BY word_id LIMIT $2",
                    &[&user_id, &limit],
                )
                .await
                .map_err(|e| db_error("card_list_by_user", e))?;
            Ok(rows.iter().map(card_from_row).collect())
        })
        .await
    }

    async fn card_increment_views(
        &self,
        user_id: UserId,
        word_id: WordId,
        at: Timestamp,
    ) -> LexisResult<Card> {
        timed("card_increment_views", async {
            let conn = self.get_conn("card_increment_views").await?;
            let row = conn
                .query_opt(
                    "UPDATE cards SET count_of_views = count_of_views + 1, last_view = $3 \
                     WHERE user_id = $1 AND word_id = $2 \
                     RETURNING user_id, word_id, count_of_views, last_view",
                    &[&user_id, &word_id, &at],
                )
                .await
                .map_err(|e| db_error("card_increment_views", e))?;
            row.as_ref().map(card_from_row).ok_or_else(|| {
                StorageError::NotFound {
                    entity: "card",
                    key: format!("{}:{}", user_id, word_id),
                }
                .into()
            })
        })
        .await
    }

    async fn word_list_after(&self, after: WordId, limit: usize) -> LexisResult<Vec<Word>> {
        timed("word_list_after", async {
            let conn = self.get_conn("word_list_after").await?;
            let limit = i64::try_from(limit).unwrap_or(i64::MAX);
            let query = format!(
                "SELECT {WORD_COLUMNS} FROM words w LEFT JOIN sentences s ON s.word_id = w.id \
                 WHERE w.id > $1 GROUP BY w.id ORDER BY w.id LIMIT $2"
            );
            let rows = conn
                .query(query.as_str(), &[&after, &limit])
                .await
                .map_err(|e| db_error("word_list_after", e))?;
            rows.iter().map(word_from_row).collect()
        })
        .await
    }

    async fn word_list_by_ids(&self, ids: &[WordId]) -> LexisResult<Vec<Word>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        timed("word_list_by_ids", async {
            let conn = self.get_conn("word_list_by_ids").await?;
            let query = format!(
                "SELECT {WORD_COLUMNS} FROM words w LEFT JOIN sentences s ON s.word_id = w.id \
                 WHERE w.id = ANY($1) GROUP BY w.id"
            );
            let rows = conn
                .query(query.as_str(), &[&ids])
                .await
                .map_err(|e| db_error("word_list_by_ids", e))?;

            let mut by_id = rows
                .iter()
                .map(|row| word_from_row(row).map(|word| (word.id, word)))
                .collect::<LexisResult<HashMap<WordId, Word>>>()?;
            Ok(ids.iter().filter_map(|id| by_id.remove(id)).collect())
        })
        .await
    }

    async fn health_check(&self) -> LexisResult<()> {
        let conn = self.get_conn("health_check").await?;
        conn.query_one("SELECT 1", &[])
            .await
            .map_err(|e| db_error("health_check", e))?;
        Ok(())
    }
}

// ============================================================================
// HELPERS
// ============================================================================

async fn timed<T, F>(operation: &'static str, fut: F) -> LexisResult<T>
where
    F: Future<Output = LexisResult<T>>,
{
    let start = Instant::now();
    let result = fut.await;
    if let Ok(metrics) = METRICS.as_ref() {
        metrics.record_store_operation(operation, result.is_ok(), start.elapsed().as_secs_f64());
    }
    result
}

fn db_error(operation: &'static str, err: tokio_postgres::Error) -> LexisError {
    tracing::error!(operation, "Database error: {:?}", err);
    if err.is_closed() {
        StorageError::Unavailable {
            reason: "database connection closed".to_string(),
        }
        .into()
    } else {
        StorageError::UpdateFailed {
            entity: operation,
            key: String::new(),
            reason: err.code().map(|c| c.code().to_string()).unwrap_or_default(),
        }
        .into()
    }
}

fn pool_error(operation: &'static str, timeout: Duration, err: PoolError) -> LexisError {
    tracing::error!(operation, "Connection pool error: {:?}", err);
    match err {
        PoolError::Timeout(_) => StorageError::Timeout {
            operation,
            elapsed: timeout,
        }
        .into(),
        _ => StorageError::Unavailable {
            reason: "database pool unavailable".to_string(),
        }
        .into(),
    }
}

fn user_from_row(row: &Row) -> User {
    User {
        id: row.get("id"),
        first_name: row.get("first_name"),
        username: row.get("username"),
        created_at: row.get("created_at"),
    }
}

fn card_from_row(row: &Row) -> Card {
    Card {
        user_id: row.get("user_id"),
        word_id: row.get("word_id"),
        count_of_views: row.get("count_of_views"),
        last_view: row.get("last_view"),
    }
}

fn word_from_row(row: &Row) -> LexisResult<Word> {
    let sentences_json: serde_json::Value = row.get("sentences");
    let sentences: Vec<Sentence> =
        serde_json::from_value(sentences_json).map_err(|e| StorageError::Decode {
            entity: "sentence",
            reason: e.to_string(),
        })?;
    Ok(Word {
        id: row.get("id"),
        latin_word: row.get("latin_word"),
        native_word: row.get("native_word"),
        cyrillic_word: row.get("cyrillic_word"),
        transcription: row.get("transcription"),
        image: row.get("image"),
        legend: row.get("legend"),
        voice_id: row.get("voice_id"),
        sentences,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_db_config_default() {
        let config = DbConfig::default();
        assert_eq!(config.port, 5432);
        assert_eq!(config.dbname, "lexis");
        assert_eq!(config.max_size, 16);
    }

    #[test]
    fn test_schema_declares_card_constraints() {
        assert!(SCHEMA_SQL.contains("PRIMARY KEY (user_id, word_id)"));
        assert!(SCHEMA_SQL.contains("count_of_views >= 0"));
        for table in ["users", "words", "sentences", "cards"] {
            assert!(SCHEMA_SQL.contains(&format!("CREATE TABLE IF NOT EXISTS {}", table)));
        }
    }

    #[test]
    fn test_closed_pool_maps_to_unavailable() {
        let err = pool_error("card_insert", Duration::from_secs(3), PoolError::Closed);
        assert!(err.is_transient());
        assert!(matches!(
            err,
            LexisError::Storage(StorageError::Unavailable { .. })
        ));
    }

    #[test]
    fn test_create_pool_is_lazy() {
        // No connection is made until the first checkout
        let store = PgStore::from_config(&DbConfig::default());
        assert!(store.is_ok());
    }
}
