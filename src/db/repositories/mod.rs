use core::fmt;

use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{Sqlite, SqlitePool, Transaction};
use tracing::instrument;

use crate::db::models::SCORE_FIELDS;
use crate::db::prelude::{DbError, DbResult, Difficulty, PlayerId, Score, SongMetadata};

pub mod player;
pub mod score;

/// Thin wrapper over a sqlite transaction carrying the statements a score merge is built from.
///
/// Dropping a `Tx` without calling [`Tx::commit`] rolls it back.
pub struct Tx {
    inner: Option<Transaction<'static, Sqlite>>,
}

impl Tx {
    #[instrument(skip(pool))]
    pub async fn begin(pool: &SqlitePool) -> DbResult<Self> {
        let inner = pool.begin().await?;
        Ok(Self { inner: Some(inner) })
    }

    #[instrument(skip(self))]
    pub async fn commit(&mut self) -> DbResult<()> {
        match self.inner.take() {
            Some(tx) => Ok(tx.commit().await?),
            None => Err(DbError::Query(sqlx::Error::Protocol(
                "transaction already completed".into(),
            ))),
        }
    }

    fn inner_mut(&mut self) -> DbResult<&mut Transaction<'static, Sqlite>> {
        self.inner.as_mut().ok_or_else(|| {
            DbError::Query(sqlx::Error::Protocol("transaction already completed".into()))
        })
    }

    #[instrument(skip(self))]
    pub async fn find_score(
        &mut self,
        player_id: &PlayerId,
        song_hash: &str,
        difficulty: Difficulty,
    ) -> DbResult<Option<Score>> {
        let score = sqlx::query_as::<_, Score>(&format!(
            r#"
            SELECT {SCORE_FIELDS} FROM score
            WHERE player_id = ?1
            AND song_hash = ?2
            AND difficulty = ?3
            "#
        ))
        .bind(player_id)
        .bind(song_hash)
        .bind(difficulty)
        .fetch_optional(&mut **self.inner_mut()?)
        .await?;

        Ok(score)
    }

    #[instrument(skip(self, meta))]
    pub async fn insert_score(
        &mut self,
        player_id: &PlayerId,
        song_hash: &str,
        difficulty: Difficulty,
        value: i64,
        meta: &SongMetadata,
    ) -> DbResult<Score> {
        let score = sqlx::query_as::<_, Score>(&format!(
            r#"
            INSERT INTO score (
                player_id,
                song_hash,
                difficulty,
                score,
                song_name,
                song_artist,
                song_mapper,
                image_url,
                map_url
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            RETURNING {SCORE_FIELDS}
            "#
        ))
        .bind(player_id)
        .bind(song_hash)
        .bind(difficulty)
        .bind(value)
        .bind(&meta.song_name)
        .bind(&meta.song_artist)
        .bind(&meta.song_mapper)
        .bind(&meta.image_url)
        .bind(&meta.map_url)
        .fetch_one(&mut **self.inner_mut()?)
        .await?;

        Ok(score)
    }

    /// Raises the stored value and replaces display metadata.
    ///
    /// The value is written as `MAX(score, ?)` so a row can never move downwards, whatever the
    /// caller read beforehand.
    #[instrument(skip(self, meta))]
    pub async fn raise_score(
        &mut self,
        id: i64,
        value: i64,
        meta: &SongMetadata,
    ) -> DbResult<Score> {
        let score = sqlx::query_as::<_, Score>(&format!(
            r#"
            UPDATE score
            SET score = MAX(score, ?2),
                song_name = ?3,
                song_artist = ?4,
                song_mapper = ?5,
                image_url = COALESCE(?6, image_url),
                map_url = COALESCE(?7, map_url),
                updated_at = datetime('now')
            WHERE id = ?1
            RETURNING {SCORE_FIELDS}
            "#
        ))
        .bind(id)
        .bind(value)
        .bind(&meta.song_name)
        .bind(&meta.song_artist)
        .bind(&meta.song_mapper)
        .bind(&meta.image_url)
        .bind(&meta.map_url)
        .fetch_one(&mut **self.inner_mut()?)
        .await?;

        Ok(score)
    }

    /// Back-fills the image and map URLs on an existing row without touching its value.
    #[instrument(skip(self))]
    pub async fn backfill_urls(
        &mut self,
        id: i64,
        image_url: Option<&str>,
        map_url: Option<&str>,
    ) -> DbResult<Score> {
        let score = sqlx::query_as::<_, Score>(&format!(
            r#"
            UPDATE score
            SET image_url = COALESCE(?2, image_url),
                map_url = COALESCE(?3, map_url),
                updated_at = datetime('now')
            WHERE id = ?1
            RETURNING {SCORE_FIELDS}
            "#
        ))
        .bind(id)
        .bind(image_url)
        .bind(map_url)
        .fetch_one(&mut **self.inner_mut()?)
        .await?;

        Ok(score)
    }
}

/// Base lookups shared by table repositories.
#[async_trait]
pub trait Repository {
    type Ident: for<'q> sqlx::Encode<'q, Sqlite> + sqlx::Type<Sqlite> + Send + Sync + fmt::Debug;
    type Output: for<'r> sqlx::FromRow<'r, SqliteRow> + Sized + Unpin + Send + fmt::Debug;

    const BASE_FIELDS: &'static str;
    const TABLE_NAME: &'static str;
    const ID_FIELD: &'static str;

    fn pool(&self) -> &SqlitePool;

    /// Fetches a single row, mapping absence to [`DbError::NotFound`].
    async fn get_by_id(&self, id: &Self::Ident) -> DbResult<Self::Output> {
        sqlx::query_as::<_, Self::Output>(&format!(
            "SELECT {} FROM {} WHERE {} = ?1",
            Self::BASE_FIELDS,
            Self::TABLE_NAME,
            Self::ID_FIELD,
        ))
        .bind(id)
        .fetch_optional(self.pool())
        .await?
        .ok_or_else(|| DbError::NotFound(format!("{} {:?}", Self::TABLE_NAME, id)))
    }

    #[cfg(test)]
    async fn count(&self) -> DbResult<i64> {
        let count = sqlx::query_scalar::<_, i64>(&format!(
            "SELECT COUNT(*) FROM {}",
            Self::TABLE_NAME
        ))
        .fetch_one(self.pool())
        .await?;

        Ok(count)
    }
}
