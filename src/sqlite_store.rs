//! SQLite-backed [`ItemStore`] and [`VectorIndex`].
//!
//! The compare-and-transition primitive is one `UPDATE … WHERE id = ? AND
//! status = ? AND <lease guard>` statement, so the database's row
//! atomicity is the only lock: any number of `cortex run` processes can
//! share the file. An enrichment commit that carries an embedding writes
//! the vector in the same transaction as the status change.

use std::collections::BTreeMap;
use std::str::FromStr;

use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, Sqlite, SqlitePool, Transaction};

use radio_cortex_core::error::{ParseEnumError, StoreError};
use radio_cortex_core::models::{Capability, Item, NewItem, Status};
use radio_cortex_core::pipeline::is_valid_edge;
use radio_cortex_core::search::{
    blob_to_vec, check_dims, cosine_similarity, rank_hits, vec_to_blob, SimilarityHit,
};
use radio_cortex_core::store::{
    AttemptChange, ItemStore, LeaseChange, LeaseGuard, Transition, VectorIndex,
};

/// SQLite implementation of [`ItemStore`] and [`VectorIndex`] over the
/// `items` and `item_vectors` tables.
pub struct SqliteStore {
    pool: SqlitePool,
    dims: usize,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool, dims: usize) -> Self {
        Self { pool, dims }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

const SELECT_ITEM: &str = r#"
    SELECT i.id, i.source, i.source_id, i.fingerprint, i.title, i.artist, i.album,
           i.duration_secs, i.license_raw, i.license_kind, i.source_url, i.media_url,
           i.collected_by, i.category, i.secondary_categories, i.mood_tags,
           i.cultural_context, i.status, i.lease_owner, i.lease_acquired_at,
           i.lease_expires_at, i.not_before, i.attempts, i.last_error,
           i.created_at, i.updated_at, v.embedding
    FROM items i
    LEFT JOIN item_vectors v ON v.item_id = i.id
"#;

// An unleased row, or one whose lease has run out.
const LEASE_FREE: &str =
    "(i.lease_owner IS NULL OR (i.lease_expires_at IS NOT NULL AND i.lease_expires_at <= ?))";

fn backend(e: sqlx::Error) -> StoreError {
    StoreError::Backend(e.to_string())
}

fn json_err(e: serde_json::Error) -> StoreError {
    StoreError::Backend(format!("invalid JSON column: {}", e))
}

fn parse_column<T: FromStr<Err = ParseEnumError>>(value: &str) -> Result<T, StoreError> {
    value.parse().map_err(|e: ParseEnumError| StoreError::Backend(e.to_string()))
}

fn is_unique_violation(e: &sqlx::Error) -> bool {
    e.as_database_error()
        .map(|db| db.is_unique_violation())
        .unwrap_or(false)
}

fn decode_attempts(json: &str) -> Result<BTreeMap<Capability, u32>, StoreError> {
    let raw: BTreeMap<String, u32> = serde_json::from_str(json).map_err(json_err)?;
    Ok(raw
        .into_iter()
        .filter_map(|(k, v)| k.parse::<Capability>().ok().map(|cap| (cap, v)))
        .collect())
}

fn row_to_item(row: &SqliteRow) -> Result<Item, StoreError> {
    let status: String = row.try_get("status").map_err(backend)?;
    let license_kind: String = row.try_get("license_kind").map_err(backend)?;
    let secondary: String = row.try_get("secondary_categories").map_err(backend)?;
    let moods: String = row.try_get("mood_tags").map_err(backend)?;
    let attempts: String = row.try_get("attempts").map_err(backend)?;
    let embedding: Option<Vec<u8>> = row.try_get("embedding").map_err(backend)?;

    Ok(Item {
        id: row.try_get("id").map_err(backend)?,
        source: row.try_get("source").map_err(backend)?,
        source_id: row.try_get("source_id").map_err(backend)?,
        fingerprint: row.try_get("fingerprint").map_err(backend)?,
        title: row.try_get("title").map_err(backend)?,
        artist: row.try_get("artist").map_err(backend)?,
        album: row.try_get("album").map_err(backend)?,
        duration_secs: row.try_get("duration_secs").map_err(backend)?,
        license_raw: row.try_get("license_raw").map_err(backend)?,
        license_kind: parse_column(&license_kind)?,
        source_url: row.try_get("source_url").map_err(backend)?,
        media_url: row.try_get("media_url").map_err(backend)?,
        collected_by: row.try_get("collected_by").map_err(backend)?,
        category: row.try_get("category").map_err(backend)?,
        secondary_categories: serde_json::from_str(&secondary).map_err(json_err)?,
        mood_tags: serde_json::from_str(&moods).map_err(json_err)?,
        cultural_context: row.try_get("cultural_context").map_err(backend)?,
        embedding: embedding.map(|blob| blob_to_vec(&blob)),
        status: parse_column(&status)?,
        lease_owner: row.try_get("lease_owner").map_err(backend)?,
        lease_acquired_at: row.try_get("lease_acquired_at").map_err(backend)?,
        lease_expires_at: row.try_get("lease_expires_at").map_err(backend)?,
        not_before: row.try_get("not_before").map_err(backend)?,
        attempts: decode_attempts(&attempts)?,
        last_error: row.try_get("last_error").map_err(backend)?,
        created_at: row.try_get("created_at").map_err(backend)?,
        updated_at: row.try_get("updated_at").map_err(backend)?,
    })
}

fn rows_to_items(rows: &[SqliteRow]) -> Result<Vec<Item>, StoreError> {
    rows.iter().map(row_to_item).collect()
}

fn lease_sql(change: &LeaseChange) -> &'static str {
    match change {
        LeaseChange::Keep => "",
        LeaseChange::Grant { .. } => {
            "lease_owner = ?, lease_acquired_at = ?, lease_expires_at = ?,"
        }
        LeaseChange::Clear => {
            "lease_owner = NULL, lease_acquired_at = NULL, lease_expires_at = NULL,"
        }
    }
}

fn attempts_sql(change: AttemptChange) -> String {
    match change {
        AttemptChange::Keep => "attempts".to_string(),
        AttemptChange::Increment(cap) => format!(
            "json_set(attempts, '$.{c}', COALESCE(json_extract(attempts, '$.{c}'), 0) + 1)",
            c = cap.as_str()
        ),
        AttemptChange::Reset(cap) => format!("json_remove(attempts, '$.{}')", cap.as_str()),
    }
}

fn guard_sql(guard: &LeaseGuard) -> String {
    match guard {
        LeaseGuard::Claimable => format!(
            " AND {} AND (i.not_before IS NULL OR i.not_before <= ?)",
            LEASE_FREE
        ),
        LeaseGuard::Unleased => format!(" AND {}", LEASE_FREE),
        LeaseGuard::HeldBy(_) => " AND i.lease_owner = ?".to_string(),
    }
}

async fn upsert_vector_tx(
    tx: &mut Transaction<'_, Sqlite>,
    item_id: &str,
    vector: &[f32],
    model: &str,
    now: i64,
) -> Result<u64, StoreError> {
    let version: i64 = sqlx::query_scalar(
        r#"
        INSERT INTO item_vectors (item_id, model, dims, embedding, version, updated_at)
        VALUES (?, ?, ?, ?, 1, ?)
        ON CONFLICT(item_id) DO UPDATE SET
            model = excluded.model,
            dims = excluded.dims,
            embedding = excluded.embedding,
            version = item_vectors.version + 1,
            updated_at = excluded.updated_at
        RETURNING version
        "#,
    )
    .bind(item_id)
    .bind(model)
    .bind(vector.len() as i64)
    .bind(vec_to_blob(vector))
    .bind(now)
    .fetch_one(&mut **tx)
    .await
    .map_err(backend)?;
    Ok(version as u64)
}

impl SqliteStore {
    async fn fetch_item_tx(
        tx: &mut Transaction<'_, Sqlite>,
        id: &str,
    ) -> Result<Option<Item>, StoreError> {
        let sql = format!("{} WHERE i.id = ?", SELECT_ITEM);
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&mut **tx)
            .await
            .map_err(backend)?;
        row.as_ref().map(row_to_item).transpose()
    }

    /// After a guarded write touched no row, tell "gone" from "moved on".
    async fn lost_item_error(&self, id: &str, expected: Status) -> StoreError {
        let exists: Result<Option<String>, sqlx::Error> =
            sqlx::query_scalar("SELECT status FROM items WHERE id = ?")
                .bind(id)
                .fetch_optional(&self.pool)
                .await;
        match exists {
            Ok(Some(_)) => StoreError::Conflict {
                id: id.to_string(),
                expected,
            },
            Ok(None) => StoreError::NotFound(id.to_string()),
            Err(e) => backend(e),
        }
    }
}

#[async_trait]
impl ItemStore for SqliteStore {
    async fn insert(&self, new: NewItem, now: i64) -> Result<Item, StoreError> {
        let item = Item::from_new(uuid::Uuid::new_v4().to_string(), new, now);

        let result = sqlx::query(
            r#"
            INSERT INTO items (id, source, source_id, fingerprint, title, artist, album,
                               duration_secs, license_raw, license_kind, source_url,
                               media_url, collected_by, status, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&item.id)
        .bind(&item.source)
        .bind(&item.source_id)
        .bind(&item.fingerprint)
        .bind(&item.title)
        .bind(&item.artist)
        .bind(&item.album)
        .bind(item.duration_secs)
        .bind(&item.license_raw)
        .bind(item.license_kind.as_str())
        .bind(&item.source_url)
        .bind(&item.media_url)
        .bind(&item.collected_by)
        .bind(item.status.as_str())
        .bind(item.created_at)
        .bind(item.updated_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(item),
            Err(e) if is_unique_violation(&e) => Err(StoreError::Duplicate(item.fingerprint)),
            Err(e) => Err(backend(e)),
        }
    }

    async fn get(&self, id: &str) -> Result<Item, StoreError> {
        let sql = format!("{} WHERE i.id = ?", SELECT_ITEM);
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;
        match row {
            Some(row) => row_to_item(&row),
            None => Err(StoreError::NotFound(id.to_string())),
        }
    }

    async fn find_by_fingerprint(&self, fingerprint: &str) -> Result<Option<Item>, StoreError> {
        let sql = format!("{} WHERE i.fingerprint = ?", SELECT_ITEM);
        let row = sqlx::query(&sql)
            .bind(fingerprint)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;
        row.as_ref().map(row_to_item).transpose()
    }

    async fn list_by_status(&self, status: Status, limit: usize) -> Result<Vec<Item>, StoreError> {
        let sql = format!(
            "{} WHERE i.status = ? ORDER BY i.updated_at ASC, i.id ASC LIMIT ?",
            SELECT_ITEM
        );
        let rows = sqlx::query(&sql)
            .bind(status.as_str())
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(backend)?;
        rows_to_items(&rows)
    }

    async fn list_recent(&self, limit: usize) -> Result<Vec<Item>, StoreError> {
        let sql = format!(
            "{} ORDER BY i.updated_at DESC, i.id DESC LIMIT ?",
            SELECT_ITEM
        );
        let rows = sqlx::query(&sql)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(backend)?;
        rows_to_items(&rows)
    }

    async fn count_by_status(&self) -> Result<BTreeMap<Status, u64>, StoreError> {
        let rows = sqlx::query("SELECT status, COUNT(*) AS n FROM items GROUP BY status")
            .fetch_all(&self.pool)
            .await
            .map_err(backend)?;
        let mut counts = BTreeMap::new();
        for row in rows {
            let status: String = row.get("status");
            let n: i64 = row.get("n");
            let status: Status = parse_column(&status)?;
            counts.insert(status, n as u64);
        }
        Ok(counts)
    }

    async fn count_active_leases(&self, now: i64) -> Result<u64, StoreError> {
        let n: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM items
            WHERE lease_owner IS NOT NULL
              AND (lease_expires_at IS NULL OR lease_expires_at > ?)
            "#,
        )
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(backend)?;
        Ok(n as u64)
    }

    async fn claimable(
        &self,
        status: Status,
        now: i64,
        limit: usize,
    ) -> Result<Vec<Item>, StoreError> {
        let sql = format!(
            "{} WHERE i.status = ?{} ORDER BY i.updated_at ASC, i.id ASC LIMIT ?",
            SELECT_ITEM,
            guard_sql(&LeaseGuard::Claimable)
        );
        let rows = sqlx::query(&sql)
            .bind(status.as_str())
            .bind(now)
            .bind(now)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(backend)?;
        rows_to_items(&rows)
    }

    async fn compare_and_transition(
        &self,
        id: &str,
        expected: Status,
        guard: &LeaseGuard,
        transition: &Transition,
        now: i64,
    ) -> Result<Item, StoreError> {
        if !is_valid_edge(expected, transition.to) {
            return Err(StoreError::InvalidTransition {
                from: expected,
                to: transition.to,
            });
        }
        if let Some(embedding) = &transition.patch.embedding {
            check_dims(self.dims, &embedding.vector)?;
        }

        let patch = &transition.patch;
        let secondary = patch
            .secondary_categories
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(json_err)?;
        let moods = patch
            .mood_tags
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(json_err)?;

        // The alias keeps the guard fragments shared with `claimable`.
        let sql = format!(
            r#"
            UPDATE items AS i SET
                status = ?,
                {lease}
                attempts = {attempts},
                not_before = ?,
                last_error = COALESCE(?, last_error),
                media_url = COALESCE(?, media_url),
                duration_secs = COALESCE(?, duration_secs),
                license_kind = COALESCE(?, license_kind),
                category = COALESCE(?, category),
                secondary_categories = COALESCE(?, secondary_categories),
                mood_tags = COALESCE(?, mood_tags),
                cultural_context = COALESCE(?, cultural_context),
                updated_at = ?
            WHERE i.id = ? AND i.status = ?{guard}
            "#,
            lease = lease_sql(&transition.lease),
            attempts = attempts_sql(transition.attempts),
            guard = guard_sql(guard),
        );

        let mut query = sqlx::query(&sql).bind(transition.to.as_str());
        if let LeaseChange::Grant {
            owner,
            acquired_at,
            expires_at,
        } = &transition.lease
        {
            query = query.bind(owner).bind(*acquired_at).bind(*expires_at);
        }
        query = query
            .bind(transition.not_before)
            .bind(&transition.last_error)
            .bind(&patch.media_url)
            .bind(patch.duration_secs)
            .bind(patch.license_kind.map(|k| k.as_str()))
            .bind(&patch.category)
            .bind(secondary)
            .bind(moods)
            .bind(&patch.cultural_context)
            .bind(now)
            .bind(id)
            .bind(expected.as_str());
        query = match guard {
            LeaseGuard::Claimable => query.bind(now).bind(now),
            LeaseGuard::Unleased => query.bind(now),
            LeaseGuard::HeldBy(owner) => query.bind(owner),
        };

        let mut tx = self.pool.begin().await.map_err(backend)?;
        let affected = query
            .execute(&mut *tx)
            .await
            .map_err(backend)?
            .rows_affected();
        if affected == 0 {
            tx.rollback().await.map_err(backend)?;
            return Err(self.lost_item_error(id, expected).await);
        }

        if let Some(embedding) = &patch.embedding {
            upsert_vector_tx(&mut tx, id, &embedding.vector, &embedding.model, now).await?;
        }

        let item = Self::fetch_item_tx(&mut tx, id)
            .await?
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        tx.commit().await.map_err(backend)?;
        Ok(item)
    }

    async fn release_lease(&self, id: &str, owner: &str) -> Result<(), StoreError> {
        let affected = sqlx::query(
            r#"
            UPDATE items
            SET lease_owner = NULL, lease_acquired_at = NULL, lease_expires_at = NULL
            WHERE id = ? AND lease_owner = ?
            "#,
        )
        .bind(id)
        .bind(owner)
        .execute(&self.pool)
        .await
        .map_err(backend)?
        .rows_affected();

        if affected == 1 {
            return Ok(());
        }
        let status: Option<String> = sqlx::query_scalar("SELECT status FROM items WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;
        match status {
            Some(status) => Err(StoreError::Conflict {
                id: id.to_string(),
                expected: parse_column(&status)?,
            }),
            None => Err(StoreError::NotFound(id.to_string())),
        }
    }

    async fn clear_expired_leases(&self, now: i64) -> Result<u64, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE items
            SET lease_owner = NULL, lease_acquired_at = NULL, lease_expires_at = NULL
            WHERE lease_owner IS NOT NULL AND lease_expires_at <= ?
            "#,
        )
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(backend)?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl VectorIndex for SqliteStore {
    fn dims(&self) -> usize {
        self.dims
    }

    async fn upsert_vector(
        &self,
        item_id: &str,
        vector: &[f32],
        model: &str,
        now: i64,
    ) -> Result<u64, StoreError> {
        check_dims(self.dims, vector)?;
        let mut tx = self.pool.begin().await.map_err(backend)?;
        let touched = sqlx::query("UPDATE items SET updated_at = ? WHERE id = ?")
            .bind(now)
            .bind(item_id)
            .execute(&mut *tx)
            .await
            .map_err(backend)?
            .rows_affected();
        if touched == 0 {
            tx.rollback().await.map_err(backend)?;
            return Err(StoreError::NotFound(item_id.to_string()));
        }
        let version = upsert_vector_tx(&mut tx, item_id, vector, model, now).await?;
        tx.commit().await.map_err(backend)?;
        Ok(version)
    }

    async fn remove_vector(&self, item_id: &str) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM item_vectors WHERE item_id = ?")
            .bind(item_id)
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        Ok(result.rows_affected() > 0)
    }

    async fn vector_version(&self, item_id: &str) -> Result<Option<u64>, StoreError> {
        let version: Option<i64> =
            sqlx::query_scalar("SELECT version FROM item_vectors WHERE item_id = ?")
                .bind(item_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(backend)?;
        Ok(version.map(|v| v as u64))
    }

    async fn vector_count(&self) -> Result<u64, StoreError> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM item_vectors")
            .fetch_one(&self.pool)
            .await
            .map_err(backend)?;
        Ok(n as u64)
    }

    async fn query(&self, vector: &[f32], k: usize) -> Result<Vec<SimilarityHit>, StoreError> {
        check_dims(self.dims, vector)?;

        // Vectors written under another `embedding.dims` make every score
        // meaningless.
        let stale: Option<i64> =
            sqlx::query_scalar("SELECT dims FROM item_vectors WHERE dims != ? LIMIT 1")
                .bind(self.dims as i64)
                .fetch_optional(&self.pool)
                .await
                .map_err(backend)?;
        if let Some(actual) = stale {
            return Err(StoreError::Schema {
                expected: self.dims,
                actual: actual as usize,
            });
        }

        // Visibility is decided by the item's status at query time.
        let rows = sqlx::query(
            r#"
            SELECT v.item_id, v.embedding, i.updated_at
            FROM item_vectors v
            JOIN items i ON i.id = v.item_id
            WHERE i.status = ?
            "#,
        )
        .bind(Status::Approved.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        let hits = rows
            .iter()
            .map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                SimilarityHit {
                    item_id: row.get("item_id"),
                    score: cosine_similarity(vector, &blob_to_vec(&blob)),
                    updated_at: row.get("updated_at"),
                }
            })
            .collect();

        Ok(rank_hits(hits, k))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use radio_cortex_core::license::LicenseKind;
    use radio_cortex_core::models::{EmbeddingPatch, ItemPatch};
    use sqlx::sqlite::SqliteConnectOptions;
    use tempfile::TempDir;

    async fn open(dims: usize) -> (TempDir, SqliteStore) {
        let tmp = TempDir::new().unwrap();
        let options = SqliteConnectOptions::new()
            .filename(tmp.path().join("test.sqlite"))
            .create_if_missing(true);
        let pool = SqlitePool::connect_with(options).await.unwrap();
        crate::migrate::apply(&pool).await.unwrap();
        (tmp, SqliteStore::new(pool, dims))
    }

    fn candidate(title: &str, url: &str) -> NewItem {
        NewItem {
            source: "test".into(),
            source_id: title.into(),
            title: title.into(),
            artist: Some("Tom Jobim".into()),
            album: Some("Elis & Tom".into()),
            duration_secs: Some(212),
            license_raw: Some("CC BY 4.0".into()),
            license_kind: LicenseKind::CcBy,
            source_url: url.into(),
            media_url: None,
            collected_by: "test".into(),
        }
    }

    async fn step(store: &SqliteStore, id: &str, from: Status, t: Transition) -> Item {
        store
            .compare_and_transition(id, from, &LeaseGuard::Unleased, &t, 10)
            .await
            .unwrap()
    }

    async fn approve(store: &SqliteStore, id: &str) {
        let stages = [
            (Status::Discovered, Status::PendingEnrichment, Capability::Collect),
            (Status::PendingEnrichment, Status::PendingCompliance, Capability::Enrich),
            (Status::PendingCompliance, Status::Approved, Capability::Validate),
        ];
        for (from, to, cap) in stages {
            step(store, id, from, Transition::advance(to, cap, ItemPatch::default())).await;
        }
    }

    #[tokio::test]
    async fn test_insert_roundtrip_and_duplicate() {
        let (_tmp, store) = open(2).await;
        let item = store
            .insert(candidate("Águas de Março", "https://example.org/a"), 1)
            .await
            .unwrap();
        let loaded = store.get(&item.id).await.unwrap();
        assert_eq!(loaded, item);

        let err = store
            .insert(candidate("águas de  março", "https://EXAMPLE.org/a/"), 2)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Duplicate(_)));
        assert_eq!(store.count_by_status().await.unwrap()[&Status::Discovered], 1);
    }

    #[tokio::test]
    async fn test_claim_guard_and_conflict() {
        let (_tmp, store) = open(2).await;
        let item = store.insert(candidate("a", "u"), 0).await.unwrap();

        let claimed = store
            .compare_and_transition(
                &item.id,
                Status::Discovered,
                &LeaseGuard::Claimable,
                &Transition::claim(Status::Discovered, "w1", 5, 100),
                5,
            )
            .await
            .unwrap();
        assert_eq!(claimed.lease_owner.as_deref(), Some("w1"));
        assert_eq!(claimed.lease_expires_at, Some(100));

        let err = store
            .compare_and_transition(
                &item.id,
                Status::Discovered,
                &LeaseGuard::Claimable,
                &Transition::claim(Status::Discovered, "w2", 6, 100),
                6,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict { .. }));

        let err = store
            .compare_and_transition(
                "missing",
                Status::Discovered,
                &LeaseGuard::Claimable,
                &Transition::claim(Status::Discovered, "w2", 6, 100),
                6,
            )
            .await
            .unwrap_err();
        assert_eq!(err, StoreError::NotFound("missing".into()));
    }

    #[tokio::test]
    async fn test_commit_writes_patch_attempts_and_vector() {
        let (_tmp, store) = open(2).await;
        let item = store.insert(candidate("a", "u"), 0).await.unwrap();
        step(
            &store,
            &item.id,
            Status::Discovered,
            Transition::advance(
                Status::PendingEnrichment,
                Capability::Collect,
                ItemPatch::default(),
            ),
        )
        .await;
        let retried = step(
            &store,
            &item.id,
            Status::PendingEnrichment,
            Transition::retry(
                Status::PendingEnrichment,
                Capability::Enrich,
                0,
                "rate limited".into(),
            ),
        )
        .await;
        assert_eq!(retried.attempts_for(Capability::Enrich), 1);
        assert_eq!(retried.last_error.as_deref(), Some("rate limited"));
        assert_eq!(retried.not_before, Some(0));

        let patch = ItemPatch {
            category: Some("Bossa Nova".into()),
            secondary_categories: Some(vec!["MPB".into(), "Jazz".into()]),
            mood_tags: Some(["calm".to_string(), "romantic".to_string()].into_iter().collect()),
            cultural_context: Some("Brazil, 1970s".into()),
            embedding: Some(EmbeddingPatch {
                vector: vec![0.6, 0.8],
                model: "test".into(),
            }),
            ..Default::default()
        };
        let enriched = step(
            &store,
            &item.id,
            Status::PendingEnrichment,
            Transition::advance(Status::PendingCompliance, Capability::Enrich, patch),
        )
        .await;
        assert_eq!(enriched.status, Status::PendingCompliance);
        assert_eq!(enriched.category.as_deref(), Some("Bossa Nova"));
        assert_eq!(enriched.secondary_categories, vec!["MPB", "Jazz"]);
        assert!(enriched.mood_tags.contains("romantic"));
        assert_eq!(enriched.attempts_for(Capability::Enrich), 0);
        assert_eq!(enriched.embedding, Some(vec![0.6, 0.8]));
        assert_eq!(enriched.not_before, None);
        assert_eq!(store.vector_version(&item.id).await.unwrap(), Some(1));
        // unrelated fields survive
        assert_eq!(enriched.album.as_deref(), Some("Elis & Tom"));
    }

    #[tokio::test]
    async fn test_wrong_dims_patch_leaves_item_untouched() {
        let (_tmp, store) = open(2).await;
        let item = store.insert(candidate("a", "u"), 0).await.unwrap();
        step(
            &store,
            &item.id,
            Status::Discovered,
            Transition::advance(
                Status::PendingEnrichment,
                Capability::Collect,
                ItemPatch::default(),
            ),
        )
        .await;
        let patch = ItemPatch {
            embedding: Some(EmbeddingPatch {
                vector: vec![1.0; 3],
                model: "test".into(),
            }),
            ..Default::default()
        };
        let err = store
            .compare_and_transition(
                &item.id,
                Status::PendingEnrichment,
                &LeaseGuard::Unleased,
                &Transition::advance(Status::PendingCompliance, Capability::Enrich, patch),
                1,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Schema { expected: 2, actual: 3 }));
        assert_eq!(
            store.get(&item.id).await.unwrap().status,
            Status::PendingEnrichment
        );
    }

    #[tokio::test]
    async fn test_lease_expiry_and_release() {
        let (_tmp, store) = open(2).await;
        let item = store.insert(candidate("a", "u"), 0).await.unwrap();
        store
            .compare_and_transition(
                &item.id,
                Status::Discovered,
                &LeaseGuard::Claimable,
                &Transition::claim(Status::Discovered, "w1", 0, 100),
                0,
            )
            .await
            .unwrap();
        assert_eq!(store.count_active_leases(50).await.unwrap(), 1);
        assert!(store.claimable(Status::Discovered, 50, 5).await.unwrap().is_empty());
        assert!(matches!(
            store.release_lease(&item.id, "w2").await,
            Err(StoreError::Conflict { .. })
        ));

        assert_eq!(store.clear_expired_leases(100).await.unwrap(), 1);
        assert_eq!(store.claimable(Status::Discovered, 100, 5).await.unwrap().len(), 1);
        assert!(matches!(
            store.release_lease("missing", "w1").await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_query_visibility_and_order() {
        let (_tmp, store) = open(2).await;
        let a = store.insert(candidate("a", "u1"), 0).await.unwrap();
        let b = store.insert(candidate("b", "u2"), 0).await.unwrap();
        let hidden = store.insert(candidate("c", "u3"), 0).await.unwrap();

        for (id, vector) in [(&a.id, [1.0, 0.1]), (&b.id, [0.2, 1.0])] {
            store.upsert_vector(id, &vector, "m", 1).await.unwrap();
            approve(&store, id).await;
        }
        store.upsert_vector(&hidden.id, &[1.0, 0.0], "m", 1).await.unwrap();

        let hits = store.query(&[1.0, 0.0], 2).await.unwrap();
        let ids: Vec<_> = hits.iter().map(|h| h.item_id.clone()).collect();
        assert_eq!(ids, vec![a.id.clone(), b.id.clone()]);

        assert_eq!(store.upsert_vector(&a.id, &[0.0, 1.0], "m", 2).await.unwrap(), 2);
        assert!(matches!(
            store.query(&[1.0, 0.0, 0.0], 2).await,
            Err(StoreError::Schema { .. })
        ));
        assert!(matches!(
            store.upsert_vector("missing", &[1.0, 0.0], "m", 2).await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_query_with_vectors_of_other_dims_is_schema_error() {
        let (_tmp, narrow) = open(3).await;
        let item = narrow.insert(candidate("a", "u1"), 0).await.unwrap();
        narrow.upsert_vector(&item.id, &[1.0, 0.0, 0.0], "m", 1).await.unwrap();
        approve(&narrow, &item.id).await;
        assert_eq!(narrow.query(&[1.0, 0.0, 0.0], 5).await.unwrap().len(), 1);

        let wide = SqliteStore::new(narrow.pool().clone(), 4);
        let err = wide.query(&[1.0, 0.0, 0.0, 0.0], 5).await.unwrap_err();
        assert!(
            matches!(err, StoreError::Schema { expected: 4, actual: 3 }),
            "got {:?}",
            err
        );
    }

    #[tokio::test]
    async fn test_list_orders() {
        let (_tmp, store) = open(2).await;
        let first = store.insert(candidate("a", "u1"), 1).await.unwrap();
        let second = store.insert(candidate("b", "u2"), 2).await.unwrap();
        let oldest = store.list_by_status(Status::Discovered, 10).await.unwrap();
        assert_eq!(oldest[0].id, first.id);
        let recent = store.list_recent(1).await.unwrap();
        assert_eq!(recent[0].id, second.id);
    }
}
