use chrono::{DateTime, Utc};
use hub_protocol::{HashScheme, MessageType, SignatureScheme};
use sqlx::{PgPool, Postgres, Row, Transaction};

/// The operation under which a row is applied. The operation is the only
/// authority for lifecycle changes; no other writer touches those columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOperation {
    Merge,
    Delete,
    Prune,
    Revoke,
}

/// Logical outcome of [`apply`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    Inserted,
    Updated,
    Noop,
}

/// A decoded message in insertable shape. Produced by the codec with all
/// lifecycle flags null; [`apply`] stamps the flag implied by the operation.
#[derive(Debug, Clone)]
pub struct MessageRow {
    pub fid: i64,
    pub message_type: MessageType,
    pub timestamp: DateTime<Utc>,
    pub hash_scheme: HashScheme,
    pub signature_scheme: SignatureScheme,
    pub hash: Vec<u8>,
    pub signer: Vec<u8>,
    pub raw: Vec<u8>,
    pub body: serde_json::Value,
    pub deleted_at: Option<DateTime<Utc>>,
    pub pruned_at: Option<DateTime<Utc>>,
    pub revoked_at: Option<DateTime<Utc>>,
}

/// Lifecycle projection used by the reconciler's batch lookup.
#[derive(Debug, Clone)]
pub struct LifecycleRow {
    pub hash: Vec<u8>,
    pub pruned_at: Option<DateTime<Utc>>,
    pub revoked_at: Option<DateTime<Utc>>,
}

/// Apply a decoded row under an operation, inside the caller's transaction.
///
/// Single-statement upsert keyed on (hash, fid, message_type). On conflict
/// the update only fires when at least one lifecycle flag actually changes
/// state (set where it was null, or cleared where it was set); otherwise the
/// statement touches nothing and the call reports `Noop`. Repeated `Merge`
/// of a live row and repeated terminal operations are therefore exact
/// no-ops.
pub async fn apply(
    tx: &mut Transaction<'_, Postgres>,
    row: &MessageRow,
    operation: StoreOperation,
) -> Result<ApplyOutcome, sqlx::Error> {
    let now = Utc::now();
    let (deleted_at, pruned_at, revoked_at) = match operation {
        StoreOperation::Merge => (None, None, None),
        StoreOperation::Delete => (Some(now), row.pruned_at, row.revoked_at),
        StoreOperation::Prune => (row.deleted_at, Some(now), row.revoked_at),
        StoreOperation::Revoke => (row.deleted_at, row.pruned_at, Some(now)),
    };

    let inserted = sqlx::query(
        r#"INSERT INTO messages
               (fid, message_type, "timestamp", hash_scheme, signature_scheme,
                hash, signer, raw, body, deleted_at, pruned_at, revoked_at)
           VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
           ON CONFLICT (hash, fid, message_type) DO UPDATE
           SET signature_scheme = EXCLUDED.signature_scheme,
               signer = EXCLUDED.signer,
               raw = EXCLUDED.raw,
               deleted_at = EXCLUDED.deleted_at,
               pruned_at = EXCLUDED.pruned_at,
               revoked_at = EXCLUDED.revoked_at
           WHERE (messages.deleted_at IS NULL) IS DISTINCT FROM (EXCLUDED.deleted_at IS NULL)
              OR (messages.pruned_at IS NULL) IS DISTINCT FROM (EXCLUDED.pruned_at IS NULL)
              OR (messages.revoked_at IS NULL) IS DISTINCT FROM (EXCLUDED.revoked_at IS NULL)
           RETURNING (xmax = 0) AS inserted"#,
    )
    .bind(row.fid)
    .bind(row.message_type.as_str())
    .bind(row.timestamp)
    .bind(row.hash_scheme.as_str())
    .bind(row.signature_scheme.as_str())
    .bind(&row.hash)
    .bind(&row.signer)
    .bind(&row.raw)
    .bind(&row.body)
    .bind(deleted_at)
    .bind(pruned_at)
    .bind(revoked_at)
    .fetch_optional(&mut **tx)
    .await?;

    Ok(match inserted {
        None => ApplyOutcome::Noop,
        Some(r) if r.get::<bool, _>("inserted") => ApplyOutcome::Inserted,
        Some(_) => ApplyOutcome::Updated,
    })
}

/// Fetch the lifecycle flags of stored rows whose hash is in `hashes`,
/// scoped to one (fid, message_type).
pub async fn fetch_lifecycle_by_hashes(
    pool: &PgPool,
    fid: i64,
    message_type: MessageType,
    hashes: &[Vec<u8>],
) -> Result<Vec<LifecycleRow>, sqlx::Error> {
    if hashes.is_empty() {
        return Ok(Vec::new());
    }
    let rows = sqlx::query(
        r#"SELECT hash, pruned_at, revoked_at
           FROM messages
           WHERE fid = $1 AND message_type = $2 AND hash = ANY($3)"#,
    )
    .bind(fid)
    .bind(message_type.as_str())
    .bind(hashes)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|r| LifecycleRow {
            hash: r.get("hash"),
            pruned_at: r.get("pruned_at"),
            revoked_at: r.get("revoked_at"),
        })
        .collect())
}
