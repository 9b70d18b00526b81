//! Upload part repository.

use crate::error::MetadataResult;
use crate::models::UploadPartRow;
use async_trait::async_trait;
use partcache_core::{NewPart, PartKey};
use std::collections::BTreeSet;

/// Maximum bound parameters per `IN (...)` list; SQLite rejects more than ~999.
pub(crate) const IN_LIST_BATCH_SIZE: usize = 900;

/// Row predicates understood by [`PartStorage`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PartFilter {
    /// Every row for the key, expired or not.
    Key(PartKey),
    /// Rows for the key with `expire_time > now`.
    ValidKey { key: PartKey, now: i64 },
    /// Rows with `expire_time <= now`.
    ExpiredAt(i64),
    /// Rows whose remote chunk id is in the list.
    RemoteIds(Vec<i64>),
    /// Every row. Not accepted by `delete_where`.
    All,
}

/// Storage for upload part rows.
///
/// Each method is a single statement (or one transaction for batched `IN`
/// lists) against the backing store.
#[async_trait]
pub trait PartStorage: Send + Sync {
    /// Insert a row and return its assigned id.
    async fn insert(&self, part: &NewPart, created_at: i64) -> MetadataResult<i64>;

    /// Set a new expiry on an existing row. Returns false if the row is gone.
    async fn update_by_id(&self, id: i64, expire_time: i64) -> MetadataResult<bool>;

    /// Fetch the single preferred row matching the filter.
    ///
    /// Rows are ranked by `expire_time` descending, then `id` descending, so the
    /// most recently refreshed and then most recently created row wins.
    async fn query_one(&self, filter: &PartFilter) -> MetadataResult<Option<UploadPartRow>>;

    /// Fetch all rows matching the filter, ordered by `id` ascending.
    async fn query_many(&self, filter: &PartFilter) -> MetadataResult<Vec<UploadPartRow>>;

    /// Delete every row matching the filter and return the number removed.
    async fn delete_where(&self, filter: &PartFilter) -> MetadataResult<u64>;

    /// Create the table and indexes if missing.
    async fn migrate(&self) -> MetadataResult<()>;

    /// Check database connectivity.
    async fn health_check(&self) -> MetadataResult<()>;

    /// Close the connection pool. Later calls fail with `StorageUnavailable`.
    async fn close(&self);
}

/// Placeholder syntax of the target database.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Placeholder {
    /// `?` (SQLite)
    Question,
    /// `$1, $2, ...` (PostgreSQL)
    Numbered,
}

/// A value to bind, in placeholder order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum SqlValue {
    Int(i64),
    Text(String),
}

/// A rendered `WHERE` clause (empty for [`PartFilter::All`]).
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SqlPredicate {
    pub clause: String,
    pub binds: Vec<SqlValue>,
}

struct Params {
    style: Placeholder,
    next: usize,
}

impl Params {
    fn new(style: Placeholder) -> Self {
        Self { style, next: 1 }
    }

    fn next(&mut self) -> String {
        let placeholder = match self.style {
            Placeholder::Question => "?".to_string(),
            Placeholder::Numbered => format!("${}", self.next),
        };
        self.next += 1;
        placeholder
    }
}

impl PartFilter {
    /// Render the filter as one or more predicates.
    ///
    /// Remote id lists are deduplicated and split into batches of
    /// [`IN_LIST_BATCH_SIZE`]; an empty list renders to no predicates at all,
    /// so callers issue no statement.
    pub(crate) fn render(&self, style: Placeholder) -> Vec<SqlPredicate> {
        match self {
            PartFilter::Key(key) => {
                let mut params = Params::new(style);
                vec![SqlPredicate {
                    clause: format!(
                        "WHERE file_hash = {} AND file_size = {}",
                        params.next(),
                        params.next()
                    ),
                    binds: vec![SqlValue::Text(key.hash.clone()), SqlValue::Int(key.size)],
                }]
            }
            PartFilter::ValidKey { key, now } => {
                let mut params = Params::new(style);
                vec![SqlPredicate {
                    clause: format!(
                        "WHERE file_hash = {} AND file_size = {} AND expire_time > {}",
                        params.next(),
                        params.next(),
                        params.next()
                    ),
                    binds: vec![
                        SqlValue::Text(key.hash.clone()),
                        SqlValue::Int(key.size),
                        SqlValue::Int(*now),
                    ],
                }]
            }
            PartFilter::ExpiredAt(now) => {
                let mut params = Params::new(style);
                vec![SqlPredicate {
                    clause: format!("WHERE expire_time <= {}", params.next()),
                    binds: vec![SqlValue::Int(*now)],
                }]
            }
            PartFilter::RemoteIds(ids) => {
                let unique: Vec<i64> = ids
                    .iter()
                    .copied()
                    .collect::<BTreeSet<_>>()
                    .into_iter()
                    .collect();
                unique
                    .chunks(IN_LIST_BATCH_SIZE)
                    .map(|batch| {
                        let mut params = Params::new(style);
                        let placeholders: Vec<String> =
                            batch.iter().map(|_| params.next()).collect();
                        SqlPredicate {
                            clause: format!("WHERE cid IN ({})", placeholders.join(", ")),
                            binds: batch.iter().map(|id| SqlValue::Int(*id)).collect(),
                        }
                    })
                    .collect()
            }
            PartFilter::All => vec![SqlPredicate {
                clause: String::new(),
                binds: Vec::new(),
            }],
        }
    }
}

/// Bind rendered [`SqlValue`]s onto a sqlx query, in order.
macro_rules! bind_values {
    ($query:expr, $binds:expr) => {{
        let mut query = $query;
        for value in $binds {
            query = match value {
                $crate::repos::parts::SqlValue::Int(v) => query.bind(*v),
                $crate::repos::parts::SqlValue::Text(v) => query.bind(v.clone()),
            };
        }
        query
    }};
}
pub(crate) use bind_values;

/// Pick the preferred row out of per-batch winners.
pub(crate) fn preferred(rows: impl IntoIterator<Item = UploadPartRow>) -> Option<UploadPartRow> {
    rows.into_iter().max_by_key(|row| (row.expire_time, row.id))
}
