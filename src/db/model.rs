//! Row types returned by store queries.
//!
//! Keep these structs focused on the data returned by queries.

/// One cursor row from the `offsets` table.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct OffsetRecord {
    pub source: String,
    pub since_id: Option<String>,
}

/// Number of delivered items per dedup namespace, with the newest first-seen time.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct SeenCount {
    pub source: String,
    pub items: i64,
    pub last_seen: i64,
}
