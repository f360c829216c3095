//! SQL dialect abstraction.
//!
//! Most of the schema (six tables, `ON CONFLICT DO NOTHING` upserts,
//! `RETURNING`) is supported identically by both backends at the SQL
//! versions this crate targets. What genuinely differs is bind-parameter
//! syntax and vector operations, which only Postgres (via `pgvector`)
//! supports. Row-claim locking (`FOR UPDATE SKIP LOCKED`) is handled
//! directly in `db::tasks` behind a `cfg` branch rather than through this
//! trait, since SQLite has no row-level locking story worth abstracting.

pub mod postgres;
pub mod sqlite;

#[cfg(all(feature = "postgres", not(feature = "sqlite")))]
pub type Db = sqlx::Postgres;
#[cfg(all(feature = "postgres", not(feature = "sqlite")))]
pub type CurrentDialect = postgres::PostgresDialect;

#[cfg(all(feature = "sqlite", not(feature = "postgres")))]
pub type Db = sqlx::Sqlite;
#[cfg(all(feature = "sqlite", not(feature = "postgres")))]
pub type CurrentDialect = sqlite::SqliteDialect;

pub type CurrentRow = <Db as sqlx::Database>::Row;

/// The handful of SQL fragments that genuinely differ between backends.
pub trait Dialect {
    /// Bind-parameter placeholder for the given 1-based index.
    fn placeholder(idx: usize) -> String;

    /// Whether this backend can express `embedding <=> $1` (pgvector
    /// cosine-distance) in SQL. When `false`, the search planner falls back
    /// to a tag/keyword-only plan.
    fn supports_vector_search() -> bool;

    /// `embedding <=> {placeholder}` (Postgres) for use in an `ORDER BY`
    /// or scored `SELECT` expression. Panics if `supports_vector_search()`
    /// is `false` — callers must check first.
    fn vector_distance_expr(column: &str, idx: usize) -> String;

    /// Casts a bound text parameter to the vector type for comparisons.
    fn vector_cast(idx: usize) -> String;
}

/// Renders a 1-based placeholder list, e.g. `($1, $2, $3)` / `(?, ?, ?)`.
pub fn placeholder_list<D: Dialect>(start: usize, count: usize) -> String {
    let items: Vec<String> = (0..count).map(|i| D::placeholder(start + i)).collect();
    format!("({})", items.join(", "))
}
