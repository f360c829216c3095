use super::Dialect;

/// SQLite dialect, used for local development and for exercising every
/// non-vector code path in tests. No `vector` column exists in the sqlite
/// migrations, so `vector_distance_expr` is unreachable in practice —
/// callers must check `supports_vector_search()` first.
pub struct SqliteDialect;

impl Dialect for SqliteDialect {
    fn placeholder(_idx: usize) -> String {
        "?".to_string()
    }

    fn supports_vector_search() -> bool {
        false
    }

    fn vector_distance_expr(_column: &str, _idx: usize) -> String {
        unimplemented!("sqlite backend has no vector column; guard with supports_vector_search()")
    }

    fn vector_cast(idx: usize) -> String {
        Self::placeholder(idx)
    }
}
