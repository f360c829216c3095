use super::Dialect;

/// Postgres dialect. The only backend that supports `vector` columns via
/// the `pgvector` crate, gated behind the `postgres` Cargo feature.
pub struct PostgresDialect;

impl Dialect for PostgresDialect {
    fn placeholder(idx: usize) -> String {
        format!("${idx}")
    }

    fn supports_vector_search() -> bool {
        true
    }

    fn vector_distance_expr(column: &str, idx: usize) -> String {
        format!("{column} <=> {}", Self::vector_cast(idx))
    }

    fn vector_cast(idx: usize) -> String {
        format!("{}::vector", Self::placeholder(idx))
    }
}
