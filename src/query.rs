//! # Query Module
//!
//! A composable boolean-expression builder for filtering tags, shared by
//! the admin tag endpoints (`GET /tags`, `GET /tags/suggest`). The image
//! side of filtering lives in `search::build_filters` instead, since the
//! hybrid search planner's tag AND-filter, keyword match, and visibility
//! rules don't reduce to a single boolean expression tree.
//!
//! ## Example
//!
//! ```rust
//! # use imgtag_core::query::{TagQuery, TagQueryKind, TagQueryExpr};
//! let query = TagQuery::new(TagQueryKind::Where(TagQueryExpr::Prefix("na".to_string())))
//!     .with_limit(5)
//!     .with_offset(0);
//! let (sql, params) = query.to_sql();
//! ```

mod tag;

pub use tag::{TagQuery, TagQueryExpr, TagQueryKind};
