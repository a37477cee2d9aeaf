//! Document projection and binary delta engine for BSON documents.
//!
//! Two independent cores share the path and raw-value machinery: a
//! projection tree built once from a field specification and applied
//! repeatedly to documents, and a binary document diff that can be computed
//! from a (pre, post) pair, persisted, and later re-applied to a possibly
//! stale pre-image.

pub mod diff;
pub mod error;
pub mod expression;
pub mod field_tree;
pub mod path;
pub mod projection;
mod util;

pub use crate::diff::{apply_diff, compute_diff, Diff, V2LogBuilder};
pub use crate::error::{Error, Result};
pub use crate::path::{ArrayIndexPath, PathComponent};
pub use crate::projection::{
    parse_add_fields, parse_projection, ProjectionExecutor, ProjectionPolicies,
};
