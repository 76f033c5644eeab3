//! Database row structs.
//!
//! Each submodule holds a `FromRow` struct matching one table and the
//! conversion into the corresponding `meshforge_core` domain type.

pub mod asset;
pub mod credit;
pub mod generation;
pub mod status;
