//! Database backend implementations.
//!
//! PostgreSQL is the only backend: tenant isolation relies on schemas and a
//! per-connection `search_path`, which the other engines this layer could
//! target do not offer in the same form.

pub mod postgres;
