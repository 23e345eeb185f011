//! User icon service.
//!
//! Serves per-user icons over HTTP with strong `ETag` validators, backed by
//! a Postgres store and a two-tier cache (in-process hash index plus an
//! on-disk blob directory). User and reaction payloads embed the same
//! content hash so clients can reuse a cached icon without refetching it.

pub mod application;
pub mod cache;
pub mod config;
pub mod domain;
pub mod infra;
