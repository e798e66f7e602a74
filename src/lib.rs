//! Bookshelf Server Library
//!
//! This crate exposes the server internals for integration tests and benchmarks.
//! The main server binary is in main.rs.
//!
//! # Modules
//!
//! - `transfer`: CSV import and export pipelines and the row mapper
//! - `covers`: Cover resolution against Google Books and Open Library
//! - `fetch`: Rate-limited HTTP client with retry and backoff
//! - `pool`: Bounded worker pool
//! - `db`: SQLite book storage

pub mod config;
pub mod covers;
pub mod db;
pub mod error;
pub mod fetch;
pub mod library;
pub mod pool;
pub mod routes;
pub mod state;
pub mod transfer;
