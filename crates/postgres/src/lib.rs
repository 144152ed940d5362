//! # Postgres
//!
//! This crate provides PostgreSQL access for the Campsite Tracker application:
//! connection pooling and a record store backed by a single JSONB table.

/// Database client for the campsite tracker application.
pub mod database;
/// Record store implementation on PostgreSQL.
pub mod record_store;

pub use record_store::PgRecordStore;
