//! vl-db: persistence for harvest bookkeeping.
//!
//! A small SQLite store with connection pooling and embedded migrations. It
//! records which virtual libraries have had a cover generated so restarts
//! do not redo the work.

pub mod migrations;
pub mod models;
pub mod pool;
pub mod queries;
