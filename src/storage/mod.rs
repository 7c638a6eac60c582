//! Persistence layer: the SQLite primary store.

pub mod sqlite;
