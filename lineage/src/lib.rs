//! Lineage (provenance) clients for rill nodes.
//!
//! Every insert, delete, rule firing and cross-node delivery in a rill
//! program can be recorded into an external relational store, giving each
//! tuple an answer to "why does this exist?". The executor only knows the
//! [`LineageClient`] trait; this crate provides the disabled client, a
//! recording mock for tests, and a Postgres-dialect client that renders SQL
//! and hands it to an injectable [`SqlEngine`].

pub mod client;
pub mod mock;
pub mod pg;
pub mod sql;

pub use crate::client::{LineageClient, NoopClient, RowId};
pub use crate::mock::MockClient;
pub use crate::pg::{ConnectionConfig, MockSqlEngine, PgClient, SqlEngine};
pub use crate::sql::{PostgresMapping, SqlMapping};
