//! The SQL-emitting lineage client.
//!
//! `PgClient` renders Postgres-dialect statements for every lineage fact and
//! hands them to an injectable [`SqlEngine`] — the concrete database driver
//! stays outside this crate. `MockSqlEngine` captures the statements so the
//! generated SQL can be unit tested.

use rill_basics::{
    Clock, CollectionKind, Error, LogicalTime, Result, RowHash, RuleId, SharedClock,
    SharedRowHash, Type, Value,
};

use std::fmt;

use crate::client::{LineageClient, RowId};
use crate::sql::{literals, PostgresMapping, SqlMapping};

/// Where the lineage database lives.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ConnectionConfig {
    pub host: String,
    pub port: u16,
    pub dbname: String,
    pub user: String,
    pub password: String,
}

impl fmt::Display for ConnectionConfig {
    /// The libpq-style connection string for this config.
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "host={} port={} dbname={} user={} password={}",
            self.host, self.port, self.dbname, self.user, self.password
        )
    }
}

/// What `PgClient` requires from the underlying database driver: run one
/// statement, identified by `name` for diagnostics.
pub trait SqlEngine {
    fn execute(&mut self, name: &str, sql: &str) -> Result<()>;
}

/// An engine that stores each `(name, sql)` pair instead of running it.
#[derive(Debug, Default)]
pub struct MockSqlEngine {
    pub queries: Vec<(String, String)>,
}

impl MockSqlEngine {
    pub fn new() -> Self {
        MockSqlEngine::default()
    }
}

impl SqlEngine for MockSqlEngine {
    fn execute(&mut self, name: &str, sql: &str) -> Result<()> {
        self.queries.push((name.to_owned(), sql.to_owned()));
        Ok(())
    }
}

/// The lineage client that talks to a relational store.
///
/// Per node `N`, each collection `c` gets a table `N_c` holding one row per
/// recorded insert, closed off by `time_deleted` when the tuple is removed;
/// derivations land in `N_lineage`. Process-wide `Nodes`, `Collections` and
/// `Rules` registries describe the running programs.
pub struct PgClient<E> {
    engine: E,
    name: String,
    node_id: u64,
    address: String,
    mapping: Box<dyn SqlMapping + Send>,
    hasher: SharedRowHash,
    clock: SharedClock,
    next_row_id: RowId,
}

impl<E: SqlEngine> PgClient<E> {
    pub fn new(
        name: &str,
        node_id: u64,
        address: &str,
        config: &ConnectionConfig,
        engine: E,
        hasher: SharedRowHash,
        clock: SharedClock,
    ) -> Result<Self> {
        if config.dbname.is_empty() {
            return Err(Error::config("lineage connection config has no dbname"));
        }
        Ok(PgClient {
            engine,
            name: name.to_owned(),
            node_id,
            address: address.to_owned(),
            mapping: Box::new(PostgresMapping::default()),
            hasher,
            clock,
            next_row_id: 1,
        })
    }

    /// The engine, for tests that inspect captured SQL.
    pub fn engine(&self) -> &E {
        &self.engine
    }

    fn table(&self, collection: &str) -> String {
        format!("{}_{}", self.name, collection)
    }

    fn assign_row_id(&mut self) -> RowId {
        let id = self.next_row_id;
        self.next_row_id += 1;
        id
    }

    fn physical_now(&self) -> String {
        format!("'{}'", self.clock.now().format("%Y-%m-%d %H:%M:%S"))
    }
}

impl<E: SqlEngine> LineageClient for PgClient<E> {
    fn init(&mut self) -> Result<()> {
        self.engine.execute(
            "create_nodes_table",
            r"CREATE TABLE IF NOT EXISTS Nodes (
                id      bigint PRIMARY KEY,
                name    text   NOT NULL,
                address text   NOT NULL
            );",
        )?;
        self.engine.execute(
            "create_collections_table",
            r"CREATE TABLE IF NOT EXISTS Collections (
                node_id         bigint NOT NULL,
                collection_name text   NOT NULL,
                collection_type text   NOT NULL
            );",
        )?;
        self.engine.execute(
            "create_rules_table",
            r"CREATE TABLE IF NOT EXISTS Rules (
                node_id      bigint  NOT NULL,
                rule_number  integer NOT NULL,
                is_bootstrap boolean NOT NULL,
                rule         text    NOT NULL
            );",
        )?;
        self.engine.execute(
            "register_node",
            &format!(
                "INSERT INTO Nodes (id, name, address) VALUES ({}, '{}', '{}');",
                self.node_id, self.name, self.address
            ),
        )?;
        self.engine.execute(
            "create_lineage_table",
            &format!(
                r"CREATE TABLE {}_lineage (
                    dep_node_id         bigint  NOT NULL,
                    dep_time            integer,
                    dep_collection_name text,
                    dep_tuple_hash      bigint,
                    rule_number         integer,
                    inserted            boolean NOT NULL,
                    collection_name     text    NOT NULL,
                    tuple_hash          bigint  NOT NULL,
                    time                integer NOT NULL
                );",
                self.name
            ),
        )
    }

    fn add_collection(
        &mut self,
        name: &str,
        kind: CollectionKind,
        column_names: &[String],
        column_types: &[Type],
    ) -> Result<()> {
        self.engine.execute(
            "register_collection",
            &format!(
                "INSERT INTO Collections (node_id, collection_name, collection_type) \
                 VALUES ({}, '{}', '{}');",
                self.node_id, name, kind
            ),
        )?;

        let columns = column_names
            .iter()
            .zip(column_types.iter())
            .map(|(n, t)| format!(",\n                    {} {}", n, self.mapping.sql_type(*t)))
            .collect::<Vec<_>>()
            .concat();
        self.engine.execute(
            "create_collection_table",
            &format!(
                r"CREATE TABLE {} (
                    id                     bigint  NOT NULL,
                    hash                   bigint  NOT NULL,
                    time_inserted          integer NOT NULL,
                    time_deleted           integer,
                    physical_time_inserted timestamp with time zone NOT NULL,
                    physical_time_deleted  timestamp with time zone{}
                );",
                self.table(name),
                columns
            ),
        )
    }

    fn add_rule(&mut self, id: RuleId, bootstrap: bool, text: &str) -> Result<()> {
        self.engine.execute(
            "register_rule",
            &format!(
                "INSERT INTO Rules (node_id, rule_number, is_bootstrap, rule) \
                 VALUES ({}, {}, {}, '{}');",
                self.node_id,
                id,
                bootstrap,
                text.replace('\'', "''")
            ),
        )
    }

    fn insert_tuple(
        &mut self,
        collection: &str,
        time: LogicalTime,
        row: &[Value],
    ) -> Result<RowId> {
        let row_id = self.assign_row_id();
        let hash = self.hasher.hash_row(row);
        let mut values = vec![
            row_id.to_string(),
            (hash as i64).to_string(),
            time.to_string(),
            "NULL".to_owned(),
            self.physical_now(),
            "NULL".to_owned(),
        ];
        values.extend(literals(&*self.mapping, row));
        self.engine.execute(
            "insert_tuple",
            &format!(
                "INSERT INTO {} VALUES ({});",
                self.table(collection),
                values.join(", ")
            ),
        )?;
        Ok(row_id)
    }

    fn delete_tuple(
        &mut self,
        collection: &str,
        time: LogicalTime,
        row: &[Value],
    ) -> Result<RowId> {
        let row_id = self.assign_row_id();
        let hash = self.hasher.hash_row(row);
        self.engine.execute(
            "delete_tuple",
            &format!(
                "UPDATE {} SET time_deleted = {}, physical_time_deleted = {} \
                 WHERE hash = {} AND time_deleted IS NULL;",
                self.table(collection),
                time,
                self.physical_now(),
                hash as i64
            ),
        )?;
        Ok(row_id)
    }

    fn add_networked_lineage(
        &mut self,
        dep_node: u64,
        dep_time: LogicalTime,
        collection: &str,
        hash: u64,
        time: LogicalTime,
    ) -> Result<()> {
        self.engine.execute(
            "add_networked_lineage",
            &format!(
                "INSERT INTO {}_lineage VALUES ({}, {}, NULL, NULL, NULL, true, '{}', {}, {});",
                self.name, dep_node, dep_time, collection, hash as i64, time
            ),
        )
    }

    fn add_derived_lineage(
        &mut self,
        dep_collection: &str,
        dep_hash: u64,
        rule: RuleId,
        inserted: bool,
        time: LogicalTime,
        collection: &str,
        hash: u64,
        _row_id: RowId,
    ) -> Result<()> {
        self.engine.execute(
            "add_derived_lineage",
            &format!(
                "INSERT INTO {}_lineage VALUES ({}, NULL, '{}', {}, {}, {}, '{}', {}, {});",
                self.name,
                self.node_id,
                dep_collection,
                dep_hash as i64,
                rule,
                inserted,
                collection,
                hash as i64,
                time
            ),
        )
    }

    fn exec(&mut self, name: &str, sql: &str) -> Result<()> {
        self.engine.execute(name, sql)
    }
}
