//! A lineage client that records every invocation, for tests.

use rill_basics::{CollectionKind, LogicalTime, Result, RuleId, Type, Value};

use crate::client::{LineageClient, RowId};
use crate::sql::{literals, PostgresMapping, SqlMapping};

#[derive(Clone, Debug, PartialEq)]
pub struct AddCollectionRecord {
    pub name: String,
    pub kind: CollectionKind,
    pub column_names: Vec<String>,
    pub column_types: Vec<String>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct AddRuleRecord {
    pub id: RuleId,
    pub bootstrap: bool,
    pub text: String,
}

/// One recorded insert or delete: which collection, the assigned row id, the
/// logical time, and the row rendered as SQL literals.
#[derive(Clone, Debug, PartialEq)]
pub struct TupleRecord {
    pub collection: String,
    pub row_id: RowId,
    pub time: LogicalTime,
    pub values: Vec<String>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct NetworkedLineageRecord {
    pub dep_node: u64,
    pub dep_time: LogicalTime,
    pub collection: String,
    pub hash: u64,
    pub time: LogicalTime,
}

#[derive(Clone, Debug, PartialEq)]
pub struct DerivedLineageRecord {
    pub dep_collection: String,
    pub dep_hash: u64,
    pub rule: RuleId,
    pub inserted: bool,
    pub time: LogicalTime,
    pub collection: String,
    pub hash: u64,
    pub row_id: RowId,
}

/// Same interface as the SQL-emitting client, but method invocations are
/// simply appended to public vectors for assertions.
pub struct MockClient {
    mapping: Box<dyn SqlMapping + Send>,
    next_row_id: RowId,

    pub initialized: bool,
    pub collections: Vec<AddCollectionRecord>,
    pub rules: Vec<AddRuleRecord>,
    pub inserts: Vec<TupleRecord>,
    pub deletes: Vec<TupleRecord>,
    pub networked: Vec<NetworkedLineageRecord>,
    pub derived: Vec<DerivedLineageRecord>,
    pub execs: Vec<(String, String)>,
}

impl MockClient {
    pub fn new() -> Self {
        MockClient {
            mapping: Box::new(PostgresMapping::default()),
            next_row_id: 1,
            initialized: false,
            collections: Vec::new(),
            rules: Vec::new(),
            inserts: Vec::new(),
            deletes: Vec::new(),
            networked: Vec::new(),
            derived: Vec::new(),
            execs: Vec::new(),
        }
    }

    fn assign_row_id(&mut self) -> RowId {
        let id = self.next_row_id;
        self.next_row_id += 1;
        id
    }
}

impl Default for MockClient {
    fn default() -> Self {
        MockClient::new()
    }
}

impl LineageClient for MockClient {
    fn init(&mut self) -> Result<()> {
        self.initialized = true;
        Ok(())
    }

    fn add_collection(
        &mut self,
        name: &str,
        kind: CollectionKind,
        column_names: &[String],
        column_types: &[Type],
    ) -> Result<()> {
        let column_types = column_types
            .iter()
            .map(|t| self.mapping.sql_type(*t))
            .collect();
        self.collections.push(AddCollectionRecord {
            name: name.to_owned(),
            kind,
            column_names: column_names.to_vec(),
            column_types,
        });
        Ok(())
    }

    fn add_rule(&mut self, id: RuleId, bootstrap: bool, text: &str) -> Result<()> {
        self.rules.push(AddRuleRecord {
            id,
            bootstrap,
            text: text.to_owned(),
        });
        Ok(())
    }

    fn insert_tuple(
        &mut self,
        collection: &str,
        time: LogicalTime,
        row: &[Value],
    ) -> Result<RowId> {
        let row_id = self.assign_row_id();
        let values = literals(&*self.mapping, row);
        self.inserts.push(TupleRecord {
            collection: collection.to_owned(),
            row_id,
            time,
            values,
        });
        Ok(row_id)
    }

    fn delete_tuple(
        &mut self,
        collection: &str,
        time: LogicalTime,
        row: &[Value],
    ) -> Result<RowId> {
        let row_id = self.assign_row_id();
        let values = literals(&*self.mapping, row);
        self.deletes.push(TupleRecord {
            collection: collection.to_owned(),
            row_id,
            time,
            values,
        });
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
        self.networked.push(NetworkedLineageRecord {
            dep_node,
            dep_time,
            collection: collection.to_owned(),
            hash,
            time,
        });
        Ok(())
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
        row_id: RowId,
    ) -> Result<()> {
        self.derived.push(DerivedLineageRecord {
            dep_collection: dep_collection.to_owned(),
            dep_hash,
            rule,
            inserted,
            time,
            collection: collection.to_owned(),
            hash,
            row_id,
        });
        Ok(())
    }

    fn exec(&mut self, name: &str, sql: &str) -> Result<()> {
        self.execs.push((name.to_owned(), sql.to_owned()));
        Ok(())
    }
}
