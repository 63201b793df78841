use rill_basics::{CollectionKind, LogicalTime, Result, RuleId, Type, Value};

/// The monotonic sequence id a client assigns to each recorded row.
///
/// One sequence per client, starting at 1, shared by inserts and deletes.
pub type RowId = u64;

/// What the executor requires from a lineage store.
///
/// The executor calls `init` once at construction, `add_collection` and
/// `add_rule` during the builder phase, and the remaining methods as facts
/// are produced. Implementations are free to buffer; the executor never
/// reads anything back except the [`RowId`]s.
pub trait LineageClient {
    fn init(&mut self) -> Result<()>;

    /// Registers a collection and its schema.
    fn add_collection(
        &mut self,
        name: &str,
        kind: CollectionKind,
        column_names: &[String],
        column_types: &[Type],
    ) -> Result<()>;

    /// Registers a rule by id, bootstrap flag, and canonical text.
    fn add_rule(&mut self, id: RuleId, bootstrap: bool, text: &str) -> Result<()>;

    /// Records that `row` entered `collection` at logical `time`, returning
    /// the id assigned to the recorded row.
    fn insert_tuple(
        &mut self,
        collection: &str,
        time: LogicalTime,
        row: &[Value],
    ) -> Result<RowId>;

    /// Records that `row` left `collection` at logical `time`.
    fn delete_tuple(
        &mut self,
        collection: &str,
        time: LogicalTime,
        row: &[Value],
    ) -> Result<RowId>;

    /// Records that the tuple `hash` in `collection` arrived over the bus
    /// from `dep_node`, which sent it at its logical time `dep_time`.
    fn add_networked_lineage(
        &mut self,
        dep_node: u64,
        dep_time: LogicalTime,
        collection: &str,
        hash: u64,
        time: LogicalTime,
    ) -> Result<()>;

    /// Records that firing `rule` over the dependency tuple
    /// `(dep_collection, dep_hash)` produced (or, when `inserted` is false,
    /// removed) the tuple `hash` in `collection`, recorded as row `row_id`.
    #[allow(clippy::too_many_arguments)]
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
    ) -> Result<()>;

    /// Runs a caller-supplied statement, e.g. a black-box lineage function
    /// definition. `name` identifies the statement for diagnostics.
    fn exec(&mut self, name: &str, sql: &str) -> Result<()>;
}

/// A client that drops everything: lineage disabled.
#[derive(Debug, Default)]
pub struct NoopClient;

impl NoopClient {
    pub fn new() -> Self {
        NoopClient
    }
}

impl LineageClient for NoopClient {
    fn init(&mut self) -> Result<()> {
        Ok(())
    }

    fn add_collection(
        &mut self,
        _name: &str,
        _kind: CollectionKind,
        _column_names: &[String],
        _column_types: &[Type],
    ) -> Result<()> {
        Ok(())
    }

    fn add_rule(&mut self, _id: RuleId, _bootstrap: bool, _text: &str) -> Result<()> {
        Ok(())
    }

    fn insert_tuple(
        &mut self,
        _collection: &str,
        _time: LogicalTime,
        _row: &[Value],
    ) -> Result<RowId> {
        Ok(0)
    }

    fn delete_tuple(
        &mut self,
        _collection: &str,
        _time: LogicalTime,
        _row: &[Value],
    ) -> Result<RowId> {
        Ok(0)
    }

    fn add_networked_lineage(
        &mut self,
        _dep_node: u64,
        _dep_time: LogicalTime,
        _collection: &str,
        _hash: u64,
        _time: LogicalTime,
    ) -> Result<()> {
        Ok(())
    }

    fn add_derived_lineage(
        &mut self,
        _dep_collection: &str,
        _dep_hash: u64,
        _rule: RuleId,
        _inserted: bool,
        _time: LogicalTime,
        _collection: &str,
        _hash: u64,
        _row_id: RowId,
    ) -> Result<()> {
        Ok(())
    }

    fn exec(&mut self, _name: &str, _sql: &str) -> Result<()> {
        Ok(())
    }
}
