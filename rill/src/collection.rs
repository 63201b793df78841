//! Typed collections: the state a node's rules read and write.
//!
//! All six variants share one representation tagged by
//! [`CollectionKind`]; behavior differences (what gets cleared at tick end,
//! what triggers sends, what is read-only) live in the executor. Contents
//! are sets of rows with deterministic iteration order, so lineage emission
//! and tests see a stable ordering.

use std::collections::BTreeSet;
use std::time::{Duration, Instant};

use rill_basics::{CollectionKind, Row, Type, Value};

/// A collection's position in its node, assigned in declaration order.
pub type CollectionId = usize;

#[derive(Debug)]
pub struct Collection {
    name: String,
    kind: CollectionKind,
    column_names: Vec<String>,
    schema: Vec<Type>,
    tuples: BTreeSet<Row>,

    // Periodic state: the emission interval, the next deadline (armed when
    // the executor starts), and the sequence number of the next firing.
    period: Option<Duration>,
    next_deadline: Option<Instant>,
    next_seq: u64,
}

impl Collection {
    pub(crate) fn new(
        name: &str,
        kind: CollectionKind,
        column_names: Vec<String>,
        schema: Vec<Type>,
    ) -> Collection {
        Collection {
            name: name.to_owned(),
            kind,
            column_names,
            schema,
            tuples: BTreeSet::new(),
            period: None,
            next_deadline: None,
            next_seq: 0,
        }
    }

    pub(crate) fn periodic(name: &str, period: Duration) -> Collection {
        let mut c = Collection::new(
            name,
            CollectionKind::Periodic,
            vec!["id".to_owned(), "when".to_owned()],
            vec![Type::UnsignedBigInt, Type::Timestamp],
        );
        c.period = Some(period);
        c
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> CollectionKind {
        self.kind
    }

    pub fn column_names(&self) -> &[String] {
        &self.column_names
    }

    pub fn schema(&self) -> &[Type] {
        &self.schema
    }

    /// The current tuple set, read-only.
    pub fn tuples(&self) -> &BTreeSet<Row> {
        &self.tuples
    }

    /// Adds `rows`, returning the ones that were not already present.
    pub(crate) fn merge<I>(&mut self, rows: I) -> Vec<Row>
    where
        I: IntoIterator<Item = Row>,
    {
        let mut added = Vec::new();
        for row in rows {
            if self.tuples.insert(row.clone()) {
                added.push(row);
            }
        }
        added
    }

    /// Removes `rows`, returning the ones that were actually present.
    pub(crate) fn delete<I>(&mut self, rows: I) -> Vec<Row>
    where
        I: IntoIterator<Item = Row>,
    {
        let mut removed = Vec::new();
        for row in rows {
            if self.tuples.remove(&row) {
                removed.push(row);
            }
        }
        removed
    }

    /// Replaces the contents wholesale; used to roll back a failed tick.
    pub(crate) fn restore(&mut self, tuples: BTreeSet<Row>) {
        self.tuples = tuples;
    }

    /// Empties the collection, returning everything that was in it.
    pub(crate) fn clear(&mut self) -> Vec<Row> {
        let drained: Vec<Row> = self.tuples.iter().cloned().collect();
        self.tuples.clear();
        drained
    }

    /// Whether the executor empties this collection at the end of a tick.
    pub(crate) fn is_transient(&self) -> bool {
        match self.kind {
            CollectionKind::Table => false,
            _ => true,
        }
    }

    /// Starts the periodic timer relative to `now`.
    pub(crate) fn arm(&mut self, now: Instant) {
        if let Some(period) = self.period {
            self.next_deadline = Some(now + period);
        }
    }

    pub(crate) fn next_deadline(&self) -> Option<Instant> {
        self.next_deadline
    }

    /// Consumes every deadline elapsed by `now`, returning one sequence
    /// number per elapsed period.
    pub(crate) fn take_elapsed(&mut self, now: Instant) -> Vec<u64> {
        let period = match self.period {
            Some(p) => p,
            None => return Vec::new(),
        };
        let mut fired = Vec::new();
        while let Some(deadline) = self.next_deadline {
            if deadline > now {
                break;
            }
            fired.push(self.next_seq);
            self.next_seq += 1;
            self.next_deadline = Some(deadline + period);
        }
        fired
    }
}

/// Renders one tuple as a line of output: a single string column prints as
/// the string itself, anything else as a comma-joined textual form.
pub fn render_line(row: &[Value]) -> String {
    if row.len() == 1 {
        if let Value::Text(ref s) = row[0] {
            return s.clone();
        }
    }
    row.iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}
