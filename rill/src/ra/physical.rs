//! The physical half of the algebra: lazy, restartable iterator pipelines.
//!
//! A [`Phys`] tree is lowered from a logical [`Expr`] against one snapshot
//! of collection state and lives for a single rule evaluation. `to_range`
//! may be called repeatedly (the inner side of a cross product restarts per
//! outer row); a `Count` caches its answer and a `HashJoin` its build-side
//! index for the duration of the materialization.
//!
//! Every produced row carries its *lineage*: the `(collection, hash)` facts
//! it was derived from. Collection scans seed the lineage; operators merge
//! it; iterable leaves contribute none.

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};

use fnv::FnvHashMap;

use rill_basics::{Error, Result, Row, RowHash, Value};

use crate::collection::Collection;

use super::{Aggregate, Expr};

/// A row together with the leaf facts it was derived from.
#[derive(Clone, Debug, PartialEq)]
pub struct LineagedRow {
    pub row: Row,
    pub lineage: Vec<(String, u64)>,
}

impl LineagedRow {
    pub(crate) fn bare(row: Row) -> Self {
        LineagedRow {
            row,
            lineage: Vec::new(),
        }
    }
}

/// What lowering needs from the node: its collections and its hash family.
#[derive(Copy, Clone)]
pub struct EvalContext<'a> {
    pub collections: &'a [Collection],
    pub hasher: &'a dyn RowHash,
}

impl Expr {
    /// Lowers this logical tree against the given node state.
    pub(crate) fn to_physical<'a>(&'a self, ctx: EvalContext<'a>) -> Result<Phys<'a>> {
        Ok(match *self {
            Expr::Scan { id, .. } => {
                let coll = ctx.collections.get(id).ok_or_else(|| {
                    Error::schema(format!("rule reads unknown collection index {}", id))
                })?;
                Phys::Scan {
                    name: coll.name(),
                    rows: coll.tuples(),
                    hasher: ctx.hasher,
                }
            }
            Expr::Iterable { ref rows, .. } => Phys::Iterable { rows },
            Expr::Map {
                ref input, ref f, ..
            } => Phys::Map {
                input: Box::new(input.to_physical(ctx)?),
                f: &**f,
            },
            Expr::Filter { ref input, ref p } => Phys::Filter {
                input: Box::new(input.to_physical(ctx)?),
                p: &**p,
            },
            Expr::Project {
                ref input,
                ref columns,
            } => Phys::Project {
                input: Box::new(input.to_physical(ctx)?),
                columns,
            },
            Expr::Cross {
                ref left,
                ref right,
            } => Phys::Cross {
                left: Box::new(left.to_physical(ctx)?),
                right: Box::new(right.to_physical(ctx)?),
            },
            Expr::HashJoin {
                ref left,
                ref right,
                ref left_on,
                ref right_on,
            } => {
                // The index is built over the side with the smaller arity.
                let build_left = left.column_types()?.len() <= right.column_types()?.len();
                Phys::HashJoin {
                    left: Box::new(left.to_physical(ctx)?),
                    right: Box::new(right.to_physical(ctx)?),
                    left_on,
                    right_on,
                    build_left,
                    index: RefCell::new(None),
                }
            }
            Expr::GroupBy {
                ref input,
                ref keys,
                ref aggregates,
            } => Phys::GroupBy {
                input: Box::new(input.to_physical(ctx)?),
                keys,
                aggregates,
            },
            Expr::Count { ref input } => Phys::Count {
                input: Box::new(input.to_physical(ctx)?),
                cache: RefCell::new(None),
            },
        })
    }
}

pub enum Phys<'a> {
    Scan {
        name: &'a str,
        rows: &'a BTreeSet<Row>,
        hasher: &'a dyn RowHash,
    },
    Iterable {
        rows: &'a [Row],
    },
    Map {
        input: Box<Phys<'a>>,
        f: &'a (dyn Fn(&[Value]) -> Row + Send),
    },
    Filter {
        input: Box<Phys<'a>>,
        p: &'a (dyn Fn(&[Value]) -> bool + Send),
    },
    Project {
        input: Box<Phys<'a>>,
        columns: &'a [usize],
    },
    Cross {
        left: Box<Phys<'a>>,
        right: Box<Phys<'a>>,
    },
    HashJoin {
        left: Box<Phys<'a>>,
        right: Box<Phys<'a>>,
        left_on: &'a [usize],
        right_on: &'a [usize],
        build_left: bool,
        index: RefCell<Option<FnvHashMap<Row, Vec<LineagedRow>>>>,
    },
    GroupBy {
        input: Box<Phys<'a>>,
        keys: &'a [usize],
        aggregates: &'a [(Aggregate, usize)],
    },
    Count {
        input: Box<Phys<'a>>,
        cache: RefCell<Option<LineagedRow>>,
    },
}

fn key_of(row: &[Value], on: &[usize]) -> Row {
    on.iter().map(|&i| row[i].clone()).collect()
}

impl<'a> Phys<'a> {
    /// A fresh lazy pass over this node's output.
    pub fn to_range<'b>(&'b self) -> Box<dyn Iterator<Item = LineagedRow> + 'b> {
        match *self {
            Phys::Scan { name, rows, hasher } => Box::new(rows.iter().map(move |r| {
                LineagedRow {
                    row: r.clone(),
                    lineage: vec![(name.to_owned(), hasher.hash_row(r))],
                }
            })),
            Phys::Iterable { rows } => Box::new(rows.iter().cloned().map(LineagedRow::bare)),
            Phys::Map { ref input, f } => Box::new(input.to_range().map(move |lr| LineagedRow {
                row: f(&lr.row),
                lineage: lr.lineage,
            })),
            Phys::Filter { ref input, p } => {
                Box::new(input.to_range().filter(move |lr| p(&lr.row)))
            }
            Phys::Project { ref input, columns } => {
                Box::new(input.to_range().map(move |lr| LineagedRow {
                    row: key_of(&lr.row, columns),
                    lineage: lr.lineage,
                }))
            }
            Phys::Cross {
                ref left,
                ref right,
            } => {
                let right: &Phys = right;
                Box::new(left.to_range().flat_map(move |l| {
                    right.to_range().map(move |r| {
                        let mut row = l.row.clone();
                        row.extend(r.row);
                        let mut lineage = l.lineage.clone();
                        lineage.extend(r.lineage);
                        LineagedRow { row, lineage }
                    })
                }))
            }
            Phys::HashJoin {
                ref left,
                ref right,
                left_on,
                right_on,
                build_left,
                ref index,
            } => {
                if index.borrow().is_none() {
                    let (build, on) = if build_left {
                        (left, left_on)
                    } else {
                        (right, right_on)
                    };
                    let mut idx: FnvHashMap<Row, Vec<LineagedRow>> = FnvHashMap::default();
                    for lr in build.to_range() {
                        idx.entry(key_of(&lr.row, on))
                            .or_insert_with(Vec::new)
                            .push(lr);
                    }
                    *index.borrow_mut() = Some(idx);
                }

                let (probe, on) = if build_left {
                    (right, right_on)
                } else {
                    (left, left_on)
                };
                Box::new(probe.to_range().flat_map(move |p| {
                    let matches = index
                        .borrow()
                        .as_ref()
                        .and_then(|idx| idx.get(&key_of(&p.row, on)).cloned())
                        .unwrap_or_default();
                    matches
                        .into_iter()
                        .map(move |m| {
                            // Output is the left tuple then the right tuple,
                            // whichever side the index was built over.
                            let (mut row, rest, mut lineage, rest_lineage) = if build_left {
                                (m.row, p.row.clone(), m.lineage, p.lineage.clone())
                            } else {
                                (p.row.clone(), m.row, p.lineage.clone(), m.lineage)
                            };
                            row.extend(rest);
                            lineage.extend(rest_lineage);
                            LineagedRow { row, lineage }
                        })
                        .collect::<Vec<_>>()
                        .into_iter()
                }))
            }
            Phys::GroupBy {
                ref input,
                keys,
                aggregates,
            } => {
                let mut groups: BTreeMap<Row, Vec<LineagedRow>> = BTreeMap::new();
                for lr in input.to_range() {
                    groups
                        .entry(key_of(&lr.row, keys))
                        .or_insert_with(Vec::new)
                        .push(lr);
                }
                let out: Vec<LineagedRow> = groups
                    .into_iter()
                    .map(|(key, members)| {
                        let mut row = key;
                        for &(agg, col) in aggregates {
                            row.push(agg.apply(members.iter().map(|m| &m.row[col])));
                        }
                        let mut lineage: Vec<(String, u64)> = members
                            .into_iter()
                            .flat_map(|m| m.lineage)
                            .collect();
                        lineage.sort();
                        lineage.dedup();
                        LineagedRow { row, lineage }
                    })
                    .collect();
                Box::new(out.into_iter())
            }
            Phys::Count { ref input, ref cache } => {
                if cache.borrow().is_none() {
                    let mut n: u64 = 0;
                    let mut lineage = Vec::new();
                    for lr in input.to_range() {
                        n += 1;
                        lineage.extend(lr.lineage);
                    }
                    lineage.sort();
                    lineage.dedup();
                    *cache.borrow_mut() = Some(LineagedRow {
                        row: vec![Value::from(n)],
                        lineage,
                    });
                }
                let cached: Option<LineagedRow> = cache.borrow().clone();
                Box::new(cached.into_iter())
            }
        }
    }
}
