//! The relational algebra rules are written in.
//!
//! Queries are two-level trees. The *logical* tree ([`Expr`]) is what a
//! program builds: it knows its output column types (checked against the
//! target collection when a rule is registered) and its canonical string
//! form (recorded as rule text by lineage). Each tick, every rule's logical
//! tree is lowered against the node's current collection state into a
//! *physical* tree of lazy, restartable iterator pipelines which is then
//! drained once; see [`physical`].

pub mod aggregate;
pub mod physical;

use std::fmt;

use rill_basics::{Error, Result, Row, Type, Value};

pub use self::aggregate::Aggregate;
pub use self::physical::{EvalContext, LineagedRow, Phys};

use crate::collection::CollectionId;

/// The function a `Map` applies to each row.
pub type MapFn = Box<dyn Fn(&[Value]) -> Row + Send>;
/// The predicate a `Filter` applies to each row.
pub type FilterFn = Box<dyn Fn(&[Value]) -> bool + Send>;

/// A logical query over a node's collections.
pub enum Expr {
    /// Reads a collection's current tuples.
    Scan {
        id: CollectionId,
        name: String,
        schema: Vec<Type>,
    },
    /// A named, externally supplied row set (used by bootstrap rules).
    Iterable {
        name: String,
        rows: Vec<Row>,
        schema: Vec<Type>,
    },
    /// Applies a pure function to every row. The function must produce rows
    /// of the declared schema.
    Map {
        input: Box<Expr>,
        schema: Vec<Type>,
        f: MapFn,
    },
    /// Keeps the rows a pure predicate accepts.
    Filter { input: Box<Expr>, p: FilterFn },
    /// Keeps the named columns, in the given order.
    Project {
        input: Box<Expr>,
        columns: Vec<usize>,
    },
    /// The Cartesian product of two inputs.
    Cross { left: Box<Expr>, right: Box<Expr> },
    /// Equijoin on `left_on` = `right_on`; output rows are the left columns
    /// followed by the right columns.
    HashJoin {
        left: Box<Expr>,
        right: Box<Expr>,
        left_on: Vec<usize>,
        right_on: Vec<usize>,
    },
    /// Partitions on the key columns and folds one aggregate per listed
    /// `(aggregate, column)` pair; output rows are the keys followed by the
    /// aggregate results, in declaration order.
    GroupBy {
        input: Box<Expr>,
        keys: Vec<usize>,
        aggregates: Vec<(Aggregate, usize)>,
    },
    /// A single row holding the number of input rows.
    Count { input: Box<Expr> },
}

impl Expr {
    pub fn iterable(name: &str, rows: Vec<Row>, schema: Vec<Type>) -> Expr {
        Expr::Iterable {
            name: name.to_owned(),
            rows,
            schema,
        }
    }

    pub fn map<F>(self, schema: Vec<Type>, f: F) -> Expr
    where
        F: Fn(&[Value]) -> Row + Send + 'static,
    {
        Expr::Map {
            input: Box::new(self),
            schema,
            f: Box::new(f),
        }
    }

    pub fn filter<F>(self, p: F) -> Expr
    where
        F: Fn(&[Value]) -> bool + Send + 'static,
    {
        Expr::Filter {
            input: Box::new(self),
            p: Box::new(p),
        }
    }

    pub fn project(self, columns: Vec<usize>) -> Expr {
        Expr::Project {
            input: Box::new(self),
            columns,
        }
    }

    pub fn cross(self, right: Expr) -> Expr {
        Expr::Cross {
            left: Box::new(self),
            right: Box::new(right),
        }
    }

    pub fn hash_join(self, right: Expr, left_on: Vec<usize>, right_on: Vec<usize>) -> Expr {
        Expr::HashJoin {
            left: Box::new(self),
            right: Box::new(right),
            left_on,
            right_on,
        }
    }

    pub fn group_by(self, keys: Vec<usize>, aggregates: Vec<(Aggregate, usize)>) -> Expr {
        Expr::GroupBy {
            input: Box::new(self),
            keys,
            aggregates,
        }
    }

    pub fn count(self) -> Expr {
        Expr::Count {
            input: Box::new(self),
        }
    }

    /// The output column types of this query, or the schema error that makes
    /// it ill-formed.
    pub fn column_types(&self) -> Result<Vec<Type>> {
        match *self {
            Expr::Scan { ref schema, .. } | Expr::Iterable { ref schema, .. } => {
                Ok(schema.clone())
            }
            Expr::Map { ref schema, ref input, .. } => {
                input.column_types()?;
                Ok(schema.clone())
            }
            Expr::Filter { ref input, .. } => input.column_types(),
            Expr::Project {
                ref input,
                ref columns,
            } => {
                let input = input.column_types()?;
                columns
                    .iter()
                    .map(|&i| {
                        input.get(i).cloned().ok_or_else(|| {
                            Error::schema(format!(
                                "projected column {} of {}-column input",
                                i,
                                input.len()
                            ))
                        })
                    })
                    .collect()
            }
            Expr::Cross {
                ref left,
                ref right,
            } => {
                let mut types = left.column_types()?;
                types.extend(right.column_types()?);
                Ok(types)
            }
            Expr::HashJoin {
                ref left,
                ref right,
                ref left_on,
                ref right_on,
            } => {
                let lt = left.column_types()?;
                let rt = right.column_types()?;
                if left_on.len() != right_on.len() {
                    return Err(Error::schema(format!(
                        "join key arity mismatch: {} vs {}",
                        left_on.len(),
                        right_on.len()
                    )));
                }
                for (&l, &r) in left_on.iter().zip(right_on.iter()) {
                    let lty = lt.get(l).ok_or_else(|| {
                        Error::schema(format!("join key {} of {}-column input", l, lt.len()))
                    })?;
                    let rty = rt.get(r).ok_or_else(|| {
                        Error::schema(format!("join key {} of {}-column input", r, rt.len()))
                    })?;
                    if lty != rty {
                        return Err(Error::schema(format!(
                            "join keys {} and {} have types {} and {}",
                            l, r, lty, rty
                        )));
                    }
                }
                let mut types = lt;
                types.extend(rt);
                Ok(types)
            }
            Expr::GroupBy {
                ref input,
                ref keys,
                ref aggregates,
            } => {
                let input = input.column_types()?;
                let mut types = Vec::with_capacity(keys.len() + aggregates.len());
                for &k in keys {
                    types.push(input.get(k).cloned().ok_or_else(|| {
                        Error::schema(format!(
                            "group key {} of {}-column input",
                            k,
                            input.len()
                        ))
                    })?);
                }
                for &(agg, col) in aggregates {
                    let col_ty = input.get(col).cloned().ok_or_else(|| {
                        Error::schema(format!(
                            "aggregate column {} of {}-column input",
                            col,
                            input.len()
                        ))
                    })?;
                    types.push(agg.output_type(col_ty)?);
                }
                Ok(types)
            }
            Expr::Count { ref input } => {
                input.column_types()?;
                Ok(vec![Type::UnsignedBigInt])
            }
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Expr::Scan { ref name, .. } | Expr::Iterable { ref name, .. } => {
                write!(f, "{}", name)
            }
            Expr::Map { ref input, .. } => write!(f, "Map({})", input),
            Expr::Filter { ref input, .. } => write!(f, "Filter({})", input),
            Expr::Project {
                ref input,
                ref columns,
            } => write!(f, "Project({:?}, {})", columns, input),
            Expr::Cross {
                ref left,
                ref right,
            } => write!(f, "Cross({}, {})", left, right),
            Expr::HashJoin {
                ref left,
                ref right,
                ref left_on,
                ref right_on,
            } => write!(
                f,
                "HashJoin({:?}, {:?}, {}, {})",
                left_on, right_on, left, right
            ),
            Expr::GroupBy {
                ref input,
                ref keys,
                ref aggregates,
            } => {
                let aggregates = aggregates
                    .iter()
                    .map(|&(agg, col)| format!("{}({})", agg.name(), col))
                    .collect::<Vec<_>>()
                    .join(", ");
                write!(f, "GroupBy({:?}, [{}], {})", keys, aggregates, input)
            }
            Expr::Count { ref input } => write!(f, "Count({})", input),
        }
    }
}
