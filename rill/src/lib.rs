//! rill is the runtime core of a distributed dataflow language in the
//! Bloom family: a program is a set of declarative rules over typed
//! collections, and each node drives its rules once per logical *tick*,
//! ships channel tuples to peers over a message bus, and can record full
//! provenance of every tuple into an external relational store.
//!
//! # A node in five steps
//!
//! ```no_run
//! use rill::prelude::*;
//!
//! let ctx = BusContext::new();
//! let mut b = Builder::new("greeter", "inproc://greeter", &ctx, NoopClient::new())?;
//!
//! // 1. Declare collections; declaration order is collection order.
//! let t = b.table("t", &[("x", Type::UnsignedBigInt)])?;
//!
//! // 2. (Optional) bootstrap rules run exactly once.
//! b.register_bootstrap_rules(vec![Rule::merge(
//!     &t,
//!     Expr::iterable("xs", vec![vec![1u64.into()]], vec![Type::UnsignedBigInt]),
//! )])?;
//!
//! // 3. Rules run on every tick.
//! b.register_rules(vec![Rule::merge(&t, t.scan().count())])?;
//!
//! // 4. Build the executor (binds the bus endpoint).
//! let mut node = b.build()?;
//!
//! // 5. Drive it.
//! node.bootstrap_tick()?;
//! node.tick()?;
//! # Ok::<(), rill::Error>(())
//! ```
//!
//! Rules come in three flavors: `Rule::merge` (`<=`) applies as soon as the
//! rule is evaluated and is visible to the rules after it in the same tick;
//! `Rule::deferred_merge` (`+=`) and `Rule::deferred_delete` (`-=`) stage
//! their effect and commit at the end of the tick. Scratches, channels, and
//! stdout are cleared as every tick ends; tables persist.

#[macro_use]
extern crate slog;

pub mod builder;
pub mod collection;
pub mod executor;
pub mod pickle;
pub mod ra;
pub mod rule;

pub use crate::builder::{Builder, CollectionHandle};
pub use crate::collection::{Collection, CollectionId};
pub use crate::executor::Executor;
pub use crate::pickle::{BincodePickler, Pickler};
pub use crate::ra::{Aggregate, Expr, LineagedRow};
pub use crate::rule::{Rule, RuleKind};

pub use rill_basics::{
    Clock, CollectionKind, Error, LogicalTime, MockClock, Result, RuleId, Type, Value,
};
pub use rill_channel::BusContext;

/// Most of what a rill program needs, in one import.
pub mod prelude {
    pub use crate::builder::{Builder, CollectionHandle};
    pub use crate::executor::Executor;
    pub use crate::ra::{Aggregate, Expr};
    pub use crate::rule::Rule;
    pub use rill_basics::{Error, Result, Type, Value};
    pub use rill_channel::BusContext;
    pub use rill_lineage::{MockClient, NoopClient};
}
