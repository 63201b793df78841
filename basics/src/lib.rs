//! Foundational types shared by every crate in the rill workspace: the
//! dynamic value model, the error taxonomy, and the injectable clock and
//! hash collaborators.

#[macro_use]
extern crate failure;
#[macro_use]
extern crate serde_derive;

pub mod clock;
pub mod data;
pub mod error;
pub mod hash;
pub mod strings;

pub use crate::clock::{Clock, MockClock, SharedClock, SystemClock};
pub use crate::data::{conforms, CollectionKind, Row, Type, Value};
pub use crate::error::{Error, Result};
pub use crate::hash::{node_id, FnvRowHash, RowHash, SharedRowHash};
pub use crate::strings::crunch_whitespace;

/// Logical time at a node: a counter of completed ticks, starting at 0.
pub type LogicalTime = u64;

/// The id assigned to a rule, in declaration order.
pub type RuleId = usize;
