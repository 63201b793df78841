use std::io;

/// The closed error taxonomy shared by every crate in the workspace.
///
/// Every fallible operation on the public surface returns one of these; no
/// panics cross crate boundaries for expected failures. `Network`,
/// `Serialization` and (usually) `Lineage` errors are non-fatal: the node
/// that observed them remains usable.
#[derive(Debug, Fail)]
pub enum Error {
    /// Bad connection configuration or endpoint; surfaced at construction.
    #[fail(display = "invalid configuration: {}", _0)]
    Config(String),

    /// Duplicate collection name, or a rule whose output columns do not
    /// match its target collection; surfaced by the builder.
    #[fail(display = "schema violation: {}", _0)]
    Schema(String),

    /// Bus send/receive failure; retriable.
    #[fail(display = "network error: {}", _0)]
    Network(String),

    /// Pickling, unpickling, or output-rendering failure; the offending
    /// message is dropped.
    #[fail(display = "serialization error: {}", _0)]
    Serialization(String),

    /// Lineage client failure.
    #[fail(display = "lineage error: {}", _0)]
    Lineage(String),

    /// Rule evaluation was still changing collections on the last permitted
    /// pass of a tick. The tick's effects have been rolled back.
    #[fail(display = "fixpoint did not converge after {} passes", _0)]
    Fixpoint(usize),
}

pub type Result<T> = ::std::result::Result<T, Error>;

impl Error {
    pub fn config<S: Into<String>>(msg: S) -> Error {
        Error::Config(msg.into())
    }

    pub fn schema<S: Into<String>>(msg: S) -> Error {
        Error::Schema(msg.into())
    }

    pub fn network<S: Into<String>>(msg: S) -> Error {
        Error::Network(msg.into())
    }

    pub fn serialization<S: Into<String>>(msg: S) -> Error {
        Error::Serialization(msg.into())
    }

    pub fn lineage<S: Into<String>>(msg: S) -> Error {
        Error::Lineage(msg.into())
    }
}

// Only bus send/receive paths rely on this conversion; other io call sites
// map their errors to the matching kind explicitly.
impl From<io::Error> for Error {
    fn from(e: io::Error) -> Error {
        Error::Network(e.to_string())
    }
}
