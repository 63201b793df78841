//! The injectable tuple codec used by channels.
//!
//! Pickling must be a pure function from rows to bytes, with unpickling its
//! left inverse for well-typed inputs; beyond that the executor does not
//! care. The default speaks bincode.

use rill_basics::{conforms, Error, Result, Row, Type, Value};

pub trait Pickler {
    fn pickle(&self, row: &[Value]) -> Result<Vec<u8>>;

    /// Decodes `bytes` into a row of the given schema. Arity or type
    /// mismatches are serialization errors; the caller drops the message.
    fn unpickle(&self, bytes: &[u8], schema: &[Type]) -> Result<Row>;
}

#[derive(Debug, Default)]
pub struct BincodePickler;

impl Pickler for BincodePickler {
    fn pickle(&self, row: &[Value]) -> Result<Vec<u8>> {
        bincode::serialize(row).map_err(|e| Error::serialization(e.to_string()))
    }

    fn unpickle(&self, bytes: &[u8], schema: &[Type]) -> Result<Row> {
        let row: Row =
            bincode::deserialize(bytes).map_err(|e| Error::serialization(e.to_string()))?;
        if !conforms(&row, schema) {
            return Err(Error::serialization(format!(
                "decoded row {:?} does not conform to schema {:?}",
                row, schema
            )));
        }
        Ok(row)
    }
}
