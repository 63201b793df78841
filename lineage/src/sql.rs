//! The injectable value-to-SQL family: per value type, a SQL type name and a
//! SQL literal rendering.

use rill_basics::{Type, Value};

pub trait SqlMapping {
    /// The SQL type name a column of `ty` gets in generated DDL.
    fn sql_type(&self, ty: Type) -> String;

    /// `v` rendered as a SQL literal.
    fn sql_literal(&self, v: &Value) -> String;
}

/// The default mapping, in Postgres dialect.
#[derive(Debug, Default)]
pub struct PostgresMapping;

impl SqlMapping for PostgresMapping {
    fn sql_type(&self, ty: Type) -> String {
        match ty {
            Type::Bool => "boolean",
            Type::Int => "integer",
            Type::BigInt => "bigint",
            Type::UnsignedBigInt => "bigint",
            Type::Real => "double precision",
            Type::Text => "text",
            Type::Timestamp => "timestamp with time zone",
        }
        .to_owned()
    }

    fn sql_literal(&self, v: &Value) -> String {
        match *v {
            Value::None => "NULL".to_owned(),
            Value::Bool(b) => b.to_string(),
            Value::Int(n) => n.to_string(),
            Value::BigInt(n) => n.to_string(),
            Value::UnsignedBigInt(n) => n.to_string(),
            Value::Real(..) => v.to_string(),
            Value::Text(ref s) => format!("'{}'", s.replace('\'', "''")),
            Value::Timestamp(ts) => format!("'{}'", ts.format("%Y-%m-%d %H:%M:%S")),
        }
    }
}

/// Renders each value of `row` as a SQL literal.
pub fn literals(mapping: &dyn SqlMapping, row: &[Value]) -> Vec<String> {
    row.iter().map(|v| mapping.sql_literal(v)).collect()
}
