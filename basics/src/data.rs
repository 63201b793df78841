use chrono::NaiveDateTime;

use std::fmt;

const FLOAT_PRECISION: f64 = 1_000_000_000.0;

/// The main type used for user data throughout the runtime.
///
/// Having this be an enum allows the rest of the code to be agnostic about
/// the types of user data except where type information is specifically
/// necessary, while still letting collection schemas be checked when a
/// program is built.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Value {
    /// An empty value.
    None,
    /// A boolean value.
    Bool(bool),
    /// A 32-bit numeric value.
    Int(i32),
    /// A 64-bit numeric value.
    BigInt(i64),
    /// An unsigned 64-bit numeric value. Counts are of this type.
    UnsignedBigInt(u64),
    /// A fixed point real value. The first field is the integer part, while
    /// the second is the fractional and must be between -999999999 and
    /// 999999999.
    Real(i32, i32),
    /// A string value.
    Text(String),
    /// A timestamp for date/time values.
    Timestamp(NaiveDateTime),
}

/// The schema type of a column.
///
/// Every collection fixes one `Type` per column at declaration time, and the
/// builder checks each rule's output types against its target collection.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub enum Type {
    Bool,
    Int,
    BigInt,
    UnsignedBigInt,
    Real,
    Text,
    Timestamp,
}

/// An ordered, fixed-arity record of values.
pub type Row = Vec<Value>;

/// The behavioral variant of a collection.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub enum CollectionKind {
    /// Persistent across ticks.
    Table,
    /// Cleared at the end of every tick.
    Scratch,
    /// Contents are shipped to peers at tick end, then cleared; column 0 is
    /// the destination endpoint.
    Channel,
    /// A sink that writes each merged tuple to standard output.
    Stdout,
    /// A source producing one tuple per line of standard input.
    Stdin,
    /// A source producing one tuple per elapsed period.
    Periodic,
}

impl fmt::Display for CollectionKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            CollectionKind::Table => write!(f, "Table"),
            CollectionKind::Scratch => write!(f, "Scratch"),
            CollectionKind::Channel => write!(f, "Channel"),
            CollectionKind::Stdout => write!(f, "Stdout"),
            CollectionKind::Stdin => write!(f, "Stdin"),
            CollectionKind::Periodic => write!(f, "Periodic"),
        }
    }
}

impl Value {
    /// The schema type this value inhabits, or `None` for the null value.
    pub fn ty(&self) -> Option<Type> {
        match *self {
            Value::None => None,
            Value::Bool(..) => Some(Type::Bool),
            Value::Int(..) => Some(Type::Int),
            Value::BigInt(..) => Some(Type::BigInt),
            Value::UnsignedBigInt(..) => Some(Type::UnsignedBigInt),
            Value::Real(..) => Some(Type::Real),
            Value::Text(..) => Some(Type::Text),
            Value::Timestamp(..) => Some(Type::Timestamp),
        }
    }

    /// The text payload, if this is a `Text` value.
    pub fn as_text(&self) -> Option<&str> {
        if let Value::Text(ref s) = *self {
            Some(s)
        } else {
            None
        }
    }
}

/// True iff `row` conforms to `schema`: same arity, each value of the
/// declared type. `Value::None` conforms to any column.
pub fn conforms(row: &[Value], schema: &[Type]) -> bool {
    row.len() == schema.len()
        && row
            .iter()
            .zip(schema.iter())
            .all(|(v, t)| v.ty().map(|vt| vt == *t).unwrap_or(true))
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Type::Bool => write!(f, "bool"),
            Type::Int => write!(f, "int"),
            Type::BigInt => write!(f, "bigint"),
            Type::UnsignedBigInt => write!(f, "unsigned bigint"),
            Type::Real => write!(f, "real"),
            Type::Text => write!(f, "text"),
            Type::Timestamp => write!(f, "timestamp"),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Int(n)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::BigInt(n)
    }
}

impl From<u64> for Value {
    fn from(n: u64) -> Self {
        Value::UnsignedBigInt(n)
    }
}

impl From<usize> for Value {
    fn from(n: usize) -> Self {
        Value::UnsignedBigInt(n as u64)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        assert!(f.is_finite());

        let mut i = f.trunc() as i32;
        let mut frac = (f.fract() * FLOAT_PRECISION).round() as i32;
        if frac == 1_000_000_000 {
            i += 1;
            frac = 0;
        } else if frac == -1_000_000_000 {
            i -= 1;
            frac = 0;
        }

        Value::Real(i, frac)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl<'a> From<&'a str> for Value {
    fn from(s: &'a str) -> Self {
        Value::Text(s.to_owned())
    }
}

impl From<NaiveDateTime> for Value {
    fn from(ts: NaiveDateTime) -> Self {
        Value::Timestamp(ts)
    }
}

impl<'a> Into<i64> for &'a Value {
    fn into(self) -> i64 {
        match *self {
            Value::Int(n) => i64::from(n),
            Value::BigInt(n) => n,
            Value::UnsignedBigInt(n) => n as i64,
            _ => unreachable!("non-integer value used as integer"),
        }
    }
}

impl<'a> Into<f64> for &'a Value {
    fn into(self) -> f64 {
        match *self {
            Value::Real(i, f) => f64::from(i) + f64::from(f) / FLOAT_PRECISION,
            Value::Int(n) => f64::from(n),
            Value::BigInt(n) => n as f64,
            Value::UnsignedBigInt(n) => n as f64,
            _ => unreachable!("non-numeric value used as float"),
        }
    }
}

// Performs an arithmetic operation on two numeric Values, returning a new
// Value as the result.
macro_rules! arithmetic_operation (
    ($op:tt, $first:ident, $second:ident) => (
        match ($first, $second) {
            (&Value::None, _) | (_, &Value::None) => Value::None,
            (&Value::Int(a), &Value::Int(b)) => (a $op b).into(),
            (&Value::BigInt(a), &Value::BigInt(b)) => (a $op b).into(),
            (&Value::UnsignedBigInt(a), &Value::UnsignedBigInt(b)) => (a $op b).into(),
            (&Value::Int(a), &Value::BigInt(b)) => ((i64::from(a)) $op b).into(),
            (&Value::BigInt(a), &Value::Int(b)) => (a $op (i64::from(b))).into(),

            (first @ &Value::Int(..), second @ &Value::Real(..)) |
            (first @ &Value::BigInt(..), second @ &Value::Real(..)) |
            (first @ &Value::UnsignedBigInt(..), second @ &Value::Real(..)) |
            (first @ &Value::Real(..), second @ &Value::Int(..)) |
            (first @ &Value::Real(..), second @ &Value::BigInt(..)) |
            (first @ &Value::Real(..), second @ &Value::UnsignedBigInt(..)) |
            (first @ &Value::Real(..), second @ &Value::Real(..)) => {
                let a: f64 = first.into();
                let b: f64 = second.into();
                (a $op b).into()
            }
            (first, second) => panic!(
                "can't {} a {:?} and {:?}",
                stringify!($op),
                first,
                second,
            ),
        }
    );
);

impl<'a, 'b> std::ops::Add<&'b Value> for &'a Value {
    type Output = Value;

    fn add(self, other: &'b Value) -> Value {
        arithmetic_operation!(+, self, other)
    }
}

impl<'a, 'b> std::ops::Sub<&'b Value> for &'a Value {
    type Output = Value;

    fn sub(self, other: &'b Value) -> Value {
        arithmetic_operation!(-, self, other)
    }
}

impl<'a, 'b> std::ops::Mul<&'b Value> for &'a Value {
    type Output = Value;

    fn mul(self, other: &'b Value) -> Value {
        arithmetic_operation!(*, self, other)
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Value::None => write!(f, "None"),
            Value::Bool(b) => write!(f, "Bool({})", b),
            Value::Text(ref s) => write!(f, "Text({:?})", s),
            Value::Timestamp(ts) => write!(f, "Timestamp({:?})", ts),
            Value::Real(..) => write!(f, "Real({})", self),
            Value::Int(n) => write!(f, "Int({})", n),
            Value::BigInt(n) => write!(f, "BigInt({})", n),
            Value::UnsignedBigInt(n) => write!(f, "UnsignedBigInt({})", n),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Value::None => write!(f, "*"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Text(ref s) => write!(f, "{}", s),
            Value::Int(n) => write!(f, "{}", n),
            Value::BigInt(n) => write!(f, "{}", n),
            Value::UnsignedBigInt(n) => write!(f, "{}", n),
            Value::Real(i, frac) => {
                if i == 0 && frac < 0 {
                    // We have to insert the negative sign ourselves.
                    write!(f, "-0.{:09}", frac.abs())
                } else {
                    write!(f, "{}.{:09}", i, frac.abs())
                }
            }
            Value::Timestamp(ts) => write!(f, "{}", ts.format("%Y-%m-%d %H:%M:%S")),
        }
    }
}
