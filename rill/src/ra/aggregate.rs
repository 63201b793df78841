//! The aggregate functions a `GroupBy` can fold over a column.

use rill_basics::{Error, Result, Type, Value};

/// Supported aggregation operators.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Aggregate {
    /// The number of rows in each group. The aggregated column is ignored.
    Count,
    /// The sum of the aggregated column across each group.
    Sum,
    /// The least value of the aggregated column in each group.
    Min,
    /// The greatest value of the aggregated column in each group.
    Max,
}

impl Aggregate {
    pub(crate) fn name(self) -> &'static str {
        match self {
            Aggregate::Count => "Count",
            Aggregate::Sum => "Sum",
            Aggregate::Min => "Min",
            Aggregate::Max => "Max",
        }
    }

    /// The column type this aggregate produces over an input column of
    /// type `input`.
    pub fn output_type(self, input: Type) -> Result<Type> {
        match self {
            Aggregate::Count => Ok(Type::UnsignedBigInt),
            Aggregate::Sum => match input {
                Type::Int | Type::BigInt | Type::UnsignedBigInt | Type::Real => Ok(input),
                other => Err(Error::schema(format!(
                    "cannot sum a column of type {}",
                    other
                ))),
            },
            Aggregate::Min | Aggregate::Max => Ok(input),
        }
    }

    /// Folds the aggregate over the values of one group's aggregated column.
    pub(crate) fn apply<'a, I>(self, values: I) -> Value
    where
        I: Iterator<Item = &'a Value>,
    {
        match self {
            Aggregate::Count => Value::from(values.count()),
            Aggregate::Sum => values
                .fold(None, |acc: Option<Value>, v| match acc {
                    None => Some(v.clone()),
                    Some(acc) => Some(&acc + v),
                })
                .unwrap_or(Value::None),
            Aggregate::Min => values.min().cloned().unwrap_or(Value::None),
            Aggregate::Max => values.max().cloned().unwrap_or(Value::None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vals(ns: &[i32]) -> Vec<Value> {
        ns.iter().map(|&n| Value::from(n)).collect()
    }

    #[test]
    fn count_ignores_values() {
        let vs = vals(&[5, 5, 7]);
        assert_eq!(Aggregate::Count.apply(vs.iter()), Value::from(3usize));
    }

    #[test]
    fn sum_adds() {
        let vs = vals(&[1, 2, 3]);
        assert_eq!(Aggregate::Sum.apply(vs.iter()), Value::from(6));
    }

    #[test]
    fn min_and_max() {
        let vs = vals(&[4, -1, 9]);
        assert_eq!(Aggregate::Min.apply(vs.iter()), Value::from(-1));
        assert_eq!(Aggregate::Max.apply(vs.iter()), Value::from(9));
    }

    #[test]
    fn min_works_on_text() {
        let vs = vec![Value::from("pear"), Value::from("apple")];
        assert_eq!(Aggregate::Min.apply(vs.iter()), Value::from("apple"));
    }

    #[test]
    fn output_types() {
        assert_eq!(
            Aggregate::Count.output_type(Type::Text).unwrap(),
            Type::UnsignedBigInt
        );
        assert_eq!(Aggregate::Sum.output_type(Type::Int).unwrap(), Type::Int);
        assert!(Aggregate::Sum.output_type(Type::Text).is_err());
        assert_eq!(Aggregate::Max.output_type(Type::Text).unwrap(), Type::Text);
    }
}
