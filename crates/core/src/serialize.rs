//! Plain Interchange Form of Values
//!
//! The erased [`Value`] container holds arbitrary registered types,
//! including handles into process-wide tables, which makes it
//! unsuitable for direct serialization. `PlainValue` is the owned,
//! serializable mirror of the scalar / array / dictionary subset used
//! for debug dumps and exchange with external systems.
//!
//! # Why BTreeMap?
//!
//! `PlainValue::Map` uses `BTreeMap` so that the same logical
//! dictionary always serializes to identical bytes. Serialization is
//! not a hot path; deterministic output is worth the ordered insert.

use crate::array::Array;
use crate::dictionary::Dictionary;
use crate::token::Token;
use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Error during conversion to or from the interchange form.
#[derive(Debug)]
pub enum InterchangeError {
    /// The value's type has no interchange representation.
    Unrepresentable(&'static str),
    /// Non-finite float (NaN or Infinity).
    NonFiniteFloat(f64),
    /// An unsigned value exceeding the signed interchange range.
    IntegerOverflow(u64),
    /// JSON encoding/decoding error.
    Json(serde_json::Error),
}

impl fmt::Display for InterchangeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InterchangeError::Unrepresentable(ty) => {
                write!(f, "value of type {ty} has no interchange form")
            }
            InterchangeError::NonFiniteFloat(v) => {
                write!(f, "cannot serialize non-finite float: {v}")
            }
            InterchangeError::IntegerOverflow(v) => {
                write!(f, "unsigned value {v} exceeds interchange range")
            }
            InterchangeError::Json(e) => write!(f, "JSON error: {e}"),
        }
    }
}

impl std::error::Error for InterchangeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            InterchangeError::Json(e) => Some(e),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for InterchangeError {
    fn from(e: serde_json::Error) -> Self {
        InterchangeError::Json(e)
    }
}

/// Owned, serializable mirror of the basic value types.
///
/// Tokens flatten to strings; integer widths flatten to `i64`; float
/// widths flatten to `f64`. Round trips through `PlainValue` preserve
/// logical content, not the exact held type.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum PlainValue {
    Bool(bool),
    Int(i64),
    Double(f64),
    String(String),
    BoolArray(Vec<bool>),
    IntArray(Vec<i64>),
    DoubleArray(Vec<f64>),
    StringArray(Vec<String>),
    Map(BTreeMap<String, PlainValue>),
}

impl PlainValue {
    /// Convert from an erased value.
    ///
    /// Fails for unregistered or non-interchangeable held types and
    /// for non-finite floats.
    pub fn from_value(value: &Value) -> Result<PlainValue, InterchangeError> {
        if let Some(v) = value.get::<bool>() {
            return Ok(PlainValue::Bool(*v));
        }
        if let Some(v) = value.get::<i32>() {
            return Ok(PlainValue::Int(*v as i64));
        }
        if let Some(v) = value.get::<i64>() {
            return Ok(PlainValue::Int(*v));
        }
        if let Some(v) = value.get::<u32>() {
            return Ok(PlainValue::Int(*v as i64));
        }
        if let Some(v) = value.get::<u64>() {
            let n = i64::try_from(*v).map_err(|_| InterchangeError::IntegerOverflow(*v))?;
            return Ok(PlainValue::Int(n));
        }
        if let Some(v) = value.get::<f32>() {
            return float_plain(*v as f64);
        }
        if let Some(v) = value.get::<f64>() {
            return float_plain(*v);
        }
        if let Some(v) = value.get::<String>() {
            return Ok(PlainValue::String(v.clone()));
        }
        if let Some(v) = value.get::<Token>() {
            return Ok(PlainValue::String(v.as_str().to_string()));
        }
        if let Some(v) = value.get::<Array<bool>>() {
            return Ok(PlainValue::BoolArray(v.to_vec()));
        }
        if let Some(v) = value.get::<Array<i32>>() {
            return Ok(PlainValue::IntArray(v.iter().map(|x| *x as i64).collect()));
        }
        if let Some(v) = value.get::<Array<i64>>() {
            return Ok(PlainValue::IntArray(v.to_vec()));
        }
        if let Some(v) = value.get::<Array<f32>>() {
            let mut out = Vec::with_capacity(v.len());
            for x in v {
                out.push(finite(*x as f64)?);
            }
            return Ok(PlainValue::DoubleArray(out));
        }
        if let Some(v) = value.get::<Array<f64>>() {
            let mut out = Vec::with_capacity(v.len());
            for x in v {
                out.push(finite(*x)?);
            }
            return Ok(PlainValue::DoubleArray(out));
        }
        if let Some(v) = value.get::<Array<String>>() {
            return Ok(PlainValue::StringArray(v.to_vec()));
        }
        if let Some(v) = value.get::<Array<Token>>() {
            return Ok(PlainValue::StringArray(
                v.iter().map(|t| t.as_str().to_string()).collect(),
            ));
        }
        if let Some(v) = value.get::<Dictionary>() {
            return Self::from_dictionary(v).map(PlainValue::Map);
        }
        Err(InterchangeError::Unrepresentable(value.type_name()))
    }

    fn from_dictionary(
        dict: &Dictionary,
    ) -> Result<BTreeMap<String, PlainValue>, InterchangeError> {
        let mut out = BTreeMap::new();
        for (k, v) in dict.iter() {
            out.insert(k.clone(), PlainValue::from_value(v)?);
        }
        Ok(out)
    }

    /// Convert to an erased value. Maps become dictionaries; integers
    /// become `i64`; floats become `f64`.
    pub fn to_value(&self) -> Value {
        match self {
            PlainValue::Bool(v) => Value::new(*v),
            PlainValue::Int(v) => Value::new(*v),
            PlainValue::Double(v) => Value::new(*v),
            PlainValue::String(v) => Value::new(v.clone()),
            PlainValue::BoolArray(v) => Value::new(Array::from_vec(v.clone())),
            PlainValue::IntArray(v) => Value::new(Array::from_vec(v.clone())),
            PlainValue::DoubleArray(v) => Value::new(Array::from_vec(v.clone())),
            PlainValue::StringArray(v) => Value::new(Array::from_vec(v.clone())),
            PlainValue::Map(m) => {
                let mut d = Dictionary::new();
                for (k, v) in m {
                    d.insert(k.clone(), v.to_value());
                }
                Value::new(d)
            }
        }
    }

    /// Serialize to a JSON string.
    pub fn to_json(&self) -> Result<String, InterchangeError> {
        serde_json::to_string(self).map_err(InterchangeError::from)
    }

    /// Deserialize from a JSON string.
    pub fn from_json(s: &str) -> Result<PlainValue, InterchangeError> {
        serde_json::from_str(s).map_err(InterchangeError::from)
    }
}

fn finite(v: f64) -> Result<f64, InterchangeError> {
    if v.is_finite() {
        Ok(v)
    } else {
        Err(InterchangeError::NonFiniteFloat(v))
    }
}

fn float_plain(v: f64) -> Result<PlainValue, InterchangeError> {
    finite(v).map(PlainValue::Double)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalar_roundtrip() {
        for v in [
            Value::new(true),
            Value::new(42i64),
            Value::new(2.5f64),
            Value::new(String::from("hello")),
        ] {
            let plain = PlainValue::from_value(&v).unwrap();
            assert_eq!(plain.to_value(), v);
        }
    }

    #[test]
    fn test_widths_flatten() {
        let plain = PlainValue::from_value(&Value::new(7i32)).unwrap();
        assert_eq!(plain, PlainValue::Int(7));
        let plain = PlainValue::from_value(&Value::new(1.5f32)).unwrap();
        assert_eq!(plain, PlainValue::Double(1.5));
    }

    #[test]
    fn test_token_flattens_to_string() {
        let plain = PlainValue::from_value(&Value::new(Token::new("t"))).unwrap();
        assert_eq!(plain, PlainValue::String("t".into()));
    }

    #[test]
    fn test_dictionary_roundtrip() {
        let mut inner = Dictionary::new();
        inner.insert("x", Value::new(1i64));
        let mut d = Dictionary::new();
        d.insert("inner", Value::new(inner));
        d.insert("flag", Value::new(false));

        let plain = PlainValue::from_value(&Value::new(d.clone())).unwrap();
        let back = plain.to_value();
        assert_eq!(back.get::<Dictionary>().unwrap(), &d);
    }

    #[test]
    fn test_array_roundtrip() {
        let v = Value::new(Array::from(vec![1.0f64, 2.0, 3.0]));
        let plain = PlainValue::from_value(&v).unwrap();
        assert_eq!(plain, PlainValue::DoubleArray(vec![1.0, 2.0, 3.0]));
        assert_eq!(plain.to_value(), v);
    }

    #[test]
    fn test_nan_rejected() {
        let result = PlainValue::from_value(&Value::new(f64::NAN));
        assert!(matches!(result, Err(InterchangeError::NonFiniteFloat(_))));
    }

    #[test]
    fn test_u64_overflow_rejected() {
        let result = PlainValue::from_value(&Value::new(u64::MAX));
        assert!(matches!(result, Err(InterchangeError::IntegerOverflow(_))));
    }

    #[test]
    fn test_json_roundtrip() {
        let mut m = BTreeMap::new();
        m.insert("k".to_string(), PlainValue::Int(3));
        m.insert(
            "list".to_string(),
            PlainValue::DoubleArray(vec![1.0, 2.0]),
        );
        let plain = PlainValue::Map(m);
        let json = plain.to_json().unwrap();
        assert_eq!(PlainValue::from_json(&json).unwrap(), plain);
    }

    #[test]
    fn test_corrupt_json_is_error() {
        assert!(PlainValue::from_json("{not json").is_err());
    }
}
