//! Typed cell values.
//!
//! Every cell of a cached table holds a [`Value`] whose variant matches the
//! declared [`ValueType`] of its column. Conversion from backend payloads and
//! comparison for sorting are total: missing data becomes the type's zero value
//! and mismatched data never panics.

use std::borrow::Cow;
use std::cmp::Ordering;
use std::fmt;

use serde::ser::{Serialize, SerializeSeq, Serializer};
use strum_macros::{AsRefStr, Display, EnumString};

/// Declared type of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumString, Display, AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum ValueType {
    /// Free text.
    String,
    /// Signed integer.
    Int,
    /// Floating point number.
    Float,
    /// Ordered list of strings (groups, contacts, ...).
    StringList,
    /// Ordered list of key/value pairs (custom variables).
    PairList,
    /// Unix timestamp in seconds.
    Time,
}

impl ValueType {
    /// Whether values of this type are compared numerically.
    pub fn is_numeric(self) -> bool {
        matches!(self, Self::Int | Self::Float | Self::Time)
    }

    /// Whether values of this type are lists.
    pub fn is_list(self) -> bool {
        matches!(self, Self::StringList | Self::PairList)
    }
}

/// A single cell value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    String(String),
    Int(i64),
    Float(f64),
    StringList(Vec<String>),
    PairList(Vec<(String, String)>),
    Time(i64),
}

impl Value {
    /// Type-appropriate empty value used for missing data.
    pub fn zero(kind: ValueType) -> Self {
        match kind {
            ValueType::String => Self::String(String::new()),
            ValueType::Int => Self::Int(0),
            ValueType::Float => Self::Float(0.0),
            ValueType::StringList => Self::StringList(Vec::new()),
            ValueType::PairList => Self::PairList(Vec::new()),
            ValueType::Time => Self::Time(0),
        }
    }

    /// The declared type this value belongs to.
    pub fn kind(&self) -> ValueType {
        match self {
            Self::String(_) => ValueType::String,
            Self::Int(_) => ValueType::Int,
            Self::Float(_) => ValueType::Float,
            Self::StringList(_) => ValueType::StringList,
            Self::PairList(_) => ValueType::PairList,
            Self::Time(_) => ValueType::Time,
        }
    }

    /// Numeric view of the value, if it has one.
    ///
    /// Strings holding a number coerce; lists never do.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(i) | Self::Time(i) => Some(*i as f64),
            Self::Float(f) if f.is_nan() => None,
            Self::Float(f) => Some(*f),
            Self::String(s) => s.trim().parse::<f64>().ok().filter(|f| !f.is_nan()),
            Self::StringList(_) | Self::PairList(_) => None,
        }
    }

    /// Textual representation as used by the csv output format.
    pub fn text(&self) -> Cow<'_, str> {
        match self {
            Self::String(s) => Cow::Borrowed(s),
            _ => Cow::Owned(self.to_string()),
        }
    }

    /// Elements of a list value as text; scalars behave like a one-element list.
    pub fn items(&self) -> Vec<Cow<'_, str>> {
        match self {
            Self::StringList(items) => items.iter().map(|s| Cow::Borrowed(s.as_str())).collect(),
            Self::PairList(pairs) => pairs
                .iter()
                .map(|(k, v)| Cow::Owned(format!("{k} {v}")))
                .collect(),
            _ => vec![self.text()],
        }
    }

    /// Whether the value is the empty value of its type.
    pub fn is_empty(&self) -> bool {
        match self {
            Self::String(s) => s.is_empty(),
            Self::StringList(items) => items.is_empty(),
            Self::PairList(pairs) => pairs.is_empty(),
            Self::Int(_) | Self::Float(_) | Self::Time(_) => false,
        }
    }

    /// Convert a backend JSON cell into a value of the declared type.
    ///
    /// `null` maps to the zero value. Returns `None` when the cell cannot be
    /// represented as `kind` at all.
    pub fn from_json(kind: ValueType, cell: &serde_json::Value) -> Option<Self> {
        use serde_json::Value as Json;

        if cell.is_null() {
            return Some(Self::zero(kind));
        }

        match kind {
            ValueType::String => match cell {
                Json::String(s) => Some(Self::String(s.clone())),
                Json::Number(n) => Some(Self::String(n.to_string())),
                Json::Bool(b) => Some(Self::String(u8::from(*b).to_string())),
                _ => None,
            },
            ValueType::Int | ValueType::Time => {
                let int = match cell {
                    Json::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
                    Json::String(s) => s
                        .trim()
                        .parse::<i64>()
                        .ok()
                        .or_else(|| s.trim().parse::<f64>().ok().map(|f| f as i64)),
                    Json::Bool(b) => Some(i64::from(*b)),
                    _ => None,
                }?;
                Some(if kind == ValueType::Time {
                    Self::Time(int)
                } else {
                    Self::Int(int)
                })
            }
            ValueType::Float => match cell {
                Json::Number(n) => n.as_f64().map(Self::Float),
                Json::String(s) => s.trim().parse::<f64>().ok().map(Self::Float),
                Json::Bool(b) => Some(Self::Float(f64::from(u8::from(*b)))),
                _ => None,
            },
            ValueType::StringList => match cell {
                Json::Array(items) => Some(Self::StringList(
                    items.iter().map(json_text).collect(),
                )),
                _ => None,
            },
            ValueType::PairList => match cell {
                Json::Object(map) => Some(Self::PairList(
                    map.iter().map(|(k, v)| (k.clone(), json_text(v))).collect(),
                )),
                Json::Array(items) => items
                    .iter()
                    .map(|item| match item.as_array().map(Vec::as_slice) {
                        Some([k, v]) => Some((json_text(k), json_text(v))),
                        _ => None,
                    })
                    .collect::<Option<Vec<_>>>()
                    .map(Self::PairList),
                _ => None,
            },
        }
    }

    /// Total ordering used by `Sort:`.
    ///
    /// Numeric values compare numerically, everything else by text. Values
    /// that cannot be compared numerically (NaN) are treated as equal.
    pub fn compare(&self, other: &Self) -> Ordering {
        if self.kind().is_numeric() && other.kind().is_numeric() {
            return match (self.as_f64(), other.as_f64()) {
                (Some(a), Some(b)) => a.partial_cmp(&b).unwrap_or(Ordering::Equal),
                (Some(_), None) => Ordering::Greater,
                (None, Some(_)) => Ordering::Less,
                (None, None) => Ordering::Equal,
            };
        }
        self.text().cmp(&other.text())
    }
}

fn json_text(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String(s) => f.write_str(s),
            Self::Int(i) | Self::Time(i) => write!(f, "{i}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::StringList(items) => f.write_str(&items.join(",")),
            Self::PairList(pairs) => {
                for (i, (k, v)) in pairs.iter().enumerate() {
                    if i > 0 {
                        f.write_str(",")?;
                    }
                    write!(f, "{k}|{v}")?;
                }
                Ok(())
            }
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::String(s) => serializer.serialize_str(s),
            Self::Int(i) | Self::Time(i) => serializer.serialize_i64(*i),
            Self::Float(v) if v.is_finite() => serializer.serialize_f64(*v),
            Self::Float(_) => serializer.serialize_none(),
            Self::StringList(items) => items.serialize(serializer),
            Self::PairList(pairs) => {
                let mut seq = serializer.serialize_seq(Some(pairs.len()))?;
                for (k, v) in pairs {
                    seq.serialize_element(&[k, v])?;
                }
                seq.end()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_from_json_null_is_zero() {
        assert_eq!(
            Value::from_json(ValueType::Int, &json!(null)),
            Some(Value::Int(0))
        );
        assert_eq!(
            Value::from_json(ValueType::StringList, &json!(null)),
            Some(Value::StringList(vec![]))
        );
    }

    #[test]
    fn test_from_json_coerces_numbers() {
        assert_eq!(
            Value::from_json(ValueType::Int, &json!("42")),
            Some(Value::Int(42))
        );
        assert_eq!(
            Value::from_json(ValueType::Time, &json!(1700000000.7)),
            Some(Value::Time(1700000000))
        );
        assert_eq!(
            Value::from_json(ValueType::String, &json!(5)),
            Some(Value::String("5".to_string()))
        );
        assert_eq!(Value::from_json(ValueType::Float, &json!([1])), None);
    }

    #[test]
    fn test_from_json_pair_list_shapes() {
        let from_object = Value::from_json(ValueType::PairList, &json!({"OWNER": "ops"}));
        let from_pairs = Value::from_json(ValueType::PairList, &json!([["OWNER", "ops"]]));
        let expected = Some(Value::PairList(vec![("OWNER".into(), "ops".into())]));
        assert_eq!(from_object, expected);
        assert_eq!(from_pairs, expected);
        assert_eq!(Value::from_json(ValueType::PairList, &json!([["x"]])), None);
    }

    #[test]
    fn test_as_f64() {
        assert_eq!(Value::Int(3).as_f64(), Some(3.0));
        assert_eq!(Value::String(" 2.5".into()).as_f64(), Some(2.5));
        assert_eq!(Value::String("test".into()).as_f64(), None);
        assert_eq!(Value::StringList(vec!["1".into()]).as_f64(), None);
        assert_eq!(Value::Float(f64::NAN).as_f64(), None);
    }

    #[test]
    fn test_display_csv_literals() {
        assert_eq!(Value::StringList(vec!["a".into(), "b".into()]).to_string(), "a,b");
        assert_eq!(
            Value::PairList(vec![("k".into(), "v".into()), ("x".into(), "y".into())]).to_string(),
            "k|v,x|y"
        );
        assert_eq!(Value::Float(1.5).to_string(), "1.5");
        assert_eq!(Value::Time(17).to_string(), "17");
    }

    #[test]
    fn test_serialize_json() {
        let row = vec![
            Value::String("a".into()),
            Value::Int(1),
            Value::PairList(vec![("k".into(), "v".into())]),
            Value::Float(f64::INFINITY),
        ];
        assert_eq!(
            serde_json::to_string(&row).unwrap(),
            r#"["a",1,[["k","v"]],null]"#
        );
    }

    #[test]
    fn test_compare() {
        assert_eq!(Value::Int(2).compare(&Value::Float(10.0)), Ordering::Less);
        assert_eq!(
            Value::String("b".into()).compare(&Value::String("a".into())),
            Ordering::Greater
        );
        assert_eq!(Value::Float(f64::NAN).compare(&Value::Int(1)), Ordering::Less);
    }

    #[test]
    fn test_value_type_names() {
        assert_eq!(ValueType::StringList.as_ref(), "string_list");
        assert_eq!("time".parse::<ValueType>().unwrap(), ValueType::Time);
    }
}
