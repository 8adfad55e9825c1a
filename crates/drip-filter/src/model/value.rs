//! Condition values.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A single JSON scalar used as a condition operand.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ScalarValue {
    Bool(bool),
    Number(f64),
    Text(String),
}

impl ScalarValue {
    /// Returns the text if this is a string.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            _ => None,
        }
    }

    /// Returns the value as a number, parsing numeric strings.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(number) => Some(*number),
            Self::Text(text) => text.trim().parse().ok(),
            Self::Bool(_) => None,
        }
    }

    /// Returns the value as a boolean, accepting `"true"` / `"false"`.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(flag) => Some(*flag),
            Self::Text(text) => text.trim().parse().ok(),
            Self::Number(_) => None,
        }
    }

    /// Renders the value as text for text comparisons.
    pub fn to_text(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for ScalarValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(flag) => write!(f, "{flag}"),
            Self::Number(number) => write!(f, "{number}"),
            Self::Text(text) => f.write_str(text),
        }
    }
}

impl From<&str> for ScalarValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_owned())
    }
}

impl From<String> for ScalarValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<f64> for ScalarValue {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl From<bool> for ScalarValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

/// The `value` of a condition: a scalar or an array of scalars.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FilterValue {
    List(Vec<ScalarValue>),
    Scalar(ScalarValue),
}

impl FilterValue {
    /// Returns the scalar if this is not an array.
    pub fn as_scalar(&self) -> Option<&ScalarValue> {
        match self {
            Self::Scalar(value) => Some(value),
            Self::List(_) => None,
        }
    }

    /// Returns the elements if this is an array.
    pub fn as_list(&self) -> Option<&[ScalarValue]> {
        match self {
            Self::List(values) => Some(values),
            Self::Scalar(_) => None,
        }
    }

    /// Returns the elements of an array, or the scalar as a single element.
    pub fn elements(&self) -> &[ScalarValue] {
        match self {
            Self::List(values) => values,
            Self::Scalar(value) => std::slice::from_ref(value),
        }
    }
}

macro_rules! impl_scalar_filter_value {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for FilterValue {
                fn from(value: $ty) -> Self {
                    Self::Scalar(value.into())
                }
            }
        )*
    };
}

impl_scalar_filter_value!(ScalarValue, &str, String, f64, bool);

impl From<Vec<ScalarValue>> for FilterValue {
    fn from(values: Vec<ScalarValue>) -> Self {
        Self::List(values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_untagged_shapes() {
        let value: FilterValue = serde_json::from_str(r#"["a", 2, true]"#).unwrap();
        assert_eq!(
            value,
            FilterValue::List(vec!["a".into(), 2.0.into(), true.into()])
        );

        let value: FilterValue = serde_json::from_str("42.5").unwrap();
        assert_eq!(value.as_scalar(), Some(&ScalarValue::Number(42.5)));
    }

    #[test]
    fn test_coercions() {
        assert_eq!(ScalarValue::from(" 12 ").as_number(), Some(12.0));
        assert_eq!(ScalarValue::from("true").as_bool(), Some(true));
        assert_eq!(ScalarValue::from(3.0).to_text(), "3");
        assert_eq!(ScalarValue::from(false).as_number(), None);
    }

    #[test]
    fn test_elements() {
        let single = FilterValue::from("x");
        assert_eq!(single.elements().len(), 1);
        assert!(single.as_list().is_none());
    }
}
