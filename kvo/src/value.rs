use std::collections::BTreeSet;

/// A dynamically typed attribute value
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    Null,
    String(String),
    Integer(i64),
    Float(f64),
    Boolean(bool),
    List(Vec<Value>),
}

impl Value {
    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            _ => None,
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self { Value::String(value.to_string()) }
}
impl From<String> for Value {
    fn from(value: String) -> Self { Value::String(value) }
}
impl From<i64> for Value {
    fn from(value: i64) -> Self { Value::Integer(value) }
}
impl From<i32> for Value {
    fn from(value: i32) -> Self { Value::Integer(value as i64) }
}
impl From<f64> for Value {
    fn from(value: f64) -> Self { Value::Float(value) }
}
impl From<bool> for Value {
    fn from(value: bool) -> Self { Value::Boolean(value) }
}
impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(values: Vec<T>) -> Self { Value::List(values.into_iter().map(Into::into).collect()) }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::String(s) => write!(f, "{s:?}"),
            Value::Integer(i) => write!(f, "{i}"),
            Value::Float(x) => write!(f, "{x}"),
            Value::Boolean(b) => write!(f, "{b}"),
            Value::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    /// The whole value was replaced
    Set,
    /// Elements were inserted into a list-valued attribute
    Insertion,
    /// Elements were removed from a list-valued attribute
    Removal,
    /// Elements of a list-valued attribute were replaced in place
    Replacement,
}

/// Describes a single change to an attribute.
/// For list mutations `old_value`/`new_value` hold the affected elements only, in index order.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeRecord {
    pub kind: ChangeKind,
    pub old_value: Option<Value>,
    pub new_value: Option<Value>,
    pub indexes: Option<BTreeSet<usize>>,
    /// True for the notification sent before the change is applied
    pub is_prior: bool,
}

impl ChangeRecord {
    pub fn set(old_value: Option<Value>, new_value: Option<Value>) -> Self {
        Self { kind: ChangeKind::Set, old_value, new_value, indexes: None, is_prior: false }
    }
}
