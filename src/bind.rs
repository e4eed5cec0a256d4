//! Rendering of prepared statement arguments into SQL literals.

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};

use crate::BindError;

const TRUE_TOKENS: [&str; 5] = ["1", "true", "yes", "t", "enabled"];
const FALSE_TOKENS: [&str; 5] = ["0", "false", "no", "f", "disabled"];

/// A prepared statement argument.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    /// Text is coerced to the declared type of the parameter, so
    /// `"12345678901234567890.5"` can feed a `decimal` without loss.
    Text(String),
    DateTime(NaiveDateTime),
}

impl Value {
    /// Name of the variant, used in error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Text(_) => "text",
            Value::DateTime(_) => "datetime",
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

macro_rules! impl_from_int {
    ($($t:ty),*) => {
        $(
            impl From<$t> for Value {
                fn from(value: $t) -> Self {
                    Value::Int(i64::from(value))
                }
            }
        )*
    };
}

impl_from_int!(i8, i16, i32, i64, u8, u16, u32);

impl From<f32> for Value {
    fn from(value: f32) -> Self {
        Value::Float(f64::from(value))
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Text(value)
    }
}

impl From<NaiveDateTime> for Value {
    fn from(value: NaiveDateTime) -> Self {
        Value::DateTime(value)
    }
}

impl From<NaiveDate> for Value {
    fn from(value: NaiveDate) -> Self {
        Value::DateTime(value.and_time(NaiveTime::MIN))
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Value::Null, Into::into)
    }
}

/// Escapes `s` for use inside a single quoted SQL string literal.
///
/// ```
/// assert_eq!(r"it\'s\n", mapi_stream::escape("it's\n"));
/// ```
pub fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\'' => out.push_str("\\'"),
            '\r' => out.push_str("\\r"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\0' => out.push_str("\\000"),
            '\x1A' => out.push_str("\\032"),
            c => out.push(c),
        }
    }
    out
}

/// Escapes `s` and wraps it in single quotes.
pub fn quote(s: &str) -> String {
    format!("'{}'", escape(s))
}

/// How a declared parameter type wants its literal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SqlType {
    Character,
    Exact,
    Integer,
    Float,
    Boolean,
    Timestamp,
    Date,
    Time,
    Blob,
    Other,
}

impl SqlType {
    fn classify(declared: &str) -> Self {
        match declared.trim().to_ascii_lowercase().as_str() {
            "char" | "character" | "varchar" | "clob" | "text" | "string" => SqlType::Character,
            "hugeint" | "decimal" | "numeric" => SqlType::Exact,
            "tinyint" | "smallint" | "int" | "integer" | "bigint" | "oid" => SqlType::Integer,
            "real" | "float" | "double" | "double precision" => SqlType::Float,
            "boolean" | "bool" => SqlType::Boolean,
            "timestamp" | "timestamptz" => SqlType::Timestamp,
            "date" => SqlType::Date,
            "time" | "timetz" => SqlType::Time,
            "blob" => SqlType::Blob,
            _ => SqlType::Other,
        }
    }
}

/// Renders `value` as a literal for a parameter declared as `declared`.
/// `position` is 1-based.
pub(crate) fn render(position: usize, declared: &str, value: &Value) -> Result<String, BindError> {
    let ty = SqlType::classify(declared);
    let invalid = |value: &str| BindError::InvalidLiteral {
        position,
        declared: declared.to_string(),
        value: value.to_string(),
    };

    let literal = match value {
        Value::Null => "NULL".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Int(i) if ty == SqlType::Boolean => (*i != 0).to_string(),
        Value::Int(i) => i.to_string(),
        Value::Float(f) if !f.is_finite() => return Err(invalid(&f.to_string())),
        Value::Float(f) if ty == SqlType::Boolean => (*f != 0.0).to_string(),
        Value::Float(f) => f.to_string(),
        Value::DateTime(dt) => match ty {
            SqlType::Date => format!("DATE '{}'", dt.format("%Y-%m-%d")),
            SqlType::Timestamp => format!("TIMESTAMP '{}'", dt.format("%Y-%m-%d %H:%M:%S%.6f")),
            SqlType::Time => format!("TIME '{}'", dt.format("%H:%M:%S")),
            _ => {
                return Err(BindError::UnsupportedParameterType {
                    position,
                    received: value.type_name(),
                    declared: declared.to_string(),
                });
            }
        },
        Value::Text(s) => match ty {
            SqlType::Exact => {
                let digits: String = s
                    .chars()
                    .filter(|c| c.is_ascii_digit() || matches!(c, '-' | '+' | '.' | 'e' | 'E'))
                    .collect();
                if digits.is_empty() {
                    return Err(invalid(s.as_str()));
                }
                digits
            }
            SqlType::Integer => s
                .trim()
                .parse::<i64>()
                .map_err(|_| invalid(s.as_str()))?
                .to_string(),
            SqlType::Float => s
                .trim()
                .parse::<f64>()
                .ok()
                .filter(|f| f.is_finite())
                .ok_or_else(|| invalid(s.as_str()))?
                .to_string(),
            SqlType::Boolean => {
                let token = s.trim().to_ascii_lowercase();
                if TRUE_TOKENS.contains(&token.as_str()) {
                    "true".to_string()
                } else if FALSE_TOKENS.contains(&token.as_str()) {
                    "false".to_string()
                } else {
                    return Err(BindError::InvalidBooleanLiteral {
                        position,
                        value: s.clone(),
                    });
                }
            }
            SqlType::Timestamp => format!("TIMESTAMP {}", quote(s)),
            SqlType::Time => {
                let time: String = s
                    .chars()
                    .filter(|c| c.is_ascii_digit() || *c == ':')
                    .collect();
                format!("time '{time}'")
            }
            SqlType::Blob => {
                let hex: String = s.chars().filter(char::is_ascii_hexdigit).collect();
                format!("x'{hex}'")
            }
            SqlType::Character | SqlType::Date | SqlType::Other => quote(s),
        },
    };
    Ok(literal)
}

/// Renders every argument against the declared parameter types and
/// joins them for an `EXECUTE` call.
pub(crate) fn render_all(declared: &[String], params: &[Value]) -> Result<String, BindError> {
    if declared.len() != params.len() {
        return Err(BindError::ParameterCountMismatch {
            expected: declared.len(),
            received: params.len(),
        });
    }

    let literals = declared
        .iter()
        .zip(params)
        .enumerate()
        .map(|(i, (ty, value))| render(i + 1, ty, value))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(literals.join(", "))
}
