use std::sync::Arc;

use crate::{Error, Result};

const NULL: &str = "NULL";
const FIELD_SEPARATOR: &str = ",\t";

/// One row of a result set.
///
/// Values are the exact text the server rendered, so wide integers and
/// decimals keep every digit. `NULL` is `None`.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    columns: Arc<[String]>,
    values: Vec<Option<String>>,
}

impl Row {
    pub(crate) fn new(columns: Arc<[String]>, values: Vec<Option<String>>) -> Self {
        Self { columns, values }
    }

    /// The value of the column called `name`. When several columns share
    /// the name, the last one wins.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.position(name).and_then(|i| self.get_index(i))
    }

    pub fn get_index(&self, index: usize) -> Option<&str> {
        self.values.get(index)?.as_deref()
    }

    /// Whether the column exists and holds `NULL`.
    pub fn is_null(&self, name: &str) -> bool {
        self.position(name)
            .is_some_and(|i| matches!(self.values.get(i), Some(None)))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn values(&self) -> &[Option<String>] {
        &self.values
    }

    /// `(column, value)` pairs in column order. Positional: a duplicated
    /// column name appears once per occurrence.
    pub fn iter(&self) -> impl Iterator<Item = (&str, Option<&str>)> {
        self.columns
            .iter()
            .map(String::as_str)
            .zip(self.values.iter().map(Option::as_deref))
    }

    /// The row as a name to value mapping. A duplicated name keeps the
    /// position of its first occurrence and the value of its last, the
    /// same value [`Row::get`] returns.
    pub fn named(&self) -> Vec<(&str, Option<&str>)> {
        let mut pairs: Vec<(&str, Option<&str>)> = Vec::with_capacity(self.len());
        for (name, value) in self.iter() {
            match pairs.iter_mut().find(|(seen, _)| *seen == name) {
                Some(pair) => pair.1 = value,
                None => pairs.push((name, value)),
            }
        }
        pairs
    }

    pub fn into_values(self) -> Vec<Option<String>> {
        self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.columns.iter().rposition(|c| c == name)
    }
}

/// Splits a tuple line, `[ 1,\t"a\\tb",\tNULL\t]`, into its fields.
pub fn parse_tuple(line: &str) -> Result<Vec<Option<String>>> {
    let body = line
        .strip_prefix('[')
        .and_then(|rest| rest.strip_suffix(']'))
        .ok_or_else(|| Error::malformed("broken tuple line", line))?;
    let body = body.strip_prefix(' ').unwrap_or(body);
    let body = body.strip_suffix('\t').unwrap_or(body);

    body.split(FIELD_SEPARATOR)
        .map(|field| parse_field(field, line))
        .collect()
}

fn parse_field(field: &str, line: &str) -> Result<Option<String>> {
    if field == NULL {
        return Ok(None);
    }
    if !field.starts_with('"') {
        return Ok(Some(field.to_string()));
    }
    let quoted = field
        .get(1..field.len() - 1)
        .filter(|_| field.len() >= 2 && field.ends_with('"'))
        .ok_or_else(|| Error::malformed("unterminated string field", line))?;
    unescape(quoted).map(Some)
}

/// Decodes the backslash escapes the server uses inside quoted strings.
///
/// Works on bytes so that octal escapes may produce any byte; the result
/// must still be valid UTF-8. Unknown escapes yield the escaped
/// character itself.
pub fn unescape(s: &str) -> Result<String> {
    if !s.contains('\\') {
        return Ok(s.to_string());
    }

    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        i += 1;
        if b != b'\\' || i == bytes.len() {
            out.push(b);
            continue;
        }

        let c = bytes[i];
        i += 1;
        match c {
            b'n' => out.push(b'\n'),
            b't' => out.push(b'\t'),
            b'r' => out.push(b'\r'),
            b'a' => out.push(0x07),
            b'b' => out.push(0x08),
            b'f' => out.push(0x0C),
            b'v' => out.push(0x0B),
            b'0'..=b'7' => {
                let mut value = u32::from(c - b'0');
                let mut digits = 1;
                while digits < 3 && i < bytes.len() && matches!(bytes[i], b'0'..=b'7') {
                    value = value * 8 + u32::from(bytes[i] - b'0');
                    i += 1;
                    digits += 1;
                }
                let byte = u8::try_from(value).map_err(|_| {
                    Error::MalformedResponse(format!("octal escape out of range: {s}"))
                })?;
                out.push(byte);
            }
            b'x' if i < bytes.len() && bytes[i].is_ascii_hexdigit() => {
                let mut value = 0u8;
                let mut digits = 0;
                while digits < 2 && i < bytes.len() && bytes[i].is_ascii_hexdigit() {
                    value = value * 16 + (bytes[i] as char).to_digit(16).unwrap_or(0) as u8;
                    i += 1;
                    digits += 1;
                }
                out.push(value);
            }
            other => out.push(other),
        }
    }

    String::from_utf8(out).map_err(|_| {
        Error::MalformedResponse(format!("escaped string is not valid UTF-8: {s}"))
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::{Row, parse_tuple, unescape};
    use crate::Error;

    #[test]
    fn test_parse_tuple() {
        let values = parse_tuple("[ 1,\t\"cat\",\tNULL,\t-0.25\t]").unwrap();
        assert_eq!(
            vec![
                Some("1".to_string()),
                Some("cat".to_string()),
                None,
                Some("-0.25".to_string())
            ],
            values
        );
    }

    #[test]
    fn test_parse_tuple_exact_numbers() {
        let values = parse_tuple(
            "[ 170141183460469231731687303715884105727,\t1234567890123456789012345678.9012345678\t]",
        )
        .unwrap();
        assert_eq!(
            Some("170141183460469231731687303715884105727"),
            values[0].as_deref()
        );
        assert_eq!(
            Some("1234567890123456789012345678.9012345678"),
            values[1].as_deref()
        );
    }

    #[test]
    fn test_parse_tuple_quoted_null() {
        let values = parse_tuple("[ \"NULL\",\t\"\"\t]").unwrap();
        assert_eq!(Some("NULL"), values[0].as_deref());
        assert_eq!(Some(""), values[1].as_deref());
    }

    #[test]
    fn test_parse_tuple_rejects() {
        assert!(matches!(
            parse_tuple("[ 1,\t2").unwrap_err(),
            Error::MalformedResponse(_)
        ));
        assert!(matches!(
            parse_tuple("[ \"open\t]").unwrap_err(),
            Error::MalformedResponse(_)
        ));
    }

    #[test]
    fn test_unescape() {
        assert_eq!(
            "a\\b'c\"d\re\nf\tg\0h\x1Ai",
            unescape(r#"a\\b\'c\"d\re\nf\tg\000h\032i"#).unwrap()
        );
        assert_eq!("\0", unescape(r"\0").unwrap());
        assert_eq!("é", unescape(r"\303\251").unwrap());
        assert_eq!("q", unescape(r"\q").unwrap());
        assert_eq!("trailing\\", unescape("trailing\\").unwrap());
        assert_eq!("日本語", unescape("日本語").unwrap());
    }

    #[test]
    fn test_unescape_invalid_utf8() {
        assert!(matches!(
            unescape(r"\377").unwrap_err(),
            Error::MalformedResponse(_)
        ));
    }

    #[test]
    fn test_unescape_octal_out_of_range() {
        assert!(matches!(
            unescape(r"a\400b").unwrap_err(),
            Error::MalformedResponse(_)
        ));
        assert_eq!("a\u{7f}b", unescape(r"a\177b").unwrap());
    }

    #[test]
    fn test_row_accessors() {
        let columns: Arc<[String]> = vec!["id".to_string(), "name".into(), "id".into()].into();
        let row = Row::new(
            columns,
            vec![Some("1".into()), None, Some("2".into())],
        );

        assert_eq!(Some("2"), row.get("id"));
        assert_eq!(Some("1"), row.get_index(0));
        assert_eq!(None, row.get("name"));
        assert!(row.is_null("name"));
        assert!(!row.is_null("id"));
        assert!(!row.is_null("missing"));
        assert!(!row.contains("missing"));
        assert_eq!(3, row.len());

        let pairs: Vec<_> = row.iter().collect();
        assert_eq!(3, pairs.len());
        assert_eq!(("name", None), pairs[1]);
        assert_eq!(vec![("id", Some("2")), ("name", None)], row.named());
        assert_eq!(vec![Some("1".to_string()), None, Some("2".to_string())], row.into_values());
    }
}
