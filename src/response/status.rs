use std::str::FromStr;

use crate::{Error, Result, messages::backend::QueryKind};

/// The outcome of one statement, taken from a `&` line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusKind {
    /// A result set header (`&1`).
    Table,
    /// A further window of an already announced result set (`&6`).
    Block,
    /// DDL or another statement that only reports timings (`&3`).
    Schema,
    /// INSERT, UPDATE, DELETE and friends (`&2`).
    Update,
    /// The auto-commit mode changed (`&4`).
    Transaction,
    /// A prepared statement was created (`&5`).
    PreparedStatement,
}

impl StatusKind {
    pub fn name(self) -> &'static str {
        match self {
            StatusKind::Table => "table",
            StatusKind::Block => "block",
            StatusKind::Schema => "schema",
            StatusKind::Update => "update",
            StatusKind::Transaction => "transaction",
            StatusKind::PreparedStatement => "prepared_statement",
        }
    }
}

impl std::fmt::Display for StatusKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Statistics and identifiers the server reports for a statement.
///
/// Only the fields meaningful for the record's [`StatusKind`] are set.
/// Timings are in milliseconds.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusRecord {
    kind: StatusKind,
    result_id: Option<i64>,
    query_id: Option<i64>,
    last_insert_id: Option<i64>,
    query_time: Option<f64>,
    sql_optimizer_time: Option<f64>,
    mal_optimizer_time: Option<f64>,
    affected_rows: Option<i64>,
    total_row_count: Option<u64>,
    row_count: Option<u64>,
    prepared_statement_id: Option<i64>,
    auto_commit: Option<bool>,
    column_count: Option<usize>,
    export_offset: Option<u64>,
}

/// Space separated fields following the two marker characters. Later
/// protocol versions append fields, so only a shortage is an error.
struct Fields<'a> {
    line: &'a str,
    parts: Vec<&'a str>,
}

impl<'a> Fields<'a> {
    fn new(line: &'a str, expected: usize) -> Result<Self> {
        let parts: Vec<&str> = line.get(2..).unwrap_or_default().split_whitespace().collect();
        if parts.len() < expected {
            return Err(Error::malformed(
                format_args!(
                    "status line has {} fields, at least {expected} expected",
                    parts.len()
                ),
                line,
            ));
        }
        Ok(Self { line, parts })
    }

    fn get<T: FromStr>(&self, index: usize) -> Result<T> {
        self.parts[index]
            .parse()
            .map_err(|_| Error::malformed(format_args!("invalid status field {index}"), self.line))
    }

    /// Microseconds on the wire, milliseconds in the record.
    fn millis(&self, index: usize) -> Result<f64> {
        Ok(self.get::<f64>(index)? / 1000.0)
    }
}

impl StatusRecord {
    fn empty(kind: StatusKind) -> Self {
        Self {
            kind,
            result_id: None,
            query_id: None,
            last_insert_id: None,
            query_time: None,
            sql_optimizer_time: None,
            mal_optimizer_time: None,
            affected_rows: None,
            total_row_count: None,
            row_count: None,
            prepared_statement_id: None,
            auto_commit: None,
            column_count: None,
            export_offset: None,
        }
    }

    pub(crate) fn parse(kind: QueryKind, line: &str) -> Result<Self> {
        let record = match kind {
            QueryKind::TABLE => {
                let f = Fields::new(line, 8)?;
                Self {
                    result_id: Some(f.get(0)?),
                    total_row_count: Some(f.get(1)?),
                    column_count: Some(f.get(2)?),
                    row_count: Some(f.get(3)?),
                    query_id: Some(f.get(4)?),
                    query_time: Some(f.millis(5)?),
                    mal_optimizer_time: Some(f.millis(6)?),
                    sql_optimizer_time: Some(f.millis(7)?),
                    ..Self::empty(StatusKind::Table)
                }
            }
            QueryKind::BLOCK => {
                let f = Fields::new(line, 4)?;
                Self {
                    result_id: Some(f.get(0)?),
                    column_count: Some(f.get(1)?),
                    row_count: Some(f.get(2)?),
                    export_offset: Some(f.get(3)?),
                    ..Self::empty(StatusKind::Block)
                }
            }
            QueryKind::SCHEMA => {
                let f = Fields::new(line, 2)?;
                Self {
                    query_time: Some(f.millis(0)?),
                    mal_optimizer_time: Some(f.millis(1)?),
                    ..Self::empty(StatusKind::Schema)
                }
            }
            QueryKind::UPDATE => {
                let f = Fields::new(line, 6)?;
                let last_insert_id: i64 = f.get(1)?;
                Self {
                    affected_rows: Some(f.get(0)?),
                    last_insert_id: (last_insert_id >= 0).then_some(last_insert_id),
                    query_id: Some(f.get(2)?),
                    query_time: Some(f.millis(3)?),
                    mal_optimizer_time: Some(f.millis(4)?),
                    sql_optimizer_time: Some(f.millis(5)?),
                    ..Self::empty(StatusKind::Update)
                }
            }
            QueryKind::TRANSACTION => {
                let f = Fields::new(line, 1)?;
                Self {
                    auto_commit: Some(f.parts[0] != "f"),
                    ..Self::empty(StatusKind::Transaction)
                }
            }
            QueryKind::PREPARE => {
                let f = Fields::new(line, 4)?;
                Self {
                    prepared_statement_id: Some(f.get(0)?),
                    total_row_count: Some(f.get(1)?),
                    column_count: Some(f.get(2)?),
                    row_count: Some(f.get(3)?),
                    ..Self::empty(StatusKind::PreparedStatement)
                }
            }
            _ => return Err(Error::malformed("unknown query response", line)),
        };
        Ok(record)
    }

    pub fn kind(&self) -> StatusKind {
        self.kind
    }

    /// A short human readable summary of the kind of outcome.
    pub fn description(&self) -> &'static str {
        match self.kind {
            StatusKind::Table => "Data response",
            StatusKind::Block => "Continue a data response",
            StatusKind::Schema => "Stats only (schema)",
            StatusKind::Update => "Update or insert rows",
            StatusKind::Transaction if self.auto_commit == Some(false) => "Transaction started",
            StatusKind::Transaction => "Transaction ended",
            StatusKind::PreparedStatement => "A prepared statement has been created",
        }
    }

    /// Identifies the result set on the server, used to page through it.
    pub fn result_id(&self) -> Option<i64> {
        self.result_id
    }

    pub fn query_id(&self) -> Option<i64> {
        self.query_id
    }

    /// The generated key of the last inserted row, when there is one.
    pub fn last_insert_id(&self) -> Option<i64> {
        self.last_insert_id
    }

    pub fn query_time(&self) -> Option<f64> {
        self.query_time
    }

    pub fn sql_optimizer_time(&self) -> Option<f64> {
        self.sql_optimizer_time
    }

    pub fn mal_optimizer_time(&self) -> Option<f64> {
        self.mal_optimizer_time
    }

    pub fn affected_rows(&self) -> Option<i64> {
        self.affected_rows
    }

    /// Rows in the whole result set.
    pub fn total_row_count(&self) -> Option<u64> {
        self.total_row_count
    }

    /// Rows delivered with this response window.
    pub fn row_count(&self) -> Option<u64> {
        self.row_count
    }

    pub fn prepared_statement_id(&self) -> Option<i64> {
        self.prepared_statement_id
    }

    pub fn auto_commit(&self) -> Option<bool> {
        self.auto_commit
    }

    pub fn column_count(&self) -> Option<usize> {
        self.column_count
    }

    /// Index of the first row of a continuation block.
    pub fn export_offset(&self) -> Option<u64> {
        self.export_offset
    }
}

impl std::fmt::Display for StatusRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Action: {}", self.description())?;
        if let Some(v) = self.query_id {
            write!(f, "\nQuery ID (global): {v}")?;
        }
        if let Some(v) = self.result_id {
            write!(f, "\nResult ID: {v}")?;
        }
        if let Some(v) = self.last_insert_id {
            write!(f, "\nLast insert ID: {v}")?;
        }
        if let Some(v) = self.query_time {
            write!(f, "\nQuery time: {v} ms")?;
        }
        if let Some(v) = self.sql_optimizer_time {
            write!(f, "\nSQL optimizer time: {v} ms")?;
        }
        if let Some(v) = self.mal_optimizer_time {
            write!(f, "\nMAL optimizer time: {v} ms")?;
        }
        if let Some(v) = self.affected_rows {
            write!(f, "\nAffected rows: {v}")?;
        }
        if let Some(v) = self.total_row_count {
            write!(f, "\nTotal rows: {v}")?;
        }
        if let Some(v) = self.row_count {
            write!(f, "\nRows in current response: {v}")?;
        }
        if let Some(v) = self.column_count {
            write!(f, "\nColumn count: {v}")?;
        }
        if let Some(v) = self.auto_commit {
            write!(f, "\nAuto-commit state: {v}")?;
        }
        if let Some(v) = self.prepared_statement_id {
            write!(f, "\nPrepared statement ID: {v}")?;
        }
        if let Some(v) = self.export_offset {
            write!(f, "\nExport offset: {v}")?;
        }
        Ok(())
    }
}

/// Describes one column of a result set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnInfo {
    table_name: String,
    column_name: String,
    type_name: String,
    length: usize,
}

impl ColumnInfo {
    pub(crate) fn new(
        table_name: String,
        column_name: String,
        type_name: String,
        length: usize,
    ) -> Self {
        Self {
            table_name,
            column_name,
            type_name,
            length,
        }
    }

    /// The table the column comes from, or a generated name for
    /// computed columns.
    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    pub fn column_name(&self) -> &str {
        &self.column_name
    }

    /// The SQL type, e.g. `varchar` or `decimal`.
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// Display width the server suggests for the column.
    pub fn length(&self) -> usize {
        self.length
    }
}
