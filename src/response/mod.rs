//! Parsing of the server's replies into status records and rows.

use std::{
    io::{Read, Write},
    sync::Arc,
};

use crate::{
    Error, Result, ServerError,
    connection::Session,
    messages::backend::{MessageCode, QueryKind},
};

mod row;
mod status;

pub use row::{Row, parse_tuple, unescape};
pub use status::{ColumnInfo, StatusKind, StatusRecord};

const HEADER_TABLE_NAME: &str = "table_name";
const HEADER_NAME: &str = "name";
const HEADER_TYPE: &str = "type";
const HEADER_LENGTH: &str = "length";

/// Position of the result set whose rows this response yields.
#[derive(Debug)]
struct TableCursor {
    id: i64,
    total: u64,
    consumed: u64,
    last_export: Option<u64>,
}

/// The reply to one request.
///
/// Rows are decoded lazily while iterating; results larger than the
/// connection's reply size are fetched page by page behind the scenes.
/// Only the first result set of a batch yields rows, status records of
/// the other statements are still collected.
///
/// A response borrows its connection mutably, so a second request can
/// only be issued once it is gone:
///
/// ```compile_fail
/// # fn demo(conn: &mut mapi_stream::Connection<std::net::TcpStream>) -> mapi_stream::Result<()> {
/// let first = conn.query("SELECT 1", &[])?;
/// let second = conn.query("SELECT 2", &[])?;
/// drop(first);
/// # Ok(())
/// # }
/// ```
///
/// Unread rows of a dropped response are thrown away before the next
/// request is sent.
pub struct Response<'c, S> {
    session: &'c mut Session<S>,
    status_records: Vec<StatusRecord>,
    columns: Arc<[String]>,
    column_info: Vec<ColumnInfo>,
    table: Option<TableCursor>,
    /// Whether tuple lines currently belong to the tracked result set.
    active: bool,
    draining: bool,
    lookahead: Option<Row>,
    row_index: usize,
    discarded: bool,
}

impl<S> std::fmt::Debug for Response<'_, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Response")
            .field("status_records", &self.status_records)
            .field("columns", &self.columns)
            .field("table", &self.table)
            .field("row_index", &self.row_index)
            .field("discarded", &self.discarded)
            .finish()
    }
}

impl<'c, S: Read + Write> Response<'c, S> {
    /// Reads the reply to the request just sent, up to and including the
    /// first row.
    pub(crate) fn read(session: &'c mut Session<S>) -> Result<Self> {
        let mut response = Response {
            session,
            status_records: Vec::new(),
            columns: Arc::from(Vec::new()),
            column_info: Vec::new(),
            table: None,
            active: false,
            draining: false,
            lookahead: None,
            row_index: 0,
            discarded: false,
        };

        let first = response
            .session
            .stream
            .read_message()
            .and_then(|_| response.next_row());
        match first {
            Ok(row) => {
                response.lookahead = row;
                Ok(response)
            }
            Err(e) => Err(response.session.observe(e)),
        }
    }

    /// Returns the next row, or `None` once the result set is exhausted.
    pub fn fetch(&mut self) -> Result<Option<Row>> {
        if let Some(row) = self.lookahead.take() {
            self.row_index += 1;
            return Ok(Some(row));
        }
        match self.next_row() {
            Ok(Some(row)) => {
                self.row_index += 1;
                Ok(Some(row))
            }
            Ok(None) => Ok(None),
            Err(e) => {
                self.discarded = true;
                Err(self.session.observe(e))
            }
        }
    }

    /// Skips the remaining rows. Status records still buffered are
    /// collected, no further pages are requested.
    pub fn discard(&mut self) -> Result<()> {
        if self.discarded {
            return Ok(());
        }
        self.lookahead = None;
        self.draining = true;
        let result = self.next_row();
        self.discarded = true;
        match result {
            Ok(_) => Ok(()),
            Err(e) => Err(self.session.observe(e)),
        }
    }

    /// Parses lines until the next row of the tracked result set.
    fn next_row(&mut self) -> Result<Option<Row>> {
        while !self.discarded {
            let Some(line) = self.session.stream.next_line()? else {
                if !self.request_next_page()? {
                    self.discarded = true;
                }
                continue;
            };
            let Some(&marker) = line.as_bytes().first() else {
                continue;
            };

            match MessageCode::from(marker) {
                MessageCode::TUPLE => {
                    if !self.active || self.draining {
                        continue;
                    }
                    let values = parse_tuple(line)?;
                    if values.len() != self.columns.len() {
                        return Err(Error::MalformedResponse(format!(
                            "tuple has {} fields, the result set has {} columns",
                            values.len(),
                            self.columns.len()
                        )));
                    }
                    if let Some(table) = self.table.as_mut() {
                        table.consumed += 1;
                    }
                    return Ok(Some(Row::new(Arc::clone(&self.columns), values)));
                }
                MessageCode::QUERY => {
                    let kind = QueryKind::from(line.as_bytes().get(1).copied().unwrap_or_default());
                    let record = StatusRecord::parse(kind, line)?;
                    self.on_status(record)?;
                }
                MessageCode::INFO => {
                    let mut err = ServerError::new(line);
                    while let Some(next) = self.session.stream.next_line()? {
                        if next.starts_with('!') {
                            err.push_line(next);
                        }
                    }
                    self.discarded = true;
                    return Err(Error::Server(err));
                }
                _ => return Err(Error::malformed("unexpected line in response", line)),
            }
        }
        Ok(None)
    }

    fn on_status(&mut self, record: StatusRecord) -> Result<()> {
        match record.kind() {
            StatusKind::Table | StatusKind::PreparedStatement => {
                let info = self.read_headers(&record)?;
                if self.table.is_none() {
                    self.table = Some(TableCursor {
                        id: record
                            .result_id()
                            .or(record.prepared_statement_id())
                            .unwrap_or_default(),
                        total: record.total_row_count().unwrap_or_default(),
                        consumed: 0,
                        last_export: None,
                    });
                    self.columns = info.iter().map(|c| c.column_name().to_string()).collect();
                    self.column_info = info;
                    self.active = true;
                } else {
                    tracing::debug!(
                        result_id = ?record.result_id(),
                        "ignoring rows of additional result set"
                    );
                    self.active = false;
                }
            }
            StatusKind::Block => {
                self.active = self
                    .table
                    .as_ref()
                    .is_some_and(|t| Some(t.id) == record.result_id());
            }
            _ => {}
        }
        self.status_records.push(record);
        Ok(())
    }

    /// Reads the four `%` lines following a result set header.
    fn read_headers(&mut self, record: &StatusRecord) -> Result<Vec<ColumnInfo>> {
        let tables = self.read_header(HEADER_TABLE_NAME)?;
        let names = self.read_header(HEADER_NAME)?;
        let types = self.read_header(HEADER_TYPE)?;
        let lengths = self.read_header(HEADER_LENGTH)?;

        let columns = record.column_count().unwrap_or(names.len());
        if [&tables, &names, &types, &lengths]
            .iter()
            .any(|h| h.len() != columns)
        {
            return Err(Error::MalformedResponse(format!(
                "result set header does not describe {columns} columns"
            )));
        }

        tables
            .into_iter()
            .zip(names)
            .zip(types)
            .zip(lengths)
            .map(|(((table, name), type_name), length)| {
                let length = length.parse().map_err(|_| {
                    Error::MalformedResponse(format!("invalid column length '{length}'"))
                })?;
                Ok(ColumnInfo::new(table, name, type_name, length))
            })
            .collect()
    }

    /// `% a,\tb # label`
    fn read_header(&mut self, label: &str) -> Result<Vec<String>> {
        let line = self.session.stream.next_line()?.ok_or_else(|| {
            Error::MalformedResponse(format!("response ended before the '{label}' header"))
        })?;
        let fields = line
            .strip_prefix('%')
            .and_then(|rest| rest.strip_suffix(label))
            .and_then(|rest| rest.strip_suffix(" # "))
            .ok_or_else(|| {
                Error::malformed(format_args!("expected the '{label}' header line"), line)
            })?;
        let fields = fields.strip_prefix(' ').unwrap_or(fields);
        Ok(fields.split(",\t").map(str::to_string).collect())
    }

    /// Asks the server for the next window of the tracked result set.
    /// Returns false when there is nothing left to fetch.
    fn request_next_page(&mut self) -> Result<bool> {
        if self.draining {
            return Ok(false);
        }
        let Some(table) = self.table.as_mut() else {
            return Ok(false);
        };
        if table.consumed >= table.total {
            return Ok(false);
        }
        if table.last_export == Some(table.consumed) {
            return Err(Error::MalformedResponse(format!(
                "export of result set {} returned no rows at offset {}",
                table.id, table.consumed
            )));
        }

        let count = (table.total - table.consumed).min(self.session.reply_size as u64);
        table.last_export = Some(table.consumed);
        let command = format!("export {} {} {count}", table.id, table.consumed);

        self.active = false;
        let stream = &mut self.session.stream;
        stream.put_command(command).flush()?;
        stream.read_message()?;
        Ok(true)
    }
}

impl<S> Response<'_, S> {
    /// Whether every row has been read or the rest was thrown away.
    pub fn is_discarded(&self) -> bool {
        self.discarded && self.lookahead.is_none()
    }

    /// Names of the columns of the result set, in order.
    pub fn column_names(&self) -> &[String] {
        &self.columns
    }

    pub fn column_info(&self) -> &[ColumnInfo] {
        &self.column_info
    }

    /// One record per statement seen so far, plus one per continuation
    /// block.
    pub fn status_records(&self) -> &[StatusRecord] {
        &self.status_records
    }

    /// Number of rows fetched so far.
    pub fn row_index(&self) -> usize {
        self.row_index
    }
}

impl<S: Read + Write> Iterator for Response<'_, S> {
    type Item = Result<Row>;

    fn next(&mut self) -> Option<Self::Item> {
        self.fetch().transpose()
    }
}
