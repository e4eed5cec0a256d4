use std::{
    collections::HashMap,
    io::{Read, Write},
    net::TcpStream,
};

use crate::{
    BindError, Error, MapiStream, Response, Result, Row, StatusRecord, Value, bind,
    startup::{self, Endpoint},
};

const NO_PREPARED_STATEMENT: &str = "no prepared statement with id";
/// Header of the `PREPARE` result column naming the described column,
/// `NULL` for parameter slots.
const PREPARE_COLUMN: &str = "column";
const PREPARE_TYPE: &str = "type";

#[derive(Debug, Clone)]
struct PreparedStatement {
    id: i64,
    /// Declared SQL types of the `?` placeholders, in order.
    types: Vec<String>,
}

/// Live state of an authenticated connection.
pub(crate) struct Session<S> {
    pub(crate) stream: MapiStream<S>,
    pub(crate) reply_size: usize,
    /// Set after a fatal error; the byte stream is out of sync.
    pub(crate) broken: bool,
    prepared: HashMap<String, PreparedStatement>,
}

impl<S> Session<S> {
    pub(crate) fn new(stream: S, reply_size: usize) -> Self {
        Self {
            stream: MapiStream::from_stream(stream),
            reply_size,
            broken: false,
            prepared: HashMap::new(),
        }
    }

    /// Applies the session-wide consequences of `err` before it reaches
    /// the caller. The server forgets every prepared statement when a
    /// query fails.
    pub(crate) fn observe(&mut self, err: Error) -> Error {
        if err.server_error().is_some() && !self.prepared.is_empty() {
            tracing::debug!(
                count = self.prepared.len(),
                "server error, dropping prepared statements"
            );
            self.prepared.clear();
        }
        if err.is_fatal() {
            tracing::debug!(error = %err, "connection unusable");
            self.broken = true;
        }
        err
    }
}

impl<S: Read + Write> Session<S> {
    /// Readies the stream for a new request.
    fn begin(&mut self) -> Result<()> {
        if self.broken {
            return Err(Error::ConnectionClosed);
        }
        if self.stream.has_pending_lines() {
            tracing::warn!("discarding unread rows of a previous response");
            self.stream.discard_message();
        }
        Ok(())
    }

    fn send(&mut self, put: impl FnOnce(&mut MapiStream<S>)) -> Result<()> {
        self.begin()?;
        put(&mut self.stream);
        self.stream.flush().map_err(|e| self.observe(e))
    }

    fn query(&mut self, sql: &str) -> Result<Response<'_, S>> {
        self.send(|stream| {
            stream.put_query(sql);
        })?;
        Response::read(self)
    }

    fn command(&mut self, command: &str, expect_response: bool) -> Result<Option<Response<'_, S>>> {
        self.send(|stream| {
            stream.put_command(command);
        })?;
        if !expect_response {
            return Ok(None);
        }
        Response::read(self).map(Some)
    }

    fn execute(&mut self, sql: &str, params: &[Value]) -> Result<Response<'_, S>> {
        let stmt = match self.prepared.get(sql) {
            Some(stmt) => stmt.clone(),
            None => {
                let stmt = self.prepare(sql)?;
                self.prepared.insert(sql.to_string(), stmt.clone());
                stmt
            }
        };
        let args = bind::render_all(&stmt.types, params)?;

        self.send(|stream| {
            stream.put_execute(stmt.id, &args);
        })?;
        Response::read(self).map_err(|e| match e {
            Error::Server(err) if err.message().contains(NO_PREPARED_STATEMENT) => {
                Error::PreparedStatementInvalidated(err)
            }
            e => e,
        })
    }

    fn prepare(&mut self, sql: &str) -> Result<PreparedStatement> {
        let sql = sql.trim_end_matches(|c: char| c == ';' || c.is_whitespace());
        let response = self.query(&format!("PREPARE {sql}"))?;
        let (id, types) = describe(response).map_err(|e| self.observe(e))?;

        if types.is_empty() {
            return Err(BindError::NoPlaceholders.into());
        }
        tracing::debug!(id, parameters = types.len(), "prepared statement");
        Ok(PreparedStatement { id, types })
    }
}

/// Statement id and parameter types announced by a `PREPARE` reply.
fn describe<S: Read + Write>(mut response: Response<'_, S>) -> Result<(i64, Vec<String>)> {
    let id = response
        .status_records()
        .iter()
        .find_map(StatusRecord::prepared_statement_id)
        .ok_or_else(|| Error::MalformedResponse("PREPARE returned no statement id".into()))?;

    let mut types = Vec::new();
    while let Some(row) = response.fetch()? {
        if row.is_null(PREPARE_COLUMN) {
            let ty = row.get(PREPARE_TYPE).ok_or_else(|| {
                Error::MalformedResponse("prepared statement parameter without a type".into())
            })?;
            types.push(ty.to_string());
        }
    }
    Ok((id, types))
}

/// A connection to a MonetDB server.
///
/// Requests are answered strictly in order, so at most one [`Response`]
/// can be alive per connection; open several connections to run queries
/// side by side.
///
/// ```no_run
/// use mapi_stream::{Connection, Endpoint, Value};
///
/// # fn main() -> mapi_stream::Result<()> {
/// let endpoint = Endpoint::new("monetdb").password("monetdb").database("demo");
/// let mut conn = Connection::connect(endpoint)?;
///
/// for row in conn.query("SELECT name, weight FROM cats WHERE weight > ?", &[Value::from(3.5)])? {
///     let row = row?;
///     println!("{}: {}", row.get("name").unwrap_or("?"), row.get("weight").unwrap_or("?"));
/// }
/// # Ok(())
/// # }
/// ```
pub struct Connection<S> {
    endpoint: Endpoint,
    session: Option<Session<S>>,
}

impl Connection<TcpStream> {
    /// Opens a TCP connection to the endpoint and logs in.
    pub fn connect(endpoint: Endpoint) -> Result<Self> {
        endpoint.validate()?;
        tracing::debug!(address = %endpoint.address(), "connecting");
        let stream = TcpStream::connect(endpoint.address())?;
        stream.set_nodelay(true)?;
        Self::from_stream(stream, endpoint)
    }
}

impl<S: Read + Write> Connection<S> {
    /// Logs in over an already open byte stream and configures the
    /// session: time zone and reply size.
    pub fn from_stream(stream: S, endpoint: Endpoint) -> Result<Self> {
        endpoint.validate()?;
        let mut session = Session::new(stream, endpoint.get_reply_size());
        startup::authenticate(&mut session.stream, &endpoint)?;
        tracing::debug!("authenticated");

        let mut conn = Connection {
            endpoint,
            session: Some(session),
        };
        if conn.endpoint.get_sync_time_zone() {
            let statement = startup::local_time_zone_statement();
            conn.query(&statement, &[])?.discard()?;
        }
        let reply_size = conn.endpoint.get_reply_size();
        if let Some(mut response) = conn.command(&format!("reply_size {reply_size}"), true)? {
            response.discard()?;
        }

        tracing::info!(
            host = conn.endpoint.get_host(),
            database = conn.endpoint.get_database(),
            user = conn.endpoint.get_user(),
            "session ready"
        );
        Ok(conn)
    }

    fn session(&mut self) -> Result<&mut Session<S>> {
        self.session.as_mut().ok_or(Error::ConnectionClosed)
    }

    /// Runs `sql`. Without parameters the text is sent as is and may hold
    /// several statements. With parameters it is prepared once per
    /// connection, with `?` placeholders, and executed with the rendered
    /// arguments.
    pub fn query(&mut self, sql: &str, params: &[Value]) -> Result<Response<'_, S>> {
        let session = self.session()?;
        if params.is_empty() {
            session.query(sql)
        } else {
            session.execute(sql, params)
        }
    }

    /// Runs `sql` and returns its first row, discarding the rest.
    ///
    /// ```no_run
    /// # fn demo(conn: &mut mapi_stream::Connection<std::net::TcpStream>) -> mapi_stream::Result<()> {
    /// let row = conn.query_first("SELECT COUNT(*) AS total FROM cats", &[])?;
    /// let total = row.as_ref().and_then(|r| r.get("total"));
    /// # Ok(())
    /// # }
    /// ```
    pub fn query_first(&mut self, sql: &str, params: &[Value]) -> Result<Option<Row>> {
        let mut response = self.query(sql, params)?;
        let row = response.fetch()?;
        response.discard()?;
        Ok(row)
    }

    /// Sends an administrative command, e.g. `reply_size 500`, without the
    /// `X` prefix. Commands the server does not answer must pass
    /// `expect_response = false`.
    pub fn command(
        &mut self,
        command: &str,
        expect_response: bool,
    ) -> Result<Option<Response<'_, S>>> {
        self.session()?.command(command, expect_response)
    }

    /// Releases the byte stream. Later requests fail with
    /// [`Error::ConnectionClosed`]. Closing twice is a no-op.
    pub fn close(&mut self) {
        if self.session.take().is_some() {
            tracing::debug!("connection closed");
        }
    }

    /// Closes the connection and hands back the byte stream.
    pub fn into_inner(self) -> Option<S> {
        self.session.map(|s| s.stream.into_parts().0)
    }
}

impl<S> Connection<S> {
    /// Whether the connection was closed or failed beyond repair.
    pub fn is_closed(&self) -> bool {
        self.session.as_ref().is_none_or(|s| s.broken)
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Number of statements prepared on the server for this connection.
    pub fn prepared_statement_count(&self) -> usize {
        self.session.as_ref().map_or(0, |s| s.prepared.len())
    }

    /// Forgets the cached prepared statements; they are prepared again on
    /// next use.
    pub fn clear_prepared_statements(&mut self) {
        if let Some(session) = self.session.as_mut() {
            session.prepared.clear();
        }
    }
}

impl<S> std::fmt::Debug for Connection<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("endpoint", &self.endpoint)
            .field("closed", &self.is_closed())
            .field("prepared_statements", &self.prepared_statement_count())
            .finish()
    }
}
