use std::io::{Read, Write};

use chrono::{FixedOffset, Local};

use crate::{Error, MapiStream, Result, ServerError, messages::backend::MessageCode};

mod challenge;
mod hash;

pub use challenge::{Backend, ServerChallenge};
pub use hash::HashAlgorithm;

pub const DEFAULT_HOST: &str = "localhost";
pub const DEFAULT_PORT: u16 = 50000;
pub const DEFAULT_REPLY_SIZE: usize = 200;
/// Smallest page size the server will honour.
pub const MIN_REPLY_SIZE: usize = 10;
/// Merovingian redirects followed before the login is abandoned.
pub const MAX_REDIRECTS: usize = 10;

const MEROVINGIAN_REDIRECT: &str = "^mapi:merovingian:";

/// Where and how to log into a MonetDB server.
///
/// ```
/// use mapi_stream::Endpoint;
///
/// let endpoint = Endpoint::new("monetdb")
///     .password("monetdb")
///     .database("demo")
///     .reply_size(1000);
/// assert_eq!("localhost:50000", endpoint.address());
/// ```
#[derive(Clone)]
pub struct Endpoint {
    host: String,
    port: u16,
    user: String,
    password: String,
    database: String,
    hash_algorithm: HashAlgorithm,
    sync_time_zone: bool,
    reply_size: usize,
}

impl Endpoint {
    /// Creates an endpoint for `user` on `localhost:50000`.
    ///
    /// The database defaults to the user name and passwords are salted
    /// with SHA512.
    pub fn new(user: impl Into<String>) -> Self {
        let user = user.into();
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            database: user.clone(),
            user,
            password: String::new(),
            hash_algorithm: HashAlgorithm::Sha512,
            sync_time_zone: true,
            reply_size: DEFAULT_REPLY_SIZE,
        }
    }

    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn user(mut self, user: impl Into<String>) -> Self {
        self.user = user.into();
        self
    }

    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = password.into();
        self
    }

    pub fn database(mut self, database: impl Into<String>) -> Self {
        self.database = database.into();
        self
    }

    /// Sets the algorithm used to salt the password hash. The server
    /// must advertise it in its challenge.
    pub fn hash_algorithm(mut self, algorithm: HashAlgorithm) -> Self {
        self.hash_algorithm = algorithm;
        self
    }

    /// Whether to set the session time zone to the local UTC offset
    /// after logging in.
    pub fn sync_time_zone(mut self, sync: bool) -> Self {
        self.sync_time_zone = sync;
        self
    }

    /// Sets the maximum number of rows the server sends per response
    /// window. Larger results are fetched in pages of this size.
    pub fn reply_size(mut self, rows: usize) -> Self {
        self.reply_size = rows;
        self
    }

    pub fn get_host(&self) -> &str {
        &self.host
    }

    pub fn get_port(&self) -> u16 {
        self.port
    }

    pub fn get_user(&self) -> &str {
        &self.user
    }

    pub fn get_database(&self) -> &str {
        &self.database
    }

    pub fn get_hash_algorithm(&self) -> HashAlgorithm {
        self.hash_algorithm
    }

    pub fn get_sync_time_zone(&self) -> bool {
        self.sync_time_zone
    }

    pub fn get_reply_size(&self) -> usize {
        self.reply_size
    }

    /// `host:port`, as accepted by `TcpStream::connect`.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.reply_size < MIN_REPLY_SIZE {
            return Err(Error::InvalidConfig(format!(
                "reply size must be at least {MIN_REPLY_SIZE}, got {}",
                self.reply_size
            )));
        }
        if self.user.is_empty() {
            return Err(Error::InvalidConfig("user name is empty".into()));
        }
        Ok(())
    }
}

impl std::fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Endpoint")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("database", &self.database)
            .field("hash_algorithm", &self.hash_algorithm)
            .field("sync_time_zone", &self.sync_time_zone)
            .field("reply_size", &self.reply_size)
            .finish()
    }
}

/// Runs the login handshake on a freshly opened stream.
///
/// Merovingian answers with a redirect to itself once it has forwarded
/// the connection to the database process, which then issues a fresh
/// challenge.
pub(crate) fn authenticate<S: Read + Write>(
    stream: &mut MapiStream<S>,
    endpoint: &Endpoint,
) -> Result<()> {
    let mut redirects = 0;
    loop {
        stream.read_message()?;
        let line = stream.next_line()?.unwrap_or_default().to_string();
        let challenge = ServerChallenge::parse(&line)?;
        tracing::debug!(
            backend = ?challenge.backend(),
            version = challenge.version(),
            "received server challenge"
        );

        let login = challenge.login_line(
            &endpoint.user,
            &endpoint.password,
            &endpoint.database,
            endpoint.hash_algorithm,
        )?;
        tracing::debug!(
            user = endpoint.user.as_str(),
            database = endpoint.database.as_str(),
            "sending login"
        );
        stream.put_raw(login).flush()?;

        stream.read_message()?;
        let reply = stream.next_line()?.unwrap_or_default().to_string();
        match reply.as_bytes().first().map(|b| MessageCode::from(*b)) {
            None => return Ok(()),
            Some(MessageCode::INFO) => {
                let mut err = ServerError::new(&reply);
                while let Some(next) = stream.next_line()? {
                    if next.starts_with('!') {
                        err.push_line(next);
                    }
                }
                return Err(Error::AuthenticationFailed(err.to_string()));
            }
            Some(MessageCode::REDIRECT) if reply.starts_with(MEROVINGIAN_REDIRECT) => {
                redirects += 1;
                if redirects > MAX_REDIRECTS {
                    return Err(Error::TooManyRedirects(MAX_REDIRECTS));
                }
                tracing::warn!(redirects, "redirected by merovingian, logging in again");
            }
            Some(MessageCode::REDIRECT) => {
                return Err(Error::AuthenticationFailed(format!(
                    "redirect to '{}' is not supported",
                    &reply[1..]
                )));
            }
            Some(_) => return Err(Error::malformed("unexpected response to login", &reply)),
        }
    }
}

/// The statement aligning the session time zone with `offset`.
pub(crate) fn time_zone_statement(offset: FixedOffset) -> String {
    let seconds = offset.local_minus_utc();
    let sign = if seconds < 0 { '-' } else { '+' };
    let minutes = seconds.unsigned_abs() / 60;
    format!(
        "SET TIME ZONE INTERVAL '{sign}{:02}:{:02}' HOUR TO MINUTE",
        minutes / 60,
        minutes % 60
    )
}

pub(crate) fn local_time_zone_statement() -> String {
    time_zone_statement(*Local::now().offset())
}

#[cfg(test)]
mod tests {
    use chrono::FixedOffset;

    use super::{Endpoint, HashAlgorithm, authenticate, time_zone_statement};
    use crate::{Error, MapiStream, testing::Script};

    const CHALLENGE: &str = "s4ltS4lt:mserver:9:SHA1,SHA512:LIT:SHA512:\n";

    fn endpoint() -> Endpoint {
        Endpoint::new("monetdb").password("monetdb").database("demo")
    }

    #[test]
    fn test_defaults() {
        let endpoint = Endpoint::new("alice");
        assert_eq!("localhost", endpoint.get_host());
        assert_eq!(50000, endpoint.get_port());
        assert_eq!("alice", endpoint.get_database());
        assert_eq!(HashAlgorithm::Sha512, endpoint.get_hash_algorithm());
        assert!(endpoint.get_sync_time_zone());
        assert_eq!(200, endpoint.get_reply_size());
        assert!(endpoint.validate().is_ok());
    }

    #[test]
    fn test_reply_size_too_small() {
        let err = Endpoint::new("alice").reply_size(9).validate().unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(_)));
    }

    #[test]
    fn test_debug_hides_password() {
        let out = format!("{:?}", Endpoint::new("alice").password("hunter2"));
        assert!(!out.contains("hunter2"));
    }

    #[test]
    fn test_authenticate() {
        let mut stream = MapiStream::from_stream(Script::new(&[CHALLENGE, ""]));
        authenticate(&mut stream, &endpoint()).unwrap();

        let (script, _) = stream.into_parts();
        let sent = &script.sent()[0];
        assert!(sent.starts_with("LIT:monetdb:{SHA512}"));
        assert!(sent.ends_with(":sql:demo:\n"));
    }

    #[test]
    fn test_authenticate_merovingian_redirect() {
        let mut stream = MapiStream::from_stream(Script::new(&[
            "s4ltS4lt:merovingian:9:SHA512:LIT:SHA512:\n",
            "^mapi:merovingian://proxy?database=demo\n",
            CHALLENGE,
            "",
        ]));
        authenticate(&mut stream, &endpoint()).unwrap();
    }

    #[test]
    fn test_authenticate_too_many_redirects() {
        let mut messages = Vec::new();
        for _ in 0..11 {
            messages.push(CHALLENGE);
            messages.push("^mapi:merovingian://proxy?database=demo\n");
        }
        let mut stream = MapiStream::from_stream(Script::new(&messages));
        let err = authenticate(&mut stream, &endpoint()).unwrap_err();
        assert!(matches!(err, Error::TooManyRedirects(10)));
    }

    #[test]
    fn test_authenticate_invalid_credentials() {
        let mut stream = MapiStream::from_stream(Script::new(&[
            CHALLENGE,
            "!InvalidCredentialsException:checkCredentials:invalid credentials for user 'monetdb'\n",
        ]));
        let err = authenticate(&mut stream, &endpoint()).unwrap_err();
        assert!(matches!(err, Error::AuthenticationFailed(msg) if msg.contains("invalid credentials")));
    }

    #[test]
    fn test_authenticate_foreign_redirect() {
        let mut stream = MapiStream::from_stream(Script::new(&[
            CHALLENGE,
            "^mapi:monetdb://elsewhere:50001/demo\n",
        ]));
        let err = authenticate(&mut stream, &endpoint()).unwrap_err();
        assert!(matches!(err, Error::AuthenticationFailed(msg) if msg.contains("elsewhere")));
    }

    #[test]
    fn test_authenticate_unexpected() {
        let mut stream = MapiStream::from_stream(Script::new(&[CHALLENGE, "&3 1 2\n"]));
        let err = authenticate(&mut stream, &endpoint()).unwrap_err();
        assert!(matches!(err, Error::MalformedResponse(_)));
    }

    #[test]
    fn test_time_zone_statement() {
        let east = FixedOffset::east_opt(5 * 3600 + 30 * 60).unwrap();
        assert_eq!(
            "SET TIME ZONE INTERVAL '+05:30' HOUR TO MINUTE",
            time_zone_statement(east)
        );
        let west = FixedOffset::west_opt(3 * 3600).unwrap();
        assert_eq!(
            "SET TIME ZONE INTERVAL '-03:00' HOUR TO MINUTE",
            time_zone_statement(west)
        );
    }
}
