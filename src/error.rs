use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// The error type for MAPI sessions and associated I/O operations.
#[derive(Debug, Error)]
pub enum Error {
    /// The byte stream failed. The connection is unusable afterwards.
    #[error("connection to server lost: {0}")]
    ConnectionLost(#[from] std::io::Error),
    #[error("connection is closed")]
    ConnectionClosed,
    /// The server sent something the protocol does not allow here.
    #[error("invalid response from server: {0}")]
    MalformedResponse(String),
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),
    #[error("unsupported hash algorithm: {0}")]
    UnsupportedAlgorithm(String),
    #[error("authentication failed: too many redirects ({0})")]
    TooManyRedirects(usize),
    /// The server reported a query error. The session survives it, but
    /// the server has dropped all of its prepared statements.
    #[error("server error: {0}")]
    Server(ServerError),
    #[error("server error: {0} (only a single statement is permitted per prepared statement call)")]
    PreparedStatementInvalidated(ServerError),
    #[error(transparent)]
    Binding(#[from] BindError),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl Error {
    /// Whether the connection must be abandoned after this error.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::ConnectionLost(_) | Error::MalformedResponse(_))
    }

    /// The server error behind this error, if any.
    pub fn server_error(&self) -> Option<&ServerError> {
        match self {
            Error::Server(e) | Error::PreparedStatementInvalidated(e) => Some(e),
            _ => None,
        }
    }

    pub(crate) fn malformed(what: impl std::fmt::Display, line: &str) -> Self {
        Error::MalformedResponse(format!("{what}:\n{line}"))
    }
}

/// Errors raised while rendering prepared statement arguments. None of
/// them touch the wire, so the session stays usable.
#[derive(Debug, Error, PartialEq)]
pub enum BindError {
    #[error("the prepared statement declares no parameters ('?' placeholders)")]
    NoPlaceholders,
    #[error("the prepared statement expects {expected} parameters, received {received}")]
    ParameterCountMismatch { expected: usize, received: usize },
    #[error(
        "unsupported value for parameter {position}: received {received}, declared type is '{declared}'"
    )]
    UnsupportedParameterType {
        position: usize,
        received: &'static str,
        declared: String,
    },
    #[error("invalid boolean literal '{value}' for parameter {position}")]
    InvalidBooleanLiteral { position: usize, value: String },
    #[error("invalid literal '{value}' for parameter {position} of type '{declared}'")]
    InvalidLiteral {
        position: usize,
        declared: String,
        value: String,
    },
}

/// An error reported by the server through one or more `!` lines.
///
/// MonetDB usually prefixes the text with a 5 character SQLSTATE code,
/// e.g. `!42S02!SELECT: no such table 'cats'`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerError {
    code: Option<String>,
    message: String,
}

impl ServerError {
    pub(crate) fn new(line: &str) -> Self {
        let body = line.strip_prefix('!').unwrap_or(line);
        match body.split_once('!') {
            Some((code, message))
                if code.len() == 5 && code.bytes().all(|b| b.is_ascii_alphanumeric()) =>
            {
                Self {
                    code: Some(code.to_string()),
                    message: message.to_string(),
                }
            }
            _ => Self {
                code: None,
                message: body.to_string(),
            },
        }
    }

    /// Folds a follow-up `!` line into this error.
    pub(crate) fn push_line(&mut self, line: &str) {
        let next = ServerError::new(line);
        if !self.message.is_empty() {
            self.message.push('\n');
        }
        self.message.push_str(&next.message);
        if self.code.is_none() {
            self.code = next.code;
        }
    }

    pub fn code(&self) -> Option<&str> {
        self.code.as_deref()
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl std::fmt::Display for ServerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.code {
            Some(code) => write!(f, "[{code}] {}", self.message),
            None => write!(f, "{}", self.message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Error, ServerError};

    #[test]
    fn test_server_error_with_code() {
        let err = ServerError::new("!42S02!SELECT: no such table 'cats'");
        assert_eq!(Some("42S02"), err.code());
        assert_eq!("SELECT: no such table 'cats'", err.message());
        assert_eq!("[42S02] SELECT: no such table 'cats'", err.to_string());
    }

    #[test]
    fn test_server_error_without_code() {
        let err = ServerError::new("!InvalidCredentialsException:checkCredentials:invalid credentials");
        assert_eq!(None, err.code());
        assert_eq!(
            "InvalidCredentialsException:checkCredentials:invalid credentials",
            err.message()
        );
    }

    #[test]
    fn test_server_error_multiline() {
        let mut err = ServerError::new("!42000!syntax error, unexpected IDENT");
        err.push_line("!42000!in: \"selec\"");
        assert_eq!(Some("42000"), err.code());
        assert_eq!("syntax error, unexpected IDENT\nin: \"selec\"", err.message());
    }

    #[test]
    fn test_fatal_kinds() {
        assert!(Error::MalformedResponse("x".into()).is_fatal());
        assert!(Error::ConnectionLost(std::io::ErrorKind::UnexpectedEof.into()).is_fatal());
        assert!(!Error::Server(ServerError::new("!boom")).is_fatal());
    }
}
