//! Blocking client for the MonetDB MAPI protocol.
//!
//! [`Connection`] is the entry point; [`MapiStream`] and
//! [`MapiStreamProto`] expose the line and packet layers underneath it.

mod bind;
mod connection;
mod error;
mod mapi_stream;
mod mapi_stream_proto;
pub mod messages;
pub mod response;
pub mod startup;
#[cfg(test)]
mod testing;

pub use bind::{Value, escape, quote};
pub use connection::Connection;
pub use error::{BindError, Error, Result, ServerError};
pub use mapi_stream::MapiStream;
pub use mapi_stream_proto::MapiStreamProto;
pub use messages::{backend, frontend};
pub use response::{ColumnInfo, Response, Row, StatusKind, StatusRecord};
pub use startup::{Endpoint, HashAlgorithm};
