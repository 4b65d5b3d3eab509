//! Bindings for emulating a MySQL/MariaDB server.
//!
//! When developing new databases or caching layers, it can be immensely useful to test your system
//! using existing applications. However, this often requires significant work modifying
//! applications to use your database over the existing ones. This crate solves that problem by
//! acting as a MySQL server, and delegating operations such as querying and query execution to
//! user-defined logic.
//!
//! To start, implement [`Session`] for your backend and hand each accepted byte stream to
//! [`Connection::run_on`]. The appropriate methods will be called on your session whenever a
//! client issues a `QUERY`, `PREPARE`, or `EXECUTE` command, and the rows you return are encoded
//! onto the wire for you. Authentication is driven by an [`IdentityProvider`]; the bundled
//! [`SimpleIdentityProvider`] waves every username through, which is handy for tests.
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use mysql_shim::*;
//! use tokio::net::TcpListener;
//!
//! struct Backend;
//!
//! #[async_trait]
//! impl Session for Backend {
//!     async fn query(
//!         &mut self,
//!         _sql: &str,
//!         _attrs: &[QueryAttr<'_>],
//!     ) -> Result<QueryResponse, Error> {
//!         let cols = vec![
//!             Column {
//!                 table: "foo".to_string(),
//!                 column: "a".to_string(),
//!                 coltype: ColumnType::MYSQL_TYPE_LONGLONG,
//!                 colflags: ColumnFlags::empty(),
//!             },
//!             Column {
//!                 table: "foo".to_string(),
//!                 column: "b".to_string(),
//!                 coltype: ColumnType::MYSQL_TYPE_STRING,
//!                 colflags: ColumnFlags::empty(),
//!             },
//!         ];
//!         let rows = vec![vec![RowValue::Int(42), RowValue::Bytes(b"b's value".to_vec())]];
//!         Ok(ResultSet::new(cols, rows).into())
//!     }
//!
//!     async fn execute(
//!         &mut self,
//!         _id: u32,
//!         _params: Params<'_>,
//!         _attrs: &[QueryAttr<'_>],
//!     ) -> Result<QueryResponse, Error> {
//!         Ok(QueryResponse::Ok(OkResponse::default()))
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let listener = TcpListener::bind("127.0.0.1:3306").await?;
//!     let provider = Arc::new(SimpleIdentityProvider);
//!     loop {
//!         let (stream, addr) = listener.accept().await?;
//!         let provider = Arc::clone(&provider);
//!         tokio::spawn(async move {
//!             let (r, w) = stream.into_split();
//!             let opts = ServerOptions {
//!                 peer: Some(addr.to_string()),
//!                 ..ServerOptions::default()
//!             };
//!             if let Err(e) = Connection::run_on(Backend, provider, opts, r, w).await {
//!                 eprintln!("connection error: {}", e);
//!             }
//!         });
//!     }
//! }
//! ```
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]

// Note to developers: you can find decent overviews of the protocol at
//
//   https://github.com/cwarden/mysql-proxy/blob/master/doc/protocol.rst
//
// and
//
//   https://mariadb.com/kb/en/library/clientserver-protocol/
//
// Wireshark also does a pretty good job at parsing the MySQL protocol.

extern crate mysql_common as myc;

use std::collections::{HashMap, VecDeque};

pub use crate::myc::constants::{CapabilityFlags, ColumnFlags, ColumnType, StatusFlags};
/// Owned row/cell values, as placed in [`ResultSet`] rows.
pub use crate::myc::value::Value as RowValue;
/// Re-exported for implementing [`Session`] and the auth traits.
pub use async_trait::async_trait;

mod auth;
mod commands;
mod connection;
mod error;
mod errorcodes;
mod packet;
mod params;
mod resultset;
mod session;
mod value;
mod writers;

/// Meta-information abot a single column, used either to describe a prepared statement parameter
/// or an output column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    /// This column's associated table.
    ///
    /// Note that this is *technically* the table's alias.
    pub table: String,
    /// This column's name.
    ///
    /// Note that this is *technically* the column's alias.
    pub column: String,
    /// This column's type.
    pub coltype: ColumnType,
    /// Any flags associated with this column.
    ///
    /// Of particular interest are `ColumnFlags::UNSIGNED_FLAG` and `ColumnFlags::NOT_NULL_FLAG`.
    pub colflags: ColumnFlags,
}

pub use crate::auth::{
    native_password_auth_data, AuthInfo, AuthPlugin, AuthState, ClearPasswordPlugin, Decision,
    GssAcceptor, GssExchange, GssStep, IdentityProvider, KerberosPlugin, NativePasswordPlugin,
    NoLoginPlugin, SimpleIdentityProvider, User,
};
pub use crate::connection::{Connection, ServerOptions};
pub use crate::error::Error;
pub use crate::errorcodes::ErrorKind;
pub use crate::params::{ParamValue, Params, QueryAttr};
pub use crate::resultset::{OkResponse, QueryResponse, ResultSet};
pub use crate::session::{ConnInfo, PrepareInfo, Session};
pub use crate::value::{ToMysqlValue, Value, ValueInner};

/// Per-statement server-side state: prepared parameter count, the parameter
/// types bound by the most recent execute, long-data accumulated by
/// `COM_STMT_SEND_LONG_DATA`, and the read-only cursor, if one is open.
#[derive(Default)]
pub(crate) struct StatementData {
    pub(crate) long_data: HashMap<u16, Vec<u8>>,
    pub(crate) bound_types: Vec<(myc::constants::ColumnType, bool)>,
    pub(crate) params: u16,
    pub(crate) cursor: Option<VecDeque<Vec<u8>>>,
}
