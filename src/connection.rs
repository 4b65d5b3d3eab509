use std::collections::VecDeque;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Instant;

use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, info, warn};

use crate::auth::{AuthInfo, AuthPlugin, AuthState, Decision, IdentityProvider};
use crate::commands::{self, Command};
use crate::error::Error;
use crate::errorcodes::ErrorKind;
use crate::myc::constants::{CapabilityFlags, ColumnFlags, ColumnType, StatusFlags};
use crate::myc::value::Value;
use crate::packet::{PacketReader, PacketWriter};
use crate::params;
use crate::resultset::{self, OkResponse, QueryResponse, ResultSet};
use crate::session::{ConnInfo, Session};
use crate::writers;
use crate::{Column, StatementData};

// COM_STMT_EXECUTE flag bits beyond the cursor type
const PARAMETER_COUNT_AVAILABLE: u8 = 0x08;
const CURSOR_TYPE_READ_ONLY: u8 = 0x01;

static CONNECTION_IDS: AtomicU32 = AtomicU32::new(1);
static STARTED: OnceLock<Instant> = OnceLock::new();

fn next_connection_id() -> u32 {
    CONNECTION_IDS.fetch_add(1, Ordering::Relaxed)
}

/// The capability set this server advertises in its greeting. The negotiated
/// set is the bitwise AND of this and what the client reports back.
pub(crate) fn server_capabilities() -> CapabilityFlags {
    CapabilityFlags::CLIENT_LONG_PASSWORD
        | CapabilityFlags::CLIENT_FOUND_ROWS
        | CapabilityFlags::CLIENT_LONG_FLAG
        | CapabilityFlags::CLIENT_CONNECT_WITH_DB
        | CapabilityFlags::CLIENT_PROTOCOL_41
        | CapabilityFlags::CLIENT_TRANSACTIONS
        | CapabilityFlags::CLIENT_SECURE_CONNECTION
        | CapabilityFlags::CLIENT_PLUGIN_AUTH
        | CapabilityFlags::CLIENT_PLUGIN_AUTH_LENENC_CLIENT_DATA
        | CapabilityFlags::CLIENT_CONNECT_ATTRS
        | CapabilityFlags::CLIENT_SESSION_TRACK
        | CapabilityFlags::CLIENT_DEPRECATE_EOF
        | CapabilityFlags::CLIENT_MULTI_RESULTS
        | CapabilityFlags::CLIENT_PS_MULTI_RESULTS
        | CapabilityFlags::CLIENT_QUERY_ATTRIBUTES
}

/// Server-level knobs for a connection.
#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// The version string placed in the greeting.
    pub version: String,
    /// Peer address description, surfaced through `COM_PROCESS_INFO` and
    /// [`ConnInfo`].
    pub peer: Option<String>,
}

impl Default for ServerOptions {
    fn default() -> Self {
        ServerOptions {
            version: "8.0.33-mysql-shim".to_string(),
            peer: None,
        }
    }
}

enum Flow {
    Continue,
    Quit,
}

/// A server-side MySQL connection: drives the handshake, authentication and
/// command loop over a pair of byte-stream halves, delegating query
/// execution to a [`Session`] and credentials to an [`IdentityProvider`].
pub struct Connection<B, R, W> {
    session: B,
    provider: Arc<dyn IdentityProvider>,
    opts: ServerOptions,
    reader: PacketReader<R>,
    writer: PacketWriter<W>,

    capabilities: CapabilityFlags,
    status: StatusFlags,
    connection_id: u32,
    username: String,
    database: Option<String>,
    connect_attrs: Vec<(String, String)>,

    stmts: HashMap<u32, StatementData>,
    next_stmt_id: u32,
    questions: u64,
}

impl<B, R, W> Connection<B, R, W>
where
    B: Session,
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    /// Serve one connection over two one-way stream halves until the client
    /// disconnects or a fatal error occurs.
    ///
    /// The transport is accepted elsewhere; this takes over from the first
    /// byte. Each connection is expected to run as its own task.
    pub async fn run_on(
        session: B,
        provider: Arc<dyn IdentityProvider>,
        opts: ServerOptions,
        reader: R,
        writer: W,
    ) -> Result<(), Error> {
        STARTED.get_or_init(Instant::now);
        let mut conn = Connection {
            session,
            provider,
            opts,
            reader: PacketReader::new(reader),
            writer: PacketWriter::new(writer),
            capabilities: CapabilityFlags::empty(),
            status: StatusFlags::SERVER_STATUS_AUTOCOMMIT,
            connection_id: next_connection_id(),
            username: String::new(),
            database: None,
            connect_attrs: Vec::new(),
            stmts: HashMap::new(),
            next_stmt_id: 1,
            questions: 0,
        };
        let res = conn.run().await;
        conn.session.close().await;
        if let Err(ref e) = res {
            debug!(connection_id = conn.connection_id, error = %e, "connection ended with error");
        }
        res
    }

    async fn run(&mut self) -> Result<(), Error> {
        info!(connection_id = self.connection_id, "new connection");
        match self.connection_phase().await {
            Ok(()) => {}
            Err(e) => {
                // any error packet owed to the client was already staged;
                // protocol errors close the stream without one
                let _ = self.writer.flush().await;
                return Err(e);
            }
        }

        let conn_info = ConnInfo {
            connection_id: self.connection_id,
            username: self.username.clone(),
            database: self.database.clone(),
            peer: self.opts.peer.clone(),
        };
        if let Err(e) = self.session.init(&conn_info).await {
            let kind = match &e {
                Error::Command { kind, .. } => *kind,
                _ => ErrorKind::ER_HANDSHAKE_ERROR,
            };
            let _ = writers::write_err(
                &mut self.writer,
                self.capabilities,
                kind,
                e.to_string().as_bytes(),
            );
            let _ = self.writer.flush().await;
            return Err(e);
        }

        self.command_phase().await
    }

    /// Greeting, handshake response, and the authentication exchange.
    async fn connection_phase(&mut self) -> Result<(), Error> {
        let default_plugin = self.provider.default_plugin().ok_or_else(|| {
            Error::Internal("identity provider offers no authentication plugins".into())
        })?;
        let (greeting_data, greeting_state) = default_plugin.start();

        writers::write_greeting(
            &mut self.writer,
            server_capabilities(),
            &self.opts.version,
            self.connection_id,
            &greeting_data,
            default_plugin.name(),
            self.status,
        )?;
        self.writer.flush().await?;

        // the client's reply continues the greeting's sequence chain
        self.reader.set_seq(self.writer.seq());
        let pkt = self.reader.next().await?.ok_or_else(|| {
            Error::Protocol("peer terminated connection during handshake".into())
        })?;
        let handshake = commands::client_handshake(&pkt)
            .map_err(|e| Error::Protocol(format!("bad client handshake: {:?}", e)))?
            .1;
        self.writer.set_seq(self.reader.seq());

        if !handshake
            .capabilities
            .contains(CapabilityFlags::CLIENT_PROTOCOL_41)
        {
            let msg = "this server requires clients to support the 4.1 protocol";
            writers::write_err(
                &mut self.writer,
                CapabilityFlags::empty(),
                ErrorKind::ER_FEATURE_DISABLED,
                msg.as_bytes(),
            )?;
            return Err(Error::Unsupported {
                kind: ErrorKind::ER_FEATURE_DISABLED,
                msg: msg.into(),
            });
        }
        if handshake.capabilities.contains(CapabilityFlags::CLIENT_SSL) {
            return Err(Error::Protocol(
                "client requested TLS despite us not advertising support for it".into(),
            ));
        }

        self.capabilities = server_capabilities() & handshake.capabilities;
        self.database = handshake
            .db
            .as_deref()
            .map(|db| String::from_utf8_lossy(db).into_owned());
        self.connect_attrs = handshake
            .connect_attrs
            .iter()
            .map(|(k, v)| {
                (
                    String::from_utf8_lossy(k).into_owned(),
                    String::from_utf8_lossy(v).into_owned(),
                )
            })
            .collect();

        let username = String::from_utf8_lossy(&handshake.username).into_owned();
        let client_plugin = String::from_utf8_lossy(&handshake.auth_plugin).into_owned();

        self.authenticate(
            username,
            handshake.auth_response,
            client_plugin,
            Some((default_plugin, greeting_state)),
        )
        .await
    }

    /// Drive one full authentication exchange to a verdict.
    ///
    /// `optimistic` carries the greeting plugin and its state; when the user's
    /// plugin is a different one (or on COM_CHANGE_USER, which passes `None`),
    /// an auth-switch-request restarts the exchange under the right plugin.
    async fn authenticate(
        &mut self,
        username: String,
        auth_response: Vec<u8>,
        client_plugin: String,
        optimistic: Option<(Arc<dyn AuthPlugin>, Box<dyn AuthState>)>,
    ) -> Result<(), Error> {
        let user = self.provider.get_user(&username).await?;
        let user = match user {
            Some(user) => user,
            None => {
                return self
                    .reject(username, Some("user does not exist".to_string()))
                    .await
            }
        };

        let plugin = match user.auth_plugin.as_deref() {
            Some(name) => self.provider.plugin(name),
            None => None,
        }
        .or_else(|| self.provider.default_plugin())
        .ok_or_else(|| {
            Error::Internal("identity provider offers no authentication plugins".into())
        })?;

        let client_matches = match plugin.client_plugin_name() {
            None => true,
            Some(n) => client_plugin.is_empty() || client_plugin == n,
        };

        let mut data = auth_response;
        let reusable = match optimistic {
            Some((greeted, state)) if greeted.name() == plugin.name() && client_matches => {
                Some(state)
            }
            _ => None,
        };
        let mut state = match reusable {
            Some(state) => state,
            None => {
                // restart under the user's plugin with fresh plugin data
                let (plugin_data, state) = plugin.start();
                let client_name = plugin.client_plugin_name().unwrap_or_else(|| plugin.name());
                writers::write_auth_switch_request(&mut self.writer, client_name, &plugin_data)?;
                self.writer.flush().await?;
                data = self.read_auth_reply().await?;
                state
            }
        };

        loop {
            let decision = state
                .advance(AuthInfo {
                    username: &username,
                    data: &data,
                    user: &user,
                    connect_attrs: &self.connect_attrs,
                })
                .await?;
            match decision {
                Decision::Challenge(bytes) => {
                    writers::write_auth_more_data(&mut self.writer, &bytes)?;
                    self.writer.flush().await?;
                    data = self.read_auth_reply().await?;
                }
                Decision::Accept(identity) => {
                    info!(
                        connection_id = self.connection_id,
                        user = %identity,
                        plugin = plugin.name(),
                        "access granted"
                    );
                    self.username = identity;
                    writers::write_ok_packet(
                        &mut self.writer,
                        self.capabilities,
                        &OkResponse {
                            status_flags: self.status,
                            ..OkResponse::default()
                        },
                    )?;
                    self.writer.flush().await?;
                    return Ok(());
                }
                Decision::Reject(reason) => {
                    warn!(
                        connection_id = self.connection_id,
                        user = %user.name,
                        plugin = plugin.name(),
                        "access denied"
                    );
                    return self.reject(username, reason).await;
                }
            }
        }
    }

    async fn reject(&mut self, username: String, reason: Option<String>) -> Result<(), Error> {
        let msg = reason
            .clone()
            .unwrap_or_else(|| format!("Access denied for user '{}'", username));
        writers::write_err(
            &mut self.writer,
            self.capabilities,
            ErrorKind::ER_ACCESS_DENIED_ERROR,
            msg.as_bytes(),
        )?;
        self.writer.flush().await?;
        Err(Error::Auth { username, reason })
    }

    async fn read_auth_reply(&mut self) -> Result<Vec<u8>, Error> {
        // only called right after a server auth packet; the client's reply
        // carries that packet's sequence id plus one
        self.reader.set_seq(self.writer.seq());
        let pkt = self.reader.next().await?.ok_or_else(|| {
            Error::Protocol("peer terminated connection mid-authentication".into())
        })?;
        self.writer.set_seq(self.reader.seq());
        Ok(pkt)
    }

    /// https://dev.mysql.com/doc/dev/mysql-server/latest/page_protocol_command_phase.html
    async fn command_phase(&mut self) -> Result<(), Error> {
        loop {
            // every command starts a fresh sequence
            self.reader.reset_seq();
            let pkt = match self.reader.next().await {
                Ok(Some(pkt)) => pkt,
                Ok(None) => {
                    debug!(connection_id = self.connection_id, "client disconnected");
                    return Ok(());
                }
                Err(e) => return self.fatal(e).await,
            };
            self.writer.set_seq(self.reader.seq());
            self.questions += 1;

            match self.dispatch(&pkt).await {
                Ok(Flow::Continue) => self.writer.flush().await?,
                Ok(Flow::Quit) => return Ok(()),
                Err(e) if e.is_recoverable() => {
                    let (kind, msg) = e.to_wire();
                    writers::write_err(&mut self.writer, self.capabilities, kind, msg.as_bytes())?;
                    self.writer.flush().await?;
                }
                Err(e) => return self.fatal(e).await,
            }
        }
    }

    /// Tear down after an unrecoverable error. Protocol violations past the
    /// handshake get a parting 1152; everything else just closes.
    async fn fatal(&mut self, e: Error) -> Result<(), Error> {
        if matches!(e, Error::Protocol(_)) {
            let (kind, msg) = e.to_wire();
            let _ = writers::write_err(&mut self.writer, self.capabilities, kind, msg.as_bytes());
            let _ = self.writer.flush().await;
        }
        Err(e)
    }

    async fn dispatch(&mut self, pkt: &[u8]) -> Result<Flow, Error> {
        let cmd = commands::parse(pkt)
            .map_err(|e| Error::Protocol(format!("malformed command packet: {:?}", e)))?
            .1;

        match cmd {
            Command::Query(rest) => self.handle_query(rest).await?,
            Command::Prepare(sql) => self.handle_prepare(sql).await?,
            Command::Execute {
                stmt,
                flags,
                params,
            } => self.handle_execute(stmt, flags, params).await?,
            Command::SendLongData { stmt, param, data } => {
                // no response, even for unknown statements; errors surface on execute
                match self.stmts.get_mut(&stmt) {
                    Some(state) => {
                        state
                            .long_data
                            .entry(param)
                            .or_insert_with(Vec::new)
                            .extend(data);
                    }
                    None => {
                        debug!(stmt, "long data for unknown statement dropped");
                    }
                }
            }
            Command::Close(stmt) => {
                // NOTE: spec dictates no response from server
                self.stmts.remove(&stmt);
            }
            Command::Reset(stmt) => {
                let state = self.stmts.get_mut(&stmt).ok_or_else(|| unknown_stmt(stmt))?;
                state.long_data.clear();
                state.cursor = None;
                self.write_ok(OkResponse::default())?;
            }
            Command::Fetch { stmt, rows } => self.handle_fetch(stmt, rows).await?,
            Command::Init(db) => {
                let db = str_payload(db)?;
                self.session.use_db(db).await?;
                self.database = Some(db.to_string());
                self.write_ok(OkResponse::default())?;
            }
            Command::ListFields(rest) => self.handle_field_list(rest).await?,
            Command::Ping | Command::Debug => self.write_ok(OkResponse::default())?,
            Command::Statistics => self.handle_statistics()?,
            Command::ProcessInfo => self.handle_process_info().await?,
            Command::ChangeUser(rest) => self.handle_change_user(rest).await?,
            Command::ResetConnection => {
                self.stmts.clear();
                self.session.reset().await?;
                self.write_ok(OkResponse::default())?;
            }
            Command::Quit => {
                debug!(connection_id = self.connection_id, "client quit");
                return Ok(Flow::Quit);
            }
            Command::Sleep => {
                return Err(Error::Protocol(
                    "COM_SLEEP is never valid from a client".into(),
                ))
            }
            Command::Unknown(opcode) => {
                return Err(Error::Unsupported {
                    kind: ErrorKind::ER_UNKNOWN_COM_ERROR,
                    msg: format!("Unknown command {:#04x}", opcode),
                })
            }
        }
        Ok(Flow::Continue)
    }

    async fn handle_query(&mut self, payload: &[u8]) -> Result<(), Error> {
        let mut input = payload;
        let attrs = params::parse_query_attrs(&mut input, self.capabilities)?;
        let sql = str_payload(input)?;
        debug!(connection_id = self.connection_id, sql, "query");
        let resp = self.session.query(sql, &attrs).await?;
        self.write_response(resp, false).await
    }

    async fn handle_prepare(&mut self, payload: &[u8]) -> Result<(), Error> {
        let sql = str_payload(payload)?;
        let info = self.session.prepare(sql).await?;

        let id = self.next_stmt_id;
        self.next_stmt_id = self.next_stmt_id.wrapping_add(1);

        let param_defs = if info.params.len() == usize::from(info.num_params) {
            info.params
        } else {
            (0..info.num_params)
                .map(|_| Column {
                    table: String::new(),
                    column: "?".to_string(),
                    coltype: ColumnType::MYSQL_TYPE_VAR_STRING,
                    colflags: ColumnFlags::empty(),
                })
                .collect()
        };

        self.stmts.insert(
            id,
            StatementData {
                params: info.num_params,
                ..StatementData::default()
            },
        );

        writers::write_prepare_ok(
            &mut self.writer,
            self.capabilities,
            id,
            &param_defs,
            &info.columns,
            self.status,
        )?;
        Ok(())
    }

    async fn handle_execute(
        &mut self,
        stmt: u32,
        flags: u8,
        payload: &[u8],
    ) -> Result<(), Error> {
        let use_cursor = flags & CURSOR_TYPE_READ_ONLY != 0;
        if flags & !(CURSOR_TYPE_READ_ONLY | PARAMETER_COUNT_AVAILABLE) != 0 {
            return Err(Error::Unsupported {
                kind: ErrorKind::ER_NOT_SUPPORTED_YET,
                msg: format!("unsupported cursor flags {:#04x}", flags),
            });
        }
        let param_count_available = flags & PARAMETER_COUNT_AVAILABLE != 0;

        let resp = {
            let state = self.stmts.get_mut(&stmt).ok_or_else(|| unknown_stmt(stmt))?;
            let (params, attrs) = params::parse_execute_params(
                payload,
                self.capabilities,
                state,
                param_count_available,
            )?;
            self.session.execute(stmt, params, &attrs).await?
        };

        if let Some(state) = self.stmts.get_mut(&stmt) {
            state.long_data.clear();
            state.cursor = None;
        }

        match resp {
            QueryResponse::Resultset(rs) if use_cursor && !rs.columns.is_empty() => {
                let rows = rs
                    .rows
                    .iter()
                    .map(|row| resultset::encode_binary_row(&rs.columns, row))
                    .collect::<Result<VecDeque<_>, Error>>()?;

                writers::write_column_count(&mut self.writer, rs.columns.len() as u64)?;
                writers::write_column_definitions(&mut self.writer, &rs.columns)?;
                writers::write_ok_or_eof(
                    &mut self.writer,
                    self.capabilities,
                    OkResponse {
                        status_flags: self.status | StatusFlags::SERVER_STATUS_CURSOR_EXISTS,
                        ..OkResponse::default()
                    },
                )?;

                if let Some(state) = self.stmts.get_mut(&stmt) {
                    state.cursor = Some(rows);
                }
                Ok(())
            }
            resp => self.write_response(resp, true).await,
        }
    }

    async fn handle_fetch(&mut self, stmt: u32, rows: u32) -> Result<(), Error> {
        let state = self.stmts.get_mut(&stmt).ok_or_else(|| unknown_stmt(stmt))?;
        let cursor = state.cursor.as_mut().ok_or_else(|| {
            Error::command(
                ErrorKind::ER_STMT_HAS_NO_OPEN_CURSOR,
                format!("The statement ({}) has no open cursor", stmt),
            )
        })?;

        let mut sent = 0u32;
        while sent < rows {
            match cursor.pop_front() {
                Some(row) => {
                    use std::io::Write;
                    self.writer.write_all(&row).map_err(Error::Io)?;
                    self.writer.end_packet();
                    if self.writer.should_flush() {
                        self.writer.flush().await?;
                    }
                    sent += 1;
                }
                None => break,
            }
        }
        let done = sent < rows;

        let flag = if done {
            StatusFlags::SERVER_STATUS_LAST_ROW_SENT
        } else {
            StatusFlags::SERVER_STATUS_CURSOR_EXISTS
        };
        writers::write_ok_or_eof(
            &mut self.writer,
            self.capabilities,
            OkResponse {
                status_flags: self.status | flag,
                ..OkResponse::default()
            },
        )?;
        Ok(())
    }

    async fn handle_field_list(&mut self, payload: &[u8]) -> Result<(), Error> {
        let table_end = payload
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(payload.len());
        let table = str_payload(&payload[..table_end])?;

        let schema = self.session.schema().await?;
        let columns = schema.get(table).ok_or_else(|| {
            Error::command(
                ErrorKind::ER_NO_SUCH_TABLE,
                format!("Table '{}' doesn't exist", table),
            )
        })?;

        for c in columns {
            writers::write_column_definition(&mut self.writer, c, true)?;
        }
        writers::write_ok_or_eof(
            &mut self.writer,
            self.capabilities,
            OkResponse {
                status_flags: self.status,
                ..OkResponse::default()
            },
        )?;
        Ok(())
    }

    fn handle_statistics(&mut self) -> Result<(), Error> {
        use std::io::Write;
        let uptime = STARTED.get().map_or(0, |s| s.elapsed().as_secs());
        let stats = format!(
            "Uptime: {}  Threads: 1  Questions: {}  Slow queries: 0  \
             Opens: 0  Flush tables: 1  Open tables: 0  Queries per second avg: 0.000",
            uptime, self.questions
        );
        self.writer.write_all(stats.as_bytes()).map_err(Error::Io)?;
        self.writer.end_packet();
        Ok(())
    }

    async fn handle_process_info(&mut self) -> Result<(), Error> {
        let columns = [
            ("Id", ColumnType::MYSQL_TYPE_LONGLONG),
            ("User", ColumnType::MYSQL_TYPE_VAR_STRING),
            ("Host", ColumnType::MYSQL_TYPE_VAR_STRING),
            ("db", ColumnType::MYSQL_TYPE_VAR_STRING),
            ("Command", ColumnType::MYSQL_TYPE_VAR_STRING),
            ("Time", ColumnType::MYSQL_TYPE_LONG),
            ("State", ColumnType::MYSQL_TYPE_VAR_STRING),
            ("Info", ColumnType::MYSQL_TYPE_VAR_STRING),
        ]
        .into_iter()
        .map(|(name, coltype)| Column {
            table: String::new(),
            column: name.to_string(),
            coltype,
            colflags: ColumnFlags::empty(),
        })
        .collect();

        let row = vec![
            Value::UInt(u64::from(self.connection_id)),
            Value::Bytes(self.username.clone().into_bytes()),
            Value::Bytes(
                self.opts
                    .peer
                    .clone()
                    .unwrap_or_else(|| "localhost".to_string())
                    .into_bytes(),
            ),
            self.database
                .clone()
                .map_or(Value::NULL, |db| Value::Bytes(db.into_bytes())),
            Value::Bytes(b"Query".to_vec()),
            Value::Int(0),
            Value::Bytes(b"executing".to_vec()),
            Value::Bytes(b"PROCESSLIST".to_vec()),
        ];

        let rs = ResultSet::new(columns, vec![row]);
        resultset::write_resultset(
            &mut self.writer,
            self.capabilities,
            self.status,
            &rs,
            false,
            false,
        )
        .await
    }

    /// COM_CHANGE_USER restarts authentication on the live connection; only
    /// the connection id survives. Statements and session state are gone
    /// whether or not the new credentials check out.
    async fn handle_change_user(&mut self, payload: &[u8]) -> Result<(), Error> {
        let cu = commands::change_user(payload, self.capabilities)
            .map_err(|e| Error::Protocol(format!("malformed COM_CHANGE_USER: {:?}", e)))?
            .1;

        self.stmts.clear();
        self.next_stmt_id = 1;

        let username = String::from_utf8_lossy(&cu.username).into_owned();
        let client_plugin = String::from_utf8_lossy(&cu.auth_plugin).into_owned();
        self.database = cu
            .db
            .as_deref()
            .map(|db| String::from_utf8_lossy(db).into_owned());
        if !cu.connect_attrs.is_empty() {
            self.connect_attrs = cu
                .connect_attrs
                .iter()
                .map(|(k, v)| {
                    (
                        String::from_utf8_lossy(k).into_owned(),
                        String::from_utf8_lossy(v).into_owned(),
                    )
                })
                .collect();
        }

        self.authenticate(username, cu.auth_response, client_plugin, None)
            .await?;
        self.session.reset().await?;
        Ok(())
    }

    async fn write_response(&mut self, resp: QueryResponse, binary: bool) -> Result<(), Error> {
        match resp {
            QueryResponse::Ok(ok) => self.write_ok(ok),
            QueryResponse::Resultset(rs) => {
                resultset::write_resultset(
                    &mut self.writer,
                    self.capabilities,
                    self.status,
                    &rs,
                    binary,
                    false,
                )
                .await
            }
            QueryResponse::Multi(sets) => {
                if sets.is_empty() {
                    return self.write_ok(OkResponse::default());
                }
                let last = sets.len() - 1;
                for (i, rs) in sets.iter().enumerate() {
                    resultset::write_resultset(
                        &mut self.writer,
                        self.capabilities,
                        self.status,
                        rs,
                        binary,
                        i < last,
                    )
                    .await?;
                }
                Ok(())
            }
        }
    }

    fn write_ok(&mut self, mut ok: OkResponse) -> Result<(), Error> {
        ok.status_flags |= self.status;
        writers::write_ok_packet(&mut self.writer, self.capabilities, &ok)?;
        Ok(())
    }
}

fn unknown_stmt(stmt: u32) -> Error {
    Error::command(
        ErrorKind::ER_UNKNOWN_STMT_HANDLER,
        format!(
            "Unknown prepared statement handler ({}) given to mysqld_stmt_execute",
            stmt
        ),
    )
}

fn str_payload(payload: &[u8]) -> Result<&str, Error> {
    std::str::from_utf8(payload)
        .map_err(|e| Error::Protocol(format!("payload is not valid utf-8: {}", e)))
}
