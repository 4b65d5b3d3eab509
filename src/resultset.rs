use std::io::Write;

use tokio::io::AsyncWrite;

use crate::error::Error;
use crate::myc::constants::{CapabilityFlags, StatusFlags};
use crate::myc::value::Value;
use crate::packet::PacketWriter;
use crate::value::ToMysqlValue;
use crate::writers;
use crate::Column;

/// The contents of an OK packet (or of the OK-shaped result-set terminator
/// used under `CLIENT_DEPRECATE_EOF`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OkResponse {
    /// Packet header byte: 0x00, or 0xFE for the deprecate-EOF terminator.
    pub header: u8,
    /// Rows affected by the statement.
    pub affected_rows: u64,
    /// Identifier of the most recent insertion.
    pub last_insert_id: u64,
    /// Status flags to report; the connection's base flags are OR'd in.
    pub status_flags: StatusFlags,
    /// Warning count.
    pub warnings: u16,
    /// Human-readable info string.
    pub info: String,
    /// Session-state-changes block, sent only when `CLIENT_SESSION_TRACK`
    /// was negotiated and `SERVER_SESSION_STATE_CHANGED` is set.
    pub session_state_info: String,
}

impl Default for OkResponse {
    fn default() -> Self {
        OkResponse {
            header: 0x00,
            affected_rows: 0,
            last_insert_id: 0,
            status_flags: StatusFlags::empty(),
            warnings: 0,
            info: String::new(),
            session_state_info: String::new(),
        }
    }
}

impl OkResponse {
    /// An OK reporting `affected_rows` affected rows.
    pub fn with_affected_rows(affected_rows: u64) -> Self {
        OkResponse {
            affected_rows,
            ..OkResponse::default()
        }
    }
}

/// One result set: column definitions plus the rows that conform to them.
#[derive(Debug, Clone, Default)]
pub struct ResultSet {
    /// Column definitions, in order.
    pub columns: Vec<Column>,
    /// Row data; every row must have exactly one value per column.
    pub rows: Vec<Vec<Value>>,
}

impl ResultSet {
    /// Build a result set from columns and rows.
    pub fn new(columns: Vec<Column>, rows: Vec<Vec<Value>>) -> Self {
        ResultSet { columns, rows }
    }
}

/// What a [`Session`](crate::Session) returns for a query or execution.
#[derive(Debug)]
pub enum QueryResponse {
    /// No result set; report affected rows / last insert id.
    Ok(OkResponse),
    /// A single result set.
    Resultset(ResultSet),
    /// Several result sets, chained with `SERVER_MORE_RESULTS_EXISTS`.
    Multi(Vec<ResultSet>),
}

impl From<ResultSet> for QueryResponse {
    fn from(rs: ResultSet) -> Self {
        QueryResponse::Resultset(rs)
    }
}

/// Encode one binary-protocol row: 0x00 header, NULL bitmap with two
/// reserved bits, then each non-NULL value per its column's type.
pub(crate) fn encode_binary_row(columns: &[Column], row: &[Value]) -> Result<Vec<u8>, Error> {
    if row.len() != columns.len() {
        return Err(Error::Internal(format!(
            "row has {} values but the result set has {} columns",
            row.len(),
            columns.len()
        )));
    }
    let bitmap_len = (columns.len() + 7 + 2) / 8;
    let mut out = vec![0u8; 1 + bitmap_len];
    let mut values = Vec::new();
    for (i, (v, c)) in row.iter().zip(columns.iter()).enumerate() {
        if v.is_null() {
            out[1 + (i + 2) / 8] |= 1 << ((i + 2) % 8);
        } else {
            v.to_mysql_bin(&mut values, c)?;
        }
    }
    out.extend_from_slice(&values);
    Ok(out)
}

/// Emit a complete result set: column count, definitions, rows (text or
/// binary), and the OK/EOF terminator, honoring `CLIENT_DEPRECATE_EOF`.
pub(crate) async fn write_resultset<W: AsyncWrite + Unpin>(
    w: &mut PacketWriter<W>,
    capabilities: CapabilityFlags,
    status: StatusFlags,
    rs: &ResultSet,
    binary: bool,
    more_results: bool,
) -> Result<(), Error> {
    let mut terminal_status = status;
    if more_results {
        terminal_status |= StatusFlags::SERVER_MORE_RESULTS_EXISTS;
    }

    if rs.columns.is_empty() {
        // a columnless result is just an OK
        writers::write_ok_packet(
            w,
            capabilities,
            &OkResponse {
                affected_rows: rs.rows.len() as u64,
                status_flags: terminal_status,
                ..OkResponse::default()
            },
        )?;
        return Ok(());
    }

    writers::write_column_count(w, rs.columns.len() as u64)?;
    writers::write_column_definitions(w, &rs.columns)?;
    if !capabilities.contains(CapabilityFlags::CLIENT_DEPRECATE_EOF) {
        writers::write_eof_packet(w, capabilities, status, 0)?;
    }

    for row in &rs.rows {
        if binary {
            let encoded = encode_binary_row(&rs.columns, row)?;
            w.write_all(&encoded).map_err(Error::Io)?;
        } else {
            if row.len() != rs.columns.len() {
                return Err(Error::Internal(format!(
                    "row has {} values but the result set has {} columns",
                    row.len(),
                    rs.columns.len()
                )));
            }
            for v in row {
                v.to_mysql_text(w).map_err(Error::Io)?;
            }
        }
        w.end_packet();
        if w.should_flush() {
            w.flush().await.map_err(Error::Io)?;
        }
    }

    // affected-rows is not the number of rows streamed; a result set's
    // terminator always reports 0
    writers::write_ok_or_eof(
        w,
        capabilities,
        OkResponse {
            status_flags: terminal_status,
            ..OkResponse::default()
        },
    )?;
    Ok(())
}
