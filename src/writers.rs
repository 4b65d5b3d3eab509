use std::io::{self, Write};

use byteorder::{LittleEndian, WriteBytesExt};
use tokio::io::AsyncWrite;

use crate::myc::constants::{CapabilityFlags, ColumnType, StatusFlags, UTF8MB4_GENERAL_CI};
use crate::myc::io::WriteMysqlExt;
use crate::packet::PacketWriter;
use crate::resultset::OkResponse;
use crate::Column;
use crate::ErrorKind;

const BINARY_COLLATION: u16 = 63;

pub(crate) fn write_ok_packet<W: AsyncWrite + Unpin>(
    w: &mut PacketWriter<W>,
    capabilities: CapabilityFlags,
    ok: &OkResponse,
) -> io::Result<()> {
    w.write_u8(ok.header)?;
    w.write_lenenc_int(ok.affected_rows)?;
    w.write_lenenc_int(ok.last_insert_id)?;
    if capabilities.contains(CapabilityFlags::CLIENT_PROTOCOL_41) {
        w.write_u16::<LittleEndian>(ok.status_flags.bits())?;
        w.write_u16::<LittleEndian>(ok.warnings)?;
    } else if capabilities.contains(CapabilityFlags::CLIENT_TRANSACTIONS) {
        w.write_u16::<LittleEndian>(ok.status_flags.bits())?;
    }
    if capabilities.contains(CapabilityFlags::CLIENT_SESSION_TRACK) {
        w.write_lenenc_str(ok.info.as_bytes())?;
        if ok
            .status_flags
            .contains(StatusFlags::SERVER_SESSION_STATE_CHANGED)
        {
            w.write_lenenc_str(ok.session_state_info.as_bytes())?;
        }
    } else {
        w.write_all(ok.info.as_bytes())?;
    }
    w.end_packet();
    Ok(())
}

pub(crate) fn write_eof_packet<W: AsyncWrite + Unpin>(
    w: &mut PacketWriter<W>,
    capabilities: CapabilityFlags,
    status: StatusFlags,
    warnings: u16,
) -> io::Result<()> {
    w.write_u8(0xfe)?;
    if capabilities.contains(CapabilityFlags::CLIENT_PROTOCOL_41) {
        w.write_u16::<LittleEndian>(warnings)?;
        w.write_u16::<LittleEndian>(status.bits())?;
    }
    w.end_packet();
    Ok(())
}

/// The terminator of a result set, auth exchange, etc.: an OK packet in the
/// 0xFE dress under DEPRECATE_EOF, a bare EOF packet otherwise.
pub(crate) fn write_ok_or_eof<W: AsyncWrite + Unpin>(
    w: &mut PacketWriter<W>,
    capabilities: CapabilityFlags,
    ok: OkResponse,
) -> io::Result<()> {
    if capabilities.contains(CapabilityFlags::CLIENT_DEPRECATE_EOF) {
        write_ok_packet(
            w,
            capabilities,
            &OkResponse {
                header: 0xfe,
                ..ok
            },
        )
    } else {
        write_eof_packet(w, capabilities, ok.status_flags, ok.warnings)
    }
}

pub(crate) fn write_err<W: AsyncWrite + Unpin>(
    w: &mut PacketWriter<W>,
    capabilities: CapabilityFlags,
    err: ErrorKind,
    msg: &[u8],
) -> io::Result<()> {
    w.write_u8(0xff)?;
    w.write_u16::<LittleEndian>(err as u16)?;
    if capabilities.contains(CapabilityFlags::CLIENT_PROTOCOL_41) {
        w.write_u8(b'#')?;
        w.write_all(err.sqlstate())?;
    }
    w.write_all(msg)?;
    w.end_packet();
    Ok(())
}

/// The protocol-10 server greeting.
///
/// https://dev.mysql.com/doc/dev/mysql-server/latest/page_protocol_connection_phase_packets_protocol_handshake.html
pub(crate) fn write_greeting<W: AsyncWrite + Unpin>(
    w: &mut PacketWriter<W>,
    capabilities: CapabilityFlags,
    version: &str,
    connection_id: u32,
    auth_data: &[u8],
    auth_plugin: &str,
    status: StatusFlags,
) -> io::Result<()> {
    // the greeting always carries 20 bytes of plugin data plus a NUL;
    // plugins that have no challenge get zero padding
    let mut data = [0u8; 20];
    let n = auth_data.len().min(20);
    data[..n].copy_from_slice(&auth_data[..n]);

    let caps = capabilities.bits().to_le_bytes();

    w.write_u8(10)?;
    w.write_all(version.as_bytes())?;
    w.write_u8(0x00)?;
    w.write_u32::<LittleEndian>(connection_id)?;
    w.write_all(&data[..8])?; // auth-plugin-data-part-1
    w.write_u8(0x00)?;
    w.write_all(&caps[..2])?;
    w.write_u8(UTF8MB4_GENERAL_CI as u8)?;
    w.write_u16::<LittleEndian>(status.bits())?;
    w.write_all(&caps[2..4])?;
    w.write_u8((data.len() + 1) as u8)?; // length of the combined auth plugin data
    w.write_all(&[0x00; 10][..])?; // reserved
    w.write_all(&data[8..])?; // auth-plugin-data-part-2 ($len = MAX(13, data len - 8))
    w.write_u8(0x00)?;
    w.write_all(auth_plugin.as_bytes())?;
    w.write_u8(0x00)?;
    w.end_packet();
    Ok(())
}

/// Instructs the client to restart authentication under a different plugin.
pub(crate) fn write_auth_switch_request<W: AsyncWrite + Unpin>(
    w: &mut PacketWriter<W>,
    plugin: &str,
    data: &[u8],
) -> io::Result<()> {
    w.write_u8(0xfe)?;
    w.write_all(plugin.as_bytes())?;
    w.write_u8(0x00)?;
    w.write_all(data)?;
    w.write_u8(0x00)?;
    w.end_packet();
    Ok(())
}

/// A mid-exchange server message: 0x01 tag plus plugin payload.
pub(crate) fn write_auth_more_data<W: AsyncWrite + Unpin>(
    w: &mut PacketWriter<W>,
    data: &[u8],
) -> io::Result<()> {
    w.write_u8(0x01)?;
    w.write_all(data)?;
    w.end_packet();
    Ok(())
}

fn col_collation(c: &Column) -> u16 {
    match c.coltype {
        ColumnType::MYSQL_TYPE_BLOB
        | ColumnType::MYSQL_TYPE_TINY_BLOB
        | ColumnType::MYSQL_TYPE_MEDIUM_BLOB
        | ColumnType::MYSQL_TYPE_LONG_BLOB
        | ColumnType::MYSQL_TYPE_GEOMETRY => BINARY_COLLATION,
        _ => UTF8MB4_GENERAL_CI,
    }
}

/// One ColumnDefinition41 packet.
///
/// https://dev.mysql.com/doc/dev/mysql-server/latest/page_protocol_com_query_response_text_resultset_column_definition.html
pub(crate) fn write_column_definition<W: AsyncWrite + Unpin>(
    w: &mut PacketWriter<W>,
    c: &Column,
    is_field_list: bool,
) -> io::Result<()> {
    w.write_lenenc_str(b"def")?;
    w.write_lenenc_str(b"")?; // schema
    w.write_lenenc_str(c.table.as_bytes())?;
    w.write_lenenc_str(c.table.as_bytes())?; // org_table
    w.write_lenenc_str(c.column.as_bytes())?;
    w.write_lenenc_str(c.column.as_bytes())?; // org_name
    w.write_lenenc_int(0x0c)?;
    w.write_u16::<LittleEndian>(col_collation(c))?;
    w.write_u32::<LittleEndian>(1024)?; // display length
    w.write_u8(c.coltype as u8)?;
    w.write_u16::<LittleEndian>(c.colflags.bits())?;
    w.write_u8(0x00)?; // decimals
    w.write_all(&[0x00, 0x00])?; // filler
    if is_field_list {
        // COM_FIELD_LIST responses carry the column's default value
        w.write_lenenc_str(b"")?;
    }
    w.end_packet();
    Ok(())
}

pub(crate) fn write_column_definitions<W: AsyncWrite + Unpin>(
    w: &mut PacketWriter<W>,
    cols: &[Column],
) -> io::Result<()> {
    for c in cols {
        write_column_definition(w, c, false)?;
    }
    Ok(())
}

/// The length-encoded column count that opens every result set.
pub(crate) fn write_column_count<W: AsyncWrite + Unpin>(
    w: &mut PacketWriter<W>,
    n: u64,
) -> io::Result<()> {
    w.write_lenenc_int(n)?;
    w.end_packet();
    Ok(())
}

/// COM_STMT_PREPARE response header.
///
/// https://dev.mysql.com/doc/dev/mysql-server/latest/page_protocol_com_stmt_prepare.html
pub(crate) fn write_prepare_ok<W: AsyncWrite + Unpin>(
    w: &mut PacketWriter<W>,
    capabilities: CapabilityFlags,
    id: u32,
    params: &[Column],
    columns: &[Column],
    status: StatusFlags,
) -> io::Result<()> {
    w.write_u8(0x00)?;
    w.write_u32::<LittleEndian>(id)?;
    w.write_u16::<LittleEndian>(columns.len() as u16)?;
    w.write_u16::<LittleEndian>(params.len() as u16)?;
    w.write_u8(0x00)?; // filler
    w.write_u16::<LittleEndian>(0)?; // warnings
    w.end_packet();

    let deprecate_eof = capabilities.contains(CapabilityFlags::CLIENT_DEPRECATE_EOF);
    if !params.is_empty() {
        write_column_definitions(w, params)?;
        if !deprecate_eof {
            write_eof_packet(w, capabilities, status, 0)?;
        }
    }
    if !columns.is_empty() {
        write_column_definitions(w, columns)?;
        if !deprecate_eof {
            write_eof_packet(w, capabilities, status, 0)?;
        }
    }
    Ok(())
}
