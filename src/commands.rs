use crate::myc::constants::{CapabilityFlags, Command as CommandByte};

/// The client's reply to the server greeting.
#[derive(Debug)]
pub(crate) struct ClientHandshake {
    pub(crate) capabilities: CapabilityFlags,
    pub(crate) maxps: u32,
    pub(crate) collation: u16,
    pub(crate) db: Option<Vec<u8>>,
    pub(crate) username: Vec<u8>,
    pub(crate) auth_response: Vec<u8>,
    pub(crate) auth_plugin: Vec<u8>,
    pub(crate) connect_attrs: Vec<(Vec<u8>, Vec<u8>)>,
}

/// COM_CHANGE_USER payload.
#[derive(Debug)]
pub(crate) struct ChangeUser {
    pub(crate) username: Vec<u8>,
    pub(crate) auth_response: Vec<u8>,
    pub(crate) db: Option<Vec<u8>>,
    pub(crate) collation: Option<u16>,
    pub(crate) auth_plugin: Vec<u8>,
    pub(crate) connect_attrs: Vec<(Vec<u8>, Vec<u8>)>,
}

fn null_terminated(i: &[u8]) -> nom::IResult<&[u8], &[u8]> {
    let (i, s) = nom::bytes::complete::take_until(&b"\0"[..])(i)?;
    let (i, _) = nom::bytes::complete::tag(b"\0")(i)?;
    Ok((i, s))
}

fn lenenc_int(i: &[u8]) -> nom::IResult<&[u8], u64> {
    let (i, b) = nom::number::complete::le_u8(i)?;
    let size: usize = match b {
        0xfb => return Ok((i, 0)),
        0xfc => 2,
        0xfd => 3,
        0xfe => 8,
        _ => return Ok((i, u64::from(b))),
    };
    let (i, b) = nom::bytes::complete::take(size)(i)?;
    let mut bytes = [0u8; 8];
    bytes[..size].copy_from_slice(b);
    Ok((i, u64::from_le_bytes(bytes)))
}

fn lenenc_str(i: &[u8]) -> nom::IResult<&[u8], &[u8]> {
    let (i, len) = lenenc_int(i)?;
    nom::bytes::complete::take(len)(i)
}

// Clients are sloppy about the advertised attribute-block length (some count
// the length prefix itself, some don't), so pairs are consumed until the
// block runs dry and anything malformed is dropped rather than failing the
// handshake.
fn connect_attrs(i: &[u8]) -> Vec<(Vec<u8>, Vec<u8>)> {
    let mut attrs = Vec::new();
    let block = match lenenc_str(i) {
        Ok((_, block)) => block,
        Err(_) => return attrs,
    };
    let mut rest = block;
    while !rest.is_empty() {
        match nom::sequence::pair(lenenc_str, lenenc_str)(rest) {
            Ok((r, (k, v))) => {
                attrs.push((k.to_vec(), v.to_vec()));
                rest = r;
            }
            Err(_) => break,
        }
    }
    attrs
}

// https://dev.mysql.com/doc/dev/mysql-server/latest/page_protocol_connection_phase_packets_protocol_handshake_response.html
pub(crate) fn client_handshake(i: &[u8]) -> nom::IResult<&[u8], ClientHandshake> {
    let (i, cap) = nom::number::complete::le_u16(i)?;
    let capabilities = CapabilityFlags::from_bits_truncate(u32::from(cap));
    if !capabilities.contains(CapabilityFlags::CLIENT_PROTOCOL_41) {
        // HandshakeResponse320: parse just enough to name the client in the
        // rejection that follows
        let (i, maxps1) = nom::number::complete::le_u16(i)?;
        let (i, maxps2) = nom::number::complete::le_u8(i)?;
        let maxps = u32::from(maxps2) << 16 | u32::from(maxps1);
        let (i, username) = null_terminated(i)?;
        return Ok((
            &[],
            ClientHandshake {
                capabilities,
                maxps,
                collation: 0,
                username: username.to_vec(),
                db: None,
                auth_response: i.to_vec(),
                auth_plugin: Vec::new(),
                connect_attrs: Vec::new(),
            },
        ));
    }

    let (i, cap2) = nom::number::complete::le_u16(i)?;
    let cap = u32::from(cap2) << 16 | u32::from(cap);
    let capabilities = CapabilityFlags::from_bits_truncate(cap);

    let (i, maxps) = nom::number::complete::le_u32(i)?;
    let (i, collation) = nom::number::complete::le_u8(i)?;
    let (i, _) = nom::bytes::complete::take(23u8)(i)?;

    let (i, username) = null_terminated(i)?;

    let (i, auth_response) =
        if capabilities.contains(CapabilityFlags::CLIENT_PLUGIN_AUTH_LENENC_CLIENT_DATA) {
            lenenc_str(i)?
        } else if capabilities.contains(CapabilityFlags::CLIENT_SECURE_CONNECTION) {
            let (i, size) = nom::number::complete::le_u8(i)?;
            nom::bytes::complete::take(size)(i)?
        } else {
            null_terminated(i)?
        };

    let (i, db) = if capabilities.contains(CapabilityFlags::CLIENT_CONNECT_WITH_DB) && !i.is_empty()
    {
        let (i, db) = null_terminated(i)?;
        (i, Some(db))
    } else {
        (i, None)
    };

    let (i, auth_plugin) =
        if capabilities.contains(CapabilityFlags::CLIENT_PLUGIN_AUTH) && !i.is_empty() {
            null_terminated(i)?
        } else {
            (i, &b""[..])
        };

    let attrs = if capabilities.contains(CapabilityFlags::CLIENT_CONNECT_ATTRS) && !i.is_empty() {
        connect_attrs(i)
    } else {
        Vec::new()
    };

    Ok((
        &[],
        ClientHandshake {
            capabilities,
            maxps,
            collation: u16::from(collation),
            username: username.to_vec(),
            db: db.map(|c| c.to_vec()),
            auth_response: auth_response.to_vec(),
            auth_plugin: auth_plugin.to_vec(),
            connect_attrs: attrs,
        },
    ))
}

// https://dev.mysql.com/doc/dev/mysql-server/latest/page_protocol_com_change_user.html
pub(crate) fn change_user(
    i: &[u8],
    capabilities: CapabilityFlags,
) -> nom::IResult<&[u8], ChangeUser> {
    let (i, username) = null_terminated(i)?;
    let (i, auth_response) =
        if capabilities.contains(CapabilityFlags::CLIENT_SECURE_CONNECTION) {
            let (i, size) = nom::number::complete::le_u8(i)?;
            nom::bytes::complete::take(size)(i)?
        } else {
            null_terminated(i)?
        };
    let (i, db) = null_terminated(i)?;

    let mut cu = ChangeUser {
        username: username.to_vec(),
        auth_response: auth_response.to_vec(),
        db: if db.is_empty() {
            None
        } else {
            Some(db.to_vec())
        },
        collation: None,
        auth_plugin: Vec::new(),
        connect_attrs: Vec::new(),
    };

    if i.is_empty() {
        return Ok((i, cu));
    }

    let (i, collation) = nom::number::complete::le_u16(i)?;
    cu.collation = Some(collation);

    let (i, auth_plugin) = if capabilities.contains(CapabilityFlags::CLIENT_PLUGIN_AUTH)
        && !i.is_empty()
    {
        null_terminated(i)?
    } else {
        (i, &b""[..])
    };
    cu.auth_plugin = auth_plugin.to_vec();

    if capabilities.contains(CapabilityFlags::CLIENT_CONNECT_ATTRS) && !i.is_empty() {
        cu.connect_attrs = connect_attrs(i);
    }

    Ok((&[], cu))
}

/// A single client command, identified by its leading opcode byte.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Command<'a> {
    Query(&'a [u8]),
    ListFields(&'a [u8]),
    Close(u32),
    Prepare(&'a [u8]),
    Init(&'a [u8]),
    Execute {
        stmt: u32,
        flags: u8,
        params: &'a [u8],
    },
    SendLongData {
        stmt: u32,
        param: u16,
        data: &'a [u8],
    },
    Fetch {
        stmt: u32,
        rows: u32,
    },
    Reset(u32),
    ChangeUser(&'a [u8]),
    ResetConnection,
    Statistics,
    ProcessInfo,
    Debug,
    Ping,
    Quit,
    Sleep,
    Unknown(u8),
}

fn execute(i: &[u8]) -> nom::IResult<&[u8], Command<'_>> {
    let (i, stmt) = nom::number::complete::le_u32(i)?;
    let (i, flags) = nom::number::complete::le_u8(i)?;
    let (i, _iterations) = nom::number::complete::le_u32(i)?;
    Ok((
        &[],
        Command::Execute {
            stmt,
            flags,
            params: i,
        },
    ))
}

fn send_long_data(i: &[u8]) -> nom::IResult<&[u8], Command<'_>> {
    let (i, stmt) = nom::number::complete::le_u32(i)?;
    let (i, param) = nom::number::complete::le_u16(i)?;
    Ok((
        &[],
        Command::SendLongData {
            stmt,
            param,
            data: i,
        },
    ))
}

fn fetch(i: &[u8]) -> nom::IResult<&[u8], Command<'_>> {
    let (i, stmt) = nom::number::complete::le_u32(i)?;
    let (i, rows) = nom::number::complete::le_u32(i)?;
    Ok((i, Command::Fetch { stmt, rows }))
}

pub(crate) fn parse(i: &[u8]) -> nom::IResult<&[u8], Command<'_>> {
    let (i, opcode) = nom::number::complete::le_u8(i)?;
    match opcode {
        x if x == CommandByte::COM_QUERY as u8 => Ok((&[], Command::Query(i))),
        x if x == CommandByte::COM_FIELD_LIST as u8 => Ok((&[], Command::ListFields(i))),
        x if x == CommandByte::COM_INIT_DB as u8 => Ok((&[], Command::Init(i))),
        x if x == CommandByte::COM_STMT_PREPARE as u8 => Ok((&[], Command::Prepare(i))),
        x if x == CommandByte::COM_STMT_EXECUTE as u8 => execute(i),
        x if x == CommandByte::COM_STMT_SEND_LONG_DATA as u8 => send_long_data(i),
        x if x == CommandByte::COM_STMT_CLOSE as u8 => {
            nom::combinator::map(nom::number::complete::le_u32, Command::Close)(i)
        }
        x if x == CommandByte::COM_STMT_RESET as u8 => {
            nom::combinator::map(nom::number::complete::le_u32, Command::Reset)(i)
        }
        x if x == CommandByte::COM_STMT_FETCH as u8 => fetch(i),
        x if x == CommandByte::COM_CHANGE_USER as u8 => Ok((&[], Command::ChangeUser(i))),
        x if x == CommandByte::COM_RESET_CONNECTION as u8 => Ok((i, Command::ResetConnection)),
        x if x == CommandByte::COM_STATISTICS as u8 => Ok((i, Command::Statistics)),
        x if x == CommandByte::COM_PROCESS_INFO as u8 => Ok((i, Command::ProcessInfo)),
        x if x == CommandByte::COM_DEBUG as u8 => Ok((i, Command::Debug)),
        x if x == CommandByte::COM_PING as u8 => Ok((i, Command::Ping)),
        x if x == CommandByte::COM_QUIT as u8 => Ok((i, Command::Quit)),
        x if x == CommandByte::COM_SLEEP as u8 => Ok((i, Command::Sleep)),
        x => Ok((i, Command::Unknown(x))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::myc::constants::UTF8_GENERAL_CI;

    #[test]
    fn it_parses_handshake() {
        let data = &[
            0x8d, 0xa6, 0xff, 0x09, 0x00, 0x00, 0x00, 0x01, 0x21, 0x00, 0x00, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00, 0x64, 0x65, 0x66, 0x61, 0x75, 0x6c, 0x74, 0x00, 0x14, 0xf7,
            0xd1, 0x6c, 0xe9, 0x0d, 0x2f, 0x34, 0xb0, 0x2f, 0xd8, 0x1d, 0x18, 0xc7, 0xa4, 0xe8,
            0x98, 0x97, 0x67, 0xeb, 0xad, 0x64, 0x65, 0x66, 0x61, 0x75, 0x6c, 0x74, 0x00, 0x6d,
            0x79, 0x73, 0x71, 0x6c, 0x5f, 0x6e, 0x61, 0x74, 0x69, 0x76, 0x65, 0x5f, 0x70, 0x61,
            0x73, 0x73, 0x77, 0x6f, 0x72, 0x64, 0x00,
        ];

        let (_, handshake) = client_handshake(&data[..]).unwrap();
        assert!(handshake
            .capabilities
            .contains(CapabilityFlags::CLIENT_LONG_PASSWORD));
        assert!(handshake
            .capabilities
            .contains(CapabilityFlags::CLIENT_MULTI_RESULTS));
        assert!(handshake
            .capabilities
            .contains(CapabilityFlags::CLIENT_CONNECT_WITH_DB));
        assert!(handshake
            .capabilities
            .contains(CapabilityFlags::CLIENT_DEPRECATE_EOF));
        assert_eq!(handshake.collation, UTF8_GENERAL_CI);
        assert_eq!(handshake.username, &b"default"[..]);
        assert_eq!(handshake.auth_response.len(), 20);
        assert_eq!(handshake.auth_plugin, &b"mysql_native_password"[..]);
        assert_eq!(handshake.maxps, 16777216);
    }

    #[test]
    fn it_parses_request() {
        let data = &[
            0x03, 0x73, 0x65, 0x6c, 0x65, 0x63, 0x74, 0x20, 0x40, 0x40, 0x76, 0x65, 0x72, 0x73,
            0x69, 0x6f, 0x6e, 0x5f, 0x63, 0x6f, 0x6d, 0x6d, 0x65, 0x6e, 0x74, 0x20, 0x6c, 0x69,
            0x6d, 0x69, 0x74, 0x20, 0x31,
        ];
        let (_, cmd) = parse(&data[..]).unwrap();
        assert_eq!(
            cmd,
            Command::Query(&b"select @@version_comment limit 1"[..])
        );
    }

    #[test]
    fn it_handles_list_fields() {
        // mysql_list_fields (CommandByte::COM_FIELD_LIST / 0x04) has been deprecated in mysql 5.7 and will be removed
        // in a future version. The mysql command line tool issues one of these commands after
        // switching databases with USE <DB>.
        let data = &[
            0x04, 0x73, 0x65, 0x6c, 0x65, 0x63, 0x74, 0x20, 0x40, 0x40, 0x76, 0x65, 0x72, 0x73,
            0x69, 0x6f, 0x6e, 0x5f, 0x63, 0x6f, 0x6d, 0x6d, 0x65, 0x6e, 0x74, 0x20, 0x6c, 0x69,
            0x6d, 0x69, 0x74, 0x20, 0x31,
        ];
        let (_, cmd) = parse(&data[..]).unwrap();
        assert_eq!(
            cmd,
            Command::ListFields(&b"select @@version_comment limit 1"[..])
        );
    }

    #[test]
    fn it_parses_stmt_execute() {
        let data = &[0x17, 0x05, 0x00, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00];
        let (_, cmd) = parse(&data[..]).unwrap();
        assert_eq!(
            cmd,
            Command::Execute {
                stmt: 5,
                flags: 0,
                params: &[][..],
            }
        );
    }

    #[test]
    fn it_parses_change_user() {
        let mut data = Vec::new();
        data.extend(b"jon\0");
        data.push(3);
        data.extend(b"abc");
        data.extend(b"db\0");
        data.extend(&(45u16).to_le_bytes());
        data.extend(b"mysql_native_password\0");
        let caps = CapabilityFlags::CLIENT_SECURE_CONNECTION | CapabilityFlags::CLIENT_PLUGIN_AUTH;
        let (_, cu) = change_user(&data[..], caps).unwrap();
        assert_eq!(cu.username, b"jon");
        assert_eq!(cu.auth_response, b"abc");
        assert_eq!(cu.db.as_deref(), Some(&b"db"[..]));
        assert_eq!(cu.collation, Some(45));
        assert_eq!(cu.auth_plugin, b"mysql_native_password");
    }

    #[test]
    fn unknown_opcodes_are_reported() {
        let (_, cmd) = parse(&[0x2a, 1, 2, 3][..]).unwrap();
        assert_eq!(cmd, Command::Unknown(0x2a));
    }

    #[test]
    fn it_parses_connect_attrs() {
        let mut block = Vec::new();
        block.push(12u8);
        block.push(4u8);
        block.extend(b"_pid");
        block.push(5u8);
        block.extend(b"12345");
        let attrs = connect_attrs(&block[..]);
        assert_eq!(attrs.len(), 1);
        assert_eq!(attrs[0].0, b"_pid");
        assert_eq!(attrs[0].1, b"12345");
    }
}
