use crate::error::Error;
use crate::myc::constants::{CapabilityFlags, ColumnType};
use crate::value::Value;
use crate::StatementData;

/// A single parameter value provided by a client when issuing an `EXECUTE`
/// command.
#[derive(Debug)]
pub struct ParamValue<'a> {
    /// The value provided for this parameter.
    pub value: Value<'a>,
    /// The column type assigned to this parameter.
    pub coltype: ColumnType,
}

/// The decoded parameters of a `COM_STMT_EXECUTE` command, in statement
/// order, with any `COM_STMT_SEND_LONG_DATA` buffers already merged in.
#[derive(Debug, Default)]
pub struct Params<'a>(Vec<ParamValue<'a>>);

impl<'a> Params<'a> {
    /// Number of parameters the client bound.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True if the statement was executed without parameters.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate over the bound parameters.
    pub fn iter(&self) -> std::slice::Iter<'_, ParamValue<'a>> {
        self.0.iter()
    }
}

impl<'a> IntoIterator for Params<'a> {
    type Item = ParamValue<'a>;
    type IntoIter = std::vec::IntoIter<ParamValue<'a>>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

/// A query attribute, carried by `COM_QUERY` and `COM_STMT_EXECUTE` when
/// `CLIENT_QUERY_ATTRIBUTES` is negotiated.
#[derive(Debug)]
pub struct QueryAttr<'a> {
    /// Attribute name.
    pub name: String,
    /// Attribute value.
    pub value: Value<'a>,
}

fn malformed(what: &str) -> Error {
    Error::Protocol(format!("malformed parameter block: {}", what))
}

fn take<'a>(input: &mut &'a [u8], n: usize) -> Result<&'a [u8], Error> {
    if input.len() < n {
        return Err(malformed("truncated"));
    }
    let (head, rest) = input.split_at(n);
    *input = rest;
    Ok(head)
}

pub(crate) fn read_lenenc(input: &mut &[u8]) -> Result<u64, Error> {
    let b = take(input, 1)?[0];
    let size = match b {
        0xfc => 2,
        0xfd => 3,
        0xfe => 8,
        _ => return Ok(u64::from(b)),
    };
    let bytes = take(input, size)?;
    let mut buf = [0u8; 8];
    buf[..size].copy_from_slice(bytes);
    Ok(u64::from_le_bytes(buf))
}

// https://dev.mysql.com/doc/dev/mysql-server/latest/page_protocol_binary_resultset.html#sect_protocol_binary_resultset_row
// NULL-bitmap-byte = ((field-pos + offset) / 8)
// NULL-bitmap-bit  = ((field-pos + offset) % 8)
fn null_bit(bitmap: &[u8], i: usize) -> bool {
    bitmap[i / 8] & (1 << (i % 8)) != 0
}

/// Decode the shared parameter block layout: NULL bitmap, new-params-bound
/// flag, parameter types (with names under `CLIENT_QUERY_ATTRIBUTES`), then
/// the binary values.
///
/// `stmt` supplies the bound-type cache and long-data buffers when decoding
/// a `COM_STMT_EXECUTE`; query attributes for `COM_QUERY` pass `None`.
fn read_param_block<'a>(
    input: &mut &'a [u8],
    total: usize,
    named: bool,
    stmt: Option<&'a mut StatementData>,
) -> Result<Vec<(String, ParamValue<'a>)>, Error> {
    let bitmap = take(input, (total + 7) / 8)?;
    let new_params_bound = take(input, 1)?[0] != 0;

    let num_stmt_params = stmt.as_ref().map_or(0, |s| s.params as usize).min(total);

    let mut types = Vec::with_capacity(total);
    if new_params_bound {
        for _ in 0..total {
            let t = take(input, 2)?;
            let coltype = ColumnType::try_from(t[0])
                .map_err(|_| malformed("unknown parameter type"))?;
            let unsigned = t[1] & 0x80 != 0;
            let name = if named {
                let len = read_lenenc(input)? as usize;
                String::from_utf8_lossy(take(input, len)?).into_owned()
            } else {
                String::new()
            };
            types.push((coltype, unsigned, name));
        }
    }

    // downgrade to a shared borrow so values may point into the long-data
    // buffers; the bound-type cache update has to happen first
    let stmt: Option<&'a StatementData> = match stmt {
        Some(s) => {
            if new_params_bound {
                s.bound_types = types
                    .iter()
                    .take(num_stmt_params)
                    .map(|&(t, u, _)| (t, u))
                    .collect();
            } else {
                if s.bound_types.len() < num_stmt_params {
                    return Err(malformed(
                        "no parameter types bound by this or any previous execute",
                    ));
                }
                types = s
                    .bound_types
                    .iter()
                    .map(|&(t, u)| (t, u, String::new()))
                    .collect();
                if types.len() != total {
                    return Err(malformed("parameter count does not match bound types"));
                }
            }
            Some(&*s)
        }
        None => {
            if !new_params_bound {
                return Err(malformed("attribute block without bound types"));
            }
            None
        }
    };

    let mut out = Vec::with_capacity(total);
    for (i, (coltype, unsigned, name)) in types.into_iter().enumerate() {
        let value = if null_bit(bitmap, i) {
            Value::null()
        } else if let Some(data) = stmt
            .filter(|_| i < num_stmt_params)
            .and_then(|s| s.long_data.get(&(i as u16)))
        {
            Value::bytes(&data[..])
        } else {
            Value::parse_from(input, coltype, unsigned)
                .map_err(|e| malformed(&e.to_string()))?
        };
        out.push((name, ParamValue { value, coltype }));
    }
    Ok(out)
}

/// Decode the parameter section of a `COM_STMT_EXECUTE` payload into
/// statement parameters and trailing query attributes.
pub(crate) fn parse_execute_params<'a>(
    mut input: &'a [u8],
    capabilities: CapabilityFlags,
    stmt: &'a mut StatementData,
    param_count_available: bool,
) -> Result<(Params<'a>, Vec<QueryAttr<'a>>), Error> {
    let num_params = stmt.params as usize;
    let attrs = capabilities.contains(CapabilityFlags::CLIENT_QUERY_ATTRIBUTES);

    let mut total = num_params;
    if (num_params > 0 || (attrs && param_count_available)) && attrs {
        total = read_lenenc(&mut input)? as usize;
    }
    if total == 0 {
        return Ok((Params::default(), Vec::new()));
    }

    let num_stmt_params = num_params.min(total);
    let mut all = read_param_block(&mut input, total, attrs, Some(stmt))?;
    let attr_values = all.split_off(num_stmt_params);

    let params = Params(all.into_iter().map(|(_, p)| p).collect());
    let attrs = attr_values
        .into_iter()
        .map(|(name, p)| QueryAttr {
            name,
            value: p.value,
        })
        .collect();
    Ok((params, attrs))
}

/// Decode the query-attribute prefix of a `COM_QUERY` payload. Consumes
/// nothing unless `CLIENT_QUERY_ATTRIBUTES` was negotiated.
pub(crate) fn parse_query_attrs<'a>(
    input: &mut &'a [u8],
    capabilities: CapabilityFlags,
) -> Result<Vec<QueryAttr<'a>>, Error> {
    if !capabilities.contains(CapabilityFlags::CLIENT_QUERY_ATTRIBUTES) {
        return Ok(Vec::new());
    }
    let count = read_lenenc(input)? as usize;
    let _parameter_set_count = read_lenenc(input)?; // always 1
    if count == 0 {
        return Ok(Vec::new());
    }
    let all = read_param_block(input, count, true, None)?;
    Ok(all
        .into_iter()
        .map(|(name, p)| QueryAttr {
            name,
            value: p.value,
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::myc::io::WriteMysqlExt;

    #[test]
    fn lenenc_int_roundtrips_in_shortest_form() {
        for (n, encoded_len) in [
            (0u64, 1usize),
            (250, 1),
            (251, 3),
            (0xFFFF, 3),
            (0x1_0000, 4),
            (0xFF_FFFF, 4),
            (0x100_0000, 9),
            (u64::MAX, 9),
        ] {
            let mut buf = Vec::new();
            buf.write_lenenc_int(n).unwrap();
            assert_eq!(buf.len(), encoded_len, "encoding of {} is not shortest", n);
            let mut input = &buf[..];
            assert_eq!(read_lenenc(&mut input).unwrap(), n);
            assert!(input.is_empty());
        }
    }

    #[test]
    fn execute_params_with_null_and_long() {
        // two parameters: [NULL, 42] as MYSQL_TYPE_LONG
        let mut stmt = StatementData {
            params: 2,
            ..StatementData::default()
        };
        let mut payload = Vec::new();
        payload.push(0b0000_0001); // NULL bitmap, bit 0 set
        payload.push(1); // new-params-bound
        payload.extend([ColumnType::MYSQL_TYPE_NULL as u8, 0]);
        payload.extend([ColumnType::MYSQL_TYPE_LONG as u8, 0]);
        payload.extend(42i32.to_le_bytes());

        let (params, attrs) =
            parse_execute_params(&payload[..], CapabilityFlags::empty(), &mut stmt, false)
                .unwrap();
        assert!(attrs.is_empty());
        assert_eq!(params.len(), 2);
        let mut it = params.into_iter();
        assert!(it.next().unwrap().value.is_null());
        let p = it.next().unwrap();
        assert_eq!(p.coltype, ColumnType::MYSQL_TYPE_LONG);
        assert_eq!(i32::from(p.value), 42);
    }

    #[test]
    fn execute_params_reuse_bound_types() {
        let mut stmt = StatementData {
            params: 1,
            bound_types: vec![(ColumnType::MYSQL_TYPE_LONGLONG, false)],
            ..StatementData::default()
        };
        let mut payload = Vec::new();
        payload.push(0); // NULL bitmap
        payload.push(0); // new-params-bound = 0: reuse previous types
        payload.extend(7i64.to_le_bytes());

        let (params, _) =
            parse_execute_params(&payload[..], CapabilityFlags::empty(), &mut stmt, false)
                .unwrap();
        assert_eq!(i64::from(params.into_iter().next().unwrap().value), 7);
    }

    #[test]
    fn execute_params_merge_long_data() {
        let mut stmt = StatementData {
            params: 2,
            ..StatementData::default()
        };
        stmt.long_data.insert(1, b"chunky".to_vec());

        let mut payload = Vec::new();
        payload.push(0);
        payload.push(1);
        payload.extend([ColumnType::MYSQL_TYPE_LONG as u8, 0]);
        payload.extend([ColumnType::MYSQL_TYPE_BLOB as u8, 0]);
        payload.extend(1i32.to_le_bytes());
        // no inline value for parameter 1; it came via SEND_LONG_DATA

        let (params, _) =
            parse_execute_params(&payload[..], CapabilityFlags::empty(), &mut stmt, false)
                .unwrap();
        let values: Vec<_> = params.into_iter().collect();
        assert_eq!(i32::from(values[0].value), 1);
        assert_eq!(<&[u8]>::from(values[1].value), b"chunky");
    }

    #[test]
    fn execute_params_split_off_attributes() {
        let caps = CapabilityFlags::CLIENT_QUERY_ATTRIBUTES;
        let mut stmt = StatementData {
            params: 1,
            ..StatementData::default()
        };
        let mut payload = Vec::new();
        payload.push(2); // lenenc total parameter count: 1 stmt param + 1 attr
        payload.push(0); // NULL bitmap
        payload.push(1); // new-params-bound
        payload.extend([ColumnType::MYSQL_TYPE_LONG as u8, 0]);
        payload.push(0); // empty name for the statement parameter
        payload.extend([ColumnType::MYSQL_TYPE_VAR_STRING as u8, 0]);
        payload.push(5);
        payload.extend(b"trace");
        payload.extend(9i32.to_le_bytes());
        payload.push(2);
        payload.extend(b"id");

        let (params, attrs) = parse_execute_params(&payload[..], caps, &mut stmt, true).unwrap();
        assert_eq!(params.len(), 1);
        assert_eq!(attrs.len(), 1);
        assert_eq!(attrs[0].name, "trace");
        assert_eq!(<&str>::from(attrs[0].value), "id");
    }

    #[test]
    fn query_attrs_roundtrip() {
        let caps = CapabilityFlags::CLIENT_QUERY_ATTRIBUTES;
        let mut payload = Vec::new();
        payload.push(1); // parameter count
        payload.push(1); // parameter set count
        payload.push(0); // NULL bitmap
        payload.push(1); // new-params-bound
        payload.extend([ColumnType::MYSQL_TYPE_VAR_STRING as u8, 0]);
        payload.push(4);
        payload.extend(b"name");
        payload.push(3);
        payload.extend(b"val");
        payload.extend(b"SELECT 1");

        let mut input = &payload[..];
        let attrs = parse_query_attrs(&mut input, caps).unwrap();
        assert_eq!(attrs.len(), 1);
        assert_eq!(attrs[0].name, "name");
        assert_eq!(<&str>::from(attrs[0].value), "val");
        assert_eq!(input, b"SELECT 1");
    }

    #[test]
    fn query_attrs_ignored_without_capability() {
        let mut input = &b"SELECT 1"[..];
        let attrs = parse_query_attrs(&mut input, CapabilityFlags::empty()).unwrap();
        assert!(attrs.is_empty());
        assert_eq!(input, b"SELECT 1");
    }
}
