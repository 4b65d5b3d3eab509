use std::io::{self, Write};

use byteorder::{LittleEndian, WriteBytesExt};
use chrono::{Datelike, NaiveDate, NaiveDateTime};

use crate::myc::constants::{ColumnFlags, ColumnType};
use crate::myc::io::WriteMysqlExt;
use crate::myc::value::Value as MysqlValue;
use crate::Column;

/// Implementors of this trait can be sent to MySQL clients as values, in both
/// the text protocol (`COM_QUERY` result rows) and the binary protocol
/// (`COM_STMT_EXECUTE` result rows).
pub trait ToMysqlValue {
    /// Encode this value in the text protocol: a length-encoded string
    /// holding the canonical textual representation (NULL is the single byte
    /// 0xFB).
    fn to_mysql_text<W: Write>(&self, w: &mut W) -> io::Result<()>;

    /// Encode this value in the binary protocol, according to the type
    /// declared by the column it belongs to.
    fn to_mysql_bin<W: Write>(&self, w: &mut W, c: &Column) -> io::Result<()>;

    /// Whether this value is NULL, in which case the binary protocol places
    /// it in the row's NULL bitmap rather than in the value stream.
    fn is_null(&self) -> bool {
        false
    }
}

fn bad<E: std::fmt::Display>(e: E) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, e.to_string())
}

fn text_str<W: Write>(w: &mut W, s: &[u8]) -> io::Result<()> {
    w.write_lenenc_str(s).map(|_| ())
}

// Integer columns are written at the width the column definition promised,
// not the width of the Rust value.
fn write_int<W: Write>(w: &mut W, v: i128, c: &Column) -> io::Result<()> {
    let unsigned = c.colflags.contains(ColumnFlags::UNSIGNED_FLAG);
    match c.coltype {
        ColumnType::MYSQL_TYPE_TINY => {
            if unsigned {
                w.write_u8(u8::try_from(v).map_err(bad)?)
            } else {
                w.write_i8(i8::try_from(v).map_err(bad)?)
            }
        }
        ColumnType::MYSQL_TYPE_SHORT | ColumnType::MYSQL_TYPE_YEAR => {
            if unsigned {
                w.write_u16::<LittleEndian>(u16::try_from(v).map_err(bad)?)
            } else {
                w.write_i16::<LittleEndian>(i16::try_from(v).map_err(bad)?)
            }
        }
        ColumnType::MYSQL_TYPE_LONG | ColumnType::MYSQL_TYPE_INT24 => {
            if unsigned {
                w.write_u32::<LittleEndian>(u32::try_from(v).map_err(bad)?)
            } else {
                w.write_i32::<LittleEndian>(i32::try_from(v).map_err(bad)?)
            }
        }
        ColumnType::MYSQL_TYPE_LONGLONG => {
            if unsigned {
                w.write_u64::<LittleEndian>(u64::try_from(v).map_err(bad)?)
            } else {
                w.write_i64::<LittleEndian>(i64::try_from(v).map_err(bad)?)
            }
        }
        ct => Err(bad(format!("integer value for non-integer column {:?}", ct))),
    }
}

fn is_string_like(ct: ColumnType) -> bool {
    matches!(
        ct,
        ColumnType::MYSQL_TYPE_STRING
            | ColumnType::MYSQL_TYPE_VAR_STRING
            | ColumnType::MYSQL_TYPE_VARCHAR
            | ColumnType::MYSQL_TYPE_BLOB
            | ColumnType::MYSQL_TYPE_TINY_BLOB
            | ColumnType::MYSQL_TYPE_MEDIUM_BLOB
            | ColumnType::MYSQL_TYPE_LONG_BLOB
            | ColumnType::MYSQL_TYPE_SET
            | ColumnType::MYSQL_TYPE_ENUM
            | ColumnType::MYSQL_TYPE_DECIMAL
            | ColumnType::MYSQL_TYPE_NEWDECIMAL
            | ColumnType::MYSQL_TYPE_BIT
            | ColumnType::MYSQL_TYPE_GEOMETRY
            | ColumnType::MYSQL_TYPE_JSON
    )
}

// https://mariadb.com/kb/en/library/resultset-row/#timestamp-binary-encoding
fn write_bin_date<W: Write>(
    w: &mut W,
    (y, mo, d, h, mi, s, us): (u16, u8, u8, u8, u8, u8, u32),
) -> io::Result<()> {
    if us != 0 {
        w.write_u8(11)?;
        w.write_u16::<LittleEndian>(y)?;
        w.write_u8(mo)?;
        w.write_u8(d)?;
        w.write_u8(h)?;
        w.write_u8(mi)?;
        w.write_u8(s)?;
        w.write_u32::<LittleEndian>(us)
    } else if h != 0 || mi != 0 || s != 0 {
        w.write_u8(7)?;
        w.write_u16::<LittleEndian>(y)?;
        w.write_u8(mo)?;
        w.write_u8(d)?;
        w.write_u8(h)?;
        w.write_u8(mi)?;
        w.write_u8(s)
    } else if y != 0 || mo != 0 || d != 0 {
        w.write_u8(4)?;
        w.write_u16::<LittleEndian>(y)?;
        w.write_u8(mo)?;
        w.write_u8(d)
    } else {
        w.write_u8(0)
    }
}

// https://mariadb.com/kb/en/library/resultset-row/#time-binary-encoding
fn write_bin_time<W: Write>(
    w: &mut W,
    (neg, d, h, mi, s, us): (bool, u32, u8, u8, u8, u32),
) -> io::Result<()> {
    if us != 0 {
        w.write_u8(12)?;
        w.write_u8(neg as u8)?;
        w.write_u32::<LittleEndian>(d)?;
        w.write_u8(h)?;
        w.write_u8(mi)?;
        w.write_u8(s)?;
        w.write_u32::<LittleEndian>(us)
    } else if d != 0 || h != 0 || mi != 0 || s != 0 {
        w.write_u8(8)?;
        w.write_u8(neg as u8)?;
        w.write_u32::<LittleEndian>(d)?;
        w.write_u8(h)?;
        w.write_u8(mi)?;
        w.write_u8(s)
    } else {
        w.write_u8(0)
    }
}

fn date_text((y, mo, d, h, mi, s, us): (u16, u8, u8, u8, u8, u8, u32)) -> String {
    if h == 0 && mi == 0 && s == 0 && us == 0 {
        format!("{:04}-{:02}-{:02}", y, mo, d)
    } else if us == 0 {
        format!("{:04}-{:02}-{:02} {:02}:{:02}:{:02}", y, mo, d, h, mi, s)
    } else {
        format!(
            "{:04}-{:02}-{:02} {:02}:{:02}:{:02}.{:06}",
            y, mo, d, h, mi, s, us
        )
    }
}

fn time_text((neg, d, h, mi, s, us): (bool, u32, u8, u8, u8, u32)) -> String {
    let sign = if neg { "-" } else { "" };
    let hours = u64::from(d) * 24 + u64::from(h);
    if us == 0 {
        format!("{}{:02}:{:02}:{:02}", sign, hours, mi, s)
    } else {
        format!("{}{:02}:{:02}:{:02}.{:06}", sign, hours, mi, s, us)
    }
}

impl ToMysqlValue for MysqlValue {
    fn to_mysql_text<W: Write>(&self, w: &mut W) -> io::Result<()> {
        match *self {
            MysqlValue::NULL => w.write_u8(0xfb),
            MysqlValue::Bytes(ref b) => text_str(w, b),
            MysqlValue::Int(n) => text_str(w, n.to_string().as_bytes()),
            MysqlValue::UInt(n) => text_str(w, n.to_string().as_bytes()),
            MysqlValue::Float(f) => text_str(w, f.to_string().as_bytes()),
            MysqlValue::Double(f) => text_str(w, f.to_string().as_bytes()),
            MysqlValue::Date(y, mo, d, h, mi, s, us) => {
                text_str(w, date_text((y, mo, d, h, mi, s, us)).as_bytes())
            }
            MysqlValue::Time(neg, d, h, mi, s, us) => {
                text_str(w, time_text((neg, d, h, mi, s, us)).as_bytes())
            }
        }
    }

    fn to_mysql_bin<W: Write>(&self, w: &mut W, c: &Column) -> io::Result<()> {
        match *self {
            MysqlValue::NULL => Err(bad("NULL must be encoded through the NULL bitmap")),
            MysqlValue::Bytes(ref b) => {
                if is_string_like(c.coltype) {
                    w.write_lenenc_str(b).map(|_| ())
                } else {
                    Err(bad(format!(
                        "string value for non-string column {:?}",
                        c.coltype
                    )))
                }
            }
            MysqlValue::Int(n) => write_int(w, i128::from(n), c),
            MysqlValue::UInt(n) => write_int(w, i128::from(n), c),
            MysqlValue::Float(f) => match c.coltype {
                ColumnType::MYSQL_TYPE_FLOAT => w.write_f32::<LittleEndian>(f),
                ColumnType::MYSQL_TYPE_DOUBLE => w.write_f64::<LittleEndian>(f64::from(f)),
                ct => Err(bad(format!("float value for non-float column {:?}", ct))),
            },
            MysqlValue::Double(f) => match c.coltype {
                ColumnType::MYSQL_TYPE_DOUBLE => w.write_f64::<LittleEndian>(f),
                ColumnType::MYSQL_TYPE_FLOAT => w.write_f32::<LittleEndian>(f as f32),
                ct => Err(bad(format!("double value for non-double column {:?}", ct))),
            },
            MysqlValue::Date(y, mo, d, h, mi, s, us) => match c.coltype {
                ColumnType::MYSQL_TYPE_DATE
                | ColumnType::MYSQL_TYPE_DATETIME
                | ColumnType::MYSQL_TYPE_TIMESTAMP => {
                    write_bin_date(w, (y, mo, d, h, mi, s, us))
                }
                ct => Err(bad(format!("date value for non-date column {:?}", ct))),
            },
            MysqlValue::Time(neg, d, h, mi, s, us) => match c.coltype {
                ColumnType::MYSQL_TYPE_TIME => write_bin_time(w, (neg, d, h, mi, s, us)),
                ct => Err(bad(format!("time value for non-time column {:?}", ct))),
            },
        }
    }

    fn is_null(&self) -> bool {
        matches!(*self, MysqlValue::NULL)
    }
}

macro_rules! forward_int {
    ($t:ty) => {
        impl ToMysqlValue for $t {
            fn to_mysql_text<W: Write>(&self, w: &mut W) -> io::Result<()> {
                text_str(w, self.to_string().as_bytes())
            }

            fn to_mysql_bin<W: Write>(&self, w: &mut W, c: &Column) -> io::Result<()> {
                write_int(w, i128::from(*self), c)
            }
        }
    };
}

forward_int!(i8);
forward_int!(i16);
forward_int!(i32);
forward_int!(i64);
forward_int!(u8);
forward_int!(u16);
forward_int!(u32);
forward_int!(u64);

impl ToMysqlValue for f32 {
    fn to_mysql_text<W: Write>(&self, w: &mut W) -> io::Result<()> {
        text_str(w, self.to_string().as_bytes())
    }

    fn to_mysql_bin<W: Write>(&self, w: &mut W, c: &Column) -> io::Result<()> {
        MysqlValue::Float(*self).to_mysql_bin(w, c)
    }
}

impl ToMysqlValue for f64 {
    fn to_mysql_text<W: Write>(&self, w: &mut W) -> io::Result<()> {
        text_str(w, self.to_string().as_bytes())
    }

    fn to_mysql_bin<W: Write>(&self, w: &mut W, c: &Column) -> io::Result<()> {
        MysqlValue::Double(*self).to_mysql_bin(w, c)
    }
}

impl ToMysqlValue for str {
    fn to_mysql_text<W: Write>(&self, w: &mut W) -> io::Result<()> {
        text_str(w, self.as_bytes())
    }

    fn to_mysql_bin<W: Write>(&self, w: &mut W, c: &Column) -> io::Result<()> {
        MysqlValue::Bytes(self.as_bytes().to_vec()).to_mysql_bin(w, c)
    }
}

impl ToMysqlValue for [u8] {
    fn to_mysql_text<W: Write>(&self, w: &mut W) -> io::Result<()> {
        text_str(w, self)
    }

    fn to_mysql_bin<W: Write>(&self, w: &mut W, c: &Column) -> io::Result<()> {
        MysqlValue::Bytes(self.to_vec()).to_mysql_bin(w, c)
    }
}

impl<'a, T: ToMysqlValue + ?Sized> ToMysqlValue for &'a T {
    fn to_mysql_text<W: Write>(&self, w: &mut W) -> io::Result<()> {
        (*self).to_mysql_text(w)
    }

    fn to_mysql_bin<W: Write>(&self, w: &mut W, c: &Column) -> io::Result<()> {
        (*self).to_mysql_bin(w, c)
    }

    fn is_null(&self) -> bool {
        (*self).is_null()
    }
}

impl ToMysqlValue for String {
    fn to_mysql_text<W: Write>(&self, w: &mut W) -> io::Result<()> {
        self.as_str().to_mysql_text(w)
    }

    fn to_mysql_bin<W: Write>(&self, w: &mut W, c: &Column) -> io::Result<()> {
        self.as_str().to_mysql_bin(w, c)
    }
}

impl ToMysqlValue for Vec<u8> {
    fn to_mysql_text<W: Write>(&self, w: &mut W) -> io::Result<()> {
        self[..].to_mysql_text(w)
    }

    fn to_mysql_bin<W: Write>(&self, w: &mut W, c: &Column) -> io::Result<()> {
        self[..].to_mysql_bin(w, c)
    }
}

impl<T: ToMysqlValue> ToMysqlValue for Option<T> {
    fn to_mysql_text<W: Write>(&self, w: &mut W) -> io::Result<()> {
        match *self {
            Some(ref v) => v.to_mysql_text(w),
            None => w.write_u8(0xfb),
        }
    }

    fn to_mysql_bin<W: Write>(&self, w: &mut W, c: &Column) -> io::Result<()> {
        match *self {
            Some(ref v) => v.to_mysql_bin(w, c),
            None => Err(bad("NULL must be encoded through the NULL bitmap")),
        }
    }

    fn is_null(&self) -> bool {
        self.is_none()
    }
}

impl ToMysqlValue for NaiveDate {
    fn to_mysql_text<W: Write>(&self, w: &mut W) -> io::Result<()> {
        MysqlValue::from(*self).to_mysql_text(w)
    }

    fn to_mysql_bin<W: Write>(&self, w: &mut W, c: &Column) -> io::Result<()> {
        match c.coltype {
            ColumnType::MYSQL_TYPE_DATE => write_bin_date(
                w,
                (
                    self.year() as u16,
                    self.month() as u8,
                    self.day() as u8,
                    0,
                    0,
                    0,
                    0,
                ),
            ),
            ct => Err(bad(format!("date value for non-date column {:?}", ct))),
        }
    }
}

impl ToMysqlValue for NaiveDateTime {
    fn to_mysql_text<W: Write>(&self, w: &mut W) -> io::Result<()> {
        MysqlValue::from(*self).to_mysql_text(w)
    }

    fn to_mysql_bin<W: Write>(&self, w: &mut W, c: &Column) -> io::Result<()> {
        MysqlValue::from(*self).to_mysql_bin(w, c)
    }
}

impl ToMysqlValue for std::time::Duration {
    fn to_mysql_text<W: Write>(&self, w: &mut W) -> io::Result<()> {
        let secs = self.as_secs();
        let us = self.subsec_micros();
        text_str(
            w,
            time_text((
                false,
                (secs / 86_400) as u32,
                ((secs % 86_400) / 3_600) as u8,
                ((secs % 3_600) / 60) as u8,
                (secs % 60) as u8,
                us,
            ))
            .as_bytes(),
        )
    }

    fn to_mysql_bin<W: Write>(&self, w: &mut W, c: &Column) -> io::Result<()> {
        let secs = self.as_secs();
        let us = self.subsec_micros();
        match c.coltype {
            ColumnType::MYSQL_TYPE_TIME => write_bin_time(
                w,
                (
                    false,
                    (secs / 86_400) as u32,
                    ((secs % 86_400) / 3_600) as u8,
                    ((secs % 3_600) / 60) as u8,
                    (secs % 60) as u8,
                    us,
                ),
            ),
            ct => Err(bad(format!("time value for non-time column {:?}", ct))),
        }
    }
}
