//! MySQL error codes, as defined by the server error catalog.
//!
//! https://dev.mysql.com/doc/mysql-errors/8.0/en/server-error-reference.html

/// MySQL error type
#[allow(non_camel_case_types)]
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
#[repr(u16)]
pub enum ErrorKind {
    /// Too many connections
    ER_CON_COUNT_ERROR = 1040,
    /// Access denied for user to database
    ER_DBACCESS_DENIED_ERROR = 1044,
    /// Access denied for user (using password)
    ER_ACCESS_DENIED_ERROR = 1045,
    /// No database selected
    ER_NO_DB_ERROR = 1046,
    /// Unknown command
    ER_UNKNOWN_COM_ERROR = 1047,
    /// Bad handshake
    ER_HANDSHAKE_ERROR = 1043,
    /// Unknown database
    ER_BAD_DB_ERROR = 1049,
    /// Unknown table
    ER_BAD_TABLE_ERROR = 1051,
    /// Unknown column
    ER_BAD_FIELD_ERROR = 1054,
    /// Duplicate column name
    ER_DUP_FIELDNAME = 1060,
    /// Duplicate key name
    ER_DUP_KEYNAME = 1061,
    /// Duplicate entry for key
    ER_DUP_ENTRY = 1062,
    /// Syntax error
    ER_PARSE_ERROR = 1064,
    /// Query was empty
    ER_EMPTY_QUERY = 1065,
    /// Unknown character set
    ER_UNKNOWN_CHARACTER_SET = 1115,
    /// Table doesn't exist
    ER_NO_SUCH_TABLE = 1146,
    /// Got a packet bigger than 'max_allowed_packet' bytes
    ER_NET_PACKET_TOO_LARGE = 1153,
    /// Got packets out of order
    ER_NET_PACKETS_OUT_OF_ORDER = 1156,
    /// Aborted connection
    ER_ABORTING_CONNECTION = 1152,
    /// Unknown error
    ER_UNKNOWN_ERROR = 1105,
    /// Unknown procedure
    ER_UNKNOWN_PROCEDURE = 1106,
    /// Incorrect parameter count to procedure
    ER_WRONG_PARAMCOUNT_TO_PROCEDURE = 1107,
    /// Unknown system variable
    ER_UNKNOWN_SYSTEM_VARIABLE = 1193,
    /// Lock wait timeout exceeded
    ER_LOCK_WAIT_TIMEOUT = 1205,
    /// Access denied; you need (at least one of) this privilege(s)
    ER_SPECIFIC_ACCESS_DENIED_ERROR = 1227,
    /// Incorrect value for variable
    ER_WRONG_VALUE_FOR_VAR = 1231,
    /// Feature not supported yet
    ER_NOT_SUPPORTED_YET = 1235,
    /// Unknown prepared statement handler
    ER_UNKNOWN_STMT_HANDLER = 1243,
    /// Feature disabled
    ER_FEATURE_DISABLED = 1289,
    /// Statement not allowed in stored procedure (used for unsupported
    /// commands inside the prepared-statement protocol)
    ER_UNSUPPORTED_PS = 1295,
    /// Incorrect arguments
    ER_WRONG_ARGUMENTS = 1210,
    /// Deadlock found when trying to get lock
    ER_LOCK_DEADLOCK = 1213,
    /// The statement has no open cursor
    ER_STMT_HAS_NO_OPEN_CURSOR = 1421,
    /// Malformed communication packet
    ER_MALFORMED_PACKET = 1835,
    /// User does not exist
    ER_USER_DOES_NOT_EXIST = 3162,
    /// Session was killed
    ER_SESSION_WAS_KILLED = 3169,
}

impl From<ErrorKind> for u16 {
    fn from(e: ErrorKind) -> Self {
        e as u16
    }
}

impl ErrorKind {
    /// SQLSTATE is a code which identifies SQL error conditions. It is composed
    /// by five characters: first two characters that indicate a class, and then
    /// three that indicate a subclass.
    ///
    /// https://mariadb.com/kb/en/library/sqlstate/
    pub fn sqlstate(&self) -> &'static [u8; 5] {
        match *self {
            ErrorKind::ER_CON_COUNT_ERROR => b"08004",
            ErrorKind::ER_HANDSHAKE_ERROR
            | ErrorKind::ER_NET_PACKET_TOO_LARGE
            | ErrorKind::ER_NET_PACKETS_OUT_OF_ORDER
            | ErrorKind::ER_ABORTING_CONNECTION
            | ErrorKind::ER_UNKNOWN_COM_ERROR => b"08S01",
            ErrorKind::ER_DBACCESS_DENIED_ERROR
            | ErrorKind::ER_ACCESS_DENIED_ERROR => b"28000",
            ErrorKind::ER_NO_DB_ERROR => b"3D000",
            ErrorKind::ER_BAD_DB_ERROR => b"42000",
            ErrorKind::ER_BAD_TABLE_ERROR => b"42S02",
            ErrorKind::ER_NO_SUCH_TABLE => b"42S02",
            ErrorKind::ER_BAD_FIELD_ERROR => b"42S22",
            ErrorKind::ER_DUP_FIELDNAME => b"42S21",
            ErrorKind::ER_DUP_KEYNAME => b"42000",
            ErrorKind::ER_DUP_ENTRY => b"23000",
            ErrorKind::ER_PARSE_ERROR
            | ErrorKind::ER_EMPTY_QUERY
            | ErrorKind::ER_UNKNOWN_PROCEDURE
            | ErrorKind::ER_WRONG_PARAMCOUNT_TO_PROCEDURE
            | ErrorKind::ER_SPECIFIC_ACCESS_DENIED_ERROR
            | ErrorKind::ER_WRONG_VALUE_FOR_VAR
            | ErrorKind::ER_NOT_SUPPORTED_YET => b"42000",
            ErrorKind::ER_UNKNOWN_CHARACTER_SET => b"42000",
            ErrorKind::ER_LOCK_WAIT_TIMEOUT => b"HY000",
            ErrorKind::ER_LOCK_DEADLOCK => b"40001",
            ErrorKind::ER_WRONG_ARGUMENTS => b"HY000",
            ErrorKind::ER_UNKNOWN_SYSTEM_VARIABLE
            | ErrorKind::ER_STMT_HAS_NO_OPEN_CURSOR
            | ErrorKind::ER_UNKNOWN_STMT_HANDLER
            | ErrorKind::ER_FEATURE_DISABLED
            | ErrorKind::ER_UNSUPPORTED_PS
            | ErrorKind::ER_MALFORMED_PACKET
            | ErrorKind::ER_USER_DOES_NOT_EXIST
            | ErrorKind::ER_SESSION_WAS_KILLED
            | ErrorKind::ER_UNKNOWN_ERROR => b"HY000",
        }
    }
}
