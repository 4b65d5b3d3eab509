use std::collections::HashMap;

use async_trait::async_trait;

use crate::error::Error;
use crate::params::{Params, QueryAttr};
use crate::resultset::QueryResponse;
use crate::Column;

/// A snapshot of per-connection facts, handed to [`Session::init`] after
/// authentication completes.
#[derive(Debug, Clone)]
pub struct ConnInfo {
    /// The server-assigned connection id.
    pub connection_id: u32,
    /// The authenticated identity.
    pub username: String,
    /// The database the client asked for in the handshake, if any.
    pub database: Option<String>,
    /// Peer address description, if the transport provided one.
    pub peer: Option<String>,
}

/// What a session reports for a `COM_STMT_PREPARE`.
#[derive(Debug, Clone, Default)]
pub struct PrepareInfo {
    /// Number of `?` placeholders in the statement.
    pub num_params: u16,
    /// Parameter definitions. May be empty, in which case anonymous
    /// definitions are synthesized for `num_params` placeholders.
    pub params: Vec<Column>,
    /// Definitions of the columns the statement will produce, if known.
    pub columns: Vec<Column>,
}

/// The query-execution half of the server, implemented by the embedding
/// application. The protocol engine never interprets SQL; every statement is
/// handed here and the returned rows are encoded onto the wire.
///
/// Errors returned as [`Error::Command`] are relayed to the client with
/// their code and SQLSTATE and the connection keeps serving; any other error
/// variant is reported as error 1105 (unknown error).
#[async_trait]
pub trait Session: Send {
    /// Called once after successful authentication.
    async fn init(&mut self, _conn: &ConnInfo) -> Result<(), Error> {
        Ok(())
    }

    /// Execute a `COM_QUERY` statement.
    async fn query(
        &mut self,
        sql: &str,
        attrs: &[QueryAttr<'_>],
    ) -> Result<QueryResponse, Error>;

    /// Called for `COM_STMT_PREPARE`. The default counts `?` placeholders
    /// and promises no result-set metadata.
    async fn prepare(&mut self, sql: &str) -> Result<PrepareInfo, Error> {
        Ok(PrepareInfo {
            num_params: count_placeholders(sql),
            ..PrepareInfo::default()
        })
    }

    /// Execute a previously prepared statement with bound parameters.
    async fn execute(
        &mut self,
        id: u32,
        params: Params<'_>,
        attrs: &[QueryAttr<'_>],
    ) -> Result<QueryResponse, Error>;

    /// Switch the current database (`COM_INIT_DB` / `USE`). Unknown
    /// databases should fail with error 1049.
    async fn use_db(&mut self, _db: &str) -> Result<(), Error> {
        Ok(())
    }

    /// Table layout for `COM_FIELD_LIST`, keyed by table name.
    async fn schema(&mut self) -> Result<HashMap<String, Vec<Column>>, Error> {
        Ok(HashMap::new())
    }

    /// Clear session-scoped state (`COM_RESET_CONNECTION`, `COM_CHANGE_USER`).
    async fn reset(&mut self) -> Result<(), Error> {
        Ok(())
    }

    /// Called once when the connection ends, however it ends.
    async fn close(&mut self) {}
}

/// Count `?` placeholders outside string and identifier quoting.
pub(crate) fn count_placeholders(sql: &str) -> u16 {
    let mut count = 0u16;
    let mut quote: Option<char> = None;
    let mut escaped = false;
    for c in sql.chars() {
        match quote {
            Some(q) => {
                if escaped {
                    escaped = false;
                } else if c == '\\' && q != '`' {
                    escaped = true;
                } else if c == q {
                    quote = None;
                }
            }
            None => match c {
                '\'' | '"' | '`' => quote = Some(c),
                '?' => count = count.saturating_add(1),
                _ => {}
            },
        }
    }
    count
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_bare_placeholders() {
        assert_eq!(count_placeholders("SELECT ?, ?"), 2);
        assert_eq!(count_placeholders("SELECT 1"), 0);
    }

    #[test]
    fn ignores_placeholders_in_strings() {
        assert_eq!(count_placeholders("SELECT '?', ?"), 1);
        assert_eq!(count_placeholders("SELECT \"a?b\""), 0);
        assert_eq!(count_placeholders("SELECT `o?dd` FROM t WHERE a = ?"), 1);
    }

    #[test]
    fn honors_backslash_escapes() {
        assert_eq!(count_placeholders(r"SELECT 'it\'s ?', ?"), 1);
    }
}
