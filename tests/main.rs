//! End-to-end tests driving the server with a real MySQL client.

use std::future::Future;
use std::sync::{Arc, Mutex};

use mysql_async::prelude::*;
use mysql_shim::{
    async_trait, Column, ColumnFlags, ColumnType, ConnInfo, Connection, Error, ErrorKind,
    OkResponse, Params, PrepareInfo, QueryAttr, QueryResponse, ResultSet, RowValue, ServerOptions,
    Session, SimpleIdentityProvider, Value, ValueInner,
};
use tokio::net::TcpListener;

fn owned_value(v: Value<'_>) -> RowValue {
    match v.into_inner() {
        ValueInner::NULL => RowValue::NULL,
        ValueInner::Bytes(b) => RowValue::Bytes(b.to_vec()),
        ValueInner::Int(i) => RowValue::Int(i),
        ValueInner::UInt(u) => RowValue::UInt(u),
        ValueInner::Double(d) => RowValue::Double(d),
        other => panic!("unexpected parameter value {:?}", other),
    }
}

struct TestingSession<Q, E> {
    columns: Vec<Column>,
    params: Vec<Column>,
    on_q: Q,
    on_e: E,
    inits: Arc<Mutex<Vec<ConnInfo>>>,
    resets: Arc<Mutex<usize>>,
}

#[async_trait]
impl<Q, E> Session for TestingSession<Q, E>
where
    Q: FnMut(&str) -> Result<QueryResponse, Error> + Send,
    E: FnMut(u32, Vec<RowValue>) -> Result<QueryResponse, Error> + Send,
{
    async fn init(&mut self, conn: &ConnInfo) -> Result<(), Error> {
        self.inits.lock().unwrap().push(conn.clone());
        Ok(())
    }

    async fn query(&mut self, sql: &str, _attrs: &[QueryAttr<'_>]) -> Result<QueryResponse, Error> {
        (self.on_q)(sql)
    }

    async fn prepare(&mut self, _sql: &str) -> Result<PrepareInfo, Error> {
        Ok(PrepareInfo {
            num_params: self.params.len() as u16,
            params: self.params.clone(),
            columns: self.columns.clone(),
        })
    }

    async fn execute(
        &mut self,
        id: u32,
        params: Params<'_>,
        _attrs: &[QueryAttr<'_>],
    ) -> Result<QueryResponse, Error> {
        let owned = params.into_iter().map(|p| owned_value(p.value)).collect();
        (self.on_e)(id, owned)
    }

    async fn reset(&mut self) -> Result<(), Error> {
        *self.resets.lock().unwrap() += 1;
        Ok(())
    }
}

struct Harness {
    inits: Arc<Mutex<Vec<ConnInfo>>>,
    resets: Arc<Mutex<usize>>,
}

impl<Q, E> TestingSession<Q, E>
where
    Q: FnMut(&str) -> Result<QueryResponse, Error> + Send + 'static,
    E: FnMut(u32, Vec<RowValue>) -> Result<QueryResponse, Error> + Send + 'static,
{
    fn new(on_q: Q, on_e: E) -> Self {
        TestingSession {
            columns: Vec::new(),
            params: Vec::new(),
            on_q,
            on_e,
            inits: Arc::new(Mutex::new(Vec::new())),
            resets: Arc::new(Mutex::new(0)),
        }
    }

    fn with_params(mut self, p: Vec<Column>) -> Self {
        self.params = p;
        self
    }

    fn with_columns(mut self, c: Vec<Column>) -> Self {
        self.columns = c;
        self
    }

    fn harness(&self) -> Harness {
        Harness {
            inits: Arc::clone(&self.inits),
            resets: Arc::clone(&self.resets),
        }
    }

    async fn test<C, F>(self, c: C)
    where
        C: FnOnce(mysql_async::Conn) -> F,
        F: Future<Output = mysql_async::Conn>,
    {
        self.test_with_db(None, c).await
    }

    async fn test_with_db<C, F>(self, db: Option<&str>, c: C)
    where
        C: FnOnce(mysql_async::Conn) -> F,
        F: Future<Output = mysql_async::Conn>,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(async move {
            let (s, addr) = listener.accept().await.unwrap();
            let (r, w) = s.into_split();
            let opts = ServerOptions {
                peer: Some(addr.to_string()),
                ..ServerOptions::default()
            };
            Connection::run_on(self, Arc::new(SimpleIdentityProvider), opts, r, w).await
        });

        let opts = mysql_async::OptsBuilder::default()
            .ip_or_hostname("127.0.0.1")
            .tcp_port(port)
            .user(Some("username"))
            .db_name(db)
            .prefer_socket(false)
            .max_allowed_packet(Some(16_777_216))
            .wait_timeout(Some(28_800));

        let conn = mysql_async::Conn::new(mysql_async::Opts::from(opts))
            .await
            .unwrap();
        let conn = c(conn).await;
        conn.disconnect().await.unwrap();
        server.await.unwrap().unwrap();
    }
}

fn col(name: &str, coltype: ColumnType) -> Column {
    Column {
        table: String::new(),
        column: name.to_string(),
        coltype,
        colflags: ColumnFlags::empty(),
    }
}

#[tokio::test]
async fn it_connects() {
    let shim = TestingSession::new(
        |_| unreachable!(),
        |_, _| unreachable!(),
    );
    let h = shim.harness();
    shim.test(|conn| async move { conn }).await;

    let inits = h.inits.lock().unwrap();
    assert_eq!(inits.len(), 1);
    assert_eq!(inits[0].username, "username");
    assert_eq!(inits[0].database, None);
}

#[tokio::test]
async fn it_reports_connect_database() {
    let shim = TestingSession::new(
        |_| unreachable!(),
        |_, _| unreachable!(),
    );
    let h = shim.harness();
    shim.test_with_db(Some("mydb"), |conn| async move { conn })
        .await;

    let inits = h.inits.lock().unwrap();
    assert_eq!(inits[0].database.as_deref(), Some("mydb"));
}

#[tokio::test]
async fn it_pings() {
    TestingSession::new(
        |_| unreachable!(),
        |_, _| unreachable!(),
    )
    .test(|mut conn| async move {
        conn.ping().await.unwrap();
        conn
    })
    .await;
}

#[tokio::test]
async fn empty_response() {
    TestingSession::new(
        |_| Ok(QueryResponse::Ok(OkResponse::default())),
        |_, _| unreachable!(),
    )
    .test(|mut conn| async move {
        conn.query_drop("SELECT a, b FROM foo").await.unwrap();
        conn
    })
    .await;
}

#[tokio::test]
async fn no_rows() {
    let cols = vec![col("a", ColumnType::MYSQL_TYPE_SHORT)];
    TestingSession::new(
        move |_| Ok(ResultSet::new(cols.clone(), vec![]).into()),
        |_, _| unreachable!(),
    )
    .test(|mut conn| async move {
        let rows: Vec<i16> = conn.query("SELECT a FROM b").await.unwrap();
        assert!(rows.is_empty());
        conn
    })
    .await;
}

#[tokio::test]
async fn it_queries() {
    TestingSession::new(
        |sql| {
            assert_eq!(sql, "SELECT 1");
            let cols = vec![col("1", ColumnType::MYSQL_TYPE_LONGLONG)];
            Ok(ResultSet::new(cols, vec![vec![RowValue::Int(1)]]).into())
        },
        |_, _| unreachable!(),
    )
    .test(|mut conn| async move {
        let row: Option<i64> = conn.query_first("SELECT 1").await.unwrap();
        assert_eq!(row, Some(1));
        conn
    })
    .await;
}

#[tokio::test]
async fn it_queries_many_columns() {
    TestingSession::new(
        |_| {
            let cols = vec![
                col("a", ColumnType::MYSQL_TYPE_LONG),
                col("b", ColumnType::MYSQL_TYPE_VAR_STRING),
                col("c", ColumnType::MYSQL_TYPE_DOUBLE),
            ];
            let rows = vec![vec![
                RowValue::Int(7),
                RowValue::Bytes(b"hello".to_vec()),
                RowValue::Double(0.5),
            ]];
            Ok(ResultSet::new(cols, rows).into())
        },
        |_, _| unreachable!(),
    )
    .test(|mut conn| async move {
        let row: Option<(i32, String, f64)> =
            conn.query_first("SELECT a, b, c FROM t").await.unwrap();
        assert_eq!(row, Some((7, "hello".to_string(), 0.5)));
        conn
    })
    .await;
}

#[tokio::test]
async fn it_queries_nulls() {
    TestingSession::new(
        |_| {
            let cols = vec![
                col("a", ColumnType::MYSQL_TYPE_LONGLONG),
                col("b", ColumnType::MYSQL_TYPE_VAR_STRING),
            ];
            let rows = vec![vec![RowValue::NULL, RowValue::Bytes(b"x".to_vec())]];
            Ok(ResultSet::new(cols, rows).into())
        },
        |_, _| unreachable!(),
    )
    .test(|mut conn| async move {
        let row: Option<(Option<i64>, String)> =
            conn.query_first("SELECT a, b FROM t").await.unwrap();
        assert_eq!(row, Some((None, "x".to_string())));
        conn
    })
    .await;
}

#[tokio::test]
async fn error_response() {
    TestingSession::new(
        |_| {
            Err(Error::command(
                ErrorKind::ER_BAD_DB_ERROR,
                "Unknown database 'nope'",
            ))
        },
        |_, _| unreachable!(),
    )
    .test(|mut conn| async move {
        let err = conn.query_drop("USE nope").await.unwrap_err();
        match err {
            mysql_async::Error::Server(e) => {
                assert_eq!(e.code, 1049);
                assert_eq!(e.state, "42000");
                assert!(e.message.contains("Unknown database"));
            }
            e => panic!("unexpected error: {:?}", e),
        }
        // the connection survives an error response
        conn.ping().await.unwrap();
        conn
    })
    .await;
}

#[tokio::test]
async fn survives_many_errors() {
    TestingSession::new(
        |_| Err(Error::Internal("backend exploded".into())),
        |_, _| unreachable!(),
    )
    .test(|mut conn| async move {
        for _ in 0..3 {
            let err = conn.query_drop("SELECT 1").await.unwrap_err();
            match err {
                mysql_async::Error::Server(e) => assert_eq!(e.code, 1105),
                e => panic!("unexpected error: {:?}", e),
            }
        }
        conn
    })
    .await;
}

#[tokio::test]
async fn it_prepares_and_executes() {
    let seen_id = Arc::new(Mutex::new(None));
    let seen_id2 = Arc::clone(&seen_id);
    TestingSession::new(
        |_| unreachable!(),
        move |id, params| {
            *seen_id2.lock().unwrap() = Some(id);
            assert_eq!(params, vec![RowValue::Int(42)]);
            let cols = vec![col("a", ColumnType::MYSQL_TYPE_LONGLONG)];
            Ok(ResultSet::new(cols, vec![vec![RowValue::Int(43)]]).into())
        },
    )
    .with_params(vec![col("?", ColumnType::MYSQL_TYPE_LONG)])
    .with_columns(vec![col("a", ColumnType::MYSQL_TYPE_LONGLONG)])
    .test(|mut conn| async move {
        let stmt = conn.prep("SELECT a FROM t WHERE a = ?").await.unwrap();
        let row: Option<i64> = conn.exec_first(&stmt, (42i32,)).await.unwrap();
        assert_eq!(row, Some(43));
        conn
    })
    .await;
    assert!(seen_id.lock().unwrap().is_some());
}

#[tokio::test]
async fn it_executes_with_null_params() {
    TestingSession::new(
        |_| unreachable!(),
        |_, params| {
            assert_eq!(params.len(), 2);
            assert_eq!(params[0], RowValue::NULL);
            assert_eq!(params[1], RowValue::Int(42));
            let cols = vec![
                col("a", ColumnType::MYSQL_TYPE_LONGLONG),
                col("b", ColumnType::MYSQL_TYPE_LONGLONG),
            ];
            Ok(ResultSet::new(cols, vec![vec![RowValue::NULL, RowValue::Int(42)]]).into())
        },
    )
    .with_params(vec![
        col("?", ColumnType::MYSQL_TYPE_LONG),
        col("?", ColumnType::MYSQL_TYPE_LONG),
    ])
    .with_columns(vec![
        col("a", ColumnType::MYSQL_TYPE_LONGLONG),
        col("b", ColumnType::MYSQL_TYPE_LONGLONG),
    ])
    .test(|mut conn| async move {
        let stmt = conn.prep("SELECT ?, ?").await.unwrap();
        let row: Option<(Option<i64>, Option<i64>)> = conn
            .exec_first(&stmt, (Option::<i32>::None, 42i32))
            .await
            .unwrap();
        assert_eq!(row, Some((None, Some(42))));
        conn
    })
    .await;
}

#[tokio::test]
async fn it_executes_with_string_params() {
    TestingSession::new(
        |_| unreachable!(),
        |_, params| {
            assert_eq!(params, vec![RowValue::Bytes(b"hello".to_vec())]);
            let cols = vec![col("len", ColumnType::MYSQL_TYPE_LONGLONG)];
            Ok(ResultSet::new(cols, vec![vec![RowValue::Int(5)]]).into())
        },
    )
    .with_params(vec![col("?", ColumnType::MYSQL_TYPE_VAR_STRING)])
    .with_columns(vec![col("len", ColumnType::MYSQL_TYPE_LONGLONG)])
    .test(|mut conn| async move {
        let stmt = conn.prep("SELECT LENGTH(?)").await.unwrap();
        let row: Option<i64> = conn.exec_first(&stmt, ("hello",)).await.unwrap();
        assert_eq!(row, Some(5));
        conn
    })
    .await;
}

#[tokio::test]
async fn execute_reports_affected_rows() {
    TestingSession::new(
        |_| unreachable!(),
        |_, _| {
            Ok(QueryResponse::Ok(OkResponse {
                affected_rows: 3,
                last_insert_id: 11,
                ..OkResponse::default()
            }))
        },
    )
    .with_params(vec![col("?", ColumnType::MYSQL_TYPE_LONG)])
    .test(|mut conn| async move {
        let stmt = conn.prep("INSERT INTO t VALUES (?)").await.unwrap();
        conn.exec_drop(&stmt, (1i32,)).await.unwrap();
        assert_eq!(conn.affected_rows(), 3);
        assert_eq!(conn.last_insert_id(), Some(11));
        conn
    })
    .await;
}

#[tokio::test]
async fn it_serves_large_resultsets() {
    const ROWS: i64 = 20_000;
    TestingSession::new(
        |_| {
            let cols = vec![
                col("a", ColumnType::MYSQL_TYPE_LONGLONG),
                col("pad", ColumnType::MYSQL_TYPE_VAR_STRING),
            ];
            let rows = (0..ROWS)
                .map(|i| vec![RowValue::Int(i), RowValue::Bytes(vec![b'x'; 64])])
                .collect();
            Ok(ResultSet::new(cols, rows).into())
        },
        |_, _| unreachable!(),
    )
    .test(|mut conn| async move {
        let rows: Vec<(i64, String)> = conn.query("SELECT a, pad FROM big").await.unwrap();
        assert_eq!(rows.len(), ROWS as usize);
        assert_eq!(rows[0].0, 0);
        assert_eq!(rows[ROWS as usize - 1].0, ROWS - 1);
        conn
    })
    .await;
}

#[tokio::test]
async fn reset_connection_clears_session_state() {
    let shim = TestingSession::new(
        |_| Ok(QueryResponse::Ok(OkResponse::default())),
        |_, _| unreachable!(),
    );
    let h = shim.harness();
    shim.test(|mut conn| async move {
        assert!(conn.reset().await.unwrap());
        conn
    })
    .await;
    assert_eq!(*h.resets.lock().unwrap(), 1);
}

#[tokio::test]
async fn multi_resultsets_are_chained() {
    TestingSession::new(
        |_| {
            let first = ResultSet::new(
                vec![col("a", ColumnType::MYSQL_TYPE_LONGLONG)],
                vec![vec![RowValue::Int(1)]],
            );
            let second = ResultSet::new(
                vec![col("b", ColumnType::MYSQL_TYPE_LONGLONG)],
                vec![vec![RowValue::Int(2)]],
            );
            Ok(QueryResponse::Multi(vec![first, second]))
        },
        |_, _| unreachable!(),
    )
    .test(|mut conn| async move {
        let mut result = conn.query_iter("CALL p()").await.unwrap();
        let first: Vec<i64> = result.collect().await.unwrap();
        assert_eq!(first, vec![1]);
        let second: Vec<i64> = result.collect().await.unwrap();
        assert_eq!(second, vec![2]);
        drop(result);
        conn
    })
    .await;
}
