//! MySQL driver tests against an in-process fake server
//!
//! The fake server speaks just enough of the protocol for the driver:
//! greeting, native-password auth (optionally behind an auth switch), OK/ERR,
//! COM_PING, COM_INIT_DB, `SET`, `SELECT 1`, and LOCAL INFILE uploads.
//! A file name containing `hangup` makes it drop the connection instead of
//! answering the upload.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use mysqltest_conn::auth::scramble_native;
use mysqltest_conn::driver::MySqlDriver;
use mysqltest_conn::protocol::constants::capabilities;
use mysqltest_conn::protocol::encode::{put_lenenc_bytes, put_lenenc_int};
use mysqltest_conn::protocol::{decode_packet, frame_packets, PayloadReader};
use mysqltest_conn::{Db, Driver, Error, Registry, RegistryConfig, RetryPolicy, Session};
use std::io::Write;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

const SERVER_VERSION: &str = "8.0.11-fake";
const SCRAMBLE: &[u8; 20] = b"abcdefghijklmnopqrst";
const SWITCH_SCRAMBLE: &[u8; 20] = b"ABCDEFGHIJKLMNOPQRST";
const PASSWORD: &str = "secret";

const SERVER_CAPS: u32 = capabilities::LONG_PASSWORD
    | capabilities::LONG_FLAG
    | capabilities::CONNECT_WITH_DB
    | capabilities::LOCAL_FILES
    | capabilities::PROTOCOL_41
    | capabilities::TRANSACTIONS
    | capabilities::SECURE_CONNECTION
    | capabilities::MULTI_STATEMENTS
    | capabilities::MULTI_RESULTS
    | capabilities::PLUGIN_AUTH
    | capabilities::PLUGIN_AUTH_LENENC_CLIENT_DATA;

/// What the fake server observed
#[derive(Default)]
struct Observed {
    connections: AtomicU32,
    users: Mutex<Vec<String>>,
    databases: Mutex<Vec<String>>,
    queries: Mutex<Vec<String>>,
    uploads: Mutex<Vec<Vec<u8>>>,
    fail_pings: AtomicBool,
}

struct FakeServer {
    port: u16,
    observed: Arc<Observed>,
}

impl FakeServer {
    async fn start() -> Self {
        Self::start_with(false).await
    }

    /// `switch_auth`: greet with caching_sha2_password, then switch to native
    async fn start_with(switch_auth: bool) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let observed = Arc::new(Observed::default());

        let shared = observed.clone();
        tokio::spawn(async move {
            loop {
                let Ok((socket, _)) = listener.accept().await else {
                    return;
                };
                let id = shared.connections.fetch_add(1, Ordering::SeqCst) + 1;
                tokio::spawn(serve(socket, id, switch_auth, shared.clone()));
            }
        });

        Self { port, observed }
    }

    fn dsn(&self, password: &str, params: &str) -> String {
        format!(
            "root:{}@tcp(127.0.0.1:{})/test?time_zone=%27UTC%27{}",
            password, self.port, params
        )
    }

    fn connections(&self) -> u32 {
        self.observed.connections.load(Ordering::SeqCst)
    }

    fn queries(&self) -> Vec<String> {
        self.observed.queries.lock().unwrap().clone()
    }
}

async fn write_packet(socket: &mut TcpStream, mut seq: u8, payload: &[u8]) {
    let mut buf = BytesMut::new();
    frame_packets(&mut buf, &mut seq, payload);
    socket.write_all(&buf).await.unwrap();
}

async fn read_packet(socket: &mut TcpStream, buf: &mut BytesMut) -> Option<(u8, Bytes)> {
    loop {
        if let Ok((packet, consumed)) = decode_packet(buf) {
            buf.advance(consumed);
            return Some((packet.seq, packet.payload));
        }
        if socket.read_buf(buf).await.ok()? == 0 {
            return None;
        }
    }
}

fn greeting(connection_id: u32, plugin: &str) -> Vec<u8> {
    let mut p = BytesMut::new();
    p.put_u8(10);
    p.put_slice(SERVER_VERSION.as_bytes());
    p.put_u8(0);
    p.put_u32_le(connection_id);
    p.put_slice(&SCRAMBLE[..8]);
    p.put_u8(0);
    p.put_u16_le(SERVER_CAPS as u16);
    p.put_u8(45);
    p.put_u16_le(0x0002);
    p.put_u16_le((SERVER_CAPS >> 16) as u16);
    p.put_u8(21);
    p.put_bytes(0, 10);
    p.put_slice(&SCRAMBLE[8..]);
    p.put_u8(0);
    p.put_slice(plugin.as_bytes());
    p.put_u8(0);
    p.to_vec()
}

fn ok_packet(affected_rows: u64) -> Vec<u8> {
    let mut p = BytesMut::new();
    p.put_u8(0x00);
    put_lenenc_int(&mut p, affected_rows);
    put_lenenc_int(&mut p, 0);
    p.put_u16_le(0x0002);
    p.put_u16_le(0);
    p.to_vec()
}

fn err_packet(code: u16, state: &str, message: &str) -> Vec<u8> {
    let mut p = BytesMut::new();
    p.put_u8(0xFF);
    p.put_u16_le(code);
    p.put_u8(b'#');
    p.put_slice(state.as_bytes());
    p.put_slice(message.as_bytes());
    p.to_vec()
}

fn eof_packet() -> Vec<u8> {
    vec![0xFE, 0x00, 0x00, 0x02, 0x00]
}

fn column_definition(name: &str) -> Vec<u8> {
    let mut p = BytesMut::new();
    put_lenenc_bytes(&mut p, b"def");
    put_lenenc_bytes(&mut p, b"");
    put_lenenc_bytes(&mut p, b"");
    put_lenenc_bytes(&mut p, b"");
    put_lenenc_bytes(&mut p, name.as_bytes());
    put_lenenc_bytes(&mut p, b"");
    put_lenenc_int(&mut p, 0x0c);
    p.put_u16_le(63);
    p.put_u32_le(1);
    p.put_u8(0x08); // LONGLONG
    p.put_u16_le(0x0081);
    p.put_u8(0);
    p.put_u16_le(0);
    p.to_vec()
}

/// Parsed HandshakeResponse41
struct Login {
    user: String,
    auth_response: Vec<u8>,
    database: Option<String>,
    plugin: String,
}

fn parse_login(payload: &[u8]) -> Login {
    let mut r = PayloadReader::new(payload);
    let caps = r.u32().unwrap();
    r.u32().unwrap(); // max packet
    r.u8().unwrap(); // collation
    r.bytes(23).unwrap();
    let user = r.null_str();
    let auth_response = if caps & capabilities::PLUGIN_AUTH_LENENC_CLIENT_DATA != 0 {
        r.lenenc_bytes().unwrap().to_vec()
    } else {
        let len = r.u8().unwrap() as usize;
        r.bytes(len).unwrap().to_vec()
    };
    let database = (caps & capabilities::CONNECT_WITH_DB != 0).then(|| r.null_str());
    let plugin = if caps & capabilities::PLUGIN_AUTH != 0 {
        r.null_str()
    } else {
        String::new()
    };
    Login {
        user,
        auth_response,
        database,
        plugin,
    }
}

async fn serve(mut socket: TcpStream, id: u32, switch_auth: bool, observed: Arc<Observed>) {
    let mut buf = BytesMut::new();
    let plugin = if switch_auth {
        "caching_sha2_password"
    } else {
        "mysql_native_password"
    };
    write_packet(&mut socket, 0, &greeting(id, plugin)).await;

    let Some((seq, payload)) = read_packet(&mut socket, &mut buf).await else {
        return;
    };
    let login = parse_login(&payload);
    observed.users.lock().unwrap().push(login.user.clone());
    if let Some(db) = &login.database {
        observed.databases.lock().unwrap().push(db.clone());
    }
    assert_eq!(login.plugin, plugin);

    let (mut seq, auth_response, scramble) = if switch_auth {
        let mut switch = vec![0xFE];
        switch.extend_from_slice(b"mysql_native_password\0");
        switch.extend_from_slice(SWITCH_SCRAMBLE);
        switch.push(0);
        write_packet(&mut socket, seq + 1, &switch).await;
        let Some((seq, payload)) = read_packet(&mut socket, &mut buf).await else {
            return;
        };
        (seq, payload.to_vec(), &SWITCH_SCRAMBLE[..])
    } else {
        (seq, login.auth_response, &SCRAMBLE[..])
    };

    if auth_response != scramble_native(PASSWORD, scramble) {
        let message = format!("Access denied for user '{}'@'127.0.0.1'", login.user);
        write_packet(&mut socket, seq + 1, &err_packet(1045, "28000", &message)).await;
        return;
    }
    seq += 1;
    write_packet(&mut socket, seq, &ok_packet(0)).await;

    while let Some((_, payload)) = read_packet(&mut socket, &mut buf).await {
        let Some((&command, body)) = payload.split_first() else {
            return;
        };
        match command {
            0x01 => return,
            0x0E if observed.fail_pings.load(Ordering::SeqCst) => {
                let message = "Server shutdown in progress";
                write_packet(&mut socket, 1, &err_packet(1053, "08S01", message)).await;
            }
            0x0E => write_packet(&mut socket, 1, &ok_packet(0)).await,
            0x02 => {
                let db = String::from_utf8_lossy(body).into_owned();
                if db == "missing" {
                    let message = format!("Unknown database '{}'", db);
                    write_packet(&mut socket, 1, &err_packet(1049, "42000", &message)).await;
                } else {
                    observed.databases.lock().unwrap().push(db);
                    write_packet(&mut socket, 1, &ok_packet(0)).await;
                }
            }
            0x03 => {
                let sql = String::from_utf8_lossy(body).into_owned();
                observed.queries.lock().unwrap().push(sql.clone());
                if !handle_query(&mut socket, &mut buf, &sql, &observed).await {
                    return;
                }
            }
            other => panic!("unexpected command 0x{:02X}", other),
        }
    }
}

/// Returns false when the connection should be dropped
async fn handle_query(
    socket: &mut TcpStream,
    buf: &mut BytesMut,
    sql: &str,
    observed: &Observed,
) -> bool {
    if sql == "SELECT 1" {
        write_packet(socket, 1, &[0x01]).await;
        write_packet(socket, 2, &column_definition("1")).await;
        write_packet(socket, 3, &eof_packet()).await;
        let mut row = BytesMut::new();
        put_lenenc_bytes(&mut row, b"1");
        write_packet(socket, 4, &row).await;
        write_packet(socket, 5, &eof_packet()).await;
    } else if let Some(rest) = sql.strip_prefix("LOAD DATA LOCAL INFILE '") {
        let file_name = rest.split('\'').next().unwrap_or_default();
        let mut request = vec![0xFB];
        request.extend_from_slice(file_name.as_bytes());
        write_packet(socket, 1, &request).await;

        let mut content = Vec::new();
        let mut last_seq = 1;
        while let Some((seq, chunk)) = read_packet(socket, buf).await {
            last_seq = seq;
            if chunk.is_empty() {
                break;
            }
            content.extend_from_slice(&chunk);
        }
        let lines = content.iter().filter(|&&b| b == b'\n').count() as u64;
        observed.uploads.lock().unwrap().push(content);
        if file_name.contains("hangup") {
            return false;
        }
        write_packet(socket, last_seq + 1, &ok_packet(lines)).await;
    } else if sql.starts_with("SET ") {
        write_packet(socket, 1, &ok_packet(0)).await;
    } else {
        let message = format!("You have an error in your SQL syntax near '{}'", sql);
        write_packet(socket, 1, &err_packet(1064, "42000", &message)).await;
    }
    true
}

#[tokio::test]
async fn test_ping_session_and_query() {
    let server = FakeServer::start().await;
    let db = MySqlDriver::new()
        .open(&server.dsn(PASSWORD, ""))
        .await
        .unwrap();
    assert_eq!(server.connections(), 0);

    db.ping().await.unwrap();
    assert_eq!(server.connections(), 1);
    assert_eq!(server.queries(), vec!["SET time_zone='UTC'".to_string()]);

    // The probed connection becomes the session
    let mut session = db.session().await.unwrap();
    assert_eq!(server.connections(), 1);
    assert_eq!(session.server_version(), SERVER_VERSION);
    assert_eq!(session.connection_id(), 1);
    assert!(!session.is_secure());

    let results = session.query("SELECT 1").await.unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].columns.len(), 1);
    assert_eq!(results[0].columns[0].name, "1");
    assert_eq!(results[0].text(0, 0), Some("1"));

    session.ping().await.unwrap();
    session.close().await.unwrap();
    db.close().await.unwrap();

    assert_eq!(
        server.observed.users.lock().unwrap().as_slice(),
        ["root".to_string()]
    );
    assert_eq!(
        server.observed.databases.lock().unwrap().as_slice(),
        ["test".to_string()]
    );
}

#[tokio::test]
async fn test_second_session_dials_again() {
    let server = FakeServer::start().await;
    let db = MySqlDriver::new()
        .open(&server.dsn(PASSWORD, ""))
        .await
        .unwrap();

    let first = db.session().await.unwrap();
    let second = db.session().await.unwrap();
    assert_eq!(server.connections(), 2);
    assert_ne!(first.connection_id(), second.connection_id());

    first.close().await.unwrap();
    second.close().await.unwrap();
}

#[tokio::test]
async fn test_wrong_password_is_access_denied() {
    let server = FakeServer::start().await;
    let db = MySqlDriver::new()
        .open(&server.dsn("wrong", ""))
        .await
        .unwrap();

    let err = db.ping().await.unwrap_err();
    assert_eq!(err.server_code(), Some(1045));
    match err {
        Error::Server { state, message, .. } => {
            assert_eq!(state, "28000");
            assert!(message.contains("Access denied"));
        }
        other => panic!("expected server error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_auth_switch_to_native_password() {
    let server = FakeServer::start_with(true).await;
    let db = MySqlDriver::new()
        .open(&server.dsn(PASSWORD, ""))
        .await
        .unwrap();
    db.ping().await.unwrap();

    let mut session = db.session().await.unwrap();
    let results = session.query("SELECT 1").await.unwrap();
    assert_eq!(results[0].text(0, 0), Some("1"));
    session.close().await.unwrap();
}

#[tokio::test]
async fn test_server_error_keeps_session_usable() {
    let server = FakeServer::start().await;
    let db = MySqlDriver::new()
        .open(&server.dsn(PASSWORD, ""))
        .await
        .unwrap();
    let mut session = db.session().await.unwrap();

    let err = session.query("SELEC 1").await.unwrap_err();
    assert_eq!(err.server_code(), Some(1064));
    assert_eq!(err.category(), "server");

    let results = session.query("SELECT 1").await.unwrap();
    assert_eq!(results[0].text(0, 0), Some("1"));

    let err = session.use_database("missing").await.unwrap_err();
    assert_eq!(err.server_code(), Some(1049));
    session.use_database("other").await.unwrap();
    session.close().await.unwrap();
}

#[tokio::test]
async fn test_local_infile_upload() {
    let server = FakeServer::start().await;
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(b"1,a\n2,b\n3,c\n").unwrap();
    file.flush().unwrap();

    let db = MySqlDriver::new()
        .open(&server.dsn(PASSWORD, "&allowAllFiles=true"))
        .await
        .unwrap();
    let mut session = db.session().await.unwrap();

    let sql = format!(
        "LOAD DATA LOCAL INFILE '{}' INTO TABLE t",
        file.path().display()
    );
    let results = session.query(&sql).await.unwrap();
    assert_eq!(results[0].affected_rows, 3);
    assert_eq!(
        server.observed.uploads.lock().unwrap().as_slice(),
        [b"1,a\n2,b\n3,c\n".to_vec()]
    );
    session.close().await.unwrap();
}

#[tokio::test]
async fn test_local_infile_refused_when_disabled() {
    let server = FakeServer::start().await;
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(b"1,a\n").unwrap();

    let db = MySqlDriver::new()
        .open(&server.dsn(PASSWORD, "&allowAllFiles=false"))
        .await
        .unwrap();
    let mut session = db.session().await.unwrap();

    let sql = format!(
        "LOAD DATA LOCAL INFILE '{}' INTO TABLE t",
        file.path().display()
    );
    let err = session.query(&sql).await.unwrap_err();
    assert!(matches!(err, Error::Config(_)));
    assert_eq!(
        server.observed.uploads.lock().unwrap().as_slice(),
        [Vec::<u8>::new()]
    );

    // Nothing left unread on the wire
    session.ping().await.unwrap();
    session.close().await.unwrap();
}

#[tokio::test]
async fn test_local_infile_missing_file_keeps_session() {
    let server = FakeServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("absent.csv");

    let db = MySqlDriver::new()
        .open(&server.dsn(PASSWORD, "&allowAllFiles=true"))
        .await
        .unwrap();
    let mut session = db.session().await.unwrap();

    let sql = format!("LOAD DATA LOCAL INFILE '{}' INTO TABLE t", missing.display());
    let err = session.query(&sql).await.unwrap_err();
    match err {
        Error::Config(message) => assert!(message.contains("absent.csv")),
        other => panic!("expected Config, got {:?}", other),
    }
    assert_eq!(
        server.observed.uploads.lock().unwrap().as_slice(),
        [Vec::<u8>::new()]
    );

    session.ping().await.unwrap();
    session.close().await.unwrap();
}

#[tokio::test]
async fn test_local_infile_hangup_closes_session() {
    let server = FakeServer::start().await;
    let db = MySqlDriver::new()
        .open(&server.dsn(PASSWORD, "&allowAllFiles=false"))
        .await
        .unwrap();
    let mut session = db.session().await.unwrap();
    assert!(session.is_alive());

    let err = session
        .query("LOAD DATA LOCAL INFILE 'hangup.csv' INTO TABLE t")
        .await
        .unwrap_err();
    // The transport failure wins over the refusal
    assert!(!matches!(err, Error::Config(_)), "got {:?}", err);

    assert!(!session.is_alive());
    let err = session.ping().await.unwrap_err();
    assert!(matches!(err, Error::ConnectionClosed));
}

#[tokio::test]
async fn test_failed_ping_discards_connection() {
    let server = FakeServer::start().await;
    let db = MySqlDriver::new()
        .open(&server.dsn(PASSWORD, ""))
        .await
        .unwrap();

    server.observed.fail_pings.store(true, Ordering::SeqCst);
    let err = db.ping().await.unwrap_err();
    assert_eq!(err.server_code(), Some(1053));
    assert_eq!(server.connections(), 1);

    // The failed connection was closed, not cached
    server.observed.fail_pings.store(false, Ordering::SeqCst);
    db.ping().await.unwrap();
    assert_eq!(server.connections(), 2);
    db.close().await.unwrap();
}

#[tokio::test]
async fn test_registry_end_to_end() {
    let server = FakeServer::start().await;
    let config = RegistryConfig::builder()
        .default_port(server.port)
        .time_zone("UTC")
        .retry_count(2)
        .retry(RetryPolicy::new(Duration::from_millis(1)))
        .build();
    let mut reg = Registry::new(MySqlDriver::new(), config);

    let conn = reg
        .add("default", "127.0.0.1", "root", PASSWORD, "test", None)
        .await
        .unwrap();
    let session = conn.session_mut().unwrap();
    let results = session.query("SELECT 1").await.unwrap();
    assert_eq!(results[0].text(0, 0), Some("1"));

    // Same credentials: shares the database handle, new session
    reg.add("second", "127.0.0.1", "root", PASSWORD, "other", None)
        .await
        .unwrap();
    assert!(reg
        .get("default")
        .unwrap()
        .shares_db_with(reg.get("second").unwrap()));
    assert_eq!(server.connections(), 2);

    let expected = vec!["1045".to_string()];
    let err = reg
        .add("denied", "127.0.0.1", "root", "wrong", "test", Some(&expected))
        .await
        .unwrap_err();
    assert!(!err.is_unrecoverable());
    assert!(matches!(err, Error::ProbeFailed { attempts: 1, .. }));
    assert_eq!(err.server_code(), Some(1045));
    assert_eq!(reg.current_name(), Some("second"));

    reg.close_all().await;
    assert!(reg.is_empty());
}

#[tokio::test]
async fn test_unreachable_server_is_unrecoverable() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let config = RegistryConfig::builder()
        .default_port(port)
        .retry_count(2)
        .retry(RetryPolicy::new(Duration::from_millis(1)))
        .build();
    let mut reg = Registry::new(MySqlDriver::new(), config);

    let err = reg
        .add("default", "127.0.0.1", "root", "", "test", None)
        .await
        .unwrap_err();
    assert!(err.is_unrecoverable());
    match err {
        Error::Unrecoverable(source) => {
            assert!(matches!(*source, Error::ProbeFailed { attempts: 2, .. }));
        }
        other => panic!("expected Unrecoverable, got {:?}", other),
    }
}
