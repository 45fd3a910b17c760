mod common;

use common::{start_memcached, test_app, test_app_with_idle, wait_until};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

async fn connect(addr: SocketAddr) -> BufReader<TcpStream> {
    BufReader::new(TcpStream::connect(addr).await.unwrap())
}

async fn read_line(conn: &mut BufReader<TcpStream>) -> String {
    let mut line = String::new();
    conn.read_line(&mut line).await.unwrap();
    line.trim_end_matches(['\r', '\n']).to_owned()
}

/// Reads one `VALUE <key> <flags> <len>` header plus its value line and
/// returns (key, id).
async fn read_value(conn: &mut BufReader<TcpStream>) -> (String, u64) {
    let header = read_line(conn).await;
    let fields: Vec<&str> = header.split_whitespace().collect();
    assert_eq!(fields.len(), 4, "bad VALUE header: {header:?}");
    assert_eq!(fields[0], "VALUE");
    assert_eq!(fields[2], "0");

    let value = read_line(conn).await;
    assert_eq!(fields[3].parse::<usize>().unwrap(), value.len());
    (fields[1].to_owned(), value.parse().unwrap())
}

#[tokio::test]
async fn single_get_returns_one_value_block() {
    let (addr, _token) = start_memcached(test_app()).await;
    let mut conn = connect(addr).await;

    conn.write_all(b"GET foo\r\n").await.unwrap();
    let (key, id) = read_value(&mut conn).await;
    assert_eq!(key, "foo");
    assert!(id > 0);
    assert_eq!(read_line(&mut conn).await, "END");
}

#[tokio::test]
async fn multi_get_returns_increasing_ids_in_key_order() {
    let (addr, _token) = start_memcached(test_app()).await;
    let mut conn = connect(addr).await;

    conn.write_all(b"GET a b c\r\n").await.unwrap();
    let (key_a, id_a) = read_value(&mut conn).await;
    let (key_b, id_b) = read_value(&mut conn).await;
    let (key_c, id_c) = read_value(&mut conn).await;
    assert_eq!((key_a.as_str(), key_b.as_str(), key_c.as_str()), ("a", "b", "c"));
    assert!(id_a < id_b && id_b < id_c);
    assert_eq!(read_line(&mut conn).await, "END");
}

#[tokio::test]
async fn gets_is_an_alias_for_get() {
    let (addr, _token) = start_memcached(test_app()).await;
    let mut conn = connect(addr).await;

    conn.write_all(b"gets id\r\n").await.unwrap();
    let (_, id) = read_value(&mut conn).await;
    assert!(id > 0);
    assert_eq!(read_line(&mut conn).await, "END");
}

#[tokio::test]
async fn stats_reflect_one_hit() {
    let (addr, _token) = start_memcached(test_app()).await;
    let mut conn = connect(addr).await;

    conn.write_all(b"GET foo\r\n").await.unwrap();
    read_value(&mut conn).await;
    assert_eq!(read_line(&mut conn).await, "END");

    conn.write_all(b"STATS\r\n").await.unwrap();
    let mut stats = HashMap::new();
    loop {
        let line = read_line(&mut conn).await;
        if line == "END" {
            break;
        }
        let fields: Vec<&str> = line.splitn(3, ' ').collect();
        assert_eq!(fields[0], "STAT", "bad stat line: {line:?}");
        stats.insert(fields[1].to_owned(), fields[2].to_owned());
    }

    assert_eq!(stats["cmd_get"], "1");
    assert_eq!(stats["get_hits"], "1");
    assert_eq!(stats["get_misses"], "0");
    assert_eq!(stats["pid"], std::process::id().to_string());
    assert!(stats["total_connections"].parse::<u64>().unwrap() >= 1);
    assert!(stats["curr_connections"].parse::<u64>().unwrap() >= 1);
    assert!(!stats["version"].is_empty());
}

#[tokio::test]
async fn version_reports_the_crate_version() {
    let (addr, _token) = start_memcached(test_app()).await;
    let mut conn = connect(addr).await;

    conn.write_all(b"VERSION\r\n").await.unwrap();
    assert_eq!(
        read_line(&mut conn).await,
        format!("VERSION {}", boreal_server::VERSION)
    );
}

#[tokio::test]
async fn parse_errors_keep_the_connection_alive() {
    let (addr, _token) = start_memcached(test_app()).await;
    let mut conn = connect(addr).await;

    conn.write_all(b"SET foo 0 0 1\r\n").await.unwrap();
    assert_eq!(read_line(&mut conn).await, "ERROR");

    conn.write_all(b"\r\n").await.unwrap();
    assert_eq!(read_line(&mut conn).await, "ERROR");

    conn.write_all(b"GET\r\n").await.unwrap();
    assert_eq!(read_line(&mut conn).await, "ERROR");

    // The same connection still serves real requests.
    conn.write_all(b"GET foo\r\n").await.unwrap();
    let (_, id) = read_value(&mut conn).await;
    assert!(id > 0);
    assert_eq!(read_line(&mut conn).await, "END");
}

#[tokio::test]
async fn clock_rollback_answers_error_but_keeps_the_connection() {
    let clock = common::ManualClock::at(600_000);
    let app = common::test_app_with_clock(clock.clone());
    let (addr, _token) = start_memcached(app.clone()).await;
    let mut conn = connect(addr).await;

    conn.write_all(b"GET foo\r\n").await.unwrap();
    read_value(&mut conn).await;
    assert_eq!(read_line(&mut conn).await, "END");

    clock.set(0);
    conn.write_all(b"GET foo\r\n").await.unwrap();
    assert_eq!(read_line(&mut conn).await, "ERROR");

    let stats = app.stats();
    assert_eq!(stats.get_hits, 1);
    assert_eq!(stats.get_misses, 1);

    // The failure does not take the connection down with it.
    conn.write_all(b"VERSION\r\n").await.unwrap();
    assert!(read_line(&mut conn).await.starts_with("VERSION "));
}

#[tokio::test]
async fn oversized_request_line_closes_the_connection() {
    let (addr, _token) = start_memcached(test_app()).await;
    let mut conn = connect(addr).await;

    // 70 KiB with no newline exceeds the request line cap.
    let _ = conn.write_all(&vec![b'a'; 70 * 1024]).await;
    let mut line = String::new();
    let n = conn.read_line(&mut line).await.unwrap_or(0);
    assert_eq!(n, 0, "expected the server to drop the connection");
}

#[tokio::test]
async fn quit_closes_the_connection() {
    let (addr, _token) = start_memcached(test_app()).await;
    let mut conn = connect(addr).await;

    conn.write_all(b"QUIT\r\n").await.unwrap();
    let mut line = String::new();
    let n = conn.read_line(&mut line).await.unwrap_or(0);
    assert_eq!(n, 0, "expected EOF after QUIT, got {line:?}");
}

#[tokio::test]
async fn idle_connections_are_closed() {
    let app = test_app_with_idle(Duration::from_secs(1));
    let (addr, _token) = start_memcached(app).await;
    let mut conn = connect(addr).await;

    conn.write_all(b"GET foo\r\n").await.unwrap();
    read_value(&mut conn).await;
    assert_eq!(read_line(&mut conn).await, "END");

    tokio::time::sleep(Duration::from_millis(1600)).await;

    let _ = conn.write_all(b"GET foo\r\n").await;
    let mut line = String::new();
    let n = conn.read_line(&mut line).await.unwrap_or(0);
    assert_eq!(n, 0, "expected EOF after idle timeout, got {line:?}");
}

#[tokio::test]
async fn live_connection_count_returns_to_zero() {
    let app = test_app();
    let (addr, _token) = start_memcached(app.clone()).await;

    let mut first = connect(addr).await;
    let mut second = connect(addr).await;
    for conn in [&mut first, &mut second] {
        conn.write_all(b"GET k\r\n").await.unwrap();
        read_value(conn).await;
        assert_eq!(read_line(conn).await, "END");
    }
    assert_eq!(app.stats().curr_connections, 2);
    assert_eq!(app.stats().total_connections, 2);

    drop(first);
    drop(second);
    assert!(
        wait_until(
            || app.stats().curr_connections == 0,
            Duration::from_secs(2)
        )
        .await,
        "curr_connections stuck at {}",
        app.stats().curr_connections
    );
    // The total is monotonic.
    assert_eq!(app.stats().total_connections, 2);
}

#[tokio::test]
async fn shutdown_closes_listener_and_connections() {
    let app = test_app();
    let (addr, token) = start_memcached(app.clone()).await;
    let mut conn = connect(addr).await;

    conn.write_all(b"GET k\r\n").await.unwrap();
    read_value(&mut conn).await;
    assert_eq!(read_line(&mut conn).await, "END");

    token.cancel();

    let mut line = String::new();
    let n = conn.read_line(&mut line).await.unwrap_or(0);
    assert_eq!(n, 0, "expected EOF after shutdown");
    assert!(
        wait_until(
            || app.stats().curr_connections == 0,
            Duration::from_secs(2)
        )
        .await
    );
}

#[cfg(unix)]
#[tokio::test]
async fn serves_over_a_unix_socket() {
    use boreal_server::conn::Listener;
    use tokio::net::{UnixListener, UnixStream};
    use tokio_util::sync::CancellationToken;

    let path = std::env::temp_dir().join(format!(
        "boreal-test-{}-{}.sock",
        std::process::id(),
        common::next_worker_id()
    ));
    let _ = std::fs::remove_file(&path);
    let listener = UnixListener::bind(&path).unwrap();
    let token = CancellationToken::new();
    tokio::spawn(boreal_server::memcached::serve(
        Listener::Unix(listener),
        test_app(),
        token.clone(),
    ));

    let mut conn = BufReader::new(UnixStream::connect(&path).await.unwrap());
    conn.write_all(b"GET foo\r\n").await.unwrap();
    let mut line = String::new();
    conn.read_line(&mut line).await.unwrap();
    assert!(line.starts_with("VALUE foo 0 "), "got {line:?}");

    token.cancel();
    let _ = std::fs::remove_file(&path);
}
