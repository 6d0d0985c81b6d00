//! Shared utilities for integration testing.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use gbf_proxy::config::ProxyConfig;
use gbf_proxy::RunningProxy;

pub const IO_TIMEOUT: Duration = Duration::from_secs(10);

/// Connection bookkeeping for a mock backend.
#[derive(Debug, Default)]
pub struct BackendStats {
    pub accepted: AtomicUsize,
    pub closed: AtomicUsize,
}

impl BackendStats {
    pub fn accepted(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }
}

/// Start a backend that echoes every byte back on the same connection.
pub async fn start_echo_backend() -> (SocketAddr, Arc<BackendStats>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let stats = Arc::new(BackendStats::default());
    let task_stats = stats.clone();

    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((socket, _)) => {
                    task_stats.accepted.fetch_add(1, Ordering::SeqCst);
                    let conn_stats = task_stats.clone();
                    tokio::spawn(async move {
                        let (mut rd, mut wr) = socket.into_split();
                        let _ = tokio::io::copy(&mut rd, &mut wr).await;
                        let _ = wr.shutdown().await;
                        conn_stats.closed.fetch_add(1, Ordering::SeqCst);
                    });
                }
                Err(_) => break,
            }
        }
    });

    (addr, stats)
}

/// Start a backend that reads `expect` bytes, answers with `reply` and hangs up.
pub async fn start_reply_then_close_backend(expect: usize, reply: &'static [u8]) -> (SocketAddr, Arc<BackendStats>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let stats = Arc::new(BackendStats::default());
    let task_stats = stats.clone();

    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((mut socket, _)) => {
                    task_stats.accepted.fetch_add(1, Ordering::SeqCst);
                    let conn_stats = task_stats.clone();
                    tokio::spawn(async move {
                        let mut request = vec![0u8; expect];
                        if socket.read_exact(&mut request).await.is_ok() {
                            let _ = socket.write_all(reply).await;
                        }
                        drop(socket);
                        conn_stats.closed.fetch_add(1, Ordering::SeqCst);
                    });
                }
                Err(_) => break,
            }
        }
    });

    (addr, stats)
}

/// An address nothing listens on.
pub fn closed_port() -> SocketAddr {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap()
}

/// Proxy config on an ephemeral port in front of `backend`.
pub fn proxy_config(backend: SocketAddr) -> ProxyConfig {
    let mut config = ProxyConfig::default();
    config.listener.bind_address = "127.0.0.1:0".into();
    config.backend.address = backend.to_string();
    config.access.allowed_suffixes = vec![".granbluefantasy.jp".into(), ".mobage.jp".into()];
    config
}

pub fn start_proxy(config: &ProxyConfig) -> RunningProxy {
    gbf_proxy::start(config).unwrap()
}

pub fn server_name() -> String {
    format!("gbf-proxy/{}", env!("CARGO_PKG_VERSION"))
}

/// Read until a full response head has arrived. Returns the head (with
/// its terminator) and any bytes that followed it.
pub async fn read_head(stream: &mut TcpStream) -> (String, Vec<u8>) {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    loop {
        if let Some(end) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            let rest = buf.split_off(end + 4);
            return (String::from_utf8(buf).unwrap(), rest);
        }
        let n = tokio::time::timeout(IO_TIMEOUT, stream.read(&mut chunk))
            .await
            .expect("timed out waiting for response head")
            .unwrap();
        assert!(n > 0, "connection closed before a full head: {:?}", String::from_utf8_lossy(&buf));
        buf.extend_from_slice(&chunk[..n]);
    }
}

/// Read exactly `len` bytes.
pub async fn read_exact(stream: &mut TcpStream, len: usize) -> Vec<u8> {
    let mut buf = vec![0u8; len];
    tokio::time::timeout(IO_TIMEOUT, stream.read_exact(&mut buf))
        .await
        .expect("timed out reading")
        .unwrap();
    buf
}

/// Whether the proxy closed the connection (EOF or reset) within the timeout.
pub async fn closed_by_peer(stream: &mut TcpStream) -> bool {
    let mut chunk = [0u8; 64];
    loop {
        match tokio::time::timeout(IO_TIMEOUT, stream.read(&mut chunk)).await {
            Ok(Ok(0)) | Ok(Err(_)) => return true,
            Ok(Ok(_)) => continue,
            Err(_) => return false,
        }
    }
}

/// Everything the proxy sends until it closes the connection (EOF or reset).
pub async fn read_until_closed(stream: &mut TcpStream) -> Vec<u8> {
    let mut received = Vec::new();
    let mut chunk = [0u8; 1024];
    loop {
        match tokio::time::timeout(IO_TIMEOUT, stream.read(&mut chunk)).await {
            Ok(Ok(0)) | Ok(Err(_)) => return received,
            Ok(Ok(n)) => received.extend_from_slice(&chunk[..n]),
            Err(_) => panic!("connection still open after {:?}", IO_TIMEOUT),
        }
    }
}

/// Open a CONNECT tunnel to `authority` and consume the 200.
pub async fn open_tunnel(proxy: SocketAddr, authority: &str) -> TcpStream {
    let mut stream = TcpStream::connect(proxy).await.unwrap();
    let request = format!("CONNECT {authority} HTTP/1.1\r\nHost: {authority}\r\n\r\n");
    stream.write_all(request.as_bytes()).await.unwrap();

    let (head, rest) = read_head(&mut stream).await;
    assert!(head.starts_with("HTTP/1.1 200 Connection Established\r\n"), "{head}");
    assert!(rest.is_empty());
    stream
}

/// Poll `check` until it holds or the timeout elapses.
pub async fn eventually(check: impl Fn() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + IO_TIMEOUT;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    check()
}
