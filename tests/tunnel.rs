//! End-to-end negotiation and relay tests against a live proxy.

use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

mod common;

use common::{
    closed_by_peer, closed_port, eventually, open_tunnel, proxy_config, read_exact, read_head,
    read_until_closed, server_name, start_echo_backend, start_proxy,
    start_reply_then_close_backend,
};

#[tokio::test]
async fn connect_to_allowed_host_relays_to_backend() {
    let (backend, stats) = start_echo_backend().await;
    let proxy = start_proxy(&proxy_config(backend));

    let mut client = TcpStream::connect(proxy.local_addr()).await.unwrap();
    client
        .write_all(b"CONNECT game.granbluefantasy.jp:443 HTTP/1.1\r\nHost: game.granbluefantasy.jp\r\n\r\n")
        .await
        .unwrap();

    let (head, _) = read_head(&mut client).await;
    assert_eq!(
        head,
        format!("HTTP/1.1 200 Connection Established\r\nServer: {}\r\n\r\n", server_name())
    );

    client.write_all(b"\x16\x03\x01hello tunnel").await.unwrap();
    assert_eq!(read_exact(&mut client, 15).await, b"\x16\x03\x01hello tunnel");
    assert_eq!(stats.accepted(), 1);

    proxy.stop().unwrap();
}

#[tokio::test]
async fn plaintext_request_is_redirected_and_connection_stays_open() {
    let (backend, stats) = start_echo_backend().await;
    let proxy = start_proxy(&proxy_config(backend));

    let mut client = TcpStream::connect(proxy.local_addr()).await.unwrap();
    client
        .write_all(b"GET http://game.granbluefantasy.jp/api HTTP/1.1\r\nHost: game.granbluefantasy.jp\r\n\r\n")
        .await
        .unwrap();

    let (head, _) = read_head(&mut client).await;
    assert!(head.starts_with("HTTP/1.1 302 Found\r\n"), "{head}");
    assert!(head.contains("Location: https://game.granbluefantasy.jp/api\r\n"));
    assert!(head.contains("Content-Length: 0\r\n"));
    assert!(head.contains("Connection: keep-alive\r\n"));
    assert!(head.contains(&format!("Server: {}\r\n", server_name())));

    // Same connection, now asking for the tunnel.
    client
        .write_all(b"CONNECT game.granbluefantasy.jp:443 HTTP/1.1\r\n\r\n")
        .await
        .unwrap();
    let (head, _) = read_head(&mut client).await;
    assert!(head.starts_with("HTTP/1.1 200 Connection Established\r\n"), "{head}");

    client.write_all(b"ping").await.unwrap();
    assert_eq!(read_exact(&mut client, 4).await, b"ping");
    assert_eq!(stats.accepted(), 1);

    proxy.stop().unwrap();
}

#[tokio::test]
async fn disallowed_host_is_forbidden_and_closed() {
    let (backend, stats) = start_echo_backend().await;
    let proxy = start_proxy(&proxy_config(backend));

    let mut client = TcpStream::connect(proxy.local_addr()).await.unwrap();
    client
        .write_all(b"GET http://evil.example.com/ HTTP/1.1\r\nHost: evil.example.com\r\n\r\n")
        .await
        .unwrap();

    let (head, _) = read_head(&mut client).await;
    assert_eq!(head, format!("HTTP/1.1 403 Forbidden\r\nServer: {}\r\n\r\n", server_name()));
    assert!(closed_by_peer(&mut client).await);
    assert_eq!(stats.accepted(), 0);

    proxy.stop().unwrap();
}

#[tokio::test]
async fn garbage_is_bad_request_and_closed() {
    let (backend, stats) = start_echo_backend().await;
    let proxy = start_proxy(&proxy_config(backend));

    let mut client = TcpStream::connect(proxy.local_addr()).await.unwrap();
    client.write_all(b"\x00\x01\x02 not http\r\n\r\n").await.unwrap();

    let (head, _) = read_head(&mut client).await;
    assert!(head.starts_with("HTTP/1.1 400 Bad Request\r\n"), "{head}");
    assert!(closed_by_peer(&mut client).await);
    assert_eq!(stats.accepted(), 0);

    proxy.stop().unwrap();
}

#[tokio::test]
async fn https_request_is_forwarded_verbatim() {
    let (backend, _stats) = start_echo_backend().await;
    let proxy = start_proxy(&proxy_config(backend));

    let mut client = TcpStream::connect(proxy.local_addr()).await.unwrap();
    let request = b"GET https://game.granbluefantasy.jp/ HTTP/1.1\r\nHost: game.granbluefantasy.jp\r\n\r\n";
    client.write_all(request).await.unwrap();

    // The echo backend returns exactly what the proxy forwarded.
    assert_eq!(read_exact(&mut client, request.len()).await, request);

    proxy.stop().unwrap();
}

#[tokio::test]
async fn split_request_head_is_reassembled() {
    let (backend, _stats) = start_echo_backend().await;
    let proxy = start_proxy(&proxy_config(backend));

    let mut client = TcpStream::connect(proxy.local_addr()).await.unwrap();
    client.write_all(b"CONNECT a.mobage.jp:443 HT").await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    client.write_all(b"TP/1.1\r\n\r\n").await.unwrap();

    let (head, _) = read_head(&mut client).await;
    assert!(head.starts_with("HTTP/1.1 200 Connection Established\r\n"), "{head}");

    proxy.stop().unwrap();
}

#[tokio::test]
async fn unreachable_backend_closes_client_without_response() {
    let proxy = start_proxy(&proxy_config(closed_port()));

    let mut client = TcpStream::connect(proxy.local_addr()).await.unwrap();
    client
        .write_all(b"GET https://game.granbluefantasy.jp/ HTTP/1.1\r\nHost: game.granbluefantasy.jp\r\n\r\n")
        .await
        .unwrap();

    assert!(closed_by_peer(&mut client).await);

    // The reactor keeps serving other clients.
    let mut other = TcpStream::connect(proxy.local_addr()).await.unwrap();
    other
        .write_all(b"GET http://a.mobage.jp/ HTTP/1.1\r\n\r\n")
        .await
        .unwrap();
    let (head, _) = read_head(&mut other).await;
    assert!(head.starts_with("HTTP/1.1 302 Found\r\n"), "{head}");

    proxy.stop().unwrap();
}

#[tokio::test]
async fn connect_to_unreachable_backend_gets_no_response() {
    let proxy = start_proxy(&proxy_config(closed_port()));

    let mut client = TcpStream::connect(proxy.local_addr()).await.unwrap();
    client
        .write_all(b"CONNECT a.mobage.jp:443 HTTP/1.1\r\n\r\n")
        .await
        .unwrap();

    let received = read_until_closed(&mut client).await;
    assert!(
        received.is_empty(),
        "unexpected reply: {:?}",
        String::from_utf8_lossy(&received)
    );

    proxy.stop().unwrap();
}

#[tokio::test]
async fn client_close_propagates_to_backend() {
    let (backend, stats) = start_echo_backend().await;
    let proxy = start_proxy(&proxy_config(backend));

    let mut client = open_tunnel(proxy.local_addr(), "game.granbluefantasy.jp:443").await;
    client.write_all(b"bye").await.unwrap();
    assert_eq!(read_exact(&mut client, 3).await, b"bye");
    drop(client);

    assert!(eventually(|| stats.closed() == 1).await);

    proxy.stop().unwrap();
}

#[tokio::test]
async fn backend_close_propagates_to_client() {
    let (backend, stats) = start_reply_then_close_backend(4, b"reply").await;
    let proxy = start_proxy(&proxy_config(backend));

    let mut client = open_tunnel(proxy.local_addr(), "game.granbluefantasy.jp:443").await;
    client.write_all(b"ping").await.unwrap();

    assert_eq!(read_exact(&mut client, 5).await, b"reply");
    assert!(closed_by_peer(&mut client).await);
    assert!(eventually(|| stats.closed() == 1).await);

    proxy.stop().unwrap();
}

#[tokio::test]
async fn connection_limit_refuses_extra_clients() {
    let (backend, _stats) = start_echo_backend().await;
    let mut config = proxy_config(backend);
    config.listener.max_connections = 1;
    let proxy = start_proxy(&config);

    let mut first = open_tunnel(proxy.local_addr(), "a.mobage.jp:443").await;

    let mut second = TcpStream::connect(proxy.local_addr()).await.unwrap();
    assert!(closed_by_peer(&mut second).await);

    first.write_all(b"still here").await.unwrap();
    assert_eq!(read_exact(&mut first, 10).await, b"still here");

    proxy.stop().unwrap();
}

#[tokio::test]
async fn case_mismatched_host_is_forbidden() {
    let (backend, _stats) = start_echo_backend().await;
    let proxy = start_proxy(&proxy_config(backend));

    let mut client = TcpStream::connect(proxy.local_addr()).await.unwrap();
    client
        .write_all(b"CONNECT GAME.GRANBLUEFANTASY.JP:443 HTTP/1.1\r\n\r\n")
        .await
        .unwrap();

    let (head, _) = read_head(&mut client).await;
    assert!(head.starts_with("HTTP/1.1 403 Forbidden\r\n"), "{head}");

    proxy.stop().unwrap();
}
