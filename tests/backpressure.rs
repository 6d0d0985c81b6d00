//! Flow control: a stalled tunnel must neither lose bytes nor starve others.

use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};

mod common;

use common::{open_tunnel, proxy_config, read_exact, start_echo_backend, start_proxy, IO_TIMEOUT};

const PAYLOAD_BYTES: usize = 8 * 1024 * 1024;

fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn stalled_reader_does_not_block_other_tunnels() {
    let (backend, _stats) = start_echo_backend().await;
    let mut config = proxy_config(backend);
    config.tunnel.relay_buffer_bytes = 64 * 1024;
    let proxy = start_proxy(&config);

    let bulk = open_tunnel(proxy.local_addr(), "game.granbluefantasy.jp:443").await;
    let (mut bulk_rd, mut bulk_wr) = bulk.into_split();

    // Nobody reads the echo yet, so this write stalls once every buffer
    // along the path is full.
    let payload = pattern(PAYLOAD_BYTES);
    let expected = payload.clone();
    let writer = tokio::spawn(async move {
        bulk_wr.write_all(&payload).await.unwrap();
        bulk_wr
    });

    tokio::time::sleep(Duration::from_millis(300)).await;

    let mut ping = open_tunnel(proxy.local_addr(), "a.mobage.jp:443").await;
    ping.write_all(b"ping").await.unwrap();
    assert_eq!(read_exact(&mut ping, 4).await, b"ping");

    let mut received = vec![0u8; PAYLOAD_BYTES];
    tokio::time::timeout(IO_TIMEOUT * 3, bulk_rd.read_exact(&mut received))
        .await
        .expect("timed out draining the bulk tunnel")
        .unwrap();
    assert!(received == expected, "bulk payload corrupted or reordered");

    let _bulk_wr = tokio::time::timeout(IO_TIMEOUT, writer)
        .await
        .expect("writer never finished")
        .unwrap();

    proxy.stop().unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn large_transfer_arrives_in_order() {
    let (backend, _stats) = start_echo_backend().await;
    let proxy = start_proxy(&proxy_config(backend));

    let tunnel = open_tunnel(proxy.local_addr(), "game.granbluefantasy.jp:443").await;
    let (mut rd, mut wr) = tunnel.into_split();

    let payload = pattern(2 * 1024 * 1024 + 17);
    let expected = payload.clone();
    let writer = tokio::spawn(async move {
        for chunk in payload.chunks(4093) {
            wr.write_all(chunk).await.unwrap();
        }
        wr
    });

    let mut received = vec![0u8; expected.len()];
    tokio::time::timeout(IO_TIMEOUT * 3, rd.read_exact(&mut received))
        .await
        .expect("timed out reading echo")
        .unwrap();
    assert!(received == expected);
    writer.await.unwrap();

    proxy.stop().unwrap();
}
