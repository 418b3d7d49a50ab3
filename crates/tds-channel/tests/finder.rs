//! Parallel connect racing with real sockets.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::TcpListener;

use tds_channel::ChannelError;
use tds_channel::finder::race_addresses;

/// Bind and immediately drop a listener, yielding an address that
/// refuses connections.
async fn refused_addr() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    drop(listener);
    addr
}

#[tokio::test]
async fn first_accepting_candidate_wins() {
    let dead_a = refused_addr().await;
    let dead_b = refused_addr().await;

    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let live = listener.local_addr().expect("addr");
    let accept_task = tokio::spawn(async move {
        let _ = listener.accept().await;
        // Hold briefly so the winner's socket stays open.
        tokio::time::sleep(Duration::from_millis(200)).await;
    });

    let stream = race_addresses(vec![dead_a, live, dead_b], Duration::from_secs(5))
        .await
        .expect("race should find the live endpoint");
    assert_eq!(stream.peer_addr().expect("peer"), live);

    accept_task.await.expect("accept task");
}

#[tokio::test]
async fn all_refused_prefers_the_connect_error_over_timeout() {
    let dead_a = refused_addr().await;
    let dead_b = refused_addr().await;

    let err = race_addresses(vec![dead_a, dead_b], Duration::from_secs(5))
        .await
        .expect_err("nothing listens");

    // The refused-connection error must win over a bare timeout.
    assert!(matches!(err, ChannelError::Io(_)), "got {err}");
}

#[tokio::test]
async fn single_candidate_does_not_spawn_a_race() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let live = listener.local_addr().expect("addr");
    let accept_task = tokio::spawn(async move {
        let _ = listener.accept().await;
    });

    let stream = race_addresses(vec![live], Duration::from_secs(5))
        .await
        .expect("single candidate connects");
    assert_eq!(stream.peer_addr().expect("peer"), live);
    accept_task.await.expect("accept task");
}
