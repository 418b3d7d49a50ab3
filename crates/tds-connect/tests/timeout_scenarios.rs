//! Query timeout and attention handling against the mock server.

use std::time::{Duration, Instant};

use tds_connect::{Config, Connection, DriverErrorCode, Error};
use tds_testing::{MockResponse, MockTdsServer};

fn config_for(server: &MockTdsServer) -> Config {
    Config::new()
        .server(server.host())
        .port(server.port())
        .credentials("sa", "secret")
        .danger_plaintext(true)
        .login_timeout_secs(10)
}

#[tokio::test]
async fn query_timeout_interrupts_and_drains_the_attention_ack() {
    let server = MockTdsServer::builder()
        .with_response("WAITFOR DELAY '00:10:00'", MockResponse::Hang)
        .start()
        .await
        .expect("start mock");

    let mut config = config_for(&server).query_timeout_secs(1);
    config.cancel_query_timeout_s = Some(5);

    let mut connection = Connection::connect(config).await.expect("connect");

    let started = Instant::now();
    let err = connection
        .query_scalar_i32("WAITFOR DELAY '00:10:00'")
        .await
        .expect_err("must time out");

    assert!(matches!(err, Error::QueryTimedOut), "got {err}");
    assert_eq!(err.code(), DriverErrorCode::QueryTimedOut);

    // One second of timer plus the attention round trip; well under the
    // ten minutes the query pretended to need.
    assert!(started.elapsed() < Duration::from_secs(8));

    // The attention ack drained; the connection is reusable.
    let value = connection.query_scalar_i32("SELECT 1").await.expect("reuse");
    assert_eq!(value, None); // unscripted statement answers an empty DONE
}

#[tokio::test]
async fn queries_without_timeout_run_to_completion() {
    let server = MockTdsServer::builder()
        .with_response("SELECT 2", MockResponse::Scalar(2))
        .start()
        .await
        .expect("start mock");

    let mut connection = Connection::connect(config_for(&server))
        .await
        .expect("connect");
    assert_eq!(
        connection.query_scalar_i32("SELECT 2").await.expect("query"),
        Some(2)
    );
}
