//! Connection resiliency against the mock server.

use tds_connect::{Config, Connection};
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
async fn broken_connection_recovers_and_restores_catalog() {
    let server = MockTdsServer::builder()
        .ack_session_recovery(true)
        .with_response("UPDATE t SET x = 1", MockResponse::KillConnection)
        .with_response("UPDATE t SET x = 1", MockResponse::Affected(3))
        .with_response(
            "SELECT db_name()",
            MockResponse::StringScalar("resDB".into()),
        )
        .start()
        .await
        .expect("start mock");

    let config = config_for(&server).connect_retry(1, 1);
    let mut connection = Connection::connect(config).await.expect("connect");

    // The application selects a catalog before the break.
    connection.set_catalog("resDB").await.expect("set catalog");
    assert_eq!(connection.database(), Some("resDB"));

    // Mid-query the server kills the session; the retry policy kicks in,
    // the driver reconnects, restores the catalog, and re-executes.
    let affected = connection
        .execute_with_recovery("UPDATE t SET x = 1")
        .await
        .expect("recovered execute");
    assert_eq!(affected, 3);

    // The restored session still reports the selected catalog.
    assert_eq!(connection.database(), Some("resDB"));
    let db = connection
        .query_scalar_string("SELECT db_name()")
        .await
        .expect("query");
    assert_eq!(db.as_deref(), Some("resDB"));
}

#[tokio::test]
async fn retry_disabled_surfaces_the_break() {
    let server = MockTdsServer::builder()
        .with_response("UPDATE t SET x = 1", MockResponse::KillConnection)
        .start()
        .await
        .expect("start mock");

    let config = config_for(&server).connect_retry(0, 1);
    let mut connection = Connection::connect(config).await.expect("connect");

    let err = connection
        .execute_with_recovery("UPDATE t SET x = 1")
        .await
        .expect_err("must surface the broken connection");
    assert!(err.is_transient());
}
