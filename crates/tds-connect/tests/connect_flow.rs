//! Connection pipeline against the mock server.

use tds_connect::{Config, Connection, Error};
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
async fn login_and_scalar_query() {
    let server = MockTdsServer::builder()
        .database("testdb")
        .with_response("SELECT 1", MockResponse::Scalar(1))
        .start()
        .await
        .expect("start mock");

    let mut connection = Connection::connect(config_for(&server))
        .await
        .expect("connect");

    // Login applied the environment changes and probed the edition.
    assert_eq!(connection.database(), Some("testdb"));
    assert_eq!(connection.engine_edition(), Some(3));
    assert!(!connection.is_cloud_database());
    assert!(connection.login_ack().is_some());

    // A round trip reads a ROW token with one int column.
    let value = connection.query_scalar_i32("SELECT 1").await.expect("query");
    assert_eq!(value, Some(1));
}

#[tokio::test]
async fn string_scalar_query() {
    let server = MockTdsServer::builder()
        .with_response("SELECT db_name()", MockResponse::StringScalar("resDB".into()))
        .start()
        .await
        .expect("start mock");

    let mut connection = Connection::connect(config_for(&server))
        .await
        .expect("connect");

    let value = connection
        .query_scalar_string("SELECT db_name()")
        .await
        .expect("query");
    assert_eq!(value.as_deref(), Some("resDB"));
}

#[tokio::test]
async fn server_error_is_deferred_until_end_of_message() {
    let server = MockTdsServer::builder()
        .with_response(
            "SELECT 1/0",
            MockResponse::Error {
                number: 8134,
                message: "Divide by zero error encountered.".into(),
                severity: 16,
            },
        )
        .start()
        .await
        .expect("start mock");

    let mut connection = Connection::connect(config_for(&server))
        .await
        .expect("connect");

    // The ERROR token is recorded, the trailing DONE still parses, and
    // the server's message is what surfaces.
    let err = connection
        .query_scalar_i32("SELECT 1/0")
        .await
        .expect_err("must fail");
    match err {
        Error::Server { number, message, .. } => {
            assert_eq!(number, 8134);
            assert!(message.contains("Divide by zero"));
        }
        other => panic!("unexpected error: {other}"),
    }

    // The connection survives the statement failure.
    let value = connection.query_scalar_i32("SELECT 1").await;
    assert!(value.is_ok());
}

#[tokio::test]
async fn column_encryption_requires_feature_ack() {
    // Server does not acknowledge the feature: connect must fail.
    let server = MockTdsServer::builder().start().await.expect("start mock");
    let config = config_for(&server).column_encryption(true);

    let err = Connection::connect(config).await.expect_err("must fail");
    assert!(matches!(err, Error::ColumnEncryptionNotSupportedByServer));
}

#[tokio::test]
async fn column_encryption_ack_is_recorded() {
    let server = MockTdsServer::builder()
        .ack_column_encryption(true)
        .start()
        .await
        .expect("start mock");
    let config = config_for(&server).column_encryption(true);

    let connection = Connection::connect(config).await.expect("connect");
    assert!(connection.server_supports_column_encryption());
}

#[tokio::test]
async fn session_recovery_negotiation_is_visible() {
    let server = MockTdsServer::builder()
        .ack_session_recovery(true)
        .start()
        .await
        .expect("start mock");

    let connection = Connection::connect(config_for(&server))
        .await
        .expect("connect");
    assert!(connection.session_recovery().negotiated);

    // Without the ack the flag stays down.
    let server = MockTdsServer::builder().start().await.expect("start mock");
    let connection = Connection::connect(config_for(&server))
        .await
        .expect("connect");
    assert!(!connection.session_recovery().negotiated);
}

#[tokio::test]
async fn client_requiring_encryption_rejects_not_supported_server() {
    let server = MockTdsServer::builder().start().await.expect("start mock");

    // encrypt=true makes the client request ON; the mock only supports
    // plaintext and answers NOT_SUP.
    let mut config = config_for(&server);
    config.encrypt = true;
    config.danger_plaintext = false;

    let err = Connection::connect(config).await.expect_err("must fail");
    assert!(matches!(err, Error::EncryptionRequiredButNotSupported));
}

#[tokio::test]
async fn execute_reports_affected_rows() {
    let server = MockTdsServer::builder()
        .with_response("UPDATE t SET x = 1", MockResponse::Affected(5))
        .start()
        .await
        .expect("start mock");

    let mut connection = Connection::connect(config_for(&server))
        .await
        .expect("connect");
    let affected = connection
        .execute("UPDATE t SET x = 1")
        .await
        .expect("execute");
    assert_eq!(affected, 5);
}
