//! The connection director.
//!
//! Drives a connection from socket finding through pre-login, TLS,
//! LOGIN7, feature extensions and the engine-edition probe, then owns the
//! ready channel. One command at a time executes against it; the
//! connection serializes request and response by construction (`&mut
//! self` for the whole exchange).

use std::sync::Arc;
use std::time::Duration;

use tds_channel::Channel;
use tds_codec::{TdsReader, TdsWriter};
use tds_wire::login7::{FeatureExtension, FeatureId, Login7};
use tds_wire::packet::PacketType;
use tds_wire::prelogin::{EncryptionLevel, PreLogin};
use tds_wire::sql_batch::encode_sql_batch_in_transaction;
use tds_wire::token::{EnvChange, EnvChangeType, EnvChangeValue, LoginAck};
use tds_wire::version::TdsVersion;

use async_trait::async_trait;

use crate::command::{Command, ConnectionWatchdog, TimeoutTimer, TimerTarget};
use crate::config::{AuthenticationMethod, Config};
use crate::error::{DriverErrorCode, Error, Result};
use crate::fedauth::{BearerTokenProvider, encode_fedauth_token_message, validate_fed_auth_info};
use crate::metadata::{ColumnValue, ResultSetMeta, read_col_metadata, read_column_value};
use crate::parser::{
    ExecuteHandler, ParseContext, TokenStreamHandler, parse_tokens, read_done, read_login_ack,
};
use crate::recovery::{ReconnectPolicy, SessionRecoveryState, run_reconnect};

/// Engine-edition probe statement, issued once after login.
const ENGINE_EDITION_SQL: &str = "SELECT CAST(SERVERPROPERTY('EngineEdition') AS INT)";

/// Azure SQL Database engine edition.
const ENGINE_EDITION_SQL_AZURE: i32 = 5;
/// Azure Synapse / analytics warehouse engine editions.
const ENGINE_EDITION_SQL_AZURE_DW: i32 = 6;
const ENGINE_EDITION_SQL_AZURE_SYNAPSE: i32 = 11;

/// Routing redirects followed before giving up.
const MAX_ROUTING_REDIRECTS: u8 = 2;

/// Server-driven session state, updated by environment-change tokens.
#[derive(Debug, Clone, Default)]
pub struct SessionEnvironment {
    /// Current database.
    pub database: Option<String>,
    /// Current language.
    pub language: Option<String>,
    /// Current collation bytes.
    pub collation: Option<Vec<u8>>,
    /// Renegotiated packet size awaiting application to the channel.
    pub packet_size: Option<usize>,
    /// Transaction descriptor; 0 in auto-commit.
    pub transaction_descriptor: u64,
    /// Routing redirect captured from the server.
    pub routing: Option<(String, u16)>,
    /// Whether a reset-connection acknowledgment arrived.
    pub reset_ack_seen: bool,
}

impl SessionEnvironment {
    /// Apply one environment change. Returns whether it was a routing
    /// redirect (which stops response parsing).
    pub fn apply(&mut self, change: &EnvChange) -> bool {
        match change.env_type {
            EnvChangeType::Database => {
                if let EnvChangeValue::String(db) = &change.new_value {
                    tracing::debug!(database = %db, "database changed");
                    self.database = Some(db.clone());
                }
            }
            EnvChangeType::Language => {
                if let EnvChangeValue::String(lang) = &change.new_value {
                    self.language = Some(lang.clone());
                }
            }
            EnvChangeType::PacketSize => {
                if let EnvChangeValue::String(size) = &change.new_value {
                    if let Ok(size) = size.parse::<usize>() {
                        tracing::debug!(packet_size = size, "packet size renegotiated");
                        self.packet_size = Some(size);
                    }
                }
            }
            EnvChangeType::SqlCollation => {
                if let EnvChangeValue::Binary(bytes) = &change.new_value {
                    self.collation = Some(bytes.to_vec());
                }
            }
            EnvChangeType::BeginTransaction
            | EnvChangeType::CommitTransaction
            | EnvChangeType::RollbackTransaction
            | EnvChangeType::EnlistDtcTransaction
            | EnvChangeType::TransactionEnded => {
                if let Some(descriptor) = change.transaction_descriptor() {
                    tracing::debug!(descriptor, "transaction descriptor updated");
                    self.transaction_descriptor = descriptor;
                }
            }
            EnvChangeType::ResetConnectionAck => {
                self.reset_ack_seen = true;
            }
            EnvChangeType::RealTimeLogShipping => {
                tracing::debug!("real-time log shipping environment change");
            }
            EnvChangeType::Routing => {
                if let Some((host, port)) = change.routing_target() {
                    tracing::info!(host = %host, port, "routing redirect received");
                    self.routing = Some((host.to_string(), port));
                    return true;
                }
            }
            _ => {}
        }
        false
    }
}

/// How much of the session runs under TLS.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NegotiatedEncryption {
    /// No TLS at all.
    None,
    /// TLS for the login exchange only; dropped before the first query.
    LoginOnly,
    /// TLS for the whole session.
    Full,
}

/// Negotiate the session encryption level from both sides' pre-login
/// answers.
fn negotiate_encryption(
    client: EncryptionLevel,
    server: EncryptionLevel,
) -> Result<NegotiatedEncryption> {
    use EncryptionLevel::{NotSupported, Off, On, Required};

    match (client, server) {
        (NotSupported, NotSupported | Off) => Ok(NegotiatedEncryption::None),
        (NotSupported, On | Required) => Err(Error::EncryptionRequiredButNotSupported),
        (On | Required, NotSupported) => Err(Error::EncryptionRequiredButNotSupported),
        (Off, NotSupported) => Ok(NegotiatedEncryption::None),
        (Off, Off) => Ok(NegotiatedEncryption::LoginOnly),
        _ => Ok(NegotiatedEncryption::Full),
    }
}

/// A connection with a completed login.
pub struct Connection {
    channel: Channel,
    config: Config,
    env: SessionEnvironment,
    watchdog: Arc<ConnectionWatchdog>,
    tds_version: TdsVersion,
    login_ack: Option<LoginAck>,
    server_supports_column_encryption: bool,
    session_recovery: SessionRecoveryState,
    engine_edition: Option<i32>,
    token_provider: Option<Arc<dyn BearerTokenProvider>>,
}

impl Connection {
    /// Open a connection and complete the login pipeline.
    pub async fn connect(config: Config) -> Result<Self> {
        Self::connect_with(config, None).await
    }

    /// Open a connection with a federated-auth token provider.
    pub async fn connect_with(
        config: Config,
        token_provider: Option<Arc<dyn BearerTokenProvider>>,
    ) -> Result<Self> {
        config.validate()?;

        let mut current = config;
        let mut redirects = 0u8;
        loop {
            match Self::try_connect(&current, token_provider.clone()).await {
                Ok(connection) => return Ok(connection),
                Err(Error::RoutingRedirect { host, port }) if redirects < MAX_ROUTING_REDIRECTS => {
                    redirects += 1;
                    tracing::info!(
                        host = %host,
                        port,
                        redirect = redirects,
                        "following routing redirect"
                    );
                    current.server_name = host;
                    current.port = port;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn try_connect(
        config: &Config,
        token_provider: Option<Arc<dyn BearerTokenProvider>>,
    ) -> Result<Self> {
        if config.integrated_security {
            return Err(Error::Config(
                "integrated security is not available in this build; \
                 use SQL or federated authentication"
                    .into(),
            ));
        }

        let mut channel = Self::open_channel(config).await?;
        channel.set_network_timeout(Some(Duration::from_secs(u64::from(
            config.login_timeout_s,
        ))));

        // Pre-login.
        let client_encryption = if config.danger_plaintext {
            EncryptionLevel::NotSupported
        } else if config.encrypt {
            EncryptionLevel::On
        } else {
            EncryptionLevel::Off
        };

        let mut prelogin = PreLogin::client(TdsVersion::DENALI, client_encryption);
        prelogin.instance = config.instance_name.clone();
        prelogin.fed_auth_required = config.authentication.is_federated();

        {
            let mut writer = TdsWriter::new(&mut channel);
            writer.start_message(PacketType::PreLogin);
            writer.write_bytes(&prelogin.encode()).await?;
            writer.end_message().await?;
        }

        let response = {
            let mut reader = TdsReader::new(&mut channel);
            reader.read_to_end().await?
        };
        let server_prelogin = PreLogin::decode(&response[..])?;
        tracing::debug!(
            server_encryption = ?server_prelogin.encryption,
            server_version = server_prelogin.version,
            "pre-login response received"
        );

        let negotiated = negotiate_encryption(client_encryption, server_prelogin.encryption)?;

        if negotiated != NegotiatedEncryption::None {
            let mut tls_options = config.tls_options();
            channel
                .enable_tls(&config.server_name, &mut tls_options)
                .await?;
        }

        // LOGIN7.
        let column_encryption_requested = config.column_encryption_setting.is_enabled();
        let login = Self::build_login7(config, server_prelogin.fed_auth_required);

        {
            let mut writer = TdsWriter::new(&mut channel);
            writer.start_message(PacketType::Login7);
            writer.write_bytes(&login.encode()).await?;
            writer.end_message().await?;
        }

        let mut env = SessionEnvironment::default();
        let command = Command::new(None, None);
        let mut login_handler = LoginTokenHandler;

        let mut ctx = ParseContext::new(&mut env, Some(&command))
            .with_column_encryption(column_encryption_requested);
        {
            let mut reader = TdsReader::with_sink(&mut channel, &command);
            parse_tokens(&mut reader, &mut ctx, &mut login_handler).await?;
        }

        // Federated auth: answer FEDAUTHINFO with a bearer token and
        // parse the rest of the login response.
        if ctx.login_ack.is_none() {
            if let Some(info) = ctx.fed_auth_info.take() {
                validate_fed_auth_info(&info)?;
                let provider = token_provider.clone().ok_or_else(|| {
                    Error::FedAuth("no bearer token provider configured".into())
                })?;
                let token = provider
                    .acquire_token(&info, config.user.as_deref(), config.password.as_deref())
                    .await?;

                let message = encode_fedauth_token_message(&token);
                {
                    let mut writer = TdsWriter::new(&mut channel);
                    writer.start_message(PacketType::FedAuthToken);
                    writer.write_bytes(&message).await?;
                    writer.end_message().await?;
                }

                let mut reader = TdsReader::with_sink(&mut channel, &command);
                parse_tokens(&mut reader, &mut ctx, &mut login_handler).await?;
            }
        }

        let feature_acks = std::mem::take(&mut ctx.feature_acks);
        let login_ack = ctx.login_ack.take();
        drop(ctx);

        if let Some((host, port)) = env.routing.take() {
            return Err(Error::RoutingRedirect { host, port });
        }

        let login_ack =
            login_ack.ok_or_else(|| Error::Login("no login acknowledgment received".into()))?;
        let tds_version = TdsVersion::new(login_ack.tds_version);
        tracing::info!(
            version = %tds_version,
            server = %login_ack.prog_name,
            "login acknowledged"
        );

        // Feature acknowledgments.
        let mut server_supports_column_encryption = false;
        let mut session_recovery = SessionRecoveryState::default();
        for ack in &feature_acks {
            match ack.feature_id {
                id if id == FeatureId::ColumnEncryption as u8 => {
                    server_supports_column_encryption = true;
                }
                id if id == FeatureId::SessionRecovery as u8 => {
                    session_recovery.negotiated = true;
                }
                id if id == FeatureId::FedAuth as u8 => {
                    tracing::debug!("federated auth feature acknowledged");
                }
                id => tracing::debug!(feature_id = id, "unrecognized feature acknowledgment"),
            }
        }

        if config.connect_retry_count > 0 && !session_recovery.negotiated {
            tracing::debug!("server did not acknowledge session recovery");
        }

        // Apply a renegotiated packet size before the first query.
        if let Some(size) = env.packet_size.take() {
            channel.set_packet_size(size);
        }

        // Login-only encryption: drop TLS before the first query.
        if negotiated == NegotiatedEncryption::LoginOnly {
            channel.disable_tls()?;
        }

        // Login is done: revert to an unbounded network timeout; command
        // deadlines come from the timeout timers.
        channel.set_network_timeout(None);

        // Capture the initial recovery snapshot.
        session_recovery.database = env.database.clone();
        session_recovery.language = env.language.clone();
        session_recovery.collation = env.collation.clone();
        session_recovery.packet_size = Some(channel.packet_size());
        session_recovery.transaction_descriptor = env.transaction_descriptor;

        let mut connection = Self {
            channel,
            config: config.clone(),
            env,
            watchdog: Arc::new(ConnectionWatchdog::new()),
            tds_version,
            login_ack: Some(login_ack),
            server_supports_column_encryption,
            session_recovery,
            engine_edition: None,
            token_provider,
        };

        // Engine edition probe, once per connection.
        let edition = connection.query_scalar_i32(ENGINE_EDITION_SQL).await?;
        connection.engine_edition = edition;
        tracing::debug!(engine_edition = ?edition, "engine edition probed");

        Ok(connection)
    }

    async fn open_channel(config: &Config) -> Result<Channel> {
        let opts = config.connect_options(false);

        // TNIR: a short first attempt against the first address, then the
        // ordinary path.
        if opts.use_tnir && !opts.use_parallel {
            match Channel::open(
                &config.server_name,
                config.port,
                &config.connect_options(true),
            )
            .await
            {
                Ok(channel) => return Ok(channel),
                Err(e) => {
                    tracing::debug!(error = %e, "TNIR first attempt failed; retrying with full timeout");
                }
            }
        }

        Ok(Channel::open(&config.server_name, config.port, &opts).await?)
    }

    fn build_login7(config: &Config, fed_auth_echo: bool) -> Login7 {
        let hostname = std::env::var("HOSTNAME").unwrap_or_default();
        let mut login = Login7::new()
            .with_hostname(hostname)
            .with_server_name(&config.server_name)
            .with_app_name(&config.application_name)
            .with_packet_size(config.packet_size);

        if let Some(database) = &config.database {
            login = login.with_database(database);
        }

        match config.authentication {
            AuthenticationMethod::ActiveDirectoryPassword => {
                login = login.with_feature(FeatureExtension::fed_auth(
                    crate::fedauth::workflow::USERNAME_PASSWORD,
                    fed_auth_echo,
                ));
            }
            AuthenticationMethod::ActiveDirectoryIntegrated => {
                login = login.with_feature(FeatureExtension::fed_auth(
                    crate::fedauth::workflow::INTEGRATED,
                    fed_auth_echo,
                ));
            }
            _ => {
                login = login.with_sql_auth(
                    config.user.clone().unwrap_or_default(),
                    config.password.clone().unwrap_or_default(),
                );
            }
        }

        if config.column_encryption_setting.is_enabled() {
            login = login.with_feature(FeatureExtension::column_encryption());
        }
        if config.connect_retry_count > 0 {
            login = login.with_feature(FeatureExtension::session_recovery());
        }

        login
    }

    /// The active configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The session environment.
    #[must_use]
    pub fn env(&self) -> &SessionEnvironment {
        &self.env
    }

    /// Current database, when the server has announced one.
    #[must_use]
    pub fn database(&self) -> Option<&str> {
        self.env.database.as_deref()
    }

    /// Negotiated TDS version.
    #[must_use]
    pub fn tds_version(&self) -> TdsVersion {
        self.tds_version
    }

    /// Login acknowledgment details.
    #[must_use]
    pub fn login_ack(&self) -> Option<&LoginAck> {
        self.login_ack.as_ref()
    }

    /// Whether the server acknowledged column encryption.
    #[must_use]
    pub fn server_supports_column_encryption(&self) -> bool {
        self.server_supports_column_encryption
    }

    /// Session-recovery negotiation state. Test seam.
    #[must_use]
    pub fn session_recovery(&self) -> &SessionRecoveryState {
        &self.session_recovery
    }

    /// Cached engine edition from the post-login probe.
    #[must_use]
    pub fn engine_edition(&self) -> Option<i32> {
        self.engine_edition
    }

    /// Whether the server is a cloud database service.
    #[must_use]
    pub fn is_cloud_database(&self) -> bool {
        self.engine_edition == Some(ENGINE_EDITION_SQL_AZURE)
    }

    /// Whether the server is a cloud analytics warehouse.
    #[must_use]
    pub fn is_cloud_analytics_warehouse(&self) -> bool {
        matches!(
            self.engine_edition,
            Some(ENGINE_EDITION_SQL_AZURE_DW) | Some(ENGINE_EDITION_SQL_AZURE_SYNAPSE)
        )
    }

    /// Terminate the connection; every subsequent operation fails with
    /// a closed-connection error.
    pub fn terminate(&mut self, code: DriverErrorCode) {
        tracing::warn!(?code, "terminating connection");
        self.watchdog.terminate(code);
    }

    fn ensure_open(&self) -> Result<()> {
        if self.watchdog.is_terminated() {
            return Err(Error::ConnectionClosed);
        }
        Ok(())
    }

    /// Run a statement and return the first column of the first row as
    /// an i32.
    pub async fn query_scalar_i32(&mut self, sql: &str) -> Result<Option<i32>> {
        let value = self.query_scalar(sql).await?;
        Ok(value.and_then(|v| v.as_i32()))
    }

    /// Run a statement and return the first column of the first row as a
    /// string.
    pub async fn query_scalar_string(&mut self, sql: &str) -> Result<Option<String>> {
        let value = self.query_scalar(sql).await?;
        Ok(value.and_then(|v| v.as_str().map(String::from)))
    }

    /// Run a statement and return the first column of the first row.
    pub async fn query_scalar(&mut self, sql: &str) -> Result<Option<ColumnValue>> {
        self.ensure_open()?;

        let command = Command::new(
            self.config.query_timeout(),
            self.config.cancel_query_timeout(),
        );
        let timer = TimeoutTimer::start_for_command(&command);
        let keepalive = self.start_keepalive_timer(&command);

        let result = self.run_scalar(sql, &command).await;

        if let Some(timer) = timer {
            timer.stop();
        }
        if let Some(keepalive) = keepalive {
            keepalive.stop();
        }
        self.settle_command(&command, result).await
    }

    /// Execute a statement; returns the affected-row count when the
    /// server reported one.
    pub async fn execute(&mut self, sql: &str) -> Result<u64> {
        self.ensure_open()?;

        let command = Command::new(
            self.config.query_timeout(),
            self.config.cancel_query_timeout(),
        );
        let timer = TimeoutTimer::start_for_command(&command);
        let keepalive = self.start_keepalive_timer(&command);

        let result = self.run_execute(sql, &command).await;

        if let Some(timer) = timer {
            timer.stop();
        }
        if let Some(keepalive) = keepalive {
            keepalive.stop();
        }
        self.settle_command(&command, result).await
    }

    /// Execute with automatic recovery: a transient failure reconnects
    /// under the retry policy, restores the session, and retries once.
    pub async fn execute_with_recovery(&mut self, sql: &str) -> Result<u64> {
        match self.execute(sql).await {
            Err(e) if e.is_transient() && self.config.connect_retry_count > 0 => {
                tracing::warn!(error = %e, "connection broken mid-query; attempting recovery");
                self.reconnect().await?;
                self.execute(sql).await
            }
            other => other,
        }
    }

    /// Reconnect a broken connection under the retry policy and restore
    /// the captured session state.
    pub async fn reconnect(&mut self) -> Result<()> {
        let policy = ReconnectPolicy::from_config(&self.config);
        let config = self.config.clone();
        let token_provider = self.token_provider.clone();
        let restore_database = self.session_recovery.database.clone();

        let fresh = run_reconnect(&policy, self.config.query_timeout(), move |_attempt| {
            let config = config.clone();
            let token_provider = token_provider.clone();
            async move { Self::try_connect(&config, token_provider).await }
        })
        .await?;

        *self = fresh;

        // Restore the catalog the application had selected.
        if let Some(database) = restore_database {
            if self.env.database.as_deref() != Some(database.as_str()) {
                let statement = format!("USE [{}]", database.replace(']', "]]"));
                self.execute(&statement).await?;
                self.env.database = Some(database.clone());
            }
            self.session_recovery.database = Some(database);
        }

        tracing::info!("connection recovered");
        Ok(())
    }

    /// Select the current catalog, tracking it for session recovery.
    pub async fn set_catalog(&mut self, database: &str) -> Result<()> {
        let statement = format!("USE [{}]", database.replace(']', "]]"));
        self.execute(&statement).await?;
        self.env.database = Some(database.to_string());
        self.session_recovery.database = Some(database.to_string());
        Ok(())
    }

    /// Interrupt the active command from another task.
    pub fn cancel(command: &Command) {
        command.interrupt("query cancelled by the application");
    }

    /// Close the connection.
    pub async fn close(mut self) -> Result<()> {
        self.channel.close().await?;
        Ok(())
    }

    /// Keepalive timer bounding the whole exchange at query + cancel
    /// timeout; expiry terminates the connection.
    fn start_keepalive_timer(&self, command: &Command) -> Option<TimeoutTimer> {
        let query = command.query_timeout()?;
        let cancel = command.cancel_timeout()?;
        let total = query.as_secs() + cancel.as_secs();
        Some(TimeoutTimer::start(
            total.max(1),
            TimerTarget::Watchdog(Arc::clone(&self.watchdog)),
        ))
    }

    /// Map a finished command's outcome: timer-driven interrupts become
    /// query-timeout errors, watchdog expiry closes the connection.
    async fn settle_command<T>(&mut self, command: &Command, result: Result<T>) -> Result<T> {
        if self.watchdog.is_terminated() {
            return Err(Error::ConnectionClosed);
        }

        if command.is_interrupted() {
            // Bound the attention-ack drain by the cancel timeout.
            if !command.attention_acked() && command.response_complete() {
                // Ack was inside the already-drained response; nothing to
                // wait for.
            } else if !command.attention_acked() {
                self.drain_attention(command).await?;
            }
            command.complete();
            if command.timed_out() {
                return Err(Error::QueryTimedOut);
            }
        }

        result
    }

    /// Drain the response until the attention acknowledgment, bounded by
    /// the cancel-query timeout.
    async fn drain_attention(&mut self, command: &Command) -> Result<()> {
        let bound = command
            .cancel_timeout()
            .unwrap_or(Duration::from_secs(u64::from(self.config.login_timeout_s)));

        let Self { channel, env, .. } = self;
        let drain = async {
            let mut ctx = ParseContext::new(env, Some(command));
            let mut handler = AttentionDrainHandler;
            let mut reader = TdsReader::with_sink(channel, command);
            parse_tokens(&mut reader, &mut ctx, &mut handler).await
        };

        match tokio::time::timeout(bound, drain).await {
            Ok(Ok(())) if command.attention_acked() => Ok(()),
            Ok(Ok(())) => Ok(()), // response ended without an explicit ack
            Ok(Err(e)) => Err(e),
            Err(_) => {
                self.watchdog.terminate(DriverErrorCode::ConnectionClosed);
                Err(Error::ConnectionClosed)
            }
        }
    }

    async fn run_scalar(&mut self, sql: &str, command: &Command) -> Result<Option<ColumnValue>> {
        self.send_batch(sql).await?;

        let column_encryption = self.server_supports_column_encryption
            && self.config.column_encryption_setting.is_enabled();

        let Self { channel, env, .. } = self;
        let mut handler = ScalarQueryHandler {
            column_encryption,
            meta: None,
            value: None,
        };
        let mut ctx = ParseContext::new(env, Some(command));
        {
            let mut reader = TdsReader::with_sink(channel, command);
            parse_tokens(&mut reader, &mut ctx, &mut handler).await?;
        }
        drop(ctx);

        self.after_response();
        Ok(handler.value)
    }

    async fn run_execute(&mut self, sql: &str, command: &Command) -> Result<u64> {
        self.send_batch(sql).await?;

        let Self { channel, env, .. } = self;
        let mut handler = ExecuteHandler::default();
        let mut ctx = ParseContext::new(env, Some(command));
        {
            let mut reader = TdsReader::with_sink(channel, command);
            parse_tokens(&mut reader, &mut ctx, &mut handler).await?;
        }
        drop(ctx);

        self.after_response();
        Ok(handler.row_count.unwrap_or(0))
    }

    async fn send_batch(&mut self, sql: &str) -> Result<()> {
        let payload = encode_sql_batch_in_transaction(sql, self.env.transaction_descriptor);
        let mut writer = TdsWriter::new(&mut self.channel);
        writer.start_message(PacketType::SqlBatch);
        writer.write_bytes(&payload).await?;
        writer.end_message().await?;
        Ok(())
    }

    fn after_response(&mut self) {
        if let Some(size) = self.env.packet_size.take() {
            self.channel.set_packet_size(size);
        }
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("server", &self.config.server_name)
            .field("database", &self.env.database)
            .field("tds_version", &self.tds_version)
            .field("terminated", &self.watchdog.is_terminated())
            .finish_non_exhaustive()
    }
}

/// Handler for the login response.
struct LoginTokenHandler;

#[async_trait]
impl TokenStreamHandler for LoginTokenHandler {
    fn name(&self) -> &'static str {
        "login"
    }

    async fn on_login_ack(
        &mut self,
        reader: &mut TdsReader<'_>,
        ctx: &mut ParseContext<'_>,
    ) -> Result<bool> {
        ctx.login_ack = Some(read_login_ack(reader).await?);
        Ok(true)
    }

    async fn on_done(
        &mut self,
        reader: &mut TdsReader<'_>,
        ctx: &mut ParseContext<'_>,
    ) -> Result<bool> {
        let done = read_done(reader).await?;
        if done.status.error && ctx.database_error.is_none() && ctx.login_ack.is_none() {
            return Err(Error::Login("server rejected the login".into()));
        }
        ctx.last_done = Some(done);
        Ok(true)
    }
}

/// Handler draining a cancelled response to its attention ack.
struct AttentionDrainHandler;

#[async_trait]
impl TokenStreamHandler for AttentionDrainHandler {
    fn name(&self) -> &'static str {
        "attention-drain"
    }

    async fn on_col_metadata(
        &mut self,
        reader: &mut TdsReader<'_>,
        _ctx: &mut ParseContext<'_>,
    ) -> Result<bool> {
        // Discard truncated metadata while draining.
        read_col_metadata(reader, false).await.map(|_| true)
    }

    async fn on_done(
        &mut self,
        reader: &mut TdsReader<'_>,
        ctx: &mut ParseContext<'_>,
    ) -> Result<bool> {
        let done = read_done(reader).await?;
        if done.status.attention {
            ctx.attention_ack_seen = true;
            if let Some(command) = ctx.command {
                command.note_attention_acked();
            }
            return Ok(false);
        }
        Ok(true)
    }

    fn on_eof(&mut self, _ctx: &mut ParseContext<'_>) -> Result<()> {
        // Errors in a cancelled response are expected; swallow them.
        Ok(())
    }
}

/// Handler for a single-value query response.
struct ScalarQueryHandler {
    column_encryption: bool,
    meta: Option<ResultSetMeta>,
    value: Option<ColumnValue>,
}

#[async_trait]
impl TokenStreamHandler for ScalarQueryHandler {
    fn name(&self) -> &'static str {
        "scalar-query"
    }

    async fn on_col_metadata(
        &mut self,
        reader: &mut TdsReader<'_>,
        _ctx: &mut ParseContext<'_>,
    ) -> Result<bool> {
        self.meta = Some(read_col_metadata(reader, self.column_encryption).await?);
        Ok(true)
    }

    async fn on_row(
        &mut self,
        reader: &mut TdsReader<'_>,
        _ctx: &mut ParseContext<'_>,
    ) -> Result<bool> {
        reader.read_u8().await?; // token type
        let meta = self
            .meta
            .as_ref()
            .ok_or(Error::Codec(tds_codec::CodecError::InvalidTds(
                "ROW before COLMETADATA",
            )))?
            .clone();

        for (index, column) in meta.columns.iter().enumerate() {
            let value = read_column_value(reader, column).await?;
            if index == 0 && self.value.is_none() {
                self.value = Some(value);
            }
        }
        Ok(true)
    }
}
