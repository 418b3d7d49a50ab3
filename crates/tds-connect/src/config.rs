//! Connection configuration.
//!
//! [`Config`] carries the full connection keyword surface. Keywords are
//! case-insensitive; range violations fail at parse time, before any
//! socket is opened.

use std::time::Duration;

use tds_channel::config::{SslProtocol, TlsOptions, TrustPolicy};
use tds_channel::finder::ConnectOptions;
use tds_crypto::enclave::{EnclaveConfig, EnclaveProtocol};

use crate::error::Error;

/// Authentication selection, from the `authentication` keyword.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AuthenticationMethod {
    /// Not specified; SQL authentication when credentials are present.
    #[default]
    NotSpecified,
    /// SQL Server authentication.
    SqlPassword,
    /// Azure Active Directory user/password token flow.
    ActiveDirectoryPassword,
    /// Azure Active Directory integrated (Kerberos) token flow.
    ActiveDirectoryIntegrated,
}

impl AuthenticationMethod {
    fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "notspecified" => Some(Self::NotSpecified),
            "sqlpassword" => Some(Self::SqlPassword),
            "activedirectorypassword" => Some(Self::ActiveDirectoryPassword),
            "activedirectoryintegrated" => Some(Self::ActiveDirectoryIntegrated),
            _ => None,
        }
    }

    /// Whether this method uses federated (token) authentication.
    #[must_use]
    pub fn is_federated(self) -> bool {
        matches!(
            self,
            Self::ActiveDirectoryPassword | Self::ActiveDirectoryIntegrated
        )
    }
}

/// Integrated-security scheme, from `authenticationScheme`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AuthenticationScheme {
    /// Platform-native authentication.
    #[default]
    NativeAuthentication,
    /// NTLM.
    Ntlm,
    /// Kerberos.
    Kerberos,
}

impl AuthenticationScheme {
    fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "nativeauthentication" => Some(Self::NativeAuthentication),
            "ntlm" => Some(Self::Ntlm),
            "javakerberos" | "kerberos" => Some(Self::Kerberos),
            _ => None,
        }
    }
}

/// Column-encryption setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ColumnEncryptionSetting {
    /// Always Encrypted is off.
    #[default]
    Disabled,
    /// Always Encrypted is negotiated at login.
    Enabled,
}

impl ColumnEncryptionSetting {
    fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "disabled" => Some(Self::Disabled),
            "enabled" => Some(Self::Enabled),
            _ => None,
        }
    }

    /// Whether column encryption is on.
    #[must_use]
    pub fn is_enabled(self) -> bool {
        matches!(self, Self::Enabled)
    }
}

/// Connection configuration.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct Config {
    /// Server host name.
    pub server_name: String,
    /// Server port (default 1433).
    pub port: u16,
    /// Named instance.
    pub instance_name: Option<String>,
    /// Initial database.
    pub database: Option<String>,
    /// SQL login user.
    pub user: Option<String>,
    /// SQL login password.
    pub password: Option<String>,
    /// Domain for NTLM authentication.
    pub domain: Option<String>,
    /// Integrated security.
    pub integrated_security: bool,
    /// Authentication method.
    pub authentication: AuthenticationMethod,
    /// Integrated-security scheme.
    pub authentication_scheme: AuthenticationScheme,
    /// Whether to request session encryption.
    pub encrypt: bool,
    /// Skip server certificate validation.
    pub trust_server_certificate: bool,
    /// Validate the certificate against this name instead of the host.
    pub host_name_in_certificate: Option<String>,
    /// TLS protocol selection.
    pub ssl_protocol: SslProtocol,
    /// Trust store path.
    pub trust_store: Option<String>,
    /// Trust store password.
    pub trust_store_password: Option<Vec<u8>>,
    /// Trust store type.
    pub trust_store_type: Option<String>,
    /// Always Encrypted setting.
    pub column_encryption_setting: ColumnEncryptionSetting,
    /// Enclave attestation URL.
    pub enclave_attestation_url: Option<String>,
    /// Enclave attestation protocol.
    pub enclave_attestation_protocol: Option<EnclaveProtocol>,
    /// Prepared-statement cache size.
    pub statement_pooling_cache_size: u32,
    /// Disable statement pooling.
    pub disable_statement_pooling: bool,
    /// Bound on waiting for the attention acknowledgment, seconds.
    pub cancel_query_timeout_s: Option<u32>,
    /// Query timeout, seconds.
    pub query_timeout_s: Option<u32>,
    /// Login timeout, seconds (default 15).
    pub login_timeout_s: u32,
    /// Reconnect attempts after a broken connection (0 disables).
    pub connect_retry_count: u8,
    /// Seconds between reconnect attempts.
    pub connect_retry_interval_s: u32,
    /// Race all resolved addresses in parallel.
    pub multi_subnet_failover: bool,
    /// Transparent network IP resolution.
    pub transparent_network_ip_resolution: bool,
    /// Rewrite batch inserts through bulk copy.
    pub use_bulk_copy_for_batch_insert: bool,
    /// FIPS-compliant operation.
    pub fips: bool,
    /// Caller-supplied trust manager identifier.
    pub trust_manager_class: Option<String>,
    /// Constructor argument for the trust manager.
    pub trust_manager_constructor_arg: Option<String>,
    /// Application name reported at login.
    pub application_name: String,
    /// Requested packet size.
    pub packet_size: u32,
    /// Skip TLS entirely and send everything in plaintext.
    ///
    /// Test-only escape hatch; never settable from a connection string.
    pub danger_plaintext: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_name: "localhost".into(),
            port: 1433,
            instance_name: None,
            database: None,
            user: None,
            password: None,
            domain: None,
            integrated_security: false,
            authentication: AuthenticationMethod::NotSpecified,
            authentication_scheme: AuthenticationScheme::NativeAuthentication,
            encrypt: false,
            trust_server_certificate: false,
            host_name_in_certificate: None,
            ssl_protocol: SslProtocol::Tls,
            trust_store: None,
            trust_store_password: None,
            trust_store_type: None,
            column_encryption_setting: ColumnEncryptionSetting::Disabled,
            enclave_attestation_url: None,
            enclave_attestation_protocol: None,
            statement_pooling_cache_size: 0,
            disable_statement_pooling: false,
            cancel_query_timeout_s: None,
            query_timeout_s: None,
            login_timeout_s: 15,
            connect_retry_count: 1,
            connect_retry_interval_s: 10,
            multi_subnet_failover: false,
            transparent_network_ip_resolution: true,
            use_bulk_copy_for_batch_insert: false,
            fips: false,
            trust_manager_class: None,
            trust_manager_constructor_arg: None,
            application_name: "tds-driver".into(),
            packet_size: tds_wire::packet::DEFAULT_PACKET_SIZE as u32,
            danger_plaintext: false,
        }
    }
}

impl Config {
    /// Configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a `key=value;`-style connection string.
    ///
    /// Keywords are case-insensitive. Unknown keywords are ignored with a
    /// debug log; out-of-range values fail eagerly.
    pub fn from_connection_string(value: &str) -> Result<Self, Error> {
        let mut config = Self::default();

        for part in value.split(';') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            let (key, value) = part
                .split_once('=')
                .ok_or_else(|| Error::Config(format!("invalid key-value pair: {part}")))?;
            let key = key.trim().to_ascii_lowercase();
            let value = value.trim();

            match key.as_str() {
                "servername" | "server" => config.server_name = value.to_string(),
                "portnumber" | "port" => {
                    config.port = value
                        .parse()
                        .map_err(|_| Error::Config(format!("invalid port: {value}")))?;
                }
                "instancename" => config.instance_name = Some(value.to_string()),
                "databasename" | "database" => config.database = Some(value.to_string()),
                "user" => config.user = Some(value.to_string()),
                "password" => config.password = Some(value.to_string()),
                "domain" => config.domain = Some(value.to_string()),
                "integratedsecurity" => {
                    config.integrated_security = parse_bool(&key, value)?;
                }
                "authentication" => {
                    config.authentication = AuthenticationMethod::parse(value).ok_or_else(|| {
                        Error::Config(format!("invalid authentication method: {value}"))
                    })?;
                }
                "authenticationscheme" => {
                    config.authentication_scheme = AuthenticationScheme::parse(value)
                        .ok_or_else(|| {
                            Error::Config(format!("invalid authentication scheme: {value}"))
                        })?;
                }
                "encrypt" => config.encrypt = parse_bool(&key, value)?,
                "trustservercertificate" => {
                    config.trust_server_certificate = parse_bool(&key, value)?;
                }
                "hostnameincertificate" => {
                    config.host_name_in_certificate = Some(value.to_string());
                }
                "sslprotocol" => {
                    config.ssl_protocol = SslProtocol::parse(value)
                        .ok_or_else(|| Error::Config(format!("invalid sslProtocol: {value}")))?;
                }
                "truststore" => config.trust_store = Some(value.to_string()),
                "truststorepassword" => {
                    config.trust_store_password = Some(value.as_bytes().to_vec());
                }
                "truststoretype" => config.trust_store_type = Some(value.to_string()),
                "columnencryptionsetting" => {
                    config.column_encryption_setting = ColumnEncryptionSetting::parse(value)
                        .ok_or_else(|| {
                            Error::Config(format!("invalid columnEncryptionSetting: {value}"))
                        })?;
                }
                "enclaveattestationurl" => {
                    config.enclave_attestation_url = Some(value.to_string());
                }
                "enclaveattestationprotocol" => {
                    config.enclave_attestation_protocol =
                        Some(EnclaveProtocol::parse(value).ok_or_else(|| {
                            Error::Config(format!("invalid enclaveAttestationProtocol: {value}"))
                        })?);
                }
                "statementpoolingcachesize" => {
                    config.statement_pooling_cache_size = value.parse().map_err(|_| {
                        Error::Config(format!("invalid statementPoolingCacheSize: {value}"))
                    })?;
                }
                "disablestatementpooling" => {
                    config.disable_statement_pooling = parse_bool(&key, value)?;
                }
                "cancelquerytimeout" => {
                    config.cancel_query_timeout_s = Some(value.parse().map_err(|_| {
                        Error::Config(format!("invalid cancelQueryTimeout: {value}"))
                    })?);
                }
                "querytimeout" => {
                    config.query_timeout_s = Some(
                        value
                            .parse()
                            .map_err(|_| Error::Config(format!("invalid queryTimeout: {value}")))?,
                    );
                }
                "logintimeout" => {
                    config.login_timeout_s = value
                        .parse()
                        .map_err(|_| Error::Config(format!("invalid loginTimeout: {value}")))?;
                }
                "connectretrycount" => {
                    config.connect_retry_count = value.parse().map_err(|_| {
                        Error::Config(format!(
                            "connectRetryCount must be between 0 and 255, got {value}"
                        ))
                    })?;
                }
                "connectretryinterval" => {
                    config.connect_retry_interval_s = value.parse().map_err(|_| {
                        Error::Config(format!("invalid connectRetryInterval: {value}"))
                    })?;
                }
                "multisubnetfailover" => {
                    config.multi_subnet_failover = parse_bool(&key, value)?;
                }
                "transparentnetworkipresolution" => {
                    config.transparent_network_ip_resolution = parse_bool(&key, value)?;
                }
                "usebulkcopyforbatchinsert" => {
                    config.use_bulk_copy_for_batch_insert = parse_bool(&key, value)?;
                }
                "fips" => config.fips = parse_bool(&key, value)?,
                "trustmanagerclass" => config.trust_manager_class = Some(value.to_string()),
                "trustmanagerconstructorarg" => {
                    config.trust_manager_constructor_arg = Some(value.to_string());
                }
                "applicationname" => config.application_name = value.to_string(),
                "packetsize" => {
                    config.packet_size = value
                        .parse()
                        .map_err(|_| Error::Config(format!("invalid packetSize: {value}")))?;
                }
                _ => {
                    tracing::debug!(key = %key, "ignoring unknown connection keyword");
                }
            }
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate field ranges and cross-field constraints.
    pub fn validate(&self) -> Result<(), Error> {
        if !(1..=60).contains(&self.connect_retry_interval_s) {
            return Err(Error::Config(format!(
                "connectRetryInterval must be between 1 and 60, got {}",
                self.connect_retry_interval_s
            )));
        }
        if self.login_timeout_s == 0 {
            return Err(Error::Config("loginTimeout must be positive".into()));
        }
        {
            let size = self.packet_size as usize;
            if !(tds_wire::packet::MIN_PACKET_SIZE..=tds_wire::packet::MAX_PACKET_SIZE)
                .contains(&size)
            {
                return Err(Error::Config(format!(
                    "packetSize must be between {} and {}, got {size}",
                    tds_wire::packet::MIN_PACKET_SIZE,
                    tds_wire::packet::MAX_PACKET_SIZE
                )));
            }
        }

        if self.fips {
            tds_channel::fips::validate_fips(
                self.encrypt,
                self.trust_server_certificate,
                &self.tls_options(),
            )?;
        }

        self.enclave_config().validate().map_err(Error::Crypto)?;
        Ok(())
    }

    /// Socket-finder options derived from this configuration.
    #[must_use]
    pub fn connect_options(&self, is_tnir_first_attempt: bool) -> ConnectOptions {
        let login_timeout = Duration::from_secs(u64::from(self.login_timeout_s));
        ConnectOptions {
            login_timeout,
            use_parallel: self.multi_subnet_failover,
            use_tnir: self.transparent_network_ip_resolution && !self.multi_subnet_failover,
            is_tnir_first_attempt,
            full_timeout: login_timeout,
        }
    }

    /// TLS options derived from this configuration.
    #[must_use]
    pub fn tls_options(&self) -> TlsOptions {
        let trust_policy = if self.trust_server_certificate {
            TrustPolicy::Permissive
        } else if let Some(name) = &self.host_name_in_certificate {
            TrustPolicy::HostNameOverride { name: name.clone() }
        } else {
            TrustPolicy::SystemRoots
        };

        TlsOptions {
            trust_policy,
            ssl_protocol: self.ssl_protocol,
            trust_store: self.trust_store.clone(),
            trust_store_password: self.trust_store_password.clone(),
            trust_store_type: self.trust_store_type.clone(),
            fips: self.fips,
        }
    }

    /// Enclave configuration derived from this configuration.
    #[must_use]
    pub fn enclave_config(&self) -> EnclaveConfig {
        EnclaveConfig {
            attestation_url: self.enclave_attestation_url.clone(),
            protocol: self
                .enclave_attestation_protocol
                .unwrap_or(EnclaveProtocol::None),
        }
    }

    /// Query timeout as a duration.
    #[must_use]
    pub fn query_timeout(&self) -> Option<Duration> {
        self.query_timeout_s
            .filter(|s| *s > 0)
            .map(|s| Duration::from_secs(u64::from(s)))
    }

    /// Cancel-query timeout as a duration.
    #[must_use]
    pub fn cancel_query_timeout(&self) -> Option<Duration> {
        self.cancel_query_timeout_s
            .filter(|s| *s > 0)
            .map(|s| Duration::from_secs(u64::from(s)))
    }

    // Builder methods for the settings tests exercise most.

    /// Set the server host name.
    #[must_use]
    pub fn server(mut self, server_name: impl Into<String>) -> Self {
        self.server_name = server_name.into();
        self
    }

    /// Set the port.
    #[must_use]
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the initial database.
    #[must_use]
    pub fn database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    /// Set SQL credentials.
    #[must_use]
    pub fn credentials(
        mut self,
        user: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.user = Some(user.into());
        self.password = Some(password.into());
        self
    }

    /// Set the login timeout in seconds.
    #[must_use]
    pub fn login_timeout_secs(mut self, seconds: u32) -> Self {
        self.login_timeout_s = seconds;
        self
    }

    /// Set the query timeout in seconds.
    #[must_use]
    pub fn query_timeout_secs(mut self, seconds: u32) -> Self {
        self.query_timeout_s = Some(seconds);
        self
    }

    /// Set the connect-retry policy.
    #[must_use]
    pub fn connect_retry(mut self, count: u8, interval_s: u32) -> Self {
        self.connect_retry_count = count;
        self.connect_retry_interval_s = interval_s;
        self
    }

    /// Enable Always Encrypted.
    #[must_use]
    pub fn column_encryption(mut self, enabled: bool) -> Self {
        self.column_encryption_setting = if enabled {
            ColumnEncryptionSetting::Enabled
        } else {
            ColumnEncryptionSetting::Disabled
        };
        self
    }

    /// Disable TLS entirely. Test-only.
    #[must_use]
    pub fn danger_plaintext(mut self, plaintext: bool) -> Self {
        self.danger_plaintext = plaintext;
        self
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool, Error> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "yes" | "1" => Ok(true),
        "false" | "no" | "0" => Ok(false),
        _ => Err(Error::Config(format!("invalid boolean for {key}: {value}"))),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = Config::default();
        assert_eq!(config.port, 1433);
        assert_eq!(config.login_timeout_s, 15);
        assert_eq!(config.connect_retry_count, 1);
        assert_eq!(config.connect_retry_interval_s, 10);
        assert!(config.transparent_network_ip_resolution);
        assert!(!config.multi_subnet_failover);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn full_keyword_surface_parses() {
        let config = Config::from_connection_string(
            "serverName=db.example.net;portNumber=1444;databaseName=app;\
             user=svc;password=pw;encrypt=true;trustServerCertificate=false;\
             hostNameInCertificate=db.example.net;sslProtocol=TLSv1.2;\
             columnEncryptionSetting=Enabled;queryTimeout=30;cancelQueryTimeout=5;\
             loginTimeout=20;connectRetryCount=3;connectRetryInterval=15;\
             multiSubnetFailover=true;transparentNetworkIPResolution=false;\
             statementPoolingCacheSize=100;disableStatementPooling=false;\
             useBulkCopyForBatchInsert=true;applicationName=app-svc",
        )
        .unwrap();

        assert_eq!(config.server_name, "db.example.net");
        assert_eq!(config.port, 1444);
        assert_eq!(config.database.as_deref(), Some("app"));
        assert!(config.encrypt);
        assert_eq!(config.ssl_protocol, SslProtocol::Tls12);
        assert!(config.column_encryption_setting.is_enabled());
        assert_eq!(config.query_timeout_s, Some(30));
        assert_eq!(config.connect_retry_count, 3);
        assert_eq!(config.connect_retry_interval_s, 15);
        assert!(config.multi_subnet_failover);
        assert!(!config.transparent_network_ip_resolution);
        assert!(config.use_bulk_copy_for_batch_insert);
    }

    #[test]
    fn keywords_are_case_insensitive() {
        let config =
            Config::from_connection_string("SERVERNAME=x;PortNumber=99;ENCRYPT=yes").unwrap();
        assert_eq!(config.server_name, "x");
        assert_eq!(config.port, 99);
        assert!(config.encrypt);
    }

    #[test]
    fn retry_count_range_enforced() {
        assert!(Config::from_connection_string("connectRetryCount=255").is_ok());
        assert!(Config::from_connection_string("connectRetryCount=256").is_err());
        assert!(Config::from_connection_string("connectRetryCount=-1").is_err());
    }

    #[test]
    fn retry_interval_range_enforced() {
        assert!(Config::from_connection_string("connectRetryInterval=1").is_ok());
        assert!(Config::from_connection_string("connectRetryInterval=60").is_ok());
        assert!(Config::from_connection_string("connectRetryInterval=0").is_err());
        assert!(Config::from_connection_string("connectRetryInterval=61").is_err());
    }

    #[test]
    fn fips_conflicts_fail_eagerly() {
        // FIPS without encryption.
        assert!(Config::from_connection_string("fips=true;encrypt=false").is_err());
        // FIPS with trustServerCertificate.
        assert!(
            Config::from_connection_string("fips=true;encrypt=true;trustServerCertificate=true")
                .is_err()
        );
        // FIPS with a trust store but no type.
        assert!(Config::from_connection_string(
            "fips=true;encrypt=true;trustStore=/etc/store"
        )
        .is_err());
        // Consistent FIPS settings pass.
        assert!(Config::from_connection_string(
            "fips=true;encrypt=true;trustStore=/etc/store;trustStoreType=PKCS12"
        )
        .is_ok());
    }

    #[test]
    fn packet_size_bounds() {
        assert!(Config::from_connection_string("packetSize=512").is_ok());
        assert!(Config::from_connection_string("packetSize=32767").is_ok());
        assert!(Config::from_connection_string("packetSize=256").is_err());
        assert!(Config::from_connection_string("packetSize=65536").is_err());
    }

    #[test]
    fn unknown_keywords_ignored() {
        assert!(Config::from_connection_string("serverName=x;futureOption=1").is_ok());
    }

    #[test]
    fn tnir_disabled_under_msf() {
        let config =
            Config::from_connection_string("multiSubnetFailover=true").unwrap();
        let opts = config.connect_options(false);
        assert!(opts.use_parallel);
        assert!(!opts.use_tnir);
    }

    #[test]
    fn trust_policy_mapping() {
        let permissive =
            Config::from_connection_string("trustServerCertificate=true").unwrap();
        assert!(matches!(
            permissive.tls_options().trust_policy,
            TrustPolicy::Permissive
        ));

        let override_name =
            Config::from_connection_string("hostNameInCertificate=foo.example.com").unwrap();
        match override_name.tls_options().trust_policy {
            TrustPolicy::HostNameOverride { name } => assert_eq!(name, "foo.example.com"),
            other => panic!("unexpected policy {other:?}"),
        }
    }

    #[test]
    fn enclave_settings_validated() {
        assert!(
            Config::from_connection_string("enclaveAttestationUrl=https://a.example.net").is_err()
        );
        assert!(Config::from_connection_string(
            "enclaveAttestationUrl=https://a.example.net;enclaveAttestationProtocol=AAS"
        )
        .is_ok());
    }
}
