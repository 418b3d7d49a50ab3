//! The token-stream parser.
//!
//! A response payload is a sequence of self-describing tokens. The parser
//! peeks one byte, dispatches to the handler, and loops until a handler
//! returns `false` or the message ends. Handlers consume their own token
//! byte and body through the reader.
//!
//! The default handler implements the "first error wins; drain the
//! message" policy: an ERROR token is recorded and parsing continues so
//! the trailing DONE tokens are still processed; the remembered error is
//! raised at end of message. This reports the server's primary error
//! text instead of whatever protocol anomaly follows it.

use async_trait::async_trait;
use bytes::Bytes;

use tds_codec::TdsReader;
use tds_wire::token::{
    Done, EnvChange, FeatureAck, FedAuthInfo, LoginAck, ServerError, ServerInfo, TokenType,
};

use crate::command::Command;
use crate::connection::SessionEnvironment;
use crate::error::{Error, Result};

/// Shared state of one parse pass.
///
/// Connection-level concerns (environment changes, feature
/// acknowledgments, deferred errors) accumulate here so handlers stay
/// small.
pub struct ParseContext<'a> {
    /// Session environment the env-change tokens mutate.
    pub env: &'a mut SessionEnvironment,
    /// The command reading this response, when there is one.
    pub command: Option<&'a Command>,
    /// Whether column encryption was requested at login.
    pub column_encryption_requested: bool,
    /// First server error seen; raised at end of message.
    pub database_error: Option<ServerError>,
    /// Last DONE-family token seen.
    pub last_done: Option<Done>,
    /// Whether a DONE with the attention bit arrived.
    pub attention_ack_seen: bool,
    /// Feature acknowledgments collected from FEATUREEXTACK.
    pub feature_acks: Vec<FeatureAck>,
    /// Federated-auth pointers from FEDAUTHINFO.
    pub fed_auth_info: Option<FedAuthInfo>,
    /// Login acknowledgment, for login responses.
    pub login_ack: Option<LoginAck>,
}

impl<'a> ParseContext<'a> {
    /// Create a context over the session environment.
    pub fn new(env: &'a mut SessionEnvironment, command: Option<&'a Command>) -> Self {
        Self {
            env,
            command,
            column_encryption_requested: false,
            database_error: None,
            last_done: None,
            attention_ack_seen: false,
            feature_acks: Vec::new(),
            fed_auth_info: None,
            login_ack: None,
        }
    }

    /// Flag that Always Encrypted was requested at login.
    #[must_use]
    pub fn with_column_encryption(mut self, requested: bool) -> Self {
        self.column_encryption_requested = requested;
        self
    }
}

/// Handler for the token stream of one response.
///
/// Every method receives the reader positioned *at* the token byte and
/// must consume the full token. Returning `Ok(false)` stops the parse
/// loop. The defaults implement the drain-the-message policy; override
/// what the response at hand actually needs.
#[async_trait]
pub trait TokenStreamHandler: Send {
    /// Name for diagnostics.
    fn name(&self) -> &'static str {
        "response"
    }

    /// ERROR: remember the first error, keep parsing.
    async fn on_error(
        &mut self,
        reader: &mut TdsReader<'_>,
        ctx: &mut ParseContext<'_>,
    ) -> Result<bool> {
        let error = read_server_error(reader).await?;
        tracing::debug!(number = error.number, message = %error.message, "server error token");
        if ctx.database_error.is_none() {
            ctx.database_error = Some(error);
        }
        Ok(true)
    }

    /// INFO: log and ignore.
    async fn on_info(
        &mut self,
        reader: &mut TdsReader<'_>,
        _ctx: &mut ParseContext<'_>,
    ) -> Result<bool> {
        let info = read_server_info(reader).await?;
        tracing::debug!(number = info.number, message = %info.message, "server info token");
        Ok(true)
    }

    /// ENVCHANGE: apply to the session environment; a routing change
    /// stops the parse.
    async fn on_env_change(
        &mut self,
        reader: &mut TdsReader<'_>,
        ctx: &mut ParseContext<'_>,
    ) -> Result<bool> {
        let change = read_env_change(reader).await?;
        let is_routing = ctx.env.apply(&change);
        Ok(!is_routing)
    }

    /// LOGINACK: unexpected outside a login response.
    async fn on_login_ack(
        &mut self,
        reader: &mut TdsReader<'_>,
        _ctx: &mut ParseContext<'_>,
    ) -> Result<bool> {
        Err(unexpected_token(reader).await)
    }

    /// DONE / DONEPROC / DONEINPROC: record and continue.
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
        }
        ctx.last_done = Some(done);
        Ok(true)
    }

    /// COLMETADATA: not expected by the default handler (SHOWPLAN-style
    /// streams); stop parsing.
    async fn on_col_metadata(
        &mut self,
        _reader: &mut TdsReader<'_>,
        _ctx: &mut ParseContext<'_>,
    ) -> Result<bool> {
        tracing::warn!("unexpected COLMETADATA in this response; stopping parse");
        Ok(false)
    }

    /// ROW: unexpected by default.
    async fn on_row(
        &mut self,
        reader: &mut TdsReader<'_>,
        _ctx: &mut ParseContext<'_>,
    ) -> Result<bool> {
        Err(unexpected_token(reader).await)
    }

    /// NBCROW: unexpected by default.
    async fn on_nbc_row(
        &mut self,
        reader: &mut TdsReader<'_>,
        _ctx: &mut ParseContext<'_>,
    ) -> Result<bool> {
        Err(unexpected_token(reader).await)
    }

    /// RETURNSTATUS: read and ignore.
    async fn on_return_status(
        &mut self,
        reader: &mut TdsReader<'_>,
        _ctx: &mut ParseContext<'_>,
    ) -> Result<bool> {
        reader.read_u8().await?;
        let _status = reader.read_i32().await?;
        Ok(true)
    }

    /// RETURNVALUE: unexpected by default.
    async fn on_return_value(
        &mut self,
        reader: &mut TdsReader<'_>,
        _ctx: &mut ParseContext<'_>,
    ) -> Result<bool> {
        Err(unexpected_token(reader).await)
    }

    /// ORDER / COLINFO / TABNAME: skip the length-prefixed body.
    async fn on_ignored(
        &mut self,
        reader: &mut TdsReader<'_>,
        _ctx: &mut ParseContext<'_>,
    ) -> Result<bool> {
        skip_length_prefixed(reader).await?;
        Ok(true)
    }

    /// SSPI: unexpected by default.
    async fn on_sspi(
        &mut self,
        reader: &mut TdsReader<'_>,
        _ctx: &mut ParseContext<'_>,
    ) -> Result<bool> {
        Err(unexpected_token(reader).await)
    }

    /// End of message: raise the remembered error, if any.
    fn on_eof(&mut self, ctx: &mut ParseContext<'_>) -> Result<()> {
        if let Some(error) = ctx.database_error.take() {
            return Err(Error::from_server_error(&error));
        }
        Ok(())
    }
}

/// Default handler: nothing but the trait's defaults.
#[derive(Default)]
pub struct DefaultTokenHandler;

impl TokenStreamHandler for DefaultTokenHandler {}

/// Drive the parser over one response message.
pub async fn parse_tokens(
    reader: &mut TdsReader<'_>,
    ctx: &mut ParseContext<'_>,
    handler: &mut dyn TokenStreamHandler,
) -> Result<()> {
    let mut parsing = true;
    let mut login_ack_seen = false;
    let mut feature_ext_ack_seen = false;

    while parsing {
        let Some(token_byte) = reader.peek_token_type().await? else {
            handler.on_eof(ctx)?;
            break;
        };
        let token = TokenType::from_u8(token_byte).ok_or(Error::InvalidTdsToken(token_byte))?;
        tracing::trace!(token = token.name(), handler = handler.name(), "processing token");

        parsing = match token {
            TokenType::Sspi => handler.on_sspi(reader, ctx).await?,
            TokenType::LoginAck => {
                login_ack_seen = true;
                handler.on_login_ack(reader, ctx).await?
            }
            TokenType::FeatureExtAck => {
                feature_ext_ack_seen = true;
                read_feature_ext_ack(reader, ctx).await?;
                true
            }
            TokenType::EnvChange => handler.on_env_change(reader, ctx).await?,
            TokenType::ReturnStatus => handler.on_return_status(reader, ctx).await?,
            TokenType::ReturnValue => handler.on_return_value(reader, ctx).await?,
            TokenType::Done | TokenType::DoneProc | TokenType::DoneInProc => {
                if let Some(command) = ctx.command {
                    command.check_interrupt();
                }
                handler.on_done(reader, ctx).await?
            }
            TokenType::Error => handler.on_error(reader, ctx).await?,
            TokenType::Info => handler.on_info(reader, ctx).await?,
            TokenType::Order | TokenType::ColInfo | TokenType::TabName => {
                handler.on_ignored(reader, ctx).await?
            }
            TokenType::ColMetaData => handler.on_col_metadata(reader, ctx).await?,
            TokenType::Row => handler.on_row(reader, ctx).await?,
            TokenType::NbcRow => handler.on_nbc_row(reader, ctx).await?,
            TokenType::FedAuthInfo => {
                read_fed_auth_info(reader, ctx).await?;
                true
            }
            TokenType::SessionState => {
                skip_session_state(reader).await?;
                true
            }
        };
    }

    // A login that requested column encryption must see the feature
    // acknowledged, unless the server routed us elsewhere.
    if login_ack_seen
        && !feature_ext_ack_seen
        && ctx.column_encryption_requested
        && ctx.env.routing.is_none()
    {
        return Err(Error::ColumnEncryptionNotSupportedByServer);
    }

    Ok(())
}

/// Read the length-prefixed body of the token at the cursor.
async fn read_length_prefixed_body(reader: &mut TdsReader<'_>) -> Result<Bytes> {
    reader.read_u8().await?; // token type
    let len = reader.read_u16().await? as usize;
    Ok(Bytes::from(reader.read_bytes(len).await?))
}

/// Skip a length-prefixed token without materializing it.
pub async fn skip_length_prefixed(reader: &mut TdsReader<'_>) -> Result<()> {
    reader.read_u8().await?;
    let len = reader.read_u16().await? as usize;
    reader.skip(len).await?;
    Ok(())
}

async fn skip_session_state(reader: &mut TdsReader<'_>) -> Result<()> {
    reader.read_u8().await?;
    let len = reader.read_u32().await? as usize;
    reader.skip(len).await?;
    Ok(())
}

/// Read an ERROR token at the cursor.
pub async fn read_server_error(reader: &mut TdsReader<'_>) -> Result<ServerError> {
    let body = read_length_prefixed_body(reader).await?;
    Ok(ServerError::decode_body(&mut body.as_ref())?)
}

/// Read an INFO token at the cursor.
pub async fn read_server_info(reader: &mut TdsReader<'_>) -> Result<ServerInfo> {
    let body = read_length_prefixed_body(reader).await?;
    Ok(ServerInfo::decode_body(&mut body.as_ref())?)
}

/// Read an ENVCHANGE token at the cursor.
pub async fn read_env_change(reader: &mut TdsReader<'_>) -> Result<EnvChange> {
    let body = read_length_prefixed_body(reader).await?;
    Ok(EnvChange::decode_body(&mut body.as_ref())?)
}

/// Read a LOGINACK token at the cursor.
pub async fn read_login_ack(reader: &mut TdsReader<'_>) -> Result<LoginAck> {
    let body = read_length_prefixed_body(reader).await?;
    Ok(LoginAck::decode_body(&mut body.as_ref())?)
}

/// Read a DONE-family token at the cursor.
pub async fn read_done(reader: &mut TdsReader<'_>) -> Result<Done> {
    reader.read_u8().await?;
    let body = reader.read_bytes(Done::SIZE).await?;
    Ok(Done::decode(&mut body.as_slice())?)
}

async fn read_feature_ext_ack(
    reader: &mut TdsReader<'_>,
    ctx: &mut ParseContext<'_>,
) -> Result<()> {
    reader.read_u8().await?; // token type
    loop {
        let feature_id = reader.read_u8().await?;
        if feature_id == 0xFF {
            break;
        }
        let len = reader.read_u32().await? as usize;
        let data = reader.read_bytes(len).await?;
        tracing::debug!(feature_id, len, "feature extension acknowledged");
        ctx.feature_acks.push(FeatureAck {
            feature_id,
            data: Bytes::from(data),
        });
    }
    Ok(())
}

async fn read_fed_auth_info(
    reader: &mut TdsReader<'_>,
    ctx: &mut ParseContext<'_>,
) -> Result<()> {
    reader.read_u8().await?; // token type
    let len = reader.read_u32().await? as usize;
    let body = reader.read_bytes(len).await?;
    let info = FedAuthInfo::decode_body(&body)?;
    tracing::debug!(sts_url = %info.sts_url, spn = %info.spn, "federated auth info received");
    ctx.fed_auth_info = Some(info);
    Ok(())
}

async fn unexpected_token(reader: &mut TdsReader<'_>) -> Error {
    match reader.peek_token_type().await {
        Ok(Some(byte)) => Error::InvalidTdsToken(byte),
        _ => Error::InvalidTdsToken(0),
    }
}

/// Handler for a plain execute response: accepts metadata-free responses
/// made of DONE, ERROR, INFO and ENVCHANGE tokens.
#[derive(Default)]
pub struct ExecuteHandler {
    /// Row count from the last DONE carrying one.
    pub row_count: Option<u64>,
}

#[async_trait]
impl TokenStreamHandler for ExecuteHandler {
    fn name(&self) -> &'static str {
        "execute"
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
        }
        if done.status.count {
            self.row_count = Some(done.row_count);
        }
        ctx.last_done = Some(done);
        Ok(true)
    }
}
