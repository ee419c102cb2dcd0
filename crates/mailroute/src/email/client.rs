//! IMAP implementation of [`MailSession`].

use std::time::Duration;

use async_imap::extensions::idle::IdleResponse;
use async_imap::Session;
use async_native_tls::TlsConnector;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::TryStreamExt;
use log::{debug, info, warn};
use secrecy::{ExposeSecret, SecretString};

use crate::config::{AccountConfig, AuthType};

use super::error::{EmailError, Result};
use super::source::{FolderInfo, FolderStatus, MailConnector, MailEvent, MailSession, SeqNo};

/// Type alias for the underlying async stream (using async-std compatible TcpStream).
type AsyncTcpStream = async_io::Async<std::net::TcpStream>;

/// Type alias for the TLS stream used by the IMAP session.
type TlsStream = async_native_tls::TlsStream<AsyncTcpStream>;

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Simple authenticator for XOAUTH2.
struct XOAuth2Authenticator {
    response: String,
}

impl async_imap::Authenticator for XOAuth2Authenticator {
    type Response = String;

    fn process(&mut self, _data: &[u8]) -> Self::Response {
        std::mem::take(&mut self.response)
    }
}

/// Opens authenticated IMAP sessions over TLS.
#[derive(Debug, Clone)]
pub struct ImapConnector {
    connect_timeout: Duration,
}

impl Default for ImapConnector {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }
}

impl ImapConnector {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MailConnector for ImapConnector {
    async fn connect(&self, account: &AccountConfig) -> Result<Box<dyn MailSession>> {
        let client = tokio::time::timeout(self.connect_timeout, ImapClient::connect(account))
            .await
            .map_err(|_| {
                EmailError::Timeout(format!(
                    "connecting to {}:{} took longer than {:?}",
                    account.host, account.port, self.connect_timeout
                ))
            })??;
        Ok(Box::new(client))
    }
}

/// An authenticated IMAP session for one account.
pub struct ImapClient {
    session: Option<Session<TlsStream>>,
    account_id: String,
    current_folder: Option<String>,
    /// Folder state as of the last SELECT.
    known: Option<FolderStatus>,
}

impl ImapClient {
    /// Connects to the account's server and authenticates.
    pub async fn connect(account: &AccountConfig) -> Result<Self> {
        if !account.use_tls {
            return Err(EmailError::ConfigError(
                "TLS is required for secure email connections".to_string(),
            ));
        }

        let addr = format!("{}:{}", account.host, account.port);
        info!("Connecting to IMAP server at {} for account '{}'", addr, account.id);

        let socket_addr = tokio::net::lookup_host(&addr)
            .await
            .map_err(|e| EmailError::ConnectionFailed(e.to_string()))?
            .next()
            .ok_or_else(|| {
                EmailError::ConnectionFailed(format!("no address found for {}", addr))
            })?;
        let tcp_stream = AsyncTcpStream::connect(socket_addr)
            .await
            .map_err(|e| EmailError::ConnectionFailed(e.to_string()))?;

        let tls = TlsConnector::new().danger_accept_invalid_certs(account.accept_invalid_certs);
        if account.accept_invalid_certs {
            warn!(
                "Account '{}' accepts invalid TLS certificates",
                account.id
            );
        }
        let tls_stream = tls
            .connect(&account.host, tcp_stream)
            .await
            .map_err(|e| EmailError::TlsError(e.to_string()))?;

        let client = async_imap::Client::new(tls_stream);

        let session = match account.auth.auth_type {
            AuthType::Password => authenticate_password(client, account).await?,
            AuthType::OAuth2 => authenticate_oauth2(client, account).await?,
        };

        info!("Authenticated account '{}' as {}", account.id, account.username);
        Ok(Self {
            session: Some(session),
            account_id: account.id.clone(),
            current_folder: None,
            known: None,
        })
    }

    fn session(&mut self) -> Result<&mut Session<TlsStream>> {
        self.session
            .as_mut()
            .ok_or_else(|| EmailError::ConnectionClosed("Not connected".to_string()))
    }

    async fn select(&mut self, folder: &str) -> Result<FolderStatus> {
        let mailbox = self.session()?.select(folder).await.map_err(|e| {
            let text = e.to_string();
            if text.contains("doesn't exist") || text.contains("NONEXISTENT") {
                EmailError::FolderNotFound(folder.to_string())
            } else {
                EmailError::from(e)
            }
        })?;

        Ok(FolderStatus {
            exists: mailbox.exists,
            uid_validity: mailbox.uid_validity,
            uid_next: mailbox.uid_next,
        })
    }

    /// Re-selects the current folder and reports arrivals since last seen.
    async fn refresh_arrivals(&mut self) -> Result<i64> {
        let folder = self
            .current_folder
            .clone()
            .ok_or_else(|| EmailError::ProtocolError("No folder selected".to_string()))?;
        let status = self.select(&folder).await?;
        let arrivals = match &self.known {
            Some(known) => status.arrivals_since(known),
            None => i64::from(status.exists),
        };
        self.known = Some(status);
        Ok(arrivals)
    }
}

async fn authenticate_password(
    client: async_imap::Client<TlsStream>,
    account: &AccountConfig,
) -> Result<Session<TlsStream>> {
    if account.auth.password.value.is_some() {
        warn!(
            "Account '{}' uses an inline password; prefer file or envVar",
            account.id
        );
    }
    let password = resolve(&account.auth.password)?;

    client
        .login(&account.username, password.expose_secret())
        .await
        .map_err(|(e, _)| EmailError::AuthenticationFailed(e.to_string()))
}

async fn authenticate_oauth2(
    client: async_imap::Client<TlsStream>,
    account: &AccountConfig,
) -> Result<Session<TlsStream>> {
    let access_token = resolve(&account.auth.access_token)?;

    // Format: base64("user=" + user + "^Aauth=Bearer " + token + "^A^A")
    let auth_string = format!(
        "user={}\x01auth=Bearer {}\x01\x01",
        account.username,
        access_token.expose_secret()
    );
    let encoded = base64::Engine::encode(
        &base64::engine::general_purpose::STANDARD,
        auth_string.as_bytes(),
    );

    client
        .authenticate("XOAUTH2", XOAuth2Authenticator { response: encoded })
        .await
        .map_err(|(e, _)| EmailError::AuthenticationFailed(e.to_string()))
}

fn resolve(source: &crate::secrets::SecretSource) -> Result<SecretString> {
    source
        .resolve()
        .map_err(|e| EmailError::CredentialsNotFound(e.to_string()))
}

/// IMAP SEARCH date, e.g. `01-May-2024`.
fn imap_date(since: DateTime<Utc>) -> String {
    since.format("%d-%b-%Y").to_string()
}

/// Message-ID without surrounding angle brackets.
fn clean_message_id(raw: &[u8]) -> Option<String> {
    let text = String::from_utf8_lossy(raw);
    let id = text.trim().trim_start_matches('<').trim_end_matches('>').trim();
    if id.is_empty() {
        None
    } else {
        Some(id.to_string())
    }
}

/// Whether a CREATE failure means the folder is already there.
fn is_already_exists(message: &str) -> bool {
    let lower = message.to_lowercase();
    lower.contains("alreadyexists")
        || lower.contains("already exists")
        || lower.contains("conflicts with existing folder")
}

#[async_trait]
impl MailSession for ImapClient {
    async fn open_folder(&mut self, folder: &str) -> Result<FolderStatus> {
        info!("Opening folder '{}' for account '{}'", folder, self.account_id);
        let status = self.select(folder).await?;
        self.current_folder = Some(folder.to_string());
        self.known = Some(status);
        debug!(
            "Folder '{}' has {} messages, UIDVALIDITY={:?}",
            folder, status.exists, status.uid_validity
        );
        Ok(status)
    }

    async fn search_since(&mut self, since: DateTime<Utc>) -> Result<Vec<SeqNo>> {
        let query = format!("SINCE {}", imap_date(since));
        debug!("Searching with query: {}", query);

        let uids = self.session()?.uid_search(&query).await?;
        let uid_list: Vec<SeqNo> = uids.into_iter().collect();
        debug!("Found {} messages since {}", uid_list.len(), since);
        Ok(uid_list)
    }

    async fn fetch_message_id(&mut self, seq: SeqNo) -> Result<Option<String>> {
        let messages: Vec<_> = self
            .session()?
            .uid_fetch(seq.to_string(), "ENVELOPE")
            .await?
            .try_collect()
            .await?;

        let message = messages
            .into_iter()
            .next()
            .ok_or(EmailError::MessageNotFound(seq))?;
        Ok(message
            .envelope()
            .and_then(|env| env.message_id.as_deref().and_then(clean_message_id)))
    }

    async fn fetch(&mut self, seq: SeqNo) -> Result<Vec<u8>> {
        debug!("Fetching message with UID {}", seq);

        // BODY.PEEK[] leaves the \Seen flag alone
        let messages: Vec<_> = self
            .session()?
            .uid_fetch(seq.to_string(), "BODY.PEEK[]")
            .await?
            .try_collect()
            .await?;

        let message = messages
            .into_iter()
            .next()
            .ok_or(EmailError::MessageNotFound(seq))?;
        let body = message
            .body()
            .ok_or_else(|| EmailError::ProtocolError(format!("Message {} has no body", seq)))?;
        Ok(body.to_vec())
    }

    async fn list_folders(&mut self) -> Result<Vec<FolderInfo>> {
        let names: Vec<_> = self
            .session()?
            .list(Some(""), Some("*"))
            .await?
            .try_collect()
            .await?;

        Ok(names
            .iter()
            .map(|name| FolderInfo {
                name: name.name().to_string(),
                delimiter: name.delimiter().map(str::to_string),
            })
            .collect())
    }

    async fn create_folder(&mut self, name: &str) -> Result<()> {
        info!("Creating folder '{}' for account '{}'", name, self.account_id);
        match self.session()?.create(name).await {
            Ok(()) => Ok(()),
            Err(e) if is_already_exists(&e.to_string()) => {
                Err(EmailError::FolderExists(name.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn move_message(&mut self, seq: SeqNo, folder: &str) -> Result<()> {
        self.session()?.uid_mv(seq.to_string(), folder).await?;
        Ok(())
    }

    async fn copy_message(&mut self, seq: SeqNo, folder: &str) -> Result<()> {
        self.session()?.uid_copy(seq.to_string(), folder).await?;
        Ok(())
    }

    async fn next_event(&mut self, max_wait: Duration) -> Result<MailEvent> {
        // Mail that arrived while we were busy scanning
        let arrivals = self.refresh_arrivals().await?;
        if arrivals > 0 {
            return Ok(MailEvent::NewMail { count: arrivals });
        }

        let session = self
            .session
            .take()
            .ok_or_else(|| EmailError::ConnectionClosed("Not connected".to_string()))?;
        let mut idle = session.idle();
        // The session now lives inside the IDLE handle; losing it loses the connection
        idle.init()
            .await
            .map_err(|e| EmailError::ConnectionClosed(format!("IDLE failed: {}", e)))?;

        let outcome = {
            let (wait, interrupt) = idle.wait_with_timeout(max_wait);
            let outcome = wait.await;
            drop(interrupt);
            outcome
        };

        let outcome = match outcome {
            Ok(response) => response,
            Err(e) => {
                warn!("IDLE ended for account '{}': {}", self.account_id, e);
                return Ok(MailEvent::Closed);
            }
        };

        self.session = Some(idle.done().await?);

        match outcome {
            IdleResponse::NewData(_) => {
                let count = self.refresh_arrivals().await?;
                debug!(
                    "IDLE reported new data for account '{}': arrivals={}",
                    self.account_id, count
                );
                Ok(MailEvent::NewMail { count })
            }
            IdleResponse::Timeout | IdleResponse::ManualInterrupt => Ok(MailEvent::KeepAlive),
        }
    }

    async fn logout(&mut self) -> Result<()> {
        if let Some(mut session) = self.session.take() {
            info!("Disconnecting account '{}' from IMAP server", self.account_id);
            session.logout().await?;
        }
        self.current_folder = None;
        Ok(())
    }
}

impl Drop for ImapClient {
    fn drop(&mut self) {
        if self.session.is_some() {
            warn!("ImapClient dropped without explicit logout - session will be closed");
        }
    }
}
