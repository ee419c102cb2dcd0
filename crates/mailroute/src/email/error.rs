//! Mail source error types.

use thiserror::Error;

/// Errors raised by the mail source, the normalizer and the folder router.
#[derive(Error, Debug)]
pub enum EmailError {
    /// Failed to connect to the IMAP server.
    #[error("IMAP connection failed: {0}")]
    ConnectionFailed(String),

    /// The server closed the connection.
    #[error("IMAP connection closed: {0}")]
    ConnectionClosed(String),

    /// TLS/SSL error during connection.
    #[error("TLS error: {0}")]
    TlsError(String),

    /// Authentication failed.
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    /// Credentials could not be resolved from their configured source.
    #[error("Credentials not found: {0}")]
    CredentialsNotFound(String),

    /// IMAP protocol error.
    #[error("IMAP protocol error: {0}")]
    ProtocolError(String),

    /// Failed to parse email message.
    #[error("Failed to parse email: {0}")]
    ParseError(String),

    /// IO error on the underlying socket.
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// Folder not found.
    #[error("IMAP folder '{0}' not found")]
    FolderNotFound(String),

    /// Folder creation was rejected because the folder already exists.
    #[error("IMAP folder '{0}' already exists")]
    FolderExists(String),

    /// Message not present in the selected folder.
    #[error("Message {0} not found")]
    MessageNotFound(u32),

    /// Invalid configuration.
    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    /// Operation timed out.
    #[error("Operation timed out: {0}")]
    Timeout(String),
}

impl EmailError {
    /// Transport-level failures that invalidate the session.
    ///
    /// These abort the current scan and hand control back to the reconnect
    /// loop; every other variant only affects the message at hand.
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            EmailError::ConnectionFailed(_)
                | EmailError::ConnectionClosed(_)
                | EmailError::TlsError(_)
                | EmailError::AuthenticationFailed(_)
                | EmailError::IoError(_)
                | EmailError::Timeout(_)
        )
    }
}

impl From<async_native_tls::Error> for EmailError {
    fn from(err: async_native_tls::Error) -> Self {
        EmailError::TlsError(err.to_string())
    }
}

impl From<async_imap::error::Error> for EmailError {
    fn from(err: async_imap::error::Error) -> Self {
        use async_imap::error::Error as ImapError;
        match err {
            ImapError::Io(e) => EmailError::IoError(e),
            ImapError::ConnectionLost => {
                EmailError::ConnectionClosed("connection lost".to_string())
            }
            other => EmailError::ProtocolError(other.to_string()),
        }
    }
}

/// Result type for email operations.
pub type Result<T> = std::result::Result<T, EmailError>;
