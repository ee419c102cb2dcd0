//! Moves or copies one message into a category folder.
//!
//! Each routing call opens its own connection so a slow or wedged route
//! never stalls the account's watching session. The whole call, connect
//! included, runs under one deadline and the connection is logged out
//! exactly once on every path.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{timeout, timeout_at, Instant};
use tracing::{debug, info, warn};

use crate::config::AccountConfig;

use super::error::{EmailError, Result};
use super::source::{FolderInfo, MailConnector, MailSession, SeqNo};

const LOGOUT_TIMEOUT: Duration = Duration::from_secs(5);

/// Whether the source message stays in place.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteMode {
    Move,
    Copy,
}

/// Resolves destination folders and routes messages into them.
#[derive(Clone)]
pub struct FolderRouter {
    connector: Arc<dyn MailConnector>,
    timeout: Duration,
}

impl FolderRouter {
    pub fn new(connector: Arc<dyn MailConnector>, timeout: Duration) -> Self {
        Self { connector, timeout }
    }

    /// Moves `seq` from `source` into `destination`, creating it if needed.
    ///
    /// Returns the folder name as the server knows it.
    pub async fn move_to(
        &self,
        account: &AccountConfig,
        source: &str,
        seq: SeqNo,
        destination: &str,
    ) -> Result<String> {
        self.route(account, source, seq, destination, RouteMode::Move)
            .await
    }

    /// Copies `seq` into `destination`, leaving the source message untouched.
    pub async fn copy_to(
        &self,
        account: &AccountConfig,
        source: &str,
        seq: SeqNo,
        destination: &str,
    ) -> Result<String> {
        self.route(account, source, seq, destination, RouteMode::Copy)
            .await
    }

    pub async fn route(
        &self,
        account: &AccountConfig,
        source: &str,
        seq: SeqNo,
        destination: &str,
        mode: RouteMode,
    ) -> Result<String> {
        let deadline = Instant::now() + self.timeout;
        let timed_out = || {
            EmailError::Timeout(format!(
                "routing message {} to '{}' exceeded {:?}",
                seq, destination, self.timeout
            ))
        };

        let mut session = timeout_at(deadline, self.connector.connect(account))
            .await
            .map_err(|_| timed_out())??;

        let outcome = timeout_at(
            deadline,
            route_in_session(session.as_mut(), source, seq, destination, mode),
        )
        .await;

        match timeout(LOGOUT_TIMEOUT, session.logout()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(account = %account.id, "Logout after routing failed: {}", e),
            Err(_) => warn!(account = %account.id, "Logout after routing timed out"),
        }
        drop(session);

        match outcome {
            Ok(Ok(folder)) => {
                info!(
                    account = %account.id,
                    seq,
                    folder = %folder,
                    "{} message",
                    if mode == RouteMode::Move { "Moved" } else { "Copied" }
                );
                Ok(folder)
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(timed_out()),
        }
    }
}

async fn route_in_session(
    session: &mut dyn MailSession,
    source: &str,
    seq: SeqNo,
    destination: &str,
    mode: RouteMode,
) -> Result<String> {
    session.open_folder(source).await?;
    let folder = resolve_folder(session, destination).await?;

    match mode {
        RouteMode::Move => session.move_message(seq, &folder).await?,
        RouteMode::Copy => session.copy_message(seq, &folder).await?,
    }
    Ok(folder)
}

/// Finds `wanted` in the folder tree, creating it when absent.
pub async fn resolve_folder(session: &mut dyn MailSession, wanted: &str) -> Result<String> {
    let folders = session.list_folders().await?;
    if let Some(found) = find_folder(&folders, wanted) {
        debug!("Folder '{}' resolved to '{}'", wanted, found);
        return Ok(found);
    }

    match session.create_folder(wanted).await {
        Ok(()) => info!("Created folder '{}'", wanted),
        Err(EmailError::FolderExists(_)) => {
            info!("Folder '{}' was created concurrently", wanted)
        }
        Err(e) => return Err(e),
    }

    let folders = session.list_folders().await?;
    find_folder(&folders, wanted).ok_or_else(|| EmailError::FolderNotFound(wanted.to_string()))
}

/// Case-insensitive lookup that ignores an `INBOX` namespace prefix.
pub fn find_folder(folders: &[FolderInfo], wanted: &str) -> Option<String> {
    let wanted = normalize_folder_name(wanted, None);
    folders
        .iter()
        .find(|f| normalize_folder_name(&f.name, f.delimiter.as_deref()) == wanted)
        .map(|f| f.name.clone())
}

fn normalize_folder_name(name: &str, delimiter: Option<&str>) -> String {
    let lower = name.trim().to_lowercase();
    let mut prefixes = vec!["inbox.".to_string(), "inbox/".to_string()];
    if let Some(delim) = delimiter {
        prefixes.push(format!("inbox{}", delim.to_lowercase()));
    }

    prefixes
        .iter()
        .find_map(|prefix| lower.strip_prefix(prefix.as_str()))
        .map(str::to_string)
        .unwrap_or(lower)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn folders(names: &[&str]) -> Vec<FolderInfo> {
        names.iter().map(|n| FolderInfo::new(*n)).collect()
    }

    #[test]
    fn test_find_folder_case_insensitive() {
        let tree = folders(&["INBOX", "Sent", "Interested"]);
        assert_eq!(find_folder(&tree, "interested").as_deref(), Some("Interested"));
        assert_eq!(find_folder(&tree, "SENT").as_deref(), Some("Sent"));
        assert_eq!(find_folder(&tree, "spam"), None);
    }

    #[test]
    fn test_find_folder_ignores_inbox_prefix() {
        let tree = folders(&["INBOX", "INBOX.Spam", "INBOX/MeetingBooked"]);
        assert_eq!(find_folder(&tree, "spam").as_deref(), Some("INBOX.Spam"));
        assert_eq!(
            find_folder(&tree, "meetingbooked").as_deref(),
            Some("INBOX/MeetingBooked")
        );
        assert_eq!(find_folder(&tree, "INBOX.spam").as_deref(), Some("INBOX.Spam"));
    }

    #[test]
    fn test_find_folder_with_custom_delimiter() {
        let tree = vec![FolderInfo {
            name: "Inbox|Leads".to_string(),
            delimiter: Some("|".to_string()),
        }];
        assert_eq!(find_folder(&tree, "leads").as_deref(), Some("Inbox|Leads"));
    }

    #[test]
    fn test_inbox_itself_is_not_stripped() {
        let tree = folders(&["INBOX"]);
        assert_eq!(find_folder(&tree, "inbox").as_deref(), Some("INBOX"));
    }
}
