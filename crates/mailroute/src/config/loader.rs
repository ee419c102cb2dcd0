use std::collections::HashSet;
use std::path::Path;

use crate::config::schema::{
    AccountConfig, AuthSettings, AuthType, ClassifierSettings, Config, DatabaseSettings,
    IndexSettings, NotificationSettings, ReplySettings, SessionSettings,
};
use crate::error::ConfigError;
use crate::secrets::SecretSource;

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    load_config_from_str(&content)
}

pub fn load_config_from_str(content: &str) -> Result<Config, ConfigError> {
    let config: Config = serde_yaml::from_str(content)?;

    validate_config(&config)?;

    Ok(config)
}

impl Config {
    /// Builds a configuration from `EMAIL_<n>_*` style environment variables.
    ///
    /// Accounts are numbered from 1 and read until `EMAIL_<n>_USER` is unset.
    /// Passwords and API keys stay as env var references and are resolved when
    /// the components are constructed.
    pub fn from_env() -> Result<Config, ConfigError> {
        let mut accounts = Vec::new();
        for n in 1.. {
            let Some(username) = env_value(&format!("EMAIL_{n}_USER")) else {
                break;
            };
            accounts.push(account_from_env(n, username)?);
        }

        let mut notifications = NotificationSettings::default();
        if env_value("SLACK_WEBHOOK_URL").is_some() {
            notifications.slack_webhook_url = SecretSource::env("SLACK_WEBHOOK_URL");
        }
        if env_value("WEBHOOK_SITE_URL").is_some() {
            notifications.webhook_url = SecretSource::env("WEBHOOK_SITE_URL");
        }

        let mut index = IndexSettings::default();
        if let Some(url) = env_value("ES_URL") {
            index.url = url;
        }

        let config = Config {
            accounts,
            classifier: ClassifierSettings::default(),
            index,
            notifications,
            session: SessionSettings::default(),
            reply: ReplySettings::default(),
            database: DatabaseSettings {
                path: env_value("MAILROUTE_DB_PATH"),
            },
        };

        validate_config(&config)?;

        Ok(config)
    }
}

fn account_from_env(n: u32, username: String) -> Result<AccountConfig, ConfigError> {
    let host_var = format!("EMAIL_{n}_HOST");
    let host = env_value(&host_var).ok_or_else(|| ConfigError::InvalidEnv {
        name: host_var.clone(),
        reason: "must be set when the account user is set".to_string(),
    })?;

    let port_var = format!("EMAIL_{n}_PORT");
    let port = match env_value(&port_var) {
        Some(raw) => raw.parse::<u16>().map_err(|e| ConfigError::InvalidEnv {
            name: port_var,
            reason: e.to_string(),
        })?,
        None => 993,
    };

    let certs_var = format!("EMAIL_{n}_ACCEPT_INVALID_CERTS");
    let accept_invalid_certs = match env_value(&certs_var).as_deref() {
        None => false,
        Some("1") | Some("true") | Some("yes") => true,
        Some("0") | Some("false") | Some("no") => false,
        Some(other) => {
            return Err(ConfigError::InvalidEnv {
                name: certs_var,
                reason: format!("expected true or false, got '{}'", other),
            })
        }
    };

    Ok(AccountConfig {
        id: format!("account{n}"),
        username,
        host,
        port,
        use_tls: true,
        accept_invalid_certs,
        auth: AuthSettings {
            auth_type: AuthType::Password,
            password: SecretSource::env(format!("EMAIL_{n}_PASS")),
            access_token: SecretSource::default(),
        },
        folder: "INBOX".to_string(),
        labels: Default::default(),
        enabled: true,
    })
}

fn env_value(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    let mut errors = Vec::new();

    if config.accounts.is_empty() {
        errors.push("at least one account must be configured".to_string());
    }

    let mut ids = HashSet::new();
    for account in &config.accounts {
        if account.id.trim().is_empty() {
            errors.push("account id must not be empty".to_string());
        } else if !ids.insert(account.id.as_str()) {
            errors.push(format!("duplicate account id '{}'", account.id));
        }

        if account.host.trim().is_empty() {
            errors.push(format!("account '{}': host must not be empty", account.id));
        }
        if account.username.trim().is_empty() {
            errors.push(format!(
                "account '{}': username must not be empty",
                account.id
            ));
        }

        // TLS is required for security
        if !account.use_tls {
            errors.push(format!(
                "account '{}': useTls must be true (TLS is required for security)",
                account.id
            ));
        }

        match account.auth.auth_type {
            AuthType::Password if !account.auth.password.is_configured() => {
                errors.push(format!(
                    "account '{}': password authentication requires one of: value, file, or envVar",
                    account.id
                ));
            }
            AuthType::OAuth2 if !account.auth.access_token.is_configured() => {
                errors.push(format!(
                    "account '{}': oauth2 authentication requires an accessToken source",
                    account.id
                ));
            }
            _ => {}
        }
    }

    let classifier = &config.classifier;
    if classifier.max_attempts == 0 {
        errors.push("classifier.maxAttempts must be at least 1".to_string());
    }
    if classifier.reservoir == 0 {
        errors.push("classifier.reservoir must be at least 1".to_string());
    }
    if classifier.jitter_min_ms > classifier.jitter_max_ms {
        errors.push("classifier.jitterMinMs must not exceed jitterMaxMs".to_string());
    }

    if config.session.backlog_window_hours == 0 {
        errors.push("session.backlogWindowHours must be positive".to_string());
    }
    if config.session.route_timeout_secs == 0 {
        errors.push("session.routeTimeoutSecs must be positive".to_string());
    }

    if config.index.index_name.trim().is_empty() {
        errors.push("index.indexName must not be empty".to_string());
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ConfigError::Validation {
            message: errors.join("; "),
        })
    }
}
