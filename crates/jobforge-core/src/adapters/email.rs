//! Email Adapter (C8): primary/backup SMTP with health probing.
//!
//! `useBackup` and the active transports are plain fields behind `&mut
//! self`, not a shared lock — per §9's open question, module scoping is
//! one `EmailAdapter` instance per worker process, and a worker's job loop
//! is strictly sequential (§5), so there is never a concurrent send to
//! race against.

use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqlitePool;
use sqlx::Row;
use tracing::{error, info, warn};

use crate::config::EmailConfig;
use crate::{Error, Result};

const GLOBAL_MODULE: &str = "Global";

/// Per-module (or Global-fallback) SMTP settings loaded from the external
/// configuration database.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmtpTransportConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub from_address: String,
}

#[derive(Debug, Clone)]
pub struct ModuleEmailConfig {
    pub main: SmtpTransportConfig,
    pub backup: Option<SmtpTransportConfig>,
    pub notify_admin: bool,
}

/// Reads module-scoped SMTP settings from `email.config_db_path`, falling
/// back to the `Global` row when a module has none of its own.
pub struct EmailConfigStore {
    pool: SqlitePool,
}

impl EmailConfigStore {
    pub async fn open(path: &str) -> Result<Self> {
        let pool = crate::store::create_pool(path, 2).await?;
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS smtp_config (
                module TEXT PRIMARY KEY,
                main_host TEXT NOT NULL,
                main_port INTEGER NOT NULL,
                main_username TEXT NOT NULL,
                main_password TEXT NOT NULL,
                main_from TEXT NOT NULL,
                backup_host TEXT,
                backup_port INTEGER,
                backup_username TEXT,
                backup_password TEXT,
                backup_from TEXT,
                notify_admin INTEGER NOT NULL DEFAULT 1
            )
            "#,
        )
        .execute(&pool)
        .await
        .map_err(Error::Database)?;

        Ok(Self { pool })
    }

    pub async fn load(&self, module: &str) -> Result<Option<ModuleEmailConfig>> {
        if let Some(config) = self.load_row(module).await? {
            return Ok(Some(config));
        }
        self.load_row(GLOBAL_MODULE).await
    }

    async fn load_row(&self, module: &str) -> Result<Option<ModuleEmailConfig>> {
        let row = sqlx::query("SELECT * FROM smtp_config WHERE module = ?")
            .bind(module)
            .fetch_optional(&self.pool)
            .await
            .map_err(Error::Database)?;

        let Some(row) = row else {
            return Ok(None);
        };

        let main = SmtpTransportConfig {
            host: row.try_get("main_host").map_err(Error::Database)?,
            port: row.try_get::<i64, _>("main_port").map_err(Error::Database)? as u16,
            username: row.try_get("main_username").map_err(Error::Database)?,
            password: row.try_get("main_password").map_err(Error::Database)?,
            from_address: row.try_get("main_from").map_err(Error::Database)?,
        };

        let backup_host: Option<String> = row.try_get("backup_host").map_err(Error::Database)?;
        let backup = backup_host.map(|host| SmtpTransportConfig {
            host,
            port: row
                .try_get::<Option<i64>, _>("backup_port")
                .ok()
                .flatten()
                .unwrap_or(587) as u16,
            username: row
                .try_get::<Option<String>, _>("backup_username")
                .ok()
                .flatten()
                .unwrap_or_default(),
            password: row
                .try_get::<Option<String>, _>("backup_password")
                .ok()
                .flatten()
                .unwrap_or_default(),
            from_address: row
                .try_get::<Option<String>, _>("backup_from")
                .ok()
                .flatten()
                .unwrap_or_default(),
        });

        Ok(Some(ModuleEmailConfig {
            main,
            backup,
            notify_admin: row.try_get::<bool, _>("notify_admin").map_err(Error::Database)?,
        }))
    }
}

/// Durable audit trail of send attempts, separate from the config DB.
pub struct EmailLogStore {
    pool: SqlitePool,
}

impl EmailLogStore {
    pub async fn open(path: &str) -> Result<Self> {
        let pool = crate::store::create_pool(path, 2).await?;
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS email_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                module TEXT NOT NULL,
                recipient TEXT NOT NULL,
                used_backup INTEGER NOT NULL,
                success INTEGER NOT NULL,
                detail TEXT,
                created_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await
        .map_err(Error::Database)?;

        Ok(Self { pool })
    }

    pub async fn log(&self, module: &str, recipient: &str, used_backup: bool, success: bool, detail: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO email_log (module, recipient, used_backup, success, detail, created_at) VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(module)
        .bind(recipient)
        .bind(used_backup)
        .bind(success)
        .bind(detail)
        .bind(chrono::Utc::now())
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(())
    }
}

/// A producer-facing send request.
#[derive(Debug, Clone, Deserialize)]
pub struct SendEmailRequest {
    pub to: String,
    pub subject: String,
    #[serde(default)]
    pub html: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub module: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SendEmailResult {
    pub message_id: String,
    pub response: String,
    pub used_backup: bool,
}

type SmtpTransport = AsyncSmtpTransport<Tokio1Executor>;

pub struct EmailAdapter {
    config: EmailConfig,
    config_store: EmailConfigStore,
    log_store: EmailLogStore,
    current_module: Option<String>,
    main_transport: Option<SmtpTransport>,
    main_from: Option<String>,
    backup_transport: Option<SmtpTransport>,
    backup_from: Option<String>,
    notify_admin: bool,
    use_backup: bool,
}

impl EmailAdapter {
    pub async fn new(config: EmailConfig) -> Result<Self> {
        let config_store = EmailConfigStore::open(&config.config_db_path).await?;
        let log_store = EmailLogStore::open(&config.log_db_path).await?;

        Ok(Self {
            config,
            config_store,
            log_store,
            current_module: None,
            main_transport: None,
            main_from: None,
            backup_transport: None,
            backup_from: None,
            notify_admin: true,
            use_backup: false,
        })
    }

    /// Build main/backup transports for `module`, falling back to Global
    /// config. If main can't be built but failover is enabled and backup
    /// can, serve exclusively from backup.
    pub async fn init(&mut self, module: &str) -> Result<()> {
        let module_config = self
            .config_store
            .load(module)
            .await?
            .ok_or_else(|| Error::adapter_failure(format!("no SMTP config for module {}", module)))?;

        self.notify_admin = module_config.notify_admin && self.config.notify_admin_on_failover;

        let main_built = build_transport(&module_config.main);
        let backup_built = if self.config.failover_enabled {
            module_config.backup.as_ref().and_then(|b| build_transport(b).ok())
        } else {
            None
        };

        match main_built {
            Ok(main) => {
                self.main_transport = Some(main);
                self.main_from = Some(module_config.main.from_address.clone());
                self.use_backup = false;
            }
            Err(e) => {
                warn!(module, error = %e, "main SMTP transport failed to build");
                self.main_transport = None;
                if backup_built.is_none() {
                    return Err(Error::adapter_failure(format!(
                        "no usable SMTP transport for module {}",
                        module
                    )));
                }
                self.use_backup = true;
            }
        }

        if let Some(backup_cfg) = module_config.backup {
            self.backup_from = Some(backup_cfg.from_address.clone());
        }
        self.backup_transport = backup_built;
        self.current_module = Some(module.to_string());

        Ok(())
    }

    pub async fn send(&mut self, request: SendEmailRequest) -> Result<SendEmailResult> {
        let module = request.module.clone().unwrap_or_else(|| GLOBAL_MODULE.to_string());

        if self.current_module.as_deref() != Some(module.as_str()) {
            self.init(&module).await?;
        }

        if self.main_transport.is_none() && self.backup_transport.is_none() {
            self.log_store
                .log(&module, &request.to, self.use_backup, false, "no transport available")
                .await
                .ok();
            return Err(Error::adapter_failure("no SMTP transport available"));
        }

        let message = build_message(&request, self.active_from())?;

        if !self.use_backup {
            if let Some(transport) = &self.main_transport {
                match transport.send(message.clone()).await {
                    Ok(response) => {
                        let result = SendEmailResult {
                            message_id: message_id(&message),
                            response: format!("{:?}", response),
                            used_backup: false,
                        };
                        self.log_store
                            .log(&module, &request.to, false, true, &result.response)
                            .await
                            .ok();
                        return Ok(result);
                    }
                    Err(e) => {
                        error!(module, error = %e, "main SMTP send failed");
                        self.log_store
                            .log(&module, &request.to, false, false, &e.to_string())
                            .await
                            .ok();

                        if self.backup_transport.is_none() {
                            return Err(Error::adapter_failure(e.to_string()));
                        }

                        self.use_backup = true;
                        if self.notify_admin {
                            self.notify_admin_of_failover(&module).await;
                        }
                    }
                }
            }
        }

        let backup = self
            .backup_transport
            .as_ref()
            .ok_or_else(|| Error::adapter_failure("no backup SMTP transport available"))?;

        match backup.send(message.clone()).await {
            Ok(response) => {
                let result = SendEmailResult {
                    message_id: message_id(&message),
                    response: format!("{:?}", response),
                    used_backup: true,
                };
                self.log_store
                    .log(&module, &request.to, true, true, &result.response)
                    .await
                    .ok();
                Ok(result)
            }
            Err(e) => {
                self.log_store
                    .log(&module, &request.to, true, false, &e.to_string())
                    .await
                    .ok();
                Err(Error::adapter_failure(format!("backup SMTP send failed: {}", e)))
            }
        }
    }

    /// Health probe called from the worker runtime when degraded: verify
    /// the main transport; if it works again, clear `useBackup`.
    pub async fn health_probe(&mut self) -> Result<bool> {
        let Some(transport) = &self.main_transport else {
            return Ok(false);
        };

        let recovered = transport.test_connection().await.unwrap_or(false);
        if recovered && self.use_backup {
            self.use_backup = false;
            info!(module = ?self.current_module, "main SMTP transport recovered");
            if self.notify_admin {
                if let Some(module) = self.current_module.clone() {
                    self.notify_admin_of_recovery(&module).await;
                }
            }
        }

        Ok(recovered)
    }

    fn active_from(&self) -> &str {
        if self.use_backup {
            self.backup_from.as_deref().unwrap_or("noreply@localhost")
        } else {
            self.main_from.as_deref().unwrap_or("noreply@localhost")
        }
    }

    async fn notify_admin_of_failover(&self, module: &str) {
        self.send_admin_alert(module, "SMTP failover engaged", "Main SMTP transport failed; now serving from backup.")
            .await;
    }

    async fn notify_admin_of_recovery(&self, module: &str) {
        self.send_admin_alert(module, "SMTP recovered", "Main SMTP transport is healthy again.")
            .await;
    }

    async fn send_admin_alert(&self, module: &str, subject: &str, body: &str) {
        let Some(admin_email) = &self.config.admin_email else {
            return;
        };
        let Some(backup) = &self.backup_transport else {
            return;
        };

        let message = Message::builder()
            .from(self.active_from().parse().unwrap_or_else(|_| "noreply@localhost".parse().unwrap()))
            .to(admin_email.parse().unwrap_or_else(|_| "noreply@localhost".parse().unwrap()))
            .subject(format!("[{}] {}", module, subject))
            .body(body.to_string());

        if let Ok(message) = message {
            if let Err(e) = backup.send(message).await {
                warn!(error = %e, "failed to deliver admin alert");
            }
        }
    }
}

fn build_transport(config: &SmtpTransportConfig) -> Result<SmtpTransport> {
    let creds = Credentials::new(config.username.clone(), config.password.clone());

    let transport = if config.port == 25 {
        AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.host)
            .port(config.port)
            .credentials(creds)
            .build()
    } else {
        AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)
            .map_err(|e| Error::adapter_failure(e.to_string()))?
            .port(config.port)
            .credentials(creds)
            .build()
    };

    Ok(transport)
}

fn build_message(request: &SendEmailRequest, from: &str) -> Result<Message> {
    let builder = Message::builder()
        .from(from.parse().map_err(|_| Error::validation("invalid from address"))?)
        .to(request
            .to
            .parse()
            .map_err(|_| Error::validation("invalid recipient address"))?)
        .subject(&request.subject);

    let message = if let Some(html) = &request.html {
        builder
            .header(lettre::message::header::ContentType::TEXT_HTML)
            .body(html.clone())
    } else {
        builder.body(request.text.clone().unwrap_or_default())
    }
    .map_err(|e| Error::validation(e.to_string()))?;

    Ok(message)
}

fn message_id(message: &Message) -> String {
    message
        .headers()
        .get_raw("Message-ID")
        .map(|s| s.to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn send_without_any_config_fails_as_adapter_failure() {
        let dir = std::env::temp_dir();
        let config_db = dir.join(format!("jobforge-email-config-test-{}.db", std::process::id()));
        let log_db = dir.join(format!("jobforge-email-log-test-{}.db", std::process::id()));

        let config = EmailConfig {
            config_db_path: config_db.to_string_lossy().to_string(),
            log_db_path: log_db.to_string_lossy().to_string(),
            failover_enabled: true,
            notify_admin_on_failover: false,
            admin_email: None,
        };

        let mut adapter = EmailAdapter::new(config).await.unwrap();
        let result = adapter
            .send(SendEmailRequest {
                to: "user@example.com".to_string(),
                subject: "hi".to_string(),
                html: None,
                text: Some("hello".to_string()),
                module: None,
            })
            .await;

        assert!(result.is_err());
        let _ = std::fs::remove_file(&config_db);
        let _ = std::fs::remove_file(&log_db);
    }
}
