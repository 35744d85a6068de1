//! Environment-driven settings. Everything is read and checked up front so a
//! missing variable fails before any network call.

use std::path::PathBuf;
use std::sync::Arc;

use crate::core::backend::{
    AuthProvider, Backend, HostedAuth, HostedBackend, LocalAuth, LocalBackend, schema,
};
use crate::core::pipeline::{Deployment, DeploymentError};
use crate::core::review::{DeliveryChannel, ResendEmail, SlackWebhook, job::DEFAULT_CRON};

pub const DEFAULT_APP: &str = "pmlibrary";
pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 8787;
pub const DEFAULT_BASE_URL: &str = "http://localhost:5173";

const EMAIL_VARS: [&str; 3] = ["RESEND_API_KEY", "EMAIL_DOMAIN", "REVIEW_EMAIL"];

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{var} is not set ({hint})")]
    Missing { var: &'static str, hint: &'static str },
    #[error("{var}={value} is invalid: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
    #[error("email delivery is partially configured; also set {}", .missing.join(", "))]
    PartialEmail { missing: Vec<&'static str> },
    #[error("no review channel configured; set SLACK_WEBHOOK_URL or RESEND_API_KEY/EMAIL_DOMAIN/REVIEW_EMAIL")]
    NoChannels,
    #[error(transparent)]
    Deployment(#[from] DeploymentError),
}

#[derive(Debug, Clone, PartialEq)]
pub enum BackendConfig {
    Hosted { url: String, key: String },
    Local { path: PathBuf },
}

#[derive(Debug, Clone, PartialEq)]
pub struct EmailConfig {
    pub api_key: String,
    pub domain: String,
    pub to: String,
}

/// Command-line values that win over the environment.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub app: Option<String>,
    pub local: Option<PathBuf>,
    pub host: Option<String>,
    pub port: Option<u16>,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub app: String,
    pub deployment_file: Option<PathBuf>,
    pub backend: BackendConfig,
    pub host: String,
    pub port: u16,
    pub slack_webhook: Option<String>,
    pub email: Option<EmailConfig>,
    pub base_url: String,
    pub review_cron: String,
}

fn first_of(lookup: &impl Fn(&str) -> Option<String>, vars: &[&str]) -> Option<String> {
    vars.iter()
        .filter_map(|v| lookup(v))
        .map(|v| v.trim().to_string())
        .find(|v| !v.is_empty())
}

impl AppConfig {
    /// Loads `.env` when present, then reads the process environment.
    pub fn from_env(overrides: Overrides) -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok(), overrides)
    }

    pub fn from_lookup(
        lookup: impl Fn(&str) -> Option<String>,
        overrides: Overrides,
    ) -> Result<Self, ConfigError> {
        let app = overrides
            .app
            .or_else(|| first_of(&lookup, &["PMBOARD_APP"]))
            .unwrap_or_else(|| DEFAULT_APP.to_string());
        if app != "pmlibrary" && app != "pmplatto" {
            return Err(ConfigError::Invalid {
                var: "PMBOARD_APP",
                value: app,
                reason: "expected pmlibrary or pmplatto".into(),
            });
        }

        let local = overrides
            .local
            .or_else(|| first_of(&lookup, &["PMBOARD_LOCAL_DB"]).map(PathBuf::from));
        let backend = match local {
            Some(path) => BackendConfig::Local { path },
            None => {
                let url = first_of(&lookup, &["SUPABASE_URL", "VITE_SUPABASE_URL"]).ok_or(
                    ConfigError::Missing {
                        var: "SUPABASE_URL",
                        hint: "or use --local <path> / PMBOARD_LOCAL_DB",
                    },
                )?;
                if url::Url::parse(&url).is_err() {
                    return Err(ConfigError::Invalid {
                        var: "SUPABASE_URL",
                        value: url,
                        reason: "not a URL".into(),
                    });
                }
                let key = first_of(
                    &lookup,
                    &[
                        "SUPABASE_SERVICE_ROLE_KEY",
                        "SUPABASE_ANON_KEY",
                        "VITE_SUPABASE_ANON_KEY",
                    ],
                )
                .ok_or(ConfigError::Missing {
                    var: "SUPABASE_SERVICE_ROLE_KEY",
                    hint: "SUPABASE_ANON_KEY is also accepted",
                })?;
                BackendConfig::Hosted { url, key }
            }
        };

        let port = match overrides.port {
            Some(port) => port,
            None => match first_of(&lookup, &["PMBOARD_PORT"]) {
                Some(raw) => raw.parse().map_err(|_| ConfigError::Invalid {
                    var: "PMBOARD_PORT",
                    value: raw.clone(),
                    reason: "expected a port number".into(),
                })?,
                None => DEFAULT_PORT,
            },
        };

        let email_values: Vec<Option<String>> =
            EMAIL_VARS.iter().map(|v| first_of(&lookup, &[*v])).collect();
        let email = if email_values.iter().all(Option::is_none) {
            None
        } else {
            let missing: Vec<&'static str> = EMAIL_VARS
                .iter()
                .zip(&email_values)
                .filter(|(_, v)| v.is_none())
                .map(|(name, _)| *name)
                .collect();
            if !missing.is_empty() {
                return Err(ConfigError::PartialEmail { missing });
            }
            let mut values = email_values.into_iter().flatten();
            Some(EmailConfig {
                api_key: values.next().unwrap_or_default(),
                domain: values.next().unwrap_or_default(),
                to: values.next().unwrap_or_default(),
            })
        };

        Ok(Self {
            app,
            deployment_file: first_of(&lookup, &["PMBOARD_DEPLOYMENT_FILE"]).map(PathBuf::from),
            backend,
            host: overrides
                .host
                .or_else(|| first_of(&lookup, &["PMBOARD_HOST"]))
                .unwrap_or_else(|| DEFAULT_HOST.to_string()),
            port,
            slack_webhook: first_of(&lookup, &["SLACK_WEBHOOK_URL"]),
            email,
            base_url: first_of(&lookup, &["APP_BASE_URL"])
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            review_cron: first_of(&lookup, &["REVIEW_CRON"])
                .unwrap_or_else(|| DEFAULT_CRON.to_string()),
        })
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn is_local(&self) -> bool {
        matches!(self.backend, BackendConfig::Local { .. })
    }

    /// The preset named by `app`, or the TOML override when one is set.
    pub fn deployment(&self) -> Result<Deployment, ConfigError> {
        let deployment = match &self.deployment_file {
            Some(path) => Deployment::load_file(path)?,
            None => Deployment::preset(&self.app)?,
        };
        Ok(deployment)
    }

    pub fn require_channel(&self) -> Result<(), ConfigError> {
        if self.slack_webhook.is_none() && self.email.is_none() {
            return Err(ConfigError::NoChannels);
        }
        Ok(())
    }

    pub fn review_channels(&self, deployment: &Deployment) -> Vec<Arc<dyn DeliveryChannel>> {
        let mut channels: Vec<Arc<dyn DeliveryChannel>> = Vec::new();
        if let Some(url) = &self.slack_webhook {
            channels.push(Arc::new(SlackWebhook::new(url.clone())));
        }
        if let Some(email) = &self.email {
            channels.push(Arc::new(ResendEmail::new(
                email.api_key.clone(),
                &email.domain,
                email.to.clone(),
                deployment.display_name.clone(),
                self.base_url.clone(),
            )));
        }
        channels
    }

    /// Opens the configured backend and its matching auth provider.
    pub async fn connect(
        &self,
        deployment: &Deployment,
    ) -> anyhow::Result<(Arc<dyn Backend>, Arc<dyn AuthProvider>)> {
        match &self.backend {
            BackendConfig::Hosted { url, key } => Ok((
                Arc::new(HostedBackend::new(url, key)),
                Arc::new(HostedAuth::new(url, key)),
            )),
            BackendConfig::Local { path } => {
                let backend = LocalBackend::open(path, schema(&deployment.episode_table)).await?;
                let auth = LocalAuth::new(backend.connection()).await?;
                Ok((Arc::new(backend), Arc::new(auth)))
            }
        }
    }
}
