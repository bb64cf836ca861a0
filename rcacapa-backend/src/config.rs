use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::host::ClassifierMode;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
    #[error("{name} has an invalid value: {value}")]
    Invalid { name: &'static str, value: String },
}

/// Connection details for the agent-hosting project, parsed from
/// `host;subscription_id;resource_group;project_name`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectConnection {
    pub host: String,
    pub subscription_id: String,
    pub resource_group: String,
    pub project_name: String,
}

impl ProjectConnection {
    pub fn parse(conn_str: &str) -> Result<Self, ConfigError> {
        let parts: Vec<&str> = conn_str.split(';').map(str::trim).collect();
        match parts.as_slice() {
            [host, sub, rg, project]
                if [host, sub, rg, project].iter().all(|p| !p.is_empty()) =>
            {
                Ok(Self {
                    host: host.trim_start_matches("https://").trim_end_matches('/').to_string(),
                    subscription_id: sub.to_string(),
                    resource_group: rg.to_string(),
                    project_name: project.to_string(),
                })
            }
            _ => Err(ConfigError::Invalid {
                name: "PROJECT_CONN_STR",
                value: "expected host;subscription_id;resource_group;project_name".to_string(),
            }),
        }
    }

    /// Base URL of the agents REST surface for this project
    pub fn agents_base_url(&self) -> String {
        format!(
            "https://{}/agents/v1.0/subscriptions/{}/resourceGroups/{}/providers/Microsoft.MachineLearningServices/workspaces/{}",
            self.host, self.subscription_id, self.resource_group, self.project_name
        )
    }
}

#[derive(Clone)]
pub struct Config {
    pub port: u16,
    pub project: ProjectConnection,
    pub project_access_token: String,
    pub agents_api_version: String,
    pub openai_endpoint: String,
    pub openai_deployment: String,
    pub openai_api_key: String,
    pub openai_api_version: String,
    pub categoriser_agent_id: String,
    pub data_agent_id: String,
    pub dispatch_timeout: Duration,
    pub dispatch_margin: Duration,
    pub grace_attempts: u32,
    pub grace_interval: Duration,
    pub classifier: ClassifierMode,
    pub shutdown_drain: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            port: parsed("PORT", 8080)?,
            project: ProjectConnection::parse(&required("PROJECT_CONN_STR")?)?,
            project_access_token: required("PROJECT_ACCESS_TOKEN")?,
            agents_api_version: env::var("AGENTS_API_VERSION")
                .unwrap_or_else(|_| "2024-12-01-preview".to_string()),
            openai_endpoint: required("AZURE_OPENAI_ENDPOINT")?,
            openai_deployment: required("AZURE_OPENAI_DEPLOYMENT")?,
            openai_api_key: required("AZURE_OPENAI_API_KEY")?,
            openai_api_version: env::var("AZURE_OPENAI_API_VERSION")
                .unwrap_or_else(|_| "2024-06-01".to_string()),
            categoriser_agent_id: required("CATEGORISER_AGENT_ID")?,
            data_agent_id: required("DATA_AGENT_ID")?,
            dispatch_timeout: Duration::from_secs(parsed("DISPATCH_TIMEOUT_SECS", 50)?),
            dispatch_margin: Duration::from_millis(parsed("DISPATCH_MARGIN_MS", 2000)?),
            grace_attempts: parsed("GRACE_ATTEMPTS", 2)?,
            grace_interval: Duration::from_secs(parsed("GRACE_INTERVAL_SECS", 5)?),
            classifier: parsed("HOST_CLASSIFIER", ClassifierMode::Heuristic)?,
            shutdown_drain: Duration::from_secs(parsed("SHUTDOWN_DRAIN_SECS", 30)?),
        })
    }
}

fn required(name: &'static str) -> Result<String, ConfigError> {
    match env::var(name) {
        Ok(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(ConfigError::Missing(name)),
    }
}

fn parsed<T: FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(v) => v.trim().parse().map_err(|_| ConfigError::Invalid { name, value: v }),
        Err(_) => Ok(default),
    }
}
