//! Config - 環境変数から読む設定
//!
//! 値の取得は lookup 関数経由（テストではプロセスの env を触らない）。
//! 空文字は未設定と同じ扱い。数値は 0 なら default に戻す。

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use crate::app::consume_loop::{ConsumeSettings, DEFAULT_MAX_INFLIGHT_DELIVERIES, DEFAULT_PULL_WAIT};
use crate::app::flow_control::{
    DEFAULT_MAX_OUTSTANDING_BYTES, DEFAULT_MAX_OUTSTANDING_MESSAGES, FlowControlSettings,
};
use crate::domain::{
    ConfigError, DEFAULT_MAX_ATTEMPTS, DEFAULT_RETRY_DELAY, ProjectId, RetryPolicy, SubscriptionId,
    TopicId,
};
use crate::impls::{DEFAULT_PUBSUB_ENDPOINT, PubSubRestBroker};

pub const DEFAULT_PORT: u16 = 8081;
pub const DEFAULT_PUBLISH_TIMEOUT: Duration = Duration::from_secs(600);

pub const ENV_PROJECT_ID: &str = "GCP_PROJECT_ID";
pub const ENV_PROJECT_ID_ALIAS: &str = "PROJECT_ID";
pub const ENV_TOPIC_ID: &str = "TOPIC_ID";
pub const ENV_SUBSCRIPTION_ID: &str = "SUBSCRIPTION_ID";
pub const ENV_ENDPOINT_SERVER: &str = "ENDPOINT_SERVER";
pub const ENV_SINK_ENDPOINT: &str = "SINK_ENDPOINT";
pub const ENV_EMULATOR_HOST: &str = "PUBSUB_EMULATOR_HOST";
pub const ENV_PORT: &str = "PORT";
pub const ENV_LOCAL_ONLY: &str = "LOCAL_ONLY";

/// Process configuration.
///
/// Required values are kept optional here; each entry point asks for what it
/// needs through the `require_*` accessors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub project_id: Option<ProjectId>,
    pub topic_id: Option<TopicId>,
    pub subscription_id: Option<SubscriptionId>,
    // Message source for the publish endpoint.
    pub endpoint_server: Option<String>,
    // Forward target for consumed messages.
    pub sink_endpoint: Option<String>,
    // `host:port` of a Pub/Sub emulator.
    pub emulator_host: Option<String>,
    pub flow_control: FlowControlSettings,
    pub publish_timeout: Duration,
    pub retry: RetryPolicy,
    pub max_inflight_deliveries: usize,
    pub port: u16,
    pub local_only: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            project_id: None,
            topic_id: None,
            subscription_id: None,
            endpoint_server: None,
            sink_endpoint: None,
            emulator_host: None,
            flow_control: FlowControlSettings::default(),
            publish_timeout: DEFAULT_PUBLISH_TIMEOUT,
            retry: RetryPolicy::default(),
            max_inflight_deliveries: DEFAULT_MAX_INFLIGHT_DELIVERIES,
            port: DEFAULT_PORT,
            local_only: false,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let project_id = get(ENV_PROJECT_ID)
            .or_else(|| get(ENV_PROJECT_ID_ALIAS))
            .map(ProjectId::new);

        let max_outstanding_messages = parse_positive(
            &get,
            "COURIER_MAX_OUTSTANDING_MESSAGES",
            DEFAULT_MAX_OUTSTANDING_MESSAGES,
        )?;
        let max_outstanding_bytes = parse_positive(
            &get,
            "COURIER_MAX_OUTSTANDING_BYTES",
            DEFAULT_MAX_OUTSTANDING_BYTES,
        )?;
        let publish_timeout_secs = parse_positive(
            &get,
            "COURIER_PUBLISH_TIMEOUT_SECS",
            DEFAULT_PUBLISH_TIMEOUT.as_secs(),
        )?;
        let max_attempts =
            parse_positive(&get, "COURIER_MAX_DELIVERY_ATTEMPTS", DEFAULT_MAX_ATTEMPTS)?;
        let retry_delay_ms = parse_positive(
            &get,
            "COURIER_RETRY_DELAY_MS",
            DEFAULT_RETRY_DELAY.as_millis() as u64,
        )?;
        let max_inflight_deliveries = parse_positive(
            &get,
            "COURIER_MAX_INFLIGHT_DELIVERIES",
            DEFAULT_MAX_INFLIGHT_DELIVERIES,
        )?;
        let port = parse_positive(&get, ENV_PORT, DEFAULT_PORT)?;

        Ok(Self {
            project_id,
            topic_id: get(ENV_TOPIC_ID).map(TopicId::new),
            subscription_id: get(ENV_SUBSCRIPTION_ID).map(SubscriptionId::new),
            endpoint_server: get(ENV_ENDPOINT_SERVER),
            sink_endpoint: get(ENV_SINK_ENDPOINT),
            emulator_host: get(ENV_EMULATOR_HOST),
            flow_control: FlowControlSettings {
                max_outstanding_messages,
                max_outstanding_bytes,
            },
            publish_timeout: Duration::from_secs(publish_timeout_secs),
            retry: RetryPolicy::new(max_attempts, Duration::from_millis(retry_delay_ms)),
            max_inflight_deliveries,
            port,
            local_only: get(ENV_LOCAL_ONLY).is_some_and(|value| is_truthy(&value)),
        })
    }

    pub fn require_project(&self) -> Result<&ProjectId, ConfigError> {
        self.project_id
            .as_ref()
            .ok_or(ConfigError::Missing(ENV_PROJECT_ID))
    }

    pub fn require_topic(&self) -> Result<&TopicId, ConfigError> {
        self.topic_id.as_ref().ok_or(ConfigError::Missing(ENV_TOPIC_ID))
    }

    pub fn require_subscription(&self) -> Result<&SubscriptionId, ConfigError> {
        self.subscription_id
            .as_ref()
            .ok_or(ConfigError::Missing(ENV_SUBSCRIPTION_ID))
    }

    pub fn require_endpoint_server(&self) -> Result<&str, ConfigError> {
        self.endpoint_server
            .as_deref()
            .ok_or(ConfigError::Missing(ENV_ENDPOINT_SERVER))
    }

    pub fn require_sink_endpoint(&self) -> Result<&str, ConfigError> {
        self.sink_endpoint
            .as_deref()
            .ok_or(ConfigError::Missing(ENV_SINK_ENDPOINT))
    }

    /// Where `serve` listens. Loopback only when `LOCAL_ONLY` is set.
    pub fn bind_addr(&self) -> SocketAddr {
        let ip = if self.local_only {
            IpAddr::V4(Ipv4Addr::LOCALHOST)
        } else {
            IpAddr::V4(Ipv4Addr::UNSPECIFIED)
        };
        SocketAddr::new(ip, self.port)
    }

    /// Emulator when `PUBSUB_EMULATOR_HOST` is set, production endpoint otherwise.
    pub fn pubsub_broker(&self, client: reqwest::Client) -> Result<PubSubRestBroker, ConfigError> {
        let project = self.require_project()?.clone();
        Ok(match &self.emulator_host {
            Some(host) => PubSubRestBroker::for_emulator(client, host, project),
            None => PubSubRestBroker::new(client, DEFAULT_PUBSUB_ENDPOINT, project),
        })
    }

    pub fn consume_settings(&self) -> ConsumeSettings {
        ConsumeSettings {
            retry: self.retry.clone(),
            max_outstanding_messages: self.max_inflight_deliveries,
            pull_wait: DEFAULT_PULL_WAIT,
        }
    }
}

fn parse_positive<T>(
    get: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: T,
) -> Result<T, ConfigError>
where
    T: std::str::FromStr + PartialOrd + Default,
{
    let Some(raw) = get(key) else {
        return Ok(default);
    };
    let value = raw.trim().parse::<T>().map_err(|_| ConfigError::Invalid {
        key,
        value: raw.clone(),
    })?;
    if value > T::default() {
        Ok(value)
    } else {
        Ok(default)
    }
}

fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes"
    )
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use rstest::rstest;

    use super::*;

    fn config_from(pairs: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let env: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| env.get(key).cloned())
    }

    #[test]
    fn empty_environment_uses_defaults() {
        let config = config_from(&[]).unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.port, 8081);
        assert_eq!(config.publish_timeout, Duration::from_secs(600));
        assert_eq!(config.flow_control.max_outstanding_messages, 100);
        assert_eq!(config.flow_control.max_outstanding_bytes, 10 * 1024 * 1024);
        assert_eq!(config.retry, RetryPolicy::default());
        assert_eq!(config.max_inflight_deliveries, 10);
    }

    #[test]
    fn reads_names_and_endpoints() {
        let config = config_from(&[
            ("GCP_PROJECT_ID", "proj"),
            ("TOPIC_ID", "orders"),
            ("SUBSCRIPTION_ID", "orders-sub"),
            ("ENDPOINT_SERVER", "http://source/messages"),
            ("SINK_ENDPOINT", "http://sink/receive"),
        ])
        .unwrap();

        assert_eq!(config.require_project().unwrap().as_str(), "proj");
        assert_eq!(config.require_topic().unwrap().as_str(), "orders");
        assert_eq!(config.require_subscription().unwrap().as_str(), "orders-sub");
        assert_eq!(
            config.require_endpoint_server().unwrap(),
            "http://source/messages"
        );
        assert_eq!(config.require_sink_endpoint().unwrap(), "http://sink/receive");
    }

    #[test]
    fn project_id_alias_is_accepted() {
        let config = config_from(&[("PROJECT_ID", "alias")]).unwrap();
        assert_eq!(config.require_project().unwrap().as_str(), "alias");
    }

    #[test]
    fn missing_topic_reports_the_key() {
        let config = config_from(&[("TOPIC_ID", "  ")]).unwrap();
        let err = config.require_topic().unwrap_err();
        assert_eq!(err.to_string(), "TOPIC_ID is not set");
    }

    #[test]
    fn malformed_number_is_invalid() {
        let err = config_from(&[("PORT", "eighty")]).unwrap_err();
        assert_eq!(
            err,
            ConfigError::Invalid {
                key: "PORT",
                value: "eighty".into()
            }
        );
    }

    #[test]
    fn zero_falls_back_to_default() {
        let config = config_from(&[("COURIER_MAX_OUTSTANDING_MESSAGES", "0")]).unwrap();
        assert_eq!(config.flow_control.max_outstanding_messages, 100);
    }

    #[test]
    fn retry_knobs_override_policy() {
        let config = config_from(&[
            ("COURIER_MAX_DELIVERY_ATTEMPTS", "5"),
            ("COURIER_RETRY_DELAY_MS", "250"),
            ("COURIER_MAX_INFLIGHT_DELIVERIES", "3"),
        ])
        .unwrap();
        let settings = config.consume_settings();
        assert_eq!(settings.retry.max_attempts, 5);
        assert_eq!(settings.retry.delay, Duration::from_millis(250));
        assert_eq!(settings.max_outstanding_messages, 3);
    }

    #[rstest]
    #[case::unset(None, "0.0.0.0:8081")]
    #[case::truthy(Some("true"), "127.0.0.1:8081")]
    #[case::numeric(Some("1"), "127.0.0.1:8081")]
    #[case::falsy(Some("false"), "0.0.0.0:8081")]
    fn local_only_selects_loopback(#[case] local_only: Option<&str>, #[case] expected: &str) {
        let pairs: Vec<(&str, &str)> = local_only.map(|v| ("LOCAL_ONLY", v)).into_iter().collect();
        let config = config_from(&pairs).unwrap();
        assert_eq!(config.bind_addr().to_string(), expected);
    }

    #[test]
    fn broker_requires_project() {
        let err = config_from(&[])
            .unwrap()
            .pubsub_broker(reqwest::Client::new())
            .unwrap_err();
        assert_eq!(err, ConfigError::Missing("GCP_PROJECT_ID"));
    }
}
