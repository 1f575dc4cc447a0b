use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time;

use envconfig::Envconfig;

#[derive(Envconfig, Clone, Debug)]
pub struct Config {
    #[envconfig(from = "WEB_LISTEN_ADDRESS", default = "0.0.0.0:9114")]
    pub address: SocketAddr,

    #[envconfig(from = "WEB_TELEMETRY_PATH", default = "/metrics")]
    pub telemetry_path: String,

    #[envconfig(from = "SHUTDOWN_TIMEOUT_MS", default = "5000")]
    pub shutdown_timeout: EnvMsDuration,

    #[envconfig(nested = true)]
    pub es: ElasticsearchConfig,

    #[envconfig(nested = true)]
    pub clusterinfo: ClusterInfoConfig,

    #[envconfig(nested = true)]
    pub tls: TlsConfig,

    #[envconfig(nested = true)]
    pub log: LogConfig,
}

#[derive(Envconfig, Clone, Debug)]
pub struct ElasticsearchConfig {
    /// HTTP API address of an Elasticsearch node, used when a scrape names no target.
    #[envconfig(from = "ES_URI", default = "http://localhost:9200")]
    pub uri: String,

    #[envconfig(from = "ES_TIMEOUT_MS", default = "5000")]
    pub timeout: EnvMsDuration,

    /// Export stats for all nodes in the cluster, overrides `node`.
    #[envconfig(from = "ES_ALL", default = "false")]
    pub all_nodes: bool,

    #[envconfig(from = "ES_NODE", default = "_local")]
    pub node: String,

    #[envconfig(from = "ES_INDICES", default = "false")]
    pub indices: bool,

    #[envconfig(from = "ES_INDICES_SETTINGS", default = "false")]
    pub indices_settings: bool,

    #[envconfig(from = "ES_CLUSTER_SETTINGS", default = "false")]
    pub cluster_settings: bool,

    /// Export shard level stats, implies `indices`.
    #[envconfig(from = "ES_SHARDS", default = "false")]
    pub shards: bool,

    #[envconfig(from = "ES_SNAPSHOTS", default = "false")]
    pub snapshots: bool,
}

impl ElasticsearchConfig {
    pub fn indices_enabled(&self) -> bool {
        self.indices || self.shards
    }
}

#[derive(Envconfig, Clone, Debug)]
pub struct ClusterInfoConfig {
    /// Refresh interval of the cluster label, zero disables periodic refresh.
    #[envconfig(from = "ES_CLUSTERINFO_INTERVAL_MS", default = "300000")]
    pub interval: EnvMsDuration,

    #[envconfig(from = "ES_CLUSTERINFO_BOOTSTRAP_TIMEOUT_MS", default = "10000")]
    pub bootstrap_timeout: EnvMsDuration,

    #[envconfig(from = "ES_CLUSTERINFO_IDLE_TIMEOUT_MS", default = "900000")]
    pub idle_timeout: EnvMsDuration,

    #[envconfig(from = "ES_CLUSTERINFO_MAX_RETRIEVERS", default = "64")]
    pub max_retrievers: usize,
}

#[derive(Envconfig, Clone, Debug, Default)]
pub struct TlsConfig {
    /// PEM file with trusted certificate authorities.
    #[envconfig(from = "ES_CA")]
    pub ca: Option<PathBuf>,

    #[envconfig(from = "ES_CLIENT_CERT")]
    pub client_cert: Option<PathBuf>,

    #[envconfig(from = "ES_CLIENT_PRIVATE_KEY")]
    pub client_private_key: Option<PathBuf>,

    #[envconfig(from = "ES_SSL_SKIP_VERIFY", default = "false")]
    pub insecure_skip_verify: bool,
}

#[derive(Envconfig, Clone, Debug)]
pub struct LogConfig {
    #[envconfig(from = "LOG_LEVEL", default = "info")]
    pub level: tracing::Level,

    #[envconfig(from = "LOG_FMT", default = "logfmt")]
    pub format: LogFormat,

    #[envconfig(from = "LOG_OUTPUT", default = "stdout")]
    pub output: LogOutput,
}

#[derive(Debug, Clone, Copy)]
pub struct EnvMsDuration(pub time::Duration);

#[derive(Debug, PartialEq, Eq)]
pub struct ParseEnvMsDurationError;

impl FromStr for EnvMsDuration {
    type Err = ParseEnvMsDurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let ms = s.parse::<u64>().map_err(|_| ParseEnvMsDurationError)?;

        Ok(EnvMsDuration(time::Duration::from_millis(ms)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Logfmt,
    Json,
}

#[derive(Debug, PartialEq, Eq)]
pub struct ParseLogFormatError(String);

impl std::fmt::Display for ParseLogFormatError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "unknown log format {:?}, expected logfmt or json", self.0)
    }
}

impl FromStr for LogFormat {
    type Err = ParseLogFormatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "logfmt" => Ok(LogFormat::Logfmt),
            "json" => Ok(LogFormat::Json),
            _ => Err(ParseLogFormatError(s.to_owned())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogOutput {
    Stdout,
    Stderr,
}

#[derive(Debug, PartialEq, Eq)]
pub struct ParseLogOutputError(String);

impl std::fmt::Display for ParseLogOutputError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "unknown log output {:?}, expected stdout or stderr", self.0)
    }
}

impl FromStr for LogOutput {
    type Err = ParseLogOutputError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "stdout" => Ok(LogOutput::Stdout),
            "stderr" => Ok(LogOutput::Stderr),
            _ => Err(ParseLogOutputError(s.to_owned())),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn defaults_from_empty_env() {
        let config = Config::init_from_hashmap(&HashMap::new()).unwrap();

        assert_eq!(config.address.port(), 9114);
        assert_eq!(config.telemetry_path, "/metrics");
        assert_eq!(config.shutdown_timeout.0, time::Duration::from_secs(5));
        assert_eq!(config.es.node, "_local");
        assert!(!config.es.indices_enabled());
        assert_eq!(
            config.clusterinfo.interval.0,
            time::Duration::from_secs(300)
        );
        assert!(config.tls.ca.is_none());
        assert_eq!(config.log.format, LogFormat::Logfmt);
        assert_eq!(config.log.output, LogOutput::Stdout);
        assert_eq!(config.es.uri, "http://localhost:9200");
    }

    #[test]
    fn shards_implies_indices() {
        let env = HashMap::from([("ES_SHARDS".to_owned(), "true".to_owned())]);
        let config = Config::init_from_hashmap(&env).unwrap();

        assert!(!config.es.indices);
        assert!(config.es.indices_enabled());
    }

    #[test]
    fn rejects_unknown_log_format() {
        let env = HashMap::from([("LOG_FMT".to_owned(), "xml".to_owned())]);
        assert!(Config::init_from_hashmap(&env).is_err());
    }

    #[test]
    fn parses_durations_in_milliseconds() {
        assert_eq!(
            "1500".parse::<EnvMsDuration>().unwrap().0,
            time::Duration::from_millis(1500)
        );
        assert_eq!(
            "5s".parse::<EnvMsDuration>().unwrap_err(),
            ParseEnvMsDurationError
        );
    }
}
