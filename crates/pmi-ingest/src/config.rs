use std::time::Duration;

use clap::{Parser, ValueEnum};

use pmi_connector_lib::polymarket::{ClobAuth, LiveDataConfig, Subscription, LIVE_DATA_WS_URL};
use pmi_middleware::IlpProtocol;

/// Where parsed trades are sent
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SinkKind {
    /// NATS JetStream topic
    Broker,
    /// QuestDB table
    Timeseries,
}

/// pmi-ingest: Polymarket live-data trades → broker topic / time-series table
#[derive(Parser, Debug)]
#[command(name = "pmi-ingest")]
pub struct Config {
    /// Health/metrics listen address
    #[arg(long, env = "HEALTH_ADDR", default_value = "0.0.0.0:8080")]
    pub health_addr: String,

    /// Live-data WebSocket endpoint
    #[arg(long, env = "POLYMARKET_WS_URL", default_value = LIVE_DATA_WS_URL)]
    pub ws_url: String,

    /// Seconds between keepalive pings
    #[arg(long, env = "PING_INTERVAL_SECS", default_value = "5")]
    pub ping_interval_secs: u64,

    /// Comma-separated sinks (broker, timeseries)
    #[arg(long, env = "SINKS", value_enum, value_delimiter = ',', default_value = "broker")]
    pub sinks: Vec<SinkKind>,

    /// Comma-separated NATS server URLs
    #[arg(long, env = "BROKER_URLS", default_value = "nats://localhost:4222")]
    pub broker_urls: String,

    /// Subject prefix trades are published under
    #[arg(long, env = "BROKER_TOPIC", default_value = "polymarket.trades")]
    pub broker_topic: String,

    /// JetStream stream backing the topic
    #[arg(long, env = "BROKER_STREAM", default_value = "POLYMARKET_TRADES")]
    pub broker_stream: String,

    #[arg(long, env = "QUESTDB_HOST", default_value = "localhost")]
    pub questdb_host: String,

    #[arg(long, env = "QUESTDB_ILP_PORT", default_value = "9009")]
    pub questdb_port: u16,

    /// ILP transport: tcp flushes on a timer thread, http flushes in-line
    #[arg(long, env = "QUESTDB_TRANSPORT", default_value = "tcp")]
    pub questdb_transport: IlpProtocol,

    #[arg(long, env = "QUESTDB_TABLE", default_value = "polymarket_trades")]
    pub questdb_table: String,

    /// Time-series flush interval in milliseconds
    #[arg(long, env = "FLUSH_INTERVAL_MS", default_value = "1000")]
    pub flush_interval_ms: u64,

    #[arg(long, env = "POLYMARKET_APIKEY", hide_env_values = true)]
    pub polymarket_api_key: Option<String>,

    #[arg(long, env = "POLYMARKET_SECRET", hide_env_values = true)]
    pub polymarket_secret: Option<String>,

    #[arg(long, env = "POLYMARKET_PASSPHRASE", hide_env_values = true)]
    pub polymarket_passphrase: Option<String>,
}

impl Config {
    pub fn has_sink(&self, kind: SinkKind) -> bool {
        self.sinks.contains(&kind)
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }

    /// CLOB credentials, only when all three parts are set and non-empty
    pub fn clob_auth(&self) -> Option<ClobAuth> {
        let non_empty = |v: &Option<String>| v.as_deref().filter(|s| !s.is_empty()).map(String::from);
        Some(ClobAuth {
            key: non_empty(&self.polymarket_api_key)?,
            secret: non_empty(&self.polymarket_secret)?,
            passphrase: non_empty(&self.polymarket_passphrase)?,
        })
    }

    /// Activity trades, plus the private user channel when credentials exist
    pub fn subscriptions(&self) -> Vec<Subscription> {
        let mut subscriptions = vec![Subscription::activity_trades()];
        if let Some(auth) = self.clob_auth() {
            subscriptions.push(Subscription::clob_user(auth));
        }
        subscriptions
    }

    pub fn live_data_config(&self) -> LiveDataConfig {
        LiveDataConfig::default()
            .with_url(self.ws_url.as_str())
            .with_ping_interval(Duration::from_secs(self.ping_interval_secs))
            .with_subscriptions(self.subscriptions())
    }
}
