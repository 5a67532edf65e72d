//! Operator configuration loaded from environment variables

use std::time::Duration;

use envconfig::Envconfig;

#[derive(Envconfig, Clone, Debug)]
pub struct OperatorConfig {
    /// Namespace whose Memcached resources and pods are watched
    #[envconfig(from = "WATCH_NAMESPACE", default = "default")]
    pub watch_namespace: String,

    #[envconfig(from = "METRICS_PORT", default = "8080")]
    pub metrics_port: u16,

    /// Full resync period; 0 disables resync
    #[envconfig(from = "RESYNC_INTERVAL_SECS", default = "5")]
    pub resync_interval_secs: u64,

    /// Delay before a failed notification is handed back to the reconciler
    #[envconfig(from = "RETRY_DELAY_SECS", default = "5")]
    pub retry_delay_secs: u64,

    #[envconfig(from = "MAX_REDELIVERIES", default = "5")]
    pub max_redeliveries: u32,

    // "json" (default) or "text"
    #[envconfig(from = "LOG_FORMAT")]
    pub log_format: Option<String>,
}

impl OperatorConfig {
    pub fn resync_interval(&self) -> Option<Duration> {
        match self.resync_interval_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }

    pub fn json_logs(&self) -> bool {
        !matches!(self.log_format.as_deref(), Some("text") | Some("plain"))
    }
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            watch_namespace: "default".to_string(),
            metrics_port: 8080,
            resync_interval_secs: 5,
            retry_delay_secs: 5,
            max_redeliveries: 5,
            log_format: None,
        }
    }
}
