use super::*;

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct Config {
    /// The endpoint that names this node, used as the source of generated
    /// administrative bundles and as the custodian when custody is accepted.
    pub local_eid: eid::EndpointId,

    /// Take custody of received bundles that request it.
    pub accept_custody: bool,

    /// Delete bundles from the pending registry as soon as nothing else needs them,
    /// rather than waiting for them to expire.
    pub early_deletion: bool,

    /// Treat a bundle sent on a reliable link with no acknowledged bytes as a failed transmission.
    pub retry_reliable_unacked: bool,

    /// Generate status reports when bundles request them.
    pub status_reports: bool,

    /// Default custody retransmission timer, used when a router does not supply one.
    pub custody_timer: CustodyTimerSpec,

    /// Events taking longer than this to process are logged as warnings.
    pub slow_event_threshold_ms: u64,

    pub link_retry: LinkRetryConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            local_eid: eid::EndpointId::from("dtn://localhost.dtn"),
            accept_custody: true,
            early_deletion: true,
            retry_reliable_unacked: true,
            status_reports: true,
            custody_timer: CustodyTimerSpec::default(),
            slow_event_threshold_ms: 2000,
            link_retry: LinkRetryConfig::default(),
        }
    }
}

/// Reopen backoff for links that go unavailable on their own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct LinkRetryConfig {
    /// Seconds before the first reopen attempt.
    pub min_interval: u64,
    /// The delay doubles after each failed attempt, up to this many seconds.
    pub max_interval: u64,
}

impl Default for LinkRetryConfig {
    fn default() -> Self {
        Self {
            min_interval: 5,
            max_interval: 600,
        }
    }
}
