use std::net::SocketAddr;
use std::time::Duration;

/// Runtime settings for the service, read from the environment.
///
/// Every knob has a default that matches the documented wire behaviour:
/// heartbeats every 30s, connections reaped after 90s of silence, a 100-slot
/// outbound queue per connection and a 200-slot event channel per
/// subscription.
#[derive(Clone, Debug)]
pub struct Config {
    pub bind_addr: SocketAddr,
    pub heartbeat_interval: Duration,
    pub connection_timeout: Duration,
    pub auth_timeout: Duration,
    pub write_deadline: Duration,
    pub outbound_queue_capacity: usize,
    pub subscription_channel_capacity: usize,
    pub replay_window: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8080".parse().expect("static bind address"),
            heartbeat_interval: Duration::from_secs(30),
            connection_timeout: Duration::from_secs(90),
            auth_timeout: Duration::from_secs(10),
            write_deadline: Duration::from_secs(10),
            outbound_queue_capacity: 100,
            subscription_channel_capacity: 200,
            replay_window: 1024,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            bind_addr: env_parsed("EMBERSTORE_BIND_ADDR").unwrap_or(defaults.bind_addr),
            heartbeat_interval: env_secs("EMBERSTORE_HEARTBEAT_SECS")
                .unwrap_or(defaults.heartbeat_interval),
            connection_timeout: env_secs("EMBERSTORE_CONNECTION_TIMEOUT_SECS")
                .unwrap_or(defaults.connection_timeout),
            auth_timeout: env_secs("EMBERSTORE_AUTH_TIMEOUT_SECS").unwrap_or(defaults.auth_timeout),
            write_deadline: env_secs("EMBERSTORE_WRITE_DEADLINE_SECS")
                .unwrap_or(defaults.write_deadline),
            outbound_queue_capacity: env_parsed("EMBERSTORE_OUTBOUND_QUEUE")
                .unwrap_or(defaults.outbound_queue_capacity),
            subscription_channel_capacity: env_parsed("EMBERSTORE_SUBSCRIPTION_CHANNEL")
                .unwrap_or(defaults.subscription_channel_capacity),
            replay_window: env_parsed("EMBERSTORE_REPLAY_WINDOW").unwrap_or(defaults.replay_window),
        }
    }
}

fn env_parsed<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|value| value.parse().ok())
}

fn env_secs(name: &str) -> Option<Duration> {
    env_parsed::<u64>(name).map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_wire_contract() {
        let config = Config::default();
        assert_eq!(config.heartbeat_interval, Duration::from_secs(30));
        assert_eq!(config.connection_timeout, Duration::from_secs(90));
        assert_eq!(config.outbound_queue_capacity, 100);
        assert_eq!(config.subscription_channel_capacity, 200);
    }
}
