use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use uuid::Uuid;

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct BrokerConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    /// Prefix of the generated client id, followed by 8 hex digits
    pub client_id_prefix: String,
    pub keep_alive_secs: u64,
    /// Pause before the event loop retries after the connection dropped
    pub reconnect_delay_ms: u64,
    /// CA certificate (PEM); enables TLS when set
    pub ca_file: Option<PathBuf>,
    /// Topic namespace, e.g. `wheelchair` for `wheelchair/command/motor`
    pub topic_prefix: String,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 1883,
            username: String::new(),
            password: String::new(),
            client_id_prefix: "teleop".to_string(),
            keep_alive_secs: 5,
            reconnect_delay_ms: 2000,
            ca_file: None,
            topic_prefix: "wheelchair".to_string(),
        }
    }
}

impl BrokerConfig {
    pub fn topics(&self) -> Topics {
        Topics::with_prefix(&self.topic_prefix)
    }

    pub fn has_credentials(&self) -> bool {
        !self.username.is_empty()
    }

    /// A fresh client id; two operator stations never share one.
    pub fn client_id(&self) -> String {
        let uuid = Uuid::new_v4().simple().to_string();
        format!("{}-{}", self.client_id_prefix, &uuid[..8])
    }
}

impl fmt::Display for BrokerConfig {
    /// Formats as "user@host:port"; the password is never shown.
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.has_credentials() {
            write!(f, "{}@{}:{}", self.username, self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// Logical channels shared with the platform
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Topics {
    /// Inbound wheel speed reports
    pub state: String,
    /// Outbound `{left, right}` commands
    pub motor: String,
    /// Outbound `STOP` / `START`
    pub emergency: String,
}

impl Topics {
    pub fn with_prefix(prefix: &str) -> Self {
        let prefix = prefix.trim_end_matches('/');
        Self {
            state: format!("{}/state", prefix),
            motor: format!("{}/command/motor", prefix),
            emergency: format!("{}/command/emergency", prefix),
        }
    }
}

impl Default for Topics {
    fn default() -> Self {
        BrokerConfig::default().topics()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topics_follow_the_prefix() {
        let topics = Topics::with_prefix("lab/chair-2/");
        assert_eq!(topics.state, "lab/chair-2/state");
        assert_eq!(topics.motor, "lab/chair-2/command/motor");
        assert_eq!(topics.emergency, "lab/chair-2/command/emergency");
    }

    #[test]
    fn client_id_has_prefix_and_hex_suffix() {
        let id = BrokerConfig::default().client_id();
        let (prefix, suffix) = id.split_once('-').unwrap();
        assert_eq!(prefix, "teleop");
        assert_eq!(suffix.len(), 8);
        assert!(suffix.chars().all(|c| c.is_ascii_hexdigit()));

        let config = BrokerConfig::default();
        assert_ne!(config.client_id(), config.client_id());
    }

    #[test]
    fn display_hides_password() {
        let config = BrokerConfig {
            username: "operator".to_string(),
            password: "secret".to_string(),
            ..BrokerConfig::default()
        };
        assert_eq!(config.to_string(), "operator@localhost:1883");
    }
}
