use serde_json::json;
use std::sync::RwLock;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayState {
    pub connected: bool,
    pub remote: String,
}

/// 中继隧道状态，只在隧道建立和断开时写入
#[derive(Debug, Default)]
pub struct RelayStatus {
    remote: RwLock<Option<String>>,
}

impl RelayStatus {
    pub fn attach(&self, remote: &str) {
        *self.remote.write().unwrap_or_else(|e| e.into_inner()) = Some(remote.to_string());
    }

    pub fn detach(&self) {
        *self.remote.write().unwrap_or_else(|e| e.into_inner()) = None;
    }

    pub fn state(&self) -> RelayState {
        let remote = self
            .remote
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
            .unwrap_or_default();
        RelayState {
            connected: !remote.is_empty(),
            remote,
        }
    }
}

#[derive(Debug)]
pub struct ServiceInfo {
    pub version: String,
    pub local_addr: String,
    pub relay: RelayStatus,
}

impl ServiceInfo {
    pub fn new(version: &str, local_addr: &str) -> Self {
        ServiceInfo {
            version: version.to_string(),
            local_addr: local_addr.to_string(),
            relay: RelayStatus::default(),
        }
    }

    pub fn to_json(&self) -> String {
        let relay = self.relay.state();
        json!({
            "version": self.version,
            "local_addr": self.local_addr,
            "relay_addr": relay.remote,
        })
        .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relay_status_follows_attach_and_detach() {
        let info = ServiceInfo::new("1.0.0", "127.0.0.1:4563");
        assert!(!info.relay.state().connected);

        info.relay.attach("10.0.0.7:443");
        let state = info.relay.state();
        assert!(state.connected);
        assert_eq!(state.remote, "10.0.0.7:443");
        assert!(info.to_json().contains("10.0.0.7:443"));

        info.relay.detach();
        assert_eq!(
            info.relay.state(),
            RelayState {
                connected: false,
                remote: String::new()
            }
        );
    }
}
