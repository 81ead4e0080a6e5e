use std::collections::BTreeMap;

use tracing::{error, info, instrument, warn};

use crate::config::ForwardConfig;
use crate::error::ForwardError;
use crate::forwarder::{ForwarderHandle, PortForwarder};

/// Runs one forwarder per configured port.
pub struct ForwardManager {
    config: ForwardConfig,
    forwarders: BTreeMap<u16, ForwarderHandle>,
    configured: bool,
}

impl ForwardManager {
    pub fn new(config: ForwardConfig) -> Self {
        Self {
            config,
            forwarders: BTreeMap::new(),
            configured: false,
        }
    }

    pub fn config(&self) -> &ForwardConfig {
        &self.config
    }

    /// Start forwarding each of `ports`.
    ///
    /// Only the first call has any effect. Ports that fail to bind are
    /// logged and skipped. Returns the number of forwarders running.
    #[instrument(name = "configure_forwarding", skip(self, ports), fields(port_count = ports.len()))]
    pub async fn configure_forwarding(&mut self, ports: &[u16]) -> usize {
        if self.configured {
            return self.forwarders.len();
        }
        self.configured = true;

        for &port in ports {
            if port != 0 && self.forwarders.contains_key(&port) {
                warn!(port, "port listed twice, forwarding it once");
                continue;
            }

            match PortForwarder::start(port, &self.config).await {
                Ok(handle) => {
                    self.forwarders.insert(handle.port(), handle);
                }
                Err(ForwardError::PortInUse(port)) => {
                    error!(port, "Local port {} is already in use, not forwarding it", port);
                }
                Err(e) => {
                    error!(port, "Unable to start port forwarding: {}", e);
                }
            }
        }

        self.forwarders.len()
    }

    /// Ports currently forwarded, ascending.
    pub fn active_ports(&self) -> Vec<u16> {
        self.forwarders.keys().copied().collect()
    }

    pub fn forwarder(&self, port: u16) -> Option<&ForwarderHandle> {
        self.forwarders.get(&port)
    }

    /// Sessions open across all forwarders.
    pub fn active_sessions(&self) -> usize {
        self.forwarders.values().map(ForwarderHandle::active_pairs).sum()
    }

    #[instrument(name = "manager_shutdown", skip(self))]
    pub async fn shutdown(&mut self) {
        info!("Shutting down all forwarders");

        // Signal every forwarder first so they tear down concurrently.
        for handle in self.forwarders.values() {
            handle.request_shutdown();
        }

        let forwarders = std::mem::take(&mut self.forwarders);
        for (_, handle) in forwarders {
            handle.shutdown().await;
        }
    }
}
