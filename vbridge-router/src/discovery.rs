//! Bounded-time enumeration of announcing network endpoints
//!
//! Every discovery pass creates its own finder, holds the runtime only for the
//! duration of the call and destroys both before returning.

use crate::error::{BridgeError, Result};
use crate::identity::EndpointIdentity;
use std::sync::Arc;
use std::time::{Duration, Instant};
use vbridge_native::SharedNetwork;

pub struct Discovery {
    network: Arc<SharedNetwork>,
    show_local_sources: bool,
}

impl Discovery {
    pub fn new(network: Arc<SharedNetwork>, show_local_sources: bool) -> Self {
        Self {
            network,
            show_local_sources,
        }
    }

    /// Wait up to `timeout` for announcements and return what is known
    ///
    /// Never fails: a timeout or native failure yields an empty list.
    pub fn list_sources(&self, timeout: Duration) -> Vec<EndpointIdentity> {
        match self.snapshot(timeout) {
            Ok(sources) => sources,
            Err(BridgeError::DiscoveryTimeout(waited)) => {
                log::debug!("no network sources announced within {:?}", waited);
                Vec::new()
            }
            Err(e) => {
                log::warn!("discovery failed: {e}");
                Vec::new()
            }
        }
    }

    fn snapshot(&self, timeout: Duration) -> Result<Vec<EndpointIdentity>> {
        let lease = self
            .network
            .acquire()
            .map_err(|e| BridgeError::initialization("network runtime", e))?;
        let mut finder = lease
            .create_finder(self.show_local_sources)
            .map_err(|e| BridgeError::initialization("discovery", e))?;

        finder.wait_for_sources(timeout);
        let sources: Vec<EndpointIdentity> = finder
            .current_sources()
            .into_iter()
            .map(EndpointIdentity::from)
            .collect();

        if sources.is_empty() {
            return Err(BridgeError::DiscoveryTimeout(timeout));
        }
        Ok(sources)
    }

    /// Poll announcements until `name` appears or `timeout` passes
    pub fn resolve(&self, name: &str, timeout: Duration) -> Result<EndpointIdentity> {
        let lease = self
            .network
            .acquire()
            .map_err(|e| BridgeError::initialization("network runtime", e))?;
        let mut finder = lease
            .create_finder(self.show_local_sources)
            .map_err(|e| BridgeError::initialization("discovery", e))?;

        let deadline = Instant::now() + timeout;
        loop {
            if let Some(source) = finder.current_sources().into_iter().find(|s| s.name == name) {
                log::info!("resolved {:?} to {}", name, source);
                return Ok(source.into());
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            finder.wait_for_sources(remaining);
        }

        Err(BridgeError::Connection {
            endpoint: name.to_string(),
            reason: format!("not announced within {:?}", timeout),
        })
    }
}
