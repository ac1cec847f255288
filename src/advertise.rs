//! Abstract service advertisement/discovery (§6).
//!
//! The real Bonjour/mDNS bindings are an external collaborator (§1); this
//! module only defines the capability surface the control plane needs and an
//! in-memory test double used by the crate's own tests and examples.

use std::sync::Arc;

use async_trait::async_trait;

use crate::model::DiscoveredHost;

/// Outcome callbacks for a single [`ServiceAdvertiser::advertise`] call.
pub trait AdvertiseDelegate: Send + Sync {
    /// The service was published under `name` (which may differ from the
    /// requested name if the platform had to disambiguate it).
    fn on_published(&self, name: &str);
    /// Publication failed; the caller owns retry policy (§4.3.1 backoff).
    fn on_did_not_publish(&self, error: &str);
}

/// A handle to a live advertisement. Dropping it does not stop the
/// advertisement — callers must call [`stop`](Self::stop) explicitly, mirroring
/// platform service-publication APIs where teardown is an explicit action.
#[async_trait]
pub trait AdvertiseHandle: Send + Sync {
    /// Stops advertising. Idempotent.
    async fn stop(&self);
}

/// Advertises a local service on the link (§6).
#[async_trait]
pub trait ServiceAdvertiser: Send + Sync {
    /// Begins advertising `service_name` under `service_type` on `port`.
    /// `peer_to_peer` requests discovery-only peer-to-peer variants (e.g.
    /// direct Wi-Fi Aware) in addition to infrastructure Wi-Fi (§6).
    async fn advertise(
        &self,
        service_type: &str,
        service_name: &str,
        port: u16,
        peer_to_peer: bool,
        delegate: Arc<dyn AdvertiseDelegate>,
    ) -> Box<dyn AdvertiseHandle>;
}

/// Browses for hosts advertising a given service type (§6).
#[async_trait]
pub trait ServiceBrowser: Send + Sync {
    /// Returns the hosts currently visible for `service_type`.
    async fn browse(&self, service_type: &str) -> Vec<DiscoveredHost>;

    /// Resolves `name` to a list of candidate IP addresses.
    async fn resolve(&self, name: &str) -> Vec<std::net::IpAddr>;
}

/// An in-memory advertiser/browser pair for tests and the demo binaries: a
/// `browse` call simply returns whatever has been `advertise`d.
pub mod memory {
    use super::{AdvertiseDelegate, AdvertiseHandle, ServiceAdvertiser, ServiceBrowser};
    use crate::model::{DiscoveredHost, Endpoint};
    use async_trait::async_trait;
    use std::net::{IpAddr, Ipv4Addr};
    use std::sync::{Arc, Mutex};

    /// Shared directory backing [`MemoryAdvertiser`]/[`MemoryBrowser`] pairs
    /// constructed with [`MemoryDirectory::pair`].
    #[derive(Default, Clone)]
    pub struct MemoryDirectory {
        inner: Arc<Mutex<Vec<DiscoveredHost>>>,
    }

    impl MemoryDirectory {
        /// Creates a fresh, empty directory.
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        /// Builds an advertiser/browser pair sharing this directory.
        #[must_use]
        pub fn pair(&self) -> (MemoryAdvertiser, MemoryBrowser) {
            (MemoryAdvertiser { dir: self.clone() }, MemoryBrowser { dir: self.clone() })
        }
    }

    /// In-memory [`ServiceAdvertiser`] that registers into a
    /// [`MemoryDirectory`].
    pub struct MemoryAdvertiser {
        dir: MemoryDirectory,
    }

    struct MemoryHandle {
        dir: MemoryDirectory,
        name: String,
    }

    #[async_trait]
    impl AdvertiseHandle for MemoryHandle {
        async fn stop(&self) {
            self.dir.inner.lock().unwrap().retain(|h| h.name != self.name);
        }
    }

    #[async_trait]
    impl ServiceAdvertiser for MemoryAdvertiser {
        async fn advertise(
            &self,
            _service_type: &str,
            service_name: &str,
            port: u16,
            _peer_to_peer: bool,
            delegate: Arc<dyn AdvertiseDelegate>,
        ) -> Box<dyn AdvertiseHandle> {
            let endpoint = Endpoint::V4(Ipv4Addr::LOCALHOST, port);
            self.dir.inner.lock().unwrap().push(DiscoveredHost {
                name: service_name.to_string(),
                service_endpoint: endpoint,
                infra_endpoint: None,
            });
            delegate.on_published(service_name);
            Box::new(MemoryHandle { dir: self.dir.clone(), name: service_name.to_string() })
        }
    }

    /// In-memory [`ServiceBrowser`] that reads from a [`MemoryDirectory`].
    pub struct MemoryBrowser {
        dir: MemoryDirectory,
    }

    #[async_trait]
    impl ServiceBrowser for MemoryBrowser {
        async fn browse(&self, _service_type: &str) -> Vec<DiscoveredHost> {
            self.dir.inner.lock().unwrap().clone()
        }

        async fn resolve(&self, name: &str) -> Vec<IpAddr> {
            self.dir
                .inner
                .lock()
                .unwrap()
                .iter()
                .filter(|h| h.name == name)
                .map(|h| h.service_endpoint.to_socket_addr().ip())
                .collect()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::memory::MemoryDirectory;
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct FlagDelegate(Arc<AtomicBool>);
    impl AdvertiseDelegate for FlagDelegate {
        fn on_published(&self, _name: &str) {
            self.0.store(true, Ordering::SeqCst);
        }
        fn on_did_not_publish(&self, _error: &str) {}
    }

    #[tokio::test]
    async fn advertised_service_is_browsable() {
        let dir = MemoryDirectory::new();
        let (adv, browser) = dir.pair();
        let published = Arc::new(AtomicBool::new(false));
        let delegate = Arc::new(FlagDelegate(published.clone()));

        let handle = adv.advertise("_beamctl._tcp", "Study", 52345, false, delegate).await;
        assert!(published.load(Ordering::SeqCst));

        let hosts = browser.browse("_beamctl._tcp").await;
        assert_eq!(hosts.len(), 1);
        assert_eq!(hosts[0].name, "Study");

        handle.stop().await;
        assert!(browser.browse("_beamctl._tcp").await.is_empty());
    }
}
