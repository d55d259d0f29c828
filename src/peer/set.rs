//! Configured peer set with atomic reload.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use arc_swap::ArcSwap;

use crate::config::{PeerConfig, RefreshSettings};
use crate::peer::{LivestatusSource, PeerConnection, PeerSource, PeerState};

/// Builds the backend source for a peer.
pub type SourceFactory =
    Arc<dyn Fn(&PeerConfig, &RefreshSettings) -> Arc<dyn PeerSource> + Send + Sync>;

/// Factory connecting every peer to a live backend.
pub fn livestatus_factory() -> SourceFactory {
    Arc::new(
        |peer: &PeerConfig, settings: &RefreshSettings| -> Arc<dyn PeerSource> {
            Arc::new(LivestatusSource::new(peer.addr.clone(), settings.connect_timeout))
        },
    )
}

/// Peer keys affected by a reload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReloadSummary {
    pub added: Vec<String>,
    pub removed: Vec<String>,
    /// Keys whose address, name or connect timeout changed; the old
    /// connection was stopped.
    pub replaced: Vec<String>,
    pub kept: Vec<String>,
    /// Kept keys that picked up new refresh timing in place.
    pub updated: Vec<String>,
}

impl ReloadSummary {
    /// Whether the reload left every connection in place.
    pub fn is_unchanged(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.replaced.is_empty()
    }
}

/// Ordered set of peer connections keyed by `peer_key`.
///
/// The list is swapped atomically; a reader holding the result of
/// [`PeerSetManager::peers`] keeps a consistent view for as long as it needs.
pub struct PeerSetManager {
    peers: ArcSwap<Vec<Arc<PeerConnection>>>,
    factory: SourceFactory,
    reload_lock: Mutex<()>,
}

impl std::fmt::Debug for PeerSetManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerSetManager")
            .field("peer_count", &self.peers.load().len())
            .finish_non_exhaustive()
    }
}

impl PeerSetManager {
    pub fn new(factory: SourceFactory) -> Self {
        Self {
            peers: ArcSwap::from_pointee(Vec::new()),
            factory,
            reload_lock: Mutex::new(()),
        }
    }

    /// Consistent snapshot of the current peer list in configured order.
    pub fn peers(&self) -> Arc<Vec<Arc<PeerConnection>>> {
        self.peers.load_full()
    }

    pub fn get(&self, key: &str) -> Option<Arc<PeerConnection>> {
        self.peers.load().iter().find(|p| p.key() == key).cloned()
    }

    /// Whether at least one peer can serve data.
    pub fn is_ready(&self) -> bool {
        self.peers.load().iter().any(|p| p.state() == PeerState::Up)
    }

    /// Replace the peer set with `configs`.
    ///
    /// Peers with an identical configuration keep their connection and cache
    /// and take over the new refresh timing. A changed `connect_timeout` is
    /// baked into the backend source, so such peers are replaced like peers
    /// whose address changed. New or replaced peers start `Pending`; removed
    /// or replaced connections are stopped in the background. Must be called
    /// within a tokio runtime.
    pub fn reload(&self, configs: &[PeerConfig], settings: RefreshSettings) -> ReloadSummary {
        let _guard = self
            .reload_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let old = self.peers.load_full();
        let mut previous: HashMap<&str, &Arc<PeerConnection>> =
            old.iter().map(|p| (p.key(), p)).collect();

        let mut summary = ReloadSummary::default();
        let mut retired = Vec::new();
        let mut next = Vec::with_capacity(configs.len());

        for config in configs {
            match previous.remove(config.key.as_str()) {
                Some(peer)
                    if peer.config() == config
                        && peer.settings().connect_timeout == settings.connect_timeout =>
                {
                    if peer.update_settings(settings) {
                        summary.updated.push(config.key.clone());
                    }
                    summary.kept.push(config.key.clone());
                    next.push(Arc::clone(peer));
                }
                existing => {
                    if let Some(peer) = existing {
                        summary.replaced.push(config.key.clone());
                        retired.push(Arc::clone(peer));
                    } else {
                        summary.added.push(config.key.clone());
                    }
                    let source = (self.factory)(config, &settings);
                    let peer = Arc::new(PeerConnection::new(config.clone(), settings, source));
                    peer.start();
                    next.push(peer);
                }
            }
        }
        for peer in old.iter().filter(|p| previous.contains_key(p.key())) {
            summary.removed.push(peer.key().to_string());
            retired.push(Arc::clone(peer));
        }

        self.peers.store(Arc::new(next));

        for peer in retired {
            tokio::spawn(async move { peer.shutdown().await });
        }

        tracing::info!(
            added = ?summary.added,
            removed = ?summary.removed,
            replaced = ?summary.replaced,
            updated = ?summary.updated,
            kept = summary.kept.len(),
            "Peer set reloaded"
        );
        summary
    }

    pub fn pause_all(&self) {
        for peer in self.peers.load().iter() {
            peer.pause();
        }
    }

    pub fn resume_all(&self) {
        for peer in self.peers.load().iter() {
            peer.resume();
        }
    }

    /// Stop every peer and wait for their refresh tasks.
    pub async fn shutdown(&self) {
        let peers = self.peers.swap(Arc::new(Vec::new()));
        for peer in peers.iter() {
            peer.stop();
        }
        for peer in peers.iter() {
            peer.shutdown().await;
        }
        tracing::info!(peer_count = peers.len(), "All peers stopped");
    }
}
