//! Shared helpers for integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use livemux::config::{PeerConfig, RefreshSettings};
use livemux::peer::{PeerSetManager, PeerSource, StaticSource};
use livemux::table::TableName;
use serde_json::json;

/// Refresh settings fast enough for tests.
pub fn fast_refresh() -> RefreshSettings {
    RefreshSettings {
        refresh_interval: Duration::from_millis(20),
        max_backoff: Duration::from_millis(50),
        ..Default::default()
    }
}

/// A static backend serving the given hosts; every host is up except
/// those named `down*`.
pub fn site(hosts: &[&str]) -> Arc<StaticSource> {
    let rows = hosts
        .iter()
        .map(|name| {
            let state = i64::from(name.starts_with("down"));
            json!({
                "name": name,
                "state": state,
                "latency": 0.25,
                "groups": ["all"],
            })
        })
        .collect();
    Arc::new(
        StaticSource::new()
            .with_rows(TableName::Hosts, rows)
            .with_rows(
                TableName::Status,
                vec![json!({"program_version": "2.4.0", "nagios_pid": 42})],
            ),
    )
}

/// Configs for the given sources in order, all pointing at `static`.
pub fn configs(sources: &[(&str, Arc<StaticSource>)]) -> Vec<PeerConfig> {
    sources
        .iter()
        .map(|(key, _)| PeerConfig::new(*key, "static"))
        .collect()
}

/// Start a peer set over static sources and wait for the first refresh of
/// every peer.
pub async fn start_peers(sources: &[(&str, Arc<StaticSource>)]) -> Arc<PeerSetManager> {
    let lookup: HashMap<String, Arc<StaticSource>> = sources
        .iter()
        .map(|(key, source)| (key.to_string(), source.clone()))
        .collect();
    let manager = Arc::new(PeerSetManager::new(Arc::new(
        move |peer: &PeerConfig, _: &RefreshSettings| -> Arc<dyn PeerSource> {
            match lookup.get(&peer.key) {
                Some(source) => source.clone(),
                None => Arc::new(StaticSource::new()),
            }
        },
    )));
    manager.reload(&configs(sources), fast_refresh());
    for peer in manager.peers().iter() {
        let mut rx = peer.subscribe();
        tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|h| h.attempts > 0))
            .await
            .expect("peer did not refresh in time")
            .expect("peer task stopped");
    }
    manager
}
