//! `DiscoveredEndpointTable` (§4.2): a concurrent multimap from
//! `endpoint_id` to one `DiscoveredEndpoint` per medium, guarded by one
//! mutex because medium callbacks deliver discovery events on arbitrary
//! threads (§5 "Shared resources").

use pcp_core::{DiscoveredEndpoint, EndpointId, Medium};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;

/// Emitted to the `PcpHandler`'s serial executor so client notifications
/// stay serialized with everything else (§5 "Ordering guarantees").
#[derive(Debug, Clone)]
pub enum TableEvent {
    Found(DiscoveredEndpoint),
    Lost { endpoint_id: EndpointId },
}

struct Inner {
    entries: HashMap<(EndpointId, Medium), DiscoveredEndpoint>,
    alarms: HashMap<(EndpointId, Medium), JoinHandle<()>>,
}

pub struct DiscoveredEndpointTable {
    inner: Mutex<Inner>,
    events: UnboundedSender<TableEvent>,
}

impl DiscoveredEndpointTable {
    pub fn new(events: UnboundedSender<TableEvent>) -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                alarms: HashMap::new(),
            }),
            events,
        })
    }

    /// A medium's "found" callback. See §4.2 for the full notification
    /// rule: a changed `endpoint_info` for an already-known id evicts
    /// every prior medium for that id before the new one is inserted.
    pub fn on_found(&self, endpoint: DiscoveredEndpoint) {
        let mut inner = self.inner.lock().unwrap();
        let id = endpoint.endpoint_id;
        let medium = endpoint.medium();

        // Cancel any pending lost-alarm: finding it again refreshes it.
        if let Some(handle) = inner.alarms.remove(&(id, medium)) {
            handle.abort();
        }

        let existing_for_id: Vec<_> = inner
            .entries
            .iter()
            .filter(|((eid, _), _)| *eid == id)
            .map(|(k, v)| (*k, v.endpoint_info.clone()))
            .collect();

        let conflicting_info = existing_for_id
            .iter()
            .any(|(_, info)| *info != endpoint.endpoint_info);

        if conflicting_info {
            for (key, _) in &existing_for_id {
                inner.entries.remove(key);
                if let Some(handle) = inner.alarms.remove(key) {
                    handle.abort();
                }
            }
            let _ = self.events.send(TableEvent::Lost { endpoint_id: id });
            inner.entries.insert((id, medium), endpoint.clone());
            let _ = self.events.send(TableEvent::Found(endpoint));
            return;
        }

        let is_new_medium = !inner.entries.contains_key(&(id, medium));
        let was_known_before = !existing_for_id.is_empty();
        inner.entries.insert((id, medium), endpoint.clone());

        if is_new_medium && !was_known_before {
            let _ = self.events.send(TableEvent::Found(endpoint));
        }
    }

    /// A medium's "lost" callback, or an expired lost-alarm. Removes only
    /// the `(endpoint_id, medium)` entry; notifies the client only when
    /// the last medium for that id is removed.
    pub fn on_lost(&self, endpoint_id: EndpointId, medium: Medium) {
        let mut inner = self.inner.lock().unwrap();
        if inner.entries.remove(&(endpoint_id, medium)).is_none() {
            return;
        }
        if let Some(handle) = inner.alarms.remove(&(endpoint_id, medium)) {
            handle.abort();
        }
        let any_remaining = inner
            .entries
            .keys()
            .any(|(eid, _)| *eid == endpoint_id);
        if !any_remaining {
            let _ = self.events.send(TableEvent::Lost { endpoint_id });
        }
    }

    /// All entries for `endpoint_id`, sorted by medium priority (best
    /// first) so callers try the best medium first (§4.2).
    pub fn get_preferred(
        &self,
        endpoint_id: EndpointId,
        priority: impl Fn(Medium) -> u8,
    ) -> Vec<DiscoveredEndpoint> {
        let inner = self.inner.lock().unwrap();
        let mut matches: Vec<_> = inner
            .entries
            .iter()
            .filter(|((eid, _), _)| *eid == endpoint_id)
            .map(|(_, v)| v.clone())
            .collect();
        matches.sort_by_key(|endpoint| priority(endpoint.medium()));
        matches
    }

    /// Schedules a 10-second (by default) "endpoint lost" alarm for every
    /// currently discovered endpoint on `medium`, protecting against a
    /// device going out of range without an explicit lost event (§4.2,
    /// §4.5 "Endpoint lost alarms").
    pub fn start_endpoint_lost_alarms(
        self: &Arc<Self>,
        medium: Medium,
        timeout: Duration,
    ) {
        let ids: Vec<EndpointId> = {
            let inner = self.inner.lock().unwrap();
            inner
                .entries
                .keys()
                .filter(|(_, m)| *m == medium)
                .map(|(id, _)| *id)
                .collect()
        };
        for id in ids {
            self.arm_alarm(id, medium, timeout);
        }
    }

    fn arm_alarm(self: &Arc<Self>, endpoint_id: EndpointId, medium: Medium, timeout: Duration) {
        let table = Arc::clone(self);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            table.on_lost(endpoint_id, medium);
        });
        let mut inner = self.inner.lock().unwrap();
        if let Some(old) = inner.alarms.insert((endpoint_id, medium), handle) {
            old.abort();
        }
    }

    /// Explicitly cancels one endpoint's lost-alarm on one medium.
    pub fn stop_endpoint_lost_alarm(&self, endpoint_id: EndpointId, medium: Medium) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(handle) = inner.alarms.remove(&(endpoint_id, medium)) {
            handle.abort();
        }
    }

    /// Clears every discovered endpoint and cancels every lost-alarm
    /// (§8 invariant 5: "stop_discovery clears all discovered endpoints
    /// and cancels all lost-alarms").
    pub fn clear(&self) {
        let mut inner = self.inner.lock().unwrap();
        for (_, handle) in inner.alarms.drain() {
            handle.abort();
        }
        inner.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pcp_core::{discovered::DiscoveredEndpointKind, endpoint::EndpointInfo};

    fn bt_endpoint(id: EndpointId, info: &[u8]) -> DiscoveredEndpoint {
        DiscoveredEndpoint {
            endpoint_id: id,
            endpoint_info: EndpointInfo::new(info.to_vec()).unwrap(),
            service_id: "svc".to_string(),
            webrtc_state: Default::default(),
            kind: DiscoveredEndpointKind::Bluetooth {
                mac: [1, 2, 3, 4, 5, 6],
            },
        }
    }

    fn ble_endpoint(id: EndpointId, info: &[u8]) -> DiscoveredEndpoint {
        DiscoveredEndpoint {
            endpoint_id: id,
            endpoint_info: EndpointInfo::new(info.to_vec()).unwrap(),
            service_id: "svc".to_string(),
            webrtc_state: Default::default(),
            kind: DiscoveredEndpointKind::Ble {
                advertisement: vec![0, 1],
            },
        }
    }

    #[tokio::test]
    async fn first_medium_notifies_found_once() {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let table = DiscoveredEndpointTable::new(tx);
        let id = EndpointId::from_bytes(*b"ABCD");

        table.on_found(bt_endpoint(id, b"info"));
        table.on_found(ble_endpoint(id, b"info"));

        let first = rx.recv().await.unwrap();
        assert!(matches!(first, TableEvent::Found(_)));
        assert!(rx.try_recv().is_err(), "second medium should not re-notify");
    }

    #[tokio::test]
    async fn lost_notifies_only_after_last_medium_removed() {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let table = DiscoveredEndpointTable::new(tx);
        let id = EndpointId::from_bytes(*b"ABCD");

        table.on_found(bt_endpoint(id, b"info"));
        table.on_found(ble_endpoint(id, b"info"));
        rx.recv().await.unwrap(); // found

        table.on_lost(id, Medium::Bluetooth);
        assert!(rx.try_recv().is_err(), "one remaining medium: no lost yet");

        table.on_lost(id, Medium::Ble);
        let event = rx.recv().await.unwrap();
        assert!(matches!(event, TableEvent::Lost { .. }));
    }

    #[tokio::test]
    async fn changed_endpoint_info_evicts_then_rediscovers() {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let table = DiscoveredEndpointTable::new(tx);
        let id = EndpointId::from_bytes(*b"ABCD");

        table.on_found(bt_endpoint(id, b"old"));
        rx.recv().await.unwrap(); // found

        table.on_found(bt_endpoint(id, b"new"));
        let lost = rx.recv().await.unwrap();
        assert!(matches!(lost, TableEvent::Lost { .. }));
        let found = rx.recv().await.unwrap();
        assert!(matches!(found, TableEvent::Found(_)));
    }

    #[tokio::test]
    async fn get_preferred_sorts_by_priority() {
        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        let table = DiscoveredEndpointTable::new(tx);
        let id = EndpointId::from_bytes(*b"ABCD");
        table.on_found(ble_endpoint(id, b"info"));
        table.on_found(bt_endpoint(id, b"info"));

        let priority = |m: Medium| if m == Medium::Bluetooth { 0 } else { 1 };
        let preferred = table.get_preferred(id, priority);
        assert_eq!(preferred[0].medium(), Medium::Bluetooth);
    }
}
