//! Fan-out of session status to WebSocket observers.
//!
//! Only the latest snapshot is kept: the state, plus the QR code or pairing
//! code while the session is waiting for one to be used. Nothing is replayed.

use std::{collections::HashMap, sync::Mutex};

use {
    async_trait::async_trait,
    rollcall_whatsapp::{SessionState, StatusSink, StatusUpdate},
    serde::Serialize,
    tokio::sync::RwLock,
    tracing::{debug, warn},
};

use crate::state::ConnectedClient;

pub const EVENT_STATUS: &str = "whatsappStatus";
pub const EVENT_QR: &str = "whatsappQR";
pub const EVENT_PAIRING_CODE: &str = "pairingCode";

/// Server-to-client frame.
#[derive(Debug, Clone, Serialize)]
pub struct EventFrame<'a> {
    pub event: &'a str,
    pub data: &'a str,
}

impl EventFrame<'_> {
    fn to_json(&self) -> Option<String> {
        match serde_json::to_string(self) {
            Ok(json) => Some(json),
            Err(e) => {
                warn!(event = self.event, error = %e, "failed to serialize status frame");
                None
            },
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusSnapshot {
    pub state: SessionState,
    pub qr: Option<String>,
    pub pairing_code: Option<String>,
}

impl StatusSnapshot {
    fn apply(&mut self, update: &StatusUpdate) {
        match update {
            StatusUpdate::State(state) => {
                self.state = *state;
                if *state != SessionState::AwaitingQr {
                    self.qr = None;
                }
                if *state != SessionState::AwaitingPairingCode {
                    self.pairing_code = None;
                }
            },
            StatusUpdate::Qr { data_url } => {
                self.qr = Some(data_url.clone());
                self.pairing_code = None;
            },
            StatusUpdate::PairingCode { code } => {
                self.pairing_code = Some(code.clone());
                self.qr = None;
            },
        }
    }

    /// Frames that bring a fresh observer up to date.
    pub fn frames(&self) -> Vec<String> {
        let mut frames = Vec::with_capacity(2);
        frames.extend(
            EventFrame {
                event: EVENT_STATUS,
                data: self.state.as_str(),
            }
            .to_json(),
        );
        if let Some(qr) = &self.qr {
            frames.extend(EventFrame { event: EVENT_QR, data: qr }.to_json());
        }
        if let Some(code) = &self.pairing_code {
            frames.extend(
                EventFrame {
                    event: EVENT_PAIRING_CODE,
                    data: code,
                }
                .to_json(),
            );
        }
        frames
    }
}

#[derive(Default)]
pub struct StatusBroadcaster {
    clients: RwLock<HashMap<String, ConnectedClient>>,
    snapshot: Mutex<StatusSnapshot>,
}

impl StatusBroadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        self.snapshot
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Add an observer and queue the current snapshot for it.
    ///
    /// The snapshot is read under the client map's write lock. A publish
    /// updates the snapshot under the read lock, so it either lands in this
    /// snapshot or reaches the client after it joined.
    pub async fn register(&self, client: ConnectedClient) {
        let mut clients = self.clients.write().await;
        for frame in self.snapshot().frames() {
            client.send(&frame);
        }
        clients.insert(client.conn_id.clone(), client);
    }

    pub async fn remove(&self, conn_id: &str) -> Option<ConnectedClient> {
        self.clients.write().await.remove(conn_id)
    }

    pub async fn client_count(&self) -> usize {
        self.clients.read().await.len()
    }

    /// Apply `update` to the snapshot and send `frame` to every observer,
    /// dropping those whose queue is closed.
    async fn broadcast(&self, update: &StatusUpdate, event: &str, frame: &str) {
        let mut gone = Vec::new();
        {
            let clients = self.clients.read().await;
            self.snapshot
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .apply(update);
            debug!(event, clients = clients.len(), "broadcasting status");
            for client in clients.values() {
                if !client.send(frame) {
                    gone.push(client.conn_id.clone());
                }
            }
        }
        if !gone.is_empty() {
            let mut clients = self.clients.write().await;
            for conn_id in gone {
                debug!(conn_id = %conn_id, "pruning closed status observer");
                clients.remove(&conn_id);
            }
        }
    }
}

#[async_trait]
impl StatusSink for StatusBroadcaster {
    async fn publish(&self, update: StatusUpdate) {
        let frame = match &update {
            StatusUpdate::State(state) => EventFrame {
                event: EVENT_STATUS,
                data: state.as_str(),
            },
            StatusUpdate::Qr { data_url } => EventFrame {
                event: EVENT_QR,
                data: data_url,
            },
            StatusUpdate::PairingCode { code } => EventFrame {
                event: EVENT_PAIRING_CODE,
                data: code,
            },
        };
        match frame.to_json() {
            Some(json) => self.broadcast(&update, frame.event, &json).await,
            None => self
                .snapshot
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .apply(&update),
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, serde_json::Value, std::time::Instant, tokio::sync::mpsc};

    fn client(id: &str) -> (ConnectedClient, mpsc::UnboundedReceiver<String>) {
        let (sender, rx) = mpsc::unbounded_channel();
        (
            ConnectedClient {
                conn_id: id.into(),
                remote_ip: "127.0.0.1".into(),
                sender,
                connected_at: Instant::now(),
            },
            rx,
        )
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<String>) -> Vec<(String, String)> {
        let mut out = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            let v: Value = serde_json::from_str(&frame).unwrap();
            out.push((
                v["event"].as_str().unwrap().to_string(),
                v["data"].as_str().unwrap().to_string(),
            ));
        }
        out
    }

    #[tokio::test]
    async fn new_observer_gets_the_snapshot() {
        let b = StatusBroadcaster::new();
        b.publish(StatusUpdate::State(SessionState::AwaitingQr)).await;
        b.publish(StatusUpdate::Qr {
            data_url: "data:image/svg+xml;base64,AAA".into(),
        })
        .await;

        let (c, mut rx) = client("a");
        b.register(c).await;
        assert_eq!(drain(&mut rx), vec![
            ("whatsappStatus".into(), "awaitingQr".into()),
            ("whatsappQR".into(), "data:image/svg+xml;base64,AAA".into()),
        ]);
    }

    #[tokio::test]
    async fn connecting_clears_the_qr() {
        let b = StatusBroadcaster::new();
        b.publish(StatusUpdate::Qr {
            data_url: "data:x".into(),
        })
        .await;
        b.publish(StatusUpdate::State(SessionState::Connected)).await;
        let snap = b.snapshot();
        assert_eq!(snap.state, SessionState::Connected);
        assert!(snap.qr.is_none());
        assert_eq!(snap.frames().len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn observers_joining_mid_publish_end_up_current() {
        let b = std::sync::Arc::new(StatusBroadcaster::new());
        let mut receivers = Vec::new();
        let mut joins = Vec::new();
        for i in 0..32 {
            let (c, rx) = client(&format!("c{i}"));
            receivers.push(rx);
            let b = std::sync::Arc::clone(&b);
            joins.push(tokio::spawn(async move { b.register(c).await }));
        }
        for i in 0..64 {
            let state = if i % 2 == 0 {
                SessionState::Disconnected
            } else {
                SessionState::Connected
            };
            b.publish(StatusUpdate::State(state)).await;
            tokio::task::yield_now().await;
        }
        for j in joins {
            j.await.unwrap();
        }

        let last = b.snapshot().state.as_str().to_string();
        for rx in &mut receivers {
            let frames = drain(rx);
            assert_eq!(frames.last().map(|(_, data)| data.clone()), Some(last.clone()));
        }
    }

    #[tokio::test]
    async fn fans_out_and_prunes_closed_clients() {
        let b = StatusBroadcaster::new();
        let (a, mut rx_a) = client("a");
        let (gone, rx_gone) = client("gone");
        b.register(a).await;
        b.register(gone).await;
        drain(&mut rx_a);
        drop(rx_gone);

        b.publish(StatusUpdate::PairingCode {
            code: "ABCD-1234".into(),
        })
        .await;
        assert_eq!(drain(&mut rx_a), vec![(
            "pairingCode".into(),
            "ABCD-1234".into()
        )]);
        assert_eq!(b.client_count().await, 1);

        assert!(b.remove("a").await.is_some());
        assert_eq!(b.client_count().await, 0);
    }
}
