//! Session registry: which bridge and which viewers share a session.
//!
//! Connections talk to the registry through bounded outboxes of text
//! messages. The registry never awaits; a viewer whose outbox is full or
//! closed is dropped from its session on the spot.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::time::Instant;

use skyrelay_common::{ControlMessage, Format, decode, decode_auto};

/// Connection handle, unique for the registry's lifetime.
pub type ConnId = u64;

/// Text messages queued for one connection.
pub type Outbox = mpsc::Sender<Arc<str>>;

#[derive(Debug)]
struct Session {
    bridge: Option<(ConnId, Outbox)>,
    viewers: HashMap<ConnId, Outbox>,
    last_data: Option<Value>,
    /// Set when the session last became empty.
    idle_since: Option<Instant>,
}

impl Session {
    fn new() -> Self {
        Self {
            bridge: None,
            viewers: HashMap::new(),
            last_data: None,
            idle_since: None,
        }
    }

    fn is_empty(&self) -> bool {
        self.bridge.is_none() && self.viewers.is_empty()
    }

    fn mark_if_idle(&mut self) -> bool {
        if self.is_empty() {
            self.idle_since = Some(Instant::now());
            true
        } else {
            false
        }
    }

    /// Send to every viewer, dropping those that cannot keep up.
    fn fan_out(&mut self, session_id: &str, text: &Arc<str>) -> usize {
        self.viewers.retain(|conn, tx| match tx.try_send(text.clone()) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(session = %session_id, viewer = *conn, error = %e, "Dropping viewer");
                false
            }
        });
        self.viewers.len()
    }
}

/// Snapshot of one session, for status and tests.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionInfo {
    pub has_bridge: bool,
    pub viewers: usize,
    pub last_data: Option<Value>,
}

/// A message from a bridge that could not be decoded.
#[derive(Debug, thiserror::Error)]
#[error("invalid bridge message: {0}")]
pub struct InvalidMessage(#[from] skyrelay_common::Error);

/// All live sessions.
#[derive(Debug)]
pub struct SessionRegistry {
    sessions: Mutex<HashMap<String, Session>>,
    next_id: AtomicU64,
    idle: Duration,
}

impl SessionRegistry {
    pub fn new(idle: Duration) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(0),
            idle,
        }
    }

    fn next_conn_id(&self) -> ConnId {
        self.next_id.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Number of sessions, empty ones included until they are cleaned up.
    pub fn session_count(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn info(&self, session_id: &str) -> Option<SessionInfo> {
        self.sessions.lock().get(session_id).map(|s| SessionInfo {
            has_bridge: s.bridge.is_some(),
            viewers: s.viewers.len(),
            last_data: s.last_data.clone(),
        })
    }

    /// Register a bridge, replacing any previous one, and confirm the
    /// session to it.
    pub fn join_bridge(&self, session_id: &str, tx: Outbox) -> ConnId {
        let conn = self.next_conn_id();
        let confirm: Arc<str> = ControlMessage::connected(session_id).to_json().into();
        let _ = tx.try_send(confirm);

        let mut sessions = self.sessions.lock();
        let session = sessions
            .entry(session_id.to_string())
            .or_insert_with(Session::new);
        if let Some((old, _)) = session.bridge.replace((conn, tx)) {
            tracing::info!(session = %session_id, old_bridge = old, "Bridge replaced");
        }
        session.idle_since = None;
        tracing::info!(session = %session_id, bridge = conn, "Bridge joined");
        conn
    }

    /// Register a viewer and send it the session status, followed by the
    /// last known data if there is any.
    pub fn join_viewer(&self, session_id: &str, tx: Outbox) -> ConnId {
        let conn = self.next_conn_id();

        let mut sessions = self.sessions.lock();
        let session = sessions
            .entry(session_id.to_string())
            .or_insert_with(Session::new);

        let status = ControlMessage::Connected {
            session_id: session_id.to_string(),
            has_bridge: Some(session.bridge.is_some()),
            last_data: Some(session.last_data.clone().unwrap_or(Value::Null)),
        };
        if let Err(e) = tx.try_send(status.to_json().into()) {
            tracing::warn!(session = %session_id, viewer = conn, error = %e, "Status not queued");
        }
        if let Some(data) = &session.last_data {
            if let Err(e) = tx.try_send(data.to_string().into()) {
                tracing::warn!(session = %session_id, viewer = conn, error = %e, "Last data not queued");
            }
        }

        session.viewers.insert(conn, tx);
        session.idle_since = None;
        tracing::info!(
            session = %session_id,
            viewer = conn,
            viewers = session.viewers.len(),
            "Viewer joined"
        );
        conn
    }

    /// Record a bridge message as the session's last data and forward it
    /// verbatim to every viewer. Returns the number of viewers reached.
    pub fn bridge_message(&self, session_id: &str, text: &str) -> Result<usize, InvalidMessage> {
        let payload: Value = decode(text.as_bytes(), Format::Json)?;
        Ok(self.relay(session_id, payload, Arc::from(text)))
    }

    /// Like [`bridge_message`](Self::bridge_message) for binary frames,
    /// which may hold JSON or CBOR. Viewers always receive JSON text.
    pub fn bridge_binary(&self, session_id: &str, data: &[u8]) -> Result<usize, InvalidMessage> {
        let payload: Value = decode_auto(data)?;
        let text: Arc<str> = payload.to_string().into();
        Ok(self.relay(session_id, payload, text))
    }

    fn relay(&self, session_id: &str, payload: Value, text: Arc<str>) -> usize {
        let mut sessions = self.sessions.lock();
        let Some(session) = sessions.get_mut(session_id) else {
            return 0;
        };
        session.last_data = Some(payload);
        session.fan_out(session_id, &text)
    }

    /// Remove a bridge. Viewers are told only if it was still the current
    /// bridge. Returns `true` if the session is now empty.
    pub fn leave_bridge(&self, session_id: &str, conn: ConnId) -> bool {
        let mut sessions = self.sessions.lock();
        let Some(session) = sessions.get_mut(session_id) else {
            return false;
        };

        if session.bridge.as_ref().is_some_and(|(id, _)| *id == conn) {
            session.bridge = None;
            tracing::info!(session = %session_id, bridge = conn, "Bridge disconnected");
            let notice: Arc<str> = ControlMessage::BridgeDisconnected.to_json().into();
            session.fan_out(session_id, &notice);
        }
        session.mark_if_idle()
    }

    /// Remove a viewer. Returns `true` if the session is now empty.
    pub fn leave_viewer(&self, session_id: &str, conn: ConnId) -> bool {
        let mut sessions = self.sessions.lock();
        let Some(session) = sessions.get_mut(session_id) else {
            return false;
        };
        if session.viewers.remove(&conn).is_some() {
            tracing::debug!(session = %session_id, viewer = conn, "Viewer left");
        }
        session.mark_if_idle()
    }

    /// Remove the session if it has been empty for the full idle period.
    pub fn remove_if_idle(&self, session_id: &str) -> bool {
        let mut sessions = self.sessions.lock();
        let expired = sessions.get(session_id).is_some_and(|s| {
            s.is_empty() && s.idle_since.is_some_and(|at| at.elapsed() >= self.idle)
        });
        if expired {
            sessions.remove(session_id);
            tracing::info!(session = %session_id, "Cleaned up session");
        }
        expired
    }

    /// Check the session once the idle period has passed.
    pub fn schedule_cleanup(self: &Arc<Self>, session_id: &str) {
        let registry = Arc::clone(self);
        let session_id = session_id.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(registry.idle).await;
            registry.remove_if_idle(&session_id);
        });
    }

    /// Disconnect everyone. Dropping the outboxes ends each connection.
    pub fn close_all(&self) {
        let mut sessions = self.sessions.lock();
        let count = sessions.len();
        sessions.clear();
        tracing::info!(sessions = count, "Closed all sessions");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const IDLE: Duration = Duration::from_secs(300);

    fn outbox() -> (Outbox, mpsc::Receiver<Arc<str>>) {
        mpsc::channel(8)
    }

    fn next_json(rx: &mut mpsc::Receiver<Arc<str>>) -> Value {
        let text = rx.try_recv().expect("expected a queued message");
        serde_json::from_str(&text).unwrap()
    }

    #[test]
    fn test_bridge_gets_confirmation() {
        let registry = SessionRegistry::new(IDLE);
        let (tx, mut rx) = outbox();
        registry.join_bridge("s1", tx);

        assert_eq!(next_json(&mut rx), json!({"type": "connected", "sessionId": "s1"}));
        assert_eq!(registry.session_count(), 1);
        assert!(registry.info("s1").unwrap().has_bridge);
    }

    #[test]
    fn test_viewer_without_bridge() {
        let registry = SessionRegistry::new(IDLE);
        let (tx, mut rx) = outbox();
        registry.join_viewer("s1", tx);

        assert_eq!(
            next_json(&mut rx),
            json!({"type": "connected", "sessionId": "s1", "hasBridge": false, "lastData": null})
        );
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_bridge_data_reaches_viewers_and_is_replayed() {
        let registry = SessionRegistry::new(IDLE);
        let (btx, _brx) = outbox();
        let (vtx, mut vrx) = outbox();
        registry.join_bridge("s1", btx);
        registry.join_viewer("s1", vtx);
        next_json(&mut vrx);

        let reached = registry.bridge_message("s1", r#"{"ts":1.5,"alt_ft":1200}"#).unwrap();
        assert_eq!(reached, 1);
        assert_eq!(next_json(&mut vrx), json!({"ts": 1.5, "alt_ft": 1200}));

        let (late_tx, mut late_rx) = outbox();
        registry.join_viewer("s1", late_tx);
        assert_eq!(
            next_json(&mut late_rx),
            json!({
                "type": "connected",
                "sessionId": "s1",
                "hasBridge": true,
                "lastData": {"ts": 1.5, "alt_ft": 1200}
            })
        );
        assert_eq!(next_json(&mut late_rx), json!({"ts": 1.5, "alt_ft": 1200}));
    }

    #[test]
    fn test_invalid_bridge_message_dropped() {
        let registry = SessionRegistry::new(IDLE);
        let (btx, _brx) = outbox();
        let (vtx, mut vrx) = outbox();
        registry.join_bridge("s1", btx);
        registry.join_viewer("s1", vtx);
        next_json(&mut vrx);

        assert!(registry.bridge_message("s1", "not json").is_err());
        assert!(vrx.try_recv().is_err());
        assert_eq!(registry.info("s1").unwrap().last_data, None);
    }

    #[test]
    fn test_cbor_bridge_frame_relayed_as_json() {
        let registry = SessionRegistry::new(IDLE);
        let (btx, _brx) = outbox();
        let (vtx, mut vrx) = outbox();
        registry.join_bridge("s1", btx);
        registry.join_viewer("s1", vtx);
        next_json(&mut vrx);

        let mut sample = skyrelay_common::TelemetrySample::empty(2.0);
        sample.altitude_ft = Some(1500.0);
        let cbor = skyrelay_common::encode(&sample, Format::Cbor).unwrap();

        assert_eq!(registry.bridge_binary("s1", &cbor).unwrap(), 1);
        let relayed = next_json(&mut vrx);
        assert_eq!(relayed["ts"], json!(2.0));
        assert_eq!(relayed["alt_ft"], json!(1500.0));
        assert_eq!(relayed["lat"], Value::Null);
        assert_eq!(registry.info("s1").unwrap().last_data, Some(relayed));

        // JSON in a binary frame is accepted too.
        assert_eq!(registry.bridge_binary("s1", br#"{"ts":3.0}"#).unwrap(), 1);
        assert_eq!(next_json(&mut vrx), json!({"ts": 3.0}));

        assert!(registry.bridge_binary("s1", &[0xff, 0x00]).is_err());
        assert!(vrx.try_recv().is_err());
    }

    #[test]
    fn test_bridge_leave_notifies_viewers() {
        let registry = SessionRegistry::new(IDLE);
        let (btx, _brx) = outbox();
        let (vtx, mut vrx) = outbox();
        let bridge = registry.join_bridge("s1", btx);
        registry.join_viewer("s1", vtx);
        next_json(&mut vrx);

        assert!(!registry.leave_bridge("s1", bridge));
        assert_eq!(next_json(&mut vrx), json!({"type": "bridge_disconnected"}));
        assert!(!registry.info("s1").unwrap().has_bridge);
    }

    #[test]
    fn test_replaced_bridge_leaving_is_silent() {
        let registry = SessionRegistry::new(IDLE);
        let (old_tx, _old_rx) = outbox();
        let (new_tx, _new_rx) = outbox();
        let (vtx, mut vrx) = outbox();
        let old = registry.join_bridge("s1", old_tx);
        registry.join_bridge("s1", new_tx);
        registry.join_viewer("s1", vtx);
        next_json(&mut vrx);

        registry.leave_bridge("s1", old);
        assert!(vrx.try_recv().is_err());
        assert!(registry.info("s1").unwrap().has_bridge);
    }

    #[test]
    fn test_slow_viewer_dropped() {
        let registry = SessionRegistry::new(IDLE);
        let (btx, _brx) = outbox();
        let (slow_tx, _slow_rx) = mpsc::channel(1);
        registry.join_bridge("s1", btx);
        registry.join_viewer("s1", slow_tx);

        // The status message already fills the one slot.
        assert_eq!(registry.bridge_message("s1", "{}").unwrap(), 0);
        assert_eq!(registry.info("s1").unwrap().viewers, 0);
    }

    #[test]
    fn test_smallest_queue_holds_join_replay() {
        let registry = SessionRegistry::new(IDLE);
        let (btx, _brx) = outbox();
        registry.join_bridge("s1", btx);
        registry.bridge_message("s1", r#"{"ts":9.0}"#).unwrap();

        let (vtx, mut vrx) = mpsc::channel(2);
        registry.join_viewer("s1", vtx);
        assert_eq!(next_json(&mut vrx)["lastData"], json!({"ts": 9.0}));
        assert_eq!(next_json(&mut vrx), json!({"ts": 9.0}));
    }

    #[test]
    fn test_sessions_are_isolated() {
        let registry = SessionRegistry::new(IDLE);
        let (btx, _brx) = outbox();
        let (vtx, mut vrx) = outbox();
        registry.join_bridge("a", btx);
        registry.join_viewer("b", vtx);
        next_json(&mut vrx);

        registry.bridge_message("a", "{}").unwrap();
        assert!(vrx.try_recv().is_err());
        assert_eq!(registry.session_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_session_removed_after_idle() {
        let registry = Arc::new(SessionRegistry::new(IDLE));
        let (vtx, _vrx) = outbox();
        let viewer = registry.join_viewer("s1", vtx);

        assert!(registry.leave_viewer("s1", viewer));
        registry.schedule_cleanup("s1");

        tokio::time::sleep(IDLE - Duration::from_secs(1)).await;
        assert_eq!(registry.session_count(), 1);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(registry.session_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejoined_session_survives_cleanup() {
        let registry = Arc::new(SessionRegistry::new(IDLE));
        let (vtx, _vrx) = outbox();
        let viewer = registry.join_viewer("s1", vtx);
        assert!(registry.leave_viewer("s1", viewer));
        registry.schedule_cleanup("s1");

        tokio::time::sleep(Duration::from_secs(60)).await;
        let (btx, _brx) = outbox();
        registry.join_bridge("s1", btx);

        tokio::time::sleep(IDLE).await;
        assert_eq!(registry.session_count(), 1);
    }

    #[test]
    fn test_close_all_drops_outboxes() {
        let registry = SessionRegistry::new(IDLE);
        let (vtx, mut vrx) = outbox();
        registry.join_viewer("s1", vtx);
        next_json(&mut vrx);

        registry.close_all();
        assert_eq!(registry.session_count(), 0);
        assert!(matches!(
            vrx.try_recv(),
            Err(mpsc::error::TryRecvError::Disconnected)
        ));
    }
}
