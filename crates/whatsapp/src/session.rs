//! The session adapter: owns the single live WhatsApp connection, follows its
//! lifecycle, and decides when to reconnect.
//!
//! All lifecycle work happens on one supervisor task. Backend events are
//! tagged with the generation of the connection that produced them; events
//! from a replaced connection are dropped. Callers never see the raw handle,
//! only a [`SessionLease`] that goes stale when the connection is replaced.

use std::sync::{
    Arc, Mutex as StdMutex,
    atomic::{AtomicU64, Ordering},
};

use {
    tokio::{
        sync::{mpsc, watch},
        task::JoinHandle,
        time::Instant,
    },
    tracing::{debug, error, info, warn},
};

use crate::{
    Error, Result,
    connector::{ConnectRequest, EventSender, SessionConnector, SessionHandle},
    credentials::CredentialStore,
    qr,
    reconnect::ReconnectPolicy,
    state::{DisconnectReason, SessionState},
    status::{StatusSink, StatusUpdate},
    types::{LoginMethod, OutboundDocument, Receipt, SessionEvent},
};

pub const CONNECTED_ANNOUNCEMENT: &str = "WhatsApp bot has successfully connected!";

#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub reconnect: ReconnectPolicy,
    /// Send [`CONNECTED_ANNOUNCEMENT`] to the account's own chat on connect.
    pub announce_on_connect: bool,
    /// Login method for automatic (re)connects.
    pub default_login: LoginMethod,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            reconnect: ReconnectPolicy::default(),
            announce_on_connect: true,
            default_login: LoginMethod::Qr,
        }
    }
}

/// Opaque permission to send through one specific connection.
#[derive(Clone)]
pub struct SessionLease {
    generation: u64,
    handle: Arc<dyn SessionHandle>,
}

impl SessionLease {
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

impl std::fmt::Debug for SessionLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionLease")
            .field("generation", &self.generation)
            .finish_non_exhaustive()
    }
}

enum Command {
    Connect(LoginMethod),
    Logout,
    Shutdown,
}

type EventRx = mpsc::UnboundedReceiver<(u64, SessionEvent)>;
type EventTx = mpsc::UnboundedSender<(u64, SessionEvent)>;

struct Active {
    lease: SessionLease,
    own_jid: Option<String>,
}

struct Shared {
    connector: Arc<dyn SessionConnector>,
    credentials: Arc<dyn CredentialStore>,
    sink: Arc<dyn StatusSink>,
    options: SessionOptions,
    state: watch::Sender<SessionState>,
    generation: AtomicU64,
    active: StdMutex<Option<Active>>,
}

/// Supervisor-local bookkeeping.
struct Run {
    login: LoginMethod,
    attempts: u32,
    retry_at: Option<Instant>,
}

pub struct SessionAdapter {
    shared: Arc<Shared>,
    commands: mpsc::UnboundedSender<Command>,
    pending: StdMutex<Option<(mpsc::UnboundedReceiver<Command>, EventRx, EventTx)>>,
    supervisor: StdMutex<Option<JoinHandle<()>>>,
}

impl SessionAdapter {
    pub fn new(
        connector: Arc<dyn SessionConnector>,
        credentials: Arc<dyn CredentialStore>,
        sink: Arc<dyn StatusSink>,
        options: SessionOptions,
    ) -> Self {
        let (commands, command_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (state, _) = watch::channel(SessionState::Uninitialized);
        Self {
            shared: Arc::new(Shared {
                connector,
                credentials,
                sink,
                options,
                state,
                generation: AtomicU64::new(0),
                active: StdMutex::new(None),
            }),
            commands,
            pending: StdMutex::new(Some((command_rx, event_rx, event_tx))),
            supervisor: StdMutex::new(None),
        }
    }

    /// Spawn the supervisor and make the first connection attempt.
    /// Calling it again has no effect.
    pub fn start(&self) {
        let Some((command_rx, event_rx, event_tx)) = self
            .pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        else {
            return;
        };
        let login = self.shared.options.default_login.clone();
        let shared = Arc::clone(&self.shared);
        let task = tokio::spawn(supervise(shared, command_rx, event_rx, event_tx));
        *self.supervisor.lock().unwrap_or_else(|e| e.into_inner()) = Some(task);
        let _ = self.commands.send(Command::Connect(login));
    }

    pub fn state(&self) -> SessionState {
        *self.shared.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.shared.state.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == SessionState::Connected
    }

    /// JID of the linked account, once connected.
    pub fn own_jid(&self) -> Option<String> {
        self.shared
            .active
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .and_then(|a| a.own_jid.clone())
    }

    /// Lease on the live connection, or `None` while not connected.
    pub fn current_handle(&self) -> Option<SessionLease> {
        if !self.is_connected() {
            return None;
        }
        self.shared.current_lease()
    }

    pub async fn send_text(&self, lease: &SessionLease, to: &str, text: &str) -> Result<Receipt> {
        self.shared.check_lease(lease)?;
        validate_destination(to)?;
        let receipt = lease.handle.send_text(to, text).await?;
        debug!(to, generation = lease.generation, "text sent");
        Ok(receipt)
    }

    pub async fn send_document(
        &self,
        lease: &SessionLease,
        to: &str,
        document: &OutboundDocument,
    ) -> Result<Receipt> {
        self.shared.check_lease(lease)?;
        validate_destination(to)?;
        let receipt = lease.handle.send_document(to, document).await?;
        debug!(to, file_name = %document.file_name, generation = lease.generation, "document sent");
        Ok(receipt)
    }

    /// Whether `phone` has a WhatsApp account; `None` when no session is
    /// connected to ask.
    pub async fn check_number(&self, phone: &str) -> Result<Option<bool>> {
        let Some(lease) = self.current_handle() else {
            return Ok(None);
        };
        lease.handle.check_number(phone).await.map(Some)
    }

    /// Replace the current connection with a fresh attempt and reset the
    /// reconnect budget. Also the only way out of `LoggedOut`.
    pub fn new_session(&self, login: LoginMethod) -> Result<()> {
        self.send_command(Command::Connect(login))
    }

    /// Unlink the account and forget its credentials.
    pub fn logout(&self) -> Result<()> {
        self.send_command(Command::Logout)
    }

    pub async fn shutdown(&self) {
        let _ = self.commands.send(Command::Shutdown);
        let task = self
            .supervisor
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(task) = task
            && let Err(e) = task.await
        {
            warn!(error = %e, "session supervisor ended abnormally");
        }
    }

    fn send_command(&self, command: Command) -> Result<()> {
        self.commands
            .send(command)
            .map_err(|_| Error::message("session supervisor is not running"))
    }
}

/// `user@server` with no whitespace.
fn validate_destination(to: &str) -> Result<()> {
    match to.split_once('@') {
        Some((user, server))
            if !user.is_empty()
                && !server.is_empty()
                && !server.contains('@')
                && !to.chars().any(char::is_whitespace) =>
        {
            Ok(())
        },
        _ => Err(Error::invalid_destination(to)),
    }
}

async fn supervise(
    shared: Arc<Shared>,
    mut commands: mpsc::UnboundedReceiver<Command>,
    mut events: EventRx,
    event_tx: EventTx,
) {
    let mut run = Run {
        login: shared.options.default_login.clone(),
        attempts: 0,
        retry_at: None,
    };

    loop {
        let retry_at = run.retry_at;
        tokio::select! {
            command = commands.recv() => match command {
                Some(Command::Connect(login)) => {
                    run.login = login;
                    run.attempts = 0;
                    run.retry_at = None;
                    shared.connect(&mut run, &event_tx).await;
                },
                Some(Command::Logout) => {
                    run.retry_at = None;
                    shared.logout().await;
                },
                Some(Command::Shutdown) | None => {
                    shared.drop_active().await;
                    info!("session supervisor stopped");
                    break;
                },
            },
            Some((generation, event)) = events.recv() => {
                let current = shared.generation.load(Ordering::SeqCst);
                if generation != current {
                    debug!(generation, current, "ignoring event from a replaced connection");
                    continue;
                }
                shared.handle_event(event, &mut run).await;
            },
            () = wait_until(retry_at) => {
                run.retry_at = None;
                shared.connect(&mut run, &event_tx).await;
            },
        }
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

impl Shared {
    fn current_lease(&self) -> Option<SessionLease> {
        self.active
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .map(|a| a.lease.clone())
    }

    fn check_lease(&self, lease: &SessionLease) -> Result<()> {
        let current = self.generation.load(Ordering::SeqCst);
        if lease.generation != current || *self.state.borrow() != SessionState::Connected {
            return Err(Error::StaleHandle {
                lease: lease.generation,
                current,
            });
        }
        Ok(())
    }

    async fn set_state(&self, state: SessionState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            info!(from = %previous, to = %state, "session state changed");
            self.sink.publish(StatusUpdate::State(state)).await;
        }
    }

    /// Invalidate the current connection and close it.
    async fn drop_active(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        let active = self
            .active
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(active) = active {
            active.lease.handle.close().await;
        }
    }

    async fn connect(&self, run: &mut Run, event_tx: &EventTx) {
        self.drop_active().await;
        let generation = self.generation.load(Ordering::SeqCst);
        self.set_state(SessionState::Uninitialized).await;

        let credentials = match self.credentials.load().await {
            Ok(c) => c,
            Err(e) => {
                warn!(error = %e, "failed to load session credentials, starting unpaired");
                Default::default()
            },
        };
        let paired = !credentials.is_empty();
        let request = ConnectRequest {
            generation,
            credentials,
            login: run.login.clone(),
        };

        info!(generation, paired, attempt = run.attempts, "connecting WhatsApp session");
        match self
            .connector
            .connect(request, EventSender::new(generation, event_tx.clone()))
            .await
        {
            Ok(handle) => {
                *self.active.lock().unwrap_or_else(|e| e.into_inner()) = Some(Active {
                    lease: SessionLease { generation, handle },
                    own_jid: None,
                });
            },
            Err(e) => {
                warn!(generation, error = %e, "failed to start WhatsApp session");
                self.set_state(SessionState::Disconnected).await;
                self.schedule_retry(run);
            },
        }
    }

    fn schedule_retry(&self, run: &mut Run) {
        match self.options.reconnect.delay_for(run.attempts) {
            Some(delay) => {
                run.attempts += 1;
                run.retry_at = Some(Instant::now() + delay);
                info!(
                    attempt = run.attempts,
                    delay_ms = delay.as_millis() as u64,
                    "scheduling reconnect"
                );
            },
            None => {
                run.retry_at = None;
                error!(
                    attempts = run.attempts,
                    "giving up on reconnecting; start a new session to try again"
                );
            },
        }
    }

    async fn handle_event(&self, event: SessionEvent, run: &mut Run) {
        match event {
            SessionEvent::CredsUpdate(delta) => {
                if let Err(e) = self.credentials.save(&delta).await {
                    error!(error = %e, "failed to persist session credentials");
                }
            },
            SessionEvent::Qr(payload) => {
                debug!("received login QR code");
                self.set_state(SessionState::AwaitingQr).await;
                let data_url = qr::render_data_url(&payload).unwrap_or_else(|e| {
                    warn!(error = %e, "could not render QR code, forwarding raw payload");
                    payload
                });
                self.sink.publish(StatusUpdate::Qr { data_url }).await;
            },
            SessionEvent::PairingCode(code) => {
                debug!("received pairing code");
                self.set_state(SessionState::AwaitingPairingCode).await;
                self.sink.publish(StatusUpdate::PairingCode { code }).await;
            },
            SessionEvent::Open { own_jid } => {
                run.attempts = 0;
                run.retry_at = None;
                let lease = {
                    let mut active = self.active.lock().unwrap_or_else(|e| e.into_inner());
                    active.as_mut().map(|a| {
                        a.own_jid.clone_from(&own_jid);
                        a.lease.clone()
                    })
                };
                info!(own_jid = ?own_jid, "WhatsApp session connected");
                self.set_state(SessionState::Connected).await;

                if self.options.announce_on_connect
                    && let (Some(lease), Some(jid)) = (lease, own_jid)
                {
                    tokio::spawn(async move {
                        if let Err(e) = lease.handle.send_text(&jid, CONNECTED_ANNOUNCEMENT).await {
                            warn!(error = %e, "failed to send connection announcement");
                        }
                    });
                }
            },
            SessionEvent::Close { reason } => self.handle_close(reason, run).await,
        }
    }

    async fn handle_close(&self, reason: DisconnectReason, run: &mut Run) {
        self.drop_active().await;
        if reason.is_logged_out() {
            warn!("WhatsApp session logged out; waiting for a new session");
            run.retry_at = None;
            if let Err(e) = self.credentials.clear().await {
                error!(error = %e, "failed to clear session credentials");
            }
            self.set_state(SessionState::LoggedOut).await;
        } else {
            warn!(?reason, "WhatsApp connection closed");
            self.set_state(SessionState::Disconnected).await;
            self.schedule_retry(run);
        }
    }

    async fn logout(&self) {
        let active = self
            .active
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        self.generation.fetch_add(1, Ordering::SeqCst);
        if let Some(active) = active {
            if let Err(e) = active.lease.handle.logout().await {
                warn!(error = %e, "backend logout failed");
            }
            active.lease.handle.close().await;
        }
        if let Err(e) = self.credentials.clear().await {
            error!(error = %e, "failed to clear session credentials");
        }
        self.set_state(SessionState::LoggedOut).await;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::time::Duration;

    use serde_json::json;

    use {
        super::*,
        crate::{
            credentials::{Credentials, MemoryCredentialStore},
            scripted::{ScriptedConnector, SentMessage},
        },
    };

    #[derive(Default)]
    struct RecordingSink {
        updates: StdMutex<Vec<StatusUpdate>>,
    }

    impl RecordingSink {
        fn updates(&self) -> Vec<StatusUpdate> {
            self.updates.lock().unwrap().clone()
        }
    }

    #[async_trait::async_trait]
    impl StatusSink for RecordingSink {
        async fn publish(&self, update: StatusUpdate) {
            self.updates.lock().unwrap().push(update);
        }
    }

    struct Harness {
        adapter: SessionAdapter,
        connector: Arc<ScriptedConnector>,
        creds: Arc<MemoryCredentialStore>,
        sink: Arc<RecordingSink>,
    }

    fn fast_policy(max_attempts: u32) -> ReconnectPolicy {
        ReconnectPolicy {
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            max_attempts,
        }
    }

    fn harness(connector: ScriptedConnector, options: SessionOptions) -> Harness {
        let connector = Arc::new(connector);
        let creds = Arc::new(MemoryCredentialStore::new());
        let sink = Arc::new(RecordingSink::default());
        let adapter = SessionAdapter::new(
            Arc::clone(&connector) as Arc<dyn SessionConnector>,
            Arc::clone(&creds) as Arc<dyn CredentialStore>,
            Arc::clone(&sink) as Arc<dyn StatusSink>,
            options,
        );
        Harness {
            adapter,
            connector,
            creds,
            sink,
        }
    }

    fn options(max_attempts: u32, announce: bool) -> SessionOptions {
        SessionOptions {
            reconnect: fast_policy(max_attempts),
            announce_on_connect: announce,
            default_login: LoginMethod::Qr,
        }
    }

    async fn wait_for_state(adapter: &SessionAdapter, state: SessionState) {
        let mut rx = adapter.subscribe();
        tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|s| *s == state))
            .await
            .unwrap_or_else(|_| panic!("timed out waiting for {state}"))
            .unwrap();
    }

    async fn wait_until(mut cond: impl FnMut() -> bool) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !cond() {
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    #[tokio::test]
    async fn qr_then_open_reaches_connected() {
        let h = harness(ScriptedConnector::new(), options(3, false));
        h.adapter.start();
        wait_until(|| h.connector.last_session().is_some()).await;
        let session = h.connector.last_session().unwrap();

        session.emit(SessionEvent::Qr("2@payload".into()));
        wait_for_state(&h.adapter, SessionState::AwaitingQr).await;
        assert!(h.adapter.current_handle().is_none());

        session.emit(SessionEvent::Open {
            own_jid: Some("2348012345678@s.whatsapp.net".into()),
        });
        wait_for_state(&h.adapter, SessionState::Connected).await;
        assert!(h.adapter.current_handle().is_some());
        assert_eq!(
            h.adapter.own_jid().as_deref(),
            Some("2348012345678@s.whatsapp.net")
        );

        let updates = h.sink.updates();
        assert!(updates.iter().any(|u| matches!(u, StatusUpdate::Qr { data_url } if data_url.starts_with("data:image/svg+xml;base64,"))));
        assert_eq!(
            updates.last(),
            Some(&StatusUpdate::State(SessionState::Connected))
        );
        h.adapter.shutdown().await;
    }

    #[tokio::test]
    async fn pairing_code_login_is_forwarded() {
        let h = harness(ScriptedConnector::new(), options(3, false));
        h.adapter.start();
        h.adapter
            .new_session(LoginMethod::PairingCode {
                phone: "2348012345678".into(),
            })
            .unwrap();
        wait_until(|| {
            h.connector
                .requests()
                .iter()
                .any(|r| r.login.pairing_phone() == Some("2348012345678"))
        })
        .await;
        let session = h.connector.last_session().unwrap();
        session.emit(SessionEvent::PairingCode("ABCD-EFGH".into()));
        wait_for_state(&h.adapter, SessionState::AwaitingPairingCode).await;
        assert!(h.sink.updates().contains(&StatusUpdate::PairingCode {
            code: "ABCD-EFGH".into()
        }));
        h.adapter.shutdown().await;
    }

    #[tokio::test]
    async fn announces_to_own_jid_on_connect() {
        let h = harness(
            ScriptedConnector::new().opening_with(Some("15550001111@s.whatsapp.net")),
            options(3, true),
        );
        h.adapter.start();
        wait_for_state(&h.adapter, SessionState::Connected).await;
        let session = h.connector.last_session().unwrap();
        wait_until(|| !session.sent().is_empty()).await;
        assert_eq!(
            session.sent()[0],
            SentMessage::Text {
                to: "15550001111@s.whatsapp.net".into(),
                text: CONNECTED_ANNOUNCEMENT.into(),
            }
        );
        h.adapter.shutdown().await;
    }

    #[tokio::test]
    async fn reconnects_after_non_logout_close() {
        let h = harness(
            ScriptedConnector::new().opening_with(None),
            options(5, false),
        );
        h.adapter.start();
        wait_for_state(&h.adapter, SessionState::Connected).await;
        let first = h.connector.last_session().unwrap();

        first.emit(SessionEvent::Close {
            reason: DisconnectReason::ConnectionLost,
        });
        wait_until(|| h.connector.connect_count() >= 2).await;
        wait_for_state(&h.adapter, SessionState::Connected).await;
        assert!(first.is_closed());
        let second = h.connector.last_session().unwrap();
        assert!(second.generation() > first.generation());
        h.adapter.shutdown().await;
    }

    #[tokio::test]
    async fn logged_out_is_terminal_until_new_session() {
        let h = harness(
            ScriptedConnector::new().opening_with(None),
            options(5, false),
        );
        h.creds
            .save(&json!({"creds": {"me": "x"}}).as_object().cloned().unwrap())
            .await
            .unwrap();
        h.adapter.start();
        wait_for_state(&h.adapter, SessionState::Connected).await;
        let session = h.connector.last_session().unwrap();

        session.emit(SessionEvent::Close {
            reason: DisconnectReason::LoggedOut,
        });
        wait_for_state(&h.adapter, SessionState::LoggedOut).await;
        assert!(h.creds.snapshot().is_empty());

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(h.connector.connect_count(), 1);
        assert_eq!(h.adapter.state(), SessionState::LoggedOut);

        h.adapter.new_session(LoginMethod::Qr).unwrap();
        wait_for_state(&h.adapter, SessionState::Connected).await;
        assert_eq!(h.connector.connect_count(), 2);
        h.adapter.shutdown().await;
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let h = harness(ScriptedConnector::new().failing(usize::MAX), options(3, false));
        h.adapter.start();
        // First attempt plus three retries.
        wait_until(|| h.connector.connect_count() == 4).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(h.connector.connect_count(), 4);
        assert_eq!(h.adapter.state(), SessionState::Disconnected);

        // An operator request resets the budget.
        h.adapter.new_session(LoginMethod::Qr).unwrap();
        wait_until(|| h.connector.connect_count() >= 5).await;
        h.adapter.shutdown().await;
    }

    #[tokio::test]
    async fn stale_generation_events_are_ignored() {
        let h = harness(
            ScriptedConnector::new().opening_with(None),
            options(3, false),
        );
        h.adapter.start();
        wait_for_state(&h.adapter, SessionState::Connected).await;
        let old = h.connector.last_session().unwrap();

        h.adapter.new_session(LoginMethod::Qr).unwrap();
        wait_until(|| h.connector.connect_count() == 2).await;
        wait_for_state(&h.adapter, SessionState::Connected).await;

        // A late close from the replaced connection must not disturb the new one.
        old.emit(SessionEvent::Close {
            reason: DisconnectReason::LoggedOut,
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(h.adapter.state(), SessionState::Connected);
        assert_eq!(h.connector.connect_count(), 2);
        h.adapter.shutdown().await;
    }

    #[tokio::test]
    async fn stale_lease_cannot_send() {
        let h = harness(
            ScriptedConnector::new().opening_with(None),
            options(3, false),
        );
        h.adapter.start();
        wait_for_state(&h.adapter, SessionState::Connected).await;
        let lease = h.adapter.current_handle().unwrap();
        h.adapter
            .send_text(&lease, "123456789@s.whatsapp.net", "hi")
            .await
            .unwrap();

        h.adapter.new_session(LoginMethod::Qr).unwrap();
        wait_until(|| h.connector.connect_count() == 2).await;
        wait_for_state(&h.adapter, SessionState::Connected).await;

        let err = h
            .adapter
            .send_text(&lease, "123456789@s.whatsapp.net", "hi")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::StaleHandle { .. }));

        let fresh = h.adapter.current_handle().unwrap();
        let err = h
            .adapter
            .send_text(&fresh, "not a jid", "hi")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidDestination { .. }));
        h.adapter.shutdown().await;
    }

    #[tokio::test]
    async fn credentials_are_saved_before_next_event() {
        let h = harness(ScriptedConnector::new(), options(3, false));
        h.adapter.start();
        wait_until(|| h.connector.last_session().is_some()).await;
        let session = h.connector.last_session().unwrap();

        let delta: Credentials = json!({"creds": {"registered": true}, "pre-key-1": "k"})
            .as_object()
            .cloned()
            .unwrap();
        session.emit(SessionEvent::CredsUpdate(delta));
        session.emit(SessionEvent::CredsUpdate(
            json!({"pre-key-1": null}).as_object().cloned().unwrap(),
        ));
        session.emit(SessionEvent::Open { own_jid: None });
        wait_for_state(&h.adapter, SessionState::Connected).await;

        let stored = h.creds.snapshot();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored["creds"]["registered"], true);

        // The next attempt is handed the stored credentials.
        h.adapter.new_session(LoginMethod::Qr).unwrap();
        wait_until(|| h.connector.connect_count() == 2).await;
        let requests = h.connector.requests();
        assert_eq!(requests[1].credentials, stored);
        h.adapter.shutdown().await;
    }

    #[tokio::test]
    async fn explicit_logout_clears_credentials() {
        let h = harness(
            ScriptedConnector::new().opening_with(None),
            options(3, false),
        );
        h.creds
            .save(&json!({"creds": 1}).as_object().cloned().unwrap())
            .await
            .unwrap();
        h.adapter.start();
        wait_for_state(&h.adapter, SessionState::Connected).await;
        let session = h.connector.last_session().unwrap();

        h.adapter.logout().unwrap();
        wait_for_state(&h.adapter, SessionState::LoggedOut).await;
        assert!(session.is_logged_out());
        assert!(session.is_closed());
        assert!(h.creds.snapshot().is_empty());
        assert!(h.adapter.current_handle().is_none());
        h.adapter.shutdown().await;
    }

    #[test]
    fn destination_shape() {
        assert!(validate_destination("123@s.whatsapp.net").is_ok());
        assert!(validate_destination("120363@newsletter").is_ok());
        assert!(validate_destination("@g.us").is_err());
        assert!(validate_destination("123@").is_err());
        assert!(validate_destination("12 3@g.us").is_err());
        assert!(validate_destination("a@b@c").is_err());
    }
}
