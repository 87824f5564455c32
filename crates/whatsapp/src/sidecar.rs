//! WebSocket client for the Baileys sidecar.
//!
//! Each [`SidecarConnector::connect`] call opens its own socket, sends a
//! `login` for the configured account and returns a [`SidecarSession`].
//! Lifecycle messages become [`SessionEvent`]s; request/response messages are
//! matched to callers by `request_id`.

use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex as StdMutex,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use {
    async_trait::async_trait,
    base64::{Engine, engine::general_purpose::STANDARD},
    futures::{SinkExt, StreamExt},
    tokio::{
        net::TcpStream,
        sync::{mpsc, oneshot},
        task::JoinHandle,
    },
    tokio_tungstenite::{
        MaybeTlsStream, WebSocketStream, connect_async, tungstenite::protocol::Message,
    },
    tracing::{debug, info, warn},
};

use crate::{
    Error, Result,
    connector::{ConnectRequest, EventSender, SessionConnector, SessionHandle},
    state::DisconnectReason,
    types::{GatewayMessage, OutboundDocument, Receipt, SessionEvent, SidecarMessage},
};

pub const DEFAULT_SIDECAR_PORT: u16 = 32882;

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Connect to the sidecar, retrying while it starts up.
pub async fn connect_with_retry(url: &str, attempts: u32) -> Result<Socket> {
    let mut last_error = None;
    for attempt in 0..attempts.max(1) {
        match connect_async(url).await {
            Ok((socket, _)) => {
                debug!(url, attempt, "connected to WhatsApp sidecar");
                return Ok(socket);
            },
            Err(e) => {
                debug!(url, attempt, error = %e, "sidecar not reachable yet");
                last_error = Some(e);
                tokio::time::sleep(Duration::from_millis(500)).await;
            },
        }
    }
    Err(last_error
        .map(Error::from)
        .unwrap_or_else(|| Error::message("sidecar unreachable")))
}

pub struct SidecarConnector {
    url: String,
    account_id: String,
    browser: String,
    request_timeout: Duration,
    connect_attempts: u32,
}

impl SidecarConnector {
    pub fn new(port: u16, account_id: impl Into<String>) -> Self {
        Self {
            url: format!("ws://127.0.0.1:{port}"),
            account_id: account_id.into(),
            browser: "Rollcall".into(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            connect_attempts: 10,
        }
    }

    /// Name shown in the phone's linked-devices list.
    pub fn with_browser(mut self, browser: impl Into<String>) -> Self {
        self.browser = browser.into();
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl SessionConnector for SidecarConnector {
    async fn connect(
        &self,
        request: ConnectRequest,
        events: EventSender,
    ) -> Result<Arc<dyn SessionHandle>> {
        let socket = connect_with_retry(&self.url, self.connect_attempts).await?;
        let (mut sink, mut stream) = socket.split();

        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<GatewayMessage>();
        let pending: Pending = Arc::new(StdMutex::new(HashMap::new()));
        let closing = Arc::new(AtomicBool::new(false));

        let writer = tokio::spawn(async move {
            while let Some(msg) = out_rx.recv().await {
                let json = match serde_json::to_string(&msg) {
                    Ok(json) => json,
                    Err(e) => {
                        warn!(error = %e, "failed to encode sidecar message");
                        continue;
                    },
                };
                if let Err(e) = sink.send(Message::Text(json.into())).await {
                    warn!(error = %e, "failed to write to sidecar");
                    break;
                }
            }
            let _ = sink.close().await;
        });

        let reader = {
            let account_id = self.account_id.clone();
            let pending = Arc::clone(&pending);
            let closing = Arc::clone(&closing);
            tokio::spawn(async move {
                while let Some(frame) = stream.next().await {
                    let text = match frame {
                        Ok(Message::Text(text)) => text,
                        Ok(Message::Close(_)) => break,
                        Ok(_) => continue,
                        Err(e) => {
                            warn!(error = %e, "sidecar socket error");
                            break;
                        },
                    };
                    match serde_json::from_str::<SidecarMessage>(text.as_str()) {
                        Ok(msg) => dispatch(msg, &account_id, &events, &pending, &closing),
                        Err(e) => debug!(error = %e, "ignoring unrecognised sidecar message"),
                    }
                    if closing.load(Ordering::SeqCst) {
                        break;
                    }
                }
                pending.lock().unwrap_or_else(|e| e.into_inner()).clear();
                if !closing.swap(true, Ordering::SeqCst) {
                    events.emit(SessionEvent::Close {
                        reason: DisconnectReason::ConnectionLost,
                    });
                }
            })
        };

        let session = SidecarSession {
            account_id: self.account_id.clone(),
            out: out_tx,
            pending,
            closing,
            tasks: StdMutex::new(vec![writer, reader]),
            request_timeout: self.request_timeout,
        };

        session.push(GatewayMessage::Login {
            account_id: self.account_id.clone(),
            credentials: request.credentials,
            pairing_phone: request.login.pairing_phone().map(str::to_owned),
            browser: self.browser.clone(),
        })?;
        info!(
            account_id = %self.account_id,
            generation = request.generation,
            "requested WhatsApp login from sidecar"
        );

        Ok(Arc::new(session))
    }
}

// ── Session ─────────────────────────────────────────────────────────────────

enum Reply {
    Sent {
        success: bool,
        message_id: Option<String>,
        error: Option<String>,
    },
    Checked {
        exists: bool,
        error: Option<String>,
    },
}

type Pending = Arc<StdMutex<HashMap<String, oneshot::Sender<Reply>>>>;

fn dispatch(
    msg: SidecarMessage,
    account_id: &str,
    events: &EventSender,
    pending: &Pending,
    closing: &AtomicBool,
) {
    let take = |request_id: &str| {
        pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(request_id)
    };

    match msg {
        SidecarMessage::SendResult {
            request_id,
            success,
            message_id,
            error,
        } => {
            if let Some(tx) = take(&request_id) {
                let _ = tx.send(Reply::Sent {
                    success,
                    message_id,
                    error,
                });
            }
        },
        SidecarMessage::CheckNumberResult {
            request_id,
            exists,
            error,
        } => {
            if let Some(tx) = take(&request_id) {
                let _ = tx.send(Reply::Checked { exists, error });
            }
        },
        SidecarMessage::Error { account_id: id, error } => {
            warn!(account_id = ?id, %error, "sidecar reported an error");
        },
        SidecarMessage::Qr { account_id: id, qr } if id == account_id => {
            events.emit(SessionEvent::Qr(qr));
        },
        SidecarMessage::PairingCode { account_id: id, code } if id == account_id => {
            events.emit(SessionEvent::PairingCode(code));
        },
        SidecarMessage::Connected { account_id: id, jid } if id == account_id => {
            events.emit(SessionEvent::Open { own_jid: jid });
        },
        SidecarMessage::CredsUpdate { account_id: id, delta } if id == account_id => {
            events.emit(SessionEvent::CredsUpdate(delta));
        },
        SidecarMessage::Disconnected {
            account_id: id,
            status_code,
            reason,
        } if id == account_id => {
            debug!(?status_code, ?reason, "sidecar reported disconnect");
            if !closing.swap(true, Ordering::SeqCst) {
                events.emit(SessionEvent::Close {
                    reason: DisconnectReason::from_status_code(status_code),
                });
            }
        },
        other => debug!(?other, "ignoring message for another account"),
    }
}

/// One login on the sidecar.
pub struct SidecarSession {
    account_id: String,
    out: mpsc::UnboundedSender<GatewayMessage>,
    pending: Pending,
    closing: Arc<AtomicBool>,
    tasks: StdMutex<Vec<JoinHandle<()>>>,
    request_timeout: Duration,
}

impl SidecarSession {
    fn push(&self, msg: GatewayMessage) -> Result<()> {
        self.out
            .send(msg)
            .map_err(|_| Error::message("sidecar connection is closed"))
    }

    async fn request(&self, build: impl FnOnce(String) -> GatewayMessage) -> Result<Reply> {
        let request_id = uuid::Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();
        self.pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(request_id.clone(), tx);

        if let Err(e) = self.push(build(request_id.clone())) {
            self.forget(&request_id);
            return Err(e);
        }

        match tokio::time::timeout(self.request_timeout, rx).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(_)) => Err(Error::send_failed("sidecar connection closed")),
            Err(_) => {
                self.forget(&request_id);
                Err(Error::Timeout {
                    seconds: self.request_timeout.as_secs(),
                })
            },
        }
    }

    fn forget(&self, request_id: &str) {
        self.pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(request_id);
    }

    fn receipt(reply: Reply) -> Result<Receipt> {
        match reply {
            Reply::Sent {
                success: true,
                message_id,
                ..
            } => Ok(Receipt { message_id }),
            Reply::Sent { error, .. } => Err(Error::send_failed(
                error.unwrap_or_else(|| "sidecar refused the message".into()),
            )),
            Reply::Checked { .. } => Err(Error::message("mismatched sidecar reply")),
        }
    }
}

#[async_trait]
impl SessionHandle for SidecarSession {
    async fn send_text(&self, to: &str, text: &str) -> Result<Receipt> {
        let reply = self
            .request(|request_id| GatewayMessage::SendText {
                request_id,
                account_id: self.account_id.clone(),
                to: to.to_owned(),
                text: text.to_owned(),
            })
            .await?;
        Self::receipt(reply)
    }

    async fn send_document(&self, to: &str, document: &OutboundDocument) -> Result<Receipt> {
        let data_base64 = STANDARD.encode(&document.bytes);
        let reply = self
            .request(|request_id| GatewayMessage::SendDocument {
                request_id,
                account_id: self.account_id.clone(),
                to: to.to_owned(),
                data_base64,
                file_name: document.file_name.clone(),
                mimetype: document.mimetype.clone(),
                caption: document.caption.clone(),
            })
            .await?;
        Self::receipt(reply)
    }

    async fn check_number(&self, phone: &str) -> Result<bool> {
        let reply = self
            .request(|request_id| GatewayMessage::CheckNumber {
                request_id,
                account_id: self.account_id.clone(),
                phone: phone.to_owned(),
            })
            .await?;
        match reply {
            Reply::Checked { error: Some(e), .. } => Err(Error::message(e)),
            Reply::Checked { exists, .. } => Ok(exists),
            Reply::Sent { .. } => Err(Error::message("mismatched sidecar reply")),
        }
    }

    async fn logout(&self) -> Result<()> {
        self.push(GatewayMessage::Logout {
            account_id: self.account_id.clone(),
        })
    }

    async fn close(&self) {
        self.closing.store(true, Ordering::SeqCst);
        // Give a just-queued logout a moment to reach the socket.
        tokio::time::sleep(Duration::from_millis(50)).await;
        let tasks = std::mem::take(&mut *self.tasks.lock().unwrap_or_else(|e| e.into_inner()));
        for task in tasks {
            task.abort();
        }
        self.pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use {
        super::*,
        serde_json::{Value, json},
        tokio::net::TcpListener,
        tokio_tungstenite::accept_async,
    };

    use crate::{credentials::Credentials, types::LoginMethod};

    /// Accept one socket and hand both halves to the test.
    async fn fake_sidecar() -> (u16, JoinHandle<WebSocketStream<TcpStream>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let accept = tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            accept_async(tcp).await.unwrap()
        });
        (port, accept)
    }

    async fn next_json(ws: &mut WebSocketStream<TcpStream>) -> Value {
        loop {
            match ws.next().await.unwrap().unwrap() {
                Message::Text(text) => return serde_json::from_str(text.as_str()).unwrap(),
                _ => continue,
            }
        }
    }

    async fn send_json(ws: &mut WebSocketStream<TcpStream>, value: Value) {
        ws.send(Message::Text(value.to_string().into())).await.unwrap();
    }

    #[tokio::test]
    async fn login_events_and_requests_round_trip() {
        let (port, accept) = fake_sidecar().await;
        let (tx, mut rx) = mpsc::unbounded_channel();
        let connector = SidecarConnector::new(port, "main").with_browser("Test");
        let mut creds = Credentials::new();
        creds.insert("creds".into(), json!({"me": "1"}));

        let handle = connector
            .connect(
                ConnectRequest {
                    generation: 7,
                    credentials: creds,
                    login: LoginMethod::PairingCode {
                        phone: "15550001111".into(),
                    },
                },
                EventSender::new(7, tx),
            )
            .await
            .unwrap();
        let mut ws = accept.await.unwrap();

        let login = next_json(&mut ws).await;
        assert_eq!(login["type"], "login");
        assert_eq!(login["account_id"], "main");
        assert_eq!(login["pairing_phone"], "15550001111");
        assert_eq!(login["browser"], "Test");
        assert_eq!(login["credentials"]["creds"]["me"], "1");

        send_json(&mut ws, json!({"type": "pairing_code", "account_id": "other", "code": "X"})).await;
        send_json(&mut ws, json!({"type": "pairing_code", "account_id": "main", "code": "ABCD1234"})).await;
        send_json(&mut ws, json!({"type": "connected", "account_id": "main", "jid": "1@s.whatsapp.net"})).await;

        assert_eq!(
            rx.recv().await.unwrap(),
            (7, SessionEvent::PairingCode("ABCD1234".into()))
        );
        assert_eq!(
            rx.recv().await.unwrap(),
            (7, SessionEvent::Open {
                own_jid: Some("1@s.whatsapp.net".into())
            })
        );

        let send = tokio::spawn({
            let handle = Arc::clone(&handle);
            async move {
                handle
                    .send_document("2@s.whatsapp.net", &OutboundDocument {
                        bytes: b"BEGIN:VCARD".to_vec(),
                        file_name: "contacts.vcf".into(),
                        mimetype: "text/vcard".into(),
                        caption: None,
                    })
                    .await
            }
        });
        let request = next_json(&mut ws).await;
        assert_eq!(request["type"], "send_document");
        assert_eq!(request["data_base64"], STANDARD.encode(b"BEGIN:VCARD"));
        send_json(
            &mut ws,
            json!({"type": "send_result", "request_id": request["request_id"], "success": true, "message_id": "M1"}),
        )
        .await;
        let receipt = send.await.unwrap().unwrap();
        assert_eq!(receipt.message_id.as_deref(), Some("M1"));

        send_json(
            &mut ws,
            json!({"type": "disconnected", "account_id": "main", "status_code": 401}),
        )
        .await;
        assert_eq!(
            rx.recv().await.unwrap(),
            (7, SessionEvent::Close {
                reason: DisconnectReason::LoggedOut
            })
        );
        handle.close().await;
    }

    #[tokio::test]
    async fn dropped_socket_reports_connection_lost() {
        let (port, accept) = fake_sidecar().await;
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _handle = SidecarConnector::new(port, "main")
            .connect(
                ConnectRequest {
                    generation: 1,
                    credentials: Credentials::new(),
                    login: LoginMethod::Qr,
                },
                EventSender::new(1, tx),
            )
            .await
            .unwrap();
        let mut ws = accept.await.unwrap();
        let _ = next_json(&mut ws).await;
        drop(ws);

        let (_, event) = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event, SessionEvent::Close {
            reason: DisconnectReason::ConnectionLost
        });
    }

    #[tokio::test]
    async fn failed_send_is_reported() {
        let (port, accept) = fake_sidecar().await;
        let (tx, _rx) = mpsc::unbounded_channel();
        let handle = SidecarConnector::new(port, "main")
            .connect(
                ConnectRequest {
                    generation: 1,
                    credentials: Credentials::new(),
                    login: LoginMethod::Qr,
                },
                EventSender::new(1, tx),
            )
            .await
            .unwrap();
        let mut ws = accept.await.unwrap();
        let _ = next_json(&mut ws).await;

        let send = tokio::spawn({
            let handle = Arc::clone(&handle);
            async move { handle.send_text("2@s.whatsapp.net", "hi").await }
        });
        let request = next_json(&mut ws).await;
        send_json(
            &mut ws,
            json!({"type": "send_result", "request_id": request["request_id"], "success": false, "error": "not on whatsapp"}),
        )
        .await;
        let err = send.await.unwrap().unwrap_err();
        assert!(matches!(err, Error::SendFailed { reason } if reason == "not on whatsapp"));
        handle.close().await;
    }
}
