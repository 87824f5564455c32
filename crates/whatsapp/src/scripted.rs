//! In-process connector driven by the caller, for tests and local runs
//! without a sidecar.

use std::{
    collections::HashSet,
    sync::{
        Arc, Mutex as StdMutex,
        atomic::{AtomicBool, Ordering},
    },
};

use async_trait::async_trait;

use crate::{
    Error, Result,
    connector::{ConnectRequest, EventSender, SessionConnector, SessionHandle},
    types::{OutboundDocument, Receipt, SessionEvent},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SentMessage {
    Text {
        to: String,
        text: String,
    },
    Document {
        to: String,
        file_name: String,
        mimetype: String,
        bytes: Vec<u8>,
        caption: Option<String>,
    },
}

impl SentMessage {
    pub fn to(&self) -> &str {
        match self {
            Self::Text { to, .. } | Self::Document { to, .. } => to,
        }
    }
}

#[derive(Default)]
struct Script {
    /// `Some(jid)` opens every new session immediately.
    open_with: Option<Option<String>>,
    failures_left: usize,
    registered: Option<HashSet<String>>,
    failing_sends: bool,
    requests: Vec<ConnectRequest>,
    sessions: Vec<Arc<ScriptedSession>>,
}

#[derive(Default)]
pub struct ScriptedConnector {
    script: StdMutex<Script>,
}

impl ScriptedConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open each session as soon as it is created.
    pub fn opening_with(self, own_jid: Option<&str>) -> Self {
        self.edit(|s| s.open_with = Some(own_jid.map(str::to_owned)));
        self
    }

    /// Fail the next `n` connection attempts.
    pub fn failing(self, n: usize) -> Self {
        self.edit(|s| s.failures_left = n);
        self
    }

    /// Only these digit strings are reported as WhatsApp accounts. Without
    /// this every number is.
    pub fn with_registered_numbers<I, S>(self, numbers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let numbers = numbers.into_iter().map(Into::into).collect();
        self.edit(|s| s.registered = Some(numbers));
        self
    }

    /// Every send on every session fails.
    pub fn with_failing_sends(self) -> Self {
        self.edit(|s| s.failing_sends = true);
        self
    }

    /// Connection attempts so far, failed ones included.
    pub fn connect_count(&self) -> usize {
        self.lock().requests.len()
    }

    pub fn requests(&self) -> Vec<ConnectRequest> {
        self.lock().requests.clone()
    }

    pub fn last_session(&self) -> Option<Arc<ScriptedSession>> {
        self.lock().sessions.last().cloned()
    }

    pub fn sessions(&self) -> Vec<Arc<ScriptedSession>> {
        self.lock().sessions.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn edit(&self, f: impl FnOnce(&mut Script)) {
        f(&mut self.lock());
    }
}

#[async_trait]
impl SessionConnector for ScriptedConnector {
    async fn connect(
        &self,
        request: ConnectRequest,
        events: EventSender,
    ) -> Result<Arc<dyn SessionHandle>> {
        let mut script = self.lock();
        script.requests.push(request);
        if script.failures_left > 0 {
            script.failures_left -= 1;
            return Err(Error::message("scripted connection failure"));
        }

        let session = Arc::new(ScriptedSession {
            events,
            registered: script.registered.clone(),
            failing_sends: script.failing_sends,
            sent: StdMutex::new(Vec::new()),
            closed: AtomicBool::new(false),
            logged_out: AtomicBool::new(false),
        });
        if let Some(own_jid) = &script.open_with {
            session.emit(SessionEvent::Open {
                own_jid: own_jid.clone(),
            });
        }
        script.sessions.push(Arc::clone(&session));
        Ok(session)
    }
}

pub struct ScriptedSession {
    events: EventSender,
    registered: Option<HashSet<String>>,
    failing_sends: bool,
    sent: StdMutex<Vec<SentMessage>>,
    closed: AtomicBool,
    logged_out: AtomicBool,
}

impl ScriptedSession {
    /// Deliver `event` as if the backend produced it.
    pub fn emit(&self, event: SessionEvent) -> bool {
        self.events.emit(event)
    }

    pub fn generation(&self) -> u64 {
        self.events.generation()
    }

    pub fn sent(&self) -> Vec<SentMessage> {
        self.sent.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn is_logged_out(&self) -> bool {
        self.logged_out.load(Ordering::SeqCst)
    }

    fn record(&self, message: SentMessage) -> Result<Receipt> {
        if self.is_closed() {
            return Err(Error::send_failed("connection closed"));
        }
        if self.failing_sends {
            return Err(Error::send_failed("scripted send failure"));
        }
        let mut sent = self.sent.lock().unwrap_or_else(|e| e.into_inner());
        sent.push(message);
        Ok(Receipt {
            message_id: Some(format!("scripted-{}", sent.len())),
        })
    }
}

#[async_trait]
impl SessionHandle for ScriptedSession {
    async fn send_text(&self, to: &str, text: &str) -> Result<Receipt> {
        self.record(SentMessage::Text {
            to: to.to_owned(),
            text: text.to_owned(),
        })
    }

    async fn send_document(&self, to: &str, document: &OutboundDocument) -> Result<Receipt> {
        self.record(SentMessage::Document {
            to: to.to_owned(),
            file_name: document.file_name.clone(),
            mimetype: document.mimetype.clone(),
            bytes: document.bytes.clone(),
            caption: document.caption.clone(),
        })
    }

    async fn check_number(&self, phone: &str) -> Result<bool> {
        Ok(self
            .registered
            .as_ref()
            .is_none_or(|numbers| numbers.contains(phone)))
    }

    async fn logout(&self) -> Result<()> {
        self.logged_out.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}
