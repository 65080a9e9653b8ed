//! Boundary to the remote service.
//!
//! A [`Dispatcher`] is the raw transport: action name + parameter map in,
//! `{success, ...}` JSON out. [`Client`] sits on top of it, encodes typed
//! [`Action`]s and validates every reply into a typed [`Reply`], so nothing
//! past this module handles free-form maps.

mod action;

pub use action::{Action, BulkOutcome, Reply};

use futures::future::BoxFuture;
use log::debug;
use serde_json::Value;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use uuid::Uuid;

use crate::error::{Result, SyncError};
use crate::model::{AttendanceRecord, ClassStat, ClassSummary, LeaderboardEntry, Scope, StatusMark};

pub type Params = serde_json::Map<String, Value>;

pub trait Dispatcher: Send + Sync {
    /// Returns the reply object, or an error if the call could not be made at
    /// all. Logical failures come back as `Ok({"success": false, ...})`.
    fn dispatch<'a>(
        &'a self,
        session: &'a Session,
        action: &'a str,
        params: Params,
    ) -> BoxFuture<'a, anyhow::Result<Value>>;
}

/// Per-view calling context: who is calling and with which credential.
/// Passed explicitly so independent views and tests never share state.
pub struct Session {
    label: String,
    credential: Option<String>,
    sent: AtomicU64,
}

impl Session {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            credential: None,
            sent: AtomicU64::new(0),
        }
    }

    pub fn with_credential(mut self, credential: impl Into<String>) -> Self {
        self.credential = Some(credential.into());
        self
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn credential(&self) -> Option<&str> {
        self.credential.as_deref()
    }

    pub fn next_request_id(&self) -> String {
        self.sent.fetch_add(1, Ordering::SeqCst);
        Uuid::new_v4().to_string()
    }

    pub fn requests_sent(&self) -> u64 {
        self.sent.load(Ordering::SeqCst)
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("label", &self.label)
            .field("credential", &self.credential.as_ref().map(|_| "<redacted>"))
            .field("sent", &self.requests_sent())
            .finish()
    }
}

#[derive(Clone)]
pub struct Client {
    dispatcher: Arc<dyn Dispatcher>,
    session: Arc<Session>,
}

impl Client {
    pub fn new(dispatcher: Arc<dyn Dispatcher>, session: Session) -> Self {
        Self {
            dispatcher,
            session: Arc::new(session),
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub async fn call(&self, action: Action) -> Result<Reply> {
        let name = action.name();
        let request_id = self.session.next_request_id();
        debug!("dispatch {} ({})", name, request_id);
        let raw = self
            .dispatcher
            .dispatch(&self.session, name, action.params())
            .await
            .map_err(|e| SyncError::Transport(format!("{e:#}")))?;
        check_success(name, &raw)?;
        Reply::decode(&action, raw)
    }

    pub async fn attendance(&self, scope: Scope) -> Result<Vec<AttendanceRecord>> {
        match self.call(Action::ListAttendance(scope)).await? {
            Reply::Attendance(v) => Ok(v),
            other => Err(unexpected("attendance.list", &other)),
        }
    }

    pub async fn class_stat(&self, class_id: String) -> Result<ClassStat> {
        match self.call(Action::ClassStat { class_id }).await? {
            Reply::ClassStat(v) => Ok(v),
            other => Err(unexpected("stats.class", &other)),
        }
    }

    pub async fn bulk_set_status(
        &self,
        date: chrono::NaiveDate,
        marks: Vec<StatusMark>,
    ) -> Result<BulkOutcome> {
        match self.call(Action::BulkSetStatus { date, marks }).await? {
            Reply::BulkSet(v) => Ok(v),
            other => Err(unexpected("attendance.bulkSet", &other)),
        }
    }

    pub async fn leaderboard(&self, class_id: Option<String>) -> Result<Vec<LeaderboardEntry>> {
        match self.call(Action::ListLeaderboard { class_id }).await? {
            Reply::Leaderboard(v) => Ok(v),
            other => Err(unexpected("leaderboard.list", &other)),
        }
    }

    pub async fn classes(&self) -> Result<Vec<ClassSummary>> {
        match self.call(Action::ListClasses).await? {
            Reply::Classes(v) => Ok(v),
            other => Err(unexpected("classes.list", &other)),
        }
    }
}

fn unexpected(action: &str, reply: &Reply) -> SyncError {
    SyncError::malformed(action, format!("unexpected reply variant {:?}", reply.kind()))
}

/// Normalizes the `success` flag and the error shapes seen in practice
/// (`"error": "text"` and `"error": {code, message}`).
fn check_success(action: &str, raw: &Value) -> Result<()> {
    let Some(success) = raw.get("success").and_then(Value::as_bool) else {
        return Err(SyncError::malformed(action, "missing success flag"));
    };
    if success {
        return Ok(());
    }
    let error = raw.get("error");
    let (code, message) = match error {
        Some(Value::String(msg)) => ("remote_error".to_string(), msg.clone()),
        Some(Value::Object(obj)) => (
            obj.get("code")
                .and_then(Value::as_str)
                .unwrap_or("remote_error")
                .to_string(),
            obj.get("message")
                .and_then(Value::as_str)
                .unwrap_or("unknown error")
                .to_string(),
        ),
        _ => ("remote_error".to_string(), "unknown error".to_string()),
    };
    Err(SyncError::Remote { code, message })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;

    struct Canned {
        reply: Mutex<Option<anyhow::Result<Value>>>,
    }

    impl Dispatcher for Canned {
        fn dispatch<'a>(
            &'a self,
            _session: &'a Session,
            _action: &'a str,
            _params: Params,
        ) -> BoxFuture<'a, anyhow::Result<Value>> {
            let reply = self
                .reply
                .lock()
                .expect("lock")
                .take()
                .unwrap_or_else(|| Ok(json!({ "success": true })));
            Box::pin(async move { reply })
        }
    }

    fn client(reply: anyhow::Result<Value>) -> Client {
        Client::new(
            Arc::new(Canned {
                reply: Mutex::new(Some(reply)),
            }),
            Session::new("test").with_credential("secret"),
        )
    }

    #[tokio::test]
    async fn string_error_is_normalized() {
        let c = client(Ok(json!({ "success": false, "error": "quota exceeded" })));
        let err = c.classes().await.expect_err("remote failure");
        assert_eq!(err, SyncError::remote("remote_error", "quota exceeded"));
    }

    #[tokio::test]
    async fn object_error_keeps_code() {
        let c = client(Ok(json!({
            "success": false,
            "error": { "code": "not_found", "message": "class not found" }
        })));
        let err = c.class_stat("c9".into()).await.expect_err("remote failure");
        assert_eq!(err.code(), "not_found");
    }

    #[tokio::test]
    async fn transport_errors_become_sync_errors() {
        let c = client(Err(anyhow::anyhow!("connection refused")));
        let err = c.classes().await.expect_err("transport failure");
        assert!(matches!(err, SyncError::Transport(ref m) if m.contains("connection refused")));
    }

    #[tokio::test]
    async fn missing_success_flag_is_malformed() {
        let c = client(Ok(json!({ "classes": [] })));
        let err = c.classes().await.expect_err("malformed");
        assert_eq!(err.code(), "malformed_reply");
    }

    #[test]
    fn session_debug_hides_credential() {
        let s = Session::new("view").with_credential("token-123");
        s.next_request_id();
        let shown = format!("{:?}", s);
        assert!(!shown.contains("token-123"));
        assert_eq!(s.requests_sent(), 1);
        assert_eq!(s.credential(), Some("token-123"));
    }
}
