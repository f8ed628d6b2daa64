use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::futures::Notified;
use tokio::sync::Notify;
use tracing::{debug, info};
use uuid::Uuid;

use kestrel_core::config::WhitelistScope;
use kestrel_core::error::{KestrelError, Result};

use crate::clock::{Clock, SystemClock};
use crate::log::RecordLog;
use crate::paths::extract_paths;
use crate::record::{ApprovalRecord, ApprovalRequest, Decision};
use crate::whitelist::{scope_key, Whitelist};

/// Approver recorded on whitelist auto-approvals.
pub const AUTO_APPROVER: &str = "whitelist";

struct QueueState {
    log: RecordLog,
    records: HashMap<String, ApprovalRecord>,
    /// Record ids in request order.
    order: Vec<String>,
    closed: bool,
}

impl QueueState {
    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(KestrelError::QueueClosed);
        }
        Ok(())
    }

    fn insert(&mut self, record: ApprovalRecord) {
        if !self.records.contains_key(&record.id) {
            self.order.push(record.id.clone());
        }
        self.records.insert(record.id.clone(), record);
    }

    fn pending_for(&self, id: &str) -> Result<&ApprovalRecord> {
        let record = self
            .records
            .get(id)
            .ok_or_else(|| KestrelError::RecordNotFound(id.to_string()))?;
        if record.decision.is_terminal() {
            return Err(KestrelError::AlreadyDecided {
                id: id.to_string(),
                decision: record.decision.to_string(),
            });
        }
        Ok(record)
    }

    fn ordered(&self) -> impl Iterator<Item = &ApprovalRecord> {
        self.order.iter().filter_map(|id| self.records.get(id))
    }
}

/// Owns the approval record lifecycle on top of a [`RecordLog`] and a [`Whitelist`].
///
/// Every mutation is appended to the log while the record map is locked and
/// before the in-memory state changes, so a failed write leaves the queue as
/// it was and the caller sees the error.
pub struct ApprovalQueue {
    state: Mutex<QueueState>,
    whitelist: Whitelist,
    clock: Arc<dyn Clock>,
    scope: WhitelistScope,
    decided: Notify,
}

impl ApprovalQueue {
    /// Build a queue from an opened log, recovering its records and any
    /// whitelist entries granted by approvals that carried a TTL.
    pub fn new(mut log: RecordLog, whitelist: Whitelist) -> Self {
        let replayed = log.take_replayed();
        let mut state = QueueState {
            log,
            records: HashMap::new(),
            order: Vec::new(),
            closed: false,
        };
        for record in replayed {
            state.insert(record);
        }

        let queue = Self {
            state: Mutex::new(state),
            whitelist,
            clock: Arc::new(SystemClock),
            scope: WhitelistScope::default(),
            decided: Notify::new(),
        };
        queue.restore_whitelist();

        let state = queue.lock();
        info!(
            records = state.records.len(),
            pending = state.ordered().filter(|r| r.is_pending()).count(),
            "Approval queue ready"
        );
        drop(state);
        queue
    }

    /// Replace the clock (tests drive expiry with a `ManualClock`).
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Change the whitelist scope. The whitelist is rebuilt from the
    /// recovered records under the new keys.
    pub fn with_scope(mut self, scope: WhitelistScope) -> Self {
        if scope != self.scope {
            self.scope = scope;
            self.whitelist.clear();
            self.restore_whitelist();
        }
        self
    }

    /// Replay TTL approvals in decision order. Each one replaces the entry
    /// for its scope, as `approve` did when it was granted, so a later,
    /// shorter approval wins here too.
    fn restore_whitelist(&self) {
        let state = self.lock();
        let mut grants: Vec<&ApprovalRecord> = state
            .ordered()
            .filter(|r| r.decision == Decision::Approved && r.expires_at.is_some())
            .collect();
        grants.sort_by_key(|r| r.approved_at);

        let restored = grants.len();
        for record in grants {
            if let Some(expires_at) = record.expires_at {
                self.whitelist
                    .grant(scope_key(self.scope, &record.session_id, &record.tool), expires_at);
            }
        }
        if restored > 0 {
            debug!(entries = restored, "Whitelist restored from record log");
        }
    }

    pub fn scope(&self) -> WhitelistScope {
        self.scope
    }

    pub fn whitelist(&self) -> &Whitelist {
        &self.whitelist
    }

    /// Submit a request. Returns the record and whether it was auto-approved.
    pub fn request(
        &self,
        session_id: &str,
        tool: &str,
        params: serde_json::Value,
    ) -> Result<(ApprovalRecord, bool)> {
        self.submit(&ApprovalRequest::new(session_id, tool).with_params(params))
    }

    /// Submit a full [`ApprovalRequest`], reason included.
    ///
    /// If the whitelist covers the scope the record is created Approved with
    /// `auto = true`; otherwise it is created Pending. Either way it is on
    /// disk before this returns.
    pub fn submit(&self, request: &ApprovalRequest) -> Result<(ApprovalRecord, bool)> {
        let session_id = request.session_id.trim();
        if session_id.is_empty() {
            return Err(KestrelError::Validation(
                "session id must not be empty".to_string(),
            ));
        }
        let tool = request.tool.trim();
        if tool.is_empty() {
            return Err(KestrelError::Validation(
                "tool command must not be empty".to_string(),
            ));
        }

        let now = self.clock.now();
        let whitelisted_until = self
            .whitelist
            .expiry(&scope_key(self.scope, session_id, tool), now);

        let mut record = ApprovalRecord {
            id: Uuid::new_v4().to_string(),
            session_id: session_id.to_string(),
            tool: tool.to_string(),
            params: request.params.clone(),
            paths: extract_paths(&request.params),
            decision: Decision::Pending,
            requested_at: now,
            approved_at: None,
            denied_at: None,
            approver: None,
            reason: request.reason.clone(),
            comment: None,
            auto: false,
            expires_at: None,
        };
        if let Some(until) = whitelisted_until {
            record.decision = Decision::Approved;
            record.approved_at = Some(now);
            record.approver = Some(AUTO_APPROVER.to_string());
            record.comment = Some(format!("whitelisted until {}", until.to_rfc3339()));
            record.auto = true;
        }

        let mut state = self.lock();
        state.ensure_open()?;
        state.log.append(&record)?;
        state.insert(record.clone());
        drop(state);

        if record.auto {
            info!(record_id = %record.id, session = %record.session_id, tool = %record.tool, "Auto-approved from whitelist");
        } else {
            info!(record_id = %record.id, session = %record.session_id, tool = %record.tool, "Approval requested");
        }
        Ok((record.clone(), record.auto))
    }

    /// Approve a pending record. A non-zero `ttl` whitelists the record's
    /// scope until `now + ttl`.
    pub fn approve(&self, id: &str, approver: &str, ttl: Duration) -> Result<ApprovalRecord> {
        self.approve_with_comment(id, approver, None, ttl)
    }

    pub fn approve_with_comment(
        &self,
        id: &str,
        approver: &str,
        comment: Option<&str>,
        ttl: Duration,
    ) -> Result<ApprovalRecord> {
        let approver = require_approver(approver)?;
        let now = self.clock.now();
        let expires_at = if ttl.is_zero() {
            None
        } else {
            let ttl = chrono::Duration::from_std(ttl)
                .map_err(|_| KestrelError::Validation(format!("ttl out of range: {:?}", ttl)))?;
            Some(
                now.checked_add_signed(ttl)
                    .ok_or_else(|| KestrelError::Validation("ttl out of range".to_string()))?,
            )
        };

        let mut state = self.lock();
        state.ensure_open()?;
        let mut updated = state.pending_for(id)?.clone();
        updated.decision = Decision::Approved;
        updated.approved_at = Some(now);
        updated.approver = Some(approver.to_string());
        if let Some(comment) = comment.filter(|c| !c.trim().is_empty()) {
            updated.comment = Some(comment.to_string());
        }
        updated.expires_at = expires_at;

        state.log.append(&updated)?;
        state.insert(updated.clone());
        if let Some(expires_at) = expires_at {
            self.whitelist.grant(
                scope_key(self.scope, &updated.session_id, &updated.tool),
                expires_at,
            );
        }
        drop(state);

        self.decided.notify_waiters();
        info!(
            record_id = %updated.id,
            approver = %approver,
            whitelisted = expires_at.is_some(),
            "Approval granted"
        );
        Ok(updated)
    }

    /// Deny a pending record.
    pub fn deny(&self, id: &str, approver: &str, reason: &str) -> Result<ApprovalRecord> {
        let approver = require_approver(approver)?;
        let now = self.clock.now();

        let mut state = self.lock();
        state.ensure_open()?;
        let mut updated = state.pending_for(id)?.clone();
        updated.decision = Decision::Denied;
        updated.denied_at = Some(now);
        updated.approver = Some(approver.to_string());
        if !reason.trim().is_empty() {
            updated.comment = Some(reason.to_string());
        }

        state.log.append(&updated)?;
        state.insert(updated.clone());
        drop(state);

        self.decided.notify_waiters();
        info!(record_id = %updated.id, approver = %approver, "Approval denied");
        Ok(updated)
    }

    /// Look up a record by id.
    pub fn get(&self, id: &str) -> Result<Option<ApprovalRecord>> {
        let state = self.lock();
        state.ensure_open()?;
        Ok(state.records.get(id).cloned())
    }

    /// Resolve a record id from a unique prefix (operators type short ids).
    pub fn find_by_prefix(&self, prefix: &str) -> Result<Option<String>> {
        let state = self.lock();
        state.ensure_open()?;
        if prefix.is_empty() {
            return Ok(None);
        }
        if state.records.contains_key(prefix) {
            return Ok(Some(prefix.to_string()));
        }
        let mut matches = state.order.iter().filter(|id| id.starts_with(prefix));
        match (matches.next(), matches.next()) {
            (Some(id), None) => Ok(Some(id.clone())),
            (None, _) => Ok(None),
            (Some(_), Some(_)) => Err(KestrelError::Validation(format!(
                "record id prefix '{}' is ambiguous",
                prefix
            ))),
        }
    }

    /// Pending records for a session, in request order. Returns clones.
    pub fn list_pending(&self, session_id: &str) -> Result<Vec<ApprovalRecord>> {
        let state = self.lock();
        state.ensure_open()?;
        Ok(state
            .ordered()
            .filter(|r| r.is_pending() && r.session_id == session_id)
            .cloned()
            .collect())
    }

    /// Pending records across all sessions, in request order.
    pub fn list_all_pending(&self) -> Result<Vec<ApprovalRecord>> {
        let state = self.lock();
        state.ensure_open()?;
        Ok(state.ordered().filter(|r| r.is_pending()).cloned().collect())
    }

    /// Every record of a session regardless of decision, in request order.
    pub fn records(&self, session_id: &str) -> Result<Vec<ApprovalRecord>> {
        let state = self.lock();
        state.ensure_open()?;
        Ok(state
            .ordered()
            .filter(|r| r.session_id == session_id)
            .cloned()
            .collect())
    }

    /// Whether a live whitelist entry covers the session.
    ///
    /// Under `SessionTool` scope this is true when any tool of the session is
    /// covered; use [`is_tool_whitelisted`](Self::is_tool_whitelisted) for a
    /// precise answer.
    pub fn is_whitelisted(&self, session_id: &str) -> bool {
        self.whitelist.covers_session(session_id, self.clock.now())
    }

    /// Whether a `request(session_id, tool, ..)` made now would auto-approve.
    pub fn is_tool_whitelisted(&self, session_id: &str, tool: &str) -> bool {
        self.whitelist
            .covers(&scope_key(self.scope, session_id, tool), self.clock.now())
    }

    /// A future that resolves on the next approve/deny/close.
    ///
    /// Create it (and `enable` it) before checking a record to avoid missing
    /// a decision that lands in between.
    pub fn decided(&self) -> Notified<'_> {
        self.decided.notified()
    }

    /// Rewrite the log with one line per record.
    pub fn compact(&self) -> Result<()> {
        let mut state = self.lock();
        state.ensure_open()?;
        let records: Vec<ApprovalRecord> = state.ordered().cloned().collect();
        state.log.compact(&records)
    }

    /// Flush and close the log. Later operations fail with `QueueClosed`.
    pub fn close(&self) -> Result<()> {
        let mut state = self.lock();
        if state.closed {
            return Ok(());
        }
        state.closed = true;
        let result = state.log.close();
        drop(state);
        self.decided.notify_waiters();
        debug!("Approval queue closed");
        result
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn require_approver(approver: &str) -> Result<&str> {
    let approver = approver.trim();
    if approver.is_empty() {
        return Err(KestrelError::Validation(
            "approver must not be empty".to_string(),
        ));
    }
    Ok(approver)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use chrono::{TimeZone, Utc};
    use serde_json::json;
    use std::path::PathBuf;

    fn new_test_queue(dir: &std::path::Path) -> (ApprovalQueue, Arc<ManualClock>) {
        let log = RecordLog::open(dir).unwrap();
        let clock = Arc::new(ManualClock::new(Utc.timestamp_opt(1_700_000_000, 0).unwrap()));
        let queue = ApprovalQueue::new(log, Whitelist::new()).with_clock(clock.clone());
        (queue, clock)
    }

    #[test]
    fn request_validation() {
        let dir = tempfile::tempdir().unwrap();
        let (q, _) = new_test_queue(dir.path());

        let err = q.request("", "ls", json!(null)).unwrap_err();
        assert!(err.to_string().contains("session id"));
        let err = q.request("sess", "   ", json!(null)).unwrap_err();
        assert!(err.to_string().contains("command"));

        let path = dir.path().join("dir").join("file.txt");
        let (rec, auto) = q
            .request("sess", "echo ok", json!(["", path.to_str().unwrap()]))
            .unwrap();
        assert!(!auto);
        assert_eq!(rec.decision, Decision::Pending);
        assert_eq!(rec.paths, vec![PathBuf::from(&path)]);
    }

    #[test]
    fn whitelisted_session_auto_approves() {
        let dir = tempfile::tempdir().unwrap();
        let (q, clock) = new_test_queue(dir.path());
        q.whitelist()
            .grant("sess", clock.now() + chrono::Duration::minutes(1));

        let (rec, auto) = q.request("sess", "rm", json!(null)).unwrap();
        assert!(auto);
        assert!(rec.auto);
        assert_eq!(rec.decision, Decision::Approved);
        assert!(rec.approved_at.is_some());
        assert!(rec.comment.as_deref().unwrap().contains("whitelisted"));
    }

    #[test]
    fn approve_flow_grants_whitelist() {
        let dir = tempfile::tempdir().unwrap();
        let (q, clock) = new_test_queue(dir.path());
        let (rec, _) = q
            .request("sess-1", "fs.write", json!({"path": "/tmp/data"}))
            .unwrap();

        let approved = q.approve(&rec.id, "alice", Duration::from_secs(60)).unwrap();
        assert_eq!(approved.decision, Decision::Approved);
        assert_eq!(approved.approver.as_deref(), Some("alice"));
        assert!(!approved.auto);
        assert_eq!(
            approved.expires_at,
            Some(clock.now() + chrono::Duration::seconds(60))
        );

        let (again, auto) = q
            .request("sess-1", "fs.write", json!({"path": "/tmp/data"}))
            .unwrap();
        assert!(auto);
        assert!(again.auto);
        assert_eq!(again.decision, Decision::Approved);

        clock.advance(Duration::from_secs(61));
        let (fresh, auto) = q.request("sess-1", "fs.write", json!(null)).unwrap();
        assert!(!auto);
        assert!(fresh.is_pending());

        let err = q.approve("missing", "ops", Duration::ZERO).unwrap_err();
        assert!(matches!(err, KestrelError::RecordNotFound(_)));
    }

    #[test]
    fn zero_ttl_does_not_whitelist() {
        let dir = tempfile::tempdir().unwrap();
        let (q, _) = new_test_queue(dir.path());
        let (rec, _) = q.request("s", "ls", json!(null)).unwrap();
        let approved = q.approve(&rec.id, "ops", Duration::ZERO).unwrap();
        assert!(approved.expires_at.is_none());
        assert!(!q.is_whitelisted("s"));
    }

    #[test]
    fn deny_is_terminal() {
        let dir = tempfile::tempdir().unwrap();
        let (q, _) = new_test_queue(dir.path());
        let (rec, _) = q.request("sess", "ls", json!(null)).unwrap();

        let denied = q.deny(&rec.id, "bob", "unsafe").unwrap();
        assert_eq!(denied.decision, Decision::Denied);
        assert_eq!(denied.comment.as_deref(), Some("unsafe"));
        assert!(denied.denied_at.is_some());

        let err = q.approve(&rec.id, "ops", Duration::ZERO).unwrap_err();
        assert!(matches!(err, KestrelError::AlreadyDecided { .. }));
        assert!(q.deny(&rec.id, "ops", "again").is_err());

        let (second, _) = q.request("sess2", "date", json!(null)).unwrap();
        q.approve(&second.id, "ops", Duration::ZERO).unwrap();
        let err = q.deny(&second.id, "ops", "late").unwrap_err();
        assert!(err.to_string().contains("already decided"));
    }

    #[test]
    fn blank_approver_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let (q, _) = new_test_queue(dir.path());
        let (rec, _) = q.request("s", "ls", json!(null)).unwrap();
        assert!(matches!(
            q.approve(&rec.id, " ", Duration::ZERO),
            Err(KestrelError::Validation(_))
        ));
        assert!(q.get(&rec.id).unwrap().unwrap().is_pending());
    }

    #[test]
    fn list_pending_returns_clones() {
        let dir = tempfile::tempdir().unwrap();
        let (q, _) = new_test_queue(dir.path());
        let (first, _) = q.request("s1", "cmd1", json!(null)).unwrap();
        let (second, _) = q.request("s1", "cmd2", json!(null)).unwrap();
        q.request("s2", "cmd3", json!(null)).unwrap();
        q.approve(&second.id, "ops", Duration::ZERO).unwrap();

        let mut pending = q.list_pending("s1").unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, first.id);
        pending[0].decision = Decision::Approved;
        assert!(q.get(&first.id).unwrap().unwrap().is_pending());

        assert_eq!(q.list_all_pending().unwrap().len(), 2);
        assert_eq!(q.records("s1").unwrap().len(), 2);
    }

    #[test]
    fn find_by_prefix_resolves_short_ids() {
        let dir = tempfile::tempdir().unwrap();
        let (q, _) = new_test_queue(dir.path());
        let (rec, _) = q.request("s", "ls", json!(null)).unwrap();

        assert_eq!(q.find_by_prefix(&rec.id[..8]).unwrap(), Some(rec.id.clone()));
        assert_eq!(q.find_by_prefix(&rec.id).unwrap(), Some(rec.id.clone()));
        assert_eq!(q.find_by_prefix("zzzz").unwrap(), None);
        assert_eq!(q.find_by_prefix("").unwrap(), None);
    }

    #[test]
    fn whitelist_expiry_is_lazy() {
        let dir = tempfile::tempdir().unwrap();
        let (q, clock) = new_test_queue(dir.path());
        assert!(!q.is_whitelisted("sess"));

        q.whitelist()
            .grant("sess", clock.now() + chrono::Duration::seconds(30));
        assert!(q.is_whitelisted("sess"));

        clock.advance(Duration::from_secs(60));
        assert!(!q.is_whitelisted("sess"));
    }

    #[test]
    fn session_tool_scope_only_covers_that_tool() {
        let dir = tempfile::tempdir().unwrap();
        let (q, _) = new_test_queue(dir.path());
        let q = q.with_scope(WhitelistScope::SessionTool);

        let (rec, _) = q.request("s", "fs.write", json!(null)).unwrap();
        q.approve(&rec.id, "ops", Duration::from_secs(60)).unwrap();

        assert!(q.is_tool_whitelisted("s", "fs.write"));
        assert!(!q.is_tool_whitelisted("s", "rm"));
        let (_, auto) = q.request("s", "rm", json!(null)).unwrap();
        assert!(!auto);
        let (_, auto) = q.request("s", "fs.write", json!(null)).unwrap();
        assert!(auto);
    }

    #[test]
    fn pending_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let (q, _) = new_test_queue(dir.path());
        let (rec, _) = q
            .request("s", "tool.rm", json!({"path": "/tmp"}))
            .unwrap();
        q.close().unwrap();

        let (q2, _) = new_test_queue(dir.path());
        let pending = q2.list_pending("s").unwrap();
        assert_eq!(pending, vec![rec]);
    }

    #[test]
    fn whitelist_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let (q, _) = new_test_queue(dir.path());
        let (rec, _) = q.request("s", "tool.echo", json!({"msg": "hi"})).unwrap();
        q.approve(&rec.id, "ops", Duration::from_secs(600)).unwrap();
        q.close().unwrap();

        let (q2, _) = new_test_queue(dir.path());
        assert!(q2.is_whitelisted("s"));
        let (again, auto) = q2.request("s", "tool.echo", json!({"msg": "hi"})).unwrap();
        assert!(auto);
        assert_eq!(again.decision, Decision::Approved);
    }

    #[test]
    fn closed_queue_fails_cleanly() {
        let dir = tempfile::tempdir().unwrap();
        let (q, _) = new_test_queue(dir.path());
        let (rec, _) = q.request("s", "ls", json!(null)).unwrap();
        q.close().unwrap();
        q.close().unwrap();

        assert!(q.is_closed());
        assert!(matches!(
            q.request("s", "ls", json!(null)),
            Err(KestrelError::QueueClosed)
        ));
        assert!(matches!(
            q.approve(&rec.id, "ops", Duration::ZERO),
            Err(KestrelError::QueueClosed)
        ));
        assert!(matches!(q.list_pending("s"), Err(KestrelError::QueueClosed)));
    }

    #[test]
    fn compact_preserves_records() {
        let dir = tempfile::tempdir().unwrap();
        let (q, _) = new_test_queue(dir.path());
        let (a, _) = q.request("s", "a", json!(null)).unwrap();
        let (b, _) = q.request("s", "b", json!(null)).unwrap();
        q.deny(&a.id, "ops", "no").unwrap();
        q.compact().unwrap();
        q.close().unwrap();

        let (q2, _) = new_test_queue(dir.path());
        let all = q2.records("s").unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].decision, Decision::Denied);
        assert_eq!(q2.list_pending("s").unwrap()[0].id, b.id);
    }

    #[tokio::test]
    async fn decided_wakes_waiter() {
        let dir = tempfile::tempdir().unwrap();
        let (q, _) = new_test_queue(dir.path());
        let q = Arc::new(q);
        let (rec, _) = q.request("s", "ls", json!(null)).unwrap();

        let notified = q.decided();
        tokio::pin!(notified);
        notified.as_mut().enable();

        let q2 = q.clone();
        let id = rec.id.clone();
        std::thread::spawn(move || {
            q2.approve(&id, "ops", Duration::ZERO).unwrap();
        });

        tokio::time::timeout(Duration::from_secs(5), notified)
            .await
            .expect("approval should wake waiter");
        assert!(q.get(&rec.id).unwrap().unwrap().is_approved());
    }

    #[test]
    fn failed_log_write_changes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let (q, _) = new_test_queue(dir.path());
        let (rec, _) = q.request("s", "deploy", json!(null)).unwrap();

        q.lock().log.break_writes(b"{\"id\":").unwrap();

        let err = q.request("s", "other", json!(null)).unwrap_err();
        assert!(matches!(err, KestrelError::Persistence(_)), "{err}");
        assert_eq!(q.records("s").unwrap().len(), 1);

        let err = q.approve(&rec.id, "alice", Duration::from_secs(60)).unwrap_err();
        assert!(matches!(err, KestrelError::Persistence(_)), "{err}");
        assert!(!q.is_whitelisted("s"));

        let err = q.deny(&rec.id, "bob", "no").unwrap_err();
        assert!(matches!(err, KestrelError::Persistence(_)), "{err}");
        assert_eq!(q.get(&rec.id).unwrap().unwrap().decision, Decision::Pending);

        q.lock().log.repair_writes().unwrap();
        q.deny(&rec.id, "bob", "no").unwrap();
        q.close().unwrap();

        let (q, _) = new_test_queue(dir.path());
        let records = q.records("s").unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].decision, Decision::Denied);
    }
}
