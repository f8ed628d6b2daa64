use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use serde_json::json;

use kestrel_approval::{
    ApprovalQueue, Decision, ManualClock, RecordLog, Whitelist, WhitelistScope,
};
use kestrel_core::KestrelError;

fn open(dir: &Path, clock: &Arc<ManualClock>) -> ApprovalQueue {
    let log = RecordLog::open(dir).expect("open record log");
    ApprovalQueue::new(log, Whitelist::new()).with_clock(clock.clone())
}

fn test_clock() -> Arc<ManualClock> {
    Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()))
}

#[test]
fn test_approve_then_whitelisted_request() {
    let dir = tempfile::tempdir().unwrap();
    let clock = test_clock();
    let queue = open(dir.path(), &clock);

    let (rec, auto) = queue
        .request("sess-1", "fs.write", json!({"path": "/tmp/data"}))
        .unwrap();
    assert!(!auto);
    assert_eq!(rec.decision, Decision::Pending);
    assert_eq!(rec.paths, vec![std::path::PathBuf::from("/tmp/data")]);

    let approved = queue.approve(&rec.id, "alice", Duration::from_secs(60)).unwrap();
    assert_eq!(approved.decision, Decision::Approved);
    assert!(!approved.auto);
    assert_eq!(approved.approver.as_deref(), Some("alice"));

    let (again, auto) = queue
        .request("sess-1", "fs.write", json!({"path": "/tmp/data"}))
        .unwrap();
    assert!(auto);
    assert!(again.auto);
    assert_eq!(again.decision, Decision::Approved);
    assert_ne!(again.id, rec.id);

    clock.advance(Duration::from_secs(61));
    let (late, auto) = queue.request("sess-1", "fs.write", json!(null)).unwrap();
    assert!(!auto);
    assert_eq!(late.decision, Decision::Pending);
}

#[test]
fn test_pending_record_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let clock = test_clock();

    let original = {
        let queue = open(dir.path(), &clock);
        let (rec, _) = queue.request("s", "tool.rm", json!({"path": "/tmp"})).unwrap();
        queue.close().unwrap();
        rec
    };

    let queue = open(dir.path(), &clock);
    let pending = queue.list_pending("s").unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0], original);

    // The recovered record can still be decided.
    queue.deny(&original.id, "ops", "not today").unwrap();
    assert!(queue.list_pending("s").unwrap().is_empty());
}

#[test]
fn test_recovery_rebuilds_partition_and_whitelist() {
    let dir = tempfile::tempdir().unwrap();
    let clock = test_clock();

    let (approved_id, denied_id, pending_id) = {
        let queue = open(dir.path(), &clock);
        let (a, _) = queue.request("s1", "deploy", json!(null)).unwrap();
        let (d, _) = queue.request("s2", "drop-table", json!(null)).unwrap();
        let (p, _) = queue.request("s3", "reboot", json!(null)).unwrap();
        queue.approve(&a.id, "alice", Duration::from_secs(600)).unwrap();
        queue.deny(&d.id, "bob", "no").unwrap();
        // Simulate a crash: no close.
        (a.id, d.id, p.id)
    };

    clock.advance(Duration::from_secs(60));
    let queue = open(dir.path(), &clock);

    assert_eq!(queue.get(&approved_id).unwrap().unwrap().decision, Decision::Approved);
    assert_eq!(queue.get(&denied_id).unwrap().unwrap().decision, Decision::Denied);
    let pending = queue.list_all_pending().unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].id, pending_id);

    assert!(queue.is_whitelisted("s1"));
    assert!(!queue.is_whitelisted("s2"));
    let (_, auto) = queue.request("s1", "deploy", json!(null)).unwrap();
    assert!(auto);

    clock.advance(Duration::from_secs(600));
    assert!(!queue.is_whitelisted("s1"));
}

#[test]
fn test_session_tool_scope_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let clock = test_clock();
    {
        let queue = open(dir.path(), &clock).with_scope(WhitelistScope::SessionTool);
        let (rec, _) = queue.request("s", "fs.write", json!(null)).unwrap();
        queue.approve(&rec.id, "alice", Duration::from_secs(60)).unwrap();
        queue.close().unwrap();
    }

    let queue = open(dir.path(), &clock).with_scope(WhitelistScope::SessionTool);
    assert!(queue.is_tool_whitelisted("s", "fs.write"));
    assert!(!queue.is_tool_whitelisted("s", "fs.delete"));
}

#[test]
fn test_exactly_one_decision_wins() {
    let dir = tempfile::tempdir().unwrap();
    let clock = test_clock();
    let queue = Arc::new(open(dir.path(), &clock));

    for round in 0..20 {
        let (rec, _) = queue.request("race", "cmd", json!({ "round": round })).unwrap();
        let approver = {
            let queue = queue.clone();
            let id = rec.id.clone();
            std::thread::spawn(move || queue.approve(&id, "alice", Duration::ZERO).is_ok())
        };
        let denier = {
            let queue = queue.clone();
            let id = rec.id.clone();
            std::thread::spawn(move || queue.deny(&id, "bob", "race").is_ok())
        };
        let approved = approver.join().unwrap();
        let denied = denier.join().unwrap();
        assert!(approved ^ denied, "round {round}: approved={approved} denied={denied}");

        let stored = queue.get(&rec.id).unwrap().unwrap();
        let expected = if approved { Decision::Approved } else { Decision::Denied };
        assert_eq!(stored.decision, expected);
    }
}

#[test]
fn test_second_decision_fails_after_restart() {
    let dir = tempfile::tempdir().unwrap();
    let clock = test_clock();
    let id = {
        let queue = open(dir.path(), &clock);
        let (rec, _) = queue.request("s", "cmd", json!(null)).unwrap();
        queue.approve(&rec.id, "alice", Duration::ZERO).unwrap();
        rec.id
    };

    let queue = open(dir.path(), &clock);
    let err = queue.deny(&id, "bob", "too late").unwrap_err();
    assert!(matches!(err, KestrelError::AlreadyDecided { .. }));
}

#[test]
fn test_compacted_log_recovers_identically() {
    let dir = tempfile::tempdir().unwrap();
    let clock = test_clock();
    let before = {
        let queue = open(dir.path(), &clock);
        for i in 0..5 {
            let (rec, _) = queue.request("s", format!("cmd-{i}").as_str(), json!(null)).unwrap();
            if i % 2 == 0 {
                queue.approve(&rec.id, "alice", Duration::ZERO).unwrap();
            }
        }
        queue.compact().unwrap();
        let all = queue.records("s").unwrap();
        queue.close().unwrap();
        all
    };

    let content = std::fs::read_to_string(dir.path().join("approvals.jsonl")).unwrap();
    assert_eq!(content.lines().count(), 5);

    let queue = open(dir.path(), &clock);
    assert_eq!(queue.records("s").unwrap(), before);
}

#[test]
fn test_shorter_later_approval_wins_after_restart() {
    let dir = tempfile::tempdir().unwrap();
    let clock = test_clock();
    {
        let queue = open(dir.path(), &clock);
        let (long, _) = queue.request("s", "deploy", json!(null)).unwrap();
        let (short, _) = queue.request("s", "rollback", json!(null)).unwrap();
        queue.approve(&long.id, "alice", Duration::from_secs(3600)).unwrap();
        clock.advance(Duration::from_secs(1));
        queue.approve(&short.id, "alice", Duration::from_secs(60)).unwrap();
        queue.close().unwrap();
    }

    clock.advance(Duration::from_secs(120));
    {
        let queue = open(dir.path(), &clock);
        assert!(!queue.is_whitelisted("s"));
        let (rec, auto) = queue.request("s", "deploy", json!(null)).unwrap();
        assert!(!auto);
        assert_eq!(rec.decision, Decision::Pending);
        queue.close().unwrap();
    }

    let queue = open(dir.path(), &clock);
    assert!(!queue.is_whitelisted("s"));
}

#[test]
fn test_store_refuses_second_owner() {
    let dir = tempfile::tempdir().unwrap();
    let clock = test_clock();
    let queue = open(dir.path(), &clock);

    let err = RecordLog::open(dir.path()).err().unwrap();
    assert!(matches!(err, KestrelError::Persistence(_)), "{err}");

    queue.close().unwrap();
    let queue = open(dir.path(), &clock);
    assert!(queue.list_all_pending().unwrap().is_empty());
}
