//! End-to-end monitor tests
//!
//! Drives the orchestrator through its public API with a scripted GitHub.

use chrono::Utc;
use pr_monitor::github::mock::{notification_page, other_notification, pr_notification, pull_request, review};
use pr_monitor::github::{ClientPool, MockCall, MockGitHub};
use pr_monitor::monitor::{Monitor, MonitorSettings};
use pr_monitor::recheck::{RecheckSchedule, RecheckTier};
use pr_monitor::scheduler::{OperatingMode, Priority, RepoPriorityConfig};
use pr_monitor::store::{PrKey, PrStore, RecheckTask, state_keys};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

const CORE: &str = "acme/core";
const DOCS: &str = "acme/docs";

fn settings(temp: &TempDir) -> MonitorSettings {
    let repos = vec![
        RepoPriorityConfig::new(CORE, Priority::High, Duration::from_millis(200)),
        RepoPriorityConfig::new(DOCS, Priority::Low, Duration::from_secs(3600)),
    ];
    let mut settings = MonitorSettings::new(temp.path(), vec!["dev".to_string()], repos);
    settings.username = Some("me".to_string());
    settings.tiered = true;
    settings.full_refresh_interval = Duration::from_secs(3600);
    settings.notification_interval = Some(Duration::from_millis(30));
    settings.scheduler_tick = Duration::from_millis(20);
    settings.recheck_schedule = RecheckSchedule::new(vec![RecheckTier::new(3, Duration::from_millis(40))]);
    settings
}

fn open(temp: &TempDir, mock: &Arc<MockGitHub>) -> Monitor {
    Monitor::open(settings(temp), ClientPool::with_default(mock.clone())).unwrap()
}

/// Poll `cond` until it holds or two seconds pass.
async fn wait_for(mut cond: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    cond()
}

#[tokio::test]
async fn test_notification_mode_end_to_end() {
    let temp = TempDir::new().unwrap();
    let mock = Arc::new(MockGitHub::new());
    mock.add_pull(CORE, pull_request(1, "dev"));
    let monitor = open(&temp, &mock);

    assert_eq!(monitor.start().await.unwrap(), OperatingMode::NotificationDriven);

    // cleanup then the startup sweep
    assert!(wait_for(|| monitor.active_prs().len() == 1).await);
    assert_eq!(mock.count_calls(|c| matches!(c, MockCall::MarkAllRead)), 1);

    // a new PR arrives through notifications
    mock.add_pull(CORE, pull_request(2, "dev"));
    mock.push_notifications(notification_page(
        vec![pr_notification("t-2", CORE, 2), other_notification("t-x", CORE, "Issue")],
        Some("Wed, 01 Jan 2025 00:00:00 GMT"),
        None,
        None,
    ));
    assert!(wait_for(|| monitor.active_prs().len() == 2).await);
    assert!(wait_for(|| mock.marked_read().len() == 2).await);

    let keys: Vec<String> = monitor.active_prs().iter().map(|p| p.key().to_string()).collect();
    assert_eq!(keys, vec!["acme/core#1", "acme/core#2"]);

    let store = &monitor.context().store;
    assert_eq!(
        store.get_state(state_keys::NOTIFICATIONS_LAST_MODIFIED).unwrap().as_deref(),
        Some("Wed, 01 Jan 2025 00:00:00 GMT")
    );

    // approval arrives; the next notification resolves the PR
    mock.set_reviews(CORE, 2, vec![review("me", "APPROVED", Utc::now())]);
    mock.push_notifications(notification_page(vec![pr_notification("t-3", CORE, 2)], None, None, None));
    assert!(wait_for(|| monitor.active_prs().len() == 1).await);

    monitor.stop();
}

#[tokio::test]
async fn test_cleanup_runs_once_across_restarts() {
    let temp = TempDir::new().unwrap();
    let mock = Arc::new(MockGitHub::new());

    {
        let monitor = open(&temp, &mock);
        monitor.start().await.unwrap();
        assert!(wait_for(|| mock.count_calls(|c| matches!(c, MockCall::MarkAllRead)) == 1).await);
        monitor.stop();
    }

    let monitor = open(&temp, &mock);
    monitor.start().await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(mock.count_calls(|c| matches!(c, MockCall::MarkAllRead)), 1);
    monitor.stop();
}

#[tokio::test]
async fn test_priority_fallback_polls_due_repos() {
    let temp = TempDir::new().unwrap();
    let mock = Arc::new(MockGitHub::new());
    mock.deny_notifications(403);
    mock.add_pull(CORE, pull_request(1, "dev"));
    mock.add_pull(DOCS, pull_request(9, "dev"));
    let monitor = open(&temp, &mock);

    assert_eq!(monitor.start().await.unwrap(), OperatingMode::PriorityTiered);
    assert!(wait_for(|| monitor.active_prs().len() == 2).await);

    // the high tier keeps being polled; the hour-long low tier only had the
    // start-up sweep
    let core_polls = |m: &MockGitHub| m.count_calls(|c| matches!(c, MockCall::ListOpenPulls(r) if r == CORE));
    let docs_polls = |m: &MockGitHub| m.count_calls(|c| matches!(c, MockCall::ListOpenPulls(r) if r == DOCS));
    assert!(wait_for(|| core_polls(mock.as_ref()) >= 3).await);
    assert_eq!(docs_polls(mock.as_ref()), 1);

    monitor.stop();
}

#[tokio::test]
async fn test_sweep_failure_keeps_other_repo() {
    let temp = TempDir::new().unwrap();
    let mock = Arc::new(MockGitHub::new());
    mock.add_pull(CORE, pull_request(1, "dev"));
    mock.add_pull(DOCS, pull_request(9, "dev"));
    let monitor = open(&temp, &mock);

    assert_eq!(monitor.refresh_now().await.needing_attention, 2);

    mock.fail_repo(DOCS);
    mock.remove_pull(CORE, 1);
    let report = monitor.refresh_now().await;
    assert_eq!(report.failed, vec![DOCS.to_string()]);

    let keys: Vec<PrKey> = monitor.active_prs().iter().map(|p| p.key()).collect();
    assert_eq!(keys, vec![PrKey::new(DOCS, 9)]);
}

#[tokio::test]
async fn test_ignore_survives_restart() {
    let temp = TempDir::new().unwrap();
    let mock = Arc::new(MockGitHub::new());
    mock.add_pull(CORE, pull_request(1, "dev"));
    mock.add_pull(CORE, pull_request(2, "dev"));

    {
        let monitor = open(&temp, &mock);
        monitor.refresh_now().await;
        monitor.ignore(&PrKey::new(CORE, 1)).unwrap();
        assert_eq!(monitor.active_prs().len(), 1);
    }

    let monitor = open(&temp, &mock);
    assert_eq!(monitor.active_prs().len(), 1);
    monitor.refresh_now().await;
    assert_eq!(monitor.active_prs()[0].number, 2);
    assert_eq!(monitor.ignored_count().unwrap(), 1);
}

#[tokio::test]
async fn test_opened_pr_rechecks_until_resolved() {
    let temp = TempDir::new().unwrap();
    let mock = Arc::new(MockGitHub::new());
    mock.add_pull(CORE, pull_request(1, "dev"));
    let monitor = open(&temp, &mock);
    monitor.refresh_now().await;

    let record = monitor.active_prs().remove(0);
    assert!(monitor.opened_pr(&record).unwrap());

    mock.set_reviews(CORE, 1, vec![review("me", "APPROVED", Utc::now())]);
    assert!(wait_for(|| monitor.active_prs().is_empty()).await);
    assert!(wait_for(|| monitor.rechecks().active_workers() == 0).await);
    assert!(monitor.context().store.get_recheck_task(&record.key()).unwrap().is_none());
}

#[tokio::test]
async fn test_expired_recheck_finishes_on_startup() {
    let temp = TempDir::new().unwrap();
    let mock = Arc::new(MockGitHub::new());
    mock.add_pull(CORE, pull_request(1, "dev"));
    let key = PrKey::new(CORE, 1);

    {
        let store = PrStore::open(temp.path()).unwrap();
        let started = Utc::now() - chrono::Duration::minutes(90);
        store.add_recheck_task(&RecheckTask::new(&key, started)).unwrap();
    }

    let monitor = open(&temp, &mock);
    monitor.start().await.unwrap();

    assert!(monitor.context().store.get_recheck_task(&key).unwrap().is_none());
    assert_eq!(mock.get_pull_calls(CORE, 1), 1);
    monitor.stop();
}
