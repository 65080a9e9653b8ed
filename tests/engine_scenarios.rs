use chrono::NaiveDate;
use futures::future::BoxFuture;
use rollsync::backend::SqliteDispatcher;
use rollsync::config::SyncConfig;
use rollsync::dispatch::{Action, Client, Dispatcher, Params, Reply, Session};
use rollsync::edits::CommitError;
use rollsync::model::{AttendanceStatus, ClassStat, MarkKey, Scope, StatusMark};
use rollsync::view::{AttendanceView, ClassStatsView};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Wraps the SQLite backend and drops selected actions on the floor, the way
/// a flaky network would.
struct Flaky {
    inner: Arc<SqliteDispatcher>,
    failing: Mutex<HashSet<String>>,
}

impl Flaky {
    fn new(inner: Arc<SqliteDispatcher>) -> Self {
        Self {
            inner,
            failing: Mutex::new(HashSet::new()),
        }
    }

    fn fail(&self, action: &str) {
        self.failing.lock().expect("lock").insert(action.to_string());
    }

    fn heal(&self) {
        self.failing.lock().expect("lock").clear();
    }
}

impl Dispatcher for Flaky {
    fn dispatch<'a>(
        &'a self,
        session: &'a Session,
        action: &'a str,
        params: Params,
    ) -> BoxFuture<'a, anyhow::Result<Value>> {
        if self.failing.lock().expect("lock").contains(action) {
            return Box::pin(async move {
                Err::<Value, _>(anyhow::anyhow!("connection reset during {}", action))
            });
        }
        self.inner.dispatch(session, action, params)
    }
}

fn day() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 9, 2).expect("date")
}

fn cfg() -> SyncConfig {
    SyncConfig::default()
        .with_page_size(20)
        .with_priority_count(3)
        .with_trailing_interval(Duration::from_millis(50))
}

async fn create_class(client: &Client, name: &str) -> String {
    match client
        .call(Action::CreateClass {
            name: name.to_string(),
        })
        .await
        .expect("create class")
    {
        Reply::Created { id } => id,
        other => panic!("unexpected reply {:?}", other),
    }
}

async fn create_student(client: &Client, class_id: &str, name: &str) -> String {
    match client
        .call(Action::CreateStudent {
            class_id: class_id.to_string(),
            display_name: name.to_string(),
            points: 0,
        })
        .await
        .expect("create student")
    {
        Reply::Created { id } => id,
        other => panic!("unexpected reply {:?}", other),
    }
}

fn setup() -> (Arc<SqliteDispatcher>, Arc<Flaky>, Client) {
    let backend = Arc::new(SqliteDispatcher::open_in_memory().expect("backend"));
    let flaky = Arc::new(Flaky::new(Arc::clone(&backend)));
    let dispatcher: Arc<dyn Dispatcher> = flaky.clone();
    let client = Client::new(dispatcher, Session::new("scenario").with_credential("token-1"));
    (backend, flaky, client)
}

#[tokio::test(start_paused = true)]
async fn one_failing_class_gets_a_fallback_and_the_rest_load() {
    let (backend, _flaky, client) = setup();
    let mut class_ids = Vec::new();
    for i in 0..10 {
        class_ids.push(create_class(&client, &format!("Class {}", i)).await);
    }
    let sid = create_student(&client, &class_ids[0], "Ada").await;
    client
        .bulk_set_status(
            day(),
            vec![StatusMark {
                class_id: class_ids[0].clone(),
                student_id: sid,
                status: AttendanceStatus::Present,
            }],
        )
        .await
        .expect("seed attendance");
    backend.fail_stats_for(class_ids[6].clone());

    let mut view = ClassStatsView::new(client.clone(), &cfg());
    let run = view.load_all(class_ids.clone());
    assert_eq!(run.total(), 10);
    assert_eq!(run.advisory_deadline(), Duration::from_millis(500));
    view.wait().await;

    assert_eq!(view.published(), 10);
    assert_eq!(view.fallbacks(), 1);
    assert_eq!(view.stats().len(), 10);
    assert_eq!(view.stat(&class_ids[6]), Some(ClassStat::zero(class_ids[6].clone())));
    let first = view.stat(&class_ids[0]).expect("first class");
    assert_eq!(first.present, 1);
    assert_eq!(first.attendance_rate, 100.0);

    let summary = view.summary();
    assert_eq!(summary.classes, 10);
    assert_eq!(summary.present, 1);
    assert_eq!(summary.total, 1);
}

#[tokio::test]
async fn refresh_failure_after_bulk_write_keeps_marks_staged() {
    let (_backend, flaky, client) = setup();
    let class_id = create_class(&client, "7B").await;
    let ada = create_student(&client, &class_id, "Ada").await;
    let brook = create_student(&client, &class_id, "Brook").await;

    let mut view =
        AttendanceView::new(client.clone(), Scope::class(class_id.clone()), day(), &cfg())
            .expect("view");
    view.refresh().await.expect("initial refresh");
    view.stage(MarkKey::new(class_id.clone(), ada), AttendanceStatus::Present);
    view.stage(MarkKey::new(class_id.clone(), brook), AttendanceStatus::Sick);

    flaky.fail("attendance.list");
    let err = view.commit().await.expect_err("refresh fails");
    match &err {
        CommitError::Refresh { report, source } => {
            assert_eq!(report.succeeded, 2);
            assert_eq!(source.code(), "transport_failed");
        }
        other => panic!("unexpected {:?}", other),
    }
    assert_eq!(view.edit_buffer().len(), 2);
    assert!(view.records().is_empty());

    flaky.heal();
    view.refresh().await.expect("refresh");
    assert_eq!(view.records().len(), 2);
    assert!(view.edit_buffer().conflicts().is_empty());

    let report = view.commit().await.expect("second commit");
    assert_eq!(report.succeeded, 2);
    assert!(view.edit_buffer().is_empty());
    assert_eq!(view.aggregate().count(AttendanceStatus::Sick), 1);
}

#[tokio::test]
async fn rejected_bulk_call_keeps_marks_and_skips_refresh() {
    let (_backend, flaky, client) = setup();
    let class_id = create_class(&client, "7B").await;
    let ada = create_student(&client, &class_id, "Ada").await;

    let mut view =
        AttendanceView::new(client.clone(), Scope::class(class_id.clone()), day(), &cfg())
            .expect("view");
    view.refresh().await.expect("refresh");
    let key = MarkKey::new(class_id.clone(), ada);
    view.stage(key.clone(), AttendanceStatus::Absent);

    flaky.fail("attendance.bulkSet");
    let err = view.commit().await.expect_err("bulk fails");
    match err {
        CommitError::Dispatch { failed, .. } => assert_eq!(failed, vec![key]),
        other => panic!("unexpected {:?}", other),
    }
    assert_eq!(view.edit_buffer().len(), 1);
    assert!(view.records().is_empty());
}

#[tokio::test]
async fn concurrent_change_is_flagged_not_dropped() {
    let (backend, _flaky, client) = setup();
    let class_id = create_class(&client, "7B").await;
    let ada = create_student(&client, &class_id, "Ada").await;

    let mut view =
        AttendanceView::new(client.clone(), Scope::class(class_id.clone()), day(), &cfg())
            .expect("view");
    view.refresh().await.expect("refresh");
    let key = MarkKey::new(class_id.clone(), ada.clone());
    view.stage(key.clone(), AttendanceStatus::Present);

    // Someone else marks the same person from their own session.
    let shared: Arc<dyn Dispatcher> = backend.clone();
    let other_client = Client::new(shared, Session::new("other-desk"));
    other_client
        .bulk_set_status(
            day(),
            vec![StatusMark {
                class_id: class_id.clone(),
                student_id: ada,
                status: AttendanceStatus::Absent,
            }],
        )
        .await
        .expect("other write");

    view.refresh().await.expect("refresh");
    assert_eq!(view.edit_buffer().conflicts(), vec![key.clone()]);
    let staged = view.edit_buffer().get(&key).expect("still staged");
    assert_eq!(staged.value, AttendanceStatus::Present);
    assert_eq!(staged.base, None);
}

#[tokio::test]
async fn failed_refresh_leaves_previous_contents() {
    let (_backend, flaky, client) = setup();
    let class_id = create_class(&client, "7B").await;
    let ada = create_student(&client, &class_id, "Ada").await;
    client
        .bulk_set_status(
            day(),
            vec![StatusMark {
                class_id: class_id.clone(),
                student_id: ada,
                status: AttendanceStatus::Permission,
            }],
        )
        .await
        .expect("seed");

    let mut view =
        AttendanceView::new(client.clone(), Scope::class(class_id), day(), &cfg()).expect("view");
    view.refresh().await.expect("refresh");
    assert_eq!(view.visible().len(), 1);

    flaky.fail("attendance.list");
    let err = view.refresh().await.expect_err("refresh fails");
    assert_eq!(err.code(), "transport_failed");
    assert_eq!(view.records().len(), 1);
    assert_eq!(view.visible().len(), 1);
    assert_eq!(view.aggregate().count(AttendanceStatus::Permission), 1);
    assert!(client.session().requests_sent() >= 4);
}
