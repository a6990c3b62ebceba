//! End-to-end scenarios over HTTP against in-memory adapters.
//!
//! Each test spawns the full router on an ephemeral port with an embedded
//! worker pool, and drives it with `reqwest` using the `X-User-Id`
//! development header.

#![allow(clippy::panic)]

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use reqwest::StatusCode;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use librarium::adapters::{LocalIdentityProvider, LogMailer, LogPushDispatcher, MemoryFileStorage};
use librarium::api;
use librarium::app_state::{AppState, Ports};
use librarium::config::{AppConfig, AppEnv, LogFormat, StorageConfig};
use librarium::domain::{
    AuthUser, GlobalRole, LibraryId, Membership, MembershipPatch, MembershipPlan,
    NotificationHub, Subscription, User, UserId,
};
use librarium::persistence::InMemoryRepository;
use librarium::ports::{Repository, TaskQueue};
use librarium::queue::InMemoryQueue;
use librarium::service::export::CSV_HEADER;
use librarium::worker::WorkerPool;

struct TestApp {
    base: String,
    client: reqwest::Client,
    state: AppState,
    hub: NotificationHub,
    admin: String,
    cancel: CancellationToken,
}

impl Drop for TestApp {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

fn test_config() -> AppConfig {
    AppConfig {
        listen_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
        database_url: None,
        database_max_connections: 1,
        database_min_connections: 0,
        database_connect_timeout_secs: 1,
        database_run_migrations: false,
        redis_url: None,
        worker_concurrency: 2,
        worker_embedded: true,
        overdue_check_interval_secs: 0,
        storage: StorageConfig {
            root: PathBuf::from("./target/test-storage"),
            temp_dir: "tmp".into(),
            public_dir: "public".into(),
            public_base_url: "http://localhost/public".into(),
        },
        cors_allowed_origins: Vec::new(),
        app_env: AppEnv::Local,
        shutdown_timeout_secs: 1,
        log_format: LogFormat::Text,
    }
}

async fn spawn_app() -> TestApp {
    let hub = NotificationHub::new();
    let repo = Arc::new(InMemoryRepository::with_hub(hub.clone()));
    let queue = Arc::new(InMemoryQueue::new());

    let admin = User {
        id: UserId::new(),
        name: "Root".into(),
        email: "root@example.test".into(),
        created_at: Utc::now(),
        deleted_at: None,
    };
    let auth = AuthUser {
        user_id: admin.id,
        provider_uid: "root".into(),
        role: GlobalRole::Superadmin,
    };
    assert!(repo.insert_user(&admin, &auth).await.is_ok());

    let ports = Ports {
        repo: Arc::clone(&repo) as Arc<dyn Repository>,
        queue: Arc::clone(&queue) as Arc<dyn TaskQueue>,
        storage: Arc::new(MemoryFileStorage::new()),
        identity: Arc::new(LocalIdentityProvider::new()),
        mailer: Arc::new(LogMailer),
        push: Arc::new(LogPushDispatcher),
        hub: hub.clone(),
    };
    let config = test_config();
    let state = AppState::new(ports, config.allows_user_id_header());
    let cancel = CancellationToken::new();

    let pool = WorkerPool::new(
        queue as Arc<dyn TaskQueue>,
        state.task_handler(),
        config.worker_concurrency,
        Duration::from_secs(1),
    );
    tokio::spawn(pool.run(cancel.clone()));

    let app = api::build_router(state.clone(), &config);
    let Ok(listener) = tokio::net::TcpListener::bind(config.listen_addr).await else {
        panic!("bind test listener");
    };
    let Ok(addr) = listener.local_addr() else {
        panic!("listener address");
    };
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        let _ = axum::serve(listener, app)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await;
    });

    TestApp {
        base: format!("http://{addr}"),
        client: reqwest::Client::new(),
        state,
        hub,
        admin: admin.id.to_string(),
        cancel,
    }
}

impl TestApp {
    async fn send(&self, req: reqwest::RequestBuilder, user: &str) -> (StatusCode, Value) {
        let Ok(resp) = req.header("x-user-id", user).send().await else {
            panic!("request failed");
        };
        let status = resp.status();
        let body = resp.json::<Value>().await.unwrap_or(Value::Null);
        (status, body)
    }

    async fn get(&self, path: &str, user: &str) -> (StatusCode, Value) {
        let url = format!("{}/api/v1{path}", self.base);
        self.send(self.client.get(url), user).await
    }

    async fn post(&self, path: &str, user: &str, body: Value) -> (StatusCode, Value) {
        let url = format!("{}/api/v1{path}", self.base);
        self.send(self.client.post(url).json(&body), user).await
    }

    async fn patch(&self, path: &str, user: &str, body: Value) -> (StatusCode, Value) {
        let url = format!("{}/api/v1{path}", self.base);
        self.send(self.client.patch(url).json(&body), user).await
    }

    async fn register(&self, name: &str) -> String {
        let url = format!("{}/api/v1/auth/register", self.base);
        let body = json!({
            "name": name,
            "email": format!("{name}@example.test"),
            "password": "secret-pw",
        });
        let Ok(resp) = self.client.post(url).json(&body).send().await else {
            panic!("register request failed");
        };
        assert_eq!(resp.status(), StatusCode::CREATED);
        let Ok(body) = resp.json::<Value>().await else {
            panic!("register body");
        };
        id_of(&body)
    }

    async fn library(&self, name: &str) -> String {
        let (status, body) = self
            .post("/libraries", &self.admin, json!({ "name": name }))
            .await;
        assert_eq!(status, StatusCode::CREATED, "{body}");
        id_of(&body)
    }

    async fn hire(&self, library_id: &str, user_id: &str) {
        let (status, body) = self
            .post(
                "/staffs",
                &self.admin,
                json!({ "library_id": library_id, "user_id": user_id, "role": "STAFF" }),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "{body}");
    }

    async fn book(&self, clerk: &str, library_id: &str, code: &str, title: &str) -> String {
        let (status, body) = self
            .post(
                "/books",
                clerk,
                json!({
                    "library_id": library_id,
                    "code": code,
                    "title": title,
                    "author": "X",
                    "year": 2000,
                }),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "{body}");
        id_of(&body)
    }

    async fn wait_for_job(&self, job_id: &str, user: &str) -> Value {
        for _ in 0..100 {
            let (status, body) = self.get(&format!("/jobs/{job_id}"), user).await;
            assert_eq!(status, StatusCode::OK, "{body}");
            let state = body["data"]["status"].as_str().unwrap_or_default().to_string();
            if state == "COMPLETED" || state == "FAILED" {
                return body["data"].clone();
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("job {job_id} did not finish");
    }
}

fn id_of(body: &Value) -> String {
    let Some(id) = body["data"]["id"].as_str() else {
        panic!("response has no data.id: {body}");
    };
    id.to_string()
}

fn ts(body: &Value, pointer: &str) -> DateTime<Utc> {
    let Some(raw) = body.pointer(pointer).and_then(Value::as_str) else {
        panic!("missing timestamp at {pointer}: {body}");
    };
    let Ok(parsed) = raw.parse::<DateTime<Utc>>() else {
        panic!("unparsable timestamp {raw}");
    };
    parsed
}

fn at(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
    let Some(t) = Utc.with_ymd_and_hms(y, m, d, h, 0, 0).single() else {
        panic!("valid date");
    };
    t
}

/// Library with one clerk, one reader and a plan
/// `loan_period=14, fine_per_day=100, active_loan_limit=3`.
struct Tenant {
    library_id: String,
    clerk: String,
    reader: String,
    membership_id: String,
}

async fn tenant(app: &TestApp) -> Tenant {
    let library_id = app.library("Central").await;
    let clerk = app.register("clerk").await;
    app.hire(&library_id, &clerk).await;
    let reader = app.register("reader").await;

    let (status, body) = app
        .post(
            "/memberships",
            &app.admin,
            json!({
                "library_id": library_id,
                "name": "M1",
                "duration": 365,
                "active_loan_limit": 3,
                "loan_period": 14,
                "fine_per_day": 100,
                "price": 2500,
            }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    Tenant {
        library_id,
        clerk,
        reader,
        membership_id: id_of(&body),
    }
}

async fn subscribe(app: &TestApp, t: &Tenant) -> Value {
    let (status, body) = app
        .post(
            "/subscriptions",
            &app.admin,
            json!({ "user_id": t.reader, "membership_id": t.membership_id }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    body
}

#[tokio::test]
async fn grandfathered_terms_survive_plan_edits() {
    // Literal instants through the domain model.
    let library_id = LibraryId::new();
    let plan = MembershipPlan {
        name: "M1".into(),
        duration: 30,
        active_loan_limit: 3,
        loan_period: 14,
        fine_per_day: 100,
        price: 0,
        usage_limit: 0,
        description: None,
    };
    let t0 = at(2025, 1, 1, 0);
    let Ok(mut m1) = Membership::new(library_id, plan, t0) else {
        panic!("plan should be valid");
    };
    let Ok(s1) = Subscription::purchase(UserId::new(), &m1, t0) else {
        panic!("purchase should succeed");
    };
    assert_eq!(s1.terms.expires_at, t0 + chrono::Duration::days(30));
    let before = s1.terms.clone();
    let patch = MembershipPatch {
        fine_per_day: Some(500),
        ..MembershipPatch::default()
    };
    assert!(m1.apply(patch, at(2025, 1, 2, 0)).is_ok());
    assert_eq!(m1.fine_per_day, 500);
    assert_eq!(s1.terms, before);

    // And through the API.
    let app = spawn_app().await;
    let t = tenant(&app).await;
    let sub = subscribe(&app, &t).await;
    assert_eq!(sub["data"]["loan_period"], 14);
    assert_eq!(sub["data"]["fine_per_day"], 100);
    assert_eq!(sub["data"]["active_loan_limit"], 3);
    assert_eq!(
        ts(&sub, "/data/expires_at") - ts(&sub, "/data/created_at"),
        chrono::Duration::days(365)
    );

    let (status, body) = app
        .patch(
            &format!("/memberships/{}", t.membership_id),
            &app.admin,
            json!({ "fine_per_day": 500 }),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["data"]["fine_per_day"], 500);

    let (status, body) = app
        .get(&format!("/subscriptions/{}", id_of(&sub)), &t.reader)
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["data"]["fine_per_day"], 100);
}

#[tokio::test]
async fn overdue_return_floors_fine_and_frees_the_book() {
    let app = spawn_app().await;
    let t = tenant(&app).await;
    let sub = subscribe(&app, &t).await;
    let subscription_id = id_of(&sub);
    let k1 = app.book(&t.clerk, &t.library_id, "K1", "Dune").await;

    let (status, b1) = app
        .post(
            "/borrowings",
            &t.clerk,
            json!({
                "book_id": k1,
                "subscription_id": subscription_id,
                "borrowed_at": "2025-02-01T00:00:00Z",
            }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{b1}");
    assert_eq!(ts(&b1, "/data/due_at"), at(2025, 2, 15, 0));

    // A second loan of K1 is refused while B1 is active.
    let second = json!({ "book_id": k1, "subscription_id": subscription_id });
    let (status, body) = app.post("/borrowings", &t.clerk, second.clone()).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "book_not_available");

    let (status, body) = app
        .post(
            &format!("/borrowings/{}/return", id_of(&b1)),
            &t.clerk,
            json!({ "returned_at": "2025-02-18T12:00:00Z" }),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["data"]["returning"]["fine"], 300);
    assert_eq!(body["data"]["status"], "Returned");

    // Returning twice fails without touching the record.
    let (status, body) = app
        .post(
            &format!("/borrowings/{}/return", id_of(&b1)),
            &t.clerk,
            json!({ "fine": 1 }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "already_returned");
    let (_, body) = app
        .get(&format!("/borrowings/{}", id_of(&b1)), &t.reader)
        .await;
    assert_eq!(body["data"]["returning"]["fine"], 300);

    let (status, body) = app.post("/borrowings", &t.clerk, second).await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
}

#[tokio::test]
async fn import_preview_matches_applied_outcome() {
    let app = spawn_app().await;
    let t = tenant(&app).await;
    let a1 = app.book(&t.clerk, &t.library_id, "A1", "Old").await;

    let csv = format!(
        "id,code,title,author,year\n,B1,New,Y,2020\n{a1},A1,Old,X,2000\n,A1,Dup,Z,2021\n"
    );
    let Ok(part) = reqwest::multipart::Part::bytes(csv.into_bytes())
        .file_name("books.csv")
        .mime_str("text/csv")
    else {
        panic!("csv part");
    };
    let form = reqwest::multipart::Form::new()
        .text("library_id", t.library_id.clone())
        .part("file", part);
    let url = format!("{}/api/v1/books/import", app.base);
    let (status, preview) = app
        .send(app.client.post(url).multipart(form), &t.clerk)
        .await;
    assert_eq!(status, StatusCode::OK, "{preview}");
    assert_eq!(preview["data"]["summary"]["created"], 1);
    assert_eq!(preview["data"]["summary"]["updated"], 0);
    assert_eq!(preview["data"]["summary"]["invalid"], 2);

    let (status, job) = app
        .post(
            "/books/import/confirm",
            &t.clerk,
            json!({ "path": preview["data"]["path"], "library_id": t.library_id }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{job}");
    assert_eq!(job["data"]["type"], "import:books");

    let done = app.wait_for_job(&id_of(&job), &t.clerk).await;
    assert_eq!(done["status"], "COMPLETED", "{done}");
    assert_eq!(done["result"]["success"], 1);
    assert_eq!(done["result"]["skipped"], 2);

    let (_, books) = app
        .get(&format!("/books?library_id={}", t.library_id), &t.clerk)
        .await;
    let Some(books) = books["data"].as_array() else {
        panic!("book list");
    };
    assert!(books.iter().any(|b| b["code"] == "B1" && b["title"] == "New"));
    assert!(books.iter().any(|b| b["code"] == "A1" && b["title"] == "Old"));

    // Paths outside the library's import folder are refused.
    let (status, _) = app
        .post(
            "/books/import/confirm",
            &t.clerk,
            json!({ "path": "elsewhere/imports/books.csv", "library_id": t.library_id }),
        )
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn empty_export_completes_with_header_only_file() {
    let app = spawn_app().await;
    let library_id = app.library("Annex").await;
    let clerk = app.register("annex-clerk").await;
    app.hire(&library_id, &clerk).await;

    let (status, job) = app
        .post("/borrowings/export", &clerk, json!({ "library_id": library_id }))
        .await;
    assert_eq!(status, StatusCode::CREATED, "{job}");
    assert_eq!(job["data"]["status"], "PENDING");
    assert_eq!(job["data"]["type"], "export:borrowings");

    let done = app.wait_for_job(&id_of(&job), &clerk).await;
    assert_eq!(done["status"], "COMPLETED", "{done}");
    assert!(done["started_at"].is_string());
    assert!(done["finished_at"].is_string());
    let path = done["result"]["path"].as_str().unwrap_or_default();
    assert!(path.starts_with(&format!("{library_id}/exports/")));
    let header_len = CSV_HEADER.join(",").len() + 1;
    assert_eq!(done["result"]["size"], header_len);

    let (status, body) = app
        .get(&format!("/jobs/{}/download", id_of(&job)), &clerk)
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["data"]["expires_in"], 900);

    // Readers outside the library cannot see the job.
    let stranger = app.register("stranger").await;
    let (status, _) = app.get(&format!("/jobs/{}", id_of(&job)), &stranger).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn slow_subscriber_drops_while_others_keep_receiving() {
    let app = spawn_app().await;
    let reader = app.register("sse-reader").await;
    let Ok(user_id) = reader.parse::<UserId>() else {
        panic!("user id");
    };

    let (slow_tx, mut slow_rx) = mpsc::channel(1);
    let (fast_tx, mut fast_rx) = mpsc::channel(10);
    let slow = app.hub.subscribe(slow_tx);
    let _fast = app.hub.subscribe(fast_tx);

    for n in 1..=3 {
        let emitted = app
            .state
            .notifications
            .emit(user_id, "Ping", &format!("ping {n}"), None)
            .await;
        assert!(emitted.is_ok());
    }

    let Ok(first) = slow_rx.try_recv() else {
        panic!("first notification should be queued");
    };
    assert_eq!(first.message, "ping 1");
    assert!(slow_rx.try_recv().is_err());

    let mut fast = Vec::new();
    while let Ok(n) = fast_rx.try_recv() {
        fast.push(n.message);
    }
    assert_eq!(fast, ["ping 1", "ping 2", "ping 3"]);
    app.hub.unsubscribe(slow);

    // The inbox still holds everything regardless of live delivery.
    let (_, inbox) = app.get("/notifications", &reader).await;
    assert_eq!(inbox["meta"]["unread"], 3);
    assert_eq!(inbox["meta"]["total"], 3);
}

#[tokio::test]
async fn returned_loan_is_pushed_over_sse() {
    let app = spawn_app().await;
    let t = tenant(&app).await;
    let sub = subscribe(&app, &t).await;
    let book = app.book(&t.clerk, &t.library_id, "S1", "Emma").await;
    let (_, loan) = app
        .post(
            "/borrowings",
            &t.clerk,
            json!({ "book_id": book, "subscription_id": id_of(&sub) }),
        )
        .await;

    let url = format!("{}/api/v1/notifications/stream", app.base);
    let Ok(mut stream) = app
        .client
        .get(url)
        .header("x-user-id", &t.reader)
        .send()
        .await
    else {
        panic!("open stream");
    };
    assert_eq!(stream.status(), StatusCode::OK);

    // The relay subscribes asynchronously; give it a moment.
    tokio::time::sleep(Duration::from_millis(50)).await;
    let (status, _) = app
        .post(
            &format!("/borrowings/{}/return", id_of(&loan)),
            &t.clerk,
            json!({}),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let mut received = String::new();
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !received.contains("Book returned") {
        let Ok(Ok(Some(chunk))) = tokio::time::timeout_at(deadline, stream.chunk()).await else {
            panic!("no notification event, got {received:?}");
        };
        received.push_str(&String::from_utf8_lossy(&chunk));
    }
    assert!(received.contains("event: notification"));
}

#[tokio::test]
async fn requests_without_credentials_are_rejected() {
    let app = spawn_app().await;
    let Ok(resp) = app
        .client
        .get(format!("{}/api/v1/auth/me", app.base))
        .send()
        .await
    else {
        panic!("request failed");
    };
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    let Ok(resp) = app.client.get(format!("{}/health", app.base)).send().await else {
        panic!("request failed");
    };
    assert_eq!(resp.status(), StatusCode::OK);
}
