use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use repo_analyst::server::{self, AppState, USER_HEADER};
use repo_analyst::sink::LoggingCorpusSink;
use repo_analyst_core::config::QueueSettings;
use repo_analyst_core::contract::{
    AccessCredential, ContentKind, CredentialResolver, DirectoryEntry, FetchError,
    MockRepositoryHost, RepositoryHost, RepositoryMetadata, RepositorySummary, TreeListing,
};
use repo_analyst_core::coordinates::RepositoryCoordinates;
use repo_analyst_core::credentials::StaticCredentialResolver;
use repo_analyst_core::job::IngestionPipeline;
use repo_analyst_core::queue::JobQueue;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, Semaphore};

/// Blocks every metadata request on a gate that the test never opens.
struct BlockedHost {
    calls: AtomicUsize,
    gate: Semaphore,
    started: mpsc::UnboundedSender<String>,
}

#[async_trait]
impl RepositoryHost for BlockedHost {
    async fn get_repository(
        &self,
        repository: &RepositoryCoordinates,
        _credential: &AccessCredential,
    ) -> Result<RepositoryMetadata, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let _ = self.started.send(repository.full_name());
        let _permit = self.gate.acquire().await;
        Err(FetchError::NotFound)
    }

    async fn get_tree(
        &self,
        _repository: &RepositoryCoordinates,
        _branch: &str,
        _credential: &AccessCredential,
    ) -> Result<TreeListing, FetchError> {
        Err(FetchError::NotFound)
    }

    async fn get_file_content(
        &self,
        _url: &str,
        _credential: &AccessCredential,
    ) -> Result<String, FetchError> {
        Err(FetchError::NotFound)
    }

    async fn list_directory(
        &self,
        _repository: &RepositoryCoordinates,
        _path: &str,
        _credential: &AccessCredential,
    ) -> Result<Vec<DirectoryEntry>, FetchError> {
        Ok(Vec::new())
    }

    async fn list_repositories(
        &self,
        _page: u32,
        _per_page: u32,
        _credential: &AccessCredential,
    ) -> Result<Vec<RepositorySummary>, FetchError> {
        Ok(Vec::new())
    }
}

fn blocked_host() -> (Arc<BlockedHost>, mpsc::UnboundedReceiver<String>) {
    let (started, rx) = mpsc::unbounded_channel();
    let host = Arc::new(BlockedHost {
        calls: AtomicUsize::new(0),
        gate: Semaphore::new(0),
        started,
    });
    (host, rx)
}

fn resolver() -> Arc<dyn CredentialResolver> {
    Arc::new(StaticCredentialResolver::new().with_user("user_1", "gh-token"))
}

async fn spawn_app(
    host: Arc<dyn RepositoryHost>,
    credentials: Arc<dyn CredentialResolver>,
    queue: QueueSettings,
) -> String {
    let pipeline = Arc::new(IngestionPipeline::new(
        host.clone(),
        credentials.clone(),
        Arc::new(LoggingCorpusSink),
    ));
    let (queue, _pool) = JobQueue::start(pipeline, &queue);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());
    let state = AppState {
        queue,
        host,
        credentials,
    };
    tokio::spawn(server::serve(listener, state, std::future::pending()));
    base
}

async fn start(base: &str, user: Option<&str>, body: Value) -> (u16, Value) {
    let mut request = reqwest::Client::new()
        .post(format!("{base}/api/analysis/start"))
        .json(&body);
    if let Some(user) = user {
        request = request.header(USER_HEADER, user);
    }
    let response = request.send().await.unwrap();
    let status = response.status().as_u16();
    (status, response.json().await.unwrap_or(Value::Null))
}

async fn get(base: &str, path: &str, user: &str) -> (u16, Value) {
    let response = reqwest::Client::new()
        .get(format!("{base}{path}"))
        .header(USER_HEADER, user)
        .send()
        .await
        .unwrap();
    let status = response.status().as_u16();
    (status, response.json().await.unwrap_or(Value::Null))
}

#[tokio::test]
async fn health_reports_ok() {
    let base = spawn_app(
        Arc::new(MockRepositoryHost::new()),
        resolver(),
        QueueSettings::default(),
    )
    .await;

    let response = reqwest::get(format!("{base}/health")).await.unwrap();
    assert_eq!(response.status().as_u16(), 200);
    assert_eq!(response.json::<Value>().await.unwrap(), json!({ "status": "ok" }));
}

#[tokio::test]
async fn start_answers_202_while_the_job_is_still_blocked() {
    let (host, mut started) = blocked_host();
    let base = spawn_app(host.clone(), resolver(), QueueSettings::default()).await;

    let (status, body) = tokio::time::timeout(
        Duration::from_secs(5),
        start(&base, Some("user_1"), json!({ "fullName": "acme/widgets" })),
    )
    .await
    .expect("trigger must not wait for the job");

    assert_eq!(status, 202);
    assert_eq!(body["message"], "Analysis job started.");
    let job_id = body["jobId"].as_str().expect("jobId is a string");
    assert!(uuid::Uuid::parse_str(job_id).is_ok(), "jobId {job_id}");

    // The job does start, and is still stuck on its first remote call.
    let repo = tokio::time::timeout(Duration::from_secs(5), started.recv())
        .await
        .unwrap();
    assert_eq!(repo.as_deref(), Some("acme/widgets"));
    assert_eq!(host.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn start_requires_an_identity() {
    let (host, _started) = blocked_host();
    let base = spawn_app(host.clone(), resolver(), QueueSettings::default()).await;

    let (status, _) = start(&base, None, json!({ "fullName": "acme/widgets" })).await;

    assert_eq!(status, 401);
    assert_eq!(host.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn start_rejects_missing_and_malformed_identifiers() {
    let (host, _started) = blocked_host();
    let base = spawn_app(host.clone(), resolver(), QueueSettings::default()).await;

    for body in [json!({}), json!({ "fullName": "" }), json!({ "fullName": null })] {
        let (status, response) = start(&base, Some("user_1"), body.clone()).await;
        assert_eq!(status, 400, "for {body}");
        assert_eq!(
            response,
            json!({ "error": "Repository fullName is required." })
        );
    }

    for name in ["widgets", "acme/", "/widgets", "acme/wid gets", "a/b/c"] {
        let (status, response) = start(&base, Some("user_1"), json!({ "fullName": name })).await;
        assert_eq!(status, 400, "for {name}");
        assert!(
            response["error"].as_str().is_some_and(|e| !e.is_empty()),
            "for {name}: {response}"
        );
    }

    // Nothing was scheduled.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(host.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn start_answers_503_when_the_queue_is_full() {
    let (host, _started) = blocked_host();
    let settings = QueueSettings {
        workers: 1,
        capacity: 1,
        deduplicate_in_flight: false,
    };
    let base = spawn_app(host, resolver(), settings).await;

    // One job can run and one can wait; the worker never finishes.
    let mut statuses = Vec::new();
    for i in 0..3 {
        let (status, _) = start(
            &base,
            Some("user_1"),
            json!({ "fullName": format!("acme/repo-{i}") }),
        )
        .await;
        statuses.push(status);
    }

    assert_eq!(statuses[0], 202);
    assert!(statuses.contains(&503), "statuses {statuses:?}");
    assert!(statuses.iter().all(|s| *s == 202 || *s == 503));
}

#[tokio::test]
async fn lists_repositories_for_users_with_a_token() {
    let mut host = MockRepositoryHost::new();
    host.expect_list_repositories()
        .withf(|page, per_page, credential| {
            *page == 2 && *per_page == 10 && credential.bearer() == "gh-token"
        })
        .times(1)
        .returning(|_, _, _| {
            Ok(vec![RepositorySummary {
                full_name: "acme/widgets".into(),
                private: false,
                default_branch: Some("main".into()),
                description: None,
                updated_at: None,
            }])
        });
    let base = spawn_app(Arc::new(host), resolver(), QueueSettings::default()).await;

    let (status, body) = get(&base, "/api/github/repos?page=2&per_page=10", "user_1").await;
    assert_eq!(status, 200);
    assert_eq!(body[0]["full_name"], "acme/widgets");

    let (status, body) = get(&base, "/api/github/repos", "user_2").await;
    assert_eq!(status, 404);
    assert_eq!(body, json!({ "error": "GitHub access token not found." }));
}

#[tokio::test]
async fn details_include_root_files_and_readme() {
    let mut host = MockRepositoryHost::new();
    host.expect_get_repository().returning(|repo, _| {
        Ok(RepositoryMetadata {
            full_name: repo.full_name(),
            default_branch: "main".into(),
            private: true,
            description: Some("Widgets".into()),
            html_url: None,
        })
    });
    host.expect_list_directory()
        .withf(|_, path, _| path.is_empty())
        .returning(|_, _, _| {
            Ok(vec![DirectoryEntry {
                name: "Readme.md".into(),
                path: "Readme.md".into(),
                kind: ContentKind::File,
                url: Some("https://api.github.com/blobs/readme".into()),
                size: Some(9),
            }])
        });
    host.expect_get_file_content()
        .withf(|url, _| url == "https://api.github.com/blobs/readme")
        .returning(|_, _| Ok("# widgets".into()));
    let base = spawn_app(Arc::new(host), resolver(), QueueSettings::default()).await;

    let (status, body) = get(&base, "/api/github/repos/acme/widgets/details", "user_1").await;

    assert_eq!(status, 200);
    assert_eq!(body["repo"]["full_name"], "acme/widgets");
    assert_eq!(body["files"][0]["name"], "Readme.md");
    assert_eq!(body["files"][0]["type"], "file");
    assert_eq!(body["readme"], "# widgets");
}

#[tokio::test]
async fn details_map_remote_failures() {
    let mut host = MockRepositoryHost::new();
    host.expect_get_repository()
        .withf(|repo, _| repo.name == "gone")
        .returning(|_, _| Err(FetchError::NotFound));
    host.expect_get_repository()
        .returning(|_, _| Err(FetchError::Status(500)));
    host.expect_list_directory()
        .returning(|_, _, _| Ok(Vec::new()));
    let base = spawn_app(Arc::new(host), resolver(), QueueSettings::default()).await;

    let (status, body) = get(&base, "/api/github/repos/acme/gone/details", "user_1").await;
    assert_eq!(status, 404);
    assert_eq!(body, json!({ "error": "Repository not found." }));

    let (status, _) = get(&base, "/api/github/repos/acme/widgets/details", "user_1").await;
    assert_eq!(status, 502);

    let (status, body) = get(&base, "/api/github/repos/acme/widgets/details", "user_2").await;
    assert_eq!(status, 404);
    assert_eq!(body, json!({ "error": "GitHub access token not found." }));
}
