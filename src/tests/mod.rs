//! Integration tests for the ZipShip backend.
//!
//! The real router runs against a temporary SQLite ledger and a fake GitHub API.


use std::sync::Arc;
use std::time::Duration;

use reqwest::multipart::{Form, Part};
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use tempfile::TempDir;

use crate::archive::test_support::build_zip;
use crate::auth::ConfiguredPolicy;
use crate::config::Config;
use crate::db::{init_database, Repository};
use crate::deploy::Deployer;
use crate::github::{GithubClient, RepositorySynchronizer, SyncSettings};
use crate::models::{NewPurchase, UNLIMITED_DEPLOYS};
use crate::rewrite::{AutoFixer, MockTextGenerator, BADGE_SNIPPET};
use crate::{create_router, AppState};
use fake_github::{FakeGithub, REVOKED_TOKEN};

const PSK: &str = "test-api-key";
const ADMIN: &str = "admin-1";

/// Test fixture for integration tests.
struct TestFixture {
    client: Client,
    base_url: String,
    repo: Arc<Repository>,
    github: FakeGithub,
    _temp_dir: TempDir,
}

impl TestFixture {
    async fn new() -> Self {
        Self::with_fixer(None).await
    }

    async fn with_fixer(fixer: Option<AutoFixer>) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let db_path = temp_dir.path().join("test.sqlite");

        let pool = init_database(&db_path).await.expect("Failed to init DB");
        let repo = Arc::new(Repository::new(pool));
        let github = FakeGithub::start().await;

        let config = Config {
            api_psk: Some(PSK.to_string()),
            db_path,
            bind_addr: "127.0.0.1:0".parse().unwrap(),
            log_level: "warn".to_string(),
            github_api_url: github.base_url.clone(),
            ai_api_key: None,
            ai_base_url: "http://127.0.0.1:9".to_string(),
            ai_model: "test-model".to_string(),
            max_upload_bytes: 5 * 1024 * 1024,
            blob_batch_size: 3,
            repo_settle_delay: Duration::ZERO,
            remote_timeout: Duration::from_secs(5),
            privileged_users: vec![ADMIN.to_string()],
        };

        let client = GithubClient::new(&config.github_api_url, config.remote_timeout).unwrap();
        let synchronizer = RepositorySynchronizer::new(
            Arc::new(client),
            SyncSettings {
                blob_batch_size: config.blob_batch_size,
                settle_delay: config.repo_settle_delay,
            },
        );

        let state = AppState {
            deployer: Arc::new(Deployer::new(repo.clone(), synchronizer, fixer)),
            repo: repo.clone(),
            policy: Arc::new(ConfiguredPolicy::new(config.privileged_users.clone())),
            config: Arc::new(config),
        };

        let app = create_router(state);

        // Bind to random port
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind");
        let addr = listener.local_addr().expect("Failed to get addr");
        let base_url = format!("http://{}", addr);

        // Spawn server
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        // Wait for server to start
        tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;

        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert("x-api-key", PSK.parse().unwrap());
        let client = Client::builder().default_headers(headers).build().unwrap();

        TestFixture {
            client,
            base_url,
            repo,
            github,
            _temp_dir: temp_dir,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn get(&self, user: &str, path: &str) -> (StatusCode, Value) {
        let resp = self
            .client
            .get(self.url(path))
            .header("x-user-id", user)
            .send()
            .await
            .unwrap();
        let status = resp.status();
        (status, resp.json().await.unwrap())
    }

    async fn connect(&self, user: &str, token: &str) {
        let resp = self
            .client
            .put(self.url("/api/github/connection"))
            .header("x-user-id", user)
            .json(&json!({
                "githubUserId": "583231",
                "githubUsername": "octo",
                "githubAvatarUrl": "https://avatars.example/octo.png",
                "accessToken": token,
            }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
    }

    async fn grant(&self, user: &str, deploys: i64, amount_paid: i64) {
        self.repo
            .create_purchase(&NewPurchase {
                user_id: user.to_string(),
                plan_type: "test".to_string(),
                deploys_included: deploys,
                amount_paid,
                expires_at: None,
            })
            .await
            .unwrap();
    }

    /// Connected user with `deploys` free credits.
    async fn ready_user(&self, user: &str, deploys: i64) {
        self.connect(user, "gho_valid").await;
        self.grant(user, deploys, 0).await;
    }

    async fn deploy(&self, user: &str, project: &str, zip: Vec<u8>) -> (StatusCode, Value) {
        self.deploy_with(user, project, zip, &[]).await
    }

    async fn deploy_with(
        &self,
        user: &str,
        project: &str,
        zip: Vec<u8>,
        extra: &[(&str, &str)],
    ) -> (StatusCode, Value) {
        let mut form = Form::new()
            .text("projectName", project.to_string())
            .part(
                "file",
                Part::bytes(zip)
                    .file_name("upload.zip")
                    .mime_str("application/zip")
                    .unwrap(),
            );
        for (name, value) in extra {
            form = form.text(name.to_string(), value.to_string());
        }

        let resp = self
            .client
            .post(self.url("/api/deploy-zip"))
            .header("x-user-id", user)
            .multipart(form)
            .send()
            .await
            .unwrap();
        let status = resp.status();
        (status, resp.json().await.unwrap())
    }
}

fn warnings(body: &Value) -> Vec<String> {
    body["data"]["warnings"]
        .as_array()
        .unwrap()
        .iter()
        .map(|w| w.as_str().unwrap().to_string())
        .collect()
}

// ==================== AUTH ====================

#[tokio::test]
async fn test_health_check() {
    let fixture = TestFixture::new().await;

    let resp = Client::new().get(fixture.url("/health")).send().await.unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.text().await.unwrap(), "OK");
}

#[tokio::test]
async fn test_auth_missing_psk() {
    let fixture = TestFixture::new().await;

    let resp = Client::new()
        .get(fixture.url("/api/user/stats"))
        .header("x-user-id", "u1")
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 401);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["success"], false);
    assert_eq!(body["error"]["code"], "UNAUTHORIZED");
}

#[tokio::test]
async fn test_auth_invalid_psk() {
    let fixture = TestFixture::new().await;

    let resp = Client::new()
        .get(fixture.url("/api/user/stats"))
        .header("x-api-key", "wrong-key")
        .header("x-user-id", "u1")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);

    let resp = Client::new()
        .get(fixture.url("/api/user/stats"))
        .bearer_auth(PSK)
        .header("x-user-id", "u1")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
}

#[tokio::test]
async fn test_missing_user_header() {
    let fixture = TestFixture::new().await;

    let resp = fixture
        .client
        .get(fixture.url("/api/deploys"))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 401);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "UNAUTHORIZED");
}

// ==================== CONNECTIONS AND CREDITS ====================

#[tokio::test]
async fn test_github_connection_lifecycle() {
    let fixture = TestFixture::new().await;

    let (status, body) = fixture.get("u1", "/api/github/status").await;
    assert_eq!(status, 200);
    assert_eq!(body["data"]["connected"], false);

    fixture.connect("u1", "gho_first").await;
    fixture.connect("u1", "gho_second").await;

    let (_, body) = fixture.get("u1", "/api/github/status").await;
    assert_eq!(body["data"]["connected"], true);
    assert_eq!(body["data"]["username"], "octo");
    assert_eq!(body["data"]["avatarUrl"], "https://avatars.example/octo.png");
    assert_eq!(
        fixture.repo.resolve_credential("u1").await.unwrap().token,
        "gho_second"
    );

    let resp = fixture
        .client
        .delete(fixture.url("/api/github/connection"))
        .header("x-user-id", "u1")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let (_, body) = fixture.get("u1", "/api/github/status").await;
    assert_eq!(body["data"]["connected"], false);
}

#[tokio::test]
async fn test_connection_requires_token() {
    let fixture = TestFixture::new().await;

    let resp = fixture
        .client
        .put(fixture.url("/api/github/connection"))
        .header("x-user-id", "u1")
        .json(&json!({
            "githubUserId": "1",
            "githubUsername": "octo",
            "accessToken": "  ",
        }))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn test_grant_is_privileged_and_capped() {
    let fixture = TestFixture::new().await;

    let resp = fixture
        .client
        .post(fixture.url("/api/credits/grant"))
        .header("x-user-id", "u1")
        .json(&json!({ "amount": 3 }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 403);

    let resp = fixture
        .client
        .post(fixture.url("/api/credits/grant"))
        .header("x-user-id", ADMIN)
        .json(&json!({ "amount": 50 }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["data"]["granted"], 10);
    assert_eq!(body["data"]["remainingDeploys"], 10);

    let resp = fixture
        .client
        .post(fixture.url("/api/credits/grant"))
        .header("x-user-id", ADMIN)
        .json(&json!({}))
        .send()
        .await
        .unwrap();
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["data"]["granted"], 5);
    assert_eq!(body["data"]["remainingDeploys"], 15);
}

#[tokio::test]
async fn test_stats_report_unlimited() {
    let fixture = TestFixture::new().await;
    fixture.grant("u1", UNLIMITED_DEPLOYS, 9900).await;

    let (status, body) = fixture.get("u1", "/api/user/stats").await;
    assert_eq!(status, 200);
    assert_eq!(body["data"]["remainingDeploys"], -1);
    assert_eq!(body["data"]["hasUnlimited"], true);
    assert_eq!(body["data"]["isFreeTier"], false);
    assert_eq!(body["data"]["purchases"].as_array().unwrap().len(), 1);
}

// ==================== DEPLOY ====================

#[tokio::test]
async fn test_credit_gate_blocks_before_processing() {
    let fixture = TestFixture::new().await;
    fixture.connect("u1", "gho_valid").await;

    let (status, body) = fixture
        .deploy("u1", "app", build_zip(&[("index.js", b"1")]))
        .await;

    assert_eq!(status, 402);
    assert_eq!(body["error"]["code"], "CREDIT_EXHAUSTED");
    assert_eq!(fixture.github.request_count(), 0);

    let (_, history) = fixture.get("u1", "/api/deploys").await;
    assert!(history["data"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_deploy_without_connection() {
    let fixture = TestFixture::new().await;
    fixture.grant("u1", 1, 0).await;

    let (status, body) = fixture
        .deploy("u1", "app", build_zip(&[("index.js", b"1")]))
        .await;

    assert_eq!(status, 503);
    assert_eq!(body["error"]["code"], "IDENTITY_NOT_CONNECTED");

    let (_, stats) = fixture.get("u1", "/api/user/stats").await;
    assert_eq!(stats["data"]["remainingDeploys"], 1);
    assert_eq!(stats["data"]["totalDeploys"], 0);
}

#[tokio::test]
async fn test_first_deploy_creates_repository() {
    let fixture = TestFixture::new().await;
    fixture.ready_user("u1", 2).await;

    let zip = build_zip(&[
        ("my-app/", b""),
        ("my-app/index.js", b"console.log('hi')"),
        ("my-app/src/util.js", b"export {}"),
        ("my-app/logo.png", &[0x89, b'P', b'N', b'G', 0xff]),
        ("my-app/.DS_Store", b"junk"),
        ("__MACOSX/my-app/._index.js", b"junk"),
    ]);
    let (status, body) = fixture
        .deploy_with("u1", "My App", zip, &[("isPrivate", "true")])
        .await;

    assert_eq!(status, 200, "{}", body);
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["isUpdate"], false);
    assert_eq!(body["data"]["fileCount"], 3);
    assert_eq!(body["data"]["repoUrl"], "https://github.com/octo/my-app");
    assert_eq!(body["data"]["deployment"]["status"], "success");

    assert!(fixture.github.is_private("my-app"));
    assert_eq!(
        fixture.github.paths("my-app"),
        vec!["index.js", "logo.png", "src/util.js"]
    );
    assert_eq!(
        fixture.github.files("my-app")["logo.png"],
        vec![0x89, b'P', b'N', b'G', 0xff]
    );
    assert_eq!(
        fixture.github.history("my-app"),
        vec!["Initial upload via ZipShip", "Initial commit"]
    );

    let (_, stats) = fixture.get("u1", "/api/user/stats").await;
    assert_eq!(stats["data"]["remainingDeploys"], 1);
    assert_eq!(stats["data"]["totalDeploys"], 1);
}

#[tokio::test]
async fn test_redeploy_is_idempotent() {
    let fixture = TestFixture::new().await;
    fixture.ready_user("u1", 2).await;
    let zip = || build_zip(&[("index.html", b"<p>hi</p>"), ("app.js", b"run()")]);

    let (_, first) = fixture.deploy("u1", "site", zip()).await;
    assert_eq!(first["data"]["isUpdate"], false);
    let before = fixture.github.files("site");

    let (status, second) = fixture.deploy("u1", "site", zip()).await;
    assert_eq!(status, 200);
    assert_eq!(second["data"]["isUpdate"], true);
    assert_eq!(second["data"]["repoUrl"], first["data"]["repoUrl"]);
    assert_eq!(fixture.github.files("site"), before);
    assert_eq!(
        fixture.github.history("site")[0],
        "Updated via ZipShip"
    );
}

#[tokio::test]
async fn test_redeploy_replaces_tree() {
    let fixture = TestFixture::new().await;
    fixture.ready_user("u1", 2).await;

    fixture
        .deploy("u1", "proj", build_zip(&[("a.js", b"a"), ("b.js", b"b1")]))
        .await;
    let (status, _) = fixture
        .deploy("u1", "proj", build_zip(&[("b.js", b"b2"), ("c.js", b"c")]))
        .await;

    assert_eq!(status, 200);
    assert_eq!(fixture.github.paths("proj"), vec!["b.js", "c.js"]);
    assert_eq!(fixture.github.file_text("proj", "b.js").unwrap(), "b2");
}

#[tokio::test]
async fn test_partial_wrapper_is_preserved() {
    let fixture = TestFixture::new().await;
    fixture.ready_user("u1", 1).await;

    let (status, _) = fixture
        .deploy(
            "u1",
            "mixed",
            build_zip(&[("proj/a.js", b"a"), ("loose.js", b"l")]),
        )
        .await;

    assert_eq!(status, 200);
    assert_eq!(fixture.github.paths("mixed"), vec!["loose.js", "proj/a.js"]);
}

#[tokio::test]
async fn test_unsafe_paths_are_reported_not_synced() {
    let fixture = TestFixture::new().await;
    fixture.ready_user("u1", 1).await;

    let zip = build_zip(&[
        ("../../etc/passwd", b"root:x:0:0"),
        ("/etc/passwd", b"root:x:0:0"),
        ("ok.js", b"ok"),
    ]);
    let (status, body) = fixture.deploy("u1", "safe", zip).await;

    assert_eq!(status, 200);
    assert_eq!(fixture.github.paths("safe"), vec!["ok.js"]);
    let warnings = warnings(&body);
    assert!(warnings.contains(&"Blocked path traversal: ../../etc/passwd".to_string()));
    assert!(warnings.contains(&"Blocked absolute path: /etc/passwd".to_string()));
}

#[tokio::test]
async fn test_repository_name_is_sanitized() {
    let fixture = TestFixture::new().await;
    fixture.ready_user("u1", 1).await;

    let (_, body) = fixture
        .deploy("u1", "My Cool App!! v2", build_zip(&[("main.py", b"print(1)")]))
        .await;
    assert_eq!(
        body["data"]["repoUrl"],
        "https://github.com/octo/my-cool-app-v2"
    );

    let (status, probe) = fixture
        .get("u1", "/api/github/repos/My%20Cool%20App!!%20v2")
        .await;
    assert_eq!(status, 200);
    assert_eq!(probe["data"]["exists"], true);
    assert_eq!(probe["data"]["repoName"], "my-cool-app-v2");

    let (_, probe) = fixture.get("u1", "/api/github/repos/%3F%3F%3F").await;
    assert_eq!(probe["data"]["exists"], false);
    assert_eq!(probe["data"]["repoName"], "zipship-project");
}

#[tokio::test]
async fn test_invalid_archive_fails_ledger_entry() {
    let fixture = TestFixture::new().await;
    fixture.ready_user("u1", 1).await;

    let (status, body) = fixture
        .deploy("u1", "broken", b"this is not a zip".to_vec())
        .await;
    assert_eq!(status, 400);
    assert_eq!(body["error"]["code"], "INVALID_ARCHIVE");

    let (status, body) = fixture
        .deploy("u1", "hidden", build_zip(&[(".env", b"SECRET=1")]))
        .await;
    assert_eq!(status, 402, "{}", body);

    let (_, history) = fixture.get("u1", "/api/deploys").await;
    let history = history["data"].as_array().unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0]["status"], "failed");
    assert!(!fixture.github.exists("broken"));
}

#[tokio::test]
async fn test_remote_failure_leaves_branch_untouched() {
    let fixture = TestFixture::new().await;
    fixture.ready_user("u1", 2).await;

    fixture
        .deploy("u1", "svc", build_zip(&[("v1.js", b"1")]))
        .await;
    fixture.github.fail_blob_uploads(true);

    let (status, body) = fixture
        .deploy("u1", "svc", build_zip(&[("v2.js", b"2")]))
        .await;

    assert_eq!(status, 502);
    assert_eq!(body["error"]["code"], "REMOTE_SYNC_FAILURE");
    assert_eq!(fixture.github.paths("svc"), vec!["v1.js"]);

    let (_, history) = fixture.get("u1", "/api/deploys").await;
    let statuses: Vec<_> = history["data"]
        .as_array()
        .unwrap()
        .iter()
        .map(|d| d["status"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(statuses, vec!["failed", "success"]);
}

#[tokio::test]
async fn test_revoked_token_is_sync_failure() {
    let fixture = TestFixture::new().await;
    fixture.connect("u1", REVOKED_TOKEN).await;
    fixture.grant("u1", 1, 0).await;

    let (status, body) = fixture
        .deploy("u1", "app", build_zip(&[("a.js", b"a")]))
        .await;

    assert_eq!(status, 502);
    assert!(body["error"]["message"]
        .as_str()
        .unwrap()
        .contains("Bad credentials"));
}

#[tokio::test]
async fn test_free_tier_gets_badge() {
    let fixture = TestFixture::new().await;
    fixture.ready_user("free", 1).await;
    fixture.connect("paid", "gho_valid").await;
    fixture.grant("paid", 1, 500).await;

    let zip = || {
        build_zip(&[
            ("index.html", b"<html><BODY>hi</BODY></html>"),
            ("about.html", b"<p>no body tag</p>"),
            ("style.css", b"body{}"),
        ])
    };

    let (status, _) = fixture.deploy("free", "site", zip()).await;
    assert_eq!(status, 200);
    assert_eq!(
        fixture.github.file_text("site", "index.html").unwrap(),
        format!("<html><BODY>hi{}</BODY></html>", BADGE_SNIPPET)
    );
    assert_eq!(
        fixture.github.file_text("site", "about.html").unwrap(),
        format!("<p>no body tag</p>{}", BADGE_SNIPPET)
    );
    assert_eq!(fixture.github.file_text("site", "style.css").unwrap(), "body{}");

    let (status, _) = fixture.deploy("paid", "site", zip()).await;
    assert_eq!(status, 200);
    assert_eq!(
        fixture.github.file_text("site", "index.html").unwrap(),
        "<html><BODY>hi</BODY></html>"
    );
}

#[tokio::test]
async fn test_unparseable_ai_reply_is_not_fatal() {
    let mut generator = MockTextGenerator::new();
    generator
        .expect_complete()
        .times(1)
        .returning(|_, _| Ok("Sure! Here are my thoughts, no JSON though.".to_string()));
    let fixture = TestFixture::with_fixer(Some(AutoFixer::new(Arc::new(generator)))).await;
    fixture.ready_user("u1", 1).await;

    let (status, body) = fixture
        .deploy_with(
            "u1",
            "next-app",
            build_zip(&[("package.json", br#"{"name":"next-app"}"#), ("a.js", b"a")]),
            &[("aiFixEnabled", "true")],
        )
        .await;

    assert_eq!(status, 200);
    assert_eq!(body["data"]["aiApplied"], false);
    assert!(warnings(&body).iter().any(|w| w.starts_with("AI analysis failed")));
    assert_eq!(fixture.github.paths("next-app"), vec!["a.js", "package.json"]);
}

#[tokio::test]
async fn test_ai_fixes_are_applied() {
    let reply = json!({
        "hasIssues": true,
        "issues": ["Missing build script"],
        "fixes": [
            {
                "action": "modify",
                "file": "package.json",
                "content": "{\"name\":\"next-app\",\"scripts\":{\"build\":\"next build\"}}",
                "reason": "add build script"
            },
            { "action": "create", "file": ".nvmrc", "content": "20\n", "reason": "pin node" },
            { "action": "create", "file": "../escape.txt", "content": "x", "reason": "bad" },
            { "action": "delete", "file": "old.js", "reason": "unused" }
        ]
    })
    .to_string();

    let mut generator = MockTextGenerator::new();
    generator
        .expect_complete()
        .returning(move |_, _| Ok(format!("Here you go:\n{}", reply)));
    let fixture = TestFixture::with_fixer(Some(AutoFixer::new(Arc::new(generator)))).await;
    fixture.ready_user("u1", 1).await;

    let (status, body) = fixture
        .deploy_with(
            "u1",
            "next-app",
            build_zip(&[
                ("package.json", br#"{"name":"next-app"}"#),
                ("old.js", b"old"),
                ("img.png", &[0, 1, 2]),
            ]),
            &[("aiFixEnabled", "true")],
        )
        .await;

    assert_eq!(status, 200, "{}", body);
    assert_eq!(body["data"]["aiApplied"], true);
    assert_eq!(
        fixture.github.paths("next-app"),
        vec![".nvmrc", "img.png", "package.json"]
    );
    assert!(fixture
        .github
        .file_text("next-app", "package.json")
        .unwrap()
        .contains("next build"));
    assert_eq!(fixture.github.files("next-app")["img.png"], vec![0, 1, 2]);
    assert!(warnings(&body)
        .iter()
        .any(|w| w == "AI fix ignored unsafe path: ../escape.txt"));
}
