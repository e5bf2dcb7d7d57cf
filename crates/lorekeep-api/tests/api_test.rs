//! HTTP tests against a live router over the in-memory store.
//!
//! Each test binds the router to an ephemeral port and talks to it with
//! reqwest, so multipart parsing, routing and SSE framing are exercised for
//! real. Embeddings come from the deterministic mock backend.

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use reqwest::multipart::{Form, Part};
use reqwest::StatusCode;
use serde_json::{json, Value};
use tempfile::TempDir;

use lorekeep_api::{router, AppState, ServerConfig};
use lorekeep_db::MemoryStore;
use lorekeep_inference::mock::MockEmbeddingBackend;
use lorekeep_inference::RetryPolicy;
use lorekeep_jobs::IngestConfig;

const WAIT: Duration = Duration::from_secs(20);

struct TestServer {
    base_url: String,
    state: AppState,
    client: reqwest::Client,
    _tmp: TempDir,
}

async fn spawn_server(config: ServerConfig) -> TestServer {
    let tmp = TempDir::new().unwrap();
    let ingest = IngestConfig::default()
        .with_max_concurrent_files(2)
        .with_chunking(200, 0)
        .with_retry(RetryPolicy::new(2, Duration::from_millis(1), Duration::from_secs(5)))
        .with_staging_dir(tmp.path().join("staging"));
    let state = AppState::new(
        MemoryStore::new().repositories(),
        Arc::new(MockEmbeddingBackend::new()),
        ingest,
        config,
    );

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = router(state.clone());
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    TestServer {
        base_url: format!("http://{}", addr),
        state,
        client: reqwest::Client::new(),
        _tmp: tmp,
    }
}

impl TestServer {
    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn create_collection(&self, name: &str) -> String {
        let resp = self
            .client
            .post(self.url("/api/v1/collections"))
            .json(&json!({ "name": name }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::CREATED);
        let body: Value = resp.json().await.unwrap();
        body["id"].as_str().unwrap().to_string()
    }

    /// POST a multipart form and return status and JSON body.
    async fn post_form(&self, path: &str, form: Form) -> (StatusCode, Value) {
        let resp = self
            .client
            .post(self.url(path))
            .multipart(form)
            .send()
            .await
            .unwrap();
        let status = resp.status();
        (status, resp.json().await.unwrap())
    }

    async fn get_json(&self, path: &str) -> (StatusCode, Value) {
        let resp = self.client.get(self.url(path)).send().await.unwrap();
        let status = resp.status();
        (status, resp.json().await.unwrap())
    }

    async fn wait(&self, job_id: &str) {
        self.state
            .manager
            .wait_for_completion(job_id, WAIT)
            .await
            .unwrap();
    }
}

/// Multipart form with one `files` part per entry; slashes in names are kept.
fn batch_form(files: &[(&str, &str)]) -> Form {
    files
        .iter()
        .fold(Form::new().percent_encode_noop(), |form, (name, body)| {
            form.part(
                "files",
                Part::bytes(body.as_bytes().to_vec()).file_name(name.to_string()),
            )
        })
}

fn zip_bytes(entries: &[(&str, &str)]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
    for (name, body) in entries {
        writer
            .start_file(*name, zip::write::SimpleFileOptions::default())
            .unwrap();
        writer.write_all(body.as_bytes()).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

#[tokio::test]
async fn test_health_check() {
    let server = spawn_server(ServerConfig::default()).await;
    let (status, body) = server.get_json("/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["running_jobs"], 0);
}

#[tokio::test]
async fn test_request_id_header_is_set() {
    let server = spawn_server(ServerConfig::default()).await;
    let resp = server.client.get(server.url("/health")).send().await.unwrap();
    let id = resp.headers().get("x-request-id").unwrap().to_str().unwrap();
    assert_eq!(id.len(), 36);
}

#[tokio::test]
async fn test_collection_crud() {
    let server = spawn_server(ServerConfig::default()).await;
    let id = server.create_collection("handbook").await;

    let (status, body) = server.get_json(&format!("/api/v1/collections/{}", id)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["name"], "handbook");
    assert_eq!(body["total_documents"], 0);

    let (_, list) = server.get_json("/api/v1/collections").await;
    assert_eq!(list.as_array().unwrap().len(), 1);

    let resp = server
        .client
        .delete(server.url(&format!("/api/v1/collections/{}", id)))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);

    let (status, body) = server.get_json(&format!("/api/v1/collections/{}", id)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn test_blank_collection_name_rejected() {
    let server = spawn_server(ServerConfig::default()).await;
    let resp = server
        .client
        .post(server.url("/api/v1/collections"))
        .json(&json!({ "name": "   " }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_upload_batch_builds_folder_tree() {
    let server = spawn_server(ServerConfig::default()).await;
    let cid = server.create_collection("docs").await;

    let form = batch_form(&[
        ("guides/setup.md", "# Setup\n\nInstall the server and run migrations."),
        ("guides/api/auth.txt", "Tokens are issued per collection."),
        ("readme.txt", "Top level notes."),
    ])
    .text("preserve_structure", "true");
    let (status, body) = server
        .post_form(&format!("/api/v1/collections/{}/upload-batch", cid), form)
        .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["status"], "accepted");
    let job_id = body["job_id"].as_str().unwrap().to_string();
    assert!(job_id.starts_with("upload_"));

    server.wait(&job_id).await;

    let (status, job) = server
        .get_json(&format!("/api/v1/collections/{}/upload-jobs/{}", cid, job_id))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(job["status"], "completed");
    assert_eq!(job["successful_files"], 3);
    assert_eq!(job["progress"]["percentage"], 100.0);

    let (_, docs) = server
        .get_json(&format!("/api/v1/collections/{}/documents?folder_path=guides", cid))
        .await;
    let docs = docs.as_array().unwrap();
    assert_eq!(docs.len(), 1);
    assert_eq!(docs[0]["relative_path"], "guides/setup.md");

    let (_, tree) = server
        .get_json(&format!("/api/v1/collections/{}/folder-tree", cid))
        .await;
    let roots = tree["tree"].as_array().unwrap();
    assert_eq!(roots.len(), 1);
    assert_eq!(roots[0]["full_path"], "guides");
    assert_eq!(roots[0]["document_count"], 1);
    assert_eq!(roots[0]["total_documents"], 2);
    assert_eq!(roots[0]["children"][0]["full_path"], "guides/api");
    assert_eq!(tree["summary"]["total_folders"], 2);

    let (_, shallow) = server
        .get_json(&format!("/api/v1/collections/{}/folder-tree?max_depth=0", cid))
        .await;
    assert!(shallow["tree"][0]["children"].as_array().unwrap().is_empty());

    let (_, collection) = server.get_json(&format!("/api/v1/collections/{}", cid)).await;
    assert_eq!(collection["total_documents"], 3);
}

#[tokio::test]
async fn test_upload_batch_rejects_bad_paths() {
    let server = spawn_server(ServerConfig::default()).await;
    let cid = server.create_collection("docs").await;
    let path = format!("/api/v1/collections/{}/upload-batch", cid);

    let (status, _) = server
        .post_form(&path, batch_form(&[("../escape.txt", "nope")]))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = server
        .post_form(&path, batch_form(&[("a.txt", "one"), ("a.txt", "two")]))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("Duplicate"));

    let (status, _) = server
        .post_form(&path, Form::new().text("preserve_structure", "true"))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // Rejected uploads leave no job behind
    let (_, jobs) = server
        .get_json(&format!("/api/v1/collections/{}/upload-jobs", cid))
        .await;
    assert!(jobs.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_upload_batch_file_limit() {
    let server = spawn_server(ServerConfig {
        max_batch_files: 2,
        ..Default::default()
    })
    .await;
    let cid = server.create_collection("docs").await;

    let (status, body) = server
        .post_form(
            &format!("/api/v1/collections/{}/upload-batch", cid),
            batch_form(&[("a.txt", "a"), ("b.txt", "b"), ("c.txt", "c")]),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("at most 2"));

    let (_, formats) = server.get_json("/api/v1/formats/supported").await;
    assert_eq!(formats["max_batch_files"], 2);
}

#[tokio::test]
async fn test_upload_to_unknown_collection_is_404() {
    let server = spawn_server(ServerConfig::default()).await;
    let (status, _) = server
        .post_form(
            &format!("/api/v1/collections/{}/upload-batch", uuid::Uuid::nil()),
            batch_form(&[("a.txt", "a")]),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_upload_folder_zip() {
    let server = spawn_server(ServerConfig::default()).await;
    let cid = server.create_collection("archive").await;

    let archive = zip_bytes(&[
        ("handbook/policies/leave.txt", "Leave requests go to your manager."),
        ("handbook/policies/travel.md", "# Travel\n\nBook through the portal."),
        ("handbook/intro.txt", "Welcome aboard."),
    ]);
    let form = Form::new().part(
        "file",
        Part::bytes(archive).file_name("handbook.zip"),
    );
    let (status, body) = server
        .post_form(&format!("/api/v1/collections/{}/upload-folder", cid), form)
        .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let job_id = body["job_id"].as_str().unwrap().to_string();
    server.wait(&job_id).await;

    let (_, job) = server
        .get_json(&format!("/api/v1/collections/{}/upload-jobs/{}", cid, job_id))
        .await;
    assert_eq!(job["status"], "completed");
    assert_eq!(job["total_files"], 3);

    // The wrapper directory named after the archive is not a folder node
    let (_, stats) = server
        .get_json(&format!("/api/v1/collections/{}/folder-stats?folder_path=policies", cid))
        .await;
    assert_eq!(stats["folders"][0]["full_path"], "policies");
    assert_eq!(stats["folders"][0]["document_count"], 2);
    assert_eq!(stats["breadcrumbs"][0]["name"], "policies");
    assert_eq!(stats["summary"]["total_folders"], 1);
}

#[tokio::test]
async fn test_upload_folder_requires_zip() {
    let server = spawn_server(ServerConfig::default()).await;
    let cid = server.create_collection("archive").await;
    let form = Form::new().part("file", Part::bytes(b"plain".to_vec()).file_name("notes.txt"));
    let (status, body) = server
        .post_form(&format!("/api/v1/collections/{}/upload-folder", cid), form)
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("ZIP"));
}

#[tokio::test]
async fn test_job_scoped_to_collection() {
    let server = spawn_server(ServerConfig::default()).await;
    let first = server.create_collection("first").await;
    let second = server.create_collection("second").await;

    let (_, body) = server
        .post_form(
            &format!("/api/v1/collections/{}/upload-batch", first),
            batch_form(&[("a.txt", "alpha")]),
        )
        .await;
    let job_id = body["job_id"].as_str().unwrap().to_string();
    server.wait(&job_id).await;

    let (status, _) = server
        .get_json(&format!("/api/v1/collections/{}/upload-jobs/{}", second, job_id))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    // Completed jobs cannot be cancelled
    let resp = server
        .client
        .delete(server.url(&format!("/api/v1/collections/{}/upload-jobs/{}", first, job_id)))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_list_jobs_filters() {
    let server = spawn_server(ServerConfig::default()).await;
    let cid = server.create_collection("docs").await;
    let (_, body) = server
        .post_form(
            &format!("/api/v1/collections/{}/upload-batch", cid),
            batch_form(&[("a.txt", "alpha")]),
        )
        .await;
    server.wait(body["job_id"].as_str().unwrap()).await;

    let (_, completed) = server
        .get_json(&format!("/api/v1/collections/{}/upload-jobs?status=completed", cid))
        .await;
    assert_eq!(completed.as_array().unwrap().len(), 1);

    let (_, failed) = server
        .get_json(&format!("/api/v1/collections/{}/upload-jobs?status=failed", cid))
        .await;
    assert!(failed.as_array().unwrap().is_empty());

    let (status, _) = server
        .get_json(&format!("/api/v1/collections/{}/upload-jobs?status=bogus", cid))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_stream_of_finished_job() {
    let server = spawn_server(ServerConfig::default()).await;
    let cid = server.create_collection("docs").await;
    let (_, body) = server
        .post_form(
            &format!("/api/v1/collections/{}/upload-batch", cid),
            batch_form(&[("a.txt", "alpha")]),
        )
        .await;
    let job_id = body["job_id"].as_str().unwrap().to_string();
    server.wait(&job_id).await;

    let resp = server
        .client
        .get(server.url(&format!(
            "/api/v1/collections/{}/upload-jobs/{}/stream",
            cid, job_id
        )))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert!(resp.headers()["content-type"]
        .to_str()
        .unwrap()
        .starts_with("text/event-stream"));

    // A terminal job gets its snapshot and the completion event, then the stream ends
    let text = tokio::time::timeout(WAIT, resp.text()).await.unwrap().unwrap();
    let status_at = text.find("event: job_status").unwrap();
    let complete_at = text.find("event: job_complete").unwrap();
    assert!(status_at < complete_at);
    assert!(text.contains("\"status\":\"completed\""));
}

#[tokio::test]
async fn test_stream_unknown_job_is_404() {
    let server = spawn_server(ServerConfig::default()).await;
    let cid = server.create_collection("docs").await;
    let resp = server
        .client
        .get(server.url(&format!(
            "/api/v1/collections/{}/upload-jobs/upload_0_missing/stream",
            cid
        )))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_search_after_upload() {
    let server = spawn_server(ServerConfig::default()).await;
    let cid = server.create_collection("docs").await;
    let (_, body) = server
        .post_form(
            &format!("/api/v1/collections/{}/upload-batch", cid),
            batch_form(&[
                ("vacation.txt", "Employees receive twenty days of paid leave."),
                ("laptops.txt", "Laptops are replaced every three years."),
            ]),
        )
        .await;
    server.wait(body["job_id"].as_str().unwrap()).await;

    let resp = server
        .client
        .post(server.url(&format!("/api/v1/collections/{}/search", cid)))
        .json(&json!({
            "query": "Employees receive twenty days of paid leave.",
            "limit": 5,
            "score_threshold": 0.0
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let results: Value = resp.json().await.unwrap();
    let hits = results["results"].as_array().unwrap();
    assert_eq!(hits.len(), 2);
    assert!(hits[0]["text"].as_str().unwrap().contains("paid leave"));

    let resp = server
        .client
        .post(server.url(&format!("/api/v1/collections/{}/search", cid)))
        .json(&json!({ "query": "  " }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_rebuild_statistics() {
    let server = spawn_server(ServerConfig::default()).await;
    let cid = server.create_collection("docs").await;
    let (_, body) = server
        .post_form(
            &format!("/api/v1/collections/{}/upload-batch", cid),
            batch_form(&[("notes/a.txt", "alpha"), ("notes/b.txt", "beta")]),
        )
        .await;
    server.wait(body["job_id"].as_str().unwrap()).await;

    let resp = server
        .client
        .post(server.url(&format!(
            "/api/v1/collections/{}/folders/rebuild-statistics",
            cid
        )))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["updated_folders"], 1);
    assert_eq!(body["collection"]["total_documents"], 2);
}
