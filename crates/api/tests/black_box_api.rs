use std::sync::Arc;
use std::time::Duration;

use projectdesk_api::app::{build_app, services};
use projectdesk_core::UserId;
use projectdesk_infra::{
    artifacts::InMemoryArtifactStore, config::PipelineConfig, jobs::JobExecutorHandle,
    projects::InMemoryProjectDirectory,
};
use projectdesk_offers::{ExpenseLine, Project, ProjectId, ProjectSnapshot};
use reqwest::StatusCode;
use serde_json::json;

struct TestServer {
    base_url: String,
    projects: Arc<InMemoryProjectDirectory>,
    handle: tokio::task::JoinHandle<()>,
    worker: Option<JobExecutorHandle>,
}

impl TestServer {
    async fn spawn() -> Self {
        let config = PipelineConfig::from_lookup(|name| match name {
            "OFFER_DELAY_MS" | "RETRY_BASE_DELAY_MS" | "RETRY_MAX_DELAY_MS" => Some("0".to_string()),
            "JOB_POLL_INTERVAL_MS" => Some("5".to_string()),
            _ => None,
        })
        .expect("test config is valid");

        let projects = Arc::new(InMemoryProjectDirectory::new());
        let stores = services::Stores::in_memory(projects.clone(), Arc::new(InMemoryArtifactStore::new()));
        let (services, executor) = services::build_services(stores, &config);
        let worker = executor.spawn().expect("failed to start worker");

        // Same router as prod, bound to an ephemeral port.
        let app = build_app(services);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind ephemeral port");
        let addr = listener.local_addr().unwrap();
        let base_url = format!("http://{}", addr);

        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url,
            projects,
            handle,
            worker: Some(worker),
        }
    }

    fn seed_project(&self, lines: &[(&str, &str, &str, u32)]) -> ProjectId {
        let id = ProjectId::generate();
        self.projects.upsert(ProjectSnapshot {
            project: Project {
                id,
                owner: UserId::new(),
                name: "Test Project".into(),
            },
            lines: lines
                .iter()
                .map(|(name, category, price, qty)| {
                    ExpenseLine::new(*name, *category, price.parse().unwrap(), *qty).unwrap()
                })
                .collect(),
            company: None,
        });
        id
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
        if let Some(worker) = self.worker.take() {
            worker.shutdown();
        }
    }
}

async fn submit(client: &reqwest::Client, base_url: &str, project: ProjectId) -> serde_json::Value {
    let res = client
        .post(format!("{}/projects/{}/offers", base_url, project))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::ACCEPTED);
    res.json().await.unwrap()
}

/// Poll the offer until it leaves the pending/processing states.
async fn get_offer_eventually(
    client: &reqwest::Client,
    base_url: &str,
    project: ProjectId,
    offer_id: &str,
) -> serde_json::Value {
    for _ in 0..200 {
        let res = client
            .get(format!("{}/projects/{}/offers/{}", base_url, project, offer_id))
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let body: serde_json::Value = res.json().await.unwrap();
        if body["status"] == "complete" || body["status"] == "failed" {
            return body;
        }

        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    panic!("offer did not finish generating within timeout");
}

#[tokio::test]
async fn health_reports_job_stats() {
    let srv = TestServer::spawn().await;

    let res = reqwest::get(format!("{}/health", srv.base_url)).await.unwrap();

    assert_eq!(res.status(), StatusCode::OK);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["backend"], "in_memory");
    assert_eq!(body["jobs"]["pending"], 0);
}

#[tokio::test]
async fn offer_lifecycle_submit_poll_download() {
    let srv = TestServer::spawn().await;
    let project = srv.seed_project(&[
        ("Cement", "Materials", "100.00", 5),
        ("Labor", "Services", "20.00", 10),
    ]);
    let client = reqwest::Client::new();

    let created = submit(&client, &srv.base_url, project).await;
    assert_eq!(created["name"], "Project Offer");
    assert_eq!(created["artifact_path"], "");
    assert_eq!(created["ready"], false);
    let offer_id = created["id"].as_str().unwrap().to_string();

    let offer = get_offer_eventually(&client, &srv.base_url, project, &offer_id).await;
    assert_eq!(offer["status"], "complete");
    assert_eq!(offer["amount"], "700.00");
    assert_eq!(offer["amount_minor"], 70000);
    assert_eq!(offer["ready"], true);
    assert!(!offer["artifact_path"].as_str().unwrap().is_empty());

    let res = client
        .get(format!("{}/projects/{}/offers/{}/download", srv.base_url, project, offer_id))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(res.headers()["content-type"], "application/pdf");
    assert_eq!(
        res.headers()["content-disposition"].to_str().unwrap(),
        format!("attachment; filename=\"offer-{project}-{offer_id}.pdf\"")
    );
    let bytes = res.bytes().await.unwrap();
    assert!(bytes.starts_with(b"%PDF"));
}

#[tokio::test]
async fn unknown_project_fails_and_download_is_not_found() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();
    let project = ProjectId::generate();

    let created = submit(&client, &srv.base_url, project).await;
    let offer_id = created["id"].as_str().unwrap().to_string();

    let offer = get_offer_eventually(&client, &srv.base_url, project, &offer_id).await;
    assert_eq!(offer["status"], "failed");
    assert!(offer["failure_reason"].as_str().unwrap().contains("project not found"));
    assert_eq!(offer["artifact_path"], "");

    let res = client
        .get(format!("{}/projects/{}/offers/{}/download", srv.base_url, project, offer_id))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["error"], "not_generated");
    assert_eq!(body["message"], "File not found or not generated yet");
}

#[tokio::test]
async fn offers_are_scoped_to_their_project() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();
    let project = srv.seed_project(&[("Cement", "Materials", "1.00", 1)]);
    let other = srv.seed_project(&[]);

    let first = submit(&client, &srv.base_url, project).await;
    let second = submit(&client, &srv.base_url, project).await;

    let res = client
        .get(format!("{}/projects/{}/offers", srv.base_url, project))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let list: serde_json::Value = res.json().await.unwrap();
    let offers = list["offers"].as_array().unwrap();
    assert_eq!(offers.len(), 2);
    // Newest first
    assert_eq!(offers[0]["id"], second["id"]);
    assert_eq!(offers[1]["id"], first["id"]);

    let res = client
        .get(format!(
            "{}/projects/{}/offers/{}",
            srv.base_url,
            other,
            first["id"].as_str().unwrap()
        ))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn malformed_requests_are_rejected() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let res = client
        .post(format!("{}/projects/not-a-uuid/offers", srv.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["error"], "invalid_id");

    let project = srv.seed_project(&[]);
    let res = client
        .post(format!("{}/projects/{}/offers", srv.base_url, project))
        .json(&json!({ "name": "   " }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["error"], "validation_error");

    let res = client
        .get(format!("{}/projects/{}/offers/{}", srv.base_url, project, ProjectId::generate()))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn stream_delivers_completion_events() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();
    let project = srv.seed_project(&[("Labor", "Services", "20.00", 10)]);

    let mut stream = client
        .get(format!("{}/offers/stream?project_id={}", srv.base_url, project))
        .send()
        .await
        .unwrap();
    assert_eq!(stream.status(), StatusCode::OK);

    let created = submit(&client, &srv.base_url, project).await;
    let offer_id = created["id"].as_str().unwrap().to_string();

    let received = tokio::time::timeout(Duration::from_secs(5), async {
        let mut buf = String::new();
        while let Some(chunk) = stream.chunk().await.unwrap() {
            buf.push_str(&String::from_utf8_lossy(&chunk));
            if buf.contains("event: offer.completed") && buf.contains(&offer_id) {
                return buf;
            }
        }
        buf
    })
    .await
    .expect("no completion event within timeout");

    assert!(received.contains("\"outcome\":\"completed\""));
    assert!(received.contains("\"amount\":20000"));
}
