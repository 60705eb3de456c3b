use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::{Client, Response};
use indexmap::IndexMap;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

use crate::config::PrintServiceConfig;
use crate::errors::{AppError, UpstreamError};

pub const PDF_BASE64: &str = "pdf_base64";

/// A printer as reported by the print service. Unknown fields pass through,
/// and the id keeps its JSON type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Printer {
    pub id: Value,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

/// Body of `POST /printjobs`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewPrintJob {
    pub printer: Value,
    pub content: String,
    pub content_type: String,
    pub title: String,
    pub source: String,
}

/// The service's answer to a job submission.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CreatedJob {
    pub id: String,
    pub state: Option<String>,
}

impl CreatedJob {
    /// The service may answer with a bare id or with a job object.
    pub fn from_response(value: Value) -> Result<Self, UpstreamError> {
        match value {
            Value::Number(n) => Ok(CreatedJob {
                id: n.to_string(),
                state: None,
            }),
            Value::String(s) => Ok(CreatedJob { id: s, state: None }),
            Value::Object(map) => {
                let id = match map.get("id") {
                    Some(Value::Number(n)) => n.to_string(),
                    Some(Value::String(s)) => s.clone(),
                    _ => {
                        return Err(UpstreamError::Decode(format!(
                            "print job response has no id: {}",
                            Value::Object(map)
                        )))
                    }
                };
                let state = map.get("state").and_then(Value::as_str).map(str::to_string);
                Ok(CreatedJob { id, state })
            }
            other => Err(UpstreamError::Decode(format!(
                "unexpected print job response: {}",
                other
            ))),
        }
    }
}

/// Status document for one job, passed through as the service sent it.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct PrintJobStatus(pub Value);

impl PrintJobStatus {
    /// Current state, whether the service wrapped the job in an array or not.
    pub fn state(&self) -> Option<&str> {
        let job = match &self.0 {
            Value::Array(jobs) => jobs.first()?,
            other => other,
        };
        job.get("state").and_then(Value::as_str)
    }
}

#[async_trait]
pub trait PrintService: Send + Sync {
    async fn printers(&self) -> Result<Vec<Printer>, UpstreamError>;
    async fn create_job(&self, job: &NewPrintJob) -> Result<CreatedJob, UpstreamError>;
    async fn job_status(&self, job_id: &str) -> Result<PrintJobStatus, UpstreamError>;
    fn type_name(&self) -> &'static str;
}

// ============================================================================
// PrintNode HTTP client
// ============================================================================

pub struct PrintNodeClient {
    client: Client,
    base_url: String,
}

impl PrintNodeClient {
    pub fn new(api_key: &str, config: &PrintServiceConfig) -> Result<Self, AppError> {
        let mut headers = HeaderMap::new();
        let mut auth = HeaderValue::from_str(&basic_auth(api_key))
            .map_err(|e| AppError::Initialization(format!("Invalid API key: {}", e)))?;
        auth.set_sensitive(true);
        headers.insert(AUTHORIZATION, auth);

        let client = Client::builder()
            .timeout(config.timeout())
            .default_headers(headers)
            .build()
            .map_err(|e| {
                AppError::Initialization(format!("Failed to build HTTP client: {}", e))
            })?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    async fn handle_response(response: Response) -> Result<Value, UpstreamError> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(UpstreamError::Status {
                status: status.as_u16(),
                body,
            });
        }
        response
            .json()
            .await
            .map_err(|e| UpstreamError::Decode(e.to_string()))
    }
}

/// `Basic base64(key:)` - the API key is the username, the password is empty.
pub fn basic_auth(api_key: &str) -> String {
    format!("Basic {}", STANDARD.encode(format!("{}:", api_key)))
}

#[async_trait]
impl PrintService for PrintNodeClient {
    async fn printers(&self) -> Result<Vec<Printer>, UpstreamError> {
        let response = self.client.get(self.url("printers")).send().await?;
        let value = Self::handle_response(response).await?;
        serde_json::from_value(value).map_err(|e| UpstreamError::Decode(e.to_string()))
    }

    async fn create_job(&self, job: &NewPrintJob) -> Result<CreatedJob, UpstreamError> {
        debug!(
            "POST printjobs: printer={} title='{}' content={} chars",
            job.printer,
            job.title,
            job.content.len()
        );
        let response = self
            .client
            .post(self.url("printjobs"))
            .json(job)
            .send()
            .await?;
        CreatedJob::from_response(Self::handle_response(response).await?)
    }

    async fn job_status(&self, job_id: &str) -> Result<PrintJobStatus, UpstreamError> {
        let response = self
            .client
            .get(self.url(&format!("printjobs/{}", job_id)))
            .send()
            .await?;
        Ok(PrintJobStatus(Self::handle_response(response).await?))
    }

    fn type_name(&self) -> &'static str {
        "PrintNode"
    }
}

// ============================================================================
// Mock service
// ============================================================================

const MOCK_JOB_LIMIT: usize = 1024;

/// What the mock remembers about a submitted job. The document is not kept.
#[derive(Debug, Clone)]
struct MockJob {
    title: String,
    printer: Value,
}

/// In-memory print service used when no API key is configured. Only the most
/// recent jobs are kept; older ones report as unknown.
pub struct MockPrintService {
    next_id: AtomicU64,
    limit: usize,
    jobs: Mutex<IndexMap<String, MockJob>>,
}

impl MockPrintService {
    pub fn new() -> Self {
        Self::with_limit(MOCK_JOB_LIMIT)
    }

    pub fn with_limit(limit: usize) -> Self {
        MockPrintService {
            next_id: AtomicU64::new(1),
            limit: limit.max(1),
            jobs: Mutex::new(IndexMap::new()),
        }
    }

    pub fn submitted(&self) -> usize {
        self.jobs.lock().map(|jobs| jobs.len()).unwrap_or(0)
    }
}

impl Default for MockPrintService {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PrintService for MockPrintService {
    async fn printers(&self) -> Result<Vec<Printer>, UpstreamError> {
        Ok(vec![Printer {
            id: Value::from("mock-printer"),
            name: "Mock Label Printer".to_string(),
            state: Some("online".to_string()),
            extra: serde_json::Map::new(),
        }])
    }

    async fn create_job(&self, job: &NewPrintJob) -> Result<CreatedJob, UpstreamError> {
        let id = format!("mock-job-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        if let Ok(mut jobs) = self.jobs.lock() {
            while jobs.len() >= self.limit {
                jobs.shift_remove_index(0);
            }
            jobs.insert(
                id.clone(),
                MockJob {
                    title: job.title.clone(),
                    printer: job.printer.clone(),
                },
            );
        }
        Ok(CreatedJob {
            id,
            state: Some("new".to_string()),
        })
    }

    async fn job_status(&self, job_id: &str) -> Result<PrintJobStatus, UpstreamError> {
        let jobs = self
            .jobs
            .lock()
            .map_err(|_| UpstreamError::Decode("mock job table poisoned".to_string()))?;
        let job = jobs
            .get(job_id)
            .ok_or_else(|| UpstreamError::UnknownJob(job_id.to_string()))?;
        Ok(PrintJobStatus(serde_json::json!({
            "id": job_id,
            "title": job.title,
            "printer": job.printer,
            "state": "done",
        })))
    }

    fn type_name(&self) -> &'static str {
        "Mock Print Service"
    }
}

/// Pick the real service when an API key is configured, the mock otherwise.
pub fn new_print_service(config: &PrintServiceConfig) -> Result<Arc<dyn PrintService>, AppError> {
    if config.use_mock {
        warn!("Mock print service requested; jobs will not reach a printer");
        return Ok(Arc::new(MockPrintService::new()));
    }

    match &config.api_key {
        Some(api_key) => {
            info!("Using PrintNode at {}", config.base_url);
            Ok(Arc::new(PrintNodeClient::new(api_key, config)?))
        }
        None => {
            warn!("PRINTNODE_API_KEY not set, using mock print service");
            Ok(Arc::new(MockPrintService::new()))
        }
    }
}

/// Accept optional ids sent as JSON numbers or strings.
pub fn opt_string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s)),
        Some(Value::Number(n)) => Ok(Some(n.to_string())),
        Some(other) => Err(serde::de::Error::custom(format!(
            "expected string or number id, got {}",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::{web, App, HttpRequest, HttpResponse, HttpServer};
    use std::net::SocketAddr;

    type Seen = Arc<Mutex<Vec<(String, Option<String>, Option<Value>)>>>;

    fn record(seen: &Seen, req: &HttpRequest, body: Option<Value>) {
        let auth = req
            .headers()
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        seen.lock()
            .unwrap()
            .push((req.path().to_string(), auth, body));
    }

    /// Stand-in for the print cloud on an ephemeral port.
    fn spawn_fake_printnode() -> (SocketAddr, Seen) {
        let seen: Seen = Arc::new(Mutex::new(Vec::new()));
        let state = seen.clone();
        let server = HttpServer::new(move || {
            App::new()
                .app_data(web::Data::new(state.clone()))
                .route(
                    "/printers",
                    web::get().to(|req: HttpRequest, seen: web::Data<Seen>| async move {
                        record(&seen, &req, None);
                        HttpResponse::Ok().json(serde_json::json!([
                            {"id": 71, "name": "Zebra GK420d", "state": "online", "computer": {"id": 3}}
                        ]))
                    }),
                )
                .route(
                    "/printjobs",
                    web::post().to(
                        |req: HttpRequest, body: web::Json<Value>, seen: web::Data<Seen>| async move {
                            record(&seen, &req, Some(body.into_inner()));
                            HttpResponse::Created().json(serde_json::json!(4242))
                        },
                    ),
                )
                .route(
                    "/printjobs/{id}",
                    web::get().to(|req: HttpRequest, seen: web::Data<Seen>| async move {
                        record(&seen, &req, None);
                        if req.match_info().get("id") == Some("4242") {
                            HttpResponse::Ok()
                                .json(serde_json::json!([{"id": 4242, "state": "done"}]))
                        } else {
                            HttpResponse::NotFound().body("no such job")
                        }
                    }),
                )
        })
        .workers(1)
        .bind(("127.0.0.1", 0))
        .expect("bind fake printnode");
        let addr = server.addrs()[0];
        actix_web::rt::spawn(server.run());
        (addr, seen)
    }

    fn client_for(addr: SocketAddr) -> PrintNodeClient {
        let config = PrintServiceConfig {
            api_key: Some("secret".to_string()),
            base_url: format!("http://{}/", addr),
            source: "Print System".to_string(),
            timeout_secs: 5,
            use_mock: false,
        };
        PrintNodeClient::new("secret", &config).unwrap()
    }

    #[test]
    fn test_basic_auth_header() {
        // base64("secret:")
        assert_eq!(basic_auth("secret"), "Basic c2VjcmV0Og==");
    }

    #[actix_web::test]
    async fn test_list_printers_passes_through() {
        let (addr, seen) = spawn_fake_printnode();
        let printers = client_for(addr).printers().await.unwrap();

        assert_eq!(printers.len(), 1);
        assert_eq!(printers[0].id, serde_json::json!(71));
        assert_eq!(printers[0].name, "Zebra GK420d");
        assert_eq!(printers[0].state.as_deref(), Some("online"));
        assert!(printers[0].extra.contains_key("computer"));

        let seen = seen.lock().unwrap();
        assert_eq!(seen[0].0, "/printers");
        assert_eq!(seen[0].1.as_deref(), Some("Basic c2VjcmV0Og=="));
    }

    #[actix_web::test]
    async fn test_create_job_posts_expected_body() {
        let (addr, seen) = spawn_fake_printnode();
        let job = NewPrintJob {
            printer: serde_json::json!(71),
            content: STANDARD.encode(b"%PDF-1.5"),
            content_type: PDF_BASE64.to_string(),
            title: "Work Order - 12543".to_string(),
            source: "Print System".to_string(),
        };
        let created = client_for(addr).create_job(&job).await.unwrap();

        assert_eq!(created.id, "4242");
        assert_eq!(created.state, None);

        let seen = seen.lock().unwrap();
        let body = seen[0].2.as_ref().unwrap();
        assert_eq!(body["printer"], 71);
        assert_eq!(body["contentType"], "pdf_base64");
        assert_eq!(body["title"], "Work Order - 12543");
        assert_eq!(body["source"], "Print System");
        assert_eq!(body["content"], STANDARD.encode(b"%PDF-1.5"));
    }

    #[actix_web::test]
    async fn test_job_status_and_upstream_errors() {
        let (addr, _) = spawn_fake_printnode();
        let client = client_for(addr);

        let status = client.job_status("4242").await.unwrap();
        assert_eq!(status.state(), Some("done"));

        match client.job_status("1").await {
            Err(UpstreamError::Status { status, body }) => {
                assert_eq!(status, 404);
                assert_eq!(body, "no such job");
            }
            other => panic!("expected upstream status error, got {:?}", other),
        }
    }

    #[actix_web::test]
    async fn test_transport_failure_is_upstream_error() {
        let config = PrintServiceConfig {
            api_key: Some("secret".to_string()),
            base_url: "http://127.0.0.1:1".to_string(),
            source: "Print System".to_string(),
            timeout_secs: 2,
            use_mock: false,
        };
        let client = PrintNodeClient::new("secret", &config).unwrap();
        assert!(matches!(
            client.printers().await,
            Err(UpstreamError::Transport(_))
        ));
    }

    #[test]
    fn test_created_job_shapes() {
        let job = CreatedJob::from_response(serde_json::json!({"id": 9, "state": "queued"})).unwrap();
        assert_eq!(job.id, "9");
        assert_eq!(job.state.as_deref(), Some("queued"));

        let job = CreatedJob::from_response(serde_json::json!("abc")).unwrap();
        assert_eq!(job.id, "abc");

        assert!(CreatedJob::from_response(serde_json::json!({"state": "x"})).is_err());
        assert!(CreatedJob::from_response(serde_json::json!(null)).is_err());
    }

    #[tokio::test]
    async fn test_mock_service_tracks_jobs() {
        let mock = MockPrintService::new();
        let job = NewPrintJob {
            printer: serde_json::json!("mock-printer"),
            content: String::new(),
            content_type: PDF_BASE64.to_string(),
            title: "Work Order - 1".to_string(),
            source: "Print System".to_string(),
        };
        let created = mock.create_job(&job).await.unwrap();
        assert_eq!(created.id, "mock-job-1");
        assert_eq!(mock.submitted(), 1);

        let status = mock.job_status(&created.id).await.unwrap();
        assert_eq!(status.state(), Some("done"));
        assert!(matches!(
            mock.job_status("nope").await,
            Err(UpstreamError::UnknownJob(_))
        ));
    }

    fn mock_job(title: &str) -> NewPrintJob {
        NewPrintJob {
            printer: serde_json::json!(71),
            content: STANDARD.encode(b"%PDF-1.5 large document"),
            content_type: PDF_BASE64.to_string(),
            title: title.to_string(),
            source: "Print System".to_string(),
        }
    }

    #[tokio::test]
    async fn test_mock_service_keeps_no_document_content() {
        let mock = MockPrintService::new();
        let created = mock.create_job(&mock_job("Work Order - 7")).await.unwrap();

        {
            let jobs = mock.jobs.lock().unwrap();
            let stored = &jobs[&created.id];
            assert_eq!(stored.title, "Work Order - 7");
            assert_eq!(stored.printer, serde_json::json!(71));
        }

        let status = mock.job_status(&created.id).await.unwrap();
        assert!(status.0.get("content").is_none());
        assert_eq!(status.0["title"], "Work Order - 7");
        assert_eq!(status.0["printer"], 71);
    }

    #[tokio::test]
    async fn test_mock_service_evicts_oldest_jobs() {
        let mock = MockPrintService::with_limit(2);
        let first = mock.create_job(&mock_job("a")).await.unwrap();
        let second = mock.create_job(&mock_job("b")).await.unwrap();
        let third = mock.create_job(&mock_job("c")).await.unwrap();

        assert_eq!(mock.submitted(), 2);
        assert!(matches!(
            mock.job_status(&first.id).await,
            Err(UpstreamError::UnknownJob(_))
        ));
        assert!(mock.job_status(&second.id).await.is_ok());
        assert!(mock.job_status(&third.id).await.is_ok());
    }

    #[test]
    fn test_printer_id_keeps_json_type() {
        let printers: Vec<Printer> = serde_json::from_value(serde_json::json!([
            {"id": 71, "name": "A"},
            {"id": "abc", "name": "B"}
        ]))
        .unwrap();
        assert_eq!(serde_json::to_value(&printers[0]).unwrap()["id"], 71);
        assert_eq!(serde_json::to_value(&printers[1]).unwrap()["id"], "abc");
    }

    #[test]
    fn test_factory_falls_back_to_mock() {
        let config = PrintServiceConfig {
            api_key: None,
            base_url: "https://api.printnode.com".to_string(),
            source: "Print System".to_string(),
            timeout_secs: 30,
            use_mock: false,
        };
        let service = new_print_service(&config).unwrap();
        assert_eq!(service.type_name(), "Mock Print Service");
    }
}
