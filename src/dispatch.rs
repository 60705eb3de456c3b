use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::{error, info};

use crate::errors::{AppError, ValidationError};
use crate::printnode::{NewPrintJob, PrintJobStatus, PrintService, Printer, PDF_BASE64};

/// A job accepted by the print service.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PrintJob {
    pub id: String,
    pub state: Option<String>,
    pub printer_id: String,
    pub title: String,
}

pub struct PrintDispatcher {
    service: Arc<dyn PrintService>,
    source: String,
}

impl PrintDispatcher {
    pub fn new(service: Arc<dyn PrintService>, source: impl Into<String>) -> Self {
        PrintDispatcher {
            service,
            source: source.into(),
        }
    }

    pub fn service_name(&self) -> &'static str {
        self.service.type_name()
    }

    /// Send a rendered document to a printer. An empty printer id never reaches the network.
    pub async fn submit(
        &self,
        document: &[u8],
        printer_id: &str,
        title: &str,
    ) -> Result<PrintJob, AppError> {
        let printer_id = printer_id.trim();
        if printer_id.is_empty() {
            return Err(ValidationError::MissingPrinterId.into());
        }

        let job = NewPrintJob {
            printer: printer_value(printer_id),
            content: STANDARD.encode(document),
            content_type: PDF_BASE64.to_string(),
            title: title.to_string(),
            source: self.source.clone(),
        };

        match self.service.create_job(&job).await {
            Ok(created) => {
                info!(
                    "Print job {} created on printer {}: '{}'",
                    created.id, printer_id, title
                );
                Ok(PrintJob {
                    id: created.id,
                    state: created.state,
                    printer_id: printer_id.to_string(),
                    title: title.to_string(),
                })
            }
            Err(e) => {
                error!("Print job '{}' failed on printer {}: {}", title, printer_id, e);
                Err(e.into())
            }
        }
    }

    pub async fn list_printers(&self) -> Result<Vec<Printer>, AppError> {
        self.service.printers().await.map_err(|e| {
            error!("Failed to list printers: {}", e);
            e.into()
        })
    }

    pub async fn status(&self, job_id: &str) -> Result<PrintJobStatus, AppError> {
        let job_id = job_id.trim();
        if job_id.is_empty() || job_id.contains('/') {
            return Err(ValidationError::InvalidJobId(job_id.to_string()).into());
        }

        self.service.job_status(job_id).await.map_err(|e| {
            error!("Failed to fetch status for job {}: {}", job_id, e);
            e.into()
        })
    }
}

/// Numeric printer ids go out as JSON numbers, anything else as a string.
fn printer_value(printer_id: &str) -> Value {
    match printer_id.parse::<u64>() {
        Ok(n) => Value::from(n),
        Err(_) => Value::from(printer_id),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::UpstreamError;
    use crate::printnode::CreatedJob;
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingService {
        jobs: Mutex<Vec<NewPrintJob>>,
        fail_with: Option<u16>,
    }

    #[async_trait]
    impl PrintService for RecordingService {
        async fn printers(&self) -> Result<Vec<Printer>, UpstreamError> {
            Ok(Vec::new())
        }

        async fn create_job(&self, job: &NewPrintJob) -> Result<CreatedJob, UpstreamError> {
            self.jobs.lock().unwrap().push(job.clone());
            if let Some(status) = self.fail_with {
                return Err(UpstreamError::Status {
                    status,
                    body: "printer offline".to_string(),
                });
            }
            Ok(CreatedJob {
                id: "77".to_string(),
                state: Some("new".to_string()),
            })
        }

        async fn job_status(&self, job_id: &str) -> Result<PrintJobStatus, UpstreamError> {
            Ok(PrintJobStatus(serde_json::json!({"id": job_id, "state": "done"})))
        }

        fn type_name(&self) -> &'static str {
            "Recording"
        }
    }

    #[tokio::test]
    async fn test_empty_printer_id_makes_no_call() {
        let service = Arc::new(RecordingService::default());
        let dispatcher = PrintDispatcher::new(service.clone(), "Print System");

        for printer_id in ["", "   "] {
            let result = dispatcher.submit(b"%PDF", printer_id, "Work Order - 1").await;
            assert!(matches!(
                result,
                Err(AppError::Validation(ValidationError::MissingPrinterId))
            ));
        }
        assert!(service.jobs.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_submit_encodes_document() {
        let service = Arc::new(RecordingService::default());
        let dispatcher = PrintDispatcher::new(service.clone(), "Print System");

        let job = dispatcher
            .submit(b"%PDF-1.5 body", "71", "Work Order - 12543")
            .await
            .unwrap();
        assert_eq!(job.id, "77");
        assert_eq!(job.state.as_deref(), Some("new"));
        assert_eq!(job.printer_id, "71");

        let sent = service.jobs.lock().unwrap();
        assert_eq!(sent[0].printer, serde_json::json!(71));
        assert_eq!(sent[0].content_type, "pdf_base64");
        assert_eq!(sent[0].source, "Print System");
        assert_eq!(STANDARD.decode(&sent[0].content).unwrap(), b"%PDF-1.5 body");
    }

    #[tokio::test]
    async fn test_non_numeric_printer_id_stays_string() {
        let service = Arc::new(RecordingService::default());
        let dispatcher = PrintDispatcher::new(service.clone(), "Print System");
        dispatcher.submit(b"%PDF", "zebra-1", "t").await.unwrap();
        assert_eq!(
            service.jobs.lock().unwrap()[0].printer,
            serde_json::json!("zebra-1")
        );
    }

    #[tokio::test]
    async fn test_upstream_failure_propagates() {
        let service = Arc::new(RecordingService {
            fail_with: Some(500),
            ..Default::default()
        });
        let dispatcher = PrintDispatcher::new(service, "Print System");

        let err = dispatcher.submit(b"%PDF", "71", "t").await.unwrap_err();
        assert_eq!(err.status_code(), 502);
        assert!(err.to_string().contains("printer offline"));
    }

    #[tokio::test]
    async fn test_status_rejects_bad_job_ids() {
        let dispatcher =
            PrintDispatcher::new(Arc::new(RecordingService::default()), "Print System");

        assert!(matches!(
            dispatcher.status("").await,
            Err(AppError::Validation(ValidationError::InvalidJobId(_)))
        ));
        assert!(matches!(
            dispatcher.status("1/../printers").await,
            Err(AppError::Validation(ValidationError::InvalidJobId(_)))
        ));

        let status = dispatcher.status("77").await.unwrap();
        assert_eq!(status.state(), Some("done"));
    }
}
