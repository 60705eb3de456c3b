use futures::stream::{self, StreamExt};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::dispatch::{PrintDispatcher, PrintJob};
use crate::errors::{AppError, ValidationError};
use crate::label::document_title;
use crate::pipeline::LabelPipeline;
use crate::work_order::WorkOrder;

/// Outcome for one order of a batch.
#[derive(Debug)]
pub struct BatchResult {
    pub order_number: String,
    pub outcome: Result<PrintJob, AppError>,
}

/// Per-order outcomes, in input order.
#[derive(Debug, Default)]
pub struct BatchReport {
    pub id: Uuid,
    pub results: Vec<BatchResult>,
}

impl BatchReport {
    pub fn successes(&self) -> impl Iterator<Item = (&str, &PrintJob)> {
        self.results.iter().filter_map(|r| match &r.outcome {
            Ok(job) => Some((r.order_number.as_str(), job)),
            Err(_) => None,
        })
    }

    pub fn failures(&self) -> impl Iterator<Item = (&str, &AppError)> {
        self.results.iter().filter_map(|r| match &r.outcome {
            Ok(_) => None,
            Err(e) => Some((r.order_number.as_str(), e)),
        })
    }

    /// True when at least one order did not print.
    pub fn failed(&self) -> bool {
        self.results.iter().any(|r| r.outcome.is_err())
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }
}

pub struct BatchOrchestrator {
    pipeline: Arc<LabelPipeline>,
    dispatcher: Arc<PrintDispatcher>,
    concurrency: usize,
}

impl BatchOrchestrator {
    pub fn new(pipeline: Arc<LabelPipeline>, dispatcher: Arc<PrintDispatcher>) -> Self {
        BatchOrchestrator {
            pipeline,
            dispatcher,
            concurrency: 1,
        }
    }

    /// Process up to `n` orders at once. Results keep input order.
    pub fn with_concurrency(mut self, n: usize) -> Self {
        self.concurrency = n.max(1);
        self
    }

    /// Render and submit every order on its own. A failed order is recorded
    /// in its slot and the rest still run.
    pub async fn print_batch(
        &self,
        orders: &[WorkOrder],
        printer_id: &str,
    ) -> Result<BatchReport, ValidationError> {
        if printer_id.trim().is_empty() {
            return Err(ValidationError::MissingPrinterId);
        }
        if orders.is_empty() {
            return Err(ValidationError::NoWorkOrders);
        }

        let id = Uuid::new_v4();
        info!(
            "Batch {}: printing {} order(s) on printer {}",
            id,
            orders.len(),
            printer_id
        );

        let results: Vec<BatchResult> = stream::iter(orders)
            .map(|order| self.print_one(order, printer_id))
            .buffered(self.concurrency)
            .collect()
            .await;

        let report = BatchReport { id, results };
        if report.failed() {
            warn!(
                "Batch {} on printer {} finished with {} failure(s) out of {}",
                id,
                printer_id,
                report.failures().count(),
                report.len()
            );
        }
        Ok(report)
    }

    async fn print_one(&self, order: &WorkOrder, printer_id: &str) -> BatchResult {
        let outcome = async {
            let pdf = self.pipeline.render_order(order).await?;
            self.dispatcher
                .submit(&pdf, printer_id, &document_title(&order.order_number))
                .await
        }
        .await;

        if let Err(e) = &outcome {
            warn!(
                "Order {} failed on printer {}: {}",
                order.order_number, printer_id, e
            );
        }

        BatchResult {
            order_number: order.order_number.clone(),
            outcome,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LabelConfig;
    use crate::errors::UpstreamError;
    use crate::printnode::{CreatedJob, NewPrintJob, PrintJobStatus, PrintService, Printer};
    use crate::render::{DocumentRenderer, PdfEngineLauncher};
    use crate::symbols::SymbolEncoder;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Fails any job whose title names the given order.
    struct FlakyService {
        failing_title: String,
        titles: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl PrintService for FlakyService {
        async fn printers(&self) -> Result<Vec<Printer>, UpstreamError> {
            Ok(Vec::new())
        }

        async fn create_job(&self, job: &NewPrintJob) -> Result<CreatedJob, UpstreamError> {
            let mut titles = self.titles.lock().unwrap();
            titles.push(job.title.clone());
            if job.title == self.failing_title {
                return Err(UpstreamError::Status {
                    status: 500,
                    body: "internal error".to_string(),
                });
            }
            Ok(CreatedJob {
                id: format!("job-{}", titles.len()),
                state: Some("new".to_string()),
            })
        }

        async fn job_status(&self, job_id: &str) -> Result<PrintJobStatus, UpstreamError> {
            Err(UpstreamError::UnknownJob(job_id.to_string()))
        }

        fn type_name(&self) -> &'static str {
            "Flaky"
        }
    }

    fn orchestrator(failing_order: &str) -> (BatchOrchestrator, Arc<FlakyService>) {
        let service = Arc::new(FlakyService {
            failing_title: document_title(failing_order),
            titles: Mutex::new(Vec::new()),
        });
        let renderer = Arc::new(DocumentRenderer::new(Arc::new(PdfEngineLauncher)));
        let pipeline = Arc::new(LabelPipeline::new(
            SymbolEncoder::new(),
            LabelConfig::default(),
            renderer,
        ));
        let dispatcher = Arc::new(PrintDispatcher::new(service.clone(), "Print System"));
        (BatchOrchestrator::new(pipeline, dispatcher), service)
    }

    fn orders() -> Vec<WorkOrder> {
        vec![
            WorkOrder::new("1001"),
            WorkOrder::new("1002"),
            WorkOrder::new("1003"),
        ]
    }

    #[tokio::test]
    async fn test_failed_item_does_not_stop_batch() {
        let (batch, service) = orchestrator("1002");
        let report = batch.print_batch(&orders(), "71").await.unwrap();

        assert_eq!(report.len(), 3);
        assert!(report.results[0].outcome.is_ok());
        assert!(report.results[2].outcome.is_ok());
        match &report.results[1].outcome {
            Err(AppError::Upstream(UpstreamError::Status { status, .. })) => {
                assert_eq!(*status, 500)
            }
            other => panic!("expected upstream failure, got {:?}", other),
        }

        let numbers: Vec<_> = report.results.iter().map(|r| r.order_number.as_str()).collect();
        assert_eq!(numbers, vec!["1001", "1002", "1003"]);
        assert!(report.failed());
        assert_eq!(report.successes().count(), 2);
        assert_eq!(report.failures().next().map(|(n, _)| n), Some("1002"));
        assert_eq!(service.titles.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_concurrent_batch_keeps_order() {
        let (batch, _) = orchestrator("none");
        let batch = batch.with_concurrency(3);
        let report = batch.print_batch(&orders(), "71").await.unwrap();

        assert!(!report.failed());
        let numbers: Vec<_> = report.successes().map(|(n, _)| n).collect();
        assert_eq!(numbers, vec!["1001", "1002", "1003"]);
    }

    #[tokio::test]
    async fn test_batch_requires_printer_and_orders() {
        let (batch, service) = orchestrator("none");
        assert_eq!(
            batch.print_batch(&orders(), "").await.unwrap_err(),
            ValidationError::MissingPrinterId
        );
        assert_eq!(
            batch.print_batch(&[], "71").await.unwrap_err(),
            ValidationError::NoWorkOrders
        );
        assert!(service.titles.lock().unwrap().is_empty());
    }
}
