// Library module organization

pub mod batch;
pub mod config;
pub mod dispatch;
pub mod errors;
pub mod label;
pub mod pipeline;
pub mod printnode;
pub mod render;
pub mod routes;
pub mod symbols;
pub mod work_order;

use std::sync::Arc;
use std::time::Instant;
use tracing::info;

use batch::BatchOrchestrator;
use config::{Config, LabelConfig};
use dispatch::PrintDispatcher;
use errors::AppError;
use pipeline::LabelPipeline;
use printnode::PrintService;
use render::{DocumentRenderer, PdfEngineLauncher};
use symbols::SymbolEncoder;

// Re-export commonly used types for convenience
pub use label::ComposedDocument;
pub use work_order::{CustomInfo, WorkOrder};

// ============================================================================
// Application State
// ============================================================================

/// Shared services handed to every request handler.
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<LabelPipeline>,
    pub dispatcher: Arc<PrintDispatcher>,
    pub batch: Arc<BatchOrchestrator>,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(config: &Config) -> Result<Self, AppError> {
        info!("Initializing application state");

        let service = printnode::new_print_service(&config.print_service)?;
        info!("Print service: {}", service.type_name());

        Ok(Self::with_service(
            service,
            &config.print_service.source,
            config.label.clone(),
            SymbolEncoder::with_font_path(&config.label.font_path),
        ))
    }

    /// Assemble the state around an already constructed print service.
    pub fn with_service(
        service: Arc<dyn PrintService>,
        source: &str,
        label: LabelConfig,
        encoder: SymbolEncoder,
    ) -> Self {
        let renderer = Arc::new(DocumentRenderer::new(Arc::new(PdfEngineLauncher)));
        let pipeline = Arc::new(LabelPipeline::new(encoder, label, renderer));
        let dispatcher = Arc::new(PrintDispatcher::new(service, source));
        let batch = Arc::new(BatchOrchestrator::new(pipeline.clone(), dispatcher.clone()));

        AppState {
            pipeline,
            dispatcher,
            batch,
            started_at: Instant::now(),
        }
    }

    pub fn renderer(&self) -> &Arc<DocumentRenderer> {
        self.pipeline.renderer()
    }
}
