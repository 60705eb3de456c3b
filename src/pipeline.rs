use bytes::Bytes;
use std::sync::Arc;
use tracing::debug;

use crate::config::LabelConfig;
use crate::errors::{AppError, RenderError, ValidationError};
use crate::label::{ComposedDocument, LabelSymbols};
use crate::render::DocumentRenderer;
use crate::symbols::SymbolEncoder;
use crate::work_order::WorkOrder;

/// Work orders in, label PDFs out. Symbol encoding and page rendering both
/// run on the blocking pool.
pub struct LabelPipeline {
    encoder: Arc<SymbolEncoder>,
    config: Arc<LabelConfig>,
    renderer: Arc<DocumentRenderer>,
}

impl LabelPipeline {
    pub fn new(encoder: SymbolEncoder, config: LabelConfig, renderer: Arc<DocumentRenderer>) -> Self {
        LabelPipeline {
            encoder: Arc::new(encoder),
            config: Arc::new(config),
            renderer,
        }
    }

    pub fn renderer(&self) -> &Arc<DocumentRenderer> {
        &self.renderer
    }

    /// Encode and compose on the calling thread.
    pub fn compose(&self, order: &WorkOrder) -> ComposedDocument {
        compose_label(&self.encoder, &self.config, order)
    }

    pub async fn compose_all(&self, orders: &[WorkOrder]) -> Result<Vec<ComposedDocument>, AppError> {
        if orders.is_empty() {
            return Err(ValidationError::NoWorkOrders.into());
        }
        let encoder = self.encoder.clone();
        let config = self.config.clone();
        let orders = orders.to_vec();

        tokio::task::spawn_blocking(move || {
            orders
                .iter()
                .map(|order| compose_label(&encoder, &config, order))
                .collect::<Vec<_>>()
        })
        .await
        .map_err(|e| RenderError::Capture(format!("compose task failed: {}", e)).into())
    }

    pub async fn render_order(&self, order: &WorkOrder) -> Result<Bytes, AppError> {
        self.render_orders(std::slice::from_ref(order)).await
    }

    /// One PDF for all orders, each starting on its own page.
    pub async fn render_orders(&self, orders: &[WorkOrder]) -> Result<Bytes, AppError> {
        let docs = self.compose_all(orders).await?;
        Ok(self.renderer.render_all(&docs).await?)
    }
}

fn compose_label(encoder: &SymbolEncoder, config: &LabelConfig, order: &WorkOrder) -> ComposedDocument {
    let symbols = LabelSymbols::encode(encoder, order, config);
    debug!(
        "Composing label for order {} (qr: {}, barcode: {}, design: {})",
        order.order_number,
        symbols.qr.is_some(),
        symbols.barcode.is_some(),
        symbols.design_qr.is_some()
    );
    symbols.compose(order)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::label::Block;
    use crate::render::PdfEngineLauncher;

    pub(crate) fn pipeline() -> LabelPipeline {
        let renderer = Arc::new(DocumentRenderer::new(Arc::new(PdfEngineLauncher)));
        LabelPipeline::new(SymbolEncoder::new(), LabelConfig::default(), renderer)
    }

    #[tokio::test]
    async fn test_end_to_end_label() {
        let pipeline = pipeline();
        let order: WorkOrder = serde_json::from_value(serde_json::json!({
            "orderNumber": "12543",
            "shipTo": "A\nB",
            "productSku": "X",
            "sku": "Y"
        }))
        .unwrap();

        let doc = pipeline.compose(&order);
        let ship_to = doc
            .blocks
            .iter()
            .find_map(|b| match b {
                Block::ShipTo { lines, .. } => Some(lines.clone()),
                _ => None,
            })
            .unwrap();
        assert_eq!(ship_to, vec!["A".to_string(), "B".to_string()]);

        let order_id = doc
            .blocks
            .iter()
            .find_map(|b| match b {
                Block::OrderId { value, .. } => Some(value.clone()),
                _ => None,
            })
            .unwrap();
        assert_eq!(order_id, "12543");

        let details = doc
            .blocks
            .iter()
            .find_map(|b| match b {
                Block::ProductRow { details, .. } => Some(details.clone()),
                _ => None,
            })
            .unwrap();
        let values: Vec<_> = details.iter().map(|f| f.value.as_str()).collect();
        assert!(values.contains(&"X"));
        assert!(values.contains(&"Y"));

        let pdf = pipeline.render_order(&order).await.unwrap();
        assert!(!pdf.is_empty());
        assert!(pdf.starts_with(b"%PDF"));
    }

    #[tokio::test]
    async fn test_render_orders_requires_input() {
        let pipeline = pipeline();
        let result = pipeline.render_orders(&[]).await;
        assert!(matches!(
            result,
            Err(AppError::Validation(ValidationError::NoWorkOrders))
        ));
        // Nothing to render, so the engine was never started
        assert!(!pipeline.renderer().is_open().await);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_rendering_leaves_executor_responsive() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let pipeline = pipeline();
        let ticks = Arc::new(AtomicUsize::new(0));
        let counter = ticks.clone();
        let ticker = tokio::spawn(async move {
            loop {
                counter.fetch_add(1, Ordering::SeqCst);
                tokio::task::yield_now().await;
            }
        });

        let orders: Vec<WorkOrder> = (0..40)
            .map(|i| WorkOrder {
                ship_to: Some("Street\nCity\nCountry".to_string()),
                design_id: Some("D-1".to_string()),
                custom_info: Some(crate::work_order::CustomInfo::PlainText(
                    (0..30).map(|n| format!("note {}", n)).collect::<Vec<_>>().join("\n"),
                )),
                ..WorkOrder::new(format!("ORDER-{:04}-{}", i, "X".repeat(40)))
            })
            .collect();
        let pdf = pipeline.render_orders(&orders).await.unwrap();
        ticker.abort();

        assert!(pdf.starts_with(b"%PDF"));
        assert!(ticks.load(Ordering::SeqCst) > 0);
    }

    #[tokio::test]
    async fn test_compose_all_matches_compose() {
        let pipeline = pipeline();
        let orders = vec![WorkOrder::new("1"), WorkOrder::new("2")];
        let docs = pipeline.compose_all(&orders).await.unwrap();
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0], pipeline.compose(&orders[0]));
        assert_eq!(docs[1].title, "Work Order - 2");
    }

    #[tokio::test]
    async fn test_compose_leaves_order_untouched() {
        let pipeline = pipeline();
        let order = WorkOrder::new("ORD-1");
        let before = order.clone();
        let first = pipeline.compose(&order);
        let second = pipeline.compose(&order);
        assert_eq!(order, before);
        assert_eq!(first, second);
    }
}
