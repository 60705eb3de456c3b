use actix_web::http::header::{ContentDisposition, DispositionParam, DispositionType};
use actix_web::{get, post, web, HttpResponse};
use serde::Deserialize;
use tracing::{info, warn};

use crate::errors::{AppError, ValidationError};
use crate::label::documents_html;
use crate::printnode::opt_string_or_number;
use crate::work_order::{OneOrMany, WorkOrder};
use crate::AppState;

const PREVIEW_FILENAME: &str = "work-order-preview.pdf";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrintRequest {
    pub work_order_data: OneOrMany,
    #[serde(default, deserialize_with = "opt_string_or_number")]
    pub printer_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchRequest {
    #[serde(deserialize_with = "crate::work_order::deserialize_orders")]
    pub work_orders: Vec<WorkOrder>,
    #[serde(default, deserialize_with = "opt_string_or_number")]
    pub printer_id: Option<String>,
}

fn pdf_response(pdf: bytes::Bytes) -> HttpResponse {
    HttpResponse::Ok()
        .content_type("application/pdf")
        .insert_header(ContentDisposition {
            disposition: DispositionType::Inline,
            parameters: vec![DispositionParam::Filename(PREVIEW_FILENAME.to_string())],
        })
        .body(pdf)
}

#[post("/preview")]
pub async fn preview(
    state: web::Data<AppState>,
    body: web::Json<OneOrMany>,
) -> Result<HttpResponse, AppError> {
    let orders = body.into_inner().into_vec();
    info!("Preview requested for {} order(s)", orders.len());

    let pdf = state.pipeline.render_orders(&orders).await?;
    Ok(pdf_response(pdf))
}

#[post("/preview/html")]
pub async fn preview_html(
    state: web::Data<AppState>,
    body: web::Json<OneOrMany>,
) -> Result<HttpResponse, AppError> {
    let orders = body.into_inner().into_vec();
    let docs = state.pipeline.compose_all(&orders).await?;
    let html = documents_html(&docs);

    Ok(HttpResponse::Ok()
        .content_type("text/html; charset=utf-8")
        .body(html))
}

#[post("/print")]
pub async fn print(
    state: web::Data<AppState>,
    body: web::Json<PrintRequest>,
) -> Result<HttpResponse, AppError> {
    let request = body.into_inner();
    let printer_id = match request.printer_id.filter(|id| !id.trim().is_empty()) {
        Some(id) => id,
        None => {
            warn!("Print request missing printer id");
            return Err(ValidationError::MissingPrinterId.into());
        }
    };

    let title = request.work_order_data.job_title();
    let orders = request.work_order_data.into_vec();
    info!("Print '{}' requested on printer {}", title, printer_id);

    let pdf = state.pipeline.render_orders(&orders).await?;
    let job = state.dispatcher.submit(&pdf, &printer_id, &title).await?;

    Ok(HttpResponse::Ok().json(serde_json::json!({
        "message": "Print job submitted successfully",
        "printJobId": job.id,
        "status": job.state,
    })))
}

#[get("/printers")]
pub async fn printers(state: web::Data<AppState>) -> Result<HttpResponse, AppError> {
    let available = state.dispatcher.list_printers().await?;
    Ok(HttpResponse::Ok().json(serde_json::json!({
        "message": "Printers retrieved successfully",
        "data": available,
    })))
}

#[get("/status/{job_id}")]
pub async fn job_status(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, AppError> {
    let status = state.dispatcher.status(&path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(serde_json::json!({
        "message": "Print job status retrieved",
        "data": status,
    })))
}

/// Partial failures still answer 200; failed orders are listed separately.
#[post("/batch")]
pub async fn print_batch(
    state: web::Data<AppState>,
    body: web::Json<BatchRequest>,
) -> Result<HttpResponse, AppError> {
    let request = body.into_inner();
    let printer_id = request.printer_id.unwrap_or_default();

    let report = state
        .batch
        .print_batch(&request.work_orders, &printer_id)
        .await?;

    let data: Vec<_> = report
        .successes()
        .map(|(order_number, job)| {
            serde_json::json!({
                "orderNumber": order_number,
                "printJobId": job.id,
                "status": job.state,
            })
        })
        .collect();
    let failures: Vec<_> = report
        .failures()
        .map(|(order_number, error)| {
            serde_json::json!({
                "orderNumber": order_number,
                "error": error.to_string(),
            })
        })
        .collect();

    let message = if report.failed() {
        "Batch print jobs submitted with failures"
    } else {
        "Batch print jobs submitted successfully"
    };

    Ok(HttpResponse::Ok().json(serde_json::json!({
        "message": message,
        "batchId": report.id,
        "data": data,
        "failures": failures,
    })))
}
