use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Initialization error: {0}")]
    Initialization(String),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Render error: {0}")]
    Render(#[from] RenderError),

    #[error("Print service error: {0}")]
    Upstream(#[from] UpstreamError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Symbol generation failures. Never fatal: the label shows a placeholder instead.
#[derive(Debug, Error)]
pub enum SymbolError {
    #[error("QR encoding failed for '{text}': {reason}")]
    Qr { text: String, reason: String },

    #[error("Barcode encoding failed for '{text}': {reason}")]
    Barcode { text: String, reason: String },

    #[error("Failed to encode raster: {0}")]
    Raster(String),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Printer ID is required")]
    MissingPrinterId,

    #[error("At least one work order is required")]
    NoWorkOrders,

    #[error("Invalid job id: {0}")]
    InvalidJobId(String),
}

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("Rendering engine is closed")]
    EngineClosed,

    #[error("No content loaded on surface")]
    NoContent,

    #[error("Failed to resolve embedded image '{name}': {reason}")]
    ImageResolve { name: String, reason: String },

    #[error("Page capture failed: {0}")]
    Capture(String),

    #[error("PDF error: {0}")]
    Pdf(#[from] lopdf::Error),
}

#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Print service returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Unexpected print service response: {0}")]
    Decode(String),

    #[error("Unknown print job: {0}")]
    UnknownJob(String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid port number")]
    InvalidPort,

    #[error("Invalid print service timeout")]
    InvalidTimeout,

    #[error("Design URL template must contain {{orderNumber}}: {template}")]
    InvalidDesignUrlTemplate { template: String },
}

impl AppError {
    pub fn status_code(&self) -> u16 {
        match self {
            AppError::Initialization(_) => 500, // Internal Server Error
            AppError::Validation(_) => 400,     // Bad Request
            AppError::Render(_) => 500,         // Internal Server Error
            AppError::Upstream(_) => 502,       // Bad Gateway
            AppError::Config(_) => 500,         // Internal Server Error
        }
    }

    pub fn error_body(&self) -> serde_json::Value {
        serde_json::json!({
            "ok": false,
            "error": self.to_string(),
            "error_type": self.error_type()
        })
    }

    fn error_type(&self) -> &'static str {
        match self {
            AppError::Initialization(_) => "initialization_error",
            AppError::Validation(_) => "validation_error",
            AppError::Render(_) => "render_error",
            AppError::Upstream(_) => "upstream_error",
            AppError::Config(_) => "config_error",
        }
    }
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        StatusCode::from_u16(AppError::status_code(self))
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(ResponseError::status_code(self)).json(self.error_body())
    }
}
