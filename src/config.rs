use serde::Deserialize;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::errors::ConfigError;

pub const ORDER_NUMBER_PLACEHOLDER: &str = "{orderNumber}";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub print_service: PrintServiceConfig,
    pub label: LabelConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PrintServiceConfig {
    pub api_key: Option<String>,
    pub base_url: String,
    pub source: String,
    pub timeout_secs: u64,
    pub use_mock: bool,
}

impl PrintServiceConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LabelConfig {
    pub font_path: PathBuf,
    pub design_url_template: String,
}

impl LabelConfig {
    /// URL encoded into the design QR. Only the order number is substituted.
    pub fn design_url(&self, order_number: &str) -> String {
        self.design_url_template
            .replace(ORDER_NUMBER_PLACEHOLDER, order_number)
    }
}

impl Default for LabelConfig {
    fn default() -> Self {
        LabelConfig {
            font_path: PathBuf::from("/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf"),
            design_url_template: "https://designs.printsystem.app/orders/{orderNumber}".to_string(),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let server = ServerConfig {
            host: std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: std::env::var("PORT")
                .unwrap_or_else(|_| "5000".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidPort)?,
        };

        let print_service = PrintServiceConfig {
            api_key: std::env::var("PRINTNODE_API_KEY")
                .ok()
                .filter(|key| !key.trim().is_empty()),
            base_url: std::env::var("PRINTNODE_BASE_URL")
                .unwrap_or_else(|_| "https://api.printnode.com".to_string()),
            source: std::env::var("PRINT_JOB_SOURCE")
                .unwrap_or_else(|_| "Print System".to_string()),
            timeout_secs: std::env::var("PRINT_TIMEOUT_SECS")
                .unwrap_or_else(|_| "30".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidTimeout)?,
            use_mock: std::env::var("USE_MOCK_PRINT_SERVICE")
                .unwrap_or_else(|_| "false".to_string())
                .parse()
                .unwrap_or(false),
        };

        let defaults = LabelConfig::default();
        let label = LabelConfig {
            font_path: std::env::var("LABEL_FONT_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.font_path),
            design_url_template: std::env::var("DESIGN_URL_TEMPLATE")
                .unwrap_or(defaults.design_url_template),
        };

        let config = Config {
            server,
            print_service,
            label,
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.server.port == 0 {
            return Err(ConfigError::InvalidPort);
        }

        if self.print_service.timeout_secs == 0 {
            return Err(ConfigError::InvalidTimeout);
        }

        if !self
            .label
            .design_url_template
            .contains(ORDER_NUMBER_PLACEHOLDER)
        {
            return Err(ConfigError::InvalidDesignUrlTemplate {
                template: self.label.design_url_template.clone(),
            });
        }

        Ok(())
    }

    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        format!("{}:{}", self.server.host, self.server.port)
            .parse()
            .map_err(|_| ConfigError::InvalidPort)
    }
}
