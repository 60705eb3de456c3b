//! Document rendering: composed labels in, print-ready PDF bytes out.
//!
//! A [`DocumentRenderer`] owns a handle to a long-lived [`RenderEngine`]. The
//! engine is launched lazily on the first render and shut down with
//! [`DocumentRenderer::close`]. Every render call draws on its own
//! [`Surface`], so concurrent renders never share page state.

pub mod metrics;
pub mod pdf;

use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::errors::RenderError;
use crate::label::ComposedDocument;

pub use pdf::{PdfEngine, PdfEngineLauncher};

const POINTS_PER_INCH: f32 = 72.0;

/// Physical page geometry. Labels always use [`PageSpec::LABEL`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageSpec {
    pub width_in: f32,
    pub height_in: f32,
    pub margin_in: f32,
    pub print_background: bool,
}

impl PageSpec {
    pub const LABEL: PageSpec = PageSpec {
        width_in: 4.0,
        height_in: 6.0,
        margin_in: 0.2,
        print_background: true,
    };

    pub fn width_pt(&self) -> f32 {
        self.width_in * POINTS_PER_INCH
    }

    pub fn height_pt(&self) -> f32 {
        self.height_in * POINTS_PER_INCH
    }

    pub fn margin_pt(&self) -> f32 {
        self.margin_in * POINTS_PER_INCH
    }
}

/// A running rendering engine shared by all render calls.
#[async_trait]
pub trait RenderEngine: Send + Sync {
    /// A fresh, private drawing surface.
    async fn new_surface(&self) -> Result<Box<dyn Surface>, RenderError>;
    async fn close(&self) -> Result<(), RenderError>;
    fn type_name(&self) -> &'static str;
}

/// Per-call drawing state. Dropped after one render.
#[async_trait]
pub trait Surface: Send {
    async fn set_content(&mut self, docs: &[ComposedDocument]) -> Result<(), RenderError>;
    /// Resolve every embedded raster. Capturing before this succeeds is an error.
    async fn wait_for_images(&mut self) -> Result<(), RenderError>;
    async fn capture(&mut self, page: &PageSpec) -> Result<Vec<u8>, RenderError>;
    async fn close(&mut self);
}

#[async_trait]
pub trait EngineLauncher: Send + Sync {
    async fn launch(&self) -> Result<Arc<dyn RenderEngine>, RenderError>;
}

pub struct DocumentRenderer {
    launcher: Arc<dyn EngineLauncher>,
    engine: Mutex<Option<Arc<dyn RenderEngine>>>,
    page: PageSpec,
}

impl DocumentRenderer {
    pub fn new(launcher: Arc<dyn EngineLauncher>) -> Self {
        DocumentRenderer {
            launcher,
            engine: Mutex::new(None),
            page: PageSpec::LABEL,
        }
    }

    pub fn page(&self) -> &PageSpec {
        &self.page
    }

    /// Return the running engine, launching it on first use.
    pub async fn open(&self) -> Result<Arc<dyn RenderEngine>, RenderError> {
        let mut guard = self.engine.lock().await;
        if let Some(engine) = guard.as_ref() {
            return Ok(engine.clone());
        }

        info!("Launching rendering engine");
        let engine = self.launcher.launch().await?;
        info!("Rendering engine ready: {}", engine.type_name());
        *guard = Some(engine.clone());
        Ok(engine)
    }

    pub async fn is_open(&self) -> bool {
        self.engine.lock().await.is_some()
    }

    /// Shut the engine down. A later render launches a new one.
    pub async fn close(&self) -> Result<(), RenderError> {
        let engine = self.engine.lock().await.take();
        match engine {
            Some(engine) => {
                info!("Closing rendering engine");
                engine.close().await
            }
            None => Ok(()),
        }
    }

    pub async fn render(&self, doc: &ComposedDocument) -> Result<Bytes, RenderError> {
        self.render_all(std::slice::from_ref(doc)).await
    }

    /// Render several labels into one document, each starting on its own page.
    pub async fn render_all(&self, docs: &[ComposedDocument]) -> Result<Bytes, RenderError> {
        let engine = self.open().await?;
        let mut surface = engine.new_surface().await?;

        let result = Self::paint(surface.as_mut(), docs, &self.page).await;
        surface.close().await;

        match &result {
            Ok(bytes) => debug!("Rendered {} label(s) into {} bytes", docs.len(), bytes.len()),
            Err(e) => warn!(
                "Render failed for {:?}: {}",
                docs.iter().map(|d| d.title.as_str()).collect::<Vec<_>>(),
                e
            ),
        }
        result.map(Bytes::from)
    }

    async fn paint(
        surface: &mut dyn Surface,
        docs: &[ComposedDocument],
        page: &PageSpec,
    ) -> Result<Vec<u8>, RenderError> {
        if docs.is_empty() {
            return Err(RenderError::NoContent);
        }
        surface.set_content(docs).await?;
        surface.wait_for_images().await?;
        surface.capture(page).await
    }
}
