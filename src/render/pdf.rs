// Native PDF engine: lays out composed labels and writes them with lopdf.

use async_trait::async_trait;
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Dictionary, Document, Object, ObjectId, Stream};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

use super::metrics::{FontFace, FontMetrics};
use super::{EngineLauncher, PageSpec, RenderEngine, Surface};
use crate::errors::RenderError;
use crate::label::{Block, ComposedDocument, Field, InfoLine, SymbolSlot};
use crate::symbols::{decode_data_uri, EncodedSymbol};

const PDF_VERSION: &str = "1.5";
const PRODUCER: &str = "workorder_labels";

// Layout sizes come from the label's CSS, converted at 0.75pt per px.
const PX: f32 = 0.75;
const BODY_PADDING: f32 = 8.0 * PX;
const LINE_HEIGHT: f32 = 1.2;

const HEADER_SIZE: f32 = 16.0 * PX;
const HEADER_GAP: f32 = 16.0 * PX;

const SECTION_MARGIN: f32 = 8.0 * PX;
const LABEL_SIZE: f32 = 10.0 * PX;
const ADDRESS_SIZE: f32 = 9.0 * PX;
const ADDRESS_LINE_HEIGHT: f32 = 1.3;
const BARCODE_BOX: (f32, f32) = (120.0 * PX, 60.0 * PX);
const BARCODE_GAP: f32 = 10.0 * PX;

const DIVIDER_WIDTH: f32 = 1.0 * PX;

const ORDER_QR_SIZE: f32 = 40.0 * PX;
const ORDER_QR_GAP: f32 = 4.0 * PX;

const CELL_PADDING: f32 = 4.0 * PX;
const DETAIL_SIZE: f32 = 9.0 * PX;
const DESIGN_QR_SIZE: f32 = 80.0 * PX;
const PRODUCT_LEFT_SHARE: f32 = 0.6;

const INFO_SIZE: f32 = 9.0 * PX;
const INFO_PADDING: f32 = 4.0 * PX;

/// 0xRRGGBB
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Rgb(u32);

impl Rgb {
    fn operands(self) -> Vec<Object> {
        [16, 8, 0]
            .iter()
            .map(|shift| Object::Real(((self.0 >> shift) & 0xff) as f32 / 255.0))
            .collect()
    }
}

const WHITE: Rgb = Rgb(0xffffff);
const TEXT: Rgb = Rgb(0x333333);
const MUTED: Rgb = Rgb(0x666666);
const PLACEHOLDER_TEXT: Rgb = Rgb(0x999999);
const PLACEHOLDER_FILL: Rgb = Rgb(0xf0f0f0);
const PLACEHOLDER_BORDER: Rgb = Rgb(0xcccccc);
const CELL_BORDER: Rgb = Rgb(0xdddddd);
const INFO_FILL: Rgb = Rgb(0xfff3e0);

/// One drawing instruction. Coordinates are relative to the row's top-left
/// corner with y growing downwards; text `y` is the baseline.
#[derive(Debug, Clone, PartialEq)]
enum DrawOp {
    Text {
        x: f32,
        y: f32,
        size: f32,
        face: FontFace,
        color: Rgb,
        text: String,
    },
    Rect {
        x: f32,
        y: f32,
        w: f32,
        h: f32,
        fill: Option<Rgb>,
        stroke: Option<(Rgb, bool)>,
    },
    Line {
        x1: f32,
        y1: f32,
        x2: f32,
        y2: f32,
        width: f32,
        color: Rgb,
    },
    Image {
        key: String,
        x: f32,
        y: f32,
        w: f32,
        h: f32,
    },
}

/// An unbreakable horizontal slice of a label.
#[derive(Debug, Clone, Default)]
struct Row {
    height: f32,
    ops: Vec<DrawOp>,
}

#[derive(Debug)]
struct LaidOutPage {
    ops: Vec<DrawOp>,
}

struct ResolvedImage {
    width: u32,
    height: u32,
    gray: Vec<u8>,
}

pub struct PdfEngineLauncher;

#[async_trait]
impl EngineLauncher for PdfEngineLauncher {
    async fn launch(&self) -> Result<Arc<dyn RenderEngine>, RenderError> {
        Ok(Arc::new(PdfEngine::start()))
    }
}

pub struct PdfEngine {
    metrics: Arc<FontMetrics>,
    closed: AtomicBool,
    surfaces_opened: AtomicUsize,
}

impl PdfEngine {
    pub fn start() -> Self {
        PdfEngine {
            metrics: Arc::new(FontMetrics::standard()),
            closed: AtomicBool::new(false),
            surfaces_opened: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl RenderEngine for PdfEngine {
    async fn new_surface(&self) -> Result<Box<dyn Surface>, RenderError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(RenderError::EngineClosed);
        }
        let n = self.surfaces_opened.fetch_add(1, Ordering::SeqCst) + 1;
        debug!("Opening PDF surface #{}", n);
        Ok(Box::new(PdfSurface::new(self.metrics.clone())))
    }

    async fn close(&self) -> Result<(), RenderError> {
        self.closed.store(true, Ordering::SeqCst);
        info!(
            "PDF engine closed after {} surface(s)",
            self.surfaces_opened.load(Ordering::SeqCst)
        );
        Ok(())
    }

    fn type_name(&self) -> &'static str {
        "Native PDF (lopdf)"
    }
}

type ImageTable = HashMap<String, ResolvedImage>;

/// Content sits behind `Arc`s so decoding and page writing run on the
/// blocking pool.
pub struct PdfSurface {
    metrics: Arc<FontMetrics>,
    docs: Arc<Vec<ComposedDocument>>,
    images: Arc<ImageTable>,
    images_ready: bool,
}

impl PdfSurface {
    fn new(metrics: Arc<FontMetrics>) -> Self {
        PdfSurface {
            metrics,
            docs: Arc::new(Vec::new()),
            images: Arc::new(HashMap::new()),
            images_ready: false,
        }
    }
}

/// Run CPU-bound rendering work off the async executor.
async fn off_executor<T, F>(work: F) -> Result<T, RenderError>
where
    F: FnOnce() -> Result<T, RenderError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| RenderError::Capture(format!("render task failed: {}", e)))?
}

fn layout(metrics: &FontMetrics, docs: &[ComposedDocument], page: &PageSpec) -> Vec<LaidOutPage> {
    let content_width = page.width_pt() - 2.0 * (page.margin_pt() + BODY_PADDING);
    let content_height = page.height_pt() - 2.0 * (page.margin_pt() + BODY_PADDING);

    let mut pages = Vec::new();
    for doc in docs {
        let layout = LabelLayout {
            metrics,
            width: content_width,
        };
        let rows: Vec<Row> = doc.blocks.iter().flat_map(|b| layout.block(b)).collect();
        pages.extend(paginate(rows, content_height));
    }
    pages
}

fn write_pdf(
    docs: &[ComposedDocument],
    images: &ImageTable,
    pages: &[LaidOutPage],
    page: &PageSpec,
) -> Result<Vec<u8>, RenderError> {
    let mut doc = Document::with_version(PDF_VERSION);
    let pages_id = doc.new_object_id();

    let mut fonts = Dictionary::new();
    for face in [FontFace::Regular, FontFace::Bold] {
        let font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => face.base_font(),
            "Encoding" => "WinAnsiEncoding",
        });
        fonts.set(face.resource_name(), font_id);
    }

    // Images get stable names in first-use order.
    let mut image_names: HashMap<&str, String> = HashMap::new();
    let mut xobjects = Dictionary::new();
    for op in pages.iter().flat_map(|p| p.ops.iter()) {
        if let DrawOp::Image { key, .. } = op {
            if image_names.contains_key(key.as_str()) {
                continue;
            }
            let image = images.get(key).ok_or_else(|| {
                RenderError::Capture(format!("image not resolved: {}", key))
            })?;
            let name = format!("Im{}", image_names.len());
            let image_id = add_image(&mut doc, image);
            xobjects.set(name.as_str(), image_id);
            image_names.insert(key.as_str(), name);
        }
    }

    let resources_id = doc.add_object(dictionary! {
        "Font" => fonts,
        "XObject" => xobjects,
    });

    let origin_x = page.margin_pt() + BODY_PADDING;
    let origin_top = page.height_pt() - page.margin_pt() - BODY_PADDING;

    let mut kids: Vec<Object> = Vec::with_capacity(pages.len());
    for laid_out in pages {
        let mut operations = Vec::new();
        if page.print_background {
            operations.extend(fill_rect(
                0.0,
                0.0,
                page.width_pt(),
                page.height_pt(),
                WHITE,
            ));
        }
        for op in &laid_out.ops {
            operations.extend(pdf_ops(op, origin_x, origin_top, &image_names));
        }

        let content = Content { operations };
        let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode()?));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "MediaBox" => vec![0.into(), 0.into(), page.width_pt().into(), page.height_pt().into()],
            "Contents" => content_id,
            "Resources" => resources_id,
        });
        kids.push(page_id.into());
    }

    let count = kids.len() as i64;
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => count,
        }),
    );

    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let title = docs
        .first()
        .map(|d| d.title.clone())
        .unwrap_or_default();
    let info_id = doc.add_object(dictionary! {
        "Title" => Object::string_literal(win_ansi(&title)),
        "Producer" => Object::string_literal(PRODUCER),
    });
    doc.trailer.set("Info", info_id);

    let mut buffer = Vec::new();
    doc.save_to(&mut buffer)
        .map_err(|e| RenderError::Capture(e.to_string()))?;
    Ok(buffer)
}

#[async_trait]
impl Surface for PdfSurface {
    async fn set_content(&mut self, docs: &[ComposedDocument]) -> Result<(), RenderError> {
        self.docs = Arc::new(docs.to_vec());
        self.images = Arc::new(HashMap::new());
        self.images_ready = false;
        Ok(())
    }

    async fn wait_for_images(&mut self) -> Result<(), RenderError> {
        let docs = self.docs.clone();
        let resolved = off_executor(move || resolve_images(&docs)).await?;
        debug!("Resolved {} embedded image(s)", resolved.len());
        self.images = Arc::new(resolved);
        self.images_ready = true;
        Ok(())
    }

    async fn capture(&mut self, page: &PageSpec) -> Result<Vec<u8>, RenderError> {
        if self.docs.is_empty() {
            return Err(RenderError::NoContent);
        }
        if !self.images_ready {
            return Err(RenderError::Capture(
                "embedded images have not finished loading".to_string(),
            ));
        }
        let metrics = self.metrics.clone();
        let docs = self.docs.clone();
        let images = self.images.clone();
        let page = *page;
        off_executor(move || {
            let pages = layout(&metrics, &docs, &page);
            write_pdf(&docs, &images, &pages, &page)
        })
        .await
    }

    async fn close(&mut self) {
        self.docs = Arc::new(Vec::new());
        self.images = Arc::new(HashMap::new());
        self.images_ready = false;
    }
}

fn resolve_images(docs: &[ComposedDocument]) -> Result<ImageTable, RenderError> {
    let mut resolved = HashMap::new();
    for symbol in docs.iter().flat_map(|d| d.symbols()) {
        if resolved.contains_key(&symbol.raster) {
            continue;
        }
        resolved.insert(symbol.raster.clone(), resolve_image(symbol)?);
    }
    Ok(resolved)
}

fn resolve_image(symbol: &EncodedSymbol) -> Result<ResolvedImage, RenderError> {
    let resolve_error = |reason: String| RenderError::ImageResolve {
        name: symbol.describe(),
        reason,
    };
    let png = decode_data_uri(&symbol.raster).map_err(resolve_error)?;
    let gray = image::load_from_memory(&png)
        .map_err(|e| resolve_error(e.to_string()))?
        .to_luma8();
    Ok(ResolvedImage {
        width: gray.width(),
        height: gray.height(),
        gray: gray.into_raw(),
    })
}

fn add_image(doc: &mut Document, image: &ResolvedImage) -> ObjectId {
    let stream = Stream::new(
        dictionary! {
            "Type" => "XObject",
            "Subtype" => "Image",
            "Width" => image.width as i64,
            "Height" => image.height as i64,
            "ColorSpace" => "DeviceGray",
            "BitsPerComponent" => 8,
        },
        image.gray.clone(),
    );
    doc.add_object(stream)
}

// ============================================================================
// Layout
// ============================================================================

struct LabelLayout<'a> {
    metrics: &'a FontMetrics,
    width: f32,
}

impl LabelLayout<'_> {
    fn block(&self, block: &Block) -> Vec<Row> {
        match block {
            Block::Header { title } => vec![self.header(title)],
            Block::ShipTo {
                label,
                lines,
                barcode,
            } => self.ship_to(label, lines, barcode),
            Block::Divider => vec![self.divider()],
            Block::OrderId { label, value, scan } => vec![self.order_id(label, value, scan.as_ref())],
            Block::ProductRow {
                name,
                details,
                design,
            } => vec![self.product_row(name.as_deref(), details, design)],
            Block::CustomInfo { lines } => self.custom_info(lines),
        }
    }

    fn text_line_height(size: f32) -> f32 {
        size * LINE_HEIGHT
    }

    /// Baseline offset for text of `size` in a line box of `line_height`.
    fn baseline(size: f32, line_height: f32) -> f32 {
        (line_height - size) / 2.0 + size * 0.8
    }

    fn header(&self, title: &str) -> Row {
        let line = Self::text_line_height(HEADER_SIZE);
        let width = self.metrics.text_width(title, FontFace::Bold, HEADER_SIZE);
        Row {
            height: line + HEADER_GAP,
            ops: vec![DrawOp::Text {
                x: ((self.width - width) / 2.0).max(0.0),
                y: Self::baseline(HEADER_SIZE, line),
                size: HEADER_SIZE,
                face: FontFace::Bold,
                color: TEXT,
                text: title.to_string(),
            }],
        }
    }

    /// The first row holds the label, the barcode and as many address lines as
    /// fit beside it. Remaining lines are one row each so they can page-break.
    fn ship_to(&self, label: &str, lines: &[String], barcode: &SymbolSlot) -> Vec<Row> {
        let (box_w, box_h) = BARCODE_BOX;
        let left_width = self.width - box_w - BARCODE_GAP;
        let first_bottom = SECTION_MARGIN + box_h;
        let mut ops = Vec::new();

        let label_line = Self::text_line_height(LABEL_SIZE);
        let mut y = SECTION_MARGIN;
        ops.push(DrawOp::Text {
            x: 0.0,
            y: y + Self::baseline(LABEL_SIZE, label_line),
            size: LABEL_SIZE,
            face: FontFace::Regular,
            color: TEXT,
            text: label.to_string(),
        });
        y += label_line + 2.0 * PX;

        // Blank address lines still take vertical space, hence `None`.
        let address_line = ADDRESS_SIZE * ADDRESS_LINE_HEIGHT;
        let mut wrapped = lines
            .iter()
            .flat_map(|line| {
                let pieces = self
                    .metrics
                    .wrap(line, FontFace::Bold, ADDRESS_SIZE, left_width);
                if pieces.is_empty() {
                    vec![None]
                } else {
                    pieces.into_iter().map(Some).collect()
                }
            });

        let address_text = |y: f32, text: String| DrawOp::Text {
            x: 0.0,
            y: y + Self::baseline(ADDRESS_SIZE, address_line),
            size: ADDRESS_SIZE,
            face: FontFace::Bold,
            color: TEXT,
            text,
        };

        while y + address_line <= first_bottom {
            match wrapped.next() {
                Some(line) => {
                    ops.extend(line.map(|text| address_text(y, text)));
                    y += address_line;
                }
                None => break,
            }
        }

        let box_x = self.width - box_w;
        ops.extend(self.symbol_slot(barcode, box_x, SECTION_MARGIN, box_w, box_h, true));

        let mut rows = vec![Row {
            height: y.max(first_bottom),
            ops,
        }];
        rows.extend(wrapped.map(|line| Row {
            height: address_line,
            ops: line.map(|text| address_text(0.0, text)).into_iter().collect(),
        }));
        if let Some(last) = rows.last_mut() {
            last.height += SECTION_MARGIN;
        }
        rows
    }

    fn divider(&self) -> Row {
        let y = SECTION_MARGIN + DIVIDER_WIDTH / 2.0;
        Row {
            height: 2.0 * SECTION_MARGIN + DIVIDER_WIDTH,
            ops: vec![DrawOp::Line {
                x1: 0.0,
                y1: y,
                x2: self.width,
                y2: y,
                width: DIVIDER_WIDTH,
                color: TEXT,
            }],
        }
    }

    /// Long order numbers wrap in the space left of the QR.
    fn order_id(&self, label: &str, value: &str, scan: Option<&EncodedSymbol>) -> Row {
        let line = Self::text_line_height(LABEL_SIZE);
        let label_width = self.metrics.text_width(label, FontFace::Bold, LABEL_SIZE);
        let space = self.metrics.text_width(" ", FontFace::Bold, LABEL_SIZE);
        let value_x = label_width + space;
        let qr_room = match scan {
            Some(_) => ORDER_QR_SIZE + ORDER_QR_GAP,
            None => 0.0,
        };
        let value_width = (self.width - value_x - qr_room).max(LABEL_SIZE);
        let wrapped = self
            .metrics
            .wrap(value, FontFace::Bold, LABEL_SIZE, value_width);

        let text_height = wrapped.len().max(1) as f32 * line;
        let height = match scan {
            Some(_) => text_height.max(ORDER_QR_SIZE),
            None => text_height,
        };
        let top = (height - text_height) / 2.0;

        let mut ops = vec![DrawOp::Text {
            x: 0.0,
            y: top + Self::baseline(LABEL_SIZE, line),
            size: LABEL_SIZE,
            face: FontFace::Bold,
            color: MUTED,
            text: label.to_string(),
        }];
        for (i, text) in wrapped.into_iter().enumerate() {
            ops.push(DrawOp::Text {
                x: value_x,
                y: top + i as f32 * line + Self::baseline(LABEL_SIZE, line),
                size: LABEL_SIZE,
                face: FontFace::Bold,
                color: TEXT,
                text,
            });
        }
        if let Some(symbol) = scan {
            ops.push(DrawOp::Image {
                key: symbol.raster.clone(),
                x: self.width - ORDER_QR_SIZE,
                y: (height - ORDER_QR_SIZE) / 2.0,
                w: ORDER_QR_SIZE,
                h: ORDER_QR_SIZE,
            });
        }

        Row {
            height: height + 4.0 * PX,
            ops,
        }
    }

    fn product_row(
        &self,
        name: Option<&str>,
        details: &[Field],
        design: &SymbolSlot,
    ) -> Row {
        let top = 6.0 * PX;
        let left_width = self.width * PRODUCT_LEFT_SHARE;
        let right_width = self.width - left_width;
        let inner_left = left_width - 2.0 * CELL_PADDING;
        let mut ops = Vec::new();

        let mut y = top + CELL_PADDING;
        if let Some(name) = name {
            let line = Self::text_line_height(LABEL_SIZE);
            for text in self.metrics.wrap(name, FontFace::Bold, LABEL_SIZE, inner_left) {
                ops.push(DrawOp::Text {
                    x: CELL_PADDING,
                    y: y + Self::baseline(LABEL_SIZE, line),
                    size: LABEL_SIZE,
                    face: FontFace::Bold,
                    color: TEXT,
                    text,
                });
                y += line;
            }
        }

        let detail_line = Self::text_line_height(DETAIL_SIZE);
        for field in details {
            ops.extend(self.labeled_line(
                &field.label,
                &field.value,
                CELL_PADDING,
                &mut y,
                inner_left,
                DETAIL_SIZE,
                detail_line,
            ));
        }
        let left_bottom = y + CELL_PADDING;

        let right_content = match design {
            SymbolSlot::Image { .. } => DESIGN_QR_SIZE,
            _ => Self::text_line_height(LABEL_SIZE),
        };
        let right_bottom = top + 2.0 * CELL_PADDING + right_content;
        let bottom = left_bottom.max(right_bottom);
        let cell_height = bottom - top;

        let slot_w = match design {
            SymbolSlot::Image { .. } => DESIGN_QR_SIZE,
            _ => right_width - 2.0 * CELL_PADDING,
        };
        let slot_x = left_width + (right_width - slot_w) / 2.0;
        let slot_y = top + (cell_height - right_content) / 2.0;
        ops.extend(self.symbol_slot(design, slot_x, slot_y, slot_w, right_content, false));

        for x in [0.0, left_width] {
            let w = if x == 0.0 { left_width } else { right_width };
            ops.push(DrawOp::Rect {
                x,
                y: top,
                w,
                h: cell_height,
                fill: None,
                stroke: Some((CELL_BORDER, false)),
            });
        }

        Row {
            height: bottom + 6.0 * PX,
            ops,
        }
    }

    /// Bold label followed by wrapped text; advances `y`.
    #[allow(clippy::too_many_arguments)]
    fn labeled_line(
        &self,
        label: &str,
        value: &str,
        x: f32,
        y: &mut f32,
        width: f32,
        size: f32,
        line: f32,
    ) -> Vec<DrawOp> {
        let label_width = self.metrics.text_width(label, FontFace::Bold, size)
            + self.metrics.text_width(" ", FontFace::Regular, size);
        let mut ops = vec![DrawOp::Text {
            x,
            y: *y + Self::baseline(size, line),
            size,
            face: FontFace::Bold,
            color: MUTED,
            text: label.to_string(),
        }];
        let wrapped = self
            .metrics
            .wrap(value, FontFace::Regular, size, (width - label_width).max(size));
        let count = wrapped.len().max(1);
        for (i, text) in wrapped.into_iter().enumerate() {
            ops.push(DrawOp::Text {
                x: x + label_width,
                y: *y + i as f32 * line + Self::baseline(size, line),
                size,
                face: FontFace::Regular,
                color: TEXT,
                text,
            });
        }
        *y += count as f32 * line;
        ops
    }

    fn custom_info(&self, lines: &[InfoLine]) -> Vec<Row> {
        let line = Self::text_line_height(INFO_SIZE);
        let inner = self.width - 2.0 * INFO_PADDING;
        let last = lines.len().saturating_sub(1);

        lines
            .iter()
            .enumerate()
            .map(|(i, info)| {
                let top_pad = if i == 0 { INFO_PADDING * 2.0 } else { 0.0 };
                let bottom_pad = if i == last { INFO_PADDING * 2.0 } else { 0.0 };

                let mut y = top_pad;
                let mut ops = match &info.label {
                    Some(label) => self.labeled_line(
                        &format!("{}:", label),
                        &info.text,
                        INFO_PADDING,
                        &mut y,
                        inner,
                        INFO_SIZE,
                        line,
                    ),
                    None => {
                        let wrapped = self.metrics.wrap(&info.text, FontFace::Regular, INFO_SIZE, inner);
                        let count = wrapped.len().max(1);
                        let ops = wrapped
                            .into_iter()
                            .enumerate()
                            .map(|(n, text)| DrawOp::Text {
                                x: INFO_PADDING,
                                y: y + n as f32 * line + Self::baseline(INFO_SIZE, line),
                                size: INFO_SIZE,
                                face: FontFace::Regular,
                                color: TEXT,
                                text,
                            })
                            .collect();
                        y += count as f32 * line;
                        ops
                    }
                };
                let height = y + bottom_pad;

                // Background goes first so text paints over it.
                let fill_top = if i == 0 { INFO_PADDING } else { 0.0 };
                let fill_bottom = if i == last { height - INFO_PADDING } else { height };
                ops.insert(
                    0,
                    DrawOp::Rect {
                        x: 0.0,
                        y: fill_top,
                        w: self.width,
                        h: fill_bottom - fill_top,
                        fill: Some(INFO_FILL),
                        stroke: None,
                    },
                );
                Row { height, ops }
            })
            .collect()
    }

    fn symbol_slot(
        &self,
        slot: &SymbolSlot,
        x: f32,
        y: f32,
        w: f32,
        h: f32,
        framed_placeholder: bool,
    ) -> Vec<DrawOp> {
        match slot {
            SymbolSlot::Image { symbol } => {
                let (iw, ih) = fit(symbol.width as f32, symbol.height as f32, w, h);
                vec![DrawOp::Image {
                    key: symbol.raster.clone(),
                    x: x + (w - iw) / 2.0,
                    y: y + (h - ih) / 2.0,
                    w: iw,
                    h: ih,
                }]
            }
            SymbolSlot::Placeholder { caption } => {
                let mut ops = Vec::new();
                if framed_placeholder {
                    ops.push(DrawOp::Rect {
                        x,
                        y,
                        w,
                        h,
                        fill: Some(PLACEHOLDER_FILL),
                        stroke: Some((PLACEHOLDER_BORDER, true)),
                    });
                }
                ops.push(self.centered_text(caption, x, y, w, h, PLACEHOLDER_TEXT));
                ops
            }
            SymbolSlot::Text { text } => vec![self.centered_text(text, x, y, w, h, TEXT)],
        }
    }

    fn centered_text(&self, text: &str, x: f32, y: f32, w: f32, h: f32, color: Rgb) -> DrawOp {
        let width = self.metrics.text_width(text, FontFace::Regular, LABEL_SIZE);
        DrawOp::Text {
            x: x + ((w - width) / 2.0).max(0.0),
            y: y + Self::baseline(LABEL_SIZE, h),
            size: LABEL_SIZE,
            face: FontFace::Regular,
            color,
            text: text.to_string(),
        }
    }
}

/// Largest size with the source aspect ratio that fits the box.
fn fit(src_w: f32, src_h: f32, max_w: f32, max_h: f32) -> (f32, f32) {
    if src_w <= 0.0 || src_h <= 0.0 {
        return (max_w, max_h);
    }
    let scale = (max_w / src_w).min(max_h / src_h);
    (src_w * scale, src_h * scale)
}

/// Stack rows onto pages. A row that does not fit starts a new page; a row
/// taller than a whole page is placed alone and clipped at the page edge.
fn paginate(rows: Vec<Row>, page_height: f32) -> Vec<LaidOutPage> {
    let mut pages = vec![LaidOutPage { ops: Vec::new() }];
    let mut cursor = 0.0;

    for row in rows {
        if cursor > 0.0 && cursor + row.height > page_height {
            pages.push(LaidOutPage { ops: Vec::new() });
            cursor = 0.0;
        }
        if let Some(page) = pages.last_mut() {
            page.ops
                .extend(row.ops.into_iter().map(|op| offset(op, cursor)));
        }
        cursor += row.height;
    }
    pages
}

fn offset(op: DrawOp, dy: f32) -> DrawOp {
    match op {
        DrawOp::Text {
            x,
            y,
            size,
            face,
            color,
            text,
        } => DrawOp::Text {
            x,
            y: y + dy,
            size,
            face,
            color,
            text,
        },
        DrawOp::Rect {
            x,
            y,
            w,
            h,
            fill,
            stroke,
        } => DrawOp::Rect {
            x,
            y: y + dy,
            w,
            h,
            fill,
            stroke,
        },
        DrawOp::Line {
            x1,
            y1,
            x2,
            y2,
            width,
            color,
        } => DrawOp::Line {
            x1,
            y1: y1 + dy,
            x2,
            y2: y2 + dy,
            width,
            color,
        },
        DrawOp::Image { key, x, y, w, h } => DrawOp::Image {
            key,
            x,
            y: y + dy,
            w,
            h,
        },
    }
}

// ============================================================================
// PDF content
// ============================================================================

fn fill_rect(x: f32, y: f32, w: f32, h: f32, color: Rgb) -> Vec<Operation> {
    vec![
        Operation::new("rg", color.operands()),
        Operation::new("re", vec![x.into(), y.into(), w.into(), h.into()]),
        Operation::new("f", vec![]),
    ]
}

/// Translate a layout op into PDF operators. `top` is the PDF y of the
/// content box's upper edge.
fn pdf_ops(
    op: &DrawOp,
    left: f32,
    top: f32,
    image_names: &HashMap<&str, String>,
) -> Vec<Operation> {
    match op {
        DrawOp::Text {
            x,
            y,
            size,
            face,
            color,
            text,
        } => vec![
            Operation::new("BT", vec![]),
            Operation::new("Tf", vec![face.resource_name().into(), (*size).into()]),
            Operation::new("rg", color.operands()),
            Operation::new("Td", vec![(left + x).into(), (top - y).into()]),
            Operation::new("Tj", vec![Object::string_literal(win_ansi(text))]),
            Operation::new("ET", vec![]),
        ],
        DrawOp::Rect {
            x,
            y,
            w,
            h,
            fill,
            stroke,
        } => {
            let rect = || {
                Operation::new(
                    "re",
                    vec![(left + x).into(), (top - y - h).into(), (*w).into(), (*h).into()],
                )
            };
            let mut ops = Vec::new();
            if let Some(color) = fill {
                ops.push(Operation::new("rg", color.operands()));
                ops.push(rect());
                ops.push(Operation::new("f", vec![]));
            }
            if let Some((color, dashed)) = stroke {
                ops.push(Operation::new("q", vec![]));
                ops.push(Operation::new("RG", color.operands()));
                ops.push(Operation::new("w", vec![PX.into()]));
                if *dashed {
                    ops.push(Operation::new(
                        "d",
                        vec![Object::Array(vec![2.into(), 2.into()]), 0.into()],
                    ));
                }
                ops.push(rect());
                ops.push(Operation::new("S", vec![]));
                ops.push(Operation::new("Q", vec![]));
            }
            ops
        }
        DrawOp::Line {
            x1,
            y1,
            x2,
            y2,
            width,
            color,
        } => vec![
            Operation::new("q", vec![]),
            Operation::new("RG", color.operands()),
            Operation::new("w", vec![(*width).into()]),
            Operation::new("m", vec![(left + x1).into(), (top - y1).into()]),
            Operation::new("l", vec![(left + x2).into(), (top - y2).into()]),
            Operation::new("S", vec![]),
            Operation::new("Q", vec![]),
        ],
        DrawOp::Image { key, x, y, w, h } => match image_names.get(key.as_str()) {
            Some(name) => vec![
                Operation::new("q", vec![]),
                Operation::new(
                    "cm",
                    vec![
                        (*w).into(),
                        0.into(),
                        0.into(),
                        (*h).into(),
                        (left + x).into(),
                        (top - y - h).into(),
                    ],
                ),
                Operation::new("Do", vec![Object::Name(name.as_bytes().to_vec())]),
                Operation::new("Q", vec![]),
            ],
            None => Vec::new(),
        },
    }
}

/// Encode text for the standard fonts' WinAnsi encoding. Characters outside
/// Latin-1 become '?'.
fn win_ansi(text: &str) -> Vec<u8> {
    text.chars()
        .map(|c| match c as u32 {
            0x20..=0x7e | 0xa0..=0xff => c as u32 as u8,
            0x2026 => 0x85,
            0x2013 => 0x96,
            0x2014 => 0x97,
            0x2018 => 0x91,
            0x2019 => 0x92,
            0x201c => 0x93,
            0x201d => 0x94,
            0x20ac => 0x80,
            _ => b'?',
        })
        .collect()
}
