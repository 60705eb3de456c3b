// QR and CODE128 rasters embedded in work-order labels.

use barcoders::sym::code128::Code128;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use image::codecs::png::PngEncoder;
use image::{ColorType, GrayImage, ImageEncoder, Luma};
use imageproc::drawing::draw_text_mut;
use qrcode::QrCode;
use rusttype::{Font, Scale};
use serde::Serialize;
use std::path::Path;
use tracing::{info, warn};

use crate::errors::SymbolError;

// QR: 80px target, one module of quiet zone, black on white
const QR_TARGET_WIDTH: u32 = 80;
const QR_MARGIN_MODULES: u32 = 1;

// CODE128: 2px modules, 45px bars, 8px margin, 12px caption
const BAR_MODULE_WIDTH: u32 = 2;
const BAR_HEIGHT: u32 = 45;
const BAR_MARGIN: u32 = 8;
const BAR_FONT_SIZE: f32 = 12.0;
const BAR_TEXT_GAP: u32 = 2;

// Character set B covers printable ASCII, which is what order numbers use.
const CODE128_SET_B: char = '\u{0181}';

const DARK: Luma<u8> = Luma([0u8]);
const LIGHT: Luma<u8> = Luma([255u8]);

const PNG_DATA_URI_PREFIX: &str = "data:image/png;base64,";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SymbolKind {
    Qr,
    Barcode,
}

/// A rendered symbol. `raster` is a PNG data URI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EncodedSymbol {
    pub kind: SymbolKind,
    pub source_text: String,
    pub raster: String,
    pub width: u32,
    pub height: u32,
}

impl EncodedSymbol {
    fn from_image(kind: SymbolKind, text: &str, img: &GrayImage) -> Result<Self, SymbolError> {
        Ok(EncodedSymbol {
            kind,
            source_text: text.to_string(),
            raster: png_data_uri(img)?,
            width: img.width(),
            height: img.height(),
        })
    }

    /// Short name used in logs and error messages.
    pub fn describe(&self) -> String {
        format!("{:?}({})", self.kind, self.source_text)
    }
}

pub struct SymbolEncoder {
    caption_font: Option<Font<'static>>,
}

impl SymbolEncoder {
    /// Encoder without a caption font; barcodes are drawn without the text line.
    pub fn new() -> Self {
        SymbolEncoder { caption_font: None }
    }

    pub fn with_font_path(path: &Path) -> Self {
        let caption_font = match std::fs::read(path) {
            Ok(data) => match Font::try_from_vec(data) {
                Some(font) => {
                    info!("Loaded barcode caption font from {:?}", path);
                    Some(font)
                }
                None => {
                    warn!("Failed to parse font {:?}. Barcode captions disabled.", path);
                    None
                }
            },
            Err(e) => {
                warn!("Font not found at {:?} ({}). Barcode captions disabled.", path, e);
                None
            }
        };

        SymbolEncoder { caption_font }
    }

    pub fn has_caption_font(&self) -> bool {
        self.caption_font.is_some()
    }

    /// Encode `text` as a QR code. Failures are logged and yield `None`.
    pub fn encode_qr(&self, text: &str) -> Option<EncodedSymbol> {
        match self.try_encode_qr(text) {
            Ok(symbol) => Some(symbol),
            Err(e) => {
                warn!("Error generating QR code: {}", e);
                None
            }
        }
    }

    /// Encode `text` as a CODE128 barcode. Failures are logged and yield `None`.
    pub fn encode_barcode(&self, text: &str) -> Option<EncodedSymbol> {
        match self.try_encode_barcode(text) {
            Ok(symbol) => Some(symbol),
            Err(e) => {
                warn!("Error generating barcode: {}", e);
                None
            }
        }
    }

    pub fn try_encode_qr(&self, text: &str) -> Result<EncodedSymbol, SymbolError> {
        let code = QrCode::new(text.as_bytes()).map_err(|e| SymbolError::Qr {
            text: text.to_string(),
            reason: e.to_string(),
        })?;

        let module_count = code.width() as u32;
        let total_modules = module_count + 2 * QR_MARGIN_MODULES;
        let scale = (QR_TARGET_WIDTH / total_modules).max(1);
        let size = total_modules * scale;

        let mut img = GrayImage::from_pixel(size, size, LIGHT);
        for (i, color) in code.to_colors().iter().enumerate() {
            if *color != qrcode::Color::Dark {
                continue;
            }
            let x = (i as u32 % module_count + QR_MARGIN_MODULES) * scale;
            let y = (i as u32 / module_count + QR_MARGIN_MODULES) * scale;
            fill_block(&mut img, x, y, scale, scale);
        }

        EncodedSymbol::from_image(SymbolKind::Qr, text, &img)
    }

    pub fn try_encode_barcode(&self, text: &str) -> Result<EncodedSymbol, SymbolError> {
        let barcode_error = |reason: String| SymbolError::Barcode {
            text: text.to_string(),
            reason,
        };

        if text.is_empty() {
            return Err(barcode_error("empty payload".to_string()));
        }

        let modules = Code128::new(format!("{}{}", CODE128_SET_B, text))
            .map_err(|e| barcode_error(e.to_string()))?
            .encode();

        let caption_height = if self.caption_font.is_some() {
            BAR_TEXT_GAP + BAR_FONT_SIZE as u32
        } else {
            0
        };
        let width = modules.len() as u32 * BAR_MODULE_WIDTH + 2 * BAR_MARGIN;
        let height = BAR_MARGIN + BAR_HEIGHT + caption_height + BAR_MARGIN;

        let mut img = GrayImage::from_pixel(width, height, LIGHT);
        for (i, module) in modules.iter().enumerate() {
            if *module == 1 {
                let x = BAR_MARGIN + i as u32 * BAR_MODULE_WIDTH;
                fill_block(&mut img, x, BAR_MARGIN, BAR_MODULE_WIDTH, BAR_HEIGHT);
            }
        }

        if let Some(font) = &self.caption_font {
            let scale = Scale::uniform(BAR_FONT_SIZE);
            let text_width = measure_text_width(font, text, scale);
            let x = width.saturating_sub(text_width) / 2;
            let y = BAR_MARGIN + BAR_HEIGHT + BAR_TEXT_GAP;
            draw_text_mut(&mut img, DARK, x as i32, y as i32, scale, font, text);
        }

        EncodedSymbol::from_image(SymbolKind::Barcode, text, &img)
    }
}

impl Default for SymbolEncoder {
    fn default() -> Self {
        Self::new()
    }
}

fn fill_block(img: &mut GrayImage, x: u32, y: u32, w: u32, h: u32) {
    for dx in 0..w {
        for dy in 0..h {
            img.put_pixel(x + dx, y + dy, DARK);
        }
    }
}

fn measure_text_width(font: &Font, text: &str, scale: Scale) -> u32 {
    font.layout(text, scale, rusttype::point(0.0, 0.0))
        .last()
        .and_then(|g| g.pixel_bounding_box())
        .map_or(0, |bb| bb.max.x.max(0) as u32)
}

fn png_data_uri(img: &GrayImage) -> Result<String, SymbolError> {
    let mut png = Vec::new();
    PngEncoder::new(&mut png)
        .write_image(img.as_raw(), img.width(), img.height(), ColorType::L8)
        .map_err(|e| SymbolError::Raster(e.to_string()))?;
    Ok(format!("{}{}", PNG_DATA_URI_PREFIX, STANDARD.encode(png)))
}

/// Extract the payload bytes of a base64 data URI.
pub fn decode_data_uri(uri: &str) -> Result<Vec<u8>, String> {
    let rest = uri
        .strip_prefix("data:")
        .ok_or_else(|| "not a data URI".to_string())?;
    let (meta, payload) = rest
        .split_once(',')
        .ok_or_else(|| "data URI has no payload".to_string())?;
    if !meta.ends_with(";base64") {
        return Err(format!("unsupported data URI encoding: {}", meta));
    }
    STANDARD.decode(payload).map_err(|e| e.to_string())
}
