//! Work-order label layout.
//!
//! [`compose`] turns a [`WorkOrder`] and its encoded symbols into a
//! [`ComposedDocument`]: an ordered list of layout blocks that the renderer
//! paints onto a 4x6 page. The layout is fixed; only the content varies.

use serde::Serialize;
use serde_json::Value;

use crate::config::LabelConfig;
use crate::symbols::{EncodedSymbol, SymbolEncoder};
use crate::work_order::{CustomInfo, WorkOrder};

pub const HEADER_TITLE: &str = "WORK ORDER";
pub const SHIP_TO_LABEL: &str = "Ship To:";
pub const ORDER_ID_LABEL: &str = "Order ID:";
pub const PRODUCT_SKU_LABEL: &str = "Product SKU:";
pub const SKU_LABEL: &str = "SKU:";
pub const BARCODE_CAPTION: &str = "Barcode";
pub const NOT_AVAILABLE: &str = "N/A";

/// Product names longer than this are cut and end in an ellipsis.
pub const NAME_DISPLAY_CHARS: usize = 40;
const ELLIPSIS: &str = "...";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComposedDocument {
    pub title: String,
    pub blocks: Vec<Block>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Block {
    Header {
        title: String,
    },
    ShipTo {
        label: String,
        lines: Vec<String>,
        barcode: SymbolSlot,
    },
    Divider,
    OrderId {
        label: String,
        value: String,
        scan: Option<EncodedSymbol>,
    },
    ProductRow {
        name: Option<String>,
        details: Vec<Field>,
        design: SymbolSlot,
    },
    CustomInfo {
        lines: Vec<InfoLine>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Field {
    pub label: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InfoLine {
    pub label: Option<String>,
    pub text: String,
}

/// What occupies a symbol cell when the raster may be missing.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SymbolSlot {
    Image { symbol: EncodedSymbol },
    Placeholder { caption: String },
    Text { text: String },
}

impl ComposedDocument {
    /// Every raster embedded in the document, in paint order.
    pub fn symbols(&self) -> Vec<&EncodedSymbol> {
        let mut symbols = Vec::new();
        for block in &self.blocks {
            match block {
                Block::ShipTo { barcode, .. } => symbols.extend(barcode.symbol()),
                Block::OrderId { scan, .. } => symbols.extend(scan.as_ref()),
                Block::ProductRow { design, .. } => symbols.extend(design.symbol()),
                _ => {}
            }
        }
        symbols
    }

    /// Render the document as a standalone HTML page.
    pub fn to_html(&self) -> String {
        documents_html(std::slice::from_ref(self))
    }
}

/// One HTML page holding every label, each on its own printed page.
pub fn documents_html(docs: &[ComposedDocument]) -> String {
    let mut body = String::new();
    for doc in docs {
        body.push_str("<div class=\"work-order\">\n");
        for block in &doc.blocks {
            body.push_str(&block_html(block));
        }
        body.push_str("</div>\n");
    }
    let title = docs.first().map(|d| d.title.as_str()).unwrap_or_default();
    format!(
        "<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"UTF-8\">\n<title>{}</title>\n<style>{}</style>\n</head>\n<body>\n{}</body>\n</html>\n",
        escape_html(title),
        LABEL_CSS,
        body
    )
}

impl SymbolSlot {
    fn from_symbol(symbol: Option<&EncodedSymbol>, fallback: SymbolSlot) -> Self {
        match symbol {
            Some(symbol) => SymbolSlot::Image {
                symbol: symbol.clone(),
            },
            None => fallback,
        }
    }

    pub fn symbol(&self) -> Option<&EncodedSymbol> {
        match self {
            SymbolSlot::Image { symbol } => Some(symbol),
            _ => None,
        }
    }
}

/// Symbols needed for one label.
#[derive(Debug, Clone, Default)]
pub struct LabelSymbols {
    pub qr: Option<EncodedSymbol>,
    pub barcode: Option<EncodedSymbol>,
    pub design_qr: Option<EncodedSymbol>,
}

impl LabelSymbols {
    /// The design QR always encodes the order's design URL; `design_id` only
    /// decides whether it is attempted.
    pub fn encode(encoder: &SymbolEncoder, order: &WorkOrder, config: &LabelConfig) -> Self {
        let design_qr = if order.has_design() {
            encoder.encode_qr(&config.design_url(&order.order_number))
        } else {
            None
        };

        LabelSymbols {
            qr: encoder.encode_qr(&order.order_number),
            barcode: encoder.encode_barcode(&order.order_number),
            design_qr,
        }
    }

    pub fn compose(&self, order: &WorkOrder) -> ComposedDocument {
        compose(
            order,
            self.qr.as_ref(),
            self.barcode.as_ref(),
            self.design_qr.as_ref(),
        )
    }
}

pub fn document_title(order_number: &str) -> String {
    format!("Work Order - {}", order_number)
}

pub fn compose(
    order: &WorkOrder,
    qr: Option<&EncodedSymbol>,
    barcode: Option<&EncodedSymbol>,
    design_qr: Option<&EncodedSymbol>,
) -> ComposedDocument {
    let mut blocks = vec![
        Block::Header {
            title: HEADER_TITLE.to_string(),
        },
        Block::ShipTo {
            label: SHIP_TO_LABEL.to_string(),
            lines: split_lines(order.ship_to.as_deref().unwrap_or("")),
            barcode: SymbolSlot::from_symbol(
                barcode,
                SymbolSlot::Placeholder {
                    caption: BARCODE_CAPTION.to_string(),
                },
            ),
        },
        Block::Divider,
        Block::OrderId {
            label: ORDER_ID_LABEL.to_string(),
            value: order.order_number.clone(),
            scan: qr.cloned(),
        },
        Block::ProductRow {
            name: order.name.as_deref().map(truncate_name),
            details: vec![
                Field {
                    label: PRODUCT_SKU_LABEL.to_string(),
                    value: or_not_available(order.product_sku.as_deref()),
                },
                Field {
                    label: SKU_LABEL.to_string(),
                    value: or_not_available(order.sku.as_deref()),
                },
            ],
            design: SymbolSlot::from_symbol(
                design_qr.filter(|_| order.has_design()),
                SymbolSlot::Text {
                    text: NOT_AVAILABLE.to_string(),
                },
            ),
        },
    ];

    if let Some(info) = &order.custom_info {
        let lines = custom_info_lines(info);
        if !lines.is_empty() {
            blocks.push(Block::CustomInfo { lines });
        }
    }

    ComposedDocument {
        title: document_title(&order.order_number),
        blocks,
    }
}

fn split_lines(text: &str) -> Vec<String> {
    if text.is_empty() {
        return Vec::new();
    }
    text.split('\n')
        .map(|line| line.trim_end_matches('\r').to_string())
        .collect()
}

fn or_not_available(value: Option<&str>) -> String {
    match value {
        Some(v) if !v.trim().is_empty() => v.to_string(),
        _ => NOT_AVAILABLE.to_string(),
    }
}

pub fn truncate_name(name: &str) -> String {
    if name.chars().count() <= NAME_DISPLAY_CHARS {
        return name.to_string();
    }
    let keep = NAME_DISPLAY_CHARS - ELLIPSIS.len();
    let cut: String = name.chars().take(keep).collect();
    format!("{}{}", cut.trim_end(), ELLIPSIS)
}

fn custom_info_lines(info: &CustomInfo) -> Vec<InfoLine> {
    match info {
        CustomInfo::PlainText(text) => split_lines(text)
            .into_iter()
            .map(|text| InfoLine { label: None, text })
            .collect(),
        CustomInfo::Fields(fields) => fields
            .iter()
            .filter_map(|(key, value)| {
                field_text(value).map(|text| InfoLine {
                    label: Some(humanize_key(key)),
                    text,
                })
            })
            .collect(),
    }
}

/// Printable text for a custom-info value. Null and blank values print nothing.
fn field_text(value: &Value) -> Option<String> {
    let text = match value {
        Value::Null => return None,
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        other => other.to_string(),
    };
    if text.trim().is_empty() {
        None
    } else {
        Some(text)
    }
}

/// `giftMessage` / `gift_message` -> `Gift Message`
pub fn humanize_key(key: &str) -> String {
    let mut words: Vec<String> = Vec::new();
    let mut current = String::new();
    for c in key.chars() {
        if c == '_' || c == '-' || c == ' ' {
            if !current.is_empty() {
                words.push(std::mem::take(&mut current));
            }
        } else if c.is_uppercase() && !current.is_empty() {
            words.push(std::mem::take(&mut current));
            current.push(c);
        } else {
            current.push(c);
        }
    }
    if !current.is_empty() {
        words.push(current);
    }

    words
        .iter()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

// ============================================================================
// HTML export
// ============================================================================

const LABEL_CSS: &str = "body{font-family:Arial,sans-serif;margin:0;padding:8px;background:white;font-size:10px;line-height:1.2}\
.header{text-align:center;padding-bottom:8px;margin-bottom:8px}\
.header h1{color:#333;margin:0;font-size:16px;font-weight:bold}\
.ship-to-section{margin:8px 0;display:flex;justify-content:space-between;align-items:flex-start}\
.ship-to-left{flex:1;text-align:left}\
.ship-to-right{flex:0 0 auto;margin-left:10px}\
.ship-to-label{font-size:10px;color:#333;margin-bottom:2px}\
.ship-to-address{font-size:9px;color:#333;line-height:1.3;font-weight:bold}\
.full-width-divider{border-bottom:1px solid #333;margin:8px 0;width:100%}\
.barcode-image{max-width:120px;max-height:60px;display:block;margin:0 auto}\
.barcode-placeholder{width:120px;height:60px;background:#f0f0f0;border:1px dashed #ccc;display:flex;align-items:center;justify-content:center;color:#999;font-size:10px;margin:0 auto}\
.order-id{font-size:10px;font-weight:bold;display:flex;justify-content:space-between;align-items:center}\
.order-id img{width:40px;height:40px}\
.product-table{width:100%;border-collapse:collapse;margin:6px 0}\
.product-table td{border:1px solid #ddd;padding:4px;vertical-align:top;font-size:9px}\
.product-name{font-weight:bold;font-size:10px}\
.design-cell{text-align:center;vertical-align:middle}\
.design-cell img{width:80px;height:80px}\
.info-label{font-weight:bold;color:#666}\
.custom-info{background:#fff3e0;padding:4px;border-radius:3px;margin:4px 0;font-size:9px}\
.work-order{page-break-after:always}\
.work-order:last-child{page-break-after:auto}";

fn block_html(block: &Block) -> String {
    match block {
        Block::Header { title } => format!(
            "<div class=\"header\"><h1>{}</h1></div>\n",
            escape_html(title)
        ),
        Block::ShipTo {
            label,
            lines,
            barcode,
        } => {
            let address = lines
                .iter()
                .map(|line| escape_html(line))
                .collect::<Vec<_>>()
                .join("<br>");
            let right = match barcode {
                SymbolSlot::Image { symbol } => format!(
                    "<img src=\"{}\" alt=\"Barcode\" class=\"barcode-image\" />",
                    symbol.raster
                ),
                SymbolSlot::Placeholder { caption } => format!(
                    "<div class=\"barcode-placeholder\">{}</div>",
                    escape_html(caption)
                ),
                SymbolSlot::Text { text } => escape_html(text),
            };
            format!(
                "<div class=\"ship-to-section\"><div class=\"ship-to-left\"><div class=\"ship-to-label\">{}</div><div class=\"ship-to-address\">{}</div></div><div class=\"ship-to-right\">{}</div></div>\n",
                escape_html(label),
                address,
                right
            )
        }
        Block::Divider => "<div class=\"full-width-divider\"></div>\n".to_string(),
        Block::OrderId { label, value, scan } => {
            let scan = scan
                .as_ref()
                .map(|s| format!("<img src=\"{}\" alt=\"Order QR\" />", s.raster))
                .unwrap_or_default();
            format!(
                "<div class=\"order-id\"><span><span class=\"info-label\">{}</span> {}</span>{}</div>\n",
                escape_html(label),
                escape_html(value),
                scan
            )
        }
        Block::ProductRow {
            name,
            details,
            design,
        } => {
            let mut left = String::new();
            if let Some(name) = name {
                left.push_str(&format!(
                    "<div class=\"product-name\">{}</div>",
                    escape_html(name)
                ));
            }
            for field in details {
                left.push_str(&format!(
                    "<div><span class=\"info-label\">{}</span> {}</div>",
                    escape_html(&field.label),
                    escape_html(&field.value)
                ));
            }
            let right = match design {
                SymbolSlot::Image { symbol } => {
                    format!("<img src=\"{}\" alt=\"Design QR\" />", symbol.raster)
                }
                SymbolSlot::Placeholder { caption } => escape_html(caption),
                SymbolSlot::Text { text } => escape_html(text),
            };
            format!(
                "<table class=\"product-table\"><tr><td>{}</td><td class=\"design-cell\">{}</td></tr></table>\n",
                left, right
            )
        }
        Block::CustomInfo { lines } => {
            let rendered = lines
                .iter()
                .map(|line| match &line.label {
                    Some(label) => format!(
                        "<div><strong>{}:</strong> {}</div>",
                        escape_html(label),
                        escape_html(&line.text)
                    ),
                    None => format!("<div>{}</div>", escape_html(&line.text)),
                })
                .collect::<String>();
            format!("<div class=\"custom-info\">{}</div>\n", rendered)
        }
    }
}

pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}
