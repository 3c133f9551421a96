//! Render step: offer document to PDF bytes.

use lopdf::content::{Content, Operation};
use lopdf::{Document, Object, ObjectId, Stream, dictionary};

use projectdesk_offers::OfferDocument;

#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("pdf encoding failed: {0}")]
    Pdf(#[from] lopdf::Error),
    #[error("pdf write failed: {0}")]
    Io(#[from] std::io::Error),
}

/// MIME type of every stored offer artifact.
pub const PDF_CONTENT_TYPE: &str = "application/pdf";

/// Turns a prepared offer document into downloadable PDF bytes.
pub trait OfferRenderer: Send + Sync {
    fn render(&self, document: &OfferDocument) -> Result<Vec<u8>, RenderError>;
}

impl<R: OfferRenderer + ?Sized> OfferRenderer for std::sync::Arc<R> {
    fn render(&self, document: &OfferDocument) -> Result<Vec<u8>, RenderError> {
        (**self).render(document)
    }
}

// A4 in points
const PAGE_WIDTH: i64 = 595;
const PAGE_HEIGHT: i64 = 842;
const MARGIN: i64 = 50;
const ROW_HEIGHT: i64 = 20;

const REGULAR: &str = "F1";
const BOLD: &str = "F2";

/// A4 offer layout using the standard Helvetica fonts.
#[derive(Debug, Clone)]
pub struct PdfOfferRenderer {
    currency_symbol: String,
}

impl Default for PdfOfferRenderer {
    fn default() -> Self {
        Self::new("€")
    }
}

impl PdfOfferRenderer {
    pub fn new(currency_symbol: impl Into<String>) -> Self {
        Self {
            currency_symbol: currency_symbol.into(),
        }
    }

    fn price(&self, amount: projectdesk_core::Money) -> String {
        format!("{}{}", self.currency_symbol, amount)
    }

    fn layout(&self, doc: &OfferDocument) -> Vec<Vec<Operation>> {
        let mut pages = PageWriter::new();
        let company = &doc.company;

        pages.text(BOLD, 28, MARGIN, 50, &company.name);
        pages.text(REGULAR, 10, 400, 50, &format!("Email: {}", company.email));
        pages.text(REGULAR, 10, 400, 65, &format!("Address: {}", company.address));
        pages.text(REGULAR, 10, 400, 80, &format!("VAT: {}", company.vat_number));
        pages.text(REGULAR, 10, 400, 95, &format!("Website: {}", company.website));

        pages.text(BOLD, 16, MARGIN, 120, "OFFER");
        pages.text(
            REGULAR,
            10,
            MARGIN,
            140,
            &format!(
                "{} | {} | {}",
                doc.offer_name,
                doc.project_name,
                doc.issued_at.format("%Y-%m-%d")
            ),
        );

        pages.y = 160;
        table_header(&mut pages);

        for line in &doc.lines {
            if pages.y > PAGE_HEIGHT - MARGIN - ROW_HEIGHT {
                pages.new_page();
                table_header(&mut pages);
            }
            let y = pages.y;
            pages.text(REGULAR, 10, 50, y, &line.description);
            pages.text(REGULAR, 10, 200, y, &line.category);
            pages.text(REGULAR, 10, 350, y, &line.quantity.to_string());
            pages.text(REGULAR, 10, 400, y, &self.price(line.unit_price));
            pages.text(REGULAR, 10, 470, y, &self.price(line.line_total));
            pages.y += ROW_HEIGHT;
        }

        // Notes block, separator and total need ~130pt
        if pages.y > PAGE_HEIGHT - MARGIN - 130 {
            pages.new_page();
        }
        pages.y += 30;
        let y = pages.y;
        pages.text(REGULAR, 10, MARGIN, y, "Additional Notes:");
        pages.y += 60;
        let y = pages.y;
        pages.rule(MARGIN, PAGE_WIDTH - MARGIN, y);
        pages.y += 20;
        let y = pages.y;
        pages.text(BOLD, 12, 400, y, &format!("TOTAL: {}", self.price(doc.total)));

        pages.finish()
    }
}

fn table_header(pages: &mut PageWriter) {
    let y = pages.y;
    for (x, label) in [
        (50, "Description"),
        (200, "Category"),
        (350, "Qty"),
        (400, "Price"),
        (470, "Total"),
    ] {
        pages.text(BOLD, 10, x, y, label);
    }
    pages.y += 20;
    let y = pages.y;
    pages.rule(MARGIN, PAGE_WIDTH - MARGIN, y - 6);
    pages.y += 10;
}

/// Collects content operations page by page, using top-down `y` coordinates.
struct PageWriter {
    pages: Vec<Vec<Operation>>,
    current: Vec<Operation>,
    y: i64,
}

impl PageWriter {
    fn new() -> Self {
        Self {
            pages: Vec::new(),
            current: Vec::new(),
            y: MARGIN,
        }
    }

    fn new_page(&mut self) {
        self.pages.push(std::mem::take(&mut self.current));
        self.y = MARGIN;
    }

    fn text(&mut self, font: &str, size: i64, x: i64, y_top: i64, text: &str) {
        self.current.extend([
            Operation::new("BT", vec![]),
            Operation::new("Tf", vec![font.into(), Object::Integer(size)]),
            Operation::new(
                "Td",
                vec![Object::Integer(x), Object::Integer(PAGE_HEIGHT - y_top - size)],
            ),
            Operation::new("Tj", vec![Object::string_literal(win_ansi(text))]),
            Operation::new("ET", vec![]),
        ]);
    }

    fn rule(&mut self, x1: i64, x2: i64, y_top: i64) {
        let y = PAGE_HEIGHT - y_top;
        self.current.extend([
            Operation::new("w", vec![Object::Integer(1)]),
            Operation::new("m", vec![Object::Integer(x1), Object::Integer(y)]),
            Operation::new("l", vec![Object::Integer(x2), Object::Integer(y)]),
            Operation::new("S", vec![]),
        ]);
    }

    fn finish(mut self) -> Vec<Vec<Operation>> {
        self.pages.push(self.current);
        self.pages
    }
}

/// Encode text for the standard fonts' WinAnsiEncoding.
fn win_ansi(text: &str) -> Vec<u8> {
    text.chars()
        .map(|c| match c {
            '€' => 0x80,
            c if (c as u32) < 0x80 => c as u8,
            c if (0xA0..=0xFF).contains(&(c as u32)) => c as u8,
            _ => b'?',
        })
        .collect()
}

impl OfferRenderer for PdfOfferRenderer {
    fn render(&self, document: &OfferDocument) -> Result<Vec<u8>, RenderError> {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();

        let regular = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Helvetica",
            "Encoding" => "WinAnsiEncoding",
        });
        let bold = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Helvetica-Bold",
            "Encoding" => "WinAnsiEncoding",
        });
        let resources_id = doc.add_object(dictionary! {
            "Font" => dictionary! {
                REGULAR => regular,
                BOLD => bold,
            },
        });

        let mut kids: Vec<Object> = Vec::new();
        for operations in self.layout(document) {
            let content = Content { operations };
            let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode()?));
            let page_id: ObjectId = doc.add_object(dictionary! {
                "Type" => "Page",
                "Parent" => pages_id,
                "Contents" => content_id,
            });
            kids.push(page_id.into());
        }

        let count = kids.len() as i64;
        let media_box: Vec<Object> = [0, 0, PAGE_WIDTH, PAGE_HEIGHT]
            .into_iter()
            .map(Object::Integer)
            .collect();
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => kids,
                "Count" => count,
                "Resources" => resources_id,
                "MediaBox" => media_box,
            }),
        );

        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        let info_id = doc.add_object(dictionary! {
            "Title" => Object::string_literal(win_ansi(&document.offer_name)),
            "Subject" => Object::string_literal(format!("offer {}", document.offer_id)),
        });
        doc.trailer.set("Root", catalog_id);
        doc.trailer.set("Info", info_id);

        let mut bytes = Vec::new();
        doc.save_to(&mut bytes)?;
        Ok(bytes)
    }
}
