use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::error::{ContextError, ErrorKind};

/// How the contents of a mapped region are interpreted when extracting from it or filling it.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    Text,
    Image,
    TableRow,
    Signature,
}

impl FieldType {
    /// The name under which the field type is persisted.
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldType::Text => "text",
            FieldType::Image => "image",
            FieldType::TableRow => "table_row",
            FieldType::Signature => "signature",
        }
    }

    /// Parses a persisted field type. The legacy `table` spelling is accepted as well.
    pub fn parse(name: &str) -> Option<FieldType> {
        match name {
            "text" => Some(FieldType::Text),
            "image" => Some(FieldType::Image),
            "table_row" | "table" => Some(FieldType::TableRow),
            "signature" => Some(FieldType::Signature),
            _ => None,
        }
    }

    /// Guesses the field type from the naming conventions of the mapping tool, used whenever
    /// a coordinate record arrives without an explicit type.
    pub fn infer_from_field_id(field_id: &str) -> FieldType {
        let field_id = field_id.to_lowercase();
        if field_id.contains("signature") {
            FieldType::Signature
        } else if field_id.contains("photo")
            || field_id.contains("diagram")
            || field_id.contains("image")
        {
            FieldType::Image
        } else if (field_id.contains("repair") && field_id.contains("line"))
            || field_id.contains("row")
        {
            FieldType::TableRow
        } else {
            FieldType::Text
        }
    }

    /// Whether the region carries text that the extraction resolver can recover.
    pub fn is_text_bearing(&self) -> bool {
        matches!(self, FieldType::Text | FieldType::TableRow)
    }
}

/// The kind of document a template lays out. Exactly one template of each kind may be active.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum DocumentKind {
    RentalAgreement,
    DamageReport,
}

impl DocumentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentKind::RentalAgreement => "rental_agreement",
            DocumentKind::DamageReport => "damage_report",
        }
    }

    pub fn parse(name: &str) -> Option<DocumentKind> {
        match name {
            "rental_agreement" => Some(DocumentKind::RentalAgreement),
            "damage_report" => Some(DocumentKind::DamageReport),
            _ => None,
        }
    }
}

/// A rectangle in PDF user space, expressed through its lower-left and upper-right corners.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
pub struct Rectangle {
    pub x0: f64,
    pub y0: f64,
    pub x1: f64,
    pub y1: f64,
}

impl Rectangle {
    pub fn new(x0: f64, y0: f64, x1: f64, y1: f64) -> Self {
        Rectangle { x0, y0, x1, y1 }
    }

    pub fn width(&self) -> f64 {
        self.x1 - self.x0
    }

    pub fn height(&self) -> f64 {
        self.y1 - self.y0
    }

    /// Whether the point lies inside the rectangle, borders included.
    pub fn contains(&self, x: f64, y: f64) -> bool {
        x >= self.x0 && x <= self.x1 && y >= self.y0 && y <= self.y1
    }
}

/// One named rectangular region on one page of one template version.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct FieldCoordinate {
    pub field_id: String,
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    #[serde(default = "first_page")]
    pub page: u32,
    #[serde(default)]
    field_type: Option<FieldType>,
    #[serde(default)]
    pub template_version: i64,
}

fn first_page() -> u32 {
    1
}

impl FieldCoordinate {
    pub fn new<S: Into<String>>(
        field_id: S,
        [x, y, width, height]: [f64; 4],
        page: u32,
        field_type: FieldType,
        template_version: i64,
    ) -> Self {
        FieldCoordinate {
            field_id: field_id.into(),
            x,
            y,
            width,
            height,
            page,
            field_type: Some(field_type),
            template_version,
        }
    }

    /// The declared field type, or the one inferred from the field identifier.
    pub fn field_type(&self) -> FieldType {
        self.field_type
            .unwrap_or_else(|| FieldType::infer_from_field_id(&self.field_id))
    }

    pub fn set_field_type(&mut self, field_type: FieldType) {
        self.field_type = Some(field_type);
    }

    /// The same coordinate, bound to another template version.
    pub fn with_template_version(self, template_version: i64) -> Self {
        FieldCoordinate {
            template_version,
            ..self
        }
    }

    /// The region interpreted as already being in bottom-left origin, unscaled.
    pub fn rectangle(&self) -> Rectangle {
        Rectangle::new(self.x, self.y, self.x + self.width, self.y + self.height)
    }

    /// Rejects boxes which can never describe a region of a page.
    pub fn validate(&self) -> Result<(), ContextError> {
        let finite = [self.x, self.y, self.width, self.height]
            .iter()
            .all(|value| value.is_finite());
        if !finite {
            return Err(ContextError::with_context(
                ErrorKind::InvalidGeometry,
                format!("The field {:?} has a non-finite coordinate", self.field_id),
            ));
        }
        if self.width <= 0.0 || self.height <= 0.0 {
            return Err(ContextError::with_context(
                ErrorKind::InvalidGeometry,
                format!(
                    "The field {:?} has a non-positive extent {}x{}",
                    self.field_id, self.width, self.height
                ),
            ));
        }
        if self.page == 0 {
            return Err(ContextError::with_context(
                ErrorKind::InvalidGeometry,
                format!("The field {:?} references page 0, pages are 1-based", self.field_id),
            ));
        }
        if self.field_id.trim().is_empty() {
            return Err(ContextError::with_context(
                ErrorKind::InvalidGeometry,
                "A field has an empty identifier",
            ));
        }

        Ok(())
    }
}

/// One immutable, versioned template binary.
#[derive(Debug, Clone, Serialize)]
pub struct TemplateVersion {
    pub version: i64,
    pub kind: DocumentKind,
    #[serde(skip)]
    pub file_data: Vec<u8>,
    pub num_pages: u32,
    pub is_active: bool,
    pub filename: Option<String>,
    pub uploaded_by: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub uploaded_at: OffsetDateTime,
    pub notes: Option<String>,
}

/// What the web layer hands over when a template file is uploaded.
#[derive(Debug, Clone)]
pub struct TemplateUpload {
    pub kind: DocumentKind,
    pub file_data: Vec<u8>,
    pub filename: Option<String>,
    pub uploaded_by: Option<String>,
    pub notes: Option<String>,
}

/// One append-only record of a coordinate assignment.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct MappingHistoryEntry {
    pub id: i64,
    pub session: i64,
    pub template_version: i64,
    pub field_id: String,
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    pub page: u32,
    pub field_type: FieldType,
    pub mapped_by: String,
    #[serde(with = "time::serde::rfc3339")]
    pub mapped_at: OffsetDateTime,
}

impl MappingHistoryEntry {
    /// The coordinate as it was assigned in this entry.
    pub fn coordinate(&self) -> FieldCoordinate {
        FieldCoordinate::new(
            self.field_id.clone(),
            [self.x, self.y, self.width, self.height],
            self.page,
            self.field_type,
            self.template_version,
        )
    }
}

/// One allocated document number, e.g. `DR41/2025`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DocumentNumber {
    pub prefix: String,
    pub year: i32,
    pub number: i64,
    /// The minimum number of digits the number is zero-padded to.
    #[serde(skip)]
    pub width: usize,
}

impl std::fmt::Display for DocumentNumber {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            formatter,
            "{}{:0width$}/{}",
            self.prefix,
            self.number,
            self.year,
            width = self.width
        )
    }
}

/// The value written into one field by the fill engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldValue {
    Text(String),
    /// PNG or JPEG encoded bytes.
    Image(Vec<u8>),
    /// Ordered rows for a table field, top to bottom.
    Rows(Vec<String>),
}

impl FieldValue {
    pub fn is_compatible_with(&self, field_type: FieldType) -> bool {
        matches!(
            (self, field_type),
            (FieldValue::Text(_), FieldType::Text)
                | (FieldValue::Text(_), FieldType::TableRow)
                | (FieldValue::Rows(_), FieldType::TableRow)
                | (FieldValue::Image(_), FieldType::Image)
                | (FieldValue::Image(_), FieldType::Signature)
        )
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::Text(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::Text(value)
    }
}

/// A non-fatal condition met while processing a document, reported next to the primary result.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "warning", rename_all = "snake_case")]
pub enum Warning {
    /// Every geometric hypothesis came back empty.
    UnresolvedField { field_id: String },
    /// The coordinate references a page the document does not have.
    PageOutOfRange {
        field_id: String,
        page: u32,
        num_pages: u32,
    },
    /// A value was supplied for a field that has no mapped box.
    MissingCoordinateFor { field_id: String },
    /// Table rows did not fit and were dropped.
    RowOverflow {
        field_id: String,
        written: usize,
        dropped: usize,
    },
    /// The value cannot be drawn into a field of this type.
    UnsupportedFieldType {
        field_id: String,
        field_type: FieldType,
    },
    /// The image bytes of a field could not be decoded.
    InvalidImage { field_id: String, reason: String },
    /// The text did not fit in its box and was cut.
    TextTruncated { field_id: String },
    /// Characters the standard font cannot draw were left out of the text.
    UnencodableText { field_id: String, characters: String },
}

impl Warning {
    pub fn field_id(&self) -> &str {
        match self {
            Warning::UnresolvedField { field_id }
            | Warning::PageOutOfRange { field_id, .. }
            | Warning::MissingCoordinateFor { field_id }
            | Warning::RowOverflow { field_id, .. }
            | Warning::UnsupportedFieldType { field_id, .. }
            | Warning::InvalidImage { field_id, .. }
            | Warning::TextTruncated { field_id }
            | Warning::UnencodableText { field_id, .. } => field_id,
        }
    }
}
