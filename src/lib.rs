//! fieldmap maps named rectangular fields onto versioned PDF templates, and uses those maps in
//! both directions: it recovers the text found at each field of a foreign document whose coordinate
//! convention is unknown, and it draws values into the fields of a template to generate new documents.
//!
//! The entry point is the `Engine` struct, which owns the SQLite-backed `Store` and the
//! `EngineConfiguration`. The lower-level functions `extraction::extract` and `fill::fill` work purely
//! on byte buffers and can be used without any datastore.

/// This module contains the `ContextError` type which is the error type used throughout this library.
///
/// The reason why this type has been implemented is to uniform the error reporting without delving too deep
/// into specific error codes. Each error still carries an `ErrorKind`, so that callers can tell a missing
/// template from an unreadable document without parsing the message.
///
/// The `ContextError` type implements `std::fmt::Display` and `Debug`, so it can be explicitly printed out.
pub mod error;

/// The plain data shared by every other module: field coordinates, template versions, history entries,
/// document numbers, fill values and warnings.
pub mod model;

/// The tunables of the engine, loaded from a camelCase JSON file.
pub mod configuration;

/// The module where the SQLite persistence is presented.
///
/// # Introduction
///
/// A `Store` owns one connection to the database and exposes four groups of operations: the template
/// registry (`register_template`, `upload_template`, `active_template`...), the coordinate store
/// (`save_coordinates`, `load_coordinates`), the append-only mapping history (`history_for`, `snapshot_at`)
/// and the numbering sequencer (`provision_series`, `allocate`, `peek_next`).
///
/// The numbering sequencer is the only operation requiring mutual exclusion. Concurrent callers
/// open one store each against the same database file and are serialized by the database write lock.
pub mod store;

/// Metrics and `WinAnsiEncoding` of the standard Helvetica font, used both to read and to write text.
pub mod standard_font;

pub mod cmap;

/// Decoding of the fonts found in page resources into text and advance widths.
pub mod font;

/// The module where the text of a page is recovered together with the position of every glyph.
///
/// # Disclaimer
///
/// Only the subset of the content stream operators that moves text around is interpreted: the graphics
/// state stack, the text object and positioning operators, the text showing operators and form XObjects.
/// Page rotation and clipping are not taken into account, and scanned pages without a text layer yield no text.
pub mod text_layer;

/// The module where fields are recovered from foreign documents.
///
/// # Introduction
///
/// Stored coordinates may have been captured with a top-left origin, a bottom-left origin or on a zoomed preview.
/// Rather than guessing, `extract` tries every `Hypothesis` in a fixed order for each field and keeps the
/// text that scores the highest, reporting which interpretation won and how confident the choice is.
pub mod extraction;

/// The module where an existing PDF document is drawn over, through the `OverlayDocument` struct.
pub mod pdf;

/// The module where values are drawn into the fields of a template.
pub mod fill;

pub mod engine;

pub use configuration::EngineConfiguration;
pub use engine::{Engine, TemplateSelector};
pub use error::{ContextError, ErrorKind};
pub use extraction::{Extraction, ExtractionResult, Hypothesis};
pub use fill::Filled;
pub use model::{
    DocumentKind, DocumentNumber, FieldCoordinate, FieldType, FieldValue, MappingHistoryEntry,
    Rectangle, TemplateUpload, TemplateVersion, Warning,
};
pub use store::Store;
