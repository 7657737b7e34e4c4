use std::collections::{BTreeMap, HashMap};

use serde::Serialize;
use unicode_normalization::UnicodeNormalization as _;

use crate::configuration::EngineConfiguration;
use crate::error::ContextError;
use crate::model::{FieldCoordinate, FieldType, FieldValue, Rectangle, Warning};
use crate::pdf::{ImageXObject, OverlayDocument};
use crate::standard_font::{unencodable_characters, wrap_text};

/// The fraction of the box height the font size may take at most.
const MAXIMUM_FONT_TO_BOX_RATIO: f64 = 0.8;
/// How far below its baseline a line of Helvetica reaches, relative to the font size.
const DESCENT_RATIO: f64 = 0.21;
const TEXT_COLOR: [f32; 3] = [0.0, 0.0, 0.0];

/// A generated document with the non-fatal conditions met while drawing it.
#[derive(Debug, Clone, Serialize)]
pub struct Filled {
    #[serde(skip)]
    pub pdf_bytes: Vec<u8>,
    pub warnings: Vec<Warning>,
}

/// Draws every value inside the box mapped for its field, on a copy of the template.
///
/// Coordinates are always read as bottom-left-origin points: the engine controls the space it writes in.
/// A value whose field is unmapped, out of the template's pages or of the wrong kind is skipped
/// with a warning. Only a template which cannot be opened or serialized fails the call.
pub fn fill(
    template: &[u8],
    coordinates: &[FieldCoordinate],
    values: &BTreeMap<String, FieldValue>,
    configuration: &EngineConfiguration,
) -> Result<Filled, ContextError> {
    let mut document = OverlayDocument::load(template)?;
    let coordinates: HashMap<&str, &FieldCoordinate> = coordinates
        .iter()
        .map(|coordinate| (coordinate.field_id.as_str(), coordinate))
        .collect();
    let mut warnings = Vec::new();

    for (field_id, value) in values {
        let Some(coordinate) = coordinates.get(field_id.as_str()) else {
            warnings.push(Warning::MissingCoordinateFor {
                field_id: field_id.clone(),
            });
            continue;
        };
        if coordinate.page == 0 || coordinate.page > document.num_pages() {
            warnings.push(Warning::PageOutOfRange {
                field_id: field_id.clone(),
                page: coordinate.page,
                num_pages: document.num_pages(),
            });
            continue;
        }
        let field_type = coordinate.field_type();
        if !value.is_compatible_with(field_type) {
            warnings.push(Warning::UnsupportedFieldType {
                field_id: field_id.clone(),
                field_type,
            });
            continue;
        }

        let rectangle = coordinate.rectangle();
        match (value, field_type) {
            (FieldValue::Text(text), FieldType::Text) => {
                draw_text(
                    &mut document,
                    coordinate,
                    &rectangle,
                    text,
                    configuration,
                    &mut warnings,
                );
            }
            (FieldValue::Text(text), FieldType::TableRow) => {
                draw_rows(
                    &mut document,
                    coordinate,
                    std::slice::from_ref(text),
                    configuration,
                    &mut warnings,
                );
            }
            (FieldValue::Rows(rows), _) => {
                draw_rows(&mut document, coordinate, rows, configuration, &mut warnings);
            }
            (FieldValue::Image(bytes), _) => match ImageXObject::decode(bytes) {
                Ok(image) => {
                    let fitted = fit_image(&rectangle, image.width, image.height);
                    document.draw_image(coordinate.page, image, &fitted);
                }
                Err(error) => warnings.push(Warning::InvalidImage {
                    field_id: field_id.clone(),
                    reason: error.to_string(),
                }),
            },
            // Every other combination was rejected as incompatible
            _ => {}
        }
    }

    for warning in &warnings {
        log::warn!("Fill warning: {:?}", warning);
    }
    let pdf_bytes = document.save_to_bytes()?;
    log::info!(
        "Filled {} values with {} warnings",
        values.len(),
        warnings.len()
    );

    Ok(Filled {
        pdf_bytes,
        warnings,
    })
}

/// Wraps the text into the rectangle, clipped to it. Dropped lines and characters the font
/// cannot draw are reported against the field.
fn draw_text(
    document: &mut OverlayDocument,
    coordinate: &FieldCoordinate,
    rectangle: &Rectangle,
    text: &str,
    configuration: &EngineConfiguration,
    warnings: &mut Vec<Warning>,
) {
    let page = coordinate.page;
    let font_size = configuration
        .font_size
        .min(rectangle.height() * MAXIMUM_FONT_TO_BOX_RATIO);
    let padding = configuration
        .text_padding
        .min(rectangle.width() / 4.0);
    let text: String = text.nfc().collect();
    let lines = wrap_text(&text, rectangle.width() - 2.0 * padding, font_size);

    let pitch = font_size * configuration.line_spacing;
    let first_baseline = rectangle.y1 - font_size;
    let capacity = lines
        .iter()
        .enumerate()
        .take_while(|(index, _)| {
            first_baseline - *index as f64 * pitch - DESCENT_RATIO * font_size >= rectangle.y0
        })
        .count()
        .max(1);

    document.begin_clip(page, rectangle);
    for (index, line) in lines.iter().take(capacity).enumerate() {
        document.write_text_to_page(
            page,
            TEXT_COLOR,
            line,
            font_size,
            [rectangle.x0 + padding, first_baseline - index as f64 * pitch],
        );
    }
    document.end_clip(page);

    let characters = unencodable_characters(&text);
    if !characters.is_empty() {
        warnings.push(Warning::UnencodableText {
            field_id: coordinate.field_id.clone(),
            characters,
        });
    }
    if lines.len() > capacity {
        warnings.push(Warning::TextTruncated {
            field_id: coordinate.field_id.clone(),
        });
    }
}

/// Writes one row per slot of the box height, moving down from the box. Rows whose slot would
/// leave the page are dropped and reported.
fn draw_rows(
    document: &mut OverlayDocument,
    coordinate: &FieldCoordinate,
    rows: &[String],
    configuration: &EngineConfiguration,
    warnings: &mut Vec<Warning>,
) {
    let origin = coordinate.rectangle();
    let mut written = 0;
    for (index, row) in rows.iter().enumerate() {
        let top = origin.y1 - index as f64 * coordinate.height;
        let slot = Rectangle::new(origin.x0, top - coordinate.height, origin.x1, top);
        if slot.y0 < 0.0 {
            break;
        }
        draw_text(document, coordinate, &slot, row, configuration, warnings);
        written += 1;
    }

    if written < rows.len() {
        warnings.push(Warning::RowOverflow {
            field_id: coordinate.field_id.clone(),
            written,
            dropped: rows.len() - written,
        });
    }
}

/// The largest rectangle with the image's aspect ratio that fits in the box, centred in it.
fn fit_image(rectangle: &Rectangle, width: u32, height: u32) -> Rectangle {
    if width == 0 || height == 0 {
        return *rectangle;
    }
    let scale = (rectangle.width() / width as f64).min(rectangle.height() / height as f64);
    let (fitted_width, fitted_height) = (width as f64 * scale, height as f64 * scale);
    let x0 = rectangle.x0 + (rectangle.width() - fitted_width) / 2.0;
    let y0 = rectangle.y0 + (rectangle.height() - fitted_height) / 2.0;

    Rectangle::new(x0, y0, x0 + fitted_width, y0 + fitted_height)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn images_keep_their_aspect_ratio() {
        let rectangle = Rectangle::new(100.0, 100.0, 300.0, 200.0);

        let fitted = fit_image(&rectangle, 400, 400);
        assert_eq!(fitted, Rectangle::new(150.0, 100.0, 250.0, 200.0));

        let fitted = fit_image(&rectangle, 800, 100);
        assert_eq!(fitted, Rectangle::new(100.0, 137.5, 300.0, 162.5));
    }
}
