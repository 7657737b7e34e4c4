use std::collections::{BTreeMap, HashMap};

use serde::Serialize;

use crate::configuration::EngineConfiguration;
use crate::error::{ContextError, ErrorKind};
use crate::model::{FieldCoordinate, Rectangle, Warning};
use crate::text_layer::{collapse_whitespace, PageText};

/// One candidate interpretation of a stored coordinate relative to the page it is read from.
/// The declaration order is the evaluation order and breaks ties between equal scores.
#[derive(Debug, Serialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Hypothesis {
    /// The coordinate already has a bottom-left origin and is unscaled.
    Direct,
    /// The coordinate was captured with a top-left origin.
    YInverted,
    /// The coordinate was captured on a zoomed preview.
    Scaled,
    ScaledYInverted,
}

impl Hypothesis {
    pub const ALL: [Hypothesis; 4] = [
        Hypothesis::Direct,
        Hypothesis::YInverted,
        Hypothesis::Scaled,
        Hypothesis::ScaledYInverted,
    ];

    /// The rectangle this hypothesis reads the coordinate as, on a page with the given media box.
    /// Inverted readings measure from the top-left corner of the media box, the others are in
    /// plain user space.
    pub fn rectangle(
        &self,
        coordinate: &FieldCoordinate,
        media_box: &Rectangle,
        scale_factor: f64,
    ) -> Rectangle {
        let scale = match self {
            Hypothesis::Direct | Hypothesis::YInverted => 1.0,
            Hypothesis::Scaled | Hypothesis::ScaledYInverted => scale_factor,
        };
        let (x, y, width, height) = (
            coordinate.x / scale,
            coordinate.y / scale,
            coordinate.width / scale,
            coordinate.height / scale,
        );

        match self {
            Hypothesis::Direct | Hypothesis::Scaled => Rectangle::new(x, y, x + width, y + height),
            Hypothesis::YInverted | Hypothesis::ScaledYInverted => Rectangle::new(
                media_box.x0 + x,
                media_box.y1 - y - height,
                media_box.x0 + x + width,
                media_box.y1 - y,
            ),
        }
    }
}

/// The outcome of resolving one field.
#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct ExtractionResult {
    pub value: Option<String>,
    pub method: Option<Hypothesis>,
    /// The winning score over the sum of all scores, 0 when unresolved.
    pub confidence: f32,
    /// The score of every hypothesis, in evaluation order.
    pub scores: Vec<(Hypothesis, usize)>,
}

impl ExtractionResult {
    fn unresolved(scores: Vec<(Hypothesis, usize)>) -> ExtractionResult {
        ExtractionResult {
            value: None,
            method: None,
            confidence: 0.0,
            scores,
        }
    }
}

/// Every resolved field of a document, together with the non-fatal conditions met on the way.
#[derive(Debug, Serialize, Clone, PartialEq, Default)]
pub struct Extraction {
    pub fields: BTreeMap<String, ExtractionResult>,
    pub warnings: Vec<Warning>,
}

/// Scores a candidate text: its length in characters when it carries at least one
/// alphanumeric character, zero otherwise.
pub fn score(text: &str) -> usize {
    if text.chars().any(char::is_alphanumeric) {
        text.chars().count()
    } else {
        0
    }
}

/// Recovers the text at each text-bearing coordinate of the document.
///
/// Fails only when the document cannot be opened. Per-field problems are reported as warnings
/// and leave the field unresolved. Image and signature coordinates carry no text and are skipped.
pub fn extract(
    pdf_bytes: &[u8],
    coordinates: &[FieldCoordinate],
    configuration: &EngineConfiguration,
) -> Result<Extraction, ContextError> {
    let document = lopdf::Document::load_mem(pdf_bytes).map_err(|error| {
        ContextError::with_error(ErrorKind::UnreadablePdf, "Unable to open the document", &error)
    })?;
    let pages = document.get_pages();
    let num_pages = pages.len() as u32;

    let mut extraction = Extraction::default();
    let mut page_texts: HashMap<u32, PageText> = HashMap::new();

    for coordinate in coordinates {
        let field_type = coordinate.field_type();
        if !field_type.is_text_bearing() {
            log::debug!(
                "Skipping the {} field {:?}",
                field_type.as_str(),
                coordinate.field_id
            );
            continue;
        }

        let Some(page_id) = pages.get(&coordinate.page) else {
            let warning = Warning::PageOutOfRange {
                field_id: coordinate.field_id.clone(),
                page: coordinate.page,
                num_pages,
            };
            log::warn!(
                "The field {:?} references page {} of a {}-page document",
                coordinate.field_id,
                coordinate.page,
                num_pages
            );
            extraction.warnings.push(warning);
            extraction.fields.insert(
                coordinate.field_id.clone(),
                ExtractionResult::unresolved(Vec::new()),
            );
            continue;
        };
        let page_text = page_texts
            .entry(coordinate.page)
            .or_insert_with(|| PageText::read(&document, *page_id));

        let result = resolve_field(page_text, coordinate, configuration.scale_factor);
        if result.value.is_none() {
            log::warn!("No hypothesis resolved the field {:?}", coordinate.field_id);
            extraction.warnings.push(Warning::UnresolvedField {
                field_id: coordinate.field_id.clone(),
            });
        }
        extraction
            .fields
            .insert(coordinate.field_id.clone(), result);
    }

    log::info!(
        "Extracted {} fields with {} warnings",
        extraction.fields.len(),
        extraction.warnings.len()
    );

    Ok(extraction)
}

/// Tries every hypothesis against the page and keeps the best scoring text.
pub fn resolve_field(
    page_text: &PageText,
    coordinate: &FieldCoordinate,
    scale_factor: f64,
) -> ExtractionResult {
    let candidates: Vec<(Hypothesis, String, usize)> = Hypothesis::ALL
        .iter()
        .map(|hypothesis| {
            let rectangle = hypothesis.rectangle(coordinate, &page_text.media_box, scale_factor);
            let text = collapse_whitespace(&page_text.text_in(&rectangle));
            let score = score(&text);
            (*hypothesis, text, score)
        })
        .collect();
    let scores: Vec<(Hypothesis, usize)> = candidates
        .iter()
        .map(|(hypothesis, _, score)| (*hypothesis, *score))
        .collect();
    log::debug!("Hypothesis scores of {:?}: {:?}", coordinate.field_id, scores);

    let total: usize = scores.iter().map(|(_, score)| score).sum();
    let mut best: Option<&(Hypothesis, String, usize)> = None;
    for candidate in &candidates {
        // Strictly greater, so that the earliest hypothesis wins a tie
        if candidate.2 > best.map_or(0, |best| best.2) {
            best = Some(candidate);
        }
    }

    match best {
        Some((hypothesis, text, score)) => ExtractionResult {
            value: Some(text.clone()),
            method: Some(*hypothesis),
            confidence: *score as f32 / total as f32,
            scores,
        },
        None => ExtractionResult::unresolved(scores),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::FieldType;
    use crate::text_layer::Glyph;

    fn word(text: &str, x: f64, baseline: f64) -> Vec<Glyph> {
        text.chars()
            .enumerate()
            .map(|(index, character)| Glyph {
                text: character.to_string(),
                bounds: Rectangle::new(
                    x + index as f64 * 6.0,
                    baseline - 2.5,
                    x + index as f64 * 6.0 + 5.5,
                    baseline + 7.5,
                ),
            })
            .collect()
    }

    #[test]
    fn hypotheses_transform_the_stored_box() {
        let coordinate =
            FieldCoordinate::new("clientName", [12.0, 130.0, 92.5, 10.5], 1, FieldType::Text, 1);
        let a4 = Rectangle::new(0.0, 0.0, 595.0, 842.0);

        assert_eq!(
            Hypothesis::Direct.rectangle(&coordinate, &a4, 2.0),
            Rectangle::new(12.0, 130.0, 104.5, 140.5)
        );
        assert_eq!(
            Hypothesis::YInverted.rectangle(&coordinate, &a4, 2.0),
            Rectangle::new(12.0, 701.5, 104.5, 712.0)
        );
        assert_eq!(
            Hypothesis::Scaled.rectangle(&coordinate, &a4, 2.0),
            Rectangle::new(6.0, 65.0, 52.25, 70.25)
        );
        assert_eq!(
            Hypothesis::ScaledYInverted.rectangle(&coordinate, &a4, 2.0),
            Rectangle::new(6.0, 771.75, 52.25, 777.0)
        );
    }

    #[test]
    fn inverted_readings_start_at_the_top_of_the_media_box() {
        let coordinate =
            FieldCoordinate::new("clientName", [12.0, 130.0, 92.5, 10.5], 1, FieldType::Text, 1);
        let shifted = Rectangle::new(20.0, 100.0, 615.0, 942.0);

        assert_eq!(
            Hypothesis::YInverted.rectangle(&coordinate, &shifted, 2.0),
            Rectangle::new(32.0, 801.5, 124.5, 812.0)
        );
        assert_eq!(
            Hypothesis::Direct.rectangle(&coordinate, &shifted, 2.0),
            Rectangle::new(12.0, 130.0, 104.5, 140.5)
        );
    }

    #[test]
    fn punctuation_scores_nothing() {
        assert_eq!(score(""), 0);
        assert_eq!(score("..: -"), 0);
        assert_eq!(score("DR41/2025"), 9);
        assert_eq!(score("Ü"), 1);
    }

    #[test]
    fn the_longest_text_wins_and_ties_go_to_the_earliest_hypothesis() {
        let mut glyphs = word("EIKE", 14.0, 703.0);
        glyphs.extend(word("AB", 14.0, 132.0));
        let page = PageText {
            media_box: Rectangle::new(0.0, 0.0, 595.0, 842.0),
            glyphs,
        };
        let coordinate =
            FieldCoordinate::new("clientName", [12.0, 130.0, 92.5, 10.5], 1, FieldType::Text, 1);

        let result = resolve_field(&page, &coordinate, 2.0);
        assert_eq!(result.value.as_deref(), Some("EIKE"));
        assert_eq!(result.method, Some(Hypothesis::YInverted));
        assert!((result.confidence - 4.0 / 6.0).abs() < 1e-6);

        let mut glyphs = word("ABCD", 14.0, 703.0);
        glyphs.extend(word("WXYZ", 14.0, 132.0));
        let page = PageText {
            glyphs,
            ..page
        };
        let result = resolve_field(&page, &coordinate, 2.0);
        assert_eq!(result.value.as_deref(), Some("WXYZ"));
        assert_eq!(result.method, Some(Hypothesis::Direct));
    }

    #[test]
    fn empty_regions_are_unresolved() {
        let page = PageText {
            media_box: Rectangle::new(0.0, 0.0, 595.0, 842.0),
            glyphs: word("...", 14.0, 703.0),
        };
        let coordinate =
            FieldCoordinate::new("clientName", [12.0, 130.0, 92.5, 10.5], 1, FieldType::Text, 1);

        let result = resolve_field(&page, &coordinate, 2.0);
        assert_eq!(result.value, None);
        assert_eq!(result.method, None);
        assert_eq!(result.confidence, 0.0);
        assert_eq!(result.scores.len(), 4);
    }
}
