use std::collections::HashMap;
use std::rc::Rc;

use lopdf::content::{Content, Operation};
use lopdf::{Dictionary, Document, Object, ObjectId};
use nalgebra_glm as glm;
use unicode_normalization::UnicodeNormalization as _;

use crate::font::{lookup, lookup_dictionary, number, resolve, FontDecoder};
use crate::model::Rectangle;

/// The page size assumed when neither the page nor its ancestors declare a `MediaBox` (A4).
const DEFAULT_PAGE_SIZE: (f64, f64) = (595.0, 842.0);
/// How deep form XObjects may nest inside each other.
const MAXIMUM_FORM_DEPTH: usize = 8;
/// The horizontal gap, relative to the glyph height, above which two glyphs belong to different words.
const WORD_GAP_RATIO: f64 = 0.15;

/// One decoded glyph with its bounding box in default user space.
#[derive(Debug, Clone, PartialEq)]
pub struct Glyph {
    pub text: String,
    pub bounds: Rectangle,
}

impl Glyph {
    pub fn centre(&self) -> (f64, f64) {
        (
            (self.bounds.x0 + self.bounds.x1) / 2.0,
            (self.bounds.y0 + self.bounds.y1) / 2.0,
        )
    }
}

/// The positioned text of one page.
#[derive(Debug, Clone, PartialEq)]
pub struct PageText {
    /// The visible area of the page in user space, whose lower-left corner need not be the origin.
    pub media_box: Rectangle,
    pub glyphs: Vec<Glyph>,
}

impl PageText {
    /// Reads the size and every glyph of a page. Content streams which fail to decode
    /// leave the page without text rather than failing the whole document.
    pub fn read(document: &Document, page_id: ObjectId) -> PageText {
        let media_box = media_box(document, page_id);
        let resources = inherited(document, page_id, b"Resources").and_then(|resources| {
            match resources {
                Object::Dictionary(dictionary) => Some(dictionary),
                _ => None,
            }
        });

        let content = page_content(document, page_id);
        let operations = match Content::decode(&content) {
            Ok(content) => content.operations,
            Err(error) => {
                log::warn!(
                    "Failed to decode the content of page {:?}, treating it as empty: {}",
                    page_id,
                    error
                );
                Vec::new()
            }
        };

        let mut interpreter = Interpreter {
            document,
            fonts: HashMap::new(),
            glyphs: Vec::new(),
        };
        interpreter.run(&operations, resources, glm::Mat3::identity(), 0);

        PageText {
            media_box,
            glyphs: interpreter.glyphs,
        }
    }

    /// The text whose glyph centres lie inside the rectangle, read line by line from top to bottom
    /// and left to right, with whitespace collapsed.
    pub fn text_in(&self, rectangle: &Rectangle) -> String {
        let mut glyphs: Vec<&Glyph> = self
            .glyphs
            .iter()
            .filter(|glyph| {
                let (x, y) = glyph.centre();
                rectangle.contains(x, y)
            })
            .collect();
        glyphs.sort_by(|a, b| b.centre().1.total_cmp(&a.centre().1));

        let mut lines: Vec<Vec<&Glyph>> = Vec::new();
        for glyph in glyphs {
            match lines.last_mut() {
                Some(line) if same_line(line[0], glyph) => line.push(glyph),
                _ => lines.push(vec![glyph]),
            }
        }

        let mut text = String::new();
        for mut line in lines {
            line.sort_by(|a, b| a.bounds.x0.total_cmp(&b.bounds.x0));
            let mut previous: Option<&Glyph> = None;
            for glyph in line {
                if let Some(previous) = previous {
                    let gap = glyph.bounds.x0 - previous.bounds.x1;
                    if gap > WORD_GAP_RATIO * glyph.bounds.height() {
                        text.push(' ');
                    }
                }
                text.push_str(&glyph.text);
                previous = Some(glyph);
            }
            text.push(' ');
        }

        collapse_whitespace(&text.nfc().collect::<String>())
    }
}

fn same_line(first: &Glyph, glyph: &Glyph) -> bool {
    let tolerance = 0.5 * first.bounds.height().min(glyph.bounds.height());
    (first.centre().1 - glyph.centre().1).abs() <= tolerance
}

/// Replaces every run of whitespace with a single space and trims both ends.
pub fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Looks an inheritable page attribute up, walking the `Parent` chain of the page tree.
fn inherited<'a>(document: &'a Document, page_id: ObjectId, key: &[u8]) -> Option<&'a Object> {
    let mut current = Some(page_id);
    // Bounded against malformed trees whose parents loop
    for _ in 0..64 {
        let dictionary = document.get_object(current?).ok()?.as_dict().ok()?;
        if let Some(value) = lookup(document, dictionary, key) {
            return Some(value);
        }
        current = dictionary
            .get(b"Parent")
            .and_then(|parent| parent.as_reference())
            .ok();
    }

    None
}

/// The page's `MediaBox` with its corners normalized, in points.
pub fn media_box(document: &Document, page_id: ObjectId) -> Rectangle {
    let (width, height) = DEFAULT_PAGE_SIZE;
    let default_media_box = Rectangle::new(0.0, 0.0, width, height);
    let Some(Object::Array(media_box)) = inherited(document, page_id, b"MediaBox") else {
        return default_media_box;
    };
    let corners: Vec<f64> = media_box
        .iter()
        .filter_map(|value| number(resolve(document, value)))
        .collect();
    match corners.as_slice() {
        [x0, y0, x1, y1] => Rectangle::new(x0.min(*x1), y0.min(*y1), x0.max(*x1), y0.max(*y1)),
        _ => default_media_box,
    }
}

/// The width and height of the page's `MediaBox`, in points.
pub fn page_size(document: &Document, page_id: ObjectId) -> (f64, f64) {
    let media_box = media_box(document, page_id);
    (media_box.width(), media_box.height())
}

/// The concatenated, decompressed content streams of the page.
fn page_content(document: &Document, page_id: ObjectId) -> Vec<u8> {
    let Some(page) = document
        .get_object(page_id)
        .ok()
        .and_then(|page| page.as_dict().ok())
    else {
        return Vec::new();
    };

    let streams: Vec<&Object> = match lookup(document, page, b"Contents") {
        Some(Object::Array(references)) => references
            .iter()
            .map(|reference| resolve(document, reference))
            .collect(),
        Some(stream) => vec![stream],
        None => Vec::new(),
    };

    let mut content = Vec::new();
    for stream in streams {
        if let Object::Stream(stream) = stream {
            content.extend(
                stream
                    .decompressed_content()
                    .unwrap_or_else(|_| stream.content.clone()),
            );
            content.push(b'\n');
        }
    }

    content
}

/// The matrix `[a b c d e f]` of a PDF operator, in the column-vector convention of `glm`.
fn affine(a: f32, b: f32, c: f32, d: f32, e: f32, f: f32) -> glm::Mat3 {
    glm::Mat3::new(a, c, e, b, d, f, 0.0, 0.0, 1.0)
}

fn translation(x: f32, y: f32) -> glm::Mat3 {
    affine(1.0, 0.0, 0.0, 1.0, x, y)
}

fn operand(operands: &[Object], index: usize) -> f32 {
    operands
        .get(index)
        .and_then(number)
        .unwrap_or(0.0) as f32
}

#[derive(Debug, Clone)]
struct TextState {
    font: Rc<FontDecoder>,
    font_size: f32,
    character_spacing: f32,
    word_spacing: f32,
    horizontal_scaling: f32,
    leading: f32,
    rise: f32,
}

#[derive(Debug, Clone)]
struct GraphicsState {
    ctm: glm::Mat3,
    text: TextState,
}

struct Interpreter<'a> {
    document: &'a Document,
    fonts: HashMap<ObjectId, Rc<FontDecoder>>,
    glyphs: Vec<Glyph>,
}

impl<'a> Interpreter<'a> {
    fn run(
        &mut self,
        operations: &[Operation],
        resources: Option<&'a Dictionary>,
        ctm: glm::Mat3,
        depth: usize,
    ) {
        let mut state = GraphicsState {
            ctm,
            text: TextState {
                font: Rc::new(FontDecoder::fallback()),
                font_size: 0.0,
                character_spacing: 0.0,
                word_spacing: 0.0,
                horizontal_scaling: 1.0,
                leading: 0.0,
                rise: 0.0,
            },
        };
        let mut stack: Vec<GraphicsState> = Vec::new();
        let mut text_matrix = glm::Mat3::identity();
        let mut line_matrix = glm::Mat3::identity();

        for operation in operations {
            let operands = operation.operands.as_slice();
            match operation.operator.as_str() {
                "q" => stack.push(state.clone()),
                "Q" => {
                    if let Some(saved) = stack.pop() {
                        state = saved;
                    }
                }
                "cm" => {
                    state.ctm = state.ctm
                        * affine(
                            operand(operands, 0),
                            operand(operands, 1),
                            operand(operands, 2),
                            operand(operands, 3),
                            operand(operands, 4),
                            operand(operands, 5),
                        );
                }
                "BT" => {
                    text_matrix = glm::Mat3::identity();
                    line_matrix = glm::Mat3::identity();
                }
                "Tf" => {
                    if let Some(Object::Name(name)) = operands.first() {
                        state.text.font = self.font(resources, name);
                    }
                    state.text.font_size = operand(operands, 1);
                }
                "Tc" => state.text.character_spacing = operand(operands, 0),
                "Tw" => state.text.word_spacing = operand(operands, 0),
                "Tz" => state.text.horizontal_scaling = operand(operands, 0) / 100.0,
                "TL" => state.text.leading = operand(operands, 0),
                "Ts" => state.text.rise = operand(operands, 0),
                "Td" | "TD" => {
                    let (x, y) = (operand(operands, 0), operand(operands, 1));
                    if operation.operator == "TD" {
                        state.text.leading = -y;
                    }
                    line_matrix *= translation(x, y);
                    text_matrix = line_matrix;
                }
                "Tm" => {
                    line_matrix = affine(
                        operand(operands, 0),
                        operand(operands, 1),
                        operand(operands, 2),
                        operand(operands, 3),
                        operand(operands, 4),
                        operand(operands, 5),
                    );
                    text_matrix = line_matrix;
                }
                "T*" => {
                    line_matrix *= translation(0.0, -state.text.leading);
                    text_matrix = line_matrix;
                }
                "Tj" => {
                    if let Some(Object::String(bytes, _)) = operands.first() {
                        self.show(&state, &mut text_matrix, bytes);
                    }
                }
                "'" | "\"" => {
                    if operation.operator == "\"" {
                        state.text.word_spacing = operand(operands, 0);
                        state.text.character_spacing = operand(operands, 1);
                    }
                    line_matrix *= translation(0.0, -state.text.leading);
                    text_matrix = line_matrix;
                    if let Some(Object::String(bytes, _)) = operands.last() {
                        self.show(&state, &mut text_matrix, bytes);
                    }
                }
                "TJ" => {
                    if let Some(Object::Array(elements)) = operands.first() {
                        for element in elements {
                            match element {
                                Object::String(bytes, _) => {
                                    self.show(&state, &mut text_matrix, bytes)
                                }
                                other => {
                                    let adjustment = number(other).unwrap_or(0.0) as f32;
                                    let advance = -adjustment / 1000.0
                                        * state.text.font_size
                                        * state.text.horizontal_scaling;
                                    text_matrix *= translation(advance, 0.0);
                                }
                            }
                        }
                    }
                }
                "Do" => {
                    if let Some(Object::Name(name)) = operands.first() {
                        self.draw_form(resources, name, state.ctm, depth);
                    }
                }
                _ => {}
            }
        }
    }

    /// Resolves a font resource, caching decoders of indirect fonts.
    fn font(&mut self, resources: Option<&'a Dictionary>, name: &[u8]) -> Rc<FontDecoder> {
        let document = self.document;
        let Some(fonts) = resources.and_then(|resources| lookup_dictionary(document, resources, b"Font"))
        else {
            log::debug!("No font resources to resolve {:?}", String::from_utf8_lossy(name));
            return Rc::new(FontDecoder::fallback());
        };

        match fonts.get(name) {
            Ok(Object::Reference(id)) => {
                if let Some(decoder) = self.fonts.get(id) {
                    return decoder.clone();
                }
                let decoder = match resolve(document, &Object::Reference(*id)) {
                    Object::Dictionary(font) => FontDecoder::from_dictionary(document, font),
                    _ => FontDecoder::fallback(),
                };
                let decoder = Rc::new(decoder);
                self.fonts.insert(*id, decoder.clone());
                decoder
            }
            Ok(Object::Dictionary(font)) => Rc::new(FontDecoder::from_dictionary(document, font)),
            _ => {
                log::debug!("Unknown font resource {:?}", String::from_utf8_lossy(name));
                Rc::new(FontDecoder::fallback())
            }
        }
    }

    /// Positions every glyph of a shown string and advances the text matrix past it.
    fn show(&mut self, state: &GraphicsState, text_matrix: &mut glm::Mat3, bytes: &[u8]) {
        let text = &state.text;
        let font = text.font.clone();
        let scaling = text.font_size * text.horizontal_scaling;
        let parameters = affine(scaling, 0.0, 0.0, text.font_size, 0.0, text.rise);
        let (descent, ascent) = (font.descent as f32 / 1000.0, font.ascent as f32 / 1000.0);

        for code in font.decode(bytes) {
            let glyph_width = code.width as f32 / 1000.0;
            let rendering = state.ctm * *text_matrix * parameters;

            if !code.text.is_empty() {
                let corners = [
                    (0.0, descent),
                    (glyph_width, descent),
                    (0.0, ascent),
                    (glyph_width, ascent),
                ]
                .map(|(x, y)| rendering * glm::vec3(x, y, 1.0));
                let xs = corners.map(|corner| corner.x as f64);
                let ys = corners.map(|corner| corner.y as f64);
                self.glyphs.push(Glyph {
                    text: code.text,
                    bounds: Rectangle::new(
                        xs.iter().copied().fold(f64::INFINITY, f64::min),
                        ys.iter().copied().fold(f64::INFINITY, f64::min),
                        xs.iter().copied().fold(f64::NEG_INFINITY, f64::max),
                        ys.iter().copied().fold(f64::NEG_INFINITY, f64::max),
                    ),
                });
            }

            let word_spacing = if code.is_word_space {
                text.word_spacing
            } else {
                0.0
            };
            let advance = (glyph_width * text.font_size + text.character_spacing + word_spacing)
                * text.horizontal_scaling;
            *text_matrix *= translation(advance, 0.0);
        }
    }

    /// Interprets a form XObject in place, in its own resources when it declares them.
    fn draw_form(
        &mut self,
        resources: Option<&'a Dictionary>,
        name: &[u8],
        ctm: glm::Mat3,
        depth: usize,
    ) {
        if depth >= MAXIMUM_FORM_DEPTH {
            log::warn!("Form XObjects nest deeper than {}, skipping", MAXIMUM_FORM_DEPTH);
            return;
        }
        let document = self.document;
        let Some(Object::Stream(form)) = resources
            .and_then(|resources| lookup_dictionary(document, resources, b"XObject"))
            .and_then(|xobjects| lookup(document, xobjects, name))
        else {
            return;
        };
        if !matches!(lookup(document, &form.dict, b"Subtype"), Some(Object::Name(subtype)) if subtype == b"Form")
        {
            return;
        }

        let matrix = match lookup(document, &form.dict, b"Matrix") {
            Some(Object::Array(values)) if values.len() == 6 => {
                let value = |index: usize| number(resolve(document, &values[index])).unwrap_or(0.0) as f32;
                affine(value(0), value(1), value(2), value(3), value(4), value(5))
            }
            _ => glm::Mat3::identity(),
        };
        let form_resources = lookup_dictionary(document, &form.dict, b"Resources").or(resources);

        let content = form
            .decompressed_content()
            .unwrap_or_else(|_| form.content.clone());
        match Content::decode(&content) {
            Ok(content) => self.run(&content.operations, form_resources, ctm * matrix, depth + 1),
            Err(error) => log::warn!(
                "Failed to decode the form XObject {:?}: {}",
                String::from_utf8_lossy(name),
                error
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use lopdf::dictionary;

    use super::*;

    fn glyph(text: &str, x0: f64, y0: f64, x1: f64, y1: f64) -> Glyph {
        Glyph {
            text: text.to_string(),
            bounds: Rectangle::new(x0, y0, x1, y1),
        }
    }

    fn integers(values: &[i64]) -> Vec<Object> {
        values.iter().copied().map(Object::Integer).collect()
    }

    fn page(glyphs: Vec<Glyph>) -> PageText {
        PageText {
            media_box: Rectangle::new(0.0, 0.0, 595.0, 842.0),
            glyphs,
        }
    }

    #[test]
    fn glyphs_are_read_top_to_bottom_and_left_to_right() {
        let page = page(vec![
            glyph("d", 30.0, 80.0, 35.0, 90.0),
            glyph("c", 10.0, 80.0, 15.0, 90.0),
            glyph("b", 16.0, 100.0, 21.0, 110.0),
            glyph("a", 10.0, 100.0, 15.0, 110.0),
        ]);

        assert_eq!(page.text_in(&Rectangle::new(0.0, 0.0, 100.0, 200.0)), "ab c d");
        assert_eq!(page.text_in(&Rectangle::new(0.0, 95.0, 100.0, 200.0)), "ab");
        assert_eq!(page.text_in(&Rectangle::new(200.0, 0.0, 300.0, 200.0)), "");
    }

    #[test]
    fn a_glyph_belongs_to_the_box_containing_its_centre() {
        let page = page(vec![glyph("x", 10.0, 10.0, 20.0, 20.0)]);

        assert_eq!(page.text_in(&Rectangle::new(0.0, 0.0, 15.0, 15.0)), "x");
        assert_eq!(page.text_in(&Rectangle::new(0.0, 0.0, 14.0, 14.0)), "");
    }

    #[test]
    fn whitespace_is_collapsed() {
        assert_eq!(collapse_whitespace("  EIKE \n\t BERENS  "), "EIKE BERENS");
    }

    #[test]
    fn text_operators_position_glyphs_in_user_space() {
        let mut document = Document::with_version("1.5");
        let font = document.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Helvetica",
            "Encoding" => "WinAnsiEncoding",
        });
        let content = Content {
            operations: vec![
                Operation::new("q", vec![]),
                Operation::new("cm", integers(&[1, 0, 0, 1, 0, 100])),
                Operation::new("BT", vec![]),
                Operation::new("Tf", vec!["F1".into(), Object::Integer(10)]),
                Operation::new("Td", integers(&[50, 600])),
                Operation::new("Tj", vec![Object::string_literal("Hi")]),
                Operation::new("ET", vec![]),
                Operation::new("Q", vec![]),
            ],
        };
        let content_id = document.add_object(lopdf::Stream::new(
            dictionary! {},
            content.encode().unwrap(),
        ));
        let page_id = document.add_object(dictionary! {
            "Type" => "Page",
            "MediaBox" => integers(&[0, 0, 595, 842]),
            "Contents" => content_id,
            "Resources" => dictionary! { "Font" => dictionary! { "F1" => font } },
        });

        let page = PageText::read(&document, page_id);

        assert_eq!(page.media_box, Rectangle::new(0.0, 0.0, 595.0, 842.0));
        assert_eq!(page.glyphs.len(), 2);
        let first = &page.glyphs[0].bounds;
        assert!((first.x0 - 50.0).abs() < 1e-3);
        assert!((first.y0 - 697.5).abs() < 1e-3);
        assert!((first.y1 - 707.5).abs() < 1e-3);
        assert!((page.glyphs[1].bounds.x0 - 57.22).abs() < 1e-3);
        assert_eq!(page.text_in(&Rectangle::new(40.0, 690.0, 100.0, 720.0)), "Hi");
    }
}
