use std::collections::HashMap;

use lopdf::{Dictionary, Document, Object};

use crate::cmap::{bounded_range, ToUnicodeMap};
use crate::standard_font::{glyph_name_to_char, helvetica_width, win_ansi_decode};

/// Ascent and descent assumed when a font carries no descriptor, in thousandths of an em.
const DEFAULT_ASCENT: f64 = 750.0;
const DEFAULT_DESCENT: f64 = -250.0;

/// Follows references until a direct object is reached.
pub(crate) fn resolve<'a>(document: &'a Document, mut object: &'a Object) -> &'a Object {
    // Bounded so that a reference cycle cannot hang the interpreter
    for _ in 0..32 {
        match object {
            Object::Reference(id) => match document.get_object(*id) {
                Ok(target) => object = target,
                Err(_) => return &Object::Null,
            },
            _ => return object,
        }
    }

    &Object::Null
}

/// Looks a key up in a dictionary and resolves the value.
pub(crate) fn lookup<'a>(
    document: &'a Document,
    dictionary: &'a Dictionary,
    key: &[u8],
) -> Option<&'a Object> {
    dictionary
        .get(key)
        .ok()
        .map(|object| resolve(document, object))
}

pub(crate) fn lookup_dictionary<'a>(
    document: &'a Document,
    dictionary: &'a Dictionary,
    key: &[u8],
) -> Option<&'a Dictionary> {
    match lookup(document, dictionary, key)? {
        Object::Dictionary(dictionary) => Some(dictionary),
        Object::Stream(stream) => Some(&stream.dict),
        _ => None,
    }
}

/// Reads an integer or a real as a float.
pub(crate) fn number(object: &Object) -> Option<f64> {
    match object {
        Object::Integer(value) => Some(*value as f64),
        Object::Real(value) => Some(*value as f64),
        _ => None,
    }
}

#[derive(Debug, Clone)]
enum Widths {
    /// `FirstChar` and its `Widths` array.
    Simple { first_char: u32, widths: Vec<f64> },
    /// The `W` array of a descendant CID font, flattened.
    Composite(HashMap<u32, f64>),
    /// A standard font without explicit metrics.
    Helvetica,
}

/// Everything the text layer needs to turn the bytes of a shown string into positioned glyphs.
#[derive(Debug, Clone)]
pub struct FontDecoder {
    to_unicode: Option<ToUnicodeMap>,
    differences: HashMap<u32, char>,
    composite: bool,
    widths: Widths,
    default_width: f64,
    pub ascent: f64,
    pub descent: f64,
}

/// One character code of a shown string.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedCode {
    pub code: u32,
    /// The Unicode text of the code, empty when it cannot be determined.
    pub text: String,
    /// The advance width in thousandths of text space units.
    pub width: f64,
    /// Whether this is the single-byte code 32, which word spacing applies to.
    pub is_word_space: bool,
}

impl FontDecoder {
    /// Builds the decoder of a font dictionary. Missing or malformed entries fall back to
    /// the standard Helvetica metrics and WinAnsi encoding.
    pub fn from_dictionary(document: &Document, font: &Dictionary) -> FontDecoder {
        let composite = matches!(
            lookup(document, font, b"Subtype"),
            Some(Object::Name(subtype)) if subtype == b"Type0"
        );

        let to_unicode = match lookup(document, font, b"ToUnicode") {
            Some(Object::Stream(stream)) => {
                let content = stream
                    .decompressed_content()
                    .unwrap_or_else(|_| stream.content.clone());
                Some(ToUnicodeMap::parse(&content)).filter(|map| !map.is_empty())
            }
            _ => None,
        };

        let differences = match lookup_dictionary(document, font, b"Encoding") {
            Some(encoding) => parse_differences(document, encoding),
            None => HashMap::new(),
        };

        let descendant = if composite {
            match lookup(document, font, b"DescendantFonts") {
                Some(Object::Array(descendants)) => descendants
                    .first()
                    .map(|descendant| resolve(document, descendant))
                    .and_then(|descendant| descendant.as_dict().ok()),
                _ => None,
            }
        } else {
            None
        };

        let (widths, default_width) = match descendant {
            Some(descendant) => (
                Widths::Composite(parse_cid_widths(document, descendant)),
                lookup(document, descendant, b"DW")
                    .and_then(number)
                    .unwrap_or(1000.0),
            ),
            None => simple_widths(document, font),
        };

        let descriptor = lookup_dictionary(document, descendant.unwrap_or(font), b"FontDescriptor");
        let metric = |key: &[u8]| {
            descriptor
                .and_then(|descriptor| lookup(document, descriptor, key))
                .and_then(number)
                .filter(|value| *value != 0.0)
        };

        FontDecoder {
            to_unicode,
            differences,
            composite,
            widths,
            default_width,
            ascent: metric(b"Ascent").unwrap_or(DEFAULT_ASCENT),
            descent: metric(b"Descent").unwrap_or(DEFAULT_DESCENT),
        }
    }

    /// The decoder used when the font resource cannot be found at all.
    pub fn fallback() -> FontDecoder {
        FontDecoder {
            to_unicode: None,
            differences: HashMap::new(),
            composite: false,
            widths: Widths::Helvetica,
            default_width: 556.0,
            ascent: DEFAULT_ASCENT,
            descent: DEFAULT_DESCENT,
        }
    }

    fn code_length(&self) -> usize {
        match self.to_unicode.as_ref().and_then(|map| map.code_length) {
            Some(length) => length.clamp(1, 4),
            None if self.composite => 2,
            None => 1,
        }
    }

    /// Splits a shown string into its character codes.
    pub fn decode(&self, bytes: &[u8]) -> Vec<DecodedCode> {
        let code_length = self.code_length();
        bytes
            .chunks(code_length)
            .map(|chunk| {
                let code = chunk.iter().fold(0u32, |value, byte| (value << 8) | *byte as u32);
                DecodedCode {
                    code,
                    text: self.text_of(code),
                    width: self.width_of(code),
                    is_word_space: code_length == 1 && code == 32,
                }
            })
            .collect()
    }

    fn text_of(&self, code: u32) -> String {
        if let Some(text) = self.to_unicode.as_ref().and_then(|map| map.get(code)) {
            return text.to_string();
        }
        if self.composite {
            return String::new();
        }
        if let Some(character) = self.differences.get(&code) {
            return character.to_string();
        }
        u8::try_from(code)
            .ok()
            .and_then(win_ansi_decode)
            .map(String::from)
            .unwrap_or_default()
    }

    fn width_of(&self, code: u32) -> f64 {
        match &self.widths {
            Widths::Simple { first_char, widths } => code
                .checked_sub(*first_char)
                .and_then(|index| widths.get(index as usize))
                .copied()
                .unwrap_or(self.default_width),
            Widths::Composite(widths) => widths.get(&code).copied().unwrap_or(self.default_width),
            Widths::Helvetica => {
                let character = self
                    .differences
                    .get(&code)
                    .copied()
                    .or_else(|| u8::try_from(code).ok().and_then(win_ansi_decode));
                character
                    .map(|character| helvetica_width(character) as f64)
                    .unwrap_or(self.default_width)
            }
        }
    }
}

fn simple_widths(document: &Document, font: &Dictionary) -> (Widths, f64) {
    let missing_width = lookup_dictionary(document, font, b"FontDescriptor")
        .and_then(|descriptor| lookup(document, descriptor, b"MissingWidth"))
        .and_then(number);

    let first_char = lookup(document, font, b"FirstChar").and_then(number);
    let widths = match lookup(document, font, b"Widths") {
        Some(Object::Array(widths)) => Some(
            widths
                .iter()
                .map(|width| number(resolve(document, width)).unwrap_or(0.0))
                .collect::<Vec<_>>(),
        ),
        _ => None,
    };

    match (first_char, widths) {
        (Some(first_char), Some(widths)) if first_char >= 0.0 => (
            Widths::Simple {
                first_char: first_char as u32,
                widths,
            },
            missing_width.unwrap_or(0.0),
        ),
        _ => (Widths::Helvetica, missing_width.unwrap_or(556.0)),
    }
}

/// Reads `[code /name /name code /name ...]` into a code to character table.
fn parse_differences(document: &Document, encoding: &Dictionary) -> HashMap<u32, char> {
    let mut differences = HashMap::new();
    let Some(Object::Array(entries)) = lookup(document, encoding, b"Differences") else {
        return differences;
    };

    // None once the codes run past u32::MAX, until the next starting code
    let mut code = Some(0u32);
    for entry in entries {
        match resolve(document, entry) {
            Object::Integer(start) => code = u32::try_from((*start).max(0)).ok(),
            Object::Name(name) => {
                if let (Some(current), Some(character)) =
                    (code, glyph_name_to_char(&String::from_utf8_lossy(name)))
                {
                    differences.insert(current, character);
                }
                code = code.and_then(|current| current.checked_add(1));
            }
            _ => {}
        }
    }

    differences
}

/// Flattens a CID font `W` array, whose entries are either `c [w1 w2 ...]` or `c_first c_last w`.
fn parse_cid_widths(document: &Document, descendant: &Dictionary) -> HashMap<u32, f64> {
    let mut widths = HashMap::new();
    let Some(Object::Array(entries)) = lookup(document, descendant, b"W") else {
        return widths;
    };
    let entries: Vec<&Object> = entries.iter().map(|entry| resolve(document, entry)).collect();

    let mut index = 0;
    while index < entries.len() {
        let Some(first) = number(entries[index]) else {
            index += 1;
            continue;
        };
        match entries.get(index + 1) {
            Some(Object::Array(list)) => {
                // Codes past u32::MAX end the list
                for (code, width) in (first as u32..=u32::MAX).zip(list) {
                    if let Some(width) = number(resolve(document, width)) {
                        widths.insert(code, width);
                    }
                }
                index += 2;
            }
            Some(last) => {
                if let (Some(last), Some(width)) =
                    (number(last), entries.get(index + 2).and_then(|width| number(width)))
                {
                    for code in bounded_range(first as u32, last as u32) {
                        widths.insert(code, width);
                    }
                }
                index += 3;
            }
            None => break,
        }
    }

    widths
}

#[cfg(test)]
mod tests {
    use lopdf::{dictionary, Stream};

    use super::*;

    #[test]
    fn standard_fonts_decode_win_ansi_with_helvetica_metrics() {
        let document = Document::with_version("1.5");
        let font = dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Helvetica",
            "Encoding" => "WinAnsiEncoding",
        };

        let decoder = FontDecoder::from_dictionary(&document, &font);
        let codes = decoder.decode(b"A \xfc");

        assert_eq!(codes.len(), 3);
        assert_eq!(codes[0].text, "A");
        assert_eq!(codes[0].width, 667.0);
        assert!(codes[1].is_word_space);
        assert_eq!(codes[2].text, "ü");
        assert_eq!(decoder.ascent, 750.0);
    }

    #[test]
    fn explicit_widths_and_differences_take_precedence() {
        let document = Document::with_version("1.5");
        let font = dictionary! {
            "Subtype" => "Type1",
            "FirstChar" => 65,
            "Widths" => vec![Object::Integer(600), Object::Integer(610)],
            "Encoding" => dictionary! {
                "Differences" => vec![Object::Integer(66), Object::Name(b"Adieresis".to_vec())],
            },
        };

        let decoder = FontDecoder::from_dictionary(&document, &font);
        let codes = decoder.decode(b"AB");

        assert_eq!(codes[0].text, "A");
        assert_eq!(codes[0].width, 600.0);
        assert_eq!(codes[1].text, "Ä");
        assert_eq!(codes[1].width, 610.0);
    }

    #[test]
    fn composite_fonts_use_two_byte_codes_and_cid_widths() {
        let mut document = Document::with_version("1.5");
        let to_unicode = document.add_object(Stream::new(
            dictionary! {},
            b"1 begincodespacerange <0000> <FFFF> endcodespacerange
              1 beginbfchar <0024> <0045> endbfchar"
                .to_vec(),
        ));
        let font = dictionary! {
            "Subtype" => "Type0",
            "ToUnicode" => to_unicode,
            "DescendantFonts" => vec![Object::Dictionary(dictionary! {
                "Subtype" => "CIDFontType2",
                "DW" => 500,
                "W" => vec![
                    Object::Integer(36),
                    Object::Array(vec![Object::Integer(667)]),
                    Object::Integer(40),
                    Object::Integer(42),
                    Object::Integer(250),
                ],
            })],
        };

        let decoder = FontDecoder::from_dictionary(&document, &font);
        let codes = decoder.decode(&[0x00, 0x24, 0x00, 0x29, 0x00, 0x50]);

        assert_eq!(codes.len(), 3);
        assert_eq!(codes[0].text, "E");
        assert_eq!(codes[0].width, 667.0);
        assert_eq!(codes[1].width, 250.0);
        assert_eq!(codes[2].width, 500.0);
        assert_eq!(codes[2].text, "");
        assert!(!codes[0].is_word_space);
    }

    #[test]
    fn differences_past_the_last_code_are_dropped() {
        let document = Document::with_version("1.5");
        let font = dictionary! {
            "Subtype" => "Type1",
            "BaseFont" => "Helvetica",
            "Encoding" => dictionary! {
                "Differences" => vec![
                    Object::Integer(u32::MAX as i64),
                    Object::Name(b"A".to_vec()),
                    Object::Name(b"B".to_vec()),
                    Object::Integer(66),
                    Object::Name(b"Adieresis".to_vec()),
                ],
            },
        };

        let decoder = FontDecoder::from_dictionary(&document, &font);
        let codes = decoder.decode(b"AB");

        assert_eq!(codes[0].text, "A");
        assert_eq!(codes[1].text, "Ä");
        assert_eq!(decoder.text_of(u32::MAX), "A");
    }

    #[test]
    fn cid_width_ranges_are_bounded() {
        let document = Document::with_version("1.5");
        let font = dictionary! {
            "Subtype" => "Type0",
            "DescendantFonts" => vec![Object::Dictionary(dictionary! {
                "Subtype" => "CIDFontType2",
                "DW" => 1000,
                "W" => vec![
                    Object::Integer(0),
                    Object::Integer(30_000_000),
                    Object::Integer(500),
                    Object::Integer(u32::MAX as i64),
                    Object::Array(vec![Object::Integer(600), Object::Integer(700)]),
                ],
            })],
        };

        let decoder = FontDecoder::from_dictionary(&document, &font);
        let codes = decoder.decode(&[0x00, 0x00, 0x27, 0x0F, 0x27, 0x10]);

        assert_eq!(codes[0].width, 500.0);
        assert_eq!(codes[1].width, 500.0);
        assert_eq!(codes[2].width, 1000.0);
        assert_eq!(decoder.width_of(u32::MAX), 600.0);
    }
}
