//! Metrics and encoding of the standard Helvetica font under `WinAnsiEncoding`.

use unicode_normalization::UnicodeNormalization as _;

/// The advance widths of Helvetica for the printable ASCII range `' '..='~'`, in thousandths of an em.
const HELVETICA_WIDTHS: [u16; 95] = [
    278, 278, 355, 556, 556, 889, 667, 191, 333, 333, 389, 584, 278, 333, 278, 278, // ' '..'/'
    556, 556, 556, 556, 556, 556, 556, 556, 556, 556, // '0'..'9'
    278, 278, 584, 584, 584, 556, 1015, // ':'..'@'
    667, 667, 722, 722, 667, 611, 778, 722, 278, 500, 667, 556, 833, // 'A'..'M'
    722, 778, 667, 778, 722, 667, 611, 722, 667, 944, 667, 667, 611, // 'N'..'Z'
    278, 278, 278, 469, 556, 333, // '['..'`'
    556, 556, 500, 556, 556, 278, 556, 556, 222, 222, 500, 222, 833, // 'a'..'m'
    556, 556, 556, 556, 333, 500, 278, 556, 500, 722, 500, 500, 500, // 'n'..'z'
    334, 260, 334, 584, // '{'..'~'
];

/// The characters `WinAnsiEncoding` places in `0x80..=0x9F`, where it departs from Latin-1.
const WIN_ANSI_HIGH: [Option<char>; 32] = [
    Some('\u{20AC}'),
    None,
    Some('\u{201A}'),
    Some('\u{0192}'),
    Some('\u{201E}'),
    Some('\u{2026}'),
    Some('\u{2020}'),
    Some('\u{2021}'),
    Some('\u{02C6}'),
    Some('\u{2030}'),
    Some('\u{0160}'),
    Some('\u{2039}'),
    Some('\u{0152}'),
    None,
    Some('\u{017D}'),
    None,
    None,
    Some('\u{2018}'),
    Some('\u{2019}'),
    Some('\u{201C}'),
    Some('\u{201D}'),
    Some('\u{2022}'),
    Some('\u{2013}'),
    Some('\u{2014}'),
    Some('\u{02DC}'),
    Some('\u{2122}'),
    Some('\u{0161}'),
    Some('\u{203A}'),
    Some('\u{0153}'),
    None,
    Some('\u{017E}'),
    Some('\u{0178}'),
];

/// The first and last codes the fill engine declares widths for.
pub const FIRST_CHAR: u8 = 32;
pub const LAST_CHAR: u8 = 255;

/// Decodes one `WinAnsiEncoding` code into its character.
pub fn win_ansi_decode(code: u8) -> Option<char> {
    match code {
        0x80..=0x9F => WIN_ANSI_HIGH[(code - 0x80) as usize],
        0x20..=0x7E | 0xA0..=0xFF => Some(code as char),
        b'\t' | b'\n' | b'\r' => Some(code as char),
        _ => None,
    }
}

/// Encodes one character into `WinAnsiEncoding`, if the encoding has it.
pub fn win_ansi_encode(character: char) -> Option<u8> {
    match character as u32 {
        0x20..=0x7E | 0xA0..=0xFF => Some(character as u8),
        _ => WIN_ANSI_HIGH
            .iter()
            .position(|candidate| *candidate == Some(character))
            .map(|index| 0x80 + index as u8),
    }
}

/// The Helvetica advance width of a character. Accented letters take the width of their base letter.
pub fn helvetica_width(character: char) -> u16 {
    if let Some(width) = ascii_width(character) {
        return width;
    }
    character
        .nfd()
        .next()
        .and_then(ascii_width)
        .unwrap_or(556)
}

fn ascii_width(character: char) -> Option<u16> {
    match character {
        ' '..='~' => Some(HELVETICA_WIDTHS[character as usize - 32]),
        _ => None,
    }
}

/// The widths of every code from `FIRST_CHAR` to `LAST_CHAR`, as embedded in the font dictionary.
pub fn win_ansi_widths() -> Vec<u16> {
    (FIRST_CHAR..=LAST_CHAR)
        .map(|code| win_ansi_decode(code).map(helvetica_width).unwrap_or(0))
        .collect()
}

/// Encodes the text, dropping the characters the encoding lacks.
pub fn encode_text(text: &str) -> Vec<u8> {
    text.nfc()
        .filter_map(|character| {
            let code = win_ansi_encode(character);
            if code.is_none() {
                log::debug!("Unable to encode the character {:?} in WinAnsi", character);
            }
            code
        })
        .collect()
}

/// The distinct characters of the text the encoding lacks, in order of appearance.
/// Whitespace is left out, line breaking consumes it.
pub fn unencodable_characters(text: &str) -> String {
    let mut characters = String::new();
    for character in text.nfc() {
        if !character.is_whitespace()
            && win_ansi_encode(character).is_none()
            && !characters.contains(character)
        {
            characters.push(character);
        }
    }

    characters
}

/// The width of the text once drawn in Helvetica at the given size, in points.
pub fn text_width(text: &str, font_size: f64) -> f64 {
    let thousandths: u32 = text
        .nfc()
        .filter(|character| win_ansi_encode(*character).is_some())
        .map(|character| helvetica_width(character) as u32)
        .sum();

    thousandths as f64 * font_size / 1000.0
}

/// Breaks the text into lines no wider than `maximum_width`. Words wider than a line on their own
/// are split between characters. Explicit newlines are kept.
pub fn wrap_text(text: &str, maximum_width: f64, font_size: f64) -> Vec<String> {
    let mut lines = Vec::new();
    for paragraph in text.lines() {
        let mut line = String::new();
        for word in paragraph.split_whitespace() {
            let candidate = if line.is_empty() {
                word.to_string()
            } else {
                format!("{line} {word}")
            };
            if text_width(&candidate, font_size) <= maximum_width {
                line = candidate;
                continue;
            }
            if !line.is_empty() {
                lines.push(std::mem::take(&mut line));
            }
            // The word alone may still be too wide
            for character in word.chars() {
                line.push(character);
                if text_width(&line, font_size) > maximum_width && line.chars().count() > 1 {
                    line.pop();
                    lines.push(std::mem::take(&mut line));
                    line.push(character);
                }
            }
        }
        if !line.is_empty() {
            lines.push(line);
        }
    }

    lines
}

/// Maps a PostScript glyph name, as found in an encoding's `Differences`, to its character.
pub fn glyph_name_to_char(name: &str) -> Option<char> {
    let mut characters = name.chars();
    if let (Some(character), None) = (characters.next(), characters.next()) {
        return Some(character);
    }
    if let Some(hexadecimal) = name.strip_prefix("uni") {
        return u32::from_str_radix(hexadecimal.get(..4)?, 16)
            .ok()
            .and_then(char::from_u32);
    }
    let character = match name {
        "space" | "nbspace" => ' ',
        "exclam" => '!',
        "quotedbl" => '"',
        "numbersign" => '#',
        "dollar" => '$',
        "percent" => '%',
        "ampersand" => '&',
        "quotesingle" => '\'',
        "parenleft" => '(',
        "parenright" => ')',
        "asterisk" => '*',
        "plus" => '+',
        "comma" => ',',
        "hyphen" | "minus" => '-',
        "period" => '.',
        "slash" => '/',
        "zero" => '0',
        "one" => '1',
        "two" => '2',
        "three" => '3',
        "four" => '4',
        "five" => '5',
        "six" => '6',
        "seven" => '7',
        "eight" => '8',
        "nine" => '9',
        "colon" => ':',
        "semicolon" => ';',
        "less" => '<',
        "equal" => '=',
        "greater" => '>',
        "question" => '?',
        "at" => '@',
        "bracketleft" => '[',
        "backslash" => '\\',
        "bracketright" => ']',
        "underscore" => '_',
        "braceleft" => '{',
        "bar" => '|',
        "braceright" => '}',
        "asciitilde" => '~',
        "Adieresis" => 'Ä',
        "Odieresis" => 'Ö',
        "Udieresis" => 'Ü',
        "adieresis" => 'ä',
        "odieresis" => 'ö',
        "udieresis" => 'ü',
        "germandbls" => 'ß',
        "Eacute" => 'É',
        "eacute" => 'é',
        "egrave" => 'è',
        "agrave" => 'à',
        "ccedilla" => 'ç',
        "degree" => '°',
        "section" => '§',
        "copyright" => '©',
        "registered" => '®',
        "periodcentered" => '·',
        "Euro" | "euro" => '€',
        "endash" => '–',
        "emdash" => '—',
        "quoteleft" => '‘',
        "quoteright" => '’',
        "quotedblleft" => '“',
        "quotedblright" => '”',
        "bullet" => '•',
        "ellipsis" => '…',
        _ => return None,
    };

    Some(character)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn win_ansi_round_trips_its_repertoire() {
        for code in FIRST_CHAR..=LAST_CHAR {
            if let Some(character) = win_ansi_decode(code) {
                assert_eq!(win_ansi_encode(character), Some(code));
            }
        }
        assert_eq!(win_ansi_encode('€'), Some(0x80));
        assert_eq!(win_ansi_encode('ü'), Some(0xFC));
        assert_eq!(win_ansi_encode('漢'), None);
    }

    #[test]
    fn widths_follow_the_helvetica_metrics() {
        assert_eq!(helvetica_width('W'), 944);
        assert_eq!(helvetica_width('i'), 222);
        assert_eq!(helvetica_width('Ü'), helvetica_width('U'));
        assert!((text_width("EIKE", 10.0) - 22.79).abs() < 1e-9);
    }

    #[test]
    fn wrapping_respects_the_box_width() {
        let lines = wrap_text("the quick brown fox jumps over the lazy dog", 60.0, 10.0);

        assert!(lines.len() > 1);
        assert!(lines.iter().all(|line| text_width(line, 10.0) <= 60.0));
        assert_eq!(
            lines.join(" "),
            "the quick brown fox jumps over the lazy dog"
        );
    }

    #[test]
    fn overlong_words_are_split() {
        let lines = wrap_text("WWWWWWWWWW", 20.0, 10.0);

        assert_eq!(lines, vec!["WW", "WW", "WW", "WW", "WW"]);
    }

    #[test]
    fn glyph_names_are_resolved() {
        assert_eq!(glyph_name_to_char("A"), Some('A'));
        assert_eq!(glyph_name_to_char("adieresis"), Some('ä'));
        assert_eq!(glyph_name_to_char("uni20AC"), Some('€'));
        assert_eq!(glyph_name_to_char("g123"), None);
    }

    #[test]
    fn characters_outside_win_ansi_are_listed_once() {
        assert_eq!(unencodable_characters("Müller, Dvořák"), "ř");
        assert_eq!(unencodable_characters("Łukasz Łódź"), "Łź");
        assert_eq!(unencodable_characters("Eike\tBerens\n"), "");
    }
}
