use std::collections::HashMap;
use std::ops::RangeInclusive;

/// The most codes a single range of a character map or of a width array may expand to.
pub(crate) const MAXIMUM_RANGE_LENGTH: u32 = 10_000;

/// The codes of `low..=high`, cut to `MAXIMUM_RANGE_LENGTH` codes. An inverted range is empty.
pub(crate) fn bounded_range(low: u32, high: u32) -> RangeInclusive<u32> {
    if high.saturating_sub(low) >= MAXIMUM_RANGE_LENGTH {
        log::warn!(
            "The code range <{:X}> <{:X}> is truncated to its first {} codes",
            low,
            high,
            MAXIMUM_RANGE_LENGTH
        );
        return low..=low + (MAXIMUM_RANGE_LENGTH - 1);
    }

    low..=high
}

/// A parsed `ToUnicode` character map: the byte length of the codes and their Unicode text.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToUnicodeMap {
    /// The byte length declared by the code space ranges, if any were declared.
    pub code_length: Option<usize>,
    mappings: HashMap<u32, String>,
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Hexadecimal(Vec<u8>),
    ArrayStart,
    ArrayEnd,
    Keyword(String),
}

impl ToUnicodeMap {
    /// Parses the decompressed content of a `ToUnicode` stream. Unknown sections are ignored,
    /// so that a partially understood map still yields the mappings it does declare.
    pub fn parse(content: &[u8]) -> ToUnicodeMap {
        let tokens = tokenize(content);
        let mut map = ToUnicodeMap::default();

        let mut index = 0;
        while index < tokens.len() {
            match &tokens[index] {
                Token::Keyword(keyword) if keyword == "begincodespacerange" => {
                    index += 1;
                    while let (Some(Token::Hexadecimal(low)), Some(Token::Hexadecimal(_))) =
                        (tokens.get(index), tokens.get(index + 1))
                    {
                        map.code_length = Some(map.code_length.unwrap_or(0).max(low.len()));
                        index += 2;
                    }
                }
                Token::Keyword(keyword) if keyword == "beginbfchar" => {
                    index += 1;
                    while let (Some(Token::Hexadecimal(source)), Some(Token::Hexadecimal(target))) =
                        (tokens.get(index), tokens.get(index + 1))
                    {
                        map.mappings.insert(code_value(source), utf16_text(target));
                        index += 2;
                    }
                }
                Token::Keyword(keyword) if keyword == "beginbfrange" => {
                    index += 1;
                    index = map.parse_ranges(&tokens, index);
                }
                _ => index += 1,
            }
        }

        map
    }

    fn parse_ranges(&mut self, tokens: &[Token], mut index: usize) -> usize {
        loop {
            let (Some(Token::Hexadecimal(low)), Some(Token::Hexadecimal(high))) =
                (tokens.get(index), tokens.get(index + 1))
            else {
                return index;
            };
            let (low, high) = (code_value(low), code_value(high));
            index += 2;

            match tokens.get(index) {
                // <low> <high> <target>: consecutive codes map to consecutive characters
                Some(Token::Hexadecimal(target)) => {
                    let units = utf16_units(target);
                    for (offset, code) in bounded_range(low, high).enumerate() {
                        let mut units = units.clone();
                        if let Some(last) = units.last_mut() {
                            *last = last.wrapping_add(offset as u16);
                        }
                        self.mappings
                            .insert(code, String::from_utf16_lossy(&units));
                    }
                    index += 1;
                }
                // <low> <high> [<target> ...]: one target per code
                Some(Token::ArrayStart) => {
                    index += 1;
                    let mut code = Some(low);
                    while let Some(Token::Hexadecimal(target)) = tokens.get(index) {
                        if let Some(current) = code.filter(|current| *current <= high) {
                            self.mappings.insert(current, utf16_text(target));
                        }
                        code = code.and_then(|current| current.checked_add(1));
                        index += 1;
                    }
                    if tokens.get(index) == Some(&Token::ArrayEnd) {
                        index += 1;
                    }
                }
                _ => return index,
            }
        }
    }

    /// The text of a character code, if the map declares it.
    pub fn get(&self, code: u32) -> Option<&str> {
        self.mappings.get(&code).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.mappings.is_empty()
    }
}

fn code_value(bytes: &[u8]) -> u32 {
    bytes
        .iter()
        .take(4)
        .fold(0, |value, byte| (value << 8) | *byte as u32)
}

fn utf16_units(bytes: &[u8]) -> Vec<u16> {
    bytes
        .chunks(2)
        .map(|pair| match pair {
            [high, low] => u16::from_be_bytes([*high, *low]),
            [single] => *single as u16,
            _ => 0,
        })
        .collect()
}

fn utf16_text(bytes: &[u8]) -> String {
    String::from_utf16_lossy(&utf16_units(bytes))
}

fn tokenize(content: &[u8]) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut index = 0;
    while index < content.len() {
        match content[index] {
            b'<' if content.get(index + 1) == Some(&b'<') => index += 2,
            b'>' if content.get(index + 1) == Some(&b'>') => index += 2,
            b'<' => {
                let end = content[index..]
                    .iter()
                    .position(|byte| *byte == b'>')
                    .map(|position| index + position)
                    .unwrap_or(content.len());
                tokens.push(Token::Hexadecimal(hexadecimal_bytes(&content[index + 1..end])));
                index = end + 1;
            }
            b'[' => {
                tokens.push(Token::ArrayStart);
                index += 1;
            }
            b']' => {
                tokens.push(Token::ArrayEnd);
                index += 1;
            }
            b'%' => {
                while index < content.len() && content[index] != b'\n' && content[index] != b'\r' {
                    index += 1;
                }
            }
            byte if byte.is_ascii_alphabetic() => {
                let start = index;
                while index < content.len() && content[index].is_ascii_alphanumeric() {
                    index += 1;
                }
                tokens.push(Token::Keyword(
                    String::from_utf8_lossy(&content[start..index]).into_owned(),
                ));
            }
            _ => index += 1,
        }
    }

    tokens
}

fn hexadecimal_bytes(digits: &[u8]) -> Vec<u8> {
    let nibbles: Vec<u8> = digits
        .iter()
        .filter_map(|digit| (*digit as char).to_digit(16).map(|value| value as u8))
        .collect();

    nibbles
        .chunks(2)
        .map(|pair| match pair {
            [high, low] => (high << 4) | low,
            [high] => high << 4,
            _ => 0,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const CMAP: &str = "/CIDInit /ProcSet findresource begin
12 dict begin
begincmap
/CMapName /Adobe-Identity-UCS def
1 begincodespacerange
<0000> <FFFF>
endcodespacerange
2 beginbfchar
<0003> <0020>
<0024> <0041>
endbfchar
2 beginbfrange
<0044> <0046> <0061>
<0050> <0052> [<00DC> <00E4> <D83DDE00>]
endbfrange
endcmap
CMapName currentdict /CMap defineresource pop
end
end";

    #[test]
    fn code_space_sets_the_code_length() {
        let map = ToUnicodeMap::parse(CMAP.as_bytes());

        assert_eq!(map.code_length, Some(2));
    }

    #[test]
    fn single_characters_are_mapped() {
        let map = ToUnicodeMap::parse(CMAP.as_bytes());

        assert_eq!(map.get(0x0003), Some(" "));
        assert_eq!(map.get(0x0024), Some("A"));
        assert_eq!(map.get(0x0025), None);
    }

    #[test]
    fn both_range_forms_are_mapped() {
        let map = ToUnicodeMap::parse(CMAP.as_bytes());

        assert_eq!(map.get(0x0044), Some("a"));
        assert_eq!(map.get(0x0046), Some("c"));
        assert_eq!(map.get(0x0047), None);
        assert_eq!(map.get(0x0050), Some("Ü"));
        assert_eq!(map.get(0x0051), Some("ä"));
        assert_eq!(map.get(0x0052), Some("😀"));
    }

    #[test]
    fn ranges_ending_at_the_last_code_stop_there() {
        let map = ToUnicodeMap::parse(
            b"beginbfrange <FFFFFFFF> <FFFFFFFF> [<0041> <0042>] <FFFFFFF0> <FFFFFFFE> <0041> endbfrange",
        );

        assert_eq!(map.get(u32::MAX), Some("A"));
        assert_eq!(map.get(0xFFFF_FFF0), Some("A"));
        assert_eq!(map.get(0xFFFF_FFFE), Some("O"));
    }

    #[test]
    fn oversized_ranges_are_truncated() {
        let map = ToUnicodeMap::parse(b"beginbfrange <000000> <FFFFFF> <0041> endbfrange");

        assert_eq!(map.get(0), Some("A"));
        assert!(map.get(MAXIMUM_RANGE_LENGTH - 1).is_some());
        assert_eq!(map.get(MAXIMUM_RANGE_LENGTH), None);
        assert_eq!(map.get(0xFF_FFFF), None);
    }

    #[test]
    fn inverted_ranges_are_empty() {
        assert_eq!(bounded_range(10, 2).count(), 0);
        assert_eq!(bounded_range(u32::MAX, u32::MAX).count(), 1);
    }

    #[test]
    fn garbage_yields_an_empty_map() {
        let map = ToUnicodeMap::parse(b"not a cmap at all <zz");

        assert!(map.is_empty());
        assert_eq!(map.code_length, None);
    }
}
