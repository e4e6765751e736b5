//! Regex parsing.
//!
//! Parses a UTF-32 pattern into a flat sequence of chunks. The supported
//! subset is: literal words, character classes with ranges (`[a-z0-9]`), and
//! the multipliers `{n}`, `{min,max}` (either bound optional), `+`, `?`, `*`.
//! There is no alternation, grouping or anchoring; adjacent chunks
//! concatenate implicitly.
//!
//! Parsing is greedy and left-to-right. Any failure, including leftover
//! input, is reported as a `malformed regex` user error with a caret under
//! the offending column.

use crate::{text, Error, Result};

const L_BRACKET: u32 = '[' as u32;
const R_BRACKET: u32 = ']' as u32;
const L_BRACE: u32 = '{' as u32;
const R_BRACE: u32 = '}' as u32;
const PLUS: u32 = '+' as u32;
const STAR: u32 = '*' as u32;
const QUESTION: u32 = '?' as u32;
const DASH: u32 = '-' as u32;
const COMMA: u32 = ',' as u32;

/// An inclusive code point range. A bare class character is `(c, c)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CharacterRange {
    pub begin: u32,
    pub end: u32,
}

/// The matchable part of a chunk: a literal run or a character class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkContent {
    Word(Vec<u32>),
    Class(Vec<CharacterRange>),
}

/// Repetition count attached to a chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Multiplier {
    /// `{n}`
    Exact(u32),
    /// `{min,max}` with either bound optional
    Range { min: Option<u32>, max: Option<u32> },
    /// `+` ≙ `{1,}`
    Plus,
    /// `?` ≙ `{0,1}`
    Question,
    /// `*` ≙ `{0,}`
    Star,
}

/// One chunk: content plus an optional multiplier. No multiplier means
/// exactly one occurrence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub content: ChunkContent,
    pub multiplier: Option<Multiplier>,
}

/// A parsed regex: a non-empty chunk sequence.
pub type Regex = Vec<Chunk>;

/// Internal parse failures carry the zero-based offset of the failure point;
/// [`parse`] renders them into the user-facing message.
type PResult<T> = std::result::Result<T, usize>;

/// True for code points that stand for themselves. The brackets, braces,
/// multiplier signs and `-` are metacharacters; 0 and 0xFFFFFFFF are
/// reserved as sentinels.
fn is_character(c: u32) -> bool {
    !matches!(
        c,
        L_BRACKET | R_BRACKET | L_BRACE | R_BRACE | PLUS | STAR | QUESTION | DASH | 0 | u32::MAX
    )
}

/// Cursor over the UTF-32 input.
struct Cursor<'a> {
    input: &'a [u32],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(input: &'a [u32]) -> Self {
        Self { input, pos: 0 }
    }

    fn at_end(&self) -> bool {
        self.pos >= self.input.len()
    }

    fn peek(&self) -> Option<u32> {
        self.input.get(self.pos).copied()
    }

    /// chunkcontent := characterclass | word
    fn chunk_content(&mut self) -> PResult<ChunkContent> {
        if self.peek() == Some(L_BRACKET) {
            Ok(ChunkContent::Class(self.class()?))
        } else {
            Ok(ChunkContent::Word(self.word()?))
        }
    }

    /// word := character+
    fn word(&mut self) -> PResult<Vec<u32>> {
        let mut chars = Vec::new();
        while let Some(c) = self.peek() {
            if !is_character(c) {
                break;
            }
            chars.push(c);
            self.pos += 1;
        }
        if chars.is_empty() {
            return Err(self.pos);
        }
        Ok(chars)
    }

    /// characterclass := '[' (character_range | character)+ ']'
    fn class(&mut self) -> PResult<Vec<CharacterRange>> {
        self.pos += 1; // '['
        let mut items = Vec::new();
        loop {
            match self.peek() {
                Some(R_BRACKET) => break,
                Some(c) if is_character(c) => {
                    self.pos += 1;
                    if self.peek() == Some(DASH) {
                        self.pos += 1;
                        let end_pos = self.pos;
                        match self.peek() {
                            Some(e) if is_character(e) => {
                                self.pos += 1;
                                if e < c {
                                    return Err(end_pos);
                                }
                                items.push(CharacterRange { begin: c, end: e });
                            }
                            _ => return Err(end_pos),
                        }
                    } else {
                        items.push(CharacterRange { begin: c, end: c });
                    }
                }
                _ => return Err(self.pos),
            }
        }
        if items.is_empty() {
            return Err(self.pos);
        }
        self.pos += 1; // ']'
        Ok(items)
    }

    /// multiplier := mrange | mamount | '+' | '?' | '*'
    fn multiplier(&mut self) -> PResult<Option<Multiplier>> {
        match self.peek() {
            Some(PLUS) => {
                self.pos += 1;
                Ok(Some(Multiplier::Plus))
            }
            Some(QUESTION) => {
                self.pos += 1;
                Ok(Some(Multiplier::Question))
            }
            Some(STAR) => {
                self.pos += 1;
                Ok(Some(Multiplier::Star))
            }
            Some(L_BRACE) => {
                self.pos += 1;
                Ok(Some(self.braced_multiplier()?))
            }
            _ => Ok(None),
        }
    }

    /// mamount := uint '}'   |   mrange := uint? ',' uint? '}'
    /// (the opening brace is already consumed)
    fn braced_multiplier(&mut self) -> PResult<Multiplier> {
        let min = self.uint()?;
        match self.peek() {
            Some(R_BRACE) if min.is_some() => {
                self.pos += 1;
                Ok(Multiplier::Exact(min.unwrap()))
            }
            Some(COMMA) => {
                self.pos += 1;
                let max = self.uint()?;
                if self.peek() != Some(R_BRACE) {
                    return Err(self.pos);
                }
                self.pos += 1;
                Ok(Multiplier::Range { min, max })
            }
            _ => Err(self.pos),
        }
    }

    /// A possibly-absent decimal number. Overflowing u32 fails the parse at
    /// the offending digit.
    fn uint(&mut self) -> PResult<Option<u32>> {
        let mut value: Option<u32> = None;
        while let Some(c) = self.peek() {
            if !(('0' as u32)..=('9' as u32)).contains(&c) {
                break;
            }
            let digit = c - '0' as u32;
            value = Some(
                value
                    .unwrap_or(0)
                    .checked_mul(10)
                    .and_then(|v| v.checked_add(digit))
                    .ok_or(self.pos)?,
            );
            self.pos += 1;
        }
        Ok(value)
    }
}

/// Parse a UTF-32 pattern into its chunk sequence.
///
/// A multiplier after a literal run binds to the run's final character only,
/// so `ab?c` reads as `a` `b?` `c`; the word is split at that point. A
/// multiplier after a class binds to the whole class.
pub fn parse(input: &[u32]) -> Result<Regex> {
    if input.is_empty() {
        return Err(Error::user("Empty regex is not allowed!"));
    }

    let mut cursor = Cursor::new(input);
    let mut chunks = Vec::new();
    while !cursor.at_end() {
        let parsed = cursor
            .chunk_content()
            .and_then(|content| Ok((content, cursor.multiplier()?)));
        match parsed {
            Ok((ChunkContent::Word(word), Some(multiplier))) if word.len() > 1 => {
                let (head, last) = word.split_at(word.len() - 1);
                chunks.push(Chunk {
                    content: ChunkContent::Word(head.to_vec()),
                    multiplier: None,
                });
                chunks.push(Chunk {
                    content: ChunkContent::Word(vec![last[0]]),
                    multiplier: Some(multiplier),
                });
            }
            Ok((content, multiplier)) => chunks.push(Chunk { content, multiplier }),
            Err(offset) => return Err(malformed(input, offset)),
        }
    }
    Ok(chunks)
}

/// Render the `malformed regex` message with a caret under the failure
/// point. Columns are one-based and counted in code points.
fn malformed(input: &[u32], offset: usize) -> Error {
    Error::user(format!(
        "malformed regex at column {}:\n  {}\n  {}^",
        offset + 1,
        text::from_utf32(input),
        " ".repeat(offset)
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::text::to_utf32;

    fn parse_str(s: &str) -> Result<Regex> {
        parse(&to_utf32(s))
    }

    fn word(s: &str) -> ChunkContent {
        ChunkContent::Word(to_utf32(s))
    }

    #[test]
    fn test_parse_word() {
        let r = parse_str("abc").unwrap();
        assert_eq!(r.len(), 1);
        assert_eq!(r[0].content, word("abc"));
        assert_eq!(r[0].multiplier, None);
    }

    #[test]
    fn test_parse_class_singletons_and_ranges() {
        let r = parse_str("[ax-z0]").unwrap();
        assert_eq!(r.len(), 1);
        assert_eq!(
            r[0].content,
            ChunkContent::Class(vec![
                CharacterRange { begin: 'a' as u32, end: 'a' as u32 },
                CharacterRange { begin: 'x' as u32, end: 'z' as u32 },
                CharacterRange { begin: '0' as u32, end: '0' as u32 },
            ])
        );
    }

    #[test]
    fn test_parse_multiplier_forms() {
        assert_eq!(parse_str("a+").unwrap()[0].multiplier, Some(Multiplier::Plus));
        assert_eq!(parse_str("a?").unwrap()[0].multiplier, Some(Multiplier::Question));
        assert_eq!(parse_str("a*").unwrap()[0].multiplier, Some(Multiplier::Star));
        assert_eq!(parse_str("a{7}").unwrap()[0].multiplier, Some(Multiplier::Exact(7)));
        assert_eq!(
            parse_str("a{2,5}").unwrap()[0].multiplier,
            Some(Multiplier::Range { min: Some(2), max: Some(5) })
        );
        assert_eq!(
            parse_str("a{,5}").unwrap()[0].multiplier,
            Some(Multiplier::Range { min: None, max: Some(5) })
        );
        assert_eq!(
            parse_str("a{2,}").unwrap()[0].multiplier,
            Some(Multiplier::Range { min: Some(2), max: None })
        );
        assert_eq!(
            parse_str("a{,}").unwrap()[0].multiplier,
            Some(Multiplier::Range { min: None, max: None })
        );
    }

    #[test]
    fn test_multiplier_binds_to_last_character() {
        let r = parse_str("ab?c").unwrap();
        assert_eq!(r.len(), 3);
        assert_eq!(r[0].content, word("a"));
        assert_eq!(r[0].multiplier, None);
        assert_eq!(r[1].content, word("b"));
        assert_eq!(r[1].multiplier, Some(Multiplier::Question));
        assert_eq!(r[2].content, word("c"));
        assert_eq!(r[2].multiplier, None);
    }

    #[test]
    fn test_multiplier_binds_to_whole_class() {
        let r = parse_str("a[bc]{2}").unwrap();
        assert_eq!(r.len(), 2);
        assert_eq!(r[1].multiplier, Some(Multiplier::Exact(2)));
        assert!(matches!(r[1].content, ChunkContent::Class(_)));
    }

    #[test]
    fn test_whitespace_is_a_literal() {
        let r = parse_str("a b").unwrap();
        assert_eq!(r.len(), 1);
        assert_eq!(r[0].content, word("a b"));
    }

    #[test]
    fn test_empty_regex() {
        let err = parse(&[]).unwrap_err();
        assert!(err.to_string().contains("Empty regex"));
    }

    #[test]
    fn test_malformed_reports_column() {
        // '}' with no opening brace fails at column 2
        let err = parse_str("a}").unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("malformed regex at column 2"), "{msg}");
        assert!(msg.ends_with("  a}\n   ^"), "{msg}");
    }

    #[test]
    fn test_malformed_cases() {
        for re in ["a{", "a{}", "a{2", "a{2,5", "[", "[]", "[a", "[a-", "]", "+", "a{9999999999}"] {
            let err = parse_str(re).unwrap_err();
            assert!(err.to_string().contains("malformed regex"), "{re}");
        }
    }

    #[test]
    fn test_class_range_backwards() {
        let err = parse_str("[z-a]").unwrap_err();
        assert!(err.to_string().contains("column 4"));
    }

    #[test]
    fn test_dash_is_meta_outside_class() {
        assert!(parse_str("a-b").is_err());
    }
}
