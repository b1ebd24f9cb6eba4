//! End-char and match-phrase compilers.
//!
//! Both compile on the owning thread into buffers the hook only reads.
//! Allocation goes through `try_reserve` so a failure surfaces as
//! `KeyhookError::OutOfMemory` and leaves the target empty.

use std::ops::Range;

use keyhook_core::error::{KeyhookError, Result};

/// Smallest allocation for the phrase buffer.
pub const MATCH_BUF_MIN: usize = 4096;

/// The phrase table grows by this many entries at a time.
pub const PHRASE_BLOCK_SIZE: usize = 50;

// =============================================================================
// End chars
// =============================================================================

/// Packed single-character end triggers, used in end-char mode.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EndChars {
    chars: String,
}

impl EndChars {
    pub fn new() -> Self {
        Self::default()
    }

    /// Collect every single-character key of `keys` into the buffer.
    ///
    /// `{x}` contributes `x`, `{{}` and `{}}` contribute a brace, longer
    /// `{Name}` tokens and stray braces contribute nothing. `expected` is the
    /// character count reported by the key-class compiler; room is reserved
    /// for that many characters of any width.
    pub fn compile(&mut self, keys: &str, expected: usize) -> Result<()> {
        self.chars.clear();
        if expected == 0 {
            return Ok(());
        }
        let reserved = expected
            .checked_mul(4)
            .map(|bytes| self.chars.try_reserve(bytes));
        if !matches!(reserved, Some(Ok(()))) {
            self.chars = String::new();
            return Err(KeyhookError::OutOfMemory("end characters"));
        }

        let src: Vec<char> = keys.chars().collect();
        let mut i = 0;
        while i < src.len() {
            match src[i] {
                '{' => {
                    if let Some(close) = src[i + 1..].iter().position(|&c| c == '}') {
                        let mut end = close + i + 1;
                        if end == i + 1 && src.get(end + 1) == Some(&'}') {
                            end += 1;
                        }
                        if end == i + 2 {
                            self.chars.push(src[i + 1]);
                        }
                        i = end;
                    }
                }
                '}' => {}
                c => self.chars.push(c),
            }
            i += 1;
        }
        Ok(())
    }

    pub fn as_str(&self) -> &str {
        &self.chars
    }

    pub fn is_empty(&self) -> bool {
        self.chars.is_empty()
    }

    /// Whether `ch` is an end char. Without `case_sensitive` letters match
    /// either case.
    pub fn contains(&self, ch: char, case_sensitive: bool) -> bool {
        if case_sensitive {
            self.chars.contains(ch)
        } else {
            self.chars.chars().any(|c| chars_eq_ignore_case(c, ch))
        }
    }
}

// =============================================================================
// Match phrases
// =============================================================================

/// Compiled match phrases: one NUL-separated buffer plus a table of phrase
/// ranges into it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MatchList {
    buf: String,
    phrases: Vec<Range<usize>>,
}

impl MatchList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compile a comma-delimited phrase list.
    ///
    /// `,,` is a literal comma that closes the phrase it ends; a lone comma is
    /// a delimiter. Empty phrases are dropped.
    pub fn compile(&mut self, list: &str) -> Result<()> {
        self.compile_within(list, usize::MAX)
    }

    /// Compile with the phrase table capped at `max_table` entries. Growth
    /// past the cap fails like a refused allocation.
    fn compile_within(&mut self, list: &str, max_table: usize) -> Result<()> {
        self.clear();
        if list.is_empty() {
            return Ok(());
        }
        let result = self.fill(list, max_table);
        if result.is_err() {
            self.clear();
            self.buf = String::new();
            self.phrases = Vec::new();
        }
        result
    }

    fn fill(&mut self, list: &str, max_table: usize) -> Result<()> {
        let needed = list.len() + 1;
        if needed > self.buf.capacity() {
            self.buf = String::new();
            self.buf
                .try_reserve_exact(needed.max(MATCH_BUF_MIN))
                .map_err(|_| KeyhookError::OutOfMemory("match phrase buffer"))?;
        }
        if self.phrases.capacity() == 0 {
            self.phrases
                .try_reserve_exact(PHRASE_BLOCK_SIZE)
                .map_err(|_| KeyhookError::OutOfMemory("match phrase table"))?;
        }

        let mut start = 0;
        let mut chars = list.chars().peekable();
        while let Some(c) = chars.next() {
            if c != ',' {
                self.buf.push(c);
                continue;
            }
            if chars.peek() == Some(&',') {
                chars.next();
                self.buf.push(',');
            }
            self.close_phrase(start, max_table)?;
            start = self.buf.len();
        }
        self.close_phrase(start, max_table)
    }

    /// Terminate the phrase that began at `start`, recording it if non-empty.
    fn close_phrase(&mut self, start: usize, max_table: usize) -> Result<()> {
        let end = self.buf.len();
        if end > start {
            if self.phrases.len() == self.phrases.capacity() {
                if self.phrases.capacity().saturating_add(PHRASE_BLOCK_SIZE) > max_table {
                    return Err(KeyhookError::OutOfMemory("match phrase table"));
                }
                self.phrases
                    .try_reserve_exact(PHRASE_BLOCK_SIZE)
                    .map_err(|_| KeyhookError::OutOfMemory("match phrase table"))?;
            }
            self.phrases.push(start..end);
            self.buf.push('\0');
        }
        Ok(())
    }

    fn clear(&mut self) {
        self.buf.clear();
        self.phrases.clear();
    }

    pub fn len(&self) -> usize {
        self.phrases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.phrases.is_empty()
    }

    pub fn phrase(&self, index: usize) -> Option<&str> {
        self.phrases.get(index).map(|r| &self.buf[r.clone()])
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        let buf = &self.buf;
        self.phrases.iter().map(move |r| &buf[r.clone()])
    }

    /// Index of the first phrase matching `input`: equal to the whole input,
    /// or contained anywhere in it with `anywhere`.
    pub fn find_match(&self, input: &str, case_sensitive: bool, anywhere: bool) -> Option<usize> {
        self.iter().position(|phrase| match (anywhere, case_sensitive) {
            (false, true) => input == phrase,
            (false, false) => str_eq_ignore_case(input, phrase),
            (true, true) => input.contains(phrase),
            (true, false) => contains_ignore_case(input, phrase),
        })
    }
}

fn chars_eq_ignore_case(a: char, b: char) -> bool {
    a == b || a.to_lowercase().eq(b.to_lowercase())
}

fn str_eq_ignore_case(a: &str, b: &str) -> bool {
    let mut a = a.chars();
    let mut b = b.chars();
    loop {
        match (a.next(), b.next()) {
            (None, None) => return true,
            (Some(x), Some(y)) if chars_eq_ignore_case(x, y) => continue,
            _ => return false,
        }
    }
}

fn contains_ignore_case(haystack: &str, needle: &str) -> bool {
    if needle.is_empty() {
        return true;
    }
    haystack.char_indices().any(|(i, _)| {
        let mut rest = haystack[i..].chars();
        needle
            .chars()
            .all(|n| rest.next().is_some_and(|h| chars_eq_ignore_case(h, n)))
    })
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn phrases(list: &str) -> Vec<String> {
        let mut compiled = MatchList::new();
        compiled.compile(list).unwrap();
        compiled.iter().map(str::to_string).collect()
    }

    #[test]
    fn test_match_list_examples() {
        assert_eq!(phrases("btw,otoh,,end"), vec!["btw", "otoh,", "end"]);
        assert_eq!(phrases(",,"), vec![","]);
        assert!(phrases(",").is_empty());
        assert!(phrases("").is_empty());
    }

    #[test]
    fn test_match_list_drops_empty_phrases() {
        assert_eq!(phrases(",btw,,,otoh,"), vec!["btw,", "otoh"]);
        assert_eq!(phrases("a,,,b"), vec!["a,", "b"]);
    }

    #[test]
    fn test_match_list_buffer_sizing() {
        let mut compiled = MatchList::new();
        compiled.compile("x").unwrap();
        assert!(compiled.buf.capacity() >= MATCH_BUF_MIN);
        assert_eq!(compiled.phrases.capacity(), PHRASE_BLOCK_SIZE);

        let long: Vec<String> = (0..PHRASE_BLOCK_SIZE * 2 + 3).map(|i| format!("p{i}")).collect();
        compiled.compile(&long.join(",")).unwrap();
        assert_eq!(compiled.len(), PHRASE_BLOCK_SIZE * 2 + 3);
        assert_eq!(compiled.phrase(PHRASE_BLOCK_SIZE * 2 + 2), Some("p102"));
        assert_eq!(compiled.phrases.capacity() % PHRASE_BLOCK_SIZE, 0);
    }

    #[test]
    fn test_recompile_replaces_phrases() {
        let mut compiled = MatchList::new();
        compiled.compile("one,two").unwrap();
        compiled.compile("three").unwrap();
        assert_eq!(compiled.len(), 1);
        assert_eq!(compiled.phrase(0), Some("three"));
        assert_eq!(compiled.phrase(1), None);
        compiled.compile("").unwrap();
        assert!(compiled.is_empty());
    }

    #[test]
    fn test_failed_compile_leaves_usable_empty_list() {
        let mut compiled = MatchList::new();
        compiled.compile("one,two").unwrap();

        let many: Vec<String> = (0..PHRASE_BLOCK_SIZE + 1).map(|i| format!("p{i}")).collect();
        let err = compiled
            .compile_within(&many.join(","), PHRASE_BLOCK_SIZE)
            .unwrap_err();
        assert!(matches!(err, KeyhookError::OutOfMemory("match phrase table")));
        assert!(compiled.is_empty());
        assert_eq!(compiled.phrase(0), None);
        assert_eq!(compiled.find_match("one", false, true), None);

        compiled.compile("three").unwrap();
        assert_eq!(compiled.find_match("three", true, false), Some(0));
    }

    #[test]
    fn test_find_match_exact() {
        let mut compiled = MatchList::new();
        compiled.compile("btw,Otoh").unwrap();
        assert_eq!(compiled.find_match("btw", false, false), Some(0));
        assert_eq!(compiled.find_match("OTOH", false, false), Some(1));
        assert_eq!(compiled.find_match("OTOH", true, false), None);
        assert_eq!(compiled.find_match("xbtw", false, false), None);
    }

    #[test]
    fn test_find_match_anywhere() {
        let mut compiled = MatchList::new();
        compiled.compile("btw,Otoh").unwrap();
        assert_eq!(compiled.find_match("so btw", false, true), Some(0));
        assert_eq!(compiled.find_match("xxotohxx", false, true), Some(1));
        assert_eq!(compiled.find_match("xxotohxx", true, true), None);
        assert_eq!(compiled.find_match("bt", false, true), None);
    }

    #[test]
    fn test_end_chars_compile() {
        let mut end_chars = EndChars::new();
        end_chars.compile("ab{.}{Enter}{{}{}}}{}", 5).unwrap();
        assert_eq!(end_chars.as_str(), "ab.{}");

        end_chars.compile("", 0).unwrap();
        assert!(end_chars.is_empty());
    }

    #[test]
    fn test_end_chars_reserve_covers_multibyte() {
        let mut end_chars = EndChars::new();
        end_chars.compile("{é}€𝄞", 3).unwrap();
        assert_eq!(end_chars.as_str(), "é€𝄞");
        assert!(end_chars.chars.capacity() >= 3 * 4);
    }

    #[test]
    fn test_end_chars_unclosed_brace_skipped() {
        let mut end_chars = EndChars::new();
        end_chars.compile("x{y", 3).unwrap();
        assert_eq!(end_chars.as_str(), "xy");
    }

    #[test]
    fn test_end_chars_contains() {
        let mut end_chars = EndChars::new();
        end_chars.compile("q.", 2).unwrap();
        assert!(end_chars.contains('Q', false));
        assert!(!end_chars.contains('Q', true));
        assert!(end_chars.contains('.', true));
        assert!(!end_chars.contains(',', false));
    }

    #[test]
    fn test_ignore_case_helpers() {
        assert!(str_eq_ignore_case("ÄBC", "äbc"));
        assert!(!str_eq_ignore_case("abc", "ab"));
        assert!(contains_ignore_case("héllo WORLD", "World"));
        assert!(!contains_ignore_case("abc", "abcd"));
    }
}
