//! Expansion of format-control strings.
//!
//! A field's format controls describe its subfields as a parenthesised, comma
//! separated list that may contain nested groups and repeat counts, e.g.
//! `(A(2),I(10),3A,2(R,b12))`. Decoding needs one format per subfield, so the
//! grammar is flattened into a plain token sequence:
//!
//! ```text
//! format := '(' list ')'
//! list   := item (',' item)* | <empty>
//! item   := count? ( '(' list ')' | token )
//! count  := digit+
//! token  := everything up to the next ',' or ')' outside of the token's own parentheses
//! ```
use super::*;

/// Expand `format_controls` into a comma separated list without any grouping.
///
/// `(2(A,B))` becomes `A,B,A,B`.
pub fn expand(format_controls: &str) -> Result<String> {
    Ok(tokenize(format_controls)?.join(","))
}

/// Expand `format_controls` into one format token per subfield.
pub fn tokenize(format_controls: &str) -> Result<Vec<String>> {
    FormatParser::new(format_controls).parse_format()
}

/// More formats than any field could have subfields.
const MAX_TOKENS: usize = 10_000;

struct FormatParser<'a> {
    input: &'a str,
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> FormatParser<'a> {
    fn new(input: &'a str) -> Self {
        Self {
            input,
            bytes: input.as_bytes(),
            pos: 0,
        }
    }

    fn parse_format(&mut self) -> Result<Vec<String>> {
        ensure!(
            self.bytes.len() >= 2
                && self.bytes.first() == Some(&b'(')
                && self.bytes.last() == Some(&b')'),
            MalformedFormatSnafu {
                format: self.input,
                description: "format controls missing brackets",
            }
        );
        let tokens = self.parse_group()?;
        ensure!(
            self.pos == self.bytes.len(),
            MalformedFormatSnafu {
                format: self.input,
                description: format!("unexpected text after position {}", self.pos),
            }
        );
        Ok(tokens)
    }

    fn parse_group(&mut self) -> Result<Vec<String>> {
        self.expect(b'(')?;
        let tokens = self.parse_list()?;
        self.expect(b')')?;
        Ok(tokens)
    }

    fn parse_list(&mut self) -> Result<Vec<String>> {
        let mut tokens = Vec::new();
        if self.peek() == Some(b')') {
            return Ok(tokens);
        }
        loop {
            tokens.extend(self.parse_item()?);
            if self.peek() == Some(b',') {
                self.pos += 1;
            } else {
                return Ok(tokens);
            }
        }
    }

    fn parse_item(&mut self) -> Result<Vec<String>> {
        let repeat = self.parse_repeat_count()?;
        let expanded = if self.peek() == Some(b'(') {
            self.parse_group()?
        } else {
            vec![self.parse_token()?]
        };
        let Some(count) = repeat.filter(|_| !expanded.is_empty()) else {
            return Ok(expanded);
        };
        let Some(total) = count
            .checked_mul(expanded.len())
            .filter(|total| *total <= MAX_TOKENS)
        else {
            fail!(MalformedFormatSnafu {
                format: self.input,
                description: format!(
                    "repeating {} formats {count} times exceeds {MAX_TOKENS} formats",
                    expanded.len()
                ),
            });
        };
        let mut repeated = Vec::with_capacity(total);
        for _ in 0..count {
            repeated.extend_from_slice(&expanded);
        }
        Ok(repeated)
    }

    fn parse_repeat_count(&mut self) -> Result<Option<usize>> {
        let start = self.pos;
        while self.peek().is_some_and(|b| b.is_ascii_digit()) {
            self.pos += 1;
        }
        if start == self.pos {
            return Ok(None);
        }
        let digits = &self.input[start..self.pos];
        let count: usize = digits.parse().ok().with_context(|| MalformedFormatSnafu {
            format: self.input,
            description: format!("repeat count '{digits}' is out of range"),
        })?;
        ensure!(
            count >= 1,
            MalformedFormatSnafu {
                format: self.input,
                description: format!("repeat count at position {start} must be at least 1"),
            }
        );
        Ok(Some(count))
    }

    fn parse_token(&mut self) -> Result<String> {
        let start = self.pos;
        let mut depth = 0usize;
        while let Some(b) = self.peek() {
            match b {
                b'(' => depth += 1,
                b')' if depth == 0 => break,
                b')' => depth -= 1,
                b',' if depth == 0 => break,
                _ => (),
            }
            self.pos += 1;
        }
        ensure!(
            depth == 0,
            MalformedFormatSnafu {
                format: self.input,
                description: format!("unbalanced parentheses in format starting at {start}"),
            }
        );
        ensure!(
            self.pos > start,
            MalformedFormatSnafu {
                format: self.input,
                description: format!("empty format at position {start}"),
            }
        );
        Ok(self.input[start..self.pos].to_string())
    }

    fn expect(&mut self, expected: u8) -> Result<()> {
        ensure!(
            self.peek() == Some(expected),
            MalformedFormatSnafu {
                format: self.input,
                description: format!("expected '{}' at position {}", expected as char, self.pos),
            }
        );
        self.pos += 1;
        Ok(())
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }
}
