//! Tokeniser for checklist condition expressions
//!
//! Splits on whitespace and parentheses; `&` and `|` are single-character
//! operators; remaining words are folded through the keyword table and
//! everything left over is a check-node identifier.

use super::token::{check_keyword, Item, Token};
use crate::{HubError, Result};

/// Cursor-based lexer over one condition expression
pub struct Lexer<'a> {
    input: &'a str,
    start: usize,
    position: usize,
    width: usize,
    items: Vec<Item>,
}

impl<'a> Lexer<'a> {
    /// Create a lexer for the given expression
    pub fn new(input: &'a str) -> Self {
        Self {
            input,
            start: 0,
            position: 0,
            width: 0,
            items: Vec::new(),
        }
    }

    /// Scan the whole input, returning the token stream ending in `Eof`
    pub fn scan(mut self) -> Result<Vec<Item>> {
        while let Some(ch) = self.next_char() {
            match ch {
                c if c.is_whitespace() => {
                    self.accumulate_word()?;
                    self.ignore();
                }
                '(' => {
                    self.backup();
                    self.accumulate_word()?;
                    self.next_char();
                    self.emit(Token::SepLpar);
                }
                ')' => {
                    self.backup();
                    self.accumulate_word()?;
                    self.next_char();
                    self.emit(Token::SepRpar);
                }
                '&' => {
                    self.backup();
                    self.accumulate_word()?;
                    self.next_char();
                    self.emit(Token::KeywordAnd);
                }
                '|' => {
                    self.backup();
                    self.accumulate_word()?;
                    self.next_char();
                    self.emit(Token::KeywordOr);
                }
                '!' => {
                    return Err(HubError::Condition(format!(
                        "unsupported character '{}' in condition",
                        ch
                    )));
                }
                _ => {}
            }
        }
        self.accumulate_word()?;
        self.items.push(Item::new(Token::Eof, ""));
        Ok(self.items)
    }

    /// Get the next character from the input
    fn next_char(&mut self) -> Option<char> {
        if self.position >= self.input.len() {
            self.width = 0;
            return None;
        }
        let ch = self.input[self.position..].chars().next()?;
        self.width = ch.len_utf8();
        self.position += self.width;
        Some(ch)
    }

    /// Back up one character
    fn backup(&mut self) {
        if self.width > 0 {
            self.position -= self.width;
            self.width = 0;
        }
    }

    /// Drop the collected span
    fn ignore(&mut self) {
        self.start = self.position;
    }

    /// The span collected since the last emit
    fn collected(&self) -> &'a str {
        &self.input[self.start..self.position]
    }

    /// Flush any pending word before a separator or at end of input
    fn accumulate_word(&mut self) -> Result<()> {
        let word = self.collected().trim();
        if !word.is_empty() {
            let token = check_keyword(word);
            self.items.push(Item::new(token, word));
        }
        self.ignore();
        Ok(())
    }

    /// Emit a separator token for the character just consumed
    fn emit(&mut self, token: Token) {
        self.items.push(Item::new(token, token.literal()));
        self.ignore();
    }
}
