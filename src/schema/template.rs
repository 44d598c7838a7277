//! `%n`-style message templates.
//!
//! Manifest messages reference data items positionally (`%1` is the first `data` element of the
//! event's template). Escapes: `%%` → `%`, `%!` → `!`, `%n` → newline, `%r` → dropped. Any other
//! `%x` sequence is kept literally.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    Literal(String),
    /// Index into the decoded field values (0-based).
    Field(usize),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("message references %{index}, but only {slot_count} data items are declared")]
pub struct TemplateError {
    pub index: usize,
    pub slot_count: usize,
}

/// A tokenized message, built once per event schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageTemplate {
    tokens: Vec<Token>,
}

impl MessageTemplate {
    /// Tokenize `message`.
    ///
    /// `slot_to_field[k]` is the field that owns manifest data slot `k` (0-based). Fields that
    /// span several slots appear several times.
    pub fn parse(message: &str, slot_to_field: &[usize]) -> Result<Self, TemplateError> {
        let mut tokens = Vec::new();
        let mut literal = String::new();
        let mut chars = message.chars().peekable();

        while let Some(c) = chars.next() {
            if c != '%' {
                literal.push(c);
                continue;
            }

            match chars.peek().copied() {
                Some('%') => {
                    chars.next();
                    literal.push('%');
                }
                Some('!') => {
                    chars.next();
                    literal.push('!');
                }
                Some('n') => {
                    chars.next();
                    literal.push('\n');
                }
                Some('r') => {
                    chars.next();
                }
                Some(d) if d.is_ascii_digit() => {
                    let mut digits = String::new();
                    while let Some(d) = chars.peek().copied().filter(char::is_ascii_digit) {
                        digits.push(d);
                        chars.next();
                    }
                    let index = digits.parse::<usize>().unwrap_or(usize::MAX);
                    let field = index
                        .checked_sub(1)
                        .and_then(|slot| slot_to_field.get(slot))
                        .copied()
                        .ok_or(TemplateError {
                            index,
                            slot_count: slot_to_field.len(),
                        })?;

                    if !literal.is_empty() {
                        tokens.push(Token::Literal(std::mem::take(&mut literal)));
                    }
                    tokens.push(Token::Field(field));
                }
                _ => literal.push('%'),
            }
        }

        if !literal.is_empty() {
            tokens.push(Token::Literal(literal));
        }

        Ok(MessageTemplate { tokens })
    }

    /// The template used for events declared without a message: every field, `, `-separated.
    pub fn positional(field_count: usize) -> Self {
        let mut tokens = Vec::with_capacity(field_count * 2);
        for i in 0..field_count {
            if i > 0 {
                tokens.push(Token::Literal(", ".to_string()));
            }
            tokens.push(Token::Field(i));
        }
        MessageTemplate { tokens }
    }

    pub fn tokens(&self) -> &[Token] {
        &self.tokens
    }

    /// Substitute decoded values into the template.
    ///
    /// Field indices were validated against the schema when the template was built, a shorter
    /// `values` slice renders the missing references as empty.
    pub fn render(&self, values: &[String]) -> String {
        let mut out = String::new();
        for token in &self.tokens {
            match token {
                Token::Literal(s) => out.push_str(s),
                Token::Field(i) => {
                    if let Some(v) = values.get(*i) {
                        out.push_str(v);
                    }
                }
            }
        }
        out
    }
}
