//! Tokenizer for configuration scripts.
//!
//! Newlines terminate statements, so the lexer emits `Newline` tokens, but
//! only at bracket depth zero so lists and call arguments may span lines.
//! `#` starts a comment that runs to end of line.

use crate::error::ScriptError;

/// A single token.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Tok {
    Ident(String),
    Int(i64),
    Float(f64),
    Str(String),
    True,
    False,
    Computed,
    Cached,
    Eq,
    Comma,
    LParen,
    RParen,
    LBracket,
    RBracket,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Bang,
    Lt,
    Le,
    Gt,
    Ge,
    EqEq,
    Ne,
    AndAnd,
    OrOr,
    Newline,
}

impl Tok {
    /// Short description used in parse error messages.
    pub(crate) fn describe(&self) -> String {
        match self {
            Tok::Ident(name) => format!("identifier '{}'", name),
            Tok::Int(v) => format!("number '{}'", v),
            Tok::Float(v) => format!("number '{}'", v),
            Tok::Str(_) => "string literal".to_string(),
            Tok::True => "'true'".to_string(),
            Tok::False => "'false'".to_string(),
            Tok::Computed => "'computed'".to_string(),
            Tok::Cached => "'cached'".to_string(),
            Tok::Eq => "'='".to_string(),
            Tok::Comma => "','".to_string(),
            Tok::LParen => "'('".to_string(),
            Tok::RParen => "')'".to_string(),
            Tok::LBracket => "'['".to_string(),
            Tok::RBracket => "']'".to_string(),
            Tok::Plus => "'+'".to_string(),
            Tok::Minus => "'-'".to_string(),
            Tok::Star => "'*'".to_string(),
            Tok::Slash => "'/'".to_string(),
            Tok::Percent => "'%'".to_string(),
            Tok::Bang => "'!'".to_string(),
            Tok::Lt => "'<'".to_string(),
            Tok::Le => "'<='".to_string(),
            Tok::Gt => "'>'".to_string(),
            Tok::Ge => "'>='".to_string(),
            Tok::EqEq => "'=='".to_string(),
            Tok::Ne => "'!='".to_string(),
            Tok::AndAnd => "'&&'".to_string(),
            Tok::OrOr => "'||'".to_string(),
            Tok::Newline => "end of line".to_string(),
        }
    }
}

/// A token plus the 1-based line it starts on.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct SpannedTok {
    pub(crate) tok: Tok,
    pub(crate) line: usize,
}

/// Tokenize `text` into a flat token stream.
pub(crate) fn tokenize(text: &str) -> Result<Vec<SpannedTok>, ScriptError> {
    let mut toks = Vec::new();
    let mut chars = text.chars().peekable();
    let mut line = 1usize;
    let mut depth = 0usize;

    macro_rules! push {
        ($tok:expr) => {
            toks.push(SpannedTok { tok: $tok, line })
        };
    }

    while let Some(&ch) = chars.peek() {
        match ch {
            '\n' => {
                chars.next();
                if depth == 0 {
                    // Collapse runs of blank lines into one separator.
                    if !matches!(toks.last(), None | Some(SpannedTok { tok: Tok::Newline, .. })) {
                        push!(Tok::Newline);
                    }
                }
                line += 1;
            }
            ' ' | '\t' | '\r' => {
                chars.next();
            }
            '#' => {
                while let Some(&c) = chars.peek() {
                    if c == '\n' {
                        break;
                    }
                    chars.next();
                }
            }
            '"' => {
                chars.next();
                let mut s = String::new();
                let mut closed = false;
                while let Some(c) = chars.next() {
                    match c {
                        '"' => {
                            closed = true;
                            break;
                        }
                        '\\' => match chars.next() {
                            Some('n') => s.push('\n'),
                            Some('t') => s.push('\t'),
                            Some('\\') => s.push('\\'),
                            Some('"') => s.push('"'),
                            Some(other) => {
                                return Err(ScriptError::UnexpectedChar { ch: other, line })
                            }
                            None => return Err(ScriptError::UnterminatedString { line }),
                        },
                        '\n' => return Err(ScriptError::UnterminatedString { line }),
                        other => s.push(other),
                    }
                }
                if !closed {
                    return Err(ScriptError::UnterminatedString { line });
                }
                push!(Tok::Str(s));
            }
            c if c.is_ascii_digit() => {
                let text = scan_number(&mut chars);
                push!(parse_number(&text, line)?);
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let mut word = String::new();
                while let Some(&c) = chars.peek() {
                    if c.is_ascii_alphanumeric() || c == '_' {
                        word.push(c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                push!(match word.as_str() {
                    "true" => Tok::True,
                    "false" => Tok::False,
                    "computed" => Tok::Computed,
                    "cached" => Tok::Cached,
                    _ => Tok::Ident(word),
                });
            }
            '(' => {
                chars.next();
                depth += 1;
                push!(Tok::LParen);
            }
            ')' => {
                chars.next();
                depth = depth.saturating_sub(1);
                push!(Tok::RParen);
            }
            '[' => {
                chars.next();
                depth += 1;
                push!(Tok::LBracket);
            }
            ']' => {
                chars.next();
                depth = depth.saturating_sub(1);
                push!(Tok::RBracket);
            }
            ',' => {
                chars.next();
                push!(Tok::Comma);
            }
            '+' => {
                chars.next();
                push!(Tok::Plus);
            }
            '-' => {
                chars.next();
                push!(Tok::Minus);
            }
            '*' => {
                chars.next();
                push!(Tok::Star);
            }
            '/' => {
                chars.next();
                push!(Tok::Slash);
            }
            '%' => {
                chars.next();
                push!(Tok::Percent);
            }
            '=' => {
                chars.next();
                if chars.peek() == Some(&'=') {
                    chars.next();
                    push!(Tok::EqEq);
                } else {
                    push!(Tok::Eq);
                }
            }
            '!' => {
                chars.next();
                if chars.peek() == Some(&'=') {
                    chars.next();
                    push!(Tok::Ne);
                } else {
                    push!(Tok::Bang);
                }
            }
            '<' => {
                chars.next();
                if chars.peek() == Some(&'=') {
                    chars.next();
                    push!(Tok::Le);
                } else {
                    push!(Tok::Lt);
                }
            }
            '>' => {
                chars.next();
                if chars.peek() == Some(&'=') {
                    chars.next();
                    push!(Tok::Ge);
                } else {
                    push!(Tok::Gt);
                }
            }
            '&' => {
                chars.next();
                if chars.peek() == Some(&'&') {
                    chars.next();
                    push!(Tok::AndAnd);
                } else {
                    return Err(ScriptError::UnexpectedChar { ch: '&', line });
                }
            }
            '|' => {
                chars.next();
                if chars.peek() == Some(&'|') {
                    chars.next();
                    push!(Tok::OrOr);
                } else {
                    return Err(ScriptError::UnexpectedChar { ch: '|', line });
                }
            }
            other => return Err(ScriptError::UnexpectedChar { ch: other, line }),
        }
    }

    Ok(toks)
}

/// Scan the lexeme of a number literal: digits, optional fraction, optional
/// exponent with optional sign (`1e-5`, `2.5E+3`).
fn scan_number(chars: &mut std::iter::Peekable<std::str::Chars<'_>>) -> String {
    let mut text = String::new();
    while let Some(&c) = chars.peek() {
        if c.is_ascii_digit() {
            text.push(c);
            chars.next();
        } else {
            break;
        }
    }
    if chars.peek() == Some(&'.') {
        text.push('.');
        chars.next();
        while let Some(&c) = chars.peek() {
            if c.is_ascii_digit() {
                text.push(c);
                chars.next();
            } else {
                break;
            }
        }
    }
    if matches!(chars.peek(), Some('e') | Some('E')) {
        text.push('e');
        chars.next();
        if matches!(chars.peek(), Some('+') | Some('-')) {
            text.push(chars.next().unwrap_or('+'));
        }
        while let Some(&c) = chars.peek() {
            if c.is_ascii_digit() {
                text.push(c);
                chars.next();
            } else {
                break;
            }
        }
    }
    text
}

fn parse_number(text: &str, line: usize) -> Result<Tok, ScriptError> {
    if text.contains('.') || text.contains('e') {
        text.parse::<f64>()
            .map(Tok::Float)
            .map_err(|_| ScriptError::InvalidNumber {
                text: text.to_string(),
                line,
            })
    } else {
        text.parse::<i64>()
            .map(Tok::Int)
            .map_err(|_| ScriptError::InvalidNumber {
                text: text.to_string(),
                line,
            })
    }
}
