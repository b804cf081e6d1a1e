// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Tokenizer for attribute expressions.

use super::CompileError;
use logos::Logos;

#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\r\n\f]+")]
pub enum Token {
    #[token("sizeof")]
    Sizeof,

    #[regex(r"[0-9]+", |lex| lex.slice().parse::<i64>().ok())]
    #[regex(r"0[xX][0-9a-fA-F]+", |lex| i64::from_str_radix(&lex.slice()[2..], 16).ok())]
    #[regex(r"'([^'\\]|\\.)'", |lex| unescape_char(lex.slice()))]
    Int(i64),

    #[regex(r"[0-9]+\.[0-9]*([eE][+-]?[0-9]+)?", |lex| lex.slice().parse::<f64>().ok())]
    #[regex(r"[0-9]+[eE][+-]?[0-9]+", |lex| lex.slice().parse::<f64>().ok())]
    Float(f64),

    #[regex(r#""([^"\\]|\\.)*""#, |lex| unescape_string(lex.slice()))]
    Str(String),

    #[regex(r"[A-Za-z_][A-Za-z0-9_]*", |lex| lex.slice().to_string())]
    Ident(String),

    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token("?")]
    Question,
    #[token(":")]
    Colon,
    #[token(".")]
    Dot,
    #[token("+")]
    Plus,
    #[token("-")]
    Minus,
    #[token("*")]
    Star,
    #[token("/")]
    Slash,
    #[token("%")]
    Percent,
    #[token("&")]
    Amp,
    #[token("|")]
    Pipe,
    #[token("^")]
    Caret,
    #[token("~")]
    Tilde,
    #[token("!")]
    Bang,
    #[token("<<")]
    Shl,
    #[token(">>")]
    Shr,
    #[token("<")]
    Lt,
    #[token("<=")]
    Le,
    #[token(">")]
    Gt,
    #[token(">=")]
    Ge,
    #[token("==")]
    EqEq,
    #[token("!=")]
    NotEq,
    #[token("&&")]
    AndAnd,
    #[token("||")]
    OrOr,
}

fn escape(c: char) -> Option<char> {
    Some(match c {
        'n' => '\n',
        't' => '\t',
        'r' => '\r',
        '0' => '\0',
        '\\' => '\\',
        '\'' => '\'',
        '"' => '"',
        _ => return None,
    })
}

fn unescape_char(slice: &str) -> Option<i64> {
    let inner = &slice[1..slice.len() - 1];
    let mut chars = inner.chars();
    let c = match chars.next()? {
        '\\' => escape(chars.next()?)?,
        c => c,
    };
    Some(c as i64)
}

fn unescape_string(slice: &str) -> Option<String> {
    let inner = &slice[1..slice.len() - 1];
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            out.push(escape(chars.next()?)?);
        } else {
            out.push(c);
        }
    }
    Some(out)
}

/// Split `source` into tokens.
pub fn tokenize(source: &str) -> Result<Vec<Token>, CompileError> {
    let mut lexer = Token::lexer(source);
    let mut tokens = Vec::new();
    while let Some(token) = lexer.next() {
        match token {
            Ok(token) => tokens.push(token),
            Err(()) => {
                return Err(CompileError::InvalidToken {
                    offset: lexer.span().start,
                    text: lexer.slice().to_string(),
                })
            }
        }
    }
    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokenize_operators() {
        let tokens = tokenize("a<=b && c!=0 || d>>2").expect("tokens");
        assert_eq!(
            tokens,
            vec![
                Token::Ident("a".into()),
                Token::Le,
                Token::Ident("b".into()),
                Token::AndAnd,
                Token::Ident("c".into()),
                Token::NotEq,
                Token::Int(0),
                Token::OrOr,
                Token::Ident("d".into()),
                Token::Shr,
                Token::Int(2),
            ]
        );
    }

    #[test]
    fn test_tokenize_literals() {
        let tokens = tokenize(r#"0x1F 42 2.5 1e3 'a' '\n' "x\ty""#).expect("tokens");
        assert_eq!(
            tokens,
            vec![
                Token::Int(31),
                Token::Int(42),
                Token::Float(2.5),
                Token::Float(1000.0),
                Token::Int(97),
                Token::Int(10),
                Token::Str("x\ty".into()),
            ]
        );
    }

    #[test]
    fn test_sizeof_is_keyword() {
        let tokens = tokenize("sizeof(sizeofx)").expect("tokens");
        assert_eq!(
            tokens,
            vec![
                Token::Sizeof,
                Token::LParen,
                Token::Ident("sizeofx".into()),
                Token::RParen,
            ]
        );
    }

    #[test]
    fn test_invalid_token_reports_offset() {
        let err = tokenize("a + $b").unwrap_err();
        assert_eq!(
            err,
            CompileError::InvalidToken {
                offset: 4,
                text: "$".into()
            }
        );
    }
}
