//! Tokenizer shared by the expression and query parsers.
//!
//! Produces a flat token list with byte offsets for error reporting.
//! Concept ids are validated here (positive, fits in `u64`) so the parser
//! only ever sees well-formed ids.

use crate::id::ExpressionId;

use super::error::SyntaxError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenKind {
    Id(ExpressionId),
    /// Text between a pair of `|`, trimmed.
    Term(String),
    Plus,
    Colon,
    Comma,
    Equals,
    LBrace,
    RBrace,
    LParen,
    RParen,
    /// `<`
    Descendant,
    /// `<<`
    DescendantOrSelf,
    /// The `OR` keyword (case-insensitive).
    Or,
}

impl TokenKind {
    /// Short description used in error messages.
    pub fn describe(&self) -> String {
        match self {
            TokenKind::Id(id) => format!("concept id {id}"),
            TokenKind::Term(t) => format!("term |{t}|"),
            TokenKind::Plus => "'+'".into(),
            TokenKind::Colon => "':'".into(),
            TokenKind::Comma => "','".into(),
            TokenKind::Equals => "'='".into(),
            TokenKind::LBrace => "'{'".into(),
            TokenKind::RBrace => "'}'".into(),
            TokenKind::LParen => "'('".into(),
            TokenKind::RParen => "')'".into(),
            TokenKind::Descendant => "'<'".into(),
            TokenKind::DescendantOrSelf => "'<<'".into(),
            TokenKind::Or => "OR".into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    /// Byte offset of the token start.
    pub position: usize,
}

/// Split `input` into tokens.
pub fn tokenize(input: &str) -> Result<Vec<Token>, SyntaxError> {
    let mut tokens = Vec::new();
    let mut chars = input.char_indices().peekable();

    while let Some(&(position, ch)) = chars.peek() {
        if ch.is_whitespace() {
            chars.next();
            continue;
        }

        let single = match ch {
            '+' => Some(TokenKind::Plus),
            ':' => Some(TokenKind::Colon),
            ',' => Some(TokenKind::Comma),
            '=' => Some(TokenKind::Equals),
            '{' => Some(TokenKind::LBrace),
            '}' => Some(TokenKind::RBrace),
            '(' => Some(TokenKind::LParen),
            ')' => Some(TokenKind::RParen),
            _ => None,
        };
        if let Some(kind) = single {
            chars.next();
            tokens.push(Token { kind, position });
            continue;
        }

        match ch {
            '<' => {
                chars.next();
                let kind = if chars.next_if(|&(_, c)| c == '<').is_some() {
                    TokenKind::DescendantOrSelf
                } else {
                    TokenKind::Descendant
                };
                tokens.push(Token { kind, position });
            }
            '|' => {
                chars.next();
                let mut term = String::new();
                let mut closed = false;
                for (_, c) in chars.by_ref() {
                    if c == '|' {
                        closed = true;
                        break;
                    }
                    term.push(c);
                }
                if !closed {
                    return Err(SyntaxError::UnterminatedTerm { position });
                }
                tokens.push(Token {
                    kind: TokenKind::Term(term.trim().to_string()),
                    position,
                });
            }
            c if c.is_ascii_digit() => {
                let mut text = String::new();
                while let Some((_, d)) = chars.next_if(|&(_, d)| d.is_ascii_digit()) {
                    text.push(d);
                }
                let id = text
                    .parse::<u64>()
                    .ok()
                    .and_then(ExpressionId::new)
                    .ok_or_else(|| SyntaxError::InvalidConceptId {
                        text: text.clone(),
                        position,
                    })?;
                tokens.push(Token {
                    kind: TokenKind::Id(id),
                    position,
                });
            }
            c if c.is_alphabetic() => {
                let mut word = String::new();
                while let Some((_, w)) = chars.next_if(|&(_, w)| w.is_alphanumeric()) {
                    word.push(w);
                }
                if word.eq_ignore_ascii_case("or") {
                    tokens.push(Token {
                        kind: TokenKind::Or,
                        position,
                    });
                } else {
                    return Err(SyntaxError::UnexpectedToken {
                        found: format!("\"{word}\""),
                        expected: "concept id or operator".into(),
                        position,
                    });
                }
            }
            other => {
                return Err(SyntaxError::UnexpectedCharacter {
                    ch: other,
                    position,
                });
            }
        }
    }

    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(input: &str) -> Vec<TokenKind> {
        tokenize(input).unwrap().into_iter().map(|t| t.kind).collect()
    }

    fn id(raw: u64) -> TokenKind {
        TokenKind::Id(ExpressionId::new(raw).unwrap())
    }

    #[test]
    fn tokenizes_refined_expression() {
        assert_eq!(
            kinds("64572001 |Disease| : { 363698007 = 39057004 }"),
            vec![
                id(64572001),
                TokenKind::Term("Disease".into()),
                TokenKind::Colon,
                TokenKind::LBrace,
                id(363698007),
                TokenKind::Equals,
                id(39057004),
                TokenKind::RBrace,
            ]
        );
    }

    #[test]
    fn tokenizes_query_operators() {
        assert_eq!(
            kinds("<< 1 or < 2 OR 3"),
            vec![
                TokenKind::DescendantOrSelf,
                id(1),
                TokenKind::Or,
                TokenKind::Descendant,
                id(2),
                TokenKind::Or,
                id(3),
            ]
        );
    }

    #[test]
    fn leading_zeros_collapse() {
        assert_eq!(kinds("007"), vec![id(7)]);
    }

    #[test]
    fn zero_id_is_rejected() {
        let err = tokenize("0").unwrap_err();
        assert!(matches!(err, SyntaxError::InvalidConceptId { position: 0, .. }));
    }

    #[test]
    fn overflowing_id_is_rejected() {
        let err = tokenize("99999999999999999999999").unwrap_err();
        assert!(matches!(err, SyntaxError::InvalidConceptId { .. }));
    }

    #[test]
    fn unterminated_term() {
        let err = tokenize("123 |open").unwrap_err();
        assert_eq!(err, SyntaxError::UnterminatedTerm { position: 4 });
    }

    #[test]
    fn stray_character() {
        let err = tokenize("123 ; 4").unwrap_err();
        assert_eq!(
            err,
            SyntaxError::UnexpectedCharacter {
                ch: ';',
                position: 4
            }
        );
    }

    #[test]
    fn unknown_word() {
        let err = tokenize("1 AND 2").unwrap_err();
        assert!(matches!(err, SyntaxError::UnexpectedToken { position: 2, .. }));
    }
}
