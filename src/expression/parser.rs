//! Recursive-descent parser for expressions and queries.
//!
//! Expression grammar:
//!
//! ```text
//! expression := focus [ ":" refinement ]
//! focus      := concept ( "+" concept )*
//! concept    := ID [ TERM ]
//! refinement := item ( [","] item )*          item := attribute | group
//! group      := "{" attribute ( "," attribute )* "}"
//! attribute  := concept "=" ( concept | "(" expression ")" )
//! ```
//!
//! Query grammar:
//!
//! ```text
//! query   := unary ( OR unary )*
//! unary   := "<<" unary | "<" unary | "(" query ")" | expression
//! ```
//!
//! Descendant operators accept any operand syntactically; whether the
//! operand is a plain expression is checked by the evaluator.

use crate::query::QueryNode;

use super::ast::{Attribute, AttributeGroup, AttributeValue, ConceptReference, Expression, Refinement};
use super::error::SyntaxError;
use super::lexer::{Token, TokenKind, tokenize};

/// Parse a single expression.
pub fn parse_expression(input: &str) -> Result<Expression, SyntaxError> {
    let mut parser = Parser::new(tokenize(input)?);
    let expression = parser.expression()?;
    parser.expect_end()?;
    Ok(expression)
}

/// Parse a query.
pub fn parse_query(input: &str) -> Result<QueryNode, SyntaxError> {
    let mut parser = Parser::new(tokenize(input)?);
    let query = parser.query()?;
    parser.expect_end()?;
    Ok(query)
}

/// Deepest nesting of parenthesized values, queries and descendant
/// operators the parser accepts.
pub const MAX_NESTING: usize = 64;

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn new(tokens: Vec<Token>) -> Self {
        Self {
            tokens,
            pos: 0,
            depth: 0,
        }
    }

    fn peek(&self) -> Option<&TokenKind> {
        self.tokens.get(self.pos).map(|t| &t.kind)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn eat(&mut self, kind: &TokenKind) -> bool {
        if self.peek() == Some(kind) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn error_here(&self, expected: &str) -> SyntaxError {
        match self.tokens.get(self.pos) {
            Some(token) => SyntaxError::UnexpectedToken {
                found: token.kind.describe(),
                expected: expected.into(),
                position: token.position,
            },
            None => SyntaxError::UnexpectedEnd {
                expected: expected.into(),
            },
        }
    }

    fn expect(&mut self, kind: &TokenKind, expected: &str) -> Result<(), SyntaxError> {
        if self.eat(kind) {
            Ok(())
        } else {
            Err(self.error_here(expected))
        }
    }

    /// Run `parse` one nesting level deeper.
    fn nested<T>(
        &mut self,
        parse: impl FnOnce(&mut Self) -> Result<T, SyntaxError>,
    ) -> Result<T, SyntaxError> {
        if self.depth >= MAX_NESTING {
            let position = self
                .tokens
                .get(self.pos.saturating_sub(1))
                .map(|t| t.position)
                .unwrap_or_default();
            return Err(SyntaxError::NestingTooDeep {
                limit: MAX_NESTING,
                position,
            });
        }
        self.depth += 1;
        let result = parse(self);
        self.depth -= 1;
        result
    }

    fn expect_end(&self) -> Result<(), SyntaxError> {
        if self.pos == self.tokens.len() {
            Ok(())
        } else {
            Err(self.error_here("end of input"))
        }
    }

    // -----------------------------------------------------------------------
    // Expressions
    // -----------------------------------------------------------------------

    fn expression(&mut self) -> Result<Expression, SyntaxError> {
        let mut focus = vec![self.concept()?];
        while self.eat(&TokenKind::Plus) {
            focus.push(self.concept()?);
        }

        let refinement = if self.eat(&TokenKind::Colon) {
            self.refinement()?
        } else {
            Refinement::default()
        };

        Ok(Expression { focus, refinement })
    }

    fn concept(&mut self) -> Result<ConceptReference, SyntaxError> {
        let id = match self.peek() {
            Some(TokenKind::Id(id)) => *id,
            _ => return Err(self.error_here("concept id")),
        };
        self.pos += 1;

        let mut reference = ConceptReference::new(id);
        if let Some(TokenKind::Term(term)) = self.peek() {
            reference.term = Some(term.clone());
            self.pos += 1;
        }
        Ok(reference)
    }

    fn refinement(&mut self) -> Result<Refinement, SyntaxError> {
        let mut refinement = Refinement::default();
        loop {
            if self.peek() == Some(&TokenKind::LBrace) {
                refinement.groups.push(self.group()?);
            } else {
                refinement.attributes.push(self.attribute()?);
            }

            if self.eat(&TokenKind::Comma) {
                continue;
            }
            if self.peek() == Some(&TokenKind::LBrace) {
                continue;
            }
            break;
        }
        Ok(refinement)
    }

    fn group(&mut self) -> Result<AttributeGroup, SyntaxError> {
        let open = self.advance().map(|t| t.position).unwrap_or_default();
        if self.peek() == Some(&TokenKind::RBrace) {
            return Err(SyntaxError::EmptyGroup { position: open });
        }

        let mut attributes = vec![self.attribute()?];
        while self.eat(&TokenKind::Comma) {
            attributes.push(self.attribute()?);
        }
        self.expect(&TokenKind::RBrace, "'}' or ','")?;
        Ok(AttributeGroup { attributes })
    }

    fn attribute(&mut self) -> Result<Attribute, SyntaxError> {
        let name = self.concept()?;
        self.expect(&TokenKind::Equals, "'='")?;

        let value = if self.eat(&TokenKind::LParen) {
            let nested = self.nested(Self::expression)?;
            self.expect(&TokenKind::RParen, "')'")?;
            AttributeValue::Expression(Box::new(nested))
        } else {
            AttributeValue::Concept(self.concept()?)
        };

        Ok(Attribute { name, value })
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    fn query(&mut self) -> Result<QueryNode, SyntaxError> {
        let mut operands = vec![self.unary()?];
        while self.eat(&TokenKind::Or) {
            operands.push(self.unary()?);
        }

        if operands.len() == 1 {
            Ok(operands.remove(0))
        } else {
            Ok(QueryNode::Union(operands))
        }
    }

    fn unary(&mut self) -> Result<QueryNode, SyntaxError> {
        match self.peek() {
            Some(TokenKind::DescendantOrSelf) => {
                self.pos += 1;
                Ok(QueryNode::DescSelf(Box::new(self.nested(Self::unary)?)))
            }
            Some(TokenKind::Descendant) => {
                self.pos += 1;
                Ok(QueryNode::Desc(Box::new(self.nested(Self::unary)?)))
            }
            Some(TokenKind::LParen) => {
                self.pos += 1;
                let inner = self.nested(Self::query)?;
                self.expect(&TokenKind::RParen, "')'")?;
                Ok(inner)
            }
            Some(TokenKind::Id(_)) => Ok(QueryNode::Expr(self.expression()?)),
            _ => Err(self.error_here("concept id, '<', '<<' or '('")),
        }
    }
}
