//! 各个处理阶段的错误类型

use crate::ast::Intent;
use crate::diagnostics::{codes, Diagnostic, Severity};
use crate::token::{Position, Span};

/// 没有词法规则能接受的字符
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{message}")]
pub struct LexError {
    pub message: String,
    pub position: Position,
    pub found: char,
}

impl LexError {
    pub fn unexpected(found: char, position: Position) -> Self {
        Self {
            message: format!("unexpected character \"{}\"", found),
            position,
            found,
        }
    }

    pub fn span(&self) -> Span {
        let mut end = self.position;
        end.advance(self.found);
        Span::new(self.position, end)
    }
}

/// 不符合语法的token
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{message}")]
pub struct ParseError {
    pub message: String,
    pub span: Option<Span>,
}

impl ParseError {
    pub fn new(message: impl Into<String>, span: Option<Span>) -> Self {
        Self {
            message: message.into(),
            span,
        }
    }

    pub fn at_position(message: impl Into<String>, span: Span) -> Self {
        Self {
            message: message.into(),
            span: Some(span),
        }
    }
}

/// 结构合法但语义上被拒绝的命令
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{message}")]
pub struct CompileError {
    pub message: String,
    /// 错误涉及的字段（如果有）
    pub field: Option<String>,
    pub span: Option<Span>,
}

impl CompileError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            field: None,
            span: None,
        }
    }

    pub fn for_field(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            field: Some(field.into()),
            span: None,
        }
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span.get_or_insert(span);
        self
    }
}

/// [`crate::lex`]、[`crate::parse`]、[`crate::compile`] 返回的任意错误
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Lex(#[from] LexError),

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Compile(#[from] CompileError),

    #[error("command does not match parse mode (expected {expected}, found {found})")]
    ModeMismatch {
        expected: Intent,
        found: Intent,
        span: Span,
    },
}

impl Error {
    /// 稳定的诊断代码
    pub fn code(&self) -> &'static str {
        match self {
            Error::Lex(_) => codes::LEX,
            Error::Parse(_) => codes::PARSE,
            Error::Compile(_) => codes::COMPILE,
            Error::ModeMismatch { .. } => codes::MODE,
        }
    }

    pub fn span(&self) -> Option<Span> {
        match self {
            Error::Lex(e) => Some(e.span()),
            Error::Parse(e) => e.span,
            Error::Compile(e) => e.span,
            Error::ModeMismatch { span, .. } => Some(*span),
        }
    }

    pub fn to_diagnostic(&self) -> Diagnostic {
        let hint = match self {
            Error::ModeMismatch { expected, .. } => {
                Some(format!("start the input with a {} verb", expected))
            }
            Error::Compile(CompileError {
                field: Some(field), ..
            }) => Some(format!("check the value given for \"{}\"", field)),
            _ => None,
        };
        Diagnostic {
            severity: Severity::Error,
            code: self.code().to_string(),
            message: self.to_string(),
            span: self.span(),
            hint,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes() {
        let lex: Error = LexError::unexpected('$', Position::origin()).into();
        assert_eq!(lex.code(), "E_LEX");
        let parse: Error = ParseError::new("expected value", None).into();
        assert_eq!(parse.code(), "E_PARSE");
        let compile: Error = CompileError::new("no task selected").into();
        assert_eq!(compile.code(), "E_CMD");
    }

    #[test]
    fn test_lex_error_span_covers_character() {
        let e = LexError::unexpected('é', Position::new(4, 1, 5));
        let span = e.span();
        assert_eq!(span.start.offset, 4);
        assert_eq!(span.end.offset, 6);
        assert_eq!(e.to_string(), "unexpected character \"é\"");
    }

    #[test]
    fn test_mode_mismatch_diagnostic() {
        let e = Error::ModeMismatch {
            expected: Intent::Filter,
            found: Intent::Create,
            span: Span::default(),
        };
        let diagnostic = e.to_diagnostic();
        assert_eq!(diagnostic.code, "E_MODE");
        assert_eq!(diagnostic.severity, Severity::Error);
        assert!(diagnostic.message.starts_with("command does not match parse mode"));
        assert!(diagnostic.hint.is_some());
    }

    #[test]
    fn test_with_span_keeps_first_span() {
        let first = Span::point(Position::new(1, 1, 2));
        let second = Span::point(Position::new(5, 1, 6));
        let e = CompileError::new("x").with_span(first).with_span(second);
        assert_eq!(e.span, Some(first));
    }
}
