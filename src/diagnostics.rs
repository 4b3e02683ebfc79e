//! 附加在解析结果上的诊断信息

use crate::token::Span;
use serde::Serialize;
use std::fmt;

/// 稳定的诊断代码
pub mod codes {
    /// 没有词法规则能接受某个字符
    pub const LEX: &str = "E_LEX";
    /// token不符合语法
    pub const PARSE: &str = "E_PARSE";
    /// 命令被编译器拒绝
    pub const COMPILE: &str = "E_CMD";
    /// 解析出的命令与请求的解析模式不一致
    pub const MODE: &str = "E_MODE";
    /// 命令可以解析但没有任何效果
    pub const NOOP: &str = "W_NOOP";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
    Info,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Error => f.write_str("error"),
            Severity::Warning => f.write_str("warning"),
            Severity::Info => f.write_str("info"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Diagnostic {
    pub severity: Severity,
    pub code: String,
    pub message: String,
    pub span: Option<Span>,
    pub hint: Option<String>,
}

impl Diagnostic {
    pub fn warning(code: &str, message: impl Into<String>, span: Option<Span>) -> Self {
        Self {
            severity: Severity::Warning,
            code: code.to_string(),
            message: message.into(),
            span,
            hint: None,
        }
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }

    /// 输出诊断信息，并在出错区间下方标出 `^`
    ///
    /// ```text
    /// error[E_PARSE]: invalid update target "banana"
    ///   set banana state:now
    ///       ^^^^^^
    /// ```
    pub fn render(&self, input: &str) -> String {
        let mut out = format!("{}[{}]: {}", self.severity, self.code, self.message);
        if let Some(span) = self.span {
            let line_no = span.start.line;
            if let Some(line) = input.lines().nth(line_no.saturating_sub(1)) {
                let width = if span.end.line == span.start.line {
                    span.end.column.saturating_sub(span.start.column).max(1)
                } else {
                    1
                };
                out.push_str(&format!(
                    "\n  {}\n  {}{}",
                    line,
                    " ".repeat(span.start.column.saturating_sub(1)),
                    "^".repeat(width)
                ));
            }
        }
        if let Some(hint) = &self.hint {
            out.push_str(&format!("\n  hint: {}", hint));
        }
        out
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]: {}", self.severity, self.code, self.message)?;
        if let Some(span) = self.span {
            write!(f, " at {}", span)?;
        }
        Ok(())
    }
}
