//! 按token名称配置的ANSI语法高亮
//!
//! 支持输入到一半的内容：能完成词法分析的部分上色，失败之后的部分保持原样

use crate::lexer::lex;
use crate::token::TokenKind;
use std::collections::HashMap;
use std::fmt::Write;

const RESET: &str = "\x1b[0m";

pub struct Highlighter {
    styles: HashMap<TokenKind, String>,
}

impl Default for Highlighter {
    fn default() -> Self {
        let mut styles = HashMap::new();
        for kind in TokenKind::ALL {
            if let Some(style) = default_style(kind) {
                styles.insert(kind, style.to_string());
            }
        }
        Self { styles }
    }
}

fn default_style(kind: TokenKind) -> Option<&'static str> {
    use TokenKind::*;
    match kind {
        Quoted | QuoteStart | StringText | QuoteEnd => Some("32"),
        StringEscape | StringBackslash => Some("1;32"),
        HashNumber => Some("33"),
        ProjectTag => Some("1;34"),
        ContextTag => Some("1;35"),
        ProjectTagPrefix => Some("34"),
        ContextTagPrefix => Some("35"),
        SetField | AddField | RemoveField | ClearField => Some("36"),
        ClearOp | AddOp | RemoveOp => Some("1;36"),
        AndOp | OrOp => Some("1;33"),
        LParen | RParen => Some("1"),
        Colon | Comma => Some("2"),
        Ident | Whitespace => None,
    }
}

impl Highlighter {
    pub fn new() -> Self {
        Self::default()
    }

    /// 在默认配色的基础上按token名称覆盖。
    /// 未知名称会被跳过，空样式表示去掉颜色
    pub fn with_overrides(overrides: &HashMap<String, String>) -> Self {
        let mut highlighter = Self::default();
        for (name, style) in overrides {
            let Some(kind) = TokenKind::from_name(name) else {
                continue;
            };
            if style.is_empty() {
                highlighter.styles.remove(&kind);
            } else {
                highlighter.styles.insert(kind, style.clone());
            }
        }
        highlighter
    }

    pub fn style(&self, kind: TokenKind) -> Option<&str> {
        self.styles.get(&kind).map(String::as_str)
    }

    /// 返回每个有样式的token都包上SGR转义序列的 `input`，
    /// 去掉转义序列后与 `input` 完全相同
    pub fn highlight(&self, input: &str) -> String {
        let (tokens, _) = lex(input);
        let mut out = String::with_capacity(input.len() * 2);
        let mut cursor = 0;
        for token in &tokens {
            let (start, end) = (token.span.start.offset, token.span.end.offset);
            out.push_str(&input[cursor..start]);
            match self.style(token.kind) {
                Some(style) => {
                    let _ = write!(out, "\x1b[{}m{}{}", style, &input[start..end], RESET);
                }
                None => out.push_str(&input[start..end]),
            }
            cursor = end;
        }
        out.push_str(&input[cursor..]);
        out
    }
}
