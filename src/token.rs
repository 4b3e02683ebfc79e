//! 任务命令语言的Token定义

use serde::Serialize;
use std::fmt;

/// Token是语言的最小单位，带有类型和位置信息
///
/// `text` 始终是 `span` 覆盖的输入切片，
/// 把token之间被跳过的空白补回去就能还原原始输入
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Token<'a> {
    pub kind: TokenKind,
    pub text: &'a str,
    pub span: Span,
}

impl<'a> Token<'a> {
    pub fn new(kind: TokenKind, text: &'a str, span: Span) -> Self {
        Self { kind, text, span }
    }

    /// token作为值的一部分时贡献的文本
    ///
    /// 完整的引号字面量会去掉引号并处理转义，其他token原样返回
    pub fn value(&self) -> String {
        match self.kind {
            TokenKind::Quoted => unescape_quoted(self.text),
            _ => self.text.to_string(),
        }
    }

    /// `other` 是否紧接在当前token之后（中间没有空白）
    pub fn touches(&self, other: &Token<'_>) -> bool {
        self.span.end.offset == other.span.start.offset
    }
}

/// Token类型
///
/// 变体名称是对外约定的一部分：交互式shell按 [`TokenKind::name`]
/// 配置语法高亮
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum TokenKind {
    // 字面量
    Quoted,     // "buy \"oat\" milk"
    HashNumber, // #42
    ProjectTag, // #home
    ContextTag, // @errands

    // 单独的标记符号，用户输入到一半时出现
    ProjectTagPrefix, // #
    ContextTagPrefix, // @

    // 字段操作
    SetField,    // due:
    AddField,    // +project:
    RemoveField, // -context:
    ClearField,  // !due

    // 单独的操作符
    ClearOp,  // !
    AddOp,    // +
    RemoveOp, // -

    // 标点
    Colon,  // :
    Comma,  // ,
    LParen, // (
    RParen, // )
    AndOp,  // &&
    OrOp,   // ||

    Ident,
    Whitespace,

    // 字符串状态，只在引号未闭合时产生
    QuoteStart,      // "
    StringText,      // 未闭合引号内的普通文本
    StringEscape,    // \x
    StringBackslash, // 末尾单独的反斜杠
    QuoteEnd,        // "
}

impl TokenKind {
    pub const ALL: [TokenKind; 26] = [
        TokenKind::Quoted,
        TokenKind::HashNumber,
        TokenKind::ProjectTag,
        TokenKind::ContextTag,
        TokenKind::ProjectTagPrefix,
        TokenKind::ContextTagPrefix,
        TokenKind::SetField,
        TokenKind::AddField,
        TokenKind::RemoveField,
        TokenKind::ClearField,
        TokenKind::ClearOp,
        TokenKind::AddOp,
        TokenKind::RemoveOp,
        TokenKind::Colon,
        TokenKind::Comma,
        TokenKind::LParen,
        TokenKind::RParen,
        TokenKind::AndOp,
        TokenKind::OrOp,
        TokenKind::Ident,
        TokenKind::Whitespace,
        TokenKind::QuoteStart,
        TokenKind::StringText,
        TokenKind::StringEscape,
        TokenKind::StringBackslash,
        TokenKind::QuoteEnd,
    ];

    /// token类型的稳定名称
    pub fn name(self) -> &'static str {
        match self {
            TokenKind::Quoted => "Quoted",
            TokenKind::HashNumber => "HashNumber",
            TokenKind::ProjectTag => "ProjectTag",
            TokenKind::ContextTag => "ContextTag",
            TokenKind::ProjectTagPrefix => "ProjectTagPrefix",
            TokenKind::ContextTagPrefix => "ContextTagPrefix",
            TokenKind::SetField => "SetField",
            TokenKind::AddField => "AddField",
            TokenKind::RemoveField => "RemoveField",
            TokenKind::ClearField => "ClearField",
            TokenKind::ClearOp => "ClearOp",
            TokenKind::AddOp => "AddOp",
            TokenKind::RemoveOp => "RemoveOp",
            TokenKind::Colon => "Colon",
            TokenKind::Comma => "Comma",
            TokenKind::LParen => "LParen",
            TokenKind::RParen => "RParen",
            TokenKind::AndOp => "AndOp",
            TokenKind::OrOp => "OrOp",
            TokenKind::Ident => "Ident",
            TokenKind::Whitespace => "Whitespace",
            TokenKind::QuoteStart => "QuoteStart",
            TokenKind::StringText => "StringText",
            TokenKind::StringEscape => "StringEscape",
            TokenKind::StringBackslash => "StringBackslash",
            TokenKind::QuoteEnd => "QuoteEnd",
        }
    }

    /// 按稳定名称查找token类型
    pub fn from_name(name: &str) -> Option<TokenKind> {
        TokenKind::ALL.iter().copied().find(|k| k.name() == name)
    }

    /// 在create和update命令中开始一个操作的token
    pub fn starts_op(self) -> bool {
        matches!(
            self,
            TokenKind::SetField
                | TokenKind::AddField
                | TokenKind::RemoveField
                | TokenKind::ClearField
                | TokenKind::ProjectTag
                | TokenKind::ContextTag
        )
    }

    /// 词法分析器字符串状态产生的token
    pub fn is_open_string(self) -> bool {
        matches!(
            self,
            TokenKind::QuoteStart
                | TokenKind::StringText
                | TokenKind::StringEscape
                | TokenKind::StringBackslash
                | TokenKind::QuoteEnd
        )
    }
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// 源文本中的位置
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct Position {
    /// 字节偏移
    pub offset: usize,
    /// 行号，从1开始
    pub line: usize,
    /// 列号，从1开始，按字符计数
    pub column: usize,
}

impl Position {
    pub fn new(offset: usize, line: usize, column: usize) -> Self {
        Self {
            offset,
            line,
            column,
        }
    }

    /// 输入起始位置
    pub fn origin() -> Self {
        Self::new(0, 1, 1)
    }

    /// 越过字符 `c`
    pub fn advance(&mut self, c: char) {
        self.offset += c.len_utf8();
        if c == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
    }
}

/// 源文本中的半开区间 `[start, end)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct Span {
    pub start: Position,
    pub end: Position,
}

impl Span {
    pub fn new(start: Position, end: Position) -> Self {
        Self { start, end }
    }

    /// 同时覆盖 `self` 和 `other` 的区间
    pub fn to(self, other: Span) -> Span {
        let start = if other.start.offset < self.start.offset {
            other.start
        } else {
            self.start
        };
        let end = if other.end.offset > self.end.offset {
            other.end
        } else {
            self.end
        };
        Span { start, end }
    }

    /// 位于 `pos` 的空区间
    pub fn point(pos: Position) -> Span {
        Span {
            start: pos,
            end: pos,
        }
    }

    /// 该区间覆盖的 `input` 切片
    pub fn slice<'a>(&self, input: &'a str) -> &'a str {
        &input[self.start.offset..self.end.offset]
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}-{}:{}",
            self.start.line, self.start.column, self.end.line, self.end.column
        )
    }
}

/// 去掉完整引号字面量两侧的引号并处理转义
pub fn unescape_quoted(text: &str) -> String {
    let inner = text
        .strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .unwrap_or(text);
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(escaped) = chars.next() {
                out.push(escaped);
            }
        } else {
            out.push(c);
        }
    }
    out
}

/// 用双引号包裹 `value`，并转义 `"` 和 `\`
pub fn quote(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for c in value.chars() {
        if c == '"' || c == '\\' {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('"');
    out
}
