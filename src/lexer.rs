//! 任务命令语言的词法分析器
//!
//! 按规则顺序匹配而不是最长匹配：每个位置依次尝试下列规则，
//! 第一个匹配的规则生效。
//!
//! ```text
//!  1. Quoted            "..."，支持 \" 和 \\ 转义，引号已闭合
//!  2. HashNumber        #42
//!  3. ProjectTag        #home
//!  4. ContextTag        @errands
//!  5. *TagPrefix        单独的 # / @
//!  6. SetField          due:   waiting-for :
//!  7. Add/RemoveField   +project:   -context:
//!  8. ClearField        !due
//!  9. Clear/Add/RemoveOp  ! + -
//! 10. 标点              : , ( ) && ||
//! 11. QuoteStart        没有闭合的 "，进入字符串状态
//! 12. Ident             字母、数字、_ 和 -
//! 13. 空白              跳过
//! ```
//!
//! 字符串状态只是为了让输入到一半的内容也能完成词法分析，
//! 交互式高亮依赖这一点。

use crate::error::LexError;
use crate::token::{Position, Span, Token, TokenKind};
use tracing::{debug, trace};

/// 字段规则识别的字段名，长的在前，
/// 保证 `waiting-for` 先于 `waiting`、`projects` 先于 `project` 匹配
pub const FIELD_NAMES: [&str; 14] = [
    "waiting-for",
    "waiting_for",
    "contexts",
    "projects",
    "context",
    "project",
    "waiting",
    "notes",
    "state",
    "title",
    "meta",
    "text",
    "due",
    "id",
];

/// 词法分析器状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LexState {
    Root,
    String,
}

pub struct Lexer<'a> {
    input: &'a str,
    /// 当前位置（字节偏移、行、列）
    position: Position,
    /// 状态栈，栈底是 `Root`
    states: Vec<LexState>,
    failed: bool,
}

impl<'a> Lexer<'a> {
    pub fn new(input: &'a str) -> Self {
        Lexer {
            input,
            position: Position::origin(),
            states: vec![LexState::Root],
            failed: false,
        }
    }

    /// 当前所处的状态
    pub fn state(&self) -> LexState {
        self.states.last().copied().unwrap_or(LexState::Root)
    }

    fn rest(&self) -> &'a str {
        &self.input[self.position.offset..]
    }

    /// 返回当前位置的字符，不推进位置
    fn peek(&self) -> Option<char> {
        self.rest().chars().next()
    }

    /// 返回下一个位置的字符，不推进位置
    fn peek_next(&self) -> Option<char> {
        self.rest().chars().nth(1)
    }

    /// 推进位置一个字符并返回该字符
    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.position.advance(c);
        Some(c)
    }

    /// 推进 `len` 个字节，结束处必须是字符边界
    fn bump_bytes(&mut self, len: usize) {
        let target = self.position.offset + len;
        while self.position.offset < target {
            if self.bump().is_none() {
                break;
            }
        }
    }

    fn skip_whitespace(&mut self) {
        while let Some(c) = self.peek() {
            if c.is_whitespace() {
                self.bump();
            } else {
                break;
            }
        }
    }

    fn bump_while(&mut self, pred: impl Fn(char) -> bool) {
        while let Some(c) = self.peek() {
            if pred(c) {
                self.bump();
            } else {
                break;
            }
        }
    }

    fn token(&self, kind: TokenKind, start: Position) -> Token<'a> {
        let span = Span::new(start, self.position);
        Token::new(kind, span.slice(self.input), span)
    }

    /// 从当前位置开始产生一个长度为 `len` 字节的token
    fn emit(&mut self, kind: TokenKind, len: usize) -> Token<'a> {
        let start = self.position;
        self.bump_bytes(len);
        self.token(kind, start)
    }

    fn next_root(&mut self) -> Option<Result<Token<'a>, LexError>> {
        self.skip_whitespace();
        let c = self.peek()?;
        let rest = self.rest();

        let token = match c {
            '"' => match closing_quote(rest) {
                Some(len) => self.emit(TokenKind::Quoted, len),
                None => {
                    self.states.push(LexState::String);
                    self.emit(TokenKind::QuoteStart, 1)
                }
            },
            '#' => match self.peek_next() {
                Some(n) if n.is_ascii_digit() => {
                    let digits = count_bytes(&rest[1..], |c| c.is_ascii_digit());
                    self.emit(TokenKind::HashNumber, 1 + digits)
                }
                Some(n) if is_tag_start(n) => {
                    let len = count_bytes(&rest[1..], is_ident_continue);
                    self.emit(TokenKind::ProjectTag, 1 + len)
                }
                _ => self.emit(TokenKind::ProjectTagPrefix, 1),
            },
            '@' => match self.peek_next() {
                Some(n) if is_tag_start(n) => {
                    let len = count_bytes(&rest[1..], is_ident_continue);
                    self.emit(TokenKind::ContextTag, 1 + len)
                }
                _ => self.emit(TokenKind::ContextTagPrefix, 1),
            },
            '+' | '-' => match match_field_colon(&rest[1..]) {
                Some(len) if c == '+' => self.emit(TokenKind::AddField, 1 + len),
                Some(len) => self.emit(TokenKind::RemoveField, 1 + len),
                None if c == '+' => self.emit(TokenKind::AddOp, 1),
                None => self.emit(TokenKind::RemoveOp, 1),
            },
            '!' => match match_field_word(&rest[1..]) {
                Some(len) => self.emit(TokenKind::ClearField, 1 + len),
                None => self.emit(TokenKind::ClearOp, 1),
            },
            ':' => self.emit(TokenKind::Colon, 1),
            ',' => self.emit(TokenKind::Comma, 1),
            '(' => self.emit(TokenKind::LParen, 1),
            ')' => self.emit(TokenKind::RParen, 1),
            '&' if self.peek_next() == Some('&') => self.emit(TokenKind::AndOp, 2),
            '|' if self.peek_next() == Some('|') => self.emit(TokenKind::OrOp, 2),
            '*' => self.emit(TokenKind::Ident, 1),
            c if is_ident_start(c) => match match_field_colon(rest) {
                Some(len) => self.emit(TokenKind::SetField, len),
                None => {
                    let start = self.position;
                    self.bump_while(is_ident_continue);
                    self.token(TokenKind::Ident, start)
                }
            },
            c => {
                self.failed = true;
                return Some(Err(LexError::unexpected(c, self.position)));
            }
        };
        Some(Ok(token))
    }

    fn next_string(&mut self) -> Option<Result<Token<'a>, LexError>> {
        let c = self.peek()?;
        let token = match c {
            '"' => {
                self.states.pop();
                self.emit(TokenKind::QuoteEnd, 1)
            }
            '\\' => match self.peek_next() {
                Some(escaped) => self.emit(TokenKind::StringEscape, 1 + escaped.len_utf8()),
                None => self.emit(TokenKind::StringBackslash, 1),
            },
            _ => {
                let start = self.position;
                self.bump_while(|c| c != '"' && c != '\\');
                self.token(TokenKind::StringText, start)
            }
        };
        Some(Ok(token))
    }
}

impl<'a> Iterator for Lexer<'a> {
    type Item = Result<Token<'a>, LexError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        let item = match self.state() {
            LexState::Root => self.next_root(),
            LexState::String => self.next_string(),
        };
        if let Some(Ok(token)) = &item {
            trace!(kind = %token.kind, text = token.text, "token");
        }
        item
    }
}

/// 对 `input` 做词法分析，返回第一次失败之前产生的所有token
/// 以及那次失败
pub fn lex(input: &str) -> (Vec<Token<'_>>, Option<LexError>) {
    let mut tokens = Vec::new();
    let mut error = None;
    for item in Lexer::new(input) {
        match item {
            Ok(token) => tokens.push(token),
            Err(e) => {
                error = Some(e);
                break;
            }
        }
    }
    debug!(tokens = tokens.len(), failed = error.is_some(), "lexed input");
    (tokens, error)
}

fn is_ident_start(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

/// 标签名以字母或 `_` 开头，`@5pm` 是单独的 `@` 加一个词
fn is_tag_start(c: char) -> bool {
    c.is_alphabetic() || c == '_'
}

fn is_ident_continue(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '-'
}

fn count_bytes(s: &str, pred: impl Fn(char) -> bool) -> usize {
    s.chars()
        .take_while(|c| pred(*c))
        .map(char::len_utf8)
        .sum()
}

/// `s` 开头完整引号字面量的长度，包含两侧引号
fn closing_quote(s: &str) -> Option<usize> {
    let mut chars = s.char_indices().skip(1);
    while let Some((i, c)) = chars.next() {
        match c {
            '\\' => {
                chars.next();
            }
            '"' => return Some(i + 1),
            _ => {}
        }
    }
    None
}

/// 在 `s` 开头匹配字段名、可选空白和 `:`
fn match_field_colon(s: &str) -> Option<usize> {
    FIELD_NAMES.iter().find_map(|name| {
        let after = s.strip_prefix(name)?;
        let ws = count_bytes(after, char::is_whitespace);
        after[ws..]
            .starts_with(':')
            .then_some(name.len() + ws + 1)
    })
}

/// 在 `s` 开头匹配完整单词形式的字段名
fn match_field_word(s: &str) -> Option<usize> {
    FIELD_NAMES.iter().find_map(|name| {
        let after = s.strip_prefix(name)?;
        match after.chars().next() {
            Some(c) if is_ident_continue(c) => None,
            _ => Some(name.len()),
        }
    })
}
