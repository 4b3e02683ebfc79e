//! 任务命令语言的语法分析器
//!
//! ## 解析流程图
//!
//! ```text
//! parse()
//!   ├─ 根据开头的动词（或模式提示）选择子解析器
//!   │   ├─ add|create|new        → parse_create()
//!   │   │                            └─ 标题片段 + try_parse_op()
//!   │   ├─ set|edit|update       → parse_update()
//!   │   │                            ├─ parse_target()
//!   │   │                            └─ try_parse_op()*
//!   │   ├─ find|show|list|filter → parse_filter()
//!   │   │                            └─ parse_or_expression()
//!   │   ├─ view                  → parse_view()
//!   │   └─ context               → parse_context()
//!   │
//!   └─ parse_or_expression() (递归下降解析)
//!        └─ parse_and_expression()
//!             └─ parse_not_expression()
//!                  └─ parse_primary_expression()
//!                       ├─ "(" → 分组表达式
//!                       ├─ #tag / @tag → 标签谓词
//!                       ├─ field: → 字段谓词
//!                       └─ 其他 → 文本谓词
//! ```
//!
//! ## 语法优先级（从高到低）
//!
//! 1. **括号分组** `( … )`
//! 2. **NOT操作** `not` / `!`
//! 3. **AND操作** `and` / `&&`
//! 4. **OR操作** `or` / `||`
//!
//! `and` 和 `or` 都是左结合。
//!
//! ## 值序列
//!
//! 不是单个引号字面量的值由一串token拼接而成，token之间用一个空格连接，
//! 但 `:` 和 `,` 与相邻token直接相连。create的标题也按同样规则拼接，
//! 所以 `meta:priority:high` 拼接后和输入完全一致。

use crate::ast::{
    BoolOp, Command, ContextArg, ContextCommand, CreateCommand, Field, FilterCommand, FilterExpr,
    Intent, Op, PredicateKind, TagKind, TargetRef, UpdateCommand, Value, ViewCommand, ViewName,
};
use crate::error::ParseError;
use crate::token::{Position, Span, Token, TokenKind};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::{debug, trace};

/// 调用方提供的模式提示，表示期望哪种命令
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParseMode {
    #[default]
    Auto,
    Create,
    Update,
    Filter,
    View,
    Context,
}

impl ParseMode {
    /// 非auto模式强制的意图
    pub fn intent(self) -> Option<Intent> {
        match self {
            ParseMode::Auto => None,
            ParseMode::Create => Some(Intent::Create),
            ParseMode::Update => Some(Intent::Update),
            ParseMode::Filter => Some(Intent::Filter),
            ParseMode::View => Some(Intent::View),
            ParseMode::Context => Some(Intent::Context),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ParseMode::Auto => "auto",
            ParseMode::Create => "create",
            ParseMode::Update => "update",
            ParseMode::Filter => "filter",
            ParseMode::View => "view",
            ParseMode::Context => "context",
        }
    }
}

impl From<Intent> for ParseMode {
    fn from(intent: Intent) -> Self {
        match intent {
            Intent::Create => ParseMode::Create,
            Intent::Update => ParseMode::Update,
            Intent::Filter => ParseMode::Filter,
            Intent::View => ParseMode::View,
            Intent::Context => ParseMode::Context,
        }
    }
}

impl fmt::Display for ParseMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ParseMode {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(ParseMode::Auto),
            "create" => Ok(ParseMode::Create),
            "update" => Ok(ParseMode::Update),
            "filter" => Ok(ParseMode::Filter),
            "view" => Ok(ParseMode::View),
            "context" => Ok(ParseMode::Context),
            other => Err(ParseError::new(
                format!(
                    "unknown parse mode \"{}\" (expected auto|create|update|filter|view|context)",
                    other
                ),
                None,
            )),
        }
    }
}

/// 识别命令动词，不区分大小写
pub fn verb_intent(word: &str) -> Option<Intent> {
    match word.to_ascii_lowercase().as_str() {
        "add" | "create" | "new" => Some(Intent::Create),
        "set" | "edit" | "update" => Some(Intent::Update),
        "find" | "show" | "list" | "filter" => Some(Intent::Filter),
        "view" => Some(Intent::View),
        "context" => Some(Intent::Context),
        _ => None,
    }
}

/// 去掉字段token的操作符前缀和结尾冒号，
/// 并把别名映射为规范名称
///
/// `+Project :` → `projects`, `!waiting-for` → `waiting`.
pub fn normalize_field_name(text: &str) -> String {
    let name = text
        .trim_start_matches(['+', '-', '!'])
        .trim_end_matches(':')
        .trim()
        .to_lowercase();
    match name.as_str() {
        "waiting-for" | "waiting_for" => "waiting".to_string(),
        "project" => "projects".to_string(),
        "context" => "contexts".to_string(),
        _ => name,
    }
}

/// 把一串token拼接成一个值
///
/// 相邻token之间用一个空格分隔，`:`、`,` 以及以 `:` 结尾的token
/// 与相邻token直接相连。结果会去掉首尾空白
pub fn join_value_run<'t, 'a: 't>(tokens: impl IntoIterator<Item = &'t Token<'a>>) -> String {
    let mut out = String::new();
    let mut glue_next = false;
    for token in tokens {
        let glue_before = matches!(token.kind, TokenKind::Colon | TokenKind::Comma);
        if !out.is_empty() && !glue_next && !glue_before {
            out.push(' ');
        }
        out.push_str(&token.value());
        glue_next = glue_before || (token.kind != TokenKind::Quoted && token.text.ends_with(':'));
    }
    out.trim().to_string()
}

fn is_keyword(token: &Token<'_>, keyword: &str) -> bool {
    token.kind == TokenKind::Ident && token.text.eq_ignore_ascii_case(keyword)
}

fn is_filter_delimiter(token: &Token<'_>) -> bool {
    matches!(
        token.kind,
        TokenKind::RParen | TokenKind::AndOp | TokenKind::OrOp
    ) || is_keyword(token, "and")
        || is_keyword(token, "or")
        || is_keyword(token, "not")
}

fn tag_name<'a>(token: &Token<'a>) -> &'a str {
    &token.text[1..]
}

pub struct Parser<'a> {
    tokens: &'a [Token<'a>],
    position: usize,
    mode: ParseMode,
}

impl<'a> Parser<'a> {
    pub fn new(tokens: &'a [Token<'a>]) -> Self {
        Self {
            tokens,
            position: 0,
            mode: ParseMode::Auto,
        }
    }

    pub fn with_mode(mut self, mode: ParseMode) -> Self {
        self.mode = mode;
        self
    }

    /// 返回当前token，不推进位置
    fn peek(&self) -> Option<&'a Token<'a>> {
        self.tokens.get(self.position)
    }

    /// 返回下一个token，不推进位置
    fn peek_next(&self) -> Option<&'a Token<'a>> {
        self.tokens.get(self.position + 1)
    }

    /// 返回当前token并推进位置
    fn advance(&mut self) -> Option<&'a Token<'a>> {
        let token = self.tokens.get(self.position)?;
        self.position += 1;
        Some(token)
    }

    /// 期望指定类型的token并推进位置，否则报错
    fn expect(&mut self, kind: TokenKind, what: &str) -> Result<&'a Token<'a>, ParseError> {
        match self.peek() {
            Some(token) if token.kind == kind => {
                self.position += 1;
                Ok(token)
            }
            Some(token) => Err(ParseError::at_position(
                format!("expected {}, found \"{}\"", what, token.text),
                token.span,
            )),
            None => Err(ParseError::at_position(
                format!("expected {}, but reached end of input", what),
                self.eof_span(),
            )),
        }
    }

    /// 最后一个token之后的空区间
    fn eof_span(&self) -> Span {
        let end = self
            .tokens
            .last()
            .map(|t| t.span.end)
            .unwrap_or_else(Position::origin);
        Span::point(end)
    }

    /// 从 `start` 到当前位置已消费token的区间
    fn span_from(&self, start: usize) -> Span {
        let first = self.tokens.get(start).map(|t| t.span);
        let last = self.position.checked_sub(1).and_then(|i| self.tokens.get(i)).map(|t| t.span);
        match (first, last) {
            (Some(first), Some(last)) if self.position > start => first.to(last),
            (Some(first), _) => Span::point(first.start),
            _ => self.eof_span(),
        }
    }

    fn unexpected(token: &Token<'_>, expected: &str) -> ParseError {
        ParseError::at_position(
            format!("unexpected token \"{}\" (expected {})", token.text, expected),
            token.span,
        )
    }

    fn expect_end(&self) -> Result<(), ParseError> {
        match self.peek() {
            Some(token) => Err(Self::unexpected(token, "end of input")),
            None => Ok(()),
        }
    }

    /// 开头token是 `intent` 的动词时消费它
    fn eat_verb(&mut self, intent: Intent) {
        if let Some(token) = self.peek() {
            if token.kind == TokenKind::Ident && verb_intent(token.text) == Some(intent) {
                self.position += 1;
            }
        }
    }

    pub fn parse(&mut self) -> Result<Command, ParseError> {
        if let Some(open) = self.tokens.iter().find(|t| t.kind.is_open_string()) {
            return Err(ParseError::at_position("unterminated string", open.span));
        }

        let leading = self
            .peek()
            .filter(|t| t.kind == TokenKind::Ident)
            .and_then(|t| verb_intent(t.text));

        let intent = match (leading, self.mode.intent()) {
            (Some(verb), _) => verb,
            (None, Some(forced)) => forced,
            (None, None) => {
                return Err(match self.peek() {
                    Some(token) => ParseError::at_position(
                        format!("expected command verb, found \"{}\"", token.text),
                        token.span,
                    ),
                    None => ParseError::at_position("expected command verb", self.eof_span()),
                });
            }
        };
        debug!(%intent, mode = %self.mode, "dispatching command");

        let command = match intent {
            Intent::Create => self.parse_create()?,
            Intent::Update => self.parse_update()?,
            Intent::Filter => self.parse_filter()?,
            Intent::View => self.parse_view()?,
            Intent::Context => self.parse_context()?,
        };
        self.expect_end()?;
        Ok(command)
    }

    fn parse_create(&mut self) -> Result<Command, ParseError> {
        let start = self.position;
        self.eat_verb(Intent::Create);

        let mut fragments = Vec::new();
        let mut ops = Vec::new();
        while let Some(token) = self.peek() {
            if let Some(op) = self.try_parse_op()? {
                ops.push(op);
            } else {
                trace!(text = token.text, "title fragment");
                fragments.push(token);
                self.position += 1;
            }
        }

        let span = self.span_from(start);
        let title = join_value_run(fragments);
        let has_title_op = ops.iter().any(|op| {
            matches!(
                op,
                Op::Set {
                    field: Field::Title,
                    ..
                }
            )
        });
        if title.is_empty() && !has_title_op {
            return Err(ParseError::at_position("expected a task title", span));
        }

        Ok(Command::Create(CreateCommand { title, ops, span }))
    }

    fn parse_update(&mut self) -> Result<Command, ParseError> {
        let start = self.position;
        self.eat_verb(Intent::Update);

        let target = self.parse_target()?;
        let mut ops = Vec::new();
        while let Some(token) = self.peek() {
            match self.try_parse_op()? {
                Some(op) => ops.push(op),
                None => return Err(Self::unexpected(token, "an operation")),
            }
        }

        Ok(Command::Update(UpdateCommand {
            target,
            ops,
            span: self.span_from(start),
        }))
    }

    /// 读取可选的update目标
    ///
    /// `#12` 和 `12` 是任务ID，`selected|it|this|that` 表示调用方当前选中的任务，
    /// 省略目标时同样表示选中的任务
    fn parse_target(&mut self) -> Result<TargetRef, ParseError> {
        let Some(token) = self.peek() else {
            return Ok(TargetRef::Selected);
        };
        match token.kind {
            TokenKind::HashNumber => {
                self.position += 1;
                parse_id(&token.text[1..], token.span).map(TargetRef::Id)
            }
            TokenKind::Ident => {
                let lower = token.text.to_ascii_lowercase();
                if matches!(lower.as_str(), "selected" | "it" | "this" | "that") {
                    self.position += 1;
                    Ok(TargetRef::Selected)
                } else if token.text.chars().all(|c| c.is_ascii_digit()) {
                    self.position += 1;
                    parse_id(token.text, token.span).map(TargetRef::Id)
                } else {
                    Err(ParseError::at_position(
                        format!("invalid update target \"{}\"", token.text),
                        token.span,
                    ))
                }
            }
            _ if self.at_op_start() => Ok(TargetRef::Selected),
            _ => Err(ParseError::at_position(
                format!("invalid update target \"{}\"", token.text),
                token.span,
            )),
        }
    }

    /// 当前token是否开始一个操作
    fn at_op_start(&self) -> bool {
        match self.peek() {
            Some(token) if token.kind.starts_op() => true,
            Some(token) if matches!(token.kind, TokenKind::AddOp | TokenKind::RemoveOp) => {
                self.peek_next().is_some_and(|next| {
                    matches!(next.kind, TokenKind::ProjectTag | TokenKind::ContextTag)
                        && token.touches(next)
                })
            }
            _ => false,
        }
    }

    /// 当前位置是操作开头时解析一个操作
    fn try_parse_op(&mut self) -> Result<Option<Op>, ParseError> {
        let Some(token) = self.peek() else {
            return Ok(None);
        };
        if matches!(
            token.kind,
            TokenKind::ProjectTagPrefix | TokenKind::ContextTagPrefix
        ) {
            return Err(ParseError::at_position(
                format!("expected a name after \"{}\"", token.text),
                token.span,
            ));
        }
        if !self.at_op_start() {
            return Ok(None);
        }
        self.position += 1;

        let op = match token.kind {
            TokenKind::ProjectTag | TokenKind::ContextTag => Op::Tag {
                kind: tag_kind(token.kind),
                name: tag_name(token).to_string(),
                span: token.span,
            },
            TokenKind::AddOp | TokenKind::RemoveOp => {
                let Some(tag) = self.advance() else {
                    return Err(ParseError::at_position("expected a tag", token.span));
                };
                let span = token.span.to(tag.span);
                let kind = tag_kind(tag.kind);
                if token.kind == TokenKind::AddOp {
                    Op::Tag {
                        kind,
                        name: tag_name(tag).to_string(),
                        span,
                    }
                } else {
                    Op::Remove {
                        field: kind.field(),
                        value: Value {
                            raw: tag_name(tag).to_string(),
                            quoted: false,
                            span: tag.span,
                        },
                        span,
                    }
                }
            }
            TokenKind::ClearField => {
                let field = self.op_field(token)?;
                Op::Clear {
                    field,
                    span: token.span,
                }
            }
            _ => {
                let field = self.op_field(token)?;
                let value = self.parse_op_value(token, field)?;
                let span = token.span.to(value.span);
                match token.kind {
                    TokenKind::AddField => Op::Add { field, value, span },
                    TokenKind::RemoveField => Op::Remove { field, value, span },
                    _ => Op::Set { field, value, span },
                }
            }
        };
        trace!(op = ?op, "operation");
        Ok(Some(op))
    }

    fn op_field(&self, token: &Token<'_>) -> Result<Field, ParseError> {
        let name = normalize_field_name(token.text);
        Field::from_name(&name).ok_or_else(|| {
            ParseError::at_position(format!("field \"{}\" cannot be modified", name), token.span)
        })
    }

    /// 读取操作的值：单个引号字面量，或者直到下一个操作开头的token序列
    fn parse_op_value(&mut self, field_token: &Token<'_>, field: Field) -> Result<Value, ParseError> {
        if let Some(token) = self.peek() {
            if token.kind == TokenKind::Quoted {
                self.position += 1;
                return Ok(Value {
                    raw: token.value(),
                    quoted: true,
                    span: token.span,
                });
            }
        }

        let start = self.position;
        while self.peek().is_some() && !self.at_op_start() {
            if let Some(token) = self.peek() {
                if matches!(
                    token.kind,
                    TokenKind::ProjectTagPrefix | TokenKind::ContextTagPrefix
                ) {
                    break;
                }
            }
            self.position += 1;
        }
        let run = &self.tokens[start..self.position];
        let raw = join_value_run(run);
        if raw.is_empty() {
            return Err(ParseError::at_position(
                format!("expected value for \"{}\"", field),
                field_token.span,
            ));
        }
        Ok(Value {
            raw,
            quoted: false,
            span: self.span_from(start),
        })
    }

    fn parse_filter(&mut self) -> Result<Command, ParseError> {
        let start = self.position;
        self.eat_verb(Intent::Filter);
        if self.peek().is_none() {
            return Err(ParseError::at_position(
                "expected filter expression",
                self.eof_span(),
            ));
        }
        let expr = self.parse_or_expression()?;
        Ok(Command::Filter(FilterCommand {
            expr,
            span: self.span_from(start),
        }))
    }

    fn at_or(&self) -> bool {
        self.peek()
            .is_some_and(|t| t.kind == TokenKind::OrOp || is_keyword(t, "or"))
    }

    fn at_and(&self) -> bool {
        self.peek()
            .is_some_and(|t| t.kind == TokenKind::AndOp || is_keyword(t, "and"))
    }

    fn at_not(&self) -> bool {
        self.peek()
            .is_some_and(|t| t.kind == TokenKind::ClearOp || is_keyword(t, "not"))
    }

    /// 解析OR表达式（最低优先级）
    ///
    /// 语法: `and_expr (OR and_expr)*`
    fn parse_or_expression(&mut self) -> Result<FilterExpr, ParseError> {
        let mut left = self.parse_and_expression()?;

        while self.at_or() {
            self.position += 1; // OR
            let right = self.parse_and_expression()?;
            left = FilterExpr::binary(BoolOp::Or, left, right);
        }

        Ok(left)
    }

    /// 解析AND表达式
    ///
    /// 语法: `not_expr (AND not_expr)*`
    fn parse_and_expression(&mut self) -> Result<FilterExpr, ParseError> {
        let mut left = self.parse_not_expression()?;

        while self.at_and() {
            self.position += 1; // AND
            let right = self.parse_not_expression()?;
            left = FilterExpr::binary(BoolOp::And, left, right);
        }

        Ok(left)
    }

    /// 解析NOT表达式，可以连续取反
    ///
    /// `!field:value` 会被词法分析成ClearField加冒号，
    /// 这里按取反的字段谓词处理
    fn parse_not_expression(&mut self) -> Result<FilterExpr, ParseError> {
        if let Some(token) = self.peek() {
            if token.kind == TokenKind::ClearField && self.peek_next().is_some_and(|n| n.kind == TokenKind::Colon) {
                self.position += 2;
                let predicate = self.parse_field_predicate(token)?;
                let span = token.span.to(predicate.span());
                return Ok(FilterExpr::Not {
                    expr: Box::new(predicate),
                    span,
                });
            }
        }

        if self.at_not() {
            let not = self.advance();
            let expr = self.parse_not_expression()?;
            let span = not.map(|t| t.span.to(expr.span())).unwrap_or_else(|| expr.span());
            Ok(FilterExpr::Not {
                expr: Box::new(expr),
                span,
            })
        } else {
            self.parse_primary_expression()
        }
    }

    /// 解析分组表达式或谓词
    fn parse_primary_expression(&mut self) -> Result<FilterExpr, ParseError> {
        let Some(token) = self.peek() else {
            return Err(ParseError::at_position(
                "expected filter term, but reached end of input",
                self.eof_span(),
            ));
        };

        match token.kind {
            TokenKind::LParen => {
                self.position += 1;
                let expr = self.parse_or_expression()?;
                self.expect(TokenKind::RParen, "\")\"")?;
                Ok(expr)
            }
            TokenKind::ProjectTag | TokenKind::ContextTag => {
                self.position += 1;
                let kind = match token.kind {
                    TokenKind::ProjectTag => PredicateKind::Project,
                    _ => PredicateKind::Context,
                };
                Ok(FilterExpr::Predicate {
                    kind,
                    text: tag_name(token).to_string(),
                    span: token.span,
                })
            }
            TokenKind::ProjectTagPrefix | TokenKind::ContextTagPrefix => Err(ParseError::at_position(
                format!("expected a name after \"{}\"", token.text),
                token.span,
            )),
            TokenKind::SetField => {
                self.position += 1;
                self.parse_field_predicate(token)
            }
            _ if is_filter_delimiter(token) => Err(Self::unexpected(token, "a filter term")),
            _ => {
                let (text, span) = self.parse_filter_value();
                Ok(FilterExpr::Predicate {
                    kind: PredicateKind::Text,
                    text,
                    span,
                })
            }
        }
    }

    /// 读取字段token后面的值并构造谓词
    fn parse_field_predicate(&mut self, field_token: &Token<'_>) -> Result<FilterExpr, ParseError> {
        let field = normalize_field_name(field_token.text);
        let (text, value_span) = self.parse_filter_value();
        if text.trim().is_empty() {
            return Err(ParseError::at_position(
                format!("expected value for \"{}\"", field),
                field_token.span,
            ));
        }
        let span = field_token.span.to(value_span);
        let predicate = match PredicateKind::from_field(&field) {
            Some(kind) => FilterExpr::Predicate {
                kind,
                text: text.trim().to_string(),
                span,
            },
            None => FilterExpr::Predicate {
                kind: PredicateKind::Text,
                text: format!("{}:{}", field, text.trim()),
                span,
            },
        };
        Ok(predicate)
    }

    /// 读取过滤值：单个引号字面量，或者直到下一个分隔符的token序列
    fn parse_filter_value(&mut self) -> (String, Span) {
        if let Some(token) = self.peek() {
            if token.kind == TokenKind::Quoted {
                self.position += 1;
                return (token.value(), token.span);
            }
        }
        let start = self.position;
        while let Some(token) = self.peek() {
            if is_filter_delimiter(token) {
                break;
            }
            self.position += 1;
        }
        let text = join_value_run(&self.tokens[start..self.position]);
        (text, self.span_from(start))
    }

    fn parse_view(&mut self) -> Result<Command, ParseError> {
        let start = self.position;
        self.eat_verb(Intent::View);

        let target = match self.peek() {
            None => None,
            Some(token) => {
                let name = (token.kind == TokenKind::Ident)
                    .then(|| ViewName::from_alias(token.text))
                    .flatten();
                match name {
                    Some(name) => {
                        self.position += 1;
                        Some(name)
                    }
                    None => {
                        return Err(ParseError::at_position(
                            format!(
                                "unknown view \"{}\" (expected inbox|now|waiting|later|calendar)",
                                token.text
                            ),
                            token.span,
                        ))
                    }
                }
            }
        };

        Ok(Command::View(ViewCommand {
            target,
            span: self.span_from(start),
        }))
    }

    fn parse_context(&mut self) -> Result<Command, ParseError> {
        let start = self.position;
        self.eat_verb(Intent::Context);

        let arg = match self.peek() {
            None => None,
            Some(token) => {
                let arg = match token.kind {
                    TokenKind::Ident if token.text.eq_ignore_ascii_case("clear") => ContextArg::Clear,
                    TokenKind::ProjectTag => ContextArg::Project(tag_name(token).to_string()),
                    TokenKind::ContextTag => ContextArg::Context(tag_name(token).to_string()),
                    _ => {
                        return Err(ParseError::at_position(
                            format!("invalid context argument \"{}\"", token.text),
                            token.span,
                        ))
                    }
                };
                self.position += 1;
                Some(arg)
            }
        };

        Ok(Command::Context(ContextCommand {
            arg,
            span: self.span_from(start),
        }))
    }
}

fn tag_kind(kind: TokenKind) -> TagKind {
    match kind {
        TokenKind::ContextTag => TagKind::Context,
        _ => TagKind::Project,
    }
}

fn parse_id(digits: &str, span: Span) -> Result<u64, ParseError> {
    digits
        .parse::<u64>()
        .map_err(|_| ParseError::at_position(format!("invalid task id \"{}\"", digits), span))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::lex;
    use rstest::rstest;

    fn parse_string(input: &str) -> Result<Command, ParseError> {
        parse_with_mode(input, ParseMode::Auto)
    }

    fn parse_with_mode(input: &str, mode: ParseMode) -> Result<Command, ParseError> {
        let (tokens, error) = lex(input);
        assert!(error.is_none(), "unexpected lex error: {:?}", error);
        Parser::new(&tokens).with_mode(mode).parse()
    }

    fn value(raw: &str) -> String {
        raw.to_string()
    }

    fn ops_of(command: &Command) -> &[Op] {
        match command {
            Command::Create(c) => &c.ops,
            Command::Update(u) => &u.ops,
            _ => panic!("expected create or update, got {:?}", command),
        }
    }

    #[test]
    fn test_create_with_tags_and_due() {
        let command = parse_string("add buy milk due:tomorrow #home @errands waiting:alex").unwrap();
        let Command::Create(create) = &command else {
            panic!("expected create command");
        };
        assert_eq!(create.title, "buy milk");
        let ops: Vec<_> = create.ops.iter().map(Op::describe).collect();
        assert_eq!(
            ops,
            vec![
                "set due \"tomorrow\"",
                "tag project \"home\"",
                "tag context \"errands\"",
                "set waiting \"alex\"",
            ]
        );
    }

    #[test]
    fn test_create_title_only_from_set_title() {
        let command = parse_string("new title:\"Plan trip\"").unwrap();
        let Command::Create(create) = &command else {
            panic!("expected create command");
        };
        assert_eq!(create.title, "");
        assert!(matches!(
            &create.ops[0],
            Op::Set { field: Field::Title, value, .. } if value.raw == "Plan trip" && value.quoted
        ));
    }

    #[test]
    fn test_create_rejects_missing_title() {
        let err = parse_string("add #home").unwrap_err();
        assert!(err.message.contains("title"));
    }

    #[test]
    fn test_create_quoted_title_keeps_hashtag() {
        let Command::Create(create) = parse_string(r#"add "email #hashtag""#).unwrap() else {
            panic!("expected create command");
        };
        assert_eq!(create.title, "email #hashtag");
        assert!(create.ops.is_empty());
    }

    #[test]
    fn test_value_run_rejoins_meta() {
        let command = parse_string("add report meta:priority:high , owner:me").unwrap();
        match &ops_of(&command)[0] {
            Op::Set { field, value, .. } => {
                assert_eq!(*field, Field::Meta);
                assert_eq!(value.raw, "priority:high,owner:me");
                assert!(!value.quoted);
            }
            other => panic!("expected set op, got {:?}", other),
        }
    }

    #[test]
    fn test_quoted_value_ends_op() {
        let Command::Create(create) = parse_string(r#"add notes:"call him" buy milk"#).unwrap() else {
            panic!("expected create command");
        };
        assert_eq!(create.title, "buy milk");
        assert!(matches!(&create.ops[0], Op::Set { field: Field::Notes, value, .. } if value.raw == "call him"));
    }

    #[test]
    fn test_op_value_required() {
        let err = parse_string("add milk due: #home").unwrap_err();
        assert_eq!(err.message, "expected value for \"due\"");
    }

    #[test]
    fn test_id_is_not_assignable() {
        let err = parse_string("add milk id:4").unwrap_err();
        assert_eq!(err.message, "field \"id\" cannot be modified");
    }

    #[test]
    fn test_update_with_set_add_clear() {
        let Command::Update(update) = parse_string("set selected state:now +project:work !due").unwrap() else {
            panic!("expected update command");
        };
        assert_eq!(update.target, TargetRef::Selected);
        let ops: Vec<_> = update.ops.iter().map(Op::describe).collect();
        assert_eq!(
            ops,
            vec!["set state \"now\"", "add projects \"work\"", "clear due"]
        );
    }

    #[rstest]
    #[case("set #42 state:now", TargetRef::Id(42))]
    #[case("edit 7 state:now", TargetRef::Id(7))]
    #[case("update it state:now", TargetRef::Selected)]
    #[case("set This state:now", TargetRef::Selected)]
    #[case("set that state:now", TargetRef::Selected)]
    #[case("set state:now", TargetRef::Selected)]
    #[case("set", TargetRef::Selected)]
    fn test_update_targets(#[case] input: &str, #[case] expected: TargetRef) {
        let Command::Update(update) = parse_string(input).unwrap() else {
            panic!("expected update command");
        };
        assert_eq!(update.target, expected);
    }

    #[test]
    fn test_invalid_update_target() {
        let err = parse_string("set banana state:now").unwrap_err();
        assert!(err.message.contains("invalid update target"));
        assert_eq!(err.span.map(|s| s.start.offset), Some(4));
    }

    #[test]
    fn test_update_rejects_stray_words() {
        let err = parse_string("set 4 ( state:now").unwrap_err();
        assert!(err.message.starts_with("unexpected token \"(\""));
    }

    #[test]
    fn test_update_tag_shorthands() {
        let command = parse_string("set 3 -#work +@phone #home").unwrap();
        let ops: Vec<_> = ops_of(&command).iter().map(Op::describe).collect();
        assert_eq!(
            ops,
            vec![
                "remove projects \"work\"",
                "tag context \"phone\"",
                "tag project \"home\"",
            ]
        );
    }

    #[test]
    fn test_detached_dash_is_title_text() {
        let Command::Create(create) = parse_string("add fix - bug").unwrap() else {
            panic!("expected create command");
        };
        assert_eq!(create.title, "fix - bug");
    }

    #[test]
    fn test_filter_boolean_expression() {
        let Command::Filter(filter) = parse_string("find state:now and project:work").unwrap() else {
            panic!("expected filter command");
        };
        assert_eq!(filter.expr.to_string(), "state:now and project:work");
        match &filter.expr {
            FilterExpr::Binary { op, left, right, .. } => {
                assert_eq!(*op, BoolOp::And);
                assert!(matches!(left.as_ref(), FilterExpr::Predicate { kind: PredicateKind::State, text, .. } if text == "now"));
                assert!(matches!(right.as_ref(), FilterExpr::Predicate { kind: PredicateKind::Project, text, .. } if text == "work"));
            }
            other => panic!("expected binary expression, got {:?}", other),
        }
    }

    #[test]
    fn test_filter_precedence() {
        let Command::Filter(filter) = parse_string("find #a or #b and not @c").unwrap() else {
            panic!("expected filter command");
        };
        match &filter.expr {
            FilterExpr::Binary { op: BoolOp::Or, right, .. } => match right.as_ref() {
                FilterExpr::Binary { op: BoolOp::And, right, .. } => {
                    assert!(matches!(right.as_ref(), FilterExpr::Not { .. }));
                }
                other => panic!("expected AND on the right, got {:?}", other),
            },
            other => panic!("expected OR at the root, got {:?}", other),
        }
    }

    #[test]
    fn test_filter_left_associative() {
        let Command::Filter(filter) = parse_string("find #a || #b || #c").unwrap() else {
            panic!("expected filter command");
        };
        match &filter.expr {
            FilterExpr::Binary { left, .. } => {
                assert!(matches!(left.as_ref(), FilterExpr::Binary { op: BoolOp::Or, .. }));
            }
            other => panic!("expected binary expression, got {:?}", other),
        }
    }

    #[test]
    fn test_filter_grouping_and_bang() {
        let Command::Filter(filter) = parse_string("show !(state:done || #old) && text:report").unwrap() else {
            panic!("expected filter command");
        };
        assert_eq!(
            filter.expr.to_string(),
            "not (state:done or project:old) and report"
        );
    }

    #[test]
    fn test_filter_negated_field_shorthand() {
        let Command::Filter(filter) = parse_string("list !state:done").unwrap() else {
            panic!("expected filter command");
        };
        match &filter.expr {
            FilterExpr::Not { expr, .. } => assert!(matches!(
                expr.as_ref(),
                FilterExpr::Predicate { kind: PredicateKind::State, text, .. } if text == "done"
            )),
            other => panic!("expected negation, got {:?}", other),
        }
    }

    #[test]
    fn test_filter_missing_value() {
        let err = parse_string("find state:").unwrap_err();
        assert!(err.message.contains("expected value"));
    }

    #[test]
    fn test_filter_missing_paren() {
        let err = parse_string("find (state:now").unwrap_err();
        assert!(err.message.contains("expected \")\""));
    }

    #[test]
    fn test_filter_text_run_and_unknown_field() {
        let Command::Filter(filter) = parse_string("find buy oat milk or notes:urgent").unwrap() else {
            panic!("expected filter command");
        };
        match &filter.expr {
            FilterExpr::Binary { left, right, .. } => {
                assert!(matches!(left.as_ref(), FilterExpr::Predicate { kind: PredicateKind::Text, text, .. } if text == "buy oat milk"));
                assert!(matches!(right.as_ref(), FilterExpr::Predicate { kind: PredicateKind::Text, text, .. } if text == "notes:urgent"));
            }
            other => panic!("expected binary expression, got {:?}", other),
        }
    }

    #[rstest]
    #[case("view today", Some(ViewName::Calendar))]
    #[case("view i", Some(ViewName::Inbox))]
    #[case("VIEW Now", Some(ViewName::Now))]
    #[case("view w", Some(ViewName::Waiting))]
    #[case("view l", Some(ViewName::Later))]
    #[case("view", None)]
    fn test_view_aliases(#[case] input: &str, #[case] expected: Option<ViewName>) {
        let Command::View(view) = parse_string(input).unwrap() else {
            panic!("expected view command");
        };
        assert_eq!(view.target, expected);
    }

    #[test]
    fn test_view_unknown_name() {
        let err = parse_string("view someday").unwrap_err();
        assert!(err.message.starts_with("unknown view \"someday\""));
    }

    #[rstest]
    #[case("context", None)]
    #[case("context clear", Some(ContextArg::Clear))]
    #[case("context #work", Some(ContextArg::Project(value("work"))))]
    #[case("context @phone", Some(ContextArg::Context(value("phone"))))]
    fn test_context_args(#[case] input: &str, #[case] expected: Option<ContextArg>) {
        let Command::Context(context) = parse_string(input).unwrap() else {
            panic!("expected context command");
        };
        assert_eq!(context.arg, expected);
    }

    #[test]
    fn test_context_rejects_trailing_tokens() {
        assert!(parse_string("context clear #x").is_err());
        assert!(parse_string("context banana").is_err());
    }

    #[test]
    fn test_missing_verb() {
        let err = parse_string("buy milk").unwrap_err();
        assert!(err.message.starts_with("expected command verb"));
        let err = parse_string("").unwrap_err();
        assert_eq!(err.message, "expected command verb");
    }

    #[test]
    fn test_forced_mode_without_verb() {
        let command = parse_with_mode("buy milk #home", ParseMode::Create).unwrap();
        assert_eq!(command.intent(), Intent::Create);
        let command = parse_with_mode("state:now", ParseMode::Filter).unwrap();
        assert_eq!(command.intent(), Intent::Filter);
    }

    #[test]
    fn test_forced_mode_prefers_explicit_verb() {
        let command = parse_with_mode("add buy milk", ParseMode::Filter).unwrap();
        assert_eq!(command.intent(), Intent::Create);
    }

    #[test]
    fn test_verbs_are_case_insensitive() {
        assert_eq!(parse_string("ADD milk").unwrap().intent(), Intent::Create);
        assert_eq!(parse_string("Find milk").unwrap().intent(), Intent::Filter);
    }

    #[test]
    fn test_unterminated_string_is_rejected() {
        let err = parse_string("add \"half").unwrap_err();
        assert_eq!(err.message, "unterminated string");
    }

    #[test]
    fn test_tag_prefix_is_rejected() {
        let err = parse_string("add milk #").unwrap_err();
        assert!(err.message.starts_with("expected a name after"));
    }

    #[test]
    fn test_normalize_field_name() {
        assert_eq!(normalize_field_name("+Project :"), "projects");
        assert_eq!(normalize_field_name("!waiting-for"), "waiting");
        assert_eq!(normalize_field_name("waiting_for:"), "waiting");
        assert_eq!(normalize_field_name("-contexts:"), "contexts");
        assert_eq!(normalize_field_name("due:"), "due");
    }

    #[test]
    fn test_spans_cover_command() {
        let input = "add buy milk #home";
        let command = parse_string(input).unwrap();
        let span = command.span();
        assert_eq!(span.start.offset, 0);
        assert_eq!(span.end.offset, input.len());
        for op in ops_of(&command) {
            assert!(op.span().end.offset <= input.len());
            assert!(op.span().start.offset <= op.span().end.offset);
        }
    }
}
