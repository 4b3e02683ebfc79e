//! 任务命令语言的抽象语法树
//!
//! 每个节点都保留解析时的源区间。`Display` 输出命令的规范形式，
//! 重新解析后得到的语法树除区间外完全相同。

use crate::lexer::lex;
use crate::parser::join_value_run;
use crate::token::{quote, Span, Token, TokenKind};
use serde::Serialize;
use std::fmt;

/// 命令类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Intent {
    Create,
    Update,
    Filter,
    View,
    Context,
}

impl Intent {
    pub fn as_str(self) -> &'static str {
        match self {
            Intent::Create => "create",
            Intent::Update => "update",
            Intent::Filter => "filter",
            Intent::View => "view",
            Intent::Context => "context",
        }
    }

    /// 输出规范形式时使用的动词
    pub fn verb(self) -> &'static str {
        match self {
            Intent::Create => "add",
            Intent::Update => "set",
            Intent::Filter => "find",
            Intent::View => "view",
            Intent::Context => "context",
        }
    }
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 语法树的根节点：一条完整命令
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "command", rename_all = "lowercase")]
pub enum Command {
    Create(CreateCommand),
    Update(UpdateCommand),
    Filter(FilterCommand),
    View(ViewCommand),
    Context(ContextCommand),
}

impl Command {
    pub fn intent(&self) -> Intent {
        match self {
            Command::Create(_) => Intent::Create,
            Command::Update(_) => Intent::Update,
            Command::Filter(_) => Intent::Filter,
            Command::View(_) => Intent::View,
            Command::Context(_) => Intent::Context,
        }
    }

    pub fn span(&self) -> Span {
        match self {
            Command::Create(c) => c.span,
            Command::Update(c) => c.span,
            Command::Filter(c) => c.span,
            Command::View(c) => c.span,
            Command::Context(c) => c.span,
        }
    }

    /// 所有区间清零后的副本，用于比较不同输入的解析结果
    pub fn without_spans(&self) -> Command {
        let mut command = self.clone();
        match &mut command {
            Command::Create(c) => {
                c.span = Span::default();
                c.ops.iter_mut().for_each(Op::clear_spans);
            }
            Command::Update(c) => {
                c.span = Span::default();
                c.ops.iter_mut().for_each(Op::clear_spans);
            }
            Command::Filter(c) => {
                c.span = Span::default();
                c.expr.clear_spans();
            }
            Command::View(c) => c.span = Span::default(),
            Command::Context(c) => c.span = Span::default(),
        }
        command
    }
}

/// `add buy milk due:tomorrow #home`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CreateCommand {
    /// 由非操作的词拼成的标题；由 `title:` 操作提供标题时可以为空
    pub title: String,
    pub ops: Vec<Op>,
    pub span: Span,
}

/// `set #12 state:now +project:work`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UpdateCommand {
    pub target: TargetRef,
    pub ops: Vec<Op>,
    pub span: Span,
}

/// `find state:now and #work`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FilterCommand {
    pub expr: FilterExpr,
    pub span: Span,
}

/// `view today`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ViewCommand {
    pub target: Option<ViewName>,
    pub span: Span,
}

/// `context @phone`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContextCommand {
    pub arg: Option<ContextArg>,
    pub span: Span,
}

/// update的目标
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetRef {
    /// 调用方当前选中的任务，在编译阶段解析
    Selected,
    Id(u64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ViewName {
    Inbox,
    Now,
    Waiting,
    Later,
    Calendar,
}

impl ViewName {
    /// 解析视图名或其别名，不区分大小写
    pub fn from_alias(name: &str) -> Option<ViewName> {
        match name.to_ascii_lowercase().as_str() {
            "inbox" | "i" => Some(ViewName::Inbox),
            "now" | "n" => Some(ViewName::Now),
            "waiting" | "w" => Some(ViewName::Waiting),
            "later" | "l" => Some(ViewName::Later),
            "calendar" | "c" | "today" => Some(ViewName::Calendar),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ViewName::Inbox => "inbox",
            ViewName::Now => "now",
            ViewName::Waiting => "waiting",
            ViewName::Later => "later",
            ViewName::Calendar => "calendar",
        }
    }
}

impl fmt::Display for ViewName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ContextArg {
    Clear,
    Project(String),
    Context(String),
}

/// 操作可以作用的字段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Field {
    Title,
    Notes,
    Due,
    Waiting,
    State,
    Projects,
    Contexts,
    Meta,
}

impl Field {
    /// 解析规范化后的字段名。`id` 和 `text` 只在过滤中出现，没有对应字段
    pub fn from_name(name: &str) -> Option<Field> {
        match name {
            "title" => Some(Field::Title),
            "notes" => Some(Field::Notes),
            "due" => Some(Field::Due),
            "waiting" => Some(Field::Waiting),
            "state" => Some(Field::State),
            "projects" => Some(Field::Projects),
            "contexts" => Some(Field::Contexts),
            "meta" => Some(Field::Meta),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Field::Title => "title",
            Field::Notes => "notes",
            Field::Due => "due",
            Field::Waiting => "waiting",
            Field::State => "state",
            Field::Projects => "projects",
            Field::Contexts => "contexts",
            Field::Meta => "meta",
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TagKind {
    Project,
    Context,
}

impl TagKind {
    /// 标签对应的列表字段
    pub fn field(self) -> Field {
        match self {
            TagKind::Project => Field::Projects,
            TagKind::Context => Field::Contexts,
        }
    }

    pub fn sigil(self) -> char {
        match self {
            TagKind::Project => '#',
            TagKind::Context => '@',
        }
    }
}

impl fmt::Display for TagKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TagKind::Project => f.write_str("project"),
            TagKind::Context => f.write_str("context"),
        }
    }
}

/// 操作的值，保留输入原样；由编译器负责trim和解释
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Value {
    pub raw: String,
    pub quoted: bool,
    pub span: Span,
}

impl Value {
    pub fn trimmed(&self) -> &str {
        self.raw.trim()
    }
}

/// create或update命令中的单个修改操作
///
/// 语法层面接受任意字段和操作符的组合，
/// 哪些组合有效由编译器决定
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum Op {
    Set { field: Field, value: Value, span: Span },
    Add { field: Field, value: Value, span: Span },
    Remove { field: Field, value: Value, span: Span },
    Clear { field: Field, span: Span },
    Tag { kind: TagKind, name: String, span: Span },
}

impl Op {
    pub fn span(&self) -> Span {
        match self {
            Op::Set { span, .. }
            | Op::Add { span, .. }
            | Op::Remove { span, .. }
            | Op::Clear { span, .. }
            | Op::Tag { span, .. } => *span,
        }
    }

    /// 简短的可读描述，例如 `set due "tomorrow"`
    pub fn describe(&self) -> String {
        match self {
            Op::Set { field, value, .. } => format!("set {} \"{}\"", field, value.raw),
            Op::Add { field, value, .. } => format!("add {} \"{}\"", field, value.raw),
            Op::Remove { field, value, .. } => format!("remove {} \"{}\"", field, value.raw),
            Op::Clear { field, .. } => format!("clear {}", field),
            Op::Tag { kind, name, .. } => format!("tag {} \"{}\"", kind, name),
        }
    }

    fn clear_spans(&mut self) {
        match self {
            Op::Set { value, span, .. }
            | Op::Add { value, span, .. }
            | Op::Remove { value, span, .. } => {
                value.span = Span::default();
                *span = Span::default();
            }
            Op::Clear { span, .. } | Op::Tag { span, .. } => *span = Span::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BoolOp {
    And,
    Or,
}

impl fmt::Display for BoolOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BoolOp::And => f.write_str("and"),
            BoolOp::Or => f.write_str("or"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PredicateKind {
    State,
    Due,
    Project,
    Context,
    Text,
    Id,
}

impl PredicateKind {
    /// 把规范化后的字段名映射为谓词类型
    pub fn from_field(name: &str) -> Option<PredicateKind> {
        match name {
            "state" => Some(PredicateKind::State),
            "due" => Some(PredicateKind::Due),
            "projects" => Some(PredicateKind::Project),
            "contexts" => Some(PredicateKind::Context),
            "text" => Some(PredicateKind::Text),
            "id" => Some(PredicateKind::Id),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PredicateKind::State => "state",
            PredicateKind::Due => "due",
            PredicateKind::Project => "project",
            PredicateKind::Context => "context",
            PredicateKind::Text => "text",
            PredicateKind::Id => "id",
        }
    }
}

impl fmt::Display for PredicateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 布尔过滤表达式树
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "node", rename_all = "lowercase")]
pub enum FilterExpr {
    Binary {
        op: BoolOp,
        left: Box<FilterExpr>,
        right: Box<FilterExpr>,
        span: Span,
    },
    Not {
        expr: Box<FilterExpr>,
        span: Span,
    },
    Predicate {
        kind: PredicateKind,
        text: String,
        span: Span,
    },
}

impl FilterExpr {
    pub fn binary(op: BoolOp, left: FilterExpr, right: FilterExpr) -> FilterExpr {
        let span = left.span().to(right.span());
        FilterExpr::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
            span,
        }
    }

    pub fn span(&self) -> Span {
        match self {
            FilterExpr::Binary { span, .. }
            | FilterExpr::Not { span, .. }
            | FilterExpr::Predicate { span, .. } => *span,
        }
    }

    /// 按从左到右顺序返回叶子谓词
    pub fn predicates(&self) -> Vec<(PredicateKind, &str)> {
        let mut out = Vec::new();
        self.collect_predicates(&mut out);
        out
    }

    fn collect_predicates<'e>(&'e self, out: &mut Vec<(PredicateKind, &'e str)>) {
        match self {
            FilterExpr::Binary { left, right, .. } => {
                left.collect_predicates(out);
                right.collect_predicates(out);
            }
            FilterExpr::Not { expr, .. } => expr.collect_predicates(out),
            FilterExpr::Predicate { kind, text, .. } => out.push((*kind, text.as_str())),
        }
    }

    fn clear_spans(&mut self) {
        match self {
            FilterExpr::Binary {
                left, right, span, ..
            } => {
                left.clear_spans();
                right.clear_spans();
                *span = Span::default();
            }
            FilterExpr::Not { expr, span } => {
                expr.clear_spans();
                *span = Span::default();
            }
            FilterExpr::Predicate { span, .. } => *span = Span::default(),
        }
    }

    fn precedence(&self) -> u8 {
        match self {
            FilterExpr::Binary { op: BoolOp::Or, .. } => 1,
            FilterExpr::Binary { op: BoolOp::And, .. } => 2,
            FilterExpr::Not { .. } => 3,
            FilterExpr::Predicate { .. } => 4,
        }
    }

    fn fmt_nested(&self, f: &mut fmt::Formatter<'_>, parent: u8, right_side: bool) -> fmt::Result {
        let own = self.precedence();
        let paren = own < parent || (right_side && own == parent && own < 3);
        if paren {
            f.write_str("(")?;
        }
        match self {
            FilterExpr::Binary {
                op, left, right, ..
            } => {
                left.fmt_nested(f, own, false)?;
                write!(f, " {} ", op)?;
                right.fmt_nested(f, own, true)?;
            }
            FilterExpr::Not { expr, .. } => {
                f.write_str("not ")?;
                expr.fmt_nested(f, own, false)?;
            }
            FilterExpr::Predicate { kind, text, .. } => match kind {
                PredicateKind::Text if is_plain_word(text) => f.write_str(text)?,
                PredicateKind::Text => f.write_str(&quote(text))?,
                _ if is_plain_run(text, is_filter_value_token) => write!(f, "{}:{}", kind, text)?,
                _ => write!(f, "{}:{}", kind, quote(text))?,
            },
        }
        if paren {
            f.write_str(")")?;
        }
        Ok(())
    }
}

impl fmt::Display for FilterExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.fmt_nested(f, 0, false)
    }
}

/// `raw` 词法分析后的token都被 `allowed` 接受且拼接后与自身相同时返回true，
/// 也就是不加引号就能原样写回
fn is_plain_run(raw: &str, allowed: fn(&Token<'_>) -> bool) -> bool {
    let (tokens, error) = lex(raw);
    error.is_none()
        && !tokens.is_empty()
        && tokens.iter().all(allowed)
        && join_value_run(&tokens) == raw
}

fn is_op_value_token(token: &Token<'_>) -> bool {
    !token.kind.starts_op()
        && !token.kind.is_open_string()
        && !matches!(
            token.kind,
            TokenKind::Quoted | TokenKind::ProjectTagPrefix | TokenKind::ContextTagPrefix
        )
}

fn is_filter_value_token(token: &Token<'_>) -> bool {
    let keyword = token.kind == TokenKind::Ident
        && ["and", "or", "not"]
            .iter()
            .any(|k| token.text.eq_ignore_ascii_case(k));
    !keyword
        && !token.kind.is_open_string()
        && !matches!(
            token.kind,
            TokenKind::Quoted
                | TokenKind::RParen
                | TokenKind::AndOp
                | TokenKind::OrOp
                | TokenKind::ProjectTagPrefix
                | TokenKind::ContextTagPrefix
        )
}

/// 能作为文本谓词读回的单个标识符
fn is_plain_word(text: &str) -> bool {
    let (tokens, error) = lex(text);
    error.is_none()
        && tokens.len() == 1
        && tokens[0].kind == TokenKind::Ident
        && tokens[0].text == text
        && is_filter_value_token(&tokens[0])
}

/// 把未加引号的值序列按序列写回，只给不能直接写出的空格分隔片段加引号。
/// 写回结果无法拼接回 `raw` 时返回 `None`
fn requoted_run(raw: &str) -> Option<String> {
    let rendered = raw
        .split(' ')
        .map(|fragment| {
            if is_plain_run(fragment, is_op_value_token) {
                fragment.to_string()
            } else {
                quote(fragment)
            }
        })
        .collect::<Vec<_>>()
        .join(" ");
    let (tokens, error) = lex(&rendered);
    let reads_back = error.is_none()
        && tokens.first().is_some_and(|t| t.kind != TokenKind::Quoted)
        && tokens
            .iter()
            .all(|t| t.kind == TokenKind::Quoted || is_op_value_token(t))
        && join_value_run(&tokens) == raw;
    reads_back.then_some(rendered)
}

fn fmt_value(f: &mut fmt::Formatter<'_>, value: &Value) -> fmt::Result {
    if !value.quoted {
        if is_plain_run(&value.raw, is_op_value_token) {
            return f.write_str(&value.raw);
        }
        if let Some(run) = requoted_run(&value.raw) {
            return f.write_str(&run);
        }
    }
    f.write_str(&quote(&value.raw))
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Op::Set { field, value, .. } => {
                write!(f, "{}:", field)?;
                fmt_value(f, value)
            }
            Op::Add { field, value, .. } => {
                write!(f, "+{}:", field)?;
                fmt_value(f, value)
            }
            Op::Remove { field, value, .. } => {
                write!(f, "-{}:", field)?;
                fmt_value(f, value)
            }
            Op::Clear { field, .. } => write!(f, "!{}", field),
            Op::Tag { kind, name, .. } => write!(f, "{}{}", kind.sigil(), name),
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.intent().verb())?;
        match self {
            Command::Create(create) => {
                if !create.title.is_empty() {
                    if is_plain_run(&create.title, is_op_value_token) {
                        write!(f, " {}", create.title)?;
                    } else {
                        write!(f, " {}", quote(&create.title))?;
                    }
                }
                for op in &create.ops {
                    write!(f, " {}", op)?;
                }
            }
            Command::Update(update) => {
                match update.target {
                    TargetRef::Selected => f.write_str(" selected")?,
                    TargetRef::Id(id) => write!(f, " #{}", id)?,
                }
                for op in &update.ops {
                    write!(f, " {}", op)?;
                }
            }
            Command::Filter(filter) => write!(f, " {}", filter.expr)?,
            Command::View(view) => {
                if let Some(target) = view.target {
                    write!(f, " {}", target)?;
                }
            }
            Command::Context(context) => match &context.arg {
                None => {}
                Some(ContextArg::Clear) => f.write_str(" clear")?,
                Some(ContextArg::Project(name)) => write!(f, " #{}", name)?,
                Some(ContextArg::Context(name)) => write!(f, " @{}", name)?,
            },
        }
        Ok(())
    }
}
