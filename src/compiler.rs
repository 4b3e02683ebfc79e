//! 语义编译器：把解析得到的 [`Command`] 转换为可执行的 [`Plan`]
//!
//! 语法层面接受任意字段和操作符的组合，这一步决定哪些组合有意义，
//! 规范化日期、状态和标签列表，并解析update的目标。

use crate::ast::{
    BoolOp, Command, ContextArg, ContextCommand, CreateCommand, Field, FilterCommand, FilterExpr,
    Op, PredicateKind, TargetRef, UpdateCommand, Value, ViewCommand, ViewName,
};
use crate::error::CompileError;
use chrono::{DateTime, Datelike, Days, FixedOffset, NaiveDate, Weekday};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use tracing::{debug, trace};

/// 单次编译的选项
#[derive(Debug, Clone, Default)]
pub struct BuildOptions {
    /// 相对日期的参考时间；为空时使用当前时间
    pub now: Option<DateTime<FixedOffset>>,
    /// 调用方当前选中的任务，用于解析 `selected`
    pub selected_task_id: Option<u64>,
}

/// 规范的任务状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    Inbox,
    Now,
    Waiting,
    Later,
    Done,
}

impl TaskState {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskState::Inbox => "inbox",
            TaskState::Now => "now",
            TaskState::Waiting => "waiting",
            TaskState::Later => "later",
            TaskState::Done => "done",
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskState {
    type Err = CompileError;

    /// 转小写并去掉首尾空白；`todo` 是 `inbox` 的别名
    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_lowercase().as_str() {
            "inbox" | "todo" => Ok(TaskState::Inbox),
            "now" => Ok(TaskState::Now),
            "waiting" => Ok(TaskState::Waiting),
            "later" => Ok(TaskState::Later),
            "done" => Ok(TaskState::Done),
            _ => Err(CompileError::for_field(
                "state",
                format!(
                    "invalid state \"{}\" (expected inbox|now|waiting|later|done)",
                    raw.trim()
                ),
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CreateRequest {
    pub title: String,
    pub notes: String,
    pub state: TaskState,
    pub due_on: Option<NaiveDate>,
    pub waiting_for: Option<String>,
    pub projects: Vec<String>,
    pub contexts: Vec<String>,
    /// `key:value` 条目，每个key一条
    pub meta: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct UpdateRequest {
    pub id: u64,
    pub title: Option<String>,
    pub notes: Option<String>,
    pub state: Option<TaskState>,
    pub due_on: Option<NaiveDate>,
    pub clear_due: bool,
    pub waiting_for: Option<String>,
    pub clear_waiting: bool,
    pub add_projects: Vec<String>,
    pub remove_projects: Vec<String>,
    pub add_contexts: Vec<String>,
    pub remove_contexts: Vec<String>,
    pub set_meta: BTreeMap<String, String>,
    pub remove_meta_keys: Vec<String>,
}

impl UpdateRequest {
    /// 应用该请求不会产生任何修改时返回true
    pub fn is_empty(&self) -> bool {
        *self
            == UpdateRequest {
                id: self.id,
                ..UpdateRequest::default()
            }
    }
}

/// project或context列的过滤条件
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TagMatch {
    /// 至少有一个该类标签的任务
    Any,
    Named(String),
}

/// 任务列表查询
///
/// `expr` 是规范化后的过滤树，以它为准。只有当整棵树是作用于不同列的
/// AND链时才会填充列字段，此时 `flattened` 为true，两者表达同一个过滤条件
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct ListRequest {
    pub state: Option<TaskState>,
    pub project: Option<TagMatch>,
    pub context: Option<TagMatch>,
    pub search: Option<String>,
    pub id: Option<u64>,
    pub due_on: Option<NaiveDate>,
    pub due_only: bool,
    pub expr: Option<FilterExpr>,
    pub flattened: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ViewPlan {
    pub view: Option<ViewName>,
    /// 视图对应的预设列表查询；单独的 `view` 没有
    pub list: Option<ListRequest>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ContextAction {
    Show,
    Clear,
    Project(String),
    Context(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContextPlan {
    pub action: ContextAction,
}

/// 命令编译后的形式
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "plan", content = "request", rename_all = "lowercase")]
pub enum Plan {
    Create(CreateRequest),
    Update(UpdateRequest),
    List(ListRequest),
    View(ViewPlan),
    Context(ContextPlan),
}

impl Plan {
    pub fn kind(&self) -> &'static str {
        match self {
            Plan::Create(_) => "create",
            Plan::Update(_) => "update",
            Plan::List(_) => "list",
            Plan::View(_) => "view",
            Plan::Context(_) => "context",
        }
    }

    /// 该计划对应的列表查询（如果有）
    pub fn list_request(&self) -> Option<&ListRequest> {
        match self {
            Plan::List(list) => Some(list),
            Plan::View(view) => view.list.as_ref(),
            _ => None,
        }
    }
}

/// 基于固定的参考时间和选中任务编译命令
pub struct Compiler {
    today: NaiveDate,
    selected_task_id: Option<u64>,
}

impl Compiler {
    pub fn new(now: DateTime<FixedOffset>) -> Self {
        Self {
            today: now.date_naive(),
            selected_task_id: None,
        }
    }

    pub fn with_selected(mut self, selected_task_id: Option<u64>) -> Self {
        self.selected_task_id = selected_task_id;
        self
    }

    pub fn compile(&self, command: &Command) -> Result<Plan, CompileError> {
        let plan = match command {
            Command::Create(create) => Plan::Create(self.compile_create(create)?),
            Command::Update(update) => Plan::Update(self.compile_update(update)?),
            Command::Filter(filter) => Plan::List(self.compile_filter(filter)?),
            Command::View(view) => Plan::View(compile_view(view)),
            Command::Context(context) => Plan::Context(compile_context(context)),
        };
        debug!(plan = plan.kind(), "compiled command");
        Ok(plan)
    }

    fn compile_create(&self, create: &CreateCommand) -> Result<CreateRequest, CompileError> {
        let mut request = CreateRequest {
            title: create.title.trim().to_string(),
            notes: String::new(),
            state: TaskState::Inbox,
            due_on: None,
            waiting_for: None,
            projects: Vec::new(),
            contexts: Vec::new(),
            meta: Vec::new(),
        };

        for op in &create.ops {
            trace!(op = %op.describe(), "create op");
            self.apply_create_op(&mut request, op)
                .map_err(|e| e.with_span(op.span()))?;
        }

        if request.title.is_empty() {
            return Err(CompileError::for_field("title", "title is required").with_span(create.span));
        }
        Ok(request)
    }

    fn apply_create_op(&self, request: &mut CreateRequest, op: &Op) -> Result<(), CompileError> {
        match op {
            Op::Set { field, value, .. } => match field {
                Field::Title => request.title = non_empty_title(value)?,
                Field::Notes => request.notes = value.trimmed().to_string(),
                Field::Due => request.due_on = Some(self.normalize_date(value.trimmed())?),
                Field::Waiting => request.waiting_for = Some(value.trimmed().to_string()),
                Field::State => request.state = value.trimmed().parse()?,
                Field::Projects => request.projects = dedupe(split_list(value)),
                Field::Contexts => request.contexts = dedupe(split_list(value)),
                Field::Meta => {
                    request.meta.clear();
                    for entry in split_list(value) {
                        upsert_meta_entry(&mut request.meta, &entry)?;
                    }
                }
            },
            Op::Add { field, value, .. } => match field {
                Field::Projects => extend_unique(&mut request.projects, split_list(value)),
                Field::Contexts => extend_unique(&mut request.contexts, split_list(value)),
                Field::Meta => {
                    for entry in split_list(value) {
                        upsert_meta_entry(&mut request.meta, &entry)?;
                    }
                }
                other => return Err(operator_not_supported('+', *other)),
            },
            Op::Remove { .. } => {
                return Err(CompileError::new("remove not supported during create"));
            }
            Op::Clear { field, .. } => match field {
                Field::Notes => request.notes.clear(),
                Field::Due => request.due_on = None,
                Field::Waiting => request.waiting_for = None,
                Field::Projects => request.projects.clear(),
                Field::Contexts => request.contexts.clear(),
                Field::Meta => request.meta.clear(),
                Field::Title | Field::State => return Err(cannot_clear(*field)),
            },
            Op::Tag { kind, name, .. } => {
                let list = match kind.field() {
                    Field::Projects => &mut request.projects,
                    _ => &mut request.contexts,
                };
                extend_unique(list, [name.clone()]);
            }
        }
        Ok(())
    }

    fn resolve_target(&self, target: TargetRef) -> Result<u64, CompileError> {
        match target {
            TargetRef::Id(0) => Err(CompileError::new("invalid task id 0")),
            TargetRef::Id(id) => Ok(id),
            TargetRef::Selected => match self.selected_task_id {
                Some(id) if id > 0 => Ok(id),
                _ => Err(CompileError::new("no task selected")),
            },
        }
    }

    fn compile_update(&self, update: &UpdateCommand) -> Result<UpdateRequest, CompileError> {
        let id = self
            .resolve_target(update.target)
            .map_err(|e| e.with_span(update.span))?;
        let mut request = UpdateRequest {
            id,
            ..UpdateRequest::default()
        };

        for op in &update.ops {
            trace!(op = %op.describe(), "update op");
            self.apply_update_op(&mut request, op)
                .map_err(|e| e.with_span(op.span()))?;
        }

        request.add_projects = dedupe(std::mem::take(&mut request.add_projects));
        request.remove_projects = dedupe(std::mem::take(&mut request.remove_projects));
        request.add_contexts = dedupe(std::mem::take(&mut request.add_contexts));
        request.remove_contexts = dedupe(std::mem::take(&mut request.remove_contexts));
        request.remove_meta_keys = dedupe(std::mem::take(&mut request.remove_meta_keys));
        Ok(request)
    }

    fn apply_update_op(&self, request: &mut UpdateRequest, op: &Op) -> Result<(), CompileError> {
        match op {
            Op::Set { field, value, .. } => match field {
                Field::Title => request.title = Some(non_empty_title(value)?),
                Field::Notes => request.notes = Some(value.trimmed().to_string()),
                Field::State => request.state = Some(value.trimmed().parse()?),
                Field::Due => {
                    request.due_on = Some(self.normalize_date(value.trimmed())?);
                    request.clear_due = false;
                }
                Field::Waiting => {
                    request.waiting_for = Some(value.trimmed().to_string());
                    request.clear_waiting = false;
                }
                Field::Meta => set_meta_entries(request, value)?,
                Field::Projects | Field::Contexts => {
                    return Err(CompileError::for_field(
                        field.as_str(),
                        format!(
                            "cannot set \"{0}\" during update (use +{0}: or -{0}:)",
                            field
                        ),
                    ));
                }
            },
            Op::Add { field, value, .. } => match field {
                Field::Projects => request.add_projects.extend(split_list(value)),
                Field::Contexts => request.add_contexts.extend(split_list(value)),
                Field::Meta => set_meta_entries(request, value)?,
                other => return Err(operator_not_supported('+', *other)),
            },
            Op::Remove { field, value, .. } => match field {
                Field::Projects => request.remove_projects.extend(split_list(value)),
                Field::Contexts => request.remove_contexts.extend(split_list(value)),
                Field::Meta => {
                    for entry in split_list(value) {
                        let key = entry
                            .split_once(':')
                            .map_or(entry.as_str(), |(key, _)| key)
                            .trim()
                            .to_string();
                        if key.is_empty() {
                            return Err(empty_meta_key(&entry));
                        }
                        request.set_meta.remove(&key);
                        request.remove_meta_keys.push(key);
                    }
                }
                other => return Err(operator_not_supported('-', *other)),
            },
            Op::Clear { field, .. } => match field {
                Field::Due => {
                    request.clear_due = true;
                    request.due_on = None;
                }
                Field::Waiting => {
                    request.clear_waiting = true;
                    request.waiting_for = None;
                }
                Field::Notes => request.notes = Some(String::new()),
                other => return Err(cannot_clear(*other)),
            },
            Op::Tag { kind, name, .. } => match kind.field() {
                Field::Projects => request.add_projects.push(name.clone()),
                _ => request.add_contexts.push(name.clone()),
            },
        }
        Ok(())
    }

    fn compile_filter(&self, filter: &FilterCommand) -> Result<ListRequest, CompileError> {
        let expr = self.normalize_expr(&filter.expr)?;
        let mut request = ListRequest::default();

        let mut conjuncts = Vec::new();
        if collect_conjuncts(&expr, &mut conjuncts) && all_distinct(&conjuncts) {
            for (kind, text) in conjuncts {
                fill_column(&mut request, kind, text)?;
            }
            request.flattened = true;
        }
        debug!(flattened = request.flattened, "compiled filter");
        request.expr = Some(expr);
        Ok(request)
    }

    /// 重建过滤树，把每个谓词的文本转换为规范形式
    fn normalize_expr(&self, expr: &FilterExpr) -> Result<FilterExpr, CompileError> {
        Ok(match expr {
            FilterExpr::Binary {
                op,
                left,
                right,
                span,
            } => FilterExpr::Binary {
                op: *op,
                left: Box::new(self.normalize_expr(left)?),
                right: Box::new(self.normalize_expr(right)?),
                span: *span,
            },
            FilterExpr::Not { expr, span } => FilterExpr::Not {
                expr: Box::new(self.normalize_expr(expr)?),
                span: *span,
            },
            FilterExpr::Predicate { kind, text, span } => FilterExpr::Predicate {
                kind: *kind,
                text: self
                    .normalize_predicate(*kind, text)
                    .map_err(|e| e.with_span(*span))?,
                span: *span,
            },
        })
    }

    fn normalize_predicate(&self, kind: PredicateKind, text: &str) -> Result<String, CompileError> {
        let text = text.trim();
        match kind {
            PredicateKind::State if text == WILDCARD => Err(CompileError::for_field(
                "state",
                "wildcard \"*\" is not allowed for state",
            )),
            PredicateKind::State => Ok(text.parse::<TaskState>()?.to_string()),
            PredicateKind::Due if text == WILDCARD => Ok(WILDCARD.to_string()),
            PredicateKind::Due => Ok(self.normalize_date(text)?.to_string()),
            PredicateKind::Id => parse_task_id(text).map(|id| id.to_string()),
            PredicateKind::Project | PredicateKind::Context | PredicateKind::Text => {
                Ok(text.to_string())
            }
        }
    }

    /// 基于参考日期解析日期字面量
    ///
    /// 支持 `today`、`tomorrow`、`next-week`（或 `next week`）、
    /// `YYYY-MM-DD` 格式的日期、星期名（`fri`、`friday`）、
    /// `next <weekday>` 以及 `in N days|weeks`
    pub fn normalize_date(&self, raw: &str) -> Result<NaiveDate, CompileError> {
        let lower = raw.trim().to_lowercase();
        let words: Vec<&str> = lower.split_whitespace().collect();
        let resolved = match words.as_slice() {
            ["today"] => Some(self.today),
            ["tomorrow"] => self.today.checked_add_days(Days::new(1)),
            ["next-week"] | ["next", "week"] => self.today.checked_add_days(Days::new(7)),
            ["next", day] => Weekday::from_str(day)
                .ok()
                .and_then(|weekday| self.weekday_after(weekday, true)),
            ["in", count, unit] => count.parse::<u64>().ok().and_then(|count| match *unit {
                "day" | "days" => self.today.checked_add_days(Days::new(count)),
                "week" | "weeks" => count
                    .checked_mul(7)
                    .and_then(|days| self.today.checked_add_days(Days::new(days))),
                _ => None,
            }),
            [word] if is_iso_date_shape(word) => NaiveDate::parse_from_str(word, "%Y-%m-%d").ok(),
            [word] => Weekday::from_str(word)
                .ok()
                .and_then(|weekday| self.weekday_after(weekday, false)),
            _ => None,
        };
        resolved.ok_or_else(|| {
            CompileError::for_field("due", format!("invalid date format \"{}\"", raw.trim()))
        })
    }

    /// 今天或之后的第一个 `weekday`；`strict` 为true时必须在今天之后
    fn weekday_after(&self, weekday: Weekday, strict: bool) -> Option<NaiveDate> {
        let current = self.today.weekday().num_days_from_monday();
        let wanted = weekday.num_days_from_monday();
        let mut ahead = (wanted + 7 - current) % 7;
        if strict && ahead == 0 {
            ahead = 7;
        }
        self.today.checked_add_days(Days::new(u64::from(ahead)))
    }
}

const WILDCARD: &str = "*";

fn compile_view(view: &ViewCommand) -> ViewPlan {
    let list = view.target.map(|name| {
        let mut list = ListRequest {
            flattened: true,
            ..ListRequest::default()
        };
        match name {
            ViewName::Inbox => list.state = Some(TaskState::Inbox),
            ViewName::Now => list.state = Some(TaskState::Now),
            ViewName::Waiting => list.state = Some(TaskState::Waiting),
            ViewName::Later => list.state = Some(TaskState::Later),
            ViewName::Calendar => list.due_only = true,
        }
        list
    });
    ViewPlan {
        view: view.target,
        list,
    }
}

fn compile_context(context: &ContextCommand) -> ContextPlan {
    let action = match &context.arg {
        None => ContextAction::Show,
        Some(ContextArg::Clear) => ContextAction::Clear,
        Some(ContextArg::Project(name)) => ContextAction::Project(name.clone()),
        Some(ContextArg::Context(name)) => ContextAction::Context(name.clone()),
    };
    ContextPlan { action }
}

/// 收集纯AND链中的谓词。树中包含OR或NOT时返回false
fn collect_conjuncts<'e>(expr: &'e FilterExpr, out: &mut Vec<(PredicateKind, &'e str)>) -> bool {
    match expr {
        FilterExpr::Binary {
            op: BoolOp::And,
            left,
            right,
            ..
        } => collect_conjuncts(left, out) && collect_conjuncts(right, out),
        FilterExpr::Predicate { kind, text, .. } => {
            out.push((*kind, text.as_str()));
            true
        }
        _ => false,
    }
}

fn all_distinct(conjuncts: &[(PredicateKind, &str)]) -> bool {
    conjuncts
        .iter()
        .enumerate()
        .all(|(i, (kind, _))| conjuncts[..i].iter().all(|(seen, _)| seen != kind))
}

/// 根据一个规范化后的谓词设置对应的列
fn fill_column(request: &mut ListRequest, kind: PredicateKind, text: &str) -> Result<(), CompileError> {
    let tag_match = |text: &str| {
        if text == WILDCARD {
            TagMatch::Any
        } else {
            TagMatch::Named(text.to_string())
        }
    };
    match kind {
        PredicateKind::State => request.state = Some(text.parse()?),
        PredicateKind::Due if text == WILDCARD => request.due_only = true,
        PredicateKind::Due => {
            request.due_on = Some(
                NaiveDate::parse_from_str(text, "%Y-%m-%d")
                    .map_err(|_| CompileError::for_field("due", format!("invalid date format \"{}\"", text)))?,
            )
        }
        PredicateKind::Project => request.project = Some(tag_match(text)),
        PredicateKind::Context => request.context = Some(tag_match(text)),
        PredicateKind::Text => request.search = Some(text.to_string()),
        PredicateKind::Id => request.id = Some(parse_task_id(text)?),
    }
    Ok(())
}

fn parse_task_id(text: &str) -> Result<u64, CompileError> {
    let digits = text.strip_prefix('#').unwrap_or(text);
    match digits.parse::<u64>() {
        Ok(id) if id > 0 && digits.bytes().all(|b| b.is_ascii_digit()) => Ok(id),
        _ => Err(CompileError::for_field("id", format!("invalid task id \"{}\"", text))),
    }
}

fn is_iso_date_shape(word: &str) -> bool {
    let bytes = word.as_bytes();
    bytes.len() == 10
        && bytes.iter().enumerate().all(|(i, b)| match i {
            4 | 7 => *b == b'-',
            _ => b.is_ascii_digit(),
        })
}

fn non_empty_title(value: &Value) -> Result<String, CompileError> {
    let title = value.trimmed();
    if title.is_empty() {
        return Err(CompileError::for_field("title", "title cannot be empty"));
    }
    Ok(title.to_string())
}

/// 按逗号拆分值，丢弃空元素
fn split_list(value: &Value) -> Vec<String> {
    value
        .raw
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

/// 去掉重复项，保留第一次出现的
fn dedupe(items: Vec<String>) -> Vec<String> {
    let mut out = Vec::with_capacity(items.len());
    extend_unique(&mut out, items);
    out
}

fn extend_unique(list: &mut Vec<String>, items: impl IntoIterator<Item = String>) {
    for item in items {
        if !list.contains(&item) {
            list.push(item);
        }
    }
}

/// 在第一个冒号处拆分 `key:value`
fn parse_meta_entry(entry: &str) -> Result<(String, String), CompileError> {
    let Some((key, value)) = entry.split_once(':') else {
        return Err(CompileError::for_field(
            "meta",
            format!("invalid meta entry \"{}\" (expected key:value)", entry),
        ));
    };
    let key = key.trim();
    if key.is_empty() {
        return Err(empty_meta_key(entry));
    }
    Ok((key.to_string(), value.trim().to_string()))
}

/// 在 `key:value` 列表中新增或替换某个key的条目
fn upsert_meta_entry(meta: &mut Vec<String>, entry: &str) -> Result<(), CompileError> {
    let (key, value) = parse_meta_entry(entry)?;
    let rendered = format!("{}:{}", key, value);
    let prefix = format!("{}:", key);
    match meta.iter_mut().find(|existing| existing.starts_with(&prefix)) {
        Some(existing) => *existing = rendered,
        None => meta.push(rendered),
    }
    Ok(())
}

fn set_meta_entries(request: &mut UpdateRequest, value: &Value) -> Result<(), CompileError> {
    for entry in split_list(value) {
        let (key, value) = parse_meta_entry(&entry)?;
        request.remove_meta_keys.retain(|pending| *pending != key);
        request.set_meta.insert(key, value);
    }
    Ok(())
}

fn empty_meta_key(entry: &str) -> CompileError {
    CompileError::for_field("meta", format!("invalid meta entry \"{}\" (empty key)", entry))
}

fn operator_not_supported(operator: char, field: Field) -> CompileError {
    CompileError::for_field(
        field.as_str(),
        format!("operator \"{}\" not supported for field \"{}\"", operator, field),
    )
}

fn cannot_clear(field: Field) -> CompileError {
    CompileError::for_field(field.as_str(), format!("cannot clear \"{}\"", field))
}
