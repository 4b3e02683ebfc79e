//! 使用sea-query把 [`ListRequest`] 编译为SQL查询
//!
//! 任务存放在一张表中；project和context存放在关联表中，每行是 `(task_id, name)`，
//! 通过 `EXISTS` 子查询匹配。

use crate::ast::{BoolOp, FilterExpr, PredicateKind};
use crate::compiler::{ListRequest, TagMatch};
use crate::error::CompileError;
use sea_query::{
    Alias, Asterisk, Expr, Iden, LikeExpr, Order, PostgresQueryBuilder, Query, SelectStatement,
    SimpleExpr, SqliteQueryBuilder,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SqlDialect {
    #[default]
    Postgres,
    Sqlite,
}

/// 表名和生成选项
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SqlConfig {
    pub table: String,
    pub project_table: String,
    pub context_table: String,
    pub dialect: SqlDialect,
    /// 同一列的OR条件至少达到多少个时合并为IN列表
    pub min_or_values_for_in: usize,
}

impl Default for SqlConfig {
    fn default() -> Self {
        Self {
            table: "tasks".to_string(),
            project_table: "task_projects".to_string(),
            context_table: "task_contexts".to_string(),
            dialect: SqlDialect::Postgres,
            min_or_values_for_in: 2,
        }
    }
}

/// 任务表的列
#[derive(Debug, Clone, Copy)]
pub enum TaskColumn {
    Id,
    Title,
    Notes,
    State,
    DueOn,
}

impl Iden for TaskColumn {
    fn unquoted(&self, s: &mut dyn std::fmt::Write) {
        let name = match self {
            TaskColumn::Id => "id",
            TaskColumn::Title => "title",
            TaskColumn::Notes => "notes",
            TaskColumn::State => "state",
            TaskColumn::DueOn => "due_on",
        };
        let _ = s.write_str(name);
    }
}

/// project和context关联表的列
#[derive(Debug, Clone, Copy)]
pub enum LinkColumn {
    TaskId,
    Name,
}

impl Iden for LinkColumn {
    fn unquoted(&self, s: &mut dyn std::fmt::Write) {
        let _ = s.write_str(match self {
            LinkColumn::TaskId => "task_id",
            LinkColumn::Name => "name",
        });
    }
}

/// 生成SQL时应用的优化
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Optimization {
    /// 同一列上的 `a or b or c` 被改写为 `IN (a, b, c)`
    OrToIn { column: String, value_count: usize },
}

#[derive(Debug)]
pub struct SqlQuery {
    pub sql: String,
    pub optimizations: Vec<Optimization>,
}

pub struct SqlCompiler {
    config: SqlConfig,
}

impl Default for SqlCompiler {
    fn default() -> Self {
        Self::new()
    }
}

impl SqlCompiler {
    pub fn new() -> Self {
        Self::with_config(SqlConfig::default())
    }

    pub fn with_config(config: SqlConfig) -> Self {
        Self { config }
    }

    /// 生成列表查询。过滤树和列字段同时存在时以过滤树为准
    pub fn compile(&self, request: &ListRequest) -> Result<SqlQuery, CompileError> {
        let mut optimizations = Vec::new();

        let mut select = Query::select();
        select.column(Asterisk).from(self.table());

        let condition = match &request.expr {
            Some(expr) => Some(self.compile_expr(expr, &mut optimizations)?),
            None => self.compile_columns(request),
        };
        if let Some(condition) = condition {
            select.and_where(condition);
        }
        select.order_by((self.table(), TaskColumn::Id), Order::Asc);

        let sql = self.render(&select);
        debug!(%sql, optimizations = optimizations.len(), "rendered listing");
        Ok(SqlQuery { sql, optimizations })
    }

    fn render(&self, select: &SelectStatement) -> String {
        match self.config.dialect {
            SqlDialect::Postgres => select.to_string(PostgresQueryBuilder),
            SqlDialect::Sqlite => select.to_string(SqliteQueryBuilder),
        }
    }

    fn table(&self) -> Alias {
        Alias::new(&self.config.table)
    }

    fn col(&self, column: TaskColumn) -> Expr {
        Expr::col((self.table(), column))
    }

    fn compile_expr(
        &self,
        expr: &FilterExpr,
        optimizations: &mut Vec<Optimization>,
    ) -> Result<SimpleExpr, CompileError> {
        match expr {
            FilterExpr::Binary {
                op: BoolOp::Or,
                left,
                right,
                ..
            } => {
                if let Some(folded) = self.try_fold_or_to_in(expr, optimizations)? {
                    return Ok(folded);
                }
                let left = self.compile_expr(left, optimizations)?;
                let right = self.compile_expr(right, optimizations)?;
                Ok(left.or(right))
            }
            FilterExpr::Binary {
                op: BoolOp::And,
                left,
                right,
                ..
            } => {
                let left = self.compile_expr(left, optimizations)?;
                let right = self.compile_expr(right, optimizations)?;
                Ok(left.and(right))
            }
            FilterExpr::Not { expr, .. } => Ok(self.compile_expr(expr, optimizations)?.not()),
            FilterExpr::Predicate { kind, text, .. } => self.compile_predicate(*kind, text),
        }
    }

    /// 合并所有叶子都是同一列等值判断的OR链
    fn try_fold_or_to_in(
        &self,
        expr: &FilterExpr,
        optimizations: &mut Vec<Optimization>,
    ) -> Result<Option<SimpleExpr>, CompileError> {
        let mut leaves = Vec::new();
        if !collect_or_leaves(expr, &mut leaves) || leaves.len() < self.config.min_or_values_for_in {
            return Ok(None);
        }
        let kind = leaves[0].0;
        let same_kind = leaves.iter().all(|(k, text)| *k == kind && *text != WILDCARD);
        if !same_kind {
            return Ok(None);
        }
        let values: Vec<String> = leaves.iter().map(|(_, text)| ToString::to_string(text)).collect();

        let folded = match kind {
            PredicateKind::State => self.col(TaskColumn::State).is_in(values.clone()),
            PredicateKind::Id => {
                let ids = values
                    .iter()
                    .map(|text| parse_id(text))
                    .collect::<Result<Vec<_>, _>>()?;
                self.col(TaskColumn::Id).is_in(ids)
            }
            PredicateKind::Project => {
                self.tag_exists(&self.config.project_table, Some(values.clone()))
            }
            PredicateKind::Context => {
                self.tag_exists(&self.config.context_table, Some(values.clone()))
            }
            PredicateKind::Due | PredicateKind::Text => return Ok(None),
        };
        optimizations.push(Optimization::OrToIn {
            column: kind.to_string(),
            value_count: values.len(),
        });
        Ok(Some(folded))
    }

    fn compile_predicate(&self, kind: PredicateKind, text: &str) -> Result<SimpleExpr, CompileError> {
        let expr = match kind {
            PredicateKind::State => self.col(TaskColumn::State).eq(text),
            PredicateKind::Due if text == WILDCARD => self.col(TaskColumn::DueOn).is_not_null(),
            PredicateKind::Due => self.col(TaskColumn::DueOn).eq(text),
            PredicateKind::Project => self.tag_exists(&self.config.project_table, named(text)),
            PredicateKind::Context => self.tag_exists(&self.config.context_table, named(text)),
            PredicateKind::Text => self.search(text),
            PredicateKind::Id => self.col(TaskColumn::Id).eq(parse_id(text)?),
        };
        Ok(expr)
    }

    /// 只根据列字段构造条件
    fn compile_columns(&self, request: &ListRequest) -> Option<SimpleExpr> {
        let mut conditions = Vec::new();
        if let Some(state) = request.state {
            conditions.push(self.col(TaskColumn::State).eq(state.as_str()));
        }
        if let Some(project) = &request.project {
            conditions.push(self.tag_exists(&self.config.project_table, tag_names(project)));
        }
        if let Some(context) = &request.context {
            conditions.push(self.tag_exists(&self.config.context_table, tag_names(context)));
        }
        if let Some(search) = &request.search {
            conditions.push(self.search(search));
        }
        if let Some(id) = request.id {
            conditions.push(self.col(TaskColumn::Id).eq(id));
        }
        if let Some(due_on) = request.due_on {
            conditions.push(self.col(TaskColumn::DueOn).eq(due_on.to_string()));
        }
        if request.due_only {
            conditions.push(self.col(TaskColumn::DueOn).is_not_null());
        }
        conditions.into_iter().reduce(|acc, expr| acc.and(expr))
    }

    /// `EXISTS (SELECT 1 FROM link WHERE link.task_id = tasks.id [AND name ...])`
    fn tag_exists(&self, link_table: &str, names: Option<Vec<String>>) -> SimpleExpr {
        let link = Alias::new(link_table);
        let mut sub = Query::select();
        sub.expr(Expr::val(1))
            .from(link.clone())
            .and_where(
                Expr::col((link.clone(), LinkColumn::TaskId))
                    .equals((self.table(), TaskColumn::Id)),
            );
        match names {
            Some(names) if names.len() == 1 => {
                sub.and_where(Expr::col((link, LinkColumn::Name)).eq(names[0].clone()));
            }
            Some(names) => {
                sub.and_where(Expr::col((link, LinkColumn::Name)).is_in(names));
            }
            None => {}
        }
        Expr::exists(sub)
    }

    /// 在title或notes上做区分大小写的子串匹配
    fn search(&self, text: &str) -> SimpleExpr {
        let pattern = format!("%{}%", escape_like(text));
        self.col(TaskColumn::Title)
            .like(LikeExpr::new(pattern.clone()).escape('\\'))
            .or(self
                .col(TaskColumn::Notes)
                .like(LikeExpr::new(pattern).escape('\\')))
    }
}

const WILDCARD: &str = "*";

fn collect_or_leaves<'e>(expr: &'e FilterExpr, out: &mut Vec<(PredicateKind, &'e str)>) -> bool {
    match expr {
        FilterExpr::Binary {
            op: BoolOp::Or,
            left,
            right,
            ..
        } => collect_or_leaves(left, out) && collect_or_leaves(right, out),
        FilterExpr::Predicate { kind, text, .. } => {
            out.push((*kind, text.as_str()));
            true
        }
        _ => false,
    }
}

fn named(text: &str) -> Option<Vec<String>> {
    (text != WILDCARD).then(|| vec![text.to_string()])
}

fn tag_names(tag: &TagMatch) -> Option<Vec<String>> {
    match tag {
        TagMatch::Any => None,
        TagMatch::Named(name) => Some(vec![name.clone()]),
    }
}

fn parse_id(text: &str) -> Result<u64, CompileError> {
    text.trim_start_matches('#')
        .parse()
        .map_err(|_| CompileError::for_field("id", format!("invalid task id \"{}\"", text)))
}

fn escape_like(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}
