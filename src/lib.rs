//! 任务管理命令语言的前端
//!
//! `string → tokens → AST → plan`:
//!
//! ```
//! use task_dsl::{compile, parse, BuildOptions, ParseOptions, Plan};
//!
//! let (result, error) = parse("add buy milk #home", &ParseOptions::default());
//! assert!(error.is_none());
//! let plan = compile(&result, &BuildOptions::default()).unwrap();
//! assert!(matches!(plan, Plan::Create(_)));
//! ```

pub mod ast;
pub mod compiler;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod highlight;
pub mod lexer;
pub mod parser;
pub mod sql;
pub mod token;

pub use ast::{Command, Intent};
pub use compiler::{BuildOptions, Compiler, ListRequest, Plan};
pub use diagnostics::{Diagnostic, Severity};
pub use error::{CompileError, Error, LexError, ParseError};
pub use lexer::lex;
pub use parser::ParseMode;

use chrono::{DateTime, FixedOffset, Local};
use diagnostics::codes;
use serde::Serialize;
use tracing::debug;

/// [`parse`] 的选项
#[derive(Debug, Clone, Default)]
pub struct ParseOptions {
    pub mode: ParseMode,
    /// 记录在结果上的参考时间；为空时使用当前时间
    pub now: Option<DateTime<FixedOffset>>,
}

/// 单次解析的结果
#[derive(Debug, Clone, Serialize)]
pub struct ParseResult {
    pub intent: Option<Intent>,
    pub command: Option<Command>,
    pub diagnostics: Vec<Diagnostic>,
    /// 编译该结果时使用的参考时间
    pub now: DateTime<FixedOffset>,
}

impl ParseResult {
    pub fn has_errors(&self) -> bool {
        self.diagnostics.iter().any(Diagnostic::is_error)
    }
}

/// 对一条命令做词法和语法分析
///
/// 失败时结果中没有命令，错误同时记录为诊断信息。
/// 唯一同时返回命令和错误的情况是命令与强制模式不匹配
pub fn parse(input: &str, options: &ParseOptions) -> (ParseResult, Option<Error>) {
    let mut result = ParseResult {
        intent: None,
        command: None,
        diagnostics: Vec::new(),
        now: options.now.unwrap_or_else(|| Local::now().fixed_offset()),
    };

    let (tokens, lex_error) = lex(input);
    if let Some(e) = lex_error {
        return fail(result, e.into());
    }

    let command = match parser::Parser::new(&tokens).with_mode(options.mode).parse() {
        Ok(command) => command,
        Err(e) => return fail(result, e.into()),
    };
    let found = command.intent();
    debug!(intent = %found, mode = %options.mode, "parsed command");

    let mut error = None;
    if let Some(expected) = options.mode.intent().filter(|expected| *expected != found) {
        let e = Error::ModeMismatch {
            expected,
            found,
            span: command.span(),
        };
        result.diagnostics.push(e.to_diagnostic());
        error = Some(e);
    }

    if let Command::Update(update) = &command {
        if update.ops.is_empty() {
            result.diagnostics.push(
                Diagnostic::warning(codes::NOOP, "update has no operations", Some(update.span))
                    .with_hint("add an operation such as state:now or !due"),
            );
        }
    }

    result.intent = Some(found);
    result.command = Some(command);
    (result, error)
}

fn fail(mut result: ParseResult, error: Error) -> (ParseResult, Option<Error>) {
    debug!(code = error.code(), %error, "parse failed");
    result.diagnostics.push(error.to_diagnostic());
    (result, Some(error))
}

/// 把解析结果编译为执行计划
///
/// 带有错误诊断的结果会被拒绝。参考时间优先使用 `options.now`，
/// 否则使用解析时记录的时间
pub fn compile(result: &ParseResult, options: &BuildOptions) -> Result<Plan, CompileError> {
    if let Some(diagnostic) = result.diagnostics.iter().find(|d| d.is_error()) {
        let e = CompileError::new(format!("cannot compile: {}", diagnostic.message));
        return Err(match diagnostic.span {
            Some(span) => e.with_span(span),
            None => e,
        });
    }
    let command = result
        .command
        .as_ref()
        .ok_or_else(|| CompileError::new("cannot compile: no command"))?;

    Compiler::new(options.now.unwrap_or(result.now))
        .with_selected(options.selected_task_id)
        .compile(command)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{
        BoolOp, ContextArg, Field, FilterExpr, Op, PredicateKind, TargetRef, ViewName,
    };
    use crate::compiler::{CreateRequest, TaskState, UpdateRequest};
    use crate::token::{Position, Span};
    use chrono::{NaiveDate, TimeZone};
    use rstest::rstest;

    fn reference_now() -> DateTime<FixedOffset> {
        FixedOffset::east_opt(0)
            .unwrap()
            .with_ymd_and_hms(2026, 2, 8, 10, 0, 0)
            .unwrap()
    }

    fn options(mode: ParseMode) -> ParseOptions {
        ParseOptions {
            mode,
            now: Some(reference_now()),
        }
    }

    fn parse_ok(input: &str) -> ParseResult {
        let (result, error) = parse(input, &options(ParseMode::Auto));
        assert!(error.is_none(), "{:?} failed: {:?}", input, error);
        result
    }

    fn predicate(kind: PredicateKind, text: &str) -> FilterExpr {
        FilterExpr::Predicate {
            kind,
            text: text.to_string(),
            span: Default::default(),
        }
    }

    const SAMPLES: &[&str] = &[
        "add buy milk due:tomorrow #home @errands waiting:alex",
        "add \"email #hashtag\" notes:\"see \\\"thread\\\"\"",
        "new title:report meta:priority:high,owner:me +contexts:desk",
        "add x notes:see \"#home\" #later",
        "set selected state:now +project:work !due",
        "edit #12 -#old +@phone -meta:ref due:next friday",
        "update 3 waiting-for:bob",
        "find state:now and project:work",
        "show not (state:done || #old) && text:report",
        "list due:* or id:#4",
        "filter !state:done",
        "view today",
        "view",
        "context @phone",
        "context clear",
    ];

    #[test]
    fn test_create_with_tags_and_due() {
        let result = parse_ok("add buy milk due:tomorrow #home @errands waiting:alex");
        assert_eq!(result.intent, Some(Intent::Create));
        let Some(Command::Create(create)) = &result.command else {
            panic!("expected create command");
        };
        assert_eq!(create.title, "buy milk");
        let described: Vec<String> = create.ops.iter().map(Op::describe).collect();
        assert_eq!(
            described,
            vec![
                "set due \"tomorrow\"",
                "tag project \"home\"",
                "tag context \"errands\"",
                "set waiting \"alex\"",
            ]
        );

        let plan = compile(&result, &BuildOptions::default()).unwrap();
        assert_eq!(
            plan,
            Plan::Create(CreateRequest {
                title: "buy milk".to_string(),
                notes: String::new(),
                state: TaskState::Inbox,
                due_on: NaiveDate::from_ymd_opt(2026, 2, 9),
                waiting_for: Some("alex".to_string()),
                projects: vec!["home".to_string()],
                contexts: vec!["errands".to_string()],
                meta: vec![],
            })
        );
    }

    #[test]
    fn test_update_with_set_add_clear() {
        let result = parse_ok("set selected state:now +project:work !due");
        let Some(Command::Update(update)) = &result.command else {
            panic!("expected update command");
        };
        assert_eq!(update.target, TargetRef::Selected);
        assert!(matches!(
            &update.ops[..],
            [
                Op::Set { field: Field::State, value: state, .. },
                Op::Add { field: Field::Projects, value: project, .. },
                Op::Clear { field: Field::Due, .. },
            ] if state.raw == "now" && project.raw == "work"
        ));

        let build = BuildOptions {
            selected_task_id: Some(42),
            ..BuildOptions::default()
        };
        assert_eq!(
            compile(&result, &build).unwrap(),
            Plan::Update(UpdateRequest {
                id: 42,
                state: Some(TaskState::Now),
                add_projects: vec!["work".to_string()],
                clear_due: true,
                ..UpdateRequest::default()
            })
        );
    }

    #[test]
    fn test_filter_with_boolean_expression() {
        let result = parse_ok("find state:now and project:work");
        let Some(Command::Filter(filter)) = result.command.as_ref().map(Command::without_spans) else {
            panic!("expected filter command");
        };
        assert_eq!(
            filter.expr,
            FilterExpr::Binary {
                op: BoolOp::And,
                left: Box::new(predicate(PredicateKind::State, "now")),
                right: Box::new(predicate(PredicateKind::Project, "work")),
                span: Default::default(),
            }
        );
    }

    #[test]
    fn test_filter_rejecting_missing_value() {
        let (result, error) = parse("find state:", &options(ParseMode::Auto));
        let error = error.unwrap();
        assert_eq!(error.code(), "E_PARSE");
        assert!(error.to_string().contains("expected value"));
        assert!(result.command.is_none());
        assert!(result.has_errors());
    }

    #[test]
    fn test_view_alias() {
        let result = parse_ok("view today");
        let Some(Command::View(view)) = &result.command else {
            panic!("expected view command");
        };
        assert_eq!(view.target, Some(ViewName::Calendar));
    }

    #[test]
    fn test_invalid_update_target() {
        let (result, error) = parse("set banana state:now", &options(ParseMode::Auto));
        let error = error.unwrap();
        assert!(error.to_string().contains("invalid update target"));
        assert!(result.command.is_none());
        assert_eq!(result.diagnostics[0].code, "E_PARSE");
    }

    #[test]
    fn test_lex_error_is_reported() {
        let (result, error) = parse("add x $", &options(ParseMode::Auto));
        assert!(matches!(error, Some(Error::Lex(_))));
        assert_eq!(result.diagnostics[0].code, "E_LEX");
        assert_eq!(result.intent, None);
    }

    #[test]
    fn test_mode_mismatch_keeps_command() {
        let (result, error) = parse("add buy milk", &options(ParseMode::Filter));
        assert!(matches!(
            error,
            Some(Error::ModeMismatch {
                expected: Intent::Filter,
                found: Intent::Create,
                ..
            })
        ));
        assert_eq!(result.intent, Some(Intent::Create));
        assert!(result.command.is_some());
        assert_eq!(result.diagnostics[0].code, "E_MODE");

        let err = compile(&result, &BuildOptions::default()).unwrap_err();
        assert!(err.message.starts_with("cannot compile: command does not match parse mode"));
    }

    #[test]
    fn test_forced_mode_without_verb() {
        let (result, error) = parse("state:now and #work", &options(ParseMode::Filter));
        assert!(error.is_none());
        assert_eq!(result.intent, Some(Intent::Filter));

        let (result, error) = parse("pay rent due:today", &options(ParseMode::Create));
        assert!(error.is_none());
        let Some(Command::Create(create)) = result.command else {
            panic!("expected create command");
        };
        assert_eq!(create.title, "pay rent");
    }

    #[test]
    fn test_update_without_ops_warns() {
        let result = parse_ok("update #9");
        assert!(!result.has_errors());
        assert_eq!(result.diagnostics.len(), 1);
        assert_eq!(result.diagnostics[0].severity, Severity::Warning);
        assert_eq!(result.diagnostics[0].code, "W_NOOP");
        assert!(compile(&result, &BuildOptions::default()).is_ok());
    }

    #[test]
    fn test_compile_now_precedence() {
        let result = parse_ok("add x due:today");
        let later = FixedOffset::east_opt(3600)
            .unwrap()
            .with_ymd_and_hms(2030, 1, 1, 9, 0, 0)
            .unwrap();
        let build = BuildOptions {
            now: Some(later),
            ..BuildOptions::default()
        };
        let Plan::Create(request) = compile(&result, &build).unwrap() else {
            panic!("expected create plan");
        };
        assert_eq!(request.due_on, NaiveDate::from_ymd_opt(2030, 1, 1));
    }

    #[test]
    fn test_context_command() {
        let result = parse_ok("context #work");
        let Some(Command::Context(context)) = &result.command else {
            panic!("expected context command");
        };
        assert_eq!(context.arg, Some(ContextArg::Project("work".to_string())));
    }

    #[test]
    fn test_successful_parse_has_matching_intent() {
        for input in SAMPLES {
            let result = parse_ok(input);
            let command = result.command.as_ref().unwrap();
            assert_eq!(result.intent, Some(command.intent()));
        }
    }

    fn assert_within(inner: Span, outer: Span, input: &str) {
        assert!(
            outer.start.offset <= inner.start.offset
                && inner.start.offset <= inner.end.offset
                && inner.end.offset <= outer.end.offset,
            "span {} escapes {} in {:?}",
            inner,
            outer,
            input
        );
    }

    fn assert_expr_within(expr: &FilterExpr, outer: Span, input: &str) {
        assert_within(expr.span(), outer, input);
        match expr {
            FilterExpr::Binary { left, right, span, .. } => {
                assert_expr_within(left, *span, input);
                assert_expr_within(right, *span, input);
            }
            FilterExpr::Not { expr, span } => assert_expr_within(expr, *span, input),
            FilterExpr::Predicate { span, .. } => assert!(span.start.offset < span.end.offset),
        }
    }

    fn assert_op_within(op: &Op, outer: Span, input: &str) {
        assert_within(op.span(), outer, input);
        if let Op::Set { value, .. } | Op::Add { value, .. } | Op::Remove { value, .. } = op {
            assert_within(value.span, op.span(), input);
        }
    }

    #[test]
    fn test_spans_lie_within_input() {
        for input in SAMPLES {
            let result = parse_ok(input);
            let command = result.command.as_ref().unwrap();
            let whole = Span::new(Position::origin(), Position::new(input.len(), 1, input.len() + 1));
            let span = command.span();
            assert_within(span, whole, input);
            match command {
                Command::Create(create) => {
                    create.ops.iter().for_each(|op| assert_op_within(op, span, input))
                }
                Command::Update(update) => {
                    update.ops.iter().for_each(|op| assert_op_within(op, span, input))
                }
                Command::Filter(filter) => assert_expr_within(&filter.expr, span, input),
                Command::View(_) | Command::Context(_) => {}
            }
        }
    }

    #[test]
    fn test_lex_concatenation_restores_input() {
        for input in SAMPLES.iter().chain(["add \"unterminated \\\" text", "  find  #a  "].iter()) {
            let (tokens, error) = lex(input);
            assert!(error.is_none());
            let mut rebuilt = String::new();
            for token in &tokens {
                rebuilt.push_str(&input[rebuilt.len()..token.span.start.offset]);
                rebuilt.push_str(token.text);
            }
            rebuilt.push_str(&input[rebuilt.len()..]);
            assert_eq!(&rebuilt, input);
        }
    }

    #[test]
    fn test_explicit_mode_yields_same_ast() {
        for input in SAMPLES {
            let auto = parse_ok(input);
            let intent = auto.intent.unwrap();
            let (forced, error) = parse(input, &options(intent.into()));
            assert!(error.is_none());
            assert_eq!(forced.command, auto.command);
        }
    }

    #[test]
    fn test_canonical_round_trip_after_compile() {
        for input in SAMPLES {
            let result = parse_ok(input);
            let build = BuildOptions {
                selected_task_id: Some(1),
                ..BuildOptions::default()
            };
            compile(&result, &build).unwrap();
            let command = result.command.unwrap();
            let canonical = command.to_string();
            let reparsed = parse_ok(&canonical);
            assert_eq!(
                reparsed.command.map(|c| c.without_spans()),
                Some(command.without_spans()),
                "canonical form {:?}",
                canonical
            );
        }
    }

    #[rstest]
    #[case("add x #a #b #a @c,d")]
    #[case("add y +projects:a,,a, b @c @c")]
    fn test_compiled_lists_have_no_duplicates(#[case] input: &str) {
        let Plan::Create(request) = compile(&parse_ok(input), &BuildOptions::default()).unwrap() else {
            panic!("expected create plan");
        };
        for list in [&request.projects, &request.contexts] {
            let mut seen = Vec::new();
            for item in list {
                assert!(!item.is_empty());
                assert!(!seen.contains(item));
                seen.push(item.clone());
            }
        }
        assert!(!request.title.is_empty());
    }

    #[test]
    fn test_result_serializes() {
        let result = parse_ok("find #a");
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["intent"], "filter");
        assert_eq!(json["command"]["command"], "filter");
        assert_eq!(json["command"]["expr"]["node"], "predicate");
    }
}
