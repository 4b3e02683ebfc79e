use chrono::{FixedOffset, TimeZone};
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use std::hint::black_box;
use task_dsl::compiler::Compiler;
use task_dsl::lexer::lex;
use task_dsl::parser::Parser;
use task_dsl::sql::SqlCompiler;
use task_dsl::{compile, parse, BuildOptions, ParseOptions, Plan};

const CASES: [(&str, &str); 4] = [
    ("create", "add buy milk due:tomorrow #home @errands waiting:alex"),
    ("update", "set #42 state:now +project:work -@phone meta:priority:high !due"),
    ("filter", "find state:now and project:work"),
    (
        "filter_complex",
        "show not (state:done || #old || #stale) && (due:next friday or @desk) and \"quarterly report\"",
    ),
];

fn compiler() -> Compiler {
    let now = FixedOffset::east_opt(0)
        .and_then(|tz| tz.with_ymd_and_hms(2026, 2, 8, 10, 0, 0).single())
        .expect("valid reference time");
    Compiler::new(now).with_selected(Some(1))
}

fn benchmark_lexer(c: &mut Criterion) {
    let mut group = c.benchmark_group("lexer_performance");

    for (name, input) in CASES {
        group.bench_with_input(BenchmarkId::new("tokenize", name), &input, |b, &input| {
            b.iter(|| black_box(lex(black_box(input))))
        });
    }

    group.finish();
}

fn benchmark_parser(c: &mut Criterion) {
    let mut group = c.benchmark_group("parser_performance");

    for (name, input) in CASES {
        let (tokens, _) = lex(input);

        group.bench_with_input(BenchmarkId::new("parse", name), &tokens, |b, tokens| {
            b.iter(|| {
                let mut parser = Parser::new(black_box(tokens));
                black_box(parser.parse().expect("parse should succeed"))
            })
        });
    }

    group.finish();
}

fn benchmark_compiler(c: &mut Criterion) {
    let mut group = c.benchmark_group("compiler_performance");
    let compiler = compiler();

    for (name, input) in CASES {
        let (tokens, _) = lex(input);
        let command = Parser::new(&tokens).parse().expect("parse should succeed");

        group.bench_with_input(BenchmarkId::new("compile", name), &command, |b, command| {
            b.iter(|| black_box(compiler.compile(black_box(command)).expect("compile should succeed")))
        });
    }

    group.finish();
}

fn benchmark_sql(c: &mut Criterion) {
    let mut group = c.benchmark_group("sql_performance");
    let sql = SqlCompiler::new();

    for (name, input) in CASES.iter().filter(|(name, _)| name.starts_with("filter")) {
        let (tokens, _) = lex(input);
        let command = Parser::new(&tokens).parse().expect("parse should succeed");
        let Ok(Plan::List(list)) = compiler().compile(&command) else {
            panic!("expected a listing for {}", name);
        };

        group.bench_with_input(BenchmarkId::new("render", name), &list, |b, list| {
            b.iter(|| black_box(sql.compile(black_box(list)).expect("render should succeed")))
        });
    }

    group.finish();
}

fn benchmark_end_to_end(c: &mut Criterion) {
    let mut group = c.benchmark_group("end_to_end_performance");
    let options = ParseOptions::default();
    let build = BuildOptions {
        selected_task_id: Some(1),
        ..BuildOptions::default()
    };

    for (name, input) in CASES {
        group.bench_with_input(BenchmarkId::new("full_pipeline", name), &input, |b, &input| {
            b.iter(|| {
                let (result, _) = parse(black_box(input), &options);
                black_box(compile(&result, &build).expect("compile should succeed"))
            })
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    benchmark_lexer,
    benchmark_parser,
    benchmark_compiler,
    benchmark_sql,
    benchmark_end_to_end
);
criterion_main!(benches);
