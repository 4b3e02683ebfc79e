use anyhow::Context as _;
use rustyline::completion::Completer;
use rustyline::error::ReadlineError;
use rustyline::highlight::Highlighter as LineHighlighter;
use rustyline::hint::Hinter;
use rustyline::history::DefaultHistory;
use rustyline::validate::Validator;
use rustyline::{Editor, Helper};
use std::borrow::Cow;
use std::fmt::Write as _;
use std::path::PathBuf;
use task_dsl::config::{ShellConfig, DEFAULT_CONFIG_FILE};
use task_dsl::highlight::Highlighter;
use task_dsl::lexer::FIELD_NAMES;
use task_dsl::sql::SqlCompiler;
use task_dsl::{compile, lex, parse, BuildOptions, ParseMode, ParseOptions};
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

const VERBS: [&str; 12] = [
    "add", "create", "new", "set", "edit", "update", "find", "show", "list", "filter", "view",
    "context",
];

const SHELL_COMMANDS: [&str; 6] = [":mode", ":select", ":tokens", ":sql", ":help", ":quit"];

const HELP: &str = "\
commands:
  :mode <auto|create|update|filter|view|context>   force a parse mode
  :select [id]                                     set or clear the selected task
  :tokens                                          toggle the token dump
  :sql                                             toggle SQL for listings
  :quit                                            leave the shell
anything else is parsed and compiled, e.g. `add buy milk due:tomorrow #home`";

/// 行编辑器辅助：语法高亮和单词补全
struct ShellHelper {
    highlighter: Highlighter,
}

impl Completer for ShellHelper {
    type Candidate = String;

    fn complete(
        &self,
        line: &str,
        pos: usize,
        _ctx: &rustyline::Context<'_>,
    ) -> rustyline::Result<(usize, Vec<String>)> {
        let start = line[..pos]
            .rfind(char::is_whitespace)
            .map_or(0, |i| i + 1);
        let prefix = &line[start..pos];
        if prefix.is_empty() {
            return Ok((start, Vec::new()));
        }
        let fields = FIELD_NAMES.iter().map(|name| format!("{}:", name));
        let words = VERBS
            .iter()
            .chain(SHELL_COMMANDS.iter())
            .map(|word| word.to_string())
            .chain(fields);
        let candidates = words.filter(|word| word.starts_with(prefix)).collect();
        Ok((start, candidates))
    }
}

impl Hinter for ShellHelper {
    type Hint = String;
}

impl Validator for ShellHelper {}

impl LineHighlighter for ShellHelper {
    fn highlight<'l>(&self, line: &'l str, _pos: usize) -> Cow<'l, str> {
        if line.starts_with(':') {
            return Cow::Borrowed(line);
        }
        Cow::Owned(self.highlighter.highlight(line))
    }

    fn highlight_char(&self, _line: &str, _pos: usize, _forced: bool) -> bool {
        true
    }
}

impl Helper for ShellHelper {}

enum Step {
    Continue(String),
    Quit,
}

/// 在多行输入之间保持的shell状态
struct Shell {
    mode: ParseMode,
    selected_task_id: Option<u64>,
    show_tokens: bool,
    show_sql: bool,
    sql: SqlCompiler,
}

impl Shell {
    fn new(config: &ShellConfig) -> Self {
        Self {
            mode: config.mode,
            selected_task_id: config.selected_task_id,
            show_tokens: false,
            show_sql: false,
            sql: SqlCompiler::with_config(config.sql.clone()),
        }
    }

    fn execute(&mut self, line: &str) -> anyhow::Result<Step> {
        let mut words = line.split_whitespace();
        let output = match words.next() {
            Some(":quit" | ":q" | ":exit") => return Ok(Step::Quit),
            Some(":help") => HELP.to_string(),
            Some(":mode") => match words.next() {
                Some(mode) => match mode.parse::<ParseMode>() {
                    Ok(mode) => {
                        self.mode = mode;
                        format!("mode: {}", mode)
                    }
                    Err(e) => format!("error: {}", e),
                },
                None => format!("mode: {}", self.mode),
            },
            Some(":select") => match words.next() {
                Some(id) => match id.trim_start_matches('#').parse::<u64>() {
                    Ok(id) if id > 0 => {
                        self.selected_task_id = Some(id);
                        format!("selected: #{}", id)
                    }
                    _ => format!("error: invalid task id \"{}\"", id),
                },
                None => {
                    self.selected_task_id = None;
                    "selection cleared".to_string()
                }
            },
            Some(":tokens") => {
                self.show_tokens = !self.show_tokens;
                format!("tokens: {}", on_off(self.show_tokens))
            }
            Some(":sql") => {
                self.show_sql = !self.show_sql;
                format!("sql: {}", on_off(self.show_sql))
            }
            Some(other) if other.starts_with(':') => {
                format!("error: unknown shell command \"{}\" (try :help)", other)
            }
            _ => self.run_command(line)?,
        };
        Ok(Step::Continue(output))
    }

    /// 对一行命令做词法分析、语法分析和编译
    fn run_command(&self, line: &str) -> anyhow::Result<String> {
        let mut out = String::new();

        if self.show_tokens {
            let (tokens, _) = lex(line);
            for token in &tokens {
                writeln!(out, "{:<16} {:<20} {}", token.kind, token.text, token.span)?;
            }
        }

        let options = ParseOptions {
            mode: self.mode,
            now: None,
        };
        let (result, _) = parse(line, &options);
        for diagnostic in &result.diagnostics {
            writeln!(out, "{}", diagnostic.render(line))?;
        }
        let Some(command) = &result.command else {
            return Ok(out.trim_end().to_string());
        };
        writeln!(out, "canonical: {}", command)?;

        let build = BuildOptions {
            now: None,
            selected_task_id: self.selected_task_id,
        };
        match compile(&result, &build) {
            Ok(plan) => {
                writeln!(out, "{}", serde_json::to_string_pretty(&plan)?)?;
                if let Some(list) = plan.list_request().filter(|_| self.show_sql) {
                    match self.sql.compile(list) {
                        Ok(query) => writeln!(out, "sql: {}", query.sql)?,
                        Err(e) => writeln!(out, "sql error: {}", e)?,
                    }
                }
            }
            Err(e) if result.has_errors() => debug!(error = %e, "skipped compile"),
            Err(e) => {
                let mut line_out = format!("error[E_CMD]: {}", e);
                if let Some(span) = e.span {
                    write!(line_out, " at {}", span)?;
                }
                writeln!(out, "{}", line_out)?;
            }
        }
        Ok(out.trim_end().to_string())
    }
}

fn on_off(flag: bool) -> &'static str {
    if flag {
        "on"
    } else {
        "off"
    }
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> anyhow::Result<()> {
    init_tracing();

    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));
    let (config, loaded) = ShellConfig::load_or_default(&config_path)
        .with_context(|| format!("failed to load {}", config_path.display()))?;
    if loaded {
        println!("✅ 已加载配置文件: {}", config_path.display());
    } else {
        println!("⚠️ 未找到配置文件 {}，使用默认配置", config_path.display());
    }
    for name in config.unknown_highlight_names() {
        warn!(name, "ignoring highlight style for unknown token");
    }

    let mut editor = Editor::<ShellHelper, DefaultHistory>::new()?;
    editor.set_helper(Some(ShellHelper {
        highlighter: Highlighter::with_overrides(&config.highlight),
    }));
    if let Some(history) = &config.history_file {
        if let Err(e) = editor.load_history(history) {
            debug!(error = %e, path = %history.display(), "no history loaded");
        }
    }

    println!("--- Task DSL: 命令到执行计划编译器 (:help 查看命令) ---");
    let mut shell = Shell::new(&config);
    loop {
        match editor.readline(&config.prompt) {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                editor.add_history_entry(line)?;
                match shell.execute(line)? {
                    Step::Continue(output) => {
                        if !output.is_empty() {
                            println!("{}", output);
                        }
                    }
                    Step::Quit => break,
                }
            }
            Err(ReadlineError::Interrupted) => continue,
            Err(ReadlineError::Eof) => break,
            Err(e) => return Err(e.into()),
        }
    }

    if let Some(history) = &config.history_file {
        editor
            .save_history(history)
            .with_context(|| format!("failed to save history to {}", history.display()))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn output(shell: &mut Shell, line: &str) -> String {
        match shell.execute(line).unwrap() {
            Step::Continue(output) => output,
            Step::Quit => panic!("unexpected quit"),
        }
    }

    #[test]
    fn test_shell_commands() {
        let mut shell = Shell::new(&ShellConfig::default());
        assert_eq!(output(&mut shell, ":mode filter"), "mode: filter");
        assert_eq!(shell.mode, ParseMode::Filter);
        assert!(output(&mut shell, ":mode sideways").starts_with("error: unknown parse mode"));
        assert_eq!(output(&mut shell, ":select #7"), "selected: #7");
        assert_eq!(shell.selected_task_id, Some(7));
        assert_eq!(output(&mut shell, ":select"), "selection cleared");
        assert_eq!(output(&mut shell, ":sql"), "sql: on");
        assert!(matches!(shell.execute(":quit").unwrap(), Step::Quit));
    }

    #[test]
    fn test_runs_pipeline() {
        let mut shell = Shell::new(&ShellConfig::default());
        let out = output(&mut shell, "add buy milk #home");
        assert!(out.starts_with("canonical: add buy milk #home"));
        assert!(out.contains("\"plan\": \"create\""));

        output(&mut shell, ":sql");
        let out = output(&mut shell, "find #home");
        assert!(out.contains("sql: SELECT"));
    }

    #[test]
    fn test_reports_errors() {
        let mut shell = Shell::new(&ShellConfig::default());
        let out = output(&mut shell, "set banana state:now");
        assert!(out.starts_with("error[E_PARSE]: invalid update target \"banana\""));

        let out = output(&mut shell, "set state:now");
        assert!(out.contains("error[E_CMD]: no task selected"));
    }
}
