//! Interactive REPL for the HLTB overlay.
//!
//! Launch with `hltb-overlay repl` to enter interactive mode.
//! Type `/help` for available commands, Tab for completion.

use std::rc::Rc;

use rustyline::completion::{Completer, Pair};
use rustyline::config::CompletionType;
use rustyline::error::ReadlineError;
use rustyline::highlight::Highlighter;
use rustyline::hint::Hinter;
use rustyline::validate::Validator;
use rustyline::{
    Cmd, ConditionalEventHandler, Config, Editor, Event, EventContext, EventHandler, Helper,
    KeyEvent, RepeatCount,
};
use tokio::task::LocalSet;

use hltb_overlay::{CacheStore, FetchCoordinator, HltbClient, Markers};

use crate::commands::{self, InspectTarget};
use crate::config::OverlayConfig;

/// Available REPL commands.
const COMMANDS: &[(&str, &str)] = &[
    ("/lookup", "Look up completion times for an app id"),
    ("/stats", "Show cache statistics"),
    ("/clear-cache", "Remove every cached entry"),
    ("/load", "Load an HTML snapshot for /detect and /inspect"),
    ("/detect", "Detect the game page in the loaded snapshot"),
    ("/inspect", "Inspect the snapshot: images | assets | class <c> | select <s> | element <s>"),
    ("/selectors", "Show the page markers in use"),
    ("/clear", "Clear the screen"),
    ("/help", "Show available commands"),
    ("/exit", "Quit the REPL"),
];

/// REPL helper for tab completion.
#[derive(Default)]
struct OverlayHelper;

impl Completer for OverlayHelper {
    type Candidate = Pair;

    fn complete(
        &self,
        line: &str,
        pos: usize,
        _ctx: &rustyline::Context<'_>,
    ) -> rustyline::Result<(usize, Vec<Pair>)> {
        let input = &line[..pos];

        if !input.contains(' ') {
            let matches: Vec<Pair> = COMMANDS
                .iter()
                .filter(|(cmd, _)| cmd.starts_with(input))
                .map(|(cmd, desc)| Pair {
                    display: format!("{cmd:<16} {desc}"),
                    replacement: format!("{cmd} "),
                })
                .collect();
            return Ok((0, matches));
        }

        // HTML snapshot completion
        let (cmd, args) = input.split_once(' ').unwrap_or((input, ""));
        if cmd == "/load" {
            let mut files = Vec::new();
            if let Ok(entries) = std::fs::read_dir(".") {
                for entry in entries.flatten() {
                    let path = entry.path();
                    if path
                        .extension()
                        .is_some_and(|e| e == "html" || e == "htm")
                    {
                        if let Some(name) = path.file_name().and_then(|s| s.to_str()) {
                            files.push(name.to_string());
                        }
                    }
                }
            }
            files.sort();
            let prefix_start = input.len() - args.len();
            let matches: Vec<Pair> = files
                .iter()
                .filter(|f| f.starts_with(args.trim()))
                .map(|f| Pair {
                    display: f.clone(),
                    replacement: format!("{f} "),
                })
                .collect();
            return Ok((prefix_start, matches));
        }

        Ok((pos, Vec::new()))
    }
}

impl Hinter for OverlayHelper {
    type Hint = String;

    fn hint(&self, line: &str, pos: usize, _ctx: &rustyline::Context<'_>) -> Option<String> {
        if pos < line.len() || line.is_empty() {
            return None;
        }
        if line.starts_with('/') && !line.contains(' ') {
            for (cmd, _) in COMMANDS {
                if cmd.starts_with(line) && *cmd != line {
                    return Some(cmd[line.len()..].to_string());
                }
            }
        }
        None
    }
}

impl Highlighter for OverlayHelper {}
impl Validator for OverlayHelper {}
impl Helper for OverlayHelper {}

struct TabCompleteOrAcceptHint;

impl ConditionalEventHandler for TabCompleteOrAcceptHint {
    fn handle(
        &self,
        _evt: &Event,
        _n: RepeatCount,
        _positive: bool,
        ctx: &EventContext<'_>,
    ) -> Option<Cmd> {
        if ctx.has_hint() {
            Some(Cmd::CompleteHint)
        } else {
            Some(Cmd::Complete)
        }
    }
}

/// Session state.
struct ReplState {
    runtime: tokio::runtime::Runtime,
    coordinator: FetchCoordinator<HltbClient>,
    markers: Markers,
    snapshot: Option<(String, String)>,
}

impl ReplState {
    fn cache(&self) -> &CacheStore {
        self.coordinator.cache()
    }
}

/// Run the interactive REPL.
pub fn run(config: OverlayConfig) -> anyhow::Result<()> {
    eprintln!();
    eprintln!(
        "  \x1b[32m\u{25c9}\x1b[0m \x1b[1mhltb-overlay v{}\x1b[0m \x1b[90m· How Long To Beat for the Steam library\x1b[0m",
        env!("CARGO_PKG_VERSION")
    );
    eprintln!();
    eprintln!(
        "    Press \x1b[36m/\x1b[0m to browse commands, \x1b[90mTab\x1b[0m to complete, \x1b[90m/exit\x1b[0m to quit."
    );
    eprintln!("    Cache: {}", config.cache_dir.display());
    eprintln!("    Endpoint: {}", config.endpoint);
    eprintln!();

    let rl_config = Config::builder()
        .history_ignore_space(true)
        .auto_add_history(true)
        .completion_type(CompletionType::List)
        .completion_prompt_limit(20)
        .build();

    let mut rl: Editor<OverlayHelper, rustyline::history::DefaultHistory> =
        Editor::with_config(rl_config)?;
    rl.set_helper(Some(OverlayHelper));
    rl.bind_sequence(
        KeyEvent::from('\t'),
        EventHandler::Conditional(Box::new(TabCompleteOrAcceptHint)),
    );

    let hist_path = dirs::home_dir()
        .unwrap_or_else(|| std::path::PathBuf::from("."))
        .join(".hltb_overlay_history");
    if hist_path.exists() {
        let _ = rl.load_history(&hist_path);
    }

    let mut state = ReplState {
        runtime: tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?,
        coordinator: FetchCoordinator::new(Rc::new(config.open_cache()), Rc::new(config.client()?)),
        markers: Markers::library()?,
        snapshot: None,
    };
    let prompt = " \x1b[36mhltb>\x1b[0m ";

    loop {
        match rl.readline(prompt) {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }

                let input = line.strip_prefix('/').unwrap_or(line);
                if input.is_empty() {
                    cmd_help();
                    continue;
                }

                let (cmd, args) = input.split_once(' ').unwrap_or((input, ""));
                let args = args.trim();

                match cmd {
                    "exit" | "quit" => {
                        eprintln!("  \x1b[90m\u{2728}\x1b[0m Goodbye!");
                        break;
                    }
                    "help" | "h" | "?" => cmd_help(),
                    "clear" | "cls" => eprint!("\x1b[2J\x1b[H"),
                    "lookup" => cmd_lookup(args, &state),
                    "stats" => report(commands::run_stats(state.cache(), &state.markers, false)),
                    "clear-cache" => eprintln!("  {}", commands::run_clear(state.cache(), &state.markers)),
                    "load" => cmd_load(args, &mut state),
                    "detect" => cmd_detect(&state),
                    "inspect" => cmd_inspect(args, &state),
                    "selectors" => report(
                        serde_json::to_string_pretty(state.markers.sources()).map_err(Into::into),
                    ),
                    _ => {
                        eprintln!("  Unknown command '/{cmd}'. Type /help for commands.");
                    }
                }
            }
            Err(ReadlineError::Interrupted) => {
                eprintln!("  \x1b[90m(Ctrl+C)\x1b[0m Type \x1b[1m/exit\x1b[0m to quit.");
            }
            Err(ReadlineError::Eof) => {
                eprintln!("  \x1b[90m\u{2728}\x1b[0m Goodbye!");
                break;
            }
            Err(err) => {
                eprintln!("  Error: {err}");
                break;
            }
        }
    }

    let _ = rl.save_history(&hist_path);

    Ok(())
}

fn report(result: anyhow::Result<String>) {
    match result {
        Ok(text) => {
            eprintln!();
            for line in text.lines() {
                eprintln!("  {line}");
            }
            eprintln!();
        }
        Err(e) => eprintln!("  Error: {e:#}"),
    }
}

fn cmd_help() {
    eprintln!();
    eprintln!("  Commands:");
    eprintln!();
    for (cmd, desc) in COMMANDS {
        eprintln!("    {cmd:<18} {desc}");
    }
    eprintln!();
    eprintln!("  Tip: Tab completion works for commands and .html files.");
    eprintln!();
}

fn cmd_lookup(args: &str, state: &ReplState) {
    let Ok(id) = args.parse() else {
        eprintln!("  Usage: /lookup <app-id>");
        return;
    };
    let local = LocalSet::new();
    let result = state.runtime.block_on(
        local.run_until(commands::run_lookup(&state.coordinator, id, false)),
    );
    report(result);
}

fn cmd_load(args: &str, state: &mut ReplState) {
    if args.is_empty() {
        eprintln!("  Usage: /load <page.html>");
        return;
    }
    let path = args.split_whitespace().next().unwrap_or(args).to_string();
    match std::fs::read_to_string(&path) {
        Ok(markup) => {
            eprintln!("  Loaded: {path} ({} bytes)", markup.len());
            state.snapshot = Some((path, markup));
        }
        Err(e) => eprintln!("  Failed to load: {e}"),
    }
}

/// Loaded snapshot as `(path, markup)`.
fn snapshot(state: &ReplState) -> Option<(&str, &str)> {
    match &state.snapshot {
        Some((path, markup)) => Some((path.as_str(), markup.as_str())),
        None => {
            eprintln!("  No snapshot loaded. Use /load <page.html> first.");
            None
        }
    }
}

fn cmd_detect(state: &ReplState) {
    if let Some((path, markup)) = snapshot(state) {
        report(detect_line(path, markup, &state.markers));
    }
}

/// `/detect` output, prefixed with the snapshot it came from.
fn detect_line(path: &str, markup: &str, markers: &Markers) -> anyhow::Result<String> {
    commands::run_detect(markup, markers, false).map(|text| format!("{path}: {text}"))
}

fn cmd_inspect(args: &str, state: &ReplState) {
    let (what, rest) = args.split_once(' ').unwrap_or((args, ""));
    let rest = rest.trim().to_string();
    let target = match (what, rest.is_empty()) {
        ("images", _) => InspectTarget::Images,
        ("assets", _) => InspectTarget::AssetImages,
        ("class", false) => InspectTarget::Class(rest),
        ("select", false) => InspectTarget::Selector(rest),
        ("element", false) => InspectTarget::Element(rest),
        _ => {
            eprintln!("  Usage: /inspect images | assets | class <c> | select <s> | element <s>");
            return;
        }
    };
    if let Some((path, markup)) = snapshot(state) {
        eprintln!("  Snapshot: {path}");
        report(commands::run_inspect(markup, &target, false));
    }
}
