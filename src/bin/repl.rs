//! Reference REPL driver (§4.9, §6.2–§6.3). Built only on the public host
//! API re-exported from `tiny_clj` — CLI flag parsing, line editing with
//! persisted history, and the `pretty_env_logger` backend all live here, not
//! in the library, so a plain `cargo build` of the crate stays
//! dependency-light.

use clap::Parser;
use rustyline::error::ReadlineError;
use rustyline::history::History;
use rustyline::DefaultEditor;
use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

use tiny_clj::{print, EvalConfig, EvalState};

/// Embeddable interpreter for a Clojure-like Lisp dialect.
#[derive(Parser)]
#[command(name = "tiny-clj", version, about)]
struct Cli {
    /// Namespace to start evaluation in (default: user).
    #[arg(short = 'n', long = "namespace")]
    namespace: Option<String>,

    /// Evaluate EXPR against the current namespace. May be repeated; each
    /// is evaluated in the order given.
    #[arg(short = 'e', long = "eval")]
    exprs: Vec<String>,

    /// Evaluate every top-level form in FILE.
    #[arg(short = 'f', long = "file")]
    file: Option<PathBuf>,

    /// Skip installing `clojure.core`.
    #[arg(long = "no-core")]
    no_core: bool,

    /// Enter the interactive REPL after processing `-e`/`-f`.
    #[arg(long = "repl")]
    repl: bool,
}

fn main() -> ExitCode {
    pretty_env_logger::init();
    let cli = Cli::parse();

    let mut st = EvalState::with_config(EvalConfig::default());
    if let Some(ns) = &cli.namespace {
        st.set_current_ns(ns);
    }
    if !cli.no_core {
        st.load_core();
    }

    let mut ok = true;
    for expr in &cli.exprs {
        ok &= run_one(&mut st, expr);
    }
    if let Some(path) = &cli.file {
        ok &= run_file(&mut st, path);
    }

    if cli.repl {
        run_repl(&mut st);
        return ExitCode::SUCCESS;
    }

    if ok {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

fn run_one(st: &mut EvalState, source: &str) -> bool {
    match st.eval_string(source) {
        Ok(v) => {
            println!("{}", print(v));
            true
        }
        Err(e) => {
            eprintln!("{}", print(e.value));
            false
        }
    }
}

fn run_file(st: &mut EvalState, path: &PathBuf) -> bool {
    match fs::read_to_string(path) {
        Ok(source) => st.eval_multiline(&source),
        Err(e) => {
            log::error!("reading {}: {e}", path.display());
            false
        }
    }
}

const HISTORY_FILE: &str = ".tiny-clj-history";

fn run_repl(st: &mut EvalState) {
    let mut rl = DefaultEditor::new().expect("failed to initialize line editor");
    for line in load_history(HISTORY_FILE) {
        let _ = rl.add_history_entry(line);
    }

    let mut pending = String::new();
    loop {
        let prompt = if pending.is_empty() { "tiny-clj=> " } else { "       #_=> " };
        match rl.readline(prompt) {
            Ok(line) => {
                if !pending.is_empty() {
                    pending.push('\n');
                }
                pending.push_str(&line);
                let _ = rl.add_history_entry(pending.clone());

                match st.eval_string(&pending) {
                    Ok(v) => {
                        println!("{}", print(v));
                        pending.clear();
                    }
                    Err(e) if e.type_name() == "IncompleteInputError" => {
                        // Ask for one more line rather than reporting a hard
                        // error (§4.2).
                    }
                    Err(e) => {
                        eprintln!("{}", print(e.value));
                        pending.clear();
                    }
                }
            }
            Err(ReadlineError::Interrupted) => {
                pending.clear();
                continue;
            }
            Err(ReadlineError::Eof) => break,
            Err(e) => {
                log::error!("readline: {e}");
                break;
            }
        }
    }

    save_history(HISTORY_FILE, rl.history().iter());
}

/// Reads the history file's printed vector-of-strings form (§6.3) back into
/// a plain list of lines. Missing or malformed files just start empty — a
/// REPL's history is a convenience, never load-bearing.
fn load_history(path: &str) -> Vec<String> {
    let Ok(text) = fs::read_to_string(path) else {
        return Vec::new();
    };
    parse_string_vector(text.trim()).unwrap_or_default()
}

fn save_history<'a>(path: &str, lines: impl Iterator<Item = &'a String>) {
    let printed = print_string_vector(lines);
    if let Err(e) = fs::write(path, printed) {
        log::warn!("saving history to {path}: {e}");
    }
}

/// Mirrors `tiny_clj::print`'s string-literal escaping (§6.4) for a vector
/// of strings, without needing to round-trip through the interpreter's own
/// heap just to persist a history file.
fn print_string_vector<'a>(lines: impl Iterator<Item = &'a String>) -> String {
    let mut out = String::from("[");
    for (i, line) in lines.enumerate() {
        if i > 0 {
            out.push(' ');
        }
        out.push('"');
        for c in line.chars() {
            match c {
                '"' => out.push_str("\\\""),
                '\\' => out.push_str("\\\\"),
                '\n' => out.push_str("\\n"),
                '\t' => out.push_str("\\t"),
                '\r' => out.push_str("\\r"),
                _ => out.push(c),
            }
        }
        out.push('"');
    }
    out.push(']');
    out
}

fn parse_string_vector(text: &str) -> Option<Vec<String>> {
    let body = text.strip_prefix('[')?.strip_suffix(']')?;
    let mut out = Vec::new();
    let chars: Vec<char> = body.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        if chars[i].is_whitespace() {
            i += 1;
            continue;
        }
        if chars[i] != '"' {
            return None;
        }
        i += 1;
        let mut s = String::new();
        while i < chars.len() && chars[i] != '"' {
            if chars[i] == '\\' && i + 1 < chars.len() {
                i += 1;
                match chars[i] {
                    'n' => s.push('\n'),
                    't' => s.push('\t'),
                    'r' => s.push('\r'),
                    c => s.push(c),
                }
            } else {
                s.push(chars[i]);
            }
            i += 1;
        }
        i += 1; // closing quote
        out.push(s);
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn string_vector_round_trips() {
        let lines = vec!["(+ 1 2)".to_string(), "(str \"a\\b\")".to_string()];
        let printed = print_string_vector(lines.iter());
        let parsed = parse_string_vector(&printed).unwrap();
        assert_eq!(parsed, lines);
    }
}
