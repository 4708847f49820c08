mod completer;
mod report;
mod state;

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::Parser;
use clap::error::ErrorKind;
use ember::{Ember, EmberError};
use env_logger::{Builder, Env};
use log::{debug, info};
use rustyline::Editor;
use rustyline::error::ReadlineError;
use rustyline::history::DefaultHistory;

use completer::EmberHelper;
use report::Reporter;
use state::ReplState;

const EXIT_USAGE: u8 = 64;
const EXIT_DATA_ERROR: u8 = 65;
const EXIT_NO_INPUT: u8 = 66;
const EXIT_SOFTWARE: u8 = 70;

/// Runs an Ember script, or starts an interactive prompt without one.
#[derive(Parser, Debug)]
#[command(name = "ember", version)]
struct Cli {
    /// Script to run
    script: Option<PathBuf>,

    /// Render diagnostics with source excerpts
    #[arg(long)]
    pretty: bool,
}

fn init_logger() {
    Builder::from_env(Env::default().filter_or("EMBER_LOG", "warn"))
        .format(|buf, record| {
            writeln!(
                buf,
                "[{} {}:{}] {}",
                record.level(),
                record.module_path().unwrap_or("<unnamed>"),
                record.line().unwrap_or(0),
                record.args()
            )
        })
        .target(env_logger::Target::Stderr)
        .init();
}

fn main() -> ExitCode {
    init_logger();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => {
            e.exit()
        }
        Err(e) => {
            let _ = e.print();
            return ExitCode::from(EXIT_USAGE);
        }
    };
    info!("CLI arguments: {:?}", cli);

    let reporter = Reporter::new(cli.pretty);
    let mut ember = Ember::new();

    match &cli.script {
        Some(path) => run_file(&mut ember, path, &reporter),
        None => run_repl(&mut ember, &reporter),
    }
}

/// Exit status for a finished run: static errors win over runtime ones.
fn exit_status(errors: &[EmberError]) -> u8 {
    if errors.iter().any(EmberError::is_static) {
        EXIT_DATA_ERROR
    } else if errors.iter().any(|e| !e.is_warning()) {
        EXIT_SOFTWARE
    } else {
        0
    }
}

fn run_file(ember: &mut Ember, path: &Path, reporter: &Reporter) -> ExitCode {
    let source = match fs::read_to_string(path) {
        Ok(source) => source,
        Err(e) => {
            eprintln!("{}", EmberError::from(e));
            return ExitCode::from(EXIT_NO_INPUT);
        }
    };
    debug!("read {} bytes from {}", source.len(), path.display());

    let filename = path.to_string_lossy();
    let errors = ember.run(&source, std::io::stdout());
    reporter.report_all(&errors, &source, Some(&filename), std::io::stderr());
    ExitCode::from(exit_status(&errors))
}

fn run_repl(ember: &mut Ember, reporter: &Reporter) -> ExitCode {
    let mut rl: Editor<EmberHelper, DefaultHistory> = match Editor::new() {
        Ok(rl) => rl,
        Err(e) => {
            eprintln!("Could not start the prompt: {e}");
            return ExitCode::from(EXIT_SOFTWARE);
        }
    };
    let helper = EmberHelper::new();
    helper.set_variables(ember.variable_names());
    rl.set_helper(Some(helper));

    let mut state = ReplState::new();
    let mut had_runtime_error = false;

    loop {
        match rl.readline(&state.prompt()) {
            Ok(line) => {
                let _ = rl.add_history_entry(&line);

                if let Some(source) = state.push_line(&line) {
                    let errors = ember.run(&source, std::io::stdout());
                    reporter.report_all(&errors, &source, None, std::io::stderr());
                    had_runtime_error |= errors.iter().any(|e| !e.is_static() && !e.is_warning());

                    if let Some(helper) = rl.helper() {
                        helper.set_variables(ember.variable_names());
                    }
                }
            }
            Err(ReadlineError::Interrupted) => {
                if !state.is_pending() {
                    break;
                }
                state.cancel();
            }
            Err(ReadlineError::Eof) => {
                break;
            }
            Err(err) => {
                eprintln!("Prompt failed: {err}");
                break;
            }
        }
    }

    if had_runtime_error {
        ExitCode::from(EXIT_SOFTWARE)
    } else {
        ExitCode::SUCCESS
    }
}
