//! todolist - terminal front end for the task file.
//!
//! # Commands
//!
//! - `todolist show`: Print pending and done tasks
//! - `todolist add <TEXT>`: Add a pending task
//! - `todolist complete <TEXT>`: Move a pending task to done
//! - `todolist delete <TEXT>`: Remove a done task
//! - `todolist path`: Print the task file path
//! - `todolist watch`: Interactive mode that re-renders on every file change
//!
//! # Environment Variables
//!
//! See the [`config`] module for available configuration options.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use todolist::config::Config;
use todolist::controller::{ControllerState, ListController, ListEvent};
use todolist::types::ViewModel;

/// Longest task text accepted from the user, in characters.
const MAX_TASK_LENGTH: usize = 100;

/// Label shown while a change is on its way to disk and back.
const BUSY_LABEL: &str = "(...)";

/// todolist - a task list kept in a JSON file.
///
/// Reads and writes `~/.todo.json` (or TODOLIST_FILE). Other programs may
/// edit the same file; `watch` mode picks their changes up live.
#[derive(Parser, Debug)]
#[command(name = "todolist")]
#[command(author, version, about, long_about = None)]
#[command(after_help = "\
ENVIRONMENT VARIABLES:
    TODOLIST_FILE              Task file (default: ~/.todo.json)
    TODOLIST_LIST_INDEX        List inside the file (default: 0)
    TODOLIST_CLIPBOARD         Copy completed/deleted tasks (default: false)
    TODOLIST_DEBOUNCE_MS       Change debounce window (default: 100)
    TODOLIST_POLL_INTERVAL_MS  Poll instead of native notifications
    TODOLIST_LOG_FORMAT        Set to 'json' for JSON logs

EXAMPLES:
    todolist add Buy milk
    todolist complete Buy milk
    todolist watch
")]
struct Cli {
    /// Task file to use instead of TODOLIST_FILE.
    #[arg(short, long, global = true)]
    file: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

/// CLI subcommands.
#[derive(Subcommand, Debug)]
enum Command {
    /// Print pending and done tasks.
    Show,

    /// Add a pending task.
    Add {
        /// Task text; multiple words are joined with spaces.
        #[arg(required = true)]
        text: Vec<String>,
    },

    /// Move a pending task to done.
    Complete {
        /// Exact text of the pending task.
        #[arg(required = true)]
        text: Vec<String>,
    },

    /// Remove a done task.
    Delete {
        /// Exact text of the done task.
        #[arg(required = true)]
        text: Vec<String>,
    },

    /// Print the task file path.
    Path,

    /// Show the list and keep it up to date while reading commands from stdin.
    ///
    /// Commands: `add <text>`, `done <text>`, `rm <text>`, `refresh`, `quit`.
    Watch,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging();

    let mut config = Config::from_env().context("Failed to load configuration")?;
    if let Some(file) = cli.file {
        config = config.with_file_path(file);
    }

    let controller = ListController::from_config(&config);

    match cli.command {
        Command::Show => {
            let view = controller.refresh().context("Failed to load tasks")?;
            render(&view);
        }
        Command::Add { text } => {
            controller.refresh().context("Failed to load tasks")?;
            let text = clamp_task_text(&text.join(" "));
            controller
                .submit_new_task(&text)
                .context("Failed to add task")?;
        }
        Command::Complete { text } => {
            let acted = controller
                .complete_item(&text.join(" "))
                .context("Failed to complete task")?;
            report_acted(acted.as_deref(), "pending", config.clipboard_enabled);
        }
        Command::Delete { text } => {
            let acted = controller
                .delete_item(&text.join(" "))
                .context("Failed to delete task")?;
            report_acted(acted.as_deref(), "done", config.clipboard_enabled);
        }
        Command::Path => println!("{}", controller.file_path().display()),
        Command::Watch => {
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()
                .context("Failed to create tokio runtime")?;

            let result = runtime.block_on(run_watch(controller, config.clipboard_enabled));
            // The stdin reader sits in a blocking read; don't wait for it.
            runtime.shutdown_background();
            result?;
        }
    }

    Ok(())
}

/// A line typed in watch mode.
#[derive(Debug, PartialEq, Eq)]
enum Input {
    Add(String),
    Done(String),
    Remove(String),
    Refresh,
    Quit,
    Unknown(String),
}

fn parse_input(line: &str) -> Input {
    let line = line.trim();
    let (verb, rest) = line
        .split_once(char::is_whitespace)
        .map_or((line, ""), |(verb, rest)| (verb, rest.trim()));

    match verb {
        "add" | "a" if !rest.is_empty() => Input::Add(rest.to_string()),
        "done" | "d" if !rest.is_empty() => Input::Done(rest.to_string()),
        "rm" | "r" if !rest.is_empty() => Input::Remove(rest.to_string()),
        "refresh" => Input::Refresh,
        "quit" | "q" | "exit" => Input::Quit,
        _ => Input::Unknown(line.to_string()),
    }
}

/// Runs the interactive watch mode until `quit`, end of input, or a signal.
async fn run_watch(mut controller: ListController, clipboard_enabled: bool) -> Result<()> {
    let view = controller.refresh().context("Failed to load tasks")?;
    render(&view);

    let (events_tx, mut events_rx) = watch::channel(ListEvent::Refreshed(view));
    if let Err(e) = controller.start(events_tx) {
        warn!(error = %e, "Auto-refresh unavailable");
        eprintln!("auto-refresh disabled: {e}");
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            _ = wait_for_shutdown() => {
                info!("Shutdown signal received");
                break;
            }

            Ok(()) = events_rx.changed() => {
                let event = events_rx.borrow_and_update().clone();
                match event {
                    ListEvent::Refreshed(view) => render(&view),
                    ListEvent::RefreshFailed(message) => eprintln!("error: {message}"),
                }
            }

            line = lines.next_line() => {
                let Some(line) = line.context("Failed to read stdin")? else {
                    break;
                };
                if !handle_input(&controller, parse_input(&line), clipboard_enabled) {
                    break;
                }
            }
        }
    }

    controller.stop();
    Ok(())
}

/// Applies one watch-mode command. Returns `false` when the user quits.
fn handle_input(controller: &ListController, input: Input, clipboard_enabled: bool) -> bool {
    let outcome = match input {
        Input::Add(text) => controller
            .submit_new_task(&clamp_task_text(&text))
            .map(|()| true),
        Input::Done(text) => controller.complete_item(&text).map(|acted| {
            copy_if_enabled(acted.as_deref(), clipboard_enabled);
            acted.is_some()
        }),
        Input::Remove(text) => controller.delete_item(&text).map(|acted| {
            copy_if_enabled(acted.as_deref(), clipboard_enabled);
            acted.is_some()
        }),
        Input::Refresh => {
            match controller.refresh() {
                Ok(view) => render(&view),
                Err(e) => eprintln!("error: {e}"),
            }
            return true;
        }
        Input::Quit => return false,
        Input::Unknown(line) => {
            if !line.is_empty() {
                eprintln!("unknown command: {line} (try: add, done, rm, refresh, quit)");
            }
            return true;
        }
    };

    match outcome {
        Ok(true) => match busy_label(controller.state()) {
            Some(label) => println!("{label}"),
            // Nothing will repaint for us.
            None => match controller.refresh() {
                Ok(view) => render(&view),
                Err(e) => eprintln!("error: {e}"),
            },
        },
        Ok(false) => eprintln!("no matching task"),
        Err(e) => eprintln!("error: {e}"),
    }
    true
}

/// Label to show after a change, if a change notification will replace it.
fn busy_label(state: ControllerState) -> Option<&'static str> {
    match state {
        ControllerState::Enabled => Some(BUSY_LABEL),
        ControllerState::Disabled => None,
    }
}

/// Prints the list the way the panel menu lays it out.
fn render(view: &ViewModel) {
    println!("({}) {}", view.pending_count, view.list_name);
    println!("TODO");
    for task in &view.pending_items {
        println!("  {task}");
    }
    println!("DONE");
    for task in &view.done_items {
        println!("  {task}");
    }
}

fn report_acted(acted: Option<&str>, from: &str, clipboard_enabled: bool) {
    match acted {
        Some(text) => {
            println!("{text}");
            copy_if_enabled(Some(text), clipboard_enabled);
        }
        None => eprintln!("no matching {from} task"),
    }
}

/// Truncates task text to [`MAX_TASK_LENGTH`] characters.
fn clamp_task_text(text: &str) -> String {
    if text.chars().count() <= MAX_TASK_LENGTH {
        return text.to_string();
    }
    warn!(max = MAX_TASK_LENGTH, "Task text truncated");
    text.chars().take(MAX_TASK_LENGTH).collect()
}

fn copy_if_enabled(text: Option<&str>, clipboard_enabled: bool) {
    let Some(text) = text else {
        return;
    };
    if !clipboard_enabled {
        return;
    }
    if let Err(e) = copy_to_clipboard(text) {
        warn!(error = %e, "Failed to copy task to clipboard");
    }
}

#[cfg(feature = "clipboard")]
fn copy_to_clipboard(text: &str) -> Result<()> {
    use clipboard_rs::{Clipboard, ClipboardContext};

    let ctx = ClipboardContext::new()
        .map_err(|e| anyhow::anyhow!("failed to open clipboard: {e}"))?;
    ctx.set_text(text.to_string())
        .map_err(|e| anyhow::anyhow!("failed to set clipboard text: {e}"))?;
    Ok(())
}

#[cfg(not(feature = "clipboard"))]
fn copy_to_clipboard(_text: &str) -> Result<()> {
    anyhow::bail!("built without the `clipboard` feature")
}

/// Initializes the logging subsystem.
///
/// Logs go to stderr so they never mix with the rendered list.
fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let json = std::env::var("TODOLIST_LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_level(true);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn wait_for_shutdown() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
