//! Line-oriented console for a running engine.

use std::io::BufRead;
use tokio::sync::mpsc::{UnboundedReceiver, unbounded_channel};
use tracing::debug;

use crate::engine::{EngineHandle, EngineSnapshot};
use crate::models::Credentials;
use crate::utils::error::{AppError, Result};
use crate::view::ThumbnailState;

pub const HELP: &str = "\
Commands:
  start [CLIENT_ID API_KEY]  start repricing (saved credentials when omitted)
  stop                       stop repricing and save settings
  refresh                    run a cycle now
  edit                       toggle edit mode (leaving applies the edits)
  check OFFER_ID             track a product (edit mode)
  uncheck OFFER_ID           stop tracking a product (edit mode)
  target OFFER_ID [PRICE]    set or clear the target price (edit mode)
  all                        check all products, or uncheck all (edit mode)
  coef VALUE                 set the discount coefficient (edit mode)
  filter                     toggle showing only products on sale
  rows                       print the product table
  status                     print session state
  help                       show this text
  quit                       save settings and exit";

#[derive(Debug, Clone, PartialEq)]
pub enum ConsoleCommand {
    Start(Option<Credentials>),
    Stop,
    Refresh,
    Edit,
    Check(String),
    Uncheck(String),
    Target(String, Option<u32>),
    All,
    Coef(f64),
    Filter,
    Rows,
    Status,
    Help,
    Quit,
}

fn parse_error(message: impl Into<String>) -> AppError {
    AppError::Parse {
        message: message.into(),
    }
}

fn offer_arg<'a>(args: &[&'a str], command: &str) -> Result<&'a str> {
    match args {
        [offer_id] => Ok(*offer_id),
        _ => Err(parse_error(format!("usage: {} OFFER_ID", command))),
    }
}

/// Parses one console line. Blank lines yield `None`.
pub fn parse_console_command(line: &str) -> Result<Option<ConsoleCommand>> {
    let mut words = line.split_whitespace();
    let Some(name) = words.next() else {
        return Ok(None);
    };
    let args: Vec<&str> = words.collect();

    let command = match name.to_ascii_lowercase().as_str() {
        "start" => match args.as_slice() {
            [] => ConsoleCommand::Start(None),
            [client_id, api_key] => ConsoleCommand::Start(Some(Credentials::new(*client_id, *api_key))),
            _ => return Err(parse_error("usage: start [CLIENT_ID API_KEY]")),
        },
        "stop" => ConsoleCommand::Stop,
        "refresh" => ConsoleCommand::Refresh,
        "edit" => ConsoleCommand::Edit,
        "check" => ConsoleCommand::Check(offer_arg(&args, "check")?.to_string()),
        "uncheck" => ConsoleCommand::Uncheck(offer_arg(&args, "uncheck")?.to_string()),
        "target" => match args.as_slice() {
            [offer_id] => ConsoleCommand::Target(offer_id.to_string(), None),
            [offer_id, price] => {
                let price = price
                    .parse::<u32>()
                    .map_err(|_| parse_error(format!("target price must be a whole number, got {}", price)))?;
                ConsoleCommand::Target(offer_id.to_string(), Some(price))
            }
            _ => return Err(parse_error("usage: target OFFER_ID [PRICE]")),
        },
        "all" => ConsoleCommand::All,
        "coef" => match args.as_slice() {
            [value] => ConsoleCommand::Coef(
                value
                    .replace(',', ".")
                    .parse::<f64>()
                    .map_err(|_| parse_error(format!("coefficient must be a number, got {}", value)))?,
            ),
            _ => return Err(parse_error("usage: coef VALUE")),
        },
        "filter" => ConsoleCommand::Filter,
        "rows" | "ls" => ConsoleCommand::Rows,
        "status" => ConsoleCommand::Status,
        "help" | "?" => ConsoleCommand::Help,
        "quit" | "exit" | "q" => ConsoleCommand::Quit,
        other => return Err(parse_error(format!("unknown command '{}', try 'help'", other))),
    };
    Ok(Some(command))
}

pub fn render_status(snapshot: &EngineSnapshot) -> String {
    let state = match (snapshot.active, snapshot.phase) {
        (_, Some(phase)) => format!("running ({:?})", phase).to_lowercase(),
        (true, None) if snapshot.timer_armed => format!("idle, next cycle within {}s", snapshot.interval_secs),
        (true, None) => "idle".to_string(),
        (false, None) => "stopped".to_string(),
    };
    let last_finished = snapshot
        .stats
        .last_finished_at
        .map(|at| at.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| "never".to_string());

    format!(
        "account: {}\nstate: {}\nedit mode: {}\ncoefficient: {}\ntracked: {} of {} products\n\
         cycles: {} started, {} ok, {} failed (last finished {})\nprice updates: {} ok, {} failed",
        if snapshot.account.is_empty() { "-" } else { snapshot.account.as_str() },
        state,
        if snapshot.edit_mode { "on" } else { "off" },
        snapshot.coefficient,
        snapshot.tracked,
        snapshot.total_rows,
        snapshot.stats.cycles_started,
        snapshot.stats.cycles_succeeded,
        snapshot.stats.cycles_failed,
        last_finished,
        snapshot.stats.updates_submitted,
        snapshot.stats.updates_failed,
    )
}

pub fn render_rows(snapshot: &EngineSnapshot) -> String {
    let mut out = format!(
        "{:<3} {:<20} {:<40} {:<18} {:>10} {:>8}  {}\n",
        "", "offer", "name", if snapshot.status_filter { "status (filter)" } else { "status (all)" }, "price", "target", "image"
    );
    for row in &snapshot.rows {
        let image = match &row.thumbnail {
            ThumbnailState::NoImage => "-".to_string(),
            ThumbnailState::Loading => "loading".to_string(),
            ThumbnailState::Ready(thumbnail) => format!("{}x{}", thumbnail.width, thumbnail.height),
            ThumbnailState::Unavailable => "error".to_string(),
        };
        out.push_str(&format!(
            "{:<3} {:<20} {:<40} {:<18} {:>10} {:>8}  {}\n",
            if row.checked { "[x]" } else { "[ ]" },
            row.offer_id,
            row.name.chars().take(40).collect::<String>(),
            row.status.chars().take(18).collect::<String>(),
            row.display_price.as_deref().unwrap_or("-"),
            row.target_input.map(|t| t.to_string()).unwrap_or_default(),
            image,
        ));
    }
    out
}

/// Executes one command. Returns `false` when the console should exit.
pub async fn execute(handle: &EngineHandle, command: ConsoleCommand) -> Result<bool> {
    match command {
        ConsoleCommand::Start(credentials) => {
            handle.start(credentials).await?;
            println!("started");
        }
        ConsoleCommand::Stop => {
            handle.stop().await?;
            println!("stopped, settings saved");
        }
        ConsoleCommand::Refresh => {
            if handle.refresh().await? {
                println!("cycle started");
            } else {
                println!("nothing started: no session or a cycle is already running");
            }
        }
        ConsoleCommand::Edit => {
            let edit_mode = handle.toggle_edit_mode().await?;
            println!("edit mode {}", if edit_mode { "on" } else { "off, edits applied" });
        }
        ConsoleCommand::Check(offer_id) => handle.set_checked(offer_id, true).await?,
        ConsoleCommand::Uncheck(offer_id) => handle.set_checked(offer_id, false).await?,
        ConsoleCommand::Target(offer_id, price) => handle.set_target(offer_id, price).await?,
        ConsoleCommand::All => {
            let checked = handle.select_all_or_none().await?;
            println!("{} products", if checked { "checked all" } else { "unchecked all" });
        }
        ConsoleCommand::Coef(value) => handle.set_coefficient(value).await?,
        ConsoleCommand::Filter => {
            let filtered = handle.toggle_status_filter().await?;
            println!("showing {}", if filtered { "products on sale" } else { "all products" });
        }
        ConsoleCommand::Rows => print!("{}", render_rows(&handle.snapshot().await?)),
        ConsoleCommand::Status => println!("{}", render_status(&handle.snapshot().await?)),
        ConsoleCommand::Help => println!("{}", HELP),
        ConsoleCommand::Quit => return Ok(false),
    }
    Ok(true)
}

/// Reads commands until `quit` or until the input closes, then asks the
/// engine to shut down. Command errors are printed and do not end the loop.
pub async fn run_console(handle: EngineHandle, mut lines: UnboundedReceiver<String>) {
    while let Some(line) = lines.recv().await {
        let command = match parse_console_command(&line) {
            Ok(Some(command)) => command,
            Ok(None) => continue,
            Err(e) => {
                eprintln!("{}", e);
                continue;
            }
        };
        debug!("Console command: {:?}", command);
        match execute(&handle, command).await {
            Ok(true) => {}
            Ok(false) => break,
            Err(e) => eprintln!("{}", e),
        }
    }
    handle.shutdown();
}

/// Forwards stdin lines from a dedicated thread, so a pending read never
/// holds up runtime shutdown.
pub fn spawn_stdin_reader() -> Result<UnboundedReceiver<String>> {
    let (tx, rx) = unbounded_channel();
    std::thread::Builder::new()
        .name("console-input".into())
        .spawn(move || {
            for line in std::io::stdin().lock().lines() {
                let Ok(line) = line else { break };
                if tx.send(line).is_err() {
                    break;
                }
            }
        })?;
    Ok(rx)
}
