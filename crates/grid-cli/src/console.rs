//! Console command loop.
//!
//! Reads one command per line from stdin and drives a device connection over
//! an in-process hub. Completions and incoming messages are printed to stdout
//! as they arrive.

use crate::config::Config;
use anyhow::{Context, Result};
use grid_core::{Callback, Connection, ConnectionError, Grid, ListenerId};
use grid_transport::LocalHub;
use serde_json::Value;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info};

const HELP: &str = "\
commands:
  listen                 subscribe to the device channel
  stop                   cancel the subscription
  send <tag> <json>      publish a message
  on <tag>               print messages tagged <tag>
  off <tag>              stop printing messages tagged <tag>
  state                  show the connection state
  help                   show this list
  quit                   stop and exit";

/// Command parse errors.
#[derive(Debug, Error)]
pub enum CommandError {
    /// Blank input.
    #[error("Empty command")]
    Empty,

    /// Unrecognised command word.
    #[error("Unknown command: {0}")]
    Unknown(String),

    /// A required argument was not given.
    #[error("Missing argument: {0}")]
    MissingArgument(&'static str),

    /// The payload is not valid JSON.
    #[error("Invalid payload: {0}")]
    InvalidPayload(#[from] serde_json::Error),
}

/// A console command.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Listen,
    Stop,
    Send { tag: String, payload: Value },
    On(String),
    Off(String),
    State,
    Help,
    Quit,
}

impl FromStr for Command {
    type Err = CommandError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let line = line.trim();
        let (word, rest) = line
            .split_once(char::is_whitespace)
            .map_or((line, ""), |(w, r)| (w, r.trim()));

        match word {
            "" => Err(CommandError::Empty),
            "listen" => Ok(Command::Listen),
            "stop" => Ok(Command::Stop),
            "state" => Ok(Command::State),
            "help" | "?" => Ok(Command::Help),
            "quit" | "exit" => Ok(Command::Quit),
            "on" => first_word(rest, "tag").map(Command::On),
            "off" => first_word(rest, "tag").map(Command::Off),
            "send" => {
                let (tag, payload) = rest
                    .split_once(char::is_whitespace)
                    .map_or((rest, ""), |(t, p)| (t, p.trim()));
                if tag.is_empty() {
                    return Err(CommandError::MissingArgument("tag"));
                }
                let payload = if payload.is_empty() {
                    Value::Null
                } else {
                    serde_json::from_str(payload)?
                };
                Ok(Command::Send {
                    tag: tag.to_string(),
                    payload,
                })
            }
            other => Err(CommandError::Unknown(other.to_string())),
        }
    }
}

fn first_word(rest: &str, name: &'static str) -> Result<String, CommandError> {
    rest.split_whitespace()
        .next()
        .map(str::to_string)
        .ok_or(CommandError::MissingArgument(name))
}

/// A connection plus the printing listeners the console registered on it.
pub struct Console {
    connection: Connection,
    watched: HashMap<String, ListenerId>,
}

impl Console {
    /// Wrap a connection.
    #[must_use]
    pub fn new(connection: Connection) -> Self {
        Self {
            connection,
            watched: HashMap::new(),
        }
    }

    /// Print every message tagged `tag`. Returns `false` if already watched.
    pub fn watch(&mut self, tag: &str) -> bool {
        if self.watched.contains_key(tag) {
            return false;
        }
        let label = tag.to_string();
        let id = self
            .connection
            .on(tag, move |payload| println!("<- [{label}] {payload}"));
        self.watched.insert(tag.to_string(), id);
        true
    }

    /// Stop printing messages tagged `tag`.
    pub fn unwatch(&mut self, tag: &str) -> bool {
        match self.watched.remove(tag) {
            Some(id) => self.connection.off(tag, id),
            None => false,
        }
    }

    /// Run one command. Completions print asynchronously.
    pub fn execute(&mut self, command: Command) {
        debug!(?command, "Executing command");
        match command {
            Command::Listen => {
                self.connection.listen(report("listen"));
            }
            Command::Stop => {
                self.connection.stop(report_done("stop"));
            }
            Command::Send { tag, payload } => {
                self.connection.send(tag, payload, report("send"));
            }
            Command::On(tag) => {
                if !self.watch(&tag) {
                    println!("already watching {tag}");
                }
            }
            Command::Off(tag) => {
                if !self.unwatch(&tag) {
                    println!("not watching {tag}");
                }
            }
            Command::State => {
                println!(
                    "{} is {:?}",
                    self.connection.channel_name(),
                    self.connection.state()
                );
            }
            Command::Help => println!("{HELP}"),
            Command::Quit => {}
        }
    }

    /// The wrapped connection.
    #[must_use]
    pub fn connection(&self) -> &Connection {
        &self.connection
    }
}

/// A completion that prints the outcome of `operation`.
fn report(operation: &'static str) -> Option<Callback<Value>> {
    Some(Box::new(move |result: Result<Value, ConnectionError>| match result {
        Ok(value) => println!("{operation}: ok {value}"),
        Err(e) => println!("{operation}: error: {e}"),
    }))
}

fn report_done(operation: &'static str) -> Option<Callback<()>> {
    Some(Box::new(move |result: Result<(), ConnectionError>| match result {
        Ok(()) => println!("{operation}: ok"),
        Err(e) => println!("{operation}: error: {e}"),
    }))
}

/// Run the console until stdin closes or `quit` is entered.
///
/// # Errors
///
/// Returns an error if the configured device cannot be connected to or
/// stdin cannot be read.
pub async fn run(config: Config) -> Result<()> {
    let hub = LocalHub::with_config(config.hub.clone());
    let grid = Grid::new(Arc::new(hub));
    let connection = grid
        .devices()
        .connect(&config.device)
        .context("Invalid device identifier")?;

    let mut console = Console::new(connection);
    for tag in &config.tags {
        console.watch(tag);
    }

    if config.auto_listen {
        if let Some(task) = console.connection().listen(report("listen")) {
            task.await.context("Listen task failed")?;
        }
    }

    info!(
        channel = %console.connection().channel_name(),
        "Console ready, type `help` for commands"
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await.context("Failed to read stdin")? {
        match line.parse::<Command>() {
            Ok(Command::Quit) => break,
            Ok(command) => console.execute(command),
            Err(CommandError::Empty) => {}
            Err(e) => println!("{e}"),
        }
    }

    if console.connection().is_listening() {
        if let Some(task) = console.connection().stop(report_done("stop")) {
            task.await.context("Stop task failed")?;
        }
    }

    info!("Console closed");
    Ok(())
}
