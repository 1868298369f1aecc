//! Operator input: key states in, command bytes out.
//!
//! A [`CommandSource`] yields snapshots of `(key, state)` pairs. Only keys in
//! the pressed state (`1`) produce commands; releases and unbound keys are
//! ignored.

use std::collections::BTreeMap;

use async_trait::async_trait;
use marklink_core::Command;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Lines, Stdin};
use tokio::sync::mpsc;
use tracing::{debug, trace};

/// One snapshot of key states, in the order the source reported them.
pub type KeyStates = Vec<(String, u8)>;

pub const KEY_PRESSED: u8 = 1;

#[async_trait]
pub trait CommandSource: Send {
    /// Await the next snapshot. `None` when the source is exhausted.
    async fn read(&mut self) -> Option<KeyStates>;
}

// MARK: - KeyBindings

/// Key name → command table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyBindings {
    map: BTreeMap<String, Command>,
}

impl Default for KeyBindings {
    fn default() -> Self {
        let map = [
            ("KEY_W", Command::Forward),
            ("KEY_A", Command::Left),
            ("KEY_S", Command::Backward),
            ("KEY_D", Command::Right),
            // Some keyboards report D as KEY_RESERVED.
            ("KEY_RESERVED", Command::Right),
            ("KEY_SPACE", Command::Stop),
            ("KEY_UP", Command::TiltIncrease),
            ("KEY_DOWN", Command::TiltDecrease),
            ("KEY_LEFT", Command::PanIncrease),
            ("KEY_RIGHT", Command::PanDecrease),
            ("KEY_O", Command::Trigger),
        ]
        .into_iter()
        .map(|(key, cmd)| (key.to_owned(), cmd))
        .collect();
        Self { map }
    }
}

impl KeyBindings {
    pub fn with_overrides(mut self, overrides: BTreeMap<String, Command>) -> Self {
        self.map.extend(overrides);
        self
    }

    pub fn command_for(&self, key: &str) -> Option<Command> {
        self.map.get(key).copied()
    }

    /// Commands for every pressed, bound key in `states`, in snapshot order.
    pub fn commands_for(&self, states: &KeyStates) -> Vec<Command> {
        states
            .iter()
            .filter(|(_, state)| *state == KEY_PRESSED)
            .filter_map(|(key, _)| self.command_for(key))
            .collect()
    }
}

// MARK: - Relay

/// Push the command byte for every pressed key into `queue` until the source
/// ends or the queue closes. Returns the number of bytes queued.
pub async fn relay<S: CommandSource + ?Sized>(
    source: &mut S,
    bindings: &KeyBindings,
    queue: &mpsc::UnboundedSender<u8>,
) -> u64 {
    let mut queued = 0u64;
    while let Some(states) = source.read().await {
        for command in bindings.commands_for(&states) {
            trace!("Queueing {:?}", command);
            if queue.send(command.as_byte()).is_err() {
                debug!("Command queue closed; stopping relay");
                return queued;
            }
            queued += 1;
        }
    }
    debug!("Command source exhausted after {} commands", queued);
    queued
}

// MARK: - LineSource

/// Reads snapshots as text lines of `KEY_NAME STATE` pairs, e.g.
/// `KEY_W 1 KEY_LEFT 1`. Malformed pairs are skipped.
pub struct LineSource<R> {
    lines: Lines<R>,
}

impl<R: AsyncBufRead + Unpin + Send> LineSource<R> {
    pub fn new(reader: R) -> Self {
        Self {
            lines: reader.lines(),
        }
    }
}

/// Line source over the process's stdin.
pub fn stdin_source() -> LineSource<BufReader<Stdin>> {
    LineSource::new(BufReader::new(tokio::io::stdin()))
}

pub fn parse_line(line: &str) -> KeyStates {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    tokens
        .chunks(2)
        .filter_map(|pair| match pair {
            [key, state] => match state.parse::<u8>() {
                Ok(state @ 0..=1) => Some(((*key).to_owned(), state)),
                _ => {
                    debug!("Ignoring key state {:?} for {}", state, key);
                    None
                }
            },
            _ => None,
        })
        .collect()
}

#[async_trait]
impl<R: AsyncBufRead + Unpin + Send> CommandSource for LineSource<R> {
    async fn read(&mut self) -> Option<KeyStates> {
        loop {
            match self.lines.next_line().await {
                Ok(Some(line)) => {
                    let states = parse_line(&line);
                    if !states.is_empty() {
                        return Some(states);
                    }
                }
                Ok(None) => return None,
                Err(e) => {
                    debug!("Command source read error: {}", e);
                    return None;
                }
            }
        }
    }
}
