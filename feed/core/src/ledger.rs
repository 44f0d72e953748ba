//! Command Ledger
//!
//! Fixed-capacity undo/redo history of user commands. Each entry holds the
//! command string that redoes an action and the one that undoes it; a
//! string may chain several sub-commands with `;`.
//!
//! # Cursors
//!
//! ```text
//! slots:   [ e0 e1 e2 e3 e4 .. ]
//!                  ^        ^
//!               current   first
//! ```
//!
//! `first` is the newest recorded entry, `current` the entry the next undo
//! reverts. Undo walks `current` back, redo walks it forward up to `first`.
//! Recording while `current != first` discards the entries past `current`.
//!
//! Undo depth is one less than the capacity so `current` never wraps onto
//! `first`.

use thiserror::Error;

/// Default number of slots
pub const DEFAULT_CAPACITY: usize = 10;

/// Separator between sub-commands of one entry
pub const SEPARATOR: char = ';';

/// Commands whose last argument is free text running to the end of the entry
const TEXT_COMMANDS: &[&str] = &["post", "reply"];

/// Ledger faults, reported to the user without changing state
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum LedgerError {
    /// No entry left to undo
    #[error("There is nothing to undo.")]
    NothingToUndo,
    /// No undone entry to redo
    #[error("There is nothing to redo.")]
    NothingToRedo,
}

/// Why a command is being executed
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommandOrigin {
    /// Issued by the user
    New,
    /// Replayed by undo
    Undo,
    /// Replayed by redo
    Redo,
}

/// One ledger slot
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LedgerEntry {
    /// Command(s) that perform the action
    pub redo: String,
    /// Command(s) that revert it
    pub undo: String,
}

/// Executes sub-commands replayed by undo and redo
pub trait CommandExecutor {
    /// Execute one sub-command
    fn execute(&mut self, command: &str, origin: CommandOrigin);
}

impl<F> CommandExecutor for F
where
    F: FnMut(&str, CommandOrigin),
{
    fn execute(&mut self, command: &str, origin: CommandOrigin) {
        self(command, origin);
    }
}

/// Which side of the history to list
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HistorySide {
    /// The commands as performed
    Redo,
    /// Their inverses
    Undo,
}

/// One line of [`CommandLedger::history`]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HistoryLine {
    /// Age of the entry, the newest entry has number 1
    pub number: usize,
    /// Sub-command
    pub command: String,
    /// Whether the entry is the one the next undo reverts
    pub current: bool,
}

impl std::fmt::Display for HistoryLine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.current {
            write!(f, "{:02} > {}", self.number, self.command)
        } else {
            write!(f, "{:02} {}", self.number, self.command)
        }
    }
}

/// Split an entry into its sub-commands
///
/// A `post` or `reply` sub-command takes the rest of the string verbatim,
/// separators included.
#[must_use]
pub fn split_commands(entry: &str) -> Vec<&str> {
    let mut commands = Vec::new();
    let mut rest = entry;

    loop {
        let trimmed = rest.trim_start();
        if trimmed.is_empty() {
            break;
        }

        let verb = trimmed.split_whitespace().next().unwrap_or_default();
        if TEXT_COMMANDS.contains(&verb) {
            commands.push(trimmed.trim_end());
            break;
        }

        match trimmed.split_once(SEPARATOR) {
            Some((command, tail)) => {
                let command = command.trim();
                if !command.is_empty() {
                    commands.push(command);
                }
                rest = tail;
            }
            None => {
                commands.push(trimmed.trim_end());
                break;
            }
        }
    }

    commands
}

/// Join sub-commands into one entry
#[must_use]
pub fn join_commands<S: AsRef<str>>(commands: &[S]) -> String {
    commands
        .iter()
        .map(AsRef::as_ref)
        .collect::<Vec<_>>()
        .join(&format!("{SEPARATOR} "))
}

/// Replace whole-token occurrences of `old` in `text`
///
/// A match counts only when the characters around it are not ASCII
/// alphanumeric, so rewriting `12` leaves `123` alone.
fn replace_token(text: &str, old: &str, new: &str) -> Option<String> {
    if old.is_empty() {
        return None;
    }

    let bytes = text.as_bytes();
    let mut out = String::with_capacity(text.len());
    let mut last = 0;
    let mut replaced = false;

    for (start, _) in text.match_indices(old) {
        if start < last {
            continue;
        }
        let end = start + old.len();
        let before_ok = start == 0 || !bytes[start - 1].is_ascii_alphanumeric();
        let after_ok = end == bytes.len() || !bytes[end].is_ascii_alphanumeric();
        if before_ok && after_ok {
            out.push_str(&text[last..start]);
            out.push_str(new);
            last = end;
            replaced = true;
        }
    }

    replaced.then(|| {
        out.push_str(&text[last..]);
        out
    })
}

/// Undo/redo ring
#[derive(Clone, Debug)]
pub struct CommandLedger {
    slots: Vec<Option<LedgerEntry>>,
    first: usize,
    current: usize,
}

impl Default for CommandLedger {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl CommandLedger {
    /// Create an empty ledger with `capacity` slots (at least 2)
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: vec![None; capacity.max(2)],
            first: 0,
            current: 0,
        }
    }

    /// Number of slots
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Index of the newest entry
    #[must_use]
    pub fn first(&self) -> usize {
        self.first
    }

    /// Index of the entry the next undo reverts
    #[must_use]
    pub fn current(&self) -> usize {
        self.current
    }

    /// Entry stored at `slot`
    #[must_use]
    pub fn entry(&self, slot: usize) -> Option<&LedgerEntry> {
        self.slots.get(slot).and_then(Option::as_ref)
    }

    fn next(&self, i: usize) -> usize {
        (i + 1) % self.capacity()
    }

    fn prev(&self, i: usize) -> usize {
        (i + self.capacity() - 1) % self.capacity()
    }

    /// Record a performed action
    pub fn record(&mut self, redo: impl Into<String>, undo: impl Into<String>) {
        let slot = self.next(self.current);
        self.slots[slot] = Some(LedgerEntry {
            redo: redo.into(),
            undo: undo.into(),
        });

        if self.current == self.first {
            self.current = slot;
            self.first = slot;
        } else {
            self.current = slot;
            let end = self.next(self.first);
            let mut stale = self.next(self.current);
            while stale != end {
                self.slots[stale] = None;
                stale = self.next(stale);
            }
            self.first = self.current;
        }

        tracing::trace!(slot, "Recorded ledger entry");
    }

    /// Revert the entry at `current` and step back
    ///
    /// At most `capacity - 1` entries can be undone, so `current` never wraps onto `first`.
    pub fn undo(&mut self, executor: &mut impl CommandExecutor) -> Result<(), LedgerError> {
        let Some(entry) = self.slots[self.current].as_ref() else {
            return Err(LedgerError::NothingToUndo);
        };
        if self.prev(self.current) == self.first {
            return Err(LedgerError::NothingToUndo);
        }

        for command in split_commands(&entry.undo) {
            executor.execute(command, CommandOrigin::Undo);
        }
        self.current = self.prev(self.current);
        Ok(())
    }

    /// Step forward and replay the entry there
    pub fn redo(&mut self, executor: &mut impl CommandExecutor) -> Result<(), LedgerError> {
        if self.current == self.first {
            return Err(LedgerError::NothingToRedo);
        }

        let slot = self.next(self.current);
        self.current = slot;
        if let Some(entry) = self.slots[slot].as_ref() {
            for command in split_commands(&entry.redo) {
                executor.execute(command, CommandOrigin::Redo);
            }
        }
        Ok(())
    }

    /// Replace whole-token occurrences of `old` with `new` in every entry
    ///
    /// Returns the number of strings changed. Calling it again with the same
    /// arguments changes nothing.
    pub fn rewrite_reference(&mut self, old: &str, new: &str) -> usize {
        let mut changed = 0;
        for entry in self.slots.iter_mut().flatten() {
            for text in [&mut entry.redo, &mut entry.undo] {
                if let Some(rewritten) = replace_token(text, old, new) {
                    *text = rewritten;
                    changed += 1;
                }
            }
        }
        if changed > 0 {
            tracing::debug!(old, new, changed, "Rewrote ledger references");
        }
        changed
    }

    /// The command that refers to the result of a replayed command
    ///
    /// After an undo, the redo of the entry just undone; after a redo, the
    /// undo of the entry just redone. This is where an id assigned by the
    /// server to a replayed post has to be patched in.
    #[must_use]
    pub fn counterpart(&self, origin: CommandOrigin) -> Option<&str> {
        match origin {
            CommandOrigin::New => None,
            CommandOrigin::Undo => self
                .entry(self.next(self.current))
                .map(|e| e.redo.as_str()),
            CommandOrigin::Redo => self.entry(self.current).map(|e| e.undo.as_str()),
        }
    }

    /// List the history oldest first, one line per sub-command
    #[must_use]
    pub fn history(&self, side: HistorySide) -> Vec<HistoryLine> {
        let capacity = self.capacity();
        let mut lines = Vec::new();

        for age in 0..capacity {
            let slot = (self.first + age + 1) % capacity;
            let Some(entry) = self.entry(slot) else {
                continue;
            };
            let text = match side {
                HistorySide::Redo => &entry.redo,
                HistorySide::Undo => &entry.undo,
            };
            for command in split_commands(text) {
                lines.push(HistoryLine {
                    number: capacity - age,
                    command: command.to_string(),
                    current: slot == self.current,
                });
            }
        }

        lines
    }
}
