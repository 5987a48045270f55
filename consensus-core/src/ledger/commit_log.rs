// Copyright (c) Aptos Foundation
// SPDX-License-Identifier: Apache-2.0

//! Append-only ledger files.

use consensus_traits::CommitLog;
use std::borrow::Cow;
use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

/// Writes one committed command per line and syncs after every block.
///
/// Backslashes and newlines inside a command are escaped as `\\` and `\n`,
/// so every line maps back to exactly one command.
#[derive(Debug)]
pub struct FileLedgerLog {
    path: PathBuf,
    writer: BufWriter<File>,
}

impl FileLedgerLog {
    /// Open `path` for appending, creating it if needed.
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            writer: BufWriter::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Committed commands stored at `path`, in commit order.
    pub fn read_commands(path: impl AsRef<Path>) -> io::Result<Vec<String>> {
        let contents = std::fs::read_to_string(path)?;
        Ok(contents.lines().map(unescape).collect())
    }
}

impl CommitLog for FileLedgerLog {
    fn append(&mut self, commands: &[&str]) -> io::Result<()> {
        for command in commands {
            writeln!(self.writer, "{}", escape(command))?;
        }
        self.writer.flush()?;
        self.writer.get_ref().sync_data()
    }
}

fn escape(command: &str) -> Cow<'_, str> {
    if !command.contains(['\\', '\n']) {
        return Cow::Borrowed(command);
    }
    Cow::Owned(command.replace('\\', "\\\\").replace('\n', "\\n"))
}

fn unescape(line: &str) -> String {
    let mut command = String::with_capacity(line.len());
    let mut chars = line.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            command.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => command.push('\n'),
            Some(other) => command.push(other),
            None => command.push('\\'),
        }
    }
    command
}

/// Discards committed commands.
#[derive(Debug, Default)]
pub struct NoopLedgerLog;

impl CommitLog for NoopLedgerLog {
    fn append(&mut self, _commands: &[&str]) -> io::Result<()> {
        Ok(())
    }
}
