// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The persisted state format: `key=value`, one entry per line.
//!
//! This is the format the supervisor streams unit state through across a
//! re-execution. It predates this codebase; the writer and reader here keep
//! the on-wire bytes fixed no matter how the unit internals move around.
//! Values may contain `=` and spaces — only the first `=` splits.

use std::io::{self, BufRead, Write};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SerialError {
    #[error("malformed line (no '='): {0:?}")]
    Malformed(String),

    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Writes `key=value` entries to an output stream.
pub struct SerialWriter<W: Write> {
    out: W,
}

impl<W: Write> SerialWriter<W> {
    pub fn new(out: W) -> Self {
        SerialWriter { out }
    }

    pub fn item(&mut self, key: &str, value: impl std::fmt::Display) -> Result<(), SerialError> {
        writeln!(self.out, "{key}={value}")?;
        Ok(())
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

/// Iterates `(key, value)` entries from an input stream, skipping blank lines.
pub struct SerialReader<R: BufRead> {
    input: R,
}

impl<R: BufRead> SerialReader<R> {
    pub fn new(input: R) -> Self {
        SerialReader { input }
    }
}

impl<R: BufRead> Iterator for SerialReader<R> {
    type Item = Result<(String, String), SerialError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let mut line = String::new();
            match self.input.read_line(&mut line) {
                Ok(0) => return None,
                Ok(_) => {}
                Err(e) => return Some(Err(e.into())),
            }
            let line = line.trim_end_matches('\n');
            if line.is_empty() {
                continue;
            }
            return Some(match line.split_once('=') {
                Some((key, value)) => Ok((key.to_string(), value.to_string())),
                None => Err(SerialError::Malformed(line.to_string())),
            });
        }
    }
}

#[cfg(test)]
#[path = "serial_tests.rs"]
mod tests;
