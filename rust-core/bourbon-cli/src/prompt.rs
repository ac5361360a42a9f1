//! Interactive confirmation for destructive migrations.

use bourbon_core::migrate::{ChangeSet, ConfirmGate};
use colored::Colorize;
use std::io::{BufRead, Write};

/// Asks on `output` and reads the answer from `input`
///
/// Only `y` or `yes` (any case) proceeds. End of input or a read error
/// counts as no.
#[derive(Debug)]
pub struct Prompt<R, W> {
    input: R,
    output: W,
}

impl<R: BufRead, W: Write> Prompt<R, W> {
    /// Prompt over the given streams
    pub const fn new(input: R, output: W) -> Self {
        Self { input, output }
    }

    fn ask(&mut self, changes: &ChangeSet) -> std::io::Result<bool> {
        writeln!(
            self.output,
            "{}",
            "The following changes will drop data:".red().bold()
        )?;
        for line in changes.destructive_summary() {
            writeln!(self.output, "  {} {}", "•".red(), line.yellow())?;
        }
        write!(self.output, "Continue? [y/N] ")?;
        self.output.flush()?;

        let mut answer = String::new();
        if self.input.read_line(&mut answer)? == 0 {
            return Ok(false);
        }
        let answer = answer.trim();
        Ok(answer.eq_ignore_ascii_case("y") || answer.eq_ignore_ascii_case("yes"))
    }
}

impl Prompt<std::io::StdinLock<'static>, std::io::Stdout> {
    /// Prompt on the terminal
    pub fn stdio() -> Self {
        Self::new(std::io::stdin().lock(), std::io::stdout())
    }
}

impl<R: BufRead, W: Write> ConfirmGate for Prompt<R, W> {
    fn confirm(&mut self, changes: &ChangeSet) -> bool {
        self.ask(changes).unwrap_or(false)
    }
}
