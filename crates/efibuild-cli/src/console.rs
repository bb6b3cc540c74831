//! Terminal rendering of core progress and status.

use std::io::{IsTerminal, Write};
use std::sync::Mutex;

use crossterm::style::Stylize;
use crossterm::terminal::{Clear, ClearType};
use crossterm::{QueueableCommand, cursor};
use efibuild_core::Reporter;

/// Status icons
const INFO: &str = "•";
const SUCCESS: &str = "✓";
const WARNING: &str = "!";
const ERROR: &str = "✗";

/// [`Reporter`] printing to the terminal. Progress redraws a single line
/// when stdout is a terminal and prints only the final count otherwise.
#[derive(Debug)]
pub struct ConsoleReporter {
    verbose: bool,
    interactive: bool,
    /// Whether a progress line is open and must be closed before the next
    /// message.
    progress_open: Mutex<bool>,
}

impl ConsoleReporter {
    pub fn new(verbose: bool) -> Self {
        Self {
            verbose,
            interactive: std::io::stdout().is_terminal(),
            progress_open: Mutex::new(false),
        }
    }

    fn close_progress(&self) {
        if let Ok(mut open) = self.progress_open.lock() {
            if *open {
                println!();
                *open = false;
            }
        }
    }
}

impl Reporter for ConsoleReporter {
    fn section(&self, title: &str) {
        self.close_progress();
        println!();
        println!("{}", title.bold());
    }

    fn step(&self, description: &str, current: usize, total: usize) {
        let done = current >= total;
        if !self.interactive {
            if done || self.verbose {
                println!("  {description} {current}/{total}");
            }
            return;
        }

        let mut stdout = std::io::stdout();
        let _ = stdout.queue(cursor::MoveToColumn(0));
        let _ = stdout.queue(Clear(ClearType::CurrentLine));
        let _ = write!(stdout, "  {} {}", description.dark_grey(), format!("{current}/{total}").cyan());
        if done {
            let _ = writeln!(stdout);
        }
        let _ = stdout.flush();
        if let Ok(mut open) = self.progress_open.lock() {
            *open = !done;
        }
    }

    fn info(&self, msg: &str) {
        self.close_progress();
        println!("  {} {msg}", INFO.dark_grey());
    }

    fn success(&self, msg: &str) {
        self.close_progress();
        println!("  {} {msg}", SUCCESS.green());
    }

    fn warning(&self, msg: &str) {
        self.close_progress();
        eprintln!("  {} {}", WARNING.yellow().bold(), msg.yellow());
    }

    fn error(&self, msg: &str) {
        self.close_progress();
        eprintln!("  {} {}", ERROR.red().bold(), msg.red());
    }
}
