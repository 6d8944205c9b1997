//! The display collaborator. The core only needs three things from its
//! surroundings: somewhere to put text, somewhere to get a line of input,
//! and a notification when the story ends.

use std::collections::VecDeque;
use std::io::{self, BufRead, Write};

use crossterm::{cursor, execute, terminal};
use log::debug;

/// What the interpreter expects from a display. Wrapping, scrolling and
/// status lines are the implementation's business.
pub trait Screen {
    /// Append printable text (may contain newlines).
    fn print_text(&mut self, text: &str);

    /// Block until the user completes a line; the terminating newline is
    /// stripped.
    fn read_line(&mut self) -> String;

    /// Release any terminal state. Called once, when the story quits or
    /// dies.
    fn end(&mut self);
}

/// A plain terminal screen. Clears the display on startup when stdout is a
/// real tty; degrades to line-oriented stdio when it is not (pipes, CI).
pub struct TerminalScreen {
    is_tty: bool,
}

impl TerminalScreen {
    pub fn new() -> TerminalScreen {
        let is_tty = atty::is(atty::Stream::Stdout);
        if is_tty {
            let cleared = execute!(
                io::stdout(),
                terminal::Clear(terminal::ClearType::All),
                cursor::MoveTo(0, 0)
            );
            if let Err(e) = cleared {
                debug!("could not clear terminal: {e}");
            }
        }
        TerminalScreen { is_tty }
    }
}

impl Default for TerminalScreen {
    fn default() -> Self {
        TerminalScreen::new()
    }
}

impl Screen for TerminalScreen {
    fn print_text(&mut self, text: &str) {
        print!("{text}");
        io::stdout().flush().ok();
    }

    fn read_line(&mut self) -> String {
        let mut line = String::new();
        if io::stdin().lock().read_line(&mut line).is_err() {
            return String::new();
        }
        line.trim_end_matches(['\n', '\r']).to_string()
    }

    fn end(&mut self) {
        io::stdout().flush().ok();
        if self.is_tty {
            println!();
        }
    }
}

/// A screen that buffers everything: output accumulates in a string, input
/// comes from a queue of prepared lines. Used by tests and embedders.
#[derive(Default)]
pub struct BufferScreen {
    output: String,
    input: VecDeque<String>,
    ended: bool,
}

impl BufferScreen {
    pub fn new() -> BufferScreen {
        BufferScreen::default()
    }

    pub fn with_input<I, S>(lines: I) -> BufferScreen
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        BufferScreen {
            input: lines.into_iter().map(Into::into).collect(),
            ..BufferScreen::default()
        }
    }

    pub fn output(&self) -> &str {
        &self.output
    }

    pub fn ended(&self) -> bool {
        self.ended
    }
}

impl Screen for BufferScreen {
    fn print_text(&mut self, text: &str) {
        self.output.push_str(text);
    }

    fn read_line(&mut self) -> String {
        self.input.pop_front().unwrap_or_default()
    }

    fn end(&mut self) {
        self.ended = true;
    }
}
