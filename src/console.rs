//! Line-mode front end.
//!
//! `CommandReader` reads stdin on its own thread and sends whole lines over
//! an `mpsc::channel`; the main loop drains it with `try_recv()` each poll
//! cycle, next to `Coordinator::poll()`. `Console` is the `UiSurface` that
//! prints what the coordinator reports.

use std::fmt;
use std::io::{self, BufRead, Write};
use std::sync::mpsc;
use std::thread::{self, JoinHandle};

use anyhow::Context;
use log::debug;

use crate::model::{Entry, EntryId};
use crate::surface::UiSurface;

pub const HELP: &str = "\
commands:
  /TEXT   filter titles by TEXT (a lone / clears the filter)
  m       load more
  r       refresh
  d N     download row N
  l       list displayed rows
  ?       this help
  q       quit";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Filter(String),
    More,
    Refresh,
    /// 1-based row as printed.
    Download(usize),
    List,
    Help,
    Quit,
}

/// Parse one input line. `Ok(None)` for blank lines.
pub fn parse_command(line: &str) -> Result<Option<Command>, String> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    if let Some(text) = line.strip_prefix('/') {
        return Ok(Some(Command::Filter(text.trim().to_string())));
    }
    let mut words = line.split_whitespace();
    let command = match (words.next(), words.next(), words.next()) {
        (Some("m"), None, _) => Command::More,
        (Some("r"), None, _) => Command::Refresh,
        (Some("l"), None, _) => Command::List,
        (Some("?" | "h"), None, _) => Command::Help,
        (Some("q"), None, _) => Command::Quit,
        (Some("d"), Some(row), None) => match row.parse::<usize>() {
            Ok(n) if n > 0 => Command::Download(n),
            _ => return Err(format!("not a row number: {row}")),
        },
        (Some("d"), _, _) => return Err("usage: d N".into()),
        _ => return Err(format!("unknown command {line:?}, try ?")),
    };
    Ok(Some(command))
}

enum Line {
    Text(String),
    Eof,
}

/// Result of draining the reader channel.
pub struct Drained {
    pub lines: Vec<String>,
    /// Input is closed; nothing more will arrive.
    pub eof: bool,
}

/// Reads lines in a background thread.
pub struct CommandReader {
    rx: mpsc::Receiver<Line>,
    _handle: JoinHandle<()>,
}

impl CommandReader {
    pub fn stdin() -> anyhow::Result<Self> {
        Self::from_reader(io::BufReader::new(io::stdin()))
    }

    pub fn from_reader<R: BufRead + Send + 'static>(reader: R) -> anyhow::Result<Self> {
        let (tx, rx) = mpsc::channel();
        let handle = thread::Builder::new()
            .name("stdin-reader".into())
            .spawn(move || {
                for line in reader.lines() {
                    match line {
                        Ok(text) => {
                            if tx.send(Line::Text(text)).is_err() {
                                return;
                            }
                        }
                        Err(e) => {
                            debug!("console: stdin read failed: {e}");
                            break;
                        }
                    }
                }
                let _ = tx.send(Line::Eof);
            })
            .context("failed to start stdin reader thread")?;
        Ok(Self {
            rx,
            _handle: handle,
        })
    }

    /// Take every line received so far. Non-blocking.
    pub fn drain(&self) -> Drained {
        let mut drained = Drained {
            lines: Vec::new(),
            eof: false,
        };
        loop {
            match self.rx.try_recv() {
                Ok(Line::Text(text)) => drained.lines.push(text),
                Ok(Line::Eof) | Err(mpsc::TryRecvError::Disconnected) => {
                    drained.eof = true;
                    break;
                }
                Err(mpsc::TryRecvError::Empty) => break,
            }
        }
        drained
    }
}

/// Prints coordinator events, one line each, and remembers which entry is on
/// which row so `d N` can be resolved.
pub struct Console<W> {
    out: W,
    rows: Vec<EntryId>,
}

impl<W: Write> Console<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            rows: Vec::new(),
        }
    }

    pub fn entry_at(&self, row: usize) -> Option<&EntryId> {
        row.checked_sub(1).and_then(|i| self.rows.get(i))
    }

    pub fn rows(&self) -> usize {
        self.rows.len()
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    pub fn say(&mut self, args: fmt::Arguments<'_>) {
        if let Err(e) = writeln!(self.out, "{args}").and_then(|()| self.out.flush()) {
            debug!("console: write failed: {e}");
        }
    }

    pub fn print_entry(&mut self, entry: &Entry) {
        let row = self.row_of(&entry.id);
        let mut marks = String::new();
        if entry.poster.is_some() {
            marks.push_str(" [poster]");
        }
        if entry.subtitle.is_some() {
            marks.push_str(" [subs]");
        }
        if let Some(file) = &entry.file {
            marks.push_str(&format!(" [{}]", file.display()));
        } else if let Some(p) = entry.progress {
            marks.push_str(&format!(" [{:.0}%]", p * 100.0));
        }
        self.say(format_args!("{row:>4}  {}{marks}", entry.title));
    }

    fn row_of(&self, id: &EntryId) -> RowLabel {
        RowLabel(self.rows.iter().position(|r| r == id).map(|i| i + 1))
    }
}

struct RowLabel(Option<usize>);

impl fmt::Display for RowLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(n) => n.fmt(f),
            None => "-".fmt(f),
        }
    }
}

impl<W: Write> UiSurface for Console<W> {
    fn add_entry(&mut self, entry: &Entry) {
        self.rows.push(entry.id.clone());
        self.print_entry(entry);
    }

    fn clear(&mut self) {
        self.rows.clear();
        self.say(format_args!("-- cleared --"));
    }

    fn no_new_data(&mut self) {
        self.say(format_args!("-- no new data --"));
    }

    fn something_wrong(&mut self, message: &str) {
        self.say(format_args!("!! {message}"));
    }

    fn update_progress(&mut self, entry: &Entry, value: f32) {
        let row = self.row_of(&entry.id);
        self.say(format_args!(
            "{row:>4}  {} downloading {:.0}%",
            entry.title,
            value * 100.0
        ));
    }

    fn entry_updated(&mut self, entry: &Entry) {
        self.print_entry(entry);
    }
}
