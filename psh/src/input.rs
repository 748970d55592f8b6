use crate::history::History;
use anyhow::{Context as _, Result};
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::terminal::{disable_raw_mode, enable_raw_mode};
use std::io::{self, Write};

const BELL: &str = "\x07";
const ERASE: &str = "\x08 \x08";

#[derive(Debug, PartialEq, Eq)]
pub enum ReadOutcome {
    Line(String),
    /// Ctrl-D on an empty line: an exit request.
    Eof,
}

/// Raw mode scoped to a single `read_line` call, so spawned children always
/// run against a cooked terminal.
struct RawModeGuard;

impl RawModeGuard {
    fn enable() -> Result<Self> {
        enable_raw_mode().context("cannot enable raw terminal mode")?;
        Ok(RawModeGuard)
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        disable_raw_mode().ok();
    }
}

#[derive(Debug, Default)]
pub struct LineEditor;

impl LineEditor {
    pub fn new() -> Self {
        LineEditor
    }

    /// Reads one command line under raw mode, echoing as it goes. Up/Down
    /// recall history entries into the edit buffer; the in-progress line is
    /// discarded by recall, as the original always did.
    pub fn read_line(&mut self, history: &mut History) -> Result<ReadOutcome> {
        let _raw = RawModeGuard::enable()?;
        let mut out = io::stdout();
        let mut buf = String::new();

        loop {
            let ev = event::read().context("cannot read terminal input")?;
            let Event::Key(KeyEvent {
                code,
                modifiers,
                kind,
                ..
            }) = ev
            else {
                continue;
            };
            if kind == KeyEventKind::Release {
                continue;
            }

            match (code, modifiers) {
                (KeyCode::Enter, _) => {
                    write!(out, "\r\n")?;
                    out.flush()?;
                    return Ok(ReadOutcome::Line(buf));
                }
                (KeyCode::Char('d'), KeyModifiers::CONTROL) => {
                    if buf.is_empty() {
                        write!(out, "\r\n")?;
                        out.flush()?;
                        return Ok(ReadOutcome::Eof);
                    }
                    ring(&mut out)?;
                }
                (KeyCode::Char('c'), KeyModifiers::CONTROL) => {
                    replace_line(&mut out, &mut buf, "")?;
                }
                (KeyCode::Backspace, _) => {
                    if buf.pop().is_some() {
                        write!(out, "{ERASE}")?;
                        out.flush()?;
                    } else {
                        ring(&mut out)?;
                    }
                }
                (KeyCode::Tab, _) => ring(&mut out)?,
                (KeyCode::Up, _) => {
                    if let Some(entry) = history.prev() {
                        let entry = entry.to_string();
                        replace_line(&mut out, &mut buf, &entry)?;
                    } else {
                        ring(&mut out)?;
                    }
                }
                (KeyCode::Down, _) => {
                    let entry = history.next().map(str::to_string).unwrap_or_default();
                    replace_line(&mut out, &mut buf, &entry)?;
                }
                (KeyCode::Char(ch), m) if m.is_empty() || m == KeyModifiers::SHIFT => {
                    buf.push(ch);
                    write!(out, "{ch}")?;
                    out.flush()?;
                }
                _ => {}
            }
        }
    }
}

fn ring<W: Write>(out: &mut W) -> Result<()> {
    write!(out, "{BELL}")?;
    out.flush()?;
    Ok(())
}

fn replace_line<W: Write>(out: &mut W, buf: &mut String, replacement: &str) -> Result<()> {
    for _ in 0..buf.chars().count() {
        write!(out, "{ERASE}")?;
    }
    write!(out, "{replacement}")?;
    out.flush()?;
    buf.clear();
    buf.push_str(replacement);
    Ok(())
}
