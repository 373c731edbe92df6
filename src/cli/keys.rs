use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::terminal;
use std::io;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KioskCommand {
    ToggleOcr,
    ExportAnalytics,
    ToggleSimpleView,
    Quit,
}

pub fn command_for(key: &KeyEvent) -> Option<KioskCommand> {
    if key.kind != KeyEventKind::Press {
        return None;
    }
    match key.code {
        KeyCode::Char(' ') => Some(KioskCommand::ToggleOcr),
        KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => Some(KioskCommand::Quit),
        KeyCode::Char('e') | KeyCode::Char('E') => Some(KioskCommand::ExportAnalytics),
        KeyCode::Char('p') | KeyCode::Char('P') => Some(KioskCommand::ToggleSimpleView),
        KeyCode::Esc | KeyCode::Char('q') | KeyCode::Char('Q') => Some(KioskCommand::Quit),
        _ => None,
    }
}

/// Drain pending key events without blocking, returning the first command.
pub fn poll_command() -> io::Result<Option<KioskCommand>> {
    while event::poll(Duration::from_millis(0))? {
        if let Event::Key(key) = event::read()? {
            if let Some(command) = command_for(&key) {
                return Ok(Some(command));
            }
        }
    }
    Ok(None)
}

/// Keeps the terminal in raw mode while alive.
pub struct RawModeGuard;

impl RawModeGuard {
    pub fn enable() -> io::Result<Self> {
        terminal::enable_raw_mode()?;
        Ok(Self)
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        let _ = terminal::disable_raw_mode();
    }
}
