use crate::core::FrameReport;
use crossterm::{
    cursor,
    style::Print,
    terminal::{Clear, ClearType},
};
use std::io::{self, Write};

/// One-line summary of the last processed frame.
pub fn status_line(report: &FrameReport, identity: Option<&str>, ocr_on: bool, simple: bool) -> String {
    let auth = if report.authenticated { "✅" } else { "🔒" };
    if simple {
        return format!("{} Authenticated: {}", auth, report.authenticated);
    }

    let mut line = format!(
        "{} Authenticated: {} | faces: {}",
        auth, report.authenticated, report.faces
    );
    if let Some(name) = identity {
        line.push_str(&format!(" | user: {}", name));
    }
    if let Some(g) = &report.gesture {
        line.push_str(&format!(
            " | Brightness: {}% | Volume: {}% | scale {:.2}",
            g.brightness, g.volume, g.scale
        ));
    }
    if ocr_on {
        line.push_str(" | OCR on");
    }
    line
}

pub fn render_status(line: &str) -> io::Result<()> {
    let mut stdout = io::stdout();
    crossterm::execute!(
        stdout,
        cursor::MoveToColumn(0),
        Clear(ClearType::CurrentLine),
        Print(line)
    )?;
    stdout.flush()
}
