// SPDX-FileCopyrightText: Copyright © 2020-2024 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

use std::io::{self, Write};

use crossterm::event::{self, Event, KeyCode, KeyEvent};

pub use self::reexport::*;

const DEFAULT_TERM_SIZE: (u16, u16) = (80, 24);

/// Simple terminal constraints wrapping
pub struct TermSize {
    pub width: usize,
    pub height: usize,
}

/// Generate a sane-fallback TermSize
pub fn term_size() -> TermSize {
    let size = crossterm::terminal::size().unwrap_or(DEFAULT_TERM_SIZE);
    let mapped = if size.0 < 1 || size.1 < 1 { DEFAULT_TERM_SIZE } else { size };
    TermSize { width: mapped.0 as usize, height: mapped.1 as usize }
}

/// Read a single line of input (up to enter)
pub fn read_line() -> io::Result<String> {
    let mut s = String::new();
    while let Event::Key(KeyEvent { code, .. }) = event::read()? {
        match code {
            KeyCode::Enter => break,
            KeyCode::Char(c) => s.push(c),
            KeyCode::Backspace => {
                s.pop();
            }
            _ => {}
        }
    }
    Ok(s)
}

/// Prompt yes/no, defaulting to `default` on a bare Enter.
pub fn ask_yes_no(question: &str, default: bool) -> io::Result<bool> {
    let (yes, no) = if default { ("Yes".bold(), "no".dim()) } else { ("yes".dim(), "No".bold()) };
    print!("{question} {} {yes} / {no} {} ", "[".dim(), "]".dim());
    io::stdout().flush()?;

    let answer = read_line()?.to_lowercase();
    Ok(match answer.as_str() {
        "" => default,
        "y" | "yes" => true,
        _ => false,
    })
}

mod reexport {
    pub use crossterm::style::Stylize;
    pub use indicatif::*;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn term_size_falls_back_when_zero() {
        let size = term_size();
        assert!(size.width > 0 && size.height > 0);
    }
}
