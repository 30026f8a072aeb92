//! Single-line mirrored loudness bar redrawn in place on stdout.

use std::io::{self, Write};

use crossterm::{
    cursor::{Hide, MoveToColumn, Show},
    queue,
    style::Print,
};

/// Builds a bar of `width` cells that grows outward from the center.
///
/// Each half has `width / 2` cells; cell `i` (counted from the center) is
/// filled when `i / half < amplitude`.
pub fn render_bar(amplitude: f64, width: usize, filled: char, empty: char) -> String {
    let half = width / 2;
    let cells: Vec<char> = (0..half)
        .map(|i| {
            if (i as f64) / (half as f64) < amplitude {
                filled
            } else {
                empty
            }
        })
        .collect();

    cells.iter().rev().chain(cells.iter()).collect()
}

/// Draws the bar on one terminal line, overwriting the previous frame.
pub struct BarPrinter<W: Write> {
    out: W,
    width: usize,
    filled: char,
    empty: char,
    started: bool,
}

impl BarPrinter<io::Stdout> {
    pub fn stdout(width: usize, filled: char, empty: char) -> Self {
        Self::new(io::stdout(), width, filled, empty)
    }
}

impl<W: Write> BarPrinter<W> {
    pub fn new(out: W, width: usize, filled: char, empty: char) -> Self {
        Self {
            out,
            width,
            filled,
            empty,
            started: false,
        }
    }

    /// Draws one frame.
    ///
    /// # Errors
    /// - If writing to the terminal fails
    pub fn draw(&mut self, amplitude: f64) -> io::Result<()> {
        if !self.started {
            queue!(self.out, Hide)?;
            self.started = true;
        }
        let line = render_bar(amplitude, self.width, self.filled, self.empty);
        queue!(self.out, MoveToColumn(0), Print(line))?;
        self.out.flush()
    }

    /// Ends the bar line and restores the cursor.
    ///
    /// # Errors
    /// - If writing to the terminal fails
    pub fn finish(&mut self) -> io::Result<()> {
        if self.started {
            queue!(self.out, Show, Print("\n"))?;
            self.started = false;
        }
        self.out.flush()
    }

    #[cfg(test)]
    pub fn into_inner(self) -> W {
        self.out
    }
}
