//! Full-screen loudness meter.
//!
//! Shows a scrolling history of levels, the mirrored bar for the current tick
//! and a footer with elapsed time and stream details.

use crossterm::{
    event::{self, Event, KeyCode, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    prelude::*,
    style::{Color, Style},
    widgets::{Paragraph, Sparkline},
};
use std::io::{stdout, Stdout};
use std::time::{Duration, Instant};

use super::bar::render_bar;

/// User input while the meter is showing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MeterCommand {
    /// Keep playing (no key or an unbound key)
    Continue,
    /// Stop playback (Escape, 'q' or Ctrl+C)
    Stop,
}

/// Appends one level to a scrolling history, dropping the oldest beyond `max_width`.
pub fn push_history(history: &mut Vec<u64>, level: u64, max_width: usize) {
    history.push(level);
    if history.len() > max_width {
        let excess = history.len() - max_width;
        history.drain(..excess);
    }
}

/// Resizes history to exactly `width`, padding with silence on the left.
pub fn fit_history(history: &mut Vec<u64>, width: usize) {
    if history.len() > width {
        let excess = history.len() - width;
        history.drain(..excess);
    } else {
        let missing = width - history.len();
        history.splice(0..0, std::iter::repeat(0).take(missing));
    }
}

/// Terminal UI for playback with a live loudness meter.
pub struct MeterTui {
    terminal: Terminal<CrosstermBackend<Stdout>>,
    history: Vec<u64>,
    terminal_width: usize,
    title: String,
    filled: char,
    empty: char,
    start_time: Instant,
}

impl MeterTui {
    /// Creates the meter and enters alternate screen mode.
    ///
    /// # Errors
    /// - If terminal cannot be initialized
    /// - If raw mode cannot be enabled
    /// - If alternate screen cannot be entered
    pub fn new(title: String, filled: char, empty: char) -> anyhow::Result<Self> {
        enable_raw_mode()?;
        let mut stdout = stdout();
        execute!(stdout, EnterAlternateScreen)?;

        let backend = CrosstermBackend::new(stdout);
        let terminal = Terminal::new(backend)?;
        let terminal_width = terminal.size()?.width as usize;

        Ok(MeterTui {
            terminal,
            history: vec![0u64; terminal_width],
            terminal_width,
            title,
            filled,
            empty,
            start_time: Instant::now(),
        })
    }

    /// Draws one frame for the given normalized amplitude.
    ///
    /// # Errors
    /// - If terminal rendering fails
    pub fn render(&mut self, amplitude: f64) -> anyhow::Result<()> {
        let level = (amplitude.clamp(0.0, 1.0) * 100.0).round() as u64;

        let current_width = self.terminal.size()?.width as usize;
        if current_width != self.terminal_width {
            self.terminal_width = current_width;
            fit_history(&mut self.history, current_width);
        }
        push_history(&mut self.history, level, self.terminal_width);

        let elapsed = self.start_time.elapsed().as_secs();
        let bar = render_bar(amplitude, self.terminal_width, self.filled, self.empty);
        let history = &self.history;
        let title = &self.title;

        self.terminal.draw(|frame| {
            let area = frame.area();
            let footer_height = 1;
            let bar_height = 1;

            let history_area = Rect {
                x: area.x,
                y: area.y,
                width: area.width,
                height: area.height.saturating_sub(footer_height + bar_height + 1),
            };

            let sparkline = Sparkline::default().data(history).max(100).style(
                Style::default()
                    .bg(Color::Rgb(0, 0, 0))
                    .fg(Color::Rgb(206, 224, 220)),
            );
            frame.render_widget(sparkline, history_area);

            let bar_area = Rect {
                x: area.x,
                y: area.y + history_area.height + 1,
                width: area.width,
                height: bar_height.min(area.height),
            };
            let bar_line = Paragraph::new(bar.as_str())
                .alignment(Alignment::Center)
                .style(Style::default().fg(Color::Rgb(185, 207, 212)));
            frame.render_widget(bar_line, bar_area);

            let footer_area = Rect {
                x: area.x,
                y: area.y + area.height.saturating_sub(footer_height),
                width: area.width,
                height: footer_height.min(area.height),
            };
            let footer = Paragraph::new(Line::from(vec![
                Span::styled("▶ ", Style::default().fg(Color::Green)),
                Span::raw(format!("{}:{:02}", elapsed / 60, elapsed % 60)),
                Span::raw(" / "),
                Span::raw(format!("{level}%")),
                Span::raw(" / "),
                Span::raw(title.as_str()),
            ]))
            .style(
                Style::default()
                    .fg(Color::Rgb(185, 207, 212))
                    .bg(Color::Rgb(0, 0, 0)),
            );
            frame.render_widget(footer, footer_area);
        })?;

        Ok(())
    }

    /// Checks for a key press without blocking the tick.
    ///
    /// # Errors
    /// - If event polling fails
    pub fn handle_input(&mut self) -> anyhow::Result<MeterCommand> {
        if event::poll(Duration::ZERO)? {
            if let Event::Key(key) = event::read()? {
                return Ok(match key.code {
                    KeyCode::Char('q') | KeyCode::Esc => {
                        tracing::debug!("Escape or 'q' pressed: stopping playback");
                        MeterCommand::Stop
                    }
                    KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                        tracing::debug!("Ctrl+C pressed: stopping playback");
                        MeterCommand::Stop
                    }
                    _ => MeterCommand::Continue,
                });
            }
        }
        Ok(MeterCommand::Continue)
    }

    /// Leaves alternate screen mode and restores the cursor.
    ///
    /// # Errors
    /// - If terminal mode cannot be disabled
    /// - If cursor cannot be shown
    pub fn cleanup(&mut self) -> anyhow::Result<()> {
        disable_raw_mode()?;
        execute!(self.terminal.backend_mut(), LeaveAlternateScreen)?;
        self.terminal.show_cursor()?;
        Ok(())
    }
}

impl Drop for MeterTui {
    fn drop(&mut self) {
        let _ = self.cleanup();
    }
}
