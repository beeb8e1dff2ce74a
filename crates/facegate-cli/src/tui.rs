//! Terminal front end: live preview, dialogs, name prompt, menu, welcome screen.

use crate::capture::{Key, Viewport};
use anyhow::Result;
use crossterm::event::{self, Event, KeyCode, KeyEventKind};
use crossterm::execute;
use crossterm::terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen};
use image::{DynamicImage, RgbImage};
use ratatui::prelude::*;
use ratatui::widgets::{Block, Borders, Clear, List, ListItem, ListState, Paragraph, Wrap};
use ratatui_image::picker::{FontSize, Picker};
use ratatui_image::protocol::StatefulProtocol;
use ratatui_image::{Resize, StatefulImage};
use std::io::{self, Stdout};
use std::time::Duration;

/// Cell size assumed when the terminal does not report one.
const FALLBACK_FONT_SIZE: FontSize = (8, 16);

/// Severity of a dialog.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DialogKind {
    Info,
    Error,
}

/// Owns the terminal for the lifetime of an interactive session.
pub struct Tui {
    terminal: Terminal<CrosstermBackend<Stdout>>,
    picker: Picker,
}

impl Tui {
    pub fn enter() -> Result<Self> {
        enable_raw_mode()?;
        let mut stdout = io::stdout();
        execute!(stdout, EnterAlternateScreen)?;
        let terminal = Terminal::new(CrosstermBackend::new(stdout))?;
        // Queried after entering raw mode so the reply is not echoed.
        let picker = preview_picker();
        Ok(Self { terminal, picker })
    }

    /// Block until a key is pressed.
    fn read_key(&mut self) -> Result<KeyCode> {
        loop {
            if let Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press {
                    return Ok(key.code);
                }
            }
        }
    }

    /// Show a dialog and wait for any key.
    pub fn dialog(&mut self, kind: DialogKind, title: &str, body: &str) -> Result<()> {
        let color = match kind {
            DialogKind::Info => Color::Green,
            DialogKind::Error => Color::Red,
        };
        self.terminal.draw(|f| {
            let area = centered_rect(60, 7, f.area());
            f.render_widget(Clear, area);
            let text = vec![
                Line::from(body.to_string()),
                Line::from(""),
                Line::from(Span::styled("press any key", Style::default().fg(Color::DarkGray))),
            ];
            let paragraph = Paragraph::new(text)
                .alignment(Alignment::Center)
                .wrap(Wrap { trim: true })
                .block(
                    Block::default()
                        .borders(Borders::ALL)
                        .border_style(Style::default().fg(color))
                        .title(title.to_string()),
                );
            f.render_widget(paragraph, area);
        })?;
        self.read_key()?;
        Ok(())
    }

    /// Ask for a line of text. `None` when cancelled with Esc.
    pub fn prompt(&mut self, title: &str, label: &str) -> Result<Option<String>> {
        let mut input = PromptInput::default();
        loop {
            let value = input.value.clone();
            self.terminal.draw(|f| {
                f.render_widget(Clear, f.area());
                let area = centered_rect(60, 6, f.area());
                let text = vec![
                    Line::from(label.to_string()),
                    Line::from(vec![
                        Span::styled("> ", Style::default().fg(Color::Cyan)),
                        Span::raw(value.clone()),
                        Span::styled("_", Style::default().fg(Color::DarkGray)),
                    ]),
                    Line::from(Span::styled(
                        "Enter to confirm, Esc to cancel",
                        Style::default().fg(Color::DarkGray),
                    )),
                ];
                let paragraph = Paragraph::new(text)
                    .block(Block::default().borders(Borders::ALL).title(title.to_string()));
                f.render_widget(paragraph, area);
            })?;

            let code = self.read_key()?;
            match input.handle(code) {
                PromptState::Editing => {}
                PromptState::Submitted => return Ok(Some(input.value)),
                PromptState::Cancelled => return Ok(None),
            }
        }
    }

    /// Main menu; returns the chosen entry.
    pub fn menu(&mut self, state: &mut MenuState) -> Result<MenuChoice> {
        loop {
            let selected = state.selected;
            self.terminal.draw(|f| {
                f.render_widget(Clear, f.area());
                let area = centered_rect(50, MenuChoice::ALL.len() as u16 + 4, f.area());
                let items: Vec<ListItem> = MenuChoice::ALL
                    .iter()
                    .enumerate()
                    .map(|(i, choice)| ListItem::new(format!("{}. {}", i + 1, choice.label())))
                    .collect();
                let list = List::new(items)
                    .block(
                        Block::default()
                            .borders(Borders::ALL)
                            .title("Face Gesture Registration and Login"),
                    )
                    .highlight_style(Style::default().fg(Color::Black).bg(Color::Cyan))
                    .highlight_symbol("> ");
                let mut list_state = ListState::default().with_selected(Some(selected));
                f.render_stateful_widget(list, area, &mut list_state);
            })?;

            let code = self.read_key()?;
            if let Some(choice) = state.handle(code) {
                return Ok(choice);
            }
        }
    }

    /// Welcome screen after a successful login.
    pub fn welcome(&mut self, detail: &str) -> Result<()> {
        self.terminal.draw(|f| {
            f.render_widget(Clear, f.area());
            let area = centered_rect(60, 8, f.area());
            let text = vec![
                Line::from(Span::styled(
                    "Welcome to Secure Application",
                    Style::default().fg(Color::Green).add_modifier(Modifier::BOLD),
                )),
                Line::from(""),
                Line::from(detail.to_string()),
                Line::from(""),
                Line::from(Span::styled("press any key to exit", Style::default().fg(Color::DarkGray))),
            ];
            let paragraph = Paragraph::new(text)
                .alignment(Alignment::Center)
                .block(Block::default().borders(Borders::ALL).title("Welcome"));
            f.render_widget(paragraph, area);
        })?;
        self.read_key()?;
        Ok(())
    }
}

impl Drop for Tui {
    fn drop(&mut self) {
        let _ = disable_raw_mode();
        let _ = execute!(self.terminal.backend_mut(), LeaveAlternateScreen);
        let _ = self.terminal.show_cursor();
    }
}

impl Viewport for Tui {
    fn present(&mut self, title: &str, image: &RgbImage, faces: usize) -> Result<()> {
        let mut protocol = preview_protocol(&mut self.picker, image);
        self.terminal.draw(|f| {
            let chunks = Layout::default()
                .direction(Direction::Vertical)
                .constraints([Constraint::Min(1), Constraint::Length(1)])
                .split(f.area());

            let block = Block::default().borders(Borders::ALL).title(title.to_string());
            let inner = block.inner(chunks[0]);
            f.render_widget(block, chunks[0]);
            let preview = StatefulImage::new(None).resize(Resize::Fit(None));
            f.render_stateful_widget(preview, inner, &mut protocol);

            let status = Line::from(vec![
                Span::styled("[s]", Style::default().fg(Color::Cyan)),
                Span::raw(" save  "),
                Span::styled("[q]", Style::default().fg(Color::Cyan)),
                Span::raw(" quit  "),
                Span::styled(format!("faces: {faces}"), Style::default().fg(Color::DarkGray)),
            ]);
            f.render_widget(Paragraph::new(status), chunks[1]);
        })?;
        Ok(())
    }

    fn poll_key(&mut self) -> Result<Option<Key>> {
        while event::poll(Duration::ZERO)? {
            if let Event::Key(key) = event::read()? {
                if key.kind != KeyEventKind::Press {
                    continue;
                }
                if let Some(k) = capture_key(key.code) {
                    return Ok(Some(k));
                }
            }
        }
        Ok(None)
    }
}

/// Key binding for the capture loop.
pub fn capture_key(code: KeyCode) -> Option<Key> {
    match code {
        KeyCode::Char('s') | KeyCode::Char('S') => Some(Key::Save),
        KeyCode::Char('q') | KeyCode::Char('Q') | KeyCode::Esc => Some(Key::Quit),
        _ => None,
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum PromptState {
    Editing,
    Submitted,
    Cancelled,
}

/// Single-line text input.
#[derive(Debug, Default)]
pub struct PromptInput {
    pub value: String,
}

impl PromptInput {
    pub fn handle(&mut self, code: KeyCode) -> PromptState {
        match code {
            KeyCode::Enter => PromptState::Submitted,
            KeyCode::Esc => PromptState::Cancelled,
            KeyCode::Backspace => {
                self.value.pop();
                PromptState::Editing
            }
            KeyCode::Char(c) => {
                self.value.push(c);
                PromptState::Editing
            }
            _ => PromptState::Editing,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MenuChoice {
    RegisterGesture,
    LoginGesture,
    RegisterEmotion,
    LoginEmotion,
    Quit,
}

impl MenuChoice {
    pub const ALL: [MenuChoice; 5] = [
        MenuChoice::RegisterGesture,
        MenuChoice::LoginGesture,
        MenuChoice::RegisterEmotion,
        MenuChoice::LoginEmotion,
        MenuChoice::Quit,
    ];

    pub fn label(self) -> &'static str {
        match self {
            MenuChoice::RegisterGesture => "Register Gesture",
            MenuChoice::LoginGesture => "Login with Gesture",
            MenuChoice::RegisterEmotion => "Register Emotion",
            MenuChoice::LoginEmotion => "Login with Emotion",
            MenuChoice::Quit => "Quit",
        }
    }
}

/// Cursor position in the main menu, kept across visits.
#[derive(Debug, Default)]
pub struct MenuState {
    pub selected: usize,
}

impl MenuState {
    pub fn handle(&mut self, code: KeyCode) -> Option<MenuChoice> {
        let last = MenuChoice::ALL.len() - 1;
        match code {
            KeyCode::Up | KeyCode::Char('k') => {
                self.selected = self.selected.saturating_sub(1);
                None
            }
            KeyCode::Down | KeyCode::Char('j') => {
                self.selected = (self.selected + 1).min(last);
                None
            }
            KeyCode::Enter => Some(MenuChoice::ALL[self.selected]),
            KeyCode::Char('q') | KeyCode::Esc => Some(MenuChoice::Quit),
            KeyCode::Char(c) => {
                let idx = c.to_digit(10)? as usize;
                let choice = MenuChoice::ALL.get(idx.checked_sub(1)?)?;
                self.selected = idx - 1;
                Some(*choice)
            }
            _ => None,
        }
    }
}

/// Terminal image protocol for the preview, falling back to half blocks
/// when the terminal cannot be queried.
fn preview_picker() -> Picker {
    Picker::from_query_stdio().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "terminal graphics query failed; using half blocks");
        Picker::from_fontsize(FALLBACK_FONT_SIZE)
    })
}

fn preview_protocol(picker: &mut Picker, image: &RgbImage) -> StatefulProtocol {
    picker.new_resize_protocol(DynamicImage::ImageRgb8(image.clone()))
}

/// A rectangle `percent_x` wide and `height` rows tall, centred in `area`.
fn centered_rect(percent_x: u16, height: u16, area: Rect) -> Rect {
    let width = (u32::from(area.width) * u32::from(percent_x) / 100) as u16;
    let width = width.clamp(1, area.width.max(1));
    let height = height.min(area.height);
    Rect {
        x: area.x + (area.width - width) / 2,
        y: area.y + (area.height - height) / 2,
        width,
        height,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn test_capture_key_bindings() {
        assert_eq!(capture_key(KeyCode::Char('s')), Some(Key::Save));
        assert_eq!(capture_key(KeyCode::Char('q')), Some(Key::Quit));
        assert_eq!(capture_key(KeyCode::Esc), Some(Key::Quit));
        assert_eq!(capture_key(KeyCode::Char('x')), None);
    }

    #[test]
    fn test_prompt_input_editing() {
        let mut input = PromptInput::default();
        for c in "smiles".chars() {
            assert_eq!(input.handle(KeyCode::Char(c)), PromptState::Editing);
        }
        input.handle(KeyCode::Backspace);
        assert_eq!(input.handle(KeyCode::Enter), PromptState::Submitted);
        assert_eq!(input.value, "smile");
    }

    #[test]
    fn test_prompt_input_cancel() {
        let mut input = PromptInput::default();
        input.handle(KeyCode::Char('a'));
        assert_eq!(input.handle(KeyCode::Esc), PromptState::Cancelled);
    }

    #[test]
    fn test_menu_navigation() {
        let mut menu = MenuState::default();
        assert_eq!(menu.handle(KeyCode::Up), None);
        assert_eq!(menu.selected, 0);
        menu.handle(KeyCode::Down);
        menu.handle(KeyCode::Down);
        assert_eq!(menu.handle(KeyCode::Enter), Some(MenuChoice::RegisterEmotion));
        for _ in 0..10 {
            menu.handle(KeyCode::Down);
        }
        assert_eq!(menu.selected, MenuChoice::ALL.len() - 1);
    }

    #[test]
    fn test_menu_hotkeys() {
        let mut menu = MenuState::default();
        assert_eq!(menu.handle(KeyCode::Char('2')), Some(MenuChoice::LoginGesture));
        assert_eq!(menu.selected, 1);
        assert_eq!(menu.handle(KeyCode::Char('0')), None);
        assert_eq!(menu.handle(KeyCode::Char('9')), None);
        assert_eq!(menu.handle(KeyCode::Char('q')), Some(MenuChoice::Quit));
    }

    #[test]
    fn test_preview_renders_frame_with_fallback_picker() {
        let img = RgbImage::from_fn(64, 48, |x, _| if x < 32 { Rgb([255, 0, 0]) } else { Rgb([0, 0, 255]) });
        let mut picker = Picker::from_fontsize(FALLBACK_FONT_SIZE);
        let mut protocol = preview_protocol(&mut picker, &img);

        let area = Rect::new(0, 0, 20, 10);
        let mut buf = Buffer::empty(area);
        StatefulImage::new(None)
            .resize(Resize::Fit(None))
            .render(area, &mut buf, &mut protocol);
        assert_ne!(buf, Buffer::empty(area));
    }

    #[test]
    fn test_centered_rect_clamps() {
        let r = centered_rect(50, 100, Rect::new(0, 0, 40, 10));
        assert_eq!(r, Rect::new(10, 0, 20, 10));
    }

    #[test]
    fn test_centered_rect_on_very_wide_terminal() {
        let r = centered_rect(60, 7, Rect::new(0, 0, 2000, 50));
        assert_eq!(r.width, 1200);
        assert_eq!(r.x, 400);
    }
}
