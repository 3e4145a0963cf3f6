use crate::client::ChatClient;
use crate::protocol::Role;
use crate::state::{ChatAction, ChatMessage, ChatState, MessageStatus};
use crate::tools::ToolCatalog;
use crate::turn::TurnRunner;
use crossterm::cursor::MoveTo;
use crossterm::event::{self, Event, KeyCode, KeyModifiers};
use crossterm::execute;
use crossterm::terminal::{disable_raw_mode, enable_raw_mode, size};
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Constraint, Layout};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span, Text};
use ratatui::widgets::{Block, Borders, Paragraph, Widget, Wrap};
use ratatui::{Frame, Terminal, TerminalOptions, Viewport};
use std::io;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

type TuiTerminal = Terminal<CrosstermBackend<io::Stdout>>;
type TuiResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

const INPUT_HEIGHT: u16 = 6;
const STREAM_HEIGHT: u16 = 8;

// Restores terminal settings even if the loop exits early.
struct TerminalGuard;

impl Drop for TerminalGuard {
    fn drop(&mut self) {
        let _ = disable_raw_mode();
        let _ = io::stdout().flush();
    }
}

#[derive(Debug, Clone)]
struct LineSpec {
    text: String,
    style: Style,
}

impl LineSpec {
    fn new(text: impl Into<String>, style: Style) -> Self {
        Self {
            text: text.into(),
            style,
        }
    }
}

fn line_specs(message: &ChatMessage, catalog: &ToolCatalog) -> Vec<LineSpec> {
    let (header, color) = match message.role {
        Role::User => ("Du:", Color::Blue),
        Role::Assistant => ("LoopDesk:", Color::Yellow),
    };
    let body_color = if message.status == MessageStatus::Failed {
        Color::Red
    } else {
        color
    };

    let mut lines = vec![LineSpec::new(
        header,
        Style::default().fg(color).add_modifier(Modifier::BOLD),
    )];

    if !message.tools_used.is_empty() {
        let labels: Vec<&str> = message
            .tools_used
            .iter()
            .map(|tool| catalog.label(tool))
            .collect();
        lines.push(LineSpec::new(
            format!("  verktyg: {}", labels.join(", ")),
            Style::default().fg(Color::Green),
        ));
    }

    for line in message.content.lines() {
        lines.push(LineSpec::new(
            format!("  {}", line),
            Style::default().fg(body_color),
        ));
    }

    if message.status == MessageStatus::Interrupted {
        lines.push(LineSpec::new(
            "  (avbrutet)",
            Style::default()
                .fg(Color::Gray)
                .add_modifier(Modifier::ITALIC),
        ));
    }

    lines
}

fn to_text(specs: Vec<LineSpec>) -> Text<'static> {
    Text::from(
        specs
            .into_iter()
            .map(|spec| Line::from(Span::styled(spec.text, spec.style)))
            .collect::<Vec<_>>(),
    )
}

fn rendered_height(specs: &[LineSpec], width: u16) -> u16 {
    let width = width.max(1) as usize;
    let total: usize = specs
        .iter()
        .map(|spec| Line::raw(spec.text.as_str()).width().max(1).div_ceil(width))
        .sum();
    total.min(u16::MAX as usize) as u16
}

/// Multi-line input with a character-indexed cursor.
struct InputBuffer {
    lines: Vec<String>,
    cursor_x: usize,
    cursor_y: usize,
}

impl InputBuffer {
    fn new() -> Self {
        Self {
            lines: vec![String::new()],
            cursor_x: 0,
            cursor_y: 0,
        }
    }

    fn clear(&mut self) {
        *self = Self::new();
    }

    fn line_len(&self, y: usize) -> usize {
        self.lines[y].chars().count()
    }

    fn byte_index(&self) -> usize {
        let line = &self.lines[self.cursor_y];
        line.char_indices()
            .nth(self.cursor_x)
            .map_or(line.len(), |(idx, _)| idx)
    }

    fn insert_char(&mut self, c: char) {
        let idx = self.byte_index();
        self.lines[self.cursor_y].insert(idx, c);
        self.cursor_x += 1;
    }

    fn delete_char(&mut self) {
        if self.cursor_x > 0 {
            self.cursor_x -= 1;
            let idx = self.byte_index();
            self.lines[self.cursor_y].remove(idx);
        } else if self.cursor_y > 0 {
            let removed = self.lines.remove(self.cursor_y);
            self.cursor_y -= 1;
            self.cursor_x = self.line_len(self.cursor_y);
            self.lines[self.cursor_y].push_str(&removed);
        }
    }

    fn new_line(&mut self) {
        let idx = self.byte_index();
        let rest = self.lines[self.cursor_y].split_off(idx);
        self.lines.insert(self.cursor_y + 1, rest);
        self.cursor_y += 1;
        self.cursor_x = 0;
    }

    fn move_left(&mut self) {
        if self.cursor_x > 0 {
            self.cursor_x -= 1;
        } else if self.cursor_y > 0 {
            self.cursor_y -= 1;
            self.cursor_x = self.line_len(self.cursor_y);
        }
    }

    fn move_right(&mut self) {
        if self.cursor_x < self.line_len(self.cursor_y) {
            self.cursor_x += 1;
        } else if self.cursor_y < self.lines.len() - 1 {
            self.cursor_y += 1;
            self.cursor_x = 0;
        }
    }

    fn move_up(&mut self) {
        if self.cursor_y > 0 {
            self.cursor_y -= 1;
            self.cursor_x = self.cursor_x.min(self.line_len(self.cursor_y));
        }
    }

    fn move_down(&mut self) {
        if self.cursor_y < self.lines.len() - 1 {
            self.cursor_y += 1;
            self.cursor_x = self.cursor_x.min(self.line_len(self.cursor_y));
        }
    }

    fn move_end(&mut self) {
        self.cursor_x = self.line_len(self.cursor_y);
    }

    fn to_string(&self) -> String {
        self.lines.join("\n")
    }

    fn is_empty(&self) -> bool {
        self.lines.iter().all(|l| l.is_empty())
    }

    fn render(&self) -> Text<'static> {
        if self.is_empty() {
            return Text::from(Span::styled(
                "Skriv ett meddelande...",
                Style::default().fg(Color::DarkGray),
            ));
        }
        Text::from(
            self.lines
                .iter()
                .map(|l| Line::from(l.clone()))
                .collect::<Vec<_>>(),
        )
    }
}

pub struct App<'a> {
    state: ChatState,
    catalog: &'a ToolCatalog,
    input: InputBuffer,
    should_quit: bool,
    runner: TurnRunner,
    receiver: mpsc::UnboundedReceiver<ChatAction>,
    // Messages already written to scrollback.
    flushed: usize,
}

impl<'a> App<'a> {
    pub fn new(client: ChatClient, catalog: &'a ToolCatalog) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();

        Self {
            state: ChatState::new(),
            catalog,
            input: InputBuffer::new(),
            should_quit: false,
            runner: TurnRunner::new(Arc::new(client), sender),
            receiver,
            flushed: 0,
        }
    }

    fn draw(&mut self, f: &mut Frame) {
        let [stream_area, input_area] =
            Layout::vertical([Constraint::Min(1), Constraint::Length(INPUT_HEIGHT)])
                .areas(f.area());

        if let Some(message) = self.state.streaming_message() {
            let mut specs = line_specs(message, self.catalog);
            let status = match self.state.active_tool() {
                Some(tool) => Some(self.catalog.activity(tool)),
                None if message.content.is_empty() => Some("Tänker…".to_string()),
                None => None,
            };
            if let Some(status) = status {
                specs.push(LineSpec::new(
                    format!("  {}", status),
                    Style::default()
                        .fg(Color::Green)
                        .add_modifier(Modifier::ITALIC),
                ));
            }

            // Keep the newest streamed lines in view.
            let height = rendered_height(&specs, stream_area.width);
            let offset = height.saturating_sub(stream_area.height);
            let paragraph = Paragraph::new(to_text(specs))
                .wrap(Wrap { trim: false })
                .scroll((offset, 0));
            f.render_widget(paragraph, stream_area);
        }

        let title = if self.state.is_loading() {
            " Meddelande (Enter skickar, Ctrl+X avbryter, Esc avslutar) [Svarar...] "
        } else {
            " Meddelande (Enter skickar, Esc avslutar) "
        };

        let input_paragraph = Paragraph::new(self.input.render())
            .block(
                Block::default()
                    .borders(Borders::ALL)
                    .title(title)
                    .border_style(Style::default().fg(Color::DarkGray)),
            )
            .wrap(Wrap { trim: false });

        f.render_widget(input_paragraph, input_area);

        let cursor_x = (self.input.cursor_x + 1) as u16;
        let cursor_y = self.input.cursor_y as u16;
        let x = (input_area.x + cursor_x).min(input_area.x + input_area.width - 2);
        let y = (input_area.y + 1 + cursor_y).min(input_area.y + input_area.height - 2);
        f.set_cursor_position((x, y));
    }

    /// Moves every finished message not yet printed into terminal scrollback.
    fn flush_finished(&mut self, terminal: &mut TuiTerminal) -> TuiResult<()> {
        while let Some(message) = self.state.messages().get(self.flushed) {
            if message.status == MessageStatus::Streaming {
                break;
            }

            let specs = line_specs(message, self.catalog);
            let width = terminal.size()?.width;
            let height = rendered_height(&specs, width).saturating_add(1);
            let mut text = to_text(specs);
            text.extend(Text::raw("\n"));
            // Insert above the inline viewport so the log stays in scrollback.
            terminal.insert_before(height, |buf| {
                let paragraph = Paragraph::new(text).wrap(Wrap { trim: false });
                paragraph.render(buf.area, buf);
            })?;
            self.flushed += 1;
        }
        Ok(())
    }

    fn submit(&mut self, terminal: &mut TuiTerminal) -> TuiResult<()> {
        let Some(submission) = self.state.submit(&self.input.to_string()) else {
            return Ok(());
        };
        self.input.clear();
        self.runner.start(submission);
        self.flush_finished(terminal)
    }

    fn handle_events(&mut self, terminal: &mut TuiTerminal) -> TuiResult<bool> {
        while let Ok(action) = self.receiver.try_recv() {
            self.state.apply(action);
        }
        self.flush_finished(terminal)?;

        if event::poll(Duration::from_millis(50))? {
            if let Event::Key(key) = event::read()? {
                if key.modifiers.contains(KeyModifiers::CONTROL) {
                    match key.code {
                        KeyCode::Char('c') => {
                            self.should_quit = true;
                            return Ok(false);
                        }
                        KeyCode::Char('x') => {
                            if self.state.cancel().is_some() {
                                self.runner.cancel();
                                self.flush_finished(terminal)?;
                            }
                            return Ok(true);
                        }
                        _ => {}
                    }
                }

                match key.code {
                    KeyCode::Esc => {
                        self.should_quit = true;
                        return Ok(false);
                    }
                    KeyCode::Enter => {
                        if key.modifiers.contains(KeyModifiers::SHIFT) {
                            self.input.new_line();
                        } else {
                            self.submit(terminal)?;
                        }
                    }
                    KeyCode::Char(c) => {
                        self.input.insert_char(c);
                    }
                    KeyCode::Backspace => {
                        self.input.delete_char();
                    }
                    KeyCode::Left => {
                        self.input.move_left();
                    }
                    KeyCode::Right => {
                        self.input.move_right();
                    }
                    KeyCode::Up => {
                        self.input.move_up();
                    }
                    KeyCode::Down => {
                        self.input.move_down();
                    }
                    KeyCode::Home => {
                        self.input.cursor_x = 0;
                    }
                    KeyCode::End => {
                        self.input.move_end();
                    }
                    _ => {}
                }
            }
        }

        Ok(true)
    }
}

pub fn run_tui(client: ChatClient, catalog: &ToolCatalog) -> TuiResult<()> {
    enable_raw_mode()?;
    let _guard = TerminalGuard;

    let mut stdout = io::stdout();
    let (_, rows) = size()?;
    if rows > 0 {
        // Push existing screen content into scrollback without clearing it.
        for _ in 0..rows {
            writeln!(stdout)?;
        }
        stdout.flush()?;
    }
    execute!(stdout, MoveTo(0, 0))?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::with_options(
        backend,
        TerminalOptions {
            viewport: Viewport::Inline(STREAM_HEIGHT + INPUT_HEIGHT),
        },
    )?;

    tracing::info!(base_url = client.base_url(), "starting chat");
    let mut app = App::new(client, catalog);

    terminal.draw(|f| app.draw(f))?;

    while !app.should_quit {
        if !app.handle_events(&mut terminal)? {
            break;
        }

        terminal.draw(|f| app.draw(f))?;

        std::thread::sleep(Duration::from_millis(10));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::StreamEvent;

    #[test]
    fn input_buffer_shift_enter_inserts_new_line() {
        let mut buffer = InputBuffer::new();
        for ch in "hello".chars() {
            buffer.insert_char(ch);
        }
        buffer.new_line();
        for ch in "world".chars() {
            buffer.insert_char(ch);
        }

        assert_eq!(buffer.to_string(), "hello\nworld");
        assert_eq!(buffer.lines.len(), 2);
        assert_eq!(buffer.cursor_y, 1);
    }

    #[test]
    fn input_buffer_edits_non_ascii_text() {
        let mut buffer = InputBuffer::new();
        for ch in "Göteborg".chars() {
            buffer.insert_char(ch);
        }
        buffer.move_end();
        for _ in 0..6 {
            buffer.move_left();
        }
        buffer.delete_char();
        buffer.insert_char('ö');
        assert_eq!(buffer.to_string(), "Göteborg");

        buffer.new_line();
        assert_eq!(buffer.lines, vec!["Gö".to_string(), "teborg".to_string()]);
        buffer.delete_char();
        assert_eq!(buffer.to_string(), "Göteborg");
        assert_eq!(buffer.cursor_x, 2);
    }

    #[test]
    fn assistant_lines_show_tools_and_interruptions() {
        let catalog = ToolCatalog::loopdesk();
        let mut state = ChatState::new();
        let turn = state.submit("Hej").unwrap().turn;
        state.apply(ChatAction::Event {
            turn,
            event: StreamEvent::Tool("bolagsverket".to_string()),
        });
        state.apply(ChatAction::Event {
            turn,
            event: StreamEvent::Text("Rad ett\nRad två".to_string()),
        });
        state.cancel();

        let texts: Vec<String> = line_specs(&state.messages()[1], &catalog)
            .into_iter()
            .map(|spec| spec.text)
            .collect();
        assert_eq!(
            texts,
            vec![
                "LoopDesk:",
                "  verktyg: Bolagsverket",
                "  Rad ett",
                "  Rad två",
                "  (avbrutet)",
            ]
        );
    }

    #[test]
    fn rendered_height_counts_wrapped_characters() {
        let specs = vec![
            LineSpec::new("åäöåäö", Style::default()),
            LineSpec::new("", Style::default()),
        ];
        assert_eq!(rendered_height(&specs, 4), 3);
    }

    #[test]
    fn rendered_height_counts_wide_glyphs_by_display_width() {
        let specs = vec![LineSpec::new("🚀🚀🚀", Style::default())];
        assert_eq!(rendered_height(&specs, 4), 2);
        assert_eq!(rendered_height(&specs, 6), 1);
    }
}
