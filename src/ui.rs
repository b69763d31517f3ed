use ratatui::{
    Frame,
    layout::{Constraint, Layout, Position, Rect},
    style::{Color, Modifier, Style, Stylize},
    text::{Line, Span, Text},
    widgets::{Block, Borders, List, ListItem, Paragraph, Wrap},
};
use crate::app::{App, FocusPane, InputMode, SUGGESTIONS};
use crate::format::format_response;
use crate::state::Role;

const SIDEBAR_WIDTH: u16 = 28;

pub fn render(app: &mut App, frame: &mut Frame) {
    let area = frame.area();

    // Main layout: header, body, footer
    let [header_area, body_area, footer_area] = Layout::vertical([
        Constraint::Length(1),
        Constraint::Min(0),
        Constraint::Length(1),
    ])
    .areas(area);

    render_header(app, frame, header_area);

    let main_area = if app.show_sidebar {
        let [sidebar_area, main_area] =
            Layout::horizontal([Constraint::Length(SIDEBAR_WIDTH), Constraint::Min(0)])
                .areas(body_area);
        render_sidebar(app, frame, sidebar_area);
        main_area
    } else {
        app.sidebar_area = None;
        body_area
    };

    let [chat_area, input_area] =
        Layout::vertical([Constraint::Min(0), Constraint::Length(3)]).areas(main_area);

    render_chat(app, frame, chat_area);
    render_input(app, frame, input_area);
    render_footer(app, frame, footer_area);
}

fn render_header(app: &App, frame: &mut Frame, area: Rect) {
    let title = Line::from(vec![
        Span::styled(" ✦ Gemini ", Style::default().fg(Color::Magenta).bold()),
        Span::styled(format!("[{}]", app.model_name()), Style::default().fg(Color::Gray)),
        Span::raw(" "),
        Span::styled(
            format!("v{}", env!("CARGO_PKG_VERSION")),
            Style::default().fg(Color::DarkGray),
        ),
    ]);

    let header = Paragraph::new(title).style(Style::default().bg(Color::Black));
    frame.render_widget(header, area);
}

fn render_sidebar(app: &mut App, frame: &mut Frame, area: Rect) {
    app.sidebar_area = Some(area);

    let focused = app.focus == FocusPane::Sidebar;
    let border_color = if focused { Color::Cyan } else { Color::DarkGray };
    let open = app.open_index();

    let items: Vec<ListItem> = (0..app.store.len())
        .map(|i| {
            let title = app.store.title(i).unwrap_or_else(|| "(empty)".to_string());
            let style = if open == Some(i) {
                Style::default().fg(Color::Magenta).add_modifier(Modifier::BOLD)
            } else {
                Style::default()
            };
            ListItem::new(Line::from(Span::styled(format!(" {}", title), style)))
        })
        .collect();

    let list = List::new(items)
        .block(
            Block::default()
                .borders(Borders::ALL)
                .border_style(Style::default().fg(border_color))
                .title(format!(" Recent ({}) ", app.store.len())),
        )
        .highlight_style(
            Style::default()
                .bg(Color::Magenta)
                .fg(Color::White)
                .add_modifier(Modifier::BOLD),
        )
        .highlight_symbol(">");

    frame.render_stateful_widget(list, area, &mut app.sidebar_state);
}

fn render_chat(app: &mut App, frame: &mut Frame, area: Rect) {
    app.chat_area = Some(area);
    // Store inner dimensions for scroll calculations
    app.chat_height = area.height.saturating_sub(2);
    app.chat_width = area.width.saturating_sub(2);

    let focused = app.focus == FocusPane::Chat;
    let border_color = if focused { Color::Cyan } else { Color::DarkGray };
    let chat_block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(border_color));

    let loading = app.session.is_loading();
    let chat_text = if app.session.turns().is_empty() && !loading {
        empty_state()
    } else {
        let mut lines: Vec<Line> = Vec::new();

        for turn in app.session.turns() {
            match turn.role {
                Role::User => {
                    lines.push(Line::from(Span::styled(
                        "You:",
                        Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD),
                    )));
                    for line in turn.text.lines() {
                        lines.push(Line::from(line.to_string()));
                    }
                }
                Role::Model => {
                    lines.push(Line::from(Span::styled(
                        "Gemini:",
                        Style::default().fg(Color::Magenta).add_modifier(Modifier::BOLD),
                    )));
                    lines.extend(format_response(&turn.text));
                }
            }
            lines.push(Line::default());
        }

        if loading {
            lines.push(Line::from(Span::styled(
                "Gemini:",
                Style::default().fg(Color::Magenta).add_modifier(Modifier::BOLD),
            )));
            // Animated ellipsis: cycles through ".", "..", "..."
            let dots = ".".repeat((app.animation_frame as usize) + 1);
            lines.push(Line::from(Span::styled(
                format!("Thinking{}", dots),
                Style::default().fg(Color::DarkGray).add_modifier(Modifier::ITALIC),
            )));
        }

        Text::from(lines)
    };

    let chat = Paragraph::new(chat_text)
        .block(chat_block)
        .wrap(Wrap { trim: false })
        .scroll((app.chat_scroll, 0));

    frame.render_widget(chat, area);
}

fn empty_state() -> Text<'static> {
    let mut lines = vec![
        Line::from(Span::styled(
            "Hello, Dev.",
            Style::default().fg(Color::Magenta).add_modifier(Modifier::BOLD),
        )),
        Line::from(Span::styled(
            "How can I help you today?",
            Style::default().fg(Color::Gray),
        )),
        Line::default(),
    ];

    for (i, suggestion) in SUGGESTIONS.iter().enumerate() {
        lines.push(Line::from(vec![
            Span::styled(format!(" {} ", i + 1), Style::default().bg(Color::DarkGray).fg(Color::White)),
            Span::raw(format!(" {}", suggestion)),
        ]));
    }

    Text::from(lines)
}

fn render_input(app: &App, frame: &mut Frame, area: Rect) {
    let editing = app.input_mode == InputMode::Editing;
    let border_color = if editing { Color::Yellow } else { Color::DarkGray };

    let input_text = if app.session.input().is_empty() && !editing {
        Span::styled("Enter a prompt here", Style::default().fg(Color::DarkGray))
    } else {
        Span::raw(app.session.input())
    };

    // Keep the cursor visible on long inputs
    let inner_width = area.width.saturating_sub(2) as usize;
    let h_scroll = app.input_cursor.saturating_sub(inner_width.saturating_sub(1));

    let input = Paragraph::new(Line::from(input_text))
        .block(
            Block::default()
                .borders(Borders::ALL)
                .border_style(Style::default().fg(border_color))
                .title(if app.session.is_loading() { " Waiting for reply " } else { " Prompt " }),
        )
        .scroll((0, h_scroll as u16));

    frame.render_widget(input, area);

    if editing {
        let x = area.x + 1 + (app.input_cursor - h_scroll) as u16;
        frame.set_cursor_position(Position::new(x, area.y + 1));
    }
}

fn render_footer(app: &App, frame: &mut Frame, area: Rect) {
    let mode_style = match app.input_mode {
        InputMode::Normal => Style::default().bg(Color::Blue).fg(Color::White),
        InputMode::Editing => Style::default().bg(Color::Yellow).fg(Color::Black),
    };
    let mode_text = match app.input_mode {
        InputMode::Normal => " NORMAL ",
        InputMode::Editing => " INSERT ",
    };

    // Key style: dark background with bright text for visibility on both light/dark terminals
    let key_style = Style::default().bg(Color::DarkGray).fg(Color::White);
    let label_style = Style::default().bg(Color::Black).fg(Color::White);

    let mut spans = vec![Span::styled(mode_text, mode_style)];

    if let Some(status) = &app.status {
        spans.push(Span::styled(
            format!(" {} ", status),
            Style::default().fg(Color::Yellow),
        ));
    } else {
        let hints: &[(&str, &str)] = match (app.input_mode, app.focus) {
            (InputMode::Editing, _) => &[("Enter", "send"), ("Esc", "normal"), ("^N", "new chat")],
            (InputMode::Normal, FocusPane::Sidebar) => &[
                ("j/k", "nav"),
                ("Enter", "open"),
                ("d", "delete"),
                ("n", "new"),
                ("Tab", "chat"),
                ("q", "quit"),
            ],
            (InputMode::Normal, FocusPane::Chat) => &[
                ("i", "type"),
                ("j/k", "scroll"),
                ("n", "new"),
                ("m", "menu"),
                ("Tab", "history"),
                ("q", "quit"),
            ],
        };
        for (key, label) in hints {
            spans.push(Span::styled(format!(" {} ", key), key_style));
            spans.push(Span::styled(format!(" {} ", label), label_style));
        }
    }

    frame.render_widget(Paragraph::new(Line::from(spans)), area);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GatewayError;
    use crate::persistence::MemoryStorage;
    use crate::state::Turn;
    use ratatui::{backend::TestBackend, Terminal};
    use tokio::sync::mpsc;

    fn buffer_text(terminal: &Terminal<TestBackend>) -> String {
        let buffer = terminal.backend().buffer();
        buffer.content().iter().map(|cell| cell.symbol()).collect()
    }

    #[test]
    fn test_render_empty_state_and_history() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut app = App::new(Box::new(MemoryStorage::new()), Err(GatewayError::MissingApiKey), tx);
        let mut terminal = Terminal::new(TestBackend::new(100, 30)).unwrap();

        terminal.draw(|f| render(&mut app, f)).unwrap();
        let text = buffer_text(&terminal);
        assert!(text.contains("Hello, Dev."));
        assert!(text.contains("Recent (0)"));

        app.store.append(vec![Turn::user("Tell me a joke"), Turn::model("**Knock** knock")]);
        app.select_conversation(0);
        terminal.draw(|f| render(&mut app, f)).unwrap();
        let text = buffer_text(&terminal);
        assert!(text.contains("Tell me a joke"));
        assert!(text.contains("Knock knock"));
        assert!(app.chat_area.is_some());
    }
}
