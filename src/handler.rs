use crossterm::event::{KeyCode, KeyEvent, KeyModifiers, MouseEvent, MouseEventKind};
use ratatui::layout::Rect;
use crate::app::{App, FocusPane, InputMode, SUGGESTIONS};
use crate::tui::AppEvent;

/// Convert a character index to a byte index for UTF-8 safe string operations
fn char_to_byte_index(s: &str, char_idx: usize) -> usize {
    s.char_indices()
        .nth(char_idx)
        .map(|(i, _)| i)
        .unwrap_or(s.len())
}

pub fn handle_event(app: &mut App, event: AppEvent) {
    match event {
        AppEvent::Key(key) => handle_key(app, key),
        AppEvent::Mouse(mouse) => handle_mouse(app, mouse),
        AppEvent::Paste(text) => handle_paste(app, &text),
        AppEvent::Resize(_, _) => {}
        AppEvent::Tick => app.tick_animation(),
        AppEvent::Reply { epoch, reply } => app.on_reply(epoch, reply),
    }

    // Mirror any history change to storage once per handled event
    app.persist();
}

fn handle_key(app: &mut App, key: KeyEvent) {
    // Global keys that work in any mode
    if key.code == KeyCode::Char('c') && key.modifiers.contains(KeyModifiers::CONTROL) {
        app.should_quit = true;
        return;
    }
    if key.code == KeyCode::Char('n') && key.modifiers.contains(KeyModifiers::CONTROL) {
        app.new_chat();
        return;
    }

    match app.input_mode {
        InputMode::Normal => handle_normal_mode(app, key),
        InputMode::Editing => handle_editing_mode(app, key),
    }
}

fn handle_normal_mode(app: &mut App, key: KeyEvent) {
    match key.code {
        KeyCode::Char('q') => app.should_quit = true,

        // Start typing
        KeyCode::Char('i') => {
            app.focus = FocusPane::Chat;
            app.input_mode = InputMode::Editing;
        }

        KeyCode::Char('n') => app.new_chat(),

        // Toggle the conversation list
        KeyCode::Char('m') => {
            app.show_sidebar = !app.show_sidebar;
            if !app.show_sidebar {
                app.focus = FocusPane::Chat;
            }
        }

        KeyCode::Tab => {
            app.focus = match app.focus {
                FocusPane::Chat if app.show_sidebar => FocusPane::Sidebar,
                _ => FocusPane::Chat,
            };
        }

        KeyCode::Char('j') | KeyCode::Down => match app.focus {
            FocusPane::Sidebar => app.sidebar_nav_down(),
            FocusPane::Chat => app.scroll_down(1),
        },
        KeyCode::Char('k') | KeyCode::Up => match app.focus {
            FocusPane::Sidebar => app.sidebar_nav_up(),
            FocusPane::Chat => app.scroll_up(1),
        },
        KeyCode::Char('G') => app.scroll_chat_to_bottom(),
        KeyCode::Char('g') => app.chat_scroll = 0,

        // Half-page scroll
        KeyCode::Char('d') if key.modifiers.contains(KeyModifiers::CONTROL) => {
            app.scroll_half_page_down();
        }
        KeyCode::Char('u') if key.modifiers.contains(KeyModifiers::CONTROL) => {
            app.scroll_half_page_up();
        }

        KeyCode::Enter => match app.focus {
            FocusPane::Sidebar => {
                if let Some(i) = app.sidebar_state.selected() {
                    app.select_conversation(i);
                    app.focus = FocusPane::Chat;
                }
            }
            FocusPane::Chat => app.input_mode = InputMode::Editing,
        },

        KeyCode::Char('d') | KeyCode::Delete if app.focus == FocusPane::Sidebar => {
            app.delete_selected();
        }

        // Suggested prompts, only on an empty chat
        KeyCode::Char(c @ '1'..='4') if app.session.turns().is_empty() => {
            let index = c as usize - '1' as usize;
            if index < SUGGESTIONS.len() {
                app.apply_suggestion(index);
            }
        }

        _ => {}
    }
}

fn handle_editing_mode(app: &mut App, key: KeyEvent) {
    match key.code {
        KeyCode::Esc => {
            app.input_mode = InputMode::Normal;
        }
        KeyCode::Enter => {
            app.submit();
        }
        KeyCode::Backspace => {
            if app.input_cursor > 0 {
                app.input_cursor -= 1;
                let input = app.session.input_mut();
                let byte_pos = char_to_byte_index(input, app.input_cursor);
                input.remove(byte_pos);
            }
        }
        KeyCode::Delete => {
            let input = app.session.input_mut();
            if app.input_cursor < input.chars().count() {
                let byte_pos = char_to_byte_index(input, app.input_cursor);
                input.remove(byte_pos);
            }
        }
        KeyCode::Left => {
            app.input_cursor = app.input_cursor.saturating_sub(1);
        }
        KeyCode::Right => {
            let char_count = app.session.input().chars().count();
            app.input_cursor = (app.input_cursor + 1).min(char_count);
        }
        KeyCode::Home => {
            app.input_cursor = 0;
        }
        KeyCode::End => {
            app.input_cursor = app.session.input().chars().count();
        }
        KeyCode::Char(c) => {
            let input = app.session.input_mut();
            let byte_pos = char_to_byte_index(input, app.input_cursor);
            input.insert(byte_pos, c);
            app.input_cursor += 1;
        }
        _ => {}
    }
}

/// Insert pasted text at the cursor, newlines flattened to spaces
fn handle_paste(app: &mut App, text: &str) {
    if app.input_mode != InputMode::Editing {
        app.input_mode = InputMode::Editing;
        app.focus = FocusPane::Chat;
    }

    let cleaned: String = text
        .chars()
        .filter(|c| *c != '\r')
        .map(|c| if c == '\n' { ' ' } else { c })
        .collect();

    let input = app.session.input_mut();
    let byte_pos = char_to_byte_index(input, app.input_cursor);
    input.insert_str(byte_pos, &cleaned);
    app.input_cursor += cleaned.chars().count();
}

/// Check if a point is within a rectangle
fn point_in_rect(x: u16, y: u16, rect: Rect) -> bool {
    x >= rect.x && x < rect.x + rect.width && y >= rect.y && y < rect.y + rect.height
}

fn handle_mouse(app: &mut App, mouse: MouseEvent) {
    let x = mouse.column;
    let y = mouse.row;

    let in_sidebar = app.sidebar_area.map(|r| point_in_rect(x, y, r)).unwrap_or(false);
    let in_chat = app.chat_area.map(|r| point_in_rect(x, y, r)).unwrap_or(false);

    match mouse.kind {
        MouseEventKind::ScrollDown => {
            if in_sidebar {
                app.sidebar_nav_down();
            } else if in_chat {
                app.scroll_down(3);
            }
        }
        MouseEventKind::ScrollUp => {
            if in_sidebar {
                app.sidebar_nav_up();
            } else if in_chat {
                app.scroll_up(3);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GatewayError;
    use crate::persistence::MemoryStorage;
    use tokio::sync::mpsc;

    fn key(code: KeyCode) -> AppEvent {
        AppEvent::Key(KeyEvent::new(code, KeyModifiers::NONE))
    }

    fn type_text(app: &mut App, text: &str) {
        for c in text.chars() {
            handle_event(app, key(KeyCode::Char(c)));
        }
    }

    fn test_app() -> App {
        let (tx, _rx) = mpsc::unbounded_channel();
        App::new(Box::new(MemoryStorage::new()), Err(GatewayError::MissingApiKey), tx)
    }

    #[test]
    fn test_char_to_byte_index_handles_multibyte() {
        assert_eq!(char_to_byte_index("héllo", 2), 3);
        assert_eq!(char_to_byte_index("abc", 10), 3);
    }

    #[test]
    fn test_editing_keys_respect_cursor() {
        let mut app = test_app();
        type_text(&mut app, "héllo");
        handle_event(&mut app, key(KeyCode::Left));
        handle_event(&mut app, key(KeyCode::Left));
        handle_event(&mut app, key(KeyCode::Backspace));
        assert_eq!(app.session.input(), "hélo");
        handle_event(&mut app, key(KeyCode::Home));
        handle_event(&mut app, key(KeyCode::Delete));
        assert_eq!(app.session.input(), "élo");
        handle_event(&mut app, key(KeyCode::End));
        type_text(&mut app, "!");
        assert_eq!(app.session.input(), "élo!");
    }

    #[test]
    fn test_normal_mode_navigation_selects_conversation() {
        let mut app = test_app();
        app.store.append(vec![crate::state::Turn::user("first")]);
        app.store.append(vec![crate::state::Turn::user("second")]);

        handle_event(&mut app, key(KeyCode::Esc));
        assert_eq!(app.input_mode, InputMode::Normal);
        handle_event(&mut app, key(KeyCode::Tab));
        assert_eq!(app.focus, FocusPane::Sidebar);

        app.sidebar_state.select(Some(1));
        handle_event(&mut app, key(KeyCode::Char('k')));
        handle_event(&mut app, key(KeyCode::Enter));

        assert_eq!(app.store.active_index(), Some(0));
        assert_eq!(app.session.turns()[0].text, "first");
        assert_eq!(app.focus, FocusPane::Chat);
    }

    #[test]
    fn test_paste_inserts_at_cursor_as_one_line() {
        let mut app = test_app();
        type_text(&mut app, "ab");
        handle_event(&mut app, key(KeyCode::Left));
        handle_event(&mut app, AppEvent::Paste("one\r\ntwo".to_string()));
        assert_eq!(app.session.input(), "aone twob");
        assert_eq!(app.input_cursor, 8);
    }

    #[test]
    fn test_suggestion_keys_only_on_empty_chat() {
        let mut app = test_app();
        handle_event(&mut app, key(KeyCode::Esc));
        handle_event(&mut app, key(KeyCode::Char('2')));
        assert_eq!(app.session.input(), SUGGESTIONS[1]);
        assert_eq!(app.input_cursor, SUGGESTIONS[1].chars().count());
    }
}
