//! Light markdown rendering for chat turns
//!
//! Handles `**bold**`, `*italic*` and fenced code blocks. Anything it does
//! not understand is shown verbatim.

use ratatui::{
    style::{Color, Modifier, Style},
    text::{Line, Span},
};

const FENCE: &str = "```";

/// Render a whole turn, one `Line` per source line
pub fn format_response(text: &str) -> Vec<Line<'static>> {
    let code_style = Style::default().fg(Color::Green);
    let mut lines = Vec::new();
    let mut in_code = false;

    for raw in text.lines() {
        if raw.trim_start().starts_with(FENCE) {
            in_code = !in_code;
            continue;
        }
        if in_code {
            lines.push(Line::from(Span::styled(raw.to_string(), code_style)));
        } else {
            lines.push(parse_markdown_line(raw));
        }
    }

    lines
}

/// Parse a line of text and convert **bold** and *italic* markdown to styled spans
pub fn parse_markdown_line(text: &str) -> Line<'static> {
    let mut spans: Vec<Span<'static>> = Vec::new();
    let mut chars = text.chars().peekable();
    let mut current_text = String::new();

    while let Some(c) = chars.next() {
        if c != '*' {
            current_text.push(c);
            continue;
        }

        let bold = chars.peek() == Some(&'*');
        if bold {
            chars.next();
        }
        let marker = if bold { "**" } else { "*" };

        // Find the closing marker
        let mut inner = String::new();
        let mut found_close = false;
        while let Some(c) = chars.next() {
            if c == '*' {
                if !bold {
                    found_close = true;
                    break;
                }
                if chars.peek() == Some(&'*') {
                    chars.next();
                    found_close = true;
                    break;
                }
            }
            inner.push(c);
        }

        if found_close && !inner.is_empty() {
            if !current_text.is_empty() {
                spans.push(Span::raw(std::mem::take(&mut current_text)));
            }
            let modifier = if bold { Modifier::BOLD } else { Modifier::ITALIC };
            spans.push(Span::styled(inner, Style::default().add_modifier(modifier)));
        } else {
            // No closing marker, treat as literal
            current_text.push_str(marker);
            current_text.push_str(&inner);
            if found_close {
                current_text.push_str(marker);
            }
        }
    }

    if !current_text.is_empty() {
        spans.push(Span::raw(current_text));
    }

    if spans.is_empty() {
        Line::default()
    } else {
        Line::from(spans)
    }
}
