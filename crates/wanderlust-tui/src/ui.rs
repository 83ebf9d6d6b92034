use ratatui::{
    Frame,
    layout::{Constraint, Layout, Rect},
    style::{Color, Modifier, Style, Stylize},
    symbols,
    text::{Line, Span, Text},
    widgets::{
        canvas::{Canvas, Line as CanvasLine, Map, MapResolution, Points},
        Block, Borders, Paragraph,
    },
};
use wanderlust_core::{ConversationEntry, MapState, MapTool, MapView};
use crate::app::{App, InputMode};

const SPINNER: [&str; 3] = ["◐", "◓", "◑"];

/// Parse a line of text and convert **bold** markdown to styled spans
fn parse_markdown_line(text: &str) -> Line<'static> {
    let mut spans: Vec<Span<'static>> = Vec::new();
    let mut chars = text.chars().peekable();
    let mut current_text = String::new();

    while let Some(c) = chars.next() {
        if c == '*' && chars.peek() == Some(&'*') {
            chars.next();

            if !current_text.is_empty() {
                spans.push(Span::raw(std::mem::take(&mut current_text)));
            }

            // Find closing **
            let mut bold_text = String::new();
            let mut found_close = false;
            while let Some(c) = chars.next() {
                if c == '*' && chars.peek() == Some(&'*') {
                    chars.next();
                    found_close = true;
                    break;
                }
                bold_text.push(c);
            }

            if found_close && !bold_text.is_empty() {
                spans.push(Span::styled(
                    bold_text,
                    Style::default().add_modifier(Modifier::BOLD),
                ));
            } else {
                // No closing **, treat as literal
                current_text.push_str("**");
                current_text.push_str(&bold_text);
            }
        } else {
            current_text.push(c);
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

/// Wrap text to fit within a given width, returning multiple lines
/// Uses word boundaries for wrapping (doesn't break mid-word)
fn wrap_text_to_width(text: &str, width: usize) -> Vec<String> {
    if width == 0 {
        return vec![text.to_string()];
    }

    let mut lines = Vec::new();
    let mut current_line = String::new();
    let mut current_len = 0;

    for word in text.split_whitespace() {
        let word_len = word.chars().count();

        if current_len == 0 {
            current_line = word.to_string();
            current_len = word_len;
        } else if current_len + 1 + word_len <= width {
            current_line.push(' ');
            current_line.push_str(word);
            current_len += 1 + word_len;
        } else {
            lines.push(std::mem::take(&mut current_line));
            current_line = word.to_string();
            current_len = word_len;
        }
    }

    if !current_line.is_empty() {
        lines.push(current_line);
    }

    if lines.is_empty() {
        lines.push(String::new());
    }

    lines
}

/// Wrap each source line separately so paragraph breaks survive
fn wrap_paragraphs(text: &str, width: usize) -> Vec<String> {
    text.lines()
        .flat_map(|line| wrap_text_to_width(line, width))
        .collect()
}

fn tool_icon(tool: &str) -> &'static str {
    match MapTool::from_name(tool) {
        Some(MapTool::UpdateMap) => "🗺",
        Some(MapTool::AddMarker) => "📍",
        None => "🔧",
    }
}

/// Build the chat transcript, already wrapped to `width`.
/// `thinking` carries the animation frame while a run is in flight.
fn chat_lines(entries: &[ConversationEntry], width: usize, thinking: Option<u8>) -> Vec<Line<'static>> {
    let you_style = Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD);
    let guide_style = Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD);
    let dim_italic = Style::default().fg(Color::DarkGray).add_modifier(Modifier::ITALIC);

    let mut lines: Vec<Line<'static>> = Vec::new();

    for entry in entries {
        match entry {
            ConversationEntry::User { text } => {
                lines.push(Line::from(Span::styled("You:", you_style)));
                for line in wrap_paragraphs(text, width) {
                    lines.push(Line::from(Span::styled(line, Style::default().bold())));
                }
            }
            ConversationEntry::Assistant { text, has_tool_calls } => {
                lines.push(Line::from(Span::styled("Guide:", guide_style)));
                if !text.trim().is_empty() {
                    for line in wrap_paragraphs(text, width) {
                        lines.push(parse_markdown_line(&line));
                    }
                } else if *has_tool_calls {
                    lines.push(Line::from(Span::styled("Calling map functions", dim_italic)));
                } else {
                    lines.push(Line::from(Span::styled("(no reply)", dim_italic)));
                }
            }
            ConversationEntry::ToolResult { tool, output, .. } => {
                lines.push(Line::from(vec![
                    Span::raw(format!("{} ", tool_icon(tool))),
                    Span::styled(output.clone(), Style::default().fg(Color::Green)),
                ]));
            }
            ConversationEntry::Error { message } => {
                for (i, line) in wrap_text_to_width(message, width.saturating_sub(2)).into_iter().enumerate() {
                    let prefix = if i == 0 { "⚠ " } else { "  " };
                    lines.push(Line::from(Span::styled(
                        format!("{prefix}{line}"),
                        Style::default().fg(Color::Red),
                    )));
                }
            }
        }
        lines.push(Line::default());
    }

    if let Some(frame) = thinking {
        lines.push(Line::from(Span::styled("Guide:", guide_style)));
        // Animated ellipsis: cycles through ".", "..", "..."
        let dots = ".".repeat(usize::from(frame) + 1);
        lines.push(Line::from(Span::styled(format!("Thinking{dots}"), dim_italic)));
    }

    lines
}

/// Canvas bounds for a view: 360/2^zoom degrees of longitude across the
/// panel, latitude span scaled so the map is not stretched (cells are about
/// twice as tall as they are wide).
fn viewport_bounds(view: &MapView, width: u16, height: u16) -> ([f64; 2], [f64; 2]) {
    let lon_span = 360.0 / 2f64.powi(i32::from(view.zoom));
    let lat_span = if width == 0 {
        lon_span / 2.0
    } else {
        lon_span * (2.0 * f64::from(height)) / f64::from(width)
    };

    let center = view.center;
    (
        [center.longitude - lon_span / 2.0, center.longitude + lon_span / 2.0],
        [center.latitude - lat_span / 2.0, center.latitude + lat_span / 2.0],
    )
}

pub fn render(app: &mut App, frame: &mut Frame) {
    let area = frame.area();

    // Main layout: header, body, footer
    let [header_area, body_area, footer_area] = Layout::vertical([
        Constraint::Length(1),
        Constraint::Min(0),
        Constraint::Length(1),
    ])
    .areas(area);

    let [chat_area, map_area] = Layout::horizontal([
        Constraint::Percentage(40),
        Constraint::Percentage(60),
    ])
    .areas(body_area);

    render_header(app, frame, header_area);
    render_chat(app, frame, chat_area);
    render_map(&app.map_state, frame, map_area);
    render_footer(app, frame, footer_area);
}

fn render_header(app: &App, frame: &mut Frame, area: Rect) {
    let busy = app.is_busy();
    let state_color = if busy { Color::Yellow } else { Color::Green };
    let spinner = if busy {
        SPINNER[usize::from(app.animation_frame) % SPINNER.len()]
    } else {
        " "
    };

    let title = Line::from(vec![
        Span::styled(" 🧭 Wanderlust ", Style::default().fg(Color::Cyan).bold()),
        Span::styled(format!("[{}] {spinner}", app.state_label()), Style::default().fg(state_color)),
        Span::raw(" "),
        Span::styled(
            format!("v{}", env!("CARGO_PKG_VERSION")),
            Style::default().fg(Color::Gray),
        ),
    ]);

    let header = Paragraph::new(title).style(Style::default().bg(Color::DarkGray));
    frame.render_widget(header, area);
}

fn render_chat(app: &mut App, frame: &mut Frame, area: Rect) {
    let [history_area, input_area] = Layout::vertical([
        Constraint::Min(0),
        Constraint::Length(3),
    ])
    .areas(area);

    // Store chat area for mouse hit-testing and its inner size for scrolling
    app.chat_area = Some(history_area);
    app.chat_height = history_area.height.saturating_sub(2);
    app.chat_width = history_area.width.saturating_sub(2);

    let chat_block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::DarkGray))
        .title(" Chat ");

    let busy = app.is_busy();
    let chat_text = if app.entries.is_empty() && !busy {
        Text::from(Span::styled(
            "Ask about a place, e.g. \"Show me the canals of Amsterdam\"",
            Style::default().fg(Color::DarkGray),
        ))
    } else {
        let thinking = busy.then_some(app.animation_frame);
        Text::from(chat_lines(&app.entries, usize::from(app.chat_width), thinking))
    };

    let total_lines = u16::try_from(chat_text.lines.len()).unwrap_or(u16::MAX);
    app.clamp_scroll(total_lines);

    let chat = Paragraph::new(chat_text)
        .block(chat_block)
        .scroll((app.chat_scroll, 0));
    frame.render_widget(chat, history_area);

    render_input(app, frame, input_area);
}

fn render_input(app: &App, frame: &mut Frame, area: Rect) {
    let busy = app.is_busy();
    let editing = app.input_mode == InputMode::Editing;

    let (title, border_color) = if busy {
        (" Waiting for the guide (Esc, Esc to cancel) ", Color::DarkGray)
    } else if editing {
        (" Ask your question here ", Color::Cyan)
    } else {
        (" Ask your question here (i to type) ", Color::DarkGray)
    };

    let input_block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(border_color))
        .title(title);

    // Horizontal scrolling keeps the cursor visible
    let inner_width = usize::from(area.width.saturating_sub(2));
    let scroll_offset = if inner_width == 0 || app.cursor < inner_width {
        0
    } else {
        app.cursor - inner_width + 1
    };

    let visible_text: String = app.input
        .chars()
        .skip(scroll_offset)
        .take(inner_width)
        .collect();

    let text_style = if busy {
        Style::default().fg(Color::DarkGray)
    } else {
        Style::default().fg(Color::Cyan)
    };

    let input = Paragraph::new(visible_text)
        .style(text_style)
        .block(input_block);
    frame.render_widget(input, area);

    // Show cursor when editing
    if editing && !busy {
        let cursor_x = u16::try_from(app.cursor - scroll_offset).unwrap_or(0);
        frame.set_cursor_position((area.x + cursor_x + 1, area.y + 1));
    }
}

fn render_map(state: &MapState, frame: &mut Frame, area: Rect) {
    let view = state.view;
    let inner_width = area.width.saturating_sub(2);
    let inner_height = area.height.saturating_sub(2);
    let (x_bounds, y_bounds) = viewport_bounds(&view, inner_width, inner_height);

    let title = format!(
        " Map  {:.4}, {:.4}  z{}  {} marker{} ",
        view.center.latitude,
        view.center.longitude,
        view.zoom,
        state.markers.len(),
        if state.markers.len() == 1 { "" } else { "s" },
    );

    let resolution = if view.zoom >= 4 {
        MapResolution::High
    } else {
        MapResolution::Low
    };
    // Crosshair arm length, a small fraction of the visible span
    let arm = (x_bounds[1] - x_bounds[0]) * 0.015;

    let canvas = Canvas::default()
        .block(
            Block::default()
                .borders(Borders::ALL)
                .border_style(Style::default().fg(Color::DarkGray))
                .title(title),
        )
        .marker(symbols::Marker::Braille)
        .x_bounds(x_bounds)
        .y_bounds(y_bounds)
        .paint(move |ctx| {
            ctx.draw(&Map {
                color: Color::Green,
                resolution,
            });
            ctx.layer();

            let (lon, lat) = (view.center.longitude, view.center.latitude);
            ctx.draw(&CanvasLine {
                x1: lon - arm,
                y1: lat,
                x2: lon + arm,
                y2: lat,
                color: Color::DarkGray,
            });
            ctx.draw(&CanvasLine {
                x1: lon,
                y1: lat - arm,
                x2: lon,
                y2: lat + arm,
                color: Color::DarkGray,
            });

            let coords: Vec<(f64, f64)> = state
                .markers
                .iter()
                .map(|m| (m.location.longitude, m.location.latitude))
                .collect();
            ctx.draw(&Points {
                coords: &coords,
                color: Color::Red,
            });
            for marker in &state.markers {
                ctx.print(
                    marker.location.longitude,
                    marker.location.latitude,
                    Line::styled(format!("● {}", marker.label), Style::default().fg(Color::Yellow)),
                );
            }
        });

    frame.render_widget(canvas, area);
}

fn render_footer(app: &App, frame: &mut Frame, area: Rect) {
    let key_style = Style::default().bg(Color::DarkGray).fg(Color::White);
    let label_style = Style::default().bg(Color::Black).fg(Color::White);

    if let Some(banner) = app.banner() {
        let line = Line::from(vec![
            Span::styled(format!(" ⚠ {banner} "), Style::default().bg(Color::Red).fg(Color::White)),
            Span::styled(" Esc ", key_style),
            Span::styled(" dismiss ", label_style),
        ]);
        frame.render_widget(Paragraph::new(line), area);
        return;
    }

    let (mode_text, mode_style) = match app.input_mode {
        InputMode::Normal => (" NORMAL ", Style::default().bg(Color::Blue).fg(Color::White)),
        InputMode::Editing => (" INSERT ", Style::default().bg(Color::Yellow).fg(Color::Black)),
    };

    let mut spans = vec![Span::styled(mode_text, mode_style), Span::raw(" ")];
    let hints: &[(&str, &str)] = match (app.input_mode, app.is_busy()) {
        (InputMode::Editing, false) => &[(" Enter ", " send "), (" Esc ", " normal mode ")],
        (InputMode::Editing, true) => &[(" Esc ", " normal mode "), (" PgUp/PgDn ", " scroll ")],
        (InputMode::Normal, true) => &[(" Esc ", " cancel run "), (" j/k ", " scroll "), (" q ", " quit ")],
        (InputMode::Normal, false) => &[
            (" i ", " type "),
            (" j/k ", " scroll "),
            (" g/G ", " top/bottom "),
            (" q ", " quit "),
        ],
    };
    for (key, label) in hints {
        spans.push(Span::styled(*key, key_style));
        spans.push(Span::styled(*label, label_style));
    }

    frame.render_widget(Paragraph::new(Line::from(spans)), area);
}

#[cfg(test)]
mod tests {
    use super::*;
    use ratatui::{backend::TestBackend, Terminal};
    use std::sync::Arc;
    use wanderlust_core::{Conversation, Coordinate, MapStore, OpenAiAssistants, PollSettings, ToolRegistry};

    fn line_text(line: &Line) -> String {
        line.spans.iter().map(|s| s.content.as_ref()).collect()
    }

    #[test]
    fn test_wrap_text_to_width() {
        assert_eq!(wrap_text_to_width("the quick brown fox", 9), ["the quick", "brown fox"]);
        assert_eq!(wrap_text_to_width("", 10), [""]);
        assert_eq!(wrap_text_to_width("unbreakableword", 4), ["unbreakableword"]);
        assert_eq!(wrap_text_to_width("a b", 0), ["a b"]);
    }

    #[test]
    fn test_wrap_paragraphs_keeps_breaks() {
        assert_eq!(wrap_paragraphs("one\n\ntwo", 10), ["one", "", "two"]);
    }

    #[test]
    fn test_parse_markdown_bold() {
        let line = parse_markdown_line("See **Kyoto** today");
        assert_eq!(line.spans.len(), 3);
        assert_eq!(line.spans[1].content, "Kyoto");
        assert!(line.spans[1].style.add_modifier.contains(Modifier::BOLD));
        assert_eq!(line_text(&line), "See Kyoto today");
    }

    #[test]
    fn test_parse_markdown_unclosed_bold_is_literal() {
        let line = parse_markdown_line("a **b");
        assert_eq!(line_text(&line), "a **b");
        assert_eq!(parse_markdown_line(""), Line::default());
    }

    #[test]
    fn test_viewport_at_world_zoom() {
        let view = MapView {
            center: Coordinate { latitude: 0.0, longitude: 0.0 },
            zoom: 0,
        };
        let (x, y) = viewport_bounds(&view, 100, 50);
        assert_eq!(x, [-180.0, 180.0]);
        assert_eq!(y, [-180.0, 180.0]);
    }

    #[test]
    fn test_viewport_halves_per_zoom_level() {
        let view = MapView {
            center: Coordinate { latitude: 48.0, longitude: 2.0 },
            zoom: 3,
        };
        let (x, y) = viewport_bounds(&view, 80, 20);
        assert_eq!(x, [2.0 - 22.5, 2.0 + 22.5]);
        // 45 degrees wide, 80x20 cells -> 45 * 40 / 80 = 22.5 degrees tall
        assert_eq!(y, [48.0 - 11.25, 48.0 + 11.25]);
    }

    #[test]
    fn test_chat_lines_for_each_entry_kind() {
        let entries = vec![
            ConversationEntry::user("Where is Petra?"),
            ConversationEntry::ToolResult {
                call_id: "call_1".to_string(),
                tool: "add_marker".to_string(),
                output: "Marker added".to_string(),
            },
            ConversationEntry::assistant("", true),
            ConversationEntry::error("unknown tool: fly"),
        ];
        let text: Vec<String> = chat_lines(&entries, 40, None).iter().map(line_text).collect();
        assert_eq!(
            text,
            [
                "You:",
                "Where is Petra?",
                "",
                "📍 Marker added",
                "",
                "Guide:",
                "Calling map functions",
                "",
                "⚠ unknown tool: fly",
                "",
            ]
        );
    }

    #[test]
    fn test_chat_lines_thinking_indicator() {
        let lines = chat_lines(&[], 40, Some(2));
        let text: Vec<String> = lines.iter().map(line_text).collect();
        assert_eq!(text, ["Guide:", "Thinking..."]);
    }

    #[test]
    fn test_tool_icons() {
        assert_eq!(tool_icon("update_map"), "🗺");
        assert_eq!(tool_icon("add_marker"), "📍");
        assert_eq!(tool_icon("something_else"), "🔧");
    }

    #[test]
    fn test_render_shows_chat_and_map() {
        let map = MapStore::new();
        map.add_marker(2.35, 48.85, "Paris");
        let conversation = Conversation::with_thread(
            Arc::new(OpenAiAssistants::new("sk-test")),
            "thread_test",
            "asst_test",
            ToolRegistry::new(map),
            PollSettings::default(),
        );
        conversation.log().append(ConversationEntry::user("Pin Paris"));
        let mut app = App::new(conversation);

        let mut terminal = Terminal::new(TestBackend::new(100, 30)).unwrap();
        terminal.draw(|frame| render(&mut app, frame)).unwrap();

        let buffer = terminal.backend().buffer();
        let screen: String = buffer.content().iter().map(|cell| cell.symbol()).collect();
        assert!(screen.contains("Wanderlust"));
        assert!(screen.contains("Pin Paris"));
        assert!(screen.contains("1 marker"));
        assert_eq!(app.chat_width, 38);
    }
}
