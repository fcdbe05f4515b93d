use ratatui::{
    layout::Rect,
    style::Color,
    style::Style,
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph},
    Frame,
};

fn key_line(key: &'static str, pad: usize, what: &'static str) -> Line<'static> {
    Line::from(vec![
        Span::raw("  "),
        Span::styled(key, Style::default().fg(Color::Magenta)),
        Span::raw(" ".repeat(pad)),
        Span::raw(what),
    ])
}

pub fn draw_help(area: Rect, f: &mut Frame) {
    let p = Paragraph::new(vec![
        Line::from("Keybinds:"),
        Line::from(vec![
            Span::raw("  "),
            Span::styled("q", Style::default().fg(Color::Magenta)),
            Span::raw(" / "),
            Span::styled("Ctrl-C", Style::default().fg(Color::Magenta)),
            Span::raw("  Quit (cancels a running task)"),
        ]),
        key_line("tab", 9, "Switch tabs"),
        key_line("?", 11, "Show this help"),
        Line::from(""),
        Line::from("Action board:"),
        Line::from(vec![
            Span::raw("  "),
            Span::styled("↑/↓", Style::default().fg(Color::Magenta)),
            Span::raw(" or "),
            Span::styled("j/k", Style::default().fg(Color::Magenta)),
            Span::raw("  Select action"),
        ]),
        key_line("Enter", 7, "Open action"),
        Line::from(""),
        Line::from("Action modal:"),
        key_line("Enter", 7, "Start"),
        key_line("1-9", 9, "Toggle step"),
        key_line("c", 11, "Cancel"),
        key_line("r", 11, "Reset after completion"),
        key_line("Esc", 9, "Close (cancels a running task)"),
    ])
    .block(Block::default().borders(Borders::ALL).title("Help"));
    f.render_widget(p, area);
}
