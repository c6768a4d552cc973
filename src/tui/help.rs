use ratatui::{
    layout::Rect,
    style::Color,
    style::Style,
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph},
    Frame,
};

fn key_line(key: &'static str, pad: usize, action: &'static str) -> Line<'static> {
    Line::from(vec![
        Span::raw("  "),
        Span::styled(key, Style::default().fg(Color::Magenta)),
        Span::raw(" ".repeat(pad)),
        Span::raw(action),
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
            Span::raw("  Quit"),
        ]),
        key_line("tab", 9, "Switch tabs"),
        key_line("?", 11, "Show this help"),
        Line::from(""),
        Line::from("Upload tab:"),
        key_line("a", 11, "Add files (type paths, Enter to confirm)"),
        key_line("paste", 7, "Drop files onto the terminal to add them"),
        key_line("↑/↓ j/k", 5, "Navigate"),
        key_line("del", 9, "Remove selected file"),
        key_line("c", 11, "Clear the list"),
        key_line("u", 11, "Upload"),
        key_line("x", 11, "Cancel the running upload"),
        Line::from(""),
        Line::from("Results tab:"),
        key_line("↑/↓ j/k", 5, "Navigate"),
        key_line("enter", 7, "Show errors of the selected file"),
        key_line("esc", 9, "Close details"),
        key_line("d", 11, "Download failed rows (.xlsx)"),
    ])
    .block(Block::default().borders(Borders::ALL).title("Help"));
    f.render_widget(p, area);
}
