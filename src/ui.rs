use crate::app::App;
use crate::controller::Mode;
use crate::coords::{Address, col_letters};
use crate::grid::GridLayout;
use crate::store::CellValue;
use ratatui::{
    Frame,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph},
};

pub fn draw(f: &mut Frame, app: &mut App) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints(
            [
                Constraint::Length(3),
                Constraint::Min(3),
                Constraint::Length(2),
            ]
            .as_ref(),
        )
        .split(f.size());

    draw_formula_bar(f, chunks[0], app);
    draw_sheet(f, chunks[1], app);
    draw_status(f, chunks[2], app);
}

fn draw_formula_bar(f: &mut Frame, area: Rect, app: &mut App) {
    app.formula_area = Some(area);
    let title = match app.controller.focus() {
        Some(addr) => format!("fx {addr}"),
        None => "fx".to_string(),
    };
    let border_style = if app.formula.active {
        Style::default().fg(Color::Yellow)
    } else {
        Style::default()
    };
    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(border_style)
        .title(title);
    let inner = block.inner(area);
    let text = app.formula.text(&app.controller, &app.store);

    match app.controller.cursor() {
        Some(cursor) if app.formula.active => {
            let (visible, cursor_col) = scroll_to_cursor(&text, cursor, inner.width);
            f.render_widget(Paragraph::new(visible).block(block), area);
            f.set_cursor(inner.x + cursor_col, inner.y);
        }
        _ => f.render_widget(Paragraph::new(text.as_str()).block(block), area),
    }
}

fn draw_sheet(f: &mut Frame, area: Rect, app: &mut App) {
    let block = Block::default().borders(Borders::ALL).title("Sheet");
    let inner = block.inner(area);
    f.render_widget(block, area);

    let size = app.grid.size();
    let layout = GridLayout::compute(inner, size);
    app.grid.layout = Some(layout);

    let header_style = Style::default()
        .fg(Color::Cyan)
        .add_modifier(Modifier::BOLD);
    let focus = app.controller.focus();

    for col in 0..size.width {
        let Some(rect) = layout.column_header_rect(col) else {
            break;
        };
        let mut style = header_style;
        if focus.is_some_and(|a| a.col == col) {
            style = style.add_modifier(Modifier::REVERSED);
        }
        f.render_widget(Paragraph::new(col_letters(col)).style(style), rect);
    }

    for row in 0..size.height {
        let Some(rect) = layout.row_label_rect(row) else {
            break;
        };
        let mut style = header_style;
        if focus.is_some_and(|a| a.row == row) {
            style = style.add_modifier(Modifier::REVERSED);
        }
        f.render_widget(Paragraph::new(format!("{:>3}", row + 1)).style(style), rect);
    }

    for view in app.grid.views() {
        let addr = view.address();
        let Some(rect) = layout.cell_rect(addr) else {
            continue;
        };
        if app.controller.editing() == Some(addr) {
            draw_editing_cell(f, rect, app);
            continue;
        }
        let record = view.record();
        let (text, mut style) = match &record.value {
            CellValue::Invalid { .. } => ("#ERR".to_string(), Style::default().fg(Color::Red)),
            CellValue::Number(_) => (
                format!(
                    "{:>width$}",
                    record.value.to_string(),
                    width = rect.width as usize
                ),
                Style::default(),
            ),
            value => (value.to_string(), Style::default()),
        };
        if focus == Some(addr) {
            style = style.bg(Color::Blue).fg(Color::Black);
        }
        f.render_widget(Paragraph::new(text).style(style), rect);
    }
}

fn draw_editing_cell(f: &mut Frame, rect: Rect, app: &App) {
    let buffer = app.controller.buffer();
    let cursor = app.controller.cursor().unwrap_or(buffer.len());
    let (visible, cursor_col) = scroll_to_cursor(buffer, cursor, rect.width);
    let style = Style::default().bg(Color::Yellow).fg(Color::Black);
    f.render_widget(Paragraph::new(visible).style(style), rect);
    if !app.formula.active {
        f.set_cursor(rect.x + cursor_col, rect.y);
    }
}

/// Tail of `text` that keeps the byte offset `cursor` inside `width`
/// columns, plus the cursor's column within it.
fn scroll_to_cursor(text: &str, cursor: usize, width: u16) -> (String, u16) {
    let cursor_col = display_width(&text[..cursor]);
    let skip = cursor_col.saturating_sub(width.saturating_sub(1));
    let visible = text.chars().skip(skip as usize).collect();
    (visible, cursor_col - skip)
}

fn draw_status(f: &mut Frame, area: Rect, app: &App) {
    let mode = match (app.formula.active, app.controller.mode()) {
        (true, _) => "FORMULA",
        (false, Mode::Editing { .. }) => "EDIT",
        (false, _) => "NORMAL",
    };
    let mut spans = vec![
        Span::styled(
            format!("[{mode}] "),
            Style::default()
                .fg(Color::Cyan)
                .add_modifier(Modifier::BOLD),
        ),
        Span::raw(app.status.as_str()),
    ];
    if let Some(err) = app.focused_error() {
        spans.push(Span::styled(
            format!(" | {err}"),
            Style::default().fg(Color::Red),
        ));
    }
    let p = Paragraph::new(Line::from(spans)).block(Block::default().borders(Borders::TOP));
    f.render_widget(p, area);
}

// One column per char; good enough for formula text.
fn display_width(s: &str) -> u16 {
    s.chars().count().min(u16::MAX as usize) as u16
}

/// Screen position of a cell in the last drawn frame.
pub fn cell_screen_rect(app: &App, addr: Address) -> Option<Rect> {
    app.grid.layout?.cell_rect(addr)
}
