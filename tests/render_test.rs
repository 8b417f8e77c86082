use std::rc::Rc;
use std::time::Duration;

use cellgrid::app::App;
use cellgrid::coords::{Address, GridSize};
use cellgrid::store::CellStore;
use cellgrid::ui;
use crossterm::event::{Event, KeyCode, KeyEvent, KeyModifiers};
use ratatui::{Terminal, backend::TestBackend, buffer::Buffer};

const WIDTH: u16 = 90;
const HEIGHT: u16 = 20;

fn app_with(cells: &[(&str, &str)]) -> App {
    let store = Rc::new(CellStore::spawn(GridSize::default()));
    let app = App::new(store.clone());
    for (reference, source) in cells {
        let addr = Address::parse_reference(reference).unwrap();
        store.write(addr, source).unwrap();
    }
    store.settle(Duration::from_secs(5)).unwrap();
    app
}

fn render(app: &mut App) -> Buffer {
    let backend = TestBackend::new(WIDTH, HEIGHT);
    let mut terminal = Terminal::new(backend).unwrap();
    terminal.draw(|f| ui::draw(f, app)).unwrap();
    terminal.backend().buffer().clone()
}

fn line(buf: &Buffer, y: u16) -> String {
    (0..WIDTH).map(|x| buf.get(x, y).symbol().to_string()).collect()
}

fn cell_text(app: &App, buf: &Buffer, addr: Address) -> String {
    let rect = ui::cell_screen_rect(app, addr).unwrap();
    (rect.x..rect.right())
        .map(|x| buf.get(x, rect.y).symbol().to_string())
        .collect()
}

fn press(app: &mut App, code: KeyCode) {
    app.handle_event(Event::Key(KeyEvent::new(code, KeyModifiers::NONE)));
}

#[test]
fn draws_headers_and_row_labels() {
    let mut app = app_with(&[]);
    let buf = render(&mut app);

    let a1 = ui::cell_screen_rect(&app, Address::ORIGIN).unwrap();
    let b1 = ui::cell_screen_rect(&app, Address::new(1, 0)).unwrap();
    assert_eq!(buf.get(a1.x, a1.y - 1).symbol(), "A");
    assert_eq!(buf.get(b1.x, b1.y - 1).symbol(), "B");

    let tenth = ui::cell_screen_rect(&app, Address::new(0, 9)).unwrap();
    assert!(line(&buf, a1.y).contains("  1"));
    assert!(line(&buf, tenth.y).contains(" 10"));
}

#[test]
fn draws_computed_values_not_sources() {
    let mut app = app_with(&[("A1", "2"), ("B1", "=A1*3"), ("C1", "hi")]);
    let buf = render(&mut app);

    assert_eq!(cell_text(&app, &buf, Address::new(0, 0)).trim(), "2");
    let b1 = cell_text(&app, &buf, Address::new(1, 0));
    assert!(b1.ends_with('6'), "numbers are right aligned: {b1:?}");
    assert_eq!(b1.trim(), "6");
    assert!(cell_text(&app, &buf, Address::new(2, 0)).starts_with("hi"));
    assert!(!line(&buf, 5).contains("=A1*3"));
}

#[test]
fn invalid_cells_show_an_error_marker() {
    let mut app = app_with(&[("B2", "=A1 +")]);
    let buf = render(&mut app);
    assert_eq!(cell_text(&app, &buf, Address::new(1, 1)).trim(), "#ERR");
}

#[test]
fn formula_bar_shows_the_focused_source() {
    let mut app = app_with(&[("A1", "2"), ("B1", "=A1*3")]);
    press(&mut app, KeyCode::Down);
    press(&mut app, KeyCode::Right);
    let buf = render(&mut app);

    assert!(line(&buf, 0).contains("fx B1"));
    assert!(line(&buf, 1).contains("=A1*3"));
}

#[test]
fn editing_cell_shows_the_buffer() {
    let mut app = app_with(&[("A1", "2")]);
    press(&mut app, KeyCode::Down);
    press(&mut app, KeyCode::Enter);
    press(&mut app, KeyCode::Char('5'));
    let buf = render(&mut app);

    assert!(cell_text(&app, &buf, Address::ORIGIN).starts_with("25"));
    // Nothing is written until the edit is committed.
    assert_eq!(app.store.read(Address::ORIGIN).source, "2");
}

#[test]
fn status_line_shows_the_mode() {
    let mut app = app_with(&[]);
    let status_y = HEIGHT - 1;

    let buf = render(&mut app);
    assert!(line(&buf, status_y).contains("[NORMAL]"));

    press(&mut app, KeyCode::Down);
    press(&mut app, KeyCode::Enter);
    let buf = render(&mut app);
    assert!(line(&buf, status_y).contains("[EDIT]"));

    press(&mut app, KeyCode::Tab);
    let buf = render(&mut app);
    assert!(line(&buf, status_y).contains("[FORMULA]"));
}

#[test]
fn focused_invalid_cell_reports_its_message() {
    let mut app = app_with(&[("A1", "=Z99")]);
    press(&mut app, KeyCode::Down);
    let buf = render(&mut app);
    assert!(line(&buf, HEIGHT - 1).contains("A1: Z99 is outside the grid"));
}

#[test]
fn long_formula_scrolls_to_keep_the_cursor_visible() {
    let mut app = app_with(&[]);
    press(&mut app, KeyCode::Down);
    press(&mut app, KeyCode::Tab);
    let formula = format!("={}9", "1+".repeat(60));
    for ch in formula.chars() {
        press(&mut app, KeyCode::Char(ch));
    }
    assert_eq!(app.controller.buffer(), formula);

    let buf = render(&mut app);
    let bar = line(&buf, 1);
    assert!(bar.contains("+1+9"), "{bar:?}");
    assert!(!bar.contains("=1+"), "{bar:?}");
}
