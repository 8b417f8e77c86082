use std::rc::Rc;
use std::time::Instant;

use crossterm::event::{
    Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers, MouseButton, MouseEvent, MouseEventKind,
};
use ratatui::layout::Rect;
use tracing::{debug, warn};

use crate::controller::{Controller, Mode};
use crate::coords::{Address, Direction};
use crate::formula::FormulaBar;
use crate::grid::GridView;
use crate::store::{CellStore, CellValue, StoreError};

pub const HELP: &str =
    "arrows move | Enter/e/double-click edit | Tab formula bar | Esc cancel | q quit";

pub struct App {
    pub should_quit: bool,
    pub status: String,

    pub store: Rc<CellStore>,
    pub controller: Controller,
    pub grid: GridView,
    pub formula: FormulaBar,

    /// Where the formula bar was last drawn, for mouse focus.
    pub formula_area: Option<Rect>,
}

impl App {
    pub fn new(store: Rc<CellStore>) -> Self {
        Self {
            should_quit: false,
            status: HELP.into(),
            controller: Controller::new(store.clone()),
            grid: GridView::mount(store.clone()),
            formula: FormulaBar::default(),
            formula_area: None,
            store,
        }
    }

    /// Apply engine responses. Returns true if anything on screen changed.
    pub fn pump_engine(&mut self) -> bool {
        match self.store.pump() {
            Ok(n) => {
                if n > 0 {
                    debug!(updates = n, "applied engine updates");
                }
            }
            Err(e) => {
                warn!(error = %e, "engine update failed");
                self.status = format!("Engine: {e}");
                return true;
            }
        }
        self.grid.take_dirty()
    }

    /// Route one terminal event. Returns true if a redraw is needed.
    pub fn handle_event(&mut self, event: Event) -> bool {
        match event {
            Event::Key(key) if key.kind == KeyEventKind::Press => {
                self.handle_key(key);
                true
            }
            Event::Mouse(mouse) => self.handle_mouse(mouse),
            Event::Resize(..) => true,
            _ => false,
        }
    }

    fn handle_key(&mut self, key: KeyEvent) {
        if key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('c') {
            self.should_quit = true;
            return;
        }
        if key.code == KeyCode::Tab {
            self.formula.toggle();
            self.status = if self.formula.active {
                "Formula bar: type to edit, Enter to save, Tab back to grid".into()
            } else {
                "Grid".into()
            };
            return;
        }
        if self.formula.active {
            self.handle_key_formula(key);
        } else if self.controller.is_editing() {
            self.handle_key_editing(key);
        } else {
            self.handle_key_normal(key.code);
        }
    }

    fn handle_key_normal(&mut self, code: KeyCode) {
        match code {
            KeyCode::Char('q') => {
                self.should_quit = true;
            }
            KeyCode::Left => self.navigate(Direction::Left),
            KeyCode::Right => self.navigate(Direction::Right),
            KeyCode::Up => self.navigate(Direction::Up),
            KeyCode::Down => self.navigate(Direction::Down),
            KeyCode::Enter | KeyCode::Char('e') => self.begin_edit(),
            _ => {}
        }
    }

    fn handle_key_editing(&mut self, key: KeyEvent) {
        let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);
        match key.code {
            KeyCode::Enter => self.commit(),
            KeyCode::Esc => self.cancel(),
            KeyCode::Left if ctrl => self.controller.cursor_left(),
            KeyCode::Right if ctrl => self.controller.cursor_right(),
            KeyCode::Left => self.navigate(Direction::Left),
            KeyCode::Right => self.navigate(Direction::Right),
            KeyCode::Up => self.navigate(Direction::Up),
            KeyCode::Down => self.navigate(Direction::Down),
            KeyCode::Backspace => self.controller.backspace(),
            KeyCode::Delete => self.controller.delete(),
            KeyCode::Home => self.controller.cursor_home(),
            KeyCode::End => self.controller.cursor_end(),
            // ignore control chars in insert
            KeyCode::Char(c) if !ctrl => self.controller.insert_char(c),
            _ => {}
        }
    }

    fn handle_key_formula(&mut self, key: KeyEvent) {
        let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);
        let accepted = match key.code {
            KeyCode::Enter => {
                self.commit();
                true
            }
            KeyCode::Esc => {
                self.cancel();
                true
            }
            KeyCode::Up => {
                self.navigate(Direction::Up);
                true
            }
            KeyCode::Down => {
                self.navigate(Direction::Down);
                true
            }
            KeyCode::Left => {
                self.controller.cursor_left();
                true
            }
            KeyCode::Right => {
                self.controller.cursor_right();
                true
            }
            KeyCode::Home => {
                self.controller.cursor_home();
                true
            }
            KeyCode::End => {
                self.controller.cursor_end();
                true
            }
            KeyCode::Backspace => self.formula.backspace(&mut self.controller),
            KeyCode::Delete => self.formula.delete(&mut self.controller),
            KeyCode::Char(c) if !ctrl => self.formula.insert_char(&mut self.controller, c),
            _ => true,
        };
        if !accepted {
            self.status = "Select a cell first".into();
        }
    }

    fn handle_mouse(&mut self, mouse: MouseEvent) -> bool {
        if mouse.kind != MouseEventKind::Down(MouseButton::Left) {
            return false;
        }
        if let Some(area) = self.formula_area
            && (area.x..area.right()).contains(&mouse.column)
            && (area.y..area.bottom()).contains(&mouse.row)
        {
            self.formula.active = true;
            return true;
        }
        let Some(addr) = self.grid.hit_test(mouse.column, mouse.row) else {
            return false;
        };
        self.formula.active = false;
        let double = self.grid.clicks.track(addr, Instant::now());
        if double && self.controller.focus() == Some(addr) {
            self.begin_edit();
        } else {
            self.click(addr);
        }
        true
    }

    pub fn click(&mut self, addr: Address) {
        let result = self.controller.click(addr);
        self.report(result, format!("Selected {addr}"));
    }

    pub fn navigate(&mut self, dir: Direction) {
        let result = self.controller.navigate(dir);
        let msg = match self.controller.focus() {
            Some(addr) => format!("Selected {addr}"),
            None => String::new(),
        };
        self.report(result, msg);
    }

    pub fn begin_edit(&mut self) {
        self.controller.enter();
        if let Mode::Editing { address, .. } = self.controller.mode() {
            self.status = format!("Editing {address}: Enter to save, Esc to cancel");
        }
    }

    pub fn commit(&mut self) {
        let Some(addr) = self.controller.editing() else {
            return;
        };
        let result = self.controller.commit();
        self.report(result, format!("Updating {addr}..."));
    }

    pub fn cancel(&mut self) {
        if self.controller.is_editing() {
            self.controller.cancel();
            self.status = "Edit cancelled".into();
        }
    }

    /// Error message of the focused cell, if its value is invalid.
    pub fn focused_error(&self) -> Option<String> {
        let addr = self.controller.focus()?;
        match &self.grid.view(addr).record().value {
            CellValue::Invalid { message } => Some(format!("{addr}: {message}")),
            _ => None,
        }
    }

    fn report(&mut self, result: Result<(), StoreError>, ok_status: String) {
        match result {
            Ok(()) => self.status = ok_status,
            Err(e) => {
                warn!(error = %e, "write failed");
                self.status = format!("Update failed: {e}");
            }
        }
    }
}
