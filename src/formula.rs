use crate::controller::Controller;
use crate::store::CellStore;

/// The session-wide formula bar. It holds no text of its own: while a cell
/// is being edited it shows the edit buffer, otherwise the focused cell's
/// stored source. Every change goes through the controller.
#[derive(Debug, Default)]
pub struct FormulaBar {
    /// Whether keyboard input is routed here instead of the grid.
    pub active: bool,
}

impl FormulaBar {
    pub fn toggle(&mut self) {
        self.active = !self.active;
    }

    pub fn text(&self, controller: &Controller, store: &CellStore) -> String {
        if controller.is_editing() {
            return controller.buffer().to_string();
        }
        controller
            .focus()
            .map(|addr| store.read(addr).source)
            .unwrap_or_default()
    }

    /// Replace the edited text. Starts editing the focused cell if needed;
    /// returns false (and does nothing) when no cell is focused.
    pub fn replace(&mut self, controller: &mut Controller, text: impl Into<String>) -> bool {
        if !Self::begin(controller) {
            return false;
        }
        controller.edit_buffer(text);
        true
    }

    pub fn insert_char(&mut self, controller: &mut Controller, ch: char) -> bool {
        if !Self::begin(controller) {
            return false;
        }
        controller.insert_char(ch);
        true
    }

    pub fn backspace(&mut self, controller: &mut Controller) -> bool {
        if !Self::begin(controller) {
            return false;
        }
        controller.backspace();
        true
    }

    pub fn delete(&mut self, controller: &mut Controller) -> bool {
        if !Self::begin(controller) {
            return false;
        }
        controller.delete();
        true
    }

    fn begin(controller: &mut Controller) -> bool {
        if controller.focus().is_none() {
            return false;
        }
        controller.start_editing();
        true
    }
}

#[cfg(test)]
mod tests {
    use std::rc::Rc;
    use std::time::Duration;

    use super::*;
    use crate::controller::Mode;
    use crate::coords::{Address, Direction, GridSize};

    const WAIT: Duration = Duration::from_secs(5);

    fn setup() -> (FormulaBar, Controller, Rc<CellStore>) {
        let store = Rc::new(CellStore::spawn(GridSize::default()));
        (FormulaBar::default(), Controller::new(store.clone()), store)
    }

    #[test]
    fn ignored_without_focus() {
        let (mut bar, mut ctl, store) = setup();
        assert!(!bar.replace(&mut ctl, "=1"));
        assert!(!bar.insert_char(&mut ctl, 'x'));
        assert!(!bar.backspace(&mut ctl));
        assert!(!bar.delete(&mut ctl));
        assert_eq!(ctl.mode(), Mode::Idle);
        assert_eq!(bar.text(&ctl, &store), "");
    }

    #[test]
    fn mirrors_stored_source_when_focused() {
        let (bar, mut ctl, store) = setup();
        store.write(Address::ORIGIN, "=2+2").unwrap();
        store.settle(WAIT).unwrap();
        ctl.click(Address::ORIGIN).unwrap();
        assert_eq!(bar.text(&ctl, &store), "=2+2");
    }

    #[test]
    fn editing_here_starts_cell_editing() {
        let (mut bar, mut ctl, store) = setup();
        store.write(Address::ORIGIN, "1").unwrap();
        store.settle(WAIT).unwrap();
        ctl.click(Address::ORIGIN).unwrap();

        assert!(bar.insert_char(&mut ctl, '0'));
        assert_eq!(ctl.editing(), Some(Address::ORIGIN));
        assert_eq!(ctl.buffer(), "10");
        assert_eq!(bar.text(&ctl, &store), "10");

        assert!(bar.replace(&mut ctl, "=A2"));
        assert_eq!(ctl.buffer(), "=A2");
    }

    #[test]
    fn cell_edits_show_up_in_the_bar() {
        let (bar, mut ctl, store) = setup();
        ctl.navigate(Direction::Down).unwrap();
        ctl.enter();
        ctl.insert_char('9');
        assert_eq!(bar.text(&ctl, &store), "9");
    }

    #[test]
    fn cancel_restores_the_bar_to_stored_source() {
        let (mut bar, mut ctl, store) = setup();
        store.write(Address::ORIGIN, "keep").unwrap();
        store.settle(WAIT).unwrap();
        ctl.click(Address::ORIGIN).unwrap();
        bar.replace(&mut ctl, "discard");
        ctl.cancel();
        assert_eq!(bar.text(&ctl, &store), "keep");
        assert_eq!(ctl.buffer(), "keep");
    }

    #[test]
    fn toggle_switches_input_target() {
        let mut bar = FormulaBar::default();
        assert!(!bar.active);
        bar.toggle();
        assert!(bar.active);
        bar.toggle();
        assert!(!bar.active);
    }
}
