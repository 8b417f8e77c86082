use std::rc::Rc;

use tracing::{debug, info};

use crate::coords::{Address, Direction, GridSize};
use crate::store::{CellStore, StoreError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Idle,
    Focused(Address),
    Editing {
        address: Address,
        cursor: usize, // byte offset into the edit buffer, always on a char boundary
    },
}

/// Owns focus, the editing target and the pending edit buffer. The only
/// component that writes cell sources to the store.
pub struct Controller {
    store: Rc<CellStore>,
    size: GridSize,
    mode: Mode,
    buffer: String,
}

impl Controller {
    pub fn new(store: Rc<CellStore>) -> Self {
        let size = store.size();
        Self {
            store,
            size,
            mode: Mode::Idle,
            buffer: String::new(),
        }
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn focus(&self) -> Option<Address> {
        match self.mode {
            Mode::Idle => None,
            Mode::Focused(address) | Mode::Editing { address, .. } => Some(address),
        }
    }

    pub fn editing(&self) -> Option<Address> {
        match self.mode {
            Mode::Editing { address, .. } => Some(address),
            _ => None,
        }
    }

    pub fn is_editing(&self) -> bool {
        matches!(self.mode, Mode::Editing { .. })
    }

    pub fn buffer(&self) -> &str {
        &self.buffer
    }

    pub fn cursor(&self) -> Option<usize> {
        match self.mode {
            Mode::Editing { cursor, .. } => Some(cursor),
            _ => None,
        }
    }

    pub fn size(&self) -> GridSize {
        self.size
    }

    pub fn click(&mut self, address: Address) -> Result<(), StoreError> {
        self.commit_pending()?;
        debug!(%address, "focus");
        self.mode = Mode::Focused(address);
        Ok(())
    }

    pub fn start_editing(&mut self) {
        let address = match self.mode {
            Mode::Idle => return,
            // Already editing this cell; keep the buffer and cursor.
            Mode::Editing { .. } => return,
            Mode::Focused(address) => address,
        };
        self.buffer = self.store.read(address).source;
        debug!(%address, buffer = %self.buffer, "start editing");
        self.mode = Mode::Editing {
            address,
            cursor: self.buffer.len(),
        };
    }

    /// Enter key: begin editing the focused cell, if there is one.
    pub fn enter(&mut self) {
        if let Mode::Focused(_) = self.mode {
            self.start_editing();
        }
    }

    pub fn edit_buffer(&mut self, text: impl Into<String>) {
        if let Mode::Editing { ref mut cursor, .. } = self.mode {
            self.buffer = text.into();
            *cursor = self.buffer.len();
        }
    }

    pub fn commit(&mut self) -> Result<(), StoreError> {
        let Mode::Editing { address, .. } = self.mode else {
            return Ok(());
        };
        self.submit(address)?;
        self.mode = Mode::Focused(address);
        Ok(())
    }

    pub fn cancel(&mut self) {
        let Mode::Editing { address, .. } = self.mode else {
            return;
        };
        self.mode = Mode::Focused(address);
        self.buffer = self.store.read(address).source;
        debug!(%address, "edit cancelled");
    }

    pub fn navigate(&mut self, dir: Direction) -> Result<(), StoreError> {
        let next = match self.focus() {
            Some(current) => self.size.step(current, dir),
            None => Address::ORIGIN,
        };
        self.click(next)
    }

    // Auto-commit when focus leaves a cell that is being edited.
    fn commit_pending(&mut self) -> Result<(), StoreError> {
        match self.mode {
            Mode::Editing { address, .. } => {
                self.submit(address)?;
                self.mode = Mode::Focused(address);
                Ok(())
            }
            _ => Ok(()),
        }
    }

    fn submit(&mut self, address: Address) -> Result<(), StoreError> {
        info!(%address, source = %self.buffer, "commit");
        match self.store.write(address, &self.buffer) {
            Ok(()) => {
                self.buffer.clear();
                Ok(())
            }
            Err(StoreError::InvalidAddress(addr)) => {
                panic!("controller produced out-of-bounds address {addr:?}")
            }
            // Nothing was sent; stay in the edit so it can be retried.
            Err(e) => Err(e),
        }
    }

    // Editing buffer ops
    pub fn insert_char(&mut self, ch: char) {
        if let Mode::Editing { ref mut cursor, .. } = self.mode {
            self.buffer.insert(*cursor, ch);
            *cursor += ch.len_utf8();
        }
    }

    pub fn backspace(&mut self) {
        if let Mode::Editing { ref mut cursor, .. } = self.mode
            && *cursor > 0
        {
            let start = prev_boundary(&self.buffer, *cursor);
            self.buffer.drain(start..*cursor);
            *cursor = start;
        }
    }

    pub fn delete(&mut self) {
        if let Mode::Editing { cursor, .. } = self.mode
            && cursor < self.buffer.len()
        {
            let end = next_boundary(&self.buffer, cursor);
            self.buffer.drain(cursor..end);
        }
    }

    pub fn cursor_left(&mut self) {
        if let Mode::Editing { ref mut cursor, .. } = self.mode {
            *cursor = prev_boundary(&self.buffer, *cursor);
        }
    }

    pub fn cursor_right(&mut self) {
        if let Mode::Editing { ref mut cursor, .. } = self.mode {
            *cursor = next_boundary(&self.buffer, *cursor);
        }
    }

    pub fn cursor_home(&mut self) {
        if let Mode::Editing { ref mut cursor, .. } = self.mode {
            *cursor = 0;
        }
    }

    pub fn cursor_end(&mut self) {
        if let Mode::Editing { ref mut cursor, .. } = self.mode {
            *cursor = self.buffer.len();
        }
    }
}

fn prev_boundary(s: &str, idx: usize) -> usize {
    s[..idx].char_indices().next_back().map_or(0, |(i, _)| i)
}

fn next_boundary(s: &str, idx: usize) -> usize {
    s[idx..].chars().next().map_or(idx, |c| idx + c.len_utf8())
}
