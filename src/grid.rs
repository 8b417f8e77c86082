//! Cell views and the grid that owns them.
//!
//! Every address gets one [`CellView`] holding a subscription for as long as
//! the view exists. Callbacks only copy the pushed record and raise the shared
//! dirty flag; the next frame reads the record back out of the view.

use std::cell::{Cell, Ref, RefCell};
use std::rc::Rc;
use std::time::{Duration, Instant};

use ratatui::layout::Rect;

use crate::coords::{Address, GridSize};
use crate::store::{CellCallback, CellRecord, CellStore};

pub const ROW_LABEL_WIDTH: u16 = 4;
pub const MIN_CELL_WIDTH: u16 = 3;
const DOUBLE_CLICK: Duration = Duration::from_millis(300);

pub struct CellView {
    address: Address,
    record: Rc<RefCell<CellRecord>>,
    callback: CellCallback,
    store: Rc<CellStore>,
}

impl CellView {
    /// Subscribe to `address`; the subscription lives until the view is dropped.
    pub fn mount(store: Rc<CellStore>, address: Address, dirty: Rc<Cell<bool>>) -> Self {
        let record = Rc::new(RefCell::new(store.read(address)));
        let sink = record.clone();
        let callback: CellCallback = Rc::new(move |rec: &CellRecord| {
            *sink.borrow_mut() = rec.clone();
            dirty.set(true);
        });
        store.subscribe(address, callback.clone());
        Self {
            address,
            record,
            callback,
            store,
        }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn record(&self) -> Ref<'_, CellRecord> {
        self.record.borrow()
    }
}

impl Drop for CellView {
    fn drop(&mut self) {
        self.store.unsubscribe(self.address, &self.callback);
    }
}

/// Geometry of the last drawn grid, used to map mouse positions to cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GridLayout {
    /// Inner area of the sheet block (inside the border).
    pub inner: Rect,
    pub cell_width: u16,
}

impl GridLayout {
    pub fn compute(inner: Rect, size: GridSize) -> Self {
        let usable = inner.width.saturating_sub(ROW_LABEL_WIDTH);
        let cell_width = (usable / size.width.max(1) as u16).max(MIN_CELL_WIDTH);
        Self { inner, cell_width }
    }

    /// Screen rect for a cell, clipped to the inner area. `None` when the
    /// cell falls outside what fits on screen.
    pub fn cell_rect(&self, addr: Address) -> Option<Rect> {
        let x = self.inner.x as usize
            + ROW_LABEL_WIDTH as usize
            + addr.col * self.cell_width as usize;
        let y = self.inner.y as usize + 1 + addr.row;
        let right = self.inner.x as usize + self.inner.width as usize;
        let bottom = self.inner.y as usize + self.inner.height as usize;
        if x >= right || y >= bottom {
            return None;
        }
        // leave a one-column gap between cells
        let width = (self.cell_width.saturating_sub(1) as usize).min(right - x).max(1);
        Some(Rect::new(x as u16, y as u16, width as u16, 1))
    }

    pub fn column_header_rect(&self, col: usize) -> Option<Rect> {
        let mut rect = self.cell_rect(Address::new(col, 0))?;
        rect.y = self.inner.y;
        Some(rect)
    }

    pub fn row_label_rect(&self, row: usize) -> Option<Rect> {
        let y = self.inner.y as usize + 1 + row;
        if y >= (self.inner.y + self.inner.height) as usize {
            return None;
        }
        let width = ROW_LABEL_WIDTH.min(self.inner.width);
        Some(Rect::new(self.inner.x, y as u16, width, 1))
    }

    pub fn hit_test(&self, x: u16, y: u16, size: GridSize) -> Option<Address> {
        let first_x = self.inner.x + ROW_LABEL_WIDTH;
        let first_y = self.inner.y + 1;
        if x < first_x
            || y < first_y
            || x >= self.inner.x + self.inner.width
            || y >= self.inner.y + self.inner.height
        {
            return None;
        }
        let addr = Address::new(
            ((x - first_x) / self.cell_width) as usize,
            (y - first_y) as usize,
        );
        size.contains(addr).then_some(addr)
    }
}

/// Terminals only report single clicks; pair them up by time and target.
pub struct ClickTracker {
    last_click_time: Instant,
    last_address: Option<Address>,
}

impl Default for ClickTracker {
    fn default() -> Self {
        Self {
            last_click_time: Instant::now(),
            last_address: None,
        }
    }
}

impl ClickTracker {
    /// Record a click at `now`. Returns true if it completes a double click.
    pub fn track(&mut self, address: Address, now: Instant) -> bool {
        let rapid = now.saturating_duration_since(self.last_click_time) < DOUBLE_CLICK;
        let same = self.last_address == Some(address);
        if rapid && same {
            // A third quick click starts a new pair.
            self.last_address = None;
            return true;
        }
        self.last_click_time = now;
        self.last_address = Some(address);
        false
    }
}

pub struct GridView {
    size: GridSize,
    cells: Vec<CellView>,
    dirty: Rc<Cell<bool>>,
    pub layout: Option<GridLayout>,
    pub clicks: ClickTracker,
}

impl GridView {
    pub fn mount(store: Rc<CellStore>) -> Self {
        let size = store.size();
        let dirty = Rc::new(Cell::new(true));
        let cells = size
            .addresses()
            .map(|addr| CellView::mount(store.clone(), addr, dirty.clone()))
            .collect();
        Self {
            size,
            cells,
            dirty,
            layout: None,
            clicks: ClickTracker::default(),
        }
    }

    pub fn size(&self) -> GridSize {
        self.size
    }

    pub fn view(&self, addr: Address) -> &CellView {
        &self.cells[addr.row * self.size.width + addr.col]
    }

    pub fn views(&self) -> impl Iterator<Item = &CellView> {
        self.cells.iter()
    }

    /// Returns whether any subscribed cell changed since the last call.
    pub fn take_dirty(&self) -> bool {
        self.dirty.replace(false)
    }

    pub fn hit_test(&self, x: u16, y: u16) -> Option<Address> {
        self.layout?.hit_test(x, y, self.size)
    }
}
