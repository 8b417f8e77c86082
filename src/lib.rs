//! Terminal spreadsheet grid: cell focus, in-place editing and a formula bar
//! over an engine that recomputes values on a worker thread.

pub mod app;
pub mod controller;
pub mod coords;
pub mod engine;
pub mod formula;
pub mod grid;
pub mod logging;
pub mod store;
pub mod ui;
