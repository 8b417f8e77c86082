use std::io;
use std::path::PathBuf;
use std::rc::Rc;
use std::time::{Duration, Instant};

use anyhow::Result;
use clap::Parser;
use crossterm::{
    event::{self, DisableMouseCapture, EnableMouseCapture},
    execute,
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use ratatui::{backend::CrosstermBackend, prelude::*};
use tracing::{info, warn};

use cellgrid::app::App;
use cellgrid::coords::{self, Address, DEFAULT_HEIGHT, DEFAULT_WIDTH, GridSize};
use cellgrid::store::CellStore;
use cellgrid::{logging, ui};

#[derive(Parser, Debug)]
#[command(author, version, about = "Terminal spreadsheet grid")]
struct Args {
    /// Number of columns
    #[arg(long, default_value_t = DEFAULT_WIDTH)]
    width: usize,

    /// Number of rows
    #[arg(long, default_value_t = DEFAULT_HEIGHT)]
    height: usize,

    /// Seed a cell before the grid opens, e.g. --cell A1=2 --cell B1==A1*3
    #[arg(long = "cell", value_name = "REF=SOURCE", value_parser = coords::parse_seed)]
    cells: Vec<(Address, String)>,

    /// Redraw interval in milliseconds
    #[arg(long, default_value_t = 100)]
    tick_ms: u64,

    /// Directory for log files (defaults to a temp dir)
    #[arg(long, value_name = "DIR")]
    log_dir: Option<PathBuf>,
}

fn setup_terminal() -> Result<Terminal<CrosstermBackend<io::Stdout>>> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = CrosstermBackend::new(stdout);
    let terminal = Terminal::new(backend)?;
    Ok(terminal)
}

fn restore_terminal(mut terminal: Terminal<CrosstermBackend<io::Stdout>>) -> Result<()> {
    disable_raw_mode()?;
    execute!(
        terminal.backend_mut(),
        LeaveAlternateScreen,
        DisableMouseCapture
    )?;
    terminal.show_cursor()?;
    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();
    let size = GridSize::new(args.width, args.height)?;

    let log_dir = args.log_dir.clone().unwrap_or_else(logging::default_log_dir);
    if let Err(e) = logging::init(&log_dir) {
        eprintln!("Warning: could not initialize file logging: {e:#}");
    }
    info!(width = size.width, height = size.height, "starting");

    // Engine worker thread
    let store = Rc::new(CellStore::spawn(size));
    for (addr, source) in &args.cells {
        if !size.contains(*addr) {
            warn!(%addr, "seed outside the grid ignored");
            continue;
        }
        store.write(*addr, source)?;
    }

    let mut app = App::new(store);

    let mut terminal = setup_terminal()?;
    let tick_rate = Duration::from_millis(args.tick_ms.max(1));
    let res = run_app(&mut terminal, &mut app, tick_rate);

    restore_terminal(terminal)?;
    if let Err(e) = res {
        eprintln!("Error: {e:?}");
    }
    info!("exiting");
    Ok(())
}

fn run_app(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    app: &mut App,
    tick_rate: Duration,
) -> Result<()> {
    let mut last_tick = Instant::now();
    // Redraw only when state changes or on tick
    let mut dirty = true;
    loop {
        // Deliver engine updates without blocking
        if app.pump_engine() {
            dirty = true;
        }

        let tick_due = last_tick.elapsed() >= tick_rate;
        if dirty || tick_due {
            terminal.draw(|f| ui::draw(f, app))?;
            dirty = false;
            if tick_due {
                last_tick = Instant::now();
            }
        }

        let timeout = tick_rate
            .checked_sub(last_tick.elapsed())
            .unwrap_or(Duration::from_secs(0));

        if event::poll(timeout)? && app.handle_event(event::read()?) {
            dirty = true;
        }

        if app.should_quit {
            return Ok(());
        }
    }
}
