use std::collections::{HashMap, HashSet};
use std::fmt;
use std::ops::Range;

use anyhow::{Result, bail};
use crossbeam_channel::{Receiver, Sender};
use rusqlite::{Connection, types::ValueRef};
use tracing::{debug, info, warn};

use crate::coords::{Address, GridSize};

/// Computed value of a cell, shown through its `Display` impl.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum CellValue {
    #[default]
    Empty,
    Number(f64),
    Text(String),
    Invalid {
        message: String,
    },
}

impl CellValue {
    pub fn is_invalid(&self) -> bool {
        matches!(self, CellValue::Invalid { .. })
    }
}

impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CellValue::Empty => Ok(()),
            CellValue::Number(n) => write!(f, "{n}"),
            CellValue::Text(s) => f.write_str(s),
            CellValue::Invalid { message } => write!(f, "!INVALID: {message}"),
        }
    }
}

/// Last known computed value plus the raw source it came from.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CellRecord {
    pub value: CellValue,
    pub source: String,
}

#[derive(Debug)]
pub enum EngineRequest {
    SetCell {
        address: Address,
        source: String,
    },
    /// Answered with `Synced` once every earlier request has been processed.
    Sync {
        token: u64,
    },
}

#[derive(Debug)]
pub enum EngineResponse {
    CellChanged {
        address: Address,
        record: CellRecord,
    },
    Synced {
        token: u64,
    },
    Error(String),
}

pub fn start_engine_worker(
    size: GridSize,
    req_rx: Receiver<EngineRequest>,
    resp_tx: Sender<EngineResponse>,
) {
    let mut engine = match Engine::open(size) {
        Ok(e) => e,
        Err(e) => {
            let _ = resp_tx.send(EngineResponse::Error(format!(
                "Failed to start engine: {e}"
            )));
            return;
        }
    };
    info!(width = size.width, height = size.height, "engine worker started");

    while let Ok(req) = req_rx.recv() {
        match req {
            EngineRequest::SetCell { address, source } => {
                if !size.contains(address) {
                    warn!(?address, "rejected write outside the grid");
                    let _ = resp_tx.send(EngineResponse::Error(format!(
                        "Invalid address {address:?}"
                    )));
                    continue;
                }
                for (address, record) in engine.set_cell(address, source) {
                    let _ = resp_tx.send(EngineResponse::CellChanged { address, record });
                }
            }
            EngineRequest::Sync { token } => {
                let _ = resp_tx.send(EngineResponse::Synced { token });
            }
        }
    }
    debug!("engine worker stopped");
}

#[derive(Debug, Clone, PartialEq)]
enum Source {
    Empty,
    Number(f64),
    Text(String),
    Formula { expr: String, refs: Vec<Address> },
    Invalid(String),
}

impl Source {
    fn classify(raw: &str, size: GridSize) -> Source {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Source::Empty;
        }
        if let Some(expr) = trimmed.strip_prefix('=') {
            if expr.trim().is_empty() {
                return Source::Invalid("empty formula".into());
            }
            let mut refs = Vec::new();
            for (_, addr) in scan_references(expr) {
                if !size.contains(addr) {
                    return Source::Invalid(format!("{addr} is outside the grid"));
                }
                if !refs.contains(&addr) {
                    refs.push(addr);
                }
            }
            return Source::Formula {
                expr: expr.to_string(),
                refs,
            };
        }
        match trimmed.parse::<f64>() {
            Ok(n) if n.is_finite() => Source::Number(n),
            _ => Source::Text(raw.to_string()),
        }
    }

    fn refs(&self) -> &[Address] {
        match self {
            Source::Formula { refs, .. } => refs,
            _ => &[],
        }
    }
}

struct EngineCell {
    source: String,
    parsed: Source,
    value: CellValue,
}

/// Owns all cell data. Formula cells are evaluated by an in-memory SQLite
/// connection after their references have been substituted with literals.
pub struct Engine {
    size: GridSize,
    conn: Connection,
    cells: HashMap<Address, EngineCell>,
    // referenced cell -> formula cells that read it
    dependents: HashMap<Address, HashSet<Address>>,
}

impl Engine {
    pub fn open(size: GridSize) -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Ok(Self {
            size,
            conn,
            cells: HashMap::new(),
            dependents: HashMap::new(),
        })
    }

    pub fn record(&self, address: Address) -> CellRecord {
        self.cells
            .get(&address)
            .map(|cell| CellRecord {
                value: cell.value.clone(),
                source: cell.source.clone(),
            })
            .unwrap_or_default()
    }

    /// Store new source for `address` and recompute it and everything that
    /// depends on it. Returns the records to publish, in evaluation order.
    pub fn set_cell(&mut self, address: Address, source: String) -> Vec<(Address, CellRecord)> {
        let parsed = Source::classify(&source, self.size);
        debug!(%address, ?parsed, "set cell");

        if let Some(old) = self.cells.get(&address) {
            for r in old.parsed.refs() {
                if let Some(set) = self.dependents.get_mut(r) {
                    set.remove(&address);
                    if set.is_empty() {
                        self.dependents.remove(r);
                    }
                }
            }
        }
        for r in parsed.refs() {
            self.dependents.entry(*r).or_default().insert(address);
        }
        let previous = self.cells.insert(
            address,
            EngineCell {
                source,
                parsed,
                value: CellValue::Empty,
            },
        );
        if let Some(prev) = previous
            && let Some(cell) = self.cells.get_mut(&address)
        {
            cell.value = prev.value;
        }

        self.recompute_from(address)
    }

    fn recompute_from(&mut self, origin: Address) -> Vec<(Address, CellRecord)> {
        // origin plus every transitive dependent
        let mut affected = vec![origin];
        let mut in_affected: HashSet<Address> = HashSet::from([origin]);
        let mut i = 0;
        while i < affected.len() {
            if let Some(deps) = self.dependents.get(&affected[i]) {
                let mut deps: Vec<Address> = deps.iter().copied().collect();
                deps.sort();
                for d in deps {
                    if in_affected.insert(d) {
                        affected.push(d);
                    }
                }
            }
            i += 1;
        }

        // Order so that every cell is evaluated after the affected cells it reads.
        let mut order = Vec::with_capacity(affected.len());
        let mut done: HashSet<Address> = HashSet::new();
        let mut pending = affected;
        loop {
            let before = pending.len();
            pending.retain(|a| {
                let ready = self.cells.get(a).is_none_or(|cell| {
                    cell.parsed
                        .refs()
                        .iter()
                        .all(|r| !in_affected.contains(r) || done.contains(r))
                });
                if ready {
                    order.push(*a);
                    done.insert(*a);
                }
                !ready
            });
            if pending.is_empty() || pending.len() == before {
                break;
            }
        }

        let mut changes = Vec::with_capacity(order.len() + pending.len());
        for addr in order {
            let value = self.evaluate(addr);
            self.publish(addr, origin, value, &mut changes);
        }
        for addr in &pending {
            let message = if self.reaches(*addr, *addr, &pending) {
                warn!(%addr, "circular reference");
                "circular reference".to_string()
            } else {
                "depends on a circular reference".to_string()
            };
            self.publish(*addr, origin, CellValue::Invalid { message }, &mut changes);
        }
        changes
    }

    /// Whether `target` is reachable from `from` by following references
    /// through cells in `within`.
    fn reaches(&self, from: Address, target: Address, within: &[Address]) -> bool {
        let mut stack = vec![from];
        let mut seen = HashSet::new();
        while let Some(addr) = stack.pop() {
            let Some(cell) = self.cells.get(&addr) else {
                continue;
            };
            for r in cell.parsed.refs() {
                if *r == target {
                    return true;
                }
                if within.contains(r) && seen.insert(*r) {
                    stack.push(*r);
                }
            }
        }
        false
    }

    fn publish(
        &mut self,
        addr: Address,
        origin: Address,
        value: CellValue,
        changes: &mut Vec<(Address, CellRecord)>,
    ) {
        let Some(cell) = self.cells.get_mut(&addr) else {
            return;
        };
        if addr == origin || cell.value != value {
            cell.value = value;
            changes.push((
                addr,
                CellRecord {
                    value: cell.value.clone(),
                    source: cell.source.clone(),
                },
            ));
        }
    }

    fn evaluate(&self, addr: Address) -> CellValue {
        let Some(cell) = self.cells.get(&addr) else {
            return CellValue::Empty;
        };
        match &cell.parsed {
            Source::Empty => CellValue::Empty,
            Source::Number(n) => CellValue::Number(*n),
            Source::Text(s) => CellValue::Text(s.clone()),
            Source::Invalid(message) => CellValue::Invalid {
                message: message.clone(),
            },
            Source::Formula { expr, .. } => match self.eval_formula(expr) {
                Ok(v) => v,
                Err(e) => CellValue::Invalid {
                    message: e.to_string(),
                },
            },
        }
    }

    fn eval_formula(&self, expr: &str) -> Result<CellValue> {
        let mut sql = String::with_capacity(expr.len() + 16);
        let mut last = 0;
        for (span, addr) in scan_references(expr) {
            sql.push_str(&expr[last..span.start]);
            sql.push_str(&self.sql_literal(addr)?);
            last = span.end;
        }
        sql.push_str(&expr[last..]);

        let value = self
            .conn
            .query_row(&format!("SELECT ({sql})"), [], |row| {
                Ok(value_from_ref(row.get_ref(0)?))
            })?;
        Ok(value)
    }

    fn sql_literal(&self, addr: Address) -> Result<String> {
        let value = self
            .cells
            .get(&addr)
            .map(|c| &c.value)
            .unwrap_or(&CellValue::Empty);
        Ok(match value {
            CellValue::Empty => "0".to_string(),
            // Parenthesized so `A1-B1` with a negative B1 never forms `--`.
            CellValue::Number(n) => format!("({n:?})"),
            CellValue::Text(s) => format!("'{}'", s.replace('\'', "''")),
            CellValue::Invalid { .. } => bail!("{addr} has an error"),
        })
    }
}

fn value_from_ref(v: ValueRef<'_>) -> CellValue {
    match v {
        ValueRef::Null => CellValue::Empty,
        ValueRef::Integer(i) => CellValue::Number(i as f64),
        ValueRef::Real(f) => CellValue::Number(f),
        ValueRef::Text(t) => CellValue::Text(String::from_utf8_lossy(t).to_string()),
        ValueRef::Blob(b) => CellValue::Text(format!("0x{}", hex::encode(b))),
    }
}

/// A1-style references in `expr`, skipping single-quoted literals and
/// anything that is called like a function (`LOG10(...)`).
fn scan_references(expr: &str) -> Vec<(Range<usize>, Address)> {
    let bytes = expr.as_bytes();
    let mut out = Vec::new();
    let mut in_string = false;
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        if in_string {
            if b == b'\'' {
                in_string = false;
            }
            i += 1;
            continue;
        }
        if b == b'\'' {
            in_string = true;
            i += 1;
            continue;
        }
        if is_word(b) {
            let start = i;
            while i < bytes.len() && is_word(bytes[i]) {
                i += 1;
            }
            let is_call = bytes[i..]
                .iter()
                .find(|c| !c.is_ascii_whitespace())
                .is_some_and(|c| *c == b'(');
            if !is_call && let Some(addr) = Address::parse_reference(&expr[start..i]) {
                out.push((start..i, addr));
            }
            continue;
        }
        i += 1;
    }
    out
}

fn is_word(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}
