use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError};
use thiserror::Error;
use tracing::{debug, trace, warn};

use crate::coords::{Address, GridSize};
use crate::engine::{EngineRequest, EngineResponse};

pub use crate::engine::{CellRecord, CellValue};

/// Subscriber callback. Identity is the `Rc` allocation, so the same value
/// passed to `subscribe` must be passed to `unsubscribe`.
pub type CellCallback = Rc<dyn Fn(&CellRecord)>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("address {0:?} is outside the grid")]
    InvalidAddress(Address),
    #[error("engine is not running")]
    EngineGone,
    #[error("engine error: {0}")]
    Engine(String),
    #[error("engine did not answer within {0:?}")]
    Timeout(Duration),
}

/// Façade over the engine worker: a local snapshot of every record the engine
/// has pushed, plus per-address subscriber lists.
///
/// Everything here runs on the UI thread; share it with `Rc`.
pub struct CellStore {
    size: GridSize,
    req_tx: Sender<EngineRequest>,
    resp_rx: Receiver<EngineResponse>,
    records: RefCell<HashMap<Address, CellRecord>>,
    listeners: RefCell<HashMap<Address, Vec<CellCallback>>>,
    next_token: Cell<u64>,
}

impl CellStore {
    pub fn new(
        size: GridSize,
        req_tx: Sender<EngineRequest>,
        resp_rx: Receiver<EngineResponse>,
    ) -> Self {
        Self {
            size,
            req_tx,
            resp_rx,
            records: RefCell::new(HashMap::new()),
            listeners: RefCell::new(HashMap::new()),
            next_token: Cell::new(1),
        }
    }

    /// Spawn an engine worker thread and connect a store to it.
    pub fn spawn(size: GridSize) -> Self {
        let (req_tx, req_rx) = crossbeam_channel::unbounded::<EngineRequest>();
        let (resp_tx, resp_rx) = crossbeam_channel::unbounded::<EngineResponse>();
        std::thread::spawn(move || crate::engine::start_engine_worker(size, req_rx, resp_tx));
        Self::new(size, req_tx, resp_rx)
    }

    pub fn size(&self) -> GridSize {
        self.size
    }

    pub fn read(&self, address: Address) -> CellRecord {
        assert!(
            self.size.contains(address),
            "read of {address:?} outside {:?}",
            self.size
        );
        self.records
            .borrow()
            .get(&address)
            .cloned()
            .unwrap_or_default()
    }

    pub fn write(&self, address: Address, source: &str) -> Result<(), StoreError> {
        if !self.size.contains(address) {
            return Err(StoreError::InvalidAddress(address));
        }
        debug!(%address, source, "write");
        self.req_tx
            .send(EngineRequest::SetCell {
                address,
                source: source.to_string(),
            })
            .map_err(|_| StoreError::EngineGone)
    }

    pub fn subscribe(&self, address: Address, callback: CellCallback) {
        let mut listeners = self.listeners.borrow_mut();
        let list = listeners.entry(address).or_default();
        assert!(
            !list.iter().any(|cb| Rc::ptr_eq(cb, &callback)),
            "callback already subscribed to {address:?}"
        );
        list.push(callback);
    }

    pub fn unsubscribe(&self, address: Address, callback: &CellCallback) {
        let mut listeners = self.listeners.borrow_mut();
        let Some(list) = listeners.get_mut(&address) else {
            panic!("unsubscribe of a callback never subscribed to {address:?}");
        };
        let Some(pos) = list.iter().position(|cb| Rc::ptr_eq(cb, callback)) else {
            panic!("unsubscribe of a callback never subscribed to {address:?}");
        };
        list.remove(pos);
        if list.is_empty() {
            listeners.remove(&address);
        }
    }

    pub fn subscriber_count(&self, address: Address) -> usize {
        self.listeners
            .borrow()
            .get(&address)
            .map_or(0, |l| l.len())
    }

    /// Apply every response the engine has sent so far without blocking.
    /// Returns how many cell records were updated.
    pub fn pump(&self) -> Result<usize, StoreError> {
        let mut applied = 0;
        let mut failure = None;
        loop {
            match self.resp_rx.try_recv() {
                Ok(resp) => match self.apply(resp) {
                    Ok(Some(_)) => applied += 1,
                    Ok(None) => {}
                    Err(e) => failure = Some(e),
                },
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    if applied == 0 && failure.is_none() {
                        failure = Some(StoreError::EngineGone);
                    }
                    break;
                }
            }
        }
        match failure {
            Some(e) => Err(e),
            None => Ok(applied),
        }
    }

    /// Block until the engine has processed every request sent before this
    /// call, applying responses as they arrive.
    pub fn settle(&self, timeout: Duration) -> Result<usize, StoreError> {
        let token = self.next_token.get();
        self.next_token.set(token + 1);
        self.req_tx
            .send(EngineRequest::Sync { token })
            .map_err(|_| StoreError::EngineGone)?;

        let deadline = Instant::now() + timeout;
        let mut applied = 0;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.resp_rx.recv_timeout(remaining) {
                Ok(EngineResponse::Synced { token: t }) if t == token => return Ok(applied),
                Ok(resp) => {
                    if self.apply(resp)?.is_some() {
                        applied += 1;
                    }
                }
                Err(RecvTimeoutError::Timeout) => return Err(StoreError::Timeout(timeout)),
                Err(RecvTimeoutError::Disconnected) => return Err(StoreError::EngineGone),
            }
        }
    }

    fn apply(&self, resp: EngineResponse) -> Result<Option<Address>, StoreError> {
        match resp {
            EngineResponse::CellChanged { address, record } => {
                trace!(%address, value = %record.value, "cell changed");
                self.records.borrow_mut().insert(address, record.clone());
                // Clone the list so callbacks may (un)subscribe while we iterate.
                let callbacks: Vec<CellCallback> = self
                    .listeners
                    .borrow()
                    .get(&address)
                    .cloned()
                    .unwrap_or_default();
                for cb in callbacks {
                    if self.is_subscribed(address, &cb) {
                        cb(&record);
                    }
                }
                Ok(Some(address))
            }
            EngineResponse::Synced { .. } => Ok(None),
            EngineResponse::Error(msg) => {
                warn!(%msg, "engine reported an error");
                Err(StoreError::Engine(msg))
            }
        }
    }

    fn is_subscribed(&self, address: Address, callback: &CellCallback) -> bool {
        self.listeners
            .borrow()
            .get(&address)
            .is_some_and(|l| l.iter().any(|cb| Rc::ptr_eq(cb, callback)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WAIT: Duration = Duration::from_secs(5);

    fn store() -> CellStore {
        CellStore::spawn(GridSize::default())
    }

    fn recorder() -> (CellCallback, Rc<RefCell<Vec<CellRecord>>>) {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        let cb: CellCallback = Rc::new(move |rec: &CellRecord| sink.borrow_mut().push(rec.clone()));
        (cb, seen)
    }

    #[test]
    fn unwritten_cells_read_empty() {
        let s = store();
        assert_eq!(s.read(Address::new(3, 3)), CellRecord::default());
    }

    #[test]
    fn write_is_visible_after_settle() {
        let s = store();
        let a1 = Address::new(0, 0);
        s.write(a1, "12").unwrap();
        s.settle(WAIT).unwrap();
        let rec = s.read(a1);
        assert_eq!(rec.source, "12");
        assert_eq!(rec.value, CellValue::Number(12.0));
    }

    #[test]
    fn write_outside_grid_is_rejected() {
        let s = store();
        assert_eq!(
            s.write(Address::new(10, 0), "1"),
            Err(StoreError::InvalidAddress(Address::new(10, 0)))
        );
    }

    #[test]
    fn notifications_arrive_in_write_order() {
        let s = store();
        let a1 = Address::new(0, 0);
        let (cb, seen) = recorder();
        s.subscribe(a1, cb.clone());
        for src in ["1", "2", "3"] {
            s.write(a1, src).unwrap();
        }
        s.settle(WAIT).unwrap();
        let sources: Vec<String> = seen.borrow().iter().map(|r| r.source.clone()).collect();
        assert_eq!(sources, vec!["1", "2", "3"]);
        s.unsubscribe(a1, &cb);
    }

    #[test]
    fn dependents_notify_their_own_subscribers() {
        let s = store();
        let a1 = Address::new(0, 0);
        let b1 = Address::new(1, 0);
        s.write(b1, "=A1 * 2").unwrap();
        s.settle(WAIT).unwrap();

        let (cb, seen) = recorder();
        s.subscribe(b1, cb.clone());
        s.write(a1, "21").unwrap();
        s.settle(WAIT).unwrap();
        assert_eq!(seen.borrow().last().unwrap().value, CellValue::Number(42.0));
        s.unsubscribe(b1, &cb);
    }

    #[test]
    fn unsubscribed_callbacks_stop_firing() {
        let s = store();
        let a1 = Address::new(0, 0);
        let (cb, seen) = recorder();
        s.subscribe(a1, cb.clone());
        s.write(a1, "1").unwrap();
        s.settle(WAIT).unwrap();
        s.unsubscribe(a1, &cb);
        s.write(a1, "2").unwrap();
        s.settle(WAIT).unwrap();
        assert_eq!(seen.borrow().len(), 1);
        assert_eq!(s.subscriber_count(a1), 0);
    }

    #[test]
    fn callbacks_may_unsubscribe_each_other() {
        let s = Rc::new(store());
        let a1 = Address::new(0, 0);
        let (second, seen) = recorder();

        let store_ref = Rc::downgrade(&s);
        let victim = second.clone();
        let first: CellCallback = Rc::new(move |_rec: &CellRecord| {
            if let Some(s) = store_ref.upgrade() {
                s.unsubscribe(a1, &victim);
            }
        });
        s.subscribe(a1, first.clone());
        s.subscribe(a1, second);
        s.write(a1, "1").unwrap();
        s.settle(WAIT).unwrap();

        assert!(seen.borrow().is_empty());
        assert_eq!(s.subscriber_count(a1), 1);
        s.unsubscribe(a1, &first);
    }

    #[test]
    fn multiple_callbacks_per_address() {
        let s = store();
        let a1 = Address::new(0, 0);
        let (one, seen_one) = recorder();
        let (two, seen_two) = recorder();
        s.subscribe(a1, one.clone());
        s.subscribe(a1, two.clone());
        s.write(a1, "x").unwrap();
        s.settle(WAIT).unwrap();
        assert_eq!(seen_one.borrow().len(), 1);
        assert_eq!(seen_two.borrow().len(), 1);
        s.unsubscribe(a1, &one);
        s.unsubscribe(a1, &two);
    }

    #[test]
    #[should_panic(expected = "already subscribed")]
    fn double_subscription_is_a_defect() {
        let s = store();
        let (cb, _) = recorder();
        s.subscribe(Address::ORIGIN, cb.clone());
        s.subscribe(Address::ORIGIN, cb);
    }

    #[test]
    #[should_panic(expected = "never subscribed")]
    fn unmatched_unsubscribe_is_a_defect() {
        let s = store();
        let (cb, _) = recorder();
        s.unsubscribe(Address::ORIGIN, &cb);
    }

    #[test]
    fn pump_applies_pending_updates() {
        let (req_tx, req_rx) = crossbeam_channel::unbounded();
        let (resp_tx, resp_rx) = crossbeam_channel::unbounded();
        let s = CellStore::new(GridSize::default(), req_tx, resp_rx);
        assert_eq!(s.pump(), Ok(0));

        resp_tx
            .send(EngineResponse::CellChanged {
                address: Address::ORIGIN,
                record: CellRecord {
                    value: CellValue::Text("hi".into()),
                    source: "hi".into(),
                },
            })
            .unwrap();
        assert_eq!(s.pump(), Ok(1));
        assert_eq!(s.read(Address::ORIGIN).source, "hi");

        resp_tx.send(EngineResponse::Error("boom".into())).unwrap();
        assert_eq!(s.pump(), Err(StoreError::Engine("boom".into())));

        drop(req_rx);
        assert_eq!(s.write(Address::ORIGIN, "1"), Err(StoreError::EngineGone));
        drop(resp_tx);
        assert_eq!(s.pump(), Err(StoreError::EngineGone));
    }
}
