//! Deterministic, manually-advanced [`Clock`](super::Clock) implementation.
//!
//! `FakeClock` maintains a priority queue of scheduled callbacks keyed by
//! virtual deadline. [`advance`](FakeClock::advance) repeatedly pops and
//! fires all due entries in deadline order (ties broken FIFO) until virtual
//! time reaches the new `now`, then returns. A single mutex-protected event
//! loop owns the deadline heap — no per-timer locks, no timer-per-callback
//! threads mutating shared state.
//!
//! `after_func` callbacks are dispatched to a dedicated worker thread rather
//! than run inline while the clock's lock is held, so a callback that itself
//! schedules new timers can never deadlock against `advance`.
//! [`block_until_ready`](FakeClock::block_until_ready) waits for that
//! worker's queue to drain.

use super::{duration_to_nanos_saturating, StopControl, Ticker, Timer, TimerControl, TimerHandle, Timestamp};
use crossbeam_channel::{bounded, unbounded, Sender};
use parking_lot::Mutex;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

type Id = u64;

enum Entry {
    OneShot(Sender<()>),
    Ticker(Sender<()>, u64),
    Callback(Option<Box<dyn FnOnce() + Send>>),
}

struct Slot {
    entry: Entry,
    generation: u64,
}

#[derive(Clone, Copy)]
struct HeapItem {
    deadline: u64,
    seq: u64,
    id: Id,
    generation: u64,
}

impl PartialEq for HeapItem {
    fn eq(&self, other: &Self) -> bool {
        (self.deadline, self.seq) == (other.deadline, other.seq)
    }
}
impl Eq for HeapItem {}
impl PartialOrd for HeapItem {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for HeapItem {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (self.deadline, self.seq).cmp(&(other.deadline, other.seq))
    }
}

struct State {
    now: u64,
    heap: BinaryHeap<Reverse<HeapItem>>,
    entries: HashMap<Id, Slot>,
    next_id: Id,
    next_seq: u64,
}

struct Inner {
    state: Mutex<State>,
    callback_tx: Sender<Box<dyn FnOnce() + Send>>,
    pending_callbacks: AtomicUsize,
}

/// A clock whose time advances only by explicit instruction.
#[derive(Clone)]
pub struct FakeClock {
    inner: Arc<Inner>,
}

impl FakeClock {
    /// Creates a fake clock starting at `t=0`, spawning its callback worker.
    #[must_use]
    pub fn new() -> Self {
        let (callback_tx, callback_rx) = unbounded::<Box<dyn FnOnce() + Send>>();
        let inner = Arc::new(Inner {
            state: Mutex::new(State {
                now: 0,
                heap: BinaryHeap::new(),
                entries: HashMap::new(),
                next_id: 0,
                next_seq: 0,
            }),
            callback_tx,
            pending_callbacks: AtomicUsize::new(0),
        });
        let worker_inner = Arc::clone(&inner);
        thread::Builder::new()
            .name("flowcore-fake-clock-callbacks".into())
            .spawn(move || {
                while let Ok(f) = callback_rx.recv() {
                    f();
                    worker_inner.pending_callbacks.fetch_sub(1, Ordering::SeqCst);
                }
            })
            .expect("spawn fake clock callback worker");
        Self { inner }
    }

    fn alloc_id(state: &mut State) -> Id {
        let id = state.next_id;
        state.next_id += 1;
        id
    }

    fn next_seq(state: &mut State) -> u64 {
        state.next_seq += 1;
        state.next_seq
    }

    /// Deterministically advances virtual time by `duration`, firing every
    /// due timer/ticker/callback in deadline order (FIFO among equal
    /// deadlines) before returning. Does not itself wait for dispatched
    /// `after_func` callbacks to finish running — call
    /// [`block_until_ready`](Self::block_until_ready) for that.
    pub fn advance(&self, duration: Duration) {
        let target = {
            let state = self.inner.state.lock();
            state.now.saturating_add(duration_to_nanos_saturating(duration))
        };
        self.advance_to_nanos(target);
    }

    /// Advances virtual time to exactly `deadline` (a no-op if `deadline` is
    /// not after the current time).
    pub fn advance_to(&self, deadline: Timestamp) {
        self.advance_to_nanos(deadline.as_nanos());
    }

    fn advance_to_nanos(&self, target: u64) {
        loop {
            let mut state = self.inner.state.lock();
            let due = matches!(state.heap.peek(), Some(Reverse(item)) if item.deadline <= target);
            if !due {
                state.now = state.now.max(target);
                return;
            }
            let Reverse(item) = state.heap.pop().expect("peeked Some");
            state.now = state.now.max(item.deadline);

            let Some(slot) = state.entries.get(&item.id) else {
                continue; // stopped
            };
            if slot.generation != item.generation {
                continue; // superseded by reset()
            }

            match state.entries.remove(&item.id).expect("checked Some").entry {
                Entry::OneShot(tx) => {
                    let _ = tx.send(());
                }
                Entry::Ticker(tx, period) => {
                    if tx.send(()).is_ok() {
                        let seq = Self::next_seq(&mut state);
                        let deadline = item.deadline.saturating_add(period);
                        let generation = item.generation;
                        state.entries.insert(item.id, Slot { entry: Entry::Ticker(tx, period), generation });
                        state.heap.push(Reverse(HeapItem { deadline, seq, id: item.id, generation }));
                    }
                }
                Entry::Callback(f) => {
                    if let Some(f) = f {
                        self.inner.pending_callbacks.fetch_add(1, Ordering::SeqCst);
                        let _ = self.inner.callback_tx.send(f);
                    }
                }
            }
        }
    }

    /// Blocks until every `after_func` callback dispatched by a prior
    /// `advance`/`advance_to` call has finished running.
    pub fn block_until_ready(&self) {
        while self.inner.pending_callbacks.load(Ordering::SeqCst) > 0 {
            thread::yield_now();
        }
    }

    /// Number of timers/tickers/callbacks currently scheduled (not yet fired
    /// or stopped). Test introspection only.
    #[must_use]
    pub fn scheduled_count(&self) -> usize {
        self.inner.state.lock().entries.len()
    }
}

impl Default for FakeClock {
    fn default() -> Self {
        Self::new()
    }
}

struct FakeTimerControl {
    id: Id,
    inner: Arc<Inner>,
}

impl TimerControl for FakeTimerControl {
    fn reset(&self, duration: Duration) {
        let mut state = self.inner.state.lock();
        let now = state.now;
        let Some(slot) = state.entries.get_mut(&self.id) else {
            return; // already fired or stopped; revival not supported
        };
        slot.generation += 1;
        let generation = slot.generation;
        let deadline = now.saturating_add(duration_to_nanos_saturating(duration));
        let seq = FakeClock::next_seq(&mut state);
        state.heap.push(Reverse(HeapItem { deadline, seq, id: self.id, generation }));
    }

    fn stop(&self) -> bool {
        self.inner.state.lock().entries.remove(&self.id).is_some()
    }
}

impl StopControl for FakeTimerControl {
    fn stop(&self) -> bool {
        TimerControl::stop(self)
    }
}

impl super::Clock for FakeClock {
    fn now(&self) -> Timestamp {
        Timestamp(self.inner.state.lock().now)
    }

    fn new_timer(&self, duration: Duration) -> Timer {
        let (tx, rx) = bounded(1);
        let mut state = self.inner.state.lock();
        let id = Self::alloc_id(&mut state);
        let deadline = state.now.saturating_add(duration_to_nanos_saturating(duration));
        let seq = Self::next_seq(&mut state);
        state.entries.insert(id, Slot { entry: Entry::OneShot(tx), generation: 0 });
        state.heap.push(Reverse(HeapItem { deadline, seq, id, generation: 0 }));
        drop(state);
        Timer::new(rx, Arc::new(FakeTimerControl { id, inner: Arc::clone(&self.inner) }))
    }

    fn new_ticker(&self, interval: Duration) -> Ticker {
        let (tx, rx) = unbounded();
        let mut state = self.inner.state.lock();
        let id = Self::alloc_id(&mut state);
        let period = duration_to_nanos_saturating(interval);
        let deadline = state.now.saturating_add(period);
        let seq = Self::next_seq(&mut state);
        state.entries.insert(id, Slot { entry: Entry::Ticker(tx, period), generation: 0 });
        state.heap.push(Reverse(HeapItem { deadline, seq, id, generation: 0 }));
        drop(state);
        Ticker::new(rx, Arc::new(FakeTimerControl { id, inner: Arc::clone(&self.inner) }))
    }

    fn after_func(&self, duration: Duration, f: Box<dyn FnOnce() + Send>) -> TimerHandle {
        let mut state = self.inner.state.lock();
        let id = Self::alloc_id(&mut state);
        let deadline = state.now.saturating_add(duration_to_nanos_saturating(duration));
        let seq = Self::next_seq(&mut state);
        state.entries.insert(id, Slot { entry: Entry::Callback(Some(f)), generation: 0 });
        state.heap.push(Reverse(HeapItem { deadline, seq, id, generation: 0 }));
        drop(state);
        TimerHandle::new(Arc::new(FakeTimerControl { id, inner: Arc::clone(&self.inner) }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::Clock;

    #[test]
    fn advance_fires_due_timer() {
        let clock = FakeClock::new();
        let timer = clock.new_timer(Duration::from_millis(100));
        assert!(timer.receiver().try_recv().is_err());
        clock.advance(Duration::from_millis(100));
        assert!(timer.receiver().try_recv().is_ok());
        assert_eq!(clock.now(), Timestamp(100_000_000));
    }

    #[test]
    fn equal_deadline_timers_fire_fifo() {
        let clock = FakeClock::new();
        let t1 = clock.new_timer(Duration::from_millis(50));
        let t2 = clock.new_timer(Duration::from_millis(50));
        clock.advance(Duration::from_millis(50));
        // Both fired; order of firing is scheduling order (t1 before t2).
        assert!(t1.receiver().try_recv().is_ok());
        assert!(t2.receiver().try_recv().is_ok());
    }

    #[test]
    fn reset_before_fire_reschedules() {
        let clock = FakeClock::new();
        let timer = clock.new_timer(Duration::from_millis(100));
        clock.advance(Duration::from_millis(50));
        timer.reset(Duration::from_millis(100)); // now due at 150
        clock.advance(Duration::from_millis(50)); // t=100, not yet due
        assert!(timer.receiver().try_recv().is_err());
        clock.advance(Duration::from_millis(50)); // t=150, due
        assert!(timer.receiver().try_recv().is_ok());
    }

    #[test]
    fn stop_before_fire_prevents_firing() {
        let clock = FakeClock::new();
        let timer = clock.new_timer(Duration::from_millis(100));
        assert!(timer.stop());
        clock.advance(Duration::from_secs(10));
        assert!(timer.receiver().try_recv().is_err());
        assert!(!timer.stop());
    }

    #[test]
    fn ticker_fires_every_interval() {
        let clock = FakeClock::new();
        let ticker = clock.new_ticker(Duration::from_millis(10));
        clock.advance(Duration::from_millis(35));
        let mut count = 0;
        while ticker.receiver().try_recv().is_ok() {
            count += 1;
        }
        assert_eq!(count, 3);
    }

    #[test]
    fn after_func_runs_and_block_until_ready_waits() {
        let clock = FakeClock::new();
        let flag = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let flag2 = Arc::clone(&flag);
        let _handle = clock.after_func(
            Duration::from_millis(10),
            Box::new(move || {
                flag2.store(true, Ordering::SeqCst);
            }),
        );
        clock.advance(Duration::from_millis(10));
        clock.block_until_ready();
        assert!(flag.load(Ordering::SeqCst));
    }

    #[test]
    fn scheduled_count_reflects_pending_entries() {
        let clock = FakeClock::new();
        assert_eq!(clock.scheduled_count(), 0);
        let t1 = clock.new_timer(Duration::from_millis(10));
        let t2 = clock.new_timer(Duration::from_millis(20));
        assert_eq!(clock.scheduled_count(), 2);
        t1.stop();
        assert_eq!(clock.scheduled_count(), 1);
        clock.advance(Duration::from_millis(20));
        clock.block_until_ready();
        assert_eq!(clock.scheduled_count(), 0);
        let _ = t2;
    }
}
