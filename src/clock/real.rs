//! Wall-clock [`Clock`](super::Clock) implementation.
//!
//! A single background driver thread owns every pending timer/ticker/
//! callback registration for a given `RealClock`: the driver is the sole
//! owner of the deadline heap, matching the "single event loop, no
//! shared-state mutex over timer handles" discipline the spec requires of
//! session windows and debounce, generalized here to the clock itself.

use super::{duration_to_nanos_saturating, StopControl, Ticker, Timer, TimerControl, TimerHandle, Timestamp};
use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender};
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

type Id = u64;

enum Entry {
    OneShot(Sender<()>),
    Ticker(Sender<()>, Duration),
    Callback(Option<Box<dyn FnOnce() + Send>>),
}

enum Cmd {
    Schedule { id: Id, deadline: Instant, entry: Entry },
    Reset { id: Id, deadline: Instant },
    Stop { id: Id, reply: Sender<bool> },
}

struct HeapItem {
    deadline: Instant,
    seq: u64,
    id: Id,
}

impl PartialEq for HeapItem {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
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

fn driver_loop(cmd_rx: Receiver<Cmd>) {
    let mut heap: BinaryHeap<Reverse<HeapItem>> = BinaryHeap::new();
    let mut entries: HashMap<Id, Entry> = HashMap::new();
    let mut seq: u64 = 0;

    loop {
        let timeout = heap
            .peek()
            .map(|Reverse(item)| item.deadline.saturating_duration_since(Instant::now()))
            .unwrap_or(Duration::from_secs(3600));

        match cmd_rx.recv_timeout(timeout) {
            Ok(Cmd::Schedule { id, deadline, entry }) => {
                entries.insert(id, entry);
                seq += 1;
                heap.push(Reverse(HeapItem { deadline, seq, id }));
            }
            Ok(Cmd::Reset { id, deadline }) => {
                if entries.contains_key(&id) {
                    seq += 1;
                    heap.push(Reverse(HeapItem { deadline, seq, id }));
                }
            }
            Ok(Cmd::Stop { id, reply }) => {
                let was_pending = entries.remove(&id).is_some();
                let _ = reply.send(was_pending);
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => return,
        }

        let now = Instant::now();
        while let Some(Reverse(item)) = heap.peek() {
            if item.deadline > now {
                break;
            }
            let Reverse(item) = heap.pop().expect("peeked");
            match entries.remove(&item.id) {
                None => {} // stopped or already reset away
                Some(Entry::OneShot(tx)) => {
                    let _ = tx.send(());
                }
                Some(Entry::Ticker(tx, period)) => {
                    if tx.send(()).is_ok() {
                        seq += 1;
                        entries.insert(item.id, Entry::Ticker(tx, period));
                        heap.push(Reverse(HeapItem {
                            deadline: item.deadline + period,
                            seq,
                            id: item.id,
                        }));
                    }
                }
                Some(Entry::Callback(f)) => {
                    if let Some(f) = f {
                        // Run off the driver's own stack so a callback that
                        // schedules more work doesn't reenter this loop.
                        thread::spawn(f);
                    }
                }
            }
        }
    }
}

/// A [`Clock`](super::Clock) backed by the host's monotonic wall clock.
pub struct RealClock {
    epoch: Instant,
    cmd_tx: Sender<Cmd>,
    next_id: AtomicU64,
}

impl RealClock {
    /// Creates a new real clock, spawning its driver thread.
    #[must_use]
    pub fn new() -> Arc<Self> {
        let (cmd_tx, cmd_rx) = unbounded();
        thread::Builder::new()
            .name("flowcore-real-clock-driver".into())
            .spawn(move || driver_loop(cmd_rx))
            .expect("spawn real clock driver thread");
        Arc::new(Self {
            epoch: Instant::now(),
            cmd_tx,
            next_id: AtomicU64::new(0),
        })
    }

    fn alloc_id(&self) -> Id {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }
}

struct RealTimerControl {
    id: Id,
    cmd_tx: Sender<Cmd>,
}

impl TimerControl for RealTimerControl {
    fn reset(&self, duration: Duration) {
        let _ = self.cmd_tx.send(Cmd::Reset {
            id: self.id,
            deadline: Instant::now() + duration,
        });
    }

    fn stop(&self) -> bool {
        let (reply, reply_rx) = bounded(1);
        if self.cmd_tx.send(Cmd::Stop { id: self.id, reply }).is_err() {
            return false;
        }
        reply_rx.recv().unwrap_or(false)
    }
}

impl StopControl for RealTimerControl {
    fn stop(&self) -> bool {
        TimerControl::stop(self)
    }
}

impl super::Clock for RealClock {
    fn now(&self) -> Timestamp {
        Timestamp(duration_to_nanos_saturating(self.epoch.elapsed()))
    }

    fn new_timer(&self, duration: Duration) -> Timer {
        let id = self.alloc_id();
        let (tx, rx) = bounded(1);
        let _ = self.cmd_tx.send(Cmd::Schedule {
            id,
            deadline: Instant::now() + duration,
            entry: Entry::OneShot(tx),
        });
        Timer::new(
            rx,
            Arc::new(RealTimerControl {
                id,
                cmd_tx: self.cmd_tx.clone(),
            }),
        )
    }

    fn new_ticker(&self, interval: Duration) -> Ticker {
        let id = self.alloc_id();
        let (tx, rx) = unbounded();
        let _ = self.cmd_tx.send(Cmd::Schedule {
            id,
            deadline: Instant::now() + interval,
            entry: Entry::Ticker(tx, interval),
        });
        Ticker::new(
            rx,
            Arc::new(RealTimerControl {
                id,
                cmd_tx: self.cmd_tx.clone(),
            }),
        )
    }

    fn after_func(&self, duration: Duration, f: Box<dyn FnOnce() + Send>) -> TimerHandle {
        let id = self.alloc_id();
        let _ = self.cmd_tx.send(Cmd::Schedule {
            id,
            deadline: Instant::now() + duration,
            entry: Entry::Callback(Some(f)),
        });
        TimerHandle::new(Arc::new(RealTimerControl {
            id,
            cmd_tx: self.cmd_tx.clone(),
        }))
    }
}
