//! buffer (fixed / dropping / sliding, C7).
//!
//! A single worker owns the internal queue; it uses
//! [`crossbeam_channel::Select`]'s dynamic (non-macro) form rather than the
//! `select!` macro because which operations are even eligible — "may we
//! accept another input item?", "do we have anything to emit?" — depends on
//! the current queue length, decided fresh on every iteration.

use crate::cancel::CancelToken;
use crate::error::{ConfigError, StreamResult};
use crate::result::Result;
use crate::stage::{channel, Stage, StreamReceiver, StreamSender};
use crossbeam_channel::Select;
use std::collections::VecDeque;
use std::thread;

/// Overflow policy for [`Buffer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferMode {
    /// Never drops; a full buffer back-pressures the upstream producer.
    Fixed,
    /// When full, the newest arriving item is dropped — unless it is a
    /// failure and the buffer holds at least one success, in which case the
    /// oldest success is evicted to make room (documented choice: failures
    /// are kept preferentially).
    Dropping,
    /// When full, the oldest queued item (success or failure) is evicted to
    /// make room for the newest.
    Sliding,
}

/// Introduces bounded buffering of `capacity` items between producer and
/// consumer, with a configurable overflow policy.
pub struct Buffer<T> {
    name: &'static str,
    mode: BufferMode,
    capacity: usize,
    _marker: std::marker::PhantomData<T>,
}

impl<T> Buffer<T> {
    /// Creates a new `buffer` stage. Rejects `capacity == 0` at
    /// construction.
    pub fn new(name: &'static str, mode: BufferMode, capacity: usize) -> StreamResult<Self> {
        if capacity == 0 {
            return Err(ConfigError::ZeroBufferCapacity);
        }
        Ok(Self {
            name,
            mode,
            capacity,
            _marker: std::marker::PhantomData,
        })
    }
}

fn admit<T>(mode: BufferMode, capacity: usize, queue: &mut VecDeque<Result<T>>, item: Result<T>) {
    if queue.len() < capacity {
        queue.push_back(item);
        return;
    }
    match mode {
        BufferMode::Fixed => unreachable!("Fixed only admits when queue.len() < capacity"),
        BufferMode::Dropping => {
            if item.is_failure() {
                let evict_at = queue.iter().position(Result::is_success);
                if let Some(i) = evict_at {
                    queue.remove(i);
                    queue.push_back(item);
                } else {
                    // buffer is entirely failures; drop the oldest to make
                    // room rather than lose the newest one.
                    queue.pop_front();
                    queue.push_back(item);
                }
            }
            // else: a full buffer drops the newest success silently.
        }
        BufferMode::Sliding => {
            queue.pop_front();
            queue.push_back(item);
        }
    }
}

impl<T> Stage for Buffer<T>
where
    T: Send + 'static,
{
    type In = T;
    type Out = T;

    fn process(
        self: Box<Self>,
        cancel_signal: CancelToken,
        input: StreamReceiver<Self::In>,
    ) -> StreamReceiver<Self::Out> {
        let Self { name, mode, capacity, .. } = *self;
        let (out_tx, out_rx): (StreamSender<T>, StreamReceiver<T>) = channel();

        thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                let mut queue: VecDeque<Result<T>> = VecDeque::with_capacity(capacity);
                let mut input_open = true;
                loop {
                    let can_admit =
                        input_open && (mode != BufferMode::Fixed || queue.len() < capacity);
                    let can_emit = !queue.is_empty();
                    if !can_admit && !can_emit {
                        break;
                    }

                    let mut sel = Select::new();
                    let cancel_idx = sel.recv(cancel_signal.gate());
                    let input_idx = can_admit.then(|| sel.recv(&input));
                    let output_idx = can_emit.then(|| sel.send(&out_tx));

                    let oper = sel.select();
                    let idx = oper.index();
                    if idx == cancel_idx {
                        let _ = oper.recv(cancel_signal.gate());
                        break;
                    } else if Some(idx) == input_idx {
                        match oper.recv(&input) {
                            Ok(item) => admit(mode, capacity, &mut queue, item),
                            Err(_) => input_open = false,
                        }
                    } else if Some(idx) == output_idx {
                        let item = queue.pop_front().expect("can_emit checked non-empty");
                        if oper.send(&out_tx, item).is_err() {
                            break;
                        }
                    }
                }
            })
            .expect("spawn buffer worker");

        out_rx
    }

    fn name(&self) -> &str {
        self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::result::Message;
    use crate::stage::channel as stage_channel;
    use std::time::Duration;

    #[test]
    fn fixed_buffer_preserves_all_items_in_order() {
        let (tx, rx) = stage_channel::<i32>();
        let cancel = CancelToken::new();
        let stage = Buffer::new("buf", BufferMode::Fixed, 2).unwrap();
        let out = Box::new(stage).process(cancel, rx);
        for v in 0..5 {
            tx.send(Result::success(v)).unwrap();
        }
        drop(tx);
        for v in 0..5 {
            assert_eq!(*out.recv().unwrap().value(), v);
        }
        assert!(out.recv().is_err());
    }

    #[test]
    fn dropping_buffer_drops_newest_success_on_overflow() {
        let (tx, rx) = stage_channel::<i32>();
        let cancel = CancelToken::new();
        let stage = Buffer::new("buf", BufferMode::Dropping, 1).unwrap();
        let out = Box::new(stage).process(cancel, rx);
        // Fill then overflow before anything is read.
        tx.send(Result::success(1)).unwrap();
        std::thread::sleep(Duration::from_millis(20)); // let the worker pick it up into the queue
        tx.send(Result::success(2)).unwrap();
        std::thread::sleep(Duration::from_millis(20));
        drop(tx);
        assert_eq!(*out.recv().unwrap().value(), 1);
        assert!(out.recv().is_err());
    }

    #[test]
    fn dropping_buffer_keeps_failure_over_queued_success() {
        let (tx, rx) = stage_channel::<i32>();
        let cancel = CancelToken::new();
        let stage = Buffer::new("buf", BufferMode::Dropping, 1).unwrap();
        let out = Box::new(stage).process(cancel, rx);
        tx.send(Result::success(1)).unwrap();
        std::thread::sleep(Duration::from_millis(20));
        tx.send(Result::failure(2, Message("e".into()), "s", 0)).unwrap();
        std::thread::sleep(Duration::from_millis(20));
        drop(tx);
        let got = out.recv().unwrap();
        assert!(got.is_failure());
        assert!(out.recv().is_err());
    }

    #[test]
    fn sliding_buffer_drops_oldest_on_overflow() {
        let (tx, rx) = stage_channel::<i32>();
        let cancel = CancelToken::new();
        let stage = Buffer::new("buf", BufferMode::Sliding, 1).unwrap();
        let out = Box::new(stage).process(cancel, rx);
        tx.send(Result::success(1)).unwrap();
        std::thread::sleep(Duration::from_millis(20));
        tx.send(Result::success(2)).unwrap();
        std::thread::sleep(Duration::from_millis(20));
        drop(tx);
        assert_eq!(*out.recv().unwrap().value(), 2);
        assert!(out.recv().is_err());
    }

    #[test]
    fn zero_capacity_rejected_at_construction() {
        let err = Buffer::<i32>::new("buf", BufferMode::Fixed, 0).unwrap_err();
        assert_eq!(err, ConfigError::ZeroBufferCapacity);
    }
}
