//! fan-out (1→N broadcast, C6).

use crate::cancel::CancelToken;
use crate::error::{ConfigError, StreamResult};
use crate::result::Result;
use crate::stage::{channel, StreamReceiver, StreamSender};
use std::thread;

/// Duplicates every input item to `N` outputs. The single worker advances
/// to the next input item only after every output has accepted the current
/// one — all-or-nothing back-pressure — so a stalled consumer on any one
/// output stalls the whole stage, not just its own branch.
pub struct FanOut {
    name: &'static str,
    output_count: usize,
}

impl FanOut {
    /// Creates a new `fan-out` stage with `output_count` outputs. Rejects
    /// `output_count == 0` at construction.
    pub fn new(name: &'static str, output_count: usize) -> StreamResult<Self> {
        if output_count == 0 {
            return Err(ConfigError::ZeroOutputs);
        }
        Ok(Self { name, output_count })
    }

    /// The stage's diagnostic name.
    #[must_use]
    pub const fn name(&self) -> &str {
        self.name
    }

    /// Broadcasts `input` to `output_count` freshly created output streams.
    pub fn process<T>(&self, cancel_signal: CancelToken, input: StreamReceiver<T>) -> Vec<StreamReceiver<T>>
    where
        T: Clone + Send + 'static,
    {
        let mut senders = Vec::with_capacity(self.output_count);
        let mut receivers = Vec::with_capacity(self.output_count);
        for _ in 0..self.output_count {
            let (tx, rx): (StreamSender<T>, StreamReceiver<T>) = channel();
            senders.push(tx);
            receivers.push(rx);
        }

        thread::Builder::new()
            .name(format!("{}-broadcast", self.name))
            .spawn(move || 'outer: loop {
                let item: Result<T> = crossbeam_channel::select! {
                    recv(cancel_signal.gate()) -> _ => break 'outer,
                    recv(input) -> msg => match msg {
                        Ok(item) => item,
                        Err(_) => break 'outer,
                    },
                };
                for tx in &senders {
                    let item = item.clone();
                    crossbeam_channel::select! {
                        recv(cancel_signal.gate()) -> _ => break 'outer,
                        send(tx, item) -> res => {
                            if res.is_err() {
                                // that output's consumer is gone; the others
                                // still need this item, so keep going.
                            }
                        }
                    }
                }
            })
            .expect("spawn fan-out broadcast worker");

        receivers
    }
}
