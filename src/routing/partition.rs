//! partition (hash-based 1→N routing, C6).

use crate::cancel::CancelToken;
use crate::error::{ConfigError, StreamResult};
use crate::metadata::keys;
use crate::result::Result;
use crate::stage::{channel, StreamReceiver, StreamSender};
use std::thread;

/// A stable hash function over each success, modulo partition count `N`,
/// selects an output index. Failures pass through on a dedicated error
/// output. Each routed item is annotated with [`keys::PARTITION_INDEX`].
pub struct Partition<T, H> {
    name: &'static str,
    partition_count: usize,
    hash: H,
    _marker: std::marker::PhantomData<fn(&T) -> u64>,
}

/// Outputs of a [`Partition`] stage: one stream per partition index plus a
/// dedicated error output.
pub struct PartitionOutputs<T> {
    /// `partitions[i]` receives every success hashing to index `i`.
    pub partitions: Vec<StreamReceiver<T>>,
    /// All input failures.
    pub errors: StreamReceiver<T>,
}

impl<T, H> Partition<T, H>
where
    H: FnMut(&T) -> u64 + Send + 'static,
{
    /// Creates a new `partition` stage with `partition_count` outputs.
    /// Rejects `partition_count == 0` at construction.
    pub fn new(name: &'static str, partition_count: usize, hash: H) -> StreamResult<Self> {
        if partition_count == 0 {
            return Err(ConfigError::ZeroPartitions);
        }
        Ok(Self {
            name,
            partition_count,
            hash,
            _marker: std::marker::PhantomData,
        })
    }
}

impl<T, H> Partition<T, H>
where
    T: Send + 'static,
    H: FnMut(&T) -> u64 + Send + 'static,
{
    /// Runs the partition stage.
    pub fn process(self, cancel_signal: CancelToken, input: StreamReceiver<T>) -> PartitionOutputs<T> {
        let Self {
            name,
            partition_count,
            mut hash,
            ..
        } = self;
        let mut senders = Vec::with_capacity(partition_count);
        let mut receivers = Vec::with_capacity(partition_count);
        for _ in 0..partition_count {
            let (tx, rx): (StreamSender<T>, StreamReceiver<T>) = channel();
            senders.push(tx);
            receivers.push(rx);
        }
        let (errors_tx, errors_rx): (StreamSender<T>, StreamReceiver<T>) = channel();

        thread::Builder::new()
            .name(name.to_string())
            .spawn(move || 'outer: loop {
                let item: Result<T> = crossbeam_channel::select! {
                    recv(cancel_signal.gate()) -> _ => break 'outer,
                    recv(input) -> msg => match msg {
                        Ok(item) => item,
                        Err(_) => break 'outer,
                    },
                };
                match item {
                    Result::Success { value, metadata } => {
                        let index = (hash(&value) as usize) % partition_count;
                        let tagged = Result::Success {
                            value,
                            metadata: metadata.with(keys::PARTITION_INDEX, index as u64),
                        };
                        crossbeam_channel::select! {
                            recv(cancel_signal.gate()) -> _ => break 'outer,
                            send(senders[index], tagged) -> _ => {}
                        }
                    }
                    failure @ Result::Failure { .. } => {
                        crossbeam_channel::select! {
                            recv(cancel_signal.gate()) -> _ => break 'outer,
                            send(errors_tx, failure) -> _ => {}
                        }
                    }
                }
            })
            .expect("spawn partition worker");

        PartitionOutputs {
            partitions: receivers,
            errors: errors_rx,
        }
    }
}
