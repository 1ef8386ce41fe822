//! fan-in (N→1 merge, C6).

use crate::cancel::CancelToken;
use crate::stage::{channel, StreamReceiver, StreamSender};
use std::thread;

/// Merges multiple `Result<T>` streams into one. One worker per input;
/// inputs contribute concurrently with no ordering between them (ordering
/// within a single input is preserved, since only that input's worker reads
/// from it). Output completes once every input has completed, or on
/// cancellation.
pub struct FanIn {
    name: &'static str,
}

impl FanIn {
    /// Creates a new `fan-in` stage.
    #[must_use]
    pub const fn new(name: &'static str) -> Self {
        Self { name }
    }

    /// The stage's diagnostic name.
    #[must_use]
    pub const fn name(&self) -> &str {
        self.name
    }

    /// Merges `inputs` into a single output stream.
    pub fn process<T>(
        &self,
        cancel_signal: CancelToken,
        inputs: Vec<StreamReceiver<T>>,
    ) -> StreamReceiver<T>
    where
        T: Send + 'static,
    {
        let (out_tx, out_rx): (StreamSender<T>, StreamReceiver<T>) = channel();
        for (i, input) in inputs.into_iter().enumerate() {
            let cancel = cancel_signal.clone();
            let out_tx = out_tx.clone();
            thread::Builder::new()
                .name(format!("{}-in-{i}", self.name))
                .spawn(move || loop {
                    crossbeam_channel::select! {
                        recv(cancel.gate()) -> _ => break,
                        recv(input) -> msg => match msg {
                            Ok(item) => {
                                if out_tx.send(item).is_err() {
                                    break;
                                }
                            }
                            Err(_) => break,
                        },
                    }
                })
                .expect("spawn fan-in input worker");
        }
        drop(out_tx);
        out_rx
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::result::Result;
    use crate::stage::channel as stage_channel;

    #[test]
    fn merges_all_inputs_output_is_multiset_union() {
        let cancel = CancelToken::new();
        let (tx1, rx1) = stage_channel::<i32>();
        let (tx2, rx2) = stage_channel::<i32>();
        let stage = FanIn::new("merge");
        let out = stage.process(cancel, vec![rx1, rx2]);

        tx1.send(Result::success(1)).unwrap();
        tx2.send(Result::success(2)).unwrap();
        tx1.send(Result::success(3)).unwrap();
        drop(tx1);
        tx2.send(Result::success(4)).unwrap();
        drop(tx2);

        let mut got = Vec::new();
        while let Ok(item) = out.recv() {
            got.push(*item.value());
        }
        got.sort_unstable();
        assert_eq!(got, vec![1, 2, 3, 4]);
    }

    #[test]
    fn completes_once_all_inputs_complete() {
        let cancel = CancelToken::new();
        let (tx1, rx1) = stage_channel::<i32>();
        let (tx2, rx2) = stage_channel::<i32>();
        let stage = FanIn::new("merge");
        let out = stage.process(cancel, vec![rx1, rx2]);
        drop(tx1);
        drop(tx2);
        assert!(out.recv().is_err());
    }

    #[test]
    fn empty_input_set_completes_immediately() {
        let cancel = CancelToken::new();
        let stage = FanIn::new("merge");
        let out: StreamReceiver<i32> = stage.process(cancel, vec![]);
        assert!(out.recv().is_err());
    }
}
