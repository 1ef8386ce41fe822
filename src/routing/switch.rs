//! switch (multi-way 1→K routing, C6).

use crate::cancel::CancelToken;
use crate::metadata::keys;
use crate::result::Result;
use crate::stage::{channel, StreamReceiver, StreamSender};
use std::collections::HashMap;
use std::thread;

/// A newly discovered route, announced the first time an item is routed to
/// it.
pub struct RouteStream<T> {
    /// The route key (see [`keys::ROUTE`]).
    pub route: String,
    /// The output stream for this route.
    pub receiver: StreamReceiver<T>,
}

/// Outputs of a [`Switch`] stage: a channel announcing newly created routes
/// as they appear, plus a dedicated error output for failures.
pub struct SwitchOutputs<T> {
    /// Fires once per distinct route, the first time an item is routed to
    /// it. Closes once the stage completes.
    pub routes: crossbeam_channel::Receiver<RouteStream<T>>,
    /// All input failures, routed here instead of to any named route.
    pub errors: StreamReceiver<T>,
}

/// A key-extraction function over each success yields a string route; one
/// lazily created output stream per distinct route. Failures route to a
/// dedicated error output. Each routed item is annotated with
/// [`keys::ROUTE`] metadata.
pub struct Switch<T, F> {
    name: &'static str,
    route_key: F,
    _marker: std::marker::PhantomData<fn(&T) -> String>,
}

impl<T, F> Switch<T, F>
where
    F: FnMut(&T) -> String + Send + 'static,
{
    /// Creates a new `switch` stage named `name`.
    pub fn new(name: &'static str, route_key: F) -> Self {
        Self {
            name,
            route_key,
            _marker: std::marker::PhantomData,
        }
    }
}

impl<T, F> Switch<T, F>
where
    T: Send + 'static,
    F: FnMut(&T) -> String + Send + 'static,
{
    /// Runs the switch, returning the route-discovery channel and the error
    /// output.
    pub fn process(self, cancel_signal: CancelToken, input: StreamReceiver<T>) -> SwitchOutputs<T> {
        let Self { name, mut route_key, .. } = self;
        let (errors_tx, errors_rx): (StreamSender<T>, StreamReceiver<T>) = channel();
        let (routes_tx, routes_rx) = crossbeam_channel::unbounded::<RouteStream<T>>();

        thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                let mut outputs: HashMap<String, StreamSender<T>> = HashMap::new();
                'outer: loop {
                    let item: Result<T> = crossbeam_channel::select! {
                        recv(cancel_signal.gate()) -> _ => break 'outer,
                        recv(input) -> msg => match msg {
                            Ok(item) => item,
                            Err(_) => break 'outer,
                        },
                    };
                    match item {
                        Result::Success { value, metadata } => {
                            let route = route_key(&value);
                            let tx = outputs
                                .entry(route.clone())
                                .or_insert_with(|| {
                                    let (tx, rx) = channel();
                                    let _ = routes_tx.send(RouteStream {
                                        route: route.clone(),
                                        receiver: rx,
                                    });
                                    tx
                                })
                                .clone();
                            let tagged = Result::Success {
                                value,
                                metadata: metadata.with(keys::ROUTE, route),
                            };
                            crossbeam_channel::select! {
                                recv(cancel_signal.gate()) -> _ => break 'outer,
                                send(tx, tagged) -> _ => {}
                            }
                        }
                        failure @ Result::Failure { .. } => {
                            crossbeam_channel::select! {
                                recv(cancel_signal.gate()) -> _ => break 'outer,
                                send(errors_tx, failure) -> _ => {}
                            }
                        }
                    }
                }
            })
            .expect("spawn switch worker");

        SwitchOutputs {
            routes: routes_rx,
            errors: errors_rx,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::result::Message;
    use crate::stage::channel as stage_channel;
    use std::collections::HashMap as StdHashMap;
    use std::time::Duration;

    #[test]
    fn routes_by_key_lazily_creating_outputs() {
        let cancel = CancelToken::new();
        let (tx, rx) = stage_channel::<&'static str>();
        let out = Switch::new("route", |v: &&'static str| (*v).to_string()).process(cancel, rx);
        tx.send(Result::success("a")).unwrap();
        tx.send(Result::success("b")).unwrap();
        tx.send(Result::success("a")).unwrap();
        drop(tx);

        let mut receivers: StdHashMap<String, StreamReceiver<&'static str>> = StdHashMap::new();
        while let Ok(rs) = out.routes.recv_timeout(Duration::from_secs(1)) {
            receivers.insert(rs.route, rs.receiver);
        }
        assert_eq!(receivers.len(), 2);
        let a = &receivers["a"];
        assert_eq!(*a.recv().unwrap().value(), "a");
        assert_eq!(*a.recv().unwrap().value(), "a");
        assert!(a.recv().is_err());
        let b = &receivers["b"];
        assert_eq!(*b.recv().unwrap().value(), "b");
        assert!(b.recv().is_err());
    }

    #[test]
    fn failures_go_to_error_output() {
        let cancel = CancelToken::new();
        let (tx, rx) = stage_channel::<&'static str>();
        let out = Switch::new("route", |v: &&'static str| (*v).to_string()).process(cancel, rx);
        tx.send(Result::failure("x", Message("bad".into()), "s", 0))
            .unwrap();
        drop(tx);
        assert!(out.errors.recv().unwrap().is_failure());
    }
}
