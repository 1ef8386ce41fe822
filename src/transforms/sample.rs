use super::{spawn_stateless, Decision};
use crate::cancel::CancelToken;
use crate::error::{ConfigError, StreamResult};
use crate::result::Result;
use crate::stage::{Stage, StreamReceiver};

/// Randomly keeps success values with probability `rate`, dropping the
/// rest. Failures always pass through — sampling decides what to throw away
/// among successes, not what to hide among errors.
pub struct Sample<T> {
    name: &'static str,
    rate: f64,
    rng: fastrand::Rng,
    _marker: std::marker::PhantomData<T>,
}

impl<T> Sample<T> {
    /// Creates a `sample` stage keeping each success value with probability
    /// `rate`, using a randomly seeded generator. Rejects a NaN, infinite,
    /// or out-of-`[0.0, 1.0]` rate at construction, per §6.
    pub fn new(name: &'static str, rate: f64) -> StreamResult<Self> {
        Self::with_rng(name, rate, fastrand::Rng::new())
    }

    /// Creates a `sample` stage with an explicit seed, for deterministic
    /// tests. Same rate validation as [`Sample::new`].
    pub fn with_seed(name: &'static str, rate: f64, seed: u64) -> StreamResult<Self> {
        Self::with_rng(name, rate, fastrand::Rng::with_seed(seed))
    }

    fn with_rng(name: &'static str, rate: f64, rng: fastrand::Rng) -> StreamResult<Self> {
        if !rate.is_finite() || !(0.0..=1.0).contains(&rate) {
            return Err(ConfigError::InvalidSampleRate(rate));
        }
        Ok(Self {
            name,
            rate,
            rng,
            _marker: std::marker::PhantomData,
        })
    }
}

impl<T> Stage for Sample<T>
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
        let Self { name, rate, mut rng, .. } = *self;
        spawn_stateless(name, cancel_signal, input, move |item| match item {
            success @ Result::Success { .. } => {
                if rng.f64() < rate {
                    Decision::Emit(success)
                } else {
                    Decision::Drop
                }
            }
            failure @ Result::Failure { .. } => Decision::Emit(failure),
        })
    }

    fn name(&self) -> &str {
        self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stage::channel;

    #[test]
    fn rate_zero_drops_everything() {
        let (tx, rx) = channel::<i32>();
        let cancel = CancelToken::new();
        let out = Box::new(Sample::with_seed("none", 0.0, 1).unwrap()).process(cancel, rx);
        for v in 0..20 {
            tx.send(Result::success(v)).unwrap();
        }
        drop(tx);
        assert!(out.recv().is_err());
    }

    #[test]
    fn rate_one_keeps_everything() {
        let (tx, rx) = channel::<i32>();
        let cancel = CancelToken::new();
        let out = Box::new(Sample::with_seed("all", 1.0, 1).unwrap()).process(cancel, rx);
        for v in 0..20 {
            tx.send(Result::success(v)).unwrap();
        }
        drop(tx);
        for v in 0..20 {
            assert_eq!(*out.recv().unwrap().value(), v);
        }
        assert!(out.recv().is_err());
    }

    #[test]
    fn failures_always_pass_through_regardless_of_rate() {
        let (tx, rx) = channel::<i32>();
        let cancel = CancelToken::new();
        let out = Box::new(Sample::with_seed("none", 0.0, 1).unwrap()).process(cancel, rx);
        tx.send(Result::failure(1, crate::result::Message("e".into()), "s", 0))
            .unwrap();
        drop(tx);
        assert!(out.recv().unwrap().is_failure());
    }

    #[test]
    fn nan_rate_rejected_at_construction() {
        let err = Sample::<i32>::new("bad", f64::NAN).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidSampleRate(r) if r.is_nan()));
    }

    #[test]
    fn infinite_rate_rejected_at_construction() {
        let err = Sample::<i32>::new("bad", f64::INFINITY).unwrap_err();
        assert_eq!(err, ConfigError::InvalidSampleRate(f64::INFINITY));
    }

    #[test]
    fn out_of_range_rate_rejected_at_construction() {
        let err = Sample::<i32>::new("bad", 1.5).unwrap_err();
        assert_eq!(err, ConfigError::InvalidSampleRate(1.5));
    }
}
