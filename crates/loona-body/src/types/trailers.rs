use std::fmt;

use tracing::trace;

use crate::{error::ContractViolation, Headers};

/// Computes trailers as a function of the body that was actually sent.
///
/// [TrailersMaker::fold] is called once per body chunk, in order, after
/// the chunk was handed to the engine. [TrailersMaker::finish] is called
/// exactly once, after the last chunk. Both are called synchronously from
/// the task that drives the body, so they must not block.
pub trait TrailersMaker {
    fn fold(&mut self, chunk: &[u8]);

    fn finish(self: Box<Self>) -> Headers;
}

/// The default trailers maker: ignores every chunk, sends no trailers.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoTrailers;

impl TrailersMaker for NoTrailers {
    fn fold(&mut self, _chunk: &[u8]) {}

    fn finish(self: Box<Self>) -> Headers {
        Headers::new()
    }
}

/// A trailers maker made of a state value and two plain functions.
///
/// ```
/// use loona_body::{FoldTrailers, Headers};
///
/// let maker = FoldTrailers::new(
///     0u64,
///     |len, chunk| *len += chunk.len() as u64,
///     |len| {
///         let mut trailers = Headers::new();
///         trailers.insert("x-body-length", len.into());
///         trailers
///     },
/// );
/// # drop(maker);
/// ```
pub struct FoldTrailers<S, F, G> {
    state: S,
    fold: F,
    finish: G,
}

impl<S, F, G> FoldTrailers<S, F, G>
where
    F: FnMut(&mut S, &[u8]),
    G: FnOnce(S) -> Headers,
{
    pub fn new(state: S, fold: F, finish: G) -> Self {
        Self {
            state,
            fold,
            finish,
        }
    }
}

impl<S, F, G> TrailersMaker for FoldTrailers<S, F, G>
where
    F: FnMut(&mut S, &[u8]),
    G: FnOnce(S) -> Headers,
{
    fn fold(&mut self, chunk: &[u8]) {
        (self.fold)(&mut self.state, chunk)
    }

    fn finish(self: Box<Self>) -> Headers {
        let this = *self;
        (this.finish)(this.state)
    }
}

/// What happened after feeding a trailers maker one step
#[derive(Debug)]
pub enum NextTrailers {
    /// A chunk was folded, the maker carries on
    Continue,

    /// The body ended, these are the trailers (possibly empty)
    Final(Headers),
}

/// Owns a [TrailersMaker] for the duration of one body and enforces
/// its call order: any number of chunks, then exactly one end-of-body.
pub struct TrailersTracker {
    state: TrackerState,
    chunks_folded: u64,
}

enum TrackerState {
    Active(Box<dyn TrailersMaker>),
    Finished,
}

impl TrailersTracker {
    pub fn new(maker: Box<dyn TrailersMaker>) -> Self {
        Self {
            state: TrackerState::Active(maker),
            chunks_folded: 0,
        }
    }

    /// `Some(chunk)` folds a chunk, `None` marks the end of the body
    pub fn step(&mut self, chunk: Option<&[u8]>) -> Result<NextTrailers, ContractViolation> {
        match chunk {
            Some(chunk) => {
                let TrackerState::Active(maker) = &mut self.state else {
                    return Err(ContractViolation::FoldAfterFinal);
                };
                trace!(len = chunk.len(), "folding chunk into trailers maker");
                maker.fold(chunk);
                self.chunks_folded += 1;
                Ok(NextTrailers::Continue)
            }
            None => self.finish().map(NextTrailers::Final),
        }
    }

    pub fn fold(&mut self, chunk: &[u8]) -> Result<(), ContractViolation> {
        self.step(Some(chunk)).map(|_| ())
    }

    pub fn finish(&mut self) -> Result<Headers, ContractViolation> {
        match std::mem::replace(&mut self.state, TrackerState::Finished) {
            TrackerState::Active(maker) => Ok(maker.finish()),
            TrackerState::Finished => Err(ContractViolation::FinishedTwice),
        }
    }

    /// How many chunks were folded so far
    pub fn chunks_folded(&self) -> u64 {
        self.chunks_folded
    }

    pub fn is_finished(&self) -> bool {
        matches!(self.state, TrackerState::Finished)
    }
}

impl fmt::Debug for TrailersTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrailersTracker")
            .field("chunks_folded", &self.chunks_folded)
            .field("finished", &self.is_finished())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn byte_counter() -> Box<dyn TrailersMaker> {
        Box::new(FoldTrailers::new(
            0usize,
            |n, chunk| *n += chunk.len(),
            |n| {
                let mut trailers = Headers::new();
                trailers.insert("x-len", n.into());
                trailers
            },
        ))
    }

    #[test]
    fn default_maker_sends_no_trailers() {
        let mut tracker = TrailersTracker::new(Box::new(NoTrailers));
        tracker.fold(b"ignored").unwrap();
        let trailers = tracker.finish().unwrap();
        assert!(trailers.is_empty());
    }

    #[test]
    fn folds_in_order_then_finishes() {
        let mut tracker = TrailersTracker::new(byte_counter());
        tracker.fold(b"abc").unwrap();
        tracker.fold(b"defg").unwrap();
        assert_eq!(tracker.chunks_folded(), 2);

        let trailers = tracker.finish().unwrap();
        assert_eq!(trailers.get("x-len").unwrap(), "7");
        assert!(tracker.is_finished());
    }

    #[test]
    fn rejects_out_of_sequence_calls() {
        let mut tracker = TrailersTracker::new(byte_counter());
        tracker.finish().unwrap();

        assert!(matches!(
            tracker.fold(b"late"),
            Err(ContractViolation::FoldAfterFinal)
        ));
        assert!(matches!(
            tracker.finish(),
            Err(ContractViolation::FinishedTwice)
        ));
        assert_eq!(tracker.chunks_folded(), 0);
    }

    #[test]
    fn step_walks_the_same_state_machine() {
        let mut tracker = TrailersTracker::new(byte_counter());
        assert!(matches!(
            tracker.step(Some(b"hello")),
            Ok(NextTrailers::Continue)
        ));
        match tracker.step(None) {
            Ok(NextTrailers::Final(trailers)) => {
                assert_eq!(trailers.get("x-len").unwrap(), "5")
            }
            other => panic!("expected final trailers, got {other:?}"),
        }
        assert!(matches!(
            tracker.step(None),
            Err(ContractViolation::FinishedTwice)
        ));
    }
}
