// src/engine/fetch.rs
//! Fetch computations and the combinators that build them.
//!
//! A [`Fetch`] is a description of work, not the work itself. Stepping it
//! against a run's cache and store either produces a value, fails, or
//! blocks on requests that were registered for the next dispatch. How the
//! blocked sets of sub-computations are merged is what decides batching:
//!
//! - [`apply`], [`zip`], [`sequence`] and [`traverse`] step every operand
//!   in the same step, so their requests land in the same round.
//! - [`Fetch::and_then`] cannot build its continuation before the first
//!   value is known, so anything the continuation requests waits for a
//!   later round.

use super::cache::DedupCache;
use super::status::{FetchStatus, StatusCell};
use super::store::RequestStore;
use crate::algebras::{BlockedFetch, DataSource, Request, ResponseOf};
use crate::error::FetchError;
use crate::types::RequestKey;
use std::fmt;
use std::sync::Arc;

/// The per-run state a step reads and registers requests into.
pub struct FetchEnv<'a> {
    cache: &'a DedupCache,
    store: &'a RequestStore,
}

impl<'a> FetchEnv<'a> {
    pub fn new(cache: &'a DedupCache, store: &'a RequestStore) -> Self {
        Self { cache, store }
    }

    pub fn cache(&self) -> &'a DedupCache {
        self.cache
    }

    pub fn store(&self) -> &'a RequestStore {
        self.store
    }
}

/// Outcome of stepping a computation once.
pub enum FetchStep<T> {
    Done(T),
    /// Waiting on a round. The keys are the requests this step newly
    /// registered; a request already registered by a sibling is not
    /// repeated. The store, not this list, decides what is dispatched.
    Blocked(Vec<RequestKey>, Fetch<T>),
    Failed(FetchError),
}

impl<T> FetchStep<T> {
    pub fn is_done(&self) -> bool {
        matches!(self, FetchStep::Done(_))
    }

    pub fn is_blocked(&self) -> bool {
        matches!(self, FetchStep::Blocked(..))
    }
}

impl<T: fmt::Debug> fmt::Debug for FetchStep<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchStep::Done(value) => f.debug_tuple("Done").field(value).finish(),
            FetchStep::Blocked(pending, _) => f.debug_tuple("Blocked").field(pending).finish(),
            FetchStep::Failed(err) => f.debug_tuple("Failed").field(err).finish(),
        }
    }
}

type StepFn<T> = Box<dyn FnOnce(&FetchEnv<'_>) -> FetchStep<T> + Send>;

/// A deferred computation producing a `T`.
///
/// Building a `Fetch` has no side effects. Each step consumes the value
/// and, when blocked, hands back a fresh continuation to step after the
/// next dispatch.
pub struct Fetch<T> {
    step: StepFn<T>,
}

impl<T: Send + 'static> Fetch<T> {
    /// Builds a computation from a raw step function.
    pub fn new<F>(step: F) -> Self
    where
        F: FnOnce(&FetchEnv<'_>) -> FetchStep<T> + Send + 'static,
    {
        Self {
            step: Box::new(step),
        }
    }

    /// A computation that is already done.
    pub fn lift(value: T) -> Self {
        Self::new(move |_| FetchStep::Done(value))
    }

    /// A computation that fails without touching the cache or the store.
    pub fn fail(err: impl Into<FetchError>) -> Self {
        let err = err.into();
        Self::new(move |_| FetchStep::Failed(err))
    }

    /// Steps the computation once against the run state.
    pub fn step(self, env: &FetchEnv<'_>) -> FetchStep<T> {
        (self.step)(env)
    }

    pub fn map<U, F>(self, f: F) -> Fetch<U>
    where
        U: Send + 'static,
        F: FnOnce(T) -> U + Send + 'static,
    {
        Fetch::new(move |env| match self.step(env) {
            FetchStep::Done(value) => FetchStep::Done(f(value)),
            FetchStep::Blocked(pending, cont) => FetchStep::Blocked(pending, cont.map(f)),
            FetchStep::Failed(err) => FetchStep::Failed(err),
        })
    }

    /// Sequences a computation that depends on this one's value.
    ///
    /// When this computation is done, `f` runs in the same step; otherwise
    /// `f` waits for the value and its own requests go to a later round.
    pub fn and_then<U, F>(self, f: F) -> Fetch<U>
    where
        U: Send + 'static,
        F: FnOnce(T) -> Fetch<U> + Send + 'static,
    {
        Fetch::new(move |env| match self.step(env) {
            FetchStep::Done(value) => f(value).step(env),
            FetchStep::Blocked(pending, cont) => FetchStep::Blocked(pending, cont.and_then(f)),
            FetchStep::Failed(err) => FetchStep::Failed(err),
        })
    }

    /// Pairs two independent computations; see [`zip`].
    pub fn zip<U: Send + 'static>(self, other: Fetch<U>) -> Fetch<(T, U)> {
        zip(self, other)
    }
}

impl<T> fmt::Debug for Fetch<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Fetch(..)")
    }
}

/// Applies a fetched function to a fetched argument, stepping both in the
/// same step so their requests share a round.
///
/// Requests from `ff` are registered before requests from `fa`. If `ff`
/// fails, its error wins and `fa` is not stepped.
pub fn apply<A, B, F>(ff: Fetch<F>, fa: Fetch<A>) -> Fetch<B>
where
    A: Send + 'static,
    B: Send + 'static,
    F: FnOnce(A) -> B + Send + 'static,
{
    Fetch::new(move |env| {
        let left = match ff.step(env) {
            FetchStep::Failed(err) => return FetchStep::Failed(err),
            left => left,
        };
        match (left, fa.step(env)) {
            (_, FetchStep::Failed(err)) | (FetchStep::Failed(err), _) => FetchStep::Failed(err),
            (FetchStep::Done(f), FetchStep::Done(a)) => FetchStep::Done(f(a)),
            (FetchStep::Done(f), FetchStep::Blocked(pending, a)) => {
                FetchStep::Blocked(pending, a.map(f))
            }
            (FetchStep::Blocked(pending, f), FetchStep::Done(a)) => {
                FetchStep::Blocked(pending, apply(f, Fetch::lift(a)))
            }
            (FetchStep::Blocked(mut pending, f), FetchStep::Blocked(more, a)) => {
                pending.extend(more);
                FetchStep::Blocked(pending, apply(f, a))
            }
        }
    })
}

/// Runs two independent computations in the same rounds.
pub fn zip<A, B>(fa: Fetch<A>, fb: Fetch<B>) -> Fetch<(A, B)>
where
    A: Send + 'static,
    B: Send + 'static,
{
    apply(fa.map(|a| move |b: B| (a, b)), fb)
}

enum Slot<T> {
    Ready(T),
    Pending(Fetch<T>),
}

/// Collects independent computations, stepping all of them together.
///
/// Equivalent to folding [`apply`] over the list: requests are registered
/// in list order, the first failure in list order wins, and results keep
/// the input order. Stepping is iterative, so long lists stay shallow.
pub fn sequence<T: Send + 'static>(fetches: Vec<Fetch<T>>) -> Fetch<Vec<T>> {
    sequence_slots(fetches.into_iter().map(Slot::Pending).collect())
}

fn sequence_slots<T: Send + 'static>(slots: Vec<Slot<T>>) -> Fetch<Vec<T>> {
    Fetch::new(move |env| {
        let mut pending = Vec::new();
        let mut blocked = false;
        let mut next = Vec::with_capacity(slots.len());

        for slot in slots {
            match slot {
                Slot::Ready(value) => next.push(Slot::Ready(value)),
                Slot::Pending(fetch) => match fetch.step(env) {
                    FetchStep::Done(value) => next.push(Slot::Ready(value)),
                    FetchStep::Blocked(keys, cont) => {
                        blocked = true;
                        pending.extend(keys);
                        next.push(Slot::Pending(cont));
                    }
                    FetchStep::Failed(err) => return FetchStep::Failed(err),
                },
            }
        }

        if blocked {
            return FetchStep::Blocked(pending, sequence_slots(next));
        }
        FetchStep::Done(
            next.into_iter()
                .filter_map(|slot| match slot {
                    Slot::Ready(value) => Some(value),
                    Slot::Pending(_) => None,
                })
                .collect(),
        )
    })
}

/// Maps every item to a computation and collects them applicatively, so
/// all items' first requests are batched into one round.
pub fn traverse<I, A, B, F>(items: I, f: F) -> Fetch<Vec<B>>
where
    I: IntoIterator<Item = A>,
    B: Send + 'static,
    F: FnMut(A) -> Fetch<B>,
{
    sequence(items.into_iter().map(f).collect())
}

/// Maps every item to a computation and runs them one after another: the
/// computation for an item is only built once the previous item's value
/// is known.
///
/// Items that resolve without blocking are consumed in a loop within one
/// step, so long inputs stay shallow.
pub fn traverse_seq<I, A, B, F>(items: I, f: F) -> Fetch<Vec<B>>
where
    I: IntoIterator<Item = A>,
    A: Send + 'static,
    B: Send + 'static,
    F: FnMut(A) -> Fetch<B> + Send + 'static,
{
    let items: Vec<A> = items.into_iter().collect();
    let capacity = items.len();
    traverse_seq_from(items.into_iter(), Vec::with_capacity(capacity), None, f)
}

/// Resumes a sequential traversal, starting with `current` if an earlier
/// step left an item pending.
fn traverse_seq_from<A, B, F>(
    rest: std::vec::IntoIter<A>,
    acc: Vec<B>,
    current: Option<Fetch<B>>,
    f: F,
) -> Fetch<Vec<B>>
where
    A: Send + 'static,
    B: Send + 'static,
    F: FnMut(A) -> Fetch<B> + Send + 'static,
{
    Fetch::new(move |env| {
        let (mut rest, mut acc, mut current, mut f) = (rest, acc, current, f);
        loop {
            let fetch = match current.take() {
                Some(fetch) => fetch,
                None => match rest.next() {
                    Some(item) => f(item),
                    None => return FetchStep::Done(acc),
                },
            };
            match fetch.step(env) {
                FetchStep::Done(value) => acc.push(value),
                FetchStep::Blocked(pending, cont) => {
                    return FetchStep::Blocked(
                        pending,
                        traverse_seq_from(rest, acc, Some(cont), f),
                    )
                }
                FetchStep::Failed(err) => return FetchStep::Failed(err),
            }
        }
    })
}

/// Fetches one request from a data source.
///
/// The first fetch of a request in a run registers it for the next round;
/// later fetches of the same request share its status cell and never
/// register it again. A request already resolved in this run is answered
/// from the cache without blocking.
pub fn data_fetch<S: DataSource>(source: &Arc<S>, request: S::Request) -> Fetch<ResponseOf<S>> {
    let source = Arc::clone(source);
    Fetch::new(move |env| {
        let key = RequestKey::new(source.name(), request.identifier());
        let cache = env.cache();

        match cache.get::<ResponseOf<S>>(&key) {
            Err(err) => return FetchStep::Failed(err),
            Ok(Some(cell)) => {
                log::trace!("Cache hit for {}", key);
                return resume(cell, key);
            }
            Ok(None) => {}
        }

        let cell = StatusCell::new();
        match cache.put(key.clone(), cell.clone()) {
            Err(err) => FetchStep::Failed(err),
            Ok(winner) if !winner.ptr_eq(&cell) => resume(winner, key),
            Ok(_) => {
                log::trace!("Registering {}", key);
                let blocked = BlockedFetch::new(request, key.clone(), cell.clone());
                env.store().add_request(&source, blocked);
                FetchStep::Blocked(vec![key.clone()], await_cell(cell, key))
            }
        }
    })
}

/// Answers from a cell some earlier fetch registered.
fn resume<T>(cell: StatusCell<T>, key: RequestKey) -> FetchStep<T>
where
    T: Clone + Send + Sync + 'static,
{
    match cell.status() {
        FetchStatus::Success(value) => FetchStep::Done(value),
        FetchStatus::Failure(err) => FetchStep::Failed(err),
        FetchStatus::NotFetched => FetchStep::Blocked(Vec::new(), await_cell(cell, key)),
    }
}

/// Reads a cell after its round has been dispatched. A cell still
/// unresolved at that point means its source dropped the request.
fn await_cell<T>(cell: StatusCell<T>, key: RequestKey) -> Fetch<T>
where
    T: Clone + Send + Sync + 'static,
{
    Fetch::new(move |_| match cell.status() {
        FetchStatus::Success(value) => FetchStep::Done(value),
        FetchStatus::Failure(err) => FetchStep::Failed(err),
        FetchStatus::NotFetched => FetchStep::Failed(FetchError::IncompleteFetch {
            data_source: key.data_source,
            request: key.request.to_string(),
        }),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algebras::PerformFetch;
    use crate::types::RequestId;
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;

    #[derive(Debug, Clone)]
    struct Word(&'static str);

    impl Request for Word {
        type Response = usize;

        fn identifier(&self) -> RequestId {
            RequestId::new(self.0)
        }
    }

    /// Counts letters; records batches but resolves only when told to.
    #[derive(Default)]
    struct Letters {
        batches: Mutex<Vec<Vec<&'static str>>>,
    }

    impl DataSource for Letters {
        type Request = Word;

        fn name(&self) -> &str {
            "letters"
        }

        fn fetch(&self, batch: Vec<BlockedFetch<Word>>) -> PerformFetch {
            self.batches
                .lock()
                .push(batch.iter().map(|b| b.request().0).collect());
            for blocked in &batch {
                match blocked.request().0 {
                    "boom" => blocked.put_failure(anyhow::anyhow!("cannot count boom")),
                    word => blocked.put_success(word.len()),
                }
            }
            PerformFetch::Complete
        }
    }

    struct Harness {
        cache: DedupCache,
        store: RequestStore,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                cache: DedupCache::new(),
                store: RequestStore::new(),
            }
        }

        fn step<T: Send + 'static>(&self, fetch: Fetch<T>) -> FetchStep<T> {
            fetch.step(&FetchEnv::new(&self.cache, &self.store))
        }

        /// Hands the pending batch to the source synchronously.
        fn dispatch(&self) {
            futures::executor::block_on(
                self.store
                    .resolve_all(&crate::config::EngineConfig::default()),
            )
            .unwrap();
        }
    }

    fn letters() -> Arc<Letters> {
        Arc::new(Letters::default())
    }

    fn done<T: fmt::Debug>(step: FetchStep<T>) -> T {
        match step {
            FetchStep::Done(value) => value,
            other => panic!("expected Done, got {:?}", other),
        }
    }

    fn blocked<T>(step: FetchStep<T>) -> (Vec<RequestKey>, Fetch<T>) {
        match step {
            FetchStep::Blocked(pending, cont) => (pending, cont),
            FetchStep::Done(_) => panic!("expected Blocked, got Done"),
            FetchStep::Failed(err) => panic!("expected Blocked, got Failed({})", err),
        }
    }

    fn failed<T>(step: FetchStep<T>) -> FetchError {
        match step {
            FetchStep::Failed(err) => err,
            _ => panic!("expected Failed"),
        }
    }

    #[test]
    fn lift_never_touches_run_state() {
        let h = Harness::new();
        assert_eq!(done(h.step(Fetch::lift(7))), 7);
        assert!(h.cache.is_empty());
        assert!(h.store.is_empty());
    }

    #[test]
    fn map_runs_under_a_block() {
        let h = Harness::new();
        let source = letters();
        let fetch = data_fetch(&source, Word("hello")).map(|n| n * 10);

        let (pending, cont) = blocked(h.step(fetch));
        assert_eq!(pending, vec![RequestKey::new("letters", "hello")]);
        h.dispatch();
        assert_eq!(done(h.step(cont)), 50);
    }

    #[test]
    fn apply_merges_both_sides_into_one_round() {
        let h = Harness::new();
        let source = letters();
        let ff = data_fetch(&source, Word("ab")).map(|a| move |b: usize| a * 100 + b);
        let fa = data_fetch(&source, Word("abc"));

        let (pending, cont) = blocked(h.step(apply(ff, fa)));
        assert_eq!(
            pending,
            vec![
                RequestKey::new("letters", "ab"),
                RequestKey::new("letters", "abc")
            ]
        );
        assert_eq!(h.store.len(), 2);

        h.dispatch();
        assert_eq!(done(h.step(cont)), 203);
        assert_eq!(*source.batches.lock(), vec![vec!["ab", "abc"]]);
    }

    #[test]
    fn apply_with_one_side_done() {
        let h = Harness::new();
        let source = letters();

        let fetch = apply(Fetch::lift(|n: usize| n + 1), data_fetch(&source, Word("xyz")));
        let (_, cont) = blocked(h.step(fetch));
        h.dispatch();
        assert_eq!(done(h.step(cont)), 4);

        let fetch = apply(
            data_fetch(&source, Word("pq")).map(|a| move |b: usize| a + b),
            Fetch::lift(40),
        );
        let (_, cont) = blocked(h.step(fetch));
        h.dispatch();
        assert_eq!(done(h.step(cont)), 42);
    }

    #[test]
    fn apply_prefers_left_failure() {
        let h = Harness::new();
        let left: Fetch<fn(u8) -> u8> = Fetch::fail(anyhow::anyhow!("left"));
        let right: Fetch<u8> = Fetch::fail(anyhow::anyhow!("right"));
        assert_eq!(failed(h.step(apply(left, right))).to_string(), "left");

        let source = letters();
        let left = data_fetch(&source, Word("ok")).map(|a| move |b: u8| a + b as usize);
        let right: Fetch<u8> = Fetch::fail(anyhow::anyhow!("right"));
        assert_eq!(failed(h.step(apply(left, right))).to_string(), "right");
    }

    #[test]
    fn and_then_defers_dependent_requests() {
        let h = Harness::new();
        let source = letters();
        let inner = Arc::clone(&source);
        let fetch = data_fetch(&source, Word("four"))
            .and_then(move |n| data_fetch(&inner, Word(if n == 4 { "second" } else { "x" })));

        let (pending, cont) = blocked(h.step(fetch));
        assert_eq!(pending, vec![RequestKey::new("letters", "four")]);
        h.dispatch();

        let (pending, cont) = blocked(h.step(cont));
        assert_eq!(pending, vec![RequestKey::new("letters", "second")]);
        h.dispatch();

        assert_eq!(done(h.step(cont)), 6);
        assert_eq!(*source.batches.lock(), vec![vec!["four"], vec!["second"]]);
    }

    #[test]
    fn and_then_on_done_continues_in_same_step() {
        let h = Harness::new();
        let fetch = Fetch::lift(2).and_then(|n| Fetch::lift(n * 3));
        assert_eq!(done(h.step(fetch)), 6);
    }

    #[test]
    fn duplicate_fetch_registers_once() {
        let h = Harness::new();
        let source = letters();
        let fetch = zip(
            data_fetch(&source, Word("same")),
            data_fetch(&source, Word("same")),
        );

        let (pending, cont) = blocked(h.step(fetch));
        assert_eq!(pending, vec![RequestKey::new("letters", "same")]);
        assert_eq!(h.store.len(), 1);

        h.dispatch();
        assert_eq!(done(h.step(cont)), (4, 4));
        assert_eq!(*source.batches.lock(), vec![vec!["same"]]);
    }

    #[test]
    fn resolved_request_short_circuits() {
        let h = Harness::new();
        let source = letters();
        let (_, cont) = blocked(h.step(data_fetch(&source, Word("seen"))));
        h.dispatch();
        assert_eq!(done(h.step(cont)), 4);

        assert_eq!(done(h.step(data_fetch(&source, Word("seen")))), 4);
        assert!(h.store.is_empty());
        assert_eq!(h.cache.len(), 1);
    }

    #[test]
    fn failed_request_surfaces_source_error() {
        let h = Harness::new();
        let source = letters();
        let (_, cont) = blocked(h.step(data_fetch(&source, Word("boom"))));
        h.dispatch();

        let err = failed(h.step(cont));
        assert_eq!(err.data_source_name(), Some("letters"));

        let again = failed(h.step(data_fetch(&source, Word("boom"))));
        assert!(matches!(again, FetchError::DataSource { .. }));
    }

    #[test]
    fn undispatched_continuation_is_a_contract_violation() {
        let h = Harness::new();
        let source = letters();
        let (_, cont) = blocked(h.step(data_fetch(&source, Word("dropped"))));

        let err = failed(h.step(cont));
        assert!(err.is_contract_violation());
        assert!(err.to_string().contains("expected completed fetch"));
    }

    #[test]
    fn sequence_batches_and_keeps_order() {
        let h = Harness::new();
        let source = letters();
        let fetch = traverse(["a", "bbb", "cc"], |w| data_fetch(&source, Word(w)));

        let (pending, cont) = blocked(h.step(fetch));
        assert_eq!(pending.len(), 3);
        h.dispatch();
        assert_eq!(done(h.step(cont)), vec![1, 3, 2]);
        assert_eq!(*source.batches.lock(), vec![vec!["a", "bbb", "cc"]]);
    }

    #[test]
    fn sequence_of_nothing_is_done() {
        let h = Harness::new();
        let empty: Vec<Fetch<u8>> = Vec::new();
        assert_eq!(done(h.step(sequence(empty))), Vec::<u8>::new());
    }

    #[test]
    fn sequence_reports_first_failure_in_order() {
        let h = Harness::new();
        let fetches: Vec<Fetch<u8>> = vec![
            Fetch::lift(1),
            Fetch::fail(anyhow::anyhow!("second")),
            Fetch::fail(anyhow::anyhow!("third")),
        ];
        assert_eq!(failed(h.step(sequence(fetches))).to_string(), "second");
    }

    #[test]
    fn sequence_handles_long_lists() {
        let h = Harness::new();
        let fetches: Vec<Fetch<usize>> = (0..50_000).map(Fetch::lift).collect();
        assert_eq!(done(h.step(sequence(fetches))).len(), 50_000);
    }

    #[test]
    fn traverse_seq_handles_long_lists() {
        let h = Harness::new();
        let step = h.step(traverse_seq(0..100_000usize, Fetch::lift));
        assert!(step.is_done());
        let values = done(step);
        assert_eq!(values.len(), 100_000);
        assert_eq!(values[99_999], 99_999);
    }

    #[test]
    fn traverse_seq_over_cached_keys_stays_in_one_step() {
        let h = Harness::new();
        let source = letters();
        let words: Vec<&'static str> = vec!["ab"; 20_000];

        let first = Arc::clone(&source);
        let (_, cont) = blocked(h.step(traverse_seq(words, move |w| {
            data_fetch(&first, Word(w))
        })));
        h.dispatch();
        assert!(h.cache.contains(&RequestKey::new("letters", "ab")));

        let step = h.step(cont);
        assert!(!step.is_blocked());
        assert_eq!(done(step), vec![2; 20_000]);
        assert_eq!(source.batches.lock().len(), 1);
    }

    #[test]
    fn traverse_seq_resumes_at_the_pending_item() {
        let h = Harness::new();
        let source = letters();
        let inner = Arc::clone(&source);
        let items = vec![Some("a"), None, Some("ccc"), None];
        let fetch = traverse_seq(items, move |item| match item {
            Some(w) => data_fetch(&inner, Word(w)),
            None => Fetch::lift(0),
        });

        let (pending, cont) = blocked(h.step(fetch));
        assert_eq!(pending, vec![RequestKey::new("letters", "a")]);
        h.dispatch();
        let (pending, cont) = blocked(h.step(cont));
        assert_eq!(pending, vec![RequestKey::new("letters", "ccc")]);
        h.dispatch();
        assert_eq!(done(h.step(cont)), vec![1, 0, 3, 0]);
    }

    #[test]
    fn traverse_seq_uses_one_round_per_item() {
        let h = Harness::new();
        let source = letters();
        let inner = Arc::clone(&source);
        let mut fetch = traverse_seq(vec!["x", "yy"], move |w| data_fetch(&inner, Word(w)));

        let mut rounds = 0;
        let result = loop {
            match h.step(fetch) {
                FetchStep::Done(value) => break value,
                FetchStep::Blocked(_, cont) => {
                    rounds += 1;
                    h.dispatch();
                    fetch = cont;
                }
                FetchStep::Failed(err) => panic!("unexpected failure: {}", err),
            }
        };

        assert_eq!(result, vec![1, 2]);
        assert_eq!(rounds, 2);
        assert_eq!(*source.batches.lock(), vec![vec!["x"], vec!["yy"]]);
    }
}
