//! Routes testcase ids to simulators.

use std::sync::{Arc, Mutex, PoisonError};
use tracing::info;

use crate::{AccountingHeap, BugDescriptor, BugSummary, Catalog, HarnessError, Outcome, SimContext};

pub struct Dispatcher {
    catalog: Catalog,
    heap: Arc<AccountingHeap>,
    release_leaks: bool,
    // One testcase in flight at a time, so the static region and the heap
    // accounting each reflect a single case.
    in_flight: Mutex<()>,
}

impl Dispatcher {
    pub fn new(catalog: Catalog, heap: Arc<AccountingHeap>, release_leaks: bool) -> Self {
        Self {
            catalog,
            heap,
            release_leaks,
            in_flight: Mutex::new(()),
        }
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn enumerate(&self) -> Vec<BugSummary> {
        self.catalog.iter().map(|entry| entry.summary()).collect()
    }

    /// Runs the testcase once. Unknown ids fail before anything runs.
    pub fn invoke(&self, id: &str) -> Result<Outcome, HarnessError> {
        let descriptor = self.catalog.lookup(id)?;
        self.run_descriptor(descriptor)
    }

    /// Runs the testcase `times` times, stopping at the first error. The id is
    /// resolved once, before any round runs.
    pub fn invoke_repeated(&self, id: &str, times: u32) -> Result<Vec<Outcome>, HarnessError> {
        let descriptor = self.catalog.lookup(id)?;
        let mut outcomes = Vec::new();
        for _ in 0..times {
            outcomes.push(self.run_descriptor(descriptor)?);
        }
        Ok(outcomes)
    }

    fn run_descriptor(&self, descriptor: &BugDescriptor) -> Result<Outcome, HarnessError> {
        // A testcase that panicked must not lock everyone else out.
        let _guard = self
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        info!(
            id = descriptor.id,
            category = descriptor.category.label(),
            region = descriptor.region.label(),
            "running testcase"
        );
        let ctx = SimContext::new(self.heap.as_ref(), self.release_leaks);
        (descriptor.invoke)(&ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{AccessMode, Category, Detector, Direction, Region};
    use std::sync::atomic::{AtomicUsize, Ordering};

    // Each test that counts calls owns its simulators; tests run in parallel.
    static ROUTE_A_CALLS: AtomicUsize = AtomicUsize::new(0);
    static ROUTE_B_CALLS: AtomicUsize = AtomicUsize::new(0);
    static UNTOUCHED_CALLS: AtomicUsize = AtomicUsize::new(0);

    fn route_a(_ctx: &SimContext<'_>) -> Result<Outcome, HarnessError> {
        ROUTE_A_CALLS.fetch_add(1, Ordering::SeqCst);
        Ok(Outcome::Value { value: 1 })
    }

    fn route_b(_ctx: &SimContext<'_>) -> Result<Outcome, HarnessError> {
        ROUTE_B_CALLS.fetch_add(1, Ordering::SeqCst);
        Ok(Outcome::Value { value: 2 })
    }

    fn untouched(_ctx: &SimContext<'_>) -> Result<Outcome, HarnessError> {
        UNTOUCHED_CALLS.fetch_add(1, Ordering::SeqCst);
        Ok(Outcome::Completed)
    }

    fn first(_ctx: &SimContext<'_>) -> Result<Outcome, HarnessError> {
        Ok(Outcome::Value { value: 1 })
    }

    fn second(ctx: &SimContext<'_>) -> Result<Outcome, HarnessError> {
        Ok(Outcome::Value {
            value: if ctx.release_leaks() { 20 } else { 2 },
        })
    }

    fn failing(_ctx: &SimContext<'_>) -> Result<Outcome, HarnessError> {
        Err(HarnessError::AllocationFailure { size: 7 })
    }

    fn case(id: &'static str, invoke: crate::Simulator) -> BugDescriptor {
        BugDescriptor {
            id,
            category: Category::OutOfBounds,
            region: Region::Heap,
            access: Some(AccessMode::Write),
            direction: Direction::Overflow,
            expected_detector: Detector::Sanitizer,
            summary: "",
            invoke,
        }
    }

    fn dispatcher_with(cases: &[BugDescriptor], release_leaks: bool) -> Dispatcher {
        let mut builder = Catalog::builder();
        for descriptor in cases {
            builder.register(*descriptor).unwrap();
        }
        Dispatcher::new(
            builder.build(),
            Arc::new(AccountingHeap::system()),
            release_leaks,
        )
    }

    fn dispatcher(release_leaks: bool) -> Dispatcher {
        dispatcher_with(
            &[
                case("first", first),
                case("second", second),
                case("failing", failing),
            ],
            release_leaks,
        )
    }

    #[test]
    fn invoke_routes_to_the_registered_simulator_once() {
        let dispatcher = dispatcher_with(&[case("a", route_a), case("b", route_b)], false);

        assert_eq!(dispatcher.invoke("b").unwrap(), Outcome::Value { value: 2 });
        assert_eq!(ROUTE_A_CALLS.load(Ordering::SeqCst), 0);
        assert_eq!(ROUTE_B_CALLS.load(Ordering::SeqCst), 1);

        assert_eq!(dispatcher.invoke("a").unwrap(), Outcome::Value { value: 1 });
        assert_eq!(ROUTE_A_CALLS.load(Ordering::SeqCst), 1);
        assert_eq!(ROUTE_B_CALLS.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn release_flag_reaches_the_simulator() {
        let dispatcher = dispatcher(true);
        assert_eq!(dispatcher.invoke("second").unwrap(), Outcome::Value { value: 20 });
    }

    #[test]
    fn unknown_id_runs_nothing() {
        let dispatcher = dispatcher_with(&[case("untouched", untouched)], false);
        assert_eq!(
            dispatcher.invoke("does-not-exist").unwrap_err(),
            HarnessError::NotFound("does-not-exist".to_string())
        );
        assert_eq!(UNTOUCHED_CALLS.load(Ordering::SeqCst), 0);
        assert_eq!(dispatcher.catalog().len(), 1);
    }

    #[test]
    fn enumerate_is_stable() {
        let dispatcher = dispatcher(false);
        let ids: Vec<_> = dispatcher.enumerate().iter().map(|s| s.id).collect();
        assert_eq!(ids, vec!["first", "second", "failing"]);
        assert_eq!(dispatcher.enumerate(), dispatcher.enumerate());
    }

    #[test]
    fn repeated_invocation_is_explicit() {
        let dispatcher = dispatcher(false);
        let outcomes = dispatcher.invoke_repeated("first", 3).unwrap();
        assert_eq!(outcomes, vec![Outcome::Value { value: 1 }; 3]);
        assert!(dispatcher.invoke_repeated("first", 0).unwrap().is_empty());
    }

    #[test]
    fn repeated_unknown_id_is_not_found_before_any_round() {
        let dispatcher = dispatcher_with(&[case("untouched-repeat", untouched)], false);
        assert_eq!(
            dispatcher.invoke_repeated("does-not-exist", u32::MAX),
            Err(HarnessError::NotFound("does-not-exist".to_string()))
        );
    }

    #[test]
    fn simulator_errors_surface_as_status() {
        let dispatcher = dispatcher(false);
        let err = dispatcher.invoke_repeated("failing", 2).unwrap_err();
        assert_eq!(err.status(), -12);
    }
}
