//! Throughput of the trigger pipeline over the built-in table.

use std::{hint::black_box, sync::Arc};

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use loan_circulation::{
    Circulation, CirculationConfig, Loan, LoanState, LoanStore, MemoryStore, Params, StaticLocator,
    TransitionRegistry,
};

/// Engine with `pending` waiting requests on item `I1`
fn engine(pending: usize) -> Option<Circulation> {
    let store = Arc::new(MemoryStore::new());
    for n in 0..pending {
        let mut waiting = Loan::new(format!("waiting-{n}"), LoanState::Pending);
        waiting.item_pid = Some("I1".to_string());
        store.persist(&waiting).ok()?;
    }
    let shared_store: Arc<dyn LoanStore> = store;
    let locator = StaticLocator::new().with_item("I1", "LibA");
    Circulation::new(CirculationConfig::default(), locator, shared_store).ok()
}

/// Loan on item `I1` in `state`
fn loan_in(state: LoanState) -> Loan {
    let mut loan = Loan::new("loan-bench", state);
    loan.item_pid = Some("I1".to_string());
    loan.pickup_location_pid = Some("LibA".to_string());
    loan
}

/// Single transitions, automatic and triggered
fn bench_single_step(c: &mut Criterion) {
    let mut group = c.benchmark_group("single_step");
    let Some(circulation) = engine(0) else { return };

    group.bench_function("request", |b| {
        let params = circulation.action("request");
        b.iter(|| {
            let mut loan = loan_in(LoanState::Created);
            black_box(circulation.trigger(&mut loan, &params).is_ok())
        });
    });

    group.bench_function("pending_to_desk", |b| {
        let params = Params::new();
        b.iter(|| {
            let mut loan = loan_in(LoanState::Pending);
            black_box(circulation.trigger(&mut loan, &params).is_ok())
        });
    });

    group.bench_function("rejected_on_terminal", |b| {
        let params = circulation.action("cancel");
        b.iter(|| {
            let mut loan = loan_in(LoanState::Cancelled);
            black_box(circulation.trigger(&mut loan, &params).is_err())
        });
    });

    group.finish();
}

/// Return decision as the pending request count grows
fn bench_return_with_queue(c: &mut Criterion) {
    let mut group = c.benchmark_group("return_with_queue");

    for pending in [0_usize, 16, 256] {
        let Some(circulation) = engine(pending) else { continue };
        group.bench_with_input(BenchmarkId::new("item_on_loan", pending), &pending, |b, _| {
            let params = Params::new().with("transaction_location_pid", "LibB");
            b.iter(|| {
                let mut loan = loan_in(LoanState::ItemOnLoan);
                black_box(circulation.trigger(&mut loan, &params).map(|l| l.state).ok())
            });
        });
    }

    group.finish();
}

/// Building the registry from configuration
fn bench_registry(c: &mut Criterion) {
    let config = CirculationConfig::default();
    c.bench_function("registry_from_config", |b| {
        b.iter(|| black_box(TransitionRegistry::from_config(black_box(&config)).is_ok()));
    });
}

criterion_group!(benches, bench_single_step, bench_return_with_queue, bench_registry);
criterion_main!(benches);
