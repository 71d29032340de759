use std::time::Duration;

use cdp_core::Timestamp;
use cdp_core::counter::RollingCounter;
use cdp_core::identity::IdentityGraph;
use divan::Bencher;

fn main() {
    divan::main();
}

#[divan::bench]
fn resolve_fresh_identifier(bencher: Bencher) {
    bencher.bench(|| {
        let graph = IdentityGraph::new();
        graph
            .canonical_id_for(&[divan::black_box("u1"), divan::black_box("a1")])
            .expect("non-empty")
    });
}

#[divan::bench]
fn resolve_already_merged_identifier(bencher: Bencher) {
    let graph = IdentityGraph::new();
    graph.union("u1", "a1");

    bencher.bench_local(|| {
        graph
            .canonical_id_for(&[divan::black_box("u1")])
            .expect("non-empty")
    });
}

#[divan::bench]
fn rolling_counter_append(bencher: Bencher) {
    let counter = RollingCounter::new(Duration::from_secs(60), Duration::from_secs(24 * 3600));
    let profile_id = "user:bench".to_string();

    bencher.bench_local(|| {
        counter.append(&profile_id, "Feature Used", Timestamp::from_secs(0));
    });
}

#[divan::bench]
fn rolling_counter_query(bencher: Bencher) {
    let counter = RollingCounter::new(Duration::from_secs(60), Duration::from_secs(24 * 3600));
    let profile_id = "user:bench".to_string();
    for i in 0..1000 {
        counter.append(&profile_id, "Feature Used", Timestamp::from_secs(i * 60));
    }

    bencher.bench_local(|| {
        counter.count(
            &profile_id,
            "Feature Used",
            Duration::from_secs(24 * 3600),
            Timestamp::from_secs(1000 * 60),
        )
    });
}
