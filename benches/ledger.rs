use std::time::Instant;

use criterion::{criterion_group, criterion_main, Criterion, Throughput};

use caseledger::{Case, CaseConfig, MethodCategory, ObjectId, Score, Significance};

fn make_case_with_content(objects: usize) -> (Case, Vec<ObjectId>) {
    let case = Case::in_memory(CaseConfig::default()).unwrap();
    let ids = case
        .transact(|tx| {
            let ds = case.content().add_data_source(tx, "bench-image", None)?;
            let mut ids = Vec::with_capacity(objects);
            for i in 0..objects {
                ids.push(case.content().add_content(tx, ds.id, &format!("file-{i}"))?.id);
            }
            Ok(ids)
        })
        .unwrap();
    (case, ids)
}

fn bench_result_added_fast_path(c: &mut Criterion) {
    let mut group = c.benchmark_group("ledger");
    group.throughput(Throughput::Elements(1));

    group.bench_function("add_result_no_change", |b| {
        // Fresh case per sample; the first result raises the score and every
        // later one hits the unchanged path.
        b.iter_custom(|iters| {
            let (case, ids) = make_case_with_content(1);
            let object = ids[0];
            let score = Score::new(Significance::LikelyNotable, MethodCategory::Auto);

            let start = Instant::now();
            for _ in 0..iters {
                let mut tx = case.begin();
                case.blackboard()
                    .add_analysis_result(&mut tx, object, "bench", score, None)
                    .unwrap();
                tx.commit().unwrap();
            }
            start.elapsed()
        });
    });

    group.bench_function("add_result_raises_score", |b| {
        b.iter_custom(|iters| {
            let objects = usize::try_from(iters).unwrap_or(usize::MAX).min(4096);
            let (case, ids) = make_case_with_content(objects);
            let score = Score::NOTABLE;

            let start = Instant::now();
            for i in 0..iters {
                let object = ids[usize::try_from(i).unwrap_or(0) % ids.len()];
                let mut tx = case.begin();
                case.blackboard()
                    .add_analysis_result(&mut tx, object, "bench", score, None)
                    .unwrap();
                tx.commit().unwrap();
            }
            start.elapsed()
        });
    });

    group.finish();
}

fn bench_score_lookup(c: &mut Criterion) {
    let (case, ids) = make_case_with_content(256);
    case.transact(|tx| {
        for object in ids.iter().step_by(2) {
            case.blackboard()
                .add_analysis_result(tx, *object, "seed", Score::LIKELY_NOTABLE, None)?;
        }
        Ok(())
    })
    .unwrap();

    c.bench_function("ledger/get_score", |b| {
        let mut i = 0usize;
        b.iter(|| {
            let object = ids[i % ids.len()];
            i += 1;
            case.scores().get(object).unwrap()
        });
    });
}

criterion_group!(benches, bench_result_added_fast_path, bench_score_lookup);
criterion_main!(benches);
