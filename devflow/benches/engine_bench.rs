//! Benchmarks for engine runs.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use devflow::prelude::*;
use devflow::testing::ScriptedStage;

fn linear_engine(stages: usize) -> WorkflowEngine {
    (0..stages)
        .fold(WorkflowEngine::builder(), |builder, i| {
            builder.stage(Arc::new(FnStage::new(format!("stage_{i}"), |ctx| {
                let n = ctx.get("n").and_then(|v| v.as_u64()).unwrap_or(0);
                ctx.set("n", json!(n + 1))?;
                Ok(StageResult::success_empty())
            })))
        })
        .build()
        .unwrap()
}

fn retrying_engine() -> WorkflowEngine {
    WorkflowEngine::builder()
        .stage(Arc::new(
            ScriptedStage::failing("flaky", "x").then_fail("x").then_succeed(),
        ))
        .intervention_handler(Arc::new(AutoRetryHandler::new()))
        .max_iterations(5)
        .build()
        .unwrap()
}

fn engine_benchmark(c: &mut Criterion) {
    let engine = linear_engine(10);
    c.bench_function("run_10_stages", |b| {
        b.iter(|| black_box(tokio_test::block_on(engine.run(json!({})))))
    });

    c.bench_function("run_with_retries", |b| {
        b.iter(|| {
            let engine = retrying_engine();
            black_box(tokio_test::block_on(engine.run(json!({}))))
        })
    });
}

criterion_group!(benches, engine_benchmark);
criterion_main!(benches);
