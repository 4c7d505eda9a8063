use std::hint::black_box;
use std::io::Write;
use std::sync::Arc;
use std::thread;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use crossbeam_channel::bounded;

use csvflow::{
    CancelToken, Pipeline, PipelineOptions, PoolConfig, ReaderConfig, Record, RecordValidator,
    WorkerPool,
};

const RECORDS: usize = 10_000;

fn records() -> Vec<Record> {
    let header = Arc::new(vec!["id".to_string(), "name".to_string(), "value".to_string()]);
    (0..RECORDS)
        .map(|i| {
            Record::new(
                i + 2,
                "bench.csv",
                vec![i.to_string(), format!("name_{}", i), (i % 97).to_string()],
                Some(Arc::clone(&header)),
            )
        })
        .collect()
}

fn bench_pool_workers(c: &mut Criterion) {
    let input = records();
    let mut group = c.benchmark_group("pool_workers");
    group.throughput(Throughput::Elements(RECORDS as u64));

    for workers in [1, 2, 4, 8] {
        group.bench_with_input(BenchmarkId::from_parameter(workers), &workers, |b, &workers| {
            b.iter(|| {
                let (tx, rx) = bounded(256);
                let pool = WorkerPool::new(
                    PoolConfig::with_workers(workers),
                    Arc::new(RecordValidator),
                    rx,
                    CancelToken::new(),
                );
                pool.start().unwrap();

                let records = input.clone();
                let feeder = thread::spawn(move || {
                    for record in records {
                        if tx.send(record).is_err() {
                            break;
                        }
                    }
                });

                let mut seen = 0usize;
                for result in pool.results() {
                    black_box(&result);
                    seen += 1;
                }
                feeder.join().unwrap();
                pool.wait();
                assert_eq!(seen, RECORDS);
            });
        });
    }
    group.finish();
}

fn bench_pipeline_end_to_end(c: &mut Criterion) {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("bench.csv");
    let mut file = std::fs::File::create(&path).unwrap();
    writeln!(file, "id,name,value").unwrap();
    for i in 0..RECORDS {
        writeln!(file, "{},name_{},{}", i, i, i % 97).unwrap();
    }
    drop(file);

    let mut group = c.benchmark_group("pipeline");
    group.throughput(Throughput::Elements(RECORDS as u64));
    group.bench_function("single_file_4_workers", |b| {
        b.iter(|| {
            let pipeline = Pipeline::new(
                PipelineOptions {
                    reader: ReaderConfig {
                        sources: vec![path.clone()],
                        ..Default::default()
                    },
                    pool: PoolConfig::with_workers(4),
                    ..Default::default()
                },
                Arc::new(RecordValidator),
            );
            pipeline.run().unwrap();
            black_box(pipeline.summary().total);
        });
    });
    group.finish();
}

criterion_group!(pool_benches, bench_pool_workers, bench_pipeline_end_to_end);
criterion_main!(pool_benches);
