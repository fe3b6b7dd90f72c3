// Analyzer, classifier and fixer throughput on generated Flex sources
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use flexguard::{classify, fix_critical_loop_defects, Analyzer};
use std::hint::black_box;

const BLOCKS: &[&str] = &[
    "dorg values = [1, 2, 3, 4, 5]\nkarr i=0 l7d length(values) - 1 {\n    etb3(values[i])\n}\n",
    "dorg values = [1, 2, 3]\nkarr i=0 l7d length(values) {\n    etb3(values[i])\n}\n",
    "// halve when possible\nlw total != 0 {\n    rakm half = total / 2\n}\n",
    "sndo2 greet(name) {\n    etb3(\"hello \" + name)\n}\n",
    "rakm count = da5l()\nkarr i=0 l7d 3 { etb3(numbers[i]) }\n",
];

fn generate_source(block_count: usize) -> String {
    (0..block_count)
        .map(|i| BLOCKS[i % BLOCKS.len()])
        .collect()
}

fn benchmark_analyze(c: &mut Criterion) {
    let mut group = c.benchmark_group("analyze");
    let analyzer = Analyzer::default();

    for block_count in [10, 100, 1000].iter() {
        let source = generate_source(*block_count);
        group.bench_with_input(
            BenchmarkId::new("blocks", block_count),
            &source,
            |b, source| {
                b.iter(|| black_box(analyzer.analyze(black_box(source))));
            },
        );
    }

    group.finish();
}

fn benchmark_classify(c: &mut Criterion) {
    let source = generate_source(500);
    c.bench_function("classify_500_blocks", |b| {
        b.iter(|| black_box(classify(black_box(&source))));
    });
}

fn benchmark_fix(c: &mut Criterion) {
    let mut group = c.benchmark_group("fix_critical_loop_defects");

    for block_count in [10, 1000].iter() {
        let source = generate_source(*block_count);
        group.bench_with_input(
            BenchmarkId::new("blocks", block_count),
            &source,
            |b, source| {
                b.iter(|| black_box(fix_critical_loop_defects(black_box(source))));
            },
        );
    }

    group.finish();
}

criterion_group!(benches, benchmark_analyze, benchmark_classify, benchmark_fix);
criterion_main!(benches);
