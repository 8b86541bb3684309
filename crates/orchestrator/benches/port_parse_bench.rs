//! 포트 매핑 해석 벤치마크
//!
//! CLI 텍스트 출력 해석과 계획 대조 성능을 측정합니다.

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use vslab_orchestrator::plan::PortPlan;
use vslab_orchestrator::ports::{parse_port_binding_line, parse_port_lines};

const SAMPLE_OUTPUT: &str = "3000/tcp -> 0.0.0.0:32768\n\
                             3000/tcp -> [::]:32768\n\
                             4000/tcp -> 0.0.0.0:32769\n\
                             4000/tcp -> [::]:32769\n\
                             5000/tcp -> 0.0.0.0:32770\n\
                             5000/tcp -> [::]:32770\n";

fn build_output(entries: usize) -> String {
    (0..entries)
        .map(|i| format!("{}/tcp -> 0.0.0.0:{}\n", 1000 + i, 30000 + i))
        .collect()
}

fn bench_single_line(c: &mut Criterion) {
    let mut group = c.benchmark_group("port_line");
    group.throughput(Throughput::Elements(1));

    group.bench_function("ipv4", |b| {
        b.iter(|| parse_port_binding_line(black_box("3000/tcp -> 0.0.0.0:32768")))
    });
    group.bench_function("ipv6", |b| {
        b.iter(|| parse_port_binding_line(black_box("3000/tcp -> [::]:32768")))
    });
    group.bench_function("udp_rejected", |b| {
        b.iter(|| parse_port_binding_line(black_box("53/udp -> 0.0.0.0:5353")))
    });

    group.finish();
}

fn bench_full_output(c: &mut Criterion) {
    let plan = PortPlan::default();
    let mut group = c.benchmark_group("port_output");
    group.throughput(Throughput::Elements(6));

    group.bench_function("parse_dual_stack", |b| {
        b.iter(|| parse_port_lines(black_box(SAMPLE_OUTPUT)))
    });
    group.bench_function("parse_and_resolve", |b| {
        b.iter(|| plan.resolve(&parse_port_lines(black_box(SAMPLE_OUTPUT))))
    });

    group.finish();
}

fn bench_output_scaling(c: &mut Criterion) {
    let mut group = c.benchmark_group("port_output_scaling");

    for entries in [3usize, 32, 256] {
        let output = build_output(entries);
        group.throughput(Throughput::Elements(entries as u64));
        group.bench_with_input(BenchmarkId::from_parameter(entries), &output, |b, output| {
            b.iter(|| parse_port_lines(black_box(output)))
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_single_line,
    bench_full_output,
    bench_output_scaling
);
criterion_main!(benches);
