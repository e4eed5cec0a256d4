use std::hint::black_box;

use bytes::BytesMut;
use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};

use mapi_stream::{
    MapiStream, backend, escape, frontend,
    response::{parse_tuple, unescape},
};

fn bench_put_query(c: &mut Criterion) {
    let mut group = c.benchmark_group("put_query");

    let long = format!("SELECT '{}'", "x".repeat(20_000));
    let queries = vec![
        ("short", "SELECT 1".to_string()),
        (
            "medium",
            "SELECT * FROM users WHERE id = 1 AND status = 'active'".to_string(),
        ),
        ("multi_packet", long),
    ];

    for (name, query) in &queries {
        group.bench_with_input(BenchmarkId::from_parameter(name), query, |b, query| {
            b.iter(|| {
                let stream = Vec::<u8>::new();
                let mut mapi_stream = MapiStream::from_stream(stream);
                mapi_stream.put_query(black_box(query));
            });
        });
    }

    group.finish();
}

fn bench_put_execute(c: &mut Criterion) {
    let mut group = c.benchmark_group("put_execute");

    group.bench_function("three_args", |b| {
        b.iter(|| {
            let stream = Vec::<u8>::new();
            let mut mapi_stream = MapiStream::from_stream(stream);
            mapi_stream.put_execute(black_box(12), black_box("42, 'John Doe', true"));
        });
    });

    group.bench_function("command", |b| {
        b.iter(|| {
            let stream = Vec::<u8>::new();
            let mut mapi_stream = MapiStream::from_stream(stream);
            mapi_stream.put_command(black_box("export 3 200 200"));
        });
    });

    group.finish();
}

fn bench_read_message(c: &mut Criterion) {
    let mut group = c.benchmark_group("read_message");

    for size in [0usize, 100, 1024, 10 * 1024, 100 * 1024] {
        let mut framed = BytesMut::new();
        frontend::frame(&mut framed, &vec![b'x'; size]);
        group.bench_with_input(BenchmarkId::from_parameter(size), &framed, |b, framed| {
            b.iter(|| backend::read_message_blocking(black_box(&framed[..])).unwrap());
        });
    }

    group.finish();
}

fn bench_parse_tuple(c: &mut Criterion) {
    let mut group = c.benchmark_group("parse_tuple");

    let tuples = vec![
        ("one_int", "[ 1\t]".to_string()),
        (
            "mixed",
            "[ 42,\t\"John Doe\",\tNULL,\t3.14,\ttrue,\t\"2024-01-01 12:00:00.000000\"\t]"
                .to_string(),
        ),
        (
            "escaped",
            format!("[ \"{}\"\t]", escape(&"tab\tnewline\n'quote' \\ ".repeat(20))),
        ),
    ];

    for (name, tuple) in &tuples {
        group.bench_with_input(BenchmarkId::from_parameter(name), tuple, |b, tuple| {
            b.iter(|| parse_tuple(black_box(tuple)).unwrap());
        });
    }

    group.finish();
}

fn bench_escape(c: &mut Criterion) {
    let mut group = c.benchmark_group("escape");

    let plain = "The quick brown fox jumps over the lazy dog".repeat(10);
    let special = "it's a \\path\\ with\ttabs\nand lines".repeat(10);

    group.bench_function("escape_plain", |b| b.iter(|| escape(black_box(&plain))));
    group.bench_function("escape_special", |b| b.iter(|| escape(black_box(&special))));

    let escaped = escape(&special);
    group.bench_function("unescape", |b| {
        b.iter(|| unescape(black_box(&escaped)).unwrap())
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_put_query,
    bench_put_execute,
    bench_read_message,
    bench_parse_tuple,
    bench_escape,
);
criterion_main!(benches);
