use std::hint::black_box;

use criterion::{Criterion, criterion_group, criterion_main};

use treeplex::rewrite::IdentifierRewriter;
use treeplex::sanitize::{ObjectData, sanitize_record};
use treeplex::tables::{ObjectKind, TableSet};

const SELECT: &str = "SELECT p.handle, p.given_name, p.surname, f.handle \
                      FROM person p JOIN family f ON f.father_handle = p.handle \
                      WHERE p.surname = ?1 AND p.handle IN (SELECT obj_handle FROM reference WHERE ref_class = 'note') \
                      ORDER BY p.surname LIMIT 50";

fn rewrite_benchmark(c: &mut Criterion) {
    let rewriter = IdentifierRewriter::new("smith_", TableSet::logical());
    let scoped = rewriter.rewrite(SELECT);
    let mut group = c.benchmark_group("rewrite");
    group.bench_function("select with join and subquery", |b| b.iter(|| rewriter.rewrite(black_box(SELECT))));
    group.bench_function("already scoped", |b| b.iter(|| rewriter.rewrite(black_box(&scoped))));
    group.finish();
}

fn sanitize_benchmark(c: &mut Criterion) {
    let person = ObjectData::new(ObjectKind::Person, "I0001")
        .with("gramps_id", "I0001")
        .with("given_name", "Anna")
        .with("surname", "Smith")
        .with("gender", 1)
        .with("birth_date", "abt 1850")
        .with("change", 1_700_000_000i64)
        .with("json_data", serde_json::json!({"event_ref_list": [{"ref": "E1"}]}));
    c.bench_function("sanitize person", |b| b.iter(|| sanitize_record(black_box(&person))));
}

criterion_group!(benches, rewrite_benchmark, sanitize_benchmark);
criterion_main!(benches);
