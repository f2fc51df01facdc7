use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use jsonshape::{FieldSpec, Mapper, ScalarKind, Shape};

#[derive(Debug, Default, Clone, PartialEq)]
struct Person {
    name: String,
    age: i32,
}

fn person_shape() -> Shape {
    Shape::object::<Person>(vec![
        FieldSpec::required(
            "name",
            Shape::string(),
            |p: &mut Person, v| p.name = v,
            |p: &Person| &p.name,
        ),
        FieldSpec::required(
            "age",
            Shape::scalar(ScalarKind::I32),
            |p: &mut Person, v| p.age = v,
            |p: &Person| &p.age,
        ),
    ])
}

fn corpus(count: usize) -> String {
    let items: Vec<String> = (0..count)
        .map(|n| format!(r#"{{"name":"person-{n}","age":{}}}"#, n % 120))
        .collect();
    format!("[{}]", items.join(","))
}

fn bench_parse(c: &mut Criterion) {
    let mapper = Mapper::new();
    let shape = Shape::list_of::<Person>(person_shape());
    let plan = mapper.parser_for(&shape).unwrap();
    let json = corpus(1000);

    let mut group = c.benchmark_group("parse");
    group.throughput(Throughput::Bytes(json.len() as u64));
    group.bench_function("person_list_1000", |b| {
        b.iter(|| plan.parse_bytes(black_box(json.as_bytes())).unwrap());
    });
    group.bench_function("person_list_1000_chunked_4k", |b| {
        b.iter(|| {
            let mut session = plan.start();
            for chunk in json.as_bytes().chunks(4096) {
                session.feed(black_box(chunk)).unwrap();
            }
            session.end().unwrap()
        });
    });
    group.finish();
}

fn bench_write(c: &mut Criterion) {
    let mapper = Mapper::new();
    let shape = Shape::list_of::<Person>(person_shape());
    let json = corpus(1000);
    let list: Vec<Person> = mapper.read_str(&shape, &json).unwrap();
    let plan = mapper.writer_for(&shape).unwrap();

    let mut group = c.benchmark_group("write");
    group.throughput(Throughput::Bytes(json.len() as u64));
    group.bench_function("person_list_1000", |b| {
        b.iter(|| plan.write_bytes(black_box(&list)).unwrap());
    });
    group.finish();
}

criterion_group!(benches, bench_parse, bench_write);
criterion_main!(benches);
