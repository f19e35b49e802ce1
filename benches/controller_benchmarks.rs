//! Controller resolution benchmarks

use armature_rhai_mvc::{
    EngineConfig, HttpRequest, PhysicalPathProvider, RequestContext, RouteData, ScriptMvc,
    resolve_method_name,
};
use criterion::{Criterion, Throughput, criterion_group, criterion_main};
use std::collections::BTreeSet;
use std::fs;
use std::hint::black_box;
use std::sync::Arc;

fn naming_benchmark(c: &mut Criterion) {
    let members: BTreeSet<String> = ["Index", "ShowAll", "edit_item", "action_filters"]
        .iter()
        .map(|m| m.to_string())
        .collect();

    let mut group = c.benchmark_group("naming");
    group.throughput(Throughput::Elements(1));

    group.bench_function("pascal_hit", |b| {
        b.iter(|| resolve_method_name(black_box("show_all"), &members));
    });

    group.bench_function("snake_hit", |b| {
        b.iter(|| resolve_method_name(black_box("EditItem"), &members));
    });

    group.bench_function("miss", |b| {
        b.iter(|| resolve_method_name(black_box("missing_action"), &members));
    });

    group.finish();
}

fn controller_benchmark(c: &mut Criterion) {
    let temp = tempfile::TempDir::new().unwrap();
    let dir = temp.path().join("Controllers");
    fs::create_dir_all(&dir).unwrap();
    fs::write(
        dir.join("HomeController.rhai"),
        r#"
        fn action_filters() { #{ index: ["greet"] } }
        fn greet(ctx) { ctx.write("hi "); }
        fn index() { "home" }
        "#,
    )
    .unwrap();

    let mvc = ScriptMvc::initialize(
        EngineConfig::default(),
        Arc::new(PhysicalPathProvider::new(temp.path())),
        None,
    )
    .unwrap();
    let factory = mvc.factory();
    let context = RequestContext::new(
        HttpRequest::new("GET", "/home/index"),
        RouteData::new().with("controller", "home").with("action", "index"),
    );

    let mut group = c.benchmark_group("controller");
    group.throughput(Throughput::Elements(1));

    group.bench_function("create_cached", |b| {
        b.iter(|| {
            factory
                .create_script_controller(black_box(&context), "home")
                .unwrap()
        });
    });

    group.bench_function("create_and_execute", |b| {
        b.iter(|| {
            let mut controller = factory.create_script_controller(&context, "home").unwrap();
            controller.run_action("index", black_box(&context)).unwrap()
        });
    });

    group.finish();
}

criterion_group!(benches, naming_benchmark, controller_benchmark);
criterion_main!(benches);
