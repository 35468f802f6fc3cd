mod common;

use std::io;

use criterion::{BatchSize, Criterion, black_box, criterion_group, criterion_main};
use kscope::ast::Item;
use kscope::backend::jit::{JitBackend, OptLevel};
use kscope::backend::vm::VmBackend;
use kscope::backend::{Backend, Executor};
use kscope::codegen::Codegen;
use kscope::driver::{Options, run_source};
use kscope::parser;
use kscope::precedence::OperatorTable;

const QUIET: Options = Options {
    emit_ir: false,
    print_ast: false,
    prompt: false,
};

/// Generates every unit of `source` and returns the handle of `work`.
fn prepare<B: Backend>(backend: B, source: &str) -> (Codegen<B>, B::Function) {
    let items = parser::parse(source, &OperatorTable::standard()).expect("parse");
    let mut codegen = Codegen::new(backend);
    for item in &items {
        if let Item::Definition(function) = item {
            codegen.define(function).expect("define");
        }
    }
    let work = codegen.backend().lookup("work").expect("work() defined");
    (codegen, work)
}

fn bench_backend<B, F>(c: &mut Criterion, name: &str, make_backend: F)
where
    B: Executor,
    F: Fn() -> B,
{
    let chain = common::call_chain(12);

    for (label, path) in common::workloads() {
        let source = common::load_source(&path);
        c.bench_function(&format!("backend_{name}_session_{label}"), |b| {
            b.iter_batched(
                &make_backend,
                |backend| {
                    let summary =
                        run_source(black_box(&source), backend, QUIET, io::sink(), io::sink())
                            .expect("run");
                    black_box(summary);
                },
                BatchSize::SmallInput,
            )
        });
    }

    c.bench_function(&format!("backend_{name}_compile_call_chain"), |b| {
        b.iter_batched(
            &make_backend,
            |backend| black_box(prepare(backend, black_box(&chain))),
            BatchSize::SmallInput,
        )
    });

    c.bench_function(&format!("backend_{name}_execute_call_chain"), |b| {
        let (mut codegen, work) = prepare(make_backend(), &chain);
        b.iter(|| {
            let value = codegen.backend_mut().execute(black_box(work)).expect("execute");
            black_box(value);
        })
    });
}

fn bench_backends(c: &mut Criterion) {
    bench_backend(c, "vm", VmBackend::new);
    bench_backend(c, "jit", || JitBackend::new(OptLevel::Speed).expect("jit"));
    bench_backend(c, "jit_unoptimized", || {
        JitBackend::new(OptLevel::None).expect("jit")
    });
}

criterion_group!(benches, bench_backends);
criterion_main!(benches);
