use serde::Serialize;
use std::time::Instant;

use nacre::codegen::codebuf::CodeBuffer;
use nacre::codegen::emit::RecordingEmitter;
use nacre::codegen::helpers::HelperRequest;
use nacre::codegen::symbols::{FixedResolver, MethodRef, TypeRef};
use nacre::codegen::x64::X64Emitter;
use nacre::runtime::stubs::StubHeap;
use nacre::{CompilationPass, TargetOs, TargetRegisterMap};

const ITERATIONS: usize = 100_000;

#[derive(Serialize)]
struct BenchmarkResult {
    name: String,
    iterations: usize,
    record_secs: f64,
    encode_secs: f64,
}

#[derive(Serialize)]
struct BenchmarkOutput {
    results: Vec<BenchmarkResult>,
    stub_heap_secs: f64,
    stub_heap_stubs: usize,
}

fn requests() -> Vec<(&'static str, HelperRequest)> {
    let ty = TypeRef(1);
    let lazy = TypeRef(2);
    let method = MethodRef(1);
    vec![
        ("new_object", HelperRequest::NewObject { ty }),
        ("new_array", HelperRequest::NewArray { ty }),
        ("cast_class", HelperRequest::CastClass { ty }),
        ("virtual_call", HelperRequest::VirtualCall { method }),
        ("non_gc_static_base", HelperRequest::GetNonGcStaticBase { ty }),
        ("lazy_non_gc_static_base", HelperRequest::GetNonGcStaticBase { ty: lazy }),
        ("thread_static_base", HelperRequest::GetThreadStaticBase { ty }),
        ("resolve_gvm", HelperRequest::ResolveGenericVirtualMethod { method }),
    ]
}

fn bench_request(name: &str, request: &HelperRequest) -> BenchmarkResult {
    let regs = TargetRegisterMap::for_os(TargetOs::Linux);
    let resolver = FixedResolver::new()
        .with_lazy_initializer(TypeRef(2))
        .with_vtable_slot(MethodRef(1), 3);

    let start = Instant::now();
    for _ in 0..ITERATIONS {
        let mut rec = RecordingEmitter::new();
        request.emit(CompilationPass::Final, &regs, &resolver, &mut rec);
        std::hint::black_box(rec.ops().len());
    }
    let record_secs = start.elapsed().as_secs_f64();

    let start = Instant::now();
    for _ in 0..ITERATIONS {
        let mut buf = CodeBuffer::with_capacity(64);
        let mut asm = X64Emitter::new(&mut buf);
        request.emit(CompilationPass::Final, &regs, &resolver, &mut asm);
        std::hint::black_box(buf.len());
    }
    let encode_secs = start.elapsed().as_secs_f64();

    BenchmarkResult {
        name: name.to_string(),
        iterations: ITERATIONS,
        record_secs,
        encode_secs,
    }
}

fn bench_stub_heap() -> (f64, usize) {
    let mut heap = StubHeap::new(1 << 20).expect("stub heap allocation failed");
    let target = heap.base() as usize;
    let mut made = 0;

    let start = Instant::now();
    while let Ok(stub) = heap.jump_stub(target) {
        std::hint::black_box(stub);
        made += 1;
    }
    (start.elapsed().as_secs_f64(), made)
}

fn main() {
    let mut results = Vec::new();
    for (name, request) in requests() {
        results.push(bench_request(name, &request));
    }

    let (stub_heap_secs, stub_heap_stubs) = bench_stub_heap();

    let output = BenchmarkOutput {
        results,
        stub_heap_secs,
        stub_heap_stubs,
    };
    println!("{}", serde_json::to_string_pretty(&output).unwrap());
}
