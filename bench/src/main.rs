use serde::Serialize;
use std::path::Path;
use std::time::Instant;
use tosca::{InterpreterConfig, Machine, Outcome, Program};

#[derive(Serialize)]
struct BenchmarkResult {
    name: String,
    quickened_secs: f64,
    quickened_instructions: u64,
    plain_secs: f64,
    plain_instructions: u64,
    rust_time_secs: f64,
}

#[derive(Serialize)]
struct BenchmarkOutput {
    results: Vec<BenchmarkResult>,
}

// Rust reference implementations

fn rust_sum_loop() {
    let mut sum: i64 = 0;
    for i in 1..=1_000_000 {
        sum += i;
    }
    eprintln!("{}", sum);
}

fn rust_nested_loop() {
    let mut sum: i64 = 0;
    for i in 0..500 {
        for j in 0..500 {
            sum += i * j;
        }
    }
    eprintln!("{}", sum);
}

fn rust_fibonacci(n: i32) -> i32 {
    if n <= 1 {
        n
    } else {
        rust_fibonacci(n - 1) + rust_fibonacci(n - 2)
    }
}

fn rust_points() {
    struct Point {
        x: i32,
        y: i32,
    }
    let mut sum: i64 = 0;
    for i in 0..100_000 {
        let p = Box::new(Point { x: i, y: 3 });
        sum += (p.x + p.y) as i64;
    }
    eprintln!("{}", sum);
}

fn time_rust<F>(f: F) -> f64
where
    F: FnOnce(),
{
    let start = Instant::now();
    f();
    start.elapsed().as_secs_f64()
}

/// Seconds and retired instructions of one run of `main`.
fn run_tosca_benchmark(bench_file: &str, rewrite: bool) -> (f64, u64) {
    let bench_path = format!("{}/programs/{}.toml", env!("CARGO_MANIFEST_DIR"), bench_file);
    let program = match Program::load(Path::new(&bench_path)) {
        Ok(p) => p,
        Err(e) => {
            eprintln!("Benchmark {} failed to load: {}", bench_file, e);
            return (0.0, 0);
        }
    };
    let entry = program
        .class
        .iter()
        .find_map(|c| c.method.iter().find(|m| m.name == "main").map(|m| format!("{}.main{}", c.name, m.descriptor)))
        .unwrap_or_default();

    let config = InterpreterConfig {
        rewrite_bytecodes: rewrite,
        verify_interpreter: false,
        instruction_limit: u64::MAX,
        ..Default::default()
    };

    let start = Instant::now();
    let result = Machine::new(config, &program).and_then(|mut vm| {
        let outcome = vm.invoke(&entry, &[])?;
        Ok((outcome, vm.instructions()))
    });
    let elapsed = start.elapsed().as_secs_f64();

    match result {
        Ok((Outcome::Returned(value), instructions)) => {
            eprintln!("{}", value);
            (elapsed, instructions)
        }
        Ok((Outcome::Threw { class, .. }, instructions)) => {
            eprintln!("Benchmark {} (rewrite={}) threw {}", bench_file, rewrite, class);
            (elapsed, instructions)
        }
        Err(e) => {
            eprintln!("Benchmark {} (rewrite={}) failed: {}", bench_file, rewrite, e);
            (elapsed, 0)
        }
    }
}

fn bench(name: &str, rust_time_secs: f64) -> BenchmarkResult {
    let (quickened_secs, quickened_instructions) = run_tosca_benchmark(name, true);
    let (plain_secs, plain_instructions) = run_tosca_benchmark(name, false);
    BenchmarkResult {
        name: name.to_string(),
        quickened_secs,
        quickened_instructions,
        plain_secs,
        plain_instructions,
        rust_time_secs,
    }
}

fn main() {
    let results = vec![
        bench("sum_loop", time_rust(rust_sum_loop)),
        bench("nested_loop", time_rust(rust_nested_loop)),
        bench("fibonacci", time_rust(|| eprintln!("{}", rust_fibonacci(25)))),
        bench("points", time_rust(rust_points)),
    ];

    let output = BenchmarkOutput { results };
    match serde_json::to_string_pretty(&output) {
        Ok(json) => println!("{}", json),
        Err(e) => eprintln!("failed to serialize results: {}", e),
    }
}
