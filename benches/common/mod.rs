#![allow(dead_code)]
use std::fs;
use std::path::{Path, PathBuf};

use test_support::load_cases;

/// Fixture programs whose `case.yaml` enables benchmarking.
pub fn workloads() -> Vec<(String, PathBuf)> {
    load_cases(Path::new("tests/programs"))
        .unwrap_or_else(|err| panic!("load fixture cases: {err:#}"))
        .into_iter()
        .filter(|case| case.spec.bench.enabled)
        .map(|case| (case.name, case.program_path))
        .collect()
}

pub fn load_source(path: &Path) -> String {
    fs::read_to_string(path).unwrap_or_else(|err| panic!("read {}: {err}", path.display()))
}

/// A chain of `depth` functions, each calling the previous one twice, and a
/// nullary `work()` entry point.
pub fn call_chain(depth: usize) -> String {
    let mut source = String::from("def f0(x) x * x - 1;\n");
    for level in 1..depth {
        let prev = level - 1;
        source.push_str(&format!(
            "def f{level}(x) f{prev}(x) + f{prev}(x + 1) * 0.5 < 1000;\n"
        ));
    }
    source.push_str(&format!("def work() f{}(3);\nwork();\n", depth - 1));
    source
}
