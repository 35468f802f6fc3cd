use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, ensure};
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CaseClass {
    /// Every unit generates and evaluates.
    RunsClean,
    /// Some units fail; the session carries on past them.
    ReportsErrors,
}

#[derive(Debug, Deserialize, Clone)]
pub struct BenchConfig {
    pub enabled: bool,
    #[serde(default)]
    pub tags: Vec<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ExpectedOutcome {
    /// Exact number of failed units.
    pub failures: usize,
    pub stdout_file: String,
    /// Each non-empty line must appear somewhere in the captured stderr.
    pub stderr_contains_file: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CaseSpec {
    pub class: CaseClass,
    #[serde(default)]
    pub unsupported_backends: Vec<String>,
    pub bench: BenchConfig,
    pub expected: ExpectedOutcome,
}

#[derive(Debug, Clone)]
pub struct Case {
    pub name: String,
    pub dir: PathBuf,
    pub program_path: PathBuf,
    pub spec: CaseSpec,
}

impl Case {
    pub fn read_text(&self, relative_path: &str) -> Result<String> {
        fs::read_to_string(self.dir.join(relative_path))
            .with_context(|| format!("Reading {} fixture file {}", self.name, relative_path))
    }

    pub fn program(&self) -> Result<String> {
        fs::read_to_string(&self.program_path)
            .with_context(|| format!("Reading program for {}", self.name))
    }

    pub fn expected_stdout(&self) -> Result<String> {
        self.read_text(&self.spec.expected.stdout_file)
    }

    pub fn expected_stderr_fragments(&self) -> Result<Vec<String>> {
        let Some(file) = self.spec.expected.stderr_contains_file.as_deref() else {
            return Ok(Vec::new());
        };
        Ok(self
            .read_text(file)?
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect())
    }
}

pub fn load_cases(programs_dir: &Path) -> Result<Vec<Case>> {
    let mut cases = Vec::new();

    for entry in
        fs::read_dir(programs_dir).with_context(|| format!("Reading {}", programs_dir.display()))?
    {
        let path = entry?.path();
        if !path.is_dir() {
            continue;
        }

        let case_path = path.join("case.yaml");
        if !case_path.exists() {
            continue;
        }

        let program_path = path.join("program.ks");
        ensure!(
            program_path.exists(),
            "Missing program.ks for case {}",
            path.display()
        );

        let case_name = path
            .file_name()
            .and_then(|value| value.to_str())
            .map(str::to_string)
            .with_context(|| format!("Invalid case directory name {}", path.display()))?;
        let case_raw = fs::read_to_string(&case_path)
            .with_context(|| format!("Reading {}", case_path.display()))?;
        let spec: CaseSpec = serde_yaml::from_str(&case_raw)
            .with_context(|| format!("Parsing {}", case_path.display()))?;

        match spec.class {
            CaseClass::RunsClean => ensure!(
                spec.expected.failures == 0,
                "Case {case_name} runs clean but expects {} failures",
                spec.expected.failures
            ),
            CaseClass::ReportsErrors => ensure!(
                spec.expected.failures > 0,
                "Case {case_name} reports errors but expects none"
            ),
        }

        cases.push(Case {
            name: case_name,
            dir: path,
            program_path,
            spec,
        });
    }

    ensure!(
        !cases.is_empty(),
        "No test cases found in {}",
        programs_dir.display()
    );
    cases.sort_by(|left, right| left.name.cmp(&right.name));
    Ok(cases)
}

pub fn normalize_output(output: &str) -> String {
    output.replace("\r\n", "\n").trim_end().to_string()
}

pub fn validate_unsupported_backends(case: &Case, known_backends: &[&str]) -> Result<()> {
    for backend in &case.spec.unsupported_backends {
        ensure!(
            known_backends.contains(&backend.as_str()),
            "Case {} contains unknown unsupported backend '{}'",
            case.name,
            backend
        );
    }
    Ok(())
}

pub fn is_backend_unsupported(case: &Case, backend_name: &str) -> bool {
    case.spec
        .unsupported_backends
        .iter()
        .any(|name| name == backend_name)
}
