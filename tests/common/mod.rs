// tests/common/mod.rs
// Shared fixtures and helpers for integration tests
#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};
use tempfile::TempDir;

/// Writes CSV fixtures into a temporary directory that lives as long as the
/// generator.
pub struct Fixtures {
    dir: TempDir,
}

impl Fixtures {
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().expect("Failed to create temp dir"),
        }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn write(&self, name: &str, content: &str) -> PathBuf {
        let path = self.dir.path().join(name);
        fs::write(&path, content).expect("Failed to write fixture");
        path
    }

    /// `id,name,value` header plus `rows` valid rows.
    pub fn simple(&self, name: &str, rows: usize) -> PathBuf {
        let mut csv = String::from("id,name,value\n");
        for i in 1..=rows {
            csv.push_str(&format!("{},name_{},{}\n", i, i, (i * 37) % 1000));
        }
        self.write(name, &csv)
    }

    /// `id,name,age,email` rows where every `every`-th row is malformed,
    /// alternating between a missing and an extra field.
    pub fn with_errors(&self, name: &str, rows: usize, every: usize) -> PathBuf {
        let mut csv = String::from("id,name,age,email\n");
        for i in 1..=rows {
            if every > 0 && i % every == 0 {
                if (i / every) % 2 == 0 {
                    csv.push_str(&format!("{},name_{}\n", i, i));
                } else {
                    csv.push_str(&format!(
                        "{},name_{},{},user{}@example.com,extra\n",
                        i,
                        i,
                        20 + i % 50,
                        i
                    ));
                }
            } else {
                csv.push_str(&format!(
                    "{},name_{},{},user{}@example.com\n",
                    i,
                    i,
                    20 + i % 50,
                    i
                ));
            }
        }
        self.write(name, &csv)
    }

    /// `count` simple files named `file_<n>.csv`.
    pub fn multiple(&self, count: usize, rows_each: usize) -> Vec<PathBuf> {
        (1..=count)
            .map(|n| self.simple(&format!("file_{}.csv", n), rows_each))
            .collect()
    }

    /// Two files whose headers differ in their last column.
    pub fn different_headers(&self) -> (PathBuf, PathBuf) {
        let first = self.write("first.csv", "id,name,value\n1,a,10\n2,b,20\n");
        let second = self.write("second.csv", "id,name,amount\n3,c,30\n4,d,40\n");
        (first, second)
    }

    pub fn empty(&self, name: &str) -> PathBuf {
        self.write(name, "")
    }

    pub fn header_only(&self, name: &str) -> PathBuf {
        self.write(name, "id,name,value\n")
    }
}

pub fn csvflow_binary() -> &'static str {
    env!("CARGO_BIN_EXE_csvflow")
}

/// Run the binary with config files ignored. Returns (stdout, stderr, code).
pub fn run_csvflow(args: &[&str]) -> (String, String, i32) {
    let output = csvflow_command(args)
        .output()
        .expect("Failed to execute csvflow");
    split_output(output)
}

pub fn csvflow_command(args: &[&str]) -> Command {
    let mut cmd = Command::new(csvflow_binary());
    cmd.arg("--ignore-config")
        .args(args)
        .env_remove("CSVFLOW_LOG")
        .env_remove("RUST_LOG")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    cmd
}

pub fn split_output(output: Output) -> (String, String, i32) {
    (
        String::from_utf8_lossy(&output.stdout).to_string(),
        String::from_utf8_lossy(&output.stderr).to_string(),
        output.status.code().unwrap_or(-1),
    )
}

pub fn path_str(path: &Path) -> &str {
    path.to_str().expect("Fixture path is not UTF-8")
}
