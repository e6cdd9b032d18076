//! Shared test helpers for integration tests
//!
//! This module provides common utilities used across all test files.

#![allow(dead_code)]

use std::path::PathBuf;

use assert_cmd::cargo;
use assert_cmd::Command;
use rust_decimal::Decimal;
use tempfile::TempDir;

use tbom::core::config::Config;
use tbom::engine::BomEngine;
use tbom::entities::{BomLine, NewLine, NewPart, Part, PartType};

/// Helper to get a tbom command
pub fn tbom() -> Command {
    Command::new(cargo::cargo_bin!("tbom"))
}

/// A temporary database directory for CLI runs
pub struct TestDb {
    pub dir: TempDir,
    pub path: PathBuf,
}

impl TestDb {
    /// A tbom command pointed at this database with a fixed author
    pub fn cmd(&self) -> Command {
        let mut cmd = tbom();
        cmd.env_remove("TBOM_CONFIG")
            .env_remove("RUST_LOG")
            .env("TBOM_DB", &self.path)
            .env("TBOM_AUTHOR", "tester")
            .current_dir(self.dir.path());
        cmd
    }
}

/// Helper to create an initialized database in a temp directory
pub fn setup_test_db() -> TestDb {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("bom.db");
    let db = TestDb { dir, path };
    db.cmd().arg("init").assert().success();
    db
}

/// Helper to create a part through the CLI and return its id
pub fn create_test_part(db: &TestDb, sku: &str, part_type: &str, cost: Option<&str>) -> String {
    let mut cmd = db.cmd();
    cmd.args(["--format", "id", "part", "new", sku, "--name", sku, "--type", part_type]);
    if let Some(cost) = cost {
        cmd.args(["--cost", cost]);
    }
    let output = cmd.output().unwrap();
    assert!(
        output.status.success(),
        "part new failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

/// Helper to add a line through the CLI and return its id
pub fn create_test_line(db: &TestDb, parent: &str, child: &str, qty: &str) -> String {
    let output = db
        .cmd()
        .args(["--format", "id", "line", "add", parent, child, "--qty", qty])
        .output()
        .unwrap();
    assert!(
        output.status.success(),
        "line add failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

// ============================================================================
// Library helpers
// ============================================================================

/// In-memory engine with a fixed author
pub fn memory_engine() -> BomEngine {
    tbom::core::logging::init_test();
    let mut config = Config::for_database(":memory:");
    config.author = "tester".to_string();
    BomEngine::open_in_memory(config).unwrap()
}

/// File-backed engine in `dir`
pub fn file_engine(dir: &TempDir) -> BomEngine {
    let mut config = Config::for_database(dir.path().join("bom.db"));
    config.author = "tester".to_string();
    BomEngine::open(config).unwrap()
}

pub fn part(engine: &mut BomEngine, sku: &str, part_type: PartType, cost: Option<i64>) -> Part {
    let mut new = NewPart::new(sku, sku, part_type);
    if let Some(cost) = cost {
        new = new.with_cost(Decimal::from(cost));
    }
    engine.create_part(new).unwrap()
}

pub fn link(engine: &mut BomEngine, parent: &Part, child: &Part, qty: i64, scrap: i64) -> BomLine {
    engine
        .add_line(NewLine::new(
            parent.id,
            child.id,
            Decimal::from(qty),
            Decimal::from(scrap),
            child.uom.clone(),
        ))
        .unwrap()
}
