use assert_cmd::cargo::cargo_bin_cmd;
use folio_core::PipelineConfig;
use predicates::prelude::*;
use serde_json::Value;
use std::io::Write;

const ENV_VARS: [&str; 6] = [
    "FOLIO_MAX_ENTRIES",
    "FOLIO_MAX_COST_MB",
    "FOLIO_MAX_CONCURRENT_RENDERS",
    "FOLIO_BATCH_CHUNK_SIZE",
    "FOLIO_PREVIEW_MAX_DIMENSION",
    "FOLIO_EXPORT_MAX_DIMENSION",
];

fn folio() -> assert_cmd::Command {
    let mut cmd = cargo_bin_cmd!("folio-cli");
    for var in ENV_VARS {
        cmd.env_remove(var);
    }
    cmd
}

fn json_lines(stdout: &[u8]) -> Vec<Value> {
    String::from_utf8_lossy(stdout)
        .lines()
        .map(|line| serde_json::from_str(line).expect("every stdout line should be json"))
        .collect()
}

fn batch_lines(args: &[&str]) -> Vec<Value> {
    let output = folio().arg("batch").args(args).assert().success().get_output().stdout.clone();
    json_lines(&output)
}

#[test]
fn version_prints_package_version() {
    folio()
        .arg("version")
        .assert()
        .success()
        .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn config_emits_stable_json_contract() {
    let output = folio().arg("config").assert().success().get_output().stdout.clone();

    let config: PipelineConfig =
        serde_json::from_slice(&output).expect("stdout should contain valid json");

    insta::assert_json_snapshot!(config, @r###"
    {
      "cache": {
        "max_entries": 50,
        "max_cost_bytes": 209715200
      },
      "scheduler": {
        "max_concurrent_renders": 3
      },
      "batch_chunk_size": 10,
      "preview_max_dimension": 512,
      "export_max_dimension": 2048,
      "flush_level": "critical"
    }
    "###);
}

#[test]
fn config_file_and_env_are_applied() {
    let mut file = tempfile::NamedTempFile::new().expect("temp file should be created");
    write!(file, r#"{{ "batch_chunk_size": 5, "cache": {{ "max_entries": 9 }} }}"#).unwrap();

    folio()
        .arg("config")
        .arg("--config")
        .arg(file.path())
        .env("FOLIO_MAX_CONCURRENT_RENDERS", "7")
        .assert()
        .success()
        .stdout(predicate::str::contains(r#""batch_chunk_size": 5"#))
        .stdout(predicate::str::contains(r#""max_entries": 9"#))
        .stdout(predicate::str::contains(r#""max_concurrent_renders": 7"#));
}

#[test]
fn config_fails_for_malformed_file() {
    let mut file = tempfile::NamedTempFile::new().expect("temp file should be created");
    write!(file, "{{ not json").unwrap();

    folio()
        .arg("config")
        .arg("--config")
        .arg(file.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("failed to load configuration"));
}

#[test]
fn config_fails_for_zero_limits() {
    folio()
        .arg("config")
        .env("FOLIO_BATCH_CHUNK_SIZE", "0")
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid configuration"));
}

#[test]
fn config_fails_for_cost_limit_overflow() {
    folio()
        .arg("config")
        .env("FOLIO_MAX_COST_MB", usize::MAX.to_string())
        .assert()
        .failure()
        .stderr(predicate::str::contains("FOLIO_MAX_COST_MB"))
        .stderr(predicate::str::contains("panicked").not());
}

#[test]
fn render_writes_png_file() {
    let temp = tempfile::tempdir().expect("temp dir should be created");
    let output_path = temp.path().join("nested").join("page.png");

    folio()
        .arg("render")
        .arg("--pages")
        .arg("3")
        .arg("--page")
        .arg("2")
        .arg("--output")
        .arg(&output_path)
        .assert()
        .success()
        .stdout(predicate::str::contains("page.png"));

    let image = image::open(&output_path).expect("output should be a readable image");
    assert_eq!((image.width(), image.height()), (396, 512));
}

#[test]
fn render_respects_preview_dimension_override() {
    let temp = tempfile::tempdir().expect("temp dir should be created");
    let output_path = temp.path().join("small.png");

    folio()
        .arg("render")
        .arg("--output")
        .arg(&output_path)
        .env("FOLIO_PREVIEW_MAX_DIMENSION", "100")
        .assert()
        .success();

    let image = image::open(&output_path).expect("output should be a readable image");
    assert_eq!(image.height(), 100);
}

#[test]
fn render_fails_for_page_out_of_range() {
    folio()
        .arg("render")
        .arg("--pages")
        .arg("2")
        .arg("--page")
        .arg("2")
        .assert()
        .failure()
        .stderr(predicate::str::contains("out of range"));
}

#[test]
fn batch_prints_progress_then_summary() {
    let lines = batch_lines(&["--pages", "25", "--chunk", "10"]);

    let progress: Vec<f64> = lines
        .iter()
        .filter(|line| line["event"] == "progress")
        .map(|line| line["completed"].as_f64().unwrap())
        .collect();
    assert_eq!(progress, vec![0.4, 0.8, 1.0]);

    let summary = lines.last().expect("summary line");
    assert_eq!(summary["event"], "summary");
    assert_eq!(summary["total"], 25);
    assert_eq!(summary["succeeded"], 25);
    assert_eq!(summary["failed"], 0);
    assert_eq!(summary["cancelled"], false);
    assert_eq!(summary["renders"], 25);
}

#[test]
fn batch_cancel_after_stops_progress() {
    let lines = batch_lines(&[
        "--pages",
        "30",
        "--chunk",
        "10",
        "--delay-ms",
        "20",
        "--cancel-after",
        "1",
    ]);

    let progress = lines.iter().filter(|line| line["event"] == "progress").count();
    assert_eq!(progress, 1);

    let summary = lines.last().expect("summary line");
    assert_eq!(summary["cancelled"], true);
    assert!(summary["succeeded"].as_u64().unwrap() < 30);
}

#[test]
fn batch_reports_failed_pages() {
    let lines = batch_lines(&["--pages", "6", "--fail-page", "1", "--fail-page", "4", "--concurrency", "2"]);

    let summary = lines.last().expect("summary line");
    assert_eq!(summary["succeeded"], 4);
    assert_eq!(summary["failed"], 2);
    assert_eq!(summary["cancelled"], false);
}

#[test]
fn batch_rejects_zero_concurrency() {
    folio()
        .arg("batch")
        .arg("--pages")
        .arg("4")
        .arg("--concurrency")
        .arg("0")
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid configuration"));
}
