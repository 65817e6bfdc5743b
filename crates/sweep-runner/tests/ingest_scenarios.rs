use serde_json::{json, Value};
use std::fs;
use std::path::Path;
use sweep_runner::{
    ingest, Experiment, IngestError, IngestStrategy, RunParameters, Store, TabularSchema,
    RESULTS_DB_FILE,
};
use tempfile::TempDir;

fn write_out(dir: &Path, name: &str, body: &str) {
    fs::write(dir.join(name), body).expect("write output file");
}

fn rows(dir: &Path, sql: &str) -> Vec<Value> {
    Store::in_directory(dir)
        .query(sql)
        .expect("query")
        .records()
        .into_iter()
        .map(Value::Object)
        .collect()
}

fn table_exists(dir: &Path, table: &str) -> bool {
    let result = Store::in_directory(dir)
        .query(&format!(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name = '{}'",
            table
        ))
        .expect("query schema");
    !result.is_empty()
}

fn tabular_schema() -> TabularSchema {
    TabularSchema::new([("step", "integer"), ("loss", "real")], "file, step")
}

#[test]
fn flat_scenario_builds_one_row_per_file() {
    let dir = TempDir::new().expect("temp dir");
    write_out(dir.path(), "00.out", "{\"lr\": 0.1}\nacc: 0.9\nloss: inf\n");

    let summary = ingest(dir.path(), &IngestStrategy::Flat).expect("ingest");
    assert_eq!(summary.files_found, 1);
    assert_eq!(summary.data_rows, 1);
    assert_eq!(summary.store_path, dir.path().join(RESULTS_DB_FILE));

    assert_eq!(
        rows(dir.path(), "SELECT * FROM data"),
        vec![json!({"file": 0, "lr": 0.1, "acc": 0.9, "loss": -1})]
    );
}

#[test]
fn file_ids_ignore_padding_width() {
    let dir = TempDir::new().expect("temp dir");
    write_out(dir.path(), "3.out", "{'w': 1}\n");
    write_out(dir.path(), "010.out", "{'w': 2}\n");
    write_out(dir.path(), "0000042.out", "{'w': 3}\n");

    ingest(dir.path(), &IngestStrategy::Flat).expect("ingest");
    assert_eq!(
        rows(dir.path(), "SELECT file, w FROM data ORDER BY file"),
        vec![
            json!({"file": 3, "w": 1}),
            json!({"file": 10, "w": 2}),
            json!({"file": 42, "w": 3})
        ]
    );
}

#[test]
fn flat_rows_union_columns_and_skip_empty_files() {
    let dir = TempDir::new().expect("temp dir");
    write_out(dir.path(), "0.out", "{'lr': 0.1}\nacc: 0.5\nacc: 0.75\n");
    write_out(dir.path(), "1.out", "{'lr': 0.2}\nnote: diverged\n");
    write_out(dir.path(), "2.out", "");

    let summary = ingest(dir.path(), &IngestStrategy::Flat).expect("ingest");
    assert_eq!(summary.files_found, 3);
    assert_eq!(summary.files_skipped, 1);
    assert_eq!(
        rows(dir.path(), "SELECT file, lr, acc, note FROM data ORDER BY file"),
        vec![
            json!({"file": 0, "lr": 0.1, "acc": 0.75, "note": null}),
            json!({"file": 1, "lr": 0.2, "acc": null, "note": "diverged"})
        ]
    );
}

#[test]
fn reingesting_replaces_the_table() {
    let dir = TempDir::new().expect("temp dir");
    write_out(dir.path(), "0.out", "{'lr': 0.1}\nacc: 0.5\n");
    write_out(dir.path(), "1.out", "{'lr': 0.2}\nacc: 0.6\n");

    ingest(dir.path(), &IngestStrategy::Flat).expect("first ingest");
    let first = rows(dir.path(), "SELECT * FROM data ORDER BY file");
    ingest(dir.path(), &IngestStrategy::Flat).expect("second ingest");
    let second = rows(dir.path(), "SELECT * FROM data ORDER BY file");
    assert_eq!(first, second);
    assert_eq!(second.len(), 2);
}

#[test]
fn empty_directory_is_not_found() {
    let dir = TempDir::new().expect("temp dir");
    match ingest(dir.path(), &IngestStrategy::Flat) {
        Err(IngestError::NotFound { directory }) => assert_eq!(directory, dir.path()),
        other => panic!("unexpected result: {:?}", other),
    }
    let err = ingest(dir.path(), &IngestStrategy::Flat).expect_err("no files");
    assert!(
        err.to_string().contains(&dir.path().display().to_string()),
        "{}",
        err
    );
}

#[test]
fn unterminated_header_is_a_syntax_error_and_writes_nothing() {
    let dir = TempDir::new().expect("temp dir");
    write_out(dir.path(), "0.out", "{'lr': 0.1}\nacc: 0.5\n");
    write_out(dir.path(), "1.out", "{'lr: 0.2}\nacc: 0.6\n");

    match ingest(dir.path(), &IngestStrategy::Flat) {
        Err(IngestError::SyntaxMalformed { path, .. }) => {
            assert_eq!(path, dir.path().join("1.out"))
        }
        other => panic!("unexpected result: {:?}", other),
    }
    assert!(!dir.path().join(RESULTS_DB_FILE).exists());
}

#[test]
fn untokenizable_flat_value_aborts_the_batch() {
    let dir = TempDir::new().expect("temp dir");
    write_out(dir.path(), "0.out", "{'lr': 0.1}\nnote: 'abc\n");

    match ingest(dir.path(), &IngestStrategy::Flat) {
        Err(IngestError::SyntaxMalformed { path, reason }) => {
            assert_eq!(path, dir.path().join("0.out"));
            assert!(reason.starts_with("line 2:"), "{}", reason);
        }
        other => panic!("unexpected result: {:?}", other),
    }
    assert!(!dir.path().join(RESULTS_DB_FILE).exists());
}

#[test]
fn deeply_nested_row_fails_its_file() {
    let dir = TempDir::new().expect("temp dir");
    write_out(dir.path(), "0.out", &format!("{{}}\n{}\n", "(".repeat(100_000)));

    let err = ingest(dir.path(), &IngestStrategy::Tabular(tabular_schema())).expect_err("nesting");
    assert_eq!(err.code(), "syntax_malformed");
    assert!(err.to_string().contains("0.out"), "{}", err);
}

#[test]
fn failed_reingest_keeps_previous_tables() {
    let dir = TempDir::new().expect("temp dir");
    write_out(dir.path(), "0.out", "{'lr': 0.1}\n(0, 1.0)\n(1, 0.5)\n");
    ingest(dir.path(), &IngestStrategy::Tabular(tabular_schema())).expect("first ingest");

    write_out(dir.path(), "1.out", "{'lr': 0.2}\n(0, oops)\n");
    let err = ingest(dir.path(), &IngestStrategy::Tabular(tabular_schema()))
        .expect_err("bad row");
    assert_eq!(err.code(), "value_malformed");
    assert!(err.to_string().contains("1.out"), "{}", err);

    assert_eq!(rows(dir.path(), "SELECT COUNT(*) AS n FROM data"), vec![json!({"n": 2})]);
    assert_eq!(rows(dir.path(), "SELECT COUNT(*) AS n FROM headers"), vec![json!({"n": 1})]);
}

#[test]
fn tabular_mode_builds_data_and_headers() {
    let dir = TempDir::new().expect("temp dir");
    write_out(
        dir.path(),
        "00.out",
        "{'': ['in.csv'], 'lr': 0.1}\n(0, 2.0)\n(1, 1.0, 'extra')\n",
    );
    write_out(dir.path(), "01.out", "{'lr': 0.2}\n(0,)\n");

    let summary = ingest(dir.path(), &IngestStrategy::Tabular(tabular_schema())).expect("ingest");
    assert_eq!(summary.header_rows, 2);
    assert_eq!(summary.data_rows, 3);

    assert_eq!(
        rows(dir.path(), "SELECT * FROM data ORDER BY file, step"),
        vec![
            json!({"step": 0, "loss": 2.0, "file": 0}),
            json!({"step": 1, "loss": 1.0, "file": 0}),
            json!({"step": 0, "loss": null, "file": 1})
        ]
    );
    assert_eq!(
        rows(dir.path(), "SELECT * FROM headers ORDER BY file"),
        vec![json!({"file": 0, "lr": 0.1}), json!({"file": 1, "lr": 0.2})]
    );
    assert_eq!(
        rows(
            dir.path(),
            "SELECT d.loss AS loss, h.lr AS lr FROM data d JOIN headers h ON d.file = h.file WHERE d.step = 1"
        ),
        vec![json!({"loss": 1.0, "lr": 0.1})]
    );
}

#[test]
fn tabular_primary_key_is_enforced() {
    let dir = TempDir::new().expect("temp dir");
    write_out(dir.path(), "0.out", "{}\n(0, 1.0)\n(0, 2.0)\n");
    let err = ingest(dir.path(), &IngestStrategy::Tabular(tabular_schema())).expect_err("dup key");
    assert_eq!(err.code(), "store_error");
    assert!(!table_exists(dir.path(), "data"));
}

#[test]
fn tabular_strict_arity_rejects_short_rows() {
    let dir = TempDir::new().expect("temp dir");
    write_out(dir.path(), "0.out", "{}\n(0,)\n");
    let schema = tabular_schema().with_strict_arity(true);
    let err = ingest(dir.path(), &IngestStrategy::Tabular(schema)).expect_err("short row");
    assert_eq!(err.code(), "value_malformed");
}

#[test]
fn invalid_schema_fails_before_reading_files() {
    let dir = TempDir::new().expect("temp dir");
    let schema = TabularSchema::new([("file", "integer")], "file");
    let err = ingest(dir.path(), &IngestStrategy::Tabular(schema)).expect_err("bad schema");
    assert_eq!(err.code(), "invalid_schema");
}

#[test]
fn generated_headers_round_trip_through_ingestion() {
    let dir = TempDir::new().expect("temp dir");
    let runs: Vec<RunParameters> = [
        json!({"": ["data.csv"], "lr": 0.1, "seed|": 1}),
        json!({"": ["data.csv"], "lr": 0.01, "seed|": 2}),
    ]
    .into_iter()
    .map(|v| match v {
        Value::Object(map) => map,
        _ => unreachable!(),
    })
    .collect();
    let instance = Experiment::new("python train.py", runs).instance(dir.path().join("sweep"));
    let scripts = instance.setup().expect("setup");
    assert_eq!(scripts.len(), instance.len());

    // Stand in for the shell: the echoed JSON becomes line 1 of each output.
    for script in &scripts {
        let body = fs::read_to_string(script).expect("read script");
        let first = body.lines().next().expect("echo line");
        let json_text = first
            .strip_prefix("echo \"")
            .and_then(|rest| rest.split("\" > ").next())
            .expect("echo payload")
            .replace("\\\"", "\"");
        let out = script.with_extension("out");
        fs::write(&out, format!("{}\nacc: 0.5\n", json_text)).expect("write out");
    }

    assert_eq!(instance.output_filenames().expect("scan").len(), 2);
    instance.create_database().expect("ingest");
    let result = instance
        .query("SELECT file, lr, output, \"seed|\" AS seed, acc FROM data ORDER BY file")
        .expect("query");
    let records: Vec<Value> = result.records().into_iter().map(Value::Object).collect();
    assert_eq!(
        records,
        vec![
            json!({"file": 0, "lr": 0.1, "output": "./0.out", "seed": 1, "acc": 0.5}),
            json!({"file": 1, "lr": 0.01, "output": "./1.out", "seed": 2, "acc": 0.5})
        ]
    );
}
