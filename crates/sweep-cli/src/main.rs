use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use sweep_runner::{
    Experiment, ExperimentConfig, IngestError, IngestStrategy, IngestSummary, QueryResult, Store,
    TabularSchema,
};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "sweep", version, about = "Parameter sweep job generation and result ingestion")]
struct Cli {
    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write one <id>.in job script per run
    Setup {
        experiment: PathBuf,
        #[arg(long)]
        dir: Option<PathBuf>,
        #[arg(long)]
        json: bool,
    },
    /// Parse <id>.out files into <dir>/_results.db
    Ingest {
        dir: PathBuf,
        #[arg(long, conflicts_with = "column")]
        experiment: Option<PathBuf>,
        /// Declared tuple column as name:type, in emitted order
        #[arg(long = "column")]
        column: Vec<String>,
        #[arg(long, requires = "column")]
        primary_key: Option<String>,
        #[arg(long, requires = "column")]
        strict_arity: bool,
        #[arg(long)]
        json: bool,
    },
    /// Run SQL against <dir>/_results.db
    Query {
        dir: PathBuf,
        sql: String,
        #[arg(long)]
        json: bool,
    },
    /// List the output files ingestion would read
    Files {
        dir: PathBuf,
        #[arg(long)]
        json: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    let json_mode = command_json_mode(&cli.command);
    let result = run_command(cli.command);
    match result {
        Ok(Some(payload)) => {
            emit_json(&payload);
            Ok(())
        }
        Ok(None) => Ok(()),
        Err(err) => {
            if json_mode {
                emit_json(&json_error(error_code(&err), format!("{:#}", err), json!({})));
                std::process::exit(1);
            }
            Err(err)
        }
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();
}

fn run_command(command: Commands) -> Result<Option<Value>> {
    match command {
        Commands::Setup {
            experiment,
            dir,
            json,
        } => {
            let config = ExperimentConfig::load(&experiment)?;
            let directory = dir
                .or_else(|| config.resolve_directory(&experiment))
                .ok_or_else(|| {
                    anyhow!("no directory given: pass --dir or set `directory` in the definition")
                })?;
            let instance = Experiment::from_config(&config).instance(&directory);
            let scripts = instance.setup()?;
            if json {
                return Ok(Some(json!({
                    "ok": true,
                    "command": "setup",
                    "directory": directory.display().to_string(),
                    "scripts": scripts.iter().map(|p| p.display().to_string()).collect::<Vec<_>>(),
                })));
            }
            println!("directory: {}", directory.display());
            println!("scripts: {}", scripts.len());
        }
        Commands::Ingest {
            dir,
            experiment,
            column,
            primary_key,
            strict_arity,
            json,
        } => {
            let strategy = resolve_strategy(
                experiment.as_deref(),
                &column,
                primary_key.as_deref(),
                strict_arity,
            )?;
            let summary = sweep_runner::ingest(&dir, &strategy)?;
            if json {
                return Ok(Some(json!({
                    "ok": true,
                    "command": "ingest",
                    "summary": serde_json::to_value(&summary)?,
                })));
            }
            print_summary(&summary);
        }
        Commands::Query { dir, sql, json } => {
            let result = Store::in_directory(&dir).query(&sql)?;
            if json {
                return Ok(Some(json!({
                    "ok": true,
                    "command": "query",
                    "result": serde_json::to_value(&result)?,
                })));
            }
            print_table(&result);
        }
        Commands::Files { dir, json } => {
            let files = sweep_runner::output_files(&dir)?;
            if json {
                return Ok(Some(json!({
                    "ok": true,
                    "command": "files",
                    "files": files
                        .iter()
                        .map(|f| json!({"id": f.id, "path": f.path.display().to_string()}))
                        .collect::<Vec<_>>(),
                })));
            }
            for file in &files {
                println!("{}\t{}", file.id, file.path.display());
            }
        }
    }
    Ok(None)
}

fn resolve_strategy(
    experiment: Option<&Path>,
    columns: &[String],
    primary_key: Option<&str>,
    strict_arity: bool,
) -> Result<IngestStrategy> {
    if !columns.is_empty() {
        let primary_key =
            primary_key.ok_or_else(|| anyhow!("--primary-key is required with --column"))?;
        let pairs = columns
            .iter()
            .map(|raw| parse_column_spec(raw))
            .collect::<Result<Vec<_>>>()?;
        let schema = TabularSchema::new(pairs, primary_key).with_strict_arity(strict_arity);
        schema.validate()?;
        return Ok(IngestStrategy::Tabular(schema));
    }
    match experiment {
        Some(path) => Ok(ExperimentConfig::load(path)?.output),
        None => Ok(IngestStrategy::Flat),
    }
}

fn parse_column_spec(raw: &str) -> Result<(String, String)> {
    let (name, sql_type) = raw
        .split_once(':')
        .ok_or_else(|| anyhow!("invalid --column '{}': expected name:type", raw))?;
    if name.trim().is_empty() || sql_type.trim().is_empty() {
        return Err(anyhow!(
            "invalid --column '{}': name and type cannot be empty",
            raw
        ));
    }
    Ok((name.trim().to_string(), sql_type.trim().to_string()))
}

fn emit_json(value: &Value) {
    match serde_json::to_string(value) {
        Ok(s) => println!("{}", s),
        Err(_) => println!(
            "{{\"ok\":false,\"error\":{{\"code\":\"serialization_error\",\"message\":\"failed to serialize JSON payload\",\"details\":{{}}}}}}"
        ),
    }
}

fn json_error(code: &str, message: String, details: Value) -> Value {
    json!({
        "ok": false,
        "error": {
            "code": code,
            "message": message,
            "details": details
        }
    })
}

fn error_code(err: &anyhow::Error) -> &'static str {
    err.downcast_ref::<IngestError>()
        .map(IngestError::code)
        .unwrap_or("command_failed")
}

fn command_json_mode(command: &Commands) -> bool {
    match command {
        Commands::Setup { json, .. }
        | Commands::Ingest { json, .. }
        | Commands::Query { json, .. }
        | Commands::Files { json, .. } => *json,
    }
}

fn print_summary(summary: &IngestSummary) {
    println!("mode: {}", summary.mode);
    println!("files_found: {}", summary.files_found);
    if summary.files_skipped > 0 {
        println!("files_skipped: {}", summary.files_skipped);
    }
    println!("header_rows: {}", summary.header_rows);
    println!("data_rows: {}", summary.data_rows);
    println!("store: {}", summary.store_path.display());
}

fn print_table(result: &QueryResult) {
    println!("{}", result.columns.join("\t"));
    for row in &result.rows {
        let cells: Vec<String> = row
            .iter()
            .map(|v| match v {
                Value::Null => String::new(),
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .collect();
        println!("{}", cells.join("\t"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn column_specs_split_on_first_colon() {
        assert_eq!(
            parse_column_spec("step:integer").unwrap(),
            ("step".to_string(), "integer".to_string())
        );
        assert_eq!(
            parse_column_spec("ratio:decimal(10:2)").unwrap(),
            ("ratio".to_string(), "decimal(10:2)".to_string())
        );
        assert!(parse_column_spec("step").is_err());
        assert!(parse_column_spec(":integer").is_err());
    }

    #[test]
    fn strategy_defaults_to_flat() {
        assert_eq!(resolve_strategy(None, &[], None, false).unwrap(), IngestStrategy::Flat);
    }

    #[test]
    fn columns_select_tabular_and_need_a_key() {
        let columns = vec!["step:integer".to_string(), "loss:real".to_string()];
        let err = resolve_strategy(None, &columns, None, false).expect_err("missing key");
        assert!(err.to_string().contains("--primary-key"), "{}", err);

        match resolve_strategy(None, &columns, Some("file, step"), true).unwrap() {
            IngestStrategy::Tabular(schema) => {
                assert_eq!(schema.table_columns(), vec!["step", "loss", "file"]);
                assert!(schema.strict_arity);
            }
            other => panic!("unexpected strategy: {:?}", other),
        }
    }

    #[test]
    fn strategy_comes_from_the_definition_file() {
        let dir = tempfile::TempDir::new().expect("temp dir");
        let path = dir.path().join("experiment.yaml");
        std::fs::write(
            &path,
            "command: run\nruns: [{a: 1}]\noutput: {mode: tabular, columns: [[x, real]], primary_key: file}\n",
        )
        .expect("write");
        match resolve_strategy(Some(path.as_path()), &[], None, false).unwrap() {
            IngestStrategy::Tabular(schema) => assert_eq!(schema.primary_key, "file"),
            other => panic!("unexpected strategy: {:?}", other),
        }
    }

    #[test]
    fn cli_parses_ingest_flags() {
        let cli = Cli::try_parse_from([
            "sweep",
            "ingest",
            "runs/a",
            "--column",
            "step:integer",
            "--primary-key",
            "file, step",
            "--json",
        ])
        .expect("parse");
        assert!(command_json_mode(&cli.command));
        match cli.command {
            Commands::Ingest {
                dir,
                column,
                primary_key,
                ..
            } => {
                assert_eq!(dir, PathBuf::from("runs/a"));
                assert_eq!(column, vec!["step:integer"]);
                assert_eq!(primary_key.as_deref(), Some("file, step"));
            }
            _ => panic!("expected ingest"),
        }
    }

    #[test]
    fn ingest_summary_serializes_for_json_output() {
        let dir = tempfile::TempDir::new().expect("temp dir");
        std::fs::write(dir.path().join("0.out"), "{'lr': 0.1}\nacc: 0.5\n").expect("write");
        let summary = sweep_runner::ingest(dir.path(), &IngestStrategy::Flat).expect("ingest");
        let value = serde_json::to_value(&summary).expect("serialize");
        assert_eq!(value["mode"], json!("flat"));
        assert_eq!(value["files_found"], json!(1));
        assert_eq!(value["data_rows"], json!(1));
        assert!(value["store"].as_str().expect("store path").ends_with("_results.db"));

        let result = Store::in_directory(dir.path())
            .query("SELECT file, acc FROM data")
            .expect("query");
        assert_eq!(
            serde_json::to_value(&result).expect("serialize"),
            json!({"columns": ["file", "acc"], "rows": [[0, 0.5]]})
        );
    }

    #[test]
    fn error_codes_come_from_ingest_errors() {
        let err = anyhow::Error::new(IngestError::NotFound {
            directory: PathBuf::from("runs/a"),
        });
        assert_eq!(error_code(&err), "not_found");
        assert_eq!(error_code(&anyhow!("other")), "command_failed");
    }
}
