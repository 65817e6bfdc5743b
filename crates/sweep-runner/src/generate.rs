use anyhow::{Context, Result};
use serde_json::{Map, Value};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::ingest::OUTPUT_SUFFIX;
use crate::parser::POSITIONAL_KEY;

pub const INPUT_SUFFIX: &str = ".in";
pub const LOG_SUFFIX: &str = ".log";
pub const OUTPUT_PARAM: &str = "output";
/// Keys containing this marker are recorded in the header but not passed
/// to the command.
pub const PRIVATE_MARKER: char = '|';

pub type RunParameters = Map<String, Value>;

/// Zero-padded id of run `index` out of `count`; the width is the number of
/// digits in `count`, so 10 runs are numbered `00` through `09`.
pub fn task_id(index: usize, count: usize) -> String {
    let width = count.to_string().len();
    format!("{:0width$}", index, width = width)
}

pub fn render_job_script(command: &str, params: &RunParameters, id: &str) -> Result<String> {
    let output = format!("./{}{}", id, OUTPUT_SUFFIX);
    let mut args = params.clone();
    args.insert(OUTPUT_PARAM.to_string(), Value::String(output.clone()));

    let header = serde_json::to_string(&args).context("serialize run parameters")?;
    let mut script = format!("echo \"{}\" > {}\n", shell_escape(&header), output);

    script.push_str(command);
    match args.get(POSITIONAL_KEY) {
        Some(Value::Array(positional)) => {
            for arg in positional {
                script.push_str(&format!(" \"{}\"", shell_escape(&render_arg(arg))));
            }
        }
        Some(single) => script.push_str(&format!(" \"{}\"", shell_escape(&render_arg(single)))),
        None => {}
    }
    for (key, value) in &args {
        if key == POSITIONAL_KEY || key.contains(PRIVATE_MARKER) {
            continue;
        }
        script.push_str(&format!(
            " --{}=\"{}\"",
            key,
            shell_escape(&render_arg(value))
        ));
    }
    script.push_str(&format!(" &> ./{}{}\n", id, LOG_SUFFIX));
    Ok(script)
}

pub fn write_job_scripts(
    directory: &Path,
    command: &str,
    runs: &[RunParameters],
) -> Result<Vec<PathBuf>> {
    fs::create_dir_all(directory)
        .with_context(|| format!("create experiment directory {}", directory.display()))?;
    let mut written = Vec::with_capacity(runs.len());
    for (index, params) in runs.iter().enumerate() {
        let id = task_id(index, runs.len());
        let path = directory.join(format!("{}{}", id, INPUT_SUFFIX));
        let script = render_job_script(command, params, &id)?;
        fs::write(&path, script).with_context(|| format!("write {}", path.display()))?;
        debug!(path = %path.display(), "wrote job script");
        written.push(path);
    }
    info!(
        directory = %directory.display(),
        scripts = written.len(),
        "wrote job scripts"
    );
    Ok(written)
}

fn render_arg(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn shell_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if matches!(c, '\\' | '"' | '$' | '`') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}
