use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

use crate::generate::RunParameters;
use crate::ingest::IngestStrategy;

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExperimentConfig {
    pub command: String,
    /// Instance directory, relative to the definition file.
    #[serde(default)]
    pub directory: Option<PathBuf>,
    pub runs: Vec<RunParameters>,
    #[serde(default)]
    pub output: IngestStrategy,
}

impl ExperimentConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("read experiment definition {}", path.display()))?;
        let config = Self::from_yaml(&raw)
            .with_context(|| format!("invalid experiment definition {}", path.display()))?;
        Ok(config)
    }

    pub fn from_yaml(raw: &str) -> Result<Self> {
        let config: ExperimentConfig = serde_yaml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.command.trim().is_empty() {
            return Err(anyhow!("command cannot be empty"));
        }
        if self.runs.is_empty() {
            return Err(anyhow!("runs must list at least one parameter set"));
        }
        if let IngestStrategy::Tabular(schema) = &self.output {
            schema.validate()?;
        }
        Ok(())
    }

    pub fn resolve_directory(&self, config_path: &Path) -> Option<PathBuf> {
        let dir = self.directory.as_ref()?;
        if dir.is_absolute() {
            return Some(dir.clone());
        }
        let base = config_path.parent().unwrap_or_else(|| Path::new(""));
        Some(base.join(dir))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn loads_flat_definition() {
        let config = ExperimentConfig::from_yaml(
            r#"
command: python train.py
runs:
  - { lr: 0.1, "": [data.csv] }
  - { lr: 0.01, "tag|": private }
"#,
        )
        .expect("valid");
        assert_eq!(config.output, IngestStrategy::Flat);
        assert_eq!(config.runs.len(), 2);
        assert_eq!(config.runs[0][""], json!(["data.csv"]));
        assert_eq!(config.runs[1]["tag|"], json!("private"));
        assert!(config.directory.is_none());
    }

    #[test]
    fn loads_tabular_definition() {
        let config = ExperimentConfig::from_yaml(
            r#"
command: ./sim
directory: runs/sim
runs: [{ n: 1 }]
output:
  mode: tabular
  columns: [[step, integer], [energy, real]]
  primary_key: file, step
"#,
        )
        .expect("valid");
        match &config.output {
            IngestStrategy::Tabular(schema) => assert_eq!(schema.primary_key, "file, step"),
            other => panic!("unexpected output mode: {:?}", other),
        }
        assert_eq!(
            config.resolve_directory(Path::new("/work/exp/experiment.yaml")),
            Some(PathBuf::from("/work/exp/runs/sim"))
        );
    }

    #[test]
    fn rejects_incomplete_definitions() {
        let err = ExperimentConfig::from_yaml("command: ' '\nruns: [{a: 1}]\n").expect_err("blank");
        assert!(err.to_string().contains("command"), "{}", err);

        let err = ExperimentConfig::from_yaml("command: run\nruns: []\n").expect_err("no runs");
        assert!(err.to_string().contains("runs"), "{}", err);

        let err = ExperimentConfig::from_yaml(
            "command: run\nruns: [{a: 1}]\noutput: {mode: tabular, columns: [[file, integer]], primary_key: file}\n",
        )
        .expect_err("reserved column");
        assert!(err.to_string().contains("reserved"), "{}", err);

        assert!(ExperimentConfig::from_yaml("command: run\nruns: [{a: 1}]\nbogus: 1\n").is_err());
    }
}
