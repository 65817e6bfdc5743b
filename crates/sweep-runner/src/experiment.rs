use std::path::{Path, PathBuf};

use crate::config::ExperimentConfig;
use crate::error::IngestResult;
use crate::generate::{write_job_scripts, RunParameters};
use crate::ingest::{ingest_into, scan_output_paths, IngestStrategy, IngestSummary};
use crate::query::QueryResult;
use crate::schema::TabularSchema;
use crate::store::Store;

#[derive(Debug, Clone, PartialEq)]
pub struct Experiment {
    command: String,
    runs: Vec<RunParameters>,
}

impl Experiment {
    pub fn new(command: impl Into<String>, runs: Vec<RunParameters>) -> Self {
        Self {
            command: command.into(),
            runs,
        }
    }

    pub fn from_config(config: &ExperimentConfig) -> Self {
        Self::new(config.command.clone(), config.runs.clone())
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn runs(&self) -> &[RunParameters] {
        &self.runs
    }

    pub fn instance(&self, directory: impl Into<PathBuf>) -> ExperimentInstance {
        ExperimentInstance {
            experiment: self.clone(),
            directory: directory.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExperimentInstance {
    experiment: Experiment,
    directory: PathBuf,
}

impl ExperimentInstance {
    pub fn experiment(&self) -> &Experiment {
        &self.experiment
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn len(&self) -> usize {
        self.experiment.runs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.experiment.runs.is_empty()
    }

    pub fn setup(&self) -> anyhow::Result<Vec<PathBuf>> {
        write_job_scripts(&self.directory, &self.experiment.command, &self.experiment.runs)
    }

    /// Every output file currently present, in directory order.
    pub fn output_filenames(&self) -> IngestResult<Vec<PathBuf>> {
        scan_output_paths(&self.directory)
    }

    pub fn results_db(&self) -> Store {
        Store::in_directory(&self.directory)
    }

    pub fn query(&self, sql: &str) -> IngestResult<QueryResult> {
        self.results_db().query(sql)
    }

    pub fn ingest(&self, strategy: &IngestStrategy) -> IngestResult<IngestSummary> {
        ingest_into(&self.directory, &self.results_db(), strategy)
    }

    pub fn create_database(&self) -> IngestResult<IngestSummary> {
        self.ingest(&IngestStrategy::Flat)
    }

    pub fn save_data(&self, schema: &TabularSchema) -> IngestResult<IngestSummary> {
        self.ingest(&IngestStrategy::Tabular(schema.clone()))
    }
}
