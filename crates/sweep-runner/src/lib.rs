pub mod config;
pub mod error;
pub mod experiment;
pub mod generate;
pub mod ingest;
pub mod literal;
pub mod parser;
pub mod query;
pub mod schema;
pub mod store;

pub use config::ExperimentConfig;
pub use error::{IngestError, IngestResult};
pub use experiment::{Experiment, ExperimentInstance};
pub use generate::{render_job_script, task_id, write_job_scripts, RunParameters};
pub use ingest::{
    file_id, ingest, ingest_into, output_files, scan_output_paths, IngestStrategy, IngestSummary,
    OutputFile, DATA_TABLE, HEADERS_TABLE, OUTPUT_SUFFIX,
};
pub use literal::{parse_literal, LiteralError};
pub use parser::{parse_flat, parse_header, parse_tabular, Record, FILE_COLUMN};
pub use query::{run_query, QueryResult};
pub use schema::{ColumnDef, TabularSchema};
pub use store::{Store, StoreSession, RESULTS_DB_FILE};
