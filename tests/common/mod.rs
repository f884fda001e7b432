//! Shared fixtures: a file-backed SQLite source and control store in a temp dir

#![allow(dead_code)]

use deid::config::{parse_config, DeidConfig};
use deid::core::service::DeidService;
use deid::domain::{ConnectionId, RuleId, RunRequest};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::{Path, PathBuf};
use tempfile::TempDir;

pub const CONNECTION: &str = "research";

/// Mapping key shared by fixtures that must produce identical pseudonyms
pub const SHARED_KEY: &str = "integration-test-mapping-key-0001";

pub struct Fixture {
    pub dir: TempDir,
    pub source_path: PathBuf,
    pub state_path: PathBuf,
}

impl Fixture {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let source_path = dir.path().join("source.db");
        let state_path = dir.path().join("state.db");
        Self {
            dir,
            source_path,
            state_path,
        }
    }

    /// Catalog with one SQLite connection and the rules used across tests
    pub fn config_toml(&self, batch_size: usize, mapping_key: Option<&str>) -> String {
        let key = mapping_key
            .map(|k| format!("mapping_key = \"{k}\"\n"))
            .unwrap_or_default();
        format!(
            r#"
[state]
database_url = "sqlite://{state}"

[pipeline]
batch_size = {batch_size}

[pipeline.sink]
mode = "new_table"
output_dir = "{out}"

[pipeline.retry]
max_retries = 1
initial_delay_ms = 10
max_delay_ms = 20

[deidentification]
{key}
[[connections]]
id = "{CONNECTION}"
name = "Research extract"
backend = "sqlite"
database = "{source}"

[[rules]]
id = "mask-name"
kind = {{ type = "mask", keep_suffix = 2 }}
selector = {{ columns = ["name"] }}

[[rules]]
id = "shift-dob"
kind = {{ type = "date_shift", max_days = 30 }}
selector = {{ columns = ["dob"] }}

[[rules]]
id = "pseudonymize-mrn"
kind = {{ type = "pseudonymize", domain = "mrn" }}
selector = {{ columns = ["mrn"] }}

[[rules]]
id = "zip3"
kind = {{ type = "generalize", granularity = {{ unit = "zip_prefix", digits = 3 }} }}
selector = {{ columns = ["zip"] }}

[[rules]]
id = "drop-deceased"
kind = {{ type = "suppress", scope = "row" }}
selector = {{ columns = ["deceased"] }}
"#,
            state = self.state_path.display(),
            source = self.source_path.display(),
            out = self.dir.path().join("out").display(),
        )
    }

    pub fn config(&self, batch_size: usize, mapping_key: Option<&str>) -> DeidConfig {
        parse_config(&self.config_toml(batch_size, mapping_key)).unwrap()
    }

    pub async fn service(&self, batch_size: usize, mapping_key: Option<&str>) -> DeidService {
        DeidService::start(&self.config(batch_size, mapping_key))
            .await
            .unwrap()
    }

    /// Service over a config edited from [`Fixture::config_toml`]
    pub async fn service_with(
        &self,
        batch_size: usize,
        mapping_key: Option<&str>,
        edit: impl FnOnce(String) -> String,
    ) -> DeidService {
        let toml = edit(self.config_toml(batch_size, mapping_key));
        DeidService::start(&parse_config(&toml).unwrap())
            .await
            .unwrap()
    }

    pub async fn source(&self) -> SqlitePool {
        open(&self.source_path).await
    }
}

pub async fn open(path: &Path) -> SqlitePool {
    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true);
    SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await
        .unwrap()
}

/// `patients(id, mrn, name, dob, zip)` with `count` generated rows
pub async fn seed_patients(pool: &SqlitePool, count: i64) {
    sqlx::query(
        "CREATE TABLE patients (id INTEGER PRIMARY KEY, mrn TEXT NOT NULL, name TEXT, dob TEXT, zip TEXT)",
    )
    .execute(pool)
    .await
    .unwrap();

    for i in 1..=count {
        sqlx::query("INSERT INTO patients (id, mrn, name, dob, zip) VALUES (?, ?, ?, ?, ?)")
            .bind(i)
            .bind(format!("MRN{i:05}"))
            .bind(format!("Patient Doe{i}"))
            .bind(format!("19{:02}-{:02}-{:02}", 40 + i % 60, 1 + i % 12, 1 + i % 28))
            .bind(format!("{:05}", 10000 + i * 37))
            .execute(pool)
            .await
            .unwrap();
    }
}

/// Rows of an output table, ordered by id
pub async fn rows(pool: &SqlitePool, table: &str) -> Vec<(i64, String, Option<String>, Option<String>)> {
    sqlx::query_as(&format!("SELECT id, mrn, name, dob FROM {table} ORDER BY id"))
        .fetch_all(pool)
        .await
        .unwrap()
}

pub fn request(table: &str, rules: &[&str]) -> RunRequest {
    RunRequest {
        connection_id: ConnectionId::new(CONNECTION).unwrap(),
        table: table.to_string(),
        patient_id_field: "mrn".to_string(),
        rule_ids: rules.iter().map(|r| RuleId::new(*r).unwrap()).collect(),
        mapping_ids: vec![],
        patient_id_format: None,
        name: None,
        destination_connection_id: None,
    }
}
