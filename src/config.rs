// src/config.rs
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::{
    env, fs,
    path::{Path, PathBuf},
};
use tracing::{debug, info};

use crate::process::ColumnNames;

/// Default config file picked up from the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "cpaudit.yaml";

/// Run configuration: YAML file first, then `CPAUDIT_*` environment overrides.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub base_url: String,
    pub username: String,
    #[serde(skip_serializing)]
    pub password: String,
    pub domain: String,
    /// Collection protocol to export.
    pub cp_id: Option<u64>,
    pub entities: Vec<String>,
    /// `YYYY-MM-DD`, inclusive.
    pub start_date: String,
    /// `YYYY-MM-DD`, inclusive.
    pub end_date: String,
    pub out_dir: PathBuf,
    /// Also write the pivot as Parquet.
    pub parquet: bool,
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub columns: ColumnNames,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_url: "https://demo.openspecimen.org".into(),
            username: String::new(),
            password: String::new(),
            domain: "openspecimen".into(),
            cp_id: None,
            entities: vec!["CollectionProtocol".into()],
            start_date: String::new(),
            end_date: String::new(),
            out_dir: PathBuf::from("."),
            parquet: false,
            max_retries: 3,
            initial_backoff_ms: 500,
            columns: ColumnNames::default(),
        }
    }
}

impl Config {
    /// Load from `$CPAUDIT_CONFIG` (or `cpaudit.yaml` if present), apply env
    /// overrides, and validate.
    pub fn load() -> Result<Self> {
        let mut cfg = match env::var("CPAUDIT_CONFIG") {
            Ok(path) => Self::from_yaml_file(&path)?,
            Err(_) if Path::new(DEFAULT_CONFIG_FILE).is_file() => {
                Self::from_yaml_file(DEFAULT_CONFIG_FILE)?
            }
            Err(_) => {
                debug!("no config file; using defaults");
                Self::default()
            }
        };
        cfg.apply_overrides(|key| env::var(key).ok())?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_yaml_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text =
            fs::read_to_string(path).with_context(|| format!("reading config {:?}", path))?;
        let cfg: Config =
            serde_yaml::from_str(&text).with_context(|| format!("parsing config {:?}", path))?;
        info!(path = %path.display(), "loaded config");
        Ok(cfg)
    }

    /// Overlay `CPAUDIT_*` variables as returned by `lookup`.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        if let Some(v) = get("CPAUDIT_BASE_URL") {
            self.base_url = v;
        }
        if let Some(v) = get("CPAUDIT_USERNAME") {
            self.username = v;
        }
        if let Some(v) = get("CPAUDIT_PASSWORD") {
            self.password = v;
        }
        if let Some(v) = get("CPAUDIT_DOMAIN") {
            self.domain = v;
        }
        if let Some(v) = get("CPAUDIT_CP_ID") {
            self.cp_id = Some(
                v.parse()
                    .with_context(|| format!("CPAUDIT_CP_ID must be an integer, got {:?}", v))?,
            );
        }
        if let Some(v) = get("CPAUDIT_START_DATE") {
            self.start_date = v;
        }
        if let Some(v) = get("CPAUDIT_END_DATE") {
            self.end_date = v;
        }
        if let Some(v) = get("CPAUDIT_OUT_DIR") {
            self.out_dir = PathBuf::from(v);
        }
        if let Some(v) = get("CPAUDIT_PARQUET") {
            self.parquet = matches!(v.to_lowercase().as_str(), "1" | "true" | "yes");
        }
        Ok(())
    }

    /// Everything the export needs must be present before any request goes out.
    pub fn validate(&self) -> Result<()> {
        if self.base_url.is_empty() {
            bail!("base_url is not set");
        }
        if self.username.is_empty() || self.password.is_empty() {
            bail!("credentials missing: set CPAUDIT_USERNAME and CPAUDIT_PASSWORD");
        }
        if self.cp_id.is_none() {
            bail!("cp_id missing: set CPAUDIT_CP_ID");
        }
        if self.start_date.is_empty() || self.end_date.is_empty() {
            bail!("export window missing: set CPAUDIT_START_DATE and CPAUDIT_END_DATE");
        }
        Ok(())
    }

    pub fn zip_path(&self, cp_id: u64) -> PathBuf {
        self.out_dir.join(format!("cp_{}_audit.zip", cp_id))
    }

    pub fn pivot_csv_path(&self, cp_id: u64) -> PathBuf {
        self.out_dir.join(format!("cp_{}_audit_pivot.csv", cp_id))
    }

    pub fn pivot_parquet_path(&self, cp_id: u64) -> PathBuf {
        self.out_dir.join(format!("cp_{}_audit_pivot.parquet", cp_id))
    }
}
