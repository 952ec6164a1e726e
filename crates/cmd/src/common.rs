// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Args;
use dumpload::options::parse_assignment;
use dumpload::{Catalog, DumpOptions, LoadOptions};
use storage::StorageLocation;

/// Options shared by `dump` and `load`: a YAML file plus `-o name=value` overrides
#[derive(Args, Debug, Default, Clone)]
pub struct OptionArgs {
    /// YAML file with option values
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Option override, e.g. `-o threads=8` or `-o progressFile=/tmp/p.json`
    #[arg(short = 'o', long = "option", value_name = "NAME=VALUE")]
    pub overrides: Vec<String>,
}

impl OptionArgs {
    fn read_config(&self) -> Result<Option<String>> {
        match &self.config {
            Some(path) => std::fs::read_to_string(path)
                .map(Some)
                .with_context(|| format!("Failed to read config file {}", path.display())),
            None => Ok(None),
        }
    }

    pub fn load_options(&self) -> Result<LoadOptions> {
        let mut options = match self.read_config()? {
            Some(text) => LoadOptions::from_yaml(&text)?,
            None => LoadOptions::default(),
        };
        for assignment in &self.overrides {
            let (name, value) = parse_assignment(assignment)?;
            options.set(name, value)?;
        }
        Ok(options)
    }

    pub fn dump_options(&self) -> Result<DumpOptions> {
        let mut options = match self.read_config()? {
            Some(text) => DumpOptions::from_yaml(&text)?,
            None => DumpOptions::default(),
        };
        for assignment in &self.overrides {
            let (name, value) = parse_assignment(assignment)?;
            options.set(name, value)?;
        }
        Ok(options)
    }
}

/// Parse a dump location; never echoes the input, which may hold a PAR token
pub fn parse_location(text: &str) -> Result<StorageLocation> {
    Ok(StorageLocation::parse(text)?)
}

pub fn read_catalog(path: &Path) -> Result<Catalog> {
    let data = std::fs::read(path)
        .with_context(|| format!("Failed to read catalog {}", path.display()))?;
    serde_json::from_slice(&data)
        .with_context(|| format!("Failed to parse catalog {}", path.display()))
}

pub fn write_catalog(path: &Path, catalog: &Catalog) -> Result<()> {
    let data = serde_json::to_vec_pretty(catalog)?;
    std::fs::write(path, data)
        .with_context(|| format!("Failed to write catalog {}", path.display()))
}

/// Helper function to format byte counts
pub fn format_size(bytes: u64) -> String {
    if bytes >= 1024 * 1024 * 1024 {
        format!("{:.1}GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    } else if bytes >= 1024 * 1024 {
        format!("{:.1}MB", bytes as f64 / (1024.0 * 1024.0))
    } else if bytes >= 1024 {
        format!("{:.1}KB", bytes as f64 / 1024.0)
    } else {
        format!("{bytes}B")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dumpload::ResumeMode;

    #[test]
    fn test_overrides_apply_after_config() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = dir.path().join("load.yaml");
        std::fs::write(&config, "threads: 2\nprogressFile: /tmp/a.json\n").expect("write");

        let args = OptionArgs {
            config: Some(config),
            overrides: vec!["threads=6".to_string(), "reset-progress=true".to_string()],
        };
        let options = args.load_options().expect("options");
        assert_eq!(options.threads, 6);
        assert_eq!(options.progress_file.as_deref(), Some("/tmp/a.json"));
        assert_eq!(options.resume, ResumeMode::Reset);
    }

    #[test]
    fn test_unknown_override_is_rejected() {
        let args = OptionArgs {
            config: None,
            overrides: vec!["fastLoad=true".to_string()],
        };
        let err = args.load_options().expect_err("unknown");
        assert_eq!(err.to_string(), "Invalid option: fastLoad");
    }

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(512), "512B");
        assert_eq!(format_size(2048), "2.0KB");
        assert_eq!(format_size(3 * 1024 * 1024), "3.0MB");
    }
}
