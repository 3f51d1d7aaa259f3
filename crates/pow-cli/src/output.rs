//! Output and input helpers shared by the subcommands.

use std::path::Path;

use anyhow::{Context, Result};
use futures::StreamExt;
use pow_client::ItemStream;
use pow_core::StorageConfig;
use serde::Serialize;

/// Print `value` as pretty JSON on stdout.
pub fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    let text = serde_json::to_string_pretty(value).context("encoding output")?;
    println!("{text}");
    Ok(())
}

/// Print every item of a stream as it arrives.
pub async fn print_stream<T: Serialize>(mut stream: ItemStream<T>) -> Result<()> {
    while let Some(item) = stream.next().await {
        print_json(&item?)?;
    }
    Ok(())
}

/// Read a storage config from JSON, or YAML for `.yaml`/`.yml` files.
pub fn load_config(path: &Path) -> Result<StorageConfig> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    let yaml = matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yaml" | "yml")
    );
    let config = if yaml {
        serde_yaml::from_str(&raw).with_context(|| format!("parsing {}", path.display()))?
    } else {
        serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))?
    };
    Ok(config)
}

/// Split a comma-separated flag value, skipping empty parts.
pub fn split_list(raw: Option<&str>) -> Vec<String> {
    raw.map(|s| {
        s.split(',')
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(str::to_string)
            .collect()
    })
    .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_json_and_yaml_configs() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = StorageConfig::default().with_rep_factor(2);

        let json = dir.path().join("cfg.json");
        std::fs::write(&json, serde_json::to_string(&cfg).unwrap()).unwrap();
        assert_eq!(load_config(&json).unwrap(), cfg);

        let yaml = dir.path().join("cfg.yml");
        std::fs::write(&yaml, serde_yaml::to_string(&cfg).unwrap()).unwrap();
        assert_eq!(load_config(&yaml).unwrap(), cfg);
    }

    #[test]
    fn bad_config_names_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.json");
        std::fs::write(&path, "{").unwrap();
        let err = format!("{:#}", load_config(&path).unwrap_err());
        assert!(err.contains("broken.json"));
    }

    #[test]
    fn split_list_trims() {
        assert!(split_list(None).is_empty());
        assert_eq!(split_list(Some("a, b,,c")), vec!["a", "b", "c"]);
    }
}
