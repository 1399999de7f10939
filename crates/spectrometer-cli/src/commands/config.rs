use anyhow::{Context, Result};
use spectrometer_hw::{config, Config};
use std::path::Path;
use toml_edit::DocumentMut;

/// Show the current effective configuration.
pub fn show_config(config_path: &Path) -> Result<()> {
    let config = Config::load_from(config_path)?;

    println!("Current Configuration");
    println!("=====================\n");

    println!("Config file: {}", config_path.display());
    let exists = config_path.exists();
    println!("File exists: {}\n", if exists { "yes" } else { "no (using defaults)" });

    println!("Settings:");
    for (key, value) in flatten(&as_toml(&config)?) {
        println!("  {key}: {}", display_value(&value));
    }

    println!("\nPriority: CLI args > ENV vars (SPEC_*) > Config file > Defaults");

    Ok(())
}

/// Get a specific config value.
pub fn get_config(config_path: &Path, key: Option<String>) -> Result<()> {
    if let Some(key) = key {
        let config = Config::load_from(config_path)?;
        let value = lookup(&as_toml(&config)?, &key)
            .ok_or_else(|| unknown_key(&key))?
            .clone();
        println!("{}", display_value(&value));
    } else if config_path.exists() {
        let contents =
            std::fs::read_to_string(config_path).context("Failed to read config file")?;
        print!("{contents}");
    } else {
        println!("Config file does not exist: {}", config_path.display());
        println!("\nRun 'spectrometer config init' to create it.");
    }

    Ok(())
}

/// Set a config value, keeping comments and layout of the file.
pub fn set_config(config_path: &Path, key: &str, value: &str) -> Result<()> {
    let defaults = as_toml(&Config::default())?;
    let template = lookup(&defaults, key).ok_or_else(|| unknown_key(key))?;
    let new_value = parse_value(template, value)
        .with_context(|| format!("Invalid value '{value}' for {key}"))?;

    config::ensure_config_file_at(config_path)?;
    let contents = std::fs::read_to_string(config_path).context("Failed to read config file")?;
    let mut doc = contents
        .parse::<DocumentMut>()
        .context("Failed to parse config file")?;

    let mut segments: Vec<&str> = key.split('.').collect();
    let last = segments.pop().unwrap_or(key);
    let mut table = doc.as_table_mut();
    for segment in segments {
        table = table
            .entry(segment)
            .or_insert(toml_edit::table())
            .as_table_mut()
            .ok_or_else(|| anyhow::anyhow!("'{segment}' in the config file is not a table"))?;
    }
    table[last] = toml_edit::value(new_value);

    let updated = doc.to_string();
    toml::from_str::<Config>(&updated).context("Config file would be invalid after the update")?;
    std::fs::write(config_path, updated).context("Failed to write config file")?;

    println!("✓ Updated {key} = {value}");
    println!("  in {}", config_path.display());

    Ok(())
}

/// Show the config file path.
pub fn show_path(config_path: &Path) -> Result<()> {
    println!("{}", config_path.display());
    Ok(())
}

/// Show example configuration.
pub fn show_example() -> Result<()> {
    print!("{}", config::example_config());
    Ok(())
}

/// Initialize config file with defaults.
pub fn init_config(config_path: &Path) -> Result<()> {
    let created = config::ensure_config_file_at(config_path)?;

    if created {
        println!("✓ Created config file: {}", config_path.display());
        println!("\nEdit this file to configure the spectrometer.");
    } else {
        println!("Config file already exists: {}", config_path.display());
    }

    Ok(())
}

fn as_toml(config: &Config) -> Result<toml::Value> {
    toml::Value::try_from(config).context("Failed to serialize configuration")
}

/// Dotted keys and values of all leaves.
fn flatten(value: &toml::Value) -> Vec<(String, toml::Value)> {
    fn walk(prefix: &str, value: &toml::Value, out: &mut Vec<(String, toml::Value)>) {
        match value {
            toml::Value::Table(table) => {
                for (key, value) in table {
                    let key = if prefix.is_empty() {
                        key.clone()
                    } else {
                        format!("{prefix}.{key}")
                    };
                    walk(&key, value, out);
                }
            }
            leaf => out.push((prefix.to_string(), leaf.clone())),
        }
    }
    let mut out = Vec::new();
    walk("", value, &mut out);
    out
}

fn lookup<'a>(value: &'a toml::Value, key: &str) -> Option<&'a toml::Value> {
    key.split('.')
        .try_fold(value, |value, segment| value.get(segment))
        .filter(|value| !value.is_table())
}

fn display_value(value: &toml::Value) -> String {
    match value {
        toml::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn unknown_key(key: &str) -> anyhow::Error {
    let valid: Vec<String> = as_toml(&Config::default())
        .map(|defaults| flatten(&defaults).into_iter().map(|(k, _)| k).collect())
        .unwrap_or_default();
    anyhow::anyhow!("Unknown config key: {key}\n\nValid keys: {}", valid.join(", "))
}

/// Parse `raw` into the type the default value of the key has.
fn parse_value(template: &toml::Value, raw: &str) -> Result<toml_edit::Value> {
    Ok(match template {
        toml::Value::Integer(_) => raw.parse::<i64>()?.into(),
        toml::Value::Float(_) => raw.parse::<f64>()?.into(),
        toml::Value::Boolean(_) => raw.parse::<bool>()?.into(),
        _ => raw.into(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_lookup_dotted_keys() {
        let defaults = as_toml(&Config::default()).unwrap();
        assert_eq!(
            lookup(&defaults, "server.port").and_then(toml::Value::as_integer),
            Some(11111)
        );
        assert!(lookup(&defaults, "sample_rate").is_some());
        // tables are not values
        assert!(lookup(&defaults, "server").is_none());
        assert!(lookup(&defaults, "server.nope").is_none());
    }

    #[test]
    fn test_flatten_lists_nested_keys() {
        let keys: Vec<String> = flatten(&as_toml(&Config::default()).unwrap())
            .into_iter()
            .map(|(k, _)| k)
            .collect();
        assert!(keys.contains(&"server.ip_address".to_string()));
        assert!(keys.contains(&"spectrometer_name".to_string()));
    }

    #[test]
    fn test_set_config_creates_and_updates_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("spectrometer").join("config.toml");

        set_config(&path, "server.port", "2222").unwrap();
        set_config(&path, "sample_rate", "160000").unwrap();
        set_config(&path, "data_dir", "/tmp/nmr").unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        // comments from the example survive the edit
        assert!(contents.contains("# magnETHical spectrometer configuration"));

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.server.port, 2222);
        assert!((config.sample_rate - 160e3).abs() < 1e-9);
        assert_eq!(config.data_dir, std::path::PathBuf::from("/tmp/nmr"));
    }

    #[test]
    fn test_set_config_rejects_bad_input() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.toml");

        assert!(set_config(&path, "server.port", "eleven").is_err());
        assert!(set_config(&path, "no_such_key", "1").is_err());
        // nothing was written for the rejected edits
        assert!(!path.exists());
    }

    #[test]
    fn test_init_config_is_idempotent() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.toml");
        init_config(&path).unwrap();
        let first = std::fs::read_to_string(&path).unwrap();
        init_config(&path).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), first);
    }
}
