//! Loader for configurations split across several files.
//!
//! The main file may list other files under `include`. Sections are merged
//! at the top level only, and a section defined in two files is an error.
//! Included files may not include further files.

use crate::{resolve_env_vars, Config, ConfigError};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use toml::Table;

fn not_found(message: String) -> ConfigError {
	ConfigError::Io(std::io::Error::new(std::io::ErrorKind::NotFound, message))
}

/// Reads a main configuration file together with its includes.
pub struct ConfigLoader {
	/// Directory relative includes are resolved against
	base_dir: PathBuf,
	/// Canonical paths already read
	seen: HashSet<PathBuf>,
	/// File each top-level section was first defined in
	owners: HashMap<String, PathBuf>,
}

impl ConfigLoader {
	pub fn new(base_dir: impl AsRef<Path>) -> Self {
		Self {
			base_dir: base_dir.as_ref().to_path_buf(),
			seen: HashSet::new(),
			owners: HashMap::new(),
		}
	}

	/// Loads `path` and every file it includes into one [`Config`].
	pub async fn load_config(&mut self, path: impl AsRef<Path>) -> Result<Config, ConfigError> {
		let main_path = self.locate(path.as_ref())?;
		let content = self.read(&main_path).await?;
		let mut merged: Table = toml::from_str(&content)?;

		let includes = match merged.remove("include") {
			None => return content.parse(),
			Some(value) => include_list(value)?,
		};

		for section in merged.keys() {
			self.owners.insert(section.clone(), main_path.clone());
		}
		for include in includes {
			let path = self.locate(&include)?;
			let table: Table = toml::from_str(&self.read(&path).await?)?;
			self.merge(&mut merged, table, &path)?;
		}

		toml::to_string(&merged)
			.map_err(|e| ConfigError::Parse(format!("Failed to serialize combined config: {}", e)))?
			.parse()
	}

	/// Moves the sections of `table`, read from `source`, into `merged`.
	fn merge(&mut self, merged: &mut Table, table: Table, source: &Path) -> Result<(), ConfigError> {
		for (section, value) in table {
			if section == "include" {
				return Err(ConfigError::Validation(format!(
					"Nested include in {} is not supported",
					source.display()
				)));
			}
			if let Some(owner) = self.owners.get(&section) {
				return Err(ConfigError::Validation(format!(
					"Duplicate section '{}' found in {} and {}. \
					Each top-level section must be unique across all configuration files.",
					section,
					owner.display(),
					source.display()
				)));
			}
			self.owners.insert(section.clone(), source.to_path_buf());
			merged.insert(section, value);
		}
		Ok(())
	}

	/// Reads `path` once, with environment placeholders resolved.
	async fn read(&mut self, path: &Path) -> Result<String, ConfigError> {
		let canonical = path
			.canonicalize()
			.map_err(|e| not_found(format!("Cannot resolve path {}: {}", path.display(), e)))?;
		if !self.seen.insert(canonical.clone()) {
			return Err(ConfigError::Validation(format!(
				"Circular include detected: {} was already loaded",
				canonical.display()
			)));
		}
		resolve_env_vars(&tokio::fs::read_to_string(path).await?)
	}

	fn locate(&self, path: &Path) -> Result<PathBuf, ConfigError> {
		let resolved = if path.is_absolute() {
			path.to_path_buf()
		} else {
			self.base_dir.join(path)
		};
		if resolved.exists() {
			Ok(resolved)
		} else {
			Err(not_found(format!(
				"Configuration file not found: {}",
				resolved.display()
			)))
		}
	}
}

/// `include` may be a single path or a list of paths.
fn include_list(value: toml::Value) -> Result<Vec<PathBuf>, ConfigError> {
	match value {
		toml::Value::String(path) => Ok(vec![PathBuf::from(path)]),
		toml::Value::Array(items) => items
			.into_iter()
			.map(|item| match item {
				toml::Value::String(path) => Ok(PathBuf::from(path)),
				_ => Err(ConfigError::Validation(
					"Include array must contain only strings".into(),
				)),
			})
			.collect(),
		_ => Err(ConfigError::Validation(
			"Include must be a string or array of strings".into(),
		)),
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::fs;
	use tempfile::TempDir;

	const NETWORK_SECTION: &str = r#"
[network]
rpc_url = "http://localhost:8545"
chain_id = 31337
factory_address = "0x5FbDB2315678afecb367f032d93F642f64180aa3"
"#;

	const REST: &str = r#"
[account]
primary = "local"
[account.implementations.local]
private_key = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80"

[delivery]
primary = "mock"
[delivery.implementations.mock]

[storage]
primary = "file"
[storage.implementations.file]
storage_path = "./data"
"#;

	#[tokio::test]
	async fn test_single_file_config() {
		let temp_dir = TempDir::new().unwrap();
		let config_path = temp_dir.path().join("config.toml");
		let content = format!("[oracle]\nid = \"single\"\n{}{}", NETWORK_SECTION, REST);
		fs::write(&config_path, content).unwrap();

		let mut loader = ConfigLoader::new(temp_dir.path());
		let config = loader.load_config(&config_path).await.unwrap();

		assert_eq!(config.oracle.id, "single");
		assert_eq!(config.storage.primary, "file");
	}

	#[tokio::test]
	async fn test_config_with_includes() {
		let temp_dir = TempDir::new().unwrap();

		let main_config = r#"
include = ["network.toml", "rest.toml"]
[oracle]
id = "modular"
receipt_timeout_seconds = 30
"#;
		fs::write(temp_dir.path().join("main.toml"), main_config).unwrap();
		fs::write(temp_dir.path().join("network.toml"), NETWORK_SECTION).unwrap();
		fs::write(temp_dir.path().join("rest.toml"), REST).unwrap();

		let mut loader = ConfigLoader::new(temp_dir.path());
		let config = loader.load_config("main.toml").await.unwrap();

		assert_eq!(config.oracle.id, "modular");
		assert_eq!(config.oracle.receipt_timeout_seconds, 30);
		assert_eq!(config.network.chain_id, 31337);
		assert_eq!(config.delivery.primary, "mock");
	}

	#[tokio::test]
	async fn test_duplicate_section_error() {
		let temp_dir = TempDir::new().unwrap();

		let main_config = "include = [\"duplicate.toml\"]\n[oracle]\nid = \"a\"\n";
		let duplicate_config = "[oracle]\nid = \"b\"\n";

		fs::write(temp_dir.path().join("main.toml"), main_config).unwrap();
		fs::write(temp_dir.path().join("duplicate.toml"), duplicate_config).unwrap();

		let mut loader = ConfigLoader::new(temp_dir.path());
		let error_msg = loader
			.load_config("main.toml")
			.await
			.unwrap_err()
			.to_string();

		assert!(error_msg.contains("Duplicate section 'oracle'"));
	}

	#[tokio::test]
	async fn test_self_include_detection() {
		let temp_dir = TempDir::new().unwrap();
		let config = "include = [\"self.toml\"]\n[oracle]\nid = \"loop\"\n";
		fs::write(temp_dir.path().join("self.toml"), config).unwrap();

		let mut loader = ConfigLoader::new(temp_dir.path());
		let error_msg = loader
			.load_config("self.toml")
			.await
			.unwrap_err()
			.to_string();

		assert!(error_msg.contains("already loaded"));
	}

	#[tokio::test]
	async fn test_missing_include() {
		let temp_dir = TempDir::new().unwrap();
		let config = "include = \"absent.toml\"\n[oracle]\nid = \"x\"\n";
		fs::write(temp_dir.path().join("main.toml"), config).unwrap();

		let mut loader = ConfigLoader::new(temp_dir.path());
		let error_msg = loader
			.load_config("main.toml")
			.await
			.unwrap_err()
			.to_string();

		assert!(error_msg.contains("not found"));
	}
}
