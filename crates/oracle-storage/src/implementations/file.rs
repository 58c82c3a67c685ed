//! File-based storage backend.
//!
//! Each key is one JSON file under `storage_path`. Writes go to a temporary
//! file first and are renamed into place, so a crash mid-write leaves the
//! previous checkpoint intact.

use crate::{StorageError, StorageFactory, StorageInterface, StorageRegistry};
use async_trait::async_trait;
use oracle_types::{ConfigSchema, Field, FieldType, ImplementationRegistry, Schema, ValidationError};
use std::path::PathBuf;
use tokio::fs;

const DEFAULT_STORAGE_PATH: &str = "./data/oracle";

/// Stores each key as a file in a base directory.
pub struct FileStorage {
	base_path: PathBuf,
}

impl FileStorage {
	pub fn new(base_path: PathBuf) -> Self {
		Self { base_path }
	}

	/// Maps a key to a filesystem-safe path.
	fn get_file_path(&self, key: &str) -> PathBuf {
		let safe_key = key.replace(['/', ':', '\\'], "_");
		self.base_path.join(format!("{}.json", safe_key))
	}
}

#[async_trait]
impl StorageInterface for FileStorage {
	async fn get_bytes(&self, key: &str) -> Result<Vec<u8>, StorageError> {
		let path = self.get_file_path(key);

		match fs::read(&path).await {
			Ok(data) => Ok(data),
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(StorageError::NotFound),
			Err(e) => Err(StorageError::Backend(e.to_string())),
		}
	}

	async fn set_bytes(&self, key: &str, value: Vec<u8>) -> Result<(), StorageError> {
		let path = self.get_file_path(key);

		fs::create_dir_all(&self.base_path)
			.await
			.map_err(|e| StorageError::Backend(e.to_string()))?;

		// Write to a temp file then rename
		let temp_path = path.with_extension("tmp");
		fs::write(&temp_path, value)
			.await
			.map_err(|e| StorageError::Backend(e.to_string()))?;

		fs::rename(&temp_path, &path)
			.await
			.map_err(|e| StorageError::Backend(e.to_string()))?;

		tracing::trace!(path = %path.display(), "Wrote storage file");
		Ok(())
	}

	async fn delete(&self, key: &str) -> Result<(), StorageError> {
		let path = self.get_file_path(key);

		match fs::remove_file(&path).await {
			Ok(_) => Ok(()),
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
			Err(e) => Err(StorageError::Backend(e.to_string())),
		}
	}

	async fn exists(&self, key: &str) -> Result<bool, StorageError> {
		fs::try_exists(self.get_file_path(key))
			.await
			.map_err(|e| StorageError::Backend(e.to_string()))
	}

	fn config_schema(&self) -> Box<dyn ConfigSchema> {
		Box::new(FileStorageSchema)
	}
}

/// Configuration schema for FileStorage.
pub struct FileStorageSchema;

impl ConfigSchema for FileStorageSchema {
	fn validate(&self, config: &toml::Value) -> Result<(), ValidationError> {
		let schema = Schema::new(
			vec![],
			vec![Field::new("storage_path", FieldType::String).with_validator(|value| {
				match value.as_str() {
					Some(path) if path.trim().is_empty() => {
						Err("storage_path cannot be empty".to_string())
					},
					_ => Ok(()),
				}
			})],
		);
		schema.validate(config)
	}
}

/// Factory function to create a file storage backend.
///
/// Configuration parameters:
/// - `storage_path`: base directory (default: "./data/oracle")
pub fn create_storage(config: &toml::Value) -> Result<Box<dyn StorageInterface>, StorageError> {
	FileStorageSchema
		.validate(config)
		.map_err(|e| StorageError::Configuration(e.to_string()))?;

	let storage_path = config
		.get("storage_path")
		.and_then(|v| v.as_str())
		.unwrap_or(DEFAULT_STORAGE_PATH);

	Ok(Box::new(FileStorage::new(PathBuf::from(storage_path))))
}

/// Registry for the file storage implementation.
pub struct Registry;

impl ImplementationRegistry for Registry {
	const NAME: &'static str = "file";
	type Factory = StorageFactory;

	fn factory() -> Self::Factory {
		create_storage
	}
}

impl StorageRegistry for Registry {}

#[cfg(test)]
mod tests {
	use super::*;
	use tempfile::TempDir;

	#[tokio::test]
	async fn test_persists_across_instances() {
		let temp_dir = TempDir::new().unwrap();
		let key = "matches:214235245";

		let first = FileStorage::new(temp_dir.path().to_path_buf());
		first.set_bytes(key, b"{\"cursor\":12}".to_vec()).await.unwrap();

		let second = FileStorage::new(temp_dir.path().to_path_buf());
		assert!(second.exists(key).await.unwrap());
		assert_eq!(second.get_bytes(key).await.unwrap(), b"{\"cursor\":12}".to_vec());

		// No temp file left behind
		let leftovers: Vec<_> = std::fs::read_dir(temp_dir.path())
			.unwrap()
			.filter_map(Result::ok)
			.filter(|e| e.path().extension().is_some_and(|ext| ext == "tmp"))
			.collect();
		assert!(leftovers.is_empty());
	}

	#[tokio::test]
	async fn test_missing_and_delete() {
		let temp_dir = TempDir::new().unwrap();
		let storage = FileStorage::new(temp_dir.path().join("nested"));

		assert!(matches!(
			storage.get_bytes("balls:1:1").await,
			Err(StorageError::NotFound)
		));
		assert!(!storage.exists("balls:1:1").await.unwrap());

		storage.set_bytes("balls:1:1", b"x".to_vec()).await.unwrap();
		storage.delete("balls:1:1").await.unwrap();
		storage.delete("balls:1:1").await.unwrap();
		assert!(!storage.exists("balls:1:1").await.unwrap());
	}

	#[test]
	fn test_factory_rejects_empty_path() {
		let config: toml::Value = toml::from_str("storage_path = \" \"").unwrap();
		assert!(matches!(
			create_storage(&config),
			Err(StorageError::Configuration(_))
		));

		let config: toml::Value = toml::from_str("storage_path = \"/tmp/oracle\"").unwrap();
		assert!(create_storage(&config).is_ok());
	}
}
