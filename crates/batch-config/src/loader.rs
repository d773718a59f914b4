//! Multi-file configuration loading.
//!
//! Included files are merged into the root table section by section. A section
//! defined twice is an error, as is a file that (transitively) includes itself.

use crate::{resolve_env_vars, Config, ConfigError};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

/// Loads a root config file together with its `include` list.
pub struct ConfigLoader {
	/// Directory relative includes are resolved against.
	base_path: PathBuf,
	/// Canonical paths already read, for cycle detection.
	loaded_files: HashSet<PathBuf>,
	/// Section name to the file that defined it.
	section_sources: HashMap<String, PathBuf>,
}

impl ConfigLoader {
	pub fn new(base_path: impl AsRef<Path>) -> Self {
		Self {
			base_path: base_path.as_ref().to_path_buf(),
			loaded_files: HashSet::new(),
			section_sources: HashMap::new(),
		}
	}

	/// Loads `config_path` and every file it includes, then parses and validates
	/// the merged result.
	pub async fn load_config(
		&mut self,
		config_path: impl AsRef<Path>,
	) -> Result<Config, ConfigError> {
		let config_path = self.resolve_path(config_path)?;
		let root_content = self.load_file(&config_path).await?;
		let root: toml::Value = toml::from_str(&root_content)?;

		let includes = extract_includes(&root)?;
		if includes.is_empty() {
			return root_content.parse();
		}

		let merged = self.merge_includes(root, includes, config_path).await?;
		let merged = toml::to_string(&merged).map_err(|e| {
			ConfigError::Parse(format!("Failed to serialize combined config: {}", e))
		})?;
		merged.parse()
	}

	async fn load_file(&mut self, path: &Path) -> Result<String, ConfigError> {
		let canonical_path = tokio::fs::canonicalize(path).await.map_err(|e| {
			ConfigError::Io(std::io::Error::new(
				std::io::ErrorKind::NotFound,
				format!("Cannot resolve path {}: {}", path.display(), e),
			))
		})?;

		if !self.loaded_files.insert(canonical_path.clone()) {
			return Err(ConfigError::Validation(format!(
				"Circular include detected: {} was already loaded",
				canonical_path.display()
			)));
		}

		let content = tokio::fs::read_to_string(path).await?;
		resolve_env_vars(&content)
	}

	async fn merge_includes(
		&mut self,
		mut root: toml::Value,
		includes: Vec<PathBuf>,
		root_path: PathBuf,
	) -> Result<toml::Value, ConfigError> {
		let root_table = root
			.as_table_mut()
			.ok_or_else(|| ConfigError::Validation("Configuration root must be a table".into()))?;
		root_table.remove("include");
		for key in root_table.keys() {
			self.section_sources.insert(key.clone(), root_path.clone());
		}

		for include_path in includes {
			let resolved_path = self.resolve_path(&include_path)?;
			let content = self.load_file(&resolved_path).await?;
			let included: toml::Table = toml::from_str(&content)?;

			for (key, value) in included {
				if let Some(existing_source) = self.section_sources.get(&key) {
					return Err(ConfigError::Validation(format!(
						"Duplicate section '{}' found in {} and {}. \
						Each top-level section must be unique across all configuration files.",
						key,
						existing_source.display(),
						resolved_path.display()
					)));
				}
				self.section_sources
					.insert(key.clone(), resolved_path.clone());
				root_table.insert(key, value);
			}
		}

		Ok(root)
	}

	fn resolve_path(&self, path: impl AsRef<Path>) -> Result<PathBuf, ConfigError> {
		let path = path.as_ref();
		let resolved = if path.is_absolute() {
			path.to_path_buf()
		} else {
			self.base_path.join(path)
		};

		if !resolved.exists() {
			return Err(ConfigError::Io(std::io::Error::new(
				std::io::ErrorKind::NotFound,
				format!("Configuration file not found: {}", resolved.display()),
			)));
		}

		Ok(resolved)
	}
}

/// Reads `include = "file"` or `include = ["a", "b"]`.
fn extract_includes(root: &toml::Value) -> Result<Vec<PathBuf>, ConfigError> {
	match root.get("include") {
		None => Ok(Vec::new()),
		Some(toml::Value::String(path)) => Ok(vec![PathBuf::from(path)]),
		Some(toml::Value::Array(items)) => items
			.iter()
			.map(|item| {
				item.as_str().map(PathBuf::from).ok_or_else(|| {
					ConfigError::Validation("Include array must contain only strings".into())
				})
			})
			.collect(),
		Some(_) => Err(ConfigError::Validation(
			"Include must be a string or array of strings".into(),
		)),
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::fs;
	use tempfile::TempDir;

	const CHAIN: &str = r#"
[chain]
primary = "simulated"
[chain.implementations.simulated]
block_time_ms = 10
"#;

	const ACCOUNT: &str = r#"
[account]
primary = "local"
[account.implementations.local]
private_keys = ["0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80"]
"#;

	#[tokio::test]
	async fn test_single_file_config() {
		let temp_dir = TempDir::new().unwrap();
		let config_path = temp_dir.path().join("config.toml");
		fs::write(
			&config_path,
			format!("[batcher]\nid = \"single\"\n{}{}", CHAIN, ACCOUNT),
		)
		.unwrap();

		let mut loader = ConfigLoader::new(temp_dir.path());
		let config = loader.load_config(&config_path).await.unwrap();

		assert_eq!(config.batcher.id, "single");
	}

	#[tokio::test]
	async fn test_config_with_includes() {
		let temp_dir = TempDir::new().unwrap();
		let main_config = r#"
include = ["chain.toml", "account.toml"]

[batcher]
id = "modular"

[polling]
interval_ms = 250
"#;
		fs::write(temp_dir.path().join("main.toml"), main_config).unwrap();
		fs::write(temp_dir.path().join("chain.toml"), CHAIN).unwrap();
		fs::write(temp_dir.path().join("account.toml"), ACCOUNT).unwrap();

		let config = Config::from_file(temp_dir.path().join("main.toml").to_str().unwrap())
			.await
			.unwrap();

		assert_eq!(config.batcher.id, "modular");
		assert_eq!(config.chain.primary, "simulated");
		assert_eq!(config.account.primary, "local");
		assert_eq!(config.polling.interval_ms, 250);
	}

	#[tokio::test]
	async fn test_duplicate_section_error() {
		let temp_dir = TempDir::new().unwrap();
		let main_config = format!("include = [\"dup.toml\"]\n[batcher]\nid = \"a\"\n{}", CHAIN);
		fs::write(temp_dir.path().join("main.toml"), main_config).unwrap();
		fs::write(
			temp_dir.path().join("dup.toml"),
			format!("{}{}", CHAIN, ACCOUNT),
		)
		.unwrap();

		let mut loader = ConfigLoader::new(temp_dir.path());
		let error = loader.load_config("main.toml").await.unwrap_err();

		assert!(error.to_string().contains("Duplicate section 'chain'"));
	}

	#[tokio::test]
	async fn test_self_include_detection() {
		let temp_dir = TempDir::new().unwrap();
		fs::write(
			temp_dir.path().join("self.toml"),
			"include = [\"self.toml\"]\n[batcher]\nid = \"loop\"\n",
		)
		.unwrap();

		let mut loader = ConfigLoader::new(temp_dir.path());
		let error = loader.load_config("self.toml").await.unwrap_err();

		assert!(error.to_string().contains("already loaded"));
	}

	#[tokio::test]
	async fn test_missing_include() {
		let temp_dir = TempDir::new().unwrap();
		fs::write(
			temp_dir.path().join("main.toml"),
			"include = \"absent.toml\"\n[batcher]\nid = \"x\"\n",
		)
		.unwrap();

		let mut loader = ConfigLoader::new(temp_dir.path());
		let error = loader.load_config("main.toml").await.unwrap_err();

		assert!(matches!(error, ConfigError::Io(_)));
	}
}
