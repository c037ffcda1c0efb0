//! Deployment references file.
//!
//! Records the code id and address of every deployed contract, keyed by chain
//! id and contract name:
//!
//! ```json
//! { "pisco-1": { "cw-member": { "code_id": 117, "address": "terra1..." } } }
//! ```
//!
//! Updates merge into whatever the file already holds and are written through
//! a temporary file that is renamed into place.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use thiserror::Error;
use tokio::fs;

#[derive(Debug, Error)]
pub enum RefsError {
	#[error("Refs file I/O error: {0}")]
	Io(#[from] std::io::Error),
	#[error("Refs file is not valid JSON: {0}")]
	Format(#[from] serde_json::Error),
}

/// What is known about one deployed contract.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractRef {
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub code_id: Option<u64>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub address: Option<String>,
}

/// Contract references per chain, then per contract name.
pub type Refs = BTreeMap<String, BTreeMap<String, ContractRef>>;

pub struct RefsStore {
	path: PathBuf,
}

impl RefsStore {
	pub fn new(path: impl Into<PathBuf>) -> Self {
		Self { path: path.into() }
	}

	/// Reads the file; a missing file is an empty set of refs.
	pub async fn load(&self) -> Result<Refs, RefsError> {
		match fs::read(&self.path).await {
			Ok(data) => Ok(serde_json::from_slice(&data)?),
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Refs::new()),
			Err(e) => Err(e.into()),
		}
	}

	/// Returns the entry for `contract` on `chain_id`, if any.
	pub async fn get(&self, chain_id: &str, contract: &str) -> Result<Option<ContractRef>, RefsError> {
		let refs = self.load().await?;
		Ok(refs
			.get(chain_id)
			.and_then(|contracts| contracts.get(contract))
			.cloned())
	}

	pub async fn record_code_id(
		&self,
		chain_id: &str,
		contract: &str,
		code_id: u64,
	) -> Result<(), RefsError> {
		self.update(chain_id, contract, |entry| entry.code_id = Some(code_id))
			.await
	}

	pub async fn record_address(
		&self,
		chain_id: &str,
		contract: &str,
		address: &str,
	) -> Result<(), RefsError> {
		self.update(chain_id, contract, |entry| {
			entry.address = Some(address.to_string())
		})
		.await
	}

	async fn update<F>(&self, chain_id: &str, contract: &str, apply: F) -> Result<(), RefsError>
	where
		F: FnOnce(&mut ContractRef),
	{
		let mut refs = self.load().await?;
		apply(
			refs.entry(chain_id.to_string())
				.or_default()
				.entry(contract.to_string())
				.or_default(),
		);
		self.save(&refs).await
	}

	async fn save(&self, refs: &Refs) -> Result<(), RefsError> {
		if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
			fs::create_dir_all(parent).await?;
		}

		let data = serde_json::to_vec_pretty(refs)?;
		// Write atomically by writing to temp file then renaming
		let temp_path = self.path.with_extension("tmp");
		fs::write(&temp_path, data).await?;
		fs::rename(&temp_path, &self.path).await?;

		tracing::debug!(path = %self.path.display(), "Saved refs");
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use tempfile::TempDir;

	#[tokio::test]
	async fn test_missing_file_is_empty() {
		let temp_dir = TempDir::new().unwrap();
		let store = RefsStore::new(temp_dir.path().join("refs.json"));

		assert!(store.load().await.unwrap().is_empty());
		assert_eq!(store.get("pisco-1", "cw-member").await.unwrap(), None);
	}

	#[tokio::test]
	async fn test_records_merge() {
		let temp_dir = TempDir::new().unwrap();
		let path = temp_dir.path().join("nested").join("refs.json");
		let store = RefsStore::new(&path);

		store.record_code_id("pisco-1", "cw-member", 117).await.unwrap();
		store
			.record_address("pisco-1", "cw-member", "terra1member")
			.await
			.unwrap();
		store.record_code_id("localterra", "cw-thread", 3).await.unwrap();

		assert_eq!(
			store.get("pisco-1", "cw-member").await.unwrap(),
			Some(ContractRef {
				code_id: Some(117),
				address: Some("terra1member".into()),
			})
		);

		let raw: serde_json::Value =
			serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
		assert_eq!(raw["localterra"]["cw-thread"], serde_json::json!({"code_id": 3}));
		assert!(!path.with_extension("tmp").exists());
	}

	#[tokio::test]
	async fn test_existing_entries_preserved() {
		let temp_dir = TempDir::new().unwrap();
		let path = temp_dir.path().join("refs.json");
		std::fs::write(
			&path,
			r#"{"phoenix-1": {"cw-friend": {"code_id": 9, "address": "terra1friend"}}}"#,
		)
		.unwrap();

		let store = RefsStore::new(&path);
		store.record_code_id("phoenix-1", "cw-member", 10).await.unwrap();

		let refs = store.load().await.unwrap();
		assert_eq!(refs["phoenix-1"]["cw-friend"].code_id, Some(9));
		assert_eq!(refs["phoenix-1"]["cw-member"].code_id, Some(10));
	}

	#[tokio::test]
	async fn test_corrupt_file_reported() {
		let temp_dir = TempDir::new().unwrap();
		let path = temp_dir.path().join("refs.json");
		std::fs::write(&path, "not json").unwrap();

		let result = RefsStore::new(&path).load().await;
		assert!(matches!(result, Err(RefsError::Format(_))));
	}
}
