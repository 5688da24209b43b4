use std::path::{Path, PathBuf};

use chrono::{Datelike, NaiveDate};
use sha2::{Digest, Sha256};

use pecunia_core::AccountId;

use crate::db::{self, DbPool, StorageError};

/// Files a copy of each imported statement under `root/YYYY/MM/` and
/// records its content hash so re-imports of the same file are detected.
pub struct StatementArchiver {
    root: PathBuf,
}

/// What happened to a statement file offered for archiving.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArchiveOutcome {
    /// Copied to the returned path.
    Stored(PathBuf),
    /// Identical content was archived before, at the returned path.
    AlreadyArchived(String),
}

impl StatementArchiver {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Archives `source` for `account_id`, keyed by the import date.
    /// Content identical to a previously archived statement is not copied
    /// again; the existing archive path is returned instead.
    pub async fn archive(
        &self,
        pool: &DbPool,
        account_id: AccountId,
        source: &Path,
        imported_on: NaiveDate,
    ) -> Result<ArchiveOutcome, StorageError> {
        let contents = std::fs::read(source)?;
        let hash = content_hash(&contents);

        if let Some(existing) = db::find_archive_by_hash(pool, &hash).await? {
            tracing::warn!(
                source = %source.display(),
                existing = %existing,
                "statement already archived, skipping copy"
            );
            return Ok(ArchiveOutcome::AlreadyArchived(existing));
        }

        let dir = self
            .root
            .join(format!("{:04}", imported_on.year()))
            .join(format!("{:02}", imported_on.month()));
        std::fs::create_dir_all(&dir)?;

        let destination = dir.join(archive_filename(account_id, source, imported_on));
        std::fs::write(&destination, &contents)?;

        db::insert_archive(
            pool,
            account_id,
            &source
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "statement".to_string()),
            &destination.to_string_lossy(),
            &hash,
        )
        .await?;

        tracing::info!(
            destination = %destination.display(),
            "archived statement"
        );
        Ok(ArchiveOutcome::Stored(destination))
    }
}

fn content_hash(contents: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(contents);
    format!("{:x}", hasher.finalize())
}

fn archive_filename(account_id: AccountId, source: &Path, imported_on: NaiveDate) -> String {
    let stem = source
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "statement".to_string());
    let extension = source
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();
    format!(
        "{}_{}_{}{}",
        account_id.0,
        stem,
        imported_on.format("%Y%m%d"),
        extension
    )
}
