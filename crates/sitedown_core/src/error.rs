use std::path::PathBuf;

use thiserror::Error;

/// A precondition failure that prevents any mutation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BlockingError {
    /// A registered config file is not present on disk.
    #[error("Missing config file: {}", .path.display())]
    MissingConfigFile { path: PathBuf },
    /// Apply mode found nothing to comment out in a config file.
    #[error(
        "No active matching lines found in {}. Use --allow-missing to skip this safety check.",
        .path.display()
    )]
    NoActiveMatches { path: PathBuf },
    /// The site directory is not present under the sites root.
    #[error("Site directory does not exist: {}", .path.display())]
    MissingSiteDirectory { path: PathBuf },
    /// The site directory already lives directly under the archive directory.
    #[error("Site directory is already under archive: {}", .path.display())]
    AlreadyArchived { path: PathBuf },
    /// The archive directory is the site directory or lies inside it.
    #[error(
        "Archive directory {} is inside site directory {}",
        .archive_dir.display(),
        .site_dir.display()
    )]
    ArchiveInsideSite {
        site_dir: PathBuf,
        archive_dir: PathBuf,
    },
}

/// Accumulates blocking errors across independent checks.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Preconditions {
    errors: Vec<BlockingError>,
}

impl Preconditions {
    pub fn push(&mut self, error: BlockingError) {
        self.errors.push(error);
    }

    pub fn is_blocked(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn errors(&self) -> &[BlockingError] {
        &self.errors
    }

    pub fn into_errors(self) -> Vec<BlockingError> {
        self.errors
    }
}
