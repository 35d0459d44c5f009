use std::fs;
use std::io::{self, Write};

use camino::{Utf8Path, Utf8PathBuf};
use tempfile::Builder;
use tracing::debug;

use crate::domain::{ContentHash, NormalizedSequence};
use crate::error::SeqError;

pub const SEQUENCE_EXT: &str = "fasta";

/// Content-addressed sequence files, one FASTA file per hash.
///
/// Files are write-once: there is no update or delete.
#[derive(Debug, Clone)]
pub struct SequenceStore {
    root: Utf8PathBuf,
}

impl SequenceStore {
    pub fn new(root: Utf8PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    pub fn ensure_root(&self) -> Result<(), SeqError> {
        fs::create_dir_all(self.root.as_std_path())
            .map_err(|err| SeqError::StoreWriteFailed(format!("{}: {err}", self.root)))
    }

    pub fn path_for(&self, hash: &ContentHash) -> Utf8PathBuf {
        self.root.join(format!("{hash}.{SEQUENCE_EXT}"))
    }

    pub fn exists(&self, hash: &ContentHash) -> bool {
        self.path_for(hash).as_std_path().is_file()
    }

    /// Persists `sequence` under `hash` unless a file is already there.
    /// Returns `true` when a new file was written.
    pub fn write_if_absent(
        &self,
        hash: &ContentHash,
        sequence: &NormalizedSequence,
    ) -> Result<bool, SeqError> {
        let path = self.path_for(hash);
        if path.as_std_path().is_file() {
            return Ok(false);
        }
        self.ensure_root()?;

        let mut temp = Builder::new()
            .prefix(".seq")
            .suffix(".tmp")
            .tempfile_in(self.root.as_std_path())
            .map_err(|err| SeqError::StoreWriteFailed(err.to_string()))?;
        temp.write_all(render_fasta(hash, sequence).as_bytes())
            .map_err(|err| SeqError::StoreWriteFailed(err.to_string()))?;
        temp.as_file()
            .sync_all()
            .map_err(|err| SeqError::StoreWriteFailed(err.to_string()))?;

        match temp.persist_noclobber(path.as_std_path()) {
            Ok(_) => {
                debug!(%hash, path = %path, "wrote sequence file");
                Ok(true)
            }
            Err(err) if err.error.kind() == io::ErrorKind::AlreadyExists => Ok(false),
            Err(err) => Err(SeqError::StoreWriteFailed(format!("{path}: {}", err.error))),
        }
    }

    pub fn read(&self, hash: &ContentHash) -> Result<Option<NormalizedSequence>, SeqError> {
        let path = self.path_for(hash);
        if !path.as_std_path().is_file() {
            return Ok(None);
        }
        let content = fs::read_to_string(path.as_std_path())
            .map_err(|err| SeqError::Filesystem(format!("{path}: {err}")))?;
        parse_fasta(&content)
            .map(|(_, sequence)| Some(sequence))
            .ok_or_else(|| SeqError::Filesystem(format!("{path}: not a sequence file")))
    }

    /// Every stored hash, sorted.
    pub fn list_hashes(&self) -> Result<Vec<ContentHash>, SeqError> {
        if !self.root.as_std_path().exists() {
            return Ok(Vec::new());
        }
        let entries = fs::read_dir(self.root.as_std_path())
            .map_err(|err| SeqError::Filesystem(err.to_string()))?;
        let mut hashes = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|err| SeqError::Filesystem(err.to_string()))?;
            let path = entry.path();
            let is_sequence = path
                .extension()
                .map(|ext| ext == SEQUENCE_EXT)
                .unwrap_or(false);
            if !is_sequence || !path.is_file() {
                continue;
            }
            if let Some(hash) = path
                .file_stem()
                .and_then(|stem| stem.to_str())
                .and_then(|stem| stem.parse::<ContentHash>().ok())
            {
                hashes.push(hash);
            }
        }
        hashes.sort();
        Ok(hashes)
    }
}

pub fn render_fasta(hash: &ContentHash, sequence: &NormalizedSequence) -> String {
    format!(">{hash}\n{sequence}\n")
}

fn parse_fasta(content: &str) -> Option<(String, NormalizedSequence)> {
    let mut lines = content.lines();
    let header = lines.next()?.strip_prefix('>')?.trim().to_string();
    let body = lines.map(str::trim).collect::<String>();
    Some((header, NormalizedSequence::new(&body)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::content_hash;

    #[test]
    fn fasta_layout() {
        let sequence = NormalizedSequence::new("ACGT");
        let hash = content_hash(&sequence);
        assert_eq!(render_fasta(&hash, &sequence), format!(">{hash}\nacgt\n"));
    }

    #[test]
    fn parse_fasta_joins_wrapped_lines() {
        let (header, sequence) = parse_fasta(">abc\nacg\ntt\n").unwrap();
        assert_eq!(header, "abc");
        assert_eq!(sequence.as_str(), "acgtt");
        assert!(parse_fasta("acgt").is_none());
    }
}
