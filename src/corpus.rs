use std::fs;
use std::io::{BufWriter, Write};
use std::process::{Command, Stdio};

use camino::Utf8PathBuf;
use serde::Serialize;
use tempfile::Builder;
use tracing::info;

use crate::config::CorpusSettings;
use crate::error::SeqError;
use crate::search::resolve_program;
use crate::sequences::SequenceStore;

#[derive(Debug, Clone, Serialize)]
pub struct CorpusBuildResult {
    pub sequences: usize,
    pub fasta_path: String,
    pub db_path: String,
}

/// Concatenates every stored sequence file into one FASTA and hands it to the
/// search tool's index builder.
pub struct CorpusBuilder {
    settings: CorpusSettings,
}

impl CorpusBuilder {
    pub fn new(settings: CorpusSettings) -> Self {
        Self { settings }
    }

    pub fn fasta_path(&self) -> Utf8PathBuf {
        self.settings.dir.join(format!("{}.fasta", self.settings.name))
    }

    pub fn db_path(&self) -> Utf8PathBuf {
        self.settings.dir.join(&self.settings.name)
    }

    /// Writes the combined FASTA, sorted by hash. Returns the number of
    /// sequences included.
    pub fn concatenate(&self, store: &SequenceStore) -> Result<usize, SeqError> {
        fs::create_dir_all(self.settings.dir.as_std_path())
            .map_err(|err| SeqError::Filesystem(err.to_string()))?;
        let target = self.fasta_path();
        let temp = Builder::new()
            .prefix(".corpus")
            .tempfile_in(self.settings.dir.as_std_path())
            .map_err(|err| SeqError::Filesystem(err.to_string()))?;

        let hashes = store.list_hashes()?;
        {
            let mut writer = BufWriter::new(temp.as_file());
            for hash in &hashes {
                let content = fs::read(store.path_for(hash).as_std_path())
                    .map_err(|err| SeqError::Filesystem(format!("{hash}: {err}")))?;
                writer
                    .write_all(&content)
                    .map_err(|err| SeqError::Filesystem(err.to_string()))?;
                if !content.ends_with(b"\n") {
                    writer
                        .write_all(b"\n")
                        .map_err(|err| SeqError::Filesystem(err.to_string()))?;
                }
            }
            writer
                .flush()
                .map_err(|err| SeqError::Filesystem(err.to_string()))?;
        }
        temp.persist(target.as_std_path())
            .map_err(|err| SeqError::Filesystem(err.to_string()))?;
        info!(sequences = hashes.len(), path = %target, "wrote corpus fasta");
        Ok(hashes.len())
    }

    pub fn build(&self, store: &SequenceStore) -> Result<CorpusBuildResult, SeqError> {
        let builder = resolve_program(&self.settings.builder)
            .ok_or_else(|| SeqError::MissingTool(self.settings.builder.clone()))?;
        let sequences = self.concatenate(store)?;
        let fasta = self.fasta_path();
        let db = self.db_path();

        let output = Command::new(&builder)
            .args([
                "-in",
                fasta.as_str(),
                "-dbtype",
                "nucl",
                "-out",
                db.as_str(),
                "-title",
                self.settings.name.as_str(),
            ])
            .stdin(Stdio::null())
            .output()
            .map_err(|err| SeqError::CorpusBuild(format!("{}: {err}", builder.display())))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            let message = if stderr.is_empty() {
                format!("{} exited with {}", builder.display(), output.status)
            } else {
                stderr
            };
            return Err(SeqError::CorpusBuild(message));
        }
        info!(sequences, db = %db, "corpus index built");

        Ok(CorpusBuildResult {
            sequences,
            fasta_path: fasta.to_string(),
            db_path: db.to_string(),
        })
    }
}
