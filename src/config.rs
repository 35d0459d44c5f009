use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};

use crate::error::SeqError;

pub const DEFAULT_CONFIG_FILE: &str = "seqdedup.json";
pub const MAX_SEARCH_TIMEOUT_SECS: u64 = 24 * 60 * 60;

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub upstream: UpstreamSection,
    #[serde(default)]
    pub kv: KvSection,
    #[serde(default)]
    pub sequences: SequencesSection,
    #[serde(default)]
    pub corpus: CorpusSection,
    #[serde(default)]
    pub search: SearchSection,
    #[serde(default)]
    pub server: ServerSection,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct UpstreamSection {
    pub url: String,
    pub graph: String,
    pub page_size: usize,
    pub timeout_secs: u64,
    pub short_delay_secs: u64,
    pub long_delay_secs: u64,
}

impl Default for UpstreamSection {
    fn default() -> Self {
        Self {
            url: "https://synbiohub.org/sparql".to_string(),
            graph: "public".to_string(),
            page_size: 100,
            timeout_secs: 60,
            short_delay_secs: 2,
            long_delay_secs: 4 * 60 * 60,
        }
    }
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct KvSection {
    pub url: String,
    pub cursor_key: String,
    pub dedup_set_key: String,
    pub sequence_prefix: String,
}

impl Default for KvSection {
    fn default() -> Self {
        let keys = KvKeys::default();
        Self {
            url: "redis://127.0.0.1:6379/".to_string(),
            cursor_key: keys.cursor_key,
            dedup_set_key: keys.dedup_set_key,
            sequence_prefix: keys.sequence_prefix,
        }
    }
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct SequencesSection {
    pub dir: String,
}

impl Default for SequencesSection {
    fn default() -> Self {
        Self {
            dir: "/var/synbioblast/fastas".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct CorpusSection {
    pub dir: String,
    pub name: String,
    pub builder: String,
}

impl Default for CorpusSection {
    fn default() -> Self {
        Self {
            dir: "/var/synbioblast/blastdbs".to_string(),
            name: "SynBioHub".to_string(),
            builder: "makeblastdb".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct SearchSection {
    pub program: String,
    pub timeout_secs: u64,
}

impl Default for SearchSection {
    fn default() -> Self {
        Self {
            program: "blastn".to_string(),
            timeout_secs: 120,
        }
    }
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerSection {
    pub port: u16,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self { port: 9090 }
    }
}

/// Key names shared by the cursor and the dedup index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KvKeys {
    pub cursor_key: String,
    pub dedup_set_key: String,
    /// Per-hash identifier sets live at `<prefix>:<hash>`.
    pub sequence_prefix: String,
}

impl Default for KvKeys {
    fn default() -> Self {
        Self {
            cursor_key: "sequenceoffset".to_string(),
            dedup_set_key: "sequenceHashSet".to_string(),
            sequence_prefix: "sequence".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct HarvestSettings {
    pub upstream_url: String,
    pub graph: String,
    pub page_size: usize,
    pub request_timeout: Duration,
    pub short_delay: Duration,
    pub long_delay: Duration,
}

#[derive(Debug, Clone)]
pub struct CorpusSettings {
    pub dir: Utf8PathBuf,
    pub name: String,
    pub builder: String,
}

#[derive(Debug, Clone)]
pub struct SearchSettings {
    pub program: String,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub harvest: HarvestSettings,
    pub kv_url: String,
    pub kv_keys: KvKeys,
    pub sequence_dir: Utf8PathBuf,
    pub corpus: CorpusSettings,
    pub search: SearchSettings,
    pub port: u16,
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Loads `path`, or `seqdedup.json` in the working directory. Only the
    /// implicit default location may be missing, in which case defaults apply.
    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, SeqError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from(DEFAULT_CONFIG_FILE),
        };

        if path.is_none() && !config_path.exists() {
            return Self::resolve_config(Config::default());
        }

        let content = fs::read_to_string(&config_path)
            .map_err(|_| SeqError::ConfigRead(config_path.clone()))?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|err| SeqError::ConfigParse(err.to_string()))?;

        Self::resolve_config(config)
    }

    pub fn resolve_config(config: Config) -> Result<ResolvedConfig, SeqError> {
        if config.upstream.page_size == 0 {
            return Err(SeqError::ConfigParse(
                "upstream.page_size must be greater than zero".to_string(),
            ));
        }
        if config.search.timeout_secs == 0 || config.search.timeout_secs > MAX_SEARCH_TIMEOUT_SECS {
            return Err(SeqError::ConfigParse(format!(
                "search.timeout_secs must be between 1 and {MAX_SEARCH_TIMEOUT_SECS}"
            )));
        }
        if config.kv.sequence_prefix.is_empty() {
            return Err(SeqError::ConfigParse(
                "kv.sequence_prefix must not be empty".to_string(),
            ));
        }

        Ok(ResolvedConfig {
            harvest: HarvestSettings {
                upstream_url: config.upstream.url,
                graph: config.upstream.graph,
                page_size: config.upstream.page_size,
                request_timeout: Duration::from_secs(config.upstream.timeout_secs),
                short_delay: Duration::from_secs(config.upstream.short_delay_secs),
                long_delay: Duration::from_secs(config.upstream.long_delay_secs),
            },
            kv_url: config.kv.url,
            kv_keys: KvKeys {
                cursor_key: config.kv.cursor_key,
                dedup_set_key: config.kv.dedup_set_key,
                sequence_prefix: config.kv.sequence_prefix,
            },
            sequence_dir: Utf8PathBuf::from(config.sequences.dir),
            corpus: CorpusSettings {
                dir: Utf8PathBuf::from(config.corpus.dir),
                name: config.corpus.name,
                builder: config.corpus.builder,
            },
            search: SearchSettings {
                program: config.search.program,
                timeout: Duration::from_secs(config.search.timeout_secs),
            },
            port: config.server.port,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_deployment() {
        let resolved = ConfigLoader::resolve_config(Config::default()).unwrap();
        assert_eq!(resolved.harvest.page_size, 100);
        assert_eq!(resolved.harvest.long_delay, Duration::from_secs(14_400));
        assert_eq!(resolved.harvest.short_delay, Duration::from_secs(2));
        assert_eq!(resolved.kv_keys, KvKeys::default());
        assert_eq!(resolved.corpus.name, "SynBioHub");
        assert_eq!(resolved.port, 9090);
    }

    #[test]
    fn partial_sections_keep_defaults() {
        let config: Config =
            serde_json::from_str(r#"{"upstream": {"page_size": 25}, "kv": {"cursor_key": "off"}}"#)
                .unwrap();
        let resolved = ConfigLoader::resolve_config(config).unwrap();
        assert_eq!(resolved.harvest.page_size, 25);
        assert_eq!(resolved.harvest.graph, "public");
        assert_eq!(resolved.kv_keys.cursor_key, "off");
        assert_eq!(resolved.kv_keys.dedup_set_key, "sequenceHashSet");
    }

    #[test]
    fn zero_page_size_is_rejected() {
        let config: Config = serde_json::from_str(r#"{"upstream": {"page_size": 0}}"#).unwrap();
        assert!(ConfigLoader::resolve_config(config).is_err());
    }
}
