use std::io::Write;
use std::time::Duration;

use assert_matches::assert_matches;
use tempfile::NamedTempFile;

use seqdedup::config::{Config, ConfigLoader};
use seqdedup::error::SeqError;

fn config_file(content: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file
}

#[test]
fn file_overrides_defaults() {
    let file = config_file(
        r#"{
            "upstream": {"url": "https://sbh.example.org/sparql", "page_size": 50, "long_delay_secs": 600},
            "kv": {"url": "memory://"},
            "sequences": {"dir": "/data/fastas"},
            "corpus": {"dir": "/data/blastdbs", "name": "Parts"},
            "search": {"program": "/opt/blast/bin/blastn", "timeout_secs": 30},
            "server": {"port": 8080}
        }"#,
    );

    let resolved = ConfigLoader::resolve(file.path().to_str()).unwrap();

    assert_eq!(resolved.harvest.upstream_url, "https://sbh.example.org/sparql");
    assert_eq!(resolved.harvest.page_size, 50);
    assert_eq!(resolved.harvest.short_delay, Duration::from_secs(2));
    assert_eq!(resolved.harvest.long_delay, Duration::from_secs(600));
    assert_eq!(resolved.kv_url, "memory://");
    assert_eq!(resolved.kv_keys.cursor_key, "sequenceoffset");
    assert_eq!(resolved.sequence_dir.as_str(), "/data/fastas");
    assert_eq!(resolved.corpus.dir.as_str(), "/data/blastdbs");
    assert_eq!(resolved.corpus.name, "Parts");
    assert_eq!(resolved.corpus.builder, "makeblastdb");
    assert_eq!(resolved.search.program, "/opt/blast/bin/blastn");
    assert_eq!(resolved.search.timeout, Duration::from_secs(30));
    assert_eq!(resolved.port, 8080);
}

#[test]
fn explicit_missing_file_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("absent.json");
    assert_matches!(
        ConfigLoader::resolve(path.to_str()),
        Err(SeqError::ConfigRead(_))
    );
}

#[test]
fn invalid_json_is_a_parse_error() {
    let file = config_file("{ upstream: ");
    assert_matches!(
        ConfigLoader::resolve(file.path().to_str()),
        Err(SeqError::ConfigParse(_))
    );
}

#[test]
fn out_of_range_search_timeout_is_rejected() {
    let config: Config =
        serde_json::from_str(r#"{"search": {"timeout_secs": 18446744073709551615}}"#).unwrap();
    assert_matches!(
        ConfigLoader::resolve_config(config),
        Err(SeqError::ConfigParse(_))
    );
}

#[test]
fn zero_search_timeout_is_rejected() {
    let config: Config = serde_json::from_str(r#"{"search": {"timeout_secs": 0}}"#).unwrap();
    assert_matches!(
        ConfigLoader::resolve_config(config),
        Err(SeqError::ConfigParse(_))
    );
}
