use camino::Utf8PathBuf;
use tempfile::TempDir;

use seqdedup::domain::{ContentHash, NormalizedSequence};
use seqdedup::hash::content_hash;
use seqdedup::sequences::SequenceStore;

fn store(temp: &TempDir) -> SequenceStore {
    SequenceStore::new(Utf8PathBuf::from_path_buf(temp.path().join("fastas")).unwrap())
}

#[test]
fn file_is_named_after_hash() {
    let temp = TempDir::new().unwrap();
    let store = store(&temp);
    let sequence = NormalizedSequence::new("ACGT");
    let hash = content_hash(&sequence);

    assert!(store.write_if_absent(&hash, &sequence).unwrap());

    let path = store.path_for(&hash);
    assert!(path.ends_with("9482340281b5fc8f2a298dbbd6b82fe42159b6c5.fasta"));
    assert_eq!(
        std::fs::read_to_string(&path).unwrap(),
        ">9482340281b5fc8f2a298dbbd6b82fe42159b6c5\nacgt\n"
    );
}

#[test]
fn second_write_is_a_no_op() {
    let temp = TempDir::new().unwrap();
    let store = store(&temp);
    let sequence = NormalizedSequence::new("gattaca");
    let hash = content_hash(&sequence);

    assert!(store.write_if_absent(&hash, &sequence).unwrap());
    let first = std::fs::metadata(store.path_for(&hash)).unwrap().modified().unwrap();
    assert!(!store.write_if_absent(&hash, &sequence).unwrap());
    let second = std::fs::metadata(store.path_for(&hash)).unwrap().modified().unwrap();

    assert_eq!(first, second);
    assert_eq!(store.list_hashes().unwrap(), vec![hash.clone()]);
    assert_eq!(store.read(&hash).unwrap(), Some(sequence));
}

#[test]
fn temporary_and_foreign_files_are_not_listed() {
    let temp = TempDir::new().unwrap();
    let store = store(&temp);
    store.ensure_root().unwrap();
    let root = store.root().as_std_path();
    std::fs::write(root.join(".seq123.tmp"), "partial").unwrap();
    std::fs::write(root.join("notes.txt"), "hello").unwrap();
    std::fs::write(root.join("not-a-hash.fasta"), ">x\nacgt\n").unwrap();

    assert!(store.list_hashes().unwrap().is_empty());
}

#[test]
fn unknown_hash_reads_as_none() {
    let temp = TempDir::new().unwrap();
    let store = store(&temp);
    let hash: ContentHash = "da39a3ee5e6b4b0d3255bfef95601890afd80709".parse().unwrap();

    assert!(!store.exists(&hash));
    assert_eq!(store.read(&hash).unwrap(), None);
    assert!(store.list_hashes().unwrap().is_empty());
}

#[test]
fn concurrent_writers_leave_one_file() {
    let temp = TempDir::new().unwrap();
    let store = store(&temp);
    let sequence = NormalizedSequence::new("ccccgggg");
    let hash = content_hash(&sequence);

    let written = std::thread::scope(|scope| {
        let handles = (0..4)
            .map(|_| scope.spawn(|| store.write_if_absent(&hash, &sequence).unwrap()))
            .collect::<Vec<_>>();
        handles
            .into_iter()
            .map(|handle| handle.join().unwrap())
            .filter(|written| *written)
            .count()
    });

    assert_eq!(written, 1);
    assert_eq!(store.list_hashes().unwrap().len(), 1);
}
