use entire::store::committed::{CommittedStore, WriteCommittedOptions};
use entire::git::test_utils::TmpRepo;

fn opts(checkpoint_id: &str, session_id: &str, files: &[&str]) -> WriteCommittedOptions {
    WriteCommittedOptions {
        checkpoint_id: checkpoint_id.to_string(),
        session_id: session_id.to_string(),
        strategy: "auto".to_string(),
        branch: "main".to_string(),
        files_touched: files.iter().map(|s| s.to_string()).collect(),
        agent: "claude-code".to_string(),
        turn_id: "turn-1".to_string(),
        is_task: false,
        tool_use_id: None,
        transcript_start_offset: 0,
        token_usage: None,
        transcript: Some(br#"{"type":"user","text":"hi","timestamp":"t0"}"#.to_vec()),
        transcript_path: None,
        prompts: vec!["do the thing".to_string()],
        context: b"# context\n".to_vec(),
        metadata_dir: None,
    }
}

#[test]
fn write_then_read_round_trips_modulo_generated_fields() {
    let repo = TmpRepo::new();
    let repository = repo.repository();
    let store = CommittedStore::new(&repository);

    let id = "0123456789ab";
    store.write_committed(&opts(id, "sess-1", &["src/main.rs"])).unwrap();

    let read = store.read_committed(id).unwrap().unwrap();
    assert_eq!(read.metadata.session_id, "sess-1");
    assert_eq!(read.metadata.agent, "claude-code");
    assert_eq!(read.metadata.files_touched, vec!["src/main.rs".to_string()]);
    assert_eq!(read.prompts, "do the thing");
    assert_eq!(read.context, b"# context\n".to_vec());
    assert_eq!(read.transcript, br#"{"type":"user","text":"hi","timestamp":"t0"}"#.to_vec());
    assert_eq!(read.summary.session_count, 1);
    assert_eq!(read.summary.session_ids, vec!["sess-1".to_string()]);
}

#[test]
fn every_path_lives_under_its_sharded_prefix() {
    let repo = TmpRepo::new();
    let repository = repo.repository();
    let store = CommittedStore::new(&repository);

    let id = "abcdef012345";
    store.write_committed(&opts(id, "sess-1", &["a.txt"])).unwrap();

    let object_store = entire::git::object_store::ObjectStore::new(&repository);
    let head = object_store
        .resolve_ref(&format!("refs/{}", entire::config::Config::get().permanent_ref(&repository)))
        .unwrap()
        .unwrap();
    let tree = object_store.read_commit(&head).unwrap().tree;
    let mut flat = std::collections::BTreeMap::new();
    entire::git::tree_builder::flatten(&object_store, &tree, "", &mut flat).unwrap();

    for path in flat.keys() {
        assert!(path.starts_with("ab/cdef012345/"), "unexpected path {path}");
    }
}

#[test]
fn a_second_session_on_the_same_checkpoint_archives_the_first() {
    let repo = TmpRepo::new();
    let repository = repo.repository();
    let store = CommittedStore::new(&repository);

    let id = "1111222233ee";
    store.write_committed(&opts(id, "sess-1", &["a.txt"])).unwrap();
    store.write_committed(&opts(id, "sess-2", &["b.txt"])).unwrap();

    let read = store.read_committed(id).unwrap().unwrap();
    assert_eq!(read.summary.session_count, 2);
    assert_eq!(read.summary.session_ids, vec!["sess-1".to_string(), "sess-2".to_string()]);
    // `0/` now holds the latest writer.
    assert_eq!(read.metadata.session_id, "sess-2");

    // The first session's content was archived to `1/`.
    let archived = store.read_session_content(id, 1).unwrap().unwrap();
    assert_eq!(archived.metadata.session_id, "sess-1");
}

#[test]
fn files_touched_merges_sorted_and_deduplicated_across_sessions() {
    let repo = TmpRepo::new();
    let repository = repo.repository();
    let store = CommittedStore::new(&repository);

    let id = "deadbeefcafe";
    store.write_committed(&opts(id, "sess-1", &["b.txt", "a.txt"])).unwrap();
    store.write_committed(&opts(id, "sess-2", &["a.txt", "c.txt"])).unwrap();

    let read = store.read_committed(id).unwrap().unwrap();
    assert_eq!(
        read.summary.files_touched,
        vec!["a.txt".to_string(), "b.txt".to_string(), "c.txt".to_string()]
    );
}

#[test]
fn update_committed_replaces_transcript_without_leaving_stale_chunks() {
    let repo = TmpRepo::new();
    let repository = repo.repository();
    let store = CommittedStore::new(&repository);

    let id = "aaaabbbbcccc";
    store.write_committed(&opts(id, "sess-1", &["a.txt"])).unwrap();

    let update = entire::store::committed::UpdateCommittedOptions {
        checkpoint_id: id.to_string(),
        session_id: "sess-1".to_string(),
        transcript: Some(b"final transcript".to_vec()),
        transcript_path: None,
        prompts: vec!["do the thing".to_string(), "and finish it".to_string()],
        context: b"# final context\n".to_vec(),
    };
    store.update_committed(&update).unwrap();

    let read = store.read_committed(id).unwrap().unwrap();
    assert_eq!(read.transcript, b"final transcript".to_vec());
    assert_eq!(read.prompts, "do the thing\n\n---\n\nand finish it");
}

#[test]
fn update_committed_on_an_unknown_checkpoint_fails() {
    let repo = TmpRepo::new();
    let repository = repo.repository();
    let store = CommittedStore::new(&repository);

    let update = entire::store::committed::UpdateCommittedOptions {
        checkpoint_id: "000000000000".to_string(),
        session_id: "sess-1".to_string(),
        transcript: None,
        transcript_path: None,
        prompts: Vec::new(),
        context: Vec::new(),
    };
    let err = store.update_committed(&update).unwrap_err();
    assert!(matches!(err, entire::error::EntireError::CheckpointNotFound(_)));
}

#[test]
fn list_committed_sorts_by_created_at_descending() {
    let repo = TmpRepo::new();
    let repository = repo.repository();
    let store = CommittedStore::new(&repository);

    store.write_committed(&opts("111111111111", "sess-1", &["a.txt"])).unwrap();
    std::thread::sleep(std::time::Duration::from_millis(10));
    store.write_committed(&opts("333333333333", "sess-1", &["b.txt"])).unwrap();
    std::thread::sleep(std::time::Duration::from_millis(10));
    store.write_committed(&opts("222222222222", "sess-1", &["c.txt"])).unwrap();

    let listed = store.list_committed().unwrap();
    let ids: Vec<&str> = listed.iter().map(|s| s.checkpoint_id.as_str()).collect();
    assert_eq!(ids, vec!["222222222222", "333333333333", "111111111111"]);
}
