use entire::store::committed::{CommittedStore, WriteCommittedOptions};
use entire::git::test_utils::TmpRepo;

#[test]
fn checkpoint_summary_json_shape_is_stable() {
    let repo = TmpRepo::new();
    let repository = repo.repository();
    let store = CommittedStore::new(&repository);

    let id = "cafefeedface";
    store
        .write_committed(&WriteCommittedOptions {
            checkpoint_id: id.to_string(),
            session_id: "sess-1".to_string(),
            strategy: "auto".to_string(),
            branch: "main".to_string(),
            files_touched: vec!["src/lib.rs".to_string()],
            agent: "claude-code".to_string(),
            turn_id: "turn-1".to_string(),
            is_task: false,
            tool_use_id: None,
            transcript_start_offset: 0,
            token_usage: None,
            transcript: Some(b"{}\n".to_vec()),
            transcript_path: None,
            prompts: vec!["fix the thing".to_string()],
            context: Vec::new(),
            metadata_dir: None,
        })
        .unwrap();

    let checkpoint = store.read_committed(id).unwrap().unwrap();
    // Field order and naming of the on-disk summary is part of the external interface;
    // pin it so an accidental rename shows up as a diff here rather than downstream.
    insta::assert_json_snapshot!(checkpoint.summary, {
        ".cli_version" => "[cli_version]",
        ".created_at" => "[created_at]",
    });
}
