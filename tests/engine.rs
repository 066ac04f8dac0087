use entire::engine::{CheckpointEngine, TurnStartOptions};
use entire::fsm::Phase;
use entire::git::object_store::ObjectStore;
use entire::git::test_utils::TmpRepo;
use entire::session::SessionState;
use entire::store::temporary::shadow_ref;

#[test]
fn turn_start_creates_an_active_session_bound_to_head() {
    let repo = TmpRepo::new();
    repo.write_file("a.txt", "v1\n");
    let base = repo.commit_with_message("initial");

    let repository = repo.repository();
    let engine = CheckpointEngine::new(&repository);
    let session = engine
        .turn_start(&TurnStartOptions {
            session_id: "sess-1".to_string(),
            agent: "claude-code".to_string(),
            prompt: Some("write a test".to_string()),
            worktree_id: String::new(),
        })
        .unwrap();

    assert_eq!(session.phase(), Phase::Active);
    assert_eq!(session.base_commit, base);
    assert_eq!(session.pending_prompt.as_deref(), Some("write a test"));
}

#[test]
fn a_commit_that_matches_session_content_earns_a_checkpoint_and_carries_the_rest_forward() {
    let repo = TmpRepo::new();
    repo.write_file("a.txt", "v1\n");
    repo.write_file("b.txt", "v1\n");
    let _base = repo.commit_with_message("initial");

    let repository = repo.repository();
    let engine = CheckpointEngine::new(&repository);
    engine
        .turn_start(&TurnStartOptions {
            session_id: "sess-1".to_string(),
            agent: "claude-code".to_string(),
            prompt: Some("edit two files".to_string()),
            worktree_id: String::new(),
        })
        .unwrap();

    // The agent edits both files and records a shadow checkpoint for them.
    repo.write_file("a.txt", "v2 from agent\n");
    repo.write_file("b.txt", "v2 from agent\n");
    engine
        .save_temporary(
            "sess-1",
            vec!["a.txt".to_string(), "b.txt".to_string()],
            Vec::new(),
            Vec::new(),
            false,
        )
        .unwrap();

    // The user commits only `a.txt`, with exactly the content the session wrote.
    repo.commit_path_with_message("a.txt", "user commit");

    let checkpoint_id = engine.post_commit("sess-1").unwrap();
    assert!(checkpoint_id.is_some());

    let session = SessionState::load(&repository, "sess-1").unwrap().unwrap();
    assert!(!session.files_touched.contains_key("a.txt"));
    assert!(session.files_touched.contains_key("b.txt"));

    let committed = entire::store::committed::CommittedStore::new(&repository);
    let checkpoint = committed.read_committed(&checkpoint_id.unwrap()).unwrap().unwrap();
    assert_eq!(checkpoint.metadata.session_id, "sess-1");
}

#[test]
fn a_commit_with_unrelated_content_earns_no_checkpoint() {
    let repo = TmpRepo::new();
    repo.write_file("a.txt", "v1\n");
    let _base = repo.commit_with_message("initial");

    let repository = repo.repository();
    let engine = CheckpointEngine::new(&repository);
    engine
        .turn_start(&TurnStartOptions {
            session_id: "sess-1".to_string(),
            agent: "claude-code".to_string(),
            prompt: None,
            worktree_id: String::new(),
        })
        .unwrap();

    repo.write_file("a.txt", "agent content\n");
    engine
        .save_temporary("sess-1", vec!["a.txt".to_string()], Vec::new(), Vec::new(), false)
        .unwrap();

    // A human reverts to something the session never wrote before committing.
    repo.write_file("a.txt", "completely different human edit\n");
    repo.commit_with_message("human edit");

    let checkpoint_id = engine.post_commit("sess-1").unwrap();
    assert!(checkpoint_id.is_none());

    let session = SessionState::load(&repository, "sess-1").unwrap().unwrap();
    assert!(session.files_touched.contains_key("a.txt"));
}

#[test]
fn shadow_ref_survives_post_commit_while_the_session_is_still_active() {
    let repo = TmpRepo::new();
    repo.write_file("a.txt", "v1\n");
    let _base = repo.commit_with_message("initial");

    let repository = repo.repository();
    let engine = CheckpointEngine::new(&repository);
    let session = engine
        .turn_start(&TurnStartOptions {
            session_id: "sess-1".to_string(),
            agent: "claude-code".to_string(),
            prompt: None,
            worktree_id: String::new(),
        })
        .unwrap();
    let base_commit = session.base_commit.clone();

    repo.write_file("a.txt", "agent content\n");
    engine
        .save_temporary("sess-1", vec!["a.txt".to_string()], Vec::new(), Vec::new(), false)
        .unwrap();
    repo.commit_with_message("user commit matching agent content");

    engine.post_commit("sess-1").unwrap();

    let object_store = ObjectStore::new(&repository);
    let ref_name = shadow_ref(&base_commit, "");
    assert!(object_store.resolve_ref(&format!("refs/{ref_name}")).unwrap().is_some());
}

#[test]
fn shadow_ref_is_removed_once_an_idle_session_is_fully_absorbed() {
    let repo = TmpRepo::new();
    repo.write_file("a.txt", "v1\n");
    let _base = repo.commit_with_message("initial");

    let repository = repo.repository();
    let engine = CheckpointEngine::new(&repository);
    let session = engine
        .turn_start(&TurnStartOptions {
            session_id: "sess-1".to_string(),
            agent: "claude-code".to_string(),
            prompt: None,
            worktree_id: String::new(),
        })
        .unwrap();
    let base_commit = session.base_commit.clone();

    repo.write_file("a.txt", "agent content\n");
    engine
        .save_temporary("sess-1", vec!["a.txt".to_string()], Vec::new(), Vec::new(), false)
        .unwrap();
    engine.turn_end("sess-1").unwrap();

    repo.commit_with_message("user commit matching agent content after turn end");
    engine.post_commit("sess-1").unwrap();

    let object_store = ObjectStore::new(&repository);
    let ref_name = shadow_ref(&base_commit, "");
    assert!(object_store.resolve_ref(&format!("refs/{ref_name}")).unwrap().is_none());
}
