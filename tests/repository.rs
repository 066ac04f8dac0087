use entire::git::test_utils::TmpRepo;
use serial_test::serial;

#[test]
fn repo_local_config_takes_precedence_over_global() {
    let repo = TmpRepo::new();
    let repository = repo.repository();
    let (name, email) = repository.signature();
    assert_eq!(name, "Test User");
    assert_eq!(email, "test@example.com");
}

/// Mutates the process-wide `HOME` env var to point `git config --global` at a throwaway
/// location, so it must not interleave with any other test reading global git config.
#[test]
#[serial]
fn signature_falls_back_to_user_global_config_when_no_repo_local_identity_is_set() {
    let home = tempfile::tempdir().unwrap();
    std::process::Command::new("git")
        .env("HOME", home.path())
        .args(["config", "--global", "user.name", "Global Person"])
        .status()
        .unwrap();
    std::process::Command::new("git")
        .env("HOME", home.path())
        .args(["config", "--global", "user.email", "global@example.com"])
        .status()
        .unwrap();

    let repo = TmpRepo::new();
    // Undo the repo-local identity the harness sets so the global fallback is exercised.
    std::process::Command::new("git")
        .args(["-C", &repo.path().to_string_lossy(), "config", "--unset", "user.name"])
        .status()
        .unwrap();
    std::process::Command::new("git")
        .args(["-C", &repo.path().to_string_lossy(), "config", "--unset", "user.email"])
        .status()
        .unwrap();

    let original_home = std::env::var_os("HOME");
    std::env::set_var("HOME", home.path());
    let repository = repo.repository();
    let (name, email) = repository.signature();
    if let Some(original_home) = original_home {
        std::env::set_var("HOME", original_home);
    }

    assert_eq!(name, "Global Person");
    assert_eq!(email, "global@example.com");
}
