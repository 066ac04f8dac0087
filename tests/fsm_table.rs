use entire::fsm::{transition, Action, Context, Event, Phase};
use rstest::rstest;

#[rstest]
#[case(Phase::Idle, Event::TurnStart, Phase::Active)]
#[case(Phase::Active, Event::TurnEnd, Phase::Idle)]
#[case(Phase::Active, Event::SessionStop, Phase::Ended)]
#[case(Phase::Ended, Event::SessionStart, Phase::Idle)]
#[case(Phase::Ended, Event::TurnStart, Phase::Active)]
fn transition_reaches_the_expected_phase(#[case] phase: Phase, #[case] event: Event, #[case] expected: Phase) {
    let (next, _) = transition(phase, event, Context::default());
    assert_eq!(next, expected);
}

#[rstest]
#[case(Phase::Idle, false)]
#[case(Phase::Active, false)]
#[case(Phase::Ended, true)]
fn git_commit_with_no_files_touched_discards_only_when_ended(#[case] phase: Phase, #[case] expect_discard: bool) {
    let ctx = Context { has_files_touched: false, is_rebase_in_progress: false };
    let (_, actions) = transition(phase, Event::GitCommit, ctx);
    assert_eq!(actions.contains(&Action::DiscardIfNoFiles), expect_discard);
}

#[rstest]
#[case(true)]
#[case(false)]
fn rebase_in_progress_never_condenses_on_git_commit(#[case] has_files_touched: bool) {
    for phase in [Phase::Idle, Phase::Active, Phase::Ended] {
        let ctx = Context { has_files_touched, is_rebase_in_progress: true };
        let (_, actions) = transition(phase, Event::GitCommit, ctx);
        assert!(!actions.contains(&Action::Condense));
        assert!(!actions.contains(&Action::CondenseIfFilesTouched));
    }
}
