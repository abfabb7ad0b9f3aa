#![forbid(unsafe_code)]

//! Branch switching and time travel on the three-branch numeric scenario.
//!
//! ```text
//! branch1: 2 3
//! branch2: 2 5 7      forked after branch1's first entry
//! branch3: 11 13      forked from the start; current, at its head (24)
//! ```

use branchlog::{Action, BranchSwitchPolicy, HistoryError, HistoryOptions};
use branchlog_harness::numeric::{ADD, ThreeBranches, three_branches, three_branches_with};

fn fixture() -> ThreeBranches {
    three_branches().expect("scenario builds")
}

fn assert_lands(
    fixture: &ThreeBranches,
    branch: &branchlog::BranchId,
    index: isize,
    state: i64,
) {
    let history = fixture.store.history();
    assert_eq!(history.current_branch_id(), branch);
    assert_eq!(history.current_index(), index);
    assert_eq!(*fixture.store.state(), state);
    history.validate().unwrap();
}

// ============================================================================
// Policies
// ============================================================================

#[test]
fn head_of_branch_lands_on_last_entry() {
    let mut f = fixture();
    let target = f.branch1.clone();
    let actions = f
        .store
        .switch_to_branch(&target, Some(BranchSwitchPolicy::HeadOfBranch))
        .unwrap();
    assert_lands(&f, &target, 1, 5);
    assert_eq!(
        actions,
        vec![
            Action::undo(ADD, -13),
            Action::undo(ADD, -11),
            Action::new(ADD, 2),
            Action::new(ADD, 3),
        ]
    );
}

#[test]
fn last_common_action_lands_on_shared_prefix() {
    let mut f = fixture();
    let target = f.branch1.clone();
    f.store
        .switch_to_branch(&target, Some(BranchSwitchPolicy::LastCommonAction))
        .unwrap();
    assert_lands(&f, &target, -1, 0);
}

#[test]
fn last_common_action_if_past_moves_back_when_past() {
    let mut f = fixture();
    let target = f.branch1.clone();
    f.store
        .switch_to_branch(&target, Some(BranchSwitchPolicy::LastCommonActionIfPast))
        .unwrap();
    assert_lands(&f, &target, -1, 0);
}

#[test]
fn last_common_action_if_past_stays_when_not_past() {
    let mut f = fixture();
    let (branch1, branch2) = (f.branch1.clone(), f.branch2.clone());
    f.store.switch_to_branch(&branch2, None).unwrap();
    assert_lands(&f, &branch2, 2, 14);

    f.store.time_travel(0, None).unwrap();
    let actions = f
        .store
        .switch_to_branch(&branch1, Some(BranchSwitchPolicy::LastCommonActionIfPast))
        .unwrap();
    assert!(actions.is_empty(), "no replay needed");
    assert_lands(&f, &branch1, 0, 2);
}

#[test]
fn last_known_position_resumes_where_branch_was_left() {
    let mut f = fixture();
    let target = f.branch1.clone();
    f.store
        .switch_to_branch(&target, Some(BranchSwitchPolicy::LastKnownPositionOnBranch))
        .unwrap();
    // branch1 was left at its first entry when branch2 was forked.
    assert_lands(&f, &target, 0, 2);
}

#[test]
fn last_known_position_round_trip() {
    let mut f = fixture();
    let (branch2, branch3) = (f.branch2.clone(), f.branch3.clone());
    f.store.switch_to_branch(&branch2, None).unwrap();
    f.store.time_travel(1, None).unwrap();
    assert_eq!(*f.store.state(), 7);

    let resume = Some(BranchSwitchPolicy::LastKnownPositionOnBranch);
    f.store.switch_to_branch(&branch3, resume).unwrap();
    assert_lands(&f, &branch3, 1, 24);
    f.store.switch_to_branch(&branch2, resume).unwrap();
    assert_lands(&f, &branch2, 1, 7);
}

#[test]
fn default_policy_comes_from_options() {
    let options = HistoryOptions::default()
        .with_branching(true)
        .with_default_switch_policy(BranchSwitchPolicy::LastCommonAction);
    let mut f = three_branches_with(options).unwrap();
    let target = f.branch2.clone();
    f.store.switch_to_branch(&target, None).unwrap();
    assert_lands(&f, &target, -1, 0);
}

// ============================================================================
// Time travel
// ============================================================================

#[test]
fn time_travel_to_index_on_other_branch() {
    let mut f = fixture();
    let target = f.branch2.clone();
    f.store.time_travel(1, Some(&target)).unwrap();
    assert_lands(&f, &target, 1, 7);
    f.store.time_travel(-1, Some(&target)).unwrap();
    assert_lands(&f, &target, -1, 0);
}

#[test]
fn tour_of_all_branches_restores_state() {
    let mut f = fixture();
    let (b1, b2, b3) = (f.branch1.clone(), f.branch2.clone(), f.branch3.clone());
    for (branch, state) in [(&b1, 5), (&b2, 14), (&b1, 5), (&b3, 24), (&b2, 14), (&b3, 24)] {
        f.store.switch_to_branch(branch, None).unwrap();
        assert_lands(&f, branch, f.store.history().current_index(), state);
    }
    assert_eq!(f.store.history().branch_count(), 3);
}

// ============================================================================
// Rejections
// ============================================================================

#[test]
fn rejected_travel_leaves_store_unchanged() {
    let mut f = fixture();
    let snapshot = (*f.store.state(), f.store.history().clone());
    let (branch2, branch3) = (f.branch2.clone(), f.branch3.clone());

    assert_eq!(
        f.store.switch_to_branch(&branch3, None),
        Err(HistoryError::SameBranch(branch3.clone()))
    );
    assert_eq!(
        f.store.time_travel(3, Some(&branch2)),
        Err(HistoryError::IndexOutOfRange { index: 3, len: 3 })
    );
    assert_eq!(
        f.store.time_travel(2, None),
        Err(HistoryError::IndexOutOfRange { index: 2, len: 2 })
    );
    let missing = branchlog::BranchId::new("missing");
    assert_eq!(
        f.store.switch_to_branch(&missing, None),
        Err(HistoryError::UnknownBranch(missing.clone()))
    );
    assert_eq!((*f.store.state(), f.store.history().clone()), snapshot);
}
