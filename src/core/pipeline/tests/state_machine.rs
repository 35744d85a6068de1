use crate::core::pipeline::{Deployment, Transition, TransitionError};

fn library() -> Deployment {
    Deployment::preset("pmlibrary").expect("preset should load")
}

#[test]
fn forward_moves_are_allowed_without_reason() {
    let d = library();
    for (i, from) in d.stages.iter().enumerate() {
        for to in &d.stages[i + 1..] {
            assert_eq!(
                d.check_transition(from, to, None),
                Ok(Transition::Forward),
                "expected forward transition {} -> {}",
                from,
                to
            );
            assert!(!d.requires_reason(from, to));
        }
    }
}

#[test]
fn backward_moves_follow_the_whitelist() {
    let d = library();
    for (i, from) in d.stages.iter().enumerate() {
        for to in &d.stages[..i] {
            let whitelisted = d.revertible[from].contains(to);
            let result = d.check_transition(from, to, Some("撮り直し"));
            if whitelisted {
                assert_eq!(result, Ok(Transition::Rollback), "{} -> {}", from, to);
            } else {
                assert!(
                    matches!(result, Err(TransitionError::RollbackNotAllowed { .. })),
                    "expected {} -> {} to be rejected",
                    from,
                    to
                );
            }
        }
    }
}

#[test]
fn draft_complete_rejects_material_prep() {
    let d = library();
    assert_eq!(
        d.check_transition("初稿完成", "素材準備", Some("戻したい")),
        Err(TransitionError::RollbackNotAllowed {
            from: "初稿完成".into(),
            to: "素材準備".into(),
        })
    );
}

#[test]
fn whitelisted_rollback_requires_reason() {
    let d = library();
    assert!(d.requires_reason("初稿完成", "修正1"));
    assert!(matches!(
        d.check_transition("初稿完成", "修正1", None),
        Err(TransitionError::ReasonRequired { .. })
    ));
    assert!(matches!(
        d.check_transition("初稿完成", "修正1", Some("   ")),
        Err(TransitionError::ReasonRequired { .. })
    ));
    assert_eq!(
        d.check_transition("初稿完成", "修正1", Some("テロップ修正")),
        Ok(Transition::Rollback)
    );
    assert_eq!(
        d.check_transition("初稿完成", "MA中", Some("音声差し替え")),
        Ok(Transition::Rollback)
    );
}

#[test]
fn same_stage_is_a_noop() {
    let d = library();
    assert_eq!(d.check_transition("編集中", "編集中", None), Ok(Transition::Same));
}

#[test]
fn unknown_status_is_rejected() {
    let d = library();
    assert_eq!(
        d.classify("撮影中", "編集中"),
        Err(TransitionError::UnknownStatus("撮影中".into()))
    );
    assert_eq!(
        d.classify("編集中", "done"),
        Err(TransitionError::UnknownStatus("done".into()))
    );
}

#[test]
fn terminal_stages_have_no_rollback() {
    let d = library();
    assert!(!d.can_transition("完パケ納品", "修正中"));
    assert!(d.allowed_targets("完パケ納品").is_empty());
    assert_eq!(d.allowed_targets("台本作成中").len(), 9);
}

#[test]
fn allowed_targets_include_forward_and_whitelisted() {
    let d = library();
    let targets = d.allowed_targets("初稿完成");
    assert_eq!(targets, vec!["修正1", "MA中", "修正中", "完パケ納品"]);
}
