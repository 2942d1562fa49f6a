//! Task status classification and compare-and-transition rules.
//!
//! Covers the terminal/hard-terminal/active split for every status and the
//! full expected-status by target-status matrix of `MetadataCell`.

// Imports are in sub-modules to avoid ambiguity with pretty_assertions.

// ─── Classification ─────────────────────────────────────────────────────────

mod classification {
    use durable_tasks::TaskStatus;

    #[test]
    fn terminal_statuses() {
        let terminal: Vec<_> = TaskStatus::ALL
            .into_iter()
            .filter(TaskStatus::is_terminal)
            .collect();
        assert_eq!(
            terminal,
            vec![
                TaskStatus::Failed,
                TaskStatus::Completed,
                TaskStatus::Cancelled
            ]
        );
    }

    #[test]
    fn failed_is_soft_terminal() {
        assert!(TaskStatus::Failed.is_terminal());
        assert!(!TaskStatus::Failed.is_hard_terminal());
    }

    #[test]
    fn hard_terminal_statuses() {
        assert!(TaskStatus::Completed.is_hard_terminal());
        assert!(TaskStatus::Cancelled.is_hard_terminal());
    }

    #[test]
    fn active_statuses_are_never_terminal() {
        for status in TaskStatus::ALL {
            assert!(!(status.is_active() && status.is_terminal()), "{status}");
        }
        assert!(!TaskStatus::Paused.is_active());
        assert!(!TaskStatus::Paused.is_terminal());
    }

    #[test]
    fn serde_uses_screaming_snake_case() {
        let json = serde_json::to_string(&TaskStatus::Retrying).unwrap();
        assert_eq!(json, "\"RETRYING\"");
        let back: TaskStatus = serde_json::from_str("\"CANCELLED\"").unwrap();
        assert_eq!(back, TaskStatus::Cancelled);
    }
}

// ─── Compare-and-transition ─────────────────────────────────────────────────

mod compare_and_transition {
    use std::collections::BTreeMap;

    use durable_tasks::{MetadataCell, TaskError, TaskId, TaskMetadata, TaskStatus};
    use pretty_assertions::assert_eq;

    /// A cell forced into `status` through a legal path.
    fn cell_in(status: TaskStatus) -> MetadataCell {
        let cell = MetadataCell::new(TaskMetadata::new(TaskId::random(), "agent", BTreeMap::new()));
        if status != TaskStatus::Pending {
            cell.transition_to(status, Some("reason".into())).unwrap();
        }
        cell
    }

    #[test]
    fn matching_expected_status_succeeds_unless_hard_terminal() {
        for from in TaskStatus::ALL {
            for to in TaskStatus::ALL {
                let cell = cell_in(from);
                let before = cell.snapshot();
                let allowed = !from.is_hard_terminal()
                    && (from != TaskStatus::Failed || to == TaskStatus::Running);

                let result = cell.try_transition(from, to, None);
                assert_eq!(result.is_some(), allowed, "{from} -> {to}");
                if allowed {
                    let after = cell.snapshot();
                    assert_eq!(after.status, to);
                    assert_eq!(after.version, before.version + 1);
                    assert!(after.updated_at > before.updated_at);
                } else {
                    assert_eq!(cell.snapshot(), before, "{from} -> {to} must not mutate");
                }
            }
        }
    }

    #[test]
    fn mismatched_expected_status_never_mutates() {
        for actual in TaskStatus::ALL {
            for expected in TaskStatus::ALL.into_iter().filter(|s| *s != actual) {
                let cell = cell_in(actual);
                let before = cell.snapshot();
                assert!(!cell.compare_and_transition(expected, TaskStatus::Running, None));
                assert_eq!(cell.snapshot(), before);
            }
        }
    }

    #[test]
    fn failure_reason_set_and_cleared() {
        let cell = cell_in(TaskStatus::Running);
        let failed = cell
            .try_transition(TaskStatus::Running, TaskStatus::Failed, Some("boom".into()))
            .unwrap();
        assert_eq!(failed.failure_reason.as_deref(), Some("boom"));

        let resumed = cell
            .try_transition(TaskStatus::Failed, TaskStatus::Running, None)
            .unwrap();
        assert_eq!(resumed.failure_reason, None);
    }

    #[test]
    fn transition_to_refuses_every_terminal_status() {
        for from in TaskStatus::ALL.into_iter().filter(TaskStatus::is_terminal) {
            let cell = cell_in(from);
            let err = cell.transition_to(TaskStatus::Running, None).unwrap_err();
            assert!(matches!(err, TaskError::IllegalState { .. }), "{from}");
            assert_eq!(cell.status(), from);
        }
    }

    #[test]
    fn created_at_and_labels_never_change() {
        let cell = MetadataCell::new(TaskMetadata::new(
            TaskId::random(),
            "agent",
            BTreeMap::from([("tenant".to_string(), "acme".to_string())]),
        ));
        let first = cell.snapshot();
        cell.transition_to(TaskStatus::Running, None).unwrap();
        cell.transition_to(TaskStatus::Paused, None).unwrap();
        let last = cell.snapshot();
        assert_eq!(last.created_at, first.created_at);
        assert_eq!(last.labels, first.labels);
        assert_eq!(last.version, 3);
    }
}
