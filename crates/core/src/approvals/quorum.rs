//! Pure quorum evaluation.
//!
//! Given every decision already recorded for the current step and the incoming one, decide the
//! item's next `(status, current_step)`. The count is always rebuilt from the full decision
//! set, never from a cached counter, so concurrent approvers converge on one outcome.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::domain::decision::{ApprovalDecision, DecisionKind};
use crate::domain::item::ItemStatus;
use crate::domain::workflow::ApproverId;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StepContext {
    pub current_step: u32,
    pub total_steps: u32,
    pub quorum: usize,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum QuorumOutcome {
    Vetoed,
    ChangesRequested,
    AwaitingQuorum { approvals: usize, quorum: usize },
    StepAdvanced { next_step: u32 },
    Completed,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Evaluation {
    pub status: ItemStatus,
    pub current_step: u32,
    pub outcome: QuorumOutcome,
}

pub fn evaluate(
    context: StepContext,
    recorded: &[ApprovalDecision],
    approver_id: &ApproverId,
    decision: DecisionKind,
) -> Evaluation {
    let step = context.current_step;
    match decision {
        DecisionKind::Rejected => Evaluation {
            status: ItemStatus::Rejected,
            current_step: step,
            outcome: QuorumOutcome::Vetoed,
        },
        DecisionKind::RequestChanges => Evaluation {
            status: ItemStatus::Pending,
            current_step: step,
            outcome: QuorumOutcome::ChangesRequested,
        },
        DecisionKind::Approved => {
            let approvals = distinct_approvals(recorded, step, approver_id);
            if approvals < context.quorum.max(1) {
                return Evaluation {
                    status: ItemStatus::InReview,
                    current_step: step,
                    outcome: QuorumOutcome::AwaitingQuorum {
                        approvals,
                        quorum: context.quorum.max(1),
                    },
                };
            }

            if step >= context.total_steps {
                Evaluation {
                    status: ItemStatus::Approved,
                    current_step: step,
                    outcome: QuorumOutcome::Completed,
                }
            } else {
                Evaluation {
                    status: ItemStatus::Pending,
                    current_step: step + 1,
                    outcome: QuorumOutcome::StepAdvanced { next_step: step + 1 },
                }
            }
        }
    }
}

/// Distinct approvers who approved `step`, counting the incoming approval.
fn distinct_approvals(recorded: &[ApprovalDecision], step: u32, incoming: &ApproverId) -> usize {
    let mut approvers: BTreeSet<&ApproverId> = recorded
        .iter()
        .filter(|decision| decision.step_number == step)
        .filter(|decision| decision.decision == DecisionKind::Approved)
        .map(|decision| &decision.approver_id)
        .collect();
    approvers.insert(incoming);
    approvers.len()
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::{evaluate, QuorumOutcome, StepContext};
    use crate::domain::decision::{ApprovalDecision, DecisionKind};
    use crate::domain::item::{ApprovalItemId, ItemStatus};
    use crate::domain::workflow::ApproverId;

    fn approver(id: &str) -> ApproverId {
        ApproverId(id.to_string())
    }

    fn recorded(step: u32, who: &str, kind: DecisionKind) -> ApprovalDecision {
        ApprovalDecision::new(
            ApprovalItemId("item".to_string()),
            step,
            approver(who),
            kind,
            None,
            Utc::now(),
        )
    }

    const TWO_OF_THREE: StepContext = StepContext { current_step: 1, total_steps: 2, quorum: 2 };

    #[test]
    fn first_approval_below_quorum_moves_to_in_review() {
        let evaluation = evaluate(TWO_OF_THREE, &[], &approver("a"), DecisionKind::Approved);
        assert_eq!(evaluation.status, ItemStatus::InReview);
        assert_eq!(evaluation.current_step, 1);
        assert_eq!(evaluation.outcome, QuorumOutcome::AwaitingQuorum { approvals: 1, quorum: 2 });
    }

    #[test]
    fn quorum_on_intermediate_step_advances_to_fresh_pending_step() {
        let prior = [recorded(1, "a", DecisionKind::Approved)];
        let evaluation = evaluate(TWO_OF_THREE, &prior, &approver("b"), DecisionKind::Approved);
        assert_eq!(evaluation.status, ItemStatus::Pending);
        assert_eq!(evaluation.current_step, 2);
    }

    #[test]
    fn quorum_on_final_step_completes() {
        let context = StepContext { current_step: 2, total_steps: 2, quorum: 1 };
        let evaluation = evaluate(context, &[], &approver("c"), DecisionKind::Approved);
        assert_eq!(evaluation.status, ItemStatus::Approved);
        assert_eq!(evaluation.outcome, QuorumOutcome::Completed);
    }

    #[test]
    fn rejection_vetoes_even_after_quorum_adjacent_approvals() {
        let prior = [recorded(1, "b", DecisionKind::Approved)];
        let evaluation = evaluate(TWO_OF_THREE, &prior, &approver("a"), DecisionKind::Rejected);
        assert_eq!(evaluation.status, ItemStatus::Rejected);
        assert_eq!(evaluation.outcome, QuorumOutcome::Vetoed);
    }

    #[test]
    fn request_changes_resets_to_pending_on_same_step() {
        let prior = [recorded(1, "a", DecisionKind::Approved)];
        let evaluation =
            evaluate(TWO_OF_THREE, &prior, &approver("b"), DecisionKind::RequestChanges);
        assert_eq!(evaluation.status, ItemStatus::Pending);
        assert_eq!(evaluation.current_step, 1);
    }

    #[test]
    fn approvals_from_other_steps_and_non_approvals_do_not_count() {
        let prior = [
            recorded(0, "system", DecisionKind::Approved),
            recorded(2, "a", DecisionKind::Approved),
            recorded(1, "b", DecisionKind::RequestChanges),
        ];
        let evaluation = evaluate(TWO_OF_THREE, &prior, &approver("c"), DecisionKind::Approved);
        assert_eq!(evaluation.outcome, QuorumOutcome::AwaitingQuorum { approvals: 1, quorum: 2 });
    }

    #[test]
    fn same_approver_is_counted_once() {
        let prior = [recorded(1, "a", DecisionKind::Approved)];
        let evaluation = evaluate(TWO_OF_THREE, &prior, &approver("a"), DecisionKind::Approved);
        assert_eq!(evaluation.status, ItemStatus::InReview);
    }
}
