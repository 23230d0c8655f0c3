//! Proactive need checker.
//!
//! Compares the latest detection snapshot against the active step's
//! [`StepNeeds`] and says what the timers should do.  It is pure: the state
//! machine decides whether a check runs at all (listening, lock free, no
//! branch load pending) and applies the verdict.
//!
//! Evaluation order:
//! 1. a forbidden item in view → [`NeedVerdict::Forbidden`] (branch target
//!    when a rule matches and the session is not already branched);
//!    forbidden items already corrected on this step only block timers;
//! 2. required items missing → arm the hint timer;
//! 3. all required items present → arm the completion timer;
//! 4. nothing required → disarm everything.

use std::collections::HashSet;

use crate::catalog::{ItemMatcher, StepNeeds};
use crate::coach::state::TimerKind;
use crate::signals::DetectedObject;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NeedVerdict {
    /// Disarm timers and interject about `item`.  `branch_to` names the
    /// remedial module when a branch rule applies.
    Forbidden {
        item: String,
        branch_to: Option<String>,
    },
    /// Arm the hint timer (disarming the completion timer).
    ArmHint,
    /// Arm the completion timer (disarming the hint timer).
    ArmCompletion,
    /// The right timer is already armed; leave it running.
    Hold,
    DisarmAll,
}

/// Inputs for one evaluation.
#[derive(Debug, Clone, Copy)]
pub struct NeedCheck<'a> {
    pub needs: &'a StepNeeds,
    pub detections: &'a [DetectedObject],
    pub matcher: &'a ItemMatcher,
    pub armed: Option<TimerKind>,
    pub branched: bool,
    /// Forbidden items already corrected on this step and still in view.
    pub acknowledged: &'a HashSet<String>,
}

impl NeedCheck<'_> {
    pub fn evaluate(&self) -> NeedVerdict {
        let in_view = forbidden_in_view(self.needs, self.detections, self.matcher);
        if !in_view.is_empty() {
            let fresh = in_view
                .into_iter()
                .find(|item| !self.acknowledged.contains(item));
            return match fresh {
                Some(item) => {
                    let branch_to = if self.branched {
                        None
                    } else {
                        self.needs
                            .branch_for(&item)
                            .map(|rule| rule.remedial_module_id.clone())
                    };
                    NeedVerdict::Forbidden { item, branch_to }
                }
                None => NeedVerdict::DisarmAll,
            };
        }

        if self.needs.required.is_empty() {
            return NeedVerdict::DisarmAll;
        }

        let wanted = if missing_items(self.needs, self.detections, self.matcher).is_empty() {
            TimerKind::Completion
        } else {
            TimerKind::Hint
        };
        match (wanted, self.armed) {
            (kind, Some(armed)) if kind == armed => NeedVerdict::Hold,
            (TimerKind::Hint, _) => NeedVerdict::ArmHint,
            (TimerKind::Completion, _) => NeedVerdict::ArmCompletion,
        }
    }
}

/// Forbidden items of `needs` currently seen, in catalog order.
pub fn forbidden_in_view(
    needs: &StepNeeds,
    detections: &[DetectedObject],
    matcher: &ItemMatcher,
) -> Vec<String> {
    needs
        .forbidden
        .iter()
        .filter(|item| matcher.is_detected(item, detections))
        .cloned()
        .collect()
}

/// Required items of `needs` not currently seen, in catalog order.
pub fn missing_items(
    needs: &StepNeeds,
    detections: &[DetectedObject],
    matcher: &ItemMatcher,
) -> Vec<String> {
    needs
        .required
        .iter()
        .filter(|item| !matcher.is_detected(item, detections))
        .cloned()
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::BranchRule;

    fn needs() -> StepNeeds {
        StepNeeds {
            required: vec!["lettuce".into(), "knife".into()],
            forbidden: vec!["raw chicken".into(), "phone".into()],
            branch_on: vec![BranchRule {
                item: "raw chicken".into(),
                remedial_module_id: "handwashing".into(),
            }],
        }
    }

    fn seen(labels: &[&str]) -> Vec<DetectedObject> {
        labels.iter().map(|l| DetectedObject::labelled(*l)).collect()
    }

    fn check(
        needs: &StepNeeds,
        detections: &[DetectedObject],
        armed: Option<TimerKind>,
        branched: bool,
        acknowledged: &HashSet<String>,
    ) -> NeedVerdict {
        let matcher = ItemMatcher::with_defaults();
        NeedCheck {
            needs,
            detections,
            matcher: &matcher,
            armed,
            branched,
            acknowledged,
        }
        .evaluate()
    }

    #[test]
    fn forbidden_with_rule_branches() {
        let n = needs();
        let verdict = check(&n, &seen(&["Raw Chicken"]), None, false, &HashSet::new());
        assert_eq!(
            verdict,
            NeedVerdict::Forbidden {
                item: "raw chicken".into(),
                branch_to: Some("handwashing".into()),
            }
        );
    }

    #[test]
    fn forbidden_while_branched_corrects() {
        let n = needs();
        let verdict = check(&n, &seen(&["raw chicken"]), None, true, &HashSet::new());
        assert_eq!(
            verdict,
            NeedVerdict::Forbidden {
                item: "raw chicken".into(),
                branch_to: None,
            }
        );
    }

    #[test]
    fn forbidden_wins_over_required_and_timers() {
        let n = needs();
        let verdict = check(
            &n,
            &seen(&["lettuce", "knife", "cell phone"]),
            Some(TimerKind::Completion),
            false,
            &HashSet::new(),
        );
        assert_eq!(
            verdict,
            NeedVerdict::Forbidden {
                item: "phone".into(),
                branch_to: None,
            }
        );
    }

    #[test]
    fn acknowledged_forbidden_only_blocks_timers() {
        let n = needs();
        let ack: HashSet<String> = ["phone".to_string()].into();
        let verdict = check(&n, &seen(&["lettuce", "knife", "phone"]), None, false, &ack);
        assert_eq!(verdict, NeedVerdict::DisarmAll);
    }

    #[test]
    fn missing_required_arms_hint_once() {
        let n = needs();
        let snapshot = seen(&["lettuce"]);
        assert_eq!(check(&n, &snapshot, None, false, &HashSet::new()), NeedVerdict::ArmHint);
        assert_eq!(
            check(&n, &snapshot, Some(TimerKind::Hint), false, &HashSet::new()),
            NeedVerdict::Hold
        );
        assert_eq!(
            check(&n, &snapshot, Some(TimerKind::Completion), false, &HashSet::new()),
            NeedVerdict::ArmHint
        );
    }

    #[test]
    fn all_required_arms_completion_once() {
        let n = needs();
        let snapshot = seen(&["Lettuce", "chef knife"]);
        assert_eq!(
            check(&n, &snapshot, Some(TimerKind::Hint), false, &HashSet::new()),
            NeedVerdict::ArmCompletion
        );
        assert_eq!(
            check(&n, &snapshot, Some(TimerKind::Completion), false, &HashSet::new()),
            NeedVerdict::Hold
        );
    }

    #[test]
    fn no_requirements_disarms() {
        let n = StepNeeds::default();
        assert_eq!(
            check(&n, &seen(&["anything"]), Some(TimerKind::Hint), false, &HashSet::new()),
            NeedVerdict::DisarmAll
        );
    }

    #[test]
    fn helpers_report_in_catalog_order() {
        let n = needs();
        let matcher = ItemMatcher::with_defaults();
        let snapshot = seen(&["phone", "raw chicken"]);
        assert_eq!(
            forbidden_in_view(&n, &snapshot, &matcher),
            vec!["raw chicken".to_string(), "phone".to_string()]
        );
        assert_eq!(
            missing_items(&n, &snapshot, &matcher),
            vec!["lettuce".to_string(), "knife".to_string()]
        );
    }
}
