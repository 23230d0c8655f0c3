//! Prompt builder for coach interjections.
//!
//! [`PromptBuilder`] produces two things:
//! * the **session seed** (`session_seed`), the system context a chat handle
//!   is opened with: the module title and the full step list;
//! * the **per-interaction prompt** (`build`), which layers the situational
//!   directive for the interjection kind on top of the step context, the
//!   visual context and any recalled fixes or past feedback.

use serde::{Deserialize, Serialize};

use crate::catalog::CoachModule;
use crate::llm::feedback::{FeedbackEntry, FeedbackOutcome, RankedFix};

// ---------------------------------------------------------------------------
// Instructions
// ---------------------------------------------------------------------------

const SYSTEM_INSTRUCTION: &str = "\
You are a hands-on training coach speaking to a trainee through a headset.
The trainee is following a step-by-step physical procedure while a camera
watches their work area.

Rules:
1. Speak in short, plain sentences; your reply is read aloud.
2. Keep every reply under three sentences.
3. Never invent steps that are not in the procedure.
4. Do not use markdown, lists or emoji.";

const DIRECTIVE_HINT: &str = "\
The trainee seems stuck on this step. Give one gentle, concrete hint about
what to do next. Do not give away every detail.";

const DIRECTIVE_TUTORING: &str = "\
The trainee already received a hint for this step and is still stuck.
Explain clearly, step by step, exactly what to do now.";

const DIRECTIVE_CORRECTION: &str = "\
The camera sees something that must not be used at this step. Tell the
trainee calmly what to put away and why, then what to do instead.";

const DIRECTIVE_QUERY: &str = "\
The trainee asked you a question. Answer it directly in the context of the
current step.";

/// How many recalled fixes make it into one prompt.
const MAX_FIXES: usize = 3;
/// How many past feedback entries make it into one prompt.
const MAX_FEEDBACK: usize = 3;

// ---------------------------------------------------------------------------
// Request types
// ---------------------------------------------------------------------------

/// The situational intent of an interaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterjectionKind {
    Hint,
    Correction,
    Query,
    Tutoring,
}

impl InterjectionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            InterjectionKind::Hint => "hint",
            InterjectionKind::Correction => "correction",
            InterjectionKind::Query => "query",
            InterjectionKind::Tutoring => "tutoring",
        }
    }
}

/// Everything the pipeline needs to know about one interaction.
#[derive(Debug, Clone, PartialEq)]
pub struct InteractionRequest {
    pub kind: InterjectionKind,
    pub module_id: String,
    pub module_title: String,
    pub step_index: usize,
    pub step_count: usize,
    pub step_title: String,
    pub instruction: String,
    pub required: Vec<String>,
    /// Required items not currently seen by the camera.
    pub missing: Vec<String>,
    /// Labels in the latest detection snapshot.
    pub detected: Vec<String>,
    /// The forbidden item behind a correction.
    pub trigger_item: Option<String>,
    /// The trainee's question, for queries.
    pub utterance: Option<String>,
}

impl InteractionRequest {
    /// Text used to look up similar past fixes.
    pub fn recall_query(&self) -> String {
        match (&self.utterance, &self.trigger_item) {
            (Some(u), _) => u.clone(),
            (None, Some(item)) => format!("{} {item}", self.step_title),
            (None, None) => format!("{} {}", self.step_title, self.missing.join(" ")),
        }
    }
}

// ---------------------------------------------------------------------------
// PromptBuilder
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct PromptBuilder;

impl PromptBuilder {
    pub fn new() -> Self {
        Self
    }

    /// System context for a chat handle dedicated to `module`.
    pub fn session_seed(&self, module: &CoachModule) -> String {
        let mut seed = String::with_capacity(1024);
        seed.push_str(SYSTEM_INSTRUCTION);
        seed.push_str(&format!("\n\nProcedure: {}\n", module.title));
        for (i, step) in module.steps.iter().enumerate() {
            seed.push_str(&format!("{}. {}: {}\n", i + 1, step.title, step.instruction));
        }
        seed
    }

    /// Build the prompt for one interaction.
    ///
    /// Structure (in order):
    /// 1. Current step and its instruction
    /// 2. Required items and what the camera sees
    /// 3. Fixes that resolved this step before (if any)
    /// 4. Past feedback on this step (if any)
    /// 5. Directive for the interjection kind (+ the trainee's question)
    pub fn build(
        &self,
        request: &InteractionRequest,
        fixes: &[RankedFix],
        feedback: &[FeedbackEntry],
    ) -> String {
        let mut prompt = String::with_capacity(1024);

        prompt.push_str(&format!(
            "Module: {}\nCurrent step {} of {}: {}\nInstruction: {}\n",
            request.module_title,
            request.step_index + 1,
            request.step_count,
            request.step_title,
            request.instruction
        ));

        if !request.required.is_empty() {
            prompt.push_str(&format!("Required items: {}\n", request.required.join(", ")));
        }
        if !request.missing.is_empty() {
            prompt.push_str(&format!("Not yet visible: {}\n", request.missing.join(", ")));
        }
        if request.detected.is_empty() {
            prompt.push_str("Camera sees: nothing recognisable\n");
        } else {
            prompt.push_str(&format!("Camera sees: {}\n", request.detected.join(", ")));
        }

        let useful: Vec<&RankedFix> = fixes
            .iter()
            .filter(|f| f.score > 0.0)
            .take(MAX_FIXES)
            .collect();
        if !useful.is_empty() {
            prompt.push_str("\nAdvice that helped other trainees on this step:\n");
            for fix in useful {
                prompt.push_str(&format!("- {}\n", fix.text));
            }
        }

        if !feedback.is_empty() {
            prompt.push_str("\nEarlier coaching on this step:\n");
            for entry in feedback.iter().take(MAX_FEEDBACK) {
                let verdict = match entry.outcome {
                    FeedbackOutcome::Resolved => "worked",
                    FeedbackOutcome::Unresolved => "did not help",
                };
                prompt.push_str(&format!(
                    "- ({}, {verdict}) {}\n",
                    entry.kind.as_str(),
                    entry.response
                ));
            }
        }

        prompt.push('\n');
        prompt.push_str(directive(request.kind));
        if let Some(item) = &request.trigger_item {
            prompt.push_str(&format!("\nItem that must not be used: {item}"));
        }
        if let Some(utterance) = &request.utterance {
            prompt.push_str(&format!("\n\nTrainee: {utterance}"));
        }
        prompt.push_str("\n\nCoach:");
        prompt
    }
}

fn directive(kind: InterjectionKind) -> &'static str {
    match kind {
        InterjectionKind::Hint => DIRECTIVE_HINT,
        InterjectionKind::Tutoring => DIRECTIVE_TUTORING,
        InterjectionKind::Correction => DIRECTIVE_CORRECTION,
        InterjectionKind::Query => DIRECTIVE_QUERY,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{Step, StepNeeds};

    fn request(kind: InterjectionKind) -> InteractionRequest {
        InteractionRequest {
            kind,
            module_id: "food-prep".into(),
            module_title: "Food prep".into(),
            step_index: 1,
            step_count: 3,
            step_title: "Chop".into(),
            instruction: "Chop the lettuce".into(),
            required: vec!["lettuce".into(), "knife".into()],
            missing: vec!["knife".into()],
            detected: vec!["lettuce".into()],
            trigger_item: None,
            utterance: None,
        }
    }

    #[test]
    fn seed_lists_every_step() {
        let module = CoachModule {
            id: "food-prep".into(),
            title: "Food prep".into(),
            steps: vec![
                Step {
                    title: "Wash".into(),
                    instruction: "Wash your hands".into(),
                    needs: StepNeeds::default(),
                },
                Step {
                    title: "Chop".into(),
                    instruction: "Chop the lettuce".into(),
                    needs: StepNeeds::default(),
                },
            ],
        };
        let seed = PromptBuilder::new().session_seed(&module);
        assert!(seed.contains("training coach"));
        assert!(seed.contains("Procedure: Food prep"));
        assert!(seed.contains("1. Wash: Wash your hands"));
        assert!(seed.contains("2. Chop: Chop the lettuce"));
    }

    #[test]
    fn prompt_carries_step_and_visual_context() {
        let prompt = PromptBuilder::new().build(&request(InterjectionKind::Hint), &[], &[]);
        assert!(prompt.contains("Current step 2 of 3: Chop"));
        assert!(prompt.contains("Required items: lettuce, knife"));
        assert!(prompt.contains("Not yet visible: knife"));
        assert!(prompt.contains("Camera sees: lettuce"));
        assert!(prompt.contains("gentle, concrete hint"));
        assert!(prompt.ends_with("Coach:"));
    }

    #[test]
    fn each_kind_has_its_own_directive() {
        let b = PromptBuilder::new();
        let tutoring = b.build(&request(InterjectionKind::Tutoring), &[], &[]);
        assert!(tutoring.contains("already received a hint"));

        let mut correction = request(InterjectionKind::Correction);
        correction.trigger_item = Some("raw chicken".into());
        let text = b.build(&correction, &[], &[]);
        assert!(text.contains("must not be used"));
        assert!(text.contains("Item that must not be used: raw chicken"));

        let mut query = request(InterjectionKind::Query);
        query.utterance = Some("which knife?".into());
        let text = b.build(&query, &[], &[]);
        assert!(text.contains("asked you a question"));
        assert!(text.contains("Trainee: which knife?"));
    }

    #[test]
    fn recall_sections_are_included_and_bounded() {
        let fixes: Vec<RankedFix> = (0..5)
            .map(|i| RankedFix {
                text: format!("fix {i}"),
                score: 0.5,
            })
            .chain(std::iter::once(RankedFix {
                text: "irrelevant".into(),
                score: 0.0,
            }))
            .collect();
        let feedback = vec![FeedbackEntry {
            kind: InterjectionKind::Hint,
            response: "look left".into(),
            outcome: FeedbackOutcome::Unresolved,
        }];

        let prompt =
            PromptBuilder::new().build(&request(InterjectionKind::Hint), &fixes, &feedback);
        assert!(prompt.contains("Advice that helped other trainees"));
        assert!(prompt.contains("- fix 2"));
        assert!(!prompt.contains("- fix 3"));
        assert!(!prompt.contains("irrelevant"));
        assert!(prompt.contains("(hint, did not help) look left"));
    }

    #[test]
    fn empty_camera_is_stated() {
        let mut req = request(InterjectionKind::Hint);
        req.detected.clear();
        let prompt = PromptBuilder::new().build(&req, &[], &[]);
        assert!(prompt.contains("Camera sees: nothing recognisable"));
    }

    #[test]
    fn recall_query_prefers_utterance() {
        let mut req = request(InterjectionKind::Query);
        req.utterance = Some("where is the knife".into());
        assert_eq!(req.recall_query(), "where is the knife");

        let req = request(InterjectionKind::Hint);
        assert_eq!(req.recall_query(), "Chop knife");
    }
}
