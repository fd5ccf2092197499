use serde::Serialize;
use std::collections::{BTreeMap, HashSet};

use crate::error::{TutorError, TutorResult};
use crate::metrics::STAGE_TRANSITIONS_TOTAL;
use crate::models::sequence::SequenceState;
use crate::models::stage::{Stage, StageId, STAGE_CATALOG};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum AnswerOutcome {
    Stayed { stage: StageId },
    Advanced { from: StageId, to: StageId },
    Completed { from: StageId },
    AlreadyComplete,
}

impl AnswerOutcome {
    pub fn stage_changed(&self) -> bool {
        matches!(
            self,
            AnswerOutcome::Advanced { .. } | AnswerOutcome::Completed { .. }
        )
    }
}

/// What the learner should see next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextStep {
    Example { stage: StageId, index: u32 },
    Practice { stage: StageId },
    Complete,
}

/// Stateless driver over a validated stage table. All learner state lives in the
/// `SequenceState` passed to each call.
#[derive(Debug, Clone, Copy)]
pub struct ProgressionEngine {
    catalog: &'static [Stage],
}

impl ProgressionEngine {
    pub fn new(catalog: &'static [Stage]) -> TutorResult<Self> {
        validate_catalog(catalog)?;
        Ok(Self { catalog })
    }

    /// Engine over the built-in rounding lesson.
    pub fn standard() -> TutorResult<Self> {
        Self::new(STAGE_CATALOG)
    }

    pub fn catalog(&self) -> &'static [Stage] {
        self.catalog
    }

    pub fn stage(&self, id: StageId) -> TutorResult<&'static Stage> {
        self.catalog
            .iter()
            .find(|stage| stage.id == id)
            .ok_or(TutorError::UnknownStage(id))
    }

    fn first_stage(&self) -> &'static Stage {
        // validate_catalog guarantees a first entry
        &self.catalog[0]
    }

    /// Fresh lesson state positioned at the first stage.
    pub fn start(&self) -> SequenceState {
        let first = self.first_stage();
        SequenceState {
            current_stage: first.id,
            showing_example: first.opens_with_examples(),
            current_example_index: 1,
            consecutive_correct: 0,
            questions_attempted: 0,
            stage_results: BTreeMap::new(),
            used_questions: BTreeMap::new(),
        }
    }

    pub fn reset(&self, state: &mut SequenceState) {
        *state = self.start();
    }

    pub fn should_show_example(&self, state: &SequenceState) -> bool {
        matches!(self.next_step(state), Ok(NextStep::Example { .. }))
    }

    pub fn next_step(&self, state: &SequenceState) -> TutorResult<NextStep> {
        let stage = self.stage(state.current_stage)?;
        if stage.is_terminal() {
            return Ok(NextStep::Complete);
        }
        if state.showing_example && stage.opens_with_examples() {
            let index = state.current_example_index.clamp(1, stage.example_count());
            return Ok(NextStep::Example {
                stage: stage.id,
                index,
            });
        }
        Ok(NextStep::Practice { stage: stage.id })
    }

    /// Moves to the next worked example, or into practice once the last one was shown.
    pub fn next_example(&self, state: &mut SequenceState) -> TutorResult<NextStep> {
        let stage = self.stage(state.current_stage)?;
        if state.showing_example && !stage.is_terminal() {
            state.current_example_index += 1;
            if state.current_example_index > stage.example_count() {
                state.showing_example = false;
                tracing::debug!("Stage {} examples finished, switching to practice", stage.id);
            }
        }
        self.next_step(state)
    }

    pub fn record_answer(&self, state: &mut SequenceState, is_correct: bool) -> TutorResult<AnswerOutcome> {
        let stage = self.stage(state.current_stage)?;
        if stage.is_terminal() {
            return Ok(AnswerOutcome::AlreadyComplete);
        }

        state.questions_attempted += 1;
        let tally = state.stage_results.entry(stage.id).or_default();
        tally.record(is_correct);
        let stage_attempts = tally.attempted;

        if is_correct {
            state.consecutive_correct += 1;
        } else {
            state.consecutive_correct = 0;
        }

        if !stage.mastery.is_satisfied(state.consecutive_correct, stage_attempts) {
            return Ok(AnswerOutcome::Stayed { stage: stage.id });
        }

        let next_id = stage.next.ok_or_else(|| {
            TutorError::InvariantViolation(format!("stage {} has no successor", stage.id))
        })?;
        let next = self.stage(next_id)?;
        self.enter_stage(state, next);

        STAGE_TRANSITIONS_TOTAL
            .with_label_values(&[stage.id.as_str(), next.id.as_str()])
            .inc();
        tracing::info!(
            "Stage mastered: {} -> {} after {} attempts in stage",
            stage.id,
            next.id,
            stage_attempts
        );

        if next.is_terminal() {
            Ok(AnswerOutcome::Completed { from: stage.id })
        } else {
            Ok(AnswerOutcome::Advanced {
                from: stage.id,
                to: next.id,
            })
        }
    }

    /// Repairs sub-state read from an older or hand-edited snapshot.
    pub fn normalize(&self, state: &mut SequenceState) -> TutorResult<()> {
        let stage = self.stage(state.current_stage)?;
        if state.showing_example && !stage.opens_with_examples() {
            state.showing_example = false;
        }
        if state.current_example_index == 0 {
            state.current_example_index = 1;
        }
        Ok(())
    }

    fn enter_stage(&self, state: &mut SequenceState, stage: &Stage) {
        state.current_stage = stage.id;
        state.consecutive_correct = 0;
        state.showing_example = stage.opens_with_examples();
        state.current_example_index = 1;
    }
}

fn validate_catalog(catalog: &[Stage]) -> TutorResult<()> {
    let invalid = |msg: String| Err(TutorError::InvariantViolation(msg));

    let Some(last) = catalog.last() else {
        return invalid("stage catalog is empty".to_string());
    };
    if !last.is_terminal() {
        return invalid(format!("last stage {} is not terminal", last.id));
    }

    let mut seen = HashSet::new();
    for (index, stage) in catalog.iter().enumerate() {
        if stage.position != index {
            return invalid(format!(
                "stage {} declares position {} but sits at {}",
                stage.id, stage.position, index
            ));
        }
        if !seen.insert(stage.id) {
            return invalid(format!("stage {} appears twice", stage.id));
        }
        if stage.is_terminal() {
            if index != catalog.len() - 1 || stage.next.is_some() {
                return invalid(format!("terminal stage {} must be last with no successor", stage.id));
            }
            continue;
        }
        if stage.decimal_places.is_empty() {
            return invalid(format!("stage {} has no decimal place targets", stage.id));
        }
        let Some(next) = stage.next else {
            return invalid(format!("stage {} has no successor", stage.id));
        };
        match catalog.iter().position(|s| s.id == next) {
            Some(next_index) if next_index > index => {}
            _ => {
                return invalid(format!(
                    "stage {} points to {} which is not later in the catalog",
                    stage.id, next
                ))
            }
        }
    }
    Ok(())
}
