use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

use super::stage::StageId;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageTally {
    pub attempted: u32,
    pub correct: u32,
}

impl StageTally {
    pub fn record(&mut self, is_correct: bool) {
        self.attempted += 1;
        if is_correct {
            self.correct += 1;
        }
    }

    pub fn accuracy(&self) -> Option<f64> {
        if self.attempted == 0 {
            None
        } else {
            Some(self.correct as f64 / self.attempted as f64)
        }
    }
}

/// Per-learner lesson position. Built by `ProgressionEngine::start`, mutated only by
/// the engine and the question generator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequenceState {
    pub current_stage: StageId,
    pub showing_example: bool,
    pub current_example_index: u32,
    pub consecutive_correct: u32,
    pub questions_attempted: u32,
    pub stage_results: BTreeMap<StageId, StageTally>,
    pub used_questions: BTreeMap<StageId, HashSet<String>>,
}

impl SequenceState {
    pub fn stage_tally(&self, stage: StageId) -> StageTally {
        self.stage_results.get(&stage).copied().unwrap_or_default()
    }

    pub fn is_used(&self, stage: StageId, key: &str) -> bool {
        self.used_questions
            .get(&stage)
            .map(|keys| keys.contains(key))
            .unwrap_or(false)
    }

    pub fn mark_used(&mut self, stage: StageId, key: String) {
        self.used_questions.entry(stage).or_default().insert(key);
    }
}

/// Storage-boundary shape of `SequenceState`; used-question sets travel as sorted lists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequenceSnapshot {
    pub stage_id: StageId,
    pub showing_example: bool,
    pub current_example_index: u32,
    pub consecutive_correct: u32,
    pub questions_attempted: u32,
    #[serde(default)]
    pub stage_results: BTreeMap<StageId, StageTally>,
    #[serde(default)]
    pub used_questions: BTreeMap<StageId, Vec<String>>,
}

impl From<&SequenceState> for SequenceSnapshot {
    fn from(state: &SequenceState) -> Self {
        let used_questions = state
            .used_questions
            .iter()
            .map(|(stage, keys)| {
                let mut keys: Vec<String> = keys.iter().cloned().collect();
                keys.sort();
                (*stage, keys)
            })
            .collect();

        Self {
            stage_id: state.current_stage,
            showing_example: state.showing_example,
            current_example_index: state.current_example_index,
            consecutive_correct: state.consecutive_correct,
            questions_attempted: state.questions_attempted,
            stage_results: state.stage_results.clone(),
            used_questions,
        }
    }
}

impl From<SequenceSnapshot> for SequenceState {
    fn from(snapshot: SequenceSnapshot) -> Self {
        Self {
            current_stage: snapshot.stage_id,
            showing_example: snapshot.showing_example,
            current_example_index: snapshot.current_example_index,
            consecutive_correct: snapshot.consecutive_correct,
            questions_attempted: snapshot.questions_attempted,
            stage_results: snapshot.stage_results,
            used_questions: snapshot
                .used_questions
                .into_iter()
                .map(|(stage, keys)| (stage, keys.into_iter().collect()))
                .collect(),
        }
    }
}
