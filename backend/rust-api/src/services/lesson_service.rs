use chrono::Utc;
use serde::{de::DeserializeOwned, Serialize};

use crate::error::{TutorError, TutorResult};
use crate::models::lesson::{
    AnswerResponse, ProfileResponse, ProgressSnapshot, StepResponse, SubmitAnswerRequest,
    WorkedExampleView,
};
use crate::models::profile::{QuestionResult, StudentProfile};
use crate::models::question::{ActiveQuestion, ChoiceLetter};
use crate::models::sequence::{SequenceSnapshot, SequenceState};
use crate::models::stage::Stage;

use super::progression_service::NextStep;
use super::AppState;

/// Recent-window size reported on the profile endpoint.
const RECENT_WINDOW: usize = 5;

fn sequence_key(learner_id: &str) -> String {
    format!("lesson:{}:sequence", learner_id)
}

fn profile_key(learner_id: &str) -> String {
    format!("lesson:{}:profile", learner_id)
}

fn question_key(learner_id: &str) -> String {
    format!("lesson:{}:question", learner_id)
}

/// One learner turn: load aggregates, apply the engine, save them back.
pub struct LessonService<'a> {
    state: &'a AppState,
}

impl<'a> LessonService<'a> {
    pub fn new(state: &'a AppState) -> Self {
        Self { state }
    }

    async fn load_json<T: DeserializeOwned>(&self, key: &str) -> TutorResult<Option<T>> {
        let Some(raw) = self.state.store.load(key).await? else {
            return Ok(None);
        };
        match serde_json::from_str(&raw) {
            Ok(value) => Ok(Some(value)),
            Err(e) => {
                tracing::warn!("Discarding corrupt snapshot {}: {}", key, e);
                Ok(None)
            }
        }
    }

    async fn save_json<T: Serialize>(&self, key: &str, value: &T) -> TutorResult<()> {
        let json = serde_json::to_string(value)?;
        self.state.store.save(key, &json).await?;
        Ok(())
    }

    async fn load_sequence(&self, learner_id: &str) -> TutorResult<SequenceState> {
        let engine = &self.state.engine;
        match self
            .load_json::<SequenceSnapshot>(&sequence_key(learner_id))
            .await?
        {
            Some(snapshot) => {
                let mut sequence = SequenceState::from(snapshot);
                engine.normalize(&mut sequence)?;
                Ok(sequence)
            }
            None => {
                tracing::info!("Starting new lesson for learner {}", learner_id);
                Ok(engine.start())
            }
        }
    }

    async fn save_sequence(&self, learner_id: &str, sequence: &SequenceState) -> TutorResult<()> {
        self.save_json(&sequence_key(learner_id), &SequenceSnapshot::from(sequence))
            .await
    }

    async fn load_profile(&self, learner_id: &str) -> TutorResult<StudentProfile> {
        let limit = self.state.config.profile_history_limit;
        let mut profile = self
            .load_json::<StudentProfile>(&profile_key(learner_id))
            .await?
            .unwrap_or_else(|| StudentProfile::new(limit));
        profile.history_limit = limit.max(1);
        Ok(profile)
    }

    async fn load_active_question(&self, learner_id: &str) -> TutorResult<Option<ActiveQuestion>> {
        self.load_json(&question_key(learner_id)).await
    }

    fn stage(&self, sequence: &SequenceState) -> TutorResult<&'static Stage> {
        self.state.engine.stage(sequence.current_stage)
    }

    /// Renders what the learner sees now, generating a practice question if needed.
    async fn render_step(&self, learner_id: &str, sequence: &mut SequenceState) -> TutorResult<StepResponse> {
        let stage = self.stage(sequence)?;

        match self.state.engine.next_step(sequence)? {
            NextStep::Example { index, .. } => {
                let example = stage.worked_example(index).ok_or_else(|| {
                    TutorError::InvariantViolation(format!(
                        "stage {} has no worked example {}",
                        stage.id, index
                    ))
                })?;
                let steps = self
                    .state
                    .verifier
                    .worked_steps(example.number, example.decimal_places)?;
                Ok(StepResponse::Example {
                    stage: stage.id,
                    stage_title: stage.title.to_string(),
                    example_index: index,
                    example_count: stage.example_count(),
                    example: WorkedExampleView {
                        number: example.number.to_string(),
                        decimal_places: example.decimal_places,
                        steps,
                    },
                })
            }
            NextStep::Practice { .. } => {
                if let Some(active) = self.load_active_question(learner_id).await? {
                    if active.question.stage == stage.id {
                        return Ok(StepResponse::Practice {
                            stage: stage.id,
                            stage_title: stage.title.to_string(),
                            question: active.question.view(),
                        });
                    }
                }

                let question = self.state.generator.next_question(stage, sequence)?;
                tracing::debug!(
                    "Serving question {} ({}) to learner {}",
                    question.id,
                    question.number_key(),
                    learner_id
                );
                let view = question.view();
                let active = ActiveQuestion {
                    question,
                    served_at: Utc::now(),
                };
                self.save_json(&question_key(learner_id), &active).await?;
                Ok(StepResponse::Practice {
                    stage: stage.id,
                    stage_title: stage.title.to_string(),
                    question: view,
                })
            }
            NextStep::Complete => {
                self.state.store.delete(&question_key(learner_id)).await?;
                Ok(StepResponse::Complete {
                    questions_attempted: sequence.questions_attempted,
                })
            }
        }
    }

    pub async fn next_step(&self, learner_id: &str) -> TutorResult<StepResponse> {
        let mut sequence = self.load_sequence(learner_id).await?;
        let step = self.render_step(learner_id, &mut sequence).await?;
        self.save_sequence(learner_id, &sequence).await?;
        Ok(step)
    }

    pub async fn next_example(&self, learner_id: &str) -> TutorResult<StepResponse> {
        let mut sequence = self.load_sequence(learner_id).await?;
        self.state.engine.next_example(&mut sequence)?;
        let step = self.render_step(learner_id, &mut sequence).await?;
        self.save_sequence(learner_id, &sequence).await?;
        Ok(step)
    }

    pub async fn submit_answer(
        &self,
        learner_id: &str,
        req: &SubmitAnswerRequest,
    ) -> TutorResult<AnswerResponse> {
        let chosen: ChoiceLetter = req
            .chosen_letter
            .parse()
            .map_err(|_| TutorError::UnknownChoice(req.chosen_letter.clone()))?;

        let active = self
            .load_active_question(learner_id)
            .await?
            .ok_or(TutorError::NoActiveQuestion)?;
        let mut sequence = self.load_sequence(learner_id).await?;

        if active.question.stage != sequence.current_stage {
            tracing::warn!(
                "Dropping stale question {} from stage {} (learner {} is in {})",
                active.question.id,
                active.question.stage,
                learner_id,
                sequence.current_stage
            );
            self.state.store.delete(&question_key(learner_id)).await?;
            return Err(TutorError::NoActiveQuestion);
        }

        let question = active.question;
        let result = match self.state.verifier.verify(&question, chosen) {
            Ok(result) => result,
            Err(e) => {
                if e.is_invariant_violation() {
                    self.state.store.delete(&question_key(learner_id)).await?;
                }
                return Err(e);
            }
        };

        let outcome = self
            .state
            .engine
            .record_answer(&mut sequence, result.is_correct)?;

        let response_time_secs = req.response_time_secs.unwrap_or_else(|| {
            (Utc::now() - active.served_at).num_milliseconds().max(0) as f64 / 1000.0
        });

        let mut profile = self.load_profile(learner_id).await?;
        if profile.current_stage != question.stage {
            profile.enter_stage(question.stage);
        }
        profile.record(QuestionResult {
            question_id: question.id.clone(),
            stage: question.stage,
            topic: profile.current_topic.clone(),
            is_correct: result.is_correct,
            chosen_value: result.chosen_value.clone(),
            correct_value: result.verification_steps.correct_answer.clone(),
            response_time_secs,
            misconception: result.misconception.as_ref().map(|m| m.kind),
            recorded_at: Utc::now(),
        });
        if outcome.stage_changed() {
            profile.enter_stage(sequence.current_stage);
        }

        let feedback = self
            .state
            .feedback
            .feedback(&question, &result, &profile, &outcome)
            .await;

        // Consume the question first so a failed save can never be answered twice
        self.state.store.delete(&question_key(learner_id)).await?;
        self.save_sequence(learner_id, &sequence).await?;
        self.save_json(&profile_key(learner_id), &profile).await?;

        tracing::info!(
            "Learner {} answered {} on {}: correct={} misconception={:?} outcome={:?}",
            learner_id,
            chosen,
            question.number_key(),
            result.is_correct,
            result.misconception.as_ref().map(|m| m.kind),
            outcome
        );

        Ok(AnswerResponse {
            is_correct: result.is_correct,
            chosen_letter: chosen,
            correct_letter: question.correct_letter,
            verification: result,
            outcome,
            feedback,
            progress: self.progress(&sequence)?,
        })
    }

    fn progress(&self, sequence: &SequenceState) -> TutorResult<ProgressSnapshot> {
        let stage = self.stage(sequence)?;
        let tally = sequence.stage_tally(stage.id);
        Ok(ProgressSnapshot {
            stage: stage.id,
            stage_title: stage.title.to_string(),
            showing_example: self.state.engine.should_show_example(sequence),
            current_example_index: sequence.current_example_index,
            consecutive_correct: sequence.consecutive_correct,
            required_streak: stage.mastery.required_streak(),
            questions_attempted: sequence.questions_attempted,
            stage_attempted: tally.attempted,
            stage_correct: tally.correct,
        })
    }

    pub async fn current_stage(&self, learner_id: &str) -> TutorResult<ProgressSnapshot> {
        let sequence = self.load_sequence(learner_id).await?;
        self.progress(&sequence)
    }

    pub async fn profile(&self, learner_id: &str) -> TutorResult<ProfileResponse> {
        let profile = self.load_profile(learner_id).await?;
        Ok(ProfileResponse {
            total_questions: profile.total_questions,
            total_correct: profile.total_correct,
            accuracy: profile.accuracy(),
            consecutive_correct: profile.consecutive_correct,
            consecutive_incorrect: profile.consecutive_incorrect,
            is_struggling: profile.is_struggling(),
            is_excelling: profile.is_excelling(),
            engagement: profile.engagement,
            response_trend: profile.response_trend,
            average_response_secs: profile.average_response_secs,
            most_common_misconception: profile.most_common_misconception(),
            recent: profile.recent_summary(RECENT_WINDOW),
            topic: profile.topic_summary(&profile.current_topic),
        })
    }

    pub async fn reset(&self, learner_id: &str) -> TutorResult<StepResponse> {
        tracing::info!("Resetting lesson for learner {}", learner_id);
        for key in [
            sequence_key(learner_id),
            profile_key(learner_id),
            question_key(learner_id),
        ] {
            self.state.store.delete(&key).await?;
        }
        let mut sequence = self.state.engine.start();
        let step = self.render_step(learner_id, &mut sequence).await?;
        self.save_sequence(learner_id, &sequence).await?;
        Ok(step)
    }
}
