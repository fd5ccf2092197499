use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};

use super::sequence::StageTally;
use super::stage::StageId;
use super::verification::MisconceptionKind;

pub const DEFAULT_HISTORY_LIMIT: usize = 50;
pub const DEFAULT_TOPIC: &str = "rounding";

const TREND_WINDOW: usize = 3;

/// One answered question as fed to the profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionResult {
    pub question_id: String,
    pub stage: StageId,
    pub topic: String,
    pub is_correct: bool,
    pub chosen_value: String,
    pub correct_value: String,
    pub response_time_secs: f64,
    pub misconception: Option<MisconceptionKind>,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseTrend {
    Improving,
    #[default]
    Stable,
    Declining,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngagementLevel {
    High,
    #[default]
    Normal,
    Low,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopicTally {
    pub attempted: u32,
    pub correct: u32,
    pub current_stage: StageId,
    pub last_activity: Option<DateTime<Utc>>,
    #[serde(default)]
    pub misconceptions: BTreeMap<MisconceptionKind, u32>,
}

impl TopicTally {
    fn new(stage: StageId) -> Self {
        Self {
            attempted: 0,
            correct: 0,
            current_stage: stage,
            last_activity: None,
            misconceptions: BTreeMap::new(),
        }
    }

    pub fn accuracy(&self) -> f64 {
        if self.attempted == 0 {
            0.0
        } else {
            self.correct as f64 / self.attempted as f64
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecentSummary {
    pub questions: usize,
    pub correct: usize,
    pub accuracy: f64,
    pub average_time_secs: f64,
    pub misconceptions: Vec<MisconceptionKind>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TopicSummary {
    pub topic: String,
    pub attempted: u32,
    pub correct: u32,
    pub accuracy: f64,
    pub current_stage: StageId,
    pub last_activity: Option<DateTime<Utc>>,
    pub misconceptions: BTreeMap<MisconceptionKind, u32>,
}

/// Read-only view handed to feedback generation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LearnerContext {
    pub current_stage: StageId,
    pub total_questions: u32,
    pub accuracy: f64,
    pub consecutive_correct: u32,
    pub consecutive_incorrect: u32,
    pub is_struggling: bool,
    pub is_excelling: bool,
    pub engagement: EngagementLevel,
    pub response_trend: ResponseTrend,
    pub most_common_misconception: Option<MisconceptionKind>,
    pub learns_from_mistakes_quickly: bool,
    pub prefers_encouragement: bool,
    pub responds_to_challenges: bool,
}

/// Rolling learner statistics. Aggregates are updated on each append; struggling and
/// excelling are always computed from the counters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StudentProfile {
    pub total_questions: u32,
    pub total_correct: u32,
    pub consecutive_correct: u32,
    pub consecutive_incorrect: u32,
    pub current_stage: StageId,
    pub current_topic: String,
    pub history: VecDeque<QuestionResult>,
    pub history_limit: usize,
    pub misconceptions: BTreeMap<MisconceptionKind, u32>,
    pub stage_results: BTreeMap<StageId, StageTally>,
    pub topics: BTreeMap<String, TopicTally>,
    pub session_started_at: DateTime<Utc>,
    pub questions_this_session: u32,
    pub average_response_secs: f64,
    pub response_trend: ResponseTrend,
    pub engagement: EngagementLevel,
    pub learns_from_mistakes_quickly: bool,
    pub prefers_encouragement: bool,
    pub responds_to_challenges: bool,
}

impl StudentProfile {
    pub fn new(history_limit: usize) -> Self {
        Self::starting_at(history_limit, Utc::now())
    }

    pub fn starting_at(history_limit: usize, session_started_at: DateTime<Utc>) -> Self {
        Self {
            total_questions: 0,
            total_correct: 0,
            consecutive_correct: 0,
            consecutive_incorrect: 0,
            current_stage: StageId::OneDpNoUp,
            current_topic: DEFAULT_TOPIC.to_string(),
            history: VecDeque::new(),
            history_limit: history_limit.max(1),
            misconceptions: BTreeMap::new(),
            stage_results: BTreeMap::new(),
            topics: BTreeMap::new(),
            session_started_at,
            questions_this_session: 0,
            average_response_secs: 0.0,
            response_trend: ResponseTrend::Stable,
            engagement: EngagementLevel::Normal,
            learns_from_mistakes_quickly: true,
            prefers_encouragement: true,
            responds_to_challenges: false,
        }
    }

    pub fn record(&mut self, result: QuestionResult) {
        self.total_questions += 1;
        self.questions_this_session += 1;

        if result.is_correct {
            self.total_correct += 1;
            self.consecutive_correct += 1;
            self.consecutive_incorrect = 0;
        } else {
            self.consecutive_correct = 0;
            self.consecutive_incorrect += 1;
        }

        if let Some(kind) = result.misconception {
            *self.misconceptions.entry(kind).or_insert(0) += 1;
        }

        self.stage_results
            .entry(result.stage)
            .or_default()
            .record(result.is_correct);

        let topic = self
            .topics
            .entry(result.topic.clone())
            .or_insert_with(|| TopicTally::new(result.stage));
        topic.attempted += 1;
        if result.is_correct {
            topic.correct += 1;
        }
        topic.current_stage = result.stage;
        topic.last_activity = Some(result.recorded_at);
        if let Some(kind) = result.misconception {
            *topic.misconceptions.entry(kind).or_insert(0) += 1;
        }

        let n = self.total_questions as f64;
        self.average_response_secs =
            (self.average_response_secs * (n - 1.0) + result.response_time_secs) / n;

        let now = result.recorded_at;
        self.history.push_back(result);
        while self.history.len() > self.history_limit {
            self.history.pop_front();
        }

        self.response_trend = self.compute_trend();
        self.update_behaviour(now);
    }

    fn compute_trend(&self) -> ResponseTrend {
        if self.history.len() < TREND_WINDOW {
            return self.response_trend;
        }
        let window: Vec<f64> = self
            .history
            .iter()
            .rev()
            .take(TREND_WINDOW)
            .map(|r| r.response_time_secs)
            .collect();
        let latest = window[0];
        let first = window[TREND_WINDOW - 1];
        if first <= 0.0 {
            ResponseTrend::Stable
        } else if latest <= first * 0.8 {
            ResponseTrend::Improving
        } else if latest >= first * 1.2 {
            ResponseTrend::Declining
        } else {
            ResponseTrend::Stable
        }
    }

    fn update_behaviour(&mut self, now: DateTime<Utc>) {
        if self.consecutive_incorrect >= 2 {
            self.learns_from_mistakes_quickly = false;
        } else if self.consecutive_correct >= 3
            && self.history.iter().rev().take(5).any(|r| !r.is_correct)
        {
            self.learns_from_mistakes_quickly = true;
        }

        let session_minutes = (now - self.session_started_at).num_seconds() as f64 / 60.0;
        self.engagement = if self.questions_this_session > 10 && session_minutes < 20.0 {
            EngagementLevel::High
        } else if self.average_response_secs > 30.0 {
            EngagementLevel::Low
        } else {
            EngagementLevel::Normal
        };

        if self.accuracy() > 0.8 && self.consecutive_correct >= 4 {
            self.responds_to_challenges = true;
        }
    }

    pub fn accuracy(&self) -> f64 {
        if self.total_questions == 0 {
            0.0
        } else {
            self.total_correct as f64 / self.total_questions as f64
        }
    }

    pub fn current_stage_accuracy(&self) -> Option<f64> {
        self.stage_results
            .get(&self.current_stage)
            .and_then(StageTally::accuracy)
    }

    pub fn most_common_misconception(&self) -> Option<MisconceptionKind> {
        // ties go to the earlier kind in taxonomy order
        self.misconceptions
            .iter()
            .fold(None, |best: Option<(MisconceptionKind, u32)>, (kind, count)| match best {
                Some((_, best_count)) if best_count >= *count => best,
                _ => Some((*kind, *count)),
            })
            .map(|(kind, _)| kind)
    }

    pub fn misconception_count(&self, kind: MisconceptionKind) -> u32 {
        self.misconceptions.get(&kind).copied().unwrap_or(0)
    }

    /// Accuracy conditions only count once something has been attempted.
    pub fn is_struggling(&self) -> bool {
        if self.consecutive_incorrect >= 2 {
            return true;
        }
        if self.total_questions > 0 && self.accuracy() < 0.4 {
            return true;
        }
        matches!(self.current_stage_accuracy(), Some(acc) if acc < 0.3)
    }

    pub fn is_excelling(&self) -> bool {
        self.consecutive_correct >= 4 || (self.accuracy() > 0.8 && self.total_questions >= 5)
    }

    pub fn recent_summary(&self, last_n: usize) -> RecentSummary {
        let recent: Vec<&QuestionResult> = self.history.iter().rev().take(last_n).rev().collect();
        if recent.is_empty() {
            return RecentSummary {
                questions: 0,
                correct: 0,
                accuracy: 0.0,
                average_time_secs: 0.0,
                misconceptions: Vec::new(),
            };
        }
        let correct = recent.iter().filter(|r| r.is_correct).count();
        let total_time: f64 = recent.iter().map(|r| r.response_time_secs).sum();
        RecentSummary {
            questions: recent.len(),
            correct,
            accuracy: correct as f64 / recent.len() as f64,
            average_time_secs: total_time / recent.len() as f64,
            misconceptions: recent.iter().filter_map(|r| r.misconception).collect(),
        }
    }

    pub fn topic_summary(&self, topic: &str) -> TopicSummary {
        match self.topics.get(topic) {
            Some(tally) => TopicSummary {
                topic: topic.to_string(),
                attempted: tally.attempted,
                correct: tally.correct,
                accuracy: tally.accuracy(),
                current_stage: tally.current_stage,
                last_activity: tally.last_activity,
                misconceptions: tally.misconceptions.clone(),
            },
            None => TopicSummary {
                topic: topic.to_string(),
                attempted: 0,
                correct: 0,
                accuracy: 0.0,
                current_stage: StageId::OneDpNoUp,
                last_activity: None,
                misconceptions: BTreeMap::new(),
            },
        }
    }

    fn topic_history(&self, topic: &str) -> Vec<&QuestionResult> {
        self.history.iter().filter(|r| r.topic == topic).collect()
    }

    fn topic_history_accuracy(results: &[&QuestionResult]) -> f64 {
        if results.is_empty() {
            return 0.0;
        }
        results.iter().filter(|r| r.is_correct).count() as f64 / results.len() as f64
    }

    pub fn is_struggling_in_topic(&self, topic: &str) -> bool {
        let results = self.topic_history(topic);
        if results.len() < 3 {
            return false;
        }
        let recent_correct = results.iter().rev().take(3).filter(|r| r.is_correct).count();
        recent_correct == 0 || Self::topic_history_accuracy(&results) < 0.4
    }

    pub fn is_excelling_in_topic(&self, topic: &str) -> bool {
        let results = self.topic_history(topic);
        if results.len() < 3 {
            return false;
        }
        let recent_correct = results.iter().rev().take(4).filter(|r| r.is_correct).count();
        recent_correct >= 3 || Self::topic_history_accuracy(&results) > 0.8
    }

    /// Streaks do not carry across topics.
    pub fn switch_topic(&mut self, topic: &str) {
        self.current_topic = topic.to_string();
        self.consecutive_correct = 0;
        self.consecutive_incorrect = 0;
        self.current_stage = self
            .topics
            .get(topic)
            .map(|t| t.current_stage)
            .unwrap_or(StageId::OneDpNoUp);
    }

    pub fn enter_stage(&mut self, stage: StageId) {
        self.current_stage = stage;
        if let Some(tally) = self.topics.get_mut(&self.current_topic) {
            tally.current_stage = stage;
        }
    }

    pub fn learner_context(&self) -> LearnerContext {
        LearnerContext {
            current_stage: self.current_stage,
            total_questions: self.total_questions,
            accuracy: self.accuracy(),
            consecutive_correct: self.consecutive_correct,
            consecutive_incorrect: self.consecutive_incorrect,
            is_struggling: self.is_struggling(),
            is_excelling: self.is_excelling(),
            engagement: self.engagement,
            response_trend: self.response_trend,
            most_common_misconception: self.most_common_misconception(),
            learns_from_mistakes_quickly: self.learns_from_mistakes_quickly,
            prefers_encouragement: self.prefers_encouragement,
            responds_to_challenges: self.responds_to_challenges,
        }
    }
}

impl Default for StudentProfile {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_LIMIT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn result_at(
        at: DateTime<Utc>,
        is_correct: bool,
        secs: f64,
        misconception: Option<MisconceptionKind>,
    ) -> QuestionResult {
        QuestionResult {
            question_id: uuid::Uuid::new_v4().to_string(),
            stage: StageId::OneDpMixed,
            topic: DEFAULT_TOPIC.to_string(),
            is_correct,
            chosen_value: "1.2".to_string(),
            correct_value: "1.2".to_string(),
            response_time_secs: secs,
            misconception,
            recorded_at: at,
        }
    }

    fn profile() -> (StudentProfile, DateTime<Utc>) {
        let start = Utc::now();
        let mut profile = StudentProfile::starting_at(DEFAULT_HISTORY_LIMIT, start);
        profile.enter_stage(StageId::OneDpMixed);
        (profile, start)
    }

    #[test]
    fn fresh_profile_is_neither_struggling_nor_excelling() {
        let (profile, _) = profile();
        assert!(!profile.is_struggling());
        assert!(!profile.is_excelling());
        assert_eq!(profile.most_common_misconception(), None);
    }

    #[test]
    fn struggling_toggles_on_two_misses_and_off_on_next_hit() {
        let (mut profile, start) = profile();
        for i in 0..8 {
            profile.record(result_at(start + Duration::seconds(i), true, 5.0, None));
        }
        assert!(!profile.is_struggling());

        let miss = Some(MisconceptionKind::RoundedToWholeNumber);
        profile.record(result_at(start, false, 5.0, miss));
        assert!(!profile.is_struggling());
        profile.record(result_at(start, false, 5.0, miss));
        assert!(profile.is_struggling());

        profile.record(result_at(start, true, 5.0, None));
        assert_eq!(profile.consecutive_incorrect, 0);
        assert!(!profile.is_struggling());
    }

    #[test]
    fn low_accuracy_marks_struggling() {
        let (mut profile, start) = profile();
        profile.record(result_at(start, false, 5.0, None));
        profile.record(result_at(start, true, 5.0, None));
        profile.record(result_at(start, false, 5.0, None));
        profile.record(result_at(start, true, 5.0, None));
        profile.record(result_at(start, false, 5.0, None));
        // 2 of 5
        assert_eq!(profile.consecutive_incorrect, 1);
        assert!(!profile.is_struggling());
        profile.record(result_at(start, false, 5.0, None));
        assert!(profile.is_struggling());
    }

    #[test]
    fn excelling_by_streak_or_accuracy() {
        let (mut profile, start) = profile();
        for _ in 0..4 {
            profile.record(result_at(start, true, 5.0, None));
        }
        assert!(profile.is_excelling());
        assert!(profile.responds_to_challenges);

        profile.record(result_at(start, false, 5.0, None));
        // 4 of 5 is not above 0.8
        assert!(!profile.is_excelling());
        profile.record(result_at(start, true, 5.0, None));
        assert!(profile.is_excelling());
    }

    #[test]
    fn response_trend_over_last_three() {
        let (mut profile, start) = profile();
        for secs in [10.0, 9.0, 7.9] {
            profile.record(result_at(start, true, secs, None));
        }
        assert_eq!(profile.response_trend, ResponseTrend::Improving);

        for secs in [8.0, 9.0, 9.7] {
            profile.record(result_at(start, true, secs, None));
        }
        assert_eq!(profile.response_trend, ResponseTrend::Declining);

        for secs in [10.0, 10.0, 11.0] {
            profile.record(result_at(start, true, secs, None));
        }
        assert_eq!(profile.response_trend, ResponseTrend::Stable);

        for secs in [0.0, 3.0, 9.0] {
            profile.record(result_at(start, true, secs, None));
        }
        assert_eq!(profile.response_trend, ResponseTrend::Stable);
    }

    #[test]
    fn average_response_time_is_running_mean() {
        let (mut profile, start) = profile();
        for secs in [4.0, 8.0, 12.0] {
            profile.record(result_at(start, true, secs, None));
        }
        assert!((profile.average_response_secs - 8.0).abs() < 1e-9);
    }

    #[test]
    fn engagement_levels() {
        let (mut fast, start) = profile();
        for i in 0..11 {
            fast.record(result_at(start + Duration::seconds(i * 20), true, 5.0, None));
        }
        assert_eq!(fast.engagement, EngagementLevel::High);

        let (mut slow, start) = profile();
        slow.record(result_at(start + Duration::minutes(1), true, 45.0, None));
        assert_eq!(slow.engagement, EngagementLevel::Low);

        let (mut steady, start) = profile();
        steady.record(result_at(start, true, 12.0, None));
        assert_eq!(steady.engagement, EngagementLevel::Normal);
    }

    #[test]
    fn history_is_bounded_but_counters_are_not() {
        let mut profile = StudentProfile::new(3);
        let now = Utc::now();
        for _ in 0..5 {
            profile.record(result_at(now, true, 1.0, None));
        }
        assert_eq!(profile.history.len(), 3);
        assert_eq!(profile.total_questions, 5);
        assert_eq!(profile.recent_summary(10).questions, 3);
    }

    #[test]
    fn misconception_histogram_and_most_common() {
        let (mut profile, start) = profile();
        let whole = MisconceptionKind::RoundedToWholeNumber;
        let places = MisconceptionKind::WrongDecimalPlaces;
        profile.record(result_at(start, false, 5.0, Some(places)));
        profile.record(result_at(start, false, 5.0, Some(whole)));
        profile.record(result_at(start, false, 5.0, Some(whole)));
        assert_eq!(profile.misconception_count(whole), 2);
        assert_eq!(profile.most_common_misconception(), Some(whole));
        assert!(!profile.learns_from_mistakes_quickly);

        let topic = profile.topic_summary(DEFAULT_TOPIC);
        assert_eq!(topic.attempted, 3);
        assert_eq!(topic.misconceptions.get(&whole), Some(&2));
    }

    #[test]
    fn recent_summary_takes_latest_results() {
        let (mut profile, start) = profile();
        profile.record(result_at(start, false, 2.0, Some(MisconceptionKind::NinesCarryError)));
        profile.record(result_at(start, true, 4.0, None));
        profile.record(result_at(start, true, 6.0, None));

        let summary = profile.recent_summary(2);
        assert_eq!(summary.questions, 2);
        assert_eq!(summary.correct, 2);
        assert!((summary.average_time_secs - 5.0).abs() < 1e-9);
        assert!(summary.misconceptions.is_empty());

        assert_eq!(
            profile.recent_summary(5).misconceptions,
            vec![MisconceptionKind::NinesCarryError]
        );
    }

    #[test]
    fn topic_flags_need_three_results() {
        let (mut profile, start) = profile();
        profile.record(result_at(start, false, 5.0, None));
        profile.record(result_at(start, false, 5.0, None));
        assert!(!profile.is_struggling_in_topic(DEFAULT_TOPIC));
        profile.record(result_at(start, false, 5.0, None));
        assert!(profile.is_struggling_in_topic(DEFAULT_TOPIC));
        assert!(!profile.is_excelling_in_topic(DEFAULT_TOPIC));

        for _ in 0..3 {
            profile.record(result_at(start, true, 5.0, None));
        }
        assert!(profile.is_excelling_in_topic(DEFAULT_TOPIC));
        assert!(!profile.is_struggling_in_topic("fractions"));
    }

    #[test]
    fn switching_topic_resets_streaks() {
        let (mut profile, start) = profile();
        profile.record(result_at(start, true, 5.0, None));
        profile.record(result_at(start, true, 5.0, None));
        profile.switch_topic("fractions");
        assert_eq!(profile.consecutive_correct, 0);
        assert_eq!(profile.current_topic, "fractions");
        assert_eq!(profile.current_stage, StageId::OneDpNoUp);

        profile.switch_topic(DEFAULT_TOPIC);
        assert_eq!(profile.current_stage, StageId::OneDpMixed);
    }

    #[test]
    fn stage_accuracy_follows_entered_stage() {
        let (mut profile, start) = profile();
        profile.record(result_at(start, false, 5.0, None));
        profile.record(result_at(start, true, 5.0, None));
        profile.record(result_at(start, true, 5.0, None));
        profile.enter_stage(StageId::MultiDp);
        assert_eq!(profile.current_stage_accuracy(), None);
        assert_eq!(profile.topic_summary(DEFAULT_TOPIC).current_stage, StageId::MultiDp);
    }

    #[test]
    fn profile_round_trips_through_json() {
        let (mut profile, start) = profile();
        profile.record(result_at(start, false, 3.5, Some(MisconceptionKind::LookedAtWrongDigit)));
        let json = serde_json::to_string(&profile).unwrap();
        let restored: StudentProfile = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, profile);
    }
}
