//! Score aggregation.
//!
//! Objective questions are scored all-or-nothing against the answer key.
//! Subjective and match questions are graded by hand, each entry capped so
//! that the running exam total never passes [`MAX_EXAM_POINTS`].

use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::model::{AnswerPayload, Question, QuestionId, QuestionType, ScoreEntry, StudentId};

/// Upper bound of a student's total for one exam.
pub const MAX_EXAM_POINTS: f64 = 100.0;

/// Points for an objective question, `None` for manually graded types.
///
/// Multi-select answers earn nothing unless the selected set equals the
/// correct set exactly.
pub fn objective_points(question: &Question, payload: Option<&AnswerPayload>) -> Option<f64> {
    let correct: BTreeSet<&str> = question.correct_answers.iter().map(String::as_str).collect();
    let is_correct = match (question.question_type, payload) {
        (QuestionType::Single, Some(AnswerPayload::Single(choice))) => {
            correct.len() == 1 && correct.contains(choice.as_str())
        }
        (QuestionType::Multi, Some(AnswerPayload::Multi(choices))) => {
            !correct.is_empty() && choices.iter().map(String::as_str).collect::<BTreeSet<_>>() == correct
        }
        (QuestionType::Single | QuestionType::Multi, _) => false,
        _ => return None,
    };
    Some(if is_correct { question.max_points } else { 0.0 })
}

/// Largest value a grader may enter for `question_id` given the other
/// questions' current points: `clamp(max_points, 0, 100 - others)`.
pub fn remaining_cap(
    current: &HashMap<QuestionId, f64>,
    question_id: QuestionId,
    max_points: f64,
) -> f64 {
    let others: f64 = current
        .iter()
        .filter(|(id, _)| **id != question_id)
        .map(|(_, points)| *points)
        .sum();
    max_points.min(MAX_EXAM_POINTS - others).max(0.0)
}

/// Mean of the provided components. Unset components are left out of the
/// mean rather than counted as zero.
pub fn composite_score(components: &[Option<f64>]) -> Option<f64> {
    let provided: Vec<f64> = components.iter().flatten().copied().collect();
    if provided.is_empty() {
        return None;
    }
    Some(provided.iter().sum::<f64>() / provided.len() as f64)
}

/// `min(100, sum)`.
pub fn exam_total<I: IntoIterator<Item = f64>>(points: I) -> f64 {
    points.into_iter().sum::<f64>().min(MAX_EXAM_POINTS)
}

#[derive(Debug, Clone, Copy, Default)]
struct Components {
    written: Option<f64>,
    skill: Option<f64>,
}

/// One student's scores for one exam, as edited on a grading screen.
#[derive(Debug, Clone)]
pub struct ScoreSheet {
    student_id: StudentId,
    questions: Vec<(QuestionId, QuestionType, f64)>,
    points: HashMap<QuestionId, f64>,
    components: HashMap<QuestionId, Components>,
    dirty: BTreeSet<QuestionId>,
}

impl ScoreSheet {
    pub fn new(student_id: StudentId, questions: &[Question]) -> Self {
        Self {
            student_id,
            questions: questions
                .iter()
                .map(|q| (q.id, q.question_type, q.max_points))
                .collect(),
            points: HashMap::new(),
            components: HashMap::new(),
            dirty: BTreeSet::new(),
        }
    }

    pub fn student_id(&self) -> StudentId {
        self.student_id
    }

    /// Score every objective question from the student's answers.
    pub fn score_objective(&mut self, questions: &[Question], answers: &HashMap<QuestionId, AnswerPayload>) {
        for question in questions {
            if let Some(points) = objective_points(question, answers.get(&question.id)) {
                self.points.insert(question.id, points);
            }
        }
    }

    /// Load points saved earlier without marking them dirty.
    pub fn restore(&mut self, entries: &[ScoreEntry]) {
        for entry in entries {
            if self.question(entry.question_id).is_err() {
                continue;
            }
            self.points.insert(entry.question_id, entry.points);
            if entry.written.is_some() || entry.skill.is_some() {
                self.components.insert(
                    entry.question_id,
                    Components {
                        written: entry.written,
                        skill: entry.skill,
                    },
                );
            }
        }
    }

    pub fn remaining_cap(&self, question_id: QuestionId) -> Result<f64, ValidationError> {
        let (_, _, max_points) = self.question(question_id)?;
        Ok(remaining_cap(&self.points, question_id, max_points))
    }

    /// Enter points for a manually graded question. Values above the
    /// remaining cap are clamped to it; the applied value is returned.
    pub fn set_points(&mut self, question_id: QuestionId, points: f64) -> Result<f64, ValidationError> {
        let (_, question_type, _) = self.question(question_id)?;
        if question_type.is_objective() {
            return Err(ValidationError::NotManuallyGraded(question_id));
        }
        if !points.is_finite() || points < 0.0 {
            return Err(ValidationError::InvalidPoints {
                question_id,
                points,
            });
        }
        let applied = points.min(self.remaining_cap(question_id)?);
        self.points.insert(question_id, applied);
        self.components.remove(&question_id);
        self.dirty.insert(question_id);
        Ok(applied)
    }

    /// Enter written/skill components; the question scores their mean.
    /// Returns the applied score, or `None` when both components are unset.
    pub fn set_components(
        &mut self,
        question_id: QuestionId,
        written: Option<f64>,
        skill: Option<f64>,
    ) -> Result<Option<f64>, ValidationError> {
        let (_, question_type, max_points) = self.question(question_id)?;
        if question_type.is_objective() {
            return Err(ValidationError::NotManuallyGraded(question_id));
        }
        for points in [written, skill].into_iter().flatten() {
            if !points.is_finite() || !(0.0..=max_points).contains(&points) {
                return Err(ValidationError::InvalidPoints {
                    question_id,
                    points,
                });
            }
        }

        self.dirty.insert(question_id);
        let Some(mean) = composite_score(&[written, skill]) else {
            self.points.remove(&question_id);
            self.components.remove(&question_id);
            return Ok(None);
        };
        let applied = mean.min(self.remaining_cap(question_id)?);
        self.points.insert(question_id, applied);
        self.components
            .insert(question_id, Components { written, skill });
        Ok(Some(applied))
    }

    pub fn points(&self, question_id: QuestionId) -> Option<f64> {
        self.points.get(&question_id).copied()
    }

    pub fn total(&self) -> f64 {
        exam_total(self.points.values().copied())
    }

    pub fn entry(&self, question_id: QuestionId) -> Option<ScoreEntry> {
        let points = self.points(question_id)?;
        let components = self.components.get(&question_id).copied().unwrap_or_default();
        Some(ScoreEntry {
            question_id,
            student_id: self.student_id,
            points,
            written: components.written,
            skill: components.skill,
        })
    }

    /// Manually graded entries changed since the last [`ScoreSheet::mark_saved`].
    pub fn dirty_entries(&self) -> Vec<ScoreEntry> {
        self.dirty
            .iter()
            .map(|&id| {
                self.entry(id).unwrap_or(ScoreEntry {
                    question_id: id,
                    student_id: self.student_id,
                    points: 0.0,
                    written: None,
                    skill: None,
                })
            })
            .collect()
    }

    pub fn mark_saved(&mut self, question_id: QuestionId) {
        self.dirty.remove(&question_id);
    }

    pub fn snapshot(&self) -> ScoreSnapshot {
        let mut objective_total = 0.0;
        let mut manual_total = 0.0;
        let questions = self
            .questions
            .iter()
            .map(|&(question_id, question_type, max_points)| {
                let points = self.points(question_id);
                if question_type.is_objective() {
                    objective_total += points.unwrap_or(0.0);
                } else {
                    manual_total += points.unwrap_or(0.0);
                }
                QuestionScore {
                    question_id,
                    question_type,
                    max_points,
                    points,
                    cap: remaining_cap(&self.points, question_id, max_points),
                }
            })
            .collect();

        ScoreSnapshot {
            student_id: self.student_id,
            questions,
            objective_total,
            manual_total,
            total: self.total(),
        }
    }

    fn question(&self, question_id: QuestionId) -> Result<(QuestionId, QuestionType, f64), ValidationError> {
        self.questions
            .iter()
            .find(|(id, _, _)| *id == question_id)
            .copied()
            .ok_or(ValidationError::UnknownQuestion(question_id))
    }
}

/// Per-question row of a grading screen.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionScore {
    pub question_id: QuestionId,
    pub question_type: QuestionType,
    pub max_points: f64,
    pub points: Option<f64>,
    /// Largest value the grader may currently enter.
    pub cap: f64,
}

/// Aggregated scores for one student.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreSnapshot {
    pub student_id: StudentId,
    pub questions: Vec<QuestionScore>,
    pub objective_total: f64,
    pub manual_total: f64,
    pub total: f64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn question(id: QuestionId, question_type: QuestionType, max_points: f64, correct: &[&str]) -> Question {
        Question {
            id,
            question_type,
            content: format!("question {id}"),
            max_points,
            options: vec![],
            premises: vec![],
            correct_answers: correct.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn multi_select_without_exact_set_scores_zero() {
        let q = question(1, QuestionType::Multi, 10.0, &["A", "B", "C"]);
        let partial = AnswerPayload::Multi(["A".to_string(), "C".to_string()].into());
        assert_eq!(objective_points(&q, Some(&partial)), Some(0.0));

        let exact = AnswerPayload::Multi(["C".to_string(), "B".into(), "A".into()].into());
        assert_eq!(objective_points(&q, Some(&exact)), Some(10.0));
    }

    #[test]
    fn single_choice_scoring() {
        let q = question(2, QuestionType::Single, 5.0, &["B"]);
        assert_eq!(objective_points(&q, Some(&AnswerPayload::Single("B".into()))), Some(5.0));
        assert_eq!(objective_points(&q, Some(&AnswerPayload::Single("A".into()))), Some(0.0));
        assert_eq!(objective_points(&q, None), Some(0.0));
    }

    #[test]
    fn manual_types_have_no_objective_points() {
        let q = question(3, QuestionType::Essay, 20.0, &[]);
        assert_eq!(objective_points(&q, Some(&AnswerPayload::Essay("x".into()))), None);
    }

    #[test]
    fn composite_mean_skips_unset_components() {
        assert_eq!(composite_score(&[Some(80.0), Some(60.0)]), Some(70.0));
        assert_eq!(composite_score(&[Some(80.0), None]), Some(80.0));
        assert_eq!(composite_score(&[None, None]), None);
    }

    #[test]
    fn restored_points_count_against_the_cap() {
        let questions = vec![
            question(1, QuestionType::Essay, 60.0, &[]),
            question(2, QuestionType::Essay, 60.0, &[]),
        ];
        let mut sheet = ScoreSheet::new(9, &questions);
        sheet.restore(&[
            ScoreEntry {
                question_id: 1,
                student_id: 9,
                points: 60.0,
                written: None,
                skill: None,
            },
            ScoreEntry {
                question_id: 77,
                student_id: 9,
                points: 5.0,
                written: None,
                skill: None,
            },
        ]);
        assert_eq!(sheet.points(1), Some(60.0));
        assert_eq!(sheet.points(77), None);
        assert!(sheet.dirty_entries().is_empty());
        assert_eq!(sheet.remaining_cap(2).unwrap(), 40.0);
    }

    #[test]
    fn match_question_scored_by_components() {
        let questions = vec![question(1, QuestionType::Match, 100.0, &[])];
        let mut sheet = ScoreSheet::new(9, &questions);
        let applied = sheet.set_components(1, Some(80.0), Some(60.0)).unwrap();
        assert_eq!(applied, Some(70.0));
        let entry = sheet.entry(1).unwrap();
        assert_eq!(entry.written, Some(80.0));
        assert_eq!(entry.skill, Some(60.0));
    }

    #[test]
    fn cap_accounts_for_other_questions() {
        let questions = vec![
            question(1, QuestionType::Essay, 60.0, &[]),
            question(2, QuestionType::Essay, 60.0, &[]),
        ];
        let mut sheet = ScoreSheet::new(1, &questions);
        assert_eq!(sheet.set_points(1, 55.0).unwrap(), 55.0);
        assert_eq!(sheet.remaining_cap(2).unwrap(), 45.0);
        assert_eq!(sheet.set_points(2, 60.0).unwrap(), 45.0);
        assert_eq!(sheet.total(), 100.0);

        // Lowering one frees budget for the other.
        sheet.set_points(1, 30.0).unwrap();
        assert_eq!(sheet.remaining_cap(2).unwrap(), 60.0);
    }

    #[test]
    fn objective_questions_reject_manual_points() {
        let questions = vec![question(1, QuestionType::Single, 10.0, &["A"])];
        let mut sheet = ScoreSheet::new(1, &questions);
        assert_eq!(
            sheet.set_points(1, 5.0),
            Err(ValidationError::NotManuallyGraded(1))
        );
        assert!(matches!(
            sheet.set_points(99, 5.0),
            Err(ValidationError::UnknownQuestion(99))
        ));
    }

    #[test]
    fn negative_points_are_invalid() {
        let questions = vec![question(1, QuestionType::Short, 10.0, &[])];
        let mut sheet = ScoreSheet::new(1, &questions);
        assert!(sheet.set_points(1, -1.0).is_err());
        assert!(sheet.set_points(1, f64::NAN).is_err());
        assert!(sheet.set_components(1, Some(11.0), None).is_err());
    }

    #[test]
    fn random_edit_orders_never_exceed_budget() {
        let mut rng = StdRng::seed_from_u64(1234);
        for _ in 0..50 {
            let questions: Vec<Question> = (1..=8)
                .map(|id| question(id, QuestionType::Essay, rng.gen_range(5..40) as f64, &[]))
                .collect();
            let mut sheet = ScoreSheet::new(1, &questions);

            for _ in 0..40 {
                let q = &questions[rng.gen_range(0..questions.len())];
                let cap = sheet.remaining_cap(q.id).unwrap();
                let others: f64 = questions
                    .iter()
                    .filter(|o| o.id != q.id)
                    .filter_map(|o| sheet.points(o.id))
                    .sum();
                assert!(others + cap <= MAX_EXAM_POINTS + 1e-9);

                let wanted = rng.gen_range(0.0..q.max_points);
                let applied = sheet.set_points(q.id, wanted).unwrap();
                assert!(applied <= cap + 1e-9);

                let sum: f64 = questions.iter().filter_map(|o| sheet.points(o.id)).sum();
                assert!(sum <= MAX_EXAM_POINTS + 1e-9);
                assert_eq!(sheet.total(), sum.min(MAX_EXAM_POINTS));
            }
        }
    }

    #[test]
    fn snapshot_splits_objective_and_manual() {
        let questions = vec![
            question(1, QuestionType::Single, 40.0, &["A"]),
            question(2, QuestionType::Essay, 60.0, &[]),
        ];
        let mut answers = HashMap::new();
        answers.insert(1, AnswerPayload::Single("A".into()));

        let mut sheet = ScoreSheet::new(3, &questions);
        sheet.score_objective(&questions, &answers);
        sheet.set_points(2, 35.0).unwrap();

        let snapshot = sheet.snapshot();
        assert_eq!(snapshot.objective_total, 40.0);
        assert_eq!(snapshot.manual_total, 35.0);
        assert_eq!(snapshot.total, 75.0);
        assert_eq!(snapshot.questions[1].cap, 60.0);
        assert_eq!(sheet.dirty_entries().len(), 1);
    }
}
