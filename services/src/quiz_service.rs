//! Quiz authoring, attempts, and grading.
//!
//! Attempt lifecycle: started → progressively answered → submitted →
//! auto_graded or pending_review → graded. Attempt numbers come from the
//! prior attempt count and are backstopped by the composite unique index
//! on (quiz, student, attempt_number). Time limits are informational:
//! an overrun is logged, never enforced as server-side expiry.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use db::events::{DomainEvent, EventSink};
use db::models::{enrollment, lesson, lesson_progress, question, quiz, quiz_submission};
use log::{info, warn};
use rand::seq::SliceRandom;
use sea_orm::ActiveValue::Set;
use sea_orm::{ActiveModelTrait, DbConn, EntityTrait, IntoActiveModel};
use serde_json::Value as JsonValue;

use crate::access;
use crate::enrollment_service::EnrollmentService;
use crate::error::{on_unique_violation, ServiceError, ServiceResult};

#[derive(Debug, Clone)]
pub struct CreateQuiz {
    pub lesson_id: i64,
    pub title: String,
    pub quiz_type: quiz::QuizType,
    pub time_limit_minutes: Option<i32>,
    pub passing_score_percentage: f64,
    /// 0 means unlimited.
    pub max_attempts: i32,
    pub randomize_questions: bool,
    pub randomize_options: bool,
    pub show_correct_answers: bool,
    pub show_explanations: bool,
    pub available_from: Option<DateTime<Utc>>,
    pub available_until: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct AddQuestion {
    pub quiz_id: i64,
    pub question_type: question::QuestionType,
    pub question_text: String,
    pub options: Option<JsonValue>,
    pub correct_answer: Option<JsonValue>,
    pub explanation: Option<String>,
    pub points: f64,
    pub difficulty: String,
}

/// Manual grade input: a flat total, or per-question points summed up.
#[derive(Debug, Clone)]
pub enum ManualGrade {
    Flat(f64),
    PerQuestion(HashMap<i64, f64>),
}

/// A freshly started attempt plus the questions to present, shuffled
/// for this attempt only when the quiz randomizes them.
#[derive(Debug, Clone)]
pub struct StartedAttempt {
    pub submission: quiz_submission::Model,
    pub questions: Vec<question::Model>,
}

#[derive(Debug, Clone)]
pub struct AttemptSummary {
    pub attempts_taken: u64,
    pub best_score: Option<f64>,
    pub latest_score: Option<f64>,
    /// None when the quiz allows unlimited attempts.
    pub attempts_remaining: Option<u64>,
}

pub struct QuizService;

impl QuizService {
    pub async fn create_quiz(
        db: &DbConn,
        actor: &db::models::user::Model,
        params: CreateQuiz,
    ) -> ServiceResult<quiz::Model> {
        let (target, course) = access::lesson_with_course(db, params.lesson_id).await?;
        access::ensure_manages(actor, &course)?;

        if target.lesson_type != lesson::LessonType::Quiz {
            return Err(ServiceError::validation(
                "lesson_id",
                "quizzes can only be attached to quiz lessons",
            ));
        }
        if params.title.trim().is_empty() {
            return Err(ServiceError::validation("title", "title must not be empty"));
        }
        if !(0.0..=100.0).contains(&params.passing_score_percentage) {
            return Err(ServiceError::validation(
                "passing_score_percentage",
                "passing score must be between 0 and 100",
            ));
        }
        if params.max_attempts < 0 {
            return Err(ServiceError::validation(
                "max_attempts",
                "max attempts must not be negative",
            ));
        }
        if let Some(limit) = params.time_limit_minutes {
            if limit <= 0 {
                return Err(ServiceError::validation(
                    "time_limit_minutes",
                    "time limit must be positive",
                ));
            }
        }
        if let (Some(from), Some(until)) = (params.available_from, params.available_until) {
            if from >= until {
                return Err(ServiceError::validation(
                    "available_until",
                    "availability window must open before it closes",
                ));
            }
        }

        let created = quiz::Model::create(
            db,
            params.lesson_id,
            &params.title,
            params.quiz_type,
            params.time_limit_minutes,
            params.passing_score_percentage,
            params.max_attempts,
            params.randomize_questions,
            params.randomize_options,
            params.show_correct_answers,
            params.show_explanations,
            params.available_from,
            params.available_until,
        )
        .await
        .map_err(|e| on_unique_violation(e, "lesson already has a quiz"))?;

        info!("quiz {} created for lesson {}", created.id, params.lesson_id);
        Ok(created)
    }

    /// Append a question, drawing its order number from the quiz's
    /// counter. The counter only moves forward, so order numbers are
    /// never reused even after deletions.
    pub async fn add_question(
        db: &DbConn,
        actor: &db::models::user::Model,
        params: AddQuestion,
    ) -> ServiceResult<question::Model> {
        let owning_quiz = find_quiz(db, params.quiz_id).await?;
        let (_, course) = access::lesson_with_course(db, owning_quiz.lesson_id).await?;
        access::ensure_manages(actor, &course)?;

        if params.question_text.trim().is_empty() {
            return Err(ServiceError::validation(
                "question_text",
                "question text must not be empty",
            ));
        }
        if params.points <= 0.0 {
            return Err(ServiceError::validation("points", "points must be positive"));
        }
        validate_question_payload(
            params.question_type,
            params.options.as_ref(),
            params.correct_answer.as_ref(),
        )?;

        let order_number = owning_quiz.next_question_order;
        let created = question::Model::create(
            db,
            params.quiz_id,
            params.question_type,
            &params.question_text,
            params.options,
            params.correct_answer,
            params.explanation.as_deref(),
            params.points,
            order_number,
            &params.difficulty,
        )
        .await
        .map_err(|e| on_unique_violation(e, "question order number already taken"))?;

        let mut active = owning_quiz.into_active_model();
        active.next_question_order = Set(order_number + 1);
        active.updated_at = Set(Utc::now());
        active.update(db).await?;

        Ok(created)
    }

    /// Pure eligibility check; `start_attempt` re-evaluates the same
    /// conditions against fresh state before inserting.
    pub fn can_start_attempt(q: &quiz::Model, attempts_taken: u64, now: DateTime<Utc>) -> bool {
        q.is_available_at(now) && q.has_attempts_remaining(attempts_taken)
    }

    pub async fn start_attempt(
        db: &DbConn,
        events: &EventSink,
        actor: &db::models::user::Model,
        quiz_id: i64,
    ) -> ServiceResult<StartedAttempt> {
        if !actor.is_student() {
            return Err(ServiceError::Forbidden(
                "only students can take quizzes".into(),
            ));
        }
        let target = find_quiz(db, quiz_id).await?;
        let (_, course) = access::lesson_with_course(db, target.lesson_id).await?;

        let active_enrollment =
            enrollment::Model::find_by_student_and_course(db, actor.id, course.id)
                .await?
                .ok_or_else(|| {
                    ServiceError::Forbidden("student is not enrolled in this course".into())
                })?;
        if !active_enrollment.is_active() {
            return Err(ServiceError::Conflict(format!(
                "enrollment is {} and cannot take quizzes",
                active_enrollment.status
            )));
        }

        let now = Utc::now();
        if !target.is_available_at(now) {
            return Err(ServiceError::Conflict(
                "quiz is outside its availability window".into(),
            ));
        }
        let taken = quiz_submission::Model::count_attempts(db, quiz_id, actor.id).await?;
        if !target.has_attempts_remaining(taken) {
            return Err(ServiceError::Conflict(format!(
                "attempt limit of {} reached",
                target.max_attempts
            )));
        }

        let attempt_number = taken as i32 + 1;
        let submission = quiz_submission::Model::start(
            db,
            quiz_id,
            actor.id,
            active_enrollment.id,
            attempt_number,
        )
        .await
        .map_err(|e| on_unique_violation(e, "another attempt was started concurrently"))?;

        lesson_progress::Model::record_attempt(db, active_enrollment.id, target.lesson_id)
            .await?;

        let mut questions = question::Model::find_by_quiz(db, quiz_id).await?;
        if target.randomize_questions {
            questions.shuffle(&mut rand::rng());
        }

        info!(
            "student {} started attempt {} of quiz {}",
            actor.id, attempt_number, quiz_id
        );
        events.publish(DomainEvent::QuizAttemptStarted {
            quiz_id,
            student_id: actor.id,
            attempt_number,
        });
        Ok(StartedAttempt {
            submission,
            questions,
        })
    }

    /// Merge one answer into the attempt's answers map. Per-question
    /// last-writer-wins; the shape of the answer is not checked here,
    /// grading handles that.
    pub async fn submit_answer(
        db: &DbConn,
        actor: &db::models::user::Model,
        submission_id: i64,
        question_id: i64,
        answer: JsonValue,
    ) -> ServiceResult<quiz_submission::Model> {
        let submission = find_submission(db, submission_id).await?;
        if submission.student_id != actor.id {
            return Err(ServiceError::Forbidden(
                "submission belongs to another student".into(),
            ));
        }
        if submission.is_submitted() {
            return Err(ServiceError::Conflict(
                "answers are immutable once the quiz is submitted".into(),
            ));
        }

        let belongs = question::Model::find_by_quiz(db, submission.quiz_id)
            .await?
            .iter()
            .any(|q| q.id == question_id);
        if !belongs {
            return Err(ServiceError::not_found("question in this quiz", question_id));
        }

        let mut map = submission
            .answers
            .as_object()
            .cloned()
            .unwrap_or_default();
        map.insert(question_id.to_string(), answer);

        let mut active = submission.into_active_model();
        active.answers = Set(JsonValue::Object(map));
        active.updated_at = Set(Utc::now());
        Ok(active.update(db).await?)
    }

    /// Hand in the attempt: freeze the answers, auto-grade the objective
    /// questions, and route subjective ones to manual review.
    pub async fn submit_quiz(
        db: &DbConn,
        events: &EventSink,
        actor: &db::models::user::Model,
        submission_id: i64,
    ) -> ServiceResult<quiz_submission::Model> {
        let submission = find_submission(db, submission_id).await?;
        if submission.student_id != actor.id {
            return Err(ServiceError::Forbidden(
                "submission belongs to another student".into(),
            ));
        }
        if submission.is_submitted() {
            return Err(ServiceError::Conflict("quiz was already submitted".into()));
        }

        let target = find_quiz(db, submission.quiz_id).await?;
        let questions = question::Model::find_by_quiz(db, submission.quiz_id).await?;

        let now = Utc::now();
        let time_taken = (now - submission.started_at).num_seconds().max(0) as i32;
        if let Some(limit) = target.time_limit_minutes {
            if time_taken > limit * 60 {
                warn!(
                    "submission {} exceeded the {}-minute limit ({}s taken)",
                    submission_id, limit, time_taken
                );
            }
        }

        let (earned, total) = auto_grade(&questions, &submission.answers);
        let score = round2(safe_score(earned, total));
        let needs_review = questions
            .iter()
            .any(|q| q.question_type.requires_manual_grading());

        let enrollment_id = submission.enrollment_id;
        let quiz_id = submission.quiz_id;
        let mut active = submission.into_active_model();
        active.submitted_at = Set(Some(now));
        active.time_taken_seconds = Set(Some(time_taken));
        active.points_earned = Set(Some(earned));
        active.score_percentage = Set(Some(score));
        active.grading_status = Set(if needs_review {
            quiz_submission::QuizGradingStatus::PendingReview
        } else {
            quiz_submission::QuizGradingStatus::AutoGraded
        });
        if !needs_review {
            active.graded_at = Set(Some(now));
        }
        active.updated_at = Set(now);
        let updated = active.update(db).await?;

        events.publish(DomainEvent::QuizSubmitted {
            submission_id,
            quiz_id,
            student_id: actor.id,
            score_percentage: score,
            pending_review: needs_review,
        });

        // Auto-grading is final unless review is pending; manual grading
        // drives the hook in that case.
        if !needs_review {
            EnrollmentService::record_graded_lesson(
                db,
                events,
                enrollment_id,
                target.lesson_id,
                Some(score),
            )
            .await?;
        }
        Ok(updated)
    }

    pub async fn grade_submission(
        db: &DbConn,
        events: &EventSink,
        actor: &db::models::user::Model,
        submission_id: i64,
        grade: ManualGrade,
        feedback: Option<String>,
    ) -> ServiceResult<quiz_submission::Model> {
        let submission = find_submission(db, submission_id).await?;
        let target = find_quiz(db, submission.quiz_id).await?;
        let (_, course) = access::lesson_with_course(db, target.lesson_id).await?;
        access::ensure_manages(actor, &course)?;

        if !submission.is_submitted() {
            return Err(ServiceError::Conflict(
                "submission has not been handed in yet".into(),
            ));
        }
        if submission.grading_status == quiz_submission::QuizGradingStatus::Graded {
            return Err(ServiceError::Conflict(
                "submission has already been graded".into(),
            ));
        }

        let questions = question::Model::find_by_quiz(db, submission.quiz_id).await?;
        let total: f64 = questions.iter().map(|q| q.points).sum();

        let earned = match grade {
            ManualGrade::Flat(points) => {
                if points < 0.0 || points > total {
                    return Err(ServiceError::validation(
                        "points_awarded",
                        "points must be between 0 and the quiz total",
                    ));
                }
                points
            }
            ManualGrade::PerQuestion(by_question) => {
                let mut sum = 0.0;
                for (question_id, points) in &by_question {
                    let q = questions.iter().find(|q| q.id == *question_id).ok_or_else(
                        || ServiceError::not_found("question in this quiz", *question_id),
                    )?;
                    if *points < 0.0 || *points > q.points {
                        return Err(ServiceError::validation(
                            "points_awarded",
                            "per-question points must be between 0 and the question's worth",
                        ));
                    }
                    sum += points;
                }
                sum
            }
        };

        let score = round2(safe_score(earned, total));
        let now = Utc::now();
        let student_id = submission.student_id;
        let enrollment_id = submission.enrollment_id;

        let mut active = submission.into_active_model();
        active.points_earned = Set(Some(earned));
        active.score_percentage = Set(Some(score));
        active.grading_status = Set(quiz_submission::QuizGradingStatus::Graded);
        active.graded_at = Set(Some(now));
        active.graded_by = Set(Some(actor.id));
        active.feedback = Set(feedback);
        active.updated_at = Set(now);
        let graded = active.update(db).await?;

        info!(
            "submission {} graded at {:.2}% by user {}",
            submission_id, score, actor.id
        );
        events.publish(DomainEvent::SubmissionGraded {
            submission_id,
            student_id,
            graded_by: actor.id,
            score,
        });

        EnrollmentService::record_graded_lesson(
            db,
            events,
            enrollment_id,
            target.lesson_id,
            Some(score),
        )
        .await?;
        Ok(graded)
    }

    pub async fn get_attempt_summary(
        db: &DbConn,
        quiz_id: i64,
        student_id: i64,
    ) -> ServiceResult<AttemptSummary> {
        let target = find_quiz(db, quiz_id).await?;
        let attempts = quiz_submission::Model::find_attempts(db, quiz_id, student_id).await?;

        let scores: Vec<f64> = attempts
            .iter()
            .filter_map(|a| a.score_percentage)
            .collect();
        let best_score = scores.iter().cloned().fold(None, |best: Option<f64>, s| {
            Some(best.map_or(s, |b| b.max(s)))
        });
        let latest_score = attempts.iter().rev().find_map(|a| a.score_percentage);

        let taken = attempts.len() as u64;
        let attempts_remaining = if target.max_attempts == 0 {
            None
        } else {
            Some((target.max_attempts as u64).saturating_sub(taken))
        };

        Ok(AttemptSummary {
            attempts_taken: taken,
            best_score,
            latest_score,
            attempts_remaining,
        })
    }
}

async fn find_quiz(db: &DbConn, quiz_id: i64) -> ServiceResult<quiz::Model> {
    quiz::Entity::find_by_id(quiz_id)
        .one(db)
        .await?
        .ok_or_else(|| ServiceError::not_found("quiz", quiz_id))
}

async fn find_submission(
    db: &DbConn,
    submission_id: i64,
) -> ServiceResult<quiz_submission::Model> {
    quiz_submission::Entity::find_by_id(submission_id)
        .one(db)
        .await?
        .ok_or_else(|| ServiceError::not_found("quiz submission", submission_id))
}

fn validate_question_payload(
    question_type: question::QuestionType,
    options: Option<&JsonValue>,
    correct_answer: Option<&JsonValue>,
) -> ServiceResult<()> {
    use question::QuestionType::*;

    match question_type {
        MultipleChoice => {
            let count = options
                .and_then(|o| o.as_array())
                .map(Vec::len)
                .unwrap_or(0);
            if count < 2 {
                return Err(ServiceError::validation(
                    "options",
                    "multiple choice needs at least two options",
                ));
            }
            let index = correct_answer.and_then(|a| a.as_i64());
            match index {
                Some(i) if i >= 0 && (i as usize) < count => Ok(()),
                _ => Err(ServiceError::validation(
                    "correct_answer",
                    "correct answer must be an option index within bounds",
                )),
            }
        }
        TrueFalse => match correct_answer.map(|a| a.is_boolean()) {
            Some(true) => Ok(()),
            _ => Err(ServiceError::validation(
                "correct_answer",
                "true/false needs a boolean correct answer",
            )),
        },
        ShortAnswer => match correct_answer.and_then(|a| a.as_str()) {
            Some(s) if !s.trim().is_empty() => Ok(()),
            _ => Err(ServiceError::validation(
                "correct_answer",
                "short answer needs a non-empty expected answer",
            )),
        },
        FillBlank => {
            let ok = correct_answer
                .and_then(|a| a.as_array())
                .map(|blanks| {
                    !blanks.is_empty()
                        && blanks
                            .iter()
                            .all(|b| b.as_str().is_some_and(|s| !s.trim().is_empty()))
                })
                .unwrap_or(false);
            if ok {
                Ok(())
            } else {
                Err(ServiceError::validation(
                    "correct_answer",
                    "fill-in-the-blank needs a non-empty list of expected answers",
                ))
            }
        }
        Matching => {
            let has_options = options.is_some_and(|o| !o.is_null());
            let has_mapping = correct_answer
                .and_then(|a| a.as_object())
                .is_some_and(|m| !m.is_empty());
            if has_options && has_mapping {
                Ok(())
            } else {
                Err(ServiceError::validation(
                    "correct_answer",
                    "matching needs both options and an answer mapping",
                ))
            }
        }
        Essay => Ok(()),
    }
}

/// Sum of (earned, total) points over all questions. No partial credit;
/// unanswered questions earn nothing.
fn auto_grade(questions: &[question::Model], answers: &JsonValue) -> (f64, f64) {
    let mut earned = 0.0;
    let mut total = 0.0;
    for q in questions {
        total += q.points;
        if let Some(answer) = answers.get(q.id.to_string()) {
            if q.check_answer(answer) {
                earned += q.points;
            }
        }
    }
    (earned, total)
}

fn safe_score(earned: f64, total: f64) -> f64 {
    if total <= 0.0 { 0.0 } else { earned * 100.0 / total }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use db::factories::{course_factory, user_factory};
    use db::models::lesson::LessonType;
    use db::models::question::QuestionType;
    use db::models::quiz::QuizType;
    use db::models::quiz_submission::QuizGradingStatus;
    use db::test_utils::setup_test_db;
    use serde_json::json;

    use crate::course_service::{AddLesson, CourseService};
    use crate::enrollment_service::EnrollmentService;

    struct Fixture {
        instructor: db::models::user::Model,
        student: db::models::user::Model,
        enrollment: enrollment::Model,
        quiz: quiz::Model,
    }

    fn quiz_params(lesson_id: i64) -> CreateQuiz {
        CreateQuiz {
            lesson_id,
            title: "Checkpoint".into(),
            quiz_type: QuizType::Formative,
            time_limit_minutes: None,
            passing_score_percentage: 50.0,
            max_attempts: 0,
            randomize_questions: false,
            randomize_options: false,
            show_correct_answers: false,
            show_explanations: false,
            available_from: None,
            available_until: None,
        }
    }

    fn mc_question(quiz_id: i64, text: &str, options: usize, correct: i64) -> AddQuestion {
        AddQuestion {
            quiz_id,
            question_type: QuestionType::MultipleChoice,
            question_text: text.into(),
            options: Some(json!(
                (0..options).map(|i| format!("option {i}")).collect::<Vec<_>>()
            )),
            correct_answer: Some(json!(correct)),
            explanation: None,
            points: 5.0,
            difficulty: "medium".into(),
        }
    }

    /// Published course with one quiz lesson, one enrolled student, and
    /// an empty quiz attached.
    async fn fixture(db: &DbConn, params: impl FnOnce(i64) -> CreateQuiz) -> Fixture {
        let events = EventSink::disabled();
        let instructor = user_factory::instructor(db).await;
        let (course, modules, _) = course_factory::with_structure(db, instructor.id, 3, 1).await;
        let quiz_lesson = CourseService::add_lesson(
            db,
            &events,
            &instructor,
            modules[0].id,
            AddLesson {
                title: "Module quiz".into(),
                lesson_type: LessonType::Quiz,
                order_number: 2,
                is_preview: false,
                duration_minutes: 15,
                content_url: None,
                content_text: None,
            },
        )
        .await
        .unwrap();
        CourseService::publish(db, &events, &instructor, course.id)
            .await
            .unwrap();

        let student = user_factory::student(db).await;
        let enrollment = EnrollmentService::enroll_student(db, &events, &student, course.id)
            .await
            .unwrap();
        let quiz = QuizService::create_quiz(db, &instructor, params(quiz_lesson.id))
            .await
            .unwrap();

        Fixture {
            instructor,
            student,
            enrollment,
            quiz,
        }
    }

    #[tokio::test]
    async fn quiz_requires_a_quiz_lesson() {
        let db = setup_test_db().await;
        let instructor = user_factory::instructor(&db).await;
        let (_, _, lessons) = course_factory::with_structure(&db, instructor.id, 3, 1).await;

        // Factory lessons are text lessons.
        let err = QuizService::create_quiz(&db, &instructor, quiz_params(lessons[0].id))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Validation { .. }));
    }

    #[tokio::test]
    async fn one_quiz_per_lesson() {
        let db = setup_test_db().await;
        let f = fixture(&db, quiz_params).await;

        let err = QuizService::create_quiz(&db, &f.instructor, quiz_params(f.quiz.lesson_id))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Conflict(_)));
    }

    #[tokio::test]
    async fn inverted_availability_window_is_rejected() {
        let db = setup_test_db().await;
        let instructor = user_factory::instructor(&db).await;
        let (_, modules, _) = course_factory::with_structure(&db, instructor.id, 3, 1).await;
        let quiz_lesson = CourseService::add_lesson(
            &db,
            &EventSink::disabled(),
            &instructor,
            modules[0].id,
            AddLesson {
                title: "Q".into(),
                lesson_type: LessonType::Quiz,
                order_number: 2,
                is_preview: false,
                duration_minutes: 5,
                content_url: None,
                content_text: None,
            },
        )
        .await
        .unwrap();

        let now = Utc::now();
        let mut params = quiz_params(quiz_lesson.id);
        params.available_from = Some(now);
        params.available_until = Some(now - Duration::hours(1));
        let err = QuizService::create_quiz(&db, &instructor, params)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Validation { .. }));
    }

    #[tokio::test]
    async fn question_order_numbers_survive_deletions() {
        let db = setup_test_db().await;
        let f = fixture(&db, quiz_params).await;

        let q1 = QuizService::add_question(&db, &f.instructor, mc_question(f.quiz.id, "a", 3, 0))
            .await
            .unwrap();
        let q2 = QuizService::add_question(&db, &f.instructor, mc_question(f.quiz.id, "b", 3, 1))
            .await
            .unwrap();
        assert_eq!((q1.order_number, q2.order_number), (1, 2));

        question::Entity::delete_by_id(q2.id).exec(&db).await.unwrap();
        let q3 = QuizService::add_question(&db, &f.instructor, mc_question(f.quiz.id, "c", 3, 2))
            .await
            .unwrap();
        assert_eq!(q3.order_number, 3);
    }

    #[tokio::test]
    async fn out_of_bounds_correct_index_is_rejected() {
        let db = setup_test_db().await;
        let f = fixture(&db, quiz_params).await;

        let err = QuizService::add_question(&db, &f.instructor, mc_question(f.quiz.id, "x", 3, 3))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Validation { .. }));
    }

    #[test]
    fn payload_validation_per_type() {
        use question::QuestionType::*;

        assert!(validate_question_payload(Essay, None, None).is_ok());
        assert!(validate_question_payload(TrueFalse, None, Some(&json!(true))).is_ok());
        assert!(validate_question_payload(TrueFalse, None, Some(&json!("true"))).is_err());
        assert!(validate_question_payload(ShortAnswer, None, Some(&json!("  "))).is_err());
        assert!(validate_question_payload(FillBlank, None, Some(&json!(["a", ""]))).is_err());
        assert!(validate_question_payload(FillBlank, None, Some(&json!(["a", "b"]))).is_ok());
        assert!(validate_question_payload(
            Matching,
            Some(&json!({"left": ["a"], "right": ["b"]})),
            Some(&json!({"a": "b"}))
        )
        .is_ok());
        assert!(validate_question_payload(Matching, None, Some(&json!({"a": "b"}))).is_err());
    }

    #[tokio::test]
    async fn attempt_numbers_increase_and_limit_is_enforced() {
        let db = setup_test_db().await;
        let f = fixture(&db, |lesson_id| CreateQuiz {
            max_attempts: 2,
            ..quiz_params(lesson_id)
        })
        .await;
        let events = EventSink::disabled();

        let a1 = QuizService::start_attempt(&db, &events, &f.student, f.quiz.id)
            .await
            .unwrap();
        let a2 = QuizService::start_attempt(&db, &events, &f.student, f.quiz.id)
            .await
            .unwrap();
        assert_eq!(a1.submission.attempt_number, 1);
        assert_eq!(a2.submission.attempt_number, 2);

        let progress = lesson_progress::Model::find_by_enrollment_and_lesson(
            &db,
            f.enrollment.id,
            f.quiz.lesson_id,
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(progress.attempts_count, 2);

        let err = QuizService::start_attempt(&db, &events, &f.student, f.quiz.id)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Conflict(_)));
    }

    #[tokio::test]
    async fn closed_window_blocks_attempts() {
        let db = setup_test_db().await;
        let f = fixture(&db, |lesson_id| CreateQuiz {
            available_from: Some(Utc::now() - Duration::hours(2)),
            available_until: Some(Utc::now() - Duration::hours(1)),
            ..quiz_params(lesson_id)
        })
        .await;

        assert!(!QuizService::can_start_attempt(&f.quiz, 0, Utc::now()));
        let err = QuizService::start_attempt(&db, &EventSink::disabled(), &f.student, f.quiz.id)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Conflict(_)));
    }

    #[tokio::test]
    async fn shuffled_attempt_still_returns_every_question() {
        let db = setup_test_db().await;
        let f = fixture(&db, |lesson_id| CreateQuiz {
            randomize_questions: true,
            ..quiz_params(lesson_id)
        })
        .await;
        for i in 0..5 {
            QuizService::add_question(
                &db,
                &f.instructor,
                mc_question(f.quiz.id, &format!("q{i}"), 4, 0),
            )
            .await
            .unwrap();
        }

        let attempt = QuizService::start_attempt(&db, &EventSink::disabled(), &f.student, f.quiz.id)
            .await
            .unwrap();
        let mut ids: Vec<i64> = attempt.questions.iter().map(|q| q.id).collect();
        ids.sort_unstable();
        let mut expected: Vec<i64> = question::Model::find_by_quiz(&db, f.quiz.id)
            .await
            .unwrap()
            .iter()
            .map(|q| q.id)
            .collect();
        expected.sort_unstable();
        assert_eq!(ids, expected);
    }

    #[tokio::test]
    async fn answers_merge_per_question_with_last_writer_wins() {
        let db = setup_test_db().await;
        let f = fixture(&db, quiz_params).await;
        let events = EventSink::disabled();
        let q1 = QuizService::add_question(&db, &f.instructor, mc_question(f.quiz.id, "a", 3, 0))
            .await
            .unwrap();
        let q2 = QuizService::add_question(&db, &f.instructor, mc_question(f.quiz.id, "b", 3, 1))
            .await
            .unwrap();

        let attempt = QuizService::start_attempt(&db, &events, &f.student, f.quiz.id)
            .await
            .unwrap();
        let id = attempt.submission.id;

        QuizService::submit_answer(&db, &f.student, id, q1.id, json!(2))
            .await
            .unwrap();
        QuizService::submit_answer(&db, &f.student, id, q2.id, json!(1))
            .await
            .unwrap();
        let merged = QuizService::submit_answer(&db, &f.student, id, q1.id, json!(0))
            .await
            .unwrap();

        assert_eq!(merged.answers[q1.id.to_string()], json!(0));
        assert_eq!(merged.answers[q2.id.to_string()], json!(1));
    }

    #[tokio::test]
    async fn answers_freeze_after_submission() {
        let db = setup_test_db().await;
        let f = fixture(&db, quiz_params).await;
        let events = EventSink::disabled();
        let q = QuizService::add_question(&db, &f.instructor, mc_question(f.quiz.id, "a", 3, 0))
            .await
            .unwrap();

        let attempt = QuizService::start_attempt(&db, &events, &f.student, f.quiz.id)
            .await
            .unwrap();
        QuizService::submit_quiz(&db, &events, &f.student, attempt.submission.id)
            .await
            .unwrap();

        let err = QuizService::submit_answer(&db, &f.student, attempt.submission.id, q.id, json!(1))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Conflict(_)));
    }

    #[tokio::test]
    async fn objective_quiz_is_auto_graded_and_completes_the_lesson() {
        let db = setup_test_db().await;
        let f = fixture(&db, quiz_params).await;
        let events = EventSink::disabled();
        let q1 = QuizService::add_question(&db, &f.instructor, mc_question(f.quiz.id, "a", 3, 2))
            .await
            .unwrap();
        let q2 = QuizService::add_question(&db, &f.instructor, mc_question(f.quiz.id, "b", 3, 1))
            .await
            .unwrap();

        let attempt = QuizService::start_attempt(&db, &events, &f.student, f.quiz.id)
            .await
            .unwrap();
        let id = attempt.submission.id;
        QuizService::submit_answer(&db, &f.student, id, q1.id, json!(2))
            .await
            .unwrap();
        QuizService::submit_answer(&db, &f.student, id, q2.id, json!(0))
            .await
            .unwrap();

        let graded = QuizService::submit_quiz(&db, &events, &f.student, id)
            .await
            .unwrap();
        assert_eq!(graded.grading_status, QuizGradingStatus::AutoGraded);
        assert_eq!(graded.points_earned, Some(5.0));
        assert_eq!(graded.score_percentage, Some(50.0));
        assert!(graded.graded_at.is_some());

        let progress = db::models::lesson_progress::Model::find_by_enrollment_and_lesson(
            &db,
            f.enrollment.id,
            f.quiz.lesson_id,
        )
        .await
        .unwrap()
        .unwrap();
        assert!(progress.is_completed());
        assert_eq!(progress.quiz_score, Some(50.0));
    }

    #[tokio::test]
    async fn essay_questions_force_pending_review() {
        let db = setup_test_db().await;
        let f = fixture(&db, quiz_params).await;
        let events = EventSink::disabled();
        QuizService::add_question(&db, &f.instructor, mc_question(f.quiz.id, "a", 3, 0))
            .await
            .unwrap();
        QuizService::add_question(
            &db,
            &f.instructor,
            AddQuestion {
                quiz_id: f.quiz.id,
                question_type: QuestionType::Essay,
                question_text: "Discuss.".into(),
                options: None,
                correct_answer: None,
                explanation: None,
                points: 10.0,
                difficulty: "hard".into(),
            },
        )
        .await
        .unwrap();

        let attempt = QuizService::start_attempt(&db, &events, &f.student, f.quiz.id)
            .await
            .unwrap();
        let submitted = QuizService::submit_quiz(&db, &events, &f.student, attempt.submission.id)
            .await
            .unwrap();

        assert_eq!(submitted.grading_status, QuizGradingStatus::PendingReview);
        assert!(submitted.graded_at.is_none());

        // The lesson stays open until manual grading finalizes the score.
        let progress = db::models::lesson_progress::Model::find_by_enrollment_and_lesson(
            &db,
            f.enrollment.id,
            f.quiz.lesson_id,
        )
        .await
        .unwrap()
        .unwrap();
        assert!(!progress.is_completed());
    }

    #[tokio::test]
    async fn withdrawal_mid_attempt_does_not_fail_the_hand_in() {
        let db = setup_test_db().await;
        let f = fixture(&db, quiz_params).await;
        let events = EventSink::disabled();
        let q = QuizService::add_question(&db, &f.instructor, mc_question(f.quiz.id, "a", 3, 0))
            .await
            .unwrap();

        let attempt = QuizService::start_attempt(&db, &events, &f.student, f.quiz.id)
            .await
            .unwrap();
        QuizService::submit_answer(&db, &f.student, attempt.submission.id, q.id, json!(0))
            .await
            .unwrap();
        crate::enrollment_service::EnrollmentService::withdraw_enrollment(
            &db,
            &events,
            f.enrollment.id,
            "changed plans",
        )
        .await
        .unwrap();

        // The submission still freezes and grades; only the progress
        // write is skipped for the terminal enrollment.
        let graded = QuizService::submit_quiz(&db, &events, &f.student, attempt.submission.id)
            .await
            .unwrap();
        assert_eq!(graded.grading_status, QuizGradingStatus::AutoGraded);
        assert_eq!(graded.score_percentage, Some(100.0));

        let progress = lesson_progress::Model::find_by_enrollment_and_lesson(
            &db,
            f.enrollment.id,
            f.quiz.lesson_id,
        )
        .await
        .unwrap()
        .unwrap();
        assert!(!progress.is_completed());
        assert!(progress.quiz_score.is_none());
    }

    #[tokio::test]
    async fn manual_grade_sums_per_question_points() {
        let db = setup_test_db().await;
        let f = fixture(&db, quiz_params).await;
        let events = EventSink::disabled();
        let q1 = QuizService::add_question(&db, &f.instructor, mc_question(f.quiz.id, "a", 3, 0))
            .await
            .unwrap();
        let q2 = QuizService::add_question(
            &db,
            &f.instructor,
            AddQuestion {
                quiz_id: f.quiz.id,
                question_type: QuestionType::Essay,
                question_text: "Discuss.".into(),
                options: None,
                correct_answer: None,
                explanation: None,
                points: 15.0,
                difficulty: "hard".into(),
            },
        )
        .await
        .unwrap();

        let attempt = QuizService::start_attempt(&db, &events, &f.student, f.quiz.id)
            .await
            .unwrap();
        let id = attempt.submission.id;
        QuizService::submit_answer(&db, &f.student, id, q1.id, json!(0))
            .await
            .unwrap();
        QuizService::submit_quiz(&db, &events, &f.student, id)
            .await
            .unwrap();

        let mut by_question = HashMap::new();
        by_question.insert(q1.id, 5.0);
        by_question.insert(q2.id, 12.0);
        let graded = QuizService::grade_submission(
            &db,
            &events,
            &f.instructor,
            id,
            ManualGrade::PerQuestion(by_question),
            Some("solid work".into()),
        )
        .await
        .unwrap();

        assert_eq!(graded.grading_status, QuizGradingStatus::Graded);
        assert_eq!(graded.points_earned, Some(17.0));
        assert_eq!(graded.score_percentage, Some(85.0));
        assert_eq!(graded.graded_by, Some(f.instructor.id));

        let err = QuizService::grade_submission(
            &db,
            &events,
            &f.instructor,
            id,
            ManualGrade::Flat(20.0),
            None,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ServiceError::Conflict(_)));
    }

    #[tokio::test]
    async fn grading_requires_a_handed_in_submission() {
        let db = setup_test_db().await;
        let f = fixture(&db, quiz_params).await;
        let events = EventSink::disabled();
        QuizService::add_question(&db, &f.instructor, mc_question(f.quiz.id, "a", 3, 0))
            .await
            .unwrap();

        let attempt = QuizService::start_attempt(&db, &events, &f.student, f.quiz.id)
            .await
            .unwrap();
        let err = QuizService::grade_submission(
            &db,
            &events,
            &f.instructor,
            attempt.submission.id,
            ManualGrade::Flat(5.0),
            None,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ServiceError::Conflict(_)));
    }

    #[tokio::test]
    async fn attempt_summary_tracks_best_latest_and_remaining() {
        let db = setup_test_db().await;
        let f = fixture(&db, |lesson_id| CreateQuiz {
            max_attempts: 3,
            ..quiz_params(lesson_id)
        })
        .await;
        let events = EventSink::disabled();
        let q = QuizService::add_question(&db, &f.instructor, mc_question(f.quiz.id, "a", 3, 1))
            .await
            .unwrap();

        // First attempt: correct. Second attempt: wrong.
        let a1 = QuizService::start_attempt(&db, &events, &f.student, f.quiz.id)
            .await
            .unwrap();
        QuizService::submit_answer(&db, &f.student, a1.submission.id, q.id, json!(1))
            .await
            .unwrap();
        QuizService::submit_quiz(&db, &events, &f.student, a1.submission.id)
            .await
            .unwrap();
        let a2 = QuizService::start_attempt(&db, &events, &f.student, f.quiz.id)
            .await
            .unwrap();
        QuizService::submit_answer(&db, &f.student, a2.submission.id, q.id, json!(0))
            .await
            .unwrap();
        QuizService::submit_quiz(&db, &events, &f.student, a2.submission.id)
            .await
            .unwrap();

        let summary = QuizService::get_attempt_summary(&db, f.quiz.id, f.student.id)
            .await
            .unwrap();
        assert_eq!(summary.attempts_taken, 2);
        assert_eq!(summary.best_score, Some(100.0));
        assert_eq!(summary.latest_score, Some(0.0));
        assert_eq!(summary.attempts_remaining, Some(1));
    }

    #[tokio::test]
    async fn students_cannot_touch_each_others_attempts() {
        let db = setup_test_db().await;
        let f = fixture(&db, quiz_params).await;
        let events = EventSink::disabled();
        let q = QuizService::add_question(&db, &f.instructor, mc_question(f.quiz.id, "a", 3, 0))
            .await
            .unwrap();
        let attempt = QuizService::start_attempt(&db, &events, &f.student, f.quiz.id)
            .await
            .unwrap();

        let other = user_factory::student(&db).await;
        let err =
            QuizService::submit_answer(&db, &other, attempt.submission.id, q.id, json!(0))
                .await
                .unwrap_err();
        assert!(matches!(err, ServiceError::Forbidden(_)));
    }
}
