//! Enrollment lifecycle and progress tracking.
//!
//! Per-enrollment state machine: active → completed (all lessons done)
//! or active → dropped (withdrawal); both end states are terminal and
//! reject further progress writes. Certificate issuance rides on the
//! unique index over `certificates.enrollment_id`, so completion races
//! cannot double-issue.

use chrono::Utc;
use db::events::{DomainEvent, EventSink};
use db::models::{certificate, course_module, enrollment, lesson, lesson_progress};
use log::{info, warn};
use sea_orm::ActiveValue::Set;
use sea_orm::{ActiveModelTrait, DbConn, EntityTrait, IntoActiveModel};

use crate::access;
use crate::error::{on_unique_violation, ServiceError, ServiceResult};

/// Partial update applied to one lesson's progress row.
#[derive(Debug, Clone, Default)]
pub struct ProgressUpdate {
    /// Additional seconds spent; merged additively.
    pub time_spent_seconds: Option<i32>,
    pub status: Option<lesson_progress::ProgressStatus>,
}

#[derive(Debug, Clone)]
pub struct ModuleProgress {
    pub module_id: i64,
    pub title: String,
    pub total_lessons: usize,
    pub completed_lessons: usize,
    /// Derived, not stored: every lesson in the module completed.
    pub complete: bool,
}

#[derive(Debug, Clone)]
pub struct EnrollmentProgress {
    pub enrollment: enrollment::Model,
    pub modules: Vec<ModuleProgress>,
}

pub struct EnrollmentService;

impl EnrollmentService {
    /// Enroll a student into a published course.
    ///
    /// Creates the enrollment at 0% plus one `not_started` progress row
    /// per lesson. The (student, course) unique index rejects duplicates
    /// atomically; the error surfaces as a conflict.
    pub async fn enroll_student(
        db: &DbConn,
        events: &EventSink,
        actor: &db::models::user::Model,
        course_id: i64,
    ) -> ServiceResult<enrollment::Model> {
        if !actor.is_student() {
            return Err(ServiceError::Forbidden(
                "only students can enroll in courses".into(),
            ));
        }
        let course = access::course_by_id(db, course_id).await?;
        if !course.is_published() {
            return Err(ServiceError::Conflict(
                "course is not open for enrollment".into(),
            ));
        }

        let created = enrollment::Model::create(db, actor.id, course_id)
            .await
            .map_err(|e| on_unique_violation(e, "student is already enrolled in this course"))?;

        for l in lesson::Model::find_by_course(db, course_id).await? {
            lesson_progress::Model::create_not_started(db, created.id, l.id).await?;
        }

        info!(
            "student {} enrolled in course {} (enrollment {})",
            actor.id, course_id, created.id
        );
        events.publish(DomainEvent::StudentEnrolled {
            enrollment_id: created.id,
            student_id: actor.id,
            course_id,
        });
        Ok(created)
    }

    /// Merge a progress update into one lesson's row, recomputing the
    /// enrollment percentage on first completion and finishing the
    /// course when every lesson is done.
    pub async fn update_lesson_progress(
        db: &DbConn,
        events: &EventSink,
        enrollment_id: i64,
        lesson_id: i64,
        update: ProgressUpdate,
    ) -> ServiceResult<lesson_progress::Model> {
        let enrollment = find_enrollment(db, enrollment_id).await?;
        if !enrollment.is_active() {
            return Err(ServiceError::Conflict(format!(
                "enrollment is {} and no longer accepts progress updates",
                enrollment.status
            )));
        }

        if let Some(secs) = update.time_spent_seconds {
            if secs < 0 {
                return Err(ServiceError::validation(
                    "time_spent_seconds",
                    "time spent must not be negative",
                ));
            }
        }

        let progress =
            lesson_progress::Model::find_by_enrollment_and_lesson(db, enrollment_id, lesson_id)
                .await?
                .ok_or_else(|| ServiceError::not_found("lesson progress for lesson", lesson_id))?;

        let was_completed = progress.is_completed();
        let now = Utc::now();

        let mut active = progress.clone().into_active_model();
        if let Some(secs) = update.time_spent_seconds {
            active.time_spent_seconds = Set(progress.time_spent_seconds.saturating_add(secs));
        }
        if let Some(status) = update.status {
            // completed_at is set exactly once; later writes are no-ops.
            if status == lesson_progress::ProgressStatus::Completed && !was_completed {
                active.completed_at = Set(Some(now));
            }
            if !(was_completed && status != lesson_progress::ProgressStatus::Completed) {
                active.status = Set(status);
            }
        }
        active.updated_at = Set(now);
        let updated = active.update(db).await?;

        if updated.is_completed() && !was_completed {
            let percentage = Self::recompute_percentage(db, &enrollment).await?;
            events.publish(DomainEvent::LessonCompleted {
                enrollment_id,
                lesson_id,
                progress_percentage: percentage,
            });

            if percentage >= 100.0 {
                Self::complete_course(db, events, enrollment_id).await?;
            }
        }

        Ok(updated)
    }

    /// Grading-completion hook used by the quiz and assignment engines.
    ///
    /// Marks the owning lesson completed (idempotent) and records the
    /// quiz score when one is supplied. Callers invoke this after their
    /// own mutation has committed, so a dropped enrollment downgrades to
    /// a logged no-op rather than failing an already-recorded grade.
    pub async fn record_graded_lesson(
        db: &DbConn,
        events: &EventSink,
        enrollment_id: i64,
        lesson_id: i64,
        quiz_score: Option<f64>,
    ) -> ServiceResult<()> {
        let enrollment = find_enrollment(db, enrollment_id).await?;
        if enrollment.status == enrollment::EnrollmentStatus::Dropped {
            warn!(
                "enrollment {} is dropped; ignoring graded lesson {}",
                enrollment_id, lesson_id
            );
            return Ok(());
        }

        let progress =
            lesson_progress::Model::find_by_enrollment_and_lesson(db, enrollment_id, lesson_id)
                .await?
                .ok_or_else(|| ServiceError::not_found("lesson progress for lesson", lesson_id))?;

        let was_completed = progress.is_completed();
        let now = Utc::now();
        let mut active = progress.into_active_model();
        if let Some(score) = quiz_score {
            active.quiz_score = Set(Some(score));
        }
        if !was_completed {
            active.status = Set(lesson_progress::ProgressStatus::Completed);
            active.completed_at = Set(Some(now));
        }
        active.updated_at = Set(now);
        active.update(db).await?;

        if !was_completed && enrollment.is_active() {
            let percentage = Self::recompute_percentage(db, &enrollment).await?;
            events.publish(DomainEvent::LessonCompleted {
                enrollment_id,
                lesson_id,
                progress_percentage: percentage,
            });
            if percentage >= 100.0 {
                Self::complete_course(db, events, enrollment_id).await?;
            }
        }
        Ok(())
    }

    pub async fn withdraw_enrollment(
        db: &DbConn,
        events: &EventSink,
        enrollment_id: i64,
        reason: &str,
    ) -> ServiceResult<enrollment::Model> {
        let enrollment = find_enrollment(db, enrollment_id).await?;
        if !enrollment.is_active() {
            return Err(ServiceError::Conflict(format!(
                "enrollment is already {}",
                enrollment.status
            )));
        }

        let mut active = enrollment.into_active_model();
        active.status = Set(enrollment::EnrollmentStatus::Dropped);
        active.updated_at = Set(Utc::now());
        let dropped = active.update(db).await?;

        info!("enrollment {} withdrawn: {}", enrollment_id, reason);
        events.publish(DomainEvent::EnrollmentWithdrawn {
            enrollment_id,
            reason: reason.to_owned(),
        });
        Ok(dropped)
    }

    /// Per-module completion rollup plus the stored overall percentage.
    pub async fn get_enrollment_progress(
        db: &DbConn,
        enrollment_id: i64,
    ) -> ServiceResult<EnrollmentProgress> {
        let enrollment = find_enrollment(db, enrollment_id).await?;
        let rows = lesson_progress::Model::find_by_enrollment(db, enrollment_id).await?;
        let modules = course_module::Model::find_by_course(db, enrollment.course_id).await?;

        let mut rollup = Vec::with_capacity(modules.len());
        for module in modules {
            let lessons = lesson::Model::find_by_module(db, module.id).await?;
            let completed = lessons
                .iter()
                .filter(|l| {
                    rows.iter()
                        .any(|p| p.lesson_id == l.id && p.is_completed())
                })
                .count();
            rollup.push(ModuleProgress {
                module_id: module.id,
                title: module.title,
                total_lessons: lessons.len(),
                completed_lessons: completed,
                complete: !lessons.is_empty() && completed == lessons.len(),
            });
        }

        Ok(EnrollmentProgress {
            enrollment,
            modules: rollup,
        })
    }

    async fn recompute_percentage(
        db: &DbConn,
        enrollment: &enrollment::Model,
    ) -> ServiceResult<f64> {
        let total = lesson_progress::Model::count_by_enrollment(db, enrollment.id).await?;
        let completed = lesson_progress::Model::count_completed(db, enrollment.id).await?;
        let percentage = round2(safe_percentage(completed as f64, total as f64));

        let mut active = enrollment.clone().into_active_model();
        active.progress_percentage = Set(percentage);
        active.updated_at = Set(Utc::now());
        active.update(db).await?;
        Ok(percentage)
    }

    async fn complete_course(
        db: &DbConn,
        events: &EventSink,
        enrollment_id: i64,
    ) -> ServiceResult<()> {
        let enrollment = find_enrollment(db, enrollment_id).await?;
        if enrollment.status == enrollment::EnrollmentStatus::Completed {
            return Ok(());
        }
        let now = Utc::now();
        let course_id = enrollment.course_id;

        let mut active = enrollment.clone().into_active_model();
        active.status = Set(enrollment::EnrollmentStatus::Completed);
        active.completed_at = Set(Some(now));
        active.updated_at = Set(now);
        active.update(db).await?;

        info!("enrollment {} completed course {}", enrollment_id, course_id);
        events.publish(DomainEvent::CourseCompleted {
            enrollment_id,
            course_id,
            completed_at: now,
        });

        Self::issue_certificate(db, events, enrollment_id).await
    }

    /// At-most-once issuance: a pre-existing certificate short-circuits
    /// as a no-op, and a racing insert collapses into the same outcome
    /// via the unique index.
    async fn issue_certificate(
        db: &DbConn,
        events: &EventSink,
        enrollment_id: i64,
    ) -> ServiceResult<()> {
        if certificate::Model::find_by_enrollment(db, enrollment_id)
            .await?
            .is_some()
        {
            warn!("enrollment {} already holds a certificate", enrollment_id);
            return Ok(());
        }

        let issued = match certificate::Model::issue(db, enrollment_id).await {
            Ok(cert) => cert,
            Err(e) => {
                return match on_unique_violation(e, "certificate already issued") {
                    ServiceError::Conflict(_) => {
                        warn!("lost certificate race for enrollment {}", enrollment_id);
                        Ok(())
                    }
                    other => Err(other),
                };
            }
        };

        let enrollment = find_enrollment(db, enrollment_id).await?;
        let mut active = enrollment.into_active_model();
        active.certificate_id = Set(Some(issued.code.clone()));
        active.updated_at = Set(Utc::now());
        active.update(db).await?;

        events.publish(DomainEvent::CertificateIssued {
            enrollment_id,
            certificate_id: issued.id,
            code: issued.code,
        });
        Ok(())
    }
}

async fn find_enrollment(db: &DbConn, enrollment_id: i64) -> ServiceResult<enrollment::Model> {
    enrollment::Entity::find_by_id(enrollment_id)
        .one(db)
        .await?
        .ok_or_else(|| ServiceError::not_found("enrollment", enrollment_id))
}

fn safe_percentage(part: f64, whole: f64) -> f64 {
    if whole <= 0.0 { 0.0 } else { part * 100.0 / whole }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use db::events::EventSink;
    use db::factories::{course_factory, user_factory};
    use db::models::lesson_progress::ProgressStatus;
    use db::test_utils::setup_test_db;

    async fn published_course(
        db: &DbConn,
        modules: usize,
        lessons_per_module: usize,
    ) -> (db::models::course::Model, Vec<db::models::lesson::Model>) {
        let instructor = user_factory::instructor(db).await;
        let (course, _, lessons) =
            course_factory::with_structure(db, instructor.id, modules, lessons_per_module).await;
        let published = crate::course_service::CourseService::publish(
            db,
            &EventSink::disabled(),
            &instructor,
            course.id,
        )
        .await
        .unwrap();
        (published, lessons)
    }

    fn completed() -> ProgressUpdate {
        ProgressUpdate {
            time_spent_seconds: Some(60),
            status: Some(ProgressStatus::Completed),
        }
    }

    #[tokio::test]
    async fn enrolling_creates_progress_rows_at_zero_percent() {
        let db = setup_test_db().await;
        let (course, lessons) = published_course(&db, 3, 2).await;
        let student = user_factory::student(&db).await;

        let enrollment =
            EnrollmentService::enroll_student(&db, &EventSink::disabled(), &student, course.id)
                .await
                .unwrap();

        assert_eq!(enrollment.progress_percentage, 0.0);
        let rows = lesson_progress::Model::find_by_enrollment(&db, enrollment.id)
            .await
            .unwrap();
        assert_eq!(rows.len(), lessons.len());
        assert!(rows.iter().all(|r| r.status == ProgressStatus::NotStarted));
    }

    #[tokio::test]
    async fn duplicate_enrollment_is_a_conflict() {
        let db = setup_test_db().await;
        let (course, _) = published_course(&db, 3, 1).await;
        let student = user_factory::student(&db).await;
        let events = EventSink::disabled();

        EnrollmentService::enroll_student(&db, &events, &student, course.id)
            .await
            .unwrap();
        let err = EnrollmentService::enroll_student(&db, &events, &student, course.id)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Conflict(_)));
    }

    #[tokio::test]
    async fn cannot_enroll_in_a_draft_course() {
        let db = setup_test_db().await;
        let instructor = user_factory::instructor(&db).await;
        let course = course_factory::draft(&db, instructor.id).await;
        let student = user_factory::student(&db).await;

        let err =
            EnrollmentService::enroll_student(&db, &EventSink::disabled(), &student, course.id)
                .await
                .unwrap_err();
        assert!(matches!(err, ServiceError::Conflict(_)));
    }

    #[tokio::test]
    async fn completing_a_lesson_updates_the_percentage() {
        let db = setup_test_db().await;
        let (course, lessons) = published_course(&db, 3, 1).await;
        let student = user_factory::student(&db).await;
        let events = EventSink::disabled();
        let enrollment = EnrollmentService::enroll_student(&db, &events, &student, course.id)
            .await
            .unwrap();

        EnrollmentService::update_lesson_progress(
            &db,
            &events,
            enrollment.id,
            lessons[0].id,
            completed(),
        )
        .await
        .unwrap();

        let refreshed = find_enrollment(&db, enrollment.id).await.unwrap();
        assert_eq!(refreshed.progress_percentage, 33.33);
    }

    #[tokio::test]
    async fn time_spent_merges_additively() {
        let db = setup_test_db().await;
        let (course, lessons) = published_course(&db, 3, 1).await;
        let student = user_factory::student(&db).await;
        let events = EventSink::disabled();
        let enrollment = EnrollmentService::enroll_student(&db, &events, &student, course.id)
            .await
            .unwrap();

        for _ in 0..3 {
            EnrollmentService::update_lesson_progress(
                &db,
                &events,
                enrollment.id,
                lessons[0].id,
                ProgressUpdate {
                    time_spent_seconds: Some(30),
                    status: Some(ProgressStatus::InProgress),
                },
            )
            .await
            .unwrap();
        }

        let row = lesson_progress::Model::find_by_enrollment_and_lesson(
            &db,
            enrollment.id,
            lessons[0].id,
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(row.time_spent_seconds, 90);
    }

    #[tokio::test]
    async fn negative_time_fails_fast() {
        let db = setup_test_db().await;
        let (course, lessons) = published_course(&db, 3, 1).await;
        let student = user_factory::student(&db).await;
        let events = EventSink::disabled();
        let enrollment = EnrollmentService::enroll_student(&db, &events, &student, course.id)
            .await
            .unwrap();

        let err = EnrollmentService::update_lesson_progress(
            &db,
            &events,
            enrollment.id,
            lessons[0].id,
            ProgressUpdate {
                time_spent_seconds: Some(-5),
                status: None,
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ServiceError::Validation { .. }));
    }

    #[tokio::test]
    async fn finishing_all_lessons_completes_the_course_and_issues_one_certificate() {
        let db = setup_test_db().await;
        let (course, lessons) = published_course(&db, 3, 1).await;
        let student = user_factory::student(&db).await;
        let (events, mut rx) = EventSink::channel();
        let enrollment = EnrollmentService::enroll_student(&db, &events, &student, course.id)
            .await
            .unwrap();

        for l in &lessons {
            EnrollmentService::update_lesson_progress(
                &db,
                &events,
                enrollment.id,
                l.id,
                completed(),
            )
            .await
            .unwrap();
        }

        let refreshed = find_enrollment(&db, enrollment.id).await.unwrap();
        assert_eq!(refreshed.status, enrollment::EnrollmentStatus::Completed);
        assert_eq!(refreshed.progress_percentage, 100.0);
        assert!(refreshed.completed_at.is_some());
        assert!(refreshed.certificate_id.is_some());

        let cert = certificate::Model::find_by_enrollment(&db, enrollment.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(Some(cert.code), refreshed.certificate_id);

        let mut kinds = Vec::new();
        while let Ok(event) = rx.try_recv() {
            kinds.push(event.kind());
        }
        assert!(kinds.contains(&"course_completed"));
        assert_eq!(
            kinds.iter().filter(|k| **k == "certificate_issued").count(),
            1
        );
    }

    #[tokio::test]
    async fn certificate_issuance_is_idempotent() {
        let db = setup_test_db().await;
        let (course, _) = published_course(&db, 3, 1).await;
        let student = user_factory::student(&db).await;
        let events = EventSink::disabled();
        let enrollment = EnrollmentService::enroll_student(&db, &events, &student, course.id)
            .await
            .unwrap();

        EnrollmentService::issue_certificate(&db, &events, enrollment.id)
            .await
            .unwrap();
        EnrollmentService::issue_certificate(&db, &events, enrollment.id)
            .await
            .unwrap();

        let count = <certificate::Entity as EntityTrait>::find()
            .all(&db)
            .await
            .unwrap()
            .len();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn progress_updates_after_withdrawal_are_rejected() {
        let db = setup_test_db().await;
        let (course, lessons) = published_course(&db, 3, 1).await;
        let student = user_factory::student(&db).await;
        let events = EventSink::disabled();
        let enrollment = EnrollmentService::enroll_student(&db, &events, &student, course.id)
            .await
            .unwrap();

        EnrollmentService::withdraw_enrollment(&db, &events, enrollment.id, "lost interest")
            .await
            .unwrap();

        let err = EnrollmentService::update_lesson_progress(
            &db,
            &events,
            enrollment.id,
            lessons[0].id,
            completed(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ServiceError::Conflict(_)));
    }

    #[tokio::test]
    async fn withdrawal_is_terminal() {
        let db = setup_test_db().await;
        let (course, _) = published_course(&db, 3, 1).await;
        let student = user_factory::student(&db).await;
        let events = EventSink::disabled();
        let enrollment = EnrollmentService::enroll_student(&db, &events, &student, course.id)
            .await
            .unwrap();

        EnrollmentService::withdraw_enrollment(&db, &events, enrollment.id, "x")
            .await
            .unwrap();
        let err = EnrollmentService::withdraw_enrollment(&db, &events, enrollment.id, "again")
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Conflict(_)));
    }

    #[tokio::test]
    async fn module_completion_is_derived_in_the_rollup() {
        let db = setup_test_db().await;
        let (course, lessons) = published_course(&db, 3, 2).await;
        let student = user_factory::student(&db).await;
        let events = EventSink::disabled();
        let enrollment = EnrollmentService::enroll_student(&db, &events, &student, course.id)
            .await
            .unwrap();

        // Complete both lessons of the first module only.
        for l in &lessons[..2] {
            EnrollmentService::update_lesson_progress(
                &db,
                &events,
                enrollment.id,
                l.id,
                completed(),
            )
            .await
            .unwrap();
        }

        let progress = EnrollmentService::get_enrollment_progress(&db, enrollment.id)
            .await
            .unwrap();
        assert_eq!(progress.modules.len(), 3);
        assert!(progress.modules[0].complete);
        assert!(!progress.modules[1].complete);
        assert_eq!(progress.enrollment.progress_percentage, 33.33);
    }

    #[test]
    fn percentage_math_clamps_and_rounds() {
        assert_eq!(safe_percentage(1.0, 0.0), 0.0);
        assert_eq!(round2(safe_percentage(1.0, 3.0)), 33.33);
        assert_eq!(round2(safe_percentage(2.0, 3.0)), 66.67);
        assert_eq!(round2(safe_percentage(3.0, 3.0)), 100.0);
    }
}
