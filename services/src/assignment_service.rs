//! Assignment authoring, submission, and grading.
//!
//! Submission lifecycle: submitted → under_review | graded |
//! revision_requested; a revision request opens a new row chained via
//! `parent_submission_id` while the superseded row stays untouched.
//! File validation happens before the object-store upload, and an
//! upload failure leaves no submission row behind.

use chrono::{DateTime, Utc};
use db::events::{DomainEvent, EventSink};
use db::models::{assignment, assignment_submission, enrollment, lesson};
use log::{info, warn};
use once_cell::sync::Lazy;
use regex::Regex;
use sea_orm::ActiveValue::Set;
use sea_orm::{ActiveModelTrait, DbConn, EntityTrait, IntoActiveModel};
use serde_json::json;

use crate::access;
use crate::enrollment_service::EnrollmentService;
use crate::error::{on_unique_violation, ServiceError, ServiceResult};
use crate::storage::ObjectStore;

static EXTENSION_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\.[a-zA-Z0-9]+$").unwrap_or_else(|e| panic!("invalid extension regex: {e}"))
});

#[derive(Debug, Clone)]
pub struct CreateAssignment {
    pub lesson_id: i64,
    pub title: String,
    pub instructions: String,
    pub due_date: DateTime<Utc>,
    pub late_submission_allowed: bool,
    pub late_penalty_percentage: f64,
    pub max_points: f64,
    pub requires_file_upload: bool,
    pub allowed_file_types: Vec<String>,
    pub max_file_size_mb: i32,
}

/// File handed in alongside (or instead of) submission text.
#[derive(Debug, Clone)]
pub struct FileUpload {
    pub file_name: String,
    pub bytes: Vec<u8>,
    pub content_type: String,
}

#[derive(Debug, Clone, Default)]
pub struct SubmitAssignment {
    pub submission_text: Option<String>,
    pub file: Option<FileUpload>,
    /// Present when this hand-in revises an earlier submission. When
    /// omitted and the latest prior submission is awaiting a revision,
    /// that submission becomes the implicit parent.
    pub parent_submission_id: Option<i64>,
}

pub struct AssignmentService;

impl AssignmentService {
    pub async fn create_assignment(
        db: &DbConn,
        actor: &db::models::user::Model,
        params: CreateAssignment,
    ) -> ServiceResult<assignment::Model> {
        let (target, course) = access::lesson_with_course(db, params.lesson_id).await?;
        access::ensure_manages(actor, &course)?;

        if target.lesson_type != lesson::LessonType::Assignment {
            return Err(ServiceError::validation(
                "lesson_id",
                "assignments can only be attached to assignment lessons",
            ));
        }
        if params.title.trim().is_empty() {
            return Err(ServiceError::validation("title", "title must not be empty"));
        }
        if params.due_date <= Utc::now() {
            return Err(ServiceError::validation(
                "due_date",
                "due date must be in the future",
            ));
        }
        if !(0.0..=100.0).contains(&params.late_penalty_percentage) {
            return Err(ServiceError::validation(
                "late_penalty_percentage",
                "late penalty must be between 0 and 100",
            ));
        }
        if params.max_points <= 0.0 {
            return Err(ServiceError::validation(
                "max_points",
                "max points must be positive",
            ));
        }
        if params.max_file_size_mb <= 0 {
            return Err(ServiceError::validation(
                "max_file_size_mb",
                "max file size must be positive",
            ));
        }
        if params.allowed_file_types.is_empty() {
            return Err(ServiceError::validation(
                "allowed_file_types",
                "at least one file type must be allowed",
            ));
        }
        for ext in &params.allowed_file_types {
            if !EXTENSION_RE.is_match(ext) {
                return Err(ServiceError::validation(
                    "allowed_file_types",
                    format!("'{ext}' is not a valid '.'-prefixed extension"),
                ));
            }
        }

        let created = assignment::Model::create(
            db,
            params.lesson_id,
            &params.title,
            &params.instructions,
            params.due_date,
            params.late_submission_allowed,
            params.late_penalty_percentage,
            params.max_points,
            params.requires_file_upload,
            json!(params.allowed_file_types),
            params.max_file_size_mb,
        )
        .await
        .map_err(|e| on_unique_violation(e, "lesson already has an assignment"))?;

        info!(
            "assignment {} created for lesson {}",
            created.id, params.lesson_id
        );
        Ok(created)
    }

    /// Whether a student may hand in right now: the assignment accepts
    /// submissions, and the latest prior submission (if any) is awaiting
    /// a revision.
    pub async fn can_submit_assignment(
        db: &DbConn,
        assignment_id: i64,
        student_id: i64,
    ) -> ServiceResult<bool> {
        let target = find_assignment(db, assignment_id).await?;
        if !target.is_accepting_submissions_at(Utc::now()) {
            return Ok(false);
        }
        let latest =
            assignment_submission::Model::find_latest(db, assignment_id, student_id).await?;
        Ok(match latest {
            None => true,
            Some(prior) => {
                prior.grading_status
                    == assignment_submission::SubmissionStatus::RevisionRequested
            }
        })
    }

    pub async fn submit_assignment(
        db: &DbConn,
        events: &EventSink,
        store: &dyn ObjectStore,
        actor: &db::models::user::Model,
        assignment_id: i64,
        params: SubmitAssignment,
    ) -> ServiceResult<assignment_submission::Model> {
        if !actor.is_student() {
            return Err(ServiceError::Forbidden(
                "only students can submit assignments".into(),
            ));
        }
        let target = find_assignment(db, assignment_id).await?;
        let (_, course) = access::lesson_with_course(db, target.lesson_id).await?;
        let active_enrollment =
            enrollment::Model::find_by_student_and_course(db, actor.id, course.id)
                .await?
                .ok_or_else(|| {
                    ServiceError::Forbidden("student is not enrolled in this course".into())
                })?;
        if !active_enrollment.is_active() {
            return Err(ServiceError::Conflict(format!(
                "enrollment is {} and cannot submit assignments",
                active_enrollment.status
            )));
        }

        if params.submission_text.as_deref().is_none_or(|t| t.trim().is_empty())
            && params.file.is_none()
        {
            return Err(ServiceError::validation(
                "submission",
                "a file or submission text is required",
            ));
        }
        if target.requires_file_upload && params.file.is_none() {
            return Err(ServiceError::validation(
                "file",
                "this assignment requires a file upload",
            ));
        }

        let now = Utc::now();
        if !target.is_accepting_submissions_at(now) {
            return Err(ServiceError::Conflict(
                "assignment is closed for submissions".into(),
            ));
        }

        let latest =
            assignment_submission::Model::find_latest(db, assignment_id, actor.id).await?;
        let parent = match (params.parent_submission_id, &latest) {
            (Some(parent_id), _) => {
                let parent = find_submission(db, parent_id).await?;
                if parent.assignment_id != assignment_id || parent.student_id != actor.id {
                    return Err(ServiceError::validation(
                        "parent_submission_id",
                        "parent must belong to the same student and assignment",
                    ));
                }
                // The cited parent must still be the head of the chain;
                // a stale ancestor cannot reopen a chain whose latest
                // submission has moved on (e.g. was graded).
                if latest.as_ref().map(|l| l.id) != Some(parent.id) {
                    return Err(ServiceError::Conflict(
                        "a newer submission supersedes the cited parent".into(),
                    ));
                }
                Some(parent)
            }
            (None, Some(_)) => latest.clone(),
            (None, None) => None,
        };
        if let Some(parent) = &parent {
            if parent.grading_status
                != assignment_submission::SubmissionStatus::RevisionRequested
            {
                return Err(ServiceError::Conflict(format!(
                    "previous submission is {} and cannot be revised",
                    parent.grading_status
                )));
            }
        }
        let revision_number = parent.as_ref().map_or(1, |p| p.revision_number + 1);

        // Validate the file fully before touching the object store so a
        // rejected upload never leaves a row behind.
        let mut stored_file: Option<(String, String, i64)> = None;
        if let Some(file) = &params.file {
            if !target.allows_file(&file.file_name) {
                return Err(ServiceError::validation(
                    "file",
                    format!(
                        "file type not allowed; accepted: {}",
                        target.allowed_extensions().join(", ")
                    ),
                ));
            }
            let max_bytes = target.max_file_size_mb as i64 * 1024 * 1024;
            if file.bytes.len() as i64 > max_bytes {
                return Err(ServiceError::validation(
                    "file",
                    format!("file exceeds the {} MB limit", target.max_file_size_mb),
                ));
            }

            let key = format!(
                "assignments/{}/{}/rev{}/{}",
                assignment_id, actor.id, revision_number, file.file_name
            );
            let url = store
                .upload_file(&key, &file.bytes, &file.content_type)
                .await
                .map_err(|e| {
                    warn!("upload failed for assignment {assignment_id}: {e}");
                    ServiceError::ExternalService(e.to_string())
                })?;
            stored_file = Some((url, file.file_name.clone(), file.bytes.len() as i64));
        }

        let is_late = target.is_late_at(now);
        let (file_url, file_name, file_size) = match stored_file {
            Some((url, name, size)) => (Some(url), Some(name), Some(size)),
            None => (None, None, None),
        };
        let created = assignment_submission::Model::create(
            db,
            assignment_id,
            actor.id,
            active_enrollment.id,
            file_url,
            file_name,
            file_size,
            params.submission_text,
            now,
            is_late,
            revision_number,
            parent.map(|p| p.id),
        )
        .await?;

        info!(
            "student {} submitted assignment {} (revision {}, late: {})",
            actor.id, assignment_id, revision_number, is_late
        );
        events.publish(DomainEvent::AssignmentSubmitted {
            submission_id: created.id,
            assignment_id,
            student_id: actor.id,
            is_late,
            revision_number,
        });
        Ok(created)
    }

    /// Award points, applying the late penalty exactly once when the
    /// submission was late.
    pub async fn grade_assignment(
        db: &DbConn,
        events: &EventSink,
        actor: &db::models::user::Model,
        submission_id: i64,
        points_awarded: f64,
        feedback: Option<String>,
    ) -> ServiceResult<assignment_submission::Model> {
        let submission = find_submission(db, submission_id).await?;
        let target = find_assignment(db, submission.assignment_id).await?;
        let (_, course) = access::lesson_with_course(db, target.lesson_id).await?;
        access::ensure_manages(actor, &course)?;

        if submission.is_graded() {
            return Err(ServiceError::Conflict(
                "submission has already been graded".into(),
            ));
        }
        if points_awarded < 0.0 || points_awarded > target.max_points {
            return Err(ServiceError::validation(
                "points_awarded",
                format!("points must be between 0 and {}", target.max_points),
            ));
        }

        let final_points = if submission.is_late {
            round2(target.late_penalised(points_awarded))
        } else {
            points_awarded
        };

        let now = Utc::now();
        let student_id = submission.student_id;
        let enrollment_id = submission.enrollment_id;
        let mut active = submission.into_active_model();
        active.points_awarded = Set(Some(final_points));
        active.feedback = Set(feedback);
        active.grading_status = Set(assignment_submission::SubmissionStatus::Graded);
        active.graded_at = Set(Some(now));
        active.graded_by = Set(Some(actor.id));
        active.updated_at = Set(now);
        let graded = active.update(db).await?;

        info!(
            "submission {} graded with {:.2}/{} points by user {}",
            submission_id, final_points, target.max_points, actor.id
        );
        events.publish(DomainEvent::SubmissionGraded {
            submission_id,
            student_id,
            graded_by: actor.id,
            score: final_points,
        });

        EnrollmentService::record_graded_lesson(db, events, enrollment_id, target.lesson_id, None)
            .await?;
        Ok(graded)
    }

    /// Send a submission back for rework. Clears any provisional points
    /// and records who asked; the student's next hand-in chains onto
    /// this row as a new revision.
    pub async fn request_revision(
        db: &DbConn,
        events: &EventSink,
        actor: &db::models::user::Model,
        submission_id: i64,
        feedback: &str,
    ) -> ServiceResult<assignment_submission::Model> {
        let submission = find_submission(db, submission_id).await?;
        let target = find_assignment(db, submission.assignment_id).await?;
        let (_, course) = access::lesson_with_course(db, target.lesson_id).await?;
        access::ensure_manages(actor, &course)?;

        if !submission.can_request_revision() {
            return Err(ServiceError::Conflict(format!(
                "cannot request a revision of a {} submission",
                submission.grading_status
            )));
        }

        let student_id = submission.student_id;
        let mut active = submission.into_active_model();
        active.points_awarded = Set(None);
        active.feedback = Set(Some(feedback.to_owned()));
        active.grading_status =
            Set(assignment_submission::SubmissionStatus::RevisionRequested);
        active.graded_by = Set(Some(actor.id));
        active.updated_at = Set(Utc::now());
        let updated = active.update(db).await?;

        events.publish(DomainEvent::RevisionRequested {
            submission_id,
            student_id,
            requested_by: actor.id,
        });
        Ok(updated)
    }
}

async fn find_assignment(db: &DbConn, assignment_id: i64) -> ServiceResult<assignment::Model> {
    assignment::Entity::find_by_id(assignment_id)
        .one(db)
        .await?
        .ok_or_else(|| ServiceError::not_found("assignment", assignment_id))
}

async fn find_submission(
    db: &DbConn,
    submission_id: i64,
) -> ServiceResult<assignment_submission::Model> {
    assignment_submission::Entity::find_by_id(submission_id)
        .one(db)
        .await?
        .ok_or_else(|| ServiceError::not_found("assignment submission", submission_id))
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
