use chrono::{DateTime, Utc};
use sea_orm::ActiveValue::Set;
use sea_orm::{QueryFilter, QueryOrder};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// One hand-in of an assignment by one student.
///
/// Revisions never mutate the superseded row: a resubmission is a new
/// row linked through `parent_submission_id`, with `revision_number`
/// incremented, so the chain is the full historical record.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "assignment_submissions")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,

    pub assignment_id: i64,
    pub student_id: i64,
    pub enrollment_id: i64,

    pub file_url: Option<String>,
    pub file_name: Option<String>,
    pub file_size_bytes: Option<i64>,
    pub submission_text: Option<String>,

    pub submitted_at: DateTime<Utc>,
    /// Derived: submitted after the assignment due date.
    pub is_late: bool,

    pub points_awarded: Option<f64>,
    pub feedback: Option<String>,
    pub grading_status: SubmissionStatus,
    pub graded_at: Option<DateTime<Utc>>,
    pub graded_by: Option<i64>,

    pub revision_number: i32,
    pub parent_submission_id: Option<i64>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Display, EnumString, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
#[sea_orm(rs_type = "String", db_type = "Enum", enum_name = "submission_status")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum SubmissionStatus {
    #[sea_orm(string_value = "submitted")]
    Submitted,
    #[sea_orm(string_value = "under_review")]
    UnderReview,
    #[sea_orm(string_value = "graded")]
    Graded,
    #[sea_orm(string_value = "revision_requested")]
    RevisionRequested,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::assignment::Entity",
        from = "Column::AssignmentId",
        to = "super::assignment::Column::Id"
    )]
    Assignment,

    #[sea_orm(
        belongs_to = "super::user::Entity",
        from = "Column::StudentId",
        to = "super::user::Column::Id"
    )]
    Student,

    #[sea_orm(
        belongs_to = "super::enrollment::Entity",
        from = "Column::EnrollmentId",
        to = "super::enrollment::Column::Id"
    )]
    Enrollment,
}

impl Related<super::assignment::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Assignment.def()
    }
}

impl Related<super::user::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Student.def()
    }
}

impl Related<super::enrollment::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Enrollment.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    #[allow(clippy::too_many_arguments)]
    pub async fn create(
        db: &DbConn,
        assignment_id: i64,
        student_id: i64,
        enrollment_id: i64,
        file_url: Option<String>,
        file_name: Option<String>,
        file_size_bytes: Option<i64>,
        submission_text: Option<String>,
        submitted_at: DateTime<Utc>,
        is_late: bool,
        revision_number: i32,
        parent_submission_id: Option<i64>,
    ) -> Result<Model, DbErr> {
        let now = Utc::now();
        ActiveModel {
            assignment_id: Set(assignment_id),
            student_id: Set(student_id),
            enrollment_id: Set(enrollment_id),
            file_url: Set(file_url),
            file_name: Set(file_name),
            file_size_bytes: Set(file_size_bytes),
            submission_text: Set(submission_text),
            submitted_at: Set(submitted_at),
            is_late: Set(is_late),
            points_awarded: Set(None),
            feedback: Set(None),
            grading_status: Set(SubmissionStatus::Submitted),
            graded_at: Set(None),
            graded_by: Set(None),
            revision_number: Set(revision_number),
            parent_submission_id: Set(parent_submission_id),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        }
        .insert(db)
        .await
    }

    /// Latest submission in a student's chain for an assignment, by
    /// revision number.
    pub async fn find_latest(
        db: &DbConn,
        assignment_id: i64,
        student_id: i64,
    ) -> Result<Option<Model>, DbErr> {
        Entity::find()
            .filter(Column::AssignmentId.eq(assignment_id))
            .filter(Column::StudentId.eq(student_id))
            .order_by_desc(Column::RevisionNumber)
            .one(db)
            .await
    }

    pub async fn find_by_assignment_and_student(
        db: &DbConn,
        assignment_id: i64,
        student_id: i64,
    ) -> Result<Vec<Model>, DbErr> {
        Entity::find()
            .filter(Column::AssignmentId.eq(assignment_id))
            .filter(Column::StudentId.eq(student_id))
            .order_by_asc(Column::RevisionNumber)
            .all(db)
            .await
    }

    pub fn is_graded(&self) -> bool {
        self.grading_status == SubmissionStatus::Graded
    }

    /// States from which a grader may request a revision.
    pub fn can_request_revision(&self) -> bool {
        matches!(
            self.grading_status,
            SubmissionStatus::Submitted | SubmissionStatus::UnderReview
        )
    }
}
