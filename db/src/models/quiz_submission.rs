use chrono::{DateTime, Utc};
use sea_orm::ActiveValue::Set;
use sea_orm::{QueryFilter, QueryOrder};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// One quiz attempt by one student.
///
/// Created when the attempt starts with an empty answers map; answers
/// accumulate per question until `submitted_at` is set, after which the
/// map is immutable. Attempt numbers are 1-based and strictly increasing
/// per (quiz, student), backed by `ux_quiz_submissions_attempt`.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "quiz_submissions")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,

    pub quiz_id: i64,
    pub student_id: i64,
    pub enrollment_id: i64,
    pub attempt_number: i32,

    pub started_at: DateTime<Utc>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub time_taken_seconds: Option<i32>,

    pub score_percentage: Option<f64>,
    pub points_earned: Option<f64>,
    /// Map of question id → raw answer value, merged one key at a time.
    pub answers: Json,

    pub grading_status: QuizGradingStatus,
    pub feedback: Option<String>,
    pub graded_at: Option<DateTime<Utc>>,
    pub graded_by: Option<i64>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Display, EnumString, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
#[sea_orm(rs_type = "String", db_type = "Enum", enum_name = "quiz_grading_status")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum QuizGradingStatus {
    /// Attempt started, not yet handed in.
    #[sea_orm(string_value = "in_progress")]
    InProgress,
    #[sea_orm(string_value = "auto_graded")]
    AutoGraded,
    #[sea_orm(string_value = "pending_review")]
    PendingReview,
    #[sea_orm(string_value = "graded")]
    Graded,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::quiz::Entity",
        from = "Column::QuizId",
        to = "super::quiz::Column::Id"
    )]
    Quiz,

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

impl Related<super::quiz::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Quiz.def()
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
    pub async fn start(
        db: &DbConn,
        quiz_id: i64,
        student_id: i64,
        enrollment_id: i64,
        attempt_number: i32,
    ) -> Result<Model, DbErr> {
        let now = Utc::now();
        ActiveModel {
            quiz_id: Set(quiz_id),
            student_id: Set(student_id),
            enrollment_id: Set(enrollment_id),
            attempt_number: Set(attempt_number),
            started_at: Set(now),
            submitted_at: Set(None),
            time_taken_seconds: Set(None),
            score_percentage: Set(None),
            points_earned: Set(None),
            answers: Set(serde_json::json!({})),
            grading_status: Set(QuizGradingStatus::InProgress),
            feedback: Set(None),
            graded_at: Set(None),
            graded_by: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        }
        .insert(db)
        .await
    }

    pub async fn count_attempts(
        db: &DbConn,
        quiz_id: i64,
        student_id: i64,
    ) -> Result<u64, DbErr> {
        Entity::find()
            .filter(Column::QuizId.eq(quiz_id))
            .filter(Column::StudentId.eq(student_id))
            .count(db)
            .await
    }

    pub async fn find_attempts(
        db: &DbConn,
        quiz_id: i64,
        student_id: i64,
    ) -> Result<Vec<Model>, DbErr> {
        Entity::find()
            .filter(Column::QuizId.eq(quiz_id))
            .filter(Column::StudentId.eq(student_id))
            .order_by_asc(Column::AttemptNumber)
            .all(db)
            .await
    }

    pub fn is_submitted(&self) -> bool {
        self.submitted_at.is_some()
    }
}
