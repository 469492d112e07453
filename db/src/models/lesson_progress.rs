use chrono::{DateTime, Utc};
use sea_orm::ActiveValue::Set;
use sea_orm::QueryFilter;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Per-lesson completion and time tracking, one row per lesson per
/// enrollment (created up-front at enrollment time as `not_started`).
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "lesson_progress")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,

    pub enrollment_id: i64,
    pub lesson_id: i64,

    pub status: ProgressStatus,
    /// Monotonically increasing; progress updates merge additively.
    pub time_spent_seconds: i32,
    /// Set once, on the first transition to completed.
    pub completed_at: Option<DateTime<Utc>>,
    pub quiz_score: Option<f64>,
    pub attempts_count: i32,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Display, EnumString, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
#[sea_orm(rs_type = "String", db_type = "Enum", enum_name = "progress_status")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum ProgressStatus {
    #[sea_orm(string_value = "not_started")]
    NotStarted,
    #[sea_orm(string_value = "in_progress")]
    InProgress,
    #[sea_orm(string_value = "completed")]
    Completed,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::enrollment::Entity",
        from = "Column::EnrollmentId",
        to = "super::enrollment::Column::Id"
    )]
    Enrollment,

    #[sea_orm(
        belongs_to = "super::lesson::Entity",
        from = "Column::LessonId",
        to = "super::lesson::Column::Id"
    )]
    Lesson,
}

impl Related<super::enrollment::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Enrollment.def()
    }
}

impl Related<super::lesson::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Lesson.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    pub async fn create_not_started(
        db: &DbConn,
        enrollment_id: i64,
        lesson_id: i64,
    ) -> Result<Model, DbErr> {
        let now = Utc::now();
        ActiveModel {
            enrollment_id: Set(enrollment_id),
            lesson_id: Set(lesson_id),
            status: Set(ProgressStatus::NotStarted),
            time_spent_seconds: Set(0),
            completed_at: Set(None),
            quiz_score: Set(None),
            attempts_count: Set(0),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        }
        .insert(db)
        .await
    }

    pub async fn find_by_enrollment(db: &DbConn, enrollment_id: i64) -> Result<Vec<Model>, DbErr> {
        Entity::find()
            .filter(Column::EnrollmentId.eq(enrollment_id))
            .all(db)
            .await
    }

    pub async fn find_by_enrollment_and_lesson(
        db: &DbConn,
        enrollment_id: i64,
        lesson_id: i64,
    ) -> Result<Option<Model>, DbErr> {
        Entity::find()
            .filter(Column::EnrollmentId.eq(enrollment_id))
            .filter(Column::LessonId.eq(lesson_id))
            .one(db)
            .await
    }

    /// Bump the attempt counter on the lesson's progress row, if one
    /// exists for this enrollment.
    pub async fn record_attempt(
        db: &DbConn,
        enrollment_id: i64,
        lesson_id: i64,
    ) -> Result<(), DbErr> {
        if let Some(row) =
            Self::find_by_enrollment_and_lesson(db, enrollment_id, lesson_id).await?
        {
            let attempts = row.attempts_count;
            let mut active: ActiveModel = row.into();
            active.attempts_count = Set(attempts + 1);
            active.updated_at = Set(Utc::now());
            active.update(db).await?;
        }
        Ok(())
    }

    pub async fn count_completed(db: &DbConn, enrollment_id: i64) -> Result<u64, DbErr> {
        Entity::find()
            .filter(Column::EnrollmentId.eq(enrollment_id))
            .filter(Column::Status.eq(ProgressStatus::Completed))
            .count(db)
            .await
    }

    pub async fn count_by_enrollment(db: &DbConn, enrollment_id: i64) -> Result<u64, DbErr> {
        Entity::find()
            .filter(Column::EnrollmentId.eq(enrollment_id))
            .count(db)
            .await
    }

    pub fn is_completed(&self) -> bool {
        self.status == ProgressStatus::Completed
    }
}
