use chrono::{DateTime, Utc};
use sea_orm::ActiveValue::Set;
use sea_orm::QueryFilter;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "quizzes")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,

    pub lesson_id: i64,
    pub title: String,
    pub quiz_type: QuizType,

    /// Informational only; limits are not server-enforced expiry.
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

    /// Source of question order numbers; never decremented, so order
    /// numbers are never reused even after deletions.
    pub next_question_order: i32,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Display, EnumString, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
#[sea_orm(rs_type = "String", db_type = "Enum", enum_name = "quiz_type")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum QuizType {
    #[sea_orm(string_value = "formative")]
    Formative,
    #[sea_orm(string_value = "summative")]
    Summative,
    #[sea_orm(string_value = "practice")]
    Practice,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::lesson::Entity",
        from = "Column::LessonId",
        to = "super::lesson::Column::Id"
    )]
    Lesson,

    #[sea_orm(has_many = "super::question::Entity")]
    Questions,
}

impl Related<super::lesson::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Lesson.def()
    }
}

impl Related<super::question::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Questions.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    #[allow(clippy::too_many_arguments)]
    pub async fn create(
        db: &DbConn,
        lesson_id: i64,
        title: &str,
        quiz_type: QuizType,
        time_limit_minutes: Option<i32>,
        passing_score_percentage: f64,
        max_attempts: i32,
        randomize_questions: bool,
        randomize_options: bool,
        show_correct_answers: bool,
        show_explanations: bool,
        available_from: Option<DateTime<Utc>>,
        available_until: Option<DateTime<Utc>>,
    ) -> Result<Model, DbErr> {
        let now = Utc::now();
        ActiveModel {
            lesson_id: Set(lesson_id),
            title: Set(title.to_owned()),
            quiz_type: Set(quiz_type),
            time_limit_minutes: Set(time_limit_minutes),
            passing_score_percentage: Set(passing_score_percentage),
            max_attempts: Set(max_attempts),
            randomize_questions: Set(randomize_questions),
            randomize_options: Set(randomize_options),
            show_correct_answers: Set(show_correct_answers),
            show_explanations: Set(show_explanations),
            available_from: Set(available_from),
            available_until: Set(available_until),
            next_question_order: Set(1),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        }
        .insert(db)
        .await
    }

    pub async fn find_by_lesson(db: &DbConn, lesson_id: i64) -> Result<Option<Model>, DbErr> {
        Entity::find()
            .filter(Column::LessonId.eq(lesson_id))
            .one(db)
            .await
    }

    /// Availability window check, both bounds optional.
    pub fn is_available_at(&self, now: DateTime<Utc>) -> bool {
        if let Some(from) = self.available_from {
            if now < from {
                return false;
            }
        }
        if let Some(until) = self.available_until {
            if now > until {
                return false;
            }
        }
        true
    }

    pub fn has_attempts_remaining(&self, attempts_taken: u64) -> bool {
        self.max_attempts == 0 || attempts_taken < self.max_attempts as u64
    }
}
