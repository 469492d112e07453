use chrono::{DateTime, Utc};
use sea_orm::ActiveValue::Set;
use sea_orm::{QueryFilter, QueryOrder};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use strum::{Display, EnumString};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "questions")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,

    pub quiz_id: i64,
    pub question_type: QuestionType,
    pub question_text: String,

    /// Type-specific payloads; shape is validated at creation time by the
    /// quiz service, then trusted here.
    pub options: Option<Json>,
    pub correct_answer: Option<Json>,
    pub explanation: Option<String>,

    pub points: f64,
    pub order_number: i32,
    pub difficulty: String,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Display, EnumString, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
#[sea_orm(rs_type = "String", db_type = "Enum", enum_name = "question_type")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum QuestionType {
    #[sea_orm(string_value = "multiple_choice")]
    MultipleChoice,
    #[sea_orm(string_value = "true_false")]
    TrueFalse,
    #[sea_orm(string_value = "short_answer")]
    ShortAnswer,
    #[sea_orm(string_value = "essay")]
    Essay,
    #[sea_orm(string_value = "fill_blank")]
    FillBlank,
    #[sea_orm(string_value = "matching")]
    Matching,
}

impl QuestionType {
    /// Types the auto-grader can score without human review.
    pub fn is_objective(self) -> bool {
        matches!(
            self,
            QuestionType::MultipleChoice | QuestionType::TrueFalse | QuestionType::FillBlank
        )
    }

    /// Types that force a submission into pending review.
    pub fn requires_manual_grading(self) -> bool {
        matches!(self, QuestionType::Essay | QuestionType::ShortAnswer)
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::quiz::Entity",
        from = "Column::QuizId",
        to = "super::quiz::Column::Id"
    )]
    Quiz,
}

impl Related<super::quiz::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Quiz.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    #[allow(clippy::too_many_arguments)]
    pub async fn create(
        db: &DbConn,
        quiz_id: i64,
        question_type: QuestionType,
        question_text: &str,
        options: Option<JsonValue>,
        correct_answer: Option<JsonValue>,
        explanation: Option<&str>,
        points: f64,
        order_number: i32,
        difficulty: &str,
    ) -> Result<Model, DbErr> {
        let now = Utc::now();
        ActiveModel {
            quiz_id: Set(quiz_id),
            question_type: Set(question_type),
            question_text: Set(question_text.to_owned()),
            options: Set(options),
            correct_answer: Set(correct_answer),
            explanation: Set(explanation.map(str::to_owned)),
            points: Set(points),
            order_number: Set(order_number),
            difficulty: Set(difficulty.to_owned()),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        }
        .insert(db)
        .await
    }

    pub async fn find_by_quiz(db: &DbConn, quiz_id: i64) -> Result<Vec<Model>, DbErr> {
        Entity::find()
            .filter(Column::QuizId.eq(quiz_id))
            .order_by_asc(Column::OrderNumber)
            .all(db)
            .await
    }

    /// Score a student answer against the stored correct answer.
    ///
    /// Subjective types (essay, short answer) and matching always return
    /// false here; they earn points only through manual grading. No
    /// partial credit: a fill-blank answer fails on any mismatched
    /// position.
    pub fn check_answer(&self, answer: &JsonValue) -> bool {
        let Some(correct) = self.correct_answer.as_ref() else {
            return false;
        };

        match self.question_type {
            QuestionType::MultipleChoice => {
                // The stored answer is the index of the correct option.
                answer.as_i64().is_some() && answer.as_i64() == correct.as_i64()
            }
            QuestionType::TrueFalse => {
                answer.as_bool().is_some() && answer.as_bool() == correct.as_bool()
            }
            QuestionType::FillBlank => match (answer.as_array(), correct.as_array()) {
                (Some(given), Some(expected)) => {
                    given.len() == expected.len()
                        && given.iter().zip(expected).all(|(g, e)| {
                            match (g.as_str(), e.as_str()) {
                                (Some(g), Some(e)) => {
                                    g.trim().eq_ignore_ascii_case(e.trim())
                                }
                                _ => false,
                            }
                        })
                }
                _ => false,
            },
            QuestionType::ShortAnswer | QuestionType::Essay | QuestionType::Matching => false,
        }
    }
}
