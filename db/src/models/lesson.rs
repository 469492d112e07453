use chrono::{DateTime, Utc};
use sea_orm::ActiveValue::Set;
use sea_orm::{JoinType, QueryFilter, QueryOrder, QuerySelect, RelationTrait as _};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "lessons")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,

    pub module_id: i64,
    pub title: String,
    pub lesson_type: LessonType,
    pub order_number: i32,
    pub is_preview: bool,
    pub duration_minutes: i32,

    /// Processed media URL; required before a video lesson is publishable.
    pub content_url: Option<String>,
    pub content_text: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Display, EnumString, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
#[sea_orm(rs_type = "String", db_type = "Enum", enum_name = "lesson_type")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum LessonType {
    #[sea_orm(string_value = "video")]
    Video,
    #[sea_orm(string_value = "text")]
    Text,
    #[sea_orm(string_value = "quiz")]
    Quiz,
    #[sea_orm(string_value = "assignment")]
    Assignment,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::course_module::Entity",
        from = "Column::ModuleId",
        to = "super::course_module::Column::Id"
    )]
    Module,
}

impl Related<super::course_module::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Module.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    #[allow(clippy::too_many_arguments)]
    pub async fn create(
        db: &DbConn,
        module_id: i64,
        title: &str,
        lesson_type: LessonType,
        order_number: i32,
        is_preview: bool,
        duration_minutes: i32,
        content_url: Option<&str>,
        content_text: Option<&str>,
    ) -> Result<Model, DbErr> {
        let now = Utc::now();
        ActiveModel {
            module_id: Set(module_id),
            title: Set(title.to_owned()),
            lesson_type: Set(lesson_type),
            order_number: Set(order_number),
            is_preview: Set(is_preview),
            duration_minutes: Set(duration_minutes),
            content_url: Set(content_url.map(str::to_owned)),
            content_text: Set(content_text.map(str::to_owned)),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        }
        .insert(db)
        .await
    }

    pub async fn find_by_module(db: &DbConn, module_id: i64) -> Result<Vec<Model>, DbErr> {
        Entity::find()
            .filter(Column::ModuleId.eq(module_id))
            .order_by_asc(Column::OrderNumber)
            .all(db)
            .await
    }

    /// All lessons of a course, across its modules, in module/lesson order.
    pub async fn find_by_course(db: &DbConn, course_id: i64) -> Result<Vec<Model>, DbErr> {
        Entity::find()
            .join(JoinType::InnerJoin, Relation::Module.def())
            .filter(super::course_module::Column::CourseId.eq(course_id))
            .order_by_asc(super::course_module::Column::OrderNumber)
            .order_by_asc(Column::OrderNumber)
            .all(db)
            .await
    }

    /// Whether the lesson's type-specific content is in place.
    ///
    /// Video lessons need a processed `content_url`; text lessons need
    /// body text. Quiz and assignment lessons validate their content
    /// through their own entities, so they count as ready here.
    pub fn is_ready_for_publication(&self) -> bool {
        match self.lesson_type {
            LessonType::Video => self.content_url.as_deref().is_some_and(|u| !u.is_empty()),
            LessonType::Text => self.content_text.as_deref().is_some_and(|t| !t.is_empty()),
            LessonType::Quiz | LessonType::Assignment => true,
        }
    }
}
