use chrono::{DateTime, Utc};
use sea_orm::ActiveValue::Set;
use sea_orm::QueryFilter;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// A course as authored by an instructor. Structure lives in
/// `course_modules` / `lessons`; publish gating is evaluated over the
/// whole tree by the course service.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "courses")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,

    pub instructor_id: i64,

    pub title: String,
    pub description: Option<String>,
    /// Unique, derived from the title plus a uniqueness suffix.
    pub slug: String,
    pub category: String,
    pub difficulty: String,
    pub price: f64,

    pub status: CourseStatus,
    pub published_at: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Display, EnumString, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
#[sea_orm(rs_type = "String", db_type = "Enum", enum_name = "course_status")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum CourseStatus {
    #[sea_orm(string_value = "draft")]
    Draft,
    #[sea_orm(string_value = "pending_review")]
    PendingReview,
    #[sea_orm(string_value = "published")]
    Published,
    #[sea_orm(string_value = "archived")]
    Archived,
}

impl CourseStatus {
    /// Legal lifecycle moves: draft → pending_review/published → archived.
    pub fn can_transition_to(self, next: CourseStatus) -> bool {
        use CourseStatus::*;
        matches!(
            (self, next),
            (Draft, PendingReview)
                | (Draft, Published)
                | (PendingReview, Published)
                | (PendingReview, Draft)
                | (Published, Archived)
        )
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::user::Entity",
        from = "Column::InstructorId",
        to = "super::user::Column::Id"
    )]
    Instructor,

    #[sea_orm(has_many = "super::course_module::Entity")]
    Modules,
}

impl Related<super::user::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Instructor.def()
    }
}

impl Related<super::course_module::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Modules.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    #[allow(clippy::too_many_arguments)]
    pub async fn create(
        db: &DbConn,
        instructor_id: i64,
        title: &str,
        description: Option<&str>,
        slug: &str,
        category: &str,
        difficulty: &str,
        price: f64,
    ) -> Result<Model, DbErr> {
        let now = Utc::now();
        ActiveModel {
            instructor_id: Set(instructor_id),
            title: Set(title.to_owned()),
            description: Set(description.map(str::to_owned)),
            slug: Set(slug.to_owned()),
            category: Set(category.to_owned()),
            difficulty: Set(difficulty.to_owned()),
            price: Set(price),
            status: Set(CourseStatus::Draft),
            published_at: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        }
        .insert(db)
        .await
    }

    pub async fn find_by_slug(db: &DbConn, slug: &str) -> Result<Option<Model>, DbErr> {
        Entity::find()
            .filter(Column::Slug.eq(slug))
            .one(db)
            .await
    }

    pub fn is_published(&self) -> bool {
        self.status == CourseStatus::Published
    }
}
