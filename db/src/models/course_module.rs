use chrono::{DateTime, Utc};
use sea_orm::ActiveValue::Set;
use sea_orm::{QueryFilter, QueryOrder};
use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "course_modules")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,

    pub course_id: i64,
    pub title: String,
    /// Unique within the course; contiguous 1..N after a reorder.
    pub order_number: i32,
    /// Derived sum of child lesson durations.
    pub duration_minutes: i32,
    pub prerequisite_module_id: Option<i64>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::course::Entity",
        from = "Column::CourseId",
        to = "super::course::Column::Id"
    )]
    Course,

    #[sea_orm(has_many = "super::lesson::Entity")]
    Lessons,
}

impl Related<super::course::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Course.def()
    }
}

impl Related<super::lesson::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Lessons.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    pub async fn create(
        db: &DbConn,
        course_id: i64,
        title: &str,
        order_number: i32,
        prerequisite_module_id: Option<i64>,
    ) -> Result<Model, DbErr> {
        let now = Utc::now();
        ActiveModel {
            course_id: Set(course_id),
            title: Set(title.to_owned()),
            order_number: Set(order_number),
            duration_minutes: Set(0),
            prerequisite_module_id: Set(prerequisite_module_id),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        }
        .insert(db)
        .await
    }

    pub async fn find_by_course(db: &DbConn, course_id: i64) -> Result<Vec<Model>, DbErr> {
        Entity::find()
            .filter(Column::CourseId.eq(course_id))
            .order_by_asc(Column::OrderNumber)
            .all(db)
            .await
    }

    /// Recompute the derived duration from the module's lessons.
    pub async fn refresh_duration(db: &DbConn, module_id: i64) -> Result<Model, DbErr> {
        let lessons = super::lesson::Model::find_by_module(db, module_id).await?;
        let total: i32 = lessons.iter().map(|l| l.duration_minutes).sum();

        let module = Entity::find_by_id(module_id)
            .one(db)
            .await?
            .ok_or_else(|| DbErr::RecordNotFound(format!("Module ID {module_id} not found")))?;

        let mut active: ActiveModel = module.into();
        active.duration_minutes = Set(total);
        active.updated_at = Set(Utc::now());
        active.update(db).await
    }
}
