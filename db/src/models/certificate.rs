use chrono::{DateTime, Utc};
use sea_orm::ActiveValue::Set;
use sea_orm::QueryFilter;
use sea_orm::entity::prelude::*;
use uuid::Uuid;

/// Proof of course completion, issued at most once per enrollment
/// (backed by the unique index on `enrollment_id`).
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "certificates")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,

    pub enrollment_id: i64,
    /// Human-readable verification code, e.g. "CERT-7F3A2B1C".
    pub code: String,
    pub pdf_url: String,
    pub verification_url: String,
    pub issued_at: DateTime<Utc>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::enrollment::Entity",
        from = "Column::EnrollmentId",
        to = "super::enrollment::Column::Id"
    )]
    Enrollment,
}

impl Related<super::enrollment::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Enrollment.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    pub async fn issue(db: &DbConn, enrollment_id: i64) -> Result<Model, DbErr> {
        let code = Self::generate_code();
        let now = Utc::now();
        ActiveModel {
            enrollment_id: Set(enrollment_id),
            code: Set(code.clone()),
            pdf_url: Set(format!("certificates/{code}.pdf")),
            verification_url: Set(format!("/certificates/verify/{code}")),
            issued_at: Set(now),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        }
        .insert(db)
        .await
    }

    pub async fn find_by_enrollment(
        db: &DbConn,
        enrollment_id: i64,
    ) -> Result<Option<Model>, DbErr> {
        Entity::find()
            .filter(Column::EnrollmentId.eq(enrollment_id))
            .one(db)
            .await
    }

    fn generate_code() -> String {
        let suffix = Uuid::new_v4().simple().to_string();
        format!("CERT-{}", &suffix[..8].to_uppercase())
    }
}
