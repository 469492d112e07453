use chrono::{DateTime, Utc};
use sea_orm::ActiveValue::Set;
use sea_orm::QueryFilter;
use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "assignments")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,

    pub lesson_id: i64,
    pub title: String,
    pub instructions: String,

    pub due_date: DateTime<Utc>,
    pub late_submission_allowed: bool,
    pub late_penalty_percentage: f64,
    pub max_points: f64,

    pub requires_file_upload: bool,
    /// JSON array of "."-prefixed extensions, e.g. [".pdf", ".zip"].
    pub allowed_file_types: Json,
    pub max_file_size_mb: i32,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::lesson::Entity",
        from = "Column::LessonId",
        to = "super::lesson::Column::Id"
    )]
    Lesson,

    #[sea_orm(has_many = "super::assignment_submission::Entity")]
    Submissions,
}

impl Related<super::lesson::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Lesson.def()
    }
}

impl Related<super::assignment_submission::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Submissions.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    #[allow(clippy::too_many_arguments)]
    pub async fn create(
        db: &DbConn,
        lesson_id: i64,
        title: &str,
        instructions: &str,
        due_date: DateTime<Utc>,
        late_submission_allowed: bool,
        late_penalty_percentage: f64,
        max_points: f64,
        requires_file_upload: bool,
        allowed_file_types: Json,
        max_file_size_mb: i32,
    ) -> Result<Model, DbErr> {
        let now = Utc::now();
        ActiveModel {
            lesson_id: Set(lesson_id),
            title: Set(title.to_owned()),
            instructions: Set(instructions.to_owned()),
            due_date: Set(due_date),
            late_submission_allowed: Set(late_submission_allowed),
            late_penalty_percentage: Set(late_penalty_percentage),
            max_points: Set(max_points),
            requires_file_upload: Set(requires_file_upload),
            allowed_file_types: Set(allowed_file_types),
            max_file_size_mb: Set(max_file_size_mb),
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

    pub fn is_late_at(&self, submitted_at: DateTime<Utc>) -> bool {
        submitted_at > self.due_date
    }

    /// Open for submissions unless past due with late submissions disallowed.
    pub fn is_accepting_submissions_at(&self, now: DateTime<Utc>) -> bool {
        now <= self.due_date || self.late_submission_allowed
    }

    pub fn allowed_extensions(&self) -> Vec<String> {
        self.allowed_file_types
            .as_array()
            .map(|a| {
                a.iter()
                    .filter_map(|v| v.as_str().map(str::to_owned))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Case-insensitive extension allowlist check on the original filename.
    pub fn allows_file(&self, file_name: &str) -> bool {
        let lower = file_name.to_lowercase();
        self.allowed_extensions()
            .iter()
            .any(|ext| lower.ends_with(&ext.to_lowercase()))
    }

    /// Apply the late penalty to an awarded score.
    pub fn late_penalised(&self, points: f64) -> f64 {
        points - points * self.late_penalty_percentage / 100.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;

    fn assignment(due_in_hours: i64, late_allowed: bool, penalty: f64) -> Model {
        Model {
            id: 1,
            lesson_id: 1,
            title: "Essay".into(),
            instructions: "Write".into(),
            due_date: Utc::now() + Duration::hours(due_in_hours),
            late_submission_allowed: late_allowed,
            late_penalty_percentage: penalty,
            max_points: 100.0,
            requires_file_upload: false,
            allowed_file_types: json!([".pdf", ".docx"]),
            max_file_size_mb: 10,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn late_detection_is_strict() {
        let a = assignment(0, true, 0.0);
        assert!(!a.is_late_at(a.due_date));
        assert!(a.is_late_at(a.due_date + Duration::seconds(1)));
    }

    #[test]
    fn closes_past_due_when_late_disallowed() {
        let open = assignment(1, false, 0.0);
        assert!(open.is_accepting_submissions_at(Utc::now()));

        let closed = assignment(-1, false, 0.0);
        assert!(!closed.is_accepting_submissions_at(Utc::now()));

        let late_ok = assignment(-1, true, 0.0);
        assert!(late_ok.is_accepting_submissions_at(Utc::now()));
    }

    #[test]
    fn extension_allowlist_is_case_insensitive() {
        let a = assignment(1, false, 0.0);
        assert!(a.allows_file("report.pdf"));
        assert!(a.allows_file("REPORT.PDF"));
        assert!(a.allows_file("essay.docx"));
        assert!(!a.allows_file("archive.zip"));
        assert!(!a.allows_file("pdf"));
    }

    #[test]
    fn late_penalty_formula() {
        let a = assignment(1, true, 20.0);
        assert_eq!(a.late_penalised(80.0), 64.0);
        assert_eq!(a.late_penalised(0.0), 0.0);
    }
}
