use sea_orm_migration::prelude::*;

pub struct Migration;

impl MigrationName for Migration {
    fn name(&self) -> &str {
        "m202508010009_create_quiz_submissions"
    }
}

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Alias::new("quiz_submissions"))
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Alias::new("id"))
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Alias::new("quiz_id")).integer().not_null())
                    .col(
                        ColumnDef::new(Alias::new("student_id"))
                            .integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Alias::new("enrollment_id"))
                            .integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Alias::new("attempt_number"))
                            .integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Alias::new("started_at"))
                            .timestamp()
                            .not_null(),
                    )
                    .col(ColumnDef::new(Alias::new("submitted_at")).timestamp())
                    .col(ColumnDef::new(Alias::new("time_taken_seconds")).integer())
                    .col(ColumnDef::new(Alias::new("score_percentage")).double())
                    .col(ColumnDef::new(Alias::new("points_earned")).double())
                    .col(ColumnDef::new(Alias::new("answers")).json().not_null())
                    .col(
                        ColumnDef::new(Alias::new("grading_status"))
                            .string()
                            .not_null(),
                    )
                    .col(ColumnDef::new(Alias::new("feedback")).text())
                    .col(ColumnDef::new(Alias::new("graded_at")).timestamp())
                    .col(ColumnDef::new(Alias::new("graded_by")).integer())
                    .col(
                        ColumnDef::new(Alias::new("created_at"))
                            .timestamp()
                            .not_null()
                            .default(Expr::cust("CURRENT_TIMESTAMP")),
                    )
                    .col(
                        ColumnDef::new(Alias::new("updated_at"))
                            .timestamp()
                            .not_null()
                            .default(Expr::cust("CURRENT_TIMESTAMP")),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .from(Alias::new("quiz_submissions"), Alias::new("quiz_id"))
                            .to(Alias::new("quizzes"), Alias::new("id"))
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .from(Alias::new("quiz_submissions"), Alias::new("student_id"))
                            .to(Alias::new("users"), Alias::new("id"))
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .from(Alias::new("quiz_submissions"), Alias::new("enrollment_id"))
                            .to(Alias::new("enrollments"), Alias::new("id"))
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        // Attempt numbers are strictly increasing per (quiz, student);
        // concurrent double-starts collide here instead of racing.
        manager
            .create_index(
                Index::create()
                    .name("ux_quiz_submissions_attempt")
                    .table(Alias::new("quiz_submissions"))
                    .col(Alias::new("quiz_id"))
                    .col(Alias::new("student_id"))
                    .col(Alias::new("attempt_number"))
                    .unique()
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(
                Table::drop()
                    .table(Alias::new("quiz_submissions"))
                    .to_owned(),
            )
            .await
    }
}
