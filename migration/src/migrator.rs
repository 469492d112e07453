use sea_orm_migration::prelude::*;

use crate::migrations;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(migrations::m202508010001_create_users::Migration),
            Box::new(migrations::m202508010002_create_courses::Migration),
            Box::new(migrations::m202508010003_create_course_modules::Migration),
            Box::new(migrations::m202508010004_create_lessons::Migration),
            Box::new(migrations::m202508010005_create_enrollments::Migration),
            Box::new(migrations::m202508010006_create_lesson_progress::Migration),
            Box::new(migrations::m202508010007_create_quizzes::Migration),
            Box::new(migrations::m202508010008_create_questions::Migration),
            Box::new(migrations::m202508010009_create_quiz_submissions::Migration),
            Box::new(migrations::m202508010010_create_assignments::Migration),
            Box::new(migrations::m202508010011_create_assignment_submissions::Migration),
            Box::new(migrations::m202508010012_create_certificates::Migration),
        ]
    }
}
