use std::sync::atomic::{AtomicU32, Ordering};

use sea_orm::DbConn;

use crate::models::course::Model as Course;
use crate::models::course_module::Model as CourseModule;
use crate::models::lesson::{LessonType, Model as Lesson};

static SEQ: AtomicU32 = AtomicU32::new(0);

/// Insert a draft course with no structure.
pub async fn draft(db: &DbConn, instructor_id: i64) -> Course {
    let n = SEQ.fetch_add(1, Ordering::Relaxed);
    Course::create(
        db,
        instructor_id,
        &format!("Course {n}"),
        Some("Fixture course"),
        &format!("course-{n}-fixture"),
        "programming",
        "beginner",
        49.0,
    )
    .await
    .expect("Failed to create course")
}

/// Insert a draft course with `modules` modules of `lessons_per_module`
/// publishable text lessons each.
pub async fn with_structure(
    db: &DbConn,
    instructor_id: i64,
    modules: usize,
    lessons_per_module: usize,
) -> (Course, Vec<CourseModule>, Vec<Lesson>) {
    let course = draft(db, instructor_id).await;

    let mut all_modules = Vec::new();
    let mut all_lessons = Vec::new();
    for m in 0..modules {
        let module = CourseModule::create(db, course.id, &format!("Module {m}"), m as i32 + 1, None)
            .await
            .expect("Failed to create module");

        for l in 0..lessons_per_module {
            let lesson = Lesson::create(
                db,
                module.id,
                &format!("Lesson {m}.{l}"),
                LessonType::Text,
                l as i32 + 1,
                false,
                10,
                None,
                Some("Lesson body"),
            )
            .await
            .expect("Failed to create lesson");
            all_lessons.push(lesson);
        }
        all_modules.push(module);
    }

    (course, all_modules, all_lessons)
}
