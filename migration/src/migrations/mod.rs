pub mod m202508010001_create_users;
pub mod m202508010002_create_courses;
pub mod m202508010003_create_course_modules;
pub mod m202508010004_create_lessons;
pub mod m202508010005_create_enrollments;
pub mod m202508010006_create_lesson_progress;
pub mod m202508010007_create_quizzes;
pub mod m202508010008_create_questions;
pub mod m202508010009_create_quiz_submissions;
pub mod m202508010010_create_assignments;
pub mod m202508010011_create_assignment_submissions;
pub mod m202508010012_create_certificates;
