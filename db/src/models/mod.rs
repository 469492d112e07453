pub mod assignment;
pub mod assignment_submission;
pub mod certificate;
pub mod course;
pub mod course_module;
pub mod enrollment;
pub mod lesson;
pub mod lesson_progress;
pub mod question;
pub mod quiz;
pub mod quiz_submission;
pub mod user;

pub use assignment::Entity as Assignment;
pub use assignment_submission::Entity as AssignmentSubmission;
pub use certificate::Entity as Certificate;
pub use course::Entity as Course;
pub use course_module::Entity as CourseModule;
pub use enrollment::Entity as Enrollment;
pub use lesson::Entity as Lesson;
pub use lesson_progress::Entity as LessonProgress;
pub use question::Entity as Question;
pub use quiz::Entity as Quiz;
pub use quiz_submission::Entity as QuizSubmission;
pub use user::Entity as User;
