pub mod course_factory;
pub mod user_factory;
