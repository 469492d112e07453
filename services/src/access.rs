//! Ownership lookups shared by the services: walking a lesson or module
//! up to its course, and checking that the acting user manages it.

use db::models::{course, course_module, lesson, user};
use sea_orm::{DbConn, EntityTrait};

use crate::error::{ServiceError, ServiceResult};

pub(crate) async fn course_by_id(db: &DbConn, course_id: i64) -> ServiceResult<course::Model> {
    course::Entity::find_by_id(course_id)
        .one(db)
        .await?
        .ok_or_else(|| ServiceError::not_found("course", course_id))
}

pub(crate) async fn module_with_course(
    db: &DbConn,
    module_id: i64,
) -> ServiceResult<(course_module::Model, course::Model)> {
    let module = course_module::Entity::find_by_id(module_id)
        .one(db)
        .await?
        .ok_or_else(|| ServiceError::not_found("module", module_id))?;
    let course = course_by_id(db, module.course_id).await?;
    Ok((module, course))
}

pub(crate) async fn lesson_with_course(
    db: &DbConn,
    lesson_id: i64,
) -> ServiceResult<(lesson::Model, course::Model)> {
    let lesson = lesson::Entity::find_by_id(lesson_id)
        .one(db)
        .await?
        .ok_or_else(|| ServiceError::not_found("lesson", lesson_id))?;
    let (_, course) = module_with_course(db, lesson.module_id).await?;
    Ok((lesson, course))
}

/// Course management requires the owning instructor or an admin.
pub(crate) fn ensure_manages(actor: &user::Model, course: &course::Model) -> ServiceResult<()> {
    if actor.is_admin() || (actor.can_grade() && actor.id == course.instructor_id) {
        Ok(())
    } else {
        Err(ServiceError::Forbidden(format!(
            "user {} does not manage course {}",
            actor.id, course.id
        )))
    }
}
