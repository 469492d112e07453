//! Course authoring and the structural gate in front of publication.
//!
//! Order numbers are unique per parent (enforced by composite unique
//! indexes); reorders rewrite them in two phases so the index never
//! trips mid-pass. Publish eligibility accumulates every failing reason
//! instead of short-circuiting.

use chrono::Utc;
use db::events::{DomainEvent, EventSink};
use db::models::{course, course_module, lesson};
use log::info;
use rand::Rng;
use sea_orm::ActiveValue::Set;
use sea_orm::{ActiveModelTrait, DbConn, EntityTrait, IntoActiveModel};
use std::collections::HashSet;

use crate::access;
use crate::error::{on_unique_violation, ServiceError, ServiceResult};

#[derive(Debug, Clone)]
pub struct CreateCourse {
    pub title: String,
    pub description: Option<String>,
    pub category: String,
    pub difficulty: String,
    pub price: f64,
}

#[derive(Debug, Clone)]
pub struct AddLesson {
    pub title: String,
    pub lesson_type: lesson::LessonType,
    pub order_number: i32,
    pub is_preview: bool,
    pub duration_minutes: i32,
    pub content_url: Option<String>,
    pub content_text: Option<String>,
}

/// Result of the publish-eligibility check; `reasons` lists every
/// failing condition so the caller sees them all at once.
#[derive(Debug, Clone)]
pub struct PublishCheck {
    pub can_publish: bool,
    pub reasons: Vec<String>,
}

const MIN_MODULES_FOR_PUBLISH: usize = 3;

pub struct CourseService;

impl CourseService {
    pub async fn create_course(
        db: &DbConn,
        events: &EventSink,
        actor: &db::models::user::Model,
        params: CreateCourse,
    ) -> ServiceResult<course::Model> {
        if !actor.can_grade() {
            return Err(ServiceError::Forbidden(
                "only instructors can create courses".into(),
            ));
        }
        if params.title.trim().is_empty() {
            return Err(ServiceError::validation("title", "title must not be empty"));
        }
        if params.price < 0.0 {
            return Err(ServiceError::validation("price", "price must not be negative"));
        }

        let slug = generate_slug(&params.title);
        let created = course::Model::create(
            db,
            actor.id,
            &params.title,
            params.description.as_deref(),
            &slug,
            &params.category,
            &params.difficulty,
            params.price,
        )
        .await
        .map_err(|e| on_unique_violation(e, "a course with this slug already exists"))?;

        info!("course {} created by instructor {}", created.id, actor.id);
        events.publish(DomainEvent::CourseCreated {
            course_id: created.id,
            instructor_id: actor.id,
            slug: created.slug.clone(),
        });
        Ok(created)
    }

    pub async fn add_module(
        db: &DbConn,
        events: &EventSink,
        actor: &db::models::user::Model,
        course_id: i64,
        title: &str,
        order_number: i32,
        prerequisite_module_id: Option<i64>,
    ) -> ServiceResult<course_module::Model> {
        let course = access::course_by_id(db, course_id).await?;
        access::ensure_manages(actor, &course)?;

        if order_number < 1 {
            return Err(ServiceError::validation(
                "order_number",
                "order number must be positive",
            ));
        }
        if let Some(prereq) = prerequisite_module_id {
            let (_, prereq_course) = access::module_with_course(db, prereq).await?;
            if prereq_course.id != course_id {
                return Err(ServiceError::validation(
                    "prerequisite_module_id",
                    "prerequisite must belong to the same course",
                ));
            }
        }

        let siblings = course_module::Model::find_by_course(db, course_id).await?;
        if siblings.iter().any(|m| m.order_number == order_number) {
            return Err(ServiceError::Conflict(format!(
                "module with order number {order_number} already exists"
            )));
        }

        let created =
            course_module::Model::create(db, course_id, title, order_number, prerequisite_module_id)
                .await
                .map_err(|e| {
                    on_unique_violation(e, "module with this order number already exists")
                })?;

        events.publish(DomainEvent::ModuleAdded {
            course_id,
            module_id: created.id,
            order_number,
        });
        Ok(created)
    }

    pub async fn add_lesson(
        db: &DbConn,
        events: &EventSink,
        actor: &db::models::user::Model,
        module_id: i64,
        params: AddLesson,
    ) -> ServiceResult<lesson::Model> {
        let (module, course) = access::module_with_course(db, module_id).await?;
        access::ensure_manages(actor, &course)?;

        if params.order_number < 1 {
            return Err(ServiceError::validation(
                "order_number",
                "order number must be positive",
            ));
        }
        // Text lessons carry their content from creation; video content
        // arrives later via processing, checked at publish time.
        if params.lesson_type == lesson::LessonType::Text
            && params.content_text.as_deref().map_or(true, |t| t.trim().is_empty())
        {
            return Err(ServiceError::validation(
                "content_text",
                "text lessons require content text",
            ));
        }

        let siblings = lesson::Model::find_by_module(db, module_id).await?;
        if siblings.iter().any(|l| l.order_number == params.order_number) {
            return Err(ServiceError::Conflict(format!(
                "lesson with order number {} already exists",
                params.order_number
            )));
        }

        let created = lesson::Model::create(
            db,
            module_id,
            &params.title,
            params.lesson_type,
            params.order_number,
            params.is_preview,
            params.duration_minutes,
            params.content_url.as_deref(),
            params.content_text.as_deref(),
        )
        .await
        .map_err(|e| on_unique_violation(e, "lesson with this order number already exists"))?;

        course_module::Model::refresh_duration(db, module.id).await?;

        events.publish(DomainEvent::LessonAdded {
            module_id,
            lesson_id: created.id,
            order_number: created.order_number,
        });
        Ok(created)
    }

    /// Reassign module order numbers 1..N following `ordering`, which
    /// must be a permutation of the course's current module ids.
    pub async fn reorder_modules(
        db: &DbConn,
        events: &EventSink,
        actor: &db::models::user::Model,
        course_id: i64,
        ordering: Vec<i64>,
    ) -> ServiceResult<Vec<course_module::Model>> {
        let course = access::course_by_id(db, course_id).await?;
        access::ensure_manages(actor, &course)?;

        let current = course_module::Model::find_by_course(db, course_id).await?;
        validate_permutation(&ordering, current.iter().map(|m| m.id), "module")?;

        // Two-phase rewrite: park everything above the occupied range,
        // then assign the final contiguous numbers.
        let offset = current.iter().map(|m| m.order_number).max().unwrap_or(0) + 1;
        for (i, module) in current.iter().enumerate() {
            let mut active = module.clone().into_active_model();
            active.order_number = Set(offset + i as i32);
            active.update(db).await?;
        }
        for (i, id) in ordering.iter().enumerate() {
            let module = access::module_with_course(db, *id).await?.0;
            let mut active = module.into_active_model();
            active.order_number = Set(i as i32 + 1);
            active.updated_at = Set(Utc::now());
            active.update(db).await?;
        }

        events.publish(DomainEvent::ModulesReordered {
            course_id,
            ordering: ordering.clone(),
        });
        Ok(course_module::Model::find_by_course(db, course_id).await?)
    }

    pub async fn reorder_lessons(
        db: &DbConn,
        events: &EventSink,
        actor: &db::models::user::Model,
        module_id: i64,
        ordering: Vec<i64>,
    ) -> ServiceResult<Vec<lesson::Model>> {
        let (_, course) = access::module_with_course(db, module_id).await?;
        access::ensure_manages(actor, &course)?;

        let current = lesson::Model::find_by_module(db, module_id).await?;
        validate_permutation(&ordering, current.iter().map(|l| l.id), "lesson")?;

        let offset = current.iter().map(|l| l.order_number).max().unwrap_or(0) + 1;
        for (i, l) in current.iter().enumerate() {
            let mut active = l.clone().into_active_model();
            active.order_number = Set(offset + i as i32);
            active.update(db).await?;
        }
        for (i, id) in ordering.iter().enumerate() {
            let l = lesson::Entity::find_by_id(*id)
                .one(db)
                .await?
                .ok_or_else(|| ServiceError::not_found("lesson", *id))?;
            let mut active = l.into_active_model();
            active.order_number = Set(i as i32 + 1);
            active.updated_at = Set(Utc::now());
            active.update(db).await?;
        }

        events.publish(DomainEvent::LessonsReordered {
            module_id,
            ordering: ordering.clone(),
        });
        Ok(lesson::Model::find_by_module(db, module_id).await?)
    }

    /// Pure publish-eligibility predicate; collects every failing reason.
    pub async fn can_publish(db: &DbConn, course_id: i64) -> ServiceResult<PublishCheck> {
        let _course = access::course_by_id(db, course_id).await?;
        let modules = course_module::Model::find_by_course(db, course_id).await?;

        let mut reasons = Vec::new();
        if modules.len() < MIN_MODULES_FOR_PUBLISH {
            reasons.push(format!(
                "Course must have at least {MIN_MODULES_FOR_PUBLISH} modules"
            ));
        }

        for module in &modules {
            let lessons = lesson::Model::find_by_module(db, module.id).await?;
            if lessons.is_empty() {
                reasons.push(format!("Module '{}' has no lessons", module.title));
            }
            for l in &lessons {
                if !l.is_ready_for_publication() {
                    reasons.push(format!("Lesson '{}' is missing required content", l.title));
                }
            }
        }

        Ok(PublishCheck {
            can_publish: reasons.is_empty(),
            reasons,
        })
    }

    pub async fn publish(
        db: &DbConn,
        events: &EventSink,
        actor: &db::models::user::Model,
        course_id: i64,
    ) -> ServiceResult<course::Model> {
        let course = access::course_by_id(db, course_id).await?;
        access::ensure_manages(actor, &course)?;

        if !course.status.can_transition_to(course::CourseStatus::Published) {
            return Err(ServiceError::Conflict(format!(
                "course in status '{}' cannot be published",
                course.status
            )));
        }

        let check = Self::can_publish(db, course_id).await?;
        if !check.can_publish {
            return Err(ServiceError::Conflict(format!(
                "course is not ready to publish: {}",
                check.reasons.join("; ")
            )));
        }

        let published_at = Utc::now();
        let mut active = course.into_active_model();
        active.status = Set(course::CourseStatus::Published);
        active.published_at = Set(Some(published_at));
        active.updated_at = Set(published_at);
        let published = active.update(db).await?;

        info!("course {} published", published.id);
        events.publish(DomainEvent::CoursePublished {
            course_id: published.id,
            published_at,
        });
        Ok(published)
    }
}

fn validate_permutation(
    ordering: &[i64],
    current: impl Iterator<Item = i64>,
    kind: &str,
) -> ServiceResult<()> {
    let current: HashSet<i64> = current.collect();
    let given: HashSet<i64> = ordering.iter().copied().collect();
    if given.len() != ordering.len() || given != current {
        return Err(ServiceError::validation(
            "ordering",
            format!("ordering must be a permutation of all current {kind} ids"),
        ));
    }
    Ok(())
}

/// Slug from the title plus a timestamp+random suffix. Uniqueness is
/// probabilistic here; the unique index on `courses.slug` is the backstop.
fn generate_slug(title: &str) -> String {
    let mut base: String = title
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect();
    while base.contains("--") {
        base = base.replace("--", "-");
    }
    let base = base.trim_matches('-');

    let suffix: u32 = rand::rng().random_range(1000..10000);
    format!("{}-{}{}", base, Utc::now().timestamp_millis(), suffix)
}

#[cfg(test)]
mod tests {
    use super::*;
    use db::events::EventSink;
    use db::factories::{course_factory, user_factory};
    use db::models::lesson::LessonType;
    use db::test_utils::setup_test_db;

    fn text_lesson(order: i32) -> AddLesson {
        AddLesson {
            title: format!("Lesson {order}"),
            lesson_type: LessonType::Text,
            order_number: order,
            is_preview: false,
            duration_minutes: 15,
            content_url: None,
            content_text: Some("body".into()),
        }
    }

    #[tokio::test]
    async fn create_course_generates_unique_slugs() {
        let db = setup_test_db().await;
        let instructor = user_factory::instructor(&db).await;
        let (events, _rx) = EventSink::channel();

        let params = CreateCourse {
            title: "Intro to Rust".into(),
            description: None,
            category: "programming".into(),
            difficulty: "beginner".into(),
            price: 10.0,
        };
        let a = CourseService::create_course(&db, &events, &instructor, params.clone())
            .await
            .unwrap();
        let b = CourseService::create_course(&db, &events, &instructor, params)
            .await
            .unwrap();

        assert!(a.slug.starts_with("intro-to-rust-"));
        assert_ne!(a.slug, b.slug);
    }

    #[tokio::test]
    async fn students_cannot_create_courses() {
        let db = setup_test_db().await;
        let student = user_factory::student(&db).await;

        let err = CourseService::create_course(
            &db,
            &EventSink::disabled(),
            &student,
            CreateCourse {
                title: "Nope".into(),
                description: None,
                category: "x".into(),
                difficulty: "x".into(),
                price: 0.0,
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ServiceError::Forbidden(_)));
    }

    #[tokio::test]
    async fn duplicate_module_order_number_conflicts() {
        let db = setup_test_db().await;
        let instructor = user_factory::instructor(&db).await;
        let course = course_factory::draft(&db, instructor.id).await;
        let events = EventSink::disabled();

        CourseService::add_module(&db, &events, &instructor, course.id, "One", 1, None)
            .await
            .unwrap();
        let err = CourseService::add_module(&db, &events, &instructor, course.id, "Two", 1, None)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Conflict(_)));
    }

    #[tokio::test]
    async fn text_lesson_requires_body() {
        let db = setup_test_db().await;
        let instructor = user_factory::instructor(&db).await;
        let course = course_factory::draft(&db, instructor.id).await;
        let events = EventSink::disabled();
        let module =
            CourseService::add_module(&db, &events, &instructor, course.id, "M1", 1, None)
                .await
                .unwrap();

        let mut params = text_lesson(1);
        params.content_text = None;
        let err = CourseService::add_lesson(&db, &events, &instructor, module.id, params)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Validation { .. }));
    }

    #[tokio::test]
    async fn adding_lessons_refreshes_module_duration() {
        let db = setup_test_db().await;
        let instructor = user_factory::instructor(&db).await;
        let course = course_factory::draft(&db, instructor.id).await;
        let events = EventSink::disabled();
        let module =
            CourseService::add_module(&db, &events, &instructor, course.id, "M1", 1, None)
                .await
                .unwrap();

        CourseService::add_lesson(&db, &events, &instructor, module.id, text_lesson(1))
            .await
            .unwrap();
        CourseService::add_lesson(&db, &events, &instructor, module.id, text_lesson(2))
            .await
            .unwrap();

        let refreshed = access::module_with_course(&db, module.id).await.unwrap().0;
        assert_eq!(refreshed.duration_minutes, 30);
    }

    #[tokio::test]
    async fn reorder_assigns_contiguous_numbers_in_given_sequence() {
        let db = setup_test_db().await;
        let instructor = user_factory::instructor(&db).await;
        let (course, modules, _) = course_factory::with_structure(&db, instructor.id, 3, 1).await;
        let events = EventSink::disabled();

        let reversed: Vec<i64> = modules.iter().rev().map(|m| m.id).collect();
        let reordered =
            CourseService::reorder_modules(&db, &events, &instructor, course.id, reversed.clone())
                .await
                .unwrap();

        let ids_in_order: Vec<i64> = reordered.iter().map(|m| m.id).collect();
        assert_eq!(ids_in_order, reversed);
        let numbers: Vec<i32> = reordered.iter().map(|m| m.order_number).collect();
        assert_eq!(numbers, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn reorder_lessons_within_a_module() {
        let db = setup_test_db().await;
        let instructor = user_factory::instructor(&db).await;
        let (_, modules, lessons) = course_factory::with_structure(&db, instructor.id, 1, 3).await;
        let events = EventSink::disabled();

        let reversed: Vec<i64> = lessons.iter().rev().map(|l| l.id).collect();
        let reordered = CourseService::reorder_lessons(
            &db,
            &events,
            &instructor,
            modules[0].id,
            reversed.clone(),
        )
        .await
        .unwrap();

        let ids_in_order: Vec<i64> = reordered.iter().map(|l| l.id).collect();
        assert_eq!(ids_in_order, reversed);
        let numbers: Vec<i32> = reordered.iter().map(|l| l.order_number).collect();
        assert_eq!(numbers, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn reorder_rejects_non_permutations() {
        let db = setup_test_db().await;
        let instructor = user_factory::instructor(&db).await;
        let (course, modules, _) = course_factory::with_structure(&db, instructor.id, 3, 1).await;
        let events = EventSink::disabled();

        // Missing one id
        let short: Vec<i64> = modules.iter().take(2).map(|m| m.id).collect();
        let err = CourseService::reorder_modules(&db, &events, &instructor, course.id, short)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Validation { .. }));

        // Duplicate id
        let dup = vec![modules[0].id, modules[0].id, modules[1].id];
        let err = CourseService::reorder_modules(&db, &events, &instructor, course.id, dup)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Validation { .. }));
    }

    #[tokio::test]
    async fn publish_gating_accumulates_reasons() {
        let db = setup_test_db().await;
        let instructor = user_factory::instructor(&db).await;
        let (course, _, _) = course_factory::with_structure(&db, instructor.id, 2, 1).await;

        let check = CourseService::can_publish(&db, course.id).await.unwrap();
        assert!(!check.can_publish);
        assert!(check
            .reasons
            .iter()
            .any(|r| r == "Course must have at least 3 modules"));
    }

    #[tokio::test]
    async fn publish_blocked_by_unprocessed_video() {
        let db = setup_test_db().await;
        let instructor = user_factory::instructor(&db).await;
        let (course, modules, _) = course_factory::with_structure(&db, instructor.id, 3, 1).await;
        let events = EventSink::disabled();

        CourseService::add_lesson(
            &db,
            &events,
            &instructor,
            modules[0].id,
            AddLesson {
                title: "Raw video".into(),
                lesson_type: LessonType::Video,
                order_number: 2,
                is_preview: false,
                duration_minutes: 5,
                content_url: None,
                content_text: None,
            },
        )
        .await
        .unwrap();

        let check = CourseService::can_publish(&db, course.id).await.unwrap();
        assert!(!check.can_publish);
        assert!(check.reasons.iter().any(|r| r.contains("Raw video")));

        let err = CourseService::publish(&db, &events, &instructor, course.id)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Conflict(_)));
    }

    #[tokio::test]
    async fn publish_succeeds_when_structure_is_complete() {
        let db = setup_test_db().await;
        let instructor = user_factory::instructor(&db).await;
        let (course, _, _) = course_factory::with_structure(&db, instructor.id, 3, 1).await;
        let (events, mut rx) = EventSink::channel();

        let published = CourseService::publish(&db, &events, &instructor, course.id)
            .await
            .unwrap();
        assert_eq!(published.status, course::CourseStatus::Published);
        assert!(published.published_at.is_some());

        let event = rx.recv().await.unwrap();
        assert_eq!(event.kind(), "course_published");
    }

    #[tokio::test]
    async fn publish_is_not_repeatable() {
        let db = setup_test_db().await;
        let instructor = user_factory::instructor(&db).await;
        let (course, _, _) = course_factory::with_structure(&db, instructor.id, 3, 1).await;
        let events = EventSink::disabled();

        CourseService::publish(&db, &events, &instructor, course.id)
            .await
            .unwrap();
        let err = CourseService::publish(&db, &events, &instructor, course.id)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Conflict(_)));
    }

    #[tokio::test]
    async fn other_instructors_cannot_touch_the_course() {
        let db = setup_test_db().await;
        let owner = user_factory::instructor(&db).await;
        let rival = user_factory::instructor(&db).await;
        let course = course_factory::draft(&db, owner.id).await;

        let err = CourseService::add_module(
            &db,
            &EventSink::disabled(),
            &rival,
            course.id,
            "M",
            1,
            None,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ServiceError::Forbidden(_)));
    }
}
