use std::sync::atomic::{AtomicU32, Ordering};

use sea_orm::DbConn;

use crate::models::user::{Model as User, UserRole};

static SEQ: AtomicU32 = AtomicU32::new(0);

fn next_seq() -> u32 {
    SEQ.fetch_add(1, Ordering::Relaxed)
}

/// Insert a student with a unique username/email and return it.
pub async fn student(db: &DbConn) -> User {
    let n = next_seq();
    User::create(
        db,
        &format!("student{n}"),
        &format!("student{n}@example.com"),
        UserRole::Student,
    )
    .await
    .expect("Failed to create student")
}

pub async fn instructor(db: &DbConn) -> User {
    let n = next_seq();
    User::create(
        db,
        &format!("instructor{n}"),
        &format!("instructor{n}@example.com"),
        UserRole::Instructor,
    )
    .await
    .expect("Failed to create instructor")
}

pub async fn admin(db: &DbConn) -> User {
    let n = next_seq();
    User::create(
        db,
        &format!("admin{n}"),
        &format!("admin{n}@example.com"),
        UserRole::Admin,
    )
    .await
    .expect("Failed to create admin")
}
