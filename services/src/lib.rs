mod access;

pub mod assignment_service;
pub mod course_service;
pub mod enrollment_service;
pub mod error;
pub mod quiz_service;
pub mod storage;

pub use error::{ServiceError, ServiceResult};
