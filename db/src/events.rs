/// Domain events emitted by the core services.
///
/// Every committed mutation that downstream consumers care about (cache
/// invalidation, search indexing, notifications, payments reconciliation)
/// is announced exactly once through an [`EventSink`]. The sink is an
/// explicit outbox: services push events after the mutation has been
/// persisted, and delivery beyond the channel is a collaborator concern.
use chrono::{DateTime, Utc};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum DomainEvent {
    CourseCreated {
        course_id: i64,
        instructor_id: i64,
        slug: String,
    },
    ModuleAdded {
        course_id: i64,
        module_id: i64,
        order_number: i32,
    },
    LessonAdded {
        module_id: i64,
        lesson_id: i64,
        order_number: i32,
    },
    ModulesReordered {
        course_id: i64,
        ordering: Vec<i64>,
    },
    LessonsReordered {
        module_id: i64,
        ordering: Vec<i64>,
    },
    CoursePublished {
        course_id: i64,
        published_at: DateTime<Utc>,
    },
    StudentEnrolled {
        enrollment_id: i64,
        student_id: i64,
        course_id: i64,
    },
    EnrollmentWithdrawn {
        enrollment_id: i64,
        reason: String,
    },
    LessonCompleted {
        enrollment_id: i64,
        lesson_id: i64,
        progress_percentage: f64,
    },
    CourseCompleted {
        enrollment_id: i64,
        course_id: i64,
        completed_at: DateTime<Utc>,
    },
    CertificateIssued {
        enrollment_id: i64,
        certificate_id: i64,
        code: String,
    },
    QuizAttemptStarted {
        quiz_id: i64,
        student_id: i64,
        attempt_number: i32,
    },
    QuizSubmitted {
        submission_id: i64,
        quiz_id: i64,
        student_id: i64,
        score_percentage: f64,
        pending_review: bool,
    },
    AssignmentSubmitted {
        submission_id: i64,
        assignment_id: i64,
        student_id: i64,
        is_late: bool,
        revision_number: i32,
    },
    SubmissionGraded {
        submission_id: i64,
        student_id: i64,
        graded_by: i64,
        score: f64,
    },
    RevisionRequested {
        submission_id: i64,
        student_id: i64,
        requested_by: i64,
    },
}

impl DomainEvent {
    /// Stable name used by consumers for routing.
    pub fn kind(&self) -> &'static str {
        match self {
            DomainEvent::CourseCreated { .. } => "course_created",
            DomainEvent::ModuleAdded { .. } => "module_added",
            DomainEvent::LessonAdded { .. } => "lesson_added",
            DomainEvent::ModulesReordered { .. } => "modules_reordered",
            DomainEvent::LessonsReordered { .. } => "lessons_reordered",
            DomainEvent::CoursePublished { .. } => "course_published",
            DomainEvent::StudentEnrolled { .. } => "student_enrolled",
            DomainEvent::EnrollmentWithdrawn { .. } => "enrollment_withdrawn",
            DomainEvent::LessonCompleted { .. } => "lesson_completed",
            DomainEvent::CourseCompleted { .. } => "course_completed",
            DomainEvent::CertificateIssued { .. } => "certificate_issued",
            DomainEvent::QuizAttemptStarted { .. } => "quiz_attempt_started",
            DomainEvent::QuizSubmitted { .. } => "quiz_submitted",
            DomainEvent::AssignmentSubmitted { .. } => "assignment_submitted",
            DomainEvent::SubmissionGraded { .. } => "submission_graded",
            DomainEvent::RevisionRequested { .. } => "revision_requested",
        }
    }
}

/// Fire-and-forget outbox for [`DomainEvent`]s.
///
/// Backed by an unbounded channel so services never block on slow
/// consumers. A disconnected receiver downgrades publishing to a logged
/// warning rather than an error; delivery is best-effort.
#[derive(Clone)]
pub struct EventSink {
    tx: Option<mpsc::UnboundedSender<DomainEvent>>,
}

impl EventSink {
    /// Create a sink and the receiver the dispatcher should drain.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<DomainEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx: Some(tx) }, rx)
    }

    /// A sink that discards everything. Useful for tests and one-off tools.
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    pub fn publish(&self, event: DomainEvent) {
        let kind = event.kind();
        match &self.tx {
            Some(tx) => {
                if tx.send(event).is_err() {
                    warn!("event receiver closed; dropping {kind} event");
                }
            }
            None => debug!("event sink disabled; dropping {kind} event"),
        }
    }
}
