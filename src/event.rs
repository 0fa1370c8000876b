//! Domain events exchanged between the complaint, routing, workload and
//! notification sides of the system.
//!
//! Every event travels inside an [`Event`] envelope carrying its own id, so
//! consumers can recognize redeliveries. Delivery is at-least-once.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::model::{Category, ComplaintId, DepartmentId, Location, Status, UserId};

/// A published domain event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub event_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub kind: EventKind,
}

impl Event {
    pub fn new(kind: EventKind) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            kind,
        }
    }

    pub fn topic(&self) -> Topic {
        self.kind.topic()
    }

    /// Decode a wire payload. Payloads with an unrecognized shape become
    /// [`EventKind::Unknown`] instead of failing, so a consumer can
    /// acknowledge them and move on.
    pub fn decode(payload: &serde_json::Value) -> Self {
        serde_json::from_value(payload.clone()).unwrap_or_else(|_| Event {
            event_id: payload
                .get("event_id")
                .and_then(|v| v.as_str())
                .and_then(|s| Uuid::parse_str(s).ok())
                .unwrap_or_else(Uuid::new_v4),
            timestamp: Utc::now(),
            kind: EventKind::Unknown {
                raw: payload.to_string(),
            },
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    ComplaintCreated {
        complaint_id: ComplaintId,
        category: Category,
        location: Location,
        reported_by: UserId,
    },
    ComplaintAssigned {
        complaint_id: ComplaintId,
        department_id: DepartmentId,
        department_name: String,
    },
    ComplaintStatusUpdated {
        complaint_id: ComplaintId,
        old_status: Status,
        new_status: Status,
    },
    ComplaintResolved {
        complaint_id: ComplaintId,
        department_id: Option<DepartmentId>,
        status: Status,
    },
    /// Anything this build cannot decode.
    Unknown { raw: String },
}

impl EventKind {
    pub fn topic(&self) -> Topic {
        match self {
            EventKind::ComplaintCreated { .. } => Topic::ComplaintCreated,
            EventKind::ComplaintAssigned { .. } => Topic::ComplaintAssigned,
            EventKind::ComplaintStatusUpdated { .. } => Topic::ComplaintStatusUpdated,
            EventKind::ComplaintResolved { .. } => Topic::ComplaintResolved,
            EventKind::Unknown { .. } => Topic::Unknown,
        }
    }

    pub fn complaint_id(&self) -> Option<ComplaintId> {
        match self {
            EventKind::ComplaintCreated { complaint_id, .. }
            | EventKind::ComplaintAssigned { complaint_id, .. }
            | EventKind::ComplaintStatusUpdated { complaint_id, .. }
            | EventKind::ComplaintResolved { complaint_id, .. } => Some(*complaint_id),
            EventKind::Unknown { .. } => None,
        }
    }
}

/// Channel an event is published on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    ComplaintCreated,
    ComplaintAssigned,
    ComplaintStatusUpdated,
    ComplaintResolved,
    Unknown,
}

impl Topic {
    /// Topics with a real queue behind them.
    pub const ALL: [Topic; 4] = [
        Topic::ComplaintCreated,
        Topic::ComplaintAssigned,
        Topic::ComplaintStatusUpdated,
        Topic::ComplaintResolved,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Topic::ComplaintCreated => "complaint.created",
            Topic::ComplaintAssigned => "complaint.assigned",
            Topic::ComplaintStatusUpdated => "complaint.status_updated",
            Topic::ComplaintResolved => "complaint.resolved",
            Topic::Unknown => "unknown",
        }
    }

    /// pgmq queue names must be plain identifiers.
    pub fn queue_name(self) -> String {
        self.as_str().replace('.', "_")
    }
}

impl std::fmt::Display for Topic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_format_carries_type_discriminant() {
        let event = Event::new(EventKind::ComplaintResolved {
            complaint_id: ComplaintId::new(),
            department_id: None,
            status: Status::Resolved,
        });
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["kind"]["type"], "complaint_resolved");
        assert_eq!(json["kind"]["status"], "resolved");
    }

    #[test]
    fn malformed_payload_decodes_as_unknown() {
        let payload = serde_json::json!({"kind": {"type": "quantum_entangled", "qubit": 42}});
        let event = Event::decode(&payload);
        match &event.kind {
            EventKind::Unknown { raw } => assert!(raw.contains("quantum_entangled")),
            other => panic!("expected Unknown, got {other:?}"),
        }
        assert_eq!(event.topic(), Topic::Unknown);
    }

    #[test]
    fn queue_names_are_identifiers() {
        for topic in Topic::ALL {
            assert!(!topic.queue_name().contains('.'));
        }
    }
}
