//! Notification records produced from complaint events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{ComplaintId, UserId};
use crate::error::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    ComplaintCreated,
    ComplaintAssigned,
    ComplaintStatusUpdated,
    ComplaintResolved,
    ComplaintClosed,
}

impl NotificationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            NotificationKind::ComplaintCreated => "complaint_created",
            NotificationKind::ComplaintAssigned => "complaint_assigned",
            NotificationKind::ComplaintStatusUpdated => "complaint_status_updated",
            NotificationKind::ComplaintResolved => "complaint_resolved",
            NotificationKind::ComplaintClosed => "complaint_closed",
        }
    }
}

impl std::str::FromStr for NotificationKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "complaint_created" => Ok(NotificationKind::ComplaintCreated),
            "complaint_assigned" => Ok(NotificationKind::ComplaintAssigned),
            "complaint_status_updated" => Ok(NotificationKind::ComplaintStatusUpdated),
            "complaint_resolved" => Ok(NotificationKind::ComplaintResolved),
            "complaint_closed" => Ok(NotificationKind::ComplaintClosed),
            _ => Err(Error::Validation(format!("unknown notification kind: {s}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Email,
    InApp,
}

impl Channel {
    pub fn as_str(self) -> &'static str {
        match self {
            Channel::Email => "email",
            Channel::InApp => "in_app",
        }
    }
}

impl std::str::FromStr for Channel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "email" => Ok(Channel::Email),
            "in_app" => Ok(Channel::InApp),
            _ => Err(Error::Validation(format!("unknown channel: {s}"))),
        }
    }
}

/// A message queued for a user. Delivery happens elsewhere.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: Uuid,
    pub user_id: UserId,
    pub title: String,
    pub message: String,
    pub kind: NotificationKind,
    pub reference_id: Option<ComplaintId>,
    pub channel: Channel,
    pub read: bool,
    pub sent: bool,
    pub created_at: DateTime<Utc>,
}

impl Notification {
    pub fn new(
        user_id: UserId,
        kind: NotificationKind,
        channel: Channel,
        title: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            title: title.into(),
            message: message.into(),
            kind,
            reference_id: None,
            channel,
            read: false,
            sent: false,
            created_at: Utc::now(),
        }
    }

    pub fn reference(mut self, complaint_id: ComplaintId) -> Self {
        self.reference_id = Some(complaint_id);
        self
    }
}
