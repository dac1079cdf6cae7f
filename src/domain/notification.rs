use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    DonationClaimed,
    MissionAccepted,
    PickupConfirmed,
    DeliveryConfirmed,
    DonationCompleted,
    DonationCancelled,
    DonationRejected,
    DonationExpired,
    MissionReassigned,
    UrgentDispatch,
}

impl NotificationKind {
    pub const ALL: [NotificationKind; 10] = [
        NotificationKind::DonationClaimed,
        NotificationKind::MissionAccepted,
        NotificationKind::PickupConfirmed,
        NotificationKind::DeliveryConfirmed,
        NotificationKind::DonationCompleted,
        NotificationKind::DonationCancelled,
        NotificationKind::DonationRejected,
        NotificationKind::DonationExpired,
        NotificationKind::MissionReassigned,
        NotificationKind::UrgentDispatch,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::DonationClaimed => "donation_claimed",
            NotificationKind::MissionAccepted => "mission_accepted",
            NotificationKind::PickupConfirmed => "pickup_confirmed",
            NotificationKind::DeliveryConfirmed => "delivery_confirmed",
            NotificationKind::DonationCompleted => "donation_completed",
            NotificationKind::DonationCancelled => "donation_cancelled",
            NotificationKind::DonationRejected => "donation_rejected",
            NotificationKind::DonationExpired => "donation_expired",
            NotificationKind::MissionReassigned => "mission_reassigned",
            NotificationKind::UrgentDispatch => "urgent_dispatch",
        }
    }
}

impl fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NotificationKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        NotificationKind::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| anyhow::anyhow!("unknown notification kind: {s}"))
    }
}

/// Immutable apart from `is_read`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: Uuid,
    pub recipient: Uuid,
    pub message: String,
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    pub related_donation: Option<Uuid>,
    pub is_read: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}
