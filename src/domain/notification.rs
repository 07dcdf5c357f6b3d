use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    Activity,
    Transportation,
    Lodging,
    Checklist,
}

impl NotificationKind {
    pub const ALL: [NotificationKind; 4] = [
        NotificationKind::Activity,
        NotificationKind::Transportation,
        NotificationKind::Lodging,
        NotificationKind::Checklist,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::Activity => "activity",
            NotificationKind::Transportation => "transportation",
            NotificationKind::Lodging => "lodging",
            NotificationKind::Checklist => "checklist",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == value)
    }

    /// Phrase used in single-update subject lines, e.g. "a new activity".
    pub fn describe(&self) -> &'static str {
        match self {
            NotificationKind::Activity => "a new activity",
            NotificationKind::Transportation => "new transportation",
            NotificationKind::Lodging => "new lodging",
            NotificationKind::Checklist => "a new checklist",
        }
    }
}

impl fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TripInfo {
    pub name: String,
    #[serde(default)]
    pub location: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActivityDetails {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub date: Option<String>,
    #[serde(default)]
    pub start_time: Option<String>,
    #[serde(default)]
    pub end_time: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub image_url: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransportationDetails {
    #[serde(default)]
    pub mode: Option<String>,
    #[serde(default)]
    pub origin: Option<String>,
    #[serde(default)]
    pub destination: Option<String>,
    #[serde(default)]
    pub departure_date: Option<String>,
    #[serde(default)]
    pub departure_time: Option<String>,
    #[serde(default)]
    pub arrival_date: Option<String>,
    #[serde(default)]
    pub arrival_time: Option<String>,
    #[serde(default)]
    pub image_url: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LodgingDetails {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub check_in: Option<String>,
    #[serde(default)]
    pub check_out: Option<String>,
    #[serde(default)]
    pub image_url: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChecklistDetails {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub items: Vec<String>,
}

/// Kind-specific description of a trip update.
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateDetails {
    Activity(ActivityDetails),
    Transportation(TransportationDetails),
    Lodging(LodgingDetails),
    Checklist(ChecklistDetails),
}

impl UpdateDetails {
    pub fn kind(&self) -> NotificationKind {
        match self {
            UpdateDetails::Activity(_) => NotificationKind::Activity,
            UpdateDetails::Transportation(_) => NotificationKind::Transportation,
            UpdateDetails::Lodging(_) => NotificationKind::Lodging,
            UpdateDetails::Checklist(_) => NotificationKind::Checklist,
        }
    }

    pub fn empty(kind: NotificationKind) -> Self {
        match kind {
            NotificationKind::Activity => UpdateDetails::Activity(ActivityDetails::default()),
            NotificationKind::Transportation => {
                UpdateDetails::Transportation(TransportationDetails::default())
            }
            NotificationKind::Lodging => UpdateDetails::Lodging(LodgingDetails::default()),
            NotificationKind::Checklist => UpdateDetails::Checklist(ChecklistDetails::default()),
        }
    }

    /// Decodes the detail fields of `kind` out of a JSON object.
    pub fn from_value(kind: NotificationKind, value: Value) -> Result<Self, serde_json::Error> {
        Ok(match kind {
            NotificationKind::Activity => UpdateDetails::Activity(serde_json::from_value(value)?),
            NotificationKind::Transportation => {
                UpdateDetails::Transportation(serde_json::from_value(value)?)
            }
            NotificationKind::Lodging => UpdateDetails::Lodging(serde_json::from_value(value)?),
            NotificationKind::Checklist => UpdateDetails::Checklist(serde_json::from_value(value)?),
        })
    }

    /// Like [`UpdateDetails::from_value`], but also rejects fields that do
    /// not belong to `kind`. Used for incoming requests; stored documents go
    /// through the lenient decode.
    pub fn from_request_value(
        kind: NotificationKind,
        value: Value,
    ) -> Result<Self, serde_json::Error> {
        let Value::Object(fields) = &value else {
            return Err(<serde_json::Error as serde::de::Error>::custom(format!(
                "{} details must be a JSON object",
                kind
            )));
        };
        let keys: Vec<String> = fields.keys().cloned().collect();

        let details = Self::from_value(kind, value)?;
        let known = details.to_value();
        if let Some(field) = keys.iter().find(|key| known.get(key.as_str()).is_none()) {
            return Err(<serde_json::Error as serde::de::Error>::custom(format!(
                "unknown field `{}` for {} details",
                field, kind
            )));
        }
        Ok(details)
    }

    pub fn to_value(&self) -> Value {
        let value = match self {
            UpdateDetails::Activity(d) => serde_json::to_value(d),
            UpdateDetails::Transportation(d) => serde_json::to_value(d),
            UpdateDetails::Lodging(d) => serde_json::to_value(d),
            UpdateDetails::Checklist(d) => serde_json::to_value(d),
        };
        // plain structs of strings always serialize
        value.unwrap_or_else(|_| Value::Object(Map::new()))
    }
}

const TRIP_NAME_FIELD: &str = "trip_name";
const TRIP_LOCATION_FIELD: &str = "trip_location";
const UPDATER_NAME_FIELD: &str = "updater_name";

/// Payload stored with a queued notification: the update details with the
/// trip display fields and the updater's name merged in.
#[derive(Debug, Clone, PartialEq)]
pub struct NotificationPayload {
    pub trip: TripInfo,
    pub updater_name: String,
    pub details: UpdateDetails,
}

impl NotificationPayload {
    pub fn kind(&self) -> NotificationKind {
        self.details.kind()
    }

    /// Flattens the payload into the JSON document persisted in the queue.
    pub fn to_document(&self) -> Value {
        let mut document = match self.details.to_value() {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        document.insert(TRIP_NAME_FIELD.to_string(), Value::String(self.trip.name.clone()));
        document.insert(
            TRIP_LOCATION_FIELD.to_string(),
            self.trip
                .location
                .clone()
                .map(Value::String)
                .unwrap_or(Value::Null),
        );
        document.insert(
            UPDATER_NAME_FIELD.to_string(),
            Value::String(self.updater_name.clone()),
        );
        Value::Object(document)
    }

    /// Rebuilds a payload from a persisted document. Never fails: fields that
    /// cannot be decoded fall back to empty values so a malformed row still
    /// renders.
    pub fn from_document(kind: NotificationKind, document: Value) -> Self {
        let mut map = match document {
            Value::Object(map) => map,
            other => {
                tracing::warn!(%kind, document = %other, "queued payload is not an object");
                Map::new()
            }
        };

        let trip_name = take_string(&mut map, TRIP_NAME_FIELD).unwrap_or_default();
        let trip_location = take_string(&mut map, TRIP_LOCATION_FIELD);
        let updater_name = take_string(&mut map, UPDATER_NAME_FIELD).unwrap_or_default();

        let details = UpdateDetails::from_value(kind, Value::Object(map)).unwrap_or_else(|e| {
            tracing::warn!(%kind, error = %e, "failed to decode queued payload details");
            UpdateDetails::empty(kind)
        });

        Self {
            trip: TripInfo {
                name: trip_name,
                location: trip_location,
            },
            updater_name,
            details,
        }
    }
}

fn take_string(map: &mut Map<String, Value>, key: &str) -> Option<String> {
    match map.remove(key) {
        Some(Value::String(s)) => Some(s),
        _ => None,
    }
}

/// The delivery unit: every pending row shares one recipient and one trip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, sqlx::FromRow)]
pub struct QueueGroup {
    pub recipient_user_id: Uuid,
    pub trip_id: Uuid,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewPendingNotification {
    pub trip_id: Uuid,
    pub recipient_user_id: Uuid,
    pub updater_user_id: Uuid,
    pub payload: NotificationPayload,
}

impl NewPendingNotification {
    pub fn new(
        trip_id: Uuid,
        recipient_user_id: Uuid,
        updater_user_id: Uuid,
        payload: NotificationPayload,
    ) -> Self {
        Self {
            trip_id,
            recipient_user_id,
            updater_user_id,
            payload,
        }
    }

    pub fn kind(&self) -> NotificationKind {
        self.payload.kind()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PendingNotification {
    pub id: i64,
    pub trip_id: Uuid,
    pub recipient_user_id: Uuid,
    pub updater_user_id: Uuid,
    pub payload: NotificationPayload,
    pub created_at: DateTime<Utc>,
}

impl PendingNotification {
    pub fn kind(&self) -> NotificationKind {
        self.payload.kind()
    }

    pub fn group(&self) -> QueueGroup {
        QueueGroup {
            recipient_user_id: self.recipient_user_id,
            trip_id: self.trip_id,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QueueStats {
    pub pending_rows: i64,
    pub groups: i64,
    pub ready_groups: i64,
    pub oldest_created_at: Option<DateTime<Utc>>,
}
