use serde::Serialize;
use uuid::Uuid;

pub const DIGEST_TEMPLATE: &str = "trip-update-digest";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActivitySummary {
    pub name: String,
    pub date: String,
    pub time: String,
    pub location: String,
    pub image_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransportationSummary {
    pub mode: String,
    pub origin: String,
    pub destination: String,
    pub departure: String,
    pub arrival: String,
    pub image_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LodgingSummary {
    pub name: String,
    pub address: String,
    pub check_in: String,
    pub check_out: String,
    pub image_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChecklistSummary {
    pub title: String,
    pub items: Vec<String>,
}

/// Structured body handed to the mail template.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DigestData {
    pub recipient_name: String,
    pub trip_id: Uuid,
    pub trip_name: String,
    pub trip_location: Option<String>,
    pub trip_url: String,
    pub updater_text: String,
    pub total_updates: usize,
    pub activities: Vec<ActivitySummary>,
    pub transportation: Vec<TransportationSummary>,
    pub lodging: Vec<LodgingSummary>,
    pub checklists: Vec<ChecklistSummary>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EmailMessage {
    pub to: String,
    pub subject: String,
    pub template: String,
    pub data: DigestData,
}
