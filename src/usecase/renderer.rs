use thiserror::Error;

use crate::domain::email::{
    ActivitySummary, ChecklistSummary, DIGEST_TEMPLATE, DigestData, EmailMessage, LodgingSummary,
    TransportationSummary,
};
use crate::domain::notification::{
    ActivityDetails, ChecklistDetails, LodgingDetails, PendingNotification, TransportationDetails,
    UpdateDetails,
};
use crate::domain::recipient::Recipient;

const TBD: &str = "TBD";
const UNNAMED_TRIP: &str = "your trip";
const UNKNOWN_UPDATER: &str = "A trip member";

#[derive(Debug, Error, PartialEq)]
pub enum RenderError {
    #[error("cannot render an empty batch")]
    EmptyBatch,
}

#[derive(Debug, Clone)]
pub struct RenderOptions {
    pub app_base_url: String,
}

/// Builds the digest email for one (recipient, trip) group. `rows` must be in
/// arrival order.
pub fn render_batch(
    recipient: &Recipient,
    rows: &[PendingNotification],
    options: &RenderOptions,
) -> Result<EmailMessage, RenderError> {
    let first = rows.first().ok_or(RenderError::EmptyBatch)?;

    let mut activities = Vec::new();
    let mut transportation = Vec::new();
    let mut lodging = Vec::new();
    let mut checklists = Vec::new();

    for row in rows {
        match &row.payload.details {
            UpdateDetails::Activity(d) => activities.push(summarize_activity(d)),
            UpdateDetails::Transportation(d) => transportation.push(summarize_transportation(d)),
            UpdateDetails::Lodging(d) => lodging.push(summarize_lodging(d)),
            UpdateDetails::Checklist(d) => checklists.push(summarize_checklist(d)),
        }
    }

    // the latest row carries the freshest trip display fields
    let trip = rows
        .iter()
        .rev()
        .map(|row| &row.payload.trip)
        .find(|trip| !trip.name.trim().is_empty())
        .unwrap_or(&first.payload.trip);
    let trip_name = non_empty(&trip.name).unwrap_or_else(|| UNNAMED_TRIP.to_string());

    let updaters = distinct_updaters(rows);
    let updater_text = join_names(&updaters);

    let subject = if rows.len() == 1 {
        format!(
            "{} added {} to {}",
            updater_text,
            first.kind().describe(),
            trip_name
        )
    } else {
        format!("{} new updates to {}", rows.len(), trip_name)
    };

    let trip_id = first.trip_id;
    let data = DigestData {
        recipient_name: recipient.display_name(),
        trip_id,
        trip_name,
        trip_location: trip.location.as_deref().and_then(non_empty),
        trip_url: format!(
            "{}/trips/{}",
            options.app_base_url.trim_end_matches('/'),
            trip_id
        ),
        updater_text,
        total_updates: rows.len(),
        activities,
        transportation,
        lodging,
        checklists,
    };

    Ok(EmailMessage {
        to: recipient.email.clone(),
        subject,
        template: DIGEST_TEMPLATE.to_string(),
        data,
    })
}

/// Distinct updater names in order of first appearance.
fn distinct_updaters(rows: &[PendingNotification]) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for row in rows {
        let name = non_empty(&row.payload.updater_name).unwrap_or_else(|| UNKNOWN_UPDATER.to_string());
        if !names.contains(&name) {
            names.push(name);
        }
    }
    names
}

/// "A", "A and B", "A, B and C".
pub fn join_names(names: &[String]) -> String {
    match names {
        [] => String::new(),
        [only] => only.clone(),
        [init @ .., last] => format!("{} and {}", init.join(", "), last),
    }
}

fn non_empty(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn field(value: &Option<String>, fallback: &str) -> String {
    value
        .as_deref()
        .and_then(non_empty)
        .unwrap_or_else(|| fallback.to_string())
}

fn date_time(date: &Option<String>, time: &Option<String>) -> String {
    match (
        date.as_deref().and_then(non_empty),
        time.as_deref().and_then(non_empty),
    ) {
        (Some(date), Some(time)) => format!("{} {}", date, time),
        (Some(date), None) => date,
        (None, Some(time)) => time,
        (None, None) => TBD.to_string(),
    }
}

fn summarize_activity(details: &ActivityDetails) -> ActivitySummary {
    let time = match (
        details.start_time.as_deref().and_then(non_empty),
        details.end_time.as_deref().and_then(non_empty),
    ) {
        (Some(start), Some(end)) => format!("{} - {}", start, end),
        (Some(start), None) => start,
        (None, Some(end)) => format!("until {}", end),
        (None, None) => TBD.to_string(),
    };

    ActivitySummary {
        name: field(&details.name, "Untitled activity"),
        date: field(&details.date, TBD),
        time,
        location: field(&details.location, TBD),
        image_url: details.image_url.as_deref().and_then(non_empty),
    }
}

fn summarize_transportation(details: &TransportationDetails) -> TransportationSummary {
    TransportationSummary {
        mode: field(&details.mode, "Transportation"),
        origin: field(&details.origin, TBD),
        destination: field(&details.destination, TBD),
        departure: date_time(&details.departure_date, &details.departure_time),
        arrival: date_time(&details.arrival_date, &details.arrival_time),
        image_url: details.image_url.as_deref().and_then(non_empty),
    }
}

fn summarize_lodging(details: &LodgingDetails) -> LodgingSummary {
    LodgingSummary {
        name: field(&details.name, "Untitled lodging"),
        address: field(&details.address, TBD),
        check_in: field(&details.check_in, TBD),
        check_out: field(&details.check_out, TBD),
        image_url: details.image_url.as_deref().and_then(non_empty),
    }
}

fn summarize_checklist(details: &ChecklistDetails) -> ChecklistSummary {
    ChecklistSummary {
        title: field(&details.title, "Untitled checklist"),
        items: details
            .items
            .iter()
            .filter_map(|item| non_empty(item))
            .collect(),
    }
}
