use std::time::Duration;

use posthog_rs::Event;
use tracing::warn;

const CAPTURE_TIMEOUT: Duration = Duration::from_secs(5);

fn capture_async(event: Event) {
    tokio::spawn(async move {
        match tokio::time::timeout(CAPTURE_TIMEOUT, posthog_rs::capture(event)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("Failed to capture analytics event: {e}"),
            Err(_) => warn!("Analytics event capture timed out"),
        }
    });
}

pub fn track_payment_initiated(kind: &str, has_course: bool) {
    let mut event = Event::new_anon("payment_initiated");
    event.insert_prop("kind", kind).ok();
    event.insert_prop("has_course", has_course).ok();
    capture_async(event);
}

pub fn track_payment_initiation_failed(error_kind: &str) {
    let mut event = Event::new_anon("payment_initiation_failed");
    event.insert_prop("error_kind", error_kind).ok();
    capture_async(event);
}

pub fn track_payment_verified(status: &str, enrolled: bool, credited: bool) {
    let mut event = Event::new_anon("payment_verified");
    event.insert_prop("status", status).ok();
    event.insert_prop("enrolled", enrolled).ok();
    event.insert_prop("credited", credited).ok();
    capture_async(event);
}

pub fn track_payment_verification_failed(error_kind: &str) {
    let mut event = Event::new_anon("payment_verification_failed");
    event.insert_prop("error_kind", error_kind).ok();
    capture_async(event);
}

pub fn track_payout_marked_paid(has_payout_tx_ref: bool) {
    let mut event = Event::new_anon("payout_marked_paid");
    event.insert_prop("has_payout_tx_ref", has_payout_tx_ref).ok();
    capture_async(event);
}
