//! Presentation layer: turns overlay status updates into user-facing messages

use anchorview_core::{OverlayStatus, TrackingStatus};
use tokio::sync::watch;
use tracing::{info, warn};

pub fn overlay_message(status: &OverlayStatus) -> String {
    if let TrackingStatus::Unavailable { reason } = &status.tracking {
        if !status.marker_visible {
            return format!("Tracking unavailable: {reason}");
        }
    }
    if status.marker_visible {
        match &status.caption {
            Some(caption) => format!("Marker found: {caption}"),
            None => "Marker found".to_string(),
        }
    } else {
        "Searching for markers...".to_string()
    }
}

/// Log every overlay transition until the session drops its sender
pub async fn run_overlay(mut status: watch::Receiver<OverlayStatus>) {
    let mut last = String::new();
    loop {
        let message = overlay_message(&status.borrow_and_update());
        if message != last {
            if matches!(status.borrow().tracking, TrackingStatus::Unavailable { .. }) {
                warn!(overlay = %message, "Overlay updated");
            } else {
                info!(overlay = %message, "Overlay updated");
            }
            last = message;
        }
        if status.changed().await.is_err() {
            break;
        }
    }
}
