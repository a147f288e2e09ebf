//! Marker visibility aggregation for the presentation layer
//!
//! Found/lost events from every binding are reduced to a single overlay status,
//! pushed one-way to subscribers through a watch channel.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tokio::sync::watch;
use tracing::debug;

use crate::binding::BindingId;

/// How lost events affect the aggregated visibility
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VisibilityPolicy {
    /// Visible from the first found event for the rest of the session
    #[default]
    Sticky,
    /// Visible while at least one marker is currently detected
    FollowMarkers,
}

/// State of the capture/tracking pipeline as seen by the user
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum TrackingStatus {
    /// Capture source still starting up
    Starting,
    /// Frames are being tracked
    Active,
    /// Tracking will not happen this session
    Unavailable { reason: String },
}

/// Everything the presentation layer needs to draw its overlay
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OverlayStatus {
    pub marker_visible: bool,
    /// Caption of the most recently found marker
    pub caption: Option<String>,
    pub tracking: TrackingStatus,
}

impl OverlayStatus {
    /// Whether the "searching for markers" overlay should be shown
    pub fn is_searching(&self) -> bool {
        !self.marker_visible && !matches!(self.tracking, TrackingStatus::Unavailable { .. })
    }
}

impl Default for OverlayStatus {
    fn default() -> Self {
        Self {
            marker_visible: false,
            caption: None,
            tracking: TrackingStatus::Starting,
        }
    }
}

pub struct VisibilityAggregator {
    policy: VisibilityPolicy,
    detected: HashSet<BindingId>,
    ever_found: bool,
    caption: Option<String>,
    tx: watch::Sender<OverlayStatus>,
}

impl VisibilityAggregator {
    pub fn new(policy: VisibilityPolicy) -> Self {
        let (tx, _) = watch::channel(OverlayStatus::default());
        Self {
            policy,
            detected: HashSet::new(),
            ever_found: false,
            caption: None,
            tx,
        }
    }

    pub fn policy(&self) -> VisibilityPolicy {
        self.policy
    }

    pub fn subscribe(&self) -> watch::Receiver<OverlayStatus> {
        self.tx.subscribe()
    }

    pub fn status(&self) -> OverlayStatus {
        self.tx.borrow().clone()
    }

    pub fn is_visible(&self) -> bool {
        match self.policy {
            VisibilityPolicy::Sticky => self.ever_found,
            VisibilityPolicy::FollowMarkers => !self.detected.is_empty(),
        }
    }

    /// A binding's marker became detected
    pub fn found(&mut self, binding: BindingId, caption: &str) {
        self.ever_found = true;
        self.detected.insert(binding);
        if !caption.is_empty() {
            self.caption = Some(caption.to_string());
        }
        self.publish();
    }

    /// A binding's marker stopped being detected
    pub fn lost(&mut self, binding: BindingId) {
        self.detected.remove(&binding);
        if !self.is_visible() {
            self.caption = None;
        }
        self.publish();
    }

    pub fn set_tracking(&mut self, tracking: TrackingStatus) {
        self.tx.send_if_modified(|status| {
            if status.tracking == tracking {
                return false;
            }
            debug!(?tracking, "Tracking status changed");
            status.tracking = tracking;
            true
        });
    }

    fn publish(&self) {
        let marker_visible = self.is_visible();
        let caption = self.caption.clone();
        self.tx.send_if_modified(|status| {
            if status.marker_visible == marker_visible && status.caption == caption {
                return false;
            }
            status.marker_visible = marker_visible;
            status.caption = caption;
            true
        });
    }
}
