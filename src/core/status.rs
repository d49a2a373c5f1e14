// Status line, output pane text, and the Website Actions indicator shown by the inspector.
use serde::Serialize;

pub const STATUS_READY: &str = "Ready";
pub const STATUS_INTERCEPTING: &str = "Intercepting LinkedIn request...";
pub const STATUS_NO_BODY: &str = "Request intercepted (no body)";
pub const STATUS_DECODE_FAILED: &str = "Error decoding request data";

pub const OUTPUT_PLACEHOLDER: &str =
    "Select a request from the sidebar to view its decoded content here.";
pub const OUTPUT_NO_BODY: &str = "LinkedIn request intercepted but no body found.";

pub fn captured_status(id: u64, timestamp: &str) -> String {
    format!("Captured Request #{id} at {timestamp}")
}

pub fn showing_status(id: u64, timestamp: &str) -> String {
    format!("Showing Request #{id} from {timestamp}")
}

/// Whether the partner's Website Actions feature appears to be emitting payloads.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WebsiteActions {
    #[default]
    Unknown,
    Enabled,
    Disabled,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct StatusView {
    pub status: String,
    pub output: String,
    pub website_actions: WebsiteActions,
    pub active: Option<u64>,
    pub count: usize,
}
