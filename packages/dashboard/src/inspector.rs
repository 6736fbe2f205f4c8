use crate::models::{Notification, WebhookEvent};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

/// Fields of a webhook event that can be copied from the detail panel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InspectorField {
    Id,
    Endpoint,
    Payload,
    Headers,
    ResponseBody,
    ErrorMessage,
}

impl InspectorField {
    fn label(&self) -> &'static str {
        match self {
            InspectorField::Id => "ID",
            InspectorField::Endpoint => "Endpoint",
            InspectorField::Payload => "Payload",
            InspectorField::Headers => "Headers",
            InspectorField::ResponseBody => "Response body",
            InspectorField::ErrorMessage => "Error message",
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("Clipboard unavailable: {0}")]
pub struct ClipboardError(pub String);

/// Destination for copied text
#[cfg_attr(test, mockall::automock)]
pub trait Clipboard: Send + Sync {
    fn set_text(&self, text: String) -> Result<(), ClipboardError>;
}

/// Clipboard of the machine the dashboard runs on
pub struct SystemClipboard;

impl Clipboard for SystemClipboard {
    fn set_text(&self, text: String) -> Result<(), ClipboardError> {
        let mut clipboard =
            arboard::Clipboard::new().map_err(|e| ClipboardError(e.to_string()))?;
        clipboard
            .set_text(text)
            .map_err(|e| ClipboardError(e.to_string()))
    }
}

/// Detail panel for one webhook event.
///
/// Holds a copy taken at selection time; later polls do not change it.
#[derive(Debug, Clone, Default)]
pub struct Inspector {
    selected: Option<WebhookEvent>,
}

impl Inspector {
    pub fn select(&mut self, event: &WebhookEvent) {
        debug!(event_id = %event.id, "Inspector opened");
        self.selected = Some(event.clone());
    }

    pub fn close(&mut self) {
        self.selected = None;
    }

    pub fn selected(&self) -> Option<&WebhookEvent> {
        self.selected.as_ref()
    }

    /// Text `copy` would place on the clipboard for `field`
    pub fn text(&self, field: InspectorField) -> Option<String> {
        self.selected.as_ref().and_then(|event| field_text(event, field))
    }

    /// Copy one field of the selected event. Never fails: the outcome is
    /// reported as a notification.
    pub fn copy(&self, field: InspectorField, clipboard: &dyn Clipboard) -> Notification {
        let Some(event) = &self.selected else {
            return Notification::error("No webhook event selected");
        };
        let Some(text) = field_text(event, field) else {
            return Notification::error(format!("{} is empty", field.label()));
        };

        match clipboard.set_text(text) {
            Ok(()) => Notification::success(format!("{} copied to clipboard", field.label())),
            Err(err) => {
                warn!(event_id = %event.id, error = %err, "Copy to clipboard failed");
                Notification::error(format!("Failed to copy {}", field.label().to_lowercase()))
            }
        }
    }
}

fn field_text(event: &WebhookEvent, field: InspectorField) -> Option<String> {
    match field {
        InspectorField::Id => Some(event.id.clone()),
        InspectorField::Endpoint => Some(event.endpoint.clone()),
        InspectorField::Payload => render(&event.payload),
        InspectorField::Headers => render(&event.headers),
        InspectorField::ResponseBody => event.response_body.as_ref().and_then(render),
        InspectorField::ErrorMessage => event.error_message.clone(),
    }
}

/// Strings verbatim, structured values pretty-printed
fn render(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => serde_json::to_string_pretty(other).ok(),
    }
}
