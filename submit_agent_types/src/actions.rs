//! Action descriptors proposed by the decision service and the outcomes
//! recorded after executing them.
//!
//! Coordinates are normalized to a `0..=1000` grid so the decision service
//! never needs to know the real viewport size.

use crate::now_ms;

/// Size of the normalized coordinate grid.
pub const COORDINATE_SCALE: f64 = 1000.0;

/// Viewport dimensions in CSS pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Viewport {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            width: 1366,
            height: 900,
        }
    }
}

impl Viewport {
    /// Create a new viewport.
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Convert a normalized point to pixel coordinates.
    pub fn to_pixels(&self, x: f64, y: f64) -> (f64, f64) {
        (
            denormalize(x, self.width) as f64,
            denormalize(y, self.height) as f64,
        )
    }
}

/// Map a normalized coordinate onto a pixel dimension.
///
/// Inputs outside `0..=1000` (and NaN) are clamped, so the result always lies
/// within `0..=dimension`.
pub fn denormalize(normalized: f64, dimension: u32) -> u32 {
    let n = if normalized.is_finite() {
        normalized.clamp(0.0, COORDINATE_SCALE)
    } else {
        0.0
    };
    let px = (n / COORDINATE_SCALE * dimension as f64).round();
    px.clamp(0.0, dimension as f64) as u32
}

/// Map a pixel coordinate back onto the normalized grid.
pub fn normalize(pixel: u32, dimension: u32) -> f64 {
    if dimension == 0 {
        return 0.0;
    }
    pixel.min(dimension) as f64 / dimension as f64 * COORDINATE_SCALE
}

/// Kinds of browser operations the decision service may propose.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ActionKind {
    /// Click at a point.
    Click,
    /// Click a field, clear it and type text.
    TypeText,
    /// Load a URL.
    Navigate,
    /// Scroll the document.
    Scroll,
    /// Press, move through intermediate points and release.
    Drag,
    /// Sleep to let the page settle.
    Wait,
    /// History back.
    GoBack,
    /// Anything the executor does not know how to perform.
    Other(String),
}

impl ActionKind {
    /// Parse a kind from the names used by computer-use style models.
    pub fn from_name(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "click" | "click_at" => Self::Click,
            "type" | "type_text" | "type_text_at" => Self::TypeText,
            "navigate" | "open_url" | "goto" => Self::Navigate,
            "scroll" | "scroll_document" | "scroll_at" => Self::Scroll,
            "drag" | "drag_and_drop" => Self::Drag,
            "wait" | "wait_5_seconds" => Self::Wait,
            "go_back" | "back" => Self::GoBack,
            other => Self::Other(other.to_string()),
        }
    }

    /// Canonical name.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Click => "click",
            Self::TypeText => "type_text",
            Self::Navigate => "navigate",
            Self::Scroll => "scroll",
            Self::Drag => "drag",
            Self::Wait => "wait",
            Self::GoBack => "go_back",
            Self::Other(name) => name,
        }
    }
}

impl std::fmt::Display for ActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<String> for ActionKind {
    fn from(s: String) -> Self {
        Self::from_name(&s)
    }
}

impl From<ActionKind> for String {
    fn from(kind: ActionKind) -> Self {
        kind.as_str().to_string()
    }
}

/// Scroll direction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScrollDirection {
    /// Toward the top of the document.
    Up,
    /// Toward the bottom of the document.
    #[default]
    Down,
    /// Toward the left edge.
    Left,
    /// Toward the right edge.
    Right,
}

impl ScrollDirection {
    /// `(dx, dy)` for a scroll of `distance` units.
    pub fn delta(self, distance: f64) -> (f64, f64) {
        match self {
            Self::Up => (0.0, -distance),
            Self::Down => (0.0, distance),
            Self::Left => (-distance, 0.0),
            Self::Right => (distance, 0.0),
        }
    }
}

/// Risk annotation attached to a proposed action.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskAnnotation {
    /// No gating required.
    #[default]
    None,
    /// A confirmation policy must approve the action.
    #[serde(alias = "require_confirmation")]
    RequiresConfirmation,
    /// The action must never execute.
    Block,
}

impl RiskAnnotation {
    /// Whether the safety gate has to record a decision.
    pub fn is_gated(self) -> bool {
        !matches!(self, Self::None)
    }
}

/// One proposed browser operation.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ActionDescriptor {
    /// Operation kind.
    pub kind: ActionKind,
    /// Normalized x (0..=1000).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x: Option<f64>,
    /// Normalized y (0..=1000).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub y: Option<f64>,
    /// Normalized drag destination x.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dest_x: Option<f64>,
    /// Normalized drag destination y.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dest_y: Option<f64>,
    /// Text to type.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// URL to navigate to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Press Enter after typing.
    #[serde(default)]
    pub press_enter: bool,
    /// Scroll direction.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub direction: Option<ScrollDirection>,
    /// Risk annotation.
    #[serde(default)]
    pub risk: RiskAnnotation,
    /// Explanation supplied with a risk annotation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,
}

impl ActionDescriptor {
    /// Create a bare descriptor of the given kind.
    pub fn new(kind: ActionKind) -> Self {
        Self {
            kind,
            x: None,
            y: None,
            dest_x: None,
            dest_y: None,
            text: None,
            url: None,
            press_enter: false,
            direction: None,
            risk: RiskAnnotation::None,
            explanation: None,
        }
    }

    /// Click at a normalized point.
    pub fn click(x: f64, y: f64) -> Self {
        Self::new(ActionKind::Click).at(x, y)
    }

    /// Type text at a normalized point.
    pub fn type_text(x: f64, y: f64, text: impl Into<String>) -> Self {
        let mut action = Self::new(ActionKind::TypeText).at(x, y);
        action.text = Some(text.into());
        action
    }

    /// Navigate to a URL.
    pub fn navigate(url: impl Into<String>) -> Self {
        let mut action = Self::new(ActionKind::Navigate);
        action.url = Some(url.into());
        action
    }

    /// Scroll in a direction.
    pub fn scroll(direction: ScrollDirection) -> Self {
        let mut action = Self::new(ActionKind::Scroll);
        action.direction = Some(direction);
        action
    }

    /// Drag between two normalized points.
    pub fn drag(x: f64, y: f64, dest_x: f64, dest_y: f64) -> Self {
        let mut action = Self::new(ActionKind::Drag).at(x, y);
        action.dest_x = Some(dest_x);
        action.dest_y = Some(dest_y);
        action
    }

    /// Wait for the page to settle.
    pub fn wait() -> Self {
        Self::new(ActionKind::Wait)
    }

    /// Set the point.
    pub fn at(mut self, x: f64, y: f64) -> Self {
        self.x = Some(x);
        self.y = Some(y);
        self
    }

    /// Press Enter after typing.
    pub fn with_enter(mut self) -> Self {
        self.press_enter = true;
        self
    }

    /// Attach a risk annotation.
    pub fn with_risk(mut self, risk: RiskAnnotation, explanation: impl Into<String>) -> Self {
        self.risk = risk;
        self.explanation = Some(explanation.into());
        self
    }

    /// Parameters echoed back in the outcome.
    pub fn echo_params(&self) -> serde_json::Value {
        let mut value = serde_json::to_value(self).unwrap_or_default();
        if let Some(obj) = value.as_object_mut() {
            obj.remove("kind");
            obj.remove("risk");
            obj.remove("explanation");
        }
        value
    }
}

/// Status of an executed action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    /// The browser operation completed.
    Success,
    /// The browser operation failed without ending the attempt.
    Error,
    /// The executor does not support this kind.
    Unimplemented,
    /// The safety gate refused the action.
    Denied,
}

/// Result of executing one [`ActionDescriptor`].
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ActionOutcome {
    /// Kind that was attempted.
    pub kind: ActionKind,
    /// Outcome status.
    pub status: OutcomeStatus,
    /// Echoed parameters.
    #[serde(default)]
    pub params: serde_json::Value,
    /// Page URL after the action.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Error detail.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Machine readable error code.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    /// Unix epoch millis when the outcome was recorded.
    pub at_ms: u64,
}

impl ActionOutcome {
    fn base(action: &ActionDescriptor, status: OutcomeStatus) -> Self {
        Self {
            kind: action.kind.clone(),
            status,
            params: action.echo_params(),
            url: None,
            error: None,
            error_code: None,
            at_ms: now_ms(),
        }
    }

    /// Successful outcome.
    pub fn success(action: &ActionDescriptor) -> Self {
        Self::base(action, OutcomeStatus::Success)
    }

    /// Non-fatal failure.
    pub fn error(action: &ActionDescriptor, error: impl Into<String>) -> Self {
        let mut outcome = Self::base(action, OutcomeStatus::Error);
        outcome.error = Some(error.into());
        outcome
    }

    /// Kind not supported by the executor.
    pub fn unimplemented(action: &ActionDescriptor) -> Self {
        let mut outcome = Self::base(action, OutcomeStatus::Unimplemented);
        outcome.error = Some(format!("action `{}` is not implemented", action.kind));
        outcome
    }

    /// Refused by the safety gate.
    pub fn denied(
        action: &ActionDescriptor,
        code: impl Into<String>,
        error: impl Into<String>,
    ) -> Self {
        let mut outcome = Self::base(action, OutcomeStatus::Denied);
        outcome.error_code = Some(code.into());
        outcome.error = Some(error.into());
        outcome
    }

    /// Set the page URL.
    pub fn with_url(mut self, url: Option<String>) -> Self {
        self.url = url;
        self
    }

    /// Whether the action completed.
    pub fn is_success(&self) -> bool {
        self.status == OutcomeStatus::Success
    }
}
