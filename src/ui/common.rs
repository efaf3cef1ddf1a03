use eframe::egui::{self, Color32, Frame, Stroke};

use crate::mqtt::connection::ConnectionState;

/// Dark theme palette shared by all panels
pub struct UiColors;

impl UiColors {
    pub const MAIN_BG: Color32 = Color32::from_rgb(30, 30, 30);

    pub const INNER_BG: Color32 = Color32::from_rgb(25, 25, 25);

    pub const EXTREME_BG: Color32 = Color32::from_rgb(20, 20, 20);

    pub const BORDER: Color32 = Color32::from_rgb(60, 60, 60);

    /// Connected / live
    pub const ACTIVE: Color32 = Color32::from_rgb(50, 200, 20);

    pub const PENDING: Color32 = Color32::from_rgb(220, 170, 30);

    /// Disconnected / failed
    pub const INACTIVE: Color32 = Color32::from_rgb(200, 50, 20);
}

pub fn create_frame(bg_color: Color32, border_color: Color32) -> Frame {
    Frame::new()
        .stroke(Stroke::new(1.0, border_color))
        .fill(bg_color)
        .inner_margin(4)
        .outer_margin(2)
}

/// Colored dot plus label for the broker connection
pub fn connection_badge(ui: &mut egui::Ui, state: ConnectionState) {
    let (color, text) = match state {
        ConnectionState::Connected => (UiColors::ACTIVE, "Connected"),
        ConnectionState::Connecting => (UiColors::PENDING, "Connecting"),
        ConnectionState::Disconnected => (UiColors::INACTIVE, "Disconnected"),
    };
    ui.colored_label(color, "⏺");
    ui.label(text);
}
