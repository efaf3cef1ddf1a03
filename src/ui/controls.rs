use eframe::egui::{vec2, Button, Image, RichText, TextureHandle, Ui};

use super::common::{create_frame, UiColors};
use crate::camera::StreamDisplay;
use crate::engine::UserIntent;
use crate::ui_sync::ControlPanel;

const BUTTON_HEIGHT: f32 = 36.0;

const MAX_VIDEO_HEIGHT: f32 = 360.0;

/// Renders the control grid and returns the intents clicked this frame
pub fn render(ui: &mut Ui, panel: &ControlPanel) -> Vec<UserIntent> {
    let mut intents = Vec::new();
    let width = (ui.available_width() - 24.0) / 2.0;
    let size = vec2(width, BUTTON_HEIGHT);

    let mut button = |ui: &mut Ui, enabled: bool, label: &str, intent: UserIntent| {
        if ui
            .add_enabled(enabled, Button::new(label).min_size(size))
            .clicked()
        {
            intents.push(intent);
        }
    };

    create_frame(UiColors::INNER_BG, UiColors::BORDER).show(ui, |ui| {
        ui.horizontal(|ui| {
            button(
                ui,
                panel.camera_enabled,
                panel.camera.label(),
                UserIntent::ToggleCamera,
            );
            button(ui, panel.ask_enabled, "Ask GPT", UserIntent::AskAi);
        });
        ui.horizontal(|ui| {
            button(
                ui,
                panel.listen_enabled,
                panel.listen.label(),
                UserIntent::ToggleListen,
            );
            button(
                ui,
                panel.talk_enabled,
                panel.talk.label(),
                UserIntent::ToggleTalk,
            );
        });
        ui.horizontal(|ui| {
            button(ui, panel.volume_enabled, "Volume +", UserIntent::VolumeUp);
            button(ui, panel.volume_enabled, "Volume -", UserIntent::VolumeDown);
        });
    });

    if let Some(reason) = &panel.capture_unavailable {
        ui.small(format!("Talk disabled: {}", reason));
    }

    intents
}

pub fn render_stream(ui: &mut Ui, panel: &ControlPanel, frame: Option<&TextureHandle>) {
    create_frame(UiColors::EXTREME_BG, UiColors::BORDER).show(ui, |ui| {
        ui.set_min_width(ui.available_width());
        match &panel.display {
            StreamDisplay::Hidden => {
                ui.label(RichText::new("Camera off").weak());
            }
            StreamDisplay::Showing(url) => {
                match frame {
                    Some(texture) => {
                        ui.add(
                            Image::new(texture)
                                .max_width(ui.available_width())
                                .max_height(MAX_VIDEO_HEIGHT),
                        );
                    }
                    None => {
                        ui.label(RichText::new("Waiting for video").weak());
                    }
                }
                ui.horizontal(|ui| {
                    ui.colored_label(UiColors::ACTIVE, "Live");
                    ui.hyperlink_to(url.as_str(), url);
                });
            }
            StreamDisplay::Blank => {
                ui.colored_label(UiColors::INACTIVE, "No video");
            }
        }
    });
}

pub fn render_response(ui: &mut Ui, panel: &ControlPanel) {
    create_frame(UiColors::EXTREME_BG, UiColors::BORDER).show(ui, |ui| {
        ui.set_min_width(ui.available_width());
        ui.horizontal_wrapped(|ui| {
            if panel.busy {
                ui.spinner();
            }
            match &panel.response {
                Some(text) => ui.label(text),
                None if panel.ai_pending => {
                    ui.label(RichText::new("Description requested").weak())
                }
                None => ui.label(RichText::new("No description yet").weak()),
            };
        });
    });
}
