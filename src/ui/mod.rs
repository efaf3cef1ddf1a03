//! # Operator Panel
//!
//! egui front-end for the remote control engine. It renders the latest
//! [`ControlPanel`] every frame and turns clicks into [`UserIntent`]s; it holds
//! no application state of its own apart from the queue of unacknowledged
//! alerts and the live camera frame.
//!
//! ```text
//! ┌ top ─────────────────────────────────────────┐
//! │ ⏺ Connected   sent/dropped/received  Reconnect│
//! ├ central ─────────────────────────────────────┤
//! │ stream status                                 │
//! │ [Start Camera] [Ask GPT]                      │
//! │ [Listen]       [Talk]                         │
//! │ [Volume +]     [Volume -]                     │
//! ├ bottom ──────────────────────────────────────┤
//! │ spinner + AI response                         │
//! └───────────────────────────────────────────────┘
//! ```

pub mod common;
pub mod controls;

use std::collections::VecDeque;
use std::time::Duration;

use eframe::egui::{self, Button, ColorImage, Id, Modal, TextureHandle, TextureOptions};
use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};

use crate::camera::mjpeg::{FrameFeed, MjpegReader};
use crate::camera::StreamDisplay;
use crate::engine::UserIntent;
use crate::mqtt::connection::ConnectionState;
use crate::ui_sync::{Alert, ControlPanel};

use self::common::{connection_badge, UiColors};

pub struct DoorbellUi {
    intents: mpsc::Sender<UserIntent>,
    panel: watch::Receiver<ControlPanel>,
    alerts: mpsc::UnboundedReceiver<Alert>,
    shown_alerts: VecDeque<Alert>,
    frames: MjpegReader,
    feed: Option<(String, FrameFeed)>,
    texture: Option<TextureHandle>,
}

impl DoorbellUi {
    pub fn new(
        cc: &eframe::CreationContext<'_>,
        intents: mpsc::Sender<UserIntent>,
        panel: watch::Receiver<ControlPanel>,
        alerts: mpsc::UnboundedReceiver<Alert>,
        frames: MjpegReader,
    ) -> Self {
        cc.egui_ctx.set_theme(egui::Theme::Dark);
        Self {
            intents,
            panel,
            alerts,
            shown_alerts: VecDeque::new(),
            frames,
            feed: None,
            texture: None,
        }
    }

    /// Follows the stream URL chosen by the engine and uploads new frames
    fn sync_feed(&mut self, ctx: &egui::Context, display: &StreamDisplay) {
        match display {
            StreamDisplay::Showing(url) => {
                if self.feed.as_ref().map(|(current, _)| current) != Some(url) {
                    debug!("Opening frame feed {}", url);
                    self.feed = Some((url.clone(), self.frames.open(url.clone())));
                    self.texture = None;
                }
            }
            StreamDisplay::Hidden | StreamDisplay::Blank => {
                self.feed = None;
                self.texture = None;
            }
        }

        let Some(frame) = self.feed.as_mut().and_then(|(_, feed)| feed.latest()) else {
            return;
        };
        let image = ColorImage::from_rgba_unmultiplied([frame.width, frame.height], &frame.rgba);
        if let Some(texture) = &mut self.texture {
            texture.set(image, TextureOptions::LINEAR);
        } else {
            self.texture = Some(ctx.load_texture("camera_frame", image, TextureOptions::LINEAR));
        }
    }

    fn send(&self, intent: UserIntent) {
        debug!("UI intent {:?}", intent);
        if let Err(e) = self.intents.try_send(intent) {
            warn!("Could not deliver {:?} to engine: {}", intent, e);
        }
    }

    fn render_alert(&mut self, ctx: &egui::Context) {
        let Some(alert) = self.shown_alerts.front() else {
            return;
        };

        let mut acknowledged = false;
        let modal = Modal::new(Id::new("alert_modal")).show(ctx, |ui| {
            ui.set_width(280.0);
            ui.heading(&alert.title);
            ui.label(&alert.text);
            ui.separator();
            if ui.button("OK").clicked() {
                acknowledged = true;
            }
        });

        if acknowledged || modal.should_close() {
            self.shown_alerts.pop_front();
        }
    }
}

impl eframe::App for DoorbellUi {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        ctx.request_repaint_after(Duration::from_millis(33));

        while let Ok(alert) = self.alerts.try_recv() {
            self.shown_alerts.push_back(alert);
        }
        let panel = self.panel.borrow().clone();
        self.sync_feed(ctx, &panel.display);
        let mut intents = Vec::new();

        egui::TopBottomPanel::top("status_bar")
            .frame(egui::Frame::new().fill(UiColors::MAIN_BG).inner_margin(6))
            .show(ctx, |ui| {
                ui.horizontal(|ui| {
                    connection_badge(ui, panel.connection);
                    ui.separator();
                    ui.label(format!(
                        "sent {} / dropped {} / received {}",
                        panel.stats.messages_sent,
                        panel.stats.messages_dropped,
                        panel.stats.messages_received
                    ));
                    ui.with_layout(egui::Layout::right_to_left(egui::Align::Center), |ui| {
                        let reconnect = Button::new("Reconnect");
                        if ui
                            .add_enabled(panel.connection == ConnectionState::Disconnected, reconnect)
                            .clicked()
                        {
                            intents.push(UserIntent::Reconnect);
                        }
                    });
                });
            });

        egui::TopBottomPanel::bottom("response")
            .frame(egui::Frame::new().fill(UiColors::MAIN_BG).inner_margin(6))
            .show(ctx, |ui| controls::render_response(ui, &panel));

        egui::CentralPanel::default().show(ctx, |ui| {
            controls::render_stream(ui, &panel, self.texture.as_ref());
            ui.add_space(8.0);
            intents.extend(controls::render(ui, &panel));
        });

        for intent in intents {
            self.send(intent);
        }
        self.render_alert(ctx);
    }
}
