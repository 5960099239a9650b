//! Navigation through the emulator HTTP API.

use crate::error::Result;
use crate::model::Model;
use crate::navigator::{NavIns, Navigator};
use log::{debug, warn};
use reqwest::blocking::Client;
use serde::Deserialize;
use serde_json::json;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

/// Hold duration for the "Hold to sign" button.
const HOLD_DURATION: Duration = Duration::from_millis(1500);
/// Pause after each instruction for the emulator to redraw.
const SETTLE_DURATION: Duration = Duration::from_millis(100);

#[derive(Debug, Deserialize)]
struct Events {
    #[serde(default)]
    events: Vec<Event>,
}

#[derive(Debug, Deserialize)]
struct Event {
    text: String,
}

pub struct SpeculosNavigator {
    client: Client,
    base_url: String,
    model: Model,
    /// Screenshots are written under this directory when set
    snapshot_dir: Option<PathBuf>,
    timeout: Duration,
    last_screen: Vec<String>,
}

impl SpeculosNavigator {
    pub fn new(base_url: impl Into<String>, model: Model, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            base_url: base_url.into(),
            model,
            snapshot_dir: None,
            timeout,
            last_screen: vec![],
        })
    }

    pub fn with_snapshot_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.snapshot_dir = Some(dir.into());
        self
    }

    fn button(&self, button: &str) -> Result<()> {
        self.client
            .post(format!("{}/button/{}", self.base_url, button))
            .json(&json!({ "action": "press-and-release" }))
            .send()?
            .error_for_status()?;
        Ok(())
    }

    fn finger(&self, (x, y): (u16, u16), hold: Option<Duration>) -> Result<()> {
        let mut body = json!({ "action": "press-and-release", "x": x, "y": y });
        if let Some(hold) = hold {
            body["delay"] = json!(hold.as_secs_f32());
        }

        self.client
            .post(format!("{}/finger", self.base_url))
            .json(&body)
            .send()?
            .error_for_status()?;
        Ok(())
    }
}

impl Navigator for SpeculosNavigator {
    fn perform(&mut self, ins: NavIns) -> Result<()> {
        debug!("UI: {:?}", ins);

        match (ins, self.model.is_nano()) {
            (NavIns::LeftClick, _) => self.button("left")?,
            (NavIns::RightClick, _) => self.button("right")?,
            (NavIns::BothClick, _) | (NavIns::ReviewConfirm, true) => self.button("both")?,
            (NavIns::Touch { x, y }, _) => self.finger((x, y), None)?,
            (NavIns::ReviewConfirm, false) => {
                if let Some(position) = self.model.review_confirm_position() {
                    self.finger(position, Some(HOLD_DURATION))?;
                }
            }
            (NavIns::StatusDismiss, true) => {}
            (NavIns::StatusDismiss, false) => {
                if let Some(position) = self.model.status_dismiss_position() {
                    self.finger(position, None)?;
                }
            }
        }

        self.last_screen = self.screen_text()?;
        thread::sleep(SETTLE_DURATION);
        Ok(())
    }

    fn screen_text(&mut self) -> Result<Vec<String>> {
        let events: Events = self
            .client
            .get(format!("{}/events", self.base_url))
            .query(&[("currentscreenonly", "true")])
            .send()?
            .error_for_status()?
            .json()?;

        Ok(events.events.into_iter().map(|e| e.text).collect())
    }

    fn wait_for_screen_change(&mut self) -> Result<()> {
        let start = Instant::now();

        while start.elapsed() < self.timeout {
            let screen = self.screen_text()?;
            if !screen.is_empty() && screen != self.last_screen {
                self.last_screen = screen;
                return Ok(());
            }
            thread::sleep(SETTLE_DURATION);
        }

        warn!("Screen did not change within {:?}", self.timeout);
        Ok(())
    }

    fn capture(&mut self, snapshot: &Path, index: usize) -> Result<()> {
        let Some(dir) = &self.snapshot_dir else {
            return Ok(());
        };

        let png = self
            .client
            .get(format!("{}/screenshot", self.base_url))
            .send()?
            .error_for_status()?
            .bytes()?;

        let path = snapshot_path(dir, self.model, snapshot, index);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, &png)?;
        Ok(())
    }
}

/// `{dir}/{model}/{snapshot}/{index:05}.png`
pub fn snapshot_path(dir: &Path, model: Model, snapshot: &Path, index: usize) -> PathBuf {
    dir.join(model.to_string())
        .join(snapshot)
        .join(format!("{index:05}.png"))
}
