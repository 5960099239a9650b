//! Scripted device navigation.

use crate::error::{Result, SigningError};
use log::{debug, info};
use std::path::{Path, PathBuf};

/// Upper bound on steps taken while looking for a screen.
pub const MAX_NAVIGATION_STEPS: usize = 32;

/// A single user interaction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NavIns {
    LeftClick,
    RightClick,
    BothClick,
    Touch { x: u16, y: u16 },
    /// Approve the review ("Hold to sign" on touch devices)
    ReviewConfirm,
    /// Leave the status screen shown after a review
    StatusDismiss,
}

/// What the user is expected to see and approve during a signature.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Review {
    pub text: String,
    /// Name of the snapshot directory recorded for this review
    pub snapshot: Option<PathBuf>,
}

impl Review {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            snapshot: None,
        }
    }

    pub fn with_snapshot(mut self, snapshot: impl Into<PathBuf>) -> Self {
        self.snapshot = Some(snapshot.into());
        self
    }
}

pub trait Navigator {
    /// Execute one instruction.
    fn perform(&mut self, ins: NavIns) -> Result<()>;

    /// Text shown on the current screen.
    fn screen_text(&mut self) -> Result<Vec<String>>;

    /// Block until the screen shows something new.
    fn wait_for_screen_change(&mut self) -> Result<()> {
        Ok(())
    }

    /// Record the current screen as step `index` of `snapshot`.
    fn capture(&mut self, _snapshot: &Path, _index: usize) -> Result<()> {
        Ok(())
    }

    /// Repeat `step` until `text` is on screen, then run `validation`.
    fn navigate_until_text(
        &mut self,
        step: NavIns,
        validation: &[NavIns],
        text: &str,
        snapshot: Option<&Path>,
    ) -> Result<()> {
        self.wait_for_screen_change()?;

        let mut index = 0;
        let record = |nav: &mut Self, index: &mut usize| -> Result<()> {
            if let Some(snapshot) = snapshot {
                nav.capture(snapshot, *index)?;
            }
            *index += 1;
            Ok(())
        };

        for steps in 0..MAX_NAVIGATION_STEPS {
            record(self, &mut index)?;

            let screen = self.screen_text()?.join(" ");
            if screen.contains(text) {
                info!("Found '{}' after {} steps", text, steps);

                for ins in validation {
                    self.perform(*ins)?;
                    record(self, &mut index)?;
                }
                return Ok(());
            }

            debug!("Screen '{}' does not show '{}'", screen, text);
            self.perform(step)?;
        }

        Err(SigningError::TextNotFound {
            text: text.to_string(),
            steps: MAX_NAVIGATION_STEPS,
        })
    }
}

impl<N: Navigator + ?Sized> Navigator for &mut N {
    fn perform(&mut self, ins: NavIns) -> Result<()> {
        (**self).perform(ins)
    }

    fn screen_text(&mut self) -> Result<Vec<String>> {
        (**self).screen_text()
    }

    fn wait_for_screen_change(&mut self) -> Result<()> {
        (**self).wait_for_screen_change()
    }

    fn capture(&mut self, snapshot: &Path, index: usize) -> Result<()> {
        (**self).capture(snapshot, index)
    }
}
