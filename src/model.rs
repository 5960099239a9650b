use crate::navigator::NavIns;
use serde::Deserialize;
use strum::{Display, EnumString};

/// Emulated device models.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Display, EnumString, Deserialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Model {
    NanoS,
    NanoSP,
    NanoX,
    Stax,
    Flex,
}

impl Model {
    /// Button driven devices with a compact screen.
    pub fn is_nano(&self) -> bool {
        matches!(self, Self::NanoS | Self::NanoSP | Self::NanoX)
    }

    /// Text of the screen on which the user approves a signature.
    ///
    /// Compact devices show "Sign" (index 0) or "Accept" (index 1), touch
    /// devices show "Hold to sign" for both.
    pub fn confirmation_text(&self, text_index: usize) -> Option<&'static str> {
        match (self.is_nano(), text_index) {
            (true, 0) => Some("Sign"),
            (true, 1) => Some("Accept"),
            (false, 0 | 1) => Some("Hold to sign"),
            _ => None,
        }
    }

    /// Instruction repeated until the confirmation screen shows up, and the
    /// instructions that approve from there.
    pub fn review_flow(&self) -> (NavIns, Vec<NavIns>) {
        match self.is_nano() {
            true => (NavIns::RightClick, vec![NavIns::BothClick]),
            // custom touch position to account for the warning approve button
            false => (
                NavIns::Touch { x: 200, y: 545 },
                vec![NavIns::ReviewConfirm, NavIns::StatusDismiss],
            ),
        }
    }

    /// Long-press position of the "Hold to sign" button.
    pub fn review_confirm_position(&self) -> Option<(u16, u16)> {
        match self {
            Self::Stax => Some((335, 606)),
            Self::Flex => Some((240, 550)),
            _ => None,
        }
    }

    /// Tap position dismissing the status screen.
    pub fn status_dismiss_position(&self) -> Option<(u16, u16)> {
        match self {
            Self::Stax => Some((200, 300)),
            Self::Flex => Some((240, 300)),
            _ => None,
        }
    }
}
