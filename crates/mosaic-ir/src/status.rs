use serde::{Deserialize, Serialize};
use std::fmt;

/// Quality flags of an analysis result.
///
/// The three flags are independent and only ever degrade: combining two
/// statuses with [`AlgorithmStatus::update`] keeps a flag set only when both
/// sides have it set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AlgorithmStatus {
    pub property_checked: bool,
    pub sound: bool,
    pub precise: bool,
}

impl AlgorithmStatus {
    pub const SOUND_AND_PRECISE: Self = Self {
        property_checked: true,
        sound: true,
        precise: true,
    };

    pub const UNSOUND_AND_PRECISE: Self = Self {
        property_checked: true,
        sound: false,
        precise: true,
    };

    pub const SOUND_AND_IMPRECISE: Self = Self {
        property_checked: true,
        sound: true,
        precise: false,
    };

    pub const NO_PROPERTY_CHECKED: Self = Self {
        property_checked: false,
        sound: true,
        precise: true,
    };

    pub const fn new(property_checked: bool, sound: bool, precise: bool) -> Self {
        Self {
            property_checked,
            sound,
            precise,
        }
    }

    /// Pointwise conjunction of both statuses.
    #[must_use]
    pub fn update(self, other: Self) -> Self {
        Self {
            property_checked: self.property_checked && other.property_checked,
            sound: self.sound && other.sound,
            precise: self.precise && other.precise,
        }
    }

    #[must_use]
    pub fn with_sound(self, sound: bool) -> Self {
        Self {
            sound: self.sound && sound,
            ..self
        }
    }

    #[must_use]
    pub fn with_precise(self, precise: bool) -> Self {
        Self {
            precise: self.precise && precise,
            ..self
        }
    }

    /// A SAFE claim can only be made from a checked and sound result.
    pub fn supports_proof(&self) -> bool {
        self.property_checked && self.sound
    }
}

impl Default for AlgorithmStatus {
    fn default() -> Self {
        Self::SOUND_AND_PRECISE
    }
}

impl fmt::Display for AlgorithmStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}, {}, {}",
            if self.property_checked {
                "checked"
            } else {
                "unchecked"
            },
            if self.sound { "sound" } else { "unsound" },
            if self.precise { "precise" } else { "imprecise" }
        )
    }
}
