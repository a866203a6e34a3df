use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Invalid {field} value: {value}")]
pub struct InvalidEnum {
    pub field: String,
    pub value: String,
}

/// Macro to generate enum with as_str + std::str::FromStr pattern
macro_rules! str_enum {
    ($name:ident { $($variant:ident => $s:literal),+ $(,)? }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "SCREAMING_SNAKE_CASE")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $s),+
                }
            }
        }

        impl std::str::FromStr for $name {
            type Err = InvalidEnum;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($s => Ok(Self::$variant)),+,
                    _ => Err(InvalidEnum {
                        field: stringify!($name).into(),
                        value: s.into(),
                    }),
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

str_enum!(ReportStatus {
    Generated => "GENERATED",
    Reviewed => "REVIEWED",
    Verified => "VERIFIED",
    Finalized => "FINALIZED",
});

str_enum!(Severity {
    High => "HIGH",
    Medium => "MEDIUM",
    Low => "LOW",
});

impl ReportStatus {
    /// The single forward step allowed from this status.
    pub fn next(&self) -> Option<ReportStatus> {
        match self {
            Self::Generated => Some(Self::Reviewed),
            Self::Reviewed => Some(Self::Verified),
            Self::Verified => Some(Self::Finalized),
            Self::Finalized => None,
        }
    }

    pub fn can_transition_to(&self, target: ReportStatus) -> bool {
        self.next() == Some(target)
    }

    /// Advance to `target`, rejecting skips, reversals and repeats.
    pub fn transition(self, target: ReportStatus) -> Result<ReportStatus, InvalidTransition> {
        if self.can_transition_to(target) {
            Ok(target)
        } else {
            Err(InvalidTransition { from: self, to: target })
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finalized)
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Report cannot move from {from} to {to}")]
pub struct InvalidTransition {
    pub from: ReportStatus,
    pub to: ReportStatus,
}
