// Presence handling for chatsync
// Maps raw status strings from the directory into Presence and UI badge variants

use log::debug;

use crate::models::Presence;

/// Badge colour class shown on a contact avatar
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BadgeVariant {
    Success,
    Error,
    Warning,
    Secondary,
}

impl BadgeVariant {
    pub fn as_str(&self) -> &'static str {
        match self {
            BadgeVariant::Success => "success",
            BadgeVariant::Error => "error",
            BadgeVariant::Warning => "warning",
            BadgeVariant::Secondary => "secondary",
        }
    }
}

impl Presence {
    pub fn as_str(&self) -> &'static str {
        match self {
            Presence::Online => "online",
            Presence::Busy => "busy",
            Presence::Away => "away",
            Presence::Offline => "offline",
        }
    }

    pub fn badge_variant(&self) -> BadgeVariant {
        match self {
            Presence::Online => BadgeVariant::Success,
            Presence::Busy => BadgeVariant::Error,
            Presence::Away => BadgeVariant::Warning,
            Presence::Offline => BadgeVariant::Secondary,
        }
    }
}

/// Parse a directory status string. Unknown or missing values mean offline.
pub fn parse_status(raw: Option<&str>) -> Presence {
    let raw = match raw {
        Some(raw) => raw.trim().to_ascii_lowercase(),
        None => return Presence::Offline,
    };
    match raw.as_str() {
        "online" => Presence::Online,
        "busy" | "dnd" => Presence::Busy,
        "away" | "xa" => Presence::Away,
        "offline" | "" => Presence::Offline,
        other => {
            debug!("Unknown presence status '{}', treating as offline", other);
            Presence::Offline
        }
    }
}
