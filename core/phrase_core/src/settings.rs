use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use time::{macros::format_description, Time};
use tracing::warn;

use crate::db::{get_pref, set_pref};

const KEY_RECEIVE_NOTIFICATIONS: &str = "receive_notifications";
const KEY_NOTIFICATION_TIME: &str = "notification_time";
const KEY_SELECTED_CATEGORY: &str = "selected_category";
const KEY_SELECTED_SUBCATEGORY: &str = "selected_subcategory";
const KEY_SHARE_AS_IMAGE: &str = "share_as_image";
const KEY_DARK_MODE: &str = "dark_mode";
const KEY_SELECTED_LANGUAGE: &str = "selected_language";

pub const DEFAULT_NOTIFICATION_TIME: &str = "09:00";

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Settings {
    pub receive_notifications: bool,
    /// Local wall-clock time, `HH:MM`.
    pub notification_time: String,
    pub selected_category: String,
    pub selected_subcategory: String,
    pub share_as_image: bool,
    pub dark_mode: bool,
    pub selected_language: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            receive_notifications: false,
            notification_time: DEFAULT_NOTIFICATION_TIME.to_string(),
            selected_category: String::new(),
            selected_subcategory: String::new(),
            share_as_image: false,
            dark_mode: true,
            selected_language: "en".to_string(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct SettingsUpdate {
    #[serde(default)]
    pub receive_notifications: Option<bool>,
    #[serde(default)]
    pub notification_time: Option<String>,
    #[serde(default)]
    pub selected_category: Option<String>,
    #[serde(default)]
    pub selected_subcategory: Option<String>,
    #[serde(default)]
    pub share_as_image: Option<bool>,
    #[serde(default)]
    pub dark_mode: Option<bool>,
    #[serde(default)]
    pub selected_language: Option<String>,
}

/// Parses `HH:MM` (or `H:MM`) and returns it normalized.
pub fn normalize_time_of_day(raw: &str) -> Option<String> {
    let raw = raw.trim();
    let fmt = format_description!("[hour padding:none]:[minute]");
    let t = Time::parse(raw, &fmt).ok()?;
    Some(format!("{:02}:{:02}", t.hour(), t.minute()))
}

fn parse_bool(raw: Option<String>, default: bool) -> bool {
    match raw.as_deref().map(str::trim) {
        Some("true") | Some("1") => true,
        Some("false") | Some("0") => false,
        _ => default,
    }
}

pub fn load_settings(conn: &Connection) -> rusqlite::Result<Settings> {
    let d = Settings::default();
    let notification_time = match get_pref(conn, KEY_NOTIFICATION_TIME)? {
        Some(raw) => normalize_time_of_day(&raw).unwrap_or_else(|| {
            warn!("stored notification_time '{raw}' is invalid; using {DEFAULT_NOTIFICATION_TIME}");
            d.notification_time.clone()
        }),
        None => d.notification_time.clone(),
    };

    Ok(Settings {
        receive_notifications: parse_bool(
            get_pref(conn, KEY_RECEIVE_NOTIFICATIONS)?,
            d.receive_notifications,
        ),
        notification_time,
        selected_category: get_pref(conn, KEY_SELECTED_CATEGORY)?.unwrap_or(d.selected_category),
        selected_subcategory: get_pref(conn, KEY_SELECTED_SUBCATEGORY)?
            .unwrap_or(d.selected_subcategory),
        share_as_image: parse_bool(get_pref(conn, KEY_SHARE_AS_IMAGE)?, d.share_as_image),
        dark_mode: parse_bool(get_pref(conn, KEY_DARK_MODE)?, d.dark_mode),
        selected_language: get_pref(conn, KEY_SELECTED_LANGUAGE)?.unwrap_or(d.selected_language),
    })
}

pub fn save_settings(conn: &Connection, s: &Settings) -> rusqlite::Result<()> {
    set_pref(conn, KEY_RECEIVE_NOTIFICATIONS, &s.receive_notifications.to_string())?;
    set_pref(conn, KEY_NOTIFICATION_TIME, &s.notification_time)?;
    set_pref(conn, KEY_SELECTED_CATEGORY, &s.selected_category)?;
    set_pref(conn, KEY_SELECTED_SUBCATEGORY, &s.selected_subcategory)?;
    set_pref(conn, KEY_SHARE_AS_IMAGE, &s.share_as_image.to_string())?;
    set_pref(conn, KEY_DARK_MODE, &s.dark_mode.to_string())?;
    set_pref(conn, KEY_SELECTED_LANGUAGE, &s.selected_language)?;
    Ok(())
}

/// Merges `req` into `current`. A changed category clears the subcategory unless the same
/// request sets one. Fails with the offending field name on invalid input.
pub fn apply_update(current: &Settings, req: SettingsUpdate) -> Result<Settings, &'static str> {
    let mut next = current.clone();
    if let Some(v) = req.receive_notifications {
        next.receive_notifications = v;
    }
    if let Some(raw) = req.notification_time {
        next.notification_time =
            normalize_time_of_day(&raw).ok_or("invalid_notification_time")?;
    }
    if let Some(v) = req.selected_category {
        let v = v.trim().to_string();
        if v != next.selected_category {
            next.selected_subcategory.clear();
        }
        next.selected_category = v;
    }
    if let Some(v) = req.selected_subcategory {
        next.selected_subcategory = v.trim().to_string();
    }
    if let Some(v) = req.share_as_image {
        next.share_as_image = v;
    }
    if let Some(v) = req.dark_mode {
        next.dark_mode = v;
    }
    if let Some(v) = req.selected_language {
        let v = v.trim();
        if v.is_empty() {
            return Err("invalid_selected_language");
        }
        next.selected_language = v.to_string();
    }
    Ok(next)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_conn;

    #[test]
    fn defaults_when_nothing_stored() {
        let conn = test_conn(&[]);
        assert_eq!(load_settings(&conn).unwrap(), Settings::default());
    }

    #[test]
    fn save_then_load() {
        let conn = test_conn(&[]);
        let s = Settings {
            receive_notifications: true,
            notification_time: "21:05".to_string(),
            selected_category: "Motivation".to_string(),
            selected_subcategory: "Focus".to_string(),
            share_as_image: true,
            dark_mode: false,
            selected_language: "pt".to_string(),
        };
        save_settings(&conn, &s).unwrap();
        assert_eq!(load_settings(&conn).unwrap(), s);
    }

    #[test]
    fn bad_stored_time_falls_back() {
        let conn = test_conn(&[]);
        set_pref(&conn, KEY_NOTIFICATION_TIME, "25:99").unwrap();
        assert_eq!(load_settings(&conn).unwrap().notification_time, "09:00");
    }

    #[test]
    fn time_normalization() {
        assert_eq!(normalize_time_of_day("7:30").as_deref(), Some("07:30"));
        assert_eq!(normalize_time_of_day(" 23:59 ").as_deref(), Some("23:59"));
        assert_eq!(normalize_time_of_day("24:00"), None);
        assert_eq!(normalize_time_of_day("noon"), None);
    }

    #[test]
    fn category_change_clears_subcategory() {
        let current = Settings {
            selected_category: "Motivation".to_string(),
            selected_subcategory: "Focus".to_string(),
            ..Settings::default()
        };

        let same = apply_update(
            &current,
            SettingsUpdate {
                selected_category: Some("Motivation".to_string()),
                ..SettingsUpdate::default()
            },
        )
        .unwrap();
        assert_eq!(same.selected_subcategory, "Focus");

        let changed = apply_update(
            &current,
            SettingsUpdate {
                selected_category: Some("Wisdom".to_string()),
                ..SettingsUpdate::default()
            },
        )
        .unwrap();
        assert_eq!(changed.selected_category, "Wisdom");
        assert_eq!(changed.selected_subcategory, "");

        let both = apply_update(
            &current,
            SettingsUpdate {
                selected_category: Some("Wisdom".to_string()),
                selected_subcategory: Some("Life".to_string()),
                ..SettingsUpdate::default()
            },
        )
        .unwrap();
        assert_eq!(both.selected_subcategory, "Life");
    }

    #[test]
    fn invalid_time_is_rejected() {
        let err = apply_update(
            &Settings::default(),
            SettingsUpdate {
                notification_time: Some("9pm".to_string()),
                ..SettingsUpdate::default()
            },
        )
        .unwrap_err();
        assert_eq!(err, "invalid_notification_time");
    }
}
