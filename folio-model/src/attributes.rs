use chrono::{DateTime, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::error::{ModelError, Result};

/// A typed custom attribute attached to a folder or media record.
///
/// Serialized as an internally tagged object, e.g.
/// `{"type": "image", "value": "gallery/cover.jpg"}`.
///
/// The `Image` variant holds a path key into the media library. Keeping
/// those references pointing at live files across renames and moves is the
/// mutation service's job; the store treats the value as an opaque string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum AttributeValue {
    Text {
        value: String,
    },
    Boolean {
        value: bool,
    },
    /// ISO-8601 calendar date (`2024-05-01`) or RFC 3339 timestamp.
    Date {
        value: String,
    },
    Number {
        value: f64,
    },
    Link {
        value: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        label: Option<String>,
    },
    Image {
        value: String,
    },
    Select {
        value: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        options: Vec<String>,
    },
    /// `#rgb`, `#rrggbb` or `#rrggbbaa`.
    Color {
        value: String,
    },
}

impl AttributeValue {
    /// The discriminant as it appears in the `type` field.
    pub fn type_name(&self) -> &'static str {
        match self {
            AttributeValue::Text { .. } => "text",
            AttributeValue::Boolean { .. } => "boolean",
            AttributeValue::Date { .. } => "date",
            AttributeValue::Number { .. } => "number",
            AttributeValue::Link { .. } => "link",
            AttributeValue::Image { .. } => "image",
            AttributeValue::Select { .. } => "select",
            AttributeValue::Color { .. } => "color",
        }
    }

    /// Referenced media path for `image` attributes.
    pub fn image_ref(&self) -> Option<&str> {
        match self {
            AttributeValue::Image { value } => Some(value),
            _ => None,
        }
    }

    pub fn validate(&self) -> Result<()> {
        match self {
            AttributeValue::Text { .. } | AttributeValue::Boolean { .. } => {
                Ok(())
            }
            AttributeValue::Date { value } => {
                let trimmed = value.trim();
                let is_date =
                    NaiveDate::parse_from_str(trimmed, "%Y-%m-%d").is_ok();
                if is_date || DateTime::parse_from_rfc3339(trimmed).is_ok() {
                    Ok(())
                } else {
                    Err(ModelError::invalid(
                        "value",
                        format!("'{value}' is not an ISO date"),
                    ))
                }
            }
            AttributeValue::Number { value } => {
                if value.is_finite() {
                    Ok(())
                } else {
                    Err(ModelError::invalid("value", "number must be finite"))
                }
            }
            AttributeValue::Link { value, .. } => {
                if value.trim().is_empty()
                    || value.chars().any(char::is_whitespace)
                {
                    Err(ModelError::invalid(
                        "value",
                        "link must be a non-empty URL without whitespace",
                    ))
                } else {
                    Ok(())
                }
            }
            AttributeValue::Image { value } => validate_media_ref(value),
            AttributeValue::Select { value, options } => {
                if value.is_empty() {
                    return Err(ModelError::invalid(
                        "value",
                        "select value cannot be empty",
                    ));
                }
                if !options.is_empty() && !options.contains(value) {
                    return Err(ModelError::invalid(
                        "value",
                        format!("'{value}' is not one of the allowed options"),
                    ));
                }
                Ok(())
            }
            AttributeValue::Color { value } => {
                if is_hex_color(value) {
                    Ok(())
                } else {
                    Err(ModelError::invalid(
                        "value",
                        format!("'{value}' is not a hex color"),
                    ))
                }
            }
        }
    }
}

/// A media reference may look absolute (`/gallery/a.jpg`) or relative
/// (`gallery/a.jpg`); either way it must stay inside the library.
pub(crate) fn validate_media_ref(value: &str) -> Result<()> {
    let trimmed = value.trim_start_matches('/');
    if trimmed.is_empty() {
        return Err(ModelError::invalid("value", "media reference is empty"));
    }
    if trimmed.split(['/', '\\']).any(|segment| segment == "..") {
        return Err(ModelError::invalid(
            "value",
            format!("media reference '{value}' escapes the library"),
        ));
    }
    Ok(())
}

fn is_hex_color(value: &str) -> bool {
    let Some(hex) = value.strip_prefix('#') else {
        return false;
    };
    matches!(hex.len(), 3 | 6 | 8)
        && hex.bytes().all(|b| b.is_ascii_hexdigit())
}
