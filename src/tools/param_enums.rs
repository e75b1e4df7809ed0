use schemars::JsonSchema;
use serde::de;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum OnConflict {
    #[default]
    Overwrite,
    Skip,
    Rename,
}

impl OnConflict {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Overwrite => "overwrite",
            Self::Skip => "skip",
            Self::Rename => "rename",
        }
    }
}

impl fmt::Display for OnConflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for OnConflict {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: de::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        match s.to_ascii_lowercase().as_str() {
            "overwrite" => Ok(Self::Overwrite),
            "skip" => Ok(Self::Skip),
            "rename" => Ok(Self::Rename),
            other => Err(de::Error::unknown_variant(
                other,
                &["overwrite", "skip", "rename"],
            )),
        }
    }
}

/// Backend the caller asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum PatchBackend {
    #[default]
    Auto,
    Host,
    InProcess,
}

impl PatchBackend {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Host => "host",
            Self::InProcess => "in_process",
        }
    }
}

impl fmt::Display for PatchBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for PatchBackend {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: de::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "auto" => Ok(Self::Auto),
            "host" => Ok(Self::Host),
            "in_process" | "inprocess" => Ok(Self::InProcess),
            other => Err(de::Error::unknown_variant(
                other,
                &["auto", "host", "in_process"],
            )),
        }
    }
}

/// Backend that actually executed a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum PatchEngine {
    Host,
    InProcess,
}

impl PatchEngine {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Host => "host",
            Self::InProcess => "in_process",
        }
    }
}

impl fmt::Display for PatchEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, JsonSchema)]
pub enum HorizontalAlign {
    #[serde(rename = "general")]
    General,
    #[serde(rename = "left")]
    Left,
    #[serde(rename = "center")]
    Center,
    #[serde(rename = "right")]
    Right,
    #[serde(rename = "fill")]
    Fill,
    #[serde(rename = "justify")]
    Justify,
    #[serde(rename = "centerContinuous")]
    CenterContinuous,
    #[serde(rename = "distributed")]
    Distributed,
}

impl HorizontalAlign {
    pub const VARIANTS: &'static [&'static str] = &[
        "general",
        "left",
        "center",
        "right",
        "fill",
        "justify",
        "centerContinuous",
        "distributed",
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::General => "general",
            Self::Left => "left",
            Self::Center => "center",
            Self::Right => "right",
            Self::Fill => "fill",
            Self::Justify => "justify",
            Self::CenterContinuous => "centerContinuous",
            Self::Distributed => "distributed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().replace(['_', '-'], "").as_str() {
            "general" => Some(Self::General),
            "left" => Some(Self::Left),
            "center" => Some(Self::Center),
            "right" => Some(Self::Right),
            "fill" => Some(Self::Fill),
            "justify" => Some(Self::Justify),
            "centercontinuous" => Some(Self::CenterContinuous),
            "distributed" => Some(Self::Distributed),
            _ => None,
        }
    }

    /// Constant used by the host automation surface.
    pub fn host_code(self) -> i32 {
        match self {
            Self::General => -4105,
            Self::Left => -4131,
            Self::Center => -4108,
            Self::Right => -4152,
            Self::Fill => 5,
            Self::Justify => -4130,
            Self::CenterContinuous => 7,
            Self::Distributed => -4117,
        }
    }
}

impl fmt::Display for HorizontalAlign {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for HorizontalAlign {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: de::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).ok_or_else(|| de::Error::unknown_variant(&s, Self::VARIANTS))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum VerticalAlign {
    Top,
    Center,
    Bottom,
    Justify,
    Distributed,
}

impl VerticalAlign {
    pub const VARIANTS: &'static [&'static str] =
        &["top", "center", "bottom", "justify", "distributed"];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Top => "top",
            Self::Center => "center",
            Self::Bottom => "bottom",
            Self::Justify => "justify",
            Self::Distributed => "distributed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "top" => Some(Self::Top),
            "center" => Some(Self::Center),
            "bottom" => Some(Self::Bottom),
            "justify" => Some(Self::Justify),
            "distributed" => Some(Self::Distributed),
            _ => None,
        }
    }

    pub fn host_code(self) -> i32 {
        match self {
            Self::Top => -4160,
            Self::Center => -4108,
            Self::Bottom => -4107,
            Self::Justify => -4130,
            Self::Distributed => -4117,
        }
    }
}

impl fmt::Display for VerticalAlign {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for VerticalAlign {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: de::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).ok_or_else(|| de::Error::unknown_variant(&s, Self::VARIANTS))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enums_deserialize_case_insensitively() {
        let backend: PatchBackend = serde_json::from_str("\"In-Process\"").unwrap();
        assert_eq!(backend, PatchBackend::InProcess);
        let conflict: OnConflict = serde_json::from_str("\"RENAME\"").unwrap();
        assert_eq!(conflict, OnConflict::Rename);
        let align: HorizontalAlign = serde_json::from_str("\"center_continuous\"").unwrap();
        assert_eq!(align.as_str(), "centerContinuous");
    }

    #[test]
    fn unknown_variant_lists_expected_values() {
        let err = serde_json::from_str::<VerticalAlign>("\"middle\"").unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("unknown variant"));
        assert!(msg.contains("`center`"));
    }
}
