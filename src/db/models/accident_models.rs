use chrono::{DateTime, Utc};
use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::str::FromStr;
use uuid::Uuid;

use crate::error::Error;

/// Accident severity, ordered from least to most urgent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type, Default)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "severity", rename_all = "lowercase")]
pub enum Severity {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

impl Display for Severity {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

impl FromStr for Severity {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            "critical" => Ok(Self::Critical),
            other => Err(Error::Validation(format!("Unknown severity: {}", other))),
        }
    }
}

/// Dispatch status of an accident record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type, Default)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "status", rename_all = "lowercase")]
pub enum Status {
    #[default]
    Pending,
    Dispatched,
    Resolved,
}

impl Display for Status {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Dispatched => write!(f, "dispatched"),
            Self::Resolved => write!(f, "resolved"),
        }
    }
}

impl FromStr for Status {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "dispatched" => Ok(Self::Dispatched),
            "resolved" => Ok(Self::Resolved),
            other => Err(Error::Validation(format!("Unknown status: {}", other))),
        }
    }
}

/// GPS coordinates. Field devices send the compact `"lat,lng"` text form,
/// dashboard clients send an object, so deserialization accepts both.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Default, sqlx::FromRow)]
pub struct Location {
    pub lat: f64,
    pub lng: f64,
}

impl FromStr for Location {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (lat, lng) = s
            .split_once(',')
            .ok_or_else(|| Error::Validation(format!("Invalid location: {}", s)))?;
        let lat = lat
            .trim()
            .parse()
            .map_err(|_| Error::Validation(format!("Invalid latitude: {}", lat)))?;
        let lng = lng
            .trim()
            .parse()
            .map_err(|_| Error::Validation(format!("Invalid longitude: {}", lng)))?;
        Ok(Self { lat, lng })
    }
}

impl Display for Location {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{},{}", self.lat, self.lng)
    }
}

impl<'de> Deserialize<'de> for Location {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Pair { lat: f64, lng: f64 },
            Text(String),
        }

        match Repr::deserialize(deserializer)? {
            Repr::Pair { lat, lng } => Ok(Location { lat, lng }),
            Repr::Text(s) => s.parse().map_err(de::Error::custom),
        }
    }
}

/// Accident record model. Wire format is camelCase to match the dashboard
/// contract.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Accident {
    pub id: Uuid,
    pub image_base64: String,
    pub timestamp: DateTime<Utc>,
    #[sqlx(flatten)]
    pub location: Location,
    pub severity: Severity,
    pub verified: bool,
    pub ml_confidence: Option<f64>,
    pub device_id: Option<String>,
    pub address: Option<String>,
    pub status: Status,
}

/// Validated creation payload handed to the store; id and timestamp are
/// assigned at insert.
#[derive(Debug, Clone)]
pub struct NewAccident {
    pub image_base64: String,
    pub location: Location,
    pub severity: Severity,
    pub device_id: Option<String>,
}

/// Creation request as produced by the ingestion adapters
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateAccident {
    pub image_base64: String,
    #[serde(default)]
    pub location: Option<Location>,
    #[serde(default)]
    pub severity: Option<Severity>,
    #[serde(default)]
    pub device_id: Option<String>,
}

/// Partial update; unspecified fields are retained. `ml_confidence` is set
/// only by the classification dispatcher and is never accepted over HTTP.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateAccident {
    #[serde(default)]
    pub status: Option<Status>,
    #[serde(default)]
    pub severity: Option<Severity>,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub verified: Option<bool>,
    #[serde(skip)]
    pub ml_confidence: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_rejects_unknown_values() {
        assert!(serde_json::from_str::<Severity>("\"critical\"").is_ok());
        assert!(serde_json::from_str::<Severity>("\"extreme\"").is_err());
        assert!("catastrophic".parse::<Severity>().is_err());
    }

    #[test]
    fn status_rejects_unknown_values() {
        assert!(serde_json::from_str::<Status>("\"dispatched\"").is_ok());
        assert!(serde_json::from_str::<Status>("\"archived\"").is_err());
    }

    #[test]
    fn location_parses_text_and_object_forms() {
        let from_text: Location = serde_json::from_str("\"19.07, 72.87\"").unwrap();
        assert_eq!(from_text, Location { lat: 19.07, lng: 72.87 });

        let from_object: Location = serde_json::from_str(r#"{"lat":19.07,"lng":72.87}"#).unwrap();
        assert_eq!(from_object, from_text);

        assert!(serde_json::from_str::<Location>("\"not-a-pair\"").is_err());
    }

    #[test]
    fn location_defaults_to_origin() {
        assert_eq!(Location::default(), Location { lat: 0.0, lng: 0.0 });
    }

    #[test]
    fn create_request_uses_camel_case_fields() {
        let req: CreateAccident = serde_json::from_str(
            r#"{"imageBase64":"abc","location":"1.5,2.5","severity":"high","deviceId":"ESP32-01"}"#,
        )
        .unwrap();
        assert_eq!(req.image_base64, "abc");
        assert_eq!(req.location.unwrap().lat, 1.5);
        assert_eq!(req.severity, Some(Severity::High));
        assert_eq!(req.device_id.as_deref(), Some("ESP32-01"));
    }

    #[test]
    fn update_request_never_accepts_ml_confidence() {
        let update: UpdateAccident =
            serde_json::from_str(r#"{"status":"resolved","mlConfidence":0.99}"#).unwrap();
        assert_eq!(update.status, Some(Status::Resolved));
        assert!(update.ml_confidence.is_none());
    }
}
