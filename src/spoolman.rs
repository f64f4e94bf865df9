//! Spoolman v1 REST client and the spool records it returns.

use serde::Deserialize;
use tracing::{info, warn};

use crate::error::SpoolSyncError;

/// One inventory spool, as returned by `GET /api/v1/spool`.
///
/// Only the fields the matcher and the deduction call need are modeled;
/// everything else in the payload is ignored. The flat `vendor`, `color`
/// and `name` fields are absent from newer Spoolman payloads but kept as
/// fallback matching inputs.
#[derive(Debug, Clone, Deserialize)]
pub struct Spool {
    pub id: i64,
    #[serde(default)]
    pub filament: Filament,
    #[serde(default)]
    pub vendor: Option<String>,
    #[serde(default)]
    pub color: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Filament {
    #[serde(default)]
    pub vendor: Vendor,
    #[serde(default)]
    pub material: String,
    /// Color name of the filament ("Black", "Galaxy-Black", ...).
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Vendor {
    #[serde(default)]
    pub name: String,
}

impl Spool {
    /// The flat top-level vendor field, empty when absent.
    pub fn flat_vendor(&self) -> &str {
        self.vendor.as_deref().unwrap_or("")
    }

    /// The flat color field, falling through to the flat name when the
    /// color is absent or empty.
    pub fn color_or_name(&self) -> &str {
        match self.color.as_deref() {
            Some(color) if !color.is_empty() => color,
            _ => self.name.as_deref().unwrap_or(""),
        }
    }
}

/// Client for the two Spoolman operations the daemon needs: reading the
/// full spool list and deducting used filament from one spool.
pub struct SpoolmanClient {
    client: reqwest::Client,
    base_url: String,
}

impl SpoolmanClient {
    /// No request timeout is set beyond reqwest's defaults; an unresponsive
    /// Spoolman stalls the deduction pass rather than dropping it.
    pub fn new(base_url: String) -> Result<Self, SpoolSyncError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("spoolsync/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client, base_url })
    }

    /// Fetch the full spool list. A failed fetch is retried exactly once
    /// immediately; if the retry also fails the error is returned and the
    /// caller keeps whatever snapshot it already has.
    pub async fn list_spools(&self) -> Result<Vec<Spool>, SpoolSyncError> {
        match self.fetch_spools().await {
            Ok(spools) => Ok(spools),
            Err(e) => {
                warn!("spool list fetch failed, retrying once: {}", e);
                self.fetch_spools().await
            }
        }
    }

    async fn fetch_spools(&self) -> Result<Vec<Spool>, SpoolSyncError> {
        let url = format!("{}/api/v1/spool", self.base_url);
        let spools = self
            .client
            .get(&url)
            .send()
            .await?
            .error_for_status()?
            .json::<Vec<Spool>>()
            .await?;
        Ok(spools)
    }

    /// Deduct `grams` from a spool. Not retried: repeating a successful
    /// call would deduct twice, and a missed deduction is the lesser harm.
    pub async fn use_filament(&self, spool_id: i64, grams: f64) -> Result<(), SpoolSyncError> {
        let url = format!("{}/api/v1/spool/{}/use", self.base_url, spool_id);
        self.client
            .put(&url)
            .json(&serde_json::json!({ "use_weight": grams }))
            .send()
            .await?
            .error_for_status()?;
        info!("subtracted {:.2}g from spool {}", grams, spool_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_nested_spool_payload() {
        let json = r#"
        {
            "id": 4,
            "registered": "2025-01-01T00:00:00Z",
            "remaining_weight": 712.5,
            "filament": {
                "id": 9,
                "name": "Black",
                "material": "PLA",
                "vendor": { "id": 2, "name": "eSUN" }
            }
        }"#;
        let spool: Spool = serde_json::from_str(json).unwrap();
        assert_eq!(spool.id, 4);
        assert_eq!(spool.filament.vendor.name, "eSUN");
        assert_eq!(spool.filament.material, "PLA");
        assert_eq!(spool.filament.name, "Black");
        assert_eq!(spool.flat_vendor(), "");
    }

    #[test]
    fn test_deserialize_flat_fields() {
        let json = r#"{ "id": 2, "vendor": "Overture", "color": "", "name": "Red" }"#;
        let spool: Spool = serde_json::from_str(json).unwrap();
        assert_eq!(spool.flat_vendor(), "Overture");
        assert_eq!(spool.color_or_name(), "Red", "empty color should fall through to name");
    }

    #[test]
    fn test_missing_filament_block_defaults() {
        let spool: Spool = serde_json::from_str(r#"{ "id": 1 }"#).unwrap();
        assert!(spool.filament.material.is_empty());
        assert_eq!(spool.color_or_name(), "");
    }
}
