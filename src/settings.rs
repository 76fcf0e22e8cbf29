//! Process-wide pricing and system constants.
//!
//! Stored as a single JSONB row, lazily created with defaults on first
//! read. The engines fetch one snapshot per logical operation so the
//! price/tax values used within that operation stay internally consistent
//! even if an administrator updates settings concurrently; changes apply
//! prospectively only.

use crate::errors::AppError;
use crate::models::PartnerTier;
use moka::future::Cache;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use std::collections::BTreeMap;
use std::time::Duration;

/// Per-service per-lead pricing by partner tier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServicePricing {
    pub basic: f64,
    pub exclusive: f64,
}

/// System constants read by the assignment and billing engines.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemSettings {
    /// Tax rate in percent applied to invoice subtotals.
    pub tax_rate: f64,
    /// How many basic-tier partners may hold active assignments on one
    /// lead at the same time.
    pub basic_partner_lead_limit: i64,
    /// Weekly quota applied to partners without an explicit limit.
    pub default_weekly_lead_limit: i64,
    /// Hours after acceptance during which a partner may still request
    /// cancellation.
    pub cancellation_time_limit_hours: i64,
}

/// The settings snapshot handed to one logical operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Per-lead price keyed by service type ("moving", "cleaning", ...).
    pub pricing: BTreeMap<String, ServicePricing>,
    pub system: SystemSettings,
}

impl Default for Settings {
    fn default() -> Self {
        let mut pricing = BTreeMap::new();
        pricing.insert(
            "moving".to_string(),
            ServicePricing {
                basic: 29.0,
                exclusive: 49.0,
            },
        );
        pricing.insert(
            "cleaning".to_string(),
            ServicePricing {
                basic: 19.0,
                exclusive: 39.0,
            },
        );
        Settings {
            pricing,
            system: SystemSettings {
                tax_rate: 19.0,
                basic_partner_lead_limit: 3,
                default_weekly_lead_limit: 10,
                cancellation_time_limit_hours: 24,
            },
        }
    }
}

impl Settings {
    /// Current per-lead price for a (service type, partner tier) pair.
    /// Unknown service types price at zero rather than failing the
    /// assignment; the audit trail keeps the snapshot visible.
    pub fn per_lead_price(&self, service_type: &str, tier: PartnerTier) -> f64 {
        self.pricing
            .get(service_type)
            .map(|p| match tier {
                PartnerTier::Basic => p.basic,
                PartnerTier::Exclusive => p.exclusive,
            })
            .unwrap_or(0.0)
    }
}

/// Cached access to the singleton settings row.
#[derive(Clone)]
pub struct SettingsStore {
    pool: PgPool,
    cache: Cache<String, Settings>,
}

const CACHE_KEY: &str = "settings";

impl SettingsStore {
    pub fn new(pool: PgPool) -> Self {
        // Short TTL: admin updates become visible within seconds while a
        // burst of assignments still shares one snapshot.
        let cache = Cache::builder()
            .time_to_live(Duration::from_secs(30))
            .max_capacity(1)
            .build();
        Self { pool, cache }
    }

    /// Returns the current settings snapshot, creating the row with
    /// defaults if it does not exist yet.
    pub async fn current(&self) -> Result<Settings, AppError> {
        if let Some(settings) = self.cache.get(CACHE_KEY).await {
            return Ok(settings);
        }

        let row: Option<(serde_json::Value,)> =
            sqlx::query_as("SELECT data FROM settings WHERE id = 1")
                .fetch_optional(&self.pool)
                .await?;

        let settings = match row {
            Some((data,)) => serde_json::from_value(data).unwrap_or_else(|e| {
                tracing::warn!("Stored settings failed to parse, using defaults: {}", e);
                Settings::default()
            }),
            None => {
                let defaults = Settings::default();
                let data = serde_json::to_value(&defaults)
                    .map_err(|e| AppError::InternalError(format!("serialize settings: {}", e)))?;
                sqlx::query(
                    "INSERT INTO settings (id, data) VALUES (1, $1) ON CONFLICT (id) DO NOTHING",
                )
                .bind(&data)
                .execute(&self.pool)
                .await?;
                tracing::info!("Settings row created with defaults");
                defaults
            }
        };

        self.cache
            .insert(CACHE_KEY.to_string(), settings.clone())
            .await;
        Ok(settings)
    }

    /// Replaces the settings. Applies prospectively only: in-flight
    /// operations keep the snapshot they already fetched.
    pub async fn update(&self, settings: Settings) -> Result<Settings, AppError> {
        let data = serde_json::to_value(&settings)
            .map_err(|e| AppError::InternalError(format!("serialize settings: {}", e)))?;
        sqlx::query(
            "INSERT INTO settings (id, data, updated_at) VALUES (1, $1, now())
             ON CONFLICT (id) DO UPDATE SET data = EXCLUDED.data, updated_at = now()",
        )
        .bind(&data)
        .execute(&self.pool)
        .await?;

        self.cache.invalidate(CACHE_KEY).await;
        tracing::info!("Settings updated");
        Ok(settings)
    }
}
