/*!
 * MODELS - Types de données du moniteur
 *
 * RÔLE :
 * Résultats de sonde, instantané de débit et intervalles des jobs, tels
 * qu'ils sont stockés sur disque et renvoyés par l'API.
 *
 * FONCTIONNEMENT :
 * - `ProbeResult` immuable, construit via `ok` / `fail` ou désérialisé ;
 *   dans les deux cas un FAIL n'a jamais de latence
 * - `BandwidthSnapshot` remplacé en bloc à chaque mesure
 */

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Résultat d'une vérification d'accessibilité
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ProbeStatus {
    Ok,
    Fail,
}

/// Une mesure de sonde, immuable.
///
/// Construite par [`ProbeResult::ok`] / [`ProbeResult::fail`] ; la
/// désérialisation repasse par les mêmes règles (latence finie et positive,
/// jamais de latence sur un FAIL).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "StoredProbeResult")]
pub struct ProbeResult {
    /// Fin de la sonde (RFC 3339)
    #[serde(with = "time::serde::rfc3339")]
    timestamp: OffsetDateTime,
    /// Hôte sondé, tel qu'enregistré
    host: String,
    latency: Option<f64>, // millisecondes, None = inconnue ou échec
    status: ProbeStatus,
}

/// Forme brute sur disque, normalisée vers `ProbeResult`
#[derive(Deserialize)]
struct StoredProbeResult {
    #[serde(with = "time::serde::rfc3339")]
    timestamp: OffsetDateTime,
    host: String,
    #[serde(default)]
    latency: Option<f64>,
    status: ProbeStatus,
}

impl From<StoredProbeResult> for ProbeResult {
    fn from(raw: StoredProbeResult) -> Self {
        let result = match raw.status {
            ProbeStatus::Ok => Self::ok(raw.host, raw.latency),
            ProbeStatus::Fail => Self::fail(raw.host),
        };
        result.with_timestamp(raw.timestamp)
    }
}

impl ProbeResult {
    /// Sonde réussie. `latency` vaut None si la sortie n'a pas pu être parsée.
    pub fn ok(host: impl Into<String>, latency: Option<f64>) -> Self {
        Self {
            timestamp: OffsetDateTime::now_utc(),
            host: host.into(),
            latency: latency.filter(|ms| ms.is_finite() && *ms >= 0.0),
            status: ProbeStatus::Ok,
        }
    }

    pub fn fail(host: impl Into<String>) -> Self {
        Self {
            timestamp: OffsetDateTime::now_utc(),
            host: host.into(),
            latency: None,
            status: ProbeStatus::Fail,
        }
    }

    pub fn with_timestamp(mut self, timestamp: OffsetDateTime) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn timestamp(&self) -> OffsetDateTime {
        self.timestamp
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn latency(&self) -> Option<f64> {
        self.latency
    }

    pub fn status(&self) -> ProbeStatus {
        self.status
    }

    pub fn is_ok(&self) -> bool {
        self.status == ProbeStatus::Ok
    }
}

/// Dernière mesure de débit, remplacée en bloc à chaque échantillon
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BandwidthSnapshot {
    /// Nom du réseau, "N/A" si inconnu
    pub ssid: String,
    pub download: f64, // Mbps
    pub upload: f64,   // Mbps
}

pub const UNKNOWN_NETWORK: &str = "N/A";

impl BandwidthSnapshot {
    /// Valeur zéro : avant la première mesure et après une mesure ratée
    pub fn unavailable() -> Self {
        Self {
            ssid: UNKNOWN_NETWORK.to_string(),
            download: 0.0,
            upload: 0.0,
        }
    }
}

impl Default for BandwidthSnapshot {
    fn default() -> Self {
        Self::unavailable()
    }
}

/// Intervalles des jobs, en secondes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    pub probe_interval_secs: u64,
    pub sample_interval_secs: u64,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            probe_interval_secs: 60,
            sample_interval_secs: 180,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failed_probe_never_has_latency() {
        let result = ProbeResult::fail("10.0.0.1");
        assert_eq!(result.status(), ProbeStatus::Fail);
        assert_eq!(result.latency(), None);
    }

    #[test]
    fn negative_latency_is_dropped() {
        let result = ProbeResult::ok("10.0.0.1", Some(-4.0));
        assert!(result.is_ok());
        assert_eq!(result.latency(), None);
    }

    #[test]
    fn probe_result_json_shape() {
        let result = ProbeResult::ok("8.8.8.8", Some(23.4))
            .with_timestamp(time::macros::datetime!(2024-05-01 12:00:00 UTC));
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["host"], "8.8.8.8");
        assert_eq!(json["status"], "OK");
        assert_eq!(json["latency"], 23.4);
        assert_eq!(json["timestamp"], "2024-05-01T12:00:00Z");

        let failed = serde_json::to_value(ProbeResult::fail("8.8.8.8")).unwrap();
        assert_eq!(failed["status"], "FAIL");
        assert!(failed["latency"].is_null());
    }

    #[test]
    fn loading_normalizes_stored_results() {
        let failed: ProbeResult = serde_json::from_str(
            r#"{"timestamp": "2024-05-01T12:00:00Z", "host": "10.0.0.1", "latency": 5.0, "status": "FAIL"}"#,
        )
        .unwrap();
        assert_eq!(failed.status(), ProbeStatus::Fail);
        assert_eq!(failed.latency(), None);
        assert_eq!(failed.timestamp(), time::macros::datetime!(2024-05-01 12:00:00 UTC));

        let negative: ProbeResult = serde_json::from_str(
            r#"{"timestamp": "2024-05-01T12:00:00Z", "host": "10.0.0.1", "latency": -3.0, "status": "OK"}"#,
        )
        .unwrap();
        assert!(negative.is_ok());
        assert_eq!(negative.latency(), None);

        let kept = ProbeResult::ok("8.8.8.8", Some(23.4))
            .with_timestamp(time::macros::datetime!(2024-05-01 12:00:00 UTC));
        let reloaded: ProbeResult = serde_json::from_str(&serde_json::to_string(&kept).unwrap()).unwrap();
        assert_eq!(reloaded, kept);
    }

    #[test]
    fn default_snapshot_is_zero_value() {
        let snapshot = BandwidthSnapshot::default();
        assert_eq!(snapshot.ssid, "N/A");
        assert_eq!(snapshot.download, 0.0);
        assert_eq!(snapshot.upload, 0.0);
    }

    #[test]
    fn schedule_defaults() {
        let schedule = ScheduleConfig::default();
        assert_eq!(schedule.probe_interval_secs, 60);
        assert_eq!(schedule.sample_interval_secs, 180);
    }
}
