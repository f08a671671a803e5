/*!
 * BANDWIDTH - Mesure de débit et identité réseau
 *
 * RÔLE :
 * Un échantillon = un speed test (descendant + montant, meilleur serveur
 * choisi par l'outil) suivi d'une recherche du nom du réseau wifi courant.
 *
 * FONCTIONNEMENT :
 * - Rapport JSON du speed test en bits/s, converti en Mbps (2 décimales)
 * - Identité réseau : requêtes OS essayées dans l'ordre, "N/A" sinon
 * - Speed test raté -> instantané à zéro + erreur loguée
 * - Plusieurs dizaines de secondes par mesure : job dédié, les ticks de
 *   sonde ne l'attendent jamais
 */

use crate::command::{self, CommandError, CommandSpec};
use crate::config::BandwidthConf;
use crate::models::{BandwidthSnapshot, UNKNOWN_NETWORK};
use regex::Regex;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, error, info};

pub const DEFAULT_SPEEDTEST_TIMEOUT: Duration = Duration::from_secs(120);
const IDENTITY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, thiserror::Error)]
pub enum SampleError {
    #[error(transparent)]
    Command(#[from] CommandError),
    #[error("speed test exited with status {code:?}: {stderr}")]
    ExitStatus { code: Option<i32>, stderr: String },
    #[error("unreadable speed test report: {0}")]
    Report(#[from] serde_json::Error),
    #[error("speed test reported a non-finite rate")]
    InvalidRate,
}

/// Sous-ensemble du rapport JSON du speed test, débits en bits/s
#[derive(Debug, Deserialize)]
struct SpeedtestReport {
    download: f64,
    upload: f64,
}

/// bits/s -> Mbps, arrondi à deux décimales
pub fn to_mbps(bits_per_sec: f64) -> f64 {
    (bits_per_sec / 1_000_000.0 * 100.0).round() / 100.0
}

pub fn default_speedtest_command() -> CommandSpec {
    CommandSpec::new("speedtest-cli", ["--json", "--secure"])
}

/// Une façon de demander à l'OS le nom du réseau wifi courant
#[derive(Debug, Clone)]
pub struct IdentityQuery {
    /// Nom de l'outil, pour les logs
    name: &'static str,
    command: CommandSpec,
    /// Un groupe de capture = nom du réseau
    pattern: Regex,
}

impl IdentityQuery {
    /// `pattern` doit avoir un groupe de capture contenant le nom du réseau
    pub fn new(name: &'static str, command: CommandSpec, pattern: &str) -> Result<Self, regex::Error> {
        Ok(Self { name, command, pattern: Regex::new(pattern)? })
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    fn extract(&self, output: &str) -> Option<String> {
        extract_identity(&self.pattern, output)
    }
}

/// Première capture de `pattern`, sans espaces ; un nom vide ne compte pas
pub fn extract_identity(pattern: &Regex, output: &str) -> Option<String> {
    let label = pattern.captures(output)?.get(1)?.as_str().trim();
    (!label.is_empty()).then(|| label.to_string())
}

const NETSH_SSID: &str = r"(?m)^\s*SSID\s*:\s*(.+?)\s*$";

fn identity_query(name: &'static str, program: &str, args: &[&str], pattern: &str) -> Option<IdentityQuery> {
    IdentityQuery::new(name, CommandSpec::new(program, args.iter().copied()), pattern).ok()
}

/// Requêtes de la plateforme courante, essayées dans l'ordre
pub fn platform_identity_queries() -> Vec<IdentityQuery> {
    let queries = if cfg!(target_os = "windows") {
        vec![identity_query("netsh", "netsh", &["wlan", "show", "interfaces"], NETSH_SSID)]
    } else if cfg!(target_os = "macos") {
        vec![identity_query(
            "networksetup",
            "networksetup",
            &["-getairportnetwork", "en0"],
            r"Current Wi-Fi Network:\s*(.+)",
        )]
    } else if cfg!(target_os = "linux") {
        vec![
            identity_query("iwgetid", "iwgetid", &["-r"], r"(?m)^\s*(\S.*?)\s*$"),
            identity_query(
                "nmcli",
                "nmcli",
                &["-t", "-f", "active,ssid", "dev", "wifi"],
                r"(?m)^yes:(.+)$",
            ),
        ]
    } else {
        Vec::new()
    };
    queries.into_iter().flatten().collect()
}

#[derive(Debug, Clone)]
pub struct Sampler {
    /// Commande speed test, sortie JSON attendue
    speedtest: CommandSpec,
    /// Durée max d'un speed test
    timeout: Duration,
    /// Requêtes d'identité réseau, essayées dans l'ordre
    identity: Vec<IdentityQuery>,
}

impl Default for Sampler {
    fn default() -> Self {
        Self::new(default_speedtest_command(), DEFAULT_SPEEDTEST_TIMEOUT)
    }
}

impl Sampler {
    pub fn new(speedtest: CommandSpec, timeout: Duration) -> Self {
        Self {
            speedtest,
            timeout,
            identity: platform_identity_queries(),
        }
    }

    pub fn from_config(conf: &BandwidthConf) -> Result<Self, CommandError> {
        let speedtest = match conf.command.as_deref() {
            Some(line) => CommandSpec::parse(line)?,
            None => default_speedtest_command(),
        };
        let mut sampler = Self::new(speedtest, Duration::from_secs(conf.timeout_secs));
        if !conf.identity_lookup {
            sampler.identity.clear();
        }
        Ok(sampler)
    }

    /// Remplace les requêtes d'identité de la plateforme
    pub fn with_identity_queries(mut self, queries: Vec<IdentityQuery>) -> Self {
        self.identity = queries;
        self
    }

    /// Une mesure. Speed test raté = instantané à zéro.
    pub async fn sample(&self) -> BandwidthSnapshot {
        match self.measure().await {
            Ok((download, upload)) => {
                let ssid = self.network_identity().await;
                let snapshot = BandwidthSnapshot { ssid, download, upload };
                info!(
                    ssid = %snapshot.ssid,
                    download_mbps = snapshot.download,
                    upload_mbps = snapshot.upload,
                    "bandwidth sampled"
                );
                snapshot
            }
            Err(e) => {
                error!(error = %e, "speed test failed");
                BandwidthSnapshot::unavailable()
            }
        }
    }

    async fn measure(&self) -> Result<(f64, f64), SampleError> {
        let output = command::run(&self.speedtest, self.timeout).await?;
        if !output.success {
            return Err(SampleError::ExitStatus {
                code: output.exit_code,
                stderr: output.stderr.trim().to_string(),
            });
        }

        let report: SpeedtestReport = serde_json::from_str(output.stdout.trim())?;
        if !report.download.is_finite() || !report.upload.is_finite() {
            return Err(SampleError::InvalidRate);
        }
        Ok((to_mbps(report.download), to_mbps(report.upload)))
    }

    /// Nom du réseau courant, ou `"N/A"`. N'échoue jamais.
    pub async fn network_identity(&self) -> String {
        for query in &self.identity {
            match command::run(&query.command, IDENTITY_TIMEOUT).await {
                Ok(output) if output.success => {
                    if let Some(ssid) = query.extract(&output.stdout) {
                        return ssid;
                    }
                    debug!(query = query.name(), "no network name in output");
                }
                Ok(output) => {
                    debug!(query = query.name(), code = ?output.exit_code, "identity query exited with error");
                }
                Err(e) => {
                    debug!(query = query.name(), error = %e, "identity query unavailable");
                }
            }
        }
        UNKNOWN_NETWORK.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn converts_bits_to_rounded_mbps() {
        assert_eq!(to_mbps(94_123_456.7), 94.12);
        assert_eq!(to_mbps(12_345_678.9), 12.35);
        assert_eq!(to_mbps(0.0), 0.0);
    }

    #[test]
    fn netsh_pattern_skips_bssid() {
        let query = IdentityQuery::new("netsh", CommandSpec::new("netsh", ["wlan"]), NETSH_SSID).unwrap();
        let output = "    Name                   : Wi-Fi\n    BSSID                  : aa:bb:cc:dd:ee:ff\n    SSID                   : HomeNet\n";
        assert_eq!(query.extract(output).as_deref(), Some("HomeNet"));
    }

    #[test]
    fn blank_identity_is_no_match() {
        let re = Regex::new(r"(?m)^\s*SSID\s*:(.*)$").unwrap();
        assert_eq!(extract_identity(&re, "    SSID   :    \n"), None);
    }

    #[cfg(unix)]
    fn scripted_sampler(speedtest: &str) -> Sampler {
        Sampler::new(CommandSpec::new("sh", ["-c", speedtest]), Duration::from_secs(5))
    }

    #[cfg(unix)]
    fn scripted_identity(script: &str) -> IdentityQuery {
        IdentityQuery::new("scripted", CommandSpec::new("sh", ["-c", script]), NETSH_SSID).unwrap()
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn sample_converts_report_and_reads_identity() {
        let sampler = scripted_sampler(r#"echo '{"download": 94123456.7, "upload": 12345678.9, "ping": 12.1}'"#)
            .with_identity_queries(vec![scripted_identity("echo '    SSID : HomeNet'")]);

        let snapshot = sampler.sample().await;
        assert_eq!(snapshot.ssid, "HomeNet");
        assert_eq!(snapshot.download, 94.12);
        assert_eq!(snapshot.upload, 12.35);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn failed_speed_test_yields_zero_snapshot() {
        let sampler = scripted_sampler("echo 'no servers' >&2; exit 2")
            .with_identity_queries(vec![scripted_identity("echo 'SSID : HomeNet'")]);
        assert_eq!(sampler.sample().await, BandwidthSnapshot::unavailable());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn garbage_report_yields_zero_snapshot() {
        let sampler = scripted_sampler("echo 'Retrieving speedtest.net configuration...'")
            .with_identity_queries(Vec::new());
        assert_eq!(sampler.sample().await, BandwidthSnapshot::unavailable());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn identity_failure_degrades_to_na() {
        let missing = IdentityQuery::new(
            "missing",
            CommandSpec::new("netwatch-no-such-wifi-tool", Vec::<String>::new()),
            r"(.+)",
        )
        .unwrap();
        let sampler = scripted_sampler(r#"echo '{"download": 1000000, "upload": 500000}'"#)
            .with_identity_queries(vec![missing, scripted_identity("exit 1"), scripted_identity("echo 'SSID :   '")]);

        let snapshot = sampler.sample().await;
        assert_eq!(snapshot.ssid, "N/A");
        assert_eq!(snapshot.download, 1.0);
        assert_eq!(snapshot.upload, 0.5);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn identity_queries_fall_through_in_order() {
        let sampler = scripted_sampler(r#"echo '{"download": 2000000, "upload": 1000000}'"#)
            .with_identity_queries(vec![scripted_identity("echo nothing"), scripted_identity("echo 'SSID : Office'")]);
        assert_eq!(sampler.network_identity().await, "Office");
    }
}
