/*!
 * PROBE - Vérification d'accessibilité d'un hôte
 *
 * RÔLE :
 * Lance une requête echo (ping) vers un hôte et transforme l'issue en
 * [`ProbeResult`].
 *
 * FONCTIONNEMENT :
 * - Sortie 0 -> `OK`, latence extraite de la sortie quand c'est possible
 * - Code non nul, lancement impossible ou timeout -> `FAIL`, sans latence
 * - Table ordonnée de motifs de latence, un par libellé localisé
 * - `probe` ne renvoie jamais d'erreur : tout échec est logué et devient un résultat
 */

use crate::command::{self, CommandError, CommandSpec};
use crate::config::ProbeConf;
use crate::models::ProbeResult;
use regex::Regex;
use std::sync::LazyLock;
use std::time::Duration;
use tracing::{debug, warn};

pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    #[error("refusing to probe suspicious host name {0:?}")]
    InvalidHost(String),
    #[error(transparent)]
    Command(#[from] CommandError),
    #[error("ping exited with status {0:?}")]
    ExitStatus(Option<i32>),
}

/// Extracteur de latence nommé ; essayés dans l'ordre de la table
struct LatencyPattern {
    name: &'static str,
    regex: Regex,
}

/// Libellés de temps affichés par ping selon la langue du système
const LATENCY_LABELS: &[&str] = &[
    "time", "tempo", "durata", "zeit", "temps", "tiempo", "czas", "tijd", "tid", "aika",
];

static LATENCY_PATTERNS: LazyLock<Vec<LatencyPattern>> = LazyLock::new(|| {
    LATENCY_LABELS
        .iter()
        .copied()
        .map(|label| LatencyPattern {
            name: label,
            regex: Regex::new(&format!(
                r"(?i)\b{label}\s*[=<]\s*(\d+(?:[.,]\d+)?)\s*ms"
            ))
            .expect("valid latency regex"),
        })
        .collect()
});

/// Extrait un aller-retour en millisecondes de la sortie de ping.
///
/// Accepte `time=23.4 ms`, `time<1ms`, `tempo=15 ms`, `Zeit=12,5 ms`...
pub fn parse_latency(output: &str) -> Option<f64> {
    LATENCY_PATTERNS.iter().find_map(|pattern| {
        let caps = pattern.regex.captures(output)?;
        let value = caps.get(1)?.as_str().replace(',', ".");
        let ms = value.parse::<f64>().ok()?;
        debug!(pattern = pattern.name, latency_ms = ms, "latency matched");
        Some(ms)
    })
}

/// Une seule requête echo, selon la plateforme
pub fn default_ping_command() -> CommandSpec {
    if cfg!(target_os = "windows") {
        CommandSpec::new("ping", ["-n", "1", "{host}"])
    } else {
        CommandSpec::new("ping", ["-c", "1", "{host}"])
    }
}

/// Le nom d'hôte part tel quel dans argv : un tiret initial serait lu comme une option
fn is_safe_host(host: &str) -> bool {
    let host = host.trim();
    !host.is_empty() && !host.starts_with('-')
}

#[derive(Debug, Clone)]
pub struct Prober {
    /// Modèle de commande, `{host}` remplacé à chaque sonde
    command: CommandSpec,
    /// Au-delà, sonde = FAIL et processus tué
    timeout: Duration,
}

impl Default for Prober {
    fn default() -> Self {
        Self::new(default_ping_command(), DEFAULT_PROBE_TIMEOUT)
    }
}

impl Prober {
    pub fn new(command: CommandSpec, timeout: Duration) -> Self {
        Self { command, timeout }
    }

    pub fn from_config(conf: &ProbeConf) -> Result<Self, CommandError> {
        let command = match conf.command.as_deref() {
            Some(line) => CommandSpec::parse(line)?,
            None => default_ping_command(),
        };
        Ok(Self::new(command, Duration::from_millis(conf.timeout_ms)))
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Sonde `host` une fois. Renvoie toujours un résultat pour cet hôte précis.
    pub async fn probe(&self, host: &str) -> ProbeResult {
        match self.execute(host).await {
            Ok(output) => match parse_latency(&output) {
                Some(ms) => ProbeResult::ok(host, Some(ms)),
                None => {
                    warn!(
                        host,
                        output = %output.trim(),
                        "ping succeeded but no latency label was recognised"
                    );
                    ProbeResult::ok(host, None)
                }
            },
            Err(e) => {
                debug!(host, error = %e, "ping failed");
                ProbeResult::fail(host)
            }
        }
    }

    async fn execute(&self, host: &str) -> Result<String, ProbeError> {
        if !is_safe_host(host) {
            warn!(host, "skipping ping for invalid host name");
            return Err(ProbeError::InvalidHost(host.to_string()));
        }

        let spec = self.command.with_host(host);
        let output = command::run(&spec, self.timeout).await?;
        if !output.success {
            return Err(ProbeError::ExitStatus(output.exit_code));
        }
        Ok(output.stdout)
    }
}
