/*!
Commandes scriptées

Chaque helper produit un argv `sh -c <script> {host}` : le script voit l'hôte
sondé dans `$0`. `argv()` pour construire une commande directement,
`command_line()` pour une entrée `command:` de config.
*/

use std::time::Duration;

const HOST_ARG: &str = "{host}";

fn sh_argv(script: String) -> Vec<String> {
    vec!["sh".into(), "-c".into(), script, HOST_ARG.into()]
}

fn sleep_prefix(delay: Option<Duration>) -> String {
    match delay {
        Some(d) if !d.is_zero() => format!("sleep {}; ", d.as_secs_f64()),
        _ => String::new(),
    }
}

/// Rapport JSON de speed test, débits en bits/s
pub fn speedtest_report(download_bps: f64, upload_bps: f64) -> String {
    serde_json::json!({
        "download": download_bps,
        "upload": upload_bps,
        "ping": 12.0,
        "server": { "name": "scripted", "country": "Nowhere" }
    })
    .to_string()
}

#[derive(Debug, Clone, PartialEq)]
enum Reply {
    Latency { label: String, ms: f64 },
    Unparsed,
    Unreachable,
}

impl Reply {
    fn render(&self) -> String {
        match self {
            // guillemets doubles : $0 devient l'hôte
            Reply::Latency { label, ms } => format!("echo \"64 bytes from $0: icmp_seq=1 ttl=57 {label}={ms} ms\""),
            Reply::Unparsed => "echo 'reply received'".into(),
            Reply::Unreachable => "echo 'Destination Host Unreachable' >&2; exit 1".into(),
        }
    }
}

/// Réponses ping par hôte. Sans règle, réponse par défaut
/// (`time=1 ms` sauf changement).
#[derive(Debug, Clone)]
pub struct ScriptedPing {
    rules: Vec<(String, Reply)>,
    fallback: Reply,
    delay: Option<Duration>,
}

impl Default for ScriptedPing {
    fn default() -> Self {
        Self {
            rules: Vec::new(),
            fallback: Reply::Latency { label: "time".into(), ms: 1.0 },
            delay: None,
        }
    }
}

impl ScriptedPing {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn latency(self, host: &str, ms: f64) -> Self {
        self.labelled(host, "time", ms)
    }

    /// Réponse avec un libellé localisé, ex : `tempo=15 ms`
    pub fn labelled(mut self, host: &str, label: &str, ms: f64) -> Self {
        self.rules.push((host.into(), Reply::Latency { label: label.into(), ms }));
        self
    }

    pub fn unparsed(mut self, host: &str) -> Self {
        self.rules.push((host.into(), Reply::Unparsed));
        self
    }

    pub fn unreachable(mut self, host: &str) -> Self {
        self.rules.push((host.into(), Reply::Unreachable));
        self
    }

    pub fn fallback_unreachable(mut self) -> Self {
        self.fallback = Reply::Unreachable;
        self
    }

    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn script(&self) -> String {
        let mut script = sleep_prefix(self.delay);
        script.push_str("case \"$0\" in ");
        for (host, reply) in &self.rules {
            script.push_str(&format!("{}) {};; ", shell_words::quote(host), reply.render()));
        }
        script.push_str(&format!("*) {};; esac", self.fallback.render()));
        script
    }

    pub fn argv(&self) -> Vec<String> {
        sh_argv(self.script())
    }

    pub fn command_line(&self) -> String {
        shell_words::join(self.argv())
    }
}

/// Commande à sortie fixe et code de retour fixe
#[derive(Debug, Clone, Default)]
pub struct ScriptedCommand {
    stdout: Option<String>,
    stderr: Option<String>,
    exit_code: i32,
    delay: Option<Duration>,
}

impl ScriptedCommand {
    pub fn stdout(text: impl Into<String>) -> Self {
        Self { stdout: Some(text.into()), ..Self::default() }
    }

    pub fn failing(exit_code: i32, stderr: impl Into<String>) -> Self {
        Self {
            stderr: Some(stderr.into()),
            exit_code,
            ..Self::default()
        }
    }

    pub fn exit_code(mut self, code: i32) -> Self {
        self.exit_code = code;
        self
    }

    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn script(&self) -> String {
        let mut script = sleep_prefix(self.delay);
        if let Some(out) = &self.stdout {
            script.push_str(&format!("printf '%s\\n' {}; ", shell_words::quote(out)));
        }
        if let Some(err) = &self.stderr {
            script.push_str(&format!("printf '%s\\n' {} >&2; ", shell_words::quote(err)));
        }
        script.push_str(&format!("exit {}", self.exit_code));
        script
    }

    pub fn argv(&self) -> Vec<String> {
        sh_argv(self.script())
    }

    pub fn command_line(&self) -> String {
        shell_words::join(self.argv())
    }
}
