/*!
 * COMMAND - Exécution des programmes externes
 *
 * RÔLE :
 * Toutes les vérifications du moniteur sont des programmes externes (ping,
 * speedtest, requêtes wifi). Ce module les lance et récupère leur sortie.
 *
 * FONCTIONNEMENT :
 * - Jamais de shell : programme + arguments, découpés avec shell-words
 * - Placeholder `{host}` substitué dans les arguments
 * - stdout / stderr capturés, durée bornée par un timeout
 * - Processus tué s'il dépasse le timeout (kill_on_drop)
 */

use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::Command as AsyncCommand;
use tracing::debug;

/// Placeholder remplacé par [`CommandSpec::with_host`]
pub const HOST_PLACEHOLDER: &str = "{host}";

#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("command line is empty")]
    Empty,
    #[error("invalid command line: {0}")]
    Parse(#[from] shell_words::ParseError),
    #[error("failed to spawn `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("command timed out after {0:?}")]
    Timeout(Duration),
}

/// Un programme et ses arguments, jamais interprétés par un shell
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    program: String,
    args: Vec<String>,
}

impl CommandSpec {
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// Découpe une ligne de commande avec les règles de shell-words,
    /// ex : `ping -c 1 -W 2 {host}`
    pub fn parse(line: &str) -> Result<Self, CommandError> {
        let mut words = shell_words::split(line)?.into_iter();
        let program = words.next().ok_or(CommandError::Empty)?;
        Ok(Self { program, args: words.collect() })
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Remplace `{host}` dans chaque argument. Sans placeholder, l'hôte est
    /// ajouté en dernier argument.
    pub fn with_host(&self, host: &str) -> Self {
        let templated = self.args.iter().any(|a| a.contains(HOST_PLACEHOLDER));
        let mut args: Vec<String> = self
            .args
            .iter()
            .map(|a| a.replace(HOST_PLACEHOLDER, host))
            .collect();
        if !templated {
            args.push(host.to_string());
        }
        Self { program: self.program.clone(), args }
    }
}

impl std::fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut words = Vec::with_capacity(self.args.len() + 1);
        words.push(self.program.as_str());
        words.extend(self.args.iter().map(String::as_str));
        f.write_str(&shell_words::join(words))
    }
}

/// Sortie capturée d'une commande terminée
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    /// None si tué par un signal
    pub exit_code: Option<i32>,
    pub success: bool,
    /// Durée réelle d'exécution
    pub elapsed: Duration,
}

/// Lance `spec` jusqu'au bout ; tué s'il dépasse `timeout`
pub async fn run(spec: &CommandSpec, timeout: Duration) -> Result<CommandOutput, CommandError> {
    let start = Instant::now();
    debug!(command = %spec, ?timeout, "running command");

    let child = AsyncCommand::new(&spec.program)
        .args(&spec.args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| CommandError::Spawn {
            program: spec.program.clone(),
            source,
        })?;

    let output = tokio::time::timeout(timeout, child.wait_with_output())
        .await
        .map_err(|_| CommandError::Timeout(timeout))?
        .map_err(|source| CommandError::Spawn {
            program: spec.program.clone(),
            source,
        })?;

    Ok(CommandOutput {
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        exit_code: output.status.code(),
        success: output.status.success(),
        elapsed: start.elapsed(),
    })
}
