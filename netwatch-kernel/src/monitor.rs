/*!
 * MONITOR - Coordination sondes / débit / stockage
 *
 * RÔLE :
 * Branche le prober, le sampler et le store sur le scheduler. C'est l'objet
 * partagé entre les jobs périodiques et les handlers HTTP.
 *
 * FONCTIONNEMENT :
 * - Job `probe` : sonde tous les hôtes enregistrés (au plus
 *   `max_concurrency` à la fois), puis écrit tout le lot en une fois
 * - Job `bandwidth` : une mesure, qui remplace l'instantané partagé
 * - Les accès store (bloquants) passent par `spawn_blocking`
 * - Un tick n'échoue jamais : erreurs loguées, le tick suivant repart de zéro
 */

use crate::bandwidth::Sampler;
use crate::config::MonitorConfig;
use crate::models::{BandwidthSnapshot, ProbeResult, ScheduleConfig};
use crate::probe::Prober;
use crate::scheduler::{Scheduler, SchedulerError};
use crate::state::{new_state, read_state, replace_state, Shared};
use crate::store::{HostRegistry, ResultStore, Store, StoreError};
use futures::stream::{self, StreamExt};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{debug, error, info};

pub const PROBE_JOB: &str = "probe";
pub const SAMPLE_JOB: &str = "bandwidth";

struct Inner {
    /// Hôtes + résultats
    store: Arc<dyn Store>,
    /// Commande ping
    prober: Prober,
    /// Commande speed-test + identité réseau
    sampler: Sampler,
    /// Jobs `probe` et `bandwidth`
    scheduler: Scheduler,
    /// Dernière mesure de débit
    bandwidth: Shared<BandwidthSnapshot>,
    /// Intervalles en vigueur
    schedule: Shared<ScheduleConfig>,
    /// Sondes simultanées au maximum pendant un tick
    max_concurrency: usize,
}

#[derive(Clone)]
pub struct Monitor {
    inner: Arc<Inner>,
}

impl Monitor {
    pub fn new(store: Arc<dyn Store>, prober: Prober, sampler: Sampler, max_concurrency: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                prober,
                sampler,
                scheduler: Scheduler::new(),
                bandwidth: new_state(BandwidthSnapshot::default()),
                schedule: new_state(ScheduleConfig::default()),
                max_concurrency: max_concurrency.max(1),
            }),
        }
    }

    pub fn from_config(store: Arc<dyn Store>, config: &MonitorConfig) -> Result<Self, crate::command::CommandError> {
        let prober = Prober::from_config(&config.probe)?;
        let sampler = Sampler::from_config(&config.bandwidth)?;
        Ok(Self::new(store, prober, sampler, config.probe.max_concurrency))
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.inner.store
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.inner.scheduler
    }

    /// Sonde chaque hôte enregistré une fois. Renvoie le nombre de résultats
    /// persistés (0 si l'écriture du lot a échoué).
    pub async fn probe_tick(&self) -> usize {
        self.inner.clone().probe_tick().await
    }

    /// Sonde un hôte immédiatement et persiste le résultat
    pub async fn probe_host(&self, host: &str) -> Result<ProbeResult, StoreError> {
        self.inner.probe_host(host).await
    }

    pub async fn sample_tick(&self) -> BandwidthSnapshot {
        self.inner.sample_tick().await
    }

    pub fn bandwidth(&self) -> BandwidthSnapshot {
        read_state(&self.inner.bandwidth)
    }

    pub fn schedule(&self) -> ScheduleConfig {
        read_state(&self.inner.schedule)
    }

    /// Enregistre les deux jobs. Premier tick de sonde un intervalle après l'appel.
    pub fn start(&self, schedule: ScheduleConfig) -> Result<(), SchedulerError> {
        let scheduler = &self.inner.scheduler;
        let weak = Arc::downgrade(&self.inner);
        scheduler.schedule(
            PROBE_JOB,
            Duration::from_secs(schedule.probe_interval_secs),
            move || run_upgraded(weak.clone(), |inner| async move {
                inner.probe_tick().await;
            }),
        )?;

        let weak = Arc::downgrade(&self.inner);
        if let Err(e) = scheduler.schedule(
            SAMPLE_JOB,
            Duration::from_secs(schedule.sample_interval_secs),
            move || run_upgraded(weak.clone(), |inner| async move {
                inner.sample_tick().await;
            }),
        ) {
            scheduler.shutdown();
            return Err(e);
        }

        replace_state(&self.inner.schedule, schedule);
        info!(
            probe_interval_secs = schedule.probe_interval_secs,
            sample_interval_secs = schedule.sample_interval_secs,
            "monitor started"
        );
        Ok(())
    }

    /// Change l'intervalle de sonde. Le schedule partagé n'est mis à jour
    /// qu'après une reprogrammation réussie.
    pub fn set_probe_interval(&self, secs: u64) -> Result<(), SchedulerError> {
        self.inner
            .scheduler
            .reschedule(PROBE_JOB, Duration::from_secs(secs))?;
        self.inner.schedule.lock().probe_interval_secs = secs;
        Ok(())
    }

    pub fn shutdown(&self) {
        self.inner.scheduler.shutdown();
    }
}

/// Les jobs tiennent un Weak : le scheduler ne garde pas le moniteur en vie
async fn run_upgraded<F, Fut>(weak: Weak<Inner>, job: F)
where
    F: FnOnce(Arc<Inner>) -> Fut,
    Fut: std::future::Future<Output = ()>,
{
    match weak.upgrade() {
        Some(inner) => job(inner).await,
        None => debug!("monitor dropped, tick ignored"),
    }
}

impl Inner {
    async fn probe_tick(self: Arc<Self>) -> usize {
        let store = self.store.clone();
        let hosts = match tokio::task::spawn_blocking(move || store.list_hosts()).await {
            Ok(Ok(hosts)) => hosts,
            Ok(Err(e)) => {
                error!(error = %e, "cannot read host list, probe tick skipped");
                return 0;
            }
            Err(e) => {
                error!(error = %e, "host list task failed, probe tick skipped");
                return 0;
            }
        };
        if hosts.is_empty() {
            debug!("no hosts registered");
            return 0;
        }

        let total = hosts.len();
        let results: Vec<ProbeResult> = stream::iter(hosts)
            .map(|host| {
                let inner = self.clone();
                async move { inner.prober.probe(&host).await }
            })
            .buffer_unordered(self.max_concurrency)
            .collect()
            .await;

        match self.persist(results).await {
            Ok(recorded) => {
                debug!(hosts = total, recorded, "probe tick finished");
                recorded
            }
            Err(e) => {
                error!(hosts = total, error = %e, "probe tick results kept in memory, not yet persisted");
                0
            }
        }
    }

    async fn probe_host(&self, host: &str) -> Result<ProbeResult, StoreError> {
        let result = self.prober.probe(host).await;
        match self.persist(vec![result.clone()]).await {
            Ok(_) => {
                debug!(host, status = ?result.status(), latency_ms = ?result.latency(), "probe recorded");
                Ok(result)
            }
            Err(e) => {
                error!(host, error = %e, "probe result kept in memory, not yet persisted");
                Err(e)
            }
        }
    }

    /// Un lot = un seul commit, hors des workers tokio
    async fn persist(&self, results: Vec<ProbeResult>) -> Result<usize, StoreError> {
        let store = self.store.clone();
        tokio::task::spawn_blocking(move || store.append_batch(results))
            .await
            .map_err(|e| StoreError::Io(std::io::Error::other(e)))?
    }

    async fn sample_tick(&self) -> BandwidthSnapshot {
        let snapshot = self.sampler.sample().await;
        replace_state(&self.bandwidth, snapshot.clone());
        snapshot
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::CommandSpec;
    use crate::models::ProbeStatus;
    use crate::store::{JsonStore, ResultQuery};
    use std::time::Instant;

    fn sh(script: &str) -> CommandSpec {
        CommandSpec::new("sh", ["-c", script, "{host}"])
    }

    fn monitor_with(store: Arc<JsonStore>, ping: &str, speedtest: &str) -> Monitor {
        let prober = Prober::new(sh(ping), Duration::from_secs(5));
        let sampler = Sampler::new(sh(speedtest), Duration::from_secs(5)).with_identity_queries(Vec::new());
        Monitor::new(store, prober, sampler, 4)
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn probe_tick_records_one_result_per_host() {
        let store = Arc::new(JsonStore::in_memory(0));
        for host in ["good-1", "bad", "good-2"] {
            store.add_host(host).unwrap();
        }
        // "$0" is the host name
        let monitor = monitor_with(
            store.clone(),
            r#"case "$0" in bad) exit 1;; *) echo 'time=4.2 ms';; esac"#,
            "exit 1",
        );

        assert_eq!(monitor.probe_tick().await, 3);

        let bad = store.query(&ResultQuery::for_host("bad", 10)).unwrap();
        assert_eq!(bad.len(), 1);
        assert_eq!(bad[0].status(), ProbeStatus::Fail);
        assert_eq!(bad[0].latency(), None);

        for host in ["good-1", "good-2"] {
            let ok = store.query(&ResultQuery::for_host(host, 10)).unwrap();
            assert_eq!(ok.len(), 1);
            assert_eq!(ok[0].latency(), Some(4.2));
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn probe_tick_commits_once_per_tick() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(JsonStore::open(dir.path().join("netwatch.json"), 0).unwrap());
        for host in ["a", "b", "c"] {
            store.add_host(host).unwrap();
        }
        let writes_before = store.writes();
        let monitor = monitor_with(store.clone(), "echo 'time=1 ms'", "exit 1");

        assert_eq!(monitor.probe_tick().await, 3);
        assert_eq!(store.writes(), writes_before + 1);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn probe_tick_runs_at_most_max_concurrency_pings() {
        let dir = tempfile::tempdir().unwrap();
        let active = dir.path().join("active");
        std::fs::create_dir(&active).unwrap();
        let peaks = dir.path().join("peaks");

        let store = Arc::new(JsonStore::in_memory(0));
        for i in 0..6 {
            store.add_host(&format!("host-{i}")).unwrap();
        }
        // each ping marks itself active, records how many are active, then leaves
        let script = format!(
            r#"touch {active}/"$0"; ls {active} | wc -l >> {peaks}; sleep 0.3; rm -f {active}/"$0"; echo 'time=1 ms'"#,
            active = shell_words::quote(&active.to_string_lossy()),
            peaks = shell_words::quote(&peaks.to_string_lossy()),
        );
        let prober = Prober::new(sh(&script), Duration::from_secs(5));
        let sampler = Sampler::new(sh("exit 1"), Duration::from_secs(5)).with_identity_queries(Vec::new());
        let monitor = Monitor::new(store.clone(), prober, sampler, 2);

        let started = Instant::now();
        assert_eq!(monitor.probe_tick().await, 6);
        let elapsed = started.elapsed();

        let counts: Vec<usize> = std::fs::read_to_string(&peaks)
            .unwrap()
            .lines()
            .map(|line| line.trim().parse().unwrap())
            .collect();
        assert_eq!(counts.len(), 6);
        assert!(counts.iter().all(|&n| n <= 2), "active pings per sample: {counts:?}");
        // 6 pings of 0.3 s, 2 at a time: three waves
        assert!(elapsed >= Duration::from_millis(850), "tick took {elapsed:?}");
    }

    #[tokio::test]
    async fn probe_tick_without_hosts_is_a_no_op() {
        let store = Arc::new(JsonStore::in_memory(0));
        let monitor = monitor_with(store.clone(), "exit 0", "exit 0");
        assert_eq!(monitor.probe_tick().await, 0);
        assert!(store.query(&ResultQuery::default()).unwrap().is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn sample_tick_replaces_snapshot() {
        let store = Arc::new(JsonStore::in_memory(0));
        let monitor = monitor_with(store, "exit 0", r#"echo '{"download": 50000000, "upload": 10000000}'"#);
        assert_eq!(monitor.bandwidth(), BandwidthSnapshot::default());

        let snapshot = monitor.sample_tick().await;
        assert_eq!(snapshot.download, 50.0);
        assert_eq!(snapshot.upload, 10.0);
        assert_eq!(snapshot.ssid, "N/A");
        assert_eq!(monitor.bandwidth(), snapshot);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn failed_sample_resets_snapshot() {
        let store = Arc::new(JsonStore::in_memory(0));
        let monitor = monitor_with(store, "exit 0", "exit 3");
        replace_state(
            &monitor.inner.bandwidth,
            BandwidthSnapshot { ssid: "home".into(), download: 80.0, upload: 20.0 },
        );
        monitor.sample_tick().await;
        assert_eq!(monitor.bandwidth(), BandwidthSnapshot::unavailable());
    }

    #[tokio::test]
    async fn set_probe_interval_updates_schedule_only_on_success() {
        let store = Arc::new(JsonStore::in_memory(0));
        let monitor = monitor_with(store, "exit 0", "exit 0");

        // not started yet: no probe job to reschedule
        assert_eq!(
            monitor.set_probe_interval(10),
            Err(SchedulerError::UnknownJob(PROBE_JOB.into()))
        );
        assert_eq!(monitor.schedule().probe_interval_secs, 60);

        monitor.start(ScheduleConfig::default()).unwrap();
        monitor.set_probe_interval(10).unwrap();
        assert_eq!(monitor.schedule().probe_interval_secs, 10);
        assert_eq!(monitor.scheduler().interval(PROBE_JOB), Some(Duration::from_secs(10)));

        assert!(monitor.set_probe_interval(0).is_err());
        assert_eq!(monitor.schedule().probe_interval_secs, 10);
        monitor.shutdown();
    }

    #[tokio::test]
    async fn start_registers_both_jobs_once() {
        let store = Arc::new(JsonStore::in_memory(0));
        let monitor = monitor_with(store, "exit 0", "exit 0");
        let schedule = ScheduleConfig { probe_interval_secs: 30, sample_interval_secs: 300 };

        monitor.start(schedule).unwrap();
        assert_eq!(monitor.scheduler().jobs(), vec![SAMPLE_JOB.to_string(), PROBE_JOB.to_string()]);
        assert_eq!(monitor.schedule(), schedule);
        assert_eq!(
            monitor.start(schedule),
            Err(SchedulerError::DuplicateJob(PROBE_JOB.into()))
        );
        monitor.shutdown();
        assert!(monitor.scheduler().jobs().is_empty());
    }
}
