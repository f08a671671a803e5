/*!
 * SCHEDULER - Tâches périodiques reprogrammables à chaud
 *
 * RÔLE :
 * Fait tourner les deux jobs du moniteur (`probe`, `bandwidth`) sur des
 * intervalles indépendants, modifiables sans redémarrer le process.
 *
 * FONCTIONNEMENT :
 * - Chaque job = une tâche timer tokio + un verrou de ré-entrance (AtomicBool)
 * - Un tick qui tombe pendant une exécution est abandonné (jamais mis en file)
 * - `reschedule` retire le timer courant et en installe un nouveau sous le
 *   lock du scheduler ; l'exécution en cours se termine normalement
 * - Le verrou appartient au job, pas au timer : une exécution lancée par un
 *   timer retiré bloque encore les ticks de son remplaçant
 * - Intervalles acceptés : de 1 ns à `MAX_INTERVAL` (un an)
 */

use futures::future::BoxFuture;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Plus grand intervalle accepté (un an)
pub const MAX_INTERVAL: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Erreurs d'enregistrement / reprogrammation des jobs
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("unknown job: {0}")]
    UnknownJob(String),
    #[error("job already scheduled: {0}")]
    DuplicateJob(String),
    #[error("interval must be positive and at most one year (job {0})")]
    InvalidInterval(String),
}

type JobFn = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

/// Entrée de la table des jobs
struct Job {
    /// Intervalle courant
    interval: Duration,
    /// Fonction du job, conservée à travers les reprogrammations
    handler: JobFn,
    /// Verrou de ré-entrance partagé par tous les timers du job
    running: Arc<AtomicBool>,
    /// Incrémenté à chaque reprogrammation ; un timer d'une autre génération s'arrête
    generation: Arc<AtomicU64>,
    /// Tâche timer active
    timer: JoinHandle<()>,
}

impl Drop for Job {
    fn drop(&mut self) {
        // sans ça, un JoinHandle lâché détache le timer qui tournerait à vide
        self.timer.abort();
    }
}

/// Marque le job comme en cours ; libéré au drop, panic compris
struct RunGuard(Arc<AtomicBool>);

impl RunGuard {
    fn acquire(flag: &Arc<AtomicBool>) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag.clone()))
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Rejette zéro, au-delà de `MAX_INTERVAL`, et toute échéance non représentable
fn check_interval(job_id: &str, interval: Duration) -> Result<(), SchedulerError> {
    let representable = Instant::now().checked_add(interval).is_some();
    if interval.is_zero() || interval > MAX_INTERVAL || !representable {
        return Err(SchedulerError::InvalidInterval(job_id.to_string()));
    }
    Ok(())
}

/// Handle vers la table des jobs. Clone léger ; à utiliser dans un runtime tokio.
/// Les timers sont annulés par `shutdown()` ou quand le dernier clone est lâché.
#[derive(Clone, Default)]
pub struct Scheduler {
    jobs: Arc<Mutex<HashMap<String, Job>>>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enregistre un job répétitif. Première exécution un `interval` après l'appel.
    pub fn schedule<F, Fut>(&self, job_id: &str, interval: Duration, handler: F) -> Result<(), SchedulerError>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        check_interval(job_id, interval)?;

        let mut jobs = self.jobs.lock();
        if jobs.contains_key(job_id) {
            return Err(SchedulerError::DuplicateJob(job_id.to_string()));
        }

        let handler: JobFn = Arc::new(move || -> BoxFuture<'static, ()> { Box::pin(handler()) });
        let running = Arc::new(AtomicBool::new(false));
        let generation = Arc::new(AtomicU64::new(0));
        let timer = spawn_timer(job_id, interval, &handler, &running, &generation, 0);

        jobs.insert(
            job_id.to_string(),
            Job { interval, handler, running, generation, timer },
        );
        info!(job = job_id, interval_secs = interval.as_secs_f64(), "job scheduled");
        Ok(())
    }

    /// Change l'intervalle d'un job existant, pour les ticks futurs seulement.
    /// Un intervalle refusé laisse l'ancien timer intact.
    pub fn reschedule(&self, job_id: &str, interval: Duration) -> Result<(), SchedulerError> {
        if let Err(e) = check_interval(job_id, interval) {
            warn!(job = job_id, interval_secs = interval.as_secs_f64(), "reschedule ignored: invalid interval");
            return Err(e);
        }

        let mut jobs = self.jobs.lock();
        let Some(job) = jobs.get_mut(job_id) else {
            warn!(job = job_id, "reschedule ignored: no such job");
            return Err(SchedulerError::UnknownJob(job_id.to_string()));
        };

        // l'ancien timer relit sa génération après chaque tick : le bump suffit
        // même si l'abort arrive en plein poll
        let generation = job.generation.fetch_add(1, Ordering::AcqRel) + 1;
        job.timer.abort();
        job.timer = spawn_timer(job_id, interval, &job.handler, &job.running, &job.generation, generation);

        let previous = std::mem::replace(&mut job.interval, interval);
        info!(
            job = job_id,
            from_secs = previous.as_secs_f64(),
            to_secs = interval.as_secs_f64(),
            "job rescheduled"
        );
        Ok(())
    }

    pub fn interval(&self, job_id: &str) -> Option<Duration> {
        self.jobs.lock().get(job_id).map(|job| job.interval)
    }

    pub fn is_running(&self, job_id: &str) -> bool {
        self.jobs
            .lock()
            .get(job_id)
            .map(|job| job.running.load(Ordering::Acquire))
            .unwrap_or(false)
    }

    pub fn jobs(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.jobs.lock().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Annule tous les timers. Les exécutions en cours ne sont pas interrompues.
    pub fn shutdown(&self) {
        let mut jobs = self.jobs.lock();
        for (job_id, job) in jobs.drain() {
            job.generation.fetch_add(1, Ordering::AcqRel);
            debug!(job = %job_id, "timer cancelled");
            // Job::drop abort le timer
        }
        info!("scheduler stopped");
    }
}

fn spawn_timer(
    job_id: &str,
    interval: Duration,
    handler: &JobFn,
    running: &Arc<AtomicBool>,
    generation: &Arc<AtomicU64>,
    own_generation: u64,
) -> JoinHandle<()> {
    let job_id = job_id.to_string();
    let handler = handler.clone();
    let running = running.clone();
    let generation = generation.clone();

    tokio::spawn(async move {
        // interval déjà validé par check_interval
        let start = Instant::now().checked_add(interval).unwrap_or_else(Instant::now);
        let mut ticker = tokio::time::interval_at(start, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;
            if generation.load(Ordering::Acquire) != own_generation {
                break;
            }

            let Some(guard) = RunGuard::acquire(&running) else {
                debug!(job = %job_id, "tick skipped: previous run still in progress");
                continue;
            };

            let run = handler();
            let job = job_id.clone();
            tokio::spawn(async move {
                let _guard = guard;
                run.await;
                debug!(job = %job, "run finished");
            });
        }
    })
}
