//! The process-wide stream session and its controller.
//!
//! [`StreamController`] is the single owner of the running pipeline. All
//! launch/stop calls are serialized behind one async mutex, so there is
//! never more than one process chain alive. Status reads go through
//! atomics and never wait for a launch in progress.

pub mod pump;

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use fmgo_protocol::{Band, Gain, LaunchError, StationConfig, TuningRequest};
use log::{error, info, warn};
use tokio::sync::{broadcast, Mutex, RwLock};
use tokio_util::sync::CancellationToken;

use crate::device::DeviceMonitor;
use crate::pipeline::{epoch_gain_override, ChainSpawner, PipelineConfig, ProcessChain};
use crate::settings::PipelineSettings;

use pump::EofVerdict;
pub use pump::Subscription;

/// Chunks buffered per listener before it starts skipping.
const LISTENER_BUFFER_CHUNKS: usize = 64;

/// Why a launch is happening; decides how long the old stream gets to stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchMode {
    /// Changing frequency on a running stream.
    Retune,
    /// Starting playback.
    ColdStart,
}

/// Outcome of a successful launch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LaunchReport {
    pub frequency_hz: u32,
    pub band: Band,
    /// Gain actually used, after the first-launch ceiling.
    pub gain: Gain,
    /// Attempts it took (1 unless the device was slow to release).
    pub attempts: u32,
}

/// Point-in-time view of the session for status reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub is_playing: bool,
    pub current_frequency: Option<u32>,
}

struct ActiveSession {
    generation: u64,
    frequency_hz: u32,
    chain: ProcessChain,
    cancel: CancellationToken,
}

/// Owner of the live pipeline.
pub struct StreamController {
    device: Arc<dyn DeviceMonitor>,
    spawner: Arc<dyn ChainSpawner>,
    settings: PipelineSettings,
    /// Held for the whole of every launch and stop.
    session: Mutex<Option<ActiveSession>>,
    /// Where listeners subscribe while a session is live.
    publisher: RwLock<Option<broadcast::Sender<Bytes>>>,
    playing: AtomicBool,
    /// 0 when idle.
    current_frequency: AtomicU32,
    /// Set at process start, cleared by the first successful launch.
    epoch_pending: AtomicBool,
    /// Latched once the current session's death has been reported.
    death_reported: AtomicBool,
    generation: AtomicU64,
    next_listener: AtomicU64,
}

impl StreamController {
    pub fn new(
        device: Arc<dyn DeviceMonitor>,
        spawner: Arc<dyn ChainSpawner>,
        settings: PipelineSettings,
    ) -> Arc<Self> {
        Arc::new(Self {
            device,
            spawner,
            settings,
            session: Mutex::new(None),
            publisher: RwLock::new(None),
            playing: AtomicBool::new(false),
            current_frequency: AtomicU32::new(0),
            epoch_pending: AtomicBool::new(true),
            death_reported: AtomicBool::new(false),
            generation: AtomicU64::new(0),
            next_listener: AtomicU64::new(0),
        })
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    pub fn is_playing(&self) -> bool {
        self.playing.load(Ordering::SeqCst)
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let frequency = self.current_frequency.load(Ordering::SeqCst);
        SessionSnapshot {
            is_playing: self.is_playing(),
            current_frequency: (frequency != 0).then_some(frequency),
        }
    }

    /// Cheap presence check, safe for status polling.
    pub async fn device_present(&self) -> bool {
        self.device.present().await
    }

    /// Start streaming `request`, replacing any running stream.
    ///
    /// The previous pipeline is fully torn down before the new one starts.
    /// If the demodulator dies within the liveness window the launch is
    /// retried after a backoff, up to `max_attempts` in total.
    ///
    /// The work runs on its own task, so dropping the returned future does
    /// not abandon a half-finished launch.
    pub async fn launch(
        self: &Arc<Self>,
        request: TuningRequest,
        station: &StationConfig,
        mode: LaunchMode,
    ) -> Result<LaunchReport, LaunchError> {
        let this = Arc::clone(self);
        let station = station.clone();
        let task = tokio::spawn(async move { this.run_launch(request, &station, mode).await });
        match task.await {
            Ok(result) => result,
            Err(e) => {
                error!("Launch task failed: {}", e);
                Err(LaunchError::Unexpected(e.to_string()))
            }
        }
    }

    async fn run_launch(
        self: &Arc<Self>,
        request: TuningRequest,
        station: &StationConfig,
        mode: LaunchMode,
    ) -> Result<LaunchReport, LaunchError> {
        let mut session = self.session.lock().await;

        if session.is_some() {
            let timeout = match mode {
                LaunchMode::Retune => self.settings.retune_stop_timeout(),
                LaunchMode::ColdStart => self.settings.cold_stop_timeout(),
            };
            info!("Stopping current stream before tuning to {} Hz", request.frequency_hz);
            self.teardown(&mut session, timeout).await;
            tokio::time::sleep(self.settings.settle_delay()).await;
        }

        if !self.device.present().await {
            error!("RTL-SDR not detected");
            return Err(LaunchError::DeviceNotPresent);
        }

        let gain = self.resolve_gain(request.gain);
        let config = PipelineConfig::derive(&request, gain, station, &self.settings);
        info!(
            "Starting {} stream at {} Hz (tuned {} Hz, gain {}, {} kbps)",
            config.band.name(),
            config.frequency_hz,
            config.tuned_frequency_hz,
            config.gain,
            config.bitrate_kbps
        );

        let attempts = self.settings.max_attempts.max(1);
        for attempt in 1..=attempts {
            // A partially spawned chain is killed when the error drops it.
            let mut chain = self.spawner.spawn(&config).map_err(|e| {
                error!("Error starting stream: {}", e);
                LaunchError::Unexpected(e.to_string())
            })?;

            tokio::time::sleep(self.settings.liveness_window()).await;

            if chain.demod_alive() {
                self.activate(&mut session, chain, &config).await?;
                return Ok(LaunchReport {
                    frequency_hz: config.frequency_hz,
                    band: config.band,
                    gain: config.gain,
                    attempts: attempt,
                });
            }

            let diagnostic = chain.shutdown(self.settings.retune_stop_timeout()).await;
            warn!(
                "Attempt {}/{}: demodulator exited during startup{}",
                attempt,
                attempts,
                diagnostic.map(|line| format!(" ({})", line)).unwrap_or_default()
            );
            if attempt < attempts {
                let backoff = self.settings.backoff_after(attempt);
                info!("Device may not be released yet, retrying in {:?}", backoff);
                tokio::time::sleep(backoff).await;
            }
        }

        error!("Giving up after {} attempts to claim the tuner", attempts);
        Err(LaunchError::ClaimFailed { attempts })
    }

    /// Startup path: wait for the device to settle, confirm it can be
    /// claimed with one probe per attempt, then launch.
    pub async fn launch_at_startup(
        self: &Arc<Self>,
        request: TuningRequest,
        station: &StationConfig,
    ) -> Result<LaunchReport, LaunchError> {
        let attempts = self.settings.max_attempts.max(1);
        for attempt in 1..=attempts {
            tokio::time::sleep(self.settings.startup_delay()).await;
            if !self.device.present().await {
                return Err(LaunchError::DeviceNotPresent);
            }
            if self.device.probe().await {
                return self.launch(request, station, LaunchMode::ColdStart).await;
            }
            warn!("Startup probe {}/{}: tuner not claimable yet", attempt, attempts);
        }
        Err(LaunchError::ClaimFailed { attempts })
    }

    /// Stop streaming. A no-op when nothing is running; never fails.
    ///
    /// Like [`launch`](Self::launch), the teardown finishes even if the
    /// caller goes away.
    pub async fn stop(self: &Arc<Self>, timeout: Duration) {
        // Listeners and status see the stop before the lock is won.
        self.playing.store(false, Ordering::SeqCst);
        let this = Arc::clone(self);
        let task = tokio::spawn(async move {
            let mut session = this.session.lock().await;
            this.teardown(&mut session, timeout).await;
        });
        if let Err(e) = task.await {
            error!("Stop task failed: {}", e);
        }
    }

    /// Subscribe to the live audio. `None` when no session is playing.
    pub async fn subscribe(&self) -> Option<Subscription> {
        if !self.is_playing() {
            return None;
        }
        let rx = self.publisher.read().await.as_ref()?.subscribe();
        let id = self.next_listener.fetch_add(1, Ordering::SeqCst) + 1;
        Some(Subscription::new(id, rx))
    }

    fn resolve_gain(&self, requested: Option<Gain>) -> Gain {
        if self.epoch_pending.load(Ordering::SeqCst) {
            if let Some(clamped) = epoch_gain_override(requested, self.settings.epoch_gain_ceiling) {
                warn!(
                    "First stream since start: gain {} lowered to {} to protect the RF front end",
                    requested.map(|g| g.to_string()).unwrap_or_else(|| "unset".to_string()),
                    clamped
                );
                return clamped;
            }
        }
        requested.unwrap_or(Gain::Auto)
    }

    async fn activate(
        self: &Arc<Self>,
        session: &mut Option<ActiveSession>,
        mut chain: ProcessChain,
        config: &PipelineConfig,
    ) -> Result<(), LaunchError> {
        let Some(output) = chain.take_output() else {
            chain.shutdown(self.settings.cold_stop_timeout()).await;
            return Err(LaunchError::Unexpected("encoder output unavailable".to_string()));
        };

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let (tx, _) = broadcast::channel(LISTENER_BUFFER_CHUNKS);
        let cancel = CancellationToken::new();
        tokio::spawn(pump::run(
            Arc::downgrade(self),
            generation,
            output,
            tx.clone(),
            cancel.clone(),
            self.settings.chunk_size,
        ));

        *self.publisher.write().await = Some(tx);
        *session = Some(ActiveSession {
            generation,
            frequency_hz: config.frequency_hz,
            chain,
            cancel,
        });
        self.current_frequency.store(config.frequency_hz, Ordering::SeqCst);
        self.death_reported.store(false, Ordering::SeqCst);
        self.epoch_pending.store(false, Ordering::SeqCst);
        self.playing.store(true, Ordering::SeqCst);

        info!("[Session {}] Stream started at {} Hz", generation, config.frequency_hz);
        Ok(())
    }

    /// Mark idle, close the listeners, then terminate the processes.
    async fn teardown(&self, session: &mut Option<ActiveSession>, timeout: Duration) {
        self.playing.store(false, Ordering::SeqCst);
        self.current_frequency.store(0, Ordering::SeqCst);
        self.publisher.write().await.take();

        let Some(active) = session.take() else {
            return;
        };
        active.cancel.cancel();
        active.chain.shutdown(timeout).await;
        info!("[Session {}] Streaming stopped", active.generation);
    }

    /// Called by the pump when the encoder output returned nothing.
    pub(crate) async fn handle_encoder_eof(&self, generation: u64, force: bool) -> EofVerdict {
        let mut session = self.session.lock().await;
        let (exited, frequency) = match session.as_mut() {
            Some(active) if active.generation == generation => {
                (force || active.chain.encoder_exited(), active.frequency_hz)
            }
            _ => return EofVerdict::Finished,
        };
        if !exited {
            return EofVerdict::Stalled;
        }

        if !self.death_reported.swap(true, Ordering::SeqCst) {
            error!(
                "[Session {}] Audio pipeline terminated unexpectedly at {} Hz",
                generation, frequency
            );
        }
        self.teardown(&mut session, self.settings.retune_stop_timeout()).await;
        EofVerdict::Finished
    }

    #[cfg(test)]
    pub(crate) fn death_reported(&self) -> bool {
        self.death_reported.load(Ordering::SeqCst)
    }
}

#[cfg(all(test, unix))]
pub(crate) mod tests {
    use super::*;
    use std::io;
    use std::sync::Mutex as StdMutex;

    use async_trait::async_trait;
    use futures::StreamExt;

    use crate::pipeline::StageCommand;

    /// Script that keeps producing output like a live demodulator.
    pub(crate) const LIVE: &str = "while :; do echo frame; sleep 0.02; done";
    /// Script that dies right away like a demodulator that cannot claim the device.
    pub(crate) const CLAIM_FAILS: &str = "echo 'usb_claim_interface error -6' >&2; exit 1";

    #[derive(Default)]
    pub(crate) struct FakeDevice {
        pub absent: AtomicBool,
        pub unclaimable: AtomicBool,
        pub present_calls: AtomicU32,
        pub probe_calls: AtomicU32,
    }

    #[async_trait]
    impl DeviceMonitor for FakeDevice {
        async fn present(&self) -> bool {
            self.present_calls.fetch_add(1, Ordering::SeqCst);
            !self.absent.load(Ordering::SeqCst)
        }

        async fn probe(&self) -> bool {
            self.probe_calls.fetch_add(1, Ordering::SeqCst);
            !self.unclaimable.load(Ordering::SeqCst)
        }
    }

    /// Runs shell scripts in place of rtl_fm | sox | ffmpeg.
    pub(crate) struct ScriptSpawner {
        pub demod_scripts: StdMutex<Vec<String>>,
        pub configs: StdMutex<Vec<PipelineConfig>>,
        pub pid_dir: tempfile::TempDir,
    }

    impl ScriptSpawner {
        pub fn new(demod_scripts: &[&str]) -> Self {
            Self {
                demod_scripts: StdMutex::new(demod_scripts.iter().rev().map(|s| s.to_string()).collect()),
                configs: StdMutex::new(Vec::new()),
                pid_dir: tempfile::tempdir().unwrap(),
            }
        }

        pub fn spawn_count(&self) -> usize {
            self.configs.lock().unwrap().len()
        }

        pub fn gains(&self) -> Vec<Gain> {
            self.configs.lock().unwrap().iter().map(|c| c.gain).collect()
        }

        /// Pids of every demodulator started so far, in order.
        pub fn demod_pids(&self) -> Vec<i32> {
            std::fs::read_to_string(self.pid_dir.path().join("pids"))
                .unwrap_or_default()
                .lines()
                .filter_map(|l| l.trim().parse().ok())
                .collect()
        }
    }

    impl ChainSpawner for ScriptSpawner {
        fn spawn(&self, config: &PipelineConfig) -> io::Result<ProcessChain> {
            self.configs.lock().unwrap().push(config.clone());
            // The last script repeats once the list runs out.
            let script = {
                let mut scripts = self.demod_scripts.lock().unwrap();
                if scripts.len() > 1 {
                    scripts.pop().unwrap()
                } else {
                    scripts.last().cloned().unwrap_or_else(|| LIVE.to_string())
                }
            };
            let pid_file = self.pid_dir.path().join("pids");
            let demod = format!("echo $$ >> {}; {}", pid_file.display(), script);
            ProcessChain::spawn([
                StageCommand::new("demod", "sh").args(["-c".to_string(), demod]),
                StageCommand::new("resampler", "cat"),
                StageCommand::new("encoder", "cat"),
            ])
        }
    }

    pub(crate) fn fast_settings() -> PipelineSettings {
        PipelineSettings {
            liveness_ms: 200,
            settle_ms: 10,
            retune_stop_ms: 500,
            cold_stop_ms: 500,
            first_backoff_ms: 20,
            backoff_ms: 10,
            startup_delay_ms: 10,
            chunk_size: 1024,
            ..PipelineSettings::default()
        }
    }

    pub(crate) fn controller(
        device: Arc<FakeDevice>,
        spawner: Arc<ScriptSpawner>,
    ) -> Arc<StreamController> {
        StreamController::new(device, spawner, fast_settings())
    }

    fn fm(frequency: i64, gain: Option<Gain>) -> TuningRequest {
        TuningRequest::new(frequency, gain).unwrap()
    }

    pub(crate) fn process_alive(pid: i32) -> bool {
        use nix::sys::signal::kill;
        use nix::unistd::Pid;
        kill(Pid::from_raw(pid), None).is_ok()
    }

    #[tokio::test]
    async fn test_launch_stream_and_stop() {
        let device = Arc::new(FakeDevice::default());
        let spawner = Arc::new(ScriptSpawner::new(&[LIVE]));
        let controller = controller(device.clone(), spawner.clone());

        let report = controller
            .launch(fm(99_500_000, Some(Gain::Manual(5.0))), &StationConfig::default(), LaunchMode::ColdStart)
            .await
            .unwrap();
        assert_eq!(report.frequency_hz, 99_500_000);
        assert_eq!(report.attempts, 1);
        assert_eq!(
            controller.snapshot(),
            SessionSnapshot {
                is_playing: true,
                current_frequency: Some(99_500_000)
            }
        );
        // Presence only; the probe is not part of the hot path.
        assert_eq!(device.probe_calls.load(Ordering::SeqCst), 0);

        let subscription = controller.subscribe().await.expect("session is playing");
        let mut stream = Box::pin(subscription.into_stream());
        let chunk = tokio::time::timeout(Duration::from_secs(2), stream.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert!(chunk.starts_with(b"frame"));

        controller.stop(Duration::from_millis(500)).await;
        assert!(!controller.is_playing());
        assert_eq!(controller.snapshot().current_frequency, None);
        // Listeners end once the session is gone.
        let rest = tokio::time::timeout(Duration::from_secs(2), stream.collect::<Vec<_>>()).await;
        assert!(rest.is_ok());
        for pid in spawner.demod_pids() {
            assert!(!process_alive(pid));
        }

        // Idempotent.
        controller.stop(Duration::from_millis(500)).await;
        assert!(!controller.is_playing());
        assert!(controller.subscribe().await.is_none());
    }

    #[tokio::test]
    async fn test_device_absent_spawns_nothing() {
        let device = Arc::new(FakeDevice::default());
        device.absent.store(true, Ordering::SeqCst);
        let spawner = Arc::new(ScriptSpawner::new(&[LIVE]));
        let controller = controller(device, spawner.clone());

        let result = controller
            .launch(fm(99_500_000, None), &StationConfig::default(), LaunchMode::ColdStart)
            .await;
        assert_eq!(result, Err(LaunchError::DeviceNotPresent));
        assert_eq!(spawner.spawn_count(), 0);
        assert!(!controller.is_playing());
    }

    #[tokio::test]
    async fn test_claim_failure_retries_exactly_once() {
        let device = Arc::new(FakeDevice::default());
        let spawner = Arc::new(ScriptSpawner::new(&[CLAIM_FAILS]));
        let controller = controller(device, spawner.clone());

        let result = controller
            .launch(fm(99_500_000, None), &StationConfig::default(), LaunchMode::ColdStart)
            .await;
        assert_eq!(result, Err(LaunchError::ClaimFailed { attempts: 2 }));
        assert_eq!(spawner.spawn_count(), 2);
        assert!(!controller.is_playing());
        assert!(controller.subscribe().await.is_none());
    }

    #[tokio::test]
    async fn test_second_attempt_can_succeed() {
        let device = Arc::new(FakeDevice::default());
        let spawner = Arc::new(ScriptSpawner::new(&[CLAIM_FAILS, LIVE]));
        let controller = controller(device, spawner.clone());

        let report = controller
            .launch(fm(99_500_000, None), &StationConfig::default(), LaunchMode::ColdStart)
            .await
            .unwrap();
        assert_eq!(report.attempts, 2);
        assert!(controller.is_playing());
        controller.stop(Duration::from_millis(500)).await;
    }

    #[tokio::test]
    async fn test_first_launch_gain_ceiling() {
        let device = Arc::new(FakeDevice::default());
        let spawner = Arc::new(ScriptSpawner::new(&[LIVE]));
        let controller = controller(device, spawner.clone());
        let station = StationConfig::default();

        let first = controller
            .launch(fm(99_500_000, Some(Gain::Auto)), &station, LaunchMode::ColdStart)
            .await
            .unwrap();
        assert_eq!(first.gain, Gain::Manual(0.0));

        let second = controller
            .launch(fm(99_500_000, Some(Gain::Auto)), &station, LaunchMode::Retune)
            .await
            .unwrap();
        assert_eq!(second.gain, Gain::Auto);

        let third = controller
            .launch(fm(99_500_000, Some(Gain::Manual(40.0))), &station, LaunchMode::Retune)
            .await
            .unwrap();
        assert_eq!(third.gain, Gain::Manual(40.0));
        assert_eq!(
            spawner.gains(),
            vec![Gain::Manual(0.0), Gain::Auto, Gain::Manual(40.0)]
        );
        controller.stop(Duration::from_millis(500)).await;
    }

    #[tokio::test]
    async fn test_low_first_gain_is_kept() {
        let device = Arc::new(FakeDevice::default());
        let spawner = Arc::new(ScriptSpawner::new(&[LIVE]));
        let controller = controller(device, spawner);

        let report = controller
            .launch(fm(99_500_000, Some(Gain::Manual(8.7))), &StationConfig::default(), LaunchMode::ColdStart)
            .await
            .unwrap();
        assert_eq!(report.gain, Gain::Manual(8.7));
        controller.stop(Duration::from_millis(500)).await;
    }

    #[tokio::test]
    async fn test_relaunch_replaces_previous_pipeline() {
        let device = Arc::new(FakeDevice::default());
        let spawner = Arc::new(ScriptSpawner::new(&[LIVE]));
        let controller = controller(device, spawner.clone());
        let station = StationConfig::default();

        controller
            .launch(fm(99_500_000, None), &station, LaunchMode::ColdStart)
            .await
            .unwrap();
        controller
            .launch(fm(101_100_000, None), &station, LaunchMode::Retune)
            .await
            .unwrap();

        let pids = spawner.demod_pids();
        assert_eq!(pids.len(), 2);
        assert!(!process_alive(pids[0]), "previous demodulator still running");
        assert!(process_alive(pids[1]));
        assert_eq!(controller.snapshot().current_frequency, Some(101_100_000));

        controller.stop(Duration::from_millis(500)).await;
        assert!(!process_alive(pids[1]));
    }

    #[tokio::test]
    async fn test_concurrent_launches_leave_one_pipeline() {
        let device = Arc::new(FakeDevice::default());
        let spawner = Arc::new(ScriptSpawner::new(&[LIVE]));
        let controller = controller(device, spawner.clone());
        let station = StationConfig::default();

        let (a, b) = tokio::join!(
            controller.launch(fm(99_500_000, None), &station, LaunchMode::ColdStart),
            controller.launch(fm(101_100_000, None), &station, LaunchMode::ColdStart),
        );
        assert!(a.is_ok() && b.is_ok());

        let alive: Vec<i32> = spawner.demod_pids().into_iter().filter(|pid| process_alive(*pid)).collect();
        assert_eq!(alive.len(), 1);
        assert!(controller.is_playing());
        controller.stop(Duration::from_millis(500)).await;
    }

    #[tokio::test]
    async fn test_abandoned_relaunch_still_completes() {
        let device = Arc::new(FakeDevice::default());
        let spawner = Arc::new(ScriptSpawner::new(&[LIVE]));
        let controller = controller(device, spawner.clone());
        let station = StationConfig::default();

        controller
            .launch(fm(99_500_000, None), &station, LaunchMode::ColdStart)
            .await
            .unwrap();

        // Caller gives up while the new demodulator is still in its liveness window.
        let relaunch = controller.launch(fm(101_100_000, None), &station, LaunchMode::Retune);
        assert!(tokio::time::timeout(Duration::from_millis(100), relaunch).await.is_err());
        tokio::time::sleep(Duration::from_millis(800)).await;

        assert_eq!(
            controller.snapshot(),
            SessionSnapshot {
                is_playing: true,
                current_frequency: Some(101_100_000)
            }
        );
        let alive: Vec<i32> = spawner.demod_pids().into_iter().filter(|pid| process_alive(*pid)).collect();
        assert_eq!(alive.len(), 1);
        assert_eq!(spawner.spawn_count(), 2);
        controller.stop(Duration::from_millis(500)).await;
    }

    #[tokio::test]
    async fn test_stop_timeout_follows_launch_mode() {
        // Ignores SIGTERM and never writes after startup, so only the kill ends it.
        const STUBBORN: &str = "trap '' TERM; echo frame; while :; do sleep 0.05; done";

        let device = Arc::new(FakeDevice::default());
        let spawner = Arc::new(ScriptSpawner::new(&[STUBBORN]));
        let settings = PipelineSettings {
            retune_stop_ms: 300,
            cold_stop_ms: 1500,
            ..fast_settings()
        };
        let controller = StreamController::new(device, spawner.clone(), settings);
        let station = StationConfig::default();

        controller
            .launch(fm(99_500_000, None), &station, LaunchMode::ColdStart)
            .await
            .unwrap();

        let started = std::time::Instant::now();
        controller
            .launch(fm(101_100_000, None), &station, LaunchMode::Retune)
            .await
            .unwrap();
        let retune = started.elapsed();
        assert!(retune >= Duration::from_millis(300), "retune took {:?}", retune);
        assert!(retune < Duration::from_millis(1200), "retune took {:?}", retune);

        let started = std::time::Instant::now();
        controller
            .launch(fm(99_500_000, None), &station, LaunchMode::ColdStart)
            .await
            .unwrap();
        let cold = started.elapsed();
        assert!(cold >= Duration::from_millis(1500), "cold start took {:?}", cold);

        let pids = spawner.demod_pids();
        assert_eq!(pids.len(), 3);
        assert!(!process_alive(pids[0]));
        assert!(!process_alive(pids[1]));

        controller.stop(Duration::from_millis(100)).await;
        assert!(!process_alive(pids[2]));
    }

    #[tokio::test]
    async fn test_pipeline_death_ends_session_once() {
        let device = Arc::new(FakeDevice::default());
        // Outlives the liveness window, then dies mid-stream.
        let spawner = Arc::new(ScriptSpawner::new(&[
            "i=0; while [ $i -lt 20 ]; do echo frame; sleep 0.03; i=$((i+1)); done",
        ]));
        let controller = controller(device, spawner);

        controller
            .launch(fm(99_500_000, None), &StationConfig::default(), LaunchMode::ColdStart)
            .await
            .unwrap();
        let stream = controller.subscribe().await.unwrap().into_stream();

        let chunks = tokio::time::timeout(Duration::from_secs(5), stream.collect::<Vec<_>>())
            .await
            .expect("stream should end when the pipeline dies");
        assert!(!chunks.is_empty());
        assert!(chunks.iter().all(|c| c.is_ok()));

        assert!(!controller.is_playing());
        assert!(controller.death_reported());
        assert!(controller.subscribe().await.is_none());
    }

    #[tokio::test]
    async fn test_startup_probes_once_per_attempt() {
        let device = Arc::new(FakeDevice::default());
        device.unclaimable.store(true, Ordering::SeqCst);
        let spawner = Arc::new(ScriptSpawner::new(&[LIVE]));
        let controller = controller(device.clone(), spawner.clone());

        let result = controller
            .launch_at_startup(fm(99_500_000, None), &StationConfig::default())
            .await;
        assert_eq!(result, Err(LaunchError::ClaimFailed { attempts: 2 }));
        assert_eq!(device.probe_calls.load(Ordering::SeqCst), 2);
        assert_eq!(spawner.spawn_count(), 0);

        device.unclaimable.store(false, Ordering::SeqCst);
        controller
            .launch_at_startup(fm(99_500_000, None), &StationConfig::default())
            .await
            .unwrap();
        assert_eq!(device.probe_calls.load(Ordering::SeqCst), 3);
        assert!(controller.is_playing());
        controller.stop(Duration::from_millis(500)).await;
    }
}
