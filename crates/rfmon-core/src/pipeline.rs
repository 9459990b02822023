//! Streaming pipeline
//!
//! Wires the stages into a real-time streaming system:
//!
//! ```text
//! SampleSource ─► [block queue] ─► Spectral ─► Demod ─► Builder
//!                                                          │
//!                    telemetry ─► [action queue] ─┐   [event queue]
//!                                                 ▼        ▼
//!                                            Correlator  Detector ─► Publisher ─► AlertSink
//! ```
//!
//! Stages are chained by bounded drop-oldest queues ([`crate::queue`]);
//! the capture loop never blocks on downstream congestion. The spectral
//! analyzer and demodulator run on one worker thread, the detector and
//! correlator on another — the transmitter profiles and the telemetry
//! window each have a single writer thread, and the alert path only ever
//! sees snapshot copies. All queue reads time out and the cooperative
//! shutdown flag is checked at every stage boundary; in-flight blocks and
//! bursts are discarded on shutdown, not flushed.
//!
//! When the source disconnects or stalls past `stall_timeout_s`, the
//! pipeline degrades to telemetry-only operation and surfaces a single
//! persistent RF_COVERAGE_LOST alert until capture recovers.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{info, warn};

use crate::alert::{AlertPublisher, AlertSink};
use crate::config::MonitorConfig;
use crate::correlator::TelemetryCorrelator;
use crate::demod::BurstDemodulator;
use crate::detector::ReplayAnomalyDetector;
use crate::event::SignalEventBuilder;
use crate::queue::{BoundedQueue, PopResult};
use crate::spectral::SpectralAnalyzer;
use crate::types::{
    Alert, AlertKind, MonitorResult, SampleBlock, Severity, SignalEvent, VehicleActionEvent,
};

/// What the sample source produced on one poll.
///
/// Transient no-data is distinct from end-of-stream and from hardware
/// disconnect, per the adapter contract.
#[derive(Debug)]
pub enum SourceEvent {
    Block(SampleBlock),
    /// Nothing available right now; poll again.
    NoData,
    /// Clean end of the stream (file sources, tests).
    EndOfStream,
    /// The hardware went away. The pipeline degrades until it returns.
    Disconnected,
}

/// Adapter over a hardware-backed (or simulated) sample source.
pub trait SampleSource: Send {
    fn next_block(&mut self) -> SourceEvent;
}

/// Message into the detection/correlation stage.
enum AnalysisInput {
    Event(SignalEvent),
    CoverageLost { timestamp: f64 },
    CoverageRestored { timestamp: f64 },
}

/// Pipeline counters, safe to read from any thread.
#[derive(Debug, Default)]
pub struct PipelineStats {
    pub blocks: AtomicU64,
    pub bursts: AtomicU64,
    pub events: AtomicU64,
    pub block_drops: AtomicU64,
    pub event_drops: AtomicU64,
    pub degraded: AtomicBool,
}

/// Handle to a running pipeline.
pub struct Pipeline {
    shutdown: Arc<AtomicBool>,
    telemetry: Arc<BoundedQueue<VehicleActionEvent>>,
    stats: Arc<PipelineStats>,
    handles: Vec<JoinHandle<()>>,
}

impl Pipeline {
    /// Validate configuration and start the stage threads.
    pub fn spawn(
        config: MonitorConfig,
        source: Box<dyn SampleSource>,
        sink: Box<dyn AlertSink>,
    ) -> MonitorResult<Self> {
        config.validate()?;

        let shutdown = Arc::new(AtomicBool::new(false));
        let stats = Arc::new(PipelineStats::default());
        let blocks: Arc<BoundedQueue<SampleBlock>> =
            Arc::new(BoundedQueue::new(config.queue_capacity));
        let analysis: Arc<BoundedQueue<AnalysisInput>> =
            Arc::new(BoundedQueue::new(config.queue_capacity));
        let telemetry: Arc<BoundedQueue<VehicleActionEvent>> =
            Arc::new(BoundedQueue::new(config.queue_capacity));

        let mut handles = Vec::new();
        handles.push(spawn_capture(
            source,
            config.stall_timeout_s,
            shutdown.clone(),
            blocks.clone(),
            analysis.clone(),
            stats.clone(),
        ));
        handles.push(spawn_dsp(
            &config,
            shutdown.clone(),
            blocks.clone(),
            analysis.clone(),
            stats.clone(),
        ));
        handles.push(spawn_analysis(
            &config,
            sink,
            shutdown.clone(),
            analysis,
            telemetry.clone(),
        ));

        Ok(Self {
            shutdown,
            telemetry,
            stats,
            handles,
        })
    }

    /// Feed one vehicle action from the telemetry bus.
    pub fn push_action(&self, action: VehicleActionEvent) {
        self.telemetry.push(action);
    }

    pub fn stats(&self) -> &PipelineStats {
        &self.stats
    }

    /// Request cooperative shutdown and join all stages. In-flight data is
    /// discarded.
    pub fn shutdown(mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
    }

    /// Wait for the pipeline to drain after the source ends its stream.
    pub fn wait(mut self) {
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
    }
}

const POLL: Duration = Duration::from_millis(50);

fn spawn_capture(
    mut source: Box<dyn SampleSource>,
    stall_timeout_s: f64,
    shutdown: Arc<AtomicBool>,
    blocks: Arc<BoundedQueue<SampleBlock>>,
    analysis: Arc<BoundedQueue<AnalysisInput>>,
    stats: Arc<PipelineStats>,
) -> JoinHandle<()> {
    thread::Builder::new()
        .name("rfmon-capture".into())
        .spawn(move || {
            let mut last_data = Instant::now();
            let mut last_ts = 0.0f64;
            while !shutdown.load(Ordering::SeqCst) {
                match source.next_block() {
                    SourceEvent::Block(block) => {
                        last_data = Instant::now();
                        last_ts = block.start_timestamp + block.duration();
                        if stats.degraded.swap(false, Ordering::SeqCst) {
                            info!("sample source recovered, leaving degraded mode");
                            analysis.push(AnalysisInput::CoverageRestored { timestamp: last_ts });
                        }
                        stats.blocks.fetch_add(1, Ordering::Relaxed);
                        blocks.push(block);
                        stats.block_drops.store(blocks.dropped(), Ordering::Relaxed);
                    }
                    SourceEvent::NoData => {
                        if !stats.degraded.load(Ordering::SeqCst)
                            && last_data.elapsed().as_secs_f64() > stall_timeout_s
                        {
                            warn!("sample source stalled, entering degraded mode");
                            stats.degraded.store(true, Ordering::SeqCst);
                            analysis.push(AnalysisInput::CoverageLost { timestamp: last_ts });
                        }
                        thread::sleep(Duration::from_millis(1));
                    }
                    SourceEvent::Disconnected => {
                        if !stats.degraded.swap(true, Ordering::SeqCst) {
                            warn!("sample source disconnected, entering degraded mode");
                            analysis.push(AnalysisInput::CoverageLost { timestamp: last_ts });
                        }
                        thread::sleep(Duration::from_millis(10));
                    }
                    SourceEvent::EndOfStream => {
                        info!("sample source ended stream");
                        break;
                    }
                }
            }
            blocks.close();
        })
        .expect("failed to spawn capture thread")
}

fn spawn_dsp(
    config: &MonitorConfig,
    shutdown: Arc<AtomicBool>,
    blocks: Arc<BoundedQueue<SampleBlock>>,
    analysis: Arc<BoundedQueue<AnalysisInput>>,
    stats: Arc<PipelineStats>,
) -> JoinHandle<()> {
    let mut analyzer = SpectralAnalyzer::new(config);
    let demod = BurstDemodulator::new(config.sample_rate);
    let mut builder = SignalEventBuilder::new();
    thread::Builder::new()
        .name("rfmon-dsp".into())
        .spawn(move || {
            while !shutdown.load(Ordering::SeqCst) {
                match blocks.pop_timeout(POLL) {
                    PopResult::Item(block) => {
                        for burst in analyzer.process_block(&block) {
                            stats.bursts.fetch_add(1, Ordering::Relaxed);
                            let result = demod.demodulate(&burst);
                            let event = builder.build(&burst, &result);
                            stats.events.fetch_add(1, Ordering::Relaxed);
                            analysis.push(AnalysisInput::Event(event));
                            stats
                                .event_drops
                                .store(analysis.dropped(), Ordering::Relaxed);
                        }
                    }
                    PopResult::TimedOut => continue,
                    PopResult::Closed => break,
                }
            }
            analysis.close();
        })
        .expect("failed to spawn dsp thread")
}

fn spawn_analysis(
    config: &MonitorConfig,
    sink: Box<dyn AlertSink>,
    shutdown: Arc<AtomicBool>,
    analysis: Arc<BoundedQueue<AnalysisInput>>,
    telemetry: Arc<BoundedQueue<VehicleActionEvent>>,
) -> JoinHandle<()> {
    let mut detector = ReplayAnomalyDetector::new(config);
    let mut correlator = TelemetryCorrelator::new(config);
    let mut publisher = AlertPublisher::new(sink);
    thread::Builder::new()
        .name("rfmon-analysis".into())
        .spawn(move || {
            while !shutdown.load(Ordering::SeqCst) {
                // Telemetry first: actions must be in the window before the
                // RF events they might explain.
                while let PopResult::Item(action) = telemetry.try_pop() {
                    let ts = action.timestamp;
                    correlator.push_action(action);
                    // Actions advance the correlation clock too, so pending
                    // verdicts fall due even during an RF-quiet stretch.
                    for alert in correlator.expire(ts) {
                        publisher.publish(&alert);
                    }
                }

                match analysis.pop_timeout(POLL) {
                    PopResult::Item(AnalysisInput::Event(event)) => {
                        for alert in detector.process(&event) {
                            publisher.publish(&alert);
                        }
                        for alert in correlator.process(&event) {
                            publisher.publish(&alert);
                        }
                    }
                    PopResult::Item(AnalysisInput::CoverageLost { timestamp }) => {
                        publisher.publish(&Alert {
                            severity: Severity::Warning,
                            kind: AlertKind::RfCoverageLost,
                            related_event_id: None,
                            timestamp,
                            details: "no RF coverage; telemetry-only correlation".into(),
                        });
                    }
                    PopResult::Item(AnalysisInput::CoverageRestored { .. }) => {
                        publisher.clear(AlertKind::RfCoverageLost, None);
                    }
                    PopResult::TimedOut => continue,
                    PopResult::Closed => {
                        // No further action can arrive; decide what is left.
                        for alert in correlator.flush() {
                            publisher.publish(&alert);
                        }
                        break;
                    }
                }
            }
        })
        .expect("failed to spawn analysis thread")
}

/// Synchronous single-thread driver: drain a source to end-of-stream with
/// a fixed telemetry script. Deterministic; used by tests and offline
/// analysis of captured files.
pub fn run_offline(
    config: &MonitorConfig,
    source: &mut dyn SampleSource,
    actions: &[VehicleActionEvent],
    sink: Box<dyn AlertSink>,
) -> MonitorResult<OfflineReport> {
    config.validate()?;

    let mut analyzer = SpectralAnalyzer::new(config);
    let demod = BurstDemodulator::new(config.sample_rate);
    let mut builder = SignalEventBuilder::new();
    let mut detector = ReplayAnomalyDetector::new(config);
    let mut correlator = TelemetryCorrelator::new(config);
    let mut publisher = AlertPublisher::new(sink);

    // Replay the script in capture time: an action enters the window only
    // once the stream has reached its timestamp, as it would live.
    let mut script: Vec<VehicleActionEvent> = actions.to_vec();
    script.sort_by(|a, b| a.timestamp.total_cmp(&b.timestamp));
    let mut next_action = 0usize;

    let mut report = OfflineReport::default();
    loop {
        match source.next_block() {
            SourceEvent::Block(block) => {
                report.blocks += 1;
                let horizon = block.start_timestamp + block.duration();
                while next_action < script.len() && script[next_action].timestamp <= horizon {
                    let action = script[next_action];
                    next_action += 1;
                    correlator.push_action(action);
                    for alert in correlator.expire(action.timestamp) {
                        publisher.publish(&alert);
                    }
                }
                for burst in analyzer.process_block(&block) {
                    report.bursts += 1;
                    let result = demod.demodulate(&burst);
                    let event = builder.build(&burst, &result);
                    report.events += 1;
                    for alert in detector.process(&event) {
                        publisher.publish(&alert);
                    }
                    for alert in correlator.process(&event) {
                        publisher.publish(&alert);
                    }
                }
            }
            SourceEvent::NoData => continue,
            SourceEvent::EndOfStream | SourceEvent::Disconnected => break,
        }
    }
    while next_action < script.len() {
        correlator.push_action(script[next_action]);
        next_action += 1;
    }
    for alert in correlator.flush() {
        publisher.publish(&alert);
    }
    report.alerts_published = publisher.published();
    Ok(report)
}

/// Summary counters from [`run_offline`].
#[derive(Debug, Default, Clone, Copy)]
pub struct OfflineReport {
    pub blocks: u64,
    pub bursts: u64,
    pub events: u64,
    pub alerts_published: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::VecSink;
    use crate::types::IQSample;

    /// Source producing `n` quiet blocks then end-of-stream.
    struct QuietSource {
        remaining: usize,
        t: f64,
        rate: f64,
    }

    impl SampleSource for QuietSource {
        fn next_block(&mut self) -> SourceEvent {
            if self.remaining == 0 {
                return SourceEvent::EndOfStream;
            }
            self.remaining -= 1;
            let n = 4096;
            let block = SampleBlock {
                start_timestamp: self.t,
                sample_rate: self.rate,
                center_frequency: 433.92e6,
                samples: vec![IQSample::new(1e-5, 0.0); n],
            };
            self.t += n as f64 / self.rate;
            SourceEvent::Block(block)
        }
    }

    #[test]
    fn test_offline_quiet_stream_no_alerts() {
        let config = MonitorConfig::default();
        let mut source = QuietSource {
            remaining: 20,
            t: 0.0,
            rate: config.sample_rate,
        };
        let report = run_offline(&config, &mut source, &[], Box::new(VecSink::default())).unwrap();
        assert_eq!(report.blocks, 20);
        assert_eq!(report.bursts, 0);
        assert_eq!(report.alerts_published, 0);
    }

    #[test]
    fn test_spawn_rejects_invalid_config() {
        let config = MonitorConfig {
            fft_size: 100,
            ..Default::default()
        };
        let source = QuietSource {
            remaining: 0,
            t: 0.0,
            rate: 250_000.0,
        };
        let result = Pipeline::spawn(config, Box::new(source), Box::new(VecSink::default()));
        assert!(result.is_err());
    }

    #[test]
    fn test_threaded_pipeline_runs_to_eos() {
        let config = MonitorConfig::default();
        let source = QuietSource {
            remaining: 10,
            t: 0.0,
            rate: config.sample_rate,
        };
        let pipeline =
            Pipeline::spawn(config, Box::new(source), Box::new(VecSink::default())).unwrap();
        pipeline.push_action(VehicleActionEvent {
            timestamp: 0.05,
            action_type: crate::types::ActionType::Unlock,
        });
        pipeline.wait();
    }

    #[test]
    fn test_disconnect_enters_degraded_mode() {
        struct DropoutSource {
            sent: bool,
        }
        impl SampleSource for DropoutSource {
            fn next_block(&mut self) -> SourceEvent {
                if !self.sent {
                    self.sent = true;
                    SourceEvent::Block(SampleBlock {
                        start_timestamp: 0.0,
                        sample_rate: 250_000.0,
                        center_frequency: 433.92e6,
                        samples: vec![IQSample::new(1e-5, 0.0); 1024],
                    })
                } else {
                    SourceEvent::Disconnected
                }
            }
        }

        let config = MonitorConfig::default();
        let pipeline = Pipeline::spawn(
            config,
            Box::new(DropoutSource { sent: false }),
            Box::new(VecSink::default()),
        )
        .unwrap();
        // Give the capture thread time to observe the disconnect.
        std::thread::sleep(Duration::from_millis(100));
        assert!(pipeline.stats().degraded.load(Ordering::SeqCst));
        pipeline.shutdown();
    }
}
