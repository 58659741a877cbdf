use std::collections::VecDeque;
use std::path::PathBuf;

use crate::calibration::{CalibrationSession, CalibrationState};
use crate::centroid::Centroid;
use crate::chart::{ChartRenderer, ChartSet};
use crate::config::PipelineConfig;
use crate::error::Error;
use crate::export::{SeriesTable, TableWriter};
use crate::fit::{FitReport, ModelFitter};
use crate::frame::Frame;
use crate::kinematics::{KinematicsTracker, Readout};
use crate::segmentation::{BlobDetection, BlobDetector, SegmentStages, Segmenter};
use crate::{FrameSource, OperatorEvent, OperatorInput};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    Continue,
    Stop,
}

#[derive(Debug, Clone)]
pub struct FrameOutcome {
    pub frame_index: u64,
    pub timestamp: f64,
    pub detection: Option<Centroid>,
    pub readout: Option<Readout>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunSummary {
    pub frames: u64,
    pub detections: usize,
    pub stopped_early: bool,
    pub source_error: Option<String>,
}

/// Presentation hook called after every processed frame
pub trait FrameObserver {
    fn on_frame(
        &mut self,
        pipeline: &Pipeline,
        frame: &Frame,
        outcome: &FrameOutcome,
        stages: &SegmentStages,
    ) -> Result<(), Error>;
}

impl FrameObserver for () {
    #[inline]
    fn on_frame(
        &mut self,
        _: &Pipeline,
        _: &Frame,
        _: &FrameOutcome,
        _: &SegmentStages,
    ) -> Result<(), Error> {
        Ok(())
    }
}

/// Everything produced after the stream ends
#[derive(Debug, Clone)]
pub struct Analysis {
    pub table: SeriesTable,
    pub charts: ChartSet,
    pub calibration: CalibrationState,
    pub fit: Option<FitReport>,
    /// why the model comparison was skipped
    pub diagnostic: Option<String>,
}

/// Frame loop controller: segmentation, centroid, kinematics and the
/// calibration session, plus the post-stream fit and export.
pub struct Pipeline {
    config: PipelineConfig,
    detector: Box<dyn BlobDetector>,
    fitter: ModelFitter,
    tracker: KinematicsTracker,
    calibration: CalibrationSession,
    next_index: u64,
}

impl Pipeline {
    /// Pipeline segmenting frames with the ndarray `Segmenter`
    pub fn new(config: PipelineConfig, fps: f64) -> Result<Self, Error> {
        let segmenter = Segmenter::new(config.segmentation.clone());

        Self::with_detector(config, fps, Box::new(segmenter))
    }

    pub fn with_detector(
        config: PipelineConfig,
        fps: f64,
        detector: Box<dyn BlobDetector>,
    ) -> Result<Self, Error> {
        config.validate()?;

        let tracker = KinematicsTracker::new(fps)?;

        Ok(Self {
            detector,
            fitter: ModelFitter::new(config.min_fit_samples),
            tracker,
            calibration: CalibrationSession::new(),
            next_index: 0,
            config,
        })
    }

    #[inline]
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    #[inline]
    pub fn tracker(&self) -> &KinematicsTracker {
        &self.tracker
    }

    #[inline]
    pub fn calibration(&self) -> &CalibrationSession {
        &self.calibration
    }

    #[inline]
    pub fn frames_seen(&self) -> u64 {
        self.next_index
    }

    pub fn process_frame(&mut self, frame: &Frame) -> Result<FrameOutcome, Error> {
        self.process_frame_stages(frame).map(|(outcome, _)| outcome)
    }

    /// Like `process_frame`, also returning the raw and opened masks
    pub fn process_frame_stages(
        &mut self,
        frame: &Frame,
    ) -> Result<(FrameOutcome, SegmentStages), Error> {
        if self.calibration.is_active() {
            return Err(Error::CalibrationActive);
        }

        // a frame that fails detection still takes its time slot
        let frame_index = self.next_index;
        self.next_index += 1;

        let BlobDetection {
            stages,
            centroid: detection,
        } = self.detector.detect(frame)?;
        let readout = self.tracker.observe(frame_index, detection);

        if let Some(c) = detection {
            log::debug!("frame {}: centroid ({}, {})", frame_index, c.x, c.y);
        }

        let outcome = FrameOutcome {
            frame_index,
            timestamp: self.tracker.timestamp(frame_index),
            detection,
            readout,
        };

        Ok((outcome, stages))
    }

    /// Applies one operator event. The real-world length is requested from
    /// `input` when a commit reaches that point.
    pub fn handle_event<I: OperatorInput + ?Sized>(
        &mut self,
        event: OperatorEvent,
        input: &mut I,
    ) -> Control {
        let control = self.apply_event(event, input);
        input.calibration_updated(&self.calibration);

        control
    }

    fn apply_event<I>(&mut self, event: OperatorEvent, input: &mut I) -> Control
    where
        I: OperatorInput + ?Sized,
    {
        match event {
            OperatorEvent::Pause => {
                if !self.calibration.is_active() {
                    log::info!("paused, select 2 reference points to calibrate");
                }
                self.calibration.pause();
            }

            OperatorEvent::Click { x, y } => {
                if !self.calibration.click(x, y) {
                    log::debug!("ignored click at ({}, {})", x, y);
                }
            }

            OperatorEvent::Commit => match self.calibration.commit(|d| input.real_length(d)) {
                Ok(scale) => log::info!("scale set: {:.6} m/px", scale),
                Err(err) => log::warn!("calibration not committed: {}", err),
            },

            OperatorEvent::Discard => {
                if self.calibration.is_active() {
                    log::info!("resumed without calibrating");
                }
                self.calibration.discard();
            }

            OperatorEvent::Stop => {
                self.calibration.discard();
                return Control::Stop;
            }
        }

        Control::Continue
    }

    /// Blocks on `input` until the active calibration session is resolved
    pub fn calibrate<I: OperatorInput + ?Sized>(&mut self, input: &mut I) -> Control {
        while self.calibration.is_active() {
            let event = match input.wait() {
                Some(event) => event,
                None => {
                    log::warn!("operator input closed during calibration");
                    self.calibration.discard();
                    break;
                }
            };

            if self.handle_event(event, input) == Control::Stop {
                return Control::Stop;
            }
        }

        Control::Continue
    }

    #[inline]
    pub fn run<S, I>(&mut self, source: &mut S, input: &mut I) -> RunSummary
    where
        S: FrameSource + ?Sized,
        I: OperatorInput + ?Sized,
    {
        self.run_observed(source, input, &mut ())
    }

    /// Frame loop: process, notify `observer`, then give the operator one
    /// chance to pause or stop. Ends on stream end, source failure or stop.
    pub fn run_observed<S, I, O>(
        &mut self,
        source: &mut S,
        input: &mut I,
        observer: &mut O,
    ) -> RunSummary
    where
        S: FrameSource + ?Sized,
        I: OperatorInput + ?Sized,
        O: FrameObserver + ?Sized,
    {
        let mut summary = RunSummary::default();

        log::info!("processing stream at {:.3} fps", self.tracker.fps());

        loop {
            let frame = match source.next_frame() {
                Ok(Some(frame)) => frame,
                Ok(None) => {
                    log::info!("stream finished");
                    break;
                }
                Err(err) => {
                    log::error!("frame source failed: {}", err);
                    summary.source_error = Some(err.to_string());
                    break;
                }
            };

            match self.process_frame_stages(&frame) {
                Ok((outcome, stages)) => {
                    summary.frames += 1;
                    if outcome.detection.is_some() {
                        summary.detections += 1;
                    }

                    if let Err(err) = observer.on_frame(self, &frame, &outcome, &stages) {
                        log::warn!("frame observer failed: {}", err);
                    }
                }
                Err(err) => log::error!("frame skipped: {}", err),
            }

            if let Some(event) = input.poll() {
                let mut control = self.handle_event(event, input);
                if control == Control::Continue && self.calibration.is_active() {
                    control = self.calibrate(input);
                }

                if control == Control::Stop {
                    log::info!("stopped by operator");
                    summary.stopped_early = true;
                    break;
                }
            }
        }

        summary
    }

    /// Fits the model when possible and prepares the export artifacts
    pub fn analyze(&self) -> Analysis {
        let tr = &self.tracker;
        let scale = self.calibration.scale();

        let fitted = self.fitter.fit(tr.positions(), tr.velocities(), scale);

        let (fit, diagnostic) = match fitted {
            Ok(report) => {
                log::info!(
                    "model fit: g = {:.4} m/s², R² x = {:.4}, R² y = {:.4}",
                    report.params.g,
                    report.x_metrics.r_squared,
                    report.y_metrics.r_squared
                );
                (Some(report), None)
            }
            Err(err) => {
                log::warn!("model comparison skipped: {}", err);
                (None, Some(err.to_string()))
            }
        };

        let charts = ChartSet::build(
            tr.positions(),
            tr.velocities(),
            tr.accelerations(),
            scale,
            fit.as_ref(),
        );

        Analysis {
            table: SeriesTable::from_tracker(tr),
            charts,
            calibration: self.calibration.state(),
            fit,
            diagnostic,
        }
    }
}

/// Hands the analysis to the chart and table collaborators. Nothing is
/// exported when no position was ever recorded.
pub fn export<W, R>(
    analysis: &Analysis,
    writer: &mut W,
    renderer: &mut R,
) -> Result<Option<PathBuf>, Error>
where
    W: TableWriter + ?Sized,
    R: ChartRenderer + ?Sized,
{
    if analysis.table.is_empty() {
        log::warn!("no detections recorded, nothing to export");
        return Ok(None);
    }

    renderer.render_charts(&analysis.charts);

    match writer.write_table(&analysis.table) {
        Ok(path) => Ok(Some(path)),
        Err(err) => {
            log::error!("table export failed: {}", err);
            Err(err)
        }
    }
}

/// Replays a fixed script of operator events, one poll slot per frame
#[derive(Debug, Clone, Default)]
pub struct ScriptedInput {
    polls: VecDeque<Option<OperatorEvent>>,
    waits: VecDeque<OperatorEvent>,
    lengths: VecDeque<f64>,
}

impl ScriptedInput {
    pub fn new() -> Self {
        Self::default()
    }

    /// Event returned by the poll after frame `frame_index`
    pub fn at_frame(mut self, frame_index: usize, event: OperatorEvent) -> Self {
        if self.polls.len() <= frame_index {
            self.polls.resize(frame_index + 1, None);
        }
        self.polls[frame_index] = Some(event);
        self
    }

    /// Events delivered while paused, in order
    pub fn then(mut self, event: OperatorEvent) -> Self {
        self.waits.push_back(event);
        self
    }

    pub fn with_length(mut self, meters: f64) -> Self {
        self.lengths.push_back(meters);
        self
    }
}

impl OperatorInput for ScriptedInput {
    fn poll(&mut self) -> Option<OperatorEvent> {
        self.polls.pop_front().flatten()
    }

    fn wait(&mut self) -> Option<OperatorEvent> {
        self.waits.pop_front()
    }

    fn real_length(&mut self, _pixel_distance: f64) -> Option<f64> {
        self.lengths.pop_front()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::FrameQueue;

    const GREEN: [u8; 3] = [0, 255, 0];
    const GRAY: [u8; 3] = [90, 90, 90];

    fn frame_with_blob(cx: u32, cy: u32) -> Frame {
        let mut frame = Frame::filled(64, 48, GRAY);
        frame.fill_rect(cx - 3, cy - 3, 7, 7, GREEN);
        frame
    }

    #[test]
    fn frames_flow_into_the_tracker() {
        let mut pipeline = Pipeline::new(PipelineConfig::default(), 10.0).unwrap();

        let out = pipeline.process_frame(&frame_with_blob(10, 20)).unwrap();
        assert_eq!(out.detection, Some(Centroid { x: 10, y: 20 }));
        assert_eq!(out.frame_index, 0);

        let out = pipeline.process_frame(&Frame::filled(64, 48, GRAY)).unwrap();
        assert_eq!(out.detection, None);
        assert!(out.readout.is_none());
        assert!((out.timestamp - 0.1).abs() < 1e-12);

        let out = pipeline.process_frame(&frame_with_blob(30, 20)).unwrap();
        let vel = out.readout.unwrap().velocity.unwrap();
        assert!((vel.vx - 200.0).abs() < 1e-9);
        assert_eq!(pipeline.tracker().len(), 2);
        assert_eq!(pipeline.frames_seen(), 3);
    }

    #[test]
    fn frames_are_refused_while_calibrating() {
        let mut pipeline = Pipeline::new(PipelineConfig::default(), 10.0).unwrap();
        let mut input = ScriptedInput::new();

        pipeline.handle_event(OperatorEvent::Pause, &mut input);

        assert!(matches!(
            pipeline.process_frame(&frame_with_blob(10, 10)),
            Err(Error::CalibrationActive)
        ));
        assert_eq!(pipeline.frames_seen(), 0);
    }

    #[test]
    fn failed_commit_keeps_waiting_for_input() {
        let mut pipeline = Pipeline::new(PipelineConfig::default(), 10.0).unwrap();
        let mut input = ScriptedInput::new()
            .then(OperatorEvent::Click { x: 0.0, y: 0.0 })
            .then(OperatorEvent::Commit)
            .then(OperatorEvent::Click { x: 0.0, y: 50.0 })
            .then(OperatorEvent::Commit)
            .with_length(0.5);

        pipeline.handle_event(OperatorEvent::Pause, &mut input);
        assert_eq!(pipeline.calibrate(&mut input), Control::Continue);

        assert!(!pipeline.calibration().is_active());
        assert_eq!(pipeline.calibration().scale(), Some(0.01));
    }

    #[test]
    fn degenerate_points_can_be_picked_again() {
        let mut pipeline = Pipeline::new(PipelineConfig::default(), 10.0).unwrap();
        let mut input = ScriptedInput::new()
            .then(OperatorEvent::Click { x: 5.0, y: 5.0 })
            .then(OperatorEvent::Click { x: 5.0, y: 5.0 })
            .then(OperatorEvent::Commit)
            .then(OperatorEvent::Click { x: 10.0, y: 5.0 })
            .then(OperatorEvent::Click { x: 110.0, y: 5.0 })
            .then(OperatorEvent::Commit)
            .with_length(2.0);

        pipeline.handle_event(OperatorEvent::Pause, &mut input);
        pipeline.calibrate(&mut input);

        assert!(!pipeline.calibration().is_active());
        assert_eq!(pipeline.calibration().scale(), Some(0.02));
    }

    #[derive(Default)]
    struct PointLog {
        inner: ScriptedInput,
        seen: Vec<Vec<(f64, f64)>>,
    }

    impl OperatorInput for PointLog {
        fn poll(&mut self) -> Option<OperatorEvent> {
            self.inner.poll()
        }

        fn wait(&mut self) -> Option<OperatorEvent> {
            self.inner.wait()
        }

        fn real_length(&mut self, d: f64) -> Option<f64> {
            self.inner.real_length(d)
        }

        fn calibration_updated(&mut self, session: &CalibrationSession) {
            self.seen.push(session.points().to_vec());
        }
    }

    #[test]
    fn input_sees_points_after_every_event() {
        let mut pipeline = Pipeline::new(PipelineConfig::default(), 10.0).unwrap();
        let mut input = PointLog {
            inner: ScriptedInput::new()
                .then(OperatorEvent::Click { x: 1.0, y: 1.0 })
                .then(OperatorEvent::Click { x: 1.0, y: 1.0 })
                .then(OperatorEvent::Commit)
                .then(OperatorEvent::Discard),
            ..Default::default()
        };

        pipeline.handle_event(OperatorEvent::Pause, &mut input);
        pipeline.calibrate(&mut input);

        assert_eq!(
            input.seen,
            vec![
                vec![],
                vec![(1.0, 1.0)],
                vec![(1.0, 1.0), (1.0, 1.0)],
                vec![],
                vec![],
            ]
        );
    }

    struct FlakyDetector {
        calls: usize,
    }

    impl BlobDetector for FlakyDetector {
        fn detect(&mut self, frame: &Frame) -> Result<BlobDetection, Error> {
            self.calls += 1;
            if self.calls == 2 {
                return Err(Error::InvalidFrame("corrupt".into()));
            }

            let (w, h) = frame.dims;
            let mask = crate::segmentation::Mask::zeros(w, h);

            Ok(BlobDetection {
                stages: SegmentStages {
                    raw: mask.clone(),
                    opened: mask,
                },
                centroid: Some(Centroid {
                    x: 10 * self.calls as i32,
                    y: 0,
                }),
            })
        }
    }

    #[test]
    fn failed_detection_skips_frame_but_keeps_time() {
        let frames: Vec<Frame> = (0..3).map(|_| Frame::filled(8, 8, GRAY)).collect();
        let mut source = FrameQueue::new(10.0, frames);
        let detector = Box::new(FlakyDetector { calls: 0 });

        let mut pipeline =
            Pipeline::with_detector(PipelineConfig::default(), 10.0, detector).unwrap();
        let summary = pipeline.run(&mut source, &mut ScriptedInput::new());

        assert_eq!(summary.frames, 2);
        assert_eq!(pipeline.frames_seen(), 3);

        let ts: Vec<f64> = pipeline
            .tracker()
            .positions()
            .iter()
            .map(|s| s.timestamp)
            .collect();
        assert_eq!(ts.len(), 2);
        assert!((ts[1] - 0.2).abs() < 1e-12);
    }

    #[test]
    fn closed_input_discards_session() {
        let mut pipeline = Pipeline::new(PipelineConfig::default(), 10.0).unwrap();
        let mut input = ScriptedInput::new().then(OperatorEvent::Click { x: 1.0, y: 1.0 });

        pipeline.handle_event(OperatorEvent::Pause, &mut input);
        pipeline.calibrate(&mut input);

        assert!(!pipeline.calibration().is_active());
        assert_eq!(pipeline.calibration().scale(), None);
    }

    #[test]
    fn stop_ends_the_run_and_keeps_partial_results() {
        let frames: Vec<Frame> = (0..6).map(|i| frame_with_blob(10 + 5 * i, 20)).collect();
        let mut source = FrameQueue::new(10.0, frames);
        let mut input = ScriptedInput::new().at_frame(2, OperatorEvent::Stop);

        let mut pipeline = Pipeline::new(PipelineConfig::default(), source.fps()).unwrap();
        let summary = pipeline.run(&mut source, &mut input);

        assert!(summary.stopped_early);
        assert_eq!(summary.frames, 3);
        assert_eq!(summary.detections, 3);
        assert_eq!(source.len(), 3);
        assert_eq!(pipeline.tracker().velocities().len(), 2);
    }

    #[test]
    fn analysis_without_scale_skips_comparison_only() {
        let frames: Vec<Frame> = (0..6).map(|i| frame_with_blob(10 + 5 * i, 20)).collect();
        let mut source = FrameQueue::new(10.0, frames);
        let mut pipeline = Pipeline::new(PipelineConfig::default(), 10.0).unwrap();

        pipeline.run(&mut source, &mut ScriptedInput::new());
        let analysis = pipeline.analyze();

        assert!(analysis.fit.is_none());
        assert!(analysis.diagnostic.is_some());
        assert!(!analysis.charts.has_comparison());
        assert_eq!(analysis.table.positions.len(), 6);
        assert_eq!(analysis.calibration.scale_meters_per_pixel, None);
    }

    struct FailingWriter;

    impl TableWriter for FailingWriter {
        fn write_table(&mut self, _table: &SeriesTable) -> Result<PathBuf, Error> {
            Err(Error::Io(std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only")))
        }
    }

    #[derive(Default)]
    struct CountingRenderer(usize);

    impl ChartRenderer for CountingRenderer {
        fn render_charts(&mut self, _charts: &ChartSet) {
            self.0 += 1;
        }
    }

    #[test]
    fn export_reports_write_failure_after_rendering() {
        let mut pipeline = Pipeline::new(PipelineConfig::default(), 10.0).unwrap();
        pipeline.process_frame(&frame_with_blob(10, 10)).unwrap();

        let analysis = pipeline.analyze();
        let mut renderer = CountingRenderer::default();

        assert!(matches!(
            export(&analysis, &mut FailingWriter, &mut renderer),
            Err(Error::Io(_))
        ));
        assert_eq!(renderer.0, 1);
    }

    #[test]
    fn empty_run_exports_nothing() {
        let pipeline = Pipeline::new(PipelineConfig::default(), 10.0).unwrap();
        let mut renderer = CountingRenderer::default();

        let out = export(&pipeline.analyze(), &mut FailingWriter, &mut renderer).unwrap();

        assert!(out.is_none());
        assert_eq!(renderer.0, 0);
    }
}
