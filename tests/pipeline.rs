use trackfit::chart::{ChartRenderer, ChartSet};
use trackfit::config::PipelineConfig;
use trackfit::error::Error;
use trackfit::export::{load_table, JsonTableWriter};
use trackfit::pipeline::{self, FrameObserver, FrameOutcome, Pipeline, ScriptedInput};
use trackfit::segmentation::SegmentStages;
use trackfit::{Frame, FrameQueue, FrameSource, OperatorEvent};

const FPS: f64 = 30.0;
const WIDTH: u32 = 320;
const HEIGHT: u32 = 280;
const BACKGROUND: [u8; 3] = [40, 30, 200];
const GREEN: [u8; 3] = [30, 220, 40];

// 0.02 m/px, so 490.5 px/s² is 9.81 m/s²
const SCALE: f64 = 0.02;
const G_PX: f64 = 490.5;

fn ball_at(t: f64) -> (u32, u32) {
    let x = 20.0 + 100.0 * t;
    let y = 20.0 + 0.5 * G_PX * t * t;

    (x.round() as u32, y.round() as u32)
}

fn frame(center: Option<(u32, u32)>) -> Frame {
    let mut frame = Frame::filled(WIDTH, HEIGHT, BACKGROUND);
    if let Some((cx, cy)) = center {
        frame.fill_rect(cx - 4, cy - 4, 9, 9, GREEN);
    }
    frame
}

fn projectile(frames: usize) -> Vec<Frame> {
    (0..frames)
        .map(|i| frame(Some(ball_at(i as f64 / FPS))))
        .collect()
}

fn calibrating_input() -> ScriptedInput {
    ScriptedInput::new()
        .at_frame(2, OperatorEvent::Pause)
        .then(OperatorEvent::Click { x: 10.0, y: 10.0 })
        .then(OperatorEvent::Commit)
        .then(OperatorEvent::Click { x: 110.0, y: 10.0 })
        .then(OperatorEvent::Click { x: 300.0, y: 300.0 })
        .then(OperatorEvent::Commit)
        .with_length(2.0)
}

#[derive(Default)]
struct Recorder {
    frames: usize,
    detections: usize,
}

impl FrameObserver for Recorder {
    fn on_frame(
        &mut self,
        pipeline: &Pipeline,
        _frame: &Frame,
        outcome: &FrameOutcome,
        stages: &SegmentStages,
    ) -> Result<(), Error> {
        self.frames += 1;
        if outcome.detection.is_some() {
            self.detections += 1;
            assert!(stages.opened.area() > 0);
        }
        assert_eq!(pipeline.frames_seen(), outcome.frame_index + 1);
        Ok(())
    }
}

#[derive(Default)]
struct CollectingRenderer(Vec<ChartSet>);

impl ChartRenderer for CollectingRenderer {
    fn render_charts(&mut self, charts: &ChartSet) {
        self.0.push(charts.clone());
    }
}

#[test]
fn projectile_video_end_to_end() {
    let mut source = FrameQueue::new(FPS, projectile(30));
    let mut input = calibrating_input();
    let mut recorder = Recorder::default();

    let mut pipeline = Pipeline::new(PipelineConfig::default(), source.fps()).unwrap();
    let summary = pipeline.run_observed(&mut source, &mut input, &mut recorder);

    assert_eq!(summary.frames, 30);
    assert_eq!(summary.detections, 30);
    assert!(!summary.stopped_early);
    assert!(summary.source_error.is_none());
    assert_eq!(recorder.frames, 30);
    assert_eq!(recorder.detections, 30);

    let scale = pipeline.calibration().scale().unwrap();
    assert!((scale - SCALE).abs() < 1e-12);

    let tracker = pipeline.tracker();
    assert_eq!(tracker.positions().len(), 30);
    assert_eq!(tracker.velocities().len(), 29);
    assert_eq!(tracker.accelerations().len(), 28);

    for (i, s) in tracker.positions().iter().enumerate() {
        let (x, y) = ball_at(i as f64 / FPS);
        assert_eq!((s.x, s.y), (x as f64, y as f64));
    }

    let analysis = pipeline.analyze();
    let fit = analysis.fit.as_ref().expect("model fit");

    assert!((fit.params.g - 9.81).abs() / 9.81 < 0.03, "g = {}", fit.params.g);
    assert!((fit.params.vx0 - 2.0).abs() < 0.05, "vx0 = {}", fit.params.vx0);
    assert!(fit.y_metrics.r_squared > 0.99);
    assert!(fit.x_metrics.r_squared > 0.99);
    assert!(analysis.diagnostic.is_none());
    assert!(analysis.charts.has_comparison());

    let dir = tempfile::tempdir().unwrap();
    let mut writer = JsonTableWriter::new(dir.path().join("resultados"), "resultados.json");
    let mut renderer = CollectingRenderer::default();

    let path = pipeline::export(&analysis, &mut writer, &mut renderer)
        .unwrap()
        .unwrap();

    assert_eq!(renderer.0.len(), 1);

    let table = load_table(&path).unwrap();
    assert_eq!(table.positions.len(), 30);
    assert_eq!(table.velocities.len(), 29);
    assert_eq!(table.accelerations.len(), 28);

    for (row, s) in table.positions.iter().zip(tracker.positions()) {
        assert_eq!((row.tiempo, row.x, row.y), (s.timestamp, s.x, s.y));
    }
}

#[test]
fn refitting_gives_identical_parameters() {
    let mut source = FrameQueue::new(FPS, projectile(20));
    let mut pipeline = Pipeline::new(PipelineConfig::default(), FPS).unwrap();

    pipeline.run(&mut source, &mut calibrating_input());

    let a = pipeline.analyze().fit.unwrap();
    let b = pipeline.analyze().fit.unwrap();

    assert_eq!(a.params, b.params);
    assert_eq!(a.x_metrics, b.x_metrics);
    assert_eq!(a.y_metrics, b.y_metrics);
}

#[test]
fn missed_frames_are_bridged_with_fixed_dt() {
    let frames = vec![
        frame(Some((20, 100))),
        frame(Some((30, 100))),
        frame(None),
        frame(Some((50, 100))),
    ];
    let mut source = FrameQueue::new(10.0, frames);
    let mut pipeline = Pipeline::new(PipelineConfig::default(), 10.0).unwrap();

    let summary = pipeline.run(&mut source, &mut ScriptedInput::new());
    assert_eq!(summary.frames, 4);
    assert_eq!(summary.detections, 3);

    let tracker = pipeline.tracker();
    let t: Vec<f64> = tracker.positions().iter().map(|s| s.timestamp).collect();
    assert!((t[2] - 0.3).abs() < 1e-12);

    let v = tracker.velocities();
    assert!((v[0].vx - 100.0).abs() < 1e-9);
    // 20 px over two frame intervals, divided by a single dt
    assert!((v[1].vx - 200.0).abs() < 1e-9);
    assert!((tracker.accelerations()[0].ax - 1000.0).abs() < 1e-6);
}

#[test]
fn discarded_calibration_leaves_only_basic_export() {
    let mut input = ScriptedInput::new()
        .at_frame(1, OperatorEvent::Pause)
        .then(OperatorEvent::Click { x: 0.0, y: 0.0 })
        .then(OperatorEvent::Click { x: 0.0, y: 0.0 })
        .then(OperatorEvent::Commit)
        .then(OperatorEvent::Discard)
        .with_length(1.0);

    let mut source = FrameQueue::new(FPS, projectile(10));
    let mut pipeline = Pipeline::new(PipelineConfig::default(), FPS).unwrap();
    pipeline.run(&mut source, &mut input);

    assert_eq!(pipeline.calibration().scale(), None);
    assert!(!pipeline.calibration().is_active());

    let analysis = pipeline.analyze();
    assert!(analysis.fit.is_none());
    assert!(analysis.diagnostic.is_some());
    assert!(!analysis.charts.has_comparison());
    assert_eq!(analysis.charts.kinematics.len(), 3);

    let dir = tempfile::tempdir().unwrap();
    let mut writer = JsonTableWriter::new(dir.path(), "t.json");
    let path = pipeline::export(&analysis, &mut writer, &mut CollectingRenderer::default())
        .unwrap()
        .unwrap();
    assert_eq!(load_table(path).unwrap().positions.len(), 10);
}

struct BrokenSource {
    frames: Vec<Frame>,
}

impl FrameSource for BrokenSource {
    fn fps(&self) -> f64 {
        FPS
    }

    fn next_frame(&mut self) -> Result<Option<Frame>, Error> {
        match self.frames.pop() {
            Some(frame) => Ok(Some(frame)),
            None => Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "decoder died",
            ))),
        }
    }
}

#[test]
fn source_failure_keeps_partial_results() {
    let mut frames = projectile(5);
    frames.reverse();
    let mut source = BrokenSource { frames };

    let mut pipeline = Pipeline::new(PipelineConfig::default(), FPS).unwrap();
    let summary = pipeline.run(&mut source, &mut ScriptedInput::new());

    assert_eq!(summary.frames, 5);
    assert!(summary.source_error.unwrap().contains("decoder died"));
    assert_eq!(pipeline.tracker().positions().len(), 5);
    assert_eq!(pipeline.analyze().table.positions.len(), 5);
}
