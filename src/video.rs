//! OpenCV-backed collaborators: file decoding, the live viewer with its
//! overlay, keyboard/mouse operator input and the PNG chart renderer.

use ndarray::Array2;
use opencv::{
    core::{self, Mat, Point, Rect, Scalar, Size},
    highgui, imgcodecs, imgproc,
    prelude::*,
    videoio,
};
use std::cell::RefCell;
use std::collections::VecDeque;
use std::io::BufRead;
use std::path::PathBuf;
use std::rc::Rc;
use std::sync::{Arc, Mutex};

use crate::calibration::CalibrationSession;
use crate::centroid::Centroid;
use crate::chart::{Chart, ChartRenderer, ChartSet, Style};
use crate::config::{Hsv, SegmentationConfig};
use crate::error::Error;
use crate::frame::Frame;
use crate::kinematics::{KinematicsTracker, Readout};
use crate::pipeline::{FrameObserver, FrameOutcome, Pipeline};
use crate::segmentation::{BlobDetection, BlobDetector, Mask, SegmentStages};
use crate::{FrameSource, OperatorEvent, OperatorInput};

const KEY_QUIT: i32 = b'q' as i32;
const KEY_PAUSE: i32 = b'p' as i32;
const KEY_COMMIT: i32 = b'c' as i32;
const KEY_RESUME: i32 = b'r' as i32;

fn bgr(b: f64, g: f64, r: f64) -> Scalar {
    Scalar::new(b, g, r, 0.0)
}

fn to_point(x: f64, y: f64) -> Point {
    Point::new(x.round() as i32, y.round() as i32)
}

pub struct VideoFileSource {
    cap: videoio::VideoCapture,
    fps: f64,
    mat: Mat,
}

impl VideoFileSource {
    pub fn open(path: &str) -> Result<Self, Error> {
        let cap = videoio::VideoCapture::from_file(path, videoio::CAP_ANY)?;
        if !videoio::VideoCapture::is_opened(&cap)? {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("unable to open video {}", path),
            )));
        }

        let fps = cap.get(videoio::CAP_PROP_FPS)?;
        let width = cap.get(videoio::CAP_PROP_FRAME_WIDTH)? as i32;
        let height = cap.get(videoio::CAP_PROP_FRAME_HEIGHT)? as i32;
        let total = cap.get(videoio::CAP_PROP_FRAME_COUNT)? as i64;

        log::info!("video {}x{} {} frames at {:.3} fps", width, height, total, fps);

        Ok(Self {
            cap,
            fps,
            mat: Mat::default(),
        })
    }
}

impl FrameSource for VideoFileSource {
    fn fps(&self) -> f64 {
        self.fps
    }

    fn next_frame(&mut self) -> Result<Option<Frame>, Error> {
        if !self.cap.read(&mut self.mat)? {
            return Ok(None);
        }

        let (w, h) = (self.mat.cols(), self.mat.rows());
        if w == 0 || h == 0 {
            return Ok(None);
        }

        let data = self.mat.data_bytes()?.to_vec();

        Frame::from_bgr_bytes(w as u32, h as u32, data).map(Some)
    }
}

fn blank_mat(width: u32, height: u32, typ: i32) -> Result<Mat, Error> {
    let mat = Mat::new_rows_cols_with_default(
        height as i32,
        width as i32,
        typ,
        Scalar::all(0.0),
    )?;

    Ok(mat)
}

pub fn frame_to_mat(frame: &Frame) -> Result<Mat, Error> {
    let (w, h) = frame.dims;
    let mut mat = blank_mat(w, h, core::CV_8UC3)?;

    let dst = mat.data_bytes_mut()?;
    for (d, s) in dst.iter_mut().zip(frame.pixels().iter()) {
        *d = *s;
    }

    Ok(mat)
}

pub fn mask_to_mat(mask: &Mask) -> Result<Mat, Error> {
    let (w, h) = mask.dims();
    let mut mat = blank_mat(w, h, core::CV_8UC1)?;

    let dst = mat.data_bytes_mut()?;
    for (d, s) in dst.iter_mut().zip(mask.view().iter()) {
        *d = *s;
    }

    Ok(mat)
}

pub fn mat_to_mask(mat: &Mat) -> Result<Mask, Error> {
    let (w, h) = (mat.cols() as usize, mat.rows() as usize);

    let data = Array2::from_shape_vec((h, w), mat.data_bytes()?.to_vec())
        .map_err(|e| Error::InvalidFrame(e.to_string()))?;

    Ok(Mask::from_array(data))
}

fn hsv_scalar(hsv: Hsv) -> Scalar {
    Scalar::new(hsv.h as f64, hsv.s as f64, hsv.v as f64, 0.0)
}

/// Truncated blob centroid from the binary moments of `mask`
pub fn mat_centroid(mask: &Mat) -> Result<Option<Centroid>, Error> {
    let m = imgproc::moments(mask, true)?;

    if m.m00 <= 0.0 {
        return Ok(None);
    }

    Ok(Some(Centroid {
        x: (m.m10 / m.m00) as i32,
        y: (m.m01 / m.m00) as i32,
    }))
}

/// `Segmenter` on OpenCV: `cvt_color` to HSV, `in_range` on the band, then a
/// rectangular `MORPH_OPEN` with constant borders so the image edge is neutral.
pub struct CvSegmenter {
    config: SegmentationConfig,
    kernel: Mat,
}

impl CvSegmenter {
    pub fn new(config: SegmentationConfig) -> Result<Self, Error> {
        config.validate()?;

        let k = config.kernel_size as i32;
        let kernel = imgproc::get_structuring_element(
            imgproc::MORPH_RECT,
            Size::new(k, k),
            Point::new(-1, -1),
        )?;

        Ok(Self { config, kernel })
    }

    /// Raw and opened masks of a BGR image
    pub fn segment_mat(&self, img: &Mat) -> Result<(Mat, Mat), Error> {
        let mut hsv = Mat::default();
        imgproc::cvt_color(img, &mut hsv, imgproc::COLOR_BGR2HSV, 0)?;

        let band = &self.config.band;
        let mut raw = Mat::default();
        core::in_range(&hsv, &hsv_scalar(band.lower), &hsv_scalar(band.upper), &mut raw)?;

        let mut opened = Mat::default();
        imgproc::morphology_ex(
            &raw,
            &mut opened,
            imgproc::MORPH_OPEN,
            &self.kernel,
            Point::new(-1, -1),
            self.config.iterations as i32,
            core::BORDER_CONSTANT,
            imgproc::morphology_default_border_value()?,
        )?;

        Ok((raw, opened))
    }
}

impl BlobDetector for CvSegmenter {
    fn detect(&mut self, frame: &Frame) -> Result<BlobDetection, Error> {
        let (raw, opened) = self.segment_mat(&frame_to_mat(frame)?)?;
        let centroid = mat_centroid(&opened)?;

        Ok(BlobDetection {
            stages: SegmentStages {
                raw: mat_to_mask(&raw)?,
                opened: mat_to_mask(&opened)?,
            },
            centroid,
        })
    }
}

/// Polyline of the whole track plus a dot on the latest position
pub fn draw_track(img: &mut Mat, tracker: &KinematicsTracker) -> Result<(), Error> {
    for (a, b) in tracker.segments() {
        imgproc::line(
            img,
            to_point(a.0, a.1),
            to_point(b.0, b.1),
            bgr(0.0, 255.0, 0.0),
            2,
            imgproc::LINE_8,
            0,
        )?;
    }

    if let Some(last) = tracker.positions().last() {
        imgproc::circle(
            img,
            to_point(last.x, last.y),
            5,
            bgr(0.0, 0.0, 255.0),
            imgproc::FILLED,
            imgproc::LINE_8,
            0,
        )?;
    }

    Ok(())
}

fn put_label(
    img: &mut Mat,
    text: &str,
    x: i32,
    y: i32,
    scale: f64,
    color: Scalar,
) -> Result<(), Error> {
    imgproc::put_text(
        img,
        text,
        Point::new(x, y),
        imgproc::FONT_HERSHEY_SIMPLEX,
        scale,
        color,
        1,
        imgproc::LINE_AA,
        false,
    )?;

    Ok(())
}

/// Pixel-unit readout, drawn once acceleration is available
pub fn draw_readout(img: &mut Mat, readout: &Readout) -> Result<(), Error> {
    let (vel, acc) = match (readout.velocity, readout.acceleration) {
        (Some(v), Some(a)) => (v, a),
        _ => return Ok(()),
    };

    let white = bgr(255.0, 255.0, 255.0);
    let p = readout.position;

    let rows = [
        [
            format!("Pos_x={:.1}px", p.x),
            format!("Pos_y={:.1}px", p.y),
            String::new(),
        ],
        [
            format!("Vel={:.1}px/s", vel.speed),
            format!("Vel_x={:.1}px/s", vel.vx),
            format!("Vel_y={:.1}px/s", vel.vy),
        ],
        [
            format!("Ace={:.1}px/s2", acc.magnitude),
            format!("Ace_x={:.1}px/s2", acc.ax),
            format!("Ace_y={:.1}px/s2", acc.ay),
        ],
    ];

    for (row, texts) in rows.iter().enumerate() {
        for (col, text) in texts.iter().enumerate() {
            if !text.is_empty() {
                put_label(img, text, 10 + 220 * col as i32, 30 + 30 * row as i32, 0.7, white)?;
            }
        }
    }

    Ok(())
}

/// Calibration markers: a dot per point and the segment once both exist
pub fn draw_reference_points(img: &mut Mat, points: &[(f64, f64)]) -> Result<(), Error> {
    let red = bgr(0.0, 0.0, 255.0);

    for &(x, y) in points {
        imgproc::circle(img, to_point(x, y), 5, red, imgproc::FILLED, imgproc::LINE_8, 0)?;
    }

    if let [a, b] = points {
        imgproc::line(img, to_point(a.0, a.1), to_point(b.0, b.1), red, 2, imgproc::LINE_8, 0)?;
    }

    Ok(())
}

/// Last frame shown in the main window, shared with the operator input
pub type SharedFrame = Rc<RefCell<Option<Mat>>>;

/// Shows each processed frame with the track overlay and the mask previews
pub struct Viewer {
    window: String,
    show_masks: bool,
    shown: SharedFrame,
}

impl Viewer {
    pub fn new<S: ToString>(window: S, show_masks: bool) -> Result<Self, Error> {
        let window = window.to_string();
        highgui::named_window(&window, highgui::WINDOW_AUTOSIZE)?;

        Ok(Self {
            window,
            show_masks,
            shown: Rc::new(RefCell::new(None)),
        })
    }

    #[inline]
    pub fn window(&self) -> &str {
        &self.window
    }

    #[inline]
    pub fn shared_frame(&self) -> SharedFrame {
        self.shown.clone()
    }
}

impl FrameObserver for Viewer {
    fn on_frame(
        &mut self,
        pipeline: &Pipeline,
        frame: &Frame,
        outcome: &FrameOutcome,
        stages: &SegmentStages,
    ) -> Result<(), Error> {
        let mut img = frame_to_mat(frame)?;

        if outcome.detection.is_some() {
            draw_track(&mut img, pipeline.tracker())?;
        }

        if let Some(readout) = &outcome.readout {
            draw_readout(&mut img, readout)?;
        }

        highgui::imshow(&self.window, &img)?;
        *self.shown.borrow_mut() = Some(img);

        if self.show_masks {
            highgui::imshow("Sin operacion morfologica", &mask_to_mat(&stages.raw)?)?;
            highgui::imshow("Apertura (Open)", &mask_to_mat(&stages.opened)?)?;
        }

        Ok(())
    }
}

/// Keys: `p` pause, `c` commit, `r` resume without calibrating, `q` quit.
/// Left clicks on the main window pick reference points while paused. The
/// markers always mirror the points the calibration session holds.
pub struct KeyboardInput {
    window: String,
    delay_ms: i32,
    clicks: Arc<Mutex<VecDeque<(i32, i32)>>>,
    shown: SharedFrame,
    paused: Option<Mat>,
}

impl KeyboardInput {
    pub fn new(viewer: &Viewer, delay_ms: i32) -> Result<Self, Error> {
        let clicks = Arc::new(Mutex::new(VecDeque::new()));
        let sink = clicks.clone();

        highgui::set_mouse_callback(
            viewer.window(),
            Some(Box::new(move |event, x, y, _flags| {
                if event == highgui::EVENT_LBUTTONDOWN {
                    if let Ok(mut queue) = sink.lock() {
                        queue.push_back((x, y));
                    }
                }
            })),
        )?;

        Ok(Self {
            window: viewer.window().to_string(),
            delay_ms,
            clicks,
            shown: viewer.shared_frame(),
            paused: None,
        })
    }

    fn take_click(&self) -> Option<(i32, i32)> {
        self.clicks.lock().ok()?.pop_front()
    }

    fn clear_clicks(&self) {
        if let Ok(mut queue) = self.clicks.lock() {
            queue.clear();
        }
    }

    fn key(&self, delay: i32) -> i32 {
        match highgui::wait_key(delay) {
            Ok(key) if key >= 0 => key & 0xFF,
            Ok(_) => -1,
            Err(err) => {
                log::warn!("wait_key failed: {}", err);
                -1
            }
        }
    }

    fn redraw_paused(&self, points: &[(f64, f64)]) -> Result<(), Error> {
        if let Some(frame) = &self.paused {
            let mut img = frame.try_clone()?;
            draw_reference_points(&mut img, points)?;
            highgui::imshow(&self.window, &img)?;
        }

        Ok(())
    }
}

impl OperatorInput for KeyboardInput {
    fn poll(&mut self) -> Option<OperatorEvent> {
        match self.key(self.delay_ms) {
            KEY_QUIT => Some(OperatorEvent::Stop),
            KEY_PAUSE => {
                println!("Pausa. Selecciona 2 puntos para calibrar.");

                self.paused = self
                    .shown
                    .borrow()
                    .as_ref()
                    .and_then(|m| m.try_clone().ok());
                self.clear_clicks();

                Some(OperatorEvent::Pause)
            }
            _ => None,
        }
    }

    fn wait(&mut self) -> Option<OperatorEvent> {
        loop {
            if let Some((x, y)) = self.take_click() {
                return Some(OperatorEvent::Click {
                    x: x as f64,
                    y: y as f64,
                });
            }

            match self.key(30) {
                KEY_COMMIT => return Some(OperatorEvent::Commit),
                KEY_RESUME => {
                    println!("Reanudar sin calibrar.");
                    return Some(OperatorEvent::Discard);
                }
                KEY_QUIT => return Some(OperatorEvent::Stop),
                _ => {}
            }
        }
    }

    fn real_length(&mut self, pixel_distance: f64) -> Option<f64> {
        println!("Distancia en pixeles: {:.2}", pixel_distance);
        println!("Introduce la longitud real (m): ");

        let mut line = String::new();
        std::io::stdin().lock().read_line(&mut line).ok()?;

        match line.trim().parse::<f64>() {
            Ok(len) => Some(len),
            Err(err) => {
                log::warn!("invalid length {:?}: {}", line.trim(), err);
                None
            }
        }
    }

    fn calibration_updated(&mut self, session: &CalibrationSession) {
        if !session.is_active() {
            self.paused = None;
            return;
        }

        if let Err(err) = self.redraw_paused(session.points()) {
            log::warn!("unable to draw reference points: {}", err);
        }
    }
}

const PALETTE: [(f64, f64, f64); 4] = [
    (200.0, 100.0, 30.0),
    (40.0, 40.0, 220.0),
    (40.0, 160.0, 40.0),
    (160.0, 60.0, 160.0),
];

const PANEL_W: i32 = 640;
const PANEL_H: i32 = 360;
const MARGIN_L: i32 = 70;
const MARGIN_R: i32 = 20;
const MARGIN_T: i32 = 40;
const MARGIN_B: i32 = 70;

struct Bounds {
    x: (f64, f64),
    y: (f64, f64),
}

impl Bounds {
    fn of(chart: &Chart) -> Option<Self> {
        let mut pts = chart.series.iter().flat_map(|s| s.points.iter());
        let first = pts.next()?;

        let mut b = Bounds {
            x: (first.0, first.0),
            y: (first.1, first.1),
        };

        for p in pts {
            b.x = (b.x.0.min(p.0), b.x.1.max(p.0));
            b.y = (b.y.0.min(p.1), b.y.1.max(p.1));
        }

        for r in [&mut b.x, &mut b.y] {
            if r.1 - r.0 < f64::EPSILON {
                r.0 -= 0.5;
                r.1 += 0.5;
            }
        }

        Some(b)
    }
}

/// Draws one chart inside `area` of `canvas`
fn draw_chart(canvas: &mut Mat, chart: &Chart, area: Rect) -> Result<(), Error> {
    let black = bgr(0.0, 0.0, 0.0);
    let grey = bgr(200.0, 200.0, 200.0);

    let plot = Rect::new(
        area.x + MARGIN_L,
        area.y + MARGIN_T,
        area.width - MARGIN_L - MARGIN_R,
        area.height - MARGIN_T - MARGIN_B,
    );

    imgproc::rectangle(canvas, plot, black, 1, imgproc::LINE_8, 0)?;
    put_label(canvas, &chart.title, area.x + MARGIN_L, area.y + 25, 0.6, black)?;
    put_label(
        canvas,
        &chart.x_label,
        plot.x + plot.width / 2 - 40,
        plot.y + plot.height + 35,
        0.45,
        black,
    )?;
    put_label(canvas, &chart.y_label, area.x + 5, area.y + MARGIN_T - 8, 0.45, black)?;

    let bounds = match Bounds::of(chart) {
        Some(b) => b,
        None => return Ok(()),
    };

    let map = |x: f64, y: f64| {
        let fx = (x - bounds.x.0) / (bounds.x.1 - bounds.x.0);
        let mut fy = (y - bounds.y.0) / (bounds.y.1 - bounds.y.0);
        if !chart.invert_y {
            fy = 1.0 - fy;
        }

        to_point(
            plot.x as f64 + fx * plot.width as f64,
            plot.y as f64 + fy * plot.height as f64,
        )
    };

    // grid and tick labels at the quartiles
    for i in 0..=4 {
        let f = i as f64 / 4.0;
        let gx = plot.x + (f * plot.width as f64) as i32;
        let gy = plot.y + (f * plot.height as f64) as i32;

        let (top, bottom) = (Point::new(gx, plot.y), Point::new(gx, plot.y + plot.height));
        let (left, right) = (Point::new(plot.x, gy), Point::new(plot.x + plot.width, gy));

        imgproc::line(canvas, top, bottom, grey, 1, imgproc::LINE_8, 0)?;
        imgproc::line(canvas, left, right, grey, 1, imgproc::LINE_8, 0)?;

        let xv = bounds.x.0 + f * (bounds.x.1 - bounds.x.0);
        let yv = if chart.invert_y {
            bounds.y.0 + f * (bounds.y.1 - bounds.y.0)
        } else {
            bounds.y.1 - f * (bounds.y.1 - bounds.y.0)
        };

        put_label(canvas, &format!("{:.2}", xv), gx - 15, plot.y + plot.height + 15, 0.35, black)?;
        put_label(canvas, &format!("{:.2}", yv), area.x + 5, gy + 4, 0.35, black)?;
    }

    for (idx, series) in chart.series.iter().enumerate() {
        let (b, g, r) = PALETTE[idx % PALETTE.len()];
        let color = bgr(b, g, r);

        match series.style {
            Style::Line => {
                for w in series.points.windows(2) {
                    let (a, b) = (map(w[0].0, w[0].1), map(w[1].0, w[1].1));
                    imgproc::line(canvas, a, b, color, 2, imgproc::LINE_AA, 0)?;
                }
            }
            Style::Markers => {
                for p in &series.points {
                    let c = map(p.0, p.1);
                    imgproc::circle(canvas, c, 3, color, imgproc::FILLED, imgproc::LINE_AA, 0)?;
                }
            }
        }

        let lx = plot.x + plot.width - 140;
        let ly = plot.y + 15 + 18 * idx as i32;
        let (a, b) = (Point::new(lx, ly - 4), Point::new(lx + 20, ly - 4));
        imgproc::line(canvas, a, b, color, 2, imgproc::LINE_8, 0)?;
        put_label(canvas, &series.label, lx + 25, ly, 0.45, black)?;
    }

    for (i, note) in chart.annotations.iter().enumerate() {
        put_label(canvas, note, plot.x, plot.y + plot.height + 50 + 14 * i as i32, 0.4, black)?;
    }

    Ok(())
}

fn draw_grid(charts: &[Chart], cols: i32) -> Result<Mat, Error> {
    let rows = (charts.len() as i32 + cols - 1) / cols;
    let mut canvas = Mat::new_rows_cols_with_default(
        rows * PANEL_H,
        cols * PANEL_W,
        core::CV_8UC3,
        Scalar::all(255.0),
    )?;

    for (i, chart) in charts.iter().enumerate() {
        let (r, c) = (i as i32 / cols, i as i32 % cols);
        draw_chart(&mut canvas, chart, Rect::new(c * PANEL_W, r * PANEL_H, PANEL_W, PANEL_H))?;
    }

    Ok(canvas)
}

/// Renders charts to PNG files, optionally showing them until a key is pressed
pub struct PngChartRenderer {
    dir: PathBuf,
    display: bool,
}

impl PngChartRenderer {
    pub fn new<P: Into<PathBuf>>(dir: P, display: bool) -> Self {
        Self {
            dir: dir.into(),
            display,
        }
    }

    fn render(&self, name: &str, img: &Mat) -> Result<(), Error> {
        std::fs::create_dir_all(&self.dir)?;

        let path = self.dir.join(name);
        let path_str = path.to_string_lossy();
        if !imgcodecs::imwrite(&path_str, img, &core::Vector::new())? {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                format!("unable to write {}", path.display()),
            )));
        }
        log::info!("chart written to {}", path.display());

        if self.display {
            highgui::imshow(name, img)?;
        }

        Ok(())
    }

    fn render_all(&self, charts: &ChartSet) -> Result<(), Error> {
        self.render("kinematics.png", &draw_grid(&charts.kinematics, 1)?)?;

        if let Some(panels) = &charts.comparison {
            self.render("comparison.png", &draw_grid(panels, 2)?)?;
        }

        if self.display {
            highgui::wait_key(0)?;
        }

        Ok(())
    }
}

impl ChartRenderer for PngChartRenderer {
    fn render_charts(&mut self, charts: &ChartSet) {
        if let Err(err) = self.render_all(charts) {
            log::error!("chart rendering failed: {}", err);
        }
    }
}
