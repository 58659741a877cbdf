use serde_derive::{Deserialize, Serialize};

use crate::fit::{FitMetrics, FitReport};
use crate::kinematics::{AccelerationSample, Sample, VelocitySample};

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Units {
    Pixels,
    Meters,
}

impl Units {
    pub fn length(&self) -> &'static str {
        match self {
            Units::Pixels => "px",
            Units::Meters => "m",
        }
    }

    pub fn velocity(&self) -> &'static str {
        match self {
            Units::Pixels => "px/s",
            Units::Meters => "m/s",
        }
    }

    pub fn acceleration(&self) -> &'static str {
        match self {
            Units::Pixels => "px/s²",
            Units::Meters => "m/s²",
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Style {
    Markers,
    Line,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Series {
    pub label: String,
    pub style: Style,
    pub points: Vec<(f64, f64)>,
}

impl Series {
    fn new<S: ToString>(label: S, style: Style, points: Vec<(f64, f64)>) -> Self {
        Self {
            label: label.to_string(),
            style,
            points,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Chart {
    pub title: String,
    pub x_label: String,
    pub y_label: String,
    /// image coordinates grow downwards
    pub invert_y: bool,
    pub series: Vec<Series>,
    pub annotations: Vec<String>,
}

impl Chart {
    fn new<S: ToString>(title: S, x_label: String, y_label: String) -> Self {
        Self {
            title: title.to_string(),
            x_label,
            y_label,
            invert_y: false,
            series: Vec::new(),
            annotations: Vec::new(),
        }
    }
}

/// Renderer-agnostic description of every chart the run produces
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ChartSet {
    pub units: Units,
    /// trajectory, velocity and acceleration
    pub kinematics: Vec<Chart>,
    /// x vs t, y vs t, trajectory and speed against the fitted model
    pub comparison: Option<Vec<Chart>>,
}

impl ChartSet {
    /// Kinematic series are converted with `scale` when present and left in
    /// pixels otherwise.
    pub fn build(
        positions: &[Sample],
        velocities: &[VelocitySample],
        accelerations: &[AccelerationSample],
        scale: Option<f64>,
        fit: Option<&FitReport>,
    ) -> Self {
        let (units, k) = match scale {
            Some(s) => (Units::Meters, s),
            None => (Units::Pixels, 1.0),
        };

        let time = || "Tiempo (s)".to_string();

        let mut trajectory = Chart::new(
            "Trayectoria",
            format!("x ({})", units.length()),
            format!("y ({})", units.length()),
        );
        trajectory.invert_y = true;
        trajectory.series.push(Series::new(
            "Experimental",
            Style::Markers,
            positions.iter().map(|p| (p.x * k, p.y * k)).collect(),
        ));

        let mut velocity = Chart::new(
            "Velocidad",
            time(),
            format!("Velocidad ({})", units.velocity()),
        );
        velocity.series = vec![
            line("Vx", velocities, |v| (v.timestamp, v.vx * k)),
            line("Vy", velocities, |v| (v.timestamp, v.vy * k)),
            line("V", velocities, |v| (v.timestamp, v.speed * k)),
        ];

        let mut acceleration = Chart::new(
            "Aceleración",
            time(),
            format!("Aceleración ({})", units.acceleration()),
        );
        acceleration.series = vec![
            line("Ax", accelerations, |a| (a.timestamp, a.ax * k)),
            line("Ay", accelerations, |a| (a.timestamp, a.ay * k)),
            line("A", accelerations, |a| (a.timestamp, a.magnitude * k)),
        ];

        Self {
            units,
            kinematics: vec![trajectory, velocity, acceleration],
            comparison: fit.map(|fit| comparison(fit, velocities)),
        }
    }

    #[inline]
    pub fn has_comparison(&self) -> bool {
        self.comparison.is_some()
    }
}

fn line<T, F>(label: &str, items: &[T], point: F) -> Series
where
    F: Fn(&T) -> (f64, f64),
{
    Series::new(label, Style::Line, items.iter().map(point).collect())
}

fn markers<T, F>(label: &str, items: &[T], point: F) -> Series
where
    F: Fn(&T) -> (f64, f64),
{
    Series::new(label, Style::Markers, items.iter().map(point).collect())
}

fn metrics_line(m: &FitMetrics) -> String {
    format!("RMSE={:.4}  MAE={:.4}  R²={:.4}", m.rmse, m.mae, m.r_squared)
}

fn comparison(fit: &FitReport, velocities: &[VelocitySample]) -> Vec<Chart> {
    let exp = &fit.experimental;
    let model = &fit.theoretical;
    let p = &fit.params;

    let mut x_t = Chart::new("Posición X vs t", "Tiempo (s)".into(), "x (m)".into());
    x_t.series = vec![
        markers("Experimental", exp, |s| (s.timestamp, s.x)),
        line("Modelo", model, |m| (m.timestamp, m.x)),
    ];
    x_t.annotations.push(metrics_line(&fit.x_metrics));

    let mut y_t = Chart::new("Posición Y vs t", "Tiempo (s)".into(), "y (m)".into());
    y_t.series = vec![
        markers("Experimental", exp, |s| (s.timestamp, s.y)),
        line("Modelo", model, |m| (m.timestamp, m.y)),
    ];
    y_t.annotations.push(metrics_line(&fit.y_metrics));

    let mut xy = Chart::new("Trayectoria X vs Y", "x (m)".into(), "y (m)".into());
    xy.invert_y = true;
    xy.series = vec![
        markers("Experimental", exp, |s| (s.x, s.y)),
        line("Modelo", model, |m| (m.x, m.y)),
    ];
    xy.annotations.push(format!("x0={:.4} m  vx0={:.4} m/s", p.x0, p.vx0));
    xy.annotations.push(format!("y0={:.4} m  vy0={:.4} m/s  g={:.4} m/s²", p.y0, p.vy0, p.g));

    let mut v_t = Chart::new("Velocidad vs t", "Tiempo (s)".into(), "Velocidad (m/s)".into());
    v_t.series = vec![
        markers("Experimental", velocities, |v| (v.timestamp, v.speed * fit.scale)),
        line("Modelo", model, |m| (m.timestamp, m.speed)),
    ];
    if let Some(m) = &fit.speed_metrics {
        v_t.annotations.push(metrics_line(m));
    }

    vec![x_t, y_t, xy, v_t]
}

pub trait ChartRenderer {
    fn render_charts(&mut self, charts: &ChartSet);
}
