use textplots::{Chart, Plot};

use crate::types::MeasurementSample;

/// Determine the best scale and unit for a given maximum value
fn determine_scale(max_value: f64) -> (f64, &'static str) {
    if max_value >= 1.0 {
        (1.0, "")
    } else if max_value >= 1e-3 {
        (1e3, "m")
    } else if max_value >= 1e-6 {
        (1e6, "μ")
    } else if max_value >= 1e-9 {
        (1e9, "n")
    } else {
        (1e12, "p")
    }
}

/// Print an I-V curve of a sweep to the terminal
///
/// Voltage runs along the x axis, current is scaled to the largest
/// magnitude in the data.
///
/// # Arguments
/// * `samples` - Sweep points in acquisition order
/// * `title` - Optional title for the plot
/// * `width` - Optional plot width (default: 140)
/// * `height` - Optional plot height (default: 60)
///
/// # Examples
/// ```
/// use smu_sweep::{plot_iv, MeasurementSample};
///
/// let samples: Vec<_> = [0.0, 0.5, 1.0]
///     .iter()
///     .map(|&v| MeasurementSample::new(v, v / 1e6, 1e-12))
///     .collect();
/// plot_iv(&samples, Some("1 MΩ"), None, None).unwrap();
/// ```
pub fn plot_iv(
    samples: &[MeasurementSample],
    title: Option<&str>,
    width: Option<usize>,
    height: Option<usize>,
) -> Result<(), Box<dyn std::error::Error>> {
    if samples.is_empty() {
        return Err("Cannot plot empty data".into());
    }

    let width = width.unwrap_or(140);
    let height = height.unwrap_or(60);

    let min_current = samples.iter().fold(f64::INFINITY, |a, s| a.min(s.current));
    let max_current = samples
        .iter()
        .fold(f64::NEG_INFINITY, |a, s| a.max(s.current));
    let (current_scale, current_unit) =
        determine_scale(max_current.abs().max(min_current.abs()));

    let mut v_min = samples.iter().fold(f64::INFINITY, |a, s| a.min(s.voltage));
    let mut v_max = samples
        .iter()
        .fold(f64::NEG_INFINITY, |a, s| a.max(s.voltage));
    if v_min == v_max {
        // textplots needs a non-empty x range
        v_min -= 0.5;
        v_max += 0.5;
    }

    let frame: Vec<(f32, f32)> = samples
        .iter()
        .map(|s| (s.voltage as f32, (s.current * current_scale) as f32))
        .collect();

    println!("{}", title.unwrap_or("I-V Curve"));
    println!("X-axis: Voltage (V) | Y-axis: Current ({}A)", current_unit);
    println!(
        "Range: {} points | Current: {:.3} to {:.3} {}A",
        samples.len(),
        min_current * current_scale,
        max_current * current_scale,
        current_unit
    );
    println!("{}", "─".repeat(width));

    Chart::new(width as u32, height as u32, v_min as f32, v_max as f32)
        .lineplot(&textplots::Shape::Lines(&frame))
        .nice();

    println!("Voltage (V) →");

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_determine_scale() {
        assert_eq!(determine_scale(5.0), (1.0, ""));
        assert_eq!(determine_scale(0.005), (1e3, "m"));
        assert_eq!(determine_scale(5e-6), (1e6, "μ"));
        assert_eq!(determine_scale(5e-9), (1e9, "n"));
        assert_eq!(determine_scale(5e-12), (1e12, "p"));
    }

    #[test]
    fn test_plot_iv_basic() {
        let samples: Vec<_> = (0..5)
            .map(|i| {
                let v = -1.0 + 0.5 * i as f64;
                MeasurementSample::new(v, v / 1000.0, 1e-12)
            })
            .collect();
        assert!(plot_iv(&samples, Some("Test Plot"), Some(60), Some(20)).is_ok());
    }

    #[test]
    fn test_plot_empty_data() {
        assert!(plot_iv(&[], None, None, None).is_err());
    }

    #[test]
    fn test_plot_constant_voltage() {
        let samples = vec![MeasurementSample::new(0.5, 1e-9, 1e-12); 3];
        assert!(plot_iv(&samples, None, Some(40), Some(20)).is_ok());
    }
}
