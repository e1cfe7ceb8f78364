//! Zone efficiency scoring.

use crate::zones::ZoneMetrics;
use crate::zones::types::NOMINAL_BATTERY_VOLTAGE;

/// Weight of the power-conversion ratio in the efficiency blend.
pub const POWER_WEIGHT: f32 = 0.7;
/// Weight of the battery-health proxy in the efficiency blend.
pub const VOLTAGE_WEIGHT: f32 = 0.3;

/// Scores how well a zone is converting its input power.
///
/// Blends the output/input ratio with battery voltage relative to the
/// 12.6 V nominal, each capped at 1.0:
///
/// `0.7 * min(output / input, 1) + 0.3 * min(voltage / 12.6, 1)`
///
/// A zone with no input power scores 0.
///
/// # Returns
///
/// A score in `[0, 1]`.
pub fn efficiency(metrics: &ZoneMetrics) -> f32 {
    if metrics.input_power.is_nan() || metrics.input_power <= 0.0 {
        return 0.0;
    }

    let power_ratio = ratio(metrics.output_power, metrics.input_power);
    let voltage_factor = ratio(metrics.battery_voltage, NOMINAL_BATTERY_VOLTAGE);

    (POWER_WEIGHT * power_ratio + VOLTAGE_WEIGHT * voltage_factor).clamp(0.0, 1.0)
}

/// `num / den` clamped to `[0, 1]`; NaN readings count as 0.
fn ratio(num: f32, den: f32) -> f32 {
    let r = num / den;
    if r.is_nan() { 0.0 } else { r.clamp(0.0, 1.0) }
}
