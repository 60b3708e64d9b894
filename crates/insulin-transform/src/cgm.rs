use insulin_model::CgmGridPoint;

use crate::grid::GridSeries;

/// Clamp a glucose reading into `[floor, ceiling]`.
///
/// Zero and the `LOW` sentinel land on the floor; `HIGH` lands on the ceiling.
pub fn clamp_reading(value: f64, floor: f64, ceiling: f64) -> f64 {
    value.clamp(floor, ceiling)
}

pub fn cgm_points(
    grid: &GridSeries,
    values: &[Option<f64>],
    floor: f64,
    ceiling: f64,
) -> Vec<CgmGridPoint> {
    grid.points()
        .iter()
        .zip(values)
        .map(|(&datetime, value)| CgmGridPoint {
            datetime,
            cgm: value.map(|value| clamp_reading(value, floor, ceiling)),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use insulin_model::{CGM_HIGH_MG_DL, CGM_LOW_MG_DL, CgmEvent};

    #[test]
    fn test_sentinels_and_zero() {
        let clamp = |raw: &str| {
            let value = CgmEvent::parse_value(raw).unwrap();
            clamp_reading(value, CGM_LOW_MG_DL, CGM_HIGH_MG_DL)
        };
        assert_eq!(clamp("0"), 40.0);
        assert_eq!(clamp("LOW"), 40.0);
        assert_eq!(clamp("HIGH"), 400.0);
        assert_eq!(clamp("512"), 400.0);
        assert_eq!(clamp("123.5"), 123.5);
    }
}
