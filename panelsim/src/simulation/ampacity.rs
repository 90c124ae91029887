//! Continuous current ratings of conductors.

use crate::circuit::ConductorMaterial;

/// (cross-section mm², amps) for copper, two loaded cores, clipped
/// direct installation
const COPPER: [(f64, f64); 12] = [
    (1.5, 16.0),
    (2.5, 24.0),
    (4.0, 32.0),
    (6.0, 41.0),
    (10.0, 57.0),
    (16.0, 76.0),
    (25.0, 101.0),
    (35.0, 125.0),
    (50.0, 151.0),
    (70.0, 192.0),
    (95.0, 232.0),
    (120.0, 269.0),
];

/// Aluminium carries roughly this share of the copper rating
const ALUMINIUM_FACTOR: f64 = 0.78;

/// Permissible continuous current for a conductor.
///
/// Sizes between table rows use the next smaller row. Sizes outside the
/// table scale linearly from the nearest end.
pub fn ampacity(material: ConductorMaterial, cross_section_mm2: f64) -> f64 {
    let (min_size, min_amps) = COPPER[0];
    let (max_size, max_amps) = COPPER[COPPER.len() - 1];

    let copper = if cross_section_mm2 < min_size {
        min_amps * cross_section_mm2 / min_size
    } else if cross_section_mm2 > max_size {
        max_amps * cross_section_mm2 / max_size
    } else {
        COPPER
            .iter()
            .rev()
            .find(|(size, _)| *size <= cross_section_mm2)
            .map_or(min_amps, |(_, amps)| *amps)
    };

    match material {
        ConductorMaterial::Copper => copper,
        ConductorMaterial::Aluminium => copper * ALUMINIUM_FACTOR,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_rows() {
        assert_eq!(ampacity(ConductorMaterial::Copper, 1.5), 16.0);
        assert_eq!(ampacity(ConductorMaterial::Copper, 2.5), 24.0);
        assert_eq!(ampacity(ConductorMaterial::Copper, 120.0), 269.0);
    }

    #[test]
    fn test_between_rows_rounds_down() {
        assert_eq!(ampacity(ConductorMaterial::Copper, 3.0), 24.0);
    }

    #[test]
    fn test_outside_table_scales() {
        assert_eq!(ampacity(ConductorMaterial::Copper, 0.75), 8.0);
        assert_eq!(ampacity(ConductorMaterial::Copper, 240.0), 538.0);
    }

    #[test]
    fn test_aluminium_derated() {
        let al = ampacity(ConductorMaterial::Aluminium, 16.0);
        assert!((al - 76.0 * 0.78).abs() < 1e-9);
    }
}
