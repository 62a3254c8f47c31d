use crate::core::spectral_index::IndexObservation;
use crate::types::{year_start, BaselineError, BaselineResult};
use chrono::{DateTime, Datelike, Utc};
use ndarray::{Array1, Array2};
use std::f64::consts::PI;

/// Mean Gregorian year, used only outside chrono's representable calendar range
const MILLIS_PER_YEAR: f64 = 365.2425 * 86_400_000.0;

/// Fractional calendar years elapsed since 1970-01-01.
///
/// Whole years are counted by calendar year; the remainder is the elapsed
/// fraction of the acquisition's own year, so leap years are spread evenly.
pub fn decimal_years_since_epoch(time: &DateTime<Utc>) -> f64 {
    let year = time.year();
    match (year_start(year), year_start(year + 1)) {
        (Ok(start), Ok(next)) => {
            let span = (next - start).num_milliseconds() as f64;
            let elapsed = (*time - start).num_milliseconds() as f64;
            (year - 1970) as f64 + elapsed / span
        }
        _ => time.timestamp_millis() as f64 / MILLIS_PER_YEAR,
    }
}

fn frequency_label(frequency: f64) -> String {
    if frequency.fract() == 0.0 {
        format!("{}", frequency as i64)
    } else {
        format!("{}", frequency)
    }
}

/// Ordered regression terms `[constant, t, cos_f.., sin_f..]` for a frequency set
#[derive(Debug, Clone, PartialEq)]
pub struct HarmonicDesign {
    frequencies: Vec<f64>,
    term_names: Vec<String>,
}

impl HarmonicDesign {
    /// Build the term set; frequencies are sorted ascending.
    pub fn new(frequencies: &[f64]) -> BaselineResult<Self> {
        if frequencies.is_empty() {
            return Err(BaselineError::InvalidConfiguration(
                "Harmonic frequency set is empty".to_string(),
            ));
        }
        if frequencies.iter().any(|f| !f.is_finite() || *f <= 0.0) {
            return Err(BaselineError::InvalidConfiguration(format!(
                "Harmonic frequencies must be positive and finite: {:?}",
                frequencies
            )));
        }
        let mut sorted = frequencies.to_vec();
        sorted.sort_by(f64::total_cmp);
        if sorted.windows(2).any(|w| w[0] == w[1]) {
            return Err(BaselineError::InvalidConfiguration(format!(
                "Duplicate harmonic frequency in {:?}",
                frequencies
            )));
        }

        let mut term_names = vec!["constant".to_string(), "t".to_string()];
        term_names.extend(sorted.iter().map(|f| format!("cos_{}", frequency_label(*f))));
        term_names.extend(sorted.iter().map(|f| format!("sin_{}", frequency_label(*f))));

        Ok(Self {
            frequencies: sorted,
            term_names,
        })
    }

    pub fn frequencies(&self) -> &[f64] {
        &self.frequencies
    }

    pub fn term_names(&self) -> &[String] {
        &self.term_names
    }

    /// Parameter count p = 2 + 2|F|
    pub fn num_terms(&self) -> usize {
        self.term_names.len()
    }

    /// Term values for a decimal-year time
    pub fn terms_at_years(&self, t: f64) -> Array1<f64> {
        let k = self.frequencies.len();
        let mut row = Array1::zeros(2 + 2 * k);
        row[0] = 1.0;
        row[1] = t;
        for (i, f) in self.frequencies.iter().enumerate() {
            let angle = 2.0 * PI * f * t;
            row[2 + i] = angle.cos();
            row[2 + k + i] = angle.sin();
        }
        row
    }

    /// Term values for an acquisition timestamp
    pub fn terms_at(&self, time: &DateTime<Utc>) -> Array1<f64> {
        self.terms_at_years(decimal_years_since_epoch(time))
    }

    /// Attach the design terms to an index observation
    pub fn augment(&self, observation: IndexObservation) -> DesignedObservation {
        let terms = self.terms_at(&observation.metadata.acquired);
        DesignedObservation { observation, terms }
    }

    /// Design matrix (observations x terms) for a sequence of timestamps
    pub fn design_matrix(&self, times: &[DateTime<Utc>]) -> Array2<f64> {
        let p = self.num_terms();
        let mut x = Array2::zeros((times.len(), p));
        for (i, time) in times.iter().enumerate() {
            x.row_mut(i).assign(&self.terms_at(time));
        }
        x
    }
}

/// Index observation with its regression terms.
///
/// Every term is constant across the footprint, so the terms are stored once
/// per observation rather than as full rasters.
#[derive(Debug, Clone)]
pub struct DesignedObservation {
    pub observation: IndexObservation,
    pub terms: Array1<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_decimal_years() {
        let epoch = Utc.with_ymd_and_hms(1970, 1, 1, 0, 0, 0).unwrap();
        assert_abs_diff_eq!(decimal_years_since_epoch(&epoch), 0.0);

        // 2016 is a leap year: 1 July is day 182 of 366
        let mid = Utc.with_ymd_and_hms(2016, 7, 1, 0, 0, 0).unwrap();
        assert_abs_diff_eq!(decimal_years_since_epoch(&mid), 46.0 + 182.0 / 366.0, epsilon = 1e-12);

        let before = Utc.with_ymd_and_hms(1969, 7, 2, 12, 0, 0).unwrap();
        assert!(decimal_years_since_epoch(&before) < 0.0);
    }

    #[test]
    fn test_term_naming_and_order() {
        let design = HarmonicDesign::new(&[3.0, 1.0]).unwrap();
        assert_eq!(design.term_names(), &["constant", "t", "cos_1", "cos_3", "sin_1", "sin_3"]);
        assert_eq!(design.num_terms(), 6);
        assert_eq!(design.frequencies(), &[1.0, 3.0]);

        let half = HarmonicDesign::new(&[0.5]).unwrap();
        assert_eq!(half.term_names()[2], "cos_0.5");
    }

    #[test]
    fn test_terms_at() {
        let design = HarmonicDesign::new(&[1.0, 2.0]).unwrap();
        let row = design.terms_at_years(45.25);
        assert_abs_diff_eq!(row[0], 1.0);
        assert_abs_diff_eq!(row[1], 45.25);
        // quarter year: cos(pi/2) = 0, sin(pi/2) = 1, cos(pi) = -1
        assert_abs_diff_eq!(row[2], 0.0, epsilon = 1e-9);
        assert_abs_diff_eq!(row[3], -1.0, epsilon = 1e-9);
        assert_abs_diff_eq!(row[4], 1.0, epsilon = 1e-9);
        assert_abs_diff_eq!(row[5], 0.0, epsilon = 1e-9);
    }

    #[test]
    fn test_invalid_frequencies() {
        assert!(HarmonicDesign::new(&[]).is_err());
        assert!(HarmonicDesign::new(&[1.0, -2.0]).is_err());
        assert!(HarmonicDesign::new(&[2.0, 2.0]).is_err());
        assert!(HarmonicDesign::new(&[f64::NAN]).is_err());
    }
}
