use crate::types::{Session, MAX_SAMPLES, NUM_CHANNELS};

/// Vector plano [max_samples * 6] listo para el modelo.
/// Layout: [fila][canal], canales en el orden de `FEATURE_CHANNELS`.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureVector {
    values: Vec<f32>,
    max_samples: usize,
    rows_used: usize,
}

impl FeatureVector {
    pub fn as_slice(&self) -> &[f32] {
        &self.values
    }

    pub fn into_vec(self) -> Vec<f32> {
        self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn max_samples(&self) -> usize {
        self.max_samples
    }

    /// Filas con datos reales (el resto es relleno de ceros)
    pub fn rows_used(&self) -> usize {
        self.rows_used
    }
}

/// Convierte una sesión de longitud variable en un vector de tamaño fijo:
/// se quedan las primeras `max_samples` filas y se rellena con ceros al final.
///
/// El tiempo no entra. `max_samples` y el orden de canales tienen que ser los
/// mismos con los que se entrenó el modelo (ver `ModelManifest`).
#[derive(Debug, Clone, Copy)]
pub struct FeatureNormalizer {
    max_samples: usize,
}

impl FeatureNormalizer {
    pub fn new(max_samples: usize) -> Self {
        Self { max_samples }
    }

    pub fn max_samples(&self) -> usize {
        self.max_samples
    }

    pub fn feature_len(&self) -> usize {
        self.max_samples * NUM_CHANNELS
    }

    pub fn normalize(&self, session: &Session) -> FeatureVector {
        normalize(session, self.max_samples)
    }
}

impl Default for FeatureNormalizer {
    fn default() -> Self {
        Self::new(MAX_SAMPLES)
    }
}

pub fn normalize(session: &Session, max_samples: usize) -> FeatureVector {
    let mut flat = vec![0.0f32; max_samples * NUM_CHANNELS];
    let rows = session.samples().iter().take(max_samples);
    let rows_used = rows.len();

    for (row, sample) in rows.enumerate() {
        sample.to_flat_array(&mut flat, row);
    }

    FeatureVector {
        values: flat,
        max_samples,
        rows_used,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Sample, FEATURE_LEN};

    fn ramp_session(n: usize) -> Session {
        (0..n)
            .map(|i| {
                let v = i as f32 + 1.0;
                Sample::new(i as f64 * 10.0, [v, v + 0.1, v + 0.2], [-v, -v - 0.1, -v - 0.2])
            })
            .collect::<Vec<_>>()
            .into()
    }

    #[test]
    fn test_length_is_fixed() {
        for n in [0, 1, 7, 400, 401, 402, 1000] {
            let features = normalize(&ramp_session(n), MAX_SAMPLES);
            assert_eq!(features.len(), FEATURE_LEN, "n = {}", n);
            assert_eq!(features.rows_used(), n.min(MAX_SAMPLES));
        }
    }

    #[test]
    fn test_truncation_keeps_first_rows() {
        let m = 5;
        let session = ramp_session(9);
        let features = normalize(&session, m);

        let expected: Vec<f32> = session.samples()[..m]
            .iter()
            .flat_map(|s| s.channels())
            .collect();
        assert_eq!(features.as_slice(), expected.as_slice());

        // Nada de las filas 6..9 (valores >= 6.0)
        assert!(features.as_slice().iter().all(|v| v.abs() < 6.0));
    }

    #[test]
    fn test_short_session_is_zero_padded() {
        let m = 10;
        let session = ramp_session(3);
        let features = normalize(&session, m);
        let values = features.as_slice();

        let expected: Vec<f32> = session.samples().iter().flat_map(|s| s.channels()).collect();
        assert_eq!(&values[..3 * NUM_CHANNELS], expected.as_slice());
        assert!(values[3 * NUM_CHANNELS..].iter().all(|&v| v == 0.0));
        assert_eq!(values.len() - 3 * NUM_CHANNELS, (m - 3) * NUM_CHANNELS);
    }

    #[test]
    fn test_time_column_excluded() {
        let session: Session = vec![Sample::new(12345.0, [0.0; 3], [0.0; 3])].into();
        let features = FeatureNormalizer::new(1).normalize(&session);
        assert_eq!(features.as_slice(), &[0.0; NUM_CHANNELS]);
    }

    #[test]
    fn test_all_zero_full_session() {
        let session: Session = vec![Sample::default(); MAX_SAMPLES].into();
        let features = FeatureNormalizer::default().normalize(&session);
        assert_eq!(features.len(), FEATURE_LEN);
        assert_eq!(features.rows_used(), MAX_SAMPLES);
        assert!(features.into_vec().iter().all(|&v| v == 0.0));
    }
}
