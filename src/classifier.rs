use crate::features::FeatureVector;
use crate::types::{Label, FEATURE_CHANNELS, MAX_SAMPLES, NUM_CHANNELS};
use log::{debug, error, info, warn};
use ort::session::Session;
use ort::tensor::TensorElementType;
use ort::value::ValueType;
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClassifierError {
    #[error("ONNX Runtime error: {0}")]
    OnnxError(#[from] ort::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Invalid feature size: expected {expected}, got {actual}")]
    InvalidFeatureSize { expected: usize, actual: usize },

    #[error("No output tensor found")]
    NoOutputTensor,

    #[error("Missing ONNX {kind}")]
    MissingIo { kind: &'static str },

    #[error("Model layout mismatch: {0}")]
    LayoutMismatch(String),

    #[error("Non-finite feature at index {index}")]
    NonFiniteFeature { index: usize },

    #[error("Non-finite score for class '{class}'")]
    NonFiniteScore { class: String },
}

fn default_max_samples() -> usize {
    MAX_SAMPLES
}

fn default_channels() -> Vec<String> {
    FEATURE_CHANNELS.iter().map(|c| c.to_string()).collect()
}

/// Manifiesto JSON que acompaña al .onnx. Fija el acoplamiento entre el
/// entrenamiento y el normalizador: clases, filas máximas y orden de canales.
#[derive(Debug, Clone, Deserialize)]
pub struct ModelManifest {
    index_to_class: HashMap<String, String>,
    #[serde(default = "default_max_samples")]
    pub max_samples: usize,
    #[serde(default = "default_channels")]
    pub channels: Vec<String>,
}

impl ModelManifest {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ClassifierError> {
        let content = fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    pub fn from_json(content: &str) -> Result<Self, ClassifierError> {
        let manifest: ModelManifest = serde_json::from_str(content)?;
        manifest.validate()?;
        Ok(manifest)
    }

    /// Comprueba que el modelo espera exactamente lo que produce el normalizador
    pub fn validate(&self) -> Result<(), ClassifierError> {
        if self.channels != FEATURE_CHANNELS {
            return Err(ClassifierError::LayoutMismatch(format!(
                "canales {:?}, el normalizador produce {:?}",
                self.channels, FEATURE_CHANNELS
            )));
        }
        if self.max_samples == 0 {
            return Err(ClassifierError::LayoutMismatch(
                "max_samples debe ser > 0".to_string(),
            ));
        }
        if self.index_to_class.is_empty() {
            return Err(ClassifierError::LayoutMismatch(
                "el manifiesto no define clases".to_string(),
            ));
        }
        Ok(())
    }

    pub fn feature_len(&self) -> usize {
        self.max_samples * NUM_CHANNELS
    }

    /// Nombres de clase ordenados por índice
    pub fn class_names(&self) -> Vec<String> {
        let mut pairs: Vec<(usize, String)> = self
            .index_to_class
            .iter()
            .filter_map(|(k, v)| k.parse::<usize>().ok().map(|idx| (idx, v.clone())))
            .collect();

        pairs.sort_by_key(|(idx, _)| *idx);
        pairs.into_iter().map(|(_, name)| name).collect()
    }
}

/// Modelo multiclase ya entrenado. Devuelve una puntuación por clase.
pub trait GestureModel {
    fn predict_scores(
        &mut self,
        features: &FeatureVector,
    ) -> Result<Vec<(String, f32)>, ClassifierError>;
}

/// Modelo exportado a ONNX, cargado una vez y reutilizado en cada sesión
pub struct OnnxModel {
    session: Session,
    labels: Vec<String>,
    input_name: String,
    prob_output_name: String,
    feature_len: usize,
}

impl OnnxModel {
    pub fn load(
        model_path: impl AsRef<Path>,
        manifest: &ModelManifest,
    ) -> Result<Self, ClassifierError> {
        let model_path = model_path.as_ref();
        manifest.validate()?;
        let labels = manifest.class_names();
        let feature_len = manifest.feature_len();

        let session = Session::builder()?.commit_from_file(model_path)?;

        let input = session
            .inputs
            .first()
            .ok_or(ClassifierError::MissingIo { kind: "input" })?;
        let input_name = input.name.clone();

        // Si el grafo declara la dimensión de features, tiene que cuadrar
        if let ValueType::Tensor { shape, .. } = &input.input_type {
            check_input_width(shape.iter().copied().last(), feature_len)?;
        }

        let prob_output_name = first_float_output(session.outputs.iter().map(|output| {
            let ty = match &output.output_type {
                ValueType::Tensor { ty, .. } => Some(*ty),
                _ => None,
            };
            (output.name.as_str(), ty)
        }))?;

        info!("[ONNX] Modelo cargado: {}", model_path.display());
        info!("[ONNX] Clases: {:?}", labels);
        debug!("[ONNX] Input: {} ({} features)", input_name, feature_len);
        debug!("[ONNX] Output: {}", prob_output_name);

        Ok(Self {
            session,
            labels,
            input_name,
            prob_output_name,
            feature_len,
        })
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }
}

impl GestureModel for OnnxModel {
    fn predict_scores(
        &mut self,
        features: &FeatureVector,
    ) -> Result<Vec<(String, f32)>, ClassifierError> {
        if features.len() != self.feature_len {
            return Err(ClassifierError::InvalidFeatureSize {
                expected: self.feature_len,
                actual: features.len(),
            });
        }

        // Tensor de entrada [1, max_samples * 6]
        let shape_vec = vec![1_usize, self.feature_len];
        let input_value =
            ort::value::Value::from_array((shape_vec, features.as_slice().to_vec()))?;

        let outputs = self.session.run(ort::inputs![
            self.input_name.as_str() => &input_value,
        ])?;

        let (score_shape, score_data) =
            outputs[self.prob_output_name.as_str()].try_extract_tensor::<f32>()?;

        let dims: Vec<i64> = score_shape.iter().copied().collect();
        label_scores(&self.labels, &dims, score_data)
    }
}

/// El último eje de la entrada es el de features. Dimensiones dinámicas
/// (<= 0) no se pueden comprobar hasta ejecutar.
fn check_input_width(last_dim: Option<i64>, feature_len: usize) -> Result<(), ClassifierError> {
    match last_dim {
        Some(dim) if dim > 0 && dim as usize != feature_len => {
            Err(ClassifierError::LayoutMismatch(format!(
                "el modelo espera {} features, el manifiesto implica {}",
                dim, feature_len
            )))
        }
        _ => Ok(()),
    }
}

/// Primera salida tensor f32. Con skl2onnx hace falta `zipmap=False`; si no,
/// las probabilidades salen como secuencia de mapas y no hay ninguna.
fn first_float_output<'a>(
    outputs: impl IntoIterator<Item = (&'a str, Option<TensorElementType>)>,
) -> Result<String, ClassifierError> {
    outputs
        .into_iter()
        .find(|(_, ty)| *ty == Some(TensorElementType::Float32))
        .map(|(name, _)| name.to_string())
        .ok_or(ClassifierError::MissingIo {
            kind: "float output",
        })
}

/// Empareja las puntuaciones [1, n_clases] con los nombres del manifiesto.
/// Un número de clases distinto al del manifiesto es un modelo equivocado.
fn label_scores(
    labels: &[String],
    score_shape: &[i64],
    score_data: &[f32],
) -> Result<Vec<(String, f32)>, ClassifierError> {
    let num_classes = match score_shape {
        [_, classes, ..] => *classes as usize,
        _ => score_data.len(),
    };
    if num_classes == 0 || score_data.len() < num_classes {
        return Err(ClassifierError::NoOutputTensor);
    }
    if num_classes != labels.len() {
        return Err(ClassifierError::LayoutMismatch(format!(
            "el modelo devuelve {} clases, el manifiesto define {}",
            num_classes,
            labels.len()
        )));
    }

    Ok(labels
        .iter()
        .zip(&score_data[..num_classes])
        .map(|(label, &score)| (label.clone(), score))
        .collect())
}

/// Resultado detallado de una predicción
#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    pub label: Label,
    pub class_name: String,
    pub score: f32,
}

/// Envoltorio sin estado sobre el modelo. `predict` nunca falla: ante
/// cualquier error del modelo devuelve `Label::Unknown`.
pub struct Classifier<M> {
    model: M,
}

impl<M: GestureModel> Classifier<M> {
    pub fn new(model: M) -> Self {
        Self { model }
    }

    pub fn scores(
        &mut self,
        features: &FeatureVector,
    ) -> Result<Vec<(String, f32)>, ClassifierError> {
        self.model.predict_scores(features)
    }

    /// Clase con mayor puntuación. Features o puntuaciones no finitas son un
    /// error: `total_cmp` ordenaría un NaN por encima de cualquier score real.
    pub fn try_predict(&mut self, features: &FeatureVector) -> Result<Prediction, ClassifierError> {
        if let Some(index) = features.as_slice().iter().position(|v| !v.is_finite()) {
            return Err(ClassifierError::NonFiniteFeature { index });
        }

        let scores = self.model.predict_scores(features)?;
        if let Some((class, _)) = scores.iter().find(|(_, score)| !score.is_finite()) {
            return Err(ClassifierError::NonFiniteScore {
                class: class.clone(),
            });
        }

        let (class_name, score) = scores
            .into_iter()
            .max_by(|(_, a), (_, b)| a.total_cmp(b))
            .ok_or(ClassifierError::NoOutputTensor)?;

        let label = Label::parse(&class_name);
        if label == Label::Unknown {
            warn!("El modelo predijo una clase sin gesto asociado: {:?}", class_name);
        }

        Ok(Prediction {
            label,
            class_name,
            score,
        })
    }

    pub fn predict(&mut self, features: &FeatureVector) -> Label {
        match self.try_predict(features) {
            Ok(prediction) => {
                debug!(
                    "Predicción: {} (score {:.3})",
                    prediction.class_name, prediction.score
                );
                prediction.label
            }
            Err(e) => {
                error!("Error al predecir ({} features): {}", features.len(), e);
                Label::Unknown
            }
        }
    }
}
