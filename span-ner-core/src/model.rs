//! # Modelo Span-Marker
//!
//! O modelo encapsula:
//! - **Encoder**: produz os estados ocultos contextuais (colaborador via trait).
//! - **Extrator de features**: lê os marcadores de início/fim segundo o [`MarkerLayout`].
//! - **Classificador**: projeção linear `2H → num_labels`.
//! - **Tabela de labels**: já resolvida (esquema reduzido incluso).
//!
//! Toda validação de configuração acontece em [`SpanMarkerModel::new`]: um modelo
//! construído está sempre pronto para inferência.

use std::path::Path;

use ndarray::{Array2, Array3};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::classifier::SpanClassifier;
use crate::collator::Batch;
use crate::config::{LabelTable, SpanConfig};
use crate::encoder::{Encoder, HashingEncoder};
use crate::error::{Result, SpanError};
use crate::features::extract_marker_features;
use crate::layout::MarkerLayout;

/// Saída de uma passada forward.
#[derive(Debug, Clone, PartialEq)]
pub struct SpanOutput {
    /// Scores brutos `batch × M × num_labels`.
    pub logits: Array3<f32>,
    /// Loss média, presente apenas quando labels foram fornecidos.
    pub loss: Option<f32>,
    /// Número de spans reais por linha.
    pub num_spans: Vec<usize>,
}

/// Arquivo de modelo: configuração + pesos do classificador.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelFile {
    pub config: SpanConfig,
    /// Sem pesos, o classificador começa zerado.
    #[serde(default)]
    pub classifier: Option<SpanClassifier>,
}

impl ModelFile {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let mut file: ModelFile = serde_json::from_str(json)?;
        file.config.derive_missing_scheme();
        file.config.validate()?;
        Ok(file)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    /// Constrói o modelo com o [`HashingEncoder`] de referência.
    pub fn into_model(self) -> Result<SpanMarkerModel<HashingEncoder>> {
        let encoder = HashingEncoder::new(self.config.hidden_size)?;
        let classifier = self
            .classifier
            .unwrap_or_else(|| SpanClassifier::zeros(self.config.hidden_size, self.config.num_labels()));
        SpanMarkerModel::new(self.config, encoder, classifier)
    }
}

pub struct SpanMarkerModel<E: Encoder> {
    config: SpanConfig,
    labels: LabelTable,
    layout: MarkerLayout,
    encoder: E,
    classifier: SpanClassifier,
}

impl<E: Encoder> SpanMarkerModel<E> {
    /// Monta o modelo, validando labels, layout e dimensões.
    pub fn new(config: SpanConfig, encoder: E, classifier: SpanClassifier) -> Result<Self> {
        config.validate()?;
        if encoder.hidden_size() != config.hidden_size {
            return Err(SpanError::config(format!(
                "encoder produz H={}, configuração espera H={}",
                encoder.hidden_size(),
                config.hidden_size
            )));
        }
        classifier.check_dims(config.hidden_size, config.num_labels())?;

        let labels = LabelTable::from_config(&config)?;
        let layout = config.layout()?;
        Ok(Self {
            config,
            labels,
            layout,
            encoder,
            classifier,
        })
    }

    pub fn config(&self) -> &SpanConfig {
        &self.config
    }

    pub fn labels(&self) -> &LabelTable {
        &self.labels
    }

    pub fn layout(&self) -> MarkerLayout {
        self.layout
    }

    pub fn classifier(&self) -> &SpanClassifier {
        &self.classifier
    }

    /// Encoder → features dos marcadores → classificador.
    ///
    /// Com `labels` (`batch × M`, padding = `IGNORE_INDEX`), calcula também a loss.
    pub fn forward(&self, batch: &Batch, labels: Option<&Array2<i64>>) -> Result<SpanOutput> {
        let hidden = self.encoder.encode(batch)?;
        let expected = (batch.rows(), batch.seq_len(), self.config.hidden_size);
        if hidden.dim() != expected {
            return Err(SpanError::shape(format!(
                "encoder devolveu {:?}, esperado {expected:?}",
                hidden.dim()
            )));
        }

        let features = extract_marker_features(&hidden, &self.layout)?;
        let logits = self.classifier.forward(&features)?;
        debug!(rows = batch.rows(), seq_len = batch.seq_len(), "forward concluído");

        let loss = labels
            .map(|labels| self.classifier.loss(&logits, labels))
            .transpose()?;

        Ok(SpanOutput {
            logits,
            loss,
            num_spans: batch.num_spans.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::IGNORE_INDEX;
    use crate::collator::MarkerCollator;
    use crate::tokenizer::{Sentence, SpanTokenizer, WordTokenizer};
    use ndarray::Array1;

    fn small_config() -> SpanConfig {
        let mut config = SpanConfig::from_labels(&["O", "PER", "LOC"]);
        config.hidden_size = 8;
        config.marker_max_length = 4;
        config.entity_max_length = 2;
        config
    }

    fn batch_for(config: &SpanConfig, text: &str) -> Batch {
        let tokenizer = WordTokenizer::from_config(config).unwrap();
        let tokenized = tokenizer.tokenize(&Sentence::Text(text.into())).unwrap();
        MarkerCollator::new(tokenizer.layout())
            .collate(&tokenized.rows)
            .unwrap()
    }

    #[test]
    fn test_forward_shapes() {
        let config = small_config();
        let batch = batch_for(&config, "Lula visitou Recife");
        let model = SpanMarkerModel::new(
            config.clone(),
            HashingEncoder::new(8).unwrap(),
            SpanClassifier::zeros(8, 3),
        )
        .unwrap();

        let output = model.forward(&batch, None).unwrap();
        // 3 palavras, comprimento 2 → 5 spans → 2 linhas de 4 marcadores
        assert_eq!(output.logits.dim(), (2, 4, 3));
        assert_eq!(output.num_spans, vec![4, 1]);
        assert!(output.loss.is_none());
    }

    #[test]
    fn test_forward_with_labels_computes_loss() {
        let config = small_config();
        let batch = batch_for(&config, "Lula venceu");
        let model = SpanMarkerModel::new(
            config,
            HashingEncoder::new(8).unwrap(),
            SpanClassifier::zeros(8, 3),
        )
        .unwrap();

        let labels = Array2::from_shape_vec((1, 4), vec![1, 0, 0, IGNORE_INDEX]).unwrap();
        let output = model.forward(&batch, Some(&labels)).unwrap();
        let loss = output.loss.unwrap();
        assert!((loss - 3f32.ln()).abs() < 1e-5);
    }

    #[test]
    fn test_encoder_hidden_size_mismatch() {
        let result = SpanMarkerModel::new(
            small_config(),
            HashingEncoder::new(16).unwrap(),
            SpanClassifier::zeros(8, 3),
        );
        assert!(matches!(result, Err(SpanError::Config(_))));
    }

    #[test]
    fn test_classifier_label_mismatch() {
        let weight = Array2::zeros((2, 16));
        let result = SpanClassifier::new(weight, Array1::zeros(2), 8, 2).and_then(|classifier| {
            SpanMarkerModel::new(small_config(), HashingEncoder::new(8).unwrap(), classifier)
        });
        assert!(matches!(result, Err(SpanError::Config(_))));
    }

    #[test]
    fn test_model_file_without_weights() {
        let json = r#"{"config": {"labels": ["O", "PER"], "hidden_size": 4, "marker_max_length": 2}}"#;
        let model = ModelFile::from_json_str(json).unwrap().into_model().unwrap();
        assert_eq!(model.classifier().num_labels(), 2);
        assert_eq!(model.layout().marker_count, 2);
    }
}
