//! # Classificador de Spans
//!
//! Projeção linear de cada vetor de features (`2H`) para um score bruto por label:
//!
//! $$ \text{logits} = x \cdot W^\top + b, \quad W \in \mathbb{R}^{K \times 2H} $$
//!
//! Os scores não são normalizados aqui. A softmax fica na decodificação, para que o
//! mesmo classificador sirva ao cálculo da loss de treino.
//!
//! ## Loss
//! Entropia cruzada média (negative log-likelihood da softmax) sobre os slots cujo
//! label não é [`IGNORE_INDEX`]. Slots de padding devem vir marcados com esse valor.

use ndarray::{Array1, Array2, Array3, Axis};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SpanError};

/// Label de slot ignorado pela loss (padding).
pub const IGNORE_INDEX: i64 = -100;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpanClassifier {
    /// `num_labels × 2H`
    weight: Array2<f32>,
    /// `num_labels`
    bias: Array1<f32>,
}

impl SpanClassifier {
    /// Cria o classificador validando as dimensões contra a configuração.
    pub fn new(weight: Array2<f32>, bias: Array1<f32>, hidden_size: usize, num_labels: usize) -> Result<Self> {
        let classifier = Self { weight, bias };
        classifier.check_dims(hidden_size, num_labels)?;
        Ok(classifier)
    }

    /// Classificador com pesos zerados (todas as labels empatadas).
    pub fn zeros(hidden_size: usize, num_labels: usize) -> Self {
        Self {
            weight: Array2::zeros((num_labels, 2 * hidden_size)),
            bias: Array1::zeros(num_labels),
        }
    }

    pub fn num_labels(&self) -> usize {
        self.weight.nrows()
    }

    /// Dimensão de entrada esperada (`2H`).
    pub fn input_dim(&self) -> usize {
        self.weight.ncols()
    }

    pub fn check_dims(&self, hidden_size: usize, num_labels: usize) -> Result<()> {
        if self.weight.dim() != (num_labels, 2 * hidden_size) {
            return Err(SpanError::config(format!(
                "pesos do classificador {:?}, esperado ({num_labels}, {})",
                self.weight.dim(),
                2 * hidden_size
            )));
        }
        if self.bias.len() != num_labels {
            return Err(SpanError::config(format!(
                "bias do classificador com {} entradas, esperado {num_labels}",
                self.bias.len()
            )));
        }
        Ok(())
    }

    /// Scores brutos `batch × M × num_labels` para features `batch × M × 2H`.
    pub fn forward(&self, features: &Array3<f32>) -> Result<Array3<f32>> {
        let (rows, slots, dim) = features.dim();
        if dim != self.input_dim() {
            return Err(SpanError::shape(format!(
                "features com dimensão {dim}, classificador espera {}",
                self.input_dim()
            )));
        }

        let mut logits = Array3::zeros((rows, slots, self.num_labels()));
        for (b, row) in features.axis_iter(Axis(0)).enumerate() {
            let scores = row.dot(&self.weight.t()) + &self.bias;
            logits.index_axis_mut(Axis(0), b).assign(&scores);
        }
        Ok(logits)
    }

    /// Entropia cruzada média sobre os slots com label válido.
    ///
    /// `labels` tem formato `batch × M`; slots com [`IGNORE_INDEX`] são ignorados.
    /// Sem nenhum slot válido, a loss é zero.
    pub fn loss(&self, logits: &Array3<f32>, labels: &Array2<i64>) -> Result<f32> {
        let (rows, slots, num_labels) = logits.dim();
        if labels.dim() != (rows, slots) {
            return Err(SpanError::shape(format!(
                "labels {:?} incompatíveis com logits {:?}",
                labels.dim(),
                (rows, slots)
            )));
        }

        let mut total = 0.0f32;
        let mut count = 0usize;
        for ((b, s), &label) in labels.indexed_iter() {
            if label == IGNORE_INDEX {
                continue;
            }
            let target = usize::try_from(label)
                .ok()
                .filter(|&t| t < num_labels)
                .ok_or_else(|| SpanError::shape(format!("label {label} fora de 0..{num_labels}")))?;

            let row = logits.slice(ndarray::s![b, s, ..]);
            let max = row.fold(f32::NEG_INFINITY, |acc, &v| acc.max(v));
            let log_sum = row.mapv(|v| (v - max).exp()).sum().ln() + max;
            total += log_sum - row[target];
            count += 1;
        }

        if count == 0 {
            return Ok(0.0);
        }
        Ok(total / count as f32)
    }
}
