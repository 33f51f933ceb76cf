//! # Encoder — Estados Ocultos Contextuais
//!
//! O encoder (tipicamente um transformer) é um colaborador externo: recebe o batch
//! com ids, posições e máscara, e devolve `batch × L × H` estados ocultos.
//!
//! [`HashingEncoder`] é um encoder de referência sem parâmetros treináveis:
//! - cada posição recebe um embedding determinístico de `(input_id, position_id)`;
//! - em seguida, cada posição soma a média dos embeddings das posições que ela
//!   atende **e** que compartilham o mesmo `position_id`.
//!
//! Como o marcador de início de um span herda o `position_id` da primeira palavra,
//! o seu estado oculto carrega o embedding daquela palavra (idem para o fim).
//! É suficiente para demonstrações e testes de ponta a ponta; modelos reais
//! implementam o trait [`Encoder`].

use ndarray::{s, Array1, Array3};

use crate::collator::Batch;
use crate::error::{Result, SpanError};

pub trait Encoder: Send + Sync {
    /// Dimensão `H` dos estados ocultos produzidos.
    fn hidden_size(&self) -> usize;

    /// Estados ocultos `batch × L × H`.
    fn encode(&self, batch: &Batch) -> Result<Array3<f32>>;
}

#[derive(Debug, Clone)]
pub struct HashingEncoder {
    hidden_size: usize,
}

impl HashingEncoder {
    pub fn new(hidden_size: usize) -> Result<Self> {
        if hidden_size == 0 {
            return Err(SpanError::config("hidden_size do encoder deve ser maior que zero"));
        }
        Ok(Self { hidden_size })
    }

    /// Embedding de token + embedding posicional senoidal.
    fn embed(&self, input_id: u32, position_id: u32) -> Array1<f32> {
        let h = self.hidden_size as f32;
        Array1::from_shape_fn(self.hidden_size, |d| {
            let token = ((input_id as f32 + 1.0) * (d as f32 + 1.0) * 0.618_034).sin();
            let freq = 10_000f32.powf((2 * (d / 2)) as f32 / h);
            let angle = position_id as f32 / freq;
            let position = if d % 2 == 0 { angle.sin() } else { angle.cos() };
            0.5 * token + 0.1 * position
        })
    }
}

impl Encoder for HashingEncoder {
    fn hidden_size(&self) -> usize {
        self.hidden_size
    }

    fn encode(&self, batch: &Batch) -> Result<Array3<f32>> {
        let (rows, seq_len) = batch.input_ids.dim();
        if batch.attention_mask.dim() != (rows, seq_len, seq_len) {
            return Err(SpanError::shape(format!(
                "máscara de atenção {:?} incompatível com ids {:?}",
                batch.attention_mask.dim(),
                (rows, seq_len)
            )));
        }

        let mut hidden = Array3::<f32>::zeros((rows, seq_len, self.hidden_size));
        for b in 0..rows {
            let embeddings: Vec<Array1<f32>> = (0..seq_len)
                .map(|p| self.embed(batch.input_ids[[b, p]], batch.position_ids[[b, p]]))
                .collect();

            for i in 0..seq_len {
                let mut state = embeddings[i].clone();
                let pos = batch.position_ids[[b, i]];
                let mut mixed = Array1::<f32>::zeros(self.hidden_size);
                let mut count = 0usize;
                for j in 0..seq_len {
                    if j != i && batch.attention_mask[[b, i, j]] && batch.position_ids[[b, j]] == pos {
                        mixed += &embeddings[j];
                        count += 1;
                    }
                }
                if count > 0 {
                    state += &(mixed / count as f32);
                }
                hidden.slice_mut(s![b, i, ..]).assign(&state);
            }
        }
        Ok(hidden)
    }
}
