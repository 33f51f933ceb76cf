//! # Collator — Padding das Linhas em Tensores
//!
//! Recebe as linhas do tokenizador (comprimentos variáveis) e monta um batch com
//! comprimento fixo `L = maior_contexto + 2M`. O contexto ocupa o começo da
//! linha; os marcadores vão para os blocos definidos pelo [`MarkerLayout`].
//!
//! ## Máscara de atenção (L × L por linha)
//!
//! - Tokens de contexto atendem a todo o contexto.
//! - O marcador de início `i` atende ao contexto, a si mesmo e ao marcador de fim `i`.
//! - O marcador de fim `i` atende ao contexto, a si mesmo e ao marcador de início `i`.
//! - Posições de padding não atendem a nada.
//!
//! Assim cada par de marcadores enxerga a sentença inteira, mas não os outros spans.

use ndarray::{Array2, Array3};

use crate::error::{Result, SpanError};
use crate::layout::MarkerLayout;
use crate::tokenizer::{TokenizedRow, PAD_ID};

/// Tensores de entrada de um batch já com padding.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    /// `batch × L`
    pub input_ids: Array2<u32>,
    /// `batch × L`
    pub position_ids: Array2<u32>,
    /// `batch × L × L`; `mask[b, i, j]` indica se a posição `i` atende à posição `j`.
    pub attention_mask: Array3<bool>,
    /// Número de spans reais de cada linha (o restante dos slots é padding).
    pub num_spans: Vec<usize>,
}

impl Batch {
    pub fn rows(&self) -> usize {
        self.input_ids.nrows()
    }

    pub fn seq_len(&self) -> usize {
        self.input_ids.ncols()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct MarkerCollator {
    layout: MarkerLayout,
}

impl MarkerCollator {
    pub fn new(layout: MarkerLayout) -> Self {
        Self { layout }
    }

    pub fn layout(&self) -> MarkerLayout {
        self.layout
    }

    pub fn collate(&self, rows: &[TokenizedRow]) -> Result<Batch> {
        if rows.is_empty() {
            return Err(SpanError::shape("batch sem linhas"));
        }

        let max_context = rows.iter().map(|r| r.context_len).max().unwrap_or(0);
        let seq_len = self.layout.sequence_len(max_context);

        let mut input_ids = Array2::from_elem((rows.len(), seq_len), PAD_ID);
        let mut position_ids = Array2::zeros((rows.len(), seq_len));
        let mut attention_mask = Array3::from_elem((rows.len(), seq_len, seq_len), false);

        for (b, row) in rows.iter().enumerate() {
            self.check_row(row)?;
            let ctx = row.context_len;

            for i in 0..ctx {
                input_ids[[b, i]] = row.input_ids[i];
                position_ids[[b, i]] = row.position_ids[i];
                for j in 0..ctx {
                    attention_mask[[b, i, j]] = true;
                }
            }

            for slot in 0..row.num_spans {
                let start = self.layout.start_position(seq_len, slot)?;
                let end = self.layout.end_position(seq_len, slot)?;
                let src_start = ctx + slot;
                let src_end = ctx + row.num_spans + slot;

                input_ids[[b, start]] = row.input_ids[src_start];
                position_ids[[b, start]] = row.position_ids[src_start];
                input_ids[[b, end]] = row.input_ids[src_end];
                position_ids[[b, end]] = row.position_ids[src_end];

                for marker in [start, end] {
                    for j in 0..ctx {
                        attention_mask[[b, marker, j]] = true;
                    }
                    attention_mask[[b, marker, start]] = true;
                    attention_mask[[b, marker, end]] = true;
                }
            }
        }

        Ok(Batch {
            input_ids,
            position_ids,
            attention_mask,
            num_spans: rows.iter().map(|r| r.num_spans).collect(),
        })
    }

    fn check_row(&self, row: &TokenizedRow) -> Result<()> {
        if row.num_spans > self.layout.marker_count {
            return Err(SpanError::shape(format!(
                "linha com {} spans excede {} marcadores",
                row.num_spans, self.layout.marker_count
            )));
        }
        let expected = row.context_len + 2 * row.num_spans;
        if row.input_ids.len() != expected || row.position_ids.len() != expected {
            return Err(SpanError::shape(format!(
                "linha com {} ids, esperado {expected}",
                row.input_ids.len()
            )));
        }
        Ok(())
    }
}
