//! # Extração de Features por Marcadores
//!
//! Converte os estados ocultos do encoder em um vetor de features por span
//! candidato. O span do slot `i` é representado pela concatenação do estado
//! oculto do seu marcador de início com o do seu marcador de fim:
//!
//! ```text
//! hidden: batch × L × H
//!
//!   start_idx = L - 2M        end_idx = start_idx + M
//!   inícios   = hidden[:, start_idx..end_idx]     (batch × M × H)
//!   fins      = hidden[:, end_idx..]              (batch × M × H)
//!
//! features = concat(inícios, fins, eixo=-1)       (batch × M × 2H)
//! ```
//!
//! Nenhuma reordenação acontece aqui: o slot `i` corresponde ao `i`-ésimo span
//! atribuído pelo tokenizador. Slots de padding também passam adiante e são
//! descartados na decodificação.

use ndarray::{concatenate, s, Array3, Axis};

use crate::error::Result;
use crate::layout::MarkerLayout;

/// Vetores de features `batch × M × 2H` a partir dos estados ocultos `batch × L × H`.
///
/// Retorna erro de formato se `L < 2M`.
pub fn extract_marker_features(hidden: &Array3<f32>, layout: &MarkerLayout) -> Result<Array3<f32>> {
    let seq_len = hidden.len_of(Axis(1));
    let starts = layout.start_block(seq_len)?;
    let ends = layout.end_block(seq_len)?;

    let start_states = hidden.slice(s![.., starts, ..]);
    let end_states = hidden.slice(s![.., ends, ..]);
    Ok(concatenate(Axis(2), &[start_states, end_states])?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SpanError;

    /// hidden[b, p, d] = 100·b + 10·p + d
    fn numbered(batch: usize, seq_len: usize, hidden: usize) -> Array3<f32> {
        Array3::from_shape_fn((batch, seq_len, hidden), |(b, p, d)| {
            (100 * b + 10 * p + d) as f32
        })
    }

    #[test]
    fn test_concatenates_start_and_end_markers() {
        let layout = MarkerLayout::new(2).unwrap();
        // L = 6: contexto 0..2, inícios 2..4, fins 4..6
        let hidden = numbered(1, 6, 2);
        let features = extract_marker_features(&hidden, &layout).unwrap();

        assert_eq!(features.dim(), (1, 2, 4));
        assert_eq!(features.slice(s![0, 0, ..]).to_vec(), vec![20.0, 21.0, 40.0, 41.0]);
        assert_eq!(features.slice(s![0, 1, ..]).to_vec(), vec![30.0, 31.0, 50.0, 51.0]);
    }

    #[test]
    fn test_batch_rows_are_independent() {
        let layout = MarkerLayout::new(1).unwrap();
        let hidden = numbered(2, 3, 1);
        let features = extract_marker_features(&hidden, &layout).unwrap();
        assert_eq!(features.dim(), (2, 1, 2));
        assert_eq!(features.slice(s![1, 0, ..]).to_vec(), vec![110.0, 120.0]);
    }

    #[test]
    fn test_sequence_shorter_than_markers_fails() {
        let layout = MarkerLayout::new(3).unwrap();
        let hidden = numbered(1, 5, 2);
        assert!(matches!(
            extract_marker_features(&hidden, &layout),
            Err(SpanError::Shape(_))
        ));
    }
}
