//! # Layout dos Marcadores
//!
//! Cada linha do batch é uma sequência empacotada:
//!
//! ```text
//! [ tokens de contexto ... | S_0 S_1 ... S_{M-1} | E_0 E_1 ... E_{M-1} ]
//!                            ^ start_block          ^ end_block
//! ```
//!
//! O marcador de início `S_i` e o de fim `E_i` representam o mesmo span candidato.
//! O tokenizador/collator (que posiciona os marcadores) e o extrator de features
//! (que lê os marcadores) compartilham este descritor em vez de recalcular os
//! offsets cada um por conta própria.

use std::ops::Range;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SpanError};

/// Política de posicionamento dos blocos de marcadores na sequência.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarkerPlacement {
    /// Os `2M` últimos slots da sequência: `M` inícios seguidos de `M` fins.
    #[default]
    Trailing,
}

/// Descritor do layout de marcadores de uma linha.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkerLayout {
    /// Número máximo de spans por linha (`M`).
    pub marker_count: usize,
    #[serde(default)]
    pub placement: MarkerPlacement,
}

impl MarkerLayout {
    pub fn new(marker_count: usize) -> Result<Self> {
        if marker_count == 0 {
            return Err(SpanError::config("marker_max_length deve ser maior que zero"));
        }
        Ok(Self {
            marker_count,
            placement: MarkerPlacement::Trailing,
        })
    }

    /// Quantidade de posições reservadas para marcadores (`2M`).
    pub fn reserved(&self) -> usize {
        2 * self.marker_count
    }

    /// Comprimento total de uma linha com `context_len` tokens de contexto.
    pub fn sequence_len(&self, context_len: usize) -> usize {
        context_len + self.reserved()
    }

    /// Faixa de posições dos marcadores de início numa sequência de comprimento `seq_len`.
    ///
    /// Falha se `seq_len < 2M`: nunca fatiamos faixas negativas silenciosamente.
    pub fn start_block(&self, seq_len: usize) -> Result<Range<usize>> {
        let start = self.context_len(seq_len)?;
        Ok(start..start + self.marker_count)
    }

    /// Faixa de posições dos marcadores de fim.
    pub fn end_block(&self, seq_len: usize) -> Result<Range<usize>> {
        let start = self.context_len(seq_len)? + self.marker_count;
        Ok(start..seq_len)
    }

    /// Número de posições de contexto (`L - 2M`).
    pub fn context_len(&self, seq_len: usize) -> Result<usize> {
        match self.placement {
            MarkerPlacement::Trailing => seq_len.checked_sub(self.reserved()).ok_or_else(|| {
                SpanError::shape(format!(
                    "sequência de comprimento {seq_len} menor que 2 × {} marcadores",
                    self.marker_count
                ))
            }),
        }
    }

    /// Posição do marcador de início do slot `slot`.
    pub fn start_position(&self, seq_len: usize, slot: usize) -> Result<usize> {
        self.check_slot(slot)?;
        Ok(self.start_block(seq_len)?.start + slot)
    }

    /// Posição do marcador de fim do slot `slot`.
    pub fn end_position(&self, seq_len: usize, slot: usize) -> Result<usize> {
        self.check_slot(slot)?;
        Ok(self.end_block(seq_len)?.start + slot)
    }

    fn check_slot(&self, slot: usize) -> Result<()> {
        if slot >= self.marker_count {
            return Err(SpanError::shape(format!(
                "slot {slot} fora do intervalo 0..{}",
                self.marker_count
            )));
        }
        Ok(())
    }
}
