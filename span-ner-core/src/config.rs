//! # Configuração do Modelo
//!
//! A configuração é um JSON simples (serde) com o vocabulário de labels e os
//! hiperparâmetros do layout:
//!
//! ```json
//! {
//!   "labels": ["O", "B-PER", "I-PER", "B-ORG", "I-ORG"],
//!   "marker_max_length": 128,
//!   "entity_max_length": 8,
//!   "hidden_size": 768
//! }
//! ```
//!
//! ## Esquema reduzido
//!
//! Quando os labels seguem um esquema (BIO, BIOES...), várias saídas do
//! classificador representam a mesma categoria de exibição (`B-PER` e `I-PER` → `PER`).
//! A tabela `id2reduced_id` faz esse mapeamento. A resolução acontece uma única
//! vez, em [`LabelTable`], e não espalhada pela decodificação:
//!
//! ```text
//! id bruto ──id2reduced_id──▶ id reduzido ──reduced_labels──▶ "PER"
//! ```

use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SpanError};
use crate::layout::MarkerLayout;

/// Prefixos reconhecidos como esquema de anotação.
const SCHEME_PREFIXES: &[&str] = &["B-", "I-", "E-", "S-", "L-", "U-"];

/// Mapeamento de ids brutos para labels reduzidos.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReducedScheme {
    /// Labels de exibição (ex: `["O", "PER", "ORG"]`).
    pub reduced_labels: Vec<String>,
    /// `id2reduced_id[id_bruto] = id_reduzido`.
    pub id2reduced_id: Vec<usize>,
}

/// Configuração completa do modelo span-marker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpanConfig {
    /// Labels brutos, indexados pelo id de saída do classificador.
    pub labels: Vec<String>,
    /// Label que significa "não é entidade".
    #[serde(default = "default_outside_label")]
    pub outside_label: String,
    /// Esquema reduzido opcional.
    #[serde(default)]
    pub scheme: Option<ReducedScheme>,
    /// Número de spans candidatos por linha (`M`).
    #[serde(default = "default_marker_max_length")]
    pub marker_max_length: usize,
    /// Tamanho máximo (em palavras) de uma entidade.
    #[serde(default = "default_entity_max_length")]
    pub entity_max_length: usize,
    /// Número máximo de tokens de contexto por linha.
    #[serde(default = "default_model_max_length")]
    pub model_max_length: usize,
    /// Dimensão dos estados ocultos do encoder (`H`).
    #[serde(default = "default_hidden_size")]
    pub hidden_size: usize,
    /// Tamanho do vocabulário do tokenizador.
    #[serde(default = "default_vocab_size")]
    pub vocab_size: usize,
}

fn default_outside_label() -> String {
    "O".to_string()
}

fn default_marker_max_length() -> usize {
    128
}

fn default_entity_max_length() -> usize {
    8
}

fn default_model_max_length() -> usize {
    256
}

fn default_hidden_size() -> usize {
    768
}

fn default_vocab_size() -> usize {
    30_522
}

impl SpanConfig {
    /// Cria uma configuração com os valores padrão a partir da lista de labels.
    ///
    /// Se os labels usam prefixos de esquema (`B-`, `I-`, ...), o esquema reduzido
    /// é derivado automaticamente, preservando a ordem da primeira ocorrência.
    pub fn from_labels<S: AsRef<str>>(labels: &[S]) -> Self {
        let labels: Vec<String> = labels.iter().map(|l| l.as_ref().to_string()).collect();
        let scheme = derive_scheme(&labels, &default_outside_label());
        Self {
            labels,
            outside_label: default_outside_label(),
            scheme,
            marker_max_length: default_marker_max_length(),
            entity_max_length: default_entity_max_length(),
            model_max_length: default_model_max_length(),
            hidden_size: default_hidden_size(),
            vocab_size: default_vocab_size(),
        }
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        let mut config: SpanConfig = serde_json::from_str(json)?;
        config.derive_missing_scheme();
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    pub fn num_labels(&self) -> usize {
        self.labels.len()
    }

    /// Sem esquema explícito, deriva um a partir dos prefixos dos labels.
    pub fn derive_missing_scheme(&mut self) {
        if self.scheme.is_none() {
            self.scheme = derive_scheme(&self.labels, &self.outside_label);
        }
    }

    /// Se os labels estão em um esquema reduzido.
    pub fn are_labels_schemed(&self) -> bool {
        self.scheme.is_some()
    }

    /// Valida a configuração inteira. Chamado na construção do modelo.
    pub fn validate(&self) -> Result<()> {
        if self.hidden_size == 0 {
            return Err(SpanError::config("hidden_size deve ser maior que zero"));
        }
        if self.entity_max_length == 0 {
            return Err(SpanError::config("entity_max_length deve ser maior que zero"));
        }
        if self.model_max_length == 0 {
            return Err(SpanError::config("model_max_length deve ser maior que zero"));
        }
        // Ids 0..5 são reservados para tokens especiais
        if self.vocab_size <= crate::tokenizer::FIRST_WORD_ID as usize {
            return Err(SpanError::config("vocab_size pequeno demais"));
        }
        MarkerLayout::new(self.marker_max_length)?;
        LabelTable::from_config(self)?;
        Ok(())
    }

    pub fn layout(&self) -> Result<MarkerLayout> {
        MarkerLayout::new(self.marker_max_length)
    }
}

/// Deriva o esquema reduzido removendo os prefixos BIO/BIOES.
///
/// Só há esquema quando **todo** label que não é o outside tem prefixo.
fn derive_scheme(labels: &[String], outside: &str) -> Option<ReducedScheme> {
    let mut entity_labels = labels.iter().filter(|l| l.as_str() != outside).peekable();
    let schemed = entity_labels.peek().is_some()
        && entity_labels.all(|l| SCHEME_PREFIXES.iter().any(|p| l.starts_with(p)));
    if !schemed {
        return None;
    }

    let mut reduced_labels: Vec<String> = Vec::new();
    let mut id2reduced_id = Vec::with_capacity(labels.len());
    for label in labels {
        let reduced = if label == outside {
            label.as_str()
        } else {
            SCHEME_PREFIXES
                .iter()
                .find_map(|p| label.strip_prefix(p))
                .unwrap_or(label.as_str())
        };
        let id = match reduced_labels.iter().position(|r| r == reduced) {
            Some(id) => id,
            None => {
                reduced_labels.push(reduced.to_string());
                reduced_labels.len() - 1
            }
        };
        id2reduced_id.push(id);
    }

    Some(ReducedScheme {
        reduced_labels,
        id2reduced_id,
    })
}

/// Tabela de labels já resolvida: id bruto → string de exibição.
#[derive(Debug, Clone, PartialEq)]
pub struct LabelTable {
    display: Vec<String>,
    outside_id: usize,
}

impl LabelTable {
    pub fn from_config(config: &SpanConfig) -> Result<Self> {
        if config.labels.is_empty() {
            return Err(SpanError::config("a lista de labels está vazia"));
        }

        let mut seen = HashSet::new();
        for label in &config.labels {
            if !seen.insert(label.as_str()) {
                return Err(SpanError::config(format!("label duplicado: {label}")));
            }
        }

        let outside_id = config
            .labels
            .iter()
            .position(|l| l == &config.outside_label)
            .ok_or_else(|| {
                SpanError::config(format!(
                    "label outside '{}' não está na lista de labels",
                    config.outside_label
                ))
            })?;

        let display = match &config.scheme {
            None => config.labels.clone(),
            Some(scheme) => {
                if scheme.id2reduced_id.len() != config.labels.len() {
                    return Err(SpanError::config(format!(
                        "id2reduced_id tem {} entradas, esperado {}",
                        scheme.id2reduced_id.len(),
                        config.labels.len()
                    )));
                }
                scheme
                    .id2reduced_id
                    .iter()
                    .map(|&reduced| {
                        scheme.reduced_labels.get(reduced).cloned().ok_or_else(|| {
                            SpanError::config(format!("id reduzido {reduced} sem label"))
                        })
                    })
                    .collect::<Result<Vec<_>>>()?
            }
        };

        Ok(Self {
            display,
            outside_id,
        })
    }

    pub fn outside_id(&self) -> usize {
        self.outside_id
    }

    pub fn num_labels(&self) -> usize {
        self.display.len()
    }

    pub fn is_outside(&self, label_id: usize) -> bool {
        label_id == self.outside_id
    }

    /// Label de exibição para um id bruto do classificador.
    pub fn resolve(&self, label_id: usize) -> Option<&str> {
        self.display.get(label_id).map(String::as_str)
    }
}
