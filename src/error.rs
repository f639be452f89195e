//! # Gestion d'erreurs unifiée pour le moteur de décision
//!
//! Fournit un type d'erreur unique pour tout le crate, avec:
//! - Catégorisation par domaine (validation, transitoire, permission, fatale)
//! - Classification de sévérité pour les logs
//! - Politique de repli (fail-open) appliquée par les appelants selon `is_retriable`

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Type alias pour `Result` avec notre erreur.
pub type Result<T> = std::result::Result<T, SaqshyError>;

/// Erreurs du moteur de décision spam.
#[derive(Error, Debug)]
pub enum SaqshyError {
    // ═══════════════════════════════════════════════════════════════
    // VALIDATION — construction invariants (§3, §6.2)
    // ═══════════════════════════════════════════════════════════════
    /// Valeur hors limites acceptables lors de la construction d'un signal ou d'une config.
    #[error("{field} hors limites: {value} (attendu: {expected})")]
    OutOfRange {
        field: String,
        value: String,
        expected: String,
    },

    /// Paramètre requis manquant.
    #[error("paramètre requis manquant: {param}")]
    MissingParameter { param: String },

    /// Poids de scoring invalide (magnitude ou type).
    #[error("poids '{category}.{key}' invalide: {reason}")]
    InvalidWeight {
        category: String,
        key: String,
        reason: String,
    },

    /// Seuils de groupe mal formés ou manquants.
    #[error("seuils invalides pour le groupe {group_type}: {reason}")]
    InvalidThresholds { group_type: String, reason: String },

    // ═══════════════════════════════════════════════════════════════
    // TRANSITOIRE — dépendances externes dégradées (§7)
    // ═══════════════════════════════════════════════════════════════
    /// Le magasin clé-valeur (cache/rate-limit) a échoué; l'appelant doit appliquer
    /// la valeur par défaut sûre documentée plutôt que de propager.
    #[error("magasin clé-valeur indisponible pour {operation}: {reason}")]
    KeyValueUnavailable { operation: String, reason: String },

    /// Timeout d'un analyseur ou d'une étape du pipeline.
    #[error("timeout après {millis}ms pendant {stage}")]
    Timeout { stage: String, millis: u64 },

    /// Un disjoncteur (circuit breaker) est ouvert pour la dépendance nommée.
    #[error("disjoncteur ouvert pour {dependency}")]
    CircuitOpen { dependency: String },

    /// Erreur réseau générale vers une dépendance externe.
    #[error("erreur réseau vers {service}: {message}")]
    Network { service: String, message: String },

    // ═══════════════════════════════════════════════════════════════
    // RATE LIMIT — messagerie externe (§4.5)
    // ═══════════════════════════════════════════════════════════════
    /// La plateforme de messagerie a renvoyé un rate-limit (ex: Telegram 429).
    #[error("rate-limit messagerie: retry après {retry_after_seconds}s")]
    RateLimited { retry_after_seconds: u64 },

    // ═══════════════════════════════════════════════════════════════
    // PERMISSION — action de modération refusée
    // ═══════════════════════════════════════════════════════════════
    /// L'action de modération a été refusée (droits insuffisants du bot).
    #[error("action de modération refusée: {action}")]
    Forbidden { action: String },

    /// Requête malformée acceptée par l'API externe.
    #[error("requête invalide vers {service}: {reason}")]
    BadRequest { service: String, reason: String },

    // ═══════════════════════════════════════════════════════════════
    // FATALE — erreurs qui ne doivent jamais se dégrader silencieusement
    // ═══════════════════════════════════════════════════════════════
    /// Erreur de configuration au démarrage.
    #[error("erreur de configuration: {message}")]
    Configuration { message: String },

    /// Erreur interne inattendue.
    #[error("erreur interne: {message}")]
    Internal { message: String },

    /// Erreur de sérialisation JSON.
    #[error("erreur JSON: {source}")]
    Json {
        #[source]
        source: serde_json::Error,
    },

    /// Erreur de compilation d'expression régulière (devrait être impossible en production,
    /// les patterns sont des constantes — indique un bug dans `constants.rs`).
    #[error("erreur regex: {source}")]
    Regex {
        #[source]
        source: regex::Error,
    },

    // ═══════════════════════════════════════════════════════════════
    // ANNULATION — propagation de cancellation token (§4.3, §5)
    // ═══════════════════════════════════════════════════════════════
    /// Le traitement a été annulé avant de produire une décision.
    #[error("traitement annulé pendant {stage}")]
    Cancelled { stage: String },
}

impl SaqshyError {
    /// Sévérité pour les logs structurés.
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            Self::OutOfRange { .. }
            | Self::MissingParameter { .. }
            | Self::InvalidWeight { .. }
            | Self::InvalidThresholds { .. }
            | Self::Configuration { .. } => ErrorSeverity::High,

            Self::CircuitOpen { .. } | Self::Forbidden { .. } | Self::Internal { .. } => {
                ErrorSeverity::Medium
            }

            Self::KeyValueUnavailable { .. }
            | Self::Timeout { .. }
            | Self::Network { .. }
            | Self::RateLimited { .. }
            | Self::BadRequest { .. } => ErrorSeverity::Low,

            Self::Json { .. } | Self::Regex { .. } => ErrorSeverity::Medium,

            Self::Cancelled { .. } => ErrorSeverity::Info,
        }
    }

    /// Si `true`, la classe d'erreur est transitoire et l'appelant DOIT appliquer
    /// la dégradation fail-open documentée (§7) plutôt que de bloquer le message.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            Self::KeyValueUnavailable { .. }
                | Self::Timeout { .. }
                | Self::CircuitOpen { .. }
                | Self::Network { .. }
                | Self::RateLimited { .. }
        )
    }

    pub fn out_of_range(field: &str, value: impl fmt::Display, expected: &str) -> Self {
        Self::OutOfRange {
            field: field.to_string(),
            value: value.to_string(),
            expected: expected.to_string(),
        }
    }

    pub fn invalid_weight(category: &str, key: &str, reason: &str) -> Self {
        Self::InvalidWeight {
            category: category.to_string(),
            key: key.to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn invalid_thresholds(group_type: &str, reason: &str) -> Self {
        Self::InvalidThresholds {
            group_type: group_type.to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn configuration_error(message: &str) -> Self {
        Self::Configuration {
            message: message.to_string(),
        }
    }

    pub fn internal_error(message: &str) -> Self {
        Self::Internal {
            message: message.to_string(),
        }
    }

    pub fn key_value_unavailable(operation: &str, reason: &str) -> Self {
        Self::KeyValueUnavailable {
            operation: operation.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// Niveaux de sévérité des erreurs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorSeverity {
    Info,
    Low,
    Medium,
    High,
}

impl fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Info => write!(f, "INFO"),
            Self::Low => write!(f, "LOW"),
            Self::Medium => write!(f, "MEDIUM"),
            Self::High => write!(f, "HIGH"),
        }
    }
}

impl From<serde_json::Error> for SaqshyError {
    fn from(err: serde_json::Error) -> Self {
        Self::Json { source: err }
    }
}

impl From<regex::Error> for SaqshyError {
    fn from(err: regex::Error) -> Self {
        Self::Regex { source: err }
    }
}

impl From<config::ConfigError> for SaqshyError {
    fn from(err: config::ConfigError) -> Self {
        Self::Configuration {
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retriable_classes_are_marked() {
        assert!(SaqshyError::key_value_unavailable("get", "down").is_retriable());
        assert!(SaqshyError::Timeout {
            stage: "profile".into(),
            millis: 50
        }
        .is_retriable());
        assert!(!SaqshyError::configuration_error("bad").is_retriable());
    }

    #[test]
    fn severity_classification() {
        assert_eq!(
            SaqshyError::configuration_error("x").severity(),
            ErrorSeverity::High
        );
        assert_eq!(
            SaqshyError::Cancelled {
                stage: "pipeline".into()
            }
            .severity(),
            ErrorSeverity::Info
        );
    }
}
