//! # Spec Validation
//!
//! Rejects `ExternalSecret` specs whose policy combinations or entries can
//! never sync.

use super::{parse_kubernetes_duration, ValidationError};
use crate::crd::{CreationPolicy, DeletionPolicy, ExternalSecret, MergeStrategy, Rewrite};

/// Validate an `ExternalSecret` before any source is contacted
pub fn validate_external_secret(es: &ExternalSecret) -> Result<(), ValidationError> {
    let target = &es.spec.target;
    let invalid_combination = matches!(
        (target.deletion_policy, target.creation_policy),
        (
            DeletionPolicy::Delete,
            CreationPolicy::Merge | CreationPolicy::None
        ) | (DeletionPolicy::Merge, CreationPolicy::None)
    );
    if invalid_combination {
        return Err(ValidationError::PolicyCombination {
            deletion: format!("{:?}", target.deletion_policy),
            creation: format!("{:?}", target.creation_policy),
        });
    }

    parse_kubernetes_duration(&es.spec.refresh_interval)?;

    for (index, entry) in es.spec.data.iter().enumerate() {
        if entry.secret_key.is_empty() {
            return Err(ValidationError::DataEntry {
                index,
                message: "secretKey must not be empty".to_string(),
            });
        }
        if entry.remote_ref.key.is_empty() {
            return Err(ValidationError::DataEntry {
                index,
                message: "remoteRef.key must not be empty".to_string(),
            });
        }
        if entry
            .source_ref
            .as_ref()
            .is_some_and(|s| s.generator_ref.is_some())
        {
            return Err(ValidationError::DataEntry {
                index,
                message: "generatorRef is only allowed in dataFrom".to_string(),
            });
        }
    }

    for (index, entry) in es.spec.data_from.iter().enumerate() {
        let generator = entry
            .source_ref
            .as_ref()
            .is_some_and(|s| s.generator_ref.is_some());
        let sources = [entry.extract.is_some(), entry.find.is_some(), generator]
            .into_iter()
            .filter(|set| *set)
            .count();
        if sources != 1 {
            return Err(ValidationError::DataFromEntry {
                index,
                message: "exactly one of extract, find or sourceRef.generatorRef must be set"
                    .to_string(),
            });
        }
        for (rule_index, rule) in entry.rewrite.iter().enumerate() {
            if let Rewrite::Merge(merge) = rule {
                if merge.strategy == MergeStrategy::Json
                    && merge.into.as_deref().is_none_or(str::is_empty)
                {
                    return Err(ValidationError::DataFromEntry {
                        index,
                        message: format!("rewrite[{rule_index}]: merge strategy JSON requires into"),
                    });
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{
        ExternalSecretData, ExternalSecretDataFrom, ExternalSecretSpec, ExternalSecretTarget,
        RemoteRef, RewriteMerge,
    };

    fn es(target: ExternalSecretTarget) -> ExternalSecret {
        ExternalSecret::new(
            "db",
            ExternalSecretSpec {
                secret_store_ref: None,
                target,
                refresh_interval: "1h".to_string(),
                refresh_policy: crate::crd::RefreshPolicy::Periodic,
                data: vec![],
                data_from: vec![],
            },
        )
    }

    fn target(creation: CreationPolicy, deletion: DeletionPolicy) -> ExternalSecretTarget {
        ExternalSecretTarget {
            creation_policy: creation,
            deletion_policy: deletion,
            ..ExternalSecretTarget::default()
        }
    }

    #[test]
    fn test_policy_combinations() {
        use CreationPolicy as C;
        use DeletionPolicy as D;
        let rejected = [(C::Merge, D::Delete), (C::None, D::Delete), (C::None, D::Merge)];
        for (creation, deletion) in rejected {
            assert!(
                validate_external_secret(&es(target(creation, deletion))).is_err(),
                "{creation:?}/{deletion:?} should be rejected"
            );
        }
        let accepted = [
            (C::Owner, D::Delete),
            (C::Orphan, D::Delete),
            (C::Merge, D::Merge),
            (C::Owner, D::Retain),
            (C::None, D::Retain),
        ];
        for (creation, deletion) in accepted {
            assert!(validate_external_secret(&es(target(creation, deletion))).is_ok());
        }
    }

    #[test]
    fn test_invalid_refresh_interval() {
        let mut resource = es(ExternalSecretTarget::default());
        resource.spec.refresh_interval = "soon".to_string();
        assert!(matches!(
            validate_external_secret(&resource),
            Err(ValidationError::InvalidDuration { .. })
        ));
    }

    #[test]
    fn test_data_from_needs_exactly_one_source() {
        let mut resource = es(ExternalSecretTarget::default());
        resource.spec.data_from = vec![ExternalSecretDataFrom::default()];
        assert!(matches!(
            validate_external_secret(&resource),
            Err(ValidationError::DataFromEntry { index: 0, .. })
        ));

        resource.spec.data_from = vec![ExternalSecretDataFrom {
            extract: Some(RemoteRef {
                key: "k".to_string(),
                ..RemoteRef::default()
            }),
            rewrite: vec![Rewrite::Merge(RewriteMerge {
                strategy: MergeStrategy::Json,
                ..RewriteMerge::default()
            })],
            ..ExternalSecretDataFrom::default()
        }];
        assert!(validate_external_secret(&resource).is_err());
    }

    #[test]
    fn test_data_entry_requires_key() {
        let mut resource = es(ExternalSecretTarget::default());
        resource.spec.data = vec![ExternalSecretData {
            secret_key: String::new(),
            remote_ref: RemoteRef {
                key: "k".to_string(),
                ..RemoteRef::default()
            },
            source_ref: None,
        }];
        assert!(matches!(
            validate_external_secret(&resource),
            Err(ValidationError::DataEntry { index: 0, .. })
        ));
    }
}
