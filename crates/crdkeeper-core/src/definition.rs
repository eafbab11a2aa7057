//! Goal CRD loading and install-namespace rewriting
//!
//! Every non-directory entry of the CRD directory is expected to hold exactly
//! one serialized `CustomResourceDefinition`. Two fields depend on the namespace
//! the operator is installed into and are rewritten after loading:
//!
//! - `spec.conversion.webhook.clientConfig.service.namespace`
//! - the `cert-manager.io/inject-ca-from` annotation (`<namespace>/<certificate>`)

use std::path::Path;

use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use walkdir::WalkDir;

use crate::error::{CoreError, Result};

/// The schema record managed by crdkeeper
pub type Definition = CustomResourceDefinition;

/// Label carrying the operator version that produced a CRD
pub const VERSION_LABEL: &str = "app.kubernetes.io/version";

/// Label identifying which operator owns a CRD
pub const APP_LABEL: &str = "app.kubernetes.io/name";

/// Default value of [`APP_LABEL`] used to select the operator's CRDs
pub const DEFAULT_APP_NAME: &str = "crdkeeper";

/// Default directory holding the goal CRDs
pub const DEFAULT_CRD_PATH: &str = "crds";

/// Annotation read by cert-manager's CA injector
pub const CERT_MANAGER_INJECT_CA_FROM: &str = "cert-manager.io/inject-ca-from";

/// Name used to match a CRD against selection patterns and in log messages
pub fn match_string(definition: &Definition) -> &str {
    definition.metadata.name.as_deref().unwrap_or_default()
}

/// Load every CRD in `path`
///
/// Entries are read in file-name order. Directories (including symlinks to
/// directories, as found in mounted ConfigMaps) are skipped.
pub fn load_definitions(path: &Path) -> Result<Vec<Definition>> {
    let mut results = Vec::new();

    for entry in WalkDir::new(path)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
    {
        let entry = entry.map_err(|source| CoreError::ReadDir {
            path: path.to_path_buf(),
            source,
        })?;

        let file_path = entry.path();
        if file_path.is_dir() {
            continue;
        }

        let content = std::fs::read_to_string(file_path).map_err(|source| CoreError::ReadFile {
            path: file_path.to_path_buf(),
            source,
        })?;

        let definition: Definition =
            serde_yaml::from_str(&content).map_err(|source| CoreError::Parse {
                path: file_path.to_path_buf(),
                source,
            })?;

        tracing::debug!(
            crd_path = %file_path.display(),
            name = match_string(&definition),
            "Loaded CRD"
        );
        results.push(definition);
    }

    Ok(results)
}

/// Rewrite the namespace references of every definition
pub fn rewrite_namespaces(definitions: &[Definition], namespace: &str) -> Vec<Definition> {
    definitions
        .iter()
        .map(|d| rewrite_namespace(d, namespace))
        .collect()
}

/// Rewrite the namespace references of a single definition
///
/// Only the conversion webhook service namespace and the cert-manager
/// annotation are touched. The annotation is rewritten only when it has
/// exactly one `/` separator.
pub fn rewrite_namespace(definition: &Definition, namespace: &str) -> Definition {
    let mut result = definition.clone();

    if let Some(service) = result
        .spec
        .conversion
        .as_mut()
        .and_then(|c| c.webhook.as_mut())
        .and_then(|w| w.client_config.as_mut())
        .and_then(|cc| cc.service.as_mut())
    {
        service.namespace = namespace.to_string();
    }

    if let Some(value) = result
        .metadata
        .annotations
        .as_mut()
        .and_then(|a| a.get_mut(CERT_MANAGER_INJECT_CA_FROM))
    {
        let rewritten = match value.split_once('/') {
            Some((_, certificate)) if !certificate.contains('/') => {
                Some(format!("{}/{}", namespace, certificate))
            }
            _ => None,
        };
        if let Some(rewritten) = rewritten {
            *value = rewritten;
        }
    }

    result
}
