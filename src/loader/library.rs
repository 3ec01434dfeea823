// YAML object libraries: frameworks with their requirement trees, risk
// matrices, reference controls and threats. Import is idempotent, keyed
// on ref_id (name for matrices).

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use chrono::Utc;
use serde::Deserialize;
use uuid::Uuid;

use crate::core::errors::AegisError;
use crate::domain::compliance::{
    Framework, ImplementationGroup, RequirementNode, ScoreDefinition,
};
use crate::domain::control::{ControlCategory, CsfFunction, ReferenceControl};
use crate::domain::matrix::{MatrixDefinition, RiskMatrix};
use crate::domain::threat::Threat;
use crate::store::Stores;

#[derive(Debug, Clone, Deserialize)]
pub struct LibraryFile {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub objects: LibraryObjects,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LibraryObjects {
    #[serde(default)]
    pub threats: Vec<ThreatEntry>,
    #[serde(default)]
    pub reference_controls: Vec<ReferenceControlEntry>,
    #[serde(default)]
    pub risk_matrices: Vec<MatrixEntry>,
    #[serde(default)]
    pub frameworks: Vec<FrameworkEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ThreatEntry {
    pub ref_id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReferenceControlEntry {
    pub ref_id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub csf_function: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MatrixEntry {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Probability/impact/risk scales plus the grid, as YAML.
    pub json_definition: serde_yaml::Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FrameworkEntry {
    pub ref_id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub min_score: Option<i64>,
    #[serde(default)]
    pub max_score: Option<i64>,
    #[serde(default)]
    pub scores_definition: Vec<ScoreDefinition>,
    #[serde(default)]
    pub implementation_groups: Vec<ImplementationGroup>,
    #[serde(default)]
    pub requirements: Vec<RequirementEntry>,
}

/// Flat requirement list; `parent_urn` rebuilds the tree, position is
/// the tree order.
#[derive(Debug, Clone, Deserialize)]
pub struct RequirementEntry {
    pub urn: String,
    #[serde(default)]
    pub parent_urn: Option<String>,
    #[serde(default)]
    pub ref_id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub assessable: bool,
    #[serde(default)]
    pub implementation_groups: Vec<String>,
    #[serde(default)]
    pub reference_controls: Vec<String>,
    #[serde(default)]
    pub threats: Vec<String>,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ImportStats {
    pub threats: usize,
    pub reference_controls: usize,
    pub risk_matrices: usize,
    pub frameworks: usize,
    pub requirement_nodes: usize,
}

pub fn load_library_file<P: AsRef<Path>>(path: P) -> Result<LibraryFile, AegisError> {
    let path = path.as_ref();
    let raw = fs::read_to_string(path)
        .map_err(|e| AegisError::Library(format!("Cannot read {}: {}", path.display(), e)))?;
    serde_yaml::from_str(&raw)
        .map_err(|e| AegisError::Library(format!("Cannot parse {}: {}", path.display(), e)))
}

fn parse_category(raw: &str) -> Result<ControlCategory, AegisError> {
    ControlCategory::parse(raw)
        .ok_or_else(|| AegisError::Library(format!("Unknown control category: {}", raw)))
}

fn parse_csf_function(raw: &str) -> Result<CsfFunction, AegisError> {
    CsfFunction::parse(raw)
        .ok_or_else(|| AegisError::Library(format!("Unknown CSF function: {}", raw)))
}

/// Imports one library into the given folder. Objects already present
/// are left untouched; frameworks are skipped wholesale when their
/// ref_id exists.
pub async fn import_library(
    stores: &Stores,
    folder_id: Uuid,
    library: &LibraryFile,
) -> Result<ImportStats, AegisError> {
    let now = Utc::now();
    let mut stats = ImportStats::default();

    for entry in &library.objects.threats {
        if stores
            .threats
            .find_by_ref(folder_id, &entry.ref_id)
            .await?
            .is_some()
        {
            continue;
        }
        let threat = Threat {
            id: Uuid::new_v4(),
            folder_id,
            ref_id: Some(entry.ref_id.clone()),
            name: entry.name.clone(),
            description: entry.description.clone(),
            provider: library.provider.clone(),
            is_published: true,
            created_at: now,
            updated_at: now,
        };
        stores.threats.create(&threat).await?;
        stats.threats += 1;
    }

    for entry in &library.objects.reference_controls {
        if stores
            .reference_controls
            .find_by_ref(folder_id, &entry.ref_id)
            .await?
            .is_some()
        {
            continue;
        }
        let control = ReferenceControl {
            id: Uuid::new_v4(),
            folder_id,
            ref_id: Some(entry.ref_id.clone()),
            name: entry.name.clone(),
            description: entry.description.clone(),
            category: entry.category.as_deref().map(parse_category).transpose()?,
            csf_function: entry
                .csf_function
                .as_deref()
                .map(parse_csf_function)
                .transpose()?,
            provider: library.provider.clone(),
            is_published: true,
            created_at: now,
            updated_at: now,
        };
        stores.reference_controls.create(&control).await?;
        stats.reference_controls += 1;
    }

    for entry in &library.objects.risk_matrices {
        if stores
            .matrices
            .find_by_name(folder_id, &entry.name)
            .await?
            .is_some()
        {
            continue;
        }
        let json: serde_json::Value = serde_json::to_value(&entry.json_definition)
            .map_err(|e| AegisError::Library(format!("Matrix {}: {}", entry.name, e)))?;
        let definition: MatrixDefinition = serde_json::from_value(json.clone())
            .map_err(|e| AegisError::Library(format!("Matrix {}: {}", entry.name, e)))?;
        definition.validate()?;
        let matrix = RiskMatrix {
            id: Uuid::new_v4(),
            folder_id,
            name: entry.name.clone(),
            description: entry.description.clone(),
            provider: library.provider.clone(),
            is_published: true,
            json_definition: json.to_string(),
            created_at: now,
            updated_at: now,
        };
        stores.matrices.create(&matrix).await?;
        stats.risk_matrices += 1;
    }

    for entry in &library.objects.frameworks {
        if stores.frameworks.find_by_ref(&entry.ref_id).await?.is_some() {
            continue;
        }
        stats.requirement_nodes += import_framework(stores, folder_id, library, entry).await?;
        stats.frameworks += 1;
    }

    Ok(stats)
}

async fn import_framework(
    stores: &Stores,
    folder_id: Uuid,
    library: &LibraryFile,
    entry: &FrameworkEntry,
) -> Result<usize, AegisError> {
    let now = Utc::now();
    let framework = Framework {
        id: Uuid::new_v4(),
        folder_id,
        ref_id: Some(entry.ref_id.clone()),
        name: entry.name.clone(),
        description: entry.description.clone(),
        provider: library.provider.clone(),
        is_published: true,
        min_score: entry.min_score.unwrap_or(0),
        max_score: entry.max_score.unwrap_or(100),
        scores_definition: if entry.scores_definition.is_empty() {
            None
        } else {
            Some(serde_json::to_string(&entry.scores_definition)?)
        },
        implementation_groups_definition: if entry.implementation_groups.is_empty() {
            None
        } else {
            Some(serde_json::to_string(&entry.implementation_groups)?)
        },
        created_at: now,
        updated_at: now,
    };
    stores.frameworks.create(&framework).await?;

    // Requirement refs point at library objects by ref_id.
    let mut control_ids: HashMap<&str, Uuid> = HashMap::new();
    let mut threat_ids: HashMap<&str, Uuid> = HashMap::new();
    let mut created = 0;
    for (position, requirement) in entry.requirements.iter().enumerate() {
        let mut reference_control_ids = Vec::with_capacity(requirement.reference_controls.len());
        for ref_id in &requirement.reference_controls {
            let id = match control_ids.get(ref_id.as_str()) {
                Some(id) => *id,
                None => {
                    let control = stores
                        .reference_controls
                        .find_by_ref(folder_id, ref_id)
                        .await?
                        .ok_or_else(|| {
                            AegisError::Library(format!(
                                "Requirement {} references unknown control {}",
                                requirement.urn, ref_id
                            ))
                        })?;
                    control_ids.insert(ref_id, control.id);
                    control.id
                }
            };
            reference_control_ids.push(id);
        }
        let mut linked_threat_ids = Vec::with_capacity(requirement.threats.len());
        for ref_id in &requirement.threats {
            let id = match threat_ids.get(ref_id.as_str()) {
                Some(id) => *id,
                None => {
                    let threat = stores
                        .threats
                        .find_by_ref(folder_id, ref_id)
                        .await?
                        .ok_or_else(|| {
                            AegisError::Library(format!(
                                "Requirement {} references unknown threat {}",
                                requirement.urn, ref_id
                            ))
                        })?;
                    threat_ids.insert(ref_id, threat.id);
                    threat.id
                }
            };
            linked_threat_ids.push(id);
        }

        let node = RequirementNode {
            id: Uuid::new_v4(),
            folder_id,
            framework_id: framework.id,
            urn: requirement.urn.clone(),
            parent_urn: requirement.parent_urn.clone(),
            ref_id: requirement.ref_id.clone(),
            name: requirement.name.clone(),
            description: requirement.description.clone(),
            order_id: position as i64,
            assessable: requirement.assessable,
            implementation_groups: if requirement.implementation_groups.is_empty() {
                None
            } else {
                Some(serde_json::to_string(&requirement.implementation_groups)?)
            },
            reference_control_ids,
            threat_ids: linked_threat_ids,
            created_at: now,
            updated_at: now,
        };
        stores.requirement_nodes.create(&node).await?;
        created += 1;
    }
    Ok(created)
}

/// Imports every `.yaml`/`.yml` file of a directory, in name order.
pub async fn import_dir(
    stores: &Stores,
    folder_id: Uuid,
    dir: &Path,
) -> Result<ImportStats, AegisError> {
    let mut paths: Vec<_> = fs::read_dir(dir)
        .map_err(|e| AegisError::Library(format!("Cannot read {}: {}", dir.display(), e)))?
        .filter_map(Result::ok)
        .map(|e| e.path())
        .filter(|p| {
            matches!(
                p.extension().and_then(|e| e.to_str()),
                Some("yaml") | Some("yml")
            )
        })
        .collect();
    paths.sort();

    let mut total = ImportStats::default();
    for path in paths {
        let library = load_library_file(&path)?;
        let stats = import_library(stores, folder_id, &library).await?;
        tracing::info!(
            library = %library.name,
            frameworks = stats.frameworks,
            requirement_nodes = stats.requirement_nodes,
            risk_matrices = stats.risk_matrices,
            reference_controls = stats.reference_controls,
            threats = stats.threats,
            "library imported"
        );
        total.threats += stats.threats;
        total.reference_controls += stats.reference_controls;
        total.risk_matrices += stats.risk_matrices;
        total.frameworks += stats.frameworks;
        total.requirement_nodes += stats.requirement_nodes;
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::connect_in_memory;
    use crate::iam::seed_root_folder;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const LIBRARY_YAML: &str = r##"
name: Starter library
provider: Test
objects:
  threats:
    - ref_id: "T1"
      name: Phishing
  reference_controls:
    - ref_id: "C1"
      name: Security awareness training
      category: process
  risk_matrices:
    - name: 3x3
      json_definition:
        probability:
          - name: Low
          - name: Medium
          - name: High
        impact:
          - name: Low
          - name: Medium
          - name: High
        risk:
          - name: Low
            hexcolor: "#91cc75"
          - name: High
            hexcolor: "#ee6666"
        grid:
          - [0, 0, 1]
          - [0, 1, 1]
          - [1, 1, 1]
  frameworks:
    - ref_id: "urn:test:framework"
      name: Test framework
      requirements:
        - urn: "urn:test:req:root"
          name: Governance
        - urn: "urn:test:req:1"
          parent_urn: "urn:test:req:root"
          ref_id: "A.1"
          assessable: true
          reference_controls: ["C1"]
          threats: ["T1"]
"##;

    #[tokio::test]
    async fn test_import_is_idempotent() {
        let pool = connect_in_memory().await.unwrap();
        let stores = Stores::new(pool);
        let root = seed_root_folder(&stores).await.unwrap();

        let mut file = NamedTempFile::new().unwrap();
        file.write_all(LIBRARY_YAML.as_bytes()).unwrap();
        let library = load_library_file(file.path()).unwrap();

        let first = import_library(&stores, root.id, &library).await.unwrap();
        assert_eq!(first.threats, 1);
        assert_eq!(first.reference_controls, 1);
        assert_eq!(first.risk_matrices, 1);
        assert_eq!(first.frameworks, 1);
        assert_eq!(first.requirement_nodes, 2);

        let second = import_library(&stores, root.id, &library).await.unwrap();
        assert_eq!(second, ImportStats::default());

        let framework = stores
            .frameworks
            .find_by_ref("urn:test:framework")
            .await
            .unwrap()
            .unwrap();
        let nodes = stores
            .requirement_nodes
            .list_for_framework(framework.id)
            .await
            .unwrap();
        assert_eq!(nodes.len(), 2);
        let leaf = nodes.iter().find(|n| n.urn == "urn:test:req:1").unwrap();
        assert!(leaf.assessable);
        assert_eq!(leaf.reference_control_ids.len(), 1);
        assert_eq!(leaf.threat_ids.len(), 1);
    }

    #[test]
    fn test_unknown_category_is_rejected() {
        let library: LibraryFile = serde_yaml::from_str(
            r#"
name: Bad
objects:
  reference_controls:
    - ref_id: "C1"
      name: Control
      category: nonsense
"#,
        )
        .unwrap();
        assert_eq!(library.objects.reference_controls[0].category.as_deref(), Some("nonsense"));
        assert!(parse_category("nonsense").is_err());
    }
}
