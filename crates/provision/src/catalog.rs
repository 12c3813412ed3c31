//! Step catalog loading and validation
//!
//! A catalog is a TOML or JSON document listing steps in declaration order.
//! Loading validates ids, prerequisite references and acyclicity; a
//! [`Catalog`] value is read-only afterwards.

use crate::error::CatalogError;
use crate::step::Step;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

/// On-disk catalog schema
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CatalogDocument {
    /// Optional catalog name shown in reports
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Environment applied to every step (step `env` wins on conflict)
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,

    /// Steps in declaration order
    #[serde(default)]
    pub steps: Vec<Step>,
}

/// Serialization format of a catalog file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CatalogFormat {
    Toml,
    Json,
}

impl CatalogFormat {
    /// Pick a format from the file extension (`.json` or anything else as TOML)
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("json") => CatalogFormat::Json,
            _ => CatalogFormat::Toml,
        }
    }
}

/// A validated step catalog
#[derive(Debug, Clone)]
pub struct Catalog {
    name: Option<String>,
    env: BTreeMap<String, String>,
    steps: Vec<Step>,
    index: HashMap<String, usize>,
    identity: String,
    source: Option<PathBuf>,
}

impl Catalog {
    /// Load and validate a catalog file
    pub fn load(path: &Path) -> Result<Self, CatalogError> {
        let bytes = fs::read(path).map_err(|source| CatalogError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let content = std::str::from_utf8(&bytes).map_err(|e| CatalogError::Parse {
            path: path.to_path_buf(),
            message: format!("not valid UTF-8: {e}"),
        })?;
        let document = parse(content, CatalogFormat::from_path(path)).map_err(|message| {
            CatalogError::Parse {
                path: path.to_path_buf(),
                message,
            }
        })?;

        let mut catalog = Self::from_document(document, identity_of(&bytes))?;
        catalog.source = Some(path.to_path_buf());
        log::debug!(
            "Loaded catalog {} ({} steps, identity {})",
            path.display(),
            catalog.len(),
            catalog.identity
        );
        Ok(catalog)
    }

    /// Parse and validate catalog text in the given format
    pub fn parse(content: &str, format: CatalogFormat) -> Result<Self, CatalogError> {
        let document = parse(content, format).map_err(|message| CatalogError::Parse {
            path: PathBuf::from("<inline>"),
            message,
        })?;
        Self::from_document(document, identity_of(content.as_bytes()))
    }

    /// Build and validate a catalog from steps in declaration order
    pub fn from_steps(steps: Vec<Step>) -> Result<Self, CatalogError> {
        let document = CatalogDocument {
            steps,
            ..Default::default()
        };
        let identity = canonical_identity(&document);
        Self::from_document(document, identity)
    }

    /// Build a catalog without checking prerequisites or cycles.
    ///
    /// Ids must still be unique. Planning such a catalog may fail with
    /// [`CycleError`](crate::error::CycleError).
    pub fn from_steps_unchecked(steps: Vec<Step>) -> Result<Self, CatalogError> {
        let document = CatalogDocument {
            steps,
            ..Default::default()
        };
        let identity = canonical_identity(&document);
        let index = build_index(&document.steps)?;
        Ok(Self {
            name: document.name,
            env: document.env,
            steps: document.steps,
            index,
            identity,
            source: None,
        })
    }

    fn from_document(document: CatalogDocument, identity: String) -> Result<Self, CatalogError> {
        let index = build_index(&document.steps)?;
        check_prerequisites(&document.steps, &index)?;
        check_acyclic(&document.steps, &index)?;

        Ok(Self {
            name: document.name,
            env: document.env,
            steps: document.steps,
            index,
            identity,
            source: None,
        })
    }

    /// Catalog name, if declared
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Environment shared by every step
    pub fn env(&self) -> &BTreeMap<String, String> {
        &self.env
    }

    /// Steps in declaration order
    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    /// Step ids in declaration order
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.steps.iter().map(|s| s.id.as_str())
    }

    /// Look up a step by id
    pub fn get(&self, id: &str) -> Option<&Step> {
        self.index.get(id).map(|&i| &self.steps[i])
    }

    /// Declaration position of a step
    pub fn position(&self, id: &str) -> Option<usize> {
        self.index.get(id).copied()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Stable identity derived from the catalog content
    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// File the catalog was loaded from
    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    /// Name for reports: declared name, else file stem, else identity
    pub fn label(&self) -> String {
        if let Some(name) = &self.name {
            return name.clone();
        }
        self.source
            .as_deref()
            .and_then(|p| p.file_stem())
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.identity.clone())
    }

    /// Ensure every requested id exists
    pub fn check_ids<'a, I>(&self, ids: I) -> Result<(), CatalogError>
    where
        I: IntoIterator<Item = &'a String>,
    {
        for id in ids {
            if !self.contains(id) {
                return Err(CatalogError::UnknownStep { id: id.clone() });
            }
        }
        Ok(())
    }
}

fn parse(content: &str, format: CatalogFormat) -> Result<CatalogDocument, String> {
    match format {
        CatalogFormat::Toml => toml::from_str(content).map_err(|e| e.to_string()),
        CatalogFormat::Json => serde_json::from_str(content).map_err(|e| e.to_string()),
    }
}

fn identity_of(bytes: &[u8]) -> String {
    blake3::hash(bytes).to_hex().as_str()[..16].to_string()
}

fn canonical_identity(document: &CatalogDocument) -> String {
    // Serializing plain structs and string maps cannot fail
    let bytes = serde_json::to_vec(document).unwrap_or_default();
    identity_of(&bytes)
}

fn build_index(steps: &[Step]) -> Result<HashMap<String, usize>, CatalogError> {
    let mut index = HashMap::with_capacity(steps.len());
    for (i, step) in steps.iter().enumerate() {
        if step.id.trim().is_empty() {
            return Err(CatalogError::EmptyId { index: i + 1 });
        }
        if index.insert(step.id.clone(), i).is_some() {
            return Err(CatalogError::DuplicateId {
                id: step.id.clone(),
            });
        }
        if step.timeout_secs == Some(0) {
            return Err(CatalogError::ZeroTimeout {
                id: step.id.clone(),
            });
        }
    }
    Ok(index)
}

fn check_prerequisites(
    steps: &[Step],
    index: &HashMap<String, usize>,
) -> Result<(), CatalogError> {
    for step in steps {
        for prereq in &step.prerequisites {
            if !index.contains_key(prereq) {
                return Err(CatalogError::DanglingPrerequisite {
                    step: step.id.clone(),
                    missing: prereq.clone(),
                });
            }
        }
    }
    Ok(())
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    InProgress,
    Done,
}

/// Depth-first search over prerequisite edges, reporting the first cycle found
fn check_acyclic(steps: &[Step], index: &HashMap<String, usize>) -> Result<(), CatalogError> {
    let mut marks = vec![Mark::Unvisited; steps.len()];
    let mut stack = Vec::new();

    for start in 0..steps.len() {
        if marks[start] == Mark::Unvisited {
            visit(start, steps, index, &mut marks, &mut stack)?;
        }
    }
    Ok(())
}

fn visit(
    node: usize,
    steps: &[Step],
    index: &HashMap<String, usize>,
    marks: &mut [Mark],
    stack: &mut Vec<usize>,
) -> Result<(), CatalogError> {
    marks[node] = Mark::InProgress;
    stack.push(node);

    for prereq in &steps[node].prerequisites {
        let next = index[prereq];
        match marks[next] {
            Mark::Done => {}
            Mark::Unvisited => visit(next, steps, index, marks, stack)?,
            Mark::InProgress => {
                let start = stack.iter().position(|&n| n == next).unwrap_or(0);
                let mut cycle: Vec<String> = stack[start..]
                    .iter()
                    .map(|&n| steps[n].id.clone())
                    .collect();
                cycle.push(steps[next].id.clone());
                return Err(CatalogError::Cycle { cycle });
            }
        }
    }

    stack.pop();
    marks[node] = Mark::Done;
    Ok(())
}
