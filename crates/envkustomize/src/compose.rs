//! composition of a kustomize root into a resource set
//!
//! [Composer] is the seam to the manifest composition engine. It only ever sees a [FileSystem], so
//! handing it a [crate::filesys::SubstitutingFileSystem] is all it takes to have every manifest (and
//! the `kustomization.yaml` itself) expanded before it is parsed.
//!
//! [ResourceListComposer] is a small engine covering the common case: a list of `resources` (files or
//! nested roots) with `namespace`, `namePrefix`, `nameSuffix` and `commonLabels` applied on top.
//! Patches, generators and remote bases are not supported.
use crate::filesys::{FileSystem, FsError};
use serde::Deserialize;
use serde_yaml::{Mapping, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// File names that make a directory a composition root, in order of preference
pub const ROOT_DESCRIPTORS: [&str; 3] = ["kustomization.yaml", "kustomization.yml", "Kustomization"];

/// Kinds that never get a namespace
const CLUSTER_SCOPED_KINDS: [&str; 7] = [
    "Namespace",
    "ClusterRole",
    "ClusterRoleBinding",
    "CustomResourceDefinition",
    "PersistentVolume",
    "StorageClass",
    "PriorityClass",
];

pub trait Composer {
    fn compose(&self, fs: &dyn FileSystem, dir: &Path) -> Result<ResourceSet, ComposeError>;
}

/// Path of the root descriptor in `dir`, if there is one
pub fn find_descriptor(fs: &dyn FileSystem, dir: &Path) -> Option<PathBuf> {
    ROOT_DESCRIPTORS
        .iter()
        .map(|name| dir.join(name))
        .find(|path| fs.exists(path))
}

/// Ordered list of composed resources
#[derive(Debug, Default, Clone, PartialEq)]
pub struct ResourceSet {
    resources: Vec<Value>,
}

impl ResourceSet {
    pub fn resources(&self) -> &[Value] {
        &self.resources
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    pub fn push(&mut self, resource: Value) {
        self.resources.push(resource);
    }

    /// Serialize as a multi document yaml stream
    pub fn as_yaml(&self) -> Result<String, ComposeError> {
        let documents = self
            .resources
            .iter()
            .map(serde_yaml::to_string)
            .collect::<Result<Vec<_>, _>>()
            .map_err(ComposeError::Serialize)?;

        Ok(documents.join("---\n"))
    }
}

impl Extend<Value> for ResourceSet {
    fn extend<T: IntoIterator<Item = Value>>(&mut self, iter: T) {
        self.resources.extend(iter)
    }
}

impl IntoIterator for ResourceSet {
    type Item = Value;
    type IntoIter = std::vec::IntoIter<Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.resources.into_iter()
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ComposeError {
    #[error(transparent)]
    Fs(#[from] FsError),
    #[error("No kustomization found in {}", dir.display())]
    MissingDescriptor { dir: PathBuf },
    #[error("Invalid kustomization {}", path.display())]
    InvalidDescriptor {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("Resource {resource} of {} does not exist", dir.display())]
    MissingResource { dir: PathBuf, resource: String },
    #[error("Invalid yaml in {}", path.display())]
    InvalidManifest {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("{} includes itself", dir.display())]
    Cycle { dir: PathBuf },
    #[error("Unable to serialize resources")]
    Serialize(#[source] serde_yaml::Error),
}

/// The subset of a kustomization understood by [ResourceListComposer]
#[derive(Deserialize, Default, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Kustomization {
    #[serde(default)]
    pub resources: Vec<String>,
    pub namespace: Option<String>,
    pub name_prefix: Option<String>,
    pub name_suffix: Option<String>,
    #[serde(default)]
    pub common_labels: BTreeMap<String, String>,
}

impl Kustomization {
    fn parse(path: &Path, data: &[u8]) -> Result<Self, ComposeError> {
        if data.iter().all(u8::is_ascii_whitespace) {
            return Ok(Self::default());
        }

        serde_yaml::from_slice(data).map_err(|source| ComposeError::InvalidDescriptor {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Apply the transformations to a single resource
    fn transform(&self, resource: &mut Value) {
        let cluster_scoped = resource
            .get("kind")
            .and_then(Value::as_str)
            .is_some_and(|kind| CLUSTER_SCOPED_KINDS.contains(&kind));

        let Some(metadata) = resource
            .as_mapping_mut()
            .and_then(|resource| child_mapping(resource, "metadata"))
        else {
            return;
        };

        if let Some(namespace) = &self.namespace {
            if !cluster_scoped {
                metadata.insert("namespace".into(), namespace.as_str().into());
            }
        }

        if self.name_prefix.is_some() || self.name_suffix.is_some() {
            if let Some(Value::String(name)) = metadata.get_mut("name") {
                *name = format!(
                    "{}{name}{}",
                    self.name_prefix.as_deref().unwrap_or_default(),
                    self.name_suffix.as_deref().unwrap_or_default()
                );
            }
        }

        if self.common_labels.is_empty() {
            return;
        }
        if let Some(labels) = child_mapping(metadata, "labels") {
            for (key, value) in &self.common_labels {
                labels.insert(key.as_str().into(), value.as_str().into());
            }
        }
    }
}

/// Get (or create) a nested mapping, `None` when the existing child is not a mapping
fn child_mapping<'m>(mapping: &'m mut Mapping, key: &str) -> Option<&'m mut Mapping> {
    mapping
        .entry(key.into())
        .or_insert_with(|| Value::Mapping(Mapping::new()))
        .as_mapping_mut()
}

/// Composes the `resources` of a kustomization
#[derive(Default, Debug, Clone, Copy)]
pub struct ResourceListComposer;

impl Composer for ResourceListComposer {
    fn compose(&self, fs: &dyn FileSystem, dir: &Path) -> Result<ResourceSet, ComposeError> {
        self.compose_dir(fs, dir, &mut vec![])
    }
}

impl ResourceListComposer {
    fn compose_dir(
        &self,
        fs: &dyn FileSystem,
        dir: &Path,
        stack: &mut Vec<PathBuf>,
    ) -> Result<ResourceSet, ComposeError> {
        let absolute = fs.cleaned_abs(dir)?;
        if stack.contains(&absolute) {
            return Err(ComposeError::Cycle {
                dir: dir.to_path_buf(),
            });
        }

        let descriptor = find_descriptor(fs, dir).ok_or_else(|| ComposeError::MissingDescriptor {
            dir: dir.to_path_buf(),
        })?;
        let kustomization = Kustomization::parse(&descriptor, &fs.read_file(&descriptor)?)?;
        tracing::debug!(?kustomization, dir=%dir.display(), "kustomization loaded");

        stack.push(absolute);
        let mut set = ResourceSet::default();
        for resource in &kustomization.resources {
            let path = dir.join(resource);
            if fs.is_dir(&path) {
                set.extend(self.compose_dir(fs, &path, stack)?);
            } else if fs.exists(&path) {
                set.extend(read_documents(fs, &path)?);
            } else {
                return Err(ComposeError::MissingResource {
                    dir: dir.to_path_buf(),
                    resource: resource.clone(),
                });
            }
        }
        stack.pop();

        for resource in set.resources.iter_mut() {
            kustomization.transform(resource);
        }

        Ok(set)
    }
}

/// All non-empty yaml documents of a file
fn read_documents(fs: &dyn FileSystem, path: &Path) -> Result<Vec<Value>, ComposeError> {
    let data = fs.read_file(path)?;

    let mut documents = vec![];
    for document in serde_yaml::Deserializer::from_slice(&data) {
        let value = Value::deserialize(document).map_err(|source| ComposeError::InvalidManifest {
            path: path.to_path_buf(),
            source,
        })?;

        if !value.is_null() {
            documents.push(value);
        }
    }

    Ok(documents)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::filesys::DiskFileSystem;
    use pretty_assertions::assert_eq;

    fn write(dir: &Path, name: &str, contents: &str) {
        let path = dir.join(name);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, contents).unwrap();
    }

    fn yaml(text: &str) -> Value {
        serde_yaml::from_str(text).unwrap()
    }

    #[test]
    fn resources_files_and_directories() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "kustomization.yaml", "resources:\n- cm.yaml\n- base\n");
        write(
            dir.path(),
            "cm.yaml",
            "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: one\n---\n---\napiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: two\n",
        );
        write(dir.path(), "base/kustomization.yml", "resources: [svc.yaml]\n");
        write(
            dir.path(),
            "base/svc.yaml",
            "apiVersion: v1\nkind: Service\nmetadata:\n  name: svc\n",
        );

        let set = ResourceListComposer
            .compose(&DiskFileSystem, dir.path())
            .unwrap();

        let names: Vec<_> = set
            .resources()
            .iter()
            .map(|r| r["metadata"]["name"].as_str().unwrap())
            .collect();
        assert_eq!(names, vec!["one", "two", "svc"]);
    }

    #[test]
    fn transformations() {
        let kustomization = Kustomization {
            namespace: Some("prod".to_string()),
            name_prefix: Some("shop-".to_string()),
            common_labels: [("app".to_string(), "shop".to_string())].into(),
            ..Default::default()
        };

        let mut deployment = yaml("kind: Deployment\nmetadata:\n  name: web\n  labels:\n    tier: front\n");
        kustomization.transform(&mut deployment);
        assert_eq!(
            deployment,
            yaml("kind: Deployment\nmetadata:\n  name: shop-web\n  labels:\n    tier: front\n    app: shop\n  namespace: prod\n")
        );

        let mut namespace = yaml("kind: Namespace\nmetadata:\n  name: prod\n");
        kustomization.transform(&mut namespace);
        assert_eq!(namespace["metadata"].get("namespace"), None);
        assert_eq!(namespace["metadata"]["name"], yaml("shop-prod"));
    }

    #[test]
    fn missing_resource() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "kustomization.yaml", "resources:\n- nope.yaml\n");

        let err = ResourceListComposer
            .compose(&DiskFileSystem, dir.path())
            .unwrap_err();
        assert!(matches!(err, ComposeError::MissingResource { resource, .. } if resource == "nope.yaml"));
    }

    #[test]
    fn directory_cycle() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a/kustomization.yaml", "resources: [../b]\n");
        write(dir.path(), "b/kustomization.yaml", "resources: [../a]\n");

        let err = ResourceListComposer
            .compose(&DiskFileSystem, &dir.path().join("a"))
            .unwrap_err();
        assert!(matches!(err, ComposeError::Cycle { .. }), "{err:?}");
    }

    #[test]
    fn empty_set_serializes_to_nothing() {
        assert_eq!(ResourceSet::default().as_yaml().unwrap(), "");
    }

    #[test]
    fn yaml_documents_are_separated() {
        let mut set = ResourceSet::default();
        set.push(yaml("a: 1"));
        set.push(yaml("b: 2"));

        assert_eq!(set.as_yaml().unwrap(), "a: 1\n---\nb: 2\n");
    }
}
