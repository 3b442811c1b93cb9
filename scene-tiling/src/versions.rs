/// Per-scene version DAG: named snapshots linked to their parents.
use std::collections::{HashMap, HashSet};

use constants::store::ROOT_VERSION_TAG;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use uuid::Uuid;

use crate::error::{TilingError, TilingResult};

/// Index of a version inside its graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct VersionId(pub usize);

impl std::fmt::Display for VersionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Version {
    pub id: VersionId,
    pub uuid: Uuid,
    pub tag: String,
    /// First parent is the linear history; a second one marks a merge.
    pub parents: SmallVec<[VersionId; 2]>,
}

/// On-disk shape of `versions.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionFile {
    pub nodes: Vec<VersionEntry>,
    #[serde(default)]
    pub links: Vec<VersionLink>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionEntry {
    pub tag_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Uuid>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionLink {
    pub from: usize,
    pub to: usize,
}

impl Default for VersionFile {
    /// A scene that has only its root version.
    fn default() -> Self {
        Self {
            nodes: vec![VersionEntry {
                tag_name: ROOT_VERSION_TAG.to_string(),
                id: None,
            }],
            links: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct VersionGraph {
    nodes: Vec<Version>,
    tag_index: HashMap<String, VersionId>,
}

impl Default for VersionGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl VersionGraph {
    /// Graph holding only the root version, tagged `""`.
    pub fn new() -> Self {
        let mut graph = Self {
            nodes: Vec::new(),
            tag_index: HashMap::new(),
        };
        graph.push(ROOT_VERSION_TAG.to_string(), Uuid::new_v4(), SmallVec::new());
        graph
    }

    fn push(&mut self, tag: String, uuid: Uuid, parents: SmallVec<[VersionId; 2]>) -> VersionId {
        let id = VersionId(self.nodes.len());
        self.tag_index.insert(tag.clone(), id);
        self.nodes.push(Version {
            id,
            uuid,
            tag,
            parents,
        });
        id
    }

    /// Append a version with zero, one or two parents.
    pub fn add_version(&mut self, tag: &str, parents: &[VersionId]) -> TilingResult<VersionId> {
        if self.tag_index.contains_key(tag) {
            return Err(TilingError::DuplicateTag(tag.to_string()));
        }
        if parents.len() > 2 {
            return Err(TilingError::TooManyParents(parents.len()));
        }
        if let Some(missing) = parents.iter().find(|p| p.0 >= self.nodes.len()) {
            return Err(TilingError::UnknownParentVersion(missing.to_string()));
        }

        Ok(self.push(tag.to_string(), Uuid::new_v4(), parents.iter().copied().collect()))
    }

    pub fn add_version_by_tags(&mut self, tag: &str, parents: &[&str]) -> TilingResult<VersionId> {
        if self.tag_index.contains_key(tag) {
            return Err(TilingError::DuplicateTag(tag.to_string()));
        }
        let parents = parents
            .iter()
            .map(|parent| self.require(parent))
            .collect::<TilingResult<Vec<_>>>()?;
        self.add_version(tag, &parents)
    }

    /// Linear commit of `new` on top of `current`.
    pub fn commit(&mut self, current: &str, new: &str) -> TilingResult<VersionId> {
        self.add_version_by_tags(new, &[current])
    }

    /// Merge version `merged` with parents `left` then `right`.
    pub fn merge(&mut self, left: &str, right: &str, merged: &str) -> TilingResult<VersionId> {
        self.add_version_by_tags(merged, &[left, right])
    }

    pub fn get(&self, id: VersionId) -> Option<&Version> {
        self.nodes.get(id.0)
    }

    pub fn id_of(&self, tag: &str) -> Option<VersionId> {
        self.tag_index.get(tag).copied()
    }

    /// Tag lookup that fails with `UnknownParentVersion`.
    pub fn require(&self, tag: &str) -> TilingResult<VersionId> {
        self.id_of(tag)
            .ok_or_else(|| TilingError::UnknownParentVersion(tag.to_string()))
    }

    pub fn tag(&self, id: VersionId) -> Option<&str> {
        self.get(id).map(|v| v.tag.as_str())
    }

    pub fn versions(&self) -> &[Version] {
        &self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Parent links in version order, then parent order.
    pub fn links(&self) -> Vec<VersionLink> {
        self.nodes
            .iter()
            .flat_map(|version| {
                version.parents.iter().map(move |parent| VersionLink {
                    from: parent.0,
                    to: version.id.0,
                })
            })
            .collect()
    }

    /// Versions nobody lists as a parent, in id order.
    pub fn leaves(&self) -> Vec<VersionId> {
        let parents: HashSet<VersionId> = self
            .nodes
            .iter()
            .flat_map(|v| v.parents.iter().copied())
            .collect();
        self.nodes
            .iter()
            .map(|v| v.id)
            .filter(|id| !parents.contains(id))
            .collect()
    }

    pub fn leaf_tags(&self) -> Vec<&str> {
        self.leaves()
            .into_iter()
            .filter_map(|id| self.tag(id))
            .collect()
    }

    /// Nearest version on both first-parent chains, each chain starting at the version itself.
    /// Merge parents beyond the first are not searched.
    pub fn common_ancestor(&self, a: VersionId, b: VersionId) -> Option<VersionId> {
        let left: HashSet<VersionId> = self.first_parent_chain(a).collect();
        self.first_parent_chain(b).find(|id| left.contains(id))
    }

    pub fn common_ancestor_by_tag(&self, a: &str, b: &str) -> TilingResult<Option<VersionId>> {
        Ok(self.common_ancestor(self.require(a)?, self.require(b)?))
    }

    fn first_parent_chain(&self, start: VersionId) -> impl Iterator<Item = VersionId> + '_ {
        let first = self.get(start).map(|v| v.id);
        std::iter::successors(first, move |id| {
            self.get(*id).and_then(|v| v.parents.first().copied())
        })
    }

    pub fn to_file(&self) -> VersionFile {
        VersionFile {
            nodes: self
                .nodes
                .iter()
                .map(|v| VersionEntry {
                    tag_name: v.tag.clone(),
                    id: Some(v.uuid),
                })
                .collect(),
            links: self.links(),
        }
    }

    /// Rebuild a graph from its file form; the first link into a version is its first parent.
    pub fn from_file(file: &VersionFile) -> TilingResult<Self> {
        if file.nodes.is_empty() {
            return Err(TilingError::MalformedVersionFile("no versions".to_string()));
        }

        let mut parents: Vec<SmallVec<[VersionId; 2]>> = vec![SmallVec::new(); file.nodes.len()];
        for link in &file.links {
            if link.from >= file.nodes.len() || link.to >= file.nodes.len() {
                return Err(TilingError::MalformedVersionFile(format!(
                    "link {} -> {} points past {} versions",
                    link.from,
                    link.to,
                    file.nodes.len()
                )));
            }
            if link.from >= link.to {
                return Err(TilingError::MalformedVersionFile(format!(
                    "link {} -> {} does not point forward",
                    link.from, link.to
                )));
            }
            let entry = &mut parents[link.to];
            if entry.len() == 2 {
                return Err(TilingError::MalformedVersionFile(format!(
                    "version {} has more than two parents",
                    link.to
                )));
            }
            entry.push(VersionId(link.from));
        }

        let mut graph = Self {
            nodes: Vec::with_capacity(file.nodes.len()),
            tag_index: HashMap::new(),
        };
        for (entry, parents) in file.nodes.iter().zip(parents) {
            if graph.tag_index.contains_key(&entry.tag_name) {
                return Err(TilingError::MalformedVersionFile(format!(
                    "duplicate tag {:?}",
                    entry.tag_name
                )));
            }
            let uuid = entry.id.unwrap_or_else(Uuid::new_v4);
            graph.push(entry.tag_name.clone(), uuid, parents);
        }
        Ok(graph)
    }

    pub fn from_json(text: &str) -> TilingResult<Self> {
        let file: VersionFile = serde_json::from_str(text)
            .map_err(|e| TilingError::MalformedVersionFile(e.to_string()))?;
        Self::from_file(&file)
    }

    pub fn to_json_pretty(&self) -> TilingResult<String> {
        Ok(serde_json::to_string_pretty(&self.to_file())?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph_with_links(tags: &[&str], links: &[(usize, usize)]) -> VersionGraph {
        let file = VersionFile {
            nodes: tags
                .iter()
                .map(|t| VersionEntry {
                    tag_name: t.to_string(),
                    id: None,
                })
                .collect(),
            links: links
                .iter()
                .map(|&(from, to)| VersionLink { from, to })
                .collect(),
        };
        VersionGraph::from_file(&file).unwrap()
    }

    #[test]
    fn new_graph_has_root_version() {
        let graph = VersionGraph::new();
        assert_eq!(graph.len(), 1);
        assert_eq!(graph.tag(VersionId(0)), Some(""));
        assert_eq!(graph.leaves(), vec![VersionId(0)]);
        assert_eq!(graph.to_file().nodes[0].tag_name, "");
    }

    #[test]
    fn commit_extends_history() {
        let mut graph = graph_with_links(&["", "a"], &[(0, 1)]);
        let b = graph.commit("a", "b").unwrap();

        assert_eq!(b, VersionId(2));
        let tags: Vec<_> = graph.versions().iter().map(|v| v.tag.as_str()).collect();
        assert_eq!(tags, vec!["", "a", "b"]);
        assert_eq!(
            graph.links(),
            vec![VersionLink { from: 0, to: 1 }, VersionLink { from: 1, to: 2 }]
        );
        assert_eq!(graph.leaf_tags(), vec!["b"]);
    }

    #[test]
    fn duplicate_and_unknown_tags_leave_graph_unchanged() {
        let mut graph = VersionGraph::new();
        graph.commit("", "a").unwrap();
        let before = graph.clone();

        assert!(matches!(graph.commit("", "a"), Err(TilingError::DuplicateTag(t)) if t == "a"));
        assert!(matches!(
            graph.commit("missing", "c"),
            Err(TilingError::UnknownParentVersion(t)) if t == "missing"
        ));
        assert!(matches!(
            graph.add_version("d", &[VersionId(9)]),
            Err(TilingError::UnknownParentVersion(_))
        ));
        assert!(matches!(
            graph.add_version("e", &[VersionId(0), VersionId(1), VersionId(0)]),
            Err(TilingError::TooManyParents(3))
        ));
        assert_eq!(graph, before);
    }

    #[test]
    fn leaves_and_merge_links() {
        let mut graph = VersionGraph::new();
        graph.commit("", "a").unwrap();
        graph.commit("a", "l").unwrap();
        graph.commit("a", "r").unwrap();
        assert_eq!(graph.leaf_tags(), vec!["l", "r"]);

        let m = graph.merge("l", "r", "m").unwrap();
        assert_eq!(graph.leaf_tags(), vec!["m"]);
        let links = graph.links();
        assert_eq!(&links[links.len() - 2..], &[
            VersionLink { from: 2, to: 4 },
            VersionLink { from: 3, to: 4 },
        ]);
        assert_eq!(graph.get(m).unwrap().parents.as_slice(), &[VersionId(2), VersionId(3)]);
    }

    #[test]
    fn common_ancestor_follows_first_parents() {
        let mut graph = VersionGraph::new();
        graph.commit("", "a").unwrap();
        graph.commit("a", "b").unwrap();
        graph.commit("b", "c").unwrap();
        graph.commit("a", "x").unwrap();

        let id = |tag| graph.id_of(tag).unwrap();
        assert_eq!(graph.common_ancestor(id("a"), id("c")), Some(id("a")));
        assert_eq!(graph.common_ancestor(id("c"), id("a")), Some(id("a")));
        assert_eq!(graph.common_ancestor(id("c"), id("x")), Some(id("a")));
        assert_eq!(graph.common_ancestor(id("b"), id("b")), Some(id("b")));
    }

    #[test]
    fn disjoint_histories_have_no_ancestor() {
        let mut graph = VersionGraph::new();
        graph.add_version("island", &[]).unwrap();
        graph.commit("island", "shore").unwrap();
        graph.commit("", "main").unwrap();

        assert_eq!(graph.common_ancestor_by_tag("shore", "main").unwrap(), None);
    }

    #[test]
    fn file_round_trip_keeps_parent_order_and_ids() {
        let mut graph = VersionGraph::new();
        graph.commit("", "l").unwrap();
        graph.commit("", "r").unwrap();
        graph.merge("r", "l", "m").unwrap();

        let text = graph.to_json_pretty().unwrap();
        let loaded = VersionGraph::from_json(&text).unwrap();
        assert_eq!(loaded, graph);
        let m = loaded.id_of("m").unwrap();
        assert_eq!(loaded.get(m).unwrap().parents[0], loaded.id_of("r").unwrap());
    }

    #[test]
    fn plain_store_file_loads() {
        let graph = VersionGraph::from_json(
            r#"{"nodes":[{"tagName":""},{"tagName":"a"}],"links":[{"from":0,"to":1}]}"#,
        )
        .unwrap();
        assert_eq!(graph.leaf_tags(), vec!["a"]);
    }

    #[test]
    fn malformed_files_are_rejected() {
        for text in [
            r#"{"nodes":[{"tagName":""},{"tagName":""}],"links":[]}"#,
            r#"{"nodes":[{"tagName":""},{"tagName":"a"}],"links":[{"from":0,"to":5}]}"#,
            r#"{"nodes":[{"tagName":""},{"tagName":"a"}],"links":[{"from":1,"to":0}]}"#,
            r#"{"nodes":[],"links":[]}"#,
            r#"{"links":[]}"#,
        ] {
            assert!(
                matches!(
                    VersionGraph::from_json(text),
                    Err(TilingError::MalformedVersionFile(_))
                ),
                "accepted {text}"
            );
        }
    }
}
