//! Folder hierarchy builder.
//!
//! Reconstructs the folder tree of an upload from relative paths and keeps
//! per-node statistics. Storage goes through [`FolderRepository`] and
//! [`DocumentRepository`], so the same logic runs against PostgreSQL and the
//! in-memory stores.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, instrument};
use uuid::Uuid;

use lorekeep_core::paths::{ancestors, auto_tags, segments};
use lorekeep_core::{
    DocumentRepository, FolderNode, FolderRepository, FolderStatistics, FolderSummary,
    FolderTreeNode, NewFolderNode, Result,
};

/// Folder tree operations for a set of collections.
#[derive(Clone)]
pub struct FolderHierarchy {
    folders: Arc<dyn FolderRepository>,
    documents: Arc<dyn DocumentRepository>,
}

impl FolderHierarchy {
    pub fn new(folders: Arc<dyn FolderRepository>, documents: Arc<dyn DocumentRepository>) -> Self {
        Self { folders, documents }
    }

    /// Create every missing node along each of `folder_paths`.
    ///
    /// Idempotent: existing nodes are reused and a repeated call creates
    /// nothing. Resolved paths are cached for the duration of the call, so
    /// each distinct folder costs at most one insert. Returns the nodes this
    /// call created.
    #[instrument(skip(self, folder_paths), fields(subsystem = "db", component = "folders", op = "ensure_paths", path_count = folder_paths.len()))]
    pub async fn ensure_paths(
        &self,
        collection_id: Uuid,
        upload_job_id: Option<Uuid>,
        folder_paths: &[String],
    ) -> Result<Vec<FolderNode>> {
        let mut cache: HashMap<String, Uuid> = self
            .folders
            .list(collection_id)
            .await?
            .into_iter()
            .map(|n| (n.full_path, n.id))
            .collect();

        let mut sorted: Vec<&String> = folder_paths.iter().collect();
        sorted.sort();
        sorted.dedup();

        let mut created = Vec::new();
        for path in sorted {
            let mut parent_id = None;
            for (depth, current) in ancestors(path).into_iter().enumerate() {
                if let Some(id) = cache.get(&current) {
                    parent_id = Some(*id);
                    continue;
                }
                let name = segments(&current)
                    .last()
                    .copied()
                    .unwrap_or_default()
                    .to_string();
                let (node, is_new) = self
                    .folders
                    .insert_node(NewFolderNode {
                        collection_id,
                        upload_job_id,
                        name,
                        full_path: current.clone(),
                        parent_id,
                        depth: depth as i32,
                    })
                    .await?;
                parent_id = Some(node.id);
                cache.insert(current, node.id);
                if is_new {
                    created.push(node);
                }
            }
        }

        debug!(created = created.len(), "Folder paths ensured");
        Ok(created)
    }

    /// Recompute statistics for every node of the collection, deepest first.
    ///
    /// Direct counts match documents whose folder path equals the node's
    /// path; cumulative counts add every document below it by path prefix.
    /// Returns the number of nodes updated.
    #[instrument(skip(self), fields(subsystem = "db", component = "folders", op = "rebuild_statistics"))]
    pub async fn rebuild_statistics(&self, collection_id: Uuid) -> Result<usize> {
        let start = Instant::now();
        let mut nodes = self.folders.list(collection_id).await?;
        nodes.sort_by(|a, b| b.depth.cmp(&a.depth).then_with(|| a.full_path.cmp(&b.full_path)));
        let footprints = self.documents.footprints(collection_id).await?;

        let stats: Vec<FolderStatistics> = nodes
            .iter()
            .map(|node| {
                let prefix = format!("{}/", node.full_path);
                let (mut direct, mut direct_size) = (0i64, 0i64);
                let (mut below, mut below_size) = (0i64, 0i64);
                for fp in &footprints {
                    if fp.folder_path == node.full_path {
                        direct += 1;
                        direct_size += fp.size_bytes;
                    } else if fp.folder_path.starts_with(&prefix) {
                        below += 1;
                        below_size += fp.size_bytes;
                    }
                }
                let total = direct + below;
                FolderStatistics {
                    folder_id: node.id,
                    document_count: direct,
                    total_documents: total,
                    total_size_bytes: direct_size + below_size,
                    auto_tags: auto_tags(&node.full_path, total),
                }
            })
            .collect();

        let updated = stats.len();
        self.folders.apply_statistics(stats).await?;

        debug!(
            nodes = updated,
            documents = footprints.len(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Folder statistics rebuilt"
        );
        Ok(updated)
    }

    /// Nested folder tree ordered by depth then name, cut at `max_depth`.
    pub async fn get_tree(
        &self,
        collection_id: Uuid,
        max_depth: Option<i32>,
    ) -> Result<Vec<FolderTreeNode>> {
        let nodes: Vec<FolderNode> = self
            .folders
            .list(collection_id)
            .await?
            .into_iter()
            .filter(|n| max_depth.map_or(true, |d| n.depth <= d))
            .collect();
        Ok(build_tree(nodes))
    }

    /// Aggregate counts across the collection's folder tree.
    pub async fn summary(&self, collection_id: Uuid) -> Result<FolderSummary> {
        let nodes = self.folders.list(collection_id).await?;
        let roots = nodes.iter().filter(|n| n.parent_id.is_none());
        Ok(FolderSummary {
            total_folders: nodes.len() as i64,
            max_depth: nodes.iter().map(|n| n.depth).max().unwrap_or(0),
            total_documents: roots.clone().map(|n| n.total_documents).sum(),
            total_size_bytes: roots.map(|n| n.total_size_bytes).sum(),
        })
    }
}

/// Assemble nodes into trees. Input order is kept among siblings; nodes whose
/// parent is absent (cut by a depth limit or missing) become roots.
pub fn build_tree(nodes: Vec<FolderNode>) -> Vec<FolderTreeNode> {
    let present: std::collections::HashSet<Uuid> = nodes.iter().map(|n| n.id).collect();
    let mut children: HashMap<Uuid, Vec<FolderNode>> = HashMap::new();
    let mut roots = Vec::new();

    for node in nodes {
        match node.parent_id {
            Some(pid) if present.contains(&pid) => children.entry(pid).or_default().push(node),
            _ => roots.push(node),
        }
    }

    fn attach(node: FolderNode, children: &mut HashMap<Uuid, Vec<FolderNode>>) -> FolderTreeNode {
        let kids = children.remove(&node.id).unwrap_or_default();
        FolderTreeNode {
            children: kids.into_iter().map(|k| attach(k, children)).collect(),
            node,
        }
    }

    roots
        .into_iter()
        .map(|r| attach(r, &mut children))
        .collect()
}
