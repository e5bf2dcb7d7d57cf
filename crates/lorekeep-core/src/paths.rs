//! Folder-path metadata derived from upload-relative paths.
//!
//! Paths are always `/`-separated and relative to the upload root
//! (`docs/api/auth.md`). A folder path is the file path minus its last
//! segment; an empty folder path means the file sits at the upload root.

use std::collections::{BTreeMap, BTreeSet};

use serde_json::json;

use crate::models::{Breadcrumb, FolderPlacement};

/// Folder type patterns, first match wins. Matching is substring-based
/// on the lowercased folder name.
const FOLDER_TYPE_PATTERNS: &[(&str, &[&str])] = &[
    ("documentation", &["docs", "documentation", "wiki", "manual", "guide"]),
    ("source", &["src", "source", "code", "lib", "library"]),
    ("configuration", &["config", "conf", "settings", "env"]),
    ("data", &["data", "dataset", "csv", "json", "db"]),
    ("media", &["images", "img", "media", "assets", "pictures"]),
    ("test", &["test", "tests", "testing", "spec"]),
    ("examples", &["example", "examples", "demo", "sample"]),
    ("api", &["api", "rest", "graphql", "endpoints"]),
    ("templates", &["template", "templates", "layout", "theme"]),
];

/// Extension categories, first match wins (`.md` is `text`).
const CONTENT_CATEGORIES: &[(&str, &[&str])] = &[
    ("text", &["txt", "md", "rst", "adoc"]),
    ("documentation", &["md", "rst", "adoc", "wiki"]),
    ("code", &["py", "js", "ts", "java", "cpp", "c", "go", "rs"]),
    ("data", &["json", "csv", "xml", "yaml", "yml"]),
    ("config", &["conf", "ini", "cfg", "env", "properties"]),
    ("web", &["html", "htm", "css", "scss", "less"]),
    ("office", &["pdf", "doc", "docx", "rtf", "odt"]),
];

/// Tags contributed by well-known folder names.
const FOLDER_NAME_TAGS: &[(&str, &[&str])] = &[
    ("docs", &["documentation", "reference"]),
    ("documentation", &["documentation", "reference"]),
    ("api", &["api", "technical"]),
    ("guide", &["tutorial", "guide"]),
    ("tutorial", &["tutorial", "guide"]),
    ("example", &["example", "sample"]),
    ("test", &["testing", "quality-assurance"]),
    ("config", &["configuration", "settings"]),
    ("src", &["source-code", "development"]),
    ("lib", &["library", "utility"]),
    ("util", &["utility", "helper"]),
    ("data", &["data", "dataset"]),
    ("image", &["media", "visual"]),
    ("asset", &["media", "resource"]),
];

/// Non-empty segments of a `/`-separated path.
pub fn segments(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}

/// Folder path of a relative file path (`a/b/c.txt` -> `a/b`).
pub fn folder_of(relative_path: &str) -> String {
    let segs = segments(relative_path);
    match segs.split_last() {
        Some((_, folders)) => folders.join("/"),
        None => String::new(),
    }
}

/// Every ancestor path of `folder_path`, root first, including itself.
///
/// `a/b/c` yields `a`, `a/b`, `a/b/c`.
pub fn ancestors(folder_path: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = String::new();
    for seg in segments(folder_path) {
        if !current.is_empty() {
            current.push('/');
        }
        current.push_str(seg);
        out.push(current.clone());
    }
    out
}

/// Parent of a folder path, `None` for a root folder.
pub fn parent_of(folder_path: &str) -> Option<String> {
    let segs = segments(folder_path);
    if segs.len() <= 1 {
        None
    } else {
        Some(segs[..segs.len() - 1].join("/"))
    }
}

/// Distinct non-empty folder paths of a set of relative file paths, sorted.
pub fn distinct_folders<'a, I>(relative_paths: I) -> Vec<String>
where
    I: IntoIterator<Item = &'a str>,
{
    relative_paths
        .into_iter()
        .map(folder_of)
        .filter(|f| !f.is_empty())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Detect the folder type from a folder hierarchy.
pub fn detect_folder_type(hierarchy: &[&str]) -> &'static str {
    if hierarchy.is_empty() {
        return "root";
    }
    for folder in hierarchy.iter().map(|f| f.to_lowercase()) {
        for (folder_type, patterns) in FOLDER_TYPE_PATTERNS {
            if patterns.iter().any(|p| folder.contains(p)) {
                return folder_type;
            }
        }
    }
    "general"
}

/// Content category from the file extension, falling back to the folder type.
pub fn content_category(relative_path: &str, folder_type: &str) -> String {
    if let Some(ext) = crate::file_safety::extension_of(relative_path) {
        for (category, exts) in CONTENT_CATEGORIES {
            if exts.contains(&ext.as_str()) {
                return (*category).to_string();
            }
        }
    }
    if folder_type == "general" {
        "document".to_string()
    } else {
        folder_type.to_string()
    }
}

fn document_tags(relative_path: &str, hierarchy: &[&str]) -> Vec<String> {
    let mut tags = BTreeSet::new();
    for folder in hierarchy {
        let clean = folder.to_lowercase().replace(['_', ' '], "-");
        if clean.chars().count() > 1 {
            tags.insert(format!("folder:{}", clean));
        }
    }
    match hierarchy.len() {
        0 => {
            tags.insert("root-level".to_string());
        }
        1 => {
            tags.insert("top-level".to_string());
        }
        d if d > 3 => {
            tags.insert("deeply-nested".to_string());
        }
        _ => {}
    }
    if let Some(ext) = crate::file_safety::extension_of(relative_path) {
        tags.insert(format!("type:{}", ext));
    }
    tags.into_iter().collect()
}

impl FolderPlacement {
    /// Derive placement metadata for a file at `relative_path`.
    pub fn from_relative_path(relative_path: &str) -> Self {
        let segs = segments(relative_path);
        let hierarchy: &[&str] = match segs.split_last() {
            Some((_, folders)) => folders,
            None => &[],
        };
        let folder_type = detect_folder_type(hierarchy);

        let mut metadata = json!({
            "folder_depth": hierarchy.len(),
            "folder_hierarchy": hierarchy,
            "is_nested": hierarchy.len() > 1,
            "folder_type": folder_type,
        });
        if let (Some(first), Some(last)) = (hierarchy.first(), hierarchy.last()) {
            metadata["root_folder"] = json!(first);
            metadata["immediate_parent"] = json!(last);
        }

        Self {
            relative_path: segs.join("/"),
            parent_folder: hierarchy.last().map(|s| s.to_string()),
            folder_depth: hierarchy.len() as i32,
            folder_path: hierarchy.join("/"),
            folder_metadata: metadata,
            document_tags: document_tags(relative_path, hierarchy),
            content_category: content_category(relative_path, folder_type),
        }
    }

    /// Placement for a file whose folder structure is not preserved.
    pub fn flat(filename: &str) -> Self {
        let name = segments(filename).last().copied().unwrap_or(filename);
        Self::from_relative_path(name)
    }
}

/// Auto-tags for a folder node, generated at statistics-rebuild time.
pub fn auto_tags(full_path: &str, document_count: i64) -> Vec<String> {
    let parts: Vec<String> = segments(full_path).iter().map(|s| s.to_lowercase()).collect();
    let mut tags = BTreeSet::new();

    for part in &parts {
        let clean = part.replace(['_', '-'], " ");
        if clean.chars().count() > 2 {
            tags.insert(clean);
        }
    }

    match parts.len() {
        1 => {
            tags.insert("top-level".to_string());
        }
        d if d > 3 => {
            tags.insert("deep-nested".to_string());
        }
        _ => {}
    }

    if document_count > 10 {
        tags.insert("large-collection".to_string());
    } else if document_count > 0 {
        tags.insert("small-collection".to_string());
    } else {
        tags.insert("empty-folder".to_string());
    }

    let table: BTreeMap<&str, &[&str]> = FOLDER_NAME_TAGS.iter().copied().collect();
    for part in &parts {
        if let Some(extra) = table.get(part.as_str()) {
            tags.extend(extra.iter().map(|t| t.to_string()));
        }
    }

    tags.into_iter().collect()
}

/// Breadcrumb entries from the root folder down to `full_path`.
pub fn breadcrumb(full_path: &str) -> Vec<Breadcrumb> {
    let parts = ancestors(full_path);
    let last = parts.len().saturating_sub(1);
    parts
        .into_iter()
        .enumerate()
        .map(|(i, path)| Breadcrumb {
            name: segments(&path).last().copied().unwrap_or_default().to_string(),
            path,
            depth: i as i32,
            is_current: i == last,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_folder_of() {
        assert_eq!(folder_of("a/b/report.pdf"), "a/b");
        assert_eq!(folder_of("notes.txt"), "");
        assert_eq!(folder_of("/a//b/c.txt"), "a/b");
    }

    #[test]
    fn test_ancestors_and_parent() {
        assert_eq!(ancestors("a/b/c"), vec!["a", "a/b", "a/b/c"]);
        assert!(ancestors("").is_empty());
        assert_eq!(parent_of("a/b/c").as_deref(), Some("a/b"));
        assert_eq!(parent_of("a"), None);
    }

    #[test]
    fn test_distinct_folders() {
        let paths = ["a/b/report.pdf", "a/c/notes.txt", "a/b/other.md", "root.txt"];
        assert_eq!(distinct_folders(paths), vec!["a/b", "a/c"]);
    }

    #[test]
    fn test_placement_nested_file() {
        let p = FolderPlacement::from_relative_path("docs/api/auth.md");
        assert_eq!(p.relative_path, "docs/api/auth.md");
        assert_eq!(p.folder_path, "docs/api");
        assert_eq!(p.parent_folder.as_deref(), Some("api"));
        assert_eq!(p.folder_depth, 2);
        assert_eq!(p.folder_metadata["folder_type"], "documentation");
        assert_eq!(p.folder_metadata["root_folder"], "docs");
        assert_eq!(p.folder_metadata["immediate_parent"], "api");
        assert_eq!(p.folder_metadata["is_nested"], true);
        assert!(p.document_tags.contains(&"folder:docs".to_string()));
        assert!(p.document_tags.contains(&"folder:api".to_string()));
        assert!(p.document_tags.contains(&"type:md".to_string()));
        assert_eq!(p.content_category, "text");
    }

    #[test]
    fn test_placement_root_file() {
        let p = FolderPlacement::from_relative_path("README.txt");
        assert_eq!(p.folder_path, "");
        assert_eq!(p.parent_folder, None);
        assert_eq!(p.folder_depth, 0);
        assert_eq!(p.folder_metadata["folder_type"], "root");
        assert!(p.folder_metadata.get("root_folder").is_none());
        assert!(p.document_tags.contains(&"root-level".to_string()));
    }

    #[test]
    fn test_placement_depth_tags() {
        let p = FolderPlacement::from_relative_path("a/x.txt");
        assert!(p.document_tags.contains(&"top-level".to_string()));
        let p = FolderPlacement::from_relative_path("a/b/c/d/x.txt");
        assert!(p.document_tags.contains(&"deeply-nested".to_string()));
    }

    #[test]
    fn test_content_category_falls_back_to_folder_type() {
        let p = FolderPlacement::from_relative_path("tests/sample.wav");
        assert_eq!(p.content_category, "test");
        let p = FolderPlacement::from_relative_path("misc/sample.wav");
        assert_eq!(p.content_category, "document");
        let p = FolderPlacement::from_relative_path("misc/report.pdf");
        assert_eq!(p.content_category, "office");
    }

    #[test]
    fn test_flat_placement_drops_folders() {
        let p = FolderPlacement::flat("docs/api/auth.md");
        assert_eq!(p.relative_path, "auth.md");
        assert_eq!(p.folder_path, "");
    }

    #[test]
    fn test_auto_tags() {
        let tags = auto_tags("docs", 12);
        assert!(tags.contains(&"docs".to_string()));
        assert!(tags.contains(&"top-level".to_string()));
        assert!(tags.contains(&"large-collection".to_string()));
        assert!(tags.contains(&"documentation".to_string()));
        assert!(tags.contains(&"reference".to_string()));

        let tags = auto_tags("a/b/c/my_notes", 0);
        assert!(tags.contains(&"deep-nested".to_string()));
        assert!(tags.contains(&"empty-folder".to_string()));
        assert!(tags.contains(&"my notes".to_string()));
        // segments of two chars or fewer are not tags
        assert!(!tags.contains(&"a".to_string()));

        let tags = auto_tags("src/api", 3);
        assert!(tags.contains(&"small-collection".to_string()));
        assert!(tags.contains(&"source-code".to_string()));
        assert!(tags.contains(&"technical".to_string()));
        assert!(!tags.contains(&"top-level".to_string()));
    }

    #[test]
    fn test_breadcrumb() {
        let crumbs = breadcrumb("docs/api/v2");
        assert_eq!(crumbs.len(), 3);
        assert_eq!(crumbs[0].name, "docs");
        assert_eq!(crumbs[0].path, "docs");
        assert_eq!(crumbs[0].depth, 0);
        assert!(!crumbs[0].is_current);
        assert_eq!(crumbs[2].name, "v2");
        assert_eq!(crumbs[2].path, "docs/api/v2");
        assert!(crumbs[2].is_current);
        assert!(breadcrumb("").is_empty());
    }
}
