//! Artifact scanner over a module tree on disk.
//!
//! Every immediate subdirectory of the root that holds a manifest is a
//! [`Module`]. Files inside it are matched against the configured include
//! and exclude globs and classified with [`classify_file`]. A directory
//! with a malformed manifest is skipped and reported; only an unreadable
//! root aborts the scan.

use anyhow::Result;
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::{Path, PathBuf};
use walkdir::{DirEntry, WalkDir};

use odoo_rag_core::error::ScanError;
use odoo_rag_core::extract::classify_file;
use odoo_rag_core::manifest::{parse_manifest, MANIFEST_FILES};
use odoo_rag_core::models::{ArtifactKind, Module};

use crate::config::IndexConfig;

/// One classified file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub module: String,
    /// Path on disk.
    pub path: PathBuf,
    /// Root-relative path with `/` separators, recorded on extracted facts.
    pub source_path: String,
    pub kind: ArtifactKind,
}

#[derive(Debug, Default)]
pub struct ScanOutput {
    pub modules: Vec<Module>,
    pub artifacts: Vec<Artifact>,
    /// Directories and files that were skipped.
    pub skipped: Vec<ScanError>,
}

/// Scan `root` for modules and their artifacts.
///
/// Modules come out sorted by name and artifacts by source path.
pub fn scan_modules(root: &Path, config: &IndexConfig) -> Result<ScanOutput, ScanError> {
    let unreadable = |source| ScanError::UnreadableRoot {
        path: root.to_path_buf(),
        source,
    };
    let entries = std::fs::read_dir(root).map_err(unreadable)?;

    let include_set = build_globset(&config.include_globs).map_err(|e| {
        unreadable(std::io::Error::new(std::io::ErrorKind::InvalidInput, e.to_string()))
    })?;
    let exclude_set = build_globset(&config.exclude_globs).map_err(|e| {
        unreadable(std::io::Error::new(std::io::ErrorKind::InvalidInput, e.to_string()))
    })?;

    let mut dirs: Vec<PathBuf> = Vec::new();
    for entry in entries {
        let entry = entry.map_err(unreadable)?;
        let path = entry.path();
        if path.is_dir() && !is_hidden_name(&entry.file_name().to_string_lossy()) {
            dirs.push(path);
        }
    }
    dirs.sort();

    let mut output = ScanOutput::default();
    for dir in dirs {
        let name = dir
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();

        let module = match load_module(root, &dir, &name) {
            Ok(Some(module)) => module,
            Ok(None) => {
                tracing::debug!(module = %name, "no manifest, not a module");
                continue;
            }
            Err(e) => {
                tracing::warn!(module = %name, "skipping directory: {}", e);
                output.skipped.push(e);
                continue;
            }
        };

        let (artifacts, skipped) =
            scan_module_files(root, &dir, &name, config, &include_set, &exclude_set);
        output.artifacts.extend(artifacts);
        output.skipped.extend(skipped);
        output.modules.push(module);
    }

    output
        .artifacts
        .sort_by(|a, b| a.source_path.cmp(&b.source_path));
    Ok(output)
}

fn load_module(root: &Path, dir: &Path, name: &str) -> Result<Option<Module>, ScanError> {
    let Some(manifest_path) = MANIFEST_FILES
        .iter()
        .map(|f| dir.join(f))
        .find(|p| p.is_file())
    else {
        return Ok(None);
    };

    let content = std::fs::read_to_string(&manifest_path).map_err(|source| ScanError::Io {
        module: name.to_string(),
        path: manifest_path.clone(),
        source,
    })?;
    let manifest = parse_manifest(&content, &relative(root, &manifest_path)).map_err(|reason| {
        ScanError::MalformedManifest {
            module: name.to_string(),
            path: manifest_path.clone(),
            reason,
        }
    })?;

    Ok(Some(Module {
        name: name.to_string(),
        path: dir.to_path_buf(),
        manifest,
    }))
}

fn scan_module_files(
    root: &Path,
    dir: &Path,
    module: &str,
    config: &IndexConfig,
    include_set: &GlobSet,
    exclude_set: &GlobSet,
) -> (Vec<Artifact>, Vec<ScanError>) {
    let mut artifacts = Vec::new();
    let mut skipped = Vec::new();

    let walker = WalkDir::new(dir)
        .follow_links(config.follow_symlinks)
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !is_hidden(e));

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!(module, "walk error: {}", e);
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let file_name = entry.file_name().to_string_lossy();
        if entry.depth() == 1 && MANIFEST_FILES.contains(&file_name.as_ref()) {
            continue;
        }

        let rel_str = relative(root, path);
        if exclude_set.is_match(&rel_str) || !include_set.is_match(&rel_str) {
            continue;
        }

        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(source) => {
                tracing::warn!(module, path = %rel_str, "unreadable file: {}", source);
                skipped.push(ScanError::Io {
                    module: module.to_string(),
                    path: path.to_path_buf(),
                    source,
                });
                continue;
            }
        };

        if let Some(kind) = classify_file(&file_name, &content) {
            artifacts.push(Artifact {
                module: module.to_string(),
                path: path.to_path_buf(),
                source_path: rel_str,
                kind,
            });
        }
    }

    (artifacts, skipped)
}

fn is_hidden(entry: &DirEntry) -> bool {
    is_hidden_name(&entry.file_name().to_string_lossy())
}

fn is_hidden_name(name: &str) -> bool {
    name.starts_with('.')
}

fn relative(root: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(root).unwrap_or(path);
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write(path: &Path, content: &str) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    #[test]
    fn discovers_modules_and_classifies_files() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path();
        write(
            &root.join("sale/__manifest__.py"),
            "{'name': 'Sales', 'depends': ['base']}",
        );
        write(
            &root.join("sale/models/sale.py"),
            "class SaleOrder(models.Model):\n    _name = 'sale.order'\n",
        );
        write(&root.join("sale/utils.py"), "def helper():\n    pass\n");
        write(&root.join("sale/views/sale_views.xml"), "<odoo/>");
        write(&root.join("sale/static/src/js/widget.js"), "function w() {}\n");
        write(&root.join("sale/README.md"), "# docs");
        write(&root.join("sale/.hidden/x.py"), "def x():\n    pass\n");
        write(&root.join("broken/__manifest__.py"), "# nothing here");
        write(&root.join("notes/todo.py"), "def x():\n    pass\n");

        let out = scan_modules(root, &IndexConfig::default()).unwrap();
        let names: Vec<&str> = out.modules.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["sale"]);
        assert_eq!(out.modules[0].manifest.depends, vec!["base"]);
        assert_eq!(out.modules[0].manifest.source_path, "sale/__manifest__.py");

        let found: Vec<(&str, ArtifactKind)> = out
            .artifacts
            .iter()
            .map(|a| (a.source_path.as_str(), a.kind))
            .collect();
        assert_eq!(
            found,
            vec![
                ("sale/models/sale.py", ArtifactKind::ModelDefinition),
                ("sale/static/src/js/widget.js", ArtifactKind::Script),
                ("sale/utils.py", ArtifactKind::Script),
                ("sale/views/sale_views.xml", ArtifactKind::ViewDefinition),
            ]
        );

        assert_eq!(out.skipped.len(), 1);
        assert!(matches!(
            &out.skipped[0],
            ScanError::MalformedManifest { module, .. } if module == "broken"
        ));
    }

    #[test]
    fn missing_root_is_fatal() {
        let err = scan_modules(Path::new("/definitely/not/here"), &IndexConfig::default())
            .unwrap_err();
        assert!(matches!(err, ScanError::UnreadableRoot { .. }));
    }
}
