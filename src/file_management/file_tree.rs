use log::{debug, warn};
use std::sync::Arc;
use std::time::Duration;

use crate::container_management::runtime::ContainerRuntime;
use crate::error_handling::types::FileError;
use crate::file_management::types::FileTree;

/// Builds a [`FileTree`] from `find -printf '%y %p\n'` output.
///
/// Paths outside `mount` and any path with a component in `excluded` are skipped.
/// Only `d` lines become directories; files, symlinks and others are leaves.
pub fn parse_find_output(output: &str, mount: &str, excluded: &[String]) -> FileTree {
    let mount = mount.trim_end_matches('/');
    let mut tree = FileTree::new();

    for line in output.lines() {
        let Some((kind, path)) = line.trim_end().split_once(' ') else {
            continue;
        };
        let Some(relative) = path.strip_prefix(mount) else {
            continue;
        };
        if !relative.is_empty() && !relative.starts_with('/') {
            // a sibling such as /workspace2
            continue;
        }

        let components: Vec<&str> = relative.split('/').filter(|c| !c.is_empty()).collect();
        if components.is_empty() {
            continue;
        }
        if components
            .iter()
            .any(|c| excluded.iter().any(|e| e.as_str() == *c))
        {
            continue;
        }

        tree.insert(&components, kind == "d");
    }

    tree
}

/// Enumerates a workspace by querying the live container, so files created by
/// processes inside it show up without touching the host mount.
pub struct TreeBuilder {
    runtime: Arc<dyn ContainerRuntime>,
    mount: String,
    excluded: Vec<String>,
    timeout: Duration,
}

impl TreeBuilder {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        mount: String,
        excluded: Vec<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            runtime,
            mount,
            excluded,
            timeout,
        }
    }

    /// `find <mount> ( -name a -o -name b ) -prune -o -printf '%y %p\n'`
    fn find_command(&self) -> Vec<String> {
        let mut command = vec!["find".to_string(), self.mount.clone()];
        if !self.excluded.is_empty() {
            command.push("(".to_string());
            for (i, dir) in self.excluded.iter().enumerate() {
                if i > 0 {
                    command.push("-o".to_string());
                }
                command.push("-name".to_string());
                command.push(dir.clone());
            }
            command.push(")".to_string());
            command.push("-prune".to_string());
            command.push("-o".to_string());
        }
        command.push("-printf".to_string());
        command.push("%y %p\\n".to_string());
        command
    }

    pub async fn build_tree(&self, container_name: &str) -> Result<FileTree, FileError> {
        let output = self
            .runtime
            .exec(container_name, &self.find_command(), Some(self.timeout))
            .await
            .map_err(|e| {
                warn!("File tree generation failed for {}: {}", container_name, e);
                FileError::TreeFailed(e.to_string())
            })?;

        if !output.success() && output.stdout.is_empty() {
            return Err(FileError::TreeFailed(output.stderr.trim().to_string()));
        }

        let tree = parse_find_output(&output.stdout, &self.mount, &self.excluded);
        debug!(
            "Built file tree for {} ({} top-level entries)",
            container_name,
            tree.len()
        );
        Ok(tree)
    }
}
