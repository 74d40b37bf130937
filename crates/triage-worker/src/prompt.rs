// Prompt construction: image reference first, rubric after.

use std::path::Path;

use triage_config::LaunchSpec;

/// Builds the text sent to the worker for one image.
///
/// The worker reads the image path on its own line, then the rubric. Host
/// paths are rewritten to the path the worker sees through its volumes.
#[derive(Debug, Clone)]
pub struct PromptBuilder {
    rubric: String,
    launch: LaunchSpec,
}

impl PromptBuilder {
    pub fn new(rubric: impl Into<String>, launch: LaunchSpec) -> Self {
        Self {
            rubric: rubric.into(),
            launch,
        }
    }

    pub fn build(&self, image: &Path) -> String {
        let worker_path = self.launch.container_path(image);
        format!("{}\n{}\n", worker_path.display(), self.rubric)
    }
}
