//! WGSL sources for every stage.
//!
//! Stage shaders share the declarations in `common.wgsl`; the sort shader is
//! self-contained because it binds the pair buffers instead.

use std::borrow::Cow;
use std::path::PathBuf;

use crate::stage::Stage;

const COMMON: &str = include_str!("shaders/common.wgsl");

/// Source of WGSL programs.
pub trait ShaderLoader {
    /// Complete WGSL module for `stage`, or `None` when unavailable.
    fn load_source(&self, stage: Stage) -> Option<Cow<'static, str>>;
}

/// File stem of the WGSL module implementing `stage`.
pub fn shader_file(stage: Stage) -> &'static str {
    match stage {
        Stage::HashCells => "hash_cells",
        Stage::Sort => "sort",
        Stage::BuildOffsets => "build_offsets",
        Stage::Density => "density",
        Stage::Force => "force",
        Stage::IntegrateEuler | Stage::LeapfrogHalf | Stage::LeapfrogFull => "integrate",
    }
}

fn needs_common(stage: Stage) -> bool {
    stage != Stage::Sort
}

/// Shaders compiled into the crate.
#[derive(Debug, Clone, Copy, Default)]
pub struct EmbeddedShaders;

impl ShaderLoader for EmbeddedShaders {
    fn load_source(&self, stage: Stage) -> Option<Cow<'static, str>> {
        let body = match stage {
            Stage::HashCells => include_str!("shaders/hash_cells.wgsl"),
            Stage::Sort => return Some(Cow::Borrowed(include_str!("shaders/sort.wgsl"))),
            Stage::BuildOffsets => include_str!("shaders/build_offsets.wgsl"),
            Stage::Density => include_str!("shaders/density.wgsl"),
            Stage::Force => include_str!("shaders/force.wgsl"),
            Stage::IntegrateEuler | Stage::LeapfrogHalf | Stage::LeapfrogFull => {
                include_str!("shaders/integrate.wgsl")
            }
        };
        Some(Cow::Owned(format!("{COMMON}\n{body}")))
    }
}

/// Shaders read from `<root>/<stage file>.wgsl` at setup time.
///
/// `common.wgsl` is taken from the same directory when present, otherwise the
/// embedded copy is used.
#[derive(Debug, Clone)]
pub struct ShaderDirectory {
    root: PathBuf,
}

impl ShaderDirectory {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl ShaderLoader for ShaderDirectory {
    fn load_source(&self, stage: Stage) -> Option<Cow<'static, str>> {
        let path = self.root.join(format!("{}.wgsl", shader_file(stage)));
        let body = match std::fs::read_to_string(&path) {
            Ok(body) => body,
            Err(e) => {
                tracing::warn!(stage = %stage, path = %path.display(), "cannot read shader: {e}");
                return None;
            }
        };
        if !needs_common(stage) {
            return Some(Cow::Owned(body));
        }
        let common = std::fs::read_to_string(self.root.join("common.wgsl"))
            .unwrap_or_else(|_| COMMON.to_string());
        Some(Cow::Owned(format!("{common}\n{body}")))
    }
}
