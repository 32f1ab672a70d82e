//! Compiled shader stages, include expansion and file loading.

use std::fmt;
use std::fs;
use std::path::Path;
use std::rc::{Rc, Weak};

use rustc_hash::FxHashMap;

use crate::device::{Device, ShaderStage};
use crate::error::{Error, Result};
use crate::notify::{ChangeListener, Listeners};

/// Maximum nesting of `#include` directives.
const MAX_INCLUDE_DEPTH: usize = 16;

/// Named source strings available to `#include "<name>"` directives.
///
/// Names are conventionally absolute paths such as
/// `/transparency/hybrid.glsl`. Expansion happens on the host before the
/// source reaches the driver, so no shading-language include extension is
/// needed.
#[derive(Debug, Clone, Default)]
pub struct NamedStrings {
    strings: FxHashMap<String, String>,
}

impl NamedStrings {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) a named string.
    pub fn insert(&mut self, name: impl Into<String>, source: impl Into<String>) {
        self.strings.insert(name.into(), source.into());
    }

    /// Look up a named string.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.strings.get(name).map(String::as_str)
    }

    /// Expand every `#include "<name>"` line in `source`.
    ///
    /// # Errors
    ///
    /// Fails on a name that is not registered, or when includes nest deeper
    /// than the preprocessor allows (which also catches include cycles).
    pub fn expand(&self, source: &str) -> Result<String> {
        let mut out = String::with_capacity(source.len());
        self.expand_into(source, 0, &mut out)?;
        Ok(out)
    }

    fn expand_into(&self, source: &str, depth: usize, out: &mut String) -> Result<()> {
        for line in source.lines() {
            match include_target(line) {
                Some(name) => {
                    if depth >= MAX_INCLUDE_DEPTH {
                        return Err(Error::IncludeDepth(name.to_owned()));
                    }
                    let included = self
                        .get(name)
                        .ok_or_else(|| Error::UnresolvedInclude(name.to_owned()))?;
                    self.expand_into(included, depth + 1, out)?;
                }
                None => {
                    out.push_str(line);
                    out.push('\n');
                }
            }
        }
        Ok(())
    }
}

/// Parse `#include "name"` (whitespace tolerant). `None` for any other line.
fn include_target(line: &str) -> Option<&str> {
    let rest = line.trim_start().strip_prefix('#')?.trim_start();
    let rest = rest.strip_prefix("include")?.trim();
    rest.strip_prefix('"')?.strip_suffix('"')
}

/// Read a shader source file.
///
/// # Errors
///
/// Returns [`Error::ShaderIo`] naming the path if the file can't be read.
pub fn read_source(path: &Path) -> Result<String> {
    fs::read_to_string(path).map_err(|source| Error::ShaderIo {
        path: path.to_owned(),
        source,
    })
}

/// A compiled shader stage.
///
/// Programs that attach the shader register themselves as listeners, so
/// replacing the source with [`set_source`](Self::set_source) marks every such
/// program for relinking.
pub struct Shader<D: Device> {
    device: Rc<D>,
    handle: D::Shader,
    stage: ShaderStage,
    listeners: Listeners,
}

impl<D: Device> Shader<D> {
    /// Compile `source` (after include expansion) as `stage`.
    ///
    /// # Errors
    ///
    /// Fails on include resolution or compilation errors.
    pub fn from_source(
        device: &Rc<D>,
        stage: ShaderStage,
        source: &str,
        named: &NamedStrings,
    ) -> Result<Rc<Self>> {
        let expanded = named.expand(source)?;
        let handle = device.create_shader(stage, &expanded)?;
        Ok(Rc::new(Self {
            device: Rc::clone(device),
            handle,
            stage,
            listeners: Listeners::new(),
        }))
    }

    /// Load and compile a shader file as `stage`.
    ///
    /// # Errors
    ///
    /// Fails if the file can't be read, or on include or compilation errors.
    pub fn from_file(
        device: &Rc<D>,
        stage: ShaderStage,
        path: impl AsRef<Path>,
        named: &NamedStrings,
    ) -> Result<Rc<Self>> {
        let path = path.as_ref();
        log::debug!("loading {stage} shader from {}", path.display());
        Self::from_source(device, stage, &read_source(path)?, named)
    }

    /// Replace the source and recompile, then notify attached programs.
    ///
    /// # Errors
    ///
    /// Fails on include or compilation errors; listeners are not notified
    /// in that case.
    pub fn set_source(&self, source: &str, named: &NamedStrings) -> Result<()> {
        let expanded = named.expand(source)?;
        self.device
            .recompile_shader(self.handle, self.stage, &expanded)?;
        self.listeners.notify();
        Ok(())
    }

    /// The native handle.
    #[must_use]
    pub fn handle(&self) -> D::Shader {
        self.handle
    }

    /// The stage this shader was compiled for.
    #[must_use]
    pub fn stage(&self) -> ShaderStage {
        self.stage
    }

    /// Register a listener notified whenever the source changes.
    pub fn register_listener(&self, listener: Weak<dyn ChangeListener>) {
        self.listeners.register(listener);
    }

    /// Remove a listener. Returns whether it was registered.
    pub fn deregister_listener(&self, listener: &Weak<dyn ChangeListener>) -> bool {
        self.listeners.deregister(listener)
    }

    /// Number of live listeners.
    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }
}

impl<D: Device> fmt::Debug for Shader<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Shader")
            .field("handle", &self.handle)
            .field("stage", &self.stage)
            .finish_non_exhaustive()
    }
}

impl<D: Device> Drop for Shader<D> {
    fn drop(&mut self) {
        self.device.delete_shader(self.handle);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn include_target_parses_directive() {
        assert_eq!(include_target("#include \"/a/b.glsl\""), Some("/a/b.glsl"));
        assert_eq!(include_target("  #  include   \"x\"  "), Some("x"));
        assert_eq!(include_target("#version 430 core"), None);
        assert_eq!(include_target("// #include \"x\""), None);
    }

    #[test]
    fn expand_resolves_nested_includes() {
        let mut named = NamedStrings::new();
        named.insert("/defs", "#define K 4");
        named.insert("/common", "#include \"/defs\"\nint k() { return K; }");

        let out = named
            .expand("#version 430 core\n#include \"/common\"\nvoid main() {}")
            .unwrap();

        assert_eq!(
            out,
            "#version 430 core\n#define K 4\nint k() { return K; }\nvoid main() {}\n"
        );
    }

    #[test]
    fn expand_rejects_unknown_include() {
        let named = NamedStrings::new();
        let err = named.expand("#include \"/missing\"").unwrap_err();
        assert!(matches!(err, Error::UnresolvedInclude(name) if name == "/missing"));
    }

    #[test]
    fn expand_rejects_include_cycle() {
        let mut named = NamedStrings::new();
        named.insert("/a", "#include \"/b\"");
        named.insert("/b", "#include \"/a\"");
        assert!(matches!(named.expand("#include \"/a\""), Err(Error::IncludeDepth(_))));
    }

    #[test]
    fn read_source_reports_path() {
        let err = read_source(Path::new("/nonexistent/hybrid_post.frag")).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/hybrid_post.frag"));
    }
}
