//! Platform shader compiler
//!
//! The effect compiler feeds generated target-language source through a
//! [`ShaderCompiler`] acquired lazily from an ordered list of loaders: the
//! primary compiler is tried first, then an older compatible fallback. A
//! compiler that cannot be acquired at all is a fatal, user-visible error
//! for every subsequent effect load until the process restarts.
//!
//! The stock implementation drives naga's WGSL front-end; its diagnostics
//! are captured verbatim, and a canonicalized WGSL listing stands in for a
//! disassembly.

use prism_fx::ShaderStage;

/// Target profile, picked from the device feature level
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShaderProfile {
    /// Reduced profile for compatibility feature levels
    Compat,
    /// Baseline profile
    Standard,
    /// Full profile
    Extended,
}

impl ShaderProfile {
    pub fn for_feature_level(level: crate::device::FeatureLevel) -> Self {
        match level {
            crate::device::FeatureLevel::Compat => ShaderProfile::Compat,
            crate::device::FeatureLevel::Core => ShaderProfile::Standard,
            crate::device::FeatureLevel::Extended => ShaderProfile::Extended,
        }
    }
}

/// A single compiled entry point ready for the device
#[derive(Debug, Clone)]
pub struct CompiledShader {
    pub entry_point: String,
    pub stage: ShaderStage,
    /// Validated target-language source the backend consumes
    pub source: String,
}

/// Outcome of compiling one entry point
///
/// `log` carries compiler diagnostics verbatim, including warnings produced
/// on success; it is appended to the effect's error log either way.
pub struct CompileOutput {
    pub shader: Option<CompiledShader>,
    pub log: String,
}

pub trait ShaderCompiler {
    /// Compile `entry_point` from `source` at the given target profile
    fn compile(
        &self,
        source: &str,
        entry_point: &str,
        stage: ShaderStage,
        profile: ShaderProfile,
    ) -> CompileOutput;

    /// Human-readable listing of the compiled shader, if the compiler can
    /// produce one
    fn disassemble(&self, shader: &CompiledShader) -> Option<String>;
}

/// Locates and instantiates a [`ShaderCompiler`]
pub trait ShaderCompilerLoader {
    fn name(&self) -> &str;
    fn load(&self) -> Option<Box<dyn ShaderCompiler>>;
}

/// WGSL compiler backed by naga's front-end and validator
pub struct WgslCompiler;

impl ShaderCompiler for WgslCompiler {
    fn compile(
        &self,
        source: &str,
        entry_point: &str,
        stage: ShaderStage,
        _profile: ShaderProfile,
    ) -> CompileOutput {
        let module = match naga::front::wgsl::parse_str(source) {
            Ok(module) => module,
            Err(err) => {
                return CompileOutput {
                    shader: None,
                    log: err.emit_to_string(source),
                };
            }
        };

        let expected_stage = match stage {
            ShaderStage::Vertex => naga::ShaderStage::Vertex,
            ShaderStage::Pixel => naga::ShaderStage::Fragment,
        };
        let found = module
            .entry_points
            .iter()
            .any(|ep| ep.name == entry_point && ep.stage == expected_stage);
        if !found {
            return CompileOutput {
                shader: None,
                log: format!("error: entry point '{entry_point}' not found in generated source\n"),
            };
        }

        let mut validator = naga::valid::Validator::new(
            naga::valid::ValidationFlags::all(),
            naga::valid::Capabilities::all(),
        );
        if let Err(err) = validator.validate(&module) {
            return CompileOutput {
                shader: None,
                log: err.emit_to_string(source),
            };
        }

        CompileOutput {
            shader: Some(CompiledShader {
                entry_point: entry_point.to_string(),
                stage,
                source: source.to_string(),
            }),
            log: String::new(),
        }
    }

    fn disassemble(&self, shader: &CompiledShader) -> Option<String> {
        let module = naga::front::wgsl::parse_str(&shader.source).ok()?;
        let mut validator = naga::valid::Validator::new(
            naga::valid::ValidationFlags::all(),
            naga::valid::Capabilities::all(),
        );
        let info = validator.validate(&module).ok()?;
        naga::back::wgsl::write_string(&module, &info, naga::back::wgsl::WriterFlags::EXPLICIT_TYPES)
            .ok()
    }
}

/// Loader for the stock WGSL compiler
pub struct WgslCompilerLoader;

impl ShaderCompilerLoader for WgslCompilerLoader {
    fn name(&self) -> &str {
        "wgsl"
    }

    fn load(&self) -> Option<Box<dyn ShaderCompiler>> {
        Some(Box::new(WgslCompiler))
    }
}

enum CellState {
    NotLoaded(Vec<Box<dyn ShaderCompilerLoader>>),
    Ready(Box<dyn ShaderCompiler>),
    Missing,
}

/// Lazily acquired compiler with primary/fallback loaders and a sticky
/// "missing" state
pub struct CompilerCell {
    state: CellState,
}

impl CompilerCell {
    pub fn new(loaders: Vec<Box<dyn ShaderCompilerLoader>>) -> Self {
        Self {
            state: CellState::NotLoaded(loaders),
        }
    }

    /// Cell with the stock WGSL compiler as the only loader
    pub fn with_default_loaders() -> Self {
        Self::new(vec![Box::new(WgslCompilerLoader)])
    }

    /// Acquire the compiler, loading it on first use
    pub fn acquire(&mut self) -> Option<&dyn ShaderCompiler> {
        if let CellState::NotLoaded(_) = self.state {
            let CellState::NotLoaded(loaders) =
                std::mem::replace(&mut self.state, CellState::Missing)
            else {
                unreachable!()
            };

            for loader in &loaders {
                if let Some(compiler) = loader.load() {
                    log::info!("Loaded shader compiler '{}'", loader.name());
                    self.state = CellState::Ready(compiler);
                    break;
                }
                log::warn!("Shader compiler '{}' is unavailable", loader.name());
            }
        }

        match &self.state {
            CellState::Ready(compiler) => Some(compiler.as_ref()),
            CellState::Missing => {
                log::error!(
                    "Unable to load a shader compiler. Effects cannot be compiled until the \
                     dependency is installed and the process restarts."
                );
                None
            }
            CellState::NotLoaded(_) => unreachable!(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VALID_WGSL: &str = r#"
@vertex
fn vs_main(@builtin(vertex_index) vertex_index: u32) -> @builtin(position) vec4<f32> {
    let x = f32(i32(vertex_index & 1u)) * 4.0 - 1.0;
    let y = f32(i32(vertex_index >> 1u)) * 4.0 - 1.0;
    return vec4<f32>(x, y, 0.0, 1.0);
}

@fragment
fn fs_main() -> @location(0) vec4<f32> {
    return vec4<f32>(1.0, 0.0, 1.0, 1.0);
}
"#;

    #[test]
    fn test_compile_valid_entry_points() {
        let compiler = WgslCompiler;
        let vs = compiler.compile(VALID_WGSL, "vs_main", ShaderStage::Vertex, ShaderProfile::Standard);
        assert!(vs.shader.is_some());
        assert!(vs.log.is_empty());

        let ps = compiler.compile(VALID_WGSL, "fs_main", ShaderStage::Pixel, ShaderProfile::Standard);
        assert!(ps.shader.is_some());
    }

    #[test]
    fn test_missing_entry_point_fails() {
        let compiler = WgslCompiler;
        let out = compiler.compile(VALID_WGSL, "nope", ShaderStage::Pixel, ShaderProfile::Standard);
        assert!(out.shader.is_none());
        assert!(out.log.contains("nope"));
    }

    #[test]
    fn test_wrong_stage_fails() {
        let compiler = WgslCompiler;
        let out = compiler.compile(VALID_WGSL, "vs_main", ShaderStage::Pixel, ShaderProfile::Standard);
        assert!(out.shader.is_none());
    }

    #[test]
    fn test_parse_error_is_captured() {
        let compiler = WgslCompiler;
        let out = compiler.compile("fn {", "vs_main", ShaderStage::Vertex, ShaderProfile::Standard);
        assert!(out.shader.is_none());
        assert!(!out.log.is_empty());
    }

    #[test]
    fn test_disassembly_roundtrip() {
        let compiler = WgslCompiler;
        let out = compiler.compile(VALID_WGSL, "fs_main", ShaderStage::Pixel, ShaderProfile::Standard);
        let asm = compiler.disassemble(&out.shader.unwrap());
        assert!(asm.is_some());
        assert!(asm.unwrap().contains("fs_main"));
    }

    struct FailingLoader;
    impl ShaderCompilerLoader for FailingLoader {
        fn name(&self) -> &str {
            "missing"
        }
        fn load(&self) -> Option<Box<dyn ShaderCompiler>> {
            None
        }
    }

    #[test]
    fn test_missing_compiler_is_sticky() {
        let mut cell = CompilerCell::new(vec![Box::new(FailingLoader)]);
        assert!(cell.acquire().is_none());
        assert!(cell.acquire().is_none());
    }

    #[test]
    fn test_fallback_loader_is_used() {
        let mut cell = CompilerCell::new(vec![Box::new(FailingLoader), Box::new(WgslCompilerLoader)]);
        assert!(cell.acquire().is_some());
    }
}
