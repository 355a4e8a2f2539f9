// SPDX-License-Identifier: CEPL-1.0
//! GLSL compiled to SPIR-V at startup with shaderc.
use anyhow::{Context, Result};
use ash::vk;
use std::path::{Path, PathBuf};
use tracing::debug;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ShaderStage {
    Vertex,
    Fragment,
}

impl ShaderStage {
    /// Stage implied by a `.vert` / `.frag` file extension.
    pub fn from_path(path: &Path) -> Option<Self> {
        match path.extension()?.to_str()? {
            "vert" => Some(ShaderStage::Vertex),
            "frag" => Some(ShaderStage::Fragment),
            _ => None,
        }
    }

    pub fn vk_stage(self) -> vk::ShaderStageFlags {
        match self {
            ShaderStage::Vertex => vk::ShaderStageFlags::VERTEX,
            ShaderStage::Fragment => vk::ShaderStageFlags::FRAGMENT,
        }
    }

    fn kind(self) -> shaderc::ShaderKind {
        match self {
            ShaderStage::Vertex => shaderc::ShaderKind::Vertex,
            ShaderStage::Fragment => shaderc::ShaderKind::Fragment,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CompileError {
    #[error("failed to read shader {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("shaderc unavailable: {0}")]
    Compiler(String),
    #[error("{stage:?} shader {path} failed to compile:\n{message}")]
    Compile {
        path: PathBuf,
        stage: ShaderStage,
        message: String,
    },
}

pub struct ShaderCompiler {
    compiler: shaderc::Compiler,
    options: shaderc::CompileOptions<'static>,
}

impl ShaderCompiler {
    pub fn new() -> Result<Self, CompileError> {
        let compiler =
            shaderc::Compiler::new().map_err(|e| CompileError::Compiler(e.to_string()))?;
        let mut options =
            shaderc::CompileOptions::new().map_err(|e| CompileError::Compiler(e.to_string()))?;
        options.set_target_env(
            shaderc::TargetEnv::Vulkan,
            shaderc::EnvVersion::Vulkan1_0 as u32,
        );
        options.set_optimization_level(shaderc::OptimizationLevel::Performance);
        Ok(Self { compiler, options })
    }

    pub fn compile_source(
        &self,
        stage: ShaderStage,
        source: &str,
        name: &Path,
    ) -> Result<Vec<u32>, CompileError> {
        let artifact = self
            .compiler
            .compile_into_spirv(
                source,
                stage.kind(),
                &name.to_string_lossy(),
                "main",
                Some(&self.options),
            )
            .map_err(|e| CompileError::Compile {
                path: name.to_path_buf(),
                stage,
                message: e.to_string(),
            })?;
        if artifact.get_num_warnings() > 0 {
            debug!("shader {}: {}", name.display(), artifact.get_warning_messages());
        }
        Ok(artifact.as_binary().to_vec())
    }

    pub fn compile_file(&self, stage: ShaderStage, path: &Path) -> Result<Vec<u32>, CompileError> {
        let source = std::fs::read_to_string(path).map_err(|source| CompileError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        self.compile_source(stage, &source, path)
    }

    /// Compile `path` and wrap the SPIR-V in a module for `device`.
    pub fn load_module(
        &self,
        device: &ash::Device,
        stage: ShaderStage,
        path: &Path,
    ) -> Result<ShaderModule> {
        let words = self.compile_file(stage, path)?;
        ShaderModule::from_spirv(device, stage, &words)
            .with_context(|| format!("shader module {}", path.display()))
    }
}

pub struct ShaderModule {
    device: ash::Device,
    pub handle: vk::ShaderModule,
    pub stage: ShaderStage,
}

impl ShaderModule {
    pub fn from_spirv(device: &ash::Device, stage: ShaderStage, words: &[u32]) -> Result<Self> {
        let ci = vk::ShaderModuleCreateInfo {
            s_type: vk::StructureType::SHADER_MODULE_CREATE_INFO,
            code_size: std::mem::size_of_val(words),
            p_code: words.as_ptr(),
            ..Default::default()
        };
        let handle = unsafe { device.create_shader_module(&ci, None) }?;
        Ok(Self {
            device: device.clone(),
            handle,
            stage,
        })
    }
}

impl Drop for ShaderModule {
    fn drop(&mut self) {
        unsafe { self.device.destroy_shader_module(self.handle, None) };
    }
}

/// Vertex + fragment modules for one pipeline.
pub struct ShaderPair {
    pub vertex: ShaderModule,
    pub fragment: ShaderModule,
}

impl ShaderPair {
    /// Load `<dir>/<name>.vert` and `<dir>/<name>.frag`.
    pub fn load(
        compiler: &ShaderCompiler,
        device: &ash::Device,
        dir: &Path,
        name: &str,
    ) -> Result<Self> {
        let vert = dir.join(format!("{name}.vert"));
        let frag = dir.join(format!("{name}.frag"));
        Ok(Self {
            vertex: compiler.load_module(device, ShaderStage::Vertex, &vert)?,
            fragment: compiler.load_module(device, ShaderStage::Fragment, &frag)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_from_extension() {
        assert_eq!(
            ShaderStage::from_path(Path::new("shaders/test.vert")),
            Some(ShaderStage::Vertex)
        );
        assert_eq!(
            ShaderStage::from_path(Path::new("skybox.frag")),
            Some(ShaderStage::Fragment)
        );
        assert_eq!(ShaderStage::from_path(Path::new("skybox.glsl")), None);
        assert_eq!(ShaderStage::from_path(Path::new("noext")), None);
    }

    #[test]
    fn missing_file_is_io_error() {
        let compiler = ShaderCompiler::new().expect("shaderc");
        let err = compiler
            .compile_file(ShaderStage::Vertex, Path::new("does/not/exist.vert"))
            .expect_err("missing");
        assert!(matches!(err, CompileError::Io { .. }));
    }

    #[test]
    fn compiles_minimal_vertex_shader() {
        let compiler = ShaderCompiler::new().expect("shaderc");
        let src = "#version 450\nvoid main() { gl_Position = vec4(0.0); }\n";
        let words = compiler
            .compile_source(ShaderStage::Vertex, src, Path::new("inline.vert"))
            .expect("compile");
        assert_eq!(words[0], 0x0723_0203); // SPIR-V magic
    }

    #[test]
    fn syntax_errors_carry_diagnostics() {
        let compiler = ShaderCompiler::new().expect("shaderc");
        let err = compiler
            .compile_source(
                ShaderStage::Fragment,
                "#version 450\nvoid main() { nope }\n",
                Path::new("broken.frag"),
            )
            .expect_err("should fail");
        match err {
            CompileError::Compile { stage, message, .. } => {
                assert_eq!(stage, ShaderStage::Fragment);
                assert!(!message.is_empty());
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn shipped_shaders_compile() {
        let compiler = ShaderCompiler::new().expect("shaderc");
        let dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("../../shaders");
        for name in ["test.vert", "test.frag", "skybox.vert", "skybox.frag"] {
            let path = dir.join(name);
            let stage = ShaderStage::from_path(&path).expect("stage");
            compiler
                .compile_file(stage, &path)
                .unwrap_or_else(|e| panic!("{e}"));
        }
    }
}
