// SPDX-License-Identifier: CEPL-1.0
use std::fs;
use std::io::Cursor;
use std::path::Path;

use ash::util::read_spv;
use ash::vk;
use lumen_core::{Error, Result};
use tracing::debug;

use crate::vk_error::VkContext;

pub const VERTEX_SHADER_FILE: &str = "vert.spv";
pub const FRAGMENT_SHADER_FILE: &str = "frag.spv";

/// SPIR-V words for both stages, loaded once and kept so the pipeline can
/// be rebuilt without touching the disk again.
#[derive(Clone, Debug)]
pub struct ShaderSet {
    pub vertex: Vec<u32>,
    pub fragment: Vec<u32>,
}

impl ShaderSet {
    pub fn load(dir: &Path) -> Result<Self> {
        Ok(Self {
            vertex: load_spirv(&dir.join(VERTEX_SHADER_FILE))?,
            fragment: load_spirv(&dir.join(FRAGMENT_SHADER_FILE))?,
        })
    }
}

pub fn load_spirv(path: &Path) -> Result<Vec<u32>> {
    let bytes = fs::read(path).map_err(|e| Error::asset(path, format!("cannot read: {e}")))?;
    let words = decode_spirv(path, &bytes)?;
    debug!("shader {} ({} words)", path.display(), words.len());
    Ok(words)
}

fn decode_spirv(path: &Path, bytes: &[u8]) -> Result<Vec<u32>> {
    if bytes.is_empty() {
        return Err(Error::asset(path, "file is empty"));
    }
    if bytes.len() % 4 != 0 {
        return Err(Error::asset(
            path,
            format!("size {} is not a multiple of 4", bytes.len()),
        ));
    }
    read_spv(&mut Cursor::new(bytes)).map_err(|e| Error::asset(path, e.to_string()))
}

pub unsafe fn create_module(device: &ash::Device, words: &[u32]) -> Result<vk::ShaderModule> {
    let ci = vk::ShaderModuleCreateInfo {
        s_type: vk::StructureType::SHADER_MODULE_CREATE_INFO,
        code_size: words.len() * 4,
        p_code: words.as_ptr(),
        ..Default::default()
    };
    device
        .create_shader_module(&ci, None)
        .or_fail("vkCreateShaderModule")
}
