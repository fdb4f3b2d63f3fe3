//! SPIR-V bytecode loading.

use std::path::Path;

use tracing::debug;

use crate::error::{ResourceError, ResourceResult};

/// First word of every SPIR-V module.
pub const SPIRV_MAGIC: u32 = 0x0723_0203;

/// Reads a compiled shader and checks that it looks like SPIR-V.
pub fn load_spirv(path: impl AsRef<Path>) -> ResourceResult<Vec<u8>> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(ResourceError::FileNotFound(path.to_path_buf()));
    }

    let bytes = std::fs::read(path)?;
    validate_spirv(&bytes).map_err(|reason| ResourceError::InvalidSpirv {
        path: path.to_path_buf(),
        reason,
    })?;
    debug!(path = %path.display(), len = bytes.len(), "Loaded SPIR-V");
    Ok(bytes)
}

/// Checks length, alignment and the magic number (either byte order).
pub fn validate_spirv(bytes: &[u8]) -> Result<(), String> {
    if bytes.is_empty() {
        return Err("file is empty".to_string());
    }
    if bytes.len() % 4 != 0 {
        return Err(format!("length {} is not a multiple of 4", bytes.len()));
    }
    let first = [bytes[0], bytes[1], bytes[2], bytes[3]];
    if u32::from_le_bytes(first) != SPIRV_MAGIC && u32::from_be_bytes(first) != SPIRV_MAGIC {
        return Err(format!("bad magic number {:#010x}", u32::from_le_bytes(first)));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_spirv() {
        let mut module = SPIRV_MAGIC.to_le_bytes().to_vec();
        module.extend_from_slice(&[0; 16]);
        assert!(validate_spirv(&module).is_ok());

        assert!(validate_spirv(&[]).is_err());
        assert!(validate_spirv(&module[..6]).is_err());
        assert!(validate_spirv(&[1, 2, 3, 4]).is_err());
    }

    #[test]
    fn test_big_endian_magic_accepted() {
        assert!(validate_spirv(&SPIRV_MAGIC.to_be_bytes()).is_ok());
    }
}
