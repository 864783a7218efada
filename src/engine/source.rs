//! ### English
//! Source file loading for the decode producer.
//!
//! ### 中文
//! 解码生产者的源文件读取。

use std::path::Path;

use crate::engine::error::FileError;

/// ### English
/// Reads a whole source file, attaching the path to any failure.
///
/// ### 中文
/// 读取整个源文件，失败时附带路径。
pub fn read_all(path: &Path) -> Result<Vec<u8>, FileError> {
    std::fs::read(path).map_err(|source| FileError {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_files_report_their_path() {
        let err = read_all(Path::new("/nonexistent/dmatex-source.jpg")).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/dmatex-source.jpg"));
    }
}
