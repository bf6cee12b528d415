use serde::Serialize;
use std::io;
use std::path::Path;

/// Write bytes through a sibling temp file and rename into place.
///
/// A crash mid-write leaves either no file or the `.part` file, never a
/// truncated artifact under the final name.
pub fn write_bytes_atomic(path: &Path, bytes: &[u8]) -> Result<u64, io::Error> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(".part");
    let tmp = std::path::PathBuf::from(tmp_name);

    std::fs::write(&tmp, bytes)?;
    std::fs::rename(&tmp, path)?;
    Ok(bytes.len() as u64)
}

pub fn write_json_pretty<T: Serialize>(path: &Path, value: &T) -> Result<(), io::Error> {
    let json = serde_json::to_string_pretty(value)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    write_bytes_atomic(path, json.as_bytes())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test::temp_dir;

    #[test]
    fn write_bytes_atomic_creates_parent_dir() {
        let path = temp_dir("persist-nested").join("a").join("b.bin");
        let written = write_bytes_atomic(&path, b"payload").unwrap();
        assert_eq!(written, 7);
        assert_eq!(std::fs::read(&path).unwrap(), b"payload");
    }

    #[test]
    fn write_bytes_atomic_leaves_no_part_file() {
        let dir = temp_dir("persist-part");
        let path = dir.join("export.xml");
        write_bytes_atomic(&path, b"<config/>").unwrap();

        let names: Vec<String> = std::fs::read_dir(&dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["export.xml".to_string()]);
    }

    #[test]
    fn write_json_pretty_fails_on_directory_path() {
        let dir = temp_dir("persist-dir");
        let result = write_json_pretty(&dir, &vec!["a"]);
        assert!(result.is_err());
    }
}
