// src/backup/manifest.rs
//
// Per-project backup manifests: one `{requestor}_{project}` text
// file per (requestor, project) pair, opened lazily on the first
// matching record. Each line is the quoted path.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::error::{MultiError, Result};
use crate::util::quote;

pub struct ManifestWriter {
    dir: PathBuf,
    files: HashMap<String, BufWriter<File>>,
}

impl ManifestWriter {
    pub fn new(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        Ok(Self {
            dir: dir.to_path_buf(),
            files: HashMap::new(),
        })
    }

    pub fn write(&mut self, requestor: &str, project: &str, path: &[u8]) -> Result<()> {
        let key = format!("{requestor}_{project}");
        let writer = match self.files.get_mut(&key) {
            Some(w) => w,
            None => {
                let file = File::create(self.dir.join(&key))?;
                self.files.entry(key).or_insert(BufWriter::new(file))
            }
        };

        let mut line = quote::quote(path);
        line.push(b'\n');
        writer.write_all(&line)?;
        Ok(())
    }

    /// Flush and close every open manifest, aggregating failures.
    pub fn close(&mut self) -> Result<()> {
        let mut errors = MultiError::default();
        for (_, mut writer) in self.files.drain() {
            if let Err(e) = writer.flush() {
                errors.push(e.into());
            }
        }
        errors.into_result()
    }

    /// Names of the manifests opened so far, sorted.
    pub fn manifest_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.files.keys().cloned().collect();
        names.sort();
        names
    }
}

impl Drop for ManifestWriter {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn writes_quoted_lines_per_project_file() {
        let tmp = tempdir().unwrap();
        let mut manifests = ManifestWriter::new(tmp.path()).unwrap();

        manifests
            .write("user3", "projectB", b"/mnt/data/stuff/file")
            .unwrap();
        manifests
            .write("user3", "projectB", b"/mnt/data/more")
            .unwrap();
        manifests.write("ana", "projA", b"/other/x").unwrap();
        assert_eq!(manifests.manifest_names(), vec!["ana_projA", "user3_projectB"]);
        manifests.close().unwrap();

        let content = std::fs::read_to_string(tmp.path().join("user3_projectB")).unwrap();
        assert_eq!(content, "\"/mnt/data/stuff/file\"\n\"/mnt/data/more\"\n");

        let content = std::fs::read_to_string(tmp.path().join("ana_projA")).unwrap();
        assert_eq!(content, "\"/other/x\"\n");
    }

    #[test]
    fn escapes_awkward_bytes() {
        let tmp = tempdir().unwrap();
        let mut manifests = ManifestWriter::new(tmp.path()).unwrap();
        manifests
            .write("u", "p", &[b'/', b'a', b'"', 0xff, b'\n', b'b'])
            .unwrap();
        manifests.close().unwrap();

        let content = std::fs::read(tmp.path().join("u_p")).unwrap();
        assert_eq!(content, b"\"/a\\\"\\xff\\nb\"\n");
    }

    #[test]
    fn no_files_until_first_write() {
        let tmp = tempdir().unwrap();
        let manifests = ManifestWriter::new(tmp.path()).unwrap();
        assert!(manifests.manifest_names().is_empty());
        drop(manifests);
        assert_eq!(std::fs::read_dir(tmp.path()).unwrap().count(), 0);
    }
}
