// Artifact bundle
//
// The compiled accessor classes that get uploaded into the target, read from
// a jar/zip archive or from a directory of class files.

use crate::config::NamingConfig;
use crate::error::{InjectError, InjectResult};
use std::ffi::OsStr;
use std::io::{Read, Seek};
use std::path::Path;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    /// Binary class name, e.g. `org.example.Foo$Bar`
    pub name: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, Default)]
pub struct ArtifactBundle {
    artifacts: Vec<Artifact>,
}

impl ArtifactBundle {
    pub fn new(artifacts: Vec<Artifact>) -> Self {
        Self { artifacts }
    }

    /// Load from a directory tree or, for any other path, a zip archive
    pub fn load(path: &Path) -> InjectResult<Self> {
        if path.is_dir() {
            Self::from_dir(path)
        } else {
            let file = std::fs::File::open(path)
                .map_err(|e| InjectError::Bundle(format!("{}: {}", path.display(), e)))?;
            Self::from_zip(file)
        }
    }

    pub fn from_zip<R: Read + Seek>(reader: R) -> InjectResult<Self> {
        let mut archive = zip::ZipArchive::new(reader)?;
        let mut artifacts = Vec::new();

        for i in 0..archive.len() {
            let mut file = archive.by_index(i)?;
            if !file.is_file() {
                continue;
            }
            let Some(name) = class_name_from_path(file.name()) else {
                continue;
            };

            let mut bytes = Vec::with_capacity(file.size() as usize);
            file.read_to_end(&mut bytes)
                .map_err(|e| InjectError::Bundle(format!("{}: {}", file.name(), e)))?;
            artifacts.push(Artifact { name, bytes });
        }

        debug!(count = artifacts.len(), "loaded artifact archive");
        Ok(Self { artifacts })
    }

    pub fn from_dir(dir: &Path) -> InjectResult<Self> {
        let mut files = Vec::new();
        for entry in walkdir::WalkDir::new(dir)
            .follow_links(false)
            .into_iter()
            .filter_map(Result::ok)
        {
            if !entry.file_type().is_file() {
                continue;
            }
            if entry.path().extension() != Some(OsStr::new("class")) {
                continue;
            }
            files.push(entry.into_path());
        }
        files.sort();

        let mut artifacts = Vec::with_capacity(files.len());
        for file in files {
            let rel = file.strip_prefix(dir).unwrap_or(&file);
            let rel = rel
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            let Some(name) = class_name_from_path(&rel) else {
                continue;
            };
            let bytes = std::fs::read(&file)
                .map_err(|e| InjectError::Bundle(format!("{}: {}", file.display(), e)))?;
            artifacts.push(Artifact { name, bytes });
        }

        debug!(count = artifacts.len(), dir = %dir.display(), "loaded artifact directory");
        Ok(Self { artifacts })
    }

    pub fn artifacts(&self) -> &[Artifact] {
        &self.artifacts
    }

    pub fn is_empty(&self) -> bool {
        self.artifacts.is_empty()
    }

    /// The entry class: first accessor-named artifact that is not the loader
    pub fn accessor(&self, naming: &NamingConfig) -> Option<&Artifact> {
        self.artifacts
            .iter()
            .find(|a| !naming.is_bootstrap_loader(&a.name) && naming.is_accessor(&a.name))
    }

    pub fn bootstrap_loader(&self, naming: &NamingConfig) -> Option<&Artifact> {
        self.artifacts
            .iter()
            .find(|a| naming.is_bootstrap_loader(&a.name))
    }

    /// Everything defined through the resolved loader
    pub fn uploadable<'a>(
        &'a self,
        naming: &'a NamingConfig,
    ) -> impl Iterator<Item = &'a Artifact> + 'a {
        self.artifacts
            .iter()
            .filter(move |a| !naming.is_bootstrap_loader(&a.name))
    }
}

/// `a/b/C$D.class` -> `a.b.C$D`; `None` for anything that is not a class file
fn class_name_from_path(path: &str) -> Option<String> {
    let stem = path.strip_suffix(".class")?;
    if stem.is_empty() || stem.starts_with("META-INF/") || stem.ends_with("module-info") {
        return None;
    }
    Some(stem.replace('/', "."))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use zip::write::FileOptions;

    #[test]
    fn test_class_names_from_paths() {
        assert_eq!(class_name_from_path("a/b/C$D.class").as_deref(), Some("a.b.C$D"));
        assert_eq!(class_name_from_path("Top.class").as_deref(), Some("Top"));
        assert_eq!(class_name_from_path("module-info.class"), None);
        assert_eq!(class_name_from_path("META-INF/MANIFEST.MF"), None);
        assert_eq!(class_name_from_path("a/b/readme.txt"), None);
    }

    #[test]
    fn test_load_zip_archive() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("accessor.jar");

        let file = std::fs::File::create(&path).unwrap();
        let mut zip = zip::ZipWriter::new(file);
        let options = FileOptions::default();
        zip.start_file("META-INF/MANIFEST.MF", options).unwrap();
        zip.write_all(b"Manifest-Version: 1.0\n").unwrap();
        zip.start_file("org/example/GuestAccessor.class", options).unwrap();
        zip.write_all(&[0xCA, 0xFE, 0xBA, 0xBE]).unwrap();
        zip.start_file("org/example/GuestAccessor$1.class", options).unwrap();
        zip.write_all(&[1]).unwrap();
        zip.start_file("org/example/GuestDebugClassLoader.class", options).unwrap();
        zip.write_all(&[2]).unwrap();
        zip.finish().unwrap();

        let bundle = ArtifactBundle::load(&path).unwrap();
        let naming = NamingConfig::default();

        assert_eq!(bundle.artifacts().len(), 3);
        let accessor = bundle.accessor(&naming).unwrap();
        assert_eq!(accessor.name, "org.example.GuestAccessor");
        assert_eq!(accessor.bytes, vec![0xCA, 0xFE, 0xBA, 0xBE]);
        assert_eq!(
            bundle.bootstrap_loader(&naming).unwrap().name,
            "org.example.GuestDebugClassLoader"
        );
        let uploadable: Vec<_> = bundle.uploadable(&naming).map(|a| a.name.as_str()).collect();
        assert_eq!(
            uploadable,
            vec!["org.example.GuestAccessor", "org.example.GuestAccessor$1"]
        );
    }

    #[test]
    fn test_load_class_directory() {
        let dir = tempfile::tempdir().unwrap();
        let pkg = dir.path().join("org").join("example");
        std::fs::create_dir_all(&pkg).unwrap();
        std::fs::write(pkg.join("Helper.class"), [3]).unwrap();
        std::fs::write(pkg.join("GuestAccessor.class"), [4]).unwrap();
        std::fs::write(pkg.join("notes.txt"), b"skip").unwrap();

        let bundle = ArtifactBundle::load(dir.path()).unwrap();
        let names: Vec<_> = bundle.artifacts().iter().map(|a| a.name.as_str()).collect();

        assert_eq!(names, vec!["org.example.GuestAccessor", "org.example.Helper"]);
        assert!(bundle.bootstrap_loader(&NamingConfig::default()).is_none());
    }

    #[test]
    fn test_missing_archive_is_a_bundle_error() {
        let err = ArtifactBundle::load(Path::new("/nonexistent/accessor.jar")).unwrap_err();
        assert!(matches!(err, InjectError::Bundle(_)));
    }
}
