use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeSettings {
    /// Directory module names are resolved against.
    pub base_path: PathBuf,
    /// Store file name, relative to `base_path`.
    pub data_file: String,
    pub source_ext: String,
    pub binary_ext: String,
    /// Keep state in `data_file`. Otherwise state lives in memory only.
    pub persistent: bool,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            base_path: PathBuf::from("."),
            data_file: "sl.data".into(),
            source_ext: ".sl".into(),
            binary_ext: ".sc".into(),
            persistent: true,
        }
    }
}

impl RuntimeSettings {
    pub fn with_base_path(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
            ..Self::default()
        }
    }

    pub fn in_memory() -> Self {
        Self {
            persistent: false,
            ..Self::default()
        }
    }

    pub fn data_path(&self) -> PathBuf {
        self.base_path.join(&self.data_file)
    }

    /// `<base>/a/b<ext>` for module `a.b`.
    pub fn module_path(&self, module: &str, ext: &str) -> PathBuf {
        let mut path = self.base_path.clone();
        for segment in module.trim_start_matches('.').split('.') {
            path.push(segment);
        }
        let mut file = path.into_os_string();
        file.push(ext);
        PathBuf::from(file)
    }

    /// Settings for running `script`: the base path is the script's
    /// directory.
    pub fn for_script(script: &Path) -> Self {
        let base = script
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or(Path::new("."));
        Self::with_base_path(base)
    }
}
