//! Concept definitions and their resolution into raw (path, prompt) entries

use serde::{Deserialize, Serialize};
use std::fs::{self, ReadDir};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::data::DataError;
use crate::error::{Error, Result};

/// Marker replaced by the set's base prompt
pub const PROMPT_MARKER: &str = "{PROMPT}";
/// Marker replaced by the sidecar file content
pub const TXT_PROMPT_MARKER: &str = "{TXT_PROMPT}";

fn default_template() -> String {
    format!("{}, {}", PROMPT_MARKER, TXT_PROMPT_MARKER)
}

/// A directory of images sharing a prompt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetSet {
    /// Directory holding the images and optional `.txt` sidecars
    pub path: PathBuf,
    /// Base prompt
    pub prompt: String,
    /// Combine the base prompt with each image's sidecar text
    #[serde(default)]
    pub combine_prompt_from_txt: bool,
    /// Template used when combining
    #[serde(default = "default_template")]
    pub prompt_combine_template: String,
}

impl DatasetSet {
    /// Create a set that uses `prompt` for every image
    pub fn new(path: impl Into<PathBuf>, prompt: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            prompt: prompt.into(),
            combine_prompt_from_txt: false,
            prompt_combine_template: default_template(),
        }
    }

    /// Combine the base prompt with sidecar text through `template`
    pub fn with_sidecar_template(mut self, template: impl Into<String>) -> Self {
        self.combine_prompt_from_txt = true;
        self.prompt_combine_template = template.into();
        self
    }

    /// Effective prompt for one image file.
    ///
    /// With combination on, the sidecar text is substituted as written except
    /// that trailing `\r` / `\n` characters are stripped, so an editor's final
    /// newline never reaches the tokenizer.
    pub fn prompt_for(&self, image_path: &Path) -> Result<String> {
        if !self.combine_prompt_from_txt {
            return Ok(self.prompt.clone());
        }

        let sidecar = image_path.with_extension("txt");
        let content = fs::read_to_string(&sidecar).map_err(|source| DataError::MissingSidecar {
            image: image_path.to_path_buf(),
            sidecar: sidecar.clone(),
            source,
        })?;
        let content = content.trim_end_matches(['\r', '\n']);

        Ok(combine_prompt(&self.prompt, content, &self.prompt_combine_template))
    }
}

/// A named training target
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Concept {
    /// Images of the subject being learned
    pub instance_set: DatasetSet,
    /// Regularization images; required by the paired dataset
    #[serde(default)]
    pub class_set: Option<DatasetSet>,
}

impl Concept {
    /// Concept without a class set
    pub fn new(instance_set: DatasetSet) -> Self {
        Self {
            instance_set,
            class_set: None,
        }
    }

    /// Attach a class set
    pub fn with_class_set(mut self, class_set: DatasetSet) -> Self {
        self.class_set = Some(class_set);
        self
    }

    /// Validate the concept definition
    pub fn validate(&self) -> Result<()> {
        let sets = std::iter::once(&self.instance_set).chain(self.class_set.as_ref());
        for set in sets {
            if set.path.as_os_str().is_empty() {
                return Err(Error::config("dataset set path is empty"));
            }
        }
        Ok(())
    }
}

/// Substitute `{PROMPT}` and then `{TXT_PROMPT}` in `template`
pub fn combine_prompt(prompt: &str, txt_prompt: &str, template: &str) -> String {
    template
        .replace(PROMPT_MARKER, prompt)
        .replace(TXT_PROMPT_MARKER, txt_prompt)
}

/// One resolved file with its effective prompt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEntry {
    /// Image file
    pub path: PathBuf,
    /// Effective prompt
    pub prompt: String,
}

/// Lazy iterator over the non-text files of a set's directory.
///
/// Directory order is filesystem dependent.
pub struct ResolvedSet<'a> {
    set: &'a DatasetSet,
    dir: ReadDir,
}

impl Iterator for ResolvedSet<'_> {
    type Item = Result<RawEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let entry = match self.dir.next()? {
                Ok(entry) => entry,
                Err(e) => return Some(Err(e.into())),
            };
            let path = entry.path();

            if !is_candidate(&path) {
                continue;
            }

            return Some(self.set.prompt_for(&path).map(|prompt| RawEntry { path, prompt }));
        }
    }
}

fn is_candidate(path: &Path) -> bool {
    path.is_file() && path.extension().and_then(|e| e.to_str()) != Some("txt")
}

/// Start resolving a set. Fails only if the directory cannot be read.
pub fn resolve_set(set: &DatasetSet) -> Result<ResolvedSet<'_>> {
    debug!("Resolving dataset set {:?}", set.path);
    let dir = fs::read_dir(&set.path).map_err(|source| DataError::DatasetNotFound {
        path: set.path.clone(),
        source,
    })?;
    Ok(ResolvedSet { set, dir })
}
