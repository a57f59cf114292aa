use std::collections::HashMap;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};

use crate::steps::{host_platform, InstallStep, StepAction};

/// A complete package definition, parsed from a TOML document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PackageDef {
    pub name: String,
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub homepage: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub license: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub provides: Vec<String>,

    pub source: Source,
    #[serde(default)]
    pub install_paths: InstallPaths,
    #[serde(default)]
    pub install_steps: Vec<InstallStep>,
}

/// Where to obtain the package. Exactly one of `url`, `git`, `binary`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Source {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub binary: Option<String>,
    /// Mandatory for `url` and `binary` sources.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
    /// Branch or tag for `git` sources.
    #[serde(rename = "ref", default, skip_serializing_if = "Option::is_none")]
    pub git_ref: Option<String>,
    /// Leading path components to strip when extracting archives.
    /// Defaults to 1 for `url` sources.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strip: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Url,
    Git,
    Binary,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Url => "url",
            Self::Git => "git",
            Self::Binary => "binary",
        }
    }
}

impl Source {
    pub fn kind(&self) -> Option<SourceKind> {
        if self.url.is_some() {
            Some(SourceKind::Url)
        } else if self.git.is_some() {
            Some(SourceKind::Git)
        } else if self.binary.is_some() {
            Some(SourceKind::Binary)
        } else {
            None
        }
    }

    /// The source location: URL, git repository, or binary URL.
    pub fn location(&self) -> &str {
        self.url
            .as_deref()
            .or(self.git.as_deref())
            .or(self.binary.as_deref())
            .unwrap_or("")
    }
}

/// Where package files land on the system. Unset entries default to
/// templates over the previous ones.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct InstallPaths {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub prefix: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub bindir: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub libdir: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub datadir: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub mandir: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub docdir: String,
}

impl PackageDef {
    /// Reads and parses a package definition from a TOML file.
    pub fn parse_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read package file: {}", path.display()))?;
        Self::from_toml_str(&raw)
            .with_context(|| format!("invalid package definition: {}", path.display()))
    }

    pub fn from_toml_str(input: &str) -> Result<Self> {
        let mut def: Self = toml::from_str(input).context("failed to parse package definition")?;
        def.validate()?;
        def.apply_defaults();
        Ok(def)
    }

    fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(anyhow!("package name is required"));
        }
        if self.version.trim().is_empty() {
            return Err(anyhow!("package version is required"));
        }

        let source_count = [&self.source.url, &self.source.git, &self.source.binary]
            .iter()
            .filter(|field| field.is_some())
            .count();
        if source_count == 0 {
            return Err(anyhow!("package source is required (url, git, or binary)"));
        }
        if source_count > 1 {
            return Err(anyhow!("only one source type allowed (url, git, or binary)"));
        }

        if (self.source.url.is_some() || self.source.binary.is_some())
            && self.source.sha256.is_none()
        {
            return Err(anyhow!("sha256 checksum required for url/binary sources"));
        }

        if self.install_steps.is_empty() {
            return Err(anyhow!("at least one install step is required"));
        }
        for (index, step) in self.install_steps.iter().enumerate() {
            step.validate()
                .with_context(|| format!("install_steps[{index}]"))?;
        }

        Ok(())
    }

    fn apply_defaults(&mut self) {
        let paths = &mut self.install_paths;
        if paths.prefix.is_empty() {
            paths.prefix = "/usr/local".to_string();
        }
        if paths.bindir.is_empty() {
            paths.bindir = "{{prefix}}/bin".to_string();
        }
        if paths.libdir.is_empty() {
            paths.libdir = "{{prefix}}/lib".to_string();
        }
        if paths.datadir.is_empty() {
            paths.datadir = "{{prefix}}/share".to_string();
        }
        if paths.mandir.is_empty() {
            paths.mandir = "{{datadir}}/man".to_string();
        }
        if paths.docdir.is_empty() {
            paths.docdir = "{{datadir}}/doc/{{name}}".to_string();
        }
        if self.source.strip.is_none() && self.source.url.is_some() {
            self.source.strip = Some(1);
        }
    }

    /// Install paths with every template variable expanded. Later paths may
    /// reference earlier ones, so expansion is layered.
    pub fn expanded_paths(&self) -> InstallPaths {
        let mut vars = self.base_vars();

        let prefix = expand(&self.install_paths.prefix, &vars);
        vars.insert("prefix", prefix.clone());

        let bindir = expand(&self.install_paths.bindir, &vars);
        let libdir = expand(&self.install_paths.libdir, &vars);
        let datadir = expand(&self.install_paths.datadir, &vars);
        vars.insert("bindir", bindir.clone());
        vars.insert("libdir", libdir.clone());
        vars.insert("datadir", datadir.clone());

        InstallPaths {
            mandir: expand(&self.install_paths.mandir, &vars),
            docdir: expand(&self.install_paths.docdir, &vars),
            prefix,
            bindir,
            libdir,
            datadir,
        }
    }

    /// The source with template variables expanded.
    pub fn expanded_source(&self) -> Source {
        let vars = self.base_vars();
        Source {
            url: self.source.url.as_deref().map(|v| expand(v, &vars)),
            git: self.source.git.as_deref().map(|v| expand(v, &vars)),
            binary: self.source.binary.as_deref().map(|v| expand(v, &vars)),
            sha256: self.source.sha256.clone(),
            git_ref: self.source.git_ref.as_deref().map(|v| expand(v, &vars)),
            strip: self.source.strip,
        }
    }

    /// Install steps with template variables expanded and steps for other
    /// platforms filtered out. `srcdir` is the extracted source directory.
    pub fn expanded_steps(&self, srcdir: &Path) -> Vec<InstallStep> {
        let paths = self.expanded_paths();
        let mut vars = self.base_vars();
        vars.insert("prefix", paths.prefix);
        vars.insert("bindir", paths.bindir);
        vars.insert("libdir", paths.libdir);
        vars.insert("datadir", paths.datadir);
        vars.insert("mandir", paths.mandir);
        vars.insert("docdir", paths.docdir);
        vars.insert("srcdir", srcdir.display().to_string());

        let platform = host_platform();
        self.install_steps
            .iter()
            .filter(|step| step.matches_platform(&platform))
            .map(|step| InstallStep {
                action: expand_action(&step.action, &vars),
                platforms: step.platforms.clone(),
            })
            .collect()
    }

    fn base_vars(&self) -> HashMap<&'static str, String> {
        let os = match std::env::consts::OS {
            "macos" => "apple-darwin".to_string(),
            other => other.to_string(),
        };

        let mut vars = HashMap::new();
        vars.insert("name", self.name.clone());
        vars.insert("version", self.version.clone());
        vars.insert("arch", std::env::consts::ARCH.to_string());
        vars.insert("os", os);
        vars
    }
}

fn expand(input: &str, vars: &HashMap<&'static str, String>) -> String {
    let mut out = input.to_string();
    for (key, value) in vars {
        out = out.replace(&format!("{{{{{key}}}}}"), value);
    }
    out
}

fn expand_action(action: &StepAction, vars: &HashMap<&'static str, String>) -> StepAction {
    match action {
        StepAction::Run { command, workdir } => StepAction::Run {
            command: expand(command, vars),
            workdir: workdir.as_deref().map(|v| expand(v, vars)),
        },
        StepAction::Copy { src, dest, mode } => StepAction::Copy {
            src: expand(src, vars),
            dest: expand(dest, vars),
            mode: mode.clone(),
        },
        StepAction::Mkdir { path, mode } => StepAction::Mkdir {
            path: expand(path, vars),
            mode: mode.clone(),
        },
        StepAction::Symlink { src, dest } => StepAction::Symlink {
            src: expand(src, vars),
            dest: expand(dest, vars),
        },
    }
}
