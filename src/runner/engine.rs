//! Engine location and argument templates

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use super::RunnerError;

/// Default engine argument template
pub const DEFAULT_ENGINE_ARGS: &[&str] = &[
    "-w",
    "{weather}",
    "-p",
    "{name}",
    "-d",
    "{output_dir}",
    "{model}",
];

/// Files copied from the engine installation into every staging directory
/// when present.
pub const SUPPORT_FILES: &[&str] = &["Energy+.idd", "DElight2.dll", "libexpat.dll", "bcvtb.dll"];

const EXECUTABLE_NAMES: &[&str] = &["energyplus", "energyplus.exe", "EnergyPlus.exe"];

/// A located engine installation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Engine {
    executable: PathBuf,
    install_dir: PathBuf,
}

impl Engine {
    /// Locate the engine from an installation directory or the executable
    /// itself.
    pub fn locate(path: &Path) -> Result<Self, RunnerError> {
        let (executable, install_dir) = if path.is_dir() {
            let executable = EXECUTABLE_NAMES
                .iter()
                .map(|name| path.join(name))
                .find(|candidate| candidate.is_file())
                .ok_or_else(|| RunnerError::EngineNotFound {
                    path: path.to_path_buf(),
                })?;
            (executable, path.to_path_buf())
        } else if path.is_file() {
            let install_dir = path
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| PathBuf::from("."));
            (path.to_path_buf(), install_dir)
        } else {
            return Err(RunnerError::EngineNotFound {
                path: path.to_path_buf(),
            });
        };

        if !is_executable(&executable) {
            return Err(RunnerError::EngineNotExecutable { path: executable });
        }
        Ok(Self {
            executable,
            install_dir,
        })
    }

    pub fn executable(&self) -> &Path {
        &self.executable
    }

    pub fn install_dir(&self) -> &Path {
        &self.install_dir
    }

    /// Support files that exist in the installation directory
    pub fn support_files(&self) -> Vec<PathBuf> {
        SUPPORT_FILES
            .iter()
            .map(|name| self.install_dir.join(name))
            .filter(|path| path.is_file())
            .collect()
    }
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

/// Values substituted into the argument template
#[derive(Debug, Clone, Copy)]
pub struct ArgContext<'a> {
    pub weather: &'a Path,
    pub model: &'a Path,
    pub name: &'a str,
    pub output_dir: &'a Path,
    pub work_dir: &'a Path,
}

/// Engine argument template.
///
/// Each argument may contain `{weather}`, `{model}`, `{name}`,
/// `{output_dir}` or `{work_dir}`; anything else is passed through.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArgTemplate {
    args: Vec<String>,
}

impl Default for ArgTemplate {
    fn default() -> Self {
        Self::new(DEFAULT_ENGINE_ARGS.iter().map(|s| s.to_string()).collect())
    }
}

impl ArgTemplate {
    pub fn new(args: Vec<String>) -> Self {
        Self { args }
    }

    pub fn render(&self, ctx: &ArgContext<'_>) -> Vec<OsString> {
        self.args.iter().map(|arg| render_arg(arg, ctx)).collect()
    }
}

fn render_arg(arg: &str, ctx: &ArgContext<'_>) -> OsString {
    // Whole-argument placeholders keep non-UTF-8 paths intact.
    match arg {
        "{weather}" => return ctx.weather.as_os_str().to_owned(),
        "{model}" => return ctx.model.as_os_str().to_owned(),
        "{output_dir}" => return ctx.output_dir.as_os_str().to_owned(),
        "{work_dir}" => return ctx.work_dir.as_os_str().to_owned(),
        "{name}" => return OsString::from(ctx.name),
        _ => {}
    }
    OsString::from(
        arg.replace("{weather}", &ctx.weather.to_string_lossy())
            .replace("{model}", &ctx.model.to_string_lossy())
            .replace("{output_dir}", &ctx.output_dir.to_string_lossy())
            .replace("{work_dir}", &ctx.work_dir.to_string_lossy())
            .replace("{name}", ctx.name),
    )
}
