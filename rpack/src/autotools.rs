//! Drives the configure/make/install triad of the R source tree.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{Context, Result, bail};
use fs_err as fs;

use crate::config::Host;

/// How many trailing log lines a build failure carries into the error.
const LOG_TAIL_LINES: usize = 40;

/// Environment passed explicitly to every spawned build command.
/// Constructed once at pipeline start and threaded through by reference,
/// never memoized process-wide.
#[derive(Debug, Clone, Default)]
pub struct BuildEnv {
    vars: BTreeMap<String, String>,
}

impl BuildEnv {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.vars.insert(key.into(), value.into());
        self
    }

    pub fn vars(&self) -> impl Iterator<Item = (&str, &str)> {
        self.vars.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

enum OptionKind {
    Enable,
    Disable,
    With,
    Without,
}

/// Builder for a pending configure/make/install run.
pub struct Autotools {
    source_dir: PathBuf,
    build_dir: PathBuf,
    prefix: PathBuf,
    options: Vec<(OptionKind, String, Option<String>)>,
    extra_args: Vec<String>,
    env: BuildEnv,
}

impl Autotools {
    pub fn new(
        source_dir: impl AsRef<Path>,
        build_dir: impl AsRef<Path>,
        prefix: impl AsRef<Path>,
        env: BuildEnv,
    ) -> Self {
        Autotools {
            source_dir: source_dir.as_ref().to_path_buf(),
            build_dir: build_dir.as_ref().to_path_buf(),
            prefix: prefix.as_ref().to_path_buf(),
            options: Vec::new(),
            extra_args: Vec::new(),
            env,
        }
    }

    fn set_opt(&mut self, kind: OptionKind, opt: &str, optarg: Option<&str>) -> &mut Self {
        self.options
            .push((kind, opt.to_string(), optarg.map(str::to_string)));
        self
    }

    /// --enable-<opt>[=optarg]
    pub fn enable(&mut self, opt: &str, optarg: Option<&str>) -> &mut Self {
        self.set_opt(OptionKind::Enable, opt, optarg)
    }

    /// --disable-<opt>[=optarg]
    pub fn disable(&mut self, opt: &str, optarg: Option<&str>) -> &mut Self {
        self.set_opt(OptionKind::Disable, opt, optarg)
    }

    /// --with-<opt>[=optarg]
    pub fn with_feature(&mut self, opt: &str, optarg: Option<&str>) -> &mut Self {
        self.set_opt(OptionKind::With, opt, optarg)
    }

    /// --without-<opt>[=optarg]
    pub fn without(&mut self, opt: &str, optarg: Option<&str>) -> &mut Self {
        self.set_opt(OptionKind::Without, opt, optarg)
    }

    pub fn extra_arg(&mut self, arg: impl Into<String>) -> &mut Self {
        self.extra_args.push(arg.into());
        self
    }

    /// The feature set R is built with: no NLS, no shared/static libR, no
    /// X11/Aqua/Tcl-Tk/readline, cairo as the 2D graphics backend.
    pub fn r_defaults(&mut self, host: Host) -> &mut Self {
        self.disable("nls", None)
            .disable("R-shlib", None)
            .disable("R-static-lib", None)
            .with_feature("x", Some("no"))
            .with_feature("aqua", Some("no"))
            .with_feature("tcltk", Some("no"))
            .with_feature("cairo", Some("yes"))
            .with_feature("readline", Some("no"));
        if host == Host::Macos {
            self.disable("R-framework", None);
        }
        self
    }

    /// The argument list `configure` is invoked with.
    pub fn configure_args(&self) -> Vec<String> {
        let mut args = vec![format!("--prefix={}", self.prefix.display())];
        for (kind, opt, optarg) in &self.options {
            let flag = match kind {
                OptionKind::Enable => format!("--enable-{opt}"),
                OptionKind::Disable => format!("--disable-{opt}"),
                OptionKind::With => format!("--with-{opt}"),
                OptionKind::Without => format!("--without-{opt}"),
            };
            match optarg {
                Some(value) => args.push(format!("{flag}={value}")),
                None => args.push(flag),
            }
        }
        args.extend(self.extra_args.iter().cloned());
        args
    }

    pub fn configure(&self) -> Result<()> {
        let script = self.source_dir.join("configure");
        if !script.is_file() {
            bail!("No configure script at {}", script.display());
        }
        fs::create_dir_all(&self.build_dir)?;

        let mut cmd = Command::new("sh");
        cmd.arg(&script)
            .args(self.configure_args())
            .current_dir(&self.build_dir);
        self.apply_env(&mut cmd);

        run_logged(cmd, "configure", &self.build_dir).map_err(|e| {
            // configure's own log usually holds the real reason
            match log_tail(&self.build_dir.join("config.log"), LOG_TAIL_LINES) {
                Some(tail) => e.context(format!("config.log tail:\n{tail}")),
                None => e,
            }
        })
    }

    pub fn make(&self) -> Result<()> {
        let mut cmd = Command::new("make");
        cmd.current_dir(&self.build_dir);
        self.apply_env(&mut cmd);
        run_logged(cmd, "make", &self.build_dir)
    }

    pub fn install(&self) -> Result<()> {
        let mut cmd = Command::new("make");
        cmd.arg("install").current_dir(&self.build_dir);
        self.apply_env(&mut cmd);
        run_logged(cmd, "install", &self.build_dir)
    }

    fn apply_env(&self, cmd: &mut Command) {
        for (key, value) in self.env.vars() {
            cmd.env(key, value);
        }
    }
}

struct RequiredTool {
    name: &'static str,
    probe_args: &'static [&'static str],
    why: &'static str,
}

const REQUIRED_TOOLS: &[RequiredTool] = &[
    RequiredTool {
        name: "sh",
        probe_args: &["-c", "exit 0"],
        why: "a POSIX shell runs the configure script",
    },
    RequiredTool {
        name: "make",
        probe_args: &["--version"],
        why: "make drives the R build",
    },
    RequiredTool {
        name: "gfortran",
        probe_args: &["--version"],
        why: "R's numeric core is Fortran",
    },
];

/// Check the native toolchain before touching the source tree, a missing
/// compiler should fail in seconds rather than minutes into configure.
pub fn preflight() -> Result<()> {
    for tool in REQUIRED_TOOLS {
        if !tool_available(tool.name, tool.probe_args) {
            bail!("{} not found on PATH ({})", tool.name, tool.why);
        }
        log::debug!("Found {}", tool.name);
    }
    Ok(())
}

fn tool_available(name: &str, args: &[&str]) -> bool {
    Command::new(name)
        .args(args)
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

/// Run a build command, capturing its combined output into `<name>.log` in
/// the build directory. On failure the error carries the log tail so the
/// caller can diagnose without digging for files.
fn run_logged(mut cmd: Command, name: &str, log_dir: &Path) -> Result<()> {
    log::info!("Running {} in {}", name, log_dir.display());
    let output = cmd
        .output()
        .with_context(|| format!("Failed to spawn {name}"))?;

    let log_path = log_dir.join(format!("{name}.log"));
    let mut log_file = fs::File::create(&log_path)?;
    log_file.write_all(&output.stdout)?;
    log_file.write_all(&output.stderr)?;

    if !output.status.success() {
        let combined = format!(
            "{}{}",
            String::from_utf8_lossy(&output.stdout),
            String::from_utf8_lossy(&output.stderr)
        );
        bail!(
            "{} failed with {} (full log at {}):\n{}",
            name,
            output.status,
            log_path.display(),
            tail_of(&combined, LOG_TAIL_LINES)
        );
    }
    log::info!("{} finished", name);
    Ok(())
}

fn tail_of(content: &str, lines: usize) -> String {
    let all: Vec<&str> = content.lines().collect();
    let start = all.len().saturating_sub(lines);
    all[start..].join("\n")
}

fn log_tail(path: &Path, lines: usize) -> Option<String> {
    let content = fs::read_to_string(path).ok()?;
    Some(tail_of(&content, lines))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configure_args_render_the_r_feature_set() {
        let env = BuildEnv::new();
        let mut build = Autotools::new("/src", "/build", "/opt/r", env);
        build.r_defaults(Host::Linux);

        let args = build.configure_args();
        assert_eq!(args[0], "--prefix=/opt/r");
        for expected in [
            "--disable-nls",
            "--disable-R-shlib",
            "--disable-R-static-lib",
            "--with-x=no",
            "--with-aqua=no",
            "--with-tcltk=no",
            "--with-cairo=yes",
            "--with-readline=no",
        ] {
            assert!(args.contains(&expected.to_string()), "missing {expected}");
        }
        assert!(!args.contains(&"--disable-R-framework".to_string()));
    }

    #[test]
    fn macos_adds_the_framework_switch() {
        let mut build = Autotools::new("/src", "/build", "/opt/r", BuildEnv::new());
        build.r_defaults(Host::Macos);
        assert!(
            build
                .configure_args()
                .contains(&"--disable-R-framework".to_string())
        );
    }

    #[test]
    fn extra_args_come_last() {
        let mut build = Autotools::new("/src", "/build", "/opt/r", BuildEnv::new());
        build.disable("nls", None).extra_arg("--enable-memory-profiling");

        let args = build.configure_args();
        assert_eq!(args.last().unwrap(), "--enable-memory-profiling");
    }

    #[test]
    fn option_kinds_render_all_four_spellings() {
        let mut build = Autotools::new("/src", "/build", "/opt/r", BuildEnv::new());
        build
            .enable("a", None)
            .disable("b", None)
            .with_feature("c", Some("yes"))
            .without("d", None);

        let args = build.configure_args();
        assert!(args.contains(&"--enable-a".to_string()));
        assert!(args.contains(&"--disable-b".to_string()));
        assert!(args.contains(&"--with-c=yes".to_string()));
        assert!(args.contains(&"--without-d".to_string()));
    }

    #[test]
    fn tool_available_detects_missing_tools() {
        assert!(!tool_available("rpack-no-such-tool-xyz", &["--version"]));
        #[cfg(unix)]
        assert!(tool_available("sh", &["-c", "exit 0"]));
    }

    #[cfg(unix)]
    #[test]
    fn run_logged_writes_the_log_and_surfaces_the_tail() {
        let tmp = tempfile::tempdir().unwrap();

        let mut cmd = Command::new("sh");
        cmd.args(["-c", "echo building; echo broken 1>&2; exit 3"]);
        let err = run_logged(cmd, "make", tmp.path()).unwrap_err().to_string();

        assert!(err.contains("make failed"));
        assert!(err.contains("broken"));

        let log = fs::read_to_string(tmp.path().join("make.log")).unwrap();
        assert!(log.contains("building"));
        assert!(log.contains("broken"));
    }

    #[cfg(unix)]
    #[test]
    fn configure_failure_carries_the_config_log_tail() {
        let tmp = tempfile::tempdir().unwrap();
        let source_dir = tmp.path().join("source");
        let build_dir = tmp.path().join("build");
        fs::create_dir_all(&source_dir).unwrap();
        fs::create_dir_all(&build_dir).unwrap();

        // A configure script that writes its log and fails, as autoconf does.
        fs::write(
            source_dir.join("configure"),
            "#!/bin/sh\necho 'checking for gfortran... no' > config.log\nexit 1\n",
        )
        .unwrap();

        let build = Autotools::new(&source_dir, &build_dir, "/opt/r", BuildEnv::new());
        let err = format!("{:?}", build.configure().unwrap_err());
        assert!(err.contains("configure failed"));
        assert!(err.contains("checking for gfortran... no"));
    }

    #[test]
    fn configure_requires_the_script_to_exist() {
        let tmp = tempfile::tempdir().unwrap();
        let build = Autotools::new(
            tmp.path().join("missing"),
            tmp.path().join("build"),
            "/opt/r",
            BuildEnv::new(),
        );
        let err = build.configure().unwrap_err().to_string();
        assert!(err.contains("No configure script"));
    }

    #[test]
    fn build_env_is_passed_to_commands() {
        let mut env = BuildEnv::new();
        env.set("PKG_CONFIG_PATH", "/deps/lib/pkgconfig");
        let collected: Vec<(String, String)> = env
            .vars()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        assert_eq!(
            collected,
            vec![(
                "PKG_CONFIG_PATH".to_string(),
                "/deps/lib/pkgconfig".to_string()
            )]
        );
    }
}
