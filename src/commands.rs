// The `file`, `config` and `auth` commands.
//
// Inputs are opened and jobs are built on the calling thread, in argument
// order, before anything is handed to the worker pool.

use crate::cli::FileArgs;
use crate::config::{default_config_path, discover_config_script, PoolConfig, ResolverConfig};
use crate::descriptor::ConfigResolver;
use crate::job::{build_job, NamedStream, UploadJob};
use crate::pool::{JobOutcome, WorkerPool};
use crate::runtime::ScriptRuntime;
use crate::ui::{confirm_jobs, ProgressDisplay};
use anyhow::{anyhow, bail, Context, Result};
use std::collections::HashSet;
use std::io;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info, warn};

/// Where the bytes come from.
#[derive(Debug, Clone)]
pub enum Inputs {
    Files(Vec<PathBuf>),
    Stdin { name: String },
}

#[derive(Debug, Clone)]
pub struct UploadOptions {
    pub destination: String,
    pub batch: usize,
    pub strict: bool,
    pub confirm: bool,
}

#[derive(Debug, Default)]
pub struct UploadReport {
    pub outcomes: Vec<JobOutcome>,
    /// Inputs dropped before dispatch (unopenable, or their job failed to build).
    pub skipped: Vec<String>,
    /// The user said no at the confirmation prompt.
    pub declined: bool,
}

impl UploadReport {
    pub fn uploaded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.result.is_ok()).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.uploaded()
    }

    /// Decide the exit status once the pool has drained.
    ///
    /// Nothing uploaded is always an error. In strict mode any failed or
    /// skipped input is too; running jobs are never cut short to get here.
    pub fn ensure_success(&self, strict: bool) -> Result<()> {
        if self.declined {
            return Ok(());
        }
        let attempted = self.outcomes.len() + self.skipped.len();
        if attempted > 0 && self.uploaded() == 0 {
            bail!("nothing was uploaded ({} failed, {} skipped)", self.failed(), self.skipped.len());
        }
        if strict && (self.failed() > 0 || !self.skipped.is_empty()) {
            bail!(
                "{} upload(s) failed and {} input(s) were skipped",
                self.failed(),
                self.skipped.len()
            );
        }
        Ok(())
    }
}

/// Entry point for `gsharer file`.
pub fn run_file(config_override: Option<&Path>, args: FileArgs) -> Result<()> {
    let resolver = ConfigResolver::new(&ResolverConfig::discover(config_override));
    let inputs = if args.files.is_empty() {
        let name = args.name.clone().ok_or_else(|| {
            anyhow!("When uploading from stdin, a filename needs to be specified with --name")
        })?;
        Inputs::Stdin { name }
    } else {
        Inputs::Files(args.files.clone())
    };
    let options = UploadOptions {
        destination: args.destination.clone(),
        batch: args.batch as usize,
        strict: args.strict,
        confirm: args.confirm,
    };
    let pool = WorkerPool::new(PoolConfig::new(args.threads as usize), ProgressDisplay::stderr());

    let report = upload(&resolver, &pool, inputs, &options)?;
    if report.declined {
        info!("upload cancelled");
    }
    report.ensure_success(options.strict)
}

/// Entry point for `gsharer config` and `gsharer auth`.
pub fn describe_config_path(config_override: Option<&Path>) -> String {
    match discover_config_script(config_override) {
        Some(path) => path.display().to_string(),
        None => match default_config_path() {
            Some(path) => format!("{} (not found, using the bundled default)", path.display()),
            None => "no config directory available, using the bundled default".to_string(),
        },
    }
}

/// Open inputs, build jobs, optionally confirm, then run them on `pool`.
pub fn upload(
    resolver: &ConfigResolver,
    pool: &WorkerPool,
    inputs: Inputs,
    options: &UploadOptions,
) -> Result<UploadReport> {
    let mut report = UploadReport::default();

    let streams = match inputs {
        Inputs::Files(paths) => {
            let (streams, skipped) = open_inputs(&paths, options.strict)?;
            report.skipped.extend(skipped);
            streams
        }
        Inputs::Stdin { name } => {
            info!("Reading from stdin...");
            vec![NamedStream::new(name, io::stdin())]
        }
    };
    if streams.is_empty() {
        return Ok(report);
    }

    let runtime = ScriptRuntime::new().context("Failed to start the script runtime")?;
    let (jobs, skipped) = plan_jobs(
        &runtime,
        resolver,
        &options.destination,
        streams,
        options.batch,
        options.strict,
    )?;
    report.skipped.extend(skipped);
    drop(runtime);

    if options.confirm && !jobs.is_empty() {
        let summaries: Vec<_> = jobs.iter().map(UploadJob::summary).collect();
        if !confirm_jobs(&summaries)? {
            report.declined = true;
            return Ok(report);
        }
    }

    report.outcomes = pool.run(jobs);
    Ok(report)
}

/// Open `paths` in order, skipping repeats of the same absolute path.
///
/// Returns the opened streams and the paths that could not be opened; in
/// strict mode the first unopenable path is an error instead.
pub fn open_inputs(paths: &[PathBuf], strict: bool) -> Result<(Vec<NamedStream>, Vec<String>)> {
    let mut seen = HashSet::new();
    let mut streams = Vec::new();
    let mut skipped = Vec::new();

    for path in paths {
        let opened = std::path::absolute(path)
            .map(|absolute| normalize_lexically(&absolute))
            .map_err(anyhow::Error::from)
            .and_then(|absolute| {
                if !seen.insert(absolute.clone()) {
                    return Ok(None);
                }
                Ok(Some(NamedStream::open(&absolute)?))
            });
        match opened {
            Ok(Some(stream)) => streams.push(stream),
            Ok(None) => debug!(path = %path.display(), "skipping duplicate input"),
            Err(err) if strict => {
                return Err(err).with_context(|| format!("Failed to open {}", path.display()))
            }
            Err(err) => {
                warn!(path = %path.display(), "skipping input: {err}");
                skipped.push(path.display().to_string());
            }
        }
    }
    Ok((streams, skipped))
}

/// Drop `.` segments and fold `name/..` pairs without touching the filesystem.
fn normalize_lexically(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if matches!(normalized.components().next_back(), Some(Component::Normal(_))) {
                    normalized.pop();
                } else if !normalized.has_root() {
                    normalized.push(component);
                }
            }
            other => normalized.push(other),
        }
    }
    normalized
}

/// Group streams into jobs of at most `batch` files, resolving the
/// destination once per job. Input order is preserved.
///
/// Outside strict mode a job that fails to build is logged and its files are
/// returned as skipped.
pub fn plan_jobs(
    runtime: &ScriptRuntime,
    resolver: &ConfigResolver,
    destination: &str,
    streams: Vec<NamedStream>,
    batch: usize,
    strict: bool,
) -> Result<(Vec<UploadJob>, Vec<String>)> {
    let batch = batch.max(1);
    let mut jobs = Vec::new();
    let mut skipped = Vec::new();
    let mut streams = streams.into_iter().peekable();

    while streams.peek().is_some() {
        let group: Vec<NamedStream> = streams.by_ref().take(batch).collect();
        let names: Vec<String> = group.iter().map(|s| s.name().to_string()).collect();

        let built = resolver
            .resolve(runtime, destination, &names)
            .and_then(|descriptor| build_job(&descriptor, group));
        match built {
            Ok(job) => jobs.push(job),
            Err(err) if strict => {
                return Err(err).with_context(|| format!("Failed to prepare upload of {names:?}"))
            }
            Err(err) => {
                warn!(files = ?names, "skipping upload: {err}");
                skipped.extend(names);
            }
        }
    }
    Ok((jobs, skipped))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ScriptSource;
    use crate::error::GsharerError;
    use std::fs;

    fn external_resolver(dir: &Path, script: &str) -> ConfigResolver {
        let path = dir.join("main.lua");
        fs::write(&path, script).unwrap();
        ConfigResolver::new(&ResolverConfig::new(ScriptSource::External(path)))
    }

    const PICKY_CONFIG: &str = r#"
        return function(destination, ...)
            for _, name in ipairs({ ... }) do
                if name == "bad.txt" then error("refusing " .. name) end
            end
            return {
                name = destination,
                request = { URL = "http://127.0.0.1:9/upload", file_form_name = "file" },
            }
        end
    "#;

    fn write_inputs(dir: &Path, names: &[&str]) -> Vec<PathBuf> {
        names
            .iter()
            .map(|name| {
                let path = dir.join(name);
                fs::write(&path, format!("contents of {name}")).unwrap();
                path
            })
            .collect()
    }

    #[test]
    fn open_inputs_dedups_and_keeps_order() {
        let dir = tempfile::tempdir().unwrap();
        let mut paths = write_inputs(dir.path(), &["b.txt", "a.txt"]);
        paths.push(dir.path().join(".").join("b.txt"));
        paths.push(paths[0].clone());

        let (streams, skipped) = open_inputs(&paths, false).unwrap();
        let names: Vec<_> = streams.iter().map(|s| s.name().to_string()).collect();
        assert_eq!(names, vec!["b.txt", "a.txt"]);
        assert!(skipped.is_empty());
    }

    #[test]
    fn open_inputs_folds_parent_segments() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();
        let mut paths = write_inputs(dir.path(), &["a.txt"]);
        paths.push(dir.path().join("sub").join("..").join("a.txt"));
        paths.push(dir.path().join("sub").join(".").join("..").join("a.txt"));

        let (streams, skipped) = open_inputs(&paths, false).unwrap();
        assert_eq!(streams.len(), 1);
        assert!(skipped.is_empty());
    }

    #[test]
    fn lexical_normalization() {
        assert_eq!(
            normalize_lexically(Path::new("/tmp/x/./sub/../a.txt")),
            PathBuf::from("/tmp/x/a.txt")
        );
        assert_eq!(normalize_lexically(Path::new("/../a.txt")), PathBuf::from("/a.txt"));
    }

    #[test]
    fn missing_inputs_are_skipped_unless_strict() {
        let dir = tempfile::tempdir().unwrap();
        let mut paths = write_inputs(dir.path(), &["a.txt"]);
        paths.push(dir.path().join("missing.txt"));

        let (streams, skipped) = open_inputs(&paths, false).unwrap();
        assert_eq!(streams.len(), 1);
        assert_eq!(skipped.len(), 1);

        assert!(open_inputs(&paths, true).is_err());
    }

    #[test]
    fn batch_of_one_builds_one_job_per_file() {
        let dir = tempfile::tempdir().unwrap();
        let resolver = external_resolver(dir.path(), PICKY_CONFIG);
        let paths = write_inputs(dir.path(), &["a.txt", "b.txt"]);
        let (streams, _) = open_inputs(&paths, true).unwrap();

        let runtime = ScriptRuntime::new().unwrap();
        let (jobs, skipped) = plan_jobs(&runtime, &resolver, "drop", streams, 1, true).unwrap();
        assert!(skipped.is_empty());
        let files: Vec<_> = jobs.iter().map(|j| j.files.clone()).collect();
        assert_eq!(files, vec![vec!["a.txt".to_string()], vec!["b.txt".to_string()]]);
        assert!(jobs.iter().all(|j| j.destination == "drop"));
    }

    #[test]
    fn larger_batches_group_files_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let resolver = external_resolver(dir.path(), PICKY_CONFIG);
        let paths = write_inputs(dir.path(), &["1.txt", "2.txt", "3.txt"]);
        let (streams, _) = open_inputs(&paths, true).unwrap();

        let runtime = ScriptRuntime::new().unwrap();
        let (jobs, _) = plan_jobs(&runtime, &resolver, "drop", streams, 2, true).unwrap();
        assert_eq!(jobs.len(), 2);
        assert_eq!(jobs[0].files, vec!["1.txt", "2.txt"]);
        assert_eq!(jobs[1].files, vec!["3.txt"]);
    }

    #[test]
    fn failing_jobs_are_skipped_or_abort_in_strict_mode() {
        let dir = tempfile::tempdir().unwrap();
        let resolver = external_resolver(dir.path(), PICKY_CONFIG);
        let paths = write_inputs(dir.path(), &["a.txt", "bad.txt", "c.txt"]);

        let runtime = ScriptRuntime::new().unwrap();
        let (streams, _) = open_inputs(&paths, true).unwrap();
        let (jobs, skipped) = plan_jobs(&runtime, &resolver, "drop", streams, 1, false).unwrap();
        assert_eq!(jobs.len(), 2);
        assert_eq!(skipped, vec!["bad.txt"]);

        let (streams, _) = open_inputs(&paths, true).unwrap();
        let err = plan_jobs(&runtime, &resolver, "drop", streams, 1, true).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<GsharerError>(),
            Some(GsharerError::ConfigLoad(_))
        ));
    }

    fn outcome(job: usize, ok: bool) -> JobOutcome {
        JobOutcome {
            job,
            worker: Some(0),
            files: vec![format!("{job}.txt")],
            result: if ok {
                Ok(format!("https://host/{job}"))
            } else {
                Err(GsharerError::Network("connection refused".into()))
            },
        }
    }

    #[test]
    fn report_exit_policy() {
        let mixed = UploadReport {
            outcomes: vec![outcome(0, true), outcome(1, false)],
            ..Default::default()
        };
        assert!(mixed.ensure_success(false).is_ok());
        assert!(mixed.ensure_success(true).is_err());

        let none = UploadReport {
            outcomes: vec![outcome(0, false)],
            ..Default::default()
        };
        assert!(none.ensure_success(false).is_err());

        let declined = UploadReport {
            declined: true,
            ..Default::default()
        };
        assert!(declined.ensure_success(true).is_ok());
    }

    #[test]
    fn explicit_config_path_is_described_verbatim() {
        let described = describe_config_path(Some(Path::new("/etc/gsharer/main.lua")));
        assert_eq!(described, "/etc/gsharer/main.lua");
    }
}
