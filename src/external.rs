use crate::signals::write_raw;
use anyhow::{Context, Result};
use nix::errno::Errno;
use std::ffi::{CString, OsStr};
use std::os::raw::c_char;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

/// Exit status of a child whose program could not be found.
pub const STATUS_NOT_FOUND: i32 = 127;
/// Exit status of a child whose program was found but could not be executed.
pub const STATUS_NOT_EXECUTABLE: i32 = 126;

/// Everything a forked child needs to `exec` a stage, built before the fork.
///
/// The child must not allocate, so the C strings and the null-terminated
/// pointer array are prepared by the parent.
pub(crate) struct PreparedCommand {
    path: Option<CString>,
    argv: Vec<CString>,
    argv_ptrs: Vec<*const c_char>,
}

impl PreparedCommand {
    /// Resolves `args[0]` and converts the arguments to C strings.
    ///
    /// A name that cannot be resolved is not an error here; the child reports it.
    pub(crate) fn new(args: &[String], search_paths: Option<&OsStr>, cwd: &Path) -> Result<Self> {
        let argv = args
            .iter()
            .map(|a| CString::new(a.as_bytes()))
            .collect::<Result<Vec<_>, _>>()
            .context("argument contains a NUL byte")?;
        let path = find_command_path(search_paths.unwrap_or_default(), cwd, Path::new(&args[0]))
            .map(|p| CString::new(p.as_os_str().as_bytes()))
            .transpose()
            .context("program path contains a NUL byte")?;
        let mut argv_ptrs: Vec<*const c_char> = argv.iter().map(|a| a.as_ptr()).collect();
        argv_ptrs.push(std::ptr::null());
        Ok(Self {
            path,
            argv,
            argv_ptrs,
        })
    }

    pub(crate) fn is_resolved(&self) -> bool {
        self.path.is_some()
    }

    /// Program name as typed, for diagnostics.
    pub(crate) fn name(&self) -> &[u8] {
        self.argv[0].as_bytes()
    }

    /// Replaces the current (child) process image. Never returns.
    ///
    /// On failure a diagnostic goes to stderr and the child exits with
    /// [`STATUS_NOT_FOUND`] or [`STATUS_NOT_EXECUTABLE`].
    pub(crate) fn exec(&self) -> ! {
        let name = self.name();
        let Some(path) = &self.path else {
            child_diagnostic(name, b"command not found");
            unsafe { libc::_exit(STATUS_NOT_FOUND) }
        };
        unsafe {
            libc::execv(path.as_ptr(), self.argv_ptrs.as_ptr());
        }
        let errno = Errno::last();
        child_diagnostic(name, errno.desc().as_bytes());
        unsafe { libc::_exit(STATUS_NOT_EXECUTABLE) }
    }
}

/// Writes `jobsh: <name>: <message>` to stderr without allocating.
pub(crate) fn child_diagnostic(name: &[u8], message: &[u8]) {
    write_raw(libc::STDERR_FILENO, b"jobsh: ");
    write_raw(libc::STDERR_FILENO, name);
    write_raw(libc::STDERR_FILENO, b": ");
    write_raw(libc::STDERR_FILENO, message);
    write_raw(libc::STDERR_FILENO, b"\n");
}

/// Resolve a command path the way a typical shell would.
///
/// Behavior:
/// - Absolute path: returns it if it exists.
/// - Relative with multiple components (e.g., `bin/sh`, `./foo`): resolved
///   against `cwd` and returned if it exists.
/// - Single path component (no separators): search each directory in `search_paths` (PATH)
///   and return the first executable regular file.
/// - Empty path: returns `None`.
pub fn find_command_path(search_paths: &OsStr, cwd: &Path, path: &Path) -> Option<PathBuf> {
    if path.is_absolute() {
        return find_by_path(path);
    }

    let mut components = path.components();
    let first = components.next();
    let second = components.next();
    match (first, second) {
        // Empty path -> not found
        (None, _) => None,
        // A bare name, unless it was written as `./name`
        (Some(std::path::Component::Normal(name)), None) => find_in_path(search_paths, name),
        // Multiple components -> relative to the working directory
        _ => find_by_path(&cwd.join(path)),
    }
}

fn find_in_path(search_paths: &OsStr, cmd: &OsStr) -> Option<PathBuf> {
    std::env::split_paths(search_paths)
        .map(|dir| dir.join(cmd))
        .find(|candidate| is_executable_file(candidate))
}

fn find_by_path(path: &Path) -> Option<PathBuf> {
    if path.exists() {
        Some(path.to_path_buf())
    } else {
        None
    }
}

fn is_executable_file(path: &Path) -> bool {
    path.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::fs::File;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn osstr(s: &str) -> &OsStr {
        OsStr::new(s)
    }

    fn make_unique_temp_dir(tag: &str) -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        let p = std::env::temp_dir().join(format!("external_tests_{}_{}_{}", std::process::id(), tag, nanos));
        let _ = fs::remove_dir_all(&p);
        fs::create_dir_all(&p).expect("create temp dir");
        p
    }

    #[test]
    fn absolute_existing_true() {
        let path = Path::new("/bin/sh");
        let res = find_command_path(osstr("/bin"), Path::new("/"), path);
        assert_eq!(res.as_deref(), Some(path), "Expected to find /bin/sh via absolute path");
    }

    #[test]
    fn absolute_nonexisting() {
        let path = Path::new("/bin/nonexisting");
        let res = find_command_path(osstr("/bin"), Path::new("/"), path);
        assert!(
            res.is_none(),
            "Expected not to find /bin/nonexisting via absolute path"
        );
    }

    #[test]
    fn single_component_found_in_path() {
        // Search for "sh" in PATH that includes /bin
        let res = find_command_path(osstr("/nonexistent:/bin"), Path::new("/"), Path::new("sh"));
        let found = res.expect("Expected to find 'sh' in /bin via PATH search");
        assert_eq!(found, Path::new("/bin/sh"));
    }

    #[test]
    fn single_component_not_found_in_path() {
        let res = find_command_path(osstr("/bin"), Path::new("/"), Path::new("nonexisting"));
        assert!(res.is_none(), "Expected not to find 'nonexisting' in PATH");
    }

    #[test]
    fn non_executable_file_in_path_is_skipped() {
        let dir = make_unique_temp_dir("noexec");
        File::create(dir.join("tool")).expect("touch tool");
        let search = format!("{}:/bin", dir.display());
        let res = find_command_path(osstr(&search), Path::new("/"), Path::new("tool"));
        assert!(res.is_none());
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn multiple_components_relative_to_cwd() {
        let dir = make_unique_temp_dir("mc");
        fs::create_dir_all(dir.join("bin")).expect("create temp bin dir");
        File::create(dir.join("bin").join("sh")).expect("touch bin/sh");

        let res = find_command_path(osstr("/does/not/matter"), &dir, Path::new("bin/sh"));
        let found = res.expect("Expected to find relative 'bin/sh' in cwd");
        assert_eq!(found, dir.join("bin/sh"));
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn current_dir_with_dot_prefix() {
        let dir = make_unique_temp_dir("dot");
        File::create(dir.join("foo")).expect("touch foo");

        let res = find_command_path(osstr("/bin"), &dir, Path::new("./foo"));
        let found = res.expect("Expected to find './foo' in cwd");
        assert!(found.ends_with("foo"));
        assert!(found.starts_with(&dir));
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn empty_path_is_none() {
        let res = find_command_path(osstr("/bin"), Path::new("/"), Path::new(""));
        assert!(res.is_none(), "Empty path should not resolve to anything");
    }

    #[test]
    fn prepared_command_resolves_and_terminates_argv() {
        let args = vec!["sh".to_string(), "-c".to_string(), "true".to_string()];
        let cmd = PreparedCommand::new(&args, Some(osstr("/bin")), Path::new("/")).unwrap();
        assert!(cmd.is_resolved());
        assert_eq!(cmd.argv_ptrs.len(), 4);
        assert!(cmd.argv_ptrs[3].is_null());
    }

    #[test]
    fn prepared_command_keeps_unknown_names() {
        let args = vec!["definitely-not-a-command-jobsh".to_string()];
        let cmd = PreparedCommand::new(&args, Some(osstr("/bin")), Path::new("/")).unwrap();
        assert!(!cmd.is_resolved());
    }

    #[test]
    fn prepared_command_rejects_nul() {
        let args = vec!["ec\0ho".to_string()];
        assert!(PreparedCommand::new(&args, Some(osstr("/bin")), Path::new("/")).is_err());
    }
}
