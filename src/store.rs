//! Best-effort plain-text persistence under the session data
//! directory. A missing file just means a fresh start; write failures
//! are logged and swallowed.

use std::fs;
use std::path::Path;

pub const COOKIES_FILE: &str = "Cookies";
pub const LOGIN_FILE: &str = "Login";

pub fn read_lines(dir: &Path, name: &str) -> Vec<String> {
    match fs::read_to_string(dir.join(name)) {
        Ok(content) => content
            .lines()
            .filter(|line| !line.is_empty())
            .map(str::to_owned)
            .collect(),
        Err(_) => Vec::new(),
    }
}

/// First non-empty line of the file, if any.
pub fn read_line(dir: &Path, name: &str) -> Option<String> {
    read_lines(dir, name).into_iter().next()
}

pub fn write_lines(dir: &Path, name: &str, lines: &[String]) {
    if let Err(err) = fs::create_dir_all(dir) {
        log::warn!("cannot create {}: {err}", dir.display());
        return;
    }
    let mut content = lines.join("\n");
    if !content.is_empty() {
        content.push('\n');
    }
    let path = dir.join(name);
    if let Err(err) = fs::write(&path, content) {
        log::warn!("cannot write {}: {err}", path.display());
    }
}

pub fn write_line(dir: &Path, name: &str, line: &str) {
    write_lines(dir, name, &[line.to_owned()]);
}

pub fn remove(dir: &Path, name: &str) {
    let path = dir.join(name);
    if fs::remove_file(&path).is_ok() {
        log::debug!("removed {}", path.display());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lines_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let lines = vec!["a=1; Domain=hsl.fi".to_owned(), "b=2; Domain=hsl.fi".to_owned()];

        write_lines(dir.path(), COOKIES_FILE, &lines);
        assert_eq!(read_lines(dir.path(), COOKIES_FILE), lines);
    }

    #[test]
    fn missing_file_reads_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert!(read_lines(dir.path(), COOKIES_FILE).is_empty());
        assert_eq!(read_line(dir.path(), LOGIN_FILE), None);
    }

    #[test]
    fn single_line_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        write_line(dir.path(), LOGIN_FILE, "user@example.com");
        assert_eq!(
            read_line(dir.path(), LOGIN_FILE),
            Some("user@example.com".to_owned())
        );
    }

    #[test]
    fn write_creates_missing_directories() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("deep/session");
        write_line(&nested, LOGIN_FILE, "user");
        assert_eq!(read_line(&nested, LOGIN_FILE), Some("user".to_owned()));
    }

    #[test]
    fn remove_is_silent_when_absent() {
        let dir = tempfile::tempdir().unwrap();
        remove(dir.path(), COOKIES_FILE);

        write_line(dir.path(), COOKIES_FILE, "a=1");
        remove(dir.path(), COOKIES_FILE);
        assert!(read_lines(dir.path(), COOKIES_FILE).is_empty());
    }
}
