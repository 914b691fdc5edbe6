use std::env;
use std::path::{Path, PathBuf};

/// `$QQSUM_HOME/.env`, or `~/.qqsum/.env` when `QQSUM_HOME` is unset or blank.
fn home_dotenv_path(qqsum_home: Option<&str>, home_dir: Option<&Path>) -> Option<PathBuf> {
    match qqsum_home.map(str::trim).filter(|h| !h.is_empty()) {
        Some(custom) => Some(Path::new(custom).join(".env")),
        None => Some(home_dir?.join(".qqsum").join(".env")),
    }
}

/// Load the first candidate that exists. Variables already present in the
/// process environment are never overwritten.
fn load_first_existing(candidates: &[PathBuf]) -> Option<PathBuf> {
    candidates
        .iter()
        .filter(|path| path.is_file())
        .find(|path| dotenvy::from_path(path).is_ok())
        .cloned()
}

/// Working directory `.env` first, then the one under the qqsum home.
pub fn load_dotenv() -> Option<PathBuf> {
    let mut candidates = Vec::with_capacity(2);
    if let Ok(cwd) = env::current_dir() {
        candidates.push(cwd.join(".env"));
    }
    let qqsum_home = env::var("QQSUM_HOME").ok();
    if let Some(path) = home_dotenv_path(qqsum_home.as_deref(), dirs::home_dir().as_deref()) {
        candidates.push(path);
    }
    load_first_existing(&candidates)
}

#[cfg(test)]
mod tests {
    use super::{home_dotenv_path, load_first_existing};
    use std::env;
    use std::fs;
    use std::path::{Path, PathBuf};
    use tempfile::tempdir;

    #[test]
    fn qqsum_home_holds_the_env_file() {
        let got = home_dotenv_path(Some("/srv/qqsum"), Some(Path::new("/home/alice")));
        assert_eq!(got, Some(PathBuf::from("/srv/qqsum/.env")));
    }

    #[test]
    fn blank_qqsum_home_falls_back_to_dot_dir() {
        let home = Path::new("/home/alice");
        let expected = Some(PathBuf::from("/home/alice/.qqsum/.env"));
        assert_eq!(home_dotenv_path(None, Some(home)), expected);
        assert_eq!(home_dotenv_path(Some("  "), Some(home)), expected);
        assert_eq!(home_dotenv_path(None, None), None);
    }

    #[test]
    fn missing_candidates_are_skipped_and_existing_vars_win() {
        let tmp = tempdir().expect("tempdir");
        let env_file = tmp.path().join(".env");
        fs::write(
            &env_file,
            "DOTENV_LOADER_FRESH_KEY=from-file\nDOTENV_LOADER_TAKEN_KEY=from-file\n",
        )
        .expect("write .env");
        // SAFETY: keys are unique to this test.
        unsafe { env::set_var("DOTENV_LOADER_TAKEN_KEY", "from-process") };

        let loaded = load_first_existing(&[tmp.path().join("absent/.env"), env_file.clone()]);

        assert_eq!(loaded, Some(env_file));
        assert_eq!(env::var("DOTENV_LOADER_FRESH_KEY").as_deref(), Ok("from-file"));
        assert_eq!(env::var("DOTENV_LOADER_TAKEN_KEY").as_deref(), Ok("from-process"));
    }

    #[test]
    fn nothing_loaded_when_no_candidate_exists() {
        let tmp = tempdir().expect("tempdir");
        assert_eq!(load_first_existing(&[tmp.path().join(".env")]), None);
    }
}
